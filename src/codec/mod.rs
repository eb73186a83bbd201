//! Wire codecs for EtherNet/IP, CIP and BootP.
//!
//! Pure functions over byte slices. Nothing here performs I/O, so the
//! codecs are shared freely between discovery, configuration and the
//! BootP server.

pub mod bootp;
pub mod cip;
pub mod encapsulation;
pub mod identity;
mod reader;

pub use bootp::{build_bootp_reply, parse_bootp_packet, MIN_BOOTP_SIZE};
pub use cip::{
    build_get_attribute_all, build_get_attribute_single, build_set_attribute_single,
    build_unconnected_send, parse_attribute_reply, CipStatus,
};
pub use encapsulation::{
    build_list_identity_request, fresh_sender_context, wrap_send_rr_data, EncapsulationHeader,
    SenderContext, ENCAPSULATION_HEADER_SIZE, ETHERNET_IP_PORT,
};
pub use identity::{parse_list_identity_response, IdentityRecord};
