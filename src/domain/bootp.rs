//! BootP/DHCP packet domain models.
//!
//! These types represent the logical structure of a BootP request,
//! independent of wire format parsing.

use std::net::Ipv4Addr;

use macaddr::MacAddr6;

/// BOOTREQUEST op code.
pub const BOOTREQUEST: u8 = 1;
/// BOOTREPLY op code.
pub const BOOTREPLY: u8 = 2;

/// Bit 15 of FLAGS: the client cannot receive unicast before it has an address.
pub const BROADCAST_FLAG: u16 = 0x8000;

/// DHCP message types as defined in RFC 2131.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DhcpMessageType {
    Discover,
    Offer,
    Request,
    Decline,
    Ack,
    Nak,
    Release,
    Inform,
}

impl DhcpMessageType {
    /// Parse from the DHCP option 53 value.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::Discover),
            2 => Some(Self::Offer),
            3 => Some(Self::Request),
            4 => Some(Self::Decline),
            5 => Some(Self::Ack),
            6 => Some(Self::Nak),
            7 => Some(Self::Release),
            8 => Some(Self::Inform),
            _ => None,
        }
    }
}

impl std::fmt::Display for DhcpMessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Discover => write!(f, "DISCOVER"),
            Self::Offer => write!(f, "OFFER"),
            Self::Request => write!(f, "REQUEST"),
            Self::Decline => write!(f, "DECLINE"),
            Self::Ack => write!(f, "ACK"),
            Self::Nak => write!(f, "NAK"),
            Self::Release => write!(f, "RELEASE"),
            Self::Inform => write!(f, "INFORM"),
        }
    }
}

/// Options a commissioning request may carry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BootpOption {
    /// Option 1
    SubnetMask(Ipv4Addr),
    /// Option 3
    Router(Vec<Ipv4Addr>),
    /// Option 12
    HostName(String),
    /// Option 50
    RequestedIp(Ipv4Addr),
    /// Option 53
    MessageType(DhcpMessageType),
    /// Option 54
    ServerIdentifier(Ipv4Addr),
    /// Option 60
    VendorClassId(String),
    /// Option 61
    ClientId(Vec<u8>),
    /// Unknown option (code, data)
    Unknown(u8, Vec<u8>),
}

/// A parsed BootP/DHCP packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootPPacket {
    /// Operation: 1 = BOOTREQUEST, 2 = BOOTREPLY
    pub op: u8,
    /// Hardware type (1 = Ethernet)
    pub htype: u8,
    /// Hardware address length
    pub hlen: u8,
    pub hops: u8,
    /// Transaction ID
    pub xid: u32,
    pub secs: u16,
    pub flags: u16,
    pub ciaddr: Ipv4Addr,
    pub yiaddr: Ipv4Addr,
    pub siaddr: Ipv4Addr,
    pub giaddr: Ipv4Addr,
    /// Client hardware address, all 16 bytes as sent
    pub chaddr: [u8; 16],
    /// Server hostname (optional)
    pub sname: Option<String>,
    /// Boot filename (optional)
    pub file: Option<String>,
    /// Whether the DHCP magic cookie followed the fixed header
    pub has_magic_cookie: bool,
    pub options: Vec<BootpOption>,
}

impl BootPPacket {
    /// Returns true if this is a client request (BOOTREQUEST).
    pub fn is_request(&self) -> bool {
        self.op == BOOTREQUEST
    }

    /// Returns true if the client asked for a broadcast reply.
    pub fn wants_broadcast(&self) -> bool {
        self.flags & BROADCAST_FLAG != 0
    }

    /// Client MAC taken from the first six chaddr bytes.
    pub fn client_mac(&self) -> MacAddr6 {
        MacAddr6::new(
            self.chaddr[0],
            self.chaddr[1],
            self.chaddr[2],
            self.chaddr[3],
            self.chaddr[4],
            self.chaddr[5],
        )
    }

    /// Get the DHCP message type, absent for plain BootP.
    pub fn message_type(&self) -> Option<DhcpMessageType> {
        self.options.iter().find_map(|opt| {
            if let BootpOption::MessageType(msg_type) = opt {
                Some(*msg_type)
            } else {
                None
            }
        })
    }

    /// Get the host name the client announced (Option 12).
    pub fn host_name(&self) -> Option<&str> {
        self.options.iter().find_map(|opt| {
            if let BootpOption::HostName(ref s) = opt {
                Some(s.as_str())
            } else {
                None
            }
        })
    }

    /// Get the address the client would like (Option 50).
    pub fn requested_ip(&self) -> Option<Ipv4Addr> {
        self.options.iter().find_map(|opt| {
            if let BootpOption::RequestedIp(ip) = opt {
                Some(*ip)
            } else {
                None
            }
        })
    }

    /// Get the vendor class identifier (Option 60).
    pub fn vendor_class_id(&self) -> Option<&str> {
        self.options.iter().find_map(|opt| {
            if let BootpOption::VendorClassId(ref s) = opt {
                Some(s.as_str())
            } else {
                None
            }
        })
    }
}
