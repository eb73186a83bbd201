//! Error types for commissioning operations.

use std::io;
use std::net::Ipv4Addr;

use thiserror::Error;

use crate::codec::CipStatus;

/// Result type alias for commissioning operations.
pub type Result<T> = std::result::Result<T, CommissionError>;

/// Errors raised while decoding EtherNet/IP, CIP or BootP bytes.
///
/// A decode failure only ever drops the datagram that caused it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("packet too short: expected at least {expected} bytes, got {actual}")]
    TooShort { expected: usize, actual: usize },

    #[error("length mismatch in {field}: declared {declared} bytes, found {actual}")]
    LengthMismatch {
        field: &'static str,
        declared: usize,
        actual: usize,
    },

    #[error("unexpected encapsulation command 0x{actual:04X} (expected 0x{expected:04X})")]
    UnexpectedCommand { expected: u16, actual: u16 },

    #[error("encapsulation status 0x{0:08X}")]
    EncapsulationStatus(u32),

    #[error("unexpected CPF item count {0}")]
    UnexpectedItemCount(u16),

    #[error("unexpected CPF item type 0x{actual:04X} (expected 0x{expected:04X})")]
    UnexpectedItem { expected: u16, actual: u16 },

    #[error("reply carries no CPF item of type 0x{0:04X}")]
    MissingItem(u16),

    #[error("unexpected CIP reply service 0x{0:02X}")]
    UnexpectedService(u8),

    #[error("string is not ASCII")]
    InvalidString,

    #[error("invalid option at offset {offset}: {message}")]
    InvalidOption { offset: usize, message: String },
}

/// Failure decoding a CIP attribute reply.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReplyError {
    #[error(transparent)]
    Malformed(#[from] DecodeError),

    #[error("CIP status {0}")]
    Status(CipStatus),
}

/// Caller-supplied configuration rejected before any network I/O.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("IP address {0} cannot be assigned to a device")]
    InvalidAddress(String),

    #[error("subnet mask {0} is not a contiguous mask")]
    InvalidMask(String),

    #[error("{field} {address} is not in the same subnet as {ip}/{mask}")]
    DifferentSubnet {
        field: &'static str,
        address: String,
        ip: String,
        mask: String,
    },

    #[error("hostname '{0}' must be 1-64 characters of letters, digits, '-' or '_'")]
    InvalidHostname(String),
}

/// Errors loading settings.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("invalid value '{value}' for {key}")]
    Invalid { key: String, value: String },
}

/// Top-level error for discovery, configuration and BootP operations.
#[derive(Error, Debug)]
pub enum CommissionError {
    #[error("malformed packet: {0}")]
    MalformedPacket(#[from] DecodeError),

    #[error("{context}: {source}")]
    Transport {
        context: String,
        #[source]
        source: io::Error,
    },

    #[error("timed out during {operation}")]
    Timeout { operation: String },

    #[error("device returned CIP status: {0}")]
    ProtocolStatus(CipStatus),

    #[error("permission denied binding UDP port {port}; run with administrator/root privileges")]
    PrivilegeDenied { port: u16 },

    #[error("UDP port {port} is already in use by another BootP/DHCP server")]
    AddressInUse { port: u16 },

    #[error("invalid configuration: {0}")]
    Validation(#[from] ValidationError),

    #[error("a discovery scan is already in progress")]
    ScanInProgress,

    #[error("device {target} is already being configured")]
    ConfigurationInProgress { target: Ipv4Addr },

    #[error("server is already running")]
    AlreadyRunning,

    #[error("server is not running")]
    NotRunning,

    #[error("no pending BootP request with transaction id 0x{xid:08X} from {mac}")]
    UnknownRequest { xid: u32, mac: String },
}

impl From<ReplyError> for CommissionError {
    fn from(err: ReplyError) -> Self {
        match err {
            ReplyError::Malformed(e) => Self::MalformedPacket(e),
            ReplyError::Status(status) => Self::ProtocolStatus(status),
        }
    }
}

impl CommissionError {
    /// Wraps an I/O error with a short description of what was being attempted.
    pub fn transport(context: impl Into<String>, source: io::Error) -> Self {
        Self::Transport {
            context: context.into(),
            source,
        }
    }

    /// Creates a `Timeout` for the named operation.
    pub fn timeout(operation: impl Into<String>) -> Self {
        Self::Timeout {
            operation: operation.into(),
        }
    }
}
