/*!
 * Error types for device transports, the INDI codec and the Alpaca bridge.
 */
use thiserror::Error;

use orrery_core::error::Error as CoreError;

/// A frame that could not be decoded or encoded
///
/// Decoding errors never tear down a connection; the offending frame is
/// skipped and logged.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProtocolError {
    /// Malformed XML
    #[error("XML error: {0}")]
    Xml(String),

    /// A top-level tag that is not part of the protocol
    #[error("Unknown tag <{0}>")]
    UnknownTag(String),

    /// A child tag that does not belong to the enclosing vector
    #[error("Element <{element}> is not valid inside <{vector}>")]
    UnexpectedElement {
        /// Tag of the enclosing vector
        vector: String,
        /// Offending child tag
        element: String,
    },

    /// Two elements with the same name inside one vector
    #[error("Duplicate element {element} in vector {vector}")]
    DuplicateElement {
        /// Vector name
        vector: String,
        /// Element name
        element: String,
    },

    /// An update referencing an element the vector never declared
    #[error("Element {element} is not defined by vector {vector}")]
    UnknownElement {
        /// Vector name
        vector: String,
        /// Element name
        element: String,
    },

    /// An update whose element kind differs from the declared vector
    #[error("Vector {0} changed kind")]
    KindMismatch(String),

    /// An invalid enumerated literal (state, permission, rule, switch value)
    #[error("Invalid {kind} literal: {value:?}")]
    InvalidLiteral {
        /// Which enumeration was being parsed
        kind: &'static str,
        /// The rejected text
        value: String,
    },

    /// A required attribute was absent
    #[error("Missing attribute {attribute} on <{tag}>")]
    MissingAttribute {
        /// Tag name
        tag: String,
        /// Attribute name
        attribute: &'static str,
    },

    /// Text that is neither decimal nor sexagesimal
    #[error("Invalid number: {0:?}")]
    InvalidNumber(String),

    /// BLOB payload that is not valid base64
    #[error("Invalid BLOB payload: {0}")]
    InvalidBlob(String),

    /// Serialization failure
    #[error("Encode error: {0}")]
    Encode(String),
}

impl ProtocolError {
    /// Create a new invalid literal error
    pub fn invalid_literal<S: AsRef<str>>(kind: &'static str, value: S) -> Self {
        ProtocolError::InvalidLiteral {
            kind,
            value: value.as_ref().to_string(),
        }
    }

    /// Create a new missing attribute error
    pub fn missing_attribute<S: AsRef<str>>(tag: S, attribute: &'static str) -> Self {
        ProtocolError::MissingAttribute {
            tag: tag.as_ref().to_string(),
            attribute,
        }
    }
}

/// Error type for device operations
#[derive(Error, Debug)]
pub enum DeviceError {
    /// I/O error on a transport
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Operation timed out
    #[error("Timeout error: {0}")]
    Timeout(String),

    /// The connection has been closed
    #[error("Connection closed")]
    ConnectionClosed,

    /// Protocol error
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// HTTP transport error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// An Alpaca server answered with a non-zero ErrorNumber
    #[error("Remote error {code}: {message}")]
    Remote {
        /// Alpaca ErrorNumber
        code: i32,
        /// Alpaca ErrorMessage
        message: String,
    },

    /// A response that could not be interpreted
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Other error
    #[error("Other error: {0}")]
    Other(String),

    /// Core error
    #[error("Core error: {0}")]
    Core(#[from] CoreError),
}

/// Result type for device operations
pub type Result<T> = std::result::Result<T, DeviceError>;

impl DeviceError {
    /// Create a new timeout error
    pub fn timeout<S: AsRef<str>>(msg: S) -> Self {
        DeviceError::Timeout(msg.as_ref().to_string())
    }

    /// Create a new invalid response error
    pub fn invalid_response<S: AsRef<str>>(msg: S) -> Self {
        DeviceError::InvalidResponse(msg.as_ref().to_string())
    }

    /// Create a new other error
    pub fn other<S: AsRef<str>>(msg: S) -> Self {
        DeviceError::Other(msg.as_ref().to_string())
    }

    /// Whether the error means the transport itself failed
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            DeviceError::Io(_)
                | DeviceError::Http(_)
                | DeviceError::Timeout(_)
                | DeviceError::ConnectionClosed
                | DeviceError::Core(CoreError::Timeout(_))
        )
    }
}
