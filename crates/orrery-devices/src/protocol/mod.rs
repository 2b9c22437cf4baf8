/*!
 * INDI protocol support: the message model, number parsing and the XML codec.
 */

pub mod codec;
pub mod message;
pub mod number;

pub use codec::{decode_frame, encode, encode_to_string, IndiReader, XmlNode};
pub use message::{
    BlobElement, BlobPolicy, DelProperty, Elements, EnableBlob, GetProperties, IndiMessage,
    LightElement, Message, NumberElement, PropertyPermission, PropertyState, SwitchElement,
    SwitchRule, TextElement, Vector, VectorKind, VectorOp, PROTOCOL_VERSION,
};
pub use number::parse_number;
