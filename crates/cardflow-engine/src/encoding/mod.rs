//! Parameter encoding: templates, TLV structures, AIDs and custom builders.

pub mod aid;
pub mod parameter;
pub mod template;
pub mod tlv;
pub mod value;

pub use aid::{AidBuilder, MAX_AID_LENGTH, MIN_AID_LENGTH};
pub use parameter::{EncodedParameters, ParameterEncoder};
pub use template::{FieldEncoder, FieldEncoderRegistry, TemplateProcessor};
pub use tlv::{TlvBuilder, TlvValue};
