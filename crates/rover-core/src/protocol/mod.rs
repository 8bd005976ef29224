//! Protocol module containing the wire types, the JSON codec, and sequence arithmetic.

pub mod codec;
pub mod messages;
pub mod sequence;

pub use codec::{decode_inbound, encode_control, ProtocolError};
pub use messages::*;
pub use sequence::{seq_ahead, OutboundSequence, SEQ_MODULUS};
