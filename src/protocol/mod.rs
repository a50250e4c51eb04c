//! Wire protocol spoken with the transcription service
//!
//! - `messages`: outbound and inbound message shapes
//! - `codec`: frame <-> message translation

pub mod codec;
pub mod messages;

pub use codec::{AudioEncoding, Frame, MessageCodec};
pub use messages::{
    AudioChunkMessage, Concept, ErrorOrigin, Explanation, FlagRequest, InboundEvent, InitMessage,
    Outbound,
};
