//! Codec module - conversion between records and plain mappings.
//!
//! This module provides:
//!
//! - [`MessageCodec`] - record → mapping (`decode`) and mapping-or-record →
//!   record (`encode`)
//! - [`RequestIter`] / [`RequestStream`] - lazy decoding of input sequences
//! - [`ReplyIter`] / [`ReplyStream`] - lazy encoding of output sequences
//! - [`reply_channel`] - push-style producer for async output sequences
//!
//! # Design
//!
//! Records are `prost_reflect::DynamicMessage` values described by the
//! contract; mappings are `serde_json` objects. The codec never mutates the
//! record it decodes, and a returned record of the expected type is passed
//! through without re-encoding.

mod channel;
mod message;
mod stream;

pub use channel::{reply_channel, ReplyReceiver, ReplySender, DEFAULT_REPLY_CAPACITY};
pub use message::{Decoded, Mapping, MessageCodec, Reply};
pub use stream::{RecordIter, RecordStream, ReplyIter, ReplyStream, RequestIter, RequestStream};
