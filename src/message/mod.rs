//! Wire envelopes and the message construction pipeline

pub mod builder;
pub mod envelope;
pub mod types;

pub use builder::{MessageBuilder, MessageOptions, MetadataSelection, Transform};
pub use envelope::{Envelope, Payload};
