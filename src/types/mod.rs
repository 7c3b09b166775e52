mod chat;
mod wire;

pub use chat::{ChatRequest, Message, Role};
pub use wire::{RawFrame, StreamEvent, UsagePayload};
