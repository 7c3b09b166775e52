pub mod client;
pub mod decoder;
pub mod logging;
#[cfg(test)]
pub mod mock_client;

pub use client::{ApiClient, ByteStream};
pub use decoder::{decode_stream, FrameDecoder};
