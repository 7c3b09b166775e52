use crate::api::client::{ByteStream, MockStreamProducer};
use crate::types::ChatRequest;
use anyhow::Result;
use bytes::Bytes;
use futures::stream;
use std::sync::{Arc, Mutex};

/// Replays scripted response transcripts, one per expected request. Chunks
/// are replayed verbatim so tests control frame boundaries exactly.
#[derive(Clone)]
pub struct MockApiServer {
    responses: Arc<Mutex<Vec<Vec<String>>>>,
    requests: Arc<Mutex<Vec<ChatRequest>>>,
}

impl MockApiServer {
    pub fn new(responses: Vec<Vec<String>>) -> Self {
        Self {
            responses: Arc::new(Mutex::new(responses)),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn recorded_requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().unwrap().clone()
    }
}

impl MockStreamProducer for MockApiServer {
    fn create_mock_stream(&self, request: &ChatRequest) -> Result<ByteStream> {
        self.requests.lock().unwrap().push(request.clone());

        let mut responses = self.responses.lock().unwrap();
        if responses.is_empty() {
            return Err(anyhow::anyhow!("MockApiServer: no more responses configured"));
        }
        let chunks = responses.remove(0);

        let byte_chunks: Vec<Result<Bytes>> =
            chunks.into_iter().map(|chunk| Ok(Bytes::from(chunk))).collect();
        Ok(Box::pin(stream::iter(byte_chunks)))
    }
}
