use super::logging::{debug_payload_enabled, emit_debug_payload};
use crate::config::Config;
use crate::types::ChatRequest;
use crate::util::is_local_server_url;
use anyhow::{anyhow, Result};
use bytes::Bytes;
use futures::{Stream, StreamExt};
use serde::Deserialize;
use std::pin::Pin;
#[cfg(test)]
use std::sync::Arc;

pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

#[cfg(test)]
pub trait MockStreamProducer: Send + Sync {
    fn create_mock_stream(&self, request: &ChatRequest) -> Result<ByteStream>;
}

/// HTTP client for the pair-programming server: one streaming chat endpoint
/// and one synchronous console-command endpoint.
#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    server_url: String,
    #[cfg(test)]
    mock_stream_producer: Option<Arc<dyn MockStreamProducer>>,
}

#[derive(Debug, Deserialize)]
struct CommandResponse {
    result: String,
}

impl ApiClient {
    pub fn new(config: &Config) -> Result<Self> {
        Ok(Self {
            http: reqwest::Client::new(),
            server_url: config.server_url.clone(),
            #[cfg(test)]
            mock_stream_producer: None,
        })
    }

    #[cfg(test)]
    pub fn new_mock(producer: Arc<dyn MockStreamProducer>) -> Self {
        Self {
            http: reqwest::Client::new(),
            server_url: "http://127.0.0.1:5000".to_string(),
            mock_stream_producer: Some(producer),
        }
    }

    /// POST a chat request and expose the response body as a byte stream.
    pub async fn create_chat_stream(&self, request: &ChatRequest) -> Result<ByteStream> {
        #[cfg(test)]
        {
            if let Some(producer) = &self.mock_stream_producer {
                return producer.create_mock_stream(request);
            }
        }

        let request_url = endpoint_url(&self.server_url, "api/chat");
        if debug_payload_enabled() {
            emit_debug_payload(&request_url, &serde_json::to_value(request)?);
        }

        let response = self
            .http
            .post(&request_url)
            .header("content-type", "application/json")
            .json(request)
            .send()
            .await
            .map_err(|error| map_request_error(error, &request_url))?
            .error_for_status()
            .map_err(|error| map_request_error(error, &request_url))?;

        let request_url_for_stream = request_url.clone();
        let stream = response.bytes_stream().map(move |item| {
            item.map_err(|error| map_request_error(error, &request_url_for_stream))
        });
        Ok(Box::pin(stream))
    }

    /// Run a console slash command server-side and return its rendered output.
    pub async fn execute_command(&self, command: &str) -> Result<String> {
        let request_url = endpoint_url(&self.server_url, "api/execute_command");
        let response = self
            .http
            .post(&request_url)
            .json(&serde_json::json!({ "command": command }))
            .send()
            .await
            .map_err(|error| map_request_error(error, &request_url))?
            .error_for_status()
            .map_err(|error| map_request_error(error, &request_url))?;

        let body: CommandResponse = response
            .json()
            .await
            .map_err(|error| map_request_error(error, &request_url))?;
        Ok(body.result)
    }
}

fn endpoint_url(server_url: &str, path: &str) -> String {
    format!("{}/{}", server_url.trim_end_matches('/'), path)
}

fn map_request_error(error: reqwest::Error, request_url: &str) -> anyhow::Error {
    if error.is_connect() && is_local_server_url(request_url) {
        return anyhow!(
            "cannot reach local server '{}': {}. Start the pair-programming server or update TANDEM_SERVER_URL.",
            request_url,
            error
        );
    }
    if error.is_connect() {
        return anyhow!("cannot reach server '{}': {}", request_url, error);
    }
    if error.is_timeout() {
        return anyhow!("request to '{}' timed out: {}", request_url, error);
    }
    if let Some(status) = error.status() {
        return anyhow!(
            "server '{}' returned HTTP {}: {}",
            request_url,
            status,
            error
        );
    }
    anyhow!("request to '{}' failed: {}", request_url, error)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_url_handles_trailing_slash() {
        assert_eq!(
            endpoint_url("http://127.0.0.1:5000/", "api/chat"),
            "http://127.0.0.1:5000/api/chat"
        );
        assert_eq!(
            endpoint_url("http://127.0.0.1:5000", "api/execute_command"),
            "http://127.0.0.1:5000/api/execute_command"
        );
    }

    #[tokio::test]
    async fn test_mock_producer_intercepts_chat_stream() {
        use crate::api::mock_client::MockApiServer;

        let producer = Arc::new(MockApiServer::new(vec![vec![
            "data: {\"chunk\":\"hi\"}\n\n".to_string(),
        ]]));
        let client = ApiClient::new_mock(producer.clone());
        let request = ChatRequest {
            message: "hello".to_string(),
            selected_files: Vec::new(),
            model: None,
            command: "code".to_string(),
            selected_code: None,
            file: None,
        };

        let mut stream = client.create_chat_stream(&request).await.expect("stream");
        let chunk = stream
            .next()
            .await
            .expect("one chunk")
            .expect("chunk not an error");
        assert_eq!(&chunk[..], b"data: {\"chunk\":\"hi\"}\n\n");
        assert_eq!(producer.recorded_requests().len(), 1);
    }
}
