use crate::protocol::ChatRequest;
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::{StreamExt, TryStreamExt};
use reqwest::header::ACCEPT;
use reqwest::{Client as HttpClient, StatusCode};
use thiserror::Error;

pub type ByteStream = BoxStream<'static, Result<Bytes, TransportError>>;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error("{0}")]
    Other(String),
}

pub struct ChatResponse {
    pub status: StatusCode,
    /// `None` when the transport cannot hand out the body incrementally.
    pub body: Option<ByteStream>,
}

impl std::fmt::Debug for ChatResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatResponse")
            .field("status", &self.status)
            .field("streaming", &self.body.is_some())
            .finish()
    }
}

/// Sends a conversation to the chat endpoint.
///
/// Implementations return as soon as the response head is available; the
/// body is consumed by the caller.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    async fn post_chat(&self, request: &ChatRequest) -> Result<ChatResponse, TransportError>;
}

#[derive(Clone)]
pub struct HttpTransport {
    endpoint: String,
    http: HttpClient,
}

impl HttpTransport {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            http: HttpClient::new(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl ChatTransport for HttpTransport {
    async fn post_chat(&self, request: &ChatRequest) -> Result<ChatResponse, TransportError> {
        tracing::debug!(
            endpoint = %self.endpoint,
            messages = request.messages.len(),
            "posting conversation"
        );

        let response = self
            .http
            .post(&self.endpoint)
            .header(ACCEPT, "application/x-ndjson")
            .json(request)
            .send()
            .await?;

        let status = response.status();
        let body = response.bytes_stream().map_err(TransportError::from).boxed();

        Ok(ChatResponse {
            status,
            body: Some(body),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::{ChatError, Reconciler};
    use crate::protocol::Message;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn collect_body(response: ChatResponse) -> String {
        let mut body = response.body.expect("streaming body");
        let mut bytes = Vec::new();
        while let Some(chunk) = body.next().await {
            bytes.extend_from_slice(&chunk.unwrap());
        }
        String::from_utf8(bytes).unwrap()
    }

    #[tokio::test]
    async fn posts_full_conversation_as_json() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .and(header("accept", "application/x-ndjson"))
            .and(body_json(serde_json::json!({
                "messages": [
                    {"role": "user", "content": "hi"},
                    {"role": "assistant", "content": "hello"},
                    {"role": "user", "content": "again"}
                ]
            })))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_raw("{\"delta\":\"ok\"}\n", "application/x-ndjson"),
            )
            .expect(1)
            .mount(&server)
            .await;

        let transport = HttpTransport::new(format!("{}/api/chat", server.uri()));
        let request = ChatRequest {
            messages: vec![
                Message::user("hi"),
                Message::assistant("hello"),
                Message::user("again"),
            ],
        };

        let response = transport.post_chat(&request).await.unwrap();
        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(collect_body(response).await, "{\"delta\":\"ok\"}\n");
    }

    #[tokio::test]
    async fn failure_status_is_returned_with_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .respond_with(
                ResponseTemplate::new(400)
                    .set_body_json(serde_json::json!({"error": "No valid message provided."})),
            )
            .mount(&server)
            .await;

        let transport = HttpTransport::new(format!("{}/api/chat", server.uri()));
        let request = ChatRequest {
            messages: vec![Message::user("hi")],
        };

        let response = transport.post_chat(&request).await.unwrap();
        assert_eq!(response.status, StatusCode::BAD_REQUEST);
        assert!(collect_body(response).await.contains("No valid message provided."));
    }

    #[tokio::test]
    async fn invalid_endpoint_is_a_transport_error() {
        let transport = HttpTransport::new("not a url");
        let request = ChatRequest {
            messages: vec![Message::user("hi")],
        };

        let result = transport.post_chat(&request).await;
        assert!(matches!(result, Err(TransportError::Http(_))));
    }

    #[derive(Default)]
    struct Transcript {
        failures: Vec<String>,
        committed: Vec<String>,
    }

    impl crate::conversation::ChatView for Transcript {
        fn user_message(&mut self, _content: &str) {}
        fn assistant_started(&mut self) {}
        fn assistant_text(&mut self, _text: &str) {}
        fn assistant_committed(&mut self, content: &str) {
            self.committed.push(content.to_string());
        }
        fn assistant_failed(&mut self, message: &str) {
            self.failures.push(message.to_string());
        }
        fn set_busy(&mut self, _busy: bool) {}
    }

    #[tokio::test]
    async fn reconciler_streams_reply_over_http() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(
                "{\"delta\":\"Hel\"}\n{\"delta\":\"lo\"}\n{\"reply\":\"Hello\",\"done\":true}\n",
                "application/x-ndjson",
            ))
            .mount(&server)
            .await;

        let reconciler = Reconciler::new(HttpTransport::new(format!("{}/api/chat", server.uri())));
        let mut view = Transcript::default();

        let reply = reconciler.submit("hi", &mut view).await;

        assert_eq!(reply, Ok("Hello".to_string()));
        assert_eq!(view.committed, vec!["Hello"]);
        assert_eq!(
            reconciler.messages(),
            vec![Message::user("hi"), Message::assistant("Hello")]
        );
    }

    #[tokio::test]
    async fn reconciler_reports_server_error_payload_over_http() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .respond_with(ResponseTemplate::new(500).set_body_json(serde_json::json!({
                "error": "Upstream model unavailable."
            })))
            .mount(&server)
            .await;

        let reconciler = Reconciler::new(HttpTransport::new(format!("{}/api/chat", server.uri())));
        let mut view = Transcript::default();

        let reply = reconciler.submit("hi", &mut view).await;

        assert_eq!(
            reply,
            Err(ChatError::Transport("Upstream model unavailable.".into()))
        );
        assert_eq!(view.failures, vec!["Upstream model unavailable."]);
        assert!(reconciler.messages().is_empty());
    }
}
