use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub messages: Vec<Message>,
}

/// Body of a failed chat response.
#[derive(Debug, Default, Deserialize)]
pub struct ErrorBody {
    #[serde(default)]
    pub error: Option<String>,
}

/// One decoded line of the reply stream.
///
/// Every field is optional and a single frame may carry several of them.
/// Fields that are missing, empty or not strings are treated as absent, so
/// `{}` and non-object JSON values decode to a frame that does nothing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Frame {
    pub delta: Option<String>,
    pub reply: Option<String>,
    pub error: Option<String>,
}

impl Frame {
    pub fn from_value(value: &Value) -> Self {
        let field = |name: &str| {
            value
                .get(name)
                .and_then(Value::as_str)
                .filter(|text| !text.is_empty())
                .map(str::to_string)
        };

        Self {
            delta: field("delta"),
            reply: field("reply"),
            error: field("error"),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.delta.is_none() && self.reply.is_none() && self.error.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn chat_request_serializes_roles_lowercase() {
        let request = ChatRequest {
            messages: vec![Message::user("hi"), Message::assistant("hello")],
        };

        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(
            value,
            json!({
                "messages": [
                    {"role": "user", "content": "hi"},
                    {"role": "assistant", "content": "hello"}
                ]
            })
        );
    }

    #[test]
    fn frame_reads_known_string_fields() {
        let frame = Frame::from_value(&json!({"delta": "a", "reply": "b", "done": true}));
        assert_eq!(frame.delta.as_deref(), Some("a"));
        assert_eq!(frame.reply.as_deref(), Some("b"));
        assert_eq!(frame.error, None);
    }

    #[test]
    fn frame_ignores_empty_and_non_string_fields() {
        let frame = Frame::from_value(&json!({"delta": "", "reply": 5, "error": null}));
        assert!(frame.is_empty());

        assert!(Frame::from_value(&json!({})).is_empty());
        assert!(Frame::from_value(&json!([1, 2])).is_empty());
        assert!(Frame::from_value(&json!("delta")).is_empty());
    }

    #[test]
    fn error_body_tolerates_missing_field() {
        let body: ErrorBody = serde_json::from_str(r#"{"detail": "nope"}"#).unwrap();
        assert_eq!(body.error, None);

        let body: ErrorBody = serde_json::from_str(r#"{"error": "bad input"}"#).unwrap();
        assert_eq!(body.error.as_deref(), Some("bad input"));
    }
}
