//! Request and reply shapes exchanged with callers of the backend client.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Warning attached to extraction results whose text was not valid JSON.
pub const UNPARSED_WARNING: &str = "Could not parse structured data from LLM response";

/// Reply of a completed generation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerateReply {
    pub model: String,
    pub response: String,
}

/// A chat reply has the same shape as a generation reply.
pub type ChatReply = GenerateReply;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
    Tool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

/// Result of a text extraction call.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum OcrOutcome {
    /// The model answered with parseable JSON.
    Structured {
        file_processed: String,
        model: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        original_text: Option<Value>,
    },
    /// The model's answer could not be parsed; it is passed through as-is.
    Raw {
        warning: String,
        raw_response: String,
        file_processed: String,
        model: String,
    },
}

impl OcrOutcome {
    /// Interprets the model's answer to the extraction prompt.
    ///
    /// The JSON object is taken from the first `{` to the last `}` so that
    /// chatter around it is ignored.
    pub fn from_response(response: &str, file_processed: &str, model: &str) -> Self {
        let parsed = match (response.find('{'), response.rfind('}')) {
            (Some(start), Some(end)) if end > start => {
                serde_json::from_str::<serde_json::Map<String, Value>>(&response[start..=end]).ok()
            }
            _ => None,
        };

        match parsed {
            Some(object) => OcrOutcome::Structured {
                file_processed: file_processed.to_string(),
                model: model.to_string(),
                original_text: object.get("original_text").cloned(),
            },
            None => OcrOutcome::Raw {
                warning: UNPARSED_WARNING.to_string(),
                raw_response: response.to_string(),
                file_processed: file_processed.to_string(),
                model: model.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_generate_reply_shape() {
        let reply = GenerateReply {
            model: "llama3".into(),
            response: "hello".into(),
        };
        assert_eq!(
            serde_json::to_value(&reply).unwrap(),
            json!({"model": "llama3", "response": "hello"})
        );
    }

    #[test]
    fn test_ocr_json_sliced_out_of_chatter() {
        let outcome = OcrOutcome::from_response(
            "Sure! Here it is:\n```json\n{\"original_text\": \"Invoice #42\"}\n```",
            "abc.png",
            "llava:7b",
        );
        assert_eq!(
            serde_json::to_value(&outcome).unwrap(),
            json!({"file_processed": "abc.png", "model": "llava:7b", "original_text": "Invoice #42"})
        );
    }

    #[test]
    fn test_ocr_object_without_text_field() {
        let outcome = OcrOutcome::from_response("{\"text\": \"x\"}", "a.jpg", "m");
        assert_eq!(
            serde_json::to_value(&outcome).unwrap(),
            json!({"file_processed": "a.jpg", "model": "m"})
        );
    }

    #[test]
    fn test_ocr_unparseable_falls_back_to_raw() {
        for response in ["no json here", "} backwards {", "{not: valid}", "[1, 2]"] {
            let outcome = OcrOutcome::from_response(response, "a.png", "m");
            match outcome {
                OcrOutcome::Raw { warning, raw_response, .. } => {
                    assert_eq!(warning, UNPARSED_WARNING);
                    assert_eq!(raw_response, response);
                }
                other => panic!("expected raw outcome for {:?}, got {:?}", response, other),
            }
        }
    }

    #[test]
    fn test_chat_roles_lowercase() {
        let msg: ChatMessage =
            serde_json::from_value(json!({"role": "assistant", "content": "hi"})).unwrap();
        assert_eq!(msg.role, ChatRole::Assistant);
        assert_eq!(serde_json::to_value(ChatRole::Tool).unwrap(), json!("tool"));
    }
}
