use serde::de::{DeserializeOwned, Deserializer, Error as _};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub const ROLE_USER: &str = "user";
pub const ROLE_ASSISTANT: &str = "assistant";
pub const ROLE_SYSTEM: &str = "system";

/// Fields the client never reads: a null or wrong-typed value becomes the default.
fn lenient<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned + Default,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(T::deserialize(value).unwrap_or_default())
}

/// Only the first choice is consumed, so only it has to be well formed.
/// Later choices that do not decode are dropped.
fn first_choice_strict<'de, D>(deserializer: D) -> std::result::Result<Vec<Choice>, D::Error>
where
    D: Deserializer<'de>,
{
    let mut raw = Vec::<serde_json::Value>::deserialize(deserializer)?.into_iter();
    let Some(first) = raw.next() else {
        return Ok(Vec::new());
    };
    let first = Choice::deserialize(first).map_err(D::Error::custom)?;

    Ok(std::iter::once(first)
        .chain(raw.filter_map(|choice| Choice::deserialize(choice).ok()))
        .collect())
}

/// One conversational turn. The role is passed through to the API as-is.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ChatMessage {
    #[serde(default, deserialize_with = "lenient")]
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(ROLE_USER, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(ROLE_ASSISTANT, content)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(ROLE_SYSTEM, content)
    }
}

#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

impl ChatRequest {
    pub fn new(model: impl Into<String>, messages: Vec<ChatMessage>) -> Self {
        Self {
            model: model.into(),
            messages,
            temperature: None,
            max_tokens: None,
        }
    }

    /// JSON body for the wire, messages in order.
    pub fn encode(&self) -> Result<Vec<u8>> {
        if let Some(temperature) = self.temperature.filter(|t| !t.is_finite()) {
            return Err(Error::InvalidRequest(format!(
                "temperature must be finite, got {temperature}"
            )));
        }
        Ok(serde_json::to_vec(self)?)
    }
}

#[derive(Debug, Deserialize, Clone, Default, PartialEq)]
pub struct Usage {
    #[serde(default, deserialize_with = "lenient")]
    pub prompt_tokens: u32,
    #[serde(default, deserialize_with = "lenient")]
    pub completion_tokens: u32,
    #[serde(default, deserialize_with = "lenient")]
    pub total_tokens: u32,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct Choice {
    #[serde(default, deserialize_with = "lenient")]
    pub index: u32,
    pub message: ChatMessage,
    #[serde(default, deserialize_with = "lenient")]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Deserialize, Clone, Default, PartialEq)]
pub struct ChatResponse {
    #[serde(default, deserialize_with = "lenient")]
    pub id: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub model: Option<String>,
    #[serde(default, deserialize_with = "first_choice_strict")]
    pub choices: Vec<Choice>,
    #[serde(default, deserialize_with = "lenient")]
    pub usage: Option<Usage>,
}

impl ChatResponse {
    pub fn first_content(&self) -> Option<&str> {
        self.choices.first().map(|choice| choice.message.content.as_str())
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct ApiErrorDetail {
    pub message: String,
    #[serde(rename = "type", default, deserialize_with = "lenient")]
    pub kind: Option<String>,
    /// String or number depending on the failure, kept raw.
    #[serde(default)]
    pub code: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct ApiErrorEnvelope {
    pub error: ApiErrorDetail,
}

#[derive(Debug, thiserror::Error)]
#[error("malformed response body: {0}")]
pub struct DecodeError(#[from] pub serde_json::Error);

/// A decoded response body: either a completion or the API's error envelope.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Completion(ChatResponse),
    Failure(ApiErrorEnvelope),
}

impl Payload {
    /// The error envelope wins over `choices` whenever `error.message` is present.
    pub fn decode(body: &[u8]) -> std::result::Result<Self, DecodeError> {
        if let Ok(envelope) = serde_json::from_slice::<ApiErrorEnvelope>(body) {
            return Ok(Payload::Failure(envelope));
        }
        let response = serde_json::from_slice::<ChatResponse>(body)?;
        Ok(Payload::Completion(response))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    #[test]
    fn request_omits_unset_sampling_fields() {
        let request = ChatRequest::new("deepseek-chat", vec![ChatMessage::user("hi")]);
        let value: Value = serde_json::from_slice(&request.encode().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({
                "model": "deepseek-chat",
                "messages": [{ "role": "user", "content": "hi" }]
            })
        );
    }

    #[test]
    fn request_keeps_message_order_and_sampling_fields() {
        let mut request = ChatRequest::new(
            "deepseek-chat",
            vec![
                ChatMessage::system("be brief"),
                ChatMessage::user("one"),
                ChatMessage::assistant("two"),
                ChatMessage::new("narrator", "three"),
            ],
        );
        request.temperature = Some(0.5);
        request.max_tokens = Some(1000);

        let value: Value = serde_json::from_slice(&request.encode().unwrap()).unwrap();
        let roles: Vec<&str> = value["messages"]
            .as_array()
            .unwrap()
            .iter()
            .map(|m| m["role"].as_str().unwrap())
            .collect();
        assert_eq!(roles, ["system", "user", "assistant", "narrator"]);
        assert_eq!(value["temperature"], json!(0.5));
        assert_eq!(value["max_tokens"], json!(1000));
    }

    #[test]
    fn prompt_text_survives_encoding() {
        let prompt = "quotes \" backslash \\ newline \n emoji 😀🤖 accents éü 漢字";
        let request = ChatRequest::new("m", vec![ChatMessage::user(prompt)]);
        let value: Value = serde_json::from_slice(&request.encode().unwrap()).unwrap();
        assert_eq!(value["messages"][0]["content"], json!(prompt));
    }

    #[test]
    fn decodes_minimal_success_body() {
        let body = br#"{"choices":[{"message":{"content":"Hello, this is a test response"}}]}"#;
        match Payload::decode(body).unwrap() {
            Payload::Completion(response) => {
                assert_eq!(response.first_content(), Some("Hello, this is a test response"));
                assert_eq!(response.choices[0].message.role, "");
            }
            other => panic!("expected completion, got {other:?}"),
        }
    }

    #[test]
    fn ignores_unknown_fields() {
        let body = json!({
            "id": "chatcmpl-1",
            "object": "chat.completion",
            "created": 1738000000,
            "model": "deepseek-chat",
            "system_fingerprint": "fp_1",
            "choices": [{
                "index": 0,
                "message": { "role": "assistant", "content": "ok", "reasoning_content": null },
                "logprobs": null,
                "finish_reason": "stop"
            }],
            "usage": { "prompt_tokens": 3, "completion_tokens": 1, "total_tokens": 4, "extra": 9 }
        });
        let Payload::Completion(response) = Payload::decode(body.to_string().as_bytes()).unwrap()
        else {
            panic!("expected completion");
        };
        assert_eq!(response.id.as_deref(), Some("chatcmpl-1"));
        assert_eq!(response.first_content(), Some("ok"));
        assert_eq!(response.choices[0].finish_reason.as_deref(), Some("stop"));
        assert_eq!(response.usage.unwrap().total_tokens, 4);
    }

    fn only_content(body: &str) -> Option<String> {
        match Payload::decode(body.as_bytes()) {
            Ok(Payload::Completion(response)) => response.first_content().map(str::to_owned),
            other => panic!("expected completion for {body}, got {other:?}"),
        }
    }

    #[test]
    fn null_or_mistyped_ignored_fields_are_tolerated() {
        let bodies = [
            r#"{"choices":[{"index":null,"message":{"content":"hi"}}]}"#,
            r#"{"id":123,"model":["x"],"choices":[{"message":{"content":"hi"}}]}"#,
            r#"{"choices":[{"message":{"role":null,"content":"hi"}}]}"#,
            r#"{"choices":[{"message":{"role":7,"content":"hi"},"finish_reason":false}]}"#,
            r#"{"choices":[{"message":{"content":"hi"}}],"usage":"n/a"}"#,
            r#"{"choices":[{"message":{"content":"hi"}}],"usage":{"total_tokens":"4"}}"#,
        ];
        for body in bodies {
            assert_eq!(only_content(body).as_deref(), Some("hi"), "{body}");
        }
    }

    #[test]
    fn malformed_later_choices_are_dropped() {
        let body = r#"{"choices":[{"message":{"content":"hi"}},{"message":{"content":null}},{"index":2,"message":{"content":"third"}}]}"#;
        let Payload::Completion(response) = Payload::decode(body.as_bytes()).unwrap() else {
            panic!("expected completion");
        };
        assert_eq!(response.first_content(), Some("hi"));
        let rest: Vec<&str> = response.choices[1..]
            .iter()
            .map(|c| c.message.content.as_str())
            .collect();
        assert_eq!(rest, ["third"]);
    }

    #[test]
    fn non_finite_temperature_is_rejected() {
        for temperature in [f32::NAN, f32::INFINITY, f32::NEG_INFINITY] {
            let mut request = ChatRequest::new("m", vec![ChatMessage::user("hi")]);
            request.temperature = Some(temperature);
            assert!(matches!(request.encode(), Err(Error::InvalidRequest(_))));
        }
    }

    #[test]
    fn envelope_with_odd_type_field_is_still_an_error() {
        let body = br#"{"error":{"message":"Invalid API key","type":404}}"#;
        let Payload::Failure(envelope) = Payload::decode(body).unwrap() else {
            panic!("expected failure");
        };
        assert_eq!(envelope.error.message, "Invalid API key");
        assert_eq!(envelope.error.kind, None);
    }

    #[test]
    fn error_envelope_takes_priority() {
        let body = br#"{"error":{"message":"Invalid API key","type":"authentication_error","code":401},"choices":[]}"#;
        let Payload::Failure(envelope) = Payload::decode(body).unwrap() else {
            panic!("expected failure");
        };
        assert_eq!(envelope.error.message, "Invalid API key");
        assert_eq!(envelope.error.kind.as_deref(), Some("authentication_error"));
        assert_eq!(envelope.error.code, Some(json!(401)));
    }

    #[test]
    fn missing_or_empty_choices_decode_without_content() {
        let bodies: [&[u8]; 2] = [br#"{"choices":[]}"#, br#"{"object":"chat.completion"}"#];
        for body in bodies {
            let Payload::Completion(response) = Payload::decode(body).unwrap() else {
                panic!("expected completion");
            };
            assert_eq!(response.first_content(), None);
        }
    }

    #[test]
    fn structural_mismatch_is_a_decode_error() {
        let bodies: [&[u8]; 4] = [
            br#"{"choices":[{"message":{"role":"assistant"}}]}"#,
            br#"{"choices":[{"message":{"content":42}}]}"#,
            br#"{"choices":"nope"}"#,
            b"<html>bad gateway</html>",
        ];
        for body in bodies {
            assert!(Payload::decode(body).is_err(), "{}", String::from_utf8_lossy(body));
        }
    }
}
