//! Backend response envelope: `{ success, code?, message?, data? }`

use serde_json::Value;

use super::error::ApiError;

/// A response body classified once at the boundary.
#[derive(Debug, Clone, PartialEq)]
pub enum Envelope {
    /// `success: true`; holds the unwrapped payload.
    Success(Value),
    /// `success: false`, whatever the HTTP status.
    Failure {
        code: Option<String>,
        message: Option<String>,
    },
    /// No boolean `success` field; the body is passed through untouched.
    Raw(Value),
}

impl Envelope {
    /// Classify a response body. Empty bodies become `null`, bodies that are
    /// not JSON are passed through as a string.
    pub fn parse(body: &str) -> Self {
        if body.trim().is_empty() {
            return Envelope::Raw(Value::Null);
        }
        match serde_json::from_str::<Value>(body) {
            Ok(value) => Self::from_value(value),
            Err(_) => Envelope::Raw(Value::String(body.to_string())),
        }
    }

    /// Payload precedence for `success: true` is `data`, then `result`, then
    /// the whole body.
    pub fn from_value(mut value: Value) -> Self {
        let success = value.get("success").and_then(Value::as_bool);
        match success {
            Some(true) => {
                let obj = value.as_object_mut();
                let payload = obj.and_then(|o| o.remove("data").or_else(|| o.remove("result")));
                match payload {
                    Some(payload) => Envelope::Success(payload),
                    None => Envelope::Success(value),
                }
            }
            Some(false) => Envelope::Failure {
                code: value.get("code").and_then(code_string),
                message: value
                    .get("message")
                    .and_then(Value::as_str)
                    .map(String::from),
            },
            None => Envelope::Raw(value),
        }
    }

    pub fn into_result(self) -> Result<Value, ApiError> {
        match self {
            Envelope::Success(payload) | Envelope::Raw(payload) => Ok(payload),
            Envelope::Failure { code, message } => Err(ApiError::Business {
                message: message.unwrap_or_else(|| match &code {
                    Some(code) => format!("Request failed ({})", code),
                    None => "Request failed".to_string(),
                }),
                code,
            }),
        }
    }
}

/// Codes arrive both as strings and as numbers.
fn code_string(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
