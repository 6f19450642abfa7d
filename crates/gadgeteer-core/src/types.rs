//! Gadget invocation types and token accounting

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;

/// Token usage reported by a provider for one LLM call.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cached_input_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_creation_input_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning_tokens: Option<u64>,
}

impl Usage {
    pub fn add(&mut self, other: &Usage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
        self.total_tokens += other.total_tokens;
        if let Some(c) = other.cached_input_tokens {
            *self.cached_input_tokens.get_or_insert(0) += c;
        }
        if let Some(c) = other.cache_creation_input_tokens {
            *self.cache_creation_input_tokens.get_or_insert(0) += c;
        }
        if let Some(c) = other.reasoning_tokens {
            *self.reasoning_tokens.get_or_insert(0) += c;
        }
    }
}

/// A structured error produced while parsing a gadget block out of the
/// model's text stream. `position` is a byte offset into the block body.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ParseError {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<usize>,
}

impl ParseError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            position: None,
        }
    }

    pub fn at(message: impl Into<String>, position: usize) -> Self {
        Self {
            message: message.into(),
            position: Some(position),
        }
    }
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.position {
            Some(pos) => write!(f, "{} (at byte {})", self.message, pos),
            None => write!(f, "{}", self.message),
        }
    }
}

/// A gadget invocation parsed out of the model's output stream.
///
/// `invocation_id` is chosen by the model inside the start marker and is
/// echoed in the corresponding result so the model can correlate them.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GadgetCall {
    pub name: String,
    pub invocation_id: String,
    pub parameters: Value,
    pub raw_text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parse_error: Option<ParseError>,
}

impl GadgetCall {
    pub fn new(name: impl Into<String>, invocation_id: impl Into<String>, parameters: Value) -> Self {
        Self {
            name: name.into(),
            invocation_id: invocation_id.into(),
            parameters,
            raw_text: String::new(),
            parse_error: None,
        }
    }
}

/// Handle to a media payload persisted in the media store.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct MediaHandle {
    pub id: String,
    pub mime_type: String,
    pub size_bytes: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

/// Raw media bytes returned by a gadget, before persistence.
#[derive(Clone, Debug)]
pub struct MediaPayload {
    pub data: Vec<u8>,
    pub mime_type: String,
}

impl MediaPayload {
    pub fn new(data: Vec<u8>, mime_type: impl Into<String>) -> Self {
        Self {
            data,
            mime_type: mime_type.into(),
        }
    }
}

/// The outcome of one gadget execution, fed back into the conversation and
/// surfaced as a `gadget_result` stream event.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GadgetResult {
    pub invocation_id: String,
    pub gadget_name: String,
    pub parameters: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub execution_time_ms: u64,
    #[serde(default)]
    pub breaks_loop: bool,
    #[serde(default)]
    pub timed_out: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub media: Vec<MediaHandle>,
}

impl GadgetResult {
    pub fn success(
        invocation_id: impl Into<String>,
        gadget_name: impl Into<String>,
        parameters: Value,
        result: impl Into<String>,
    ) -> Self {
        Self {
            invocation_id: invocation_id.into(),
            gadget_name: gadget_name.into(),
            parameters,
            result: Some(result.into()),
            error: None,
            execution_time_ms: 0,
            breaks_loop: false,
            timed_out: false,
            media: Vec::new(),
        }
    }

    pub fn failure(
        invocation_id: impl Into<String>,
        gadget_name: impl Into<String>,
        parameters: Value,
        error: impl Into<String>,
    ) -> Self {
        Self {
            invocation_id: invocation_id.into(),
            gadget_name: gadget_name.into(),
            parameters,
            result: None,
            error: Some(error.into()),
            execution_time_ms: 0,
            breaks_loop: false,
            timed_out: false,
            media: Vec::new(),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// The text fed back to the model: result on success, error otherwise.
    pub fn body(&self) -> String {
        match (&self.result, &self.error) {
            (Some(r), _) => r.clone(),
            (None, Some(e)) => format!("Error: {}", e),
            (None, None) => String::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn usage_add_accumulates() {
        let mut a = Usage {
            input_tokens: 10,
            output_tokens: 5,
            total_tokens: 15,
            ..Default::default()
        };
        let b = Usage {
            input_tokens: 1,
            output_tokens: 2,
            total_tokens: 3,
            cached_input_tokens: Some(4),
            ..Default::default()
        };
        a.add(&b);
        assert_eq!(a.input_tokens, 11);
        assert_eq!(a.total_tokens, 18);
        assert_eq!(a.cached_input_tokens, Some(4));
    }

    #[test]
    fn result_body_prefers_result() {
        let ok = GadgetResult::success("1", "echo", json!({}), "out");
        assert_eq!(ok.body(), "out");
        let err = GadgetResult::failure("1", "echo", json!({}), "boom");
        assert_eq!(err.body(), "Error: boom");
        assert!(err.is_error());
    }

    #[test]
    fn parse_error_display_names_position() {
        let e = ParseError::at("expected value", 17);
        assert_eq!(e.to_string(), "expected value (at byte 17)");
    }
}
