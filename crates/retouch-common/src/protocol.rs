use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Bounding box of a browser selection, as reported by the in-page selection script.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Area {
    #[serde(default)]
    pub x: f64,
    #[serde(default)]
    pub y: f64,
    #[serde(default)]
    pub width: f64,
    #[serde(default)]
    pub height: f64,
    #[serde(default)]
    pub element_count: usize,
}

/// One selected DOM element. Every field is already normalized by the page script.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElementDescriptor {
    #[serde(default)]
    pub tag_name: String,
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub classes: String,
    #[serde(default)]
    pub selector: String,
    #[serde(default)]
    pub inner_text: String,
    #[serde(rename = "outerHTML", default)]
    pub outer_html: String,
}

/// Inbound message (browser -> bridge): one user instruction over a selection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SelectionMessage {
    #[serde(default)]
    pub id: u64,
    #[serde(default)]
    pub area: Area,
    #[serde(default)]
    pub elements: Vec<ElementDescriptor>,
    pub instruction: String,
    /// Base64 PNG, optionally prefixed with a `data:` URL header.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screenshot: Option<String>,
}

impl SelectionMessage {
    pub fn new(instruction: impl Into<String>, area: Area, elements: Vec<ElementDescriptor>) -> Self {
        Self {
            id: 0,
            area,
            elements,
            instruction: instruction.into(),
            screenshot: None,
        }
    }

    /// Decodes the attached screenshot, if any.
    pub fn screenshot_bytes(&self) -> Option<Result<Vec<u8>, base64::DecodeError>> {
        let raw = self.screenshot.as_deref()?.trim();
        if raw.is_empty() {
            return None;
        }
        let payload = match raw.split_once(";base64,") {
            Some((_, data)) => data,
            None => raw,
        };
        Some(base64::engine::general_purpose::STANDARD.decode(payload))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStatus {
    Pending,
    Complete,
    Error,
}

impl ResponseStatus {
    /// `complete` and `error` end a request's pending window.
    pub fn is_terminal(self) -> bool {
        matches!(self, ResponseStatus::Complete | ResponseStatus::Error)
    }
}

/// Pipeline stage an error envelope is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Transport,
    Format,
    Agent,
    Checkpoint,
}

/// Outbound message (bridge -> browser). `id` echoes the inbound request id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    pub id: u64,
    pub status: ResponseStatus,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl ResponseEnvelope {
    pub fn pending(id: u64) -> Self {
        Self {
            id,
            status: ResponseStatus::Pending,
            fields: Map::new(),
        }
    }

    pub fn complete(id: u64, message: impl Into<String>) -> Self {
        let mut fields = Map::new();
        fields.insert("message".into(), Value::String(message.into()));
        Self {
            id,
            status: ResponseStatus::Complete,
            fields,
        }
    }

    pub fn error(id: u64, stage: Stage, code: &str, message: impl Into<String>) -> Self {
        let mut fields = Map::new();
        fields.insert("code".into(), Value::String(code.to_string()));
        // Stage serializes to a plain string, so this cannot fail.
        fields.insert(
            "stage".into(),
            serde_json::to_value(stage).unwrap_or(Value::Null),
        );
        fields.insert("message".into(), Value::String(message.into()));
        Self {
            id,
            status: ResponseStatus::Error,
            fields,
        }
    }

    pub fn message(&self) -> Option<&str> {
        self.fields.get("message").and_then(Value::as_str)
    }

    pub fn code(&self) -> Option<&str> {
        self.fields.get("code").and_then(Value::as_str)
    }

    pub fn stage(&self) -> Option<Stage> {
        self.fields
            .get("stage")
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }
}
