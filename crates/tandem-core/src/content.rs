//! Model-facing content types
//!
//! Mirrors the Gemini `Content`/`Part` wire shape so the same values flow
//! through sessions, the runner and the provider without translation.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Who produced a piece of content
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Model,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::User => write!(f, "user"),
            Self::Model => write!(f, "model"),
        }
    }
}

/// A file referenced by URI
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileData {
    pub file_uri: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

/// Inline bytes, base64 encoded as they travel on the wire
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Blob {
    pub data: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

/// A tool invocation requested by the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub args: Value,
}

/// The result of a tool invocation, fed back to the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    pub response: Value,
}

/// One part of a content block. At most one field is expected to be set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_data: Option<FileData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inline_data: Option<Blob>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function_call: Option<FunctionCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function_response: Option<FunctionResponse>,
}

impl Part {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Default::default()
        }
    }

    pub fn file_uri(uri: impl Into<String>, mime_type: Option<String>) -> Self {
        Self {
            file_data: Some(FileData {
                file_uri: uri.into(),
                mime_type,
            }),
            ..Default::default()
        }
    }

    pub fn inline(data: impl Into<String>, mime_type: Option<String>) -> Self {
        Self {
            inline_data: Some(Blob {
                data: data.into(),
                mime_type,
            }),
            ..Default::default()
        }
    }

    pub fn function_call(name: impl Into<String>, args: Value) -> Self {
        Self {
            function_call: Some(FunctionCall {
                id: None,
                name: name.into(),
                args,
            }),
            ..Default::default()
        }
    }

    pub fn function_response(id: Option<String>, name: impl Into<String>, response: Value) -> Self {
        Self {
            function_response: Some(FunctionResponse {
                id,
                name: name.into(),
                response,
            }),
            ..Default::default()
        }
    }

    /// Whether this part carries user-visible payload: non-empty text, a
    /// file reference or inline data
    pub fn has_payload(&self) -> bool {
        self.text.as_deref().is_some_and(|t| !t.is_empty()) || self.file_data.is_some() || self.inline_data.is_some()
    }
}

/// A block of parts attributed to one role
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
    #[serde(default)]
    pub parts: Vec<Part>,
}

impl Content {
    pub fn user(parts: Vec<Part>) -> Self {
        Self {
            role: Some(Role::User),
            parts,
        }
    }

    pub fn model(parts: Vec<Part>) -> Self {
        Self {
            role: Some(Role::Model),
            parts,
        }
    }

    /// Function calls requested in this content, in order
    pub fn function_calls(&self) -> Vec<&FunctionCall> {
        self.parts
            .iter()
            .filter_map(|p| p.function_call.as_ref())
            .collect()
    }

    pub fn has_function_calls(&self) -> bool {
        self.parts.iter().any(|p| p.function_call.is_some())
    }

    /// Concatenated text of all text parts
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|p| p.text.as_deref())
            .collect::<Vec<_>>()
            .join("")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_part_serializes_camel_case() {
        let part = Part::file_uri("gs://bucket/a.pdf", Some("application/pdf".to_string()));
        let json = serde_json::to_value(&part).unwrap();
        assert_eq!(json["fileData"]["fileUri"], "gs://bucket/a.pdf");
        assert_eq!(json["fileData"]["mimeType"], "application/pdf");
        assert!(json.get("text").is_none());
    }

    #[test]
    fn test_part_deserializes_gemini_function_call() {
        let json = r#"{"functionCall":{"name":"list_calendar_events","args":{"limit":10}}}"#;
        let part: Part = serde_json::from_str(json).unwrap();
        let call = part.function_call.unwrap();
        assert_eq!(call.name, "list_calendar_events");
        assert_eq!(call.args["limit"], 10);
        assert!(call.id.is_none());
    }

    #[test]
    fn test_has_payload() {
        assert!(Part::text("hi").has_payload());
        assert!(Part::inline("aGk=", None).has_payload());
        assert!(!Part::function_call("f", serde_json::json!({})).has_payload());
        assert!(!Part::default().has_payload());
        assert!(!Part::text("").has_payload());
    }

    #[test]
    fn test_content_function_calls() {
        let content = Content::model(vec![
            Part::text("checking"),
            Part::function_call("list_calendar_events", serde_json::json!({})),
        ]);
        assert!(content.has_function_calls());
        assert_eq!(content.function_calls().len(), 1);
        assert_eq!(content.text(), "checking");
    }

    #[test]
    fn test_role_display() {
        assert_eq!(Role::User.to_string(), "user");
        assert_eq!(Role::Model.to_string(), "model");
    }
}
