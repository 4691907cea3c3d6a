//! Part conversion between A2A message parts and model content parts
//!
//! Field-for-field renames only. Bytes stay base64 text on both sides and
//! MIME types are passed through unchecked.

use thiserror::Error;

use tandem_core::content::{self, Content};

use crate::protocol::{FileContent, Part};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConversionError {
    #[error("Unsupported part: {0}")]
    UnsupportedPart(String),
}

/// A2A part → model part
pub fn to_internal(part: &Part) -> Result<content::Part, ConversionError> {
    match part {
        Part::Text { text } => Ok(content::Part::text(text.clone())),
        Part::File { file } => match file {
            FileContent { uri: Some(uri), mime_type, .. } => {
                Ok(content::Part::file_uri(uri.clone(), mime_type.clone()))
            }
            FileContent { bytes: Some(bytes), mime_type, .. } => {
                Ok(content::Part::inline(bytes.clone(), mime_type.clone()))
            }
            _ => Err(ConversionError::UnsupportedPart(
                "file part carries neither uri nor bytes".to_string(),
            )),
        },
        Part::Data { .. } => Err(ConversionError::UnsupportedPart(
            "data parts are not supported".to_string(),
        )),
    }
}

/// Model part → A2A part
pub fn to_external(part: &content::Part) -> Result<Part, ConversionError> {
    if let Some(text) = &part.text {
        return Ok(Part::text(text.clone()));
    }
    if let Some(file) = &part.file_data {
        return Ok(Part::file_uri(file.file_uri.clone(), file.mime_type.clone()));
    }
    if let Some(blob) = &part.inline_data {
        return Ok(Part::file_bytes(blob.data.clone(), blob.mime_type.clone()));
    }
    Err(ConversionError::UnsupportedPart(
        "part has no text, file reference or inline data".to_string(),
    ))
}

/// Convert every inbound part. The first unsupported part fails the whole
/// message.
pub fn message_to_internal(parts: &[Part]) -> Result<Vec<content::Part>, ConversionError> {
    parts.iter().map(to_internal).collect()
}

/// Keep the parts that carry text, a file reference or inline data and
/// convert them. Function calls and responses are dropped.
pub fn payload_to_external(content: &Content) -> Result<Vec<Part>, ConversionError> {
    content
        .parts
        .iter()
        .filter(|p| p.has_payload())
        .map(to_external)
        .collect()
}
