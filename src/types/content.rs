//! Prompt content blocks

use serde::{Deserialize, Serialize};

use super::identifiers::TerminalId;

/// A content block sent in `session/prompt`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    /// Plain text
    Text {
        /// Text body
        text: String,
    },
    /// Resource embedded inline
    Resource {
        /// Embedded resource payload
        resource: EmbeddedResource,
    },
}

/// Text resource carried inline in a prompt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmbeddedResource {
    /// Resource URI
    pub uri: String,
    /// MIME type
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    /// Resource text
    pub text: String,
}

impl ContentBlock {
    /// Text block
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }
}

/// Recent output of one terminal attached to a prompt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextSnapshot {
    /// Terminal the output came from
    pub terminal_id: TerminalId,
    /// Buffered output text
    pub text: String,
}

impl ContextSnapshot {
    /// Create a snapshot
    pub fn new(terminal_id: TerminalId, text: impl Into<String>) -> Self {
        Self {
            terminal_id,
            text: text.into(),
        }
    }

    /// Convert to an embedded resource block, keeping at most `limit` bytes
    /// from the end of the text.
    #[must_use]
    pub fn into_block(self, limit: Option<usize>) -> ContentBlock {
        let text = match limit {
            Some(limit) => tail_on_char_boundary(&self.text, limit).to_string(),
            None => self.text,
        };
        ContentBlock::Resource {
            resource: EmbeddedResource {
                uri: format!("terminal://{}", self.terminal_id),
                mime_type: Some("text/plain".to_string()),
                text,
            },
        }
    }
}

/// Last `limit` bytes of `text`, moved forward to a char boundary
fn tail_on_char_boundary(text: &str, limit: usize) -> &str {
    if text.len() <= limit {
        return text;
    }
    let mut start = text.len() - limit;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    &text[start..]
}
