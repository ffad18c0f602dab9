//! Ordered registry of the tool calls seen in a session

use std::collections::HashMap;

use chrono::Utc;

use crate::protocol::{ToolCallLocation, ToolCallPayload, ToolCallUpdatePayload};
use crate::types::{ToolCall, ToolCallId};

/// Tool calls keyed by id, remembering first-seen order
#[derive(Debug, Default)]
pub struct ToolCallRegistry {
    calls: HashMap<ToolCallId, ToolCall>,
    order: Vec<ToolCallId>,
}

impl ToolCallRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a `tool_call` announcement
    ///
    /// Returns the stored call and whether it was new. A repeated id
    /// overwrites title, kind and payloads but keeps its creation time and
    /// position, and its status still never moves backwards.
    pub fn upsert_created(&mut self, payload: ToolCallPayload) -> (ToolCall, bool) {
        let now = Utc::now();
        if let Some(existing) = self.calls.get_mut(&payload.tool_call_id) {
            existing.title = payload.title;
            existing.kind = payload.kind;
            if let Some(subtitle) = subtitle(&payload.locations) {
                existing.subtitle = Some(subtitle);
            }
            existing.status = existing.status.advance(payload.status);
            if payload.raw_input.is_some() {
                existing.raw_input = payload.raw_input;
            }
            if existing.status.is_terminal() && payload.raw_output.is_some() {
                existing.raw_output = payload.raw_output;
            }
            existing.updated_at = now;
            return (existing.clone(), false);
        }

        let raw_output = if payload.status.is_terminal() {
            payload.raw_output
        } else {
            None
        };
        let call = ToolCall {
            id: payload.tool_call_id.clone(),
            title: payload.title,
            subtitle: subtitle(&payload.locations),
            kind: payload.kind,
            status: payload.status,
            raw_input: payload.raw_input,
            raw_output,
            created_at: now,
            updated_at: now,
        };
        self.order.push(payload.tool_call_id.clone());
        self.calls.insert(payload.tool_call_id, call.clone());
        (call, true)
    }

    /// Apply a `tool_call_update`
    ///
    /// Returns `None` (and changes nothing) when the id is unknown.
    pub fn apply_update(&mut self, update: ToolCallUpdatePayload) -> Option<ToolCall> {
        let call = self.calls.get_mut(&update.tool_call_id)?;
        if let Some(title) = update.title {
            call.title = title;
        }
        if let Some(kind) = update.kind {
            call.kind = kind;
        }
        if let Some(locations) = update.locations {
            call.subtitle = subtitle(&locations);
        }
        if let Some(status) = update.status {
            call.status = call.status.advance(status);
        }
        if let Some(raw_input) = update.raw_input {
            call.raw_input = Some(raw_input);
        }
        if call.status.is_terminal() && update.raw_output.is_some() {
            call.raw_output = update.raw_output;
        }
        call.updated_at = Utc::now();
        Some(call.clone())
    }

    /// Look up a call
    #[must_use]
    pub fn get(&self, id: &ToolCallId) -> Option<&ToolCall> {
        self.calls.get(id)
    }

    /// All calls in first-seen order
    #[must_use]
    pub fn timeline(&self) -> Vec<ToolCall> {
        self.order
            .iter()
            .filter_map(|id| self.calls.get(id))
            .cloned()
            .collect()
    }

    /// Number of distinct calls
    #[must_use]
    pub fn len(&self) -> usize {
        self.calls.len()
    }

    /// True when no call has been seen
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    /// Forget everything
    pub fn clear(&mut self) {
        self.calls.clear();
        self.order.clear();
    }
}

fn subtitle(locations: &[ToolCallLocation]) -> Option<String> {
    locations.first().map(ToolCallLocation::label)
}
