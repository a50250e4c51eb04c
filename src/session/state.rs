use chrono::Utc;
use serde::Serialize;
use std::collections::HashMap;

use super::stats::TranscriptSegment;
use crate::connection::ConnectionState;
use crate::protocol::Concept;

/// Finalized utterances plus at most one pending (partial) utterance.
///
/// A partial replaces the pending text wholesale; a final appends one
/// segment and clears the pending text.
#[derive(Debug, Clone, Default)]
pub struct TranscriptBuffer {
    finalized: Vec<TranscriptSegment>,
    pending: Option<String>,
    server_full_text: Option<String>,
}

impl TranscriptBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&mut self, text: &str, is_final: bool, full_text: Option<&str>) {
        let text = text.trim();

        if is_final {
            if !text.is_empty() {
                self.finalized.push(TranscriptSegment {
                    text: text.to_string(),
                    timestamp: Utc::now(),
                });
            }
            self.pending = None;
            if let Some(full_text) = full_text {
                self.server_full_text = Some(full_text.to_string());
            }
        } else {
            self.pending = (!text.is_empty()).then(|| text.to_string());
        }
    }

    pub fn finalized(&self) -> &[TranscriptSegment] {
        &self.finalized
    }

    pub fn pending(&self) -> Option<&str> {
        self.pending.as_deref()
    }

    /// The service's own accumulated transcript, if it sent one
    pub fn server_full_text(&self) -> Option<&str> {
        self.server_full_text.as_deref()
    }

    /// Finalized text followed by the pending utterance
    pub fn full_text(&self) -> String {
        self.finalized
            .iter()
            .map(|segment| segment.text.as_str())
            .chain(self.pending.as_deref())
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

/// Concepts keyed by name (latest wins), in first-seen order, with a
/// pointer to the current one.
#[derive(Debug, Clone, Default)]
pub struct ConceptSet {
    order: Vec<String>,
    by_name: HashMap<String, Concept>,
    current: Option<String>,
}

impl ConceptSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert(&mut self, mut concept: Concept) {
        concept.difficulty = concept.difficulty.clamp(1, 5);
        if concept.is_current {
            self.current = Some(concept.name.clone());
        }
        if !self.by_name.contains_key(&concept.name) {
            self.order.push(concept.name.clone());
        }
        self.by_name.insert(concept.name.clone(), concept);
        self.sync_current_flags();
    }

    pub fn apply_list(&mut self, concepts: Vec<Concept>) {
        for concept in concepts {
            self.upsert(concept);
        }
    }

    /// Point at `concept`. A name already in the set only moves the pointer;
    /// the stored record is kept.
    pub fn set_current(&mut self, mut concept: Concept) -> Option<&Concept> {
        if self.by_name.contains_key(&concept.name) {
            self.current = Some(concept.name);
            self.sync_current_flags();
        } else {
            concept.is_current = true;
            self.upsert(concept);
        }
        self.current()
    }

    pub fn current(&self) -> Option<&Concept> {
        self.current.as_ref().and_then(|name| self.by_name.get(name))
    }

    pub fn get(&self, name: &str) -> Option<&Concept> {
        self.by_name.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Concept> {
        self.order.iter().filter_map(|name| self.by_name.get(name))
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    fn sync_current_flags(&mut self) {
        for (name, concept) in self.by_name.iter_mut() {
            concept.is_current = self.current.as_deref() == Some(name.as_str());
        }
    }
}

/// Read-only view of a session for rendering
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSnapshot {
    pub connection: ConnectionState,
    pub is_connected: bool,
    pub is_recording: bool,
    /// An explanation request is outstanding
    pub is_loading: bool,
    pub session_id: Option<String>,
    pub lecture_id: Option<String>,
    pub reconnect_attempt: u32,
    pub transcript: Vec<String>,
    pub pending_transcript: Option<String>,
    pub concepts: Vec<Concept>,
    pub current_concept: Option<Concept>,
    pub error: Option<String>,
}

impl Default for SessionSnapshot {
    fn default() -> Self {
        Self {
            connection: ConnectionState::Idle,
            is_connected: false,
            is_recording: false,
            is_loading: false,
            session_id: None,
            lecture_id: None,
            reconnect_attempt: 0,
            transcript: Vec::new(),
            pending_transcript: None,
            concepts: Vec::new(),
            current_concept: None,
            error: None,
        }
    }
}
