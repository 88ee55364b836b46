//! Bounded log of recent agent interactions.
//!
//! Keeps the last few inputs and outputs exchanged with the assistant's
//! agents so the decision context (and operators) can see what just
//! happened. Entries beyond the capacity are dropped oldest first.

use std::collections::VecDeque;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Default number of interactions retained.
pub const DEFAULT_MAX_INTERACTIONS: usize = 20;

/// One exchange with an agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentInteraction {
    pub id: String,
    /// Which agent handled it, e.g. `"assistant"` or `"scheduler"`.
    pub agent_type: String,
    pub timestamp: DateTime<Utc>,
    pub input: String,
    pub output: String,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

struct TrackerState {
    entries: VecDeque<AgentInteraction>,
    counter: u64,
}

/// Thread-safe ring of the most recent [`AgentInteraction`]s.
pub struct InteractionTracker {
    capacity: usize,
    state: Mutex<TrackerState>,
}

impl Default for InteractionTracker {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_INTERACTIONS)
    }
}

impl InteractionTracker {
    /// A tracker holding at most `capacity` entries (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            state: Mutex::new(TrackerState {
                entries: VecDeque::with_capacity(capacity),
                counter: 0,
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Record an interaction and return its id (`interaction_<n>`).
    pub fn track(
        &self,
        agent_type: impl Into<String>,
        input: impl Into<String>,
        output: impl Into<String>,
        metadata: Option<serde_json::Value>,
    ) -> String {
        let mut state = self.lock();
        state.counter += 1;
        let id = format!("interaction_{}", state.counter);

        if state.entries.len() == self.capacity {
            state.entries.pop_front();
        }
        state.entries.push_back(AgentInteraction {
            id: id.clone(),
            agent_type: agent_type.into(),
            timestamp: Utc::now(),
            input: input.into(),
            output: output.into(),
            metadata: metadata.unwrap_or_else(|| serde_json::json!({})),
        });
        id
    }

    /// All retained interactions, newest first.
    pub fn all(&self) -> Vec<AgentInteraction> {
        self.lock().entries.iter().rev().cloned().collect()
    }

    /// Up to `limit` interactions, newest first.
    pub fn recent(&self, limit: usize) -> Vec<AgentInteraction> {
        self.lock().entries.iter().rev().take(limit).cloned().collect()
    }

    pub fn by_id(&self, id: &str) -> Option<AgentInteraction> {
        self.lock().entries.iter().find(|i| i.id == id).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every entry. Ids keep counting up.
    pub fn clear(&self) {
        self.lock().entries.clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, TrackerState> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}
