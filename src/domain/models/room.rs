//! Per-room sidecar state owned by the room actor.
//!
//! Preferences, query history, and coordination-pattern events are written
//! only from the actor's own loop and persisted best-effort; losing them
//! across restarts costs history continuity, nothing else.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Per-agent preferences kept by a room.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentPreferences {
    #[serde(default)]
    pub preferred_topics: Vec<String>,
    #[serde(default)]
    pub last_query: Option<String>,
}

/// One recorded docs query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryRecord {
    pub query: String,
    pub topic: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// One recorded coordination-pattern event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoordinationPattern {
    pub pattern: String,
    pub timestamp: DateTime<Utc>,
    pub success: bool,
}

/// Durable room state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomState {
    pub room_id: String,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    #[serde(default)]
    pub preferences: HashMap<String, AgentPreferences>,
    #[serde(default)]
    pub query_history: Vec<QueryRecord>,
    #[serde(default)]
    pub coordination_patterns: Vec<CoordinationPattern>,
}

impl RoomState {
    pub fn new(room_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            room_id: room_id.into(),
            created_at: now,
            last_activity: now,
            preferences: HashMap::new(),
            query_history: Vec::new(),
            coordination_patterns: Vec::new(),
        }
    }

    /// Preferences entry for an agent, created on first use.
    pub fn prefs_entry(&mut self, agent: &str) -> &mut AgentPreferences {
        self.preferences.entry(agent.to_string()).or_default()
    }

    /// Append a query record, evicting the oldest entries past `cap`.
    pub fn record_query(&mut self, query: String, topic: Option<String>, cap: usize) {
        self.query_history.push(QueryRecord { query, topic, timestamp: Utc::now() });
        if self.query_history.len() > cap {
            let excess = self.query_history.len() - cap;
            self.query_history.drain(0..excess);
        }
    }

    /// Append a coordination-pattern event, evicting past `cap`.
    pub fn record_pattern(&mut self, pattern: impl Into<String>, success: bool, cap: usize) {
        self.coordination_patterns.push(CoordinationPattern {
            pattern: pattern.into(),
            timestamp: Utc::now(),
            success,
        });
        if self.coordination_patterns.len() > cap {
            let excess = self.coordination_patterns.len() - cap;
            self.coordination_patterns.drain(0..excess);
        }
    }
}
