//! In-memory macro recording. Recordings capture tool invocations per
//! session; saved macros replay through the dispatcher. Nothing persists
//! across process restarts.

use {
    chrono::{DateTime, Utc},
    dashmap::DashMap,
    serde::Serialize,
    serde_json::Value,
};

/// One recorded tool invocation.
#[derive(Debug, Clone, Serialize)]
pub struct MacroStep {
    pub tool: String,
    pub params: Value,
}

/// A finished recording.
#[derive(Debug, Clone, Serialize)]
pub struct Macro {
    pub id: String,
    pub name: Option<String>,
    #[serde(rename = "recordedFrom")]
    pub recorded_from: String,
    pub steps: Vec<MacroStep>,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
}

/// Process-wide macro state.
pub struct MacroStore {
    recording: DashMap<String, Vec<MacroStep>>,
    saved: DashMap<String, Macro>,
}

impl MacroStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            recording: DashMap::new(),
            saved: DashMap::new(),
        }
    }

    /// Begin recording for a session. Returns `false` when already recording.
    pub fn start(&self, session_id: &str) -> bool {
        if self.recording.contains_key(session_id) {
            return false;
        }
        self.recording.insert(session_id.to_string(), Vec::new());
        true
    }

    #[must_use]
    pub fn is_recording(&self, session_id: &str) -> bool {
        self.recording.contains_key(session_id)
    }

    /// Append a step to an active recording; no-op otherwise.
    pub fn record(&self, session_id: &str, tool: &str, params: Value) {
        if let Some(mut steps) = self.recording.get_mut(session_id) {
            steps.push(MacroStep {
                tool: tool.to_string(),
                params,
            });
        }
    }

    /// Stop recording and save the macro. `None` when nothing was recording.
    pub fn stop(&self, session_id: &str, name: Option<String>) -> Option<Macro> {
        let (_, steps) = self.recording.remove(session_id)?;
        let macro_ = Macro {
            id: uuid::Uuid::new_v4().to_string(),
            name,
            recorded_from: session_id.to_string(),
            steps,
            created_at: Utc::now(),
        };
        self.saved.insert(macro_.id.clone(), macro_.clone());
        Some(macro_)
    }

    #[must_use]
    pub fn get(&self, macro_id: &str) -> Option<Macro> {
        self.saved.get(macro_id).map(|m| m.clone())
    }

    #[must_use]
    pub fn list(&self) -> Vec<Macro> {
        let mut macros: Vec<Macro> = self.saved.iter().map(|m| m.clone()).collect();
        macros.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        macros
    }

    pub fn delete(&self, macro_id: &str) -> bool {
        self.saved.remove(macro_id).is_some()
    }

    /// Drop any active recording for a session (session destruction).
    pub fn discard_recording(&self, session_id: &str) {
        self.recording.remove(session_id);
    }
}

impl Default for MacroStore {
    fn default() -> Self {
        Self::new()
    }
}
