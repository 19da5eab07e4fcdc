#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};

pub const DEFAULT_HISTORY_LIMIT: usize = 100;

/// When a command counts as committed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplyMode {
    /// Apply in memory at once, persist in the background. Persistence
    /// failures are reported but not rolled back.
    #[default]
    Optimistic,
    /// Persist first and apply only after the store accepted the writes.
    WriteThrough,
}

impl ApplyMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Optimistic => "optimistic",
            Self::WriteThrough => "write_through",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "optimistic" => Some(Self::Optimistic),
            "write_through" => Some(Self::WriteThrough),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Maximum undo depth; the oldest entries are dropped first.
    pub history_limit: usize,
    pub apply_mode: ApplyMode,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            history_limit: DEFAULT_HISTORY_LIMIT,
            apply_mode: ApplyMode::Optimistic,
        }
    }
}
