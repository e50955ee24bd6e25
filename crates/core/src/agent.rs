// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Agent kinds and their log-root association.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// The agent CLI family that produced a log file.
///
/// Inferred from the log's location under the agent's configured root,
/// never from log content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentType {
    Claude,
    Codex,
    Pi,
}

/// Error parsing an agent type from its persisted string form.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown agent type: {0}")]
pub struct UnknownAgentType(pub String);

impl AgentType {
    /// Stable string form used in the database and on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentType::Claude => "claude",
            AgentType::Codex => "codex",
            AgentType::Pi => "pi",
        }
    }

    /// All known agent types, in log-root scan order.
    pub fn all() -> [AgentType; 3] {
        [AgentType::Claude, AgentType::Codex, AgentType::Pi]
    }
}

impl fmt::Display for AgentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for AgentType {
    type Err = UnknownAgentType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "claude" => Ok(AgentType::Claude),
            "codex" => Ok(AgentType::Codex),
            "pi" => Ok(AgentType::Pi),
            other => Err(UnknownAgentType(other.to_string())),
        }
    }
}

#[cfg(test)]
#[path = "agent_tests.rs"]
mod tests;
