//! Background Task Model
//!
//! Long-running protocol tasks reported by the backend (rollover, recovery, closing...).

use core::fmt;
use core::str::FromStr;
use serde::{Deserialize, Serialize};

/// Kind of background protocol task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TaskKind {
    Recover,
    FullSync,
    Rollover,
    CollaborativeRevert,
    AsyncTrade,
    Expire,
    Liquidate,
    CloseChannel,
}

impl TaskKind {
    pub const ALL: [TaskKind; 8] = [
        TaskKind::Recover,
        TaskKind::FullSync,
        TaskKind::Rollover,
        TaskKind::CollaborativeRevert,
        TaskKind::AsyncTrade,
        TaskKind::Expire,
        TaskKind::Liquidate,
        TaskKind::CloseChannel,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::Recover => "recover",
            TaskKind::FullSync => "fullSync",
            TaskKind::Rollover => "rollover",
            TaskKind::CollaborativeRevert => "collaborativeRevert",
            TaskKind::AsyncTrade => "asyncTrade",
            TaskKind::Expire => "expire",
            TaskKind::Liquidate => "liquidate",
            TaskKind::CloseChannel => "closeChannel",
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TaskKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| format!("unknown task kind: {}", s))
    }
}

/// Progress of a background task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TaskStatus {
    Pending,
    Failed,
    Success,
}

impl TaskStatus {
    /// Success or failure
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TaskStatus::Pending)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskStatus::Pending => write!(f, "pending"),
            TaskStatus::Failed => write!(f, "failed"),
            TaskStatus::Success => write!(f, "success"),
        }
    }
}

/// A notification about a background task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackgroundTask {
    pub kind: TaskKind,
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl BackgroundTask {
    pub fn new(kind: TaskKind, status: TaskStatus) -> Self {
        Self {
            kind,
            status,
            error: None,
        }
    }

    pub fn pending(kind: TaskKind) -> Self {
        Self::new(kind, TaskStatus::Pending)
    }

    pub fn success(kind: TaskKind) -> Self {
        Self::new(kind, TaskStatus::Success)
    }

    pub fn failed<E: Into<String>>(kind: TaskKind, error: E) -> Self {
        Self {
            kind,
            status: TaskStatus::Failed,
            error: Some(error.into()),
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.status.is_terminal()
    }
}

impl fmt::Display for BackgroundTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.error {
            Some(error) => write!(f, "{}({}: {})", self.kind, self.status, error),
            None => write!(f, "{}({})", self.kind, self.status),
        }
    }
}
