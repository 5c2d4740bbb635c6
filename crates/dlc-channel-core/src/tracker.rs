//! Background Task Tracker
//!
//! Task notifications are queued last-in-first-out, at most one per kind. The
//! presentation layer peeks the top of the queue and pops it when it starts showing that
//! task, which makes it the single *displayed* task:
//!
//! - a notification of the displayed task's kind updates the displayed task in place
//! - a notification of another kind is queued and recorded as a conflict; the display
//!   layer decides whether to supersede the displayed task
//! - a displayed task can be dismissed once it resolved, or once it stayed pending for
//!   the configured timeout. Dismissing never changes the task's status.

use hashbrown::HashMap;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::TaskTrackerConfig;
use crate::errors::TaskError;
use crate::model::{BackgroundTask, TaskKind, TaskStatus};
use crate::types::{SystemTimeSource, TimeSource, Timestamp};

// ----------------------------------------------------------------------------
// Task Stack
// ----------------------------------------------------------------------------

/// LIFO queue of task notifications
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskStack {
    entries: VecDeque<BackgroundTask>,
}

impl TaskStack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Push a notification, replacing any queued entry of the same kind
    pub fn push_top(&mut self, task: BackgroundTask) {
        self.entries.retain(|queued| queued.kind != task.kind);
        self.entries.push_back(task);
    }

    pub fn peek_top(&self) -> Option<&BackgroundTask> {
        self.entries.back()
    }

    pub fn pop_top(&mut self) -> Option<BackgroundTask> {
        self.entries.pop_back()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries from the top of the stack down
    pub fn iter(&self) -> impl Iterator<Item = &BackgroundTask> {
        self.entries.iter().rev()
    }
}

// ----------------------------------------------------------------------------
// Tracker Types
// ----------------------------------------------------------------------------

/// The task currently shown by the presentation layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayedTask {
    pub task: BackgroundTask,
    pub displayed_at: Timestamp,
}

/// A notification of a different kind arrived while a task was displayed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskConflict {
    pub displayed: BackgroundTask,
    pub incoming: BackgroundTask,
    pub at: Timestamp,
}

/// What the tracker did with a notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskUpdate {
    /// Pushed onto the queue
    Queued(BackgroundTask),
    /// Merged into the displayed task
    DisplayedUpdated(BackgroundTask),
    /// Pushed onto the queue while another kind is displayed
    Conflict(TaskConflict),
}

type Observer = Box<dyn Fn(&TaskUpdate) + Send>;

// ----------------------------------------------------------------------------
// Background Task Tracker
// ----------------------------------------------------------------------------

pub struct BackgroundTaskTracker {
    stack: TaskStack,
    displayed: Option<DisplayedTask>,
    latest: HashMap<TaskKind, BackgroundTask>,
    conflicts: VecDeque<TaskConflict>,
    observers: Vec<Observer>,
    config: TaskTrackerConfig,
    time_source: Arc<dyn TimeSource>,
}

impl Default for BackgroundTaskTracker {
    fn default() -> Self {
        Self::new(TaskTrackerConfig::default(), Arc::new(SystemTimeSource::new()))
    }
}

impl BackgroundTaskTracker {
    pub fn new(config: TaskTrackerConfig, time_source: Arc<dyn TimeSource>) -> Self {
        Self {
            stack: TaskStack::new(),
            displayed: None,
            latest: HashMap::new(),
            conflicts: VecDeque::new(),
            observers: Vec::new(),
            config,
            time_source,
        }
    }

    /// Register an observer called after every notification
    pub fn observe<F>(&mut self, observer: F)
    where
        F: Fn(&TaskUpdate) + Send + 'static,
    {
        self.observers.push(Box::new(observer));
    }

    /// Record a task notification
    pub fn on_notification(&mut self, task: BackgroundTask) -> TaskUpdate {
        debug!(kind = %task.kind, status = %task.status, "Background task notification");
        self.latest.insert(task.kind, task.clone());

        let update = match self.displayed.as_mut() {
            Some(displayed) if displayed.task.kind == task.kind => {
                displayed.task = task.clone();
                TaskUpdate::DisplayedUpdated(task)
            }
            Some(displayed) => {
                let conflict = TaskConflict {
                    displayed: displayed.task.clone(),
                    incoming: task.clone(),
                    at: self.time_source.now(),
                };
                warn!(
                    displayed = %conflict.displayed,
                    incoming = %conflict.incoming,
                    "Task notification arrived while another task is displayed"
                );
                self.stack.push_top(task);
                self.remember_conflict(conflict.clone());
                TaskUpdate::Conflict(conflict)
            }
            None => {
                self.stack.push_top(task.clone());
                TaskUpdate::Queued(task)
            }
        };

        for observer in &self.observers {
            observer(&update);
        }
        update
    }

    fn remember_conflict(&mut self, conflict: TaskConflict) {
        if self.config.max_conflict_history == 0 {
            return;
        }
        while self.conflicts.len() >= self.config.max_conflict_history {
            self.conflicts.pop_front();
        }
        self.conflicts.push_back(conflict);
    }

    /// Most recent notification waiting to be displayed
    pub fn peek_top(&self) -> Option<&BackgroundTask> {
        self.stack.peek_top()
    }

    /// Pop the top of the queue and make it the displayed task
    pub fn display_top(&mut self) -> Option<BackgroundTask> {
        let task = self.stack.pop_top()?;
        if let Some(previous) = &self.displayed {
            info!(previous = %previous.task, next = %task, "Superseding displayed task");
        }
        self.displayed = Some(DisplayedTask {
            task: task.clone(),
            displayed_at: self.time_source.now(),
        });
        Some(task)
    }

    pub fn displayed(&self) -> Option<&DisplayedTask> {
        self.displayed.as_ref()
    }

    /// Whether the displayed task may be closed now
    pub fn can_dismiss(&self) -> bool {
        match &self.displayed {
            Some(displayed) => self.remaining_lock(displayed) == 0,
            None => false,
        }
    }

    /// Close the displayed task
    pub fn dismiss(&mut self) -> Result<BackgroundTask, TaskError> {
        let displayed = self.displayed.as_ref().ok_or(TaskError::NothingDisplayed)?;

        let remaining_ms = self.remaining_lock(displayed);
        if remaining_ms > 0 {
            return Err(TaskError::DismissNotAllowed {
                kind: displayed.task.kind.to_string(),
                remaining_ms,
            });
        }

        let displayed = self.displayed.take().ok_or(TaskError::NothingDisplayed)?;
        debug!(task = %displayed.task, "Displayed task dismissed");
        Ok(displayed.task)
    }

    /// Milliseconds until the displayed task unlocks
    fn remaining_lock(&self, displayed: &DisplayedTask) -> u64 {
        if displayed.task.status != TaskStatus::Pending {
            return 0;
        }
        let elapsed = self.time_source.now() - displayed.displayed_at;
        let timeout = u64::try_from(self.config.dismiss_timeout.as_millis()).unwrap_or(u64::MAX);
        timeout.saturating_sub(elapsed)
    }

    /// Last known state of a task kind
    pub fn latest(&self, kind: TaskKind) -> Option<&BackgroundTask> {
        self.latest.get(&kind)
    }

    /// Recorded display conflicts, oldest first
    pub fn conflicts(&self) -> impl Iterator<Item = &TaskConflict> {
        self.conflicts.iter()
    }

    pub fn queued(&self) -> &TaskStack {
        &self.stack
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
