//! Centralized Configuration Management
//!
//! All tunables of the channel client in one place: runtime channel sizes, the
//! background task dismiss window, funding-fee cadence and which
//! monitoring features run inside the event loop.

use core::time::Duration;

use crate::errors::ConfigError;

// ----------------------------------------------------------------------------
// Channel Configuration
// ----------------------------------------------------------------------------

/// Buffer sizes of the runtime's mpsc channels
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ChannelConfig {
    /// Caller → core logic
    pub command_buffer_size: usize,
    /// Backend → core logic
    pub event_buffer_size: usize,
    /// Finished outbound commands → core logic
    pub completion_buffer_size: usize,
    /// Core logic → application
    pub app_event_buffer_size: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            command_buffer_size: 32,   // Commands come from user actions
            event_buffer_size: 128,    // Backend sync can be bursty
            completion_buffer_size: 16,
            app_event_buffer_size: 64,
        }
    }
}

impl ChannelConfig {
    /// Create configuration for low-memory environments
    pub fn low_memory() -> Self {
        Self {
            command_buffer_size: 8,
            event_buffer_size: 32,
            completion_buffer_size: 4,
            app_event_buffer_size: 16,
        }
    }

    /// Create configuration optimized for testing
    pub fn testing() -> Self {
        Self {
            command_buffer_size: 100,
            event_buffer_size: 100,
            completion_buffer_size: 100,
            app_event_buffer_size: 100,
        }
    }
}

// ----------------------------------------------------------------------------
// Task Tracker Configuration
// ----------------------------------------------------------------------------

/// Configuration for the background task tracker
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct TaskTrackerConfig {
    /// How long a pending task must be displayed before it can be dismissed
    pub dismiss_timeout: Duration,
    /// Number of display conflicts kept for inspection
    pub max_conflict_history: usize,
}

impl Default for TaskTrackerConfig {
    fn default() -> Self {
        Self {
            dismiss_timeout: Duration::from_secs(30),
            max_conflict_history: 32,
        }
    }
}

impl TaskTrackerConfig {
    /// Create configuration optimized for testing
    pub fn testing() -> Self {
        Self {
            dismiss_timeout: Duration::from_secs(30),
            max_conflict_history: 8,
        }
    }
}

// ----------------------------------------------------------------------------
// Funding Configuration
// ----------------------------------------------------------------------------

/// Configuration for the funding-fee renewal protocol
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct FundingConfig {
    /// Period a funding rate applies to
    pub interval: Duration,
    /// Fees below this many sats are not worth a renewal
    pub min_fee_sats: u64,
}

impl Default for FundingConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(8 * 60 * 60),
            min_fee_sats: 1,
        }
    }
}

impl FundingConfig {
    /// Hourly funding, as used by some venues
    pub fn hourly() -> Self {
        Self {
            interval: Duration::from_secs(60 * 60),
            ..Self::default()
        }
    }

    /// Create configuration optimized for testing
    pub fn testing() -> Self {
        Self::default()
    }
}

// ----------------------------------------------------------------------------
// Monitoring Configuration
// ----------------------------------------------------------------------------

/// Optional observers run inside the event loop
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct MonitoringConfig {
    /// Emit an app event whenever the coarse channel status changes
    pub track_status_changes: bool,
    /// Raise `recover` tasks for channels stuck mid-protocol
    pub detect_interrupted_protocols: bool,
    /// Forward every store revision as an app event
    pub emit_store_updates: bool,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            track_status_changes: true,
            detect_interrupted_protocols: true,
            emit_store_updates: false,
        }
    }
}

impl MonitoringConfig {
    /// Create configuration for minimal monitoring
    pub fn minimal() -> Self {
        Self {
            track_status_changes: true,
            detect_interrupted_protocols: false,
            emit_store_updates: false,
        }
    }

    /// Create configuration optimized for testing
    pub fn testing() -> Self {
        Self {
            track_status_changes: true,
            detect_interrupted_protocols: true,
            emit_store_updates: true,
        }
    }
}

// ----------------------------------------------------------------------------
// Master Configuration
// ----------------------------------------------------------------------------

/// Master configuration of the channel client
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize, Default)]
pub struct ClientConfig {
    pub channels: ChannelConfig,
    pub tasks: TaskTrackerConfig,
    pub funding: FundingConfig,
    pub monitoring: MonitoringConfig,
}

impl ClientConfig {
    /// Create new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Create configuration optimized for mobile/low-power environments
    pub fn mobile_optimized() -> Self {
        Self {
            channels: ChannelConfig::low_memory(),
            tasks: TaskTrackerConfig::default(),
            funding: FundingConfig::default(),
            monitoring: MonitoringConfig::minimal(),
        }
    }

    /// Create configuration optimized for testing
    pub fn testing() -> Self {
        Self {
            channels: ChannelConfig::testing(),
            tasks: TaskTrackerConfig::testing(),
            funding: FundingConfig::testing(),
            monitoring: MonitoringConfig::testing(),
        }
    }

    /// Builder method for customizing channel configuration
    pub fn with_channels(mut self, channels: ChannelConfig) -> Self {
        self.channels = channels;
        self
    }

    /// Builder method for customizing task tracker configuration
    pub fn with_tasks(mut self, tasks: TaskTrackerConfig) -> Self {
        self.tasks = tasks;
        self
    }

    /// Builder method for customizing funding configuration
    pub fn with_funding(mut self, funding: FundingConfig) -> Self {
        self.funding = funding;
        self
    }

    /// Builder method for customizing monitoring configuration
    pub fn with_monitoring(mut self, monitoring: MonitoringConfig) -> Self {
        self.monitoring = monitoring;
        self
    }

    /// Validate the configuration for consistency and feasibility
    pub fn validate(&self) -> Result<(), ConfigError> {
        let buffers = [
            ("command_buffer_size", self.channels.command_buffer_size),
            ("event_buffer_size", self.channels.event_buffer_size),
            ("completion_buffer_size", self.channels.completion_buffer_size),
            ("app_event_buffer_size", self.channels.app_event_buffer_size),
        ];
        for (field, size) in buffers {
            if size == 0 {
                return Err(ConfigError::Zero { field });
            }
        }

        if self.tasks.dismiss_timeout.is_zero() {
            return Err(ConfigError::Zero {
                field: "dismiss_timeout",
            });
        }
        if self.funding.interval.is_zero() {
            return Err(ConfigError::Zero { field: "interval" });
        }
        if self.funding.interval.as_secs() % 3600 != 0 {
            return Err(ConfigError::Invalid {
                reason: "funding interval must be a whole number of hours".into(),
            });
        }

        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
