//! Bounded per-component error and warning history
//!
//! Every component reports failures here before surfacing them to callers.
//! Each component keeps at most [`COMPONENT_HISTORY_CAP`] events; the oldest
//! entry is evicted first. All operations are safe under concurrent writers
//! and readers.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::{HashMap, VecDeque};

/// Maximum retained events per component
pub const COMPONENT_HISTORY_CAP: usize = 1000;

/// One recorded error or warning
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorEvent {
    /// Time the event was recorded
    pub timestamp: DateTime<Utc>,
    /// Reporting component
    pub component: String,
    /// Human-readable message
    pub message: String,
    /// Optional operation context (error chain, endpoint, attempt count)
    pub context: Option<String>,
    /// True for warnings, false for errors
    pub is_warning: bool,
}

/// Per-component summary used by [`SystemStatus`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComponentStatus {
    /// Number of recorded errors
    pub error_count: usize,
    /// Number of recorded warnings
    pub warning_count: usize,
    /// Most recent event, if any
    pub last_event: Option<ErrorEvent>,
}

/// Aggregate view across all components
#[derive(Debug, Clone)]
pub struct SystemStatus {
    /// Time the status was assembled
    pub timestamp: DateTime<Utc>,
    /// Total errors across components
    pub error_count: usize,
    /// Total warnings across components
    pub warning_count: usize,
    /// Per-component breakdown
    pub components: HashMap<String, ComponentStatus>,
}

/// Thread-safe bounded error/event aggregator.
#[derive(Debug, Default)]
pub struct ErrorAggregator {
    history: RwLock<HashMap<String, VecDeque<ErrorEvent>>>,
}

impl ErrorAggregator {
    /// Create an empty aggregator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an error for `component`.
    pub fn record_error(&self, component: &str, message: &str, context: Option<&str>) {
        self.record(component, message, context, false);
    }

    /// Record a warning for `component`.
    pub fn record_warning(&self, component: &str, message: &str, context: Option<&str>) {
        self.record(component, message, context, true);
    }

    fn record(&self, component: &str, message: &str, context: Option<&str>, is_warning: bool) {
        let event = ErrorEvent {
            timestamp: Utc::now(),
            component: component.to_string(),
            message: message.to_string(),
            context: context.map(str::to_string),
            is_warning,
        };

        let mut history = self.history.write();
        let events = history.entry(component.to_string()).or_default();
        events.push_back(event);
        while events.len() > COMPONENT_HISTORY_CAP {
            events.pop_front();
        }
    }

    /// Most recent events, most-recent-first.
    ///
    /// Filters by `component` when given and skips warnings unless
    /// `include_warnings` is set.
    pub fn recent(&self, component: Option<&str>, count: usize, include_warnings: bool) -> Vec<ErrorEvent> {
        let history = self.history.read();

        let mut events: Vec<ErrorEvent> = match component {
            Some(name) => history
                .get(name)
                .map(|events| events.iter().cloned().collect())
                .unwrap_or_default(),
            None => history.values().flatten().cloned().collect(),
        };

        if !include_warnings {
            events.retain(|e| !e.is_warning);
        }
        events.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        events.truncate(count);
        events
    }

    /// Aggregate error/warning counts plus the latest event per component.
    pub fn status(&self) -> SystemStatus {
        let history = self.history.read();

        let mut components = HashMap::with_capacity(history.len());
        let mut error_count = 0;
        let mut warning_count = 0;

        for (name, events) in history.iter() {
            let warnings = events.iter().filter(|e| e.is_warning).count();
            let errors = events.len() - warnings;
            error_count += errors;
            warning_count += warnings;
            components.insert(
                name.clone(),
                ComponentStatus {
                    error_count: errors,
                    warning_count: warnings,
                    last_event: events.back().cloned(),
                },
            );
        }

        SystemStatus {
            timestamp: Utc::now(),
            error_count,
            warning_count,
            components,
        }
    }
}
