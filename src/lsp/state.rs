// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Session lifecycle state machine and server progress tracking.

use lsp_types::{NumberOrString, ProgressParams, ProgressParamsValue, WorkDoneProgress};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Instant;

/// Token type for progress tracking (string or number).
pub type ProgressToken = NumberOrString;

/// Lifecycle of a session and its server process.
///
/// `NotStarted → Initializing → Running → ShuttingDown → Stopped`, with
/// `Crashed` reachable from any live state. `Stopped` and `Crashed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    /// No process yet.
    NotStarted,
    /// Process spawned, handshake in flight.
    Initializing,
    /// Handshake complete; queries are accepted.
    Running,
    /// Graceful shutdown in progress.
    ShuttingDown,
    /// Shut down cleanly.
    Stopped,
    /// Process exited on its own.
    Crashed,
}

impl LifecycleState {
    /// Create from atomic u8 value.
    #[must_use]
    pub const fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::NotStarted,
            1 => Self::Initializing,
            2 => Self::Running,
            3 => Self::ShuttingDown,
            4 => Self::Stopped,
            _ => Self::Crashed,
        }
    }

    /// Convert to atomic u8 value.
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        match self {
            Self::NotStarted => 0,
            Self::Initializing => 1,
            Self::Running => 2,
            Self::ShuttingDown => 3,
            Self::Stopped => 4,
            Self::Crashed => 5,
        }
    }

    /// True for `Stopped` and `Crashed`.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Stopped | Self::Crashed)
    }

    /// Whether `self → next` is an edge of the state machine.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::NotStarted, Self::Initializing)
                | (Self::Initializing, Self::Running | Self::ShuttingDown)
                | (Self::Running, Self::ShuttingDown)
                | (Self::ShuttingDown, Self::Stopped)
                | (
                    Self::NotStarted | Self::Initializing | Self::Running,
                    Self::Crashed
                )
        )
    }
}

/// Lock-free holder for a [`LifecycleState`] with guarded transitions.
#[derive(Debug)]
pub struct StateCell(AtomicU8);

impl Default for StateCell {
    fn default() -> Self {
        Self(AtomicU8::new(LifecycleState::NotStarted.as_u8()))
    }
}

impl StateCell {
    /// Creates a cell in `NotStarted`.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state.
    #[must_use]
    pub fn get(&self) -> LifecycleState {
        LifecycleState::from_u8(self.0.load(Ordering::SeqCst))
    }

    /// Moves to `next` if that is a legal edge from the current state.
    ///
    /// # Errors
    ///
    /// Returns the current state if the transition is not allowed. Racing
    /// transitions are resolved atomically: exactly one caller wins.
    pub fn transition(&self, next: LifecycleState) -> Result<LifecycleState, LifecycleState> {
        let mut current = self.get();
        loop {
            if !current.can_transition_to(next) {
                return Err(current);
            }
            match self.0.compare_exchange(
                current.as_u8(),
                next.as_u8(),
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return Ok(current),
                Err(actual) => current = LifecycleState::from_u8(actual),
            }
        }
    }
}

/// State of an active progress operation.
#[derive(Debug, Clone)]
pub struct ProgressState {
    /// The title of the progress operation.
    pub title: String,
    /// The optional progress message.
    pub message: Option<String>,
    /// The optional progress percentage (0-100).
    pub percentage: Option<u32>,
    /// When the operation started.
    pub started: Instant,
}

/// Snapshot of a session, suitable for display or JSON output.
#[derive(Debug, Clone, Serialize)]
pub struct SessionStatus {
    /// The language ID documents are opened with.
    pub language: String,
    /// Current lifecycle state.
    pub state: LifecycleState,
    /// Active progress title, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress_title: Option<String>,
    /// Active progress message, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress_message: Option<String>,
    /// Active progress percentage, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress_percentage: Option<u32>,
    /// Number of documents currently open.
    pub open_documents: usize,
    /// Number of requests awaiting a response.
    pub pending_requests: usize,
    /// Seconds since spawn.
    pub uptime_secs: u64,
}

/// Tracks `$/progress` work-done reports from the server.
#[derive(Debug, Default)]
pub struct ProgressTracker {
    active_progress: HashMap<ProgressToken, ProgressState>,
}

impl ProgressTracker {
    /// Creates a new `ProgressTracker`.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Update state from a progress notification.
    pub fn update(&mut self, params: &ProgressParams) {
        let ProgressParamsValue::WorkDone(progress) = &params.value;
        match progress {
            WorkDoneProgress::Begin(begin) => {
                self.active_progress.insert(
                    params.token.clone(),
                    ProgressState {
                        title: begin.title.clone(),
                        message: begin.message.clone(),
                        percentage: begin.percentage,
                        started: Instant::now(),
                    },
                );
            }
            WorkDoneProgress::Report(report) => {
                if let Some(state) = self.active_progress.get_mut(&params.token) {
                    if report.message.is_some() {
                        state.message.clone_from(&report.message);
                    }
                    if report.percentage.is_some() {
                        state.percentage = report.percentage;
                    }
                }
            }
            WorkDoneProgress::End(_) => {
                self.active_progress.remove(&params.token);
            }
        }
    }

    /// Returns true if the server reported unfinished work.
    #[must_use]
    pub fn is_busy(&self) -> bool {
        !self.active_progress.is_empty()
    }

    /// The least-advanced active operation, oldest first on ties.
    #[must_use]
    pub fn primary_progress(&self) -> Option<&ProgressState> {
        self.active_progress
            .values()
            .min_by_key(|p| (p.percentage.unwrap_or(0), p.started))
    }

    /// Forget all progress (the server is gone).
    pub fn clear(&mut self) {
        self.active_progress.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{Context, Result};

    fn make_progress_params(token: &str, progress: WorkDoneProgress) -> ProgressParams {
        ProgressParams {
            token: NumberOrString::String(token.to_string()),
            value: ProgressParamsValue::WorkDone(progress),
        }
    }

    fn begin(title: &str, percentage: u32) -> WorkDoneProgress {
        WorkDoneProgress::Begin(lsp_types::WorkDoneProgressBegin {
            title: title.to_string(),
            cancellable: None,
            message: None,
            percentage: Some(percentage),
        })
    }

    #[test]
    fn test_happy_path_transitions() {
        let cell = StateCell::new();
        assert_eq!(cell.get(), LifecycleState::NotStarted);
        assert_eq!(
            cell.transition(LifecycleState::Initializing),
            Ok(LifecycleState::NotStarted)
        );
        assert!(cell.transition(LifecycleState::Running).is_ok());
        assert!(cell.transition(LifecycleState::ShuttingDown).is_ok());
        assert!(cell.transition(LifecycleState::Stopped).is_ok());
        assert!(cell.get().is_terminal());
    }

    #[test]
    fn test_illegal_transitions_rejected() {
        let cell = StateCell::new();
        assert_eq!(
            cell.transition(LifecycleState::Running),
            Err(LifecycleState::NotStarted)
        );

        assert!(cell.transition(LifecycleState::Initializing).is_ok());
        assert!(cell.transition(LifecycleState::Running).is_ok());
        assert!(cell.transition(LifecycleState::Crashed).is_ok());

        // terminal: nothing leaves Crashed, and a second crash report loses
        assert_eq!(
            cell.transition(LifecycleState::Crashed),
            Err(LifecycleState::Crashed)
        );
        assert_eq!(
            cell.transition(LifecycleState::ShuttingDown),
            Err(LifecycleState::Crashed)
        );
    }

    #[test]
    fn test_exit_during_shutdown_is_not_a_crash() {
        let cell = StateCell::new();
        assert!(cell.transition(LifecycleState::Initializing).is_ok());
        assert!(cell.transition(LifecycleState::Running).is_ok());
        assert!(cell.transition(LifecycleState::ShuttingDown).is_ok());
        assert_eq!(
            cell.transition(LifecycleState::Crashed),
            Err(LifecycleState::ShuttingDown)
        );
    }

    #[test]
    fn test_state_conversion() {
        for state in [
            LifecycleState::NotStarted,
            LifecycleState::Initializing,
            LifecycleState::Running,
            LifecycleState::ShuttingDown,
            LifecycleState::Stopped,
            LifecycleState::Crashed,
        ] {
            assert_eq!(LifecycleState::from_u8(state.as_u8()), state);
        }
        assert_eq!(LifecycleState::from_u8(99), LifecycleState::Crashed);
    }

    #[test]
    fn test_progress_begin_report_end() -> Result<()> {
        let mut tracker = ProgressTracker::new();
        assert!(!tracker.is_busy());

        tracker.update(&make_progress_params("indexing", begin("Indexing", 0)));
        assert!(tracker.is_busy());

        let report = make_progress_params(
            "indexing",
            WorkDoneProgress::Report(lsp_types::WorkDoneProgressReport {
                cancellable: None,
                message: Some("50% done".to_string()),
                percentage: Some(50),
            }),
        );
        tracker.update(&report);

        let primary = tracker.primary_progress().context("missing progress")?;
        assert_eq!(primary.title, "Indexing");
        assert_eq!(primary.percentage, Some(50));
        assert_eq!(primary.message, Some("50% done".to_string()));

        let end = make_progress_params(
            "indexing",
            WorkDoneProgress::End(lsp_types::WorkDoneProgressEnd { message: None }),
        );
        tracker.update(&end);
        assert!(!tracker.is_busy());
        Ok(())
    }

    #[test]
    fn test_primary_is_least_advanced() -> Result<()> {
        let mut tracker = ProgressTracker::new();
        tracker.update(&make_progress_params("a", begin("Indexing", 50)));
        tracker.update(&make_progress_params("b", begin("Analyzing", 10)));

        let primary = tracker.primary_progress().context("missing progress")?;
        assert_eq!(primary.title, "Analyzing");

        tracker.clear();
        assert!(tracker.primary_progress().is_none());
        Ok(())
    }
}
