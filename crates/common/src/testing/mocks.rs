//! Mock implementations of common traits
//!
//! Provides a spy [`ProtectionEngine`] that records every interaction so
//! interceptor tests can assert exactly which signals were sent.

// Allow missing error/panic docs for test mocks - they are designed to be simple
// and errors are clearly indicated by their return types
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

use std::collections::VecDeque;
use std::error::Error as StdError;
use std::sync::{Arc, Mutex};

use crate::resilience::{Permit, ProtectionEngine, ProtectionSettings, Rejection};

/// One interaction observed by [`RecordingEngine`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Signal {
    /// `acquire` was called and admitted the call
    Acquired { identity: String },
    /// `acquire` was called and rejected the call
    Rejected { identity: String, rejection: Rejection },
    /// A permit reported success
    Success { identity: String },
    /// A permit reported failure with the error's display text
    Failure { identity: String, error: String },
    /// A permit was dropped without a signal
    Released { identity: String },
}

type SignalLog = Arc<Mutex<Vec<Signal>>>;
type RejectionQueue = Arc<Mutex<VecDeque<Rejection>>>;
type SettingsLog = Arc<Mutex<Vec<ProtectionSettings>>>;

/// Spy engine recording acquisitions and outcome signals
///
/// Admits every call unless a rejection has been queued with
/// [`reject_next`](Self::reject_next).
///
/// # Examples
///
/// ```
/// use floodgate_common::resilience::{Permit, ProtectionEngine, ProtectionSettings};
/// use floodgate_common::testing::mocks::{RecordingEngine, Signal};
///
/// let engine = RecordingEngine::new();
/// engine.acquire("postgresql_db:5432", &ProtectionSettings::default()).unwrap().on_success();
///
/// assert_eq!(engine.success_count(), 1);
/// assert_eq!(engine.failure_count(), 0);
/// ```
#[derive(Debug, Clone, Default)]
pub struct RecordingEngine {
    signals: SignalLog,
    rejections: RejectionQueue,
    settings: SettingsLog,
}

impl RecordingEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a rejection for the next `acquire`
    pub fn reject_next(&self, rejection: Rejection) {
        self.rejections.lock().unwrap().push_back(rejection);
    }

    /// All recorded signals in order
    pub fn signals(&self) -> Vec<Signal> {
        self.signals.lock().unwrap().clone()
    }

    /// Settings passed to each `acquire`, in order
    pub fn settings_seen(&self) -> Vec<ProtectionSettings> {
        self.settings.lock().unwrap().clone()
    }

    pub fn acquire_count(&self) -> usize {
        self.count(|s| matches!(s, Signal::Acquired { .. } | Signal::Rejected { .. }))
    }

    pub fn success_count(&self) -> usize {
        self.count(|s| matches!(s, Signal::Success { .. }))
    }

    pub fn failure_count(&self) -> usize {
        self.count(|s| matches!(s, Signal::Failure { .. }))
    }

    pub fn release_count(&self) -> usize {
        self.count(|s| matches!(s, Signal::Released { .. }))
    }

    /// Whether the engine saw no interaction at all
    pub fn is_untouched(&self) -> bool {
        self.signals.lock().unwrap().is_empty()
    }

    pub fn clear(&self) {
        self.signals.lock().unwrap().clear();
        self.settings.lock().unwrap().clear();
    }

    fn count(&self, predicate: impl Fn(&Signal) -> bool) -> usize {
        self.signals.lock().unwrap().iter().filter(|s| predicate(s)).count()
    }

    fn record(&self, signal: Signal) {
        self.signals.lock().unwrap().push(signal);
    }
}

impl ProtectionEngine for RecordingEngine {
    type Permit = RecordingPermit;

    fn acquire(
        &self,
        identity: &str,
        settings: &ProtectionSettings,
    ) -> Result<Self::Permit, Rejection> {
        self.settings.lock().unwrap().push(settings.clone());

        if let Some(rejection) = self.rejections.lock().unwrap().pop_front() {
            self.record(Signal::Rejected {
                identity: identity.to_string(),
                rejection: rejection.clone(),
            });
            return Err(rejection);
        }

        self.record(Signal::Acquired { identity: identity.to_string() });
        Ok(RecordingPermit { engine: self.clone(), identity: identity.to_string(), settled: false })
    }
}

/// Permit issued by [`RecordingEngine`]
#[derive(Debug)]
pub struct RecordingPermit {
    engine: RecordingEngine,
    identity: String,
    settled: bool,
}

impl Permit for RecordingPermit {
    fn on_success(mut self) {
        self.settled = true;
        self.engine.record(Signal::Success { identity: self.identity.clone() });
    }

    fn on_failure(mut self, error: &(dyn StdError + 'static)) {
        self.settled = true;
        self.engine
            .record(Signal::Failure { identity: self.identity.clone(), error: error.to_string() });
    }
}

impl Drop for RecordingPermit {
    fn drop(&mut self) {
        if !self.settled {
            self.engine.record(Signal::Released { identity: self.identity.clone() });
        }
    }
}
