//! Testing utilities and helpers
//!
//! - **[`mocks`]**: spy implementation of the protection engine contract
//!
//! [`MockClock`] is re-exported for deterministic circuit cooldowns.
//!
//! ## Usage
//!
//! ```rust
//! use floodgate_common::testing::{MockClock, RecordingEngine};
//!
//! let engine = RecordingEngine::new();
//! assert!(engine.is_untouched());
//!
//! let clock = MockClock::new();
//! clock.advance(std::time::Duration::from_secs(5));
//! ```

pub mod mocks;

pub use mocks::{RecordingEngine, RecordingPermit, Signal};

pub use crate::resilience::MockClock;
