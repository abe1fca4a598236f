//! Interview-practice client core: streamed multi-model answer scoring.
//!
//! Three layers, leaves first:
//!
//! - [`sse`] — the wire: streamed HTTP POSTs decoded incrementally into the
//!   typed [`events::StreamEvent`] vocabulary, with cooperative cancellation.
//! - [`session`] — the coordinator: one state-machine cell per
//!   answer-slot × model pair, concurrent fan-out, generation-guarded
//!   cancellation on resubmit, computed all-done detection, plus the two-slot
//!   battle and follow-up extensions. Consumers subscribe to atomic
//!   [`session::SessionSnapshot`] updates.
//! - [`aggregate`] — pure post-processing of terminal results: composite
//!   score, best-answer selection, correction banner, speech summary.
//!
//! [`api`] covers the plain REST lookups a session needs before submitting;
//! [`config`] and [`cli`] belong to the terminal binary.

pub mod aggregate;
pub mod api;
pub mod cli;
pub mod config;
pub mod error;
pub mod events;
pub mod session;
pub mod sse;

pub use error::{Error, Result};
pub use events::{AnswerResult, BattleResult, StreamEvent};
pub use session::{SessionCoordinator, SessionSnapshot};
