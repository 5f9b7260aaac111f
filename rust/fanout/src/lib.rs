//! Bounded parallel execution with fail-fast cancellation.
//!
//! [`parallel_run`] (or the configurable [`FanOut`]) applies a work function to every
//! element of an input sequence on a fixed number of worker threads and returns either
//! every output, or the first error.
//!
//! # Key Components
//!
//! - `feeder` - hands the inputs to the workers in sequence order
//! - `worker` - the worker loop, and the closer that ends the results stream once
//!   every worker is done
//! - [`orchestrator`] - starts the threads of a run and collects the results
//!
//! ## Synchronization
//!
//! - [`cancel`] - one-shot broadcast [`CancelSignal`]
//! - [`simple_mpmc`] - bounded multi-producer, multi-consumer channels whose blocking
//!   operations race against a [`CancelSignal`]
//! - [`oneshot`] - single-value channel carrying the feeder's final status
//!
//! # Run Lifecycle
//!
//! 1. The orchestrator creates the run's cancellation signal and arms a guard that
//!    closes it on every exit path.
//! 2. The feeder, `worker_count` workers and one closer are started on scoped threads.
//! 3. The orchestrator drains the results. The first failure ends the run right away;
//!    the guard then cancels every thread still blocked on a channel.
//! 4. After a complete drain, the run succeeds only if its signal is still open and
//!    the feeder handed over exactly as many inputs as there are results; otherwise it
//!    returns [`RunError::Canceled`].
//!
//! No thread of a run survives the call. Outputs are returned in arrival order unless
//! [`ResultOrder::Input`] is requested.

pub mod cancel;
mod envelope;
pub mod error;
mod feeder;
pub mod oneshot;
pub mod orchestrator;
pub mod simple_mpmc;
mod worker;

pub use cancel::{CancelGuard, CancelListener, CancelSignal};
pub use error::RunError;
pub use orchestrator::{FanOut, ResultOrder, parallel_run};
