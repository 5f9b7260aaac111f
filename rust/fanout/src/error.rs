use thiserror::Error;

/// The failure of a parallel run.
///
/// `E` is the error type returned by the work function. Exactly one `RunError` is
/// reported per failed run, however many items failed concurrently.
#[derive(Debug, Error)]
pub enum RunError<E> {
    /// The first failure returned by the work function, as is.
    #[error("{0}")]
    Worker(E),

    /// Feeding the inputs was aborted by the cancellation signal.
    #[error("loop canceled")]
    Canceled,

    /// The work function or the input iterator panicked.
    #[error("worker panicked: {message}")]
    Panicked { message: String },

    /// The run could not be set up (invalid worker count, thread spawn failure).
    #[error(transparent)]
    Config(#[from] fanout_common::error::Error),
}

impl<E> RunError<E> {
    /// Returns the work function's error, if this is a [`RunError::Worker`].
    pub fn into_worker_error(self) -> Option<E> {
        match self {
            RunError::Worker(e) => Some(e),
            _ => None,
        }
    }

    pub fn is_canceled(&self) -> bool {
        matches!(self, RunError::Canceled)
    }

    /// Short description of the variant, usable without `E: Display`.
    pub(crate) fn label(&self) -> &'static str {
        match self {
            RunError::Worker(_) => "work function failed",
            RunError::Canceled => "canceled",
            RunError::Panicked { .. } => "panicked",
            RunError::Config(_) => "invalid configuration",
        }
    }
}
