//! Values in transit between the feeder, the workers and the collector.

use std::any::Any;

/// An input value tagged with its position in the input sequence.
#[derive(Debug)]
pub(crate) struct WorkItem<In> {
    pub index: usize,
    pub input: In,
}

/// The result of applying the work function to one [`WorkItem`].
pub(crate) struct Envelope<Out, E> {
    pub index: usize,
    pub outcome: Outcome<Out, E>,
}

pub(crate) enum Outcome<Out, E> {
    Ok(Out),
    Failed(E),
    Panicked(String),
}

impl<Out, E> Envelope<Out, E> {
    pub fn from_result(index: usize, result: Result<Out, E>) -> Self {
        let outcome = match result {
            Ok(out) => Outcome::Ok(out),
            Err(e) => Outcome::Failed(e),
        };
        Envelope { index, outcome }
    }

    pub fn panicked(index: usize, message: String) -> Self {
        Envelope {
            index,
            outcome: Outcome::Panicked(message),
        }
    }
}

/// Extracts a readable message from a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
