//! The feeder: hands the inputs, in order, to the worker pool.

use std::panic::{self, AssertUnwindSafe};

use log::trace;

use crate::{
    envelope::{WorkItem, panic_message},
    oneshot::OneshotSender,
    simple_mpmc::Sender,
};

/// Terminal status of the feeder, always reported exactly once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum FeedStatus {
    /// Every input was handed over.
    Completed { fed: usize },
    /// A handoff lost the race against cancellation (or every worker was gone).
    Aborted { fed: usize },
    /// The input iterator panicked after `fed` items.
    Panicked { fed: usize, message: String },
}

/// Sends every input to `work_tx`, then closes it and reports the outcome on `status_tx`.
///
/// `work_tx` is dropped before the status is reported, on every path, so the workers
/// always observe the end of the input stream.
pub(crate) fn feed<I>(
    inputs: I,
    work_tx: Sender<WorkItem<I::Item>>,
    status_tx: OneshotSender<FeedStatus>,
) where
    I: Iterator,
{
    let status = feed_inputs(inputs, &work_tx);
    drop(work_tx);
    trace!("feeder finished: {status:?}");
    status_tx.send(status);
}

fn feed_inputs<I>(inputs: I, work_tx: &Sender<WorkItem<I::Item>>) -> FeedStatus
where
    I: Iterator,
{
    let mut fed = 0;
    let res = panic::catch_unwind(AssertUnwindSafe(|| {
        for (index, input) in inputs.enumerate() {
            if let Err(e) = work_tx.send(WorkItem { index, input }) {
                trace!("feeder stopped at item {index}: {e}");
                return false;
            }
            fed += 1;
        }
        true
    }));
    match res {
        Ok(true) => FeedStatus::Completed { fed },
        Ok(false) => FeedStatus::Aborted { fed },
        Err(payload) => FeedStatus::Panicked {
            fed,
            message: panic_message(payload.as_ref()),
        },
    }
}
