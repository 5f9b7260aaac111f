//! Worker loop and the closer that ends the results stream.

use std::{
    panic::{self, AssertUnwindSafe},
    thread::ScopedJoinHandle,
};

use log::{trace, warn};

use crate::{
    envelope::{Envelope, WorkItem, panic_message},
    simple_mpmc::{Receiver, Sender},
};

/// Pulls work items until the input stream ends or the run is cancelled.
///
/// Every item is turned into exactly one [`Envelope`]; a panic in `f` becomes a
/// panicked envelope. If the envelope cannot be delivered (cancellation), it is
/// dropped and the worker exits without reading further items.
pub(crate) fn work<In, Out, E, F>(
    id: usize,
    work_rx: Receiver<WorkItem<In>>,
    results_tx: Sender<Envelope<Out, E>>,
    f: &F,
) where
    F: Fn(In) -> Result<Out, E>,
{
    let mut processed = 0usize;
    loop {
        let WorkItem { index, input } = match work_rx.recv() {
            Ok(item) => item,
            Err(e) => {
                trace!("worker {id} exiting after {processed} items: {e}");
                return;
            }
        };

        let envelope = match panic::catch_unwind(AssertUnwindSafe(|| f(input))) {
            Ok(res) => Envelope::from_result(index, res),
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                warn!("worker {id} panicked on item {index}: {message}");
                Envelope::panicked(index, message)
            }
        };

        if let Err(e) = results_tx.send(envelope) {
            trace!("worker {id} dropped the result of item {index}: {e}");
            return;
        }
        processed += 1;
    }
}

/// Waits for every worker to finish, then closes the results stream.
///
/// A worker thread that died outside the guarded call is reported as a panicked
/// envelope before the stream is closed.
pub(crate) fn close_results<Out, E>(
    workers: Vec<ScopedJoinHandle<'_, ()>>,
    results_tx: Sender<Envelope<Out, E>>,
) {
    let count = workers.len();
    for (id, handle) in workers.into_iter().enumerate() {
        if let Err(payload) = handle.join() {
            let message = panic_message(payload.as_ref());
            warn!("worker {id} terminated abnormally: {message}");
            let _ = results_tx.send(Envelope::panicked(usize::MAX, message));
        }
    }
    trace!("all {count} workers finished, closing results");
    drop(results_tx);
}
