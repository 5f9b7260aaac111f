//! The run orchestrator: wires the feeder, the worker pool and the closer together and
//! collects the results.
//!
//! Every thread of a run is scoped to the call. The run's cancellation signal is closed
//! by a guard as soon as the collector is done (successfully or not), which unblocks any
//! thread still racing a channel operation, and the scope then joins all of them before
//! the call returns.

use std::thread;

use fanout_common::error::Error;
use log::debug;

use crate::{
    cancel::CancelSignal,
    envelope::{Envelope, Outcome, WorkItem},
    error::RunError,
    feeder::{self, FeedStatus},
    oneshot::{self, OneshotReceiver},
    simple_mpmc::{self, DequeueError, Receiver},
    worker,
};

/// Capacity of the work and results channels. A handoff completes as soon as the
/// receiving side has room for one item.
const CHANNEL_BOUND: usize = 1;

/// Order of the values returned by a successful run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResultOrder {
    /// The order in which workers published their results. Not deterministic.
    #[default]
    Arrival,
    /// The order of the corresponding inputs.
    Input,
}

/// Applies `f` to every input on `worker_count` threads and collects the results.
///
/// Returns the outputs in arrival order, or the first error reported by `f`. See
/// [`FanOut::run`] for the details.
pub fn parallel_run<In, Out, E, F, I>(
    worker_count: usize,
    f: F,
    inputs: I,
) -> Result<Vec<Out>, RunError<E>>
where
    I: IntoIterator<Item = In>,
    I::IntoIter: Send,
    In: Send,
    Out: Send,
    E: Send,
    F: Fn(In) -> Result<Out, E> + Sync,
{
    FanOut::new(worker_count).run(f, inputs)
}

/// Configuration of a parallel run.
///
/// ```
/// use fanout::{FanOut, ResultOrder};
///
/// let doubled = FanOut::new(4)
///     .order(ResultOrder::Input)
///     .run(|x: u32| Ok::<_, String>(x * 2), 0..10)
///     .unwrap();
/// assert_eq!(doubled, (0..10).map(|x| x * 2).collect::<Vec<_>>());
/// ```
#[derive(Debug, Clone)]
pub struct FanOut {
    worker_count: usize,
    thread_name: String,
    order: ResultOrder,
}

impl FanOut {
    /// Creates a configuration that runs `worker_count` workers.
    ///
    /// A zero count is rejected when the run starts.
    pub fn new(worker_count: usize) -> FanOut {
        FanOut {
            worker_count,
            thread_name: "fanout".to_string(),
            order: ResultOrder::default(),
        }
    }

    /// Creates a configuration with one worker per logical CPU, or 8 workers if the
    /// CPU count cannot be determined.
    pub fn with_default_workers() -> FanOut {
        let worker_count = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(8);
        Self::new(worker_count)
    }

    /// Sets the prefix of the thread names (`<prefix>-feeder`, `<prefix>-worker-<i>`,
    /// `<prefix>-closer`).
    pub fn thread_name(mut self, prefix: impl Into<String>) -> FanOut {
        self.thread_name = prefix.into();
        self
    }

    /// Sets the order of the returned values.
    pub fn order(mut self, order: ResultOrder) -> FanOut {
        self.order = order;
        self
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    /// Applies `f` to every input and collects the results.
    ///
    /// Inputs are handed to the workers in sequence order. On success the returned
    /// vector holds exactly one output per input. As soon as any invocation of `f`
    /// fails (or panics) the run is cancelled, every other result is discarded and
    /// that first error is returned.
    ///
    /// All threads started by the run have terminated when this returns. An
    /// invocation of `f` that is already executing is not interrupted, so the call
    /// returns once it completes.
    ///
    /// The work channel buffers one item, so the feeder may pull one input from
    /// `inputs` ahead of the next idle worker.
    pub fn run<In, Out, E, F, I>(&self, f: F, inputs: I) -> Result<Vec<Out>, RunError<E>>
    where
        I: IntoIterator<Item = In>,
        I::IntoIter: Send,
        In: Send,
        Out: Send,
        E: Send,
        F: Fn(In) -> Result<Out, E> + Sync,
    {
        let signal = CancelSignal::new();
        self.execute(&signal, f, inputs)
    }

    /// Same as [`run`](Self::run), but the run is also cancelled when `cancel` closes.
    ///
    /// A run cancelled this way returns [`RunError::Canceled`] unless a work function
    /// failure was collected first. Closing the run's own signal never closes `cancel`.
    pub fn run_with_cancel<'a, In, Out, E, F, I>(
        &self,
        cancel: &CancelSignal<'a>,
        f: F,
        inputs: I,
    ) -> Result<Vec<Out>, RunError<E>>
    where
        I: IntoIterator<Item = In>,
        I::IntoIter: Send,
        In: Send + 'a,
        Out: Send + 'a,
        E: Send + 'a,
        F: Fn(In) -> Result<Out, E> + Sync,
    {
        let signal = cancel.child();
        self.execute(&signal, f, inputs)
    }

    fn execute<'a, In, Out, E, F, I>(
        &self,
        signal: &CancelSignal<'a>,
        f: F,
        inputs: I,
    ) -> Result<Vec<Out>, RunError<E>>
    where
        I: IntoIterator<Item = In>,
        I::IntoIter: Send,
        In: Send + 'a,
        Out: Send + 'a,
        E: Send + 'a,
        F: Fn(In) -> Result<Out, E> + Sync,
    {
        let worker_count = self.worker_count;
        fanout_common::verify_arg!(worker_count, worker_count > 0);
        let thread_name = &self.thread_name;
        fanout_common::verify_arg!(thread_name, !thread_name.contains('\0'));

        debug!(
            "{}: starting run with {worker_count} workers, {:?} order",
            self.thread_name, self.order
        );

        let res: Result<Vec<Out>, RunError<E>> = thread::scope(|s| {
            // Closed on every exit path of the collector, before the scope joins.
            let _cancel_on_exit = signal.cancel_on_drop();

            let (work_tx, work_rx) =
                simple_mpmc::cancellable_channel::<WorkItem<In>>(CHANNEL_BOUND, signal);
            let (results_tx, results_rx) =
                simple_mpmc::cancellable_channel::<Envelope<Out, E>>(CHANNEL_BOUND, signal);
            let (status_tx, status_rx) = oneshot::channel::<FeedStatus>();

            let inputs = inputs.into_iter();
            thread::Builder::new()
                .name(format!("{}-feeder", self.thread_name))
                .spawn_scoped(s, move || feeder::feed(inputs, work_tx, status_tx))
                .map_err(|e| Error::io("spawn feeder thread", e))?;

            let f = &f;
            let mut workers = Vec::with_capacity(worker_count);
            for id in 0..worker_count {
                let work_rx = work_rx.clone();
                let results_tx = results_tx.clone();
                let handle = thread::Builder::new()
                    .name(format!("{}-worker-{id}", self.thread_name))
                    .spawn_scoped(s, move || worker::work(id, work_rx, results_tx, f))
                    .map_err(|e| Error::io("spawn worker thread", e))?;
                workers.push(handle);
            }
            drop(work_rx);

            thread::Builder::new()
                .name(format!("{}-closer", self.thread_name))
                .spawn_scoped(s, move || worker::close_results(workers, results_tx))
                .map_err(|e| Error::io("spawn closer thread", e))?;

            collect_results(signal, results_rx, status_rx, self.order)
        });

        match &res {
            Ok(results) => debug!(
                "{}: run completed with {} results",
                self.thread_name,
                results.len()
            ),
            Err(e) => debug!("{}: run failed: {}", self.thread_name, e.label()),
        }
        res
    }
}

impl Default for FanOut {
    fn default() -> Self {
        Self::with_default_workers()
    }
}

/// Drains the results stream, then checks how the feeder ended.
///
/// Returns on the first failed envelope without waiting for the rest of the stream.
/// A complete drain only counts as success if `signal` is still open: listeners are
/// notified one by one, so workers can see a cancelled work channel and close the
/// results stream before the results channel itself is cancelled.
fn collect_results<Out, E>(
    signal: &CancelSignal<'_>,
    results_rx: Receiver<Envelope<Out, E>>,
    status_rx: OneshotReceiver<FeedStatus>,
    order: ResultOrder,
) -> Result<Vec<Out>, RunError<E>> {
    let mut results = Vec::new();
    let drained = loop {
        match results_rx.recv() {
            Ok(Envelope { index, outcome }) => match outcome {
                Outcome::Ok(out) => results.push((index, out)),
                Outcome::Failed(e) => return Err(RunError::Worker(e)),
                Outcome::Panicked(message) => return Err(RunError::Panicked { message }),
            },
            Err(DequeueError::Disconnected) => break true,
            Err(DequeueError::Cancelled) => break false,
        }
    };
    if !drained || signal.is_cancelled() {
        return Err(RunError::Canceled);
    }

    match status_rx.recv() {
        Some(FeedStatus::Completed { fed }) if fed != results.len() => {
            debug!("feeder handed over {fed} items, {} results collected", results.len());
            return Err(RunError::Canceled);
        }
        Some(FeedStatus::Completed { .. }) => {}
        Some(FeedStatus::Aborted { .. }) => return Err(RunError::Canceled),
        Some(FeedStatus::Panicked { message, .. }) => {
            return Err(RunError::Panicked { message });
        }
        None => {
            let err = Error::invalid_operation("feeder exited without reporting a status");
            return Err(err.into());
        }
    }

    if order == ResultOrder::Input {
        results.sort_unstable_by_key(|&(index, _)| index);
    }
    Ok(results.into_iter().map(|(_, out)| out).collect())
}

#[cfg(test)]
mod tests {
    use std::{
        sync::atomic::{AtomicUsize, Ordering},
        time::Duration,
    };

    use super::*;

    #[test]
    fn test_empty_input() {
        let results = parallel_run(4, |x: u8| Ok::<_, ()>(x), Vec::new()).unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn test_zero_workers_is_rejected() {
        let calls = AtomicUsize::new(0);
        let err = parallel_run(
            0,
            |x: u32| {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, ()>(x)
            },
            0..10,
        )
        .unwrap_err();
        match err {
            RunError::Config(e) => assert!(matches!(
                e.kind(),
                fanout_common::error::ErrorKind::InvalidArgument { .. }
            )),
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_input_order() {
        let results = FanOut::new(8)
            .order(ResultOrder::Input)
            .run(
                |x: u64| {
                    std::thread::sleep(Duration::from_millis((50 - x) % 7));
                    Ok::<_, ()>(x + 1)
                },
                0..50u64,
            )
            .unwrap();
        assert_eq!(results, (1..=50).collect::<Vec<_>>());
    }

    #[test]
    fn test_borrowed_inputs() {
        let words = ["alpha", "beta", "gamma"].map(String::from);
        let mut upper =
            parallel_run(2, |w: &String| Ok::<_, ()>(w.to_uppercase()), &words).unwrap();
        upper.sort_unstable();
        assert_eq!(upper, vec!["ALPHA", "BETA", "GAMMA"]);
    }

    #[test]
    fn test_thread_names() {
        let names = FanOut::new(3)
            .thread_name("probe")
            .order(ResultOrder::Input)
            .run(
                |_: usize| {
                    Ok::<_, ()>(std::thread::current().name().map(str::to_string))
                },
                0..12,
            )
            .unwrap();
        assert_eq!(names.len(), 12);
        assert!(names.iter().all(Option::is_some));
        assert!(
            names
                .iter()
                .flatten()
                .all(|name| name.starts_with("probe-worker-"))
        );
    }

    #[test]
    fn test_default_workers() {
        let fan_out = FanOut::default();
        assert!(fan_out.worker_count() >= 1);
        let results = fan_out.run(|x: i32| Ok::<_, ()>(-x), [1, 2, 3]).unwrap();
        assert_eq!(results.iter().sum::<i32>(), -6);
    }

    #[test]
    fn test_panic_becomes_error() {
        let err = parallel_run(
            4,
            |x: u32| {
                if x == 17 {
                    panic!("cannot handle {x}");
                }
                Ok::<_, ()>(x)
            },
            0..40,
        )
        .unwrap_err();
        match err {
            RunError::Panicked { message } => assert_eq!(message, "cannot handle 17"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_input_iterator_panic_becomes_error() {
        let inputs = (0..10u32).map(|x| {
            if x == 6 {
                panic!("input source failed");
            }
            x
        });
        let err = parallel_run(3, |x: u32| Ok::<_, ()>(x), inputs).unwrap_err();
        match err {
            RunError::Panicked { message } => assert_eq!(message, "input source failed"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_external_cancel() {
        let cancel = CancelSignal::new();
        let started = AtomicUsize::new(0);
        let err = std::thread::scope(|s| {
            s.spawn(|| {
                while started.load(Ordering::SeqCst) == 0 {
                    std::thread::yield_now();
                }
                cancel.cancel();
            });
            FanOut::new(2)
                .run_with_cancel(
                    &cancel,
                    |x: u32| {
                        started.fetch_add(1, Ordering::SeqCst);
                        std::thread::sleep(Duration::from_millis(5));
                        Ok::<_, String>(x)
                    },
                    0..10_000,
                )
                .unwrap_err()
        });
        assert!(err.is_canceled(), "unexpected error: {err:?}");
        assert!(started.load(Ordering::SeqCst) < 10_000);
    }

    #[test]
    fn test_already_cancelled_signal() {
        let cancel = CancelSignal::new();
        cancel.cancel();
        let err = FanOut::new(2)
            .run_with_cancel(&cancel, |x: u32| Ok::<_, ()>(x), 0..5)
            .unwrap_err();
        assert!(err.is_canceled());
    }

    /// Dropping the second input is slow, which stretches the window between the
    /// work channel and the results channel being cancelled.
    struct SlowDrop(u32);

    impl Drop for SlowDrop {
        fn drop(&mut self) {
            if self.0 == 1 {
                std::thread::sleep(Duration::from_millis(200));
            }
        }
    }

    #[test]
    fn test_cancel_with_buffered_input_after_feed_completed() {
        let cancel = CancelSignal::new();
        let res = std::thread::scope(|s| {
            s.spawn(|| {
                std::thread::sleep(Duration::from_millis(20));
                cancel.cancel();
            });
            // One worker busy with item 0; item 1 waits in the work channel and the
            // feeder has already reported completion when the cancel arrives.
            FanOut::new(1).run_with_cancel(
                &cancel,
                |item: SlowDrop| {
                    std::thread::sleep(Duration::from_millis(60));
                    Ok::<_, ()>(item.0)
                },
                vec![SlowDrop(0), SlowDrop(1)],
            )
        });
        match res {
            Err(err) => assert!(err.is_canceled(), "unexpected error: {err:?}"),
            Ok(partial) => panic!("cancelled run returned {partial:?}"),
        }
    }

    #[test]
    fn test_cancel_after_feed_completed() {
        let cancel = CancelSignal::new();
        let started = AtomicUsize::new(0);
        let res = std::thread::scope(|s| {
            s.spawn(|| {
                while started.load(Ordering::SeqCst) < 2 {
                    std::thread::yield_now();
                }
                cancel.cancel();
            });
            FanOut::new(2).run_with_cancel(
                &cancel,
                |x: u32| {
                    started.fetch_add(1, Ordering::SeqCst);
                    std::thread::sleep(Duration::from_millis(50));
                    Ok::<_, ()>(x)
                },
                0..2,
            )
        });
        match res {
            Err(err) => assert!(err.is_canceled(), "unexpected error: {err:?}"),
            Ok(partial) => panic!("cancelled run returned {partial:?}"),
        }
    }

    #[test]
    fn test_nul_in_thread_name_is_rejected() {
        let err = FanOut::new(2)
            .thread_name("bad\0name")
            .run(|x: u32| Ok::<_, ()>(x), 0..4)
            .unwrap_err();
        match err {
            RunError::Config(e) => match e.kind() {
                fanout_common::error::ErrorKind::InvalidArgument { name, .. } => {
                    assert_eq!(name, "thread_name")
                }
                other => panic!("unexpected kind: {other:?}"),
            },
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_run_does_not_cancel_parent() {
        let cancel = CancelSignal::new();
        let results = FanOut::new(2)
            .run_with_cancel(&cancel, |x: u32| Ok::<_, ()>(x), 0..5)
            .unwrap();
        assert_eq!(results.len(), 5);
        assert!(!cancel.is_cancelled());
    }
}
