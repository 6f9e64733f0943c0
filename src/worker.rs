// worker.rs — A worker-thread submission channel.
//
// `WorkerChannel` turns any `Executor` (something that can run one
// `Operation` to completion) into a full `Channel` with events, wait
// lists, markers, barriers and both queue ordering modes:
//
//   in-order      → one worker thread runs tasks strictly in submission
//                   order. Completion callbacks fire on that thread.
//   out-of-order  → the worker thread only dispatches; every task runs on
//                   its own thread as soon as its dependencies finish.
//
// SUBMISSION
// ──────────
//   1. `Executor::accept` validates the operation on the submitting thread
//      and, for maps, produces the host pointer. A rejected operation never
//      gets an event.
//   2. Dependencies are resolved under the channel lock: the caller's wait
//      list, plus the most recent barrier, or, for markers and barriers
//      without a wait list, every outstanding operation.
//   3. The task is sent to the worker while still holding the lock, so the
//      FIFO order matches the order dependencies were computed in.
//   4. `Completion::Block` then waits on the task's event.
//
// A task whose dependency finished in an error state is not executed; its
// event finishes with EXEC_STATUS_ERROR_FOR_EVENTS_IN_WAIT_LIST.
//
// A blocking submission (or `finish`) issued from the in-order worker
// thread itself, e.g. from a completion callback, could never complete and
// is rejected with INVALID_OPERATION.

use std::cell::Cell;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;

use crate::error::{status, TransportResult};
use crate::event::{Event, EventStatus};
use crate::memory::MappedRegion;
use crate::transport::{Channel, Completion, Operation, QueueProperties, Receipt};

/// Runs operations for a `WorkerChannel`.
pub trait Executor: Send + Sync + 'static {
    /// Validate `op` at submission time. For map operations, return the
    /// host window the map will expose.
    fn accept(&self, op: &Operation) -> TransportResult<Option<MappedRegion>>;

    /// Run `op` to completion on the calling thread.
    fn execute(&self, op: Operation) -> TransportResult<()>;
}

struct Task {
    op: Operation,
    deps: Vec<Event>,
    event: Event,
}

#[derive(Default)]
struct ChannelState {
    outstanding: Vec<Event>,
    last_barrier: Option<Event>,
}

struct Shared<E> {
    id: u64,
    executor: E,
    profiling: bool,
    state: Mutex<ChannelState>,
}

static NEXT_CHANNEL_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    // Id of the in-order channel whose worker is the current thread, or 0.
    static CURRENT_WORKER: Cell<u64> = const { Cell::new(0) };
}

/// A `Channel` backed by a dedicated worker thread.
pub struct WorkerChannel<E: Executor> {
    shared: Arc<Shared<E>>,
    sender: Mutex<Option<mpsc::Sender<Task>>>,
    properties: QueueProperties,
}

impl<E: Executor> WorkerChannel<E> {
    pub fn new(executor: E, properties: QueueProperties) -> TransportResult<Self> {
        let id = NEXT_CHANNEL_ID.fetch_add(1, Ordering::Relaxed);
        let shared = Arc::new(Shared {
            id,
            executor,
            profiling: properties.contains(QueueProperties::PROFILING_ENABLE),
            state: Mutex::new(ChannelState::default()),
        });
        let out_of_order = properties.contains(QueueProperties::OUT_OF_ORDER_EXEC_MODE_ENABLE);
        let (tx, rx) = mpsc::channel::<Task>();
        let worker_shared = Arc::clone(&shared);
        thread::Builder::new()
            .name(format!("devqueue-worker-{id}"))
            .spawn(move || worker_loop(worker_shared, rx, out_of_order))
            .map_err(|e| {
                tracing::warn!(error = %e, "failed to spawn queue worker");
                status::OUT_OF_RESOURCES
            })?;
        tracing::debug!(channel = id, out_of_order, "worker channel started");
        Ok(WorkerChannel {
            shared,
            sender: Mutex::new(Some(tx)),
            properties,
        })
    }

    pub fn executor(&self) -> &E {
        &self.shared.executor
    }

    fn on_worker_thread(&self) -> bool {
        CURRENT_WORKER.with(|c| c.get() == self.shared.id)
    }
}

impl<E: Executor> Channel for WorkerChannel<E> {
    fn id(&self) -> u64 {
        self.shared.id
    }

    fn submit(
        &self,
        op: Operation,
        deps: &[Event],
        completion: Completion,
    ) -> TransportResult<Receipt> {
        if completion == Completion::Block && self.on_worker_thread() {
            return Err(status::INVALID_OPERATION);
        }
        let mapping = self.shared.executor.accept(&op)?;
        let event = Event::device(self.shared.profiling);

        {
            let mut state = lock(&self.shared.state);
            state.outstanding.retain(|e| !e.is_finished());

            let covers_everything = match &op {
                Operation::Marker | Operation::Barrier => true,
                Operation::MarkerWithWaitList | Operation::BarrierWithWaitList => deps.is_empty(),
                _ => false,
            };
            let mut all_deps = if covers_everything {
                state.outstanding.clone()
            } else {
                deps.to_vec()
            };
            if !covers_everything {
                if let Some(barrier) = state.last_barrier.as_ref().filter(|b| !b.is_finished()) {
                    all_deps.push(barrier.clone());
                }
            }
            if op.is_barrier() {
                state.last_barrier = Some(event.clone());
            }
            state.outstanding.push(event.clone());

            event.transition(EventStatus::Submitted);
            let task = Task {
                op,
                deps: all_deps,
                event: event.clone(),
            };
            let sent = match lock(&self.sender).as_ref() {
                Some(tx) => tx.send(task).is_ok(),
                None => false,
            };
            if !sent {
                event.transition(EventStatus::Error(status::DEVICE_NOT_AVAILABLE));
                return Err(status::DEVICE_NOT_AVAILABLE);
            }
        }

        if completion == Completion::Block {
            if let EventStatus::Error(code) = wait_status(&event) {
                return Err(code);
            }
        }
        Ok(Receipt { event, mapping })
    }

    fn flush(&self) -> TransportResult<()> {
        // Tasks reach the worker as soon as they are submitted.
        Ok(())
    }

    fn finish(&self) -> TransportResult<()> {
        if self.on_worker_thread() {
            return Err(status::INVALID_OPERATION);
        }
        let pending = lock(&self.shared.state).outstanding.clone();
        for event in pending {
            // Failures are reported through each event, not through finish.
            let _ = event.wait();
        }
        Ok(())
    }

    fn properties(&self) -> QueueProperties {
        self.properties
    }
}

impl<E: Executor> Drop for WorkerChannel<E> {
    fn drop(&mut self) {
        // Closing the sender lets the worker drain what is queued and exit.
        // It is not joined: a task may still be waiting on a user event.
        drop(lock(&self.sender).take());
        tracing::debug!(channel = self.shared.id, "worker channel released");
    }
}

fn worker_loop<E: Executor>(shared: Arc<Shared<E>>, rx: mpsc::Receiver<Task>, out_of_order: bool) {
    if !out_of_order {
        CURRENT_WORKER.with(|c| c.set(shared.id));
    }
    for task in rx {
        if !out_of_order {
            run_task(&shared, task);
            continue;
        }
        let event = task.event.clone();
        let task_shared = Arc::clone(&shared);
        let spawned = thread::Builder::new()
            .name(format!("devqueue-task-{}", shared.id))
            .spawn(move || run_task(&task_shared, task));
        if let Err(e) = spawned {
            tracing::warn!(error = %e, "failed to spawn task thread");
            event.transition(EventStatus::Error(status::OUT_OF_RESOURCES));
        }
    }
}

fn run_task<E: Executor>(shared: &Shared<E>, task: Task) {
    let Task { op, deps, event } = task;
    let kind = op.kind();

    for dep in &deps {
        if dep.wait().is_err() {
            tracing::debug!(op = %kind, "dependency failed, operation not run");
            event.transition(EventStatus::Error(
                status::EXEC_STATUS_ERROR_FOR_EVENTS_IN_WAIT_LIST,
            ));
            return;
        }
    }

    event.transition(EventStatus::Running);
    let outcome = if op.is_sync_point() {
        Ok(())
    } else {
        catch_unwind(AssertUnwindSafe(|| shared.executor.execute(op))).unwrap_or_else(|_| {
            tracing::warn!(op = %kind, "operation panicked");
            Err(status::OUT_OF_RESOURCES)
        })
    };

    match outcome {
        Ok(()) => event.transition(EventStatus::Complete),
        Err(code) => {
            tracing::debug!(op = %kind, code, name = status::name(code), "operation failed");
            event.transition(EventStatus::Error(code));
        }
    }
}

fn wait_status(event: &Event) -> EventStatus {
    match event.wait() {
        Ok(()) => EventStatus::Complete,
        Err(e) => EventStatus::Error(e.code()),
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::native::HostCall;
    use std::time::Duration;

    /// Runs native calls, ignores everything else.
    struct CallRunner;

    impl Executor for CallRunner {
        fn accept(&self, _op: &Operation) -> TransportResult<Option<MappedRegion>> {
            Ok(None)
        }

        fn execute(&self, op: Operation) -> TransportResult<()> {
            match op {
                Operation::NativeKernel { call } => call.invoke(),
                _ => Ok(()),
            }
        }
    }

    struct Panicking;

    impl Executor for Panicking {
        fn accept(&self, _op: &Operation) -> TransportResult<Option<MappedRegion>> {
            Ok(None)
        }

        fn execute(&self, _op: Operation) -> TransportResult<()> {
            panic!("executor blew up");
        }
    }

    fn call<F: FnOnce() + Send + 'static>(f: F) -> Operation {
        Operation::NativeKernel {
            call: HostCall::closure(f).into_native(),
        }
    }

    fn recorder() -> Arc<Mutex<Vec<u32>>> {
        Arc::new(Mutex::new(Vec::new()))
    }

    #[test]
    fn test_in_order_runs_fifo() {
        let ch = WorkerChannel::new(CallRunner, QueueProperties::empty()).unwrap();
        let log = recorder();
        for (i, delay) in [(0u32, 30u64), (1, 10), (2, 0)] {
            let log = log.clone();
            ch.submit(
                call(move || {
                    thread::sleep(Duration::from_millis(delay));
                    log.lock().unwrap().push(i);
                }),
                &[],
                Completion::Track,
            )
            .unwrap();
        }
        ch.finish().unwrap();
        assert_eq!(*log.lock().unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn test_out_of_order_honours_wait_list() {
        let props = QueueProperties::OUT_OF_ORDER_EXEC_MODE_ENABLE;
        let ch = WorkerChannel::new(CallRunner, props).unwrap();
        let log = recorder();
        let l1 = log.clone();
        let first = ch
            .submit(
                call(move || {
                    thread::sleep(Duration::from_millis(40));
                    l1.lock().unwrap().push(1);
                }),
                &[],
                Completion::Track,
            )
            .unwrap()
            .event;
        let l2 = log.clone();
        let second = ch
            .submit(call(move || l2.lock().unwrap().push(2)), &[first], Completion::Track)
            .unwrap()
            .event;
        second.wait().unwrap();
        assert_eq!(*log.lock().unwrap(), vec![1, 2]);
    }

    #[test]
    fn test_out_of_order_barrier_orders_later_work() {
        let props = QueueProperties::OUT_OF_ORDER_EXEC_MODE_ENABLE;
        let ch = WorkerChannel::new(CallRunner, props).unwrap();
        let log = recorder();
        let l1 = log.clone();
        ch.submit(
            call(move || {
                thread::sleep(Duration::from_millis(40));
                l1.lock().unwrap().push(1);
            }),
            &[],
            Completion::Track,
        )
        .unwrap();
        ch.submit(Operation::Barrier, &[], Completion::Track).unwrap();
        let l2 = log.clone();
        ch.submit(call(move || l2.lock().unwrap().push(2)), &[], Completion::Block)
            .unwrap();
        assert_eq!(*log.lock().unwrap(), vec![1, 2]);
    }

    #[test]
    fn test_marker_waits_for_everything_before_it() {
        let props = QueueProperties::OUT_OF_ORDER_EXEC_MODE_ENABLE;
        let ch = WorkerChannel::new(CallRunner, props).unwrap();
        let log = recorder();
        for i in 0..4u32 {
            let log = log.clone();
            ch.submit(
                call(move || {
                    thread::sleep(Duration::from_millis(5 * u64::from(i)));
                    log.lock().unwrap().push(i);
                }),
                &[],
                Completion::Track,
            )
            .unwrap();
        }
        ch.submit(Operation::Marker, &[], Completion::Block).unwrap();
        assert_eq!(log.lock().unwrap().len(), 4);
    }

    #[test]
    fn test_failed_dependency_skips_task() {
        let ch = WorkerChannel::new(CallRunner, QueueProperties::empty()).unwrap();
        let failed = Event::device(false);
        failed.transition(EventStatus::Error(status::MAP_FAILURE));
        let ran = Arc::new(Mutex::new(false));
        let r = ran.clone();
        let err = ch
            .submit(call(move || *r.lock().unwrap() = true), &[failed], Completion::Block)
            .unwrap_err();
        assert_eq!(err, status::EXEC_STATUS_ERROR_FOR_EVENTS_IN_WAIT_LIST);
        assert!(!*ran.lock().unwrap());
    }

    #[test]
    fn test_blocking_submit_returns_finished_event() {
        let ch = WorkerChannel::new(CallRunner, QueueProperties::PROFILING_ENABLE).unwrap();
        let receipt = ch
            .submit(call(|| thread::sleep(Duration::from_millis(5))), &[], Completion::Block)
            .unwrap();
        assert_eq!(receipt.event.status(), EventStatus::Complete);
        assert!(receipt.event.duration().is_some());
    }

    #[test]
    fn test_executor_panic_reported_as_status() {
        let ch = WorkerChannel::new(Panicking, QueueProperties::empty()).unwrap();
        let err = ch.submit(call(|| {}), &[], Completion::Block).unwrap_err();
        assert_eq!(err, status::OUT_OF_RESOURCES);
        // The worker survives the panic.
        assert_eq!(
            ch.submit(Operation::Marker, &[], Completion::Block).map(|_| ()),
            Ok(())
        );
    }

    #[test]
    fn test_blocking_submit_from_worker_callback_rejected() {
        let ch = Arc::new(WorkerChannel::new(CallRunner, QueueProperties::empty()).unwrap());
        let first = ch.submit(call(|| {}), &[], Completion::Track).unwrap().event;
        let inner = ch.clone();
        let seen = Arc::new(Mutex::new(None));
        let s = seen.clone();
        let gate = Event::device(false);
        let gate_cb = gate.clone();
        // The gate keeps `first` from finishing before the callback is set.
        let held = ch
            .submit(call(|| {}), &[gate.clone()], Completion::Track)
            .unwrap()
            .event;
        held.set_callback(move |_| {
            let r = inner.submit(Operation::Marker, &[], Completion::Block);
            *s.lock().unwrap() = Some(r.map(|_| ()));
        });
        gate_cb.transition(EventStatus::Complete);
        first.wait().unwrap();
        // In-order: this marker runs only after the callback above returned.
        ch.submit(Operation::Marker, &[], Completion::Block).unwrap();
        assert_eq!(*seen.lock().unwrap(), Some(Err(status::INVALID_OPERATION)));
    }
}
