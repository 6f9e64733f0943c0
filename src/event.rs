// event.rs — Completion events and wait lists.
//
// An `Event` tracks the completion state of one submitted operation. Two
// flavours share the same type:
//
//   device events → created by a channel when an operation is submitted,
//                   driven Queued → Submitted → Running → Complete/Error
//                   by the transport.
//   user events   → created on the host (`UserEvent`) and finished by host
//                   code with `set_status`. Used by the image-walk engine to
//                   hold back an unmap until the host-side walk is done.
//
// Both can go into a `WaitList`, so host-side and device-side completion
// are interchangeable dependency sources.
//
// CALLBACK THREADING
// ──────────────────
// Callbacks fire on whichever thread finishes the event: a transport worker
// for device events, the caller of `set_status` for user events. They run
// after the status lock is released, so a callback may freely query or wait
// on other events (but must not block on the event it is attached to).

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::context::Context;
use crate::error::{status, QueueError, Result};

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Execution status of an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventStatus {
    Queued,
    Submitted,
    Running,
    Complete,
    /// Finished with a (negative) status code.
    Error(i32),
}

impl EventStatus {
    /// Raw OpenCL-style value: 3, 2, 1, 0, or the negative error code.
    pub fn as_raw(self) -> i32 {
        match self {
            EventStatus::Queued => 3,
            EventStatus::Submitted => 2,
            EventStatus::Running => 1,
            EventStatus::Complete => 0,
            EventStatus::Error(code) => code,
        }
    }

    pub fn from_raw(raw: i32) -> Self {
        match raw {
            3 => EventStatus::Queued,
            2 => EventStatus::Submitted,
            1 => EventStatus::Running,
            0 => EventStatus::Complete,
            code => EventStatus::Error(code),
        }
    }

    /// `true` once the event can no longer change.
    pub fn is_terminal(self) -> bool {
        matches!(self, EventStatus::Complete | EventStatus::Error(_))
    }
}

impl fmt::Display for EventStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventStatus::Queued => write!(f, "queued"),
            EventStatus::Submitted => write!(f, "submitted"),
            EventStatus::Running => write!(f, "running"),
            EventStatus::Complete => write!(f, "complete"),
            EventStatus::Error(code) => write!(f, "error {code} ({})", status::name(*code)),
        }
    }
}

// ---------------------------------------------------------------------------
// Profiling
// ---------------------------------------------------------------------------

/// Timestamps of the status transitions of one event.
///
/// Only recorded when the producing queue was created with
/// `QueueProperties::PROFILING_ENABLE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventProfile {
    pub queued: Instant,
    pub submitted: Option<Instant>,
    pub started: Option<Instant>,
    pub ended: Option<Instant>,
}

impl EventProfile {
    /// Time from start of execution to completion, once both are known.
    pub fn execution_time(&self) -> Option<Duration> {
        Some(self.ended?.duration_since(self.started?))
    }
}

// ---------------------------------------------------------------------------
// Event
// ---------------------------------------------------------------------------

type Callback = Box<dyn FnOnce(EventStatus) + Send + 'static>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EventKind {
    Device,
    User,
}

struct EventState {
    status: EventStatus,
    callbacks: Vec<Callback>,
    profile: Option<EventProfile>,
}

struct EventInner {
    id: u64,
    kind: EventKind,
    state: Mutex<EventState>,
    cond: Condvar,
}

static NEXT_EVENT_ID: AtomicU64 = AtomicU64::new(1);

/// A handle to the completion state of one operation.
///
/// Cloning is cheap and yields another handle to the same event. The
/// default value is the *null event*: it reports `Complete` and waiting on
/// it returns immediately. Pass `Some(&mut event)` to an enqueue call to
/// get asynchronous submission; the queue stores the new event there.
#[derive(Clone, Default)]
pub struct Event {
    inner: Option<Arc<EventInner>>,
}

impl Event {
    /// The null event.
    pub fn null() -> Self {
        Event { inner: None }
    }

    /// A fresh device event in the `Queued` state.
    pub(crate) fn device(profiling: bool) -> Self {
        Self::with_status(EventKind::Device, EventStatus::Queued, profiling)
    }

    fn with_status(kind: EventKind, status: EventStatus, profiling: bool) -> Self {
        let profile = profiling.then(|| EventProfile {
            queued: Instant::now(),
            submitted: None,
            started: None,
            ended: None,
        });
        Event {
            inner: Some(Arc::new(EventInner {
                id: NEXT_EVENT_ID.fetch_add(1, Ordering::Relaxed),
                kind,
                state: Mutex::new(EventState {
                    status,
                    callbacks: Vec::new(),
                    profile,
                }),
                cond: Condvar::new(),
            })),
        }
    }

    pub fn is_null(&self) -> bool {
        self.inner.is_none()
    }

    /// Unique id of this event (0 for the null event).
    pub fn id(&self) -> u64 {
        self.inner.as_ref().map_or(0, |i| i.id)
    }

    /// `true` for host-settable events created through [`UserEvent`].
    pub fn is_user(&self) -> bool {
        self.inner.as_ref().is_some_and(|i| i.kind == EventKind::User)
    }

    /// Current status. The null event is always `Complete`.
    pub fn status(&self) -> EventStatus {
        match &self.inner {
            None => EventStatus::Complete,
            Some(inner) => lock(&inner.state).status,
        }
    }

    /// `true` once the event reached `Complete` or an error state.
    pub fn is_finished(&self) -> bool {
        self.status().is_terminal()
    }

    /// Block the calling thread until the event finishes.
    ///
    /// Returns `Err(QueueError::Transport)` carrying the error code when the
    /// operation finished in an error state.
    pub fn wait(&self) -> Result<()> {
        let Some(inner) = &self.inner else {
            return Ok(());
        };
        let mut state = lock(&inner.state);
        while !state.status.is_terminal() {
            state = inner
                .cond
                .wait(state)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
        match state.status {
            EventStatus::Error(code) => Err(QueueError::transport(code)),
            _ => Ok(()),
        }
    }

    /// Like [`wait`](Self::wait) but gives up after `timeout`.
    ///
    /// Returns `Ok(false)` if the event was still pending when the timeout
    /// elapsed.
    pub fn wait_timeout(&self, timeout: Duration) -> Result<bool> {
        let Some(inner) = &self.inner else {
            return Ok(true);
        };
        let deadline = Instant::now() + timeout;
        let mut state = lock(&inner.state);
        while !state.status.is_terminal() {
            let now = Instant::now();
            if now >= deadline {
                return Ok(false);
            }
            let (guard, _) = inner
                .cond
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            state = guard;
        }
        match state.status {
            EventStatus::Error(code) => Err(QueueError::transport(code)),
            _ => Ok(true),
        }
    }

    /// Register a continuation that runs once the event finishes.
    ///
    /// If the event has already finished the callback runs immediately on
    /// the calling thread. On the null event it runs immediately with
    /// `Complete`.
    pub fn set_callback<F>(&self, callback: F)
    where
        F: FnOnce(EventStatus) + Send + 'static,
    {
        let Some(inner) = &self.inner else {
            callback(EventStatus::Complete);
            return;
        };
        let mut state = lock(&inner.state);
        if state.status.is_terminal() {
            let status = state.status;
            drop(state);
            callback(status);
        } else {
            state.callbacks.push(Box::new(callback));
        }
    }

    /// Profiling timestamps, if the producing queue recorded them.
    pub fn profile(&self) -> Option<EventProfile> {
        self.inner.as_ref().and_then(|i| lock(&i.state).profile)
    }

    /// Execution time (start → end), if profiled and finished.
    pub fn duration(&self) -> Option<Duration> {
        self.profile().and_then(|p| p.execution_time())
    }

    /// Move the event to `status`.
    ///
    /// Terminal statuses are sticky: once finished, later transitions are
    /// ignored. Reaching a terminal status wakes all waiters and fires the
    /// registered callbacks, outside the lock, in registration order.
    pub(crate) fn transition(&self, status: EventStatus) {
        let Some(inner) = &self.inner else {
            return;
        };
        let callbacks = {
            let mut state = lock(&inner.state);
            if state.status.is_terminal() {
                return;
            }
            state.status = status;
            if let Some(profile) = state.profile.as_mut() {
                let now = Instant::now();
                match status {
                    EventStatus::Queued => {}
                    EventStatus::Submitted => profile.submitted = Some(now),
                    EventStatus::Running => profile.started = Some(now),
                    EventStatus::Complete | EventStatus::Error(_) => {
                        profile.started.get_or_insert(now);
                        profile.ended = Some(now);
                    }
                }
            }
            if !status.is_terminal() {
                return;
            }
            inner.cond.notify_all();
            std::mem::take(&mut state.callbacks)
        };
        for callback in callbacks {
            callback(status);
        }
    }

    /// `true` when both handles refer to the same event.
    pub fn ptr_eq(&self, other: &Event) -> bool {
        match (&self.inner, &other.inner) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            (None, None) => true,
            _ => false,
        }
    }
}

impl PartialEq for Event {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for Event {}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.inner {
            None => write!(f, "Event(null)"),
            Some(inner) => f
                .debug_struct("Event")
                .field("id", &inner.id)
                .field("kind", &inner.kind)
                .field("status", &self.status())
                .finish(),
        }
    }
}

fn lock(state: &Mutex<EventState>) -> MutexGuard<'_, EventState> {
    // A panicking callback never holds this lock, so poisoning only happens
    // if a panic escapes the transition bookkeeping itself; the state is
    // still consistent in that case.
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ---------------------------------------------------------------------------
// UserEvent
// ---------------------------------------------------------------------------

/// A host-settable event.
///
/// Starts in `Submitted` and stays there until host code calls
/// [`set_status`](Self::set_status) with a terminal status. Anything that
/// has the event in its wait list is held back until then.
#[derive(Clone, Debug)]
pub struct UserEvent {
    event: Event,
    context: Context,
}

impl UserEvent {
    /// Create a user event in `context`.
    pub fn new(context: &Context) -> Self {
        UserEvent {
            event: Event::with_status(EventKind::User, EventStatus::Submitted, false),
            context: context.clone(),
        }
    }

    /// The context the event was created in.
    pub fn context(&self) -> &Context {
        &self.context
    }

    /// Finish the event. Only `Complete` or `Error(code)` with a negative
    /// code are valid; anything else is a caller bug.
    pub fn set_status(&self, status: EventStatus) {
        assert!(
            match status {
                EventStatus::Complete => true,
                EventStatus::Error(code) => code < 0,
                _ => false,
            },
            "user event status must be Complete or a negative error code, got {status:?}"
        );
        self.event.transition(status);
    }

    pub fn set_complete(&self) {
        self.set_status(EventStatus::Complete);
    }

    /// The underlying event handle.
    pub fn event(&self) -> &Event {
        &self.event
    }

    pub fn into_event(self) -> Event {
        self.event
    }
}

impl std::ops::Deref for UserEvent {
    type Target = Event;

    fn deref(&self) -> &Event {
        &self.event
    }
}

impl From<UserEvent> for Event {
    fn from(user: UserEvent) -> Event {
        user.event
    }
}

impl From<&UserEvent> for Event {
    fn from(user: &UserEvent) -> Event {
        user.event.clone()
    }
}

// ---------------------------------------------------------------------------
// WaitList
// ---------------------------------------------------------------------------

/// Ordered set of events a new submission must wait for.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct WaitList {
    events: Vec<Event>,
}

impl WaitList {
    pub fn new() -> Self {
        WaitList { events: Vec::new() }
    }

    /// Append an event. Null events are a caller bug: they would stand for
    /// a completion that never existed.
    pub fn insert(&mut self, event: impl Into<Event>) {
        let event = event.into();
        assert!(!event.is_null(), "cannot insert a null event into a wait list");
        self.events.push(event);
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Alias of [`len`](Self::len).
    pub fn size(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// The events as one contiguous slice, in insertion order.
    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Event> {
        self.events.iter()
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }

    /// Block until every event has finished. Returns the first error
    /// encountered, after waiting for all of them.
    pub fn wait(&self) -> Result<()> {
        let mut first_err = None;
        for event in &self.events {
            if let Err(e) = event.wait() {
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }
}

impl From<Event> for WaitList {
    fn from(event: Event) -> Self {
        let mut list = WaitList::new();
        list.insert(event);
        list
    }
}

impl FromIterator<Event> for WaitList {
    fn from_iter<I: IntoIterator<Item = Event>>(iter: I) -> Self {
        let mut list = WaitList::new();
        for event in iter {
            list.insert(event);
        }
        list
    }
}

impl Extend<Event> for WaitList {
    fn extend<I: IntoIterator<Item = Event>>(&mut self, iter: I) {
        for event in iter {
            self.insert(event);
        }
    }
}

impl<'a> IntoIterator for &'a WaitList {
    type Item = &'a Event;
    type IntoIter = std::slice::Iter<'a, Event>;

    fn into_iter(self) -> Self::IntoIter {
        self.events.iter()
    }
}
