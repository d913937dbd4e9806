//! Foreground and background operation of the engine.

use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// How the application currently lets the engine run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationState {
    /// The application is in the foreground.
    Foreground,
    /// Suspended in the background.
    Background,
    /// In the background with an ongoing call.
    BackgroundCall,
    /// In the background, serving a background fetch.
    BackgroundFetch,
    /// In the background, finishing a background task.
    BackgroundTask,
}

impl OperationState {
    /// Returns the state label.
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationState::Foreground => "foreground",
            OperationState::Background => "background",
            OperationState::BackgroundCall => "backgroundCall",
            OperationState::BackgroundFetch => "backgroundFetch",
            OperationState::BackgroundTask => "backgroundTask",
        }
    }
}

impl fmt::Display for OperationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result reported to a background fetch handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchResult {
    /// New data was downloaded.
    NewData,
    /// Nothing new.
    NoData,
    /// The fetch failed or timed out.
    Failed,
}

/// Result reported to a background task handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackgroundTaskResult {
    /// The task finished.
    Finished,
    /// The task failed or timed out.
    Failed,
}

/// Completion handler of a background fetch.
pub type FetchHandler = Box<dyn FnOnce(FetchResult) + Send>;

/// Completion handler of a background task.
pub type BackgroundTaskHandler = Box<dyn FnOnce(BackgroundTaskResult) + Send>;

/// Receives operation state changes.
pub trait OperationStatusDelegate: Send + Sync {
    /// The operation state changed.
    fn operation_state_did_change(&self, state: OperationState);
}

struct Pending<H> {
    handler: H,
    deadline: Instant,
}

struct Inner {
    in_background: bool,
    ongoing_call: bool,
    fetch: Option<Pending<FetchHandler>>,
    task: Option<Pending<BackgroundTaskHandler>>,
    state: OperationState,
}

impl Inner {
    fn computed_state(&self) -> OperationState {
        if !self.in_background {
            OperationState::Foreground
        } else if self.ongoing_call {
            OperationState::BackgroundCall
        } else if self.fetch.is_some() {
            OperationState::BackgroundFetch
        } else if self.task.is_some() {
            OperationState::BackgroundTask
        } else {
            OperationState::Background
        }
    }

    /// Returns the new state if it changed.
    fn refresh(&mut self) -> Option<OperationState> {
        let state = self.computed_state();
        if state == self.state {
            return None;
        }
        debug!(from = %self.state, to = %state, "operation state changed");
        self.state = state;
        Some(state)
    }
}

/// Tracks the operation state and the background completion handlers.
///
/// The application starts in the background. Timeouts are not scheduled;
/// the owner calls [`expire`](Self::expire) periodically. Handlers and the
/// delegate are always called without the internal lock held.
pub struct OperationStatus {
    inner: Mutex<Inner>,
    timeout: Duration,
    delegate: RwLock<Option<Arc<dyn OperationStatusDelegate>>>,
}

impl OperationStatus {
    /// Creates the status with the timeout for fetches and tasks.
    pub fn new(timeout: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner {
                in_background: true,
                ongoing_call: false,
                fetch: None,
                task: None,
                state: OperationState::Background,
            }),
            timeout,
            delegate: RwLock::new(None),
        }
    }

    /// Sets the receiver of state changes.
    pub fn set_delegate(&self, delegate: Arc<dyn OperationStatusDelegate>) {
        *self.delegate.write() = Some(delegate);
    }

    /// Returns the current state.
    pub fn state(&self) -> OperationState {
        self.inner.lock().state
    }

    /// Returns true while the application is in the background.
    pub fn is_in_background(&self) -> bool {
        self.inner.lock().in_background
    }

    /// Moves the application to or from the background.
    pub fn set_in_background(&self, in_background: bool) {
        let changed = {
            let mut inner = self.inner.lock();
            inner.in_background = in_background;
            inner.refresh()
        };
        self.notify(changed);
    }

    /// Records whether a call is ongoing.
    pub fn set_has_ongoing_call(&self, ongoing: bool) {
        let changed = {
            let mut inner = self.inner.lock();
            inner.ongoing_call = ongoing;
            inner.refresh()
        };
        self.notify(changed);
    }

    /// Returns true while a background fetch waits for completion.
    pub fn has_pending_fetch(&self) -> bool {
        self.inner.lock().fetch.is_some()
    }

    /// Returns true while a background task waits for completion.
    pub fn has_pending_task(&self) -> bool {
        self.inner.lock().task.is_some()
    }

    /// Starts a background fetch. A fetch already pending fails the new
    /// handler immediately and returns false.
    pub fn start_background_fetch(&self, now: Instant, handler: FetchHandler) -> bool {
        let changed = {
            let mut inner = self.inner.lock();
            if inner.fetch.is_some() {
                drop(inner);
                debug!("background fetch already pending");
                handler(FetchResult::Failed);
                return false;
            }
            inner.fetch = Some(Pending {
                handler,
                deadline: now + self.timeout,
            });
            inner.refresh()
        };
        self.notify(changed);
        true
    }

    /// Starts a background task. Fails the handler immediately in the
    /// foreground or while a task is pending.
    pub fn start_background_task(&self, now: Instant, handler: BackgroundTaskHandler) {
        let changed = {
            let mut inner = self.inner.lock();
            if inner.task.is_some() || !inner.in_background {
                drop(inner);
                debug!("background task rejected");
                handler(BackgroundTaskResult::Failed);
                return;
            }
            inner.task = Some(Pending {
                handler,
                deadline: now + self.timeout,
            });
            inner.refresh()
        };
        self.notify(changed);
    }

    /// Completes the pending fetch. Returns false if none was pending.
    pub fn finish_background_fetch(&self, result: FetchResult) -> bool {
        let (pending, changed) = {
            let mut inner = self.inner.lock();
            let pending = inner.fetch.take();
            (pending, inner.refresh())
        };
        self.notify(changed);
        match pending {
            Some(pending) => {
                (pending.handler)(result);
                true
            }
            None => false,
        }
    }

    /// Completes the pending task. Returns false if none was pending.
    pub fn finish_background_task(&self, result: BackgroundTaskResult) -> bool {
        let (pending, changed) = {
            let mut inner = self.inner.lock();
            let pending = inner.task.take();
            (pending, inner.refresh())
        };
        self.notify(changed);
        match pending {
            Some(pending) => {
                (pending.handler)(result);
                true
            }
            None => false,
        }
    }

    /// Fails every handler whose deadline passed. Returns how many expired.
    pub fn expire(&self, now: Instant) -> usize {
        let (fetch, task, changed) = {
            let mut inner = self.inner.lock();
            let fetch_due = inner.fetch.as_ref().is_some_and(|p| p.deadline <= now);
            let task_due = inner.task.as_ref().is_some_and(|p| p.deadline <= now);
            let fetch = if fetch_due { inner.fetch.take() } else { None };
            let task = if task_due { inner.task.take() } else { None };
            (fetch, task, inner.refresh())
        };
        self.notify(changed);

        let mut expired = 0;
        if let Some(pending) = fetch {
            debug!("background fetch timed out");
            (pending.handler)(FetchResult::Failed);
            expired += 1;
        }
        if let Some(pending) = task {
            debug!("background task timed out");
            (pending.handler)(BackgroundTaskResult::Failed);
            expired += 1;
        }
        expired
    }

    fn notify(&self, changed: Option<OperationState>) {
        let Some(state) = changed else {
            return;
        };
        let delegate = self.delegate.read().clone();
        if let Some(delegate) = delegate {
            delegate.operation_state_did_change(state);
        }
    }
}

impl Default for OperationStatus {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

impl fmt::Debug for OperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("OperationStatus")
            .field("state", &inner.state)
            .field("fetch", &inner.fetch.is_some())
            .field("task", &inner.task.is_some())
            .finish_non_exhaustive()
    }
}
