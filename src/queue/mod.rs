//! Debounced change-notification queue
//!
//! The host's request-handling paths report mount lifecycle events here and
//! return immediately; nothing on the intake side ever waits on the network
//! or the registry. The first enqueue after an idle period starts a drain
//! task, which sleeps out a short debounce window so bursts (a source
//! connecting, a playlist flipping several mounts) collapse into one batch.
//!
//! The drain detaches the whole pending list under the intake lock and
//! processes it outside, so notifications arriving during processing start
//! a fresh batch instead of queuing behind the current one.

use std::sync::Mutex;

/// A single change notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Change {
    /// A mount became public; list it on every active server
    Add(String),
    /// A mount stopped being public; withdraw its listings
    Remove(String),
    /// Mount metadata changed; update now-playing and maybe touch early
    Touch {
        /// Mount name
        mount: String,
        /// New now-playing text, if any
        now_playing: Option<String>,
    },
}

impl Change {
    /// Mount this change refers to
    pub fn mount(&self) -> &str {
        match self {
            Change::Add(m) | Change::Remove(m) => m,
            Change::Touch { mount, .. } => mount,
        }
    }
}

#[derive(Default)]
struct QueueState {
    pending: Vec<Change>,
    draining: bool,
}

/// Lock-protected intake for change notifications
///
/// The queue itself owns no task; [`enqueue`](ChangeQueue::enqueue) tells
/// the caller when a drain task must be started, and the drain task calls
/// [`detach`](ChangeQueue::detach) until it returns an empty batch.
#[derive(Default)]
pub struct ChangeQueue {
    state: Mutex<QueueState>,
}

impl ChangeQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a change; returns true when the caller must start a drain task
    pub fn enqueue(&self, change: Change) -> bool {
        let mut state = self.state.lock().expect("change queue lock poisoned");
        state.pending.push(change);
        if state.draining {
            false
        } else {
            state.draining = true;
            true
        }
    }

    /// Detach the current batch, replacing it with an empty list
    ///
    /// An empty return means there is nothing left and the drain flag has
    /// been cleared; the drain task must exit (a later enqueue starts a new
    /// one).
    pub fn detach(&self) -> Vec<Change> {
        let mut state = self.state.lock().expect("change queue lock poisoned");
        if state.pending.is_empty() {
            state.draining = false;
            return Vec::new();
        }
        std::mem::take(&mut state.pending)
    }

    /// Number of queued changes (diagnostics)
    pub fn len(&self) -> usize {
        self.state.lock().expect("change queue lock poisoned").pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether a drain task is currently responsible for the queue
    pub fn is_draining(&self) -> bool {
        self.state.lock().expect("change queue lock poisoned").draining
    }
}
