/// Blocking queues used for every cross-thread handoff in the routing layer.
///
/// `SharedQueue` is an unbounded FIFO guarded by a mutex and a condition
/// variable: producers never block, consumers sleep until an item arrives
/// or the queue is closed. Closing does not discard queued items, consumers
/// drain what is left and then observe `None`.
///
/// `QueueForwarder` and `QueueMerger` pump items from one or more input
/// queues into a single output queue on dedicated threads.
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::error::RoutingError;

/// How long a forwarder sleeps on an empty input before re-checking its stop flag.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(50);

struct QueueState<T> {
    items: VecDeque<T>,
    closed: bool,
}

/// Unbounded multi-producer, multi-consumer blocking queue.
pub struct SharedQueue<T> {
    state: Mutex<QueueState<T>>,
    available: Condvar,
}

impl<T> SharedQueue<T> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                items: VecDeque::new(),
                closed: false,
            }),
            available: Condvar::new(),
        }
    }

    /// Append at the tail. Fails once the queue is closed.
    pub fn push_back(&self, item: T) -> Result<(), RoutingError> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(RoutingError::QueueClosed);
        }
        state.items.push_back(item);
        self.available.notify_one();
        Ok(())
    }

    /// Insert at the head, ahead of everything already queued.
    pub fn push_front(&self, item: T) -> Result<(), RoutingError> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(RoutingError::QueueClosed);
        }
        state.items.push_front(item);
        self.available.notify_one();
        Ok(())
    }

    /// Block until an item is available. Returns `None` only when the
    /// queue is closed and empty.
    pub fn pop_front(&self) -> Option<T> {
        let mut state = self.state.lock();
        while state.items.is_empty() && !state.closed {
            self.available.wait(&mut state);
        }
        state.items.pop_front()
    }

    /// Like [`pop_front`](Self::pop_front), but gives up after `timeout`.
    pub fn pop_front_timeout(&self, timeout: Duration) -> Option<T> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        while state.items.is_empty() && !state.closed {
            if self.available.wait_until(&mut state, deadline).timed_out() {
                break;
            }
        }
        state.items.pop_front()
    }

    /// Non-blocking pop.
    pub fn try_pop_front(&self) -> Option<T> {
        self.state.lock().items.pop_front()
    }

    /// Remove and return everything currently queued.
    pub fn drain(&self) -> Vec<T> {
        self.state.lock().items.drain(..).collect()
    }

    /// Close the queue and wake every waiting consumer.
    pub fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        self.available.notify_all();
    }

    /// Accept pushes again after a [`close`](Self::close).
    pub fn reopen(&self) {
        self.state.lock().closed = false;
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().items.is_empty()
    }
}

impl<T> Default for SharedQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for SharedQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("SharedQueue")
            .field("len", &state.items.len())
            .field("closed", &state.closed)
            .finish()
    }
}

// ── Forwarding ─────────────────────────────────────────────────────────

/// Moves items from one input queue to one output queue on its own thread.
pub struct QueueForwarder<T: Send + 'static> {
    input: Arc<SharedQueue<T>>,
    output: Arc<SharedQueue<T>>,
    poll_interval: Duration,
    active: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl<T: Send + 'static> QueueForwarder<T> {
    pub fn new(
        input: Arc<SharedQueue<T>>,
        output: Arc<SharedQueue<T>>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            input,
            output,
            poll_interval,
            active: Arc::new(AtomicBool::new(false)),
            thread: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.thread.is_some()
    }

    pub fn start(&mut self) -> Result<(), RoutingError> {
        if self.thread.is_some() {
            return Err(RoutingError::AlreadyStarted {
                component: "queue forwarder",
            });
        }
        self.active.store(true, Ordering::Release);

        let input = Arc::clone(&self.input);
        let output = Arc::clone(&self.output);
        let active = Arc::clone(&self.active);
        let poll_interval = self.poll_interval;

        let handle = std::thread::Builder::new()
            .name("claid-queue-forwarder".into())
            .spawn(move || forward_items(&input, &output, &active, poll_interval))
            .map_err(|source| RoutingError::Spawn {
                component: "queue forwarder",
                source,
            })?;
        self.thread = Some(handle);
        Ok(())
    }

    pub fn stop(&mut self) -> Result<(), RoutingError> {
        let handle = self.thread.take().ok_or(RoutingError::NotStarted {
            component: "queue forwarder",
        })?;
        self.active.store(false, Ordering::Release);
        if handle.join().is_err() {
            tracing::error!("queue forwarder thread panicked");
        }
        Ok(())
    }
}

impl<T: Send + 'static> Drop for QueueForwarder<T> {
    fn drop(&mut self) {
        if self.thread.is_some() {
            let _ = self.stop();
        }
    }
}

fn forward_items<T>(
    input: &SharedQueue<T>,
    output: &SharedQueue<T>,
    active: &AtomicBool,
    poll_interval: Duration,
) {
    while active.load(Ordering::Acquire) {
        match input.pop_front_timeout(poll_interval) {
            Some(item) => {
                if output.push_back(item).is_err() {
                    tracing::warn!("queue forwarder: output queue closed, dropping item");
                }
            }
            // Closed and drained: nothing will ever arrive again.
            None if input.is_closed() => break,
            None => {}
        }
    }
}

/// Merges N input queues into one output queue, one forwarder thread per input.
pub struct QueueMerger<T: Send + 'static> {
    forwarders: Vec<QueueForwarder<T>>,
    running: bool,
}

impl<T: Send + 'static> QueueMerger<T> {
    pub fn new(
        output: Arc<SharedQueue<T>>,
        inputs: impl IntoIterator<Item = Arc<SharedQueue<T>>>,
        poll_interval: Duration,
    ) -> Self {
        let forwarders = inputs
            .into_iter()
            .map(|input| QueueForwarder::new(input, Arc::clone(&output), poll_interval))
            .collect();
        Self {
            forwarders,
            running: false,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn start(&mut self) -> Result<(), RoutingError> {
        if self.running {
            return Err(RoutingError::AlreadyStarted {
                component: "queue merger",
            });
        }
        for forwarder in &mut self.forwarders {
            forwarder.start()?;
        }
        self.running = true;
        Ok(())
    }

    pub fn stop(&mut self) -> Result<(), RoutingError> {
        if !self.running {
            return Err(RoutingError::NotStarted {
                component: "queue merger",
            });
        }
        for forwarder in &mut self.forwarders {
            if forwarder.is_running() {
                forwarder.stop()?;
            }
        }
        self.running = false;
        Ok(())
    }
}
