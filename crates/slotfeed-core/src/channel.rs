//! Bounded blocking channel between reader threads and batch consumers.
//!
//! Many producers and many consumers may share one [`Channel`]. Items pushed
//! by one producer are popped in the order they were pushed; there is no
//! ordering across producers. Closing wakes every waiter: producers fail
//! fast, consumers drain what is left and then observe end-of-stream.

use parking_lot::{Condvar, Mutex};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use crate::slot::{PvInstance, SlotRecord};

/// Default number of items moved by [`Channel::pop_block`].
pub const DEFAULT_BLOCK_SIZE: usize = 1024;

/// Push on a closed channel; carries the rejected item back to the caller.
pub struct ChannelClosed<T>(pub T);

impl<T> ChannelClosed<T> {
    /// Returns the rejected item.
    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T> fmt::Debug for ChannelClosed<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ChannelClosed { .. }")
    }
}

impl<T> fmt::Display for ChannelClosed<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("push on a closed channel")
    }
}

impl<T> std::error::Error for ChannelClosed<T> {}

impl<T> From<ChannelClosed<T>> for crate::error::Error {
    fn from(_: ChannelClosed<T>) -> Self {
        Self::ChannelClosed
    }
}

struct State<T> {
    queue: VecDeque<T>,
    capacity: usize,
    block_size: usize,
    closed: bool,
}

/// Bounded MPMC queue with blocking push and pop.
pub struct Channel<T> {
    state: Mutex<State<T>>,
    not_full: Condvar,
    not_empty: Condvar,
}

impl<T> Channel<T> {
    /// Creates an open channel holding at most `capacity` items.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(State {
                queue: VecDeque::new(),
                capacity: capacity.max(1),
                block_size: DEFAULT_BLOCK_SIZE,
                closed: false,
            }),
            not_full: Condvar::new(),
            not_empty: Condvar::new(),
        }
    }

    /// Creates a shared channel.
    #[must_use]
    pub fn shared(capacity: usize) -> Arc<Self> {
        Arc::new(Self::new(capacity))
    }

    /// Pushes one item, blocking while the channel is full.
    ///
    /// # Errors
    ///
    /// Returns the item inside [`ChannelClosed`] if the channel is closed.
    pub fn push(&self, item: T) -> Result<(), ChannelClosed<T>> {
        let mut state = self.state.lock();
        while !state.closed && state.queue.len() >= state.capacity {
            self.not_full.wait(&mut state);
        }
        if state.closed {
            return Err(ChannelClosed(item));
        }
        state.queue.push_back(item);
        drop(state);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Pushes every item in order, blocking for room as needed.
    ///
    /// Returns how many were written; items left when the channel closes are
    /// dropped.
    pub fn write_all(&self, items: Vec<T>) -> usize {
        let mut items = items.into_iter().peekable();
        let mut written = 0;
        let mut state = self.state.lock();
        while items.peek().is_some() {
            while !state.closed && state.queue.len() >= state.capacity {
                self.not_full.wait(&mut state);
            }
            if state.closed {
                break;
            }
            let room = state.capacity - state.queue.len();
            let before = state.queue.len();
            state.queue.extend(items.by_ref().take(room));
            written += state.queue.len() - before;
            self.not_empty.notify_all();
        }
        written
    }

    /// Appends every item without waiting for room.
    ///
    /// The capacity bounds only blocking pushes, so the queue may grow past
    /// it. Returns how many were appended.
    ///
    /// # Errors
    ///
    /// Returns all items inside [`ChannelClosed`] if the channel is closed.
    pub fn append<I>(&self, items: I) -> Result<usize, ChannelClosed<Vec<T>>>
    where
        I: IntoIterator<Item = T>,
    {
        let mut state = self.state.lock();
        if state.closed {
            return Err(ChannelClosed(items.into_iter().collect()));
        }
        let before = state.queue.len();
        state.queue.extend(items);
        let appended = state.queue.len() - before;
        drop(state);
        if appended > 0 {
            self.not_empty.notify_all();
        }
        Ok(appended)
    }

    /// Pops one item, blocking while the channel is empty and open.
    ///
    /// Returns `None` once the channel is closed and drained.
    pub fn pop(&self) -> Option<T> {
        let mut state = self.state.lock();
        while state.queue.is_empty() && !state.closed {
            self.not_empty.wait(&mut state);
        }
        let item = state.queue.pop_front();
        drop(state);
        if item.is_some() {
            self.not_full.notify_one();
        }
        item
    }

    /// Pops up to `k` items into `out`, blocking while empty and open.
    ///
    /// Returns the number popped; `0` means closed and drained.
    pub fn pop_batch(&self, k: usize, out: &mut Vec<T>) -> usize {
        if k == 0 {
            return 0;
        }
        let mut state = self.state.lock();
        while state.queue.is_empty() && !state.closed {
            self.not_empty.wait(&mut state);
        }
        let n = k.min(state.queue.len());
        out.extend(state.queue.drain(..n));
        drop(state);
        if n > 0 {
            self.not_full.notify_all();
        }
        n
    }

    /// Pops up to the configured block size.
    pub fn pop_block(&self, out: &mut Vec<T>) -> usize {
        let k = self.state.lock().block_size;
        self.pop_batch(k, out)
    }

    /// Drains every queued item without blocking.
    pub fn read_all(&self, out: &mut Vec<T>) -> usize {
        let mut state = self.state.lock();
        let n = state.queue.len();
        out.extend(state.queue.drain(..));
        drop(state);
        if n > 0 {
            self.not_full.notify_all();
        }
        n
    }

    /// Closes the channel and wakes every waiter.
    pub fn close(&self) {
        self.state.lock().closed = true;
        self.not_full.notify_all();
        self.not_empty.notify_all();
    }

    /// Reopens a closed channel for the next pass.
    pub fn open(&self) {
        self.state.lock().closed = false;
    }

    /// True once [`close`](Self::close) was called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Number of queued items.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().queue.len()
    }

    /// True when nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state.lock().queue.is_empty()
    }

    /// Maximum number of queued items.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.state.lock().capacity
    }

    /// Changes the capacity. Growing wakes blocked producers.
    pub fn set_capacity(&self, capacity: usize) {
        self.state.lock().capacity = capacity.max(1);
        self.not_full.notify_all();
    }

    /// Changes the number of items moved by [`pop_block`](Self::pop_block).
    pub fn set_block_size(&self, block_size: usize) {
        self.state.lock().block_size = block_size.max(1);
    }
}

impl<T> fmt::Debug for Channel<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Channel")
            .field("len", &state.queue.len())
            .field("capacity", &state.capacity)
            .field("closed", &state.closed)
            .finish()
    }
}

/// The three channels a feed works with.
///
/// `input` holds loaded items, `output` receives items after they were
/// batched, and `consume` stages items between two passes, where they are
/// optionally shuffled before [`rewind`](Self::rewind) hands them back to
/// `input`.
#[derive(Debug)]
pub struct FeedChannels<T> {
    /// Loaded, not yet batched.
    pub input: Arc<Channel<T>>,
    /// Already batched.
    pub output: Arc<Channel<T>>,
    /// Staged for the next pass.
    pub consume: Arc<Channel<T>>,
}

impl<T> FeedChannels<T> {
    /// Creates three open channels of the same capacity.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            input: Channel::shared(capacity),
            output: Channel::shared(capacity),
            consume: Channel::shared(capacity),
        }
    }

    /// Prepares `input` for another pass over the same items.
    ///
    /// Items staged in `consume` and everything in `output` are gathered,
    /// shuffled when `shuffle_seed` is set, and moved into `input`, which is
    /// left closed like after a load. Returns the number of items moved.
    ///
    /// Must not run while a feed is batching from these channels.
    pub fn rewind(&self, shuffle_seed: Option<u64>) -> usize {
        let mut staged = Vec::with_capacity(self.consume.len() + self.output.len());
        self.consume.read_all(&mut staged);
        self.output.read_all(&mut staged);

        if let Some(seed) = shuffle_seed {
            staged.shuffle(&mut StdRng::seed_from_u64(seed));
        }

        self.input.open();
        let rewound = match self.input.append(staged) {
            Ok(n) => n,
            Err(ChannelClosed(lost)) => {
                tracing::warn!(items = lost.len(), "Input closed during rewind");
                0
            }
        };
        self.input.close();
        tracing::debug!(items = rewound, shuffled = shuffle_seed.is_some(), "Rewound channels");
        rewound
    }
}

impl<T> Clone for FeedChannels<T> {
    fn clone(&self) -> Self {
        Self {
            input: Arc::clone(&self.input),
            output: Arc::clone(&self.output),
            consume: Arc::clone(&self.consume),
        }
    }
}

/// Record channels.
pub type RecordChannels = FeedChannels<SlotRecord>;

/// Page-view channels.
pub type PvChannels = FeedChannels<PvInstance>;
