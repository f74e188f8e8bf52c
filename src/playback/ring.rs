//! Fixed-capacity ring buffer of sequenced playback frames.
//!
//! The producer never blocks: pushing into a full buffer overwrites the
//! oldest slot and counts a drop. The consumer never blocks either: reading
//! an empty buffer returns [`ReadResult::NotReady`] and counts an underrun.

use std::sync::Mutex;

use serde::Serialize;

use crate::sync::lock;

// =============================================================================
// Frames & Results
// =============================================================================

/// A frame tagged with its producer-assigned sequence number.
#[derive(Debug, Clone, PartialEq)]
pub struct SequencedFrame<T> {
    pub sequence: u64,
    pub frame: T,
}

impl<T> SequencedFrame<T> {
    pub fn new(sequence: u64, frame: T) -> Self {
        Self { sequence, frame }
    }

    /// True if this frame directly follows `prev` with no gap.
    pub fn follows<U>(&self, prev: &SequencedFrame<U>) -> bool {
        prev.sequence.checked_add(1) == Some(self.sequence)
    }
}

/// Outcome of a consumer read.
#[derive(Debug, Clone, PartialEq)]
pub enum ReadResult<T> {
    Ready(SequencedFrame<T>),

    /// Buffer was empty; counted as an underrun
    NotReady,
}

impl<T> ReadResult<T> {
    pub fn is_ready(&self) -> bool {
        matches!(self, ReadResult::Ready(_))
    }

    pub fn into_frame(self) -> Option<SequencedFrame<T>> {
        match self {
            ReadResult::Ready(frame) => Some(frame),
            ReadResult::NotReady => None,
        }
    }
}

/// Outcome of a producer write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Stored,

    /// Buffer was full; the oldest frame was overwritten
    Overwrote { dropped_sequence: u64 },
}

/// Occupancy and lifetime counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct RingStats {
    pub filled: usize,
    pub capacity: usize,
    pub pushed: u64,
    pub popped: u64,
    pub dropped: u64,
    pub underruns: u64,
}

impl RingStats {
    /// Occupied slots over capacity; `0.0` for an empty snapshot.
    pub fn fill_level(&self) -> f64 {
        if self.capacity == 0 {
            return 0.0;
        }
        self.filled as f64 / self.capacity as f64
    }
}

// =============================================================================
// Frame Ring Buffer
// =============================================================================

struct Slots<T> {
    slots: Vec<Option<SequencedFrame<T>>>,

    /// Index of the oldest occupied slot
    head: usize,

    len: usize,

    pushed: u64,
    popped: u64,
    dropped: u64,
    underruns: u64,
}

impl<T> Slots<T> {
    fn capacity(&self) -> usize {
        self.slots.len()
    }

    fn write(&mut self, frame: SequencedFrame<T>) -> PushOutcome {
        let capacity = self.capacity();
        let tail = (self.head + self.len) % capacity;
        self.pushed += 1;

        if self.len < capacity {
            self.slots[tail] = Some(frame);
            self.len += 1;
            return PushOutcome::Stored;
        }

        // Full: tail == head, overwrite the oldest.
        let dropped = self.slots[tail].replace(frame);
        self.head = (self.head + 1) % capacity;
        self.dropped += 1;
        PushOutcome::Overwrote {
            dropped_sequence: dropped.map_or(0, |f| f.sequence),
        }
    }
}

/// Thread-safe circular queue of [`SequencedFrame`]s.
///
/// # Example
///
/// ```
/// use viewcore::playback::FrameRingBuffer;
///
/// let ring = FrameRingBuffer::new(4);
/// for t in 0..5u64 {
///     ring.push(t, t * 10);
/// }
///
/// assert_eq!(ring.fill_level(), 1.0);
/// let first = ring.pop().into_frame().unwrap();
/// assert_eq!(first.sequence, 1);
/// ```
pub struct FrameRingBuffer<T> {
    inner: Mutex<Slots<T>>,
}

impl<T> FrameRingBuffer<T> {
    /// Create a buffer with `capacity` slots (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Mutex::new(Slots {
                slots: (0..capacity).map(|_| None).collect(),
                head: 0,
                len: 0,
                pushed: 0,
                popped: 0,
                dropped: 0,
                underruns: 0,
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        lock(&self.inner).capacity()
    }

    pub fn len(&self) -> usize {
        lock(&self.inner).len
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_full(&self) -> bool {
        let inner = lock(&self.inner);
        inner.len == inner.capacity()
    }

    /// Write a frame into the next slot, overwriting the oldest if full.
    pub fn push(&self, sequence: u64, frame: T) -> PushOutcome {
        lock(&self.inner).write(SequencedFrame::new(sequence, frame))
    }

    /// Append a contiguous block numbered from `start_sequence`.
    ///
    /// Only free slots are filled: the block stops at the first frame that
    /// would overwrite an unread one. Returns the number of frames stored.
    pub fn push_block<I>(&self, start_sequence: u64, frames: I) -> usize
    where
        I: IntoIterator<Item = T>,
    {
        let mut inner = lock(&self.inner);
        let mut stored = 0;
        for (offset, frame) in frames.into_iter().enumerate() {
            if inner.len >= inner.capacity() {
                break;
            }
            inner.write(SequencedFrame::new(start_sequence + offset as u64, frame));
            stored += 1;
        }
        stored
    }

    /// Take the oldest frame.
    pub fn pop(&self) -> ReadResult<T> {
        let mut inner = lock(&self.inner);
        if inner.len == 0 {
            inner.underruns += 1;
            return ReadResult::NotReady;
        }

        let head = inner.head;
        let frame = inner.slots[head].take();
        inner.head = (head + 1) % inner.capacity();
        inner.len -= 1;

        match frame {
            Some(frame) => {
                inner.popped += 1;
                ReadResult::Ready(frame)
            }
            None => {
                inner.underruns += 1;
                ReadResult::NotReady
            }
        }
    }

    /// Clear all slots and pointers. Lifetime counters are kept.
    pub fn reset(&self) {
        let mut inner = lock(&self.inner);
        inner.slots.iter_mut().for_each(|slot| *slot = None);
        inner.head = 0;
        inner.len = 0;
    }

    /// Occupied slots over capacity, in `[0, 1]`.
    pub fn fill_level(&self) -> f64 {
        let inner = lock(&self.inner);
        inner.len as f64 / inner.capacity() as f64
    }

    pub fn stats(&self) -> RingStats {
        let inner = lock(&self.inner);
        RingStats {
            filled: inner.len,
            capacity: inner.capacity(),
            pushed: inner.pushed,
            popped: inner.popped,
            dropped: inner.dropped,
            underruns: inner.underruns,
        }
    }
}

impl<T: Clone> FrameRingBuffer<T> {
    /// Look at the oldest frame without removing it.
    pub fn peek(&self) -> ReadResult<T> {
        let mut inner = lock(&self.inner);
        let head = inner.head;
        match (inner.len, inner.slots[head].clone()) {
            (len, Some(frame)) if len > 0 => ReadResult::Ready(frame),
            _ => {
                inner.underruns += 1;
                ReadResult::NotReady
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
