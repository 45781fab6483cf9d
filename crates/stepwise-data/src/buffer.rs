//! Per-signal backlog of time-ordered sample slots.
//!
//! A [`SampleBuffer`] holds a fixed number of slots ordered by timestamp.
//! Readers lock a slot and get a [`SampleRef`]; a locked slot is never
//! reused by [`SampleBuffer::update`], and a locked slot evicted by a
//! backlog shrink is parked in a deferred set until its last reader
//! unlocks it. Empty slots carry [`INVALID_TIMESTAMP`] and sort first.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use stepwise_core::{CancelToken, CoreError, DataSample, SignalHandle, Timestamp, INVALID_TIMESTAMP};

/// Upper bound on a single condition-variable wait, so a cancel request
/// is observed within this latency.
const MAX_WAIT_SLICE: Duration = Duration::from_millis(100);

/// Slot selection rule for [`SampleBuffer::lock_data_at`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Selection {
    /// The slot with the greatest timestamp.
    Latest,
    /// The slot closest to the requested time; newer wins a tie.
    Nearest,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
struct SlotId(u64);

struct Slot {
    id: SlotId,
    lock_count: u32,
    data: Arc<Vec<u8>>,
}

/// Ordering key: timestamp, then insertion sequence so equal timestamps
/// keep insertion order.
type Key = (Timestamp, u64);

/// A locked view of one slot's content.
///
/// The payload stays stable until the reference is passed back to
/// [`SampleBuffer::unlock_data`], even if the slot is evicted or reused
/// in the meantime.
#[derive(Debug)]
pub struct SampleRef {
    handle: SignalHandle,
    slot: SlotId,
    time: Timestamp,
    data: Arc<Vec<u8>>,
    valid: bool,
}

impl SampleRef {
    /// Signal the sample belongs to.
    pub fn handle(&self) -> SignalHandle {
        self.handle
    }

    /// Sample timestamp; [`INVALID_TIMESTAMP`] for a never-written slot.
    pub fn time(&self) -> Timestamp {
        self.time
    }

    /// Payload bytes.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// False until the buffer has received its first real sample.
    pub fn is_valid(&self) -> bool {
        self.valid
    }

    /// Owned copy of the sample.
    pub fn to_sample(&self) -> DataSample {
        DataSample::new(self.handle, self.time, self.data.as_ref().clone())
    }
}

enum Window {
    Satisfied,
    Passed,
    Pending,
}

struct Backlog {
    slots: BTreeMap<Key, Slot>,
    deleted: HashMap<SlotId, Slot>,
    next_seq: u64,
    next_id: u64,
    latest: Timestamp,
}

impl Backlog {
    fn insert(&mut self, time: Timestamp, slot: Slot) {
        let key = (time, self.next_seq);
        self.next_seq += 1;
        self.slots.insert(key, slot);
    }

    fn new_slot(&mut self, size: usize) -> Slot {
        let id = SlotId(self.next_id);
        self.next_id += 1;
        Slot {
            id,
            lock_count: 0,
            data: Arc::new(vec![0; size]),
        }
    }

    fn last_key(&self) -> Option<Key> {
        self.slots.keys().next_back().copied()
    }

    fn most_recent(&self) -> Option<Timestamp> {
        self.last_key().map(|k| k.0)
    }

    /// Greatest key with timestamp <= `t`.
    fn upper_bound_prev(&self, t: Timestamp) -> Option<Key> {
        self.slots.range(..=(t, u64::MAX)).next_back().map(|(k, _)| *k)
    }

    fn nearest(&self, t: Timestamp) -> Option<Key> {
        let t = t.max(0);
        let Some(newer) = self.slots.range((t, 0)..).next().map(|(k, _)| *k) else {
            return self.last_key();
        };
        if newer.0 == t {
            return Some(newer);
        }
        match self.slots.range(..(t, 0)).next_back().map(|(k, _)| *k) {
            Some(older) if older.0 != INVALID_TIMESTAMP => {
                let diff_newer = newer.0 - t;
                let diff_older = t - older.0;
                if diff_newer <= diff_older {
                    Some(newer)
                } else {
                    Some(older)
                }
            }
            _ => Some(newer),
        }
    }

    fn lock_key(&mut self, handle: SignalHandle, key: Key) -> Result<SampleRef, CoreError> {
        let valid = self.latest >= 0;
        let slot = self.slots.get_mut(&key).ok_or(CoreError::NotFound)?;
        slot.lock_count += 1;
        Ok(SampleRef {
            handle,
            slot: slot.id,
            time: key.0,
            data: Arc::clone(&slot.data),
            valid,
        })
    }

    fn window(&self, lower: Timestamp, upper: Timestamp) -> Window {
        let Some(most_recent) = self.most_recent() else {
            return Window::Pending;
        };
        if most_recent < lower {
            return Window::Pending;
        }
        if most_recent <= upper {
            return Window::Satisfied;
        }
        match self.upper_bound_prev(upper) {
            Some((t, _)) if t >= lower => Window::Satisfied,
            _ => Window::Passed,
        }
    }
}

/// Backlog of samples for one signal.
pub struct SampleBuffer {
    handle: SignalHandle,
    inner: Mutex<Backlog>,
    arrived: Condvar,
}

// Compile-time assertion: SampleBuffer must be Send + Sync.
const _: fn() = || {
    fn assert<T: Send + Sync>() {}
    assert::<SampleBuffer>();
};

impl SampleBuffer {
    /// An empty buffer with no slots.
    pub fn new(handle: SignalHandle) -> Self {
        Self {
            handle,
            inner: Mutex::new(Backlog {
                slots: BTreeMap::new(),
                deleted: HashMap::new(),
                next_seq: 0,
                next_id: 0,
                latest: INVALID_TIMESTAMP,
            }),
            arrived: Condvar::new(),
        }
    }

    /// A buffer of `backlog` slots: all empty except one zeroed default
    /// sample at time 0, so a first read always finds data.
    pub fn preallocated(handle: SignalHandle, backlog: usize, sample_size: usize) -> Self {
        let buffer = Self::new(handle);
        {
            let mut b = buffer.inner.lock();
            for _ in 1..backlog.max(1) {
                let slot = b.new_slot(sample_size);
                b.insert(INVALID_TIMESTAMP, slot);
            }
            let default = b.new_slot(sample_size);
            b.insert(0, default);
        }
        buffer
    }

    /// Signal this buffer belongs to.
    pub fn handle(&self) -> SignalHandle {
        self.handle
    }

    /// Number of live slots.
    pub fn len(&self) -> usize {
        self.inner.lock().slots.len()
    }

    /// Whether the buffer has no live slots.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().slots.is_empty()
    }

    /// Number of evicted slots still held by readers.
    pub fn deferred_len(&self) -> usize {
        self.inner.lock().deleted.len()
    }

    /// Whether a real sample has been written since creation or reset.
    pub fn is_valid(&self) -> bool {
        self.inner.lock().latest >= 0
    }

    /// Lock a slot by selection rule. `sim_time` is ignored for
    /// [`Selection::Latest`] and clamped to 0 for [`Selection::Nearest`].
    pub fn lock_data_at(
        &self,
        selection: Selection,
        sim_time: Timestamp,
    ) -> Result<SampleRef, CoreError> {
        let mut b = self.inner.lock();
        let key = match selection {
            Selection::Latest => b.last_key(),
            Selection::Nearest => b.nearest(sim_time),
        }
        .ok_or(CoreError::NotFound)?;
        b.lock_key(self.handle, key)
    }

    /// Lock the newest slot with timestamp <= `sim_time`.
    pub fn lock_data_at_upper_bound(&self, sim_time: Timestamp) -> Result<SampleRef, CoreError> {
        let mut b = self.inner.lock();
        let key = b.upper_bound_prev(sim_time).ok_or(CoreError::NotFound)?;
        b.lock_key(self.handle, key)
    }

    /// Release a lock taken by one of the `lock_*` methods.
    ///
    /// `Failed` if the live slot was not locked; `InvalidArgument` if the
    /// reference matches no slot of this buffer.
    pub fn unlock_data(&self, sample: &SampleRef) -> Result<(), CoreError> {
        if sample.handle != self.handle {
            return Err(CoreError::InvalidArgument);
        }
        let mut b = self.inner.lock();
        if let Some(slot) = b.slots.values_mut().find(|s| s.id == sample.slot) {
            if slot.lock_count == 0 {
                return Err(CoreError::Failed);
            }
            slot.lock_count -= 1;
            return Ok(());
        }
        let Some(slot) = b.deleted.get_mut(&sample.slot) else {
            return Err(CoreError::InvalidArgument);
        };
        slot.lock_count = slot.lock_count.saturating_sub(1);
        if slot.lock_count == 0 {
            b.deleted.remove(&sample.slot);
        }
        Ok(())
    }

    /// Timestamp of the newest slot. `NotFound` if there are no slots.
    pub fn most_recent(&self) -> Result<Timestamp, CoreError> {
        self.inner.lock().most_recent().ok_or(CoreError::NotFound)
    }

    /// Block until the newest usable sample lies within `[lower, upper]`.
    ///
    /// Returns `Failed` as soon as only samples newer than `upper` can
    /// satisfy the window, `Cancelled` once `cancel` is observed and
    /// `Timeout` after `timeout`.
    pub fn wait_until_in_time_window(
        &self,
        lower: Timestamp,
        upper: Timestamp,
        timeout: Duration,
        cancel: &CancelToken,
    ) -> Result<(), CoreError> {
        if lower > upper {
            return Err(CoreError::InvalidArgument);
        }
        let deadline = Instant::now() + timeout;
        let mut b = self.inner.lock();
        loop {
            match b.window(lower, upper) {
                Window::Satisfied => return Ok(()),
                Window::Passed => return Err(CoreError::Failed),
                Window::Pending => {}
            }
            if cancel.is_cancelled() {
                return Err(CoreError::Cancelled);
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(CoreError::Timeout);
            }
            let slice = (deadline - now).min(MAX_WAIT_SLICE);
            self.arrived.wait_for(&mut b, slice);
        }
    }

    /// Resize to `new_size` slots of `sample_size` bytes.
    ///
    /// Shrinking evicts the oldest slots; evicted slots that are still
    /// locked move to the deferred set. Growing adds empty slots.
    pub fn signal_backlog_changed(&self, new_size: usize, sample_size: usize) {
        let mut b = self.inner.lock();
        while b.slots.len() > new_size {
            let Some((_, slot)) = b.slots.pop_first() else {
                break;
            };
            if slot.lock_count > 0 {
                b.deleted.insert(slot.id, slot);
            }
        }
        while b.slots.len() < new_size {
            let slot = b.new_slot(sample_size);
            b.insert(INVALID_TIMESTAMP, slot);
        }
    }

    /// Store `sample` in the oldest slot that is empty or unlocked and
    /// wake every waiter.
    ///
    /// `ResourceInUse` if every slot is locked; the sample is not stored.
    pub fn update(&self, sample: &DataSample) -> Result<(), CoreError> {
        let mut b = self.inner.lock();
        let key = b
            .slots
            .iter()
            .find(|(k, s)| k.0 == INVALID_TIMESTAMP || s.lock_count == 0)
            .map(|(k, _)| *k)
            .ok_or(CoreError::ResourceInUse)?;
        let mut slot = b.slots.remove(&key).ok_or(CoreError::ResourceInUse)?;
        let buf = Arc::make_mut(&mut slot.data);
        buf.clear();
        buf.extend_from_slice(&sample.data);
        b.latest = sample.time;
        b.insert(sample.time, slot);
        drop(b);
        self.arrived.notify_all();
        Ok(())
    }

    /// Reset every slot to empty, zero its payload, and put back one
    /// default sample at time 0. Drops the deferred set.
    ///
    /// Returns how many slots were still locked.
    pub fn reset(&self) -> usize {
        let mut b = self.inner.lock();
        let old = std::mem::take(&mut b.slots);
        let mut still_locked = b.deleted.values().filter(|s| s.lock_count > 0).count();
        b.deleted.clear();
        b.latest = INVALID_TIMESTAMP;
        let mut first = true;
        for (_, mut slot) in old {
            if slot.lock_count > 0 {
                still_locked += 1;
            }
            slot.lock_count = 0;
            let buf = Arc::make_mut(&mut slot.data);
            buf.iter_mut().for_each(|x| *x = 0);
            let time = if first { 0 } else { INVALID_TIMESTAMP };
            first = false;
            b.insert(time, slot);
        }
        still_locked
    }
}
