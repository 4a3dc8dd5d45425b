use std::sync::{Arc, Mutex, OnceLock};

use tracing::{debug, error, info};

use crate::error::PoolError;
use crate::frame::{Frame, FrameCell};
use crate::handle::FrameHandle;
use crate::headers::{FrameInit, HeaderKind};

/// Default cap on the number of frame slots a pool will grow to.
pub const DEFAULT_MAX_FRAMES: usize = 10;

struct Slot {
    handle: FrameHandle,
    refcount: i32,
    free: bool,
    cell: Arc<FrameCell>,
}

struct PoolState {
    slots: Vec<Slot>,
    next_handle: i32,
    max_frames: usize,
}

impl PoolState {
    fn slot_mut(&mut self, handle: FrameHandle) -> Option<&mut Slot> {
        if !handle.is_valid() {
            return None;
        }
        self.slots
            .iter_mut()
            .find(|slot| !slot.free && slot.handle == handle)
    }
}

/// Bounded table of reference-counted frame slots, addressed by handle.
///
/// All bookkeeping (acquire, addref, release, lookup) runs under one mutex
/// whose critical section covers only the slot table; the frame buffers live
/// behind per-slot [`FrameCell`]s so payload I/O never blocks the table.
pub struct FramePool {
    state: Mutex<PoolState>,
}

impl Default for FramePool {
    fn default() -> Self {
        Self::new()
    }
}

impl FramePool {
    pub fn new() -> Self {
        Self::with_max_frames(DEFAULT_MAX_FRAMES)
    }

    pub fn with_max_frames(max_frames: usize) -> Self {
        Self {
            state: Mutex::new(PoolState {
                slots: Vec::new(),
                next_handle: 0,
                max_frames,
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, PoolState> {
        self.state.lock().expect("frame pool poisoned")
    }

    /// Acquires a frame slot: first free slot wins, a new slot is grown while
    /// under the cap. The returned handle carries one reference.
    pub fn acquire(&self) -> Result<FrameHandle, PoolError> {
        let mut state = self.lock();

        if let Some(pos) = state.slots.iter().position(|slot| slot.free) {
            let handle = FrameHandle::from_raw(state.next_handle);
            state.next_handle += 1;
            let slot = &mut state.slots[pos];
            slot.handle = handle;
            slot.refcount = 1;
            slot.free = false;
            debug!(handle = handle.raw(), "reusing free frame slot");
            return Ok(handle);
        }

        if state.slots.len() >= state.max_frames {
            let err = PoolError::Exhausted {
                size: state.slots.len(),
                max: state.max_frames,
            };
            error!(size = state.slots.len(), max = state.max_frames, "{err}");
            return Err(err);
        }

        let handle = FrameHandle::from_raw(state.next_handle);
        state.next_handle += 1;
        state.slots.push(Slot {
            handle,
            refcount: 1,
            free: false,
            cell: Arc::new(FrameCell::default()),
        });
        info!(
            handle = handle.raw(),
            frames_in_list = state.slots.len(),
            "created new frame slot"
        );
        Ok(handle)
    }

    /// Acquires a frame and initialises its headers and buffer from `init`.
    pub fn acquire_with_init(&self, init: &FrameInit) -> Result<FrameHandle, PoolError> {
        let headers = init.resolve().inspect_err(|err| error!("{err}"))?;
        let handle = self.acquire()?;
        let cell = self
            .frame(handle)
            .expect("freshly acquired handle must resolve");
        cell.with(|frame| frame.create(&headers));
        Ok(handle)
    }

    /// Increments the reference count. Returns the new count, -1 if unknown.
    pub fn addref(&self, handle: FrameHandle) -> i32 {
        let mut state = self.lock();
        match state.slot_mut(handle) {
            Some(slot) => {
                slot.refcount += 1;
                debug!(
                    handle = handle.raw(),
                    refcount = slot.refcount,
                    "frame addref"
                );
                slot.refcount
            }
            None => {
                error!(handle = handle.raw(), "addref on unknown frame handle");
                -1
            }
        }
    }

    /// Decrements the reference count; at zero the slot is marked free and the
    /// handle retired. Returns the new count, -1 if unknown. A negative count
    /// is a double release: it is logged and returned without touching the slot.
    pub fn release(&self, handle: FrameHandle) -> i32 {
        let mut state = self.lock();
        match state.slot_mut(handle) {
            Some(slot) => {
                let refcount = slot.refcount - 1;
                if refcount < 0 {
                    error!(
                        handle = handle.raw(),
                        refcount, "frame released more times than referenced"
                    );
                    return refcount;
                }
                slot.refcount = refcount;
                if refcount == 0 {
                    slot.free = true;
                    slot.handle = FrameHandle::INVALID;
                }
                debug!(handle = handle.raw(), refcount, "frame release");
                refcount
            }
            None => {
                error!(handle = handle.raw(), "release on unknown frame handle");
                -1
            }
        }
    }

    /// Resolves a handle to its shared frame cell.
    ///
    /// The clone keeps the cell alive independently of the slot table; callers
    /// still need a reference on the handle to keep the slot from being reused.
    pub fn frame(&self, handle: FrameHandle) -> Option<Arc<FrameCell>> {
        let mut state = self.lock();
        state.slot_mut(handle).map(|slot| Arc::clone(&slot.cell))
    }

    /// Runs `f` against the frame behind `handle`, outside the pool mutex.
    pub fn with_frame<R>(&self, handle: FrameHandle, f: impl FnOnce(&mut Frame) -> R) -> Option<R> {
        let cell = self.frame(handle)?;
        Some(cell.with(f))
    }

    /// Media size in bytes for the frame, -1 if the handle is unknown.
    pub fn media_size(&self, handle: FrameHandle) -> i32 {
        self.with_frame(handle, |frame| frame.media_size() as i32)
            .unwrap_or(-1)
    }

    pub fn header(&self, handle: FrameHandle, kind: HeaderKind) -> Option<i64> {
        self.with_frame(handle, |frame| frame.header(kind))
    }

    pub fn set_header(&self, handle: FrameHandle, kind: HeaderKind, value: i64) -> bool {
        self.with_frame(handle, |frame| frame.set_header(kind, value))
            .unwrap_or(false)
    }

    /// Number of slots currently in the table, free or not.
    pub fn frames_in_list(&self) -> usize {
        self.lock().slots.len()
    }

    /// Number of slots currently holding a live frame.
    pub fn live_frames(&self) -> usize {
        self.lock().slots.iter().filter(|slot| !slot.free).count()
    }

    pub fn max_frames(&self) -> usize {
        self.lock().max_frames
    }

    /// Adjusts the cap. Existing slots above a lowered cap are not reclaimed;
    /// the pool just stops growing.
    pub fn set_max_frames(&self, max_frames: usize) {
        self.lock().max_frames = max_frames;
    }
}

/// Process-wide pool backing the handle-based public interface.
pub fn global() -> &'static FramePool {
    static POOL: OnceLock<FramePool> = OnceLock::new();
    POOL.get_or_init(FramePool::new)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headers::{FrameInit, MediaFormat, SamplingFormat};

    #[test]
    fn acquire_returns_increasing_handles() {
        let pool = FramePool::new();
        let a = pool.acquire().expect("first acquire");
        let b = pool.acquire().expect("second acquire");
        assert!(b > a);
    }

    #[test]
    fn exhaustion_then_slot_reuse_with_fresh_handle() {
        let pool = FramePool::with_max_frames(3);
        let h0 = pool.acquire().expect("h0");
        let h1 = pool.acquire().expect("h1");
        let h2 = pool.acquire().expect("h2");
        assert!(h0 < h1 && h1 < h2);

        assert!(matches!(pool.acquire(), Err(PoolError::Exhausted { .. })));
        assert_eq!(pool.frames_in_list(), 3);

        assert_eq!(pool.release(h1), 0);
        let h3 = pool.acquire().expect("h3 after release");
        assert!(h3 > h2);
        assert_eq!(pool.frames_in_list(), 3);

        // The retired handle no longer resolves.
        assert!(pool.frame(h1).is_none());
    }

    #[test]
    fn acquire_release_restores_slot_shape() {
        let pool = FramePool::new();
        let h0 = pool.acquire().expect("h0");
        let before = (pool.frames_in_list(), pool.live_frames());

        let h = pool.acquire().expect("h");
        pool.release(h);

        assert_eq!((pool.frames_in_list(), pool.live_frames()), before);
        assert_eq!(pool.release(h0), 0);
    }

    #[test]
    fn addref_release_leaves_refcount_unchanged() {
        let pool = FramePool::new();
        let h = pool.acquire().expect("acquire");
        assert_eq!(pool.addref(h), 2);
        assert_eq!(pool.release(h), 1);
        assert_eq!(pool.release(h), 0);
    }

    #[test]
    fn unknown_handle_returns_not_found_and_pool_is_untouched() {
        let pool = FramePool::new();
        let h = pool.acquire().expect("acquire");
        let shape = (pool.frames_in_list(), pool.live_frames());

        assert_eq!(pool.release(FrameHandle::from_raw(999)), -1);
        assert_eq!(pool.addref(FrameHandle::from_raw(999)), -1);
        assert_eq!(pool.release(FrameHandle::INVALID), -1);

        assert_eq!((pool.frames_in_list(), pool.live_frames()), shape);
        assert_eq!(pool.release(h), 0);
    }

    #[test]
    fn live_slots_never_exceed_cap() {
        let pool = FramePool::with_max_frames(4);
        let mut handles = Vec::new();
        for round in 0..3 {
            for _ in 0..4 {
                if let Ok(h) = pool.acquire() {
                    handles.push(h);
                }
            }
            assert!(pool.live_frames() <= 4);
            assert!(pool.frames_in_list() <= 4);
            if round < 2 {
                for h in handles.drain(..) {
                    pool.release(h);
                }
            }
        }
    }

    #[test]
    fn acquire_with_init_populates_headers_and_buffer() {
        let pool = FramePool::new();
        let init = FrameInit::video(1920, 1080, 8, SamplingFormat::YCbCr422);
        let h = pool.acquire_with_init(&init).expect("video init");
        assert_eq!(pool.media_size(h), 4_147_200);
        assert_eq!(
            pool.header(h, HeaderKind::MediaFormat),
            Some(MediaFormat::Video.code())
        );
        let len = pool.with_frame(h, |frame| frame.buffer().len());
        assert_eq!(len, Some(4_147_200));
        pool.release(h);
    }

    #[test]
    fn acquire_with_init_rejects_sizeless_audio() {
        let pool = FramePool::new();
        assert!(matches!(
            pool.acquire_with_init(&FrameInit::audio(0)),
            Err(PoolError::InvalidInit(_))
        ));
        // Nothing was acquired on the failed path.
        assert_eq!(pool.live_frames(), 0);
    }

    #[test]
    fn buffer_survives_release_and_reuse_of_the_slot() {
        let pool = FramePool::with_max_frames(1);
        let h = pool
            .acquire_with_init(&FrameInit::audio(64))
            .expect("audio frame");
        let cell = pool.frame(h).expect("cell");
        cell.with(|frame| frame.buffer_mut()[0] = 0xAB);

        pool.release(h);
        let h2 = pool.acquire().expect("reuse slot");
        assert_ne!(h, h2);
        // Same slot, same backing cell: release for reuse does not move the buffer.
        let cell2 = pool.frame(h2).expect("cell2");
        assert!(Arc::ptr_eq(&cell, &cell2));
        pool.release(h2);
    }
}
