// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use crate::{
    arena::{align_up, Slot, SlotStore, FRAME_ALIGNMENT},
    error::{CaptureError, Result},
    image::{ImageView, PixelFormat},
};
use bitflags::bitflags;
use core::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use tracing::{debug, trace};

bitflags! {
    /// Access flags for [`FrameBuffer::get_head`] and
    /// [`FrameBuffer::get_tail`].
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct CaptureFlags: u32 {
        /// Inspect the slot without moving the head or tail.
        const PEEK = 1 << 0;
        /// The caller must invalidate data-cache lines over the returned
        /// payload before reading it. Advisory on cache-coherent targets.
        const INVALIDATE = 1 << 1;
    }
}

/// Default access: claim or consume, no cache hint.
pub const NO_FLAGS: CaptureFlags = CaptureFlags::empty();

/// FIFO depth request for [`FrameBuffer::set_buffers`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BufferCount {
    /// Largest depth up to triple buffering that fits the arena.
    Auto,
    /// Exactly this many slots. `Exact(1)` spans the whole arena with a
    /// single slot and ignores the frame size.
    Exact(u32),
}

// Sequence counters are free-running 31-bit values; the top bit of `head`
// flags the slot the consumer currently holds. Slot index = seq % n_buffers,
// so the counters wrap at a multiple of n_buffers (seq_limit) to keep the
// mapping collision-free across the wrap.
const HELD: u32 = 1 << 31;
const SEQ_MASK: u32 = HELD - 1;

const fn seq(v: u32) -> u32 {
    v & SEQ_MASK
}

const fn wrap_next(v: u32, limit: u32) -> u32 {
    let n = v + 1;
    if n == limit {
        0
    } else {
        n
    }
}

const fn wrap_prev(v: u32, limit: u32) -> u32 {
    if v == 0 {
        limit - 1
    } else {
        v - 1
    }
}

// Counters are below limit <= 2^31 - 1, so the sum cannot overflow.
const fn wrap_diff(a: u32, b: u32, limit: u32) -> u32 {
    (a + limit - b) % limit
}

/// One capture pipeline's frame FIFO over a [`SlotStore`] arena.
///
/// The producer (sensor DMA completion) claims slots with
/// [`get_tail`](Self::get_tail), fills them, and publishes with
/// [`WriteSlot::commit`]. The consumer takes the oldest committed frame
/// with [`get_head`](Self::get_head), processes it, and returns the slot
/// with [`free_current`](Self::free_current). Neither side blocks: an empty
/// or full FIFO is an explicit `None`.
///
/// Reconfiguration ([`set_buffers`](Self::set_buffers),
/// [`init_from_image`](Self::init_from_image)) takes `&mut self`, so the
/// type system rules out resizing a ring with capture in flight; the
/// capture-time calls all take `&self` and may run concurrently from two
/// execution contexts.
///
/// When the FIFO is full the producer overwrites the oldest unconsumed
/// frame, trading completeness for bounded latency. The one exception: if
/// the consumer holds that oldest slot, `get_tail` returns `None` until it
/// is freed. In single-buffer mode the sole slot is always overwritten and
/// the producer and consumer coordinate externally.
pub struct FrameBuffer {
    x: i32,
    y: i32,
    w: u32,
    h: u32,
    format: PixelFormat,
    frame_size: usize,
    store: SlotStore,
    seq_limit: u32,
    head: AtomicU32,
    tail: AtomicU32,
    wtail: AtomicU32,
    check_head: AtomicBool,
    sampled_tail: AtomicU32,
}

// SAFETY: slot payloads are raw regions of the owned arena. Concurrent
// access to them is serialized by the head/tail protocol (a slot has one
// owner at a time), and the arena pointer itself only moves through &mut
// methods.
unsafe impl Send for FrameBuffer {}
unsafe impl Sync for FrameBuffer {}

impl FrameBuffer {
    /// Reserves a capture arena of `size` bytes. `dynamic` allows later
    /// reconfiguration to reallocate the arena instead of failing when the
    /// requested layout outgrows it.
    ///
    /// The geometry starts unset; call [`init_from_image`] or [`set_frame`]
    /// and then [`set_buffers`] before capturing.
    ///
    /// [`init_from_image`]: Self::init_from_image
    /// [`set_frame`]: Self::set_frame
    /// [`set_buffers`]: Self::set_buffers
    pub fn new(size: usize, dynamic: bool) -> Self {
        Self {
            x: 0,
            y: 0,
            w: 0,
            h: 0,
            format: PixelFormat::Grayscale,
            frame_size: 0,
            store: SlotStore::new(size, dynamic),
            seq_limit: 0,
            head: AtomicU32::new(0),
            tail: AtomicU32::new(0),
            wtail: AtomicU32::new(0),
            check_head: AtomicBool::new(true),
            sampled_tail: AtomicU32::new(0),
        }
    }

    pub fn x(&self) -> i32 {
        self.x
    }

    pub fn y(&self) -> i32 {
        self.y
    }

    pub fn width(&self) -> u32 {
        self.w
    }

    pub fn height(&self) -> u32 {
        self.h
    }

    pub fn pixel_format(&self) -> PixelFormat {
        self.format
    }

    /// Bytes one frame needs at the current geometry, rounded up to the
    /// DMA alignment.
    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    pub fn raw_size(&self) -> usize {
        self.store.raw_size()
    }

    pub fn n_buffers(&self) -> usize {
        self.store.n_buffers()
    }

    /// Sets the capture geometry and pixel format.
    pub fn set_frame(&mut self, width: u32, height: u32, format: PixelFormat) {
        self.w = width;
        self.h = height;
        self.format = format;
        self.frame_size = align_up(format.frame_bytes(width, height), FRAME_ALIGNMENT);
    }

    /// Adopts geometry and format from an image descriptor.
    pub fn init_from_image(&mut self, img: &ImageView) {
        self.x = 0;
        self.y = 0;
        self.set_frame(img.width(), img.height(), img.format());
    }

    /// Chooses the FIFO depth and partitions the arena.
    ///
    /// `Auto` prefers triple buffering and degrades to double, then single,
    /// then fails with a capacity error if not even one frame fits.
    /// `Exact(1)` turns the whole arena into one slot, trading FIFO depth
    /// for maximum per-frame size. Any other count must fit exactly.
    /// A dynamic arena grows to fit instead of failing.
    ///
    /// Success empties the FIFO and marks every slot for reset.
    pub fn set_buffers(&mut self, count: BufferCount) -> Result<()> {
        let frame = self.frame_size;
        let capacity_error = |requested: usize, arena: usize| CaptureError::Capacity {
            requested,
            frame_size: frame,
            arena,
        };

        let (n, slot_size) = match count {
            BufferCount::Exact(0) => {
                return Err(capacity_error(0, self.store.raw_size()));
            }
            BufferCount::Exact(1) => {
                // Whole arena, frame size ignored.
                (1, self.store.raw_size())
            }
            BufferCount::Exact(n) => {
                let n = n as usize;
                let Some(needed) = n.checked_mul(frame).filter(|_| frame != 0) else {
                    return Err(capacity_error(n, self.store.raw_size()));
                };
                if needed > self.store.raw_size() {
                    if !self.store.dynamic() {
                        return Err(capacity_error(n, self.store.raw_size()));
                    }
                    self.store.resize(needed);
                }
                (n, frame)
            }
            BufferCount::Auto => {
                if frame == 0 {
                    return Err(capacity_error(1, self.store.raw_size()));
                }
                if self.store.dynamic() && 3 * frame > self.store.raw_size() {
                    self.store.resize(3 * frame);
                }
                let fit = (1..=3usize)
                    .rev()
                    .find(|n| n * frame <= self.store.raw_size());
                match fit {
                    Some(1) => (1, self.store.raw_size()),
                    Some(n) => (n, frame),
                    None => return Err(capacity_error(1, self.store.raw_size())),
                }
            }
        };

        self.store.layout(n, slot_size)?;
        self.seq_limit = (SEQ_MASK / n as u32) * n as u32;
        self.reset_fifo();
        debug!(
            n_buffers = n,
            slot_size,
            arena = self.store.raw_size(),
            "framebuffer layout"
        );
        Ok(())
    }

    /// Post-layout slot preparation. Idempotent; clears the reset marks
    /// left by [`set_buffers`](Self::set_buffers) so capture can start.
    pub fn setup_buffers(&mut self) {
        for i in 0..self.store.n_buffers() {
            let slot = self.store.slot_at(i);
            if slot.needs_reset() {
                slot.reset();
            }
        }
    }

    /// Per-slot payload capacity, which bounds the byte count of any frame
    /// the ring can hold.
    pub fn buffer_size(&self) -> usize {
        if self.format.is_compressed() {
            self.store.buff_size()
        } else {
            self.format
                .frame_bytes(self.w, self.h)
                .min(self.store.buff_size())
        }
    }

    /// State of one slot, primarily for driver integration and tests.
    pub fn buffer(&self, index: usize) -> Result<&Slot> {
        self.store.slot(index)
    }

    /// Address immediately past the last slot.
    pub fn buffers_end(&self) -> *const u8 {
        self.store.end()
    }

    /// Returns the slot the producer should fill next.
    ///
    /// Without `PEEK` the slot is claimed: it is marked waiting-for-data
    /// and the write cursor advances. The frame becomes visible to the
    /// consumer only at [`WriteSlot::commit`], typically from the DMA
    /// completion callback. Calling again before commit returns the same
    /// outstanding slot. With `PEEK` the call has no side effects and the
    /// returned slot must not be written.
    ///
    /// Returns `None` when nothing can be claimed: the FIFO is full and
    /// the oldest slot is in the consumer's hands. Otherwise a full FIFO
    /// drops its oldest committed frame to make room.
    pub fn get_tail(&self, flags: CaptureFlags) -> Option<WriteSlot<'_>> {
        let n = self.store.n_buffers();
        if n == 0 {
            return None;
        }
        let peek = flags.contains(CaptureFlags::PEEK);
        let t = self.tail.load(Ordering::Relaxed);
        let wt = self.wtail.load(Ordering::Relaxed);

        if wt != t {
            // A claim is outstanding (DMA still filling it).
            return Some(self.write_slot(t, true));
        }

        if n > 1 {
            loop {
                let h = self.head.load(Ordering::SeqCst);
                if (wrap_diff(t, seq(h), self.seq_limit) as usize) < n {
                    break;
                }
                if h & HELD != 0 {
                    // The oldest slot is being consumed; nothing to drop.
                    return None;
                }
                if peek {
                    break;
                }
                // FIFO full: drop the oldest committed frame. The consumer
                // claims through the same CAS target, so only one side wins
                // this slot.
                if self
                    .head
                    .compare_exchange(
                        h,
                        wrap_next(seq(h), self.seq_limit),
                        Ordering::SeqCst,
                        Ordering::SeqCst,
                    )
                    .is_ok()
                {
                    trace!(slot = seq(h) as usize % n, "dropping oldest frame");
                    break;
                }
            }
        }

        if peek {
            return Some(self.write_slot(t, false));
        }

        let slot = self.store.slot_at(t as usize % n);
        slot.begin_write();
        self.wtail.store(wrap_next(t, self.seq_limit), Ordering::Release);
        Some(self.write_slot(t, true))
    }

    /// Returns the oldest committed frame, or `None` when the FIFO is
    /// empty.
    ///
    /// The commit cursor is sampled once per consumer pass, so repeated
    /// calls within a pass agree even while the producer keeps committing;
    /// a pass ends at [`free_current`](Self::free_current) or
    /// [`flush`](Self::flush). With `PEEK` the frame is not claimed; a
    /// subsequent non-peek call returns the same frame. While a frame is
    /// held, every call returns that frame.
    pub fn get_head(&self, flags: CaptureFlags) -> Option<ReadSlot<'_>> {
        let n = self.store.n_buffers();
        if n == 0 {
            return None;
        }
        let peek = flags.contains(CaptureFlags::PEEK);

        loop {
            let h = self.head.load(Ordering::SeqCst);
            if h & HELD != 0 {
                return Some(self.read_slot(seq(h)));
            }
            let hs = seq(h);

            let mut fresh = false;
            let mut t = if self.check_head.load(Ordering::Relaxed) {
                fresh = true;
                let t = self.tail.load(Ordering::Acquire);
                self.sampled_tail.store(t, Ordering::Relaxed);
                self.check_head.store(false, Ordering::Relaxed);
                t
            } else {
                self.sampled_tail.load(Ordering::Relaxed)
            };

            if wrap_diff(t, hs, self.seq_limit) == 0 {
                if fresh {
                    return None;
                }
                // The reused sample went stale (the producer wrapped past
                // it, or the pass outlived a flush). One fresh sample
                // before reporting empty.
                t = self.tail.load(Ordering::Acquire);
                self.sampled_tail.store(t, Ordering::Relaxed);
                if wrap_diff(t, hs, self.seq_limit) == 0 {
                    return None;
                }
            }

            if peek {
                return Some(self.read_slot(hs));
            }
            if self
                .head
                .compare_exchange(h, h | HELD, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                return Some(self.read_slot(hs));
            }
            // Lost the oldest frame to a producer overwrite; retry with the
            // advanced head.
        }
    }

    /// Returns the held slot to the free pool. A no-op when no slot is
    /// held, so calling twice is safe.
    pub fn free_current(&self) {
        let n = self.store.n_buffers();
        if n == 0 {
            return;
        }
        let h = self.head.load(Ordering::SeqCst);
        if h & HELD == 0 {
            return;
        }
        let hs = seq(h);
        self.store.slot_at(hs as usize % n).mark_reset();
        // While HELD is set the producer never touches head, so a plain
        // store is race-free here.
        self.head.store(wrap_next(hs, self.seq_limit), Ordering::SeqCst);
        self.check_head.store(true, Ordering::Relaxed);
    }

    /// Clears the FIFO.
    ///
    /// With `fifo_flush` every queued frame (and any held slot) is
    /// discarded. Safe to call from the consumer context at any time: the
    /// producer cursors are untouched, so an in-flight DMA write commits
    /// into a fresh slot afterwards. Without `fifo_flush` only the most
    /// recently committed frame survives as the sole ready slot, giving
    /// latest-frame semantics without a reconfigure.
    pub fn flush(&self, fifo_flush: bool) {
        let n = self.store.n_buffers();
        if n == 0 {
            return;
        }
        let t = self.tail.load(Ordering::Acquire);
        if fifo_flush {
            self.head.store(t, Ordering::SeqCst);
            debug!("fifo flushed");
        } else {
            let h = self.head.load(Ordering::SeqCst);
            if wrap_diff(t, seq(h), self.seq_limit) > 0 {
                self.head.store(wrap_prev(t, self.seq_limit), Ordering::SeqCst);
            }
        }
        self.check_head.store(true, Ordering::Relaxed);
    }

    /// Describes the held frame as an image, without copying pixels.
    ///
    /// Returns `None` unless a frame is currently held via
    /// [`get_head`](Self::get_head).
    pub fn init_image(&self) -> Option<ImageView<'_>> {
        let n = self.store.n_buffers();
        if n == 0 {
            return None;
        }
        let h = self.head.load(Ordering::SeqCst);
        if h & HELD == 0 {
            return None;
        }
        let slot = self.read_slot(seq(h));
        let data = slot.data();
        Some(ImageView::new(self.w, self.h, self.format, data))
    }

    fn payload_len(&self, slot: &Slot) -> usize {
        if self.format.is_compressed() {
            slot.bytes_used().min(slot.capacity())
        } else {
            self.format
                .frame_bytes(self.w, self.h)
                .min(slot.capacity())
        }
    }

    fn write_slot(&self, seq: u32, claimed: bool) -> WriteSlot<'_> {
        let index = seq as usize % self.store.n_buffers();
        WriteSlot {
            fb: self,
            slot: self.store.slot_at(index),
            data: self.store.payload_ptr(index),
            index,
            seq,
            claimed,
        }
    }

    fn read_slot(&self, seq: u32) -> ReadSlot<'_> {
        let index = seq as usize % self.store.n_buffers();
        let slot = self.store.slot_at(index);
        ReadSlot {
            fb: self,
            slot,
            data: self.store.payload_ptr(index),
            index,
        }
    }

    fn reset_fifo(&mut self) {
        self.head.store(0, Ordering::SeqCst);
        self.tail.store(0, Ordering::SeqCst);
        self.wtail.store(0, Ordering::SeqCst);
        self.sampled_tail.store(0, Ordering::SeqCst);
        self.check_head.store(true, Ordering::SeqCst);
    }
}

impl fmt::Display for FrameBuffer {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{}x{} {} {} buffers of {} bytes",
            self.w,
            self.h,
            self.format,
            self.store.n_buffers(),
            self.store.buff_size()
        )
    }
}

/// Producer-side handle to a claimed slot.
///
/// Fill the payload through [`data_mut`](Self::data_mut), then publish with
/// [`commit`](Self::commit). Dropping without committing leaves the claim
/// outstanding; the next `get_tail` hands the same slot back. A handle
/// obtained with `PEEK` is inspection-only and cannot commit.
pub struct WriteSlot<'a> {
    fb: &'a FrameBuffer,
    slot: &'a Slot,
    data: *mut u8,
    index: usize,
    seq: u32,
    claimed: bool,
}

impl WriteSlot<'_> {
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn capacity(&self) -> usize {
        self.slot.capacity()
    }

    /// Flags the frame as having overrun its buffer (oversized encoded
    /// capture). Surfaced to the consumer on its next inspection.
    pub fn set_overflow(&self) {
        self.slot.set_overflow(true);
    }

    /// Mutable payload access.
    pub fn data_mut(&mut self) -> &mut [u8] {
        // SAFETY: the claim gives this handle exclusive write ownership of
        // the slot region until commit; the arena outlives the borrow.
        unsafe { std::slice::from_raw_parts_mut(self.data, self.slot.capacity()) }
    }

    /// Publishes the frame with `bytes` of valid payload. All payload
    /// writes made through this handle become visible to the consumer
    /// before the frame does.
    pub fn commit(self, bytes: usize) {
        if !self.claimed {
            return;
        }
        self.slot.finish_write(bytes.min(self.slot.capacity()));
        self.fb
            .tail
            .store(wrap_next(self.seq, self.fb.seq_limit), Ordering::Release);
    }
}

/// Consumer-side handle to a committed frame.
pub struct ReadSlot<'a> {
    fb: &'a FrameBuffer,
    slot: &'a Slot,
    data: *const u8,
    index: usize,
}

impl<'a> ReadSlot<'a> {
    pub fn index(&self) -> usize {
        self.index
    }

    /// Bytes of valid payload in the frame.
    pub fn bytes_used(&self) -> usize {
        self.fb.payload_len(self.slot)
    }

    pub fn overflow(&self) -> bool {
        self.slot.overflow()
    }

    /// Frame payload.
    pub fn data(&self) -> &'a [u8] {
        // SAFETY: the frame was committed before the head claim observed
        // it, and the producer cannot reclaim a held or queued slot out of
        // order; the arena outlives the borrow.
        unsafe { std::slice::from_raw_parts(self.data, self.fb.payload_len(self.slot)) }
    }
}
