// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use crate::error::{CaptureError, Result};
use std::{
    alloc::{alloc_zeroed, dealloc, handle_alloc_error, Layout},
    ptr::NonNull,
    sync::atomic::{AtomicBool, AtomicUsize, Ordering},
};

/// DMA buffers need to be aligned by cache lines.
pub const FRAME_ALIGNMENT: usize = 64;

pub(crate) const fn align_up(value: usize, align: usize) -> usize {
    (value + align - 1) & !(align - 1)
}

/// Owned byte buffer aligned to [`FRAME_ALIGNMENT`].
pub(crate) struct AlignedBuf {
    ptr: NonNull<u8>,
    layout: Layout,
    len: usize,
}

impl AlignedBuf {
    pub(crate) fn new(len: usize) -> Self {
        let size = align_up(len.max(FRAME_ALIGNMENT), FRAME_ALIGNMENT);
        let layout = Layout::from_size_align(size, FRAME_ALIGNMENT).expect("arena layout");
        // SAFETY: layout has non-zero size.
        let raw = unsafe { alloc_zeroed(layout) };
        let Some(ptr) = NonNull::new(raw) else {
            handle_alloc_error(layout);
        };
        Self { ptr, layout, len }
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    pub(crate) fn ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    pub(crate) fn as_slice(&self) -> &[u8] {
        // SAFETY: the allocation covers len bytes and lives as long as self.
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    pub(crate) fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: as above, with exclusive access through &mut self.
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }
}

impl Drop for AlignedBuf {
    fn drop(&mut self) {
        // SAFETY: ptr was allocated with this exact layout.
        unsafe { dealloc(self.ptr.as_ptr(), self.layout) };
    }
}

// SAFETY: AlignedBuf uniquely owns its allocation; the raw pointer is only
// an aliasing-free handle to it.
unsafe impl Send for AlignedBuf {}
unsafe impl Sync for AlignedBuf {}

/// Metadata for one virtual buffer within the arena.
///
/// The payload itself lives in the arena at `base..base + capacity`; this
/// descriptor carries the state the producer and consumer exchange about it.
/// Cross-context fields are atomics, ordered by the ring's commit cursor.
#[derive(Debug)]
pub struct Slot {
    base: usize,
    capacity: usize,
    bytes_used: AtomicUsize,
    overflow: AtomicBool,
    waiting: AtomicBool,
    needs_reset: AtomicBool,
}

impl Slot {
    fn new(base: usize, capacity: usize) -> Self {
        Self {
            base,
            capacity,
            bytes_used: AtomicUsize::new(0),
            overflow: AtomicBool::new(false),
            waiting: AtomicBool::new(false),
            needs_reset: AtomicBool::new(true),
        }
    }

    /// Payload capacity in bytes.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes of valid payload, meaningful for variable-size encoded frames.
    pub fn bytes_used(&self) -> usize {
        self.bytes_used.load(Ordering::Acquire)
    }

    /// Whether the last write into this slot overran its capacity.
    pub fn overflow(&self) -> bool {
        self.overflow.load(Ordering::Relaxed)
    }

    /// Whether the producer currently owns this slot and is filling it.
    pub fn waiting(&self) -> bool {
        self.waiting.load(Ordering::Relaxed)
    }

    /// Whether the slot content has been invalidated since last use.
    pub fn needs_reset(&self) -> bool {
        self.needs_reset.load(Ordering::Relaxed)
    }

    pub(crate) fn base(&self) -> usize {
        self.base
    }

    /// Producer claim: the slot leaves the free pool.
    pub(crate) fn begin_write(&self) {
        self.bytes_used.store(0, Ordering::Relaxed);
        self.overflow.store(false, Ordering::Relaxed);
        self.needs_reset.store(false, Ordering::Relaxed);
        self.waiting.store(true, Ordering::Release);
    }

    /// Producer commit half: record the payload length and clear the
    /// waiting flag. Visibility to the consumer is ordered by the ring's
    /// commit-cursor Release store, not by these fields alone.
    pub(crate) fn finish_write(&self, bytes: usize) {
        self.bytes_used.store(bytes, Ordering::Release);
        self.waiting.store(false, Ordering::Release);
    }

    pub(crate) fn set_overflow(&self, value: bool) {
        self.overflow.store(value, Ordering::Relaxed);
    }

    pub(crate) fn mark_reset(&self) {
        self.needs_reset.store(true, Ordering::Relaxed);
    }

    pub(crate) fn reset(&self) {
        self.bytes_used.store(0, Ordering::Relaxed);
        self.overflow.store(false, Ordering::Relaxed);
        self.waiting.store(false, Ordering::Relaxed);
        self.needs_reset.store(false, Ordering::Relaxed);
    }
}

/// The raw capture arena and its slot descriptor table.
///
/// Owns layout only; the head/tail policy over the slots lives in
/// [`crate::framebuffer::FrameBuffer`]. The arena is one aligned
/// allocation; slots are equal strides into it, described by a separate
/// table rather than headers embedded in the arena itself.
pub struct SlotStore {
    buf: AlignedBuf,
    dynamic: bool,
    buff_size: usize,
    slots: Vec<Slot>,
}

impl SlotStore {
    /// Reserves `total_size` bytes aligned for DMA. `dynamic` marks whether
    /// the arena may later be reallocated to fit a larger layout.
    pub fn new(total_size: usize, dynamic: bool) -> Self {
        Self {
            buf: AlignedBuf::new(total_size),
            dynamic,
            buff_size: 0,
            slots: Vec::new(),
        }
    }

    pub fn raw_size(&self) -> usize {
        self.buf.len()
    }

    pub fn dynamic(&self) -> bool {
        self.dynamic
    }

    pub fn n_buffers(&self) -> usize {
        self.slots.len()
    }

    /// Per-slot payload capacity chosen by the last layout.
    pub fn buff_size(&self) -> usize {
        self.buff_size
    }

    /// Replaces the arena with a fresh allocation of `total_size` bytes.
    /// Only meaningful for dynamic stores; any previous layout is gone.
    pub(crate) fn resize(&mut self, total_size: usize) {
        debug_assert!(self.dynamic);
        self.buf = AlignedBuf::new(total_size);
        self.slots.clear();
        self.buff_size = 0;
    }

    /// Partitions the arena into `n_buffers` slots of `buff_size` bytes.
    ///
    /// Fails when the request does not fit; on success every slot starts in
    /// the needs-reset state.
    pub fn layout(&mut self, n_buffers: usize, buff_size: usize) -> Result<()> {
        let needed = n_buffers.checked_mul(buff_size);
        if n_buffers == 0 || buff_size == 0 || needed.map_or(true, |n| n > self.raw_size()) {
            return Err(CaptureError::Capacity {
                requested: n_buffers,
                frame_size: buff_size,
                arena: self.raw_size(),
            });
        }
        self.buff_size = buff_size;
        self.slots = (0..n_buffers)
            .map(|i| Slot::new(i * buff_size, buff_size))
            .collect();
        Ok(())
    }

    /// Checked slot access for state inspection.
    pub fn slot(&self, index: usize) -> Result<&Slot> {
        self.slots.get(index).ok_or(CaptureError::Index {
            index,
            count: self.slots.len(),
        })
    }

    pub(crate) fn slot_at(&self, index: usize) -> &Slot {
        &self.slots[index]
    }

    pub(crate) fn payload_ptr(&self, index: usize) -> *mut u8 {
        // SAFETY: layout() guarantees base + capacity <= raw_size.
        unsafe { self.buf.ptr().add(self.slots[index].base()) }
    }

    /// Address immediately past the last slot, for callers placing a
    /// secondary structure after the ring.
    pub fn end(&self) -> *const u8 {
        // SAFETY: n_buffers * buff_size <= raw_size by layout().
        unsafe { self.buf.ptr().add(self.slots.len() * self.buff_size) }
    }
}
