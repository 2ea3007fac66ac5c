//! Lock-free double buffer for decoded frames
//!
//! This module implements the hand-off between the decode thread (producer)
//! and the display side (consumer) with at most one frame of staleness and
//! without blocking either side.
//!
//! # Design
//!
//! The channel owns exactly two pixel buffers and two monotonic cycle
//! counters, `paint_index` and `write_index`. A counter selects its buffer
//! by parity (`index % 2`):
//! - `paint_index == write_index` means no frame is pending.
//! - The producer borrows buffer `write_index % 2`, fills it, and commits.
//!   The commit only advances `write_index` when the consumer has caught up;
//!   otherwise the frame is dropped.
//! - The consumer draws buffer `paint_index % 2` cropped to the committed
//!   extent, then catches `paint_index` up to `write_index`.
//!
//! Because a new write only ever targets the buffer the consumer is *not*
//! exposed to, the consumer always observes either a fully committed frame
//! or nothing.
//!
//! # Safety
//!
//! The buffers live in `UnsafeCell`s and are accessed without locks. The
//! invariants making that sound:
//!
//! 1. Exactly one producer thread calls `acquire_write_buffer`/`commit`, and
//!    it is quiescent before `stop()` is called (the engine is stopped
//!    first). `start()` during a session runs on the producer thread itself.
//! 2. The producer only touches buffer `write_index % 2`; the consumer only
//!    touches `paint_index % 2`, and only while `paint_index != write_index`,
//!    which makes the two parities distinct.
//! 3. Pixel writes happen-before the `write_index` release store; the
//!    consumer acquires `write_index` before reading. The consumer's reads
//!    happen-before its `paint_index` release store, which the producer
//!    acquires before reusing a buffer.
//! 4. `stop()` and an in-flight paint are ordered by the `armed`/`paint_busy`
//!    flag pair with sequentially consistent ordering, so buffers are never
//!    released under a running paint closure.

use crate::bridge::format::stride;
use crate::engine::FrameLease;
use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, AtomicUsize, Ordering};

/// Largest accepted frame dimension.
pub const MAX_DIMENSION: i32 = 0x7FFF;

/// Borrowed view of the committed frame, valid for one paint closure.
pub struct PaintView<'a> {
    /// Pixel rows, `stride` bytes apart, allocated for the armed maximum.
    pub data: &'a [u8],
    /// Committed frame width in pixels.
    pub width: i32,
    /// Committed frame height in rows.
    pub height: i32,
    /// Bytes per row.
    pub stride: i32,
    /// Bits per pixel, 24 or 32.
    pub bits: i32,
}

pub struct FrameChannel {
    /// The two pixel buffers, selected by counter parity.
    slots: [UnsafeCell<Vec<u8>>; 2],

    /// Cycle counter of the frame exposed to the consumer.
    paint_index: AtomicU32,

    /// Cycle counter of the buffer the producer fills next.
    write_index: AtomicU32,

    /// Width and height of the most recent committed frame, packed
    /// `(width << 16) | height`.
    pending_extent: AtomicU32,

    armed: AtomicBool,
    /// A write lease is outstanding.
    write_busy: AtomicBool,
    /// A paint closure is running.
    paint_busy: AtomicBool,

    max_width: AtomicI32,
    max_height: AtomicI32,
    bits: AtomicI32,
    row_stride: AtomicI32,
    capacity: AtomicUsize,
}

// SAFETY: all shared mutation goes through the counter-parity protocol and
// the armed/busy flags described in the module docs.
unsafe impl Send for FrameChannel {}
unsafe impl Sync for FrameChannel {}

impl FrameChannel {
    pub fn new() -> FrameChannel {
        FrameChannel {
            slots: [UnsafeCell::new(Vec::new()), UnsafeCell::new(Vec::new())],
            paint_index: AtomicU32::new(0),
            write_index: AtomicU32::new(0),
            pending_extent: AtomicU32::new(0),
            armed: AtomicBool::new(false),
            write_busy: AtomicBool::new(false),
            paint_busy: AtomicBool::new(false),
            max_width: AtomicI32::new(0),
            max_height: AtomicI32::new(0),
            bits: AtomicI32::new(0),
            row_stride: AtomicI32::new(0),
            capacity: AtomicUsize::new(0),
        }
    }

    /// Arm the channel for frames up to `max_width` x `max_height` at
    /// `bits` per pixel. Returns false when already armed or when the
    /// bounds are invalid.
    pub fn start(&self, max_width: i32, max_height: i32, bits: i32) -> bool {
        if self.armed.load(Ordering::SeqCst) {
            return false;
        }
        if max_width < 1 || max_width > MAX_DIMENSION || max_height < 1 || max_height > MAX_DIMENSION {
            log::warn!("Frame channel bounds out of range: {}x{}", max_width, max_height);
            return false;
        }
        if bits != 24 && bits != 32 {
            log::warn!("Frame channel pixel depth not supported: {}", bits);
            return false;
        }

        let row = stride(max_width, bits);
        let capacity = row as usize * max_height as usize;

        // SAFETY: the channel is not armed, so no paint closure can be
        // running (see stop) and no lease is outstanding; the slots are
        // unreferenced.
        unsafe {
            *self.slots[0].get() = vec![0u8; capacity];
            *self.slots[1].get() = vec![0u8; capacity];
        }

        self.paint_index.store(0, Ordering::Relaxed);
        self.write_index.store(0, Ordering::Relaxed);
        self.pending_extent.store(0, Ordering::Relaxed);
        self.write_busy.store(false, Ordering::Relaxed);
        self.max_width.store(max_width, Ordering::Relaxed);
        self.max_height.store(max_height, Ordering::Relaxed);
        self.bits.store(bits, Ordering::Relaxed);
        self.row_stride.store(row, Ordering::Relaxed);
        self.capacity.store(capacity, Ordering::Relaxed);

        self.armed.store(true, Ordering::SeqCst);
        true
    }

    /// Disarm the channel and release both buffers. Safe to call
    /// redundantly.
    ///
    /// Must not be called while a write lease is outstanding; the producer
    /// has to be quiescent first.
    pub fn stop(&self) {
        if !self.armed.swap(false, Ordering::SeqCst) {
            return;
        }

        assert!(
            !self.write_busy.load(Ordering::SeqCst),
            "frame channel stopped with a write lease outstanding"
        );

        // Wait out an in-flight paint closure. Paint closures are short
        // pixel copies, so this wait is bounded.
        while self.paint_busy.load(Ordering::SeqCst) {
            std::thread::yield_now();
        }

        // SAFETY: armed is false and the paint side has drained, so nothing
        // references the slots anymore.
        unsafe {
            *self.slots[0].get() = Vec::new();
            *self.slots[1].get() = Vec::new();
        }

        self.paint_index.store(0, Ordering::Relaxed);
        self.write_index.store(0, Ordering::Relaxed);
        self.pending_extent.store(0, Ordering::Relaxed);
        self.max_width.store(0, Ordering::Relaxed);
        self.max_height.store(0, Ordering::Relaxed);
        self.bits.store(0, Ordering::Relaxed);
        self.row_stride.store(0, Ordering::Relaxed);
        self.capacity.store(0, Ordering::Relaxed);
    }

    pub fn is_armed(&self) -> bool {
        self.armed.load(Ordering::SeqCst)
    }

    /// Armed maximum extent, (0, 0) while idle.
    pub fn max_extent(&self) -> (i32, i32) {
        (
            self.max_width.load(Ordering::Relaxed),
            self.max_height.load(Ordering::Relaxed),
        )
    }

    /// Bytes between adjacent rows in the allocated buffers, 0 while idle.
    ///
    /// Producers must pack rows at this stride; it can exceed the minimum
    /// stride of a frame narrower than the armed maximum.
    pub fn row_stride(&self) -> i32 {
        self.row_stride.load(Ordering::Relaxed)
    }

    /// A committed frame is waiting for the consumer.
    pub fn has_pending(&self) -> bool {
        self.paint_index.load(Ordering::Relaxed) != self.write_index.load(Ordering::Acquire)
    }

    /// Borrow the write buffer for one fill/commit cycle.
    ///
    /// Panics when the channel is not armed or a lease is already out; both
    /// mean the producer protocol is broken.
    pub fn acquire_write_buffer(&self) -> FrameLease {
        assert!(
            self.armed.load(Ordering::SeqCst),
            "write buffer requested on an idle frame channel"
        );
        assert!(
            !self.write_busy.swap(true, Ordering::SeqCst),
            "write buffer requested while a lease is outstanding"
        );

        let cycle = self.write_index.load(Ordering::Relaxed);

        // SAFETY: write_busy was clear, so no other lease references this
        // slot, and the consumer never touches the write parity (module
        // invariant 2).
        let data = unsafe { std::mem::take(&mut *self.slots[cycle as usize % 2].get()) };

        FrameLease { data, cycle }
    }

    /// Return a filled lease with the frame's extent.
    ///
    /// Returns true when the frame was published; false when it was dropped
    /// because the consumer has not caught up yet, or rejected because the
    /// lease or extent does not match the channel state (the channel is
    /// left unchanged in that case).
    pub fn commit(&self, lease: FrameLease, width: i32, height: i32) -> bool {
        if !self.armed.load(Ordering::SeqCst) {
            log::error!("Frame commit on an idle channel dropped");
            return false;
        }

        let write = self.write_index.load(Ordering::Relaxed);
        if lease.cycle != write {
            log::error!("Frame commit with a stale lease dropped (cycle {} vs {})", lease.cycle, write);
            return false;
        }
        if lease.data.len() != self.capacity.load(Ordering::Relaxed) {
            log::error!("Frame commit with a foreign buffer dropped ({} bytes)", lease.data.len());
            return false;
        }

        // The lease checks out: give its storage back to the slot before
        // any further validation, so a rejected extent still leaves the
        // channel usable.
        //
        // SAFETY: the lease cycle matches write_index, so this is the slot
        // the lease was taken from; only this producer references it.
        unsafe {
            *self.slots[write as usize % 2].get() = lease.data;
        }
        self.write_busy.store(false, Ordering::SeqCst);

        if width < 1
            || height < 1
            || width > self.max_width.load(Ordering::Relaxed)
            || height > self.max_height.load(Ordering::Relaxed)
        {
            log::error!("Frame commit extent {}x{} out of bounds dropped", width, height);
            return false;
        }

        // The consumer's reads of the other slot happen-before this load;
        // advancing makes that slot the next write target.
        let paint = self.paint_index.load(Ordering::Acquire);
        if paint != write {
            // Consumer still has a frame to pick up; drop this one.
            return false;
        }

        self.pending_extent
            .store(pack_extent(width, height), Ordering::Relaxed);
        self.write_index.store(write.wrapping_add(1), Ordering::Release);
        true
    }

    /// Run `draw` over the committed frame, if one is pending.
    ///
    /// Returns true when `draw` ran; false when the channel is idle or no
    /// frame is pending, in which case the caller paints its neutral fill.
    pub fn paint<F>(&self, draw: F) -> bool
    where
        F: FnOnce(PaintView<'_>),
    {
        if !self.armed.load(Ordering::SeqCst) {
            return false;
        }

        self.paint_busy.store(true, Ordering::SeqCst);

        // Re-check under the busy flag: a concurrent stop() either sees the
        // flag and waits, or already disarmed and we must back off.
        if !self.armed.load(Ordering::SeqCst) {
            self.paint_busy.store(false, Ordering::SeqCst);
            return false;
        }

        let paint = self.paint_index.load(Ordering::Relaxed);
        let write = self.write_index.load(Ordering::Acquire);
        if paint == write {
            self.paint_busy.store(false, Ordering::SeqCst);
            return false;
        }

        let (width, height) = unpack_extent(self.pending_extent.load(Ordering::Relaxed));

        // SAFETY: paint != write, so this parity is not the write target;
        // the acquire on write_index made the committed pixels visible.
        let data = unsafe { &*self.slots[paint as usize % 2].get() };

        draw(PaintView {
            data,
            width,
            height,
            stride: self.row_stride.load(Ordering::Relaxed),
            bits: self.bits.load(Ordering::Relaxed),
        });

        // Publish that this slot may be rewritten. write cannot have moved
        // while we painted: a commit only advances once we catch up here.
        self.paint_index.store(write, Ordering::Release);
        self.paint_busy.store(false, Ordering::SeqCst);
        true
    }
}

fn pack_extent(width: i32, height: i32) -> u32 {
    ((width as u32 & 0xFFFF) << 16) | (height as u32 & 0xFFFF)
}

fn unpack_extent(packed: u32) -> (i32, i32) {
    (((packed >> 16) & 0xFFFF) as i32, (packed & 0xFFFF) as i32)
}
