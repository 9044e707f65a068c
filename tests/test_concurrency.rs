// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use edgefirst_capture::{
    framebuffer::{BufferCount, FrameBuffer, NO_FLAGS},
    image::PixelFormat,
};
use serial_test::serial;
use std::{
    sync::atomic::{AtomicBool, Ordering},
    thread,
};

const W: u32 = 128;
const H: u32 = 128;
const FRAME: usize = (W * H) as usize;

fn make_ring() -> FrameBuffer {
    let mut fb = FrameBuffer::new(3 * FRAME, false);
    fb.set_frame(W, H, PixelFormat::Grayscale);
    fb.set_buffers(BufferCount::Auto).unwrap();
    fb.setup_buffers();
    fb
}

// The stamp spreads a sequence-derived fill byte across the frame so a
// consumer observing a slot mid-overwrite fails the check.
fn stamp(data: &mut [u8], seq: u32) {
    data[..4].copy_from_slice(&seq.to_le_bytes());
    let fill = (seq % 251) as u8;
    for i in (64..FRAME).step_by(1024) {
        data[i] = fill;
    }
    data[FRAME - 1] = fill;
}

fn check(data: &[u8]) -> u32 {
    let seq = u32::from_le_bytes(data[..4].try_into().unwrap());
    let fill = (seq % 251) as u8;
    for i in (64..FRAME).step_by(1024) {
        assert_eq!(data[i], fill, "torn frame {seq}");
    }
    assert_eq!(data[FRAME - 1], fill, "torn frame {seq}");
    seq
}

fn produce_frame(fb: &FrameBuffer, seq: u32) {
    loop {
        if let Some(mut slot) = fb.get_tail(NO_FLAGS) {
            stamp(slot.data_mut(), seq);
            slot.commit(FRAME);
            return;
        }
        // Full with the oldest slot held; wait for the consumer.
        std::hint::spin_loop();
    }
}

/// Interleaves claim/commit against consume/free from two threads. Every
/// consumed frame must be fully written (no read before commit) and the
/// sequence must advance monotonically (drop-oldest loses frames, never
/// reorders or duplicates them).
#[test]
#[serial]
fn test_producer_consumer_stress() {
    const ITERS: u32 = 5000;
    let fb = make_ring();
    let fb = &fb;

    thread::scope(|s| {
        s.spawn(move || {
            for seq in 0..ITERS {
                produce_frame(fb, seq);
            }
        });

        s.spawn(move || {
            let mut last: Option<u32> = None;
            loop {
                let Some(frame) = fb.get_head(NO_FLAGS) else {
                    std::hint::spin_loop();
                    continue;
                };
                let seq = check(frame.data());
                if let Some(prev) = last {
                    assert!(prev < seq, "sequence went backwards: {prev} then {seq}");
                }
                last = Some(seq);
                drop(frame);
                fb.free_current();
                if seq == ITERS - 1 {
                    break;
                }
            }
        });
    });
}

/// Flushing from the consumer context with the producer live must never
/// corrupt a frame or wedge the ring.
#[test]
#[serial]
fn test_flush_with_live_producer() {
    const ITERS: u32 = 2000;
    let fb = make_ring();
    let fb = &fb;
    let done = AtomicBool::new(false);
    let done = &done;

    thread::scope(|s| {
        s.spawn(move || {
            for seq in 0..ITERS {
                produce_frame(fb, seq);
            }
            done.store(true, Ordering::Release);
        });

        s.spawn(move || {
            let mut last: Option<u32> = None;
            let mut consumed = 0u32;
            loop {
                match fb.get_head(NO_FLAGS) {
                    Some(frame) => {
                        let seq = check(frame.data());
                        if let Some(prev) = last {
                            assert!(prev < seq, "sequence went backwards: {prev} then {seq}");
                        }
                        last = Some(seq);
                        drop(frame);
                        fb.free_current();
                        consumed += 1;
                        if consumed % 64 == 0 {
                            fb.flush(true);
                        }
                    }
                    None => {
                        if done.load(Ordering::Acquire) && fb.get_head(NO_FLAGS).is_none() {
                            break;
                        }
                        std::hint::spin_loop();
                    }
                }
            }
        });
    });

    // Ring is still usable after the run.
    produce_frame(fb, 0);
    let frame = fb.get_head(NO_FLAGS).expect("ready frame");
    assert_eq!(check(frame.data()), 0);
    drop(frame);
    fb.free_current();
}
