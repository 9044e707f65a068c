// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! # EdgeFirst Capture Buffer Library
//!
//! This library manages the image-capture memory of an embedded
//! machine-vision pipeline: a fixed DMA-aligned arena partitioned into a
//! small ring of frame slots between the sensor producer and the image
//! processing consumer, plus a single-slot JPEG channel holding the latest
//! encoded frame for a host debugger preview.
//!
//! ## Features
//!
//! - **Slot ring**: lock-free single-producer/single-consumer frame FIFO
//!   with peek/commit semantics and drop-oldest backpressure for bounded
//!   capture latency.
//! - **Runtime sizing**: FIFO depth chosen per arena budget — triple or
//!   double buffering, or one whole-arena slot for oversized captures.
//! - **Preview channel**: mutex-guarded JPEG buffer that encodes, copies,
//!   or streams a source frame depending on what is cheapest.
//! - **Zero-copy views**: framebuffer slots surface as borrowed image
//!   descriptors without copying pixel data.
//!
//! ## Example
//!
//! ```
//! use edgefirst_capture::{
//!     capture::{CaptureConfig, CaptureContext},
//!     framebuffer::{BufferCount, NO_FLAGS},
//!     image::PixelFormat,
//! };
//!
//! # fn main() -> edgefirst_capture::Result<()> {
//! let mut ctx = CaptureContext::new(CaptureConfig::default())?;
//!
//! // Configure capture geometry and FIFO depth.
//! let fb = ctx.get_mut(0)?;
//! fb.set_frame(640, 480, PixelFormat::Yuyv);
//! fb.set_buffers(BufferCount::Auto)?;
//! fb.setup_buffers();
//!
//! // Producer side: claim a slot, fill it, publish.
//! let mut slot = fb.get_tail(NO_FLAGS).expect("free slot");
//! let len = slot.capacity();
//! slot.data_mut().fill(0x80);
//! slot.commit(len);
//!
//! // Consumer side: take the oldest frame, process, release.
//! let frame = fb.get_head(NO_FLAGS).expect("ready frame");
//! assert_eq!(frame.data().len(), len);
//! fb.free_current();
//! # Ok(())
//! # }
//! ```
//!
//! ## Concurrency
//!
//! The producer runs in the DMA-completion context and the consumer in the
//! application context. No framebuffer operation blocks; an empty or full
//! FIFO is an explicit `None`. Only the preview channel takes a lock, and
//! only for the duration of one update.
//!
//! ## Safety
//!
//! Slot payloads live in a raw aligned arena, so payload access uses
//! `unsafe` internally. All unsafe operations are isolated behind the
//! head/tail ownership protocol and wrapped with safe APIs.

pub mod arena;
pub mod capture;
pub mod error;
pub mod framebuffer;
pub mod image;
pub mod preview;

pub use error::{CaptureError, Result};
