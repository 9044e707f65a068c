// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Error types for the capture buffer manager.
//!
//! Layout failures are surfaced synchronously from the configuration calls.
//! Per-frame conditions (an empty or full FIFO) are not errors; those are
//! reported as `None` results from the head/tail accessors. Encoder problems
//! on the preview path are recorded in the channel flags and reported through
//! the update outcome rather than unwinding the capture loop.

use thiserror::Error;

/// Convenience alias for results using the capture error type.
pub type Result<T> = std::result::Result<T, CaptureError>;

#[derive(Error, Debug)]
pub enum CaptureError {
    /// The requested slot layout does not fit the arena. The caller must
    /// fall back to a smaller buffer count or a larger arena.
    #[error(
        "buffer layout does not fit: {requested} x {frame_size} byte frames in a {arena} byte arena"
    )]
    Capacity {
        requested: usize,
        frame_size: usize,
        arena: usize,
    },

    /// Out-of-range slot index. This is a programming error in the caller.
    #[error("slot index {index} out of range 0..{count}")]
    Index { index: usize, count: usize },

    /// The encoded frame exceeds the preview channel capacity. Recovered by
    /// dropping or streaming the frame, never fatal to the pipeline.
    #[error("encoded frame exceeds preview capacity of {capacity} bytes")]
    EncodeOverflow { capacity: usize },

    /// The underlying JPEG encoder failed.
    #[error("encoder failure: {0}")]
    Encode(String),

    /// No framebuffer instance exists with the given id.
    #[error("no framebuffer with id {0}")]
    NoSuchBuffer(usize),
}
