// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use crate::{
    arena::AlignedBuf,
    error::CaptureError,
    image::{HostTransport, ImageView, PreviewEncoder},
};
use std::sync::Mutex;
use tracing::{debug, warn};

/// How a preview update was resolved.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PreviewUpdate {
    /// Raw source compressed into the channel; encoded byte count.
    Encoded(usize),
    /// Already-compressed source copied verbatim; byte count.
    Copied(usize),
    /// Source streamed straight to the host transport; byte count sent.
    Streamed(usize),
    /// Frame dropped (encode failure or overflow); channel unchanged.
    Dropped,
    /// Channel disabled; nothing done.
    Disabled,
}

// Closed classification of an update source, decided once from the
// descriptor before dispatch.
enum SourceKind {
    RawMutable,
    EncodedFitting,
    EncodedOversized,
}

struct ChannelState {
    w: u32,
    h: u32,
    size: usize,
    enabled: bool,
    quality: u8,
    overflow: bool,
    pixels: AlignedBuf,
}

/// Single-slot channel holding the latest JPEG-encoded frame for a host
/// debugger or IDE preview.
///
/// One writer slot, overwritten on every update; the whole read-modify-write
/// cycle runs under the channel lock, which is the only blocking point in
/// the capture pipeline. Callers from the interrupt context must not touch
/// this channel.
pub struct JpegChannel {
    state: Mutex<ChannelState>,
}

impl JpegChannel {
    /// Allocates the preview buffer once. `capacity` bounds the encoded
    /// frame size; anything larger is streamed instead of buffered.
    pub fn new(capacity: usize, quality: u8) -> Self {
        Self {
            state: Mutex::new(ChannelState {
                w: 0,
                h: 0,
                size: 0,
                enabled: true,
                quality: quality.clamp(1, 100),
                overflow: false,
                pixels: AlignedBuf::new(capacity),
            }),
        }
    }

    /// Populates the channel from `src`.
    ///
    /// Raw sources are encoded at the configured quality. Compressed
    /// sources that fit are copied without a re-encode. Compressed sources
    /// too large for the channel are streamed to `transport` and the
    /// buffered frame is left as-is. Disabled channels skip everything.
    pub fn update(
        &self,
        src: &ImageView,
        encoder: &dyn PreviewEncoder,
        transport: &dyn HostTransport,
    ) -> PreviewUpdate {
        let mut st = self.state.lock().expect("jpeg channel lock");
        if !st.enabled {
            return PreviewUpdate::Disabled;
        }

        let kind = if !src.format().is_compressed() {
            SourceKind::RawMutable
        } else if src.size() <= st.pixels.len() {
            SourceKind::EncodedFitting
        } else {
            SourceKind::EncodedOversized
        };

        match kind {
            SourceKind::RawMutable => {
                let quality = st.quality;
                match encoder.encode(src, quality, st.pixels.as_mut_slice()) {
                    Ok(size) => {
                        st.w = src.width();
                        st.h = src.height();
                        st.size = size;
                        st.overflow = false;
                        PreviewUpdate::Encoded(size)
                    }
                    Err(CaptureError::EncodeOverflow { capacity }) => {
                        st.overflow = true;
                        warn!(capacity, "preview frame exceeds channel capacity");
                        PreviewUpdate::Dropped
                    }
                    Err(err) => {
                        st.overflow = true;
                        warn!(%err, "preview encode failed");
                        PreviewUpdate::Dropped
                    }
                }
            }
            SourceKind::EncodedFitting => {
                let size = src.size();
                st.pixels.as_mut_slice()[..size].copy_from_slice(src.data());
                st.w = src.width();
                st.h = src.height();
                st.size = size;
                st.overflow = false;
                PreviewUpdate::Copied(size)
            }
            SourceKind::EncodedOversized => {
                // Too big to buffer; hand it to the host directly and keep
                // the last buffered frame.
                debug!(size = src.size(), "streaming oversized preview frame");
                transport.stream_frame(src.data());
                PreviewUpdate::Streamed(src.size())
            }
        }
    }

    /// Copies out the latest buffered frame, or `None` when nothing has
    /// been buffered yet. This is the host poll path.
    pub fn latest_frame(&self) -> Option<Vec<u8>> {
        let st = self.state.lock().expect("jpeg channel lock");
        if st.size == 0 {
            return None;
        }
        Some(st.pixels.as_slice()[..st.size].to_vec())
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.state.lock().expect("jpeg channel lock").enabled = enabled;
    }

    pub fn enabled(&self) -> bool {
        self.state.lock().expect("jpeg channel lock").enabled
    }

    pub fn set_quality(&self, quality: u8) {
        self.state.lock().expect("jpeg channel lock").quality = quality.clamp(1, 100);
    }

    pub fn quality(&self) -> u8 {
        self.state.lock().expect("jpeg channel lock").quality
    }

    /// Geometry of the last buffered frame.
    pub fn resolution(&self) -> (u32, u32) {
        let st = self.state.lock().expect("jpeg channel lock");
        (st.w, st.h)
    }

    /// Encoded byte count of the last buffered frame.
    pub fn size(&self) -> usize {
        self.state.lock().expect("jpeg channel lock").size
    }

    pub fn capacity(&self) -> usize {
        self.state.lock().expect("jpeg channel lock").pixels.len()
    }

    /// Whether the most recent raw update overran the channel.
    pub fn overflow(&self) -> bool {
        self.state.lock().expect("jpeg channel lock").overflow
    }
}
