// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use crate::{
    error::{CaptureError, Result},
    framebuffer::FrameBuffer,
    image::{DiscardTransport, HostTransport, ImageView, JpegEncoder, PreviewEncoder},
    preview::{JpegChannel, PreviewUpdate},
};

/// Capture subsystem configuration.
#[derive(Clone, Debug)]
pub struct CaptureConfig {
    /// Number of independent capture pipelines (one framebuffer each).
    pub pipelines: usize,
    /// Arena bytes reserved per pipeline.
    pub arena_size: usize,
    /// Whether arenas may be reallocated when a layout outgrows them.
    pub dynamic: bool,
    /// Preview channel capacity in bytes.
    pub preview_capacity: usize,
    /// Preview JPEG quality, 1..=100.
    pub preview_quality: u8,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            pipelines: 1,
            // Triple-buffered VGA YUYV.
            arena_size: 3 * 640 * 480 * 2,
            dynamic: false,
            preview_capacity: 64 * 1024,
            preview_quality: 80,
        }
    }
}

/// The capture subsystem: per-pipeline frame FIFOs plus the shared JPEG
/// preview channel, with the encoder and host transport collaborators
/// wired in.
///
/// Each instance is a first-class value owning its buffers; nothing here
/// is process-global. Share it by reference (it is `Sync`) between the
/// producer and consumer contexts.
pub struct CaptureContext {
    buffers: Vec<FrameBuffer>,
    preview: JpegChannel,
    encoder: Box<dyn PreviewEncoder + Send + Sync>,
    transport: Box<dyn HostTransport + Send + Sync>,
}

impl CaptureContext {
    /// Builds the subsystem with the built-in JPEG encoder and no host
    /// transport attached.
    pub fn new(config: CaptureConfig) -> Result<Self> {
        Self::with_io(config, Box::new(JpegEncoder), Box::new(DiscardTransport))
    }

    /// Builds the subsystem around caller-provided encoder and transport
    /// implementations.
    pub fn with_io(
        config: CaptureConfig,
        encoder: Box<dyn PreviewEncoder + Send + Sync>,
        transport: Box<dyn HostTransport + Send + Sync>,
    ) -> Result<Self> {
        let buffers = (0..config.pipelines)
            .map(|_| FrameBuffer::new(config.arena_size, config.dynamic))
            .collect();
        Ok(Self {
            buffers,
            preview: JpegChannel::new(config.preview_capacity, config.preview_quality),
            encoder,
            transport,
        })
    }

    /// Framebuffer instance for the given pipeline.
    pub fn get(&self, id: usize) -> Result<&FrameBuffer> {
        self.buffers.get(id).ok_or(CaptureError::NoSuchBuffer(id))
    }

    /// Mutable framebuffer access for reconfiguration.
    pub fn get_mut(&mut self, id: usize) -> Result<&mut FrameBuffer> {
        self.buffers
            .get_mut(id)
            .ok_or(CaptureError::NoSuchBuffer(id))
    }

    pub fn pipelines(&self) -> usize {
        self.buffers.len()
    }

    pub fn preview(&self) -> &JpegChannel {
        &self.preview
    }

    /// Mirrors a processed frame into the preview channel using the
    /// context's encoder and transport.
    pub fn update_jpeg_buffer(&self, src: &ImageView) -> PreviewUpdate {
        self.preview
            .update(src, self.encoder.as_ref(), self.transport.as_ref())
    }
}
