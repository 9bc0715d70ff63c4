// Copyright 2025 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use bytes::Bytes;
use thiserror::Error;

use crate::DecodedFormat;
use crate::Resolution;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum VideoFrameError {
    #[error("buffer holds {actual} bytes, {format:?} {width}x{height} needs {required}")]
    BufferTooSmall {
        format: DecodedFormat,
        width: u32,
        height: u32,
        required: usize,
        actual: usize,
    },
    #[error("unsupported rotation {0}")]
    InvalidRotation(i32),
}

/// Returns the size required to store a frame of `format` with size `width`x`height`, without any
/// padding.
pub fn decoded_frame_size(format: DecodedFormat, width: usize, height: usize) -> usize {
    match format {
        DecodedFormat::I420 | DecodedFormat::NV12 => {
            let y_size = width * height;
            // U and V planes need to be aligned to 2.
            let uv_size = ((width + 1) / 2) * ((height + 1) / 2) * 2;

            y_size + uv_size
        }
    }
}

/// A decoded picture along with its presentation metadata.
///
/// The buffer is reference counted, but a frame handed to a consumer is never touched again by
/// the decoder that produced it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VideoFrame {
    buffer: Bytes,
    format: DecodedFormat,
    resolution: Resolution,
    timestamp_ns: i64,
    rotation: i32,
}

impl VideoFrame {
    pub fn new(
        buffer: Bytes,
        format: DecodedFormat,
        resolution: Resolution,
        timestamp_ns: i64,
        rotation: i32,
    ) -> Result<Self, VideoFrameError> {
        if !matches!(rotation, 0 | 90 | 180 | 270) {
            return Err(VideoFrameError::InvalidRotation(rotation));
        }

        let required = decoded_frame_size(
            format,
            resolution.width as usize,
            resolution.height as usize,
        );
        if buffer.len() < required {
            return Err(VideoFrameError::BufferTooSmall {
                format,
                width: resolution.width,
                height: resolution.height,
                required,
                actual: buffer.len(),
            });
        }

        Ok(Self { buffer, format, resolution, timestamp_ns, rotation })
    }

    pub fn buffer(&self) -> &Bytes {
        &self.buffer
    }

    pub fn format(&self) -> DecodedFormat {
        self.format
    }

    /// Visible resolution of the picture.
    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    pub fn timestamp_ns(&self) -> i64 {
        self.timestamp_ns
    }

    /// Clockwise rotation to apply before display, in degrees.
    pub fn rotation(&self) -> i32 {
        self.rotation
    }

    /// Width and height after applying the rotation.
    pub fn rotated_resolution(&self) -> Resolution {
        match self.rotation {
            90 | 270 => Resolution { width: self.resolution.height, height: self.resolution.width },
            _ => self.resolution,
        }
    }

    pub fn into_buffer(self) -> Bytes {
        self.buffer
    }
}
