// Copyright 2025 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! This file contains a dummy backend whose only purpose is to let the native decoder run so the
//! bridge can be exercised without real codec support.
//!
//! Each non-empty unit becomes one frame of the configured resolution, filled by repeating the
//! unit's bytes. Empty units are dropped, and units starting with [`CORRUPT_MARKER`] fail to
//! decode.

use anyhow::anyhow;
use anyhow::bail;
use bytes::Bytes;

use crate::backend::DecodedPicture;
use crate::backend::DecoderBackend;
use crate::backend::EncodedUnit;
use crate::settings::DecoderSettings;
use crate::video_frame::decoded_frame_size;
use crate::video_frame::VideoFrame;
use crate::DecodedFormat;
use crate::Resolution;

pub const CORRUPT_MARKER: u8 = 0xff;

// Highest QP of H.264/H.265.
const MAX_QP: i32 = 51;

/// Largest picture the backend allocates frames for, 8K UHD.
pub const MAX_FRAME_AREA: u64 = 7680 * 4320;

#[derive(Clone, Debug)]
pub struct DummyBackendOptions {
    pub format: DecodedFormat,
    /// Number of frames held back before output. Frames leave in timestamp order, like a DPB
    /// bumping pictures out.
    pub reorder_depth: usize,
}

impl Default for DummyBackendOptions {
    fn default() -> Self {
        Self { format: DecodedFormat::I420, reorder_depth: 0 }
    }
}

/// Dummy backend that can be used for any codec.
pub struct DummyBackend {
    options: DummyBackendOptions,
    resolution: Option<Resolution>,
    pending: Vec<DecodedPicture>,
}

impl DummyBackend {
    fn bump(&mut self) -> Option<DecodedPicture> {
        let (oldest, _) = self
            .pending
            .iter()
            .enumerate()
            .min_by_key(|(_, picture)| picture.frame.timestamp_ns())?;

        Some(self.pending.remove(oldest))
    }
}

impl DecoderBackend for DummyBackend {
    type Options = DummyBackendOptions;

    fn new(options: DummyBackendOptions) -> anyhow::Result<Self> {
        Ok(Self { options, resolution: None, pending: Vec::new() })
    }

    fn initialize(&mut self, settings: &DecoderSettings) -> anyhow::Result<()> {
        self.resolution = None;
        let resolution = settings.validate()?;
        let area = u64::from(resolution.width) * u64::from(resolution.height);
        if area > MAX_FRAME_AREA {
            bail!(
                "{}x{} exceeds the largest supported frame size",
                resolution.width,
                resolution.height
            );
        }
        log::debug!(
            "dummy backend configured for {}x{} on {} cores",
            resolution.width,
            resolution.height,
            settings.number_of_cores()
        );
        self.resolution = Some(resolution);
        self.pending.clear();

        Ok(())
    }

    fn decode(&mut self, unit: &EncodedUnit) -> anyhow::Result<Option<DecodedPicture>> {
        let resolution = self.resolution.ok_or(anyhow!("backend is not initialized"))?;

        let first = match unit.data.first() {
            Some(first) => *first,
            None => {
                log::debug!("dropping empty unit with timestamp {}", unit.timestamp_ns);
                return Ok(None);
            }
        };
        if first == CORRUPT_MARKER {
            bail!("corrupt unit with timestamp {}", unit.timestamp_ns);
        }

        let size = decoded_frame_size(
            self.options.format,
            resolution.width as usize,
            resolution.height as usize,
        );
        let buffer = unit.data.iter().copied().cycle().take(size).collect::<Vec<_>>();
        let frame = VideoFrame::new(
            Bytes::from(buffer),
            self.options.format,
            resolution,
            unit.timestamp_ns,
            0,
        )?;
        self.pending.push(DecodedPicture { frame, qp: Some(i32::from(first) % (MAX_QP + 1)) });

        if self.pending.len() > self.options.reorder_depth {
            Ok(self.bump())
        } else {
            Ok(None)
        }
    }

    fn flush(&mut self) -> anyhow::Result<Vec<DecodedPicture>> {
        let mut flushed = Vec::with_capacity(self.pending.len());
        while let Some(picture) = self.bump() {
            flushed.push(picture);
        }

        Ok(flushed)
    }
}
