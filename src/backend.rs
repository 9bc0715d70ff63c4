// Copyright 2025 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Codec collaborators.
//!
//! The actual decoding is not done by this crate. A [`DecoderBackend`] is whatever turns encoded
//! units into [`VideoFrame`]s; the native decoder drives it and reports its output through the
//! bridge.

pub mod dummy;

use bytes::Bytes;

use crate::settings::DecoderSettings;
use crate::video_frame::VideoFrame;

/// One unit of encoded input, usually a whole frame's worth of bitstream.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EncodedUnit {
    pub data: Bytes,
    pub timestamp_ns: i64,
}

impl EncodedUnit {
    pub fn new(data: impl Into<Bytes>, timestamp_ns: i64) -> Self {
        Self { data: data.into(), timestamp_ns }
    }
}

/// A frame produced by a backend, along with what the backend knows about how it was coded.
#[derive(Debug)]
pub struct DecodedPicture {
    pub frame: VideoFrame,
    pub qp: Option<i32>,
}

pub trait DecoderBackend: 'static {
    type Options: Clone + Send + 'static;

    fn new(options: Self::Options) -> anyhow::Result<Self>
    where
        Self: Sized;

    /// Configures the backend. This is where `settings` are checked for sanity.
    fn initialize(&mut self, settings: &DecoderSettings) -> anyhow::Result<()>;

    /// Decodes `unit`. Returns `None` if no frame is ready yet, or if the unit was dropped.
    fn decode(&mut self, unit: &EncodedUnit) -> anyhow::Result<Option<DecodedPicture>>;

    /// Returns all the frames still held by the backend.
    fn flush(&mut self) -> anyhow::Result<Vec<DecodedPicture>>;
}
