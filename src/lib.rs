// Copyright 2025 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Boundary adapter between native video decoders and the consumers of their decoded frames.
//!
//! The native side builds a [`settings::DecoderSettings`] to initialize its codec, then binds
//! itself to a consumer sink through [`bridge::CompletionBridge::create_callback`]. Every
//! completed decode is pushed through the returned [`bridge::CallbackHandle`], which resolves the
//! decoder identity and hands a [`bridge::DecodedFrameEvent`] to the sink.

pub mod backend;
pub mod bridge;
pub mod native_decoder;
pub mod settings;
pub mod status;
pub mod video_frame;

use std::str::FromStr;

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl From<(u32, u32)> for Resolution {
    fn from(value: (u32, u32)) -> Self {
        Self { width: value.0, height: value.1 }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum DecodedFormat {
    NV12,
    I420,
}

impl FromStr for DecodedFormat {
    type Err = &'static str;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "nv12" | "NV12" => Ok(DecodedFormat::NV12),
            "i420" | "I420" => Ok(DecodedFormat::I420),
            _ => Err("unrecognized output format. Valid values: nv12, i420"),
        }
    }
}
