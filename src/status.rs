// Copyright 2025 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use enumn::N;

use crate::bridge::BridgeError;
use crate::bridge::ContractViolation;

/// Status codes returned to the native side. Numerical values match the native decoder's
/// `WEBRTC_VIDEO_CODEC_*` constants.
#[derive(N, Debug, PartialEq, Eq, Copy, Clone)]
#[repr(i32)]
pub enum VideoCodecStatus {
    Ok = 0,
    Error = -1,
    ErrParameter = -4,
    Uninitialized = -7,
}

impl VideoCodecStatus {
    pub fn is_ok(self) -> bool {
        self == VideoCodecStatus::Ok
    }
}

impl From<VideoCodecStatus> for i32 {
    fn from(status: VideoCodecStatus) -> Self {
        status as i32
    }
}

impl From<&BridgeError> for VideoCodecStatus {
    fn from(err: &BridgeError) -> Self {
        match err {
            BridgeError::ContractViolation(
                ContractViolation::UnknownDecoder(_) | ContractViolation::Retired(_),
            ) => VideoCodecStatus::Uninitialized,
            BridgeError::ContractViolation(_) => VideoCodecStatus::ErrParameter,
            BridgeError::DeliveryFailure { .. } => VideoCodecStatus::Error,
        }
    }
}
