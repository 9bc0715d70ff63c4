// Copyright 2025 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Decoder initialization settings.
//!
//! Settings are assembled from the primitives the native initialization path hands over, so that
//! codec code only ever sees a [`DecoderSettings`] and never the boundary's integer types.

use crate::bridge::BridgeError;
use crate::bridge::ContractViolation;
use crate::Resolution;

/// Immutable configuration consumed by a decoder's initialization step.
///
/// Every field has to be supplied, there is no `Default`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct DecoderSettings {
    number_of_cores: i32,
    width: i32,
    height: i32,
}

/// Assembles a [`DecoderSettings`] from native-typed primitives.
///
/// This never fails and performs no bounds checking; sanity checks are left to the codec during
/// initialization (see [`DecoderSettings::validate`]).
pub fn create_settings(number_of_cores: i32, width: i32, height: i32) -> DecoderSettings {
    DecoderSettings { number_of_cores, width, height }
}

impl DecoderSettings {
    pub fn number_of_cores(&self) -> i32 {
        self.number_of_cores
    }

    pub fn width(&self) -> i32 {
        self.width
    }

    pub fn height(&self) -> i32 {
        self.height
    }

    /// Returns the configured resolution, or `None` if either dimension is not positive.
    pub fn resolution(&self) -> Option<Resolution> {
        let width = u32::try_from(self.width).ok().filter(|w| *w > 0)?;
        let height = u32::try_from(self.height).ok().filter(|h| *h > 0)?;

        Some(Resolution { width, height })
    }

    /// Checks the settings against the invariants a codec relies on, returning the resolution to
    /// decode at.
    pub fn validate(&self) -> Result<Resolution, BridgeError> {
        if self.number_of_cores < 1 {
            return Err(ContractViolation::InvalidSettings(*self).into());
        }

        self.resolution().ok_or_else(|| ContractViolation::InvalidSettings(*self).into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fields_round_trip() {
        for (cores, width, height) in [(1, 1, 1), (4, 1920, 1080), (16, 3840, 2160), (2, 7, 3)] {
            let settings = create_settings(cores, width, height);
            assert_eq!(settings.number_of_cores(), cores);
            assert_eq!(settings.width(), width);
            assert_eq!(settings.height(), height);
        }
    }

    #[test]
    fn full_hd() {
        let settings = create_settings(4, 1920, 1080);
        assert_eq!(settings, create_settings(4, 1920, 1080));
        assert_eq!(settings.validate().unwrap(), Resolution { width: 1920, height: 1080 });
    }

    #[test]
    fn construction_does_not_check_bounds() {
        // Garbage in is accepted as-is; only validation rejects it.
        let settings = create_settings(0, -1, 0);
        assert_eq!(settings.number_of_cores(), 0);
        assert_eq!(settings.width(), -1);
        assert_eq!(settings.resolution(), None);
    }

    #[test]
    fn validate_rejects_bad_values() {
        for (cores, width, height) in [(0, 640, 480), (-2, 640, 480), (1, 0, 480), (1, 640, -480)]
        {
            let settings = create_settings(cores, width, height);
            match settings.validate() {
                Err(BridgeError::ContractViolation(ContractViolation::InvalidSettings(s))) => {
                    assert_eq!(s, settings)
                }
                other => panic!("unexpected validation result {other:?}"),
            }
        }
    }
}
