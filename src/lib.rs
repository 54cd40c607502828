// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Stateless codec job pipeline for the Allwinner Cedrus video engine.
//!
//! This crate programs the fixed-function video engine found on Allwinner SoCs. Callers hand it
//! already-parsed parameter structures (sequence, picture and slice parameters) together with
//! coded and picture buffers, and the crate translates them into the register and SRAM layout the
//! hardware expects, dispatches one job at a time and completes it from the interrupt handler or
//! the watchdog.
//!
//! The main entry points are:
//!
//! * [`device::Device`], which owns the register window and the per-role processors,
//! * [`context::Context`], one decode or encode session with its buffer queues,
//! * the codec engines under [`decoder`] and [`encoder`].

pub mod context;
pub mod controls;
pub mod decoder;
pub mod device;
pub mod dma;
pub mod encoder;
pub mod engine;
pub mod job;
pub mod proc;
pub mod queue;
pub mod regs;
pub mod supervisor;

#[cfg(test)]
pub(crate) mod dummy;

use std::fmt;

/// Rounds `value` up to the next multiple of `align`, which must be a power of two.
pub(crate) const fn align_up(value: u32, align: u32) -> u32 {
    (value + align - 1) & !(align - 1)
}

/// Rounds `value` down to the previous multiple of `align`, which must be a power of two.
pub(crate) const fn align_down(value: u32, align: u32) -> u32 {
    value & !(align - 1)
}

pub(crate) const fn div_round_up(value: u32, divisor: u32) -> u32 {
    (value + divisor - 1) / divisor
}

/// A FourCC pixel format code, stored the way V4L2 does (first character in the LSB).
#[derive(Copy, Clone, Default, PartialEq, Eq, Hash)]
pub struct Fourcc(u32);

impl Fourcc {
    pub const fn from_bytes(code: &[u8; 4]) -> Self {
        Self(
            (code[0] as u32)
                | ((code[1] as u32) << 8)
                | ((code[2] as u32) << 16)
                | ((code[3] as u32) << 24),
        )
    }

    pub const fn value(&self) -> u32 {
        self.0
    }

    pub fn to_bytes(self) -> [u8; 4] {
        self.0.to_le_bytes()
    }
}

impl From<u32> for Fourcc {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl From<&[u8; 4]> for Fourcc {
    fn from(code: &[u8; 4]) -> Self {
        Self::from_bytes(code)
    }
}

impl From<Fourcc> for u32 {
    fn from(fourcc: Fourcc) -> Self {
        fourcc.0
    }
}

impl fmt::Display for Fourcc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bytes = self.to_bytes();
        for byte in bytes {
            let c = if byte.is_ascii_graphic() || byte == b' ' {
                byte as char
            } else {
                '.'
            };
            write!(f, "{c}")?;
        }

        Ok(())
    }
}

impl fmt::Debug for Fourcc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fourcc({self}, {:#010x})", self.0)
    }
}

/// Pixel formats understood by the engines of this crate.
pub mod fourcc {
    use super::Fourcc;

    pub const MPEG2_SLICE: Fourcc = Fourcc::from_bytes(b"MG2S");
    pub const H264_SLICE: Fourcc = Fourcc::from_bytes(b"S264");
    pub const HEVC_SLICE: Fourcc = Fourcc::from_bytes(b"S265");
    pub const VP8_FRAME: Fourcc = Fourcc::from_bytes(b"VP8F");
    pub const H264: Fourcc = Fourcc::from_bytes(b"H264");
    pub const NV12: Fourcc = Fourcc::from_bytes(b"NV12");
    pub const NV12_32L32: Fourcc = Fourcc::from_bytes(b"ST12");
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    /// Size in 16x16 macroblocks, rounded up.
    pub fn in_macroblocks(&self) -> Resolution {
        Resolution {
            width: div_round_up(self.width, 16),
            height: div_round_up(self.height, 16),
        }
    }
}

impl From<(u32, u32)> for Resolution {
    fn from(value: (u32, u32)) -> Self {
        Self {
            width: value.0,
            height: value.1,
        }
    }
}

/// A rectangle within a picture, used for the encoder crop selection.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Rect {
    pub left: u32,
    pub top: u32,
    pub width: u32,
    pub height: u32,
}

/// A frame interval, as seconds per frame.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Fraction {
    pub numerator: u32,
    pub denominator: u32,
}

impl Default for Fraction {
    fn default() -> Self {
        Self {
            numerator: 1,
            denominator: 25,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fourcc_display() {
        assert_eq!(fourcc::NV12.to_string(), "NV12");
        assert_eq!(fourcc::HEVC_SLICE.to_string(), "S265");
        assert_eq!(Fourcc::from(0x3231564e), fourcc::NV12);
    }

    #[test]
    fn alignment_helpers() {
        assert_eq!(align_up(1080, 16), 1088);
        assert_eq!(align_up(1088, 16), 1088);
        assert_eq!(align_down(47, 32), 32);
        assert_eq!(div_round_up(1920, 16), 120);
        assert_eq!(div_round_up(1081, 16), 68);
    }
}
