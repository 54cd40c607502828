// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Register map of the video engine.
//!
//! Offsets are relative to the start of the register window. The top-level constants cover the
//! shared control block, while each engine block lives in its own submodule.

pub mod avc;
pub mod h264;
pub mod h265;
pub mod isp;
pub mod mpeg2;
pub mod vp8;

/// Places `value` in the inclusive bit range `high..=low`, masking off anything wider.
pub const fn field(value: u32, high: u32, low: u32) -> u32 {
    let width = high - low + 1;
    let mask = if width >= 32 { u32::MAX } else { (1 << width) - 1 };

    (value & mask) << low
}

pub const fn flag(set: bool, bit: u32) -> u32 {
    if set {
        bit
    } else {
        0
    }
}

pub const ENGINE_DEC_MPEG: u32 = 0x100;
pub const ENGINE_DEC_H264: u32 = 0x200;
pub const ENGINE_DEC_H265: u32 = 0x500;
pub const ENGINE_ISP: u32 = 0xa00;
pub const ENGINE_ENC_AVC: u32 = 0xb00;

/// Size of the register window.
pub const WINDOW_SIZE: usize = 0x1000;

pub const MODE: u32 = 0x00;
pub const MODE_PIC_WIDTH_IS_4096: u32 = 1 << 22;
pub const MODE_PIC_WIDTH_MORE_2048: u32 = 1 << 21;
pub const MODE_REC_WR_MODE_2MB: u32 = 0x01 << 20;
pub const MODE_REC_WR_MODE_1MB: u32 = 0x00 << 20;
pub const MODE_DDR_MODE_BW_128: u32 = 0x03 << 16;
pub const MODE_DDR_MODE_BW_256: u32 = 0x02 << 16;
pub const MODE_ENC_ENABLE: u32 = 1 << 7;
pub const MODE_ENC_ISP_ENABLE: u32 = 1 << 6;
pub const MODE_DEC_DISABLED: u32 = 0x07;
pub const MODE_DEC_H265: u32 = 0x04;
pub const MODE_DEC_H264: u32 = 0x01;
pub const MODE_DEC_MPEG: u32 = 0x00;
pub const MODE_DEC_MASK: u32 = 0x0f;

pub const RESET: u32 = 0x04;
pub const RESET_ENCODER_RESET: u32 = 1 << 1;
pub const RESET_SYNC_IDLE: u32 = 1 << 16;
pub const RESET_CACHE_SYNC_IDLE: u32 = 1 << 17;

pub const BUF_CTRL: u32 = 0x50;
pub const BUF_CTRL_INTRAPRED_EXT_RAM: u32 = 0x02 << 2;
pub const BUF_CTRL_INTRAPRED_MIXED_RAM: u32 = 0x01 << 2;
pub const BUF_CTRL_INTRAPRED_INT_SRAM: u32 = 0x00 << 2;
pub const BUF_CTRL_DBLK_EXT_RAM: u32 = 0x02;
pub const BUF_CTRL_DBLK_MIXED_RAM: u32 = 0x01;
pub const BUF_CTRL_DBLK_INT_SRAM: u32 = 0x00;

pub const DBLK_DRAM_BUF_ADDR: u32 = 0x54;
pub const INTRAPRED_DRAM_BUF_ADDR: u32 = 0x58;

pub const PRIMARY_CHROMA_BUF_LEN: u32 = 0xc4;
pub const PRIMARY_FB_LINE_STRIDE: u32 = 0xc8;

pub const fn primary_fb_line_stride_luma(stride: u32) -> u32 {
    field(stride, 15, 0)
}

pub const fn primary_fb_line_stride_chroma(stride: u32) -> u32 {
    field(stride, 31, 16)
}

pub const CHROMA_BUF_LEN: u32 = 0xe8;
pub const SECONDARY_OUT_FMT_TILED_32_NV12: u32 = 0x00 << 30;
pub const SECONDARY_OUT_FMT_EXT1: u32 = 0x01 << 30;
pub const SECONDARY_OUT_FMT_YU12: u32 = 0x02 << 30;
pub const SECONDARY_OUT_FMT_YV12: u32 = 0x03 << 30;

pub const PRIMARY_OUT_FMT: u32 = 0xec;
pub const PRIMARY_OUT_FMT_TILED_32_NV12: u32 = 0x00;
pub const PRIMARY_OUT_FMT_TILED_128_NV12: u32 = 0x01;
pub const PRIMARY_OUT_FMT_YU12: u32 = 0x02;
pub const PRIMARY_OUT_FMT_YV12: u32 = 0x03;
pub const PRIMARY_OUT_FMT_NV12: u32 = 0x04;
pub const PRIMARY_OUT_FMT_NV21: u32 = 0x05;
