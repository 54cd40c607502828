// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! MPEG-1/2 decoding block.

use super::field;
use super::flag;
use super::ENGINE_DEC_MPEG;
use crate::div_round_up;

pub const MP12HDR: u32 = ENGINE_DEC_MPEG + 0x00;

pub const fn mp12hdr_slice_type(picture_coding_type: u32) -> u32 {
    field(picture_coding_type, 30, 28)
}

/// `f_code[s][t]`, `s` being the direction (forward, backward) and `t` the component.
pub const fn mp12hdr_f_code(s: u32, t: u32, value: u32) -> u32 {
    (value & 0xf) << (24 - 4 * t - 8 * s)
}

pub const fn mp12hdr_intra_dc_precision(precision: u32) -> u32 {
    field(precision, 11, 10)
}

pub const fn mp12hdr_intra_picture_structure(structure: u32) -> u32 {
    field(structure, 9, 8)
}

pub const fn mp12hdr_top_field_first(set: bool) -> u32 {
    flag(set, 1 << 7)
}

pub const fn mp12hdr_frame_pred_frame_dct(set: bool) -> u32 {
    flag(set, 1 << 6)
}

pub const fn mp12hdr_concealment_motion_vectors(set: bool) -> u32 {
    flag(set, 1 << 5)
}

pub const fn mp12hdr_q_scale_type(set: bool) -> u32 {
    flag(set, 1 << 4)
}

pub const fn mp12hdr_intra_vlc_format(set: bool) -> u32 {
    flag(set, 1 << 3)
}

pub const fn mp12hdr_alternate_scan(set: bool) -> u32 {
    flag(set, 1 << 2)
}

pub const fn mp12hdr_full_pel_forward_vector(set: bool) -> u32 {
    flag(set, 1 << 1)
}

pub const fn mp12hdr_full_pel_backward_vector(set: bool) -> u32 {
    flag(set, 1 << 0)
}

pub const PICCODEDSIZE: u32 = ENGINE_DEC_MPEG + 0x08;

/// Coded width, programmed in macroblocks.
pub const fn piccodedsize_width(width: u32) -> u32 {
    field(div_round_up(width, 16), 15, 8)
}

/// Coded height, programmed in macroblocks.
pub const fn piccodedsize_height(height: u32) -> u32 {
    field(div_round_up(height, 16), 7, 0)
}

pub const PICBOUNDSIZE: u32 = ENGINE_DEC_MPEG + 0x0c;

pub const fn picboundsize_width(width: u32) -> u32 {
    field(width, 27, 16)
}

pub const fn picboundsize_height(height: u32) -> u32 {
    field(height, 11, 0)
}

pub const MBADDR: u32 = ENGINE_DEC_MPEG + 0x10;

pub const fn mbaddr_x(x: u32) -> u32 {
    field(x, 15, 8)
}

pub const fn mbaddr_y(y: u32) -> u32 {
    field(y, 7, 0)
}

pub const CTRL: u32 = ENGINE_DEC_MPEG + 0x14;
pub const CTRL_MC_CACHE_EN: u32 = 1 << 13;
pub const CTRL_MC_NO_WRITEBACK: u32 = 1 << 14;
pub const CTRL_IRQ_MASK: u32 = (1 << 0) | (1 << 1) | (1 << 2);

pub const TRIGGER: u32 = ENGINE_DEC_MPEG + 0x18;
pub const TRIGGER_MB_BOUNDARY: u32 = 1 << 31;
pub const TRIGGER_CHROMA_FMT_420: u32 = 0 << 27;
pub const TRIGGER_MPEG1: u32 = 1 << 24;
pub const TRIGGER_MPEG2: u32 = 2 << 24;
pub const TRIGGER_HW_MPEG_VLD: u32 = 1 << 0;

pub const STATUS: u32 = ENGINE_DEC_MPEG + 0x1c;
pub const STATUS_SUCCESS: u32 = 1 << 0;
pub const STATUS_CHECK_ERROR: u32 = (1 << 1) | (1 << 2);
pub const STATUS_CHECK_MASK: u32 = (1 << 0) | (1 << 1) | (1 << 2);

pub const VLD_ADDR: u32 = ENGINE_DEC_MPEG + 0x28;
pub const VLD_ADDR_FIRST_PIC_DATA: u32 = 1 << 30;
pub const VLD_ADDR_LAST_PIC_DATA: u32 = 1 << 29;
pub const VLD_ADDR_VALID_PIC_DATA: u32 = 1 << 28;

/// Bits 31:28 of the address are folded into the low nibble.
pub const fn vld_addr_base(addr: u32) -> u32 {
    (addr & 0x0fff_fff0) | ((addr >> 28) & 0xf)
}

pub const VLD_OFFSET: u32 = ENGINE_DEC_MPEG + 0x2c;
pub const VLD_LEN: u32 = ENGINE_DEC_MPEG + 0x30;
pub const VLD_END_ADDR: u32 = ENGINE_DEC_MPEG + 0x34;

pub const REC_LUMA: u32 = ENGINE_DEC_MPEG + 0x48;
pub const REC_CHROMA: u32 = ENGINE_DEC_MPEG + 0x4c;
pub const FWD_REF_LUMA_ADDR: u32 = ENGINE_DEC_MPEG + 0x50;
pub const FWD_REF_CHROMA_ADDR: u32 = ENGINE_DEC_MPEG + 0x54;
pub const BWD_REF_LUMA_ADDR: u32 = ENGINE_DEC_MPEG + 0x58;
pub const BWD_REF_CHROMA_ADDR: u32 = ENGINE_DEC_MPEG + 0x5c;

pub const IQMINPUT: u32 = ENGINE_DEC_MPEG + 0x80;
pub const IQMINPUT_FLAG_INTRA: u32 = 1 << 14;
pub const IQMINPUT_FLAG_NON_INTRA: u32 = 0 << 14;

pub const fn iqminput_weight(index: u32, weight: u32) -> u32 {
    (weight & 0xff) | ((index & 0x3f) << 8)
}

pub const ERROR: u32 = ENGINE_DEC_MPEG + 0xc4;
pub const CRTMBADDR: u32 = ENGINE_DEC_MPEG + 0xc8;
