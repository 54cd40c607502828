// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! H.264 decoding block. The VP8 engine drives the same block in a different mode.

use super::field;
use super::ENGINE_DEC_H264;

pub const SPS: u32 = ENGINE_DEC_H264 + 0x00;
pub const SPS_MBS_ONLY: u32 = 1 << 18;
pub const SPS_MB_ADAPTIVE_FRAME_FIELD: u32 = 1 << 17;
pub const SPS_DIRECT_8X8_INFERENCE: u32 = 1 << 16;

pub const fn sps_dimensions(
    chroma_format_idc: u32,
    width_in_mbs_minus1: u32,
    height_in_map_units_minus1: u32,
) -> u32 {
    field(chroma_format_idc, 21, 19)
        | field(width_in_mbs_minus1, 15, 8)
        | field(height_in_map_units_minus1, 7, 0)
}

pub const PPS: u32 = ENGINE_DEC_H264 + 0x04;
pub const PPS_ENTROPY_CODING_MODE: u32 = 1 << 15;
pub const PPS_WEIGHTED_PRED: u32 = 1 << 4;
pub const PPS_CONSTRAINED_INTRA_PRED: u32 = 1 << 1;
pub const PPS_TRANSFORM_8X8_MODE: u32 = 1 << 0;

pub const fn pps_ref_counts(l0_minus1: u32, l1_minus1: u32, weighted_bipred_idc: u32) -> u32 {
    field(l0_minus1, 14, 10) | field(l1_minus1, 9, 5) | field(weighted_bipred_idc, 3, 2)
}

pub const SHS: u32 = ENGINE_DEC_H264 + 0x08;
pub const SHS_NAL_REF: u32 = 1 << 12;
pub const SHS_FIRST_SLICE_IN_PIC: u32 = 1 << 5;
pub const SHS_FIELD_PIC: u32 = 1 << 4;
pub const SHS_BOTTOM_FIELD: u32 = 1 << 3;
pub const SHS_DIRECT_SPATIAL_MV_PRED: u32 = 1 << 2;

pub const fn shs_position(mb_x: u32, mb_y: u32, slice_type: u32, cabac_init_idc: u32) -> u32 {
    field(mb_x, 31, 24)
        | field(mb_y, 23, 16)
        | field(slice_type, 11, 8)
        | field(cabac_init_idc, 1, 0)
}

pub const SHS2: u32 = ENGINE_DEC_H264 + 0x0c;
pub const SHS2_NUM_REF_IDX_ACTIVE_OVRD: u32 = 1 << 12;

pub const fn shs2_params(
    l0_minus1: u32,
    l1_minus1: u32,
    disable_deblocking_filter_idc: u32,
    alpha_c0_offset_div2: i32,
    beta_offset_div2: i32,
) -> u32 {
    field(l0_minus1, 28, 24)
        | field(l1_minus1, 20, 16)
        | field(disable_deblocking_filter_idc, 9, 8)
        | field(alpha_c0_offset_div2 as u32, 7, 4)
        | field(beta_offset_div2 as u32, 3, 0)
}

pub const SHS_WP: u32 = ENGINE_DEC_H264 + 0x10;

pub const fn shs_wp_denoms(chroma_log2_denom: u32, luma_log2_denom: u32) -> u32 {
    field(chroma_log2_denom, 6, 4) | field(luma_log2_denom, 2, 0)
}

pub const SHS_QP: u32 = ENGINE_DEC_H264 + 0x1c;
pub const SHS_QP_SCALING_MATRIX_DEFAULT: u32 = 1 << 24;

pub const fn shs_qp(second_chroma_qp_offset: i32, chroma_qp_offset: i32, slice_qp: i32) -> u32 {
    field(second_chroma_qp_offset as u32, 21, 16)
        | field(chroma_qp_offset as u32, 13, 8)
        | field(slice_qp as u32, 5, 0)
}

pub const CTRL: u32 = ENGINE_DEC_H264 + 0x20;
pub const CTRL_SLICE_DECODE_INT: u32 = 1 << 0;
pub const CTRL_DECODE_ERR_INT: u32 = 1 << 1;
pub const CTRL_VLD_DATA_REQ_INT: u32 = 1 << 2;
pub const CTRL_INT_MASK: u32 = CTRL_SLICE_DECODE_INT | CTRL_DECODE_ERR_INT | CTRL_VLD_DATA_REQ_INT;

pub const TRIGGER_TYPE: u32 = ENGINE_DEC_H264 + 0x24;
pub const TRIGGER_TYPE_AVC_SLICE_DECODE: u32 = 8;
pub const TRIGGER_TYPE_INIT_SWDEC: u32 = 7;
pub const TRIGGER_TYPE_FLUSH_BITS: u32 = 3;

pub const fn trigger_type_n_bits(bits: u32) -> u32 {
    field(bits, 13, 8)
}

pub const STATUS: u32 = ENGINE_DEC_H264 + 0x28;
pub const STATUS_SLICE_DECODE_INT: u32 = CTRL_SLICE_DECODE_INT;
pub const STATUS_DECODE_ERR_INT: u32 = CTRL_DECODE_ERR_INT;
pub const STATUS_VLD_DATA_REQ_INT: u32 = CTRL_VLD_DATA_REQ_INT;
pub const STATUS_INT_MASK: u32 = CTRL_INT_MASK;
pub const STATUS_VLD_BUSY: u32 = 1 << 8;

pub const CUR_MB_NUM: u32 = ENGINE_DEC_H264 + 0x2c;

pub const VLD_ADDR: u32 = ENGINE_DEC_H264 + 0x30;
pub const VLD_ADDR_FIRST: u32 = 1 << 30;
pub const VLD_ADDR_LAST: u32 = 1 << 29;
pub const VLD_ADDR_VALID: u32 = 1 << 28;

/// Bits 31:28 of the address are folded into the low nibble.
pub const fn vld_addr_val(addr: u32) -> u32 {
    (addr & 0x0fff_fff0) | (addr >> 28)
}

pub const VLD_OFFSET: u32 = ENGINE_DEC_H264 + 0x34;
pub const VLD_LEN: u32 = ENGINE_DEC_H264 + 0x38;
pub const VLD_END: u32 = ENGINE_DEC_H264 + 0x3c;
pub const SDROT_CTRL: u32 = ENGINE_DEC_H264 + 0x40;
pub const OUTPUT_FRAME_IDX: u32 = ENGINE_DEC_H264 + 0x4c;
pub const EXTRA_BUFFER1: u32 = ENGINE_DEC_H264 + 0x50;
pub const EXTRA_BUFFER2: u32 = ENGINE_DEC_H264 + 0x54;
pub const BASIC_BITS: u32 = ENGINE_DEC_H264 + 0xdc;

/// SRAM port, shared with the VP8 engine. The offset register takes the SRAM index shifted left
/// by two.
pub const SRAM_PORT_OFFSET: u32 = ENGINE_DEC_H264 + 0xe0;
pub const SRAM_PORT_DATA: u32 = ENGINE_DEC_H264 + 0xe4;

pub const SRAM_PRED_WEIGHT_TABLE: u32 = 0x000;
pub const SRAM_FRAMEBUFFER_LIST: u32 = 0x100;
pub const SRAM_REF_LIST_0: u32 = 0x190;
pub const SRAM_REF_LIST_1: u32 = 0x199;
pub const SRAM_SCALING_LIST_8X8_0: u32 = 0x200;
pub const SRAM_SCALING_LIST_8X8_1: u32 = 0x210;
pub const SRAM_SCALING_LIST_4X4: u32 = 0x220;

/// Picture structure field of a framebuffer list entry.
pub const PIC_TYPE_FRAME: u32 = 0;
pub const PIC_TYPE_FIELD: u32 = 1;
pub const PIC_TYPE_MBAFF: u32 = 2;

pub const fn frame_info(pic_type: u32) -> u32 {
    pic_type << 8
}
