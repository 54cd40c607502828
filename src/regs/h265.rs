// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! H.265 decoding block.

use super::field;
use super::flag;
use super::ENGINE_DEC_H265;

pub const NAL_HDR: u32 = ENGINE_DEC_H265 + 0x00;

pub const fn nal_hdr(nal_unit_type: u32, nuh_temporal_id_plus1: u32) -> u32 {
    field(nuh_temporal_id_plus1, 8, 6) | field(nal_unit_type, 5, 0)
}

pub const SPS_HDR: u32 = ENGINE_DEC_H265 + 0x04;
pub const SPS_HDR_FLAG_STRONG_INTRA_SMOOTHING_ENABLE: u32 = 1 << 26;
pub const SPS_HDR_FLAG_SPS_TEMPORAL_MVP_ENABLED: u32 = 1 << 25;
pub const SPS_HDR_FLAG_SAMPLE_ADAPTIVE_OFFSET_ENABLED: u32 = 1 << 24;
pub const SPS_HDR_FLAG_AMP_ENABLED: u32 = 1 << 23;
pub const SPS_HDR_FLAG_SEPARATE_COLOUR_PLANE: u32 = 1 << 2;

pub const fn sps_hdr_max_transform_hierarchy_depth_intra(v: u32) -> u32 {
    field(v, 22, 20)
}

pub const fn sps_hdr_max_transform_hierarchy_depth_inter(v: u32) -> u32 {
    field(v, 19, 17)
}

pub const fn sps_hdr_log2_diff_max_min_transform_block_size(v: u32) -> u32 {
    field(v, 16, 15)
}

pub const fn sps_hdr_log2_min_transform_block_size_minus2(v: u32) -> u32 {
    field(v, 14, 13)
}

pub const fn sps_hdr_log2_diff_max_min_luma_coding_block_size(v: u32) -> u32 {
    field(v, 12, 11)
}

pub const fn sps_hdr_log2_min_luma_coding_block_size_minus3(v: u32) -> u32 {
    field(v, 10, 9)
}

pub const fn sps_hdr_bit_depth_chroma_minus8(v: u32) -> u32 {
    field(v, 8, 6)
}

pub const fn sps_hdr_bit_depth_luma_minus8(v: u32) -> u32 {
    field(v, 5, 3)
}

pub const fn sps_hdr_chroma_format_idc(v: u32) -> u32 {
    field(v, 1, 0)
}

pub const PIC_SIZE: u32 = ENGINE_DEC_H265 + 0x08;

pub const fn pic_size(width: u32, height: u32) -> u32 {
    (width & 0x1fff) | ((height & 0x1fff) << 16)
}

pub const PCM_CTRL: u32 = ENGINE_DEC_H265 + 0x0c;
pub const PCM_CTRL_FLAG_PCM_ENABLED: u32 = 1 << 15;
pub const PCM_CTRL_FLAG_PCM_LOOP_FILTER_DISABLED: u32 = 1 << 14;

pub const fn pcm_ctrl(
    bit_depth_chroma_minus1: u32,
    bit_depth_luma_minus1: u32,
    log2_diff_max_min_size: u32,
    log2_min_size_minus3: u32,
) -> u32 {
    field(bit_depth_chroma_minus1, 11, 8)
        | field(bit_depth_luma_minus1, 7, 4)
        | field(log2_diff_max_min_size, 3, 2)
        | field(log2_min_size_minus3, 1, 0)
}

pub const PPS_CTRL0: u32 = ENGINE_DEC_H265 + 0x10;
pub const PPS_CTRL0_FLAG_CU_QP_DELTA_ENABLED: u32 = 1 << 3;
pub const PPS_CTRL0_FLAG_TRANSFORM_SKIP_ENABLED: u32 = 1 << 2;
pub const PPS_CTRL0_FLAG_CONSTRAINED_INTRA_PRED: u32 = 1 << 1;
pub const PPS_CTRL0_FLAG_SIGN_DATA_HIDING_ENABLED: u32 = 1 << 0;

pub const fn pps_ctrl0(
    cr_qp_offset: i32,
    cb_qp_offset: i32,
    init_qp_minus26: i32,
    diff_cu_qp_delta_depth: u32,
) -> u32 {
    field(cr_qp_offset as u32, 29, 24)
        | field(cb_qp_offset as u32, 21, 16)
        | field(init_qp_minus26 as u32, 14, 8)
        | field(diff_cu_qp_delta_depth, 5, 4)
}

pub const PPS_CTRL1: u32 = ENGINE_DEC_H265 + 0x14;
pub const PPS_CTRL1_FLAG_PPS_LOOP_FILTER_ACROSS_SLICES_ENABLED: u32 = 1 << 6;
pub const PPS_CTRL1_FLAG_LOOP_FILTER_ACROSS_TILES_ENABLED: u32 = 1 << 5;
pub const PPS_CTRL1_FLAG_ENTROPY_CODING_SYNC_ENABLED: u32 = 1 << 4;
pub const PPS_CTRL1_FLAG_TILES_ENABLED: u32 = 1 << 3;
pub const PPS_CTRL1_FLAG_TRANSQUANT_BYPASS_ENABLED: u32 = 1 << 2;
pub const PPS_CTRL1_FLAG_WEIGHTED_BIPRED: u32 = 1 << 1;
pub const PPS_CTRL1_FLAG_WEIGHTED_PRED: u32 = 1 << 0;

pub const fn pps_ctrl1_log2_parallel_merge_level_minus2(v: u32) -> u32 {
    field(v, 10, 8)
}

pub const SCALING_LIST_CTRL0: u32 = ENGINE_DEC_H265 + 0x18;
pub const SCALING_LIST_CTRL0_FLAG_ENABLED: u32 = 1 << 31;
pub const SCALING_LIST_CTRL0_SRAM: u32 = 0 << 30;
pub const SCALING_LIST_CTRL0_DEFAULT: u32 = 1 << 30;

pub const SLICE_HDR_INFO0: u32 = ENGINE_DEC_H265 + 0x20;
pub const SLICE_HDR_INFO0_FLAG_COLLOCATED_FROM_L0: u32 = 1 << 9;
pub const SLICE_HDR_INFO0_FLAG_CABAC_INIT: u32 = 1 << 8;
pub const SLICE_HDR_INFO0_FLAG_MVD_L1_ZERO: u32 = 1 << 7;
pub const SLICE_HDR_INFO0_FLAG_SLICE_SAO_CHROMA: u32 = 1 << 6;
pub const SLICE_HDR_INFO0_FLAG_SLICE_SAO_LUMA: u32 = 1 << 5;
pub const SLICE_HDR_INFO0_FLAG_SLICE_TEMPORAL_MVP_ENABLE: u32 = 1 << 4;
pub const SLICE_HDR_INFO0_FLAG_DEPENDENT_SLICE_SEGMENT: u32 = 1 << 1;
pub const SLICE_HDR_INFO0_FLAG_FIRST_SLICE_SEGMENT_IN_PIC: u32 = 1 << 0;

pub const fn slice_hdr_info0(
    picture_type: u32,
    five_minus_max_num_merge_cand: u32,
    num_ref_idx_l1_active_minus1: u32,
    num_ref_idx_l0_active_minus1: u32,
    collocated_ref_idx: u32,
    colour_plane_id: u32,
    slice_type: u32,
) -> u32 {
    field(picture_type, 29, 28)
        | field(five_minus_max_num_merge_cand, 26, 24)
        | field(num_ref_idx_l1_active_minus1, 23, 20)
        | field(num_ref_idx_l0_active_minus1, 19, 16)
        | field(collocated_ref_idx, 15, 12)
        | field(colour_plane_id, 11, 10)
        | field(slice_type, 3, 2)
}

pub const SLICE_HDR_INFO1: u32 = ENGINE_DEC_H265 + 0x24;
pub const SLICE_HDR_INFO1_FLAG_SLICE_DEBLOCKING_FILTER_DISABLED: u32 = 1 << 23;
pub const SLICE_HDR_INFO1_FLAG_SLICE_LOOP_FILTER_ACROSS_SLICES_ENABLED: u32 = 1 << 22;
pub const SLICE_HDR_INFO1_FLAG_SLICE_NOT_LOW_DELAY: u32 = 1 << 21;

pub const fn slice_hdr_info1(
    tc_offset_div2: i32,
    beta_offset_div2: i32,
    cr_qp_offset: i32,
    cb_qp_offset: i32,
    qp_delta: i32,
) -> u32 {
    field(tc_offset_div2 as u32, 31, 28)
        | field(beta_offset_div2 as u32, 27, 24)
        | field(cr_qp_offset as u32, 20, 16)
        | field(cb_qp_offset as u32, 12, 8)
        | field(qp_delta as u32, 6, 0)
}

pub const SLICE_HDR_INFO2: u32 = ENGINE_DEC_H265 + 0x28;

pub const fn slice_hdr_info2(
    num_entry_point_offsets: u32,
    chroma_log2_weight_denom: u32,
    luma_log2_weight_denom: u32,
) -> u32 {
    field(num_entry_point_offsets, 21, 8)
        | field(chroma_log2_weight_denom, 6, 4)
        | field(luma_log2_weight_denom, 2, 0)
}

pub const CTB_ADDR: u32 = ENGINE_DEC_H265 + 0x2c;

pub const fn ctb_addr(x: u32, y: u32) -> u32 {
    field(y, 25, 16) | field(x, 9, 0)
}

pub const CTRL: u32 = ENGINE_DEC_H265 + 0x30;
pub const CTRL_IRQ_MASK: u32 = (1 << 0) | (1 << 1) | (1 << 2);

pub const TRIGGER: u32 = ENGINE_DEC_H265 + 0x34;
pub const TRIGGER_SHOW_BITS: u32 = 0x01;
pub const TRIGGER_FLUSH_BITS: u32 = 0x03;
pub const TRIGGER_INIT_SWDEC: u32 = 0x07;
pub const TRIGGER_DEC_SLICE: u32 = 0x08;

pub const fn trigger_n_bits(bits: u32) -> u32 {
    (bits & 0x3f) << 8
}

pub const STATUS: u32 = ENGINE_DEC_H265 + 0x38;
pub const STATUS_VLD_BUSY: u32 = 1 << 14;
pub const STATUS_SUCCESS: u32 = 1 << 0;
pub const STATUS_CHECK_ERROR: u32 = (1 << 1) | (1 << 2);
pub const STATUS_CHECK_MASK: u32 = STATUS_SUCCESS | STATUS_CHECK_ERROR;

pub const CTB_NUM: u32 = ENGINE_DEC_H265 + 0x3c;

pub const BITS_ADDR: u32 = ENGINE_DEC_H265 + 0x40;
pub const BITS_ADDR_FIRST_SLICE_DATA: u32 = 1 << 30;
pub const BITS_ADDR_LAST_SLICE_DATA: u32 = 1 << 29;
pub const BITS_ADDR_VALID_SLICE_DATA: u32 = 1 << 28;

/// Addresses handed to the H.265 block drop their low 8 bits.
pub const fn addr_base(addr: u32) -> u32 {
    addr >> 8
}

pub const BITS_OFFSET: u32 = ENGINE_DEC_H265 + 0x44;
pub const BITS_LEN: u32 = ENGINE_DEC_H265 + 0x48;
pub const BITS_END_ADDR: u32 = ENGINE_DEC_H265 + 0x4c;
pub const OUTPUT_FRAME_IDX: u32 = ENGINE_DEC_H265 + 0x5c;
pub const NEIGHBOR_INFO_ADDR: u32 = ENGINE_DEC_H265 + 0x60;
pub const ENTRY_POINT_OFFSET_ADDR: u32 = ENGINE_DEC_H265 + 0x64;
pub const TILE_START_CTB: u32 = ENGINE_DEC_H265 + 0x68;
pub const TILE_END_CTB: u32 = ENGINE_DEC_H265 + 0x6c;
pub const SCALING_LIST_DC_COEF0: u32 = ENGINE_DEC_H265 + 0x78;
pub const SCALING_LIST_DC_COEF1: u32 = ENGINE_DEC_H265 + 0x7c;
pub const BITS_READ: u32 = ENGINE_DEC_H265 + 0xdc;

/// SRAM port. Unlike the H.264 block, the offset register takes a byte offset.
pub const SRAM_OFFSET: u32 = ENGINE_DEC_H265 + 0xe0;
pub const SRAM_DATA: u32 = ENGINE_DEC_H265 + 0xe4;

pub const SRAM_OFFSET_PRED_WEIGHT_LUMA_L0: u32 = 0x000;
pub const SRAM_OFFSET_PRED_WEIGHT_CHROMA_L0: u32 = 0x020;
pub const SRAM_OFFSET_PRED_WEIGHT_LUMA_L1: u32 = 0x060;
pub const SRAM_OFFSET_PRED_WEIGHT_CHROMA_L1: u32 = 0x080;
pub const SRAM_OFFSET_FRAME_INFO: u32 = 0x400;
pub const SRAM_OFFSET_FRAME_INFO_UNIT: u32 = 0x20;
pub const SRAM_OFFSET_SCALING_LISTS: u32 = 0x800;
pub const SRAM_OFFSET_REF_PIC_LIST0: u32 = 0xc00;
pub const SRAM_OFFSET_REF_PIC_LIST1: u32 = 0xc10;

pub const SRAM_REF_PIC_LIST_LT_REF: u8 = 1 << 7;

/// Packs a tile corner, in coding tree blocks.
pub const fn tile_ctb(x: u32, y: u32) -> u32 {
    (y << 16) | x
}

/// Conditional flag helper for parameter flag words.
pub const fn flag_if(reg_flag: u32, ctrl_flag: u64, flags: u64) -> u32 {
    flag(flags & ctrl_flag != 0, reg_flag)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signed_offsets_fit_their_fields() {
        let value = slice_hdr_info1(-1, 0, 0, 0, -3);
        assert_eq!(value >> 28, 0xf);
        assert_eq!(value & 0x7f, 0x7d);
    }

    #[test]
    fn pic_size_packing() {
        assert_eq!(pic_size(1920, 1080), (1080 << 16) | 1920);
    }
}
