// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Codec parameters and tunables.
//!
//! Stateless decoding parameters mirror the V4L2 stateless codec controls: they are produced by a
//! bitstream parser and are only read by the engines. Integer controls carry the encoder
//! tunables.

use std::collections::HashMap;

use enumn::N;

use crate::engine::EngineError;
use crate::engine::EngineResult;

/// Identifiers of the supported controls, using the V4L2 control ID values.
#[derive(N, Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum ControlId {
    MinBuffersForOutput = 0x0098_0928,

    GopSize = 0x0099_09cb,
    GopClosure = 0x0099_09cc,
    HeaderMode = 0x0099_09d8,
    MultiSliceMode = 0x0099_09dd,
    ForceKeyFrame = 0x0099_09e5,
    H264IFrameQp = 0x0099_0a5e,
    H264PFrameQp = 0x0099_0a5f,
    H264MinQp = 0x0099_0a61,
    H264MaxQp = 0x0099_0a62,
    H264EntropyMode = 0x0099_0a65,
    H264IPeriod = 0x0099_0a66,
    H264Level = 0x0099_0a67,
    H264LoopFilterAlpha = 0x0099_0a68,
    H264LoopFilterBeta = 0x0099_0a69,
    H264LoopFilterMode = 0x0099_0a6a,
    H264Profile = 0x0099_0a6b,
    H264VuiExtSarHeight = 0x0099_0a6c,
    H264VuiExtSarWidth = 0x0099_0a6d,
    H264VuiSarEnable = 0x0099_0a6e,
    H264VuiSarIdc = 0x0099_0a6f,
    H264ChromaQpIndexOffset = 0x0099_0a80,
    PrependSpsPpsToIdr = 0x0099_0b84,

    H264DecodeMode = 0x00a4_0900,
    H264StartCode = 0x00a4_0901,
    H264Sps = 0x00a4_0902,
    H264Pps = 0x00a4_0903,
    H264ScalingMatrix = 0x00a4_0904,
    H264PredWeights = 0x00a4_0905,
    H264SliceParams = 0x00a4_0906,
    H264DecodeParams = 0x00a4_0907,
    Vp8Frame = 0x00a4_09c8,
    Mpeg2Sequence = 0x00a4_09dc,
    Mpeg2Picture = 0x00a4_09dd,
    Mpeg2Quantisation = 0x00a4_09de,
    HevcSps = 0x00a4_0a90,
    HevcPps = 0x00a4_0a91,
    HevcSliceParams = 0x00a4_0a92,
    HevcScalingMatrix = 0x00a4_0a93,
    HevcDecodeParams = 0x00a4_0a94,
    HevcDecodeMode = 0x00a4_0a95,
    HevcStartCode = 0x00a4_0a96,
    HevcEntryPointOffsets = 0x00a4_0a97,
}

/// Decode mode and start code menu values shared by the H.264 and HEVC decoders.
pub const DECODE_MODE_SLICE_BASED: i32 = 0;
pub const START_CODE_NONE: i32 = 0;

/// Maximum number of entries of the HEVC entry point offsets array.
pub const HEVC_ENTRY_POINT_OFFSETS_MAX: usize = 256;

/* MPEG-2 */

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Mpeg2Sequence {
    pub horizontal_size: u16,
    pub vertical_size: u16,
    pub vbv_buffer_size: u32,
    pub profile_and_level_indication: u16,
    pub chroma_format: u8,
    pub flags: u8,
}

impl Mpeg2Sequence {
    pub const FLAG_PROGRESSIVE: u8 = 0x01;
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Mpeg2Picture {
    pub backward_ref_ts: u64,
    pub forward_ref_ts: u64,
    pub flags: u32,
    pub f_code: [[u8; 2]; 2],
    pub picture_coding_type: u8,
    pub picture_structure: u8,
    pub intra_dc_precision: u8,
}

impl Mpeg2Picture {
    pub const FLAG_TOP_FIELD_FIRST: u32 = 0x01;
    pub const FLAG_FRAME_PRED_DCT: u32 = 0x02;
    pub const FLAG_CONCEALMENT_MV: u32 = 0x04;
    pub const FLAG_Q_SCALE_TYPE: u32 = 0x08;
    pub const FLAG_INTRA_VLC: u32 = 0x10;
    pub const FLAG_ALT_SCAN: u32 = 0x20;
    pub const FLAG_REPEAT_FIRST: u32 = 0x40;
    pub const FLAG_PROGRESSIVE: u32 = 0x80;

    pub const CODING_TYPE_I: u8 = 1;
    pub const CODING_TYPE_P: u8 = 2;
    pub const CODING_TYPE_B: u8 = 3;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Mpeg2Quantisation {
    pub intra_quantiser_matrix: [u8; 64],
    pub non_intra_quantiser_matrix: [u8; 64],
    pub chroma_intra_quantiser_matrix: [u8; 64],
    pub chroma_non_intra_quantiser_matrix: [u8; 64],
}

impl Default for Mpeg2Quantisation {
    fn default() -> Self {
        Self {
            intra_quantiser_matrix: [0; 64],
            non_intra_quantiser_matrix: [0; 64],
            chroma_intra_quantiser_matrix: [0; 64],
            chroma_non_intra_quantiser_matrix: [0; 64],
        }
    }
}

/* H.264 */

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct H264Sps {
    pub profile_idc: u8,
    pub constraint_set_flags: u8,
    pub level_idc: u8,
    pub seq_parameter_set_id: u8,
    pub chroma_format_idc: u8,
    pub bit_depth_luma_minus8: u8,
    pub bit_depth_chroma_minus8: u8,
    pub log2_max_frame_num_minus4: u8,
    pub pic_order_cnt_type: u8,
    pub log2_max_pic_order_cnt_lsb_minus4: u8,
    pub max_num_ref_frames: u8,
    pub num_ref_frames_in_pic_order_cnt_cycle: u8,
    pub offset_for_non_ref_pic: i32,
    pub offset_for_top_to_bottom_field: i32,
    pub pic_width_in_mbs_minus1: u16,
    pub pic_height_in_map_units_minus1: u16,
    pub flags: u32,
}

impl H264Sps {
    pub const FLAG_SEPARATE_COLOUR_PLANE: u32 = 0x01;
    pub const FLAG_QPPRIME_Y_ZERO_TRANSFORM_BYPASS: u32 = 0x02;
    pub const FLAG_DELTA_PIC_ORDER_ALWAYS_ZERO: u32 = 0x04;
    pub const FLAG_GAPS_IN_FRAME_NUM_VALUE_ALLOWED: u32 = 0x08;
    pub const FLAG_FRAME_MBS_ONLY: u32 = 0x10;
    pub const FLAG_MB_ADAPTIVE_FRAME_FIELD: u32 = 0x20;
    pub const FLAG_DIRECT_8X8_INFERENCE: u32 = 0x40;
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct H264Pps {
    pub pic_parameter_set_id: u8,
    pub seq_parameter_set_id: u8,
    pub num_slice_groups_minus1: u8,
    pub num_ref_idx_l0_default_active_minus1: u8,
    pub num_ref_idx_l1_default_active_minus1: u8,
    pub weighted_bipred_idc: u8,
    pub pic_init_qp_minus26: i8,
    pub pic_init_qs_minus26: i8,
    pub chroma_qp_index_offset: i8,
    pub second_chroma_qp_index_offset: i8,
    pub flags: u16,
}

impl H264Pps {
    pub const FLAG_ENTROPY_CODING_MODE: u16 = 0x0001;
    pub const FLAG_BOTTOM_FIELD_PIC_ORDER_IN_FRAME_PRESENT: u16 = 0x0002;
    pub const FLAG_WEIGHTED_PRED: u16 = 0x0004;
    pub const FLAG_DEBLOCKING_FILTER_CONTROL_PRESENT: u16 = 0x0008;
    pub const FLAG_CONSTRAINED_INTRA_PRED: u16 = 0x0010;
    pub const FLAG_REDUNDANT_PIC_CNT_PRESENT: u16 = 0x0020;
    pub const FLAG_TRANSFORM_8X8_MODE: u16 = 0x0040;
    pub const FLAG_SCALING_MATRIX_PRESENT: u16 = 0x0080;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct H264ScalingMatrix {
    pub scaling_list_4x4: [[u8; 16]; 6],
    pub scaling_list_8x8: [[u8; 64]; 6],
}

impl Default for H264ScalingMatrix {
    fn default() -> Self {
        Self {
            scaling_list_4x4: [[0; 16]; 6],
            scaling_list_8x8: [[0; 64]; 6],
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct H264WeightFactors {
    pub luma_weight: [i16; 32],
    pub luma_offset: [i16; 32],
    pub chroma_weight: [[i16; 2]; 32],
    pub chroma_offset: [[i16; 2]; 32],
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct H264PredWeights {
    pub luma_log2_weight_denom: u16,
    pub chroma_log2_weight_denom: u16,
    pub weight_factors: [H264WeightFactors; 2],
}

/// Reference to a DPB entry from a slice reference list.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct H264Reference {
    pub fields: u8,
    /// Index into [`H264DecodeParams::dpb`].
    pub index: u8,
}

impl H264Reference {
    pub const TOP_FIELD_REF: u8 = 0x1;
    pub const BOTTOM_FIELD_REF: u8 = 0x2;
    pub const FRAME_REF: u8 = 0x3;
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct H264SliceParams {
    pub header_bit_size: u32,
    pub first_mb_in_slice: u32,
    pub slice_type: u8,
    pub colour_plane_id: u8,
    pub redundant_pic_cnt: u8,
    pub cabac_init_idc: u8,
    pub slice_qp_delta: i8,
    pub slice_qs_delta: i8,
    pub disable_deblocking_filter_idc: u8,
    pub slice_alpha_c0_offset_div2: i8,
    pub slice_beta_offset_div2: i8,
    pub num_ref_idx_l0_active_minus1: u8,
    pub num_ref_idx_l1_active_minus1: u8,
    pub ref_pic_list0: [H264Reference; 32],
    pub ref_pic_list1: [H264Reference; 32],
    pub flags: u32,
}

impl H264SliceParams {
    pub const FLAG_DIRECT_SPATIAL_MV_PRED: u32 = 0x01;
    pub const FLAG_SP_FOR_SWITCH: u32 = 0x02;

    pub const TYPE_P: u8 = 0;
    pub const TYPE_B: u8 = 1;
    pub const TYPE_I: u8 = 2;
    pub const TYPE_SP: u8 = 3;
    pub const TYPE_SI: u8 = 4;
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct H264DpbEntry {
    pub reference_ts: u64,
    pub pic_num: u32,
    pub frame_num: u16,
    pub fields: u8,
    pub top_field_order_cnt: i32,
    pub bottom_field_order_cnt: i32,
    pub flags: u32,
}

impl H264DpbEntry {
    pub const FLAG_VALID: u32 = 0x01;
    pub const FLAG_ACTIVE: u32 = 0x02;
    pub const FLAG_LONG_TERM: u32 = 0x04;
    pub const FLAG_FIELD: u32 = 0x08;
}

pub const H264_NUM_DPB_ENTRIES: usize = 16;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct H264DecodeParams {
    pub dpb: [H264DpbEntry; H264_NUM_DPB_ENTRIES],
    pub nal_ref_idc: u16,
    pub frame_num: u16,
    pub top_field_order_cnt: i32,
    pub bottom_field_order_cnt: i32,
    pub idr_pic_id: u16,
    pub pic_order_cnt_lsb: u16,
    pub delta_pic_order_cnt_bottom: i32,
    pub delta_pic_order_cnt0: i32,
    pub delta_pic_order_cnt1: i32,
    pub dec_ref_pic_marking_bit_size: u32,
    pub pic_order_cnt_bit_size: u32,
    pub slice_group_change_cycle: u32,
    pub flags: u32,
}

impl H264DecodeParams {
    pub const FLAG_IDR_PIC: u32 = 0x01;
    pub const FLAG_FIELD_PIC: u32 = 0x02;
    pub const FLAG_BOTTOM_FIELD: u32 = 0x04;
    pub const FLAG_PFRAME: u32 = 0x08;
    pub const FLAG_BFRAME: u32 = 0x10;
}

/* HEVC */

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HevcSps {
    pub video_parameter_set_id: u8,
    pub seq_parameter_set_id: u8,
    pub pic_width_in_luma_samples: u16,
    pub pic_height_in_luma_samples: u16,
    pub bit_depth_luma_minus8: u8,
    pub bit_depth_chroma_minus8: u8,
    pub log2_max_pic_order_cnt_lsb_minus4: u8,
    pub sps_max_dec_pic_buffering_minus1: u8,
    pub sps_max_num_reorder_pics: u8,
    pub sps_max_latency_increase_plus1: u8,
    pub log2_min_luma_coding_block_size_minus3: u8,
    pub log2_diff_max_min_luma_coding_block_size: u8,
    pub log2_min_luma_transform_block_size_minus2: u8,
    pub log2_diff_max_min_luma_transform_block_size: u8,
    pub max_transform_hierarchy_depth_inter: u8,
    pub max_transform_hierarchy_depth_intra: u8,
    pub pcm_sample_bit_depth_luma_minus1: u8,
    pub pcm_sample_bit_depth_chroma_minus1: u8,
    pub log2_min_pcm_luma_coding_block_size_minus3: u8,
    pub log2_diff_max_min_pcm_luma_coding_block_size: u8,
    pub num_short_term_ref_pic_sets: u8,
    pub num_long_term_ref_pics_sps: u8,
    pub chroma_format_idc: u8,
    pub sps_max_sub_layers_minus1: u8,
    pub flags: u64,
}

impl HevcSps {
    pub const FLAG_SEPARATE_COLOUR_PLANE: u64 = 1 << 0;
    pub const FLAG_SCALING_LIST_ENABLED: u64 = 1 << 1;
    pub const FLAG_AMP_ENABLED: u64 = 1 << 2;
    pub const FLAG_SAMPLE_ADAPTIVE_OFFSET: u64 = 1 << 3;
    pub const FLAG_PCM_ENABLED: u64 = 1 << 4;
    pub const FLAG_PCM_LOOP_FILTER_DISABLED: u64 = 1 << 5;
    pub const FLAG_LONG_TERM_REF_PICS_PRESENT: u64 = 1 << 6;
    pub const FLAG_SPS_TEMPORAL_MVP_ENABLED: u64 = 1 << 7;
    pub const FLAG_STRONG_INTRA_SMOOTHING_ENABLED: u64 = 1 << 8;

    /// Supported coding tree block sizes, log2 of 16 to 64 luma samples.
    pub const LOG2_CTB_SIZE_RANGE: std::ops::RangeInclusive<u32> = 4..=6;

    fn log2_ctb_size(&self) -> u32 {
        u32::from(self.log2_min_luma_coding_block_size_minus3)
            + 3
            + u32::from(self.log2_diff_max_min_luma_coding_block_size)
    }

    /// Size of the coding tree blocks, in luma samples. Only meaningful for a SPS that passed
    /// [`HevcSps::validate`].
    pub fn ctb_size(&self) -> u32 {
        1u32 << self.log2_ctb_size().min(u32::BITS - 1)
    }

    pub fn validate(&self) -> EngineResult<()> {
        let log2 = self.log2_ctb_size();
        if !Self::LOG2_CTB_SIZE_RANGE.contains(&log2) {
            return Err(EngineError::Range(format!(
                "HEVC coding tree block size 2^{} is outside of 16..=64",
                log2
            )));
        }

        Ok(())
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HevcPps {
    pub pic_parameter_set_id: u8,
    pub num_extra_slice_header_bits: u8,
    pub num_ref_idx_l0_default_active_minus1: u8,
    pub num_ref_idx_l1_default_active_minus1: u8,
    pub init_qp_minus26: i8,
    pub diff_cu_qp_delta_depth: u8,
    pub pps_cb_qp_offset: i8,
    pub pps_cr_qp_offset: i8,
    pub num_tile_columns_minus1: u8,
    pub num_tile_rows_minus1: u8,
    pub column_width_minus1: [u8; 20],
    pub row_height_minus1: [u8; 22],
    pub pps_beta_offset_div2: i8,
    pub pps_tc_offset_div2: i8,
    pub log2_parallel_merge_level_minus2: u8,
    pub flags: u64,
}

impl HevcPps {
    pub const FLAG_DEPENDENT_SLICE_SEGMENT_ENABLED: u64 = 1 << 0;
    pub const FLAG_OUTPUT_FLAG_PRESENT: u64 = 1 << 1;
    pub const FLAG_SIGN_DATA_HIDING_ENABLED: u64 = 1 << 2;
    pub const FLAG_CABAC_INIT_PRESENT: u64 = 1 << 3;
    pub const FLAG_CONSTRAINED_INTRA_PRED: u64 = 1 << 4;
    pub const FLAG_TRANSFORM_SKIP_ENABLED: u64 = 1 << 5;
    pub const FLAG_CU_QP_DELTA_ENABLED: u64 = 1 << 6;
    pub const FLAG_PPS_SLICE_CHROMA_QP_OFFSETS_PRESENT: u64 = 1 << 7;
    pub const FLAG_WEIGHTED_PRED: u64 = 1 << 8;
    pub const FLAG_WEIGHTED_BIPRED: u64 = 1 << 9;
    pub const FLAG_TRANSQUANT_BYPASS_ENABLED: u64 = 1 << 10;
    pub const FLAG_TILES_ENABLED: u64 = 1 << 11;
    pub const FLAG_ENTROPY_CODING_SYNC_ENABLED: u64 = 1 << 12;
    pub const FLAG_LOOP_FILTER_ACROSS_TILES_ENABLED: u64 = 1 << 13;
    pub const FLAG_PPS_LOOP_FILTER_ACROSS_SLICES_ENABLED: u64 = 1 << 14;
    pub const FLAG_DEBLOCKING_FILTER_OVERRIDE_ENABLED: u64 = 1 << 15;
    pub const FLAG_PPS_DISABLE_DEBLOCKING_FILTER: u64 = 1 << 16;
    pub const FLAG_LISTS_MODIFICATION_PRESENT: u64 = 1 << 17;
    pub const FLAG_SLICE_SEGMENT_HEADER_EXTENSION_PRESENT: u64 = 1 << 18;
    pub const FLAG_DEBLOCKING_FILTER_CONTROL_PRESENT: u64 = 1 << 19;
    pub const FLAG_UNIFORM_SPACING: u64 = 1 << 20;
}

pub const HEVC_DPB_ENTRIES_NUM_MAX: usize = 16;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HevcPredWeightTable {
    pub delta_luma_weight_l0: [i8; 16],
    pub luma_offset_l0: [i8; 16],
    pub delta_chroma_weight_l0: [[i8; 2]; 16],
    pub chroma_offset_l0: [[i8; 2]; 16],
    pub delta_luma_weight_l1: [i8; 16],
    pub luma_offset_l1: [i8; 16],
    pub delta_chroma_weight_l1: [[i8; 2]; 16],
    pub chroma_offset_l1: [[i8; 2]; 16],
    pub luma_log2_weight_denom: u8,
    pub delta_chroma_log2_weight_denom: i8,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HevcSliceParams {
    pub bit_size: u32,
    pub data_byte_offset: u32,
    pub num_entry_point_offsets: u32,
    pub nal_unit_type: u8,
    pub nuh_temporal_id_plus1: u8,
    pub slice_type: u8,
    pub colour_plane_id: u8,
    pub slice_pic_order_cnt: i32,
    pub num_ref_idx_l0_active_minus1: u8,
    pub num_ref_idx_l1_active_minus1: u8,
    pub collocated_ref_idx: u8,
    pub five_minus_max_num_merge_cand: u8,
    pub slice_qp_delta: i8,
    pub slice_cb_qp_offset: i8,
    pub slice_cr_qp_offset: i8,
    pub slice_beta_offset_div2: i8,
    pub slice_tc_offset_div2: i8,
    pub pic_struct: u8,
    pub slice_segment_addr: u32,
    pub ref_idx_l0: [u8; HEVC_DPB_ENTRIES_NUM_MAX],
    pub ref_idx_l1: [u8; HEVC_DPB_ENTRIES_NUM_MAX],
    pub short_term_ref_pic_set_size: u16,
    pub long_term_ref_pic_set_size: u16,
    pub pred_weight_table: HevcPredWeightTable,
    pub flags: u64,
}

impl HevcSliceParams {
    pub const FLAG_SLICE_SAO_LUMA: u64 = 1 << 0;
    pub const FLAG_SLICE_SAO_CHROMA: u64 = 1 << 1;
    pub const FLAG_SLICE_TEMPORAL_MVP_ENABLED: u64 = 1 << 2;
    pub const FLAG_MVD_L1_ZERO: u64 = 1 << 3;
    pub const FLAG_CABAC_INIT: u64 = 1 << 4;
    pub const FLAG_COLLOCATED_FROM_L0: u64 = 1 << 5;
    pub const FLAG_USE_INTEGER_MV: u64 = 1 << 6;
    pub const FLAG_SLICE_DEBLOCKING_FILTER_DISABLED: u64 = 1 << 7;
    pub const FLAG_SLICE_LOOP_FILTER_ACROSS_SLICES_ENABLED: u64 = 1 << 8;
    pub const FLAG_DEPENDENT_SLICE_SEGMENT: u64 = 1 << 9;

    pub const TYPE_B: u8 = 0;
    pub const TYPE_P: u8 = 1;
    pub const TYPE_I: u8 = 2;

    /// Checks that the active reference counts fit the reference index lists.
    pub fn validate(&self) -> EngineResult<()> {
        for (list, minus1) in
            [(0, self.num_ref_idx_l0_active_minus1), (1, self.num_ref_idx_l1_active_minus1)]
        {
            if minus1 as usize >= HEVC_DPB_ENTRIES_NUM_MAX {
                return Err(EngineError::Range(format!(
                    "{} active references in list {} exceed the maximum of {}",
                    minus1 as usize + 1,
                    list,
                    HEVC_DPB_ENTRIES_NUM_MAX
                )));
            }
        }

        Ok(())
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HevcDpbEntry {
    pub timestamp: u64,
    pub flags: u8,
    pub field_pic: u8,
    pub pic_order_cnt_val: i32,
}

impl HevcDpbEntry {
    pub const FLAG_LONG_TERM_REFERENCE: u8 = 0x01;
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HevcDecodeParams {
    pub pic_order_cnt_val: i32,
    pub short_term_ref_pic_set_size: u16,
    pub long_term_ref_pic_set_size: u16,
    pub num_active_dpb_entries: u8,
    pub num_poc_st_curr_before: u8,
    pub num_poc_st_curr_after: u8,
    pub num_poc_lt_curr: u8,
    pub poc_st_curr_before: [u8; HEVC_DPB_ENTRIES_NUM_MAX],
    pub poc_st_curr_after: [u8; HEVC_DPB_ENTRIES_NUM_MAX],
    pub poc_lt_curr: [u8; HEVC_DPB_ENTRIES_NUM_MAX],
    pub dpb: [HevcDpbEntry; HEVC_DPB_ENTRIES_NUM_MAX],
    pub flags: u64,
}

impl HevcDecodeParams {
    pub const FLAG_IRAP_PIC: u64 = 0x1;
    pub const FLAG_IDR_PIC: u64 = 0x2;
    pub const FLAG_NO_OUTPUT_OF_PRIOR_PICS: u64 = 0x4;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HevcScalingMatrix {
    pub scaling_list_4x4: [[u8; 16]; 6],
    pub scaling_list_8x8: [[u8; 64]; 6],
    pub scaling_list_16x16: [[u8; 64]; 6],
    pub scaling_list_32x32: [[u8; 64]; 2],
    pub scaling_list_dc_coef_16x16: [u8; 6],
    pub scaling_list_dc_coef_32x32: [u8; 2],
}

impl Default for HevcScalingMatrix {
    fn default() -> Self {
        Self {
            scaling_list_4x4: [[0; 16]; 6],
            scaling_list_8x8: [[0; 64]; 6],
            scaling_list_16x16: [[0; 64]; 6],
            scaling_list_32x32: [[0; 64]; 2],
            scaling_list_dc_coef_16x16: [0; 6],
            scaling_list_dc_coef_32x32: [0; 2],
        }
    }
}

/* VP8 */

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Vp8Segment {
    pub quant_update: [i8; 4],
    pub lf_update: [i8; 4],
    pub segment_probs: [u8; 3],
    pub flags: u32,
}

impl Vp8Segment {
    pub const FLAG_ENABLED: u32 = 0x01;
    pub const FLAG_UPDATE_MAP: u32 = 0x02;
    pub const FLAG_UPDATE_FEATURE_DATA: u32 = 0x04;
    pub const FLAG_DELTA_VALUE_MODE: u32 = 0x08;
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Vp8LoopFilter {
    pub ref_frm_delta: [i8; 4],
    pub mb_mode_delta: [i8; 4],
    pub sharpness_level: u8,
    pub level: u8,
    pub flags: u32,
}

impl Vp8LoopFilter {
    pub const FLAG_ADJ_ENABLE: u32 = 0x01;
    pub const FLAG_DELTA_UPDATE: u32 = 0x02;
    pub const FLAG_FILTER_TYPE_SIMPLE: u32 = 0x04;
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Vp8Quantization {
    pub y_ac_qi: u8,
    pub y_dc_delta: i8,
    pub y2_dc_delta: i8,
    pub y2_ac_delta: i8,
    pub uv_dc_delta: i8,
    pub uv_ac_delta: i8,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Vp8Entropy {
    pub coeff_probs: [[[[u8; 11]; 3]; 8]; 4],
    pub y_mode_probs: [u8; 4],
    pub uv_mode_probs: [u8; 3],
    pub mv_probs: [[u8; 19]; 2],
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Vp8Frame {
    pub segment: Vp8Segment,
    pub lf: Vp8LoopFilter,
    pub quant: Vp8Quantization,
    pub entropy: Vp8Entropy,
    pub width: u16,
    pub height: u16,
    pub horizontal_scale: u8,
    pub vertical_scale: u8,
    pub version: u8,
    pub prob_skip_false: u8,
    pub prob_intra: u8,
    pub prob_last: u8,
    pub prob_gf: u8,
    pub num_dct_parts: u8,
    pub first_part_size: u32,
    pub first_part_header_bits: u32,
    pub dct_part_sizes: [u32; 8],
    pub last_frame_ts: u64,
    pub golden_frame_ts: u64,
    pub alt_frame_ts: u64,
    pub flags: u64,
}

impl Vp8Frame {
    pub const FLAG_KEY_FRAME: u64 = 0x01;
    pub const FLAG_EXPERIMENTAL: u64 = 0x02;
    pub const FLAG_SHOW_FRAME: u64 = 0x04;
    pub const FLAG_MB_NO_SKIP_COEFF: u64 = 0x08;
    pub const FLAG_SIGN_BIAS_GOLDEN: u64 = 0x10;
    pub const FLAG_SIGN_BIAS_ALT: u64 = 0x20;

    pub fn is_key_frame(&self) -> bool {
        self.flags & Self::FLAG_KEY_FRAME != 0
    }
}

/// Value of a control.
#[derive(Clone, Debug, PartialEq)]
pub enum ControlValue {
    Integer(ControlId, i32),
    Mpeg2Sequence(Mpeg2Sequence),
    Mpeg2Picture(Mpeg2Picture),
    Mpeg2Quantisation(Box<Mpeg2Quantisation>),
    H264Sps(H264Sps),
    H264Pps(H264Pps),
    H264ScalingMatrix(Box<H264ScalingMatrix>),
    H264PredWeights(Box<H264PredWeights>),
    H264SliceParams(Box<H264SliceParams>),
    H264DecodeParams(Box<H264DecodeParams>),
    HevcSps(HevcSps),
    HevcPps(HevcPps),
    HevcSliceParams(Box<HevcSliceParams>),
    HevcScalingMatrix(Box<HevcScalingMatrix>),
    HevcDecodeParams(Box<HevcDecodeParams>),
    HevcEntryPointOffsets(Vec<u32>),
    Vp8Frame(Box<Vp8Frame>),
}

impl ControlValue {
    pub fn id(&self) -> ControlId {
        match self {
            ControlValue::Integer(id, _) => *id,
            ControlValue::Mpeg2Sequence(_) => ControlId::Mpeg2Sequence,
            ControlValue::Mpeg2Picture(_) => ControlId::Mpeg2Picture,
            ControlValue::Mpeg2Quantisation(_) => ControlId::Mpeg2Quantisation,
            ControlValue::H264Sps(_) => ControlId::H264Sps,
            ControlValue::H264Pps(_) => ControlId::H264Pps,
            ControlValue::H264ScalingMatrix(_) => ControlId::H264ScalingMatrix,
            ControlValue::H264PredWeights(_) => ControlId::H264PredWeights,
            ControlValue::H264SliceParams(_) => ControlId::H264SliceParams,
            ControlValue::H264DecodeParams(_) => ControlId::H264DecodeParams,
            ControlValue::HevcSps(_) => ControlId::HevcSps,
            ControlValue::HevcPps(_) => ControlId::HevcPps,
            ControlValue::HevcSliceParams(_) => ControlId::HevcSliceParams,
            ControlValue::HevcScalingMatrix(_) => ControlId::HevcScalingMatrix,
            ControlValue::HevcDecodeParams(_) => ControlId::HevcDecodeParams,
            ControlValue::HevcEntryPointOffsets(_) => ControlId::HevcEntryPointOffsets,
            ControlValue::Vp8Frame(_) => ControlId::Vp8Frame,
        }
    }

    /// Number of elements held by the control.
    pub fn elems(&self) -> usize {
        match self {
            ControlValue::HevcEntryPointOffsets(offsets) => offsets.len(),
            _ => 1,
        }
    }

    /// The zero-initialized value of a compound control, as found before the caller sets it.
    fn default_for(id: ControlId) -> Option<Self> {
        let value = match id {
            ControlId::Mpeg2Sequence => ControlValue::Mpeg2Sequence(Default::default()),
            ControlId::Mpeg2Picture => ControlValue::Mpeg2Picture(Default::default()),
            ControlId::Mpeg2Quantisation => ControlValue::Mpeg2Quantisation(Default::default()),
            ControlId::H264Sps => ControlValue::H264Sps(Default::default()),
            ControlId::H264Pps => ControlValue::H264Pps(Default::default()),
            ControlId::H264ScalingMatrix => ControlValue::H264ScalingMatrix(Default::default()),
            ControlId::H264PredWeights => ControlValue::H264PredWeights(Default::default()),
            ControlId::H264SliceParams => ControlValue::H264SliceParams(Default::default()),
            ControlId::H264DecodeParams => ControlValue::H264DecodeParams(Default::default()),
            ControlId::HevcSps => ControlValue::HevcSps(Default::default()),
            ControlId::HevcPps => ControlValue::HevcPps(Default::default()),
            ControlId::HevcSliceParams => ControlValue::HevcSliceParams(Default::default()),
            ControlId::HevcScalingMatrix => ControlValue::HevcScalingMatrix(Default::default()),
            ControlId::HevcDecodeParams => ControlValue::HevcDecodeParams(Default::default()),
            ControlId::HevcEntryPointOffsets => ControlValue::HevcEntryPointOffsets(Vec::new()),
            ControlId::Vp8Frame => ControlValue::Vp8Frame(Default::default()),
            _ => return None,
        };

        Some(value)
    }
}

/// Typed access to the payload of a compound control.
pub trait ControlData {
    const ID: ControlId;

    fn from_value(value: &ControlValue) -> Option<&Self>;
}

macro_rules! control_data {
    ($ty:ty, $variant:ident) => {
        impl ControlData for $ty {
            const ID: ControlId = ControlId::$variant;

            fn from_value(value: &ControlValue) -> Option<&Self> {
                match value {
                    ControlValue::$variant(data) => Some(data),
                    _ => None,
                }
            }
        }
    };
}

control_data!(Mpeg2Sequence, Mpeg2Sequence);
control_data!(Mpeg2Picture, Mpeg2Picture);
control_data!(Mpeg2Quantisation, Mpeg2Quantisation);
control_data!(H264Sps, H264Sps);
control_data!(H264Pps, H264Pps);
control_data!(H264ScalingMatrix, H264ScalingMatrix);
control_data!(H264PredWeights, H264PredWeights);
control_data!(H264SliceParams, H264SliceParams);
control_data!(H264DecodeParams, H264DecodeParams);
control_data!(HevcSps, HevcSps);
control_data!(HevcPps, HevcPps);
control_data!(HevcSliceParams, HevcSliceParams);
control_data!(HevcScalingMatrix, HevcScalingMatrix);
control_data!(HevcDecodeParams, HevcDecodeParams);
control_data!(Vec<u32>, HevcEntryPointOffsets);
control_data!(Vp8Frame, Vp8Frame);

/// Declaration of a control exposed by an engine.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ControlConfig {
    pub id: ControlId,
    pub kind: ControlKind,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ControlKind {
    /// A parameter structure.
    Compound,
    /// An integer, boolean or menu value within `min..=max`.
    Integer { min: i32, max: i32, default: i32 },
    /// A write-only trigger.
    Button,
}

impl ControlConfig {
    pub const fn compound(id: ControlId) -> Self {
        Self { id, kind: ControlKind::Compound }
    }

    pub const fn integer(id: ControlId, min: i32, max: i32, default: i32) -> Self {
        Self { id, kind: ControlKind::Integer { min, max, default } }
    }

    pub const fn button(id: ControlId) -> Self {
        Self { id, kind: ControlKind::Button }
    }
}

/// The controls of a context, with their current values.
#[derive(Clone, Debug, Default)]
pub struct ControlStore {
    configs: Vec<ControlConfig>,
    values: HashMap<ControlId, ControlValue>,
}

impl ControlStore {
    /// Creates a store holding the default value of every control in `configs`. A control
    /// declared by several engines is only registered once.
    pub fn new<'a>(configs: impl IntoIterator<Item = &'a ControlConfig>) -> Self {
        let mut store = Self::default();

        for config in configs {
            if store.config(config.id).is_some() {
                continue;
            }

            let value = match config.kind {
                ControlKind::Compound => ControlValue::default_for(config.id),
                ControlKind::Integer { default, .. } => {
                    Some(ControlValue::Integer(config.id, default))
                }
                ControlKind::Button => Some(ControlValue::Integer(config.id, 0)),
            };

            match value {
                Some(value) => {
                    store.values.insert(config.id, value);
                    store.configs.push(*config);
                }
                None => log::error!("control {:?} cannot be a compound control", config.id),
            }
        }

        store
    }

    pub fn config(&self, id: ControlId) -> Option<&ControlConfig> {
        self.configs.iter().find(|c| c.id == id)
    }

    pub fn configs(&self) -> &[ControlConfig] {
        &self.configs
    }

    /// Checks that `value` is acceptable for a registered control.
    pub fn check(&self, value: &ControlValue) -> EngineResult<()> {
        let id = value.id();
        let config = self.config(id).ok_or(EngineError::MissingControl(id))?;

        match (config.kind, value) {
            (ControlKind::Integer { min, max, .. }, ControlValue::Integer(_, v)) => {
                if *v < min || *v > max {
                    return Err(EngineError::Range(format!(
                        "{:?} value {} is outside of {}..={}",
                        id, v, min, max
                    )));
                }
            }
            (ControlKind::Button, ControlValue::Integer(..)) => (),
            (ControlKind::Compound, ControlValue::HevcEntryPointOffsets(offsets)) => {
                if offsets.len() > HEVC_ENTRY_POINT_OFFSETS_MAX {
                    return Err(EngineError::Range(format!(
                        "{} entry point offsets exceed the maximum of {}",
                        offsets.len(),
                        HEVC_ENTRY_POINT_OFFSETS_MAX
                    )));
                }
            }
            (ControlKind::Compound, ControlValue::HevcSps(sps)) => sps.validate()?,
            (ControlKind::Compound, ControlValue::HevcSliceParams(slice)) => slice.validate()?,
            (ControlKind::Compound, ControlValue::Integer(..)) => {
                return Err(EngineError::Range(format!("{:?} expects a compound value", id)));
            }
            (ControlKind::Compound, _) => (),
            (_, _) => {
                return Err(EngineError::Range(format!("{:?} expects an integer value", id)));
            }
        }

        Ok(())
    }

    /// Stores `value` after checking it.
    pub fn set(&mut self, value: ControlValue) -> EngineResult<()> {
        self.check(&value)?;
        self.values.insert(value.id(), value);

        Ok(())
    }

    pub fn get(&self, id: ControlId) -> Option<&ControlValue> {
        self.values.get(&id)
    }

    /// The payload of a compound control.
    pub fn ctrl_data<T: ControlData + ?Sized>(&self) -> EngineResult<&T> {
        self.values
            .get(&T::ID)
            .and_then(T::from_value)
            .ok_or(EngineError::MissingControl(T::ID))
    }

    /// The value of an integer control, or 0 if it is not registered.
    pub fn ctrl_value(&self, id: ControlId) -> i32 {
        match self.values.get(&id) {
            Some(ControlValue::Integer(_, value)) => *value,
            _ => {
                log::error!("no integer control {:?}", id);
                0
            }
        }
    }

    /// The number of elements of a control, or 0 if it is not registered.
    pub fn ctrl_array_count(&self, id: ControlId) -> usize {
        match self.values.get(&id) {
            Some(value) => value.elems(),
            None => {
                log::error!("no control {:?}", id);
                0
            }
        }
    }

    pub(crate) fn set_value(&mut self, id: ControlId, value: i32) {
        if let Some(ControlValue::Integer(_, current)) = self.values.get_mut(&id) {
            *current = value;
        }
    }
}
