// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! VP8 registers, living inside the H.264 decoding block.

use super::field;
use super::flag;
use super::ENGINE_DEC_H264;

pub const PPS: u32 = ENGINE_DEC_H264 + 0x14;

#[derive(Copy, Clone, Debug, Default)]
pub struct PpsFields {
    pub p_frame: bool,
    pub last_sharpness_level: u32,
    pub last_p_frame: bool,
    pub altref_sign_bias: bool,
    pub golden_sign_bias: bool,
    pub refresh_entropy_probs: bool,
    pub mb_no_coeff_skip: bool,
    pub token_partitions: u32,
    pub mode_ref_lf_delta_update: bool,
    pub mode_ref_lf_delta_enable: bool,
    pub loop_filter_level: u32,
    pub loop_filter_simple: bool,
    pub sharpness_level: u32,
    pub last_loop_filter_simple: bool,
    pub segmentation_enable: bool,
    pub segment_abs_delta: bool,
    pub update_segmentation_map: bool,
    pub full_pixel: bool,
    pub filter_type: u32,
    pub color_space: bool,
}

impl PpsFields {
    pub const fn value(&self) -> u32 {
        flag(self.p_frame, 1 << 31)
            | field(self.last_sharpness_level, 30, 28)
            | flag(self.last_p_frame, 1 << 27)
            | flag(self.altref_sign_bias, 1 << 26)
            | flag(self.golden_sign_bias, 1 << 25)
            | flag(self.refresh_entropy_probs, 1 << 24)
            | flag(self.mb_no_coeff_skip, 1 << 23)
            | field(self.token_partitions, 22, 21)
            | flag(self.mode_ref_lf_delta_update, 1 << 20)
            | flag(self.mode_ref_lf_delta_enable, 1 << 19)
            | field(self.loop_filter_level, 18, 13)
            | flag(self.loop_filter_simple, 1 << 12)
            | field(self.sharpness_level, 11, 9)
            | flag(self.last_loop_filter_simple, 1 << 8)
            | flag(self.segmentation_enable, 1 << 7)
            | flag(self.segment_abs_delta, 1 << 6)
            | flag(self.update_segmentation_map, 1 << 5)
            | flag(self.full_pixel, 1 << 3)
            | field(self.filter_type, 2, 1)
            | flag(self.color_space, 1 << 0)
    }
}

pub const QP_INDEX_DELTA: u32 = ENGINE_DEC_H264 + 0x18;

pub const fn qp_index_delta(uv_ac: i32, uv_dc: i32, y2_ac: i32, y2_dc: i32) -> u32 {
    field(uv_ac as u32, 19, 15)
        | field(uv_dc as u32, 14, 10)
        | field(y2_ac as u32, 9, 5)
        | field(y2_dc as u32, 4, 0)
}

pub const QP_INDEX: u32 = ENGINE_DEC_H264 + 0x1c;

pub const fn qp_index(y_dc_delta: i32, y_ac_qi: u32) -> u32 {
    field(y_dc_delta as u32, 12, 8) | field(y_ac_qi, 6, 0)
}

pub const PART_SIZE_OFFSET: u32 = ENGINE_DEC_H264 + 0x1c4;
pub const ENTROPY_PROBS_ADDR: u32 = ENGINE_DEC_H264 + 0x50;
pub const FIRST_DATA_PART_LEN: u32 = ENGINE_DEC_H264 + 0x54;
pub const FSIZE: u32 = ENGINE_DEC_H264 + 0x58;
pub const PICSIZE: u32 = ENGINE_DEC_H264 + 0x5c;

pub const fn frame_size(width: u32, height: u32) -> u32 {
    field(width, 31, 16) | field(height, 15, 0)
}

pub const REC_LUMA: u32 = ENGINE_DEC_H264 + 0xac;
pub const FWD_LUMA: u32 = ENGINE_DEC_H264 + 0xb0;
pub const BWD_LUMA: u32 = ENGINE_DEC_H264 + 0xb4;
pub const REC_CHROMA: u32 = ENGINE_DEC_H264 + 0xb8;
pub const FWD_CHROMA: u32 = ENGINE_DEC_H264 + 0xbc;
pub const BWD_CHROMA: u32 = ENGINE_DEC_H264 + 0xc0;
pub const ALT_LUMA: u32 = ENGINE_DEC_H264 + 0xc4;
pub const ALT_CHROMA: u32 = ENGINE_DEC_H264 + 0xc8;

pub const SEGMENT_FEAT_MB_LV0: u32 = ENGINE_DEC_H264 + 0xcc;
pub const SEGMENT_FEAT_MB_LV1: u32 = ENGINE_DEC_H264 + 0xd0;
pub const REF_LF_DELTA: u32 = ENGINE_DEC_H264 + 0xe8;
pub const MODE_LF_DELTA: u32 = ENGINE_DEC_H264 + 0xec;

/// Packs four signed 7-bit deltas, first element in the low byte.
pub const fn lf_deltas(deltas: [i8; 4]) -> u32 {
    field(deltas[0] as u32, 6, 0)
        | field(deltas[1] as u32, 14, 8)
        | field(deltas[2] as u32, 22, 16)
        | field(deltas[3] as u32, 30, 24)
}

/// Selects the VP8 mode of the H.264 block control register.
pub const CTRL_VP8: u32 = 1 << 29;

pub const TRIGGER_TYPE_VP8_SLICE_DECODE: u32 = 10;
pub const TRIGGER_TYPE_VP8_UPDATE_COEF: u32 = 14;
pub const TRIGGER_TYPE_VP8_GET_BITS: u32 = 15;

/// Probability of a boolean decoder read.
pub const fn trigger_type_probability(probability: u32) -> u32 {
    field(probability, 31, 24)
}

/// Number of bits of a boolean decoder read, 8 at most.
pub const fn trigger_type_bin_lens(bits: u32) -> u32 {
    field(bits - 1, 18, 16)
}

pub const STATUS_VP8_UPPROB_BUSY: u32 = 1 << 17;

/// Layout of the entropy probability buffer handed to the hardware.
pub const ENTROPY_PROBS_SIZE: usize = 0x2400;
pub const ENTROPY_PROBS_HEADER: usize = 0x000;
pub const ENTROPY_PROBS_Y_MODE: usize = 0x008;
pub const ENTROPY_PROBS_UV_MODE: usize = 0x010;
pub const ENTROPY_PROBS_MV: usize = 0x018;
pub const ENTROPY_PROBS_COEFF: usize = 0x400;
/// Each 11-byte coefficient probability set is padded to this stride.
pub const ENTROPY_PROBS_COEFF_STRIDE: usize = 12;
