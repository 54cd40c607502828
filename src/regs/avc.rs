// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! H.264 encoding block.

use super::field;
use super::ENGINE_ENC_AVC;

pub const PARA0: u32 = ENGINE_ENC_AVC + 0x04;
pub const PARA0_EPTB_DIS: u32 = 1 << 31;
pub const PARA0_ENTROPY_CODING_CAVLC: u32 = 0 << 8;
pub const PARA0_ENTROPY_CODING_CABAC: u32 = 1 << 8;
pub const PARA0_REF_PIC_TYPE_FRAME: u32 = 0 << 6;
pub const PARA0_PIC_TYPE_FRAME: u32 = 0 << 5;
pub const PARA0_SLICE_TYPE_I: u32 = 0 << 4;
pub const PARA0_SLICE_TYPE_P: u32 = 1 << 4;

pub const fn para0_frame_num(frame_num: u32) -> u32 {
    field(frame_num, 29, 24)
}

pub const fn para0_beta_offset_div2(beta: i32) -> u32 {
    field(beta as u32, 23, 20)
}

pub const fn para0_alpha_offset_div2(alpha: i32) -> u32 {
    field(alpha as u32, 19, 16)
}

pub const fn para0_fix_mode_num(cabac_init_idc: u32) -> u32 {
    field(cabac_init_idc, 13, 12)
}

pub const PARA1: u32 = ENGINE_ENC_AVC + 0x08;
pub const PARA1_RC_MODE_FIXED: u32 = 0 << 14;

pub const fn para1_qp_chroma_offset0(offset: i32) -> u32 {
    field(offset as u32, 20, 16)
}

pub const fn para1_stride_mbs_div_48(value: u32) -> u32 {
    field(value, 31, 24)
}

pub const fn para1_fixed_qp(qp: u32) -> u32 {
    field(qp, 13, 8) | field(qp, 5, 0)
}

pub const PARA2: u32 = ENGINE_ENC_AVC + 0x0c;

pub const ME_PARA: u32 = ENGINE_ENC_AVC + 0x10;
pub const ME_PARA_WB_MV_INFO_DIS: u32 = 1 << 8;

pub const fn me_para_fme_search_level(level: u32) -> u32 {
    field(level, 2, 0)
}

pub const INT_EN: u32 = ENGINE_ENC_AVC + 0x14;
pub const INT_EN_FINISH: u32 = 1 << 0;
pub const INT_EN_STALL: u32 = 1 << 1;

pub const STARTTRIG: u32 = ENGINE_ENC_AVC + 0x18;
pub const STARTTRIG_ENCODE_MODE_H264: u32 = 0 << 4;
pub const STARTTRIG_TYPE_PUT_BITS: u32 = 1;
pub const STARTTRIG_TYPE_ENC_START: u32 = 8;

pub const fn starttrig_num_bits(count: u32) -> u32 {
    (count & 0x3f) << 8
}

pub const STATUS: u32 = ENGINE_ENC_AVC + 0x1c;
pub const STATUS_FINISH: u32 = 1 << 0;
pub const STATUS_MASK: u32 = (1 << 0) | (1 << 1) | (1 << 2);
pub const STATUS_PUT_BITS_READY: u32 = 1 << 9;

pub const PUTBITSDATA: u32 = ENGINE_ENC_AVC + 0x20;
pub const CYCLIC_INTRA_REFRESH: u32 = ENGINE_ENC_AVC + 0x34;
pub const ME_INFO: u32 = ENGINE_ENC_AVC + 0x38;
pub const MAD: u32 = ENGINE_ENC_AVC + 0x40;
pub const OVERTIME_MB: u32 = ENGINE_ENC_AVC + 0x44;
pub const RC_INIT: u32 = ENGINE_ENC_AVC + 0x48;
pub const RC_MAD_TH0: u32 = ENGINE_ENC_AVC + 0x50;
pub const RC_MAD_TH1: u32 = ENGINE_ENC_AVC + 0x54;
pub const RC_MAD_TH2: u32 = ENGINE_ENC_AVC + 0x58;
pub const RC_MAD_TH3: u32 = ENGINE_ENC_AVC + 0x5c;
pub const DYNAMIC_ME_PAR0: u32 = ENGINE_ENC_AVC + 0x60;
pub const DYNAMIC_ME_PAR1: u32 = ENGINE_ENC_AVC + 0x64;

pub const STM_START_ADDR: u32 = ENGINE_ENC_AVC + 0x80;
pub const STM_END_ADDR: u32 = ENGINE_ENC_AVC + 0x84;
pub const STM_BIT_OFFSET: u32 = ENGINE_ENC_AVC + 0x88;
pub const STM_BIT_MAX: u32 = ENGINE_ENC_AVC + 0x8c;
pub const STM_BIT_LEN: u32 = ENGINE_ENC_AVC + 0x90;
pub const HEADER_BITS: u32 = ENGINE_ENC_AVC + 0x94;
pub const RESIDUAL_BITS: u32 = ENGINE_ENC_AVC + 0x98;

pub const REF0_ADDR_Y: u32 = ENGINE_ENC_AVC + 0xa0;
pub const REF0_ADDR_C: u32 = ENGINE_ENC_AVC + 0xa4;
pub const REC_ADDR_Y: u32 = ENGINE_ENC_AVC + 0xb0;
pub const REC_ADDR_C: u32 = ENGINE_ENC_AVC + 0xb4;
pub const SUBPIX_ADDR_LAST: u32 = ENGINE_ENC_AVC + 0xb8;
pub const SUBPIX_ADDR_NEW: u32 = ENGINE_ENC_AVC + 0xbc;
pub const MB_INFO_ADDR: u32 = ENGINE_ENC_AVC + 0xc0;
pub const DEBLK_ADDR: u32 = ENGINE_ENC_AVC + 0xc4;
pub const MV_BUF_ADDR: u32 = ENGINE_ENC_AVC + 0xc8;
