// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Input stage of the encoder, fetching the source picture.

use super::field;
use super::ENGINE_ISP;

pub const PIC_INFO: u32 = ENGINE_ISP + 0x00;

pub const fn pic_info(width_mbs: u32, height_mbs: u32) -> u32 {
    field(width_mbs, 26, 16) | field(height_mbs, 10, 0)
}

pub const PIC_STRIDE0: u32 = ENGINE_ISP + 0x04;

pub const fn pic_stride0_input_stride_mbs(stride_mbs: u32) -> u32 {
    field(stride_mbs, 26, 16)
}

pub const CTRL: u32 = ENGINE_ISP + 0x08;
pub const CTRL_FORMAT_YUV420SP: u32 = 0 << 29;
pub const CTRL_ROTATION_0: u32 = 0 << 24;
pub const CTRL_COLORSPACE_BT601: u32 = 0 << 20;

pub const SCALER_SIZE: u32 = ENGINE_ISP + 0x0c;

pub const fn scaler_size(width_mbs: u32, height_mbs: u32) -> u32 {
    field(width_mbs, 26, 16) | field(height_mbs, 10, 0)
}

pub const INPUT_LUMA_ADDR: u32 = ENGINE_ISP + 0x78;
pub const INPUT_CHROMA0_ADDR: u32 = ENGINE_ISP + 0x7c;
