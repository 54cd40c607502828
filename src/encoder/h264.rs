// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! H.264 encoding.
//!
//! Each job encodes one picture as a single slice, referencing the reconstruction of the previous
//! picture for P frames. The engine codes the slice data on its own, while the parameter sets and
//! the slice header are emitted by the driver into the output stream, one syntax element at a
//! time, through the put-bits interface of the encoding block.

use anyhow::anyhow;

use crate::align_down;
use crate::align_up;
use crate::controls::ControlConfig;
use crate::controls::ControlId;
use crate::controls::ControlStore;
use crate::controls::ControlValue;
use crate::device::Capabilities;
use crate::device::Registers;
use crate::div_round_up;
use crate::dma::DmaAllocator;
use crate::dma::DmaBuffer;
use crate::encoder;
use crate::engine::Codec;
use crate::engine::Engine;
use crate::engine::EngineBuffer;
use crate::engine::EngineError;
use crate::engine::EngineResult;
use crate::engine::EngineSession;
use crate::engine::FrameSizeRange;
use crate::engine::IrqStatus;
use crate::engine::JobContext;
use crate::engine::PictureDma;
use crate::engine::Role;
use crate::engine::SetupContext;
use crate::fourcc;
use crate::proc::Format;
use crate::proc::Formats;
use crate::queue::flags;
use crate::queue::Buffer;
use crate::queue::BufferState;
use crate::regs;
use crate::regs::avc;
use crate::Fourcc;

/// V4L2 menu values of the encoder controls.
pub const PROFILE_BASELINE: i32 = 0;
pub const PROFILE_CONSTRAINED_BASELINE: i32 = 1;
pub const PROFILE_MAIN: i32 = 2;
pub const PROFILE_EXTENDED: i32 = 3;
pub const PROFILE_HIGH: i32 = 4;
pub const PROFILE_HIGH_10: i32 = 5;
pub const PROFILE_HIGH_422: i32 = 6;
pub const PROFILE_HIGH_444_PREDICTIVE: i32 = 7;
pub const PROFILE_HIGH_10_INTRA: i32 = 8;
pub const PROFILE_HIGH_422_INTRA: i32 = 9;
pub const PROFILE_HIGH_444_INTRA: i32 = 10;
pub const PROFILE_CAVLC_444_INTRA: i32 = 11;
pub const PROFILE_SCALABLE_BASELINE: i32 = 12;
pub const PROFILE_SCALABLE_HIGH: i32 = 13;
pub const PROFILE_SCALABLE_HIGH_INTRA: i32 = 14;
pub const PROFILE_STEREO_HIGH: i32 = 15;
pub const PROFILE_MULTIVIEW_HIGH: i32 = 16;
pub const PROFILE_CONSTRAINED_HIGH: i32 = 17;

pub const LEVEL_1_0: i32 = 0;
pub const LEVEL_3_1: i32 = 9;
pub const LEVEL_6_2: i32 = 19;

pub const ENTROPY_MODE_CAVLC: i32 = 0;
pub const ENTROPY_MODE_CABAC: i32 = 1;

pub const LOOP_FILTER_MODE_ENABLED: i32 = 0;
pub const LOOP_FILTER_MODE_DISABLED: i32 = 1;
pub const LOOP_FILTER_MODE_DISABLED_AT_SLICE_BOUNDARY: i32 = 2;

pub const VUI_SAR_IDC_UNSPECIFIED: i32 = 0;
pub const VUI_SAR_IDC_EXTENDED: i32 = 17;

pub const HEADER_MODE_JOINED_WITH_1ST_FRAME: i32 = 1;
pub const MULTI_SLICE_MODE_SINGLE: i32 = 0;

/// level_idc of each level menu entry.
const LEVEL_IDC: [u8; 20] =
    [10, 9, 11, 12, 13, 20, 21, 22, 30, 31, 32, 40, 41, 42, 50, 51, 52, 60, 61, 62];

/// Profiles carrying the chroma format and bit depths in their SPS.
const HIGH_PROFILE_IDCS: [u8; 13] = [100, 110, 122, 244, 44, 83, 86, 118, 128, 138, 139, 134, 135];

const CONSTRAINT_SET0_FLAG: u8 = 1 << 7;
const CONSTRAINT_SET1_FLAG: u8 = 1 << 6;
const CONSTRAINT_SET3_FLAG: u8 = 1 << 4;
const CONSTRAINT_SET4_FLAG: u8 = 1 << 3;
const CONSTRAINT_SET5_FLAG: u8 = 1 << 2;

/// H.264 Table E-1.
const EXTENDED_SAR: u8 = 255;

const SEQ_PARAMETER_SET_ID: u32 = 0;
const PIC_PARAMETER_SET_ID: u32 = 0;
const LOG2_MAX_FRAME_NUM: u32 = 8;
const PIC_ORDER_CNT_TYPE: u32 = 0;
const LOG2_MAX_PIC_ORDER_CNT_LSB: u32 = 8;

/// Every picture is used as a reference.
const NAL_REF_IDC: u8 = 2;
const PARAMETER_SET_REF_IDC: u8 = 3;

const SLICE_TYPE_P: u32 = 0;
const SLICE_TYPE_I: u32 = 2;

const MB_INFO_BUF_UNIT_SIZE: usize = 4096;
const REC_BUF_ALIGN: u32 = 4096;

const FRAME_SIZE: FrameSizeRange = FrameSizeRange {
    min_width: 16,
    max_width: 4096,
    step_width: 16,
    min_height: 16,
    max_height: 4096,
    step_height: 16,
};

const CONTROLS: &[ControlConfig] = &[
    ControlConfig::integer(ControlId::MinBuffersForOutput, 1, 32, 1),
    ControlConfig::integer(
        ControlId::HeaderMode,
        HEADER_MODE_JOINED_WITH_1ST_FRAME,
        HEADER_MODE_JOINED_WITH_1ST_FRAME,
        HEADER_MODE_JOINED_WITH_1ST_FRAME,
    ),
    ControlConfig::integer(
        ControlId::MultiSliceMode,
        MULTI_SLICE_MODE_SINGLE,
        MULTI_SLICE_MODE_SINGLE,
        MULTI_SLICE_MODE_SINGLE,
    ),
    ControlConfig::integer(ControlId::PrependSpsPpsToIdr, 0, 1, 0),
    ControlConfig::integer(ControlId::H264VuiSarEnable, 0, 1, 0),
    ControlConfig::integer(
        ControlId::H264VuiSarIdc,
        VUI_SAR_IDC_UNSPECIFIED,
        VUI_SAR_IDC_EXTENDED,
        VUI_SAR_IDC_UNSPECIFIED,
    ),
    ControlConfig::integer(ControlId::H264VuiExtSarWidth, 1, u16::MAX as i32, 1),
    ControlConfig::integer(ControlId::H264VuiExtSarHeight, 1, u16::MAX as i32, 1),
    ControlConfig::integer(ControlId::H264Profile, PROFILE_BASELINE, PROFILE_HIGH, PROFILE_MAIN),
    ControlConfig::integer(ControlId::H264Level, LEVEL_1_0, LEVEL_6_2, LEVEL_3_1),
    ControlConfig::integer(
        ControlId::H264EntropyMode,
        ENTROPY_MODE_CAVLC,
        ENTROPY_MODE_CABAC,
        ENTROPY_MODE_CAVLC,
    ),
    ControlConfig::integer(ControlId::H264ChromaQpIndexOffset, 0, 7, 4),
    ControlConfig::integer(
        ControlId::H264LoopFilterMode,
        LOOP_FILTER_MODE_ENABLED,
        LOOP_FILTER_MODE_DISABLED_AT_SLICE_BOUNDARY,
        LOOP_FILTER_MODE_ENABLED,
    ),
    ControlConfig::integer(ControlId::H264LoopFilterAlpha, -6, 6, 0),
    ControlConfig::integer(ControlId::H264LoopFilterBeta, -6, 6, 0),
    ControlConfig::integer(ControlId::H264MinQp, 0, 51, 10),
    ControlConfig::integer(ControlId::H264MaxQp, 0, 51, 40),
    ControlConfig::integer(ControlId::H264IFrameQp, 0, 51, 26),
    ControlConfig::integer(ControlId::H264PFrameQp, 0, 51, 28),
    ControlConfig::integer(ControlId::GopClosure, 0, 1, 1),
    ControlConfig::integer(ControlId::GopSize, 1, u16::MAX as i32, 12),
    ControlConfig::integer(ControlId::H264IPeriod, 1, u16::MAX as i32, 12),
    ControlConfig::button(ControlId::ForceKeyFrame),
];

fn profile_idc(profile: i32) -> u8 {
    match profile {
        PROFILE_BASELINE | PROFILE_CONSTRAINED_BASELINE => 66,
        PROFILE_MAIN => 77,
        PROFILE_EXTENDED => 88,
        PROFILE_HIGH | PROFILE_CONSTRAINED_HIGH => 100,
        PROFILE_HIGH_10 | PROFILE_HIGH_10_INTRA => 110,
        PROFILE_HIGH_422 | PROFILE_HIGH_422_INTRA => 122,
        PROFILE_HIGH_444_PREDICTIVE | PROFILE_HIGH_444_INTRA => 244,
        PROFILE_CAVLC_444_INTRA => 44,
        PROFILE_SCALABLE_BASELINE => 83,
        PROFILE_SCALABLE_HIGH | PROFILE_SCALABLE_HIGH_INTRA => 86,
        PROFILE_STEREO_HIGH => 128,
        PROFILE_MULTIVIEW_HIGH => 118,
        _ => 0,
    }
}

/// Whether CABAC entropy coding is allowed with `profile`.
pub fn profile_supports_cabac(profile: i32) -> bool {
    !matches!(
        profile,
        PROFILE_BASELINE | PROFILE_CONSTRAINED_BASELINE | PROFILE_EXTENDED | PROFILE_CAVLC_444_INTRA
    )
}

fn level_idc(level: i32) -> u8 {
    usize::try_from(level).ok().and_then(|level| LEVEL_IDC.get(level)).copied().unwrap_or(0)
}

fn constraint_set_flags(profile: i32) -> u8 {
    match profile {
        PROFILE_BASELINE => CONSTRAINT_SET0_FLAG,
        PROFILE_CONSTRAINED_BASELINE => CONSTRAINT_SET0_FLAG | CONSTRAINT_SET1_FLAG,
        PROFILE_MAIN => CONSTRAINT_SET1_FLAG,
        PROFILE_CONSTRAINED_HIGH => CONSTRAINT_SET4_FLAG | CONSTRAINT_SET5_FLAG,
        PROFILE_HIGH_10_INTRA
        | PROFILE_HIGH_422_INTRA
        | PROFILE_HIGH_444_INTRA
        | PROFILE_CAVLC_444_INTRA
        | PROFILE_SCALABLE_HIGH_INTRA => CONSTRAINT_SET3_FLAG,
        _ => 0,
    }
}

/// aspect_ratio_idc of a SAR menu entry. The fixed ratios share their numbering with Table E-1.
fn vui_sar_idc(value: i32) -> u8 {
    match value {
        1..=16 => value as u8,
        VUI_SAR_IDC_EXTENDED => EXTENDED_SAR,
        _ => 0,
    }
}

fn disable_deblocking_filter_idc(mode: i32) -> u32 {
    match mode {
        LOOP_FILTER_MODE_DISABLED => 1,
        LOOP_FILTER_MODE_DISABLED_AT_SLICE_BOUNDARY => 2,
        _ => 0,
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u8)]
enum NaluType {
    Slice = 1,
    SliceIdr = 5,
    Sps = 7,
    Pps = 8,
}

/// Writes syntax elements into the output stream through the put-bits interface.
///
/// The stream must start empty, so that the writer can keep track of the byte alignment.
pub struct HeaderWriter<'a> {
    regs: &'a Registers,
    bits: u32,
}

impl<'a> HeaderWriter<'a> {
    pub fn new(regs: &'a Registers) -> Self {
        Self { regs, bits: 0 }
    }

    /// Number of bits written so far.
    pub fn bits(&self) -> u32 {
        self.bits
    }

    pub fn aligned(&self) -> bool {
        self.bits % 8 == 0
    }

    fn put_bits(&mut self, bits: u32, value: u32) -> EngineResult<()> {
        self.regs.poll(avc::STATUS, avc::STATUS_PUT_BITS_READY)?;
        self.regs.write(avc::PUTBITSDATA, value);
        self.regs.write(
            avc::STARTTRIG,
            avc::starttrig_num_bits(bits) | avc::STARTTRIG_TYPE_PUT_BITS,
        );
        self.bits += bits;

        Ok(())
    }

    /// Writes the `bits` low bits of `value`, most significant first. Anything above the 32
    /// low bits is written as zeros.
    pub fn write_f(&mut self, bits: u32, value: u32) -> EngineResult<()> {
        let mut remaining = bits;

        // A single transfer carries 32 bits at most.
        while remaining > 32 {
            let zeros = (remaining - 32).min(32);
            self.put_bits(zeros, 0)?;
            remaining -= zeros;
        }

        if remaining > 0 {
            self.put_bits(remaining, value)?;
        }

        Ok(())
    }

    pub fn write_bit(&mut self, value: bool) -> EngineResult<()> {
        self.write_f(1, u32::from(value))
    }

    pub fn write_u8(&mut self, value: u8) -> EngineResult<()> {
        self.write_f(8, u32::from(value))
    }

    pub fn write_u16(&mut self, value: u16) -> EngineResult<()> {
        self.write_f(16, u32::from(value))
    }

    /// Writes `value` one byte at a time, most significant first.
    pub fn write_u32(&mut self, value: u32) -> EngineResult<()> {
        for byte in value.to_be_bytes() {
            self.write_u8(byte)?;
        }

        Ok(())
    }

    /// Writes an unsigned Exp-Golomb code, `ue(v)`.
    pub fn write_ue(&mut self, value: u32) -> EngineResult<()> {
        let value = value
            .checked_add(1)
            .ok_or_else(|| EngineError::Range(format!("{} cannot be Exp-Golomb coded", value)))?;
        let bits = u32::BITS - value.leading_zeros();

        self.write_f(2 * bits - 1, value)
    }

    /// Writes a signed Exp-Golomb code, `se(v)`.
    pub fn write_se(&mut self, value: i32) -> EngineResult<()> {
        let abs_value = value.unsigned_abs();

        if value > 0 {
            self.write_ue(2 * abs_value - 1)
        } else {
            let mapped = abs_value.checked_mul(2).ok_or_else(|| {
                EngineError::Range(format!("{} cannot be Exp-Golomb coded", value))
            })?;
            self.write_ue(mapped)
        }
    }

    /// Writes an Annex B start code followed by a NAL unit header.
    fn write_nalu_start(&mut self, ref_idc: u8, nalu_type: NaluType) -> EngineResult<()> {
        self.write_u32(0x0000_0001)?;
        self.write_u8(((ref_idc << 5) & 0x60) | (nalu_type as u8 & 0x1f))
    }

    /// Writes the stop bit, then pads to the next byte boundary.
    pub fn rbsp_trailing_bits(&mut self) -> EngineResult<()> {
        self.write_bit(true)?;

        if !self.aligned() {
            self.write_f(8 - self.bits % 8, 0)?;
        }

        Ok(())
    }
}

/// Toggles the insertion of emulation prevention bytes in the output stream.
fn set_emulation_prevention(regs: &Registers, enable: bool) {
    let value = regs.read(avc::PARA0);
    let value = if enable { value & !avc::PARA0_EPTB_DIS } else { value | avc::PARA0_EPTB_DIS };

    regs.write(avc::PARA0, value);
}

/// Size of the subpixel buffer of a picture.
pub fn subpix_buf_size(width_mbs: u32, height_mbs: u32) -> usize {
    let width = align_down((width_mbs + 47) * 2 / 3, 32) + align_up(width_mbs, 32) * 2;
    let height = (height_mbs * 16 + 72) / 8;

    (width * height) as usize
}

/// Luma and total sizes of the reconstruction buffer of a picture.
pub fn rec_buf_sizes(width_mbs: u32, height_mbs: u32) -> (u32, usize) {
    let width = align_up(width_mbs, 2) * 16;
    let luma = width * align_up(height_mbs + 1, 4) * 16;
    let chroma = width * align_up(div_round_up(height_mbs, 2), 4) * 16;

    (luma, align_up(luma + chroma, REC_BUF_ALIGN) as usize)
}

pub fn mb_info_buf_size(width_mbs: u32) -> usize {
    div_round_up(width_mbs, 32) as usize * MB_INFO_BUF_UNIT_SIZE
}

/// Encoder data of a source picture buffer.
pub struct H264EncBuffer {
    /// Reconstructed picture, the reference of the next picture.
    rec: Box<dyn DmaBuffer>,
    rec_luma_size: u32,
    subpix: Box<dyn DmaBuffer>,
}

impl H264EncBuffer {
    fn new(allocator: &dyn DmaAllocator, picture: &Format) -> EngineResult<Self> {
        let width_mbs = div_round_up(picture.width, 16);
        let height_mbs = div_round_up(picture.height, 16);
        let (rec_luma_size, rec_size) = rec_buf_sizes(width_mbs, height_mbs);

        Ok(Self {
            subpix: allocator.allocate(subpix_buf_size(width_mbs, height_mbs))?,
            rec: allocator.allocate(rec_size)?,
            rec_luma_size,
        })
    }

    fn rec_dma(&self) -> PictureDma {
        let luma = self.rec.bus_address();

        PictureDma { luma, chroma: luma.wrapping_add(self.rec_luma_size) }
    }

    fn subpix_dma(&self) -> u32 {
        self.subpix.bus_address()
    }
}

fn h264_enc_buffer(buffer: &Buffer) -> EngineResult<&H264EncBuffer> {
    match buffer.engine_buffer() {
        Some(EngineBuffer::H264Enc(data)) => Ok(data),
        _ => Err(anyhow!("picture buffer {} has no encoder data", buffer.index()).into()),
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum FrameType {
    Idr,
    I,
    P,
}

impl FrameType {
    fn is_intra(self) -> bool {
        matches!(self, FrameType::Idr | FrameType::I)
    }

    fn slice_type(self) -> u32 {
        if self.is_intra() {
            SLICE_TYPE_I
        } else {
            SLICE_TYPE_P
        }
    }
}

/// The next header to emit into the stream. Parameter sets are only emitted again once a
/// control they depend on changes.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
enum HeaderStep {
    Start,
    Sps,
    Pps,
    Slice,
}

/// The encoder controls, as sampled at the start of a job.
#[derive(Clone, Debug, PartialEq, Eq)]
struct Tunables {
    prepend_sps_pps_to_idr: bool,
    vui_sar_enable: bool,
    vui_sar_idc: i32,
    vui_ext_sar_width: u16,
    vui_ext_sar_height: u16,
    profile: i32,
    level: i32,
    entropy_mode: i32,
    chroma_qp_index_offset: i32,
    loop_filter_mode: i32,
    loop_filter_alpha: i32,
    loop_filter_beta: i32,
    qp_min: u32,
    qp_max: u32,
    qp_i: u32,
    qp_p: u32,
    gop_closure: bool,
    gop_size: u32,
    i_period: u32,
}

impl Tunables {
    fn sample(controls: &ControlStore) -> Self {
        let value = |id| controls.ctrl_value(id);
        let unsigned = |id| u32::try_from(controls.ctrl_value(id)).unwrap_or(0);
        let short = |id| u16::try_from(controls.ctrl_value(id)).unwrap_or(1);

        Self {
            prepend_sps_pps_to_idr: value(ControlId::PrependSpsPpsToIdr) != 0,
            vui_sar_enable: value(ControlId::H264VuiSarEnable) != 0,
            vui_sar_idc: value(ControlId::H264VuiSarIdc),
            vui_ext_sar_width: short(ControlId::H264VuiExtSarWidth),
            vui_ext_sar_height: short(ControlId::H264VuiExtSarHeight),
            profile: value(ControlId::H264Profile),
            level: value(ControlId::H264Level),
            entropy_mode: value(ControlId::H264EntropyMode),
            chroma_qp_index_offset: value(ControlId::H264ChromaQpIndexOffset),
            loop_filter_mode: value(ControlId::H264LoopFilterMode),
            loop_filter_alpha: value(ControlId::H264LoopFilterAlpha),
            loop_filter_beta: value(ControlId::H264LoopFilterBeta),
            qp_min: unsigned(ControlId::H264MinQp),
            qp_max: unsigned(ControlId::H264MaxQp),
            qp_i: unsigned(ControlId::H264IFrameQp),
            qp_p: unsigned(ControlId::H264PFrameQp),
            gop_closure: value(ControlId::GopClosure) != 0,
            gop_size: unsigned(ControlId::GopSize).max(1),
            i_period: unsigned(ControlId::H264IPeriod),
        }
    }
}

/// Parameters of the picture being encoded.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
struct FrameJob {
    frame_type: FrameType,
    frame_num: u32,
    pic_order_cnt_lsb: u32,
    idr_pic_id: u32,
    profile_idc: u8,
    constraint_set_flags: u8,
    level_idc: u8,
    entropy_coding_mode_flag: bool,
    cabac_init_idc: u32,
    chroma_qp_index_offset: i32,
    disable_deblocking_filter_idc: u32,
    slice_alpha_c0_offset_div2: i32,
    slice_beta_offset_div2: i32,
    qp: u32,
    /// aspect_ratio_idc and the extended ratio, if the ratio is signalled.
    vui_sar: Option<(u8, u16, u16)>,
}

/// Stream state carried from one picture to the next.
#[derive(Clone, Debug, PartialEq, Eq)]
struct StreamState {
    step: HeaderStep,
    gop_index: u32,
    frame_num: u32,
    pic_order_cnt_lsb: u32,
    /// Initial QP signalled by the current PPS.
    qp_init: u32,
}

impl Default for StreamState {
    fn default() -> Self {
        Self {
            step: HeaderStep::Start,
            gop_index: 0,
            frame_num: 0,
            pic_order_cnt_lsb: 0,
            qp_init: 0,
        }
    }
}

impl StreamState {
    /// Decides the type and numbering of the next picture and advances the stream state.
    fn next_frame(&mut self, tunables: &Tunables, force_key_frame: bool) -> FrameJob {
        let mut frame_type = if self.gop_index == 0 {
            FrameType::Idr
        } else if !tunables.gop_closure
            && tunables.i_period > 0
            && self.gop_index % tunables.i_period == 0
        {
            FrameType::I
        } else {
            FrameType::P
        };

        if force_key_frame {
            frame_type = FrameType::Idr;
        }

        self.gop_index = self.gop_index.wrapping_add(1);
        if tunables.gop_closure {
            self.gop_index %= tunables.gop_size;
        }

        if frame_type == FrameType::Idr {
            self.frame_num = 0;
            self.pic_order_cnt_lsb = 0;

            if tunables.prepend_sps_pps_to_idr {
                self.step = HeaderStep::Sps;
            }
        }

        let frame_num = self.frame_num;
        self.frame_num = (self.frame_num + 1) % (1 << LOG2_MAX_FRAME_NUM);

        let pic_order_cnt_lsb = self.pic_order_cnt_lsb;
        self.pic_order_cnt_lsb = (self.pic_order_cnt_lsb + 2) % (1 << LOG2_MAX_PIC_ORDER_CNT_LSB);

        // A CABAC request that predates a profile change is not honored.
        let cabac = tunables.entropy_mode == ENTROPY_MODE_CABAC
            && profile_supports_cabac(tunables.profile);

        let disable_deblocking_filter_idc =
            disable_deblocking_filter_idc(tunables.loop_filter_mode);
        let (alpha, beta) = if disable_deblocking_filter_idc != 1 {
            (tunables.loop_filter_alpha, tunables.loop_filter_beta)
        } else {
            (0, 0)
        };

        let mut qp = if frame_type.is_intra() { tunables.qp_i } else { tunables.qp_p };
        if qp > tunables.qp_max {
            qp = tunables.qp_max;
        } else if qp < tunables.qp_min {
            qp = tunables.qp_min;
        }

        // Each new PPS signals the QP of its first picture.
        if self.step < HeaderStep::Slice {
            self.qp_init = qp;
        }

        let vui_sar = tunables.vui_sar_enable.then(|| {
            (
                vui_sar_idc(tunables.vui_sar_idc),
                tunables.vui_ext_sar_width,
                tunables.vui_ext_sar_height,
            )
        });

        FrameJob {
            frame_type,
            frame_num,
            pic_order_cnt_lsb,
            idr_pic_id: 0,
            profile_idc: profile_idc(tunables.profile),
            constraint_set_flags: constraint_set_flags(tunables.profile),
            level_idc: level_idc(tunables.level),
            entropy_coding_mode_flag: cabac,
            cabac_init_idc: u32::from(cabac && !frame_type.is_intra()),
            chroma_qp_index_offset: tunables.chroma_qp_index_offset,
            disable_deblocking_filter_idc,
            slice_alpha_c0_offset_div2: alpha,
            slice_beta_offset_div2: beta,
            qp,
            vui_sar,
        }
    }
}

fn write_sps(writer: &mut HeaderWriter, formats: &Formats, job: &FrameJob) -> EngineResult<()> {
    let picture = &formats.picture;
    let selection = &formats.selection;
    let timeperframe = &formats.timeperframe_coded;
    let width_mbs = div_round_up(picture.width, 16);
    let height_mbs = div_round_up(picture.height, 16);

    writer.write_nalu_start(PARAMETER_SET_REF_IDC, NaluType::Sps)?;
    writer.write_u8(job.profile_idc)?;
    writer.write_u8(job.constraint_set_flags)?;
    writer.write_u8(job.level_idc)?;
    writer.write_ue(SEQ_PARAMETER_SET_ID)?;

    if HIGH_PROFILE_IDCS.contains(&job.profile_idc) {
        // 8-bit 4:2:0 without scaling matrices.
        writer.write_ue(1)?;
        writer.write_ue(0)?;
        writer.write_ue(0)?;
        writer.write_bit(false)?;
        writer.write_bit(false)?;
    }

    writer.write_ue(LOG2_MAX_FRAME_NUM - 4)?;
    writer.write_ue(PIC_ORDER_CNT_TYPE)?;
    writer.write_ue(LOG2_MAX_PIC_ORDER_CNT_LSB - 4)?;
    // max_num_ref_frames
    writer.write_ue(1)?;
    // gaps_in_frame_num_value_allowed_flag
    writer.write_bit(false)?;
    writer.write_ue(width_mbs - 1)?;
    writer.write_ue(height_mbs - 1)?;
    // frame_mbs_only_flag
    writer.write_bit(true)?;
    // direct_8x8_inference_flag
    writer.write_bit(false)?;

    if selection.width != picture.width || selection.height != picture.height {
        let right = picture.width.saturating_sub(selection.width + selection.left);
        let bottom = picture.height.saturating_sub(selection.height + selection.top);

        writer.write_bit(true)?;
        writer.write_ue(selection.left / 2)?;
        writer.write_ue(right / 2)?;
        writer.write_ue(selection.top / 2)?;
        writer.write_ue(bottom / 2)?;
    } else {
        writer.write_bit(false)?;
    }

    // vui_parameters_present_flag
    writer.write_bit(true)?;

    match job.vui_sar {
        Some((idc, width, height)) => {
            writer.write_bit(true)?;
            writer.write_u8(idc)?;
            if idc == EXTENDED_SAR {
                writer.write_u16(width)?;
                writer.write_u16(height)?;
            }
        }
        None => writer.write_bit(false)?,
    }

    // Overscan, video signal type and chroma location.
    writer.write_bit(false)?;
    writer.write_bit(false)?;
    writer.write_bit(false)?;

    // timing_info_present_flag
    writer.write_bit(true)?;
    writer.write_u32(timeperframe.numerator)?;
    writer.write_u32(timeperframe.denominator.saturating_mul(2))?;
    // fixed_frame_rate_flag
    writer.write_bit(true)?;

    // HRD parameters, pic_struct and bitstream restrictions.
    writer.write_bit(false)?;
    writer.write_bit(false)?;
    writer.write_bit(false)?;
    writer.write_bit(false)?;

    writer.rbsp_trailing_bits()
}

fn write_pps(writer: &mut HeaderWriter, job: &FrameJob, qp_init: u32) -> EngineResult<()> {
    let qp_init_minus26 = qp_init as i32 - 26;

    writer.write_nalu_start(PARAMETER_SET_REF_IDC, NaluType::Pps)?;
    writer.write_ue(PIC_PARAMETER_SET_ID)?;
    writer.write_ue(SEQ_PARAMETER_SET_ID)?;
    writer.write_bit(job.entropy_coding_mode_flag)?;
    // bottom_field_pic_order_in_frame_present_flag
    writer.write_bit(false)?;
    // num_slice_groups_minus1
    writer.write_ue(0)?;
    // num_ref_idx_l0_default_active_minus1 and num_ref_idx_l1_default_active_minus1
    writer.write_ue(0)?;
    writer.write_ue(0)?;
    // weighted_pred_flag
    writer.write_bit(false)?;
    // weighted_bipred_idc
    writer.write_f(2, 0)?;
    writer.write_se(qp_init_minus26)?;
    writer.write_se(qp_init_minus26)?;
    writer.write_se(job.chroma_qp_index_offset)?;
    // deblocking_filter_control_present_flag
    writer.write_bit(true)?;
    // constrained_intra_pred_flag
    writer.write_bit(false)?;
    // redundant_pic_cnt_present_flag
    writer.write_bit(false)?;

    writer.rbsp_trailing_bits()
}

/// Writes the slice header. The slice data that follows is produced by the engine.
fn write_slice_header(writer: &mut HeaderWriter, job: &FrameJob, qp_init: u32) -> EngineResult<()> {
    let (nalu_type, idr) = match job.frame_type {
        FrameType::Idr => (NaluType::SliceIdr, true),
        _ => (NaluType::Slice, false),
    };
    let slice_type = job.frame_type.slice_type();

    writer.write_nalu_start(NAL_REF_IDC, nalu_type)?;
    // first_mb_in_slice
    writer.write_ue(0)?;
    writer.write_ue(slice_type)?;
    writer.write_ue(PIC_PARAMETER_SET_ID)?;
    writer.write_f(LOG2_MAX_FRAME_NUM, job.frame_num)?;

    if idr {
        writer.write_ue(job.idr_pic_id)?;
    }

    writer.write_f(LOG2_MAX_PIC_ORDER_CNT_LSB, job.pic_order_cnt_lsb)?;

    if slice_type == SLICE_TYPE_P {
        // num_ref_idx_active_override_flag
        writer.write_bit(false)?;
        // ref_pic_list_modification_flag_l0
        writer.write_bit(false)?;
    }

    // Reference picture marking.
    if idr {
        // no_output_of_prior_pics_flag
        writer.write_bit(false)?;
        // long_term_reference_flag
        writer.write_bit(false)?;
    } else {
        // adaptive_ref_pic_marking_mode_flag
        writer.write_bit(false)?;
    }

    if slice_type != SLICE_TYPE_I && job.entropy_coding_mode_flag {
        writer.write_ue(job.cabac_init_idc)?;
    }

    writer.write_se(job.qp as i32 - qp_init as i32)?;
    writer.write_ue(job.disable_deblocking_filter_idc)?;

    if job.disable_deblocking_filter_idc != 1 {
        writer.write_se(job.slice_alpha_c0_offset_div2)?;
        writer.write_se(job.slice_beta_offset_div2)?;
    }

    Ok(())
}

pub struct H264Encoder;

impl Engine for H264Encoder {
    fn codec(&self) -> Codec {
        Codec::H264
    }

    fn role(&self) -> Role {
        Role::Encoder
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::H264_ENC
    }

    fn pixelformat(&self) -> Fourcc {
        fourcc::H264
    }

    fn frame_size(&self) -> Option<&'static FrameSizeRange> {
        Some(&FRAME_SIZE)
    }

    fn controls(&self) -> &'static [ControlConfig] {
        CONTROLS
    }

    fn ctrl_validate(&self, controls: &ControlStore, value: &ControlValue) -> EngineResult<()> {
        match value {
            ControlValue::Integer(ControlId::H264Profile, PROFILE_EXTENDED) => {
                Err(EngineError::Unsupported("H.264 extended profile".into()))
            }
            ControlValue::Integer(ControlId::H264EntropyMode, ENTROPY_MODE_CABAC) => {
                let profile = controls.ctrl_value(ControlId::H264Profile);
                if profile_supports_cabac(profile) {
                    Ok(())
                } else {
                    Err(EngineError::Unsupported(format!(
                        "CABAC entropy coding with profile {}",
                        profile
                    )))
                }
            }
            _ => Ok(()),
        }
    }

    fn format_prepare(&self, formats: &Formats, format: &mut Format) -> EngineResult<()> {
        encoder::format_coded_prepare(formats, format)
    }

    fn format_configure(&self, regs: &Registers, _formats: &Formats) -> EngineResult<()> {
        encoder::format_coded_configure(regs)
    }

    fn setup(&self, ctx: &SetupContext) -> EngineResult<Box<dyn EngineSession>> {
        let width_mbs = div_round_up(ctx.formats.picture.width, 16);
        let mb_info = ctx.allocator.allocate(mb_info_buf_size(width_mbs))?;

        Ok(Box::new(H264EncSession {
            mb_info,
            state: StreamState::default(),
            force_key_frame: false,
            job: None,
            rec_last: None,
            subpix_last: None,
        }))
    }

    fn buffer_setup(&self, ctx: &SetupContext, buffer: &mut Buffer) -> EngineResult<()> {
        let data = H264EncBuffer::new(ctx.allocator, &ctx.formats.picture)?;
        buffer.engine = Some(EngineBuffer::H264Enc(data));

        Ok(())
    }

    fn irq_status(&self, regs: &Registers) -> IrqStatus {
        let status = regs.read(avc::STATUS) & avc::STATUS_MASK;

        if status == 0 {
            IrqStatus::None
        } else if status & avc::STATUS_FINISH != 0 {
            IrqStatus::Success
        } else {
            IrqStatus::Error
        }
    }

    fn irq_clear(&self, regs: &Registers) {
        regs.write(avc::STATUS, avc::STATUS_MASK);
    }

    fn irq_disable(&self, regs: &Registers) {
        regs.write(avc::INT_EN, 0);
    }
}

struct H264EncSession {
    mb_info: Box<dyn DmaBuffer>,
    state: StreamState,
    /// Set until the next job starts with an IDR picture.
    force_key_frame: bool,
    job: Option<FrameJob>,
    /// Reconstruction of the previous picture.
    rec_last: Option<PictureDma>,
    subpix_last: Option<u32>,
}

impl H264EncSession {
    /// Makes sure the headers from `step` onwards get emitted again.
    fn restart_headers(&mut self, step: HeaderStep) {
        self.state.step = self.state.step.min(step);
    }

    fn write_headers(
        &mut self,
        regs: &Registers,
        formats: &Formats,
        job: &FrameJob,
    ) -> EngineResult<()> {
        set_emulation_prevention(regs, false);

        let mut writer = HeaderWriter::new(regs);
        loop {
            match self.state.step {
                HeaderStep::Start => self.state.step = HeaderStep::Sps,
                HeaderStep::Sps => {
                    write_sps(&mut writer, formats, job)?;
                    self.state.step = HeaderStep::Pps;
                }
                HeaderStep::Pps => {
                    write_pps(&mut writer, job, self.state.qp_init)?;
                    self.state.step = HeaderStep::Slice;
                }
                HeaderStep::Slice => {
                    write_slice_header(&mut writer, job, self.state.qp_init)?;
                    break;
                }
            }
        }

        set_emulation_prevention(regs, true);
        regs.poll(regs::RESET, regs::RESET_CACHE_SYNC_IDLE | regs::RESET_SYNC_IDLE)?;

        log::debug!("H.264 headers: {} bits", writer.bits());

        Ok(())
    }
}

impl EngineSession for H264EncSession {
    fn ctrl_prepare(&mut self, controls: &mut ControlStore, id: ControlId) -> EngineResult<()> {
        match id {
            ControlId::H264Profile => {
                if !profile_supports_cabac(controls.ctrl_value(ControlId::H264Profile)) {
                    controls.set_value(ControlId::H264EntropyMode, ENTROPY_MODE_CAVLC);
                }
                self.restart_headers(HeaderStep::Sps);
            }
            ControlId::H264Level => self.restart_headers(HeaderStep::Sps),
            ControlId::H264EntropyMode => self.restart_headers(HeaderStep::Pps),
            ControlId::ForceKeyFrame => self.force_key_frame = true,
            _ => (),
        }

        Ok(())
    }

    fn job_prepare(&mut self, ctx: &mut JobContext) -> EngineResult<()> {
        let tunables = Tunables::sample(ctx.controls);
        let force_key_frame = std::mem::take(&mut self.force_key_frame);

        self.job = Some(self.state.next_frame(&tunables, force_key_frame));

        Ok(())
    }

    fn job_configure(&mut self, ctx: &mut JobContext) -> EngineResult<()> {
        let job = self.job.ok_or_else(|| anyhow!("no picture prepared for encoding"))?;
        let regs = ctx.regs;

        regs.write(avc::STARTTRIG, 0);

        let coded = ctx.coded_buffer()?;
        let coded_address = coded.bus_address();
        let coded_size = u32::try_from(coded.len())
            .map_err(|_| EngineError::Range(format!("coded buffer of {} bytes", coded.len())))?;

        regs.write(avc::STM_BIT_OFFSET, 0);
        regs.write(avc::STM_START_ADDR, coded_address);
        regs.write(avc::STM_END_ADDR, coded_address.wrapping_add(coded_size).wrapping_sub(1));
        regs.write(avc::STM_BIT_MAX, coded_size.saturating_mul(8));
        regs.write(avc::STM_BIT_LEN, 0);
        regs.write(avc::HEADER_BITS, 0);
        regs.write(avc::RESIDUAL_BITS, 0);

        self.write_headers(regs, ctx.formats, &job)?;

        regs.write(avc::MB_INFO_ADDR, self.mb_info.bus_address());
        regs.write(avc::MV_BUF_ADDR, 0);

        let data = h264_enc_buffer(ctx.picture_buffer()?)?;
        let rec = data.rec_dma();
        regs.write(avc::REC_ADDR_Y, rec.luma);
        regs.write(avc::REC_ADDR_C, rec.chroma);

        let reference = match (job.frame_type, self.rec_last) {
            (FrameType::P, Some(last)) => last,
            (FrameType::P, None) => {
                log::warn!("P frame without a previous picture");
                rec
            }
            _ => rec,
        };
        regs.write(avc::REF0_ADDR_Y, reference.luma);
        regs.write(avc::REF0_ADDR_C, reference.chroma);
        self.rec_last = Some(rec);

        let subpix = data.subpix_dma();
        regs.write(avc::SUBPIX_ADDR_NEW, subpix);
        regs.write(avc::SUBPIX_ADDR_LAST, self.subpix_last.unwrap_or(subpix));
        self.subpix_last = Some(subpix);

        regs.write(avc::DEBLK_ADDR, 0);
        regs.write(avc::CYCLIC_INTRA_REFRESH, 0);

        // The frame number register stays at 0 whatever the slice header carries.
        let mut para0 = avc::para0_frame_num(0)
            | avc::para0_beta_offset_div2(job.slice_beta_offset_div2)
            | avc::para0_alpha_offset_div2(job.slice_alpha_c0_offset_div2)
            | avc::para0_fix_mode_num(job.cabac_init_idc)
            | avc::PARA0_REF_PIC_TYPE_FRAME
            | avc::PARA0_PIC_TYPE_FRAME;
        para0 |= if job.entropy_coding_mode_flag {
            avc::PARA0_ENTROPY_CODING_CABAC
        } else {
            avc::PARA0_ENTROPY_CODING_CAVLC
        };
        para0 |= if job.frame_type.is_intra() {
            avc::PARA0_SLICE_TYPE_I
        } else {
            avc::PARA0_SLICE_TYPE_P
        };
        regs.write(avc::PARA0, para0);

        let stride_mbs_div_48 = div_round_up(ctx.formats.picture.bytesperline / 16, 48);
        regs.write(
            avc::PARA1,
            avc::para1_qp_chroma_offset0(job.chroma_qp_index_offset)
                | avc::para1_stride_mbs_div_48(stride_mbs_div_48)
                | avc::PARA1_RC_MODE_FIXED
                | avc::para1_fixed_qp(job.qp),
        );
        regs.write(avc::PARA2, 0);

        // Fixed QP without dynamic motion estimation.
        regs.write(avc::DYNAMIC_ME_PAR0, 0);
        regs.write(avc::DYNAMIC_ME_PAR1, 0);
        regs.write(avc::RC_INIT, 0);
        regs.write(avc::RC_MAD_TH0, 0);
        regs.write(avc::RC_MAD_TH1, 0);
        regs.write(avc::RC_MAD_TH2, 0);
        regs.write(avc::RC_MAD_TH3, 0);

        regs.write(
            avc::ME_PARA,
            avc::ME_PARA_WB_MV_INFO_DIS | avc::me_para_fme_search_level(2),
        );

        regs.write(avc::MAD, 0);
        regs.write(avc::OVERTIME_MB, 0);
        regs.write(avc::ME_INFO, 0);

        log::debug!(
            "H.264 encode: {:?} frame_num {} poc {} qp {}",
            job.frame_type,
            job.frame_num,
            job.pic_order_cnt_lsb,
            job.qp
        );

        Ok(())
    }

    fn job_trigger(&mut self, ctx: &JobContext) {
        ctx.regs.write(avc::INT_EN, avc::INT_EN_STALL | avc::INT_EN_FINISH);
        ctx.regs.write(
            avc::STARTTRIG,
            avc::STARTTRIG_ENCODE_MODE_H264 | avc::STARTTRIG_TYPE_ENC_START,
        );
    }

    fn job_finish(&mut self, ctx: &mut JobContext, state: BufferState) {
        let frame_type = self.job.take().map(|job| job.frame_type);
        let regs = ctx.regs;

        let coded = match ctx.coded_buffer_mut() {
            Ok(coded) => coded,
            Err(e) => {
                log::error!("cannot finish the H.264 encode: {}", e);
                return;
            }
        };

        if state != BufferState::Done {
            coded.set_bytesused(0);
            return;
        }

        let bits = regs.read(avc::STM_BIT_LEN);
        if bits % 8 != 0 {
            log::warn!("encoded stream of {} bits is not byte aligned", bits);
        }

        let length = (bits / 8) as usize;
        if length > coded.len() {
            log::warn!(
                "encoded stream of {} bytes overflows its {} bytes buffer",
                length,
                coded.len()
            );
        }
        coded.set_bytesused(length);

        let frame_flag = match frame_type {
            Some(FrameType::Idr | FrameType::I) => flags::KEYFRAME,
            Some(FrameType::P) => flags::PFRAME,
            None => 0,
        };
        coded.set_flags((coded.flags() & !flags::FRAME_MASK) | frame_flag);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitreader::BitReader;

    use crate::context::Context;
    use crate::context::DequeuedBuffer;
    use crate::context::QueueParams;
    use crate::context::SelectionTarget;
    use crate::dummy::DummyDevice;
    use crate::dummy::DummyRegisters;
    use crate::proc::FormatType;
    use crate::Rect;

    const V3S: &str = "allwinner,sun8i-v3s-video-engine";

    /// Replays the put-bits transfers into the stream they produce.
    fn emitted(registers: &DummyRegisters) -> Vec<u8> {
        let mut bits = Vec::new();
        let mut data = 0;

        for (offset, value) in registers.writes() {
            if offset == avc::PUTBITSDATA {
                data = value;
            } else if offset == avc::STARTTRIG && value & 0xf == avc::STARTTRIG_TYPE_PUT_BITS {
                let count = (value >> 8) & 0x3f;
                bits.extend((0..count).rev().map(|i| (data >> i) & 1 == 1));
            }
        }

        bits.chunks(8)
            .map(|chunk| {
                chunk
                    .iter()
                    .enumerate()
                    .fold(0u8, |byte, (i, bit)| byte | (u8::from(*bit) << (7 - i)))
            })
            .collect()
    }

    /// NAL unit headers following each start code of a byte aligned stream.
    fn nalu_headers(stream: &[u8]) -> Vec<u8> {
        stream.windows(5).filter(|w| w[..4] == [0, 0, 0, 1]).map(|w| w[4]).collect()
    }

    fn read_ue(reader: &mut BitReader) -> u32 {
        let mut zeros = 0;
        while !reader.read_bool().unwrap() {
            zeros += 1;
        }

        let suffix = if zeros > 0 { reader.read_u64(zeros).unwrap() } else { 0 };
        (((1u64 << zeros) | suffix) - 1) as u32
    }

    fn read_se(reader: &mut BitReader) -> i32 {
        let value = read_ue(reader) as i64;
        if value % 2 == 1 {
            ((value + 1) / 2) as i32
        } else {
            (-value / 2) as i32
        }
    }

    fn put_bits_device() -> DummyDevice {
        let dummy = DummyDevice::new(V3S);
        dummy.registers.script_read(avc::STATUS, avc::STATUS_PUT_BITS_READY);
        dummy
    }

    fn tunables() -> Tunables {
        Tunables::sample(&ControlStore::new(CONTROLS))
    }

    #[test]
    fn first_exp_golomb_codes() {
        let dummy = put_bits_device();
        let mut writer = HeaderWriter::new(dummy.device.registers());

        for value in 0..4 {
            writer.write_ue(value).unwrap();
        }
        assert_eq!(writer.bits(), 12);
        writer.rbsp_trailing_bits().unwrap();
        assert!(writer.aligned());

        assert_eq!(emitted(&dummy.registers), vec![0b1010_0110, 0b0100_1000]);
    }

    #[test]
    fn long_codes_are_split() {
        let dummy = put_bits_device();
        let mut writer = HeaderWriter::new(dummy.device.registers());

        writer.write_ue(u32::MAX - 1).unwrap();
        assert!(writer.write_ue(u32::MAX).is_err());

        let counts: Vec<u32> = dummy
            .registers
            .writes_to(avc::STARTTRIG)
            .into_iter()
            .map(|value| (value >> 8) & 0x3f)
            .collect();
        assert_eq!(counts, vec![31, 32]);
        assert_eq!(writer.bits(), 63);
    }

    #[test]
    fn unsigned_exp_golomb_round_trip() {
        let dummy = put_bits_device();
        let values: Vec<u32> = (0..=1 << 20).collect();

        for chunk in values.chunks(1 << 14) {
            dummy.registers.clear_writes();
            let mut writer = HeaderWriter::new(dummy.device.registers());
            for value in chunk {
                writer.write_ue(*value).unwrap();
            }

            let stream = emitted(&dummy.registers);
            let mut reader = BitReader::new(&stream);
            for value in chunk {
                assert_eq!(read_ue(&mut reader), *value);
            }
        }
    }

    #[test]
    fn signed_exp_golomb_round_trip() {
        let dummy = put_bits_device();
        let values: Vec<i32> = (-(1 << 19)..=1 << 19).collect();

        for chunk in values.chunks(1 << 14) {
            dummy.registers.clear_writes();
            let mut writer = HeaderWriter::new(dummy.device.registers());
            for value in chunk {
                writer.write_se(*value).unwrap();
            }

            let stream = emitted(&dummy.registers);
            let mut reader = BitReader::new(&stream);
            for value in chunk {
                assert_eq!(read_se(&mut reader), *value);
            }
        }
    }

    #[test]
    fn closed_gop() {
        let mut tunables = tunables();
        tunables.gop_size = 3;
        let mut state = StreamState::default();

        let frames: Vec<FrameJob> = (0..6).map(|_| state.next_frame(&tunables, false)).collect();

        let types: Vec<FrameType> = frames.iter().map(|f| f.frame_type).collect();
        use FrameType::*;
        assert_eq!(types, vec![Idr, P, P, Idr, P, P]);
        let numbering: Vec<(u32, u32)> =
            frames.iter().map(|f| (f.frame_num, f.pic_order_cnt_lsb)).collect();
        assert_eq!(numbering, vec![(0, 0), (1, 2), (2, 4), (0, 0), (1, 2), (2, 4)]);
        assert_eq!(frames[0].qp, 26);
        assert_eq!(frames[1].qp, 28);
    }

    #[test]
    fn open_gop_intra_period() {
        let mut tunables = tunables();
        tunables.gop_closure = false;
        tunables.i_period = 2;
        let mut state = StreamState::default();

        let frames: Vec<FrameJob> = (0..6).map(|_| state.next_frame(&tunables, false)).collect();

        use FrameType::*;
        let types: Vec<FrameType> = frames.iter().map(|f| f.frame_type).collect();
        assert_eq!(types, vec![Idr, P, I, P, I, P]);
        // Only IDR pictures restart the numbering.
        let frame_nums: Vec<u32> = frames.iter().map(|f| f.frame_num).collect();
        assert_eq!(frame_nums, vec![0, 1, 2, 3, 4, 5]);
    }

    #[test]
    fn numbering_wraps() {
        let mut tunables = tunables();
        tunables.gop_size = u16::MAX as u32;
        let mut state = StreamState::default();

        let frames: Vec<FrameJob> = (0..257).map(|_| state.next_frame(&tunables, false)).collect();

        assert_eq!(frames[128].pic_order_cnt_lsb, 0);
        assert_eq!(frames[129].pic_order_cnt_lsb, 2);
        assert_eq!(frames[255].frame_num, 255);
        assert_eq!(frames[256].frame_num, 0);
        assert_eq!(frames[256].frame_type, FrameType::P);
    }

    #[test]
    fn forced_key_frame_lasts_one_picture() {
        let mut tunables = tunables();
        tunables.prepend_sps_pps_to_idr = true;
        let mut state = StreamState::default();

        state.next_frame(&tunables, false);
        state.step = HeaderStep::Slice;
        state.next_frame(&tunables, false);

        let forced = state.next_frame(&tunables, true);
        assert_eq!(forced.frame_type, FrameType::Idr);
        assert_eq!((forced.frame_num, forced.pic_order_cnt_lsb), (0, 0));
        assert_eq!(state.step, HeaderStep::Sps);

        let next = state.next_frame(&tunables, false);
        assert_eq!(next.frame_type, FrameType::P);
        assert_eq!(next.frame_num, 1);
    }

    #[test]
    fn qp_bounds_and_initial_qp() {
        let mut tunables = tunables();
        tunables.qp_max = 27;
        let mut state = StreamState::default();

        let idr = state.next_frame(&tunables, false);
        assert_eq!(idr.qp, 26);
        assert_eq!(state.qp_init, 26);

        state.step = HeaderStep::Slice;
        let p = state.next_frame(&tunables, false);
        assert_eq!(p.qp, 27);
        assert_eq!(state.qp_init, 26);

        tunables.qp_min = 30;
        tunables.qp_max = 51;
        state.step = HeaderStep::Pps;
        let p = state.next_frame(&tunables, false);
        assert_eq!(p.qp, 30);
        assert_eq!(state.qp_init, 30);
    }

    #[test]
    fn control_mappings() {
        assert_eq!(profile_idc(PROFILE_CONSTRAINED_BASELINE), 66);
        assert_eq!(profile_idc(PROFILE_HIGH), 100);
        assert_eq!(level_idc(1), 9);
        assert_eq!(level_idc(LEVEL_3_1), 31);
        assert_eq!(level_idc(42), 0);
        assert_eq!(constraint_set_flags(PROFILE_MAIN), 0x40);
        assert_eq!(constraint_set_flags(PROFILE_CONSTRAINED_BASELINE), 0xc0);
        assert_eq!(vui_sar_idc(16), 16);
        assert_eq!(vui_sar_idc(VUI_SAR_IDC_EXTENDED), 255);
        assert_eq!(disable_deblocking_filter_idc(LOOP_FILTER_MODE_DISABLED), 1);
        assert!(!profile_supports_cabac(PROFILE_BASELINE));
        assert!(profile_supports_cabac(PROFILE_MAIN));
    }

    #[test]
    fn side_buffer_sizes() {
        assert_eq!(subpix_buf_size(20, 15), 96 * 39);
        assert_eq!(rec_buf_sizes(20, 15), (320 * 256, 320 * 256 + 320 * 128));
        assert_eq!(rec_buf_sizes(120, 68), (1920 * 1152, 1920 * 1152 + 1920 * 576));
        assert_eq!(subpix_buf_size(120, 68), 352 * 145);
        assert_eq!(mb_info_buf_size(20), 4096);
        assert_eq!(mb_info_buf_size(120), 4 * 4096);
        // The reconstruction buffer is page aligned.
        assert_eq!(rec_buf_sizes(3, 1).1 % 4096, 0);
    }

    fn streaming_context(dummy: &DummyDevice) -> Context {
        let ctx = Context::new(&dummy.device, Role::Encoder).unwrap();
        let picture =
            Format { pixelformat: fourcc::NV12, width: 320, height: 240, ..Default::default() };
        ctx.set_format(FormatType::Picture, picture).unwrap();
        let coded =
            Format { pixelformat: fourcc::H264, sizeimage: 64 * 1024, ..Default::default() };
        ctx.set_format(FormatType::Coded, coded).unwrap();

        ctx.create_buffers(FormatType::Coded, 2, None).unwrap();
        ctx.create_buffers(FormatType::Picture, 2, None).unwrap();

        let r = &dummy.registers;
        r.script_read(avc::STATUS, avc::STATUS_PUT_BITS_READY | avc::STATUS_FINISH);
        r.script_read(regs::RESET, regs::RESET_CACHE_SYNC_IDLE | regs::RESET_SYNC_IDLE);

        ctx.stream_on(FormatType::Coded).unwrap();
        ctx.stream_on(FormatType::Picture).unwrap();

        ctx
    }

    /// Encodes picture `index` into coded buffer `index`, the engine producing `bytes` bytes.
    fn encode(dummy: &DummyDevice, ctx: &Context, index: usize, bytes: u32) -> DequeuedBuffer {
        dummy.registers.clear_writes();

        let params = QueueParams { timestamp: 1000 + index as u64, ..Default::default() };
        ctx.queue_buffer(FormatType::Coded, index, QueueParams::default()).unwrap();
        ctx.queue_buffer(FormatType::Picture, index, params).unwrap();

        dummy.registers.script_read(avc::STM_BIT_LEN, bytes * 8);
        dummy.device.handle_irq();

        let picture = ctx.dequeue_buffer(FormatType::Picture).unwrap().unwrap();
        assert_eq!(picture.index, index);
        ctx.dequeue_buffer(FormatType::Coded).unwrap().unwrap()
    }

    #[test]
    fn idr_then_p_frame() {
        let _ = env_logger::try_init();

        let dummy = DummyDevice::new(V3S);
        let ctx = streaming_context(&dummy);
        let r = &dummy.registers;

        let coded = encode(&dummy, &ctx, 0, 1000);
        assert_eq!(coded.state, BufferState::Done);
        assert_eq!(coded.bytesused, 1000);
        assert_eq!(coded.timestamp, 1000);
        assert_eq!(coded.flags & flags::FRAME_MASK, flags::KEYFRAME);

        assert_eq!(nalu_headers(&emitted(r)), vec![0x67, 0x68, 0x45]);
        assert_eq!(
            r.last_write(avc::STARTTRIG),
            Some(avc::STARTTRIG_ENCODE_MODE_H264 | avc::STARTTRIG_TYPE_ENC_START)
        );
        assert_eq!(r.last_write(avc::INT_EN), Some(0));
        assert_eq!(r.writes_to(avc::INT_EN), vec![avc::INT_EN_STALL | avc::INT_EN_FINISH, 0]);
        assert_eq!(r.last_write(avc::STM_BIT_MAX), Some(64 * 1024 * 8));
        assert_eq!(r.last_write(avc::PARA0).map(|v| v & avc::PARA0_SLICE_TYPE_P), Some(0));
        assert_eq!(
            r.last_write(avc::PARA1),
            Some((1 << 24) | (4 << 16) | (26 << 8) | 26)
        );
        assert_eq!(
            r.last_write(regs::MODE),
            Some(regs::MODE_ENC_ENABLE | regs::MODE_ENC_ISP_ENABLE | regs::MODE_DEC_DISABLED)
        );

        // Intra pictures reference their own reconstruction.
        let rec = r.last_write(avc::REC_ADDR_Y).unwrap();
        let subpix = r.last_write(avc::SUBPIX_ADDR_NEW).unwrap();
        assert_eq!(r.last_write(avc::REF0_ADDR_Y), Some(rec));
        assert_eq!(r.last_write(avc::REC_ADDR_C), Some(rec + 320 * 256));
        assert_eq!(r.last_write(avc::SUBPIX_ADDR_LAST), Some(subpix));
        assert_ne!(r.last_write(avc::MB_INFO_ADDR), Some(0));

        let coded = encode(&dummy, &ctx, 1, 200);
        assert_eq!(coded.bytesused, 200);
        assert_eq!(coded.flags & flags::FRAME_MASK, flags::PFRAME);

        assert_eq!(nalu_headers(&emitted(r)), vec![0x41]);
        assert_eq!(r.last_write(avc::REF0_ADDR_Y), Some(rec));
        assert_ne!(r.last_write(avc::REC_ADDR_Y), Some(rec));
        assert_eq!(r.last_write(avc::SUBPIX_ADDR_LAST), Some(subpix));
        assert_eq!(
            r.last_write(avc::PARA0).map(|v| v & avc::PARA0_SLICE_TYPE_P),
            Some(avc::PARA0_SLICE_TYPE_P)
        );
        assert_eq!(r.last_write(avc::PARA1).map(|v| v & 0x3f), Some(28));
    }

    #[test]
    fn sequence_parameter_set_syntax() {
        let dummy = DummyDevice::new(V3S);
        let ctx = streaming_context(&dummy);
        ctx.set_selection(SelectionTarget::Crop, Rect { left: 0, top: 0, width: 320, height: 236 })
            .unwrap();
        ctx.set_control(ControlValue::Integer(ControlId::H264VuiSarEnable, 1)).unwrap();
        ctx.set_control(ControlValue::Integer(ControlId::H264VuiSarIdc, VUI_SAR_IDC_EXTENDED))
            .unwrap();
        ctx.set_control(ControlValue::Integer(ControlId::H264VuiExtSarWidth, 4)).unwrap();
        ctx.set_control(ControlValue::Integer(ControlId::H264VuiExtSarHeight, 3)).unwrap();

        encode(&dummy, &ctx, 0, 100);

        let stream = emitted(&dummy.registers);
        let mut reader = BitReader::new(&stream);
        assert_eq!(reader.read_u32(32).unwrap(), 1);
        assert_eq!(reader.read_u8(8).unwrap(), 0x67);
        assert_eq!(reader.read_u8(8).unwrap(), 77);
        assert_eq!(reader.read_u8(8).unwrap(), CONSTRAINT_SET1_FLAG);
        assert_eq!(reader.read_u8(8).unwrap(), 31);
        assert_eq!(read_ue(&mut reader), 0);
        assert_eq!(read_ue(&mut reader), 4);
        assert_eq!(read_ue(&mut reader), 0);
        assert_eq!(read_ue(&mut reader), 4);
        assert_eq!(read_ue(&mut reader), 1);
        assert!(!reader.read_bool().unwrap());
        assert_eq!(read_ue(&mut reader), 19);
        assert_eq!(read_ue(&mut reader), 14);
        assert!(reader.read_bool().unwrap());
        assert!(!reader.read_bool().unwrap());

        // Cropping 4 lines at the bottom.
        assert!(reader.read_bool().unwrap());
        let crop: Vec<u32> = (0..4).map(|_| read_ue(&mut reader)).collect();
        assert_eq!(crop, vec![0, 0, 0, 2]);

        // VUI with an extended aspect ratio.
        assert!(reader.read_bool().unwrap());
        assert!(reader.read_bool().unwrap());
        assert_eq!(reader.read_u8(8).unwrap(), 255);
        assert_eq!(reader.read_u16(16).unwrap(), 4);
        assert_eq!(reader.read_u16(16).unwrap(), 3);
        assert_eq!(reader.read_u8(3).unwrap(), 0);

        // 25 frames per second.
        assert!(reader.read_bool().unwrap());
        assert_eq!(reader.read_u32(32).unwrap(), 1);
        assert_eq!(reader.read_u32(32).unwrap(), 50);
        assert!(reader.read_bool().unwrap());
        assert_eq!(reader.read_u8(4).unwrap(), 0);
        assert!(reader.read_bool().unwrap());

        // The PPS follows on the next byte boundary.
        while reader.position() % 8 != 0 {
            assert!(!reader.read_bool().unwrap());
        }
        assert_eq!(reader.read_u32(32).unwrap(), 1);
        assert_eq!(reader.read_u8(8).unwrap(), 0x68);
        assert_eq!(read_ue(&mut reader), 0);
        assert_eq!(read_ue(&mut reader), 0);
        assert!(!reader.read_bool().unwrap());
    }

    #[test]
    fn forced_key_frames_and_prepended_headers() {
        let dummy = DummyDevice::new(V3S);
        let ctx = streaming_context(&dummy);
        let r = &dummy.registers;

        encode(&dummy, &ctx, 0, 100);
        encode(&dummy, &ctx, 1, 100);

        // Parameter sets are only emitted once without prepending.
        ctx.set_control(ControlValue::Integer(ControlId::ForceKeyFrame, 1)).unwrap();
        let coded = encode(&dummy, &ctx, 0, 100);
        assert_eq!(coded.flags & flags::FRAME_MASK, flags::KEYFRAME);
        assert_eq!(nalu_headers(&emitted(r)), vec![0x45]);

        let coded = encode(&dummy, &ctx, 1, 100);
        assert_eq!(coded.flags & flags::FRAME_MASK, flags::PFRAME);

        ctx.set_control(ControlValue::Integer(ControlId::PrependSpsPpsToIdr, 1)).unwrap();
        ctx.set_control(ControlValue::Integer(ControlId::ForceKeyFrame, 1)).unwrap();
        encode(&dummy, &ctx, 0, 100);
        assert_eq!(nalu_headers(&emitted(r)), vec![0x67, 0x68, 0x45]);

        // A level change only emits the parameter sets again.
        ctx.set_control(ControlValue::Integer(ControlId::H264Level, LEVEL_6_2)).unwrap();
        encode(&dummy, &ctx, 1, 100);
        assert_eq!(nalu_headers(&emitted(r)), vec![0x67, 0x68, 0x41]);
    }

    #[test]
    fn entropy_mode_follows_the_profile() {
        let dummy = DummyDevice::new(V3S);
        let ctx = streaming_context(&dummy);
        let entropy = || ctx.control(ControlId::H264EntropyMode);

        ctx.set_control(ControlValue::Integer(ControlId::H264EntropyMode, ENTROPY_MODE_CABAC))
            .unwrap();
        assert!(ctx
            .set_control(ControlValue::Integer(ControlId::H264Profile, PROFILE_EXTENDED))
            .is_err());

        ctx.set_control(ControlValue::Integer(ControlId::H264Profile, PROFILE_BASELINE)).unwrap();
        assert_eq!(
            entropy(),
            Some(ControlValue::Integer(ControlId::H264EntropyMode, ENTROPY_MODE_CAVLC))
        );
        assert!(ctx
            .set_control(ControlValue::Integer(ControlId::H264EntropyMode, ENTROPY_MODE_CABAC))
            .is_err());

        encode(&dummy, &ctx, 0, 100);
        let para0 = dummy.registers.last_write(avc::PARA0).unwrap();
        assert_eq!(para0 & avc::PARA0_ENTROPY_CODING_CABAC, 0);
    }

    #[test]
    fn stalled_encode_has_no_payload() {
        let dummy = DummyDevice::new(V3S);
        let ctx = streaming_context(&dummy);
        dummy.registers.script_read(avc::STATUS, avc::STATUS_PUT_BITS_READY | (1 << 1));

        let coded = encode(&dummy, &ctx, 0, 100);

        assert_eq!(coded.state, BufferState::Error);
        assert_eq!(coded.bytesused, 0);
        assert_eq!(dummy.registers.last_write(avc::STATUS), Some(avc::STATUS_MASK));
    }
}
