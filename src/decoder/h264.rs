// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! H.264 slice decoding.
//!
//! Every job decodes a single slice. The picture buffers keep a decoded picture buffer slot and a
//! co-located motion vector buffer across jobs, which later pictures reference through the
//! framebuffer list in SRAM.

use crate::align_up;
use crate::controls::ControlConfig;
use crate::controls::ControlId;
use crate::controls::ControlStore;
use crate::controls::ControlValue;
use crate::controls::H264DecodeParams;
use crate::controls::H264DpbEntry;
use crate::controls::H264Pps;
use crate::controls::H264PredWeights;
use crate::controls::H264Reference;
use crate::controls::H264ScalingMatrix;
use crate::controls::H264SliceParams;
use crate::controls::H264Sps;
use crate::controls::DECODE_MODE_SLICE_BASED;
use crate::controls::START_CODE_NONE;
use crate::decoder;
use crate::device::Capabilities;
use crate::device::Registers;
use crate::device::SramPort;
use crate::dma::DmaBuffer;
use crate::engine::Codec;
use crate::engine::Engine;
use crate::engine::EngineBuffer;
use crate::engine::EngineError;
use crate::engine::EngineResult;
use crate::engine::EngineSession;
use crate::engine::FrameSizeRange;
use crate::engine::IrqStatus;
use crate::engine::JobContext;
use crate::engine::Role;
use crate::engine::SetupContext;
use crate::fourcc;
use crate::proc::Format;
use crate::proc::Formats;
use crate::queue::Buffer;
use crate::regs;
use crate::regs::h264 as h264_regs;
use crate::Fourcc;

/// Number of entries of the framebuffer list.
pub const FRAME_NUM: usize = 18;
const MAX_REF_IDX: usize = 32;

const NEIGHBOR_INFO_BUF_SIZE: usize = 32 * 1024;
const PIC_INFO_BUF_SIZE_MIN: usize = 130 * 1024;

/// V4L2 profile menu values accepted by the decoder.
const PROFILE_BASELINE: i32 = 0;
const PROFILE_MAIN: i32 = 2;
const PROFILE_EXTENDED: i32 = 3;
const PROFILE_HIGH: i32 = 4;

pub(crate) const SRAM: SramPort = SramPort {
    offset: h264_regs::SRAM_PORT_OFFSET,
    data: h264_regs::SRAM_PORT_DATA,
};

const CONTROLS: &[ControlConfig] = &[
    ControlConfig::compound(ControlId::H264Sps),
    ControlConfig::compound(ControlId::H264Pps),
    ControlConfig::compound(ControlId::H264ScalingMatrix),
    ControlConfig::compound(ControlId::H264SliceParams),
    ControlConfig::compound(ControlId::H264PredWeights),
    ControlConfig::compound(ControlId::H264DecodeParams),
    ControlConfig::integer(ControlId::H264Profile, PROFILE_BASELINE, PROFILE_HIGH, PROFILE_MAIN),
    ControlConfig::integer(
        ControlId::H264DecodeMode,
        DECODE_MODE_SLICE_BASED,
        DECODE_MODE_SLICE_BASED,
        DECODE_MODE_SLICE_BASED,
    ),
    ControlConfig::integer(
        ControlId::H264StartCode,
        START_CODE_NONE,
        START_CODE_NONE,
        START_CODE_NONE,
    ),
];

/// Parameter set flags and the register bits they map to.
const PPS_FLAGS: &[(u16, u32)] = &[
    (H264Pps::FLAG_ENTROPY_CODING_MODE, h264_regs::PPS_ENTROPY_CODING_MODE),
    (H264Pps::FLAG_WEIGHTED_PRED, h264_regs::PPS_WEIGHTED_PRED),
    (H264Pps::FLAG_CONSTRAINED_INTRA_PRED, h264_regs::PPS_CONSTRAINED_INTRA_PRED),
    (H264Pps::FLAG_TRANSFORM_8X8_MODE, h264_regs::PPS_TRANSFORM_8X8_MODE),
];
const SPS_FLAGS: &[(u32, u32)] = &[
    (H264Sps::FLAG_FRAME_MBS_ONLY, h264_regs::SPS_MBS_ONLY),
    (H264Sps::FLAG_MB_ADAPTIVE_FRAME_FIELD, h264_regs::SPS_MB_ADAPTIVE_FRAME_FIELD),
    (H264Sps::FLAG_DIRECT_8X8_INFERENCE, h264_regs::SPS_DIRECT_8X8_INFERENCE),
];

const FRAME_SIZE: FrameSizeRange = FrameSizeRange {
    min_width: 16,
    max_width: 3840,
    step_width: 16,
    min_height: 16,
    max_height: 3840,
    step_height: 16,
};

/// Size of the picture info buffer for a coded size. The formula comes from the vendor library.
pub fn pic_info_buf_size(width: u32, height: u32) -> usize {
    let per_frame = if width > 2048 { 0x4000 } else { 0x1000 };

    // TODO: frame_mbs_only streams do not need the doubled height.
    let size = FRAME_NUM * per_frame + height as usize * 2 * 64;

    size.max(PIC_INFO_BUF_SIZE_MIN)
}

/// Size of the co-located motion vector buffer of a picture, both fields included.
pub fn mv_col_buf_size(width: u32, height: u32, sps_flags: u32) -> usize {
    let mut field_size = width.div_ceil(16) as usize * height.div_ceil(16) as usize * 16;

    if sps_flags & H264Sps::FLAG_DIRECT_8X8_INFERENCE == 0 {
        field_size *= 2;
    }
    if sps_flags & H264Sps::FLAG_FRAME_MBS_ONLY == 0 {
        field_size *= 2;
    }

    field_size * 2
}

/// Deblocking and intra prediction buffer sizes, only needed above 2048 pixels of width.
fn wide_buf_sizes(width: u32) -> (usize, usize) {
    let deblk = align_up(width, 32) as usize * 12;
    // Twice the vendor size, which 4K decoding on H6 needs.
    let intra_pred = align_up(width, 64) as usize * 5 * 2;

    (deblk, intra_pred)
}

/// H.264 data of a picture buffer.
#[derive(Default)]
pub struct H264Buffer {
    position: usize,
    pic_type: u32,
    /// Allocated by the first job decoding into the buffer.
    mv_col: Option<Box<dyn DmaBuffer>>,
}

impl H264Buffer {
    /// The framebuffer list slot of the picture.
    pub fn position(&self) -> usize {
        self.position
    }

    /// Top and bottom field halves of the motion vector buffer, zero if not allocated yet.
    fn mv_col_dma(&self) -> (u32, u32) {
        match &self.mv_col {
            Some(buffer) => {
                let top = buffer.bus_address();
                (top, top.wrapping_add((buffer.len() / 2) as u32))
            }
            None => (0, 0),
        }
    }
}

fn h264_buffer(buffer: &Buffer) -> Option<&H264Buffer> {
    match buffer.engine_buffer() {
        Some(EngineBuffer::H264(h264)) => Some(h264),
        _ => None,
    }
}

/// An entry of the framebuffer list.
#[derive(Copy, Clone, Default)]
struct SramRefPic {
    top_field_order_cnt: u32,
    bottom_field_order_cnt: u32,
    frame_info: u32,
    luma: u32,
    chroma: u32,
    mv_col_top: u32,
    mv_col_bottom: u32,
}

impl SramRefPic {
    const WORDS: usize = 8;

    fn new(ctx: &JobContext, buffer: &Buffer, top: i32, bottom: i32) -> Self {
        let picture = ctx.picture_plane_dma(buffer);
        let (pic_type, (mv_col_top, mv_col_bottom)) = match h264_buffer(buffer) {
            Some(h264) => (h264.pic_type, h264.mv_col_dma()),
            None => (h264_regs::PIC_TYPE_FRAME, (0, 0)),
        };

        Self {
            top_field_order_cnt: top as u32,
            bottom_field_order_cnt: bottom as u32,
            frame_info: h264_regs::frame_info(pic_type),
            luma: picture.luma,
            chroma: picture.chroma,
            mv_col_top,
            mv_col_bottom,
        }
    }

    fn words(&self) -> [u32; Self::WORDS] {
        [
            self.top_field_order_cnt,
            self.bottom_field_order_cnt,
            self.frame_info,
            self.luma,
            self.chroma,
            self.mv_col_top,
            self.mv_col_bottom,
            0,
        ]
    }
}

/// Advances the bitstream by `bits` bits, 32 at most per trigger.
pub(crate) fn skip_bits(regs: &Registers, bits: u32) -> EngineResult<()> {
    let mut count = 0;

    while count < bits {
        let chunk = (bits - count).min(32);

        regs.write(
            h264_regs::TRIGGER_TYPE,
            h264_regs::TRIGGER_TYPE_FLUSH_BITS | h264_regs::trigger_type_n_bits(chunk),
        );
        regs.poll_cleared(h264_regs::STATUS, h264_regs::STATUS_VLD_BUSY)?;

        count += chunk;
    }

    Ok(())
}

/// Interrupt classification of the H.264 decoding block, shared with VP8.
pub(crate) fn irq_status(regs: &Registers) -> IrqStatus {
    let status = regs.read(h264_regs::STATUS) & h264_regs::STATUS_INT_MASK;

    if status == 0 {
        IrqStatus::None
    } else if status & h264_regs::STATUS_SLICE_DECODE_INT == 0
        || status & h264_regs::STATUS_VLD_DATA_REQ_INT != 0
        || status & h264_regs::STATUS_DECODE_ERR_INT != 0
    {
        IrqStatus::Error
    } else {
        IrqStatus::Success
    }
}

pub(crate) fn irq_clear(regs: &Registers) {
    regs.write(h264_regs::STATUS, h264_regs::STATUS_INT_MASK);
}

pub(crate) fn irq_disable(regs: &Registers) {
    let value = regs.read(h264_regs::CTRL) & !h264_regs::CTRL_INT_MASK;
    regs.write(h264_regs::CTRL, value);
}

pub struct H264Decoder;

impl Engine for H264Decoder {
    fn codec(&self) -> Codec {
        Codec::H264
    }

    fn role(&self) -> Role {
        Role::Decoder
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::H264_DEC
    }

    fn pixelformat(&self) -> Fourcc {
        fourcc::H264_SLICE
    }

    fn slice_based(&self) -> bool {
        true
    }

    fn frame_size(&self) -> Option<&'static FrameSizeRange> {
        Some(&FRAME_SIZE)
    }

    fn controls(&self) -> &'static [ControlConfig] {
        CONTROLS
    }

    fn ctrl_validate(&self, _controls: &ControlStore, value: &ControlValue) -> EngineResult<()> {
        match value {
            ControlValue::Integer(ControlId::H264Profile, PROFILE_EXTENDED) => {
                Err(EngineError::Unsupported("H.264 extended profile".into()))
            }
            _ => Ok(()),
        }
    }

    fn format_prepare(&self, _formats: &Formats, format: &mut Format) -> EngineResult<()> {
        decoder::format_coded_prepare(self, format)
    }

    fn format_configure(&self, regs: &Registers, formats: &Formats) -> EngineResult<()> {
        decoder::format_coded_configure(regs, formats)
    }

    fn setup(&self, ctx: &SetupContext) -> EngineResult<Box<dyn EngineSession>> {
        let coded = &ctx.formats.coded;

        let pic_info = ctx.allocator.allocate(pic_info_buf_size(coded.width, coded.height))?;
        let neighbor_info = ctx.allocator.allocate(NEIGHBOR_INFO_BUF_SIZE)?;

        let wide = if coded.width > 2048 {
            let (deblk_size, intra_pred_size) = wide_buf_sizes(coded.width);
            Some((ctx.allocator.allocate(deblk_size)?, ctx.allocator.allocate(intra_pred_size)?))
        } else {
            None
        };

        Ok(Box::new(H264Session { pic_info, neighbor_info, wide }))
    }

    fn buffer_setup(&self, _ctx: &SetupContext, buffer: &mut Buffer) -> EngineResult<()> {
        buffer.engine = Some(EngineBuffer::H264(H264Buffer::default()));

        Ok(())
    }

    fn irq_status(&self, regs: &Registers) -> IrqStatus {
        irq_status(regs)
    }

    fn irq_clear(&self, regs: &Registers) {
        irq_clear(regs)
    }

    fn irq_disable(&self, regs: &Registers) {
        irq_disable(regs)
    }
}

/// Side buffers of a decoding stream.
struct H264Session {
    pic_info: Box<dyn DmaBuffer>,
    neighbor_info: Box<dyn DmaBuffer>,
    /// Deblocking and intra prediction buffers of wide pictures.
    wide: Option<(Box<dyn DmaBuffer>, Box<dyn DmaBuffer>)>,
}

/// Parameters of the slice being decoded.
struct SliceJob<'a> {
    sps: &'a H264Sps,
    pps: &'a H264Pps,
    scaling_matrix: &'a H264ScalingMatrix,
    slice: &'a H264SliceParams,
    pred_weights: &'a H264PredWeights,
    decode: &'a H264DecodeParams,
}

impl<'a> SliceJob<'a> {
    fn bind(controls: &'a ControlStore) -> EngineResult<Self> {
        Ok(Self {
            sps: controls.ctrl_data()?,
            pps: controls.ctrl_data()?,
            scaling_matrix: controls.ctrl_data()?,
            slice: controls.ctrl_data()?,
            pred_weights: controls.ctrl_data()?,
            decode: controls.ctrl_data()?,
        })
    }

    fn is_field_pic(&self) -> bool {
        self.decode.flags & H264DecodeParams::FLAG_FIELD_PIC != 0
    }

    fn pred_weights_required(&self) -> bool {
        let slice_type = self.slice.slice_type;
        let weighted_pred = self.pps.flags & H264Pps::FLAG_WEIGHTED_PRED != 0;

        (weighted_pred
            && (slice_type == H264SliceParams::TYPE_P || slice_type == H264SliceParams::TYPE_SP))
            || (self.pps.weighted_bipred_idc == 1 && slice_type == H264SliceParams::TYPE_B)
    }

    /// The picture buffer holding a DPB entry, if it is still around.
    fn find_reference<'b>(ctx: &'b JobContext, dpb: &H264DpbEntry) -> Option<&'b Buffer> {
        let buffer = ctx
            .find_picture(dpb.reference_ts)
            .and_then(|index| ctx.picture_queue.buffer(index));

        if buffer.is_none() {
            log::warn!("no picture buffer for reference timestamp {}", dpb.reference_ts);
        }

        buffer
    }
}

impl H264Session {
    fn write_scaling_lists(regs: &Registers, job: &SliceJob) {
        if job.pps.flags & H264Pps::FLAG_SCALING_MATRIX_PRESENT == 0 {
            return;
        }

        let matrix = job.scaling_matrix;
        regs.write_sram(SRAM, h264_regs::SRAM_SCALING_LIST_8X8_0 << 2, &matrix.scaling_list_8x8[0]);
        regs.write_sram(SRAM, h264_regs::SRAM_SCALING_LIST_8X8_1 << 2, &matrix.scaling_list_8x8[1]);
        regs.write_sram(
            SRAM,
            h264_regs::SRAM_SCALING_LIST_4X4 << 2,
            &matrix.scaling_list_4x4.concat(),
        );
    }

    /// Assigns the framebuffer list slot of the output picture and uploads the list.
    fn write_frame_list(ctx: &mut JobContext, job: &SliceJob) -> EngineResult<()> {
        let decode = job.decode;
        let timestamp = ctx.picture_buffer()?.timestamp();

        let mut pic_list = [SramRefPic::default(); FRAME_NUM];
        let mut used_slots = 0u32;
        let mut output = None;

        for dpb in decode.dpb.iter() {
            if dpb.flags & H264DpbEntry::FLAG_VALID == 0 {
                continue;
            }

            let Some(buffer) = SliceJob::find_reference(ctx, dpb) else {
                continue;
            };
            let Some(position) = h264_buffer(buffer).map(H264Buffer::position) else {
                continue;
            };

            used_slots |= 1 << position;

            // The other field of the picture being decoded.
            if dpb.reference_ts == timestamp {
                output = Some(position);
                continue;
            }

            if dpb.flags & H264DpbEntry::FLAG_ACTIVE == 0 {
                continue;
            }

            pic_list[position] = SramRefPic::new(
                ctx,
                buffer,
                dpb.top_field_order_cnt,
                dpb.bottom_field_order_cnt,
            );
        }

        let position = match output {
            Some(position) => position,
            None => {
                let free = (!used_slots).trailing_zeros() as usize;
                if free >= FRAME_NUM {
                    return Err(EngineError::OutOfResources("no free framebuffer slot".into()));
                }
                free
            }
        };

        let coded = &ctx.formats.coded;
        let mv_col_size = mv_col_buf_size(coded.width, coded.height, job.sps.flags);
        let pic_type = if job.is_field_pic() {
            h264_regs::PIC_TYPE_FIELD
        } else if job.sps.flags & H264Sps::FLAG_MB_ADAPTIVE_FRAME_FIELD != 0 {
            h264_regs::PIC_TYPE_MBAFF
        } else {
            h264_regs::PIC_TYPE_FRAME
        };

        let allocator = ctx.allocator;
        let picture = ctx.picture_buffer_mut()?;
        let Some(EngineBuffer::H264(h264)) = picture.engine_buffer_mut() else {
            return Err(anyhow::anyhow!("picture buffer without H.264 data").into());
        };

        h264.position = position;
        h264.pic_type = pic_type;
        if h264.mv_col.is_none() {
            h264.mv_col = Some(allocator.allocate(mv_col_size)?);
        }

        let picture = ctx.picture_buffer()?;
        pic_list[position] = SramRefPic::new(
            ctx,
            picture,
            decode.top_field_order_cnt,
            decode.bottom_field_order_cnt,
        );

        let words: Vec<u32> = pic_list.iter().flat_map(SramRefPic::words).collect();
        ctx.regs.write_sram_words(SRAM, h264_regs::SRAM_FRAMEBUFFER_LIST << 2, &words);
        ctx.regs.write(h264_regs::OUTPUT_FRAME_IDX, position as u32);

        Ok(())
    }

    fn write_ref_list(
        ctx: &JobContext,
        job: &SliceJob,
        list: &[H264Reference],
        num_ref: usize,
        sram: u32,
    ) {
        let num_ref = num_ref.min(MAX_REF_IDX);
        let mut sram_array = [0u8; MAX_REF_IDX];

        for (entry, reference) in sram_array.iter_mut().zip(&list[..num_ref]) {
            let Some(dpb) = job.decode.dpb.get(reference.index as usize) else {
                log::warn!("reference to DPB entry {} out of range", reference.index);
                continue;
            };

            if dpb.flags & H264DpbEntry::FLAG_ACTIVE == 0 {
                continue;
            }

            let Some(h264) = SliceJob::find_reference(ctx, dpb).and_then(h264_buffer) else {
                continue;
            };

            *entry |= (h264.position as u8) << 1;
            if reference.fields == H264Reference::BOTTOM_FIELD_REF {
                *entry |= 1;
            }
        }

        let size = (num_ref.div_ceil(4) * 4).min(MAX_REF_IDX);
        ctx.regs.write_sram(SRAM, sram << 2, &sram_array[..size]);
    }

    fn write_pred_weight_table(regs: &Registers, pred_weights: &H264PredWeights) {
        regs.write(
            h264_regs::SHS_WP,
            h264_regs::shs_wp_denoms(
                pred_weights.chroma_log2_weight_denom as u32,
                pred_weights.luma_log2_weight_denom as u32,
            ),
        );

        let pack = |weight: i16, offset: i16| {
            (((offset as u32) & 0x1ff) << 16) | ((weight as u32) & 0x1ff)
        };

        let mut words = Vec::with_capacity(2 * (32 + 64));
        for factors in &pred_weights.weight_factors {
            words.extend(
                factors.luma_weight.iter().zip(&factors.luma_offset).map(|(w, o)| pack(*w, *o)),
            );
            for (weights, offsets) in factors.chroma_weight.iter().zip(&factors.chroma_offset) {
                words.extend(weights.iter().zip(offsets).map(|(w, o)| pack(*w, *o)));
            }
        }

        regs.write_sram_words(SRAM, h264_regs::SRAM_PRED_WEIGHT_TABLE << 2, &words);
    }

    fn set_params(&self, ctx: &JobContext, job: &SliceJob) -> EngineResult<()> {
        let regs = ctx.regs;
        let (sps, pps, slice, decode) = (job.sps, job.pps, job.slice, job.decode);

        let (coded_addr, coded_size) = ctx.coded_dma()?;
        let coded_size = coded_size as u32;
        regs.write(h264_regs::VLD_OFFSET, 0);
        regs.write(h264_regs::VLD_LEN, coded_size * 8);
        regs.write(h264_regs::VLD_END, coded_addr.wrapping_add(coded_size));
        regs.write(
            h264_regs::VLD_ADDR,
            h264_regs::vld_addr_val(coded_addr)
                | h264_regs::VLD_ADDR_FIRST
                | h264_regs::VLD_ADDR_VALID
                | h264_regs::VLD_ADDR_LAST,
        );

        match &self.wide {
            Some((deblk, intra_pred)) => {
                regs.write(
                    regs::BUF_CTRL,
                    regs::BUF_CTRL_INTRAPRED_MIXED_RAM | regs::BUF_CTRL_DBLK_MIXED_RAM,
                );
                regs.write(regs::DBLK_DRAM_BUF_ADDR, deblk.bus_address());
                regs.write(regs::INTRAPRED_DRAM_BUF_ADDR, intra_pred.bus_address());
            }
            None => {
                regs.write(
                    regs::BUF_CTRL,
                    regs::BUF_CTRL_INTRAPRED_INT_SRAM | regs::BUF_CTRL_DBLK_INT_SRAM,
                );
            }
        }

        // Decoding breaks without a software decoder init, even though the headers are parsed
        // by the caller.
        regs.write(h264_regs::TRIGGER_TYPE, h264_regs::TRIGGER_TYPE_INIT_SWDEC);

        // Skipping through VLD_OFFSET is unreliable.
        skip_bits(regs, slice.header_bit_size)?;

        if job.pred_weights_required() {
            Self::write_pred_weight_table(regs, job.pred_weights);
        }

        let slice_type = slice.slice_type;
        if matches!(
            slice_type,
            H264SliceParams::TYPE_P | H264SliceParams::TYPE_SP | H264SliceParams::TYPE_B
        ) {
            let count = slice.num_ref_idx_l0_active_minus1 as usize + 1;
            let list = &slice.ref_pic_list0;
            Self::write_ref_list(ctx, job, list, count, h264_regs::SRAM_REF_LIST_0);
        }
        if slice_type == H264SliceParams::TYPE_B {
            let count = slice.num_ref_idx_l1_active_minus1 as usize + 1;
            let list = &slice.ref_pic_list1;
            Self::write_ref_list(ctx, job, list, count, h264_regs::SRAM_REF_LIST_1);
        }

        let pps_flags = PPS_FLAGS
            .iter()
            .fold(0, |acc, (flag, bit)| acc | regs::flag(pps.flags & flag != 0, *bit));
        regs.write(
            h264_regs::PPS,
            h264_regs::pps_ref_counts(
                slice.num_ref_idx_l0_active_minus1 as u32,
                slice.num_ref_idx_l1_active_minus1 as u32,
                pps.weighted_bipred_idc as u32,
            ) | pps_flags,
        );

        let sps_flags = SPS_FLAGS
            .iter()
            .fold(0, |acc, (flag, bit)| acc | regs::flag(sps.flags & flag != 0, *bit));
        regs.write(
            h264_regs::SPS,
            h264_regs::sps_dimensions(
                sps.chroma_format_idc as u32,
                sps.pic_width_in_mbs_minus1 as u32,
                sps.pic_height_in_map_units_minus1 as u32,
            ) | sps_flags,
        );

        let mbaff_pic =
            !job.is_field_pic() && sps.flags & H264Sps::FLAG_MB_ADAPTIVE_FRAME_FIELD != 0;
        let width_in_mbs = sps.pic_width_in_mbs_minus1 as u32 + 1;
        let mb_x = slice.first_mb_in_slice % width_in_mbs;
        let mb_y = (slice.first_mb_in_slice / width_in_mbs) * (mbaff_pic as u32 + 1);

        let decode_flag = |flag: u32, value: u32| regs::flag(decode.flags & flag != 0, value);
        regs.write(
            h264_regs::SHS,
            h264_regs::shs_position(mb_x, mb_y, slice_type as u32, slice.cabac_init_idc as u32)
                | regs::flag(decode.nal_ref_idc != 0, h264_regs::SHS_NAL_REF)
                | regs::flag(ctx.first_slice, h264_regs::SHS_FIRST_SLICE_IN_PIC)
                | decode_flag(H264DecodeParams::FLAG_FIELD_PIC, h264_regs::SHS_FIELD_PIC)
                | decode_flag(H264DecodeParams::FLAG_BOTTOM_FIELD, h264_regs::SHS_BOTTOM_FIELD)
                | regs::flag(
                    slice.flags & H264SliceParams::FLAG_DIRECT_SPATIAL_MV_PRED != 0,
                    h264_regs::SHS_DIRECT_SPATIAL_MV_PRED,
                ),
        );

        regs.write(
            h264_regs::SHS2,
            h264_regs::SHS2_NUM_REF_IDX_ACTIVE_OVRD
                | h264_regs::shs2_params(
                    slice.num_ref_idx_l0_active_minus1 as u32,
                    slice.num_ref_idx_l1_active_minus1 as u32,
                    slice.disable_deblocking_filter_idc as u32,
                    slice.slice_alpha_c0_offset_div2 as i32,
                    slice.slice_beta_offset_div2 as i32,
                ),
        );

        let slice_qp = pps.pic_init_qp_minus26 as i32 + 26 + slice.slice_qp_delta as i32;
        regs.write(
            h264_regs::SHS_QP,
            h264_regs::shs_qp(
                pps.second_chroma_qp_index_offset as i32,
                pps.chroma_qp_index_offset as i32,
                slice_qp,
            ) | regs::flag(
                    pps.flags & H264Pps::FLAG_SCALING_MATRIX_PRESENT == 0,
                    h264_regs::SHS_QP_SCALING_MATRIX_DEFAULT,
                ),
        );

        // Acknowledge whatever status is left over.
        let status = regs.read(h264_regs::STATUS);
        regs.write(h264_regs::STATUS, status);

        regs.write(h264_regs::CTRL, h264_regs::CTRL_INT_MASK);

        Ok(())
    }
}

impl EngineSession for H264Session {
    fn job_prepare(&mut self, ctx: &mut JobContext) -> EngineResult<()> {
        SliceJob::bind(ctx.controls).map(|_| ())
    }

    fn job_configure(&mut self, ctx: &mut JobContext) -> EngineResult<()> {
        let controls = ctx.controls;
        let job = SliceJob::bind(controls)?;
        let regs = ctx.regs;

        regs.write(h264_regs::SDROT_CTRL, 0);
        regs.write(h264_regs::EXTRA_BUFFER1, self.pic_info.bus_address());
        regs.write(h264_regs::EXTRA_BUFFER2, self.neighbor_info.bus_address());

        Self::write_scaling_lists(regs, &job);
        Self::write_frame_list(ctx, &job)?;
        self.set_params(ctx, &job)?;

        log::debug!(
            "H.264 slice type {} at MB {}, first {}",
            job.slice.slice_type,
            job.slice.first_mb_in_slice,
            ctx.first_slice
        );

        Ok(())
    }

    fn job_trigger(&mut self, ctx: &JobContext) {
        ctx.regs.write(h264_regs::TRIGGER_TYPE, h264_regs::TRIGGER_TYPE_AVC_SLICE_DECODE);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;
    use crate::context::QueueParams;
    use crate::dummy::DummyDevice;
    use crate::proc::FormatType;
    use crate::queue::flags;
    use crate::queue::BufferState;

    const FRAMEBUFFER_LIST: u32 = h264_regs::SRAM_FRAMEBUFFER_LIST << 2;

    fn streaming_context(dummy: &DummyDevice, pictures: usize) -> Context {
        let ctx = Context::new(&dummy.device, Role::Decoder).unwrap();
        let coded = Format {
            pixelformat: fourcc::H264_SLICE,
            width: 320,
            height: 240,
            sizeimage: 16 * 1024,
            ..Default::default()
        };
        ctx.set_format(FormatType::Coded, coded).unwrap();
        ctx.create_buffers(FormatType::Coded, 4, None).unwrap();
        ctx.create_buffers(FormatType::Picture, pictures, None).unwrap();
        ctx.stream_on(FormatType::Coded).unwrap();
        ctx.stream_on(FormatType::Picture).unwrap();
        dummy.registers.script_read(h264_regs::STATUS, h264_regs::STATUS_SLICE_DECODE_INT);

        ctx
    }

    fn sps() -> H264Sps {
        H264Sps {
            chroma_format_idc: 1,
            pic_width_in_mbs_minus1: 19,
            pic_height_in_map_units_minus1: 14,
            flags: H264Sps::FLAG_FRAME_MBS_ONLY | H264Sps::FLAG_DIRECT_8X8_INFERENCE,
            ..Default::default()
        }
    }

    fn reference(ts: u64) -> H264DpbEntry {
        H264DpbEntry {
            reference_ts: ts,
            flags: H264DpbEntry::FLAG_VALID | H264DpbEntry::FLAG_ACTIVE,
            ..Default::default()
        }
    }

    fn p_slice(references: &[u64]) -> (H264SliceParams, H264DecodeParams) {
        let mut slice = H264SliceParams {
            slice_type: if references.is_empty() {
                H264SliceParams::TYPE_I
            } else {
                H264SliceParams::TYPE_P
            },
            num_ref_idx_l0_active_minus1: references.len().saturating_sub(1) as u8,
            ..Default::default()
        };
        let mut decode = H264DecodeParams { nal_ref_idc: 1, ..Default::default() };

        for (i, ts) in references.iter().enumerate() {
            decode.dpb[i] = reference(*ts);
            slice.ref_pic_list0[i] =
                H264Reference { fields: H264Reference::FRAME_REF, index: i as u8 };
        }

        (slice, decode)
    }

    fn queue_slice(
        ctx: &Context,
        index: usize,
        timestamp: u64,
        slice: H264SliceParams,
        decode: H264DecodeParams,
        flags: u32,
    ) {
        let request = vec![
            ControlValue::H264Sps(sps()),
            ControlValue::H264SliceParams(Box::new(slice)),
            ControlValue::H264DecodeParams(Box::new(decode)),
        ];
        let params = QueueParams { bytesused: 512, timestamp, flags, request };
        ctx.queue_buffer(FormatType::Coded, index, params).unwrap();
    }

    fn position(ctx: &Context, index: usize) -> usize {
        ctx.with_buffer(FormatType::Picture, index, |b| h264_buffer(b).unwrap().position())
            .unwrap()
    }

    fn luma_address(ctx: &Context, index: usize) -> u32 {
        ctx.with_buffer(FormatType::Picture, index, |b| b.bus_address()).unwrap()
    }

    #[test]
    fn unmatched_reference_is_zeroed() {
        let _ = env_logger::try_init();

        let dummy = DummyDevice::new("allwinner,sun8i-h3-video-engine");
        let ctx = streaming_context(&dummy, 2);

        ctx.queue_buffer(FormatType::Picture, 0, QueueParams::default()).unwrap();
        let (slice, decode) = p_slice(&[999]);
        queue_slice(&ctx, 0, 1, slice, decode, 0);

        let r = &dummy.registers;
        assert_eq!(
            r.last_write(h264_regs::TRIGGER_TYPE),
            Some(h264_regs::TRIGGER_TYPE_AVC_SLICE_DECODE)
        );
        assert_eq!(r.last_write(h264_regs::OUTPUT_FRAME_IDX), Some(0));

        let transfers = r.sram_transfers(SRAM);
        let (_, ref_list) = transfers
            .iter()
            .find(|(position, _)| *position == h264_regs::SRAM_REF_LIST_0 << 2)
            .unwrap();
        assert_eq!(ref_list, &vec![0]);

        let (_, frame_list) =
            transfers.iter().find(|(position, _)| *position == FRAMEBUFFER_LIST).unwrap();
        assert_eq!(frame_list.len(), FRAME_NUM * SramRefPic::WORDS);
        assert_eq!(frame_list[3], luma_address(&ctx, 0));
        assert_ne!(frame_list[5], 0);
        assert!(frame_list[SramRefPic::WORDS..].iter().all(|&word| word == 0));

        dummy.device.handle_irq();
        let done = ctx.dequeue_buffer(FormatType::Picture).unwrap().unwrap();
        assert_eq!(done.state, BufferState::Done);
    }

    #[test]
    fn reference_slots_are_stable() {
        let _ = env_logger::try_init();

        let dummy = DummyDevice::new("allwinner,sun8i-h3-video-engine");
        let ctx = streaming_context(&dummy, 3);
        let decode_frame = |coded: usize, picture: usize, ts: u64, references: &[u64]| {
            dummy.registers.clear_writes();
            ctx.queue_buffer(FormatType::Picture, picture, QueueParams::default()).unwrap();
            let (slice, decode) = p_slice(references);
            queue_slice(&ctx, coded, ts, slice, decode, 0);
            let frame_list = dummy
                .registers
                .sram_transfers(SRAM)
                .into_iter()
                .find(|(position, _)| *position == FRAMEBUFFER_LIST)
                .map(|(_, words)| words)
                .unwrap();
            dummy.device.handle_irq();
            assert_eq!(ctx.dequeue_buffer(FormatType::Coded).unwrap().unwrap().index, coded);
            assert_eq!(ctx.dequeue_buffer(FormatType::Picture).unwrap().unwrap().index, picture);
            frame_list
        };

        decode_frame(0, 0, 10, &[]);
        assert_eq!(position(&ctx, 0), 0);

        decode_frame(1, 1, 20, &[10]);
        assert_eq!(position(&ctx, 1), 1);

        let frame_list = decode_frame(2, 2, 30, &[10, 20]);
        assert_eq!(position(&ctx, 2), 2);
        assert_eq!(position(&ctx, 1), 1);
        assert_eq!(frame_list[3], luma_address(&ctx, 0));
        assert_eq!(frame_list[SramRefPic::WORDS + 3], luma_address(&ctx, 1));
        assert_eq!(frame_list[2 * SramRefPic::WORDS + 3], luma_address(&ctx, 2));

        // The first picture left the DPB, its buffer takes the free slot again.
        let frame_list = decode_frame(3, 0, 40, &[20, 30]);
        assert_eq!(position(&ctx, 0), 0);
        assert_eq!(position(&ctx, 1), 1);
        assert_eq!(position(&ctx, 2), 2);
        assert_eq!(frame_list[SramRefPic::WORDS + 3], luma_address(&ctx, 1));
        assert_eq!(dummy.registers.last_write(h264_regs::OUTPUT_FRAME_IDX), Some(0));
    }

    #[test]
    fn slices_of_a_picture() {
        let dummy = DummyDevice::new("allwinner,sun8i-h3-video-engine");
        let ctx = streaming_context(&dummy, 2);
        let r = &dummy.registers;

        ctx.queue_buffer(FormatType::Picture, 0, QueueParams::default()).unwrap();
        let (slice, decode) = p_slice(&[]);
        queue_slice(&ctx, 0, 5, slice.clone(), decode.clone(), flags::HOLD_PICTURE);
        let shs = r.last_write(h264_regs::SHS).unwrap();
        assert_ne!(shs & h264_regs::SHS_FIRST_SLICE_IN_PIC, 0);
        dummy.device.handle_irq();
        assert!(ctx.dequeue_buffer(FormatType::Picture).unwrap().is_none());

        let slice = H264SliceParams { first_mb_in_slice: 45, ..slice };
        queue_slice(&ctx, 1, 5, slice, decode, 0);
        let shs = r.last_write(h264_regs::SHS).unwrap();
        assert_eq!(shs & h264_regs::SHS_FIRST_SLICE_IN_PIC, 0);
        let position = h264_regs::shs_position(5, 2, H264SliceParams::TYPE_I as u32, 0);
        assert_eq!(shs, position | h264_regs::SHS_NAL_REF);
        assert_eq!(r.last_write(h264_regs::OUTPUT_FRAME_IDX), Some(0));

        dummy.device.handle_irq();
        let done = ctx.dequeue_buffer(FormatType::Picture).unwrap().unwrap();
        assert_eq!((done.index, done.state), (0, BufferState::Done));
    }

    #[test]
    fn header_bits_are_flushed_in_chunks() {
        let dummy = DummyDevice::new("allwinner,sun8i-h3-video-engine");
        let regs_io = dummy.device.registers();

        skip_bits(regs_io, 70).unwrap();

        let flushes = dummy.registers.writes_to(h264_regs::TRIGGER_TYPE);
        let flush =
            |bits| h264_regs::TRIGGER_TYPE_FLUSH_BITS | h264_regs::trigger_type_n_bits(bits);
        assert_eq!(flushes, vec![flush(32), flush(32), flush(6)]);

        dummy.registers.script_read(h264_regs::STATUS, h264_regs::STATUS_VLD_BUSY);
        assert!(skip_bits(regs_io, 8).is_err());
    }

    #[test]
    fn weighted_prediction_table() {
        let dummy = DummyDevice::new("allwinner,sun8i-h3-video-engine");
        let mut pred_weights = H264PredWeights {
            luma_log2_weight_denom: 5,
            chroma_log2_weight_denom: 3,
            ..Default::default()
        };
        pred_weights.weight_factors[0].luma_weight[0] = 32;
        pred_weights.weight_factors[0].luma_offset[0] = -1;
        pred_weights.weight_factors[1].chroma_weight[0][1] = 8;

        H264Session::write_pred_weight_table(dummy.device.registers(), &pred_weights);

        let r = &dummy.registers;
        assert_eq!(r.last_write(h264_regs::SHS_WP), Some((3 << 4) | 5));
        let transfers = r.sram_transfers(SRAM);
        let (position, words) = &transfers[0];
        assert_eq!(*position, h264_regs::SRAM_PRED_WEIGHT_TABLE << 2);
        assert_eq!(words.len(), 2 * 96);
        assert_eq!(words[0], (0x1ff << 16) | 32);
        assert_eq!(words[96 + 32 + 1], 8);
    }

    #[test]
    fn side_buffer_sizes_grow_with_the_picture() {
        let flags = [
            0,
            H264Sps::FLAG_FRAME_MBS_ONLY,
            H264Sps::FLAG_FRAME_MBS_ONLY | H264Sps::FLAG_DIRECT_8X8_INFERENCE,
        ];
        let mut last_pic_info = 0;
        let mut last_mv_col = [0; 3];

        for size in (16..=3840).step_by(16) {
            let pic_info = pic_info_buf_size(size, size);
            assert!(pic_info >= last_pic_info);
            assert!(pic_info >= PIC_INFO_BUF_SIZE_MIN);
            last_pic_info = pic_info;

            for (last, flags) in last_mv_col.iter_mut().zip(flags) {
                let mv_col = mv_col_buf_size(size, size, flags);
                assert!(mv_col >= *last);
                *last = mv_col;
            }
        }

        assert_eq!(mv_col_buf_size(1920, 1080, flags[2]), 120 * 68 * 16 * 2);
        assert_eq!(pic_info_buf_size(1920, 1080), PIC_INFO_BUF_SIZE_MIN);
        assert_eq!(pic_info_buf_size(3840, 2160), 18 * 0x4000 + 2160 * 128);
    }

    #[test]
    fn extended_profile_is_rejected() {
        let store = ControlStore::new(CONTROLS);
        let extended = ControlValue::Integer(ControlId::H264Profile, PROFILE_EXTENDED);
        let high = ControlValue::Integer(ControlId::H264Profile, PROFILE_HIGH);

        assert!(H264Decoder.ctrl_validate(&store, &extended).is_err());
        assert!(H264Decoder.ctrl_validate(&store, &high).is_ok());
    }
}
