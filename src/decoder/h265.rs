// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! H.265 slice decoding.

use byteorder::ByteOrder;
use byteorder::LittleEndian;

use crate::controls::ControlConfig;
use crate::controls::ControlId;
use crate::controls::HevcDecodeParams;
use crate::controls::HevcDpbEntry;
use crate::controls::HevcPps;
use crate::controls::HevcScalingMatrix;
use crate::controls::HevcSliceParams;
use crate::controls::HevcSps;
use crate::controls::DECODE_MODE_SLICE_BASED;
use crate::controls::HEVC_DPB_ENTRIES_NUM_MAX;
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
use crate::regs::h265 as h265_regs;
use crate::regs::h265::flag_if;
use crate::Fourcc;

// Side buffer sizes of the early vendor libraries.
const NEIGHBOR_INFO_BUF_SIZE: usize = 794 * 1024;
const ENTRY_POINTS_BUF_SIZE: usize = 4 * 1024;
const MV_COL_BUF_UNIT_CTB_SIZE: usize = 160;

/// Frame info slot of the picture being decoded, right after the DPB entries.
const OUTPUT_FRAME_INDEX: u32 = HEVC_DPB_ENTRIES_NUM_MAX as u32;

const SRAM: SramPort = SramPort {
    offset: h265_regs::SRAM_OFFSET,
    data: h265_regs::SRAM_DATA,
};

const CONTROLS: &[ControlConfig] = &[
    ControlConfig::compound(ControlId::HevcSps),
    ControlConfig::compound(ControlId::HevcPps),
    ControlConfig::compound(ControlId::HevcScalingMatrix),
    ControlConfig::compound(ControlId::HevcSliceParams),
    ControlConfig::compound(ControlId::HevcEntryPointOffsets),
    ControlConfig::compound(ControlId::HevcDecodeParams),
    ControlConfig::integer(
        ControlId::HevcDecodeMode,
        DECODE_MODE_SLICE_BASED,
        DECODE_MODE_SLICE_BASED,
        DECODE_MODE_SLICE_BASED,
    ),
    ControlConfig::integer(
        ControlId::HevcStartCode,
        START_CODE_NONE,
        START_CODE_NONE,
        START_CODE_NONE,
    ),
];

const FRAME_SIZE: FrameSizeRange = FrameSizeRange {
    min_width: 16,
    max_width: 3840,
    step_width: 16,
    min_height: 16,
    max_height: 3840,
    step_height: 16,
};

const SPS_HDR_FLAGS: &[(u32, u64)] = &[
    (
        h265_regs::SPS_HDR_FLAG_STRONG_INTRA_SMOOTHING_ENABLE,
        HevcSps::FLAG_STRONG_INTRA_SMOOTHING_ENABLED,
    ),
    (h265_regs::SPS_HDR_FLAG_SPS_TEMPORAL_MVP_ENABLED, HevcSps::FLAG_SPS_TEMPORAL_MVP_ENABLED),
    (h265_regs::SPS_HDR_FLAG_SAMPLE_ADAPTIVE_OFFSET_ENABLED, HevcSps::FLAG_SAMPLE_ADAPTIVE_OFFSET),
    (h265_regs::SPS_HDR_FLAG_AMP_ENABLED, HevcSps::FLAG_AMP_ENABLED),
    (h265_regs::SPS_HDR_FLAG_SEPARATE_COLOUR_PLANE, HevcSps::FLAG_SEPARATE_COLOUR_PLANE),
];

const PCM_CTRL_FLAGS: &[(u32, u64)] = &[
    (h265_regs::PCM_CTRL_FLAG_PCM_ENABLED, HevcSps::FLAG_PCM_ENABLED),
    (h265_regs::PCM_CTRL_FLAG_PCM_LOOP_FILTER_DISABLED, HevcSps::FLAG_PCM_LOOP_FILTER_DISABLED),
];

const PPS_CTRL0_FLAGS: &[(u32, u64)] = &[
    (h265_regs::PPS_CTRL0_FLAG_CU_QP_DELTA_ENABLED, HevcPps::FLAG_CU_QP_DELTA_ENABLED),
    (h265_regs::PPS_CTRL0_FLAG_TRANSFORM_SKIP_ENABLED, HevcPps::FLAG_TRANSFORM_SKIP_ENABLED),
    (h265_regs::PPS_CTRL0_FLAG_CONSTRAINED_INTRA_PRED, HevcPps::FLAG_CONSTRAINED_INTRA_PRED),
    (h265_regs::PPS_CTRL0_FLAG_SIGN_DATA_HIDING_ENABLED, HevcPps::FLAG_SIGN_DATA_HIDING_ENABLED),
];

const PPS_CTRL1_FLAGS: &[(u32, u64)] = &[
    (
        h265_regs::PPS_CTRL1_FLAG_PPS_LOOP_FILTER_ACROSS_SLICES_ENABLED,
        HevcPps::FLAG_PPS_LOOP_FILTER_ACROSS_SLICES_ENABLED,
    ),
    (
        h265_regs::PPS_CTRL1_FLAG_LOOP_FILTER_ACROSS_TILES_ENABLED,
        HevcPps::FLAG_LOOP_FILTER_ACROSS_TILES_ENABLED,
    ),
    (
        h265_regs::PPS_CTRL1_FLAG_ENTROPY_CODING_SYNC_ENABLED,
        HevcPps::FLAG_ENTROPY_CODING_SYNC_ENABLED,
    ),
    (h265_regs::PPS_CTRL1_FLAG_TILES_ENABLED, HevcPps::FLAG_TILES_ENABLED),
    (
        h265_regs::PPS_CTRL1_FLAG_TRANSQUANT_BYPASS_ENABLED,
        HevcPps::FLAG_TRANSQUANT_BYPASS_ENABLED,
    ),
    (h265_regs::PPS_CTRL1_FLAG_WEIGHTED_BIPRED, HevcPps::FLAG_WEIGHTED_BIPRED),
    (h265_regs::PPS_CTRL1_FLAG_WEIGHTED_PRED, HevcPps::FLAG_WEIGHTED_PRED),
];

const SLICE_HDR_INFO0_FLAGS: &[(u32, u64)] = &[
    (h265_regs::SLICE_HDR_INFO0_FLAG_COLLOCATED_FROM_L0, HevcSliceParams::FLAG_COLLOCATED_FROM_L0),
    (h265_regs::SLICE_HDR_INFO0_FLAG_CABAC_INIT, HevcSliceParams::FLAG_CABAC_INIT),
    (h265_regs::SLICE_HDR_INFO0_FLAG_MVD_L1_ZERO, HevcSliceParams::FLAG_MVD_L1_ZERO),
    (h265_regs::SLICE_HDR_INFO0_FLAG_SLICE_SAO_CHROMA, HevcSliceParams::FLAG_SLICE_SAO_CHROMA),
    (h265_regs::SLICE_HDR_INFO0_FLAG_SLICE_SAO_LUMA, HevcSliceParams::FLAG_SLICE_SAO_LUMA),
    (
        h265_regs::SLICE_HDR_INFO0_FLAG_SLICE_TEMPORAL_MVP_ENABLE,
        HevcSliceParams::FLAG_SLICE_TEMPORAL_MVP_ENABLED,
    ),
    (
        h265_regs::SLICE_HDR_INFO0_FLAG_DEPENDENT_SLICE_SEGMENT,
        HevcSliceParams::FLAG_DEPENDENT_SLICE_SEGMENT,
    ),
];

const SLICE_HDR_INFO1_FLAGS: &[(u32, u64)] = &[
    (
        h265_regs::SLICE_HDR_INFO1_FLAG_SLICE_DEBLOCKING_FILTER_DISABLED,
        HevcSliceParams::FLAG_SLICE_DEBLOCKING_FILTER_DISABLED,
    ),
    (
        h265_regs::SLICE_HDR_INFO1_FLAG_SLICE_LOOP_FILTER_ACROSS_SLICES_ENABLED,
        HevcSliceParams::FLAG_SLICE_LOOP_FILTER_ACROSS_SLICES_ENABLED,
    ),
];

fn map_flags(table: &[(u32, u64)], flags: u64) -> u32 {
    table.iter().fold(0, |acc, (reg_flag, ctrl_flag)| acc | flag_if(*reg_flag, *ctrl_flag, flags))
}

/// Size of the co-located motion vector buffer of a picture.
///
/// Addresses are given to the hardware without their low bits, hence the extra KiB for
/// alignment.
pub fn mv_col_buf_size(width: u32, height: u32, ctb_size: u32) -> usize {
    width.div_ceil(ctb_size) as usize * height.div_ceil(ctb_size) as usize
        * MV_COL_BUF_UNIT_CTB_SIZE
        + 1024
}

/// Number of bits to skip after the byte preceding the slice data, given that byte.
///
/// The byte ends the slice header with the RBSP stop bit followed by alignment zero bits: the
/// hardware bit cursor must end up right after the stop bit.
pub fn slice_data_skip_bits(padding: u8) -> EngineResult<u32> {
    if padding == 0 {
        return Err(EngineError::InvalidBitstream(
            "no stop bit before the slice data".into(),
        ));
    }

    Ok(8 - (padding.trailing_zeros() + 1))
}

/// Transposes a square scaling list of `size` by `size` coefficients.
///
/// The SRAM expects the column-major order of the row-major lists. The transform is its own
/// inverse.
pub fn scaling_list_transpose(list: &[u8], size: usize) -> Vec<u8> {
    let mut transposed = vec![0; size * size];

    for (i, &coefficient) in list.iter().take(size * size).enumerate() {
        let (row, column) = (i / size, i % size);
        transposed[column * size + row] = coefficient;
    }

    transposed
}

/// SRAM image of a scaling matrix: the 8x8, 32x32, 16x16 then 4x4 lists.
fn scaling_lists_sram(matrix: &HevcScalingMatrix) -> Vec<u8> {
    let mut sram = Vec::with_capacity(14 * 64 + 6 * 16);

    // Only the 8x8 coefficients of the larger lists are signalled in the stream.
    let lists_8x8 = matrix
        .scaling_list_8x8
        .iter()
        .chain(&matrix.scaling_list_32x32)
        .chain(&matrix.scaling_list_16x16);
    for list in lists_8x8 {
        sram.extend(scaling_list_transpose(list, 8));
    }
    for list in &matrix.scaling_list_4x4 {
        sram.extend(scaling_list_transpose(list, 4));
    }

    sram
}

/// Position of the current slice within the tile grid, and the entry point table.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct TileLayout {
    pub start: u32,
    pub end: u32,
    /// Words of the entry points buffer.
    pub entry_points: Vec<u32>,
}

/// Cursor over the tile grid of a picture.
struct TileCursor<'a> {
    pps: &'a HevcPps,
    /// Position of the tile, in coding tree blocks.
    x: u32,
    y: u32,
    /// Position of the tile, in tiles.
    tx: usize,
    ty: usize,
}

impl<'a> TileCursor<'a> {
    fn columns(&self) -> usize {
        self.pps.num_tile_columns_minus1 as usize + 1
    }

    fn rows(&self) -> usize {
        self.pps.num_tile_rows_minus1 as usize + 1
    }

    fn column_width(&self, tx: usize) -> u32 {
        self.pps.column_width_minus1.get(tx).map_or(0, |&w| w as u32)
    }

    fn row_height(&self, ty: usize) -> u32 {
        self.pps.row_height_minus1.get(ty).map_or(0, |&h| h as u32)
    }

    /// Locates the tile holding a coding tree block.
    fn locate(pps: &'a HevcPps, ctb_x: u32, ctb_y: u32) -> Self {
        let mut cursor = Self { pps, x: 0, y: 0, tx: 0, ty: 0 };

        while cursor.tx < cursor.columns() {
            let width = cursor.column_width(cursor.tx) + 1;
            if cursor.x + width > ctb_x {
                break;
            }
            cursor.x += width;
            cursor.tx += 1;
        }

        while cursor.ty < cursor.rows() {
            let height = cursor.row_height(cursor.ty) + 1;
            if cursor.y + height > ctb_y {
                break;
            }
            cursor.y += height;
            cursor.ty += 1;
        }

        cursor
    }

    /// Moves to the next tile in raster order.
    fn advance(&mut self) {
        if self.tx + 1 >= self.columns() {
            self.y += self.row_height(self.ty) + 1;
            self.x = 0;
            self.tx = 0;
            self.ty += 1;
        } else {
            self.x += self.column_width(self.tx) + 1;
            self.tx += 1;
        }
    }

    fn start(&self) -> u32 {
        h265_regs::tile_ctb(self.x, self.y)
    }

    fn end(&self) -> u32 {
        h265_regs::tile_ctb(self.x + self.column_width(self.tx), self.y + self.row_height(self.ty))
    }
}

/// Computes the tile registers and entry point table of a slice starting at a coding tree block.
pub fn tile_layout(pps: &HevcPps, entry_points: &[u32], ctb_x: u32, ctb_y: u32) -> TileLayout {
    let mut cursor = TileCursor::locate(pps, ctb_x, ctb_y);
    let mut layout = TileLayout { start: cursor.start(), end: cursor.end(), ..Default::default() };

    if pps.flags & HevcPps::FLAG_ENTROPY_CODING_SYNC_ENABLED != 0 {
        layout.entry_points = entry_points.to_vec();
    } else {
        // Each tile entry point also carries the bounds of its tile.
        for &offset in entry_points {
            cursor.advance();
            layout.entry_points.extend([offset, 0, cursor.start(), cursor.end()]);
        }
    }

    layout
}

/// H.265 data of a picture buffer.
#[derive(Default)]
pub struct H265Buffer {
    /// Allocated by the first job decoding into the buffer.
    mv_col: Option<Box<dyn DmaBuffer>>,
}

impl H265Buffer {
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

fn h265_buffer(buffer: &Buffer) -> Option<&H265Buffer> {
    match buffer.engine_buffer() {
        Some(EngineBuffer::H265(h265)) => Some(h265),
        _ => None,
    }
}

/// Advances the bitstream by `bits` bits, 32 at most per trigger.
fn skip_bits(regs: &Registers, bits: u32) -> EngineResult<()> {
    let mut count = 0;

    while count < bits {
        let chunk = (bits - count).min(32);

        regs.write(
            h265_regs::TRIGGER,
            h265_regs::TRIGGER_FLUSH_BITS | h265_regs::trigger_n_bits(chunk),
        );
        regs.poll_cleared(h265_regs::STATUS, h265_regs::STATUS_VLD_BUSY)?;

        count += chunk;
    }

    Ok(())
}

/// Peeks at the next `bits` bits of the bitstream.
fn show_bits(regs: &Registers, bits: u32) -> EngineResult<u32> {
    regs.write(h265_regs::TRIGGER, h265_regs::TRIGGER_SHOW_BITS | h265_regs::trigger_n_bits(bits));
    regs.poll_cleared(h265_regs::STATUS, h265_regs::STATUS_VLD_BUSY)?;

    Ok(regs.read(h265_regs::BITS_READ))
}

pub struct H265Decoder;

impl Engine for H265Decoder {
    fn codec(&self) -> Codec {
        Codec::H265
    }

    fn role(&self) -> Role {
        Role::Decoder
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::H265_DEC
    }

    fn pixelformat(&self) -> Fourcc {
        fourcc::HEVC_SLICE
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

    fn format_prepare(&self, _formats: &Formats, format: &mut Format) -> EngineResult<()> {
        decoder::format_coded_prepare(self, format)
    }

    fn format_configure(&self, regs: &Registers, formats: &Formats) -> EngineResult<()> {
        decoder::format_coded_configure(regs, formats)
    }

    fn setup(&self, ctx: &SetupContext) -> EngineResult<Box<dyn EngineSession>> {
        Ok(Box::new(H265Session {
            neighbor_info: ctx.allocator.allocate(NEIGHBOR_INFO_BUF_SIZE)?,
            entry_points: ctx.allocator.allocate(ENTRY_POINTS_BUF_SIZE)?,
        }))
    }

    fn buffer_setup(&self, _ctx: &SetupContext, buffer: &mut Buffer) -> EngineResult<()> {
        buffer.engine = Some(EngineBuffer::H265(H265Buffer::default()));

        Ok(())
    }

    fn irq_status(&self, regs: &Registers) -> IrqStatus {
        let status = regs.read(h265_regs::STATUS) & h265_regs::STATUS_CHECK_MASK;

        if status == 0 {
            IrqStatus::None
        } else if status & h265_regs::STATUS_SUCCESS == 0
            || status & h265_regs::STATUS_CHECK_ERROR != 0
        {
            IrqStatus::Error
        } else {
            IrqStatus::Success
        }
    }

    fn irq_clear(&self, regs: &Registers) {
        regs.write(h265_regs::STATUS, h265_regs::STATUS_CHECK_MASK);
    }

    fn irq_disable(&self, regs: &Registers) {
        let value = regs.read(h265_regs::CTRL) & !h265_regs::CTRL_IRQ_MASK;
        regs.write(h265_regs::CTRL, value);
    }
}

struct H265Session {
    neighbor_info: Box<dyn DmaBuffer>,
    entry_points: Box<dyn DmaBuffer>,
}

struct SliceJob<'a> {
    sps: &'a HevcSps,
    pps: &'a HevcPps,
    scaling_matrix: &'a HevcScalingMatrix,
    slice: &'a HevcSliceParams,
    entry_points: &'a [u32],
    decode: &'a HevcDecodeParams,
}

impl<'a> SliceJob<'a> {
    fn bind(ctx: &JobContext<'a>) -> EngineResult<Self> {
        let controls = ctx.controls;
        let entry_points: &Vec<u32> = controls.ctrl_data()?;

        Ok(Self {
            sps: controls.ctrl_data()?,
            pps: controls.ctrl_data()?,
            scaling_matrix: controls.ctrl_data()?,
            slice: controls.ctrl_data()?,
            entry_points,
            decode: controls.ctrl_data()?,
        })
    }

    /// Whether none of the references follows the current picture in output order.
    fn is_low_delay(&self) -> bool {
        let poc = self.decode.pic_order_cnt_val;
        let precedes = |index: &u8| {
            self.decode.dpb.get(*index as usize).map_or(true, |dpb| dpb.pic_order_cnt_val <= poc)
        };

        let active = |minus1: u8| (minus1 as usize + 1).min(HEVC_DPB_ENTRIES_NUM_MAX);

        let l0 = &self.slice.ref_idx_l0[..active(self.slice.num_ref_idx_l0_active_minus1)];
        if !l0.iter().all(precedes) {
            return false;
        }

        if self.slice.slice_type != HevcSliceParams::TYPE_B {
            return true;
        }

        let l1 = &self.slice.ref_idx_l1[..active(self.slice.num_ref_idx_l1_active_minus1)];
        l1.iter().all(precedes)
    }
}

/// Frame info entry of a picture.
fn frame_info_words(
    ctx: &JobContext,
    buffer: &Buffer,
    field_pic: bool,
    top_pic_order_cnt: i32,
    bottom_pic_order_cnt: i32,
) -> [u32; 6] {
    let picture = ctx.picture_plane_dma(buffer);
    let (mv_col_top, mv_col_bottom) = h265_buffer(buffer).map_or((0, 0), H265Buffer::mv_col_dma);

    let (bottom_pic_order_cnt, mv_col_bottom) = if field_pic {
        (bottom_pic_order_cnt, mv_col_bottom)
    } else {
        (top_pic_order_cnt, mv_col_top)
    };

    [
        top_pic_order_cnt as u32,
        bottom_pic_order_cnt as u32,
        h265_regs::addr_base(mv_col_top),
        h265_regs::addr_base(mv_col_bottom),
        h265_regs::addr_base(picture.luma),
        h265_regs::addr_base(picture.chroma),
    ]
}

fn write_frame_info(regs: &Registers, index: u32, words: &[u32; 6]) {
    let offset = h265_regs::SRAM_OFFSET_FRAME_INFO + h265_regs::SRAM_OFFSET_FRAME_INFO_UNIT * index;
    regs.write_sram_words(SRAM, offset, words);
}

/// Writes a reference picture list, four entries per word.
fn write_ref_pic_list(regs: &Registers, dpb: &[HevcDpbEntry], list: &[u8], offset: u32) {
    let entries: Vec<u8> = list
        .iter()
        .map(|&index| match dpb.get(index as usize) {
            Some(entry) if entry.flags & HevcDpbEntry::FLAG_LONG_TERM_REFERENCE != 0 => {
                index | h265_regs::SRAM_REF_PIC_LIST_LT_REF
            }
            _ => index,
        })
        .collect();

    regs.write_sram(SRAM, offset, &entries);
}

/// Weighted prediction tables of one reference list.
struct PredWeights<'a> {
    delta_luma_weight: &'a [i8],
    luma_offset: &'a [i8],
    delta_chroma_weight: &'a [[i8; 2]],
    chroma_offset: &'a [[i8; 2]],
}

impl PredWeights<'_> {
    /// Writes the luma weights of two references per word, then the weights of both chroma
    /// components of one reference per word.
    fn write(&self, regs: &Registers, count: usize, luma_offset: u32, chroma_offset: u32) {
        let count = count.min(self.delta_luma_weight.len());

        let luma: Vec<u8> = self.delta_luma_weight[..count]
            .iter()
            .zip(self.luma_offset)
            .flat_map(|(&weight, &offset)| [weight as u8, offset as u8])
            .collect();
        regs.write_sram(SRAM, luma_offset, &luma);

        let chroma: Vec<u8> = self.delta_chroma_weight[..count]
            .iter()
            .zip(self.chroma_offset)
            .flat_map(|(weights, offsets)| {
                [weights[0] as u8, offsets[0] as u8, weights[1] as u8, offsets[1] as u8]
            })
            .collect();
        regs.write_sram(SRAM, chroma_offset, &chroma);
    }
}

impl H265Session {
    /// Allocates the motion vector buffer of the output picture on its first use.
    fn alloc_mv_col(ctx: &mut JobContext, ctb_size: u32) -> EngineResult<()> {
        let coded = &ctx.formats.coded;
        let size = mv_col_buf_size(coded.width, coded.height, ctb_size);
        let allocator = ctx.allocator;

        let picture = ctx.picture_buffer_mut()?;
        let Some(EngineBuffer::H265(h265)) = picture.engine_buffer_mut() else {
            return Err(anyhow::anyhow!("picture buffer without H.265 data").into());
        };

        if h265.mv_col.is_none() {
            h265.mv_col = Some(allocator.allocate(size)?);
        }

        Ok(())
    }

    fn write_tiles(&mut self, regs: &Registers, job: &SliceJob, ctb_x: u32, ctb_y: u32) {
        let pps = job.pps;
        let tiled =
            HevcPps::FLAG_TILES_ENABLED | HevcPps::FLAG_ENTROPY_CODING_SYNC_ENABLED;

        if pps.flags & tiled == 0 {
            regs.write(h265_regs::TILE_START_CTB, 0);
            regs.write(h265_regs::TILE_END_CTB, 0);
            return;
        }

        let count = job.slice.num_entry_point_offsets as usize;
        let entry_points = &job.entry_points[..count.min(job.entry_points.len())];
        let layout = tile_layout(pps, entry_points, ctb_x, ctb_y);

        regs.write(h265_regs::TILE_START_CTB, layout.start);
        regs.write(h265_regs::TILE_END_CTB, layout.end);

        let buffer = self.entry_points.as_mut_slice();
        let words = layout.entry_points.len().min(buffer.len() / 4);
        LittleEndian::write_u32_into(&layout.entry_points[..words], &mut buffer[..words * 4]);
    }

    fn write_scaling_matrix(regs: &Registers, matrix: &HevcScalingMatrix) {
        let dc_16x16 = &matrix.scaling_list_dc_coef_16x16;
        let dc_32x32 = &matrix.scaling_list_dc_coef_32x32;

        regs.write(
            h265_regs::SCALING_LIST_DC_COEF0,
            u32::from_le_bytes([dc_16x16[0], dc_16x16[1], dc_32x32[0], dc_32x32[1]]),
        );
        regs.write(
            h265_regs::SCALING_LIST_DC_COEF1,
            u32::from_le_bytes([dc_16x16[2], dc_16x16[3], dc_16x16[4], dc_16x16[5]]),
        );

        regs.write_sram(SRAM, h265_regs::SRAM_OFFSET_SCALING_LISTS, &scaling_lists_sram(matrix));
    }

    /// Positions the bitstream cursor at the first bit of the slice data.
    fn seek_slice_data(regs: &Registers, slice: &HevcSliceParams) -> EngineResult<()> {
        if slice.data_byte_offset == 0 {
            return Err(EngineError::InvalidBitstream("slice header size is unknown".into()));
        }

        skip_bits(regs, (slice.data_byte_offset - 1) * 8)?;

        let padding = show_bits(regs, 8)? as u8;
        skip_bits(regs, slice_data_skip_bits(padding)?)
    }

    fn write_headers(regs: &Registers, ctx: &JobContext, job: &SliceJob) {
        let (sps, pps, slice) = (job.sps, job.pps, job.slice);

        regs.write(
            h265_regs::NAL_HDR,
            h265_regs::nal_hdr(slice.nal_unit_type as u32, slice.nuh_temporal_id_plus1 as u32),
        );

        regs.write(
            h265_regs::SPS_HDR,
            h265_regs::sps_hdr_max_transform_hierarchy_depth_intra(
                sps.max_transform_hierarchy_depth_intra as u32,
            ) | h265_regs::sps_hdr_max_transform_hierarchy_depth_inter(
                sps.max_transform_hierarchy_depth_inter as u32,
            ) | h265_regs::sps_hdr_log2_diff_max_min_transform_block_size(
                sps.log2_diff_max_min_luma_transform_block_size as u32,
            ) | h265_regs::sps_hdr_log2_min_transform_block_size_minus2(
                sps.log2_min_luma_transform_block_size_minus2 as u32,
            ) | h265_regs::sps_hdr_log2_diff_max_min_luma_coding_block_size(
                sps.log2_diff_max_min_luma_coding_block_size as u32,
            ) | h265_regs::sps_hdr_log2_min_luma_coding_block_size_minus3(
                sps.log2_min_luma_coding_block_size_minus3 as u32,
            ) | h265_regs::sps_hdr_bit_depth_chroma_minus8(sps.bit_depth_chroma_minus8 as u32)
                | h265_regs::sps_hdr_bit_depth_luma_minus8(sps.bit_depth_luma_minus8 as u32)
                | h265_regs::sps_hdr_chroma_format_idc(sps.chroma_format_idc as u32)
                | map_flags(SPS_HDR_FLAGS, sps.flags),
        );

        regs.write(
            h265_regs::PCM_CTRL,
            h265_regs::pcm_ctrl(
                sps.pcm_sample_bit_depth_chroma_minus1 as u32,
                sps.pcm_sample_bit_depth_luma_minus1 as u32,
                sps.log2_diff_max_min_pcm_luma_coding_block_size as u32,
                sps.log2_min_pcm_luma_coding_block_size_minus3 as u32,
            ) | map_flags(PCM_CTRL_FLAGS, sps.flags),
        );

        regs.write(
            h265_regs::PPS_CTRL0,
            h265_regs::pps_ctrl0(
                pps.pps_cr_qp_offset as i32,
                pps.pps_cb_qp_offset as i32,
                pps.init_qp_minus26 as i32,
                pps.diff_cu_qp_delta_depth as u32,
            ) | map_flags(PPS_CTRL0_FLAGS, pps.flags),
        );

        regs.write(
            h265_regs::PPS_CTRL1,
            h265_regs::pps_ctrl1_log2_parallel_merge_level_minus2(
                pps.log2_parallel_merge_level_minus2 as u32,
            ) | map_flags(PPS_CTRL1_FLAGS, pps.flags),
        );

        let mut info0 = h265_regs::slice_hdr_info0(
            slice.pic_struct as u32,
            slice.five_minus_max_num_merge_cand as u32,
            slice.num_ref_idx_l1_active_minus1 as u32,
            slice.num_ref_idx_l0_active_minus1 as u32,
            slice.collocated_ref_idx as u32,
            slice.colour_plane_id as u32,
            slice.slice_type as u32,
        ) | map_flags(SLICE_HDR_INFO0_FLAGS, slice.flags);
        if ctx.first_slice {
            info0 |= h265_regs::SLICE_HDR_INFO0_FLAG_FIRST_SLICE_SEGMENT_IN_PIC;
        }
        regs.write(h265_regs::SLICE_HDR_INFO0, info0);

        // Set for inter slices that only reference preceding pictures.
        let mut info1 = h265_regs::slice_hdr_info1(
            slice.slice_tc_offset_div2 as i32,
            slice.slice_beta_offset_div2 as i32,
            slice.slice_cr_qp_offset as i32,
            slice.slice_cb_qp_offset as i32,
            slice.slice_qp_delta as i32,
        ) | map_flags(SLICE_HDR_INFO1_FLAGS, slice.flags);
        if slice.slice_type != HevcSliceParams::TYPE_I && job.is_low_delay() {
            info1 |= h265_regs::SLICE_HDR_INFO1_FLAG_SLICE_NOT_LOW_DELAY;
        }
        regs.write(h265_regs::SLICE_HDR_INFO1, info1);

        let pred_weight_table = &slice.pred_weight_table;
        let luma_log2_weight_denom = pred_weight_table.luma_log2_weight_denom as u32;
        let chroma_log2_weight_denom = (pred_weight_table.luma_log2_weight_denom as i32
            + pred_weight_table.delta_chroma_log2_weight_denom as i32)
            as u32;
        regs.write(
            h265_regs::SLICE_HDR_INFO2,
            h265_regs::slice_hdr_info2(
                slice.num_entry_point_offsets,
                chroma_log2_weight_denom,
                luma_log2_weight_denom,
            ),
        );
    }

    fn write_references(ctx: &JobContext, job: &SliceJob) {
        let regs = ctx.regs;
        let (pps, slice, decode) = (job.pps, job.slice, job.decode);
        let table = &slice.pred_weight_table;

        let active = (decode.num_active_dpb_entries as usize).min(HEVC_DPB_ENTRIES_NUM_MAX);
        for (index, dpb) in decode.dpb[..active].iter().enumerate() {
            let Some(buffer) = ctx
                .find_picture(dpb.timestamp)
                .and_then(|index| ctx.picture_queue.buffer(index))
            else {
                log::warn!("no picture buffer for reference timestamp {}", dpb.timestamp);
                continue;
            };

            let words = frame_info_words(
                ctx,
                buffer,
                dpb.field_pic != 0,
                dpb.pic_order_cnt_val,
                dpb.pic_order_cnt_val,
            );
            write_frame_info(regs, index as u32, &words);
        }

        if slice.slice_type != HevcSliceParams::TYPE_I {
            let count = slice.num_ref_idx_l0_active_minus1 as usize + 1;
            write_ref_pic_list(
                regs,
                &decode.dpb,
                &slice.ref_idx_l0[..count.min(HEVC_DPB_ENTRIES_NUM_MAX)],
                h265_regs::SRAM_OFFSET_REF_PIC_LIST0,
            );

            if pps.flags & (HevcPps::FLAG_WEIGHTED_PRED | HevcPps::FLAG_WEIGHTED_BIPRED) != 0 {
                let weights = PredWeights {
                    delta_luma_weight: &table.delta_luma_weight_l0,
                    luma_offset: &table.luma_offset_l0,
                    delta_chroma_weight: &table.delta_chroma_weight_l0,
                    chroma_offset: &table.chroma_offset_l0,
                };
                weights.write(
                    regs,
                    count,
                    h265_regs::SRAM_OFFSET_PRED_WEIGHT_LUMA_L0,
                    h265_regs::SRAM_OFFSET_PRED_WEIGHT_CHROMA_L0,
                );
            }
        }

        if slice.slice_type == HevcSliceParams::TYPE_B {
            let count = slice.num_ref_idx_l1_active_minus1 as usize + 1;
            write_ref_pic_list(
                regs,
                &decode.dpb,
                &slice.ref_idx_l1[..count.min(HEVC_DPB_ENTRIES_NUM_MAX)],
                h265_regs::SRAM_OFFSET_REF_PIC_LIST1,
            );

            if pps.flags & HevcPps::FLAG_WEIGHTED_BIPRED != 0 {
                let weights = PredWeights {
                    delta_luma_weight: &table.delta_luma_weight_l1,
                    luma_offset: &table.luma_offset_l1,
                    delta_chroma_weight: &table.delta_chroma_weight_l1,
                    chroma_offset: &table.chroma_offset_l1,
                };
                weights.write(
                    regs,
                    count,
                    h265_regs::SRAM_OFFSET_PRED_WEIGHT_LUMA_L1,
                    h265_regs::SRAM_OFFSET_PRED_WEIGHT_CHROMA_L1,
                );
            }
        }
    }
}

impl EngineSession for H265Session {
    fn job_prepare(&mut self, ctx: &mut JobContext) -> EngineResult<()> {
        SliceJob::bind(ctx).map(|_| ())
    }

    fn job_configure(&mut self, ctx: &mut JobContext) -> EngineResult<()> {
        let job = SliceJob::bind(ctx)?;
        let (sps, slice) = (job.sps, job.slice);
        let regs = ctx.regs;

        // The slice and the entry point array must agree when the slice has entry points.
        let num_entry_point_offsets = slice.num_entry_point_offsets as usize;
        if num_entry_point_offsets != 0 && num_entry_point_offsets != job.entry_points.len() {
            return Err(EngineError::Range(format!(
                "{} entry points announced, {} provided",
                num_entry_point_offsets,
                job.entry_points.len()
            )));
        }

        sps.validate()?;
        let ctb_size = sps.ctb_size();
        let width_in_ctb = (sps.pic_width_in_luma_samples as u32).div_ceil(ctb_size).max(1);

        Self::alloc_mv_col(ctx, ctb_size)?;

        let (coded_addr, coded_size) = ctx.coded_dma()?;
        let coded_size = u32::try_from(coded_size)
            .map_err(|_| EngineError::Range(format!("coded payload of {} bytes", coded_size)))?;
        regs.write(h265_regs::BITS_OFFSET, 0);
        regs.write(h265_regs::BITS_LEN, coded_size.saturating_mul(8));
        regs.write(
            h265_regs::BITS_ADDR,
            h265_regs::addr_base(coded_addr)
                | h265_regs::BITS_ADDR_VALID_SLICE_DATA
                | h265_regs::BITS_ADDR_LAST_SLICE_DATA
                | h265_regs::BITS_ADDR_FIRST_SLICE_DATA,
        );
        let coded_end = coded_addr.wrapping_add(coded_size);
        regs.write(h265_regs::BITS_END_ADDR, h265_regs::addr_base(coded_end));

        let ctb_x = slice.slice_segment_addr % width_in_ctb;
        let ctb_y = slice.slice_segment_addr / width_in_ctb;
        regs.write(h265_regs::CTB_ADDR, h265_regs::ctb_addr(ctb_x, ctb_y));

        self.write_tiles(regs, &job, ctb_x, ctb_y);

        if ctx.first_slice {
            regs.write(h265_regs::CTB_NUM, 0);
        }

        regs.write(h265_regs::TRIGGER, h265_regs::TRIGGER_INIT_SWDEC);
        Self::seek_slice_data(regs, slice)?;

        Self::write_headers(regs, ctx, &job);

        regs.write(
            h265_regs::ENTRY_POINT_OFFSET_ADDR,
            h265_regs::addr_base(self.entry_points.bus_address()),
        );

        let coded = &ctx.formats.coded;
        regs.write(h265_regs::PIC_SIZE, h265_regs::pic_size(coded.width, coded.height));

        if sps.flags & HevcSps::FLAG_SCALING_LIST_ENABLED != 0 {
            Self::write_scaling_matrix(regs, job.scaling_matrix);
            regs.write(h265_regs::SCALING_LIST_CTRL0, h265_regs::SCALING_LIST_CTRL0_FLAG_ENABLED);
        } else {
            regs.write(h265_regs::SCALING_LIST_CTRL0, h265_regs::SCALING_LIST_CTRL0_DEFAULT);
        }

        regs.write(
            h265_regs::NEIGHBOR_INFO_ADDR,
            h265_regs::addr_base(self.neighbor_info.bus_address()),
        );

        let picture = ctx.picture_buffer()?;
        let words = frame_info_words(
            ctx,
            picture,
            slice.pic_struct != 0,
            slice.slice_pic_order_cnt,
            slice.slice_pic_order_cnt,
        );
        Self::write_references(ctx, &job);
        write_frame_info(regs, OUTPUT_FRAME_INDEX, &words);
        regs.write(h265_regs::OUTPUT_FRAME_IDX, OUTPUT_FRAME_INDEX);

        regs.write(h265_regs::CTRL, h265_regs::CTRL_IRQ_MASK);

        log::debug!(
            "H.265 slice type {} at CTB ({}, {}), first {}",
            slice.slice_type,
            ctb_x,
            ctb_y,
            ctx.first_slice
        );

        Ok(())
    }

    fn job_trigger(&mut self, ctx: &JobContext) {
        ctx.regs.write(h265_regs::TRIGGER, h265_regs::TRIGGER_DEC_SLICE);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;
    use crate::context::ContextError;
    use crate::context::QueueParams;
    use crate::controls::ControlValue;
    use crate::dummy::DummyDevice;
    use crate::proc::FormatType;
    use crate::queue::BufferState;
    use crate::supervisor::IrqReturn;

    fn streaming_context(dummy: &DummyDevice) -> Context {
        let ctx = Context::new(&dummy.device, Role::Decoder).unwrap();
        let coded = Format {
            pixelformat: fourcc::HEVC_SLICE,
            width: 1920,
            height: 1080,
            sizeimage: 64 * 1024,
            ..Default::default()
        };
        ctx.set_format(FormatType::Coded, coded).unwrap();
        ctx.create_buffers(FormatType::Coded, 2, None).unwrap();
        ctx.create_buffers(FormatType::Picture, 2, None).unwrap();
        ctx.stream_on(FormatType::Coded).unwrap();
        ctx.stream_on(FormatType::Picture).unwrap();

        ctx
    }

    fn sps() -> HevcSps {
        HevcSps {
            pic_width_in_luma_samples: 1920,
            pic_height_in_luma_samples: 1080,
            log2_min_luma_coding_block_size_minus3: 0,
            log2_diff_max_min_luma_coding_block_size: 3,
            chroma_format_idc: 1,
            ..Default::default()
        }
    }

    fn queue_slice(ctx: &Context, pps: HevcPps, slice: HevcSliceParams, entry_points: Vec<u32>) {
        let request = vec![
            ControlValue::HevcSps(sps()),
            ControlValue::HevcPps(pps),
            ControlValue::HevcSliceParams(Box::new(slice)),
            ControlValue::HevcEntryPointOffsets(entry_points),
        ];
        let params = QueueParams { bytesused: 2048, timestamp: 3, flags: 0, request };
        ctx.queue_buffer(FormatType::Picture, 0, QueueParams::default()).unwrap();
        ctx.queue_buffer(FormatType::Coded, 0, params).unwrap();
    }

    #[test]
    fn stop_bit_position() {
        for k in 0..8 {
            assert_eq!(slice_data_skip_bits(1 << k).unwrap(), 8 - (k + 1));
            // Bits above the stop bit belong to the slice header.
            assert_eq!(slice_data_skip_bits(0xff << k).unwrap(), 8 - (k + 1));
        }

        assert!(matches!(slice_data_skip_bits(0), Err(EngineError::InvalidBitstream(_))));
    }

    #[test]
    fn scaling_list_transpose_is_a_bijection() {
        let mut state = 0x2545_f491u32;
        for size in [4, 8] {
            for _ in 0..64 {
                // Fisher-Yates shuffle of the coefficient positions.
                let mut list: Vec<u8> = (0..(size * size) as u8).collect();
                for i in (1..list.len()).rev() {
                    state ^= state << 13;
                    state ^= state >> 17;
                    state ^= state << 5;
                    list.swap(i, state as usize % (i + 1));
                }

                let transposed = scaling_list_transpose(&list, size);
                let mut sorted = transposed.clone();
                sorted.sort_unstable();
                assert_eq!(sorted, (0..(size * size) as u8).collect::<Vec<_>>());
                assert_eq!(scaling_list_transpose(&transposed, size), list);
            }
        }
    }

    #[test]
    fn scaling_list_sram_order() {
        let mut matrix = HevcScalingMatrix::default();
        matrix.scaling_list_8x8[0][1] = 7;
        matrix.scaling_list_4x4[5][4] = 9;

        let sram = scaling_lists_sram(&matrix);

        assert_eq!(sram.len(), 14 * 64 + 6 * 16);
        // The second coefficient of the first row lands at the start of the second column.
        assert_eq!(sram[8], 7);
        assert_eq!(sram[14 * 64 + 5 * 16 + 1], 9);
    }

    #[test]
    fn tiles_disabled() {
        let _ = env_logger::try_init();

        let dummy = DummyDevice::new("allwinner,sun50i-h6-video-engine");
        let ctx = streaming_context(&dummy);
        dummy.registers.script_read(h265_regs::BITS_READ, 0x01);
        dummy.registers.script_read(h265_regs::STATUS, h265_regs::STATUS_SUCCESS);

        let slice = HevcSliceParams {
            data_byte_offset: 4,
            slice_type: HevcSliceParams::TYPE_I,
            slice_segment_addr: 35,
            ..Default::default()
        };
        queue_slice(&ctx, HevcPps::default(), slice, Vec::new());

        let r = &dummy.registers;
        assert_eq!(r.last_write(h265_regs::TILE_START_CTB), Some(0));
        assert_eq!(r.last_write(h265_regs::TILE_END_CTB), Some(0));
        assert_eq!(r.last_write(h265_regs::CTB_ADDR), Some(h265_regs::ctb_addr(5, 1)));
        assert_eq!(r.last_write(h265_regs::CTB_NUM), Some(0));
        assert_eq!(r.last_write(h265_regs::OUTPUT_FRAME_IDX), Some(OUTPUT_FRAME_INDEX));
        assert_eq!(r.last_write(h265_regs::TRIGGER), Some(h265_regs::TRIGGER_DEC_SLICE));

        // Three bytes of slice header, then seven bits after the stop bit.
        let flush = |bits| h265_regs::TRIGGER_FLUSH_BITS | h265_regs::trigger_n_bits(bits);
        let triggers = r.writes_to(h265_regs::TRIGGER);
        assert_eq!(
            triggers,
            vec![
                h265_regs::TRIGGER_INIT_SWDEC,
                flush(24),
                h265_regs::TRIGGER_SHOW_BITS | h265_regs::trigger_n_bits(8),
                flush(7),
                h265_regs::TRIGGER_DEC_SLICE,
            ]
        );

        let info0 = r.last_write(h265_regs::SLICE_HDR_INFO0).unwrap();
        assert_ne!(info0 & h265_regs::SLICE_HDR_INFO0_FLAG_FIRST_SLICE_SEGMENT_IN_PIC, 0);

        dummy.device.handle_irq();
        let done = ctx.dequeue_buffer(FormatType::Picture).unwrap().unwrap();
        assert_eq!(done.state, BufferState::Done);
    }

    #[test]
    fn entry_point_count_mismatch() {
        let dummy = DummyDevice::new("allwinner,sun50i-h6-video-engine");
        let ctx = streaming_context(&dummy);
        dummy.registers.script_read(h265_regs::BITS_READ, 0x80);

        let pps =
            HevcPps { flags: HevcPps::FLAG_ENTROPY_CODING_SYNC_ENABLED, ..Default::default() };
        let slice = HevcSliceParams {
            data_byte_offset: 4,
            num_entry_point_offsets: 3,
            ..Default::default()
        };
        queue_slice(&ctx, pps, slice, vec![100, 200]);

        assert!(dummy.registers.writes_to(h265_regs::TRIGGER).is_empty());
        let done = ctx.dequeue_buffer(FormatType::Picture).unwrap().unwrap();
        assert_eq!(done.state, BufferState::Error);
    }

    #[test]
    fn missing_stop_bit_fails_the_job() {
        let dummy = DummyDevice::new("allwinner,sun50i-h6-video-engine");
        let ctx = streaming_context(&dummy);
        dummy.registers.script_read(h265_regs::BITS_READ, 0);

        let slice = HevcSliceParams { data_byte_offset: 4, ..Default::default() };
        queue_slice(&ctx, HevcPps::default(), slice, Vec::new());

        let r = &dummy.registers;
        assert_ne!(r.last_write(h265_regs::TRIGGER), Some(h265_regs::TRIGGER_DEC_SLICE));
        let done = ctx.dequeue_buffer(FormatType::Picture).unwrap().unwrap();
        assert_eq!(done.state, BufferState::Error);
    }

    #[test]
    fn low_delay_ignores_references_past_the_list() {
        let sps = sps();
        let pps = HevcPps::default();
        let scaling_matrix = HevcScalingMatrix::default();
        let mut decode = HevcDecodeParams { pic_order_cnt_val: 8, ..Default::default() };
        decode.dpb[1].pic_order_cnt_val = 12;
        let mut slice = HevcSliceParams {
            slice_type: HevcSliceParams::TYPE_P,
            num_ref_idx_l0_active_minus1: 200,
            ..Default::default()
        };
        slice.ref_idx_l0[15] = 1;

        let job = SliceJob {
            sps: &sps,
            pps: &pps,
            scaling_matrix: &scaling_matrix,
            slice: &slice,
            entry_points: &[],
            decode: &decode,
        };
        assert!(!job.is_low_delay());

        let mut preceding = slice.clone();
        preceding.ref_idx_l0[15] = 0;
        let job = SliceJob { slice: &preceding, ..job };
        assert!(job.is_low_delay());
    }

    #[test]
    fn foreign_interrupt_keeps_the_deadline() {
        let dummy = DummyDevice::new("allwinner,sun50i-h6-video-engine");
        let ctx = streaming_context(&dummy);
        dummy.registers.script_read(h265_regs::BITS_READ, 0x01);
        dummy.registers.script_read(h265_regs::STATUS, 0);

        let slice = HevcSliceParams {
            data_byte_offset: 4,
            slice_type: HevcSliceParams::TYPE_I,
            ..Default::default()
        };
        queue_slice(&ctx, HevcPps::default(), slice, Vec::new());
        let deadline = dummy.device.watchdog.deadline().unwrap();

        // The engine raised nothing, the interrupt belongs to another device.
        std::thread::sleep(std::time::Duration::from_millis(2));
        assert_eq!(dummy.device.handle_irq(), IrqReturn::None);
        assert_eq!(dummy.device.watchdog.deadline(), Some(deadline));
        assert!(ctx.dequeue_buffer(FormatType::Picture).unwrap().is_none());

        dummy.registers.script_read(h265_regs::STATUS, h265_regs::STATUS_SUCCESS);
        assert_eq!(dummy.device.handle_irq(), IrqReturn::Handled);
        let done = ctx.dequeue_buffer(FormatType::Picture).unwrap().unwrap();
        assert_eq!(done.state, BufferState::Done);
    }

    #[test]
    fn oversized_reference_lists_are_refused() {
        let dummy = DummyDevice::new("allwinner,sun50i-h6-video-engine");
        let ctx = streaming_context(&dummy);
        dummy.registers.script_read(h265_regs::BITS_READ, 0x01);
        dummy.registers.script_read(h265_regs::STATUS, h265_regs::STATUS_SUCCESS);

        let slice = HevcSliceParams {
            data_byte_offset: 4,
            slice_type: HevcSliceParams::TYPE_P,
            num_ref_idx_l0_active_minus1: 20,
            ..Default::default()
        };
        let request = vec![ControlValue::HevcSliceParams(Box::new(slice))];
        let params = QueueParams { bytesused: 2048, timestamp: 3, flags: 0, request };
        ctx.queue_buffer(FormatType::Picture, 0, QueueParams::default()).unwrap();
        assert!(matches!(
            ctx.queue_buffer(FormatType::Coded, 0, params),
            Err(ContextError::Engine(EngineError::Range(_)))
        ));

        let huge_ctb = HevcSps { log2_diff_max_min_luma_coding_block_size: 40, ..sps() };
        let request = vec![ControlValue::HevcSps(huge_ctb)];
        let params = QueueParams { bytesused: 2048, timestamp: 3, flags: 0, request };
        assert!(ctx.queue_buffer(FormatType::Coded, 0, params).is_err());
        assert!(dummy.registers.writes_to(h265_regs::TRIGGER).is_empty());

        // Both buffers are still usable for a valid slice.
        let slice = HevcSliceParams {
            data_byte_offset: 4,
            slice_type: HevcSliceParams::TYPE_I,
            ..Default::default()
        };
        let request = vec![
            ControlValue::HevcSps(sps()),
            ControlValue::HevcSliceParams(Box::new(slice)),
        ];
        let params = QueueParams { bytesused: 2048, timestamp: 3, flags: 0, request };
        ctx.queue_buffer(FormatType::Coded, 0, params).unwrap();

        dummy.device.handle_irq();
        let done = ctx.dequeue_buffer(FormatType::Picture).unwrap().unwrap();
        assert_eq!(done.state, BufferState::Done);
    }

    fn tiled_pps(flags: u64) -> HevcPps {
        let mut pps = HevcPps {
            num_tile_columns_minus1: 2,
            num_tile_rows_minus1: 1,
            flags: HevcPps::FLAG_TILES_ENABLED | flags,
            ..Default::default()
        };
        pps.column_width_minus1[..3].copy_from_slice(&[9, 9, 9]);
        pps.row_height_minus1[..2].copy_from_slice(&[8, 7]);

        pps
    }

    #[test]
    fn tile_entry_points_walk_the_grid() {
        let pps = tiled_pps(0);

        // Second tile of the first row.
        let layout = tile_layout(&pps, &[100, 200, 300], 12, 0);

        assert_eq!(layout.start, h265_regs::tile_ctb(10, 0));
        assert_eq!(layout.end, h265_regs::tile_ctb(19, 8));
        assert_eq!(
            layout.entry_points,
            vec![
                100,
                0,
                h265_regs::tile_ctb(20, 0),
                h265_regs::tile_ctb(29, 8),
                200,
                0,
                h265_regs::tile_ctb(0, 9),
                h265_regs::tile_ctb(9, 16),
                300,
                0,
                h265_regs::tile_ctb(10, 9),
                h265_regs::tile_ctb(19, 16),
            ]
        );
    }

    #[test]
    fn wavefront_entry_points_are_raw_offsets() {
        let pps = tiled_pps(HevcPps::FLAG_ENTROPY_CODING_SYNC_ENABLED);

        let layout = tile_layout(&pps, &[100, 200], 25, 10);

        assert_eq!(layout.start, h265_regs::tile_ctb(20, 9));
        assert_eq!(layout.entry_points, vec![100, 200]);
    }

    #[test]
    fn mv_col_buffer_sizes_grow_with_the_picture() {
        let mut last = 0;
        for size in (16..=3840).step_by(16) {
            let mv_col = mv_col_buf_size(size, size, 64);
            assert!(mv_col >= last);
            last = mv_col;
        }

        assert_eq!(mv_col_buf_size(1920, 1080, 64), 30 * 17 * 160 + 1024);
    }

    #[test]
    fn irq_status_classification() {
        let dummy = DummyDevice::new("allwinner,sun50i-h6-video-engine");
        let regs = dummy.device.registers();
        let r = &dummy.registers;

        assert_eq!(H265Decoder.irq_status(regs), IrqStatus::None);
        r.script_read(h265_regs::STATUS, h265_regs::STATUS_SUCCESS | h265_regs::STATUS_VLD_BUSY);
        assert_eq!(H265Decoder.irq_status(regs), IrqStatus::Success);
        r.script_read(h265_regs::STATUS, h265_regs::STATUS_SUCCESS | (1 << 2));
        assert_eq!(H265Decoder.irq_status(regs), IrqStatus::Error);
        r.script_read(h265_regs::STATUS, 1 << 1);
        assert_eq!(H265Decoder.irq_status(regs), IrqStatus::Error);
    }
}
