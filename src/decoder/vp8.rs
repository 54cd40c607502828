// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! VP8 frame decoding, through the VP8 mode of the H.264 decoding block.
//!
//! The boolean decoder of the block cannot start in the middle of the first partition, so the
//! frame header is replayed through it before the macroblock data. The values it returns are only
//! used to follow the syntax: the parsed header comes from the frame control.

use crate::controls::ControlConfig;
use crate::controls::ControlId;
use crate::controls::Vp8Frame;
use crate::controls::Vp8LoopFilter;
use crate::controls::Vp8Segment;
use crate::decoder;
use crate::decoder::h264;
use crate::device::Capabilities;
use crate::device::Registers;
use crate::dma::DmaBuffer;
use crate::engine::Codec;
use crate::engine::Engine;
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
use crate::regs::h264 as h264_regs;
use crate::regs::vp8 as vp8_regs;
use crate::Fourcc;

const CONTROLS: &[ControlConfig] = &[ControlConfig::compound(ControlId::Vp8Frame)];

const FRAME_SIZE: FrameSizeRange = FrameSizeRange {
    min_width: 16,
    max_width: 3840,
    step_width: 16,
    min_height: 16,
    max_height: 3840,
    step_height: 16,
};

/// Uncompressed data chunk: frame tag, then start code and dimensions on key frames.
const KEY_FRAME_HEADER_SIZE: u32 = 10;
const INTER_FRAME_HEADER_SIZE: u32 = 3;

/// Probability of literal values.
const LITERAL_PROBABILITY: u32 = 128;

const MV_UPDATE_PROBS: [[u8; 19]; 2] = [
    [237, 246, 253, 253, 254, 254, 254, 254, 254, 254, 254, 254, 254, 254, 250, 250, 252, 254, 254],
    [231, 243, 245, 253, 254, 254, 254, 254, 254, 254, 254, 254, 254, 254, 251, 251, 254, 254, 254],
];

/// Reads of the hardware boolean decoder.
struct BoolDecoder<'a> {
    regs: &'a Registers,
}

impl BoolDecoder<'_> {
    fn read(&self, bits: u32, probability: u32) -> EngineResult<u32> {
        self.regs.write(
            h264_regs::TRIGGER_TYPE,
            vp8_regs::TRIGGER_TYPE_VP8_GET_BITS
                | vp8_regs::trigger_type_bin_lens(bits)
                | vp8_regs::trigger_type_probability(probability),
        );
        self.regs.poll_cleared(h264_regs::STATUS, h264_regs::STATUS_VLD_BUSY)?;

        Ok(self.regs.read(h264_regs::BASIC_BITS))
    }

    fn literal(&self, bits: u32) -> EngineResult<u32> {
        self.read(bits, LITERAL_PROBABILITY)
    }

    fn flag(&self) -> EngineResult<bool> {
        Ok(self.literal(1)? != 0)
    }

    /// Skips an optional value made of a magnitude and a sign.
    fn optional_signed(&self, bits: u32) -> EngineResult<()> {
        if self.flag()? {
            self.literal(bits)?;
            self.literal(1)?;
        }

        Ok(())
    }

    fn segmentation(&self) -> EngineResult<()> {
        if !self.flag()? {
            return Ok(());
        }

        let update_map = self.flag()?;
        let update_data = self.flag()?;

        if update_data {
            // Absolute or delta values.
            self.literal(1)?;
            for _ in 0..4 {
                self.optional_signed(7)?;
            }
            for _ in 0..4 {
                self.optional_signed(6)?;
            }
        }

        if update_map {
            for _ in 0..3 {
                if self.flag()? {
                    self.literal(8)?;
                }
            }
        }

        Ok(())
    }

    fn loop_filter_deltas(&self) -> EngineResult<()> {
        if self.flag()? && self.flag()? {
            for _ in 0..8 {
                self.optional_signed(6)?;
            }
        }

        Ok(())
    }

    fn reference_updates(&self) -> EngineResult<()> {
        let refresh_golden = self.flag()?;
        let refresh_alt = self.flag()?;

        if !refresh_golden {
            self.literal(2)?;
        }
        if !refresh_alt {
            self.literal(2)?;
        }

        // Sign biases.
        self.literal(1)?;
        self.literal(1)?;

        Ok(())
    }

    /// Replays the header up to the coefficient probability updates.
    fn frame_header(&self, key_frame: bool) -> EngineResult<()> {
        if key_frame {
            // Color space and clamping type.
            self.literal(1)?;
            self.literal(1)?;
        }

        self.segmentation()?;

        // Filter type, level and sharpness.
        self.literal(1)?;
        self.literal(6)?;
        self.literal(3)?;
        self.loop_filter_deltas()?;

        // Number of DCT partitions.
        self.literal(2)?;

        // Quantizer indices.
        self.literal(7)?;
        for _ in 0..5 {
            self.optional_signed(4)?;
        }

        if !key_frame {
            self.reference_updates()?;
        }

        // Refresh entropy probabilities.
        self.literal(1)?;
        if !key_frame {
            // Refresh last frame.
            self.literal(1)?;
        }

        Ok(())
    }

    /// Replays the header from the coefficient probability updates to the macroblock data.
    fn mode_probabilities(&self, frame: &Vp8Frame) -> EngineResult<()> {
        if frame.flags & Vp8Frame::FLAG_MB_NO_SKIP_COEFF != 0 {
            self.literal(8)?;
        }

        if frame.is_key_frame() {
            return Ok(());
        }

        // Intra, last and golden probabilities.
        for _ in 0..3 {
            self.literal(8)?;
        }

        // Intra 16x16 then chroma mode probabilities.
        for count in [4, 3] {
            if self.flag()? {
                for _ in 0..count {
                    self.literal(8)?;
                }
            }
        }

        for probabilities in &MV_UPDATE_PROBS {
            for &probability in probabilities {
                if self.read(1, probability as u32)? != 0 {
                    self.literal(7)?;
                }
            }
        }

        Ok(())
    }
}

/// Fills the entropy probability buffer with the probabilities of a frame.
fn write_entropy_probs(frame: &Vp8Frame, probs: &mut [u8]) {
    let header = [
        frame.prob_skip_false,
        frame.prob_intra,
        frame.prob_last,
        frame.prob_gf,
        frame.segment.segment_probs[0],
        frame.segment.segment_probs[1],
        frame.segment.segment_probs[2],
    ];
    let entropy = &frame.entropy;

    let sections: [(usize, &[u8]); 4] = [
        (vp8_regs::ENTROPY_PROBS_HEADER, &header),
        (vp8_regs::ENTROPY_PROBS_Y_MODE, &entropy.y_mode_probs),
        (vp8_regs::ENTROPY_PROBS_UV_MODE, &entropy.uv_mode_probs),
        (vp8_regs::ENTROPY_PROBS_MV, &entropy.mv_probs.concat()),
    ];
    for (offset, data) in sections {
        if let Some(dst) = probs.get_mut(offset..offset + data.len()) {
            dst.copy_from_slice(data);
        }
    }

    let coeff_probs = entropy.coeff_probs.iter().flatten().flatten();
    for (i, set) in coeff_probs.enumerate() {
        let offset = vp8_regs::ENTROPY_PROBS_COEFF + i * vp8_regs::ENTROPY_PROBS_COEFF_STRIDE;
        if let Some(dst) = probs.get_mut(offset..offset + set.len()) {
            dst.copy_from_slice(set);
        }
    }
}

/// Motion compensation filter and full pixel mode of a bitstream version.
fn version_filter(version: u8) -> (u32, bool) {
    match version {
        0 => (0, false),
        1 | 2 => (1, false),
        _ => (1, true),
    }
}

/// Packs four signed segment feature values, first element in the low byte.
fn segment_features(values: [i8; 4]) -> u32 {
    u32::from_le_bytes(values.map(|value| value as u8))
}

pub struct Vp8Decoder;

impl Engine for Vp8Decoder {
    fn codec(&self) -> Codec {
        Codec::Vp8
    }

    fn role(&self) -> Role {
        Role::Decoder
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::VP8_DEC
    }

    fn pixelformat(&self) -> Fourcc {
        fourcc::VP8_FRAME
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
        Ok(Box::new(Vp8Session {
            entropy_probs: ctx.allocator.allocate(vp8_regs::ENTROPY_PROBS_SIZE)?,
            last_p_frame: false,
            last_filter_simple: false,
            last_sharpness_level: 0,
        }))
    }

    fn irq_status(&self, regs: &Registers) -> IrqStatus {
        h264::irq_status(regs)
    }

    fn irq_clear(&self, regs: &Registers) {
        h264::irq_clear(regs)
    }

    fn irq_disable(&self, regs: &Registers) {
        h264::irq_disable(regs)
    }
}

struct Vp8Session {
    entropy_probs: Box<dyn DmaBuffer>,
    /// Loop filter state of the previous frame, used by the filter of the current one.
    last_p_frame: bool,
    last_filter_simple: bool,
    last_sharpness_level: u8,
}

impl Vp8Session {
    fn pps(&self, frame: &Vp8Frame) -> u32 {
        let lf = &frame.lf;
        let segment_flag = |mask| frame.segment.flags & mask != 0;
        let lf_flag = |mask| lf.flags & mask != 0;
        let (filter_type, full_pixel) = version_filter(frame.version);

        vp8_regs::PpsFields {
            p_frame: !frame.is_key_frame(),
            last_sharpness_level: self.last_sharpness_level as u32,
            last_p_frame: self.last_p_frame,
            altref_sign_bias: frame.flags & Vp8Frame::FLAG_SIGN_BIAS_ALT != 0,
            golden_sign_bias: frame.flags & Vp8Frame::FLAG_SIGN_BIAS_GOLDEN != 0,
            refresh_entropy_probs: true,
            mb_no_coeff_skip: frame.flags & Vp8Frame::FLAG_MB_NO_SKIP_COEFF != 0,
            token_partitions: (frame.num_dct_parts.max(1) as u32).trailing_zeros(),
            mode_ref_lf_delta_update: lf_flag(Vp8LoopFilter::FLAG_DELTA_UPDATE),
            mode_ref_lf_delta_enable: lf_flag(Vp8LoopFilter::FLAG_ADJ_ENABLE),
            loop_filter_level: lf.level as u32,
            loop_filter_simple: lf_flag(Vp8LoopFilter::FLAG_FILTER_TYPE_SIMPLE),
            sharpness_level: lf.sharpness_level as u32,
            last_loop_filter_simple: self.last_filter_simple,
            segmentation_enable: segment_flag(Vp8Segment::FLAG_ENABLED),
            segment_abs_delta: !segment_flag(Vp8Segment::FLAG_DELTA_VALUE_MODE),
            update_segmentation_map: segment_flag(Vp8Segment::FLAG_UPDATE_MAP),
            full_pixel,
            filter_type,
            color_space: false,
        }
        .value()
    }

    fn write_references(ctx: &JobContext, frame: &Vp8Frame) -> EngineResult<()> {
        let regs = ctx.regs;
        let output = ctx.picture_dma()?;

        regs.write(vp8_regs::REC_LUMA, output.luma);
        regs.write(vp8_regs::REC_CHROMA, output.chroma);

        let references = [
            (frame.last_frame_ts, vp8_regs::FWD_LUMA, vp8_regs::FWD_CHROMA),
            (frame.golden_frame_ts, vp8_regs::BWD_LUMA, vp8_regs::BWD_CHROMA),
            (frame.alt_frame_ts, vp8_regs::ALT_LUMA, vp8_regs::ALT_CHROMA),
        ];
        for (timestamp, luma, chroma) in references {
            let dma = ctx.picture_ref_dma(timestamp);
            if dma.luma == 0 && !frame.is_key_frame() {
                log::warn!("no picture buffer for reference timestamp {}", timestamp);
            }
            regs.write(luma, dma.luma);
            regs.write(chroma, dma.chroma);
        }

        Ok(())
    }
}

impl EngineSession for Vp8Session {
    fn job_prepare(&mut self, ctx: &mut JobContext) -> EngineResult<()> {
        ctx.controls.ctrl_data::<Vp8Frame>().map(|_| ())
    }

    fn job_configure(&mut self, ctx: &mut JobContext) -> EngineResult<()> {
        let frame: &Vp8Frame = ctx.controls.ctrl_data()?;
        let regs = ctx.regs;
        let key_frame = frame.is_key_frame();

        write_entropy_probs(frame, self.entropy_probs.as_mut_slice());

        regs.write(
            h264_regs::CTRL,
            vp8_regs::CTRL_VP8 | h264_regs::CTRL_DECODE_ERR_INT | h264_regs::CTRL_SLICE_DECODE_INT,
        );

        let width = frame.width as u32;
        let height = frame.height as u32;
        regs.write(vp8_regs::PICSIZE, vp8_regs::frame_size(width, height));
        regs.write(
            vp8_regs::FSIZE,
            vp8_regs::frame_size(width.div_ceil(16), height.div_ceil(16)),
        );

        let header_size =
            if key_frame { KEY_FRAME_HEADER_SIZE } else { INTER_FRAME_HEADER_SIZE };
        regs.write(vp8_regs::FIRST_DATA_PART_LEN, frame.first_part_size * 8);
        regs.write(vp8_regs::PART_SIZE_OFFSET, frame.first_part_size + header_size);

        let (coded_addr, coded_size) = ctx.coded_dma()?;
        let coded_size = coded_size as u32;
        regs.write(h264_regs::VLD_LEN, coded_size * 8);
        regs.write(h264_regs::VLD_OFFSET, header_size * 8);
        regs.write(h264_regs::VLD_END, coded_addr + coded_size);
        regs.write(
            h264_regs::VLD_ADDR,
            h264_regs::vld_addr_val(coded_addr)
                | h264_regs::VLD_ADDR_FIRST
                | h264_regs::VLD_ADDR_VALID
                | h264_regs::VLD_ADDR_LAST,
        );

        regs.write(h264_regs::TRIGGER_TYPE, h264_regs::TRIGGER_TYPE_INIT_SWDEC);

        regs.write(vp8_regs::ENTROPY_PROBS_ADDR, self.entropy_probs.bus_address());

        let reader = BoolDecoder { regs };
        reader.frame_header(key_frame)?;

        regs.write(h264_regs::TRIGGER_TYPE, vp8_regs::TRIGGER_TYPE_VP8_UPDATE_COEF);
        regs.poll_cleared(h264_regs::STATUS, vp8_regs::STATUS_VP8_UPPROB_BUSY)?;
        regs.write(h264_regs::STATUS, h264_regs::CTRL_INT_MASK);

        reader.mode_probabilities(frame)?;

        regs.write(vp8_regs::PPS, self.pps(frame));

        let quant = &frame.quant;
        regs.write(
            vp8_regs::QP_INDEX_DELTA,
            vp8_regs::qp_index_delta(
                quant.uv_ac_delta as i32,
                quant.uv_dc_delta as i32,
                quant.y2_ac_delta as i32,
                quant.y2_dc_delta as i32,
            ),
        );
        regs.write(
            vp8_regs::QP_INDEX,
            vp8_regs::qp_index(quant.y_dc_delta as i32, quant.y_ac_qi as u32),
        );

        regs.write(vp8_regs::SEGMENT_FEAT_MB_LV0, segment_features(frame.segment.quant_update));
        regs.write(vp8_regs::SEGMENT_FEAT_MB_LV1, segment_features(frame.segment.lf_update));
        regs.write(vp8_regs::REF_LF_DELTA, vp8_regs::lf_deltas(frame.lf.ref_frm_delta));
        regs.write(vp8_regs::MODE_LF_DELTA, vp8_regs::lf_deltas(frame.lf.mb_mode_delta));

        Self::write_references(ctx, frame)?;

        self.last_p_frame = !key_frame;
        self.last_filter_simple = frame.lf.flags & Vp8LoopFilter::FLAG_FILTER_TYPE_SIMPLE != 0;
        self.last_sharpness_level = frame.lf.sharpness_level;

        log::debug!("VP8 {} frame {}x{}", if key_frame { "key" } else { "inter" }, width, height);

        Ok(())
    }

    fn job_trigger(&mut self, ctx: &JobContext) {
        ctx.regs.write(h264_regs::TRIGGER_TYPE, vp8_regs::TRIGGER_TYPE_VP8_SLICE_DECODE);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;
    use crate::context::QueueParams;
    use crate::controls::ControlValue;
    use crate::dummy::DummyDevice;
    use crate::proc::FormatType;
    use crate::queue::BufferState;

    fn streaming_context(dummy: &DummyDevice) -> Context {
        let ctx = Context::new(&dummy.device, Role::Decoder).unwrap();
        let coded = Format {
            pixelformat: fourcc::VP8_FRAME,
            width: 320,
            height: 240,
            sizeimage: 16 * 1024,
            ..Default::default()
        };
        ctx.set_format(FormatType::Coded, coded).unwrap();
        ctx.create_buffers(FormatType::Coded, 2, None).unwrap();
        ctx.create_buffers(FormatType::Picture, 2, None).unwrap();
        ctx.stream_on(FormatType::Coded).unwrap();
        ctx.stream_on(FormatType::Picture).unwrap();
        dummy.registers.script_read(h264_regs::STATUS, h264_regs::STATUS_SLICE_DECODE_INT);

        ctx
    }

    fn queue_frame(ctx: &Context, index: usize, timestamp: u64, frame: Vp8Frame) {
        let params = QueueParams {
            bytesused: 1024,
            timestamp,
            flags: 0,
            request: vec![ControlValue::Vp8Frame(Box::new(frame))],
        };
        ctx.queue_buffer(FormatType::Picture, index, QueueParams::default()).unwrap();
        ctx.queue_buffer(FormatType::Coded, index, params).unwrap();
    }

    fn key_frame() -> Vp8Frame {
        Vp8Frame {
            width: 320,
            height: 240,
            first_part_size: 200,
            num_dct_parts: 1,
            flags: Vp8Frame::FLAG_KEY_FRAME | Vp8Frame::FLAG_SHOW_FRAME,
            lf: Vp8LoopFilter { level: 20, sharpness_level: 3, ..Default::default() },
            ..Default::default()
        }
    }

    /// Boolean decoder reads issued before and after the coefficient probability updates.
    fn header_reads(dummy: &DummyDevice) -> (usize, usize) {
        let triggers = dummy.registers.writes_to(h264_regs::TRIGGER_TYPE);
        let split = triggers
            .iter()
            .position(|&t| t == vp8_regs::TRIGGER_TYPE_VP8_UPDATE_COEF)
            .unwrap();
        let is_read = |t: &&u32| **t & 0xff == vp8_regs::TRIGGER_TYPE_VP8_GET_BITS;

        (
            triggers[..split].iter().filter(is_read).count(),
            triggers[split..].iter().filter(is_read).count(),
        )
    }

    #[test]
    fn key_frame_header_replay() {
        let _ = env_logger::try_init();

        let dummy = DummyDevice::new("allwinner,sun8i-h3-video-engine");
        let ctx = streaming_context(&dummy);
        dummy.registers.script_read(h264_regs::BASIC_BITS, 0);

        let mut frame = key_frame();
        frame.prob_skip_false = 42;
        frame.flags |= Vp8Frame::FLAG_MB_NO_SKIP_COEFF;
        queue_frame(&ctx, 0, 1, frame);

        assert_eq!(header_reads(&dummy), (15, 1));

        let r = &dummy.registers;
        assert_eq!(r.last_write(h264_regs::VLD_OFFSET), Some(KEY_FRAME_HEADER_SIZE * 8));
        assert_eq!(r.last_write(vp8_regs::PART_SIZE_OFFSET), Some(210));
        assert_eq!(r.last_write(vp8_regs::FIRST_DATA_PART_LEN), Some(1600));
        assert_eq!(r.last_write(vp8_regs::FSIZE), Some(vp8_regs::frame_size(20, 15)));
        assert_eq!(
            r.last_write(h264_regs::TRIGGER_TYPE),
            Some(vp8_regs::TRIGGER_TYPE_VP8_SLICE_DECODE)
        );

        let pps = r.last_write(vp8_regs::PPS).unwrap();
        assert_eq!(pps & (1 << 31), 0);
        assert_ne!(pps & (1 << 23), 0);

        dummy.device.handle_irq();
        let done = ctx.dequeue_buffer(FormatType::Picture).unwrap().unwrap();
        assert_eq!(done.state, BufferState::Done);
    }

    #[test]
    fn header_replay_follows_the_read_flags() {
        let dummy = DummyDevice::new("allwinner,sun8i-h3-video-engine");
        let ctx = streaming_context(&dummy);
        dummy.registers.script_read(h264_regs::BASIC_BITS, 1);

        queue_frame(&ctx, 0, 1, key_frame());

        // Every optional syntax element is present.
        assert_eq!(header_reads(&dummy), (83, 0));
    }

    #[test]
    fn inter_frame_uses_previous_filter_state() {
        let dummy = DummyDevice::new("allwinner,sun8i-h3-video-engine");
        let ctx = streaming_context(&dummy);
        dummy.registers.script_read(h264_regs::BASIC_BITS, 0);

        let mut key = key_frame();
        key.lf.flags = Vp8LoopFilter::FLAG_FILTER_TYPE_SIMPLE;
        queue_frame(&ctx, 0, 1, key);
        dummy.device.handle_irq();
        ctx.dequeue_buffer(FormatType::Picture).unwrap().unwrap();
        ctx.dequeue_buffer(FormatType::Coded).unwrap().unwrap();
        dummy.registers.clear_writes();

        let inter = Vp8Frame {
            width: 320,
            height: 240,
            first_part_size: 100,
            num_dct_parts: 4,
            last_frame_ts: 1,
            golden_frame_ts: 1,
            alt_frame_ts: 1,
            flags: Vp8Frame::FLAG_SIGN_BIAS_GOLDEN,
            ..Default::default()
        };
        queue_frame(&ctx, 1, 2, inter);

        assert_eq!(header_reads(&dummy), (20, 3 + 2 + 38));

        let r = &dummy.registers;
        assert_eq!(r.last_write(h264_regs::VLD_OFFSET), Some(INTER_FRAME_HEADER_SIZE * 8));

        let expected = vp8_regs::PpsFields {
            p_frame: true,
            last_sharpness_level: 3,
            last_loop_filter_simple: true,
            golden_sign_bias: true,
            refresh_entropy_probs: true,
            token_partitions: 2,
            segment_abs_delta: true,
            ..Default::default()
        };
        assert_eq!(r.last_write(vp8_regs::PPS), Some(expected.value()));

        let last = ctx.with_buffer(FormatType::Picture, 0, |b| b.bus_address()).unwrap();
        for luma in [vp8_regs::FWD_LUMA, vp8_regs::BWD_LUMA, vp8_regs::ALT_LUMA] {
            assert_eq!(r.last_write(luma), Some(last));
        }
    }

    #[test]
    fn entropy_probs_layout() {
        let mut frame = key_frame();
        frame.prob_intra = 7;
        frame.entropy.y_mode_probs = [1, 2, 3, 4];
        frame.entropy.mv_probs[1][18] = 9;
        frame.entropy.coeff_probs[0][0][1][0] = 5;
        frame.entropy.coeff_probs[3][7][2][10] = 6;

        let mut probs = vec![0; vp8_regs::ENTROPY_PROBS_SIZE];
        write_entropy_probs(&frame, &mut probs);

        assert_eq!(probs[vp8_regs::ENTROPY_PROBS_HEADER + 1], 7);
        assert_eq!(probs[vp8_regs::ENTROPY_PROBS_Y_MODE..][..4], [1, 2, 3, 4]);
        assert_eq!(probs[vp8_regs::ENTROPY_PROBS_MV + 37], 9);

        let stride = vp8_regs::ENTROPY_PROBS_COEFF_STRIDE;
        assert_eq!(probs[vp8_regs::ENTROPY_PROBS_COEFF + stride], 5);
        assert_eq!(probs[vp8_regs::ENTROPY_PROBS_COEFF + 95 * stride + 10], 6);
        // Padding byte of the last set.
        assert_eq!(probs[vp8_regs::ENTROPY_PROBS_COEFF + 95 * stride + 11], 0);
    }

    #[test]
    fn version_filters() {
        assert_eq!(version_filter(0), (0, false));
        assert_eq!(version_filter(2), (1, false));
        assert_eq!(version_filter(3), (1, true));
    }
}
