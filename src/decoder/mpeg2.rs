// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! MPEG-2 slice decoding.

use crate::controls::ControlConfig;
use crate::controls::ControlId;
use crate::controls::Mpeg2Picture;
use crate::controls::Mpeg2Quantisation;
use crate::controls::Mpeg2Sequence;
use crate::decoder;
use crate::device::Capabilities;
use crate::device::Registers;
use crate::engine::Codec;
use crate::engine::Engine;
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
use crate::regs::mpeg2 as regs;
use crate::Fourcc;

const CONTROLS: &[ControlConfig] = &[
    ControlConfig::compound(ControlId::Mpeg2Sequence),
    ControlConfig::compound(ControlId::Mpeg2Picture),
    ControlConfig::compound(ControlId::Mpeg2Quantisation),
];

const FRAME_SIZE: FrameSizeRange = FrameSizeRange {
    min_width: 16,
    max_width: 3840,
    step_width: 16,
    min_height: 16,
    max_height: 3840,
    step_height: 16,
};

/// MPEG-2 `chroma_format` value for 4:2:0, the only one the engine outputs.
const CHROMA_FORMAT_420: u8 = 1;

pub struct Mpeg2Decoder;

impl Engine for Mpeg2Decoder {
    fn codec(&self) -> Codec {
        Codec::Mpeg2
    }

    fn role(&self) -> Role {
        Role::Decoder
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::MPEG2_DEC
    }

    fn pixelformat(&self) -> Fourcc {
        fourcc::MPEG2_SLICE
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

    fn setup(&self, _ctx: &SetupContext) -> EngineResult<Box<dyn EngineSession>> {
        Ok(Box::new(Mpeg2Session))
    }

    fn irq_status(&self, regs: &Registers) -> IrqStatus {
        let status = regs.read(regs::STATUS) & regs::STATUS_CHECK_MASK;

        if status == 0 {
            IrqStatus::None
        } else if status & regs::STATUS_SUCCESS == 0 || status & regs::STATUS_CHECK_ERROR != 0 {
            IrqStatus::Error
        } else {
            IrqStatus::Success
        }
    }

    fn irq_clear(&self, regs: &Registers) {
        regs.write(regs::STATUS, regs::STATUS_CHECK_MASK);
    }

    fn irq_disable(&self, regs: &Registers) {
        let value = regs.read(regs::CTRL) & !regs::CTRL_IRQ_MASK;
        regs.write(regs::CTRL, value);
    }
}

/// MPEG-2 decoding keeps no state between jobs.
struct Mpeg2Session;

impl Mpeg2Session {
    fn write_quantisation(regs: &Registers, quantisation: &Mpeg2Quantisation) {
        let matrices = [
            (&quantisation.intra_quantiser_matrix, regs::IQMINPUT_FLAG_INTRA),
            (&quantisation.non_intra_quantiser_matrix, regs::IQMINPUT_FLAG_NON_INTRA),
        ];

        for (matrix, flag) in matrices {
            for (i, weight) in matrix.iter().enumerate() {
                regs.write(regs::IQMINPUT, regs::iqminput_weight(i as u32, *weight as u32) | flag);
            }
        }
    }

    fn picture_header(picture: &Mpeg2Picture) -> u32 {
        let flag = |mask: u32| picture.flags & mask != 0;
        let f_code = &picture.f_code;

        regs::mp12hdr_slice_type(picture.picture_coding_type as u32)
            | regs::mp12hdr_f_code(0, 0, f_code[0][0] as u32)
            | regs::mp12hdr_f_code(0, 1, f_code[0][1] as u32)
            | regs::mp12hdr_f_code(1, 0, f_code[1][0] as u32)
            | regs::mp12hdr_f_code(1, 1, f_code[1][1] as u32)
            | regs::mp12hdr_intra_dc_precision(picture.intra_dc_precision as u32)
            | regs::mp12hdr_intra_picture_structure(picture.picture_structure as u32)
            | regs::mp12hdr_top_field_first(flag(Mpeg2Picture::FLAG_TOP_FIELD_FIRST))
            | regs::mp12hdr_frame_pred_frame_dct(flag(Mpeg2Picture::FLAG_FRAME_PRED_DCT))
            | regs::mp12hdr_concealment_motion_vectors(flag(Mpeg2Picture::FLAG_CONCEALMENT_MV))
            | regs::mp12hdr_q_scale_type(flag(Mpeg2Picture::FLAG_Q_SCALE_TYPE))
            | regs::mp12hdr_intra_vlc_format(flag(Mpeg2Picture::FLAG_INTRA_VLC))
            | regs::mp12hdr_alternate_scan(flag(Mpeg2Picture::FLAG_ALT_SCAN))
            | regs::mp12hdr_full_pel_forward_vector(false)
            | regs::mp12hdr_full_pel_backward_vector(false)
    }
}

impl EngineSession for Mpeg2Session {
    fn job_prepare(&mut self, ctx: &mut JobContext) -> EngineResult<()> {
        let sequence = ctx.controls.ctrl_data::<Mpeg2Sequence>()?;
        ctx.controls.ctrl_data::<Mpeg2Picture>()?;
        ctx.controls.ctrl_data::<Mpeg2Quantisation>()?;

        if sequence.chroma_format > CHROMA_FORMAT_420 {
            return Err(EngineError::Unsupported(format!(
                "MPEG-2 chroma format {}",
                sequence.chroma_format
            )));
        }

        Ok(())
    }

    fn job_configure(&mut self, ctx: &mut JobContext) -> EngineResult<()> {
        let regs = ctx.regs;
        let sequence = ctx.controls.ctrl_data::<Mpeg2Sequence>()?;
        let picture = ctx.controls.ctrl_data::<Mpeg2Picture>()?;
        let quantisation = ctx.controls.ctrl_data::<Mpeg2Quantisation>()?;

        Self::write_quantisation(regs, quantisation);

        regs.write(regs::MP12HDR, Self::picture_header(picture));

        // The bounds match the coded size, no cropping is applied by the engine.
        let width = sequence.horizontal_size as u32;
        let height = sequence.vertical_size as u32;
        regs.write(
            regs::PICCODEDSIZE,
            regs::piccodedsize_width(width) | regs::piccodedsize_height(height),
        );
        regs.write(
            regs::PICBOUNDSIZE,
            regs::picboundsize_width(width) | regs::picboundsize_height(height),
        );

        // Missing references read from address zero.
        let forward = ctx.picture_ref_dma(picture.forward_ref_ts);
        regs.write(regs::FWD_REF_LUMA_ADDR, forward.luma);
        regs.write(regs::FWD_REF_CHROMA_ADDR, forward.chroma);

        let backward = ctx.picture_ref_dma(picture.backward_ref_ts);
        regs.write(regs::BWD_REF_LUMA_ADDR, backward.luma);
        regs.write(regs::BWD_REF_CHROMA_ADDR, backward.chroma);

        let output = ctx.picture_dma()?;
        regs.write(regs::REC_LUMA, output.luma);
        regs.write(regs::REC_CHROMA, output.chroma);

        let (coded_addr, coded_size) = ctx.coded_dma()?;
        let coded_size = coded_size as u32;
        regs.write(regs::VLD_LEN, coded_size * 8);
        regs.write(regs::VLD_OFFSET, 0);
        regs.write(
            regs::VLD_ADDR,
            regs::vld_addr_base(coded_addr)
                | regs::VLD_ADDR_VALID_PIC_DATA
                | regs::VLD_ADDR_LAST_PIC_DATA
                | regs::VLD_ADDR_FIRST_PIC_DATA,
        );
        regs.write(regs::VLD_END_ADDR, coded_addr.wrapping_add(coded_size));

        regs.write(regs::MBADDR, regs::mbaddr_y(0) | regs::mbaddr_x(0));
        regs.write(regs::ERROR, 0);
        regs.write(regs::CRTMBADDR, 0);

        regs.write(
            regs::CTRL,
            regs::CTRL_IRQ_MASK | regs::CTRL_MC_NO_WRITEBACK | regs::CTRL_MC_CACHE_EN,
        );

        log::debug!(
            "MPEG-2 picture type {} {}x{}",
            picture.picture_coding_type,
            width,
            height
        );

        Ok(())
    }

    fn job_trigger(&mut self, ctx: &JobContext) {
        ctx.regs.write(
            regs::TRIGGER,
            regs::TRIGGER_HW_MPEG_VLD | regs::TRIGGER_MPEG2 | regs::TRIGGER_MB_BOUNDARY,
        );
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
            pixelformat: fourcc::MPEG2_SLICE,
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

    #[test]
    fn intra_picture() {
        let _ = env_logger::try_init();

        let dummy = DummyDevice::new("allwinner,sun8i-h3-video-engine");
        let ctx = streaming_context(&dummy);

        ctx.queue_buffer(FormatType::Picture, 0, QueueParams::default()).unwrap();
        let request = vec![
            ControlValue::Mpeg2Sequence(Mpeg2Sequence {
                horizontal_size: 1920,
                vertical_size: 1080,
                chroma_format: 1,
                ..Default::default()
            }),
            ControlValue::Mpeg2Picture(Mpeg2Picture {
                picture_coding_type: Mpeg2Picture::CODING_TYPE_I,
                picture_structure: 3,
                forward_ref_ts: 12345,
                ..Default::default()
            }),
            ControlValue::Mpeg2Quantisation(Box::new(Mpeg2Quantisation {
                intra_quantiser_matrix: [16; 64],
                non_intra_quantiser_matrix: [16; 64],
                ..Default::default()
            })),
        ];
        let params = QueueParams { bytesused: 4096, timestamp: 1, request, ..Default::default() };
        ctx.queue_buffer(FormatType::Coded, 0, params).unwrap();

        let r = &dummy.registers;

        let weights = r.writes_to(regs::IQMINPUT);
        assert_eq!(weights.len(), 128);
        for (i, value) in weights.iter().enumerate() {
            let index = (i % 64) as u32;
            let flag =
                if i < 64 { regs::IQMINPUT_FLAG_INTRA } else { regs::IQMINPUT_FLAG_NON_INTRA };
            assert_eq!(*value, regs::iqminput_weight(index, 16) | flag);
        }

        assert_eq!(r.last_write(regs::PICCODEDSIZE), Some((120 << 8) | 68));
        assert_eq!(r.last_write(regs::PICBOUNDSIZE), Some((1920 << 16) | 1080));
        assert_eq!(r.last_write(regs::MP12HDR).unwrap() & regs::mp12hdr_slice_type(7), 1 << 28);

        // The forward reference is unknown.
        assert_eq!(r.last_write(regs::FWD_REF_LUMA_ADDR), Some(0));
        assert_eq!(r.last_write(regs::FWD_REF_CHROMA_ADDR), Some(0));

        let (coded_addr, picture) = {
            let coded = ctx.with_buffer(FormatType::Coded, 0, |b| b.bus_address()).unwrap();
            let picture = ctx.with_buffer(FormatType::Picture, 0, |b| b.bus_address()).unwrap();
            (coded, picture)
        };
        assert_eq!(r.last_write(regs::REC_LUMA), Some(picture));
        assert_eq!(r.last_write(regs::REC_CHROMA), Some(picture + 1920 * 1088));
        assert_eq!(r.last_write(regs::VLD_LEN), Some(4096 * 8));
        assert_eq!(r.last_write(regs::VLD_END_ADDR), Some(coded_addr + 4096));
        assert_eq!(
            r.last_write(regs::VLD_ADDR),
            Some(regs::vld_addr_base(coded_addr) | (0b111 << 28))
        );
        assert_eq!(
            r.last_write(regs::TRIGGER),
            Some(regs::TRIGGER_HW_MPEG_VLD | regs::TRIGGER_MPEG2 | regs::TRIGGER_MB_BOUNDARY)
        );

        r.script_read(regs::STATUS, regs::STATUS_SUCCESS);
        assert_eq!(Mpeg2Decoder.irq_status(dummy.device.registers()), IrqStatus::Success);
        dummy.device.handle_irq();

        let done = ctx.dequeue_buffer(FormatType::Picture).unwrap().unwrap();
        assert_eq!(done.state, BufferState::Done);
    }

    #[test]
    fn references_resolve_to_picture_buffers() {
        let dummy = DummyDevice::new("allwinner,sun8i-h3-video-engine");
        let ctx = streaming_context(&dummy);

        ctx.queue_buffer(FormatType::Picture, 0, QueueParams::default()).unwrap();
        let params = QueueParams { bytesused: 64, timestamp: 10, ..Default::default() };
        ctx.queue_buffer(FormatType::Coded, 0, params).unwrap();
        dummy.registers.script_read(regs::STATUS, regs::STATUS_SUCCESS);
        dummy.device.handle_irq();

        ctx.queue_buffer(FormatType::Picture, 1, QueueParams::default()).unwrap();
        let request = vec![ControlValue::Mpeg2Picture(Mpeg2Picture {
            picture_coding_type: Mpeg2Picture::CODING_TYPE_P,
            forward_ref_ts: 10,
            backward_ref_ts: 10,
            ..Default::default()
        })];
        let params = QueueParams { bytesused: 64, timestamp: 20, request, ..Default::default() };
        ctx.queue_buffer(FormatType::Coded, 1, params).unwrap();

        let reference = ctx.with_buffer(FormatType::Picture, 0, |b| b.bus_address()).unwrap();
        let r = &dummy.registers;
        assert_eq!(r.last_write(regs::FWD_REF_LUMA_ADDR), Some(reference));
        assert_eq!(r.last_write(regs::BWD_REF_CHROMA_ADDR), Some(reference + 1920 * 1088));
    }

    #[test]
    fn irq_status_classification() {
        let dummy = DummyDevice::new("allwinner,sun8i-h3-video-engine");
        let regs_io = dummy.device.registers();

        assert_eq!(Mpeg2Decoder.irq_status(regs_io), IrqStatus::None);
        dummy.registers.script_read(regs::STATUS, regs::STATUS_SUCCESS | (1 << 1));
        assert_eq!(Mpeg2Decoder.irq_status(regs_io), IrqStatus::Error);
        dummy.registers.script_read(regs::STATUS, 1 << 2);
        assert_eq!(Mpeg2Decoder.irq_status(regs_io), IrqStatus::Error);

        regs_io.write(regs::CTRL, regs::CTRL_IRQ_MASK | regs::CTRL_MC_CACHE_EN);
        Mpeg2Decoder.irq_disable(regs_io);
        assert_eq!(dummy.registers.last_write(regs::CTRL), Some(regs::CTRL_MC_CACHE_EN));
        Mpeg2Decoder.irq_clear(regs_io);
        assert_eq!(dummy.registers.last_write(regs::STATUS), Some(regs::STATUS_CHECK_MASK));
    }
}
