// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Encoding role: the source picture fetch stage, format negotiation and the encoding engines.
//!
//! Encoders take NV12 pictures in and derive the coded format from the picture format, the
//! opposite of the decoders.

pub mod h264;

use crate::align_up;
use crate::device::Capabilities;
use crate::device::Registers;
use crate::div_round_up;
use crate::engine::Engine;
use crate::engine::EngineError;
use crate::engine::EngineResult;
use crate::engine::PictureDma;
use crate::fourcc;
use crate::proc::Format;
use crate::proc::FormatDesc;
use crate::proc::FormatType;
use crate::proc::Formats;
use crate::proc::Proc;
use crate::regs;
use crate::regs::isp;

pub(crate) const PICTURE_FORMATS: &[FormatDesc] = &[FormatDesc {
    pixelformat: fourcc::NV12,
    format_type: FormatType::Picture,
    capabilities: Capabilities::empty(),
}];

pub(crate) const ENGINES: &[&dyn Engine] = &[&h264::H264Encoder];

/// Minimum size of a coded buffer.
const CODED_SIZEIMAGE_MIN: u32 = 1024;

const DEFAULT_WIDTH: u32 = 1280;
const DEFAULT_HEIGHT: u32 = 720;

/// Coded format preparation shared by the encoding engines. Dimensions always come from the
/// picture format.
pub(crate) fn format_coded_prepare(formats: &Formats, format: &mut Format) -> EngineResult<()> {
    format.width = formats.picture.width;
    format.height = formats.picture.height;
    format.bytesperline = 0;
    format.sizeimage = format.sizeimage.max(CODED_SIZEIMAGE_MIN);

    Ok(())
}

/// Restarts the encoding block, leaving the decoders disabled.
pub(crate) fn format_coded_configure(regs: &Registers) -> EngineResult<()> {
    let mode = regs.read(regs::MODE) & !(regs::MODE_ENC_ENABLE | regs::MODE_ENC_ISP_ENABLE);
    regs.write(regs::MODE, mode | regs::MODE_DEC_DISABLED);

    let reset = regs.read(regs::RESET);
    regs.write(regs::RESET, reset | regs::RESET_ENCODER_RESET);
    let reset = regs.read(regs::RESET);
    regs.write(regs::RESET, reset & !regs::RESET_ENCODER_RESET);

    let mode = regs.read(regs::MODE);
    regs.write(
        regs::MODE,
        mode | regs::MODE_ENC_ENABLE | regs::MODE_ENC_ISP_ENABLE | regs::MODE_DEC_DISABLED,
    );

    Ok(())
}

pub(crate) fn format_picture_prepare(engine: &dyn Engine, format: &mut Format) -> EngineResult<()> {
    let (width, height) = match engine.frame_size() {
        Some(range) => range.apply(format.width, format.height),
        None => (format.width, format.height),
    };
    let mut bytesperline = format.bytesperline;

    // The upper bound avoids overflows.
    if bytesperline < width || bytesperline > 32 * width {
        bytesperline = width;
    }

    // Macroblock aligned stride.
    bytesperline = align_up(bytesperline, 16);

    let sizeimage = match format.pixelformat {
        fourcc::NV12 => bytesperline * height + bytesperline * height / 2,
        other => {
            return Err(EngineError::InvalidFormat(format!("unsupported picture {}", other)));
        }
    };

    format.width = width;
    format.height = height;
    format.bytesperline = bytesperline;
    format.sizeimage = sizeimage;

    Ok(())
}

/// Programs the source picture fetch.
pub(crate) fn format_picture_configure(
    regs: &Registers,
    formats: &Formats,
    picture: PictureDma,
) -> EngineResult<()> {
    let format = &formats.picture;
    let width_mbs = div_round_up(format.width, 16);
    let height_mbs = div_round_up(format.height, 16);

    regs.write(isp::PIC_INFO, isp::pic_info(width_mbs, height_mbs));
    regs.write(isp::SCALER_SIZE, isp::scaler_size(width_mbs, height_mbs));

    if format.bytesperline % 16 != 0 {
        return Err(EngineError::InvalidFormat(format!(
            "picture stride {} is not macroblock aligned",
            format.bytesperline
        )));
    }
    regs.write(isp::PIC_STRIDE0, isp::pic_stride0_input_stride_mbs(format.bytesperline / 16));

    regs.write(
        isp::CTRL,
        isp::CTRL_FORMAT_YUV420SP | isp::CTRL_ROTATION_0 | isp::CTRL_COLORSPACE_BT601,
    );

    regs.write(isp::INPUT_LUMA_ADDR, picture.luma);
    regs.write(isp::INPUT_CHROMA0_ADDR, picture.chroma);

    Ok(())
}

pub(crate) fn format_setup(proc: &Proc, engine: &'static dyn Engine) -> EngineResult<Formats> {
    let mut formats = Formats::default();
    let mut picture = Format {
        pixelformat: proc.format_find_first(FormatType::Picture).unwrap_or(fourcc::NV12),
        width: DEFAULT_WIDTH,
        height: DEFAULT_HEIGHT,
        ..Default::default()
    };

    proc.format_picture_prepare(engine, &formats, &mut picture)?;
    formats.picture = picture;
    formats.coded.pixelformat = engine.pixelformat();

    format_propagate(proc, engine, &mut formats, FormatType::Picture)?;
    formats.timeperframe_coded = formats.timeperframe_picture;

    Ok(formats)
}

/// Derives the coded format and the crop selection from the picture format.
pub(crate) fn format_propagate(
    proc: &Proc,
    _engine: &'static dyn Engine,
    formats: &mut Formats,
    from: FormatType,
) -> EngineResult<()> {
    if from != FormatType::Picture {
        return Ok(());
    }

    formats.reset_selection();

    let mut coded = formats.coded;
    proc.format_coded_prepare(formats, &mut coded)?;
    formats.coded = coded;

    Ok(())
}
