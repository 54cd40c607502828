// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Decoding role: picture formats, format negotiation and the decoding engines.
//!
//! Decoders expose one coded format per engine. The picture format is always derived from the
//! negotiated coded format.

pub mod h264;
pub mod h265;
pub mod mpeg2;
pub mod vp8;

use crate::align_up;
use crate::device::Capabilities;
use crate::device::Registers;
use crate::engine::Engine;
use crate::engine::EngineError;
use crate::engine::EngineResult;
use crate::engine::FrameSizeRange;
use crate::fourcc;
use crate::proc::Format;
use crate::proc::FormatDesc;
use crate::proc::FormatType;
use crate::proc::Formats;
use crate::proc::Proc;
use crate::regs;
use crate::Fourcc;

pub(crate) const PICTURE_FORMATS: &[FormatDesc] = &[
    FormatDesc {
        pixelformat: fourcc::NV12,
        format_type: FormatType::Picture,
        capabilities: Capabilities::UNTILED,
    },
    FormatDesc {
        pixelformat: fourcc::NV12_32L32,
        format_type: FormatType::Picture,
        capabilities: Capabilities::empty(),
    },
];

pub(crate) const ENGINES: &[&dyn Engine] = &[
    &mpeg2::Mpeg2Decoder,
    &h264::H264Decoder,
    &h265::H265Decoder,
    &vp8::Vp8Decoder,
];

/// Minimum size of a coded buffer.
const CODED_SIZEIMAGE_MIN: u32 = 1024;

/// Default dimensions of a new context.
const DEFAULT_WIDTH: u32 = 1280;
const DEFAULT_HEIGHT: u32 = 720;

/// Coded format preparation shared by all the decoding engines.
pub(crate) fn format_coded_prepare(engine: &dyn Engine, format: &mut Format) -> EngineResult<()> {
    if let Some(range) = engine.frame_size() {
        (format.width, format.height) = range.apply(format.width, format.height);
    }

    // Zero bytes per line for an encoded source.
    format.bytesperline = 0;
    format.sizeimage = format.sizeimage.max(CODED_SIZEIMAGE_MIN);

    Ok(())
}

/// Selects the decoding mode of the engine from the coded format.
pub(crate) fn format_coded_configure(regs: &Registers, formats: &Formats) -> EngineResult<()> {
    // Only checked on 32-bit DDR setups.
    let mut value = regs::MODE_REC_WR_MODE_2MB | regs::MODE_DDR_MODE_BW_128;

    value |= match formats.coded.pixelformat {
        fourcc::MPEG2_SLICE => regs::MODE_DEC_MPEG,
        // H.264 and VP8 share the same decoding mode.
        fourcc::H264_SLICE | fourcc::VP8_FRAME => regs::MODE_DEC_H264,
        fourcc::HEVC_SLICE => regs::MODE_DEC_H265,
        other => {
            return Err(EngineError::InvalidFormat(format!("no decoding mode for {}", other)));
        }
    };

    let width = formats.picture.width;
    if width == 4096 {
        value |= regs::MODE_PIC_WIDTH_IS_4096;
    }
    if width > 2048 {
        value |= regs::MODE_PIC_WIDTH_MORE_2048;
    }

    regs.write(regs::MODE, value);

    Ok(())
}

pub(crate) fn format_picture_prepare(formats: &Formats, format: &mut Format) -> EngineResult<()> {
    let mut width = formats.coded.width;
    let mut height = formats.coded.height;
    let mut bytesperline = format.bytesperline;

    // The upper bound avoids overflows.
    if bytesperline < width || bytesperline > 32 * width {
        bytesperline = width;
    }

    bytesperline = align_up(bytesperline, 16);

    let sizeimage = match format.pixelformat {
        fourcc::NV12 => bytesperline * height + bytesperline * height / 2,
        fourcc::NV12_32L32 => {
            width = align_up(width, 32);
            height = align_up(height, 32);
            // The stride of tiled pictures matches the width exactly.
            bytesperline = width;

            bytesperline * height + bytesperline * align_up(height, 64) / 2
        }
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

pub(crate) fn format_picture_configure(regs: &Registers, formats: &Formats) -> EngineResult<()> {
    let picture = &formats.picture;

    match picture.pixelformat {
        fourcc::NV12 => {
            regs.write(regs::PRIMARY_OUT_FMT, regs::PRIMARY_OUT_FMT_NV12);

            let chroma_size = align_up(picture.width, 16) * align_up(picture.height, 16) / 2;
            regs.write(regs::PRIMARY_CHROMA_BUF_LEN, chroma_size / 2);

            let luma_stride = align_up(picture.width, 16);
            let chroma_stride = luma_stride / 2;
            regs.write(
                regs::PRIMARY_FB_LINE_STRIDE,
                regs::primary_fb_line_stride_luma(luma_stride)
                    | regs::primary_fb_line_stride_chroma(chroma_stride),
            );
        }
        fourcc::NV12_32L32 => {
            regs.write(regs::PRIMARY_OUT_FMT, regs::PRIMARY_OUT_FMT_TILED_32_NV12);
            regs.write(regs::CHROMA_BUF_LEN, regs::SECONDARY_OUT_FMT_TILED_32_NV12);
        }
        other => {
            return Err(EngineError::InvalidFormat(format!("unsupported picture {}", other)));
        }
    }

    Ok(())
}

pub(crate) fn format_setup(proc: &Proc, engine: &'static dyn Engine) -> EngineResult<Formats> {
    let mut formats = Formats::default();
    let mut coded = Format {
        pixelformat: engine.pixelformat(),
        width: DEFAULT_WIDTH,
        height: DEFAULT_HEIGHT,
        ..Default::default()
    };

    let engine = proc.format_coded_prepare(&formats, &mut coded)?;
    formats.coded = coded;

    format_propagate(proc, engine, &mut formats, FormatType::Coded)?;

    Ok(formats)
}

/// Derives the picture format from the coded format.
pub(crate) fn format_propagate(
    proc: &Proc,
    engine: &'static dyn Engine,
    formats: &mut Formats,
    from: FormatType,
) -> EngineResult<()> {
    if from != FormatType::Coded {
        return Ok(());
    }

    let mut picture = formats.picture;
    proc.format_picture_prepare(engine, formats, &mut picture)?;
    formats.picture = picture;

    Ok(())
}

/// Picture frame sizes are constrained by the coded frame sizes.
pub(crate) fn size_picture_enum(range: FrameSizeRange, pixelformat: Fourcc) -> FrameSizeRange {
    match pixelformat {
        fourcc::NV12_32L32 => FrameSizeRange {
            min_width: 32,
            min_height: 32,
            step_width: 32,
            step_height: 32,
            ..range
        },
        _ => range,
    }
}
