// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Codec engines.
//!
//! An [`Engine`] is the static description of one codec in one role: the capabilities it needs,
//! its coded pixel format, its controls and the hooks that do not need a running stream. Starting
//! the stream turns it into an [`EngineSession`], which owns the per-stream side buffers and runs
//! the jobs.

use anyhow::anyhow;
use thiserror::Error;

use crate::controls::ControlConfig;
use crate::controls::ControlId;
use crate::controls::ControlStore;
use crate::controls::ControlValue;
use crate::decoder::h264::H264Buffer;
use crate::decoder::h265::H265Buffer;
use crate::device::Capabilities;
use crate::device::DeviceError;
use crate::device::Registers;
use crate::dma::DmaAllocator;
use crate::dma::DmaError;
use crate::encoder::h264::H264EncBuffer;
use crate::proc::Format;
use crate::proc::Formats;
use crate::queue::Buffer;
use crate::queue::BufferState;
use crate::queue::Queue;
use crate::Fourcc;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("invalid format: {0}")]
    InvalidFormat(String),
    #[error("control {0:?} is not available")]
    MissingControl(ControlId),
    #[error("value out of range: {0}")]
    Range(String),
    #[error("unsupported: {0}")]
    Unsupported(String),
    #[error("invalid bitstream: {0}")]
    InvalidBitstream(String),
    #[error("out of resources: {0}")]
    OutOfResources(String),
    #[error(transparent)]
    Dma(#[from] DmaError),
    #[error(transparent)]
    Device(#[from] DeviceError),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type EngineResult<T> = Result<T, EngineError>;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Codec {
    Mpeg2,
    H264,
    H265,
    Vp8,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Role {
    Decoder,
    Encoder,
}

/// Stepwise frame size constraints.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct FrameSizeRange {
    pub min_width: u32,
    pub max_width: u32,
    pub step_width: u32,
    pub min_height: u32,
    pub max_height: u32,
    pub step_height: u32,
}

impl FrameSizeRange {
    /// Clamps `width` and `height` to the range, then rounds them up to the step.
    pub fn apply(&self, width: u32, height: u32) -> (u32, u32) {
        fn clamp_roundup(value: u32, min: u32, max: u32, step: u32) -> u32 {
            let value = value.clamp(min, max);
            if step > 1 {
                min + (value - min).div_ceil(step) * step
            } else {
                value
            }
        }

        (
            clamp_roundup(width, self.min_width, self.max_width, self.step_width),
            clamp_roundup(height, self.min_height, self.max_height, self.step_height),
        )
    }
}

/// Interpretation of the interrupt status of an engine.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum IrqStatus {
    /// The engine did not raise the interrupt.
    None,
    Success,
    Error,
}

/// Engine data attached to a picture buffer.
pub enum EngineBuffer {
    H264(H264Buffer),
    H265(H265Buffer),
    H264Enc(H264EncBuffer),
}

/// Resources available to an engine outside of a job.
pub struct SetupContext<'a> {
    pub regs: &'a Registers,
    pub allocator: &'a dyn DmaAllocator,
    pub controls: &'a ControlStore,
    pub formats: &'a Formats,
}

/// Luma and chroma addresses of a picture.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct PictureDma {
    pub luma: u32,
    pub chroma: u32,
}

/// The buffers and parameters of the job being run.
///
/// The coded buffer is the source of a decoding job and the destination of an encoding job, and
/// the other way around for the picture buffer.
pub struct JobContext<'a> {
    pub regs: &'a Registers,
    pub allocator: &'a dyn DmaAllocator,
    pub controls: &'a ControlStore,
    pub formats: &'a Formats,
    pub coded_queue: &'a mut Queue,
    pub picture_queue: &'a mut Queue,
    pub coded_index: usize,
    pub picture_index: usize,
    /// Whether the picture buffer starts a new picture. Always set for engines that are not
    /// slice based.
    pub first_slice: bool,
}

impl<'a> JobContext<'a> {
    pub fn setup_context(&self) -> SetupContext<'_> {
        SetupContext {
            regs: self.regs,
            allocator: self.allocator,
            controls: self.controls,
            formats: self.formats,
        }
    }

    pub fn coded_buffer(&self) -> EngineResult<&Buffer> {
        self.coded_queue
            .buffer(self.coded_index)
            .ok_or_else(|| anyhow!("coded buffer {} is gone", self.coded_index).into())
    }

    pub fn coded_buffer_mut(&mut self) -> EngineResult<&mut Buffer> {
        let index = self.coded_index;
        self.coded_queue
            .buffer_mut(index)
            .ok_or_else(|| anyhow!("coded buffer {} is gone", index).into())
    }

    pub fn picture_buffer(&self) -> EngineResult<&Buffer> {
        self.picture_queue
            .buffer(self.picture_index)
            .ok_or_else(|| anyhow!("picture buffer {} is gone", self.picture_index).into())
    }

    pub fn picture_buffer_mut(&mut self) -> EngineResult<&mut Buffer> {
        let index = self.picture_index;
        self.picture_queue
            .buffer_mut(index)
            .ok_or_else(|| anyhow!("picture buffer {} is gone", index).into())
    }

    /// Bus address and payload size of the coded buffer.
    pub fn coded_dma(&self) -> EngineResult<(u32, usize)> {
        let buffer = self.coded_buffer()?;

        Ok((buffer.bus_address(), buffer.bytesused()))
    }

    /// Plane addresses of a picture buffer, the chroma plane following the luma plane.
    pub fn picture_plane_dma(&self, buffer: &Buffer) -> PictureDma {
        let picture = &self.formats.picture;
        let luma = buffer.bus_address();

        PictureDma {
            luma,
            chroma: luma.wrapping_add(picture.bytesperline * picture.height),
        }
    }

    pub fn picture_dma(&self) -> EngineResult<PictureDma> {
        Ok(self.picture_plane_dma(self.picture_buffer()?))
    }

    /// Plane addresses of the picture buffer holding `timestamp`, zero if there is none.
    pub fn picture_ref_dma(&self, timestamp: u64) -> PictureDma {
        self.find_picture(timestamp)
            .and_then(|index| self.picture_queue.buffer(index))
            .map(|buffer| self.picture_plane_dma(buffer))
            .unwrap_or_default()
    }

    pub fn find_picture(&self, timestamp: u64) -> Option<usize> {
        self.picture_queue.find_by_timestamp(timestamp)
    }
}

/// Static description of a codec engine.
pub trait Engine: Send + Sync {
    fn codec(&self) -> Codec;
    fn role(&self) -> Role;

    /// Hardware capabilities the engine needs.
    fn capabilities(&self) -> Capabilities;

    /// The coded pixel format handled by the engine.
    fn pixelformat(&self) -> Fourcc;

    /// Whether each job processes a single slice of a picture.
    fn slice_based(&self) -> bool {
        false
    }

    /// Frame size constraints of the coded format. Engines without any are not registered.
    fn frame_size(&self) -> Option<&'static FrameSizeRange>;

    fn controls(&self) -> &'static [ControlConfig];

    /// Validates a new control value before it is stored.
    fn ctrl_validate(&self, _controls: &ControlStore, _value: &ControlValue) -> EngineResult<()> {
        Ok(())
    }

    /// Adjusts the coded format `format` to what the engine supports.
    fn format_prepare(&self, formats: &Formats, format: &mut Format) -> EngineResult<()>;

    /// Programs the coded format.
    fn format_configure(&self, regs: &Registers, formats: &Formats) -> EngineResult<()>;

    /// Allocates the per-stream resources of the engine.
    fn setup(&self, ctx: &SetupContext) -> EngineResult<Box<dyn EngineSession>>;

    /// Attaches engine data to a picture buffer when it gets registered.
    fn buffer_setup(&self, _ctx: &SetupContext, _buffer: &mut Buffer) -> EngineResult<()> {
        Ok(())
    }

    /// Releases the engine data of a picture buffer when it gets unregistered.
    fn buffer_cleanup(&self, buffer: &mut Buffer) {
        buffer.engine = None;
    }

    fn irq_status(&self, _regs: &Registers) -> IrqStatus {
        IrqStatus::None
    }

    fn irq_clear(&self, _regs: &Registers) {}

    fn irq_disable(&self, _regs: &Registers) {}
}

/// A started engine, holding the resources of one stream.
pub trait EngineSession: Send {
    /// Applies a control value that has just been stored.
    fn ctrl_prepare(&mut self, _controls: &mut ControlStore, _id: ControlId) -> EngineResult<()> {
        Ok(())
    }

    /// Releases the session resources. Resources are also released when the session is dropped.
    fn cleanup(&mut self) {}

    /// Resets the job state and checks the parameters of the job.
    fn job_prepare(&mut self, _ctx: &mut JobContext) -> EngineResult<()> {
        Ok(())
    }

    /// Programs the engine for the job.
    fn job_configure(&mut self, _ctx: &mut JobContext) -> EngineResult<()> {
        Ok(())
    }

    /// Starts the configured job.
    fn job_trigger(&mut self, ctx: &JobContext);

    /// Finalizes the buffers of a completed job.
    fn job_finish(&mut self, _ctx: &mut JobContext, _state: BufferState) {}
}
