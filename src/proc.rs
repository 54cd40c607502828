// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Per-role processors.
//!
//! A [`Proc`] gathers the engines of one role (decoding or encoding) supported by the device,
//! the formats they expose, and tracks which context currently drives the hardware for that
//! role.

use std::sync::Mutex;
use std::sync::PoisonError;

use crate::context::Context;
use crate::decoder;
use crate::device::Capabilities;
use crate::device::Registers;
use crate::encoder;
use crate::engine::Engine;
use crate::engine::EngineError;
use crate::engine::EngineResult;
use crate::engine::FrameSizeRange;
use crate::engine::PictureDma;
use crate::engine::Role;
use crate::queue::Queue;
use crate::Fourcc;
use crate::Fraction;
use crate::Rect;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum FormatType {
    /// Compressed bitstream.
    Coded,
    /// Raw pictures.
    Picture,
}

/// A single-planar pixel format with its dimensions.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Format {
    pub pixelformat: Fourcc,
    pub width: u32,
    pub height: u32,
    pub bytesperline: u32,
    pub sizeimage: u32,
}

/// The negotiated formats of a context.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Formats {
    pub coded: Format,
    pub picture: Format,
    /// Crop rectangle within the picture.
    pub selection: Rect,
    pub timeperframe_coded: Fraction,
    pub timeperframe_picture: Fraction,
}

impl Formats {
    pub fn get(&self, format_type: FormatType) -> &Format {
        match format_type {
            FormatType::Coded => &self.coded,
            FormatType::Picture => &self.picture,
        }
    }

    pub fn get_mut(&mut self, format_type: FormatType) -> &mut Format {
        match format_type {
            FormatType::Coded => &mut self.coded,
            FormatType::Picture => &mut self.picture,
        }
    }

    /// Resets the selection to the whole picture.
    pub fn reset_selection(&mut self) {
        self.selection = Rect {
            left: 0,
            top: 0,
            width: self.picture.width,
            height: self.picture.height,
        };
    }

    pub fn timeperframe(&self, format_type: FormatType) -> Fraction {
        match format_type {
            FormatType::Coded => self.timeperframe_coded,
            FormatType::Picture => self.timeperframe_picture,
        }
    }
}

/// A format exposed by a processor.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct FormatDesc {
    pub pixelformat: Fourcc,
    pub format_type: FormatType,
    /// Capabilities the format needs.
    pub capabilities: Capabilities,
}

/// The context whose job is on the hardware for a role.
///
/// The interrupt and watchdog paths use it to reach the engine of the running job without going
/// through the context queues.
#[derive(Default)]
pub struct ActiveContext {
    slot: Mutex<Option<Context>>,
}

impl ActiveContext {
    pub fn set(&self, ctx: &Context) {
        *self.slot.lock().unwrap_or_else(PoisonError::into_inner) = Some(ctx.clone());
    }

    /// Clears the slot if it holds `ctx`, returning whether it did.
    pub fn clear_if_equal(&self, ctx: &Context) -> bool {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);

        match slot.as_ref() {
            Some(active) if active == ctx => {
                *slot = None;
                true
            }
            _ => false,
        }
    }

    pub fn snapshot(&self) -> Option<Context> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

pub struct Proc {
    role: Role,
    engines: Vec<&'static dyn Engine>,
    formats: Vec<FormatDesc>,
    active: ActiveContext,
}

impl Proc {
    /// Creates the processor of `role`, keeping the engines and formats `capabilities` allow.
    /// Returns `None` if no engine of this role is supported.
    pub fn new(role: Role, capabilities: Capabilities) -> Option<Self> {
        let (candidates, picture_formats) = match role {
            Role::Decoder => (decoder::ENGINES, decoder::PICTURE_FORMATS),
            Role::Encoder => (encoder::ENGINES, encoder::PICTURE_FORMATS),
        };

        let engines: Vec<&'static dyn Engine> = candidates
            .iter()
            .copied()
            .filter(|engine| {
                if engine.frame_size().is_none() {
                    log::error!("{:?} engine for {} has no frame size", role, engine.pixelformat());
                    return false;
                }
                capabilities.contains(engine.capabilities())
            })
            .collect();

        if engines.is_empty() {
            return None;
        }

        // Each engine has its own coded format.
        let formats = engines
            .iter()
            .map(|engine| FormatDesc {
                pixelformat: engine.pixelformat(),
                format_type: FormatType::Coded,
                capabilities: engine.capabilities(),
            })
            .chain(
                picture_formats
                    .iter()
                    .filter(|format| capabilities.contains(format.capabilities))
                    .copied(),
            )
            .collect();

        Some(Self {
            role,
            engines,
            formats,
            active: ActiveContext::default(),
        })
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn engines(&self) -> &[&'static dyn Engine] {
        &self.engines
    }

    pub fn formats(&self) -> &[FormatDesc] {
        &self.formats
    }

    pub fn active(&self) -> &ActiveContext {
        &self.active
    }

    pub fn format_find_first(&self, format_type: FormatType) -> Option<Fourcc> {
        self.formats
            .iter()
            .find(|f| f.format_type == format_type)
            .map(|f| f.pixelformat)
    }

    pub fn format_check(&self, pixelformat: Fourcc, format_type: FormatType) -> bool {
        self.formats
            .iter()
            .any(|f| f.pixelformat == pixelformat && f.format_type == format_type)
    }

    pub fn engine_find_format(&self, pixelformat: Fourcc) -> Option<&'static dyn Engine> {
        self.engines.iter().find(|e| e.pixelformat() == pixelformat).copied()
    }

    /// Replaces an unknown pixel format with the first one of its type.
    fn format_fixup(&self, format_type: FormatType, format: &mut Format) {
        if !self.format_check(format.pixelformat, format_type) {
            if let Some(pixelformat) = self.format_find_first(format_type) {
                format.pixelformat = pixelformat;
            }
        }
    }

    /// Adjusts a coded format, returning the engine that handles it.
    pub(crate) fn format_coded_prepare(
        &self,
        formats: &Formats,
        format: &mut Format,
    ) -> EngineResult<&'static dyn Engine> {
        self.format_fixup(FormatType::Coded, format);

        let engine = self
            .engine_find_format(format.pixelformat)
            .ok_or_else(|| {
                EngineError::InvalidFormat(format!("no engine for {}", format.pixelformat))
            })?;
        engine.format_prepare(formats, format)?;

        Ok(engine)
    }

    pub(crate) fn format_picture_prepare(
        &self,
        engine: &dyn Engine,
        formats: &Formats,
        format: &mut Format,
    ) -> EngineResult<()> {
        self.format_fixup(FormatType::Picture, format);

        match self.role {
            Role::Decoder => decoder::format_picture_prepare(formats, format),
            Role::Encoder => encoder::format_picture_prepare(engine, format),
        }
    }

    pub(crate) fn format_picture_configure(
        &self,
        regs: &Registers,
        formats: &Formats,
        picture: PictureDma,
    ) -> EngineResult<()> {
        match self.role {
            Role::Decoder => decoder::format_picture_configure(regs, formats),
            Role::Encoder => encoder::format_picture_configure(regs, formats, picture),
        }
    }

    /// The initial formats of a context driving `engine`.
    pub(crate) fn format_setup(&self, engine: &'static dyn Engine) -> EngineResult<Formats> {
        match self.role {
            Role::Decoder => decoder::format_setup(self, engine),
            Role::Encoder => encoder::format_setup(self, engine),
        }
    }

    /// Updates the formats that derive from the format of type `from`.
    pub(crate) fn format_propagate(
        &self,
        engine: &'static dyn Engine,
        formats: &mut Formats,
        from: FormatType,
    ) -> EngineResult<()> {
        match self.role {
            Role::Decoder => decoder::format_propagate(self, engine, formats, from),
            Role::Encoder => encoder::format_propagate(self, engine, formats, from),
        }
    }

    /// Whether a coded format change can happen while the coded queue still has buffers.
    ///
    /// The coded queue must not be streaming, the picture queue must not have any buffer and the
    /// coded pixel format must remain the same.
    pub(crate) fn format_dynamic_check(
        &self,
        format_type: FormatType,
        requested: &Format,
        formats: &Formats,
        coded_queue: &Queue,
        picture_queue: &Queue,
    ) -> bool {
        format_type == FormatType::Coded
            && coded_queue.is_busy()
            && !coded_queue.is_streaming()
            && !picture_queue.is_busy()
            && requested.pixelformat == formats.coded.pixelformat
    }

    /// Frame sizes of a format, coded sizes coming from the engine handling it.
    pub fn frame_sizes(
        &self,
        engine: &dyn Engine,
        pixelformat: Fourcc,
    ) -> Option<FrameSizeRange> {
        if let Some(engine) = self.engine_find_format(pixelformat) {
            return engine.frame_size().copied();
        }

        if !self.format_check(pixelformat, FormatType::Picture) {
            return None;
        }

        let range = *engine.frame_size()?;
        match self.role {
            Role::Decoder => Some(decoder::size_picture_enum(range, pixelformat)),
            Role::Encoder => Some(range),
        }
    }
}
