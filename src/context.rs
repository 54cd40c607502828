// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Decoding and encoding sessions.
//!
//! A [`Context`] owns a coded queue and a picture queue, the negotiated formats, the controls of
//! its processor and, while the coded queue is streaming, the session of its current engine. Jobs
//! are scheduled on the device as soon as both queues are streaming and have a buffer ready.

use std::fmt;
use std::ops::Range;
use std::sync::Arc;
use std::sync::Condvar;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;
use std::time::Duration;
use std::time::Instant;

use thiserror::Error;

use crate::controls::ControlId;
use crate::controls::ControlStore;
use crate::controls::ControlValue;
use crate::device::Device;
use crate::dma::DmaBuffer;
use crate::engine::Engine;
use crate::engine::EngineError;
use crate::engine::EngineSession;
use crate::engine::FrameSizeRange;
use crate::engine::Role;
use crate::engine::SetupContext;
use crate::proc::Format;
use crate::proc::FormatType;
use crate::proc::Formats;
use crate::proc::Proc;
use crate::queue::Buffer;
use crate::queue::BufferState;
use crate::queue::Queue;
use crate::Fourcc;
use crate::Fraction;
use crate::Rect;

#[derive(Error, Debug)]
pub enum ContextError {
    #[error("no {0:?} engine on this device")]
    NoEngine(Role),
    #[error("the queue is busy")]
    Busy,
    #[error("the queue is not streaming")]
    NotStreaming,
    #[error("invalid buffer {0}")]
    InvalidBuffer(usize),
    #[error("buffer of {size} bytes is smaller than the required {needed} bytes")]
    BufferTooSmall { size: usize, needed: usize },
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error(transparent)]
    Engine(#[from] EngineError),
}

pub type ContextResult<T> = Result<T, ContextError>;

/// Selection rectangles of the picture format.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SelectionTarget {
    Crop,
    CropDefault,
    CropBounds,
}

/// Range of acceptable frame intervals.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct FrameIntervalRange {
    pub min: Fraction,
    pub max: Fraction,
    pub step: Fraction,
}

/// Parameters given along with a queued buffer.
#[derive(Clone, Debug, Default)]
pub struct QueueParams {
    /// Payload size, ignored for picture buffers which always carry a full picture.
    pub bytesused: usize,
    pub timestamp: u64,
    pub flags: u32,
    /// Control values applied when a job picks the buffer. Only valid on the source queue.
    pub request: Vec<ControlValue>,
}

/// A buffer handed back to the caller.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct DequeuedBuffer {
    pub index: usize,
    pub state: BufferState,
    pub bytesused: usize,
    pub timestamp: u64,
    pub flags: u32,
}

/// Buffers bound to the running job.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) struct Job {
    pub coded_index: usize,
    pub picture_index: usize,
    /// The job decodes the first slice of its picture.
    pub first_slice: bool,
}

pub(crate) struct ContextInner {
    pub engine: &'static dyn Engine,
    pub formats: Formats,
    pub controls: ControlStore,
    pub coded_queue: Queue,
    pub picture_queue: Queue,
    /// Present while the coded queue is streaming.
    pub session: Option<Box<dyn EngineSession>>,
    pub job: Option<Job>,
    /// Picture buffer kept across the jobs decoding the slices of one picture.
    pub held_picture: Option<usize>,
}

impl ContextInner {
    pub fn queue(&self, format_type: FormatType) -> &Queue {
        match format_type {
            FormatType::Coded => &self.coded_queue,
            FormatType::Picture => &self.picture_queue,
        }
    }

    pub fn queue_mut(&mut self, format_type: FormatType) -> &mut Queue {
        match format_type {
            FormatType::Coded => &mut self.coded_queue,
            FormatType::Picture => &mut self.picture_queue,
        }
    }

    /// Whether a job can be run right now.
    pub fn job_ready(&self) -> bool {
        self.session.is_some()
            && self.job.is_none()
            && self.coded_queue.is_streaming()
            && self.picture_queue.is_streaming()
            && self.coded_queue.next_ready().is_some()
            && self.picture_queue.next_ready().is_some()
    }
}

struct Shared {
    device: Arc<Device>,
    role: Role,
    inner: Mutex<ContextInner>,
    /// Signaled every time a job of the context completes.
    idle: Condvar,
}

/// A decoding or encoding session. Clones refer to the same session.
#[derive(Clone)]
pub struct Context {
    shared: Arc<Shared>,
}

impl PartialEq for Context {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }
}

impl Eq for Context {}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context").field("role", &self.shared.role).finish_non_exhaustive()
    }
}

/// The queue jobs read from for `role`.
pub(crate) fn source_type(role: Role) -> FormatType {
    match role {
        Role::Decoder => FormatType::Coded,
        Role::Encoder => FormatType::Picture,
    }
}

impl Context {
    /// Opens a new session on the processor of `role`, using its first engine.
    pub fn new(device: &Arc<Device>, role: Role) -> ContextResult<Self> {
        let proc = device.proc(role).ok_or(ContextError::NoEngine(role))?;
        let engine = *proc.engines().first().ok_or(ContextError::NoEngine(role))?;

        let controls = ControlStore::new(proc.engines().iter().flat_map(|e| e.controls()));
        let formats = proc.format_setup(engine)?;

        log::debug!(
            "new {:?} context: {} {}x{}",
            role,
            formats.coded.pixelformat,
            formats.coded.width,
            formats.coded.height
        );

        Ok(Self {
            shared: Arc::new(Shared {
                device: Arc::clone(device),
                role,
                inner: Mutex::new(ContextInner {
                    engine,
                    formats,
                    controls,
                    coded_queue: Queue::new(FormatType::Coded),
                    picture_queue: Queue::new(FormatType::Picture),
                    session: None,
                    job: None,
                    held_picture: None,
                }),
                idle: Condvar::new(),
            }),
        })
    }

    pub fn role(&self) -> Role {
        self.shared.role
    }

    pub fn device(&self) -> &Arc<Device> {
        &self.shared.device
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, ContextInner> {
        self.shared.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn notify_idle(&self) {
        self.shared.idle.notify_all();
    }

    fn proc(&self) -> ContextResult<&Proc> {
        self.shared.device.proc(self.shared.role).ok_or(ContextError::NoEngine(self.shared.role))
    }

    /// The engine selected by the coded format.
    pub fn engine(&self) -> &'static dyn Engine {
        self.lock().engine
    }

    // Formats

    pub fn enum_formats(&self, format_type: FormatType) -> Vec<Fourcc> {
        self.proc()
            .map(|proc| {
                proc.formats()
                    .iter()
                    .filter(|f| f.format_type == format_type)
                    .map(|f| f.pixelformat)
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn formats(&self) -> Formats {
        self.lock().formats.clone()
    }

    pub fn format(&self, format_type: FormatType) -> Format {
        *self.lock().formats.get(format_type)
    }

    /// Adjusts `format` to what the context would accept, without applying it.
    pub fn try_format(&self, format_type: FormatType, mut format: Format) -> ContextResult<Format> {
        let proc = self.proc()?;
        let inner = self.lock();

        match format_type {
            FormatType::Coded => {
                proc.format_coded_prepare(&inner.formats, &mut format)?;
            }
            FormatType::Picture => {
                proc.format_picture_prepare(inner.engine, &inner.formats, &mut format)?;
            }
        }

        Ok(format)
    }

    /// Applies `format`, returning it as adjusted. Setting the coded format selects the engine
    /// handling its pixel format.
    pub fn set_format(&self, format_type: FormatType, mut format: Format) -> ContextResult<Format> {
        let proc = self.proc()?;
        let mut guard = self.lock();
        let inner = &mut *guard;

        let dynamic = proc.format_dynamic_check(
            format_type,
            &format,
            &inner.formats,
            &inner.coded_queue,
            &inner.picture_queue,
        );
        if !dynamic && inner.queue(format_type).is_busy() {
            return Err(ContextError::Busy);
        }

        let engine = match format_type {
            FormatType::Coded => proc.format_coded_prepare(&inner.formats, &mut format)?,
            FormatType::Picture => {
                proc.format_picture_prepare(inner.engine, &inner.formats, &mut format)?;
                inner.engine
            }
        };

        *inner.formats.get_mut(format_type) = format;
        proc.format_propagate(engine, &mut inner.formats, format_type)?;

        if format_type == FormatType::Coded && engine.pixelformat() != inner.engine.pixelformat() {
            log::debug!("switching to the {:?} engine", engine.codec());
            inner.engine = engine;
        }

        Ok(format)
    }

    pub fn frame_sizes(&self, pixelformat: Fourcc) -> Option<FrameSizeRange> {
        let proc = self.proc().ok()?;

        proc.frame_sizes(self.engine(), pixelformat)
    }

    /// Frame intervals acceptable at the given frame size.
    pub fn frame_intervals(
        &self,
        pixelformat: Fourcc,
        width: u32,
        height: u32,
    ) -> ContextResult<FrameIntervalRange> {
        let range = self.frame_sizes(pixelformat).ok_or_else(|| {
            ContextError::InvalidArgument(format!("unknown pixel format {}", pixelformat))
        })?;

        if width < range.min_width
            || width > range.max_width
            || height < range.min_height
            || height > range.max_height
        {
            return Err(ContextError::InvalidArgument(format!(
                "frame size {}x{} is out of range",
                width, height
            )));
        }

        Ok(FrameIntervalRange {
            min: Fraction { numerator: 1, denominator: u16::MAX as u32 },
            max: Fraction { numerator: u16::MAX as u32, denominator: 1 },
            step: Fraction { numerator: 1, denominator: 1 },
        })
    }

    pub fn selection(&self, target: SelectionTarget) -> Rect {
        let inner = self.lock();
        let picture = &inner.formats.picture;

        match target {
            SelectionTarget::CropDefault | SelectionTarget::CropBounds => Rect {
                left: 0,
                top: 0,
                width: picture.width,
                height: picture.height,
            },
            SelectionTarget::Crop => inner.formats.selection,
        }
    }

    /// Sets the crop rectangle, returning it as adjusted to even coordinates within the picture.
    pub fn set_selection(&self, target: SelectionTarget, mut rect: Rect) -> ContextResult<Rect> {
        if target != SelectionTarget::Crop {
            return Err(ContextError::InvalidArgument(format!("{:?} is read-only", target)));
        }

        let mut inner = self.lock();
        let picture = inner.formats.picture;

        // Even dimensions are expected by most codecs.
        rect.left = crate::align_up(rect.left, 2);
        rect.top = crate::align_up(rect.top, 2);

        let width_max = picture.width.saturating_sub(rect.left);
        let height_max = picture.height.saturating_sub(rect.top);
        rect.width = rect.width.max(2).min(width_max);
        rect.height = rect.height.max(2).min(height_max);

        inner.formats.selection = rect;

        Ok(rect)
    }

    pub fn frame_interval(&self, format_type: FormatType) -> Fraction {
        self.lock().formats.timeperframe(format_type)
    }

    /// Sets the frame interval of `format_type`. A zero term leaves it unchanged. The picture
    /// interval also applies to the coded side.
    pub fn set_frame_interval(&self, format_type: FormatType, interval: Fraction) -> Fraction {
        let mut inner = self.lock();
        let formats = &mut inner.formats;

        if interval.numerator == 0 || interval.denominator == 0 {
            return formats.timeperframe(format_type);
        }

        match format_type {
            FormatType::Coded => formats.timeperframe_coded = interval,
            FormatType::Picture => {
                formats.timeperframe_picture = interval;
                formats.timeperframe_coded = interval;
            }
        }

        interval
    }

    // Controls

    /// Sets a control. The new value is restored to the previous one if the running engine
    /// refuses it.
    pub fn set_control(&self, value: ControlValue) -> ContextResult<()> {
        let mut guard = self.lock();
        let inner = &mut *guard;
        let id = value.id();

        inner.controls.check(&value)?;
        inner.engine.ctrl_validate(&inner.controls, &value)?;

        let previous = inner.controls.get(id).cloned();
        inner.controls.set(value)?;

        if let Some(session) = inner.session.as_mut() {
            if let Err(e) = session.ctrl_prepare(&mut inner.controls, id) {
                if let Some(previous) = previous {
                    inner.controls.set(previous)?;
                }
                return Err(e.into());
            }
        }

        Ok(())
    }

    pub fn control(&self, id: ControlId) -> Option<ControlValue> {
        self.lock().controls.get(id).cloned()
    }

    // Buffers

    /// Allocates `count` buffers of at least `size` bytes, or of the format size if `size` is
    /// `None`. Returns the indices of the new buffers.
    pub fn create_buffers(
        &self,
        format_type: FormatType,
        count: usize,
        size: Option<usize>,
    ) -> ContextResult<Range<usize>> {
        let needed = self.format(format_type).sizeimage as usize;
        let size = match size {
            Some(size) if size < needed => {
                return Err(ContextError::BufferTooSmall { size, needed });
            }
            Some(size) => size,
            None => needed,
        };

        let first = self.lock().queue(format_type).len();
        for _ in 0..count {
            let memory = self.shared.device.allocator.allocate(size).map_err(EngineError::from)?;
            self.import_buffer(format_type, memory)?;
        }

        Ok(first..first + count)
    }

    /// Registers externally allocated memory as a new buffer.
    pub fn import_buffer(
        &self,
        format_type: FormatType,
        memory: Box<dyn DmaBuffer>,
    ) -> ContextResult<usize> {
        let mut guard = self.lock();
        let inner = &mut *guard;

        let needed = inner.formats.get(format_type).sizeimage as usize;
        if memory.len() < needed {
            return Err(ContextError::BufferTooSmall { size: memory.len(), needed });
        }

        let index = inner.queue_mut(format_type).add(memory);

        // Only picture buffers carry engine data.
        if format_type == FormatType::Picture {
            let ContextInner { engine, formats, controls, picture_queue, .. } = inner;
            let setup = SetupContext {
                regs: &self.shared.device.regs,
                allocator: self.shared.device.allocator.as_ref(),
                controls,
                formats,
            };
            if let Some(buffer) = picture_queue.buffer_mut(index) {
                if let Err(e) = engine.buffer_setup(&setup, buffer) {
                    log::error!("failed to set up picture buffer {}: {}", index, e);
                    picture_queue.remove_last();
                    return Err(e.into());
                }
            }
        }

        Ok(index)
    }

    /// Unregisters all the buffers of a non-streaming queue.
    pub fn free_buffers(&self, format_type: FormatType) -> ContextResult<()> {
        let mut inner = self.lock();

        if inner.queue(format_type).is_streaming() {
            return Err(ContextError::Busy);
        }

        let engine = inner.engine;
        for mut buffer in inner.queue_mut(format_type).remove_all() {
            if format_type == FormatType::Picture {
                engine.buffer_cleanup(&mut buffer);
            }
        }

        Ok(())
    }

    /// Runs `f` on a registered buffer.
    pub fn with_buffer<R>(
        &self,
        format_type: FormatType,
        index: usize,
        f: impl FnOnce(&Buffer) -> R,
    ) -> ContextResult<R> {
        let inner = self.lock();
        let buffer = inner
            .queue(format_type)
            .buffer(index)
            .ok_or(ContextError::InvalidBuffer(index))?;

        Ok(f(buffer))
    }

    /// Runs `f` on a registered buffer owned by the caller, e.g. to fill it.
    pub fn with_buffer_mut<R>(
        &self,
        format_type: FormatType,
        index: usize,
        f: impl FnOnce(&mut Buffer) -> R,
    ) -> ContextResult<R> {
        let mut inner = self.lock();
        let buffer = inner
            .queue_mut(format_type)
            .buffer_mut(index)
            .filter(|b| b.state() == BufferState::Dequeued)
            .ok_or(ContextError::InvalidBuffer(index))?;

        Ok(f(buffer))
    }

    /// Hands a buffer over to the context.
    pub fn queue_buffer(
        &self,
        format_type: FormatType,
        index: usize,
        params: QueueParams,
    ) -> ContextResult<()> {
        {
            let mut guard = self.lock();
            let inner = &mut *guard;
            let sizeimage = inner.formats.get(format_type).sizeimage as usize;

            if !params.request.is_empty() {
                if format_type != source_type(self.shared.role) {
                    return Err(ContextError::InvalidArgument(
                        "requests are only accepted on the source queue".into(),
                    ));
                }
                for value in &params.request {
                    inner.controls.check(value)?;
                    inner.engine.ctrl_validate(&inner.controls, value)?;
                }
            }

            let queue = inner.queue_mut(format_type);
            let buffer = queue
                .buffer_mut(index)
                .filter(|b| b.state() == BufferState::Dequeued)
                .ok_or(ContextError::InvalidBuffer(index))?;

            if buffer.len() < sizeimage {
                return Err(ContextError::BufferTooSmall { size: buffer.len(), needed: sizeimage });
            }

            match format_type {
                // The picture payload is always set from the driver side.
                FormatType::Picture => buffer.set_bytesused(sizeimage),
                FormatType::Coded => buffer.set_bytesused(params.bytesused),
            }
            buffer.set_timestamp(params.timestamp);
            buffer.set_flags(params.flags);
            buffer.set_request(params.request);

            if !queue.enqueue(index) {
                return Err(ContextError::InvalidBuffer(index));
            }
        }

        self.try_schedule();

        Ok(())
    }

    /// Takes back the oldest completed buffer of a queue, if any.
    pub fn dequeue_buffer(&self, format_type: FormatType) -> ContextResult<Option<DequeuedBuffer>> {
        let mut inner = self.lock();
        let queue = inner.queue_mut(format_type);

        let Some((index, state)) = queue.dequeue() else {
            if !queue.is_streaming() {
                return Err(ContextError::NotStreaming);
            }
            return Ok(None);
        };

        let buffer = queue.buffer(index).ok_or(ContextError::InvalidBuffer(index))?;

        Ok(Some(DequeuedBuffer {
            index,
            state,
            bytesused: buffer.bytesused(),
            timestamp: buffer.timestamp(),
            flags: buffer.flags(),
        }))
    }

    // Streaming

    /// Starts streaming a queue. Starting the coded queue powers the engine up and starts its
    /// session.
    pub fn stream_on(&self, format_type: FormatType) -> ContextResult<()> {
        {
            let mut guard = self.lock();
            let inner = &mut *guard;

            if inner.queue(format_type).is_streaming() {
                return Ok(());
            }

            if format_type == FormatType::Coded {
                let device = &self.shared.device;
                if let Err(e) = device.power.power_get() {
                    inner.coded_queue.drain(BufferState::Error);
                    return Err(EngineError::from(e).into());
                }

                let setup = SetupContext {
                    regs: &device.regs,
                    allocator: device.allocator.as_ref(),
                    controls: &inner.controls,
                    formats: &inner.formats,
                };
                match inner.engine.setup(&setup) {
                    Ok(session) => inner.session = Some(session),
                    Err(e) => {
                        let codec = inner.engine.codec();
                        log::error!("failed to set up the {:?} engine: {}", codec, e);
                        device.power.power_put();
                        inner.coded_queue.drain(BufferState::Error);
                        return Err(e.into());
                    }
                }
            }

            inner.queue_mut(format_type).set_streaming(true);
        }

        self.try_schedule();

        Ok(())
    }

    /// Stops streaming a queue once its running job is done. Buffers still queued are returned
    /// with an error state.
    pub fn stream_off(&self, format_type: FormatType) -> ContextResult<()> {
        self.shared.device.unschedule(self);

        let mut inner = self.wait_job(self.lock());

        if !inner.queue(format_type).is_streaming() {
            return Ok(());
        }

        if format_type == FormatType::Coded {
            if let Some(mut session) = inner.session.take() {
                session.cleanup();
            }
            if let Ok(proc) = self.proc() {
                proc.active().clear_if_equal(self);
            }
            self.shared.device.power.power_put();
        }

        inner.held_picture = None;
        let queue = inner.queue_mut(format_type);
        queue.set_streaming(false);
        queue.drain(BufferState::Error);

        Ok(())
    }

    /// Waits for the running job of the context to complete. Returns `false` on timeout.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let guard = self.lock();
        let (guard, _) = self
            .shared
            .idle
            .wait_timeout_while(guard, timeout, |inner| inner.job.is_some())
            .unwrap_or_else(PoisonError::into_inner);

        guard.job.is_none()
    }

    /// Waits for the running job, bounded by twice the watchdog timeout since the watchdog
    /// always completes a lost job.
    fn wait_job<'a>(
        &self,
        mut guard: MutexGuard<'a, ContextInner>,
    ) -> MutexGuard<'a, ContextInner> {
        let deadline = Instant::now() + self.shared.device.watchdog.timeout() * 2;

        while guard.job.is_some() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                log::error!("job still running after the watchdog timeout");
                break;
            }

            guard = self
                .shared
                .idle
                .wait_timeout(guard, remaining)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }

        guard
    }

    /// Closes the session, stopping both queues and releasing all the buffers.
    pub fn release(self) -> ContextResult<()> {
        self.stream_off(FormatType::Coded)?;
        self.stream_off(FormatType::Picture)?;
        self.free_buffers(FormatType::Coded)?;
        self.free_buffers(FormatType::Picture)?;

        if let Ok(proc) = self.proc() {
            proc.active().clear_if_equal(&self);
        }

        Ok(())
    }

    /// Queues the context on the device if it has a job ready, then lets the device run.
    pub(crate) fn try_schedule(&self) {
        let ready = self.lock().job_ready();
        if ready {
            self.shared.device.schedule(self);
        }

        self.shared.device.try_run();
    }
}
