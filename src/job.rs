// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Job pipeline.
//!
//! Contexts with a job ready wait on the device in order. The device dispatches them one at a
//! time: a job binds the next buffer of each queue, applies the controls of its request, programs
//! the engine and triggers it. The job then completes from the interrupt handler or the watchdog,
//! or right away if programming failed.

use std::sync::PoisonError;

use crate::context::source_type;
use crate::context::Context;
use crate::context::ContextInner;
use crate::context::Job;
use crate::device::Device;
use crate::engine::EngineResult;
use crate::engine::JobContext;
use crate::engine::Role;
use crate::proc::FormatType;
use crate::queue::copy_metadata;
use crate::queue::flags;
use crate::queue::BufferState;

impl Device {
    /// Queues `ctx` for dispatch, unless it is already waiting or running.
    pub(crate) fn schedule(&self, ctx: &Context) {
        let in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);

        if in_flight.as_ref() != Some(ctx) && !pending.contains(ctx) {
            pending.push_back(ctx.clone());
        }
    }

    /// Removes `ctx` from the dispatch queue. A running job is not affected.
    pub(crate) fn unschedule(&self, ctx: &Context) {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner).retain(|c| c != ctx);
    }

    /// Dispatches waiting contexts until one of them keeps the hardware busy.
    pub(crate) fn try_run(&self) {
        loop {
            let ctx = {
                let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
                if in_flight.is_some() {
                    return;
                }

                let next = self.pending.lock().unwrap_or_else(PoisonError::into_inner).pop_front();
                let Some(ctx) = next else {
                    return;
                };

                *in_flight = Some(ctx.clone());
                ctx
            };

            if ctx.run_job() {
                return;
            }

            // The job failed before reaching the hardware or was not ready anymore.
            self.clear_in_flight(&ctx);
            if ctx.lock().job_ready() {
                self.schedule(&ctx);
            }
        }
    }

    /// Completes the running job of `ctx` with `state`, then dispatches the next one.
    pub(crate) fn job_complete(&self, ctx: &Context, state: BufferState) {
        ctx.job_finish(state);
        self.clear_in_flight(ctx);

        ctx.try_schedule();
    }

    fn clear_in_flight(&self, ctx: &Context) {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);

        if in_flight.as_ref() == Some(ctx) {
            *in_flight = None;
        }
    }
}

/// Builds the job view of `inner` for `job`.
macro_rules! job_context {
    ($device:expr, $inner:expr, $job:expr) => {
        JobContext {
            regs: &$device.regs,
            allocator: $device.allocator.as_ref(),
            controls: &$inner.controls,
            formats: &$inner.formats,
            coded_queue: &mut $inner.coded_queue,
            picture_queue: &mut $inner.picture_queue,
            coded_index: $job.coded_index,
            picture_index: $job.picture_index,
            first_slice: $job.first_slice,
        }
    };
}

impl Context {
    /// Runs the next job of the context. Returns whether the hardware was triggered.
    pub(crate) fn run_job(&self) -> bool {
        let device = self.device();
        let role = self.role();
        let mut guard = self.lock();
        let inner = &mut *guard;

        if !inner.job_ready() {
            return false;
        }

        let source = source_type(role);
        let source_index = match inner.queue(source).next_ready() {
            Some(index) => index,
            None => return false,
        };

        // A held picture is released once the slices of another picture come in.
        let mut first_slice = true;
        if let Some(held) = inner.held_picture.take() {
            let source_ts = inner.queue(source).buffer(source_index).map(|b| b.timestamp());
            let held_ts = inner.picture_queue.buffer(held).map(|b| b.timestamp());
            if source_ts != held_ts {
                inner.picture_queue.buffer_done(held, BufferState::Done);
                if inner.picture_queue.next_ready().is_none() {
                    return false;
                }
            } else {
                first_slice = false;
            }
        }

        let (Some(coded_index), Some(picture_index)) =
            (inner.coded_queue.activate_next(), inner.picture_queue.activate_next())
        else {
            log::error!("job started without buffers");
            return false;
        };
        let job = Job { coded_index, picture_index, first_slice };
        inner.job = Some(job);

        if let Err(e) = apply_request(inner, source, job) {
            log::error!("failed to apply the request controls: {}", e);
            self.finish_locked(inner, BufferState::Error);
            return false;
        }

        let (src, dst) = match role {
            Role::Decoder => (&inner.coded_queue, &mut inner.picture_queue),
            Role::Encoder => (&inner.picture_queue, &mut inner.coded_queue),
        };
        let dst_index = match role {
            Role::Decoder => picture_index,
            Role::Encoder => coded_index,
        };
        if let (Some(src), Some(dst)) = (src.buffer(source_index), dst.buffer_mut(dst_index)) {
            copy_metadata(src, dst);
        }

        if let Err(e) = self.configure_job(inner, job) {
            log::error!("failed to configure the {:?} job: {}", inner.engine.codec(), e);
            self.finish_locked(inner, BufferState::Error);
            return false;
        }

        // Interrupts and timeouts find the engine of the job through the active context.
        if let Some(proc) = device.proc(role) {
            proc.active().set(self);
        }

        device.watchdog.arm();

        if let Some(session) = inner.session.as_mut() {
            let ctx = job_context!(device, inner, job);
            session.job_trigger(&ctx);
        }

        log::debug!("{:?} job triggered: coded {} picture {}", role, coded_index, picture_index);

        true
    }

    fn configure_job(&self, inner: &mut ContextInner, job: Job) -> EngineResult<()> {
        let device = self.device();
        let engine = inner.engine;

        let Some(session) = inner.session.as_mut() else {
            return Err(anyhow::anyhow!("no engine session").into());
        };
        let mut ctx = job_context!(device, inner, job);

        session.job_prepare(&mut ctx)?;
        engine.format_configure(ctx.regs, ctx.formats)?;

        if let Some(proc) = device.proc(self.role()) {
            let picture = ctx.picture_dma()?;
            proc.format_picture_configure(ctx.regs, ctx.formats, picture)?;
        }

        session.job_configure(&mut ctx)
    }

    /// Completes the running job of the context.
    pub(crate) fn job_finish(&self, state: BufferState) {
        let mut guard = self.lock();
        self.finish_locked(&mut guard, state);
    }

    fn finish_locked(&self, inner: &mut ContextInner, state: BufferState) {
        let device = self.device();
        let Some(job) = inner.job.take() else {
            log::error!("finishing a job that is not running");
            return;
        };

        if let Some(session) = inner.session.as_mut() {
            let mut ctx = job_context!(device, inner, job);
            session.job_finish(&mut ctx, state);
        }

        let hold = self.role() == Role::Decoder
            && state == BufferState::Done
            && inner.engine.slice_based()
            && inner
                .coded_queue
                .buffer(job.coded_index)
                .is_some_and(|b| b.flags() & flags::HOLD_PICTURE != 0);

        inner.coded_queue.buffer_done(job.coded_index, state);
        if hold {
            inner.picture_queue.buffer_hold(job.picture_index);
            inner.held_picture = Some(job.picture_index);
        } else {
            inner.picture_queue.buffer_done(job.picture_index, state);
        }

        log::debug!("{:?} job finished: {:?}", self.role(), state);

        self.notify_idle();
    }
}

/// Applies the control values queued along with the source buffer of `job`.
fn apply_request(inner: &mut ContextInner, source: FormatType, job: Job) -> EngineResult<()> {
    let index = match source {
        FormatType::Coded => job.coded_index,
        FormatType::Picture => job.picture_index,
    };
    let request = match inner.queue_mut(source).buffer_mut(index) {
        Some(buffer) => buffer.take_request(),
        None => return Ok(()),
    };

    for value in request {
        let id = value.id();
        inner.controls.set(value)?;
        if let Some(session) = inner.session.as_mut() {
            session.ctrl_prepare(&mut inner.controls, id)?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::context::QueueParams;
    use crate::controls::ControlValue;
    use crate::controls::Mpeg2Sequence;
    use crate::device::DeviceConfig;
    use crate::dummy::DummyDevice;
    use crate::regs;
    use crate::supervisor::IrqReturn;

    const H3: &str = "allwinner,sun8i-h3-video-engine";

    /// An MPEG-2 decoding context with `count` buffers on each queue, all streaming.
    fn streaming_mpeg2(dummy: &DummyDevice, count: usize) -> Context {
        let ctx = Context::new(&dummy.device, Role::Decoder).unwrap();
        ctx.create_buffers(FormatType::Coded, count, None).unwrap();
        ctx.create_buffers(FormatType::Picture, count, None).unwrap();
        ctx.stream_on(FormatType::Coded).unwrap();
        ctx.stream_on(FormatType::Picture).unwrap();

        ctx
    }

    fn queue_coded(ctx: &Context, index: usize, timestamp: u64) {
        let params = QueueParams {
            bytesused: 512,
            timestamp,
            request: vec![ControlValue::Mpeg2Sequence(Mpeg2Sequence {
                horizontal_size: 1280,
                vertical_size: 720,
                ..Default::default()
            })],
            ..Default::default()
        };
        ctx.queue_buffer(FormatType::Coded, index, params).unwrap();
    }

    #[test]
    fn interrupt_completes_the_job() {
        let _ = env_logger::try_init();

        let dummy = DummyDevice::new(H3);
        let ctx = streaming_mpeg2(&dummy, 2);

        ctx.queue_buffer(FormatType::Picture, 0, QueueParams::default()).unwrap();
        queue_coded(&ctx, 0, 1000);

        assert!(dummy.device.watchdog.is_armed());
        assert!(dummy.registers.last_write(regs::mpeg2::TRIGGER).is_some());
        let active = dummy.device.proc(Role::Decoder).unwrap().active();
        assert_eq!(active.snapshot(), Some(ctx.clone()));

        // Not raised yet.
        assert_eq!(dummy.device.handle_irq(), IrqReturn::None);
        assert!(dummy.device.watchdog.is_armed());

        dummy.registers.script_read(regs::mpeg2::STATUS, regs::mpeg2::STATUS_SUCCESS);
        assert_eq!(dummy.device.handle_irq(), IrqReturn::Handled);

        let picture = ctx.dequeue_buffer(FormatType::Picture).unwrap().unwrap();
        assert_eq!((picture.index, picture.state, picture.timestamp), (0, BufferState::Done, 1000));
        let coded = ctx.dequeue_buffer(FormatType::Coded).unwrap().unwrap();
        assert_eq!(coded.state, BufferState::Done);

        // The request was applied to the context.
        let sequence = ctx.control(crate::controls::ControlId::Mpeg2Sequence).unwrap();
        assert!(matches!(sequence, ControlValue::Mpeg2Sequence(s) if s.horizontal_size == 1280));

        // A late interrupt finds nothing to complete.
        assert_eq!(dummy.device.handle_irq(), IrqReturn::Handled);
        assert!(ctx.dequeue_buffer(FormatType::Picture).unwrap().is_none());
    }

    #[test]
    fn error_status_fails_the_job() {
        let dummy = DummyDevice::new(H3);
        let ctx = streaming_mpeg2(&dummy, 2);

        ctx.queue_buffer(FormatType::Picture, 0, QueueParams::default()).unwrap();
        queue_coded(&ctx, 0, 1);
        dummy.registers.script_read(regs::mpeg2::STATUS, regs::mpeg2::STATUS_CHECK_ERROR);

        assert_eq!(dummy.device.handle_irq(), IrqReturn::Handled);
        let picture = ctx.dequeue_buffer(FormatType::Picture).unwrap().unwrap();
        assert_eq!(picture.state, BufferState::Error);
    }

    #[test]
    fn jobs_run_one_at_a_time() {
        let dummy = DummyDevice::new(H3);
        let first = streaming_mpeg2(&dummy, 1);
        let second = streaming_mpeg2(&dummy, 1);

        first.queue_buffer(FormatType::Picture, 0, QueueParams::default()).unwrap();
        second.queue_buffer(FormatType::Picture, 0, QueueParams::default()).unwrap();
        queue_coded(&first, 0, 1);
        queue_coded(&second, 0, 2);

        let triggers = || dummy.registers.writes_to(regs::mpeg2::TRIGGER).len();
        assert_eq!(triggers(), 1);

        dummy.registers.script_read(regs::mpeg2::STATUS, regs::mpeg2::STATUS_SUCCESS);
        dummy.device.handle_irq();
        assert_eq!(triggers(), 2);
        let active = dummy.device.proc(Role::Decoder).unwrap().active();
        assert_eq!(active.snapshot(), Some(second.clone()));

        dummy.device.handle_irq();
        assert!(first.dequeue_buffer(FormatType::Picture).unwrap().is_some());
        assert!(second.dequeue_buffer(FormatType::Picture).unwrap().is_some());
    }

    #[test]
    fn configuration_failure_completes_immediately() {
        let dummy = DummyDevice::new(H3);
        let ctx = streaming_mpeg2(&dummy, 1);

        // Picture buffers larger than the bounds of the engine cannot be decoded into.
        ctx.queue_buffer(FormatType::Picture, 0, QueueParams::default()).unwrap();
        let params = QueueParams {
            request: vec![ControlValue::Integer(crate::controls::ControlId::GopSize, 1)],
            ..Default::default()
        };
        assert!(ctx.queue_buffer(FormatType::Coded, 0, params).is_err());

        let params = QueueParams {
            request: vec![ControlValue::Mpeg2Sequence(Mpeg2Sequence {
                horizontal_size: 1280,
                vertical_size: 720,
                chroma_format: 2,
                ..Default::default()
            })],
            ..Default::default()
        };
        ctx.queue_buffer(FormatType::Coded, 0, params).unwrap();

        assert!(!dummy.device.watchdog.is_armed());
        let picture = ctx.dequeue_buffer(FormatType::Picture).unwrap().unwrap();
        assert_eq!(picture.state, BufferState::Error);
        assert!(dummy.registers.writes_to(regs::mpeg2::TRIGGER).is_empty());
    }

    #[test]
    fn watchdog_recovers_lost_jobs() {
        let _ = env_logger::try_init();

        let config = DeviceConfig {
            watchdog_timeout: Duration::from_millis(20),
            ..Default::default()
        };
        let dummy = DummyDevice::with_config(H3, config);
        let ctx = streaming_mpeg2(&dummy, 2);

        ctx.queue_buffer(FormatType::Picture, 0, QueueParams::default()).unwrap();
        queue_coded(&ctx, 0, 7);

        assert!(dummy.device.watchdog.wait_fired(1, Duration::from_secs(5)));
        assert!(ctx.wait_idle(Duration::from_secs(5)));

        assert_eq!(dummy.power.resets(), 1);
        let picture = ctx.dequeue_buffer(FormatType::Picture).unwrap().unwrap();
        assert_eq!(picture.state, BufferState::Error);
        assert!(ctx.dequeue_buffer(FormatType::Picture).unwrap().is_none());
        assert_eq!(dummy.device.proc(Role::Decoder).unwrap().active().snapshot(), None);

        // The interrupt of the lost job shows up late and is treated as spurious.
        dummy.registers.script_read(regs::mpeg2::STATUS, regs::mpeg2::STATUS_SUCCESS);
        assert_eq!(dummy.device.handle_irq(), IrqReturn::Handled);
        assert_eq!(dummy.power.resets(), 1);
        assert!(ctx.dequeue_buffer(FormatType::Picture).unwrap().is_none());
    }

    #[test]
    fn held_pictures_collect_slices() {
        let dummy = DummyDevice::new(H3);
        let ctx = Context::new(&dummy.device, Role::Decoder).unwrap();
        let mut coded = ctx.format(FormatType::Coded);
        coded.pixelformat = crate::fourcc::H264_SLICE;
        ctx.set_format(FormatType::Coded, coded).unwrap();
        ctx.create_buffers(FormatType::Coded, 3, None).unwrap();
        ctx.create_buffers(FormatType::Picture, 2, None).unwrap();

        let mut inner = ctx.lock();
        for index in 0..3 {
            let buffer = inner.coded_queue.buffer_mut(index).unwrap();
            buffer.set_flags(if index == 0 { flags::HOLD_PICTURE } else { 0 });
        }
        inner.coded_queue.enqueue(0);
        inner.coded_queue.enqueue(1);
        inner.picture_queue.enqueue(0);
        let job = Job {
            coded_index: inner.coded_queue.activate_next().unwrap(),
            picture_index: inner.picture_queue.activate_next().unwrap(),
            first_slice: true,
        };
        inner.job = Some(job);
        ctx.finish_locked(&mut inner, BufferState::Done);

        assert_eq!(inner.held_picture, Some(0));
        assert_eq!(inner.picture_queue.next_ready(), Some(0));
        assert_eq!(inner.picture_queue.buffer(0).unwrap().state(), BufferState::Queued);
        assert_eq!(inner.coded_queue.dequeue(), Some((0, BufferState::Done)));
    }
}
