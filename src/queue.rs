// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Buffer queues of a context.
//!
//! Each context has a coded queue and a picture queue. Buffers are registered once, then cycle
//! between the caller (dequeued), the ready list (queued), the running job (active) and the done
//! list, from which the caller dequeues them again.

use std::collections::VecDeque;

use crate::controls::ControlValue;
use crate::dma::DmaBuffer;
use crate::engine::EngineBuffer;
use crate::proc::FormatType;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BufferState {
    /// Owned by the caller.
    Dequeued,
    /// Waiting to be picked by a job.
    Queued,
    /// Bound to the running job.
    Active,
    /// Processed successfully and waiting to be dequeued.
    Done,
    /// Processing failed and the buffer waits to be dequeued.
    Error,
}

/// Buffer flags, matching the V4L2 buffer flags they stand for.
pub mod flags {
    /// The buffer holds a key frame.
    pub const KEYFRAME: u32 = 0x0000_0008;
    /// The buffer holds a predicted frame.
    pub const PFRAME: u32 = 0x0000_0010;
    /// The buffer holds a bidirectionally predicted frame.
    pub const BFRAME: u32 = 0x0000_0020;
    /// More slices of the same picture follow this coded buffer, so the picture buffer must stay
    /// bound to the next job.
    pub const HOLD_PICTURE: u32 = 0x0000_0200;

    /// Flags describing the frame, copied from the source to the destination of a job.
    pub const FRAME_MASK: u32 = KEYFRAME | PFRAME | BFRAME;
}

pub struct Buffer {
    index: usize,
    memory: Box<dyn DmaBuffer>,
    bytesused: usize,
    timestamp: u64,
    flags: u32,
    state: BufferState,
    /// Parameters to apply to the context controls when a job picks this buffer.
    request: Vec<ControlValue>,
    /// Engine side data, only ever attached to picture buffers.
    pub(crate) engine: Option<EngineBuffer>,
}

impl Buffer {
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn memory(&self) -> &dyn DmaBuffer {
        self.memory.as_ref()
    }

    pub fn memory_mut(&mut self) -> &mut dyn DmaBuffer {
        self.memory.as_mut()
    }

    pub fn bus_address(&self) -> u32 {
        self.memory.bus_address()
    }

    /// Size of the plane.
    pub fn len(&self) -> usize {
        self.memory.len()
    }

    pub fn is_empty(&self) -> bool {
        self.memory.is_empty()
    }

    /// Number of valid bytes in the plane.
    pub fn bytesused(&self) -> usize {
        self.bytesused
    }

    pub fn set_bytesused(&mut self, bytesused: usize) {
        self.bytesused = bytesused.min(self.len());
    }

    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    pub fn set_timestamp(&mut self, timestamp: u64) {
        self.timestamp = timestamp;
    }

    pub fn flags(&self) -> u32 {
        self.flags
    }

    pub fn set_flags(&mut self, flags: u32) {
        self.flags = flags;
    }

    pub fn state(&self) -> BufferState {
        self.state
    }

    pub fn engine_buffer(&self) -> Option<&EngineBuffer> {
        self.engine.as_ref()
    }

    pub fn engine_buffer_mut(&mut self) -> Option<&mut EngineBuffer> {
        self.engine.as_mut()
    }

    pub(crate) fn take_request(&mut self) -> Vec<ControlValue> {
        std::mem::take(&mut self.request)
    }

    pub(crate) fn set_request(&mut self, request: Vec<ControlValue>) {
        self.request = request;
    }
}

/// Copies the timestamp and frame flags of `src` into `dst`.
pub fn copy_metadata(src: &Buffer, dst: &mut Buffer) {
    dst.timestamp = src.timestamp;
    dst.flags = (dst.flags & !flags::FRAME_MASK) | (src.flags & flags::FRAME_MASK);
}

pub struct Queue {
    format_type: FormatType,
    buffers: Vec<Buffer>,
    ready: VecDeque<usize>,
    done: VecDeque<usize>,
    streaming: bool,
}

impl Queue {
    pub fn new(format_type: FormatType) -> Self {
        Self {
            format_type,
            buffers: Vec::new(),
            ready: VecDeque::new(),
            done: VecDeque::new(),
            streaming: false,
        }
    }

    pub fn format_type(&self) -> FormatType {
        self.format_type
    }

    /// Registers a new buffer, returning its index.
    pub(crate) fn add(&mut self, memory: Box<dyn DmaBuffer>) -> usize {
        let index = self.buffers.len();

        self.buffers.push(Buffer {
            index,
            memory,
            bytesused: 0,
            timestamp: 0,
            flags: 0,
            state: BufferState::Dequeued,
            request: Vec::new(),
            engine: None,
        });

        index
    }

    /// Unregisters the most recently registered buffer.
    pub(crate) fn remove_last(&mut self) -> Option<Buffer> {
        let buffer = self.buffers.pop()?;
        self.ready.retain(|&i| i != buffer.index);
        self.done.retain(|&i| i != buffer.index);

        Some(buffer)
    }

    /// Unregisters all the buffers, handing them back to the caller for cleanup.
    pub(crate) fn remove_all(&mut self) -> Vec<Buffer> {
        self.ready.clear();
        self.done.clear();

        std::mem::take(&mut self.buffers)
    }

    pub fn buffer(&self, index: usize) -> Option<&Buffer> {
        self.buffers.get(index)
    }

    pub fn buffer_mut(&mut self, index: usize) -> Option<&mut Buffer> {
        self.buffers.get_mut(index)
    }

    pub fn buffers(&self) -> impl Iterator<Item = &Buffer> {
        self.buffers.iter()
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    /// A queue with buffers registered cannot change format.
    pub fn is_busy(&self) -> bool {
        !self.buffers.is_empty()
    }

    pub fn is_streaming(&self) -> bool {
        self.streaming
    }

    pub(crate) fn set_streaming(&mut self, streaming: bool) {
        self.streaming = streaming;
    }

    /// Hands a caller-owned buffer over to the queue. Returns `false` if the buffer does not exist
    /// or is not owned by the caller.
    pub(crate) fn enqueue(&mut self, index: usize) -> bool {
        match self.buffers.get_mut(index) {
            Some(buffer) if buffer.state == BufferState::Dequeued => {
                buffer.state = BufferState::Queued;
                self.ready.push_back(index);
                true
            }
            _ => false,
        }
    }

    /// The next buffer a job would pick, if any.
    pub fn next_ready(&self) -> Option<usize> {
        self.ready.front().copied()
    }

    pub fn ready_count(&self) -> usize {
        self.ready.len()
    }

    /// Binds the next ready buffer to a job, leaving it at the head of the ready list.
    pub(crate) fn activate_next(&mut self) -> Option<usize> {
        let index = self.next_ready()?;
        if let Some(buffer) = self.buffers.get_mut(index) {
            buffer.state = BufferState::Active;
        }

        Some(index)
    }

    /// Completes `index`, which must be the head of the ready list.
    pub(crate) fn buffer_done(&mut self, index: usize, state: BufferState) {
        if self.ready.front() == Some(&index) {
            self.ready.pop_front();
        } else {
            log::error!("completing buffer {} which is not at the head of the queue", index);
            self.ready.retain(|&i| i != index);
        }

        if let Some(buffer) = self.buffers.get_mut(index) {
            buffer.state = state;
            self.done.push_back(index);
        }
    }

    /// Returns a held buffer to the ready state without completing it.
    pub(crate) fn buffer_hold(&mut self, index: usize) {
        if let Some(buffer) = self.buffers.get_mut(index) {
            buffer.state = BufferState::Queued;
        }
    }

    /// Completes every ready buffer with `state`.
    pub(crate) fn drain(&mut self, state: BufferState) {
        while let Some(index) = self.next_ready() {
            self.buffer_done(index, state);
        }
    }

    /// Gives the oldest completed buffer back to the caller.
    pub(crate) fn dequeue(&mut self) -> Option<(usize, BufferState)> {
        let index = self.done.pop_front()?;
        let buffer = self.buffers.get_mut(index)?;
        let state = buffer.state;
        buffer.state = BufferState::Dequeued;

        Some((index, state))
    }

    /// Finds a buffer from its timestamp, whatever its state.
    pub fn find_by_timestamp(&self, timestamp: u64) -> Option<usize> {
        self.buffers.iter().position(|b| b.timestamp == timestamp)
    }
}
