// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Completion of dispatched jobs from the interrupt line or the watchdog.
//!
//! Every triggered job arms the [`Watchdog`]. The interrupt handler cancels it before touching the
//! job, and the watchdog takes its deadline before firing, so exactly one of them gets to finish
//! a given job.

use std::os::fd::AsFd;
use std::sync::Arc;
use std::sync::Condvar;
use std::sync::Mutex;
use std::sync::PoisonError;
use std::thread::JoinHandle;
use std::time::Duration;
use std::time::Instant;

use nix::errno::Errno;
use nix::sys::epoll::Epoll;
use nix::sys::epoll::EpollCreateFlags;
use nix::sys::epoll::EpollEvent;
use nix::sys::epoll::EpollFlags;
use nix::sys::epoll::EpollTimeout;
use nix::sys::eventfd::EventFd;
use thiserror::Error;

use crate::context::Context;
use crate::device::Device;
use crate::engine::IrqStatus;
use crate::queue::BufferState;

#[derive(Debug, Error)]
pub enum WatchdogError {
    #[error("failed to create Epoll: {0}")]
    Epoll(Errno),
    #[error("failed to add poll FDs to Epoll: {0}")]
    EpollAdd(Errno),
    #[error("failed to create the wake-up event: {0}")]
    EventFd(Errno),
    #[error("failed to spawn the watchdog thread: {0}")]
    Spawn(std::io::Error),
    #[error("the watchdog is already running")]
    AlreadyStarted,
}

/// Whether an interrupt was raised by the video engine.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum IrqReturn {
    /// The interrupt belongs to another device sharing the line, or the job is not done yet.
    None,
    Handled,
}

#[derive(Default)]
struct WatchdogState {
    deadline: Option<Instant>,
    stopped: bool,
    fired: u64,
}

struct WatchdogShared {
    state: Mutex<WatchdogState>,
    fired: Condvar,
    wake: EventFd,
}

impl WatchdogShared {
    fn lock(&self) -> std::sync::MutexGuard<'_, WatchdogState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn wake(&self) {
        if let Err(e) = self.wake.write(1) {
            log::error!("failed to wake the watchdog thread: {}", e);
        }
    }
}

/// A one-shot timer serving the device.
pub struct Watchdog {
    timeout: Duration,
    shared: Arc<WatchdogShared>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl Watchdog {
    pub fn new(timeout: Duration) -> Result<Self, WatchdogError> {
        Ok(Self {
            timeout,
            shared: Arc::new(WatchdogShared {
                state: Mutex::new(WatchdogState::default()),
                fired: Condvar::new(),
                wake: EventFd::new().map_err(WatchdogError::EventFd)?,
            }),
            thread: Mutex::new(None),
        })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Starts the timer thread, which calls `on_timeout` every time an armed deadline expires.
    pub fn start<F>(&self, on_timeout: F) -> Result<(), WatchdogError>
    where
        F: Fn() + Send + 'static,
    {
        let mut thread = self.thread.lock().unwrap_or_else(PoisonError::into_inner);
        if thread.is_some() {
            return Err(WatchdogError::AlreadyStarted);
        }

        let epoll = Epoll::new(EpollCreateFlags::empty()).map_err(WatchdogError::Epoll)?;
        epoll
            .add(self.shared.wake.as_fd(), EpollEvent::new(EpollFlags::EPOLLIN, 1))
            .map_err(WatchdogError::EpollAdd)?;

        let shared = Arc::clone(&self.shared);
        let handle = std::thread::Builder::new()
            .name("cedrus-watchdog".into())
            .spawn(move || watchdog_loop(shared, epoll, on_timeout))
            .map_err(WatchdogError::Spawn)?;

        *thread = Some(handle);

        Ok(())
    }

    /// Arms the timer, replacing any pending deadline.
    pub fn arm(&self) {
        self.shared.lock().deadline = Some(Instant::now() + self.timeout);
        self.shared.wake();
    }

    /// Cancels the pending deadline and returns it. Returns `None` if there was none, which
    /// means the timer already fired or was never armed.
    pub fn cancel(&self) -> Option<Instant> {
        self.shared.lock().deadline.take()
    }

    /// Puts back a deadline taken by [`Watchdog::cancel`]. A deadline that passed meanwhile
    /// expires right away.
    pub fn restore(&self, deadline: Instant) {
        self.shared.lock().deadline = Some(deadline);
        self.shared.wake();
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.shared.lock().deadline
    }

    pub fn is_armed(&self) -> bool {
        self.shared.lock().deadline.is_some()
    }

    /// Number of deadlines that expired so far.
    pub fn fired_count(&self) -> u64 {
        self.shared.lock().fired
    }

    /// Waits until the timer has fired at least `count` times, or `timeout` elapsed.
    pub fn wait_fired(&self, count: u64, timeout: Duration) -> bool {
        let state = self.shared.lock();
        let (state, _) = self
            .shared
            .fired
            .wait_timeout_while(state, timeout, |state| state.fired < count)
            .unwrap_or_else(PoisonError::into_inner);

        state.fired >= count
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        self.shared.lock().stopped = true;
        self.shared.wake();

        let thread = self.thread.get_mut().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(thread) = thread {
            // The last reference to the device may be released from the timeout callback.
            if thread.thread().id() != std::thread::current().id() && thread.join().is_err() {
                log::error!("watchdog thread panicked");
            }
        }
    }
}

fn watchdog_loop<F: Fn()>(shared: Arc<WatchdogShared>, epoll: Epoll, on_timeout: F) {
    loop {
        let timeout = {
            let mut state = shared.lock();
            if state.stopped {
                return;
            }

            match state.deadline {
                Some(deadline) if deadline <= Instant::now() => {
                    state.deadline = None;
                    drop(state);

                    on_timeout();

                    shared.lock().fired += 1;
                    shared.fired.notify_all();
                    continue;
                }
                Some(deadline) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    let millis = remaining.as_millis().saturating_add(1);
                    EpollTimeout::from(u16::try_from(millis).unwrap_or(u16::MAX))
                }
                None => EpollTimeout::NONE,
            }
        };

        let mut events = [EpollEvent::empty()];
        match epoll.wait(&mut events, timeout) {
            Ok(0) => (),
            Ok(_) => {
                if let Err(e) = shared.wake.read() {
                    log::error!("failed to read the watchdog wake-up event: {}", e);
                }
            }
            Err(Errno::EINTR) => (),
            Err(e) => {
                log::error!("watchdog poll failed: {}", e);
                return;
            }
        }
    }
}

impl Device {
    /// Handles the video engine interrupt.
    pub fn handle_irq(&self) -> IrqReturn {
        // Losing the cancel race means the watchdog already finished the job.
        let Some(deadline) = self.watchdog.cancel() else {
            self.irq_spurious();
            return IrqReturn::Handled;
        };

        let Some(ctx) = self.running_context() else {
            log::error!("interrupt raised without any job in flight");
            self.irq_spurious();
            return IrqReturn::None;
        };

        let engine = ctx.engine();
        let state = match engine.irq_status(&self.regs) {
            IrqStatus::None => {
                // Another device on the line. The job keeps its original deadline.
                self.watchdog.restore(deadline);
                return IrqReturn::None;
            }
            IrqStatus::Error => BufferState::Error,
            IrqStatus::Success => BufferState::Done,
        };

        engine.irq_disable(&self.regs);
        engine.irq_clear(&self.regs);

        self.job_complete(&ctx, state);

        IrqReturn::Handled
    }

    /// Recovers from a job that did not complete in time.
    pub(crate) fn handle_timeout(&self) {
        let Some(ctx) = self.running_context() else {
            return;
        };

        log::error!("frame processing timed out");

        if let Err(e) = self.power.reset() {
            log::error!("failed to reset the video engine: {}", e);
        }

        for proc in self.procs() {
            proc.active().clear_if_equal(&ctx);
        }

        self.job_complete(&ctx, BufferState::Error);
    }

    /// Silences the interrupt sources of the active context of every role.
    fn irq_spurious(&self) {
        for proc in self.procs() {
            if let Some(ctx) = proc.active().snapshot() {
                let engine = ctx.engine();
                engine.irq_disable(&self.regs);
                engine.irq_clear(&self.regs);
            }
        }
    }

    fn running_context(&self) -> Option<Context> {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}
