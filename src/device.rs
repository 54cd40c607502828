// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

// UNSAFE: This file uses unsafe code to map the register window of the video engine and to access
// it with volatile loads and stores. The mapping is created once, is exactly `WINDOW_SIZE` bytes
// long, and every access is bounds-checked against it before being performed.

//! Access to the video engine: register window, power control and the per-role processors.

use std::collections::VecDeque;
use std::ffi::c_void;
use std::fmt;
use std::num::NonZeroUsize;
use std::ops::BitOr;
use std::os::fd::AsFd;
use std::ptr::NonNull;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;
use std::time::Instant;

use nix::sys::mman::mmap;
use nix::sys::mman::munmap;
use nix::sys::mman::MapFlags;
use nix::sys::mman::ProtFlags;
use thiserror::Error;

use crate::context::Context;
use crate::dma::DmaAllocator;
use crate::engine::Role;
use crate::proc::Proc;
use crate::regs;
use crate::supervisor::Watchdog;
use crate::supervisor::WatchdogError;

#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("timed out polling register {offset:#05x} for mask {mask:#010x}")]
    PollTimeout { offset: u32, mask: u32 },
    #[error("failed to map the register window: {0}")]
    Mmap(nix::Error),
    #[error("power control failed: {0}")]
    Power(anyhow::Error),
}

#[derive(Error, Debug)]
pub enum SetupError {
    #[error("no engine is supported by this variant")]
    NoEngines,
    #[error(transparent)]
    Device(#[from] DeviceError),
    #[error(transparent)]
    Watchdog(#[from] WatchdogError),
}

/// A window of 32-bit registers.
///
/// Offsets are in bytes from the start of the window and must be 4-byte aligned.
pub trait RegisterIo: Send + Sync {
    fn read(&self, offset: u32) -> u32;
    fn write(&self, offset: u32, value: u32);
}

/// Register accessor shared by all the engines of a device.
#[derive(Clone)]
pub struct Registers {
    io: Arc<dyn RegisterIo>,
    poll_interval: Duration,
    poll_timeout: Duration,
}

impl Registers {
    pub fn new(io: Arc<dyn RegisterIo>, config: &DeviceConfig) -> Self {
        Self {
            io,
            poll_interval: config.poll_interval,
            poll_timeout: config.poll_timeout,
        }
    }

    pub fn read(&self, offset: u32) -> u32 {
        self.io.read(offset)
    }

    pub fn write(&self, offset: u32, value: u32) {
        self.io.write(offset, value)
    }

    /// Waits until all the bits of `mask` are set in the register at `offset`.
    pub fn poll(&self, offset: u32, mask: u32) -> Result<(), DeviceError> {
        self.poll_until(offset, mask, true)
    }

    /// Waits until all the bits of `mask` are cleared in the register at `offset`.
    pub fn poll_cleared(&self, offset: u32, mask: u32) -> Result<(), DeviceError> {
        self.poll_until(offset, mask, false)
    }

    /// Busy-waits for the masked bits of a register to be either all set or all cleared. The
    /// register is always read one last time after the timeout has elapsed.
    pub fn poll_until(&self, offset: u32, mask: u32, set: bool) -> Result<(), DeviceError> {
        let start = Instant::now();

        loop {
            let timed_out = start.elapsed() >= self.poll_timeout;
            let value = self.read(offset) & mask;
            let done = if set { value == mask } else { value == 0 };

            if done {
                return Ok(());
            }

            if timed_out {
                return Err(DeviceError::PollTimeout { offset, mask });
            }

            std::thread::sleep(self.poll_interval);
        }
    }

    /// Streams `words` through an SRAM port, after setting the port cursor to `position`.
    pub fn write_sram_words(&self, port: SramPort, position: u32, words: &[u32]) {
        self.write(port.offset, position);

        for word in words {
            self.write(port.data, *word);
        }
    }

    /// Streams `data` through an SRAM port as little-endian words. A trailing partial word is
    /// zero-padded.
    pub fn write_sram(&self, port: SramPort, position: u32, data: &[u8]) {
        self.write(port.offset, position);

        for chunk in data.chunks(4) {
            let mut word = [0u8; 4];
            word[..chunk.len()].copy_from_slice(chunk);
            self.write(port.data, u32::from_le_bytes(word));
        }
    }
}

/// An indirect SRAM access port: a cursor register and an auto-incrementing data register.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SramPort {
    pub offset: u32,
    pub data: u32,
}

/// Register window mapped from a file descriptor, usually `/dev/mem` or a UIO device.
pub struct MmioRegisters {
    base: NonNull<c_void>,
}

// The mapping is only ever accessed through volatile 32-bit loads and stores.
unsafe impl Send for MmioRegisters {}
unsafe impl Sync for MmioRegisters {}

impl MmioRegisters {
    /// Maps the register window found at `offset` bytes into `fd`.
    pub fn new<F: AsFd>(fd: F, offset: i64) -> Result<Self, DeviceError> {
        let length = NonZeroUsize::new(regs::WINDOW_SIZE)
            .ok_or(DeviceError::Mmap(nix::Error::EINVAL))?;
        let offset = offset.try_into().map_err(|_| DeviceError::Mmap(nix::Error::EOVERFLOW))?;

        let base = unsafe {
            mmap(
                None,
                length,
                ProtFlags::PROT_READ | ProtFlags::PROT_WRITE,
                MapFlags::MAP_SHARED,
                fd,
                offset,
            )
        }
        .map_err(DeviceError::Mmap)?;

        Ok(Self { base })
    }

    fn register(&self, offset: u32) -> Option<*mut u32> {
        let offset = offset as usize;
        if offset % 4 != 0 || offset + 4 > regs::WINDOW_SIZE {
            log::error!("register offset {:#x} is outside of the window", offset);
            return None;
        }

        Some(unsafe { self.base.as_ptr().cast::<u8>().add(offset).cast::<u32>() })
    }
}

impl RegisterIo for MmioRegisters {
    fn read(&self, offset: u32) -> u32 {
        match self.register(offset) {
            Some(register) => unsafe { register.read_volatile() },
            None => 0,
        }
    }

    fn write(&self, offset: u32, value: u32) {
        if let Some(register) = self.register(offset) {
            unsafe { register.write_volatile(value) }
        }
    }
}

impl Drop for MmioRegisters {
    fn drop(&mut self) {
        if let Err(e) = unsafe { munmap(self.base, regs::WINDOW_SIZE) } {
            log::warn!("failed to unmap the register window: {}", e);
        }
    }
}

/// Power, clock and reset handling of the video engine.
pub trait PowerControl: Send + Sync {
    /// Applies the module clock rate of the variant, called once at bring-up.
    fn configure(&self, _mod_rate: u32) -> Result<(), DeviceError> {
        Ok(())
    }

    /// Takes a reference on the engine power. The engine is powered while references are held.
    fn power_get(&self) -> Result<(), DeviceError>;

    /// Releases a reference taken with [`PowerControl::power_get`].
    fn power_put(&self);

    /// Pulses the reset line, returning once the engine is out of reset.
    fn reset(&self) -> Result<(), DeviceError>;
}

/// Hardware capability bits of a variant.
#[derive(Copy, Clone, Default, PartialEq, Eq)]
pub struct Capabilities(u32);

impl Capabilities {
    pub const UNTILED: Self = Self(1 << 0);
    pub const MPEG2_DEC: Self = Self(1 << 1);
    pub const H264_DEC: Self = Self(1 << 2);
    pub const H265_DEC: Self = Self(1 << 3);
    pub const H265_10_DEC: Self = Self(1 << 4);
    pub const VP8_DEC: Self = Self(1 << 5);
    pub const H264_ENC: Self = Self(1 << 6);

    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn bits(&self) -> u32 {
        self.0
    }

    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    /// Whether all the capabilities of `required` are present.
    pub const fn contains(&self, required: Self) -> bool {
        (self.0 & required.0) == required.0
    }
}

impl BitOr for Capabilities {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        self.union(rhs)
    }
}

impl fmt::Debug for Capabilities {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Capabilities({:#04x})", self.0)
    }
}

/// Per-SoC description of the video engine.
#[derive(Copy, Clone, Debug)]
pub struct Variant {
    pub compatible: &'static str,
    pub capabilities: Capabilities,
    pub mod_rate: u32,
}

const TILED_CAPS: Capabilities = Capabilities::MPEG2_DEC
    .union(Capabilities::H264_DEC)
    .union(Capabilities::VP8_DEC);

const H3_CAPS: Capabilities = Capabilities::UNTILED
    .union(Capabilities::MPEG2_DEC)
    .union(Capabilities::H264_DEC)
    .union(Capabilities::H265_DEC)
    .union(Capabilities::VP8_DEC);

pub const VARIANTS: &[Variant] = &[
    Variant {
        compatible: "allwinner,sun4i-a10-video-engine",
        capabilities: TILED_CAPS,
        mod_rate: 320_000_000,
    },
    Variant {
        compatible: "allwinner,sun5i-a13-video-engine",
        capabilities: TILED_CAPS,
        mod_rate: 320_000_000,
    },
    Variant {
        compatible: "allwinner,sun7i-a20-video-engine",
        capabilities: TILED_CAPS,
        mod_rate: 320_000_000,
    },
    Variant {
        compatible: "allwinner,sun8i-a33-video-engine",
        capabilities: Capabilities::UNTILED.union(TILED_CAPS),
        mod_rate: 320_000_000,
    },
    Variant {
        compatible: "allwinner,sun8i-h3-video-engine",
        capabilities: H3_CAPS,
        mod_rate: 402_000_000,
    },
    Variant {
        compatible: "allwinner,sun8i-v3s-video-engine",
        capabilities: Capabilities::UNTILED
            .union(Capabilities::H264_DEC)
            .union(Capabilities::H264_ENC),
        mod_rate: 402_000_000,
    },
    Variant {
        compatible: "allwinner,sun8i-r40-video-engine",
        capabilities: Capabilities::UNTILED.union(TILED_CAPS),
        mod_rate: 297_000_000,
    },
    Variant {
        compatible: "allwinner,sun20i-d1-video-engine",
        capabilities: Capabilities::UNTILED
            .union(Capabilities::MPEG2_DEC)
            .union(Capabilities::H264_DEC)
            .union(Capabilities::H265_DEC),
        mod_rate: 432_000_000,
    },
    Variant {
        compatible: "allwinner,sun50i-a64-video-engine",
        capabilities: H3_CAPS.union(Capabilities::H264_ENC),
        mod_rate: 402_000_000,
    },
    Variant {
        compatible: "allwinner,sun50i-h5-video-engine",
        capabilities: H3_CAPS,
        mod_rate: 402_000_000,
    },
    Variant {
        compatible: "allwinner,sun50i-h6-video-engine",
        capabilities: H3_CAPS.union(Capabilities::H265_10_DEC),
        mod_rate: 600_000_000,
    },
];

impl Variant {
    pub fn find(compatible: &str) -> Option<&'static Variant> {
        VARIANTS.iter().find(|v| v.compatible == compatible)
    }
}

/// Tunables of the device-level machinery.
#[derive(Clone, Debug)]
pub struct DeviceConfig {
    /// Time after which a triggered job is considered lost and the engine is reset.
    pub watchdog_timeout: Duration,
    pub poll_interval: Duration,
    pub poll_timeout: Duration,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            watchdog_timeout: Duration::from_millis(2000),
            poll_interval: Duration::from_micros(10),
            poll_timeout: Duration::from_micros(1000),
        }
    }
}

/// A video engine instance.
///
/// The engine runs a single job at a time: contexts with work ready are queued on the device and
/// dispatched in order once the previous job has completed.
pub struct Device {
    pub(crate) regs: Registers,
    pub(crate) power: Arc<dyn PowerControl>,
    pub(crate) allocator: Arc<dyn DmaAllocator>,
    capabilities: Capabilities,
    decoder: Option<Proc>,
    encoder: Option<Proc>,
    pub(crate) watchdog: Watchdog,
    /// Context owning the job currently dispatched to the hardware.
    pub(crate) in_flight: Mutex<Option<Context>>,
    /// Contexts waiting for the hardware, in dispatch order.
    pub(crate) pending: Mutex<VecDeque<Context>>,
}

impl Device {
    pub fn new(
        io: Arc<dyn RegisterIo>,
        power: Arc<dyn PowerControl>,
        allocator: Arc<dyn DmaAllocator>,
        variant: &Variant,
        config: DeviceConfig,
    ) -> Result<Arc<Self>, SetupError> {
        let capabilities = variant.capabilities;

        let decoder = Proc::new(Role::Decoder, capabilities);
        let encoder = Proc::new(Role::Encoder, capabilities);
        if decoder.is_none() && encoder.is_none() {
            return Err(SetupError::NoEngines);
        }

        power.configure(variant.mod_rate)?;

        let device = Arc::new(Self {
            regs: Registers::new(io, &config),
            power,
            allocator,
            capabilities,
            decoder,
            encoder,
            watchdog: Watchdog::new(config.watchdog_timeout)?,
            in_flight: Mutex::new(None),
            pending: Mutex::new(VecDeque::new()),
        });

        let weak = Arc::downgrade(&device);
        device.watchdog.start(move || {
            if let Some(device) = weak.upgrade() {
                device.handle_timeout();
            }
        })?;

        log::debug!(
            "{}: capabilities {:?}, decoder {}, encoder {}",
            variant.compatible,
            capabilities,
            device.decoder.is_some(),
            device.encoder.is_some()
        );

        Ok(device)
    }

    pub fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    pub fn registers(&self) -> &Registers {
        &self.regs
    }

    /// Returns the processor for `role`, if any engine of that role is supported.
    pub fn proc(&self, role: Role) -> Option<&Proc> {
        match role {
            Role::Decoder => self.decoder.as_ref(),
            Role::Encoder => self.encoder.as_ref(),
        }
    }

    pub(crate) fn procs(&self) -> impl Iterator<Item = &Proc> {
        self.decoder.iter().chain(self.encoder.iter())
    }
}
