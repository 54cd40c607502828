// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Recording register window and power controller used by the unit tests.

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Mutex;

use crate::device::Device;
use crate::device::DeviceConfig;
use crate::device::DeviceError;
use crate::device::PowerControl;
use crate::device::RegisterIo;
use crate::device::SramPort;
use crate::device::Variant;
use crate::dma::DmaAllocator;
use crate::dma::DmaBuffer;
use crate::dma::DmaError;
use crate::dma::HeapAllocator;

#[derive(Default)]
struct DummyRegistersState {
    values: HashMap<u32, u32>,
    scripted: HashMap<u32, u32>,
    writes: Vec<(u32, u32)>,
}

/// A register window that records every write.
///
/// Reads return the scripted value of a register if there is one, its last written value
/// otherwise.
#[derive(Default)]
pub struct DummyRegisters {
    state: Mutex<DummyRegistersState>,
}

impl DummyRegisters {
    pub fn script_read(&self, offset: u32, value: u32) {
        self.state.lock().unwrap().scripted.insert(offset, value);
    }

    pub fn writes(&self) -> Vec<(u32, u32)> {
        self.state.lock().unwrap().writes.clone()
    }

    /// All the values written to `offset`, in order.
    pub fn writes_to(&self, offset: u32) -> Vec<u32> {
        self.writes().into_iter().filter(|(o, _)| *o == offset).map(|(_, v)| v).collect()
    }

    /// The last value written to `offset`.
    pub fn last_write(&self, offset: u32) -> Option<u32> {
        self.writes_to(offset).last().copied()
    }

    pub fn clear_writes(&self) {
        self.state.lock().unwrap().writes.clear();
    }

    /// Groups the data words written through `port` by the cursor position they followed.
    pub fn sram_transfers(&self, port: SramPort) -> Vec<(u32, Vec<u32>)> {
        let mut transfers: Vec<(u32, Vec<u32>)> = Vec::new();

        for (offset, value) in self.writes() {
            if offset == port.offset {
                transfers.push((value, Vec::new()));
            } else if offset == port.data {
                match transfers.last_mut() {
                    Some((_, words)) => words.push(value),
                    None => panic!("SRAM data written before setting the port cursor"),
                }
            }
        }

        transfers
    }

    /// Replays the data words written through `port` into a word-addressed memory image, with
    /// `position_to_word` translating the cursor register value into a word index.
    pub fn sram_image(
        &self,
        port: SramPort,
        position_to_word: impl Fn(u32) -> u32,
    ) -> BTreeMap<u32, u32> {
        let mut image = BTreeMap::new();

        for (position, words) in self.sram_transfers(port) {
            let base = position_to_word(position);
            for (i, word) in words.into_iter().enumerate() {
                image.insert(base + i as u32, word);
            }
        }

        image
    }
}

impl RegisterIo for DummyRegisters {
    fn read(&self, offset: u32) -> u32 {
        let state = self.state.lock().unwrap();

        state
            .scripted
            .get(&offset)
            .or_else(|| state.values.get(&offset))
            .copied()
            .unwrap_or(0)
    }

    fn write(&self, offset: u32, value: u32) {
        let mut state = self.state.lock().unwrap();

        state.values.insert(offset, value);
        state.writes.push((offset, value));
    }
}

/// Power controller counting power references and reset pulses.
#[derive(Default)]
pub struct DummyPower {
    references: AtomicUsize,
    resets: AtomicUsize,
    refuse_power: AtomicBool,
}

impl DummyPower {
    pub fn references(&self) -> usize {
        self.references.load(Ordering::SeqCst)
    }

    pub fn resets(&self) -> usize {
        self.resets.load(Ordering::SeqCst)
    }

    /// Makes the following `power_get` calls fail until reset to `false`.
    pub fn refuse_power(&self, refuse: bool) {
        self.refuse_power.store(refuse, Ordering::SeqCst);
    }
}

impl PowerControl for DummyPower {
    fn power_get(&self) -> Result<(), DeviceError> {
        if self.refuse_power.load(Ordering::SeqCst) {
            return Err(DeviceError::Power(anyhow::anyhow!("power domain unavailable")));
        }
        self.references.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn power_put(&self) {
        self.references.fetch_sub(1, Ordering::SeqCst);
    }

    fn reset(&self) -> Result<(), DeviceError> {
        self.resets.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Heap allocator that can be told to run out of memory.
#[derive(Default)]
pub struct DummyAllocator {
    heap: HeapAllocator,
    exhausted: AtomicBool,
}

impl DummyAllocator {
    /// Makes the following allocations fail until reset to `false`.
    pub fn exhaust(&self, exhausted: bool) {
        self.exhausted.store(exhausted, Ordering::SeqCst);
    }
}

impl DmaAllocator for DummyAllocator {
    fn allocate(&self, size: usize) -> Result<Box<dyn DmaBuffer>, DmaError> {
        if self.exhausted.load(Ordering::SeqCst) {
            return Err(DmaError::OutOfMemory(size));
        }
        self.heap.allocate(size)
    }
}

/// A device backed by dummy registers, power and heap memory.
pub struct DummyDevice {
    pub device: Arc<Device>,
    pub registers: Arc<DummyRegisters>,
    pub power: Arc<DummyPower>,
    pub allocator: Arc<DummyAllocator>,
}

impl DummyDevice {
    pub fn new(compatible: &str) -> Self {
        Self::with_config(compatible, DeviceConfig::default())
    }

    pub fn with_config(compatible: &str, config: DeviceConfig) -> Self {
        let variant = Variant::find(compatible).unwrap();
        let registers = Arc::new(DummyRegisters::default());
        let power = Arc::new(DummyPower::default());
        let allocator = Arc::new(DummyAllocator::default());

        let device = Device::new(
            registers.clone(),
            power.clone(),
            allocator.clone(),
            variant,
            config,
        )
        .unwrap();

        Self { device, registers, power, allocator }
    }
}
