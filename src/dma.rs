// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Device-visible memory used for frame buffers and engine side buffers.

use std::sync::atomic::AtomicU32;
use std::sync::atomic::Ordering;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DmaError {
    #[error("failed to allocate {0} bytes of device memory")]
    OutOfMemory(usize),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// A contiguous block of memory the engine can access through a 32-bit bus address.
pub trait DmaBuffer: Send {
    fn bus_address(&self) -> u32;
    fn len(&self) -> usize;
    fn as_slice(&self) -> &[u8];
    fn as_mut_slice(&mut self) -> &mut [u8];

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub trait DmaAllocator: Send + Sync {
    /// Allocates `size` bytes of zeroed device memory.
    fn allocate(&self, size: usize) -> Result<Box<dyn DmaBuffer>, DmaError>;
}

/// Allocator handing out host memory with synthetic bus addresses.
///
/// Addresses are 4 KiB aligned and never reused, which makes register dumps deterministic.
pub struct HeapAllocator {
    next_address: AtomicU32,
}

impl HeapAllocator {
    const PAGE_SIZE: u32 = 0x1000;

    pub fn new(base_address: u32) -> Self {
        Self {
            next_address: AtomicU32::new(base_address),
        }
    }
}

impl Default for HeapAllocator {
    fn default() -> Self {
        Self::new(0x4000_0000)
    }
}

impl DmaAllocator for HeapAllocator {
    fn allocate(&self, size: usize) -> Result<Box<dyn DmaBuffer>, DmaError> {
        let span = u32::try_from(size)
            .ok()
            .and_then(|size| size.checked_add(Self::PAGE_SIZE - 1))
            .map(|size| size & !(Self::PAGE_SIZE - 1))
            .ok_or(DmaError::OutOfMemory(size))?;

        let mut current = self.next_address.load(Ordering::Relaxed);
        let bus_address = loop {
            let next = current.checked_add(span).ok_or(DmaError::OutOfMemory(size))?;
            match self.next_address.compare_exchange_weak(
                current,
                next,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break current,
                Err(actual) => current = actual,
            }
        };

        Ok(Box::new(HeapBuffer {
            data: vec![0; size],
            bus_address,
        }))
    }
}

struct HeapBuffer {
    data: Vec<u8>,
    bus_address: u32,
}

impl DmaBuffer for HeapBuffer {
    fn bus_address(&self) -> u32 {
        self.bus_address
    }

    fn len(&self) -> usize {
        self.data.len()
    }

    fn as_slice(&self) -> &[u8] {
        &self.data
    }

    fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heap_addresses_are_page_aligned_and_distinct() {
        let allocator = HeapAllocator::new(0x1000_0000);

        let a = allocator.allocate(100).unwrap();
        let b = allocator.allocate(0x1001).unwrap();
        let c = allocator.allocate(16).unwrap();

        assert_eq!(a.bus_address(), 0x1000_0000);
        assert_eq!(b.bus_address(), 0x1000_1000);
        assert_eq!(c.bus_address(), 0x1000_3000);
        assert_eq!(b.len(), 0x1001);
        assert!(b.as_slice().iter().all(|&byte| byte == 0));
    }

    #[test]
    fn heap_address_space_exhaustion() {
        let allocator = HeapAllocator::new(0xffff_e000);

        assert!(allocator.allocate(0x1000).is_ok());
        assert!(matches!(allocator.allocate(1), Err(DmaError::OutOfMemory(1))));
    }
}
