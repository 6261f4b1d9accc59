//! Guest-access trampolines.
//!
//! One operation set per region family, parameterised by the slot it
//! serves: [`BarRegion`] forwards BAR accesses, [`CustomMemRegion`]
//! forwards overlay accesses. Both are stateless: the BAR backing buffer
//! exists only so host infrastructure peeking at region memory sees
//! defined storage; the description backend is the authoritative state.
//!
//! Failures never reach the host: a failed read returns 0, a failed write
//! is dropped, either way with a debug-level report.

use crate::backend::Backend;
use crate::debug_report;
use crate::host::RegionOps;

/// Dispatch for one populated BAR slot.
pub struct BarRegion {
    backend: Backend,
    bar: usize,
}

impl BarRegion {
    pub fn new(backend: Backend, bar: usize) -> Self {
        Self { backend, bar }
    }
}

impl RegionOps for BarRegion {
    fn read(&self, offset: u64, size: usize) -> u64 {
        match self.backend.pci_read(self.bar, offset, size) {
            Ok(val) => {
                debug_report!(
                    "mmio read bar[{}] addr={:#x} size={} val={:#x}",
                    self.bar, offset, size, val
                );
                val
            }
            Err(err) => {
                debug_report!(
                    "pci read error {} bar[{}] addr={:#x}",
                    err, self.bar, offset
                );
                0
            }
        }
    }

    fn write(&self, offset: u64, size: usize, value: u64) {
        debug_report!(
            "mmio write bar[{}] addr={:#x} size={} data={:#x}",
            self.bar, offset, size, value
        );
        if let Err(err) = self.backend.pci_write(self.bar, offset, size, value) {
            debug_report!(
                "pci write error {} bar[{}] addr={:#x}",
                err, self.bar, offset
            );
        }
    }
}

/// Dispatch for one custom-memory overlay, keyed by the memory index.
pub struct CustomMemRegion {
    backend: Backend,
    index: usize,
}

impl CustomMemRegion {
    pub fn new(backend: Backend, index: usize) -> Self {
        Self { backend, index }
    }
}

impl RegionOps for CustomMemRegion {
    fn read(&self, offset: u64, size: usize) -> u64 {
        match self.backend.mem_read(self.index, offset, size) {
            Ok(val) => {
                debug_report!(
                    "custom mem read mem[{}] addr={:#x} size={} val={:#x}",
                    self.index, offset, size, val
                );
                val
            }
            Err(err) => {
                debug_report!(
                    "custom mem read error {} mem[{}] addr={:#x}",
                    err, self.index, offset
                );
                0
            }
        }
    }

    fn write(&self, offset: u64, size: usize, value: u64) {
        debug_report!(
            "custom mem write mem[{}] addr={:#x} size={} data={:#x}",
            self.index, offset, size, value
        );
        if let Err(err) = self.backend.mem_write(self.index, offset, size, value) {
            debug_report!(
                "custom mem write error {} mem[{}] addr={:#x}",
                err, self.index, offset
            );
        }
    }
}
