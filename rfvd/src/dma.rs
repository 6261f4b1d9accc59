//! DMA engine.
//!
//! A DMA cause means the description has programmed a transfer. The
//! handler snapshots the descriptor and the device-side staging buffer,
//! validates the device-window range, clamps the guest address against the
//! declared mask and moves the bytes through the host DMA API. The device
//! never initiates DMA on its own; it only consumes what the description
//! programmed.
//!
//! Descriptor layout, all unsigned 64-bit:
//!
//! ```text
//! start/size: the device-side transfer window
//! mask:       reachable guest address bits
//! src/dst:    transfer endpoints (one guest-side, one window-relative)
//! cnt:        transfer length in bytes
//! cmd:        RUN | DIR (see rfvd_abi::dma_cmd)
//! ```

use bitflags::bitflags;
use log::{error, info, warn};
use rfvd_abi::dma_cmd;

use crate::backend::{Backend, BackendError};
use crate::device::RfvdDevice;
use crate::guest_error;
use crate::host::PciHost;

bitflags! {
    /// The DMA command word.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct DmaCmd: u64 {
        /// A transfer is programmed.
        const RUN = dma_cmd::RUN;
        /// Direction field: set transfers guest to staging.
        const DIR = dma_cmd::DIR;
    }
}

/// Transfer direction, decoded from [`DmaCmd::DIR`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DmaDirection {
    /// Staging to guest memory: `dst` is the guest address, `src` is
    /// window-relative.
    ToPci,
    /// Guest memory to staging: `src` is the guest address, `dst` is
    /// window-relative.
    FromPci,
}

impl DmaCmd {
    pub fn direction(self) -> DmaDirection {
        if dma_cmd::direction(self.bits()) == dma_cmd::DIR_FROM_PCI {
            DmaDirection::FromPci
        } else {
            DmaDirection::ToPci
        }
    }
}

/// Per-instance DMA state, refreshed from the backend on every DMA cause.
#[derive(Default)]
pub(crate) struct DmaEngine {
    start: u64,
    size: u64,
    mask: u64,
    src: u64,
    dst: u64,
    cnt: u64,
    cmd: u64,
    staging: Option<Vec<u8>>,
}

impl DmaEngine {
    /// Snapshot the descriptor and staging buffer.
    ///
    /// All-or-nothing: on any query failure the previous snapshot is left
    /// in place and the caller aborts the transfer.
    fn refresh(&mut self, backend: &Backend) -> Result<(), BackendError> {
        let start = fetch("dma_start", backend.dma_start())?;
        let size = fetch("dma_size", backend.dma_size())?;
        let mask = fetch("dma_mask", backend.dma_mask())?;
        let src = fetch("dma_src", backend.dma_src())?;
        let dst = fetch("dma_dst", backend.dma_dst())?;
        let cnt = fetch("dma_cnt", backend.dma_cnt())?;
        let cmd = fetch("dma_cmd", backend.dma_cmd())?;
        // The window-relative endpoint indexes up to `size` into staging,
        // so the snapshot must cover the whole window, not just `cnt`.
        let staging = fetch("dma_buf", backend.dma_buf(size.max(cnt) as usize))?;

        self.start = start;
        self.size = size;
        self.mask = mask;
        self.src = src;
        self.dst = dst;
        self.cnt = cnt;
        self.cmd = cmd;
        self.staging = Some(staging);
        Ok(())
    }

    /// Execute the snapshotted transfer.
    fn run(&mut self, host: &dyn PciHost) {
        let direction = DmaCmd::from_bits_retain(self.cmd).direction();
        // The window-relative endpoint is what the range check guards.
        let (xfer_lo, guest_addr) = match direction {
            DmaDirection::FromPci => (self.dst, self.src),
            DmaDirection::ToPci => (self.src, self.dst),
        };

        if !range_in_window(xfer_lo, self.cnt, self.start, self.size) {
            guest_error!(
                "DMA range {:#018x}-{:#018x} out of bounds ({:#018x}-{:#018x})!",
                xfer_lo,
                xfer_lo.wrapping_add(self.cnt).wrapping_sub(1),
                self.start,
                self.start.wrapping_add(self.size).wrapping_sub(1)
            );
            // Best effort from here: the copy below still runs for whatever
            // part of the window the staging buffer can back.
        }

        let guest_addr = clamp_addr(guest_addr, self.mask);
        let offset = xfer_lo.wrapping_sub(self.start);
        let staging = match self.staging.as_mut() {
            Some(staging) => staging,
            None => return,
        };
        let window = match staging_window(staging, offset, self.cnt) {
            Some(window) => window,
            None => {
                warn!("DMA transfer window misses the staging buffer, copy skipped");
                return;
            }
        };

        match direction {
            DmaDirection::FromPci => {
                let result = host.dma_read(guest_addr, window);
                info!("dma read from guest {:#x} into staging: {:?}", guest_addr, result);
            }
            DmaDirection::ToPci => {
                let result = host.dma_write(guest_addr, window);
                info!("dma write from staging to guest {:#x}: {:?}", guest_addr, result);
            }
        }
    }

    /// Drop the per-cause staging snapshot.
    pub(crate) fn release_staging(&mut self) {
        self.staging = None;
    }
}

/// Handler for the DMA interrupt cause.
///
/// Runs serialised against the watchdog tick that observed the cause; the
/// cause bit is cleared by the dispatch loop after this returns, even when
/// the descriptor snapshot fails (otherwise a broken descriptor would
/// re-trigger forever).
pub(crate) fn dma_handler(dev: &RfvdDevice) {
    info!("servicing dma cause");
    let mut engine = dev.dma.lock();
    if engine.refresh(dev.backend()).is_err() {
        return;
    }
    engine.run(dev.host());
    engine.release_staging();
}

fn fetch<T>(what: &str, result: Result<T, BackendError>) -> Result<T, BackendError> {
    if let Err(err) = &result {
        error!("get {} failed: {}", what, err);
    }
    result
}

/// Whether `[xfer_start, xfer_start + xfer_size]` lies entirely within
/// `[dma_start, dma_start + dma_size]`.
///
/// Unsigned 64-bit throughout, with both end computations checked for
/// wrap-around; no subtraction is used to form a length.
fn range_in_window(xfer_start: u64, xfer_size: u64, dma_start: u64, dma_size: u64) -> bool {
    let xfer_end = xfer_start.wrapping_add(xfer_size);
    let dma_end = dma_start.wrapping_add(dma_size);
    dma_end >= dma_start
        && xfer_end >= xfer_start
        && xfer_start >= dma_start
        && xfer_end <= dma_end
}

/// Constrain a guest address to the bits the DMA mask allows.
fn clamp_addr(addr: u64, mask: u64) -> u64 {
    let clamped = addr & mask;
    if clamped != addr {
        guest_error!("clamping DMA {:#018x} to {:#018x}!", addr, clamped);
        error!("clamping DMA {:#018x} to {:#018x}!", addr, clamped);
    }
    clamped
}

/// The slice of the staging buffer backing `[offset, offset + cnt)`, or
/// `None` when the transfer window misses the buffer entirely. A window
/// that overhangs the end is truncated to what the buffer can back.
fn staging_window(staging: &mut [u8], offset: u64, cnt: u64) -> Option<&mut [u8]> {
    let len = staging.len() as u64;
    if cnt == 0 || offset >= len {
        return None;
    }
    let end = offset.saturating_add(cnt).min(len);
    Some(&mut staging[offset as usize..end as usize])
}
