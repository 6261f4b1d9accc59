//! Interrupt pipeline.
//!
//! The description backend has no callback channel into the emulator, so a
//! per-instance watchdog worker polls its interrupt-status word at ~1 ms
//! cadence. On a non-zero word the watchdog raises the host-side interrupt
//! (MSI vector 0 when active, the legacy line otherwise), dispatches the
//! handler of each known cause, and acknowledges each cause as its handler
//! returns.
//!
//! Lowering order matters: the backend's status bits are cleared before the
//! line is re-evaluated, so a cause the description sets concurrently can
//! never be hidden by a stale de-assert.
//!
//! Cause inventory: `GENERAL` is raised to the guest but currently has no
//! host-side handler, so it stays pending until the description withdraws
//! it. Bits outside the known set are preserved untouched and reported once
//! per distinct bit.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use bitflags::bitflags;
use log::{info, warn};
use rfvd_abi::irq_cause;

use crate::device::RfvdDevice;

bitflags! {
    /// Known bits of the interrupt-status word.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct IrqCauses: u32 {
        const GENERAL = irq_cause::GENERAL;
        const DMA = irq_cause::DMA;
    }
}

/// Poll cadence of the watchdog worker.
pub const WATCHDOG_PERIOD: Duration = Duration::from_millis(1);

/// One registered watchdog worker. The thread itself is host-owned and
/// detached; this records what was started.
pub(crate) struct WatchdogDesc {
    pub name: String,
}

impl RfvdDevice {
    /// One watchdog tick: observe the status word and service it.
    ///
    /// Public so embedders (and tests) can drive the pipeline without the
    /// detached worker.
    pub fn service_interrupts(&self) {
        let status = self.backend().irq_status();
        if status == 0 {
            return;
        }

        self.raise_irq();

        let unknown = status & !IrqCauses::all().bits();
        if unknown != 0 {
            self.note_unknown_causes(unknown);
        }

        // Causes are serviced sequentially in bit order; each handler fully
        // services its cause before the bit is acknowledged.
        if status & IrqCauses::DMA.bits() != 0 {
            self.run_cause_handler(IrqCauses::DMA, crate::dma::dma_handler);
        }
    }

    fn run_cause_handler(&self, cause: IrqCauses, handler: fn(&RfvdDevice)) {
        handler(self);
        self.lower_irq(cause.bits());
    }

    /// Assert the host-side interrupt for the pending word.
    pub fn raise_irq(&self) {
        if self.host().msi_enabled() {
            self.host().msi_notify(0);
        } else {
            self.host().set_irq(true);
        }
    }

    /// Acknowledge the causes in `mask`, then derive the line level.
    ///
    /// The status word is the single source of truth: the legacy line goes
    /// low only once a post-clear re-read shows nothing pending.
    pub fn lower_irq(&self, mask: u32) {
        self.backend().irq_lower(mask);
        let status = self.backend().irq_status();
        if status == 0 && !self.host().msi_enabled() {
            self.host().set_irq(false);
        }
    }

    /// Report bits outside [`IrqCauses`], once per distinct bit for the
    /// lifetime of the instance. The bits themselves are left pending.
    fn note_unknown_causes(&self, unknown: u32) {
        let seen = self.unknown_causes_logged.fetch_or(unknown, Ordering::Relaxed);
        let mut fresh = unknown & !seen;
        while fresh != 0 {
            let bit = fresh & fresh.wrapping_neg();
            warn!("ignoring unknown interrupt cause bit {:#x}", bit);
            fresh &= !bit;
        }
    }
}

/// Start the detached watchdog worker for one device instance.
pub(crate) fn start_watchdog(dev: &Arc<RfvdDevice>, name: &str) {
    dev.watchdogs.lock().push(WatchdogDesc {
        name: name.to_owned(),
    });

    let worker = Arc::clone(dev);
    info!("starting watchdog thread {}", name);
    dev.host().start_detached_thread(
        name,
        Box::new(move || {
            info!("watchdog running");
            while !worker.stop_requested() {
                std::thread::sleep(WATCHDOG_PERIOD);
                worker.service_interrupts();
            }
            info!("watchdog exiting");
        }),
    );
}
