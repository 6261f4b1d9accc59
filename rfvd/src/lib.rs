//! RFVD, a reconfigurable virtual PCI(e) function.
//!
//! The device model here has no behavior of its own. Identity, BAR layout,
//! register semantics, interrupt causes and DMA descriptors all live in an
//! out-of-process "device description" backend; this crate wires that
//! description into a host emulator:
//!
//! - `backend`:  typed shim over the raw description ABI
//! - `device`:   class init, per-instance realization and teardown
//! - `dispatch`: BAR and custom-memory access trampolines
//! - `irq`:      polling watchdog, raise/lower, per-cause dispatch
//! - `dma`:      descriptor snapshot, validation and guest copies
//! - `host`:     the emulator-side interface the model is mounted on
//!
//! The host emulator calls [`device::RfvdClass::init`] once per process and
//! [`device::RfvdDevice::realize`] once per instantiated function. From then
//! on guest accesses arrive through the registered [`host::RegionOps`] and
//! the watchdog worker services the backend's interrupt word.

pub mod backend;
pub mod device;
pub mod dispatch;
pub mod dma;
pub mod env_knob;
pub mod host;
pub mod irq;
pub mod pci_regs;

pub use backend::{Backend, BackendError};
pub use device::{RfvdClass, RfvdDevice, RealizeError, DEVICE_TYPE_NAME};
pub use host::{BarKind, PciHost, RegionOps};

/// Debug-level report gated on the `RFVD_ENABLE_DEBUG_LOG` knob.
///
/// Dispatch trampolines run on every guest access; the knob keeps their
/// logging free when nobody is watching.
macro_rules! debug_report {
    ($($arg:tt)*) => {
        if $crate::env_knob::debug_log_enabled() {
            log::debug!($($arg)*);
        }
    };
}
pub(crate) use debug_report;

/// Guest-misbehavior report. Separate target so embedders can route these
/// to the same channel their other device models use.
macro_rules! guest_error {
    ($($arg:tt)*) => {
        log::warn!(target: "guest-error", $($arg)*);
    };
}
pub(crate) use guest_error;
