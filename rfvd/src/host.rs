//! Host emulator interface.
//!
//! Everything the device model needs from the emulator it is mounted in,
//! collected behind two seams: [`RegionOps`], which the model implements
//! and hands to the host for each guest-visible region, and [`PciHost`],
//! which the host implements and the model consumes. Keeping the whole
//! surface behind traits lets the same model run against the production
//! emulator and against the mock pair used by the test suite.

use std::sync::Arc;

use thiserror::Error;

/// Address-space flavor of a BAR region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BarKind {
    /// Port I/O.
    Pio,
    /// Memory-mapped I/O.
    Mmio,
}

/// Byte order of a registered region. Every RFVD region is little-endian.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endianness {
    Little,
}

/// Access-width contract for a registered region. The host layer refuses
/// widths outside `[min_access, max_access]`; the ops never see them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegionProps {
    pub min_access: u8,
    pub max_access: u8,
    pub endianness: Endianness,
}

impl Default for RegionProps {
    fn default() -> Self {
        Self {
            min_access: 1,
            max_access: 8,
            endianness: Endianness::Little,
        }
    }
}

/// Guest-access callbacks for one registered region.
///
/// `size` is the access width in bytes, guaranteed by the host to honor
/// [`RegionOps::props`]. Implementations must not block.
pub trait RegionOps: Send + Sync {
    fn read(&self, offset: u64, size: usize) -> u64;
    fn write(&self, offset: u64, size: usize, value: u64);

    fn props(&self) -> RegionProps {
        RegionProps::default()
    }
}

/// Handle the host returns for a registered I/O region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegionHandle(pub u64);

/// Overlay regions shadow default guest memory; registration at this
/// priority guarantees they win over whatever backs the range by default.
pub const OVERLAY_MAX_PRIORITY: i32 = i32::MAX;

/// Outcome of an MSI capability installation.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum MsiInitError {
    /// The bus has no MSI support; the device falls back to legacy INTx.
    #[error("MSI not supported on this bus")]
    NotSupported,
    /// The bus supports MSI but installing the capability failed.
    #[error("MSI capability installation failed (host code {0})")]
    Failed(i32),
}

/// Outcome of a guest-memory DMA transaction.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum DmaTxError {
    #[error("guest address range is not mapped")]
    Unmapped,
    #[error("bus declined the transaction")]
    Declined,
}

pub type DmaTxResult = Result<(), DmaTxError>;

/// The emulator-side services a realized PCI function consumes.
pub trait PciHost: Send + Sync {
    /// Whether the function sits on a PCI Express bus.
    fn is_pcie(&self) -> bool;

    // ── Configuration space ─────────────────────────────────────

    fn config_write_u8(&self, offset: usize, value: u8);
    fn config_write_u16(&self, offset: usize, value: u16);

    fn set_class(&self, class: u16);
    fn set_prog_if(&self, prog_if: u8);
    fn set_revision(&self, revision: u8);
    fn set_vendor_id(&self, vendor_id: u16);
    fn set_device_id(&self, device_id: u16);
    fn set_subsystem_vendor_id(&self, subsystem_vendor_id: u16);
    fn set_subsystem_id(&self, subsystem_id: u16);
    fn set_interrupt_pin(&self, pin: u8);

    // ── Regions ─────────────────────────────────────────────────

    /// Create an I/O region of `size` bytes dispatching into `ops`.
    fn register_io_region(
        &self,
        ops: Arc<dyn RegionOps>,
        name: &str,
        size: u64,
        kind: BarKind,
    ) -> RegionHandle;

    /// Mount a previously registered region as BAR `index`.
    fn register_bar(&self, index: usize, kind: BarKind, region: RegionHandle);

    /// Mount a previously registered region over guest system memory at
    /// `base` with the given overlay priority.
    fn add_overlay(&self, base: u64, region: RegionHandle, priority: i32);

    // ── Interrupts ──────────────────────────────────────────────

    fn msi_init(
        &self,
        cap_offset: u8,
        nvectors: u16,
        per_vector_mask: bool,
        msi64: bool,
    ) -> Result<(), MsiInitError>;
    fn msi_enabled(&self) -> bool;
    fn msi_notify(&self, vector: u16);
    fn msi_uninit(&self);

    /// Install the PCI Express endpoint capability; false on rejection.
    fn pcie_endpoint_cap_init(&self, cap_offset: u16) -> bool;

    /// Drive the legacy interrupt line.
    fn set_irq(&self, level: bool);

    // ── DMA ─────────────────────────────────────────────────────

    /// Read `buf.len()` bytes of guest memory at `guest_addr` into `buf`.
    fn dma_read(&self, guest_addr: u64, buf: &mut [u8]) -> DmaTxResult;
    /// Write `buf` to guest memory at `guest_addr`.
    fn dma_write(&self, guest_addr: u64, buf: &[u8]) -> DmaTxResult;

    // ── Workers ─────────────────────────────────────────────────

    /// Run `entry` on a detached host thread named `name`.
    fn start_detached_thread(&self, name: &str, entry: Box<dyn FnOnce() + Send + 'static>);
}
