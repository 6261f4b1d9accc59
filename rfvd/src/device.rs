//! Device class and instance lifecycle.
//!
//! [`RfvdClass`] is built once per process: it opens the description
//! backend, caches the identity fields and stashes the optional ROM path.
//! [`RfvdDevice::realize`] then wires one PCI function into the host:
//! config bytes, BAR regions, custom-memory overlays, identity, MSI or
//! legacy INTx, the PCIe endpoint capability, and finally the interrupt
//! watchdog.
//!
//! Realize failures on required fields are fatal by policy; this module
//! reports them as [`RealizeError`] and leaves process termination to the
//! embedder's registration glue. Optional attributes (ROM file, labels,
//! MSI-X BAR index) are simply absent when the description does not set
//! them.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use log::{error, info};
use rfvd_abi::DescriptionAbi;
use spin::{Mutex, Once};
use thiserror::Error;

use crate::backend::{Backend, BackendError};
use crate::dispatch::{BarRegion, CustomMemRegion};
use crate::dma::DmaEngine;
use crate::host::{BarKind, MsiInitError, PciHost, RegionHandle, OVERLAY_MAX_PRIORITY};
use crate::irq::WatchdogDesc;
use crate::pci_regs;

/// Registered type name of the function.
pub const DEVICE_TYPE_NAME: &str = "rfvd";
/// Fallback description label when the backend sets none.
pub const DEVICE_DESC: &str = "RFVD PCI";
/// PCI functions expose at most six base address registers.
pub const PCI_BAR_COUNT: usize = 6;

/// Host-side device category the function registers under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceCategory {
    Misc,
}

/// Why a realize attempt was abandoned.
#[derive(Debug, Error)]
pub enum RealizeError {
    #[error("backend query failed: {0}")]
    Backend(#[from] BackendError),
    #[error(transparent)]
    Msi(MsiInitError),
    #[error("PCI Express endpoint capability rejected at {0:#x}")]
    PcieCap(u16),
}

static CLASS: Once<RfvdClass> = Once::new();

/// Once-per-process device class: identity, labels and ROM stash.
pub struct RfvdClass {
    backend: Backend,
    pub name: String,
    pub desc: String,
    pub category: DeviceCategory,
    /// The function opts out of checkpoint and live migration.
    pub migratable: bool,
    pub vendor_id: u16,
    pub device_id: u16,
    pub revision: u8,
    pub subsystem_vendor_id: u16,
    pub subsystem_id: u16,
    /// ROM image path, when the description declares one.
    pub romfile: Option<String>,
}

impl RfvdClass {
    /// Build (at most once per process) the device class.
    ///
    /// Opens the global backend handle, initialises the backend logger and
    /// caches identity. Identity failures are errors; a missing ROM path or
    /// label is not.
    pub fn init(abi: Arc<dyn DescriptionAbi>) -> Result<&'static RfvdClass, BackendError> {
        if let Some(class) = CLASS.get() {
            return Ok(class);
        }
        let class = RfvdClass::build(abi)?;
        Ok(CLASS.call_once(|| class))
    }

    /// The class, if [`RfvdClass::init`] has run.
    pub fn get() -> Option<&'static RfvdClass> {
        CLASS.get()
    }

    fn build(abi: Arc<dyn DescriptionAbi>) -> Result<RfvdClass, BackendError> {
        let backend = Backend::init_global(abi)?.clone();
        info!("pd = {}", backend.pd());

        match backend.init_logger() {
            Ok(()) => info!("init logger success"),
            Err(err) => error!("init logger failed: {}", err),
        }
        // Capture the debug knob now, matching the handle's lifecycle.
        crate::env_knob::debug_log_enabled();

        let vendor_id = backend.vid()?;
        info!("vid = {:#x}", vendor_id);
        let device_id = backend.pid()?;
        info!("pid = {:#x}", device_id);
        let revision = backend.revision()?;
        info!("revision = {:#x}", revision);
        let subsystem_vendor_id = backend.subvid()?;
        info!("sub_vid = {:#x}", subsystem_vendor_id);
        let subsystem_id = backend.subpid()?;
        info!("sub_pid = {:#x}", subsystem_id);

        let romfile = backend.romfile()?;
        info!("romfile = {:?}", romfile);
        let name = backend.name()?.unwrap_or_else(|| DEVICE_TYPE_NAME.to_owned());
        let desc = backend.desc()?.unwrap_or_else(|| DEVICE_DESC.to_owned());

        Ok(RfvdClass {
            backend,
            name,
            desc,
            category: DeviceCategory::Misc,
            migratable: false,
            vendor_id,
            device_id,
            revision,
            subsystem_vendor_id,
            subsystem_id,
            romfile,
        })
    }

    pub fn backend(&self) -> &Backend {
        &self.backend
    }
}

/// One populated BAR slot.
pub(crate) struct BarSlot {
    pub kind: BarKind,
    pub size: u64,
    /// Zeroed storage of exactly `size` bytes. Dispatch never touches it;
    /// it exists so host code peeking at region memory sees defined bytes.
    pub backing: Vec<u8>,
    #[allow(dead_code)]
    pub region: RegionHandle,
}

/// One registered custom-memory overlay.
pub(crate) struct OverlayEntry {
    pub mem: usize,
    pub base: u64,
    pub size: u64,
    #[allow(dead_code)]
    pub region: RegionHandle,
}

/// One realized PCI function.
///
/// The BAR and overlay tables are written at realize and cleared at exit;
/// between those points dispatch treats them as read-only.
pub struct RfvdDevice {
    class: &'static RfvdClass,
    host: Arc<dyn PciHost>,
    backend: Backend,
    pub(crate) bars: Mutex<[Option<BarSlot>; PCI_BAR_COUNT]>,
    pub(crate) overlays: Mutex<Vec<OverlayEntry>>,
    pub(crate) dma: Mutex<DmaEngine>,
    pub(crate) stop: AtomicBool,
    pub(crate) unknown_causes_logged: AtomicU32,
    pub(crate) watchdogs: Mutex<Vec<WatchdogDesc>>,
}

impl RfvdDevice {
    /// Realize one function on `host`.
    pub fn realize(
        class: &'static RfvdClass,
        host: Arc<dyn PciHost>,
    ) -> Result<Arc<Self>, RealizeError> {
        info!("start realize ...");
        let backend = class.backend().clone();

        // Fixed configuration bytes.
        host.config_write_u16(
            pci_regs::STATUS,
            pci_regs::STATUS_FAST_BACK | pci_regs::STATUS_DEVSEL_MEDIUM,
        );
        host.config_write_u8(pci_regs::CACHE_LINE_SIZE, 0x08);
        host.config_write_u8(pci_regs::INTERRUPT_LINE, 0xff); // unknown IRQ
        host.config_write_u8(
            pci_regs::CAPABILITY_LIST,
            if host.is_pcie() { pci_regs::CAP_PTR_PCIE } else { 0x00 },
        );

        // BARs: one region per slot the description sizes above zero.
        let mut bars: [Option<BarSlot>; PCI_BAR_COUNT] = core::array::from_fn(|_| None);
        let bar_count = backend.bar_count()?;
        info!("bar num = {}", bar_count);
        for index in 0..bar_count.min(PCI_BAR_COUNT) {
            let size = backend.bar_size(index)?;
            if size == 0 {
                continue;
            }
            let kind = backend.bar_kind(index)?;
            let backing = vec![0u8; size as usize];
            let name = format!("{}-{}", DEVICE_TYPE_NAME, index);
            let ops = Arc::new(BarRegion::new(backend.clone(), index));
            let region = host.register_io_region(ops, &name, size, kind);
            host.register_bar(index, kind, region);
            info!(
                "allocated {} bar[{}] {} bytes",
                match kind {
                    BarKind::Pio => "PIO",
                    BarKind::Mmio => "MMIO",
                },
                index,
                size
            );
            bars[index] = Some(BarSlot {
                kind,
                size,
                backing,
                region,
            });
        }

        // Custom memories: overlays over guest system memory, shadowing the
        // default backing at maximum priority. Per-entry failures skip the
        // entry, a count failure skips them all; neither aborts realize.
        let mut overlays = Vec::new();
        match backend.mem_count() {
            Err(err) => error!("get custom memory count failed: {}", err),
            Ok(count) => {
                info!("found {} device custom memories", count);
                for mem in 0..count {
                    let size = match backend.mem_size(mem) {
                        Ok(size) => size,
                        Err(err) => {
                            error!("custom memory {}: get size failed: {}", mem, err);
                            continue;
                        }
                    };
                    let base = match backend.mem_base(mem) {
                        Ok(base) => base,
                        Err(err) => {
                            error!("custom memory {}: get base failed: {}", mem, err);
                            continue;
                        }
                    };
                    let name = format!("{}-custom-mem-{}", DEVICE_TYPE_NAME, mem);
                    let ops = Arc::new(CustomMemRegion::new(backend.clone(), mem));
                    let region = host.register_io_region(ops, &name, size, BarKind::Mmio);
                    host.add_overlay(base, region, OVERLAY_MAX_PRIORITY);
                    info!(
                        "registered custom memory - name={} base={:#x} size={:#x}",
                        name, base, size
                    );
                    overlays.push(OverlayEntry {
                        mem,
                        base,
                        size,
                        region,
                    });
                }
            }
        }

        // Identity.
        let class_id = backend.class_id()?;
        info!("pci class = {:#x}", class_id);
        host.set_class((class_id >> 8) as u16);
        host.set_prog_if((class_id & 0xff) as u8);
        host.set_interrupt_pin(1);
        host.set_vendor_id(class.vendor_id);
        host.set_device_id(class.device_id);
        host.set_revision(class.revision);
        host.set_subsystem_vendor_id(class.subsystem_vendor_id);
        host.set_subsystem_id(class.subsystem_id);

        match backend.msix_bar_idx() {
            Ok(Some(index)) => info!("msix tables declared on bar[{}]", index),
            Ok(None) => {}
            Err(err) => error!("get msix bar idx failed: {}", err),
        }

        // MSI, falling back to legacy INTx when the bus has none.
        match host.msi_init(pci_regs::MSI_CAP_OFFSET, 1, true, false) {
            Ok(()) => info!("MSI initialized successfully"),
            Err(MsiInitError::NotSupported) => {
                info!("MSI is not supported for this device");
                host.config_write_u8(pci_regs::INTERRUPT_PIN, 1);
                host.config_write_u8(pci_regs::INTERRUPT_LINE, 0x01);
            }
            Err(err) => {
                error!("failed to initialize MSI: {}", err);
                return Err(RealizeError::Msi(err));
            }
        }

        if host.is_pcie() {
            if !host.pcie_endpoint_cap_init(pci_regs::PCIE_CAP_OFFSET) {
                error!("PCI Express endpoint capability rejected");
                return Err(RealizeError::PcieCap(pci_regs::PCIE_CAP_OFFSET));
            }
        } else {
            info!("not connected to a PCI Express bus, capability is limited");
        }

        let dev = Arc::new(RfvdDevice {
            class,
            host,
            backend,
            bars: Mutex::new(bars),
            overlays: Mutex::new(overlays),
            dma: Mutex::new(DmaEngine::default()),
            stop: AtomicBool::new(false),
            unknown_causes_logged: AtomicU32::new(0),
            watchdogs: Mutex::new(Vec::new()),
        });

        crate::irq::start_watchdog(&dev, &format!("{}-irq", DEVICE_TYPE_NAME));
        info!("realization done");
        Ok(dev)
    }

    /// Tear the instance down: stop the watchdog at its next tick, release
    /// BAR backing and DMA staging, uninstall MSI. The backend handle stays
    /// open; the process owns it, not this instance.
    pub fn exit(&self) {
        info!("start exit ...");
        self.stop.store(true, Ordering::Release);
        for slot in self.bars.lock().iter_mut() {
            *slot = None;
        }
        self.host.msi_uninit();
        self.dma.lock().release_staging();
        for desc in self.watchdogs.lock().drain(..) {
            info!("dropping watchdog descriptor {}", desc.name);
        }
        info!("finish exit ...");
    }

    pub fn class(&self) -> &'static RfvdClass {
        self.class
    }

    pub fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }

    /// Populated BAR slots as `(index, kind, size)`.
    pub fn bar_layout(&self) -> Vec<(usize, BarKind, u64)> {
        self.bars
            .lock()
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| slot.as_ref().map(|s| (index, s.kind, s.size)))
            .collect()
    }

    /// Length of the backing storage behind a populated BAR slot.
    pub fn bar_backing_size(&self, index: usize) -> Option<usize> {
        self.bars
            .lock()
            .get(index)?
            .as_ref()
            .map(|slot| slot.backing.len())
    }

    /// Registered overlays as `(memory index, base, size)`.
    pub fn overlay_layout(&self) -> Vec<(usize, u64, u64)> {
        self.overlays
            .lock()
            .iter()
            .map(|o| (o.mem, o.base, o.size))
            .collect()
    }

    pub(crate) fn backend(&self) -> &Backend {
        &self.backend
    }

    pub(crate) fn host(&self) -> &dyn PciHost {
        self.host.as_ref()
    }
}
