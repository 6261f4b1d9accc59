//! Shared mock pair for the integration tests: a configurable description
//! backend and a recording PCI host.
#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use rfvd::device::{RfvdClass, RfvdDevice};
use rfvd::host::{
    BarKind, DmaTxResult, MsiInitError, PciHost, RegionHandle, RegionOps,
};
use rfvd_abi::{error_code, DescriptionAbi, Pd};

// ============================================================================
// MOCK BACKEND
// ============================================================================

/// Descriptor fields the mock answers DMA queries from. Fields are raw
/// `i64` so tests can plant sentinel codes directly.
#[derive(Debug, Clone, Copy, Default)]
pub struct DmaDescriptor {
    pub start: i64,
    pub size: i64,
    pub mask: i64,
    pub src: i64,
    pub dst: i64,
    pub cnt: i64,
    pub cmd: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PciAccess {
    pub write: bool,
    pub bar: usize,
    pub addr: u64,
    pub size: usize,
    pub value: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemAccess {
    pub write: bool,
    pub mem: usize,
    pub addr: u64,
    pub size: usize,
    pub value: u64,
}

pub struct MockBackend {
    pub class_id: i64,
    pub vid: i64,
    pub pid: i64,
    pub subvid: i64,
    pub subpid: i64,
    pub revision: i64,
    /// `None` answers `ATTR_NOT_SET`.
    pub romfile: Option<String>,
    pub name_label: Option<String>,
    pub desc_label: Option<String>,
    /// Declared BARs as `(size, kind)`; kind 0 = PIO.
    pub bars: Vec<(i64, i64)>,
    /// Declared custom memories as `(base, size)`.
    pub mems: Vec<(i64, i64)>,
    pub msix_bar: i64,

    pub irq_word: AtomicU32,
    pub lower_calls: Mutex<Vec<u32>>,

    /// `(code, value)` answered to every register read.
    pub pci_read_reply: Mutex<(i64, u64)>,
    pub pci_write_reply: Mutex<i64>,
    pub mem_read_reply: Mutex<(i64, u64)>,
    pub mem_write_reply: Mutex<i64>,
    pub pci_accesses: Mutex<Vec<PciAccess>>,
    pub mem_accesses: Mutex<Vec<MemAccess>>,

    pub dma: Mutex<DmaDescriptor>,
    pub staging: Mutex<Vec<u8>>,
}

impl Default for MockBackend {
    fn default() -> Self {
        Self {
            class_id: 0,
            vid: 0x1234,
            pid: 0x5678,
            subvid: 0,
            subpid: 0,
            revision: 0x01,
            romfile: None,
            name_label: None,
            desc_label: None,
            bars: Vec::new(),
            mems: Vec::new(),
            msix_bar: error_code::ATTR_NOT_SET,
            irq_word: AtomicU32::new(0),
            lower_calls: Mutex::new(Vec::new()),
            pci_read_reply: Mutex::new((0, 0)),
            pci_write_reply: Mutex::new(0),
            mem_read_reply: Mutex::new((0, 0)),
            mem_write_reply: Mutex::new(0),
            pci_accesses: Mutex::new(Vec::new()),
            mem_accesses: Mutex::new(Vec::new()),
            dma: Mutex::new(DmaDescriptor::default()),
            staging: Mutex::new(Vec::new()),
        }
    }
}

impl MockBackend {
    pub fn set_irq(&self, word: u32) {
        self.irq_word.store(word, Ordering::SeqCst);
    }

    pub fn set_dma(&self, dma: DmaDescriptor) {
        *self.dma.lock().unwrap() = dma;
    }

    fn blob_reply(data: &Option<String>, out: &mut [u8], out_len: &mut usize) -> i64 {
        match data {
            None => error_code::ATTR_NOT_SET,
            Some(s) => {
                let bytes = s.as_bytes();
                let n = bytes.len().min(out.len());
                out[..n].copy_from_slice(&bytes[..n]);
                *out_len = bytes.len();
                0
            }
        }
    }
}

impl DescriptionAbi for MockBackend {
    fn init_logger(&self) -> i64 {
        0
    }

    fn load(&self, _path: &str) -> i64 {
        1
    }

    fn load_from_env(&self) -> i64 {
        1
    }

    fn class_id(&self, _: Pd) -> i64 {
        self.class_id
    }

    fn vid(&self, _: Pd) -> i64 {
        self.vid
    }

    fn pid(&self, _: Pd) -> i64 {
        self.pid
    }

    fn subvid(&self, _: Pd) -> i64 {
        self.subvid
    }

    fn subpid(&self, _: Pd) -> i64 {
        self.subpid
    }

    fn revision(&self, _: Pd) -> i64 {
        self.revision
    }

    fn romfile(&self, _: Pd, out: &mut [u8], out_len: &mut usize) -> i64 {
        Self::blob_reply(&self.romfile, out, out_len)
    }

    fn name(&self, _: Pd, out: &mut [u8], out_len: &mut usize) -> i64 {
        Self::blob_reply(&self.name_label, out, out_len)
    }

    fn desc(&self, _: Pd, out: &mut [u8], out_len: &mut usize) -> i64 {
        Self::blob_reply(&self.desc_label, out, out_len)
    }

    fn bar_count(&self, _: Pd) -> i64 {
        self.bars.len() as i64
    }

    fn bar_size(&self, _: Pd, bar: usize) -> i64 {
        self.bars.get(bar).map_or(error_code::NO_ELEMENT, |b| b.0)
    }

    fn bar_kind(&self, _: Pd, bar: usize) -> i64 {
        self.bars.get(bar).map_or(error_code::NO_ELEMENT, |b| b.1)
    }

    fn msix_bar_idx(&self, _: Pd) -> i64 {
        self.msix_bar
    }

    fn pci_read(&self, _: Pd, bar: usize, addr: u64, size: usize, out: &mut u64) -> i64 {
        self.pci_accesses.lock().unwrap().push(PciAccess {
            write: false,
            bar,
            addr,
            size,
            value: 0,
        });
        let (code, value) = *self.pci_read_reply.lock().unwrap();
        *out = value;
        code
    }

    fn pci_write(&self, _: Pd, bar: usize, addr: u64, size: usize, value: u64) -> i64 {
        self.pci_accesses.lock().unwrap().push(PciAccess {
            write: true,
            bar,
            addr,
            size,
            value,
        });
        *self.pci_write_reply.lock().unwrap()
    }

    fn mem_count(&self, _: Pd) -> i64 {
        self.mems.len() as i64
    }

    fn mem_base(&self, _: Pd, mem: usize) -> i64 {
        self.mems.get(mem).map_or(error_code::NO_ELEMENT, |m| m.0)
    }

    fn mem_size(&self, _: Pd, mem: usize) -> i64 {
        self.mems.get(mem).map_or(error_code::NO_ELEMENT, |m| m.1)
    }

    fn mem_read(&self, _: Pd, mem: usize, addr: u64, size: usize, out: &mut u64) -> i64 {
        self.mem_accesses.lock().unwrap().push(MemAccess {
            write: false,
            mem,
            addr,
            size,
            value: 0,
        });
        let (code, value) = *self.mem_read_reply.lock().unwrap();
        *out = value;
        code
    }

    fn mem_write(&self, _: Pd, mem: usize, addr: u64, size: usize, value: u64) -> i64 {
        self.mem_accesses.lock().unwrap().push(MemAccess {
            write: true,
            mem,
            addr,
            size,
            value,
        });
        *self.mem_write_reply.lock().unwrap()
    }

    fn irq_status(&self, _: Pd) -> u32 {
        self.irq_word.load(Ordering::SeqCst)
    }

    fn irq_lower(&self, _: Pd, mask: u32) -> u32 {
        self.lower_calls.lock().unwrap().push(mask);
        self.irq_word.fetch_and(!mask, Ordering::SeqCst) & !mask
    }

    fn dma_start(&self, _: Pd) -> i64 {
        self.dma.lock().unwrap().start
    }

    fn dma_size(&self, _: Pd) -> i64 {
        self.dma.lock().unwrap().size
    }

    fn dma_mask(&self, _: Pd) -> i64 {
        self.dma.lock().unwrap().mask
    }

    fn dma_src(&self, _: Pd) -> i64 {
        self.dma.lock().unwrap().src
    }

    fn dma_dst(&self, _: Pd) -> i64 {
        self.dma.lock().unwrap().dst
    }

    fn dma_cnt(&self, _: Pd) -> i64 {
        self.dma.lock().unwrap().cnt
    }

    fn dma_cmd(&self, _: Pd) -> i64 {
        self.dma.lock().unwrap().cmd
    }

    fn dma_buf(&self, _: Pd, out: &mut [u8], out_len: &mut usize) -> i64 {
        let staging = self.staging.lock().unwrap();
        let n = staging.len().min(out.len());
        out[..n].copy_from_slice(&staging[..n]);
        *out_len = n;
        0
    }
}

// ============================================================================
// MOCK HOST
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DmaOp {
    pub write: bool,
    pub addr: u64,
    pub len: usize,
}

pub struct RegionRecord {
    pub handle: RegionHandle,
    pub name: String,
    pub size: u64,
    pub kind: BarKind,
    pub ops: Arc<dyn RegionOps>,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Identity {
    pub class: Option<u16>,
    pub prog_if: Option<u8>,
    pub revision: Option<u8>,
    pub vendor_id: Option<u16>,
    pub device_id: Option<u16>,
    pub subsystem_vendor_id: Option<u16>,
    pub subsystem_id: Option<u16>,
    pub interrupt_pin: Option<u8>,
}

pub struct MockHost {
    pub pcie: bool,
    pub msi_supported: bool,
    /// Run watchdog entries on real threads instead of capturing them.
    pub run_threads: bool,

    next_region: AtomicU64,
    msi_on: AtomicBool,

    pub config: Mutex<[u8; 256]>,
    pub identity: Mutex<Identity>,
    pub regions: Mutex<Vec<RegionRecord>>,
    pub bar_mounts: Mutex<Vec<(usize, BarKind, RegionHandle)>>,
    pub overlays: Mutex<Vec<(u64, RegionHandle, i32)>>,

    pub irq_line: AtomicBool,
    pub irq_transitions: Mutex<Vec<bool>>,
    pub msi_notifies: Mutex<Vec<u16>>,
    pub msi_uninit_calls: AtomicUsize,
    pub pcie_caps: Mutex<Vec<u16>>,

    pub guest_mem: Mutex<Vec<u8>>,
    pub dma_log: Mutex<Vec<DmaOp>>,

    pub thread_names: Mutex<Vec<String>>,
    pub captured_entries: Mutex<Vec<Box<dyn FnOnce() + Send>>>,
    pub join_handles: Mutex<Vec<std::thread::JoinHandle<()>>>,
}

impl MockHost {
    pub fn new(pcie: bool, msi_supported: bool) -> Self {
        Self {
            pcie,
            msi_supported,
            run_threads: false,
            next_region: AtomicU64::new(1),
            msi_on: AtomicBool::new(false),
            config: Mutex::new([0u8; 256]),
            identity: Mutex::new(Identity::default()),
            regions: Mutex::new(Vec::new()),
            bar_mounts: Mutex::new(Vec::new()),
            overlays: Mutex::new(Vec::new()),
            irq_line: AtomicBool::new(false),
            irq_transitions: Mutex::new(Vec::new()),
            msi_notifies: Mutex::new(Vec::new()),
            msi_uninit_calls: AtomicUsize::new(0),
            pcie_caps: Mutex::new(Vec::new()),
            guest_mem: Mutex::new(vec![0u8; 64 * 1024]),
            dma_log: Mutex::new(Vec::new()),
            thread_names: Mutex::new(Vec::new()),
            captured_entries: Mutex::new(Vec::new()),
            join_handles: Mutex::new(Vec::new()),
        }
    }

    pub fn config_byte(&self, offset: usize) -> u8 {
        self.config.lock().unwrap()[offset]
    }

    pub fn config_word(&self, offset: usize) -> u16 {
        let config = self.config.lock().unwrap();
        u16::from_le_bytes([config[offset], config[offset + 1]])
    }

    pub fn region_by_name(&self, name: &str) -> Option<Arc<dyn RegionOps>> {
        self.regions
            .lock()
            .unwrap()
            .iter()
            .find(|r| r.name == name)
            .map(|r| Arc::clone(&r.ops))
    }

    /// Dispatch ops mounted as BAR `index`.
    pub fn bar_ops(&self, index: usize) -> Option<Arc<dyn RegionOps>> {
        let handle = self
            .bar_mounts
            .lock()
            .unwrap()
            .iter()
            .find(|(i, _, _)| *i == index)
            .map(|(_, _, h)| *h)?;
        self.regions
            .lock()
            .unwrap()
            .iter()
            .find(|r| r.handle == handle)
            .map(|r| Arc::clone(&r.ops))
    }
}

impl Default for MockHost {
    fn default() -> Self {
        Self::new(false, false)
    }
}

impl PciHost for MockHost {
    fn is_pcie(&self) -> bool {
        self.pcie
    }

    fn config_write_u8(&self, offset: usize, value: u8) {
        self.config.lock().unwrap()[offset] = value;
    }

    fn config_write_u16(&self, offset: usize, value: u16) {
        let mut config = self.config.lock().unwrap();
        config[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
    }

    fn set_class(&self, class: u16) {
        self.identity.lock().unwrap().class = Some(class);
    }

    fn set_prog_if(&self, prog_if: u8) {
        self.identity.lock().unwrap().prog_if = Some(prog_if);
    }

    fn set_revision(&self, revision: u8) {
        self.identity.lock().unwrap().revision = Some(revision);
    }

    fn set_vendor_id(&self, vendor_id: u16) {
        self.identity.lock().unwrap().vendor_id = Some(vendor_id);
    }

    fn set_device_id(&self, device_id: u16) {
        self.identity.lock().unwrap().device_id = Some(device_id);
    }

    fn set_subsystem_vendor_id(&self, subsystem_vendor_id: u16) {
        self.identity.lock().unwrap().subsystem_vendor_id = Some(subsystem_vendor_id);
    }

    fn set_subsystem_id(&self, subsystem_id: u16) {
        self.identity.lock().unwrap().subsystem_id = Some(subsystem_id);
    }

    fn set_interrupt_pin(&self, pin: u8) {
        self.identity.lock().unwrap().interrupt_pin = Some(pin);
    }

    fn register_io_region(
        &self,
        ops: Arc<dyn RegionOps>,
        name: &str,
        size: u64,
        kind: BarKind,
    ) -> RegionHandle {
        let handle = RegionHandle(self.next_region.fetch_add(1, Ordering::SeqCst));
        self.regions.lock().unwrap().push(RegionRecord {
            handle,
            name: name.to_owned(),
            size,
            kind,
            ops,
        });
        handle
    }

    fn register_bar(&self, index: usize, kind: BarKind, region: RegionHandle) {
        self.bar_mounts.lock().unwrap().push((index, kind, region));
    }

    fn add_overlay(&self, base: u64, region: RegionHandle, priority: i32) {
        self.overlays.lock().unwrap().push((base, region, priority));
    }

    fn msi_init(
        &self,
        _cap_offset: u8,
        _nvectors: u16,
        _per_vector_mask: bool,
        _msi64: bool,
    ) -> Result<(), MsiInitError> {
        if !self.msi_supported {
            return Err(MsiInitError::NotSupported);
        }
        self.msi_on.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn msi_enabled(&self) -> bool {
        self.msi_on.load(Ordering::SeqCst)
    }

    fn msi_notify(&self, vector: u16) {
        self.msi_notifies.lock().unwrap().push(vector);
    }

    fn msi_uninit(&self) {
        self.msi_on.store(false, Ordering::SeqCst);
        self.msi_uninit_calls.fetch_add(1, Ordering::SeqCst);
    }

    fn pcie_endpoint_cap_init(&self, cap_offset: u16) -> bool {
        self.pcie_caps.lock().unwrap().push(cap_offset);
        true
    }

    fn set_irq(&self, level: bool) {
        let previous = self.irq_line.swap(level, Ordering::SeqCst);
        if previous != level {
            self.irq_transitions.lock().unwrap().push(level);
        }
    }

    fn dma_read(&self, guest_addr: u64, buf: &mut [u8]) -> DmaTxResult {
        self.dma_log.lock().unwrap().push(DmaOp {
            write: false,
            addr: guest_addr,
            len: buf.len(),
        });
        let guest = self.guest_mem.lock().unwrap();
        let start = guest_addr as usize;
        if let Some(src) = guest.get(start..start + buf.len()) {
            buf.copy_from_slice(src);
        }
        Ok(())
    }

    fn dma_write(&self, guest_addr: u64, buf: &[u8]) -> DmaTxResult {
        self.dma_log.lock().unwrap().push(DmaOp {
            write: true,
            addr: guest_addr,
            len: buf.len(),
        });
        let mut guest = self.guest_mem.lock().unwrap();
        let start = guest_addr as usize;
        if let Some(dst) = guest.get_mut(start..start + buf.len()) {
            dst.copy_from_slice(buf);
        }
        Ok(())
    }

    fn start_detached_thread(&self, name: &str, entry: Box<dyn FnOnce() + Send + 'static>) {
        self.thread_names.lock().unwrap().push(name.to_owned());
        if self.run_threads {
            let handle = std::thread::Builder::new()
                .name(name.to_owned())
                .spawn(entry)
                .expect("spawn watchdog");
            self.join_handles.lock().unwrap().push(handle);
        } else {
            self.captured_entries.lock().unwrap().push(entry);
        }
    }
}

// ============================================================================
// LOG CAPTURE
// ============================================================================

#[derive(Debug, Clone)]
pub struct LogRecord {
    pub level: log::Level,
    pub target: String,
    pub message: String,
}

pub struct CaptureLogger {
    pub records: Mutex<Vec<LogRecord>>,
}

impl log::Log for CaptureLogger {
    fn enabled(&self, _metadata: &log::Metadata) -> bool {
        true
    }

    fn log(&self, record: &log::Record) {
        self.records.lock().unwrap().push(LogRecord {
            level: record.level(),
            target: record.target().to_owned(),
            message: format!("{}", record.args()),
        });
    }

    fn flush(&self) {}
}

static LOGGER: CaptureLogger = CaptureLogger {
    records: Mutex::new(Vec::new()),
};

/// Install (once per process) the capturing logger and return it.
pub fn capture_logs() -> &'static CaptureLogger {
    static INIT: std::sync::Once = std::sync::Once::new();
    INIT.call_once(|| {
        let _ = log::set_logger(&LOGGER);
        log::set_max_level(log::LevelFilter::Debug);
    });
    &LOGGER
}

/// Messages logged on the guest-error channel so far.
pub fn guest_errors() -> Vec<String> {
    capture_logs()
        .records
        .lock()
        .unwrap()
        .iter()
        .filter(|r| r.target == "guest-error")
        .map(|r| r.message.clone())
        .collect()
}

// ============================================================================
// SETUP
// ============================================================================

/// Class-init + realize against the mock pair. The class (and with it the
/// backend handle) is process-wide, so every test in one binary shares the
/// first backend configuration it sees.
pub fn realize_with(backend: Arc<MockBackend>, host: Arc<MockHost>) -> Arc<RfvdDevice> {
    let class = RfvdClass::init(backend).expect("class init");
    RfvdDevice::realize(class, host).expect("realize")
}
