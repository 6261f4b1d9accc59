//! Typed shim over the device-description backend.
//!
//! The raw ABI ([`rfvd_abi::DescriptionAbi`]) speaks the C convention:
//! scalar payloads and error sentinels share one integer return. Everything
//! above this module works with [`Backend`] instead, which owns the
//! descriptor handle and translates each call into a `Result`.
//!
//! Handle lifecycle: the description is opened once per process, before any
//! device realizes, and is never re-created or freed; individual device
//! teardown leaves it alone. The [`Backend::init_global`] singleton models
//! exactly that; clones of the shim share the same handle.

use std::sync::Arc;

use rfvd_abi::{error_code, DescriptionAbi, Pd};
use spin::Once;
use thiserror::Error;

use crate::host::BarKind;

/// Error taxonomy of the description backend.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum BackendError {
    #[error("no device behind the descriptor")]
    NoDevice,
    #[error("no such element")]
    NoElement,
    #[error("backend dereferenced a null pointer")]
    NullPointer,
    #[error("description has an invalid format")]
    InvalidFormat,
    #[error("description failed to parse")]
    ParseFailed,
    #[error("access out of bounds")]
    OutOfBound,
    #[error("description file not found")]
    FileNotFound,
    #[error("backend environment variable missing")]
    EnvMissing,
    #[error("backend read failed")]
    ReadFailed,
    #[error("backend write failed")]
    WriteFailed,
    #[error("attribute not set")]
    AttrNotSet,
    #[error("unclassified backend error")]
    Unclassified,
}

impl BackendError {
    /// Map a sentinel code to its error; `None` for payload values.
    pub fn from_code(code: i64) -> Option<BackendError> {
        match code {
            error_code::NO_DEVICE => Some(BackendError::NoDevice),
            error_code::NO_ELEMENT => Some(BackendError::NoElement),
            error_code::NULL_POINTER => Some(BackendError::NullPointer),
            error_code::INVALID_FORMAT => Some(BackendError::InvalidFormat),
            error_code::PARSE_FAILED => Some(BackendError::ParseFailed),
            error_code::OUT_OF_BOUND => Some(BackendError::OutOfBound),
            error_code::FILE_NOT_FOUND => Some(BackendError::FileNotFound),
            error_code::ENV_MISSING => Some(BackendError::EnvMissing),
            error_code::READ_FAILED => Some(BackendError::ReadFailed),
            error_code::WRITE_FAILED => Some(BackendError::WriteFailed),
            error_code::ATTR_NOT_SET => Some(BackendError::AttrNotSet),
            error_code::UNCLASSIFIED => Some(BackendError::Unclassified),
            _ => None,
        }
    }
}

pub type Result<T> = core::result::Result<T, BackendError>;

/// Split a raw return into payload or error.
///
/// Only values inside the sentinel range are errors; other negative values
/// are payloads (a DMA mask of all ones arrives as `-1`).
fn check(code: i64) -> Result<i64> {
    match BackendError::from_code(code) {
        Some(err) => Err(err),
        None => Ok(code),
    }
}

/// Like [`check`], but `ATTR_NOT_SET` means the attribute is absent.
fn check_optional(code: i64) -> Result<Option<i64>> {
    match check(code) {
        Ok(v) => Ok(Some(v)),
        Err(BackendError::AttrNotSet) => Ok(None),
        Err(e) => Err(e),
    }
}

static BACKEND: Once<Backend> = Once::new();

/// Typed wrapper around one opened description handle.
///
/// Cheap to clone; clones share the underlying handle.
#[derive(Clone)]
pub struct Backend {
    abi: Arc<dyn DescriptionAbi>,
    pd: Pd,
}

impl Backend {
    /// Open the description named by the backend's environment variable.
    pub fn open(abi: Arc<dyn DescriptionAbi>) -> Result<Self> {
        let pd = check(abi.load_from_env())? as Pd;
        Ok(Self { abi, pd })
    }

    /// Open the description at an explicit path.
    pub fn open_path(abi: Arc<dyn DescriptionAbi>, path: &str) -> Result<Self> {
        let pd = check(abi.load(path))? as Pd;
        Ok(Self { abi, pd })
    }

    /// Open (at most once per process) the global description handle.
    ///
    /// Later calls return the handle the first call produced; there is no
    /// free path: the process lifecycle owns the descriptor.
    pub fn init_global(abi: Arc<dyn DescriptionAbi>) -> Result<&'static Backend> {
        if let Some(backend) = BACKEND.get() {
            return Ok(backend);
        }
        let backend = Backend::open(abi)?;
        Ok(BACKEND.call_once(|| backend))
    }

    /// The global handle, if [`Backend::init_global`] has run.
    pub fn global() -> Option<&'static Backend> {
        BACKEND.get()
    }

    pub fn pd(&self) -> Pd {
        self.pd
    }

    pub fn init_logger(&self) -> Result<()> {
        check(self.abi.init_logger()).map(|_| ())
    }

    // ── Identity ────────────────────────────────────────────────

    pub fn class_id(&self) -> Result<u32> {
        check(self.abi.class_id(self.pd)).map(|v| v as u32)
    }

    pub fn vid(&self) -> Result<u16> {
        check(self.abi.vid(self.pd)).map(|v| v as u16)
    }

    pub fn pid(&self) -> Result<u16> {
        check(self.abi.pid(self.pd)).map(|v| v as u16)
    }

    pub fn subvid(&self) -> Result<u16> {
        check(self.abi.subvid(self.pd)).map(|v| v as u16)
    }

    pub fn subpid(&self) -> Result<u16> {
        check(self.abi.subpid(self.pd)).map(|v| v as u16)
    }

    pub fn revision(&self) -> Result<u8> {
        check(self.abi.revision(self.pd)).map(|v| v as u8)
    }

    /// ROM image path; `None` when the description carries none.
    pub fn romfile(&self) -> Result<Option<String>> {
        self.string_attr(rfvd_abi::MAX_ROMFILE_LEN, |abi, pd, buf, len| {
            abi.romfile(pd, buf, len)
        })
    }

    /// Device name label; `None` when unset.
    pub fn name(&self) -> Result<Option<String>> {
        self.string_attr(rfvd_abi::MAX_DEV_NAME_LEN, |abi, pd, buf, len| {
            abi.name(pd, buf, len)
        })
    }

    /// Device description label; `None` when unset.
    pub fn desc(&self) -> Result<Option<String>> {
        self.string_attr(rfvd_abi::MAX_DEV_DESC_LEN, |abi, pd, buf, len| {
            abi.desc(pd, buf, len)
        })
    }

    fn string_attr(
        &self,
        cap: usize,
        call: impl Fn(&dyn DescriptionAbi, Pd, &mut [u8], &mut usize) -> i64,
    ) -> Result<Option<String>> {
        let mut buf = vec![0u8; cap];
        let mut len = 0usize;
        match check_optional(call(self.abi.as_ref(), self.pd, &mut buf, &mut len))? {
            None => Ok(None),
            Some(_) if len == 0 => Ok(None),
            Some(_) if len > cap => Err(BackendError::OutOfBound),
            Some(_) => {
                buf.truncate(len);
                Ok(Some(String::from_utf8_lossy(&buf).into_owned()))
            }
        }
    }

    // ── PCI BARs ────────────────────────────────────────────────

    pub fn bar_count(&self) -> Result<usize> {
        check(self.abi.bar_count(self.pd)).map(|v| v as usize)
    }

    pub fn bar_size(&self, bar: usize) -> Result<u64> {
        check(self.abi.bar_size(self.pd, bar)).map(|v| v as u64)
    }

    pub fn bar_kind(&self, bar: usize) -> Result<BarKind> {
        check(self.abi.bar_kind(self.pd, bar)).map(|v| match v {
            0 => BarKind::Pio,
            _ => BarKind::Mmio,
        })
    }

    /// BAR index carrying MSI-X tables, when the description declares one.
    pub fn msix_bar_idx(&self) -> Result<Option<usize>> {
        Ok(check_optional(self.abi.msix_bar_idx(self.pd))?.map(|v| v as usize))
    }

    pub fn pci_read(&self, bar: usize, addr: u64, size: usize) -> Result<u64> {
        let mut out = 0u64;
        check(self.abi.pci_read(self.pd, bar, addr, size, &mut out))?;
        Ok(out)
    }

    pub fn pci_write(&self, bar: usize, addr: u64, size: usize, value: u64) -> Result<()> {
        check(self.abi.pci_write(self.pd, bar, addr, size, value)).map(|_| ())
    }

    // ── Custom memories ─────────────────────────────────────────

    pub fn mem_count(&self) -> Result<usize> {
        check(self.abi.mem_count(self.pd)).map(|v| v as usize)
    }

    pub fn mem_base(&self, mem: usize) -> Result<u64> {
        check(self.abi.mem_base(self.pd, mem)).map(|v| v as u64)
    }

    pub fn mem_size(&self, mem: usize) -> Result<u64> {
        check(self.abi.mem_size(self.pd, mem)).map(|v| v as u64)
    }

    pub fn mem_read(&self, mem: usize, addr: u64, size: usize) -> Result<u64> {
        let mut out = 0u64;
        check(self.abi.mem_read(self.pd, mem, addr, size, &mut out))?;
        Ok(out)
    }

    pub fn mem_write(&self, mem: usize, addr: u64, size: usize, value: u64) -> Result<()> {
        check(self.abi.mem_write(self.pd, mem, addr, size, value)).map(|_| ())
    }

    // ── Interrupts ──────────────────────────────────────────────

    /// Current interrupt-status word. Side-effect free.
    pub fn irq_status(&self) -> u32 {
        self.abi.irq_status(self.pd)
    }

    /// Clear exactly the bits in `mask`; returns the resulting word.
    pub fn irq_lower(&self, mask: u32) -> u32 {
        self.abi.irq_lower(self.pd, mask)
    }

    // ── DMA descriptor ──────────────────────────────────────────

    pub fn dma_start(&self) -> Result<u64> {
        check(self.abi.dma_start(self.pd)).map(|v| v as u64)
    }

    pub fn dma_size(&self) -> Result<u64> {
        check(self.abi.dma_size(self.pd)).map(|v| v as u64)
    }

    pub fn dma_mask(&self) -> Result<u64> {
        check(self.abi.dma_mask(self.pd)).map(|v| v as u64)
    }

    pub fn dma_src(&self) -> Result<u64> {
        check(self.abi.dma_src(self.pd)).map(|v| v as u64)
    }

    pub fn dma_dst(&self) -> Result<u64> {
        check(self.abi.dma_dst(self.pd)).map(|v| v as u64)
    }

    pub fn dma_cnt(&self) -> Result<u64> {
        check(self.abi.dma_cnt(self.pd)).map(|v| v as u64)
    }

    pub fn dma_cmd(&self) -> Result<u64> {
        check(self.abi.dma_cmd(self.pd)).map(|v| v as u64)
    }

    /// Snapshot up to `len` bytes of the device-side staging buffer.
    ///
    /// The returned vector is always exactly `len` bytes; a shorter backend
    /// answer leaves the tail zeroed.
    pub fn dma_buf(&self, len: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; len];
        let mut produced = 0usize;
        check(self.abi.dma_buf(self.pd, &mut buf, &mut produced))?;
        Ok(buf)
    }
}
