//! Declarations for the RFVD device-description backend ABI.
//!
//! The backend is an out-of-process store that carries the whole mutable
//! state of the emulated PCI function: register file, custom memories,
//! interrupt word and DMA descriptor. The emulator side (the `rfvd` crate)
//! never interprets device registers itself; it forwards every access
//! through the calls declared here.
//!
//! Return convention (inherited from the C declaration of this interface):
//!   - scalar queries return `i64`; a value in the sentinel range below is
//!     an error, anything else is the payload
//!   - blob queries fill a caller-provided buffer and report the produced
//!     length through an out-parameter
//!   - the interrupt word accessors return `u32` and cannot fail
//!
//! `pd` is the process-wide descriptor handle produced by [`DescriptionAbi::load`]
//! or [`DescriptionAbi::load_from_env`].

/// Descriptor handle for an opened device description.
pub type Pd = u64;

// ============================================================================
// ERROR SENTINELS
// ============================================================================

/// Sentinel error codes the backend mixes into its integer returns.
pub mod error_code {
    pub const UNCLASSIFIED: i64 = -11;
    pub const NO_DEVICE: i64 = -12;
    pub const NO_ELEMENT: i64 = -13;
    pub const NULL_POINTER: i64 = -14;
    pub const INVALID_FORMAT: i64 = -15;
    pub const PARSE_FAILED: i64 = -16;
    pub const OUT_OF_BOUND: i64 = -17;
    pub const FILE_NOT_FOUND: i64 = -18;
    pub const ENV_MISSING: i64 = -19;
    pub const READ_FAILED: i64 = -20;
    pub const WRITE_FAILED: i64 = -21;
    pub const ATTR_NOT_SET: i64 = -22;

    /// Inclusive range every sentinel falls into. Values outside this range
    /// are payloads even when negative (a DMA mask of `!0` travels as `-1`).
    pub const SENTINEL_RANGE: core::ops::RangeInclusive<i64> = ATTR_NOT_SET..=UNCLASSIFIED;
}

// ============================================================================
// INTERRUPT CAUSES
// ============================================================================

/// Bits of the backend-held interrupt-status word.
pub mod irq_cause {
    pub const GENERAL: u32 = 1 << 0;
    pub const DMA: u32 = 1 << 1;
}

// ============================================================================
// DMA COMMAND WORD
// ============================================================================

/// Layout of the DMA `cmd` descriptor field.
///
/// ```text
/// Bit 0: RUN, a transfer is programmed
/// Bit 1: DIR, 0 transfers staging to guest, 1 transfers guest to staging
/// ```
pub mod dma_cmd {
    pub const RUN: u64 = 0x1;
    pub const DIR: u64 = 0x2;

    pub const DIR_TO_PCI: u64 = 0;
    pub const DIR_FROM_PCI: u64 = 1;

    /// Extract the direction field from a command word.
    pub fn direction(cmd: u64) -> u64 {
        (cmd & DIR) >> 1
    }
}

// ============================================================================
// BLOB LIMITS
// ============================================================================

/// Largest ROM file path the backend may report.
pub const MAX_ROMFILE_LEN: usize = 4096;
/// Largest device name the backend may report.
pub const MAX_DEV_NAME_LEN: usize = 256;
/// Largest device description string the backend may report.
pub const MAX_DEV_DESC_LEN: usize = 256;

// ============================================================================
// THE ABI
// ============================================================================

/// Raw call surface of a device-description backend.
///
/// Implementations translate each call into whatever transport reaches the
/// description store. Errors are reported in-band via [`error_code`]
/// sentinels; nothing here panics or returns `Result`.
pub trait DescriptionAbi: Send + Sync {
    // ── Lifecycle ───────────────────────────────────────────────

    /// Initialise the backend-side logger. Negative on failure.
    fn init_logger(&self) -> i64;
    /// Open the description at `path`. Non-negative handle on success.
    fn load(&self, path: &str) -> i64;
    /// Open the description named by the backend's own environment variable.
    fn load_from_env(&self) -> i64;

    // ── Identity ────────────────────────────────────────────────

    fn class_id(&self, pd: Pd) -> i64;
    fn vid(&self, pd: Pd) -> i64;
    fn pid(&self, pd: Pd) -> i64;
    fn subvid(&self, pd: Pd) -> i64;
    fn subpid(&self, pd: Pd) -> i64;
    fn revision(&self, pd: Pd) -> i64;

    /// ROM image path, if the description carries one.
    fn romfile(&self, pd: Pd, out: &mut [u8], out_len: &mut usize) -> i64;
    /// Human-readable device name label.
    fn name(&self, pd: Pd, out: &mut [u8], out_len: &mut usize) -> i64;
    /// Human-readable device description label.
    fn desc(&self, pd: Pd, out: &mut [u8], out_len: &mut usize) -> i64;

    // ── PCI BARs ────────────────────────────────────────────────

    /// Number of declared BARs, `0..=6`.
    fn bar_count(&self, pd: Pd) -> i64;
    /// Size in bytes of BAR `bar`; 0 means the slot is absent.
    fn bar_size(&self, pd: Pd, bar: usize) -> i64;
    /// Kind of BAR `bar`: 0 = port I/O, anything else = MMIO.
    fn bar_kind(&self, pd: Pd, bar: usize) -> i64;
    /// Index of the BAR carrying the MSI-X tables, when declared.
    fn msix_bar_idx(&self, pd: Pd) -> i64;

    /// Register read within BAR `bar`. `size` is the access width in bytes.
    fn pci_read(&self, pd: Pd, bar: usize, addr: u64, size: usize, out: &mut u64) -> i64;
    /// Register write within BAR `bar`.
    fn pci_write(&self, pd: Pd, bar: usize, addr: u64, size: usize, value: u64) -> i64;

    // ── Custom memories ─────────────────────────────────────────

    /// Number of declared system-memory overlay regions.
    fn mem_count(&self, pd: Pd) -> i64;
    /// Guest system address overlay `mem` shadows.
    fn mem_base(&self, pd: Pd, mem: usize) -> i64;
    /// Size in bytes of overlay `mem`.
    fn mem_size(&self, pd: Pd, mem: usize) -> i64;

    fn mem_read(&self, pd: Pd, mem: usize, addr: u64, size: usize, out: &mut u64) -> i64;
    fn mem_write(&self, pd: Pd, mem: usize, addr: u64, size: usize, value: u64) -> i64;

    // ── Interrupts ──────────────────────────────────────────────

    /// Current interrupt-status word. Side-effect free.
    fn irq_status(&self, pd: Pd) -> u32;
    /// Clear exactly the bits in `mask`; returns the resulting word.
    ///
    /// Raising is the description's own job; the emulator side only
    /// observes and acknowledges.
    fn irq_lower(&self, pd: Pd, mask: u32) -> u32;

    // ── DMA descriptor ──────────────────────────────────────────

    fn dma_start(&self, pd: Pd) -> i64;
    fn dma_size(&self, pd: Pd) -> i64;
    fn dma_mask(&self, pd: Pd) -> i64;
    fn dma_src(&self, pd: Pd) -> i64;
    fn dma_dst(&self, pd: Pd) -> i64;
    fn dma_cnt(&self, pd: Pd) -> i64;
    fn dma_cmd(&self, pd: Pd) -> i64;

    /// Copy the device-side staging buffer into `out`.
    fn dma_buf(&self, pd: Pd, out: &mut [u8], out_len: &mut usize) -> i64;
}
