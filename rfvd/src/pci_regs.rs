//! PCI configuration-space offsets and bits the realize path programs.
//!
//! Only the registers RFVD touches directly; identity registers go through
//! the host's typed setters instead.
//!
//! Reference: PCI Local Bus Specification 3.0, §6.1.

/// Status register (16-bit).
pub const STATUS: usize = 0x06;
/// Cache line size register (8-bit).
pub const CACHE_LINE_SIZE: usize = 0x0C;
/// Capabilities pointer (8-bit).
pub const CAPABILITY_LIST: usize = 0x34;
/// Interrupt line register (8-bit).
pub const INTERRUPT_LINE: usize = 0x3C;
/// Interrupt pin register (8-bit).
pub const INTERRUPT_PIN: usize = 0x3D;

/// Status: device supports fast back-to-back transactions.
pub const STATUS_FAST_BACK: u16 = 0x0080;
/// Status: medium DEVSEL timing.
pub const STATUS_DEVSEL_MEDIUM: u16 = 0x0200;

/// Capability-list head when the PCIe endpoint capability is installed.
pub const CAP_PTR_PCIE: u8 = 0x80;

/// Offset the MSI capability is installed at.
pub const MSI_CAP_OFFSET: u8 = 0xd0;
/// Offset the PCI Express endpoint capability is installed at.
pub const PCIE_CAP_OFFSET: u16 = 0x80;
