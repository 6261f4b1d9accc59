//! Environment knobs.
//!
//! Small wrapper over process environment variables used for operator
//! toggles. A knob captures the variable's value at construction; later
//! changes to the environment are not observed.

use lazy_static::lazy_static;

/// Name of the knob that enables verbose per-access debug logging.
pub const DEBUG_LOG_ENV: &str = "RFVD_ENABLE_DEBUG_LOG";

lazy_static! {
    static ref DEBUG_LOG: bool = EnvKnob::new(DEBUG_LOG_ENV).is_set();
}

/// Whether per-access debug reporting was requested for this process.
pub fn debug_log_enabled() -> bool {
    *DEBUG_LOG
}

/// One captured environment variable.
pub struct EnvKnob {
    name: String,
    value: Option<String>,
}

impl EnvKnob {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            value: std::env::var(name).ok(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// True when the variable exists and is non-empty.
    pub fn is_present(&self) -> bool {
        matches!(self.value.as_deref(), Some(v) if !v.is_empty())
    }

    /// Boolean coercion: absent/empty, `"false"` and `"0"` are false,
    /// everything else (including `"true"`) is true.
    pub fn is_set(&self) -> bool {
        match self.value.as_deref() {
            None | Some("") => false,
            Some("false") | Some("0") => false,
            Some(_) => true,
        }
    }

    /// 16-bit integer coercion; `None` when absent or unparseable.
    pub fn u16_value(&self) -> Option<u16> {
        self.value.as_deref()?.trim().parse().ok()
    }

    /// 32-bit integer coercion; `None` when absent or unparseable.
    pub fn u32_value(&self) -> Option<u32> {
        self.value.as_deref()?.trim().parse().ok()
    }

    /// The raw captured string, if any.
    pub fn value(&self) -> Option<&str> {
        self.value.as_deref()
    }
}
