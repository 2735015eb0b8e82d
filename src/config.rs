//! Processor configuration
//!
//! Every option of the tick processor can be set from a TOML file; command
//! line flags override file values. Missing keys take the defaults below.
//!
//! # Example tickprof.toml
//!
//! ```toml
//! platform = "linux"
//! nm = "/usr/bin/llvm-nm"
//! call_graph_size = 8
//! separate_bytecodes = true
//! range_start = 100
//! range_end = 2500
//! ```

use crate::profile::SeparateEntries;
use crate::report::OutputFormat;
use crate::symbols::Platform;
use crate::tick_processor::VmState;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

/// Default depth of the bottom-up profile
pub const DEFAULT_CALL_GRAPH_SIZE: usize = 5;

/// Errors raised while loading configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid range {0:?}, expected START,END in milliseconds or auto")]
    InvalidRange(String),
}

/// Result type for configuration loading
pub type Result<T> = std::result::Result<T, ConfigError>;

/// Options of a tick processing run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessorConfig {
    pub platform: Platform,
    pub nm: String,
    pub objdump: String,
    /// Prefix under which native libraries are looked up
    pub target_root_fs: String,
    /// Library substituted for code mapped straight out of an APK
    pub apk_embedded_library: String,

    pub separate_ic: bool,
    pub separate_bytecodes: bool,
    pub separate_builtins: bool,
    pub separate_stubs: bool,
    pub separate_sparkplug_handlers: bool,

    pub call_graph_size: usize,
    /// Leave unaccounted ticks out of percentages
    pub ignore_unknown: bool,
    /// Only count ticks taken in this VM state
    pub state_filter: Option<VmState>,
    /// Only count ticks taken while this runtime timer was active
    pub runtime_timer_filter: Option<String>,
    /// Sampling overhead per log entry in picoseconds
    pub distortion: i64,
    /// Ticks before this many milliseconds are ignored
    pub range_start: Option<i64>,
    /// Ticks after this many milliseconds are ignored
    pub range_end: Option<i64>,
    pub timed_range: bool,
    pub pairwise_timed_range: bool,
    pub only_summary: bool,
    pub serialize_vm_symbols: bool,
    pub format: OutputFormat,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        let separate = SeparateEntries::default();
        Self {
            platform: Platform::default(),
            nm: "nm".to_string(),
            objdump: "objdump".to_string(),
            target_root_fs: String::new(),
            apk_embedded_library: String::new(),
            separate_ic: separate.ic,
            separate_bytecodes: separate.bytecodes,
            separate_builtins: separate.builtins,
            separate_stubs: separate.stubs,
            separate_sparkplug_handlers: separate.sparkplug_handlers,
            call_graph_size: DEFAULT_CALL_GRAPH_SIZE,
            ignore_unknown: false,
            state_filter: None,
            runtime_timer_filter: None,
            distortion: 0,
            range_start: None,
            range_end: None,
            timed_range: false,
            pairwise_timed_range: false,
            only_summary: false,
            serialize_vm_symbols: false,
            format: OutputFormat::default(),
        }
    }
}

impl ProcessorConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    /// Load configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Which code categories keep their own call tree nodes
    pub fn separate_entries(&self) -> SeparateEntries {
        SeparateEntries {
            ic: self.separate_ic,
            bytecodes: self.separate_bytecodes,
            builtins: self.separate_builtins,
            stubs: self.separate_stubs,
            sparkplug_handlers: self.separate_sparkplug_handlers,
        }
    }

    /// Apply a `START,END` range given in milliseconds
    pub fn set_range(&mut self, range: &str) -> Result<()> {
        let (start, end) = parse_range(range)?;
        self.range_start = start;
        self.range_end = end;
        Ok(())
    }
}

/// Parse `START,END` where either bound may be `auto` or empty
pub fn parse_range(range: &str) -> Result<(Option<i64>, Option<i64>)> {
    let invalid = || ConfigError::InvalidRange(range.to_string());
    let (start, end) = range.split_once(',').ok_or_else(invalid)?;
    let bound = |text: &str| -> Result<Option<i64>> {
        match text.trim() {
            "" | "auto" => Ok(None),
            value => value.parse().map(Some).map_err(|_| invalid()),
        }
    };
    Ok((bound(start)?, bound(end)?))
}
