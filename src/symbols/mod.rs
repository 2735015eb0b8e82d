//! Native symbol tables for shared libraries
//!
//! When the log announces a shared library, its C++ symbols are read with
//! platform tools (`nm`/`objdump` on Linux, `nm` on macOS, the linker `.map`
//! file on Windows) and registered as static code. Providers only turn tool
//! output into [`FuncInfo`] records; address translation into the profiled
//! process and range clean-up are shared by every platform.
//!
//! A library whose symbols cannot be loaded contributes no symbols. Ticks in
//! it are still attributed to the library as a whole.

pub mod linux;
pub mod macos;
pub mod windows;

pub use linux::LinuxSymbolProvider;
pub use macos::MacSymbolProvider;
pub use windows::WindowsSymbolProvider;

use crate::config::ProcessorConfig;
use serde::{Deserialize, Serialize};
use std::process::Command;
use thiserror::Error;
use tracing::{debug, warn};

/// Errors raised while loading a symbol table
#[derive(Error, Debug)]
pub enum SymbolError {
    #[error("failed to run {tool}: {source}")]
    Spawn {
        tool: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{tool} failed ({status}): {stderr}")]
    ToolFailed {
        tool: String,
        status: String,
        stderr: String,
    },

    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid symbol pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error("cannot derive a map file name from {0}")]
    MapFileName(String),
}

/// Result type for symbol loading
pub type Result<T> = std::result::Result<T, SymbolError>;

/// A symbol as found in the binary, before address translation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FuncInfo {
    pub name: String,
    pub start: u64,
    /// Unknown for formats that do not record symbol sizes
    pub size: Option<u64>,
}

impl FuncInfo {
    pub fn new(name: impl Into<String>, start: u64, size: Option<u64>) -> Self {
        Self {
            name: name.into(),
            start,
            size,
        }
    }
}

/// A symbol translated into the profiled process, covering `[start, end)`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedSymbol {
    pub name: String,
    pub start: u64,
    pub end: u64,
}

/// Platform whose symbol tools are used
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    #[default]
    Linux,
    Macos,
    Windows,
}

/// Source of native symbols for shared libraries
pub trait SymbolTableProvider {
    /// Read the raw symbol list of `lib_name`, ordered by address
    fn load_symbols(&mut self, lib_name: &str) -> Result<Vec<FuncInfo>>;

    /// Load the symbols of a library mapped at `[lib_start, lib_end)` and
    /// report each one through `callback` as `(name, start, end)`.
    ///
    /// Load failures are logged and yield no symbols.
    fn parse_vm_symbols(
        &mut self,
        lib_name: &str,
        lib_start: u64,
        lib_end: u64,
        aslr_slide: i64,
        callback: &mut dyn FnMut(&str, u64, u64),
    ) {
        let symbols = match self.load_symbols(lib_name) {
            Ok(symbols) => symbols,
            Err(err) => {
                warn!("no native symbols for {lib_name}: {err}");
                return;
            }
        };
        debug!("loaded {} symbols from {lib_name}", symbols.len());
        for symbol in resolve_symbols(symbols, lib_start, lib_end, aslr_slide) {
            callback(&symbol.name, symbol.start, symbol.end);
        }
    }
}

/// Translate raw symbols into process addresses and clean them up.
///
/// Starts that look like file offsets (small enough to lie inside the
/// library) are rebased on `lib_start`; everything else is shifted by the
/// ASLR slide. Symbols without a size end where the next symbol starts.
/// Symbols outside the library, and aliases sharing the previous symbol's
/// start, are dropped.
pub fn resolve_symbols(
    symbols: Vec<FuncInfo>,
    lib_start: u64,
    lib_end: u64,
    aslr_slide: i64,
) -> Vec<ResolvedSymbol> {
    let mut resolver = RangeResolver::new(lib_start, lib_end);
    let start = i128::from(lib_start);
    let end = i128::from(lib_end);
    let slide = i128::from(aslr_slide);

    for info in symbols {
        let raw = i128::from(info.start);
        let translated = if raw < start - slide && raw < end - start {
            raw + start
        } else {
            raw + slide
        };
        let Ok(translated) = u64::try_from(translated) else {
            continue;
        };
        let symbol_end = info
            .size
            .filter(|&size| size > 0)
            .map(|size| translated.saturating_add(size));
        resolver.add(info.name, translated, symbol_end);
    }
    resolver.add(String::new(), lib_end, None);
    resolver.emitted
}

struct RangeResolver {
    lib_start: u64,
    lib_end: u64,
    last_unknown_size: Option<(String, u64)>,
    last_added: Option<(u64, u64)>,
    emitted: Vec<ResolvedSymbol>,
}

impl RangeResolver {
    fn new(lib_start: u64, lib_end: u64) -> Self {
        Self {
            lib_start,
            lib_end,
            last_unknown_size: None,
            last_added: None,
            emitted: Vec::new(),
        }
    }

    fn in_library(&self, start: u64, end: u64) -> bool {
        start >= self.lib_start && end <= self.lib_end
    }

    fn add(&mut self, name: String, start: u64, end: Option<u64>) {
        if let Some((pending, pending_start)) = self.last_unknown_size.take() {
            if pending_start < start {
                let inside_last = self
                    .last_added
                    .is_some_and(|(s, e)| pending_start >= s && start <= e);
                if !inside_last && self.in_library(pending_start, start) {
                    self.emit(pending, pending_start, start);
                }
            }
        }

        match end {
            Some(end) => {
                let duplicate = self.last_added.is_some_and(|(s, _)| s == start);
                if !duplicate && self.in_library(start, end) {
                    self.emit(name, start, end);
                }
            }
            None => self.last_unknown_size = Some((name, start)),
        }
    }

    fn emit(&mut self, name: String, start: u64, end: u64) {
        self.last_added = Some((start, end));
        self.emitted.push(ResolvedSymbol { name, start, end });
    }
}

/// Run an external tool and capture its standard output
pub(crate) fn run_tool(tool: &str, args: &[&str]) -> Result<String> {
    debug!("running {tool} {}", args.join(" "));
    let output = Command::new(tool)
        .args(args)
        .output()
        .map_err(|source| SymbolError::Spawn {
            tool: tool.to_string(),
            source,
        })?;
    if !output.status.success() {
        return Err(SymbolError::ToolFailed {
            tool: tool.to_string(),
            status: output.status.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Provider for the platform selected in `config`
pub fn provider_for(config: &ProcessorConfig) -> Box<dyn SymbolTableProvider> {
    match config.platform {
        Platform::Linux => Box::new(LinuxSymbolProvider::new(
            &config.nm,
            &config.objdump,
            &config.target_root_fs,
            &config.apk_embedded_library,
        )),
        Platform::Macos => Box::new(MacSymbolProvider::new(&config.nm, &config.target_root_fs)),
        Platform::Windows => Box::new(WindowsSymbolProvider::new(&config.target_root_fs)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(resolved: &[ResolvedSymbol]) -> Vec<(&str, u64, u64)> {
        resolved
            .iter()
            .map(|s| (s.name.as_str(), s.start, s.end))
            .collect()
    }

    #[test]
    fn test_sized_symbols_pass_through() {
        let symbols = vec![FuncInfo::new("Runtime_Foo", 0x08139150, Some(0xb4b))];
        let resolved = resolve_symbols(symbols, 0x08048000, 0x08200000, 0);
        assert_eq!(
            names(&resolved),
            vec![("Runtime_Foo", 0x08139150, 0x08139150 + 0xb4b)]
        );
    }

    #[test]
    fn test_duplicate_starts_emit_once() {
        let symbols = vec![
            FuncInfo::new("alias_a", 0x1100, Some(0x10)),
            FuncInfo::new("alias_b", 0x1100, Some(0x10)),
            FuncInfo::new("next", 0x1200, Some(0x10)),
        ];
        let resolved = resolve_symbols(symbols, 0x1000, 0x2000, 0);
        assert_eq!(
            names(&resolved),
            vec![("alias_a", 0x1100, 0x1110), ("next", 0x1200, 0x1210)]
        );
    }

    #[test]
    fn test_unknown_sizes_close_at_next_symbol() {
        let symbols = vec![
            FuncInfo::new("a", 0x1100, None),
            FuncInfo::new("b", 0x1180, None),
            FuncInfo::new("c", 0x1400, None),
        ];
        let resolved = resolve_symbols(symbols, 0x1000, 0x2000, 0);
        assert_eq!(
            names(&resolved),
            vec![("a", 0x1100, 0x1180), ("b", 0x1180, 0x1400), ("c", 0x1400, 0x2000)]
        );
    }

    #[test]
    fn test_unknown_size_inside_previous_symbol_is_dropped() {
        let symbols = vec![
            FuncInfo::new("outer", 0x1100, Some(0x100)),
            FuncInfo::new("label", 0x1110, None),
            FuncInfo::new("next", 0x1180, Some(0x10)),
        ];
        let resolved = resolve_symbols(symbols, 0x1000, 0x2000, 0);
        assert_eq!(
            names(&resolved),
            vec![("outer", 0x1100, 0x1200), ("next", 0x1180, 0x1190)]
        );
    }

    #[test]
    fn test_file_offsets_are_rebased() {
        let symbols = vec![FuncInfo::new("f", 0x100, Some(0x20))];
        let resolved = resolve_symbols(symbols, 0x7f0000000000, 0x7f0000010000, 0);
        assert_eq!(
            names(&resolved),
            vec![("f", 0x7f0000000100, 0x7f0000000120)]
        );
    }

    #[test]
    fn test_aslr_slide_applied_to_virtual_addresses() {
        let symbols = vec![FuncInfo::new("f", 0x400100, Some(0x20))];
        let resolved = resolve_symbols(symbols, 0x555555400000, 0x555555500000, 0x555555000000);
        assert_eq!(
            names(&resolved),
            vec![("f", 0x555555400100, 0x555555400120)]
        );
    }

    #[test]
    fn test_out_of_range_symbols_dropped() {
        let symbols = vec![
            FuncInfo::new("before", 0x0ff000, Some(0x10)),
            FuncInfo::new("inside", 0x100100, Some(0x10)),
            FuncInfo::new("after", 0x200000, Some(0x10)),
        ];
        let resolved = resolve_symbols(symbols, 0x100000, 0x101000, 0);
        assert_eq!(names(&resolved), vec![("inside", 0x100100, 0x100110)]);
    }

    struct Failing;

    impl SymbolTableProvider for Failing {
        fn load_symbols(&mut self, lib_name: &str) -> Result<Vec<FuncInfo>> {
            Err(SymbolError::MapFileName(lib_name.to_string()))
        }
    }

    #[test]
    fn test_load_failure_degrades_to_no_symbols() {
        let mut seen = Vec::new();
        Failing.parse_vm_symbols("libmissing.so", 0x1000, 0x2000, 0, &mut |name: &str, _: u64, _: u64| {
            seen.push(name.to_string())
        });
        assert!(seen.is_empty());
    }

    #[test]
    fn test_missing_tool_is_an_error() {
        let err = run_tool("/nonexistent/tickprof-nm", &["-n"]).unwrap_err();
        assert!(matches!(err, SymbolError::Spawn { .. }));
    }
}
