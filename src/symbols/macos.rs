//! Mach-O symbols read with `nm`

use super::{run_tool, FuncInfo, Result, SymbolTableProvider};
use regex::Regex;

/// `nm -n` line on macOS: address, optional type letter, name. Sizes are
/// not printed.
const FUNC_PATTERN: &str = r"^([0-9a-fA-F]{8,16}) (?:[a-zA-Z] )?(.*)$";

/// Symbol provider for macOS binaries
#[derive(Debug, Clone)]
pub struct MacSymbolProvider {
    nm: String,
    target_root_fs: String,
}

impl MacSymbolProvider {
    pub fn new(nm: &str, target_root_fs: &str) -> Self {
        Self {
            nm: nm.to_string(),
            target_root_fs: target_root_fs.to_string(),
        }
    }
}

impl SymbolTableProvider for MacSymbolProvider {
    fn load_symbols(&mut self, lib_name: &str) -> Result<Vec<FuncInfo>> {
        let path = format!("{}{}", self.target_root_fs, lib_name);
        // macOS nm reads `-f` as a format option, so only sort and demangle
        let output = run_tool(&self.nm, &["--demangle", "-n", &path])?;
        parse_nm_output(&output)
    }
}

/// Parse macOS `nm --demangle -n` output. Every symbol gets an unknown size.
pub fn parse_nm_output(output: &str) -> Result<Vec<FuncInfo>> {
    let re = Regex::new(FUNC_PATTERN)?;
    Ok(output
        .lines()
        .filter_map(|line| {
            let caps = re.captures(line)?;
            let start = u64::from_str_radix(&caps[1], 16).ok()?;
            Some(FuncInfo::new(&caps[2], start, None))
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_mac_nm_output() {
        let output = "\
                 U _malloc
0000000100000000 T __mh_execute_header
0000000100001230 t v8::internal::Heap::Scavenge()
0000000100001400 T _main
";
        let symbols = parse_nm_output(output).unwrap();
        assert_eq!(
            symbols,
            vec![
                FuncInfo::new("__mh_execute_header", 0x100000000, None),
                FuncInfo::new("v8::internal::Heap::Scavenge()", 0x100001230, None),
                FuncInfo::new("_main", 0x100001400, None),
            ]
        );
    }

    #[test]
    fn test_unknown_sizes_span_to_next_symbol() {
        let symbols = parse_nm_output("0000000000001000 t a\n0000000000001040 t b\n").unwrap();
        let resolved = crate::symbols::resolve_symbols(symbols, 0x1000, 0x2000, 0);
        let ranges: Vec<(u64, u64)> = resolved.iter().map(|s| (s.start, s.end)).collect();
        assert_eq!(ranges, vec![(0x1000, 0x1040), (0x1040, 0x2000)]);
    }
}
