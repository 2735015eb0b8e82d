//! ELF symbols read with `nm` and `objdump`

use super::{run_tool, FuncInfo, Result, SymbolTableProvider};
use regex::Regex;
use tracing::{debug, warn};

/// `nm -C -n -S` line: address, optional size, text/weak type, name
const FUNC_PATTERN: &str = r"^([0-9a-fA-F]{8,16}) ([0-9a-fA-F]{8,16} )?[tTwW] (.*)$";

/// Symbol provider for Linux and Android binaries
#[derive(Debug, Clone)]
pub struct LinuxSymbolProvider {
    nm: String,
    objdump: String,
    target_root_fs: String,
    apk_embedded_library: String,
}

impl LinuxSymbolProvider {
    pub fn new(nm: &str, objdump: &str, target_root_fs: &str, apk_embedded_library: &str) -> Self {
        Self {
            nm: nm.to_string(),
            objdump: objdump.to_string(),
            target_root_fs: target_root_fs.to_string(),
            apk_embedded_library: apk_embedded_library.to_string(),
        }
    }

    /// Path of the binary to inspect for a library named in the log.
    ///
    /// Libraries loaded straight from an APK are replaced by the configured
    /// embedded library; with a target root only the file name is kept and
    /// looked up under that root.
    pub fn library_path(&self, lib_name: &str) -> String {
        let mut name = lib_name;
        if !self.apk_embedded_library.is_empty() && name.ends_with(".apk") {
            name = &self.apk_embedded_library;
        }
        if self.target_root_fs.is_empty() {
            return name.to_string();
        }
        let base = name.rsplit('/').next().unwrap_or(name);
        format!("{}{}", self.target_root_fs, base)
    }
}

impl SymbolTableProvider for LinuxSymbolProvider {
    fn load_symbols(&mut self, lib_name: &str) -> Result<Vec<FuncInfo>> {
        let path = self.library_path(lib_name);

        let file_offset_minus_vma = match run_tool(&self.objdump, &["-h", &path]) {
            Ok(headers) => text_file_offset_minus_vma(&headers).unwrap_or(0),
            Err(err) => {
                warn!("cannot read section headers of {path}: {err}");
                0
            }
        };

        let static_symbols = run_tool(&self.nm, &["-C", "-n", "-S", &path])?;
        let dynamic_symbols = run_tool(&self.nm, &["-C", "-n", "-S", "-D", &path])
            .unwrap_or_else(|err| {
                debug!("no dynamic symbols in {path}: {err}");
                String::new()
            });

        let mut symbols = parse_nm_output(&static_symbols, file_offset_minus_vma)?;
        symbols.extend(parse_nm_output(&dynamic_symbols, file_offset_minus_vma)?);
        Ok(symbols)
    }
}

/// Parse `nm -C -n -S` output, keeping text and weak symbols.
///
/// `file_offset_minus_vma` is added to every address so that symbols are
/// expressed as file offsets when the `.text` section is not mapped at its
/// file offset.
pub fn parse_nm_output(output: &str, file_offset_minus_vma: i64) -> Result<Vec<FuncInfo>> {
    let re = Regex::new(FUNC_PATTERN)?;
    let symbols = output
        .lines()
        .filter_map(|line| {
            let caps = re.captures(line)?;
            let address = u64::from_str_radix(&caps[1], 16).ok()?;
            let start =
                u64::try_from(i128::from(address) + i128::from(file_offset_minus_vma)).ok()?;
            let size = caps
                .get(2)
                .and_then(|m| u64::from_str_radix(m.as_str().trim_end(), 16).ok());
            Some(FuncInfo::new(&caps[3], start, size))
        })
        .collect();
    Ok(symbols)
}

/// File offset minus virtual address of the `.text` section in
/// `objdump -h` output
pub fn text_file_offset_minus_vma(headers: &str) -> Option<i64> {
    let mut result = None;
    for line in headers.lines() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.get(1) != Some(&".text") {
            continue;
        }
        let (Some(vma), Some(file_offset)) = (fields.get(3), fields.get(5)) else {
            continue;
        };
        let (Ok(vma), Ok(file_offset)) = (
            i64::from_str_radix(vma, 16),
            i64::from_str_radix(file_offset, 16),
        ) else {
            continue;
        };
        result = Some(file_offset - vma);
    }
    result
}
