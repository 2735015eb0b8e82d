//! PE symbols read from linker `.map` files
//!
//! The map file sits next to the binary (`d8.exe` -> `d8.map`). Public
//! symbols of the code section look like
//!
//! ```text
//!  0001:00000000       ?Foo@Bar@v8@@QAEXXZ        00401000 f   d8.obj
//! ```
//!
//! where the third column is the load address.

use super::{FuncInfo, Result, SymbolError, SymbolTableProvider};
use regex::Regex;

const FILENAME_PATTERN: &str = r"^(.*)\.([^.]+)$";
const FUNC_PATTERN: &str = r"^\s+0001:[0-9a-fA-F]{8}\s+([_?@$0-9a-zA-Z]+)\s+([0-9a-fA-F]{8}).*$";
const IMAGE_BASE_PATTERN: &str = r"^\s+0000:00000000\s+___ImageBase\s+([0-9a-fA-F]{8}).*$";

/// Preferred load address of executables
pub const EXE_IMAGE_BASE: u64 = 0x0040_0000;

/// Symbol provider for Windows binaries
#[derive(Debug, Clone)]
pub struct WindowsSymbolProvider {
    target_root_fs: String,
}

impl WindowsSymbolProvider {
    pub fn new(target_root_fs: &str) -> Self {
        Self {
            target_root_fs: target_root_fs.to_string(),
        }
    }
}

impl SymbolTableProvider for WindowsSymbolProvider {
    fn load_symbols(&mut self, lib_name: &str) -> Result<Vec<FuncInfo>> {
        let path = format!("{}{}", self.target_root_fs, lib_name);
        let (map_file, module_type) = map_file_for(&path)?;
        let text = std::fs::read_to_string(&map_file).map_err(|source| SymbolError::Read {
            path: map_file.clone(),
            source,
        })?;
        parse_map_file(&text, &module_type)
    }
}

/// Map file path and lowercased extension for a binary path
pub fn map_file_for(path: &str) -> Result<(String, String)> {
    let re = Regex::new(FILENAME_PATTERN)?;
    let caps = re
        .captures(path)
        .ok_or_else(|| SymbolError::MapFileName(path.to_string()))?;
    Ok((format!("{}.map", &caps[1]), caps[2].to_lowercase()))
}

/// Parse a linker map file.
///
/// Parsing stops at an `___ImageBase` line that contradicts the module type:
/// executables load at [`EXE_IMAGE_BASE`], libraries anywhere else.
pub fn parse_map_file(text: &str, module_type: &str) -> Result<Vec<FuncInfo>> {
    let func_re = Regex::new(FUNC_PATTERN)?;
    let image_base_re = Regex::new(IMAGE_BASE_PATTERN)?;
    let is_exe = module_type == "exe";

    let mut symbols = Vec::new();
    for line in text.lines() {
        if let Some(caps) = image_base_re.captures(line) {
            let image_base = u64::from_str_radix(&caps[1], 16).unwrap_or_default();
            if is_exe != (image_base == EXE_IMAGE_BASE) {
                break;
            }
        }
        let Some(caps) = func_re.captures(line) else {
            continue;
        };
        if let Ok(start) = u64::from_str_radix(&caps[2], 16) {
            symbols.push(FuncInfo::new(unmangle_name(&caps[1]), start, None));
        }
    }
    Ok(symbols)
}

/// Minimal MSVC unmangling: `?Name@Class@ns@@...` becomes `ns::Class::Name`.
/// Argument and template information is dropped.
pub fn unmangle_name(name: &str) -> String {
    let Some(mangled) = name.strip_prefix('?') else {
        return name.to_string();
    };
    let qualified = mangled.find("@@").map_or(mangled, |end| &mangled[..end]);
    let mut components: Vec<&str> = qualified.split('@').collect();
    components.reverse();
    components.join("::")
}
