//! Code entries stored in the code map
//!
//! Every piece of code the log mentions (C++ symbols, shared libraries, JIT
//! code and the shared function infos JIT code is compiled from) becomes a
//! [`CodeEntry`] in the map's arena. Entries are referenced by [`EntryId`];
//! the start address is the key under which the id is stored in a tree.

use std::collections::BTreeSet;
use thiserror::Error;

/// Stable index of an entry in the code map arena
pub type EntryId = usize;

/// Raised for an optimization-state marker the profiler does not know
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown code state: {0:?}")]
pub struct UnknownCodeState(pub String);

/// Optimization tier of a compiled function
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CodeState {
    #[default]
    Compiled,
    Ignition,
    Baseline,
    NativeContextIndependent,
    Turboprop,
    Turbofan,
}

impl CodeState {
    /// Parse the state marker written after the SFI address in
    /// `code-creation` records
    pub fn parse(marker: &str) -> Result<Self, UnknownCodeState> {
        match marker {
            "" => Ok(Self::Compiled),
            "~" => Ok(Self::Ignition),
            "^" => Ok(Self::Baseline),
            "-" => Ok(Self::NativeContextIndependent),
            "+" => Ok(Self::Turboprop),
            "*" => Ok(Self::Turbofan),
            other => Err(UnknownCodeState(other.to_string())),
        }
    }

    /// Marker prepended to function names in reports
    pub fn prefix(self) -> &'static str {
        match self {
            Self::Compiled => "",
            Self::Ignition => "~",
            Self::Baseline => "^",
            Self::NativeContextIndependent => "-",
            Self::Turboprop => "+",
            Self::Turbofan => "*",
        }
    }

    /// Human readable tier label
    pub fn kind_name(self) -> &'static str {
        match self {
            Self::Compiled => "Builtin",
            Self::Ignition => "Unopt",
            Self::Baseline => "Baseline",
            Self::NativeContextIndependent => "NCI",
            Self::Turboprop => "Turboprop",
            Self::Turbofan => "Opt",
        }
    }
}

/// Source position data attached by `code-source-info` records
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SourceInfo {
    pub script: i64,
    pub start: i64,
    pub end: i64,
    /// Encoded source position table, kept verbatim
    pub positions: String,
    /// Encoded inlining positions, kept verbatim
    pub inlined: String,
    /// SFIs of inlined functions; `None` where the SFI was unknown
    pub inlined_functions: Vec<Option<EntryId>>,
}

/// What kind of code an entry describes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodeKind {
    /// Statically compiled C++ symbol
    Cpp,
    /// A whole shared library
    SharedLib,
    /// Dynamic code not tied to a function (stubs, builtins, regexps)
    Code { code_type: String },
    /// Dynamic code compiled for a shared function info
    FuncCode {
        code_type: String,
        sfi: EntryId,
        state: CodeState,
    },
    /// Shared function info: the logical function behind compiled code
    Sfi {
        function_name: String,
        code: BTreeSet<EntryId>,
    },
}

/// One entry of the code map
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeEntry {
    pub size: u64,
    pub name: String,
    pub kind: CodeKind,
    pub source: Option<SourceInfo>,
    /// Set once the dynamic name has been deduplicated
    pub(crate) name_updated: bool,
}

impl CodeEntry {
    fn with_kind(size: u64, name: impl Into<String>, kind: CodeKind) -> Self {
        Self {
            size,
            name: name.into(),
            kind,
            source: None,
            name_updated: false,
        }
    }

    pub fn cpp(size: u64, name: impl Into<String>) -> Self {
        Self::with_kind(size, name, CodeKind::Cpp)
    }

    pub fn shared_lib(size: u64, name: impl Into<String>) -> Self {
        Self::with_kind(size, name, CodeKind::SharedLib)
    }

    pub fn code(size: u64, code_type: impl Into<String>, name: impl Into<String>) -> Self {
        Self::with_kind(
            size,
            name,
            CodeKind::Code {
                code_type: code_type.into(),
            },
        )
    }

    pub fn func_code(
        size: u64,
        code_type: impl Into<String>,
        sfi: EntryId,
        state: CodeState,
    ) -> Self {
        Self::with_kind(
            size,
            "",
            CodeKind::FuncCode {
                code_type: code_type.into(),
                sfi,
                state,
            },
        )
    }

    /// SFI entries occupy no code bytes
    pub fn sfi(name: impl Into<String>) -> Self {
        let name = name.into();
        let function_name = function_name_of(&name);
        Self::with_kind(
            0,
            name,
            CodeKind::Sfi {
                function_name,
                code: BTreeSet::new(),
            },
        )
    }

    /// Rename the entry; SFIs also recompute their function name
    pub fn rename(&mut self, name: &str) {
        if let CodeKind::Sfi { function_name, .. } = &mut self.kind {
            *function_name = function_name_of(name);
        }
        self.name = name.to_string();
    }

    /// Type tag as it appears in serialized symbol dumps
    pub fn type_name(&self) -> &str {
        match &self.kind {
            CodeKind::Cpp => "CPP",
            CodeKind::SharedLib => "SHARED_LIB",
            CodeKind::Code { code_type } | CodeKind::FuncCode { code_type, .. } => code_type,
            CodeKind::Sfi { .. } => "SFI",
        }
    }

    pub fn is_cpp(&self) -> bool {
        matches!(self.kind, CodeKind::Cpp)
    }

    pub fn is_shared_lib(&self) -> bool {
        matches!(self.kind, CodeKind::SharedLib)
    }

    /// C++ or shared library code
    pub fn is_native(&self) -> bool {
        self.is_cpp() || self.is_shared_lib()
    }

    pub fn is_js_function(&self) -> bool {
        matches!(self.kind, CodeKind::FuncCode { .. })
    }

    pub fn is_sfi(&self) -> bool {
        matches!(self.kind, CodeKind::Sfi { .. })
    }

    /// End address when stored at `start`
    pub fn end(&self, start: u64) -> u64 {
        start.saturating_add(self.size)
    }
}

/// Display form of an SFI name. Anonymous functions are logged either with
/// an empty name or with just their location (" file.js:10").
pub fn sfi_display_name(name: &str) -> String {
    if name.is_empty() {
        "<anonymous>".to_string()
    } else if name.starts_with(' ') {
        format!("<anonymous>{name}")
    } else {
        name.to_string()
    }
}

fn function_name_of(name: &str) -> String {
    match name.rfind(' ') {
        Some(index) if index >= 1 => name[..index].to_string(),
        _ => "<anonymous>".to_string(),
    }
}
