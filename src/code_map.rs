//! Address-interval map from code ranges to code entries
//!
//! Three independent collections are kept, each a splay tree keyed by start
//! address: dynamic (JIT) code, static C++ symbols and shared libraries.
//! Within a collection no two entries overlap. Pages holding library code are
//! remembered so that lookups can decide which collections to search.

use crate::code_entry::{sfi_display_name, CodeEntry, CodeKind, EntryId};
use crate::splay_tree::SplayTree;
use fnv::{FnvHashMap, FnvHashSet};
use thiserror::Error;

/// log2 of the page size used for the static page set
pub const PAGE_ALIGNMENT: u32 = 12;

/// Page size in bytes
pub const PAGE_SIZE: u64 = 1 << PAGE_ALIGNMENT;

/// Errors reported by code map mutations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodeMapError {
    #[error("code move from unknown address 0x{0:x}")]
    UnknownSource(u64),

    #[error("code delete at unknown address 0x{0:x}")]
    UnknownAddress(u64),
}

/// Result type for code map operations
pub type Result<T> = std::result::Result<T, CodeMapError>;

/// Outcome of an address lookup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolved {
    pub entry: EntryId,
    /// Distance of the address from the entry start
    pub offset: u64,
}

type Tree = SplayTree<u64, EntryId>;

/// Interval map owning every code entry seen in a log
#[derive(Debug, Default)]
pub struct CodeMap {
    entries: Vec<CodeEntry>,
    dynamics: Tree,
    statics: Tree,
    libraries: Tree,
    pages: FnvHashSet<u64>,
    name_counts: FnvHashMap<String, u32>,
}

impl CodeMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Entry stored under `id`. Ids handed out by this map are always valid;
    /// entries removed from the trees stay in the arena.
    pub fn entry(&self, id: EntryId) -> &CodeEntry {
        &self.entries[id]
    }

    pub fn entry_mut(&mut self, id: EntryId) -> &mut CodeEntry {
        &mut self.entries[id]
    }

    /// Entries are never freed or reused. Recorded samples hold `EntryId`s
    /// into this arena, so the arena grows with the number of code events
    /// in the log rather than with the amount of live code.
    fn alloc(&mut self, entry: CodeEntry) -> EntryId {
        self.entries.push(entry);
        self.entries.len() - 1
    }

    /// Register a shared library and mark every page it spans
    pub fn add_library(&mut self, start: u64, entry: CodeEntry) -> EntryId {
        self.mark_pages(start, entry.end(start));
        let id = self.alloc(entry);
        self.libraries.insert(start, id);
        id
    }

    /// Register a static C++ symbol
    pub fn add_static_code(&mut self, start: u64, entry: CodeEntry) -> EntryId {
        let id = self.alloc(entry);
        self.statics.insert(start, id);
        id
    }

    /// Register code that may replace a provisional static entry.
    ///
    /// Builtins are often known from the binary's symbol table before their
    /// `code-creation` event arrives. When `start` lies inside such a static
    /// entry the static collection is updated in place; otherwise the code is
    /// treated as dynamic.
    pub fn add_any_code(&mut self, start: u64, entry: CodeEntry) -> EntryId {
        if !self.pages.contains(&(start >> PAGE_ALIGNMENT)) {
            return self.add_dynamic_code(start, entry);
        }
        let Some((key, existing)) = Self::find_in_tree(&mut self.statics, &self.entries, start)
        else {
            return self.add_dynamic_code(start, entry);
        };

        if key == start {
            let old_size = self.entries[existing].size;
            let _ = self.statics.remove(start);
            Self::delete_all_covered(
                &mut self.statics,
                &self.entries,
                start,
                start.saturating_add(old_size),
            );
        } else {
            let end = start.saturating_add(entry.size.max(1));
            Self::delete_all_covered(&mut self.statics, &self.entries, start, end);
        }

        let id = self.alloc(entry);
        self.statics.insert(start, id);
        id
    }

    /// Register JIT code, dropping whatever dynamic code it overlaps
    pub fn add_dynamic_code(&mut self, start: u64, entry: CodeEntry) -> EntryId {
        let end = entry.end(start);
        Self::delete_all_covered(&mut self.dynamics, &self.entries, start, end);
        let id = self.alloc(entry);
        self.dynamics.insert(start, id);
        id
    }

    /// Move dynamic code from `from` to `to`
    pub fn move_code(&mut self, from: u64, to: u64) -> Result<()> {
        let id = self
            .dynamics
            .remove(from)
            .map_err(|_| CodeMapError::UnknownSource(from))?;
        let end = self.entries[id].end(to);
        Self::delete_all_covered(&mut self.dynamics, &self.entries, to, end);
        self.dynamics.insert(to, id);
        Ok(())
    }

    /// Remove the dynamic code starting at `start`
    pub fn delete_code(&mut self, start: u64) -> Result<EntryId> {
        self.dynamics
            .remove(start)
            .map_err(|_| CodeMapError::UnknownAddress(start))
    }

    /// Resolve an address to the entry covering it.
    ///
    /// Addresses on library pages are looked up among static symbols first
    /// and then among libraries, so holes between symbols are attributed to
    /// the library itself. Other addresses are looked up among dynamic code.
    pub fn find_address(&mut self, addr: u64) -> Option<Resolved> {
        if self.pages.contains(&(addr >> PAGE_ALIGNMENT)) {
            let found = match Self::find_in_tree(&mut self.statics, &self.entries, addr) {
                Some(found) => found,
                None => Self::find_in_tree(&mut self.libraries, &self.entries, addr)?,
            };
            return Some(Resolved {
                entry: found.1,
                offset: addr - found.0,
            });
        }

        let (max_key, max_id) = self.dynamics.find_max().map(|(k, &v)| (k, v))?;
        let (min_key, _) = self.dynamics.find_min()?;
        if addr < min_key || addr >= self.entries[max_id].end(max_key) {
            return None;
        }

        let (key, id) = Self::find_in_tree(&mut self.dynamics, &self.entries, addr)?;
        self.dedupe_name(id);
        Some(Resolved {
            entry: id,
            offset: addr - key,
        })
    }

    /// Entry covering `addr`, if any
    pub fn find_entry(&mut self, addr: u64) -> Option<EntryId> {
        self.find_address(addr).map(|r| r.entry)
    }

    /// Dynamic entry starting exactly at `addr`
    pub fn find_dynamic_entry_by_start_address(&mut self, addr: u64) -> Option<EntryId> {
        self.dynamics.find(addr).copied()
    }

    pub fn dynamic_entries_with_addresses(&self) -> Vec<(u64, EntryId)> {
        Self::export(&self.dynamics)
    }

    pub fn static_entries_with_addresses(&self) -> Vec<(u64, EntryId)> {
        Self::export(&self.statics)
    }

    pub fn library_entries_with_addresses(&self) -> Vec<(u64, EntryId)> {
        Self::export(&self.libraries)
    }

    pub fn dynamic_entries(&self) -> Vec<EntryId> {
        self.dynamics.export_values().into_iter().copied().collect()
    }

    /// Name used for call tree labels
    pub fn display_name(&self, id: EntryId) -> String {
        let entry = &self.entries[id];
        match &entry.kind {
            CodeKind::Cpp | CodeKind::SharedLib => entry.name.clone(),
            CodeKind::Code { code_type } => format!("{code_type}: {}", entry.name),
            CodeKind::FuncCode {
                code_type,
                sfi,
                state,
            } => format!(
                "{code_type}: {}{}",
                state.prefix(),
                sfi_display_name(&self.entries[*sfi].name)
            ),
            CodeKind::Sfi { .. } => sfi_display_name(&entry.name),
        }
    }

    /// Name without the code type decoration
    pub fn raw_name(&self, id: EntryId) -> String {
        let entry = &self.entries[id];
        match &entry.kind {
            CodeKind::FuncCode { sfi, .. } => sfi_display_name(&self.entries[*sfi].name),
            CodeKind::Sfi { .. } => sfi_display_name(&entry.name),
            _ => entry.name.clone(),
        }
    }

    fn export(tree: &Tree) -> Vec<(u64, EntryId)> {
        tree.export_keys_and_values()
            .into_iter()
            .map(|(k, &v)| (k, v))
            .collect()
    }

    fn mark_pages(&mut self, start: u64, end: u64) {
        let first = start >> PAGE_ALIGNMENT;
        let last = end >> PAGE_ALIGNMENT;
        self.pages.extend(first..=last);
    }

    /// First resolution of plain dynamic code gives repeated names a
    /// `{n}` suffix so distinct code objects stay distinct in reports.
    fn dedupe_name(&mut self, id: EntryId) {
        let entry = &mut self.entries[id];
        if entry.name_updated {
            return;
        }
        entry.name_updated = true;
        if !matches!(entry.kind, CodeKind::Code { .. }) {
            return;
        }
        let count = self.name_counts.entry(entry.name.clone()).or_insert(0);
        *count += 1;
        if *count > 1 {
            entry.name = format!("{} {{{}}}", entry.name, count);
        }
    }

    fn find_in_tree(tree: &mut Tree, entries: &[CodeEntry], addr: u64) -> Option<(u64, EntryId)> {
        let (key, &id) = tree.find_greatest_less_than(addr)?;
        (addr - key < entries[id].size).then_some((key, id))
    }

    /// Remove every entry whose range intersects `[start, end)`
    fn delete_all_covered(tree: &mut Tree, entries: &[CodeEntry], start: u64, end: u64) {
        if end <= start {
            return;
        }
        let mut doomed = Vec::new();
        let mut addr = end - 1;
        while let Some((key, &id)) = tree.find_greatest_less_than(addr) {
            if key < end && start < entries[id].end(key) {
                doomed.push(key);
            }
            if key <= start {
                break;
            }
            addr = key - 1;
        }
        for key in doomed {
            let _ = tree.remove(key);
        }
    }
}
