//! Profile: code registry and call-tree aggregation
//!
//! Owns the [`CodeMap`] and folds every resolved stack sample into a
//! top-down and a bottom-up [`CallTree`]. Lookups that miss the code map are
//! reported to an [`UnknownCodeHandler`] supplied by the caller.

use crate::call_tree::{CallTree, Visit, ROOT, ROOT_LABEL};
use crate::code_entry::{CodeEntry, CodeKind, CodeState, EntryId, SourceInfo};
use crate::code_map::CodeMap;
use crate::log_reader::parse_int;
use fnv::{FnvHashMap, FnvHashSet};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use thiserror::Error;
use tracing::warn;

/// Name recorded for a sampled PC that resolves to no code
pub const UNKNOWN: &str = "UNKNOWN";

/// Label of the aggregate row of the C++ entry profile
pub const C_ENTRY_TOTAL: &str = "TOTAL";

const IC_PATTERN: &str =
    r"^(LoadGlobalIC: )|(Handler: )|(?:CallIC|LoadIC|StoreIC)|(?:Builtin: (?:Keyed)?(?:Load|Store)IC_)";
const BYTECODES_PATTERN: &str = r"^(BytecodeHandler: )";
const BUILTINS_PATTERN: &str = r"^(Builtin: )";
const STUBS_PATTERN: &str = r"^(Stub: )";

/// Errors raised while setting up a profile
#[derive(Error, Debug)]
pub enum ProfileError {
    #[error("invalid skip pattern: {0}")]
    Pattern(#[from] regex::Error),
}

/// Result type for profile construction
pub type Result<T> = std::result::Result<T, ProfileError>;

/// Operations that look up existing code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Move,
    Delete,
    Tick,
}

/// Receives lookups that found no code entry
pub trait UnknownCodeHandler {
    /// `stack_pos` is the frame index for [`Operation::Tick`]
    fn handle_unknown_code(&mut self, operation: Operation, addr: u64, stack_pos: Option<usize>);
}

impl UnknownCodeHandler for () {
    fn handle_unknown_code(&mut self, _: Operation, _: u64, _: Option<usize>) {}
}

/// Which categories of VM-generated code keep their own call tree nodes.
/// Categories that are not separated are dropped from sampled stacks, so
/// their ticks are attributed to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeparateEntries {
    pub ic: bool,
    pub bytecodes: bool,
    pub builtins: bool,
    pub stubs: bool,
    pub sparkplug_handlers: bool,
}

impl Default for SeparateEntries {
    fn default() -> Self {
        Self {
            ic: true,
            bytecodes: false,
            builtins: true,
            stubs: true,
            sparkplug_handlers: false,
        }
    }
}

/// Predicate deciding which frame names are left out of call trees
#[derive(Debug, Clone)]
pub struct SkipFilter {
    skip: Vec<Regex>,
}

impl SkipFilter {
    pub fn new(separate: &SeparateEntries) -> Result<Self> {
        let mut skip = Vec::new();
        if !separate.ic {
            skip.push(Regex::new(IC_PATTERN)?);
        }
        if !separate.bytecodes {
            skip.push(Regex::new(BYTECODES_PATTERN)?);
        }
        if !separate.builtins {
            skip.push(Regex::new(BUILTINS_PATTERN)?);
        }
        if !separate.stubs {
            skip.push(Regex::new(STUBS_PATTERN)?);
        }
        Ok(Self { skip })
    }

    pub fn should_skip(&self, name: &str) -> bool {
        self.skip.iter().any(|re| re.is_match(name))
    }
}

/// One frame of a resolved stack
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Frame {
    Entry(EntryId),
    Unknown(u64),
}

/// A resolved stack sample, innermost frame first
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackSample {
    pub time: i64,
    pub vm_state: i64,
    /// Every frame, resolved or not
    pub entry_stack: Vec<Frame>,
    /// Names folded into the call trees
    pub name_stack: Vec<String>,
}

/// Row of the C++ entry point profile
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CEntryNode {
    pub name: String,
    pub ticks: u64,
}

/// Script registered by `script-source` or referenced by source positions
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Script {
    pub id: i64,
    pub name: String,
    pub source: String,
}

/// Static symbol or library as written by `--serialize-vm-symbols`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VmSymbol {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub start: u64,
    pub end: u64,
}

/// Code registry plus top-down and bottom-up call trees
#[derive(Debug)]
pub struct Profile {
    code_map: CodeMap,
    top_down: CallTree,
    bottom_up: CallTree,
    c_entries: FnvHashMap<String, u64>,
    skip: SkipFilter,
    scripts: FnvHashMap<i64, Script>,
    url_to_script: FnvHashMap<String, i64>,
}

impl Profile {
    pub fn new(separate: &SeparateEntries) -> Result<Self> {
        Ok(Self {
            code_map: CodeMap::new(),
            top_down: CallTree::new(),
            bottom_up: CallTree::new(),
            c_entries: FnvHashMap::default(),
            skip: SkipFilter::new(separate)?,
            scripts: FnvHashMap::default(),
            url_to_script: FnvHashMap::default(),
        })
    }

    pub fn code_map(&self) -> &CodeMap {
        &self.code_map
    }

    pub fn code_map_mut(&mut self) -> &mut CodeMap {
        &mut self.code_map
    }

    /// Register a shared library spanning `[start, end)`
    pub fn add_library(&mut self, name: &str, start: u64, end: u64) -> EntryId {
        let entry = CodeEntry::shared_lib(end.saturating_sub(start), name);
        self.code_map.add_library(start, entry)
    }

    /// Register a C++ symbol spanning `[start, end)`
    pub fn add_static_code(&mut self, name: &str, start: u64, end: u64) -> EntryId {
        let entry = CodeEntry::cpp(end.saturating_sub(start), name);
        self.code_map.add_static_code(start, entry)
    }

    /// Register generated code that belongs to no function
    pub fn add_code(&mut self, code_type: &str, name: &str, start: u64, size: u64) -> EntryId {
        self.code_map
            .add_any_code(start, CodeEntry::code(size, code_type, name))
    }

    /// Register code compiled for the function whose SFI lives at `sfi_addr`.
    ///
    /// Code and SFIs share one address space, so both go into the dynamic
    /// collection. Re-logging the same code object only updates its state.
    pub fn add_func_code(
        &mut self,
        code_type: &str,
        name: &str,
        start: u64,
        size: u64,
        sfi_addr: u64,
        state: CodeState,
    ) -> EntryId {
        let sfi = match self.find_sfi(sfi_addr) {
            Some(id) => {
                let entry = self.code_map.entry_mut(id);
                if entry.name != name {
                    // The SFI object was overwritten by a new one.
                    entry.rename(name);
                }
                id
            }
            None => self
                .code_map
                .add_dynamic_code(sfi_addr, CodeEntry::sfi(name)),
        };

        if let Some(existing) = self.code_map.find_dynamic_entry_by_start_address(start) {
            let entry = self.code_map.entry_mut(existing);
            let same_size = entry.size == size;
            let reused = match &mut entry.kind {
                CodeKind::FuncCode {
                    sfi: owner,
                    state: current,
                    ..
                } if same_size && *owner == sfi => {
                    *current = state;
                    true
                }
                _ => false,
            };
            if reused {
                return existing;
            }
            if let CodeKind::FuncCode { sfi: owner, .. } = self.code_map.entry(existing).kind {
                if let CodeKind::Sfi { code, .. } = &mut self.code_map.entry_mut(owner).kind {
                    code.remove(&existing);
                }
            }
            let _ = self.code_map.delete_code(start);
        }

        let id = self
            .code_map
            .add_dynamic_code(start, CodeEntry::func_code(size, code_type, sfi, state));
        if let CodeKind::Sfi { code, .. } = &mut self.code_map.entry_mut(sfi).kind {
            code.insert(id);
        }
        id
    }

    fn find_sfi(&mut self, addr: u64) -> Option<EntryId> {
        let id = self.code_map.find_dynamic_entry_by_start_address(addr)?;
        self.code_map.entry(id).is_sfi().then_some(id)
    }

    pub fn move_code(&mut self, from: u64, to: u64, handler: &mut dyn UnknownCodeHandler) {
        if self.code_map.move_code(from, to).is_err() {
            handler.handle_unknown_code(Operation::Move, from, None);
        }
    }

    pub fn delete_code(&mut self, start: u64, handler: &mut dyn UnknownCodeHandler) {
        if self.code_map.delete_code(start).is_err() {
            handler.handle_unknown_code(Operation::Delete, start, None);
        }
    }

    /// Move an SFI; moves of SFIs never seen before are ignored
    pub fn move_shared_function_info(&mut self, from: u64, to: u64) {
        if self
            .code_map
            .find_dynamic_entry_by_start_address(from)
            .is_some()
        {
            let _ = self.code_map.move_code(from, to);
        }
    }

    pub fn find_entry(&mut self, addr: u64) -> Option<EntryId> {
        self.code_map.find_entry(addr)
    }

    /// Attach source positions to the dynamic code starting at `start`.
    ///
    /// `inlined_functions` lists SFI addresses as `S<addr>S<addr>...`.
    #[allow(clippy::too_many_arguments)]
    pub fn add_source_positions(
        &mut self,
        start: u64,
        script: i64,
        start_pos: i64,
        end_pos: i64,
        positions: &str,
        inlined: &str,
        inlined_functions: &str,
    ) {
        self.scripts.entry(script).or_insert_with(|| Script {
            id: script,
            ..Script::default()
        });
        let Some(id) = self.code_map.find_dynamic_entry_by_start_address(start) else {
            return;
        };

        let mut functions = Vec::new();
        if let Some(list) = inlined_functions.get(1..).filter(|s| !s.is_empty()) {
            for raw in list.split('S') {
                let sfi = parse_int(raw)
                    .ok()
                    .and_then(|addr| u64::try_from(addr).ok())
                    .and_then(|addr| self.find_sfi(addr));
                if sfi.is_none() {
                    warn!("could not find inlined function {raw}");
                }
                functions.push(sfi);
            }
        }

        self.code_map.entry_mut(id).source = Some(SourceInfo {
            script,
            start: start_pos,
            end: end_pos,
            positions: positions.to_string(),
            inlined: inlined.to_string(),
            inlined_functions: functions,
        });
    }

    pub fn add_script_source(&mut self, id: i64, url: &str, source: &str) {
        let script = self.scripts.entry(id).or_insert_with(|| Script {
            id,
            ..Script::default()
        });
        script.name = url.to_string();
        script.source = source.to_string();
        self.url_to_script.insert(url.to_string(), id);
    }

    /// Script registered under `url`
    pub fn script(&self, url: &str) -> Option<&Script> {
        self.url_to_script
            .get(url)
            .and_then(|id| self.scripts.get(id))
    }

    pub fn script_by_id(&self, id: i64) -> Option<&Script> {
        self.scripts.get(&id)
    }

    /// Source text covered by an entry. SFIs use their first compiled code.
    pub fn source_code(&self, id: EntryId) -> Option<&str> {
        let entry = self.code_map.entry(id);
        let info = match &entry.kind {
            CodeKind::Sfi { code, .. } => code
                .iter()
                .find_map(|&c| self.code_map.entry(c).source.as_ref())?,
            _ => entry.source.as_ref()?,
        };
        let script = self.scripts.get(&info.script)?;
        let start = usize::try_from(info.start).ok()?;
        let end = usize::try_from(info.end).ok()?;
        script.source.get(start..end)
    }

    /// Resolve `stack` (PC first) and add it to both call trees
    pub fn record_tick(
        &mut self,
        time: i64,
        vm_state: i64,
        stack: &[u64],
        handler: &mut dyn UnknownCodeHandler,
    ) -> StackSample {
        let (entry_stack, name_stack) = self.resolve_and_filter(stack, handler);
        self.bottom_up.add_path(&name_stack);
        let reversed: Vec<&String> = name_stack.iter().rev().collect();
        self.top_down.add_path(&reversed);
        StackSample {
            time,
            vm_state,
            entry_stack,
            name_stack,
        }
    }

    fn resolve_and_filter(
        &mut self,
        stack: &[u64],
        handler: &mut dyn UnknownCodeHandler,
    ) -> (Vec<Frame>, Vec<String>) {
        let mut frames = Vec::with_capacity(stack.len());
        let mut names = Vec::with_capacity(stack.len());
        let mut last_seen_c_function: Option<String> = None;
        let mut look_for_first_c_function = false;

        for (i, &addr) in stack.iter().enumerate() {
            let found = self.code_map.find_entry(addr);
            let mut is_cpp = false;
            match found {
                Some(id) => {
                    let name = self.code_map.display_name(id);
                    let entry = self.code_map.entry(id);
                    is_cpp = entry.is_cpp();
                    if i == 0 && entry.is_native() {
                        look_for_first_c_function = true;
                    }
                    if look_for_first_c_function && is_cpp {
                        last_seen_c_function = Some(name.clone());
                    }
                    if !self.skip.should_skip(&name) {
                        names.push(name);
                    }
                    frames.push(Frame::Entry(id));
                }
                None => {
                    handler.handle_unknown_code(Operation::Tick, addr, Some(i));
                    if i == 0 {
                        names.push(UNKNOWN.to_string());
                    }
                    frames.push(Frame::Unknown(addr));
                }
            }

            if look_for_first_c_function && i > 0 && !is_cpp {
                if let Some(c_function) = &last_seen_c_function {
                    *self.c_entries.entry(c_function.clone()).or_insert(0) += 1;
                    look_for_first_c_function = false;
                }
            }
        }
        (frames, names)
    }

    /// Top-down tree, or the merged subtree of every node labelled `label`
    pub fn top_down_profile(&mut self, label: Option<&str>) -> Cow<'_, CallTree> {
        Self::tree_profile(&mut self.top_down, label)
    }

    /// Bottom-up tree, or the merged subtree of every node labelled `label`
    pub fn bottom_up_profile(&mut self, label: Option<&str>) -> Cow<'_, CallTree> {
        Self::tree_profile(&mut self.bottom_up, label)
    }

    fn tree_profile<'a>(tree: &'a mut CallTree, label: Option<&str>) -> Cow<'a, CallTree> {
        match label {
            None => {
                tree.compute_total_weights();
                Cow::Borrowed(tree)
            }
            Some(label) => {
                let mut subtree = tree.clone_subtree(label);
                subtree.compute_total_weights();
                Cow::Owned(subtree)
            }
        }
    }

    /// Self and total weights per label regardless of call path.
    ///
    /// Without a label the result's root children are every function in the
    /// profile. With a label only callees of that label are counted, under a
    /// single `label` child of the root. A function's total is counted only
    /// at its outermost occurrence on a path, so recursion is not double
    /// counted.
    pub fn flat_profile(&mut self, label: Option<&str>) -> CallTree {
        let root_label = label.unwrap_or(ROOT_LABEL);
        let mut counters = CallTree::new();
        let root = match label {
            Some(label) => counters.find_or_add_child(ROOT, label),
            None => ROOT,
        };
        let mut precs: FnvHashMap<String, u32> = FnvHashMap::default();
        precs.insert(root_label.to_string(), 0);

        self.top_down.compute_total_weights();
        self.top_down.traverse_in_depth(|node, visit| {
            let is_root_label = node.label == root_label;
            let root_prec = precs.get(root_label).copied().unwrap_or(0);
            match visit {
                Visit::Enter => {
                    if !(is_root_label || root_prec > 0) {
                        return;
                    }
                    if root_prec == 0 {
                        let rec = counters.node_mut(root);
                        rec.self_weight += node.self_weight;
                        rec.total_weight += node.total_weight;
                    } else {
                        let node_prec = precs.get(&node.label).copied().unwrap_or(0);
                        let id = counters.find_or_add_child(root, &node.label);
                        let rec = counters.node_mut(id);
                        rec.self_weight += node.self_weight;
                        if is_root_label || node_prec == 0 {
                            rec.total_weight += node.total_weight;
                        }
                    }
                    *precs.entry(node.label.clone()).or_insert(0) += 1;
                }
                Visit::Exit => {
                    if is_root_label || root_prec > 0 {
                        if let Some(prec) = precs.get_mut(&node.label) {
                            *prec = prec.saturating_sub(1);
                        }
                    }
                }
            }
        });

        if root != ROOT {
            let (self_weight, total_weight) = {
                let rec = counters.node(root);
                (rec.self_weight, rec.total_weight)
            };
            let top = counters.node_mut(ROOT);
            top.self_weight = self_weight;
            top.total_weight = total_weight;
        }
        counters.mark_totals_computed();
        counters
    }

    /// Native functions through which samples entered native code, most
    /// frequent first. The first row is the `TOTAL` of all entries.
    pub fn c_entry_profile(&self) -> Vec<CEntryNode> {
        let mut rows: Vec<CEntryNode> = self
            .c_entries
            .iter()
            .map(|(name, &ticks)| CEntryNode {
                name: name.clone(),
                ticks,
            })
            .collect();
        rows.sort_by(|a, b| b.ticks.cmp(&a.ticks).then_with(|| b.name.cmp(&a.name)));
        let total = rows.iter().map(|row| row.ticks).sum();
        rows.insert(
            0,
            CEntryNode {
                name: C_ENTRY_TOTAL.to_string(),
                ticks: total,
            },
        );
        rows
    }

    /// Drop SFIs that no live code refers to any more
    pub fn clean_up_func_entries(&mut self) {
        let entries = self.code_map.dynamic_entries_with_addresses();
        let used: FnvHashSet<EntryId> = entries
            .iter()
            .filter_map(|&(_, id)| match self.code_map.entry(id).kind {
                CodeKind::FuncCode { sfi, .. } => Some(sfi),
                _ => None,
            })
            .collect();
        for (addr, id) in entries {
            if self.code_map.entry(id).is_sfi() && !used.contains(&id) {
                let _ = self.code_map.delete_code(addr);
            }
        }
    }

    /// Every static symbol and library with its address range
    pub fn serialize_vm_symbols(&self) -> Vec<VmSymbol> {
        let map = &self.code_map;
        map.static_entries_with_addresses()
            .into_iter()
            .chain(map.library_entries_with_addresses())
            .map(|(start, id)| {
                let entry = map.entry(id);
                VmSymbol {
                    name: entry.name.clone(),
                    kind: entry.type_name().to_string(),
                    start,
                    end: entry.end(start),
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder(Vec<(Operation, u64, Option<usize>)>);

    impl UnknownCodeHandler for Recorder {
        fn handle_unknown_code(&mut self, operation: Operation, addr: u64, pos: Option<usize>) {
            self.0.push((operation, addr, pos));
        }
    }

    fn profile() -> Profile {
        Profile::new(&SeparateEntries::default()).unwrap()
    }

    fn labels(tree: &CallTree, id: usize) -> Vec<(String, u64, u64)> {
        let mut rows: Vec<(String, u64, u64)> = tree
            .export_children(id)
            .into_iter()
            .map(|n| (n.label.clone(), n.self_weight, n.total_weight))
            .collect();
        rows.sort();
        rows
    }

    #[test]
    fn test_skip_filter_defaults() {
        let filter = SkipFilter::new(&SeparateEntries::default()).unwrap();
        assert!(filter.should_skip("BytecodeHandler: Star0"));
        assert!(!filter.should_skip("Builtin: ArrayPush"));
        assert!(!filter.should_skip("Stub: CEntry"));
        assert!(!filter.should_skip("LoadIC: x"));
    }

    #[test]
    fn test_skip_filter_everything_merged() {
        let filter = SkipFilter::new(&SeparateEntries {
            ic: false,
            bytecodes: false,
            builtins: false,
            stubs: false,
            sparkplug_handlers: false,
        })
        .unwrap();
        assert!(filter.should_skip("LoadGlobalIC: x"));
        assert!(filter.should_skip("Builtin: KeyedLoadIC_Megamorphic"));
        assert!(filter.should_skip("Builtin: ArrayPush"));
        assert!(filter.should_skip("Stub: CEntry"));
        assert!(!filter.should_skip("JS: foo"));
    }

    #[test]
    fn test_skip_filter_sparkplug_flag_does_not_rescue_builtins() {
        let filter = SkipFilter::new(&SeparateEntries {
            builtins: false,
            sparkplug_handlers: true,
            ..SeparateEntries::default()
        })
        .unwrap();
        assert!(filter.should_skip("Builtin: ArrayPush"));
        assert!(filter.should_skip("Builtin: CallBaseline"));

        let filter = SkipFilter::new(&SeparateEntries {
            sparkplug_handlers: true,
            ..SeparateEntries::default()
        })
        .unwrap();
        assert!(!filter.should_skip("Builtin: CallBaseline"));
    }

    #[test]
    fn test_record_tick_builds_both_trees() {
        let mut p = profile();
        p.add_code("JS", "a", 0x1000, 0x10);
        p.add_code("JS", "b", 0x2000, 0x10);
        p.add_code("JS", "c", 0x3000, 0x10);

        // Stacks are innermost first.
        p.record_tick(0, 0, &[0x2000, 0x1000], &mut ());
        p.record_tick(0, 0, &[0x2004, 0x1004], &mut ());
        p.record_tick(0, 0, &[0x3000, 0x1000], &mut ());

        let top_down = p.top_down_profile(None).into_owned();
        let a = top_down.find_child(ROOT, "JS: a").unwrap();
        assert_eq!(top_down.node(a).total_weight, 3);
        assert_eq!(
            labels(&top_down, a),
            vec![
                ("JS: b".to_string(), 2, 2),
                ("JS: c".to_string(), 1, 1)
            ]
        );

        let bottom_up = p.bottom_up_profile(None).into_owned();
        assert_eq!(
            labels(&bottom_up, ROOT),
            vec![
                ("JS: b".to_string(), 0, 2),
                ("JS: c".to_string(), 0, 1)
            ]
        );
    }

    #[test]
    fn test_unknown_frames() {
        let mut p = profile();
        p.add_code("JS", "a", 0x1000, 0x10);
        let mut recorder = Recorder::default();
        let sample = p.record_tick(7, 0, &[0x9000, 0x1000, 0x9999], &mut recorder);

        assert_eq!(sample.name_stack, vec!["UNKNOWN", "JS: a"]);
        assert_eq!(
            sample.entry_stack,
            vec![
                Frame::Unknown(0x9000),
                Frame::Entry(p.find_entry(0x1000).unwrap()),
                Frame::Unknown(0x9999)
            ]
        );
        assert_eq!(
            recorder.0,
            vec![
                (Operation::Tick, 0x9000, Some(0)),
                (Operation::Tick, 0x9999, Some(2))
            ]
        );
    }

    #[test]
    fn test_func_code_and_states() {
        let mut p = profile();
        let id = p.add_func_code("JS", "foo a.js:1", 0x1000, 0x20, 0x500, CodeState::Ignition);
        assert_eq!(p.code_map().display_name(id), "JS: ~foo a.js:1");
        assert!(p.code_map().entry(id).is_js_function());

        // Same code object reported again after tier-up.
        let again = p.add_func_code("JS", "foo a.js:1", 0x1000, 0x20, 0x500, CodeState::Turbofan);
        assert_eq!(again, id);
        assert_eq!(p.code_map().display_name(id), "JS: *foo a.js:1");

        // Different size means a new code object.
        let replaced = p.add_func_code("JS", "foo a.js:1", 0x1000, 0x40, 0x500, CodeState::Turbofan);
        assert_ne!(replaced, id);
        assert_eq!(p.find_entry(0x1030), Some(replaced));
    }

    #[test]
    fn test_replaced_func_code_leaves_sfi() {
        let mut p = profile();
        let old = p.add_func_code("JS", "foo a.js:1", 0x2000, 0x20, 0x500, CodeState::Ignition);
        let new = p.add_func_code("JS", "foo a.js:1", 0x2000, 0x40, 0x500, CodeState::Turbofan);
        assert_ne!(old, new);

        let sfi = p
            .code_map_mut()
            .find_dynamic_entry_by_start_address(0x500)
            .unwrap();
        match &p.code_map().entry(sfi).kind {
            CodeKind::Sfi { code, .. } => {
                assert_eq!(code.iter().copied().collect::<Vec<_>>(), vec![new]);
            }
            other => panic!("expected an SFI, got {other:?}"),
        }
    }

    #[test]
    fn test_sfi_rename() {
        let mut p = profile();
        let first = p.add_func_code("JS", "old", 0x1000, 0x10, 0x500, CodeState::Compiled);
        p.add_func_code("JS", "new", 0x2000, 0x10, 0x500, CodeState::Compiled);
        assert_eq!(p.code_map().display_name(first), "JS: new");
    }

    #[test]
    fn test_anonymous_function_names() {
        let mut p = profile();
        let id = p.add_func_code("JS", "", 0x1000, 0x10, 0x500, CodeState::Compiled);
        assert_eq!(p.code_map().display_name(id), "JS: <anonymous>");
        let located = p.add_func_code("JS", " a.js:3", 0x2000, 0x10, 0x600, CodeState::Compiled);
        assert_eq!(p.code_map().display_name(located), "JS: <anonymous> a.js:3");
        assert_eq!(p.code_map().raw_name(located), "<anonymous> a.js:3");
    }

    #[test]
    fn test_move_and_delete_report_unknown() {
        let mut p = profile();
        p.add_code("Stub", "s", 0x1000, 0x10);
        let mut recorder = Recorder::default();
        p.move_code(0x1000, 0x4000, &mut recorder);
        p.move_code(0x1000, 0x5000, &mut recorder);
        p.delete_code(0x4000, &mut recorder);
        p.delete_code(0x4000, &mut recorder);
        assert_eq!(
            recorder.0,
            vec![
                (Operation::Move, 0x1000, None),
                (Operation::Delete, 0x4000, None)
            ]
        );
    }

    #[test]
    fn test_move_sfi() {
        let mut p = profile();
        let code = p.add_func_code("JS", "f", 0x1000, 0x10, 0x500, CodeState::Compiled);
        p.move_shared_function_info(0x500, 0x700);
        p.move_shared_function_info(0x900, 0xa00);
        assert!(p.code_map_mut().find_dynamic_entry_by_start_address(0x700).is_some());
        assert!(p.code_map_mut().find_dynamic_entry_by_start_address(0x500).is_none());
        assert_eq!(p.code_map().display_name(code), "JS: f");
    }

    #[test]
    fn test_flat_profile_counts_recursion_once() {
        let mut p = profile();
        p.add_code("JS", "a", 0x1000, 0x10);
        p.add_code("JS", "b", 0x2000, 0x10);
        // a -> b -> a, and a -> b
        p.record_tick(0, 0, &[0x1000, 0x2000, 0x1000], &mut ());
        p.record_tick(0, 0, &[0x2000, 0x1000], &mut ());

        let flat = p.flat_profile(None);
        assert_eq!(
            labels(&flat, ROOT),
            vec![("JS: a".to_string(), 1, 2), ("JS: b".to_string(), 1, 2)]
        );
        assert_eq!(flat.root().total_weight, 2);
    }

    #[test]
    fn test_flat_profile_for_label() {
        let mut p = profile();
        p.add_code("JS", "main", 0x1000, 0x10);
        p.add_code("JS", "a", 0x2000, 0x10);
        p.add_code("JS", "b", 0x3000, 0x10);
        p.record_tick(0, 0, &[0x2000, 0x1000], &mut ());
        p.record_tick(0, 0, &[0x3000, 0x2000, 0x1000], &mut ());
        p.record_tick(0, 0, &[0x3000, 0x1000], &mut ());

        let flat = p.flat_profile(Some("JS: a"));
        let a = flat.find_child(ROOT, "JS: a").unwrap();
        assert_eq!(flat.node(a).self_weight, 1);
        assert_eq!(flat.node(a).total_weight, 2);
        assert_eq!(labels(&flat, a), vec![("JS: b".to_string(), 1, 1)]);
        assert_eq!(flat.root().total_weight, 2);
    }

    #[test]
    fn test_c_entry_points() {
        let mut p = profile();
        p.add_library("libv8.so", 0x10000, 0x20000);
        p.add_static_code("v8::Api::Call", 0x10000, 0x10100);
        p.add_static_code("v8::Internal", 0x10200, 0x10300);
        p.add_code("JS", "js", 0x40000, 0x10);

        // native leaf, C++ caller, JS caller
        p.record_tick(0, 0, &[0x10210, 0x10010, 0x40000], &mut ());
        p.record_tick(0, 0, &[0x10010, 0x40000], &mut ());

        let profile = p.c_entry_profile();
        assert_eq!(
            profile,
            vec![
                CEntryNode {
                    name: "TOTAL".to_string(),
                    ticks: 2
                },
                CEntryNode {
                    name: "v8::Api::Call".to_string(),
                    ticks: 2
                }
            ]
        );
    }

    #[test]
    fn test_clean_up_func_entries() {
        let mut p = profile();
        p.add_func_code("JS", "live", 0x1000, 0x10, 0x500, CodeState::Compiled);
        p.add_func_code("JS", "dead", 0x2000, 0x10, 0x600, CodeState::Compiled);
        p.delete_code(0x2000, &mut ());
        p.clean_up_func_entries();
        let map = p.code_map_mut();
        assert!(map.find_dynamic_entry_by_start_address(0x500).is_some());
        assert!(map.find_dynamic_entry_by_start_address(0x600).is_none());
    }

    #[test]
    fn test_source_positions_and_scripts() {
        let mut p = profile();
        let sfi_code = p.add_func_code("JS", "inner", 0x3000, 0x10, 0x700, CodeState::Compiled);
        let code = p.add_func_code("JS", "outer", 0x1000, 0x10, 0x500, CodeState::Turbofan);
        p.add_script_source(3, "app.js", "function outer() {}");
        p.add_source_positions(0x1000, 3, 0, 16, "C0O0", "F0O1", "S0x700S0x999");

        let info = p.code_map().entry(code).source.clone().unwrap();
        assert_eq!(info.script, 3);
        assert_eq!(info.inlined_functions.len(), 2);
        assert!(info.inlined_functions[0].is_some());
        assert!(info.inlined_functions[1].is_none());
        assert_eq!(p.source_code(code), Some("function outer()"));
        assert_eq!(p.script("app.js").map(|s| s.id), Some(3));
        assert!(p.source_code(sfi_code).is_none());
    }

    #[test]
    fn test_serialize_vm_symbols() {
        let mut p = profile();
        p.add_library("libc.so", 0x10000, 0x20000);
        p.add_static_code("memcpy", 0x10100, 0x10180);
        let symbols = p.serialize_vm_symbols();
        assert_eq!(
            symbols,
            vec![
                VmSymbol {
                    name: "memcpy".to_string(),
                    kind: "CPP".to_string(),
                    start: 0x10100,
                    end: 0x10180
                },
                VmSymbol {
                    name: "libc.so".to_string(),
                    kind: "SHARED_LIB".to_string(),
                    start: 0x10000,
                    end: 0x20000
                }
            ]
        );
    }
}
