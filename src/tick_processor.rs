//! Tick processor
//!
//! Drives the [`LogReader`] over a VM log, applies code events to the
//! [`Profile`], loads native symbols for every shared library and counts
//! ticks. [`TickProcessor::statistics`] turns the result into a [`Report`].

use crate::call_tree::{CallTree, NodeId, ROOT};
use crate::code_entry::CodeState;
use crate::config::ProcessorConfig;
use crate::log_reader::{
    self, parse_address, process_stack, Args, Dispatch, FieldParser, LogReader, RangeMode,
};
use crate::profile::{self, Operation, Profile, UnknownCodeHandler, VmSymbol, UNKNOWN};
use crate::report::{
    percent, CEntryRow, HeavyNode, Report, Summary, TickLine, CALL_PROFILE_CUTOFF_PCT,
};
use crate::symbols::{provider_for, SymbolTableProvider};
use fnv::FnvHashMap;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::io::BufRead;
use tracing::{debug, trace, warn};

/// VM state recorded with every tick
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VmState {
    Js,
    Gc,
    Parser,
    BytecodeCompiler,
    Compiler,
    Other,
    External,
    Idle,
}

impl VmState {
    /// Numeric state as written in `tick` records
    pub fn as_raw(self) -> i64 {
        match self {
            Self::Js => 0,
            Self::Gc => 1,
            Self::Parser => 2,
            Self::BytecodeCompiler => 3,
            Self::Compiler => 4,
            Self::Other => 5,
            Self::External => 6,
            Self::Idle => 7,
        }
    }

    pub fn from_raw(raw: i64) -> Option<Self> {
        match raw {
            0 => Some(Self::Js),
            1 => Some(Self::Gc),
            2 => Some(Self::Parser),
            3 => Some(Self::BytecodeCompiler),
            4 => Some(Self::Compiler),
            5 => Some(Self::Other),
            6 => Some(Self::External),
            7 => Some(Self::Idle),
            _ => None,
        }
    }
}

/// Aggregate tick counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TickCounters {
    /// Ticks inside the time range
    pub total: u64,
    /// Ticks whose PC resolved to no code
    pub unaccounted: u64,
    /// Ticks rejected by the VM state or runtime timer filter
    pub excluded: u64,
    /// Ticks taken during garbage collection
    pub gc: u64,
}

impl UnknownCodeHandler for TickCounters {
    fn handle_unknown_code(&mut self, operation: Operation, addr: u64, stack_pos: Option<usize>) {
        match operation {
            Operation::Move => warn!("Code move event for unknown code: {addr:#x}"),
            Operation::Delete => warn!("Code delete event for unknown code: {addr:#x}"),
            // Only an unknown PC makes a tick unaccounted; unknown callers
            // would otherwise unbalance the counts.
            Operation::Tick => {
                if stack_pos == Some(0) {
                    self.unaccounted += 1;
                }
            }
        }
    }
}

/// Native code category, keyed by entry name
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodeType {
    Cpp,
    SharedLib,
}

const SHARED_LIBRARY: &[FieldParser] = &[
    FieldParser::String,
    FieldParser::Address,
    FieldParser::Address,
    FieldParser::Int,
];
const CODE_CREATION: &[FieldParser] = &[
    FieldParser::String,
    FieldParser::Int,
    FieldParser::Int,
    FieldParser::Address,
    FieldParser::Int,
    FieldParser::String,
    FieldParser::VarArgs,
];
const CODE_MOVE: &[FieldParser] = &[FieldParser::Address, FieldParser::Address];
const CODE_DELETE: &[FieldParser] = &[FieldParser::Address];
const CODE_SOURCE_INFO: &[FieldParser] = &[
    FieldParser::Address,
    FieldParser::Int,
    FieldParser::Int,
    FieldParser::Int,
    FieldParser::String,
    FieldParser::String,
    FieldParser::String,
];
const SCRIPT_SOURCE: &[FieldParser] = &[FieldParser::Int, FieldParser::String, FieldParser::String];
const ACTIVE_RUNTIME_TIMER: &[FieldParser] = &[FieldParser::String];
const TICK: &[FieldParser] = &[
    FieldParser::Address,
    FieldParser::Int,
    FieldParser::Int,
    FieldParser::Address,
    FieldParser::Int,
    FieldParser::VarArgs,
];
const TIMER_EVENT: &[FieldParser] = &[FieldParser::String, FieldParser::String, FieldParser::String];

fn dispatch_table() -> [(&'static str, Dispatch<TickRecorder>); 11] {
    fn entry(
        parsers: &'static [FieldParser],
        processor: log_reader::Processor<TickRecorder>,
    ) -> Dispatch<TickRecorder> {
        Dispatch { parsers, processor }
    }
    [
        ("shared-library", entry(SHARED_LIBRARY, TickRecorder::process_shared_library)),
        ("code-creation", entry(CODE_CREATION, TickRecorder::process_code_creation)),
        ("code-move", entry(CODE_MOVE, TickRecorder::process_code_move)),
        ("code-delete", entry(CODE_DELETE, TickRecorder::process_code_delete)),
        ("sfi-move", entry(CODE_MOVE, TickRecorder::process_sfi_move)),
        ("code-source-info", entry(CODE_SOURCE_INFO, TickRecorder::process_code_source_info)),
        ("script-source", entry(SCRIPT_SOURCE, TickRecorder::process_script_source)),
        ("active-runtime-timer", entry(ACTIVE_RUNTIME_TIMER, TickRecorder::process_runtime_timer)),
        ("tick", entry(TICK, TickRecorder::process_tick)),
        ("timer-event-start", entry(TIMER_EVENT, TickRecorder::advance_distortion)),
        ("timer-event-end", entry(TIMER_EVENT, TickRecorder::advance_distortion)),
    ]
}

/// State mutated by log records
struct TickRecorder {
    profile: Profile,
    symbols: Box<dyn SymbolTableProvider>,
    counters: TickCounters,
    code_types: FnvHashMap<String, CodeType>,
    state_filter: Option<VmState>,
    runtime_timer_filter: Option<String>,
    current_runtime_timer: Option<String>,
    /// Sampling overhead added per entry, in timestamp units
    distortion_per_entry: f64,
    distortion: f64,
    range_start: f64,
    range_end: f64,
}

impl TickRecorder {
    fn process_shared_library(&mut self, args: &Args) -> log_reader::Result<()> {
        let name = args.str(0)?;
        let start = args.address(1)?;
        let end = args.address(2)?;
        let aslr_slide = args.opt_int(3)?.unwrap_or(0);
        debug!("shared library {name} at {start:#x}-{end:#x}");

        self.profile.add_library(name, start, end);
        self.code_types.insert(name.to_string(), CodeType::SharedLib);

        let profile = &mut self.profile;
        let code_types = &mut self.code_types;
        self.symbols.parse_vm_symbols(
            name,
            start,
            end,
            aslr_slide,
            &mut |symbol: &str, symbol_start: u64, symbol_end: u64| {
                profile.add_static_code(symbol, symbol_start, symbol_end);
                code_types.insert(symbol.to_string(), CodeType::Cpp);
            },
        );
        Ok(())
    }

    fn process_code_creation(&mut self, args: &Args) -> log_reader::Result<()> {
        let code_type = args.str(0)?;
        let start = args.address(3)?;
        let size = u64::try_from(args.int(4)?).map_err(|_| log_reader::LogError::FieldType {
            index: 4,
            expected: "a code size",
        })?;
        let name = args.str(5)?;
        let extra = args.var_args(6);

        match extra.first().filter(|sfi| !sfi.is_empty()) {
            Some(sfi) if code_type != "RegExp" => {
                let sfi_addr = parse_address(sfi)?;
                let state = CodeState::parse(extra.get(1).map_or("", String::as_str))?;
                self.profile
                    .add_func_code(code_type, name, start, size, sfi_addr, state);
            }
            _ => {
                self.profile.add_code(code_type, name, start, size);
            }
        }
        Ok(())
    }

    fn process_code_move(&mut self, args: &Args) -> log_reader::Result<()> {
        self.profile
            .move_code(args.address(0)?, args.address(1)?, &mut self.counters);
        Ok(())
    }

    fn process_code_delete(&mut self, args: &Args) -> log_reader::Result<()> {
        self.profile.delete_code(args.address(0)?, &mut self.counters);
        Ok(())
    }

    fn process_sfi_move(&mut self, args: &Args) -> log_reader::Result<()> {
        self.profile
            .move_shared_function_info(args.address(0)?, args.address(1)?);
        Ok(())
    }

    fn process_code_source_info(&mut self, args: &Args) -> log_reader::Result<()> {
        self.profile.add_source_positions(
            args.address(0)?,
            args.int(1)?,
            args.int(2)?,
            args.int(3)?,
            args.str(4)?,
            args.str(5)?,
            args.str(6)?,
        );
        Ok(())
    }

    fn process_script_source(&mut self, args: &Args) -> log_reader::Result<()> {
        self.profile
            .add_script_source(args.int(0)?, args.str(1)?, args.str(2)?);
        Ok(())
    }

    fn process_runtime_timer(&mut self, args: &Args) -> log_reader::Result<()> {
        self.current_runtime_timer = Some(args.str(0)?.to_string());
        Ok(())
    }

    fn advance_distortion(&mut self, _args: &Args) -> log_reader::Result<()> {
        self.distortion += self.distortion_per_entry;
        Ok(())
    }

    fn include_tick(&self, vm_state: i64) -> bool {
        if let Some(state) = self.state_filter {
            return state.as_raw() == vm_state;
        }
        match &self.runtime_timer_filter {
            Some(filter) => self.current_runtime_timer.as_ref() == Some(filter),
            None => true,
        }
    }

    fn process_tick(&mut self, args: &Args) -> log_reader::Result<()> {
        let mut pc = args.address(0)?;
        let timestamp = args.int(1)?;
        let is_external_callback = args.int(2)? != 0;
        let mut tos_or_external_callback = args.address(3)?;
        let vm_state = args.int(4)?;
        let frames = args.var_args(5);

        self.distortion += self.distortion_per_entry;
        let time = timestamp as f64 - self.distortion;
        if time < self.range_start || time > self.range_end {
            trace!("tick at {timestamp} outside the time range");
            return Ok(());
        }

        self.counters.total += 1;
        if vm_state == VmState::Gc.as_raw() {
            self.counters.gc += 1;
        }
        if !self.include_tick(vm_state) {
            self.counters.excluded += 1;
            return Ok(());
        }

        if is_external_callback {
            // The PC may point into the callback itself; attributing the tick
            // to the callback entry avoids a bogus self call.
            pc = tos_or_external_callback;
            tos_or_external_callback = 0;
        } else if tos_or_external_callback != 0 {
            // A top of stack inside a JS function means a frameless call.
            let in_js_function = self
                .profile
                .find_entry(tos_or_external_callback)
                .is_some_and(|id| self.profile.code_map().entry(id).is_js_function());
            if !in_js_function {
                tos_or_external_callback = 0;
            }
        }

        let stack = process_stack(pc, tos_or_external_callback, frames);
        self.profile
            .record_tick(time as i64, vm_state, &stack, &mut self.counters);
        Ok(())
    }

    fn is_shared_library(&self, name: &str) -> bool {
        self.code_types.get(name) == Some(&CodeType::SharedLib)
    }

    fn is_cpp_code(&self, name: &str) -> bool {
        self.code_types.get(name) == Some(&CodeType::Cpp)
    }

    fn is_js_code(&self, name: &str) -> bool {
        name != UNKNOWN && !self.code_types.contains_key(name)
    }
}

/// Log-driven profiler producing a [`Report`]
pub struct TickProcessor {
    reader: LogReader<TickRecorder>,
    recorder: TickRecorder,
    log_name: String,
    call_graph_size: usize,
    ignore_unknown: bool,
    only_summary: bool,
}

impl TickProcessor {
    /// Processor using `symbols` for native libraries
    pub fn new(
        config: &ProcessorConfig,
        symbols: Box<dyn SymbolTableProvider>,
    ) -> profile::Result<Self> {
        // Distortion is given in picoseconds, timestamps in nanoseconds.
        let distortion_per_entry = config.distortion as f64 / 1000.0;
        let recorder = TickRecorder {
            profile: Profile::new(&config.separate_entries())?,
            symbols,
            counters: TickCounters::default(),
            code_types: FnvHashMap::default(),
            state_filter: config.state_filter,
            runtime_timer_filter: config.runtime_timer_filter.clone(),
            current_runtime_timer: None,
            distortion_per_entry,
            distortion: 0.0,
            range_start: config
                .range_start
                .map_or(f64::NEG_INFINITY, |ms| ms as f64 * 1000.0),
            range_end: config
                .range_end
                .map_or(f64::INFINITY, |ms| ms as f64 * 1000.0),
        };
        let mode = RangeMode::from_flags(config.timed_range, config.pairwise_timed_range);
        Ok(Self {
            reader: LogReader::new(dispatch_table(), mode),
            recorder,
            log_name: "v8.log".to_string(),
            call_graph_size: config.call_graph_size,
            ignore_unknown: config.ignore_unknown,
            only_summary: config.only_summary,
        })
    }

    /// Processor using the platform symbol tools named in `config`
    pub fn from_config(config: &ProcessorConfig) -> profile::Result<Self> {
        Self::new(config, provider_for(config))
    }

    /// Name shown in the report header
    pub fn set_log_name(&mut self, name: impl Into<String>) {
        self.log_name = name.into();
    }

    pub fn process_log_line(&mut self, line: &str) {
        self.reader.process_log_line(&mut self.recorder, line);
    }

    pub fn process_log_chunk(&mut self, chunk: &str) {
        self.reader.process_log_chunk(&mut self.recorder, chunk);
    }

    /// Read a whole log. Invalid UTF-8 is replaced rather than rejected.
    pub fn process_reader<R: BufRead>(&mut self, mut input: R) -> std::io::Result<()> {
        let mut buf = Vec::new();
        loop {
            buf.clear();
            if input.read_until(b'\n', &mut buf)? == 0 {
                break;
            }
            let line = String::from_utf8_lossy(&buf);
            self.process_log_line(line.trim_end_matches(['\n', '\r']));
        }
        self.finish();
        Ok(())
    }

    /// Flush a partial line left by [`TickProcessor::process_log_chunk`]
    pub fn finish(&mut self) {
        self.reader.finish(&mut self.recorder);
    }

    pub fn counters(&self) -> TickCounters {
        self.recorder.counters
    }

    /// Number of log lines that could not be processed
    pub fn error_count(&self) -> usize {
        self.reader.error_count()
    }

    pub fn profile(&self) -> &Profile {
        &self.recorder.profile
    }

    pub fn profile_mut(&mut self) -> &mut Profile {
        &mut self.recorder.profile
    }

    /// Every static symbol and shared library, for symbol dumps
    pub fn vm_symbols(&self) -> Vec<VmSymbol> {
        self.recorder.profile.serialize_vm_symbols()
    }

    /// Build the report from everything processed so far
    pub fn statistics(&mut self) -> Report {
        let ticks = self.recorder.counters;
        let total_ticks = if self.ignore_unknown {
            ticks.total.saturating_sub(ticks.unaccounted)
        } else {
            ticks.total
        };
        let mut report = Report {
            log_name: self.log_name.clone(),
            ticks,
            total_ticks,
            only_summary: self.only_summary,
            shared_libraries: Vec::new(),
            javascript: Vec::new(),
            cpp: Vec::new(),
            summary: None,
            c_entry_points: Vec::new(),
            bottom_up: Vec::new(),
        };
        if ticks.total == 0 {
            return report;
        }

        let flat = self.recorder.profile.flat_profile(None);
        let mut rows: Vec<(&str, u64)> = flat
            .export_children(ROOT)
            .into_iter()
            .map(|node| (node.label.as_str(), node.self_weight))
            .filter(|&(_, self_ticks)| self_ticks > 0)
            .collect();
        rows.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| b.0.cmp(a.0)));

        let recorder = &self.recorder;
        let library_ticks: u64 = rows
            .iter()
            .filter(|&&(name, _)| recorder.is_shared_library(name))
            .map(|&(_, ticks)| ticks)
            .sum();
        let non_library_ticks = total_ticks.saturating_sub(library_ticks);

        let bucket = |keep: &dyn Fn(&str) -> bool, non_library: Option<u64>| -> Vec<TickLine> {
            rows.iter()
                .filter(|&&(name, _)| keep(name))
                .map(|&(name, ticks)| TickLine::new(name, ticks, total_ticks, non_library))
                .collect()
        };
        let shared_libraries = bucket(&|name| recorder.is_shared_library(name), None);
        let javascript = bucket(&|name| recorder.is_js_code(name), Some(non_library_ticks));
        let cpp = bucket(&|name| recorder.is_cpp_code(name), Some(non_library_ticks));

        let sum = |lines: &[TickLine]| lines.iter().map(|line| line.ticks).sum::<u64>();
        let non_library = Some(non_library_ticks);
        report.summary = Some(Summary {
            javascript: TickLine::new("JavaScript", sum(&javascript), total_ticks, non_library),
            cpp: TickLine::new("C++", sum(&cpp), total_ticks, non_library),
            gc: TickLine::new("GC", ticks.gc, total_ticks, non_library),
            shared_libraries: TickLine::new("Shared libraries", library_ticks, total_ticks, None),
            unaccounted: (!self.ignore_unknown && ticks.unaccounted > 0)
                .then(|| TickLine::new("Unaccounted", ticks.unaccounted, ticks.total, None)),
        });

        if self.only_summary {
            return report;
        }
        report.shared_libraries = shared_libraries;
        report.javascript = javascript;
        report.cpp = cpp;

        let c_entries = self.recorder.profile.c_entry_profile();
        if let Some((total, entries)) = c_entries.split_first() {
            report.c_entry_points = entries
                .iter()
                .map(|entry| CEntryRow {
                    name: entry.name.clone(),
                    ticks: entry.ticks,
                    pct_of_c_entries: percent(entry.ticks, total.ticks),
                    pct_of_total: percent(entry.ticks, total_ticks),
                })
                .collect();
        }

        let call_graph_size = self.call_graph_size;
        let heavy = self.recorder.profile.bottom_up_profile(None);
        report.bottom_up = heavy_children(&heavy, ROOT, total_ticks, 0, call_graph_size);
        report
    }
}

/// Children of `id` in the heavy profile, heaviest first. `parent_total` is
/// the denominator of their percentages.
fn heavy_children(
    tree: &CallTree,
    id: NodeId,
    parent_total: u64,
    level: usize,
    call_graph_size: usize,
) -> Vec<HeavyNode> {
    let mut children = tree.export_children(id);
    children.sort_by(|a, b| match b.total_weight.cmp(&a.total_weight) {
        Ordering::Equal => b.label.cmp(&a.label),
        other => other,
    });
    children
        .into_iter()
        .filter_map(|node| {
            let pct_of_parent = percent(node.total_weight, parent_total);
            if pct_of_parent < CALL_PROFILE_CUTOFF_PCT {
                return None;
            }
            let child_id = tree.find_child(id, &node.label)?;
            let grandchildren = if level < call_graph_size {
                heavy_children(tree, child_id, node.total_weight, level + 1, call_graph_size)
            } else {
                Vec::new()
            };
            Some(HeavyNode {
                name: node.label.clone(),
                total_ticks: node.total_weight,
                pct_of_parent,
                children: grandchildren,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbols::{FuncInfo, Result as SymbolResult};

    struct NoSymbols;

    impl SymbolTableProvider for NoSymbols {
        fn load_symbols(&mut self, _lib_name: &str) -> SymbolResult<Vec<FuncInfo>> {
            Ok(Vec::new())
        }
    }

    struct FixedSymbols(Vec<FuncInfo>);

    impl SymbolTableProvider for FixedSymbols {
        fn load_symbols(&mut self, lib_name: &str) -> SymbolResult<Vec<FuncInfo>> {
            if lib_name.ends_with("libv8.so") {
                Ok(self.0.clone())
            } else {
                Ok(Vec::new())
            }
        }
    }

    fn processor(config: &ProcessorConfig) -> TickProcessor {
        TickProcessor::new(config, Box::new(NoSymbols)).unwrap()
    }

    fn run(config: &ProcessorConfig, log: &str) -> TickProcessor {
        let mut p = processor(config);
        p.process_log_chunk(log);
        p.finish();
        p
    }

    #[test]
    fn test_minimal_log() {
        let mut p = run(
            &ProcessorConfig::default(),
            "code-creation,JS,0,0,1000,10,foo,\ntick,1005,0,0,0,0,1000\ntick,1005,0,0,0,0,1000\n",
        );
        assert_eq!(p.counters().total, 2);
        let report = p.statistics();
        assert_eq!(report.javascript.len(), 1);
        assert_eq!(report.javascript[0].name, "JS: foo");
        assert_eq!(report.javascript[0].ticks, 2);
        assert_eq!(report.summary.unwrap().javascript.ticks, 2);
    }

    #[test]
    fn test_unaccounted_and_gc() {
        let log = "\
code-creation,Stub,0,0,0x1000,0x10,CEntry,
tick,0x1000,0,0,0,1
tick,0x9000,0,0,0,0
tick,0x9000,0,0,0,1
";
        let mut p = run(&ProcessorConfig::default(), log);
        let counters = p.counters();
        assert_eq!(counters.total, 3);
        assert_eq!(counters.gc, 2);
        assert_eq!(counters.unaccounted, 2);

        let summary = p.statistics().summary.unwrap();
        let unaccounted = summary.unaccounted.unwrap();
        assert_eq!(unaccounted.ticks, 2);
        assert!((unaccounted.pct_of_total - 66.666).abs() < 0.01);

        let mut ignoring = run(
            &ProcessorConfig {
                ignore_unknown: true,
                ..ProcessorConfig::default()
            },
            log,
        );
        let report = ignoring.statistics();
        assert_eq!(report.total_ticks, 1);
        assert!(report.summary.unwrap().unaccounted.is_none());
    }

    #[test]
    fn test_state_filter_excludes() {
        let config = ProcessorConfig {
            state_filter: Some(VmState::Gc),
            ..ProcessorConfig::default()
        };
        let p = run(&config, "tick,0x1000,0,0,0,0\ntick,0x1000,0,0,0,1\n");
        let counters = p.counters();
        assert_eq!(counters.total, 2);
        assert_eq!(counters.excluded, 1);
        assert_eq!(counters.unaccounted, 1);
    }

    #[test]
    fn test_runtime_timer_filter() {
        let config = ProcessorConfig {
            runtime_timer_filter: Some("RecordWrite".to_string()),
            ..ProcessorConfig::default()
        };
        let log = "\
tick,0x1000,0,0,0,0
active-runtime-timer,RecordWrite
tick,0x1000,0,0,0,0
active-runtime-timer,GC
tick,0x1000,0,0,0,0
";
        let p = run(&config, log);
        assert_eq!(p.counters().total, 3);
        assert_eq!(p.counters().excluded, 2);
    }

    #[test]
    fn test_time_range_and_distortion() {
        let config = ProcessorConfig {
            range_start: Some(1),
            range_end: Some(2),
            ..ProcessorConfig::default()
        };
        let log = "tick,0x1,500,0,0,0\ntick,0x1,1500,0,0,0\ntick,0x1,2500,0,0,0\n";
        assert_eq!(run(&config, log).counters().total, 1);

        // 300ns of overhead per entry pushes the second tick out of the
        // range and pulls the third one in.
        let distorted = ProcessorConfig {
            distortion: 300_000,
            ..config
        };
        let log = "tick,0x1,500,0,0,0\ntick,0x1,1500,0,0,0\ntick,0x1,2700,0,0,0\n";
        assert_eq!(run(&distorted, log).counters().total, 1);
    }

    #[test]
    fn test_external_callback_replaces_pc() {
        let log = "\
code-creation,Builtin,0,0,0x1000,0x100,CallApiCallback,
code-creation,Callback,0,0,0x5000,0x10,getter,
tick,0x1010,0,1,0x5000,6
";
        let mut p = run(&ProcessorConfig::default(), log);
        let report = p.statistics();
        let names: Vec<&str> = report.javascript.iter().map(|l| l.name.as_str()).collect();
        assert_eq!(names, vec!["Callback: getter"]);
    }

    #[test]
    fn test_tos_kept_only_for_js_functions() {
        let log = "\
code-creation,Stub,0,0,0x1000,0x10,s,
code-creation,JS,0,0,0x2000,0x10,f a.js:1,0x9000,~
code-creation,Stub,0,0,0x3000,0x10,other,
tick,0x1000,0,0,0x2004,0
tick,0x1000,0,0,0x3004,0
";
        let mut p = run(&ProcessorConfig::default(), log);
        let heavy = p.statistics().bottom_up;
        assert_eq!(heavy.len(), 1);
        assert_eq!(heavy[0].name, "Stub: s");
        assert_eq!(heavy[0].total_ticks, 2);
        let callers: Vec<(&str, u64)> = heavy[0]
            .children
            .iter()
            .map(|c| (c.name.as_str(), c.total_ticks))
            .collect();
        assert_eq!(callers, vec![("JS: ~f a.js:1", 1)]);
    }

    #[test]
    fn test_shared_library_symbols_and_buckets() {
        let symbols = FixedSymbols(vec![
            FuncInfo::new("v8::Foo", 0x100, Some(0x100)),
            FuncInfo::new("v8::Bar", 0x300, Some(0x100)),
        ]);
        let mut p = TickProcessor::new(&ProcessorConfig::default(), Box::new(symbols)).unwrap();
        let log = "\
shared-library,/lib/libv8.so,0x7f0000000000,0x7f0000010000,0
shared-library,/lib/libc.so,0x7e0000000000,0x7e0000010000,0
code-creation,JS,0,0,0x1000,0x10,main,
tick,0x7f0000000110,0,0,0,0,0x1000
tick,0x7f0000000310,0,0,0,0,0x7f0000000110,0x1000
tick,0x7e0000000050,0,0,0,0,0x1000
";
        p.process_log_chunk(log);
        p.finish();
        let report = p.statistics();

        let cpp: Vec<(&str, u64)> = report.cpp.iter().map(|l| (l.name.as_str(), l.ticks)).collect();
        assert_eq!(cpp, vec![("v8::Foo", 1), ("v8::Bar", 1)]);
        assert_eq!(report.shared_libraries.len(), 1);
        assert_eq!(report.shared_libraries[0].name, "/lib/libc.so");
        // Libraries are excluded from the non-library denominator.
        assert_eq!(report.cpp[0].pct_of_non_library, Some(50.0));

        let summary = report.summary.unwrap();
        assert_eq!(summary.shared_libraries.ticks, 1);
        assert_eq!(summary.cpp.ticks, 2);

        let entries: Vec<(&str, u64)> = report
            .c_entry_points
            .iter()
            .map(|row| (row.name.as_str(), row.ticks))
            .collect();
        assert_eq!(entries, vec![("v8::Foo", 2)]);

        let vm_symbols = p.vm_symbols();
        assert_eq!(vm_symbols.len(), 4);
        assert!(vm_symbols.iter().any(|s| s.name == "v8::Bar" && s.kind == "CPP"));
    }

    #[test]
    fn test_code_lifecycle_records() {
        let log = "\
code-creation,Stub,0,0,0x1000,0x10,s,
code-move,0x1000,0x2000
code-move,0x1000,0x3000
code-delete,0x2000
code-delete,0x2000
tick,0x2004,0,0,0,0
";
        let p = run(&ProcessorConfig::default(), log);
        assert_eq!(p.counters().unaccounted, 1);
        assert_eq!(p.error_count(), 0);
    }

    #[test]
    fn test_bad_records_are_skipped() {
        let log = "\
code-creation,JS,0,0,0x1000,0x10,f,0x500,?
tick,notanaddress,0,0,0,0
code-creation,JS,0,0,0x1000,0x10,g,0x500,*
tick,0x1000,0,0,0,0
";
        let mut p = run(&ProcessorConfig::default(), log);
        assert_eq!(p.error_count(), 2);
        let report = p.statistics();
        assert_eq!(report.javascript[0].name, "JS: *g");
    }

    #[test]
    fn test_negative_code_size_is_rejected() {
        let log = "\
code-creation,Stub,0,1,0x1000,-5,Neg
tick,0x1000,0,0,0,0
";
        let mut p = run(&ProcessorConfig::default(), log);
        assert_eq!(p.error_count(), 1);
        assert!(p.profile_mut().find_entry(0x1000).is_none());
        assert_eq!(p.counters().unaccounted, 1);
    }

    #[test]
    fn test_heavy_profile_depth_and_cutoff() {
        let mut log = String::new();
        for (i, name) in ["a", "b", "c", "d"].iter().enumerate() {
            log.push_str(&format!(
                "code-creation,JS,0,0,{:#x},0x10,{name},\n",
                0x1000 * (i + 1)
            ));
        }
        // 200 ticks of a <- b <- c <- d and one of d alone, which falls
        // under the 1% cutoff.
        for _ in 0..200 {
            log.push_str("tick,0x1000,0,0,0,0,0x2000,0x3000,0x4000\n");
        }
        log.push_str("tick,0x4000,0,0,0,0\n");

        let config = ProcessorConfig {
            call_graph_size: 1,
            ..ProcessorConfig::default()
        };
        let mut p = run(&config, &log);
        let heavy = p.statistics().bottom_up;
        assert_eq!(heavy.len(), 1);
        assert_eq!(heavy[0].name, "JS: a");
        assert_eq!(heavy[0].children.len(), 1);
        assert!(heavy[0].children[0].children.is_empty());
    }

    #[test]
    fn test_timed_range_mode() {
        let config = ProcessorConfig {
            timed_range: true,
            ..ProcessorConfig::default()
        };
        let log = "\
code-creation,JS,0,0,0x1000,0x10,f,
tick,0x1000,0,0,0,0
current-time,10
tick,0x1000,0,0,0,0
current-time,20
";
        assert_eq!(run(&config, log).counters().total, 1);
    }

    #[test]
    fn test_pairwise_flag_alone_is_direct() {
        let config = ProcessorConfig {
            pairwise_timed_range: true,
            ..ProcessorConfig::default()
        };
        let log = "\
code-creation,JS,0,0,0x1000,0x10,f,
tick,0x1000,0,0,0,0
current-time,10
tick,0x1000,0,0,0,0
current-time,20
";
        assert_eq!(run(&config, log).counters().total, 2);
    }

    #[test]
    fn test_empty_log_report() {
        let mut p = run(&ProcessorConfig::default(), "");
        let report = p.statistics();
        assert_eq!(report.ticks, TickCounters::default());
        assert!(report.summary.is_none());
    }

    #[test]
    fn test_vm_state_raw_values() {
        assert_eq!(VmState::from_raw(1), Some(VmState::Gc));
        assert_eq!(VmState::from_raw(42), None);
        assert_eq!(VmState::Idle.as_raw(), 7);
    }
}
