//! CLI argument parsing for tickprof

use crate::config::{self, ProcessorConfig};
use crate::report::OutputFormat;
use crate::symbols::Platform;
use crate::tick_processor::VmState;
use clap::{ArgGroup, Parser};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "tickprof")]
#[command(version)]
#[command(about = "Statistical profile report for V8 tick logs", long_about = None)]
#[command(group(ArgGroup::new("state").multiple(false)))]
pub struct Cli {
    /// Log file written by `--prof`
    #[arg(value_name = "LOG_FILE", default_value = "v8.log")]
    pub log_file: PathBuf,

    /// Only count ticks taken while running JavaScript
    #[arg(short = 'j', long = "js", group = "state")]
    pub js: bool,

    /// Only count ticks taken during garbage collection
    #[arg(short = 'g', long = "gc", group = "state")]
    pub gc: bool,

    /// Only count ticks taken in the parser
    #[arg(short = 'p', long = "parser", group = "state")]
    pub parser: bool,

    /// Only count ticks taken in the bytecode compiler
    #[arg(short = 'b', long = "bytecode-compiler", group = "state")]
    pub bytecode_compiler: bool,

    /// Only count ticks taken in the optimizing compiler
    #[arg(short = 'c', long = "compiler", group = "state")]
    pub compiler: bool,

    /// Only count ticks taken in other VM states
    #[arg(short = 'o', long = "other", group = "state")]
    pub other: bool,

    /// Only count ticks taken in external code
    #[arg(short = 'e', long = "external", group = "state")]
    pub external: bool,

    /// Only count ticks taken while the named runtime timer was active
    #[arg(long = "filter-runtime-timer", value_name = "NAME")]
    pub runtime_timer_filter: Option<String>,

    /// Depth of the bottom-up profile
    #[arg(long = "call-graph-size", value_name = "DEPTH")]
    pub call_graph_size: Option<usize>,

    /// Leave unaccounted ticks out of percentages
    #[arg(long = "ignore-unknown")]
    pub ignore_unknown: bool,

    /// Keep inline caches as separate entries
    #[arg(long = "separate-ic", value_name = "BOOL")]
    pub separate_ic: Option<bool>,

    /// Keep bytecode handlers as separate entries
    #[arg(long = "separate-bytecodes", value_name = "BOOL")]
    pub separate_bytecodes: Option<bool>,

    /// Keep builtins as separate entries
    #[arg(long = "separate-builtins", value_name = "BOOL")]
    pub separate_builtins: Option<bool>,

    /// Keep stubs as separate entries
    #[arg(long = "separate-stubs", value_name = "BOOL")]
    pub separate_stubs: Option<bool>,

    /// Keep Sparkplug handlers as separate entries
    #[arg(long = "separate-sparkplug-handlers", value_name = "BOOL")]
    pub separate_sparkplug_handlers: Option<bool>,

    /// Platform whose symbol tools are used
    #[arg(long = "platform", value_enum)]
    pub platform: Option<Platform>,

    /// Path to nm
    #[arg(long = "nm", value_name = "PATH")]
    pub nm: Option<String>,

    /// Path to objdump
    #[arg(long = "objdump", value_name = "PATH")]
    pub objdump: Option<String>,

    /// Root directory of the profiled target's filesystem
    #[arg(long = "target", value_name = "DIR")]
    pub target_root_fs: Option<String>,

    /// Library to use for code mapped from an APK
    #[arg(long = "apk-embedded-library", value_name = "PATH")]
    pub apk_embedded_library: Option<String>,

    /// Only count ticks in START,END (milliseconds, either may be `auto`)
    #[arg(long = "range", value_name = "START,END")]
    pub range: Option<String>,

    /// Sampling overhead per log entry in picoseconds
    #[arg(long = "distortion", value_name = "PICOSECONDS", allow_hyphen_values = true)]
    pub distortion: Option<i64>,

    /// Only count ticks between current-time markers
    #[arg(long = "timed-range")]
    pub timed_range: bool,

    /// Only count ticks between pairs of current-time markers
    #[arg(long = "pairwise-timed-range", visible_alias = "ptr")]
    pub pairwise_timed_range: bool,

    /// Print only the summary section
    #[arg(long = "only-summary")]
    pub only_summary: bool,

    /// Print VM symbols as JSON instead of the report
    #[arg(long = "serialize-vm-symbols")]
    pub serialize_vm_symbols: bool,

    /// Output format (text or json)
    #[arg(long = "format", value_enum)]
    pub format: Option<OutputFormat>,

    /// Load options from a TOML file; flags given here override it
    #[arg(long = "config", value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable debug tracing to stderr
    #[arg(long = "debug")]
    pub debug: bool,
}

impl Cli {
    /// VM state selected by the state flags, if any
    pub fn state_filter(&self) -> Option<VmState> {
        [
            (self.js, VmState::Js),
            (self.gc, VmState::Gc),
            (self.parser, VmState::Parser),
            (self.bytecode_compiler, VmState::BytecodeCompiler),
            (self.compiler, VmState::Compiler),
            (self.other, VmState::Other),
            (self.external, VmState::External),
        ]
        .into_iter()
        .find_map(|(set, state)| set.then_some(state))
    }

    /// Build the run configuration: the `--config` file (or defaults) with
    /// every flag given on the command line applied on top
    pub fn load_config(&self) -> config::Result<ProcessorConfig> {
        let mut config = match &self.config {
            Some(path) => ProcessorConfig::from_file(path)?,
            None => ProcessorConfig::default(),
        };
        self.apply(&mut config)?;
        Ok(config)
    }

    /// Override `config` with the flags given on the command line
    pub fn apply(&self, config: &mut ProcessorConfig) -> config::Result<()> {
        if let Some(state) = self.state_filter() {
            config.state_filter = Some(state);
        }
        if let Some(timer) = &self.runtime_timer_filter {
            config.runtime_timer_filter = Some(timer.clone());
        }
        if let Some(size) = self.call_graph_size {
            config.call_graph_size = size;
        }
        config.ignore_unknown |= self.ignore_unknown;

        let separate = [
            (self.separate_ic, &mut config.separate_ic),
            (self.separate_bytecodes, &mut config.separate_bytecodes),
            (self.separate_builtins, &mut config.separate_builtins),
            (self.separate_stubs, &mut config.separate_stubs),
            (
                self.separate_sparkplug_handlers,
                &mut config.separate_sparkplug_handlers,
            ),
        ];
        for (flag, slot) in separate {
            if let Some(value) = flag {
                *slot = value;
            }
        }

        if let Some(platform) = self.platform {
            config.platform = platform;
        }
        if let Some(nm) = &self.nm {
            config.nm = nm.clone();
        }
        if let Some(objdump) = &self.objdump {
            config.objdump = objdump.clone();
        }
        if let Some(root) = &self.target_root_fs {
            config.target_root_fs = root.clone();
        }
        if let Some(library) = &self.apk_embedded_library {
            config.apk_embedded_library = library.clone();
        }

        if let Some(range) = &self.range {
            config.set_range(range)?;
        }
        if let Some(distortion) = self.distortion {
            config.distortion = distortion;
        }
        config.timed_range |= self.timed_range;
        config.pairwise_timed_range |= self.pairwise_timed_range;
        config.only_summary |= self.only_summary;
        config.serialize_vm_symbols |= self.serialize_vm_symbols;
        if let Some(format) = self.format {
            config.format = format;
        }
        Ok(())
    }
}
