//! tickprof - statistical profile reports for V8 tick logs
//!
//! A V8 process started with `--prof` writes a CSV-like log of code
//! creation, code moves, shared library mappings and periodic samples
//! ("ticks"). This library replays such a log into a code map, resolves
//! native addresses through the platform's symbol tools, builds top-down
//! and bottom-up call trees and summarizes where the time went.
//!
//! ```no_run
//! use tickprof::config::ProcessorConfig;
//! use tickprof::tick_processor::TickProcessor;
//!
//! # fn main() -> anyhow::Result<()> {
//! let config = ProcessorConfig::default();
//! let mut processor = TickProcessor::from_config(&config)?;
//! let log = std::fs::File::open("v8.log")?;
//! processor.process_reader(std::io::BufReader::new(log))?;
//! print!("{}", processor.statistics().render(config.format)?);
//! # Ok(())
//! # }
//! ```

pub mod call_tree;
pub mod cli;
pub mod code_entry;
pub mod code_map;
pub mod config;
pub mod csv_parser;
pub mod log_reader;
pub mod profile;
pub mod report;
pub mod splay_tree;
pub mod symbols;
pub mod tick_processor;
