//! Profiling report
//!
//! [`Report`] holds the finished statistics of a run as plain data. It is
//! rendered either as the classic tick processor tables or as JSON.

use crate::tick_processor::TickCounters;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;

/// Callers below this share of their parent are left out of the heavy
/// profile
pub const CALL_PROFILE_CUTOFF_PCT: f64 = 1.0;

/// Report output format
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Human-readable tables (default)
    #[default]
    Text,
    /// JSON document
    Json,
}

/// One function or summary bucket with its tick share
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TickLine {
    pub name: String,
    pub ticks: u64,
    pub pct_of_total: f64,
    /// Share of ticks outside shared libraries, where meaningful
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pct_of_non_library: Option<f64>,
}

impl TickLine {
    pub fn new(name: impl Into<String>, ticks: u64, total: u64, non_library: Option<u64>) -> Self {
        Self {
            name: name.into(),
            ticks,
            pct_of_total: percent(ticks, total),
            pct_of_non_library: non_library.map(|whole| percent(ticks, whole)),
        }
    }
}

/// Tick totals per code category
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Summary {
    pub javascript: TickLine,
    pub cpp: TickLine,
    pub gc: TickLine,
    pub shared_libraries: TickLine,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unaccounted: Option<TickLine>,
}

/// Native function through which JS called into C++
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CEntryRow {
    pub name: String,
    pub ticks: u64,
    pub pct_of_c_entries: f64,
    pub pct_of_total: f64,
}

/// Node of the bottom-up (heavy) profile
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HeavyNode {
    pub name: String,
    pub total_ticks: u64,
    /// Share of the parent's total; top-level nodes use the report total
    pub pct_of_parent: f64,
    pub children: Vec<HeavyNode>,
}

/// Finished statistics of a run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Report {
    pub log_name: String,
    pub ticks: TickCounters,
    /// Denominator of every percentage: all ticks, minus unaccounted ones
    /// when those are ignored
    pub total_ticks: u64,
    pub only_summary: bool,
    pub shared_libraries: Vec<TickLine>,
    pub javascript: Vec<TickLine>,
    pub cpp: Vec<TickLine>,
    /// Absent when no tick was recorded
    pub summary: Option<Summary>,
    pub c_entry_points: Vec<CEntryRow>,
    pub bottom_up: Vec<HeavyNode>,
}

impl Report {
    /// Render in the requested format
    pub fn render(&self, format: OutputFormat) -> serde_json::Result<String> {
        match format {
            OutputFormat::Text => Ok(render_text(self)),
            OutputFormat::Json => serde_json::to_string_pretty(self),
        }
    }
}

/// `part` as a percentage of `whole`; zero when `whole` is zero
pub fn percent(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 * 100.0 / whole as f64
    }
}

/// Render the report as tick processor tables
pub fn render_text(report: &Report) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "Statistical profiling result from {}, ({} ticks, {} unaccounted, {} excluded).",
        report.log_name, report.ticks.total, report.ticks.unaccounted, report.ticks.excluded
    );
    let Some(summary) = &report.summary else {
        return out;
    };

    if !report.only_summary {
        write_section(&mut out, "Shared libraries", &report.shared_libraries);
        write_section(&mut out, "JavaScript", &report.javascript);
        write_section(&mut out, "C++", &report.cpp);
    }

    write_header(&mut out, "Summary");
    let rows = [
        Some(&summary.javascript),
        Some(&summary.cpp),
        Some(&summary.gc),
        Some(&summary.shared_libraries),
        summary.unaccounted.as_ref(),
    ];
    for line in rows.into_iter().flatten() {
        write_line(&mut out, line);
    }

    if report.only_summary {
        return out;
    }

    out.push_str("\n [C++ entry points]:\n");
    out.push_str("   ticks    cpp   total   name\n");
    for row in &report.c_entry_points {
        let _ = writeln!(
            out,
            "  {:>5}  {:>5.1}%  {:>5.1}%  {}",
            row.ticks, row.pct_of_c_entries, row.pct_of_total, row.name
        );
    }

    out.push_str("\n [Bottom up (heavy) profile]:\n");
    out.push_str("  Note: percentage shows a share of a particular caller in the total\n");
    out.push_str("  amount of its parent calls.\n");
    let _ = writeln!(
        out,
        "  Callers occupying less than {CALL_PROFILE_CUTOFF_PCT:.1}% are not shown.\n"
    );
    out.push_str("   ticks parent  name\n");
    for node in &report.bottom_up {
        write_heavy_node(&mut out, node, 0);
        out.push('\n');
    }
    out
}

fn write_header(out: &mut String, title: &str) {
    let _ = writeln!(out, "\n [{title}]:");
    out.push_str("   ticks  total  nonlib   name\n");
}

fn write_section(out: &mut String, title: &str, lines: &[TickLine]) {
    write_header(out, title);
    for line in lines {
        write_line(out, line);
    }
}

fn write_line(out: &mut String, line: &TickLine) {
    let non_library = match line.pct_of_non_library {
        Some(pct) => format!("{pct:>5.1}%  "),
        None => " ".repeat(8),
    };
    let _ = writeln!(
        out,
        "  {:>5}  {:>5.1}%  {}{}",
        line.ticks, line.pct_of_total, non_library, line.name
    );
}

fn write_heavy_node(out: &mut String, node: &HeavyNode, indent: usize) {
    let _ = writeln!(
        out,
        "  {:>5}  {:>5.1}%  {:indent$}{}",
        node.total_ticks, node.pct_of_parent, "", node.name
    );
    for child in &node.children {
        write_heavy_node(out, child, indent + 2);
    }
}
