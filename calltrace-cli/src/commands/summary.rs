use std::{cmp::Reverse, collections::HashMap, path::Path};

use anyhow::{Result, bail};
use calltrace::{MethodRecord, TraceDocument};
use comfy_table::{Cell, Color, ContentArrangement, Row, Table, presets::UTF8_FULL};
use owo_colors::OwoColorize;

use crate::{commands::load_document, output};

const NAME_WIDTH: usize = 48;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
struct Stats {
    count: u64,
    total_ms: u64,
    max_ms: u64,
}

impl Stats {
    fn record(&mut self, time_ms: u64) {
        self.count += 1;
        self.total_ms = self.total_ms.saturating_add(time_ms);
        self.max_ms = self.max_ms.max(time_ms);
    }

    fn avg_ms(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.total_ms as f64 / self.count as f64
        }
    }
}

pub fn execute(path: &Path, top: usize) -> Result<()> {
    output::status("Analyzing", path.display().to_string());
    let document = load_document(path)?;
    if document.threads.is_empty() {
        bail!("no threads recorded in {}", path.display());
    }

    print_threads(&document);
    print_routines(&collect(&document), top);
    Ok(())
}

/// Per-routine statistics keyed by `module::name`, over every thread and
/// nesting level.
fn collect(document: &TraceDocument) -> HashMap<String, Stats> {
    let mut stats = HashMap::new();
    for thread in &document.threads {
        collect_methods(&thread.methods, &mut stats);
    }
    stats
}

fn collect_methods(methods: &[MethodRecord], stats: &mut HashMap<String, Stats>) {
    for method in methods {
        let key = if method.package.is_empty() {
            method.name.clone()
        } else {
            format!("{}::{}", method.package, method.name)
        };
        stats.entry(key).or_default().record(method.time_ms);
        collect_methods(&method.children, stats);
    }
}

fn count_calls(methods: &[MethodRecord]) -> usize {
    methods
        .iter()
        .map(|method| 1 + count_calls(&method.children))
        .sum()
}

fn header(labels: &[&str]) -> Row {
    Row::from(
        labels
            .iter()
            .map(|label| Cell::new(label).fg(Color::Cyan))
            .collect::<Vec<_>>(),
    )
}

fn print_threads(document: &TraceDocument) {
    println!("{}", "Threads".bold());

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(header(&["Thread", "Time (ms)", "Top-level calls", "All calls"]));

    for thread in &document.threads {
        table.add_row(Row::from(vec![
            Cell::new(thread.id.to_string()),
            Cell::new(thread.time_ms.to_string()),
            Cell::new(thread.methods.len().to_string()),
            Cell::new(count_calls(&thread.methods).to_string()),
        ]));
    }

    println!("{table}\n");
}

fn print_routines(stats: &HashMap<String, Stats>, top: usize) {
    println!("{}", "Routines by total time".bold());

    let mut rows: Vec<(&String, &Stats)> = stats.iter().collect();
    rows.sort_by_key(|(name, stat)| (Reverse(stat.total_ms), *name));

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(header(&["#", "Routine", "Calls", "Total (ms)", "Avg (ms)", "Max (ms)"]));

    for (idx, (name, stat)) in rows.iter().take(top).enumerate() {
        table.add_row(Row::from(vec![
            Cell::new((idx + 1).to_string()),
            Cell::new(truncate(name, NAME_WIDTH)),
            Cell::new(stat.count.to_string()),
            Cell::new(stat.total_ms.to_string()),
            Cell::new(format!("{:.1}", stat.avg_ms())),
            Cell::new(stat.max_ms.to_string()),
        ]));
    }

    println!("{table}\n");
    if rows.len() > top {
        println!("{} more routine(s) not shown", (rows.len() - top).dimmed());
    }
}

fn truncate(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        text.to_string()
    } else if limit <= 3 {
        "...".to_string()
    } else {
        let kept: String = text.chars().take(limit - 3).collect();
        format!("{kept}...")
    }
}
