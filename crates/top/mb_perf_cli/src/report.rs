//! Human-readable summary of an ended session.

use std::fmt::Write as _;

use comfy_table::{Cell, Table};
use mb_perf_session::{
    FRAME_BUDGET_MS, FrameTimeSummary, MIB, Session, average_operation_times, block_type_averages,
};

pub fn render(session: &Session, dropped_samples: u64) -> String {
    let mut out = String::new();

    writeln!(out, "Session {}", session.id).ok();
    writeln!(out, "{}", "=".repeat(80)).ok();
    out.push_str(&summary_table(session, dropped_samples).to_string());
    out.push('\n');

    if let Some(frames) = FrameTimeSummary::from_frames(&session.frame_records) {
        writeln!(out, "\nFrame times").ok();
        out.push_str(&frame_table(&frames).to_string());
        out.push('\n');
    }

    if let Some(metrics) = &session.metrics {
        if !metrics.slowest_operations.is_empty() {
            let mut table = Table::new();
            table.set_header(vec!["Operation", "Parent", "Duration"]);
            for event in &metrics.slowest_operations {
                table.add_row(vec![
                    Cell::new(&event.name),
                    Cell::new(event.parent_operation.as_deref().unwrap_or("-")),
                    Cell::new(format_ms(event.duration.unwrap_or_default())),
                ]);
            }
            writeln!(out, "\nSlowest operations").ok();
            out.push_str(&table.to_string());
            out.push('\n');
        }
    }

    let operations = average_operation_times(session);
    if !operations.is_empty() {
        let mut table = Table::new();
        table.set_header(vec!["Operation", "Count", "Average", "Total"]);
        for operation in &operations {
            table.add_row(vec![
                Cell::new(&operation.name),
                Cell::new(operation.count),
                Cell::new(format_ms(operation.average_ms)),
                Cell::new(format_ms(operation.total_ms)),
            ]);
        }
        writeln!(out, "\nOperations").ok();
        out.push_str(&table.to_string());
        out.push('\n');
    }

    let blocks = block_type_averages(session);
    if !blocks.is_empty() {
        let mut table = Table::new();
        table.set_header(vec!["Block type", "Count", "Average"]);
        for block in &blocks {
            table.add_row(vec![
                Cell::new(&block.block_type),
                Cell::new(block.count),
                Cell::new(format!("{:.4} ms", block.average_ms)),
            ]);
        }
        writeln!(out, "\nBlocks").ok();
        out.push_str(&table.to_string());
        out.push('\n');
    }

    if let Some(metrics) = &session.metrics {
        writeln!(
            out,
            "\nMemory: estimated leak {} ({})",
            format_signed_bytes(metrics.estimated_leak),
            metrics.leak_severity
        )
        .ok();
        if !metrics.memory_hotspots.is_empty() {
            writeln!(out, "Hotspots: {}", metrics.memory_hotspots.join(", ")).ok();
        }
    }

    out
}

fn summary_table(session: &Session, dropped_samples: u64) -> Table {
    let mut table = Table::new();
    table.set_header(vec!["", ""]);

    let mut row = |name: &str, value: String| {
        table.add_row(vec![Cell::new(name), Cell::new(value)]);
    };
    row("Subject", session.subject_id.clone());
    row("Render mode", session.render_mode.to_string());
    row(
        "Duration",
        session.total_duration.map_or_else(|| "running".to_owned(), format_ms),
    );
    row("Operations", session.timing_events.len().to_string());
    row("Blocks", session.block_events.len().to_string());
    row("Chunks", session.chunk_events.len().to_string());
    row("Frames", session.frame_records.len().to_string());
    row("Average FPS", format!("{:.1}", session.average_fps));
    if let Some(metrics) = &session.metrics {
        row("Avg. block time", format!("{:.4} ms", metrics.average_block_time));
        row("Avg. chunk time", format_ms(metrics.average_chunk_time));
    }
    if let Some(stats) = &session.final_renderer_stats {
        row("Draw calls", stats.draw_calls.to_string());
        row("Triangles", stats.triangles.to_string());
    }
    if dropped_samples > 0 {
        row("Dropped samples", dropped_samples.to_string());
    }

    table
}

fn frame_table(frames: &FrameTimeSummary) -> Table {
    let mut table = Table::new();
    table.set_header(vec!["Frames", "p50", "p95", "p99", "Max", "Over budget"]);
    table.add_row(vec![
        Cell::new(frames.count),
        Cell::new(format_frame_ms(frames.p50)),
        Cell::new(format_frame_ms(frames.p95)),
        Cell::new(format_frame_ms(frames.p99)),
        Cell::new(format_frame_ms(frames.max)),
        Cell::new(format!("{:.1}%", frames.over_budget * 100.0)),
    ]);
    table
}

fn format_ms(ms: f64) -> String {
    format!("{ms:.2} ms")
}

/// Frames past the 60 FPS budget are flagged.
fn format_frame_ms(ms: f64) -> String {
    if ms > FRAME_BUDGET_MS {
        format!("{ms:.1} ms (!)")
    } else {
        format!("{ms:.1} ms")
    }
}

fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{bytes} B")
    } else if bytes < MIB {
        format!("{:.1} KiB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MiB", bytes as f64 / MIB as f64)
    }
}

fn format_signed_bytes(bytes: i64) -> String {
    let magnitude = format_bytes(bytes.unsigned_abs());
    if bytes < 0 {
        format!("-{magnitude}")
    } else {
        magnitude
    }
}
