//! CLI output formatting.
//!
//! # Information-First Display
//!
//! Every record leads with its identity (title, or the file name in parens
//! when untitled) and MIME type. Storage keys, sizes and derivatives follow
//! as indented context, so `list` reads as an inventory while `show` still
//! lets users trace a record to its blobs.
//!
//! # Output Format
//!
//! ## Show / upload
//!
//! ```text
//! Beach at dusk [image/jpeg]
//!     Id: 5f0c…
//!     Key: 2026/10/beach-1760000000000-a1b2c3d4.jpg (mem)
//!     Size: 182.4 KiB, 800×600
//!     Uploaded by: alice
//!     thumbnail: 2026/10/beach-…-thumbnail.jpg
//!     webp: 2026/10/beach-….webp
//! ```
//!
//! ## Process
//!
//! ```text
//! (beach-….jpg)
//!     thumbnail: stored 2026/10/beach-…-thumbnail.jpg
//!     medium: failed (invalid dimensions 0x0)
//!     webp: stored 2026/10/beach-….webp
//! ```
//!
//! ## Sweep
//!
//! ```text
//! Disk local: 2 orphans (dry run)
//!     2020/01/stray.jpg
//!     2020/01/stray-thumbnail.jpg
//! ```
//!
//! # Architecture
//!
//! Each command has a `format_*` function (returns `Vec<String>`) for
//! testability and a `print_*` wrapper that writes to stdout. Format
//! functions are pure.

use crate::library::{Deleted, SweepReport};
use crate::process::{ProcessReport, VariantOutcome, VariantReport};
use crate::types::MediaRecord;

/// Return indentation string: 4 spaces per depth level.
fn indent(depth: usize) -> String {
    "    ".repeat(depth)
}

/// Byte count in the largest binary unit that keeps it above 1.
fn human_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}

/// Titled records show the title, untitled ones the file name in parens.
///
/// ```text
/// Beach at dusk
/// (beach-1760000000000-a1b2c3d4.jpg)
/// ```
fn record_label(record: &MediaRecord) -> String {
    match record.title.as_deref() {
        Some(t) if !t.is_empty() => t.to_string(),
        _ => format!("({})", record.file_name),
    }
}

fn variant_line(variant: &VariantReport) -> String {
    let status = match &variant.outcome {
        VariantOutcome::Stored { key, .. } => format!("stored {key}"),
        VariantOutcome::Skipped(reason) => format!("skipped ({reason})"),
        VariantOutcome::Failed(error) => format!("failed ({error})"),
    };
    format!("{}{}: {}", indent(1), variant.name, status)
}

// ============================================================================
// Records
// ============================================================================

/// Full display of one record.
pub fn format_record(record: &MediaRecord) -> Vec<String> {
    let mut lines = vec![format!("{} [{}]", record_label(record), record.mime_type)];
    let ctx = indent(1);

    lines.push(format!("{ctx}Id: {}", record.id));
    lines.push(format!("{ctx}Key: {} ({})", record.file_path, record.disk));
    let mut size = human_size(record.file_size_bytes);
    if let Some(dims) = record.dimensions() {
        size.push_str(&format!(", {}\u{00d7}{}", dims.width, dims.height));
    }
    lines.push(format!("{ctx}Size: {size}"));
    if record.original_file_name != record.file_name {
        lines.push(format!("{ctx}Original: {}", record.original_file_name));
    }
    for (label, value) in [
        ("Alt", &record.alt_text),
        ("Caption", &record.caption),
        ("Description", &record.description),
        ("Folder", &record.folder_id),
    ] {
        if let Some(value) = value {
            lines.push(format!("{ctx}{label}: {value}"));
        }
    }
    if !record.tag_ids.is_empty() {
        let tags: Vec<&str> = record.tag_ids.iter().map(String::as_str).collect();
        lines.push(format!("{ctx}Tags: {}", tags.join(", ")));
    }
    lines.push(format!("{ctx}Uploaded by: {}", record.uploaded_by));
    lines.push(format!(
        "{ctx}Created: {}",
        record.created_at.format("%Y-%m-%d %H:%M:%S")
    ));
    if let Some(deleted) = record.deleted_at {
        lines.push(format!("{ctx}Deleted: {}", deleted.format("%Y-%m-%d %H:%M:%S")));
    }
    for (name, key) in record.thumbnails().into_iter().chain(record.modern_formats()) {
        lines.push(format!("{ctx}{name}: {key}"));
    }
    lines
}

pub fn print_record(record: &MediaRecord) {
    for line in format_record(record) {
        println!("{}", line);
    }
}

/// One line per record, then a count.
///
/// ```text
/// 5f0c… Beach at dusk [image/jpeg] 2 derivatives
/// 9a1e… (logo-….svg) [image/svg+xml] deleted
/// 2 records
/// ```
pub fn format_list(records: &[MediaRecord]) -> Vec<String> {
    let mut lines: Vec<String> = records
        .iter()
        .map(|r| {
            let mut line = format!("{} {} [{}]", r.id, record_label(r), r.mime_type);
            let derived = r.derived_keys().len();
            if derived > 0 {
                line.push_str(&format!(" {derived} derivatives"));
            }
            if r.is_deleted() {
                line.push_str(" deleted");
            }
            line
        })
        .collect();
    lines.push(match records.len() {
        1 => "1 record".to_string(),
        n => format!("{n} records"),
    });
    lines
}

pub fn print_list(records: &[MediaRecord]) {
    for line in format_list(records) {
        println!("{}", line);
    }
}

// ============================================================================
// Processing
// ============================================================================

/// Per-derivative outcome of one processing run.
pub fn format_process_report(report: &ProcessReport) -> Vec<String> {
    let mut lines = vec![record_label(&report.record)];
    if let Some(reason) = &report.skipped {
        lines.push(format!("{}skipped ({reason})", indent(1)));
        return lines;
    }
    lines.extend(report.thumbnails.iter().map(variant_line));
    lines.extend(report.modern_format.iter().map(variant_line));
    lines
}

pub fn print_process_report(report: &ProcessReport) {
    for line in format_process_report(report) {
        println!("{}", line);
    }
}

// ============================================================================
// Delete and sweep
// ============================================================================

pub fn format_deleted(deleted: &Deleted) -> Vec<String> {
    match deleted {
        Deleted::Soft(record) => vec![format!("{} soft deleted", record_label(record))],
        Deleted::Hard { record, blobs } => {
            let mut lines = vec![format!(
                "{} deleted, {} blobs removed",
                record_label(record),
                blobs.len()
            )];
            lines.extend(blobs.iter().map(|k| format!("{}{k}", indent(1))));
            lines
        }
    }
}

pub fn print_deleted(deleted: &Deleted) {
    for line in format_deleted(deleted) {
        println!("{}", line);
    }
}

pub fn format_sweep(report: &SweepReport) -> Vec<String> {
    let noun = if report.orphans.len() == 1 { "orphan" } else { "orphans" };
    let header = if report.dry_run {
        format!("Disk {}: {} {noun} (dry run)", report.disk, report.orphans.len())
    } else {
        format!(
            "Disk {}: {} {noun}, {} removed",
            report.disk,
            report.orphans.len(),
            report.removed.len()
        )
    };
    let mut lines = vec![header];
    lines.extend(report.orphans.iter().map(|k| format!("{}{k}", indent(1))));
    if !report.recent.is_empty() {
        lines.push(format!(
            "{} unreferenced, kept inside the grace window",
            report.recent.len()
        ));
    }
    lines
}

pub fn print_sweep(report: &SweepReport) {
    for line in format_sweep(report) {
        println!("{}", line);
    }
}
