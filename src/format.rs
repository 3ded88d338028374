//! Output formatting utilities

use crate::delta::DeltaStats;
use crate::types::UploadOutcome;

/// Format file size in human-readable format
pub fn format_size(bytes: u64) -> String {
    human_bytes::human_bytes(bytes as f64)
}

/// Format duration from seconds
pub fn format_duration_secs(secs: f64) -> String {
    if secs < 1.0 {
        format!("{:.0}ms", secs * 1000.0)
    } else if secs < 60.0 {
        format!("{:.1}s", secs)
    } else if secs < 3600.0 {
        let mins = (secs / 60.0).floor();
        let remaining = secs - mins * 60.0;
        format!("{}m {:.0}s", mins as u64, remaining)
    } else {
        let hours = (secs / 3600.0).floor();
        let remaining = secs - hours * 3600.0;
        let mins = (remaining / 60.0).floor();
        format!("{}h {}m", hours as u64, mins as u64)
    }
}

/// Format transfer rate in human-readable format
pub fn format_rate(bytes_per_sec: f64) -> String {
    format!("{}/s", human_bytes::human_bytes(bytes_per_sec))
}

/// Format percentage
pub fn format_percent(value: f64) -> String {
    format!("{:.1}%", value)
}

/// Format a count with a unit
pub fn format_count(count: u64, singular: &str, plural: &str) -> String {
    if count == 1 {
        format!("{} {}", count, singular)
    } else {
        format!("{} {}", count, plural)
    }
}

/// Local delta report (`drivesync diff`)
pub struct DiffReport<'a> {
    pub stats: &'a DeltaStats,
    pub block_size: usize,
    pub threshold_percent: f64,
    pub worthwhile: bool,
}

impl DiffReport<'_> {
    /// Format the diff report
    pub fn format(&self) -> String {
        let stats = self.stats;
        let mut lines = Vec::new();

        lines.push("=== Delta Report ===".to_string());
        lines.push(String::new());
        lines.push(format!("Block size:     {}", format_size(self.block_size as u64)));
        lines.push(format!(
            "Blocks:         {} reused, {} novel",
            stats.reused_blocks,
            format_count(stats.novel_blocks as u64, "block", "blocks")
        ));
        lines.push(format!("Savings:        {}", format_percent(stats.savings_percent)));
        lines.push(format!(
            "Delta payload:  {} (instead of {})",
            format_size(stats.delta_size),
            format_size(stats.original_size)
        ));
        lines.push(String::new());

        if self.worthwhile {
            lines.push(format!(
                "Delta upload would be used (threshold {})",
                format_percent(self.threshold_percent)
            ));
        } else {
            lines.push(format!(
                "Full upload would be used (savings below {})",
                format_percent(self.threshold_percent)
            ));
        }

        lines.join("\n")
    }

    /// Print the report to stdout
    pub fn print(&self) {
        println!("{}", self.format());
    }
}

/// Upload completion report
pub struct UploadReport<'a> {
    pub outcome: &'a UploadOutcome,
    pub duration_secs: f64,
}

impl UploadReport<'_> {
    /// Format the upload report
    pub fn format(&self) -> String {
        let outcome = self.outcome;
        let mut lines = Vec::new();

        lines.push("=== Upload Complete ===".to_string());
        lines.push(String::new());
        lines.push(format!("File id:      {}", outcome.file_id));
        lines.push(format!("Mode:         {}", outcome.mode));
        lines.push(format!("Duration:     {}", format_duration_secs(self.duration_secs)));
        lines.push(String::new());
        lines.push(format!("Data sent:    {}", format_size(outcome.bytes_sent)));

        let saved = outcome.bytes_saved();
        if saved > 0 {
            lines.push(format!(
                "Bandwidth saved: {} ({})",
                format_size(saved),
                format_percent(outcome.stats.savings_percent)
            ));
        }

        if self.duration_secs > 0.0 {
            let rate = outcome.bytes_sent as f64 / self.duration_secs;
            lines.push(format!("Transfer rate:   {}", format_rate(rate)));
        }

        lines.join("\n")
    }

    /// Print the report to stdout
    pub fn print(&self) {
        println!("{}", self.format());
    }
}
