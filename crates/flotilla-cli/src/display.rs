//! Display formatting for CLI output
//!
//! Provides structured display for:
//! - Validation reports grouped by document
//! - Sync summaries with per-release diffs

use console::style;
use flotilla_core::{MessageLevel, ValidationReport};
use flotilla_kube::{ReleaseDiff, SyncSummary};
use std::collections::BTreeMap;
use std::io::{self, Write};

/// Format count with proper pluralization
pub fn pluralize(count: usize, singular: &str, plural: &str) -> String {
    if count == 1 {
        format!("{} {}", count, singular)
    } else {
        format!("{} {}", count, plural)
    }
}

/// Renderer for validation reports and sync summaries
pub struct ReportRenderer {
    writer: Box<dyn Write>,
}

impl Default for ReportRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl ReportRenderer {
    /// Create a new renderer that writes to stdout
    pub fn new() -> Self {
        Self {
            writer: Box::new(io::stdout()),
        }
    }

    /// Create a renderer that writes to a custom writer (for testing)
    #[cfg(test)]
    pub fn with_writer<W: Write + 'static>(writer: W) -> Self {
        Self {
            writer: Box::new(writer),
        }
    }

    /// Render validation messages grouped by document, then a summary line
    pub fn render_validation(&mut self, report: &ValidationReport) -> io::Result<()> {
        let mut by_document: BTreeMap<&str, Vec<_>> = BTreeMap::new();
        for message in &report.messages {
            if message.level == MessageLevel::Info {
                continue;
            }
            let key = message.document.as_deref().unwrap_or("document set");
            by_document.entry(key).or_default().push(message);
        }

        for (document, messages) in by_document {
            writeln!(self.writer)?;
            writeln!(self.writer, "{}", style(document).cyan().bold())?;

            for message in messages {
                let icon = match message.level {
                    MessageLevel::Error => style("✗").red(),
                    MessageLevel::Warning => style("⚠").yellow(),
                    MessageLevel::Info => style("→").blue(),
                };
                writeln!(self.writer, "  {} {}", icon, message.text)?;
            }
        }

        let warnings = report
            .messages
            .iter()
            .filter(|m| m.level == MessageLevel::Warning)
            .count();

        writeln!(self.writer)?;
        if report.error_count > 0 {
            writeln!(
                self.writer,
                "{} Validation failed: {}, {}",
                style("✗").red().bold(),
                pluralize(report.error_count, "error", "errors"),
                pluralize(warnings, "warning", "warnings")
            )?;
        } else if warnings > 0 {
            writeln!(
                self.writer,
                "{} Validation passed with {}",
                style("⚠").yellow().bold(),
                pluralize(warnings, "warning", "warnings")
            )?;
        } else {
            writeln!(self.writer, "{} Validation passed!", style("✓").green().bold())?;
        }

        Ok(())
    }

    /// Render what a sync did
    pub fn render_summary(&mut self, summary: &SyncSummary, dry_run: bool) -> io::Result<()> {
        let verb = |done: &'static str, planned: &'static str| if dry_run { planned } else { done };

        self.release_list(&summary.purged, verb("Purged", "Would purge"), "✗")?;
        self.release_list(&summary.installed, verb("Installed", "Would install"), "✓")?;
        self.release_list(&summary.upgraded, verb("Upgraded", "Would upgrade"), "✓")?;
        self.release_list(&summary.unchanged, "Unchanged", "•")?;
        self.release_list(&summary.uninstalled, verb("Uninstalled", "Would uninstall"), "✗")?;

        for diff in summary.diff.iter().filter(|d| !d.is_empty()) {
            self.render_diff(diff)?;
        }

        if !summary.tests.passed.is_empty() || !summary.tests.failed.is_empty() {
            writeln!(self.writer)?;
            writeln!(self.writer, "{}", style("Tests").bold())?;
            for name in &summary.tests.passed {
                writeln!(self.writer, "  {} {}", style("✓").green(), name)?;
            }
            for name in &summary.tests.failed {
                writeln!(self.writer, "  {} {}", style("✗").red(), name)?;
            }
        }

        writeln!(self.writer)?;
        if summary.is_noop() {
            writeln!(self.writer, "{} Nothing to do", style("✓").green().bold())?;
        } else {
            let changed = summary.installed.len()
                + summary.upgraded.len()
                + summary.uninstalled.len()
                + summary.purged.len();
            writeln!(
                self.writer,
                "{} {} {}",
                style("✓").green().bold(),
                pluralize(changed, "release", "releases"),
                if dry_run { "would change" } else { "changed" }
            )?;
        }

        Ok(())
    }

    /// Render the chart and values diff of one release
    pub fn render_diff(&mut self, diff: &ReleaseDiff) -> io::Result<()> {
        writeln!(self.writer)?;
        writeln!(self.writer, "{} {}", style("Diff").bold(), style(&diff.release).cyan())?;

        for line in diff.chart.iter().chain(&diff.values) {
            let styled = if line.starts_with("+++") || line.starts_with("---") {
                style(line.as_str()).bold()
            } else if line.starts_with('+') {
                style(line.as_str()).green()
            } else if line.starts_with('-') {
                style(line.as_str()).red()
            } else if line.starts_with("@@") {
                style(line.as_str()).cyan()
            } else {
                style(line.as_str()).dim()
            };
            writeln!(self.writer, "  {}", styled)?;
        }

        Ok(())
    }

    fn release_list(&mut self, names: &[String], heading: &str, icon: &str) -> io::Result<()> {
        if names.is_empty() {
            return Ok(());
        }

        writeln!(self.writer, "{} {}:", style("→").blue(), style(heading).bold())?;
        for name in names {
            writeln!(self.writer, "  {} {}", icon, style(name).cyan())?;
        }
        Ok(())
    }
}
