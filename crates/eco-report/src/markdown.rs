//! Markdown transcript rendering.
//!
//! The rendered document contains:
//!
//! - A summary table (article, student, stage, turn counts)
//! - The conversation in ordinal order, with tutor citations as link lists
//! - The grade with its rubric breakdown, when present
//!
//! Student text is escaped so it cannot inject formatting. Tutor text is
//! generated Markdown and is rendered as-is inside a blockquote.

use chrono::{DateTime, Utc};
use std::fmt::Write;

use crate::{GradeSummary, Speaker, TranscriptEntry, TranscriptReport};

/// Generates Markdown transcripts.
pub struct MarkdownGenerator<'a> {
    report: &'a TranscriptReport,
    footer: bool,
}

impl<'a> MarkdownGenerator<'a> {
    /// Creates a new Markdown generator for the given report.
    #[must_use]
    pub const fn new(report: &'a TranscriptReport) -> Self {
        Self {
            report,
            footer: true,
        }
    }

    /// Omits the timestamped footer, making output deterministic.
    #[must_use]
    pub const fn without_footer(mut self) -> Self {
        self.footer = false;
        self
    }

    /// Generates the complete Markdown transcript.
    #[must_use]
    pub fn generate(&self) -> String {
        let mut output = String::new();

        self.write_title(&mut output);
        self.write_summary(&mut output);
        self.write_conversation(&mut output);
        self.write_grade(&mut output);
        if self.footer {
            Self::write_footer(&mut output);
        }

        output
    }

    fn write_title(&self, output: &mut String) {
        let _ = writeln!(
            output,
            "# Transcript: {}\n",
            escape_markdown(&self.report.assignment_title)
        );
    }

    fn write_summary(&self, output: &mut String) {
        let report = self.report;
        let article = &report.article;

        let _ = writeln!(output, "## Summary\n");
        let _ = writeln!(output, "| Field | Value |");
        let _ = writeln!(output, "|-------|-------|");
        let _ = writeln!(
            output,
            "| Article | {} ({}, {}) |",
            escape_markdown(&article.title),
            escape_markdown(&article.author),
            article.year
        );
        let _ = writeln!(output, "| Student | `{}` |", report.student_id);
        let _ = writeln!(output, "| Session | `{}` |", report.session_id);
        let _ = writeln!(output, "| Stage | {} |", escape_markdown(&report.stage));
        let _ = writeln!(
            output,
            "| Student turns | {} |",
            report.user_message_count
        );
        let _ = writeln!(
            output,
            "| Sources cited | {} |",
            report.citation_count()
        );
        let _ = writeln!(
            output,
            "| Started | {} |",
            format_timestamp(&report.started_at)
        );
        let _ = writeln!(
            output,
            "| Last activity | {} |",
            format_timestamp(&report.last_activity_at)
        );
        let _ = writeln!(output);
    }

    fn write_conversation(&self, output: &mut String) {
        let _ = writeln!(output, "## Conversation\n");

        if self.report.entries.is_empty() {
            let _ = writeln!(output, "*No messages.*\n");
            return;
        }

        for entry in &self.report.entries {
            Self::write_entry(output, entry);
        }
    }

    fn write_entry(output: &mut String, entry: &TranscriptEntry) {
        let _ = writeln!(
            output,
            "### {}. {} ({})\n",
            entry.ordinal,
            entry.speaker.label(),
            format_timestamp(&entry.at)
        );

        let body = match entry.speaker {
            Speaker::Student => escape_markdown_block(&entry.text),
            Speaker::Tutor => entry.text.clone(),
        };
        for line in body.lines() {
            if line.is_empty() {
                let _ = writeln!(output, ">");
            } else {
                let _ = writeln!(output, "> {line}");
            }
        }
        let _ = writeln!(output);

        if !entry.citations.is_empty() {
            let _ = writeln!(output, "**Sources**:\n");
            for citation in &entry.citations {
                let _ = writeln!(
                    output,
                    "- [{}](<{}>)",
                    escape_markdown(&citation.title),
                    citation.uri.replace('>', "%3E")
                );
            }
            let _ = writeln!(output);
        }
    }

    fn write_grade(&self, output: &mut String) {
        let _ = writeln!(output, "## Grade\n");

        let Some(grade) = &self.report.grade else {
            let _ = writeln!(output, "*Not graded yet.*\n");
            return;
        };
        Self::write_grade_details(output, grade);
    }

    fn write_grade_details(output: &mut String, grade: &GradeSummary) {
        if let Some(score) = grade.overall_score {
            let _ = writeln!(output, "**Overall score**: {}\n", format_points(score));
        }

        if !grade.rubric.is_empty() {
            let _ = writeln!(output, "| Criterion | Score |");
            let _ = writeln!(output, "|-----------|-------|");
            for item in &grade.rubric {
                let _ = writeln!(
                    output,
                    "| {} | {} / {} |",
                    escape_markdown(&item.criterion),
                    format_points(item.score),
                    format_points(item.max_points)
                );
            }
            let _ = writeln!(output);
        }

        if let Some(feedback) = grade.feedback.as_deref().filter(|f| !f.trim().is_empty()) {
            let _ = writeln!(output, "**Feedback**: {}\n", escape_markdown(feedback));
        }

        let _ = writeln!(
            output,
            "*Graded at {}*\n",
            format_timestamp(&grade.graded_at)
        );
    }

    fn write_footer(output: &mut String) {
        let _ = writeln!(output, "---");
        let timestamp = format_timestamp(&Utc::now());
        let _ = writeln!(output, "*Generated by Eco Tutor at {timestamp}*");
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Formats a timestamp as "YYYY-MM-DD HH:MM:SS UTC".
fn format_timestamp(dt: &DateTime<Utc>) -> String {
    dt.format("%Y-%m-%d %H:%M:%S UTC").to_string()
}

/// Formats points without a trailing ".0" for whole numbers.
fn format_points(points: f64) -> String {
    let rounded = (points * 100.0).round() / 100.0;
    if rounded.fract() == 0.0 {
        format!("{rounded:.0}")
    } else {
        format!("{rounded}")
    }
}

/// Escapes special Markdown characters in single-line text such as table cells.
fn escape_markdown(text: &str) -> String {
    let mut result = String::with_capacity(text.len());

    for ch in text.chars() {
        match ch {
            '*' | '_' | '`' | '#' | '[' | ']' | '(' | ')' | '!' | '\\' | '<' | '>' | '|' => {
                result.push('\\');
                result.push(ch);
            }
            '\n' => result.push_str("<br>"),
            _ => result.push(ch),
        }
    }

    result
}

/// Escapes Markdown in multi-line text, keeping line breaks.
fn escape_markdown_block(text: &str) -> String {
    text.lines()
        .map(escape_markdown)
        .collect::<Vec<_>>()
        .join("\n")
}

// ============================================================================
// Tests
// ============================================================================
