//! JSON transcript export.
//!
//! [`JsonGenerator`] serializes a [`TranscriptReport`] either compactly or
//! pretty-printed, and can write it straight to a file.
//!
//! # Example
//!
//! ```rust
//! use chrono::Utc;
//! use eco_report::json::JsonGenerator;
//! use eco_report::{ArticleInfo, TranscriptReport};
//!
//! let report = TranscriptReport {
//!     assignment_title: "Week 1".to_string(),
//!     article: ArticleInfo {
//!         title: "Scale".to_string(),
//!         author: "Levin".to_string(),
//!         year: 1992,
//!     },
//!     session_id: "s-1".to_string(),
//!     student_id: "student-1".to_string(),
//!     stage: "Comprehension Building".to_string(),
//!     user_message_count: 0,
//!     started_at: Utc::now(),
//!     last_activity_at: Utc::now(),
//!     entries: vec![],
//!     grade: None,
//! };
//!
//! let generator = JsonGenerator::new(&report);
//! let compact = generator.generate().unwrap();
//! assert!(!compact.contains('\n'));
//! ```

use std::fs::File;
use std::io::Write;
use std::path::Path;

use crate::{ReportError, Result, TranscriptReport};

/// JSON transcript generator.
pub struct JsonGenerator<'a> {
    report: &'a TranscriptReport,
}

impl<'a> JsonGenerator<'a> {
    /// Creates a new JSON generator for the given report.
    #[must_use]
    pub const fn new(report: &'a TranscriptReport) -> Self {
        Self { report }
    }

    /// Generates compact JSON output (single line, no extra whitespace).
    ///
    /// # Errors
    ///
    /// Returns [`ReportError::Serialization`] if JSON serialization fails.
    pub fn generate(&self) -> Result<String> {
        serde_json::to_string(self.report).map_err(ReportError::from)
    }

    /// Generates pretty-printed JSON output with indentation.
    ///
    /// # Errors
    ///
    /// Returns [`ReportError::Serialization`] if JSON serialization fails.
    pub fn generate_pretty(&self) -> Result<String> {
        serde_json::to_string_pretty(self.report).map_err(ReportError::from)
    }

    /// Writes the JSON transcript to a file, replacing any existing file.
    /// Parent directories must exist.
    ///
    /// # Errors
    ///
    /// Returns [`ReportError::Serialization`] if JSON serialization fails.
    /// Returns [`ReportError::Io`] if file creation or writing fails.
    pub fn write_to_file(&self, path: &Path, pretty: bool) -> Result<()> {
        let json = if pretty {
            self.generate_pretty()?
        } else {
            self.generate()?
        };

        let mut file = File::create(path)?;
        file.write_all(json.as_bytes())?;

        Ok(())
    }
}
