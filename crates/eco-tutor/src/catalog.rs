//! Assignment catalog seeding.
//!
//! A catalog is a JSON file listing assignments with their articles:
//!
//! ```json
//! { "assignments": [ { "id": "...", "professorId": "...", "title": "...", "article": { ... } } ] }
//! ```
//!
//! Loading it at startup inserts every assignment the store does not hold
//! yet. Entries already present are left untouched.

use std::path::Path;

use serde::Deserialize;
use tracing::{debug, info};

use crate::error::{Result, TutorError};
use crate::review::validate_article;
use crate::session::Assignment;
use crate::store::TutorStore;

/// Largest accepted article body, in bytes.
pub const MAX_ARTICLE_BYTES: usize = 200 * 1024;

/// A parsed assignment catalog.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Catalog {
    /// Assignments to seed.
    #[serde(default)]
    pub assignments: Vec<Assignment>,
}

impl Catalog {
    /// Reads and checks a catalog file.
    ///
    /// # Errors
    ///
    /// - `TutorError::CatalogNotFound` if the file does not exist
    /// - `TutorError::ConfigParseError` if it is not a valid catalog
    /// - `TutorError::ArticleTooLarge` if an article exceeds 200 KB
    /// - `TutorError::Validation` if an article lacks a title or content
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(TutorError::catalog_not_found(path));
        }
        let contents = std::fs::read_to_string(path)?;
        let catalog: Self = serde_json::from_str(&contents)
            .map_err(|e| TutorError::config_parse(path, e.to_string()))?;

        for assignment in &catalog.assignments {
            let bytes = assignment.article.content.len();
            if bytes > MAX_ARTICLE_BYTES {
                return Err(TutorError::article_too_large(
                    assignment.article.title.clone(),
                    u64::try_from(bytes / 1024).unwrap_or(u64::MAX),
                ));
            }
            validate_article(&assignment.article)?;
        }
        Ok(catalog)
    }

    /// Inserts missing assignments and returns how many were added.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn seed(self, store: &dyn TutorStore) -> Result<usize> {
        let mut added = 0;
        for assignment in self.assignments {
            let id = assignment.id;
            let title = assignment.title.clone();
            if store.insert_assignment(assignment).await? {
                debug!(assignment_id = %id, title = %title, "Seeded assignment");
                added += 1;
            }
        }
        info!(added, "Catalog loaded");
        Ok(added)
    }
}
