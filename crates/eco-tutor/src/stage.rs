//! Pedagogical stages and the stage progression policy.
//!
//! A session moves through four ordered stages. Progression is driven only by
//! the number of student turns: every third turn moves the session one stage
//! forward until it reaches [`Stage::Advanced`].

use serde::{Deserialize, Serialize};

/// Number of student turns between stage advances.
pub const STAGE_ADVANCE_INTERVAL: u32 = 3;

/// One of the four ordered phases of a tutoring session.
///
/// Ordering follows declaration order, so `Stage::Comprehension < Stage::Advanced`.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum Stage {
    /// Building an understanding of the core arguments (initial stage).
    #[default]
    Comprehension,
    /// Locating and citing evidence in the article.
    Evidence,
    /// Evaluating methodology, strengths and weaknesses.
    Analysis,
    /// Connecting the article to broader concepts.
    Advanced,
}

impl Stage {
    /// All stages in progression order.
    pub const ALL: [Self; 4] = [
        Self::Comprehension,
        Self::Evidence,
        Self::Analysis,
        Self::Advanced,
    ];

    /// Returns the stage that follows this one, or `None` at the terminal stage.
    ///
    /// # Examples
    ///
    /// ```
    /// use eco_tutor::Stage;
    ///
    /// assert_eq!(Stage::Comprehension.next(), Some(Stage::Evidence));
    /// assert_eq!(Stage::Advanced.next(), None);
    /// ```
    #[must_use]
    pub const fn next(self) -> Option<Self> {
        match self {
            Self::Comprehension => Some(Self::Evidence),
            Self::Evidence => Some(Self::Analysis),
            Self::Analysis => Some(Self::Advanced),
            Self::Advanced => None,
        }
    }

    /// Returns `true` for the last stage, which is never left.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Advanced)
    }

    /// Human-readable title shown in transition announcements and transcripts.
    #[must_use]
    pub const fn title(self) -> &'static str {
        match self {
            Self::Comprehension => "Comprehension Building",
            Self::Evidence => "Evidence Gathering",
            Self::Analysis => "Analysis & Evaluation",
            Self::Advanced => "Advanced Synthesis",
        }
    }

    /// Instruction given to the turn generator while a session is in this stage.
    #[must_use]
    pub const fn guidance(self) -> &'static str {
        match self {
            Self::Comprehension => {
                "Focus on core arguments and key terms. Ask what the student understands."
            }
            Self::Evidence => {
                "Help locate key data. Ask students to cite specific evidence from the article."
            }
            Self::Analysis => {
                "Guide evaluation of methodology. Ask about strengths and weaknesses."
            }
            Self::Advanced => {
                "Connect to broader concepts. Use web search for real-world examples."
            }
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Comprehension => "Comprehension",
            Self::Evidence => "Evidence",
            Self::Analysis => "Analysis",
            Self::Advanced => "Advanced",
        };
        f.write_str(name)
    }
}

/// Computes the stage a session is in after its student turn counter reached
/// `user_message_count`.
///
/// Whenever the count is a positive multiple of [`STAGE_ADVANCE_INTERVAL`] the
/// session advances one step; the terminal stage is sticky.
///
/// # Examples
///
/// ```
/// use eco_tutor::{next_stage, Stage};
///
/// assert_eq!(next_stage(Stage::Comprehension, 2), Stage::Comprehension);
/// assert_eq!(next_stage(Stage::Comprehension, 3), Stage::Evidence);
/// assert_eq!(next_stage(Stage::Advanced, 12), Stage::Advanced);
/// ```
#[must_use]
pub const fn next_stage(current: Stage, user_message_count: u32) -> Stage {
    if user_message_count == 0 || user_message_count % STAGE_ADVANCE_INTERVAL != 0 {
        return current;
    }
    match current.next() {
        Some(next) => next,
        None => current,
    }
}
