//! The AI turn generator seam.
//!
//! The controller treats the language model as an opaque, slow and fallible
//! collaborator behind [`TurnGenerator`]. Production uses the Gemini adapter in
//! [`crate::gemini`]; tests inject scripted generators.

use async_trait::async_trait;

use crate::error::Result;
use crate::session::{Article, Message, Sender, Source};
use crate::stage::Stage;

/// Text persisted as the tutor's turn when generation fails or times out.
pub const FALLBACK_REPLY: &str = "I'm having trouble processing that. Could you rephrase?";

/// Everything the generator sees for one tutor turn.
#[derive(Debug, Clone, Copy)]
pub struct TurnRequest<'a> {
    /// The article under discussion.
    pub article: &'a Article,
    /// Prior transcript, ordered by ordinal, excluding the new user message.
    pub history: &'a [Message],
    /// The student's new message.
    pub user_text: &'a str,
    /// Stage after counting the new message.
    pub stage: Stage,
    /// Persona name the tutor answers as.
    pub tutor_name: &'a str,
}

impl TurnRequest<'_> {
    /// History as `(sender, text)` pairs, the shape most providers expect.
    pub fn turns(&self) -> impl Iterator<Item = (Sender, &str)> + '_ {
        self.history.iter().map(|m| (m.sender, m.text.as_str()))
    }
}

/// A generated tutor turn.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TurnReply {
    /// Response text.
    pub text: String,
    /// Web citations backing the response.
    pub sources: Vec<Source>,
}

impl TurnReply {
    /// A reply without citations.
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            sources: Vec::new(),
        }
    }
}

/// Produces the tutor's next turn.
#[async_trait]
pub trait TurnGenerator: Send + Sync {
    /// Generates a reply to `request.user_text`.
    ///
    /// # Errors
    ///
    /// Returns `TutorError::LlmApiError` when the provider fails. Callers
    /// recover with [`FALLBACK_REPLY`].
    async fn generate(&self, request: TurnRequest<'_>) -> Result<TurnReply>;
}

/// Builds the system instruction shared by provider adapters.
#[must_use]
pub fn system_instruction(request: &TurnRequest<'_>) -> String {
    let article = request.article;
    let mut prompt = format!(
        "You are '{name}', an AI Teaching Assistant for a university-level landscape ecology course. \
Your purpose is to help students deeply understand a scientific article through Socratic dialogue.\n\n\
Core principles:\n\
- Use the Socratic method: ask guiding questions rather than handing out answers.\n\
- Be encouraging and patient.\n\
- Stay grounded in the article, quoting it where useful.\n\
- Use web search for current, real-world examples when it helps, and cite your sources.\n\
- Keep responses concise and end with a question that moves the discussion forward.\n\n\
Article: \"{title}\" by {author} ({year})\n",
        name = request.tutor_name,
        title = article.title,
        author = article.author,
        year = article.year,
    );
    if !article.learning_objectives.is_empty() {
        prompt.push_str("Learning objectives:\n");
        for objective in &article.learning_objectives {
            prompt.push_str("- ");
            prompt.push_str(objective);
            prompt.push('\n');
        }
    }
    if !article.key_concepts.is_empty() {
        prompt.push_str("Key concepts: ");
        prompt.push_str(&article.key_concepts.join(", "));
        prompt.push('\n');
    }
    prompt.push_str("\nArticle content:\n");
    prompt.push_str(&article.content);
    prompt.push_str("\n\nCurrent Stage: ");
    prompt.push_str(request.stage.title());
    prompt.push_str("\nGuidance: ");
    prompt.push_str(request.stage.guidance());
    prompt
}
