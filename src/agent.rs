//! Question answering over the combined document.
//!
//! The agent never sees page images or raw per-page files. Its context is the
//! same text report the `report` command prints, with more rows per table,
//! capped at [`MAX_CONTEXT_CHARS`]. Each question is sent together with the
//! conversation so far, so follow-ups like "and the year before?" work.

use crate::config::ExtractionConfig;
use crate::error::BudgetError;
use crate::pipeline::llm::{call_with_retry, BackendError, ModelBackend};
use crate::prompts::agent_system_prompt;
use crate::record::CombinedDocument;
use crate::report::{render_report, ReportOptions};
use edgequake_llm::ChatMessage;
use std::sync::Arc;
use tracing::{debug, info};

/// Upper bound on the data context sent with every question.
pub const MAX_CONTEXT_CHARS: usize = 60_000;

/// Rows per ranked table in the context.
const CONTEXT_TOP: usize = 40;

/// One question and its answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exchange {
    pub question: String,
    pub answer: String,
}

/// Answers questions about one budget.
pub struct BudgetAgent {
    backend: Arc<dyn ModelBackend>,
    config: ExtractionConfig,
    system_prompt: String,
    history: Vec<Exchange>,
}

impl BudgetAgent {
    /// Build an agent with default retry and sampling settings.
    pub fn new(backend: Arc<dyn ModelBackend>, doc: &CombinedDocument) -> Self {
        let config = ExtractionConfig {
            max_tokens: 8192,
            ..ExtractionConfig::default()
        };
        Self::with_config(backend, doc, config)
    }

    /// Build an agent that retries and samples per `config`.
    pub fn with_config(backend: Arc<dyn ModelBackend>, doc: &CombinedDocument, config: ExtractionConfig) -> Self {
        let context = build_context(doc);
        debug!("Agent context: {} chars", context.len());
        Self {
            backend,
            config,
            system_prompt: agent_system_prompt(&context),
            history: Vec::new(),
        }
    }

    pub fn history(&self) -> &[Exchange] {
        &self.history
    }

    pub fn clear_history(&mut self) {
        self.history.clear();
    }

    /// Ask a question; the exchange is appended to the history on success.
    pub async fn ask(&mut self, question: &str) -> Result<String, BudgetError> {
        let question = question.trim();
        if question.is_empty() {
            return Err(BudgetError::InvalidConfig("question is empty".into()));
        }

        let mut messages = Vec::with_capacity(2 + self.history.len() * 2);
        messages.push(ChatMessage::system(self.system_prompt.as_str()));
        for exchange in &self.history {
            messages.push(ChatMessage::user(exchange.question.as_str()));
            messages.push(ChatMessage::assistant(exchange.answer.as_str()));
        }
        messages.push(ChatMessage::user(question));

        let answered = call_with_retry(self.backend.as_ref(), "Agent", &messages, &self.config, |_, _| {})
            .await
            .map_err(|failure| match failure.error {
                BackendError::Unauthorized(detail) => BudgetError::Unauthorized { detail },
                other => BudgetError::ModelFailed {
                    detail: format!("{other} (after {} attempt(s))", failure.attempts),
                },
            })?;
        info!(
            "Agent answered ({} in / {} out tokens)",
            answered.reply.input_tokens, answered.reply.output_tokens
        );

        let answer = answered.reply.content;
        self.history.push(Exchange {
            question: question.to_string(),
            answer: answer.clone(),
        });
        Ok(answer)
    }
}

/// Text context for the agent, bounded by [`MAX_CONTEXT_CHARS`].
pub fn build_context(doc: &CombinedDocument) -> String {
    let options = ReportOptions {
        top: CONTEXT_TOP,
        ..ReportOptions::default()
    };
    let mut context = render_report(doc, &options);

    context.push_str("\nPages\n");
    for entry in &doc.pages_manifest {
        context.push_str(&format!(
            "p{} {} | {} | {} | {} items\n",
            entry.page,
            entry.page_type,
            entry.fund.as_deref().unwrap_or("-"),
            entry.department.as_deref().unwrap_or("-"),
            entry.items_extracted
        ));
    }

    if context.len() > MAX_CONTEXT_CHARS {
        let mut cut = MAX_CONTEXT_CHARS;
        while !context.is_char_boundary(cut) {
            cut -= 1;
        }
        context.truncate(cut);
        context.push_str("\n[truncated]");
    }
    context
}
