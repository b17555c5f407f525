//! The three generation paths behind one trait.
//!
//! Strategies only build payloads and invoke the provider; every delta they
//! produce flows through the same `StreamChunk` channel, and the session
//! controller owns throttling, persistence and lifecycle.

use anyhow::Result;
use async_trait::async_trait;
use providers::chat::{plain_messages, vision_messages, ChatClient, SamplingKnobs};
use providers::search::SearchClient;
use shared::agent_api::{Attachment, ChatMessage, StreamChunk};
use shared::events::{SearchHit, SearchStatus};
use shared::settings::AppSettings;
use std::sync::Arc;
use storage::ChatStore;
use tokio::sync::mpsc::UnboundedSender;
use tracing::debug;

pub const SYSTEM_PROMPT: &str = "You are a helpful AI assistant.";

/// Sampling temperature for answers grounded in search results.
const SEARCH_TEMPERATURE: f32 = 0.3;

const NO_RESULTS_MARKER: &str = "No relevant search results found.";

/// What a strategy needs to build its request.
pub struct PromptContext {
    pub prompt: String,
    pub conversation_id: Option<i64>,
    pub attachments: Vec<Attachment>,
}

#[async_trait]
pub trait GenerationStrategy: Send + Sync {
    /// Build the request payload, invoke the provider, and feed deltas into
    /// `tx`. A failure before the first delta leaves the channel untouched
    /// apart from any search-status events already sent, which are never
    /// retracted.
    async fn generate(&self, ctx: &PromptContext, tx: &UnboundedSender<StreamChunk>) -> Result<()>;
}

/// Rolling-history chat against the text model.
pub struct PlainChat {
    pub client: ChatClient,
    pub store: Arc<ChatStore>,
    pub settings: AppSettings,
    pub reasoning: bool,
}

/// The stored window ends with the user turn persisted at send time; that
/// turn is re-appended as the prompt, so it is dropped from the context.
fn context_window(mut history: Vec<ChatMessage>, prompt: &str) -> Vec<ChatMessage> {
    if history
        .last()
        .is_some_and(|m| m.role == "user" && m.content == prompt)
    {
        history.pop();
    }
    history
}

#[async_trait]
impl GenerationStrategy for PlainChat {
    async fn generate(&self, ctx: &PromptContext, tx: &UnboundedSender<StreamChunk>) -> Result<()> {
        let history = match ctx.conversation_id {
            Some(id) => context_window(
                self.store.recent_messages(id, self.settings.history_window)?,
                &ctx.prompt,
            ),
            None => Vec::new(),
        };
        debug!(turns = history.len(), reasoning = self.reasoning, "plain chat");

        let messages = plain_messages(SYSTEM_PROMPT, &history, &ctx.prompt);
        let knobs = SamplingKnobs {
            reasoning: self.reasoning.then(|| self.settings.reasoning.clone()),
            temperature: None,
        };
        self.client
            .stream_completion(&self.settings.model.chat_model, messages, &knobs, tx)
            .await?;
        Ok(())
    }
}

/// Context-free single turn against the vision model.
pub struct VisionChat {
    pub client: ChatClient,
    pub settings: AppSettings,
}

#[async_trait]
impl GenerationStrategy for VisionChat {
    async fn generate(&self, ctx: &PromptContext, tx: &UnboundedSender<StreamChunk>) -> Result<()> {
        debug!(images = ctx.attachments.len(), "vision chat");
        let messages = vision_messages(&ctx.prompt, &ctx.attachments);
        self.client
            .stream_completion(
                &self.settings.model.vision_model,
                messages,
                &SamplingKnobs::default(),
                tx,
            )
            .await?;
        Ok(())
    }
}

/// Two-phase web-augmented chat: retrieve, then generate with citations.
pub struct WebSearchChat {
    pub client: ChatClient,
    pub search: SearchClient,
    pub settings: AppSettings,
}

/// Render ranked results into the context block the model cites from.
fn format_search_context(hits: &[SearchHit]) -> String {
    if hits.is_empty() {
        return NO_RESULTS_MARKER.to_string();
    }
    hits.iter()
        .enumerate()
        .map(|(i, hit)| {
            format!(
                "Source {}: {}\nTitle: {}\nContent: {}",
                i + 1,
                if hit.url.is_empty() { "Unknown URL" } else { &hit.url },
                if hit.title.is_empty() { "Untitled" } else { &hit.title },
                hit.content
            )
        })
        .collect::<Vec<_>>()
        .join("\n---\n")
}

fn search_system_prompt(prompt: &str, context: &str) -> String {
    format!(
        "You are a helpful AI assistant with access to real-time web search results.\n\
         User's question: {prompt}\n\n\
         Here are the search results from the web:\n{context}\n\n\
         Please answer the user's question comprehensively based on the search results above.\n\
         If the search results don't contain the answer, say so, but try to answer from your own knowledge if possible.\n\
         Cite your sources using [Source X] format if you use information from them."
    )
}

#[async_trait]
impl GenerationStrategy for WebSearchChat {
    async fn generate(&self, ctx: &PromptContext, tx: &UnboundedSender<StreamChunk>) -> Result<()> {
        // Phase 1: retrieval. The searching status goes out first and is
        // never retracted, even if generation later fails.
        let _ = tx.send(StreamChunk::Search(SearchStatus::searching()));
        let hits = self
            .search
            .search(&ctx.prompt, self.settings.search_top_k)
            .await?;
        let _ = tx.send(StreamChunk::Search(SearchStatus::done(hits.clone())));
        debug!(results = hits.len(), "search phase done");

        // Phase 2: cited generation at low temperature. Empty results
        // degrade to a marker, not an error.
        let context = format_search_context(&hits);
        let messages = plain_messages(&search_system_prompt(&ctx.prompt, &context), &[], &ctx.prompt);
        let knobs = SamplingKnobs {
            reasoning: None,
            temperature: Some(SEARCH_TEMPERATURE),
        };
        self.client
            .stream_completion(&self.settings.model.chat_model, messages, &knobs, tx)
            .await?;
        Ok(())
    }
}
