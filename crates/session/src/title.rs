//! Detached, best-effort conversation titling.
//!
//! Runs off the main stream; failures are swallowed entirely and never
//! reach the consumer or the primary response path. The overwrite is a
//! single UPDATE, so a double trigger (lazy creation plus post-send
//! backfill) is harmless.

use providers::chat::ChatClient;
use shared::events::UiEvent;
use std::sync::Arc;
use storage::ChatStore;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, warn};

pub const TITLE_INSTRUCTION: &str = "Summarize the user message into a short title (within 10 words). Do not contain punctuation marks.";

const MAX_TITLE_CHARS: usize = 60;

/// Fire-and-forget: summarize `prompt`, overwrite the stored title, notify
/// the consumer. Keyed by conversation; errors end the task silently.
pub fn spawn_title_task(
    client: ChatClient,
    model: String,
    store: Arc<ChatStore>,
    events: UnboundedSender<UiEvent>,
    conversation_id: i64,
    prompt: String,
) {
    tokio::spawn(async move {
        let Some(title) = generate_title(&client, &model, &prompt).await else {
            return;
        };
        match store.update_conversation_title(conversation_id, &title) {
            Ok(()) => {
                debug!(conversation_id, title = %title, "conversation titled");
                let _ = events.send(UiEvent::TitleUpdated);
            }
            Err(err) => warn!(conversation_id, error = %err, "failed to store title"),
        }
    });
}

async fn generate_title(client: &ChatClient, model: &str, prompt: &str) -> Option<String> {
    let messages = vec![
        serde_json::json!({ "role": "system", "content": TITLE_INSTRUCTION }),
        serde_json::json!({ "role": "user", "content": prompt }),
    ];
    match client.complete(model, messages).await {
        Ok(raw) => {
            let title = clean_title(&raw);
            (!title.is_empty()).then_some(title)
        }
        Err(err) => {
            debug!(error = %err, "title generation failed");
            None
        }
    }
}

fn clean_title(raw: &str) -> String {
    let cleaned = raw
        .trim()
        .trim_matches('"')
        .trim_matches('\'')
        .lines()
        .next()
        .unwrap_or_default()
        .trim();
    cleaned.chars().take(MAX_TITLE_CHARS).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_title_strips_quotes_and_extra_lines() {
        assert_eq!(
            clean_title("\"Weather in Lisbon\"\nSecond line"),
            "Weather in Lisbon"
        );
    }

    #[test]
    fn test_clean_title_caps_length() {
        let long = "word ".repeat(40);
        assert_eq!(clean_title(&long).chars().count(), MAX_TITLE_CHARS);
    }

    #[test]
    fn test_clean_title_empty_input() {
        assert_eq!(clean_title("  \n "), "");
    }
}
