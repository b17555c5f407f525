//! Typed event channel between the session controller and its consumer.
//!
//! The consumer (a UI, a test harness) subscribes to a single stream of
//! `UiEvent`s instead of registering per-name callbacks, so token, status
//! and lifecycle notifications stay in separate variants of one enum.

use serde::{Deserialize, Serialize};

/// Progress of the web-search phase of a send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchPhase {
    Searching,
    Done,
}

/// One ranked document from the search provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub title: String,
    pub url: String,
    pub content: String,
}

/// Attached to the in-progress assistant message while a web-search send
/// runs. Not persisted; only the final generated text is stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchStatus {
    pub phase: SearchPhase,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub results: Option<Vec<SearchHit>>,
}

impl SearchStatus {
    pub fn searching() -> Self {
        Self {
            phase: SearchPhase::Searching,
            results: None,
        }
    }

    pub fn done(results: Vec<SearchHit>) -> Self {
        Self {
            phase: SearchPhase::Done,
            results: Some(results),
        }
    }
}

/// Everything the session controller tells its consumer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum UiEvent {
    /// A coalesced run of answer text.
    StreamChunk(String),
    /// A run of chain-of-thought text, ordered independently of content.
    StreamReasoning(String),
    SearchUpdate(SearchStatus),
    /// Exactly one per send, whatever the outcome.
    StreamEnd,
    /// A lazily created conversation was assigned this id.
    ConversationCreated(i64),
    /// A background title task overwrote the stored title.
    TitleUpdated,
    AppError(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_search_status_serializes_phase_lowercase() {
        let json = serde_json::to_string(&SearchStatus::searching()).unwrap();
        assert!(json.contains("\"searching\""));
        assert!(!json.contains("results"));
    }

    #[test]
    fn test_search_status_done_keeps_result_order() {
        let status = SearchStatus::done(vec![
            SearchHit {
                title: "a".into(),
                url: "https://a".into(),
                content: "first".into(),
            },
            SearchHit {
                title: "b".into(),
                url: "https://b".into(),
                content: "second".into(),
            },
        ]);
        let results = status.results.unwrap();
        assert_eq!(results[0].content, "first");
        assert_eq!(results[1].content, "second");
    }
}
