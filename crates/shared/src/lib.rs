pub mod events;

pub mod agent_api {
    use serde::{Deserialize, Serialize};

    use crate::events::SearchStatus;

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct ChatMessage {
        pub role: String, // "system" | "user" | "assistant"
        pub content: String,
    }

    impl ChatMessage {
        pub fn system(content: impl Into<String>) -> Self {
            Self {
                role: "system".to_string(),
                content: content.into(),
            }
        }

        pub fn user(content: impl Into<String>) -> Self {
            Self {
                role: "user".to_string(),
                content: content.into(),
            }
        }

        pub fn assistant(content: impl Into<String>) -> Self {
            Self {
                role: "assistant".to_string(),
                content: content.into(),
            }
        }
    }

    /// An image attached to a user prompt, carried as an opaque data URI.
    /// Attachment bytes are never persisted, only a textual marker.
    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct Attachment {
        pub data_uri: String,
    }

    /// One unit on the token channel between a generation strategy and the
    /// session controller that pumps it to the consumer.
    #[derive(Debug, Clone)]
    pub enum StreamChunk {
        /// Chain-of-thought text, forwarded unthrottled.
        Reasoning(String),
        /// Answer text, subject to the throttled emitter.
        Content(String),
        /// Web-search progress, emitted before and after the retrieval call.
        Search(SearchStatus),
        Done,
    }
}

pub mod settings {
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct ModelConfig {
        pub base_url: String,
        pub chat_model: String,
        pub vision_model: String,
        pub title_model: String,
    }

    /// Provider knobs applied when reasoning mode is on. These tune the
    /// request payload only; there is no separate reasoning codepath.
    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct ReasoningConfig {
        pub effort: String,
        pub temperature: f32,
        pub max_tokens: u32,
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct AppSettings {
        pub model: ModelConfig,
        pub reasoning: ReasoningConfig,
        /// Upper bound on search results fed into the web-search prompt.
        pub search_top_k: usize,
        /// How many prior messages are loaded as chat context.
        pub history_window: usize,
        /// Minimum interval between coalesced content emissions.
        pub throttle_ms: u64,
        /// Deadline for response headers after a send.
        pub connect_timeout_secs: u64,
    }

    impl Default for ModelConfig {
        fn default() -> Self {
            Self {
                base_url: "https://ark.cn-beijing.volces.com/api/v3".into(),
                chat_model: "deepseek-v3-2-251201".into(),
                vision_model: "doubao-seed-1-6-vision-250815".into(),
                title_model: "deepseek-v3-2-251201".into(),
            }
        }
    }

    impl Default for ReasoningConfig {
        fn default() -> Self {
            Self {
                effort: "high".into(),
                temperature: 0.6,
                max_tokens: 4096,
            }
        }
    }

    impl Default for AppSettings {
        fn default() -> Self {
            Self {
                model: ModelConfig::default(),
                reasoning: ReasoningConfig::default(),
                search_top_k: 5,
                history_window: 20,
                throttle_ms: 50,
                connect_timeout_secs: 15,
            }
        }
    }
}
