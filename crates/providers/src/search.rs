//! Search provider client for web-augmented chat.
//!
//! The retrieval step is an opaque ranked-document service; this client
//! only bounds the result count and maps the wire fields onto `SearchHit`.

use reqwest::Client;
use serde::{Deserialize, Serialize};
use shared::events::SearchHit;
use std::sync::LazyLock;
use std::time::Duration;
use tracing::debug;

use crate::error::{ProviderError, ERROR_BODY_LIMIT};

const DEFAULT_BASE_URL: &str = "https://api.tavily.com";

static SHARED_HTTP: LazyLock<Client> = LazyLock::new(|| {
    Client::builder()
        .timeout(Duration::from_secs(30))
        .pool_max_idle_per_host(2)
        .build()
        .expect("failed to build HTTP client")
});

#[derive(Debug, Serialize)]
struct SearchRequest {
    api_key: String,
    query: String,
    max_results: usize,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<SearchResult>,
}

#[derive(Debug, Deserialize)]
struct SearchResult {
    #[serde(default)]
    title: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    content: String,
}

pub struct SearchClient {
    http: Client,
    base_url: String,
    api_key: String,
}

impl SearchClient {
    pub fn new(api_key: &str) -> Self {
        Self {
            http: SHARED_HTTP.clone(),
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: api_key.to_string(),
        }
    }

    /// Run one ranked search bounded to `top_k` results. An empty result
    /// set is a valid outcome, not an error.
    pub async fn search(&self, query: &str, top_k: usize) -> Result<Vec<SearchHit>, ProviderError> {
        let url = format!("{}/search", self.base_url);
        let req = SearchRequest {
            api_key: self.api_key.clone(),
            query: query.to_string(),
            max_results: top_k,
        };

        let resp = self
            .http
            .post(&url)
            .json(&req)
            .send()
            .await
            .map_err(|e| ProviderError::Search(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(ProviderError::Search(format!(
                "search error {}: {}",
                status,
                body.chars().take(ERROR_BODY_LIMIT).collect::<String>()
            )));
        }

        let body: SearchResponse = resp
            .json()
            .await
            .map_err(|e| ProviderError::Search(e.to_string()))?;

        debug!(query, results = body.results.len(), "search completed");

        Ok(body
            .results
            .into_iter()
            .take(top_k)
            .map(|r| SearchHit {
                title: r.title,
                url: r.url,
                content: r.content,
            })
            .collect())
    }
}
