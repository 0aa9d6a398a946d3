//! Web search context via Tavily

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use super::{Retriever, SearchAnswer, SearchHit};
use crate::{Error, Result};

/// Tavily search endpoint
const TAVILY_URL: &str = "https://api.tavily.com/search";

/// Tavily API request body
#[derive(Debug, Serialize)]
struct TavilyRequest<'a> {
    query: &'a str,
    search_depth: &'a str,
    include_answer: &'a str,
    max_results: usize,
}

/// Tavily API response
#[derive(Debug, Deserialize)]
struct TavilyResponse {
    #[serde(default)]
    answer: Option<String>,
    #[serde(default)]
    results: Vec<SearchHit>,
}

/// Web search returning a synthesized answer
pub struct TavilySearch {
    client: reqwest::Client,
    api_key: SecretString,
    search_depth: String,
    max_results: usize,
}

impl TavilySearch {
    /// Create a search client
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing
    pub fn new(api_key: SecretString, search_depth: String, max_results: usize) -> Result<Self> {
        if api_key.expose_secret().is_empty() {
            return Err(Error::Config("Tavily API key required for search".to_string()));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            search_depth,
            max_results,
        })
    }
}

#[async_trait(?Send)]
impl Retriever for TavilySearch {
    async fn search(&self, query: &str) -> Result<SearchAnswer> {
        let request = TavilyRequest {
            query,
            search_depth: &self.search_depth,
            include_answer: "basic",
            max_results: self.max_results,
        };

        let response = self
            .client
            .post(TAVILY_URL)
            .bearer_auth(self.api_key.expose_secret())
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Rag(format!("Tavily error {status}: {body}")));
        }

        let response: TavilyResponse = response.json().await?;
        tracing::debug!(
            results = response.results.len(),
            has_answer = response.answer.is_some(),
            "search complete"
        );

        Ok(SearchAnswer {
            answer: response.answer.filter(|a| !a.trim().is_empty()),
            results: response.results,
        })
    }
}
