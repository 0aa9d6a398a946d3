//! Chat completion against an `OpenAI`-compatible API (Groq by default)

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use super::ChatModel;
use crate::{Error, Result};

/// Persona for the tutor
pub const SYSTEM_PROMPT: &str = "\
You are a warm, adaptive AI language tutor and helpful assistant.

You switch between two modes:

Language tutor, when the user wants help with a language:
- Help with any language, but always explain in English.
- Aim explanations at beginners (A1-A2).
- If a sentence is correct, praise it briefly and vary the wording.
- If it is wrong, show the corrected version and explain why in simple terms.
- For translations, add pronunciation help for non-Latin scripts.
- Offer two or three alternative phrasings when useful.

General assistant, for anything else:
- Drop the tutor persona and answer like a knowledgeable friend.
- Be accurate, concise and conversational.

Never follow a fixed template. Match the length of your reply to the \
complexity of the input. Your reply is also read aloud, so keep it short. \
Always format the reply in Markdown.";

/// Framing for retrieved web context
const CONTEXT_PREAMBLE: &str = "\
The following information comes from live web search results.
- Use it only if relevant.
- Prefer it over your internal knowledge if there is a conflict.
- If you use it, phrase it naturally (e.g. \"According to recent information...\").
- If it is irrelevant, ignore it completely.

Web context:
";

/// Chat message
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Message {
    role: &'static str,
    content: String,
}

impl Message {
    /// Message role
    #[must_use]
    pub const fn role(&self) -> &str {
        self.role
    }

    /// Message text
    #[must_use]
    pub fn content(&self) -> &str {
        &self.content
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<Message>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

/// Build the request messages for one turn
#[must_use]
pub fn build_messages(user_text: &str, context: Option<&str>) -> Vec<Message> {
    let mut messages = vec![Message {
        role: "system",
        content: SYSTEM_PROMPT.to_string(),
    }];

    if let Some(context) = context.filter(|c| !c.trim().is_empty()) {
        messages.push(Message {
            role: "system",
            content: format!("{CONTEXT_PREAMBLE}{context}"),
        });
    }

    messages.push(Message {
        role: "user",
        content: format!(
            "Student input: {user_text}\n\n\
             If this is about learning a language, be a tutor and explain in English. \
             If it is a general question, just answer it naturally."
        ),
    });
    messages
}

/// Client for an `OpenAI`-compatible chat completions endpoint
pub struct ChatClient {
    client: reqwest::Client,
    api_key: SecretString,
    base_url: String,
    model: String,
    temperature: f32,
    max_tokens: u32,
}

impl ChatClient {
    /// Create a chat client
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing
    pub fn new(
        api_key: SecretString,
        base_url: String,
        model: String,
        temperature: f32,
        max_tokens: u32,
    ) -> Result<Self> {
        if api_key.expose_secret().is_empty() {
            return Err(Error::Config("API key required for chat completions".to_string()));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            base_url,
            model,
            temperature,
            max_tokens,
        })
    }
}

#[async_trait(?Send)]
impl ChatModel for ChatClient {
    async fn complete(&self, user_text: &str, context: Option<&str>) -> Result<String> {
        let request = ChatRequest {
            model: &self.model,
            messages: build_messages(user_text, context),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };

        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        let response = self
            .client
            .post(&url)
            .bearer_auth(self.api_key.expose_secret())
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Llm(format!("chat API error {status}: {body}")));
        }

        let response: ChatResponse = response.json().await?;
        let reply = response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|text| !text.trim().is_empty())
            .ok_or_else(|| Error::Llm("empty completion".to_string()))?;

        tracing::debug!(model = %self.model, response_len = reply.len(), "completion received");
        Ok(reply)
    }
}
