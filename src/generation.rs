//! Generation backend abstraction and HTTP implementation.
//!
//! [`GenerationClient`] is the seam between the retrieval pipeline and the
//! language model. The production implementation speaks the
//! OpenAI-compatible chat-completions protocol over `reqwest` with a bounded
//! timeout; tests substitute their own implementations.
//!
//! API failures propagate to the caller as errors — there is no retry loop
//! at this layer.

use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;

use crate::config::GenerationConfig;
use crate::models::ChatTurn;

/// System prompt sent with every generation call.
pub const SYSTEM_PROMPT: &str = "You are a professional assistant. Answer the user's question \
based on the provided context. If the context contains no relevant information, say so honestly.";

/// The result of one generation call.
#[derive(Debug, Clone)]
pub struct Generation {
    pub content: String,
    pub model: String,
    pub finish_reason: Option<String>,
    pub prompt_tokens: Option<u64>,
    pub completion_tokens: Option<u64>,
    pub total_tokens: Option<u64>,
}

/// A generation backend.
#[async_trait]
pub trait GenerationClient: Send + Sync {
    /// Generate a completion for `prompt` under `system` instructions.
    async fn generate(
        &self,
        system: &str,
        prompt: &str,
        temperature: f64,
        max_tokens: u32,
        stream: bool,
    ) -> Result<Generation>;

    /// Liveness probe: issue a minimal one-token call and report
    /// reachability.
    async fn check_api_health(&self) -> bool;

    fn model_name(&self) -> &str;
}

// ============ HTTP client ============

/// OpenAI-compatible chat-completions client.
///
/// The API key is read from the environment variable named in the config.
/// The request timeout bounds how long a caller waits before abandoning a
/// generation call; no cancellation is propagated to the backend.
pub struct HttpGenerationClient {
    client: reqwest::Client,
    api_base: String,
    /// Resolved at construction; a missing key only fails at call time, so
    /// commands that never generate work without one.
    api_key: Option<String>,
    api_key_env: String,
    model: String,
}

impl HttpGenerationClient {
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        let api_key = std::env::var(&config.api_key_env).ok();
        if api_key.is_none() {
            tracing::debug!(
                env = config.api_key_env.as_str(),
                "generation API key not set; generation calls will fail"
            );
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            api_key,
            api_key_env: config.api_key_env.clone(),
            model: config.model.clone(),
        })
    }
}

#[async_trait]
impl GenerationClient for HttpGenerationClient {
    async fn generate(
        &self,
        system: &str,
        prompt: &str,
        temperature: f64,
        max_tokens: u32,
        stream: bool,
    ) -> Result<Generation> {
        let api_key = self
            .api_key
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("{} environment variable not set", self.api_key_env))?;

        if stream {
            // Streaming deltas are not consumed at this layer; the full
            // response is fetched and returned in one piece.
            tracing::debug!("stream requested; fetching buffered response");
        }

        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": system },
                { "role": "user", "content": prompt },
            ],
            "temperature": temperature,
            "max_tokens": max_tokens,
            "stream": false,
        });

        let response = self
            .client
            .post(format!("{}/chat/completions", self.api_base))
            .header("Authorization", format!("Bearer {}", api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            bail!("generation API error {}: {}", status, body_text);
        }

        let json: serde_json::Value = response.json().await?;
        parse_completion(&json, &self.model)
    }

    async fn check_api_health(&self) -> bool {
        match self.generate(SYSTEM_PROMPT, "ping", 0.0, 1, false).await {
            Ok(_) => true,
            Err(e) => {
                tracing::error!(error = %e, "generation API health check failed");
                false
            }
        }
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

fn parse_completion(json: &serde_json::Value, fallback_model: &str) -> Result<Generation> {
    let choice = json
        .get("choices")
        .and_then(|c| c.as_array())
        .and_then(|c| c.first())
        .ok_or_else(|| anyhow::anyhow!("invalid completion response: missing choices"))?;

    let content = choice
        .pointer("/message/content")
        .and_then(|c| c.as_str())
        .ok_or_else(|| anyhow::anyhow!("invalid completion response: missing message content"))?
        .to_string();

    let finish_reason = choice
        .get("finish_reason")
        .and_then(|f| f.as_str())
        .map(|f| f.to_string());

    let usage = json.get("usage");
    let token_count = |key: &str| usage.and_then(|u| u.get(key)).and_then(|v| v.as_u64());

    Ok(Generation {
        content,
        model: json
            .get("model")
            .and_then(|m| m.as_str())
            .unwrap_or(fallback_model)
            .to_string(),
        finish_reason,
        prompt_tokens: token_count("prompt_tokens"),
        completion_tokens: token_count("completion_tokens"),
        total_tokens: token_count("total_tokens"),
    })
}

// ============ Prompt construction ============

/// A context excerpt with its display attribution.
#[derive(Debug, Clone)]
pub struct PromptChunk {
    pub content: String,
    pub source: String,
}

/// Build the user prompt: numbered context excerpts, their source list,
/// prior conversation turns (alternating user/assistant lines), and the
/// question with answering instructions.
pub fn build_rag_prompt(
    question: &str,
    context_chunks: &[PromptChunk],
    history: Option<&[ChatTurn]>,
) -> String {
    let context_text = context_chunks
        .iter()
        .enumerate()
        .map(|(i, chunk)| format!("[Source {}] {}", i + 1, chunk.content))
        .collect::<Vec<_>>()
        .join("\n\n");

    let sources = context_chunks
        .iter()
        .enumerate()
        .map(|(i, chunk)| format!("[{}] {}", i + 1, chunk.source))
        .collect::<Vec<_>>()
        .join("\n");

    let mut conversation = String::new();
    if let Some(turns) = history {
        if !turns.is_empty() {
            conversation.push_str("## Conversation history\n");
            for turn in turns {
                let role = if turn.role == "user" { "User" } else { "Assistant" };
                conversation.push_str(&format!("{}: {}\n", role, turn.content));
            }
            conversation.push('\n');
        }
    }

    format!(
        "## Context\n\
         The following was retrieved from the knowledge base:\n\n\
         {context_text}\n\n\
         ---\n\
         Sources:\n\
         {sources}\n\n\
         {conversation}## Question\n\
         {question}\n\n\
         ## Answer the question using the context and conversation history above.\n\
         When answering:\n\
         1. Address the question directly\n\
         2. Quote specific context where it helps\n\
         3. Cite source numbers for quoted material\n\
         4. Keep continuity with the conversation history\n\
         5. If the context has no relevant information, say so honestly\n\n\
         ## Answer:\n"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(content: &str, source: &str) -> PromptChunk {
        PromptChunk {
            content: content.to_string(),
            source: source.to_string(),
        }
    }

    #[test]
    fn test_prompt_numbers_context_excerpts() {
        let prompt = build_rag_prompt(
            "What is the deadline?",
            &[
                chunk("The deadline is Friday.", "plan.txt (similarity: 0.92)"),
                chunk("Submit by end of week.", "memo.txt (similarity: 0.55)"),
            ],
            None,
        );
        assert!(prompt.contains("[Source 1] The deadline is Friday."));
        assert!(prompt.contains("[Source 2] Submit by end of week."));
        assert!(prompt.contains("[1] plan.txt (similarity: 0.92)"));
        assert!(prompt.contains("## Question\nWhat is the deadline?"));
        assert!(!prompt.contains("## Conversation history"));
    }

    #[test]
    fn test_prompt_renders_conversation_turns() {
        let history = vec![
            ChatTurn {
                role: "user".to_string(),
                content: "Hi".to_string(),
            },
            ChatTurn {
                role: "assistant".to_string(),
                content: "Hello!".to_string(),
            },
        ];
        let prompt = build_rag_prompt("Follow-up?", &[chunk("ctx", "a.txt")], Some(&history));
        assert!(prompt.contains("## Conversation history"));
        assert!(prompt.contains("User: Hi"));
        assert!(prompt.contains("Assistant: Hello!"));
    }

    #[test]
    fn test_parse_completion_extracts_usage() {
        let json = serde_json::json!({
            "model": "deepseek-chat",
            "choices": [{
                "message": { "role": "assistant", "content": "Answer text" },
                "finish_reason": "stop"
            }],
            "usage": { "prompt_tokens": 120, "completion_tokens": 30, "total_tokens": 150 }
        });
        let gen = parse_completion(&json, "fallback").unwrap();
        assert_eq!(gen.content, "Answer text");
        assert_eq!(gen.model, "deepseek-chat");
        assert_eq!(gen.finish_reason.as_deref(), Some("stop"));
        assert_eq!(gen.total_tokens, Some(150));
    }

    #[test]
    fn test_parse_completion_without_usage() {
        let json = serde_json::json!({
            "choices": [{ "message": { "content": "ok" } }]
        });
        let gen = parse_completion(&json, "fallback").unwrap();
        assert_eq!(gen.model, "fallback");
        assert_eq!(gen.total_tokens, None);
    }

    #[test]
    fn test_parse_completion_rejects_missing_choices() {
        let json = serde_json::json!({ "error": "nope" });
        assert!(parse_completion(&json, "m").is_err());
    }
}
