//! Scripted in-process provider for tests and offline runs.

use super::Provider;
use crate::errors::{EngineError, EngineResult};
use crate::model::{ProviderRequest, ProviderResponse, Usage};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

type EmbedFn = Arc<dyn Fn(&str) -> EngineResult<Vec<f32>> + Send + Sync>;

#[derive(Debug, Clone)]
pub enum FakeReply {
    Text(String),
    Error(EngineError),
    /// Return the prompt unchanged.
    Echo,
}

impl FakeReply {
    pub fn text(s: impl Into<String>) -> Self {
        FakeReply::Text(s.into())
    }
}

#[derive(Debug)]
struct Rule {
    model: Option<String>,
    needle: Option<String>,
    queue: VecDeque<FakeReply>,
    last: FakeReply,
}

impl Rule {
    fn matches(&self, request: &ProviderRequest) -> bool {
        self.model.as_deref().map_or(true, |m| m == request.model)
            && self
                .needle
                .as_deref()
                .map_or(true, |n| request.prompt.contains(n))
    }

    fn next(&mut self) -> FakeReply {
        self.queue.pop_front().unwrap_or_else(|| self.last.clone())
    }
}

/// Rules are checked in insertion order; the first match answers.
pub struct FakeProvider {
    rules: Mutex<Vec<Rule>>,
    default_reply: FakeReply,
    models: Vec<String>,
    embedder: Option<EmbedFn>,
    latency: Duration,
    embed_latency: Duration,
    calls: Mutex<Vec<ProviderRequest>>,
    call_count: AtomicUsize,
    embed_count: AtomicUsize,
}

impl Default for FakeProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeProvider {
    pub fn new() -> Self {
        Self {
            rules: Mutex::new(Vec::new()),
            default_reply: FakeReply::Echo,
            models: vec!["fake-model".to_string()],
            embedder: None,
            latency: Duration::ZERO,
            embed_latency: Duration::ZERO,
            calls: Mutex::new(Vec::new()),
            call_count: AtomicUsize::new(0),
            embed_count: AtomicUsize::new(0),
        }
    }

    pub fn with_default(mut self, reply: FakeReply) -> Self {
        self.default_reply = reply;
        self
    }

    pub fn with_models(mut self, models: Vec<String>) -> Self {
        self.models = models;
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn with_embed_latency(mut self, latency: Duration) -> Self {
        self.embed_latency = latency;
        self
    }

    pub fn with_embeddings<F>(mut self, f: F) -> Self
    where
        F: Fn(&str) -> EngineResult<Vec<f32>> + Send + Sync + 'static,
    {
        self.embedder = Some(Arc::new(f));
        self
    }

    /// Always answer prompts containing `needle` with `reply`.
    pub fn on_prompt(self, needle: impl Into<String>, reply: FakeReply) -> Self {
        self.push_rule(None, Some(needle.into()), vec![reply])
    }

    /// Answer prompts containing `needle` with `replies` in order; the last one repeats.
    pub fn on_prompt_seq(self, needle: impl Into<String>, replies: Vec<FakeReply>) -> Self {
        self.push_rule(None, Some(needle.into()), replies)
    }

    /// Answer every request for `model` with `replies` in order; the last one repeats.
    pub fn on_model(self, model: impl Into<String>, replies: Vec<FakeReply>) -> Self {
        self.push_rule(Some(model.into()), None, replies)
    }

    fn push_rule(
        mut self,
        model: Option<String>,
        needle: Option<String>,
        replies: Vec<FakeReply>,
    ) -> Self {
        let mut queue: VecDeque<FakeReply> = replies.into();
        let last = queue.pop_back().unwrap_or(FakeReply::Echo);
        if let Ok(rules) = self.rules.get_mut() {
            rules.push(Rule {
                model,
                needle,
                queue,
                last,
            });
        }
        self
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }

    /// Embedding requests seen, including ones that failed.
    pub fn embed_count(&self) -> usize {
        self.embed_count.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> Vec<ProviderRequest> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    fn reply_for(&self, request: &ProviderRequest) -> FakeReply {
        let Ok(mut rules) = self.rules.lock() else {
            return self.default_reply.clone();
        };
        rules
            .iter_mut()
            .find(|r| r.matches(request))
            .map(Rule::next)
            .unwrap_or_else(|| self.default_reply.clone())
    }
}

#[async_trait]
impl Provider for FakeProvider {
    async fn complete(&self, request: &ProviderRequest) -> EngineResult<ProviderResponse> {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(request.clone());
        }
        let reply = self.reply_for(request);

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let text = match reply {
            FakeReply::Text(t) => t,
            FakeReply::Echo => request.prompt.clone(),
            FakeReply::Error(e) => return Err(e),
        };
        Ok(ProviderResponse {
            usage: Some(Usage {
                input_tokens: request.prompt.split_whitespace().count() as u64,
                output_tokens: text.split_whitespace().count() as u64,
            }),
            text,
            provider: self.provider_name().to_string(),
            model: request.model.clone(),
        })
    }

    async fn list_models(&self) -> EngineResult<Vec<String>> {
        Ok(self.models.clone())
    }

    fn supports_embeddings(&self) -> bool {
        self.embedder.is_some()
    }

    async fn embed(&self, text: &str) -> EngineResult<Vec<f32>> {
        self.embed_count.fetch_add(1, Ordering::SeqCst);
        if !self.embed_latency.is_zero() {
            tokio::time::sleep(self.embed_latency).await;
        }
        match &self.embedder {
            Some(f) => f(text),
            None => Err(EngineError::capability("fake provider has no embeddings")),
        }
    }

    fn provider_name(&self) -> &'static str {
        "fake"
    }
}
