use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use super::{LlmError, Result};

const RETRY_ATTEMPTS: u32 = 3;
const RETRY_BASE: Duration = Duration::from_secs(1);
const LAST_ERROR_CAPACITY: usize = 10;
const DEFAULT_HEALTH_INTERVAL: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Clone, Default)]
pub struct GenerateOptions {
    pub temperature: Option<f64>,
    pub top_p: Option<f64>,
    pub num_predict: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Default)]
struct Stats {
    request_count: u64,
    failure_count: u64,
    total_latency: Duration,
    models_used: Vec<String>,
    last_errors: VecDeque<String>,
}

impl Stats {
    fn record_success(&mut self, model: &str, latency: Duration) {
        self.request_count += 1;
        self.total_latency += latency;
        if !self.models_used.iter().any(|m| m == model) {
            self.models_used.push(model.to_string());
        }
    }

    fn record_failure(&mut self, err: &str) {
        self.request_count += 1;
        self.failure_count += 1;
        if self.last_errors.len() == LAST_ERROR_CAPACITY {
            self.last_errors.pop_front();
        }
        self.last_errors.push_back(err.to_string());
    }

    fn average_latency(&self) -> Duration {
        let successes = self.request_count - self.failure_count;
        if successes == 0 {
            Duration::ZERO
        } else {
            self.total_latency / successes as u32
        }
    }
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponseEnvelope {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    content: String,
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    models: Vec<TagEntry>,
}

#[derive(Debug, Deserialize)]
struct TagEntry {
    name: String,
}

pub struct OllamaClient {
    base_url: String,
    default_model: String,
    http: reqwest::Client,
    stats: Mutex<Stats>,
    health_interval: Duration,
    last_health_check: Mutex<Option<(Instant, HealthStatus)>>,
}

impl OllamaClient {
    pub fn new(base_url: impl Into<String>, default_model: impl Into<String>) -> Self {
        OllamaClient {
            base_url: base_url.into(),
            default_model: default_model.into(),
            http: reqwest::Client::new(),
            stats: Mutex::new(Stats::default()),
            health_interval: DEFAULT_HEALTH_INTERVAL,
            last_health_check: Mutex::new(None),
        }
    }

    pub fn with_health_interval(mut self, interval: Duration) -> Self {
        self.health_interval = interval;
        self
    }

    pub async fn generate(
        &self,
        prompt: &str,
        system: Option<&str>,
        options: &GenerateOptions,
    ) -> Result<String> {
        self.with_retry(|| self.generate_once(prompt, system, options))
            .await
    }

    async fn generate_once(
        &self,
        prompt: &str,
        system: Option<&str>,
        options: &GenerateOptions,
    ) -> Result<String> {
        let body = serde_json::json!({
            "model": self.default_model,
            "prompt": prompt,
            "system": system,
            "stream": false,
            "options": {
                "temperature": options.temperature,
                "top_p": options.top_p,
                "num_predict": options.num_predict,
            },
        });

        let start = Instant::now();
        let result = self.post("/api/generate", &body).await;
        self.finish(&result, start);

        let resp: GenerateResponse = result?
            .json()
            .await
            .map_err(|e| LlmError::ParseError(e.to_string()))?;
        Ok(resp.response)
    }

    pub async fn chat(&self, messages: &[ChatMessage], options: &GenerateOptions) -> Result<String> {
        self.with_retry(|| self.chat_once(messages, options)).await
    }

    async fn chat_once(&self, messages: &[ChatMessage], options: &GenerateOptions) -> Result<String> {
        let body = serde_json::json!({
            "model": self.default_model,
            "messages": messages,
            "stream": false,
            "options": {
                "temperature": options.temperature,
                "top_p": options.top_p,
                "num_predict": options.num_predict,
            },
        });

        let start = Instant::now();
        let result = self.post("/api/chat", &body).await;
        self.finish(&result, start);

        let resp: ChatResponseEnvelope = result?
            .json()
            .await
            .map_err(|e| LlmError::ParseError(e.to_string()))?;
        Ok(resp.message.content)
    }

    pub async fn list_models(&self) -> Result<Vec<String>> {
        let url = format!("{}/api/tags", self.base_url);
        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(classify_reqwest_error)?;
        let tags: TagsResponse = resp
            .json()
            .await
            .map_err(|e| LlmError::ParseError(e.to_string()))?;
        Ok(tags.models.into_iter().map(|t| t.name).collect())
    }

    pub async fn model_exists(&self, name: &str) -> Result<bool> {
        Ok(self.list_models().await?.iter().any(|m| m == name))
    }

    /// Throttled to once per `health_interval`; returns the cached status
    /// otherwise. On probe, lists models (degraded if the default model is
    /// absent) and, if present, issues a 5-token generation as a liveness
    /// check; any failure there also degrades rather than fails outright.
    pub async fn health(&self) -> HealthStatus {
        {
            let cached = self.last_health_check.lock().unwrap();
            if let Some((checked_at, status)) = *cached {
                if checked_at.elapsed() < self.health_interval {
                    return status;
                }
            }
        }

        let status = self.probe_health().await;
        *self.last_health_check.lock().unwrap() = Some((Instant::now(), status));
        status
    }

    async fn probe_health(&self) -> HealthStatus {
        let models = match self.list_models().await {
            Ok(models) => models,
            Err(_) => return HealthStatus::Unhealthy,
        };
        if !models.iter().any(|m| m == &self.default_model) {
            return HealthStatus::Degraded;
        }
        let options = GenerateOptions {
            temperature: Some(0.0),
            top_p: None,
            num_predict: Some(5),
        };
        match self.generate_once("ping", None, &options).await {
            Ok(_) => HealthStatus::Healthy,
            Err(_) => HealthStatus::Degraded,
        }
    }

    async fn post(&self, path: &str, body: &serde_json::Value) -> Result<reqwest::Response> {
        let url = format!("{}{}", self.base_url, path);
        let resp = self
            .http
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(classify_reqwest_error)?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(LlmError::ModelNotFound(self.default_model.clone()));
        }
        if !resp.status().is_success() {
            return Err(LlmError::Transient(format!(
                "unexpected status {}",
                resp.status()
            )));
        }
        Ok(resp)
    }

    fn finish(&self, result: &Result<reqwest::Response>, start: Instant) {
        let mut stats = self.stats.lock().unwrap();
        match result {
            Ok(_) => stats.record_success(&self.default_model, start.elapsed()),
            Err(e) => stats.record_failure(&e.to_string()),
        }
    }

    /// Exponential backoff, base 1s, 3 attempts; `ModelNotFound` and
    /// `Connection` bypass retry and surface immediately.
    async fn with_retry<F, Fut, T>(&self, mut call: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let mut attempt = 0;
        loop {
            match call().await {
                Ok(v) => return Ok(v),
                Err(e) if e.is_retryable() && attempt + 1 < RETRY_ATTEMPTS => {
                    let delay = RETRY_BASE * 2u32.pow(attempt);
                    tracing::warn!(attempt, error = %e, "llm call failed, retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    pub fn request_count(&self) -> u64 {
        self.stats.lock().unwrap().request_count
    }

    pub fn failure_count(&self) -> u64 {
        self.stats.lock().unwrap().failure_count
    }

    pub fn average_latency(&self) -> Duration {
        self.stats.lock().unwrap().average_latency()
    }

    pub fn models_used(&self) -> Vec<String> {
        self.stats.lock().unwrap().models_used.clone()
    }

    pub fn last_errors(&self) -> Vec<String> {
        self.stats.lock().unwrap().last_errors.iter().cloned().collect()
    }
}

fn classify_reqwest_error(err: reqwest::Error) -> LlmError {
    if err.is_connect() || err.is_timeout() {
        LlmError::Connection(err.to_string())
    } else {
        LlmError::Transient(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stats_track_success_and_failure_counts() {
        let mut stats = Stats::default();
        stats.record_success("llama3", Duration::from_millis(100));
        stats.record_failure("boom");
        assert_eq!(stats.request_count, 2);
        assert_eq!(stats.failure_count, 1);
        assert_eq!(stats.models_used, vec!["llama3".to_string()]);
    }

    #[test]
    fn last_errors_ring_buffer_caps_at_ten() {
        let mut stats = Stats::default();
        for i in 0..15 {
            stats.record_failure(&format!("err-{i}"));
        }
        assert_eq!(stats.last_errors.len(), LAST_ERROR_CAPACITY);
        assert_eq!(stats.last_errors.front().unwrap(), "err-5");
    }

    #[test]
    fn retryable_classification_excludes_not_found_and_connection() {
        assert!(!LlmError::ModelNotFound("x".into()).is_retryable());
        assert!(!LlmError::Connection("x".into()).is_retryable());
        assert!(LlmError::Transient("x".into()).is_retryable());
    }
}
