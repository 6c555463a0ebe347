use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::checkpoint::RecordOperation;
use super::error::{AnalysisError, Error, StageError};
use super::types::{Field, Record, is_resolved_value};
use super::ui_utils::truncate_for_log;

/// Stored in place of an analysis when the service call failed.
pub const ANALYSIS_ERROR: &str = "Error in API call";
pub const DEFAULT_MODEL: &str = "o3-mini-2025-01-31";
pub const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";
pub const ANALYSIS_PACING: Duration = Duration::from_secs(1);

const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

pub const SYSTEM_PROMPT: &str = "You are an expert in evaluating roofing contractors based on \
their information. You are working with a materials distributor, specifically with their sales \
team. You are providing information to generate leads and insights for the sales team. Provide \
concise, valuable insights.";

pub fn build_prompt(record: &Record) -> String {
    format!(
        "Please analyze the following roofing contractor information and provide a very brief summary:

Contractor Name: {name}
Rating: {rating}
Certifications: {certifications}
Phone Number: {phone}

About Section:
{about}

Based on this information, please provide:
1. SUMMARY: A brief summary of the contractor (1 short sentence)
2. STRENGTHS: Key strengths based on certifications and about section (keep to a short statement, no bullet points)
3. CONCERNS: Any red flags or concerns (short statement 1 sentence or less. DO NOT comment on grammatical issues in any way)
4. RATING: Overall rating on a scale of 1-10 with a short explanation.

And please use the provided labels on the list.",
        name = record.name,
        rating = record.rating,
        certifications = record.certifications,
        phone = record.phone_number,
        about = record.about_text,
    )
}

/// Turns a record into free-text analysis. Never fails: a broken call
/// yields [`ANALYSIS_ERROR`].
pub trait Analyst {
    async fn analyze(&self, record: &Record) -> String;
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<Message<'a>>,
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponseRaw {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

/// Chat-completions client for the analysis service.
#[derive(Clone)]
pub struct ChatClient {
    http: Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl ChatClient {
    pub fn new(api_key: impl Into<String>) -> Result<Self, Error> {
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| Error::Config(format!("http client build failed: {e}")))?;
        Ok(Self {
            http,
            api_key: api_key.into(),
            base_url: DEFAULT_API_BASE.to_string(),
            model: DEFAULT_MODEL.to_string(),
        })
    }

    /// Reads the key from `OPENAI_API_KEY`.
    pub fn from_env() -> Result<Self, Error> {
        let key = std::env::var("OPENAI_API_KEY")
            .ok()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| Error::Config("OPENAI_API_KEY not set".to_string()))?;
        Self::new(key)
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub async fn complete(&self, system: &str, user: &str) -> Result<String, AnalysisError> {
        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                Message {
                    role: "system",
                    content: system,
                },
                Message {
                    role: "user",
                    content: user,
                },
            ],
        };

        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| AnalysisError::Transport(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| AnalysisError::Transport(format!("response read failed: {e}")))?;
        if !status.is_success() {
            return Err(AnalysisError::Status {
                status: status.as_u16(),
                body: truncate_for_log(&body, 240),
            });
        }

        let parsed: ChatResponseRaw = serde_json::from_str(&body)
            .map_err(|e| AnalysisError::Malformed(e.to_string()))?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| AnalysisError::Malformed("no message content".to_string()))
    }
}

impl Analyst for ChatClient {
    async fn analyze(&self, record: &Record) -> String {
        match self.complete(SYSTEM_PROMPT, &build_prompt(record)).await {
            Ok(text) => text,
            Err(err) => {
                warn!(name = %record.name, error = %err, "analysis call failed");
                ANALYSIS_ERROR.to_string()
            }
        }
    }
}

/// Fills `analysis_text` through an [`Analyst`].
pub struct AnalysisStage<A> {
    analyst: A,
    retry_errors: bool,
    pacing: Duration,
}

impl<A: Analyst> AnalysisStage<A> {
    pub fn new(analyst: A) -> Self {
        Self {
            analyst,
            retry_errors: false,
            pacing: ANALYSIS_PACING,
        }
    }

    /// Treat previously stored [`ANALYSIS_ERROR`] values as unresolved.
    pub fn retry_errors(mut self, retry: bool) -> Self {
        self.retry_errors = retry;
        self
    }

    pub fn with_pacing(mut self, pacing: Duration) -> Self {
        self.pacing = pacing;
        self
    }
}

impl<A: Analyst> RecordOperation for AnalysisStage<A> {
    fn field(&self) -> Field {
        Field::AnalysisText
    }

    fn is_done(&self, record: &Record) -> bool {
        let value = record.analysis_text.trim();
        is_resolved_value(value) && !(self.retry_errors && value == ANALYSIS_ERROR)
    }

    fn pacing(&self) -> Duration {
        self.pacing
    }

    async fn apply(&mut self, record: &Record) -> Result<String, StageError> {
        let analysis = self.analyst.analyze(record).await;
        info!(name = %record.name, analysis = %truncate_for_log(&analysis, 100), "analysis");
        debug!(chars = analysis.chars().count(), "analysis length");
        Ok(analysis)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    use super::*;
    use crate::app::checkpoint::{CheckpointedProcessor, SnapshotStore};
    use crate::app::error::StoreError;
    use crate::app::types::SENTINEL;

    /// Serves one canned response per connection, in order, and records the
    /// request bodies it saw.
    async fn serve(responses: Vec<(u16, String)>) -> (String, Arc<Mutex<Vec<String>>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&seen);
        tokio::spawn(async move {
            for (status, body) in responses {
                let (mut socket, _) = listener.accept().await.unwrap();
                let request = read_request(&mut socket).await;
                log.lock().unwrap().push(request);
                let reply = format!(
                    "HTTP/1.1 {status} X\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                    body.len()
                );
                socket.write_all(reply.as_bytes()).await.unwrap();
                socket.shutdown().await.unwrap();
            }
        });
        (format!("http://{addr}"), seen)
    }

    async fn read_request(socket: &mut tokio::net::TcpStream) -> String {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            let n = socket.read(&mut chunk).await.unwrap();
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);
            let text = String::from_utf8_lossy(&buf);
            if let Some(split) = text.find("\r\n\r\n") {
                let length = text[..split]
                    .lines()
                    .find_map(|line| {
                        let (name, value) = line.split_once(':')?;
                        name.eq_ignore_ascii_case("content-length")
                            .then(|| value.trim().parse::<usize>().ok())?
                    })
                    .unwrap_or(0);
                if buf.len() >= split + 4 + length {
                    return String::from_utf8_lossy(&buf[split + 4..]).into_owned();
                }
            }
        }
        String::new()
    }

    fn completion(text: &str) -> String {
        serde_json::json!({
            "choices": [{ "message": { "role": "assistant", "content": text } }]
        })
        .to_string()
    }

    fn contractor(name: &str) -> Record {
        let mut r = Record::default();
        r.set(Field::Name, name);
        r.set(Field::Rating, "4.7");
        r.set(Field::Certifications, "Master Elite");
        r.set(Field::AboutText, "Family owned since 1987.");
        r
    }

    #[derive(Default)]
    struct MemoryStore {
        last: Vec<Record>,
    }

    impl SnapshotStore for MemoryStore {
        fn save(&mut self, records: &[Record]) -> Result<(), StoreError> {
            self.last = records.to_vec();
            Ok(())
        }
    }

    #[test]
    fn prompt_lists_the_record() {
        let prompt = build_prompt(&contractor("Acme"));
        assert!(prompt.contains("Contractor Name: Acme"));
        assert!(prompt.contains("Rating: 4.7"));
        assert!(prompt.contains("Phone Number: N/A"));
        assert!(prompt.contains("Family owned since 1987."));
        for label in ["SUMMARY", "STRENGTHS", "CONCERNS", "RATING"] {
            assert!(prompt.contains(label));
        }
    }

    #[tokio::test]
    async fn successful_completion_is_returned() {
        let (base, seen) = serve(vec![(200, completion("SUMMARY: solid roofer"))]).await;
        let client = ChatClient::new("sk-test").unwrap().with_base_url(base);

        let text = client.analyze(&contractor("Acme")).await;

        assert_eq!(text, "SUMMARY: solid roofer");
        let body: serde_json::Value = serde_json::from_str(&seen.lock().unwrap()[0]).unwrap();
        assert_eq!(body["model"], DEFAULT_MODEL);
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][0]["content"], SYSTEM_PROMPT);
        assert_eq!(body["messages"][1]["role"], "user");
    }

    #[tokio::test]
    async fn response_without_content_is_an_error() {
        let (base, _) = serve(vec![(200, r#"{"choices":[]}"#.to_string())]).await;
        let client = ChatClient::new("sk-test").unwrap().with_base_url(base);

        let err = client.complete("s", "u").await.unwrap_err();
        assert!(matches!(err, AnalysisError::Malformed(_)));
    }

    #[tokio::test]
    async fn server_error_is_stored_and_run_continues() {
        let (base, _) = serve(vec![
            (500, r#"{"error":"boom"}"#.to_string()),
            (200, completion("SUMMARY: dependable")),
        ])
        .await;
        let client = ChatClient::new("sk-test").unwrap().with_base_url(base);
        let mut stage = AnalysisStage::new(client).with_pacing(Duration::ZERO);
        let mut rows = vec![contractor("Acme"), contractor("Bolt")];
        let mut store = MemoryStore::default();

        let summary = CheckpointedProcessor::default()
            .process(&mut rows, &mut stage, &mut store)
            .await
            .unwrap();

        assert_eq!(rows[0].analysis_text, ANALYSIS_ERROR);
        assert_eq!(rows[1].analysis_text, "SUMMARY: dependable");
        assert_eq!(summary.processed, 2);
        assert_eq!(store.last, rows);
    }

    #[tokio::test]
    async fn unreachable_service_yields_error_text() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let client = ChatClient::new("sk-test")
            .unwrap()
            .with_base_url(format!("http://{addr}"));

        assert_eq!(client.analyze(&contractor("Acme")).await, ANALYSIS_ERROR);
    }

    struct Echo;

    impl Analyst for Echo {
        async fn analyze(&self, record: &Record) -> String {
            format!("analysis of {}", record.name)
        }
    }

    #[tokio::test]
    async fn stored_errors_are_kept_unless_retrying() {
        let mut failed = contractor("Acme");
        failed.set(Field::AnalysisText, ANALYSIS_ERROR);
        let mut fresh = contractor("Bolt");
        fresh.set(Field::AnalysisText, SENTINEL);

        let mut rows = vec![failed.clone(), fresh.clone()];
        let mut stage = AnalysisStage::new(Echo).with_pacing(Duration::ZERO);
        CheckpointedProcessor::default()
            .process(&mut rows, &mut stage, &mut MemoryStore::default())
            .await
            .unwrap();
        assert_eq!(rows[0].analysis_text, ANALYSIS_ERROR);
        assert_eq!(rows[1].analysis_text, "analysis of Bolt");

        let mut rows = vec![failed, fresh];
        let mut stage = AnalysisStage::new(Echo)
            .retry_errors(true)
            .with_pacing(Duration::ZERO);
        CheckpointedProcessor::default()
            .process(&mut rows, &mut stage, &mut MemoryStore::default())
            .await
            .unwrap();
        assert_eq!(rows[0].analysis_text, "analysis of Acme");
    }
}
