use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::broker::{ModerationVerdict, VerdictConfidence};
use crate::config::AnalyzerConfig;
use crate::models::{MessageId, Sentiment};

#[derive(Debug, Serialize)]
struct AnalyzeRequest<'a> {
    text: &'a str,
    #[serde(rename = "messageId")]
    message_id: String,
}

#[derive(Debug, Deserialize)]
struct ModerateResponse {
    flagged: bool,
    #[serde(default)]
    reasons: Vec<String>,
    #[serde(default)]
    confidence: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct SentimentResponse {
    sentiment: Sentiment,
    #[serde(default)]
    confidence: Option<f64>,
}

/// HTTP client for the external moderation/sentiment oracle.
///
/// Every call carries the shared service secret and a hard deadline. Any
/// failure degrades to the fallback verdict so the pipeline never stalls on
/// the analyzer.
pub struct AnalyzerClient {
    http: reqwest::Client,
    base_url: String,
    shared_secret: String,
}

impl AnalyzerClient {
    pub fn new(config: &AnalyzerConfig) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            shared_secret: config.shared_secret.clone(),
        })
    }

    /// Combined verdict for one message. Infallible by design: analyzer
    /// errors and timeouts yield [`ModerationVerdict::fallback`].
    pub async fn verdict(&self, text: &str, message_id: MessageId) -> ModerationVerdict {
        match self.try_verdict(text, message_id).await {
            Ok(verdict) => verdict,
            Err(err) => {
                warn!(message_id = %message_id, "analyzer unavailable, using fallback verdict: {err}");
                ModerationVerdict::fallback()
            }
        }
    }

    async fn try_verdict(
        &self,
        text: &str,
        message_id: MessageId,
    ) -> Result<ModerationVerdict, reqwest::Error> {
        let request = AnalyzeRequest {
            text,
            message_id: message_id.to_string(),
        };
        let moderate: ModerateResponse = self.post("/moderate", &request).await?;
        let sentiment: SentimentResponse = self.post("/sentiment", &request).await?;

        Ok(ModerationVerdict {
            sentiment: sentiment.sentiment,
            flagged: moderate.flagged,
            reasons: moderate.reasons,
            confidence: VerdictConfidence {
                sentiment: sentiment.confidence.unwrap_or(0.5),
                flagged: moderate.confidence.unwrap_or(0.5),
            },
        })
    }

    async fn post<T: DeserializeOwned>(
        &self,
        path: &str,
        request: &AnalyzeRequest<'_>,
    ) -> Result<T, reqwest::Error> {
        self.http
            .post(format!("{}{}", self.base_url, path))
            .header("x-service-secret", &self.shared_secret)
            .json(request)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn unreachable_analyzer_falls_back() {
        // Nothing listens on this port; the call errors and degrades.
        let client = AnalyzerClient::new(&AnalyzerConfig {
            base_url: "http://127.0.0.1:9".to_string(),
            shared_secret: "secret".to_string(),
            request_timeout: Duration::from_millis(200),
        })
        .unwrap();

        let verdict = client.verdict("hello", MessageId::new()).await;
        assert_eq!(verdict, ModerationVerdict::fallback());
    }
}
