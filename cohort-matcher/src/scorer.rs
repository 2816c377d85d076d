//! Compatibility scorer clients
//!
//! The scorer is an external capability: it receives two member ids and
//! answers with a number whose scale is opaque to this crate.

use crate::error::ScorerError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// Pairwise compatibility scoring
#[async_trait]
pub trait CompatibilityScorer: Send + Sync {
    /// Score the pair (subject, object)
    ///
    /// # Returns
    /// * `Ok(score)` - finite compatibility score
    /// * `Err(_)` - no usable score; the caller treats the pair as unmatched
    async fn score(&self, subject_id: Uuid, object_id: Uuid) -> Result<f64, ScorerError>;
}

#[derive(Debug, Serialize)]
struct ScoreRequest {
    subject_id: Uuid,
    object_id: Uuid,
}

#[derive(Debug, Deserialize)]
struct ScoreResponse {
    score: Option<f64>,
}

impl ScoreResponse {
    fn into_score(self) -> Result<f64, ScorerError> {
        match self.score {
            Some(score) if score.is_finite() => Ok(score),
            Some(score) => Err(ScorerError::Invalid(score)),
            None => Err(ScorerError::NoScore),
        }
    }
}

/// HTTP scoring client
///
/// `POST {endpoint}` with `{"subject_id": .., "object_id": ..}`; expects
/// `{"score": <number|null>}` back.
pub struct HttpScorer {
    client: reqwest::Client,
    endpoint: String,
    api_token: Option<String>,
}

impl HttpScorer {
    pub fn new(
        endpoint: impl Into<String>,
        api_token: Option<String>,
        timeout: Duration,
    ) -> Result<Self, ScorerError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            endpoint: endpoint.into(),
            api_token,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl CompatibilityScorer for HttpScorer {
    async fn score(&self, subject_id: Uuid, object_id: Uuid) -> Result<f64, ScorerError> {
        let mut request = self.client.post(&self.endpoint).json(&ScoreRequest {
            subject_id,
            object_id,
        });
        if let Some(token) = &self.api_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ScorerError::Status(status.as_u16()));
        }

        let body: ScoreResponse = response.json().await?;
        body.into_score()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: &str) -> Result<f64, ScorerError> {
        serde_json::from_str::<ScoreResponse>(json).unwrap().into_score()
    }

    #[test]
    fn test_numeric_score_accepted() {
        assert_eq!(parse(r#"{"score": 73.5}"#).unwrap(), 73.5);
        assert_eq!(parse(r#"{"score": 0}"#).unwrap(), 0.0);
    }

    #[test]
    fn test_null_score_is_failure() {
        assert!(matches!(parse(r#"{"score": null}"#), Err(ScorerError::NoScore)));
        assert!(matches!(parse(r#"{}"#), Err(ScorerError::NoScore)));
    }

    #[test]
    fn test_request_body_shape() {
        let subject_id = Uuid::new_v4();
        let object_id = Uuid::new_v4();
        let body = serde_json::to_value(ScoreRequest { subject_id, object_id }).unwrap();
        assert_eq!(body["subject_id"], subject_id.to_string());
        assert_eq!(body["object_id"], object_id.to_string());
    }

    #[test]
    fn test_client_builds() {
        let scorer = HttpScorer::new("http://127.0.0.1:9/score", None, Duration::from_secs(1)).unwrap();
        assert_eq!(scorer.endpoint(), "http://127.0.0.1:9/score");
    }
}
