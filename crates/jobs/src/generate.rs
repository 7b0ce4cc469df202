//! Generation backend client
//!
//! Thin HTTP boundary around the external visual-generation service. The
//! rest of the scheduler only sees "prompt in, result URL out" with a hard
//! timeout; a timeout is indistinguishable from any other backend failure.

use std::time::Duration;

use rand::seq::SliceRandom;

use brandcast_shared::BrandProfile;

use crate::error::{JobsError, JobsResult};

/// Upper bound on one generation call. Generation is slow by nature; a call
/// that outlives this is abandoned and the job marked failed.
const GENERATION_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Clone)]
pub struct GenerationConfig {
    pub base_url: String,
    pub api_key: String,
}

impl GenerationConfig {
    pub fn from_env() -> Self {
        Self {
            base_url: std::env::var("GENERATION_API_URL")
                .unwrap_or_else(|_| "https://generation.brandcast.app/v1/visuals".to_string()),
            api_key: std::env::var("GENERATION_API_KEY").unwrap_or_default(),
        }
    }
}

pub struct GenerationClient {
    config: GenerationConfig,
    client: reqwest::Client,
}

#[derive(Debug, serde::Deserialize)]
struct GenerationResponse {
    result_url: String,
}

impl GenerationClient {
    pub fn new(config: GenerationConfig) -> JobsResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(GENERATION_TIMEOUT)
            .build()
            .map_err(|e| JobsError::Internal(format!("HTTP client build failed: {}", e)))?;
        Ok(Self { config, client })
    }

    pub fn from_env() -> JobsResult<Self> {
        Self::new(GenerationConfig::from_env())
    }

    /// Request one visual. Returns the hosted result URL.
    pub async fn generate(&self, prompt: &str) -> JobsResult<String> {
        let body = serde_json::json!({ "prompt": prompt });

        let response = self
            .client
            .post(&self.config.base_url)
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let detail = response.text().await.unwrap_or_default();
            return Err(JobsError::Generation(format!(
                "backend returned {}: {}",
                status, detail
            )));
        }

        let payload: GenerationResponse = response.json().await?;
        Ok(payload.result_url)
    }
}

/// Pick one stored marketing angle, if the profile has any
pub fn pick_angle(profile: &BrandProfile) -> Option<String> {
    let angles = profile.angle_list();
    angles.choose(&mut rand::thread_rng()).cloned()
}

/// Build the generation prompt from a profile snapshot. Deterministic for a
/// given profile and angle, so a rerun with the same inputs issues the same
/// request.
pub fn derive_prompt(profile: &BrandProfile, angle: Option<&str>) -> String {
    let mut prompt = format!("Create a branded social media visual for {}", profile.name);

    if let Some(industry) = profile.industry.as_deref() {
        prompt.push_str(&format!(", a {} brand", industry));
    }
    if let Some(tagline) = profile.tagline.as_deref() {
        prompt.push_str(&format!(" with the tagline \"{}\"", tagline));
    }
    prompt.push('.');

    if let Some(audience) = profile.audience.as_deref() {
        prompt.push_str(&format!(" Target audience: {}.", audience));
    }
    if let Some(tone) = profile.tone.as_deref() {
        prompt.push_str(&format!(" Visual tone: {}.", tone));
    }
    if let Some(angle) = angle {
        prompt.push_str(&format!(" Build the visual around this angle: {}.", angle));
    }

    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::OffsetDateTime;
    use uuid::Uuid;

    fn profile(angles: serde_json::Value) -> BrandProfile {
        BrandProfile {
            id: Uuid::new_v4(),
            account_id: Uuid::new_v4(),
            name: "Acme Coffee".to_string(),
            tagline: Some("Wake up better".to_string()),
            industry: Some("specialty coffee".to_string()),
            audience: Some("remote workers".to_string()),
            tone: Some("warm, minimal".to_string()),
            angles,
            created_at: OffsetDateTime::now_utc(),
            updated_at: OffsetDateTime::now_utc(),
        }
    }

    #[test]
    fn test_derive_prompt_includes_all_fields() {
        let profile = profile(serde_json::json!([]));
        let prompt = derive_prompt(&profile, Some("morning ritual"));

        assert!(prompt.contains("Acme Coffee"));
        assert!(prompt.contains("specialty coffee"));
        assert!(prompt.contains("Wake up better"));
        assert!(prompt.contains("remote workers"));
        assert!(prompt.contains("warm, minimal"));
        assert!(prompt.contains("morning ritual"));
    }

    #[test]
    fn test_derive_prompt_is_deterministic() {
        let profile = profile(serde_json::json!([]));
        assert_eq!(
            derive_prompt(&profile, Some("angle")),
            derive_prompt(&profile, Some("angle"))
        );
    }

    #[test]
    fn test_derive_prompt_minimal_profile() {
        let mut profile = profile(serde_json::json!([]));
        profile.tagline = None;
        profile.industry = None;
        profile.audience = None;
        profile.tone = None;

        let prompt = derive_prompt(&profile, None);
        assert_eq!(prompt, "Create a branded social media visual for Acme Coffee.");
    }

    #[test]
    fn test_pick_angle_none_when_empty() {
        let profile = profile(serde_json::json!([]));
        assert!(pick_angle(&profile).is_none());
    }

    #[test]
    fn test_pick_angle_returns_stored_angle() {
        let profile = profile(serde_json::json!(["a", "b", "c"]));
        let angle = pick_angle(&profile).unwrap();
        assert!(["a", "b", "c"].contains(&angle.as_str()));
    }

    #[test]
    fn test_pick_angle_skips_non_strings() {
        let profile = profile(serde_json::json!([42, {"k": "v"}, "only valid"]));
        assert_eq!(pick_angle(&profile).as_deref(), Some("only valid"));
    }

    #[tokio::test]
    async fn test_generate_returns_result_url() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/visuals")
            .match_header("authorization", "Bearer test-key")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"result_url":"https://cdn.example.com/v/123.png"}"#)
            .create_async()
            .await;

        let client = GenerationClient::new(GenerationConfig {
            base_url: format!("{}/v1/visuals", server.url()),
            api_key: "test-key".to_string(),
        })
        .unwrap();

        let url = client.generate("a prompt").await.unwrap();
        assert_eq!(url, "https://cdn.example.com/v/123.png");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_generate_maps_backend_error() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/v1/visuals")
            .with_status(503)
            .with_body("overloaded")
            .create_async()
            .await;

        let client = GenerationClient::new(GenerationConfig {
            base_url: format!("{}/v1/visuals", server.url()),
            api_key: "test-key".to_string(),
        })
        .unwrap();

        let err = client.generate("a prompt").await.unwrap_err();
        match err {
            JobsError::Generation(message) => {
                assert!(message.contains("503"));
                assert!(message.contains("overloaded"));
            }
            other => panic!("Expected Generation error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_generate_rejects_malformed_response() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/v1/visuals")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"unexpected":"shape"}"#)
            .create_async()
            .await;

        let client = GenerationClient::new(GenerationConfig {
            base_url: format!("{}/v1/visuals", server.url()),
            api_key: "test-key".to_string(),
        })
        .unwrap();

        assert!(client.generate("a prompt").await.is_err());
    }
}
