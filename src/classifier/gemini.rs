use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde_json::{json, Value};

use crate::capture::ImageMime;
use crate::settings::ClassifierSettings;

use super::gate::Classifier;
use super::verdict::response_schema;

/// Gemini `generateContent` backend with structured JSON output.
pub struct GeminiClassifier {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
}

impl GeminiClassifier {
    pub fn new(settings: &ClassifierSettings) -> Self {
        let api_key = settings.api_key();
        if api_key.is_none() {
            log::warn!(
                "{} is not set; every classification will use the fallback verdict",
                settings.api_key_env
            );
        }

        Self {
            client: reqwest::Client::new(),
            endpoint: settings.endpoint.trim_end_matches('/').to_string(),
            model: settings.model.clone(),
            api_key,
        }
    }

    fn url(&self) -> String {
        format!("{}/models/{}:generateContent", self.endpoint, self.model)
    }
}

pub(crate) fn request_body(instruction: &str, image: &[u8], mime: ImageMime) -> Value {
    json!({
        "contents": [{
            "role": "user",
            "parts": [
                { "text": instruction },
                {
                    "inline_data": {
                        "mime_type": mime.as_str(),
                        "data": BASE64.encode(image)
                    }
                }
            ]
        }],
        "generationConfig": {
            "responseMimeType": "application/json",
            "responseSchema": response_schema()
        }
    })
}

/// First text part of the first candidate.
pub(crate) fn extract_text(body: &Value) -> Option<&str> {
    body["candidates"]
        .get(0)?
        .get("content")?
        .get("parts")?
        .as_array()?
        .iter()
        .find_map(|part| part.get("text").and_then(Value::as_str))
}

#[async_trait]
impl Classifier for GeminiClassifier {
    async fn classify(&self, instruction: &str, image: &[u8], mime: ImageMime) -> Result<Value> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| anyhow!("no API key configured for {}", self.model))?;

        let res = self
            .client
            .post(self.url())
            .header("x-goog-api-key", api_key)
            .json(&request_body(instruction, image, mime))
            .send()
            .await
            .context("classifier request failed")?;

        let status = res.status();
        if !status.is_success() {
            let err_text = res.text().await.unwrap_or_default();
            return Err(anyhow!("{} returned {}: {}", self.model, status, err_text));
        }

        let body: Value = res.json().await.context("classifier reply is not JSON")?;
        let text = extract_text(&body).context("classifier reply has no text candidate")?;
        serde_json::from_str(text).context("classifier candidate is not a JSON object")
    }
}
