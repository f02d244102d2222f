use anyhow::{Context, Result, anyhow};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, info};

use super::{GeneratedImage, IMAGE_SIZE, ImageFuture, ImageGenerator};
use crate::providers::openai::extract_openai_error;
use crate::providers::retry::{
    RATE_LIMIT_BASE_DELAY, RATE_LIMIT_MAX_RETRIES, is_rate_limited, retry_after, wait_with_backoff,
};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub(crate) const DEFAULT_MODEL: &str = "dall-e-3";

#[derive(Debug, Clone)]
pub struct OpenAIImages {
    key: String,
    model: String,
}

impl OpenAIImages {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            model: DEFAULT_MODEL.to_string(),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        let model = model.into();
        if !model.trim().is_empty() {
            self.model = model;
        }
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn request_body(&self, prompt: &str) -> Value {
        json!({
            "model": self.model,
            "prompt": prompt,
            "n": 1,
            "size": format!("{}x{}", IMAGE_SIZE, IMAGE_SIZE),
            "response_format": "b64_json",
        })
    }
}

impl ImageGenerator for OpenAIImages {
    fn generate(&self, prompt: &str) -> ImageFuture {
        let body = self.request_body(prompt);
        let key = self.key.clone();
        let model = self.model.clone();
        Box::pin(async move {
            info!("requesting illustration from {}", model);
            let text = post_images(&key, &body).await?;
            let payload = parse_image_response(&text)?;
            let bytes = match payload.data {
                ImageData::Base64(encoded) => STANDARD
                    .decode(encoded.trim())
                    .with_context(|| "failed to decode base64 image")?,
                ImageData::Url(url) => download(&url).await?,
            };
            let image = image::load_from_memory(&bytes)
                .with_context(|| "failed to decode generated image")?
                .to_rgba8();
            Ok(GeneratedImage {
                image,
                model,
                revised_prompt: payload.revised_prompt,
            })
        })
    }
}

fn base_url() -> String {
    std::env::var("OPENAI_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string())
}

async fn post_images(key: &str, body: &Value) -> Result<String> {
    let client = reqwest::Client::new();
    let url = format!("{}/images/generations", base_url());
    debug!("POST {}", url);

    let mut attempt = 0usize;
    let mut delay = RATE_LIMIT_BASE_DELAY;
    loop {
        attempt += 1;
        let response = client.post(&url).bearer_auth(key).json(body).send().await?;

        let status = response.status();
        let retry_after = retry_after(response.headers());
        let text = response.text().await.unwrap_or_default();
        if status.is_success() {
            return Ok(text);
        }
        if is_rate_limited(status, &text) && attempt < RATE_LIMIT_MAX_RETRIES {
            delay = wait_with_backoff("OpenAI images", attempt, delay, retry_after).await;
            continue;
        }
        return Err(anyhow!(
            "OpenAI images API error ({}): {}",
            status,
            extract_openai_error(&text).unwrap_or(text)
        ));
    }
}

async fn download(url: &str) -> Result<Vec<u8>> {
    debug!("GET {}", url);
    let response = reqwest::get(url)
        .await
        .with_context(|| "failed to download generated image")?;
    let status = response.status();
    if !status.is_success() {
        return Err(anyhow!("image download failed ({})", status));
    }
    Ok(response.bytes().await?.to_vec())
}

#[derive(Debug, PartialEq, Eq)]
enum ImageData {
    Base64(String),
    Url(String),
}

#[derive(Debug)]
struct ImagePayload {
    data: ImageData,
    revised_prompt: Option<String>,
}

fn parse_image_response(text: &str) -> Result<ImagePayload> {
    #[derive(Deserialize)]
    struct ImagesResponse {
        #[serde(default)]
        data: Vec<ImageEntry>,
    }

    #[derive(Deserialize)]
    struct ImageEntry {
        b64_json: Option<String>,
        url: Option<String>,
        revised_prompt: Option<String>,
    }

    let response: ImagesResponse = serde_json::from_str(text)
        .with_context(|| "failed to parse OpenAI images response JSON")?;
    let entry = response
        .data
        .into_iter()
        .next()
        .ok_or_else(|| anyhow!("no image returned from OpenAI"))?;
    let data = match (entry.b64_json, entry.url) {
        (Some(encoded), _) if !encoded.trim().is_empty() => ImageData::Base64(encoded),
        (_, Some(url)) if !url.trim().is_empty() => ImageData::Url(url),
        _ => return Err(anyhow!("image entry has neither b64_json nor url")),
    };
    Ok(ImagePayload {
        data,
        revised_prompt: entry.revised_prompt,
    })
}
