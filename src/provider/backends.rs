use crate::error::ForensicError;
use crate::provider::gateway::{CompletionRequest, ModelGateway, ProviderKind};
use anyhow::{Context, Result, anyhow};
use reqwest::blocking::{Client, Response};
use serde_json::{Value, json};
use std::time::Duration;

const ANTHROPIC_VERSION: &str = "2023-06-01";
const ERROR_BODY_PREVIEW_CHARS: usize = 300;

fn build_client(timeout: Duration) -> Result<Client> {
    Client::builder()
        .timeout(timeout)
        .build()
        .context("failed to build http client")
}

fn ensure_success(provider: &str, response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().unwrap_or_default();
    let preview: String = body.chars().take(ERROR_BODY_PREVIEW_CHARS).collect();
    anyhow::bail!("{provider} call failed with status {status}: {preview}")
}

pub struct LocalBackend {
    client: Client,
    base_url: String,
    model: String,
}

impl LocalBackend {
    pub fn new(base_url: &str, model: String, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: build_client(timeout)?,
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
        })
    }
}

pub fn local_payload(model: &str, request: &CompletionRequest) -> Value {
    let mut payload = json!({
        "model": model,
        "prompt": request.prompt,
        "stream": false,
        "options": {
            "temperature": request.temperature,
            "num_predict": request.max_output_tokens,
        }
    });
    if !request.images.is_empty() {
        let images: Vec<&str> = request
            .images
            .iter()
            .map(|img| img.base64_data.as_str())
            .collect();
        payload["images"] = json!(images);
    }
    payload
}

pub fn extract_local_text(json: &Value) -> Option<String> {
    json.get("response")
        .and_then(Value::as_str)
        .map(str::to_string)
}

impl ModelGateway for LocalBackend {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Local
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn complete(&self, request: &CompletionRequest) -> Result<String> {
        let url = format!("{}/api/generate", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&local_payload(&self.model, request))
            .send()
            .with_context(|| format!("local model request to {url} failed"))?;
        let json: Value = ensure_success("local model", response)?.json()?;
        extract_local_text(&json).context("local model response missing text content")
    }

    fn preflight(&self) -> Result<()> {
        let url = format!("{}/api/tags", self.base_url);
        match self.client.get(&url).send() {
            Ok(response) if response.status().is_success() => Ok(()),
            Ok(response) => Err(anyhow!(ForensicError::EndpointUnreachable {
                url,
                reason: format!("status {}", response.status()),
            })),
            Err(err) => Err(anyhow!(ForensicError::EndpointUnreachable {
                url,
                reason: err.to_string(),
            })),
        }
    }
}

pub struct OpenAiBackend {
    client: Client,
    base_url: String,
    model: String,
    api_key: String,
}

impl OpenAiBackend {
    pub fn new(base_url: &str, model: String, api_key: String, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: build_client(timeout)?,
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
            api_key,
        })
    }
}

pub fn openai_payload(model: &str, request: &CompletionRequest) -> Value {
    let content = if request.images.is_empty() {
        json!(request.prompt)
    } else {
        let mut parts = vec![json!({"type": "text", "text": request.prompt})];
        for img in &request.images {
            parts.push(json!({
                "type": "image_url",
                "image_url": {
                    "url": format!("data:{};base64,{}", img.mime_type, img.base64_data)
                }
            }));
        }
        Value::Array(parts)
    };
    json!({
        "model": model,
        "messages": [
            {"role": "user", "content": content}
        ],
        "max_tokens": request.max_output_tokens,
        "temperature": request.temperature,
    })
}

pub fn extract_openai_text(json: &Value) -> Option<String> {
    let choices = json.get("choices").and_then(Value::as_array)?;
    let first = choices.first()?;
    let content = first.get("message")?.get("content")?;
    match content {
        Value::String(s) => Some(s.to_string()),
        Value::Array(parts) => {
            let mut chunks = Vec::new();
            for part in parts {
                if let Some(text) = part.get("text").and_then(Value::as_str) {
                    chunks.push(text.to_string());
                }
            }
            if chunks.is_empty() {
                None
            } else {
                Some(chunks.join("\n"))
            }
        }
        _ => None,
    }
}

impl ModelGateway for OpenAiBackend {
    fn kind(&self) -> ProviderKind {
        ProviderKind::OpenAi
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn complete(&self, request: &CompletionRequest) -> Result<String> {
        let url = format!("{}/v1/chat/completions", self.base_url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&openai_payload(&self.model, request))
            .send()
            .context("openai request failed")?;
        let json: Value = ensure_success("openai", response)?.json()?;
        extract_openai_text(&json).context("openai response missing text content")
    }
}

pub struct AnthropicBackend {
    client: Client,
    base_url: String,
    model: String,
    api_key: String,
}

impl AnthropicBackend {
    pub fn new(base_url: &str, model: String, api_key: String, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: build_client(timeout)?,
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
            api_key,
        })
    }
}

pub fn anthropic_payload(model: &str, request: &CompletionRequest) -> Value {
    let mut content = Vec::with_capacity(request.images.len() + 1);
    for img in &request.images {
        content.push(json!({
            "type": "image",
            "source": {
                "type": "base64",
                "media_type": img.mime_type,
                "data": img.base64_data,
            }
        }));
    }
    content.push(json!({"type": "text", "text": request.prompt}));
    json!({
        "model": model,
        "max_tokens": request.max_output_tokens,
        "temperature": request.temperature,
        "messages": [
            {"role": "user", "content": content}
        ]
    })
}

pub fn extract_anthropic_text(json: &Value) -> Option<String> {
    let mut chunks = Vec::new();
    let content = json.get("content").and_then(Value::as_array)?;
    for part in content {
        if let Some(text) = part.get("text").and_then(Value::as_str) {
            chunks.push(text.to_string());
        }
    }
    if chunks.is_empty() {
        None
    } else {
        Some(chunks.join("\n"))
    }
}

impl ModelGateway for AnthropicBackend {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Anthropic
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn complete(&self, request: &CompletionRequest) -> Result<String> {
        let url = format!("{}/v1/messages", self.base_url);
        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&anthropic_payload(&self.model, request))
            .send()
            .context("anthropic request failed")?;
        let json: Value = ensure_success("anthropic", response)?.json()?;
        extract_anthropic_text(&json).context("anthropic response missing text content")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::gateway::ImageAttachment;

    fn request_with_image() -> CompletionRequest {
        CompletionRequest::text("describe", 4096, 0.2).with_images(vec![ImageAttachment {
            filename: "IMG-1.jpg".to_string(),
            mime_type: "image/jpeg".to_string(),
            base64_data: "QUJD".to_string(),
        }])
    }

    #[test]
    fn local_payload_disables_streaming_and_carries_images() {
        let payload = local_payload("llava", &request_with_image());
        assert_eq!(payload["stream"], json!(false));
        assert_eq!(payload["images"], json!(["QUJD"]));
        assert_eq!(payload["options"]["num_predict"], json!(4096));
    }

    #[test]
    fn local_payload_omits_images_for_text_requests() {
        let payload = local_payload("llama3.1", &CompletionRequest::text("hi", 10, 0.0));
        assert!(payload.get("images").is_none());
    }

    #[test]
    fn openai_payload_uses_data_url_parts_for_images() {
        let payload = openai_payload("gpt-4o", &request_with_image());
        let content = payload["messages"][0]["content"]
            .as_array()
            .expect("multi-part content");
        assert_eq!(content[0]["type"], json!("text"));
        assert_eq!(
            content[1]["image_url"]["url"],
            json!("data:image/jpeg;base64,QUJD")
        );
    }

    #[test]
    fn anthropic_payload_places_images_before_text() {
        let payload = anthropic_payload("claude-3-5-sonnet-latest", &request_with_image());
        let content = payload["messages"][0]["content"]
            .as_array()
            .expect("content blocks");
        assert_eq!(content[0]["type"], json!("image"));
        assert_eq!(content[0]["source"]["media_type"], json!("image/jpeg"));
        assert_eq!(content[1]["text"], json!("describe"));
        assert_eq!(payload["max_tokens"], json!(4096));
    }

    #[test]
    fn extract_local_text_reads_response_field() {
        let payload = json!({"model": "llama3.1", "response": "hello", "done": true});
        assert_eq!(extract_local_text(&payload).as_deref(), Some("hello"));
    }

    #[test]
    fn extract_anthropic_text_reads_content_blocks() {
        let payload = json!({
            "content": [
                {"type": "text", "text": "line one"},
                {"type": "text", "text": "line two"}
            ]
        });
        assert_eq!(
            extract_anthropic_text(&payload).as_deref(),
            Some("line one\nline two")
        );
    }

    #[test]
    fn extract_openai_text_reads_chat_completions_shape() {
        let payload = json!({
            "choices": [
                {"message": {"content": "hello from openai"}}
            ]
        });
        assert_eq!(
            extract_openai_text(&payload).as_deref(),
            Some("hello from openai")
        );
    }
}
