use std::fs;
use std::io::{self, Write};
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::config::{Config, resolve_api_key};
use crate::util::{WorkingStatus, truncate_with_suffix};

const HEADER_API_KEY: &str = "x-goog-api-key";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Model,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Model => "model",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fragment {
    Text(String),
    /// Base64 payload plus its MIME type.
    Inline { mime_type: String, data: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationMessage {
    pub role: Role,
    pub fragments: Vec<Fragment>,
}

impl ConversationMessage {
    pub fn text(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            fragments: vec![Fragment::Text(text.into())],
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::text(Role::User, text)
    }

    pub fn model(text: impl Into<String>) -> Self {
        Self::text(Role::Model, text)
    }

    /// Concatenation of the text fragments; inline data is skipped.
    pub fn joined_text(&self) -> String {
        self.fragments
            .iter()
            .filter_map(|f| match f {
                Fragment::Text(t) => Some(t.as_str()),
                Fragment::Inline { .. } => None,
            })
            .collect()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct GenerationParams {
    pub max_output_tokens: Option<u32>,
    pub temperature: Option<f32>,
}

impl GenerationParams {
    pub fn is_empty(&self) -> bool {
        self.max_output_tokens.is_none() && self.temperature.is_none()
    }
}

#[derive(Debug, Clone)]
pub struct GenerateRequest<'a> {
    pub model: &'a str,
    pub messages: &'a [ConversationMessage],
    pub params: GenerationParams,
    pub system_instruction: Option<&'a str>,
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("{0}")]
    MissingApiKey(String),
    #[error("request failed: {0}")]
    Request(String),
    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },
    #[error("invalid response: {0}")]
    Decode(String),
    #[error("response blocked by the API ({0})")]
    Blocked(String),
    #[error("response interrupted after partial output: {message}")]
    StreamInterrupted { partial: String, message: String },
    #[error("the model returned an empty response")]
    EmptyResponse,
}

/// A reply without text cannot be sent back as a model turn.
pub fn require_text(text: String) -> Result<String, TransportError> {
    if text.trim().is_empty() {
        Err(TransportError::EmptyResponse)
    } else {
        Ok(text)
    }
}

/// The generative-model call. With `stream`, text is written to stdout as it arrives.
#[allow(async_fn_in_trait)]
pub trait Transport {
    async fn generate(
        &self,
        request: &GenerateRequest<'_>,
        stream: bool,
    ) -> Result<String, TransportError>;
}

pub struct GeminiClient {
    base_url: String,
    api_key: Result<String, String>,
    timeout: Duration,
    stream_timeout: Duration,
}

impl GeminiClient {
    /// A missing API key only surfaces when a call is attempted.
    pub fn new(cfg: &Config) -> Self {
        Self {
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            api_key: resolve_api_key(cfg).map_err(|e| e.to_string()),
            timeout: Duration::from_secs(cfg.timeout_secs),
            stream_timeout: Duration::from_secs(cfg.stream_timeout_secs),
        }
    }

    fn endpoint(&self, model: &str, stream: bool) -> String {
        let model = model.trim().trim_start_matches("models/");
        if stream {
            format!("{}/models/{}:streamGenerateContent?alt=sse", self.base_url, model)
        } else {
            format!("{}/models/{}:generateContent", self.base_url, model)
        }
    }
}

impl Transport for GeminiClient {
    async fn generate(
        &self,
        request: &GenerateRequest<'_>,
        stream: bool,
    ) -> Result<String, TransportError> {
        let api_key = self
            .api_key
            .as_ref()
            .map_err(|e| TransportError::MissingApiKey(e.clone()))?;
        let url = self.endpoint(request.model, stream);
        let body = WireRequest::from_request(request);
        debug!(%url, messages = request.messages.len(), stream, "sending generation request");

        let working = if stream {
            None
        } else {
            Some(WorkingStatus::start(format!("waiting for {}", request.model)))
        };
        let client = Client::builder()
            .timeout(if stream { self.stream_timeout } else { self.timeout })
            .build()
            .map_err(|e| TransportError::Request(format!("failed to build HTTP client: {e}")))?;

        let resp = client
            .post(&url)
            .header(HEADER_API_KEY, api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| TransportError::Request(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(TransportError::Api {
                status: status.as_u16(),
                message: api_error_message(&text),
            });
        }

        if stream {
            read_sse_stream(resp).await
        } else {
            let text = resp
                .text()
                .await
                .map_err(|e| TransportError::Request(format!("failed to read response body: {e}")))?;
            drop(working);
            let parsed: WireResponse = serde_json::from_str(&text)
                .map_err(|e| TransportError::Decode(e.to_string()))?;
            parsed.into_text()
        }
    }
}

async fn read_sse_stream(mut resp: reqwest::Response) -> Result<String, TransportError> {
    let mut full = String::new();
    let mut lines = SseLineBuffer::default();

    loop {
        let chunk = match resp.chunk().await {
            Ok(Some(chunk)) => chunk,
            Ok(None) => break,
            Err(err) => return Err(interrupted(full, err.to_string())),
        };
        for data in lines.push(&chunk) {
            append_event(&data, &mut full)?;
        }
    }
    if let Some(data) = lines.finish() {
        append_event(&data, &mut full)?;
    }

    Ok(full)
}

/// Prints the text of one stream event and appends it to `full`.
fn append_event(data: &str, full: &mut String) -> Result<(), TransportError> {
    let parsed: WireResponse = match serde_json::from_str(data) {
        Ok(v) => v,
        Err(err) => {
            debug!(error = %err, "skipping undecodable stream event");
            return Ok(());
        }
    };
    let delta = parsed
        .into_chunk_text()
        .map_err(|err| interrupted(std::mem::take(full), err.to_string()))?;
    if !delta.is_empty() {
        print!("{delta}");
        let _ = io::stdout().flush();
        full.push_str(&delta);
    }
    Ok(())
}

fn interrupted(partial: String, message: String) -> TransportError {
    if partial.is_empty() {
        TransportError::Request(message)
    } else {
        TransportError::StreamInterrupted { partial, message }
    }
}

/// Splits a byte stream into SSE `data:` payloads, keeping incomplete lines buffered.
#[derive(Debug, Default)]
struct SseLineBuffer {
    pending: Vec<u8>,
}

impl SseLineBuffer {
    fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(bytes);
        let mut out = Vec::new();
        while let Some(idx) = self.pending.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.pending.drain(..=idx).collect();
            out.extend(data_payload(&raw));
        }
        out
    }

    /// Payload of a last line that arrived without a newline.
    fn finish(&mut self) -> Option<String> {
        let raw = std::mem::take(&mut self.pending);
        data_payload(&raw)
    }
}

fn data_payload(raw: &[u8]) -> Option<String> {
    let line = String::from_utf8_lossy(raw);
    let data = line.trim_end_matches(['\n', '\r']).strip_prefix("data:")?.trim();
    if data.is_empty() || data == "[DONE]" {
        return None;
    }
    Some(data.to_string())
}

fn api_error_message(body: &str) -> String {
    #[derive(Deserialize)]
    struct Envelope {
        error: EnvelopeError,
    }
    #[derive(Deserialize)]
    struct EnvelopeError {
        message: String,
    }

    match serde_json::from_str::<Envelope>(body) {
        Ok(env) => env.error.message,
        Err(_) => truncate_with_suffix(body.trim(), 300, " ..."),
    }
}

/// Reads an image as inline data. Only PNG, JPEG, WEBP and GIF are accepted.
pub fn attach_image(path: &Path) -> Result<Fragment> {
    if !path.is_file() {
        bail!("Image file does not exist: {}", path.display());
    }
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();
    let mime_type = match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "webp" => "image/webp",
        "gif" => "image/gif",
        _ => bail!("Unsupported image type: .{}", ext),
    };
    let bytes = fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    Ok(Fragment::Inline {
        mime_type: mime_type.to_string(),
        data: BASE64.encode(bytes),
    })
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct WireRequest {
    contents: Vec<WireContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<WireContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<WireGenerationConfig>,
    safety_settings: Vec<WireSafetySetting>,
}

impl WireRequest {
    fn from_request(request: &GenerateRequest<'_>) -> Self {
        let contents = request.messages.iter().map(WireContent::from_message).collect();
        let system_instruction = request
            .system_instruction
            .filter(|s| !s.trim().is_empty())
            .map(|s| WireContent {
                role: None,
                parts: vec![WirePart::text(s)],
            });
        let generation_config = (!request.params.is_empty()).then(|| WireGenerationConfig {
            max_output_tokens: request.params.max_output_tokens,
            temperature: request.params.temperature,
        });
        Self {
            contents,
            system_instruction,
            generation_config,
            safety_settings: vec![WireSafetySetting {
                category: "HARM_CATEGORY_HARASSMENT",
                threshold: "BLOCK_MEDIUM_AND_ABOVE",
            }],
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct WireContent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<WirePart>,
}

impl WireContent {
    fn from_message(message: &ConversationMessage) -> Self {
        let parts = message
            .fragments
            .iter()
            .map(|f| match f {
                Fragment::Text(t) => WirePart::text(t),
                Fragment::Inline { mime_type, data } => WirePart {
                    text: None,
                    inline_data: Some(WireInlineData {
                        mime_type: mime_type.clone(),
                        data: data.clone(),
                    }),
                },
            })
            .collect();
        Self {
            role: Some(message.role.as_str().to_string()),
            parts,
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WirePart {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    inline_data: Option<WireInlineData>,
}

impl WirePart {
    fn text(text: &str) -> Self {
        Self {
            text: Some(text.to_string()),
            inline_data: None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireInlineData {
    mime_type: String,
    data: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct WireGenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Serialize)]
struct WireSafetySetting {
    category: &'static str,
    threshold: &'static str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireResponse {
    #[serde(default)]
    candidates: Vec<WireCandidate>,
    #[serde(default)]
    prompt_feedback: Option<WirePromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireCandidate {
    #[serde(default)]
    content: Option<WireContent>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WirePromptFeedback {
    #[serde(default)]
    block_reason: Option<String>,
}

impl WireResponse {
    fn block_reason(&self) -> Option<String> {
        self.prompt_feedback.as_ref()?.block_reason.clone()
    }

    fn candidate_text(self) -> Option<String> {
        let content = self.candidates.into_iter().next()?.content?;
        Some(content.parts.into_iter().filter_map(|p| p.text).collect())
    }

    fn into_text(self) -> Result<String, TransportError> {
        if let Some(reason) = self.block_reason() {
            return Err(TransportError::Blocked(reason));
        }
        if self.candidates.is_empty() {
            return Err(TransportError::Decode("response has no candidates".to_string()));
        }
        Ok(self.candidate_text().unwrap_or_default())
    }

    /// Stream events may legitimately carry no text.
    fn into_chunk_text(self) -> Result<String, TransportError> {
        if let Some(reason) = self.block_reason() {
            return Err(TransportError::Blocked(reason));
        }
        Ok(self.candidate_text().unwrap_or_default())
    }
}


#[cfg(test)]
mod tests {
    use serde_json::{Value, json};

    use super::*;

    #[test]
    fn request_body_uses_gemini_field_names() {
        let messages = vec![
            ConversationMessage::user("hi"),
            ConversationMessage {
                role: Role::User,
                fragments: vec![
                    Fragment::Text("what is this?".to_string()),
                    Fragment::Inline {
                        mime_type: "image/png".to_string(),
                        data: "AAAA".to_string(),
                    },
                ],
            },
        ];
        let request = GenerateRequest {
            model: "gemini-2.5-flash",
            messages: &messages,
            params: GenerationParams {
                max_output_tokens: Some(64),
                temperature: None,
            },
            system_instruction: Some("Be terse"),
        };
        let body: Value = serde_json::to_value(WireRequest::from_request(&request)).unwrap();

        assert_eq!(body["contents"][0], json!({"role": "user", "parts": [{"text": "hi"}]}));
        assert_eq!(
            body["contents"][1]["parts"][1],
            json!({"inlineData": {"mimeType": "image/png", "data": "AAAA"}})
        );
        assert_eq!(body["systemInstruction"], json!({"parts": [{"text": "Be terse"}]}));
        assert_eq!(body["generationConfig"], json!({"maxOutputTokens": 64}));
        assert_eq!(body["safetySettings"][0]["category"], "HARM_CATEGORY_HARASSMENT");
    }

    #[test]
    fn empty_params_and_instruction_are_omitted() {
        let messages = vec![ConversationMessage::user("hi")];
        let request = GenerateRequest {
            model: "m",
            messages: &messages,
            params: GenerationParams::default(),
            system_instruction: None,
        };
        let body: Value = serde_json::to_value(WireRequest::from_request(&request)).unwrap();
        assert!(body.get("generationConfig").is_none());
        assert!(body.get("systemInstruction").is_none());
    }

    #[test]
    fn response_text_joins_parts_of_first_candidate() {
        let raw = r#"{"candidates":[{"content":{"role":"model","parts":[{"text":"Hello, "},{"text":"world"}]}}]}"#;
        let parsed: WireResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.into_text().unwrap(), "Hello, world");
    }

    #[test]
    fn blocked_prompt_is_an_error() {
        let raw = r#"{"promptFeedback":{"blockReason":"SAFETY"}}"#;
        let parsed: WireResponse = serde_json::from_str(raw).unwrap();
        assert!(matches!(parsed.into_text(), Err(TransportError::Blocked(r)) if r == "SAFETY"));
    }

    #[test]
    fn sse_buffer_handles_split_lines_and_multibyte_text() {
        let mut buf = SseLineBuffer::default();
        let event = "data: {\"text\":\"señal\"}\r\n\r\n".as_bytes();
        let (head, tail) = event.split_at(20);
        assert!(buf.push(head).is_empty());
        assert_eq!(buf.push(tail), vec!["{\"text\":\"señal\"}".to_string()]);
        assert!(buf.push(b": keep-alive\n").is_empty());
    }

    #[test]
    fn sse_buffer_flushes_unterminated_last_line() {
        let mut buf = SseLineBuffer::default();
        assert_eq!(buf.push(b"data: {\"a\":1}\ndata: {\"b\":2}"), vec!["{\"a\":1}".to_string()]);
        assert_eq!(buf.finish().as_deref(), Some("{\"b\":2}"));
        assert_eq!(buf.finish(), None);

        buf.push(b"data: [DONE]");
        assert_eq!(buf.finish(), None);
    }

    #[test]
    fn blank_replies_are_rejected() {
        assert!(matches!(require_text(" \n".to_string()), Err(TransportError::EmptyResponse)));
        assert_eq!(require_text("ok".to_string()).unwrap(), "ok");
    }

    #[test]
    fn api_error_prefers_envelope_message() {
        let body = r#"{"error":{"code":400,"message":"API key not valid","status":"INVALID_ARGUMENT"}}"#;
        assert_eq!(api_error_message(body), "API key not valid");
        assert_eq!(api_error_message("bad gateway"), "bad gateway");
    }

    #[test]
    fn endpoint_strips_models_prefix() {
        let client = GeminiClient::new(&Config::default());
        assert_eq!(
            client.endpoint("models/gemini-1.5-pro", false),
            "https://generativelanguage.googleapis.com/v1beta/models/gemini-1.5-pro:generateContent"
        );
        assert!(client.endpoint("gemini-1.5-pro", true).ends_with(":streamGenerateContent?alt=sse"));
    }

    #[test]
    fn attach_image_checks_existence_and_type() {
        let dir = tempfile::tempdir().unwrap();
        assert!(attach_image(&dir.path().join("missing.png")).is_err());

        let bmp = dir.path().join("pic.bmp");
        fs::write(&bmp, [0u8; 4]).unwrap();
        let err = attach_image(&bmp).unwrap_err().to_string();
        assert!(err.contains("Unsupported image type"));

        let png = dir.path().join("pic.PNG");
        fs::write(&png, [1u8, 2, 3]).unwrap();
        match attach_image(&png).unwrap() {
            Fragment::Inline { mime_type, data } => {
                assert_eq!(mime_type, "image/png");
                assert_eq!(data, "AQID");
            }
            other => panic!("unexpected fragment {other:?}"),
        }
    }
}
