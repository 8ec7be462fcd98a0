// API client module: a small blocking HTTP client that talks to the Gemini
// REST endpoints. It is the production `GenerativeBackend`; everything it
// does is a single request with no retries.

use std::fs;
use std::io::{BufRead, BufReader};
use std::path::Path;

use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_LENGTH, CONTENT_TYPE};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, trace};

use crate::config::{ApiKey, Settings};
use crate::error::{CliError, Result};
use crate::gemini::GenerativeBackend;
use crate::types::{FileHandle, FilePage, GenerateRequest, GenerateResponse};

const API_VERSION: &str = "v1beta";
const PAGE_SIZE: u32 = 100;

/// Blocking client holding the reqwest client, the base URL of the service
/// and the API key sent with every call.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
    api_key: ApiKey,
}

/// Error body returned by the service: `{"error": {"code", "message", "status"}}`.
#[derive(Deserialize, Debug)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Deserialize, Debug)]
struct ErrorBody {
    #[serde(default)]
    message: String,
    #[serde(default)]
    status: String,
}

/// Upload responses wrap the file: `{"file": {...}}`.
#[derive(Deserialize, Debug)]
struct UploadResponse {
    file: FileHandle,
}

impl ApiClient {
    /// Build a client from settings. Fails with `MissingCredential` when no key
    /// is configured.
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let api_key = settings.api_key()?;
        Self::new(&settings.base_url, api_key)
    }

    pub fn new(base_url: &str, api_key: ApiKey) -> Result<Self> {
        let mut headers = HeaderMap::new();
        let mut key = HeaderValue::from_str(api_key.expose())
            .map_err(|_| CliError::MissingCredential(crate::env::API_KEY_VAR.to_string()))?;
        key.set_sensitive(true);
        headers.insert("x-goog-api-key", key);

        let client = Client::builder().default_headers(headers).build()?;
        Ok(ApiClient {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}/{}", self.base_url, API_VERSION, path)
    }

    fn model_url(&self, model: &str, method: &str) -> String {
        let model = model.strip_prefix("models/").unwrap_or(model);
        self.url(&format!("models/{}:{}", model, method))
    }

    /// Send and turn any non-2xx status into `CliError::Api`.
    fn send(&self, req: RequestBuilder) -> Result<Response> {
        let res = req.send()?;
        if res.status().is_success() {
            return Ok(res);
        }
        let status = res.status().as_u16();
        let txt = res.text().unwrap_or_default();
        Err(api_error(status, &txt))
    }
}

/// Map an error response to a `CliError`. 404s become `NotFound`.
fn api_error(status: u16, body: &str) -> CliError {
    let message = match serde_json::from_str::<ErrorEnvelope>(body) {
        Ok(env) if env.error.status.is_empty() => env.error.message,
        Ok(env) => format!("{} ({})", env.error.message, env.error.status),
        Err(_) => body.trim().to_string(),
    };
    if status == 404 {
        return CliError::NotFound(message);
    }
    CliError::Api { status, message }
}

/// Payload of one server-sent-events line, if it carries data.
fn sse_data(line: &str) -> Option<&str> {
    let data = line.strip_prefix("data:")?.trim();
    if data.is_empty() || data == "[DONE]" {
        None
    } else {
        Some(data)
    }
}

impl GenerativeBackend for ApiClient {
    fn generate(&self, model: &str, request: &GenerateRequest) -> Result<GenerateResponse> {
        let url = self.model_url(model, "generateContent");
        debug!(%url, "generateContent");
        let res = self.send(self.client.post(&url).json(request))?;
        let response: GenerateResponse = res.json()?;
        trace!(?response);
        Ok(response)
    }

    fn stream_generate(
        &self,
        model: &str,
        request: &GenerateRequest,
        on_chunk: &mut dyn FnMut(&GenerateResponse),
    ) -> Result<GenerateResponse> {
        let url = self.model_url(model, "streamGenerateContent");
        debug!(%url, "streamGenerateContent");
        let res = self.send(self.client.post(&url).query(&[("alt", "sse")]).json(request))?;

        let mut last = GenerateResponse::default();
        for line in BufReader::new(res).lines() {
            let line = line?;
            let Some(data) = sse_data(&line) else { continue };
            let chunk: GenerateResponse = serde_json::from_str(data)?;
            trace!(?chunk);
            on_chunk(&chunk);
            last = chunk;
        }
        Ok(last)
    }

    /// Resumable upload: one request to open the session, one to send the
    /// bytes and finalize.
    fn upload_file(&self, path: &Path, display_name: Option<&str>, mime_type: &str) -> Result<FileHandle> {
        let bytes = fs::read(path)?;
        let display_name = display_name
            .map(str::to_string)
            .or_else(|| path.file_name().map(|n| n.to_string_lossy().into_owned()))
            .unwrap_or_else(|| "upload".into());

        let start_url = format!("{}/upload/{}/files", self.base_url, API_VERSION);
        debug!(url = %start_url, size = bytes.len(), "starting upload");
        let res = self.send(
            self.client
                .post(&start_url)
                .header("X-Goog-Upload-Protocol", "resumable")
                .header("X-Goog-Upload-Command", "start")
                .header("X-Goog-Upload-Header-Content-Length", bytes.len().to_string())
                .header("X-Goog-Upload-Header-Content-Type", mime_type)
                .json(&json!({ "file": { "display_name": display_name } })),
        )?;

        let upload_url = res
            .headers()
            .get("x-goog-upload-url")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| CliError::Api {
                status: res.status().as_u16(),
                message: "upload session did not return an upload URL".into(),
            })?;

        let res = self.send(
            self.client
                .post(&upload_url)
                .header(CONTENT_LENGTH, bytes.len().to_string())
                .header(CONTENT_TYPE, mime_type)
                .header("X-Goog-Upload-Offset", "0")
                .header("X-Goog-Upload-Command", "upload, finalize")
                .body(bytes),
        )?;
        let uploaded: UploadResponse = res.json()?;
        debug!(name = %uploaded.file.name, "upload finished");
        Ok(uploaded.file)
    }

    fn list_files_page(&self, page_token: Option<&str>) -> Result<FilePage> {
        let mut req = self
            .client
            .get(self.url("files"))
            .query(&[("pageSize", PAGE_SIZE.to_string())]);
        if let Some(token) = page_token {
            req = req.query(&[("pageToken", token)]);
        }
        let page: FilePage = self.send(req)?.json()?;
        debug!(files = page.files.len(), more = page.next_page_token.is_some(), "listed files");
        Ok(page)
    }

    fn get_file(&self, name: &str) -> Result<FileHandle> {
        let res = self.send(self.client.get(self.url(name)))?;
        Ok(res.json()?)
    }

    fn delete_file(&self, name: &str) -> Result<()> {
        self.send(self.client.delete(self.url(name)))?;
        Ok(())
    }
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient")
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> ApiClient {
        ApiClient::new("https://example.test/", ApiKey::new("k").unwrap()).unwrap()
    }

    #[test]
    fn builds_model_urls() {
        let c = client();
        assert_eq!(
            c.model_url("gemini-1.5-flash", "generateContent"),
            "https://example.test/v1beta/models/gemini-1.5-flash:generateContent"
        );
        assert_eq!(
            c.model_url("models/gemini-1.5-pro", "streamGenerateContent"),
            "https://example.test/v1beta/models/gemini-1.5-pro:streamGenerateContent"
        );
        assert_eq!(c.url("files/abc"), "https://example.test/v1beta/files/abc");
    }

    #[test]
    fn error_body_is_parsed() {
        let body = r#"{"error": {"code": 400, "message": "API key not valid.", "status": "INVALID_ARGUMENT"}}"#;
        match api_error(400, body) {
            CliError::Api { status, message } => {
                assert_eq!(status, 400);
                assert_eq!(message, "API key not valid. (INVALID_ARGUMENT)");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn not_found_status_maps_to_not_found() {
        assert!(matches!(api_error(404, "gone"), CliError::NotFound(m) if m == "gone"));
    }

    #[test]
    fn sse_lines() {
        assert_eq!(sse_data(r#"data: {"candidates": []}"#), Some(r#"{"candidates": []}"#));
        assert_eq!(sse_data("data:"), None);
        assert_eq!(sse_data(""), None);
        assert_eq!(sse_data(": keep-alive"), None);
    }

    #[test]
    fn debug_hides_key() {
        let c = ApiClient::new("https://example.test", ApiKey::new("super-secret").unwrap()).unwrap();
        assert!(!format!("{c:?}").contains("super-secret"));
    }

    #[test]
    fn missing_key_fails_before_building() {
        assert!(matches!(
            ApiClient::from_settings(&Settings::default()),
            Err(CliError::MissingCredential(_))
        ));
    }
}
