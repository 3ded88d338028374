//! Drive service REST client
//!
//! Async HTTP client using `reqwest` with Bearer token authentication.
//! Full-mode sessions map onto `/drive/init`, `/drive/upload/chunk` and
//! `/drive/complete`. Delta payloads go to `/drive/delta-upload`, which
//! commits on receipt, so delta sessions are tracked client-side only and
//! completing one checks the size the server reports having rebuilt.

use super::SessionRequest;
use crate::delta::{Instruction, NovelBlock};
use crate::error::{Error, Result};
use crate::signature::{FileSignature, StrongHash};
use bytes::Bytes;
use dashmap::DashMap;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::multipart::{Form, Part};
use reqwest::StatusCode;
use serde::Deserialize;
use std::sync::Arc;

const DELTA_SESSION_PREFIX: &str = "delta-";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeltaUploadResponse {
    file_id: String,
    /// Bytes the server reconstructed
    size: u64,
}

#[derive(Debug)]
struct DeltaSession {
    request: SessionRequest,
    committed: Option<DeltaUploadResponse>,
}

#[derive(Debug, Deserialize)]
struct FolderContent {
    #[serde(default)]
    files: Vec<FolderEntry>,
}

#[derive(Debug, Deserialize)]
struct FolderEntry {
    #[serde(alias = "file_id")]
    id: String,
    name: String,
    #[serde(default)]
    trashed: bool,
}

/// Drive service client; clones share the connection pool
#[derive(Debug, Clone)]
pub struct HttpRemote {
    http: reqwest::Client,
    base_url: String,
    delta_sessions: Arc<DashMap<String, DeltaSession>>,
}

impl HttpRemote {
    /// Create a client for `base_url` (e.g. `http://localhost:8080/api`)
    pub fn new(base_url: &str, token: Option<&str>) -> Result<Self> {
        let mut headers = HeaderMap::new();
        if let Some(token) = token {
            let value = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|_| Error::config("access token contains invalid header characters"))?;
            headers.insert(AUTHORIZATION, value);
        }

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .user_agent(concat!("drivesync/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            delta_sessions: Arc::new(DashMap::new()),
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub async fn open_session(&self, request: &SessionRequest) -> Result<String> {
        if request.base_file_id.is_some() {
            let session_id = format!("{}{}", DELTA_SESSION_PREFIX, uuid::Uuid::new_v4());
            self.delta_sessions.insert(
                session_id.clone(),
                DeltaSession {
                    request: request.clone(),
                    committed: None,
                },
            );
            return Ok(session_id);
        }

        let mut form = Form::new()
            .text("filename", request.filename.clone())
            .text("size", request.total_size.to_string());
        if let Some(folder) = &request.parent_folder {
            form = form.text("folderId", folder.clone());
        }

        let resp = self
            .http
            .post(self.endpoint("/drive/init"))
            .multipart(form)
            .send()
            .await
            .map_err(|e| Error::session_open(e.to_string()))?;

        let body = success_body(resp).await.map_err(Error::session_open)?;
        let session_id = body.trim().to_string();
        if session_id.is_empty() {
            return Err(Error::session_open("server returned an empty upload id"));
        }

        tracing::debug!(session_id = %session_id, filename = %request.filename, "Session opened");
        Ok(session_id)
    }

    pub async fn fetch_signature(&self, file_id: &str) -> Result<Option<FileSignature>> {
        let resp = self
            .http
            .get(self.endpoint(&format!("/drive/signature/{file_id}")))
            .send()
            .await
            .map_err(|e| Error::signature_unavailable(file_id, e.to_string()))?;

        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let body = success_body(resp)
            .await
            .map_err(|message| Error::signature_unavailable(file_id, message))?;
        let signature: FileSignature = serde_json::from_str(&body)
            .map_err(|e| Error::signature_unavailable(file_id, format!("malformed signature: {e}")))?;

        Ok(Some(signature))
    }

    /// Id of the file named `filename` in `folder` (root when `None`)
    pub async fn find_file(&self, filename: &str, folder: Option<&str>) -> Result<Option<String>> {
        let resp = self
            .http
            .get(self.endpoint("/drive/content"))
            .query(&[("folderId", folder.unwrap_or("root"))])
            .send()
            .await?;

        let body = success_body(resp).await.map_err(Error::protocol)?;
        let content: FolderContent = serde_json::from_str(&body)
            .map_err(|e| Error::protocol(format!("malformed folder listing: {e}")))?;

        Ok(content
            .files
            .into_iter()
            .find(|f| f.name == filename && !f.trashed)
            .map(|f| f.id))
    }

    pub async fn transmit_chunk(&self, session_id: &str, index: usize, hash: &StrongHash, data: Bytes) -> Result<()> {
        let form = Form::new()
            .text("uploadId", session_id.to_string())
            .text("index", index.to_string())
            .text("hash", hash.to_hex())
            .part("chunk", sized_part(data).file_name("blob"));

        let resp = self
            .http
            .post(self.endpoint("/drive/upload/chunk"))
            .multipart(form)
            .send()
            .await
            .map_err(|e| Error::transmission(session_id, e.to_string()))?;

        success_body(resp)
            .await
            .map_err(|message| Error::transmission(session_id, format!("chunk {index}: {message}")))?;
        Ok(())
    }

    pub async fn transmit_delta(
        &self,
        session_id: &str,
        instructions: &[Instruction],
        novel_blocks: &[NovelBlock],
    ) -> Result<()> {
        let (base_file_id, filename, total_size) = {
            let session = self
                .delta_sessions
                .get(session_id)
                .ok_or_else(|| Error::transmission(session_id, "Session not found"))?;
            let base = session
                .request
                .base_file_id
                .clone()
                .ok_or_else(|| Error::transmission(session_id, "session has no base file"))?;
            (base, session.request.filename.clone(), session.request.total_size)
        };

        let instructions_json =
            serde_json::to_string(instructions).map_err(|e| Error::transmission(session_id, e.to_string()))?;

        let mut form = Form::new()
            .text("fileId", base_file_id)
            .text("instructions", instructions_json)
            .text("filename", filename)
            .text("totalSize", total_size.to_string());

        // The server resolves Insert::block_index against part names
        for (position, block) in novel_blocks.iter().enumerate() {
            form = form.part(
                format!("block_{position}"),
                sized_part(block.data.clone()).file_name(format!("block_{position}")),
            );
        }

        let resp = self
            .http
            .post(self.endpoint("/drive/delta-upload"))
            .multipart(form)
            .send()
            .await
            .map_err(|e| Error::transmission(session_id, e.to_string()))?;

        let body = success_body(resp)
            .await
            .map_err(|message| Error::transmission(session_id, message))?;
        let committed: DeltaUploadResponse = serde_json::from_str(&body)
            .map_err(|e| Error::transmission(session_id, format!("malformed delta response: {e}")))?;

        tracing::debug!(
            session_id = %session_id,
            file_id = %committed.file_id,
            size = committed.size,
            "Delta accepted"
        );

        if let Some(mut session) = self.delta_sessions.get_mut(session_id) {
            session.committed = Some(committed);
        }
        Ok(())
    }

    pub async fn complete_session(&self, session_id: &str) -> Result<String> {
        if session_id.starts_with(DELTA_SESSION_PREFIX) {
            let (_, session) = self
                .delta_sessions
                .remove(session_id)
                .ok_or_else(|| Error::finalize(session_id, "Session missing"))?;
            let committed = session
                .committed
                .ok_or_else(|| Error::finalize(session_id, "delta was never acknowledged"))?;

            // The server skips instructions it cannot resolve, so a short
            // rebuild is only visible here
            if committed.size != session.request.total_size {
                return Err(Error::finalize(
                    session_id,
                    format!(
                        "server rebuilt {} bytes, session declared {}",
                        committed.size, session.request.total_size
                    ),
                ));
            }
            return Ok(committed.file_id);
        }

        let resp = self
            .http
            .post(self.endpoint("/drive/complete"))
            .query(&[("uploadId", session_id)])
            .send()
            .await
            .map_err(|e| Error::finalize(session_id, e.to_string()))?;

        let body = success_body(resp)
            .await
            .map_err(|message| Error::finalize(session_id, message))?;
        let file_id = body.trim().to_string();
        if file_id.is_empty() {
            return Err(Error::finalize(session_id, "server returned an empty file id"));
        }

        Ok(file_id)
    }
}

/// File part that carries its length, so the form is sent with `Content-Length`
fn sized_part(data: Bytes) -> Part {
    let len = data.len() as u64;
    Part::stream_with_length(data, len)
}

/// Body of a 2xx response, or a message describing the failure
async fn success_body(resp: reqwest::Response) -> std::result::Result<String, String> {
    let status = resp.status();
    let body = resp.text().await.map_err(|e| e.to_string())?;

    if !status.is_success() {
        return Err(format!("HTTP {}: {}", status.as_u16(), body.trim()));
    }

    Ok(body)
}
