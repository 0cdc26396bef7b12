//! HTTP client for the two service endpoints.
//!
//! `POST /api/upload` takes a multipart PDF and answers with the number of
//! chunks it indexed. `POST /api/chat` answers with a chunked plain-text
//! stream that may embed one evaluation payload (see `stream`).
//!
//! Background tasks never touch application state: they report back through
//! the shared event channel as [`ChatEvent`] / [`UploadEvent`].

use std::path::{Path, PathBuf};

use anyhow::{Result, anyhow};
use futures_util::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::chatlog::MessageId;
use crate::stream::{EvalExtractor, StreamItem, Utf8Decoder};
use crate::tui::AppEvent;

#[derive(Serialize)]
struct ChatRequest<'a> {
    query: &'a str,
}

#[derive(Deserialize)]
struct UploadResponse {
    chunks_indexed: u64,
}

#[derive(Deserialize)]
struct ErrorResponse {
    detail: String,
}

/// Progress of one chat stream, addressed to the message it feeds.
#[derive(Debug)]
pub enum ChatEvent {
    Item { id: MessageId, item: StreamItem },
    Done { id: MessageId },
    Failed { id: MessageId },
}

/// Terminal outcome of one upload attempt.
#[derive(Debug)]
pub enum UploadEvent {
    /// Server accepted and indexed the file.
    Indexed { chunks: u64 },
    /// Server refused the file; `detail` is its own words.
    Rejected { detail: String },
    /// The local file could not be read; no request was made.
    Unreadable { error: String },
    /// Transport-level failure, nothing server-specific to show.
    Failed,
}

#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
}

impl ApiClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Upload a PDF for indexing in the background. Exactly one
    /// [`UploadEvent`] lands on the channel per call.
    pub fn spawn_upload(&self, path: PathBuf, events: mpsc::UnboundedSender<AppEvent>) {
        let client = self.clone();
        tokio::spawn(async move {
            let event = client.upload(&path).await;
            let _ = events.send(AppEvent::Upload(event));
        });
    }

    async fn upload(&self, path: &Path) -> UploadEvent {
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(path = %path.display(), %err, "could not read upload file");
                return UploadEvent::Unreadable {
                    error: err.to_string(),
                };
            }
        };

        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "document.pdf".to_string());

        let part = match reqwest::multipart::Part::bytes(bytes)
            .file_name(file_name)
            .mime_str("application/pdf")
        {
            Ok(part) => part,
            Err(err) => {
                warn!(%err, "could not build multipart body");
                return UploadEvent::Failed;
            }
        };
        let form = reqwest::multipart::Form::new().part("file", part);

        let response = match self
            .client
            .post(format!("{}/api/upload", self.base_url))
            .multipart(form)
            .send()
            .await
        {
            Ok(response) => response,
            Err(err) => {
                warn!(%err, "upload request failed");
                return UploadEvent::Failed;
            }
        };

        let status = response.status();
        if !status.is_success() {
            // Surface the server's own error detail when the body has one.
            let detail = match response.json::<ErrorResponse>().await {
                Ok(body) => body.detail,
                Err(_) => status.to_string(),
            };
            return UploadEvent::Rejected { detail };
        }

        match response.json::<UploadResponse>().await {
            Ok(body) => UploadEvent::Indexed {
                chunks: body.chunks_indexed,
            },
            Err(err) => {
                warn!(%err, "upload response was not the expected shape");
                UploadEvent::Failed
            }
        }
    }

    /// Start streaming an answer for `query` into the message `id`. The
    /// read loop honors `cancel` at every suspension point; a cancelled
    /// stream ends silently without a terminal event.
    pub fn spawn_chat(
        &self,
        query: String,
        id: MessageId,
        events: mpsc::UnboundedSender<AppEvent>,
        cancel: CancellationToken,
    ) {
        let client = self.clone();
        tokio::spawn(async move {
            if let Err(err) = client.run_chat(&query, id, &events, &cancel).await {
                warn!(message_id = ?id, %err, "chat stream failed");
                let _ = events.send(AppEvent::Chat(ChatEvent::Failed { id }));
            }
        });
    }

    async fn run_chat(
        &self,
        query: &str,
        id: MessageId,
        events: &mpsc::UnboundedSender<AppEvent>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let response = self
            .client
            .post(format!("{}/api/chat", self.base_url))
            .json(&ChatRequest { query })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(anyhow!("chat request failed with status {status}"));
        }

        let mut body = response.bytes_stream();
        let mut decoder = Utf8Decoder::new();
        let mut extractor = EvalExtractor::new();

        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => {
                    debug!(message_id = ?id, "chat stream cancelled");
                    return Ok(());
                }
                next = body.next() => next,
            };

            let Some(chunk) = next else { break };
            let chunk = chunk?;

            let text = decoder.feed(&chunk);
            for item in extractor.push(&text) {
                if events.send(AppEvent::Chat(ChatEvent::Item { id, item })).is_err() {
                    // UI is gone, nobody left to render for.
                    return Ok(());
                }
            }
        }

        let tail = decoder.finish();
        let mut remaining = extractor.push(&tail);
        remaining.extend(extractor.finish());
        for item in remaining {
            if events.send(AppEvent::Chat(ChatEvent::Item { id, item })).is_err() {
                return Ok(());
            }
        }

        let _ = events.send(AppEvent::Chat(ChatEvent::Done { id }));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chatlog::{ChatLog, ChatRole};

    // The discard port; nothing answers there.
    const DEAD_SERVER: &str = "http://127.0.0.1:9";

    #[tokio::test]
    async fn upload_of_unreadable_file_makes_no_request() {
        let client = ApiClient::new(DEAD_SERVER);
        let event = client.upload(Path::new("/no/such/file.pdf")).await;
        assert!(matches!(event, UploadEvent::Unreadable { .. }));
    }

    #[tokio::test]
    async fn upload_transport_failure_is_generic() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("doc.pdf");
        tokio::fs::write(&path, b"%PDF-1.4").await.expect("write test file");

        let event = ApiClient::new(DEAD_SERVER).upload(&path).await;
        assert!(matches!(event, UploadEvent::Failed));
    }

    #[tokio::test]
    async fn failed_chat_stream_reports_exactly_one_terminal_event() {
        let mut log = ChatLog::new();
        let id = log.append(ChatRole::Bot, "");

        let (tx, mut rx) = mpsc::unbounded_channel();
        ApiClient::new(DEAD_SERVER).spawn_chat(
            "q".to_string(),
            id,
            tx,
            CancellationToken::new(),
        );

        match rx.recv().await {
            Some(AppEvent::Chat(ChatEvent::Failed { id: failed })) => assert_eq!(failed, id),
            other => panic!("expected a failure event, got {other:?}"),
        }
        // The task's sender is gone, so no second terminal event can follow.
        assert!(rx.recv().await.is_none());
    }
}
