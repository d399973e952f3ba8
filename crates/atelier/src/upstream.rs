//! Typed client for the upstream control plane and its global event stream.
//!
//! Two reqwest clients: control-plane calls use a finite timeout, the
//! event stream uses none at all and relies on caller-side cancellation
//! (dropping the [`EventStream`] closes the connection).

use std::pin::Pin;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use futures_util::{Stream, StreamExt};
use reqwest::header;

use crate::error::UpstreamError;
use crate::model::{
    FileContent, FileNode, MessageRequest, ModelRef, ProvidersResponse, SessionInfo, ShellRequest,
    ShellResponse, TextPartInput,
};

const CONTROL_TIMEOUT: Duration = Duration::from_secs(30);

/// Agent name used for gateway-issued shell commands.
const SHELL_AGENT: &str = "build";
/// Tool name whose part carries the shell output.
const SHELL_TOOL: &str = "bash";

pub struct UpstreamClient {
    base: String,
    client: reqwest::Client,
    stream_client: reqwest::Client,
}

impl UpstreamClient {
    /// Build a client for `base`, e.g. `http://127.0.0.1:4096`.
    pub fn new(base: &str) -> Result<Self, UpstreamError> {
        let base = base.trim_end_matches('/');
        if !base.starts_with("http://") && !base.starts_with("https://") {
            return Err(UpstreamError::BaseUrl(base.to_string()));
        }
        let client = reqwest::Client::builder()
            .timeout(CONTROL_TIMEOUT)
            .build()?;
        let stream_client = reqwest::Client::builder().build()?;
        Ok(Self {
            base: base.to_string(),
            client,
            stream_client,
        })
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    /// `POST /session`, returning the fresh session id.
    pub async fn create_session(&self) -> Result<String, UpstreamError> {
        let endpoint = self.endpoint("/session");
        let resp = self.client.post(&endpoint).json(&serde_json::json!({})).send().await?;
        let resp = check_status(resp, &endpoint)?;
        let info: SessionInfo = resp.json().await?;
        Ok(info.id)
    }

    /// `DELETE /session/{id}`.
    pub async fn delete_session(&self, session_id: &str) -> Result<(), UpstreamError> {
        let endpoint = self.endpoint(&format!("/session/{session_id}"));
        let resp = self.client.delete(&endpoint).send().await?;
        check_status(resp, &endpoint)?;
        Ok(())
    }

    /// `POST /session/{id}/message`: dispatch one user text part to a model.
    pub async fn post_message(
        &self,
        session_id: &str,
        text: &str,
        provider_id: &str,
        model_id: &str,
    ) -> Result<(), UpstreamError> {
        let endpoint = self.endpoint(&format!("/session/{session_id}/message"));
        let body = MessageRequest {
            parts: vec![TextPartInput::text(text)],
            model: ModelRef {
                provider_id: provider_id.to_string(),
                model_id: model_id.to_string(),
            },
        };
        let resp = self.client.post(&endpoint).json(&body).send().await?;
        check_status(resp, &endpoint)?;
        Ok(())
    }

    /// `POST /session/{id}/shell`: run a command, returning the output of
    /// the first shell-tool part in the structured reply.
    pub async fn shell(&self, session_id: &str, command: &str) -> Result<String, UpstreamError> {
        let endpoint = self.endpoint(&format!("/session/{session_id}/shell"));
        let body = ShellRequest {
            agent: SHELL_AGENT.to_string(),
            command: command.to_string(),
        };
        let resp = self.client.post(&endpoint).json(&body).send().await?;
        let resp = check_status(resp, &endpoint)?;
        let reply: ShellResponse = resp.json().await?;
        Ok(shell_output(&reply))
    }

    /// `GET /file?path=...`.
    pub async fn list_files(&self, path: &str) -> Result<Vec<FileNode>, UpstreamError> {
        let endpoint = self.endpoint("/file");
        let resp = self
            .client
            .get(&endpoint)
            .query(&[("path", path)])
            .send()
            .await?;
        let resp = check_status(resp, &endpoint)?;
        Ok(resp.json().await?)
    }

    /// `GET /file/content?path=...`.
    pub async fn file_content(&self, path: &str) -> Result<String, UpstreamError> {
        let endpoint = self.endpoint("/file/content");
        let resp = self
            .client
            .get(&endpoint)
            .query(&[("path", path)])
            .send()
            .await?;
        let resp = check_status(resp, &endpoint)?;
        let content: FileContent = resp.json().await?;
        Ok(content.content)
    }

    /// `GET /config/providers`.
    pub async fn providers(&self) -> Result<ProvidersResponse, UpstreamError> {
        let endpoint = self.endpoint("/config/providers");
        let resp = self.client.get(&endpoint).send().await?;
        let resp = check_status(resp, &endpoint)?;
        Ok(resp.json().await?)
    }

    /// Open the global event stream (`GET /event`). The connection has no
    /// timeout; dropping the returned stream closes it.
    pub async fn open_events(&self) -> Result<EventStream, UpstreamError> {
        let endpoint = self.endpoint("/event");
        let resp = self
            .stream_client
            .get(&endpoint)
            .header(header::ACCEPT, "text/event-stream")
            .header(header::CACHE_CONTROL, "no-cache")
            .send()
            .await?;
        let resp = check_status(resp, &endpoint)?;
        Ok(EventStream::new(resp.bytes_stream()))
    }
}

fn check_status(
    resp: reqwest::Response,
    endpoint: &str,
) -> Result<reqwest::Response, UpstreamError> {
    if resp.status().is_success() {
        Ok(resp)
    } else {
        Err(UpstreamError::Status {
            endpoint: endpoint.to_string(),
            status: resp.status(),
        })
    }
}

fn shell_output(reply: &ShellResponse) -> String {
    reply
        .parts
        .iter()
        .find(|part| {
            part.kind == crate::event::PartKind::Tool && part.tool.as_deref() == Some(SHELL_TOOL)
        })
        .and_then(|part| part.state.as_ref())
        .and_then(|state| state.output.clone())
        .unwrap_or_default()
}

type ByteStream = Pin<Box<dyn Stream<Item = reqwest::Result<Bytes>> + Send>>;

/// Line-oriented reader over the upstream SSE body.
///
/// Yields the payload of each `data: ` line; all other SSE framing lines
/// (comments, `event:`, blank separators) are skipped.
pub struct EventStream {
    inner: ByteStream,
    buffer: BytesMut,
}

impl EventStream {
    fn new(inner: impl Stream<Item = reqwest::Result<Bytes>> + Send + 'static) -> Self {
        Self {
            inner: Box::pin(inner),
            buffer: BytesMut::with_capacity(16 * 1024),
        }
    }

    /// Next `data:` payload. `Ok(None)` on upstream EOF.
    pub async fn next_payload(&mut self) -> Result<Option<String>, UpstreamError> {
        loop {
            if let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
                let line = self.buffer.split_to(pos + 1);
                let line = String::from_utf8_lossy(&line);
                let line = line.trim_end_matches(['\n', '\r']);
                if let Some(data) = line.strip_prefix("data: ") {
                    return Ok(Some(data.to_string()));
                }
                continue;
            }
            match self.inner.next().await {
                Some(Ok(chunk)) => self.buffer.extend_from_slice(&chunk),
                Some(Err(err)) => return Err(err.into()),
                // A trailing partial line without a newline carries no
                // complete payload; drop it with the stream.
                None => return Ok(None),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{EventPart, PartKind, ToolState};
    use futures_util::stream;

    fn byte_stream(chunks: Vec<&'static str>) -> EventStream {
        EventStream::new(stream::iter(
            chunks
                .into_iter()
                .map(|c| Ok(Bytes::from_static(c.as_bytes()))),
        ))
    }

    #[tokio::test]
    async fn splits_data_lines_across_chunk_boundaries() {
        let mut stream = byte_stream(vec![
            "data: {\"a\"",
            ":1}\n\ndata: {\"b\":2}\n",
            "\nevent: noise\n",
            "data: {\"c\":3}\n\n",
        ]);

        assert_eq!(
            stream.next_payload().await.unwrap().as_deref(),
            Some("{\"a\":1}")
        );
        assert_eq!(
            stream.next_payload().await.unwrap().as_deref(),
            Some("{\"b\":2}")
        );
        assert_eq!(
            stream.next_payload().await.unwrap().as_deref(),
            Some("{\"c\":3}")
        );
        assert_eq!(stream.next_payload().await.unwrap(), None);
    }

    #[tokio::test]
    async fn crlf_lines_are_trimmed() {
        let mut stream = byte_stream(vec!["data: {\"x\":1}\r\n\r\n"]);
        assert_eq!(
            stream.next_payload().await.unwrap().as_deref(),
            Some("{\"x\":1}")
        );
    }

    #[tokio::test]
    async fn eof_without_trailing_newline_ends_stream() {
        let mut stream = byte_stream(vec!["data: {\"y\":1}\ndata: {\"trunc"]);
        assert_eq!(
            stream.next_payload().await.unwrap().as_deref(),
            Some("{\"y\":1}")
        );
        assert_eq!(stream.next_payload().await.unwrap(), None);
    }

    #[test]
    fn shell_output_reads_first_bash_tool_part() {
        let reply = ShellResponse {
            parts: vec![
                EventPart {
                    id: "p1".into(),
                    session_id: "s".into(),
                    message_id: "m".into(),
                    kind: PartKind::Text,
                    text: Some("running".into()),
                    tool: None,
                    state: None,
                    filename: None,
                    url: None,
                    extra: Default::default(),
                },
                EventPart {
                    id: "p2".into(),
                    session_id: "s".into(),
                    message_id: "m".into(),
                    kind: PartKind::Tool,
                    text: None,
                    tool: Some("bash".into()),
                    state: Some(ToolState {
                        status: Some("completed".into()),
                        title: None,
                        output: Some("3000\n8000\n".into()),
                        extra: Default::default(),
                    }),
                    filename: None,
                    url: None,
                    extra: Default::default(),
                },
            ],
        };
        assert_eq!(shell_output(&reply), "3000\n8000\n");
    }

    #[test]
    fn shell_output_defaults_to_empty() {
        let reply = ShellResponse { parts: vec![] };
        assert_eq!(shell_output(&reply), "");
    }
}
