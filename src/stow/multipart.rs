//! multipart/related body assembly (RFC 2387)

use std::io;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::stow::payload::{collect, send, ChunkSender, Payload};

/// Boundary separating the parts of every request body
pub const MULTIPART_BOUNDARY: &str = "mimeTypeBoundary";

const CRLF: &str = "\r\n";

/// Channel depth between the body writer and the HTTP client
const BODY_CHANNEL_DEPTH: usize = 8;

#[derive(Debug, Clone)]
pub struct Part {
    pub content_type: String,
    pub payload: Payload,
    pub content_location: Option<String>,
}

/// Ordered parts of one request body
#[derive(Debug, Clone)]
pub struct MultipartBody {
    boundary: String,
    parts: Vec<Part>,
}

impl Default for MultipartBody {
    fn default() -> Self {
        Self::new(MULTIPART_BOUNDARY)
    }
}

impl MultipartBody {
    pub fn new(boundary: impl Into<String>) -> Self {
        Self {
            boundary: boundary.into(),
            parts: Vec::new(),
        }
    }

    pub fn boundary(&self) -> &str {
        &self.boundary
    }

    pub fn add_part(
        &mut self,
        content_type: impl Into<String>,
        payload: Payload,
        content_location: Option<String>,
    ) -> &mut Self {
        self.parts.push(Part {
            content_type: content_type.into(),
            payload,
            content_location,
        });
        self
    }

    /// Drop every part so the body can carry the next upload
    pub fn reset(&mut self) {
        self.parts.clear();
    }

    pub fn parts(&self) -> &[Part] {
        &self.parts
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    /// Value of the request `Content-Type` header
    ///
    /// The `type` parameter reflects the first part; an empty body falls back
    /// to `application/dicom`.
    pub fn content_type(&self) -> String {
        let first = self
            .parts
            .first()
            .map(|p| p.content_type.as_str())
            .unwrap_or("application/dicom");
        format!(
            "multipart/related;type=\"{}\";boundary={}",
            first, self.boundary
        )
    }

    fn part_header(&self, part: &Part) -> String {
        let mut header = format!(
            "--{}{CRLF}Content-Type: {}{CRLF}",
            self.boundary, part.content_type
        );
        if let Some(location) = &part.content_location {
            header.push_str(&format!("Content-Location: {}{CRLF}", location));
        }
        header.push_str(CRLF);
        header
    }

    fn end_marker(&self) -> String {
        format!("--{}--{CRLF}", self.boundary)
    }

    /// Write the whole body into `tx`, part after part
    pub async fn write_to(&self, tx: &ChunkSender) -> io::Result<()> {
        for part in &self.parts {
            send(tx, Bytes::from(self.part_header(part))).await?;
            part.payload.write_to(tx).await?;
            send(tx, Bytes::from_static(CRLF.as_bytes())).await?;
        }
        send(tx, Bytes::from(self.end_marker())).await
    }

    /// Produce the body from a spawned writer task
    ///
    /// The task stops as soon as the returned stream is dropped. A failing
    /// part is reported as the last item of the stream.
    pub fn stream(&self) -> ReceiverStream<io::Result<Bytes>> {
        let (tx, rx) = mpsc::channel(BODY_CHANNEL_DEPTH);
        let body = self.clone();
        tokio::spawn(async move {
            if let Err(e) = body.write_to(&tx).await {
                tracing::warn!("Multipart body writer stopped: {}", e);
                let _ = tx.send(Err(e)).await;
            }
        });
        ReceiverStream::new(rx)
    }

    /// Collect the whole body in memory
    pub async fn to_bytes(&self) -> io::Result<Bytes> {
        collect(BODY_CHANNEL_DEPTH, |tx| async move { self.write_to(&tx).await }).await
    }

    /// One-line description of the parts, for logs
    pub fn prompt(&self) -> String {
        self.parts
            .iter()
            .map(|p| match &p.content_location {
                Some(location) => format!("{} ({})", p.content_type, location),
                None => p.content_type.clone(),
            })
            .collect::<Vec<_>>()
            .join(", ")
    }
}
