//! HTTP exchange with a STOW-RS store endpoint

use std::path::Path;

use dicom_dictionary_std::tags;
use dicom_object::meta::{FileMetaTable, FileMetaTableBuilder};
use dicom_object::InMemDicomObject;
use dimse::ProgressStatus;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, CONTENT_TYPE, USER_AGENT};
use reqwest::{Body, Client, StatusCode, Url};
use serde_json::Value;
use tokio::io::AsyncRead;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::StowConfig;
use crate::stow::encapsulated::{
    content_location, ensure_uid, has_encapsulated_document, reference_bulk_data,
    set_document_attributes, string_value,
};
use crate::stow::error::{Result, StowError};
use crate::stow::multipart::MultipartBody;
use crate::stow::payload::Payload;
use crate::stow::HttpContentType;

pub const DEFAULT_USER_AGENT: &str = concat!("stowrs/", env!("CARGO_PKG_VERSION"));

/// DICOM JSON key of Failed SOP Sequence (0008,1198)
const FAILED_SOP_SEQUENCE_KEY: &str = "00081198";

/// Outcome of one accepted store request
#[derive(Debug, Clone)]
pub struct StowResponse {
    pub status: u16,
    pub outcome: ProgressStatus,
    /// Store report returned by the service, possibly empty
    pub body: String,
}

/// Client of one STOW-RS endpoint
///
/// Exchanges are serialized: the multipart body is reused from one upload to
/// the next and a second upload waits for the first to finish.
pub struct StowUploader {
    client: Client,
    url: Url,
    content_type: HttpContentType,
    headers: HeaderMap,
    body: Mutex<MultipartBody>,
    closed: CancellationToken,
}

impl StowUploader {
    pub fn new(config: &StowConfig) -> Result<Self> {
        let url = Url::parse(&config.url)
            .map_err(|e| StowError::config(format!("invalid STOW-RS URL {}: {}", config.url, e)))?;

        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, header_value(&config.accept)?);
        headers.insert(
            USER_AGENT,
            header_value(config.user_agent.as_deref().unwrap_or(DEFAULT_USER_AGENT))?,
        );
        for (name, value) in &config.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|_| StowError::config(format!("invalid header name '{}'", name)))?;
            headers.insert(name, header_value(value)?);
        }

        let mut builder = Client::builder().connect_timeout(config.connect_timeout());
        if let Some(timeout) = config.request_timeout() {
            builder = builder.timeout(timeout);
        }
        let client = builder.build()?;

        Ok(Self {
            client,
            url,
            content_type: config.content_type,
            headers,
            body: Mutex::new(MultipartBody::default()),
            closed: CancellationToken::new(),
        })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn content_type(&self) -> HttpContentType {
        self.content_type
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Upload an on-disk Part 10 file as is
    pub async fn upload_file(&self, path: impl AsRef<Path>) -> Result<StowResponse> {
        let path = path.as_ref();
        // Surface a missing file before any byte goes on the wire
        tokio::fs::metadata(path).await?;

        let mut body = self.body.lock().await;
        body.reset();
        body.add_part(HttpContentType::Dicom.as_str(), Payload::file(path), None);
        self.send(&body).await
    }

    /// Upload caller bytes prefixed by freshly written file meta information
    ///
    /// `reader` must yield the dataset encoded in the transfer syntax named by
    /// `file_meta`; it is passed through untouched.
    pub async fn upload_stream<R>(&self, reader: R, file_meta: &FileMetaTable) -> Result<StowResponse>
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        let payload = Payload::meta_prefixed(file_meta, reader)?;

        let mut body = self.body.lock().await;
        body.reset();
        body.add_part(HttpContentType::Dicom.as_str(), payload, None);
        self.send(&body).await
    }

    /// Upload an edited dataset, re-encoded in `transfer_syntax`
    pub async fn upload_dataset(
        &self,
        dataset: &InMemDicomObject,
        transfer_syntax: &str,
    ) -> Result<StowResponse> {
        let sop_class_uid = string_value(dataset, tags::SOP_CLASS_UID)
            .ok_or_else(|| StowError::encoding("dataset has no SOP Class UID"))?;
        let sop_instance_uid = string_value(dataset, tags::SOP_INSTANCE_UID)
            .ok_or_else(|| StowError::encoding("dataset has no SOP Instance UID"))?;

        let file_object = dataset
            .clone()
            .with_meta(
                FileMetaTableBuilder::new()
                    .transfer_syntax(transfer_syntax)
                    .media_storage_sop_class_uid(sop_class_uid)
                    .media_storage_sop_instance_uid(sop_instance_uid),
            )
            .map_err(|e| StowError::encoding(format!("cannot build file meta information: {}", e)))?;

        let mut body = self.body.lock().await;
        body.reset();
        body.add_part(
            HttpContentType::Dicom.as_str(),
            Payload::encoded(file_object),
            None,
        );
        self.send(&body).await
    }

    /// Upload a non-DICOM document (PDF, CDA, ...) with its metadata
    ///
    /// Study, series and instance UIDs are generated only when `dataset` lacks
    /// them. The document is sent unmodified as the second part.
    pub async fn upload_encapsulated_document(
        &self,
        dataset: &mut InMemDicomObject,
        file: impl AsRef<Path>,
        mime_type: &str,
        sop_class_uid: &str,
    ) -> Result<StowResponse> {
        let file = file.as_ref();
        set_document_attributes(dataset, file, mime_type).await?;
        let location = content_location(file)?;

        dataset.put_str(tags::SOP_CLASS_UID, dicom_core::VR::UI, sop_class_uid);
        ensure_uid(dataset, tags::STUDY_INSTANCE_UID);
        ensure_uid(dataset, tags::SERIES_INSTANCE_UID);
        let sop_instance_uid = ensure_uid(dataset, tags::SOP_INSTANCE_UID);

        let mut metadata = dicom_json_tool::identifier_to_json_value(dataset)?;
        if !has_encapsulated_document(dataset) {
            reference_bulk_data(&mut metadata, &location)?;
        }

        let (metadata_type, metadata_bytes) = match self.content_type {
            HttpContentType::Json => (
                HttpContentType::Json,
                serde_json::to_vec(&Value::Array(vec![metadata]))?,
            ),
            HttpContentType::Xml | HttpContentType::Dicom => (
                HttpContentType::Xml,
                dicom_json_tool::json_value_to_xml(&metadata)?.into_bytes(),
            ),
        };
        debug!(
            "Encapsulating {} as {} (SOP Instance UID {})",
            file.display(),
            mime_type,
            sop_instance_uid
        );

        let mut body = self.body.lock().await;
        body.reset();
        body.add_part(metadata_type.as_str(), Payload::buffer(metadata_bytes), None);
        body.add_part(mime_type, Payload::file(file), Some(location));
        self.send(&body).await
    }

    /// Cancel the exchange in flight and refuse new ones
    pub fn close(&self) {
        if !self.closed.is_cancelled() {
            debug!("Closing STOW-RS uploader for {}", self.url);
            self.closed.cancel();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    async fn send(&self, body: &MultipartBody) -> Result<StowResponse> {
        if self.is_closed() {
            return Err(StowError::Closed);
        }

        let content_type = body.content_type();
        debug!("> POST {}", self.url);
        for (name, value) in self.headers.iter() {
            debug!(">  {}: {}", name, value.to_str().unwrap_or("<binary>"));
        }
        debug!(">  content-type: {}", content_type);
        debug!(">  parts: {}", body.prompt());

        let request = self
            .client
            .post(self.url.clone())
            .headers(self.headers.clone())
            .header(CONTENT_TYPE, header_value(&content_type)?)
            .body(Body::wrap_stream(body.stream()));

        let exchange = async {
            let response = request.send().await?;
            read_response(response).await
        };

        tokio::select! {
            _ = self.closed.cancelled() => {
                warn!("STOW-RS exchange with {} cancelled", self.url);
                Err(StowError::Cancelled)
            }
            result = exchange => result,
        }
    }
}

async fn read_response(response: reqwest::Response) -> Result<StowResponse> {
    let status = response.status();
    debug!("< {:?} response code: {}", response.version(), status.as_u16());
    for (name, value) in response.headers() {
        debug!("<  {}: {}", name, value.to_str().unwrap_or("<binary>"));
    }
    let body = response.text().await?;

    let outcome = match status {
        StatusCode::OK if reports_failed_instances(&body) => ProgressStatus::Warning,
        StatusCode::OK => ProgressStatus::Completed,
        StatusCode::ACCEPTED => ProgressStatus::Warning,
        _ => {
            warn!("STOW-RS service answered {}: {}", status, body);
            return Err(StowError::Status {
                status: status.as_u16(),
                message: body,
            });
        }
    };
    info!("STOW-RS store answered {} ({})", status.as_u16(), outcome);

    Ok(StowResponse {
        status: status.as_u16(),
        outcome,
        body,
    })
}

/// Whether a store report lists instances in Failed SOP Sequence
///
/// JSON reports must carry a non-empty sequence; other bodies (XML) are
/// searched for the sequence tag attribute.
fn reports_failed_instances(body: &str) -> bool {
    match serde_json::from_str::<Value>(body) {
        Ok(report) => {
            let report = match &report {
                Value::Array(items) => items.first(),
                other => Some(other),
            };
            report
                .and_then(|r| r.get(FAILED_SOP_SEQUENCE_KEY))
                .and_then(|sequence| sequence.get("Value"))
                .and_then(Value::as_array)
                .is_some_and(|items| !items.is_empty())
        }
        Err(_) => body.contains(&format!("tag=\"{}\"", FAILED_SOP_SEQUENCE_KEY)),
    }
}

fn header_value(value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value)
        .map_err(|_| StowError::config(format!("invalid header value '{}'", value)))
}

impl Drop for StowUploader {
    fn drop(&mut self) {
        self.closed.cancel();
    }
}

impl std::fmt::Debug for StowUploader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StowUploader")
            .field("url", &self.url.as_str())
            .field("content_type", &self.content_type)
            .field("closed", &self.is_closed())
            .finish()
    }
}
