//! Content sources for multipart parts
//!
//! Each upload path picks the variant matching its strategy: unmodified
//! files are streamed through in chunks, edited datasets are re-encoded on
//! demand, metadata documents are plain buffers.

use std::fmt;
use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use bytes::{Bytes, BytesMut};
use dicom_object::meta::FileMetaTable;
use dicom_object::{FileDicomObject, InMemDicomObject};
use tokio::io::AsyncRead;
use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tokio_util::io::ReaderStream;

use crate::stow::error::{Result, StowError};

/// Size of the chunks copied from files and caller streams
pub const CHUNK_SIZE: usize = 8192;

/// Length of the zeroed preamble preceding the `DICM` magic code
const PREAMBLE_LEN: usize = 128;

/// Receiving end of a body writer
pub type ChunkSender = mpsc::Sender<io::Result<Bytes>>;

/// Caller-supplied bulk data stream
pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;

/// Content of one multipart part
#[derive(Clone)]
pub enum Payload {
    /// Bytes already in memory
    Buffer(Bytes),
    /// An unmodified file, copied chunk by chunk
    File(PathBuf),
    /// A dataset serialized with its file meta group each time it is read
    Encoded(Arc<FileDicomObject<InMemDicomObject>>),
    /// Freshly written file meta group followed by untouched caller bytes
    ///
    /// The caller stream can only be consumed once.
    MetaPrefixed {
        meta: Bytes,
        reader: Arc<Mutex<Option<BoxedReader>>>,
    },
}

impl Payload {
    pub fn buffer(bytes: impl Into<Bytes>) -> Self {
        Payload::Buffer(bytes.into())
    }

    pub fn file(path: impl AsRef<Path>) -> Self {
        Payload::File(path.as_ref().to_path_buf())
    }

    pub fn encoded(object: FileDicomObject<InMemDicomObject>) -> Self {
        Payload::Encoded(Arc::new(object))
    }

    /// Prefix caller bulk data with a Part 10 header built from `meta`
    pub fn meta_prefixed<R>(meta: &FileMetaTable, reader: R) -> Result<Self>
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        let mut header = vec![0u8; PREAMBLE_LEN];
        meta.write(&mut header)
            .map_err(|e| StowError::encoding(format!("cannot write file meta information: {}", e)))?;
        Ok(Payload::MetaPrefixed {
            meta: Bytes::from(header),
            reader: Arc::new(Mutex::new(Some(Box::new(reader)))),
        })
    }

    /// Size in bytes when known in advance, `None` for streamed content
    pub fn size(&self) -> Option<u64> {
        match self {
            Payload::Buffer(bytes) => Some(bytes.len() as u64),
            _ => None,
        }
    }

    /// Push the content into `tx`, chunk by chunk
    pub async fn write_to(&self, tx: &ChunkSender) -> io::Result<()> {
        match self {
            Payload::Buffer(bytes) => send(tx, bytes.clone()).await,
            Payload::File(path) => {
                let file = tokio::fs::File::open(path).await?;
                forward(ReaderStream::with_capacity(file, CHUNK_SIZE), tx).await
            }
            Payload::Encoded(object) => {
                let object = Arc::clone(object);
                let encoded = tokio::task::spawn_blocking(move || encode(&object))
                    .await
                    .map_err(|e| io::Error::new(io::ErrorKind::Other, e))??;
                send(tx, Bytes::from(encoded)).await
            }
            Payload::MetaPrefixed { meta, reader } => {
                let reader = reader
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner())
                    .take()
                    .ok_or_else(|| {
                        io::Error::new(io::ErrorKind::Other, "stream payload was already consumed")
                    })?;
                send(tx, meta.clone()).await?;
                forward(ReaderStream::with_capacity(reader, CHUNK_SIZE), tx).await
            }
        }
    }

    /// Materialize the whole content in memory
    pub async fn to_bytes(&self) -> io::Result<Bytes> {
        collect(16, |tx| async move { self.write_to(&tx).await }).await
    }
}

fn encode(object: &FileDicomObject<InMemDicomObject>) -> io::Result<Vec<u8>> {
    let mut out = Vec::new();
    object
        .write_all(&mut out)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;
    Ok(out)
}

/// Run `write` against a fresh channel and gather everything it sends
///
/// The channel closes when `write` returns; a chunk error or a writer error
/// fails the whole collection.
pub(crate) async fn collect<F, Fut>(depth: usize, write: F) -> io::Result<Bytes>
where
    F: FnOnce(ChunkSender) -> Fut,
    Fut: Future<Output = io::Result<()>>,
{
    let (tx, mut rx) = mpsc::channel::<io::Result<Bytes>>(depth);
    let read = async {
        let mut buf = BytesMut::new();
        while let Some(chunk) = rx.recv().await {
            buf.extend_from_slice(&chunk?);
        }
        Ok::<_, io::Error>(buf.freeze())
    };
    let (written, bytes) = tokio::join!(write(tx), read);
    let bytes = bytes?;
    written?;
    Ok(bytes)
}

pub(crate) async fn send(tx: &ChunkSender, chunk: Bytes) -> io::Result<()> {
    tx.send(Ok(chunk))
        .await
        .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "multipart body receiver dropped"))
}

async fn forward<R: AsyncRead + Unpin>(mut stream: ReaderStream<R>, tx: &ChunkSender) -> io::Result<()> {
    while let Some(chunk) = stream.next().await {
        send(tx, chunk?).await?;
    }
    Ok(())
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Payload::Buffer(bytes) => f.debug_tuple("Buffer").field(&bytes.len()).finish(),
            Payload::File(path) => f.debug_tuple("File").field(path).finish(),
            Payload::Encoded(object) => f
                .debug_tuple("Encoded")
                .field(&object.meta().media_storage_sop_instance_uid())
                .finish(),
            Payload::MetaPrefixed { meta, .. } => f
                .debug_struct("MetaPrefixed")
                .field("meta_len", &meta.len())
                .finish_non_exhaustive(),
        }
    }
}
