use std::io;

use async_trait::async_trait;
use tokio::io::AsyncRead;

/// Readable document body handed out by `get`.
pub type DocumentReader = Box<dyn AsyncRead + Send + Unpin>;

/// Writable destination for a document body.
///
/// The protocol layer streams request bytes into the sink and then calls
/// [`close`](DocumentSink::close). Calling `close` asks the engine to finalize
/// the write (publish the staged bytes); the returned future resolves once the
/// engine is done, which is when the response may be sent.
#[async_trait]
pub trait DocumentSink: Send {
    /// Append a chunk of body bytes.
    async fn write_chunk(&mut self, chunk: &[u8]) -> io::Result<()>;

    /// Finalize the write.
    async fn close(self: Box<Self>) -> io::Result<()>;
}

/// Body of a document, depending on the direction of the operation.
#[derive(Default)]
pub enum DocumentContent {
    /// No body (not-modified responses, rejected writes).
    #[default]
    None,
    /// Bytes to send to the caller.
    Read(DocumentReader),
    /// Destination for bytes received from the caller.
    Write(Box<dyn DocumentSink>),
}

impl std::fmt::Debug for DocumentContent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DocumentContent::None => f.write_str("None"),
            DocumentContent::Read(_) => f.write_str("Read(..)"),
            DocumentContent::Write(_) => f.write_str("Write(..)"),
        }
    }
}

/// Leaf resource with byte content.
#[derive(Debug, Default)]
pub struct DocumentResource {
    /// Length of the content in bytes, when known.
    pub length: u64,
    /// Entity tag of the stored content.
    pub etag: Option<String>,
    /// Body stream.
    pub content: DocumentContent,
}

impl DocumentResource {
    /// Document whose body can be read by the caller.
    pub fn readable(length: u64, etag: Option<String>, reader: DocumentReader) -> Self {
        Self {
            length,
            etag,
            content: DocumentContent::Read(reader),
        }
    }

    /// Document whose body is written by the caller.
    pub fn writable(sink: Box<dyn DocumentSink>) -> Self {
        Self {
            length: 0,
            etag: None,
            content: DocumentContent::Write(sink),
        }
    }

    /// Take the readable stream, leaving the document without content.
    pub fn take_reader(&mut self) -> Option<DocumentReader> {
        match std::mem::take(&mut self.content) {
            DocumentContent::Read(reader) => Some(reader),
            other => {
                self.content = other;
                None
            }
        }
    }

    /// Take the writable sink, leaving the document without content.
    pub fn take_sink(&mut self) -> Option<Box<dyn DocumentSink>> {
        match std::mem::take(&mut self.content) {
            DocumentContent::Write(sink) => Some(sink),
            other => {
                self.content = other;
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use tokio::io::AsyncReadExt;

    struct VecSink(Arc<Mutex<Vec<u8>>>);

    #[async_trait]
    impl DocumentSink for VecSink {
        async fn write_chunk(&mut self, chunk: &[u8]) -> io::Result<()> {
            self.0.lock().unwrap().extend_from_slice(chunk);
            Ok(())
        }

        async fn close(self: Box<Self>) -> io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn take_reader_yields_body_once() {
        let mut doc = DocumentResource::readable(
            3,
            Some("tag".into()),
            Box::new(io::Cursor::new(b"abc".to_vec())),
        );

        let mut reader = doc.take_reader().unwrap();
        let mut out = String::new();
        reader.read_to_string(&mut out).await.unwrap();
        assert_eq!(out, "abc");
        assert!(doc.take_reader().is_none());
    }

    #[tokio::test]
    async fn take_sink_on_readable_keeps_content() {
        let mut doc = DocumentResource::readable(0, None, Box::new(io::Cursor::new(Vec::new())));
        assert!(doc.take_sink().is_none());
        assert!(matches!(doc.content, DocumentContent::Read(_)));
    }

    #[tokio::test]
    async fn writable_sink_receives_chunks() {
        let buf = Arc::new(Mutex::new(Vec::new()));
        let mut doc = DocumentResource::writable(Box::new(VecSink(Arc::clone(&buf))));

        let mut sink = doc.take_sink().unwrap();
        sink.write_chunk(b"he").await.unwrap();
        sink.write_chunk(b"llo").await.unwrap();
        sink.close().await.unwrap();

        assert_eq!(&*buf.lock().unwrap(), b"hello");
    }
}
