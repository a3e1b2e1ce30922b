//! Output side of a file request.

use std::fmt;
use std::io::Read;

use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};

/// Cache class of a served file; decides the max-age a front end sends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileClass {
    /// Configuration documents (map configs, layer definitions, styles).
    Config,
    /// Static support files.
    Support,
    /// Registry passthrough.
    Registry,
    /// Generated data: tiles, metatiles, geodata.
    Data,
    Unknown,
}

impl fmt::Display for FileClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FileClass::Config => "config",
            FileClass::Support => "support",
            FileClass::Registry => "registry",
            FileClass::Data => "data",
            FileClass::Unknown => "unknown",
        })
    }
}

/// Content type and class of a response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkFileInfo {
    pub content_type: String,
    pub class: FileClass,
}

impl SinkFileInfo {
    pub fn new(content_type: impl Into<String>, class: FileClass) -> Self {
        Self {
            content_type: content_type.into(),
            class,
        }
    }

    pub fn json(class: FileClass) -> Self {
        Self::new("application/json; charset=utf-8", class)
    }
}

/// Receiver of a generated file.
pub trait Sink: Send {
    /// Sends the whole content.
    fn content(&mut self, data: &[u8], info: &SinkFileInfo) -> Result<()>;

    /// Sends content read from a stream.
    fn content_stream(&mut self, reader: &mut dyn Read, info: &SinkFileInfo) -> Result<()> {
        let mut data = Vec::new();
        reader.read_to_end(&mut data)?;
        self.content(&data, info)
    }

    /// Reports a failure to the client.
    fn error(&mut self, err: Error);

    /// Fails with `Error::Aborted` once the client has gone away.
    fn check_aborted(&self) -> Result<()>;
}

/// What a [`MemorySink`] received.
#[derive(Debug)]
pub enum SinkResponse {
    Content { data: Vec<u8>, info: SinkFileInfo },
    Error(Error),
}

/// Sink collecting the response in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    response: Option<SinkResponse>,
    token: CancellationToken,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sink aborted when `token` is cancelled.
    pub fn with_token(token: CancellationToken) -> Self {
        Self {
            response: None,
            token,
        }
    }

    pub fn response(&self) -> Option<&SinkResponse> {
        self.response.as_ref()
    }

    pub fn into_response(self) -> Option<SinkResponse> {
        self.response
    }

    /// Content bytes, if content was sent.
    pub fn data(&self) -> Option<&[u8]> {
        match &self.response {
            Some(SinkResponse::Content { data, .. }) => Some(data),
            _ => None,
        }
    }

    /// Error, if one was reported.
    pub fn error_value(&self) -> Option<&Error> {
        match &self.response {
            Some(SinkResponse::Error(err)) => Some(err),
            _ => None,
        }
    }
}

impl Sink for MemorySink {
    fn content(&mut self, data: &[u8], info: &SinkFileInfo) -> Result<()> {
        self.check_aborted()?;
        self.response = Some(SinkResponse::Content {
            data: data.to_vec(),
            info: info.clone(),
        });
        Ok(())
    }

    fn error(&mut self, err: Error) {
        self.response = Some(SinkResponse::Error(err));
    }

    fn check_aborted(&self) -> Result<()> {
        if self.token.is_cancelled() {
            Err(Error::Aborted)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_sink_records_content() {
        let mut sink = MemorySink::new();
        sink.content(b"abc", &SinkFileInfo::json(FileClass::Config))
            .unwrap();
        assert_eq!(sink.data(), Some(&b"abc"[..]));
        assert!(sink.error_value().is_none());
    }

    #[test]
    fn test_stream_content() {
        let mut sink = MemorySink::new();
        let mut reader: &[u8] = b"streamed";
        sink.content_stream(&mut reader, &SinkFileInfo::new("text/plain", FileClass::Support))
            .unwrap();
        assert_eq!(sink.data(), Some(&b"streamed"[..]));
    }

    #[test]
    fn test_cancelled_sink_refuses_content() {
        let token = CancellationToken::new();
        let mut sink = MemorySink::with_token(token.clone());
        assert!(sink.check_aborted().is_ok());

        token.cancel();
        assert!(matches!(sink.check_aborted(), Err(Error::Aborted)));
        assert!(sink
            .content(b"late", &SinkFileInfo::json(FileClass::Data))
            .is_err());
        assert!(sink.response().is_none());
    }
}
