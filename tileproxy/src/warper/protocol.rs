//! Control messages between the serving process and a warper worker.
//!
//! Messages travel over the worker's stdin (requests) and stdout
//! (responses) as length-prefixed `bincode` frames:
//!
//! ```text
//! ┌────────────┬──────────────────────────────┐
//! │ len u32 LE │ bincode(WorkerRequest/...)   │
//! └────────────┴──────────────────────────────┘
//! ```
//!
//! Pixel data never goes through the pipe. A response only names the arena
//! allocation holding the result; the requester reads it from the shared
//! mapping and releases it.

use std::io::{self, Read, Write};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::WireError;

use super::arena::Allocation;
use super::request::RasterRequest;

/// Upper bound for a single control frame.
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Message sent to a worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WorkerRequest {
    /// One of the canned raster operations.
    Raster { id: u64, request: RasterRequest },
    /// A request handled by a registered custom handler.
    Custom {
        id: u64,
        kind: String,
        params: Vec<u8>,
    },
    /// Finish the loop and exit.
    Shutdown,
}

impl WorkerRequest {
    pub fn id(&self) -> Option<u64> {
        match self {
            WorkerRequest::Raster { id, .. } | WorkerRequest::Custom { id, .. } => Some(*id),
            WorkerRequest::Shutdown => None,
        }
    }
}

/// Message sent back by a worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WorkerResponse {
    /// Sent once after the arena has been mapped.
    Ready { pid: u32 },
    /// Result is in the arena at `alloc`.
    Done { id: u64, alloc: Allocation },
    /// Request failed; nothing was left in the arena.
    Failed { id: u64, error: WireError },
}

fn invalid_data(err: impl std::fmt::Display) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, err.to_string())
}

/// Writes one frame and flushes.
pub fn write_frame<W: Write, T: Serialize>(writer: &mut W, message: &T) -> io::Result<()> {
    let payload = bincode::serialize(message).map_err(invalid_data)?;
    if payload.len() > MAX_FRAME_SIZE {
        return Err(invalid_data(format!(
            "frame of {} bytes exceeds limit",
            payload.len()
        )));
    }
    writer.write_all(&(payload.len() as u32).to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.flush()
}

/// Reads one frame; `None` when the peer closed the stream between frames.
pub fn read_frame<R: Read, T: DeserializeOwned>(reader: &mut R) -> io::Result<Option<T>> {
    let mut len = [0u8; 4];
    match reader.read_exact(&mut len) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    }

    let len = u32::from_le_bytes(len) as usize;
    if len > MAX_FRAME_SIZE {
        return Err(invalid_data(format!("frame of {} bytes exceeds limit", len)));
    }
    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload)?;
    bincode::deserialize(&payload).map(Some).map_err(invalid_data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::geo::{Extents2, Size2, SrsDefinition};
    use crate::warper::Operation;
    use std::io::Cursor;

    #[test]
    fn test_frames_in_sequence() {
        let request = WorkerRequest::Raster {
            id: 7,
            request: RasterRequest::new(
                Operation::Mask,
                "/data/ortho.png",
                SrsDefinition::epsg(3857),
                Extents2::new(0.0, 0.0, 1.0, 1.0),
                Size2::new(256, 256),
            ),
        };

        let mut buf = Vec::new();
        write_frame(&mut buf, &request).unwrap();
        write_frame(&mut buf, &WorkerRequest::Shutdown).unwrap();

        let mut cursor = Cursor::new(buf);
        let first: WorkerRequest = read_frame(&mut cursor).unwrap().unwrap();
        assert_eq!(first.id(), Some(7));
        assert_eq!(first, request);
        let second: WorkerRequest = read_frame(&mut cursor).unwrap().unwrap();
        assert_eq!(second, WorkerRequest::Shutdown);
        assert!(read_frame::<_, WorkerRequest>(&mut cursor).unwrap().is_none());
    }

    #[test]
    fn test_error_response() {
        let response = WorkerResponse::Failed {
            id: 3,
            error: WireError {
                kind: ErrorKind::NotFound,
                message: "No valid data.".into(),
            },
        };
        let mut buf = Vec::new();
        write_frame(&mut buf, &response).unwrap();
        let read: WorkerResponse = read_frame(&mut Cursor::new(buf)).unwrap().unwrap();
        assert_eq!(read, response);
    }

    #[test]
    fn test_oversized_frame_rejected() {
        let mut buf = ((MAX_FRAME_SIZE + 1) as u32).to_le_bytes().to_vec();
        buf.extend_from_slice(&[0; 8]);
        let err = read_frame::<_, WorkerResponse>(&mut Cursor::new(buf)).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn test_truncated_payload_is_error() {
        let mut buf = 100u32.to_le_bytes().to_vec();
        buf.extend_from_slice(&[1, 2, 3]);
        assert!(read_frame::<_, WorkerResponse>(&mut Cursor::new(buf)).is_err());
    }
}
