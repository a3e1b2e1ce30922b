//! Request loop of a warper worker process.
//!
//! The worker maps its arena file, announces itself with a `Ready` frame and
//! then serves requests from stdin until it receives `Shutdown` or stdin is
//! closed. Request failures are reported back as `Failed` frames; only pipe
//! or mapping failures end the loop with an error.

use std::fs::OpenOptions;
use std::io::{self, BufReader, BufWriter};
use std::path::PathBuf;

use memmap2::MmapMut;
use tracing::{debug, info, info_span, warn};

use crate::error::{Error, Result, WireError};

use super::arena::Arena;
use super::cache::DatasetCache;
use super::custom::CustomRegistry;
use super::operations;
use super::protocol::{read_frame, write_frame, WorkerRequest, WorkerResponse};

/// Startup parameters handed to a worker by the pool.
#[derive(Debug, Clone)]
pub struct WorkerOptions {
    /// Position of the worker in the pool, used in log output.
    pub index: usize,
    /// Arena file created and formatted by the pool.
    pub arena: PathBuf,
}

/// Runs the worker loop on stdin/stdout.
pub fn run(options: &WorkerOptions, registry: &CustomRegistry) -> Result<()> {
    let span = info_span!("warper", index = options.index);
    let _enter = span.enter();

    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .open(&options.arena)?;
    // SAFETY: the arena file is private to this worker and its pool; the
    // pool only touches the mapping while this worker is idle.
    let mut mmap = unsafe { MmapMut::map_mut(&file)? };
    Arena::attach(&mut mmap[..])?;

    let mut reader = BufReader::new(io::stdin().lock());
    let mut writer = BufWriter::new(io::stdout().lock());
    write_frame(
        &mut writer,
        &WorkerResponse::Ready {
            pid: std::process::id(),
        },
    )?;
    info!(arena = %options.arena.display(), "Warper worker ready");

    let mut cache = DatasetCache::new();
    loop {
        let request: WorkerRequest = match read_frame(&mut reader)? {
            Some(request) => request,
            None => {
                info!("Request channel closed, exiting");
                break;
            }
        };

        let (id, result) = match request {
            WorkerRequest::Shutdown => {
                info!("Shutdown requested");
                break;
            }
            WorkerRequest::Raster { id, request } => {
                debug!(id, request = %request, "Raster request");
                let mut arena = Arena::attach(&mut mmap[..])?;
                (id, operations::warp(&mut cache, &mut arena, &request))
            }
            WorkerRequest::Custom { id, kind, params } => {
                debug!(id, kind = %kind, "Custom request");
                let mut arena = Arena::attach(&mut mmap[..])?;
                (id, registry.process(&kind, &params, &mut cache, &mut arena))
            }
        };

        let response = match result {
            Ok(alloc) => WorkerResponse::Done { id, alloc },
            Err(err) => {
                if !err.is_not_found() {
                    warn!(id, error = %err, "Request failed");
                }
                WorkerResponse::Failed {
                    id,
                    error: WireError::from(&err),
                }
            }
        };
        write_frame(&mut writer, &response).map_err(Error::from)?;
    }

    Ok(())
}
