//! Process pool running the warper workers.
//!
//! The pool owns a fixed number of `tileproxy-warper` processes. Every
//! worker has a private arena file mapped by both sides and a pipe pair for
//! control frames:
//!
//! ```text
//!   caller ──► checkout ──► write Request{id} ──► worker stdin
//!                                                    │ warps into arena
//!   caller ◄── read arena, release ◄── Done{id, alloc} ◄── worker stdout
//!          └─► checkin (idle queue, notify one waiter)
//! ```
//!
//! Callers that find no idle worker wait on a condition variable; the idle
//! queue is the only admission control. A worker that dies, times out or
//! answers out of turn fails the in-flight request with `Internal`, is
//! killed and replaced by a fresh process with a fresh arena. Other workers
//! are not affected. Requests are never retried by the pool.
//!
//! Workers are started only by the pool's supervisor thread, which retries
//! failed respawns with backoff. A worker found dead in the idle queue is
//! replaced before any request is sent to it.

use std::collections::VecDeque;
use std::fs::OpenOptions;
use std::io::{self, BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, TryRecvError};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::{Duration, Instant};

use memmap2::MmapMut;
use parking_lot::{Condvar, Mutex};
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::geo::Raster;

use super::arena::{Allocation, Arena};
use super::config::WarperConfig;
use super::protocol::{read_frame, write_frame, WorkerRequest, WorkerResponse};
use super::request::RasterRequest;
use super::RasterWarper;

// =============================================================================
// Statistics
// =============================================================================

/// Snapshot of pool counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WarperStats {
    /// Requests dispatched to a worker.
    pub requests: u64,
    /// Requests answered with "no valid data".
    pub not_found: u64,
    /// Requests that failed for any other reason, including worker loss.
    pub failures: u64,
    /// Workers replaced after dying or timing out.
    pub respawns: u64,
    /// Workers currently alive.
    pub workers: usize,
    /// Workers currently idle.
    pub idle: usize,
}

#[derive(Default)]
struct Counters {
    requests: AtomicU64,
    not_found: AtomicU64,
    failures: AtomicU64,
    respawns: AtomicU64,
}

// =============================================================================
// Worker handle
// =============================================================================

enum Fault {
    Died(String),
    TimedOut,
}

struct Worker {
    index: usize,
    pid: u32,
    child: Child,
    stdin: BufWriter<ChildStdin>,
    responses: Receiver<io::Result<WorkerResponse>>,
    arena: MmapMut,
    arena_path: PathBuf,
}

impl Worker {
    fn spawn(config: &WarperConfig, binary: &Path, index: usize, generation: u64) -> Result<Self> {
        let arena_path = config.arena_dir.join(format!(
            "tileproxy-warper-{}-{}-{}.arena",
            std::process::id(),
            index,
            generation
        ));
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&arena_path)?;
        file.set_len(config.arena_size as u64)?;
        // SAFETY: the file was just created for this worker; only the pool
        // and the worker it spawns below map it.
        let mut arena = unsafe { MmapMut::map_mut(&file)? };
        Arena::format(&mut arena[..])?;

        let mut child = Command::new(binary)
            .arg("--index")
            .arg(index.to_string())
            .arg("--arena")
            .arg(&arena_path)
            .arg("--log-level")
            .arg(&config.log_level)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| {
                let _ = std::fs::remove_file(&arena_path);
                Error::internal(format!(
                    "Cannot start warper worker {}: {}",
                    binary.display(),
                    e
                ))
            })?;

        let (stdin, stdout) = match (child.stdin.take(), child.stdout.take()) {
            (Some(stdin), Some(stdout)) => (stdin, stdout),
            _ => {
                let _ = child.kill();
                let _ = child.wait();
                let _ = std::fs::remove_file(&arena_path);
                return Err(Error::internal("Warper worker pipes unavailable."));
            }
        };

        let (tx, responses) = mpsc::channel();
        thread::Builder::new()
            .name(format!("warper-{}-reader", index))
            .spawn(move || {
                let mut reader = BufReader::new(stdout);
                loop {
                    let frame = match read_frame::<_, WorkerResponse>(&mut reader) {
                        Ok(Some(response)) => Ok(response),
                        Ok(None) => Err(io::Error::new(
                            io::ErrorKind::UnexpectedEof,
                            "worker closed its output",
                        )),
                        Err(e) => Err(e),
                    };
                    let last = frame.is_err();
                    if tx.send(frame).is_err() || last {
                        break;
                    }
                }
            })
            .map_err(|e| {
                let _ = child.kill();
                let _ = child.wait();
                let _ = std::fs::remove_file(&arena_path);
                Error::from(e)
            })?;

        let mut worker = Self {
            index,
            pid: child.id(),
            child,
            stdin: BufWriter::new(stdin),
            responses,
            arena,
            arena_path,
        };

        match worker.responses.recv_timeout(config.spawn_timeout) {
            Ok(Ok(WorkerResponse::Ready { pid })) => {
                worker.pid = pid;
                debug!(index, pid, "Warper worker started");
                Ok(worker)
            }
            Ok(Ok(other)) => Err(Error::internal(format!(
                "Warper worker {} sent {:?} before ready.",
                index, other
            ))),
            Ok(Err(e)) => Err(Error::internal(format!(
                "Warper worker {} failed to start: {}",
                index, e
            ))),
            Err(_) => Err(Error::internal(format!(
                "Warper worker {} did not become ready.",
                index
            ))),
        }
    }

    /// Returns false if the process exited or its output closed while idle.
    fn is_alive(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
            && matches!(self.responses.try_recv(), Err(TryRecvError::Empty))
    }

    /// Sends a request and waits for the next response.
    fn exchange(
        &mut self,
        request: &WorkerRequest,
        timeout: Duration,
    ) -> std::result::Result<WorkerResponse, Fault> {
        write_frame(&mut self.stdin, request).map_err(|e| Fault::Died(e.to_string()))?;

        match self.responses.recv_timeout(timeout) {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(e)) => Err(Fault::Died(e.to_string())),
            Err(RecvTimeoutError::Timeout) => Err(Fault::TimedOut),
            Err(RecvTimeoutError::Disconnected) => Err(Fault::Died("reader gone".into())),
        }
    }

    /// Reads the result at `alloc` and hands the slot back to the allocator.
    fn take<T>(
        &mut self,
        alloc: Allocation,
        read: impl FnOnce(&[u8]) -> Result<T>,
    ) -> std::result::Result<Result<T>, Error> {
        let mut arena = Arena::attach(&mut self.arena[..])?;
        let value = read(arena.bytes(alloc)?);
        arena.release(alloc)?;
        Ok(value)
    }

    /// Asks the worker to exit, killing it after `grace`.
    fn terminate(mut self, grace: Duration) {
        let _ = write_frame(&mut self.stdin, &WorkerRequest::Shutdown);
        let deadline = Instant::now() + grace;
        while Instant::now() < deadline {
            match self.child.try_wait() {
                Ok(Some(_)) | Err(_) => return,
                Ok(None) => thread::sleep(Duration::from_millis(10)),
            }
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        if let Ok(None) = self.child.try_wait() {
            let _ = self.child.kill();
        }
        let _ = self.child.wait();
        let _ = std::fs::remove_file(&self.arena_path);
    }
}

// =============================================================================
// Pool
// =============================================================================

/// First pause after a failed respawn; doubled on every further failure.
const RESPAWN_BACKOFF: Duration = Duration::from_millis(100);
const MAX_RESPAWN_BACKOFF: Duration = Duration::from_secs(5);

struct Idle {
    workers: VecDeque<Worker>,
    live: usize,
    shutdown: bool,
}

struct Pool {
    config: WarperConfig,
    binary: PathBuf,
    idle: Mutex<Idle>,
    available: Condvar,
    next_id: AtomicU64,
    generation: AtomicU64,
    pids: Mutex<Vec<Option<u32>>>,
    counters: Counters,
    busy: AtomicUsize,
    /// Slots waiting for a fresh worker, served by the supervisor thread.
    respawn: Mutex<mpsc::Sender<usize>>,
}

impl Pool {
    /// Starts the initial workers. Runs on the supervisor thread.
    fn start(&self, count: usize) -> Result<()> {
        let mut workers = Vec::with_capacity(count);
        for index in 0..count {
            workers.push(Worker::spawn(&self.config, &self.binary, index, 0)?);
        }
        for worker in workers {
            self.admit(worker);
        }
        Ok(())
    }

    /// Hands out a live idle worker, replacing any that died while idle.
    fn checkout(&self) -> Result<Worker> {
        loop {
            let mut worker = self.next_idle()?;
            if worker.is_alive() {
                return Ok(worker);
            }
            self.recycle(worker, "died while idle");
        }
    }

    fn next_idle(&self) -> Result<Worker> {
        let mut idle = self.idle.lock();
        loop {
            if idle.shutdown {
                return Err(Error::internal("Warper is shut down."));
            }
            if let Some(worker) = idle.workers.pop_front() {
                self.busy.fetch_add(1, Ordering::Relaxed);
                return Ok(worker);
            }
            if idle.live == 0 {
                return Err(Error::internal("No warper workers available."));
            }
            self.available.wait(&mut idle);
        }
    }

    fn checkin(&self, worker: Worker) {
        self.busy.fetch_sub(1, Ordering::Relaxed);
        let mut idle = self.idle.lock();
        if idle.shutdown {
            idle.live -= 1;
            drop(idle);
            worker.terminate(self.config.shutdown_grace);
            return;
        }
        idle.workers.push_back(worker);
        drop(idle);
        self.available.notify_one();
    }

    /// Kills `worker` and queues its slot for a fresh process.
    ///
    /// The slot stays counted as live while it waits, so callers block on
    /// the idle queue instead of failing.
    fn recycle(&self, worker: Worker, reason: &str) {
        let index = worker.index;
        warn!(index, pid = worker.pid, reason, "Replacing warper worker");
        self.busy.fetch_sub(1, Ordering::Relaxed);
        drop(worker);
        self.counters.respawns.fetch_add(1, Ordering::Relaxed);
        self.pids.lock()[index] = None;

        if self.respawn.lock().send(index).is_err() {
            self.retire();
        }
    }

    /// One attempt at filling slot `index`. Returns false if it should be
    /// retried.
    fn respawn(&self, index: usize) -> bool {
        if self.idle.lock().shutdown {
            self.retire();
            return true;
        }
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        match Worker::spawn(&self.config, &self.binary, index, generation) {
            Ok(fresh) => {
                self.admit(fresh);
                true
            }
            Err(err) => {
                error!(index, error = %err, "Cannot respawn warper worker");
                false
            }
        }
    }

    fn admit(&self, worker: Worker) {
        let mut idle = self.idle.lock();
        if idle.shutdown {
            idle.live -= 1;
            drop(idle);
            self.available.notify_all();
            worker.terminate(self.config.shutdown_grace);
            return;
        }
        self.pids.lock()[worker.index] = Some(worker.pid);
        idle.workers.push_back(worker);
        drop(idle);
        self.available.notify_one();
    }

    /// Gives up a slot for good.
    fn retire(&self) {
        self.idle.lock().live -= 1;
        self.available.notify_all();
    }

    /// Runs one request on an idle worker.
    fn execute<T>(
        &self,
        build: impl FnOnce(u64) -> WorkerRequest,
        read: impl FnOnce(&[u8]) -> Result<T>,
    ) -> Result<T> {
        let mut worker = self.checkout()?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = build(id);
        self.counters.requests.fetch_add(1, Ordering::Relaxed);

        let result = match worker.exchange(&request, self.config.timeout) {
            Ok(WorkerResponse::Done { id: rid, alloc }) if rid == id => {
                match worker.take(alloc, read) {
                    Ok(value) => {
                        self.checkin(worker);
                        value
                    }
                    Err(err) => {
                        self.recycle(worker, "arena corrupted");
                        Err(err)
                    }
                }
            }
            Ok(WorkerResponse::Failed { id: rid, error }) if rid == id => {
                self.checkin(worker);
                Err(error.into())
            }
            Ok(other) => {
                self.recycle(worker, "protocol violation");
                Err(Error::internal(format!(
                    "Warper worker answered request {} with {:?}.",
                    id, other
                )))
            }
            Err(Fault::TimedOut) => {
                self.recycle(worker, "timed out");
                Err(Error::internal(format!(
                    "Warper worker timed out after {:?}.",
                    self.config.timeout
                )))
            }
            Err(Fault::Died(reason)) => {
                self.recycle(worker, "died");
                Err(Error::internal(format!("Warper worker died: {}", reason)))
            }
        };

        match &result {
            Err(err) if err.is_not_found() => {
                self.counters.not_found.fetch_add(1, Ordering::Relaxed);
            }
            Err(_) => {
                self.counters.failures.fetch_add(1, Ordering::Relaxed);
            }
            Ok(_) => {}
        }
        result
    }

    fn drain(&self) -> Vec<Worker> {
        let mut idle = self.idle.lock();
        idle.shutdown = true;
        let workers = idle.workers.drain(..).collect::<Vec<_>>();
        idle.live -= workers.len();
        drop(idle);
        self.available.notify_all();
        workers
    }
}

impl Drop for Pool {
    fn drop(&mut self) {
        for worker in self.drain() {
            worker.terminate(self.config.shutdown_grace);
        }
    }
}

// =============================================================================
// Supervisor
// =============================================================================

/// Body of the supervisor thread. Every worker is started on this thread,
/// which lives as long as the pool; workers die with the thread that
/// spawned them.
fn supervise(
    pool: Weak<Pool>,
    count: usize,
    jobs: Receiver<usize>,
    started: mpsc::Sender<Result<()>>,
) {
    let initial = match pool.upgrade() {
        Some(pool) => pool.start(count),
        None => return,
    };
    let failed = initial.is_err();
    let _ = started.send(initial);
    if failed {
        return;
    }

    while let Ok(index) = jobs.recv() {
        let mut backoff = RESPAWN_BACKOFF;
        loop {
            let Some(pool) = pool.upgrade() else {
                return;
            };
            if pool.respawn(index) {
                break;
            }
            drop(pool);
            debug!(index, retry_in = ?backoff, "Retrying warper respawn");
            thread::sleep(backoff);
            backoff = (backoff * 2).min(MAX_RESPAWN_BACKOFF);
        }
    }
}

// =============================================================================
// Public facade
// =============================================================================

/// Out-of-process raster warper.
///
/// Cheap to clone; all clones share the same pool.
#[derive(Clone)]
pub struct GdalWarper {
    pool: Arc<Pool>,
}

impl GdalWarper {
    /// Spawns the configured number of workers.
    ///
    /// # Errors
    ///
    /// Returns `Error::Internal` if the worker binary cannot be found or a
    /// worker fails to start; already started workers are stopped again.
    pub fn spawn(config: WarperConfig) -> Result<Self> {
        let binary = config
            .resolve_worker_binary()
            .map_err(|e| Error::internal(format!("Cannot locate warper worker: {}", e)))?;

        let count = config.workers.max(1);
        let (respawn, jobs) = mpsc::channel();
        let pool = Arc::new(Pool {
            config,
            binary,
            idle: Mutex::new(Idle {
                workers: VecDeque::with_capacity(count),
                live: count,
                shutdown: false,
            }),
            available: Condvar::new(),
            next_id: AtomicU64::new(1),
            generation: AtomicU64::new(1),
            pids: Mutex::new(vec![None; count]),
            counters: Counters::default(),
            busy: AtomicUsize::new(0),
            respawn: Mutex::new(respawn),
        });

        let (started_tx, started) = mpsc::channel();
        let weak = Arc::downgrade(&pool);
        thread::Builder::new()
            .name("warper-supervisor".to_string())
            .spawn(move || supervise(weak, count, jobs, started_tx))?;
        started
            .recv()
            .map_err(|_| Error::internal("Warper supervisor exited during startup."))??;

        info!(
            workers = count,
            arena_size = pool.config.arena_size,
            binary = %pool.binary.display(),
            "Warper pool started"
        );
        Ok(Self { pool })
    }

    /// Runs a raster request, blocking until a worker answers.
    pub fn warp(&self, request: &RasterRequest) -> Result<Raster> {
        self.pool.execute(
            |id| WorkerRequest::Raster {
                id,
                request: request.clone(),
            },
            Raster::read_from,
        )
    }

    /// Runs a raster request from async code without blocking the executor.
    pub async fn warp_async(&self, request: RasterRequest) -> Result<Raster> {
        let warper = self.clone();
        tokio::task::spawn_blocking(move || warper.warp(&request))
            .await
            .map_err(|e| Error::internal(format!("Warper task failed: {}", e)))?
    }

    /// Process ids of the workers, by pool index.
    pub fn worker_pids(&self) -> Vec<Option<u32>> {
        self.pool.pids.lock().clone()
    }

    pub fn stats(&self) -> WarperStats {
        let idle = self.pool.idle.lock();
        let c = &self.pool.counters;
        WarperStats {
            requests: c.requests.load(Ordering::Relaxed),
            not_found: c.not_found.load(Ordering::Relaxed),
            failures: c.failures.load(Ordering::Relaxed),
            respawns: c.respawns.load(Ordering::Relaxed),
            workers: idle.live,
            idle: idle.workers.len(),
        }
    }

    /// Stops idle workers now and busy ones when their request completes.
    pub fn shutdown(&self) {
        let workers = self.pool.drain();
        info!(
            stopping = workers.len(),
            busy = self.pool.busy.load(Ordering::Relaxed),
            "Shutting down warper pool"
        );
        for worker in workers {
            worker.terminate(self.pool.config.shutdown_grace);
        }
    }
}

impl RasterWarper for GdalWarper {
    fn warp(&self, request: &RasterRequest) -> Result<Raster> {
        GdalWarper::warp(self, request)
    }

    fn custom_raw(&self, kind: &str, params: &[u8]) -> Result<Vec<u8>> {
        self.pool.execute(
            |id| WorkerRequest::Custom {
                id,
                kind: kind.to_string(),
                params: params.to_vec(),
            },
            |bytes| Ok(bytes.to_vec()),
        )
    }
}
