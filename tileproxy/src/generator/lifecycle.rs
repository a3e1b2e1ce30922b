//! Generator lifecycle state machine.
//!
//! ```text
//!   ┌────────────┐  ensure_ready   ┌───────────┐   prepare ok   ┌─────────┐
//!   │ Unprepared │ ──────────────► │ Preparing │ ─────────────► │  Ready  │
//!   └────────────┘                 └───────────┘                └─────────┘
//!         │                              │ prepare err               ▲
//!         │                              ▼                           │
//!         │                        ┌───────────┐                     │
//!         │                        │  Failed   │                     │
//!         │                        └───────────┘                     │
//!         └──────────────────────────────────────────────────────────┘
//!           fast path: metadata matches artifact, not change-enforced
//! ```
//!
//! Only the caller that moves the generator from `Unprepared` to `Preparing`
//! runs the driver's `prepare`; everybody else is told to retry later until
//! the state settles. A failed generator stays failed: it is replaced when
//! the resource is redefined or the process restarts.

use std::fmt;
use std::path::Path;
use std::time::Instant;

use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::resource::{Resource, ResourceId};

use super::arsenal::Arsenal;
use super::file_info::{FileInfo, FileKind};
use super::sink::{FileClass, Sink};
use super::support;
use super::{GeneratorDriver, GeneratorParams, Task};

/// File name of the last successfully prepared resource definition.
pub const RESOURCE_FILE: &str = "resource.json";

/// Observable generator state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeneratorState {
    Unprepared,
    Preparing,
    Ready,
    Failed,
}

impl fmt::Display for GeneratorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            GeneratorState::Unprepared => "unprepared",
            GeneratorState::Preparing => "preparing",
            GeneratorState::Ready => "ready",
            GeneratorState::Failed => "failed",
        })
    }
}

#[derive(Debug)]
enum State {
    Unprepared,
    Preparing,
    Ready,
    Failed(String),
}

impl State {
    fn public(&self) -> GeneratorState {
        match self {
            State::Unprepared => GeneratorState::Unprepared,
            State::Preparing => GeneratorState::Preparing,
            State::Ready => GeneratorState::Ready,
            State::Failed(_) => GeneratorState::Failed,
        }
    }
}

/// Fails a generator whose prepare unwound while it was `Preparing`.
struct PrepareGuard<'a> {
    state: &'a Mutex<State>,
}

impl Drop for PrepareGuard<'_> {
    fn drop(&mut self) {
        let mut state = self.state.lock();
        if matches!(*state, State::Preparing) {
            *state = State::Failed("prepare panicked".to_string());
        }
    }
}

/// One resource's generator.
pub struct Generator {
    params: GeneratorParams,
    driver: Box<dyn GeneratorDriver>,
    state: Mutex<State>,
}

impl Generator {
    /// Wraps a driver, taking the fast path when possible.
    ///
    /// A change-enforced generator always starts `Unprepared`. Otherwise the
    /// driver is asked to restore its prepared output; any failure there
    /// just means the generator has to be prepared.
    pub fn new(params: GeneratorParams, driver: Box<dyn GeneratorDriver>) -> Self {
        let id = params.resource.id.clone();
        let state = if params.change_enforced {
            info!(resource = %id, "Definition changed, prepare enforced");
            State::Unprepared
        } else {
            match driver.load_prepared() {
                Ok(true) => {
                    debug!(resource = %id, "Prepared output loaded");
                    State::Ready
                }
                Ok(false) => {
                    info!(resource = %id, "Generator not ready");
                    State::Unprepared
                }
                Err(e) => {
                    info!(resource = %id, error = %e, "Generator not ready");
                    State::Unprepared
                }
            }
        };

        Self {
            params,
            driver,
            state: Mutex::new(state),
        }
    }

    pub fn id(&self) -> &ResourceId {
        &self.params.resource.id
    }

    pub fn resource(&self) -> &Resource {
        &self.params.resource
    }

    pub fn params(&self) -> &GeneratorParams {
        &self.params
    }

    pub fn root(&self) -> &Path {
        &self.params.root
    }

    pub fn state(&self) -> GeneratorState {
        self.state.lock().public()
    }

    pub fn is_ready(&self) -> bool {
        self.state() == GeneratorState::Ready
    }

    /// Reason of the prepare failure, if the generator failed.
    pub fn failure(&self) -> Option<String> {
        match &*self.state.lock() {
            State::Failed(reason) => Some(reason.clone()),
            _ => None,
        }
    }

    fn unavailable(&self) -> Error {
        Error::Unavailable(format!("Resource {} is being prepared.", self.id()))
    }

    fn failed(&self, reason: &str) -> Error {
        Error::internal(format!("Resource {} failed: {}.", self.id(), reason))
    }

    /// Makes the generator ready, preparing it if nobody has yet.
    ///
    /// # Errors
    ///
    /// - `Unavailable` while another caller prepares
    /// - `Internal` if this or an earlier prepare failed
    pub fn ensure_ready(&self, arsenal: &Arsenal) -> Result<()> {
        {
            let mut state = self.state.lock();
            match &*state {
                State::Ready => return Ok(()),
                State::Preparing => return Err(self.unavailable()),
                State::Failed(reason) => return Err(self.failed(reason)),
                State::Unprepared => *state = State::Preparing,
            }
        }

        let _unwind = PrepareGuard { state: &self.state };
        let id = self.id();
        info!(resource = %id, driver = self.params.resource.driver(), "Preparing");
        let start = Instant::now();

        match self.run_prepare(arsenal) {
            Ok(()) => {
                info!(
                    resource = %id,
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "Prepared"
                );
                *self.state.lock() = State::Ready;
                Ok(())
            }
            Err(e) => {
                error!(resource = %id, error = %e, "Prepare failed");
                let reason = e.to_string();
                let err = self.failed(&reason);
                *self.state.lock() = State::Failed(reason);
                Err(err)
            }
        }
    }

    fn run_prepare(&self, arsenal: &Arsenal) -> Result<()> {
        std::fs::create_dir_all(&self.params.root)?;
        self.driver.prepare(arsenal)?;
        self.params
            .resource
            .save(&self.params.root.join(RESOURCE_FILE))
    }

    /// Starts answering a file request.
    ///
    /// Errors, including "not ready" ones, are delivered through the sink.
    /// A returned task must be run to finish the answer, see [`run_task`].
    pub fn generate_file(&self, name: &str, sink: &mut dyn Sink) -> Option<Task> {
        match self.try_generate_file(name, sink) {
            Ok(task) => task,
            Err(e) => {
                deliver_error(self.id(), e, sink);
                None
            }
        }
    }

    fn try_generate_file(&self, name: &str, sink: &mut dyn Sink) -> Result<Option<Task>> {
        match &*self.state.lock() {
            State::Ready => {}
            State::Unprepared | State::Preparing => return Err(self.unavailable()),
            State::Failed(reason) => return Err(self.failed(reason)),
        }

        let file = FileInfo::parse(self.params.resource.generator_type, name);
        debug!(resource = %self.id(), file = %file.name, "Generating file");

        match &file.kind {
            FileKind::Support(support_file) => {
                support::serve(support_file, sink)?;
                Ok(None)
            }
            FileKind::Registry(path) => {
                let Some(registry) = &self.params.registry_root else {
                    return Err(Error::not_found("No registry configured."));
                };
                support::serve_path(
                    &registry.join(path),
                    support::content_type_for(path),
                    FileClass::Registry,
                    sink,
                )?;
                Ok(None)
            }
            FileKind::Unknown => Err(Error::not_found(format!("Unknown file {}.", file.name))),
            _ => self.driver.generate_file(&file, sink),
        }
    }

    /// Answers a file request completely, running any deferred task inline.
    pub fn serve(&self, name: &str, sink: &mut dyn Sink, arsenal: &Arsenal) {
        if let Some(task) = self.generate_file(name, sink) {
            run_task(self.id(), task, sink, arsenal);
        }
    }
}

impl fmt::Debug for Generator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Generator")
            .field("id", self.id())
            .field("state", &self.state())
            .finish()
    }
}

fn deliver_error(id: &ResourceId, err: Error, sink: &mut dyn Sink) {
    match err {
        Error::Aborted => debug!(resource = %id, "Request aborted"),
        Error::Internal(_) | Error::Io(_) => {
            warn!(resource = %id, error = %err, "Request failed");
            sink.error(err);
        }
        err => sink.error(err),
    }
}

/// Runs a deferred task, delivering its error to the sink.
///
/// An aborted request has nobody listening, so the abort is only logged.
pub fn run_task(id: &ResourceId, task: Task, sink: &mut dyn Sink, arsenal: &Arsenal) {
    if let Err(e) = task(sink, arsenal) {
        deliver_error(id, e, sink);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generator::sink::MemorySink;
    use crate::generator::testing::{arsenal, params, MockDriver};
    use std::panic::{self, AssertUnwindSafe};
    use std::sync::atomic::Ordering;
    use std::sync::{Arc, Barrier};
    use std::thread;
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio_util::sync::CancellationToken;

    fn assert_send_sync<T: Send + Sync>() {}

    #[test]
    fn test_generator_is_send_sync() {
        assert_send_sync::<Generator>();
    }

    #[test]
    fn test_fast_path_goes_ready() {
        let dir = TempDir::new().unwrap();
        let driver = MockDriver::new().with_prepared(true);
        let prepares = driver.prepares();
        let generator = Generator::new(params(dir.path(), false), Box::new(driver));

        assert_eq!(generator.state(), GeneratorState::Ready);
        generator.ensure_ready(&arsenal()).unwrap();
        assert_eq!(prepares.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_change_enforced_skips_fast_path() {
        let dir = TempDir::new().unwrap();
        let driver = MockDriver::new().with_prepared(true);
        let prepares = driver.prepares();
        let generator = Generator::new(params(dir.path(), true), Box::new(driver));

        assert_eq!(generator.state(), GeneratorState::Unprepared);
        generator.ensure_ready(&arsenal()).unwrap();
        assert_eq!(generator.state(), GeneratorState::Ready);
        assert_eq!(prepares.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_prepare_persists_resource() {
        let dir = TempDir::new().unwrap();
        let p = params(dir.path(), false);
        let root = p.root.clone();
        let generator = Generator::new(p, Box::new(MockDriver::new()));

        generator.ensure_ready(&arsenal()).unwrap();
        let stored = Resource::load(&root.join(RESOURCE_FILE)).unwrap();
        assert_eq!(&stored, generator.resource());
    }

    #[test]
    fn test_exactly_one_prepare_under_concurrency() {
        let dir = TempDir::new().unwrap();
        let driver = MockDriver::new().with_delay(Duration::from_millis(100));
        let prepares = driver.prepares();
        let generator = Arc::new(Generator::new(params(dir.path(), false), Box::new(driver)));
        let barrier = Arc::new(Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let generator = Arc::clone(&generator);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    generator.ensure_ready(&arsenal())
                })
            })
            .collect();

        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(prepares.load(Ordering::SeqCst), 1);
        assert!(results.iter().any(|r| r.is_ok()));
        for result in &results {
            if let Err(e) = result {
                assert!(matches!(e, Error::Unavailable(_)), "{e}");
            }
        }
        assert_eq!(generator.state(), GeneratorState::Ready);
    }

    #[test]
    fn test_requests_while_unprepared_are_unavailable() {
        let dir = TempDir::new().unwrap();
        let generator = Generator::new(params(dir.path(), false), Box::new(MockDriver::new()));

        let mut sink = MemorySink::new();
        assert!(generator.generate_file("mapConfig.json", &mut sink).is_none());
        assert!(matches!(sink.error_value(), Some(Error::Unavailable(_))));
    }

    #[test]
    fn test_failed_generator_is_inert() {
        let dir = TempDir::new().unwrap();
        let driver = MockDriver::new().failing();
        let prepares = driver.prepares();
        let generator = Generator::new(params(dir.path(), false), Box::new(driver));

        let err = generator.ensure_ready(&arsenal()).unwrap_err();
        assert!(err.is_internal());
        assert_eq!(generator.state(), GeneratorState::Failed);
        assert!(generator.failure().unwrap().contains("broken"));

        // no second attempt
        assert!(generator.ensure_ready(&arsenal()).unwrap_err().is_internal());
        assert_eq!(prepares.load(Ordering::SeqCst), 1);

        let mut sink = MemorySink::new();
        generator.serve("mapConfig.json", &mut sink, &arsenal());
        assert!(sink.error_value().unwrap().is_internal());
    }

    #[test]
    fn test_panicking_prepare_leaves_generator_failed() {
        let dir = TempDir::new().unwrap();
        let driver = MockDriver::new().panicking();
        let generator = Generator::new(params(dir.path(), false), Box::new(driver));

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| generator.ensure_ready(&arsenal())));
        assert!(outcome.is_err());
        assert_eq!(generator.state(), GeneratorState::Failed);
        assert!(generator.failure().unwrap().contains("panicked"));
        assert!(generator.ensure_ready(&arsenal()).unwrap_err().is_internal());
    }

    #[test]
    fn test_ready_generator_serves_driver_and_support_files() {
        let dir = TempDir::new().unwrap();
        let generator = Generator::new(
            params(dir.path(), false),
            Box::new(MockDriver::new().with_prepared(true)),
        );
        let arsenal = arsenal();

        let mut sink = MemorySink::new();
        generator.serve("mapConfig.json", &mut sink, &arsenal);
        assert_eq!(sink.data(), Some(&b"{}"[..]));

        let mut sink = MemorySink::new();
        generator.serve("index.html", &mut sink, &arsenal);
        assert!(sink.data().is_some());

        let mut sink = MemorySink::new();
        generator.serve("nonsense.txt", &mut sink, &arsenal);
        assert!(sink.error_value().unwrap().is_not_found());
    }

    #[test]
    fn test_registry_files_are_served_from_registry_root() {
        let dir = TempDir::new().unwrap();
        let registry = dir.path().join("registry");
        std::fs::create_dir_all(registry.join("srs")).unwrap();
        std::fs::write(registry.join("srs/webmerc.json"), b"{\"srs\":1}").unwrap();

        let mut p = params(dir.path(), false);
        p.registry_root = Some(registry);
        let generator = Generator::new(p, Box::new(MockDriver::new().with_prepared(true)));

        let mut sink = MemorySink::new();
        generator.serve("registry/srs/webmerc.json", &mut sink, &arsenal());
        assert_eq!(sink.data(), Some(&b"{\"srs\":1}"[..]));

        let mut sink = MemorySink::new();
        generator.serve("registry/../secret", &mut sink, &arsenal());
        assert!(sink.error_value().unwrap().is_not_found());
    }

    #[test]
    fn test_aborted_task_sends_nothing() {
        let dir = TempDir::new().unwrap();
        let generator = Generator::new(
            params(dir.path(), false),
            Box::new(MockDriver::new().with_prepared(true)),
        );
        let token = CancellationToken::new();
        let mut sink = MemorySink::with_token(token.clone());

        let task = generator.generate_file("1-0-0.png", &mut sink).unwrap();
        token.cancel();
        run_task(generator.id(), task, &mut sink, &arsenal());
        assert!(sink.response().is_none());
    }

    #[test]
    fn test_task_content_reaches_sink() {
        let dir = TempDir::new().unwrap();
        let generator = Generator::new(
            params(dir.path(), false),
            Box::new(MockDriver::new().with_prepared(true)),
        );
        let mut sink = MemorySink::new();
        generator.serve("1-0-0.png", &mut sink, &arsenal());
        assert_eq!(sink.data(), Some(&b"tile"[..]));
    }
}
