//! Raster warper worker process.
//!
//! Spawned by the warper pool; not meant to be started by hand. Speaks the
//! frame protocol on stdin/stdout and logs to stderr.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tileproxy::warper::{worker, CustomRegistry};

#[derive(Parser)]
#[command(name = "tileproxy-warper")]
#[command(version = tileproxy::VERSION)]
#[command(about = "Raster warper worker for tileproxy")]
struct Args {
    /// Index of this worker in its pool
    #[arg(long)]
    index: usize,

    /// Arena file shared with the pool
    #[arg(long)]
    arena: PathBuf,

    /// Default log level when RUST_LOG is not set
    #[arg(long, default_value = "info")]
    log_level: String,
}

/// Ask the kernel to kill this worker when the thread that spawned it exits.
/// The pool spawns workers from its supervisor thread, which ends with the
/// pool.
#[cfg(target_os = "linux")]
fn die_with_parent() {
    // SAFETY: prctl with PR_SET_PDEATHSIG only sets a flag on this process.
    unsafe {
        libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGKILL);
    }
}

#[cfg(not(target_os = "linux"))]
fn die_with_parent() {}

fn main() -> ExitCode {
    let args = Args::parse();
    die_with_parent();
    tileproxy::logging::init_worker_logging(&args.log_level);

    let options = worker::WorkerOptions {
        index: args.index,
        arena: args.arena,
    };
    match worker::run(&options, &CustomRegistry::builtin()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(index = options.index, error = %err, "Warper worker failed");
            ExitCode::FAILURE
        }
    }
}
