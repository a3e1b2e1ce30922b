//! Serve-file command - render one file of one resource.

use std::io::Write;
use std::path::PathBuf;

use tileproxy::generator::{MemorySink, SinkResponse};

use super::common::parse_resource_id;
use crate::error::CliError;
use crate::runner::CliRunner;

/// Arguments for the serve-file command.
pub struct ServeFileArgs {
    pub resources: PathBuf,
    pub resource: String,
    pub file: String,
    pub output: Option<PathBuf>,
    pub data_root: Option<PathBuf>,
    pub in_process: bool,
}

/// Run the serve-file command.
///
/// The content goes to `output`, or stdout when not given; the content type
/// and cache headers a front end would send are printed to stderr.
pub fn run(runner: &CliRunner, args: ServeFileArgs) -> Result<(), CliError> {
    runner.log_startup("serve-file");
    let id = parse_resource_id(&args.resource)?;
    let warper = runner.warper(args.in_process)?;
    let generators = runner.generators(&args.resources, args.data_root, &warper)?;

    generators.ensure_ready(&id).map_err(CliError::Serve)?;
    let mut sink = MemorySink::new();
    generators.serve(&id, &args.file, &mut sink);
    warper.shutdown();

    match sink.into_response() {
        Some(SinkResponse::Content { data, info }) => {
            eprintln!("Content-Type: {}", info.content_type);
            eprintln!(
                "Cache-Control: max-age={}",
                runner.config().serving.max_age(info.class)
            );
            match args.output {
                Some(path) => {
                    std::fs::write(&path, &data)?;
                    eprintln!("Wrote {} bytes to {}", data.len(), path.display());
                }
                None => {
                    let mut stdout = std::io::stdout().lock();
                    stdout.write_all(&data)?;
                    stdout.flush()?;
                }
            }
            Ok(())
        }
        Some(SinkResponse::Error(e)) => Err(CliError::Serve(e)),
        None => Err(CliError::Serve(tileproxy::Error::internal(
            "No response produced.",
        ))),
    }
}
