//! Prepare command - run the generator lifecycle for a resources file.

use std::path::PathBuf;
use std::sync::atomic::Ordering;

use serde_json::{json, Value};
use tileproxy::generator::{GeneratorState, Generators};
use tileproxy::resource::ResourceId;

use crate::error::CliError;
use crate::runner::{install_shutdown_handler, CliRunner};

/// Arguments for the prepare command.
pub struct PrepareArgs {
    pub resources: PathBuf,
    pub data_root: Option<PathBuf>,
    pub in_process: bool,
    pub json: bool,
}

/// Outcome for one resource.
struct Outcome {
    id: ResourceId,
    state: GeneratorState,
    revision: u32,
    error: Option<String>,
}

/// Run the prepare command.
///
/// Generators are prepared one at a time so that Ctrl-C stops the sweep
/// between resources.
pub fn run(runner: &CliRunner, args: PrepareArgs) -> Result<(), CliError> {
    runner.log_startup("prepare");
    let warper = runner.warper(args.in_process)?;
    let generators = runner.generators(&args.resources, args.data_root, &warper)?;
    let shutdown = install_shutdown_handler(&warper)?;

    if !args.json {
        println!("Preparing {} resources", generators.len());
        println!();
    }

    let mut outcomes = Vec::with_capacity(generators.len());
    for id in generators.ids() {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        let outcome = prepare_one(&generators, id);
        if !args.json {
            print_outcome(&outcome);
        }
        outcomes.push(outcome);
    }
    warper.shutdown();

    let failed = outcomes.iter().filter(|o| o.error.is_some()).count();
    if args.json {
        println!("{}", report_json(&outcomes));
    } else {
        println!();
        if failed == 0 {
            println!("All resources ready.");
        }
    }

    if failed > 0 {
        return Err(CliError::Prepare {
            failed,
            total: generators.len(),
        });
    }
    Ok(())
}

fn prepare_one(generators: &Generators, id: ResourceId) -> Outcome {
    match generators.ensure_ready(&id) {
        Ok(generator) => Outcome {
            state: generator.state(),
            revision: generator.resource().revision,
            id,
            error: None,
        },
        Err(e) => {
            let generator = generators.get(&id);
            Outcome {
                state: generator
                    .as_ref()
                    .map(|g| g.state())
                    .unwrap_or(GeneratorState::Failed),
                revision: generator.map(|g| g.resource().revision).unwrap_or(0),
                id,
                error: Some(e.to_string()),
            }
        }
    }
}

fn print_outcome(outcome: &Outcome) {
    match &outcome.error {
        None => println!(
            "  {:<8} {} (revision {})",
            outcome.state.to_string(),
            outcome.id,
            outcome.revision
        ),
        Some(error) => println!(
            "  {:<8} {}: {}",
            outcome.state.to_string(),
            outcome.id,
            error
        ),
    }
}

fn report_json(outcomes: &[Outcome]) -> Value {
    let resources: Vec<Value> = outcomes
        .iter()
        .map(|o| {
            json!({
                "id": o.id.to_string(),
                "state": o.state.to_string(),
                "revision": o.revision,
                "error": o.error,
            })
        })
        .collect();
    json!({ "resources": resources })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_json() {
        let outcomes = vec![
            Outcome {
                id: ResourceId::new("webmerc", "imagery", "ortho"),
                state: GeneratorState::Ready,
                revision: 4,
                error: None,
            },
            Outcome {
                id: ResourceId::new("webmerc", "imagery", "broken"),
                state: GeneratorState::Failed,
                revision: 0,
                error: Some("Not found: missing.png".to_string()),
            },
        ];
        let doc = report_json(&outcomes);
        assert_eq!(doc["resources"][0]["state"], "ready");
        assert_eq!(doc["resources"][0]["revision"], 4);
        assert!(doc["resources"][0]["error"].is_null());
        assert_eq!(doc["resources"][1]["error"], "Not found: missing.png");
    }
}
