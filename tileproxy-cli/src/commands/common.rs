//! Common types and utilities shared across CLI commands.

use clap::ValueEnum;
use tileproxy::resource::ResourceId;
use tileproxy::warper::Operation;

use crate::error::CliError;

/// Raster operation selection for CLI arguments.
#[derive(Debug, Clone, Copy, ValueEnum, PartialEq)]
pub enum OperationArg {
    /// Data channels as an 8-bit image
    Image,
    /// Validity mask
    Mask,
    /// Averaged coverage of the mask dataset
    DetailMask,
}

impl From<OperationArg> for Operation {
    fn from(op: OperationArg) -> Self {
        match op {
            OperationArg::Image => Operation::Image,
            OperationArg::Mask => Operation::Mask,
            OperationArg::DetailMask => Operation::DetailMask,
        }
    }
}

/// Parse a resource id written as `referenceFrame/group/id`.
pub fn parse_resource_id(s: &str) -> Result<ResourceId, CliError> {
    let parts: Vec<&str> = s.split('/').collect();
    match parts.as_slice() {
        [rf, group, id] if !rf.is_empty() && !group.is_empty() && !id.is_empty() => {
            Ok(ResourceId::new(*rf, *group, *id))
        }
        _ => Err(CliError::Config(format!(
            "Invalid resource id '{}', expected referenceFrame/group/id",
            s
        ))),
    }
}
