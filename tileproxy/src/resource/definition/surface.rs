//! Surface definitions.

use std::collections::BTreeSet;

use serde_json::{json, Map, Value};

use crate::error::Result;
use crate::resource::fields;
use crate::resource::{Changed, GeneratorType, ResourceId};

use super::Variant;

/// Reference to another resource in the same reference frame.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceRef {
    pub group: String,
    pub id: String,
}

impl ResourceRef {
    pub fn new(group: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            id: id.into(),
        }
    }

    fn parse(obj: &Map<String, Value>, field: &str) -> Result<Self> {
        let inner = fields::object(obj, field)?;
        Ok(Self {
            group: fields::string(inner, "group")?,
            id: fields::string(inner, "id")?,
        })
    }

    fn build(&self) -> Value {
        json!({ "group": self.group, "id": self.id })
    }

    /// Full id of the referenced resource in `reference_frame`.
    pub fn in_frame(&self, reference_frame: &str) -> ResourceId {
        ResourceId::new(reference_frame, &self.group, &self.id)
    }
}

/// Meta surface: combines an existing surface with an existing TMS layer.
#[derive(Debug, Clone, PartialEq)]
pub struct SurfaceMeta {
    pub surface: ResourceRef,
    pub tms: ResourceRef,
}

impl Variant for SurfaceMeta {
    const DRIVER: &'static str = "surface-meta";
    const TYPE: GeneratorType = GeneratorType::Surface;

    fn parse(obj: &Map<String, Value>) -> Result<Self> {
        Ok(Self {
            surface: ResourceRef::parse(obj, "surface")?,
            tms: ResourceRef::parse(obj, "tms")?,
        })
    }

    fn build(&self, obj: &mut Map<String, Value>) {
        obj.insert("surface".into(), self.surface.build());
        obj.insert("tms".into(), self.tms.build());
    }

    fn changed(&self, other: &Self) -> Changed {
        Changed::when(&self.surface, &other.surface, Changed::Yes)
            .and(Changed::when(&self.tms, &other.tms, Changed::Yes))
    }

    fn needs_resources(&self, reference_frame: &str) -> BTreeSet<ResourceId> {
        [
            self.surface.in_frame(reference_frame),
            self.tms.in_frame(reference_frame),
        ]
        .into_iter()
        .collect()
    }

    fn needs_ranges(&self) -> bool {
        false
    }
}
