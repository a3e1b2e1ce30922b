//! `surface-meta`: a surface draped with a bound layer.
//!
//! Has no artifacts of its own; its documents point at the two resources it
//! combines, which live next to it in the store:
//!
//! ```text
//! <store>/<rf>/<group>/<id>/           this resource
//! <store>/<rf>/<surface.group>/<surface.id>/
//! <store>/<rf>/<tms.group>/<tms.id>/
//! ```

use serde::Serialize;

use crate::error::{Error, Result};
use crate::resource::definition::{ResourceRef, SurfaceMeta};
use crate::resource::Definition;

use super::arsenal::Arsenal;
use super::file_info::{FileInfo, FileKind};
use super::map_config::{self, MapConfig, SurfaceEntry};
use super::sink::Sink;
use super::support::with_revision;
use super::{GeneratorDriver, GeneratorParams, Task};

pub fn create(params: &GeneratorParams) -> Result<Box<dyn GeneratorDriver>> {
    let Definition::SurfaceMeta(definition) = &params.resource.definition else {
        return Err(Error::internal("surface-meta driver given a foreign definition"));
    };
    Ok(Box::new(SurfaceMetaDriver {
        params: params.clone(),
        definition: definition.clone(),
    }))
}

struct SurfaceMetaDriver {
    params: GeneratorParams,
    definition: SurfaceMeta,
}

/// `definition.json` document.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SurfaceDefinition {
    id: String,
    surface: String,
    bound_layer: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    comment: String,
}

/// Path of another resource's file relative to this resource's root.
fn sibling(other: &ResourceRef, file: &str) -> String {
    format!("../../{}/{}/{}", other.group, other.id, file)
}

impl SurfaceMetaDriver {
    fn full_id(&self, other: &ResourceRef) -> String {
        other.in_frame(self.params.reference_frame.id()).full_id()
    }

    fn map_config(&self) -> Result<MapConfig> {
        let resource = &self.params.resource;
        let (Some(lod_range), Some(tile_range)) = (resource.lod_range, resource.tile_range) else {
            return Err(Error::internal(format!(
                "Resource {} has no ranges.",
                resource.id
            )));
        };

        let surface_id = self.full_id(&self.definition.surface);
        let tms_id = self.full_id(&self.definition.tms);
        let mut config = MapConfig::new(&self.params.reference_frame).with_bound_layer(
            tms_id.clone(),
            sibling(&self.definition.tms, "boundlayer.json"),
        );
        config.surfaces.push(SurfaceEntry {
            id: surface_id.clone(),
            url: with_revision(
                &sibling(&self.definition.surface, "mapConfig.json"),
                resource.revision,
                '?',
            ),
            lod_range,
            tile_range,
            textures: vec![tms_id.clone()],
        });
        config.view.surfaces.insert(surface_id, vec![tms_id]);
        Ok(config)
    }
}

impl GeneratorDriver for SurfaceMetaDriver {
    fn load_prepared(&self) -> Result<bool> {
        Ok(true)
    }

    fn prepare(&self, _arsenal: &Arsenal) -> Result<()> {
        Ok(())
    }

    fn generate_file(&self, file: &FileInfo, sink: &mut dyn Sink) -> Result<Option<Task>> {
        match &file.kind {
            FileKind::Config => {
                self.map_config()?.serve(sink)?;
                Ok(None)
            }
            FileKind::Definition => {
                let definition = SurfaceDefinition {
                    id: self.params.resource.id.full_id(),
                    surface: sibling(&self.definition.surface, "mapConfig.json"),
                    bound_layer: sibling(&self.definition.tms, "boundlayer.json"),
                    comment: self.params.resource.comment.clone(),
                };
                map_config::serve_json(&definition, sink)?;
                Ok(None)
            }
            _ => Err(Error::not_found(format!("{} not found.", file.name))),
        }
    }
}
