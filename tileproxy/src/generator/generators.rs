//! The set of generators serving the configured resources.
//!
//! [`Generators::load`] reconciles the running generators with a new list
//! of resources. Each incoming resource is compared with what was there
//! before (the running generator, or the `resource.json` record left by the
//! last successful prepare) and classified with [`Changed`]:
//!
//! | changed  | action                                                     |
//! |----------|------------------------------------------------------------|
//! | `no`     | running generator kept as is                               |
//! | `safely` | generator rebuilt on the cached output, record rewritten   |
//! | `yes`    | generator rebuilt change-enforced, revision bumped         |
//!
//! Resources whose dependencies are missing are rejected; resources no
//! longer listed are dropped.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::resource::{Changed, Resource, ResourceId};
use crate::tiling::ReferenceFrames;

use super::arsenal::Arsenal;
use super::lifecycle::{run_task, Generator, RESOURCE_FILE};
use super::registry::FactoryRegistry;
use super::sink::Sink;
use super::{GeneratorParams, Task};

/// Locations shared by all generators.
#[derive(Debug, Clone)]
pub struct GeneratorsConfig {
    /// Root of the per-resource artifact directories.
    pub store_root: PathBuf,
    /// Base of relative dataset paths.
    pub data_root: PathBuf,
    /// Directory served under `registry/`.
    pub registry_root: Option<PathBuf>,
}

impl GeneratorsConfig {
    pub fn new(store_root: impl Into<PathBuf>, data_root: impl Into<PathBuf>) -> Self {
        Self {
            store_root: store_root.into(),
            data_root: data_root.into(),
            registry_root: None,
        }
    }

    pub fn with_registry_root(mut self, registry_root: impl Into<PathBuf>) -> Self {
        self.registry_root = Some(registry_root.into());
        self
    }
}

/// Outcome of [`Generators::load`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadReport {
    pub added: Vec<ResourceId>,
    pub kept: Vec<ResourceId>,
    pub replaced: Vec<ResourceId>,
    /// Resources not loaded, with the reason.
    pub rejected: Vec<(ResourceId, String)>,
    pub removed: Vec<ResourceId>,
}

enum Candidate {
    Keep(Arc<Generator>),
    New {
        generator: Generator,
        replaces: bool,
    },
}

impl Candidate {
    fn resource(&self) -> &Resource {
        match self {
            Candidate::Keep(generator) => generator.resource(),
            Candidate::New { generator, .. } => generator.resource(),
        }
    }
}

/// Generators by resource id.
pub struct Generators {
    config: GeneratorsConfig,
    factories: FactoryRegistry,
    frames: ReferenceFrames,
    arsenal: Arsenal,
    generators: DashMap<ResourceId, Arc<Generator>>,
    /// Serializes `load` calls.
    loading: Mutex<()>,
}

impl Generators {
    pub fn new(
        config: GeneratorsConfig,
        factories: FactoryRegistry,
        frames: ReferenceFrames,
        arsenal: Arsenal,
    ) -> Self {
        Self {
            config,
            factories,
            frames,
            arsenal,
            generators: DashMap::new(),
            loading: Mutex::new(()),
        }
    }

    pub fn arsenal(&self) -> &Arsenal {
        &self.arsenal
    }

    pub fn config(&self) -> &GeneratorsConfig {
        &self.config
    }

    pub fn len(&self) -> usize {
        self.generators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.generators.is_empty()
    }

    pub fn get(&self, id: &ResourceId) -> Option<Arc<Generator>> {
        self.generators.get(id).map(|g| Arc::clone(g.value()))
    }

    /// Ids of all loaded resources, sorted.
    pub fn ids(&self) -> Vec<ResourceId> {
        let mut ids: Vec<_> = self.generators.iter().map(|g| g.key().clone()).collect();
        ids.sort();
        ids
    }

    /// Reconciles the running generators with `resources`.
    pub fn load(&self, resources: Vec<Resource>) -> LoadReport {
        let _guard = self.loading.lock();
        let mut report = LoadReport::default();

        let mut candidates: BTreeMap<ResourceId, Candidate> = BTreeMap::new();
        for resource in resources {
            let id = resource.id.clone();
            if candidates.contains_key(&id) {
                warn!(resource = %id, "Duplicate resource ignored");
                report.rejected.push((id, "duplicate resource".into()));
                continue;
            }
            match self.candidate(resource) {
                Ok(candidate) => {
                    candidates.insert(id, candidate);
                }
                Err(e) => {
                    warn!(resource = %id, error = %e, "Resource rejected");
                    report.rejected.push((id, e.to_string()));
                }
            }
        }

        reject_missing_dependencies(&mut candidates, &mut report);

        let listed: BTreeSet<ResourceId> = candidates.keys().cloned().collect();
        for id in self.ids() {
            if !listed.contains(&id) {
                self.generators.remove(&id);
                info!(resource = %id, "Resource removed");
                report.removed.push(id);
            }
        }

        for (id, candidate) in candidates {
            match candidate {
                Candidate::Keep(_) => report.kept.push(id),
                Candidate::New {
                    generator,
                    replaces,
                } => {
                    info!(
                        resource = %id,
                        state = %generator.state(),
                        revision = generator.resource().revision,
                        replaces,
                        "Resource loaded"
                    );
                    self.generators.insert(id.clone(), Arc::new(generator));
                    if replaces {
                        report.replaced.push(id);
                    } else {
                        report.added.push(id);
                    }
                }
            }
        }

        info!(
            added = report.added.len(),
            kept = report.kept.len(),
            replaced = report.replaced.len(),
            rejected = report.rejected.len(),
            removed = report.removed.len(),
            "Resources loaded"
        );
        report
    }

    fn candidate(&self, resource: Resource) -> Result<Candidate> {
        match self.get(&resource.id) {
            Some(running) => {
                let previous = running.resource().clone();
                let mut resource = resource;
                resource.revision = resource.revision.max(previous.revision);
                if previous.changed(&resource).ok() == Some(Changed::No) {
                    return Ok(Candidate::Keep(running));
                }
                Ok(Candidate::New {
                    generator: self.instantiate(resource, Some(previous))?,
                    replaces: true,
                })
            }
            None => {
                let root = resource.id.root(&self.config.store_root);
                let stored = Resource::load(&root.join(RESOURCE_FILE)).ok();
                Ok(Candidate::New {
                    generator: self.instantiate(resource, stored)?,
                    replaces: false,
                })
            }
        }
    }

    /// Builds a generator for `resource`, classifying it against `previous`.
    fn instantiate(
        &self,
        mut resource: Resource,
        previous: Option<Resource>,
    ) -> Result<Generator> {
        let rf = self.frames.get(&resource.id.reference_frame)?.clone();
        let root = resource.id.root(&self.config.store_root);

        let mut change_enforced = false;
        if let Some(previous) = previous {
            resource.revision = resource.revision.max(previous.revision);
            // a definition of another variant is as good as a new one
            let changed = previous.changed(&resource).unwrap_or(Changed::Yes);
            debug!(resource = %resource.id, changed = %changed, "Compared with previous");
            match changed {
                Changed::No => {}
                Changed::Safely => {
                    let record = root.join(RESOURCE_FILE);
                    if record.exists() {
                        resource.save(&record)?;
                    }
                }
                Changed::Yes => {
                    change_enforced = true;
                    resource.revision = previous.revision + 1;
                }
            }
        }

        let params = GeneratorParams {
            resource,
            reference_frame: rf,
            root,
            data_root: self.config.data_root.clone(),
            change_enforced,
            registry_root: self.config.registry_root.clone(),
        };
        let driver = self.factories.create(&params)?;
        Ok(Generator::new(params, driver))
    }

    /// Prepares every generator that is not ready yet.
    ///
    /// Returns the number of generators that are not ready afterwards.
    pub fn prepare_all(&self) -> usize {
        let pending: Vec<Arc<Generator>> = self
            .generators
            .iter()
            .filter(|g| !g.is_ready())
            .map(|g| Arc::clone(g.value()))
            .collect();
        info!(pending = pending.len(), "Preparing resources");

        let mut failed = 0;
        for generator in pending {
            if let Err(e) = generator.ensure_ready(&self.arsenal) {
                debug!(resource = %generator.id(), error = %e, "Not ready after sweep");
                failed += 1;
            }
        }
        failed
    }

    /// Makes one generator ready.
    ///
    /// # Errors
    ///
    /// `NotFound` for unknown resources, otherwise as
    /// [`Generator::ensure_ready`].
    pub fn ensure_ready(&self, id: &ResourceId) -> Result<Arc<Generator>> {
        let generator = self
            .get(id)
            .ok_or_else(|| Error::not_found(format!("Unknown resource {}.", id)))?;
        generator.ensure_ready(&self.arsenal)?;
        Ok(generator)
    }

    /// Starts answering a request for `name` of resource `id`.
    pub fn generate_file(
        &self,
        id: &ResourceId,
        name: &str,
        sink: &mut dyn Sink,
    ) -> Option<Task> {
        match self.get(id) {
            Some(generator) => generator.generate_file(name, sink),
            None => {
                sink.error(Error::not_found(format!("Unknown resource {}.", id)));
                None
            }
        }
    }

    /// Answers a request completely, running any task inline.
    pub fn serve(&self, id: &ResourceId, name: &str, sink: &mut dyn Sink) {
        if let Some(task) = self.generate_file(id, name, sink) {
            run_task(id, task, sink, &self.arsenal);
        }
    }
}

/// Drops candidates that need a resource which is not a candidate, until
/// every remaining dependency is satisfied.
fn reject_missing_dependencies(
    candidates: &mut BTreeMap<ResourceId, Candidate>,
    report: &mut LoadReport,
) {
    loop {
        let missing: Vec<(ResourceId, ResourceId)> = candidates
            .iter()
            .filter_map(|(id, c)| {
                c.resource()
                    .needs_resources()
                    .into_iter()
                    .find(|dep| !candidates.contains_key(dep))
                    .map(|dep| (id.clone(), dep))
            })
            .collect();
        if missing.is_empty() {
            return;
        }
        for (id, dep) in missing {
            warn!(resource = %id, dependency = %dep, "Missing dependency");
            candidates.remove(&id);
            report
                .rejected
                .push((id, format!("missing dependency {}", dep)));
        }
    }
}
