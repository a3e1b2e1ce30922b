//! Generator factories keyed by type and driver.

use std::collections::HashMap;
use std::fmt;

use crate::error::{Error, Result};
use crate::resource::GeneratorType;

use super::{geodata_mesh, semantic_tiled, surface_meta, tms_raster, tms_synthetic};
use super::{GeneratorDriver, GeneratorParams};

/// Builds a driver for a resource.
pub type Factory = fn(&GeneratorParams) -> Result<Box<dyn GeneratorDriver>>;

/// Table of known drivers.
#[derive(Clone, Default)]
pub struct FactoryRegistry {
    factories: HashMap<(GeneratorType, &'static str), Factory>,
}

impl FactoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every driver shipped in this crate.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register(GeneratorType::Tms, "tms-raster", tms_raster::create);
        registry.register(GeneratorType::Tms, "tms-raster-synthetic", tms_synthetic::create);
        registry.register(GeneratorType::Surface, "surface-meta", surface_meta::create);
        registry.register(GeneratorType::Geodata, "geodata-mesh", geodata_mesh::create);
        registry.register(
            GeneratorType::Geodata,
            "geodata-semantic-tiled",
            semantic_tiled::create,
        );
        registry
    }

    /// Registers a factory, replacing any previous one for the same key.
    pub fn register(
        &mut self,
        generator_type: GeneratorType,
        driver: &'static str,
        factory: Factory,
    ) {
        self.factories.insert((generator_type, driver), factory);
    }

    pub fn contains(&self, generator_type: GeneratorType, driver: &str) -> bool {
        self.factories
            .keys()
            .any(|(t, d)| *t == generator_type && *d == driver)
    }

    /// Instantiates the driver of `params.resource`.
    ///
    /// # Errors
    ///
    /// `NotFound` for unregistered drivers, or whatever the factory reports.
    pub fn create(&self, params: &GeneratorParams) -> Result<Box<dyn GeneratorDriver>> {
        let resource = &params.resource;
        let driver = resource.driver();
        let factory = self
            .factories
            .iter()
            .find(|((t, d), _)| *t == resource.generator_type && *d == driver)
            .map(|(_, factory)| *factory)
            .ok_or_else(|| {
                Error::not_found(format!(
                    "No generator for <{}/{}>.",
                    resource.generator_type, driver
                ))
            })?;
        factory(params)
    }
}

impl fmt::Debug for FactoryRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys: Vec<String> = self
            .factories
            .keys()
            .map(|(t, d)| format!("{}/{}", t, d))
            .collect();
        keys.sort();
        f.debug_struct("FactoryRegistry")
            .field("drivers", &keys)
            .finish()
    }
}
