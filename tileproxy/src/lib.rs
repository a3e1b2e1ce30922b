//! Tileproxy - on-demand generation of map tiles, metatiles and geodata.
//!
//! The library is organised around two engines:
//!
//! - the [`generator`] lifecycle, which decides per resource whether cached
//!   output is still valid (driven by the [`resource::Changed`] classification
//!   of definition updates) and prepares it when it is not
//! - the [`warper`], a pool of out-of-process raster workers exchanging pixel
//!   data with the serving process through a shared-memory arena
//!
//! # Example
//!
//! ```ignore
//! use tileproxy::generator::{Arsenal, FactoryRegistry, Generators, GeneratorsConfig};
//! use tileproxy::resource::load_resources;
//! use tileproxy::tiling::{ReferenceFrames, TilingConfig};
//! use tileproxy::warper::{GdalWarper, WarperConfig};
//!
//! let warper = GdalWarper::spawn(WarperConfig::default())?;
//! let arsenal = Arsenal::new(Arc::new(warper), TilingConfig::default());
//! let generators = Generators::new(
//!     GeneratorsConfig::new("/var/tileproxy/store", "/var/tileproxy/data"),
//!     FactoryRegistry::builtin(),
//!     ReferenceFrames::builtin(),
//!     arsenal,
//! );
//! generators.load(load_resources(Path::new("resources.json"))?);
//! generators.prepare_all();
//! ```

pub mod config;
pub mod error;
pub mod generator;
pub mod geo;
pub mod logging;
pub mod resource;
pub mod tiling;
pub mod warper;

pub use error::{Error, Result};

/// Version of the tileproxy library, warper worker and CLI.
///
/// The version is defined in `Cargo.toml` and injected at compile time.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
