//! Runtime wiring for tandem
//!
//! This crate sits on top of the coordination and search layers:
//! - `TandemConfig`: settings loaded from `tandem.toml`
//! - `TandemBuilder`: plugs data sources, a search store and extra
//!   providers into one registry
//! - `Tandem`: the shared runtime handing out one coordinator per flow

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod runtime;

pub use runtime::{SearchConfig, Tandem, TandemBuilder, TandemConfig, CONFIG_FILE_NAME};
