//! The debrid streaming resolution engine: turns a torrent release candidate
//! into a direct playback URL by coordinating one or more premium "debrid"
//! cache services.

pub mod arbitrator;
pub mod drivers;
pub mod error;
pub mod health;
pub mod magnet;
pub mod provider;
pub mod query;
pub mod registration;
pub mod registry;
pub mod resolver;
pub mod scraper;
pub mod selection;
pub mod types;

pub use error::{EngineError, EngineErrorKind, EngineResult};
pub use provider::Provider;
pub use registry::Registry;
