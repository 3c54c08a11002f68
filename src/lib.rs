//! The debrid streaming resolution engine: turns a torrent release candidate
//! into a direct playback URL by coordinating one or more premium "debrid"
//! cache services (RealDebrid, Torbox, AllDebrid, ...).

pub mod config;
pub mod debrid;
pub mod tracing_init;

pub use debrid::drivers::register_all;
