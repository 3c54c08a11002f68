pub mod alldebrid;
pub mod http_util;
pub mod real_debrid;
pub mod torbox;

use super::registry::Registry;

/// Registers every built-in driver with the process-wide [`Registry`].
///
/// Call once at process start, before any [`Registry::create`] lookup.
/// Idempotent: re-registering a name just overwrites its factory.
pub fn register_all() {
    let registry = Registry::global();
    registry.register("realdebrid", real_debrid::factory);
    registry.register("torbox", torbox::factory);
    registry.register("alldebrid", alldebrid::factory);
}
