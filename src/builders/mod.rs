//! Builders wiring configuration into a running supervisor.

mod supervisor_builder;

pub use supervisor_builder::register_manifest;
