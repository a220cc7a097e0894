//! A self-contained Lua host: a single executable that can carry, appended
//! past the end of its own image, an archive of script chunks and native
//! extension modules.
//!
//! At startup the host probes its own file for the archive signature. A
//! valid archive is parsed and its sections become loadable modules: script
//! sections go through the interpreter's chunk loader, native sections are
//! mapped straight from the file into memory with their imports resolved
//! against the host process, sibling sections, or the system loader. An
//! archive can also be built, inspected, and edited from a running script
//! through the `plua` authoring API.
//!
//! The crate targets Unix; in-memory native loading needs Linux.

pub mod api;
pub mod bitlib;
pub mod bootstrap;
pub mod chunk;
pub mod cli;
pub mod container;
pub mod errors;
pub mod format;
pub mod host_image;
pub mod native;
pub mod repl;
pub mod resolver;

pub use container::Container;
pub use errors::{ContainerError, ImageError, NativeLoadError};
