//! Configuration loading and validation for PGEVODB.
//!
//! The configuration file (`pgevodb.yaml` by default) holds connection
//! profiles and profile-independent engine settings. The recognised keys
//! form a closed set: unknown keys anywhere in the document are a load
//! error, so typos surface immediately instead of silently disabling
//! behaviour.
//!
//! # Internals
//! The structure is based on unresolved and resolved configuration types:
//! the file parses into an internal unresolved type, and resolution
//! validates and converts it into [`Configuration`], the public structure.
//! Resolution is side-effect free; anything that touches the filesystem
//! (creating log directories and the like) belongs to the caller.

mod error;
mod structure;
mod traits;
mod utilities;

pub use error::*;
pub use structure::*;
pub use utilities::get_default_configuration_file_path;
