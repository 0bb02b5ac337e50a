#![warn(
    clippy::correctness,
    clippy::suspicious,
    clippy::complexity,
    clippy::perf,
    clippy::style,
    clippy::pedantic
)]
#![allow(clippy::missing_errors_doc, clippy::missing_panics_doc)]

//! Reading and writing sectioned `key=value` profile files.
//!
//! Files are parsed into a [`Document`] and kept in a small most-recently-used cache so repeated
//! lookups do not touch the disk. Edits stay in memory until the profile is displaced, released
//! or the store is closed.
//!
//! ```no_run
//! use profile::{ProfileConfig, ProfileFile, ProfileStore};
//!
//! let store = ProfileStore::new(&ProfileConfig::default());
//! let file = ProfileFile::in_dir("/etc/app", "app.ini");
//!
//! let mut buf = [0_u8; 64];
//! let n = store.get_string(&file, "Window", "Width", "640", &mut buf);
//! assert!(n > 0);
//! ```

mod cache;
mod config;
mod document;
mod entry;
mod error;
mod lock;
mod registry;
mod section;
mod store;
pub mod struct_codec;

pub use cache::{CachedProfile, ProfileCache, ProfileFile};
pub use config::{ProfileConfig, StalePolicy};
pub use document::Document;
pub use entry::{
    EnvLookup, ProcessEnv, copy_entry, copy_to_buffer, entry_text, escape_value, expand_env,
    is_profile_space, strip_quotes,
};
pub use error::{ProfileError, Result, StructError};
pub use registry::{Registry, get_config_bool, get_config_string};
pub use section::{Key, Section};
pub use store::ProfileStore;
