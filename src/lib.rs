//! Signature search and in-place binary patching.
//!
//! Layers, leaf first: [`byte_io`] random-access reads and writes, [`search`]
//! windowed pattern scans, [`patch`] opcode-level writers, [`domain`]
//! fixed-width string substitution, and [`apply`], which wraps every mutation
//! in backup / verify / rollback.

pub mod apply;
pub mod archive;
pub mod backup;
pub mod byte_io;
pub mod domain;
pub mod error;
pub mod opcodes;
pub mod patch;
pub mod pattern;
pub mod profile;
pub mod progress;
pub mod search;
mod util;

pub use apply::{apply_patch, patch_client, patch_server, PatchResult};
pub use backup::{create_backup, discover_backups, restore_backup, restore_original_game};
pub use domain::{DomainPatchResult, DomainPatcher};
pub use error::{Error, Result};
pub use patch::{replace_bytes, verify};
pub use pattern::PatternSpec;
pub use profile::{PatchProfile, Platform};
pub use progress::ProgressListener;
pub use search::{find_nested_pattern, search, search_all, PatternMatch, SearchConfig};
