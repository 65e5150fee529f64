//! CLI command handlers.
//!
//! Each submodule handles a specific CLI command:
//! - `build` - Resolve a target and build it (or stage it, or open a shell)
//! - `list` - List known targets
//! - `validate` - Validate configuration documents
//! - `treegen` - Scaffold an out-of-tree target
//! - `preflight` - Run preflight checks

pub mod build;
pub mod list;
mod preflight;
pub mod treegen;
pub mod validate;

pub use build::cmd_build;
pub use list::cmd_list_targets;
pub use preflight::cmd_preflight;
pub use treegen::cmd_treegen;
pub use validate::cmd_validate;
