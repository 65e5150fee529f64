//! Shared file-system utilities.

pub mod archive;
pub mod files;
pub mod temp;

pub use archive::append_to_tarball;
pub use files::{copy_file, copy_tree, sorted_scripts, subdirectories, write_file_with_dirs, CopyMode};
pub use temp::{clean_up_paths, prepare_work_dir};
