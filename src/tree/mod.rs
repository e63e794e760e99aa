//! Filesystem operations on the staging tree and the final layout.
//!
//! - [`copy_tree`]: merging copy that aggregates per-entry errors
//! - [`make_relocatable`]: launcher shebang rewriting
//! - [`remove_files`], [`move_dir`], [`TreeStats`]: reorganizing and pruning

mod copy;
mod prune;
mod relocate;

pub use copy::{copy_tree, ignore_patterns, CopyError, CopyFailed, CopyReport, IgnoreFn};
pub use prune::{move_dir, remove_dir_best_effort, remove_files, TreeStats};
pub use relocate::{
    make_relocatable, pattern_in, relocate_file, verify_relocatable, RelocateReport,
};
