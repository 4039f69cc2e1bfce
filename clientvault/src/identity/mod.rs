pub mod marker;
pub mod migrate;
pub mod resolver;
pub mod slug;

use std::path::PathBuf;

use thiserror::Error;

pub use marker::{MARKER_FILE, read_marker, write_marker};
pub use migrate::{FolderMove, MigrationFailure, MigrationReport, move_dir};
pub use resolver::{FolderHit, FolderMatch, IdentityResolver, Preference, ResolveResult};
pub use slug::slug_for;

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("no folder found for client {0}")]
    NotFound(i64),
    #[error("client {0} is deleted; its folder is not recreated")]
    Deleted(i64),
    #[error("target folder already exists: {}", .0.display())]
    TargetExists(PathBuf),
    #[error("I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
