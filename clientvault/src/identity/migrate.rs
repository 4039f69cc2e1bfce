use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use clientvault_core::ClientRecord;

use super::IdentityError;
use super::marker::{read_marker, write_marker};
use super::resolver::{FolderMatch, IdentityResolver};
use super::slug::slug_for;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FolderMove {
    pub client_id: i64,
    pub from: PathBuf,
    pub to: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationFailure {
    pub client_id: i64,
    pub path: PathBuf,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationReport {
    pub trashed: Vec<FolderMove>,
    pub restored: Vec<FolderMove>,
    pub renamed: Vec<FolderMove>,
    pub marked: Vec<PathBuf>,
    pub failures: Vec<MigrationFailure>,
    pub unchanged: usize,
}

impl MigrationReport {
    pub fn touched(&self) -> usize {
        self.trashed.len() + self.restored.len() + self.renamed.len() + self.marked.len()
    }
}

enum Step {
    Trashed(FolderMove),
    Restored(FolderMove),
    Renamed(FolderMove),
    Marked(PathBuf),
    Unchanged,
}

impl IdentityResolver {
    /// Active folder for `record`, created under the active root if absent.
    pub fn ensure_folder(&self, record: &ClientRecord) -> Result<PathBuf, IdentityError> {
        if !record.is_active() {
            return Err(IdentityError::Deleted(record.id));
        }
        let resolved = self.resolve(record.id, Some(record));
        if let Some(hit) = resolved.active {
            if hit.matched_by == FolderMatch::Slug {
                write_marker(&hit.path, record.id).map_err(|err| io_error(&hit.path, err))?;
            }
            return Ok(hit.path);
        }

        let slug = resolved.slug.unwrap_or_else(|| format!("id_{}", record.id));
        let mut target = self.active_root().join(&slug);
        if target.exists() {
            target = self.active_root().join(format!("id_{}_{slug}", record.id));
        }
        fs::create_dir_all(&target).map_err(|err| io_error(&target, err))?;
        write_marker(&target, record.id).map_err(|err| io_error(&target, err))?;
        tracing::info!(client_id = record.id, path = %target.display(), "created client folder");
        Ok(target)
    }

    /// Reconciles folders with record state. Active records claim their
    /// folders before deleted ones are considered. Failures are collected per
    /// record and never stop the batch.
    pub fn migrate(&self, records: &[ClientRecord]) -> MigrationReport {
        let mut report = MigrationReport::default();
        let (active, deleted): (Vec<&ClientRecord>, Vec<&ClientRecord>) =
            records.iter().partition(|record| record.is_active());
        let active_slugs: HashSet<String> = active.iter().map(|record| slug_for(record)).collect();

        for record in active {
            let step = self.migrate_active(record);
            self.tally(record, step, &mut report);
        }
        for record in deleted {
            let step = self.migrate_deleted(record, &active_slugs);
            self.tally(record, step, &mut report);
        }
        tracing::info!(
            trashed = report.trashed.len(),
            restored = report.restored.len(),
            renamed = report.renamed.len(),
            marked = report.marked.len(),
            failures = report.failures.len(),
            "folder migration finished"
        );
        report
    }

    fn tally(
        &self,
        record: &ClientRecord,
        step: Result<Step, IdentityError>,
        report: &mut MigrationReport,
    ) {
        match step {
            Ok(Step::Trashed(moved)) => report.trashed.push(moved),
            Ok(Step::Restored(moved)) => report.restored.push(moved),
            Ok(Step::Renamed(moved)) => report.renamed.push(moved),
            Ok(Step::Marked(path)) => report.marked.push(path),
            Ok(Step::Unchanged) => report.unchanged += 1,
            Err(err) => {
                tracing::warn!(client_id = record.id, error = %err, "folder migration failed");
                report.failures.push(MigrationFailure {
                    client_id: record.id,
                    path: failure_path(&err).unwrap_or_else(|| self.active_root().to_path_buf()),
                    error: err.to_string(),
                });
            }
        }
    }

    fn migrate_deleted(
        &self,
        record: &ClientRecord,
        active_slugs: &HashSet<String>,
    ) -> Result<Step, IdentityError> {
        let resolved = self.resolve(record.id, Some(record));
        let slug = resolved
            .slug
            .clone()
            .unwrap_or_else(|| format!("id_{}", record.id));
        let Some(active) = resolved.active else {
            return Ok(Step::Unchanged);
        };
        // A name match is only a guess; it never outranks a live client.
        if active.matched_by == FolderMatch::Slug && active_slugs.contains(&slug) {
            tracing::debug!(
                client_id = record.id,
                path = %active.path.display(),
                "slug folder shared with an active client, not trashing"
            );
            return Ok(Step::Unchanged);
        }
        let name = active
            .path
            .file_name()
            .map(|name| name.to_owned())
            .unwrap_or_else(|| slug.clone().into());
        let mut target = self.trash_root().join(&name);
        if target.exists() {
            target = self
                .trash_root()
                .join(format!("{}_{}", name.to_string_lossy(), record.id));
        }
        self.relocate(record.id, &active.path, &target)
            .map(Step::Trashed)
    }

    fn migrate_active(&self, record: &ClientRecord) -> Result<Step, IdentityError> {
        let resolved = self.resolve(record.id, Some(record));
        let slug = resolved
            .slug
            .clone()
            .unwrap_or_else(|| format!("id_{}", record.id));

        match (resolved.active, resolved.trash) {
            (None, Some(trashed)) => {
                let target = self.active_root().join(&slug);
                self.relocate(record.id, &trashed.path, &target)
                    .map(Step::Restored)
            }
            (Some(active), _) => {
                let target = active
                    .path
                    .parent()
                    .unwrap_or_else(|| self.active_root())
                    .join(&slug);
                if target != active.path && !target.exists() {
                    return self
                        .relocate(record.id, &active.path, &target)
                        .map(Step::Renamed);
                }
                if active.matched_by == FolderMatch::Slug {
                    write_marker(&active.path, record.id)
                        .map_err(|err| io_error(&active.path, err))?;
                    return Ok(Step::Marked(active.path));
                }
                Ok(Step::Unchanged)
            }
            (None, None) => Ok(Step::Unchanged),
        }
    }

    fn relocate(&self, client_id: i64, from: &Path, to: &Path) -> Result<FolderMove, IdentityError> {
        if to.exists() {
            return Err(IdentityError::TargetExists(to.to_path_buf()));
        }
        move_dir(from, to)?;
        if read_marker(to).ok().flatten() != Some(client_id) {
            write_marker(to, client_id).map_err(|err| io_error(to, err))?;
        }
        tracing::info!(client_id, from = %from.display(), to = %to.display(), "moved client folder");
        Ok(FolderMove {
            client_id,
            from: from.to_path_buf(),
            to: to.to_path_buf(),
        })
    }
}

/// Rename, or copy then remove when the rename cannot cross devices.
pub fn move_dir(from: &Path, to: &Path) -> Result<(), IdentityError> {
    if let Some(parent) = to.parent() {
        fs::create_dir_all(parent).map_err(|err| io_error(parent, err))?;
    }
    match fs::rename(from, to) {
        Ok(()) => return Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Err(io_error(from, err)),
        Err(err) => {
            tracing::debug!(from = %from.display(), error = %err, "rename failed, copying instead");
        }
    }
    if let Err(err) = copy_dir_all(from, to) {
        let _ = fs::remove_dir_all(to);
        return Err(io_error(to, err));
    }
    fs::remove_dir_all(from).map_err(|err| io_error(from, err))
}

fn copy_dir_all(from: &Path, to: &Path) -> io::Result<()> {
    fs::create_dir_all(to)?;
    for entry in fs::read_dir(from)? {
        let entry = entry?;
        let target = to.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_dir_all(&entry.path(), &target)?;
        } else {
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

fn io_error(path: &Path, source: io::Error) -> IdentityError {
    IdentityError::Io {
        path: path.to_path_buf(),
        source,
    }
}

fn failure_path(err: &IdentityError) -> Option<PathBuf> {
    match err {
        IdentityError::Io { path, .. } | IdentityError::TargetExists(path) => Some(path.clone()),
        IdentityError::NotFound(_) | IdentityError::Deleted(_) => None,
    }
}
