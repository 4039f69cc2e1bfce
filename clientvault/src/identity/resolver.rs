use std::cmp::Reverse;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::SystemTime;

use clientvault_core::ClientRecord;

use super::IdentityError;
use super::marker::{marker_modified, read_marker};
use super::slug::slug_for;

const DEFAULT_MARKER_DEPTH: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FolderMatch {
    Marker,
    Slug,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FolderHit {
    pub path: PathBuf,
    pub matched_by: FolderMatch,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Preference {
    #[default]
    ActiveFirst,
    TrashFirst,
    /// Any marker hit before any slug hit, active root first.
    Either,
}

impl FromStr for Preference {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "active" | "active-first" => Ok(Preference::ActiveFirst),
            "trash" | "trash-first" => Ok(Preference::TrashFirst),
            "either" => Ok(Preference::Either),
            other => Err(format!("unknown folder preference: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolveResult {
    pub client_id: i64,
    pub active: Option<FolderHit>,
    pub trash: Option<FolderHit>,
    pub slug: Option<String>,
}

impl ResolveResult {
    pub fn active_path(&self) -> Option<&Path> {
        self.active.as_ref().map(|hit| hit.path.as_path())
    }

    pub fn trash_path(&self) -> Option<&Path> {
        self.trash.as_ref().map(|hit| hit.path.as_path())
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_none() && self.trash.is_none()
    }

    pub fn select(&self, preference: Preference) -> Option<&Path> {
        match preference {
            Preference::ActiveFirst => self.active_path().or(self.trash_path()),
            Preference::TrashFirst => self.trash_path().or(self.active_path()),
            Preference::Either => {
                let by_marker = [&self.active, &self.trash]
                    .into_iter()
                    .flatten()
                    .find(|hit| hit.matched_by == FolderMatch::Marker);
                by_marker
                    .map(|hit| hit.path.as_path())
                    .or_else(|| self.active_path().or(self.trash_path()))
            }
        }
    }

    pub fn require(&self, preference: Preference) -> Result<&Path, IdentityError> {
        self.select(preference)
            .ok_or(IdentityError::NotFound(self.client_id))
    }
}

/// Locates client folders by marker first, folder name second.
#[derive(Debug, Clone)]
pub struct IdentityResolver {
    active_root: PathBuf,
    trash_root: PathBuf,
    marker_depth: usize,
}

impl IdentityResolver {
    pub fn new(active_root: impl Into<PathBuf>, trash_root: impl Into<PathBuf>) -> Self {
        Self {
            active_root: active_root.into(),
            trash_root: trash_root.into(),
            marker_depth: DEFAULT_MARKER_DEPTH,
        }
    }

    pub fn with_marker_depth(mut self, depth: usize) -> Self {
        self.marker_depth = depth.max(1);
        self
    }

    pub fn active_root(&self) -> &Path {
        &self.active_root
    }

    pub fn trash_root(&self) -> &Path {
        &self.trash_root
    }

    pub fn resolve(&self, client_id: i64, record: Option<&ClientRecord>) -> ResolveResult {
        let slug = record.map(slug_for);
        let active = self.locate(&self.active_root, Some(&self.trash_root), client_id, slug.as_deref());
        let trash = self.locate(&self.trash_root, None, client_id, slug.as_deref());
        tracing::debug!(
            client_id,
            active = ?active.as_ref().map(|hit| &hit.path),
            trash = ?trash.as_ref().map(|hit| &hit.path),
            "resolved client folder"
        );
        ResolveResult {
            client_id,
            active,
            trash,
            slug,
        }
    }

    fn locate(
        &self,
        root: &Path,
        exclude: Option<&Path>,
        client_id: i64,
        slug: Option<&str>,
    ) -> Option<FolderHit> {
        let mut hits = Vec::new();
        scan_markers(root, exclude, client_id, self.marker_depth, &mut hits);
        hits.sort_by(|(a_path, a_time), (b_path, b_time)| {
            Reverse(*a_time).cmp(&Reverse(*b_time)).then_with(|| a_path.cmp(b_path))
        });
        if let Some((path, _)) = hits.into_iter().next() {
            return Some(FolderHit {
                path,
                matched_by: FolderMatch::Marker,
            });
        }

        let candidate = root.join(slug?);
        if !candidate.is_dir() || exclude.is_some_and(|excluded| candidate == excluded) {
            return None;
        }
        match read_marker(&candidate) {
            Ok(Some(other)) if other != client_id => {
                tracing::debug!(
                    client_id,
                    other,
                    path = %candidate.display(),
                    "slug folder belongs to another client"
                );
                None
            }
            _ => Some(FolderHit {
                path: candidate,
                matched_by: FolderMatch::Slug,
            }),
        }
    }
}

fn scan_markers(
    dir: &Path,
    exclude: Option<&Path>,
    client_id: i64,
    depth: usize,
    hits: &mut Vec<(PathBuf, Option<SystemTime>)>,
) {
    if depth == 0 {
        return;
    }
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) => {
            tracing::debug!(path = %dir.display(), error = %err, "skipping unreadable directory");
            return;
        }
    };
    for entry in entries {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                tracing::debug!(path = %dir.display(), error = %err, "skipping unreadable entry");
                continue;
            }
        };
        let is_dir = entry.file_type().map(|kind| kind.is_dir()).unwrap_or(false);
        let path = entry.path();
        if !is_dir || exclude.is_some_and(|excluded| path == excluded) {
            continue;
        }
        match read_marker(&path) {
            Ok(Some(id)) if id == client_id => {
                let modified = marker_modified(&path);
                hits.push((path, modified));
            }
            // A marked folder belongs to one client; its children are documents.
            Ok(Some(_)) => {}
            Ok(None) => scan_markers(&path, exclude, client_id, depth - 1, hits),
            Err(err) => {
                tracing::debug!(path = %path.display(), error = %err, "skipping unreadable marker");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::marker::{marker_path, write_marker};
    use crate::testing::{record, record_with_tax_id};
    use std::time::Duration;
    use tempfile::{TempDir, tempdir};

    struct Roots {
        _dir: TempDir,
        active: PathBuf,
        trash: PathBuf,
    }

    fn roots() -> Roots {
        let dir = tempdir().unwrap();
        let active = dir.path().join("clients");
        let trash = active.join(".trash");
        fs::create_dir_all(&trash).unwrap();
        Roots {
            active,
            trash,
            _dir: dir,
        }
    }

    fn folder(parent: &Path, name: &str, marker: Option<i64>) -> PathBuf {
        let path = parent.join(name);
        fs::create_dir_all(&path).unwrap();
        if let Some(id) = marker {
            write_marker(&path, id).unwrap();
        }
        path
    }

    fn touch_marker(dir: &Path, at: SystemTime) {
        let file = fs::OpenOptions::new()
            .write(true)
            .open(marker_path(dir))
            .unwrap();
        file.set_modified(at).unwrap();
    }

    #[test]
    fn marker_beats_slug_named_folder() {
        let roots = roots();
        let client = record_with_tax_id(7, "Acme", "12.345.678/0001-90");
        let renamed = folder(&roots.active, "Acme Old Name", Some(7));
        folder(&roots.active, "12345678000190", Some(9));

        let resolver = IdentityResolver::new(&roots.active, &roots.trash);
        let result = resolver.resolve(7, Some(&client));

        assert_eq!(
            result.active,
            Some(FolderHit {
                path: renamed,
                matched_by: FolderMatch::Marker
            })
        );
        assert_eq!(result.slug.as_deref(), Some("12345678000190"));
        assert_eq!(result.trash, None);
    }

    #[test]
    fn marker_beats_unmarked_slug_folder() {
        let roots = roots();
        let client = record_with_tax_id(7, "Acme", "12.345.678/0001-90");
        let renamed = folder(&roots.active, "Acme Old Name", Some(7));
        let slug_dir = folder(&roots.active, "12345678000190", None);

        let result = IdentityResolver::new(&roots.active, &roots.trash).resolve(7, Some(&client));

        assert_eq!(result.active_path(), Some(renamed.as_path()));
        assert_eq!(result.active.unwrap().matched_by, FolderMatch::Marker);
        assert!(slug_dir.exists());
    }

    #[test]
    fn slug_folder_matches_when_unmarked() {
        let roots = roots();
        let slug_dir = folder(&roots.active, "12345678000190", None);
        let client = record_with_tax_id(7, "Acme", "12.345.678/0001-90");

        let result = IdentityResolver::new(&roots.active, &roots.trash).resolve(7, Some(&client));

        assert_eq!(result.active_path(), Some(slug_dir.as_path()));
        assert_eq!(result.active.unwrap().matched_by, FolderMatch::Slug);
    }

    #[test]
    fn slug_folder_marked_for_another_client_is_not_a_match() {
        let roots = roots();
        folder(&roots.active, "acme", Some(9));

        let result = IdentityResolver::new(&roots.active, &roots.trash).resolve(7, Some(&record(7, "Acme")));

        assert!(result.is_empty());
        assert!(matches!(
            result.require(Preference::ActiveFirst),
            Err(IdentityError::NotFound(7))
        ));
    }

    #[test]
    fn trash_is_scanned_separately_from_active_root() {
        let roots = roots();
        let trashed = folder(&roots.trash, "acme", Some(7));

        let result = IdentityResolver::new(&roots.active, &roots.trash).resolve(7, None);

        assert_eq!(result.active, None);
        assert_eq!(result.trash_path(), Some(trashed.as_path()));
        assert_eq!(result.select(Preference::ActiveFirst), Some(trashed.as_path()));
    }

    #[test]
    fn freshest_marker_wins_and_ties_follow_path_order() {
        let roots = roots();
        let older = folder(&roots.active, "a-older", Some(7));
        let newer = folder(&roots.active, "z-newer", Some(7));
        let base = SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000);
        touch_marker(&older, base);
        touch_marker(&newer, base + Duration::from_secs(60));
        let resolver = IdentityResolver::new(&roots.active, &roots.trash);

        assert_eq!(resolver.resolve(7, None).active_path(), Some(newer.as_path()));

        touch_marker(&newer, base);
        assert_eq!(resolver.resolve(7, None).active_path(), Some(older.as_path()));
    }

    #[test]
    fn markers_are_found_within_depth_only() {
        let roots = roots();
        let grouped = folder(&roots.active.join("2024"), "acme", Some(7));
        folder(&roots.active.join("archive/deep"), "other", Some(8));

        let resolver = IdentityResolver::new(&roots.active, &roots.trash);
        assert_eq!(resolver.resolve(7, None).active_path(), Some(grouped.as_path()));
        assert!(resolver.resolve(8, None).is_empty());
        assert!(
            !resolver
                .clone()
                .with_marker_depth(3)
                .resolve(8, None)
                .is_empty()
        );
    }

    #[test]
    fn preference_chooses_between_roots() {
        let roots = roots();
        let active = folder(&roots.active, "acme", None);
        let trashed = folder(&roots.trash, "old-acme", Some(7));

        let result = IdentityResolver::new(&roots.active, &roots.trash).resolve(7, Some(&record(7, "Acme")));

        assert_eq!(result.select(Preference::ActiveFirst), Some(active.as_path()));
        assert_eq!(result.select(Preference::TrashFirst), Some(trashed.as_path()));
        assert_eq!(result.select(Preference::Either), Some(trashed.as_path()));
        assert_eq!("trash".parse::<Preference>(), Ok(Preference::TrashFirst));
        assert!("sideways".parse::<Preference>().is_err());
    }

    #[test]
    fn missing_roots_resolve_to_nothing() {
        let dir = tempdir().unwrap();
        let resolver = IdentityResolver::new(dir.path().join("nope"), dir.path().join("trash"));
        let result = resolver.resolve(7, Some(&record(7, "Acme")));
        assert!(result.is_empty());
        assert_eq!(result.slug.as_deref(), Some("acme"));
    }
}
