//! Output tree layout and path-safe file placement.
//!
//! Layout under the output root:
//!
//! ```text
//! <root>/[<Category>/]civitai_<id>.<ext>            stills
//! <root>/videos/[<Category>/]civitai_<id>.<ext>     videos
//! <root>/[<Category>/]metadata/civitai_<id>.json    metadata sidecars
//! <root>/.partial/civitai_<id>.part                 in-progress transfers
//! ```
//!
//! Every path handed out by [`StorageLayout`] is checked to stay inside the
//! root; anything that would escape it is rejected with
//! [`StorageError::PathEscape`]. Writes check again after resolving symlinks,
//! so a linked directory under the root cannot redirect them elsewhere.

use std::path::{Component, Path, PathBuf};

use serde_json::Value;
use thiserror::Error;
use tracing::{debug, instrument};

use crate::classify::Category;

/// Subdirectory receiving video files.
pub const VIDEO_DIR: &str = "videos";

/// Subdirectory (per category) receiving metadata sidecars.
pub const METADATA_DIR: &str = "metadata";

/// Hidden subdirectory holding partial transfers.
pub const PARTIAL_DIR: &str = ".partial";

const FILENAME_PREFIX: &str = "civitai_";

/// Errors raised while computing or writing output paths.
#[derive(Debug, Error)]
pub enum StorageError {
    /// A computed path would resolve outside the output root.
    #[error("path {path} escapes output root {root}")]
    PathEscape {
        /// Offending path.
        path: PathBuf,
        /// Configured root.
        root: PathBuf,
    },

    /// An id or extension contains characters not allowed in a file name.
    #[error("unsafe file name component {value:?}")]
    UnsafeName {
        /// Offending component.
        value: String,
    },

    /// Filesystem failure.
    #[error("IO error at {path}: {source}")]
    Io {
        /// Path where the error occurred.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// Metadata could not be serialized.
    #[error("failed to serialize metadata for {path}: {source}")]
    Serialize {
        /// Sidecar path.
        path: PathBuf,
        /// Underlying serde error.
        #[source]
        source: serde_json::Error,
    },
}

impl StorageError {
    fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Result of moving a finished transfer into place.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    /// The file was moved to its destination.
    Stored,
    /// A file already existed at the destination; the new copy was discarded.
    AlreadyExists,
}

/// Computes and validates paths under an output root.
#[derive(Debug, Clone)]
pub struct StorageLayout {
    root: PathBuf,
    organize_by_category: bool,
}

impl StorageLayout {
    /// Creates a layout rooted at `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>, organize_by_category: bool) -> Self {
        Self {
            root: root.into(),
            organize_by_category,
        }
    }

    /// Output root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory receiving a media file of the given class and category.
    #[must_use]
    pub fn media_dir(&self, is_video: bool, category: Category) -> PathBuf {
        let mut dir = self.root.clone();
        if is_video {
            dir.push(VIDEO_DIR);
        }
        if self.organize_by_category {
            dir.push(category.folder_name());
        }
        dir
    }

    /// Final path for a media file.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::UnsafeName`] if `item_id` or `extension` is not
    /// a plain token, or [`StorageError::PathEscape`] if the result leaves the root.
    pub fn media_path(
        &self,
        item_id: &str,
        extension: &str,
        is_video: bool,
        category: Category,
    ) -> Result<PathBuf, StorageError> {
        let name = format!(
            "{FILENAME_PREFIX}{}.{}",
            safe_component(item_id)?,
            safe_component(extension)?
        );
        self.contain(self.media_dir(is_video, category).join(name))
    }

    /// Path of the JSON metadata sidecar for an item.
    ///
    /// # Errors
    ///
    /// Same as [`StorageLayout::media_path`].
    pub fn metadata_path(&self, item_id: &str, category: Category) -> Result<PathBuf, StorageError> {
        let mut dir = self.root.clone();
        if self.organize_by_category {
            dir.push(category.folder_name());
        }
        dir.push(METADATA_DIR);
        let name = format!("{FILENAME_PREFIX}{}.json", safe_component(item_id)?);
        self.contain(dir.join(name))
    }

    /// Temporary path for an in-progress transfer of `item_id`.
    ///
    /// # Errors
    ///
    /// Same as [`StorageLayout::media_path`].
    pub fn partial_path(&self, item_id: &str) -> Result<PathBuf, StorageError> {
        let name = format!("{FILENAME_PREFIX}{}.part", safe_component(item_id)?);
        self.contain(self.root.join(PARTIAL_DIR).join(name))
    }

    /// Ensures the partial-transfer directory exists.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Io`] if it cannot be created.
    pub async fn prepare(&self) -> Result<(), StorageError> {
        let dir = self.root.join(PARTIAL_DIR);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| StorageError::io(&dir, e))
    }

    /// Rejects `path` unless it lies lexically inside the root.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::PathEscape`] for paths outside the root or
    /// containing `..`, root, or prefix components below it.
    pub fn contain(&self, path: PathBuf) -> Result<PathBuf, StorageError> {
        let escape = || StorageError::PathEscape {
            path: path.clone(),
            root: self.root.clone(),
        };
        let relative = path.strip_prefix(&self.root).map_err(|_| escape())?;
        if relative.as_os_str().is_empty()
            || !relative
                .components()
                .all(|component| matches!(component, Component::Normal(_)))
        {
            return Err(escape());
        }
        Ok(path)
    }

    /// Creates the parent of `path`, rejecting it unless its deepest existing
    /// ancestor resolves inside the resolved root.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::PathEscape`] if a symlink leads outside the
    /// root, or [`StorageError::Io`] if a directory cannot be created or
    /// resolved.
    pub async fn resolve_parent(&self, path: &Path) -> Result<(), StorageError> {
        let Some(parent) = path.parent() else {
            return Ok(());
        };
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|e| StorageError::io(&self.root, e))?;
        let root = tokio::fs::canonicalize(&self.root)
            .await
            .map_err(|e| StorageError::io(&self.root, e))?;

        let mut existing = parent;
        while !tokio::fs::try_exists(existing).await.unwrap_or(false) {
            match existing.parent() {
                Some(up) => existing = up,
                None => break,
            }
        }
        let resolved = tokio::fs::canonicalize(existing)
            .await
            .map_err(|e| StorageError::io(existing, e))?;
        if !resolved.starts_with(&root) {
            return Err(StorageError::PathEscape {
                path: resolved,
                root,
            });
        }

        // The file itself must not be a link either.
        if let Ok(meta) = tokio::fs::symlink_metadata(path).await
            && meta.file_type().is_symlink()
        {
            return Err(StorageError::PathEscape {
                path: path.to_path_buf(),
                root,
            });
        }

        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| StorageError::io(parent, e))
    }

    /// Moves a finished transfer to `dest`, creating parent directories.
    ///
    /// If `dest` already exists the partial file is removed and
    /// [`Placement::AlreadyExists`] is returned.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::PathEscape`] if `dest` is or resolves outside
    /// the root, or [`StorageError::Io`] if the directory or rename fails.
    #[instrument(level = "debug", skip(self), fields(dest = %dest.display()))]
    pub async fn place(&self, partial: &Path, dest: &Path) -> Result<Placement, StorageError> {
        let dest = self.contain(dest.to_path_buf())?;
        self.resolve_parent(&dest).await?;

        if tokio::fs::try_exists(&dest)
            .await
            .map_err(|e| StorageError::io(&dest, e))?
        {
            debug!("destination exists, discarding new copy");
            discard(partial).await;
            return Ok(Placement::AlreadyExists);
        }

        tokio::fs::rename(partial, &dest)
            .await
            .map_err(|e| StorageError::io(&dest, e))?;
        Ok(Placement::Stored)
    }

    /// Writes `metadata` as pretty JSON to `path`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::PathEscape`], [`StorageError::Serialize`], or
    /// [`StorageError::Io`].
    pub async fn write_metadata(&self, path: &Path, metadata: &Value) -> Result<(), StorageError> {
        let path = self.contain(path.to_path_buf())?;
        let bytes = serde_json::to_vec_pretty(metadata).map_err(|source| StorageError::Serialize {
            path: path.clone(),
            source,
        })?;
        self.resolve_parent(&path).await?;
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| StorageError::io(&path, e))
    }
}

/// Removes a partial file, ignoring a missing file.
pub async fn discard(partial: &Path) {
    if let Err(e) = tokio::fs::remove_file(partial).await
        && e.kind() != std::io::ErrorKind::NotFound
    {
        debug!(path = %partial.display(), error = %e, "failed to remove partial file");
    }
}

/// Accepts ASCII alphanumerics, `-` and `_` only.
fn safe_component(value: &str) -> Result<&str, StorageError> {
    if !value.is_empty()
        && value.len() <= 128
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        Ok(value)
    } else {
        Err(StorageError::UnsafeName {
            value: value.to_string(),
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn layout(organize: bool) -> StorageLayout {
        StorageLayout::new("/out", organize)
    }

    #[test]
    fn test_media_path_stills_and_videos() {
        let layout = layout(true);
        assert_eq!(
            layout.media_path("42", "jpg", false, Category::Mature).unwrap(),
            PathBuf::from("/out/Mature/civitai_42.jpg")
        );
        assert_eq!(
            layout.media_path("42", "mp4", true, Category::Sfw).unwrap(),
            PathBuf::from("/out/videos/SFW/civitai_42.mp4")
        );
    }

    #[test]
    fn test_media_path_without_organization() {
        let layout = layout(false);
        assert_eq!(
            layout.media_path("7", "png", false, Category::Adult).unwrap(),
            PathBuf::from("/out/civitai_7.png")
        );
        assert_eq!(
            layout.media_path("7", "webm", true, Category::Adult).unwrap(),
            PathBuf::from("/out/videos/civitai_7.webm")
        );
    }

    #[test]
    fn test_metadata_and_partial_paths() {
        let layout = layout(true);
        assert_eq!(
            layout.metadata_path("9", Category::Adult).unwrap(),
            PathBuf::from("/out/Adult/metadata/civitai_9.json")
        );
        assert_eq!(
            layout.partial_path("9").unwrap(),
            PathBuf::from("/out/.partial/civitai_9.part")
        );
    }

    #[test]
    fn test_traversal_ids_are_rejected() {
        let layout = layout(true);
        for id in ["../../etc/passwd", "..", "a/b", "a\\b", "/abs", "", "x y"] {
            assert!(
                matches!(
                    layout.media_path(id, "jpg", false, Category::Sfw),
                    Err(StorageError::UnsafeName { .. })
                ),
                "id {id:?} should be rejected"
            );
        }
        assert!(layout.media_path("1", "../x", false, Category::Sfw).is_err());
    }

    #[test]
    fn test_contain_rejects_escaping_paths() {
        let layout = layout(true);
        assert!(matches!(
            layout.contain(PathBuf::from("/out/../etc/passwd")),
            Err(StorageError::PathEscape { .. })
        ));
        assert!(matches!(
            layout.contain(PathBuf::from("/elsewhere/file")),
            Err(StorageError::PathEscape { .. })
        ));
        assert!(layout.contain(PathBuf::from("/out")).is_err());
        assert!(layout.contain(PathBuf::from("/out/SFW/a.jpg")).is_ok());
    }

    #[tokio::test]
    async fn test_place_moves_file_and_detects_existing() {
        let dir = tempfile::tempdir().unwrap();
        let layout = StorageLayout::new(dir.path(), true);
        layout.prepare().await.unwrap();

        let partial = layout.partial_path("5").unwrap();
        std::fs::write(&partial, b"first").unwrap();
        let dest = layout.media_path("5", "png", false, Category::Sfw).unwrap();

        assert_eq!(layout.place(&partial, &dest).await.unwrap(), Placement::Stored);
        assert_eq!(std::fs::read(&dest).unwrap(), b"first");
        assert!(!partial.exists());

        std::fs::write(&partial, b"second").unwrap();
        assert_eq!(
            layout.place(&partial, &dest).await.unwrap(),
            Placement::AlreadyExists
        );
        assert_eq!(std::fs::read(&dest).unwrap(), b"first");
        assert!(!partial.exists());
    }

    #[tokio::test]
    async fn test_write_metadata_creates_sidecar() {
        let dir = tempfile::tempdir().unwrap();
        let layout = StorageLayout::new(dir.path(), true);
        let path = layout.metadata_path("3", Category::Mature).unwrap();

        layout
            .write_metadata(&path, &serde_json::json!({"id": 3}))
            .await
            .unwrap();

        let written: Value = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(written["id"], 3);
    }

    // ==================== Symlink Containment Tests ====================

    #[cfg(unix)]
    #[tokio::test]
    async fn test_symlinked_category_dir_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("out");
        let outside = dir.path().join("outside");
        std::fs::create_dir_all(&root).unwrap();
        std::fs::create_dir_all(&outside).unwrap();
        std::os::unix::fs::symlink(&outside, root.join("SFW")).unwrap();

        let layout = StorageLayout::new(&root, true);
        layout.prepare().await.unwrap();
        let partial = layout.partial_path("1").unwrap();
        std::fs::write(&partial, b"data").unwrap();

        let dest = layout.media_path("1", "jpg", false, Category::Sfw).unwrap();
        assert!(matches!(
            layout.place(&partial, &dest).await,
            Err(StorageError::PathEscape { .. })
        ));

        let sidecar = layout.metadata_path("1", Category::Sfw).unwrap();
        assert!(matches!(
            layout.write_metadata(&sidecar, &serde_json::json!({"id": 1})).await,
            Err(StorageError::PathEscape { .. })
        ));

        assert!(partial.exists());
        assert_eq!(std::fs::read_dir(&outside).unwrap().count(), 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_symlinked_sidecar_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("out");
        let target = dir.path().join("elsewhere.json");
        std::fs::write(&target, b"{}").unwrap();

        let layout = StorageLayout::new(&root, true);
        let sidecar = layout.metadata_path("2", Category::Adult).unwrap();
        std::fs::create_dir_all(sidecar.parent().unwrap()).unwrap();
        std::os::unix::fs::symlink(&target, &sidecar).unwrap();

        assert!(matches!(
            layout.write_metadata(&sidecar, &serde_json::json!({"id": 2})).await,
            Err(StorageError::PathEscape { .. })
        ));
        assert_eq!(std::fs::read(&target).unwrap(), b"{}");
    }
}
