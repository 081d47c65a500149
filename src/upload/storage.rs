//! Local filesystem content store.
//!
//! Layout under the store root:
//! ```text
//! {root}/
//! ├── Uploads/
//! │   ├── photo.jpg
//! │   └── photo__thumb.jpg          derived variant
//! └── .protected/
//!     └── Private/
//!         └── 3f2a9c01b7/           first 10 hex chars of the content hash
//!             └── report.pdf
//! ```

use std::io;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tokio::fs;
use tracing::{debug, info};
use uuid::Uuid;

use super::descriptor::{join_extension, split_extension};
use super::store::{ContentLocation, ContentStore, RecordId, Visibility, WriteMode};
use crate::{DepotError, Result};

/// Directory holding protected content.
pub const PROTECTED_DIR: &str = ".protected";

/// Separator between a file stem and a variant name.
pub const VARIANT_SEPARATOR: &str = "__";

const HASH_PREFIX_LEN: usize = 10;

/// Content store writing to a local directory.
#[derive(Debug, Clone)]
pub struct LocalContentStore {
    root: PathBuf,
}

impl LocalContentStore {
    /// Create a store rooted at `root`, creating the directory if needed.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// The store root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Absolute path of stored content.
    pub fn full_path(&self, location: &ContentLocation) -> PathBuf {
        self.root.join(&location.path)
    }

    /// Read stored content back.
    pub async fn load(&self, location: &ContentLocation) -> Result<Vec<u8>> {
        match fs::read(self.full_path(location)).await {
            Ok(content) => Ok(content),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(DepotError::NotFound(format!("content {}", location.path)))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Whether the content file exists.
    pub async fn exists(&self, location: &ContentLocation) -> bool {
        fs::try_exists(self.full_path(location))
            .await
            .unwrap_or(false)
    }

    /// Store a derived variant (thumbnail, preview, ...) next to the content.
    pub async fn write_variant(
        &self,
        location: &ContentLocation,
        variant: &str,
        content: &[u8],
    ) -> Result<PathBuf> {
        check_segment(variant)?;
        let path = self.variant_path(location, variant);
        write_atomic(&path, content, WriteMode::Overwrite).await?;
        Ok(path)
    }

    /// Path a variant of `location` would be stored at.
    pub fn variant_path(&self, location: &ContentLocation, variant: &str) -> PathBuf {
        let full = self.full_path(location);
        let file_name = full
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default();
        let (stem, ext) = split_extension(file_name);
        let variant_name = join_extension(&format!("{stem}{VARIANT_SEPARATOR}{variant}"), ext);
        full.with_file_name(variant_name)
    }

    /// Relative path for content with the given properties.
    fn relative_path(
        container_path: &str,
        name: &str,
        visibility: Visibility,
        hash: &str,
    ) -> Result<String> {
        check_segment(name)?;
        let mut segments: Vec<&str> = Vec::new();
        if visibility == Visibility::Protected {
            segments.push(PROTECTED_DIR);
        }
        for segment in container_path.split('/').filter(|s| !s.is_empty()) {
            check_segment(segment)?;
            segments.push(segment);
        }
        if visibility == Visibility::Protected {
            segments.push(hash.get(..HASH_PREFIX_LEN).unwrap_or(hash));
        }
        segments.push(name);
        Ok(segments.join("/"))
    }
}

/// Reject names that would escape their directory.
fn check_segment(segment: &str) -> Result<()> {
    let mut components = Path::new(segment).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) if !segment.contains('/') => Ok(()),
        _ => Err(DepotError::Validation(format!(
            "invalid path segment: {segment:?}"
        ))),
    }
}

/// Hex SHA-256 of `content`.
pub fn content_hash(content: &[u8]) -> String {
    let digest = Sha256::digest(content);
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

/// Write through a temporary file so readers never see partial content.
///
/// `CreateNew` links the temporary file into place, which fails if the
/// target already exists; `Overwrite` renames over it.
async fn write_atomic(path: &Path, content: &[u8], mode: WriteMode) -> Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| DepotError::Validation(format!("no parent directory: {path:?}")))?;
    fs::create_dir_all(parent).await?;

    let temp = parent.join(format!(".{}.tmp", Uuid::new_v4()));
    if let Err(e) = fs::write(&temp, content).await {
        let _ = fs::remove_file(&temp).await;
        return Err(e.into());
    }

    let placed = match mode {
        WriteMode::Overwrite => fs::rename(&temp, path).await,
        WriteMode::CreateNew => {
            let linked = fs::hard_link(&temp, path).await;
            let _ = fs::remove_file(&temp).await;
            linked
        }
    };
    match placed {
        Ok(()) => Ok(()),
        Err(e) => {
            let _ = fs::remove_file(&temp).await;
            if e.kind() == io::ErrorKind::AlreadyExists {
                Err(DepotError::ContentExists(path.display().to_string()))
            } else {
                Err(e.into())
            }
        }
    }
}

async fn remove_if_exists(path: &Path) -> Result<bool> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

#[async_trait]
impl ContentStore for LocalContentStore {
    async fn write(
        &self,
        container_path: &str,
        name: &str,
        visibility: Visibility,
        content: &[u8],
        mode: WriteMode,
    ) -> Result<ContentLocation> {
        let hash = content_hash(content);
        let path = Self::relative_path(container_path, name, visibility, &hash)?;
        write_atomic(&self.root.join(&path), content, mode)
            .await
            .map_err(|e| match e {
                DepotError::ContentExists(_) => DepotError::ContentExists(path.clone()),
                other => other,
            })?;

        debug!(path = %path, size = content.len(), "Stored content");
        Ok(ContentLocation {
            path,
            hash,
            size: content.len() as u64,
            visibility,
        })
    }

    async fn remove(&self, location: &ContentLocation) -> Result<bool> {
        let full = self.full_path(location);
        let removed = remove_if_exists(&full).await?;

        // Protected content sits in its own hash directory.
        if location.visibility == Visibility::Protected {
            if let Some(parent) = full.parent() {
                let _ = fs::remove_dir(parent).await;
            }
        }
        Ok(removed)
    }

    async fn invalidate_derived(
        &self,
        record: RecordId,
        location: &ContentLocation,
    ) -> Result<usize> {
        let full = self.full_path(location);
        let (Some(dir), Some(file_name)) = (full.parent(), full.file_name().and_then(|n| n.to_str()))
        else {
            return Ok(0);
        };
        let (stem, ext) = split_extension(file_name);
        let prefix = format!("{stem}{VARIANT_SEPARATOR}");
        let suffix = if ext.is_empty() {
            String::new()
        } else {
            format!(".{ext}")
        };

        let mut entries = match fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let mut removed = 0;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            let is_variant = name.starts_with(&prefix)
                && name.len() > prefix.len() + suffix.len()
                && split_extension(name).1 == ext;
            if is_variant && remove_if_exists(&entry.path()).await? {
                removed += 1;
            }
        }

        if removed > 0 {
            info!(record = %record, removed, "Invalidated derived files");
        }
        Ok(removed)
    }
}
