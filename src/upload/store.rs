//! Collaborator interfaces and shared record types for ingestion.
//!
//! The ingestor never owns persistence. It talks to three collaborators:
//! - [`RecordStore`]: metadata records and the per-container name-space
//! - [`ContentStore`]: the physical bytes and their derived variants
//! - [`ContainerTree`]: the folder hierarchy and its access rules
//!
//! Containers and records are referenced by opaque ids only.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::{DepotError, Result};

/// Opaque handle for a container (folder).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ContainerId(pub i64);

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity assigned by the record store. Later records compare greater.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct RecordId(pub i64);

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Effective storage visibility of an asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    /// Served to anyone.
    Public,
    /// Served only after a permission check.
    Protected,
}

impl Visibility {
    /// Convert to database string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Visibility::Public => "public",
            Visibility::Protected => "protected",
        }
    }
}

impl fmt::Display for Visibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Visibility {
    type Err = DepotError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "public" => Ok(Visibility::Public),
            "protected" => Ok(Visibility::Protected),
            other => Err(DepotError::Validation(format!("unknown visibility: {other}"))),
        }
    }
}

/// A record's own visibility setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum VisibilityMode {
    /// Defer to the container chain.
    #[default]
    Inherit,
    /// Always use the given visibility.
    Forced(Visibility),
}

impl VisibilityMode {
    /// Convert to database string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            VisibilityMode::Inherit => "inherit",
            VisibilityMode::Forced(v) => v.as_str(),
        }
    }
}

impl FromStr for VisibilityMode {
    type Err = DepotError;

    fn from_str(s: &str) -> Result<Self> {
        if s.eq_ignore_ascii_case("inherit") {
            return Ok(VisibilityMode::Inherit);
        }
        s.parse().map(VisibilityMode::Forced)
    }
}

impl TryFrom<String> for VisibilityMode {
    type Error = DepotError;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

/// Who may view the contents of a container.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum AccessRule {
    /// Use the parent's rule (public at the root).
    #[default]
    Inherit,
    /// Anyone may view.
    Anyone,
    /// Any authenticated user.
    LoggedInUsers,
    /// Only the listed users or groups.
    OnlyTheseUsers(Vec<String>),
}

impl AccessRule {
    /// Convert to database string representation.
    ///
    /// The member list of `OnlyTheseUsers` is stored separately.
    pub fn as_str(&self) -> &'static str {
        match self {
            AccessRule::Inherit => "inherit",
            AccessRule::Anyone => "anyone",
            AccessRule::LoggedInUsers => "logged_in",
            AccessRule::OnlyTheseUsers(_) => "only_these",
        }
    }

    /// Rebuild a rule from its stored kind and member list.
    pub fn from_parts(kind: &str, members: Option<&str>) -> Result<Self> {
        match kind {
            "inherit" => Ok(AccessRule::Inherit),
            "anyone" => Ok(AccessRule::Anyone),
            "logged_in" => Ok(AccessRule::LoggedInUsers),
            "only_these" => Ok(AccessRule::OnlyTheseUsers(
                members
                    .unwrap_or_default()
                    .split(',')
                    .map(str::trim)
                    .filter(|m| !m.is_empty())
                    .map(String::from)
                    .collect(),
            )),
            other => Err(DepotError::Validation(format!("unknown access rule: {other}"))),
        }
    }

    /// Comma-joined member list for `OnlyTheseUsers`.
    pub fn members(&self) -> Option<String> {
        match self {
            AccessRule::OnlyTheseUsers(members) => Some(members.join(",")),
            _ => None,
        }
    }
}

/// A container as seen by the ingestion core.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Container {
    /// Container handle.
    pub id: ContainerId,
    /// Path segment name.
    pub name: String,
    /// Parent container (None at the root).
    pub parent: Option<ContainerId>,
    /// The container's own view rule.
    pub access_rule: AccessRule,
}

/// Where the content store put a file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContentLocation {
    /// Path relative to the store root.
    pub path: String,
    /// Hex SHA-256 of the content.
    pub hash: String,
    /// Number of bytes written.
    pub size: u64,
    /// Visibility the file was stored under.
    pub visibility: Visibility,
}

/// A committed metadata record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AssetRecord {
    /// Identity assigned by the record store.
    pub id: RecordId,
    /// Owning container.
    pub container: ContainerId,
    /// Logical name including extension.
    pub name: String,
    /// The record's own visibility setting.
    pub visibility: VisibilityMode,
    /// Where the current content lives.
    pub location: ContentLocation,
    /// When the record was created.
    pub created_at: DateTime<Utc>,
    /// When the content was last replaced.
    pub updated_at: DateTime<Utc>,
}

/// Data for an upsert. `id == None` creates a new record.
#[derive(Debug, Clone)]
pub struct AssetUpsert {
    /// Existing identity to update, if any.
    pub id: Option<RecordId>,
    /// Owning container.
    pub container: ContainerId,
    /// Logical name including extension.
    pub name: String,
    /// The record's own visibility setting.
    pub visibility: VisibilityMode,
    /// Where the content lives.
    pub location: ContentLocation,
}

/// Persistence for asset metadata records.
///
/// Implementations must enforce uniqueness of `(container, name)` and report
/// a violation as [`DepotError::RecordConflict`].
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Whether `name` is already taken in `container`.
    async fn name_exists(&self, container: ContainerId, name: &str) -> Result<bool>;

    /// Create or update a record, returning it with its identity.
    async fn upsert(&self, record: &AssetUpsert) -> Result<AssetRecord>;

    /// Get a record by identity.
    async fn get(&self, id: RecordId) -> Result<Option<AssetRecord>>;

    /// Get the record holding `name` in `container`.
    async fn find(&self, container: ContainerId, name: &str) -> Result<Option<AssetRecord>>;
}

/// Whether a content write may replace an existing file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WriteMode {
    /// Fail with [`DepotError::ContentExists`] if the target exists.
    #[default]
    CreateNew,
    /// Replace whatever is at the target.
    Overwrite,
}

/// Physical storage for file content.
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Write `content` under the given container path and name.
    async fn write(
        &self,
        container_path: &str,
        name: &str,
        visibility: Visibility,
        content: &[u8],
        mode: WriteMode,
    ) -> Result<ContentLocation>;

    /// Remove stored content. Returns `false` if nothing was there.
    async fn remove(&self, location: &ContentLocation) -> Result<bool>;

    /// Drop every derived artifact (resized images, previews, ...) of a record.
    ///
    /// Returns the number of artifacts removed.
    async fn invalidate_derived(&self, record: RecordId, location: &ContentLocation)
        -> Result<usize>;
}

/// Read access to the container hierarchy.
#[async_trait]
pub trait ContainerTree: Send + Sync {
    /// Look up a container.
    async fn container(&self, id: ContainerId) -> Result<Option<Container>>;

    /// The container's own access rule.
    async fn effective_access_rule(&self, id: ContainerId) -> Result<AccessRule> {
        Ok(self.require(id).await?.access_rule)
    }

    /// The container's parent, if any.
    async fn parent_of(&self, id: ContainerId) -> Result<Option<ContainerId>> {
        Ok(self.require(id).await?.parent)
    }

    /// Look up a container that must exist.
    async fn require(&self, id: ContainerId) -> Result<Container> {
        self.container(id)
            .await?
            .ok_or_else(|| DepotError::NotFound(format!("container {id}")))
    }
}
