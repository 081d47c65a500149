//! SQLite-backed record store and container tree.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tracing::debug;

use super::store::{
    AccessRule, AssetRecord, AssetUpsert, Container, ContainerId, ContainerTree, ContentLocation,
    RecordId, RecordStore,
};
use crate::db::Database;
use crate::{DepotError, Result};

const ASSET_COLUMNS: &str = "id, folder_id, name, visibility, location, stored_visibility, \
                             hash, size, created_at, updated_at";

#[derive(Debug, sqlx::FromRow)]
struct FolderRow {
    id: i64,
    name: String,
    parent_id: Option<i64>,
    access_rule: String,
    access_members: Option<String>,
}

impl TryFrom<FolderRow> for Container {
    type Error = DepotError;

    fn try_from(row: FolderRow) -> Result<Self> {
        Ok(Container {
            id: ContainerId(row.id),
            access_rule: AccessRule::from_parts(&row.access_rule, row.access_members.as_deref())?,
            name: row.name,
            parent: row.parent_id.map(ContainerId),
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct AssetRow {
    id: i64,
    folder_id: i64,
    name: String,
    visibility: String,
    location: String,
    stored_visibility: String,
    hash: String,
    size: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<AssetRow> for AssetRecord {
    type Error = DepotError;

    fn try_from(row: AssetRow) -> Result<Self> {
        Ok(AssetRecord {
            id: RecordId(row.id),
            container: ContainerId(row.folder_id),
            name: row.name,
            visibility: row.visibility.parse()?,
            location: ContentLocation {
                path: row.location,
                hash: row.hash,
                size: u64::try_from(row.size).unwrap_or_default(),
                visibility: row.stored_visibility.parse()?,
            },
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// Map a uniqueness violation on `(folder_id, name)` to a record conflict.
fn conflict_or(e: sqlx::Error, container: ContainerId, name: &str) -> DepotError {
    match &e {
        sqlx::Error::Database(db) if db.is_unique_violation() => DepotError::RecordConflict {
            container,
            name: name.to_string(),
        },
        _ => e.into(),
    }
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    matches!(e, sqlx::Error::Database(db) if db.is_unique_violation())
}

fn check_folder_name(name: &str) -> Result<()> {
    if name.is_empty() || name == "." || name == ".." || name.contains('/') {
        return Err(DepotError::Validation(format!(
            "invalid folder name: {name:?}"
        )));
    }
    Ok(())
}

/// Catalog of folders and asset records in SQLite.
#[derive(Debug, Clone)]
pub struct SqliteCatalog {
    pool: SqlitePool,
}

impl SqliteCatalog {
    /// Create a catalog over an existing pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create a catalog over an opened database.
    pub fn from_database(db: &Database) -> Self {
        Self::new(db.pool().clone())
    }

    /// Create a folder.
    pub async fn create_folder(
        &self,
        name: &str,
        parent: Option<ContainerId>,
        access_rule: &AccessRule,
    ) -> Result<ContainerId> {
        check_folder_name(name)?;
        let result = sqlx::query(
            "INSERT INTO folders (name, parent_id, access_rule, access_members)
             VALUES (?, ?, ?, ?)",
        )
        .bind(name)
        .bind(parent.map(|p| p.0))
        .bind(access_rule.as_str())
        .bind(access_rule.members())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                DepotError::Validation(format!("folder {name:?} already exists"))
            } else {
                e.into()
            }
        })?;

        let id = ContainerId(result.last_insert_rowid());
        debug!(folder = %id, name = %name, "Created folder");
        Ok(id)
    }

    /// Find a folder by name under `parent` (root when `None`).
    pub async fn find_folder(
        &self,
        parent: Option<ContainerId>,
        name: &str,
    ) -> Result<Option<ContainerId>> {
        let id: Option<i64> = sqlx::query_scalar(
            "SELECT id FROM folders WHERE COALESCE(parent_id, 0) = COALESCE(?, 0) AND name = ?",
        )
        .bind(parent.map(|p| p.0))
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;
        Ok(id.map(ContainerId))
    }

    /// Resolve a slash-separated folder path, creating missing folders.
    ///
    /// New folders inherit their access rule.
    pub async fn find_or_make_folder(&self, path: &str) -> Result<ContainerId> {
        let mut parent = None;
        for segment in path.split('/').map(str::trim).filter(|s| !s.is_empty()) {
            check_folder_name(segment)?;
            let id = match self.find_folder(parent, segment).await? {
                Some(id) => id,
                None => match self.create_folder(segment, parent, &AccessRule::Inherit).await {
                    Ok(id) => id,
                    // Another writer created it first.
                    Err(DepotError::Validation(_)) => self
                        .find_folder(parent, segment)
                        .await?
                        .ok_or_else(|| DepotError::NotFound(format!("folder {segment}")))?,
                    Err(e) => return Err(e),
                },
            };
            parent = Some(id);
        }
        parent.ok_or_else(|| DepotError::Validation(format!("empty folder path: {path:?}")))
    }

    /// Change a folder's access rule.
    pub async fn set_access_rule(&self, id: ContainerId, access_rule: &AccessRule) -> Result<()> {
        let result =
            sqlx::query("UPDATE folders SET access_rule = ?, access_members = ? WHERE id = ?")
                .bind(access_rule.as_str())
                .bind(access_rule.members())
                .bind(id.0)
                .execute(&self.pool)
                .await?;
        if result.rows_affected() == 0 {
            return Err(DepotError::NotFound(format!("container {id}")));
        }
        Ok(())
    }

    /// Get an asset by identity.
    pub async fn get_asset(&self, id: RecordId) -> Result<Option<AssetRecord>> {
        let row = sqlx::query_as::<_, AssetRow>(&format!(
            "SELECT {ASSET_COLUMNS} FROM assets WHERE id = ?"
        ))
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await?;
        row.map(AssetRecord::try_from).transpose()
    }

    /// Find an asset by name within a folder.
    pub async fn find_asset(&self, folder: ContainerId, name: &str) -> Result<Option<AssetRecord>> {
        let row = sqlx::query_as::<_, AssetRow>(&format!(
            "SELECT {ASSET_COLUMNS} FROM assets WHERE folder_id = ? AND name = ?"
        ))
        .bind(folder.0)
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;
        row.map(AssetRecord::try_from).transpose()
    }

    /// List assets in a folder, oldest first.
    pub async fn list_assets(&self, folder: ContainerId) -> Result<Vec<AssetRecord>> {
        let rows = sqlx::query_as::<_, AssetRow>(&format!(
            "SELECT {ASSET_COLUMNS} FROM assets WHERE folder_id = ? ORDER BY id"
        ))
        .bind(folder.0)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(AssetRecord::try_from).collect()
    }

    async fn insert_asset(&self, upsert: &AssetUpsert) -> Result<RecordId> {
        let now = Utc::now();
        let result = sqlx::query(
            "INSERT INTO assets (folder_id, name, visibility, location, stored_visibility,
                                 hash, size, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(upsert.container.0)
        .bind(&upsert.name)
        .bind(upsert.visibility.as_str())
        .bind(&upsert.location.path)
        .bind(upsert.location.visibility.as_str())
        .bind(&upsert.location.hash)
        .bind(upsert.location.size as i64)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| conflict_or(e, upsert.container, &upsert.name))?;

        Ok(RecordId(result.last_insert_rowid()))
    }

    async fn update_asset(&self, id: RecordId, upsert: &AssetUpsert) -> Result<()> {
        let result = sqlx::query(
            "UPDATE assets
             SET folder_id = ?, name = ?, visibility = ?, location = ?, stored_visibility = ?,
                 hash = ?, size = ?, updated_at = ?
             WHERE id = ?",
        )
        .bind(upsert.container.0)
        .bind(&upsert.name)
        .bind(upsert.visibility.as_str())
        .bind(&upsert.location.path)
        .bind(upsert.location.visibility.as_str())
        .bind(&upsert.location.hash)
        .bind(upsert.location.size as i64)
        .bind(Utc::now())
        .bind(id.0)
        .execute(&self.pool)
        .await
        .map_err(|e| conflict_or(e, upsert.container, &upsert.name))?;

        if result.rows_affected() == 0 {
            return Err(DepotError::NotFound(format!("asset {id}")));
        }
        Ok(())
    }
}

#[async_trait]
impl RecordStore for SqliteCatalog {
    async fn name_exists(&self, container: ContainerId, name: &str) -> Result<bool> {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM assets WHERE folder_id = ? AND name = ?)")
                .bind(container.0)
                .bind(name)
                .fetch_one(&self.pool)
                .await?;
        Ok(exists)
    }

    async fn upsert(&self, upsert: &AssetUpsert) -> Result<AssetRecord> {
        let id = match upsert.id {
            Some(id) => {
                self.update_asset(id, upsert).await?;
                id
            }
            None => self.insert_asset(upsert).await?,
        };
        self.get_asset(id)
            .await?
            .ok_or_else(|| DepotError::NotFound(format!("asset {id}")))
    }

    async fn get(&self, id: RecordId) -> Result<Option<AssetRecord>> {
        self.get_asset(id).await
    }

    async fn find(&self, container: ContainerId, name: &str) -> Result<Option<AssetRecord>> {
        self.find_asset(container, name).await
    }
}

#[async_trait]
impl ContainerTree for SqliteCatalog {
    async fn container(&self, id: ContainerId) -> Result<Option<Container>> {
        let row = sqlx::query_as::<_, FolderRow>(
            "SELECT id, name, parent_id, access_rule, access_members FROM folders WHERE id = ?",
        )
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Container::try_from).transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upload::{Visibility, VisibilityMode};

    async fn setup() -> (Database, SqliteCatalog) {
        let db = Database::open_in_memory().await.unwrap();
        let catalog = SqliteCatalog::from_database(&db);
        (db, catalog)
    }

    fn asset(container: ContainerId, name: &str, id: Option<RecordId>) -> AssetUpsert {
        AssetUpsert {
            id,
            container,
            name: name.to_string(),
            visibility: VisibilityMode::Inherit,
            location: ContentLocation {
                path: format!("Uploads/{name}"),
                hash: "abc123".to_string(),
                size: 42,
                visibility: Visibility::Public,
            },
        }
    }

    #[tokio::test]
    async fn test_create_and_get_folder() {
        let (_db, catalog) = setup().await;
        let root = catalog
            .create_folder("Private", None, &AccessRule::LoggedInUsers)
            .await
            .unwrap();
        let child = catalog
            .create_folder("Reports", Some(root), &AccessRule::Inherit)
            .await
            .unwrap();

        let container = catalog.require(child).await.unwrap();
        assert_eq!(container.name, "Reports");
        assert_eq!(container.parent, Some(root));
        assert_eq!(container.access_rule, AccessRule::Inherit);
        assert_eq!(
            catalog.effective_access_rule(root).await.unwrap(),
            AccessRule::LoggedInUsers
        );
        assert!(catalog.container(ContainerId(999)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_create_folder_rejects_bad_names() {
        let (_db, catalog) = setup().await;
        for name in ["", "..", "a/b"] {
            let result = catalog.create_folder(name, None, &AccessRule::Inherit).await;
            assert!(matches!(result, Err(DepotError::Validation(_))), "{name:?}");
        }
    }

    #[tokio::test]
    async fn test_duplicate_root_folder_rejected() {
        let (_db, catalog) = setup().await;
        catalog
            .create_folder("Uploads", None, &AccessRule::Inherit)
            .await
            .unwrap();
        let result = catalog
            .create_folder("Uploads", None, &AccessRule::Inherit)
            .await;
        assert!(matches!(result, Err(DepotError::Validation(_))));
    }

    #[tokio::test]
    async fn test_only_these_members_round_trip() {
        let (_db, catalog) = setup().await;
        let rule = AccessRule::OnlyTheseUsers(vec!["alice".into(), "editors".into()]);
        let id = catalog.create_folder("Secret", None, &rule).await.unwrap();
        assert_eq!(catalog.require(id).await.unwrap().access_rule, rule);

        catalog.set_access_rule(id, &AccessRule::Anyone).await.unwrap();
        assert_eq!(
            catalog.require(id).await.unwrap().access_rule,
            AccessRule::Anyone
        );
        assert!(catalog
            .set_access_rule(ContainerId(999), &AccessRule::Anyone)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_find_or_make_folder() {
        let (_db, catalog) = setup().await;
        let leaf = catalog.find_or_make_folder("Uploads/2024/May").await.unwrap();
        let again = catalog.find_or_make_folder("/Uploads/2024/May/").await.unwrap();
        assert_eq!(leaf, again);

        let year = catalog.find_or_make_folder("Uploads/2024").await.unwrap();
        assert_eq!(catalog.parent_of(leaf).await.unwrap(), Some(year));

        assert!(catalog.find_or_make_folder("  / ").await.is_err());
    }

    #[tokio::test]
    async fn test_insert_assigns_increasing_ids() {
        let (_db, catalog) = setup().await;
        let folder = catalog.find_or_make_folder("Uploads").await.unwrap();

        let a = catalog.upsert(&asset(folder, "a.txt", None)).await.unwrap();
        let b = catalog.upsert(&asset(folder, "b.txt", None)).await.unwrap();
        assert!(b.id > a.id);
        assert_eq!(a.location.size, 42);
        assert_eq!(a.visibility, VisibilityMode::Inherit);

        assert!(catalog.name_exists(folder, "a.txt").await.unwrap());
        assert!(!catalog.name_exists(folder, "c.txt").await.unwrap());

        let names: Vec<_> = catalog
            .list_assets(folder)
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.name)
            .collect();
        assert_eq!(names, vec!["a.txt", "b.txt"]);
    }

    #[tokio::test]
    async fn test_duplicate_name_is_conflict() {
        let (_db, catalog) = setup().await;
        let folder = catalog.find_or_make_folder("Uploads").await.unwrap();
        catalog.upsert(&asset(folder, "a.txt", None)).await.unwrap();

        let err = catalog
            .upsert(&asset(folder, "a.txt", None))
            .await
            .unwrap_err();
        assert!(matches!(err, DepotError::RecordConflict { ref name, .. } if name == "a.txt"));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_update_preserves_identity() {
        let (_db, catalog) = setup().await;
        let folder = catalog.find_or_make_folder("Uploads").await.unwrap();
        let created = catalog.upsert(&asset(folder, "a.txt", None)).await.unwrap();

        let mut update = asset(folder, "a.txt", Some(created.id));
        update.location.hash = "def456".to_string();
        update.visibility = VisibilityMode::Forced(Visibility::Protected);
        let updated = catalog.upsert(&update).await.unwrap();

        assert_eq!(updated.id, created.id);
        assert_eq!(updated.created_at, created.created_at);
        assert_eq!(updated.location.hash, "def456");
        assert_eq!(
            updated.visibility,
            VisibilityMode::Forced(Visibility::Protected)
        );
        assert_eq!(catalog.list_assets(folder).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_update_missing_asset() {
        let (_db, catalog) = setup().await;
        let folder = catalog.find_or_make_folder("Uploads").await.unwrap();
        let result = catalog
            .upsert(&asset(folder, "a.txt", Some(RecordId(77))))
            .await;
        assert!(matches!(result, Err(DepotError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_find_asset() {
        let (_db, catalog) = setup().await;
        let folder = catalog.find_or_make_folder("Uploads").await.unwrap();
        let created = catalog.upsert(&asset(folder, "a.txt", None)).await.unwrap();

        let found = catalog.find_asset(folder, "a.txt").await.unwrap().unwrap();
        assert_eq!(found.id, created.id);
        assert!(catalog.find_asset(folder, "b.txt").await.unwrap().is_none());
        assert_eq!(
            catalog.find(folder, "a.txt").await.unwrap().map(|r| r.id),
            Some(created.id)
        );
        assert_eq!(catalog.get(created.id).await.unwrap(), Some(created));
    }
}
