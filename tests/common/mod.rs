//! Test helpers for integration tests.
//!
//! Provides a [`TestDepot`] wiring a SQLite catalog and a local content
//! store in a temporary directory.

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;

use tempfile::TempDir;

use depot::upload::{
    AccessRule, ContainerId, FileDescriptor, Ingestor, LocalContentStore, SqliteCatalog, Validator,
};
use depot::{Config, Database};

/// A depot backed by files in a temporary directory.
pub struct TestDepot {
    pub temp_dir: TempDir,
    pub db: Database,
    pub catalog: Arc<SqliteCatalog>,
    pub store: Arc<LocalContentStore>,
    pub uploads: ContainerId,
    incoming: PathBuf,
}

impl TestDepot {
    /// Create a depot with an on-disk database and an `Uploads` folder.
    pub async fn new() -> Self {
        let temp_dir = TempDir::new().unwrap();
        let db = Database::open(temp_dir.path().join("depot.db"))
            .await
            .unwrap();
        Self::with_database(temp_dir, db).await
    }

    /// Create a depot with an in-memory database.
    pub async fn in_memory() -> Self {
        let temp_dir = TempDir::new().unwrap();
        let db = Database::open_in_memory().await.unwrap();
        Self::with_database(temp_dir, db).await
    }

    async fn with_database(temp_dir: TempDir, db: Database) -> Self {
        let catalog = Arc::new(SqliteCatalog::from_database(&db));
        let store = Arc::new(LocalContentStore::new(temp_dir.path().join("assets")).unwrap());
        let incoming = temp_dir.path().join("incoming");
        std::fs::create_dir_all(&incoming).unwrap();
        let uploads = catalog.find_or_make_folder("Uploads").await.unwrap();
        Self {
            temp_dir,
            db,
            catalog,
            store,
            uploads,
            incoming,
        }
    }

    /// An ingestor with the native upload check disabled.
    pub fn ingestor(&self) -> Ingestor {
        Ingestor::new(
            self.catalog.clone(),
            self.store.clone(),
            self.catalog.clone(),
        )
        .with_validator(Validator::new().with_native_upload_check(false))
        .with_default_container(self.uploads)
    }

    /// An ingestor built from configuration.
    pub fn ingestor_from_config(&self, config: &Config) -> Ingestor {
        Ingestor::from_config(
            config,
            self.catalog.clone(),
            self.store.clone(),
            self.catalog.clone(),
        )
        .unwrap()
        .with_default_container(self.uploads)
    }

    /// Create a folder.
    pub async fn folder(
        &self,
        name: &str,
        parent: Option<ContainerId>,
        rule: AccessRule,
    ) -> ContainerId {
        self.catalog.create_folder(name, parent, &rule).await.unwrap()
    }

    /// Write `content` to a fresh source file and describe it as `name`.
    pub fn file(&self, name: &str, content: &[u8]) -> FileDescriptor {
        let path = self.incoming.join(uuid::Uuid::new_v4().to_string());
        std::fs::write(&path, content).unwrap();
        FileDescriptor::new(name, content.len() as u64, path)
    }
}
