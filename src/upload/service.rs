//! Ingestion orchestration.
//!
//! An ingest moves through these states:
//!
//! ```text
//! Received -> Validated -> NameResolved -> VisibilityResolved -> Committed
//!     \                \___________________/ (replace mode)
//!      -> Rejected
//! ```
//!
//! Validation failures end in `Rejected` and are reported in the outcome.
//! Only collaborator faults (store errors, I/O) are returned as errors.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use serde::Serialize;
use tokio::fs;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, info, warn};

use super::descriptor::FileDescriptor;
use super::naming::{filter_name, NameResolver};
use super::store::{
    AssetRecord, AssetUpsert, ContainerId, ContainerTree, ContentLocation, ContentStore, RecordId,
    RecordStore, Visibility, VisibilityMode, WriteMode,
};
use super::validator::{ValidationResult, Validator};
use super::visibility::{container_path, resolve_visibility};
use crate::config::Config;
use crate::{DepotError, Result};

/// Where an ingest is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestState {
    /// The descriptor has been accepted for processing.
    Received,
    /// All validation rules passed.
    Validated,
    /// A free logical name was chosen.
    NameResolved,
    /// The effective visibility is known.
    VisibilityResolved,
    /// Content and record are stored.
    Committed,
    /// Validation failed; nothing was stored.
    Rejected,
}

/// One ingestion request.
#[derive(Debug, Clone)]
pub struct IngestRequest {
    /// The received file.
    pub descriptor: FileDescriptor,
    /// Target container (falls back to the ingestor default).
    pub container: Option<ContainerId>,
    /// Existing record to replace.
    pub target: Option<RecordId>,
    /// Visibility setting for the record.
    pub visibility: Option<VisibilityMode>,
    /// Replace-mode override (falls back to the ingestor default).
    pub replace: Option<bool>,
}

impl IngestRequest {
    /// Create a request for a descriptor.
    pub fn new(descriptor: FileDescriptor) -> Self {
        Self {
            descriptor,
            container: None,
            target: None,
            visibility: None,
            replace: None,
        }
    }

    /// Set the target container.
    pub fn into_folder(mut self, container: ContainerId) -> Self {
        self.container = Some(container);
        self
    }

    /// Replace an existing record. Only honoured in replace mode.
    pub fn replacing(mut self, record: RecordId) -> Self {
        self.target = Some(record);
        self
    }

    /// Set the record's visibility setting.
    pub fn with_visibility(mut self, visibility: VisibilityMode) -> Self {
        self.visibility = Some(visibility);
        self
    }

    /// Enable or disable replace mode for this request.
    pub fn with_replace(mut self, replace: bool) -> Self {
        self.replace = Some(replace);
        self
    }
}

/// What happened to an ingest.
#[derive(Debug, Clone, Serialize)]
pub struct IngestOutcome {
    /// Final state.
    pub state: IngestState,
    /// States passed through, in order.
    pub trail: Vec<IngestState>,
    /// The committed record.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record: Option<AssetRecord>,
    /// Validation errors (empty unless rejected).
    pub validation: ValidationResult,
}

impl IngestOutcome {
    /// Whether the ingest committed.
    pub fn is_committed(&self) -> bool {
        self.state == IngestState::Committed
    }
}

/// Tracks state transitions for one ingest.
struct Progress<'a> {
    name: &'a str,
    trail: Vec<IngestState>,
}

impl<'a> Progress<'a> {
    fn new(name: &'a str) -> Self {
        debug!(name = %name, "Ingest received");
        Self {
            name,
            trail: vec![IngestState::Received],
        }
    }

    fn advance(&mut self, state: IngestState) {
        debug!(name = %self.name, state = ?state, "Ingest advanced");
        self.trail.push(state);
    }

    fn finish(mut self, record: AssetRecord) -> IngestOutcome {
        self.advance(IngestState::Committed);
        IngestOutcome {
            state: IngestState::Committed,
            trail: self.trail,
            record: Some(record),
            validation: ValidationResult::new(),
        }
    }

    fn reject(mut self, validation: ValidationResult) -> IngestOutcome {
        self.advance(IngestState::Rejected);
        IngestOutcome {
            state: IngestState::Rejected,
            trail: self.trail,
            record: None,
            validation,
        }
    }
}

/// Where an accepted upload goes.
enum Target {
    New(ContainerId),
    Replace(RecordId),
}

/// Per-record locks held while a record's content is replaced.
#[derive(Default)]
struct RecordLocks {
    locks: Mutex<HashMap<RecordId, Arc<AsyncMutex<()>>>>,
}

impl RecordLocks {
    async fn acquire(&self, id: RecordId) -> RecordGuard<'_> {
        let lock = {
            let mut locks = self.locks.lock().expect("lock poisoned");
            Arc::clone(locks.entry(id).or_default())
        };
        let guard = Arc::clone(&lock).lock_owned().await;
        RecordGuard {
            locks: self,
            id,
            lock,
            guard: Some(guard),
        }
    }
}

struct RecordGuard<'a> {
    locks: &'a RecordLocks,
    id: RecordId,
    lock: Arc<AsyncMutex<()>>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for RecordGuard<'_> {
    fn drop(&mut self) {
        self.guard.take();
        let mut locks = self.locks.locks.lock().expect("lock poisoned");
        // Only the map and this guard still hold the lock: nobody is waiting.
        if Arc::strong_count(&self.lock) == 2 {
            locks.remove(&self.id);
        }
    }
}

/// Composes validation, naming and visibility with the stores.
///
/// An `Ingestor` can be shared across tasks. Replaces of the same record
/// run one at a time.
pub struct Ingestor {
    validator: Validator,
    names: NameResolver,
    filter_names: bool,
    replace_file: bool,
    default_container: Option<ContainerId>,
    replacing: RecordLocks,
    records: Arc<dyn RecordStore>,
    content: Arc<dyn ContentStore>,
    tree: Arc<dyn ContainerTree>,
}

impl Ingestor {
    /// Create an ingestor with an unrestricted validator and default naming.
    pub fn new(
        records: Arc<dyn RecordStore>,
        content: Arc<dyn ContentStore>,
        tree: Arc<dyn ContainerTree>,
    ) -> Self {
        Self {
            validator: Validator::new(),
            names: NameResolver::default(),
            filter_names: true,
            replace_file: false,
            default_container: None,
            replacing: RecordLocks::default(),
            records,
            content,
            tree,
        }
    }

    /// Create an ingestor from configuration.
    pub fn from_config(
        config: &Config,
        records: Arc<dyn RecordStore>,
        content: Arc<dyn ContentStore>,
        tree: Arc<dyn ContainerTree>,
    ) -> Result<Self> {
        Ok(Self::new(records, content, tree)
            .with_validator(Validator::from_config(&config.upload)?)
            .with_name_resolver(
                NameResolver::new(config.naming.version_marker.clone())
                    .with_max_attempts(config.naming.max_attempts),
            )
            .with_filter_names(config.naming.filter_names)
            .with_replace_file(config.upload.replace_file))
    }

    /// Use a custom validator.
    pub fn with_validator(mut self, validator: Validator) -> Self {
        self.validator = validator;
        self
    }

    /// Use a custom name resolver.
    pub fn with_name_resolver(mut self, names: NameResolver) -> Self {
        self.names = names;
        self
    }

    /// Clean declared names before resolving them.
    pub fn with_filter_names(mut self, enabled: bool) -> Self {
        self.filter_names = enabled;
        self
    }

    /// Default replace mode for requests that don't set it.
    pub fn with_replace_file(mut self, enabled: bool) -> Self {
        self.replace_file = enabled;
        self
    }

    /// Container used when a request names none.
    pub fn with_default_container(mut self, container: ContainerId) -> Self {
        self.default_container = Some(container);
        self
    }

    /// The validator in use.
    pub fn validator(&self) -> &Validator {
        &self.validator
    }

    /// Mutable access to the validator, e.g. to change per-instance policies.
    pub fn validator_mut(&mut self) -> &mut Validator {
        &mut self.validator
    }

    /// Run one ingest.
    ///
    /// Returns a rejected outcome for validation failures. A
    /// [`DepotError::RecordConflict`] or [`DepotError::ContentExists`] means
    /// another writer won a race and the request may be retried.
    ///
    /// In replace mode the target record is replaced; without a target, the
    /// record already holding the (filtered) name in the container is.
    pub async fn ingest(&self, request: IngestRequest) -> Result<IngestOutcome> {
        let descriptor = &request.descriptor;
        let mut progress = Progress::new(&descriptor.declared_name);

        let validation = self.validator.validate(descriptor);
        if !validation.is_valid() {
            info!(
                name = %descriptor.declared_name,
                errors = ?validation.messages(),
                "Upload rejected"
            );
            return Ok(progress.reject(validation));
        }
        progress.advance(IngestState::Validated);

        let replace = request.replace.unwrap_or(self.replace_file);
        let requested = if self.filter_names {
            filter_name(&descriptor.declared_name)
        } else {
            descriptor.declared_name.clone()
        };

        let target = match request.target {
            Some(id) if replace => Target::Replace(id),
            _ => {
                let container = request
                    .container
                    .or(self.default_container)
                    .ok_or_else(|| DepotError::Validation("no target container".to_string()))?;
                let existing = if replace {
                    self.records.find(container, &requested).await?
                } else {
                    None
                };
                match existing {
                    Some(record) => Target::Replace(record.id),
                    None => Target::New(container),
                }
            }
        };

        let bytes = fs::read(&descriptor.source_path).await?;

        let record = match target {
            Target::Replace(id) => {
                self.commit_replace(&mut progress, id, request.visibility, &bytes)
                    .await?
            }
            Target::New(container) => {
                let mode = request.visibility.unwrap_or_default();
                self.commit_new(&mut progress, container, &requested, mode, &bytes)
                    .await?
            }
        };

        info!(
            id = %record.id,
            container = %record.container,
            name = %record.name,
            size = record.location.size,
            "Upload committed"
        );
        Ok(progress.finish(record))
    }

    async fn commit_new(
        &self,
        progress: &mut Progress<'_>,
        container: ContainerId,
        requested: &str,
        mode: VisibilityMode,
        bytes: &[u8],
    ) -> Result<AssetRecord> {
        let mut name = self
            .names
            .resolve(self.records.as_ref(), container, requested)
            .await?;
        progress.advance(IngestState::NameResolved);

        let visibility = self.visibility_for(progress, mode, container).await?;
        let path = container_path(self.tree.as_ref(), container).await?;

        // A file already on disk under a free name also counts as taken.
        let mut skip = HashSet::new();
        let location = loop {
            match self
                .content
                .write(&path, &name, visibility, bytes, WriteMode::CreateNew)
                .await
            {
                Ok(location) => break location,
                Err(DepotError::ContentExists(at)) => {
                    warn!(path = %at, "Content exists without a record, choosing another name");
                    skip.insert(name);
                    name = self
                        .names
                        .resolve_skipping(self.records.as_ref(), container, requested, &skip)
                        .await?;
                }
                Err(e) => return Err(e),
            }
        };

        let upsert = AssetUpsert {
            id: None,
            container,
            name,
            visibility: mode,
            location,
        };
        match self.records.upsert(&upsert).await {
            Ok(record) => Ok(record),
            Err(e) => {
                self.discard(&upsert.location).await;
                Err(e)
            }
        }
    }

    async fn commit_replace(
        &self,
        progress: &mut Progress<'_>,
        id: RecordId,
        visibility: Option<VisibilityMode>,
        bytes: &[u8],
    ) -> Result<AssetRecord> {
        // Content, metadata and variants of one record change together.
        let _guard = self.replacing.acquire(id).await;

        let existing = self
            .records
            .get(id)
            .await?
            .ok_or_else(|| DepotError::NotFound(format!("asset {id}")))?;
        debug!(id = %existing.id, name = %existing.name, "Replacing existing record");

        let mode = visibility.unwrap_or(existing.visibility);
        let visibility = self
            .visibility_for(progress, mode, existing.container)
            .await?;
        let path = container_path(self.tree.as_ref(), existing.container).await?;

        self.content
            .invalidate_derived(existing.id, &existing.location)
            .await?;
        let location = self
            .content
            .write(&path, &existing.name, visibility, bytes, WriteMode::Overwrite)
            .await?;

        let upsert = AssetUpsert {
            id: Some(existing.id),
            container: existing.container,
            name: existing.name.clone(),
            visibility: mode,
            location,
        };
        let record = match self.records.upsert(&upsert).await {
            Ok(record) => record,
            Err(e) => {
                if upsert.location.path != existing.location.path {
                    self.discard(&upsert.location).await;
                }
                return Err(e);
            }
        };

        if record.location.path != existing.location.path {
            self.discard(&existing.location).await;
        }
        Ok(record)
    }

    /// Remove content no record points at. Failures are only logged.
    async fn discard(&self, location: &ContentLocation) {
        if let Err(e) = self.content.remove(location).await {
            warn!(path = %location.path, error = %e, "Failed to remove orphaned content");
        }
    }

    async fn visibility_for(
        &self,
        progress: &mut Progress<'_>,
        mode: VisibilityMode,
        container: ContainerId,
    ) -> Result<Visibility> {
        let visibility = resolve_visibility(self.tree.as_ref(), mode, container).await?;
        progress.advance(IngestState::VisibilityResolved);
        Ok(visibility)
    }
}
