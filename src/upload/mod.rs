//! File ingestion for Depot.
//!
//! This module turns received files into stored assets:
//! - Validation against transport status, size and extension policies
//! - Collision-free logical naming within a container
//! - Visibility resolution over the container hierarchy
//! - Orchestration of content writes and metadata upserts

mod catalog;
mod category;
mod descriptor;
mod memory;
mod naming;
mod service;
mod size;
mod storage;
mod store;
mod validator;
mod visibility;

pub use catalog::SqliteCatalog;
pub use category::{category_selector, CategoryClassifier, MimeCategories};
pub use descriptor::{
    join_extension, split_extension, FileDescriptor, TransportStatus, COMPOUND_EXTENSIONS,
};
pub use memory::MemoryCatalog;
pub use naming::{
    filter_name, NameCandidates, NameResolver, DEFAULT_MAX_ATTEMPTS, DEFAULT_VERSION_MARKER,
};
pub use service::{IngestOutcome, IngestRequest, IngestState, Ingestor};
pub use size::{format_size, parse_size, SelectorTier, SizePolicy, WILDCARD};
pub use storage::{content_hash, LocalContentStore, PROTECTED_DIR, VARIANT_SEPARATOR};
pub use store::{
    AccessRule, AssetRecord, AssetUpsert, Container, ContainerId, ContainerTree, ContentLocation,
    ContentStore, RecordId, RecordStore, Visibility, VisibilityMode, WriteMode,
};
pub use validator::{
    ExtensionPolicy, UploadError, UploadErrorKind, ValidationResult, Validator,
};
pub use visibility::{container_path, container_visibility, resolve_visibility};
