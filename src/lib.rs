//! Depot - file ingestion pipeline
//!
//! Validates received files against size and extension policies, picks a
//! collision-free name within the target folder, resolves whether the file is
//! public or protected from the folder hierarchy, and commits the content and
//! its metadata record.

pub mod config;
pub mod db;
pub mod error;
pub mod logging;
pub mod upload;

pub use config::Config;
pub use db::Database;
pub use error::{DepotError, Result};
pub use upload::{
    FileDescriptor, IngestOutcome, IngestRequest, IngestState, Ingestor, LocalContentStore,
    MemoryCatalog, SqliteCatalog, ValidationResult, Validator,
};
