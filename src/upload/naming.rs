//! Logical name cleaning and collision-free name resolution.
//!
//! When a name is taken, candidates are generated by bumping a version
//! counter placed just before the extension:
//!
//! ```text
//! marker "-v":  report.tar.gz -> report-v2.tar.gz -> report-v3.tar.gz
//! marker "":    IMG001.jpg    -> IMG002.jpg       -> IMG003.jpg
//! ```

use std::collections::HashSet;

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, warn};

use super::descriptor::{join_extension, split_extension};
use super::store::{ContainerId, RecordStore};
use crate::{DepotError, Result};

/// Default version marker.
pub const DEFAULT_VERSION_MARKER: &str = "-v";

/// Default number of candidates tried before giving up.
pub const DEFAULT_MAX_ATTEMPTS: usize = 10_000;

/// Name used when cleaning leaves nothing behind.
pub const DEFAULT_BASE_NAME: &str = "file";

static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s").expect("valid regex"));
static DISALLOWED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^-_A-Za-z0-9+.]+").expect("valid regex"));
static UNDERSCORES: Lazy<Regex> = Lazy::new(|| Regex::new(r"_{2,}").expect("valid regex"));
static DASHES: Lazy<Regex> = Lazy::new(|| Regex::new(r"-{2,}").expect("valid regex"));
static LEADING: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[-_.]+").expect("valid regex"));

/// Clean a client-supplied file name into a safe logical name.
///
/// Whitespace becomes `-`, anything outside `[-_A-Za-z0-9+.]` is dropped,
/// repeated `_`/`-` collapse (`__` separates derived variants) and leading
/// `-_.` are stripped.
///
/// ```
/// use depot::upload::filter_name;
///
/// assert_eq!(filter_name("My Holiday  Photo.JPG"), "My-Holiday-Photo.JPG");
/// assert_eq!(filter_name("__init__.py"), "init_.py");
/// assert_eq!(filter_name("???.txt"), "file.txt");
/// ```
pub fn filter_name(name: &str) -> String {
    let (base, extension) = split_extension(name);

    let cleaned = WHITESPACE.replace_all(base, "-");
    let cleaned = DISALLOWED.replace_all(&cleaned, "");
    let cleaned = UNDERSCORES.replace_all(&cleaned, "_");
    let cleaned = DASHES.replace_all(&cleaned, "-");
    let cleaned = LEADING.replace_all(&cleaned, "");

    let extension = DISALLOWED.replace_all(extension, "");
    if cleaned.is_empty() {
        return join_extension(DEFAULT_BASE_NAME, &extension);
    }
    join_extension(&cleaned, &extension)
}

/// A base name split into its unversioned stem and version counter.
#[derive(Debug, Clone, PartialEq, Eq)]
struct VersionedBase {
    stem: String,
    first: u64,
    padding: usize,
}

impl VersionedBase {
    /// Parse `{stem}{marker}{digits}`. Without a match the counter starts at 1.
    fn parse(base: &str, marker: &str) -> Self {
        let digits_start = base
            .char_indices()
            .rev()
            .take_while(|(_, c)| c.is_ascii_digit())
            .last()
            .map(|(i, _)| i);

        if let Some(start) = digits_start {
            let head = &base[..start];
            let digits = &base[start..];
            if let (Some(stem), Ok(first)) = (head.strip_suffix(marker), digits.parse::<u64>()) {
                if !stem.is_empty() {
                    let padding = if digits.starts_with('0') { digits.len() } else { 0 };
                    return Self {
                        stem: stem.to_string(),
                        first,
                        padding,
                    };
                }
            }
        }

        Self {
            stem: base.to_string(),
            first: 1,
            padding: 0,
        }
    }
}

/// Lazy, restartable sequence of candidate names.
///
/// The first candidate is always the requested name unchanged.
#[derive(Debug, Clone)]
pub struct NameCandidates {
    original: String,
    extension: String,
    marker: String,
    base: VersionedBase,
    version: u64,
}

impl NameCandidates {
    /// Start a sequence for `name` using `marker`.
    pub fn new(name: &str, marker: &str) -> Self {
        let (base, extension) = split_extension(name);
        let base = VersionedBase::parse(base, marker);
        let version = base.first;
        Self {
            original: name.to_string(),
            extension: extension.to_string(),
            marker: marker.to_string(),
            base,
            version,
        }
    }

    /// Restart from the requested name.
    pub fn rewind(&mut self) {
        self.version = self.base.first;
    }
}

impl Iterator for NameCandidates {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        let version = self.version;
        self.version = self.version.checked_add(1)?;

        if version == self.base.first {
            return Some(self.original.clone());
        }

        let counter = format!("{:0width$}", version, width = self.base.padding);
        let base = format!("{}{}{}", self.base.stem, self.marker, counter);
        Some(join_extension(&base, &self.extension))
    }
}

/// Picks the first free name in a container.
#[derive(Debug, Clone)]
pub struct NameResolver {
    marker: String,
    max_attempts: usize,
}

impl Default for NameResolver {
    fn default() -> Self {
        Self::new(DEFAULT_VERSION_MARKER)
    }
}

impl NameResolver {
    /// Create a resolver with the given version marker.
    pub fn new(marker: impl Into<String>) -> Self {
        Self {
            marker: marker.into(),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    /// Set the attempt limit.
    pub fn with_max_attempts(mut self, max_attempts: usize) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// The version marker.
    pub fn marker(&self) -> &str {
        &self.marker
    }

    /// Candidate names for `name`.
    pub fn candidates(&self, name: &str) -> NameCandidates {
        NameCandidates::new(name, &self.marker)
    }

    /// First candidate for which `taken` returns false.
    pub fn first_free<F>(&self, name: &str, mut taken: F) -> Result<String>
    where
        F: FnMut(&str) -> Result<bool>,
    {
        for candidate in self.candidates(name).take(self.max_attempts) {
            if !taken(&candidate)? {
                return Ok(candidate);
            }
        }
        Err(self.exhausted(name))
    }

    /// First candidate not already present in `container`.
    ///
    /// The store is queried for every candidate. The result is only a hint:
    /// another writer may claim it before commit, in which case the store's
    /// uniqueness guard reports a conflict.
    pub async fn resolve(
        &self,
        records: &dyn RecordStore,
        container: ContainerId,
        name: &str,
    ) -> Result<String> {
        self.resolve_skipping(records, container, name, &HashSet::new())
            .await
    }

    /// Like [`resolve`](Self::resolve), also treating every name in `skip` as taken.
    pub async fn resolve_skipping(
        &self,
        records: &dyn RecordStore,
        container: ContainerId,
        name: &str,
        skip: &HashSet<String>,
    ) -> Result<String> {
        for (attempt, candidate) in self.candidates(name).take(self.max_attempts).enumerate() {
            if skip.contains(&candidate) {
                continue;
            }
            if !records.name_exists(container, &candidate).await? {
                if attempt > 0 {
                    debug!(
                        requested = %name,
                        resolved = %candidate,
                        attempts = attempt + 1,
                        "Resolved name collision"
                    );
                }
                return Ok(candidate);
            }
        }
        Err(self.exhausted(name))
    }

    fn exhausted(&self, name: &str) -> DepotError {
        warn!(name = %name, attempts = self.max_attempts, "Name resolution exhausted");
        DepotError::NameResolutionExhausted {
            name: name.to_string(),
            attempts: self.max_attempts,
        }
    }
}
