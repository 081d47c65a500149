//! Upload validation.
//!
//! Checks run in a fixed order:
//! 1. transport status (fatal: nothing else runs)
//! 2. native upload flag, when enabled (fatal)
//! 3. zero size
//! 4. size limit, resolved through the [`SizePolicy`] tiers
//! 5. extension allow-list
//!
//! Checks 3-5 accumulate; every applicable error is reported.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

use super::category::{CategoryClassifier, MimeCategories};
use super::descriptor::{FileDescriptor, TransportStatus};
use super::size::{format_size, SizePolicy};
use crate::config::UploadConfig;
use crate::Result;

/// What went wrong with an upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum UploadErrorKind {
    /// The transport reported a failure.
    Transport {
        /// The reported status.
        status: TransportStatus,
    },
    /// The transport could not vouch for the file.
    NotUploaded,
    /// The file is empty.
    ZeroSize,
    /// The file is larger than allowed.
    SizeExceeded {
        /// The limit that applied, if one is known.
        limit: Option<u64>,
    },
    /// The extension is not on the allow-list.
    ExtensionNotAllowed,
}

/// A single validation error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UploadError {
    /// Structured kind.
    #[serde(flatten)]
    pub kind: UploadErrorKind,
    /// Human-readable message.
    pub message: String,
}

impl fmt::Display for UploadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// Ordered errors collected during one validation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationResult {
    errors: Vec<UploadError>,
}

impl ValidationResult {
    /// Create an empty (valid) result.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an error.
    pub fn push(&mut self, kind: UploadErrorKind, message: impl Into<String>) {
        self.errors.push(UploadError {
            kind,
            message: message.into(),
        });
    }

    /// Whether no errors were recorded.
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// The recorded errors, in check order.
    pub fn errors(&self) -> &[UploadError] {
        &self.errors
    }

    /// The recorded messages, in check order.
    pub fn messages(&self) -> Vec<&str> {
        self.errors.iter().map(|e| e.message.as_str()).collect()
    }

    /// Whether any error has the given kind.
    pub fn has(&self, kind: &UploadErrorKind) -> bool {
        self.errors.iter().any(|e| &e.kind == kind)
    }

    /// Forget all errors.
    pub fn clear(&mut self) {
        self.errors.clear();
    }
}

/// Set of permitted extensions.
///
/// An empty set places no restriction. The empty-string member permits
/// files without an extension.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtensionPolicy {
    allowed: BTreeSet<String>,
}

impl ExtensionPolicy {
    /// A policy with no restriction.
    pub fn unrestricted() -> Self {
        Self::default()
    }

    /// A policy allowing exactly the given extensions.
    pub fn allow<I, S>(extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let allowed = extensions
            .into_iter()
            .map(|e| {
                let e = e.as_ref().trim();
                e.strip_prefix('.').unwrap_or(e).to_lowercase()
            })
            .collect();
        Self { allowed }
    }

    /// Whether any restriction is configured.
    pub fn is_restricted(&self) -> bool {
        !self.allowed.is_empty()
    }

    /// Whether a lower-cased extension passes.
    pub fn permits(&self, extension: &str) -> bool {
        !self.is_restricted() || self.allowed.contains(extension)
    }

    /// Allowed extensions, sorted.
    pub fn extensions(&self) -> impl Iterator<Item = &str> {
        self.allowed.iter().map(String::as_str)
    }
}

/// Validates file descriptors against size and extension policies.
#[derive(Clone)]
pub struct Validator {
    allowed_extensions: ExtensionPolicy,
    default_max_sizes: SizePolicy,
    allowed_max_sizes: SizePolicy,
    use_native_upload_check: bool,
    classifier: Arc<dyn CategoryClassifier>,
}

impl fmt::Debug for Validator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Validator")
            .field("allowed_extensions", &self.allowed_extensions)
            .field("default_max_sizes", &self.default_max_sizes)
            .field("allowed_max_sizes", &self.allowed_max_sizes)
            .field("use_native_upload_check", &self.use_native_upload_check)
            .finish()
    }
}

impl Default for Validator {
    fn default() -> Self {
        Self::new()
    }
}

impl Validator {
    /// Create a validator with no limits and the default classifier.
    pub fn new() -> Self {
        Self {
            allowed_extensions: ExtensionPolicy::unrestricted(),
            default_max_sizes: SizePolicy::new(),
            allowed_max_sizes: SizePolicy::new(),
            use_native_upload_check: true,
            classifier: Arc::new(MimeCategories::new()),
        }
    }

    /// Create a validator from the `[upload]` configuration section.
    pub fn from_config(config: &UploadConfig) -> Result<Self> {
        Ok(Self::new()
            .with_default_max_sizes(config.size_policy()?)
            .with_allowed_extensions(ExtensionPolicy::allow(&config.allowed_extensions))
            .with_native_upload_check(config.use_native_upload_check))
    }

    /// Set the deployment-wide size policy.
    pub fn with_default_max_sizes(mut self, policy: SizePolicy) -> Self {
        self.default_max_sizes = policy;
        self
    }

    /// Set the instance size policy. A non-empty policy replaces the
    /// deployment-wide one entirely.
    pub fn with_allowed_max_sizes(mut self, policy: SizePolicy) -> Self {
        self.allowed_max_sizes = policy;
        self
    }

    /// Set the extension allow-list.
    pub fn with_allowed_extensions(mut self, policy: ExtensionPolicy) -> Self {
        self.allowed_extensions = policy;
        self
    }

    /// Enable or disable the native upload flag check.
    pub fn with_native_upload_check(mut self, enabled: bool) -> Self {
        self.use_native_upload_check = enabled;
        self
    }

    /// Use a different category classifier.
    pub fn with_classifier(mut self, classifier: Arc<dyn CategoryClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    /// Replace the instance size policy in place.
    pub fn set_allowed_max_sizes(&mut self, policy: SizePolicy) {
        self.allowed_max_sizes = policy;
    }

    /// Replace the extension allow-list in place.
    pub fn set_allowed_extensions(&mut self, policy: ExtensionPolicy) {
        self.allowed_extensions = policy;
    }

    /// The extension allow-list.
    pub fn allowed_extensions(&self) -> &ExtensionPolicy {
        &self.allowed_extensions
    }

    /// The size policy that applies: the instance one if set, else the default.
    pub fn effective_size_policy(&self) -> &SizePolicy {
        if self.allowed_max_sizes.is_empty() {
            &self.default_max_sizes
        } else {
            &self.allowed_max_sizes
        }
    }

    /// Maximum size for an extension or selector, if any tier sets one.
    pub fn allowed_max_file_size(&self, extension: &str) -> Option<u64> {
        self.effective_size_policy()
            .max_size_for(extension, self.classifier.as_ref())
    }

    /// The largest limit configured in any tier.
    ///
    /// This does not consider which file is being checked, so a transport
    /// size error for a `.txt` file may quote an `[image]` limit.
    pub fn largest_allowed_max_file_size(&self) -> Option<u64> {
        self.effective_size_policy().largest()
    }

    /// Validate a descriptor.
    pub fn validate(&self, descriptor: &FileDescriptor) -> ValidationResult {
        let mut result = ValidationResult::new();

        if !descriptor.transport_status.is_ok() {
            self.push_transport_error(&mut result, descriptor.transport_status);
            debug!(
                name = %descriptor.declared_name,
                status = %descriptor.transport_status,
                "Upload rejected by transport status"
            );
            return result;
        }

        if self.use_native_upload_check && !descriptor.native_upload {
            result.push(UploadErrorKind::NotUploaded, "File is not a valid upload");
            return result;
        }

        if descriptor.declared_size == 0 {
            result.push(UploadErrorKind::ZeroSize, "Filesize is zero bytes.");
        }

        let extension = descriptor.normalized_extension();

        if let Some(limit) = self.allowed_max_file_size(&extension) {
            if descriptor.declared_size > limit {
                result.push(
                    UploadErrorKind::SizeExceeded { limit: Some(limit) },
                    format!(
                        "Filesize is too large, maximum {} allowed",
                        format_size(limit)
                    ),
                );
            }
        }

        if !self.allowed_extensions.permits(&extension) {
            let valid: Vec<&str> = self.allowed_extensions.extensions().collect();
            result.push(
                UploadErrorKind::ExtensionNotAllowed,
                format!(
                    "Extension is not allowed (valid: {})",
                    valid.join(", ")
                ),
            );
        }

        if !result.is_valid() {
            debug!(
                name = %descriptor.declared_name,
                errors = result.errors().len(),
                "Upload failed validation"
            );
        }
        result
    }

    fn push_transport_error(&self, result: &mut ValidationResult, status: TransportStatus) {
        let kind = UploadErrorKind::Transport { status };
        match status {
            TransportStatus::SizeExceeded | TransportStatus::FormSizeExceeded => {
                let message = match self.largest_allowed_max_file_size() {
                    Some(largest) => format!(
                        "Filesize is too large, maximum {} allowed",
                        format_size(largest)
                    ),
                    None => "Filesize is too large".to_string(),
                };
                result.push(kind, message);
            }
            TransportStatus::NoFile | TransportStatus::NoTempDir | TransportStatus::CantWrite => {
                result.push(kind, "File is not a valid upload");
            }
            TransportStatus::PartialUpload => {
                result.push(kind, "File did not finish uploading, please try again");
            }
            TransportStatus::Ok => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text_file(size: u64) -> FileDescriptor {
        FileDescriptor::new("UploadTest-testUpload.txt", size, "/tmp/UploadTest-testUpload.txt")
            .with_mime_hint("text/plain")
    }

    fn validator() -> Validator {
        Validator::new().with_native_upload_check(false)
    }

    #[test]
    fn test_valid_file() {
        let result = validator().validate(&text_file(100));
        assert!(result.is_valid());
        assert!(result.messages().is_empty());
    }

    #[test]
    fn test_zero_size_always_rejected() {
        let v = validator().with_allowed_max_sizes(SizePolicy::wildcard(1));
        let result = v.validate(&text_file(0));
        assert!(!result.is_valid());
        assert!(result.has(&UploadErrorKind::ZeroSize));
        assert_eq!(result.messages(), vec!["Filesize is zero bytes."]);

        let result = Validator::new()
            .with_native_upload_check(false)
            .validate(&text_file(0));
        assert!(result.has(&UploadErrorKind::ZeroSize));
    }

    #[test]
    fn test_extension_limit_boundary_inclusive() {
        let v = validator().with_allowed_max_sizes(SizePolicy::new().with_limit("txt", 10));
        assert!(v.validate(&text_file(10)).is_valid());

        let result = v.validate(&text_file(11));
        assert!(result.has(&UploadErrorKind::SizeExceeded { limit: Some(10) }));
        assert_eq!(
            result.messages(),
            vec!["Filesize is too large, maximum 10 bytes allowed"]
        );
    }

    #[test]
    fn test_category_limit() {
        let v = validator().with_allowed_max_sizes(SizePolicy::new().with_limit("[document]", 10));
        assert!(!v.validate(&text_file(10000)).is_valid());

        let image = FileDescriptor::new("UploadTest-testUpload.jpg", 20 * 1024, "/tmp/x.jpg");
        let v = validator().with_allowed_max_sizes(SizePolicy::new().with_limit("[image]", 40 * 1024));
        assert!(v.validate(&image).is_valid());

        let v = validator().with_allowed_max_sizes(SizePolicy::new().with_limit("[image]", 1024));
        assert!(!v.validate(&image).is_valid());
    }

    #[test]
    fn test_instance_policy_replaces_default() {
        let v = validator()
            .with_default_max_sizes(SizePolicy::new().with_limit("[image]", 1024).with_limit("txt", 1000));
        assert_eq!(v.allowed_max_file_size("[image]"), Some(1024));
        assert_eq!(v.allowed_max_file_size("txt"), Some(1000));
        assert_eq!(v.largest_allowed_max_file_size(), Some(1024));

        let v = v.with_allowed_max_sizes(
            SizePolicy::new().with_limit("[document]", 2000).with_limit("txt", 4096),
        );
        assert_eq!(v.allowed_max_file_size("[document]"), Some(2000));
        assert_eq!(v.allowed_max_file_size("[image]"), None);
        assert_eq!(v.allowed_max_file_size("[archive]"), None);
        assert_eq!(v.allowed_max_file_size("mp3"), None);
        assert_eq!(v.allowed_max_file_size("txt"), Some(4096));
        assert_eq!(v.largest_allowed_max_file_size(), Some(4096));
    }

    #[test]
    fn test_largest_absent_without_policy() {
        assert_eq!(Validator::new().largest_allowed_max_file_size(), None);
        let v = validator().with_allowed_max_sizes(SizePolicy::wildcard(2000));
        assert_eq!(v.allowed_max_file_size(".jpg"), Some(2000));
        assert_eq!(v.largest_allowed_max_file_size(), Some(2000));
    }

    #[test]
    fn test_transport_errors() {
        let v = validator().with_default_max_sizes(SizePolicy::wildcard(1024));
        let cases = [
            (
                TransportStatus::SizeExceeded,
                "Filesize is too large, maximum 1 KB allowed",
            ),
            (
                TransportStatus::FormSizeExceeded,
                "Filesize is too large, maximum 1 KB allowed",
            ),
            (TransportStatus::NoFile, "File is not a valid upload"),
            (TransportStatus::NoTempDir, "File is not a valid upload"),
            (TransportStatus::CantWrite, "File is not a valid upload"),
            (
                TransportStatus::PartialUpload,
                "File did not finish uploading, please try again",
            ),
        ];

        for (status, message) in cases {
            // Zero size would normally add a second error
            let result = v.validate(&text_file(0).with_status(status));
            assert_eq!(result.errors().len(), 1, "{status}");
            assert_eq!(result.messages(), vec![message], "{status}");
            assert!(result.has(&UploadErrorKind::Transport { status }));
        }
    }

    #[test]
    fn test_transport_size_uses_global_largest() {
        let v = validator().with_allowed_max_sizes(
            SizePolicy::new().with_limit("txt", 10).with_limit("[image]", 4096),
        );
        let result = v.validate(&text_file(5).with_status(TransportStatus::SizeExceeded));
        assert_eq!(
            result.messages(),
            vec!["Filesize is too large, maximum 4 KB allowed"]
        );
    }

    #[test]
    fn test_transport_size_without_policy() {
        let result = validator().validate(&text_file(5).with_status(TransportStatus::SizeExceeded));
        assert_eq!(result.messages(), vec!["Filesize is too large"]);
        assert!(result.has(&UploadErrorKind::Transport {
            status: TransportStatus::SizeExceeded
        }));
    }

    #[test]
    fn test_native_upload_check() {
        let file = text_file(10).with_native_upload(false);
        let result = Validator::new().validate(&file);
        assert!(result.has(&UploadErrorKind::NotUploaded));
        assert_eq!(result.errors().len(), 1);

        assert!(validator().validate(&file).is_valid());
    }

    #[test]
    fn test_extension_not_allowed() {
        let php = FileDescriptor::new("UploadTest-testUpload.php", 100, "/tmp/x.php");
        let v = validator().with_allowed_extensions(ExtensionPolicy::allow(["txt"]));
        let result = v.validate(&php);
        assert!(result.has(&UploadErrorKind::ExtensionNotAllowed));
        assert_eq!(result.messages(), vec!["Extension is not allowed (valid: txt)"]);

        assert!(v.validate(&text_file(100)).is_valid());
    }

    #[test]
    fn test_extensionless_files() {
        let bare = FileDescriptor::new("UploadTest-testUpload", 100, "/tmp/x");

        // No restriction configured
        assert!(validator().validate(&bare).is_valid());

        // Restricted without the empty entry
        let v = validator().with_allowed_extensions(ExtensionPolicy::allow(["txt"]));
        let result = v.validate(&bare);
        assert_eq!(result.errors().len(), 1);
        assert!(result.has(&UploadErrorKind::ExtensionNotAllowed));

        // Empty entry permits them
        let v = validator().with_allowed_extensions(ExtensionPolicy::allow([""]));
        assert!(v.validate(&bare).is_valid());
        assert!(!v.validate(&text_file(100)).is_valid());
    }

    #[test]
    fn test_extensionless_size_limit() {
        let bare = FileDescriptor::new("UploadTest-testUpload", 10000, "/tmp/x");
        let v = validator().with_allowed_max_sizes(SizePolicy::new().with_limit("", 10));
        assert!(!v.validate(&bare).is_valid());
    }

    #[test]
    fn test_errors_accumulate() {
        let v = validator()
            .with_allowed_max_sizes(SizePolicy::wildcard(5))
            .with_allowed_extensions(ExtensionPolicy::allow(["pdf"]));
        let result = v.validate(&text_file(100));
        assert_eq!(result.errors().len(), 2);
        assert_eq!(
            result.errors()[0].kind,
            UploadErrorKind::SizeExceeded { limit: Some(5) }
        );
        assert_eq!(result.errors()[1].kind, UploadErrorKind::ExtensionNotAllowed);
    }

    #[test]
    fn test_extension_case_insensitive() {
        let upper = FileDescriptor::new("REPORT.TXT", 10, "/tmp/r");
        let v = validator().with_allowed_extensions(ExtensionPolicy::allow([".TXT"]));
        assert!(v.validate(&upper).is_valid());
    }

    #[test]
    fn test_compound_extension_allow_list() {
        let archive = FileDescriptor::new("backup.tar.gz", 10, "/tmp/b");
        let v = validator().with_allowed_extensions(ExtensionPolicy::allow(["tar.gz"]));
        assert!(v.validate(&archive).is_valid());

        let v = validator().with_allowed_extensions(ExtensionPolicy::allow(["gz"]));
        assert!(!v.validate(&archive).is_valid());
    }

    #[test]
    fn test_result_clear() {
        let mut result = validator().validate(&text_file(0));
        assert!(!result.is_valid());
        result.clear();
        assert!(result.is_valid());
    }
}
