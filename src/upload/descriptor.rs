//! Inbound file descriptors.

use std::fmt;
use std::path::PathBuf;

use serde::Serialize;

/// Extensions made of more than one dot-separated segment.
///
/// These are treated as a single unit for validation and renaming.
pub const COMPOUND_EXTENSIONS: &[&str] = &["tar.gz", "tar.bz2", "tar.xz", "tar.zst"];

/// Outcome reported by the transport that received the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportStatus {
    /// The file arrived intact.
    #[default]
    Ok,
    /// Larger than the server-wide upload limit.
    SizeExceeded,
    /// Larger than the limit declared by the submitting form.
    FormSizeExceeded,
    /// No file was sent.
    NoFile,
    /// No temporary directory was available.
    NoTempDir,
    /// The temporary file could not be written.
    CantWrite,
    /// The transfer stopped part way.
    PartialUpload,
}

impl TransportStatus {
    /// Whether the file content can be trusted.
    pub fn is_ok(&self) -> bool {
        *self == TransportStatus::Ok
    }

    /// Get a short machine name.
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportStatus::Ok => "ok",
            TransportStatus::SizeExceeded => "size_exceeded",
            TransportStatus::FormSizeExceeded => "form_size_exceeded",
            TransportStatus::NoFile => "no_file",
            TransportStatus::NoTempDir => "no_temp_dir",
            TransportStatus::CantWrite => "cant_write",
            TransportStatus::PartialUpload => "partial_upload",
        }
    }
}

impl fmt::Display for TransportStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A fully received file waiting to be ingested.
#[derive(Debug, Clone)]
pub struct FileDescriptor {
    /// Name supplied by the client.
    pub declared_name: String,
    /// MIME type supplied by the client (untrusted).
    pub mime_hint: String,
    /// Size reported by the transport.
    pub declared_size: u64,
    /// Where the received bytes are.
    pub source_path: PathBuf,
    /// Extension without the leading dot; may be empty or compound.
    pub extension: String,
    /// Transport outcome.
    pub transport_status: TransportStatus,
    /// Whether the transport vouches that this really is an uploaded file.
    pub native_upload: bool,
}

impl FileDescriptor {
    /// Create a descriptor, deriving the extension from the declared name.
    pub fn new(
        declared_name: impl Into<String>,
        declared_size: u64,
        source_path: impl Into<PathBuf>,
    ) -> Self {
        let declared_name = declared_name.into();
        let extension = split_extension(&declared_name).1.to_string();
        Self {
            declared_name,
            mime_hint: String::new(),
            declared_size,
            source_path: source_path.into(),
            extension,
            transport_status: TransportStatus::Ok,
            native_upload: true,
        }
    }

    /// Set the MIME hint.
    pub fn with_mime_hint(mut self, mime: impl Into<String>) -> Self {
        self.mime_hint = mime.into();
        self
    }

    /// Set the transport status.
    pub fn with_status(mut self, status: TransportStatus) -> Self {
        self.transport_status = status;
        self
    }

    /// Set the native upload flag.
    pub fn with_native_upload(mut self, native_upload: bool) -> Self {
        self.native_upload = native_upload;
        self
    }

    /// The extension lower-cased, as used for policy lookups.
    pub fn normalized_extension(&self) -> String {
        self.extension.to_lowercase()
    }
}

/// Split a file name into base name and extension.
///
/// Compound extensions like `tar.gz` stay together. A leading dot does not
/// start an extension, so `.hidden` has none.
///
/// ```
/// use depot::upload::split_extension;
///
/// assert_eq!(split_extension("report.tar.gz"), ("report", "tar.gz"));
/// assert_eq!(split_extension("photo.JPG"), ("photo", "JPG"));
/// assert_eq!(split_extension("README"), ("README", ""));
/// ```
pub fn split_extension(name: &str) -> (&str, &str) {
    let lower = name.to_ascii_lowercase();
    for compound in COMPOUND_EXTENSIONS {
        let suffix_len = compound.len() + 1;
        if lower.len() > suffix_len
            && lower.ends_with(compound)
            && name.is_char_boundary(name.len() - suffix_len)
            && name.as_bytes()[name.len() - suffix_len] == b'.'
        {
            let split = name.len() - suffix_len;
            return (&name[..split], &name[split + 1..]);
        }
    }

    match name.rfind('.') {
        Some(0) | None => (name, ""),
        Some(pos) if pos + 1 == name.len() => (name, ""),
        Some(pos) => (&name[..pos], &name[pos + 1..]),
    }
}

/// Join a base name and an extension.
pub fn join_extension(base: &str, extension: &str) -> String {
    if extension.is_empty() {
        base.to_string()
    } else {
        format!("{base}.{extension}")
    }
}
