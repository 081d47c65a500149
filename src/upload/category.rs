//! File category classification.
//!
//! Size policies may target a whole category (`[image]`, `[document]`, ...)
//! instead of individual extensions. The mapping from extension to category
//! is pluggable through [`CategoryClassifier`].

use mime_guess::mime;

/// Maps an extension to its category name (without brackets).
pub trait CategoryClassifier: Send + Sync {
    /// Category for a lower-cased extension, if any.
    fn category_of(&self, extension: &str) -> Option<String>;
}

/// Selector key used by size policies for a category name.
pub fn category_selector(category: &str) -> String {
    format!("[{category}]")
}

/// Extensions assigned explicitly, checked before guessing from MIME types.
const CATEGORY_TABLE: &[(&str, &[&str])] = &[
    (
        "archive",
        &[
            "7z", "bz2", "gz", "rar", "tar", "tar.bz2", "tar.gz", "tar.xz", "tar.zst", "tgz",
            "xz", "zip", "zipx",
        ],
    ),
    (
        "document",
        &[
            "css", "csv", "doc", "docx", "dotm", "dotx", "htm", "html", "gpx", "js", "json",
            "kml", "md", "odp", "ods", "odt", "pages", "pdf", "potm", "potx", "pps", "ppt",
            "pptx", "rtf", "txt", "xhtml", "xls", "xlsx", "xltm", "xltx", "xml",
        ],
    ),
    ("flash", &["fla", "swf"]),
    ("image", &["bmp", "gif", "ico", "jpeg", "jpg", "png", "svg", "tif", "tiff", "webp"]),
];

/// Default classifier: an explicit table, then the MIME top-level type.
#[derive(Debug, Clone, Copy, Default)]
pub struct MimeCategories;

impl MimeCategories {
    /// Create the default classifier.
    pub fn new() -> Self {
        Self
    }
}

impl CategoryClassifier for MimeCategories {
    fn category_of(&self, extension: &str) -> Option<String> {
        let extension = extension.trim_start_matches('.').to_lowercase();
        if extension.is_empty() {
            return None;
        }

        if let Some((category, _)) = CATEGORY_TABLE
            .iter()
            .find(|(_, exts)| exts.contains(&extension.as_str()))
        {
            return Some((*category).to_string());
        }

        let guessed = mime_guess::from_ext(&extension).first()?;
        let top = guessed.type_();
        let category = if top == mime::IMAGE {
            "image"
        } else if top == mime::AUDIO {
            "audio"
        } else if top == mime::VIDEO {
            "video"
        } else if top == mime::TEXT {
            "document"
        } else {
            return None;
        };
        Some(category.to_string())
    }
}
