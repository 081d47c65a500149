//! Size literals and size-limit policies.
//!
//! A [`SizePolicy`] maps selectors to byte limits. Selectors come in three
//! tiers, tried in priority order:
//!
//! 1. an exact extension (`txt`, `tar.gz`, or `""` for extensionless files)
//! 2. a bracketed category (`[image]`, `[document]`, ...)
//! 3. the wildcard `*`

use std::collections::BTreeMap;
use std::fmt;

use super::category::{category_selector, CategoryClassifier};
use crate::{DepotError, Result};

/// The wildcard selector.
pub const WILDCARD: &str = "*";

/// Which selector tier produced a limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectorTier {
    /// Exact extension match.
    Extension,
    /// Category match.
    Category,
    /// Wildcard match.
    Wildcard,
}

impl fmt::Display for SelectorTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SelectorTier::Extension => "extension",
            SelectorTier::Category => "category",
            SelectorTier::Wildcard => "wildcard",
        })
    }
}

type TierLookup = fn(&SizePolicy, &str, &dyn CategoryClassifier) -> Option<u64>;

/// Lookup functions in priority order.
const TIERS: &[(SelectorTier, TierLookup)] = &[
    (SelectorTier::Extension, lookup_exact),
    (SelectorTier::Category, lookup_category),
    (SelectorTier::Wildcard, lookup_wildcard),
];

fn lookup_exact(policy: &SizePolicy, key: &str, _: &dyn CategoryClassifier) -> Option<u64> {
    policy.limits.get(key).copied()
}

fn lookup_category(
    policy: &SizePolicy,
    key: &str,
    classifier: &dyn CategoryClassifier,
) -> Option<u64> {
    let category = classifier.category_of(key)?;
    policy.limits.get(&category_selector(&category)).copied()
}

fn lookup_wildcard(policy: &SizePolicy, _: &str, _: &dyn CategoryClassifier) -> Option<u64> {
    policy.limits.get(WILDCARD).copied()
}

/// Mapping from selector to maximum byte count.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SizePolicy {
    limits: BTreeMap<String, u64>,
}

impl SizePolicy {
    /// Create an empty policy.
    pub fn new() -> Self {
        Self::default()
    }

    /// A policy with only a wildcard limit.
    pub fn wildcard(bytes: u64) -> Self {
        Self::new().with_limit(WILDCARD, bytes)
    }

    /// Build a policy from selector / size-literal pairs.
    pub fn from_literals<'a, I>(entries: I) -> Result<Self>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut policy = Self::new();
        for (selector, literal) in entries {
            policy.set(selector, parse_size(literal)?);
        }
        Ok(policy)
    }

    /// Add a limit (builder form).
    pub fn with_limit(mut self, selector: &str, bytes: u64) -> Self {
        self.set(selector, bytes);
        self
    }

    /// Add or replace a limit.
    pub fn set(&mut self, selector: &str, bytes: u64) {
        self.limits.insert(normalize_selector(selector), bytes);
    }

    /// Whether no selectors are configured.
    pub fn is_empty(&self) -> bool {
        self.limits.is_empty()
    }

    /// Number of configured selectors.
    pub fn len(&self) -> usize {
        self.limits.len()
    }

    /// Iterate over selector / limit pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&str, u64)> {
        self.limits.iter().map(|(k, v)| (k.as_str(), *v))
    }

    /// Resolve the limit for an extension or selector, with the tier that matched.
    pub fn resolve(
        &self,
        extension: &str,
        classifier: &dyn CategoryClassifier,
    ) -> Option<(SelectorTier, u64)> {
        let key = normalize_selector(extension);
        TIERS
            .iter()
            .find_map(|(tier, lookup)| lookup(self, &key, classifier).map(|bytes| (*tier, bytes)))
    }

    /// Resolve the limit for an extension or selector.
    ///
    /// `None` means this policy sets no limit for it.
    pub fn max_size_for(&self, extension: &str, classifier: &dyn CategoryClassifier) -> Option<u64> {
        self.resolve(extension, classifier).map(|(_, bytes)| bytes)
    }

    /// The largest limit across every selector, regardless of which files it
    /// applies to. `None` when nothing is configured.
    pub fn largest(&self) -> Option<u64> {
        self.limits.values().copied().max()
    }
}

/// Lower-case a selector and strip a leading dot from extension selectors.
fn normalize_selector(selector: &str) -> String {
    let trimmed = selector.trim();
    let trimmed = trimmed.strip_prefix('.').unwrap_or(trimmed);
    trimmed.to_lowercase()
}

/// Parse a size literal: plain bytes or an `Nk` / `Nm` / `Ng` binary multiple.
///
/// ```
/// use depot::upload::parse_size;
///
/// assert_eq!(parse_size("1000").unwrap(), 1000);
/// assert_eq!(parse_size("40k").unwrap(), 40 * 1024);
/// assert_eq!(parse_size("2M").unwrap(), 2 * 1024 * 1024);
/// ```
pub fn parse_size(literal: &str) -> Result<u64> {
    let literal = literal.trim();
    let invalid = || DepotError::Validation(format!("invalid size literal: {literal:?}"));

    let last = literal.chars().last().ok_or_else(invalid)?;
    let (digits, multiplier) = match last.to_ascii_lowercase() {
        'k' => (&literal[..literal.len() - 1], 1024u64),
        'm' => (&literal[..literal.len() - 1], 1024 * 1024),
        'g' => (&literal[..literal.len() - 1], 1024 * 1024 * 1024),
        _ => (literal, 1),
    };

    let value: u64 = digits.trim().parse().map_err(|_| invalid())?;
    value.checked_mul(multiplier).ok_or_else(invalid)
}

/// Format a byte count for humans, e.g. `1 KB`, `2.5 MB`, `900 bytes`.
pub fn format_size(bytes: u64) -> String {
    const KB: f64 = 1024.0;
    const MB: f64 = KB * 1024.0;
    const GB: f64 = MB * 1024.0;

    let size = bytes as f64;
    if size < KB {
        format!("{bytes} bytes")
    } else if size < KB * 10.0 {
        format!("{} KB", one_decimal(size / KB))
    } else if size < MB {
        format!("{} KB", (size / KB).round())
    } else if size < MB * 10.0 {
        format!("{} MB", one_decimal(size / MB))
    } else if size < GB {
        format!("{} MB", (size / MB).round())
    } else {
        format!("{} GB", one_decimal(size / GB))
    }
}

/// Round to one decimal place, dropping a trailing `.0`.
fn one_decimal(value: f64) -> String {
    let rounded = (value * 10.0).round() / 10.0;
    if rounded.fract() == 0.0 {
        format!("{rounded:.0}")
    } else {
        format!("{rounded:.1}")
    }
}
