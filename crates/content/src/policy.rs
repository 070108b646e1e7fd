//! Per-category storage rules.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::ContentError;

/// Extension entry that allows any extension.
pub const WILDCARD_EXTENSION: &str = "*";

/// Storage rules for one content category.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryRule {
    /// Allowed extensions, or `["*"]` for any.
    pub extensions: Vec<String>,
    /// Storage directory. Relative paths resolve against the storage root.
    pub dir: PathBuf,
    /// Largest accepted upload in bytes.
    pub max_size: u64,
    /// Whether finished uploads are handed to the thumbnail processor.
    #[serde(default)]
    pub thumbnails: bool,
}

impl CategoryRule {
    /// Returns `true` if `ext` is allowed by this category.
    pub fn allows_extension(&self, ext: &str) -> bool {
        self.extensions
            .iter()
            .any(|e| e == WILDCARD_EXTENSION || e == ext)
    }

    /// Checks an upload request against this category.
    pub fn check_upload(&self, ext: &str, size: u64) -> Result<(), ContentError> {
        if !self.allows_extension(ext) {
            return Err(ContentError::InvalidExtension);
        }
        if size > self.max_size {
            return Err(ContentError::SizeExceeded);
        }
        Ok(())
    }
}

/// Category name → rules. Immutable once the manager is built.
#[derive(Debug, Clone, PartialEq)]
pub struct CategoryPolicy {
    root: PathBuf,
    categories: BTreeMap<String, CategoryRule>,
}

impl CategoryPolicy {
    /// Builds a policy whose relative directories resolve against `root`.
    pub fn new(root: impl Into<PathBuf>, categories: BTreeMap<String, CategoryRule>) -> Self {
        Self {
            root: root.into(),
            categories,
        }
    }

    /// The default image/binary table rooted at `root`.
    pub fn with_defaults(root: impl Into<PathBuf>) -> Self {
        Self::new(root, default_categories())
    }

    /// Looks up a category by name.
    pub fn rule(&self, category: &str) -> Option<&CategoryRule> {
        self.categories.get(category)
    }

    /// Absolute (or root-relative) storage directory of a category rule.
    pub fn dir_of(&self, rule: &CategoryRule) -> PathBuf {
        if rule.dir.is_absolute() {
            rule.dir.clone()
        } else {
            self.root.join(&rule.dir)
        }
    }

    /// Storage root used for relative directories.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Iterates category names in order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.categories.keys().map(String::as_str)
    }
}

/// Built-in category table used when none is configured.
pub fn default_categories() -> BTreeMap<String, CategoryRule> {
    let mut map = BTreeMap::new();
    map.insert(
        "image".to_string(),
        CategoryRule {
            extensions: vec!["jpeg".into(), "jpg".into(), "png".into()],
            dir: PathBuf::from("imageContents"),
            max_size: 10 * 1024 * 1024,
            thumbnails: true,
        },
    );
    map.insert(
        "binary".to_string(),
        CategoryRule {
            extensions: vec![WILDCARD_EXTENSION.into()],
            dir: PathBuf::from("binaryContents"),
            max_size: 200 * 1024 * 1024,
            thumbnails: false,
        },
    );
    map
}
