//! Folder/file view entries projected from a flat listing.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Display name used for a folder whose first path segment is empty
/// (a key such as `photos//raw.jpg`).
pub const EMPTY_SEGMENT_NAME: &str = "(empty)";

const SIZE_UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];

/// A normalized listing scope.
///
/// The empty string is the bucket root; anything else ends in `/`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct Prefix(String);

impl Prefix {
    /// The bucket root.
    pub fn root() -> Self {
        Self(String::new())
    }

    /// Normalize a caller-supplied prefix by appending a trailing `/`
    /// when it is non-empty and lacks one.
    pub fn normalize(raw: &str) -> Self {
        if raw.is_empty() || raw.ends_with('/') {
            Self(raw.to_string())
        } else {
            Self(format!("{raw}/"))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    /// Last non-empty path segment, without the trailing `/`.
    pub fn folder_name(&self) -> Option<&str> {
        self.0
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .filter(|name| !name.is_empty())
    }
}

impl AsRef<str> for Prefix {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Whether a key names a file or a folder, decided purely by its
/// trailing character.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    File,
    Folder,
}

impl EntryKind {
    pub fn of_key(key: &str) -> Self {
        if key.ends_with('/') {
            Self::Folder
        } else {
            Self::File
        }
    }

    pub fn is_folder(&self) -> bool {
        matches!(self, Self::Folder)
    }
}

/// One immediate child of a prefix, as shown to a caller.
#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ObjectEntry {
    /// Full key; folders end in `/`.
    pub key: String,

    /// Name relative to the listed prefix.
    pub name: String,

    pub kind: EntryKind,

    /// Raw size in bytes. Absent for folders.
    pub size: Option<u64>,

    /// Human readable size, empty for folders.
    pub size_label: String,

    pub last_modified: Option<DateTime<Utc>>,
}

impl ObjectEntry {
    pub fn folder(key: String, name: String) -> Self {
        Self {
            key,
            name,
            kind: EntryKind::Folder,
            size: None,
            size_label: String::new(),
            last_modified: None,
        }
    }

    pub fn file(
        key: String,
        name: String,
        size: u64,
        last_modified: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            key,
            name,
            kind: EntryKind::File,
            size: Some(size),
            size_label: format_byte_size(size),
            last_modified,
        }
    }

    /// Lowercased extension of a file name, empty when there is none.
    pub fn extension(&self) -> String {
        match self.name.rsplit_once('.') {
            Some((stem, ext)) if !stem.is_empty() => ext.to_lowercase(),
            _ => String::new(),
        }
    }
}

/// Field a projected listing is ordered by.
#[derive(Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SortKey {
    #[default]
    Name,
    Modified,
    Size,
    Extension,
}

#[derive(Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

/// Render a byte count by repeated division by 1024 with one decimal
/// place. Whole bytes are printed without a fraction.
pub fn format_byte_size(bytes: u64) -> String {
    if bytes < 1024 {
        return format!("{bytes} B");
    }
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < SIZE_UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{:.1} {}", value, SIZE_UNITS[unit])
}
