//! Material records and the change events that keep them in sync with disk.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::scanner::ScanEntry;

/// Metadata record describing one file in the watched folder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MaterialRecord {
    /// Stable id, see [`material_id`].
    pub id: String,

    /// File name inside the watched folder.
    pub file_name: String,

    /// Absolute path on disk.
    pub absolute_path: PathBuf,

    /// File size in bytes.
    pub size_bytes: u64,

    /// Last modification time reported by the file system.
    pub modified_at: DateTime<Utc>,

    /// When the catalog first saw this file.
    pub discovered_at: DateTime<Utc>,

    /// MIME type inferred from the extension.
    pub mime_type: String,
}

impl MaterialRecord {
    /// Build a record for a scanned entry of `folder`.
    pub fn from_entry(folder: &Path, entry: &ScanEntry) -> Self {
        Self::new(
            folder.join(&entry.file_name),
            entry.size,
            entry.modified_at,
        )
    }

    /// Build a record for a file at `absolute_path`.
    pub fn new(absolute_path: PathBuf, size_bytes: u64, modified_at: DateTime<Utc>) -> Self {
        let file_name = absolute_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        Self {
            id: material_id(&absolute_path),
            mime_type: mime_from_file_name(&file_name),
            file_name,
            absolute_path,
            size_bytes,
            modified_at,
            discovered_at: Utc::now(),
        }
    }

    /// Whether two records describe the same on-disk state.
    ///
    /// `discovered_at` is bookkeeping and does not take part.
    pub fn same_content(&self, other: &Self) -> bool {
        self.id == other.id
            && self.absolute_path == other.absolute_path
            && self.size_bytes == other.size_bytes
            && self.modified_at == other.modified_at
    }
}

/// Derive the stable id of the material stored at `absolute_path`.
///
/// The id is the first 16 hex digits of the SHA-256 of the path's UTF-8
/// form, so it survives restarts and content changes but not renames.
pub fn material_id(absolute_path: &Path) -> String {
    let digest = Sha256::digest(absolute_path.to_string_lossy().as_bytes());
    let mut id = format!("{digest:x}");
    id.truncate(16);
    id
}

/// A change to apply to the material catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeEvent {
    /// A file appeared.
    Added(MaterialRecord),

    /// A file disappeared.
    Removed(String),

    /// A known file changed size or modification time.
    Modified(String, MaterialRecord),
}

impl ChangeEvent {
    /// Id of the material the event refers to.
    pub fn id(&self) -> &str {
        match self {
            Self::Added(record) => &record.id,
            Self::Removed(id) | Self::Modified(id, _) => id,
        }
    }

    /// Short label for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Added(_) => "added",
            Self::Removed(_) => "removed",
            Self::Modified(..) => "modified",
        }
    }
}

/// Get a MIME type from a file name's extension.
pub fn mime_from_file_name(file_name: &str) -> String {
    let ext = Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_lowercase)
        .unwrap_or_default();

    match ext.as_str() {
        // Video
        "mp4" | "m4v" => "video/mp4",
        "mov" => "video/quicktime",
        "webm" => "video/webm",
        "mkv" => "video/x-matroska",
        "avi" => "video/x-msvideo",
        "flv" => "video/x-flv",
        "wmv" => "video/x-ms-wmv",
        // Images
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        // Audio
        "mp3" => "audio/mpeg",
        "wav" => "audio/wav",
        "m4a" => "audio/mp4",
        // Text
        "txt" => "text/plain",
        "json" => "application/json",
        "srt" => "application/x-subrip",
        // Default
        _ => "application/octet-stream",
    }
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_material_id_is_stable_and_path_sensitive() {
        let a = material_id(Path::new("/videos/a.mp4"));
        assert_eq!(a.len(), 16);
        assert_eq!(a, material_id(Path::new("/videos/a.mp4")));
        assert_ne!(a, material_id(Path::new("/videos/b.mp4")));
        assert_ne!(a, material_id(Path::new("/other/a.mp4")));
    }

    #[test]
    fn test_record_from_path() {
        let modified = Utc::now();
        let record = MaterialRecord::new(PathBuf::from("/videos/clip.MP4"), 42, modified);

        assert_eq!(record.file_name, "clip.MP4");
        assert_eq!(record.size_bytes, 42);
        assert_eq!(record.mime_type, "video/mp4");
        assert_eq!(record.id, material_id(Path::new("/videos/clip.MP4")));
    }

    #[test]
    fn test_same_content_ignores_discovery_time() {
        let modified = Utc::now();
        let a = MaterialRecord::new(PathBuf::from("/v/a.txt"), 1, modified);
        let mut b = a.clone();
        b.discovered_at = a.discovered_at + chrono::Duration::seconds(5);
        assert!(a.same_content(&b));

        b.size_bytes = 2;
        assert!(!a.same_content(&b));
    }

    #[test]
    fn test_record_serializes_camel_case() {
        let record = MaterialRecord::new(PathBuf::from("/v/a.txt"), 1, Utc::now());
        let json = serde_json::to_value(&record).unwrap();
        assert!(json.get("fileName").is_some());
        assert!(json.get("sizeBytes").is_some());
        assert!(json.get("discoveredAt").is_some());
    }
}
