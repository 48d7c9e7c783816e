use crate::common::types::{Activity, ExportError, ExportFormat, ExportResult};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

pub const INDEX_FILE: &str = "activities.json";

/// An activity whose gpx and tcx files are both on disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexEntry {
    #[serde(flatten)]
    pub activity: Activity,
    pub gpx: String,
    pub tcx: String,
}

impl IndexEntry {
    pub fn new(activity: Activity) -> Self {
        let id = activity.id;
        Self {
            activity,
            gpx: ExportFormat::Gpx.relative_path(id),
            tcx: ExportFormat::Tcx.relative_path(id),
        }
    }

    pub fn id(&self) -> u64 {
        self.activity.id
    }
}

/// Persistent record of completed activities, stored as a JSON array sorted
/// by id. Holds at most one entry per id.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActivityIndex {
    entries: Vec<IndexEntry>,
}

impl ActivityIndex {
    pub fn path_in(output_dir: &Path) -> PathBuf {
        output_dir.join(INDEX_FILE)
    }

    /// Read the index at `path`. A missing file is an empty index. One that
    /// is not valid JSON is moved aside and also treated as empty, so the
    /// next save does not destroy it. Any other read failure is an error.
    pub fn load(path: &Path) -> ExportResult<Self> {
        let raw = match std::fs::read(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("No existing index at {}, starting fresh", path.display());
                return Ok(Self::default());
            }
            Err(e) => return Err(ExportError::filesystem(path, e)),
        };

        match serde_json::from_slice::<Vec<IndexEntry>>(&raw) {
            Ok(entries) => {
                let mut index = Self::default();
                for entry in entries {
                    index.insert(entry);
                }
                debug!("Loaded {} indexed activities", index.len());
                Ok(index)
            }
            Err(e) => {
                let backup = path.with_extension(format!("json.corrupt-{}", chrono::Utc::now().timestamp()));
                warn!(
                    "Index {} is not valid ({}), moving it to {} and starting fresh",
                    path.display(),
                    e,
                    backup.display()
                );
                if let Err(e) = std::fs::rename(path, &backup) {
                    warn!("Failed to move corrupt index aside: {}", e);
                }
                Ok(Self::default())
            }
        }
    }

    /// Write the whole index to a sibling temp file and rename it over
    /// `path`, so a crash leaves either the old or the new index.
    pub fn save(&self, path: &Path) -> ExportResult<()> {
        let tmp = path.with_extension("json.tmp");
        let serialized = serde_json::to_vec_pretty(&self.entries)?;

        std::fs::write(&tmp, serialized).map_err(|e| ExportError::filesystem(&tmp, e))?;
        std::fs::rename(&tmp, path).map_err(|e| {
            let _ = std::fs::remove_file(&tmp);
            ExportError::filesystem(path, e)
        })?;
        Ok(())
    }

    /// Returns false, leaving the index untouched, when the id is already present.
    pub fn insert(&mut self, entry: IndexEntry) -> bool {
        match self.entries.binary_search_by_key(&entry.id(), IndexEntry::id) {
            Ok(_) => false,
            Err(pos) => {
                self.entries.insert(pos, entry);
                true
            }
        }
    }

    pub fn contains(&self, id: u64) -> bool {
        self.entries
            .binary_search_by_key(&id, IndexEntry::id)
            .is_ok()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }

    /// Listed activities not yet indexed, first occurrence of each id only,
    /// in listing order.
    pub fn new_activities(&self, listed: &[Activity]) -> Vec<Activity> {
        let mut seen = HashSet::new();
        listed
            .iter()
            .filter(|activity| !self.contains(activity.id) && seen.insert(activity.id))
            .cloned()
            .collect()
    }
}
