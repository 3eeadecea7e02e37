use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use argus_types::id::Id;

/// A point-in-time record of a backed-up directory tree, stored at
/// `snapshots/<id>` under the hash of its payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub time: DateTime<Utc>,
    pub hostname: String,
    pub username: String,
    /// Source directories that were backed up.
    pub paths: Vec<String>,
    /// Root tree of the snapshot. Absent only in damaged repositories.
    #[serde(default)]
    pub tree: Option<Id>,
}
