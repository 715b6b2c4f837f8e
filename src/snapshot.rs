//! Point-in-time view of the enumerated devices.
//!
//! [`DeviceSnapshot`] is an **owned**, read-only list of the descriptors one
//! enumeration pass published, sorted by path. It is produced by
//! [`Manager::snapshot`](crate::manager::Manager::snapshot) and is cheap to
//! clone: descriptors are shared through `Arc`.
//!
//! # Semantics
//! - Keys are device paths (the backend's [`DeviceKey`](crate::DeviceKey)).
//! - A snapshot is **immutable**. To refresh, call `enumerate()` and take a new one.
//! - [`diff`](DeviceSnapshot::diff) compares two snapshots by path.
//!
//! # Example
//! ```no_run
//! use hidlink::Manager;
//!
//! let mgr = Manager::new();
//! let before = mgr.snapshot();
//! mgr.enumerate().unwrap();
//! let changes = mgr.snapshot().diff(&before);
//! for d in &changes.added {
//!     println!("+ {d}");
//! }
//! println!("{}", mgr.snapshot().to_json().unwrap());
//! ```

use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::device::DeviceDescriptor;
use crate::error::{HidError, Result};

/// Owned snapshot of the known devices, sorted by path.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceSnapshot(pub Vec<Arc<DeviceDescriptor>>);

/// Paths that appeared or vanished between two snapshots.
#[derive(Clone, Debug, Default)]
pub struct SnapshotDiff {
    pub added: Vec<Arc<DeviceDescriptor>>,
    pub removed: Vec<Arc<DeviceDescriptor>>,
}

impl SnapshotDiff {
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

impl DeviceSnapshot {
    pub(crate) fn new(mut devices: Vec<Arc<DeviceDescriptor>>) -> Self {
        devices.sort_by(|a, b| a.path.cmp(&b.path));
        Self(devices)
    }

    /// Get the descriptor for a specific path.
    #[inline]
    pub fn get(&self, path: &str) -> Option<&Arc<DeviceDescriptor>> {
        self.0
            .binary_search_by(|d| d.path.as_str().cmp(path))
            .ok()
            .map(|i| &self.0[i])
    }

    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = &Arc<DeviceDescriptor>> {
        self.0.iter()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Consume the snapshot and return the inner list.
    #[inline]
    pub fn into_inner(self) -> Vec<Arc<DeviceDescriptor>> {
        self.0
    }

    /// What changed going from `previous` to `self`.
    pub fn diff(&self, previous: &DeviceSnapshot) -> SnapshotDiff {
        let now: HashSet<&str> = self.iter().map(|d| d.path.as_str()).collect();
        let before: HashSet<&str> = previous.iter().map(|d| d.path.as_str()).collect();
        SnapshotDiff {
            added: self
                .iter()
                .filter(|d| !before.contains(d.path.as_str()))
                .cloned()
                .collect(),
            removed: previous
                .iter()
                .filter(|d| !now.contains(d.path.as_str()))
                .cloned()
                .collect(),
        }
    }

    /// Pretty-printed JSON, for diagnostics.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| HidError::io(format!("snapshot export: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snap(paths: &[&str]) -> DeviceSnapshot {
        DeviceSnapshot::new(
            paths
                .iter()
                .map(|p| {
                    Arc::new(DeviceDescriptor {
                        path: p.to_string(),
                        vendor_id: 0x1209,
                        ..DeviceDescriptor::default()
                    })
                })
                .collect(),
        )
    }

    #[test]
    fn lookup_and_order() {
        let s = snap(&["c", "a", "b"]);
        let paths: Vec<_> = s.iter().map(|d| d.path.as_str()).collect();
        assert_eq!(paths, ["a", "b", "c"]);
        assert!(s.get("b").is_some());
        assert!(s.get("z").is_none());
        assert_eq!(s.len(), 3);
    }

    #[test]
    fn diff_by_path() {
        let before = snap(&["a", "b"]);
        let after = snap(&["b", "c"]);
        let d = after.diff(&before);
        assert_eq!(d.added.len(), 1);
        assert_eq!(d.added[0].path, "c");
        assert_eq!(d.removed.len(), 1);
        assert_eq!(d.removed[0].path, "a");
        assert!(after.diff(&after).is_empty());
    }

    #[test]
    fn json_export() {
        let json = snap(&["/dev/hidraw0"]).to_json().unwrap();
        let back: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(back[0]["path"], "/dev/hidraw0");
        assert_eq!(back[0]["vendor_id"], 0x1209);
    }
}
