//! In-memory dataset snapshots with an explicit lifecycle:
//! load -> serve -> invalidate-on-refresh.
//!
//! A snapshot is built once from ingested rows and never partially
//! mutated; a refresh builds a whole new snapshot. The "live" slot
//! holds the snapshot fed by the connected-sheet sync, alongside any
//! number of ad-hoc uploads.

use crate::aggregation::{
    aggregate_by_group, aggregate_by_member, group_conflicts, GroupVolumes, MemberVolumes,
    RowRecord,
};
use crate::error::DataIntegrityWarning;
use crate::fields::FieldCatalog;
use crate::types::{GroupName, MemberCode};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use uuid::Uuid;

/// One immutable aggregation pass over a set of rows.
#[derive(Debug)]
pub struct DatasetSnapshot {
    pub id:        Uuid,
    pub loaded_at: DateTime<Utc>,
    pub rows:      Vec<RowRecord>,
    pub by_member: BTreeMap<MemberCode, MemberVolumes>,
    pub by_group:  BTreeMap<GroupName, GroupVolumes>,
    /// Data problems found while aggregating, e.g. a member whose rows
    /// disagree on group attribution.
    pub warnings:  Vec<DataIntegrityWarning>,
}

impl DatasetSnapshot {
    pub fn build(rows: Vec<RowRecord>, catalog: &FieldCatalog) -> Self {
        let by_member = aggregate_by_member(&rows, catalog);
        let by_group = aggregate_by_group(&rows, catalog);
        let warnings = group_conflicts(&rows);
        log::info!(
            "dataset: built snapshot from {} rows ({} members, {} groups, {} warnings)",
            rows.len(),
            by_member.len(),
            by_group.len(),
            warnings.len()
        );
        Self {
            id: Uuid::new_v4(),
            loaded_at: Utc::now(),
            rows,
            by_member,
            by_group,
            warnings,
        }
    }
}

/// Holds snapshots for the duration of a serving session.
#[derive(Debug, Default)]
pub struct DatasetStore {
    snapshots: HashMap<Uuid, Arc<DatasetSnapshot>>,
    live:      Option<Uuid>,
}

impl DatasetStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build and register a new snapshot; returns its id.
    pub fn load(&mut self, rows: Vec<RowRecord>, catalog: &FieldCatalog) -> Uuid {
        let snapshot = DatasetSnapshot::build(rows, catalog);
        let id = snapshot.id;
        self.snapshots.insert(id, Arc::new(snapshot));
        id
    }

    /// Replace the live snapshot (connected-sheet refresh). The previous
    /// live snapshot is dropped in the same step.
    pub fn set_live(&mut self, rows: Vec<RowRecord>, catalog: &FieldCatalog) -> Uuid {
        if let Some(old) = self.live.take() {
            self.snapshots.remove(&old);
        }
        let id = self.load(rows, catalog);
        self.live = Some(id);
        id
    }

    pub fn get(&self, id: Uuid) -> Option<Arc<DatasetSnapshot>> {
        self.snapshots.get(&id).cloned()
    }

    pub fn live(&self) -> Option<Arc<DatasetSnapshot>> {
        self.live.and_then(|id| self.get(id))
    }

    pub fn invalidate(&mut self, id: Uuid) {
        self.snapshots.remove(&id);
        if self.live == Some(id) {
            self.live = None;
        }
    }

    pub fn list(&self) -> Vec<Uuid> {
        self.snapshots.keys().copied().collect()
    }
}
