//! Volume aggregation — rolls raw purchase rows up into per-member and
//! per-group volume records.
//!
//! Totals are always derived from the per-field maps, never stored,
//! so they cannot drift out of sync.

use crate::error::DataIntegrityWarning;
use crate::fields::{normalize_name, FieldCatalog};
use crate::types::{round2, FieldKey, GroupName, MemberCode};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

/// One canonical purchase row as produced by the ingestion collaborator.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RowRecord {
    pub member_code: String,
    pub member_name: String,
    pub group_name:  String,
    /// Field key -> volume for this row. Unknown keys are ignored.
    pub amounts:     HashMap<FieldKey, f64>,
}

/// Volume totals of one entity, split by line kind.
#[derive(Debug, Clone, Default, Serialize)]
pub struct EntityVolumes {
    pub supplier:     BTreeMap<FieldKey, f64>,
    pub sub_category: BTreeMap<FieldKey, f64>,
}

impl EntityVolumes {
    fn zeroed(catalog: &FieldCatalog) -> Self {
        Self {
            supplier:     catalog.supplier_keys().into_iter().map(|k| (k, 0.0)).collect(),
            sub_category: catalog.sub_category_keys().into_iter().map(|k| (k, 0.0)).collect(),
        }
    }

    fn absorb(&mut self, amounts: &HashMap<FieldKey, f64>) {
        for (key, slot) in self.supplier.iter_mut() {
            *slot += amounts.get(key).copied().unwrap_or(0.0);
        }
        for (key, slot) in self.sub_category.iter_mut() {
            *slot += amounts.get(key).copied().unwrap_or(0.0);
        }
    }

    pub fn supplier_volume(&self, key: &str) -> f64 {
        self.supplier.get(key).copied().unwrap_or(0.0)
    }

    pub fn sub_category_volume(&self, key: &str) -> f64 {
        self.sub_category.get(key).copied().unwrap_or(0.0)
    }

    /// Sum of all supplier-line volumes.
    pub fn global_total(&self) -> f64 {
        round2(self.supplier.values().sum())
    }

    /// Sum of all sub-category volumes.
    pub fn sub_category_total(&self) -> f64 {
        round2(self.sub_category.values().sum())
    }

    pub fn grand_total(&self) -> f64 {
        round2(self.global_total() + self.sub_category_total())
    }
}

/// Aggregated volumes of one member.
#[derive(Debug, Clone, Serialize)]
pub struct MemberVolumes {
    pub member_code: MemberCode,
    pub member_name: Option<String>,
    /// Normalized group name; empty string when the member has no group.
    pub group_name:  GroupName,
    pub volumes:     EntityVolumes,
}

/// Aggregated volumes of one member-group (already includes all members).
#[derive(Debug, Clone, Serialize)]
pub struct GroupVolumes {
    pub group_name:   GroupName,
    pub member_codes: BTreeSet<MemberCode>,
    pub volumes:      EntityVolumes,
}

/// Sum rows field-wise per member code. Rows with an empty member code
/// are dropped.
pub fn aggregate_by_member(
    rows: &[RowRecord],
    catalog: &FieldCatalog,
) -> BTreeMap<MemberCode, MemberVolumes> {
    let mut by_member: BTreeMap<MemberCode, MemberVolumes> = BTreeMap::new();

    for row in rows {
        let code = row.member_code.trim();
        if code.is_empty() {
            continue;
        }
        let entry = by_member.entry(code.to_string()).or_insert_with(|| {
            let name = row.member_name.trim();
            MemberVolumes {
                member_code: code.to_string(),
                member_name: (!name.is_empty()).then(|| name.to_string()),
                group_name:  normalize_name(&row.group_name),
                volumes:     EntityVolumes::zeroed(catalog),
            }
        });
        entry.volumes.absorb(&row.amounts);
    }

    by_member
}

/// Detect members whose rows disagree on group attribution. The first
/// row's group is the one `aggregate_by_member` keeps; any later row
/// naming a different group is reported once per (member, group) pair.
pub fn group_conflicts(rows: &[RowRecord]) -> Vec<DataIntegrityWarning> {
    let mut first_group: HashMap<MemberCode, GroupName> = HashMap::new();
    let mut reported: HashSet<(MemberCode, GroupName)> = HashSet::new();
    let mut warnings = Vec::new();

    for row in rows {
        let code = row.member_code.trim();
        if code.is_empty() {
            continue;
        }
        let group = normalize_name(&row.group_name);
        match first_group.get(code) {
            None => {
                first_group.insert(code.to_string(), group);
            }
            Some(kept) if *kept != group => {
                if reported.insert((code.to_string(), group.clone())) {
                    log::warn!(
                        "member {code}: row names group '{group}' but '{kept}' was already attributed"
                    );
                    warnings.push(DataIntegrityWarning::InconsistentGroup {
                        member_code: code.to_string(),
                        kept:        kept.clone(),
                        ignored:     group,
                    });
                }
            }
            Some(_) => {}
        }
    }

    warnings
}

/// Sum rows field-wise per normalized group name. Rows without a group
/// (or without a member code) contribute to no group.
pub fn aggregate_by_group(
    rows: &[RowRecord],
    catalog: &FieldCatalog,
) -> BTreeMap<GroupName, GroupVolumes> {
    let mut by_group: BTreeMap<GroupName, GroupVolumes> = BTreeMap::new();

    for row in rows {
        let code = row.member_code.trim();
        let group = normalize_name(&row.group_name);
        if group.is_empty() || code.is_empty() {
            continue;
        }
        let entry = by_group.entry(group.clone()).or_insert_with(|| GroupVolumes {
            group_name:   group.clone(),
            member_codes: BTreeSet::new(),
            volumes:      EntityVolumes::zeroed(catalog),
        });
        entry.member_codes.insert(code.to_string());
        entry.volumes.absorb(&row.amounts);
    }

    by_group
}
