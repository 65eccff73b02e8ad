//! Cooperative-wide consolidation without double counting.
//!
//! RULE: a member is paid exactly once, either individually (no group,
//! or group dissolved) or through its group, never both.
//! RULE: placeholder group labels are always treated as dissolved.
//! RULE: a per-entity resolution failure aborts only that entity, the
//! rest of the recap is still produced.

use crate::{
    aggregation::{GroupVolumes, MemberVolumes},
    calculator::{calculate, RebateBreakdown},
    catalog::TargetType,
    error::{DataIntegrityWarning, RfaError},
    fields::FieldCatalog,
    resolver::{BatchResolver, ContractResolver},
    types::{round2, round4, FieldKey, GroupName, MemberCode},
};
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EntityKind {
    Member,
    Group,
}

/// One entity's contribution to one supplier line of the recap.
#[derive(Debug, Clone, Serialize)]
pub struct SupplierDetail {
    pub entity_id:    String,
    pub entity_label: String,
    pub entity_kind:  EntityKind,
    /// Rebate + bonus paid on this line.
    pub rebate_value: f64,
    pub volume:       f64,
    /// rebate_value / volume, reported even below the first threshold.
    pub effective_rate: f64,
}

/// An entity whose rebate could not be computed during a batch pass.
#[derive(Debug, Clone, Serialize)]
pub struct EntityFailure {
    pub entity_id:   String,
    pub entity_kind: EntityKind,
    pub reason:      String,
}

/// Cooperative-wide outbound totals, deduplicated across the
/// member/group hierarchy.
#[derive(Debug, Clone, Serialize)]
pub struct GlobalRecap {
    /// Rebate + bonus paid out per supplier line.
    pub rebate_by_supplier: BTreeMap<FieldKey, f64>,
    /// Per-supplier detail rows, in entity processing order.
    pub supplier_details: BTreeMap<FieldKey, Vec<SupplierDetail>>,
    pub total_global_rebate: f64,
    pub total_global_bonus:  f64,
    pub total_global:        f64,
    pub total_sub_category:  f64,
    pub grand_total:         f64,
    pub warnings: Vec<DataIntegrityWarning>,
    pub failures: Vec<EntityFailure>,
}

struct RecapAccumulator {
    rebate_by_supplier: BTreeMap<FieldKey, f64>,
    supplier_details:   BTreeMap<FieldKey, Vec<SupplierDetail>>,
    total_global_rebate: f64,
    total_global_bonus:  f64,
    total_sub_category:  f64,
}

impl RecapAccumulator {
    fn new(catalog: &FieldCatalog) -> Self {
        Self {
            rebate_by_supplier: catalog.supplier_keys().into_iter().map(|k| (k, 0.0)).collect(),
            supplier_details: catalog
                .supplier_keys()
                .into_iter()
                .map(|k| (k, Vec::new()))
                .collect(),
            total_global_rebate: 0.0,
            total_global_bonus:  0.0,
            total_sub_category:  0.0,
        }
    }

    fn absorb(
        &mut self,
        breakdown: &RebateBreakdown,
        entity_id: &str,
        entity_label: &str,
        entity_kind: EntityKind,
    ) {
        for line in &breakdown.supplier {
            let slot = self.rebate_by_supplier.entry(line.key.clone()).or_insert(0.0);
            *slot += line.total_value;

            let effective_rate = if line.volume > 0.0 {
                round4(line.total_value / line.volume)
            } else {
                0.0
            };
            self.supplier_details
                .entry(line.key.clone())
                .or_default()
                .push(SupplierDetail {
                    entity_id:    entity_id.to_string(),
                    entity_label: entity_label.to_string(),
                    entity_kind,
                    rebate_value: round2(line.total_value),
                    volume:       round2(line.volume),
                    effective_rate,
                });
        }
        self.total_global_rebate += breakdown.totals.global_rebate;
        self.total_global_bonus += breakdown.totals.global_bonus;
        self.total_sub_category += breakdown.totals.sub_category_total;
    }
}

/// Build the full dissolved set: caller-provided names plus the fixed
/// placeholder labels, all normalized.
pub fn dissolved_set(catalog: &FieldCatalog, dissolved_groups: &HashSet<GroupName>) -> HashSet<GroupName> {
    let mut set = catalog.placeholder_groups();
    set.extend(dissolved_groups.iter().map(|g| crate::fields::normalize_name(g)));
    set
}

/// Compute the cooperative-wide recap.
///
/// Members without a group, or whose group is dissolved, are priced
/// individually; every other group is priced as one unit (its aggregate
/// already contains all its members).
pub fn recap(
    catalog: &FieldCatalog,
    by_member: &BTreeMap<MemberCode, MemberVolumes>,
    by_group: &BTreeMap<GroupName, GroupVolumes>,
    dissolved_groups: &HashSet<GroupName>,
    resolver: &BatchResolver,
) -> GlobalRecap {
    let dissolved = dissolved_set(catalog, dissolved_groups);
    let mut acc = RecapAccumulator::new(catalog);
    let mut warnings: Vec<DataIntegrityWarning> = Vec::new();
    let mut failures: Vec<EntityFailure> = Vec::new();

    // Pass 1: individual members.
    for (code, member) in by_member {
        let group = member.group_name.as_str();
        let grouped = !group.is_empty() && !dissolved.contains(group);
        if grouped {
            if by_group.contains_key(group) {
                continue;
            }
            // Stated group has no aggregate: pay the member individually
            // and surface the inconsistency.
            warnings.push(DataIntegrityWarning::UnknownGroup {
                member_code: code.clone(),
                group_name:  group.to_string(),
            });
        }

        let contract = match resolver.resolve(Some(code), None) {
            Ok(c) => c,
            Err(e @ RfaError::NoContractAvailable { .. }) => {
                log::warn!("recap: skipping member {code}: {e}");
                failures.push(EntityFailure {
                    entity_id:   code.clone(),
                    entity_kind: EntityKind::Member,
                    reason:      e.to_string(),
                });
                continue;
            }
            Err(e) => {
                failures.push(EntityFailure {
                    entity_id:   code.clone(),
                    entity_kind: EntityKind::Member,
                    reason:      e.to_string(),
                });
                continue;
            }
        };

        let rules = resolver.rules_for(contract.id);
        let overrides = resolver.overrides_for(TargetType::MemberCode, code);
        let breakdown = calculate(catalog, &member.volumes, &contract, &rules, &overrides);

        let label = match &member.member_name {
            Some(name) => format!("{code} - {name}"),
            None => code.clone(),
        };
        acc.absorb(&breakdown, code, &label, EntityKind::Member);
    }

    // Pass 2: real groups, one unit each.
    for (group, aggregate) in by_group {
        if dissolved.contains(group.as_str()) {
            continue;
        }

        let contract = match resolver.resolve(None, Some(group)) {
            Ok(c) => c,
            Err(e) => {
                log::warn!("recap: skipping group {group}: {e}");
                failures.push(EntityFailure {
                    entity_id:   group.clone(),
                    entity_kind: EntityKind::Group,
                    reason:      e.to_string(),
                });
                continue;
            }
        };

        let rules = resolver.rules_for(contract.id);
        let overrides = resolver.overrides_for(TargetType::GroupName, group);
        let breakdown = calculate(catalog, &aggregate.volumes, &contract, &rules, &overrides);
        acc.absorb(&breakdown, group, group, EntityKind::Group);
    }

    let total_global = acc.total_global_rebate + acc.total_global_bonus;
    let grand_total = total_global + acc.total_sub_category;

    GlobalRecap {
        rebate_by_supplier: acc
            .rebate_by_supplier
            .into_iter()
            .map(|(k, v)| (k, round2(v)))
            .collect(),
        supplier_details: acc.supplier_details,
        total_global_rebate: round2(acc.total_global_rebate),
        total_global_bonus:  round2(acc.total_global_bonus),
        total_global:        round2(total_global),
        total_sub_category:  round2(acc.total_sub_category),
        grand_total:         round2(grand_total),
        warnings,
        failures,
    }
}
