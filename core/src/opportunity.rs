//! Opportunity analysis: who is close to unlocking the next tier, and
//! what it is worth to the cooperative.
//!
//! Compares the inbound side (what suppliers owe the cooperative) with
//! the outbound side (what the cooperative owes members), then derives
//! alerts, double levers, cascade effects and purchase plans.
//!
//! RULE: "near" means a next threshold exists and progress is >= 80%.
//! RULE: outbound totals follow the consolidation dedup: a grouped
//! member counts once, through its group.

use crate::{
    aggregation::{EntityVolumes, GroupVolumes, MemberVolumes},
    catalog::{ContractRule, RuleScope, TargetType, TierKind},
    fields::FieldCatalog,
    recap::{EntityFailure, EntityKind},
    resolver::{BatchResolver, ContractResolver, OverrideIndex},
    tier::{progress, rate_at, TierTable},
    types::{round2, FieldKey, GroupName, MemberCode},
};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};

/// Progress threshold (percent) above which a line counts as "near".
pub const NEAR_THRESHOLD_PCT: f64 = 80.0;

/// Default what-if volume delta for entity profiles.
pub const DEFAULT_DELTA: f64 = 50_000.0;

/// One line's progression toward its next tier.
#[derive(Debug, Clone, Serialize)]
pub struct LineObjective {
    pub key:            FieldKey,
    pub label:          String,
    pub volume:         f64,
    /// What the line currently pays (rebate + bonus for supplier lines).
    pub current_value:  f64,
    pub rate:           f64,
    pub next_min:       Option<f64>,
    pub progress:       f64,
    pub missing_volume: Option<f64>,
    /// Value at the next threshold minus the current value, floored at 0.
    pub projected_gain: Option<f64>,
    pub achieved:       bool,
    pub near:           bool,
}

/// A line objective attached to the member or group it belongs to.
#[derive(Debug, Clone, Serialize)]
pub struct EntityObjective {
    pub entity_id:    String,
    pub entity_label: String,
    pub entity_kind:  EntityKind,
    pub objective:    LineObjective,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BalanceStatus {
    /// Outbound with zero inbound: the cooperative pays without receiving.
    Loss,
    /// Inbound exists but outbound exceeds it.
    Deficit,
    Balanced,
    /// Inbound exceeds outbound.
    Margin,
    /// Inbound with zero outbound.
    PureMargin,
}

/// Inbound vs outbound on one line, with the cooperative's own progress.
#[derive(Debug, Clone, Serialize)]
pub struct BalanceLine {
    pub key:      FieldKey,
    pub label:    String,
    pub inbound:  f64,
    pub outbound: f64,
    pub margin:   f64,
    pub status:   BalanceStatus,
    pub coop_near:           bool,
    pub coop_achieved:       bool,
    pub coop_progress:       f64,
    pub coop_next_min:       Option<f64>,
    pub coop_missing:        Option<f64>,
    pub coop_projected_gain: Option<f64>,
    /// Members currently earning on this line (individually).
    pub members_paid: usize,
}

/// A member with purchase volume on a line, for lever targeting.
#[derive(Debug, Clone, Serialize)]
pub struct Contributor {
    pub entity_id:    String,
    pub entity_label: String,
    pub volume:       f64,
}

/// A cooperative line near its own threshold, with the members whose own
/// near thresholds make pushing it more expensive.
#[derive(Debug, Clone, Serialize)]
pub struct DoubleLever {
    pub coop_objective: LineObjective,
    /// Near entities on the same key, highest projected gain first.
    pub matching_entities: Vec<EntityObjective>,
    pub top_contributors:  Vec<Contributor>,
    pub count_near: usize,
    /// Extra outbound if every matched entity crosses its threshold.
    pub total_entity_gain: f64,
    pub coop_gain:  f64,
    /// coop_gain minus total_entity_gain; can be negative.
    pub net_margin: f64,
}

/// A near sub-category line whose purchases also feed the parent
/// supplier line, outbound and inbound at once.
#[derive(Debug, Clone, Serialize)]
pub struct CascadeOpportunity {
    pub entity_id:    String,
    pub entity_label: String,
    pub sub_key:      FieldKey,
    pub sub_label:    String,
    pub sub_volume:   f64,
    pub sub_progress: f64,
    pub sub_missing:  Option<f64>,
    pub sub_gain:     f64,
    pub supplier_key:   FieldKey,
    pub supplier_label: String,
    pub supplier_near:  bool,
    pub supplier_gain:  f64,
    pub coop_sub_near:      bool,
    pub coop_sub_gain:      f64,
    pub coop_supplier_near: bool,
    pub coop_supplier_gain: f64,
    /// Of the four related thresholds, how many are simultaneously near
    /// (the entity's sub-category line always counts).
    pub impact_count: u8,
}

/// One sub-category push inside a purchase plan.
#[derive(Debug, Clone, Serialize)]
pub struct PlanItem {
    pub key:            FieldKey,
    pub label:          String,
    pub volume:         f64,
    pub push:           f64,
    pub progress:       f64,
    pub projected_gain: f64,
}

/// Minimum additional volume, spread across near sub-category lines, to
/// unlock the most tiers under one supplier.
#[derive(Debug, Clone, Serialize)]
pub struct PurchasePlan {
    pub entity_id:    String,
    pub entity_label: String,
    pub entity_kind:  EntityKind,
    pub supplier_key:      FieldKey,
    pub supplier_label:    String,
    pub supplier_volume:   f64,
    pub supplier_missing:  f64,
    pub supplier_progress: f64,
    pub supplier_gain:     f64,
    /// True when the sub-category pushes alone close the supplier gap.
    pub supplier_unlocked: bool,
    /// Supplier gap left after the planned pushes.
    pub residual: f64,
    /// Optional extra push closing the residual (Option B), offered only
    /// when the residual is reasonable.
    pub extra_push:       f64,
    pub extra_reasonable: bool,
    pub items: Vec<PlanItem>,
    pub total_planned:    f64,
    pub total_with_extra: f64,
    pub tiers_unlocked:   usize,
    pub tiers_with_extra: usize,
    /// Gain from the planned pushes alone.
    pub gain_base: f64,
    /// Gain if the supplier tier is also unlocked via the extra push.
    pub gain_with_extra: f64,
}

/// Residual above the planned total AND above this ceiling is not worth
/// offering as an Option B push.
const EXTRA_PUSH_CEILING: f64 = 5_000.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AlertKind {
    Loss,
    Deficit,
    DoubleLever,
    TopGain,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AlertPriority {
    Critical,
    High,
    Medium,
}

#[derive(Debug, Clone, Serialize)]
pub struct Alert {
    pub kind:     AlertKind,
    pub priority: AlertPriority,
    pub title:    String,
    pub message:  String,
    pub key:      FieldKey,
    pub entity_id: Option<String>,
}

const MAX_ALERTS: usize = 15;

/// Near entities grouped by the objective they share.
#[derive(Debug, Clone, Serialize)]
pub struct NearByObjective {
    pub key:        FieldKey,
    pub label:      String,
    pub count:      usize,
    pub total_gain: f64,
    pub entries:    Vec<EntityObjective>,
}

#[derive(Debug, Clone, Serialize)]
pub struct OpportunitySummary {
    pub total_members:        usize,
    pub total_near:           usize,
    pub total_achieved:       usize,
    pub total_gain_potential: f64,
    pub coop_near_count:      usize,
    pub total_inbound:        f64,
    pub total_outbound:       f64,
    pub total_margin:         f64,
    pub loss_count:           usize,
    pub gain_count:           usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct OpportunityReport {
    pub summary:           OpportunitySummary,
    pub balance:           Vec<BalanceLine>,
    pub alerts:            Vec<Alert>,
    pub top_gains:         Vec<EntityObjective>,
    pub near_by_objective: Vec<NearByObjective>,
    pub double_levers:     Vec<DoubleLever>,
    pub coop_near:         Vec<LineObjective>,
    pub coop_achieved:     Vec<LineObjective>,
    pub cascade:           Vec<CascadeOpportunity>,
    pub purchase_plans:    Vec<PurchasePlan>,
    pub failures:          Vec<EntityFailure>,
}

/// What-if outcome of pushing a line up or down by a fixed delta.
#[derive(Debug, Clone, Serialize)]
pub struct DeltaScenario {
    pub key:           FieldKey,
    pub label:         String,
    pub volume:        f64,
    pub current_value: f64,
    pub gain_if_add:   f64,
    pub loss_if_sub:   f64,
}

/// Detailed view of one member or group: objectives plus what-if deltas.
#[derive(Debug, Clone, Serialize)]
pub struct EntityProfile {
    pub entity_id:      String,
    pub entity_label:   String,
    pub entity_kind:    EntityKind,
    pub contract_name:  String,
    pub total_value:    f64,
    pub near_count:     usize,
    pub achieved_count: usize,
    pub gain_potential: f64,
    pub objectives: Vec<LineObjective>,
    pub deltas:     Vec<DeltaScenario>,
}

// ── Line-level helpers ───────────────────────────────────────────────────────

fn value_at(volume: f64, rebate: &TierTable, bonus: &TierTable) -> f64 {
    let rate = progress(volume, rebate).rate + progress(volume, bonus).rate;
    volume * rate
}

/// Gain of adding `delta` volume and loss of removing it, both floored
/// at zero.
pub fn simulate_delta(
    volume: f64,
    current_value: f64,
    rebate: &TierTable,
    bonus: &TierTable,
    delta: f64,
) -> (f64, f64) {
    let up = value_at(volume + delta, rebate, bonus);
    let down = value_at((volume - delta).max(0.0), rebate, bonus);
    (
        round2((up - current_value).max(0.0)),
        round2((current_value - down).max(0.0)),
    )
}

/// Build the objective row of one supplier line. The two tables are
/// combined: the next threshold is the nearest of either table's next
/// step, and the projected rate at that threshold sums both tables.
fn supplier_objective(
    key: &str,
    label: String,
    volume: f64,
    rebate: &TierTable,
    bonus: &TierTable,
) -> Option<LineObjective> {
    if rebate.is_empty() && bonus.is_empty() {
        return None;
    }
    let rp = progress(volume, rebate);
    let bp = progress(volume, bonus);

    let next_min = match (rp.next_min, bp.next_min) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    };
    let prog = match next_min {
        Some(next) if next > 0.0 => (volume / next * 100.0).min(100.0),
        Some(_) => 100.0,
        None => {
            if volume > 0.0 {
                100.0
            } else {
                0.0
            }
        }
    };
    let rate = rp.rate + bp.rate;
    let current_value = round2(volume * rate);

    let (missing, gain) = match next_min {
        Some(next) => {
            let next_rate = rate_at(rebate, next) + rate_at(bonus, next);
            let projected = next_rate * next;
            (
                Some((next - volume).max(0.0)),
                Some(round2((projected - current_value).max(0.0))),
            )
        }
        None => (None, None),
    };

    let achieved = next_min.is_none() && (rp.min_reached.is_some() || bp.min_reached.is_some());
    let near = next_min.is_some() && prog >= NEAR_THRESHOLD_PCT;

    Some(LineObjective {
        key: key.to_string(),
        label,
        volume,
        current_value,
        rate,
        next_min,
        progress: prog,
        missing_volume: missing,
        projected_gain: gain,
        achieved,
        near,
    })
}

fn sub_category_objective(
    key: &str,
    label: String,
    volume: f64,
    table: &TierTable,
) -> Option<LineObjective> {
    if table.is_empty() {
        return None;
    }
    let p = progress(volume, table);
    let current_value = round2(volume * p.rate);

    let (missing, gain) = match p.next_min {
        Some(next) => {
            let projected = rate_at(table, next) * next;
            (
                Some((next - volume).max(0.0)),
                Some(round2((projected - current_value).max(0.0))),
            )
        }
        None => (None, None),
    };

    Some(LineObjective {
        key: key.to_string(),
        label,
        volume,
        current_value,
        rate: p.rate,
        next_min: p.next_min,
        progress: p.progress,
        missing_volume: missing,
        projected_gain: gain,
        achieved: p.next_min.is_none() && p.min_reached.is_some(),
        near: p.next_min.is_some() && p.progress >= NEAR_THRESHOLD_PCT,
    })
}

/// Effective tables of one entity on one key: the contract's tables with
/// the entity's overrides substituted in.
fn effective_supplier_tables(
    rule: Option<&ContractRule>,
    overrides: &OverrideIndex,
    key: &str,
) -> (TierTable, TierTable) {
    let (mut rebate, mut bonus) = match rule {
        Some(r) if r.scope == RuleScope::Supplier => (r.tiers_rebate.clone(), r.tiers_bonus.clone()),
        _ => (TierTable::default(), TierTable::default()),
    };
    if let Some(t) = overrides.table_for(key, TierKind::Rebate) {
        rebate = t.clone();
    }
    if let Some(t) = overrides.table_for(key, TierKind::Bonus) {
        bonus = t.clone();
    }
    (rebate, bonus)
}

fn effective_sub_table(
    rule: Option<&ContractRule>,
    overrides: &OverrideIndex,
    key: &str,
) -> TierTable {
    let mut table = match rule {
        Some(r) if r.scope == RuleScope::SubCategory => r.tiers_sub.clone(),
        _ => TierTable::default(),
    };
    if let Some(t) = overrides.table_for(key, TierKind::SubCategory) {
        table = t.clone();
    }
    table
}

/// One entity's objective rows plus its per-key current values.
struct EntityAnalysis {
    rows:         Vec<LineObjective>,
    value_by_key: HashMap<FieldKey, f64>,
}

fn analyze_volumes(
    catalog: &FieldCatalog,
    volumes: &EntityVolumes,
    rules: &HashMap<FieldKey, ContractRule>,
    overrides: &OverrideIndex,
) -> EntityAnalysis {
    let mut rows = Vec::new();
    let mut value_by_key = HashMap::new();

    for key in catalog.supplier_keys() {
        let volume = volumes.supplier_volume(&key);
        let rule = rules.get(&key);
        let label = rule
            .map(|r| r.label.clone())
            .unwrap_or_else(|| catalog.label_for(&key));
        let (rebate, bonus) = effective_supplier_tables(rule, overrides, &key);
        if let Some(row) = supplier_objective(&key, label, volume, &rebate, &bonus) {
            value_by_key.insert(key.clone(), row.current_value);
            rows.push(row);
        }
    }

    for key in catalog.sub_category_keys() {
        let volume = volumes.sub_category_volume(&key);
        let rule = rules.get(&key);
        let label = rule
            .map(|r| r.label.clone())
            .unwrap_or_else(|| catalog.label_for(&key));
        let table = effective_sub_table(rule, overrides, &key);
        if let Some(row) = sub_category_objective(&key, label, volume, &table) {
            value_by_key.insert(key.clone(), row.current_value);
            rows.push(row);
        }
    }

    EntityAnalysis { rows, value_by_key }
}

/// Sum every member's volumes into one cooperative-wide record.
fn total_volumes(catalog: &FieldCatalog, by_member: &BTreeMap<MemberCode, MemberVolumes>) -> EntityVolumes {
    let mut total = EntityVolumes::default();
    for key in catalog.supplier_keys() {
        let sum = by_member.values().map(|m| m.volumes.supplier_volume(&key)).sum();
        total.supplier.insert(key, sum);
    }
    for key in catalog.sub_category_keys() {
        let sum = by_member
            .values()
            .map(|m| m.volumes.sub_category_volume(&key))
            .sum();
        total.sub_category.insert(key, sum);
    }
    total
}

fn member_label(member: &MemberVolumes) -> String {
    match &member.member_name {
        Some(name) => format!("{} - {name}", member.member_code),
        None => member.member_code.clone(),
    }
}

fn group_label(group: &GroupVolumes) -> String {
    format!("{} ({} members)", group.group_name, group.member_codes.len())
}

fn gain_of(o: &LineObjective) -> f64 {
    o.projected_gain.unwrap_or(0.0)
}

fn fmt_eur(v: f64) -> String {
    format!("{v:.0} EUR")
}

// ── The analyzer ─────────────────────────────────────────────────────────────

pub struct OpportunityAnalyzer<'a> {
    catalog:  &'a FieldCatalog,
    resolver: &'a BatchResolver,
}

impl<'a> OpportunityAnalyzer<'a> {
    pub fn new(catalog: &'a FieldCatalog, resolver: &'a BatchResolver) -> Self {
        Self { catalog, resolver }
    }

    fn member_analysis(&self, member: &MemberVolumes) -> Option<EntityAnalysis> {
        let contract = self
            .resolver
            .resolve(Some(&member.member_code), None)
            .ok()?;
        let rules = self.resolver.rules_for(contract.id);
        let overrides = self
            .resolver
            .overrides_for(TargetType::MemberCode, &member.member_code);
        Some(analyze_volumes(self.catalog, &member.volumes, &rules, &overrides))
    }

    fn group_analysis(&self, group: &GroupVolumes) -> Option<EntityAnalysis> {
        let contract = self.resolver.resolve(None, Some(&group.group_name)).ok()?;
        let rules = self.resolver.rules_for(contract.id);
        let overrides = self
            .resolver
            .overrides_for(TargetType::GroupName, &group.group_name);
        Some(analyze_volumes(self.catalog, &group.volumes, &rules, &overrides))
    }

    fn cooperative_analysis(&self, by_member: &BTreeMap<MemberCode, MemberVolumes>) -> EntityAnalysis {
        let total = total_volumes(self.catalog, by_member);
        let contracts = self.resolver.cooperative_contracts();
        let merged: HashMap<FieldKey, ContractRule> = crate::calculator::merge_rule_index(&contracts)
            .into_iter()
            .map(|(k, r)| (k, r.clone()))
            .collect();
        analyze_volumes(self.catalog, &total, &merged, &OverrideIndex::empty())
    }

    /// Run the full cross-entity analysis.
    pub fn analyze(
        &self,
        by_member: &BTreeMap<MemberCode, MemberVolumes>,
        by_group: &BTreeMap<GroupName, GroupVolumes>,
    ) -> OpportunityReport {
        let placeholder = self.catalog.placeholder_groups();
        let mut failures: Vec<EntityFailure> = Vec::new();

        // Outbound side: every member, then every real multi-member group.
        let mut member_rows: HashMap<MemberCode, EntityAnalysis> = HashMap::new();
        let mut all_near: Vec<EntityObjective> = Vec::new();
        let mut all_achieved: Vec<EntityObjective> = Vec::new();

        for (code, member) in by_member {
            match self.member_analysis(member) {
                Some(analysis) => {
                    let label = member_label(member);
                    for row in &analysis.rows {
                        let entry = EntityObjective {
                            entity_id:    code.clone(),
                            entity_label: label.clone(),
                            entity_kind:  EntityKind::Member,
                            objective:    row.clone(),
                        };
                        if row.near {
                            all_near.push(entry.clone());
                        }
                        if row.achieved {
                            all_achieved.push(entry);
                        }
                    }
                    member_rows.insert(code.clone(), analysis);
                }
                None => {
                    log::warn!("opportunity: no contract for member {code}, skipped");
                    failures.push(EntityFailure {
                        entity_id:   code.clone(),
                        entity_kind: EntityKind::Member,
                        reason:      "no contract available".to_string(),
                    });
                }
            }
        }

        let mut group_rows: HashMap<GroupName, EntityAnalysis> = HashMap::new();
        for (name, group) in by_group {
            if group.member_codes.len() <= 1 || placeholder.contains(name.as_str()) {
                continue;
            }
            match self.group_analysis(group) {
                Some(analysis) => {
                    let label = group_label(group);
                    for row in &analysis.rows {
                        let entry = EntityObjective {
                            entity_id:    name.clone(),
                            entity_label: label.clone(),
                            entity_kind:  EntityKind::Group,
                            objective:    row.clone(),
                        };
                        if row.near {
                            all_near.push(entry.clone());
                        }
                        if row.achieved {
                            all_achieved.push(entry);
                        }
                    }
                    group_rows.insert(name.clone(), analysis);
                }
                None => {
                    failures.push(EntityFailure {
                        entity_id:   name.clone(),
                        entity_kind: EntityKind::Group,
                        reason:      "no contract available".to_string(),
                    });
                }
            }
        }

        // Outbound per key, deduplicated: analyzed groups first, then the
        // members not covered by any of them.
        let mut grouped_codes: HashSet<MemberCode> = HashSet::new();
        for name in group_rows.keys() {
            if let Some(group) = by_group.get(name) {
                grouped_codes.extend(group.member_codes.iter().cloned());
            }
        }
        let mut outbound_by_key: HashMap<FieldKey, f64> = HashMap::new();
        for analysis in group_rows.values() {
            for (key, value) in &analysis.value_by_key {
                *outbound_by_key.entry(key.clone()).or_insert(0.0) += value;
            }
        }
        for (code, analysis) in &member_rows {
            if grouped_codes.contains(code) {
                continue;
            }
            for (key, value) in &analysis.value_by_key {
                *outbound_by_key.entry(key.clone()).or_insert(0.0) += value;
            }
        }

        // Inbound side.
        let coop = self.cooperative_analysis(by_member);
        let coop_rows_by_key: HashMap<FieldKey, &LineObjective> =
            coop.rows.iter().map(|r| (r.key.clone(), r)).collect();
        let coop_near: Vec<LineObjective> =
            coop.rows.iter().filter(|r| r.near).cloned().collect();
        let coop_achieved: Vec<LineObjective> =
            coop.rows.iter().filter(|r| r.achieved).cloned().collect();

        // Balance per key, worst margin first.
        let mut keys: Vec<FieldKey> = coop
            .value_by_key
            .keys()
            .chain(outbound_by_key.keys())
            .cloned()
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        keys.sort();

        let mut balance: Vec<BalanceLine> = Vec::new();
        for key in keys {
            let inbound = round2(coop.value_by_key.get(&key).copied().unwrap_or(0.0));
            let outbound = round2(outbound_by_key.get(&key).copied().unwrap_or(0.0));
            let margin = round2(inbound - outbound);

            let status = if inbound == 0.0 && outbound > 0.0 {
                BalanceStatus::Loss
            } else if inbound > 0.0 && outbound == 0.0 {
                BalanceStatus::PureMargin
            } else if margin < 0.0 {
                BalanceStatus::Deficit
            } else if margin > 0.0 {
                BalanceStatus::Margin
            } else {
                BalanceStatus::Balanced
            };

            let coop_row = coop_rows_by_key.get(&key);
            let members_paid = member_rows
                .values()
                .filter(|a| a.value_by_key.get(&key).copied().unwrap_or(0.0) > 0.0)
                .count();

            balance.push(BalanceLine {
                label: coop_row
                    .map(|r| r.label.clone())
                    .unwrap_or_else(|| self.catalog.label_for(&key)),
                key,
                inbound,
                outbound,
                margin,
                status,
                coop_near: coop_row.map(|r| r.near).unwrap_or(false),
                coop_achieved: coop_row.map(|r| r.achieved).unwrap_or(false),
                coop_progress: coop_row.map(|r| r.progress).unwrap_or(0.0),
                coop_next_min: coop_row.and_then(|r| r.next_min),
                coop_missing: coop_row.and_then(|r| r.missing_volume),
                coop_projected_gain: coop_row.and_then(|r| r.projected_gain),
                members_paid,
            });
        }
        balance.sort_by(|a, b| a.margin.total_cmp(&b.margin));

        let total_inbound = round2(balance.iter().map(|b| b.inbound).sum());
        let total_outbound = round2(balance.iter().map(|b| b.outbound).sum());
        let loss_count = balance
            .iter()
            .filter(|b| matches!(b.status, BalanceStatus::Loss | BalanceStatus::Deficit))
            .count();
        let gain_count = balance
            .iter()
            .filter(|b| matches!(b.status, BalanceStatus::Margin | BalanceStatus::PureMargin))
            .count();

        // Double levers: each near cooperative line vs the entities near
        // their own threshold on the same key.
        let mut double_levers: Vec<DoubleLever> = Vec::new();
        for coop_obj in &coop_near {
            let key = &coop_obj.key;
            let matching: Vec<&EntityObjective> =
                all_near.iter().filter(|e| &e.objective.key == key).collect();
            let total_entity_gain =
                round2(matching.iter().map(|e| gain_of(&e.objective)).sum());

            let mut top_matching: Vec<EntityObjective> =
                matching.iter().map(|e| (*e).clone()).collect();
            top_matching
                .sort_by(|a, b| gain_of(&b.objective).total_cmp(&gain_of(&a.objective)));
            top_matching.truncate(10);

            let mut contributors: Vec<Contributor> = by_member
                .values()
                .filter_map(|m| {
                    let v = m.volumes.supplier_volume(key).max(m.volumes.sub_category_volume(key));
                    (v > 0.0).then(|| Contributor {
                        entity_id:    m.member_code.clone(),
                        entity_label: member_label(m),
                        volume:       v,
                    })
                })
                .collect();
            contributors.sort_by(|a, b| b.volume.total_cmp(&a.volume));
            contributors.truncate(10);

            let coop_gain = gain_of(coop_obj);
            double_levers.push(DoubleLever {
                coop_objective: coop_obj.clone(),
                count_near: matching.len(),
                matching_entities: top_matching,
                top_contributors: contributors,
                total_entity_gain,
                coop_gain,
                net_margin: round2(coop_gain - total_entity_gain),
            });
        }
        double_levers.sort_by(|a, b| b.net_margin.total_cmp(&a.net_margin));

        // Top gains and near-by-objective rollup.
        let mut top_gains = all_near.clone();
        top_gains.sort_by(|a, b| gain_of(&b.objective).total_cmp(&gain_of(&a.objective)));
        top_gains.truncate(20);

        let mut by_objective: BTreeMap<FieldKey, NearByObjective> = BTreeMap::new();
        for entry in &all_near {
            let slot = by_objective
                .entry(entry.objective.key.clone())
                .or_insert_with(|| NearByObjective {
                    key:        entry.objective.key.clone(),
                    label:      entry.objective.label.clone(),
                    count:      0,
                    total_gain: 0.0,
                    entries:    Vec::new(),
                });
            slot.count += 1;
            slot.total_gain = round2(slot.total_gain + gain_of(&entry.objective));
            slot.entries.push(entry.clone());
        }
        let mut near_by_objective: Vec<NearByObjective> = by_objective.into_values().collect();
        near_by_objective.sort_by(|a, b| b.total_gain.total_cmp(&a.total_gain));

        let alerts = build_alerts(&balance, &double_levers, &top_gains);

        // Cascade: near sub-category lines and their parent supplier, on
        // both sides. Only near/achieved rows can show up as the parent.
        let mut entity_rows_index: HashMap<(String, FieldKey), &EntityObjective> = HashMap::new();
        for entry in all_near.iter().chain(all_achieved.iter()) {
            entity_rows_index.insert((entry.entity_id.clone(), entry.objective.key.clone()), entry);
        }

        let mut cascade: Vec<CascadeOpportunity> = Vec::new();
        for entry in &all_near {
            let sub_key = &entry.objective.key;
            let Some(supplier_key) = self.catalog.parent_of(sub_key) else {
                continue;
            };
            let supplier_entry =
                entity_rows_index.get(&(entry.entity_id.clone(), supplier_key.clone()));
            let coop_sub = coop_rows_by_key.get(sub_key).copied();
            let coop_supplier = coop_rows_by_key.get(&supplier_key).copied();

            let supplier_near = supplier_entry.map(|e| e.objective.near).unwrap_or(false);
            let coop_sub_near = coop_sub.map(|r| r.near).unwrap_or(false);
            let coop_supplier_near = coop_supplier.map(|r| r.near).unwrap_or(false);
            let impact_count = 1
                + supplier_near as u8
                + coop_sub_near as u8
                + coop_supplier_near as u8;

            cascade.push(CascadeOpportunity {
                entity_id:    entry.entity_id.clone(),
                entity_label: entry.entity_label.clone(),
                sub_key:      sub_key.clone(),
                sub_label:    entry.objective.label.clone(),
                sub_volume:   entry.objective.volume,
                sub_progress: entry.objective.progress,
                sub_missing:  entry.objective.missing_volume,
                sub_gain:     gain_of(&entry.objective),
                supplier_label: self.catalog.label_for(&supplier_key),
                supplier_key,
                supplier_near,
                supplier_gain: supplier_entry
                    .map(|e| gain_of(&e.objective))
                    .unwrap_or(0.0),
                coop_sub_near,
                coop_sub_gain: coop_sub.map(gain_of).unwrap_or(0.0),
                coop_supplier_near,
                coop_supplier_gain: coop_supplier.map(gain_of).unwrap_or(0.0),
                impact_count,
            });
        }
        cascade.sort_by(|a, b| {
            b.impact_count
                .cmp(&a.impact_count)
                .then(b.sub_gain.total_cmp(&a.sub_gain))
        });

        // Purchase plans for every analyzed entity.
        let mut purchase_plans: Vec<PurchasePlan> = Vec::new();
        for (code, analysis) in &member_rows {
            let member = &by_member[code];
            purchase_plans.extend(build_plans(
                self.catalog,
                code,
                &member_label(member),
                EntityKind::Member,
                &analysis.rows,
            ));
        }
        for (name, analysis) in &group_rows {
            let group = &by_group[name];
            purchase_plans.extend(build_plans(
                self.catalog,
                name,
                &group_label(group),
                EntityKind::Group,
                &analysis.rows,
            ));
        }
        purchase_plans.sort_by(|a, b| {
            b.tiers_with_extra
                .cmp(&a.tiers_with_extra)
                .then(b.tiers_unlocked.cmp(&a.tiers_unlocked))
                .then(a.total_with_extra.total_cmp(&b.total_with_extra))
        });

        let total_gain_potential =
            round2(all_near.iter().map(|e| gain_of(&e.objective)).sum());

        OpportunityReport {
            summary: OpportunitySummary {
                total_members: by_member.len(),
                total_near: all_near.len(),
                total_achieved: all_achieved.len(),
                total_gain_potential,
                coop_near_count: coop_near.len(),
                total_inbound,
                total_outbound,
                total_margin: round2(total_inbound - total_outbound),
                loss_count,
                gain_count,
            },
            balance,
            alerts,
            top_gains,
            near_by_objective,
            double_levers,
            coop_near,
            coop_achieved,
            cascade,
            purchase_plans,
            failures,
        }
    }

    /// Detailed objectives and what-if deltas for one member or group.
    pub fn entity_profile(
        &self,
        entity_kind: EntityKind,
        entity_id: &str,
        by_member: &BTreeMap<MemberCode, MemberVolumes>,
        by_group: &BTreeMap<GroupName, GroupVolumes>,
        delta: f64,
    ) -> crate::error::RfaResult<EntityProfile> {
        let (label, volumes, contract, overrides) = match entity_kind {
            EntityKind::Member => {
                let member =
                    by_member
                        .get(entity_id)
                        .ok_or_else(|| crate::error::RfaError::EntityNotFound {
                            entity: entity_id.to_string(),
                        })?;
                let contract = self.resolver.resolve(Some(entity_id), None)?;
                let overrides = self
                    .resolver
                    .overrides_for(TargetType::MemberCode, entity_id);
                (member_label(member), &member.volumes, contract, overrides)
            }
            EntityKind::Group => {
                let group =
                    by_group
                        .get(entity_id)
                        .ok_or_else(|| crate::error::RfaError::EntityNotFound {
                            entity: entity_id.to_string(),
                        })?;
                let contract = self.resolver.resolve(None, Some(entity_id))?;
                let overrides = self.resolver.overrides_for(TargetType::GroupName, entity_id);
                (group_label(group), &group.volumes, contract, overrides)
            }
        };

        let rules = self.resolver.rules_for(contract.id);
        let analysis = analyze_volumes(self.catalog, volumes, &rules, &overrides);

        let mut deltas = Vec::new();
        for row in &analysis.rows {
            let rule = rules.get(&row.key);
            let (gain_if_add, loss_if_sub) = match self.catalog.parent_of(&row.key) {
                // Sub-category line: single table.
                Some(_) => {
                    let table = effective_sub_table(rule, &overrides, &row.key);
                    simulate_delta(row.volume, row.current_value, &table, &TierTable::default(), delta)
                }
                None => {
                    let (rebate, bonus) = effective_supplier_tables(rule, &overrides, &row.key);
                    simulate_delta(row.volume, row.current_value, &rebate, &bonus, delta)
                }
            };
            deltas.push(DeltaScenario {
                key:           row.key.clone(),
                label:         row.label.clone(),
                volume:        row.volume,
                current_value: row.current_value,
                gain_if_add,
                loss_if_sub,
            });
        }
        deltas.sort_by(|a, b| b.gain_if_add.total_cmp(&a.gain_if_add));

        let near_count = analysis.rows.iter().filter(|r| r.near).count();
        let achieved_count = analysis.rows.iter().filter(|r| r.achieved).count();
        let gain_potential = round2(
            analysis
                .rows
                .iter()
                .filter(|r| r.near)
                .map(gain_of)
                .sum(),
        );
        let total_value = round2(analysis.value_by_key.values().sum());

        Ok(EntityProfile {
            entity_id: entity_id.to_string(),
            entity_label: label,
            entity_kind,
            contract_name: contract.name,
            total_value,
            near_count,
            achieved_count,
            gain_potential,
            objectives: analysis.rows,
            deltas,
        })
    }
}

fn build_alerts(
    balance: &[BalanceLine],
    double_levers: &[DoubleLever],
    top_gains: &[EntityObjective],
) -> Vec<Alert> {
    let mut alerts = Vec::new();

    for b in balance
        .iter()
        .filter(|b| matches!(b.status, BalanceStatus::Loss | BalanceStatus::Deficit))
        .take(3)
    {
        match b.status {
            BalanceStatus::Loss => alerts.push(Alert {
                kind:     AlertKind::Loss,
                priority: AlertPriority::Critical,
                title:    format!("Loss: {}", b.label),
                message:  format!(
                    "Paying {} to {} members with nothing inbound (supplier threshold not reached, \
                     progress {:.0}%). Net loss {}.",
                    fmt_eur(b.outbound),
                    b.members_paid,
                    b.coop_progress,
                    fmt_eur(b.margin.abs())
                ),
                key:       b.key.clone(),
                entity_id: None,
            }),
            BalanceStatus::Deficit => alerts.push(Alert {
                kind:     AlertKind::Deficit,
                priority: AlertPriority::High,
                title:    format!("Deficit: {}", b.label),
                message:  format!(
                    "Receiving {} inbound but paying {} outbound. Deficit {}.",
                    fmt_eur(b.inbound),
                    fmt_eur(b.outbound),
                    fmt_eur(b.margin.abs())
                ),
                key:       b.key.clone(),
                entity_id: None,
            }),
            _ => {}
        }
    }

    for lever in double_levers.iter().take(3) {
        let o = &lever.coop_objective;
        alerts.push(Alert {
            kind:     AlertKind::DoubleLever,
            priority: if lever.net_margin > 0.0 {
                AlertPriority::High
            } else {
                AlertPriority::Medium
            },
            title:   format!("Lever: {}", o.label),
            message: format!(
                "Inbound line at {:.0}% of its threshold (missing {}). Inbound gain +{}, \
                 extra outbound to {} near entities -{}. Net margin {:+.2}.",
                o.progress,
                fmt_eur(o.missing_volume.unwrap_or(0.0)),
                fmt_eur(lever.coop_gain),
                lever.count_near,
                fmt_eur(lever.total_entity_gain),
                lever.net_margin
            ),
            key:       o.key.clone(),
            entity_id: None,
        });
    }

    for entry in top_gains.iter().take(3) {
        let dup = alerts.iter().any(|a| {
            a.entity_id.as_deref() == Some(entry.entity_id.as_str())
                && a.key == entry.objective.key
        });
        if dup {
            continue;
        }
        alerts.push(Alert {
            kind:     AlertKind::TopGain,
            priority: AlertPriority::Medium,
            title:    format!("{} - {}", entry.entity_label, entry.objective.label),
            message:  format!(
                "At {:.0}% of the next threshold (missing {}). Gain +{}.",
                entry.objective.progress,
                fmt_eur(entry.objective.missing_volume.unwrap_or(0.0)),
                fmt_eur(gain_of(&entry.objective))
            ),
            key:       entry.objective.key.clone(),
            entity_id: Some(entry.entity_id.clone()),
        });
    }

    alerts.truncate(MAX_ALERTS);
    alerts
}

/// Greedy plan builder for one entity: for each supplier line with a gap,
/// push its near sub-category lines by their own missing amounts,
/// cheapest first, and see how much of the supplier gap that closes.
fn build_plans(
    catalog: &FieldCatalog,
    entity_id: &str,
    entity_label: &str,
    entity_kind: EntityKind,
    rows: &[LineObjective],
) -> Vec<PurchasePlan> {
    let by_key: HashMap<&str, &LineObjective> =
        rows.iter().map(|r| (r.key.as_str(), r)).collect();
    let mut plans = Vec::new();

    for supplier_key in catalog.supplier_keys() {
        let Some(supplier_row) = by_key.get(supplier_key.as_str()) else {
            continue;
        };
        let Some(supplier_missing) = supplier_row.missing_volume.filter(|m| *m > 0.0) else {
            continue;
        };

        let mut near_subs: Vec<&LineObjective> = catalog
            .children_of(&supplier_key)
            .iter()
            .filter_map(|k| by_key.get(k.as_str()).copied())
            .filter(|r| r.near && r.missing_volume.map(|m| m > 0.0).unwrap_or(false))
            .collect();
        if near_subs.is_empty() {
            continue;
        }
        near_subs.sort_by(|a, b| {
            a.missing_volume
                .unwrap_or(f64::MAX)
                .total_cmp(&b.missing_volume.unwrap_or(f64::MAX))
        });

        let mut items = Vec::new();
        let mut total_planned = 0.0;
        let mut tiers_unlocked = 0;
        let mut residual = supplier_missing;
        for sub in &near_subs {
            let push = sub.missing_volume.unwrap_or(0.0);
            items.push(PlanItem {
                key:            sub.key.clone(),
                label:          sub.label.clone(),
                volume:         sub.volume,
                push,
                progress:       sub.progress,
                projected_gain: gain_of(sub),
            });
            total_planned += push;
            tiers_unlocked += 1;
            residual -= push;
        }

        let supplier_unlocked = residual <= 0.0;
        if supplier_unlocked {
            tiers_unlocked += 1;
        }
        let residual = residual.max(0.0);

        let gain_subs: f64 = items.iter().map(|i| i.projected_gain).sum();
        let supplier_gain = gain_of(supplier_row);

        let mut extra_push = 0.0;
        let mut extra_reasonable = false;
        let mut tiers_with_extra = tiers_unlocked;
        if !supplier_unlocked && residual > 0.0 {
            extra_reasonable = residual <= total_planned || residual <= EXTRA_PUSH_CEILING;
            if extra_reasonable {
                extra_push = residual;
                tiers_with_extra = tiers_unlocked + 1;
            }
        }

        let worth_reporting =
            tiers_unlocked >= 1 && (supplier_unlocked || supplier_row.near || extra_reasonable);
        if !worth_reporting {
            continue;
        }

        plans.push(PurchasePlan {
            entity_id:    entity_id.to_string(),
            entity_label: entity_label.to_string(),
            entity_kind,
            supplier_label: supplier_row.label.clone(),
            supplier_key,
            supplier_volume:   supplier_row.volume,
            supplier_missing,
            supplier_progress: supplier_row.progress,
            supplier_gain,
            supplier_unlocked,
            residual,
            extra_push,
            extra_reasonable,
            total_planned,
            total_with_extra: total_planned + extra_push,
            items,
            tiers_unlocked,
            tiers_with_extra,
            gain_base: round2(gain_subs + if supplier_unlocked { supplier_gain } else { 0.0 }),
            gain_with_extra: round2(gain_subs + supplier_gain),
        });
    }
    plans
}
