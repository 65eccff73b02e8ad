//! Rebate computation for one entity.
//!
//! Combines the tier evaluator with a contract's rule set and the
//! entity's overrides. Two entry points: `calculate` prices one entity
//! under one member contract; `calculate_multi_contract` prices the
//! cooperative's inbound side, where each supplier line can be governed
//! by a different contract and group bonuses / marketing allowances
//! apply on top.
//!
//! RULE: a field key with no contract rule yields zero, never a
//! fallback rate.
//! RULE: an entity override replaces the contract table for that slot
//! before evaluation.

use crate::{
    aggregation::{EntityVolumes, GroupVolumes},
    catalog::{Contract, ContractRule, MarketingRule, RuleScope, TierKind},
    fields::{normalize_name, FieldCatalog},
    resolver::OverrideIndex,
    tier::{evaluate, TierResult, TierTable},
    types::{round2, round4, FieldKey, GroupName},
};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

/// One supplier line of a breakdown: primary and bonus tables evaluated
/// independently, totals summed.
#[derive(Debug, Clone, Serialize)]
pub struct SupplierRebate {
    pub key:          FieldKey,
    pub label:        String,
    pub volume:       f64,
    pub rebate:       TierResult,
    pub bonus:        TierResult,
    pub total_rate:   f64,
    pub total_value:  f64,
    pub triggered:    bool,
    pub has_override: bool,
}

/// One sub-category line of a breakdown.
#[derive(Debug, Clone, Serialize)]
pub struct SubCategoryRebate {
    pub key:           FieldKey,
    pub label:         String,
    pub volume:        f64,
    pub selected_min:  Option<f64>,
    pub min_threshold: Option<f64>,
    pub rate:          f64,
    pub value:         f64,
    pub triggered:     bool,
    pub has_override:  bool,
}

/// Flat extra payout to a named member-group on one supplier line.
#[derive(Debug, Clone, Serialize)]
pub struct GroupBonusLine {
    pub field_key:  FieldKey,
    pub group_name: GroupName,
    pub label:      String,
    pub volume:     f64,
    pub bonus_rate: f64,
    pub value:      f64,
}

/// Marketing allowance earned on one supplier line.
#[derive(Debug, Clone, Serialize)]
pub struct MarketingLine {
    pub field_key:   FieldKey,
    pub label:       String,
    pub base_volume: f64,
    pub amount:      f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RebateTotals {
    pub global_rebate:      f64,
    pub global_bonus:       f64,
    pub global_total:       f64,
    pub sub_category_total: f64,
    pub group_bonus_total:  f64,
    pub marketing_total:    f64,
    pub grand_total:        f64,
}

/// Full rebate report of one entity, line by line plus rollups.
#[derive(Debug, Clone, Serialize)]
pub struct RebateBreakdown {
    pub supplier:      Vec<SupplierRebate>,
    pub sub_category:  Vec<SubCategoryRebate>,
    pub group_bonuses: Vec<GroupBonusLine>,
    pub marketing:     Vec<MarketingLine>,
    pub totals:        RebateTotals,
}

impl RebateBreakdown {
    pub fn supplier_line(&self, key: &str) -> Option<&SupplierRebate> {
        self.supplier.iter().find(|l| l.key == key)
    }

    pub fn sub_category_line(&self, key: &str) -> Option<&SubCategoryRebate> {
        self.sub_category.iter().find(|l| l.key == key)
    }
}

/// Tables a supplier rule contributes after override substitution.
struct SupplierTables<'a> {
    rebate:       &'a TierTable,
    bonus:        &'a TierTable,
    label:        String,
    has_override: bool,
}

fn supplier_tables<'a>(
    catalog: &FieldCatalog,
    key: &str,
    rule: Option<&'a ContractRule>,
    overrides: &'a OverrideIndex,
) -> SupplierTables<'a> {
    static EMPTY: TierTable = TierTable::empty();

    let (mut rebate, mut bonus, label) = match rule {
        Some(r) if r.scope == RuleScope::Supplier => {
            (&r.tiers_rebate, &r.tiers_bonus, r.label.clone())
        }
        _ => (&EMPTY, &EMPTY, catalog.label_for(key)),
    };

    let mut has_override = false;
    if let Some(t) = overrides.table_for(key, TierKind::Rebate) {
        rebate = t;
        has_override = true;
    }
    if let Some(t) = overrides.table_for(key, TierKind::Bonus) {
        bonus = t;
        has_override = true;
    }

    SupplierTables { rebate, bonus, label, has_override }
}

fn sub_category_line(
    catalog: &FieldCatalog,
    key: &str,
    volume: f64,
    rule: Option<&ContractRule>,
    overrides: &OverrideIndex,
) -> SubCategoryRebate {
    static EMPTY: TierTable = TierTable::empty();

    let (mut table, label) = match rule {
        Some(r) if r.scope == RuleScope::SubCategory => (&r.tiers_sub, r.label.clone()),
        _ => (&EMPTY, catalog.label_for(key)),
    };

    let mut has_override = false;
    if let Some(t) = overrides.table_for(key, TierKind::SubCategory) {
        table = t;
        has_override = true;
    }

    let result = evaluate(volume, table);
    SubCategoryRebate {
        key: key.to_string(),
        label,
        volume,
        selected_min: result.selected_min,
        min_threshold: result.min_threshold,
        rate: result.rate,
        value: result.value,
        triggered: result.triggered,
        has_override,
    }
}

fn finish(
    supplier: Vec<SupplierRebate>,
    sub_category: Vec<SubCategoryRebate>,
    group_bonuses: Vec<GroupBonusLine>,
    marketing: Vec<MarketingLine>,
) -> RebateBreakdown {
    let global_rebate: f64 = supplier.iter().map(|l| l.rebate.value).sum();
    let global_bonus: f64 = supplier.iter().map(|l| l.bonus.value).sum();
    let sub_category_total: f64 = sub_category.iter().map(|l| l.value).sum();
    let group_bonus_total: f64 = group_bonuses.iter().map(|l| l.value).sum();
    let marketing_total: f64 = marketing.iter().map(|l| l.amount).sum();

    let global_total = global_rebate + global_bonus;
    let grand_total = global_total + sub_category_total + group_bonus_total + marketing_total;

    RebateBreakdown {
        supplier,
        sub_category,
        group_bonuses,
        marketing,
        totals: RebateTotals {
            global_rebate:      round2(global_rebate),
            global_bonus:       round2(global_bonus),
            global_total:       round2(global_total),
            sub_category_total: round2(sub_category_total),
            group_bonus_total:  round2(group_bonus_total),
            marketing_total:    round2(marketing_total),
            grand_total:        round2(grand_total),
        },
    }
}

/// Price one entity under one member contract.
///
/// Combined-rate mode: when the contract sets `use_combined_global_rate`,
/// the tier is selected once, on the summed volume of all supplier lines
/// (using the first supplier rule's tables), and the resulting rate is
/// applied to each line's own volume. Accounting stays per supplier.
pub fn calculate(
    catalog: &FieldCatalog,
    volumes: &EntityVolumes,
    contract: &Contract,
    rules: &HashMap<FieldKey, ContractRule>,
    overrides: &OverrideIndex,
) -> RebateBreakdown {
    let combined = if contract.use_combined_global_rate {
        combined_rates(catalog, volumes, rules)
    } else {
        None
    };

    let mut supplier = Vec::new();
    for key in catalog.supplier_keys() {
        let volume = volumes.supplier_volume(&key);
        let tables = supplier_tables(catalog, &key, rules.get(&key), overrides);

        let (rebate, bonus) = match &combined {
            Some(c) => (
                c.rebate.apply_to(volume, tables.rebate.min_threshold()),
                c.bonus.apply_to(volume, tables.bonus.min_threshold()),
            ),
            None => (evaluate(volume, tables.rebate), evaluate(volume, tables.bonus)),
        };

        let total_rate = round4(rebate.rate + bonus.rate);
        let total_value = round2(rebate.value + bonus.value);
        let triggered = rebate.triggered || bonus.triggered;
        supplier.push(SupplierRebate {
            key,
            label: tables.label,
            volume,
            rebate,
            bonus,
            total_rate,
            total_value,
            triggered,
            has_override: tables.has_override,
        });
    }

    let mut sub_category = Vec::new();
    for key in catalog.sub_category_keys() {
        let volume = volumes.sub_category_volume(&key);
        sub_category.push(sub_category_line(catalog, &key, volume, rules.get(&key), overrides));
    }

    finish(supplier, sub_category, Vec::new(), Vec::new())
}

/// Combined-mode tier pick: rate and threshold selected on the total
/// volume, later applied to each line's own volume.
struct CombinedPick {
    selected_min: Option<f64>,
    rate:         f64,
}

impl CombinedPick {
    fn apply_to(&self, volume: f64, min_threshold: Option<f64>) -> TierResult {
        TierResult {
            volume,
            selected_min: self.selected_min,
            min_threshold,
            rate: self.rate,
            triggered: self.rate > 0.0,
            value: round2(volume * self.rate),
        }
    }
}

struct CombinedRates {
    rebate: CombinedPick,
    bonus:  CombinedPick,
}

const COMBINED_SCHEDULE_PREFERENCE: &[&str] =
    &["GLOBAL_ACR", "GLOBAL_DCA", "GLOBAL_ALLIANCE", "GLOBAL_EXADIS"];

fn combined_rates(
    catalog: &FieldCatalog,
    volumes: &EntityVolumes,
    rules: &HashMap<FieldKey, ContractRule>,
) -> Option<CombinedRates> {
    let total: f64 = catalog
        .supplier_keys()
        .iter()
        .map(|k| volumes.supplier_volume(k))
        .sum();

    // The combined schedule comes from the first supplier rule present,
    // preferring ACR, then DCA, ALLIANCE, EXADIS.
    let rule = COMBINED_SCHEDULE_PREFERENCE
        .iter()
        .find_map(|k| rules.get(*k))
        .filter(|r| r.scope == RuleScope::Supplier)?;

    let rebate = evaluate(total, &rule.tiers_rebate);
    let bonus = evaluate(total, &rule.tiers_bonus);
    log::debug!(
        "combined mode: total volume {total:.2}, rebate rate {:.4}, bonus rate {:.4}",
        rebate.rate,
        bonus.rate
    );
    Some(CombinedRates {
        rebate: CombinedPick { selected_min: rebate.selected_min, rate: rebate.rate },
        bonus:  CombinedPick { selected_min: bonus.selected_min, rate: bonus.rate },
    })
}

/// Merge the rule sets of several contracts into one index. Only rules
/// with at least one non-empty table participate; the first contract to
/// define a real rule for a key wins and later ones do not shadow it.
pub fn merge_rule_index<'a>(
    contracts: &'a [(Contract, HashMap<FieldKey, ContractRule>)],
) -> HashMap<FieldKey, &'a ContractRule> {
    let mut index: HashMap<FieldKey, &ContractRule> = HashMap::new();
    for (contract, rules) in contracts {
        for (key, rule) in rules {
            if !rule.has_tiers() {
                continue;
            }
            index.entry(key.clone()).or_insert_with(|| {
                log::debug!("rule {key} governed by contract '{}'", contract.name);
                rule
            });
        }
    }
    index
}

/// Price the cooperative's inbound side across its supplier contracts.
///
/// Each field key is governed by whichever contract defines a real rule
/// for it. On top of the line evaluation, supplier rules may carry named
/// group bonuses (paid on the group's aggregated volume for that line)
/// and contracts may carry marketing allowances (fixed, or a rate on the
/// line's aggregate volume).
pub fn calculate_multi_contract(
    catalog: &FieldCatalog,
    volumes: &EntityVolumes,
    contracts: &[(Contract, HashMap<FieldKey, ContractRule>)],
    volumes_by_group: Option<&BTreeMap<GroupName, GroupVolumes>>,
) -> RebateBreakdown {
    let index = merge_rule_index(contracts);
    let no_overrides = OverrideIndex::empty();

    let mut supplier = Vec::new();
    for key in catalog.supplier_keys() {
        let volume = volumes.supplier_volume(&key);
        let tables = supplier_tables(catalog, &key, index.get(&key).copied(), &no_overrides);
        let rebate = evaluate(volume, tables.rebate);
        let bonus = evaluate(volume, tables.bonus);
        let total_rate = round4(rebate.rate + bonus.rate);
        let total_value = round2(rebate.value + bonus.value);
        let triggered = rebate.triggered || bonus.triggered;
        supplier.push(SupplierRebate {
            key,
            label: tables.label,
            volume,
            rebate,
            bonus,
            total_rate,
            total_value,
            triggered,
            has_override: false,
        });
    }

    let mut sub_category = Vec::new();
    for key in catalog.sub_category_keys() {
        let volume = volumes.sub_category_volume(&key);
        sub_category.push(sub_category_line(
            catalog,
            &key,
            volume,
            index.get(&key).copied(),
            &no_overrides,
        ));
    }

    let group_bonuses = match volumes_by_group {
        Some(by_group) => group_bonus_lines(&index, by_group),
        None => Vec::new(),
    };
    let marketing = marketing_lines(catalog, volumes, contracts);

    finish(supplier, sub_category, group_bonuses, marketing)
}

fn group_bonus_lines(
    index: &HashMap<FieldKey, &ContractRule>,
    volumes_by_group: &BTreeMap<GroupName, GroupVolumes>,
) -> Vec<GroupBonusLine> {
    let mut lines = Vec::new();
    let mut keys: Vec<&FieldKey> = index.keys().collect();
    keys.sort();

    for key in keys {
        let rule = index[key];
        if rule.scope != RuleScope::Supplier || rule.bonus_groups.is_empty() {
            continue;
        }
        for bg in &rule.bonus_groups {
            let group = normalize_name(&bg.group_name);
            if group.is_empty() || bg.bonus_rate <= 0.0 {
                continue;
            }
            let Some(agg) = volumes_by_group.get(&group) else {
                continue;
            };
            let volume = agg.volumes.supplier_volume(key);
            if volume <= 0.0 {
                continue;
            }
            let value = round2(volume * bg.bonus_rate);
            log::debug!("group bonus {group} on {key}: {:.4} x {volume:.2} = {value:.2}", bg.bonus_rate);
            lines.push(GroupBonusLine {
                field_key:  key.clone(),
                group_name: group,
                label:      bg
                    .label
                    .clone()
                    .unwrap_or_else(|| format!("Bonus {}", bg.group_name)),
                volume,
                bonus_rate: bg.bonus_rate,
                value,
            });
        }
    }
    lines
}

fn marketing_lines(
    catalog: &FieldCatalog,
    volumes: &EntityVolumes,
    contracts: &[(Contract, HashMap<FieldKey, ContractRule>)],
) -> Vec<MarketingLine> {
    // Several contracts may carry a rule for the same supplier; amounts add up.
    let mut by_key: BTreeMap<FieldKey, MarketingLine> = BTreeMap::new();

    for (contract, _) in contracts {
        for (key, rule) in &contract.marketing_rules {
            let base = volumes.supplier_volume(key);
            let amount = match *rule {
                MarketingRule::Fixed { amount } => amount,
                MarketingRule::Rate { rate } => base * rate,
            };
            if amount <= 0.0 {
                continue;
            }
            by_key
                .entry(key.clone())
                .and_modify(|l| l.amount = round2(l.amount + amount))
                .or_insert_with(|| MarketingLine {
                    field_key:   key.clone(),
                    label:       catalog.label_for(key),
                    base_volume: base,
                    amount:      round2(amount),
                });
        }
    }

    by_key.into_values().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tier::TierStep;

    fn rule(id: i64, contract_id: i64, key: &str, rebate: &[(f64, f64)]) -> ContractRule {
        ContractRule {
            id,
            contract_id,
            key: key.to_string(),
            scope: RuleScope::Supplier,
            label: key.to_string(),
            tiers_rebate: TierTable::new(
                rebate.iter().map(|&(min, rate)| TierStep { min, rate }).collect(),
            )
            .unwrap(),
            tiers_bonus: TierTable::default(),
            tiers_sub: TierTable::default(),
            bonus_groups: Vec::new(),
        }
    }

    fn contract(id: i64, name: &str) -> Contract {
        use crate::catalog::ContractScope;
        use chrono::Utc;
        Contract {
            id,
            name: name.to_string(),
            description: None,
            scope: ContractScope::Cooperative,
            is_default: false,
            is_active: true,
            use_combined_global_rate: false,
            marketing_rules: HashMap::new(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn empty_placeholder_rule_does_not_shadow_real_rule() {
        let a = (
            contract(1, "UNION ACR"),
            [("GLOBAL_ACR".to_string(), rule(1, 1, "GLOBAL_ACR", &[]))]
                .into_iter()
                .collect::<HashMap<_, _>>(),
        );
        let b = (
            contract(2, "UNION DCA"),
            [("GLOBAL_ACR".to_string(), rule(2, 2, "GLOBAL_ACR", &[(1000.0, 0.02)]))]
                .into_iter()
                .collect::<HashMap<_, _>>(),
        );

        let contracts = vec![a, b];
        let index = merge_rule_index(&contracts);
        assert_eq!(index["GLOBAL_ACR"].id, 2);
    }

    #[test]
    fn first_real_rule_wins_over_later_contracts() {
        let a = (
            contract(1, "UNION ACR"),
            [("GLOBAL_ACR".to_string(), rule(1, 1, "GLOBAL_ACR", &[(1000.0, 0.02)]))]
                .into_iter()
                .collect::<HashMap<_, _>>(),
        );
        let b = (
            contract(2, "UNION DCA"),
            [("GLOBAL_ACR".to_string(), rule(2, 2, "GLOBAL_ACR", &[(500.0, 0.05)]))]
                .into_iter()
                .collect::<HashMap<_, _>>(),
        );

        let contracts = vec![a, b];
        let index = merge_rule_index(&contracts);
        assert_eq!(index["GLOBAL_ACR"].id, 1);
    }
}
