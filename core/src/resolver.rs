//! Contract and override resolution.
//!
//! `ContractResolver` is the injection seam: the calculator and the
//! analyzer never look contracts up themselves, they are handed a
//! resolver. Two implementations: `StoreResolver` hits the catalog per
//! call; `BatchResolver` preloads everything once and answers from an
//! immutable snapshot (one snapshot per analysis pass, rebuilt on the
//! next pass, never mutated in place).

use crate::{
    catalog::{Assignment, Contract, ContractRule, ContractScope, Override, TargetType, TierKind},
    error::{DataIntegrityWarning, RfaError, RfaResult},
    fields::normalize_name,
    store::CatalogStore,
    tier::TierTable,
    types::{ContractId, FieldKey},
};
use std::collections::HashMap;

/// Resolves the single member-scope contract applicable to an entity.
pub trait ContractResolver {
    fn resolve(
        &self,
        member_code: Option<&str>,
        group_name: Option<&str>,
    ) -> RfaResult<Contract>;
}

/// Names that mark a contract as cooperative-facing. Contract scope is
/// authoritative; this filter only guards against mis-tagged rows.
/// TODO: retire once the catalog enforces scope at write time.
fn looks_cooperative(name: &str) -> bool {
    let lower = name.to_lowercase();
    lower.contains("union") || lower.contains("groupement") || lower.contains("purflux")
}

fn resolve_from_snapshot(
    assignments: &[Assignment],
    contracts_by_id: &HashMap<ContractId, Contract>,
    member_code: Option<&str>,
    group_name: Option<&str>,
) -> RfaResult<Contract> {
    let find_assigned = |target_type: TargetType, value: &str| -> Option<Contract> {
        let norm = normalize_name(value);
        for a in assignments {
            if a.target_type != target_type || a.target_value != norm {
                continue;
            }
            match contracts_by_id.get(&a.contract_id) {
                Some(c) if c.is_active && c.scope == ContractScope::Member => {
                    log::debug!("resolver: {value} -> '{}' via {:?} assignment", c.name, target_type);
                    return Some(c.clone());
                }
                Some(c) if c.scope != ContractScope::Member => {
                    log::warn!(
                        "resolver: assignment for {value} points at cooperative contract '{}', ignored",
                        c.name
                    );
                }
                Some(c) => {
                    log::warn!("resolver: assignment for {value} points at inactive contract '{}'", c.name);
                }
                None => {}
            }
        }
        None
    };

    // 1) Member-code assignment outranks everything.
    if let Some(code) = member_code.filter(|c| !c.trim().is_empty()) {
        if let Some(c) = find_assigned(TargetType::MemberCode, code) {
            return Ok(c);
        }
    }

    // 2) Group-name assignment.
    if let Some(group) = group_name.filter(|g| !g.trim().is_empty()) {
        if let Some(c) = find_assigned(TargetType::GroupName, group) {
            return Ok(c);
        }
    }

    // Ordered by name: all_contracts() returns them sorted, and the
    // snapshot preserves that order through the id list below.
    let mut ordered: Vec<&Contract> = contracts_by_id.values().collect();
    ordered.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));

    // 3) The unique member-scope default.
    if let Some(c) = ordered
        .iter()
        .find(|c| c.scope == ContractScope::Member && c.is_default && c.is_active)
    {
        log::debug!("resolver: falling back to default member contract '{}'", c.name);
        return Ok((*c).clone());
    }

    // 4) First active member contract that does not look cooperative
    //    (defensive filter against mis-tagged rows).
    if let Some(c) = ordered
        .iter()
        .find(|c| c.scope == ContractScope::Member && c.is_active && !looks_cooperative(&c.name))
    {
        log::debug!("resolver: falling back to first active member contract '{}'", c.name);
        return Ok((*c).clone());
    }

    Err(RfaError::NoContractAvailable {
        member_code: member_code.map(|s| s.to_string()),
        group_name:  group_name.map(|s| s.to_string()),
    })
}

/// Per-call resolver: queries the catalog on every `resolve`.
pub struct StoreResolver<'a> {
    store: &'a CatalogStore,
}

impl<'a> StoreResolver<'a> {
    pub fn new(store: &'a CatalogStore) -> Self {
        Self { store }
    }
}

impl ContractResolver for StoreResolver<'_> {
    fn resolve(
        &self,
        member_code: Option<&str>,
        group_name: Option<&str>,
    ) -> RfaResult<Contract> {
        let assignments = self.store.all_assignments()?;
        let contracts = self
            .store
            .all_contracts()?
            .into_iter()
            .map(|c| (c.id, c))
            .collect();
        resolve_from_snapshot(&assignments, &contracts, member_code, group_name)
    }
}

/// Preloaded resolver: all assignments, contracts, rules and overrides
/// in four queries, then every lookup is in-memory. Required by the
/// opportunity analyzer, which resolves once per member and per group.
pub struct BatchResolver {
    assignments:     Vec<Assignment>,
    contracts_by_id: HashMap<ContractId, Contract>,
    rules_by_contract: HashMap<ContractId, HashMap<FieldKey, ContractRule>>,
    overrides:       OverrideCache,
    warnings:        Vec<DataIntegrityWarning>,
}

impl BatchResolver {
    pub fn load(store: &CatalogStore) -> RfaResult<Self> {
        let assignments = store.all_assignments()?;
        let contracts_by_id: HashMap<ContractId, Contract> = store
            .all_contracts()?
            .into_iter()
            .map(|c| (c.id, c))
            .collect();
        let rules_by_contract = store.all_rules()?;
        let (all_overrides, warnings) = store.all_overrides()?;
        log::info!(
            "batch resolver: {} contracts, {} assignments, {} overrides preloaded",
            contracts_by_id.len(),
            assignments.len(),
            all_overrides.len()
        );
        Ok(Self {
            assignments,
            contracts_by_id,
            rules_by_contract,
            overrides: OverrideCache::from_rows(all_overrides),
            warnings,
        })
    }

    /// Rules of one contract, from the snapshot.
    pub fn rules_for(&self, contract_id: ContractId) -> HashMap<FieldKey, ContractRule> {
        self.rules_by_contract
            .get(&contract_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Overrides of one entity, from the snapshot.
    pub fn overrides_for(&self, target_type: TargetType, target_value: &str) -> OverrideIndex {
        self.overrides.get(target_type, target_value)
    }

    /// Active cooperative-scope contracts whose name marks them as
    /// cooperative-facing, paired with their rule sets.
    pub fn cooperative_contracts(&self) -> Vec<(Contract, HashMap<FieldKey, ContractRule>)> {
        let mut contracts: Vec<&Contract> = self
            .contracts_by_id
            .values()
            .filter(|c| {
                c.scope == ContractScope::Cooperative && c.is_active && looks_cooperative(&c.name)
            })
            .collect();
        contracts.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        contracts
            .into_iter()
            .map(|c| (c.clone(), self.rules_for(c.id)))
            .collect()
    }

    /// Validation problems found while preloading (malformed overrides).
    pub fn warnings(&self) -> &[DataIntegrityWarning] {
        &self.warnings
    }
}

impl ContractResolver for BatchResolver {
    fn resolve(
        &self,
        member_code: Option<&str>,
        group_name: Option<&str>,
    ) -> RfaResult<Contract> {
        resolve_from_snapshot(&self.assignments, &self.contracts_by_id, member_code, group_name)
    }
}

/// Active cooperative contracts straight from the store (non-batch path).
pub fn cooperative_contracts(
    store: &CatalogStore,
) -> RfaResult<Vec<(Contract, HashMap<FieldKey, ContractRule>)>> {
    let mut out = Vec::new();
    for contract in store.all_contracts()? {
        if contract.scope == ContractScope::Cooperative
            && contract.is_active
            && looks_cooperative(&contract.name)
        {
            let rules = store.rules_for_contract(contract.id)?;
            out.push((contract, rules));
        }
    }
    Ok(out)
}

// ── Overrides ────────────────────────────────────────────────────────────────

/// Per-entity override lookup: (field key, tier kind) -> substitute table.
/// At most one active override per slot by schema constraint.
#[derive(Debug, Clone, Default)]
pub struct OverrideIndex {
    tables: HashMap<(FieldKey, TierKind), TierTable>,
}

impl OverrideIndex {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Load the active overrides of one entity from the store.
    pub fn for_target(
        store: &CatalogStore,
        target_type: TargetType,
        target_value: &str,
    ) -> RfaResult<(Self, Vec<DataIntegrityWarning>)> {
        let (rows, warnings) = store.overrides_for_target(target_type, target_value)?;
        let mut tables = HashMap::new();
        for ov in rows {
            tables.insert((ov.field_key, ov.tier_kind), ov.table);
        }
        Ok((Self { tables }, warnings))
    }

    pub fn table_for(&self, field_key: &str, kind: TierKind) -> Option<&TierTable> {
        self.tables.get(&(field_key.to_string(), kind))
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

/// All overrides grouped per target, for the batch path.
#[derive(Debug, Clone, Default)]
struct OverrideCache {
    by_target: HashMap<(TargetType, String), OverrideIndex>,
}

impl OverrideCache {
    fn from_rows(rows: Vec<Override>) -> Self {
        let mut by_target: HashMap<(TargetType, String), OverrideIndex> = HashMap::new();
        for ov in rows {
            by_target
                .entry((ov.target_type, ov.target_value.clone()))
                .or_default()
                .tables
                .insert((ov.field_key, ov.tier_kind), ov.table);
        }
        Self { by_target }
    }

    fn get(&self, target_type: TargetType, target_value: &str) -> OverrideIndex {
        self.by_target
            .get(&(target_type, normalize_name(target_value)))
            .cloned()
            .unwrap_or_default()
    }
}
