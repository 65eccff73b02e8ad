//! SQLite persistence for the contract catalog.
//!
//! RULE: Only store.rs talks to the database.
//! Resolvers and calculators call store methods — they never execute SQL.
//!
//! Tier tables live as JSON text in the database and are validated on
//! read: a rule whose payload fails validation degrades to an empty
//! table; an override that fails validation is dropped and reported.

use crate::{
    catalog::{
        Assignment, Contract, ContractRule, ContractScope, GroupBonus, MarketingRule, Override,
        RuleScope, TargetType, TierKind,
    },
    error::{DataIntegrityWarning, RfaError, RfaResult},
    fields::{normalize_name, FieldCatalog},
    tier::TierTable,
    types::{ContractId, FieldKey},
};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;

pub struct CatalogStore {
    conn: Connection,
}

/// Insertion payload for a contract.
#[derive(Debug, Clone, Default)]
pub struct NewContract {
    pub name:        String,
    pub description: Option<String>,
    pub scope:       Option<ContractScope>,
    pub is_default:  bool,
    pub is_active:   bool,
    pub use_combined_global_rate: bool,
    pub marketing_rules: HashMap<FieldKey, MarketingRule>,
}

impl NewContract {
    pub fn member(name: &str) -> Self {
        Self {
            name: name.to_string(),
            scope: Some(ContractScope::Member),
            is_active: true,
            ..Default::default()
        }
    }

    pub fn cooperative(name: &str) -> Self {
        Self {
            name: name.to_string(),
            scope: Some(ContractScope::Cooperative),
            is_active: true,
            ..Default::default()
        }
    }

    pub fn default_contract(mut self) -> Self {
        self.is_default = true;
        self
    }

    pub fn combined_rate(mut self) -> Self {
        self.use_combined_global_rate = true;
        self
    }
}

/// Insertion payload for a contract rule.
#[derive(Debug, Clone)]
pub struct NewRule {
    pub key:          FieldKey,
    pub scope:        RuleScope,
    pub label:        String,
    pub tiers_rebate: TierTable,
    pub tiers_bonus:  TierTable,
    pub tiers_sub:    TierTable,
    pub bonus_groups: Vec<GroupBonus>,
}

impl NewRule {
    pub fn supplier(key: &str, label: &str, rebate: TierTable, bonus: TierTable) -> Self {
        Self {
            key: key.to_string(),
            scope: RuleScope::Supplier,
            label: label.to_string(),
            tiers_rebate: rebate,
            tiers_bonus: bonus,
            tiers_sub: TierTable::default(),
            bonus_groups: Vec::new(),
        }
    }

    pub fn sub_category(key: &str, label: &str, tiers: TierTable) -> Self {
        Self {
            key: key.to_string(),
            scope: RuleScope::SubCategory,
            label: label.to_string(),
            tiers_rebate: TierTable::default(),
            tiers_bonus: TierTable::default(),
            tiers_sub: tiers,
            bonus_groups: Vec::new(),
        }
    }

    pub fn with_group_bonus(mut self, group_name: &str, bonus_rate: f64, label: &str) -> Self {
        self.bonus_groups.push(GroupBonus {
            group_name: group_name.to_string(),
            bonus_rate,
            label: Some(label.to_string()),
        });
        self
    }
}

impl CatalogStore {
    /// Open (or create) the catalog database at `path`.
    pub fn open(path: &str) -> RfaResult<Self> {
        let conn = Connection::open(path)?;
        // WAL mode only for real files (:memory: ignores it).
        let _ = conn.execute_batch("PRAGMA journal_mode=WAL;");
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self { conn })
    }

    /// Open an in-memory database (used in tests).
    pub fn in_memory() -> RfaResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self { conn })
    }

    /// Apply all schema migrations in order.
    pub fn migrate(&self) -> RfaResult<()> {
        self.conn
            .execute_batch(include_str!("../../migrations/001_catalog.sql"))?;
        Ok(())
    }

    // ── Contracts ──────────────────────────────────────────────

    pub fn insert_contract(&self, new: &NewContract) -> RfaResult<ContractId> {
        let now = Utc::now().to_rfc3339();
        let marketing_json = if new.marketing_rules.is_empty() {
            None
        } else {
            Some(serde_json::to_string(&new.marketing_rules)?)
        };
        self.conn.execute(
            "INSERT INTO contract
               (name, description, scope, is_default, is_active,
                use_combined_global_rate, marketing_rules, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)",
            params![
                new.name,
                new.description,
                new.scope.unwrap_or(ContractScope::Member).as_str(),
                new.is_default,
                new.is_active,
                new.use_combined_global_rate,
                marketing_json,
                now,
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn contract(&self, id: ContractId) -> RfaResult<Contract> {
        let row = self
            .conn
            .query_row(
                "SELECT id, name, description, scope, is_default, is_active,
                        use_combined_global_rate, marketing_rules, created_at, updated_at
                 FROM contract WHERE id = ?1",
                params![id],
                Self::map_contract,
            )
            .optional()?;
        row.ok_or(RfaError::ContractNotFound { id })
    }

    /// All contracts, ordered by name (stable fallback order).
    pub fn all_contracts(&self) -> RfaResult<Vec<Contract>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, name, description, scope, is_default, is_active,
                    use_combined_global_rate, marketing_rules, created_at, updated_at
             FROM contract ORDER BY name ASC, id ASC",
        )?;
        let contracts = stmt
            .query_map([], Self::map_contract)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(contracts)
    }

    fn map_contract(row: &rusqlite::Row<'_>) -> rusqlite::Result<Contract> {
        let scope_str: String = row.get(3)?;
        let marketing_json: Option<String> = row.get(7)?;
        let marketing_rules = marketing_json
            .as_deref()
            .and_then(|j| match serde_json::from_str(j) {
                Ok(m) => Some(m),
                Err(e) => {
                    log::warn!("contract row {}: malformed marketing rules ignored: {e}",
                        row.get::<_, i64>(0).unwrap_or_default());
                    None
                }
            })
            .unwrap_or_default();
        let created: String = row.get(8)?;
        let updated: String = row.get(9)?;
        Ok(Contract {
            id: row.get(0)?,
            name: row.get(1)?,
            description: row.get(2)?,
            scope: ContractScope::parse(&scope_str).unwrap_or(ContractScope::Member),
            is_default: row.get(4)?,
            is_active: row.get(5)?,
            use_combined_global_rate: row.get(6)?,
            marketing_rules,
            created_at: created.parse().unwrap_or_else(|_| Utc::now()),
            updated_at: updated.parse().unwrap_or_else(|_| Utc::now()),
        })
    }

    // ── Rules ──────────────────────────────────────────────────

    pub fn insert_rule(&self, contract_id: ContractId, new: &NewRule) -> RfaResult<i64> {
        let now = Utc::now().to_rfc3339();
        let bonus_groups_json = if new.bonus_groups.is_empty() {
            None
        } else {
            Some(serde_json::to_string(&new.bonus_groups)?)
        };
        self.conn.execute(
            "INSERT INTO contract_rule
               (contract_id, key, scope, label, tiers_rebate, tiers_bonus, tiers_sub,
                bonus_groups, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)",
            params![
                contract_id,
                new.key,
                new.scope.as_str(),
                new.label,
                serde_json::to_string(&new.tiers_rebate)?,
                serde_json::to_string(&new.tiers_bonus)?,
                serde_json::to_string(&new.tiers_sub)?,
                bonus_groups_json,
                now,
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// All rules of one contract, indexed by field key.
    pub fn rules_for_contract(
        &self,
        contract_id: ContractId,
    ) -> RfaResult<HashMap<FieldKey, ContractRule>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, contract_id, key, scope, label, tiers_rebate, tiers_bonus, tiers_sub,
                    bonus_groups
             FROM contract_rule WHERE contract_id = ?1",
        )?;
        let rules = stmt
            .query_map(params![contract_id], Self::map_rule)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rules.into_iter().map(|r| (r.key.clone(), r)).collect())
    }

    /// Every rule of every contract, indexed contract -> key -> rule.
    /// One query; feeds the batch resolver path.
    pub fn all_rules(&self) -> RfaResult<HashMap<ContractId, HashMap<FieldKey, ContractRule>>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, contract_id, key, scope, label, tiers_rebate, tiers_bonus, tiers_sub,
                    bonus_groups
             FROM contract_rule",
        )?;
        let rules = stmt
            .query_map([], Self::map_rule)?
            .collect::<Result<Vec<_>, _>>()?;
        let mut by_contract: HashMap<ContractId, HashMap<FieldKey, ContractRule>> = HashMap::new();
        for rule in rules {
            by_contract
                .entry(rule.contract_id)
                .or_default()
                .insert(rule.key.clone(), rule);
        }
        Ok(by_contract)
    }

    fn map_rule(row: &rusqlite::Row<'_>) -> rusqlite::Result<ContractRule> {
        let id: i64 = row.get(0)?;
        let key: String = row.get(2)?;
        let scope_str: String = row.get(3)?;
        let parse_table = |col: usize, which: &str| -> TierTable {
            let json = row.get::<_, Option<String>>(col).ok().flatten();
            match json {
                None => TierTable::default(),
                Some(j) => TierTable::from_json(&j).unwrap_or_else(|e| {
                    log::warn!("rule {id} ({key}): {which} table ignored: {e}");
                    TierTable::default()
                }),
            }
        };
        let tiers_rebate = parse_table(5, "rebate");
        let tiers_bonus = parse_table(6, "bonus");
        let tiers_sub = parse_table(7, "sub-category");
        let bonus_groups_json: Option<String> = row.get(8)?;
        let bonus_groups = bonus_groups_json
            .as_deref()
            .and_then(|j| match serde_json::from_str::<Vec<GroupBonus>>(j) {
                Ok(list) => Some(list),
                Err(e) => {
                    log::warn!("rule {id} ({key}): bonus_groups ignored: {e}");
                    None
                }
            })
            .unwrap_or_default();
        Ok(ContractRule {
            id,
            contract_id: row.get(1)?,
            key,
            scope: RuleScope::parse(&scope_str).unwrap_or(RuleScope::Supplier),
            label: row.get(4)?,
            tiers_rebate,
            tiers_bonus,
            tiers_sub,
            bonus_groups,
        })
    }

    // ── Assignments ────────────────────────────────────────────

    pub fn insert_assignment(
        &self,
        contract_id: ContractId,
        target_type: TargetType,
        target_value: &str,
    ) -> RfaResult<i64> {
        // Member-code bindings outrank group-name bindings.
        let priority = match target_type {
            TargetType::MemberCode => 100,
            TargetType::GroupName => 50,
        };
        self.conn.execute(
            "INSERT INTO contract_assignment
               (contract_id, target_type, target_value, priority, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                contract_id,
                target_type.as_str(),
                normalize_name(target_value),
                priority,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn all_assignments(&self) -> RfaResult<Vec<Assignment>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, contract_id, target_type, target_value, priority
             FROM contract_assignment ORDER BY priority DESC, id ASC",
        )?;
        let assignments = stmt
            .query_map([], |row| {
                let tt: String = row.get(2)?;
                Ok(Assignment {
                    id: row.get(0)?,
                    contract_id: row.get(1)?,
                    target_type: TargetType::parse(&tt).unwrap_or(TargetType::MemberCode),
                    target_value: row.get(3)?,
                    priority: row.get(4)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(assignments)
    }

    // ── Overrides ──────────────────────────────────────────────

    pub fn insert_override(
        &self,
        target_type: TargetType,
        target_value: &str,
        field_key: &str,
        tier_kind: TierKind,
        custom_tiers_json: &str,
    ) -> RfaResult<i64> {
        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO contract_override
               (target_type, target_value, field_key, tier_kind, custom_tiers, is_active,
                created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, 1, ?6, ?6)",
            params![
                target_type.as_str(),
                normalize_name(target_value),
                field_key,
                tier_kind.as_str(),
                custom_tiers_json,
                now,
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Active overrides for one target. Malformed payloads are dropped
    /// and reported so a single bad override never breaks a report.
    pub fn overrides_for_target(
        &self,
        target_type: TargetType,
        target_value: &str,
    ) -> RfaResult<(Vec<Override>, Vec<DataIntegrityWarning>)> {
        let mut stmt = self.conn.prepare(
            "SELECT id, target_type, target_value, field_key, tier_kind, custom_tiers, is_active
             FROM contract_override
             WHERE target_type = ?1 AND target_value = ?2 AND is_active = 1",
        )?;
        let rows = stmt
            .query_map(
                params![target_type.as_str(), normalize_name(target_value)],
                Self::map_override_raw,
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::validate_overrides(rows))
    }

    /// Every active override, one query; feeds the batch resolver path.
    pub fn all_overrides(&self) -> RfaResult<(Vec<Override>, Vec<DataIntegrityWarning>)> {
        let mut stmt = self.conn.prepare(
            "SELECT id, target_type, target_value, field_key, tier_kind, custom_tiers, is_active
             FROM contract_override WHERE is_active = 1",
        )?;
        let rows = stmt
            .query_map([], Self::map_override_raw)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::validate_overrides(rows))
    }

    #[allow(clippy::type_complexity)]
    fn map_override_raw(
        row: &rusqlite::Row<'_>,
    ) -> rusqlite::Result<(i64, String, String, String, String, String, bool)> {
        Ok((
            row.get(0)?,
            row.get(1)?,
            row.get(2)?,
            row.get(3)?,
            row.get(4)?,
            row.get(5)?,
            row.get(6)?,
        ))
    }

    fn validate_overrides(
        rows: Vec<(i64, String, String, String, String, String, bool)>,
    ) -> (Vec<Override>, Vec<DataIntegrityWarning>) {
        let catalog = FieldCatalog::new();
        let mut overrides = Vec::new();
        let mut warnings = Vec::new();
        for (id, tt, tv, field_key, kind, custom_tiers, is_active) in rows {
            let (Some(target_type), Some(tier_kind)) =
                (TargetType::parse(&tt), TierKind::parse(&kind))
            else {
                log::warn!("override {id}: unknown target/kind '{tt}'/'{kind}', skipped");
                continue;
            };
            if !catalog.contains(&field_key) {
                log::warn!("override {id} ({tv}): unknown field key '{field_key}', skipped");
                warnings.push(DataIntegrityWarning::UnknownOverrideField {
                    target: tv,
                    field_key,
                });
                continue;
            }
            match TierTable::from_json(&custom_tiers) {
                Ok(table) if !table.is_empty() => overrides.push(Override {
                    id,
                    target_type,
                    target_value: tv,
                    field_key,
                    tier_kind,
                    table,
                    is_active,
                }),
                Ok(_) => {} // empty payload: nothing to substitute
                Err(e) => {
                    log::warn!("override {id} ({tv}/{field_key}): {e}, skipped");
                    warnings.push(DataIntegrityWarning::MalformedOverride {
                        target:    tv,
                        field_key,
                        tier_kind: kind,
                    });
                }
            }
        }
        (overrides, warnings)
    }
}
