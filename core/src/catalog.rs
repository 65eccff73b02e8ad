//! Durable catalog records: contracts, rules, assignments, overrides.
//!
//! These are created and edited by administrative tooling and read-only
//! from the engine's perspective. Tier tables and marketing rules are
//! parsed into validated types at the store boundary; nothing downstream
//! touches raw JSON.

use crate::tier::TierTable;
use crate::types::{ContractId, FieldKey};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Which side of the cooperative a contract governs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContractScope {
    /// Member-facing: what the cooperative pays a member.
    Member,
    /// Cooperative-facing: what a supplier pays the cooperative.
    Cooperative,
}

impl ContractScope {
    pub fn as_str(self) -> &'static str {
        match self {
            ContractScope::Member => "MEMBER",
            ContractScope::Cooperative => "COOPERATIVE",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "MEMBER" => Some(ContractScope::Member),
            "COOPERATIVE" => Some(ContractScope::Cooperative),
            _ => None,
        }
    }
}

/// What an assignment or override targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TargetType {
    MemberCode,
    GroupName,
}

impl TargetType {
    pub fn as_str(self) -> &'static str {
        match self {
            TargetType::MemberCode => "MEMBER_CODE",
            TargetType::GroupName => "GROUP_NAME",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "MEMBER_CODE" => Some(TargetType::MemberCode),
            "GROUP_NAME" => Some(TargetType::GroupName),
            _ => None,
        }
    }
}

/// Which of a rule's tables an override replaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TierKind {
    Rebate,
    Bonus,
    SubCategory,
}

impl TierKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TierKind::Rebate => "rebate",
            TierKind::Bonus => "bonus",
            TierKind::SubCategory => "sub",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "rebate" => Some(TierKind::Rebate),
            "bonus" => Some(TierKind::Bonus),
            "sub" => Some(TierKind::SubCategory),
            _ => None,
        }
    }
}

/// Scope of a contract rule: supplier line or sub-category line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RuleScope {
    Supplier,
    SubCategory,
}

impl RuleScope {
    pub fn as_str(self) -> &'static str {
        match self {
            RuleScope::Supplier => "SUPPLIER",
            RuleScope::SubCategory => "SUB_CATEGORY",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "SUPPLIER" => Some(RuleScope::Supplier),
            "SUB_CATEGORY" => Some(RuleScope::SubCategory),
            _ => None,
        }
    }
}

/// Marketing-allowance rule for one supplier line: either a flat amount
/// or a rate applied to that line's aggregate volume.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MarketingRule {
    Fixed { amount: f64 },
    Rate { rate: f64 },
}

#[derive(Debug, Clone, Serialize)]
pub struct Contract {
    pub id:          ContractId,
    pub name:        String,
    pub description: Option<String>,
    pub scope:       ContractScope,
    pub is_default:  bool,
    pub is_active:   bool,
    /// Combined-rate mode: the tier is picked on the summed volume of all
    /// supplier lines, then applied to each line's own volume.
    pub use_combined_global_rate: bool,
    /// Marketing allowances keyed by supplier field.
    pub marketing_rules: HashMap<FieldKey, MarketingRule>,
    pub created_at:  DateTime<Utc>,
    pub updated_at:  DateTime<Utc>,
}

/// Flat extra rate granted to a named member-group on one supplier line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupBonus {
    #[serde(alias = "groupe_client", alias = "groupeClient")]
    pub group_name: String,
    #[serde(alias = "bonusRate")]
    pub bonus_rate: f64,
    #[serde(default)]
    pub label:      Option<String>,
}

/// Tier tables of one contract for one field key.
#[derive(Debug, Clone, Serialize)]
pub struct ContractRule {
    pub id:          i64,
    pub contract_id: ContractId,
    pub key:         FieldKey,
    pub scope:       RuleScope,
    pub label:       String,
    /// Primary rebate table (supplier lines).
    pub tiers_rebate: TierTable,
    /// Bonus table (supplier lines).
    pub tiers_bonus: TierTable,
    /// Single table (sub-category lines).
    pub tiers_sub:   TierTable,
    pub bonus_groups: Vec<GroupBonus>,
}

impl ContractRule {
    /// A rule with only empty placeholder tables carries no pricing and
    /// must not shadow a real rule from another contract.
    pub fn has_tiers(&self) -> bool {
        !self.tiers_rebate.is_empty() || !self.tiers_bonus.is_empty() || !self.tiers_sub.is_empty()
    }
}

/// Binding of a member code or group name to a contract.
/// Member-code assignments outrank group-name assignments.
#[derive(Debug, Clone, Serialize)]
pub struct Assignment {
    pub id:           i64,
    pub contract_id:  ContractId,
    pub target_type:  TargetType,
    /// Stored normalized (trimmed uppercase).
    pub target_value: String,
    pub priority:     i64,
}

/// Per-entity substitute tier table for one (field, kind) slot.
#[derive(Debug, Clone, Serialize)]
pub struct Override {
    pub id:           i64,
    pub target_type:  TargetType,
    pub target_value: String,
    pub field_key:    FieldKey,
    pub tier_kind:    TierKind,
    pub table:        TierTable,
    pub is_active:    bool,
}
