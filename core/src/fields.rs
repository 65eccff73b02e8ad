//! Field catalog — the fixed set of volume lines the engine knows about.
//!
//! A supplier line carries a member's total volume with one platform;
//! a sub-category line carries volume within a narrower product family
//! and declares which supplier line it feeds into.

use crate::types::FieldKey;
use std::collections::{HashMap, HashSet};

/// Kind of a volume line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum LineKind {
    Supplier,
    SubCategory,
}

#[derive(Debug, Clone)]
pub struct FieldDef {
    pub key:    &'static str,
    pub label:  &'static str,
    pub kind:   LineKind,
    /// Parent supplier key; set only for sub-category lines.
    pub parent: Option<&'static str>,
}

const FIELDS: &[FieldDef] = &[
    // Supplier platforms
    FieldDef { key: "GLOBAL_ACR",      label: "ACR (global)",      kind: LineKind::Supplier, parent: None },
    FieldDef { key: "GLOBAL_ALLIANCE", label: "ALLIANCE (global)", kind: LineKind::Supplier, parent: None },
    FieldDef { key: "GLOBAL_DCA",      label: "DCA (global)",      kind: LineKind::Supplier, parent: None },
    FieldDef { key: "GLOBAL_EXADIS",   label: "EXADIS (global)",   kind: LineKind::Supplier, parent: None },
    // Sub-category lines
    FieldDef { key: "TRI_DCA_SBS",              label: "DCA - SBS (NK)",                 kind: LineKind::SubCategory, parent: Some("GLOBAL_DCA") },
    FieldDef { key: "TRI_DCA_DAYCO",            label: "DCA - Dayco",                    kind: LineKind::SubCategory, parent: Some("GLOBAL_DCA") },
    FieldDef { key: "TRI_ACR_FREINAGE",         label: "ACR - Freinage",                 kind: LineKind::SubCategory, parent: Some("GLOBAL_ACR") },
    FieldDef { key: "TRI_ACR_EMBRAYAGE",        label: "ACR - Embrayage",                kind: LineKind::SubCategory, parent: Some("GLOBAL_ACR") },
    FieldDef { key: "TRI_ACR_FILTRE",           label: "ACR - Filtre",                   kind: LineKind::SubCategory, parent: Some("GLOBAL_ACR") },
    FieldDef { key: "TRI_ACR_DISTRIBUTION",     label: "ACR - Distribution",             kind: LineKind::SubCategory, parent: Some("GLOBAL_ACR") },
    FieldDef { key: "TRI_ACR_MACHINE_TOURNANTE", label: "ACR - Machine tournante",       kind: LineKind::SubCategory, parent: Some("GLOBAL_ACR") },
    FieldDef { key: "TRI_ACR_LIAISON_AU_SOL",   label: "ACR - Liaison au sol",           kind: LineKind::SubCategory, parent: Some("GLOBAL_ACR") },
    FieldDef { key: "TRI_EXADIS_FREINAGE",      label: "EXADIS - Freinage",              kind: LineKind::SubCategory, parent: Some("GLOBAL_EXADIS") },
    FieldDef { key: "TRI_EXADIS_EMBRAYAGE",     label: "EXADIS - Embrayage (LUK/SACHS)", kind: LineKind::SubCategory, parent: Some("GLOBAL_EXADIS") },
    FieldDef { key: "TRI_EXADIS_FILTRATION",    label: "EXADIS - Filtration",            kind: LineKind::SubCategory, parent: Some("GLOBAL_EXADIS") },
    FieldDef { key: "TRI_EXADIS_DISTRIBUTION",  label: "EXADIS - Distribution",          kind: LineKind::SubCategory, parent: Some("GLOBAL_EXADIS") },
    FieldDef { key: "TRI_EXADIS_ETANCHEITE",    label: "EXADIS - Etancheite (ELRING)",   kind: LineKind::SubCategory, parent: Some("GLOBAL_EXADIS") },
    FieldDef { key: "TRI_EXADIS_THERMIQUE",     label: "EXADIS - Thermique (NRF)",       kind: LineKind::SubCategory, parent: Some("GLOBAL_EXADIS") },
    FieldDef { key: "TRI_SCHAEFFLER",           label: "Schaeffler",                     kind: LineKind::SubCategory, parent: Some("GLOBAL_ALLIANCE") },
    FieldDef { key: "TRI_ALLIANCE_DELPHI",      label: "ALLIANCE - Delphi",              kind: LineKind::SubCategory, parent: Some("GLOBAL_ALLIANCE") },
    FieldDef { key: "TRI_ALLIANCE_BREMBO",      label: "ALLIANCE - Brembo ADD",          kind: LineKind::SubCategory, parent: Some("GLOBAL_ALLIANCE") },
    FieldDef { key: "TRI_ALLIANCE_SOGEFI",      label: "ALLIANCE - Sogefi",              kind: LineKind::SubCategory, parent: Some("GLOBAL_ALLIANCE") },
    FieldDef { key: "TRI_ALLIANCE_SKF",         label: "ALLIANCE - SKF",                 kind: LineKind::SubCategory, parent: Some("GLOBAL_ALLIANCE") },
    FieldDef { key: "TRI_ALLIANCE_NAPA",        label: "ALLIANCE - NAPA",                kind: LineKind::SubCategory, parent: Some("GLOBAL_ALLIANCE") },
    FieldDef { key: "TRI_PURFLUX_COOPERS",      label: "Purflux / Coopers (Alliance+ACR)", kind: LineKind::SubCategory, parent: Some("GLOBAL_ALLIANCE") },
];

/// Placeholder group labels that mean "no real group". Members filed under
/// these are always consolidated individually.
const PLACEHOLDER_GROUPS: &[&str] = &["GROUPE LES LYONNAIS", "INDEPENDANT UNION"];

/// Lookup over the fixed line catalog.
#[derive(Debug, Clone)]
pub struct FieldCatalog {
    by_key:   HashMap<&'static str, &'static FieldDef>,
    children: HashMap<&'static str, Vec<&'static str>>,
}

impl FieldCatalog {
    pub fn new() -> Self {
        let mut by_key = HashMap::new();
        let mut children: HashMap<&'static str, Vec<&'static str>> = HashMap::new();
        for def in FIELDS {
            by_key.insert(def.key, def);
            if let Some(parent) = def.parent {
                children.entry(parent).or_default().push(def.key);
            }
        }
        Self { by_key, children }
    }

    /// Supplier keys, in catalog order.
    pub fn supplier_keys(&self) -> Vec<FieldKey> {
        FIELDS
            .iter()
            .filter(|d| d.kind == LineKind::Supplier)
            .map(|d| d.key.to_string())
            .collect()
    }

    /// Sub-category keys, in catalog order.
    pub fn sub_category_keys(&self) -> Vec<FieldKey> {
        FIELDS
            .iter()
            .filter(|d| d.kind == LineKind::SubCategory)
            .map(|d| d.key.to_string())
            .collect()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.by_key.contains_key(key)
    }

    /// Display label, falling back to the key itself for unknown fields.
    pub fn label_for(&self, key: &str) -> String {
        self.by_key
            .get(key)
            .map(|d| d.label.to_string())
            .unwrap_or_else(|| key.to_string())
    }

    pub fn kind_of(&self, key: &str) -> Option<LineKind> {
        self.by_key.get(key).map(|d| d.kind)
    }

    /// Parent supplier key of a sub-category line.
    pub fn parent_of(&self, key: &str) -> Option<FieldKey> {
        self.by_key
            .get(key)
            .and_then(|d| d.parent)
            .map(|p| p.to_string())
    }

    /// Sub-category children of a supplier line.
    pub fn children_of(&self, supplier_key: &str) -> Vec<FieldKey> {
        self.children
            .get(supplier_key)
            .map(|v| v.iter().map(|k| k.to_string()).collect())
            .unwrap_or_default()
    }

    /// Group labels that never consolidate as real groups.
    pub fn placeholder_groups(&self) -> HashSet<String> {
        PLACEHOLDER_GROUPS.iter().map(|g| g.to_string()).collect()
    }
}

impl Default for FieldCatalog {
    fn default() -> Self {
        Self::new()
    }
}

/// Normalize an entity name for comparison: trim + uppercase.
/// "Acme" and " ACME " must key the same group.
pub fn normalize_name(value: &str) -> String {
    value.trim().to_uppercase()
}
