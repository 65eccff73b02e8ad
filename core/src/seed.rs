//! Default tier schedules and catalog seeding.
//!
//! `seed_default_catalog` creates the standard member contract plus the
//! cooperative's inbound contract, so a fresh database prices volumes
//! the same way the production schedules do.

use crate::{
    error::{RfaError, RfaResult},
    fields::FieldCatalog,
    store::{CatalogStore, NewContract, NewRule},
    tier::{TierStep, TierTable},
    types::ContractId,
};

/// Rebate schedule shared by the four supplier platforms.
pub const SUPPLIER_REBATE_TIERS: &[(f64, f64)] = &[
    (20_000.0, 0.01),
    (50_000.0, 0.015),
    (75_000.0, 0.02),
    (100_000.0, 0.025),
    (150_000.0, 0.03),
    (200_000.0, 0.035),
];

/// Bonus schedule shared by the four supplier platforms.
pub const SUPPLIER_BONUS_TIERS: &[(f64, f64)] = &[
    (20_000.0, 0.005),
    (50_000.0, 0.01),
    (75_000.0, 0.015),
    (100_000.0, 0.02),
    (150_000.0, 0.025),
    (200_000.0, 0.03),
];

/// Default schedule of one sub-category line, if it has one.
pub fn sub_category_tiers(key: &str) -> &'static [(f64, f64)] {
    match key {
        "TRI_DCA_SBS" => &[(25_000.0, 0.03)],
        "TRI_SCHAEFFLER" => &[(20_000.0, 0.05)],
        "TRI_ALLIANCE_DELPHI" | "TRI_ALLIANCE_BREMBO" => &[(20_000.0, 0.08)],
        "TRI_ALLIANCE_SOGEFI" => &[(20_000.0, 0.04)],
        "TRI_ACR_FREINAGE" | "TRI_ACR_EMBRAYAGE" => &[(50_000.0, 0.04)],
        "TRI_ACR_FILTRE" => &[(25_000.0, 0.015)],
        "TRI_ACR_DISTRIBUTION" => &[(25_000.0, 0.03)],
        // Unconditional 2% remuneration lines.
        "TRI_ACR_MACHINE_TOURNANTE" | "TRI_ACR_LIAISON_AU_SOL" => &[(0.0, 0.02)],
        "TRI_EXADIS_EMBRAYAGE" => &[(50_000.0, 0.04)],
        "TRI_EXADIS_FILTRATION" => &[(25_000.0, 0.02)],
        "TRI_EXADIS_DISTRIBUTION" => &[(25_000.0, 0.03)],
        "TRI_EXADIS_ETANCHEITE" => &[(5_000.0, 0.02)],
        "TRI_EXADIS_THERMIQUE" => &[(5_000.0, 0.015)],
        _ => &[],
    }
}

/// Build a validated table from a (min, rate) slice.
pub fn table(steps: &[(f64, f64)]) -> RfaResult<TierTable> {
    TierTable::new(steps.iter().map(|&(min, rate)| TierStep { min, rate }).collect())
        .map_err(|e| RfaError::Other(anyhow::anyhow!(e)))
}

/// Contracts created by `seed_default_catalog`.
#[derive(Debug, Clone, Copy)]
pub struct SeededContracts {
    pub member_contract:      ContractId,
    pub cooperative_contract: ContractId,
}

fn seed_rules(
    store: &CatalogStore,
    catalog: &FieldCatalog,
    contract_id: ContractId,
) -> RfaResult<()> {
    for key in catalog.supplier_keys() {
        store.insert_rule(
            contract_id,
            &NewRule::supplier(
                &key,
                &catalog.label_for(&key),
                table(SUPPLIER_REBATE_TIERS)?,
                table(SUPPLIER_BONUS_TIERS)?,
            ),
        )?;
    }
    for key in catalog.sub_category_keys() {
        let steps = sub_category_tiers(&key);
        if steps.is_empty() {
            continue;
        }
        store.insert_rule(
            contract_id,
            &NewRule::sub_category(&key, &catalog.label_for(&key), table(steps)?),
        )?;
    }
    Ok(())
}

/// Seed the standard member contract and the cooperative inbound
/// contract with the default schedules. Skipped when any contract
/// already exists.
pub fn seed_default_catalog(
    store: &CatalogStore,
    catalog: &FieldCatalog,
) -> RfaResult<Option<SeededContracts>> {
    if !store.all_contracts()?.is_empty() {
        log::info!("seed: catalog already populated, skipping");
        return Ok(None);
    }

    let mut member = NewContract::member("BASE_STANDARD").default_contract();
    member.description = Some("Standard contract with the default schedules".to_string());
    let member_contract = store.insert_contract(&member)?;
    seed_rules(store, catalog, member_contract)?;

    let mut coop = NewContract::cooperative("GROUPEMENT UNION");
    coop.description = Some("Inbound supplier schedules for the cooperative".to_string());
    let cooperative_contract = store.insert_contract(&coop)?;
    seed_rules(store, catalog, cooperative_contract)?;

    log::info!(
        "seed: created contracts {member_contract} (member default) and \
         {cooperative_contract} (cooperative)"
    );
    Ok(Some(SeededContracts { member_contract, cooperative_contract }))
}
