use rfa_core::catalog::TargetType;
use rfa_core::resolver::{BatchResolver, ContractResolver, StoreResolver};
use rfa_core::store::{NewContract, NewRule};
use rfa_core::{seed, CatalogStore, DataIntegrityWarning, RfaError};

fn store_with_default() -> CatalogStore {
    let store = CatalogStore::in_memory().unwrap();
    store.migrate().unwrap();
    store
        .insert_contract(&NewContract::member("BASE_STANDARD").default_contract())
        .unwrap();
    store
}

#[test]
fn member_code_assignment_outranks_group_assignment() {
    let store = store_with_default();
    let special = store
        .insert_contract(&NewContract::member("SPECIAL_M100"))
        .unwrap();
    let group_contract = store
        .insert_contract(&NewContract::member("GROUP_X_TERMS"))
        .unwrap();
    store
        .insert_assignment(special, TargetType::MemberCode, "M100")
        .unwrap();
    store
        .insert_assignment(group_contract, TargetType::GroupName, "GROUPE X")
        .unwrap();

    let resolver = StoreResolver::new(&store);

    // Member binding wins even when the group also has one.
    let c = resolver.resolve(Some("M100"), Some("GROUPE X")).unwrap();
    assert_eq!(c.id, special);

    // Other members of the group get the group contract.
    let c = resolver.resolve(Some("M200"), Some("GROUPE X")).unwrap();
    assert_eq!(c.id, group_contract);
}

#[test]
fn assignment_lookup_normalizes_names() {
    let store = store_with_default();
    let id = store.insert_contract(&NewContract::member("GROUP_X_TERMS")).unwrap();
    store
        .insert_assignment(id, TargetType::GroupName, "  Groupe X ")
        .unwrap();

    let resolver = StoreResolver::new(&store);
    let c = resolver.resolve(None, Some("GROUPE X")).unwrap();
    assert_eq!(c.id, id);
}

#[test]
fn unassigned_member_falls_back_to_the_default_contract() {
    let store = store_with_default();
    let resolver = StoreResolver::new(&store);
    let c = resolver.resolve(Some("M999"), None).unwrap();
    assert_eq!(c.name, "BASE_STANDARD");
    assert!(c.is_default);
}

#[test]
fn assignment_to_inactive_contract_is_skipped() {
    let store = store_with_default();
    let mut inactive = NewContract::member("RETIRED_TERMS");
    inactive.is_active = false;
    let id = store.insert_contract(&inactive).unwrap();
    store
        .insert_assignment(id, TargetType::MemberCode, "M100")
        .unwrap();

    let resolver = StoreResolver::new(&store);
    let c = resolver.resolve(Some("M100"), None).unwrap();
    assert_eq!(c.name, "BASE_STANDARD");
}

#[test]
fn assignment_to_cooperative_contract_is_ignored() {
    let store = store_with_default();
    let coop = store
        .insert_contract(&NewContract::cooperative("GROUPEMENT UNION"))
        .unwrap();
    store
        .insert_assignment(coop, TargetType::MemberCode, "M100")
        .unwrap();

    let resolver = StoreResolver::new(&store);
    let c = resolver.resolve(Some("M100"), None).unwrap();
    assert_eq!(c.name, "BASE_STANDARD");
}

#[test]
fn without_a_default_the_first_active_member_contract_wins() {
    let store = CatalogStore::in_memory().unwrap();
    store.migrate().unwrap();
    store.insert_contract(&NewContract::member("ZZZ_LAST")).unwrap();
    store.insert_contract(&NewContract::member("AAA_FIRST")).unwrap();

    let resolver = StoreResolver::new(&store);
    let c = resolver.resolve(Some("M001"), None).unwrap();
    assert_eq!(c.name, "AAA_FIRST");
}

#[test]
fn cooperative_looking_member_contract_is_not_a_fallback() {
    let store = CatalogStore::in_memory().unwrap();
    store.migrate().unwrap();
    // Mis-tagged row: member scope but a cooperative-sounding name.
    store
        .insert_contract(&NewContract::member("GROUPEMENT UNION"))
        .unwrap();
    store.insert_contract(&NewContract::member("STANDARD")).unwrap();

    let resolver = StoreResolver::new(&store);
    let c = resolver.resolve(Some("M001"), None).unwrap();
    assert_eq!(c.name, "STANDARD");
}

#[test]
fn empty_catalog_yields_no_contract_available() {
    let store = CatalogStore::in_memory().unwrap();
    store.migrate().unwrap();

    let resolver = StoreResolver::new(&store);
    let err = resolver.resolve(Some("M001"), Some("GROUPE X")).unwrap_err();
    assert!(matches!(err, RfaError::NoContractAvailable { .. }));
}

#[test]
fn batch_resolver_matches_the_per_call_resolver() {
    let store = store_with_default();
    let special = store.insert_contract(&NewContract::member("SPECIAL_M100")).unwrap();
    store
        .insert_assignment(special, TargetType::MemberCode, "M100")
        .unwrap();

    let per_call = StoreResolver::new(&store);
    let batch = BatchResolver::load(&store).unwrap();

    for (code, group) in [
        (Some("M100"), None),
        (Some("M200"), None),
        (Some("M100"), Some("GROUPE X")),
        (None, Some("GROUPE X")),
    ] {
        let a = per_call.resolve(code, group).unwrap();
        let b = batch.resolve(code, group).unwrap();
        assert_eq!(a.id, b.id, "divergence for {code:?}/{group:?}");
    }
}

#[test]
fn batch_resolver_serves_rules_and_overrides_from_the_snapshot() {
    let store = store_with_default();
    let id = store
        .insert_contract(&NewContract::member("WITH_RULES"))
        .unwrap();
    store
        .insert_rule(
            id,
            &NewRule::supplier(
                "GLOBAL_ACR",
                "ACR",
                seed::table(&[(20_000.0, 0.01)]).unwrap(),
                seed::table(&[]).unwrap(),
            ),
        )
        .unwrap();
    store
        .insert_override(
            TargetType::MemberCode,
            "M100",
            "GLOBAL_ACR",
            rfa_core::catalog::TierKind::Rebate,
            r#"[{"min": 0, "rate": 0.05}]"#,
        )
        .unwrap();

    let batch = BatchResolver::load(&store).unwrap();

    let rules = batch.rules_for(id);
    assert!(rules.contains_key("GLOBAL_ACR"));

    let overrides = batch.overrides_for(TargetType::MemberCode, "M100");
    assert!(overrides
        .table_for("GLOBAL_ACR", rfa_core::catalog::TierKind::Rebate)
        .is_some());
    // Other members see no override.
    assert!(batch
        .overrides_for(TargetType::MemberCode, "M200")
        .is_empty());
}

#[test]
fn malformed_override_is_dropped_and_reported() {
    let store = store_with_default();
    store
        .insert_override(
            TargetType::MemberCode,
            "M100",
            "GLOBAL_ACR",
            rfa_core::catalog::TierKind::Rebate,
            "not json at all",
        )
        .unwrap();

    let batch = BatchResolver::load(&store).unwrap();
    assert_eq!(batch.warnings().len(), 1);
    assert!(batch
        .overrides_for(TargetType::MemberCode, "M100")
        .is_empty());
}

#[test]
fn override_on_an_unknown_field_is_dropped_and_reported() {
    let store = store_with_default();
    store
        .insert_override(
            TargetType::MemberCode,
            "M100",
            "NOT_A_REAL_FIELD",
            rfa_core::catalog::TierKind::Rebate,
            r#"[{"min": 0, "rate": 0.5}]"#,
        )
        .unwrap();

    let batch = BatchResolver::load(&store).unwrap();
    assert_eq!(batch.warnings().len(), 1);
    assert!(matches!(
        &batch.warnings()[0],
        DataIntegrityWarning::UnknownOverrideField { target, field_key }
            if target == "M100" && field_key == "NOT_A_REAL_FIELD"
    ));
    assert!(batch
        .overrides_for(TargetType::MemberCode, "M100")
        .is_empty());
}

#[test]
fn cooperative_contracts_exclude_member_scope_and_inactive_rows() {
    let store = store_with_default();
    store
        .insert_contract(&NewContract::cooperative("GROUPEMENT UNION"))
        .unwrap();
    let mut retired = NewContract::cooperative("UNION OLD");
    retired.is_active = false;
    store.insert_contract(&retired).unwrap();

    let batch = BatchResolver::load(&store).unwrap();
    let coops = batch.cooperative_contracts();
    assert_eq!(coops.len(), 1);
    assert_eq!(coops[0].0.name, "GROUPEMENT UNION");
}
