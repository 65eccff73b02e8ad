use rfa_core::aggregation::{aggregate_by_group, aggregate_by_member, RowRecord};
use rfa_core::opportunity::{BalanceStatus, OpportunityAnalyzer};
use rfa_core::recap::EntityKind;
use rfa_core::resolver::BatchResolver;
use rfa_core::store::{NewContract, NewRule};
use rfa_core::{seed, CatalogStore, FieldCatalog, RfaError};
use std::collections::HashMap;

fn row(code: &str, group: &str, amounts: &[(&str, f64)]) -> RowRecord {
    RowRecord {
        member_code: code.to_string(),
        member_name: String::new(),
        group_name: group.to_string(),
        amounts: amounts
            .iter()
            .map(|&(k, v)| (k.to_string(), v))
            .collect::<HashMap<_, _>>(),
    }
}

/// Member contract: ACR 1% at 20 000, 1.5% at 50 000; Freinage 4% at
/// 50 000. Cooperative contract: ACR 2% at 100 000.
fn fixture_store() -> CatalogStore {
    let store = CatalogStore::in_memory().unwrap();
    store.migrate().unwrap();

    let member = store
        .insert_contract(&NewContract::member("STANDARD").default_contract())
        .unwrap();
    store
        .insert_rule(
            member,
            &NewRule::supplier(
                "GLOBAL_ACR",
                "ACR",
                seed::table(&[(20_000.0, 0.01), (50_000.0, 0.015)]).unwrap(),
                seed::table(&[]).unwrap(),
            ),
        )
        .unwrap();
    store
        .insert_rule(
            member,
            &NewRule::sub_category(
                "TRI_ACR_FREINAGE",
                "ACR - Freinage",
                seed::table(&[(50_000.0, 0.04)]).unwrap(),
            ),
        )
        .unwrap();

    let coop = store
        .insert_contract(&NewContract::cooperative("GROUPEMENT UNION"))
        .unwrap();
    store
        .insert_rule(
            coop,
            &NewRule::supplier(
                "GLOBAL_ACR",
                "ACR",
                seed::table(&[(100_000.0, 0.02)]).unwrap(),
                seed::table(&[]).unwrap(),
            ),
        )
        .unwrap();

    store
}

#[test]
fn near_flag_and_projected_gain() {
    let catalog = FieldCatalog::new();
    let store = fixture_store();
    let resolver = BatchResolver::load(&store).unwrap();
    let analyzer = OpportunityAnalyzer::new(&catalog, &resolver);

    // 45 000 is 90% of the next step (50 000) -> near.
    let rows = vec![row("M001", "", &[("GLOBAL_ACR", 45_000.0)])];
    let by_member = aggregate_by_member(&rows, &catalog);
    let report = analyzer.analyze(&by_member, &Default::default());

    assert_eq!(report.summary.total_near, 1);
    let top = &report.top_gains[0];
    assert_eq!(top.entity_id, "M001");
    assert_eq!(top.objective.key, "GLOBAL_ACR");
    assert!((top.objective.progress - 90.0).abs() < 1e-9);
    assert_eq!(top.objective.missing_volume, Some(5_000.0));
    // At 50 000 the 1.5% step pays 750; currently 45 000 x 1% = 450.
    assert_eq!(top.objective.projected_gain, Some(300.0));
}

#[test]
fn achieved_flag_when_every_step_is_met() {
    let catalog = FieldCatalog::new();
    let store = fixture_store();
    let resolver = BatchResolver::load(&store).unwrap();
    let analyzer = OpportunityAnalyzer::new(&catalog, &resolver);

    let rows = vec![row("M001", "", &[("GLOBAL_ACR", 60_000.0)])];
    let by_member = aggregate_by_member(&rows, &catalog);
    let report = analyzer.analyze(&by_member, &Default::default());

    assert_eq!(report.summary.total_near, 0);
    assert_eq!(report.summary.total_achieved, 1);
}

#[test]
fn loss_line_when_members_are_paid_with_nothing_inbound() {
    let catalog = FieldCatalog::new();
    let store = fixture_store();
    let resolver = BatchResolver::load(&store).unwrap();
    let analyzer = OpportunityAnalyzer::new(&catalog, &resolver);

    // One member above its own threshold, cooperative far below 100 000.
    let rows = vec![row("M001", "", &[("GLOBAL_ACR", 30_000.0)])];
    let by_member = aggregate_by_member(&rows, &catalog);
    let report = analyzer.analyze(&by_member, &Default::default());

    let acr = report.balance.iter().find(|b| b.key == "GLOBAL_ACR").unwrap();
    assert_eq!(acr.status, BalanceStatus::Loss);
    assert_eq!(acr.inbound, 0.0);
    assert_eq!(acr.outbound, 300.0);
    assert_eq!(acr.margin, -300.0);
    assert_eq!(acr.members_paid, 1);
    assert_eq!(report.summary.loss_count, 1);
    // Worst margin sorts first.
    assert_eq!(report.balance[0].key, "GLOBAL_ACR");
}

/// Member and cooperative schedules on all four suppliers, shaped so
/// each balance status shows up on a different line.
fn balance_fixture_store() -> CatalogStore {
    let store = CatalogStore::in_memory().unwrap();
    store.migrate().unwrap();

    let member = store
        .insert_contract(&NewContract::member("STANDARD").default_contract())
        .unwrap();
    let member_tables = [
        ("GLOBAL_ACR", "ACR", 20_000.0, 0.02),
        ("GLOBAL_DCA", "DCA", 20_000.0, 0.005),
        ("GLOBAL_ALLIANCE", "Alliance", 100_000.0, 0.01),
        ("GLOBAL_EXADIS", "Exadis", 100_000.0, 0.01),
    ];
    for (key, label, min, rate) in member_tables {
        store
            .insert_rule(
                member,
                &NewRule::supplier(
                    key,
                    label,
                    seed::table(&[(min, rate)]).unwrap(),
                    seed::table(&[]).unwrap(),
                ),
            )
            .unwrap();
    }

    let coop = store
        .insert_contract(&NewContract::cooperative("GROUPEMENT UNION"))
        .unwrap();
    let coop_tables = [
        ("GLOBAL_ACR", "ACR", 0.01),
        ("GLOBAL_DCA", "DCA", 0.02),
        ("GLOBAL_ALLIANCE", "Alliance", 0.02),
        ("GLOBAL_EXADIS", "Exadis", 0.01),
    ];
    for (key, label, rate) in coop_tables {
        store
            .insert_rule(
                coop,
                &NewRule::supplier(
                    key,
                    label,
                    seed::table(&[(50_000.0, rate)]).unwrap(),
                    seed::table(&[]).unwrap(),
                ),
            )
            .unwrap();
    }

    store
}

#[test]
fn balance_lines_classify_deficit_margin_and_pure_margin() {
    let catalog = FieldCatalog::new();
    let store = balance_fixture_store();
    let resolver = BatchResolver::load(&store).unwrap();
    let analyzer = OpportunityAnalyzer::new(&catalog, &resolver);

    let rows = vec![row(
        "M001",
        "",
        &[
            ("GLOBAL_ACR", 60_000.0),
            ("GLOBAL_DCA", 60_000.0),
            ("GLOBAL_ALLIANCE", 60_000.0),
            ("GLOBAL_EXADIS", 10_000.0),
        ],
    )];
    let by_member = aggregate_by_member(&rows, &catalog);
    let report = analyzer.analyze(&by_member, &Default::default());

    let line = |key: &str| report.balance.iter().find(|b| b.key == key).unwrap();

    // ACR pays the member 1 200 while the cooperative earns only 600.
    let acr = line("GLOBAL_ACR");
    assert_eq!(acr.status, BalanceStatus::Deficit);
    assert_eq!(acr.inbound, 600.0);
    assert_eq!(acr.outbound, 1_200.0);
    assert_eq!(acr.margin, -600.0);

    // DCA earns 1 200 against 300 paid out.
    let dca = line("GLOBAL_DCA");
    assert_eq!(dca.status, BalanceStatus::Margin);
    assert_eq!(dca.margin, 900.0);

    // Alliance earns with no member payout at all.
    let alliance = line("GLOBAL_ALLIANCE");
    assert_eq!(alliance.status, BalanceStatus::PureMargin);
    assert_eq!(alliance.inbound, 1_200.0);
    assert_eq!(alliance.outbound, 0.0);

    // Exadis moves nothing in either direction.
    assert_eq!(line("GLOBAL_EXADIS").status, BalanceStatus::Balanced);

    // Worst margin first; a deficit counts as a loss line.
    assert_eq!(report.balance[0].key, "GLOBAL_ACR");
    assert_eq!(report.summary.loss_count, 1);
    assert_eq!(report.summary.gain_count, 2);
    assert_eq!(report.summary.total_inbound, 3_000.0);
    assert_eq!(report.summary.total_outbound, 1_500.0);
    assert_eq!(report.summary.total_margin, 1_500.0);
}

#[test]
fn double_lever_nets_inbound_gain_against_entity_gains() {
    let catalog = FieldCatalog::new();
    let store = fixture_store();
    let resolver = BatchResolver::load(&store).unwrap();
    let analyzer = OpportunityAnalyzer::new(&catalog, &resolver);

    // Two members at 45 000 each: both near their own 50 000 step, and
    // the cooperative at 90 000 is near its 100 000 threshold.
    let rows = vec![
        row("M001", "", &[("GLOBAL_ACR", 45_000.0)]),
        row("M002", "", &[("GLOBAL_ACR", 45_000.0)]),
    ];
    let by_member = aggregate_by_member(&rows, &catalog);
    let report = analyzer.analyze(&by_member, &Default::default());

    assert_eq!(report.summary.coop_near_count, 1);
    assert_eq!(report.double_levers.len(), 1);

    let lever = &report.double_levers[0];
    assert_eq!(lever.coop_objective.key, "GLOBAL_ACR");
    assert_eq!(lever.count_near, 2);
    // Inbound at 100 000: 2 000 gained from zero. Each member gains 300.
    assert_eq!(lever.coop_gain, 2_000.0);
    assert_eq!(lever.total_entity_gain, 600.0);
    assert_eq!(lever.net_margin, 1_400.0);
    assert_eq!(lever.top_contributors.len(), 2);
}

#[test]
fn cascade_links_a_sub_category_to_its_near_parent() {
    let catalog = FieldCatalog::new();
    let store = fixture_store();
    let resolver = BatchResolver::load(&store).unwrap();
    let analyzer = OpportunityAnalyzer::new(&catalog, &resolver);

    // Freinage at 45 000 (90% of 50 000) and ACR also at 45 000: pushing
    // the sub-category moves both.
    let rows = vec![row(
        "M001",
        "",
        &[("GLOBAL_ACR", 45_000.0), ("TRI_ACR_FREINAGE", 45_000.0)],
    )];
    let by_member = aggregate_by_member(&rows, &catalog);
    let report = analyzer.analyze(&by_member, &Default::default());

    let c = report
        .cascade
        .iter()
        .find(|c| c.entity_id == "M001" && c.sub_key == "TRI_ACR_FREINAGE")
        .unwrap();
    assert_eq!(c.supplier_key, "GLOBAL_ACR");
    assert!(c.supplier_near);
    assert!(c.impact_count >= 2);
    // The sub-category gain: 50 000 x 4% from zero.
    assert_eq!(c.sub_gain, 2_000.0);
}

#[test]
fn purchase_plan_pushes_near_subs_and_closes_the_supplier_gap() {
    let catalog = FieldCatalog::new();
    let store = fixture_store();
    let resolver = BatchResolver::load(&store).unwrap();
    let analyzer = OpportunityAnalyzer::new(&catalog, &resolver);

    let rows = vec![row(
        "M001",
        "",
        &[("GLOBAL_ACR", 45_000.0), ("TRI_ACR_FREINAGE", 45_000.0)],
    )];
    let by_member = aggregate_by_member(&rows, &catalog);
    let report = analyzer.analyze(&by_member, &Default::default());

    let plan = report
        .purchase_plans
        .iter()
        .find(|p| p.entity_id == "M001" && p.supplier_key == "GLOBAL_ACR")
        .unwrap();
    assert_eq!(plan.items.len(), 1);
    assert_eq!(plan.items[0].key, "TRI_ACR_FREINAGE");
    assert_eq!(plan.items[0].push, 5_000.0);
    // The 5 000 push on Freinage also closes the supplier's own 5 000 gap.
    assert!(plan.supplier_unlocked);
    assert_eq!(plan.residual, 0.0);
    assert_eq!(plan.tiers_unlocked, 2);
    assert_eq!(plan.total_planned, 5_000.0);
}

#[test]
fn plan_offers_an_extra_push_when_the_residual_stays_reasonable() {
    let catalog = FieldCatalog::new();
    let store = fixture_store();
    let resolver = BatchResolver::load(&store).unwrap();
    let analyzer = OpportunityAnalyzer::new(&catalog, &resolver);

    // The 5 000 Freinage push covers only half of the 10 000 supplier
    // gap; the leftover equals what is already planned, so topping it up
    // is offered.
    let rows = vec![row(
        "M001",
        "",
        &[("GLOBAL_ACR", 40_000.0), ("TRI_ACR_FREINAGE", 45_000.0)],
    )];
    let by_member = aggregate_by_member(&rows, &catalog);
    let report = analyzer.analyze(&by_member, &Default::default());

    let plan = report
        .purchase_plans
        .iter()
        .find(|p| p.entity_id == "M001" && p.supplier_key == "GLOBAL_ACR")
        .unwrap();
    assert!(!plan.supplier_unlocked);
    assert_eq!(plan.total_planned, 5_000.0);
    assert_eq!(plan.residual, 5_000.0);
    assert!(plan.extra_reasonable);
    assert_eq!(plan.extra_push, 5_000.0);
    assert_eq!(plan.total_with_extra, 10_000.0);
    assert_eq!(plan.tiers_unlocked, 1);
    assert_eq!(plan.tiers_with_extra, 2);
    // Base gain is the sub-category alone; the extra also unlocks the
    // supplier step (750 at 1.5% against 400 today).
    assert_eq!(plan.gain_base, 2_000.0);
    assert_eq!(plan.gain_with_extra, 2_350.0);
}

#[test]
fn plan_allows_a_small_residual_above_the_planned_volume() {
    let catalog = FieldCatalog::new();
    let store = fixture_store();
    let resolver = BatchResolver::load(&store).unwrap();
    let analyzer = OpportunityAnalyzer::new(&catalog, &resolver);

    // Planned pushes total 2 000 but the leftover 4 000 is still small
    // enough to offer.
    let rows = vec![row(
        "M001",
        "",
        &[("GLOBAL_ACR", 44_000.0), ("TRI_ACR_FREINAGE", 48_000.0)],
    )];
    let by_member = aggregate_by_member(&rows, &catalog);
    let report = analyzer.analyze(&by_member, &Default::default());

    let plan = report
        .purchase_plans
        .iter()
        .find(|p| p.entity_id == "M001" && p.supplier_key == "GLOBAL_ACR")
        .unwrap();
    assert_eq!(plan.total_planned, 2_000.0);
    assert_eq!(plan.residual, 4_000.0);
    assert!(plan.extra_reasonable);
    assert_eq!(plan.extra_push, 4_000.0);
    assert_eq!(plan.tiers_with_extra, 2);
}

#[test]
fn plan_withholds_the_extra_push_when_the_residual_is_too_large() {
    let catalog = FieldCatalog::new();
    let store = fixture_store();
    let resolver = BatchResolver::load(&store).unwrap();
    let analyzer = OpportunityAnalyzer::new(&catalog, &resolver);

    // Leftover 8 000 exceeds both the planned 2 000 and the small-push
    // ceiling, so only the sub-category push is reported.
    let rows = vec![row(
        "M001",
        "",
        &[("GLOBAL_ACR", 40_000.0), ("TRI_ACR_FREINAGE", 48_000.0)],
    )];
    let by_member = aggregate_by_member(&rows, &catalog);
    let report = analyzer.analyze(&by_member, &Default::default());

    let plan = report
        .purchase_plans
        .iter()
        .find(|p| p.entity_id == "M001" && p.supplier_key == "GLOBAL_ACR")
        .unwrap();
    assert!(!plan.supplier_unlocked);
    assert_eq!(plan.residual, 8_000.0);
    assert!(!plan.extra_reasonable);
    assert_eq!(plan.extra_push, 0.0);
    assert_eq!(plan.tiers_unlocked, 1);
    assert_eq!(plan.tiers_with_extra, 1);
}

#[test]
fn multi_member_groups_are_analyzed_and_single_member_groups_skipped() {
    let catalog = FieldCatalog::new();
    let store = fixture_store();
    let resolver = BatchResolver::load(&store).unwrap();
    let analyzer = OpportunityAnalyzer::new(&catalog, &resolver);

    let rows = vec![
        row("M001", "GROUPE X", &[("GLOBAL_ACR", 25_000.0)]),
        row("M002", "GROUPE X", &[("GLOBAL_ACR", 20_000.0)]),
        row("M003", "GROUPE SOLO", &[("GLOBAL_ACR", 45_000.0)]),
    ];
    let by_member = aggregate_by_member(&rows, &catalog);
    let by_group = aggregate_by_group(&rows, &catalog);
    let report = analyzer.analyze(&by_member, &by_group);

    // GROUPE X at 45 000 is near 50 000; GROUPE SOLO only counts through
    // its single member, never as a group of its own.
    assert!(report
        .top_gains
        .iter()
        .any(|e| e.entity_id == "GROUPE X" && e.entity_kind == EntityKind::Group));
    assert!(!report
        .top_gains
        .iter()
        .any(|e| e.entity_id == "GROUPE SOLO" && e.entity_kind == EntityKind::Group));
}

#[test]
fn outbound_totals_do_not_double_count_grouped_members() {
    let catalog = FieldCatalog::new();
    let store = fixture_store();
    let resolver = BatchResolver::load(&store).unwrap();
    let analyzer = OpportunityAnalyzer::new(&catalog, &resolver);

    // Both members trigger individually AND as a group; outbound must
    // count the group value only.
    let rows = vec![
        row("M001", "GROUPE X", &[("GLOBAL_ACR", 25_000.0)]),
        row("M002", "GROUPE X", &[("GLOBAL_ACR", 30_000.0)]),
    ];
    let by_member = aggregate_by_member(&rows, &catalog);
    let by_group = aggregate_by_group(&rows, &catalog);
    let report = analyzer.analyze(&by_member, &by_group);

    let acr = report.balance.iter().find(|b| b.key == "GLOBAL_ACR").unwrap();
    // 55 000 as a group at 1.5% = 825, not 250 + 300 on top of it.
    assert_eq!(acr.outbound, 825.0);
}

#[test]
fn entity_profile_reports_what_if_deltas() {
    let catalog = FieldCatalog::new();
    let store = fixture_store();
    let resolver = BatchResolver::load(&store).unwrap();
    let analyzer = OpportunityAnalyzer::new(&catalog, &resolver);

    let rows = vec![row("M001", "", &[("GLOBAL_ACR", 45_000.0)])];
    let by_member = aggregate_by_member(&rows, &catalog);

    let profile = analyzer
        .entity_profile(EntityKind::Member, "M001", &by_member, &Default::default(), 50_000.0)
        .unwrap();

    assert_eq!(profile.contract_name, "STANDARD");
    assert_eq!(profile.total_value, 450.0);
    assert_eq!(profile.near_count, 1);
    assert_eq!(profile.gain_potential, 300.0);

    let acr = profile.deltas.iter().find(|d| d.key == "GLOBAL_ACR").unwrap();
    // +50 000 -> 95 000 at 1.5% = 1 425, a gain of 975 over today's 450.
    assert_eq!(acr.gain_if_add, 975.0);
    // -50 000 -> below every threshold, today's 450 is lost entirely.
    assert_eq!(acr.loss_if_sub, 450.0);
}

#[test]
fn unknown_entity_yields_entity_not_found() {
    let catalog = FieldCatalog::new();
    let store = fixture_store();
    let resolver = BatchResolver::load(&store).unwrap();
    let analyzer = OpportunityAnalyzer::new(&catalog, &resolver);

    let err = analyzer
        .entity_profile(
            EntityKind::Member,
            "NOPE",
            &Default::default(),
            &Default::default(),
            50_000.0,
        )
        .unwrap_err();
    assert!(matches!(err, RfaError::EntityNotFound { .. }));
}

#[test]
fn alerts_cover_losses_and_levers_without_duplicates() {
    let catalog = FieldCatalog::new();
    let store = fixture_store();
    let resolver = BatchResolver::load(&store).unwrap();
    let analyzer = OpportunityAnalyzer::new(&catalog, &resolver);

    let rows = vec![
        row("M001", "", &[("GLOBAL_ACR", 45_000.0)]),
        row("M002", "", &[("GLOBAL_ACR", 45_000.0)]),
    ];
    let by_member = aggregate_by_member(&rows, &catalog);
    let report = analyzer.analyze(&by_member, &Default::default());

    assert!(!report.alerts.is_empty());
    assert!(report.alerts.len() <= 15);

    // No two alerts point at the same entity/key pair.
    let mut seen = std::collections::HashSet::new();
    for a in &report.alerts {
        if let Some(id) = &a.entity_id {
            assert!(seen.insert((id.clone(), a.key.clone())));
        }
    }
}
