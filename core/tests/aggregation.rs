use rfa_core::aggregation::{aggregate_by_group, aggregate_by_member, group_conflicts, RowRecord};
use rfa_core::dataset::DatasetSnapshot;
use rfa_core::{DataIntegrityWarning, FieldCatalog};
use std::collections::HashMap;

fn row(code: &str, name: &str, group: &str, amounts: &[(&str, f64)]) -> RowRecord {
    RowRecord {
        member_code: code.to_string(),
        member_name: name.to_string(),
        group_name: group.to_string(),
        amounts: amounts
            .iter()
            .map(|&(k, v)| (k.to_string(), v))
            .collect::<HashMap<_, _>>(),
    }
}

#[test]
fn rows_sum_field_wise_per_member() {
    let catalog = FieldCatalog::new();
    let rows = vec![
        row("M001", "Garage A", "", &[("GLOBAL_ACR", 10_000.0), ("TRI_ACR_FREINAGE", 2_000.0)]),
        row("M001", "Garage A", "", &[("GLOBAL_ACR", 5_000.0)]),
        row("M002", "Garage B", "", &[("GLOBAL_DCA", 7_500.0)]),
    ];

    let by_member = aggregate_by_member(&rows, &catalog);
    assert_eq!(by_member.len(), 2);

    let m1 = &by_member["M001"];
    assert_eq!(m1.volumes.supplier_volume("GLOBAL_ACR"), 15_000.0);
    assert_eq!(m1.volumes.sub_category_volume("TRI_ACR_FREINAGE"), 2_000.0);
    assert_eq!(m1.member_name.as_deref(), Some("Garage A"));

    let m2 = &by_member["M002"];
    assert_eq!(m2.volumes.supplier_volume("GLOBAL_DCA"), 7_500.0);
    assert_eq!(m2.volumes.supplier_volume("GLOBAL_ACR"), 0.0);
}

#[test]
fn group_names_fold_case_and_whitespace() {
    let catalog = FieldCatalog::new();
    let rows = vec![
        row("M001", "A", "Groupe Apa", &[("GLOBAL_ACR", 10_000.0)]),
        row("M002", "B", "  GROUPE APA ", &[("GLOBAL_ACR", 20_000.0)]),
    ];

    let by_group = aggregate_by_group(&rows, &catalog);
    assert_eq!(by_group.len(), 1);

    let g = &by_group["GROUPE APA"];
    assert_eq!(g.volumes.supplier_volume("GLOBAL_ACR"), 30_000.0);
    assert_eq!(g.member_codes.len(), 2);
}

#[test]
fn rows_without_member_code_are_dropped() {
    let catalog = FieldCatalog::new();
    let rows = vec![
        row("", "Orphan", "GROUPE APA", &[("GLOBAL_ACR", 99_000.0)]),
        row("  ", "Blank", "", &[("GLOBAL_DCA", 99_000.0)]),
        row("M001", "A", "", &[("GLOBAL_ACR", 1_000.0)]),
    ];

    let by_member = aggregate_by_member(&rows, &catalog);
    assert_eq!(by_member.len(), 1);
    assert!(by_member.contains_key("M001"));

    let by_group = aggregate_by_group(&rows, &catalog);
    assert!(by_group.is_empty());
}

#[test]
fn ungrouped_rows_contribute_to_no_group() {
    let catalog = FieldCatalog::new();
    let rows = vec![
        row("M001", "A", "", &[("GLOBAL_ACR", 10_000.0)]),
        row("M002", "B", "GROUPE APA", &[("GLOBAL_ACR", 5_000.0)]),
    ];

    let by_group = aggregate_by_group(&rows, &catalog);
    assert_eq!(by_group.len(), 1);
    assert_eq!(by_group["GROUPE APA"].volumes.supplier_volume("GLOBAL_ACR"), 5_000.0);
}

#[test]
fn unknown_amount_keys_are_ignored() {
    let catalog = FieldCatalog::new();
    let rows = vec![row(
        "M001",
        "A",
        "",
        &[("GLOBAL_ACR", 1_000.0), ("NOT_A_FIELD", 50_000.0)],
    )];

    let by_member = aggregate_by_member(&rows, &catalog);
    let m = &by_member["M001"];
    assert_eq!(m.volumes.grand_total(), 1_000.0);
}

#[test]
fn totals_derive_from_the_per_field_maps() {
    let catalog = FieldCatalog::new();
    let rows = vec![row(
        "M001",
        "A",
        "",
        &[
            ("GLOBAL_ACR", 10_000.5),
            ("GLOBAL_DCA", 4_999.5),
            ("TRI_ACR_FREINAGE", 3_000.0),
            ("TRI_DCA_SBS", 2_000.0),
        ],
    )];

    let by_member = aggregate_by_member(&rows, &catalog);
    let v = &by_member["M001"].volumes;
    assert_eq!(v.global_total(), 15_000.0);
    assert_eq!(v.sub_category_total(), 5_000.0);
    assert_eq!(v.grand_total(), v.global_total() + v.sub_category_total());
}

#[test]
fn conflicting_group_rows_keep_the_first_attribution_and_are_flagged() {
    let catalog = FieldCatalog::new();
    let rows = vec![
        row("M001", "A", "GROUPE APA", &[("GLOBAL_ACR", 10_000.0)]),
        row("M001", "A", "groupe apa ", &[("GLOBAL_ACR", 2_000.0)]),
        row("M001", "A", "GROUPE X", &[("GLOBAL_ACR", 5_000.0)]),
        row("M001", "A", "GROUPE X", &[("GLOBAL_ACR", 1_000.0)]),
    ];

    let by_member = aggregate_by_member(&rows, &catalog);
    assert_eq!(by_member["M001"].group_name, "GROUPE APA");

    // One warning per conflicting group, not per row.
    let warnings = group_conflicts(&rows);
    assert_eq!(
        warnings,
        vec![DataIntegrityWarning::InconsistentGroup {
            member_code: "M001".to_string(),
            kept:        "GROUPE APA".to_string(),
            ignored:     "GROUPE X".to_string(),
        }]
    );
}

#[test]
fn snapshot_surfaces_group_conflicts() {
    let catalog = FieldCatalog::new();
    let rows = vec![
        row("M001", "A", "GROUPE APA", &[("GLOBAL_ACR", 10_000.0)]),
        row("M001", "A", "GROUPE X", &[("GLOBAL_ACR", 5_000.0)]),
        row("M002", "B", "GROUPE APA", &[("GLOBAL_ACR", 20_000.0)]),
    ];

    let snapshot = DatasetSnapshot::build(rows, &catalog);
    assert_eq!(snapshot.warnings.len(), 1);
    assert!(matches!(
        &snapshot.warnings[0],
        DataIntegrityWarning::InconsistentGroup { member_code, .. } if member_code == "M001"
    ));
}

#[test]
fn member_and_group_views_partition_the_same_rows() {
    let catalog = FieldCatalog::new();
    let rows = vec![
        row("M001", "A", "GROUPE APA", &[("GLOBAL_ACR", 10_000.0)]),
        row("M002", "B", "GROUPE APA", &[("GLOBAL_ACR", 20_000.0)]),
        row("M003", "C", "", &[("GLOBAL_ACR", 5_000.0)]),
    ];

    let by_member = aggregate_by_member(&rows, &catalog);
    let by_group = aggregate_by_group(&rows, &catalog);

    let member_sum: f64 = by_member
        .values()
        .map(|m| m.volumes.supplier_volume("GLOBAL_ACR"))
        .sum();
    let grouped_sum = by_group["GROUPE APA"].volumes.supplier_volume("GLOBAL_ACR");
    // The group view is a re-slicing of the same rows, not extra volume.
    assert_eq!(member_sum, 35_000.0);
    assert_eq!(grouped_sum, 30_000.0);
}
