//! rfa-runner: headless pipeline runner for the rebate engine.
//!
//! Usage:
//!   rfa-runner --seed 12345 --members 40 --db catalog.db
//!   rfa-runner --seed 12345 --json
//!   rfa-runner --profile M0007 --delta 50000
//!   rfa-runner --dissolve "GROUPE APA"

use anyhow::Result;
use rand::Rng;
use rand::SeedableRng;
use rand_pcg::Pcg64;
use rfa_core::{
    aggregation::RowRecord,
    dataset::DatasetStore,
    opportunity::{OpportunityAnalyzer, OpportunityReport, DEFAULT_DELTA},
    recap::{recap, EntityKind, GlobalRecap},
    resolver::BatchResolver,
    seed::seed_default_catalog,
    CatalogStore, FieldCatalog,
};
use std::collections::HashSet;
use std::env;

#[derive(serde::Serialize)]
struct RunReport<'a> {
    recap:       &'a GlobalRecap,
    opportunity: &'a OpportunityReport,
}

fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let seed = parse_arg(&args, "--seed", 42u64);
    let members = parse_arg(&args, "--members", 40usize);
    let delta = parse_arg(&args, "--delta", DEFAULT_DELTA);
    let json = args.iter().any(|a| a == "--json");
    let db = args
        .windows(2)
        .find(|w| w[0] == "--db")
        .map(|w| w[1].as_str())
        .unwrap_or(":memory:");
    let profile = args
        .windows(2)
        .find(|w| w[0] == "--profile")
        .map(|w| w[1].as_str());
    let dissolved: HashSet<String> = args
        .windows(2)
        .filter(|w| w[0] == "--dissolve")
        .map(|w| w[1].clone())
        .collect();

    if !json {
        println!("rfa-runner");
        println!("  seed:    {seed}");
        println!("  members: {members}");
        println!("  db:      {db}");
        println!();
    }

    let catalog = FieldCatalog::new();
    let store = CatalogStore::open(db)?;
    store.migrate()?;
    seed_default_catalog(&store, &catalog)?;

    let rows = synth_rows(seed, members, &catalog);
    let mut datasets = DatasetStore::new();
    datasets.set_live(rows, &catalog);
    let snapshot = datasets
        .live()
        .ok_or_else(|| anyhow::anyhow!("live dataset missing after load"))?;

    let resolver = BatchResolver::load(&store)?;
    let global_recap = recap(
        &catalog,
        &snapshot.by_member,
        &snapshot.by_group,
        &dissolved,
        &resolver,
    );
    let analyzer = OpportunityAnalyzer::new(&catalog, &resolver);
    let report = analyzer.analyze(&snapshot.by_member, &snapshot.by_group);

    if json {
        let combined = RunReport { recap: &global_recap, opportunity: &report };
        println!("{}", serde_json::to_string_pretty(&combined)?);
        return Ok(());
    }

    print_recap(&global_recap);
    print_opportunities(&report);

    if let Some(code) = profile {
        let entity = analyzer.entity_profile(
            EntityKind::Member,
            code,
            &snapshot.by_member,
            &snapshot.by_group,
            delta,
        )?;
        println!();
        println!("=== PROFILE {} ({}) ===", entity.entity_label, entity.contract_name);
        println!("  current rebate: {:.2}", entity.total_value);
        println!(
            "  objectives: {} achieved, {} near, potential +{:.2}",
            entity.achieved_count, entity.near_count, entity.gain_potential
        );
        for d in entity.deltas.iter().take(5) {
            println!(
                "  {:<28} volume {:>10.0} | +{delta:.0} => +{:.2} | -{delta:.0} => -{:.2}",
                d.label, d.volume, d.gain_if_add, d.loss_if_sub
            );
        }
    }

    Ok(())
}

const GROUP_POOL: &[&str] = &[
    "GROUPE APA",
    "GROUPE EST AUTO",
    "GROUPE RHONE PIECES",
    "GROUPE ATLANTIQUE",
];

/// Synthesize reproducible purchase rows: every member gets a code, a
/// name, optionally a group, and volumes on a few random lines.
fn synth_rows(seed: u64, members: usize, catalog: &FieldCatalog) -> Vec<RowRecord> {
    let mut rng = Pcg64::seed_from_u64(seed);
    let supplier_keys = catalog.supplier_keys();
    let sub_keys = catalog.sub_category_keys();
    let mut rows = Vec::new();

    for i in 1..=members {
        let code = format!("M{i:04}");
        let name = format!("Garage {i:02}");
        let group = if rng.gen_bool(0.4) {
            GROUP_POOL[rng.gen_range(0..GROUP_POOL.len())].to_string()
        } else {
            String::new()
        };

        // A handful of rows per member, like a monthly statement split.
        for _ in 0..rng.gen_range(2..6) {
            let mut amounts = std::collections::HashMap::new();
            for key in &supplier_keys {
                if rng.gen_bool(0.7) {
                    amounts.insert(key.clone(), rng.gen_range(1_000.0..40_000.0));
                }
            }
            for key in &sub_keys {
                if rng.gen_bool(0.25) {
                    amounts.insert(key.clone(), rng.gen_range(500.0..15_000.0));
                }
            }
            rows.push(RowRecord {
                member_code: code.clone(),
                member_name: name.clone(),
                group_name:  group.clone(),
                amounts,
            });
        }
    }

    log::info!("synthesized {} rows for {members} members (seed {seed})", rows.len());
    rows
}

fn print_recap(recap: &GlobalRecap) {
    println!("=== GLOBAL RECAP ===");
    for (key, total) in &recap.rebate_by_supplier {
        let entities = recap.supplier_details.get(key).map(|d| d.len()).unwrap_or(0);
        println!("  {key:<18} {total:>12.2}  ({entities} entities)");
    }
    println!("  global rebate:   {:>12.2}", recap.total_global_rebate);
    println!("  global bonus:    {:>12.2}", recap.total_global_bonus);
    println!("  sub-category:    {:>12.2}", recap.total_sub_category);
    println!("  grand total:     {:>12.2}", recap.grand_total);
    if !recap.warnings.is_empty() {
        println!("  warnings:        {}", recap.warnings.len());
    }
    if !recap.failures.is_empty() {
        println!("  failed entities: {}", recap.failures.len());
    }
    println!();
}

fn print_opportunities(report: &OpportunityReport) {
    let s = &report.summary;
    println!("=== OPPORTUNITIES ===");
    println!("  members:        {}", s.total_members);
    println!("  near:           {} (potential +{:.2})", s.total_near, s.total_gain_potential);
    println!("  achieved:       {}", s.total_achieved);
    println!("  inbound:        {:.2}", s.total_inbound);
    println!("  outbound:       {:.2}", s.total_outbound);
    println!("  margin:         {:.2}", s.total_margin);
    println!("  loss lines:     {}", s.loss_count);

    if !report.alerts.is_empty() {
        println!();
        println!("=== ALERTS ===");
        for alert in report.alerts.iter().take(5) {
            println!("  [{:?}] {}", alert.priority, alert.title);
        }
    }

    if !report.purchase_plans.is_empty() {
        println!();
        println!("=== TOP PURCHASE PLANS ===");
        for plan in report.purchase_plans.iter().take(5) {
            println!(
                "  {} / {}: push {:.0} over {} lines, unlocks {} tiers (+{:.2})",
                plan.entity_label,
                plan.supplier_label,
                plan.total_with_extra,
                plan.items.len(),
                plan.tiers_with_extra,
                plan.gain_with_extra
            );
        }
    }
}

fn parse_arg<T: std::str::FromStr + Copy>(args: &[String], flag: &str, default: T) -> T {
    args.windows(2)
        .find(|w| w[0] == flag)
        .and_then(|w| w[1].parse().ok())
        .unwrap_or(default)
}
