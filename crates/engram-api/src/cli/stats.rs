//! Operational commands: statistics dashboard, health check, TTL sweep.

use anyhow::Result;
use comfy_table::{Cell, Color, Table, presets::UTF8_FULL_CONDENSED};
use console::style;

use engram_types::memory::MemoryTableCounts;
use engram_types::stats::HealthReport;

use crate::state::AppState;

/// Display service statistics with per-table row counts.
pub async fn stats(state: &AppState, json: bool) -> Result<()> {
    let stats = state.memory.get_system_stats().await;
    let evolution = state.memory.get_evolution_stats().await.ok();

    if json {
        let out = serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "data_dir": state.data_dir.display().to_string(),
            "stats": stats,
            "evolution": evolution,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!();
    println!("  {} Engram v{}", style("◆").bold(), env!("CARGO_PKG_VERSION"));
    println!();

    println!("  {}", style("── Activity ──").dim());
    println!("  Queries:        {}", style(stats.total_queries).bold());
    println!("  Avg response:   {:.1} ms", stats.avg_response_time_ms);
    println!("  Live instances: {}", stats.instance_count);
    println!("  Cache hit rate: {:.0}%", stats.cache_hit_rate * 100.0);
    println!("  Pattern runs:   {}", stats.pattern_discovery_count);
    if stats.background_jobs_dropped > 0 {
        println!(
            "  Dropped jobs:   {}",
            style(stats.background_jobs_dropped).yellow()
        );
    }
    if let Some(at) = stats.last_activity {
        println!("  Last activity:  {}", at.format("%Y-%m-%d %H:%M:%S UTC"));
    }
    println!();

    match &stats.table_counts {
        Some(counts) => {
            println!("  {}", style("── Storage ──").dim());
            println!("{}", counts_table(counts));
        }
        None => println!("  {} table counts unavailable", style("!").yellow()),
    }

    if let Some(evolution) = evolution {
        println!();
        println!("  {}", style("── Evolution ──").dim());
        println!("  Evaluations:    {}", evolution.total_evaluations);
        println!("  Reinforcements: {}", evolution.reinforcements);
        println!("  Promotions:     {}", evolution.promotions);
        println!("  Consolidations: {}", evolution.consolidations);
    }

    println!();
    println!("  {}", style("── System ──").dim());
    println!("  Data dir: {}", style(state.data_dir.display()).dim());
    println!("  Database: {}", style("SQLite (WAL mode)").dim());
    println!();

    Ok(())
}

fn counts_table(counts: &MemoryTableCounts) -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL_CONDENSED);
    table.set_header(vec!["Table", "Rows"]);
    for (name, n) in [
        ("working", counts.working),
        ("episodic", counts.episodic),
        ("semantic", counts.semantic),
        ("procedural", counts.procedural),
        ("patterns", counts.patterns),
    ] {
        table.add_row(vec![Cell::new(name), Cell::new(n)]);
    }
    table.add_row(vec![
        Cell::new("total").fg(Color::Cyan),
        Cell::new(counts.total()).fg(Color::Cyan),
    ]);
    table
}

/// Run a health check. Returns whether storage is healthy.
pub async fn health(state: &AppState, json: bool) -> Result<bool> {
    let report = state.memory.health_check().await;
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_health(&report);
    }
    Ok(report.is_healthy())
}

fn print_health(report: &HealthReport) {
    let mark = |ok: bool| {
        if ok {
            format!("{}", style("✓").green())
        } else {
            format!("{}", style("✗").red())
        }
    };

    println!();
    println!("  {} Database reachable", mark(report.database));
    println!("  {} Live instances: {}", style("·").dim(), report.instances);
    if let Some(error) = &report.error {
        println!("  {}", style(error).red());
    }
    println!();
}

/// Delete expired working memories once.
pub async fn sweep(state: &AppState, json: bool, quiet: bool) -> Result<()> {
    let removed = state.memory.lifecycle().sweep_expired_working().await?;

    if json {
        println!("{}", serde_json::json!({ "removed": removed }));
    } else if !quiet {
        println!(
            "  {} Removed {} expired working {}",
            style("✓").green().bold(),
            style(removed).bold(),
            if removed == 1 { "memory" } else { "memories" }
        );
    }
    Ok(())
}
