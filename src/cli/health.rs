use anyhow::Result;
use std::sync::{Arc, Mutex};

use trilogy_brain::clients::HttpPolicy;
use trilogy_brain::config::{expand_tilde, Credentials, TrilogyConfig};
use trilogy_brain::db;
use trilogy_brain::health::{ComponentHealth, HealthMonitor, HealthMonitorConfig};

/// Check every component once; with `repair`, attempt repairs and re-check.
pub async fn health(config: &TrilogyConfig, repair: bool) -> Result<()> {
    let monitor_config = HealthMonitorConfig::load(expand_tilde(&config.health.config_path))?;
    let conn = db::open_database(config.resolved_db_path())?;
    let monitor = HealthMonitor::new(
        monitor_config,
        &config.health,
        config.clients.clone(),
        HttpPolicy::from_config(&config.http),
        Arc::new(Credentials::from_env),
    )
    .with_graph(Arc::new(Mutex::new(conn)));

    let components = monitor.check_components().await;
    print_components(&components);

    if repair {
        println!();
        println!("Repairing...");
        let outcomes = monitor.repair_system().await;
        if outcomes.is_empty() {
            println!("  Nothing to repair.");
        }
        for outcome in &outcomes {
            let mark = if outcome.repaired { "ok  " } else { "FAIL" };
            println!("  [{mark}] {:<24} {}", outcome.component, outcome.message);
        }
        println!();
        print_components(&monitor.check_components().await);
    }

    if !monitor.is_healthy() {
        println!();
        println!("Some components need attention.");
    }
    Ok(())
}

fn print_components(components: &[ComponentHealth]) {
    println!("Component Health");
    println!("{}", "=".repeat(40));
    for c in components {
        match &c.message {
            Some(msg) => println!("  {:<24} {:<12} {msg}", c.name, c.status.to_string()),
            None => println!("  {:<24} {}", c.name, c.status),
        }
    }
}
