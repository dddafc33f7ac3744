use anyhow::Result;

use trilogy_brain::clients::HttpPolicy;
use trilogy_brain::config::{expand_tilde, TrilogyConfig};
use trilogy_brain::feedback::{CycleResult, FeedbackLoop, FeedbackLoopConfig};

/// What `trilogy feedback` should do.
pub enum FeedbackAction {
    RunOnce,
    Status,
    History,
    Run,
}

pub async fn feedback(
    config: &TrilogyConfig,
    action: FeedbackAction,
    interval: Option<u64>,
) -> Result<()> {
    let mut settings = config.feedback.clone();
    if interval.is_some() {
        settings.interval_secs = interval;
    }
    let loop_config = FeedbackLoopConfig::load(expand_tilde(&settings.config_path), &settings)?;
    let feedback = FeedbackLoop::new(loop_config, HttpPolicy::from_config(&config.http))?;

    match action {
        FeedbackAction::RunOnce => {
            let cycle = feedback.run_now().await;
            print_cycle(&cycle);
        }
        FeedbackAction::Status => {
            let status = feedback.status();
            println!("Feedback Loop");
            println!("{}", "=".repeat(40));
            println!("  Config:     {}", expand_tilde(&settings.config_path).display());
            println!("  Enabled:    {}", status.enabled);
            println!("  Interval:   {}s", status.interval);
            println!("  Endpoints:  {}", status.endpoints);
            for endpoint in &feedback.config().endpoints {
                println!("    - {} {} {}", endpoint.name, endpoint.method, endpoint.url);
            }
            println!(
                "  Channels:   {}",
                feedback.config().notification_channels.len()
            );
        }
        FeedbackAction::History => {
            // History lives in memory, so a fresh process has one cycle to show.
            feedback.run_now().await;
            for cycle in feedback.history() {
                print_cycle(&cycle);
            }
        }
        FeedbackAction::Run => {
            if !feedback.config().enabled {
                println!("Feedback loop is disabled in config; running anyway.");
            }
            feedback.start();
            println!(
                "Feedback loop running every {}s. Press Ctrl-C to stop.",
                feedback.config().interval
            );
            tokio::signal::ctrl_c().await?;
            feedback.stop().await;
            println!("Stopped after {} cycle(s).", feedback.status().cycles_run);
        }
    }
    Ok(())
}

fn print_cycle(cycle: &CycleResult) {
    println!(
        "Cycle {} ({}/{} succeeded)",
        cycle.timestamp.format("%Y-%m-%d %H:%M:%S"),
        cycle.succeeded(),
        cycle.endpoints.len()
    );
    for result in &cycle.endpoints {
        let status = result
            .status_code
            .map(|s| s.to_string())
            .unwrap_or_else(|| "---".into());
        let mark = if result.success { "ok  " } else { "FAIL" };
        print!(
            "  [{mark}] {:<20} {status} {:>8.3}s",
            result.name, result.duration
        );
        match &result.error {
            Some(err) => println!("  {err}"),
            None => println!(),
        }
    }
    for alert in cycle.alerts() {
        println!("  ALERT ({}) {}: {}", alert.severity, alert.endpoint, alert.message);
    }
}
