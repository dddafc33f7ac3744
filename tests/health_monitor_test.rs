mod helpers;

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use trilogy_brain::config::{ClientsConfig, Credentials, HealthSettings};
use trilogy_brain::health::{
    ComponentHealth, ComponentStatus, CredentialSource, HealthMonitor, HealthMonitorConfig,
};

fn status_of(components: &[ComponentHealth], name: &str) -> ComponentStatus {
    components
        .iter()
        .find(|c| c.name == name)
        .unwrap_or_else(|| panic!("no component {name}"))
        .status
}

fn monitor(config: HealthMonitorConfig, credentials: CredentialSource) -> HealthMonitor {
    HealthMonitor::new(
        config,
        &HealthSettings::default(),
        ClientsConfig::default(),
        helpers::test_policy(),
        credentials,
    )
}

fn gateway_credentials(url: String) -> CredentialSource {
    Arc::new(move || Credentials {
        mcp_gateway_url: Some(url.clone()),
        ..Default::default()
    })
}

#[tokio::test]
async fn reachable_gateway_is_operational() {
    let server = helpers::mock_server().await;
    let monitor = monitor(
        HealthMonitorConfig::default(),
        gateway_credentials(server.url("/ok")),
    );

    let components = monitor.check_components().await;
    assert_eq!(status_of(&components, "mcp"), ComponentStatus::Operational);
    assert_eq!(status_of(&components, "claude"), ComponentStatus::Missing);
}

#[tokio::test]
async fn failing_gateway_is_degraded_and_not_repaired() {
    let server = helpers::mock_server().await;
    let monitor = monitor(
        HealthMonitorConfig::default(),
        gateway_credentials(server.url("/fail")),
    );

    let components = monitor.check_components().await;
    let mcp = components.iter().find(|c| c.name == "mcp").unwrap();
    assert_eq!(mcp.status, ComponentStatus::Degraded);
    assert_eq!(mcp.consecutive_failures, 1);

    let outcomes = monitor.repair_system().await;
    assert!(outcomes.iter().all(|o| o.component != "mcp"));
}

#[tokio::test]
async fn repair_restarts_agent_with_configured_command() {
    let agent = "trilogy-test-agent-that-never-runs";
    let mut commands = BTreeMap::new();
    commands.insert(agent.to_string(), "sleep 1".to_string());
    let config = HealthMonitorConfig {
        expected_agents: vec![agent.into()],
        agent_commands: commands,
        ..Default::default()
    };
    let monitor = monitor(config, Arc::new(Credentials::default));

    let components = monitor.check_components().await;
    let component = format!("agent:{agent}");
    assert_eq!(status_of(&components, &component), ComponentStatus::Missing);

    let outcomes = monitor.repair_system().await;
    let outcome = outcomes.iter().find(|o| o.component == component).unwrap();
    assert!(outcome.repaired, "{}", outcome.message);
    assert!(outcome.message.contains("pid"));
}

#[tokio::test]
async fn self_healing_loop_picks_up_credentials() {
    let available = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&available);
    let credentials: CredentialSource = Arc::new(move || Credentials {
        anthropic_api_key: flag
            .load(Ordering::SeqCst)
            .then(|| "sk-test".to_string()),
        ..Default::default()
    });
    let config = HealthMonitorConfig {
        check_interval: 1,
        self_healing_enabled: true,
        ..Default::default()
    };
    let monitor = Arc::new(monitor(config, credentials));

    assert_eq!(
        status_of(&monitor.check_components().await, "claude"),
        ComponentStatus::Missing
    );

    available.store(true, Ordering::SeqCst);
    assert!(monitor.start());
    tokio::time::sleep(Duration::from_millis(300)).await;
    monitor.stop().await;

    assert!(monitor.claude().is_some());
    assert_eq!(
        status_of(&monitor.components(), "claude"),
        ComponentStatus::Operational
    );
    assert!(!monitor.is_running());
}
