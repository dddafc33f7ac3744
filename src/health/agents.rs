//! Agent processes: presence via `sysinfo`, restart via a configured command.

use anyhow::{Context, Result};
use std::collections::HashSet;
use std::process::Stdio;
use sysinfo::System;

/// Linux truncates process names (`comm`) to this many bytes.
const COMM_LEN: usize = 15;

/// Names of all running processes.
pub fn running_processes() -> HashSet<String> {
    let mut sys = System::new();
    sys.refresh_processes();
    sys.processes()
        .values()
        .map(|proc| proc.name().to_string())
        .collect()
}

pub fn is_running(agent: &str, processes: &HashSet<String>) -> bool {
    if processes.contains(agent) {
        return true;
    }
    agent.len() > COMM_LEN
        && processes
            .iter()
            .any(|p| p.len() == COMM_LEN && agent.starts_with(p.as_str()))
}

/// Spawn `command` (program followed by whitespace-separated arguments)
/// detached from the caller; returns the child's PID.
pub fn spawn_agent(command: &str) -> Result<u32> {
    let mut parts = command.split_whitespace();
    let program = parts.next().context("empty agent command")?;

    let child = tokio::process::Command::new(program)
        .args(parts)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .with_context(|| format!("failed to spawn {program:?}"))?;

    child.id().context("spawned agent exited immediately")
}
