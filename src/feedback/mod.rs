//! Periodic endpoint polling with bounded history and alerting.
//!
//! A [`FeedbackLoop`] owns one background task at most. Each cycle calls the
//! configured endpoints in order, post-processes their results, records the
//! cycle in history and posts a summary to the notification channels.

pub mod config;
pub mod cycle;
pub mod notify;

use anyhow::Result;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

pub use config::FeedbackLoopConfig;
pub use cycle::{CycleResult, EndpointResult};

use crate::clients::HttpPolicy;

/// How long `stop()` waits for the task before aborting it.
pub const STOP_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Serialize)]
pub struct FeedbackStatus {
    pub enabled: bool,
    pub running: bool,
    pub interval: u64,
    pub endpoints: usize,
    pub cycles_run: u64,
    pub last_run: Option<DateTime<Utc>>,
}

pub struct FeedbackLoop {
    inner: Arc<Inner>,
    task: Mutex<Option<LoopTask>>,
}

struct LoopTask {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

struct Inner {
    config: FeedbackLoopConfig,
    http: Client,
    policy: HttpPolicy,
    history: RwLock<VecDeque<CycleResult>>,
    last_run: RwLock<Option<DateTime<Utc>>>,
    cycles_run: AtomicU64,
    running: AtomicBool,
}

impl FeedbackLoop {
    pub fn new(config: FeedbackLoopConfig, policy: HttpPolicy) -> Result<Self> {
        let http = policy.build_client()?;
        Ok(Self {
            inner: Arc::new(Inner {
                history: RwLock::new(VecDeque::with_capacity(config.max_history)),
                config,
                http,
                policy,
                last_run: RwLock::new(None),
                cycles_run: AtomicU64::new(0),
                running: AtomicBool::new(false),
            }),
            task: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &FeedbackLoopConfig {
        &self.inner.config
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Spawn the background task. Returns `false` if it was already running.
    /// Must be called inside a Tokio runtime.
    pub fn start(&self) -> bool {
        let mut slot = match self.task.lock() {
            Ok(slot) => slot,
            Err(poisoned) => poisoned.into_inner(),
        };
        if slot.as_ref().is_some_and(|t| !t.handle.is_finished()) {
            tracing::warn!("feedback loop already running");
            return false;
        }

        let (shutdown, rx) = watch::channel(false);
        self.inner.running.store(true, Ordering::SeqCst);
        let handle = tokio::spawn(run_loop(Arc::clone(&self.inner), rx));
        *slot = Some(LoopTask { shutdown, handle });

        tracing::info!(
            interval_secs = self.inner.config.interval,
            endpoints = self.inner.config.endpoints.len(),
            "feedback loop started"
        );
        true
    }

    /// Signal the task and wait up to [`STOP_TIMEOUT`]; abort it after that.
    pub async fn stop(&self) {
        let task = match self.task.lock() {
            Ok(mut slot) => slot.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        let Some(LoopTask { shutdown, handle }) = task else {
            return;
        };

        let _ = shutdown.send(true);
        let abort = handle.abort_handle();
        match tokio::time::timeout(STOP_TIMEOUT, handle).await {
            Ok(Ok(())) => tracing::info!("feedback loop stopped"),
            Ok(Err(e)) => tracing::warn!(error = %e, "feedback loop task ended abnormally"),
            Err(_) => {
                tracing::warn!(
                    timeout_secs = STOP_TIMEOUT.as_secs(),
                    "feedback loop did not stop in time, aborting"
                );
                abort.abort();
            }
        }
        self.inner.running.store(false, Ordering::SeqCst);
    }

    /// Run one cycle now, whether or not the loop is running.
    pub async fn run_now(&self) -> CycleResult {
        self.inner.execute_cycle().await
    }

    /// Retained cycles, oldest first.
    pub fn history(&self) -> Vec<CycleResult> {
        read(&self.inner.history).iter().cloned().collect()
    }

    pub fn status(&self) -> FeedbackStatus {
        let config = &self.inner.config;
        FeedbackStatus {
            enabled: config.enabled,
            running: self.is_running(),
            interval: config.interval,
            endpoints: config.endpoints.len(),
            cycles_run: self.inner.cycles_run.load(Ordering::SeqCst),
            last_run: *read(&self.inner.last_run),
        }
    }
}

impl Drop for FeedbackLoop {
    fn drop(&mut self) {
        let task = match self.task.get_mut() {
            Ok(slot) => slot.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(task) = task {
            let _ = task.shutdown.send(true);
        }
    }
}

impl Inner {
    async fn execute_cycle(&self) -> CycleResult {
        let timestamp = Utc::now();
        let mut endpoints = Vec::with_capacity(self.config.endpoints.len());

        for endpoint in &self.config.endpoints {
            let mut result = cycle::execute_endpoint(&self.http, &self.policy, endpoint).await;
            result.processed = cycle::process_result(endpoint, &result, timestamp);
            endpoints.push(result);
        }

        let result = CycleResult {
            timestamp,
            endpoints,
        };
        self.record(&result);

        tracing::info!(
            endpoints = result.endpoints.len(),
            succeeded = result.succeeded(),
            alerts = result.alerts().count(),
            "feedback cycle complete"
        );

        notify::send_notifications(
            &self.http,
            &self.policy,
            &self.config.notification_channels,
            &result,
        )
        .await;
        result
    }

    fn record(&self, result: &CycleResult) {
        {
            let mut history = write(&self.history);
            while history.len() >= self.config.max_history.max(1) {
                history.pop_front();
            }
            history.push_back(result.clone());
        }
        *write(&self.last_run) = Some(result.timestamp);
        self.cycles_run.fetch_add(1, Ordering::SeqCst);
    }
}

async fn run_loop(inner: Arc<Inner>, mut shutdown: watch::Receiver<bool>) {
    let interval = Duration::from_secs(inner.config.interval.max(1));
    loop {
        if *shutdown.borrow() {
            break;
        }
        inner.execute_cycle().await;

        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            // Only `true` is ever sent; a dropped sender also ends the loop.
            _ = shutdown.changed() => break,
        }
    }
    inner.running.store(false, Ordering::SeqCst);
    tracing::debug!("feedback loop task exiting");
}

fn read<T>(lock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}
