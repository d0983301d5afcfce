//! Startup sequencing and the shutdown wait.
//!
//! Order: lifecycle token → initialize → ensure environment → socket hub →
//! dashboard server → API server → dashboard init → API serve → wait.
//! Each step completes before the next starts; any startup error is returned
//! before later components exist.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use {
    futures::future::BoxFuture,
    pipedeck_config::{DashboardReadiness, ServiceConfig},
    tokio::sync::oneshot,
    tokio_util::sync::CancellationToken,
    tracing::{debug, info, warn},
};

use crate::{
    components::{ApiService, DashboardService, ServiceComponents},
    error::ServiceError,
    hub::SocketHub,
    signal::ShutdownSignal,
    supervisor::{Supervisor, TaskExit, TaskOutcome, TaskRole},
};

pub const DASHBOARD_INIT_TASK: &str = "dashboard-init";
pub const API_SERVER_TASK: &str = "api-server";

/// Knobs the orchestrator reads; everything else belongs to the components.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StartupOptions {
    pub readiness: DashboardReadiness,
    pub ready_timeout: Duration,
    pub shutdown_grace: Duration,
}

impl Default for StartupOptions {
    fn default() -> Self {
        Self::from(&ServiceConfig::default())
    }
}

impl From<&ServiceConfig> for StartupOptions {
    fn from(config: &ServiceConfig) -> Self {
        Self {
            readiness: config.dashboard.readiness,
            ready_timeout: config.dashboard.ready_timeout(),
            shutdown_grace: config.shutdown.grace_period(),
        }
    }
}

/// Delivered once, after both servers were started.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Started {
    pub api_addr: Option<SocketAddr>,
}

type Interrupt = BoxFuture<'static, ()>;

pub struct Orchestrator<C> {
    components: C,
    options: StartupOptions,
    interrupt: Option<Interrupt>,
    started_tx: Option<oneshot::Sender<Started>>,
}

impl<C: ServiceComponents> Orchestrator<C> {
    pub fn new(components: C, options: StartupOptions) -> Self {
        Self {
            components,
            options,
            interrupt: None,
            started_tx: None,
        }
    }

    /// Replace the OS interrupt with a custom trigger.
    pub fn with_interrupt<F>(mut self, trigger: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.interrupt = Some(Box::pin(trigger));
        self
    }

    /// Receiver for the started report. Only the latest subscriber is notified.
    pub fn subscribe_started(&mut self) -> oneshot::Receiver<Started> {
        let (tx, rx) = oneshot::channel();
        self.started_tx = Some(tx);
        rx
    }

    /// Start the service and block until `parent` or the interrupt cancels it,
    /// or until a supervised task fails.
    pub async fn run(mut self, parent: CancellationToken) -> Result<(), ServiceError> {
        // Released on every return path when dropped.
        let signal = match self.interrupt.take() {
            Some(trigger) => ShutdownSignal::with_trigger(&parent, trigger),
            None => ShutdownSignal::on_interrupt(&parent),
        };

        let init = self
            .components
            .initialize()
            .await
            .map_err(ServiceError::Initialize)?;
        debug!(mod_name = %init.workspace.mod_name, "initializer finished");

        self.components
            .ensure_environment()
            .await
            .map_err(ServiceError::Environment)?;

        let hub = SocketHub::new();

        // Kept alive until run returns; never explicitly torn down.
        let dashboard = self
            .components
            .dashboard(&init, Arc::clone(&hub))
            .map_err(ServiceError::DashboardConstruction)?;

        let api = self
            .components
            .api(Arc::clone(&hub))
            .map_err(ServiceError::ApiConstruction)?;
        let api_addr = api.local_addr();

        let mut supervisor = Supervisor::new(signal.token());

        let init_future = dashboard.init_async(supervisor.token());
        match self.options.readiness {
            DashboardReadiness::Concurrent => {
                supervisor.spawn(DASHBOARD_INIT_TASK, TaskRole::Startup, init_future);
            },
            DashboardReadiness::AwaitReady => {
                let timeout = self.options.ready_timeout;
                match tokio::time::timeout(timeout, init_future).await {
                    // A cancelled init also returns Ok, without reaching ready.
                    Ok(Ok(())) if signal.is_cancelled() => {
                        info!("shutdown requested before dashboard was ready");
                        supervisor.shutdown(self.options.shutdown_grace).await;
                        return Ok(());
                    },
                    Ok(Ok(())) => debug!("dashboard ready before API start"),
                    Ok(Err(e)) => {
                        supervisor.shutdown(self.options.shutdown_grace).await;
                        return Err(ServiceError::DashboardInit(e));
                    },
                    Err(_) => {
                        supervisor.shutdown(self.options.shutdown_grace).await;
                        return Err(ServiceError::DashboardInitTimeout(timeout));
                    },
                }
            },
        }

        supervisor.spawn(
            API_SERVER_TASK,
            TaskRole::Service,
            api.serve(supervisor.token()),
        );

        match api_addr {
            Some(addr) => info!(api = %addr, readiness = ?self.options.readiness, "service started"),
            None => info!(readiness = ?self.options.readiness, "service started"),
        }
        if let Some(tx) = self.started_tx.take() {
            let _ = tx.send(Started { api_addr });
        }

        let result = loop {
            tokio::select! {
                biased;
                () = signal.cancelled() => {
                    info!("shutdown requested");
                    break Ok(());
                },
                Some(exit) = supervisor.next_exit() => {
                    if let Some(err) = fatal_exit(exit) {
                        warn!(error = %err, "supervised task ended, shutting down");
                        break Err(err);
                    }
                },
            }
        };

        let aborted = supervisor.shutdown(self.options.shutdown_grace).await;
        if !aborted.is_empty() {
            warn!(tasks = ?aborted, "tasks aborted during shutdown");
        }
        drop(dashboard);
        info!("service stopped");
        result
    }
}

fn fatal_exit(exit: TaskExit) -> Option<ServiceError> {
    if !exit.is_fatal() {
        debug!(task = exit.name, "startup task completed");
        return None;
    }
    Some(match exit.outcome {
        TaskOutcome::Failed(source) => ServiceError::TaskFailed {
            name: exit.name,
            source,
        },
        TaskOutcome::Panicked(message) => ServiceError::TaskPanicked {
            name: exit.name,
            message,
        },
        TaskOutcome::Completed => ServiceError::TaskStopped { name: exit.name },
    })
}
