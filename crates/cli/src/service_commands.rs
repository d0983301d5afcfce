use std::{net::SocketAddr, path::PathBuf};

use {
    anyhow::{Context, Result},
    clap::{Args, Subcommand},
    pipedeck_config::ServiceConfig,
    pipedeck_service::{LocalComponents, Orchestrator, Started, StartupOptions},
    tokio::sync::oneshot,
    tokio_util::sync::CancellationToken,
    tracing::{error, info},
};

/// Data directory shared by every service command.
const DATA_DIR: &str = "~/.pipedeck";

#[derive(Subcommand)]
pub enum ServiceAction {
    /// Start the dashboard service in the foreground.
    Start(StartArgs),
}

#[derive(Debug, Args)]
pub struct StartArgs {
    /// Mod directory to serve (defaults to the current directory).
    #[arg(long)]
    pub mod_location: Option<PathBuf>,
    /// Dashboard install directory (defaults to ~/.pipedeck/dashboard).
    #[arg(long)]
    pub install_dir: Option<PathBuf>,
    /// API port, overriding the config file.
    #[arg(long)]
    pub port: Option<u16>,
    /// API listen address, overriding the config file.
    #[arg(long)]
    pub listen: Option<String>,
}

pub async fn handle_service(action: ServiceAction) -> Result<()> {
    match action {
        ServiceAction::Start(args) => start(args).await,
    }
}

async fn start(args: StartArgs) -> Result<()> {
    pipedeck_config::set_data_dir(DATA_DIR);

    let mut config = pipedeck_config::discover_and_load();
    args.apply(&mut config);
    let components = args.into_components(&config)?;

    info!(
        mod_location = %components.mod_location.display(),
        install_dir = %components.install_dir.display(),
        api = %config.api.address(),
        readiness = ?config.dashboard.readiness,
        "starting service"
    );

    let mut orchestrator = Orchestrator::new(components, StartupOptions::from(&config));
    let started = orchestrator.subscribe_started();
    let result = run_reporting_start(
        orchestrator.run(CancellationToken::new()),
        started,
        |addr| println!("{}", started_line(addr)),
    )
    .await;

    if let Err(e) = &result {
        if e.is_startup() {
            error!(error = %e, "service failed to start");
        } else {
            error!(error = %e, "service stopped unexpectedly");
        }
    }
    result.map_err(Into::into)
}

/// Drive `run` to completion, handing the API address to `on_started` once
/// the started report arrives. The report is never lost if `run` returns in
/// the same poll that sent it.
async fn run_reporting_start<F>(
    run: F,
    mut started: oneshot::Receiver<Started>,
    on_started: impl FnOnce(SocketAddr),
) -> F::Output
where
    F: Future,
{
    tokio::pin!(run);
    let (report, finished) = tokio::select! {
        biased;
        report = &mut started => (report.ok(), None),
        result = &mut run => (started.try_recv().ok(), Some(result)),
    };
    if let Some(Started {
        api_addr: Some(addr),
    }) = report
    {
        on_started(addr);
    }
    match finished {
        Some(result) => result,
        None => run.await,
    }
}

fn started_line(addr: SocketAddr) -> String {
    format!("server started on http://{addr}")
}

impl StartArgs {
    /// Flags win over the config file.
    fn apply(&self, config: &mut ServiceConfig) {
        if let Some(listen) = &self.listen {
            config.api.bind = listen.clone();
        }
        if let Some(port) = self.port {
            config.api.port = port;
        }
    }

    fn into_components(self, config: &ServiceConfig) -> Result<LocalComponents> {
        let mod_location = match self.mod_location {
            Some(path) => pipedeck_config::expand_home(&path),
            None => std::env::current_dir().context("failed to resolve current directory")?,
        };
        let install_dir = self
            .install_dir
            .map(|path| pipedeck_config::expand_home(&path))
            .unwrap_or_else(pipedeck_config::default_install_dir);

        Ok(LocalComponents {
            mod_location,
            install_dir,
            data_dir: pipedeck_config::data_dir(),
            api: config.api.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use {super::*, std::time::Duration};

    fn args() -> StartArgs {
        StartArgs {
            mod_location: None,
            install_dir: None,
            port: None,
            listen: None,
        }
    }

    #[test]
    fn flags_override_config() {
        let mut config = ServiceConfig::default();
        let args = StartArgs {
            port: Some(9100),
            listen: Some("0.0.0.0".into()),
            ..args()
        };
        args.apply(&mut config);
        assert_eq!(config.api.port, 9100);
        assert_eq!(config.api.bind, "0.0.0.0");
    }

    #[test]
    fn missing_flags_keep_config() {
        let mut config = ServiceConfig::default();
        args().apply(&mut config);
        assert_eq!(config, ServiceConfig::default());
    }

    #[test]
    fn mod_location_defaults_to_cwd() {
        let components = args().into_components(&ServiceConfig::default()).unwrap();
        assert_eq!(components.mod_location, std::env::current_dir().unwrap());
        assert!(components.install_dir.ends_with("dashboard"));
    }

    #[test]
    fn explicit_paths_are_kept() {
        let args = StartArgs {
            mod_location: Some("/srv/mods/insights".into()),
            install_dir: Some("/opt/pipedeck".into()),
            ..args()
        };
        let components = args.into_components(&ServiceConfig::default()).unwrap();
        assert_eq!(components.mod_location, PathBuf::from("/srv/mods/insights"));
        assert_eq!(components.install_dir, PathBuf::from("/opt/pipedeck"));
    }

    #[test]
    fn started_line_includes_address() {
        let addr: SocketAddr = "127.0.0.1:9033".parse().unwrap();
        assert_eq!(started_line(addr), "server started on http://127.0.0.1:9033");
    }

    #[tokio::test]
    async fn report_sent_as_run_returns_is_not_lost() {
        let (tx, rx) = oneshot::channel();
        // Sends the report and finishes in the same poll.
        let run = async move {
            let _ = tx.send(Started {
                api_addr: Some("127.0.0.1:9033".parse().unwrap()),
            });
            "done"
        };
        let mut seen = None;
        let result = tokio::time::timeout(
            Duration::from_secs(1),
            run_reporting_start(run, rx, |addr| seen = Some(addr)),
        )
        .await
        .unwrap();
        assert_eq!(result, "done");
        assert_eq!(seen, Some("127.0.0.1:9033".parse().unwrap()));
    }

    #[tokio::test]
    async fn report_is_seen_while_run_keeps_going() {
        let (tx, rx) = oneshot::channel();
        let (release_tx, release_rx) = oneshot::channel::<()>();
        let seen = std::sync::Arc::new(std::sync::Mutex::new(None));
        let observed = std::sync::Arc::clone(&seen);
        let run = async move {
            let _ = tx.send(Started {
                api_addr: Some("127.0.0.1:9034".parse().unwrap()),
            });
            let _ = release_rx.await;
        };
        let task = tokio::spawn(run_reporting_start(run, rx, move |addr| {
            *observed.lock().unwrap() = Some(addr);
        }));

        // Printed before the run is allowed to finish.
        for _ in 0..100 {
            if seen.lock().unwrap().is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(*seen.lock().unwrap(), Some("127.0.0.1:9034".parse().unwrap()));
        assert!(!task.is_finished());

        release_tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn failed_run_without_report_still_returns() {
        let (tx, rx) = oneshot::channel::<Started>();
        let run = async move {
            drop(tx);
            Err::<(), _>("startup failed")
        };
        let mut called = false;
        let result = tokio::time::timeout(
            Duration::from_secs(1),
            run_reporting_start(run, rx, |_| called = true),
        )
        .await
        .unwrap();
        assert_eq!(result, Err("startup failed"));
        assert!(!called);
    }
}
