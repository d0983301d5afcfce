//! Collaborators the orchestrator sequences, behind traits so startup order
//! and failure handling can be exercised without real servers.

use std::{net::SocketAddr, path::PathBuf, sync::Arc};

use {
    anyhow::Context,
    async_trait::async_trait,
    futures::future::BoxFuture,
    tokio_util::sync::CancellationToken,
};

use pipedeck_config::ApiConfig;

use crate::{
    api::ApiServer,
    dashboard::DashboardServer,
    environment,
    hub::SocketHub,
    workspace::{InitData, Workspace},
};

/// The push-capable server attached to the hub.
pub trait DashboardService: Send + Sync + 'static {
    /// Begin asynchronous initialization. Must not block.
    fn init_async(&self, cancel: CancellationToken) -> BoxFuture<'static, anyhow::Result<()>>;
}

/// The request/response server attached to the hub.
pub trait ApiService: Send + 'static {
    fn local_addr(&self) -> Option<SocketAddr>;

    /// Serve until `cancel` fires.
    fn serve(self, cancel: CancellationToken) -> BoxFuture<'static, anyhow::Result<()>>;
}

/// Everything the orchestrator builds, in the order it builds it.
#[async_trait]
pub trait ServiceComponents: Send + Sync {
    type Dashboard: DashboardService;
    type Api: ApiService;

    async fn initialize(&self) -> anyhow::Result<InitData>;

    async fn ensure_environment(&self) -> anyhow::Result<()>;

    fn dashboard(&self, init: &InitData, hub: Arc<SocketHub>) -> anyhow::Result<Self::Dashboard>;

    fn api(&self, hub: Arc<SocketHub>) -> anyhow::Result<Self::Api>;
}

impl DashboardService for DashboardServer {
    fn init_async(&self, cancel: CancellationToken) -> BoxFuture<'static, anyhow::Result<()>> {
        DashboardServer::init_async(self, cancel)
    }
}

impl ApiService for ApiServer {
    fn local_addr(&self) -> Option<SocketAddr> {
        Some(ApiServer::local_addr(self))
    }

    fn serve(self, cancel: CancellationToken) -> BoxFuture<'static, anyhow::Result<()>> {
        ApiServer::serve(self, cancel)
    }
}

/// Production wiring: a mod directory on disk, a local install dir and a TCP
/// listener for the API.
#[derive(Debug, Clone)]
pub struct LocalComponents {
    pub mod_location: PathBuf,
    pub install_dir: PathBuf,
    pub data_dir: PathBuf,
    pub api: ApiConfig,
}

#[async_trait]
impl ServiceComponents for LocalComponents {
    type Api = ApiServer;
    type Dashboard = DashboardServer;

    async fn initialize(&self) -> anyhow::Result<InitData> {
        let location = self.mod_location.clone();
        let workspace = tokio::task::spawn_blocking(move || Workspace::load(&location))
            .await
            .context("workspace loader task failed")??;
        Ok(InitData::new(workspace))
    }

    async fn ensure_environment(&self) -> anyhow::Result<()> {
        let install_dir = self.install_dir.clone();
        let data_dir = self.data_dir.clone();
        tokio::task::spawn_blocking(move || environment::ensure(&install_dir, &data_dir))
            .await
            .context("environment check task failed")?
    }

    fn dashboard(&self, init: &InitData, hub: Arc<SocketHub>) -> anyhow::Result<DashboardServer> {
        DashboardServer::new(Arc::clone(&init.workspace), hub)
    }

    fn api(&self, hub: Arc<SocketHub>) -> anyhow::Result<ApiServer> {
        ApiServer::bind(hub, &self.api)
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{
            orchestrator::{Orchestrator, StartupOptions},
            protocol::{ServerEvent, actions, requests},
        },
        futures::{SinkExt, StreamExt},
        pipedeck_config::DashboardReadiness,
        std::{path::Path, time::Duration},
        tokio::time::timeout,
        tokio_tungstenite::{connect_async, tungstenite::Message},
    };

    const LIMIT: Duration = Duration::from_secs(10);

    fn write_mod(dir: &Path) {
        std::fs::write(dir.join("mod.pp"), "mod \"insights\" {\n  title = \"Insights\"\n}\n")
            .unwrap();
        std::fs::write(
            dir.join("dashboards.pp"),
            "dashboard \"overview\" {\n  title = \"Overview\"\n}\n\ndashboard \"costs\" {\n}\n",
        )
        .unwrap();
    }

    fn components(root: &Path) -> LocalComponents {
        let mod_location = root.join("mod");
        std::fs::create_dir_all(&mod_location).unwrap();
        write_mod(&mod_location);
        LocalComponents {
            mod_location,
            install_dir: root.join("install"),
            data_dir: root.join("data"),
            api: ApiConfig {
                bind: "127.0.0.1".into(),
                port: 0,
            },
        }
    }

    fn options() -> StartupOptions {
        StartupOptions {
            readiness: DashboardReadiness::AwaitReady,
            ..StartupOptions::default()
        }
    }

    async fn next_event<S>(stream: &mut S) -> ServerEvent
    where
        S: futures::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
    {
        loop {
            let msg = timeout(LIMIT, stream.next()).await.unwrap().unwrap().unwrap();
            if let Message::Text(text) = msg {
                return serde_json::from_str(text.as_str()).unwrap();
            }
        }
    }

    #[tokio::test]
    async fn initialize_loads_workspace() {
        let dir = tempfile::tempdir().unwrap();
        let init = components(dir.path()).initialize().await.unwrap();
        assert_eq!(init.workspace.mod_name, "insights");
        assert_eq!(init.workspace.dashboards.len(), 2);
    }

    #[tokio::test]
    async fn initialize_fails_for_missing_mod() {
        let dir = tempfile::tempdir().unwrap();
        let mut local = components(dir.path());
        local.mod_location = dir.path().join("missing");
        let err = local.initialize().await.unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[tokio::test]
    async fn ensure_environment_creates_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let local = components(dir.path());
        local.ensure_environment().await.unwrap();
        assert!(local.install_dir.is_dir());
        assert!(local.data_dir.is_dir());
    }

    #[tokio::test]
    async fn serves_dashboards_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let mut orch = Orchestrator::new(components(dir.path()), options())
            .with_interrupt(std::future::pending());
        let started = orch.subscribe_started();
        let parent = CancellationToken::new();
        let run = tokio::spawn(orch.run(parent.clone()));

        let addr = timeout(LIMIT, started)
            .await
            .unwrap()
            .unwrap()
            .api_addr
            .unwrap();

        let health: serde_json::Value = reqwest::get(format!("http://{addr}/api/v0/health"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(health["status"], "ok");
        assert_eq!(health["dashboard_attached"], true);

        let (mut socket, _) = connect_async(format!("ws://{addr}/ws")).await.unwrap();
        let hello = next_event(&mut socket).await;
        assert_eq!(hello.action, actions::SERVER_METADATA);
        assert_eq!(hello.payload["mod"], "insights");
        assert_eq!(hello.payload["state"], "ready");

        let request = serde_json::json!({ "action": requests::GET_AVAILABLE_DASHBOARDS });
        socket
            .send(Message::Text(request.to_string().into()))
            .await
            .unwrap();
        let listing = next_event(&mut socket).await;
        assert_eq!(listing.action, actions::AVAILABLE_DASHBOARDS);
        let names: Vec<&str> = listing.payload["dashboards"]
            .as_array()
            .unwrap()
            .iter()
            .map(|d| d["name"].as_str().unwrap())
            .collect();
        assert_eq!(names, vec!["costs", "overview"]);

        parent.cancel();
        let result = timeout(LIMIT, run).await.unwrap().unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn busy_port_fails_api_construction() {
        let dir = tempfile::tempdir().unwrap();
        let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let mut local = components(dir.path());
        local.api.port = taken.local_addr().unwrap().port();

        let err = Orchestrator::new(local, options())
            .with_interrupt(std::future::pending())
            .run(CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, crate::error::ServiceError::ApiConstruction(_)));
    }
}
