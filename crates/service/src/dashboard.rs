use std::{
    collections::HashMap,
    fmt,
    sync::{
        Arc, Weak,
        atomic::{AtomicU8, Ordering},
    },
};

use {
    anyhow::{Context, bail},
    async_trait::async_trait,
    futures::{FutureExt, future::BoxFuture},
    serde::Serialize,
    serde_json::{Value, json},
    tokio::sync::RwLock,
    tokio_util::sync::CancellationToken,
    tracing::{debug, info, warn},
};

use crate::{
    hub::{HubHandler, SocketHub},
    protocol::{ClientMessage, ServerEvent, actions, requests},
    workspace::{DashboardRef, Workspace},
};

// ── State ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DashboardState {
    Constructed,
    Initializing,
    Ready,
    Failed,
}

impl DashboardState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Constructed,
            1 => Self::Initializing,
            2 => Self::Ready,
            _ => Self::Failed,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            Self::Constructed => 0,
            Self::Initializing => 1,
            Self::Ready => 2,
            Self::Failed => 3,
        }
    }
}

impl fmt::Display for DashboardState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Constructed => "constructed",
            Self::Initializing => "initializing",
            Self::Ready => "ready",
            Self::Failed => "failed",
        })
    }
}

// ── Server ───────────────────────────────────────────────────────────────────

/// Push side of the service: answers dashboard requests arriving on the hub
/// and broadcasts workspace events.
#[derive(Clone)]
pub struct DashboardServer {
    inner: Arc<Inner>,
}

struct Inner {
    workspace: Arc<Workspace>,
    // Weak: the hub owns this handler, a strong ref would form a cycle.
    hub: Weak<SocketHub>,
    state: AtomicU8,
    index: RwLock<Vec<DashboardRef>>,
}

impl DashboardServer {
    /// Build the server and attach it as the hub's message handler.
    pub fn new(workspace: Arc<Workspace>, hub: Arc<SocketHub>) -> anyhow::Result<Self> {
        let inner = Arc::new(Inner {
            workspace,
            hub: Arc::downgrade(&hub),
            state: AtomicU8::new(DashboardState::Constructed.as_u8()),
            index: RwLock::new(Vec::new()),
        });
        hub.try_attach(Arc::clone(&inner) as Arc<dyn HubHandler>)
            .context("dashboard server cannot attach to the socket hub")?;
        debug!(mod_name = %inner.workspace.mod_name, "dashboard server constructed");
        Ok(Self { inner })
    }

    pub fn state(&self) -> DashboardState {
        self.inner.state()
    }

    /// Begin initialization. Nothing runs until the returned future is polled,
    /// so the caller decides whether to spawn it or await it.
    pub fn init_async(&self, cancel: CancellationToken) -> BoxFuture<'static, anyhow::Result<()>> {
        let inner = Arc::clone(&self.inner);
        async move { inner.initialize(cancel).await }.boxed()
    }
}

impl Inner {
    fn state(&self) -> DashboardState {
        DashboardState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: DashboardState) {
        self.state.store(state.as_u8(), Ordering::Release);
    }

    async fn initialize(&self, cancel: CancellationToken) -> anyhow::Result<()> {
        if let Err(actual) = self.state.compare_exchange(
            DashboardState::Constructed.as_u8(),
            DashboardState::Initializing.as_u8(),
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            bail!(
                "dashboard server already started initializing (state: {})",
                DashboardState::from_u8(actual)
            );
        }
        info!(mod_name = %self.workspace.mod_name, "dashboard server initializing");

        let workspace = Arc::clone(&self.workspace);
        let build = tokio::task::spawn_blocking(move || build_index(&workspace));

        let index = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                debug!("dashboard init cancelled");
                self.set_state(DashboardState::Constructed);
                return Ok(());
            },
            joined = build => joined.context("dashboard index task failed")?,
        };
        let index = match index {
            Ok(index) => index,
            Err(e) => {
                self.set_state(DashboardState::Failed);
                return Err(e);
            },
        };

        let count = index.len();
        *self.index.write().await = index;
        self.set_state(DashboardState::Ready);
        info!(dashboards = count, "dashboard server ready");

        if let Some(hub) = self.hub.upgrade() {
            let delivered = hub
                .broadcast(ServerEvent::new(
                    actions::WORKSPACE_LOADED,
                    json!({
                        "mod": self.workspace.mod_name,
                        "dashboards": *self.index.read().await,
                    }),
                ))
                .await;
            debug!(delivered, "workspace_loaded broadcast");
        }
        Ok(())
    }

    fn metadata(&self) -> Value {
        json!({
            "version": env!("CARGO_PKG_VERSION"),
            "mod": self.workspace.mod_name,
            "state": self.state(),
        })
    }

    async fn reply(&self, conn_id: &str, event: ServerEvent) {
        let Some(hub) = self.hub.upgrade() else {
            return;
        };
        if !hub.send_to(conn_id, event).await {
            debug!(conn_id = %conn_id, "dashboard reply dropped, session gone");
        }
    }

    fn initializing_event(&self) -> ServerEvent {
        ServerEvent::new(
            actions::DASHBOARD_INITIALIZING,
            json!({ "state": self.state() }),
        )
    }

    async fn select_dashboard(&self, payload: &Value) -> ServerEvent {
        let Some(name) = payload.get("name").and_then(Value::as_str) else {
            return ServerEvent::error("select_dashboard requires a 'name'");
        };
        let index = self.index.read().await;
        match index.iter().find(|d| d.name == name) {
            Some(dashboard) => ServerEvent::new(actions::DASHBOARD_SELECTED, json!(dashboard)),
            None => ServerEvent::error(format!("unknown dashboard '{name}'")),
        }
    }
}

#[async_trait]
impl HubHandler for Inner {
    async fn on_connect(&self, conn_id: &str) {
        self.reply(
            conn_id,
            ServerEvent::new(actions::SERVER_METADATA, self.metadata()),
        )
        .await;
    }

    async fn on_message(&self, conn_id: &str, message: ClientMessage) {
        let ready = self.state() == DashboardState::Ready;
        let event = match message.action.as_str() {
            requests::GET_SERVER_METADATA => {
                ServerEvent::new(actions::SERVER_METADATA, self.metadata())
            },
            requests::GET_AVAILABLE_DASHBOARDS if ready => ServerEvent::new(
                actions::AVAILABLE_DASHBOARDS,
                json!({ "dashboards": *self.index.read().await }),
            ),
            requests::SELECT_DASHBOARD if ready => self.select_dashboard(&message.payload).await,
            requests::GET_AVAILABLE_DASHBOARDS | requests::SELECT_DASHBOARD => {
                self.initializing_event()
            },
            other => {
                warn!(conn_id = %conn_id, action = %other, "dashboard: unknown action");
                ServerEvent::error(format!("unknown action '{other}'"))
            },
        };
        self.reply(conn_id, event).await;
    }
}

/// Validate the workspace dashboards and produce the served index.
fn build_index(workspace: &Workspace) -> anyhow::Result<Vec<DashboardRef>> {
    let mut seen: HashMap<&str, &DashboardRef> = HashMap::new();
    for dashboard in &workspace.dashboards {
        if let Some(first) = seen.insert(&dashboard.name, dashboard) {
            bail!(
                "duplicate dashboard '{}' declared in {} and {}",
                dashboard.name,
                first.file.display(),
                dashboard.file.display()
            );
        }
    }
    Ok(workspace.dashboards.clone())
}
