//! spikenetd - long-running spiking network engine
//!
//! Owns one `Network`, steps it at a configurable tick rate and serves the
//! query/mutation surface to clients as newline-delimited JSON over TCP.
//!
//! Storage locations:
//! - Linux: ~/.local/share/spikenet/
//! - Windows: %APPDATA%\spikenet\
//! - MacOS: ~/Library/Application Support/spikenet/

use serde::{Deserialize, Serialize};
use spikenet::connection::EdgeView;
use spikenet::network::{Connectivity, Diagnostics};
use spikenet::node::Node;
use spikenet::snapshot::NetworkSnapshot;
use spikenet::{ModuleDescriptor, ModuleId, ModuleLink, Network, NeuronType, NodeId, NodeKind};
use std::fs::File;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::RwLock;
use tokio::time;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

mod config;
mod error;
mod paths;

use config::{DaemonConfig, MAX_TICK_RATE_HZ};
use error::DaemonError;
use paths::AppPaths;

/// Upper bound for a single `Step` request.
const MAX_STEP_TICKS: u64 = 100_000;

// ═══════════════════════════════════════════════════════════════════════════
// Protocol Messages
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
enum Request {
    GetState,
    ListModules,
    ModuleNodes { module: ModuleId },
    NodeEdges { node: NodeId },
    Connectivity { module: ModuleId },
    ExportSnapshot,

    AddModule { descriptor: ModuleDescriptor },
    UpdateModule { descriptor: ModuleDescriptor },
    MoveModule { module: ModuleId, x: f32, y: f32 },
    RenameModule { module: ModuleId, name: String },
    RemoveModule { module: ModuleId },
    ConnectModules { link: ModuleLink },
    DisconnectModules { a: ModuleId, b: ModuleId },
    SetSensorInput { node: NodeId, value: f32 },
    SetNodeLabel { node: NodeId, label: String },
    SetGlobalDecay { decay: f32 },
    ImportSnapshot { snapshot: NetworkSnapshot },

    Step { ticks: u64 },
    Start,
    Stop,
    SetTickRate { hz: u32 },
    ResetState,
    Save,
    Load,
    Reset,
    Shutdown,
}

impl Request {
    fn is_query(&self) -> bool {
        matches!(
            self,
            Request::GetState
                | Request::ListModules
                | Request::ModuleNodes { .. }
                | Request::NodeEdges { .. }
                | Request::Connectivity { .. }
                | Request::ExportSnapshot
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
enum Response {
    State(StateSnapshot),
    Modules { modules: Vec<ModuleDescriptor> },
    Nodes { nodes: Vec<NodeInfo> },
    Edges { incoming: Vec<EdgeView>, outgoing: Vec<EdgeView> },
    Connectivity(Connectivity),
    Snapshot(NetworkSnapshot),
    ModuleAdded { id: ModuleId },
    Success { message: String },
    Error { message: String },
}

impl Response {
    fn ok(message: impl Into<String>) -> Self {
        Response::Success {
            message: message.into(),
        }
    }

    fn err(message: impl Into<String>) -> Self {
        Response::Error {
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StateSnapshot {
    running: bool,
    tick_rate_hz: u32,
    diagnostics: Diagnostics,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NodeInfo {
    id: NodeId,
    kind: NodeKind,
    neuron_type: NeuronType,
    label: String,
    x: f32,
    y: f32,
    potential: f32,
    activation: f32,
    is_firing: bool,
    firing_rate: f32,
    current_threshold: f32,
}

impl From<&Node> for NodeInfo {
    fn from(n: &Node) -> Self {
        Self {
            id: n.id,
            kind: n.kind,
            neuron_type: n.neuron_type(),
            label: n.label.clone(),
            x: n.x,
            y: n.y,
            potential: n.potential,
            activation: n.activation,
            is_firing: n.is_firing,
            firing_rate: n.firing_rate,
            current_threshold: n.current_threshold,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Daemon State
// ═══════════════════════════════════════════════════════════════════════════

struct DaemonState {
    network: Network,
    running: bool,
    paths: AppPaths,
    config: DaemonConfig,
    last_autosave_tick: u64,
}

impl DaemonState {
    fn new(paths: AppPaths, config: DaemonConfig) -> Self {
        Self {
            network: Network::new(config.engine),
            running: config.autostart,
            paths,
            config,
            last_autosave_tick: 0,
        }
    }

    fn tick(&mut self) {
        if !self.running {
            return;
        }
        self.network.step();

        let every = self.config.autosave_every_ticks;
        let now = self.network.tick_count();
        if every > 0 && now.saturating_sub(self.last_autosave_tick) >= every {
            match self.save_network() {
                Ok(()) => info!("autosave at tick {}", now),
                Err(e) => error!("autosave failed at tick {}: {}", now, e),
            }
            self.last_autosave_tick = now;
        }
    }

    fn get_snapshot(&self) -> StateSnapshot {
        StateSnapshot {
            running: self.running,
            tick_rate_hz: self.config.tick_rate_hz,
            diagnostics: self.network.diagnostics(),
        }
    }

    fn save_network(&self) -> Result<(), DaemonError> {
        let path = self.paths.network_file();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = File::create(&path)?;
        self.network.save_image_to(&mut file)?;
        info!("network saved to {:?}", path);
        Ok(())
    }

    fn load_network(&mut self) -> Result<(), DaemonError> {
        let path = self.paths.network_file();
        if !path.exists() {
            return Err(DaemonError::NotFound(path));
        }
        let mut file = File::open(&path)?;
        self.network = Network::load_image_from(&mut file, self.config.engine)?;
        self.last_autosave_tick = self.network.tick_count();
        info!("network loaded from {:?}", path);
        Ok(())
    }

    fn reset_network(&mut self) {
        self.network = Network::new(self.config.engine);
        self.last_autosave_tick = 0;
        info!("network reset to an empty state");
    }

    /// Answer a read-only request.
    fn query(&self, request: &Request) -> Response {
        match request {
            Request::GetState => Response::State(self.get_snapshot()),
            Request::ListModules => Response::Modules {
                modules: self.network.modules().to_vec(),
            },
            Request::ModuleNodes { module } => match self.network.module(*module) {
                Some(_) => Response::Nodes {
                    nodes: self
                        .network
                        .module_nodes(*module)
                        .into_iter()
                        .map(NodeInfo::from)
                        .collect(),
                },
                None => Response::err(format!("unknown module {}", module)),
            },
            Request::NodeEdges { node } => match self.network.node(*node) {
                Some(_) => Response::Edges {
                    incoming: self.network.incoming_edges(*node),
                    outgoing: self.network.outgoing_edges(*node),
                },
                None => Response::err(format!("unknown node {}", node)),
            },
            Request::Connectivity { module } => match self.network.connectivity(*module) {
                Some(c) => Response::Connectivity(c),
                None => Response::err(format!("unknown module {}", module)),
            },
            Request::ExportSnapshot => Response::Snapshot(self.network.to_snapshot()),
            _ => Response::err("not a query"),
        }
    }

    /// Apply a request that may mutate state. `Shutdown` is handled by the caller.
    fn apply(&mut self, request: Request) -> Response {
        if request.is_query() {
            return self.query(&request);
        }

        match request {
            Request::AddModule { descriptor } => match self.network.add_module(descriptor) {
                Ok(id) => Response::ModuleAdded { id },
                Err(e) => Response::err(e.to_string()),
            },
            Request::UpdateModule { descriptor } => {
                let id = descriptor.id;
                match self.network.update_module(descriptor) {
                    Ok(true) => Response::ok(format!("module {} updated", id)),
                    Ok(false) => Response::err(format!("unknown module {}", id)),
                    Err(e) => Response::err(e.to_string()),
                }
            }
            Request::MoveModule { module, x, y } => {
                if self.network.move_module(module, x, y) {
                    Response::ok(format!("module {} moved", module))
                } else {
                    Response::err(format!("unknown module {}", module))
                }
            }
            Request::RenameModule { module, name } => {
                if self.network.rename_module(module, &name) {
                    Response::ok(format!("module {} renamed", module))
                } else {
                    Response::err(format!("unknown module {}", module))
                }
            }
            Request::RemoveModule { module } => {
                if self.network.remove_module(module) {
                    Response::ok(format!("module {} removed", module))
                } else {
                    Response::err(format!("unknown module {}", module))
                }
            }
            Request::ConnectModules { link } => {
                let key = link.key();
                let made = self.network.connect_modules(link);
                Response::ok(format!("{}: {} edges", key, made))
            }
            Request::DisconnectModules { a, b } => {
                let removed = self.network.disconnect_modules(a, b);
                Response::ok(format!("{} edges removed", removed))
            }
            Request::SetSensorInput { node, value } => {
                if self.network.set_sensor_input(node, value) {
                    Response::ok(format!("node {} input set", node))
                } else {
                    Response::err(format!("node {} is not a sensor", node))
                }
            }
            Request::SetNodeLabel { node, label } => {
                if self.network.set_node_label(node, &label) {
                    Response::ok(format!("node {} labelled", node))
                } else {
                    Response::err(format!("unknown node {}", node))
                }
            }
            Request::SetGlobalDecay { decay } => {
                let changed = self.network.set_global_decay(decay);
                Response::ok(format!("decay set on {} nodes", changed))
            }
            Request::ImportSnapshot { snapshot } => {
                self.network = Network::from_snapshot(snapshot, self.config.engine);
                self.last_autosave_tick = self.network.tick_count();
                Response::ok("snapshot imported")
            }
            Request::Step { ticks } => {
                let ticks = ticks.clamp(1, MAX_STEP_TICKS);
                self.network.run(ticks);
                Response::State(self.get_snapshot())
            }
            Request::Start => {
                self.running = true;
                Response::ok("Started")
            }
            Request::Stop => {
                self.running = false;
                match self.save_network() {
                    Ok(()) => Response::ok("Stopped and saved"),
                    Err(e) => Response::err(format!("Stopped but save failed: {}", e)),
                }
            }
            Request::SetTickRate { hz } => {
                let clamped = hz.clamp(1, MAX_TICK_RATE_HZ);
                self.config.tick_rate_hz = clamped;
                info!("tick rate set to {} Hz", clamped);
                Response::ok(format!("Tick rate set to {} Hz", clamped))
            }
            Request::ResetState => {
                self.network.reset_state();
                self.last_autosave_tick = 0;
                Response::ok("Network state reset")
            }
            Request::Save => match self.save_network() {
                Ok(()) => Response::ok("Network saved"),
                Err(e) => Response::err(e.to_string()),
            },
            Request::Load => match self.load_network() {
                Ok(()) => Response::ok("Network loaded"),
                Err(e) => Response::err(e.to_string()),
            },
            Request::Reset => {
                self.reset_network();
                Response::ok("Network reset")
            }
            Request::Shutdown => Response::err("shutdown must be handled by the server"),
            _ => Response::err("unsupported request"),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Client Handler
// ═══════════════════════════════════════════════════════════════════════════

async fn write_response<W: AsyncWriteExt + Unpin>(
    writer: &mut W,
    response: &Response,
) -> Result<(), Box<dyn std::error::Error>> {
    writer
        .write_all(serde_json::to_string(response)?.as_bytes())
        .await?;
    writer.write_all(b"\n").await?;
    Ok(())
}

async fn handle_client(
    stream: TcpStream,
    state: Arc<RwLock<DaemonState>>,
) -> Result<(), Box<dyn std::error::Error>> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    while let Some(line) = lines.next_line().await? {
        let request: Request = match serde_json::from_str(&line) {
            Ok(req) => req,
            Err(e) => {
                write_response(&mut writer, &Response::err(format!("Invalid request: {}", e)))
                    .await?;
                continue;
            }
        };

        let response = if matches!(request, Request::Shutdown) {
            let s = state.read().await;
            match s.save_network() {
                Ok(()) => {
                    info!("shutdown requested; network saved");
                    tokio::spawn(async {
                        // Give the response a moment to flush before exiting.
                        time::sleep(Duration::from_millis(50)).await;
                        std::process::exit(0);
                    });
                    Response::ok("Shutting down")
                }
                Err(e) => Response::err(format!("Save failed, aborting shutdown: {}", e)),
            }
        } else if request.is_query() {
            state.read().await.query(&request)
        } else {
            state.write().await.apply(request)
        };

        write_response(&mut writer, &response).await?;
    }

    Ok(())
}

// ═══════════════════════════════════════════════════════════════════════════
// Main
// ═══════════════════════════════════════════════════════════════════════════

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let paths = AppPaths::new()?;
    info!("Data directory: {:?}", paths.data_dir());
    info!("Network file: {:?}", paths.network_file());

    let config = DaemonConfig::load(&paths.config_file())?;
    let addr = config.listen_addr.clone();
    let state = Arc::new(RwLock::new(DaemonState::new(paths, config)));

    // Save on Ctrl-C so state persists even if the daemon is stopped abruptly.
    {
        let state = Arc::clone(&state);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                let s = state.read().await;
                if let Err(e) = s.save_network() {
                    error!("save on Ctrl-C failed: {}", e);
                }
                std::process::exit(0);
            }
        });
    }

    {
        let mut s = state.write().await;
        if let Err(e) = s.load_network() {
            warn!("Could not load network: {}", e);
            info!("Starting with an empty network");
        }
    }

    let listener = TcpListener::bind(&addr).await?;
    info!("spikenetd listening on {}", addr);

    // Tick loop
    let state_clone = Arc::clone(&state);
    tokio::spawn(async move {
        loop {
            let hz = {
                let s = state_clone.read().await;
                s.config.tick_rate_hz.max(1)
            };
            let tick_millis = (1000 / hz).max(1) as u64;
            time::sleep(Duration::from_millis(tick_millis)).await;

            let mut s = state_clone.write().await;
            s.tick();
        }
    });

    loop {
        let (stream, peer) = listener.accept().await?;
        info!("Client connected: {}", peer);
        let state_clone = Arc::clone(&state);

        tokio::spawn(async move {
            if let Err(e) = handle_client(stream, state_clone).await {
                error!("Client handler error: {}", e);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spikenet::module::ModuleKind;

    fn state(name: &str) -> DaemonState {
        let dir = std::env::temp_dir().join(format!("spikenetd-test-{}-{}", name, std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        let paths = AppPaths::at(dir).unwrap();
        let config = DaemonConfig {
            engine: spikenet::EngineConfig::with_seed(4),
            ..Default::default()
        };
        DaemonState::new(paths, config)
    }

    fn request(json: &str) -> Request {
        serde_json::from_str(json).unwrap()
    }

    fn added(resp: Response) -> ModuleId {
        match resp {
            Response::ModuleAdded { id } => id,
            other => panic!("expected ModuleAdded, got {:?}", other),
        }
    }

    #[test]
    fn requests_use_type_tag() {
        assert!(matches!(request(r#"{"type":"Step","ticks":3}"#), Request::Step { ticks: 3 }));
        assert!(request(r#"{"type":"GetState"}"#).is_query());
        assert!(!request(r#"{"type":"Start"}"#).is_query());
        assert!(serde_json::from_str::<Request>(r#"{"type":"Dance"}"#).is_err());
    }

    #[test]
    fn build_and_inspect_through_requests() {
        let mut s = state("inspect");
        let a = added(s.apply(Request::AddModule {
            descriptor: ModuleDescriptor::sensor("in", 2),
        }));
        let b = added(s.apply(Request::AddModule {
            descriptor: ModuleDescriptor::recurrent("core", 10).at(300.0, 0.0),
        }));
        s.apply(Request::ConnectModules {
            link: ModuleLink::new(a, b, 50.0, 0.0),
        });

        match s.query(&Request::ListModules) {
            Response::Modules { modules } => {
                assert_eq!(modules.len(), 2);
                assert_eq!(modules[1].kind, ModuleKind::Recurrent);
            }
            other => panic!("unexpected {:?}", other),
        }

        let sensor = match s.query(&Request::ModuleNodes { module: a }) {
            Response::Nodes { nodes } => {
                assert_eq!(nodes.len(), 2);
                nodes[0].id
            }
            other => panic!("unexpected {:?}", other),
        };
        match s.query(&Request::NodeEdges { node: sensor }) {
            Response::Edges { incoming, outgoing } => {
                assert!(incoming.is_empty());
                assert_eq!(outgoing.len(), 5);
            }
            other => panic!("unexpected {:?}", other),
        }

        assert!(matches!(
            s.query(&Request::ModuleNodes { module: 99 }),
            Response::Error { .. }
        ));
    }

    #[test]
    fn step_advances_ticks_and_clamps() {
        let mut s = state("step");
        s.apply(Request::AddModule {
            descriptor: ModuleDescriptor::recurrent("core", 8),
        });
        match s.apply(Request::Step { ticks: 0 }) {
            Response::State(snap) => assert_eq!(snap.diagnostics.tick_count, 1),
            other => panic!("unexpected {:?}", other),
        }
        s.apply(Request::Step { ticks: 4 });
        assert_eq!(s.network.tick_count(), 5);

        s.apply(Request::ResetState);
        assert_eq!(s.network.tick_count(), 0);
    }

    #[test]
    fn tick_only_steps_while_running() {
        let mut s = state("running");
        s.config.autosave_every_ticks = 0;
        s.tick();
        assert_eq!(s.network.tick_count(), 0);
        s.apply(Request::Start);
        s.tick();
        s.tick();
        assert_eq!(s.network.tick_count(), 2);
    }

    #[test]
    fn save_then_load_restores_topology() {
        let mut s = state("persist");
        added(s.apply(Request::AddModule {
            descriptor: ModuleDescriptor::recurrent("core", 12),
        }));
        s.apply(Request::Step { ticks: 3 });
        assert!(matches!(s.apply(Request::Save), Response::Success { .. }));
        let edges = s.network.diagnostics().connection_count;

        s.apply(Request::Reset);
        assert_eq!(s.network.diagnostics().node_count, 0);

        assert!(matches!(s.apply(Request::Load), Response::Success { .. }));
        let d = s.network.diagnostics();
        assert_eq!(d.node_count, 12);
        assert_eq!(d.connection_count, edges);
        assert_eq!(d.tick_count, 3);
    }

    #[test]
    fn load_without_file_is_an_error() {
        let mut s = state("missing");
        assert!(matches!(s.apply(Request::Load), Response::Error { .. }));
    }

    #[test]
    fn tick_rate_is_clamped() {
        let mut s = state("rate");
        s.apply(Request::SetTickRate { hz: 0 });
        assert_eq!(s.config.tick_rate_hz, 1);
        s.apply(Request::SetTickRate { hz: 50_000 });
        assert_eq!(s.config.tick_rate_hz, MAX_TICK_RATE_HZ);
    }
}
