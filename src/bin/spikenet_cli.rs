//! CLI client for the `spikenetd` daemon.
//!
//! Examples:
//!   spikenet-cli status
//!   spikenet-cli add recurrent core 120 400 0
//!   spikenet-cli connect 0 1 20 10
//!   spikenet-cli input 3 1.0
//!   spikenet-cli step 100
//!   spikenet-cli save
//!
//! By default it talks to 127.0.0.1:9877; override with `--addr host:port`.

use serde::{Deserialize, Serialize};
use spikenet::connection::EdgeView;
use spikenet::network::{Connectivity, Diagnostics};
use spikenet::{LinkSide, ModuleDescriptor, ModuleId, ModuleKind, ModuleLink, NodeId};
use std::io::{BufRead, BufReader, Write};
use std::net::TcpStream;
use std::process;
use std::str::FromStr;
use std::time::Duration;

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
    MoveModule { module: ModuleId, x: f32, y: f32 },
    RenameModule { module: ModuleId, name: String },
    RemoveModule { module: ModuleId },
    ConnectModules { link: ModuleLink },
    DisconnectModules { a: ModuleId, b: ModuleId },
    SetSensorInput { node: NodeId, value: f32 },
    SetNodeLabel { node: NodeId, label: String },
    SetGlobalDecay { decay: f32 },
    ImportSnapshot { snapshot: serde_json::Value },
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

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
enum Response {
    State(StateSnapshot),
    Modules { modules: Vec<ModuleDescriptor> },
    Nodes { nodes: Vec<NodeInfo> },
    Edges { incoming: Vec<EdgeView>, outgoing: Vec<EdgeView> },
    Connectivity(Connectivity),
    Snapshot(serde_json::Value),
    ModuleAdded { id: ModuleId },
    Success { message: String },
    Error { message: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StateSnapshot {
    running: bool,
    #[serde(default)]
    tick_rate_hz: u32,
    diagnostics: Diagnostics,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NodeInfo {
    id: NodeId,
    kind: serde_json::Value,
    #[serde(default)]
    label: String,
    x: f32,
    y: f32,
    potential: f32,
    is_firing: bool,
    firing_rate: f32,
}

fn usage() -> ! {
    eprintln!("spikenet-cli (talks to spikenetd @ 127.0.0.1:9877 by default)");
    eprintln!("Usage: spikenet-cli [--addr host:port] <command> [args]\n");
    eprintln!("Commands:");
    eprintln!("  status                          Show daemon state");
    eprintln!("  modules                         List module descriptors");
    eprintln!("  nodes <module>                  Show nodes of a module");
    eprintln!("  edges <node>                    Show incoming/outgoing edges of a node");
    eprintln!("  connectivity <module>           Edge counts around a module");
    eprintln!("  add <kind> <name> <count> [x y] Add a module (recurrent|sensor|actuator|interpretation)");
    eprintln!("  move <module> <x> <y>           Move a module");
    eprintln!("  rename <module> <name>          Rename a module");
    eprintln!("  remove <module>                 Remove a module");
    eprintln!("  connect <a> <b> <coverage> [leak] [all|left|right]");
    eprintln!("  disconnect <a> <b>              Remove edges between two modules");
    eprintln!("  input <node> <value>            Drive a sensor node");
    eprintln!("  label <node> <text>             Label a node");
    eprintln!("  decay <0-1>                     Set decay on every non-fixed node");
    eprintln!("  step [n]                        Advance n ticks (default 1)");
    eprintln!("  start | stop                    Control the tick loop");
    eprintln!("  rate <1-1000>                   Set tick rate in Hz");
    eprintln!("  reset-state                     Clear dynamic state, keep topology");
    eprintln!("  save | load | reset             Persistence controls");
    eprintln!("  export <file> | import <file>   Snapshot JSON transfer");
    eprintln!("  shutdown                        Save and exit daemon");
    eprintln!("  paths                           Show data directory and network file path");
    process::exit(1);
}

fn parse_args() -> (String, Vec<String>) {
    let mut args: Vec<String> = std::env::args().skip(1).collect();
    if args.is_empty() {
        usage();
    }

    let mut addr = "127.0.0.1:9877".to_string();
    if args.len() >= 2 && args[0] == "--addr" {
        addr = args[1].clone();
        args.drain(0..2);
    }

    if args.is_empty() {
        usage();
    }

    (addr, args)
}

fn send_request(addr: &str, req: &Request) -> Result<Response, String> {
    let mut stream = TcpStream::connect(addr).map_err(|e| format!("connect: {e}"))?;
    stream
        .set_read_timeout(Some(Duration::from_secs(30)))
        .map_err(|e| format!("set_read_timeout: {e}"))?;
    let mut reader = BufReader::new(stream.try_clone().map_err(|e| format!("clone: {e}"))?);

    let line = serde_json::to_string(req).map_err(|e| format!("serialize: {e}"))?;
    stream
        .write_all(line.as_bytes())
        .and_then(|_| stream.write_all(b"\n"))
        .map_err(|e| format!("send: {e}"))?;

    let mut resp_line = String::new();
    reader
        .read_line(&mut resp_line)
        .map_err(|e| format!("recv: {e}"))?;
    serde_json::from_str(&resp_line).map_err(|e| format!("parse response: {e}"))
}

fn fail(msg: &str) -> ! {
    eprintln!("{}", msg);
    process::exit(1);
}

/// Positional argument `i`, parsed.
fn arg<T: FromStr>(args: &[String], i: usize, what: &str) -> T {
    let Some(text) = args.get(i) else { usage() };
    text.parse()
        .unwrap_or_else(|_| fail(&format!("{what} must be a number, got '{text}'")))
}

fn parse_kind(text: &str) -> ModuleKind {
    match text {
        "recurrent" => ModuleKind::Recurrent,
        "sensor" => ModuleKind::Sensor,
        "actuator" => ModuleKind::Actuator,
        "interpretation" => ModuleKind::Interpretation,
        _ => fail("kind must be recurrent|sensor|actuator|interpretation"),
    }
}

fn parse_side(text: Option<&String>) -> LinkSide {
    match text.map(String::as_str) {
        None | Some("all") => LinkSide::All,
        Some("left") => LinkSide::Left,
        Some("right") => LinkSide::Right,
        Some(_) => fail("side must be all|left|right"),
    }
}

fn print_state(s: StateSnapshot) {
    let d = s.diagnostics;
    println!(
        "running={} rate={}Hz tick={} modules={} nodes={} conns={}",
        s.running, s.tick_rate_hz, d.tick_count, d.module_count, d.node_count, d.connection_count
    );
    println!(
        "firing={:.3} avg_potential={:.3} pruned={} regrown={}",
        d.firing_fraction, d.avg_potential, d.pruned_last_tick, d.regrown_last_tick
    );
}

fn print_edges(title: &str, edges: &[EdgeView]) {
    println!("{title} ({}):", edges.len());
    for e in edges {
        println!(
            "  {:>6} -> {:<6} w={:+.4} signal={:.4}",
            e.source_id, e.target_id, e.weight, e.signal_strength
        );
    }
}

fn main() {
    let (addr, args) = parse_args();
    let cmd = &args[0];
    let mut export_to: Option<String> = None;

    let req = match cmd.as_str() {
        "status" => Request::GetState,
        "modules" => Request::ListModules,
        "nodes" => Request::ModuleNodes {
            module: arg(&args, 1, "module"),
        },
        "edges" => Request::NodeEdges {
            node: arg(&args, 1, "node"),
        },
        "connectivity" => Request::Connectivity {
            module: arg(&args, 1, "module"),
        },
        "add" => {
            if args.len() < 4 {
                usage();
            }
            let kind = parse_kind(&args[1]);
            let mut descriptor = ModuleDescriptor::new(kind, &args[2], arg(&args, 3, "count"));
            if args.len() >= 6 {
                descriptor = descriptor.at(arg(&args, 4, "x"), arg(&args, 5, "y"));
            }
            Request::AddModule { descriptor }
        }
        "move" => Request::MoveModule {
            module: arg(&args, 1, "module"),
            x: arg(&args, 2, "x"),
            y: arg(&args, 3, "y"),
        },
        "rename" => {
            if args.len() < 3 {
                usage();
            }
            Request::RenameModule {
                module: arg(&args, 1, "module"),
                name: args[2].clone(),
            }
        }
        "remove" => Request::RemoveModule {
            module: arg(&args, 1, "module"),
        },
        "connect" => {
            let leak = if args.len() >= 5 { arg(&args, 4, "leak") } else { 0.0 };
            let link = ModuleLink::new(
                arg(&args, 1, "source"),
                arg(&args, 2, "target"),
                arg(&args, 3, "coverage"),
                leak,
            )
            .on_side(parse_side(args.get(5)));
            Request::ConnectModules { link }
        }
        "disconnect" => Request::DisconnectModules {
            a: arg(&args, 1, "module"),
            b: arg(&args, 2, "module"),
        },
        "input" => Request::SetSensorInput {
            node: arg(&args, 1, "node"),
            value: arg(&args, 2, "value"),
        },
        "label" => {
            if args.len() < 3 {
                usage();
            }
            Request::SetNodeLabel {
                node: arg(&args, 1, "node"),
                label: args[2..].join(" "),
            }
        }
        "decay" => Request::SetGlobalDecay {
            decay: arg(&args, 1, "decay"),
        },
        "step" => Request::Step {
            ticks: if args.len() >= 2 { arg(&args, 1, "ticks") } else { 1 },
        },
        "start" => Request::Start,
        "stop" => Request::Stop,
        "rate" => Request::SetTickRate {
            hz: arg(&args, 1, "rate"),
        },
        "reset-state" => Request::ResetState,
        "save" => Request::Save,
        "load" => Request::Load,
        "reset" => Request::Reset,
        "shutdown" => Request::Shutdown,
        "export" => {
            let Some(path) = args.get(1) else { usage() };
            export_to = Some(path.clone());
            Request::ExportSnapshot
        }
        "import" => {
            let Some(path) = args.get(1) else { usage() };
            let text = std::fs::read_to_string(path)
                .unwrap_or_else(|e| fail(&format!("read {path}: {e}")));
            let snapshot = serde_json::from_str(&text)
                .unwrap_or_else(|e| fail(&format!("parse {path}: {e}")));
            Request::ImportSnapshot { snapshot }
        }
        "paths" => {
            // Special command: doesn't need daemon, just print paths
            #[cfg(unix)]
            {
                if let Ok(home) = std::env::var("HOME") {
                    let data_dir = format!("{}/.local/share/spikenet", home);
                    println!("Data directory: {}", data_dir);
                    println!("Network file: {}/network.snn", data_dir);
                }
            }
            #[cfg(windows)]
            {
                if let Ok(appdata) = std::env::var("APPDATA") {
                    let data_dir = format!("{}\\spikenet", appdata);
                    println!("Data directory: {}", data_dir);
                    println!("Network file: {}\\network.snn", data_dir);
                }
            }
            process::exit(0);
        }
        _ => usage(),
    };

    match send_request(&addr, &req) {
        Ok(Response::State(s)) => print_state(s),
        Ok(Response::Modules { modules }) => {
            for m in modules {
                println!(
                    "{:>4} {:<16} {:?} nodes={} at ({:.0}, {:.0})",
                    m.id, m.name, m.kind, m.node_count, m.x, m.y
                );
            }
        }
        Ok(Response::Nodes { nodes }) => {
            for n in nodes {
                println!(
                    "{:>6} {} {:<12} ({:.1}, {:.1}) v={:.3} rate={:.3}{}",
                    n.id,
                    n.kind,
                    n.label,
                    n.x,
                    n.y,
                    n.potential,
                    n.firing_rate,
                    if n.is_firing { " *" } else { "" }
                );
            }
        }
        Ok(Response::Edges { incoming, outgoing }) => {
            print_edges("incoming", &incoming);
            print_edges("outgoing", &outgoing);
        }
        Ok(Response::Connectivity(c)) => println!(
            "in={} ({:.3}) out={} ({:.3}) internal={} ({:.3})",
            c.incoming_count,
            c.incoming_weight,
            c.outgoing_count,
            c.outgoing_weight,
            c.internal_count,
            c.internal_weight
        ),
        Ok(Response::Snapshot(snapshot)) => {
            let text = serde_json::to_string_pretty(&snapshot)
                .unwrap_or_else(|e| fail(&format!("encode snapshot: {e}")));
            match export_to {
                Some(path) => {
                    std::fs::write(&path, text).unwrap_or_else(|e| fail(&format!("write {path}: {e}")));
                    println!("snapshot written to {path}");
                }
                None => println!("{text}"),
            }
        }
        Ok(Response::ModuleAdded { id }) => println!("module {id} added"),
        Ok(Response::Success { message }) => println!("{message}"),
        Ok(Response::Error { message }) => {
            eprintln!("Error: {message}");
            process::exit(1);
        }
        Err(e) => {
            eprintln!("Failed: {e}");
            process::exit(1);
        }
    }
}
