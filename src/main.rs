use std::path::Path;
use std::process;
use std::time::Instant;

use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use spikenet::observer::NetworkAdapter;
use spikenet::trainer::{Trainer, TrainerConfig, TrainingSet};
use spikenet::module::LearningConfig;
use spikenet::{EngineConfig, InputMode, ModuleDescriptor, ModuleLink, Network};

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args: Vec<String> = std::env::args().collect();
    if args.len() < 2 || args[1] == "--help" || args[1] == "-h" || args[1] == "help" {
        print_help();
        return;
    }

    let result = match args[1].as_str() {
        "run" => run(&args[2..]),
        "train" => train(&args[2..]),
        "demo" => demo(&args[2..]),
        other => {
            eprintln!("Unknown command: {}", other);
            print_help();
            process::exit(2);
        }
    };

    if let Err(msg) = result {
        error!("{}", msg);
        process::exit(1);
    }
}

fn print_help() {
    println!("spikenet (spiking network simulator)");
    println!("usage:");
    println!("  spikenet run <in.json> <out.json> [--steps N] [--seed S] [--benchmark]");
    println!("  spikenet train <in.json> <data.json> <out.json> [--epochs N] [--steps-per-item N] [--no-shuffle] [--seed S]");
    println!("  spikenet demo [--steps N] [--seed S]");
    println!("  spikenet --help");
    println!();
    println!("--seed replaces the random stream saved in the input snapshot; without it a reload resumes that stream.");
}

/// Flags shared by the subcommands.
struct Opts {
    positional: Vec<String>,
    steps: u64,
    seed: Option<u64>,
    benchmark: bool,
    epochs: u32,
    steps_per_item: u32,
    shuffle: bool,
}

fn parse_opts(args: &[String], default_steps: u64) -> Result<Opts, String> {
    let mut opts = Opts {
        positional: Vec::new(),
        steps: default_steps,
        seed: None,
        benchmark: false,
        epochs: 1,
        steps_per_item: TrainerConfig::default().steps_per_item,
        shuffle: true,
    };

    let mut it = args.iter();
    while let Some(arg) = it.next() {
        let mut value = |name: &str| -> Result<String, String> {
            it.next().cloned().ok_or_else(|| format!("{name} needs a value"))
        };
        match arg.as_str() {
            "--steps" => opts.steps = parse_num(&value("--steps")?, "--steps")?,
            "--seed" => opts.seed = Some(parse_num(&value("--seed")?, "--seed")?),
            "--epochs" => opts.epochs = parse_num(&value("--epochs")?, "--epochs")?,
            "--steps-per-item" => {
                opts.steps_per_item = parse_num(&value("--steps-per-item")?, "--steps-per-item")?
            }
            "--benchmark" => opts.benchmark = true,
            "--no-shuffle" => opts.shuffle = false,
            flag if flag.starts_with("--") => return Err(format!("unknown flag {flag}")),
            _ => opts.positional.push(arg.clone()),
        }
    }
    Ok(opts)
}

fn parse_num<T: std::str::FromStr>(text: &str, name: &str) -> Result<T, String> {
    text.parse().map_err(|_| format!("{name} must be a number, got '{text}'"))
}

fn engine_config(seed: Option<u64>) -> EngineConfig {
    match seed {
        Some(s) => EngineConfig::with_seed(s),
        None => EngineConfig::default(),
    }
}

fn load(path: &str, seed: Option<u64>) -> Result<Network, String> {
    if !Path::new(path).exists() {
        return Err(format!("input file '{path}' not found"));
    }
    let start = Instant::now();
    let mut net = Network::load_json(path, engine_config(seed)).map_err(|e| format!("{path}: {e}"))?;
    if let Some(seed) = seed {
        net.reseed(seed);
    }
    let d = net.diagnostics();
    info!(
        "loaded {}: {} nodes, {} connections, {} modules in {:.4}s",
        path,
        d.node_count,
        d.connection_count,
        d.module_count,
        start.elapsed().as_secs_f64()
    );
    Ok(net)
}

/// Headless run: load, step, save.
fn run(args: &[String]) -> Result<(), String> {
    let opts = parse_opts(args, 100)?;
    let [input, output] = opts.positional.as_slice() else {
        return Err("run needs <in.json> <out.json>".to_string());
    };

    let mut net = load(input, opts.seed)?;

    info!("running {} steps", opts.steps);
    let start = Instant::now();
    for i in 0..opts.steps {
        net.step();
        if (i + 1) % 100 == 0 {
            info!("step {}/{}", i + 1, opts.steps);
        }
    }
    let secs = start.elapsed().as_secs_f64();
    info!("simulation completed in {:.4}s", secs);
    if opts.benchmark && secs > 0.0 {
        println!("speed: {:.2} ticks/s", opts.steps as f64 / secs);
    }

    net.save_json(output).map_err(|e| format!("{output}: {e}"))?;
    Ok(())
}

fn train(args: &[String]) -> Result<(), String> {
    let opts = parse_opts(args, 0)?;
    let [input, data, output] = opts.positional.as_slice() else {
        return Err("train needs <in.json> <data.json> <out.json>".to_string());
    };

    let mut net = load(input, opts.seed)?;
    let set = TrainingSet::load(data).map_err(|e| format!("{data}: {e}"))?;
    if set.mappings.is_empty() {
        return Err(format!("{data}: no concept mappings, nothing to train"));
    }

    let trainer = Trainer::new(
        set,
        TrainerConfig {
            steps_per_item: opts.steps_per_item,
            shuffle: opts.shuffle,
        },
    );
    info!(
        "training: {} epochs, {} rows, {} steps/item",
        opts.epochs,
        trainer.rows(),
        opts.steps_per_item
    );

    let start = Instant::now();
    for e in 0..opts.epochs {
        info!("epoch {}/{}", e + 1, opts.epochs);
        trainer.run_epoch(&mut net);
    }
    info!("training completed in {:.2}s", start.elapsed().as_secs_f64());

    net.save_json(output).map_err(|e| format!("{output}: {e}"))?;
    Ok(())
}

/// Sensor -> recurrent -> sustained actuator pipeline with noise input.
fn demo(args: &[String]) -> Result<(), String> {
    let opts = parse_opts(args, 1000)?;
    let mut net = Network::new(engine_config(opts.seed.or(Some(7))));

    let learning = LearningConfig {
        hebbian: true,
        regrowth_rate: 0.5,
        synaptic_scaling: true,
        adaptive_threshold: true,
        ..Default::default()
    };

    let build = |net: &mut Network| -> Result<(), spikenet::error::ConfigError> {
        let input = net.add_module(ModuleDescriptor::sensor("input", 8).with_input(InputMode::Noise, 0.25))?;
        let core = net.add_module(
            ModuleDescriptor::recurrent("core", 120)
                .at(400.0, 0.0)
                .with_learning(learning),
        )?;
        let output = net.add_module(ModuleDescriptor::actuator("output", 4).sustained().at(800.0, 0.0))?;
        net.connect_modules(ModuleLink::new(input, core, 20.0, 10.0));
        net.connect_modules(ModuleLink::new(core, output, 10.0, 10.0));
        Ok(())
    };
    build(&mut net).map_err(|e| e.to_string())?;

    for t in 1..=opts.steps {
        net.step();
        if t % 100 == 0 {
            let d = net.diagnostics();
            println!(
                "t={t:5} nodes={} conns={} firing={:.3} avg_pot={:.3} pruned={} regrown={}",
                d.node_count,
                d.connection_count,
                d.firing_fraction,
                d.avg_potential,
                d.pruned_last_tick,
                d.regrown_last_tick
            );
        }
    }

    let report = NetworkAdapter::new(&net).snapshot();
    for m in &report.modules {
        println!(
            "{:<8} {:?}: nodes={} firing={} rate={:.3} in={} ({:.2}) out={} ({:.2}) self={} ({:.2})",
            m.name,
            m.kind,
            m.node_count,
            m.firing.len(),
            m.mean_firing_rate,
            m.connectivity.incoming_count,
            m.connectivity.incoming_weight,
            m.connectivity.outgoing_count,
            m.connectivity.outgoing_weight,
            m.connectivity.internal_count,
            m.connectivity.internal_weight,
        );
    }
    Ok(())
}
