use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use parking_lot::Mutex;
use serde_json::json;
use std::sync::Arc;

use crate::benchmark::{run_benchmark, BenchmarkParams};
use crate::channel::Channel;
use crate::effect::{Effect, Exit};
use crate::engine::Engine;
use crate::init::{initialize, load_config, InitOptions};
use crate::types::Val;

#[derive(Parser)]
#[command(name = "conduit")]
#[command(about = "Conduit - a pull-based channel execution engine", long_about = None)]
pub struct Cli {
    /// Path to config file (overrides default search)
    #[arg(long, global = true)]
    pub config: Option<String>,

    /// Log filter directive (overrides config file, not RUST_LOG)
    #[arg(long, global = true)]
    pub log: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a built-in scenario and print its elements and exit as JSON
    Demo {
        #[arg(value_enum)]
        scenario: Scenario,
    },

    /// Measure throughput of a chain of piped channels
    Bench {
        /// Number of identity stages piped after the source
        #[arg(long, default_value = "16")]
        depth: usize,

        /// Number of elements the source emits
        #[arg(long, default_value = "10000")]
        elements: usize,

        /// Number of runs
        #[arg(long, default_value = "5")]
        runs: usize,

        /// Fan each element out through concat_map
        #[arg(long)]
        concat: bool,

        /// Stop starting new runs after this long (e.g., "30s", "5m")
        #[arg(long)]
        timeout: Option<String>,
    },

    /// Print the effective configuration as TOML
    Config,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Scenario {
    Emit,
    Bracket,
    Concat,
    Pipe,
    Bridge,
}

/// Run the CLI by parsing process arguments
pub async fn run_cli() -> Result<()> {
    let cli = Cli::parse();
    run_cli_with_args(cli).await
}

/// Run the CLI with provided arguments
pub async fn run_cli_from_args(args: Vec<String>) -> Result<()> {
    let cli = Cli::parse_from(args);
    run_cli_with_args(cli).await
}

async fn run_cli_with_args(cli: Cli) -> Result<()> {
    let options = InitOptions {
        config_path: cli.config,
        log_filter: cli.log,
        ..InitOptions::default()
    };

    match cli.command {
        Commands::Config => {
            let config = load_config(&options)?;
            let rendered = config.to_toml().context("Failed to render configuration")?;
            print!("{}", rendered);
        }
        Commands::Demo { scenario } => {
            let engine = initialize(options)?;
            let output = run_demo(&engine, scenario).await?;
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        Commands::Bench {
            depth,
            elements,
            runs,
            concat,
            timeout,
        } => {
            let engine = initialize(options)?;
            run_benchmark(
                &engine,
                BenchmarkParams {
                    depth,
                    elements,
                    runs,
                    concat,
                    timeout,
                },
            )
            .await?;
        }
    }

    Ok(())
}

/* ===================== Demo scenarios ===================== */

/// Run `scenario` and describe the outcome as JSON
///
/// Elements are recorded as they pass, so a failing scenario still reports
/// what it emitted before failing.
pub async fn run_demo(engine: &Engine, scenario: Scenario) -> Result<serde_json::Value> {
    let released: Arc<Mutex<Vec<Val>>> = Arc::new(Mutex::new(Vec::new()));
    let seen: Arc<Mutex<Vec<Val>>> = Arc::new(Mutex::new(Vec::new()));

    let sink = seen.clone();
    let channel = demo_channel(engine, scenario, released.clone()).map_out(move |value: Val| {
        sink.lock().push(value.clone());
        value
    });
    let exit = engine.run_drain(channel).await;

    let elements = std::mem::take(&mut *seen.lock());
    let mut output = json!({
        "scenario": format!("{:?}", scenario).to_lowercase(),
        "elements": elements,
        "exit": exit,
    });
    if scenario == Scenario::Bracket {
        let released = std::mem::take(&mut *released.lock());
        output["released"] = serde_json::to_value(released)?;
    }
    Ok(output)
}

fn demo_channel(engine: &Engine, scenario: Scenario, released: Arc<Mutex<Vec<Val>>>) -> Channel {
    match scenario {
        Scenario::Emit => Channel::emit(1)
            .then(Channel::emit(2))
            .then(Channel::succeed_now("done")),
        Scenario::Bracket => Channel::acquire_release_out(
            || Effect::succeed(42),
            move |resource: Val, _: &Exit| {
                let released = released.clone();
                Effect::sync(move || {
                    released.lock().push(resource);
                    Val::Unit
                })
            },
        )
        .then(Channel::fail("boom")),
        Scenario::Concat => Channel::write_all(vec![1, 2]).concat_map(|value: Val| {
            Channel::emit(value.as_int().unwrap_or_default() * 10)
        }),
        Scenario::Pipe => Channel::write_all(vec![1, 2, 3])
            .then(Channel::succeed_now("upstream done"))
            .pipe_to(Channel::identity())
            .map_out(|value: Val| Val::Int(value.as_int().unwrap_or_default() + 100)),
        Scenario::Bridge => {
            let input = engine.bridge_input();
            Channel::write_all(vec!["a", "b", "c"])
                .then(Channel::succeed_now("bridged"))
                .pipe_to(input.channel().embed_input(input))
        }
    }
}
