mod host;
mod plan;
mod status;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use ship_core::{Kernel, KernelOptions};
use ship_world::{build_initial_state, list_scenarios, load_scenario, register_standard_modules};
use tracing_subscriber::EnvFilter;

use crate::host::{block_on_realtime, realtime_duration, Host};
use crate::plan::{parse_adjustment, parse_switch, Adjustment, Plan, Switch};
use crate::status::{format_log, format_status};

// ---------------------------------------------------------------------------
// CLI definition
// ---------------------------------------------------------------------------

#[derive(Parser)]
#[command(name = "ship_cli", about = "Headless starship bridge simulation")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a scenario for a fixed number of ticks.
    Run {
        #[arg(long, default_value = "./content/scenarios/default.json")]
        scenario: String,
        #[arg(long, default_value_t = 120)]
        ticks: u64,
        /// Overrides the scenario's RNG seed.
        #[arg(long)]
        seed: Option<u64>,
        /// Pace ticks on the wall clock instead of running flat out.
        #[arg(long)]
        realtime: bool,
        /// Overrides the scenario's tick rate.
        #[arg(long)]
        ticks_per_sec: Option<f64>,
        #[arg(long, default_value_t = 10)]
        print_every: u64,
        /// Power sliders `engines,shields,weapons,aux@tick`. Repeatable.
        #[arg(long = "distribution", value_parser = parse_adjustment)]
        distributions: Vec<Adjustment>,
        /// Request an auto-balance every N ticks.
        #[arg(long)]
        balance_every: Option<u64>,
        /// Swap to another scenario: `path@tick`. Repeatable.
        #[arg(long = "switch", value_parser = parse_switch)]
        switches: Vec<Switch>,
    },
    /// List the scenarios in a content directory.
    List {
        #[arg(long, default_value = "./content/scenarios")]
        dir: String,
    },
}

struct RunArgs {
    scenario: String,
    ticks: u64,
    seed: Option<u64>,
    realtime: bool,
    ticks_per_sec: Option<f64>,
    print_every: u64,
    plan: Plan,
}

// ---------------------------------------------------------------------------
// Run
// ---------------------------------------------------------------------------

fn boot_kernel(args: &RunArgs) -> Result<Kernel> {
    let scenario = load_scenario(&args.scenario)?;
    let mut config = scenario.kernel_config();
    if let Some(seed) = args.seed {
        config.seed = seed;
    }
    if let Some(rate) = args.ticks_per_sec {
        config.ticks_per_second = rate;
    }

    let state = build_initial_state(&scenario)?;
    let options = KernelOptions::default()
        .with_config(config)
        .with_log_sink(|entry| println!("{}", format_log(entry)))
        .with_error_sink(|error| {
            tracing::error!(
                module = %error.module_id,
                phase = %error.phase,
                "{}",
                error.message
            );
        });
    let mut kernel = Kernel::new(state, options);

    println!(
        "Starting scenario: {} ({}) seed={} ticks_per_sec={}",
        scenario.name,
        scenario.id,
        kernel.config().seed,
        kernel.config().ticks_per_second,
    );
    println!("{}", "-".repeat(80));
    kernel.boot();
    register_standard_modules(&mut kernel, &scenario)?;
    Ok(kernel)
}

fn run(args: RunArgs) -> Result<()> {
    let kernel = boot_kernel(&args)?;
    if args.realtime {
        tracing::info!(
            ticks = args.ticks,
            seconds = realtime_duration(&kernel, args.ticks).as_secs_f64(),
            "running in realtime"
        );
    }

    let mut host = Host::new(kernel, args.plan, args.print_every);
    let outcome = if args.realtime {
        block_on_realtime(&mut host, args.ticks)
    } else {
        host.run_fast(args.ticks)
    };

    let mut kernel = host.into_kernel();
    let reason = if outcome.is_ok() { "run complete" } else { "run aborted" };
    kernel.shutdown(reason);

    println!("{}", "-".repeat(80));
    println!("Done. Final state at tick {}:", kernel.tick_count());
    println!("{}", format_status(kernel.state(), kernel.tick_count()));
    outcome
}

fn list(dir: &str) -> Result<()> {
    for path in list_scenarios(dir)? {
        match load_scenario(&path) {
            Ok(scenario) => println!(
                "{:<24} {:<32} {}",
                scenario.id,
                scenario.name,
                path.display()
            ),
            Err(err) => println!("{:<24} invalid: {err:#}", path.display()),
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Run {
            scenario,
            ticks,
            seed,
            realtime,
            ticks_per_sec,
            print_every,
            distributions,
            balance_every,
            switches,
        } => {
            let args = RunArgs {
                scenario,
                ticks,
                seed,
                realtime,
                ticks_per_sec,
                print_every,
                plan: Plan::new(distributions, switches, balance_every),
            };
            run(args).context("simulation run failed")?;
        }
        Commands::List { dir } => list(&dir)?,
    }
    Ok(())
}
