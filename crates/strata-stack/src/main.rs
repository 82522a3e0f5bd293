use anyhow::{Context, Result};
use clap::{Arg, ArgAction, ArgMatches, Command};
use strata_engine::PhasedPlan;
use strata_graph::NodeId;
use strata_stack::{plan, simulate, Simulation, StackConfig};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn config_arg() -> Arg {
    Arg::new("config")
        .long("config")
        .short('c')
        .help("Stack configuration (TOML); defaults apply when absent")
}

fn json_arg() -> Arg {
    Arg::new("json")
        .long("json")
        .action(ArgAction::SetTrue)
        .help("Output as JSON")
}

fn load_config(args: &ArgMatches) -> Result<StackConfig> {
    match args.get_one::<String>("config") {
        Some(path) => StackConfig::load(path).with_context(|| format!("loading {path}")),
        None => Ok(StackConfig::default()),
    }
}

fn print_plan(plan: &PhasedPlan) {
    println!("Deployment Plan");
    println!("===============");
    for (label, phase) in [("substrate", &plan.substrate), ("workload", &plan.workload)] {
        println!();
        println!("{label} ({} nodes, {} batches)", phase.node_count(), phase.len());
        for (index, batch) in phase.batches().iter().enumerate() {
            let ids: Vec<&str> = batch.iter().map(NodeId::as_str).collect();
            println!("  [{}] {}", index + 1, ids.join(", "));
        }
    }
    println!();
    println!("Fingerprint: {}", plan.fingerprint);
}

fn print_simulation(simulation: &Simulation) {
    let result = &simulation.result;
    println!("Simulation Report");
    println!("=================");
    println!();
    println!("Run: {}", result.run_id);
    println!("Status: {}", result.status);
    let states: Vec<String> = result.states().iter().map(ToString::to_string).collect();
    println!("States: {}", states.join(" -> "));
    println!("Realized: {}", result.realized.len());
    println!("Manifests applied: {}", simulation.applied_manifests);
    println!();
    println!("Outputs:");
    for (name, value) in result.plain_outputs() {
        println!("  {name} = {value}");
    }
    for name in &simulation.stored_secrets {
        println!("  (secret) {name}");
    }
    if let Some(teardown) = &simulation.teardown {
        println!();
        println!("Teardown: {} ({} deleted)", teardown.status, teardown.deleted.len());
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_target(false).with_writer(std::io::stderr))
        .init();

    let cli = Command::new("strata")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Declarative provisioning of the build-runner cluster")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .subcommand(
            Command::new("plan")
                .about("Print the phased deployment plan")
                .arg(config_arg())
                .arg(json_arg()),
        )
        .subcommand(
            Command::new("simulate")
                .about("Apply the stack against in-memory collaborators")
                .arg(config_arg())
                .arg(json_arg())
                .arg(
                    Arg::new("teardown")
                        .long("teardown")
                        .action(ArgAction::SetTrue)
                        .help("Destroy the stack after a successful apply"),
                ),
        );

    let matches = cli.get_matches();

    match matches.subcommand() {
        Some(("plan", args)) => {
            let config = load_config(args)?;
            let plan = plan(&config)?;
            if args.get_flag("json") {
                println!("{}", serde_json::to_string_pretty(&plan)?);
            } else {
                print_plan(&plan);
            }
        }
        Some(("simulate", args)) => {
            let config = load_config(args)?;
            let simulation = simulate(&config, args.get_flag("teardown")).await?;
            if args.get_flag("json") {
                let report = serde_json::json!({
                    "run_id": simulation.result.run_id,
                    "status": simulation.result.status.to_string(),
                    "states": simulation.result.states(),
                    "outputs": simulation.result.outputs,
                    "secrets": simulation.stored_secrets,
                });
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_simulation(&simulation);
            }
            if !simulation.result.is_success() {
                std::process::exit(1);
            }
        }
        _ => unreachable!("subcommand is required"),
    }
    Ok(())
}
