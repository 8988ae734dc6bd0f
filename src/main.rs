use agent_scheduler::cli::{
    Args, ConfigDiscovery, ExecutionMode,
    commands::{run_discover, run_plan, run_scan, run_show_config},
};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Initialize logging; RUST_LOG wins over the defaults
    let default_filter = if args.verbose {
        "agent_scheduler=debug"
    } else {
        "agent_scheduler=info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let mode = match args.mode() {
        Ok(mode) => mode,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    let settings = ConfigDiscovery::load(args.config.as_deref())?;
    info!("Starting agent scheduler");

    let result = match mode {
        ExecutionMode::Discover(config) => run_discover(config).await,
        ExecutionMode::Plan(config) => run_plan(config, &settings).await,
        ExecutionMode::Scan(config) => run_scan(config, settings).await,
        ExecutionMode::ShowConfig => run_show_config(&settings),
    };

    if let Err(e) = result {
        error!("Command failed: {:#}", e);
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
    Ok(())
}
