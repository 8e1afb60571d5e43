mod config;
mod ports_cmd;
mod run_cmd;
mod teardown_cmd;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use config::Overrides;

#[derive(Parser)]
#[command(name = "corral", about = "Bare-metal cluster lifecycle harness")]
struct Cli {
    /// Config file path (defaults to ~/.config/corral/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a starter config file
    Init {
        /// Overwrite an existing config file
        #[arg(long)]
        force: bool,
    },
    /// Run the full bootstrap -> validate -> teardown cycle
    Run {
        /// Cluster name (overrides config)
        #[arg(long)]
        cluster: Option<String>,
        /// Path to the cluster-management executable (overrides CORRAL_CTL and config)
        #[arg(long)]
        ctl: Option<PathBuf>,
        /// Append a random suffix to the cluster name, for isolated parallel runs
        #[arg(long)]
        unique: bool,
        /// Rows written and read back by the validation workload
        #[arg(long)]
        batch_size: Option<usize>,
        /// Cancel the bootstrap automatically after this many seconds (bounded mode)
        #[arg(long)]
        launch_deadline: Option<u64>,
    },
    /// Delete a cluster left behind by a crashed run
    Teardown {
        /// Cluster name
        name: String,
        /// Path to the cluster-management executable
        #[arg(long)]
        ctl: Option<PathBuf>,
    },
    /// Host-port maintenance
    Ports {
        #[command(subcommand)]
        command: PortsCommands,
    },
}

#[derive(Subcommand)]
enum PortsCommands {
    /// Sweep the configured ports, killing stale owners
    Free,
}

/// Execute `corral init`: write a default config file.
fn cmd_init(path_flag: Option<&std::path::Path>, force: bool) -> anyhow::Result<()> {
    let path = path_flag
        .map(PathBuf::from)
        .unwrap_or_else(config::config_path);

    if path.exists() && !force {
        anyhow::bail!(
            "config file already exists at {}\nUse --force to overwrite.",
            path.display()
        );
    }

    let defaults = corral_core::config::HarnessConfig::default();
    config::save_config(&path, &defaults)?;

    println!("Config written to {}", path.display());
    println!("  cluster_name = {}", defaults.cluster_name);
    println!("  ctl_binary = {}", defaults.ctl_binary.display());
    println!();
    println!("Edit it, then run `corral run`.");
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Init { force } => {
            cmd_init(cli.config.as_deref(), force)?;
        }
        Commands::Run {
            cluster,
            ctl,
            unique,
            batch_size,
            launch_deadline,
        } => {
            let overrides = Overrides {
                cluster,
                ctl,
                batch_size,
                launch_deadline,
            };
            let resolved = config::resolve(cli.config.as_deref(), &overrides)?;
            run_cmd::cmd_run(resolved, unique).await?;
        }
        Commands::Teardown { name, ctl } => {
            let overrides = Overrides {
                ctl,
                ..Overrides::default()
            };
            let resolved = config::resolve(cli.config.as_deref(), &overrides)?;
            teardown_cmd::cmd_teardown(&resolved, &name).await?;
        }
        Commands::Ports { command } => {
            let resolved = config::resolve(cli.config.as_deref(), &Overrides::default())?;
            match command {
                PortsCommands::Free => ports_cmd::cmd_ports_free(&resolved).await?,
            }
        }
    }

    Ok(())
}
