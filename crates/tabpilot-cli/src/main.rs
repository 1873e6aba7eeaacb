use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tabpilot_config::{AppConfig, ConfigLoader};
use tabpilot_gateway::GatewayServer;
use tabpilot_skills::{SkillLoader, SkillSource};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "tabpilot")]
#[command(version)]
#[command(about = "Local orchestrator that lets an assistant drive your browser")]
struct Cli {
    /// Configuration file (default: ~/.tabpilot/config.toml)
    #[arg(short, long, global = true, env = "TABPILOT_CONFIG")]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the orchestrator until Ctrl-C
    Serve {
        /// Port to listen on, overriding the config file
        #[arg(long)]
        port: Option<u16>,
    },

    /// Print the effective configuration
    Config,

    /// List the skills injected for a hostname
    Skills { hostname: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let loader = match &cli.config {
        Some(path) => ConfigLoader::with_path(path),
        None => ConfigLoader::new(),
    };
    let mut config = loader.load().context("failed to load configuration")?;

    match cli.command {
        Commands::Serve { port } => {
            if let Some(port) = port {
                config.gateway.port = port;
            }
            tracing::info!("starting tabpilot on {}", config.gateway.bind_addr());
            GatewayServer::new(config).run().await?;
        }
        Commands::Config => print_config(config)?,
        Commands::Skills { hostname } => list_skills(&config, &hostname),
    }

    Ok(())
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn print_config(mut config: AppConfig) -> Result<()> {
    if config.agent.api_key.is_some() {
        config.agent.api_key = Some("<redacted>".to_string());
    }
    let rendered = toml::to_string_pretty(&config).context("failed to render configuration")?;
    println!("{rendered}");
    Ok(())
}

fn list_skills(config: &AppConfig, hostname: &str) {
    let skills = SkillLoader::new(&config.paths.skills_dir).resolve(hostname);
    if skills.is_empty() {
        println!(
            "no skills for {hostname} under {}",
            config.paths.skills_dir.display()
        );
        return;
    }
    for skill in skills {
        println!("{:<24} {:<24} {}", skill.name, skill.domain, skill.path.display());
    }
}
