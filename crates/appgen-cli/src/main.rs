//! appgen CLI tool.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;
mod encoder;

#[derive(Parser)]
#[command(name = "appgen")]
#[command(about = "Generate build and deployment objects from source code", long_about = None)]
struct Cli {
    /// Emit logs as JSON
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate objects for a repository URL or local directory
    Generate(GenerateArgs),
    /// Validate a generator configuration file
    ValidateConfig {
        /// Path to the configuration file
        #[arg(default_value = "appgen.kdl")]
        path: PathBuf,
    },
}

#[derive(Args, Debug)]
pub struct GenerateArgs {
    /// Repository URL or local directory
    #[arg(default_value = ".")]
    pub source: String,

    /// Name for the generated objects
    #[arg(long)]
    pub name: Option<String>,

    /// Branch or tag to build
    #[arg(long = "ref")]
    pub git_ref: Option<String>,

    /// Build with the Dockerfile in this sub directory
    #[arg(long, conflicts_with = "builder_image")]
    pub docker_context: Option<String>,

    /// Build with this builder image
    #[arg(long)]
    pub builder_image: Option<String>,

    /// Port to expose, replacing any detected ports
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Environment for the deployment, as KEY=VALUE[,KEY=VALUE]
    #[arg(short = 'e', long = "env")]
    pub env: Vec<String>,

    /// Project namespace probed first when resolving images
    #[arg(long, env = "APPGEN_NAMESPACE")]
    pub namespace: Option<String>,

    /// Generator configuration file
    #[arg(long, env = "APPGEN_CONFIG", default_value = "appgen.kdl")]
    pub config: PathBuf,

    /// Build without the layer cache
    #[arg(long)]
    pub no_cache: bool,

    /// Reuse artifacts from the previous build
    #[arg(long)]
    pub incremental: bool,

    /// Only build, never deploy
    #[arg(long)]
    pub build_only: bool,

    /// Write the objects here instead of stdout
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if cli.log_json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }

    match cli.command {
        Commands::Generate(args) => {
            commands::generate(args).await?;
        }
        Commands::ValidateConfig { path } => {
            commands::validate_config(&path)?;
        }
    }

    Ok(())
}
