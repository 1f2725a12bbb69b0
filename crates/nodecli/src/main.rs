// crates/nodecli/src/main.rs

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use nodecore::NodeInfo;
use noderegistry::{
    AppConfig, ConfigOverrides, CreateNodeRequest, NodeDefinitionService, ParameterInput,
};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "nodes")]
#[command(about = "Custom node registry CLI", long_about = None)]
struct Cli {
    /// Directory holding the node definition files
    #[arg(long, global = true)]
    nodes_dir: Option<PathBuf>,

    /// Working directory used to locate the config file and node directory
    #[arg(long, global = true)]
    work_dir: Option<PathBuf>,

    /// Path to a TOML config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Show debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List registered nodes
    List {
        /// Print the node descriptors as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show one node's descriptor
    Show { id: String },

    /// Print a node's source code
    Code { id: String },

    /// Register a new node from a source file
    Create {
        /// Requested node id; an id declared in the source wins
        #[arg(long)]
        id: String,

        /// Path to the node source
        #[arg(short, long)]
        file: PathBuf,
    },

    /// Replace a node's source code
    Update {
        id: String,

        /// Path to the new node source
        #[arg(short, long)]
        file: PathBuf,
    },

    /// Replace a node's input and output parameters
    Params {
        id: String,

        /// JSON file with `inputs` and `outputs` objects
        #[arg(short, long)]
        file: PathBuf,
    },

    /// Delete a node and its source file
    Delete { id: String },

    /// Rescan the node directory and report id conflicts
    Rescan,
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        std::env::var("LOG_LEVEL")
            .ok()
            .and_then(|level| EnvFilter::try_new(level).ok())
            .unwrap_or_else(|| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = AppConfig::resolve(ConfigOverrides {
        work_dir: cli.work_dir,
        nodes_dir: cli.nodes_dir,
        config_file: cli.config,
        ..Default::default()
    })?;
    tracing::debug!("Using node directory {}", config.registry.nodes_dir.display());
    let service = NodeDefinitionService::new(config.registry);

    match cli.command {
        Commands::List { json } => list_nodes(&service, json).await?,
        Commands::Show { id } => {
            let info = service.get(&id).await?;
            println!("{}", serde_json::to_string_pretty(&info)?);
        }
        Commands::Code { id } => {
            print!("{}", service.get_code(&id).await?);
        }
        Commands::Create { id, file } => {
            let source_code = read_source(&file)?;
            let entry = service
                .create(CreateNodeRequest {
                    node_id: id,
                    source_code,
                })
                .await?;
            println!("✨ Created node '{}' ({})", entry.id, entry.source_file);
        }
        Commands::Update { id, file } => {
            let source_code = read_source(&file)?;
            let entry = service.update_code(&id, &source_code).await?;
            if entry.id != id {
                println!("✅ Updated node '{}' (renamed from '{}')", entry.id, id);
            } else {
                println!("✅ Updated node '{}'", entry.id);
            }
        }
        Commands::Params { id, file } => {
            let json = read_source(&file)?;
            let params: ParameterInput = serde_json::from_str(&json)
                .with_context(|| format!("Invalid parameter file {}", file.display()))?;
            service
                .update_parameters(&id, &params.inputs, &params.outputs)
                .await?;
            println!(
                "✅ Updated parameters of '{}': {} input(s), {} output(s)",
                id,
                params.inputs.len(),
                params.outputs.len()
            );
        }
        Commands::Delete { id } => {
            service.delete(&id).await?;
            println!("🗑️  Deleted node '{}'", id);
        }
        Commands::Rescan => {
            let outcome = service.rescan().await?;
            println!("🔍 Registered nodes: {}", outcome.registry.len());
            if outcome.conflicts.is_empty() {
                println!("   No id conflicts");
            } else {
                println!("⚠️  Id conflicts:");
                for conflict in &outcome.conflicts {
                    println!("   • {}", conflict);
                }
            }
        }
    }

    Ok(())
}

async fn list_nodes(service: &NodeDefinitionService, json: bool) -> Result<()> {
    let nodes = service.list().await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&nodes)?);
        return Ok(());
    }

    println!("📦 Custom Nodes ({}):", nodes.len());
    println!();
    for node in &nodes {
        print_node(node);
    }
    Ok(())
}

fn print_node(node: &NodeInfo) {
    let descriptor = &node.descriptor;
    println!("  • {} ({})", node.id, descriptor.category);
    println!("    {} [{}]", descriptor.name, node.source_file);
    if !descriptor.description.is_empty() {
        println!("    {}", descriptor.description);
    }
    if !descriptor.inputs.is_empty() {
        let inputs: Vec<&str> = descriptor.inputs.keys().map(String::as_str).collect();
        println!("    inputs: {}", inputs.join(", "));
    }
    if !descriptor.outputs.is_empty() {
        let outputs: Vec<&str> = descriptor.outputs.keys().map(String::as_str).collect();
        println!("    outputs: {}", outputs.join(", "));
    }
}

fn read_source(file: &PathBuf) -> Result<String> {
    std::fs::read_to_string(file).with_context(|| format!("Cannot read {}", file.display()))
}
