use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use pipecore::services::Collaborators;
use pipecore::{
    CanvasPayload, ExecutionEvent, LogLevel, NewPipeline, NodeEvent, NodeValues, PipelineEdge, PipelineNode,
    RunStatus, ValueMap,
};
use pipenodes::clients::{HttpAiClient, LocalFileStorage};
use pipenodes::HttpTemplateRenderer;
use piperuntime::{ExecutionPlanner, NodeRegistry, PipelineEngine, PipelineGraph, RuntimeConfig};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "pipeline")]
#[command(about = "Pipeline Engine CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a pipeline file
    Run {
        /// Path to pipeline JSON file
        #[arg(short, long)]
        file: PathBuf,

        /// Per-node input data as JSON: {"node_id": {"port": value}}
        #[arg(short, long)]
        input: Option<String>,

        /// Show verbose output
        #[arg(short, long)]
        verbose: bool,
    },

    /// Validate a pipeline file without executing it
    Validate {
        /// Path to pipeline JSON file
        #[arg(short, long)]
        file: PathBuf,
    },

    /// Execute one node and its ancestors
    Preview {
        #[arg(short, long)]
        file: PathBuf,

        /// Node to preview
        #[arg(short, long)]
        node: String,

        /// Input overrides for the node as JSON: {"port": value}
        #[arg(short, long)]
        input: Option<String>,
    },

    /// List available node types
    Nodes,

    /// Create an example pipeline file
    Init {
        /// Output file path
        #[arg(short, long, default_value = "pipeline.json")]
        output: PathBuf,
    },
}

/// On-disk pipeline: the graph plus a name.
#[derive(Debug, Serialize, Deserialize)]
struct PipelineFile {
    name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    nodes: Vec<PipelineNode>,
    #[serde(default)]
    edges: Vec<PipelineEdge>,
}

fn load_pipeline(file: &PathBuf) -> Result<PipelineFile> {
    let raw = std::fs::read_to_string(file).with_context(|| format!("reading {}", file.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parsing {}", file.display()))
}

fn parse_json<T: for<'de> Deserialize<'de> + Default>(input: Option<String>, what: &str) -> Result<T> {
    match input {
        Some(raw) => serde_json::from_str(&raw).with_context(|| format!("{} must be a JSON object", what)),
        None => Ok(T::default()),
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)))
        .init();
}

fn registry() -> NodeRegistry {
    let renderer_url = std::env::var("TEMPLATE_RENDERER_URL")
        .unwrap_or_else(|_| "http://localhost:3336".to_string());
    pipenodes::default_registry(Arc::new(HttpTemplateRenderer::new(renderer_url)))
}

fn services() -> Collaborators {
    let root = std::env::var("STORAGE_ROOT").unwrap_or_else(|_| "./storage".to_string());
    let public = format!("file://{}", root);
    let services = Collaborators::offline().with_files(Arc::new(LocalFileStorage::new(root, public)));
    match std::env::var("AI_GATEWAY_URL") {
        Ok(url) => services.with_ai(Arc::new(HttpAiClient::new(url))),
        Err(_) => {
            tracing::debug!("AI_GATEWAY_URL not set, AI nodes will fail");
            services
        }
    }
}

/// Engine holding `file` as a saved pipeline
async fn load_into_engine(file: &PipelineFile) -> Result<(PipelineEngine, Uuid, Uuid)> {
    let (engine, _worker) = PipelineEngine::start(Arc::new(registry()), services(), RuntimeConfig::from_env());
    let brand_id = Uuid::new_v4();
    let pipeline = engine
        .create_pipeline(
            brand_id,
            NewPipeline {
                name: file.name.clone(),
                description: file.description.clone(),
            },
        )
        .await?;
    engine
        .save_canvas(
            brand_id,
            pipeline.id,
            CanvasPayload {
                canvas_state: None,
                nodes: file.nodes.clone(),
                edges: file.edges.clone(),
            },
        )
        .await?;
    tracing::debug!(pipeline_id = %pipeline.id, nodes = file.nodes.len(), "Pipeline loaded into engine");
    Ok((engine, brand_id, pipeline.id))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run { file, input, verbose } => {
            init_logging(verbose);
            run_pipeline(file, input).await?;
        }

        Commands::Validate { file } => {
            init_logging(false);
            validate_pipeline(file)?;
        }

        Commands::Preview { file, node, input } => {
            init_logging(false);
            preview_node(file, node, input).await?;
        }

        Commands::Nodes => {
            list_nodes();
        }

        Commands::Init { output } => {
            create_example_pipeline(output)?;
        }
    }

    Ok(())
}

async fn run_pipeline(file: PathBuf, input: Option<String>) -> Result<()> {
    println!("🚀 Loading pipeline from: {}", file.display());

    let pipeline_file = load_pipeline(&file)?;
    let input_data: NodeValues = parse_json(input, "--input")?;

    println!("📋 Pipeline: {}", pipeline_file.name);
    println!("   Nodes: {}", pipeline_file.nodes.len());
    println!("   Edges: {}", pipeline_file.edges.len());
    println!();

    let (engine, brand_id, pipeline_id) = load_into_engine(&pipeline_file).await?;

    let mut events = engine.subscribe_events();
    let event_task = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                ExecutionEvent::RunStarted { .. } => {
                    println!("▶️  Run started");
                }
                ExecutionEvent::NodeStarted { node_id, node_type, .. } => {
                    println!("  ⚡ Starting node: {} ({})", node_id, node_type);
                }
                ExecutionEvent::NodeCompleted { node_id, duration_ms, .. } => {
                    println!("  ✅ Node {} completed in {}ms", node_id, duration_ms);
                }
                ExecutionEvent::NodeFailed { node_id, error, .. } => {
                    println!("  ❌ Node {} failed: {}", node_id, error);
                }
                ExecutionEvent::NodeEvent { node_id, event, .. } => match event {
                    NodeEvent::Log { level: LogLevel::Info, message } => {
                        println!("     ℹ️  [{}] {}", node_id, message);
                    }
                    NodeEvent::Log { level: LogLevel::Warning, message } => {
                        println!("     ⚠️  [{}] {}", node_id, message);
                    }
                    NodeEvent::Stage { percent, stage } => {
                        println!("     📊 [{}] {}% - {}", node_id, percent, stage);
                    }
                    NodeEvent::Stored { path } => {
                        println!("     💾 [{}] {}", node_id, path);
                    }
                },
                ExecutionEvent::RunCompleted { status, duration_ms, .. } => {
                    if status == RunStatus::Succeeded {
                        println!("✨ Run succeeded in {}ms", duration_ms);
                    } else {
                        println!("💥 Run failed after {}ms", duration_ms);
                    }
                }
            }
        }
    });

    let mut run = engine.execute(brand_id, pipeline_id, input_data).await?;
    if !run.is_finished() {
        println!("⏳ Run {} queued", run.id);
    }
    while !run.is_finished() {
        tokio::time::sleep(Duration::from_millis(200)).await;
        run = engine.run_status(brand_id, pipeline_id, run.id).await?;
        tracing::debug!(run_id = %run.id, status = %run.status, "Polled run status");
    }

    // Let the listener drain before printing the summary
    tokio::time::sleep(Duration::from_millis(100)).await;
    event_task.abort();
    engine.shutdown();

    println!();
    println!("📊 Run Summary:");
    println!("   Run ID: {}", run.id);
    println!("   Status: {}", run.status);
    println!("   Completed: {}/{} nodes", run.node_results.len(), pipeline_file.nodes.len());

    if let Some(error) = &run.error_message {
        println!("   Error: {}", error);
    }
    if let Some(output) = &run.output_data {
        println!();
        println!("📤 Output:");
        println!("{}", serde_json::to_string_pretty(output)?);
    }
    if let Some(path) = &run.output_path {
        println!("🖼️  Output image: {}", path);
    }

    if run.status == RunStatus::Failed {
        bail!("run failed");
    }
    Ok(())
}

fn validate_pipeline(file: PathBuf) -> Result<()> {
    println!("🔍 Validating pipeline: {}", file.display());

    let pipeline_file = load_pipeline(&file)?;
    let registry = registry();

    let graph = PipelineGraph::build(&pipeline_file.nodes, &pipeline_file.edges, &registry)?;
    let plan = ExecutionPlanner::new(&registry).plan(&graph, None, &NodeValues::new(), &ValueMap::new())?;

    println!("✅ Pipeline is valid:");
    println!("   Name: {}", pipeline_file.name);
    println!("   Nodes: {}", pipeline_file.nodes.len());
    println!("   Edges: {}", pipeline_file.edges.len());
    println!(
        "   Order: {}",
        plan.node_ids().cloned().collect::<Vec<_>>().join(" → ")
    );

    Ok(())
}

async fn preview_node(file: PathBuf, node: String, input: Option<String>) -> Result<()> {
    let pipeline_file = load_pipeline(&file)?;
    let inputs: ValueMap = parse_json(input, "--input")?;

    println!("🔎 Previewing node {} of {}", node, pipeline_file.name);
    let (engine, brand_id, pipeline_id) = load_into_engine(&pipeline_file).await?;
    let outputs = engine.execute_up_to(brand_id, pipeline_id, &node, inputs).await?;
    engine.shutdown();

    println!("📤 Outputs:");
    println!("{}", serde_json::to_string_pretty(&outputs)?);
    Ok(())
}

fn list_nodes() {
    println!("📦 Available Node Types:");
    println!();

    for info in registry().list_node_types() {
        println!("  • {} ({}, {})", info.node_type, info.label, info.icon);
        if !info.inputs.is_empty() {
            println!("    inputs:   {}", info.inputs.join(", "));
        }
        if !info.required_inputs.is_empty() {
            println!("    required: {}", info.required_inputs.join(", "));
        }
        if !info.outputs.is_empty() {
            println!("    outputs:  {}", info.outputs.join(", "));
        }
    }
}

fn create_example_pipeline(output: PathBuf) -> Result<()> {
    let fetch = PipelineNode::new("fetch", "http_fetch")
        .with_label("Fetch Quote")
        .with_config("url", "https://api.github.com/zen")
        .with_position(100.0, 100.0);
    let out = PipelineNode::new("out", "output")
        .with_label("Result")
        .with_position(400.0, 100.0);

    let pipeline = PipelineFile {
        name: "Example Fetch Pipeline".to_string(),
        description: Some("Fetches a line of text and returns it as output".to_string()),
        nodes: vec![fetch, out],
        edges: vec![PipelineEdge {
            edge_id: "e1".to_string(),
            source_node_id: "fetch".to_string(),
            source_handle: Some("data".to_string()),
            target_node_id: "out".to_string(),
            target_handle: Some("text".to_string()),
        }],
    };

    let json = serde_json::to_string_pretty(&pipeline)?;
    std::fs::write(&output, json)?;

    println!("✨ Created example pipeline: {}", output.display());
    println!();
    println!("Run it with:");
    println!("  pipeline run --file {}", output.display());

    Ok(())
}
