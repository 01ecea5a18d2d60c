// crates/packcli/src/main.rs

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use packcore::archive::JsonArchiveStore;
use packcore::{
    ExecutionEvent, Graph, GraphDocument, InMemorySchemaRegistry, NodeKind, NodeSpec, NoticeLevel,
    Payload, Services,
};
use packruntime::{GraphRuntime, GraphScheduler, RuntimeConfig};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "packflow")]
#[command(about = "Pack dataflow graph CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a graph document
    Run {
        /// Path to the graph JSON document
        #[arg(short, long)]
        file: PathBuf,

        /// Table schema definitions as JSON
        #[arg(short, long)]
        schemas: Option<PathBuf>,

        /// Directory archives are read from and written to
        #[arg(short, long, default_value = ".")]
        archive_root: PathBuf,

        /// Continue counter sequences instead of restarting them
        #[arg(long)]
        no_reset_counters: bool,

        /// Show verbose output
        #[arg(short, long)]
        verbose: bool,
    },

    /// Check a graph document without running it
    Validate {
        /// Path to the graph JSON document
        file: PathBuf,
    },

    /// List available node kinds
    Nodes,

    /// Create an example graph document
    Init {
        /// Output file path
        #[arg(short, long, default_value = "graph.json")]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            file,
            schemas,
            archive_root,
            no_reset_counters,
            verbose,
        } => {
            let level = if verbose { "debug" } else { "info" };
            tracing_subscriber::fmt()
                .with_env_filter(
                    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)),
                )
                .init();

            run_graph(&file, schemas.as_deref(), archive_root, no_reset_counters).await?;
        }

        Commands::Validate { file } => {
            validate_graph(&file)?;
        }

        Commands::Nodes => {
            list_nodes();
        }

        Commands::Init { output } => {
            create_example_graph(&output)?;
        }
    }

    Ok(())
}

fn load_document(file: &Path) -> Result<GraphDocument> {
    let json = std::fs::read_to_string(file)
        .with_context(|| format!("reading graph document {}", file.display()))?;
    Ok(GraphDocument::from_json(&json)?)
}

async fn run_graph(
    file: &Path,
    schemas: Option<&Path>,
    archive_root: PathBuf,
    no_reset_counters: bool,
) -> Result<()> {
    println!("Loading graph from: {}", file.display());
    let mut document = load_document(file)?;
    if no_reset_counters {
        document.options.reset_counters = false;
    }

    println!("   Nodes: {}", document.nodes.len());
    println!("   Connections: {}", document.connections.len());
    println!();

    let registry = match schemas {
        Some(path) => {
            let json = std::fs::read_to_string(path)
                .with_context(|| format!("reading schemas {}", path.display()))?;
            InMemorySchemaRegistry::from_json(&json)?
        }
        None => InMemorySchemaRegistry::new(),
    };
    let services = Services::new(Arc::new(JsonArchiveStore::new(archive_root)), Arc::new(registry));
    let runtime = GraphRuntime::with_registry(
        Arc::new(packnodes::default_registry()),
        services,
        RuntimeConfig::default(),
    );

    let mut events = runtime.subscribe_events();
    let event_task = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                ExecutionEvent::RunStarted { node_count, .. } => {
                    println!("Run started ({} nodes)", node_count);
                }
                ExecutionEvent::RunAborted { error, .. } => {
                    println!("Run aborted: {}", error);
                }
                ExecutionEvent::NodeStarted { node_id, kind, .. } => {
                    println!("  > {} ({})", node_id, kind);
                }
                ExecutionEvent::NodeCompleted { node_id, duration_ms, .. } => {
                    println!("  ok {} in {}ms", node_id, duration_ms);
                }
                ExecutionEvent::NodeFailed { node_id, error, .. } => {
                    println!("  FAILED {}: {}", node_id, error);
                }
                ExecutionEvent::NodeSkipped { node_id, .. } => {
                    println!("  skipped {}", node_id);
                }
                ExecutionEvent::NodeNotice {
                    node_id,
                    level,
                    message,
                    ..
                } => match level {
                    NoticeLevel::Info => println!("     [{}] {}", node_id, message),
                    NoticeLevel::Warning => println!("     [{}] warning: {}", node_id, message),
                },
                ExecutionEvent::RunCompleted {
                    success_count,
                    failure_count,
                    duration_ms,
                    ..
                } => {
                    println!(
                        "Run finished in {}ms: {} succeeded, {} failed",
                        duration_ms, success_count, failure_count
                    );
                }
            }
        }
    });

    let report = runtime.execute_document(&document).await;

    // Let the listener drain before printing the summary.
    tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
    event_task.abort();

    println!();
    println!("Execution Summary:");
    println!("   Execution ID: {}", report.execution_id);
    println!(
        "   Executed: {} ({} ok, {} failed, {} skipped)",
        report.total_executed,
        report.success_count,
        report.failure_count,
        report.skipped.len()
    );
    print!("{}", report.summary());

    let texts: Vec<(&String, &String)> = report
        .per_node
        .iter()
        .filter_map(|(id, r)| match &r.data {
            Some(Payload::Text(text)) => Some((id, text)),
            _ => None,
        })
        .collect();
    if !texts.is_empty() {
        println!();
        println!("Text outputs:");
        for (id, text) in texts {
            println!("--- {} ---", id);
            println!("{}", text);
        }
    }

    if let Some(error) = &report.error {
        anyhow::bail!("run failed: {}", error);
    }
    Ok(())
}

fn validate_graph(file: &Path) -> Result<()> {
    println!("Validating graph: {}", file.display());

    let document = load_document(file)?;
    let graph = document.graph();
    let registry = packnodes::default_registry();

    let mut problems = Vec::new();
    if let Err(e) = GraphScheduler::new().check_structure(&graph, &document.options) {
        problems.push(e.to_string());
    }
    for node in &graph.nodes {
        let Some(executor) = registry.get(node.kind) else {
            problems.push(format!("No executor registered for kind {}", node.kind));
            continue;
        };
        if let Err(e) = executor.validate_config(&node.configuration) {
            problems.push(format!("Node {} ({}): {}", node.id, node.kind, e));
        }
    }

    if problems.is_empty() {
        println!("Graph is valid:");
        println!("   Nodes: {}", graph.nodes.len());
        println!("   Connections: {}", graph.connections.len());
        Ok(())
    } else {
        for problem in &problems {
            println!("   {}", problem);
        }
        anyhow::bail!("{} problem(s) found", problems.len())
    }
}

fn list_nodes() {
    println!("Available node kinds:");
    println!();

    let registry = packnodes::default_registry();
    for kind in registry.list_node_kinds() {
        if let Some(metadata) = registry.get_metadata(kind) {
            println!("  {} ({})", kind, metadata.category);
            println!("    {}", metadata.description);
            if let Some(output) = metadata.output {
                println!("    output: {}", output);
            }
        } else {
            println!("  {}", kind);
        }
    }
}

fn create_example_graph(output: &Path) -> Result<()> {
    let mut graph = Graph::new();

    let pack = graph.add_node(
        NodeSpec::new("pack", NodeKind::PackFiles)
            .with_name("Mod Archive")
            .with_config("files", serde_json::json!(["my_mod.pack"]))
            .with_position(100.0, 100.0),
    );
    let table = graph.add_node(
        NodeSpec::new("units", NodeKind::TableSelection)
            .with_name("Units")
            .with_config("tables", serde_json::json!(["units_tables"]))
            .with_position(300.0, 100.0),
    );
    let filter = graph.add_node(
        NodeSpec::new("filter", NodeKind::Filter)
            .with_name("Empire Only")
            .with_config("column", "faction")
            .with_config("value", "emp")
            .with_position(500.0, 100.0),
    );
    let save = graph.add_node(
        NodeSpec::new("save", NodeKind::SaveChanges)
            .with_name("Save")
            .with_position(700.0, 100.0),
    );

    graph.connect(pack, table.clone());
    graph.connect(table, filter.clone());
    graph.connect(filter, save);

    let mut document = GraphDocument::new(graph);
    document.options.output_archive = Some("my_mod_patch.pack".to_string());
    std::fs::write(output, document.to_json()?)?;

    println!("Created example graph: {}", output.display());
    println!();
    println!("Run it with:");
    println!("  packflow run --file {} --archive-root <dir with my_mod.pack>", output.display());

    Ok(())
}
