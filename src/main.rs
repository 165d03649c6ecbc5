use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use mindmap::graph_renderer;
use mindmap::lifecycle::{GenerationConfig, GenerationController};
use mindmap::service::{GenerationContext, NotebookInfo, WebhookService};
use mindmap::store::{GenerationStatus, InMemoryStore};
use mindmap::view::MindmapView;
use mindmap::{OutputFormat, RenderOptions};

#[derive(Parser)]
#[command(name = "mindmap", about = "Normalize, lay out and generate notebook mindmaps")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, ValueEnum)]
enum Format {
    Outline,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// Render a mindmap payload as a text outline or as layout JSON
    Render {
        /// Input file (reads from stdin if not provided)
        file: Option<PathBuf>,

        /// Expand this node as well as the root (repeatable)
        #[arg(long, value_name = "ID")]
        expand: Vec<String>,

        /// Expand every node that has children
        #[arg(long)]
        expand_all: bool,

        /// Label to show on the root node
        #[arg(long)]
        title: Option<String>,

        #[arg(long, value_enum, default_value_t = Format::Outline)]
        format: Format,

        /// Maximum output width in columns
        #[arg(long, short = 'w')]
        width: Option<usize>,

        /// Print node descriptions under their labels
        #[arg(long, short = 'd')]
        descriptions: bool,
    },

    /// Print a payload in canonical {nodes, edges} form
    Normalize {
        /// Input file (reads from stdin if not provided)
        file: Option<PathBuf>,
    },

    /// Ask the generation webhook for a mindmap and wait for the answer
    Generate {
        #[arg(long)]
        notebook: String,

        /// JSON file holding the notebook context (messages, sources, notes)
        #[arg(long)]
        context: Option<PathBuf>,

        #[arg(long, env = "MINDMAP_GENERATION_WEBHOOK_URL")]
        webhook_url: Option<String>,

        #[arg(long, env = "NOTEBOOK_GENERATION_AUTH", hide_env_values = true)]
        auth: Option<String>,

        /// Where the generator should post its result
        #[arg(long)]
        callback_url: Option<String>,

        #[arg(long, default_value_t = 120)]
        timeout_secs: u64,
    },
}

fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let result = match cli.command {
        Command::Render {
            file,
            expand,
            expand_all,
            title,
            format,
            width,
            descriptions,
        } => read_input(file).and_then(|input| {
            let options = RenderOptions {
                expand,
                expand_all,
                title,
                max_width: width,
                descriptions,
                format: match format {
                    Format::Outline => OutputFormat::Outline,
                    Format::Json => OutputFormat::Json,
                },
            };
            mindmap::render_with_options(&input, &options).map_err(|e| e.to_string())
        }),
        Command::Normalize { file } => read_input(file).and_then(|input| {
            let graph = mindmap::normalize::normalize_str(&input).map_err(|e| e.to_string())?;
            serde_json::to_string_pretty(&graph).map_err(|e| e.to_string())
        }),
        Command::Generate {
            notebook,
            context,
            webhook_url,
            auth,
            callback_url,
            timeout_secs,
        } => generate(notebook, context, webhook_url, auth, callback_url, timeout_secs),
    };

    match result {
        Ok(output) => println!("{output}"),
        Err(e) => {
            eprintln!("ERROR: {e}");
            std::process::exit(1);
        }
    }
}

fn read_input(file: Option<PathBuf>) -> Result<String, String> {
    match file {
        Some(path) => std::fs::read_to_string(&path)
            .map_err(|e| format!("failed to read {}: {e}", path.display())),
        None => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .map_err(|e| format!("failed to read stdin: {e}"))?;
            Ok(buf)
        }
    }
}

fn generate(
    notebook: String,
    context: Option<PathBuf>,
    webhook_url: Option<String>,
    auth: Option<String>,
    callback_url: Option<String>,
    timeout_secs: u64,
) -> Result<String, String> {
    let context = match context {
        Some(path) => {
            let text = std::fs::read_to_string(&path)
                .map_err(|e| format!("failed to read {}: {e}", path.display()))?;
            serde_json::from_str::<GenerationContext>(&text)
                .map_err(|e| format!("invalid context in {}: {e}", path.display()))?
        }
        None => GenerationContext {
            notebook: NotebookInfo {
                id: notebook.clone(),
                ..NotebookInfo::default()
            },
            ..GenerationContext::default()
        },
    };

    let runtime = tokio::runtime::Runtime::new().map_err(|e| format!("failed to start runtime: {e}"))?;
    runtime.block_on(async move {
        let config = GenerationConfig {
            failure_timeout: Duration::from_secs(timeout_secs),
            callback_url,
            ..GenerationConfig::default()
        };
        let controller = GenerationController::new(
            notebook,
            Arc::new(InMemoryStore::new()),
            Arc::new(WebhookService::new(webhook_url, auth)),
            config,
        );
        controller.generate(context).map_err(|e| e.user_message())?;

        let snapshot = controller.settled().await;
        match (snapshot.status, snapshot.graph, snapshot.error) {
            (GenerationStatus::Completed, Some(graph), _) => {
                let layout = MindmapView::new(&graph).layout().map_err(|e| e.user_message())?;
                Ok(graph_renderer::render(&layout))
            }
            (_, _, Some(err)) => Err(err.user_message()),
            (status, _, _) => Err(format!("generation ended with status {status}")),
        }
    })
}
