use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use clarion::config;
use clarion::pipeline::{
    DirectPipeline, GenerationOptions, InstructionSet, OllamaTransport, ProgressSink, PromptSet,
    Transport,
};
use clarion::render;

/// Generate structured Markdown documents from text files with a local model.
#[derive(Parser, Debug)]
#[command(name = "clarion", version, about)]
struct Cli {
    /// Input text files to process.
    #[arg(long = "input", num_args = 1.., required_unless_present = "list_models")]
    inputs: Vec<PathBuf>,

    /// Directory the generated documents are written to.
    #[arg(long, default_value = "out")]
    out_dir: PathBuf,

    /// Inline instruction; takes priority over prompt files.
    #[arg(long)]
    instruction: Option<String>,

    /// Files whose contents are layered into the instruction, in order.
    #[arg(long = "prompt-file")]
    prompt_files: Vec<PathBuf>,

    /// Model name on the Ollama endpoint.
    #[arg(long, default_value = "llama3.1")]
    model: String,

    /// Base URL of the Ollama endpoint.
    #[arg(long, default_value = "http://localhost:11434")]
    base_url: String,

    #[arg(long)]
    temperature: Option<f32>,

    #[arg(long)]
    top_p: Option<f32>,

    /// Context window size in tokens.
    #[arg(long)]
    num_ctx: Option<usize>,

    /// Skip the review pass.
    #[arg(long)]
    fast: bool,

    /// List the models available on the endpoint and exit.
    #[arg(long)]
    list_models: bool,
}

/// Progress messages go straight to stdout for interactive runs.
struct StdoutSink;

impl ProgressSink for StdoutSink {
    fn notify(&self, message: &str) {
        println!("{message}");
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config::default_log_filter())),
        )
        .init();

    tracing::info!("{} v{}", config::APP_NAME, config::APP_VERSION);

    let cli = Cli::parse();
    match run(cli).await {
        Ok(failures) if failures == 0 => ExitCode::SUCCESS,
        Ok(failures) => {
            tracing::error!(failures, "Some documents failed");
            ExitCode::FAILURE
        }
        Err(e) => {
            tracing::error!("Fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> std::io::Result<usize> {
    let transport = Arc::new(OllamaTransport::new(
        &cli.base_url,
        config::REQUEST_TIMEOUT_SECS,
    ));

    if cli.list_models {
        return match transport.list_models().await {
            Ok(models) => {
                for model in models {
                    println!("{model}");
                }
                Ok(0)
            }
            Err(e) => Err(std::io::Error::other(format!("cannot list models: {e}"))),
        };
    }

    fs::create_dir_all(&cli.out_dir)?;

    let instructions = InstructionSet {
        user_override_texts: read_prompt_files(&cli.prompt_files),
        inline_instruction: cli.instruction.clone(),
    };

    let mut options = GenerationOptions {
        fast_mode: cli.fast,
        ..Default::default()
    };
    if let Some(t) = cli.temperature {
        options.temperature = t;
    }
    if let Some(p) = cli.top_p {
        options.top_p = p;
    }
    if let Some(n) = cli.num_ctx {
        options.num_ctx = n;
    }

    let pipeline = DirectPipeline::new(transport, Arc::new(PromptSet::builtin()), &cli.model);
    let sink = StdoutSink;

    // One document failing must not take its siblings down with it.
    let mut failures = 0usize;
    for input in &cli.inputs {
        let input_id = input.display().to_string();
        println!("── {input_id} ──");

        let text = match fs::read_to_string(input) {
            Ok(text) => text,
            Err(e) => {
                tracing::error!(input = %input_id, "Cannot read input: {e}");
                failures += 1;
                continue;
            }
        };

        match pipeline
            .run(&input_id, &text, &instructions, &options, &sink)
            .await
        {
            Ok(result) => {
                let out_path = output_path(&cli.out_dir, input);
                let markdown = render::render_markdown(&result.final_doc);
                if let Err(e) = fs::write(&out_path, markdown) {
                    tracing::error!(path = %out_path.display(), "Cannot write output: {e}");
                    failures += 1;
                } else {
                    println!("Saved: {}", out_path.display());
                }
            }
            Err(e) => {
                tracing::error!(input = %input_id, "Generation failed: {e}");
                failures += 1;
            }
        }
    }

    Ok(failures)
}

/// An unreadable prompt file is a warning, not a run failure.
fn read_prompt_files(paths: &[PathBuf]) -> Vec<String> {
    let mut texts = Vec::new();
    for path in paths {
        match fs::read_to_string(path) {
            Ok(text) => texts.push(text),
            Err(e) => {
                tracing::warn!(path = %path.display(), "Skipping unreadable prompt file: {e}");
            }
        }
    }
    texts
}

fn output_path(out_dir: &Path, input: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "document".to_string());
    out_dir.join(format!("{stem}_doc.md"))
}
