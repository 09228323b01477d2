//! CLI for nanoedit - instruction-driven image editing.

use clap::{Args, Parser, Subcommand};
use nanoedit::image::gemini::API_KEY_ENV_VARS;
use nanoedit::{EditSession, EditStatus, GeminiEditor, GeminiModel, ImageEditor, ImageFormat};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "nanoedit")]
#[command(about = "Edit images with a natural-language instruction via Gemini")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Edit one or more images with an instruction
    Edit(EditArgs),

    /// List available models
    Models,

    /// Check that the API key and model are usable
    Check(CheckArgs),

    /// Run as MCP server (for AI agent integration)
    Mcp(McpArgs),
}

#[derive(Args)]
struct EditArgs {
    /// The instruction describing the edit
    instruction: String,

    /// Input image (repeat for several images)
    #[arg(short, long = "input", required = true)]
    inputs: Vec<PathBuf>,

    /// Output file path
    #[arg(short, long)]
    output: PathBuf,

    /// Model name or alias (e.g. nano-banana, nano-banana-pro)
    #[arg(short, long, env = "NANOEDIT_MODEL")]
    model: Option<String>,

    /// Seed for more repeatable output
    #[arg(long)]
    seed: Option<u64>,

    /// Retries on rate limits, timeouts and network errors
    #[arg(long, default_value_t = 0)]
    retries: u32,
}

#[derive(Args)]
struct CheckArgs {
    /// Model name or alias
    #[arg(short, long, env = "NANOEDIT_MODEL")]
    model: Option<String>,
}

#[derive(Args)]
struct McpArgs {
    /// Default model name or alias for tool calls
    #[arg(short, long, env = "NANOEDIT_MODEL")]
    model: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Edit(args) => edit_image(args, cli.json).await?,
        Commands::Models => list_models(cli.json)?,
        Commands::Check(args) => check(args, cli.json).await?,
        Commands::Mcp(args) => run_mcp_server(args).await?,
    }

    Ok(())
}

/// Logs go to stderr; stdout carries results and the MCP protocol.
fn init_logging(verbose: u8) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let default_filter = match verbose {
        0 => "warn,nanoedit=info",
        1 => "info,nanoedit=debug",
        _ => "debug,nanoedit=trace",
    };
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false),
        )
        .init();
}

fn parse_model(name: Option<&str>) -> anyhow::Result<GeminiModel> {
    match name {
        None => Ok(GeminiModel::default()),
        Some(n) => GeminiModel::from_name(n).ok_or_else(|| {
            anyhow::anyhow!("unknown model '{n}' (run `nanoedit models` to list them)")
        }),
    }
}

async fn edit_image(args: EditArgs, json_output: bool) -> anyhow::Result<()> {
    let model = parse_model(args.model.as_deref())?;

    let mut session = EditSession::new().with_max_retries(args.retries);
    if let Some(seed) = args.seed {
        session = session.with_seed(seed);
    }

    let report = session.upload_paths(&args.inputs);
    if let Some(message) = report.message() {
        eprintln!("warning: {message}");
    }
    session.set_instruction(args.instruction.as_str());

    // Report incomplete input before asking for an API key.
    session.build_request()?;

    if let Some(ext) = args.output.extension().and_then(|e| e.to_str()) {
        if ImageFormat::from_extension(ext).is_none() {
            tracing::warn!(
                ext,
                "output extension is not an image type; writing raw bytes anyway"
            );
        }
    }

    let editor = GeminiEditor::builder().model(model).build()?;
    if let EditStatus::Error(message) = session.generate(&editor).await {
        anyhow::bail!("{message}");
    }
    let Some(image) = session.take_result() else {
        anyhow::bail!("edit finished without a result");
    };

    if let Some(ext) = args.output.extension().and_then(|e| e.to_str()) {
        if ImageFormat::from_extension(ext).is_some_and(|f| f != image.format) {
            tracing::warn!(
                returned = %image.format,
                "model returned a different format than the output extension suggests"
            );
        }
    }

    image.save(&args.output)?;

    if json_output {
        let result = serde_json::json!({
            "type": "image",
            "success": true,
            "output": args.output.display().to_string(),
            "inputs": report.added.len(),
            "skipped": report.skipped,
            "size_bytes": image.size(),
            "format": image.format.extension(),
            "model": image.metadata.model,
            "duration_ms": image.metadata.duration_ms,
            "text": image.metadata.text,
        });
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        println!(
            "Edited image: {} ({} bytes) via {}",
            args.output.display(),
            image.size(),
            editor.model()
        );
        if let Some(duration) = image.metadata.duration_ms {
            println!("Duration: {}ms", duration);
        }
        if let Some(text) = &image.metadata.text {
            println!("Model says: {}", text);
        }
    }

    Ok(())
}

async fn check(args: CheckArgs, json_output: bool) -> anyhow::Result<()> {
    let model = parse_model(args.model.as_deref())?;
    let editor = GeminiEditor::builder().model(model).build()?;
    editor.health_check().await?;

    if json_output {
        let result = serde_json::json!({
            "success": true,
            "provider": editor.name(),
            "model": model.as_str(),
        });
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        println!("{} is reachable, model {} is available", editor.name(), model);
    }
    Ok(())
}

async fn run_mcp_server(args: McpArgs) -> anyhow::Result<()> {
    let model = parse_model(args.model.as_deref())?;
    tracing::info!(%model, "starting MCP server");
    let mut server = nanoedit::mcp::McpServer::new().with_default_model(model);
    server.run().await?;
    Ok(())
}

fn list_models(json_output: bool) -> anyhow::Result<()> {
    #[derive(serde::Serialize)]
    struct ModelInfo {
        alias: &'static str,
        model: &'static str,
        default: bool,
    }

    let models: Vec<ModelInfo> = GeminiModel::ALL
        .iter()
        .map(|m| ModelInfo {
            alias: m.alias(),
            model: m.as_str(),
            default: *m == GeminiModel::default(),
        })
        .collect();

    if json_output {
        println!("{}", serde_json::to_string_pretty(&models)?);
    } else {
        println!("Available models (Gemini):\n");
        for m in &models {
            let marker = if m.default { "*" } else { " " };
            println!("  {} {:<20} {}", marker, m.alias, m.model);
        }
        println!("\nAPI key: {}", API_KEY_ENV_VARS.join(" or "));
    }

    Ok(())
}
