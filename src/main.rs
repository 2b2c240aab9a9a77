use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use colored::*;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use edu_assistant::{
    config::Configuration,
    core::{
        ExtractionPipeline, GeminiClient, KeyPointsResult, SummaryResult, Task, GEMINI_MODEL,
        MAX_OUTPUT_TOKENS,
    },
    handlers::{router, CorsPolicy},
};

#[derive(Parser)]
#[command(
    name = "edu_assistant",
    about = "Bilingual summaries and key points for educational texts using Gemini",
    long_about = None,
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,
}

#[derive(Args)]
struct LlmArgs {
    /// Configuration file path (YAML or JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Gemini API key
    #[arg(long, env = "GEMINI_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Gemini API base URL (overrides config)
    #[arg(long)]
    base_url: Option<String>,
}

#[derive(Args)]
struct InputArgs {
    /// Text to process
    #[arg(short, long, conflicts_with = "file", required_unless_present = "file")]
    text: Option<String>,

    /// Read the text to process from a file
    #[arg(short, long)]
    file: Option<PathBuf>,

    /// Print the raw JSON object instead of formatted output
    #[arg(long)]
    json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP service
    Serve {
        #[command(flatten)]
        llm: LlmArgs,

        /// Address to listen on (overrides config)
        #[arg(long)]
        listen_addr: Option<String>,
    },

    /// Summarize a text in Spanish and English
    Summarize {
        #[command(flatten)]
        llm: LlmArgs,

        #[command(flatten)]
        input: InputArgs,
    },

    /// Extract 3 to 5 key points in Spanish and English
    KeyPoints {
        #[command(flatten)]
        llm: LlmArgs,

        #[command(flatten)]
        input: InputArgs,
    },

    /// Check that the configured Gemini model is reachable
    CheckUpstream {
        #[command(flatten)]
        llm: LlmArgs,
    },

    /// Generate example configuration file
    GenerateConfig {
        /// Output path for configuration file
        #[arg(short, long)]
        output: PathBuf,

        /// Configuration format (yaml or json)
        #[arg(short, long, value_enum, default_value = "yaml")]
        format: ConfigFormat,
    },

    /// Validate configuration file
    Validate {
        /// Configuration file path
        #[arg(short, long)]
        config: PathBuf,
    },
}

#[derive(clap::ValueEnum, Clone)]
enum ConfigFormat {
    Yaml,
    Json,
}

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env is normal in production.
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    init_tracing(&cli);

    match cli.command {
        Commands::Serve { llm, listen_addr } => serve_command(llm, listen_addr).await,
        Commands::Summarize { llm, input } => task_command(Task::Summarize, llm, input).await,
        Commands::KeyPoints { llm, input } => task_command(Task::KeyPoints, llm, input).await,
        Commands::CheckUpstream { llm } => check_upstream_command(llm).await,
        Commands::GenerateConfig { output, format } => {
            generate_config_command(output, format).await
        }
        Commands::Validate { config } => validate_command(config).await,
    }
}

fn init_tracing(cli: &Cli) {
    let default_level = if cli.debug {
        "debug"
    } else if cli.verbose || matches!(cli.command, Commands::Serve { .. }) {
        "info"
    } else {
        "warn"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| default_level.into()),
        )
        .with_target(false)
        .init();
}

fn resolve_config(llm: LlmArgs) -> Result<Configuration> {
    let mut config = Configuration::load(llm.config.as_deref())?.with_api_key(llm.api_key);

    if let Some(base_url) = llm.base_url {
        config.llm_settings.base_url = base_url;
    }

    config.validate()?;
    Ok(config)
}

async fn serve_command(llm: LlmArgs, listen_addr: Option<String>) -> Result<()> {
    let mut config = resolve_config(llm)?;
    if let Some(addr) = listen_addr {
        config.server.listen_addr = addr;
        config.validate()?;
    }

    if config.llm_settings.api_key().is_none() {
        warn!("GEMINI_API_KEY is not set; /summarize and /key-points will answer 400");
    }

    let pipeline = Arc::new(ExtractionPipeline::from_config(&config)?);
    let app = router(pipeline, CorsPolicy::new(config.server.allowed_origins.clone()));

    let listener = TcpListener::bind(&config.server.listen_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.server.listen_addr))?;
    info!(
        addr = %config.server.listen_addr,
        model = GEMINI_MODEL,
        origins = config.server.allowed_origins.len(),
        "service listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(wait_for_shutdown())
        .await?;
    info!("service shutting down");
    Ok(())
}

async fn wait_for_shutdown() {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown signal received");
}

async fn task_command(task: Task, llm: LlmArgs, input: InputArgs) -> Result<()> {
    let config = resolve_config(llm)?;

    let text = match (input.text, input.file) {
        (Some(text), _) => text,
        (None, Some(path)) => tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("Failed to read input file: {}", path.display()))?,
        (None, None) => anyhow::bail!("Provide --text or --file"),
    };

    let pipeline = ExtractionPipeline::from_config(&config)?;
    if !input.json {
        println!("{}", format!(" Requesting {}...", task.label()).bright_blue().bold());
    }

    let result = match pipeline.run(task, &text).await {
        Ok(result) => result,
        Err(e) => {
            error!(" {} failed: {}", task.label(), e);
            return Err(e.into());
        }
    };

    if input.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(());
    }

    match task {
        Task::Summarize => match SummaryResult::from_object(&result) {
            Some(summary) => {
                println!("\n{}", " Español".bright_green().bold());
                println!("{}", summary.summary_es);
                println!("\n{}", " English".bright_green().bold());
                println!("{}", summary.summary_en);
            }
            None => println!("{}", serde_json::to_string_pretty(&result)?),
        },
        Task::KeyPoints => match KeyPointsResult::from_object(&result) {
            Some(points) => {
                println!("\n{}", " Español".bright_green().bold());
                for point in &points.key_points_es {
                    println!("  • {}", point);
                }
                println!("\n{}", " English".bright_green().bold());
                for point in &points.key_points_en {
                    println!("  • {}", point);
                }
            }
            None => println!("{}", serde_json::to_string_pretty(&result)?),
        },
    }

    Ok(())
}

async fn check_upstream_command(llm: LlmArgs) -> Result<()> {
    println!("{}", " Checking Gemini API...".bright_blue().bold());

    let config = resolve_config(llm)?;
    let client = GeminiClient::from_settings(&config.llm_settings)?
        .ok_or_else(|| anyhow::anyhow!("GEMINI_API_KEY is not configured"))?;

    match client.model_info().await {
        Ok(model) => {
            println!(" Model is reachable: {}", model.name.bright_green());
            if let Some(name) = model.display_name {
                println!(" Display name: {}", name);
            }
            if let Some(limit) = model.input_token_limit {
                println!(" Input token limit: {}", limit.to_string().bright_cyan());
            }
            if let Some(limit) = model.output_token_limit {
                println!(" Output token limit: {}", limit.to_string().bright_cyan());
                if u64::from(MAX_OUTPUT_TOKENS) > limit {
                    warn!(
                        " Output cap {} exceeds the model's output limit {}",
                        MAX_OUTPUT_TOKENS, limit
                    );
                }
            }
            Ok(())
        }
        Err(e) => {
            println!(" Model is not reachable at {}", config.llm_settings.base_url.bright_red());
            Err(e)
        }
    }
}

async fn generate_config_command(output_path: PathBuf, format: ConfigFormat) -> Result<()> {
    println!("{}", " Generating example configuration...".bright_blue().bold());

    let config = Configuration::example();

    let content = match format {
        ConfigFormat::Yaml => serde_yaml::to_string(&config)?,
        ConfigFormat::Json => serde_json::to_string_pretty(&config)?,
    };

    tokio::fs::write(&output_path, content).await?;

    println!(" Example configuration generated at: {}", output_path.display().to_string().bright_green());
    println!(" Prefer GEMINI_API_KEY over storing the key in the file");

    Ok(())
}

async fn validate_command(config_path: PathBuf) -> Result<()> {
    println!("{}", " Validating configuration...".bright_blue().bold());

    let config = match Configuration::from_file(&config_path) {
        Ok(config) => config,
        Err(e) => {
            error!(" Failed to load configuration: {:#}", e);
            return Err(e);
        }
    };

    if let Err(e) = config.validate() {
        error!(" Configuration validation failed: {:#}", e);
        return Err(e);
    }

    println!(" Configuration is valid!");
    println!(" Name: {}", config.name.bright_green());
    println!(" Listen address: {}", config.server.listen_addr);
    println!(" Allowed origins: {}", config.server.allowed_origins.join(", "));
    println!(" Model: {} (fixed)", GEMINI_MODEL);
    if config.llm_settings.api_key().is_none() {
        println!(" {} no API key in file; GEMINI_API_KEY must be set", "Note:".bright_yellow());
    }

    Ok(())
}
