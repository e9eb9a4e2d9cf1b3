mod chat_cmd;
mod config;
mod generate_cmd;
mod serve_cmd;

use std::path::PathBuf;

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;

use mealstream_core::config::InferenceConfig;

use config::{CliOverrides, ConfigFile, MealstreamConfig};

const DEFAULT_SERVER: &str = "http://127.0.0.1:3001";

#[derive(Parser)]
#[command(name = "mealstream", about = "Streaming meal-plan generation backed by a local LLM")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Write a mealstream config file
    Init {
        /// Base URL of the Ollama-compatible inference server
        #[arg(long)]
        inference_url: Option<String>,
        /// Overwrite existing config file
        #[arg(long)]
        force: bool,
    },
    /// Run the HTTP server
    Serve {
        /// Address to bind (overrides MEALSTREAM_BIND)
        #[arg(long)]
        bind: Option<String>,
        /// Port to listen on (overrides MEALSTREAM_PORT)
        #[arg(long)]
        port: Option<u16>,
        /// Inference server base URL (overrides MEALSTREAM_INFERENCE_URL)
        #[arg(long)]
        inference_url: Option<String>,
    },
    /// Request a weekly plan and follow its progress
    Generate {
        /// Path to a JSON plan request
        #[arg(long, short)]
        file: PathBuf,
        /// mealstream server URL
        #[arg(long, default_value = DEFAULT_SERVER)]
        server: String,
    },
    /// Ask the nutrition assistant a question
    Chat {
        /// The question
        message: String,
        /// Extra context about the user, e.g. their goal
        #[arg(long)]
        context: Option<String>,
        /// mealstream server URL
        #[arg(long, default_value = DEFAULT_SERVER)]
        server: String,
    },
    /// Print shell completions
    Completions {
        /// Target shell
        shell: Shell,
    },
}

/// Execute the `mealstream init` command: write config file.
fn cmd_init(inference_url: Option<&str>, force: bool) -> anyhow::Result<()> {
    let path = config::config_path();

    if path.exists() && !force {
        anyhow::bail!(
            "config file already exists at {}\nUse --force to overwrite.",
            path.display()
        );
    }

    let url = inference_url.unwrap_or(InferenceConfig::DEFAULT_URL);
    let cfg = ConfigFile::with_defaults(url);
    config::save_config_to(&cfg, &path)?;

    println!("Config written to {}", path.display());
    println!("  inference.base_url = {url}");
    if let Some(models) = &cfg.inference.models {
        println!("  inference.models = {}", models.join(", "));
    }
    println!();
    println!("Next: run `mealstream serve`.");

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
        Commands::Init {
            inference_url,
            force,
        } => {
            cmd_init(inference_url.as_deref(), force)?;
        }
        Commands::Serve {
            bind,
            port,
            inference_url,
        } => {
            let resolved = MealstreamConfig::resolve(&CliOverrides {
                bind,
                port,
                inference_url,
            })?;
            serve_cmd::run_serve(resolved).await?;
        }
        Commands::Generate { file, server } => {
            if !generate_cmd::run_generate(&server, &file).await? {
                std::process::exit(1);
            }
        }
        Commands::Chat {
            message,
            context,
            server,
        } => {
            chat_cmd::run_chat(&server, &message, context.as_deref()).await?;
        }
        Commands::Completions { shell } => {
            clap_complete::generate(shell, &mut Cli::command(), "mealstream", &mut std::io::stdout());
        }
    }

    Ok(())
}

#[cfg(test)]
mod test_util {
    use std::sync::{Mutex, MutexGuard};
    use std::time::Duration;

    use mealstream_core::config::{CacheConfig, GateConfig, InferenceConfig, ServiceConfig};

    use crate::serve_cmd::{AppState, build_router};

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    /// Serialize tests that touch process environment variables.
    pub fn lock_env() -> MutexGuard<'static, ()> {
        ENV_LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Fast timeouts, two models, and defaults for everything else.
    pub fn test_service_config() -> ServiceConfig {
        let mut inference = InferenceConfig::new("http://unused.invalid")
            .with_models(vec!["primary".into(), "backup".into()])
            .unwrap();
        inference.unit_timeout = Duration::from_millis(200);
        inference.warmup_timeout = Duration::from_millis(100);
        ServiceConfig {
            inference,
            gate: GateConfig::default(),
            cache: CacheConfig::default(),
        }
    }

    /// Serve the router on an ephemeral port; returns its base URL.
    pub async fn spawn_server(state: AppState) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = axum::serve(listener, build_router(state)).await;
        });
        format!("http://{addr}")
    }
}
