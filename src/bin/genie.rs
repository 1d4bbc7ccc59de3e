//! genie: Recipe Genie core CLI
//!
//! Runs prompts through the full admission/cache/provider pipeline and
//! validates configuration files.

use std::io::{self, IsTerminal, Read};
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use genie::{Config, GenerationRequest, RouterBuilder, Secrets};

/// Recipe Genie CLI
#[derive(Parser)]
#[command(name = "genie")]
#[command(version = genie::PKG_VERSION)]
#[command(about = "Recipe Genie request pipeline")]
struct Args {
    /// Config file (default: ~/.genie/config.toml, then /etc/genie/config.toml)
    #[arg(short, long, env = "GENIE_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Generate a recipe for a prompt
    Ask {
        /// Prompt text (or omit to read from stdin)
        prompt: Option<String>,
        /// Provider to try first
        #[arg(short, long)]
        provider: Option<String>,
        /// Language to answer in (e.g. en, es)
        #[arg(short, long)]
        language: Option<String>,
        /// Rate-limit scope to charge
        #[arg(long, default_value = "cli")]
        user: String,
        /// Print cache and provider statistics afterwards (JSON)
        #[arg(long)]
        stats: bool,
    },

    /// Validate the configuration and list providers
    Check,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .init();

    let args = Args::parse();

    let mut config = Config::load(args.config.as_deref())?;
    config.apply_secrets(&Secrets::load()?);
    config.validate()?;

    match args.command {
        Command::Check => {
            println!("config ok");
            for (i, provider) in config.providers.iter().enumerate() {
                println!(
                    "{}. {} ({:?}) {}{}",
                    i + 1,
                    provider.name,
                    provider.dialect,
                    provider.model.as_deref().unwrap_or("<default model>"),
                    if provider.api_key.is_some() { " [key]" } else { "" },
                );
            }
        }

        Command::Ask {
            prompt,
            provider,
            language,
            user,
            stats,
        } => {
            let prompt = resolve_text(prompt)?;
            let router = RouterBuilder::from_config(&config).build()?;

            let mut request = GenerationRequest::new(prompt, user);
            if let Some(provider) = provider {
                request = request.provider(provider);
            }
            if let Some(language) = language {
                request = request.language(&language);
            }
            let result = router.handle(request).await;

            match (&result.outcome, result.error_kind()) {
                (Ok(text), _) => {
                    println!("{text}");
                    eprintln!(
                        "provider: {} | {} ms{}",
                        result.provider_used.as_deref().unwrap_or("-"),
                        result.latency.as_millis(),
                        if result.cached { " | cached" } else { "" },
                    );
                }
                (Err(e), Some(kind)) => {
                    eprintln!("{}", kind.user_message());
                    tracing::debug!(error = %e, "request failed");
                }
                (Err(_), None) => {}
            }

            if stats {
                let report = serde_json::json!({
                    "cache": router.cache_stats().await,
                    "providers": router.provider_health(),
                });
                println!("{}", serde_json::to_string_pretty(&report)?);
            }
            router.shutdown().await;

            if !result.is_ok() {
                std::process::exit(1);
            }
        }
    }

    Ok(())
}

/// Prompt from the argument, stdin, or both (`"{arg}\n\n{stdin}"`).
fn resolve_text(arg: Option<String>) -> Result<String, Box<dyn std::error::Error>> {
    let stdin_text = if io::stdin().is_terminal() {
        None
    } else {
        let mut buf = String::new();
        io::stdin().read_to_string(&mut buf)?;
        let trimmed = buf.trim().to_string();
        (!trimmed.is_empty()).then_some(trimmed)
    };

    match (arg, stdin_text) {
        (Some(a), Some(s)) => Ok(format!("{a}\n\n{s}")),
        (Some(a), None) => Ok(a),
        (None, Some(s)) => Ok(s),
        (None, None) => Err("ask: no prompt provided (pass text as argument or via stdin)".into()),
    }
}
