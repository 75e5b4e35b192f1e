//! redactkit command-line interface

use anyhow::Result;
use clap::{Parser, Subcommand};
use redactkit_core::{
    classify_examples, infer_pattern, Config, DetectionEngine, DetectionResult, ExclusionStore, OllamaClient,
    PatternSet, RedactionKind, RedactionStyle, SqliteExclusionStore,
};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    #[arg(long, global = true, default_value = "info", help = "Log level (error, warn, info, debug, trace)")]
    pub log_level: String,

    #[arg(long, global = true, help = "Path to configuration file")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Detect sensitive spans and print the redacted text
    Detect {
        #[arg(long, help = "Pattern definitions (TOML, or JSON by extension)")]
        patterns: PathBuf,

        #[arg(long, help = "Input file; reads stdin when omitted")]
        input: Option<PathBuf>,

        #[arg(long, value_parser = parse_style, help = "Redaction style for every category (full, partial, token, mask)")]
        style: Option<RedactionKind>,

        #[arg(long, help = "Print the full detection result as JSON")]
        json: bool,

        #[arg(long, help = "Ask the configured Ollama model for entities as well")]
        with_llm: bool,
    },
    /// Record a string that must never be reported for a pattern
    Exclude {
        #[arg(long)]
        pattern_id: String,

        #[arg(long)]
        text: String,
    },
    /// Print the regex inferred from example strings
    Infer {
        #[arg(required = true)]
        examples: Vec<String>,
    },
}

fn parse_style(value: &str) -> Result<RedactionKind, String> {
    value.parse::<RedactionKind>().map_err(|e| e.to_string())
}

fn load_config(path: Option<&PathBuf>) -> Result<Config> {
    let config = match path {
        Some(config_path) => {
            info!("Loading configuration from: {}", config_path.display());
            Config::from_file(config_path)?
        }
        None => match Config::get_default_config_path() {
            Ok(default_path) if default_path.exists() => {
                info!("Loading configuration from default location: {}", default_path.display());
                Config::from_file(&default_path)?
            }
            Ok(default_path) => {
                info!("Creating default configuration at: {}", default_path.display());
                let mut config = Config::default();
                config.resolve_paths()?;
                config.to_file(&default_path)?;
                config
            }
            Err(_) => {
                info!("Using default configuration (could not determine config directory)");
                let mut config = Config::default();
                config.resolve_paths()?;
                config
            }
        },
    };

    config.validate()?;
    info!("Configuration validated successfully");
    Ok(config)
}

fn read_input(path: Option<&Path>) -> Result<String> {
    match path {
        Some(path) => std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read input {:?}: {}", path, e)),
        None => {
            let mut buffer = String::new();
            std::io::stdin().read_to_string(&mut buffer)?;
            Ok(buffer)
        }
    }
}

fn build_engine(config: &Config, style: Option<RedactionKind>) -> Result<DetectionEngine> {
    let mut policy = config.redaction.clone();
    if let Some(kind) = style {
        policy.default_style = Some(RedactionStyle::new(kind));
        policy.styles.clear();
    }

    let store = SqliteExclusionStore::new(config.exclusions.clone())?;
    Ok(DetectionEngine::from_config(config)
        .with_redaction_policy(policy)
        .with_exclusion_store(Arc::new(store)))
}

async fn attach_llm(engine: DetectionEngine, config: &Config) -> Result<DetectionEngine> {
    let llm = config.llm.clone().unwrap_or_default();
    let mut ollama_config = llm.ollama_config();
    ollama_config.enabled = true;

    let client = OllamaClient::new(ollama_config, llm.prompt_template.as_deref())?;
    if !client.health_check().await.unwrap_or(false) {
        warn!("Ollama at {} is not reachable, detection will run without it", llm.endpoint);
    }
    Ok(engine.with_provider(Arc::new(client)))
}

fn render(result: &DetectionResult, json: bool) -> Result<String> {
    if json {
        Ok(serde_json::to_string_pretty(result)?)
    } else {
        Ok(result.redacted_text.clone())
    }
}

async fn run(args: Args) -> Result<()> {
    match args.command {
        Command::Detect {
            patterns,
            input,
            style,
            json,
            with_llm,
        } => {
            let config = load_config(args.config.as_ref())?;
            let pattern_set = PatternSet::from_file(&patterns)?;
            info!("Loaded {} patterns from {}", pattern_set.patterns.len(), patterns.display());

            let text = read_input(input.as_deref())?;
            let mut engine = build_engine(&config, style)?;
            let use_llm = with_llm || config.llm.as_ref().map_or(false, |llm| llm.enabled);
            if use_llm {
                engine = attach_llm(engine, &config).await?;
            }

            let result = engine.detect(&text, &pattern_set.patterns).await;
            info!(
                "Found {} matches (average confidence {:.2})",
                result.statistics.total_matches, result.statistics.average_confidence
            );
            println!("{}", render(&result, json)?);
        }
        Command::Exclude { pattern_id, text } => {
            let config = load_config(args.config.as_ref())?;
            let store = SqliteExclusionStore::new(config.exclusions.clone())?;
            store.append_exclusion(&pattern_id, &text)?;
            let total = store.exclusions_for(&pattern_id)?.len();
            println!("Pattern '{}' now has {} exclusions", pattern_id, total);
        }
        Command::Infer { examples } => match infer_pattern(&examples) {
            Some(inferred) => println!("{:?}\t{}", inferred.shape, inferred.regex),
            None => {
                let shape = classify_examples(&examples);
                println!("No regex inferred (shape: {:?})", shape);
            }
        },
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = args.log_level.parse::<tracing::Level>().unwrap_or_else(|_| {
        eprintln!("Invalid log level '{}', defaulting to 'info'", args.log_level);
        tracing::Level::INFO
    });

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    run(args).await
}
