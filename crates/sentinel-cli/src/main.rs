use anyhow::Result;
use clap::{Parser, Subcommand};
use sentinel::args::{RetrievalArgs, SearchArgs};
use sentinel::wiring::{self, Services};
use sentinel_core::{Error, Query};
use sentinel_local::models::{ModelCatalog, ProviderSettings};
use sentinel_pipeline::{CandidateSource, ChatOptions, ChatOutcome, ChatReply};
use std::collections::HashSet;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Exit status for configuration errors (unknown model, missing credential or endpoint).
const EXIT_CONFIG: i32 = 2;

#[derive(Parser, Debug)]
#[command(name = "sentinel")]
#[command(about = "Answer questions from fresh web results", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Answer a question, searching the web when current information is needed.
    Ask(AskCmd),
    /// Run one search + extraction pass and print the candidates (json).
    Search(SearchCmd),
    /// List selectable language models (refreshes the custom endpoint's list).
    Models(OutputArgs),
    /// Diagnose configuration (json; no secrets).
    Doctor(OutputArgs),
    /// Print version info.
    Version(OutputArgs),
}

#[derive(clap::Args, Debug)]
struct OutputArgs {
    /// Output format: json|text
    #[arg(long = "output", alias = "format", default_value = "json")]
    output: String,
}

#[derive(clap::Args, Debug)]
struct AskCmd {
    question: String,
    /// JSON file with prior turns: [{"role": "user", "content": "..."}, ...]
    #[arg(long)]
    history: Option<PathBuf>,
    /// Model identifier (default: CUSTOM_LLM_DEFAULT_MODEL when served, else groq).
    #[arg(long, env = "SENTINEL_MODEL")]
    model: Option<String>,
    /// Skip routing and always search the web.
    #[arg(
        long,
        action = clap::ArgAction::Set,
        default_value_t = false,
        num_args = 0..=1,
        default_missing_value = "true"
    )]
    only_web_search: bool,
    #[command(flatten)]
    retrieval: RetrievalArgs,
    #[command(flatten)]
    search: SearchArgs,
    #[command(flatten)]
    out: OutputArgs,
}

#[derive(clap::Args, Debug)]
struct SearchCmd {
    query: String,
    /// Candidates to collect.
    #[arg(long, default_value_t = 5)]
    limit: usize,
    #[command(flatten)]
    retrieval: RetrievalArgs,
    #[command(flatten)]
    search: SearchArgs,
    #[command(flatten)]
    out: OutputArgs,
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_new(wiring::log_filter())
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    // Stdout carries command output only.
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false),
        )
        .try_init();
}

fn is_text(output: &str) -> bool {
    output.eq_ignore_ascii_case("text")
}

/// Print a configuration error in the command's output format and exit.
fn config_failure(kind: &str, output: &str, err: &Error) -> ! {
    if is_text(output) {
        eprintln!("sentinel: {err}");
    } else {
        println!(
            "{}",
            serde_json::json!({
                "schema_version": 1,
                "kind": kind,
                "ok": false,
                "error": {
                    "code": "configuration",
                    "message": err.to_string(),
                },
            })
        );
    }
    std::process::exit(EXIT_CONFIG);
}

/// Cancel `token` on Ctrl-C.
fn cancel_on_ctrl_c(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupted; stopping after the current step");
            token.cancel();
        }
    });
}

fn reply_json(reply: &ChatReply, model: &str, elapsed_ms: u128) -> serde_json::Value {
    let documents: Vec<serde_json::Value> = reply
        .documents
        .iter()
        .map(|d| {
            serde_json::json!({
                "title": d.assessed.candidate.title,
                "url": d.assessed.candidate.url,
                "source_kind": d.assessed.candidate.source_kind,
                "summary": d.assessed.summary,
                "similarity": d.similarity,
                "preferred_domain": d.preferred_domain,
            })
        })
        .collect();
    serde_json::json!({
        "schema_version": 1,
        "kind": "ask",
        "ok": reply.outcome != ChatOutcome::SynthesisFailed,
        "model": model,
        "route": reply.route,
        "outcome": reply.outcome,
        "answer": reply.text,
        "documents": documents,
        "elapsed_ms": elapsed_ms,
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    if wiring::dotenv_enabled() {
        // Never overrides variables already set in the process environment.
        dotenvy::dotenv().ok();
    }
    init_tracing();

    let cli = Cli::parse();

    match cli.command {
        Commands::Ask(args) => {
            let t0 = std::time::Instant::now();
            let output = args.out.output.clone();
            let history = wiring::load_history(args.history.as_deref())?;
            let config = args.retrieval.to_config();
            let client = sentinel_local::http_client()?;

            let settings = ProviderSettings::from_env();
            let mut catalog = ModelCatalog::default();
            let model = match wiring::resolve_model(
                args.model.as_deref(),
                &settings,
                &mut catalog,
                &client,
            )
            .await
            {
                Ok(m) => m,
                Err(e) => config_failure("ask", &output, &e),
            };
            let services =
                match Services::build(model.clone(), &config, args.search.to_options(), client) {
                    Ok(s) => s,
                    Err(e) => config_failure("ask", &output, &e),
                };
            tracing::info!(model = model.id(), embedder = services.embedder, "answering");

            let cancel = CancellationToken::new();
            cancel_on_ctrl_c(cancel.clone());
            let options = ChatOptions {
                only_web_search: args.only_web_search,
                temperature: config.temperature,
                target_count: config.target_count,
                max_attempts: config.max_attempts,
            };
            let reply = services
                .handler
                .respond(&args.question, &history, &options, &cancel)
                .await?;

            if is_text(&output) {
                println!("{}", reply.text);
                if !reply.documents.is_empty() {
                    println!();
                    println!("Sources:");
                    for d in &reply.documents {
                        println!(
                            "- {} <{}> ({:.2})",
                            d.assessed.candidate.title, d.assessed.candidate.url, d.similarity
                        );
                    }
                }
            } else {
                println!(
                    "{}",
                    reply_json(&reply, model.id(), t0.elapsed().as_millis())
                );
            }
            if reply.outcome == ChatOutcome::SynthesisFailed {
                std::process::exit(1);
            }
        }
        Commands::Search(args) => {
            let output = args.out.output.clone();
            let config = args.retrieval.to_config();
            let client = sentinel_local::http_client()?;
            let gatherer = match wiring::build_gatherer(&config, args.search.to_options(), client)
            {
                Ok(g) => g,
                Err(e) => config_failure("search", &output, &e),
            };
            let query = Query::new(args.query.trim());
            let cancel = CancellationToken::new();
            cancel_on_ctrl_c(cancel.clone());
            let candidates = gatherer
                .gather(&query, args.limit, &HashSet::new(), &cancel)
                .await;

            if is_text(&output) {
                for c in &candidates {
                    println!("{} <{}> [{}]", c.title, c.url, c.source_kind.as_str());
                }
            } else {
                let rows: Vec<serde_json::Value> = candidates
                    .iter()
                    .map(|c| {
                        serde_json::json!({
                            "title": c.title,
                            "url": c.url,
                            "source_kind": c.source_kind,
                            "chars": c.extracted_text.chars().count(),
                            "text": c.extracted_text,
                        })
                    })
                    .collect();
                println!(
                    "{}",
                    serde_json::json!({
                        "schema_version": 1,
                        "kind": "search",
                        "ok": true,
                        "query": query.with_site_filter(gatherer.options().site_filter.as_deref()),
                        "candidates": rows,
                    })
                );
            }
        }
        Commands::Models(args) => {
            let settings = ProviderSettings::from_env();
            let mut catalog = ModelCatalog::default();
            let client = sentinel_local::http_client()?;
            let refresh_error = catalog
                .refresh_custom_models(&client, &settings)
                .await
                .err()
                .map(|e| e.to_string());
            let available = catalog.available(&settings);
            let default = catalog.default_model(&settings);
            if is_text(&args.output) {
                for m in &available {
                    let mark = if *m == default { " (default)" } else { "" };
                    println!("{m}{mark}");
                }
            } else {
                println!(
                    "{}",
                    serde_json::json!({
                        "schema_version": 1,
                        "kind": "models",
                        "ok": refresh_error.is_none(),
                        "default": default,
                        "available": available,
                        "custom_models": catalog.custom_models(),
                        "refresh_error": refresh_error,
                    })
                );
            }
        }
        Commands::Doctor(args) => {
            let t0 = std::time::Instant::now();
            let settings = ProviderSettings::from_env();
            let configured = settings.configured();
            let searxng = sentinel_local::search::searxng_endpoints_from_env();
            let remote_embeddings = std::env::var("SENTINEL_EMBEDDINGS_BASE_URL")
                .ok()
                .is_some_and(|v| !v.trim().is_empty());
            let any_llm = configured.huggingface
                || configured.groq
                || configured.mistral
                || configured.custom_llm
                || configured.ollama;

            let checks = vec![
                serde_json::json!({
                    "name": "search_endpoint",
                    "ok": !searxng.is_empty(),
                    "hint": if searxng.is_empty() { "Set SENTINEL_SEARXNG_ENDPOINT (or SEARXNG_URL) to a SearXNG base URL." } else { "" },
                }),
                serde_json::json!({
                    "name": "language_model",
                    "ok": any_llm,
                    "hint": if any_llm { "" } else { "Set GROQ_API_KEY, MISTRAL_API_KEY, HF_TOKEN, CUSTOM_LLM or SENTINEL_OLLAMA_ENABLE." },
                }),
            ];
            let ok = checks.iter().all(|c| c["ok"].as_bool().unwrap_or(false));
            let payload = serde_json::json!({
                "schema_version": 1,
                "kind": "doctor",
                "ok": ok,
                "name": "sentinel",
                "version": env!("CARGO_PKG_VERSION"),
                "platform": {
                    "os": std::env::consts::OS,
                    "arch": std::env::consts::ARCH,
                },
                "elapsed_ms": t0.elapsed().as_millis(),
                "configured": {
                    "search": {
                        "searxng": !searxng.is_empty(),
                        "searxng_endpoints": searxng.len(),
                    },
                    "llm": configured,
                    "embeddings": {
                        "remote": remote_embeddings,
                    },
                },
                "checks": checks,
            });
            if is_text(&args.output) {
                println!("sentinel {} (ok={})", env!("CARGO_PKG_VERSION"), ok);
                println!("checks:");
                for c in payload["checks"].as_array().into_iter().flatten() {
                    let name = c["name"].as_str().unwrap_or("?");
                    let ok = c["ok"].as_bool().unwrap_or(false);
                    println!("- {}: {}", name, if ok { "ok" } else { "missing" });
                }
            } else {
                println!("{payload}");
            }
        }
        Commands::Version(args) => {
            let v = serde_json::json!({
                "schema_version": 1,
                "kind": "version",
                "ok": true,
                "name": "sentinel",
                "version": env!("CARGO_PKG_VERSION"),
            });
            if is_text(&args.output) {
                println!("sentinel {}", env!("CARGO_PKG_VERSION"));
            } else {
                println!("{v}");
            }
        }
    }
    Ok(())
}
