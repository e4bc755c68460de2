use clap::Parser;
use dotenvy::dotenv;
use rlm::adapter::AdapterRegistry;
use rlm::config::{self, AppConfig};
use rlm::llm_client::{GeminiClient, LlmClient, OpenAiCompatClient};
use rlm::logging::{self, LoggingConfig};
use rlm::orchestrator::{LoopOutcome, Orchestrator, TurnLoopConfig};
use rlm::sandbox::SandboxConfig;
use rlm::session::Session;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// `rlm <query> <file> [options]` — the CLI shell around the turn loop.
#[derive(Debug, Parser)]
#[command(name = "rlm", about = "Recursive Language Model runtime")]
struct CliArgs {
    /// The question to answer about the document.
    query: String,
    /// Path to the document to analyse.
    file: PathBuf,

    #[arg(long = "max-turns")]
    max_turns: Option<u32>,
    #[arg(long)]
    timeout: Option<u64>,
    #[arg(long)]
    model: Option<String>,
    #[arg(long)]
    provider: Option<String>,
    #[arg(long)]
    adapter: Option<String>,
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    verbose: bool,
    /// Resolve config/adapter/model and print them without calling the LLM.
    #[arg(long)]
    dry_run: bool,

    /// Log level (e.g. trace, debug, info, warn, error).
    #[arg(long)]
    log_level: Option<String>,
    /// Log directory for file logging.
    #[arg(long)]
    log_dir: Option<String>,
    /// Log file name for file logging (daily rotation).
    #[arg(long)]
    log_file: Option<String>,
    /// Disable file logging (stdout only).
    #[arg(long)]
    no_file_log: bool,
}

#[tokio::main]
async fn main() {
    let _ = dotenv();
    let args = CliArgs::parse();

    let log_level = if args.verbose {
        args.log_level.clone().or_else(|| Some("debug".to_string()))
    } else {
        args.log_level.clone()
    };
    let log_config = LoggingConfig {
        log_level,
        file_log: if args.no_file_log { Some(false) } else { None },
        log_dir: args.log_dir.clone(),
        log_file: args.log_file.clone(),
    };
    let _log_guard = match logging::init_logging(log_config) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("WARNING: failed to initialize logging: {e}");
            None
        }
    };

    std::process::exit(run(args).await);
}

/// Returns the process exit code: 0 success, 1 user error, 2 runtime
/// failure after max turns (spec §6).
async fn run(args: CliArgs) -> i32 {
    let document = match std::fs::read_to_string(&args.file) {
        Ok(text) => text,
        Err(e) => {
            eprintln!("error: could not read '{}': {e}", args.file.display());
            return 1;
        }
    };

    let config = AppConfig::load(args.config.as_deref());

    let provider_name = args.provider.clone().unwrap_or_else(|| config.llm.provider.clone());
    let provider_cfg = config.get_provider(&provider_name).cloned();

    let model_name = args
        .model
        .clone()
        .or_else(|| provider_cfg.as_ref().and_then(|p| p.model.clone()))
        .or_else(|| config.llm.model.clone());

    let llm: Arc<dyn LlmClient> = match build_llm_client(&provider_name, provider_cfg.as_ref(), model_name.clone()) {
        Ok(client) => client,
        Err(e) => {
            eprintln!("error: {e}");
            return 1;
        }
    };

    let adapter_choice = args
        .adapter
        .clone()
        .or_else(|| provider_cfg.as_ref().and_then(|p| p.adapter.clone()));
    let registry = AdapterRegistry::with_builtins();
    let adapter = registry.resolve(adapter_choice.as_deref(), model_name.as_deref().unwrap_or(&provider_name));

    let timeout_ms = args.timeout.unwrap_or(config.sandbox.turn_timeout_ms);
    let sandbox_config = SandboxConfig {
        timeout: Duration::from_millis(timeout_ms),
        memory_limit_mb: config.sandbox.memory_limit_mb,
        max_sub_calls: config.sandbox.max_sub_calls,
    };

    let max_turns = args.max_turns.unwrap_or(config.rlm.max_turns);

    if args.dry_run {
        println!("provider: {provider_name}");
        println!("model: {}", model_name.as_deref().unwrap_or("(default)"));
        println!("adapter: {}", adapter.name());
        println!("max_turns: {max_turns}");
        println!("timeout_ms: {}", sandbox_config.timeout.as_millis());
        println!("memory_limit_mb: {}", sandbox_config.memory_limit_mb);
        println!("document lines: {}", document.split('\n').count());
        return 0;
    }

    let mut session = Session::new(sandbox_config);
    session.load(&document);

    let orchestrator = Orchestrator::new(adapter, llm, TurnLoopConfig { max_turns });

    match orchestrator.run(&args.query, &mut session).await {
        Ok(LoopOutcome::Final(text)) => {
            println!("{text}");
            0
        }
        Ok(LoopOutcome::MaxTurnsReached(bindings)) => {
            eprintln!("Max turns reached. Last bindings: {:?}", bindings);
            2
        }
        Ok(LoopOutcome::NoProgress(bindings)) => {
            eprintln!("No progress after repeated fragments. Last bindings: {:?}", bindings);
            2
        }
        Err(e) => {
            eprintln!("error: {e}");
            e.exit_code()
        }
    }
}

fn build_llm_client(
    provider_name: &str,
    provider_cfg: Option<&config::ProviderConfig>,
    model_name: Option<String>,
) -> Result<Arc<dyn LlmClient>, String> {
    if let Some(cfg) = provider_cfg {
        if let Some(base_url) = &cfg.base_url {
            let api_key = cfg.resolve_api_key().unwrap_or_default();
            let model = model_name.unwrap_or_else(|| "gpt-4o-mini".to_string());
            return Ok(Arc::new(OpenAiCompatClient::new(api_key, base_url.clone(), model)));
        }
        let api_key = cfg
            .resolve_api_key()
            .or_else(|| std::env::var("GEMINI_API_KEY").ok())
            .ok_or_else(|| format!("no API key configured for provider '{provider_name}'"))?;
        return Ok(Arc::new(GeminiClient::new(api_key, model_name)));
    }

    if provider_name == "gemini" {
        let api_key = std::env::var("GEMINI_API_KEY").unwrap_or_else(|_| {
            tracing::warn!("GEMINI_API_KEY not set; LLM calls will fail");
            "DUMMY_KEY".to_string()
        });
        return Ok(Arc::new(GeminiClient::new(api_key, model_name)));
    }

    Err(format!(
        "unknown provider '{provider_name}': add it under [providers.{provider_name}] in the config file"
    ))
}
