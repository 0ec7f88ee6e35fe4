use clap::Parser;
use colored::Colorize;
use flowscribe_core::{
    CacheStore, CliErrorDisplay, Describer, FlowDocument, FlowscribeConfig, FlowscribeError,
    ImageProvider, LoggingConfig, OpenAiClient, Pipeline,
};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{debug, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod config;
mod display;

use config::{load_config, CliOverrides};

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser)]
#[command(name = "flowscribe")]
#[command(version = VERSION)]
#[command(about = "Flowscribe - turn recorded user flows into readable reports")]
#[command(long_about = r#"
Flowscribe reads a recorded user-flow JSON export, describes every click in
plain language, summarizes the journey, optionally generates a social media
illustration and writes a markdown report.

Results of every external call are cached on disk, so re-running the same
flow is fast and free. Requires OPENAI_API_KEY (environment or .env file).
"#)]
#[command(after_help = r#"Examples:
  flowscribe flow.json
  flowscribe flow.json --skip-image
  flowscribe flow.json --output-dir reports --concurrency 4
"#)]
struct Cli {
    /// Path to the flow JSON file
    flow_file: PathBuf,

    /// Skip social media image generation
    #[arg(long)]
    skip_image: bool,

    /// Directory the report is written to
    #[arg(long, value_name = "DIR")]
    output_dir: Option<PathBuf>,

    /// Directory holding cached results
    #[arg(long, value_name = "DIR")]
    cache_dir: Option<PathBuf>,

    /// Ignore the cache for this run (nothing is read or written)
    #[arg(long)]
    no_cache: bool,

    /// Delete all cached results before running
    #[arg(long)]
    clear_cache: bool,

    /// Abort on the first step that cannot be described
    #[arg(long)]
    fail_fast: bool,

    /// Number of steps described in parallel
    #[arg(long, value_name = "N")]
    concurrency: Option<usize>,

    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn overrides(&self) -> CliOverrides {
        CliOverrides {
            skip_image: self.skip_image,
            output_dir: self.output_dir.clone(),
            cache_dir: self.cache_dir.clone(),
            no_cache: self.no_cache,
            fail_fast: self.fail_fast,
            concurrency: self.concurrency,
            verbose: self.verbose,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match load_config(&cli.overrides()) {
        Ok(config) => config,
        Err(e) => {
            init_logging(&LoggingConfig::default());
            report_error(&e);
            return ExitCode::FAILURE;
        }
    };

    init_logging(&config.logging);

    match run(cli, config).await {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            report_error(&e);
            ExitCode::FAILURE
        }
    }
}

fn init_logging(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(logging.level.as_str()));

    if logging.json_format {
        tracing_subscriber::registry()
            .with(fmt::layer().json().with_target(false))
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer().with_target(false))
            .with(filter)
            .init();
    }
}

fn report_error(e: &anyhow::Error) {
    match e.downcast_ref::<FlowscribeError>() {
        Some(err) => {
            eprint!("{}: {}", "Error".red().bold(), CliErrorDisplay::new(err));
        }
        None => eprintln!("{}: {:#}", "Error".red().bold(), e),
    }
}

async fn run(cli: Cli, config: FlowscribeConfig) -> anyhow::Result<()> {
    println!(
        "{} {}",
        "Loading flow data from:".cyan().bold(),
        cli.flow_file.display()
    );
    let flow = FlowDocument::load(&cli.flow_file)?;
    println!(
        "  {} {} ({} steps, {} interactive)",
        "→".blue(),
        flow.name,
        flow.steps.len(),
        flow.interactive_steps().count()
    );

    let cache = if config.cache.enabled {
        CacheStore::open(&config.cache.dir)
    } else {
        CacheStore::disabled(&config.cache.dir)
    };

    if cli.clear_cache {
        let removed = cache.clear()?;
        println!("  {} Cleared {} cached entries", "→".blue(), removed);
    }
    if !cache.is_enabled() {
        println!("  {} Cache disabled for this run", "!".yellow());
    }

    let api_key = config.require_api_key().map_err(FlowscribeError::from)?;
    let client = Arc::new(OpenAiClient::new(api_key, &config.openai)?);
    debug!(api_base = %client.api_base(), "OpenAI client ready");

    let run_config = config.run_config();
    let describer: Arc<dyn Describer> = client.clone();
    let images: Option<Arc<dyn ImageProvider>> = if run_config.skip_image {
        None
    } else {
        Some(client as Arc<dyn ImageProvider>)
    };

    println!("  {} Analyzing user interactions...", "→".blue());
    let pipeline = Pipeline::new(describer, images, Arc::new(cache), run_config);
    let outcome = pipeline.run(&flow).await?;
    info!(
        interactions = outcome.interactions.len(),
        cached = outcome.cached_count(),
        "Run finished"
    );

    display::print_outcome(&outcome);

    Ok(())
}
