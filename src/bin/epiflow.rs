use std::process::ExitCode;

use camino::Utf8PathBuf;
use chrono::{NaiveDate, Utc};
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use epiflow::app::{App, ProgressSink};
use epiflow::config::{ConfigLoader, Overrides, ResolvedConfig};
use epiflow::domain::SourceTag;
use epiflow::error::EpiError;
use epiflow::fetch::HttpFetcher;
use epiflow::govgr_api::GovGrHttpClient;
use epiflow::output::{HumanOutput, JsonOutput, OutputMode};
use epiflow::sink::JsonFileSink;

#[derive(Parser)]
#[command(name = "epiflow")]
#[command(about = "Reconcile epidemiological extracts into per-entity daily records")]
#[command(version, author)]
struct Cli {
    #[arg(long, global = true)]
    non_interactive: bool,

    /// Log filter (e.g. `info`, `epiflow=debug`); falls back to RUST_LOG.
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Run the pipeline for the configured sources")]
    Run(RunArgs),
    #[command(about = "Create the expected indexes of every collection")]
    Indexes(ConfigArgs),
    #[command(about = "List known sources and their collections")]
    Sources(ConfigArgs),
}

#[derive(Args, Clone, Default)]
struct ConfigArgs {
    #[arg(long)]
    config: Option<String>,

    #[arg(long)]
    store: Option<Utf8PathBuf>,
}

#[derive(Args, Clone, Default)]
struct RunArgs {
    #[command(flatten)]
    common: ConfigArgs,

    #[arg(long)]
    output: Option<Utf8PathBuf>,

    #[arg(long)]
    tmp: Option<Utf8PathBuf>,

    #[arg(long)]
    data: Option<Utf8PathBuf>,

    /// Source to run; repeat for several. `all` selects every source but govgr.
    #[arg(long = "source")]
    sources: Vec<String>,

    /// Replace everything each source owns instead of the trailing window.
    #[arg(long, visible_alias = "drop")]
    rebuild: bool,

    #[arg(long)]
    window_days: Option<u32>,

    /// Download the raw extracts into the tmp tree first.
    #[arg(long, visible_alias = "clone")]
    fetch: bool,

    /// Run date, `YYYY-MM-DD`; defaults to today (UTC).
    #[arg(long)]
    as_of: Option<NaiveDate>,

    #[arg(long)]
    govgr_token: Option<String>,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(error) = report.downcast_ref::<EpiError>() {
            return ExitCode::from(map_exit_code(error));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &EpiError) -> u8 {
    match error {
        EpiError::ConfigRead(_)
        | EpiError::ConfigParse(_)
        | EpiError::InvalidConfig(_)
        | EpiError::UnknownSource(_) => 2,
        EpiError::FetchHttp(_)
        | EpiError::FetchStatus { .. }
        | EpiError::GovGrHttp(_)
        | EpiError::GovGrStatus { .. } => 3,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    let cli = Cli::parse();

    let filter = match &cli.log_level {
        Some(level) => EnvFilter::try_new(level).into_diagnostic()?,
        None => EnvFilter::from_default_env(),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let output_mode = if cli.non_interactive {
        OutputMode::NonInteractive
    } else {
        OutputMode::Interactive
    };

    match cli.command.unwrap_or(Commands::Run(RunArgs::default())) {
        Commands::Run(args) => run_pipeline(args, output_mode),
        Commands::Indexes(args) => run_indexes(args, output_mode),
        Commands::Sources(args) => run_sources(args, output_mode),
    }
}

fn resolve(args: &ConfigArgs, mut overrides: Overrides) -> miette::Result<ResolvedConfig> {
    overrides.store = args.store.clone();
    Ok(ConfigLoader::resolve(args.config.as_deref(), overrides)?)
}

fn build_app(
    config: ResolvedConfig,
) -> miette::Result<App<HttpFetcher, GovGrHttpClient, JsonFileSink>> {
    let fetcher = HttpFetcher::new()?;
    let govgr = GovGrHttpClient::new(config.govgr_token.as_deref().unwrap_or(""))?;
    let sink = JsonFileSink::new(config.store_dir.clone());
    Ok(App::new(config, fetcher, govgr, sink))
}

fn progress_sink(output_mode: OutputMode) -> &'static dyn ProgressSink {
    match output_mode {
        OutputMode::Interactive => &HumanOutput,
        OutputMode::NonInteractive => &JsonOutput,
    }
}

fn run_pipeline(args: RunArgs, output_mode: OutputMode) -> miette::Result<()> {
    let overrides = Overrides {
        output: args.output,
        tmp: args.tmp,
        data: args.data,
        store: None,
        rebuild: args.rebuild,
        window_days: args.window_days,
        sources: (!args.sources.is_empty()).then_some(args.sources),
        govgr_token: args.govgr_token,
        fetch: args.fetch,
    };
    let config = resolve(&args.common, overrides)?;
    let app = build_app(config)?;

    let as_of = args.as_of.unwrap_or_else(|| Utc::now().date_naive());
    let result = app.run(as_of, Utc::now(), progress_sink(output_mode));
    match output_mode {
        OutputMode::Interactive => HumanOutput::print_run(&result).into_diagnostic()?,
        OutputMode::NonInteractive => JsonOutput::print_run(&result).into_diagnostic()?,
    }

    if result.has_failures() {
        let failed: Vec<String> = result
            .failed_sources()
            .iter()
            .map(SourceTag::to_string)
            .collect();
        return Err(miette::Report::msg(format!(
            "sources failed: {}",
            failed.join(", ")
        )));
    }
    Ok(())
}

fn run_indexes(args: ConfigArgs, output_mode: OutputMode) -> miette::Result<()> {
    let config = resolve(&args, Overrides::default())?;
    let app = build_app(config)?;
    let result = app.ensure_indexes(progress_sink(output_mode))?;
    match output_mode {
        OutputMode::Interactive => HumanOutput::print_indexes(&result).into_diagnostic(),
        OutputMode::NonInteractive => JsonOutput::print_indexes(&result).into_diagnostic(),
    }
}

fn run_sources(args: ConfigArgs, output_mode: OutputMode) -> miette::Result<()> {
    let config = resolve(&args, Overrides::default())?;
    let app = build_app(config)?;
    let result = app.sources();
    match output_mode {
        OutputMode::Interactive => HumanOutput::print_sources(&result).into_diagnostic(),
        OutputMode::NonInteractive => JsonOutput::print_sources(&result).into_diagnostic(),
    }
}
