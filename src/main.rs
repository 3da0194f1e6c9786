//! squashrepo - Main entry point

use anyhow::{Context, Result, bail};
use clap::CommandFactory;
use std::io::{self, Write};
use tracing::{error, info, warn};

use squashrepo::cli::{Cli, Commands, ConfigCommands};
use squashrepo::{
    Catalog, CommandRunner, DryRunRunner, InterruptFlag, Menu, Pipeline, PipelineConfig,
    PipelineReport, ProcessGuard, SystemRunner, deduplicate, fetch_catalog, process_guard, sanity,
    scan,
};

/// Initialize tracing; RUST_LOG overrides the default level.
fn init_logger(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default)),
        )
        .with_writer(io::stderr)
        .init();
}

fn load_config(cli: &Cli) -> Result<PipelineConfig> {
    let mut config = match &cli.config {
        Some(path) => PipelineConfig::load_from_file(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
        None => PipelineConfig::default(),
    };
    if let Some(work_dir) = &cli.work_dir {
        config.work_dir = work_dir.clone();
    }
    if cli.no_sudo {
        config.use_sudo = false;
    }
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

fn main() -> Result<()> {
    let cli = Cli::parse_args();
    init_logger(cli.verbose);
    info!("squashrepo starting up");

    if let Err(e) = process_guard::init_signal_handlers(InterruptFlag::global()) {
        warn!("Failed to initialize signal handlers: {}", e);
    }
    let _guard = ProcessGuard::new();

    let command = cli.command.clone().unwrap_or(Commands::Browse);

    // Commands that never touch the system
    match &command {
        Commands::Config { action } => return run_config_command(action),
        Commands::Completions { shell } => {
            clap_complete::generate(*shell, &mut Cli::command(), "squashrepo", &mut io::stdout());
            return Ok(());
        }
        _ => {}
    }

    let config = load_config(&cli)?;
    let runner: Box<dyn CommandRunner> = if cli.dry_run {
        info!("Dry-run mode: external commands are logged, not executed");
        Box::new(DryRunRunner)
    } else {
        Box::new(SystemRunner::new())
    };

    match &command {
        Commands::Plan { dir } => run_plan(&config, dir),
        Commands::Catalog { file, json } => {
            if file.is_none() {
                preflight(&cli, &config)?;
            }
            let catalog = load_catalog(runner.as_ref(), &config, file.as_deref())?;
            print_catalog(&catalog, *json)
        }
        Commands::Install { link } => {
            preflight(&cli, &config)?;
            let report = Pipeline::new(runner.as_ref(), &config).run(link);
            show_report(&report);
            if report.is_aborted() {
                std::process::exit(1);
            }
            Ok(())
        }
        Commands::Browse => {
            preflight(&cli, &config)?;
            run_browse(runner.as_ref(), &config)
        }
        Commands::Config { .. } | Commands::Completions { .. } => Ok(()),
    }
}

fn preflight(cli: &Cli, config: &PipelineConfig) -> Result<()> {
    if cli.skip_preflight || cli.dry_run {
        return Ok(());
    }
    let runner = SystemRunner::quiet();
    let result = sanity::verify_environment(&runner, config);
    if !result.is_ok() {
        eprintln!("{}", result.report());
        bail!("Pre-flight check failed");
    }
    sanity::authenticate_sudo(&runner, &result)?;
    Ok(())
}

/// Print the run summary. After an interrupt the run has already cleaned
/// up, so exit with the signal's status instead of going back to the menu.
fn show_report(report: &PipelineReport) {
    println!("{}", report);
    let _ = io::stdout().flush();
    let interrupt = InterruptFlag::global();
    if interrupt.is_raised() {
        std::process::exit(interrupt.exit_code());
    }
}

fn run_config_command(action: &ConfigCommands) -> Result<()> {
    match action {
        ConfigCommands::Init { path } => {
            PipelineConfig::default()
                .save_to_file(path)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            println!("Wrote default configuration to {}", path.display());
        }
        ConfigCommands::Validate { path } => {
            let config = PipelineConfig::load_from_file(path)?;
            match config.validate() {
                Ok(()) => println!("Configuration file is valid: {}", path.display()),
                Err(e) => {
                    error!("Configuration validation failed: {}", e);
                    eprintln!("Configuration validation failed: {}", e);
                    std::process::exit(1);
                }
            }
        }
    }
    Ok(())
}

fn run_plan(config: &PipelineConfig, dir: &std::path::Path) -> Result<()> {
    let artifacts = scan(dir, &config.package_suffix)
        .with_context(|| format!("Failed to scan {}", dir.display()))?;
    if artifacts.is_empty() {
        bail!("No packages found under {}", dir.display());
    }
    let found = artifacts.len();
    let retained = deduplicate(artifacts);
    println!("{} package file(s) found, {} would be installed:", found, retained.len());
    for artifact in &retained {
        println!("  {:<32} {}", artifact.base_name, artifact.path.display());
    }
    Ok(())
}

fn load_catalog(
    runner: &dyn CommandRunner,
    config: &PipelineConfig,
    file: Option<&std::path::Path>,
) -> Result<Catalog> {
    let path = match file {
        Some(path) => path.to_path_buf(),
        None => fetch_catalog(runner, config).context("Failed to download the catalog")?,
    };
    let catalog = Catalog::load(&path)?;
    if catalog.is_empty() {
        bail!("No repositories found in {}", path.display());
    }
    Ok(catalog)
}

fn print_catalog(catalog: &Catalog, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(catalog)?);
        return Ok(());
    }
    for category in &catalog.categories {
        println!("{}", category.name);
        for repo in &category.repositories {
            println!("  {}", repo.name);
            for link in &repo.links {
                println!("    {}", link.url);
            }
        }
    }
    Ok(())
}

fn run_browse(runner: &dyn CommandRunner, config: &PipelineConfig) -> Result<()> {
    let catalog = load_catalog(runner, config, None)?;
    info!(
        categories = catalog.categories.len(),
        links = catalog.link_count(),
        "catalog loaded"
    );

    let pipeline = Pipeline::new(runner, config);
    let stdin = io::stdin();
    let mut menu = Menu::new(&catalog, stdin.lock(), io::stdout());
    menu.run(|link| show_report(&pipeline.run(link)))?;

    println!("Goodbye.");
    Ok(())
}
