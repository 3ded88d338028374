//! drivesync - Block-level delta uploads to a remote drive

use clap::Parser;
use drivesync::cli::{size_or, Cli, Commands, ConfigArgs, DiffArgs, SignArgs, UploadArgs};
use drivesync::config::Config;
use drivesync::delta::{compute_delta_from_path, is_worthwhile};
use drivesync::format::{DiffReport, UploadReport};
use drivesync::progress::{ProgressReporter, ProgressTracker};
use drivesync::remote::RemoteStore;
use drivesync::retry::{with_retry, RetryConfig};
use drivesync::signature::{generate_signature, write_signature};
use drivesync::upload::UploadDriver;
use drivesync::UploadOptions;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    init_tracing(cli.verbose, cli.json);

    match cli.command {
        Commands::Upload(args) => {
            let config = args.to_config(load_config(cli.config.as_deref())?)?;
            handle_upload(args, config).await?;
        }

        Commands::Sign(args) => {
            let config = load_config(cli.config.as_deref())?;
            handle_sign(args, &config)?;
        }

        Commands::Diff(args) => {
            let config = load_config(cli.config.as_deref())?;
            handle_diff(args, &config)?;
        }

        Commands::Config(args) => {
            handle_config_command(args)?;
        }
    }

    Ok(())
}

fn init_tracing(verbose: u8, json: bool) {
    let filter = match verbose {
        0 => EnvFilter::new("drivesync=info"),
        1 => EnvFilter::new("drivesync=debug"),
        2 => EnvFilter::new("drivesync=trace"),
        _ => EnvFilter::new("trace"),
    };

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().pretty())
            .init();
    }
}

/// Cancel `token` on Ctrl+C
fn setup_shutdown_handler(token: CancellationToken) {
    tokio::spawn(async move {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::warn!("Received Ctrl+C, abandoning upload...");
                token.cancel();
            }
            _ = token.cancelled() => {
                // Normal shutdown
            }
        }
    });
}

fn load_config(path: Option<&Path>) -> anyhow::Result<Config> {
    let config = match path {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    Ok(config)
}

async fn handle_upload(args: UploadArgs, config: Config) -> anyhow::Result<()> {
    let remote = RemoteStore::http(&config.server_url, args.token.as_deref())?;
    let driver = UploadDriver::new(remote, UploadOptions::from(&config));

    let cancel = CancellationToken::new();
    setup_shutdown_handler(cancel.clone());

    let existing = match (&args.existing, args.new) {
        (Some(file_id), _) => Some(file_id.clone()),
        (None, true) => None,
        (None, false) => {
            driver
                .find_existing(&args.file, args.folder.as_deref(), &cancel)
                .await
        }
    };

    tracing::info!(
        file = %args.file.display(),
        existing = ?existing,
        server = %config.server_url,
        "Starting upload"
    );

    let tracker = ProgressTracker::new(config.progress);
    tracker.start(&args.file.display().to_string());
    let started = Instant::now();

    let (driver, tracker, cancel_ref, args_ref, existing_ref) = (&driver, &tracker, &cancel, &args, &existing);
    let result = with_retry(&RetryConfig::from(&config), |attempt| async move {
        if attempt > 0 {
            tracker.println(&format!("Retrying upload (attempt {})", attempt + 1));
        }

        let (reporter, rx) = ProgressReporter::channel();
        let upload = async move {
            driver
                .smart_upload(
                    &args_ref.file,
                    existing_ref.as_deref(),
                    args_ref.folder.as_deref(),
                    &reporter,
                    cancel_ref,
                )
                .await
        };

        let (result, ()) = tokio::join!(upload, tracker.follow(rx));
        result
    })
    .await;

    tracker.finish();
    // Stops the Ctrl+C listener
    cancel.cancel();

    let outcome = result?;
    UploadReport {
        outcome: &outcome,
        duration_secs: started.elapsed().as_secs_f64(),
    }
    .print();

    Ok(())
}

fn handle_sign(args: SignArgs, config: &Config) -> anyhow::Result<()> {
    let block_size = size_or(args.block_size.as_deref(), config.block_size)?;
    tracing::info!(file = ?args.file, block_size, "Generating signature");

    let signature = generate_signature(&args.file, block_size)?;
    let output = args.output.unwrap_or_else(|| sidecar_path(&args.file));
    write_signature(&signature, &output)?;

    tracing::info!(output = ?output, blocks = signature.block_count(), "Signature generated");
    Ok(())
}

fn handle_diff(args: DiffArgs, config: &Config) -> anyhow::Result<()> {
    let block_size = size_or(args.block_size.as_deref(), config.block_size)?;
    let threshold = args.threshold.unwrap_or(config.savings_threshold_percent);

    let old_sig = generate_signature(&args.old, block_size)?;
    let new_sig = generate_signature(&args.new, block_size)?;
    let plan = compute_delta_from_path(&new_sig, &old_sig, &args.new)?;

    DiffReport {
        stats: &plan.stats,
        block_size,
        threshold_percent: threshold,
        worthwhile: is_worthwhile(&plan, threshold),
    }
    .print();

    Ok(())
}

/// `<file>.dsig` next to the file
fn sidecar_path(file: &Path) -> PathBuf {
    let mut sidecar = file.to_path_buf();
    let filename = sidecar
        .file_name()
        .map(|s| format!("{}.dsig", s.to_string_lossy()))
        .unwrap_or_else(|| ".dsig".to_string());
    sidecar.set_file_name(filename);
    sidecar
}

fn handle_config_command(args: ConfigArgs) -> anyhow::Result<()> {
    if args.path {
        match Config::default_config_path() {
            Ok(path) => println!("{}", path.display()),
            Err(e) => eprintln!("Error: {}", e),
        }
    } else if args.init {
        let config = Config::default();
        config.save()?;
        println!(
            "Created default configuration at {}",
            Config::default_config_path()?.display()
        );
    } else {
        // Show current config
        let config = Config::load().unwrap_or_default();
        println!("{}", toml::to_string_pretty(&config)?);
    }
    Ok(())
}
