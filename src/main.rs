mod cli;

use stemforged::{
    config, open_pipeline,
    pipeline::{enqueue_file, handler_for, IntakeRequest},
    server::{self, auth, AppContext},
    watch, worker,
};
use stemforged_common::{JobSource, Stage};
use stemforged_db::pool::get_conn;
use stemforged_db::queries::jobs;

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Commands};
use std::path::Path;

async fn start_server(
    host: Option<String>,
    port: Option<u16>,
    config_path: Option<&Path>,
) -> Result<()> {
    let mut config = config::load_config_or_default(config_path)?;

    // Override host/port from CLI if specified
    if let Some(host) = host {
        config.server.host = host;
    }
    if let Some(port) = port {
        config.server.port = port;
    }
    let addr = server::bind_addr(&config)?;

    tracing::info!("Starting stemforged server");
    let pipeline = open_pipeline(&config)?;

    // Claims left by a previous run of this instance can never complete.
    // Standalone workers and other instances keep theirs.
    let instance = config.workers.instance_id.clone();
    match get_conn(&pipeline.db).and_then(|conn| jobs::reset_orphaned_claims(&conn, &instance)) {
        Ok(count) if count > 0 => {
            tracing::info!("Released {} claims from previous session", count);
        }
        Ok(_) => {}
        Err(e) => {
            tracing::warn!("Failed to release orphaned claims: {}", e);
        }
    }

    if config.server.auth.enabled {
        auth::ensure_default_admin(&pipeline.db, &config.server.auth)?;
    }

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let workers = worker::spawn_all(&pipeline, &config.workers, &shutdown_rx);

    let mut watcher = watch::FileWatcher::new(config.watch.clone(), pipeline.clone());
    watcher.start(shutdown_rx.clone())?;

    let ctx = AppContext::new(config, config_path.map(Path::to_path_buf), pipeline);
    let server_result = server::serve(ctx, addr, server::shutdown_signal()).await;

    // Workers finish the job in hand before exiting.
    tracing::info!("Shutting down...");
    let _ = shutdown_tx.send(true);
    watcher.stop();
    for handle in workers {
        let _ = handle.await;
    }

    server_result
}

async fn run_worker(stage: Stage, config_path: Option<&Path>) -> Result<()> {
    let mut config = config::load_config_or_default(config_path)?;
    let pipeline = open_pipeline(&config)?;

    // A per-process instance, so a restarting `start` never releases our claims.
    config.workers.instance_id = format!("{}.{}", config.workers.instance_id, std::process::id());

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let worker = worker::StageWorker::new(pipeline.clone(), handler_for(&pipeline, stage), &config.workers);
    tracing::info!("Running {} worker {}", stage, worker.worker_id());
    let handle = tokio::spawn(worker.run(shutdown_rx));

    server::shutdown_signal().await;
    let _ = shutdown_tx.send(true);
    handle.await.context("Worker task failed")?;
    Ok(())
}

async fn enqueue(file: &Path, stem_types: Option<String>, config_path: Option<&Path>) -> Result<()> {
    if !file.is_file() {
        anyhow::bail!("Input file does not exist: {:?}", file);
    }
    let name = file
        .file_name()
        .and_then(|n| n.to_str())
        .with_context(|| format!("Invalid file name: {:?}", file))?;

    let config = config::load_config_or_default(config_path)?;
    let pipeline = open_pipeline(&config)?;

    let request = IntakeRequest::new(name, JobSource::Cli).with_stems(stem_types);
    let job = enqueue_file(&pipeline, request, file).await?;

    println!("Queued job {}", job.id);
    println!("  File: {}", job.filename);
    println!("  Stems: {}", job.settings.stem_types);
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Respect RUST_LOG env var if set, otherwise use defaults based on verbose flag
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            "stemforged=trace,stemforged_av=trace,stemforged_db=debug,stemforged_common=debug,tower_http=debug".to_string()
        } else {
            "stemforged=debug,stemforged_db=info,tower_http=info".to_string()
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(&env_filter)
        .init();

    match cli.command {
        Commands::Start { host, port } => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(start_server(host, port, cli.config.as_deref()))
        }
        Commands::Worker { stage } => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(run_worker(stage, cli.config.as_deref()))
        }
        Commands::Enqueue { file, stem_types } => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(enqueue(&file, stem_types, cli.config.as_deref()))
        }
        Commands::CheckTools => check_tools(),
        Commands::Validate {
            config: config_path,
        } => {
            let path = config_path.or(cli.config);
            validate_config(path.as_deref())
        }
        Commands::Version => {
            println!("stemforged {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Commands::HashPassword { password } => hash_password(&password),
        Commands::GenerateSecret => generate_secret(),
    }
}

fn check_tools() -> Result<()> {
    println!("Checking external tools...\n");

    let tools = stemforged_av::check_tools();
    let mut all_ok = true;

    for tool in &tools {
        let status = if tool.available {
            "✓"
        } else {
            all_ok = false;
            "✗"
        };

        print!("{} {}", status, tool.name);

        if let Some(ref version) = tool.version {
            print!(" ({})", version.lines().next().unwrap_or(""));
        }

        if let Some(ref path) = tool.path {
            print!(" - {}", path.display());
        }

        println!();
    }

    println!();
    if all_ok {
        println!("All tools are available!");
    } else {
        println!("Some tools are missing. ffmpeg, ffprobe and the configured splitter are required.");
    }

    Ok(())
}

fn validate_config(path: Option<&Path>) -> Result<()> {
    let config = match path {
        Some(p) => {
            println!("Validating config: {:?}", p);
            let config = config::load_config(p)?;
            println!("✓ Configuration is valid");
            config
        }
        None => {
            println!("No config file specified, using defaults");
            config::Config::default()
        }
    };

    let pipeline = &config.pipeline;
    println!("  Server: {}:{}", config.server.host, config.server.port);
    println!("  Auth enabled: {}", config.server.auth.enabled);
    println!("  Data dir: {}", config.paths.data_dir.display());
    println!("  Watch enabled: {}", config.watch.enabled);
    println!(
        "  Splitter: {} ({} stems, keeping {})",
        pipeline.splitter_type, pipeline.stems, pipeline.stem_types
    );
    if let Err(e) = pipeline.validate() {
        println!("  ! Default stem selection is invalid: {}", e);
    }

    Ok(())
}

fn hash_password(password: &str) -> Result<()> {
    let hash = auth::hash_password(password)?;
    println!("{}", hash);
    Ok(())
}

fn generate_secret() -> Result<()> {
    let secret = auth::generate_secret();
    println!("{}", secret);
    Ok(())
}
