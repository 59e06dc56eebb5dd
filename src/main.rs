// mlmm-server/src/main.rs
//
// Copyright (c) 2025 Arcella Team
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE>
// or the MIT license <LICENSE-MIT>, at your option.
// This file may not be copied, modified, or distributed
// except according to those terms.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use mlmm_server::config::{self, Overrides};
use mlmm_server::engine::CommandEngine;
use mlmm_server::error::AnyResult;
use mlmm_server::protocol::{Reply, ReplyFraming};
use mlmm_server::{client, log, server};

/// mlmm-server: long-lived calculation server for per-step clients
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Bind, publish mlmm_pid.txt / mlmm_port.txt and serve calculation requests
    Serve(ServeArgs),
    /// Hand one input file to a running server and wait for the result
    Submit(SubmitArgs),
}

#[derive(Args, Debug)]
struct ServeArgs {
    /// Configuration file (TOML)
    #[arg(long, env = "MLMM_CONFIG")]
    config: Option<PathBuf>,

    /// Interface to bind
    #[arg(long, env = "MLMM_HOST")]
    host: Option<String>,

    /// Port to bind (0 = pick a free one)
    #[arg(long, env = "MLMM_PORT")]
    port: Option<u16>,

    /// Listen backlog
    #[arg(long, env = "MLMM_NUM_CLIENTS")]
    num_clients: Option<u32>,

    /// Serve each connection on its own task
    #[arg(long)]
    concurrent: bool,

    /// Reply wrapping
    #[arg(long, value_enum)]
    reply_framing: Option<ReplyFraming>,

    /// Directory for the discovery files
    #[arg(long)]
    discovery_dir: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long)]
    log_level: Option<String>,

    /// Also write logs to this file
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Disable logging entirely
    #[arg(long)]
    quiet: bool,

    /// Engine program, followed by its arguments after `--`
    #[arg(long)]
    engine: Option<PathBuf>,

    #[arg(last = true, value_name = "ENGINE_ARGS")]
    engine_args: Vec<String>,
}

#[derive(Args, Debug)]
struct SubmitArgs {
    /// Input file for the calculation
    #[arg(value_name = "INPUT")]
    input: PathBuf,

    /// Server host
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Server port; read from mlmm_port.txt when omitted
    #[arg(long)]
    port: Option<u16>,

    /// Directory holding the discovery files
    #[arg(long, default_value = ".")]
    discovery_dir: PathBuf,

    /// Reply wrapping used by the server
    #[arg(long, value_enum, default_value_t = ReplyFraming::Double)]
    reply_framing: ReplyFraming,
}

impl ServeArgs {
    fn overrides(&self) -> Overrides {
        Overrides {
            config_file: self.config.clone(),
            host: self.host.clone(),
            port: self.port,
            num_clients: self.num_clients,
            concurrent_sessions: self.concurrent.then_some(true),
            reply_framing: self.reply_framing,
            discovery_dir: self.discovery_dir.clone(),
            engine_program: self.engine.clone(),
            engine_args: (!self.engine_args.is_empty()).then(|| self.engine_args.clone()),
            log_level: self.log_level.clone(),
            log_file: self.log_file.clone(),
            log_enabled: self.quiet.then_some(false),
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> AnyResult<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Serve(args) => serve(args).await,
        Commands::Submit(args) => submit(args).await,
    }
}

async fn serve(args: ServeArgs) -> AnyResult<()> {
    // 1. Resolve configuration once; nothing downstream reads the environment
    let (config, warnings) = config::load(&args.overrides()).await?;

    // 2. Initialize logging, then report what the loader found
    let _log_guard = log::init(&config.log)?;
    tracing::info!("Starting up (v{})", env!("CARGO_PKG_VERSION"));
    for warning in &warnings {
        tracing::warn!("{}", warning);
    }

    // 3. Engine and server
    let engine = CommandEngine::from_config(&config.engine)?;
    tracing::debug!("Using engine {:?}", engine);

    let handle = server::start(&config.server, engine).await?;
    tracing::info!(
        "Serving on {} (pid {})",
        handle.local_addr(),
        handle.location().pid
    );

    handle.wait().await?;
    tracing::info!("Shutting down");

    Ok(())
}

async fn submit(args: SubmitArgs) -> AnyResult<()> {
    let input = std::path::absolute(&args.input)?;

    let mut connection = match args.port {
        Some(port) => client::Client::connect((args.host.as_str(), port), args.reply_framing).await?,
        None => client::Client::discover(&args.discovery_dir, &args.host, args.reply_framing).await?,
    };
    let reply = connection.run(&input).await?;
    connection.close().await?;

    match reply {
        Reply::Success => {
            println!("finished: {}", input.display());
            Ok(())
        }
        Reply::Failure(reason) => {
            eprintln!("Error: {}", reason);
            std::process::exit(1);
        }
    }
}
