use anyhow::Context;
use clap::Parser;
use colored::Colorize;
use readport::cli::Args;
use readport::{Config, ConfigLoader, logging, pipeline, shutdown};
use std::process;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::error;

fn main() {
    let args = Args::parse();

    let config = match load_config(&args) {
        Ok(config) => config,
        Err(error) => {
            eprintln!("Error: {:#}", error);
            process::exit(1);
        }
    };

    if args.check {
        print_summary(&args, &config);
        process::exit(0);
    }

    if let Err(error) = logging::init(config.log_level, &config.log_file) {
        eprintln!("Error: {:#}", error);
        process::exit(1);
    }

    // Create async runtime and run the stream with signal handling
    let runtime = tokio::runtime::Runtime::new().unwrap_or_else(|e| {
        eprintln!("Failed to create async runtime: {}", e);
        process::exit(1);
    });

    let result = runtime.block_on(async {
        let cancellation_token = CancellationToken::new();
        let (signal_tx, signal_rx) = mpsc::unbounded_channel();
        tokio::spawn(shutdown::forward_signals(signal_tx));

        let token = cancellation_token.clone();
        tokio::spawn(async move {
            if shutdown::escalate(token, signal_rx).await {
                process::exit(1);
            }
        });

        pipeline::run(config, cancellation_token).await
    });

    match result {
        Ok(_stats) => process::exit(0),
        Err(error) => {
            error!("{}", error);
            eprintln!("Error: {:#}", error);
            process::exit(1);
        }
    }
}

fn load_config(args: &Args) -> anyhow::Result<Config> {
    ConfigLoader::new(args.regex_engine.engine())
        .load_file(&args.config)
        .with_context(|| format!("Invalid configuration '{}'", args.config.display()))
}

fn print_summary(args: &Args, config: &Config) {
    println!("{}", "Configuration OK".green().bold());
    println!("  {:<12} {}", "file:".bold(), args.config.display());
    println!("  {:<12} {}/{}", "device:".bold(), config.station, config.device);
    println!("  {:<12} {}:{}", "address:".bold(), config.host, config.port);
    match config.timeout {
        Some(timeout) => println!("  {:<12} {}s", "timeout:".bold(), timeout.as_secs_f64()),
        None => println!("  {:<12} {}", "timeout:".bold(), "none".dimmed()),
    }
    println!(
        "  {:<12} {} ({} engine)",
        "regex:".bold(),
        config.pattern.source(),
        args.regex_engine.engine().name()
    );
    let variables: Vec<&str> = config.pattern.names().collect();
    println!("  {:<12} {}", "variables:".bold(), variables.join(", "));
    println!("  {:<12} {}", "group by:".bold(), config.group);
    println!("  {:<12} {}", "pack length:".bold(), config.pack_length);
    println!("  {:<12} {}", "destination:".bold(), config.destination.raw());
    println!(
        "  {:<12} {} -> {}",
        "logging:".bold(),
        config.log_level,
        config.log_file.display()
    );
}
