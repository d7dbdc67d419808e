use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::BufReader;
use tokio::sync::watch;

use logweir::{
    logging, JsonLinesSender, LineReader, Reader, Registry, Runner, RunnerConfig, Sender,
};

/// How long exit waits for blocking I/O (stdin) left behind by the runner.
const RUNTIME_SHUTDOWN_WAIT: Duration = Duration::from_secs(1);

#[derive(Parser)]
#[command(name = "logweir")]
#[command(about = "Run log records through configurable transformer stages into batched delivery")]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Log level when RUST_LOG is not set
    #[arg(long, global = true, default_value = "info")]
    log_level: String,
}

#[derive(Subcommand)]
enum Command {
    /// Run one runner until its input ends or Ctrl-C
    Run {
        /// Runner configuration (.json, otherwise YAML)
        #[arg(short = 'c', long)]
        config: PathBuf,

        /// Input file (default: stdin)
        #[arg(short = 'i', long)]
        input: Option<PathBuf>,

        /// Output file (default: stdout)
        #[arg(short = 'o', long)]
        output: Option<PathBuf>,

        /// Print the runner status to stderr this often (e.g. 10s, 1m)
        #[arg(long, value_parser = humantime::parse_duration)]
        status_interval: Option<Duration>,
    },

    /// Build every stage of a configuration and run its sample logs
    Check {
        #[arg(short = 'c', long)]
        config: PathBuf,
    },

    /// List the registered transformer types as JSON
    Describe,
}

fn main() {
    let args = Args::parse();
    logging::init(&args.log_level);

    if let Err(e) = run(args.command) {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn run(command: Command) -> Result<()> {
    let registry = Registry::builtin()?;

    match command {
        Command::Run {
            config,
            input,
            output,
            status_interval,
        } => {
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
                .context("Failed to start async runtime")?;
            let result = runtime.block_on(run_runner(
                &registry,
                &config,
                input,
                output,
                status_interval,
            ));
            // A stdin read parked on a blocking thread never returns by itself
            runtime.shutdown_timeout(RUNTIME_SHUTDOWN_WAIT);
            result
        }
        Command::Check { config } => check(&registry, &config),
        Command::Describe => {
            println!("{}", serde_json::to_string_pretty(&registry.describe())?);
            Ok(())
        }
    }
}

fn load_config(path: &Path) -> Result<RunnerConfig> {
    RunnerConfig::load(path).with_context(|| format!("Failed to load config '{}'", path.display()))
}

async fn run_runner(
    registry: &Registry,
    config_path: &Path,
    input: Option<PathBuf>,
    output: Option<PathBuf>,
    status_interval: Option<Duration>,
) -> Result<()> {
    let config = load_config(config_path)?;

    let reader: Box<dyn Reader> = match &input {
        Some(path) => {
            let file = tokio::fs::File::open(path)
                .await
                .with_context(|| format!("Failed to open input file '{}'", path.display()))?;
            Box::new(LineReader::new(path.display().to_string(), BufReader::new(file)))
        }
        None => Box::new(LineReader::new("stdin", BufReader::new(tokio::io::stdin()))),
    };

    let sender: Box<dyn Sender> = match &output {
        Some(path) => {
            let file = tokio::fs::File::create(path)
                .await
                .with_context(|| format!("Failed to create output file '{}'", path.display()))?;
            Box::new(JsonLinesSender::new(path.display().to_string(), file))
        }
        None => Box::new(JsonLinesSender::new("stdout", tokio::io::stdout())),
    };

    let runner = Runner::new(&config, registry, reader, sender)
        .with_context(|| format!("Failed to build runner '{}'", config.name))?;

    let (stop_tx, stop_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupted, stopping runner");
            let _ = stop_tx.send(true);
        }
    });

    let reporter = status_interval.map(|interval| {
        let status = runner.status();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match serde_json::to_string(&status.snapshot()) {
                    Ok(json) => eprintln!("{}", json),
                    Err(e) => tracing::warn!(error = %e, "Cannot encode status"),
                }
            }
        })
    });

    let result = runner.run(stop_rx).await;
    if let Some(reporter) = reporter {
        reporter.abort();
    }

    let status = result?;
    eprintln!("{}", serde_json::to_string_pretty(&status)?);
    Ok(())
}

fn check(registry: &Registry, config_path: &Path) -> Result<()> {
    let config = load_config(config_path)?;
    config.batch_spec()?;
    config.max_inflight()?;
    config.parser.build()?;

    for (index, transform) in config.transforms.iter().enumerate() {
        let (stage, sample) = registry
            .build_validated(transform)
            .with_context(|| format!("transform #{} is invalid", index + 1))?;
        println!(
            "✓ {} ({}): {}",
            stage.type_name(),
            stage.stage().as_str(),
            stage.description()
        );
        for record in sample {
            println!("  {}", serde_json::to_string(&record)?);
        }
    }

    println!("✓ {}: {} transform(s) OK", config.name, config.transforms.len());
    Ok(())
}
