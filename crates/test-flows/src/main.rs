use anyhow::{Context, Result};
use clap::{CommandFactory, Parser};
use clap::error::ErrorKind;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use test_flows::{
    flows, Checks, Docker, DockerRunner, Environment, FlowContext, RunOptions, RunSummary,
    Settings, TestRunner,
};
use tracing::{error, info, Level};

fn default_unique_id() -> String {
    std::env::var("SUDO_USER")
        .or_else(|_| std::env::var("USER"))
        .unwrap_or_default()
}

#[derive(Parser)]
#[command(name = "test-flows")]
#[command(about = "Run the Multi-AP test flows against a gateway and two repeaters")]
#[command(version)]
struct Cli {
    /// Tests to run; all tests when none are given
    tests: Vec<String>,

    /// Capture the packets during each test
    #[arg(short, long)]
    tcpdump: bool,

    /// Report each action
    #[arg(short, long)]
    verbose: bool,

    /// Exit on the first failure
    #[arg(short, long)]
    stop_on_failure: bool,

    /// Append UNIQUE_ID to all container names, e.g. gateway-<UNIQUE_ID>
    #[arg(short, long, default_value_t = default_unique_id())]
    unique_id: String,

    /// Don't start up the containers
    #[arg(long)]
    skip_init: bool,

    /// Settings file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// List the available tests and exit
    #[arg(long)]
    list: bool,
}

impl Cli {
    fn options(&self) -> RunOptions {
        RunOptions {
            tcpdump: self.tcpdump,
            stop_on_failure: self.stop_on_failure,
            unique_id: self.unique_id.clone(),
            skip_init: self.skip_init,
            tests: self.tests.clone(),
        }
    }
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .init();

    let runner = TestRunner::new(flows::registry()?);

    if cli.list {
        for name in runner.registry().names() {
            println!("{}", name);
        }
        return Ok(ExitCode::SUCCESS);
    }

    if let Err(test_flows::Error::UnknownTests(unknown)) = runner.registry().select(&cli.tests) {
        let available: Vec<&str> = runner.registry().names().collect();
        Cli::command()
            .error(
                ErrorKind::InvalidValue,
                format!(
                    "Unknown tests: {}\n\navailable tests: {}",
                    unknown.join(", "),
                    available.join(", ")
                ),
            )
            .exit();
    }

    let settings = match &cli.config {
        Some(path) => Settings::load(path)
            .with_context(|| format!("Failed to load settings from {}", path.display()))?,
        None => Settings::default(),
    };
    let options = cli.options();

    let outcome = smol::block_on(run(runner, settings, options));
    match &outcome {
        Ok(summary) => {
            info!("Summary:\n{}", summary);
            if !summary.success() {
                error!("{} failed checks", summary.total_failures());
            }
        }
        Err(e) => error!("Test environment broken: {}", e),
    }
    Ok(ExitCode::from(exit_status(&outcome)))
}

/// Process exit status for the outcome of a run: 0 when every case passed,
/// 2 for test names nobody registered, 1 otherwise
fn exit_status(outcome: &test_flows::Result<RunSummary>) -> u8 {
    match outcome {
        Ok(summary) if summary.success() => 0,
        Ok(_) => 1,
        Err(test_flows::Error::UnknownTests(_)) => 2,
        Err(_) => 1,
    }
}

async fn run(
    runner: TestRunner,
    settings: Settings,
    options: RunOptions,
) -> test_flows::Result<RunSummary> {
    let devices = Arc::new(DockerRunner::new());
    info!("init starting");
    let Environment {
        controller,
        agents,
        mut capture,
    } = Environment::start(&Docker::default(), &*devices, &settings, &options).await?;

    let mut ctx = FlowContext::new(
        controller,
        agents,
        devices,
        settings,
        Checks::new(options.stop_on_failure),
    );

    runner.run(&mut ctx, &mut capture, &options.tests).await
}
