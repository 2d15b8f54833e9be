mod face;

use std::sync::Arc;

use anyhow::{Context, Result, bail};
use browser_sleuth::chrome::ChromeConnector;
use browser_sleuth::prompt::Preset;
use browser_sleuth::retry::RetryingVision;
use browser_sleuth::{
    Config, Executor, OpenAiBrain, OpenAiVision, Orchestrator, OutcomeStatus, Session,
    VisionAnalyzer,
};
use clap::Parser;
use dotenvy::dotenv;
use tokio::sync::{Mutex, broadcast};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Drive a browser through an investigative task with a language model.
#[derive(Debug, Parser)]
#[command(name = "agent", version)]
struct Cli {
    /// Task to execute
    #[arg(short, long, conflicts_with = "prompt")]
    task: Option<String>,

    /// Use a predefined task
    #[arg(short, long, value_enum)]
    prompt: Option<Preset>,

    /// Maximum loop iterations
    #[arg(long)]
    max_steps: Option<usize>,

    /// Remote debugging endpoint of the browser
    #[arg(long)]
    browser_url: Option<String>,

    /// Serve the web console and accept tasks from it
    #[arg(long)]
    serve: bool,

    /// First port to try for the web console
    #[arg(long, default_value_t = 3000)]
    port: u16,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let mut config = Config::from_env().context("loading configuration")?;
    if let Some(max_steps) = cli.max_steps {
        config.agent.max_steps = max_steps;
    }
    if let Some(url) = cli.browser_url.clone() {
        config.browser.debug_url = url;
    }

    let task = cli
        .task
        .clone()
        .or_else(|| cli.prompt.map(|p| p.task().to_string()));
    if task.is_none() && !cli.serve {
        bail!("Nothing to do: pass --task, --prompt or --serve (see --help)");
    }

    info!("Starting browser agent");
    let (event_tx, _) = broadcast::channel(64);
    let agent = build_agent(&config)?.with_events(event_tx.clone());
    let agent = Arc::new(Mutex::new(agent));

    if let Some(task) = task {
        let outcome = agent.lock().await.run(&task).await;
        println!("{}", "=".repeat(60));
        println!("FINAL REPORT ({:?}, {} steps)", outcome.status, outcome.steps);
        println!("{}", "=".repeat(60));
        println!("{}", outcome.report);
        if outcome.status == OutcomeStatus::Failed {
            bail!("task failed");
        }
        if !cli.serve {
            return Ok(());
        }
    }

    let mut cmd_rx = face::start_server(Arc::clone(&agent), event_tx, cli.port).await?;
    info!("Waiting for commands...");
    while let Some(command) = cmd_rx.recv().await {
        info!("Received command: '{}'", command);
        let outcome = agent.lock().await.run(&command).await;
        info!("Task finished: {:?} after {} steps", outcome.status, outcome.steps);
    }

    Ok(())
}

fn build_agent(config: &Config) -> Result<Orchestrator> {
    let connector = ChromeConnector::new(config.browser.clone());
    let session = Session::new(Arc::new(connector));

    let vision: Option<Arc<dyn VisionAnalyzer>> = match OpenAiVision::new(&config.llm) {
        Ok(v) => Some(Arc::new(RetryingVision::new(
            Arc::new(v),
            config.retry.clone(),
        ))),
        Err(e) => {
            warn!("Vision tools disabled: {}", e);
            None
        }
    };

    let executor = Executor::new(
        session,
        vision,
        config.credentials.clone(),
        config.stability.clone(),
        config.executor.clone(),
    );
    let brain = OpenAiBrain::new(&config.llm)?;
    info!("Decision-maker ready ({})", config.llm.model);

    Ok(Orchestrator::new(
        executor,
        Arc::new(brain),
        config.agent.clone(),
        config.retry.clone(),
    ))
}
