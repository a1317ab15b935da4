use clap::Parser;
use coach::cli::{
    print_comparison, Cli, Commands, ConsoleListener, OutputMode, RunMonitor, TrainArgs,
};
use coach::config::AppConfig;
use coach::orchestrator::TrainingOrchestrator;
use coach::training::AgentType;
use coach::{SimulatedAgentFactory, TrainingProgressListener};
use std::sync::Arc;
use tokio::signal;
use tracing::{info, warn};

mod main_runtime;

use main_runtime::{init_logging, init_logging_simple};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = AppConfig::load_from(&cli.config_dir)?;

    match cli.command {
        Commands::Train(args) => {
            init_logging(&config.logging);
            run_train(config, args).await?;
        }
        Commands::Config => {
            init_logging_simple();
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
    }

    Ok(())
}

async fn run_train(config: AppConfig, args: TrainArgs) -> anyhow::Result<()> {
    let training = args.training_config(config.training.clone());
    training.validate()?;

    let mut factory = SimulatedAgentFactory::new();
    if let Some(seed) = args.seed {
        factory = factory.with_seed(seed);
    }
    let orchestrator = TrainingOrchestrator::new(config.orchestrator.clone(), Arc::new(factory))?;

    let mode = OutputMode::from_json_flag(args.json);
    let console = (mode == OutputMode::Table).then(|| ConsoleListener::new(args.report_every));
    // Events are printed from this task so the final table comes after them
    let (channel, mut events) = orchestrator.subscribe_channel()?;

    let agent_types = args.agent.agent_types();
    let started = if agent_types.len() == AgentType::ALL.len() {
        let report = orchestrator.start_all(training)?;
        for (agent_type, reason) in &report.rejected {
            warn!(agent = %agent_type, reason = %reason, "agent did not start");
        }
        report.started_types()
    } else {
        for agent_type in &agent_types {
            orchestrator.start_training(*agent_type, training.clone())?;
        }
        agent_types
    };

    let mut monitor = RunMonitor::new(started);
    let ctrl_c = signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut stopping = false;

    while !monitor.is_finished() {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { break };
                if let Some(console) = &console {
                    console.on_event(&event);
                }
                monitor.observe(&event);
            }
            _ = &mut ctrl_c, if !stopping => {
                stopping = true;
                info!("Ctrl+C received, stopping training");
                let aborted = orchestrator.shutdown().await;
                if aborted > 0 {
                    warn!(aborted, "some runners had to be aborted");
                }
            }
        }
    }
    orchestrator.remove_progress_listener(channel);
    info!("all training sessions finished");

    print_comparison(&orchestrator.comparison(), mode)?;
    Ok(())
}
