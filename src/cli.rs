use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use std::collections::BTreeSet;
use std::path::Path;
use tabled::{Table, Tabled};

use crate::coordination::TrainingProgressListener;
use crate::training::{
    AgentType, SessionId, TrainingComparison, TrainingConfiguration, TrainingEvent,
    TrainingSession,
};

#[derive(Parser)]
#[command(name = "coach")]
#[command(version)]
#[command(about = "Concurrent DQN / PPO / strategy training orchestrator", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Configuration directory (default.toml, <COACH_ENV>.toml)
    #[arg(short, long, env = "COACH_CONFIG_DIR", default_value = "config")]
    pub config_dir: String,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Train one or all agent types with simulated learners
    Train(TrainArgs),
    /// Print the effective merged configuration
    Config,
}

/// Which agent types to train
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum AgentSelection {
    Dqn,
    Ppo,
    Strategy,
    All,
}

impl AgentSelection {
    pub fn agent_types(&self) -> Vec<AgentType> {
        match self {
            AgentSelection::Dqn => vec![AgentType::Dqn],
            AgentSelection::Ppo => vec![AgentType::Ppo],
            AgentSelection::Strategy => vec![AgentType::Strategy],
            AgentSelection::All => AgentType::ALL.to_vec(),
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct TrainArgs {
    /// Agent type to train
    #[arg(short, long, value_enum, default_value = "all")]
    pub agent: AgentSelection,

    /// Episodes per session
    #[arg(short, long)]
    pub episodes: Option<u32>,

    /// Learning rate
    #[arg(long)]
    pub lr: Option<f64>,

    /// Pause between episodes in milliseconds
    #[arg(long)]
    pub delay_ms: Option<u64>,

    /// Save a checkpoint every N episodes
    #[arg(long)]
    pub checkpoint_interval: Option<u32>,

    /// Disable checkpoints
    #[arg(long)]
    pub no_checkpoints: bool,

    /// Seed for the simulated learners
    #[arg(long)]
    pub seed: Option<u64>,

    /// Print a progress line every N episodes
    #[arg(long, default_value = "50")]
    pub report_every: u32,

    /// Output the final comparison as JSON
    #[arg(long)]
    pub json: bool,
}

impl TrainArgs {
    /// Overlay command-line flags on the configured defaults
    pub fn training_config(&self, base: TrainingConfiguration) -> TrainingConfiguration {
        let mut config = base;
        if let Some(episodes) = self.episodes {
            config.max_episodes = episodes;
        }
        if let Some(lr) = self.lr {
            config.learning_rate = lr;
        }
        if let Some(delay_ms) = self.delay_ms {
            config.training_delay_ms = delay_ms;
        }
        if let Some(interval) = self.checkpoint_interval {
            config = config.with_checkpoints(interval);
        }
        if self.no_checkpoints {
            config = config.without_checkpoints();
        }
        config
    }
}

/// Output mode for command results.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    Table,
    Json,
}

impl OutputMode {
    pub fn from_json_flag(json: bool) -> Self {
        if json {
            OutputMode::Json
        } else {
            OutputMode::Table
        }
    }
}

/// One line of the comparison table
#[derive(Debug, Clone, Tabled, Serialize)]
pub struct ComparisonRow {
    #[tabled(rename = "Rank")]
    pub rank: String,
    #[tabled(rename = "Agent")]
    pub agent: String,
    #[tabled(rename = "State")]
    pub state: String,
    #[tabled(rename = "Episodes")]
    pub episodes: String,
    #[tabled(rename = "Avg Loss")]
    pub average_loss: String,
    #[tabled(rename = "Last Loss")]
    pub current_loss: String,
    #[tabled(rename = "Checkpoints")]
    pub checkpoints: u32,
    #[tabled(rename = "Duration")]
    pub duration: String,
}

/// Table rows, ranked sessions first, then sessions without episodes
pub fn comparison_rows(comparison: &TrainingComparison) -> Vec<ComparisonRow> {
    let ranking = comparison.ranking();
    let mut rows: Vec<ComparisonRow> = ranking
        .iter()
        .enumerate()
        .map(|(i, session)| row(Some(i + 1), session))
        .collect();
    rows.extend(
        comparison
            .sessions()
            .filter(|s| s.episodes_completed == 0)
            .map(|session| row(None, session)),
    );
    rows
}

fn row(rank: Option<usize>, session: &TrainingSession) -> ComparisonRow {
    ComparisonRow {
        rank: rank.map(|r| r.to_string()).unwrap_or_else(|| "-".to_string()),
        agent: session.agent_type.to_string(),
        state: session.state.to_string(),
        episodes: format!(
            "{}/{}",
            session.episodes_completed, session.config.max_episodes
        ),
        average_loss: format!("{:.4}", session.average_loss),
        current_loss: format!("{:.4}", session.current_loss),
        checkpoints: session.checkpoints_saved,
        duration: format!("{:.1}s", session.duration().num_milliseconds() as f64 / 1000.0),
    }
}

#[derive(Serialize)]
struct ComparisonOutput<'a> {
    best: Option<AgentType>,
    comparison: &'a TrainingComparison,
}

/// Print the comparison in the chosen mode.
pub fn print_comparison(comparison: &TrainingComparison, mode: OutputMode) -> anyhow::Result<()> {
    let best = comparison.best_performing().map(|s| s.agent_type);
    match mode {
        OutputMode::Table => {
            let rows = comparison_rows(comparison);
            if rows.is_empty() {
                println!("(no sessions)");
                return Ok(());
            }
            println!("{}", Table::new(rows));
            match best {
                Some(agent_type) => println!("\x1b[32mBest performing: {}\x1b[0m", agent_type),
                None => println!("Best performing: n/a"),
            }
        }
        OutputMode::Json => {
            let output = ComparisonOutput { best, comparison };
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }
    Ok(())
}

/// Prints lifecycle events and periodic progress lines to stdout
pub struct ConsoleListener {
    report_every: u32,
}

impl ConsoleListener {
    pub fn new(report_every: u32) -> Self {
        Self {
            report_every: report_every.max(1),
        }
    }

    fn should_report(&self, session: &TrainingSession) -> bool {
        session.episodes_completed % self.report_every == 0
            || session.episodes_completed == session.config.max_episodes
    }
}

impl TrainingProgressListener for ConsoleListener {
    fn on_training_started(
        &self,
        agent_type: AgentType,
        session_id: SessionId,
        config: &TrainingConfiguration,
    ) {
        println!(
            "▶ {:<8} session {} ({} episodes, lr {})",
            agent_type, session_id, config.max_episodes, config.learning_rate
        );
    }

    fn on_training_progress(&self, agent_type: AgentType, session: &TrainingSession) {
        if self.should_report(session) {
            println!(
                "  {:<8} {:>5.1}%  ep {:>6}  loss {:.4}  avg {:.4}",
                agent_type,
                session.progress() * 100.0,
                session.episodes_completed,
                session.current_loss,
                session.average_loss
            );
        }
    }

    fn on_training_completed(&self, agent_type: AgentType, session: &TrainingSession) {
        println!(
            "\x1b[32m✓ {:<8} completed {} episodes, avg loss {:.4}\x1b[0m",
            agent_type, session.episodes_completed, session.average_loss
        );
    }

    fn on_training_error(&self, agent_type: AgentType, message: &str) {
        println!("\x1b[31m✗ {:<8} {}\x1b[0m", agent_type, message);
    }

    fn on_training_interrupted(&self, agent_type: AgentType, session: &TrainingSession) {
        println!(
            "\x1b[33m■ {:<8} interrupted after {} episodes\x1b[0m",
            agent_type, session.episodes_completed
        );
    }

    fn on_checkpoint_saved(&self, agent_type: AgentType, episode: u32, path: &Path) {
        println!("  {:<8} checkpoint @ ep {} -> {}", agent_type, episode, path.display());
    }

    fn on_checkpoint_warning(&self, agent_type: AgentType, episode: u32, message: &str) {
        println!(
            "\x1b[33m! {:<8} checkpoint @ ep {} failed: {}\x1b[0m",
            agent_type, episode, message
        );
    }
}

/// Follows the event stream until every watched agent type has ended its session
#[derive(Debug, Default)]
pub struct RunMonitor {
    pending: BTreeSet<AgentType>,
}

impl RunMonitor {
    pub fn new(agent_types: impl IntoIterator<Item = AgentType>) -> Self {
        Self {
            pending: agent_types.into_iter().collect(),
        }
    }

    /// Feed one event; returns `true` once nothing is pending
    pub fn observe(&mut self, event: &TrainingEvent) -> bool {
        if event.is_terminal() {
            self.pending.remove(&event.agent_type());
        }
        self.is_finished()
    }

    pub fn is_finished(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::training::SessionState;

    fn args(extra: &[&str]) -> TrainArgs {
        let mut argv = vec!["coach", "train"];
        argv.extend_from_slice(extra);
        match Cli::try_parse_from(argv).unwrap().command {
            Commands::Train(args) => args,
            Commands::Config => panic!("expected train"),
        }
    }

    fn session(agent_type: AgentType, losses: &[f64]) -> TrainingSession {
        let mut session = TrainingSession::new(agent_type, TrainingConfiguration::new(10, 0.01));
        for loss in losses {
            session.record_episode(*loss);
        }
        session
    }

    #[test]
    fn test_train_flags_override_config() {
        let args = args(&["--agent", "ppo", "--episodes", "20", "--delay-ms", "0", "--no-checkpoints"]);
        assert_eq!(args.agent.agent_types(), vec![AgentType::Ppo]);

        let config = args.training_config(TrainingConfiguration::default());
        assert_eq!(config.max_episodes, 20);
        assert_eq!(config.training_delay_ms, 0);
        assert!(!config.save_checkpoints);
        assert_eq!(config.learning_rate, 1e-3);
    }

    #[test]
    fn test_train_defaults_to_all() {
        let args = args(&[]);
        assert_eq!(args.agent, AgentSelection::All);
        assert_eq!(args.agent.agent_types().len(), 3);

        let base = TrainingConfiguration::default();
        let config = args.training_config(base.clone());
        assert_eq!(config.max_episodes, base.max_episodes);
    }

    #[test]
    fn test_unknown_agent_is_rejected() {
        assert!(Cli::try_parse_from(["coach", "train", "--agent", "a3c"]).is_err());
    }

    #[test]
    fn test_rows_rank_best_first() {
        let mut idle = TrainingSession::new(AgentType::Strategy, TrainingConfiguration::default());
        idle.finish(SessionState::Interrupted, None);
        let comparison = TrainingComparison::new(
            Some(session(AgentType::Dqn, &[0.9, 0.7])),
            Some(session(AgentType::Ppo, &[0.3])),
            Some(idle),
        );

        let rows = comparison_rows(&comparison);
        let order: Vec<_> = rows.iter().map(|r| (r.rank.as_str(), r.agent.as_str())).collect();
        assert_eq!(order, vec![("1", "PPO"), ("2", "DQN"), ("-", "STRATEGY")]);
        assert_eq!(rows[1].episodes, "2/10");
        assert_eq!(rows[1].average_loss, "0.8000");
    }

    #[test]
    fn test_monitor_waits_for_every_terminal_event() {
        let done = std::sync::Arc::new(session(AgentType::Dqn, &[0.2]));
        let mut monitor = RunMonitor::new([AgentType::Dqn, AgentType::Strategy]);
        assert!(!monitor.is_finished());

        assert!(!monitor.observe(&TrainingEvent::Progress {
            agent_type: AgentType::Dqn,
            session: done.clone(),
        }));
        assert!(!monitor.observe(&TrainingEvent::Completed {
            agent_type: AgentType::Dqn,
            session: done,
        }));
        // Unwatched types do not count
        assert!(!monitor.observe(&TrainingEvent::Error {
            agent_type: AgentType::Ppo,
            message: "Training already running for PPO".into(),
        }));
        assert!(monitor.observe(&TrainingEvent::Error {
            agent_type: AgentType::Strategy,
            message: "heuristic table missing".into(),
        }));
        assert!(RunMonitor::default().is_finished());
    }

    #[test]
    fn test_console_listener_report_cadence() {
        let listener = ConsoleListener::new(5);
        assert!(!listener.should_report(&session(AgentType::Dqn, &[0.1; 3])));
        assert!(listener.should_report(&session(AgentType::Dqn, &[0.1; 5])));
        assert!(listener.should_report(&session(AgentType::Dqn, &[0.1; 10])));
    }
}
