//! Cross-agent performance comparison
//!
//! Pure functions over the latest session of each agent type. Nothing here is
//! cached; callers rebuild a comparison whenever they need a fresh view.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::cmp::Ordering;

use super::session::TrainingSession;
use super::types::AgentType;

/// Point-in-time view of the latest session per agent type
#[derive(Debug, Clone, Serialize)]
pub struct TrainingComparison {
    pub dqn: Option<TrainingSession>,
    pub ppo: Option<TrainingSession>,
    pub strategy: Option<TrainingSession>,
    pub generated_at: DateTime<Utc>,
}

impl TrainingComparison {
    pub fn new(
        dqn: Option<TrainingSession>,
        ppo: Option<TrainingSession>,
        strategy: Option<TrainingSession>,
    ) -> Self {
        Self {
            dqn,
            ppo,
            strategy,
            generated_at: Utc::now(),
        }
    }

    /// Build from `(agent_type, latest session)` pairs
    pub fn from_sessions<I>(sessions: I) -> Self
    where
        I: IntoIterator<Item = (AgentType, Option<TrainingSession>)>,
    {
        let mut comparison = Self::new(None, None, None);
        for (agent_type, session) in sessions {
            match agent_type {
                AgentType::Dqn => comparison.dqn = session,
                AgentType::Ppo => comparison.ppo = session,
                AgentType::Strategy => comparison.strategy = session,
            }
        }
        comparison
    }

    pub fn get(&self, agent_type: AgentType) -> Option<&TrainingSession> {
        match agent_type {
            AgentType::Dqn => self.dqn.as_ref(),
            AgentType::Ppo => self.ppo.as_ref(),
            AgentType::Strategy => self.strategy.as_ref(),
        }
    }

    /// Sessions present in this snapshot, in agent-type order
    pub fn sessions(&self) -> impl Iterator<Item = &TrainingSession> {
        AgentType::ALL.into_iter().filter_map(move |t| self.get(t))
    }

    /// Session with the lowest average loss among those that finished at
    /// least one episode. Equal losses prefer the session with more episodes.
    pub fn best_performing(&self) -> Option<&TrainingSession> {
        self.ranking().into_iter().next()
    }

    /// Eligible sessions ordered best first
    pub fn ranking(&self) -> Vec<&TrainingSession> {
        let mut eligible: Vec<&TrainingSession> = self
            .sessions()
            .filter(|s| s.episodes_completed > 0)
            .collect();
        eligible.sort_by(|a, b| compare_performance(a, b));
        eligible
    }
}

/// Ordering used for ranking: lower loss first, then more episodes first
pub fn compare_performance(a: &TrainingSession, b: &TrainingSession) -> Ordering {
    a.average_loss
        .total_cmp(&b.average_loss)
        .then_with(|| b.episodes_completed.cmp(&a.episodes_completed))
}
