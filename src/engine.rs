use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::backtest::{BacktestInput, BacktestReport, BacktestRunner};
use crate::cache::ScoreCache;
use crate::config::{EngineConfig, with_worker_pool};
use crate::constraints::{Squad, SquadMember, SquadRules, round_money};
use crate::error::{EngineError, Result};
use crate::features::Normalizer;
use crate::optimizer::{CancelToken, Optimizer, SearchLimits, Strategy, TransferRecommendation};
use crate::player::SnapshotBatch;
use crate::scoring::{PoolScores, ScoreExplanation, ScoreWeights, Scorer, score_pool_cached};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecommendationRequest {
    pub squad: Squad,
    /// Eligible incoming player ids; `None` means every snapshot player outside the squad.
    #[serde(default)]
    pub candidate_pool: Option<Vec<u32>>,
    #[serde(default = "default_strategy")]
    pub strategy: String,
    #[serde(default = "default_max_transfers")]
    pub max_transfers: usize,
    /// Overrides `squad.free_transfers` when present.
    #[serde(default)]
    pub free_transfers: Option<u32>,
    #[serde(default)]
    pub budget_override: Option<f64>,
}

fn default_strategy() -> String {
    Strategy::Balanced.name().to_string()
}

fn default_max_transfers() -> usize {
    1
}

/// Scoring, optimization and backtesting behind one configured handle.
pub struct Engine {
    cfg: EngineConfig,
    normalizer: Normalizer,
    scorer: Scorer,
    rules: SquadRules,
    cache: ScoreCache,
}

impl Engine {
    pub fn new(cfg: EngineConfig) -> Self {
        Self::with_weights(cfg, ScoreWeights::DEFAULT)
    }

    pub fn with_weights(cfg: EngineConfig, weights: ScoreWeights) -> Self {
        Self {
            normalizer: Normalizer::from_config(&cfg),
            scorer: Scorer::new(weights),
            rules: SquadRules::DEFAULT,
            cache: ScoreCache::new(cfg.score_cache_ttl()),
            cfg,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.cfg
    }

    pub fn cache(&self) -> &ScoreCache {
        &self.cache
    }

    pub fn score_batch(&self, batch: &SnapshotBatch) -> PoolScores {
        with_worker_pool(self.cfg.workers, || {
            score_pool_cached(batch, &self.normalizer, &self.scorer, Some(&self.cache))
        })
    }

    pub fn explain(&self, batch: &SnapshotBatch, player_id: u32) -> Result<ScoreExplanation> {
        if batch.player(player_id).is_none() {
            return Err(EngineError::UnknownPlayer(player_id));
        }
        let scores = self.score_batch(batch);
        if let Some(s) = scores.get(player_id) {
            return Ok(s.explain());
        }
        let reason = scores
            .failure(player_id)
            .map(|f| f.reason.clone())
            .unwrap_or_else(|| "not scored".to_string());
        Err(EngineError::insufficient_data(player_id, reason))
    }

    pub fn recommend(
        &self,
        batch: &SnapshotBatch,
        req: &RecommendationRequest,
        cancel: Option<CancelToken>,
    ) -> Result<TransferRecommendation> {
        let strategy: Strategy = req.strategy.parse()?;
        let mut squad = req.squad.clone();
        if let Some(bank) = req.budget_override {
            squad.bank = round_money(bank);
        }
        let free = req.free_transfers.unwrap_or(squad.free_transfers);

        let wanted: Option<HashSet<u32>> = req
            .candidate_pool
            .as_ref()
            .map(|ids| ids.iter().copied().collect());
        let pool: Vec<SquadMember> = batch
            .players
            .iter()
            .filter(|p| !squad.contains(p.id))
            .filter(|p| wanted.as_ref().is_none_or(|w| w.contains(&p.id)))
            .map(SquadMember::from_snapshot)
            .collect();

        let scores = self.score_batch(batch);
        let mut limits = SearchLimits::from_config(&self.cfg);
        if let Some(token) = cancel {
            limits.cancel = token;
        }
        info!(
            strategy = %strategy,
            pool = pool.len(),
            max_transfers = req.max_transfers,
            free_transfers = free,
            "recommendation requested"
        );
        with_worker_pool(self.cfg.workers, || {
            Optimizer::new(&scores, &self.cfg)
                .with_rules(self.rules)
                .with_limits(limits)
                .optimize(&squad, &pool, strategy, req.max_transfers, free)
        })
    }

    pub fn backtest(&self, input: &BacktestInput) -> Result<BacktestReport> {
        let runner = BacktestRunner::new(self.cfg.clone(), self.scorer);
        with_worker_pool(self.cfg.workers, || {
            runner.run(input.range, &input.gameweeks, &input.outcomes, &input.strategies)
        })
    }
}
