use std::collections::{BTreeMap, HashMap};

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::calibration::{self, CalibrationBin, Metrics, Observation};
use crate::config::EngineConfig;
use crate::constraints::{Squad, SquadMember};
use crate::error::{EngineError, Result};
use crate::features::Normalizer;
use crate::optimizer::{Optimizer, SearchLimits, Strategy};
use crate::player::SnapshotBatch;
use crate::scoring::{Scorer, score_pool};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameweekRange {
    pub start: u32,
    pub end: u32,
}

/// Ten seasons of gameweeks.
pub const MAX_RANGE_GAMEWEEKS: u32 = 380;

impl GameweekRange {
    pub fn contains(&self, gw: u32) -> bool {
        gw >= self.start && gw <= self.end
    }

    pub fn validate(&self) -> Result<()> {
        if self.start > self.end {
            return Err(EngineError::InvalidRange(format!(
                "start {} is after end {}",
                self.start, self.end
            )));
        }
        let span = u64::from(self.end) - u64::from(self.start) + 1;
        if span > u64::from(MAX_RANGE_GAMEWEEKS) {
            return Err(EngineError::InvalidRange(format!(
                "{span} gameweeks requested, at most {MAX_RANGE_GAMEWEEKS} allowed"
            )));
        }
        Ok(())
    }
}

/// Pre-gameweek state: the snapshot available before kickoff and, optionally, the squad held then.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoricalGameweek {
    pub gameweek: u32,
    pub snapshot: SnapshotBatch,
    #[serde(default)]
    pub squad: Option<Squad>,
}

/// Realized points per gameweek, keyed by player id.
pub type Outcomes = BTreeMap<u32, BTreeMap<u32, f64>>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestInput {
    pub range: GameweekRange,
    pub gameweeks: Vec<HistoricalGameweek>,
    pub outcomes: Outcomes,
    #[serde(default = "default_strategies")]
    pub strategies: Vec<Strategy>,
}

fn default_strategies() -> Vec<Strategy> {
    Strategy::ALL.to_vec()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyGameweek {
    pub strategy: Strategy,
    pub transfers: usize,
    pub hits: usize,
    pub predicted_gain: f64,
    /// Realized points of incoming minus outgoing players, less hit costs.
    pub realized_gain: f64,
    pub truncated: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameweekResult {
    pub gameweek: u32,
    pub players_scored: usize,
    pub players_unscored: usize,
    pub metrics: Metrics,
    pub calibration: Vec<CalibrationBin>,
    pub strategies: Vec<StrategyGameweek>,
    pub strategy_errors: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkippedGameweek {
    pub gameweek: u32,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyComparison {
    pub rank: usize,
    pub strategy: Strategy,
    pub gameweeks: usize,
    pub transfers: usize,
    pub hits: usize,
    pub predicted_gain: f64,
    pub realized_gain: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestSummary {
    pub gameweeks_evaluated: usize,
    pub gameweeks_skipped: usize,
    pub samples: usize,
    pub mean_pearson: Option<f64>,
    pub mean_spearman: Option<f64>,
    pub mean_precision_at_k: Option<f64>,
    pub calibration_error: Option<f64>,
    pub calibration: Vec<CalibrationBin>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestReport {
    pub generated_at: String,
    pub range: GameweekRange,
    pub precision_k: usize,
    pub summary: BacktestSummary,
    pub gameweeks: Vec<GameweekResult>,
    pub skipped: Vec<SkippedGameweek>,
    pub strategies: Vec<StrategyComparison>,
}

pub struct BacktestRunner {
    cfg: EngineConfig,
    normalizer: Normalizer,
    scorer: Scorer,
}

enum GameweekRun {
    /// Result plus (confidence, hit) per observation; hits are judged within the gameweek.
    Done(GameweekResult, Vec<(f64, bool)>),
    Skipped(SkippedGameweek),
}

impl BacktestRunner {
    pub fn new(cfg: EngineConfig, scorer: Scorer) -> Self {
        Self {
            normalizer: Normalizer::from_config(&cfg),
            cfg,
            scorer,
        }
    }

    /// Replays each gameweek of `range` independently. Missing data skips that gameweek only.
    pub fn run(
        &self,
        range: GameweekRange,
        snapshots: &[HistoricalGameweek],
        outcomes: &Outcomes,
        strategies: &[Strategy],
    ) -> Result<BacktestReport> {
        range.validate()?;
        let mut by_gw: BTreeMap<u32, Vec<&HistoricalGameweek>> = BTreeMap::new();
        for h in snapshots.iter().filter(|h| range.contains(h.gameweek)) {
            by_gw.entry(h.gameweek).or_default().push(h);
        }
        let wanted: Vec<u32> = (range.start..=range.end).collect();

        let mut strategies = strategies.to_vec();
        strategies.sort_by_key(|s| s.name());
        strategies.dedup();

        let runs: Vec<GameweekRun> = wanted
            .par_iter()
            .map(|gw| {
                let skip = |reason: &str| {
                    GameweekRun::Skipped(SkippedGameweek {
                        gameweek: *gw,
                        reason: reason.to_string(),
                    })
                };
                let hist = match by_gw.get(gw).map(Vec::as_slice) {
                    None | Some([]) => return skip("no historical snapshot"),
                    Some([one]) => *one,
                    Some(_) => return skip("more than one snapshot for gameweek"),
                };
                let Some(actual) = outcomes.get(gw) else {
                    return skip("no realized outcomes");
                };
                self.run_gameweek(hist, actual, &strategies)
            })
            .collect();

        let mut gameweeks = Vec::new();
        let mut skipped = Vec::new();
        let mut pooled = Vec::new();
        for run in runs {
            match run {
                GameweekRun::Done(res, judged) => {
                    pooled.push((res.gameweek, judged));
                    gameweeks.push(res);
                }
                GameweekRun::Skipped(s) => {
                    warn!(gameweek = s.gameweek, reason = %s.reason, "gameweek skipped");
                    skipped.push(s);
                }
            }
        }
        gameweeks.sort_by_key(|g| g.gameweek);
        skipped.sort_by_key(|s| s.gameweek);
        pooled.sort_by_key(|(gw, _)| *gw);
        let judged: Vec<(f64, bool)> = pooled.into_iter().flat_map(|(_, rows)| rows).collect();

        let summary = self.summarize(&gameweeks, skipped.len(), &judged);
        let strategy_table = compare_strategies(&gameweeks, &strategies);
        info!(
            evaluated = summary.gameweeks_evaluated,
            skipped = summary.gameweeks_skipped,
            mean_spearman = ?summary.mean_spearman,
            "backtest finished"
        );

        Ok(BacktestReport {
            generated_at: chrono::Utc::now().to_rfc3339(),
            range,
            precision_k: self.cfg.precision_k,
            summary,
            gameweeks,
            skipped,
            strategies: strategy_table,
        })
    }

    fn run_gameweek(
        &self,
        hist: &HistoricalGameweek,
        actual: &BTreeMap<u32, f64>,
        strategies: &[Strategy],
    ) -> GameweekRun {
        let scores = score_pool(&hist.snapshot, &self.normalizer, &self.scorer);
        let mut observations: Vec<Observation> = scores
            .scores
            .values()
            .filter_map(|s| {
                actual.get(&s.player_id).map(|pts| Observation {
                    player_id: s.player_id,
                    predicted: s.composite,
                    confidence: s.confidence,
                    actual: *pts,
                })
            })
            .collect();
        observations.sort_by_key(|o| o.player_id);
        if observations.len() < 2 {
            return GameweekRun::Skipped(SkippedGameweek {
                gameweek: hist.gameweek,
                reason: "fewer than two scored players with outcomes".to_string(),
            });
        }
        let (metrics, cal) =
            calibration::evaluate(&observations, self.cfg.precision_k, self.cfg.calibration_bins);
        let judged: Vec<(f64, bool)> = observations
            .iter()
            .map(|o| o.confidence)
            .zip(calibration::percentile_hits(&observations))
            .collect();

        let mut results = Vec::new();
        let mut errors = Vec::new();
        if let Some(squad) = &hist.squad {
            let pool: Vec<SquadMember> = hist
                .snapshot
                .players
                .iter()
                .filter(|p| !squad.contains(p.id))
                .map(SquadMember::from_snapshot)
                .collect();
            let optimizer = Optimizer::new(&scores, &self.cfg)
                .with_limits(SearchLimits::from_config(&self.cfg));
            for strategy in strategies {
                match optimizer.optimize(
                    squad,
                    &pool,
                    *strategy,
                    self.cfg.backtest_max_transfers,
                    squad.free_transfers,
                ) {
                    Ok(rec) => {
                        let points = |id: u32| actual.get(&id).copied().unwrap_or(0.0);
                        let realized: f64 = rec
                            .transfers
                            .iter()
                            .map(|t| points(t.candidate.incoming.id) - points(t.candidate.out.id))
                            .sum::<f64>()
                            - rec.hit_penalty;
                        results.push(StrategyGameweek {
                            strategy: *strategy,
                            transfers: rec.transfers.len(),
                            hits: rec.transfers.iter().filter(|t| t.hit_penalty > 0.0).count(),
                            predicted_gain: rec.total_expected_gain,
                            realized_gain: realized,
                            truncated: rec.search.truncated,
                        });
                    }
                    Err(err) => {
                        warn!(gameweek = hist.gameweek, strategy = %strategy, error = %err, "strategy run failed");
                        errors.push(format!("{strategy}: {err}"));
                    }
                }
            }
        }

        GameweekRun::Done(
            GameweekResult {
                gameweek: hist.gameweek,
                players_scored: scores.scores.len(),
                players_unscored: scores.failures.len(),
                metrics,
                calibration: cal,
                strategies: results,
                strategy_errors: errors,
            },
            judged,
        )
    }

    fn summarize(
        &self,
        gameweeks: &[GameweekResult],
        skipped: usize,
        judged: &[(f64, bool)],
    ) -> BacktestSummary {
        let mean = |f: fn(&Metrics) -> Option<f64>| {
            let vals: Vec<f64> = gameweeks.iter().filter_map(|g| f(&g.metrics)).collect();
            if vals.is_empty() {
                None
            } else {
                Some(vals.iter().sum::<f64>() / vals.len() as f64)
            }
        };
        let confidences: Vec<f64> = judged.iter().map(|(c, _)| *c).collect();
        let hits: Vec<bool> = judged.iter().map(|(_, h)| *h).collect();
        let cal = calibration::calibration_bins(&confidences, &hits, self.cfg.calibration_bins);

        BacktestSummary {
            gameweeks_evaluated: gameweeks.len(),
            gameweeks_skipped: skipped,
            samples: judged.len(),
            mean_pearson: mean(|m| m.pearson),
            mean_spearman: mean(|m| m.spearman),
            mean_precision_at_k: mean(|m| m.precision_at_k),
            calibration_error: calibration::expected_calibration_error(&cal),
            calibration: cal,
        }
    }
}

fn compare_strategies(gameweeks: &[GameweekResult], strategies: &[Strategy]) -> Vec<StrategyComparison> {
    let mut totals: HashMap<Strategy, StrategyComparison> = HashMap::new();
    for g in gameweeks {
        for s in &g.strategies {
            let row = totals.entry(s.strategy).or_insert(StrategyComparison {
                rank: 0,
                strategy: s.strategy,
                gameweeks: 0,
                transfers: 0,
                hits: 0,
                predicted_gain: 0.0,
                realized_gain: 0.0,
            });
            row.gameweeks += 1;
            row.transfers += s.transfers;
            row.hits += s.hits;
            row.predicted_gain += s.predicted_gain;
            row.realized_gain += s.realized_gain;
        }
    }
    let mut rows: Vec<StrategyComparison> = strategies
        .iter()
        .filter_map(|s| totals.remove(s))
        .collect();
    rows.sort_by(|a, b| {
        b.realized_gain
            .total_cmp(&a.realized_gain)
            .then(a.strategy.name().cmp(b.strategy.name()))
    });
    for (i, row) in rows.iter_mut().enumerate() {
        row.rank = i + 1;
    }
    rows
}
