use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::constraints::{
    ConstraintViolation, Squad, SquadMember, SquadRules, Transfer, round_money, validate,
    validate_transfer, validate_transfers,
};
use crate::error::{EngineError, Result};
use crate::player::{Position, normalize_name};
use crate::scoring::{PoolScores, ScoreFailure, ScoreResult};

const EPS: f64 = 1e-9;
/// Extra scaling applied to added downside risk before the strategy's risk weight.
const RISK_SCALE: f64 = 2.0;
/// Per kind cap on non-improving candidates kept because they free money or a club slot.
const ENABLER_LIMIT: usize = 64;
const DEADLINE_CHECK_EVERY: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    Balanced,
    Aggressive,
    Conservative,
}

impl Strategy {
    pub const ALL: [Strategy; 3] = [
        Strategy::Balanced,
        Strategy::Aggressive,
        Strategy::Conservative,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Strategy::Balanced => "balanced",
            Strategy::Aggressive => "aggressive",
            Strategy::Conservative => "conservative",
        }
    }

    pub fn profile(self) -> StrategyProfile {
        match self {
            Strategy::Balanced => StrategyProfile {
                strategy: self,
                gain_weight: 1.0,
                confidence_weight: 0.5,
                risk_weight: 1.0,
            },
            Strategy::Aggressive => StrategyProfile {
                strategy: self,
                gain_weight: 1.0,
                confidence_weight: 0.2,
                risk_weight: 0.25,
            },
            Strategy::Conservative => StrategyProfile {
                strategy: self,
                gain_weight: 1.0,
                confidence_weight: 1.0,
                risk_weight: 2.0,
            },
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.name())
    }
}

impl FromStr for Strategy {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "balanced" => Ok(Strategy::Balanced),
            "aggressive" => Ok(Strategy::Aggressive),
            "conservative" => Ok(Strategy::Conservative),
            other => Err(EngineError::UnknownStrategy(other.to_string())),
        }
    }
}

/// Weighting over (expected gain, confidence, downside risk) used to rank combinations.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StrategyProfile {
    pub strategy: Strategy,
    pub gain_weight: f64,
    pub confidence_weight: f64,
    pub risk_weight: f64,
}

impl StrategyProfile {
    /// Strategy-weighted value of a single swap.
    pub fn value(&self, gain: f64, confidence_in: f64, risk_in: f64, risk_out: f64) -> f64 {
        let shrink = 1.0 - self.confidence_weight * 0.5 * (1.0 - confidence_in.clamp(0.0, 1.0));
        let added_risk = (risk_in - risk_out).max(0.0);
        self.gain_weight * gain * shrink - self.risk_weight * added_risk * RISK_SCALE
    }
}

/// Cloneable cancellation flag shared with whoever started the search.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Clone)]
pub struct SearchLimits {
    pub max_nodes: usize,
    pub timeout: Duration,
    pub cancel: CancelToken,
}

impl Default for SearchLimits {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default())
    }
}

impl SearchLimits {
    pub fn from_config(cfg: &EngineConfig) -> Self {
        Self {
            max_nodes: cfg.max_search_nodes,
            timeout: cfg.search_timeout(),
            cancel: CancelToken::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TruncationReason {
    NodeBudget,
    Deadline,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchStats {
    pub nodes_explored: usize,
    pub candidates_considered: usize,
    pub candidates_rejected: usize,
    /// Legal swaps left out of the search because they neither gain nor free money or a club slot.
    pub candidates_discarded: usize,
    pub truncated: bool,
    pub truncation_reason: Option<TruncationReason>,
    pub elapsed_ms: u64,
}

/// One (out, in) pair with its budget effect and gain estimate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferCandidate {
    pub out: SquadMember,
    pub incoming: SquadMember,
    /// Change to the bank if this transfer is made.
    pub budget_delta: f64,
    /// Composite of the incoming player minus the outgoing one.
    pub expected_gain: f64,
    pub strategy_value: f64,
    pub confidence_in: f64,
    pub confidence_out: f64,
    pub risk_in: f64,
    pub risk_out: f64,
    pub reasoning: String,
}

impl TransferCandidate {
    pub fn transfer(&self) -> Transfer {
        Transfer {
            out_id: self.out.id,
            incoming: self.incoming.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecommendedTransfer {
    pub candidate: TransferCandidate,
    /// Points charged because this transfer is beyond the free allowance.
    pub hit_penalty: f64,
    pub net_gain: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateRejection {
    pub out_id: u32,
    pub in_id: u32,
    pub violation: ConstraintViolation,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferRecommendation {
    pub strategy: Strategy,
    pub transfers: Vec<RecommendedTransfer>,
    pub resulting_squad: Squad,
    pub formation: String,
    /// Sum of composite gains minus hit penalties.
    pub total_expected_gain: f64,
    pub gross_gain: f64,
    pub hit_penalty: f64,
    pub strategy_score: f64,
    pub confidence: f64,
    pub search: SearchStats,
    pub rejections: Vec<CandidateRejection>,
    pub excluded: Vec<ScoreFailure>,
}

impl TransferRecommendation {
    pub fn is_hold(&self) -> bool {
        self.transfers.is_empty()
    }
}

#[derive(Debug, Clone)]
struct Solution {
    picks: Vec<usize>,
    objective: f64,
    confidence: f64,
    key: Vec<(u32, u32)>,
}

impl Solution {
    /// Higher objective, then higher confidence, then fewer transfers, then lower ids.
    fn beats(&self, other: &Solution) -> bool {
        if (self.objective - other.objective).abs() > EPS {
            return self.objective > other.objective;
        }
        if (self.confidence - other.confidence).abs() > EPS {
            return self.confidence > other.confidence;
        }
        if self.picks.len() != other.picks.len() {
            return self.picks.len() < other.picks.len();
        }
        self.key < other.key
    }
}

pub struct Optimizer<'a> {
    scores: &'a PoolScores,
    rules: SquadRules,
    hit_cost: f64,
    limits: SearchLimits,
}

impl<'a> Optimizer<'a> {
    pub fn new(scores: &'a PoolScores, cfg: &EngineConfig) -> Self {
        Self {
            scores,
            rules: SquadRules::DEFAULT,
            hit_cost: cfg.hit_cost,
            limits: SearchLimits::from_config(cfg),
        }
    }

    pub fn with_rules(mut self, rules: SquadRules) -> Self {
        self.rules = rules;
        self
    }

    pub fn with_limits(mut self, limits: SearchLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Best set of at most `max_transfers` swaps from `candidate_pool`, or a hold.
    pub fn optimize(
        &self,
        squad: &Squad,
        candidate_pool: &[SquadMember],
        strategy: Strategy,
        max_transfers: usize,
        free_transfers: u32,
    ) -> Result<TransferRecommendation> {
        validate(squad, &self.rules).map_err(EngineError::InvalidSquad)?;
        let started = Instant::now();
        let profile = strategy.profile();

        let mut excluded = Vec::new();
        for p in &squad.players {
            if self.scores.get(p.id).is_none() {
                excluded.push(self.exclusion(p.id));
            }
        }
        for p in candidate_pool {
            if !squad.contains(p.id) && self.scores.get(p.id).is_none() {
                excluded.push(self.exclusion(p.id));
            }
        }
        excluded.sort_by_key(|f| f.player_id);
        excluded.dedup_by_key(|f| f.player_id);
        for f in &excluded {
            warn!(player_id = f.player_id, reason = %f.reason, "excluded from transfer search");
        }

        let arena = self.build_arena(squad, candidate_pool, &profile, max_transfers);
        let Arena {
            candidates: arena,
            rejections,
            considered,
            discarded,
        } = arena;

        let search = Search::new(
            &arena,
            squad,
            &self.rules,
            max_transfers.min(self.rules.squad_size),
            free_transfers,
            self.hit_cost,
            &self.limits,
            started,
        );
        search.run();

        let nodes = search.nodes.load(Ordering::Relaxed).min(self.limits.max_nodes);
        let reason = *search.reason.lock().expect("truncation lock poisoned");
        let best = search.best.lock().expect("best solution lock poisoned").clone();
        let stats = SearchStats {
            nodes_explored: nodes,
            candidates_considered: considered,
            candidates_rejected: rejections.len(),
            candidates_discarded: discarded,
            truncated: reason.is_some(),
            truncation_reason: reason,
            elapsed_ms: started.elapsed().as_millis() as u64,
        };
        if let Some(r) = reason {
            warn!(strategy = %strategy, ?r, nodes, "transfer search truncated");
        }

        let rec = match best {
            Some(sol) => self.recommendation(squad, &arena, &sol, strategy, free_transfers, stats, rejections, excluded)?,
            None => self.hold(squad, strategy, free_transfers, stats, rejections, excluded),
        };
        info!(
            strategy = %strategy,
            transfers = rec.transfers.len(),
            net_gain = rec.total_expected_gain,
            nodes = rec.search.nodes_explored,
            "optimizer finished"
        );
        Ok(rec)
    }

    fn exclusion(&self, id: u32) -> ScoreFailure {
        self.scores.failure(id).cloned().unwrap_or(ScoreFailure {
            player_id: id,
            reason: "no score available".to_string(),
        })
    }

    fn build_arena(
        &self,
        squad: &Squad,
        pool: &[SquadMember],
        profile: &StrategyProfile,
        max_transfers: usize,
    ) -> Arena {
        let mut improving = Vec::new();
        let mut idle = Vec::new();
        let mut rejections = Vec::new();
        let mut considered = 0usize;
        let mut seen_in = HashSet::new();
        // Clubs a kept candidate would push over the cap; selling one of theirs repairs it.
        let mut capped: HashSet<String> = HashSet::new();

        for out in &squad.players {
            let Some(out_score) = self.scores.get(out.id) else {
                continue;
            };
            for incoming in pool {
                if incoming.position != out.position
                    || incoming.id == out.id
                    || squad.contains(incoming.id)
                {
                    continue;
                }
                let Some(in_score) = self.scores.get(incoming.id) else {
                    continue;
                };
                considered += 1;
                seen_in.insert(incoming.id);

                let transfer = Transfer {
                    out_id: out.id,
                    incoming: incoming.clone(),
                };
                if let Err(violation) = validate_transfer(squad, &transfer, &self.rules) {
                    let fixable = max_transfers > 1
                        && matches!(
                            violation,
                            ConstraintViolation::NegativeBudget { .. }
                                | ConstraintViolation::TeamCap { .. }
                        );
                    if !fixable {
                        debug!(out = out.id, incoming = incoming.id, %violation, "candidate rejected");
                        rejections.push(CandidateRejection {
                            out_id: out.id,
                            in_id: incoming.id,
                            violation,
                        });
                        continue;
                    }
                    if let ConstraintViolation::TeamCap { team, .. } = &violation {
                        capped.insert(normalize_name(team));
                    }
                }

                let cand = candidate(out, incoming, out_score, in_score, profile);
                if cand.strategy_value > EPS {
                    improving.push(cand);
                } else {
                    idle.push(cand);
                }
            }
        }

        // Non-improving swaps only matter as the second half of a combination.
        let mut enablers = 0usize;
        let mut repairs = 0usize;
        let mut discarded = 0usize;
        let mut arena = improving;
        sort_candidates(&mut idle);
        for cand in idle {
            let frees_money =
                max_transfers > 1 && cand.budget_delta > EPS && enablers < ENABLER_LIMIT;
            let frees_slot = max_transfers > 1
                && capped.contains(&normalize_name(&cand.out.team))
                && repairs < ENABLER_LIMIT;
            if frees_money {
                enablers += 1;
            }
            if frees_slot {
                repairs += 1;
            }
            if frees_money || frees_slot {
                arena.push(cand);
            } else {
                discarded += 1;
            }
        }
        sort_candidates(&mut arena);
        debug!(
            arena = arena.len(),
            incoming = seen_in.len(),
            enablers,
            repairs,
            discarded,
            "candidate arena built"
        );
        Arena {
            candidates: arena,
            rejections,
            considered,
            discarded,
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn recommendation(
        &self,
        squad: &Squad,
        arena: &[TransferCandidate],
        sol: &Solution,
        strategy: Strategy,
        free_transfers: u32,
        search: SearchStats,
        rejections: Vec<CandidateRejection>,
        excluded: Vec<ScoreFailure>,
    ) -> Result<TransferRecommendation> {
        let mut picks: Vec<&TransferCandidate> = sol.picks.iter().map(|i| &arena[*i]).collect();
        // Free transfers go to the most valuable swaps.
        picks.sort_by(|a, b| {
            b.strategy_value
                .total_cmp(&a.strategy_value)
                .then(a.out.id.cmp(&b.out.id))
                .then(a.incoming.id.cmp(&b.incoming.id))
        });

        let moves: Vec<Transfer> = picks.iter().map(|c| c.transfer()).collect();
        let mut resulting = squad
            .apply(&moves, &self.rules)
            .map_err(EngineError::InvalidSquad)?;
        resulting.free_transfers = free_transfers.saturating_sub(picks.len() as u32);

        let transfers: Vec<RecommendedTransfer> = picks
            .iter()
            .enumerate()
            .map(|(i, c)| {
                let hit_penalty = if i < free_transfers as usize {
                    0.0
                } else {
                    self.hit_cost
                };
                RecommendedTransfer {
                    candidate: (*c).clone(),
                    hit_penalty,
                    net_gain: c.expected_gain - hit_penalty,
                }
            })
            .collect();
        let gross_gain: f64 = transfers.iter().map(|t| t.candidate.expected_gain).sum();
        let hit_penalty: f64 = transfers.iter().map(|t| t.hit_penalty).sum();

        Ok(TransferRecommendation {
            strategy,
            formation: resulting.formation(),
            resulting_squad: resulting,
            total_expected_gain: gross_gain - hit_penalty,
            gross_gain,
            hit_penalty,
            strategy_score: sol.objective,
            confidence: sol.confidence,
            transfers,
            search,
            rejections,
            excluded,
        })
    }

    fn hold(
        &self,
        squad: &Squad,
        strategy: Strategy,
        free_transfers: u32,
        search: SearchStats,
        rejections: Vec<CandidateRejection>,
        excluded: Vec<ScoreFailure>,
    ) -> TransferRecommendation {
        let confs: Vec<f64> = squad
            .players
            .iter()
            .filter_map(|p| self.scores.get(p.id).map(|s| s.confidence))
            .collect();
        let confidence = if confs.is_empty() {
            0.0
        } else {
            confs.iter().sum::<f64>() / confs.len() as f64
        };
        let mut resulting = squad.clone();
        resulting.free_transfers = free_transfers;
        TransferRecommendation {
            strategy,
            transfers: Vec::new(),
            formation: resulting.formation(),
            resulting_squad: resulting,
            total_expected_gain: 0.0,
            gross_gain: 0.0,
            hit_penalty: 0.0,
            strategy_score: 0.0,
            confidence,
            search,
            rejections,
            excluded,
        }
    }
}

fn candidate(
    out: &SquadMember,
    incoming: &SquadMember,
    out_score: &ScoreResult,
    in_score: &ScoreResult,
    profile: &StrategyProfile,
) -> TransferCandidate {
    let gain = in_score.composite - out_score.composite;
    let value = profile.value(
        gain,
        in_score.confidence,
        in_score.downside_risk,
        out_score.downside_risk,
    );
    let budget_delta = round_money(out.price - incoming.price);
    TransferCandidate {
        out: out.clone(),
        incoming: incoming.clone(),
        budget_delta,
        expected_gain: gain,
        strategy_value: value,
        confidence_in: in_score.confidence,
        confidence_out: out_score.confidence,
        risk_in: in_score.downside_risk,
        risk_out: out_score.downside_risk,
        reasoning: reasoning(out, incoming, gain, budget_delta),
    }
}

fn reasoning(out: &SquadMember, incoming: &SquadMember, gain: f64, budget_delta: f64) -> String {
    let band = if gain >= 3.0 {
        "major upgrade"
    } else if gain >= 1.5 {
        "solid upgrade"
    } else if gain > 0.0 {
        "marginal upgrade"
    } else {
        "budget move"
    };
    let money = if budget_delta >= 0.0 {
        format!("frees {budget_delta:.1}m")
    } else {
        format!("costs {:.1}m", -budget_delta)
    };
    format!(
        "{band} at {}: {} for {} ({gain:+.2}, {money})",
        position_word(incoming.position),
        incoming.name,
        out.name
    )
}

fn position_word(p: Position) -> &'static str {
    match p {
        Position::Goalkeeper => "goalkeeper",
        Position::Defender => "defence",
        Position::Midfielder => "midfield",
        Position::Forward => "forward",
    }
}

fn sort_candidates(cands: &mut [TransferCandidate]) {
    cands.sort_by(|a, b| {
        b.strategy_value
            .total_cmp(&a.strategy_value)
            .then(a.out.id.cmp(&b.out.id))
            .then(a.incoming.id.cmp(&b.incoming.id))
    });
}

struct Arena {
    candidates: Vec<TransferCandidate>,
    rejections: Vec<CandidateRejection>,
    considered: usize,
    discarded: usize,
}

/// Mutable per-branch search state. Undone on backtrack.
struct Frontier {
    picks: Vec<usize>,
    bank: f64,
    team_counts: Vec<i32>,
    value: f64,
    confidence: f64,
}

/// Candidate arena indexed by position in `arena`, plus state shared across workers.
struct Search<'s> {
    arena: &'s [TransferCandidate],
    squad: &'s Squad,
    rules: &'s SquadRules,
    max_transfers: usize,
    free_transfers: usize,
    hit_cost: f64,
    limits: &'s SearchLimits,
    deadline: Instant,
    /// Sum of positive strategy values over `arena[..i]`.
    positive_prefix: Vec<f64>,
    max_budget_delta: f64,
    out_team: Vec<usize>,
    in_team: Vec<usize>,
    base_team_counts: Vec<i32>,
    best_bits: AtomicU64,
    best: Mutex<Option<Solution>>,
    nodes: AtomicUsize,
    stop: AtomicBool,
    reason: Mutex<Option<TruncationReason>>,
}

impl<'s> Search<'s> {
    #[allow(clippy::too_many_arguments)]
    fn new(
        arena: &'s [TransferCandidate],
        squad: &'s Squad,
        rules: &'s SquadRules,
        max_transfers: usize,
        free_transfers: u32,
        hit_cost: f64,
        limits: &'s SearchLimits,
        started: Instant,
    ) -> Self {
        let mut positive_prefix = Vec::with_capacity(arena.len() + 1);
        positive_prefix.push(0.0);
        for c in arena {
            let last = positive_prefix.last().copied().unwrap_or(0.0);
            positive_prefix.push(last + c.strategy_value.max(0.0));
        }
        let max_budget_delta = arena
            .iter()
            .map(|c| c.budget_delta)
            .fold(0.0_f64, f64::max);

        let mut team_ids: HashMap<String, usize> = HashMap::new();
        let mut team_of = |name: &str| {
            let next = team_ids.len();
            *team_ids.entry(normalize_name(name)).or_insert(next)
        };
        let squad_teams: Vec<usize> = squad.players.iter().map(|p| team_of(&p.team)).collect();
        let out_team: Vec<usize> = arena.iter().map(|c| team_of(&c.out.team)).collect();
        let in_team: Vec<usize> = arena.iter().map(|c| team_of(&c.incoming.team)).collect();
        let mut base_team_counts = vec![0i32; team_ids.len()];
        for t in squad_teams {
            base_team_counts[t] += 1;
        }

        Self {
            arena,
            squad,
            rules,
            max_transfers,
            free_transfers: free_transfers as usize,
            hit_cost,
            limits,
            deadline: started + limits.timeout,
            positive_prefix,
            max_budget_delta,
            out_team,
            in_team,
            base_team_counts,
            best_bits: AtomicU64::new(0.0_f64.to_bits()),
            best: Mutex::new(None),
            nodes: AtomicUsize::new(0),
            stop: AtomicBool::new(false),
            reason: Mutex::new(None),
        }
    }

    fn run(&self) {
        if self.max_transfers == 0 || self.arena.is_empty() {
            return;
        }
        (0..self.arena.len()).into_par_iter().for_each(|first| {
            if self.stopped() || self.upper_bound(0, 0.0, first) < self.best_bound() - EPS {
                return;
            }
            let mut state = Frontier {
                picks: Vec::with_capacity(self.max_transfers),
                bank: self.squad.bank,
                team_counts: self.base_team_counts.clone(),
                value: 0.0,
                confidence: 0.0,
            };
            self.push(&mut state, first);
            if self.feasible(&state, self.max_transfers - 1) {
                self.explore(&mut state, first + 1);
            }
        });
    }

    fn explore(&self, state: &mut Frontier, next: usize) {
        if !self.tick() {
            return;
        }
        self.consider(state);
        let depth = state.picks.len();
        if depth >= self.max_transfers {
            return;
        }
        for j in next..self.arena.len() {
            if self.stopped() {
                return;
            }
            // Values are sorted, so later branches can only be worse.
            if self.upper_bound(depth, state.value, j) < self.best_bound() - EPS {
                break;
            }
            if self.conflicts(state, j) {
                continue;
            }
            self.push(state, j);
            if self.feasible(state, self.max_transfers - depth - 1) {
                self.explore(state, j + 1);
            }
            self.pop(state, j);
        }
    }

    fn penalty(&self, transfers: usize) -> f64 {
        transfers.saturating_sub(self.free_transfers) as f64 * self.hit_cost
    }

    /// Best objective reachable by adding `arena[j]` and up to the remaining slots after it.
    fn upper_bound(&self, depth: usize, value: f64, j: usize) -> f64 {
        let base = value + self.arena[j].strategy_value;
        let remaining = self.max_transfers.saturating_sub(depth + 1);
        let n = self.arena.len();
        let mut best = f64::NEG_INFINITY;
        for m in 0..=remaining {
            let end = (j + 1 + m).min(n);
            let extra = self.positive_prefix[end] - self.positive_prefix[j + 1];
            best = best.max(base + extra - self.penalty(depth + 1 + m));
        }
        best
    }

    fn conflicts(&self, state: &Frontier, j: usize) -> bool {
        let c = &self.arena[j];
        state.picks.iter().any(|i| {
            let o = &self.arena[*i];
            o.out.id == c.out.id || o.incoming.id == c.incoming.id
        })
    }

    fn push(&self, state: &mut Frontier, j: usize) {
        let c = &self.arena[j];
        state.picks.push(j);
        state.bank += c.budget_delta;
        state.team_counts[self.out_team[j]] -= 1;
        state.team_counts[self.in_team[j]] += 1;
        state.value += c.strategy_value;
        state.confidence += c.confidence_in + c.confidence_out;
    }

    fn pop(&self, state: &mut Frontier, j: usize) {
        let c = &self.arena[j];
        state.picks.pop();
        state.bank -= c.budget_delta;
        state.team_counts[self.out_team[j]] += 1;
        state.team_counts[self.in_team[j]] -= 1;
        state.value -= c.strategy_value;
        state.confidence -= c.confidence_in + c.confidence_out;
    }

    fn team_excess(&self, state: &Frontier) -> usize {
        let cap = self.rules.max_per_team as i32;
        state
            .team_counts
            .iter()
            .map(|n| (n - cap).max(0) as usize)
            .sum()
    }

    /// Whether `remaining` more transfers could still repair budget and team caps.
    fn feasible(&self, state: &Frontier, remaining: usize) -> bool {
        state.bank + remaining as f64 * self.max_budget_delta >= -EPS
            && self.team_excess(state) <= remaining
    }

    fn consider(&self, state: &Frontier) {
        let k = state.picks.len();
        if k == 0 || state.bank < -EPS || self.team_excess(state) > 0 {
            return;
        }
        let objective = state.value - self.penalty(k);
        if objective <= EPS || objective < self.best_bound() - EPS {
            return;
        }
        let moves: Vec<Transfer> = state.picks.iter().map(|i| self.arena[*i].transfer()).collect();
        if let Err(violation) = validate_transfers(self.squad, &moves, self.rules) {
            debug!(%violation, "combination rejected");
            return;
        }

        let mut picks = state.picks.clone();
        picks.sort_unstable();
        let mut key: Vec<(u32, u32)> = picks
            .iter()
            .map(|i| (self.arena[*i].out.id, self.arena[*i].incoming.id))
            .collect();
        key.sort_unstable();
        let sol = Solution {
            picks,
            objective,
            confidence: state.confidence / (2 * k) as f64,
            key,
        };

        let mut best = self.best.lock().expect("best solution lock poisoned");
        let better = match best.as_ref() {
            Some(cur) => sol.beats(cur),
            None => true,
        };
        if better {
            self.raise_bound(sol.objective);
            *best = Some(sol);
        }
    }

    fn best_bound(&self) -> f64 {
        f64::from_bits(self.best_bits.load(Ordering::Acquire))
    }

    fn raise_bound(&self, objective: f64) {
        let mut cur = self.best_bits.load(Ordering::Acquire);
        loop {
            if objective <= f64::from_bits(cur) {
                return;
            }
            match self.best_bits.compare_exchange_weak(
                cur,
                objective.to_bits(),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return,
                Err(actual) => cur = actual,
            }
        }
    }

    fn stopped(&self) -> bool {
        self.stop.load(Ordering::Relaxed)
    }

    fn truncate(&self, reason: TruncationReason) {
        let mut slot = self.reason.lock().expect("truncation lock poisoned");
        if slot.is_none() {
            *slot = Some(reason);
        }
        self.stop.store(true, Ordering::Relaxed);
    }

    /// Count a node and check limits. Returns false once the search must stop.
    fn tick(&self) -> bool {
        if self.stopped() {
            return false;
        }
        if self.limits.cancel.is_cancelled() {
            self.truncate(TruncationReason::Cancelled);
            return false;
        }
        let n = self.nodes.fetch_add(1, Ordering::Relaxed) + 1;
        if n > self.limits.max_nodes {
            self.truncate(TruncationReason::NodeBudget);
            return false;
        }
        if n % DEADLINE_CHECK_EVERY == 0 && Instant::now() >= self.deadline {
            self.truncate(TruncationReason::Deadline);
            return false;
        }
        true
    }
}
