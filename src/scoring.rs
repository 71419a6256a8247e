use std::collections::HashMap;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::cache::{ScoreCache, score_key};
use crate::error::{EngineError, Result};
use crate::features::{
    Feature, FeatureGroup, FeatureVector, Normalizer, PeerDistribution, ReliabilityFlags,
};
use crate::player::{Availability, FixtureContext, Position, SnapshotBatch, normalize_name};

pub const SCORE_MAX: f64 = 10.0;
/// Sub-score used when a group has no feature at all.
const NEUTRAL_SUB_SCORE: f64 = 5.0;
const NEUTRAL_STABILITY: f64 = 0.5;
const WEIGHT_SUM_TOL: f64 = 1e-9;

/// Composite weights. `DEFAULT` is the fixed production profile; alternates are
/// built through `custom` and passed explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawWeights")]
pub struct ScoreWeights {
    quality: f64,
    form: f64,
    momentum: f64,
    fixture: f64,
    value: f64,
}

#[derive(Deserialize)]
struct RawWeights {
    quality: f64,
    form: f64,
    momentum: f64,
    fixture: f64,
    value: f64,
}

impl TryFrom<RawWeights> for ScoreWeights {
    type Error = EngineError;

    fn try_from(raw: RawWeights) -> Result<Self> {
        Self::custom(raw.quality, raw.form, raw.momentum, raw.fixture, raw.value)
    }
}

impl ScoreWeights {
    pub const DEFAULT: ScoreWeights = ScoreWeights {
        quality: 0.35,
        form: 0.25,
        momentum: 0.15,
        fixture: 0.15,
        value: 0.10,
    };

    pub fn custom(quality: f64, form: f64, momentum: f64, fixture: f64, value: f64) -> Result<Self> {
        let w = Self {
            quality,
            form,
            momentum,
            fixture,
            value,
        };
        let arr = w.as_array();
        if arr.iter().any(|v| !v.is_finite() || *v < 0.0) {
            return Err(EngineError::invalid_weights("weights must be finite and non-negative"));
        }
        let sum: f64 = arr.iter().sum();
        if (sum - 1.0).abs() > WEIGHT_SUM_TOL {
            return Err(EngineError::invalid_weights(format!(
                "weights sum to {sum:.6}, expected 1"
            )));
        }
        Ok(w)
    }

    pub fn as_array(&self) -> [f64; 5] {
        [self.quality, self.form, self.momentum, self.fixture, self.value]
    }

    pub fn weight(&self, group: FeatureGroup) -> f64 {
        match group {
            FeatureGroup::Quality => self.quality,
            FeatureGroup::Form => self.form,
            FeatureGroup::Momentum => self.momentum,
            FeatureGroup::Fixture => self.fixture,
            FeatureGroup::Value => self.value,
        }
    }
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self::DEFAULT
    }
}

pub const COMPONENTS: [FeatureGroup; 5] = [
    FeatureGroup::Quality,
    FeatureGroup::Form,
    FeatureGroup::Momentum,
    FeatureGroup::Fixture,
    FeatureGroup::Value,
];

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SubScores {
    pub quality: f64,
    pub form: f64,
    pub momentum: f64,
    pub fixture: f64,
    pub value: f64,
}

impl SubScores {
    pub fn get(&self, group: FeatureGroup) -> f64 {
        match group {
            FeatureGroup::Quality => self.quality,
            FeatureGroup::Form => self.form,
            FeatureGroup::Momentum => self.momentum,
            FeatureGroup::Fixture => self.fixture,
            FeatureGroup::Value => self.value,
        }
    }

    pub fn weighted_sum(&self, weights: &ScoreWeights) -> f64 {
        COMPONENTS
            .iter()
            .map(|g| weights.weight(*g) * self.get(*g))
            .sum()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceBreakdown {
    pub completeness: f64,
    pub stability: f64,
    pub minutes_reliability: f64,
    pub observed: usize,
    pub imputed: usize,
    pub missing: usize,
    pub expected: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreResult {
    pub player_id: u32,
    pub data_version: u64,
    pub position: Position,
    pub sub_scores: SubScores,
    pub weights: ScoreWeights,
    /// Always `sub_scores.weighted_sum(&weights)`.
    pub composite: f64,
    pub confidence: f64,
    pub confidence_breakdown: ConfidenceBreakdown,
    pub imputed_fields: Vec<Feature>,
    pub missing_fields: Vec<Feature>,
    pub low_minutes: bool,
    /// Chance of a blank from absence or volatility, in [0,1]. Not part of the composite.
    pub downside_risk: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentContribution {
    pub component: FeatureGroup,
    pub sub_score: f64,
    pub weight: f64,
    pub contribution: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreExplanation {
    pub player_id: u32,
    pub composite: f64,
    pub confidence: f64,
    pub components: Vec<ComponentContribution>,
    pub confidence_breakdown: ConfidenceBreakdown,
    pub imputed_fields: Vec<Feature>,
    pub missing_fields: Vec<Feature>,
    pub low_minutes: bool,
    pub downside_risk: f64,
}

impl ScoreResult {
    pub fn explain(&self) -> ScoreExplanation {
        let components = COMPONENTS
            .iter()
            .map(|g| {
                let sub_score = self.sub_scores.get(*g);
                let weight = self.weights.weight(*g);
                ComponentContribution {
                    component: *g,
                    sub_score,
                    weight,
                    contribution: sub_score * weight,
                }
            })
            .collect();
        ScoreExplanation {
            player_id: self.player_id,
            composite: self.composite,
            confidence: self.confidence,
            components,
            confidence_breakdown: self.confidence_breakdown,
            imputed_fields: self.imputed_fields.clone(),
            missing_fields: self.missing_fields.clone(),
            low_minutes: self.low_minutes,
            downside_risk: self.downside_risk,
        }
    }
}

/// Weight of each feature inside its group. Quality follows a per-position recipe.
fn feature_weight(position: Position, feature: Feature) -> f64 {
    use Feature::*;
    match feature.group() {
        FeatureGroup::Quality => match (position, feature) {
            (Position::Goalkeeper, SavesPer90) => 0.4,
            (Position::Goalkeeper, CleanSheetsPer90) => 0.3,
            (Position::Goalkeeper, ExpectedConcededPer90) => 0.2,
            (Position::Goalkeeper, BonusPer90) => 0.1,

            (Position::Defender, CleanSheetsPer90) => 0.4,
            (Position::Defender, GoalsPer90 | AssistsPer90) => 0.1,
            (Position::Defender, ExpectedGoalsPer90 | ExpectedAssistsPer90) => 0.05,
            (Position::Defender, ExpectedConcededPer90) => 0.2,
            (Position::Defender, BonusPer90) => 0.1,

            (Position::Midfielder, ExpectedGoalsPer90 | GoalsPer90) => 0.15,
            (Position::Midfielder, ExpectedAssistsPer90 | AssistsPer90) => 0.15,
            (Position::Midfielder, CleanSheetsPer90) => 0.2,
            (Position::Midfielder, BonusPer90) => 0.2,

            (Position::Forward, GoalsPer90) => 0.4,
            (Position::Forward, ExpectedGoalsPer90) => 0.3,
            (Position::Forward, AssistsPer90 | ExpectedAssistsPer90) => 0.1,
            (Position::Forward, BonusPer90) => 0.1,
            _ => 0.0,
        },
        FeatureGroup::Form => match feature {
            FormLevel => 0.45,
            PointsPerGame => 0.2,
            Consistency => 0.2,
            Trend => 0.15,
            _ => 0.0,
        },
        FeatureGroup::Momentum => match feature {
            TeamPointsPerGame => 0.4,
            TeamGoalsFor => 0.3,
            TeamGoalsAgainst => 0.2,
            TeamLeaguePosition => 0.1,
            _ => 0.0,
        },
        FeatureGroup::Fixture => match feature {
            FixtureEase => 0.6,
            HomeShare => 0.2,
            FixtureCount => 0.2,
            _ => 0.0,
        },
        FeatureGroup::Value => match feature {
            PointsPerMillion => 0.7,
            Ownership => 0.3,
            _ => 0.0,
        },
    }
}

fn sub_score(fv: &FeatureVector, group: FeatureGroup) -> f64 {
    let mut sum = 0.0;
    let mut total_w = 0.0;
    for (feature, value) in fv.values.iter().filter(|(f, _)| f.group() == group) {
        let w = feature_weight(fv.position, *feature);
        if w <= 0.0 {
            continue;
        }
        sum += w * value;
        total_w += w;
    }
    if total_w <= 0.0 {
        return NEUTRAL_SUB_SCORE;
    }
    (SCORE_MAX * sum / total_w).clamp(0.0, SCORE_MAX)
}

fn confidence(fv: &FeatureVector, flags: &ReliabilityFlags) -> ConfidenceBreakdown {
    let expected = flags.expected_features.max(1);
    let imputed = fv.imputed.len();
    let observed = fv.observed_count();
    let completeness =
        ((observed as f64 + 0.5 * imputed as f64) / expected as f64).clamp(0.0, 1.0);
    ConfidenceBreakdown {
        completeness,
        stability: flags.points_stability.unwrap_or(NEUTRAL_STABILITY),
        minutes_reliability: flags.minutes_reliability.clamp(0.0, 1.0),
        observed,
        imputed,
        missing: fv.missing.len(),
        expected,
    }
}

fn downside_risk(flags: &ReliabilityFlags) -> f64 {
    let status: f64 = match flags.availability {
        Availability::Available => 0.0,
        Availability::Doubtful => 0.35,
        Availability::Injured | Availability::Suspended | Availability::Unavailable => 0.9,
    };
    let chance = flags
        .chance_of_playing
        .map(|c| 1.0 - (c / 100.0).clamp(0.0, 1.0))
        .unwrap_or(0.0);
    let absence = status.max(chance);
    let minutes = 1.0 - flags.minutes_reliability.clamp(0.0, 1.0);
    let volatility = 1.0 - flags.points_stability.unwrap_or(NEUTRAL_STABILITY);
    (0.5 * absence + 0.3 * minutes + 0.2 * volatility).clamp(0.0, 1.0)
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Scorer {
    pub weights: ScoreWeights,
}

impl Scorer {
    pub fn new(weights: ScoreWeights) -> Self {
        Self { weights }
    }

    /// Deterministic and side-effect free. Fails only when no performance feature
    /// survived normalization.
    pub fn score(&self, fv: &FeatureVector, flags: &ReliabilityFlags) -> Result<ScoreResult> {
        if fv.usable_performance_features() == 0 {
            return Err(EngineError::insufficient_data(
                fv.player_id,
                "no performance statistics and no peer fallback",
            ));
        }

        let sub_scores = SubScores {
            quality: sub_score(fv, FeatureGroup::Quality),
            form: sub_score(fv, FeatureGroup::Form),
            momentum: sub_score(fv, FeatureGroup::Momentum),
            fixture: sub_score(fv, FeatureGroup::Fixture),
            value: sub_score(fv, FeatureGroup::Value),
        };
        let composite = sub_scores.weighted_sum(&self.weights);

        let breakdown = confidence(fv, flags);
        let confidence = (breakdown.completeness
            * (0.5 + 0.25 * breakdown.stability + 0.25 * breakdown.minutes_reliability))
            .clamp(0.0, 1.0);

        Ok(ScoreResult {
            player_id: fv.player_id,
            data_version: fv.data_version,
            position: fv.position,
            sub_scores,
            weights: self.weights,
            composite,
            confidence,
            confidence_breakdown: breakdown,
            imputed_fields: fv.imputed.iter().copied().collect(),
            missing_fields: fv.missing.iter().copied().collect(),
            low_minutes: flags.low_minutes,
            downside_risk: downside_risk(flags),
        })
    }
}

/// Score with the default weight profile.
pub fn score(fv: &FeatureVector, flags: &ReliabilityFlags) -> Result<ScoreResult> {
    Scorer::default().score(fv, flags)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreFailure {
    pub player_id: u32,
    pub reason: String,
}

#[derive(Debug, Clone, Default)]
pub struct PoolScores {
    pub scores: HashMap<u32, ScoreResult>,
    /// Players that could not be scored, sorted by id.
    pub failures: Vec<ScoreFailure>,
}

impl PoolScores {
    pub fn get(&self, id: u32) -> Option<&ScoreResult> {
        self.scores.get(&id)
    }

    pub fn failure(&self, id: u32) -> Option<&ScoreFailure> {
        self.failures.iter().find(|f| f.player_id == id)
    }
}

/// Normalize and score every player of the batch in parallel. A failing player is
/// reported in `failures` and never aborts the rest of the pool.
pub fn score_pool(batch: &SnapshotBatch, normalizer: &Normalizer, scorer: &Scorer) -> PoolScores {
    score_pool_cached(batch, normalizer, scorer, None)
}

/// Same as `score_pool`, reading through `cache` keyed by player id and data version.
pub fn score_pool_cached(
    batch: &SnapshotBatch,
    normalizer: &Normalizer,
    scorer: &Scorer,
    cache: Option<&ScoreCache>,
) -> PoolScores {
    let by_position = batch.peers_by_position();
    let distributions: HashMap<Position, PeerDistribution> = by_position
        .iter()
        .map(|(pos, peers)| {
            (
                *pos,
                PeerDistribution::from_peers(*pos, peers.iter().copied()),
            )
        })
        .collect();
    let fixtures = batch.fixture_index();
    let empty = PeerDistribution::default();
    if let Some(c) = cache {
        c.purge_expired();
    }

    let outcomes: Vec<(u32, Result<ScoreResult>)> = batch
        .players
        .par_iter()
        .map(|p| {
            let ctx = fixtures
                .get(&normalize_name(&p.team))
                .map(|c| (*c).clone())
                .unwrap_or_else(|| FixtureContext::empty(&p.team));
            let dist = distributions.get(&p.position).unwrap_or(&empty);
            let compute = || {
                let fv = normalizer.normalize(p, &ctx, dist);
                scorer.score(&fv, &fv.reliability)
            };
            // Version 0 means unversioned; such a key would never change with the data.
            let res = match cache {
                Some(c) if p.data_version != 0 => {
                    c.get_or_compute(&score_key(p.id, p.data_version), compute)
                }
                _ => compute(),
            };
            (p.id, res)
        })
        .collect();

    let mut out = PoolScores::default();
    for (id, res) in outcomes {
        match res {
            Ok(score) => {
                debug!(
                    player_id = id,
                    composite = score.composite,
                    confidence = score.confidence,
                    "scored player"
                );
                out.scores.insert(id, score);
            }
            Err(err) => {
                warn!(player_id = id, error = %err, "player excluded from scoring");
                out.failures.push(ScoreFailure {
                    player_id: id,
                    reason: err.to_string(),
                });
            }
        }
    }
    out.failures.sort_by_key(|f| f.player_id);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::normalize;
    use crate::player::PlayerSnapshot;

    fn midfielder(id: u32) -> PlayerSnapshot {
        let mut p = PlayerSnapshot::new(id, "M", Position::Midfielder, "X", 8.0);
        p.minutes = 1500;
        p.appearances = Some(17);
        p.goals = Some(6.0);
        p.assists = Some(5.0);
        p.expected_goals = Some(5.2);
        p.expected_assists = Some(4.1);
        p.clean_sheets = Some(5.0);
        p.bonus = Some(8.0);
        p.total_points = Some(95.0);
        p.form = Some(6.0);
        p.recent_points = vec![5.0, 7.0, 2.0, 9.0, 6.0];
        p.selected_by_percent = Some(18.0);
        p
    }

    #[test]
    fn composite_is_weighted_sum() {
        let p = midfielder(1);
        let fv = normalize(&p, &FixtureContext::empty("X"), &[]);
        let s = score(&fv, &fv.reliability).unwrap();
        assert!((s.composite - s.sub_scores.weighted_sum(&ScoreWeights::DEFAULT)).abs() < 1e-12);
        assert!((0.0..=10.0).contains(&s.composite));
        assert!((0.0..=1.0).contains(&s.confidence));
        // no fixtures known
        assert_eq!(s.sub_scores.fixture, NEUTRAL_SUB_SCORE);
    }

    #[test]
    fn custom_weights_must_sum_to_one() {
        assert!(ScoreWeights::custom(0.2, 0.2, 0.2, 0.2, 0.2).is_ok());
        assert!(matches!(
            ScoreWeights::custom(0.5, 0.5, 0.5, 0.0, 0.0),
            Err(EngineError::InvalidWeights(_))
        ));
        assert!(ScoreWeights::custom(1.2, -0.2, 0.0, 0.0, 0.0).is_err());
    }

    #[test]
    fn deserialized_weights_are_validated() {
        let ok = r#"{"quality":0.2,"form":0.2,"momentum":0.2,"fixture":0.2,"value":0.2}"#;
        let w: ScoreWeights = serde_json::from_str(ok).unwrap();
        assert_eq!(w.weight(FeatureGroup::Form), 0.2);
        let bad = r#"{"quality":2.0,"form":0.2,"momentum":0.2,"fixture":0.2,"value":0.2}"#;
        assert!(serde_json::from_str::<ScoreWeights>(bad).is_err());
        let negative = r#"{"quality":1.2,"form":-0.2,"momentum":0.0,"fixture":0.0,"value":0.0}"#;
        assert!(serde_json::from_str::<ScoreWeights>(negative).is_err());
    }

    #[test]
    fn doubtful_with_low_chance_raises_risk() {
        let fit = midfielder(1);
        let mut doubt = midfielder(2);
        doubt.availability = Availability::Doubtful;
        doubt.chance_of_playing = Some(25.0);
        let a = normalize(&fit, &FixtureContext::empty("X"), &[]);
        let b = normalize(&doubt, &FixtureContext::empty("X"), &[]);
        let ra = score(&a, &a.reliability).unwrap();
        let rb = score(&b, &b.reliability).unwrap();
        assert!(rb.downside_risk > ra.downside_risk);
        assert!((0.0..=1.0).contains(&rb.downside_risk));
    }

    #[test]
    fn explanation_contributions_add_up() {
        let p = midfielder(1);
        let fv = normalize(&p, &FixtureContext::empty("X"), &[]);
        let s = score(&fv, &fv.reliability).unwrap();
        let e = s.explain();
        let total: f64 = e.components.iter().map(|c| c.contribution).sum();
        assert!((total - s.composite).abs() < 1e-12);
        assert_eq!(e.components.len(), 5);
    }

    #[test]
    fn injured_player_carries_more_risk() {
        let fit = midfielder(1);
        let mut hurt = midfielder(2);
        hurt.availability = Availability::Injured;
        let a = normalize(&fit, &FixtureContext::empty("X"), &[]);
        let b = normalize(&hurt, &FixtureContext::empty("X"), &[]);
        let ra = score(&a, &a.reliability).unwrap();
        let rb = score(&b, &b.reliability).unwrap();
        assert!(rb.downside_risk > ra.downside_risk);
        assert_eq!(ra.composite, rb.composite);
    }

    #[test]
    fn pool_reports_unscorable_players() {
        let batch = SnapshotBatch {
            data_version: 3,
            players: vec![
                midfielder(1),
                PlayerSnapshot::new(2, "Fresh", Position::Goalkeeper, "Y", 4.0),
            ],
            fixtures: Vec::new(),
        };
        let pool = score_pool(&batch, &Normalizer::default(), &Scorer::default());
        assert!(pool.get(1).is_some());
        assert!(pool.get(2).is_none());
        assert_eq!(pool.failure(2).map(|f| f.player_id), Some(2));
    }
}
