use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use crate::config::EngineConfig;
use crate::player::{Availability, DIFFICULTY_MAX, FixtureContext, PlayerSnapshot, Position};

/// Peer counts at or above this normalize purely by percentile.
const FULL_PEER_SAMPLES: f64 = 20.0;
const FORM_DECAY: f64 = 0.8;
const FIXTURE_DECAY: f64 = 0.85;
const MAX_CV: f64 = 1.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Feature {
    GoalsPer90,
    AssistsPer90,
    ExpectedGoalsPer90,
    ExpectedAssistsPer90,
    CleanSheetsPer90,
    SavesPer90,
    BonusPer90,
    ExpectedConcededPer90,
    FormLevel,
    Consistency,
    Trend,
    PointsPerGame,
    TeamPointsPerGame,
    TeamGoalsFor,
    TeamGoalsAgainst,
    TeamLeaguePosition,
    FixtureEase,
    HomeShare,
    FixtureCount,
    PointsPerMillion,
    Ownership,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureGroup {
    Quality,
    Form,
    Momentum,
    Fixture,
    Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    HigherBetter,
    LowerBetter,
}

impl Feature {
    pub const ALL: [Feature; 21] = [
        Feature::GoalsPer90,
        Feature::AssistsPer90,
        Feature::ExpectedGoalsPer90,
        Feature::ExpectedAssistsPer90,
        Feature::CleanSheetsPer90,
        Feature::SavesPer90,
        Feature::BonusPer90,
        Feature::ExpectedConcededPer90,
        Feature::FormLevel,
        Feature::Consistency,
        Feature::Trend,
        Feature::PointsPerGame,
        Feature::TeamPointsPerGame,
        Feature::TeamGoalsFor,
        Feature::TeamGoalsAgainst,
        Feature::TeamLeaguePosition,
        Feature::FixtureEase,
        Feature::HomeShare,
        Feature::FixtureCount,
        Feature::PointsPerMillion,
        Feature::Ownership,
    ];

    pub fn group(self) -> FeatureGroup {
        match self {
            Feature::GoalsPer90
            | Feature::AssistsPer90
            | Feature::ExpectedGoalsPer90
            | Feature::ExpectedAssistsPer90
            | Feature::CleanSheetsPer90
            | Feature::SavesPer90
            | Feature::BonusPer90
            | Feature::ExpectedConcededPer90 => FeatureGroup::Quality,
            Feature::FormLevel
            | Feature::Consistency
            | Feature::Trend
            | Feature::PointsPerGame => FeatureGroup::Form,
            Feature::TeamPointsPerGame
            | Feature::TeamGoalsFor
            | Feature::TeamGoalsAgainst
            | Feature::TeamLeaguePosition => FeatureGroup::Momentum,
            Feature::FixtureEase | Feature::HomeShare | Feature::FixtureCount => {
                FeatureGroup::Fixture
            }
            Feature::PointsPerMillion | Feature::Ownership => FeatureGroup::Value,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Feature::GoalsPer90 => "goals_per90",
            Feature::AssistsPer90 => "assists_per90",
            Feature::ExpectedGoalsPer90 => "xg_per90",
            Feature::ExpectedAssistsPer90 => "xa_per90",
            Feature::CleanSheetsPer90 => "clean_sheets_per90",
            Feature::SavesPer90 => "saves_per90",
            Feature::BonusPer90 => "bonus_per90",
            Feature::ExpectedConcededPer90 => "xgc_per90",
            Feature::FormLevel => "form_level",
            Feature::Consistency => "consistency",
            Feature::Trend => "trend",
            Feature::PointsPerGame => "points_per_game",
            Feature::TeamPointsPerGame => "team_points_per_game",
            Feature::TeamGoalsFor => "team_goals_for",
            Feature::TeamGoalsAgainst => "team_goals_against",
            Feature::TeamLeaguePosition => "team_league_position",
            Feature::FixtureEase => "fixture_ease",
            Feature::HomeShare => "home_share",
            Feature::FixtureCount => "fixture_count",
            Feature::PointsPerMillion => "points_per_million",
            Feature::Ownership => "ownership",
        }
    }

    /// Quality and form features come from the player's own output; the rest is context.
    pub fn is_performance(self) -> bool {
        matches!(self.group(), FeatureGroup::Quality | FeatureGroup::Form)
    }

    /// Fixture features are already on a shared bounded scale and are not peer-relative.
    fn is_absolute(self) -> bool {
        self.group() == FeatureGroup::Fixture
    }

    fn direction(self) -> Direction {
        match self {
            Feature::ExpectedConcededPer90
            | Feature::Consistency
            | Feature::TeamGoalsAgainst
            | Feature::TeamLeaguePosition => Direction::LowerBetter,
            _ => Direction::HigherBetter,
        }
    }

    /// Raw range used when too few peers exist for a percentile.
    fn reference_range(self) -> (f64, f64) {
        match self {
            Feature::GoalsPer90 | Feature::ExpectedGoalsPer90 => (0.0, 0.8),
            Feature::AssistsPer90 | Feature::ExpectedAssistsPer90 => (0.0, 0.5),
            Feature::CleanSheetsPer90 => (0.0, 0.6),
            Feature::SavesPer90 => (0.0, 5.0),
            Feature::BonusPer90 => (0.0, 1.0),
            Feature::ExpectedConcededPer90 => (0.5, 2.5),
            Feature::FormLevel => (0.0, 10.0),
            Feature::Consistency => (0.0, MAX_CV),
            Feature::Trend => (-1.5, 1.5),
            Feature::PointsPerGame => (0.0, 8.0),
            Feature::TeamPointsPerGame => (0.0, 3.0),
            Feature::TeamGoalsFor | Feature::TeamGoalsAgainst => (0.0, 3.0),
            Feature::TeamLeaguePosition => (1.0, 20.0),
            Feature::FixtureEase | Feature::HomeShare => (0.0, 1.0),
            Feature::FixtureCount => (0.0, 1.5),
            Feature::PointsPerMillion => (0.0, 30.0),
            Feature::Ownership => (0.0, 60.0),
        }
    }
}

/// Features a complete snapshot of this position would produce.
pub fn expected_features(position: Position) -> Vec<Feature> {
    let quality: &[Feature] = match position {
        Position::Goalkeeper => &[
            Feature::SavesPer90,
            Feature::CleanSheetsPer90,
            Feature::ExpectedConcededPer90,
            Feature::BonusPer90,
        ],
        Position::Defender => &[
            Feature::CleanSheetsPer90,
            Feature::GoalsPer90,
            Feature::AssistsPer90,
            Feature::ExpectedGoalsPer90,
            Feature::ExpectedAssistsPer90,
            Feature::ExpectedConcededPer90,
            Feature::BonusPer90,
        ],
        Position::Midfielder => &[
            Feature::ExpectedGoalsPer90,
            Feature::GoalsPer90,
            Feature::ExpectedAssistsPer90,
            Feature::AssistsPer90,
            Feature::CleanSheetsPer90,
            Feature::BonusPer90,
        ],
        Position::Forward => &[
            Feature::GoalsPer90,
            Feature::ExpectedGoalsPer90,
            Feature::AssistsPer90,
            Feature::ExpectedAssistsPer90,
            Feature::BonusPer90,
        ],
    };
    let mut out = quality.to_vec();
    out.extend(
        Feature::ALL
            .iter()
            .copied()
            .filter(|f| f.group() != FeatureGroup::Quality),
    );
    out
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReliabilityFlags {
    pub minutes: u32,
    pub low_minutes: bool,
    /// sqrt ramp of minutes towards the full-reliability threshold, in [0,1].
    pub minutes_reliability: f64,
    /// 1 minus the normalized coefficient of variation of recent points, when enough exist.
    pub points_stability: Option<f64>,
    pub expected_features: usize,
    pub availability: Availability,
    pub chance_of_playing: Option<f64>,
}

/// Normalized features for one player, each value in [0,1] with 1 = best.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    pub player_id: u32,
    pub position: Position,
    pub data_version: u64,
    pub values: BTreeMap<Feature, f64>,
    pub imputed: BTreeSet<Feature>,
    pub missing: BTreeSet<Feature>,
    pub reliability: ReliabilityFlags,
}

impl FeatureVector {
    pub fn get(&self, feature: Feature) -> Option<f64> {
        self.values.get(&feature).copied()
    }

    pub fn observed_count(&self) -> usize {
        self.values.len() - self.imputed.len()
    }

    pub fn usable_performance_features(&self) -> usize {
        self.values.keys().filter(|f| f.is_performance()).count()
    }
}

/// Sorted raw values per feature for one position at one data version.
#[derive(Debug, Clone, Default)]
pub struct PeerDistribution {
    position: Option<Position>,
    sorted: HashMap<Feature, Vec<f64>>,
}

impl PeerDistribution {
    pub fn from_peers<'a, I>(position: Position, peers: I) -> Self
    where
        I: IntoIterator<Item = &'a PlayerSnapshot>,
    {
        let mut sorted: HashMap<Feature, Vec<f64>> = HashMap::new();
        for peer in peers.into_iter().filter(|p| p.position == position) {
            for feature in Feature::ALL.iter().copied().filter(|f| !f.is_absolute()) {
                if let Some(v) = raw_player_value(feature, peer) {
                    sorted.entry(feature).or_default().push(v);
                }
            }
        }
        for values in sorted.values_mut() {
            values.sort_by(f64::total_cmp);
        }
        Self {
            position: Some(position),
            sorted,
        }
    }

    pub fn position(&self) -> Option<Position> {
        self.position
    }

    pub fn sample_count(&self, feature: Feature) -> usize {
        self.sorted.get(&feature).map(Vec::len).unwrap_or(0)
    }

    pub fn median(&self, feature: Feature) -> Option<f64> {
        let values = self.sorted.get(&feature)?;
        let n = values.len();
        if n == 0 {
            return None;
        }
        if n % 2 == 1 {
            Some(values[n / 2])
        } else {
            Some((values[n / 2 - 1] + values[n / 2]) / 2.0)
        }
    }

    /// Fraction of peers this raw value beats, counting ties as half.
    fn percentile(&self, feature: Feature, raw: f64) -> Option<f64> {
        let values = self.sorted.get(&feature)?;
        if values.is_empty() {
            return None;
        }
        let below = values.partition_point(|x| *x < raw);
        let below_or_eq = values.partition_point(|x| *x <= raw);
        let ties = (below_or_eq - below) as f64;
        let better_than = match feature.direction() {
            Direction::HigherBetter => below as f64,
            Direction::LowerBetter => (values.len() - below_or_eq) as f64,
        };
        Some(((better_than + 0.5 * ties) / values.len() as f64).clamp(0.0, 1.0))
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Normalizer {
    pub low_minutes: u32,
    pub full_minutes: u32,
    pub fixture_horizon: usize,
}

impl Default for Normalizer {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default())
    }
}

impl Normalizer {
    pub fn from_config(cfg: &EngineConfig) -> Self {
        Self {
            low_minutes: cfg.low_minutes,
            full_minutes: cfg.full_minutes.max(1),
            fixture_horizon: cfg.fixture_horizon.max(1),
        }
    }

    /// Pure function of its inputs. Missing fields fall back to the peer median and are
    /// recorded as imputed; fields with no peer fallback are recorded as missing.
    pub fn normalize(
        &self,
        snapshot: &PlayerSnapshot,
        fixture: &FixtureContext,
        peers: &PeerDistribution,
    ) -> FeatureVector {
        let expected = expected_features(snapshot.position);
        let mut values = BTreeMap::new();
        let mut imputed = BTreeSet::new();
        let mut missing = BTreeSet::new();

        for feature in expected.iter().copied() {
            if feature.is_absolute() {
                match raw_fixture_value(feature, fixture, self.fixture_horizon) {
                    Some(raw) => {
                        values.insert(feature, absolute_scale(feature, raw));
                    }
                    None => {
                        missing.insert(feature);
                    }
                }
                continue;
            }

            let (raw, was_imputed) = match raw_player_value(feature, snapshot) {
                Some(v) => (v, false),
                None => match peers.median(feature) {
                    Some(m) => (m, true),
                    None => {
                        missing.insert(feature);
                        continue;
                    }
                },
            };
            values.insert(feature, relative_scale(feature, raw, peers));
            if was_imputed {
                imputed.insert(feature);
            }
        }

        let reliability = ReliabilityFlags {
            minutes: snapshot.minutes,
            low_minutes: snapshot.minutes < self.low_minutes,
            minutes_reliability: (snapshot.minutes as f64 / self.full_minutes as f64)
                .clamp(0.0, 1.0)
                .sqrt(),
            points_stability: points_stability(snapshot),
            expected_features: expected.len(),
            availability: snapshot.availability,
            chance_of_playing: snapshot.chance_of_playing.filter(|c| c.is_finite()),
        };

        FeatureVector {
            player_id: snapshot.id,
            position: snapshot.position,
            data_version: snapshot.data_version,
            values,
            imputed,
            missing,
            reliability,
        }
    }
}

/// Normalize with default thresholds, building the peer distribution from `peers`.
pub fn normalize(
    snapshot: &PlayerSnapshot,
    fixture: &FixtureContext,
    peers: &[PlayerSnapshot],
) -> FeatureVector {
    let dist = PeerDistribution::from_peers(
        snapshot.position,
        peers.iter().filter(|p| p.id != snapshot.id),
    );
    Normalizer::default().normalize(snapshot, fixture, &dist)
}

fn relative_scale(feature: Feature, raw: f64, peers: &PeerDistribution) -> f64 {
    let abs = absolute_scale(feature, raw);
    let n = peers.sample_count(feature) as f64;
    let Some(pct) = peers.percentile(feature, raw) else {
        return abs;
    };
    // Shrink towards the absolute scale while the peer sample is small.
    let w = (n / FULL_PEER_SAMPLES).clamp(0.0, 1.0);
    (w * pct + (1.0 - w) * abs).clamp(0.0, 1.0)
}

fn absolute_scale(feature: Feature, raw: f64) -> f64 {
    let (lo, hi) = feature.reference_range();
    let t = ((raw - lo) / (hi - lo)).clamp(0.0, 1.0);
    match feature.direction() {
        Direction::HigherBetter => t,
        Direction::LowerBetter => 1.0 - t,
    }
}

fn raw_player_value(feature: Feature, p: &PlayerSnapshot) -> Option<f64> {
    let v = match feature {
        Feature::GoalsPer90 => p.per90(p.goals),
        Feature::AssistsPer90 => p.per90(p.assists),
        Feature::ExpectedGoalsPer90 => p.per90(p.expected_goals),
        Feature::ExpectedAssistsPer90 => p.per90(p.expected_assists),
        Feature::CleanSheetsPer90 => p.per90(p.clean_sheets),
        Feature::SavesPer90 => p.per90(p.saves),
        Feature::BonusPer90 => p.per90(p.bonus),
        Feature::ExpectedConcededPer90 => p.per90(p.expected_goals_conceded),
        Feature::FormLevel => form_level(p),
        Feature::Consistency => recent_cv(p),
        Feature::Trend => recent_trend(p),
        Feature::PointsPerGame => p.points_per_game(),
        Feature::TeamPointsPerGame => p.team_form.as_ref().and_then(|t| t.points_per_game),
        Feature::TeamGoalsFor => p.team_form.as_ref().and_then(|t| t.goals_for_per_game),
        Feature::TeamGoalsAgainst => p
            .team_form
            .as_ref()
            .and_then(|t| t.goals_against_per_game),
        Feature::TeamLeaguePosition => p
            .team_form
            .as_ref()
            .and_then(|t| t.league_position)
            .map(|pos| pos as f64),
        Feature::PointsPerMillion => {
            if !p.has_played() || p.price <= 0.0 {
                None
            } else {
                p.total_points.map(|pts| pts / p.price)
            }
        }
        Feature::Ownership => p.selected_by_percent,
        Feature::FixtureEase | Feature::HomeShare | Feature::FixtureCount => None,
    };
    v.filter(|x| x.is_finite())
}

fn raw_fixture_value(feature: Feature, ctx: &FixtureContext, horizon: usize) -> Option<f64> {
    let rows = ctx.within_horizon(horizon);
    if rows.is_empty() {
        return None;
    }
    match feature {
        Feature::FixtureEase => {
            let span = (DIFFICULTY_MAX - 1) as f64;
            let mut sum = 0.0;
            let mut total_w = 0.0;
            for (i, f) in rows.iter().enumerate() {
                let w = FIXTURE_DECAY.powi(i as i32);
                sum += w * (DIFFICULTY_MAX - f.difficulty) as f64 / span;
                total_w += w;
            }
            Some(sum / total_w)
        }
        Feature::HomeShare => {
            Some(rows.iter().filter(|f| f.is_home).count() as f64 / rows.len() as f64)
        }
        Feature::FixtureCount => Some(rows.len() as f64 / horizon.max(1) as f64),
        _ => None,
    }
}

fn played_recent(p: &PlayerSnapshot) -> Option<&[f64]> {
    if !p.has_played() || p.recent_points.is_empty() {
        return None;
    }
    Some(&p.recent_points)
}

/// Recency-weighted recent points, falling back to the provider's form figure.
fn form_level(p: &PlayerSnapshot) -> Option<f64> {
    if let Some(points) = played_recent(p) {
        let n = points.len();
        let mut sum = 0.0;
        let mut total_w = 0.0;
        for (i, pts) in points.iter().enumerate() {
            let w = FORM_DECAY.powi((n - 1 - i) as i32);
            sum += w * pts;
            total_w += w;
        }
        return Some(sum / total_w);
    }
    if p.has_played() { p.form } else { None }
}

fn recent_cv(p: &PlayerSnapshot) -> Option<f64> {
    let points: Vec<f64> = played_recent(p)?
        .iter()
        .copied()
        .filter(|v| *v > 0.0)
        .collect();
    if points.len() < 2 {
        return None;
    }
    let mean = points.iter().sum::<f64>() / points.len() as f64;
    if mean <= 0.0 {
        return None;
    }
    let var = points.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / points.len() as f64;
    Some((var.sqrt() / mean).min(MAX_CV))
}

fn recent_trend(p: &PlayerSnapshot) -> Option<f64> {
    let points = played_recent(p)?;
    if points.len() < 3 {
        return None;
    }
    let n = points.len() as f64;
    let x_mean = (n - 1.0) / 2.0;
    let y_mean = points.iter().sum::<f64>() / n;
    let mut num = 0.0;
    let mut den = 0.0;
    for (i, y) in points.iter().enumerate() {
        let dx = i as f64 - x_mean;
        num += dx * (y - y_mean);
        den += dx * dx;
    }
    if den <= 0.0 {
        return None;
    }
    Some(num / den)
}

fn points_stability(p: &PlayerSnapshot) -> Option<f64> {
    let played = played_recent(p)?;
    if played.len() < 3 {
        return None;
    }
    recent_cv(p).map(|cv| (1.0 - cv / MAX_CV).clamp(0.0, 1.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::player::UpcomingFixture;

    fn forward(id: u32, minutes: u32, goals: f64, xg: f64) -> PlayerSnapshot {
        let mut p = PlayerSnapshot::new(id, &format!("F{id}"), Position::Forward, "X", 7.0);
        p.minutes = minutes;
        p.appearances = Some(minutes / 90);
        p.goals = Some(goals);
        p.assists = Some(1.0);
        p.expected_goals = Some(xg);
        p.expected_assists = Some(1.0);
        p.bonus = Some(3.0);
        p.total_points = Some(40.0);
        p.recent_points = vec![2.0, 6.0, 5.0, 8.0];
        p.selected_by_percent = Some(10.0);
        p
    }

    fn fixtures() -> FixtureContext {
        FixtureContext {
            team: "X".into(),
            fixtures: vec![
                UpcomingFixture {
                    gameweek: 1,
                    opponent: "A".into(),
                    difficulty: 2,
                    is_home: true,
                },
                UpcomingFixture {
                    gameweek: 2,
                    opponent: "B".into(),
                    difficulty: 4,
                    is_home: false,
                },
            ],
        }
    }

    #[test]
    fn values_are_bounded() {
        let peers: Vec<PlayerSnapshot> = (1..30)
            .map(|i| forward(i, 900 + i * 30, i as f64 * 0.5, i as f64 * 0.4))
            .collect();
        let fv = normalize(&forward(99, 1800, 12.0, 10.0), &fixtures(), &peers);
        assert!(fv.values.values().all(|v| (0.0..=1.0).contains(v)));
        assert!(fv.imputed.is_empty());
        assert!(!fv.reliability.low_minutes);
    }

    #[test]
    fn better_stats_rank_higher_within_position() {
        let peers: Vec<PlayerSnapshot> = (1..30)
            .map(|i| forward(i, 1800, i as f64 * 0.5, i as f64 * 0.4))
            .collect();
        let strong = normalize(&forward(100, 1800, 14.0, 12.0), &fixtures(), &peers);
        let weak = normalize(&forward(101, 1800, 1.0, 1.0), &fixtures(), &peers);
        assert!(
            strong.get(Feature::GoalsPer90).unwrap() > weak.get(Feature::GoalsPer90).unwrap()
        );
    }

    #[test]
    fn missing_fields_use_peer_median() {
        let peers: Vec<PlayerSnapshot> = (1..10).map(|i| forward(i, 1800, 5.0, 4.0)).collect();
        let mut p = forward(50, 1800, 5.0, 4.0);
        p.expected_goals = None;
        let fv = normalize(&p, &fixtures(), &peers);
        assert!(fv.imputed.contains(&Feature::ExpectedGoalsPer90));
        assert!(fv.get(Feature::ExpectedGoalsPer90).is_some());
    }

    #[test]
    fn no_minutes_and_no_peers_leaves_performance_missing() {
        let p = PlayerSnapshot::new(7, "New", Position::Forward, "X", 4.5);
        let fv = normalize(&p, &FixtureContext::empty("X"), &[]);
        assert_eq!(fv.usable_performance_features(), 0);
        assert!(fv.reliability.low_minutes);
        assert_eq!(fv.reliability.minutes_reliability, 0.0);
    }

    #[test]
    fn easier_fixtures_score_higher() {
        let p = forward(1, 1800, 5.0, 4.0);
        let easy = FixtureContext {
            team: "X".into(),
            fixtures: vec![UpcomingFixture {
                gameweek: 1,
                opponent: "A".into(),
                difficulty: 1,
                is_home: true,
            }],
        };
        let hard = FixtureContext {
            team: "X".into(),
            fixtures: vec![UpcomingFixture {
                gameweek: 1,
                opponent: "A".into(),
                difficulty: 5,
                is_home: false,
            }],
        };
        let a = normalize(&p, &easy, &[]);
        let b = normalize(&p, &hard, &[]);
        assert_eq!(a.get(Feature::FixtureEase), Some(1.0));
        assert_eq!(b.get(Feature::FixtureEase), Some(0.0));
    }

    #[test]
    fn peer_order_does_not_change_output() {
        let mut peers: Vec<PlayerSnapshot> = (1..25)
            .map(|i| forward(i, 600 + i * 50, i as f64, i as f64 * 0.7))
            .collect();
        let target = forward(200, 1500, 7.0, 6.0);
        let a = normalize(&target, &fixtures(), &peers);
        peers.reverse();
        let b = normalize(&target, &fixtures(), &peers);
        assert_eq!(a, b);
    }
}
