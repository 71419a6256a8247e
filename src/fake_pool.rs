use std::collections::{BTreeMap, HashMap};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::backtest::{HistoricalGameweek, Outcomes};
use crate::constraints::{Squad, SquadMember, SquadRules, round_money};
use crate::player::{
    Availability, FixtureContext, PlayerSnapshot, Position, SnapshotBatch, TeamForm,
    UpcomingFixture,
};

const TEAMS: [&str; 20] = [
    "Arsenal",
    "Aston Villa",
    "Bournemouth",
    "Brentford",
    "Brighton",
    "Chelsea",
    "Crystal Palace",
    "Everton",
    "Fulham",
    "Ipswich",
    "Leicester",
    "Liverpool",
    "Man City",
    "Man Utd",
    "Newcastle",
    "Nott'm Forest",
    "Southampton",
    "Spurs",
    "West Ham",
    "Wolves",
];

const FIXTURE_WEEKS: u32 = 6;

/// A seeded 300-player league: every team fields 2 GK, 5 DEF, 5 MID and 3 FWD.
pub fn generate_batch(seed: u64, data_version: u64) -> SnapshotBatch {
    generate_gameweek(seed, data_version, 1)
}

fn generate_gameweek(seed: u64, data_version: u64, next_gameweek: u32) -> SnapshotBatch {
    let mut rng = StdRng::seed_from_u64(seed);
    let strengths: Vec<f64> = TEAMS.iter().map(|_| rng.gen_range(0.0..1.0)).collect();
    let mut order: Vec<usize> = (0..TEAMS.len()).collect();
    order.sort_by(|a, b| strengths[*b].total_cmp(&strengths[*a]));
    let mut league_position = vec![0u32; TEAMS.len()];
    for (rank, team) in order.iter().enumerate() {
        league_position[*team] = rank as u32 + 1;
    }

    let mut players = Vec::new();
    let mut id = 1u32;
    for (t, team) in TEAMS.iter().enumerate() {
        let s = strengths[t];
        let form = TeamForm {
            points_per_game: Some(0.8 + 1.6 * s),
            goals_for_per_game: Some(0.9 + 1.4 * s),
            goals_against_per_game: Some(2.0 - 1.2 * s),
            league_position: Some(league_position[t]),
        };
        for pos in Position::ALL {
            for _ in 0..SquadRules::DEFAULT.quota(pos) {
                let mut p = player(&mut rng, id, team, pos, s);
                p.data_version = data_version;
                p.team_form = Some(form.clone());
                players.push(p);
                id += 1;
            }
        }
    }

    let fixtures = TEAMS
        .iter()
        .enumerate()
        .map(|(t, team)| FixtureContext {
            team: team.to_string(),
            fixtures: (0..FIXTURE_WEEKS)
                .map(|w| {
                    let opp = (t + 1 + (w as usize * 7 + next_gameweek as usize) % 19) % TEAMS.len();
                    let diff = 1.0 + 4.0 * strengths[opp];
                    UpcomingFixture {
                        gameweek: next_gameweek + w,
                        opponent: TEAMS[opp].to_string(),
                        difficulty: diff.round().clamp(1.0, 5.0) as u8,
                        is_home: (t + w as usize) % 2 == 0,
                    }
                })
                .collect(),
        })
        .collect();

    SnapshotBatch {
        data_version,
        players,
        fixtures,
    }
}

fn player(rng: &mut StdRng, id: u32, team: &str, pos: Position, team_strength: f64) -> PlayerSnapshot {
    let talent: f64 = (0.6 * rng.gen_range(0.0..1.0) + 0.4 * team_strength).clamp(0.0, 1.0);
    let (lo, hi) = match pos {
        Position::Goalkeeper => (4.0, 5.5),
        Position::Defender => (4.0, 6.5),
        Position::Midfielder => (4.5, 12.5),
        Position::Forward => (4.5, 12.0),
    };
    let price = round_money(lo + (hi - lo) * talent);
    let mut p = PlayerSnapshot::new(id, &format!("{} {id}", pos.label()), pos, team, price);

    let minutes: u32 = rng.gen_range(180..=3000);
    let nineties = minutes as f64 / 90.0;
    let apps = (minutes / 80).max(1);
    let (g90, a90, cs90) = match pos {
        Position::Goalkeeper => (0.0, 0.01, 0.15 + 0.25 * team_strength),
        Position::Defender => (0.02 + 0.08 * talent, 0.03 + 0.12 * talent, 0.15 + 0.25 * team_strength),
        Position::Midfielder => (0.05 + 0.4 * talent, 0.05 + 0.3 * talent, 0.1 + 0.2 * team_strength),
        Position::Forward => (0.1 + 0.6 * talent, 0.05 + 0.2 * talent, 0.0),
    };
    let goals = (g90 * nineties * rng.gen_range(0.7..1.3)).round();
    let assists = (a90 * nineties * rng.gen_range(0.7..1.3)).round();
    let clean_sheets = (cs90 * nineties).round();
    let bonus = (0.1 + 0.4 * talent) * nineties;
    let goal_pts = match pos {
        Position::Goalkeeper | Position::Defender => 6.0,
        Position::Midfielder => 5.0,
        Position::Forward => 4.0,
    };
    let cs_pts = match pos {
        Position::Goalkeeper | Position::Defender => 4.0,
        Position::Midfielder => 1.0,
        Position::Forward => 0.0,
    };
    let total = 2.0 * apps as f64 + goals * goal_pts + assists * 3.0 + clean_sheets * cs_pts + bonus;
    let ppg = total / apps as f64;

    p.minutes = minutes;
    p.appearances = Some(apps);
    p.goals = Some(goals);
    p.assists = Some(assists);
    p.clean_sheets = Some(clean_sheets);
    p.bonus = Some(bonus.round());
    p.total_points = Some(total.round());
    p.expected_goals = Some(g90 * nineties);
    p.expected_assists = Some(a90 * nineties);
    p.expected_goals_conceded = Some((2.0 - 1.2 * team_strength) * nineties);
    if pos == Position::Goalkeeper {
        p.saves = Some((2.0 + 2.0 * (1.0 - team_strength)) * nineties);
    }
    p.recent_points = (0..5)
        .map(|_| (ppg + rng.gen_range(-2.0..3.0)).max(0.0).round())
        .collect();
    p.form = Some(p.recent_points.iter().sum::<f64>() / 5.0);
    p.selected_by_percent = Some((40.0 * talent * talent + rng.gen_range(0.0..3.0)).min(80.0));
    let roll: f64 = rng.gen_range(0.0..1.0);
    if roll < 0.03 {
        p.availability = Availability::Injured;
        p.chance_of_playing = Some(0.0);
    } else if roll < 0.08 {
        p.availability = Availability::Doubtful;
        p.chance_of_playing = Some(50.0);
    }
    p
}

/// Cheapest legal squad under `budget`, or `None` if the pool can't fill one.
pub fn pick_squad(batch: &SnapshotBatch, budget: f64) -> Option<Squad> {
    let rules = SquadRules::DEFAULT;
    let mut sorted: Vec<&PlayerSnapshot> = batch.players.iter().collect();
    sorted.sort_by(|a, b| a.price.total_cmp(&b.price).then(a.id.cmp(&b.id)));

    let mut per_team: HashMap<&str, usize> = HashMap::new();
    let mut per_pos = [0usize; 4];
    let mut players = Vec::new();
    for p in sorted {
        if per_pos[p.position.index()] >= rules.quota(p.position) {
            continue;
        }
        let n = per_team.entry(p.team.as_str()).or_default();
        if *n >= rules.max_per_team {
            continue;
        }
        *n += 1;
        per_pos[p.position.index()] += 1;
        players.push(SquadMember::from_snapshot(p));
    }
    if players.len() != rules.squad_size {
        return None;
    }
    let spent: f64 = players.iter().map(|p| p.price).sum();
    let bank = round_money(budget - spent);
    if bank < 0.0 {
        return None;
    }
    Some(Squad {
        players,
        bank,
        free_transfers: 1,
    })
}

/// Realized points loosely tracking each player's recent output.
pub fn realized_points(batch: &SnapshotBatch, seed: u64) -> BTreeMap<u32, f64> {
    let mut rng = StdRng::seed_from_u64(seed ^ 0x9e37_79b9);
    batch
        .players
        .iter()
        .map(|p| {
            let base = p.points_per_game().unwrap_or(0.0);
            let pts = if p.availability.is_out() {
                0.0
            } else {
                (base * rng.gen_range(0.5..1.5) + rng.gen_range(-2.0..3.0)).max(0.0)
            };
            (p.id, pts.round())
        })
        .collect()
}

/// Snapshots, held squads and outcomes for `start..=end`, one seed per gameweek.
pub fn history(seed: u64, start: u32, end: u32) -> (Vec<HistoricalGameweek>, Outcomes) {
    let mut gameweeks = Vec::new();
    let mut outcomes = Outcomes::new();
    for gw in start..=end {
        let gw_seed = seed.wrapping_mul(31).wrapping_add(gw as u64);
        let snapshot = generate_gameweek(gw_seed, gw as u64, gw);
        outcomes.insert(gw, realized_points(&snapshot, gw_seed));
        let squad = pick_squad(&snapshot, 100.0);
        gameweeks.push(HistoricalGameweek {
            gameweek: gw,
            snapshot,
            squad,
        });
    }
    (gameweeks, outcomes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constraints::validate;

    #[test]
    fn same_seed_same_pool() {
        let a = generate_batch(11, 1);
        let b = generate_batch(11, 1);
        assert_eq!(a.players, b.players);
        assert_eq!(a.players.len(), 300);
        assert!(a.players.iter().all(|p| p.minutes > 0));
    }

    #[test]
    fn picked_squad_is_legal() {
        let batch = generate_batch(4, 1);
        let squad = pick_squad(&batch, 100.0).unwrap();
        assert_eq!(validate(&squad, &SquadRules::DEFAULT), Ok(()));
    }
}
