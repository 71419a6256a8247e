use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

pub const DIFFICULTY_MIN: u8 = 1;
pub const DIFFICULTY_MAX: u8 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Position {
    #[serde(rename = "GK", alias = "Goalkeeper")]
    Goalkeeper,
    #[serde(rename = "DEF", alias = "Defender")]
    Defender,
    #[serde(rename = "MID", alias = "Midfielder")]
    Midfielder,
    #[serde(rename = "FWD", alias = "Forward")]
    Forward,
}

impl Position {
    pub const ALL: [Position; 4] = [
        Position::Goalkeeper,
        Position::Defender,
        Position::Midfielder,
        Position::Forward,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Position::Goalkeeper => "GK",
            Position::Defender => "DEF",
            Position::Midfielder => "MID",
            Position::Forward => "FWD",
        }
    }

    pub fn index(self) -> usize {
        match self {
            Position::Goalkeeper => 0,
            Position::Defender => 1,
            Position::Midfielder => 2,
            Position::Forward => 3,
        }
    }

    /// Accepts the short game labels as well as the longer role names providers use.
    pub fn from_text(raw: &str) -> Option<Self> {
        let s = raw.trim().to_lowercase();
        if s == "gk" || s == "gkp" || s.contains("goalkeeper") || s.contains("keeper") {
            return Some(Position::Goalkeeper);
        }
        if s == "def" || s.contains("defender") || s.contains("back") {
            return Some(Position::Defender);
        }
        if s == "mid" || s.contains("midfield") {
            return Some(Position::Midfielder);
        }
        if s == "fwd" || s.contains("forward") || s.contains("striker") || s.contains("attacker")
        {
            return Some(Position::Forward);
        }
        None
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Availability {
    #[default]
    Available,
    Doubtful,
    Injured,
    Suspended,
    Unavailable,
}

impl Availability {
    pub fn is_out(self) -> bool {
        matches!(
            self,
            Availability::Injured | Availability::Suspended | Availability::Unavailable
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TeamForm {
    #[serde(default)]
    pub points_per_game: Option<f64>,
    #[serde(default)]
    pub goals_for_per_game: Option<f64>,
    #[serde(default)]
    pub goals_against_per_game: Option<f64>,
    #[serde(default)]
    pub league_position: Option<u32>,
}

/// One player's statistics at a single data refresh. Read-only for the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerSnapshot {
    pub id: u32,
    pub name: String,
    pub position: Position,
    pub team: String,
    /// Price in millions.
    pub price: f64,
    #[serde(default)]
    pub data_version: u64,
    #[serde(default)]
    pub minutes: u32,
    #[serde(default)]
    pub appearances: Option<u32>,
    #[serde(default)]
    pub form: Option<f64>,
    #[serde(default)]
    pub total_points: Option<f64>,
    #[serde(default)]
    pub goals: Option<f64>,
    #[serde(default)]
    pub assists: Option<f64>,
    #[serde(default)]
    pub clean_sheets: Option<f64>,
    #[serde(default)]
    pub saves: Option<f64>,
    #[serde(default)]
    pub bonus: Option<f64>,
    #[serde(default)]
    pub goals_conceded: Option<f64>,
    #[serde(default)]
    pub expected_goals: Option<f64>,
    #[serde(default)]
    pub expected_assists: Option<f64>,
    #[serde(default)]
    pub expected_goals_conceded: Option<f64>,
    /// Points per gameweek, oldest first.
    #[serde(default)]
    pub recent_points: Vec<f64>,
    #[serde(default)]
    pub selected_by_percent: Option<f64>,
    #[serde(default)]
    pub availability: Availability,
    /// Percent chance of playing next round, when the provider publishes one.
    #[serde(default)]
    pub chance_of_playing: Option<f64>,
    #[serde(default)]
    pub team_form: Option<TeamForm>,
}

impl PlayerSnapshot {
    pub fn new(id: u32, name: &str, position: Position, team: &str, price: f64) -> Self {
        Self {
            id,
            name: name.to_string(),
            position,
            team: team.to_string(),
            price,
            data_version: 0,
            minutes: 0,
            appearances: None,
            form: None,
            total_points: None,
            goals: None,
            assists: None,
            clean_sheets: None,
            saves: None,
            bonus: None,
            goals_conceded: None,
            expected_goals: None,
            expected_assists: None,
            expected_goals_conceded: None,
            recent_points: Vec::new(),
            selected_by_percent: None,
            availability: Availability::Available,
            chance_of_playing: None,
            team_form: None,
        }
    }

    pub fn has_played(&self) -> bool {
        self.minutes > 0
    }

    /// Per-90 rate for a season total. Undefined without minutes.
    pub fn per90(&self, total: Option<f64>) -> Option<f64> {
        if self.minutes == 0 {
            return None;
        }
        let v = total?;
        if !v.is_finite() || v < 0.0 {
            return None;
        }
        Some(v * 90.0 / self.minutes as f64)
    }

    pub fn points_per_game(&self) -> Option<f64> {
        if self.minutes == 0 {
            return None;
        }
        let points = self.total_points.filter(|v| v.is_finite())?;
        let games = match self.appearances {
            Some(apps) if apps > 0 => apps as f64,
            _ => (self.minutes as f64 / 90.0).max(1.0),
        };
        Some(points / games)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpcomingFixture {
    pub gameweek: u32,
    pub opponent: String,
    /// 1 (easiest) to 5 (hardest).
    pub difficulty: u8,
    #[serde(default)]
    pub is_home: bool,
}

/// Upcoming opponents for one real-world team.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FixtureContext {
    pub team: String,
    #[serde(default)]
    pub fixtures: Vec<UpcomingFixture>,
}

impl FixtureContext {
    pub fn empty(team: &str) -> Self {
        Self {
            team: team.to_string(),
            fixtures: Vec::new(),
        }
    }

    /// Fixtures falling in the first `horizon` gameweeks, earliest first.
    pub fn within_horizon(&self, horizon: usize) -> Vec<&UpcomingFixture> {
        let mut rows: Vec<&UpcomingFixture> = self
            .fixtures
            .iter()
            .filter(|f| (DIFFICULTY_MIN..=DIFFICULTY_MAX).contains(&f.difficulty))
            .collect();
        rows.sort_by(|a, b| a.gameweek.cmp(&b.gameweek).then(a.opponent.cmp(&b.opponent)));
        let Some(first) = rows.first().map(|f| f.gameweek) else {
            return rows;
        };
        let last = first.saturating_add(horizon.max(1) as u32 - 1);
        rows.retain(|f| f.gameweek <= last);
        rows
    }
}

/// Everything one refresh cycle produced.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SnapshotBatch {
    #[serde(default)]
    pub data_version: u64,
    #[serde(default)]
    pub players: Vec<PlayerSnapshot>,
    #[serde(default)]
    pub fixtures: Vec<FixtureContext>,
}

impl SnapshotBatch {
    pub fn player(&self, id: u32) -> Option<&PlayerSnapshot> {
        self.players.iter().find(|p| p.id == id)
    }

    pub fn fixture_index(&self) -> HashMap<String, &FixtureContext> {
        self.fixtures
            .iter()
            .map(|f| (normalize_name(&f.team), f))
            .collect()
    }

    pub fn peers_by_position(&self) -> HashMap<Position, Vec<&PlayerSnapshot>> {
        let mut out: HashMap<Position, Vec<&PlayerSnapshot>> = HashMap::new();
        for p in &self.players {
            out.entry(p.position).or_default().push(p);
        }
        out
    }
}

pub fn normalize_name(input: &str) -> String {
    let lower = input.trim().to_ascii_lowercase();
    let mut out = String::with_capacity(lower.len());
    let mut prev_us = false;
    for ch in lower.chars() {
        let mapped = if ch.is_ascii_alphanumeric() {
            Some(ch)
        } else if ch == '&' {
            Some('a')
        } else {
            None
        };

        if let Some(c) = mapped {
            out.push(c);
            prev_us = false;
        } else if !prev_us && !out.is_empty() {
            out.push('_');
            prev_us = true;
        }
    }
    while out.ends_with('_') {
        out.pop();
    }
    out
}
