use std::collections::{HashMap, HashSet};
use std::slice;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::player::{PlayerSnapshot, Position, normalize_name};

const MONEY_EPS: f64 = 1e-6;

/// Roster rules of the game. Quotas are indexed by `Position::index`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SquadRules {
    pub squad_size: usize,
    pub quotas: [usize; 4],
    pub max_per_team: usize,
}

impl SquadRules {
    pub const DEFAULT: SquadRules = SquadRules {
        squad_size: 15,
        quotas: [2, 5, 5, 3],
        max_per_team: 3,
    };

    pub fn quota(&self, position: Position) -> usize {
        self.quotas[position.index()]
    }
}

impl Default for SquadRules {
    fn default() -> Self {
        Self::DEFAULT
    }
}

#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum ConstraintViolation {
    #[error("squad has {actual} players, expected {expected}")]
    SquadSize { expected: usize, actual: usize },

    #[error("{position} quota is {expected}, squad has {actual}")]
    PositionQuota {
        position: Position,
        expected: usize,
        actual: usize,
    },

    #[error("cannot replace a {out} with a {incoming}")]
    PositionMismatch { out: Position, incoming: Position },

    #[error("budget would be {bank:.1}m")]
    NegativeBudget { bank: f64 },

    #[error("{count} players from {team}, max {max}")]
    TeamCap {
        team: String,
        count: usize,
        max: usize,
    },

    #[error("player {player_id} is not in the squad")]
    PlayerOutMissing { player_id: u32 },

    #[error("player {player_id} is already in the squad")]
    PlayerInPresent { player_id: u32 },

    #[error("player {player_id} appears more than once")]
    DuplicatePlayer { player_id: u32 },
}

pub type ValidationResult = Result<(), ConstraintViolation>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SquadMember {
    pub id: u32,
    pub name: String,
    pub position: Position,
    pub team: String,
    /// Selling price for owned players, buying price for incoming ones.
    pub price: f64,
}

impl SquadMember {
    pub fn from_snapshot(p: &PlayerSnapshot) -> Self {
        Self {
            id: p.id,
            name: p.name.clone(),
            position: p.position,
            team: p.team.clone(),
            price: p.price,
        }
    }
}

/// One swap: the owned player leaving and the player arriving.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transfer {
    pub out_id: u32,
    pub incoming: SquadMember,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Squad {
    pub players: Vec<SquadMember>,
    /// Money in the bank, in millions.
    pub bank: f64,
    #[serde(default = "default_free_transfers")]
    pub free_transfers: u32,
}

fn default_free_transfers() -> u32 {
    1
}

pub fn round_money(v: f64) -> f64 {
    (v * 10.0).round() / 10.0
}

impl Squad {
    pub fn contains(&self, id: u32) -> bool {
        self.players.iter().any(|p| p.id == id)
    }

    pub fn member(&self, id: u32) -> Option<&SquadMember> {
        self.players.iter().find(|p| p.id == id)
    }

    pub fn total_value(&self) -> f64 {
        round_money(self.players.iter().map(|p| p.price).sum::<f64>())
    }

    pub fn count_by_position(&self) -> [usize; 4] {
        let mut counts = [0usize; 4];
        for p in &self.players {
            counts[p.position.index()] += 1;
        }
        counts
    }

    /// Outfield counts as `D-M-F`.
    pub fn formation(&self) -> String {
        let c = self.count_by_position();
        format!("{}-{}-{}", c[1], c[2], c[3])
    }

    /// The state these transfers would produce, made simultaneously.
    /// Outgoing players not in the squad are ignored; incoming players are always added.
    fn simulate(&self, transfers: &[Transfer]) -> Squad {
        let outs: HashSet<u32> = transfers.iter().map(|t| t.out_id).collect();
        let mut bank = self.bank;
        let mut players = Vec::with_capacity(self.players.len());
        for p in &self.players {
            if outs.contains(&p.id) {
                bank += p.price;
            } else {
                players.push(p.clone());
            }
        }
        for t in transfers {
            bank -= t.incoming.price;
            players.push(t.incoming.clone());
        }
        Squad {
            players,
            bank: round_money(bank),
            free_transfers: self.free_transfers,
        }
    }

    /// Apply the transfers as one validated operation. The squad is never left half-applied.
    pub fn apply(&self, transfers: &[Transfer], rules: &SquadRules) -> Result<Squad, ConstraintViolation> {
        validate_transfers(self, transfers, rules)?;
        let mut next = self.simulate(transfers);
        next.free_transfers = self.free_transfers.saturating_sub(transfers.len() as u32);
        Ok(next)
    }
}

pub fn validate(squad: &Squad, rules: &SquadRules) -> ValidationResult {
    check_quotas(squad, rules)?;
    check_budget(squad)?;
    check_team_cap(squad, rules)?;
    check_duplicates(squad)
}

pub fn validate_transfer(squad: &Squad, transfer: &Transfer, rules: &SquadRules) -> ValidationResult {
    validate_transfers(squad, slice::from_ref(transfer), rules)
}

/// Checks a set of simultaneous transfers against the resulting squad state.
pub fn validate_transfers(squad: &Squad, transfers: &[Transfer], rules: &SquadRules) -> ValidationResult {
    let next = squad.simulate(transfers);
    if let Err(violation) = check_quotas(&next, rules) {
        if let Some(mismatch) = position_mismatch(squad, transfers) {
            return Err(mismatch);
        }
        return Err(violation);
    }
    check_budget(&next)?;
    check_team_cap(&next, rules)?;

    let mut seen_out = HashSet::new();
    for t in transfers {
        if !squad.contains(t.out_id) || !seen_out.insert(t.out_id) {
            return Err(ConstraintViolation::PlayerOutMissing { player_id: t.out_id });
        }
    }
    let mut seen_in = HashSet::new();
    for t in transfers {
        let id = t.incoming.id;
        let leaving = seen_out.contains(&id);
        if (squad.contains(id) && !leaving) || !seen_in.insert(id) {
            return Err(ConstraintViolation::PlayerInPresent { player_id: id });
        }
    }
    check_duplicates(&next)
}

fn position_mismatch(squad: &Squad, transfers: &[Transfer]) -> Option<ConstraintViolation> {
    transfers.iter().find_map(|t| {
        let out = squad.member(t.out_id)?;
        (out.position != t.incoming.position).then_some(ConstraintViolation::PositionMismatch {
            out: out.position,
            incoming: t.incoming.position,
        })
    })
}

fn check_quotas(squad: &Squad, rules: &SquadRules) -> ValidationResult {
    let counts = squad.count_by_position();
    for pos in Position::ALL {
        let expected = rules.quota(pos);
        let actual = counts[pos.index()];
        if actual != expected {
            return Err(ConstraintViolation::PositionQuota {
                position: pos,
                expected,
                actual,
            });
        }
    }
    if squad.players.len() != rules.squad_size {
        return Err(ConstraintViolation::SquadSize {
            expected: rules.squad_size,
            actual: squad.players.len(),
        });
    }
    Ok(())
}

fn check_budget(squad: &Squad) -> ValidationResult {
    if squad.bank < -MONEY_EPS || !squad.bank.is_finite() {
        return Err(ConstraintViolation::NegativeBudget { bank: squad.bank });
    }
    Ok(())
}

fn check_team_cap(squad: &Squad, rules: &SquadRules) -> ValidationResult {
    let mut counts: HashMap<String, (usize, &str)> = HashMap::new();
    for p in &squad.players {
        let entry = counts
            .entry(normalize_name(&p.team))
            .or_insert((0, p.team.as_str()));
        entry.0 += 1;
    }
    let mut over: Vec<(&String, usize, &str)> = counts
        .iter()
        .filter(|(_, v)| v.0 > rules.max_per_team)
        .map(|(key, v)| (key, v.0, v.1))
        .collect();
    over.sort_by(|a, b| a.0.cmp(b.0));
    match over.first() {
        Some((_, count, team)) => Err(ConstraintViolation::TeamCap {
            team: team.to_string(),
            count: *count,
            max: rules.max_per_team,
        }),
        None => Ok(()),
    }
}

fn check_duplicates(squad: &Squad) -> ValidationResult {
    let mut seen = HashSet::new();
    for p in &squad.players {
        if !seen.insert(p.id) {
            return Err(ConstraintViolation::DuplicatePlayer { player_id: p.id });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn member(id: u32, position: Position, team: &str, price: f64) -> SquadMember {
        SquadMember {
            id,
            name: format!("P{id}"),
            position,
            team: team.to_string(),
            price,
        }
    }

    fn squad() -> Squad {
        let mut players = Vec::new();
        let mut id = 1;
        for pos in Position::ALL {
            for _ in 0..SquadRules::DEFAULT.quota(pos) {
                players.push(member(id, pos, &format!("T{}", id % 8), 6.0));
                id += 1;
            }
        }
        Squad {
            players,
            bank: 1.0,
            free_transfers: 1,
        }
    }

    #[test]
    fn default_squad_is_valid() {
        let s = squad();
        assert_eq!(validate(&s, &SquadRules::DEFAULT), Ok(()));
        assert_eq!(s.formation(), "5-5-3");
    }

    #[test]
    fn quota_checked_before_budget() {
        let mut s = squad();
        s.players.pop();
        s.bank = -3.0;
        assert!(matches!(
            validate(&s, &SquadRules::DEFAULT),
            Err(ConstraintViolation::PositionQuota {
                position: Position::Forward,
                ..
            })
        ));
    }

    #[test]
    fn transfer_over_budget_rejected() {
        let s = squad();
        let t = Transfer {
            out_id: 15,
            incoming: member(99, Position::Forward, "Z", 7.5),
        };
        assert!(matches!(
            validate_transfer(&s, &t, &SquadRules::DEFAULT),
            Err(ConstraintViolation::NegativeBudget { .. })
        ));
    }

    #[test]
    fn apply_updates_bank_and_free_transfers() {
        let s = squad();
        let t = Transfer {
            out_id: 15,
            incoming: member(99, Position::Forward, "Z", 5.5),
        };
        let next = s.apply(&[t], &SquadRules::DEFAULT).unwrap();
        assert!((next.bank - 1.5).abs() < 1e-9);
        assert_eq!(next.free_transfers, 0);
        assert!(next.contains(99) && !next.contains(15));
    }

    #[test]
    fn position_swap_is_reported_as_mismatch() {
        let s = squad();
        let t = Transfer {
            out_id: 1,
            incoming: member(99, Position::Forward, "Z", 4.0),
        };
        assert_eq!(
            validate_transfer(&s, &t, &SquadRules::DEFAULT),
            Err(ConstraintViolation::PositionMismatch {
                out: Position::Goalkeeper,
                incoming: Position::Forward,
            })
        );
    }
}
