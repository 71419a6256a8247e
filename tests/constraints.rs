use fpl_impact::constraints::{
    ConstraintViolation, Squad, SquadMember, SquadRules, Transfer, validate, validate_transfer,
    validate_transfers,
};
use fpl_impact::player::Position;

const TEAMS: [&str; 8] = ["Ars", "Avl", "Bou", "Bre", "Bha", "Che", "Cry", "Eve"];

fn member(id: u32, position: Position, team: &str, price: f64) -> SquadMember {
    SquadMember {
        id,
        name: format!("P{id}"),
        position,
        team: team.to_string(),
        price,
    }
}

/// 2-5-5-3 with at most two players per club and 1.0m in the bank.
fn legal_squad() -> Squad {
    let layout = [
        (Position::Goalkeeper, 2),
        (Position::Defender, 5),
        (Position::Midfielder, 5),
        (Position::Forward, 3),
    ];
    let mut players = Vec::new();
    let mut id = 1;
    for (position, n) in layout {
        for _ in 0..n {
            let team = TEAMS[(id as usize - 1) % TEAMS.len()];
            players.push(member(id, position, team, 6.0));
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
fn reference_squad_is_valid() {
    assert_eq!(validate(&legal_squad(), &SquadRules::DEFAULT), Ok(()));
}

#[test]
fn like_for_like_swap_within_budget_passes() {
    let squad = legal_squad();
    let t = Transfer {
        out_id: 15,
        incoming: member(100, Position::Forward, "Ful", 6.5),
    };
    assert_eq!(validate_transfer(&squad, &t, &SquadRules::DEFAULT), Ok(()));
    let next = squad.apply(&[t], &SquadRules::DEFAULT).expect("transfer applies");
    assert!((next.bank - 0.5).abs() < 1e-9);
    assert!(next.contains(100));
    assert!(!next.contains(15));
    assert_eq!(next.free_transfers, 0);
    assert_eq!(next.formation(), "5-5-3");
}

#[test]
fn overspending_is_rejected() {
    let squad = legal_squad();
    let t = Transfer {
        out_id: 15,
        incoming: member(100, Position::Forward, "Ful", 7.5),
    };
    assert!(matches!(
        validate_transfer(&squad, &t, &SquadRules::DEFAULT),
        Err(ConstraintViolation::NegativeBudget { .. })
    ));
}

#[test]
fn fourth_player_from_one_club_is_rejected() {
    let squad = legal_squad();
    // Ars already has players 1 and 9.
    let first = Transfer {
        out_id: 15,
        incoming: member(100, Position::Forward, "Ars", 6.0),
    };
    assert_eq!(validate_transfer(&squad, &first, &SquadRules::DEFAULT), Ok(()));
    let second = Transfer {
        out_id: 14,
        incoming: member(101, Position::Forward, "Ars", 6.0),
    };
    match validate_transfers(&squad, &[first, second], &SquadRules::DEFAULT) {
        Err(ConstraintViolation::TeamCap { team, count, max }) => {
            assert_eq!(team, "Ars");
            assert_eq!(count, 4);
            assert_eq!(max, 3);
        }
        other => panic!("expected team cap, got {other:?}"),
    }
}

#[test]
fn position_swap_is_a_mismatch() {
    let squad = legal_squad();
    let t = Transfer {
        out_id: 15,
        incoming: member(100, Position::Midfielder, "Ful", 5.0),
    };
    assert_eq!(
        validate_transfer(&squad, &t, &SquadRules::DEFAULT),
        Err(ConstraintViolation::PositionMismatch {
            out: Position::Forward,
            incoming: Position::Midfielder,
        })
    );
}

#[test]
fn buying_an_owned_player_is_rejected() {
    let squad = legal_squad();
    let owned = squad.players[13].clone();
    let t = Transfer {
        out_id: 15,
        incoming: owned,
    };
    assert!(validate_transfer(&squad, &t, &SquadRules::DEFAULT).is_err());
}

#[test]
fn failed_apply_leaves_squad_untouched() {
    let squad = legal_squad();
    let before = squad.clone();
    let t = Transfer {
        out_id: 15,
        incoming: member(100, Position::Forward, "Ful", 20.0),
    };
    assert!(squad.apply(&[t], &SquadRules::DEFAULT).is_err());
    assert_eq!(squad, before);
}

#[test]
fn swaps_that_fund_each_other_pass_together() {
    let squad = legal_squad();
    let cheap = Transfer {
        out_id: 3,
        incoming: member(100, Position::Defender, "Ful", 4.0),
    };
    let pricey = Transfer {
        out_id: 15,
        incoming: member(101, Position::Forward, "Ful", 8.5),
    };
    assert!(validate_transfer(&squad, &pricey, &SquadRules::DEFAULT).is_err());
    assert_eq!(
        validate_transfers(&squad, &[cheap, pricey], &SquadRules::DEFAULT),
        Ok(())
    );
}

#[test]
fn short_squad_reports_the_missing_position() {
    let mut squad = legal_squad();
    squad.players.pop();
    assert_eq!(
        validate(&squad, &SquadRules::DEFAULT),
        Err(ConstraintViolation::PositionQuota {
            position: Position::Forward,
            expected: 3,
            actual: 2,
        })
    );
}
