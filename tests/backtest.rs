use std::collections::BTreeMap;

use fpl_impact::backtest::{BacktestInput, BacktestReport, GameweekRange};
use fpl_impact::config::EngineConfig;
use fpl_impact::engine::Engine;
use fpl_impact::error::EngineError;
use fpl_impact::fake_pool;
use fpl_impact::optimizer::Strategy;

fn engine() -> Engine {
    let cfg = EngineConfig {
        backtest_max_transfers: 1,
        ..EngineConfig::default()
    };
    Engine::new(cfg)
}

fn comparable(mut report: BacktestReport) -> BacktestReport {
    report.generated_at.clear();
    report
}

#[test]
fn report_does_not_depend_on_input_order() {
    let (gameweeks, outcomes) = fake_pool::history(5, 1, 3);
    let forward = BacktestInput {
        range: GameweekRange { start: 1, end: 3 },
        gameweeks: gameweeks.clone(),
        outcomes: outcomes.clone(),
        strategies: Strategy::ALL.to_vec(),
    };
    let mut reversed_gws = gameweeks;
    reversed_gws.reverse();
    let mut reversed_strategies = Strategy::ALL.to_vec();
    reversed_strategies.reverse();
    let backward = BacktestInput {
        range: GameweekRange { start: 1, end: 3 },
        gameweeks: reversed_gws,
        outcomes,
        strategies: reversed_strategies,
    };

    let e = engine();
    let a = comparable(e.backtest(&forward).expect("backtest runs"));
    let b = comparable(e.backtest(&backward).expect("backtest runs"));
    assert_eq!(a, b);
    assert_eq!(a.summary.gameweeks_evaluated, 3);
    let order: Vec<u32> = a.gameweeks.iter().map(|g| g.gameweek).collect();
    assert_eq!(order, vec![1, 2, 3]);
}

#[test]
fn missing_outcomes_skip_only_that_gameweek() {
    let (gameweeks, mut outcomes) = fake_pool::history(8, 1, 3);
    outcomes.remove(&2);
    let input = BacktestInput {
        range: GameweekRange { start: 1, end: 3 },
        gameweeks,
        outcomes,
        strategies: vec![Strategy::Balanced],
    };
    let report = engine().backtest(&input).expect("backtest runs");
    assert_eq!(report.summary.gameweeks_evaluated, 2);
    assert_eq!(report.skipped.len(), 1);
    assert_eq!(report.skipped[0].gameweek, 2);
}

#[test]
fn gameweeks_outside_the_range_are_ignored() {
    let (gameweeks, outcomes) = fake_pool::history(8, 1, 4);
    let input = BacktestInput {
        range: GameweekRange { start: 2, end: 3 },
        gameweeks,
        outcomes,
        strategies: vec![Strategy::Balanced],
    };
    let report = engine().backtest(&input).expect("backtest runs");
    let seen: Vec<u32> = report.gameweeks.iter().map(|g| g.gameweek).collect();
    assert_eq!(seen, vec![2, 3]);
    assert!(report.skipped.is_empty());
}

#[test]
fn metrics_are_bounded_and_strategies_ranked() {
    let (gameweeks, outcomes) = fake_pool::history(13, 1, 2);
    let input = BacktestInput {
        range: GameweekRange { start: 1, end: 2 },
        gameweeks,
        outcomes,
        strategies: Strategy::ALL.to_vec(),
    };
    let report = engine().backtest(&input).expect("backtest runs");
    for g in &report.gameweeks {
        if let Some(r) = g.metrics.spearman {
            assert!((-1.0..=1.0).contains(&r));
        }
        if let Some(p) = g.metrics.precision_at_k {
            assert!((0.0..=1.0).contains(&p));
        }
        assert_eq!(g.strategies.len(), 3);
    }
    let ranks: Vec<usize> = report.strategies.iter().map(|s| s.rank).collect();
    assert_eq!(ranks, vec![1, 2, 3]);
    for pair in report.strategies.windows(2) {
        assert!(pair[0].realized_gain >= pair[1].realized_gain);
    }
    let binned: usize = report.summary.calibration.iter().map(|b| b.count).sum();
    assert_eq!(binned, report.summary.samples);
}

#[test]
fn empty_history_reports_every_gameweek_skipped() {
    let input = BacktestInput {
        range: GameweekRange { start: 10, end: 11 },
        gameweeks: Vec::new(),
        outcomes: BTreeMap::new(),
        strategies: vec![Strategy::Balanced],
    };
    let report = engine().backtest(&input).expect("backtest runs");
    assert_eq!(report.summary.gameweeks_evaluated, 0);
    assert_eq!(report.skipped.len(), 2);
    assert!(report.summary.mean_spearman.is_none());
}

#[test]
fn oversized_or_reversed_ranges_are_rejected() {
    let e = engine();
    for range in [
        GameweekRange { start: 0, end: u32::MAX },
        GameweekRange { start: 9, end: 2 },
    ] {
        let input = BacktestInput {
            range,
            gameweeks: Vec::new(),
            outcomes: BTreeMap::new(),
            strategies: vec![Strategy::Balanced],
        };
        assert!(matches!(e.backtest(&input), Err(EngineError::InvalidRange(_))));
    }
}
