use criterion::{Criterion, criterion_group, criterion_main};
use std::hint::black_box;

use fpl_impact::config::EngineConfig;
use fpl_impact::constraints::{SquadMember, SquadRules, Transfer, validate_transfers};
use fpl_impact::fake_pool;
use fpl_impact::features::{Normalizer, PeerDistribution};
use fpl_impact::optimizer::{Optimizer, Strategy};
use fpl_impact::player::FixtureContext;
use fpl_impact::scoring::{Scorer, score_pool};

fn bench_normalize_player(c: &mut Criterion) {
    let batch = fake_pool::generate_batch(7, 1);
    let player = &batch.players[40];
    let peers = PeerDistribution::from_peers(
        player.position,
        batch.players.iter().filter(|p| p.position == player.position),
    );
    let ctx = batch
        .fixtures
        .iter()
        .find(|f| f.team == player.team)
        .cloned()
        .unwrap_or_else(|| FixtureContext::empty(&player.team));
    let normalizer = Normalizer::default();
    c.bench_function("normalize_player", |b| {
        b.iter(|| {
            let fv = normalizer.normalize(black_box(player), &ctx, &peers);
            black_box(fv.values.len());
        })
    });
}

fn bench_score_pool(c: &mut Criterion) {
    let batch = fake_pool::generate_batch(7, 1);
    let normalizer = Normalizer::default();
    let scorer = Scorer::default();
    c.bench_function("score_pool_300", |b| {
        b.iter(|| {
            let pool = score_pool(black_box(&batch), &normalizer, &scorer);
            black_box(pool.scores.len());
        })
    });
}

fn bench_validate_transfers(c: &mut Criterion) {
    let batch = fake_pool::generate_batch(7, 1);
    let squad = fake_pool::pick_squad(&batch, 100.0).unwrap();
    let moves: Vec<Transfer> = squad
        .players
        .iter()
        .take(2)
        .filter_map(|out| {
            batch
                .players
                .iter()
                .find(|p| p.position == out.position && !squad.contains(p.id))
                .map(|p| Transfer {
                    out_id: out.id,
                    incoming: SquadMember::from_snapshot(p),
                })
        })
        .collect();
    c.bench_function("validate_transfers", |b| {
        b.iter(|| {
            let res = validate_transfers(black_box(&squad), &moves, &SquadRules::DEFAULT);
            black_box(res.is_ok());
        })
    });
}

fn bench_optimize(c: &mut Criterion) {
    let batch = fake_pool::generate_batch(7, 1);
    let squad = fake_pool::pick_squad(&batch, 100.0).unwrap();
    let scores = score_pool(&batch, &Normalizer::default(), &Scorer::default());
    let pool: Vec<SquadMember> = batch
        .players
        .iter()
        .filter(|p| !squad.contains(p.id))
        .map(SquadMember::from_snapshot)
        .collect();
    let cfg = EngineConfig::default();
    let optimizer = Optimizer::new(&scores, &cfg);

    let mut group = c.benchmark_group("optimize");
    group.sample_size(10);
    for max in [1usize, 2] {
        group.bench_function(format!("balanced_max{max}"), |b| {
            b.iter(|| {
                let rec = optimizer
                    .optimize(black_box(&squad), &pool, Strategy::Balanced, max, 1)
                    .unwrap();
                black_box(rec.total_expected_gain);
            })
        });
    }
    group.finish();
}

criterion_group!(
    perf,
    bench_normalize_player,
    bench_score_pool,
    bench_validate_transfers,
    bench_optimize
);
criterion_main!(perf);
