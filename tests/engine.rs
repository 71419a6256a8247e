use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use fpl_impact::cache::TtlCache;
use fpl_impact::config::EngineConfig;
use fpl_impact::constraints::{SquadRules, validate};
use fpl_impact::engine::{Engine, RecommendationRequest};
use fpl_impact::error::EngineError;
use fpl_impact::fake_pool;
use fpl_impact::optimizer::Strategy;

fn request(seed: u64) -> (fpl_impact::player::SnapshotBatch, RecommendationRequest) {
    let batch = fake_pool::generate_batch(seed, 1);
    let squad = fake_pool::pick_squad(&batch, 100.0).expect("pool fills a squad");
    let req = RecommendationRequest {
        squad,
        candidate_pool: None,
        strategy: "balanced".to_string(),
        max_transfers: 1,
        free_transfers: Some(1),
        budget_override: None,
    };
    (batch, req)
}

#[test]
fn every_strategy_returns_a_legal_squad() {
    let (batch, req) = request(21);
    let engine = Engine::new(EngineConfig::default());
    for strategy in Strategy::ALL {
        let mut r = req.clone();
        r.strategy = strategy.name().to_string();
        let rec = engine.recommend(&batch, &r, None).expect("recommendation");
        assert_eq!(rec.strategy, strategy);
        assert_eq!(validate(&rec.resulting_squad, &SquadRules::DEFAULT), Ok(()));
        assert!(rec.transfers.len() <= 1);
        for t in &rec.transfers {
            assert_eq!(t.candidate.out.position, t.candidate.incoming.position);
            assert!(t.candidate.expected_gain > 0.0);
        }
    }
}

#[test]
fn candidate_pool_limits_incoming_players() {
    let (batch, mut req) = request(22);
    let allowed: Vec<u32> = batch
        .players
        .iter()
        .filter(|p| !req.squad.contains(p.id))
        .map(|p| p.id)
        .take(10)
        .collect();
    req.candidate_pool = Some(allowed.clone());
    req.max_transfers = 2;
    let engine = Engine::new(EngineConfig::default());
    let rec = engine.recommend(&batch, &req, None).expect("recommendation");
    for t in &rec.transfers {
        assert!(allowed.contains(&t.candidate.incoming.id));
    }
}

#[test]
fn zero_budget_override_never_overspends() {
    let (batch, mut req) = request(23);
    req.budget_override = Some(0.0);
    req.max_transfers = 2;
    let engine = Engine::new(EngineConfig::default());
    let rec = engine.recommend(&batch, &req, None).expect("recommendation");
    assert!(rec.resulting_squad.bank >= 0.0);
}

#[test]
fn explain_matches_pool_score() {
    let (batch, req) = request(24);
    let engine = Engine::new(EngineConfig::default());
    let id = req.squad.players[0].id;
    let explanation = engine.explain(&batch, id).expect("explanation");
    let scores = engine.score_batch(&batch);
    let s = scores.get(id).expect("squad player is scored");
    assert_eq!(explanation.composite, s.composite);
    let total: f64 = explanation.components.iter().map(|c| c.contribution).sum();
    assert!((total - s.composite).abs() < 1e-9);
}

#[test]
fn unknown_player_is_typed() {
    let (batch, _) = request(25);
    let engine = Engine::new(EngineConfig::default());
    assert!(matches!(
        engine.explain(&batch, 0),
        Err(EngineError::UnknownPlayer(0))
    ));
}

#[test]
fn concurrent_misses_compute_once() {
    let cache: Arc<TtlCache<u64>> = Arc::new(TtlCache::new(Duration::from_secs(60)));
    let calls = Arc::new(AtomicUsize::new(0));
    let handles: Vec<_> = (0..8)
        .map(|_| {
            let cache = Arc::clone(&cache);
            let calls = Arc::clone(&calls);
            thread::spawn(move || {
                cache
                    .get_or_compute("player_score:1:7", || {
                        calls.fetch_add(1, Ordering::SeqCst);
                        thread::sleep(Duration::from_millis(20));
                        Ok(42)
                    })
                    .expect("value computed")
            })
        })
        .collect();
    for h in handles {
        assert_eq!(h.join().expect("worker finished"), 42);
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(cache.computations(), 1);
}

#[test]
fn new_data_version_misses_the_cache() {
    let engine = Engine::new(EngineConfig::default());
    let v1 = fake_pool::generate_batch(26, 1);
    engine.score_batch(&v1);
    let after_v1 = engine.cache().computations();
    let v2 = fake_pool::generate_batch(26, 2);
    engine.score_batch(&v2);
    assert!(engine.cache().computations() > after_v1);
}

#[test]
fn unversioned_batches_are_never_served_from_cache() {
    let a = fake_pool::generate_batch(27, 0);
    let mut b = a.clone();
    let id = b.players[0].id;
    b.players[0].form = Some(0.0);
    b.players[0].total_points = Some(0.0);
    b.players[0].recent_points = vec![0.0; 5];

    let warm = Engine::new(EngineConfig::default());
    warm.score_batch(&a);
    let served = warm.score_batch(&b);
    let fresh = Engine::new(EngineConfig::default()).score_batch(&b);

    let served = served.get(id).expect("player scored");
    let fresh = fresh.get(id).expect("player scored");
    assert_eq!(served.composite, fresh.composite);
    assert_eq!(served.confidence, fresh.confidence);
    assert_eq!(warm.cache().computations(), 0);
    assert!(warm.cache().is_empty());
}

#[test]
fn expired_scores_are_dropped_on_the_next_batch() {
    let cfg = EngineConfig {
        score_cache_ttl_secs: 0,
        ..EngineConfig::default()
    };
    let engine = Engine::new(cfg);
    let v1 = fake_pool::generate_batch(28, 1);
    let v2 = fake_pool::generate_batch(28, 2);
    engine.score_batch(&v1);
    engine.score_batch(&v2);
    assert!(engine.cache().len() <= v2.players.len());
}
