use std::path::PathBuf;

use anyhow::{Context, Result, anyhow};
use tracing_subscriber::EnvFilter;

use fpl_impact::config::EngineConfig;
use fpl_impact::engine::{Engine, RecommendationRequest};
use fpl_impact::fake_pool;
use fpl_impact::optimizer::{Strategy, TransferRecommendation};
use fpl_impact::persist;
use fpl_impact::player::SnapshotBatch;
use fpl_impact::source::{JsonFileSource, SnapshotSource};

fn main() -> Result<()> {
    let _ = dotenvy::from_filename(".env.local");
    let _ = dotenvy::from_filename(".env");
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let engine = Engine::new(EngineConfig::from_env());
    let (batch, mut request) = load_inputs()?;
    if let Some(s) = parse_str_arg("--strategy") {
        request.strategy = s;
    }
    if let Some(n) = parse_usize_arg("--max-transfers") {
        request.max_transfers = n;
    }
    if let Some(n) = parse_usize_arg("--free-transfers") {
        request.free_transfers = Some(n as u32);
    }
    if let Some(bank) = parse_f64_arg("--bank") {
        request.budget_override = Some(bank);
    }

    let strategies: Vec<String> = if has_flag("--compare") {
        Strategy::ALL.iter().map(|s| s.name().to_string()).collect()
    } else {
        vec![request.strategy.clone()]
    };

    let mut recs = Vec::new();
    for strategy in strategies {
        let mut req = request.clone();
        req.strategy = strategy.clone();
        let rec = engine
            .recommend(&batch, &req, None)
            .with_context(|| format!("recommend with {strategy}"))?;
        recs.push(rec);
    }

    if let Some(out) = parse_path_arg("--out") {
        persist::write_json_atomic(&out, &recs).context("write recommendation")?;
        println!("wrote {}", out.display());
    }
    if has_flag("--json") {
        println!("{}", serde_json::to_string_pretty(&recs)?);
        return Ok(());
    }
    for rec in &recs {
        print_recommendation(rec);
    }
    Ok(())
}

fn load_inputs() -> Result<(SnapshotBatch, RecommendationRequest)> {
    let snapshot = parse_path_arg("--snapshot");
    let request = parse_path_arg("--request");
    match (snapshot, request) {
        (Some(snap), Some(req)) => {
            let batch = JsonFileSource::new(snap.clone())
                .fetch()
                .with_context(|| format!("load snapshot {}", snap.display()))?;
            let request: RecommendationRequest = persist::read_json(&req)
                .with_context(|| format!("load request {}", req.display()))?;
            Ok((batch, request))
        }
        (None, None) => {
            let seed = parse_usize_arg("--seed").unwrap_or(7) as u64;
            let batch = fake_pool::generate_batch(seed, 1);
            let squad = fake_pool::pick_squad(&batch, 100.0)
                .ok_or_else(|| anyhow!("synthetic pool could not fill a squad"))?;
            let request = RecommendationRequest {
                squad,
                candidate_pool: None,
                strategy: Strategy::Balanced.name().to_string(),
                max_transfers: 2,
                free_transfers: Some(1),
                budget_override: None,
            };
            Ok((batch, request))
        }
        _ => Err(anyhow!("pass both --snapshot and --request, or neither for a demo pool")),
    }
}

fn print_recommendation(rec: &TransferRecommendation) {
    println!("== {} ==", rec.strategy);
    if rec.is_hold() {
        println!("hold: no combination beats keeping the squad");
    }
    for t in &rec.transfers {
        let c = &t.candidate;
        println!(
            "  OUT {:<18} IN {:<18} gain {:+.2} hit {:.0} net {:+.2}  {}",
            c.out.name, c.incoming.name, c.expected_gain, t.hit_penalty, t.net_gain, c.reasoning
        );
    }
    println!(
        "net gain {:+.2} (gross {:+.2}, hits {:.0})  confidence {:.2}  bank {:.1}m  formation {}",
        rec.total_expected_gain,
        rec.gross_gain,
        rec.hit_penalty,
        rec.confidence,
        rec.resulting_squad.bank,
        rec.formation
    );
    println!(
        "search: {} nodes, {} candidates, {} rejected, {} discarded, {} ms{}",
        rec.search.nodes_explored,
        rec.search.candidates_considered,
        rec.search.candidates_rejected,
        rec.search.candidates_discarded,
        rec.search.elapsed_ms,
        match rec.search.truncation_reason {
            Some(r) => format!(", truncated ({r:?})"),
            None => String::new(),
        }
    );
    if !rec.excluded.is_empty() {
        println!("{} players excluded (unscored)", rec.excluded.len());
    }
}

fn has_flag(name: &str) -> bool {
    std::env::args().skip(1).any(|a| a == name)
}

fn parse_str_arg(name: &str) -> Option<String> {
    let args = std::env::args().skip(1).collect::<Vec<_>>();
    for (idx, arg) in args.iter().enumerate() {
        if let Some(raw) = arg.strip_prefix(&format!("{name}="))
            && !raw.trim().is_empty()
        {
            return Some(raw.trim().to_string());
        }
        if arg == name
            && let Some(next) = args.get(idx + 1)
            && !next.trim().is_empty()
        {
            return Some(next.trim().to_string());
        }
    }
    None
}

fn parse_path_arg(name: &str) -> Option<PathBuf> {
    parse_str_arg(name).map(PathBuf::from)
}

fn parse_usize_arg(name: &str) -> Option<usize> {
    parse_str_arg(name).and_then(|v| v.parse::<usize>().ok())
}

fn parse_f64_arg(name: &str) -> Option<f64> {
    parse_str_arg(name)
        .and_then(|v| v.parse::<f64>().ok())
        .filter(|v| v.is_finite())
}
