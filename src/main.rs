use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

use fpl_impact::config::EngineConfig;
use fpl_impact::engine::Engine;
use fpl_impact::fake_pool;
use fpl_impact::player::{Position, SnapshotBatch};
use fpl_impact::scoring::ScoreResult;
use fpl_impact::source::{JsonFileSource, SnapshotSource};

fn main() -> Result<()> {
    let _ = dotenvy::from_filename(".env.local");
    let _ = dotenvy::from_filename(".env");
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cfg = EngineConfig::from_env_cached().clone();
    let batch = load_batch()?;
    let engine = Engine::new(cfg);

    if let Some(id) = parse_u32_arg("--player") {
        let explanation = engine
            .explain(&batch, id)
            .with_context(|| format!("explain player {id}"))?;
        if has_flag("--json") {
            println!("{}", serde_json::to_string_pretty(&explanation)?);
            return Ok(());
        }
        let name = batch.player(id).map(|p| p.name.as_str()).unwrap_or("?");
        println!("{name} (id {id})");
        println!(
            "composite {:.2}  confidence {:.2}  downside risk {:.2}",
            explanation.composite, explanation.confidence, explanation.downside_risk
        );
        for c in &explanation.components {
            println!(
                "  {:<9} {:>5.2} x {:.2} = {:>5.2}",
                format!("{:?}", c.component).to_lowercase(),
                c.sub_score,
                c.weight,
                c.contribution
            );
        }
        let b = &explanation.confidence_breakdown;
        println!(
            "confidence: completeness {:.2} ({} observed, {} imputed, {} missing of {}), stability {:.2}, minutes {:.2}",
            b.completeness, b.observed, b.imputed, b.missing, b.expected, b.stability, b.minutes_reliability
        );
        if explanation.low_minutes {
            println!("note: low minutes");
        }
        return Ok(());
    }

    let top = parse_usize_arg("--top").unwrap_or(20).clamp(1, 500);
    let position = parse_str_arg("--position").and_then(|raw| Position::from_text(&raw));
    let scores = engine.score_batch(&batch);
    let mut rows: Vec<&ScoreResult> = scores
        .scores
        .values()
        .filter(|s| position.is_none_or(|p| s.position == p))
        .collect();
    rows.sort_by(|a, b| {
        b.composite
            .total_cmp(&a.composite)
            .then(a.player_id.cmp(&b.player_id))
    });

    println!(
        "{:<5} {:<22} {:<4} {:>5} {:>5} {:>5} {:>5} {:>5} {:>5} {:>5}",
        "id", "name", "pos", "pis", "conf", "qual", "form", "mom", "fix", "val"
    );
    for s in rows.iter().take(top) {
        let name = batch.player(s.player_id).map(|p| p.name.as_str()).unwrap_or("?");
        println!(
            "{:<5} {:<22} {:<4} {:>5.2} {:>5.2} {:>5.2} {:>5.2} {:>5.2} {:>5.2} {:>5.2}",
            s.player_id,
            truncate(name, 22),
            s.position.label(),
            s.composite,
            s.confidence,
            s.sub_scores.quality,
            s.sub_scores.form,
            s.sub_scores.momentum,
            s.sub_scores.fixture,
            s.sub_scores.value
        );
    }
    if !scores.failures.is_empty() {
        println!("{} players could not be scored", scores.failures.len());
    }
    Ok(())
}

fn load_batch() -> Result<SnapshotBatch> {
    match parse_path_arg("--snapshot") {
        Some(path) => JsonFileSource::new(&path)
            .fetch()
            .with_context(|| format!("load snapshot {}", path.display())),
        None => {
            let seed = parse_u32_arg("--seed").unwrap_or(7) as u64;
            Ok(fake_pool::generate_batch(seed, 1))
        }
    }
}

fn truncate(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
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

fn parse_u32_arg(name: &str) -> Option<u32> {
    parse_str_arg(name).and_then(|v| v.parse::<u32>().ok())
}

fn parse_usize_arg(name: &str) -> Option<usize> {
    parse_str_arg(name).and_then(|v| v.parse::<usize>().ok())
}
