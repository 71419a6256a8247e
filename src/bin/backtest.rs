use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

use fpl_impact::backtest::{BacktestInput, GameweekRange};
use fpl_impact::config::EngineConfig;
use fpl_impact::engine::Engine;
use fpl_impact::fake_pool;
use fpl_impact::optimizer::Strategy;
use fpl_impact::persist;

fn main() -> Result<()> {
    let _ = dotenvy::from_filename(".env.local");
    let _ = dotenvy::from_filename(".env");
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    // Without an input file, replay a synthetic season so the tool runs offline.
    let input: BacktestInput = match std::env::args().nth(1).filter(|a| !a.starts_with("--")) {
        Some(path) => persist::read_json(&PathBuf::from(&path))
            .with_context(|| format!("load backtest input {path}"))?,
        None => {
            let start = parse_u32_arg("--start").unwrap_or(1);
            let end = parse_u32_arg("--end").unwrap_or(start.saturating_add(5)).max(start);
            GameweekRange { start, end }.validate().context("check gameweek range")?;
            let (gameweeks, outcomes) = fake_pool::history(11, start, end);
            BacktestInput {
                range: GameweekRange { start, end },
                gameweeks,
                outcomes,
                strategies: Strategy::ALL.to_vec(),
            }
        }
    };

    let engine = Engine::new(EngineConfig::from_env());
    let report = engine.backtest(&input).context("run backtest")?;

    let s = &report.summary;
    println!(
        "Gameweeks {}-{}: {} evaluated, {} skipped, {} samples",
        report.range.start, report.range.end, s.gameweeks_evaluated, s.gameweeks_skipped, s.samples
    );
    println!("Pearson:   {}", fmt_opt(s.mean_pearson));
    println!("Spearman:  {}", fmt_opt(s.mean_spearman));
    println!("P@{}:      {}", report.precision_k, fmt_opt(s.mean_precision_at_k));
    println!("Calib err: {}", fmt_opt(s.calibration_error));
    for b in s.calibration.iter().filter(|b| b.count > 0) {
        println!(
            "  [{:.1}, {:.1}) n={:<5} conf {:.3} hit {:.3}",
            b.bucket_start, b.bucket_end, b.count, b.avg_pred, b.actual_rate
        );
    }
    for sk in &report.skipped {
        println!("skipped gw{}: {}", sk.gameweek, sk.reason);
    }
    for row in &report.strategies {
        println!(
            "#{} {:<12} realized {:+.1}  predicted {:+.2}  transfers {}  hits {}",
            row.rank, row.strategy, row.realized_gain, row.predicted_gain, row.transfers, row.hits
        );
    }

    let out_dir = parse_str_arg("--out-dir").map(PathBuf::from);
    if let Some(dir) = out_dir {
        let path = persist::save_report(&dir, &report).context("save backtest report")?;
        println!("wrote {}", path.display());
    }
    Ok(())
}

fn fmt_opt(v: Option<f64>) -> String {
    v.map(|x| format!("{x:.3}")).unwrap_or_else(|| "n/a".to_string())
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

fn parse_u32_arg(name: &str) -> Option<u32> {
    parse_str_arg(name).and_then(|v| v.parse::<u32>().ok())
}
