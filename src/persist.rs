use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::backtest::BacktestReport;
use crate::error::Result;

/// Write pretty JSON through a temp file and rename, so readers never see a partial artifact.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir)?;
    }
    let json = serde_json::to_string_pretty(value)?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, json)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&raw)?)
}

pub fn report_path(dir: &Path, report: &BacktestReport) -> PathBuf {
    dir.join(format!(
        "backtest_gw{}-{}.json",
        report.range.start, report.range.end
    ))
}

/// Save a backtest report under `dir` and return where it went.
pub fn save_report(dir: &Path, report: &BacktestReport) -> Result<PathBuf> {
    let path = report_path(dir, report);
    write_json_atomic(&path, report)?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn roundtrip_through_temp_dir() {
        let dir = std::env::temp_dir().join(format!("fpl_impact_persist_{}", std::process::id()));
        let path = dir.join("artifact.json");
        let mut value = BTreeMap::new();
        value.insert("gw".to_string(), 12u32);
        write_json_atomic(&path, &value).unwrap();
        let back: BTreeMap<String, u32> = read_json(&path).unwrap();
        assert_eq!(back, value);
        assert!(!path.with_extension("json.tmp").exists());
        let _ = fs::remove_dir_all(&dir);
    }
}
