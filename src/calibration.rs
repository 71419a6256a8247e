use serde::{Deserialize, Serialize};

/// A prediction counts as a hit when its percentile lands this close to the realized one.
pub const HIT_PERCENTILE_TOLERANCE: f64 = 0.25;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalibrationBin {
    pub bucket_start: f64,
    pub bucket_end: f64,
    pub count: usize,
    pub avg_pred: f64,
    pub actual_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    pub samples: usize,
    pub pearson: Option<f64>,
    pub spearman: Option<f64>,
    pub precision_at_k: Option<f64>,
    pub calibration_error: Option<f64>,
}

/// One player's prediction and realized result for a single gameweek.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Observation {
    pub player_id: u32,
    pub predicted: f64,
    pub confidence: f64,
    pub actual: f64,
}

pub fn pearson(xs: &[f64], ys: &[f64]) -> Option<f64> {
    if xs.len() != ys.len() || xs.len() < 2 {
        return None;
    }
    let n = xs.len() as f64;
    let mx = xs.iter().sum::<f64>() / n;
    let my = ys.iter().sum::<f64>() / n;
    let mut cov = 0.0_f64;
    let mut vx = 0.0_f64;
    let mut vy = 0.0_f64;
    for (x, y) in xs.iter().zip(ys) {
        cov += (x - mx) * (y - my);
        vx += (x - mx).powi(2);
        vy += (y - my).powi(2);
    }
    let den = (vx * vy).sqrt();
    if den <= 1e-12 {
        return None;
    }
    Some((cov / den).clamp(-1.0, 1.0))
}

pub fn spearman(xs: &[f64], ys: &[f64]) -> Option<f64> {
    if xs.len() != ys.len() {
        return None;
    }
    pearson(&average_ranks(xs), &average_ranks(ys))
}

/// 1-based ranks, ties sharing the mean of their positions.
pub fn average_ranks(values: &[f64]) -> Vec<f64> {
    let mut idx: Vec<usize> = (0..values.len()).collect();
    idx.sort_by(|a, b| values[*a].total_cmp(&values[*b]));
    let mut ranks = vec![0.0; values.len()];
    let mut i = 0;
    while i < idx.len() {
        let mut j = i;
        while j + 1 < idx.len() && values[idx[j + 1]] == values[idx[i]] {
            j += 1;
        }
        let rank = (i + j) as f64 / 2.0 + 1.0;
        for k in i..=j {
            ranks[idx[k]] = rank;
        }
        i = j + 1;
    }
    ranks
}

/// Ranks rescaled to [0,1]; a single value sits at 0.5.
pub fn percentile_ranks(values: &[f64]) -> Vec<f64> {
    let n = values.len();
    if n < 2 {
        return vec![0.5; n];
    }
    average_ranks(values)
        .into_iter()
        .map(|r| (r - 1.0) / (n - 1) as f64)
        .collect()
}

fn top_k_ids(rows: &[(u32, f64)], k: usize) -> Vec<u32> {
    let mut sorted: Vec<(u32, f64)> = rows.to_vec();
    sorted.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
    sorted.into_iter().take(k).map(|(id, _)| id).collect()
}

/// Share of the predicted top-K that also finished in the realized top-K.
pub fn precision_at_k(predicted: &[(u32, f64)], actual: &[(u32, f64)], k: usize) -> Option<f64> {
    let k = k.min(predicted.len()).min(actual.len());
    if k == 0 {
        return None;
    }
    let pred = top_k_ids(predicted, k);
    let real = top_k_ids(actual, k);
    let hits = pred.iter().filter(|id| real.contains(id)).count();
    Some(hits as f64 / k as f64)
}

pub fn calibration_bins(confidences: &[f64], hits: &[bool], bins: usize) -> Vec<CalibrationBin> {
    let bins = bins.max(2);
    let mut counts = vec![0usize; bins];
    let mut pred_sum = vec![0.0_f64; bins];
    let mut actual_sum = vec![0.0_f64; bins];

    for (c, hit) in confidences.iter().zip(hits) {
        let c = c.clamp(0.0, 1.0);
        let idx = ((c * bins as f64).floor() as usize).min(bins - 1);
        counts[idx] += 1;
        pred_sum[idx] += c;
        if *hit {
            actual_sum[idx] += 1.0;
        }
    }

    let mut out = Vec::with_capacity(bins);
    for i in 0..bins {
        let count = counts[i];
        let (avg_pred, actual_rate) = if count > 0 {
            (pred_sum[i] / count as f64, actual_sum[i] / count as f64)
        } else {
            (0.0, 0.0)
        };
        out.push(CalibrationBin {
            bucket_start: i as f64 / bins as f64,
            bucket_end: (i + 1) as f64 / bins as f64,
            count,
            avg_pred,
            actual_rate,
        });
    }
    out
}

/// Count-weighted mean gap between stated confidence and hit rate.
pub fn expected_calibration_error(bins: &[CalibrationBin]) -> Option<f64> {
    let total: usize = bins.iter().map(|b| b.count).sum();
    if total == 0 {
        return None;
    }
    let gap: f64 = bins
        .iter()
        .filter(|b| b.count > 0)
        .map(|b| b.count as f64 * (b.avg_pred - b.actual_rate).abs())
        .sum();
    Some(gap / total as f64)
}

/// Whether each prediction's percentile landed near the realized percentile.
pub fn percentile_hits(observations: &[Observation]) -> Vec<bool> {
    let pred: Vec<f64> = observations.iter().map(|o| o.predicted).collect();
    let real: Vec<f64> = observations.iter().map(|o| o.actual).collect();
    percentile_ranks(&pred)
        .into_iter()
        .zip(percentile_ranks(&real))
        .map(|(p, a)| (p - a).abs() <= HIT_PERCENTILE_TOLERANCE)
        .collect()
}

/// Metrics for one batch of observations. Input order does not matter.
pub fn evaluate(observations: &[Observation], k: usize, bins: usize) -> (Metrics, Vec<CalibrationBin>) {
    let mut rows = observations.to_vec();
    rows.sort_by_key(|o| o.player_id);

    let pred: Vec<f64> = rows.iter().map(|o| o.predicted).collect();
    let real: Vec<f64> = rows.iter().map(|o| o.actual).collect();
    let pred_rows: Vec<(u32, f64)> = rows.iter().map(|o| (o.player_id, o.predicted)).collect();
    let real_rows: Vec<(u32, f64)> = rows.iter().map(|o| (o.player_id, o.actual)).collect();
    let confidences: Vec<f64> = rows.iter().map(|o| o.confidence).collect();
    let hits = percentile_hits(&rows);
    let cal = calibration_bins(&confidences, &hits, bins);

    let metrics = Metrics {
        samples: rows.len(),
        pearson: pearson(&pred, &real),
        spearman: spearman(&pred, &real),
        precision_at_k: precision_at_k(&pred_rows, &real_rows, k),
        calibration_error: expected_calibration_error(&cal),
    };
    (metrics, cal)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pearson_detects_linear_relation() {
        let xs = [1.0, 2.0, 3.0, 4.0];
        let ys = [2.0, 4.0, 6.0, 8.0];
        assert!((pearson(&xs, &ys).unwrap() - 1.0).abs() < 1e-12);
        let inv = [8.0, 6.0, 4.0, 2.0];
        assert!((pearson(&xs, &inv).unwrap() + 1.0).abs() < 1e-12);
        assert!(pearson(&xs, &[1.0, 1.0, 1.0, 1.0]).is_none());
    }

    #[test]
    fn spearman_ignores_monotone_scale() {
        let xs = [1.0, 2.0, 3.0, 4.0, 5.0];
        let ys = [1.0, 8.0, 27.0, 64.0, 125.0];
        assert!((spearman(&xs, &ys).unwrap() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn ties_share_rank() {
        assert_eq!(average_ranks(&[3.0, 1.0, 3.0]), vec![2.5, 1.0, 2.5]);
    }

    #[test]
    fn precision_counts_overlap() {
        let pred = [(1, 9.0), (2, 8.0), (3, 1.0), (4, 0.5)];
        let real = [(1, 10.0), (2, 0.0), (3, 7.0), (4, 1.0)];
        assert_eq!(precision_at_k(&pred, &real, 2), Some(0.5));
        assert_eq!(precision_at_k(&pred, &real, 0), None);
    }

    #[test]
    fn calibration_error_is_bucket_gap() {
        let conf = [0.95, 0.95, 0.05, 0.05];
        let hits = [true, true, false, false];
        let bins = calibration_bins(&conf, &hits, 10);
        assert_eq!(bins.len(), 10);
        let ece = expected_calibration_error(&bins).unwrap();
        assert!((ece - 0.05).abs() < 1e-12);
    }

    #[test]
    fn perfect_calibration_has_zero_error() {
        let conf = [1.0, 1.0, 0.5, 0.5, 0.0];
        let hits = [true, true, true, false, false];
        let bins = calibration_bins(&conf, &hits, 10);
        let ece = expected_calibration_error(&bins).unwrap();
        assert!(ece.abs() < 1e-12);
        assert_eq!(expected_calibration_error(&calibration_bins(&[], &[], 10)), None);
    }
}
