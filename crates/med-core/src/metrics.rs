//! Evaluation metrics for segmentation masks and binary label sequences.
//!
//! All functions expect already-aligned inputs. A size or length mismatch is a
//! programming error and panics.

use std::fmt;
use std::ops::Add;

use serde::{Deserialize, Serialize};

/// Foreground sentinel of a binary pixel map
pub const FOREGROUND: u8 = 255;
/// Background sentinel of a binary pixel map
pub const BACKGROUND: u8 = 0;

/// Single-channel 8-bit pixel map stored row-major
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PixelMap {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

impl PixelMap {
    pub fn new(width: u32, height: u32, data: Vec<u8>) -> Self {
        assert_eq!(
            data.len(),
            width as usize * height as usize,
            "pixel buffer does not match {width}x{height}"
        );
        Self {
            width,
            height,
            data,
        }
    }

    /// Builds a map from rows of equal length
    pub fn from_rows(rows: &[&[u8]]) -> Self {
        let height = rows.len() as u32;
        let width = rows.first().map(|r| r.len()).unwrap_or(0) as u32;
        let data = rows.iter().flat_map(|r| r.iter().copied()).collect();
        Self::new(width, height, data)
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    fn is_foreground(&self, index: usize) -> bool {
        self.data[index] == FOREGROUND
    }

    fn assert_aligned(&self, other: &PixelMap) {
        assert_eq!(
            (self.width, self.height),
            (other.width, other.height),
            "pixel maps must have identical dimensions"
        );
    }
}

/// True/false positive/negative tallies of one comparison
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfusionCounts {
    pub tp: u64,
    pub fp: u64,
    pub fn_: u64,
    pub tn: u64,
}

fn ratio(numerator: f64, denominator: f64) -> f64 {
    if denominator > 0.0 {
        numerator / denominator
    } else {
        0.0
    }
}

impl ConfusionCounts {
    fn record(&mut self, predicted: bool, actual: bool) {
        match (predicted, actual) {
            (true, true) => self.tp += 1,
            (true, false) => self.fp += 1,
            (false, true) => self.fn_ += 1,
            (false, false) => self.tn += 1,
        }
    }

    pub fn total(&self) -> u64 {
        self.tp + self.fp + self.fn_ + self.tn
    }

    pub fn accuracy(&self) -> f64 {
        ratio((self.tp + self.tn) as f64, self.total() as f64)
    }

    pub fn precision(&self) -> f64 {
        ratio(self.tp as f64, (self.tp + self.fp) as f64)
    }

    pub fn recall(&self) -> f64 {
        ratio(self.tp as f64, (self.tp + self.fn_) as f64)
    }

    pub fn f1(&self) -> f64 {
        let (p, r) = (self.precision(), self.recall());
        ratio(2.0 * p * r, p + r)
    }

    pub fn dice(&self) -> f64 {
        ratio(
            2.0 * self.tp as f64,
            (2 * self.tp + self.fp + self.fn_) as f64,
        )
    }

    pub fn iou(&self) -> f64 {
        ratio(self.tp as f64, (self.tp + self.fp + self.fn_) as f64)
    }
}

/// Confusion counts of two binary pixel maps. Only `FOREGROUND` counts as positive.
pub fn pixel_confusion(pred: &PixelMap, gt: &PixelMap) -> ConfusionCounts {
    pred.assert_aligned(gt);
    let mut counts = ConfusionCounts::default();
    for i in 0..pred.len() {
        counts.record(pred.is_foreground(i), gt.is_foreground(i));
    }
    counts
}

/// Confusion counts of two binary label sequences with `1` as positive.
pub fn label_confusion(pred: &[u8], gt: &[u8]) -> ConfusionCounts {
    assert_eq!(pred.len(), gt.len(), "label sequences must have equal length");
    let mut counts = ConfusionCounts::default();
    for (&p, &g) in pred.iter().zip(gt) {
        counts.record(p == 1, g == 1);
    }
    counts
}

/// Element types the mean absolute error accepts.
pub trait Intensity: Copy {
    fn to_f64(self) -> f64;
}

impl Intensity for u8 {
    fn to_f64(self) -> f64 {
        self as f64
    }
}

impl Intensity for f32 {
    fn to_f64(self) -> f64 {
        self as f64
    }
}

/// Mean absolute per-element difference, in the units of the inputs.
pub fn mean_absolute_error<T: Intensity>(pred: &[T], gt: &[T]) -> f64 {
    assert_eq!(pred.len(), gt.len(), "MAE inputs must have equal length");
    if pred.is_empty() {
        return 0.0;
    }
    let sum: f64 = pred
        .iter()
        .zip(gt)
        .map(|(&p, &g)| (p.to_f64() - g.to_f64()).abs())
        .sum();
    sum / pred.len() as f64
}

/// Symmetric Hausdorff distance between the foreground sets of two masks.
///
/// Returns 0 when both masks are empty and the image diagonal when exactly one is.
pub fn hausdorff(pred: &PixelMap, gt: &PixelMap) -> f64 {
    pred.assert_aligned(gt);

    let pred_any = pred.data.iter().any(|&v| v == FOREGROUND);
    let gt_any = gt.data.iter().any(|&v| v == FOREGROUND);
    match (pred_any, gt_any) {
        (false, false) => return 0.0,
        (true, false) | (false, true) => {
            let (w, h) = (pred.width as f64, pred.height as f64);
            return (w * w + h * h).sqrt();
        }
        (true, true) => {}
    }

    let dist_to_pred = distance_to_foreground(pred);
    let dist_to_gt = distance_to_foreground(gt);

    let directed = |from: &PixelMap, dist: &[f64]| {
        (0..from.len())
            .filter(|&i| from.is_foreground(i))
            .map(|i| dist[i])
            .fold(0.0_f64, f64::max)
    };

    directed(pred, &dist_to_gt).max(directed(gt, &dist_to_pred))
}

/// Exact Euclidean distance from every pixel to the nearest foreground pixel.
fn distance_to_foreground(map: &PixelMap) -> Vec<f64> {
    let (w, h) = (map.width as usize, map.height as usize);
    let mut grid: Vec<f64> = map
        .data
        .iter()
        .map(|&v| if v == FOREGROUND { 0.0 } else { f64::INFINITY })
        .collect();

    let mut column = vec![0.0; h];
    let mut out = vec![0.0; h.max(w)];
    for x in 0..w {
        for y in 0..h {
            column[y] = grid[y * w + x];
        }
        squared_distance_1d(&column, &mut out[..h]);
        for y in 0..h {
            grid[y * w + x] = out[y];
        }
    }

    let mut row = vec![0.0; w];
    for y in 0..h {
        row.copy_from_slice(&grid[y * w..(y + 1) * w]);
        squared_distance_1d(&row, &mut out[..w]);
        grid[y * w..(y + 1) * w].copy_from_slice(&out[..w]);
    }

    grid.into_iter().map(f64::sqrt).collect()
}

/// One-dimensional squared distance transform (Felzenszwalb & Huttenlocher).
fn squared_distance_1d(f: &[f64], d: &mut [f64]) {
    let n = f.len();
    if n == 0 {
        return;
    }

    let mut v = vec![0usize; n];
    let mut z = vec![0.0f64; n + 1];
    let mut k = 0usize;
    let mut started = false;

    for q in 0..n {
        if !f[q].is_finite() {
            continue;
        }
        if !started {
            v[0] = q;
            z[0] = f64::NEG_INFINITY;
            z[1] = f64::INFINITY;
            started = true;
            continue;
        }
        loop {
            let p = v[k];
            let s = ((f[q] + (q * q) as f64) - (f[p] + (p * p) as f64)) / (2.0 * (q as f64 - p as f64));
            // z[0] is -inf, so k never underflows
            if s <= z[k] {
                k -= 1;
            } else {
                k += 1;
                v[k] = q;
                z[k] = s;
                z[k + 1] = f64::INFINITY;
                break;
            }
        }
    }

    if !started {
        d.iter_mut().for_each(|x| *x = f64::INFINITY);
        return;
    }

    k = 0;
    for (q, out) in d.iter_mut().enumerate() {
        while z[k + 1] < q as f64 {
            k += 1;
        }
        let p = v[k];
        let diff = q as f64 - p as f64;
        *out = diff * diff + f[p];
    }
}

/// Per-image segmentation scores, also used for sums and means
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SegmentationScores {
    pub accuracy: f64,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub dice: f64,
    pub iou: f64,
    pub mae: f64,
    pub hausdorff: f64,
}

impl SegmentationScores {
    /// Scores a binary prediction against a binary ground truth.
    pub fn compute(pred: &PixelMap, gt: &PixelMap) -> Self {
        let counts = pixel_confusion(pred, gt);
        Self {
            accuracy: counts.accuracy(),
            precision: counts.precision(),
            recall: counts.recall(),
            f1: counts.f1(),
            dice: counts.dice(),
            iou: counts.iou(),
            mae: mean_absolute_error(&pred.data, &gt.data),
            hausdorff: hausdorff(pred, gt),
        }
    }

    fn scale(self, factor: f64) -> Self {
        Self {
            accuracy: self.accuracy * factor,
            precision: self.precision * factor,
            recall: self.recall * factor,
            f1: self.f1 * factor,
            dice: self.dice * factor,
            iou: self.iou * factor,
            mae: self.mae * factor,
            hausdorff: self.hausdorff * factor,
        }
    }
}

impl Add for SegmentationScores {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self {
            accuracy: self.accuracy + rhs.accuracy,
            precision: self.precision + rhs.precision,
            recall: self.recall + rhs.recall,
            f1: self.f1 + rhs.f1,
            dice: self.dice + rhs.dice,
            iou: self.iou + rhs.iou,
            mae: self.mae + rhs.mae,
            hausdorff: self.hausdorff + rhs.hausdorff,
        }
    }
}

impl fmt::Display for SegmentationScores {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "  Accuracy:  {:.4}", self.accuracy)?;
        writeln!(f, "  Precision: {:.4}", self.precision)?;
        writeln!(f, "  Recall:    {:.4}", self.recall)?;
        writeln!(f, "  F1:        {:.4}", self.f1)?;
        writeln!(f, "  Dice:      {:.4}", self.dice)?;
        writeln!(f, "  IoU:       {:.4}", self.iou)?;
        writeln!(f, "  MAE:       {:.4}", self.mae)?;
        write!(f, "  Hausdorff: {:.4}", self.hausdorff)
    }
}

/// Running sums of per-image scores for one evaluation pass
#[derive(Debug, Clone, Default)]
pub struct MetricAccumulator {
    sums: SegmentationScores,
    count: usize,
}

impl MetricAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn push(&mut self, scores: SegmentationScores) {
        self.sums = self.sums + scores;
        self.count += 1;
    }

    pub fn count(&self) -> usize {
        self.count
    }

    /// Per-metric means, or `None` when nothing was pushed
    pub fn means(&self) -> Option<SegmentationScores> {
        (self.count > 0).then(|| self.sums.scale(1.0 / self.count as f64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f64 = 1e-9;

    fn assert_close(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() < 1e-3,
            "expected {expected}, got {actual}"
        );
    }

    fn assert_bounded(counts: &ConfusionCounts) {
        for score in [
            counts.accuracy(),
            counts.precision(),
            counts.recall(),
            counts.f1(),
            counts.dice(),
            counts.iou(),
        ] {
            assert!((0.0..=1.0).contains(&score), "score {score} out of range");
            assert!(score.is_finite());
        }
    }

    #[test]
    fn test_pixel_diagonal_prediction() {
        let pred = PixelMap::from_rows(&[&[255, 0], &[0, 255]]);
        let gt = PixelMap::from_rows(&[&[255, 0], &[255, 0]]);

        let counts = pixel_confusion(&pred, &gt);
        assert_eq!(
            counts,
            ConfusionCounts {
                tp: 1,
                fp: 1,
                fn_: 1,
                tn: 1
            }
        );
        assert_eq!(counts.total(), 4);
    }

    #[test]
    fn test_pixel_metrics_partial_overlap() {
        let pred = PixelMap::from_rows(&[&[255, 0], &[0, 0]]);
        let gt = PixelMap::from_rows(&[&[255, 0], &[255, 0]]);

        let counts = pixel_confusion(&pred, &gt);
        assert_eq!((counts.tp, counts.fp, counts.fn_, counts.tn), (1, 0, 1, 2));
        assert_close(counts.accuracy(), 0.75);
        assert_close(counts.precision(), 1.0);
        assert_close(counts.recall(), 0.5);
        assert_close(counts.f1(), 0.667);
        assert_close(counts.dice(), 0.667);
        assert_close(counts.iou(), 0.5);
    }

    #[test]
    fn test_label_metrics() {
        let counts = label_confusion(&[1, 0, 1, 1], &[1, 0, 0, 1]);
        assert_eq!((counts.tp, counts.fp, counts.fn_, counts.tn), (2, 1, 0, 1));
        assert_close(counts.accuracy(), 0.75);
        assert_close(counts.precision(), 0.667);
        assert_close(counts.recall(), 1.0);
        assert_bounded(&counts);
    }

    #[test]
    fn test_counts_sum_to_unit_count() {
        let pred = PixelMap::new(3, 3, vec![255, 0, 7, 0, 255, 255, 128, 0, 255]);
        let gt = PixelMap::new(3, 3, vec![0, 0, 255, 255, 255, 0, 255, 3, 255]);
        let counts = pixel_confusion(&pred, &gt);
        assert_eq!(counts.total(), 9);
        assert_bounded(&counts);

        let labels = label_confusion(&[0, 1, 1, 0, 2], &[1, 1, 0, 0, 1]);
        assert_eq!(labels.total(), 5);
    }

    #[test]
    fn test_zero_denominators_degrade_to_zero() {
        let empty = ConfusionCounts::default();
        assert_eq!(empty.accuracy(), 0.0);
        assert_eq!(empty.precision(), 0.0);
        assert_eq!(empty.recall(), 0.0);
        assert_eq!(empty.f1(), 0.0);
        assert_eq!(empty.dice(), 0.0);
        assert_eq!(empty.iou(), 0.0);

        let all_negative = label_confusion(&[0, 0, 0], &[0, 0, 0]);
        assert_eq!(all_negative.accuracy(), 1.0);
        assert_eq!(all_negative.precision(), 0.0);
        assert_eq!(all_negative.dice(), 0.0);
        assert_bounded(&all_negative);
    }

    #[test]
    fn test_dice_iou_identity() {
        let counts = ConfusionCounts {
            tp: 7,
            fp: 3,
            fn_: 5,
            tn: 11,
        };
        let lhs = 1.0 / counts.dice();
        let rhs = 0.5 + (counts.fp + counts.fn_) as f64 / (4.0 * counts.tp as f64);
        assert!((lhs - rhs).abs() < EPS);
        // Dice and IoU are tied by D = 2J / (1 + J)
        let j = counts.iou();
        assert!((counts.dice() - 2.0 * j / (1.0 + j)).abs() < EPS);
    }

    #[test]
    #[should_panic(expected = "identical dimensions")]
    fn test_mismatched_maps_panic() {
        let a = PixelMap::new(2, 1, vec![0, 255]);
        let b = PixelMap::new(1, 2, vec![0, 255]);
        pixel_confusion(&a, &b);
    }

    #[test]
    fn test_mae_units() {
        assert_eq!(mean_absolute_error(&[255u8, 0, 0, 0], &[0u8, 0, 0, 0]), 63.75);
        assert!((mean_absolute_error(&[0.5f32, 1.0], &[0.0f32, 1.0]) - 0.25).abs() < EPS);
        assert_eq!(mean_absolute_error::<u8>(&[], &[]), 0.0);
    }

    #[test]
    fn test_hausdorff_known_distance() {
        let mut pred = vec![0u8; 25];
        let mut gt = vec![0u8; 25];
        pred[0] = 255; // (0,0)
        gt[0] = 255; // (0,0)
        gt[4 * 5 + 3] = 255; // (3,4)
        let pred = PixelMap::new(5, 5, pred);
        let gt = PixelMap::new(5, 5, gt);

        assert!((hausdorff(&pred, &gt) - 5.0).abs() < EPS);
    }

    #[test]
    fn test_hausdorff_is_symmetric() {
        let a = PixelMap::new(
            6,
            4,
            vec![
                0, 255, 255, 0, 0, 0, //
                0, 255, 0, 0, 0, 0, //
                0, 0, 0, 0, 0, 0, //
                0, 0, 0, 0, 0, 255,
            ],
        );
        let b = PixelMap::new(
            6,
            4,
            vec![
                0, 0, 0, 0, 0, 0, //
                0, 0, 255, 255, 0, 0, //
                0, 0, 255, 0, 0, 0, //
                0, 0, 0, 0, 0, 0,
            ],
        );
        let ab = hausdorff(&a, &b);
        let ba = hausdorff(&b, &a);
        assert!((ab - ba).abs() < EPS);
        assert!(ab > 0.0);
    }

    #[test]
    fn test_hausdorff_identical_and_empty() {
        let a = PixelMap::from_rows(&[&[255, 0], &[0, 255]]);
        assert_eq!(hausdorff(&a, &a), 0.0);

        let empty = PixelMap::new(3, 4, vec![0; 12]);
        assert_eq!(hausdorff(&empty, &empty), 0.0);

        let mut one = vec![0u8; 12];
        one[5] = 255;
        let one = PixelMap::new(3, 4, one);
        assert!((hausdorff(&one, &empty) - 5.0).abs() < EPS);
        assert_eq!(hausdorff(&one, &empty), hausdorff(&empty, &one));
    }

    #[test]
    fn test_distance_transform_matches_brute_force() {
        let map = PixelMap::new(
            7,
            5,
            vec![
                0, 0, 0, 0, 0, 0, 0, //
                0, 255, 0, 0, 0, 0, 0, //
                0, 0, 0, 0, 0, 0, 0, //
                0, 0, 0, 0, 0, 0, 255, //
                0, 0, 255, 0, 0, 0, 0,
            ],
        );
        let dist = distance_to_foreground(&map);
        let fg: Vec<(i64, i64)> = (0..map.len())
            .filter(|&i| map.is_foreground(i))
            .map(|i| ((i % 7) as i64, (i / 7) as i64))
            .collect();
        for (i, &d) in dist.iter().enumerate() {
            let (x, y) = ((i % 7) as i64, (i / 7) as i64);
            let expected = fg
                .iter()
                .map(|&(fx, fy)| (((fx - x).pow(2) + (fy - y).pow(2)) as f64).sqrt())
                .fold(f64::INFINITY, f64::min);
            assert!((d - expected).abs() < EPS, "pixel {i}: {d} vs {expected}");
        }
    }

    #[test]
    fn test_segmentation_scores_and_accumulator() {
        let pred = PixelMap::from_rows(&[&[255, 0], &[0, 0]]);
        let gt = PixelMap::from_rows(&[&[255, 0], &[255, 0]]);
        let scores = SegmentationScores::compute(&pred, &gt);
        assert_close(scores.accuracy, 0.75);
        assert_close(scores.mae, 63.75);
        assert_close(scores.hausdorff, 1.0);

        let mut acc = MetricAccumulator::new();
        assert!(acc.means().is_none());

        acc.push(scores);
        acc.push(SegmentationScores::compute(&gt, &gt));
        assert_eq!(acc.count(), 2);
        let means = acc.means().unwrap();
        assert_close(means.accuracy, 0.875);
        assert_close(means.iou, 0.75);

        acc.reset();
        assert_eq!(acc.count(), 0);
        assert!(acc.means().is_none());
    }
}
