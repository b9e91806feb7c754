//! Confusion-state IoU accumulator

use crate::model::LabelMap;

/// Mean and per-class IoU from one evaluation run.
///
/// A class with zero true positives, false positives and false negatives
/// has no defined IoU; its entry is `NaN` and it is excluded from the
/// mean. Treating it as zero would bias the mean downward.
#[derive(Debug, Clone)]
pub struct IouSummary {
    pub mean: f64,
    pub per_class: Vec<f64>,
}

/// Accumulates per-class TP/FP/FN counts across batches.
///
/// One accumulator per evaluation run (train or val); counts only grow
/// until `reset`.
#[derive(Debug, Clone)]
pub struct IouAccumulator {
    num_classes: usize,
    ignore_index: Option<u32>,
    tp: Vec<u64>,
    fp: Vec<u64>,
    fn_: Vec<u64>,
}

impl IouAccumulator {
    /// `ignore_index` designates a class whose pixels contribute to no
    /// count, neither as truth nor as prediction.
    pub fn new(num_classes: usize, ignore_index: Option<u32>) -> Self {
        Self {
            num_classes,
            ignore_index,
            tp: vec![0; num_classes],
            fp: vec![0; num_classes],
            fn_: vec![0; num_classes],
        }
    }

    pub fn reset(&mut self) {
        self.tp.fill(0);
        self.fp.fill(0);
        self.fn_.fill(0);
    }

    /// Fold one batch of predicted class maps against ground truth.
    ///
    /// Shapes must match; out-of-range labels are skipped.
    pub fn add_batch(&mut self, predicted: &LabelMap, ground_truth: &LabelMap) {
        debug_assert_eq!(predicted.dim(), ground_truth.dim());

        for (&p, &t) in predicted.iter().zip(ground_truth.iter()) {
            if Some(t) == self.ignore_index || t as usize >= self.num_classes {
                continue;
            }
            if p == t {
                self.tp[t as usize] += 1;
            } else {
                self.fn_[t as usize] += 1;
                if Some(p) != self.ignore_index && (p as usize) < self.num_classes {
                    self.fp[p as usize] += 1;
                }
            }
        }
    }

    /// Mean IoU over defined classes plus the per-class vector
    pub fn get_iou(&self) -> IouSummary {
        let mut per_class = vec![f64::NAN; self.num_classes];
        let mut sum = 0.0;
        let mut defined = 0usize;

        for c in 0..self.num_classes {
            if Some(c as u32) == self.ignore_index {
                continue;
            }
            let denom = self.tp[c] + self.fp[c] + self.fn_[c];
            if denom == 0 {
                continue;
            }
            let iou = self.tp[c] as f64 / denom as f64;
            per_class[c] = iou;
            sum += iou;
            defined += 1;
        }

        let mean = if defined > 0 { sum / defined as f64 } else { f64::NAN };
        IouSummary { mean, per_class }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::Array3;

    fn map(values: Vec<u32>, h: usize, w: usize) -> Array3<u32> {
        Array3::from_shape_vec((1, h, w), values).unwrap()
    }

    #[test]
    fn test_perfect_prediction_is_one() {
        let mut acc = IouAccumulator::new(3, None);
        let gt = map(vec![0, 1, 2, 1], 2, 2);
        acc.add_batch(&gt.clone(), &gt);

        let summary = acc.get_iou();
        assert_abs_diff_eq!(summary.mean, 1.0, epsilon = 1e-12);
        for c in 0..3 {
            assert_abs_diff_eq!(summary.per_class[c], 1.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_fully_wrong_prediction_is_zero() {
        let mut acc = IouAccumulator::new(2, None);
        let gt = map(vec![0, 0, 1, 1], 2, 2);
        let pred = map(vec![1, 1, 0, 0], 2, 2);
        acc.add_batch(&pred, &gt);

        let summary = acc.get_iou();
        assert_abs_diff_eq!(summary.mean, 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(summary.per_class[0], 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(summary.per_class[1], 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_absent_class_is_undefined_not_zero() {
        // Class 2 never appears and is never predicted: it must be NaN
        // and excluded from the mean, not averaged in as zero.
        let mut acc = IouAccumulator::new(3, None);
        let gt = map(vec![0, 0, 1, 1], 2, 2);
        acc.add_batch(&gt.clone(), &gt);

        let summary = acc.get_iou();
        assert!(summary.per_class[2].is_nan());
        assert_abs_diff_eq!(summary.mean, 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_ignore_pixels_contribute_nothing() {
        let mut acc = IouAccumulator::new(3, Some(2));
        // Two ignore pixels, mispredicted in both directions; the other
        // two pixels are correct class 0.
        let gt = map(vec![2, 2, 0, 0], 2, 2);
        let pred = map(vec![0, 1, 0, 0], 2, 2);
        acc.add_batch(&pred, &gt);

        let summary = acc.get_iou();
        assert_abs_diff_eq!(summary.per_class[0], 1.0, epsilon = 1e-12);
        assert!(summary.per_class[1].is_nan());
        assert!(summary.per_class[2].is_nan());
        assert_abs_diff_eq!(summary.mean, 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_predicting_ignore_class_counts_fn_only() {
        let mut acc = IouAccumulator::new(3, Some(2));
        let gt = map(vec![0], 1, 1);
        let pred = map(vec![2], 1, 1);
        acc.add_batch(&pred, &gt);

        // FN for class 0, no FP anywhere.
        let summary = acc.get_iou();
        assert_abs_diff_eq!(summary.per_class[0], 0.0, epsilon = 1e-12);
        assert!(summary.per_class[1].is_nan());
    }

    #[test]
    fn test_accumulates_across_batches() {
        let mut acc = IouAccumulator::new(2, None);
        let gt = map(vec![0, 1], 1, 2);
        acc.add_batch(&map(vec![0, 0], 1, 2), &gt); // class 0: TP=1 FP=1; class 1: FN=1
        acc.add_batch(&map(vec![0, 1], 1, 2), &gt); // class 0: TP=2 FP=1; class 1: TP=1 FN=1

        let summary = acc.get_iou();
        assert_abs_diff_eq!(summary.per_class[0], 2.0 / 3.0, epsilon = 1e-12);
        assert_abs_diff_eq!(summary.per_class[1], 0.5, epsilon = 1e-12);
    }

    #[test]
    fn test_reset_clears_counts() {
        let mut acc = IouAccumulator::new(2, None);
        let gt = map(vec![0, 1], 1, 2);
        acc.add_batch(&map(vec![1, 0], 1, 2), &gt);
        acc.reset();

        let summary = acc.get_iou();
        assert!(summary.mean.is_nan());
        assert!(summary.per_class.iter().all(|v| v.is_nan()));
    }

    #[test]
    fn test_known_confusion() {
        // gt:   [0 0 1]
        // pred: [0 1 1]
        // class 0: TP=1 FP=0 FN=1 -> 0.5
        // class 1: TP=1 FP=1 FN=0 -> 0.5
        let mut acc = IouAccumulator::new(2, None);
        acc.add_batch(&map(vec![0, 1, 1], 1, 3), &map(vec![0, 0, 1], 1, 3));

        let summary = acc.get_iou();
        assert_abs_diff_eq!(summary.per_class[0], 0.5, epsilon = 1e-12);
        assert_abs_diff_eq!(summary.per_class[1], 0.5, epsilon = 1e-12);
        assert_abs_diff_eq!(summary.mean, 0.5, epsilon = 1e-12);
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use ndarray::Array3;
    use proptest::prelude::*;

    proptest! {
        /// Per-class IoU is always in [0, 1] or NaN, and the mean only
        /// averages defined classes.
        #[test]
        fn iou_stays_in_unit_interval(
            labels in proptest::collection::vec(0u32..4, 16),
            preds in proptest::collection::vec(0u32..4, 16),
        ) {
            let gt = Array3::from_shape_vec((1, 4, 4), labels).unwrap();
            let pred = Array3::from_shape_vec((1, 4, 4), preds).unwrap();

            let mut acc = IouAccumulator::new(4, None);
            acc.add_batch(&pred, &gt);
            let summary = acc.get_iou();

            for &v in &summary.per_class {
                prop_assert!(v.is_nan() || (0.0..=1.0).contains(&v));
            }
            prop_assert!(summary.mean.is_nan() || (0.0..=1.0).contains(&summary.mean));
        }

        /// Matching prediction and truth always gives mean IoU 1.
        #[test]
        fn identical_maps_give_perfect_iou(
            labels in proptest::collection::vec(0u32..4, 16),
        ) {
            let gt = Array3::from_shape_vec((1, 4, 4), labels).unwrap();
            let mut acc = IouAccumulator::new(4, None);
            acc.add_batch(&gt.clone(), &gt);
            prop_assert!((acc.get_iou().mean - 1.0).abs() < 1e-12);
        }
    }
}
