//! Weight reconciliation across architecture variants
//!
//! Maps source weights onto a target parameter set whose key names or
//! shapes may differ. Deterministic: source keys are visited in their
//! total (sorted) order and every decision depends only on the two
//! parameter sets and the policy.

use ndarray::{ArrayD, Axis};

use crate::model::ParamMap;

/// Name conventions used during reconciliation.
#[derive(Debug, Clone)]
pub struct ReconcilePolicy {
    /// Prefix marking replicated/wrapped parameter sets; stripped when an
    /// exact match fails.
    pub wrapper_prefix: String,
    /// Substring markers that identify final/output-layer parameters,
    /// which are allowed to grow along their leading axis.
    pub output_markers: Vec<String>,
}

impl Default for ReconcilePolicy {
    fn default() -> Self {
        Self {
            wrapper_prefix: "module.".to_string(),
            output_markers: vec![
                "output_conv".to_string(),
                "conv_out".to_string(),
                "transposed_conv".to_string(),
            ],
        }
    }
}

impl ReconcilePolicy {
    fn is_output_parameter(&self, name: &str) -> bool {
        self.output_markers.iter().any(|m| name.contains(m))
    }
}

/// Outcome of reconciling one source weight set against a target.
///
/// `applied` is keyed by target names. `skipped` holds source names with
/// no target counterpart; `mismatched` holds names that matched but whose
/// shapes were incompatible. Both lists preserve source key order.
#[derive(Debug, Clone, Default)]
pub struct ReconcileReport {
    pub applied: ParamMap,
    pub skipped: Vec<String>,
    pub mismatched: Vec<String>,
}

impl ReconcileReport {
    /// True when every source weight was applied unchanged
    pub fn is_clean(&self) -> bool {
        self.skipped.is_empty() && self.mismatched.is_empty()
    }
}

/// Reconcile `source` weights against `target` parameters.
///
/// Per source key, in order:
/// 1. Exact name match: copy if shapes match.
/// 2. Otherwise strip the wrapper prefix and retry: copy if shapes match.
/// 3. Matched name with differing shape: for output-layer parameters,
///    copy the overlapping leading slice into a zero-initialized array of
///    the target shape (grows or shrinks the class axis); anything else
///    is recorded as mismatched.
/// 4. No match at all: recorded as skipped.
///
/// Pure function: never writes, never fails on partial matches. Callers
/// decide whether a non-clean report aborts the run.
pub fn reconcile(target: &ParamMap, source: &ParamMap, policy: &ReconcilePolicy) -> ReconcileReport {
    let mut report = ReconcileReport::default();

    for (key, value) in source {
        let resolved = if target.contains_key(key) {
            Some(key.as_str())
        } else {
            key.strip_prefix(&policy.wrapper_prefix)
                .filter(|stripped| target.contains_key(*stripped))
        };

        let Some(name) = resolved else {
            report.skipped.push(key.clone());
            continue;
        };
        let existing = &target[name];

        if existing.shape() == value.shape() {
            report.applied.insert(name.to_string(), value.clone());
        } else if policy.is_output_parameter(name) {
            match grow_leading_axis(existing, value) {
                Some(grown) => {
                    report.applied.insert(name.to_string(), grown);
                }
                None => report.mismatched.push(key.clone()),
            }
        } else {
            report.mismatched.push(key.clone());
        }
    }

    report
}

/// Copy the overlapping leading slice of `source` into a zero array of
/// `target`'s shape. Only the leading axis may differ; rows beyond the
/// overlap keep the zero initialization.
fn grow_leading_axis(target: &ArrayD<f32>, source: &ArrayD<f32>) -> Option<ArrayD<f32>> {
    if target.ndim() != source.ndim() || target.ndim() == 0 {
        return None;
    }
    if target.shape()[1..] != source.shape()[1..] {
        return None;
    }

    let overlap = target.shape()[0].min(source.shape()[0]);
    let mut grown = ArrayD::<f32>::zeros(target.raw_dim());
    grown
        .slice_axis_mut(Axis(0), (0..overlap).into())
        .assign(&source.slice_axis(Axis(0), (0..overlap).into()));
    Some(grown)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn arr(shape: &[usize], fill: f32) -> ArrayD<f32> {
        ArrayD::from_elem(shape.to_vec(), fill)
    }

    fn params(entries: &[(&str, &[usize], f32)]) -> ParamMap {
        entries
            .iter()
            .map(|(name, shape, fill)| (name.to_string(), arr(shape, *fill)))
            .collect()
    }

    #[test]
    fn test_identical_sets_apply_cleanly() {
        let target = params(&[("a.weight", &[2, 3], 0.0), ("b.bias", &[2], 0.0)]);
        let source = params(&[("a.weight", &[2, 3], 1.0), ("b.bias", &[2], 2.0)]);

        let report = reconcile(&target, &source, &ReconcilePolicy::default());
        assert!(report.is_clean());
        assert_eq!(report.applied.len(), 2);
        assert_eq!(report.applied["a.weight"], source["a.weight"]);
        assert_eq!(report.applied["b.bias"], source["b.bias"]);
    }

    #[test]
    fn test_wrapper_prefix_is_stripped() {
        let target = params(&[("encoder.conv.weight", &[4, 4], 0.0)]);
        let source = params(&[("module.encoder.conv.weight", &[4, 4], 3.0)]);

        let report = reconcile(&target, &source, &ReconcilePolicy::default());
        assert!(report.is_clean());
        assert_eq!(report.applied["encoder.conv.weight"], arr(&[4, 4], 3.0));
    }

    #[test]
    fn test_unmatched_name_is_skipped_not_fatal() {
        let target = params(&[("a.weight", &[2], 0.0)]);
        let source = params(&[("a.weight", &[2], 1.0), ("z.weight", &[2], 1.0)]);

        let report = reconcile(&target, &source, &ReconcilePolicy::default());
        assert_eq!(report.skipped, vec!["z.weight".to_string()]);
        assert_eq!(report.applied.len(), 1);
    }

    #[test]
    fn test_output_layer_grows_with_zero_padding() {
        // Target output layer has 4 classes, source has 2: the two
        // overlapping rows copy over, the new rows stay zero.
        let target = params(&[("decoder.output_conv.weight", &[4, 3], 0.0)]);
        let mut source = ParamMap::new();
        source.insert(
            "decoder.output_conv.weight".to_string(),
            ArrayD::from_shape_vec(vec![2, 3], vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap(),
        );

        let report = reconcile(&target, &source, &ReconcilePolicy::default());
        assert!(report.is_clean());

        let grown = &report.applied["decoder.output_conv.weight"];
        assert_eq!(grown.shape(), &[4, 3]);
        assert_eq!(grown[[0, 0]], 1.0);
        assert_eq!(grown[[1, 2]], 6.0);
        assert_eq!(grown[[2, 0]], 0.0);
        assert_eq!(grown[[3, 2]], 0.0);
    }

    #[test]
    fn test_output_layer_shrinks_to_overlap() {
        let target = params(&[("conv_out.weight", &[2, 3], 0.0)]);
        let source = params(&[("conv_out.weight", &[5, 3], 7.0)]);

        let report = reconcile(&target, &source, &ReconcilePolicy::default());
        assert!(report.is_clean());
        assert_eq!(report.applied["conv_out.weight"], arr(&[2, 3], 7.0));
    }

    #[test]
    fn test_non_output_shape_mismatch_is_recorded() {
        let target = params(&[("encoder.conv.weight", &[4, 3], 0.0)]);
        let source = params(&[("encoder.conv.weight", &[2, 3], 1.0)]);

        let report = reconcile(&target, &source, &ReconcilePolicy::default());
        assert!(report.applied.is_empty());
        assert_eq!(report.mismatched, vec!["encoder.conv.weight".to_string()]);
    }

    #[test]
    fn test_output_layer_trailing_dims_must_match() {
        let target = params(&[("output_conv.weight", &[4, 3], 0.0)]);
        let source = params(&[("output_conv.weight", &[2, 5], 1.0)]);

        let report = reconcile(&target, &source, &ReconcilePolicy::default());
        assert_eq!(report.mismatched, vec!["output_conv.weight".to_string()]);
    }

    #[test]
    fn test_reconcile_is_pure() {
        let target = params(&[("a.weight", &[2], 0.0)]);
        let source = params(&[("a.weight", &[2], 1.0)]);
        let target_before = target.clone();
        let source_before = source.clone();

        let _ = reconcile(&target, &source, &ReconcilePolicy::default());
        assert_eq!(target, target_before);
        assert_eq!(source, source_before);
    }

    #[test]
    fn test_prefixed_and_unknown_mix() {
        let target = params(&[
            ("encoder.weight", &[2], 0.0),
            ("decoder.output_conv.weight", &[3, 2], 0.0),
        ]);
        let mut source = BTreeMap::new();
        source.insert("module.encoder.weight".to_string(), arr(&[2], 1.0));
        source.insert(
            "module.decoder.output_conv.weight".to_string(),
            arr(&[2, 2], 2.0),
        );
        source.insert("module.unknown.weight".to_string(), arr(&[2], 3.0));

        let report = reconcile(&target, &source, &ReconcilePolicy::default());
        assert_eq!(report.applied.len(), 2);
        assert_eq!(report.skipped, vec!["module.unknown.weight".to_string()]);
        assert!(report.mismatched.is_empty());

        let grown = &report.applied["decoder.output_conv.weight"];
        assert_eq!(grown.shape(), &[3, 2]);
        assert_eq!(grown[[2, 0]], 0.0);
    }
}
