//! Segmentation losses over raw logits.

use burn::tensor::{
    activation::{log_sigmoid, sigmoid},
    backend::Backend,
    Tensor,
};

const DICE_EPSILON: f64 = 1e-6;

/// Binary cross-entropy on logits with the positive term scaled by `pos_weight`.
///
/// `-(w * t * log σ(x) + (1 - t) * log σ(-x))`, averaged over every element.
pub fn weighted_bce_with_logits<B: Backend, const D: usize>(
    logits: Tensor<B, D>,
    targets: Tensor<B, D>,
    pos_weight: f64,
) -> Tensor<B, 1> {
    let positive = targets.clone() * log_sigmoid(logits.clone()) * pos_weight;
    let negative = (targets.ones_like() - targets) * log_sigmoid(logits.neg());
    (positive + negative).neg().mean()
}

/// Soft Dice loss `1 - 2|σ(x)·t| / (|σ(x)| + |t|)`.
pub fn dice_loss<B: Backend, const D: usize>(
    logits: Tensor<B, D>,
    targets: Tensor<B, D>,
) -> Tensor<B, 1> {
    let probs = sigmoid(logits);
    let intersection = (probs.clone() * targets.clone()).sum();
    let denominator = probs.sum() + targets.sum() + DICE_EPSILON;
    (intersection * 2.0 / denominator).neg() + 1.0
}

/// Weighted BCE plus Dice, the loss the segmentation trainer minimizes.
pub fn segmentation_loss<B: Backend, const D: usize>(
    logits: Tensor<B, D>,
    targets: Tensor<B, D>,
    pos_weight: f64,
) -> Tensor<B, 1> {
    weighted_bce_with_logits(logits.clone(), targets.clone(), pos_weight) + dice_loss(logits, targets)
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use burn::tensor::ElementConversion;

    type TestBackend = NdArray;

    fn scalar(t: Tensor<TestBackend, 1>) -> f64 {
        t.into_scalar().elem::<f64>()
    }

    #[test]
    fn test_bce_at_zero_logits_is_ln2() {
        let device = Default::default();
        let logits = Tensor::<TestBackend, 2>::zeros([2, 3], &device);
        let targets = Tensor::<TestBackend, 2>::from_floats([[1.0, 0.0, 1.0], [0.0, 0.0, 1.0]], &device);

        let loss = scalar(weighted_bce_with_logits(logits, targets, 1.0));
        assert!((loss - std::f64::consts::LN_2).abs() < 1e-5, "loss {loss}");
    }

    #[test]
    fn test_pos_weight_scales_positive_term() {
        let device = Default::default();
        let logits = Tensor::<TestBackend, 1>::from_floats([0.3, -1.2, 2.0], &device);
        let targets = Tensor::<TestBackend, 1>::ones([3], &device);

        let base = scalar(weighted_bce_with_logits(logits.clone(), targets.clone(), 1.0));
        let doubled = scalar(weighted_bce_with_logits(logits, targets, 2.0));
        assert!((doubled - 2.0 * base).abs() < 1e-5);
    }

    #[test]
    fn test_confident_correct_prediction_has_lower_loss() {
        let device = Default::default();
        let targets = Tensor::<TestBackend, 1>::from_floats([1.0, 0.0, 1.0, 0.0], &device);
        let good = Tensor::<TestBackend, 1>::from_floats([8.0, -8.0, 8.0, -8.0], &device);
        let bad = Tensor::<TestBackend, 1>::from_floats([-8.0, 8.0, -8.0, 8.0], &device);

        let good_loss = scalar(segmentation_loss(good.clone(), targets.clone(), 1.0));
        let bad_loss = scalar(segmentation_loss(bad, targets.clone(), 1.0));
        assert!(good_loss < 0.01, "good {good_loss}");
        assert!(bad_loss > good_loss);

        let dice = scalar(dice_loss(good, targets));
        assert!(dice < 1e-3);
    }
}
