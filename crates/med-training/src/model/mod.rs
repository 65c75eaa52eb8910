//! Model architectures and the interfaces the trainers drive them through.

pub mod densenet;
pub mod resnet;
pub mod unet;

pub use densenet::{DenseNet, DenseNetConfig};
pub use resnet::{ResNet, ResNetConfig};
pub use unet::{UNet, UNetConfig};

use burn::{module::Module, tensor::backend::Backend, tensor::Tensor};
use med_core::{Error, ModelKind, ResNetDepth, Result};

/// A network producing per-pixel logits `[N, 1, H, W]` from `[N, C, H, W]`
pub trait SegmentationModel<B: Backend>: Module<B> {
    fn predict(&self, input: Tensor<B, 4>) -> Tensor<B, 4>;
}

/// A network producing class logits `[N, num_classes]` from `[N, 3, H, W]`
pub trait ClassificationModel<B: Backend>: Module<B> {
    fn predict(&self, input: Tensor<B, 4>) -> Tensor<B, 2>;

    fn num_classes(&self) -> usize;
}

/// Whichever classifier a run selected
#[derive(Module, Debug)]
pub enum ClassifierNet<B: Backend> {
    ResNet(ResNet<B>),
    DenseNet(DenseNet<B>),
}

impl<B: Backend> ClassifierNet<B> {
    /// Builds the classifier for `kind` with ImageNet-sized defaults.
    pub fn new(
        kind: ModelKind,
        depth: ResNetDepth,
        num_classes: usize,
        device: &B::Device,
    ) -> Result<Self> {
        if num_classes == 0 {
            return Err(Error::config("model", "a classifier needs at least one class"));
        }

        match kind {
            ModelKind::Resnet => Ok(ClassifierNet::ResNet(
                ResNetConfig::new(num_classes).with_depth(depth).init(device),
            )),
            ModelKind::Densenet => Ok(ClassifierNet::DenseNet(
                DenseNetConfig::new(num_classes).init(device),
            )),
            ModelKind::Unet => Err(Error::config(
                "model",
                "unet is a segmentation model, not a classifier",
            )),
        }
    }
}

impl<B: Backend> ClassificationModel<B> for ClassifierNet<B> {
    fn predict(&self, input: Tensor<B, 4>) -> Tensor<B, 2> {
        match self {
            ClassifierNet::ResNet(model) => model.predict(input),
            ClassifierNet::DenseNet(model) => model.predict(input),
        }
    }

    fn num_classes(&self) -> usize {
        match self {
            ClassifierNet::ResNet(model) => model.num_classes(),
            ClassifierNet::DenseNet(model) => model.num_classes(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray;

    #[test]
    fn test_unet_is_not_a_classifier() {
        let device = Default::default();
        let result = ClassifierNet::<TestBackend>::new(ModelKind::Unet, ResNetDepth::R18, 2, &device);
        assert!(matches!(result, Err(Error::Config { .. })));
    }

    #[test]
    fn test_zero_classes_rejected() {
        let device = Default::default();
        let result =
            ClassifierNet::<TestBackend>::new(ModelKind::Resnet, ResNetDepth::R18, 0, &device);
        assert!(result.is_err());
    }

    #[test]
    fn test_classifier_dispatch() {
        let device = Default::default();
        let net = ClassifierNet::DenseNet(
            DenseNetConfig::new(3)
                .with_block_config(vec![1])
                .with_growth_rate(2)
                .with_init_features(4)
                .with_bn_size(1)
                .init::<TestBackend>(&device),
        );
        assert_eq!(net.num_classes(), 3);

        let logits = net.predict(Tensor::zeros([1, 3, 16, 16], &device));
        assert_eq!(logits.dims(), [1, 3]);
    }
}
