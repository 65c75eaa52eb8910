//! DenseNet classifier.
//!
//! Every layer of a dense block sees the concatenation of all preceding
//! feature maps in that block. Transitions between blocks halve both the
//! channel count and the resolution.

use burn::{
    config::Config,
    module::Module,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        pool::{
            AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig, AvgPool2d, AvgPool2dConfig, MaxPool2d,
            MaxPool2dConfig,
        },
        BatchNorm, BatchNormConfig, Linear, LinearConfig, PaddingConfig2d, Relu,
    },
    tensor::{backend::Backend, Tensor},
};

use super::ClassificationModel;

/// Configuration for [`DenseNet`] (defaults give DenseNet-121)
#[derive(Config, Debug)]
pub struct DenseNetConfig {
    pub num_classes: usize,

    /// Layers per dense block
    #[config(default = "vec![6, 12, 24, 16]")]
    pub block_config: Vec<usize>,

    /// Channels added by each dense layer
    #[config(default = "32")]
    pub growth_rate: usize,

    #[config(default = "64")]
    pub init_features: usize,

    /// Bottleneck width multiplier of the 1x1 convolution
    #[config(default = "4")]
    pub bn_size: usize,

    #[config(default = "3")]
    pub in_channels: usize,
}

impl DenseNetConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> DenseNet<B> {
        let mut features = self.init_features;
        let mut blocks = Vec::with_capacity(self.block_config.len());
        let mut transitions = Vec::new();

        for (i, &layers) in self.block_config.iter().enumerate() {
            let block = DenseBlock::new(layers, features, self.bn_size, self.growth_rate, device);
            features += layers * self.growth_rate;
            blocks.push(block);

            if i + 1 != self.block_config.len() {
                transitions.push(Transition::new(features, features / 2, device));
                features /= 2;
            }
        }

        DenseNet {
            conv0: Conv2dConfig::new([self.in_channels, self.init_features], [7, 7])
                .with_stride([2, 2])
                .with_padding(PaddingConfig2d::Explicit(3, 3))
                .with_bias(false)
                .init(device),
            norm0: BatchNormConfig::new(self.init_features).init(device),
            pool0: MaxPool2dConfig::new([3, 3])
                .with_strides([2, 2])
                .with_padding(PaddingConfig2d::Explicit(1, 1))
                .init(),
            blocks,
            transitions,
            norm_final: BatchNormConfig::new(features).init(device),
            avgpool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
            classifier: LinearConfig::new(features, self.num_classes).init(device),
            activation: Relu::new(),
            num_classes: self.num_classes,
        }
    }
}

/// BN-ReLU-Conv1x1-BN-ReLU-Conv3x3, output concatenated onto the input
#[derive(Module, Debug)]
pub struct DenseLayer<B: Backend> {
    norm1: BatchNorm<B>,
    conv1: Conv2d<B>,
    norm2: BatchNorm<B>,
    conv2: Conv2d<B>,
    activation: Relu,
}

impl<B: Backend> DenseLayer<B> {
    pub fn new(in_channels: usize, bn_size: usize, growth_rate: usize, device: &B::Device) -> Self {
        let inner = bn_size * growth_rate;
        Self {
            norm1: BatchNormConfig::new(in_channels).init(device),
            conv1: Conv2dConfig::new([in_channels, inner], [1, 1])
                .with_bias(false)
                .init(device),
            norm2: BatchNormConfig::new(inner).init(device),
            conv2: Conv2dConfig::new([inner, growth_rate], [3, 3])
                .with_padding(PaddingConfig2d::Explicit(1, 1))
                .with_bias(false)
                .init(device),
            activation: Relu::new(),
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let out = self.conv1.forward(self.activation.forward(self.norm1.forward(x.clone())));
        let out = self.conv2.forward(self.activation.forward(self.norm2.forward(out)));
        Tensor::cat(vec![x, out], 1)
    }
}

#[derive(Module, Debug)]
pub struct DenseBlock<B: Backend> {
    layers: Vec<DenseLayer<B>>,
}

impl<B: Backend> DenseBlock<B> {
    pub fn new(
        num_layers: usize,
        in_channels: usize,
        bn_size: usize,
        growth_rate: usize,
        device: &B::Device,
    ) -> Self {
        let layers = (0..num_layers)
            .map(|i| DenseLayer::new(in_channels + i * growth_rate, bn_size, growth_rate, device))
            .collect();
        Self { layers }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        self.layers.iter().fold(x, |x, layer| layer.forward(x))
    }
}

/// BN-ReLU-Conv1x1 followed by 2x2 average pooling
#[derive(Module, Debug)]
pub struct Transition<B: Backend> {
    norm: BatchNorm<B>,
    conv: Conv2d<B>,
    pool: AvgPool2d,
    activation: Relu,
}

impl<B: Backend> Transition<B> {
    pub fn new(in_channels: usize, out_channels: usize, device: &B::Device) -> Self {
        Self {
            norm: BatchNormConfig::new(in_channels).init(device),
            conv: Conv2dConfig::new([in_channels, out_channels], [1, 1])
                .with_bias(false)
                .init(device),
            pool: AvgPool2dConfig::new([2, 2]).with_strides([2, 2]).init(),
            activation: Relu::new(),
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.conv.forward(self.activation.forward(self.norm.forward(x)));
        self.pool.forward(x)
    }
}

/// DenseNet classifier
#[derive(Module, Debug)]
pub struct DenseNet<B: Backend> {
    conv0: Conv2d<B>,
    norm0: BatchNorm<B>,
    pool0: MaxPool2d,
    blocks: Vec<DenseBlock<B>>,
    transitions: Vec<Transition<B>>,
    norm_final: BatchNorm<B>,
    avgpool: AdaptiveAvgPool2d,
    classifier: Linear<B>,
    activation: Relu,
    num_classes: usize,
}

impl<B: Backend> DenseNet<B> {
    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 2> {
        let x = self.activation.forward(self.norm0.forward(self.conv0.forward(input)));
        let mut x = self.pool0.forward(x);

        for (i, block) in self.blocks.iter().enumerate() {
            x = block.forward(x);
            if let Some(transition) = self.transitions.get(i) {
                x = transition.forward(x);
            }
        }

        let x = self.activation.forward(self.norm_final.forward(x));
        let x = self.avgpool.forward(x);
        let [batch, channels, _, _] = x.dims();
        self.classifier.forward(x.reshape([batch, channels]))
    }
}

impl<B: Backend> ClassificationModel<B> for DenseNet<B> {
    fn predict(&self, input: Tensor<B, 4>) -> Tensor<B, 2> {
        self.forward(input)
    }

    fn num_classes(&self) -> usize {
        self.num_classes
    }
}
