//! ResNet classifiers (18/34 with basic blocks, 50/101/152 with bottlenecks).
//!
//! Architecture:
//! - Conv 7x7 stride 2, BatchNorm, ReLU, MaxPool 3x3 stride 2
//! - Four residual stages; stages 2-4 halve the resolution in their first block
//! - Global average pooling and a linear head

use burn::{
    config::Config,
    module::Module,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig, MaxPool2d, MaxPool2dConfig},
        BatchNorm, BatchNormConfig, Linear, LinearConfig, PaddingConfig2d, Relu,
    },
    tensor::{backend::Backend, Tensor},
};
use med_core::ResNetDepth;

use super::ClassificationModel;

/// Configuration for [`ResNet`]
#[derive(Config, Debug)]
pub struct ResNetConfig {
    /// Number of output classes
    pub num_classes: usize,

    /// Depth variant
    #[config(default = "ResNetDepth::R18")]
    pub depth: ResNetDepth,

    /// Input channels
    #[config(default = "3")]
    pub in_channels: usize,

    /// Width of the stem and first stage
    #[config(default = "64")]
    pub base_width: usize,
}

impl ResNetConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> ResNet<B> {
        let width = self.base_width;
        let expansion = if self.depth.uses_bottleneck() { 4 } else { 1 };

        let mut blocks = Vec::new();
        let mut in_channels = width;
        for (stage, &count) in self.depth.stage_blocks().iter().enumerate() {
            let planes = width << stage;
            for i in 0..count {
                let stride = if stage > 0 && i == 0 { 2 } else { 1 };
                let block = if self.depth.uses_bottleneck() {
                    ResidualBlock::Bottleneck(Bottleneck::new(in_channels, planes, stride, device))
                } else {
                    ResidualBlock::Basic(BasicBlock::new(in_channels, planes, stride, device))
                };
                blocks.push(block);
                in_channels = planes * expansion;
            }
        }

        ResNet {
            conv1: Conv2dConfig::new([self.in_channels, width], [7, 7])
                .with_stride([2, 2])
                .with_padding(PaddingConfig2d::Explicit(3, 3))
                .with_bias(false)
                .init(device),
            bn1: BatchNormConfig::new(width).init(device),
            maxpool: MaxPool2dConfig::new([3, 3])
                .with_strides([2, 2])
                .with_padding(PaddingConfig2d::Explicit(1, 1))
                .init(),
            blocks,
            avgpool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
            fc: LinearConfig::new(in_channels, self.num_classes).init(device),
            activation: Relu::new(),
            num_classes: self.num_classes,
        }
    }
}

fn conv(in_channels: usize, out_channels: usize, kernel: usize, stride: usize) -> Conv2dConfig {
    let pad = kernel / 2;
    Conv2dConfig::new([in_channels, out_channels], [kernel, kernel])
        .with_stride([stride, stride])
        .with_padding(PaddingConfig2d::Explicit(pad, pad))
        .with_bias(false)
}

/// 1x1 projection used when a block changes shape
#[derive(Module, Debug)]
pub struct Downsample<B: Backend> {
    conv: Conv2d<B>,
    bn: BatchNorm<B>,
}

impl<B: Backend> Downsample<B> {
    fn needed(
        in_channels: usize,
        out_channels: usize,
        stride: usize,
        device: &B::Device,
    ) -> Option<Self> {
        (stride != 1 || in_channels != out_channels).then(|| Self {
            conv: conv(in_channels, out_channels, 1, stride).init(device),
            bn: BatchNormConfig::new(out_channels).init(device),
        })
    }

    fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        self.bn.forward(self.conv.forward(x))
    }
}

/// Two 3x3 convolutions with an identity (or projected) shortcut
#[derive(Module, Debug)]
pub struct BasicBlock<B: Backend> {
    conv1: Conv2d<B>,
    bn1: BatchNorm<B>,
    conv2: Conv2d<B>,
    bn2: BatchNorm<B>,
    downsample: Option<Downsample<B>>,
    activation: Relu,
}

impl<B: Backend> BasicBlock<B> {
    pub fn new(in_channels: usize, planes: usize, stride: usize, device: &B::Device) -> Self {
        Self {
            conv1: conv(in_channels, planes, 3, stride).init(device),
            bn1: BatchNormConfig::new(planes).init(device),
            conv2: conv(planes, planes, 3, 1).init(device),
            bn2: BatchNormConfig::new(planes).init(device),
            downsample: Downsample::needed(in_channels, planes, stride, device),
            activation: Relu::new(),
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let identity = match &self.downsample {
            Some(downsample) => downsample.forward(x.clone()),
            None => x.clone(),
        };

        let out = self.activation.forward(self.bn1.forward(self.conv1.forward(x)));
        let out = self.bn2.forward(self.conv2.forward(out));
        self.activation.forward(out.add(identity))
    }
}

/// 1x1 reduce, 3x3, 1x1 expand (x4) with a shortcut
#[derive(Module, Debug)]
pub struct Bottleneck<B: Backend> {
    conv1: Conv2d<B>,
    bn1: BatchNorm<B>,
    conv2: Conv2d<B>,
    bn2: BatchNorm<B>,
    conv3: Conv2d<B>,
    bn3: BatchNorm<B>,
    downsample: Option<Downsample<B>>,
    activation: Relu,
}

impl<B: Backend> Bottleneck<B> {
    pub fn new(in_channels: usize, planes: usize, stride: usize, device: &B::Device) -> Self {
        let out_channels = planes * 4;
        Self {
            conv1: conv(in_channels, planes, 1, 1).init(device),
            bn1: BatchNormConfig::new(planes).init(device),
            conv2: conv(planes, planes, 3, stride).init(device),
            bn2: BatchNormConfig::new(planes).init(device),
            conv3: conv(planes, out_channels, 1, 1).init(device),
            bn3: BatchNormConfig::new(out_channels).init(device),
            downsample: Downsample::needed(in_channels, out_channels, stride, device),
            activation: Relu::new(),
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let identity = match &self.downsample {
            Some(downsample) => downsample.forward(x.clone()),
            None => x.clone(),
        };

        let out = self.activation.forward(self.bn1.forward(self.conv1.forward(x)));
        let out = self.activation.forward(self.bn2.forward(self.conv2.forward(out)));
        let out = self.bn3.forward(self.conv3.forward(out));
        self.activation.forward(out.add(identity))
    }
}

/// Either residual block flavour
#[derive(Module, Debug)]
pub enum ResidualBlock<B: Backend> {
    Basic(BasicBlock<B>),
    Bottleneck(Bottleneck<B>),
}

impl<B: Backend> ResidualBlock<B> {
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        match self {
            ResidualBlock::Basic(block) => block.forward(x),
            ResidualBlock::Bottleneck(block) => block.forward(x),
        }
    }
}

/// ResNet classifier
#[derive(Module, Debug)]
pub struct ResNet<B: Backend> {
    conv1: Conv2d<B>,
    bn1: BatchNorm<B>,
    maxpool: MaxPool2d,
    blocks: Vec<ResidualBlock<B>>,
    avgpool: AdaptiveAvgPool2d,
    fc: Linear<B>,
    activation: Relu,
    num_classes: usize,
}

impl<B: Backend> ResNet<B> {
    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 2> {
        let x = self.conv1.forward(input);
        let x = self.activation.forward(self.bn1.forward(x));
        let mut x = self.maxpool.forward(x);

        for block in &self.blocks {
            x = block.forward(x);
        }

        let x = self.avgpool.forward(x);
        let [batch, channels, _, _] = x.dims();
        self.fc.forward(x.reshape([batch, channels]))
    }
}

impl<B: Backend> ClassificationModel<B> for ResNet<B> {
    fn predict(&self, input: Tensor<B, 4>) -> Tensor<B, 2> {
        self.forward(input)
    }

    fn num_classes(&self) -> usize {
        self.num_classes
    }
}
