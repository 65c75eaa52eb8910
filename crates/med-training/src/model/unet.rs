//! U-Net for binary segmentation.
//!
//! Architecture:
//! - Input: `[N, in_channels, H, W]` with H and W divisible by 16
//! - Encoder: double convolution then four max-pool/double-convolution stages
//! - Decoder: four transposed-convolution upsamplings concatenated with skips
//! - 1x1 output convolution producing per-pixel logits

use burn::{
    config::Config,
    module::Module,
    nn::{
        conv::{Conv2d, Conv2dConfig, ConvTranspose2d, ConvTranspose2dConfig},
        pool::{MaxPool2d, MaxPool2dConfig},
        BatchNorm, BatchNormConfig, PaddingConfig2d, Relu,
    },
    tensor::{backend::Backend, Tensor},
};

use super::SegmentationModel;

/// Configuration for [`UNet`]
#[derive(Config, Debug)]
pub struct UNetConfig {
    /// Input channels (1 for grayscale scans)
    #[config(default = "1")]
    pub in_channels: usize,

    /// Output channels (1 for a binary mask)
    #[config(default = "1")]
    pub out_channels: usize,

    /// Filters of the first stage, doubled at every level
    #[config(default = "64")]
    pub base_channels: usize,
}

impl UNetConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> UNet<B> {
        let c = self.base_channels;
        UNet {
            inc: DoubleConv::new(self.in_channels, c, device),
            down1: Down::new(c, c * 2, device),
            down2: Down::new(c * 2, c * 4, device),
            down3: Down::new(c * 4, c * 8, device),
            down4: Down::new(c * 8, c * 16, device),
            up1: Up::new(c * 16, c * 8, device),
            up2: Up::new(c * 8, c * 4, device),
            up3: Up::new(c * 4, c * 2, device),
            up4: Up::new(c * 2, c, device),
            outc: Conv2dConfig::new([c, self.out_channels], [1, 1]).init(device),
        }
    }
}

/// (Conv 3x3, BatchNorm, ReLU) twice
#[derive(Module, Debug)]
pub struct DoubleConv<B: Backend> {
    conv1: Conv2d<B>,
    bn1: BatchNorm<B>,
    conv2: Conv2d<B>,
    bn2: BatchNorm<B>,
    relu: Relu,
}

impl<B: Backend> DoubleConv<B> {
    pub fn new(in_channels: usize, out_channels: usize, device: &B::Device) -> Self {
        Self {
            conv1: Conv2dConfig::new([in_channels, out_channels], [3, 3])
                .with_padding(PaddingConfig2d::Explicit(1, 1))
                .with_bias(false)
                .init(device),
            bn1: BatchNormConfig::new(out_channels).init(device),
            conv2: Conv2dConfig::new([out_channels, out_channels], [3, 3])
                .with_padding(PaddingConfig2d::Explicit(1, 1))
                .with_bias(false)
                .init(device),
            bn2: BatchNormConfig::new(out_channels).init(device),
            relu: Relu::new(),
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.relu.forward(self.bn1.forward(self.conv1.forward(x)));
        self.relu.forward(self.bn2.forward(self.conv2.forward(x)))
    }
}

/// Max-pool downscaling followed by a double convolution
#[derive(Module, Debug)]
pub struct Down<B: Backend> {
    pool: MaxPool2d,
    conv: DoubleConv<B>,
}

impl<B: Backend> Down<B> {
    pub fn new(in_channels: usize, out_channels: usize, device: &B::Device) -> Self {
        Self {
            pool: MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init(),
            conv: DoubleConv::new(in_channels, out_channels, device),
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        self.conv.forward(self.pool.forward(x))
    }
}

/// Transposed-convolution upscaling, skip concatenation, double convolution
#[derive(Module, Debug)]
pub struct Up<B: Backend> {
    up: ConvTranspose2d<B>,
    conv: DoubleConv<B>,
}

impl<B: Backend> Up<B> {
    pub fn new(in_channels: usize, out_channels: usize, device: &B::Device) -> Self {
        Self {
            up: ConvTranspose2dConfig::new([in_channels, in_channels / 2], [2, 2])
                .with_stride([2, 2])
                .init(device),
            conv: DoubleConv::new(in_channels, out_channels, device),
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>, skip: Tensor<B, 4>) -> Tensor<B, 4> {
        let [_, _, skip_h, skip_w] = skip.dims();
        let x = pad_to(self.up.forward(x), skip_h, skip_w);
        self.conv.forward(Tensor::cat(vec![skip, x], 1))
    }
}

/// Zero-pads `x` to `height x width`, splitting the difference between the
/// two sides with the extra pixel on the bottom/right.
fn pad_to<B: Backend>(x: Tensor<B, 4>, height: usize, width: usize) -> Tensor<B, 4> {
    let [n, c, h, w] = x.dims();
    if h >= height && w >= width {
        return x;
    }
    let device = x.device();

    let (top, bottom) = split_diff(height.saturating_sub(h));
    let mut parts = Vec::with_capacity(3);
    if top > 0 {
        parts.push(Tensor::zeros([n, c, top, w], &device));
    }
    parts.push(x);
    if bottom > 0 {
        parts.push(Tensor::zeros([n, c, bottom, w], &device));
    }
    let x = Tensor::cat(parts, 2);
    let h = h.max(height);

    let (left, right) = split_diff(width.saturating_sub(w));
    let mut parts = Vec::with_capacity(3);
    if left > 0 {
        parts.push(Tensor::zeros([n, c, h, left], &device));
    }
    parts.push(x);
    if right > 0 {
        parts.push(Tensor::zeros([n, c, h, right], &device));
    }
    Tensor::cat(parts, 3)
}

fn split_diff(diff: usize) -> (usize, usize) {
    (diff / 2, diff - diff / 2)
}

/// U-Net segmentation network
#[derive(Module, Debug)]
pub struct UNet<B: Backend> {
    inc: DoubleConv<B>,
    down1: Down<B>,
    down2: Down<B>,
    down3: Down<B>,
    down4: Down<B>,
    up1: Up<B>,
    up2: Up<B>,
    up3: Up<B>,
    up4: Up<B>,
    outc: Conv2d<B>,
}

impl<B: Backend> UNet<B> {
    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let x1 = self.inc.forward(input);
        let x2 = self.down1.forward(x1.clone());
        let x3 = self.down2.forward(x2.clone());
        let x4 = self.down3.forward(x3.clone());
        let x5 = self.down4.forward(x4.clone());

        let x = self.up1.forward(x5, x4);
        let x = self.up2.forward(x, x3);
        let x = self.up3.forward(x, x2);
        let x = self.up4.forward(x, x1);
        self.outc.forward(x)
    }
}

impl<B: Backend> SegmentationModel<B> for UNet<B> {
    fn predict(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        self.forward(input)
    }
}
