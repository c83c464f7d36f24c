use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::pool::{MaxPool2d, MaxPool2dConfig};
use burn::nn::{Dropout, DropoutConfig, Linear, LinearConfig, PaddingConfig2d};
use burn::prelude::*;
use burn::tensor::activation::relu;

use facedata::{IMAGE_SIZE, NUM_COORDS};

/// Configuration for the KeypointNet CNN.
///
/// Three conv stages, each halving the spatial size, then a dense head:
///
/// ```text
/// (batch, H, W, 1)                     NHWC input in [0, 1]
///   → permute to NCHW
///   → Conv3x3(1→c1) → ReLU → Conv3x3(c1→c1) → ReLU → MaxPool2 → Dropout
///   → Conv3x3(c1→c2) → ReLU → Conv3x3(c2→c2) → ReLU → MaxPool2 → Dropout
///   → Conv3x3(c2→c3) → ReLU → MaxPool2 → Dropout
///   → flatten → Linear(c3·(H/8)²→d_hidden) → ReLU → Dropout
///   → Linear(d_hidden→n_outputs)
///   → coords: (batch, n_outputs)
/// ```
#[derive(Config, Debug)]
pub struct KeypointNetConfig {
    /// Input image side length. Must be divisible by 8.
    #[config(default = "IMAGE_SIZE")]
    pub image_size: usize,
    /// Channels of the first conv stage.
    #[config(default = 32)]
    pub c1: usize,
    /// Channels of the second conv stage.
    #[config(default = 64)]
    pub c2: usize,
    /// Channels of the third conv stage.
    #[config(default = 128)]
    pub c3: usize,
    /// Width of the dense hidden layer.
    #[config(default = 256)]
    pub d_hidden: usize,
    /// Number of regressed coordinates.
    #[config(default = "NUM_COORDS")]
    pub n_outputs: usize,
    /// Dropout after the first conv stage.
    #[config(default = 0.1)]
    pub dropout1: f64,
    /// Dropout after the second conv stage.
    #[config(default = 0.2)]
    pub dropout2: f64,
    /// Dropout after the third conv stage.
    #[config(default = 0.3)]
    pub dropout3: f64,
    /// Dropout before the output layer.
    #[config(default = 0.4)]
    pub head_dropout: f64,
}

/// CNN regressor: grayscale face image → keypoint coordinates.
#[derive(Module, Debug)]
pub struct KeypointNet<B: Backend> {
    conv1a: Conv2d<B>,
    conv1b: Conv2d<B>,
    conv2a: Conv2d<B>,
    conv2b: Conv2d<B>,
    conv3: Conv2d<B>,
    pool: MaxPool2d,
    dropout1: Dropout,
    dropout2: Dropout,
    dropout3: Dropout,
    fc1: Linear<B>,
    dropout_head: Dropout,
    fc2: Linear<B>,
}

impl KeypointNetConfig {
    /// Spatial side length after the three pooling stages.
    pub fn pooled_size(&self) -> usize {
        self.image_size / 8
    }

    /// Flattened feature count entering the dense head.
    pub fn flattened_dim(&self) -> usize {
        self.c3 * self.pooled_size() * self.pooled_size()
    }

    /// Initialize a KeypointNet with the given configuration.
    ///
    /// # Panics
    /// Panics if `image_size` is not a positive multiple of 8.
    pub fn init<B: Backend>(&self, device: &B::Device) -> KeypointNet<B> {
        assert!(
            self.image_size >= 8 && self.image_size % 8 == 0,
            "image_size must be a positive multiple of 8, got {}",
            self.image_size
        );
        let conv = |c_in: usize, c_out: usize| {
            Conv2dConfig::new([c_in, c_out], [3, 3])
                .with_padding(PaddingConfig2d::Same)
                .init(device)
        };
        KeypointNet {
            conv1a: conv(1, self.c1),
            conv1b: conv(self.c1, self.c1),
            conv2a: conv(self.c1, self.c2),
            conv2b: conv(self.c2, self.c2),
            conv3: conv(self.c2, self.c3),
            pool: MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init(),
            dropout1: DropoutConfig::new(self.dropout1).init(),
            dropout2: DropoutConfig::new(self.dropout2).init(),
            dropout3: DropoutConfig::new(self.dropout3).init(),
            fc1: LinearConfig::new(self.flattened_dim(), self.d_hidden).init(device),
            dropout_head: DropoutConfig::new(self.head_dropout).init(),
            fc2: LinearConfig::new(self.d_hidden, self.n_outputs).init(device),
        }
    }

    /// Seed the backend RNG, then initialize.
    pub fn init_seeded<B: Backend>(&self, seed: u64, device: &B::Device) -> KeypointNet<B> {
        B::seed(seed);
        self.init(device)
    }
}

impl<B: Backend> KeypointNet<B> {
    /// Forward pass on NHWC images.
    ///
    /// Input shape: `(batch, H, W, 1)`
    /// Output shape: `(batch, n_outputs)`
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        self.forward_nchw(images.permute([0, 3, 1, 2]))
    }

    /// Forward pass on NCHW images, shape `(batch, 1, H, W)`.
    pub fn forward_nchw(&self, x: Tensor<B, 4>) -> Tensor<B, 2> {
        let x = relu(self.conv1a.forward(x));
        let x = relu(self.conv1b.forward(x));
        let x = self.dropout1.forward(self.pool.forward(x));

        let x = relu(self.conv2a.forward(x));
        let x = relu(self.conv2b.forward(x));
        let x = self.dropout2.forward(self.pool.forward(x));

        let x = relu(self.conv3.forward(x));
        let x = self.dropout3.forward(self.pool.forward(x));

        let x: Tensor<B, 2> = x.flatten(1, 3);
        let x = relu(self.fc1.forward(x));
        let x = self.dropout_head.forward(x);
        self.fc2.forward(x)
    }
}
