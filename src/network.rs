use burn::{
    config::Config,
    module::{Module, Param},
    nn::{
        conv::{Conv2d, Conv2dConfig},
        pool::{MaxPool2d, MaxPool2dConfig},
        Initializer, Linear, LinearConfig,
    },
    tensor::{
        activation::{relu, sigmoid},
        backend::Backend,
        Tensor,
    },
};

use crate::dataset::{IMAGE_CHANNELS, IMAGE_HEIGHT};

/// LeNet-5 style classifier: two conv/pool stages, then three dense layers.
#[derive(Module, Debug)]
pub struct LeNet<B: Backend> {
    conv1: Conv2d<B>,
    conv2: Conv2d<B>,
    pool: MaxPool2d,
    fc1: Linear<B>,
    fc2: Linear<B>,
    fc3: Linear<B>,
}

#[derive(Config, Debug)]
pub struct LeNetConfig {
    #[config(default = 6)]
    pub conv1_channels: usize,
    #[config(default = 16)]
    pub conv2_channels: usize,
    #[config(default = 5)]
    pub kernel_size: usize,
    #[config(default = 120)]
    pub fc1_features: usize,
    #[config(default = 84)]
    pub fc2_features: usize,
    #[config(default = 10)]
    pub num_classes: usize,
}

impl LeNetConfig {
    /// Side length of the feature maps entering the dense layers.
    pub fn feature_map_size(&self) -> usize {
        let after_conv1 = IMAGE_HEIGHT - self.kernel_size + 1;
        let after_conv2 = after_conv1 / 2 - self.kernel_size + 1;
        after_conv2 / 2
    }

    pub fn flattened_features(&self) -> usize {
        let side = self.feature_map_size();
        self.conv2_channels * side * side
    }

    /// Builds the network with Glorot-uniform weights and zero biases.
    pub fn init<B: Backend>(&self, device: &B::Device) -> LeNet<B> {
        let initializer = Initializer::XavierUniform { gain: 1.0 };
        let kernel = [self.kernel_size, self.kernel_size];

        let conv = |channels: [usize; 2]| {
            let mut layer = Conv2dConfig::new(channels, kernel)
                .with_initializer(initializer.clone())
                .init(device);
            layer.bias = zero_bias(layer.bias, device);
            layer
        };
        let conv1 = conv([IMAGE_CHANNELS, self.conv1_channels]);
        let conv2 = conv([self.conv1_channels, self.conv2_channels]);
        let pool = MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init();

        let dense = |d_input: usize, d_output: usize| {
            let mut linear = LinearConfig::new(d_input, d_output)
                .with_initializer(initializer.clone())
                .init(device);
            linear.bias = zero_bias(linear.bias, device);
            linear
        };

        LeNet {
            conv1,
            conv2,
            pool,
            fc1: dense(self.flattened_features(), self.fc1_features),
            fc2: dense(self.fc1_features, self.fc2_features),
            fc3: dense(self.fc2_features, self.num_classes),
        }
    }
}

fn zero_bias<B: Backend>(
    bias: Option<Param<Tensor<B, 1>>>,
    device: &B::Device,
) -> Option<Param<Tensor<B, 1>>> {
    bias.map(|bias| {
        let [features] = bias.dims();
        Initializer::Zeros.init([features], device)
    })
}

impl<B: Backend> LeNet<B> {
    /// # Shapes
    ///   - Images `[batch_size, 28, 28, 1]`
    ///   - Output `[batch_size, num_classes]`, every score in `(0, 1)`
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let [batch_size, height, width, _] = images.dims();

        // Single channel, so NHWC and NCHW share one memory order.
        let x = images.reshape([batch_size, IMAGE_CHANNELS, height, width]);

        let x = relu(self.conv1.forward(x));
        let x = self.pool.forward(x);
        let x = relu(self.conv2.forward(x));
        let x = self.pool.forward(x);

        let [batch_size, channels, height, width] = x.dims();
        let x = x.reshape([batch_size, channels * height * width]);

        let x = sigmoid(self.fc1.forward(x));
        let x = sigmoid(self.fc2.forward(x));
        sigmoid(self.fc3.forward(x))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use burn::tensor::Distribution;

    type TestBackend = NdArray;

    #[test]
    fn default_architecture_flattens_to_256_features() {
        let config = LeNetConfig::new();
        assert_eq!(config.feature_map_size(), 4);
        assert_eq!(config.flattened_features(), 256);
        assert_eq!(config.num_classes, crate::dataset::NUM_CLASSES);
    }

    #[test]
    fn forward_maps_images_to_class_scores() {
        let device = Default::default();
        TestBackend::seed(7);
        let model = LeNetConfig::new().init::<TestBackend>(&device);

        let distribution = Distribution::Uniform(0.0, 1.0);
        let images = Tensor::<TestBackend, 4>::random([5, 28, 28, 1], distribution, &device);
        let scores = model.forward(images);
        assert_eq!(scores.dims(), [5, 10]);

        let values = scores.into_data().to_vec::<f32>().unwrap();
        assert!(values.iter().all(|v| *v > 0.0 && *v < 1.0));
    }

    #[test]
    fn forward_handles_single_image_batches() {
        let device = Default::default();
        let model = LeNetConfig::new().init::<TestBackend>(&device);

        let images = Tensor::<TestBackend, 4>::zeros([1, 28, 28, 1], &device);
        assert_eq!(model.forward(images).dims(), [1, 10]);
    }

    #[test]
    fn biases_start_at_zero() {
        let device = Default::default();
        TestBackend::seed(11);
        let model = LeNetConfig::new().init::<TestBackend>(&device);

        let conv_biases = [&model.conv1.bias, &model.conv2.bias];
        let dense_biases = [&model.fc1.bias, &model.fc2.bias, &model.fc3.bias];
        for bias in conv_biases.into_iter().chain(dense_biases) {
            let values = bias.as_ref().unwrap().val().into_data().to_vec::<f32>().unwrap();
            assert!(!values.is_empty());
            assert!(values.iter().all(|v| *v == 0.0));
        }

        let weights = model.fc1.weight.val().into_data().to_vec::<f32>().unwrap();
        assert!(weights.iter().any(|v| *v != 0.0));
    }

    #[test]
    fn parameter_count_matches_lenet() {
        let device = Default::default();
        let model = LeNetConfig::new().init::<TestBackend>(&device);

        // conv 156 + 2416, dense 30840 + 10164 + 850
        assert_eq!(model.num_params(), 44_426);
    }
}
