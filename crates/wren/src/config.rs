// Config — Interpreter and training configuration
//
// Plain structs with defaults and `with_*` builders:
//
//   let config = InterpreterConfig::default()
//       .with_seed(7)
//       .with_gradient_policy(GradientPolicy::Accumulate)
//       .with_training(TrainingConfig::default().with_learning_rate(0.05));
//
// The defaults reproduce the reference numerics exactly; the two policy
// switches exist for callers that need the corrected behaviour instead.

/// How backward kernels that historically overwrite an input gradient
/// (transpose, concat, local response normalization, arithmetic) write it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GradientPolicy {
    /// Overwrite at those sites, accumulate everywhere else.
    #[default]
    Reference,
    /// Accumulate at every site. Required when a value has several consumers.
    Accumulate,
}

/// Which batch the convolution filter gradient reads its input from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FilterGradSource {
    /// Always batch 0, whatever the current batch index is.
    #[default]
    FirstBatch,
    /// The batch whose output gradient is being propagated.
    CurrentBatch,
}

/// SGD hyper-parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrainingConfig {
    pub learning_rate: f32,
    pub momentum: f32,
    pub l1_decay: f32,
    pub l2_decay: f32,
    /// Gradients are summed over the batch; the step divides by this.
    pub batch_size: usize,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            learning_rate: 0.01,
            momentum: 0.0,
            l1_decay: 0.0,
            l2_decay: 0.0,
            batch_size: 1,
        }
    }
}

impl TrainingConfig {
    pub fn with_learning_rate(mut self, learning_rate: f32) -> Self {
        self.learning_rate = learning_rate;
        self
    }

    pub fn with_momentum(mut self, momentum: f32) -> Self {
        self.momentum = momentum;
        self
    }

    pub fn with_l1_decay(mut self, l1_decay: f32) -> Self {
        self.l1_decay = l1_decay;
        self
    }

    pub fn with_l2_decay(mut self, l2_decay: f32) -> Self {
        self.l2_decay = l2_decay;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }
}

/// Interpreter configuration.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct InterpreterConfig {
    pub gradient_policy: GradientPolicy,
    pub filter_grad_source: FilterGradSource,
    /// Seed for weight initialization.
    pub seed: u64,
    pub training: TrainingConfig,
}

impl InterpreterConfig {
    pub fn with_gradient_policy(mut self, policy: GradientPolicy) -> Self {
        self.gradient_policy = policy;
        self
    }

    pub fn with_filter_grad_source(mut self, source: FilterGradSource) -> Self {
        self.filter_grad_source = source;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_training(mut self, training: TrainingConfig) -> Self {
        self.training = training;
        self
    }
}
