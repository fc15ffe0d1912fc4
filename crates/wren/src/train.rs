// Train — Stochastic gradient descent over the module's trainable weights
//
// Gradients are summed over the batch by the backward sweep. One step,
// per trainable weight w with gradient G:
//
//   g = (l2·w + l1·sign(w) + G) / batch_size
//   momentum > 0:  dx = momentum·gsum - lr·g;  gsum = dx;  w += dx
//   otherwise:     w -= lr·g
//
// Afterwards every weight gradient is zeroed (trainable or not), so inputs
// and labels bound as weights start the next batch clean as well.
// Activation gradients are zeroed by their AllocActivation instead.

use std::collections::HashMap;

use tracing::debug;

use wren_core::{Float, Result, Tensor};
use wren_ir::{Module, ValueId};

use crate::config::TrainingConfig;
use crate::context::Context;

/// SGD state: the per-weight momentum buffers.
#[derive(Debug, Default)]
pub struct Sgd {
    config: TrainingConfig,
    gsum: HashMap<ValueId, Tensor>,
}

impl Sgd {
    pub fn new(config: TrainingConfig) -> Self {
        Sgd {
            config,
            gsum: HashMap::new(),
        }
    }

    pub fn config(&self) -> &TrainingConfig {
        &self.config
    }

    /// The momentum buffer of `id`, if a step with momentum has touched it.
    pub fn momentum_buffer(&self, id: ValueId) -> Option<&Tensor> {
        self.gsum.get(&id)
    }

    /// Apply one update to every trainable weight, then clear weight gradients.
    pub fn step(&mut self, module: &Module, ctx: &mut Context) -> Result<()> {
        let TrainingConfig {
            learning_rate: lr,
            momentum,
            l1_decay: l1,
            l2_decay: l2,
            batch_size,
        } = self.config;
        let batch = batch_size.max(1) as Float;

        let mut updated = 0usize;
        for value in module.trainable() {
            if !ctx.has_grad(value.id) {
                continue;
            }
            let grad: Vec<Float> = ctx.grad(value.id)?.to_vec()?;
            let weight = ctx.weight_mut(value.id)?;
            let gsum = if momentum > 0.0 {
                Some(
                    self.gsum
                        .entry(value.id)
                        .or_insert_with(|| Tensor::zeros_like(weight)),
                )
            } else {
                None
            };
            let mut w = weight.handle_mut::<Float>()?;

            if let Some(gsum) = gsum {
                let mut gs = gsum.handle_mut::<Float>()?;
                for (i, &dw) in grad.iter().enumerate() {
                    let x = w.raw(i);
                    let g = (l2 * x + l1 * sign(x) + dw) / batch;
                    let dx = momentum * gs.raw(i) - lr * g;
                    *gs.raw_mut(i) = dx;
                    *w.raw_mut(i) += dx;
                }
            } else {
                for (i, &dw) in grad.iter().enumerate() {
                    let x = w.raw(i);
                    let g = (l2 * x + l1 * sign(x) + dw) / batch;
                    *w.raw_mut(i) -= lr * g;
                }
            }
            updated += 1;
        }

        for value in module.weights() {
            if ctx.has_grad(value.id) {
                ctx.grad_mut(value.id)?.zero();
            }
        }
        debug!(updated, lr, momentum, "sgd step");
        Ok(())
    }
}

fn sign(x: Float) -> Float {
    if x > 0.0 {
        1.0
    } else if x < 0.0 {
        -1.0
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use wren_core::{ElemKind, WeightInit};
    use wren_ir::ModuleBuilder;

    fn single_weight(value: Float, grad: Float) -> (Module, Context, ValueId) {
        let mut b = ModuleBuilder::new();
        let w = b.create_weight("w", 1, WeightInit::Zero);
        let module = b.build().unwrap();
        let mut ctx = Context::new();
        ctx.declare(w, ElemKind::Float, 1.into());
        ctx.insert(w, Tensor::full(value, 1)).unwrap();
        ctx.ensure_grad(w).unwrap().handle_mut::<Float>().unwrap().fill(grad);
        (module, ctx, w)
    }

    #[test]
    fn test_plain_step_with_decay() {
        let (module, mut ctx, w) = single_weight(2.0, 1.0);
        let config = TrainingConfig::default()
            .with_learning_rate(0.5)
            .with_l1_decay(0.1)
            .with_l2_decay(0.2)
            .with_batch_size(2);
        Sgd::new(config).step(&module, &mut ctx).unwrap();
        // g = (0.2·2 + 0.1·1 + 1) / 2 = 0.75
        let after = ctx.weight(w).unwrap().to_vec::<Float>().unwrap()[0];
        assert_relative_eq!(after, 2.0 - 0.5 * 0.75);
        assert_eq!(ctx.grad(w).unwrap().to_vec::<Float>().unwrap(), vec![0.0]);
    }

    #[test]
    fn test_momentum_carries_previous_step() {
        let (module, mut ctx, w) = single_weight(0.0, 1.0);
        let mut sgd = Sgd::new(
            TrainingConfig::default()
                .with_learning_rate(0.1)
                .with_momentum(0.9),
        );
        sgd.step(&module, &mut ctx).unwrap();
        assert_relative_eq!(ctx.weight(w).unwrap().to_vec::<Float>().unwrap()[0], -0.1);

        ctx.grad_mut(w).unwrap().handle_mut::<Float>().unwrap().fill(1.0);
        sgd.step(&module, &mut ctx).unwrap();
        // dx = 0.9·(-0.1) - 0.1 = -0.19
        assert_relative_eq!(
            ctx.weight(w).unwrap().to_vec::<Float>().unwrap()[0],
            -0.29,
            epsilon = 1e-6
        );
        assert_relative_eq!(
            sgd.momentum_buffer(w).unwrap().to_vec::<Float>().unwrap()[0],
            -0.19,
            epsilon = 1e-6
        );
    }
}
