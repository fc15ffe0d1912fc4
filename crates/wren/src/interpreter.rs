// Interpreter — Runs a Module's instruction list over a Context
//
// Construction declares every value, then allocates and initializes the
// weights with a seeded StdRng. Activations are only declared; their
// AllocActivation instruction brings them to life during the forward sweep.
//
//   forward(is_train)   instructions in program order
//   backward()          instructions in reverse program order
//   learn_gradient()    one SGD step over the trainable weights
//   train_step()        forward(true) + backward() + learn_gradient()
//
// A failing kernel stops the sweep immediately. The context is left as the
// kernel left it, so the caller should treat the run as aborted.

use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{debug, info, trace};

use wren_core::{Float, Result, Tensor};
use wren_ir::{Module, ValueId};

use crate::config::InterpreterConfig;
use crate::context::Context;
use crate::kernels;
use crate::train::Sgd;

/// Reference interpreter for a verified module.
#[derive(Debug)]
pub struct Interpreter {
    module: Module,
    ctx: Context,
    config: InterpreterConfig,
    sgd: Sgd,
    steps: usize,
}

impl Interpreter {
    /// Verify `module`, declare its values and initialize its weights.
    pub fn new(module: Module, config: InterpreterConfig) -> Result<Self> {
        module.verify()?;

        let mut ctx = Context::new();
        let mut rng = StdRng::seed_from_u64(config.seed);
        for value in module.values() {
            ctx.declare(value.id, value.kind, value.shape.clone());
            if value.is_weight() {
                let tensor = ctx.allocate(value.id)?;
                value.init.apply(tensor, &mut rng)?;
                debug!(
                    value = %value.id,
                    name = %value.name,
                    shape = %value.shape,
                    init = ?value.init,
                    "initialized weight"
                );
            }
        }

        debug!(
            values = module.values().len(),
            instructions = module.instructions().len(),
            seed = config.seed,
            "interpreter ready"
        );
        Ok(Interpreter {
            sgd: Sgd::new(config.training),
            module,
            ctx,
            config,
            steps: 0,
        })
    }

    /// Bind `tensor` as the contents of weight `id`, e.g. an input batch.
    pub fn load(&mut self, id: ValueId, tensor: Tensor) -> Result<()> {
        self.ctx.insert(id, tensor)
    }

    /// Float contents of any live value.
    pub fn read(&self, id: ValueId) -> Result<Vec<Float>> {
        self.ctx.weight(id)?.to_vec()
    }

    /// Run every instruction's forward kernel in program order.
    pub fn forward(&mut self, is_train: bool) -> Result<()> {
        debug!(is_train, "forward sweep");
        for (index, inst) in self.module.instructions().iter().enumerate() {
            trace!(index, instruction = inst.name(), "forward");
            kernels::forward(&mut self.ctx, is_train, inst, &self.config).map_err(|e| {
                debug!(index, instruction = inst.name(), error = %e, "forward failed");
                e
            })?;
        }
        Ok(())
    }

    /// Run every instruction's backward kernel in reverse program order.
    pub fn backward(&mut self) -> Result<()> {
        debug!("backward sweep");
        for (index, inst) in self.module.instructions().iter().enumerate().rev() {
            trace!(index, instruction = inst.name(), "backward");
            kernels::backward(&mut self.ctx, inst, &self.config).map_err(|e| {
                debug!(index, instruction = inst.name(), error = %e, "backward failed");
                e
            })?;
        }
        Ok(())
    }

    /// Forward sweep in inference mode.
    pub fn infer(&mut self) -> Result<()> {
        self.forward(false)
    }

    /// Apply the accumulated weight gradients and clear them.
    pub fn learn_gradient(&mut self) -> Result<()> {
        self.sgd.step(&self.module, &mut self.ctx)
    }

    /// One full training iteration on the currently loaded batch.
    pub fn train_step(&mut self) -> Result<()> {
        self.forward(true)?;
        self.backward()?;
        self.learn_gradient()?;
        self.steps += 1;
        info!(step = self.steps, "train step");
        Ok(())
    }

    /// Number of completed `train_step` calls.
    pub fn steps(&self) -> usize {
        self.steps
    }

    pub fn weight(&self, id: ValueId) -> Result<&Tensor> {
        self.ctx.weight(id)
    }

    pub fn grad(&self, id: ValueId) -> Result<&Tensor> {
        self.ctx.grad(id)
    }

    pub fn context(&self) -> &Context {
        &self.ctx
    }

    pub fn context_mut(&mut self) -> &mut Context {
        &mut self.ctx
    }

    pub fn module(&self) -> &Module {
        &self.module
    }

    pub fn config(&self) -> &InterpreterConfig {
        &self.config
    }

    pub fn sgd(&self) -> &Sgd {
        &self.sgd
    }
}
