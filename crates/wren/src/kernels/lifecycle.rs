// Lifecycle — Activation allocation
//
// AllocActivation is the point where an activation comes to life for a
// sweep: its backing tensor is allocated from the declaration (or kept, if a
// tensor of the right kind and shape is already bound) and its gradient is
// zeroed, so the next backward pass starts from a clean slate. Parameter
// gradients are not touched here; the training step clears those.
//
// DeallocActivation does nothing in either direction.

use wren_core::Result;
use wren_ir::AllocActivationInst;

use crate::context::Context;

pub(crate) fn forward_alloc(ctx: &mut Context, inst: &AllocActivationInst) -> Result<()> {
    ctx.allocate(inst.dest)?;
    ctx.ensure_grad(inst.dest)?.zero();
    Ok(())
}
