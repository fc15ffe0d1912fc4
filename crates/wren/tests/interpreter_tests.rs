// Integration tests for the interpreter
//
// Modules are assembled with ModuleBuilder and driven through full
// forward / backward / learn sweeps.

use approx::assert_relative_eq;

use wren::prelude::*;
use wren::{Error, Result};

fn regression_loss(interp: &Interpreter, out: ValueId, expected: ValueId) -> Result<Float> {
    let out = interp.read(out)?;
    let expected = interp.read(expected)?;
    Ok(out.iter().zip(&expected).map(|(o, e)| (o - e) * (o - e)).sum())
}

#[test]
fn test_convnet_sweeps() -> Result<()> {
    let mut b = ModuleBuilder::new();
    let x = b.create_input("x", ElemKind::Float, (2, 6, 6, 3));
    let labels = b.create_input("labels", ElemKind::Index, (2, 1));
    let conv = b.create_convolution("conv", x, 4, 3, 1, 1)?;
    let relu = b.create_relu("relu", conv)?;
    let pool = b.create_pool("pool", PoolKind::Max, relu, 2, 2, 0)?;
    let fc = b.create_fully_connected("fc", pool, 5)?;
    let sm = b.create_softmax("sm", fc, labels)?;
    b.deallocate_active();
    let module = b.build()?;

    let mut interp = Interpreter::new(module, InterpreterConfig::default().with_seed(11))?;
    let data: Vec<Float> = (0..2 * 6 * 6 * 3).map(|i| ((i % 7) as Float - 3.0) / 3.0).collect();
    interp.load(x, Tensor::from_vec(data, (2, 6, 6, 3))?)?;
    interp.load(labels, Tensor::from_vec(vec![1 as Index, 3], (2, 1))?)?;

    interp.infer()?;
    assert_eq!(interp.weight(pool)?.dims(), &[2, 3, 3, 4]);
    let probs = interp.read(sm)?;
    for row in probs.chunks(5) {
        assert_relative_eq!(row.iter().sum::<Float>(), 1.0, epsilon = 1e-5);
    }

    let filter = interp.module().find("conv.filter").ok_or(Error::UndeclaredValue(0))?;
    let before = interp.read(filter)?;
    interp.train_step()?;
    assert_ne!(interp.read(filter)?, before);
    assert_eq!(interp.steps(), 1);
    // learn_gradient clears every weight gradient it leaves behind.
    assert!(interp.grad(filter)?.to_vec::<Float>()?.iter().all(|&g| g == 0.0));
    Ok(())
}

#[test]
fn test_regression_training_reduces_loss() -> Result<()> {
    let mut b = ModuleBuilder::new();
    let x = b.create_input("x", ElemKind::Float, (4, 2));
    let y = b.create_input("y", ElemKind::Float, (4, 1));
    let fc = b.create_fully_connected("fc", x, 1)?;
    b.create_regression("loss", fc, y)?;
    let module = b.build()?;

    let training = TrainingConfig::default()
        .with_learning_rate(0.1)
        .with_batch_size(4);
    let config = InterpreterConfig::default().with_seed(5).with_training(training);
    let mut interp = Interpreter::new(module, config)?;

    // y = 2·x0 - x1 + 0.5
    let xs = vec![0.0f32, 1.0, 1.0, 0.0, 1.0, 1.0, -1.0, 0.5];
    let ys: Vec<Float> = xs.chunks(2).map(|p| 2.0 * p[0] - p[1] + 0.5).collect();
    interp.load(x, Tensor::from_vec(xs, (4, 2))?)?;
    interp.load(y, Tensor::from_vec(ys, (4, 1))?)?;

    interp.infer()?;
    let initial = regression_loss(&interp, fc, y)?;
    for _ in 0..200 {
        interp.train_step()?;
    }
    interp.infer()?;
    let trained = regression_loss(&interp, fc, y)?;
    assert!(trained < initial * 0.1, "loss {initial} -> {trained}");
    Ok(())
}

#[test]
fn test_batchnorm_train_updates_running_stats() -> Result<()> {
    let mut b = ModuleBuilder::new();
    let x = b.create_input("x", ElemKind::Float, (4, 1, 1, 2));
    let bn = b.create_batch_normalization("bn", x, 3, 1e-5, 0.5)?;
    let module = b.build()?;
    let mean = module.find("bn.mean").ok_or(Error::UndeclaredValue(0))?;
    let mut interp = Interpreter::new(module, InterpreterConfig::default())?;
    let data = vec![1.0f32, 0.0, 3.0, 0.0, 5.0, 0.0, 7.0, 0.0];
    interp.load(x, Tensor::from_vec(data, (4, 1, 1, 2))?)?;

    interp.infer()?;
    assert_eq!(interp.read(mean)?, vec![0.0, 0.0]);
    interp.forward(true)?;
    // Channel 0 has local mean 4, blended halfway with the initial 0.
    assert_eq!(interp.read(mean)?, vec![2.0, 0.0]);
    assert_eq!(interp.weight(bn)?.dims(), &[4, 1, 1, 2]);
    Ok(())
}

fn doubled_input(policy: GradientPolicy) -> Result<Vec<Float>> {
    // a = x + x; loss = regression(a, 0). Both operand gradients land on x.
    let mut b = ModuleBuilder::new();
    let x = b.create_input("x", ElemKind::Float, (1, 3));
    let target = b.create_input("target", ElemKind::Float, (1, 3));
    let a = b.create_arithmetic("a", ArithmeticKind::Add, x, x)?;
    b.create_regression("loss", a, target)?;
    let module = b.build()?;

    let config = InterpreterConfig::default().with_gradient_policy(policy);
    let mut interp = Interpreter::new(module, config)?;
    interp.load(x, Tensor::from_vec(vec![1.0f32, 2.0, 3.0], (1, 3))?)?;
    interp.forward(true)?;
    interp.backward()?;
    interp.grad(x)?.to_vec()
}

#[test]
fn test_gradient_policy_on_shared_operand() -> Result<()> {
    // d(loss)/da = a - 0 = 2x
    assert_eq!(doubled_input(GradientPolicy::Reference)?, vec![2.0, 4.0, 6.0]);
    assert_eq!(doubled_input(GradientPolicy::Accumulate)?, vec![4.0, 8.0, 12.0]);
    Ok(())
}

#[test]
fn test_sgd_step_through_interpreter() -> Result<()> {
    let mut b = ModuleBuilder::new();
    let w = b.create_weight("w", (1, 2), WeightInit::Broadcast(1.0));
    let target = b.create_input("target", ElemKind::Float, (1, 2));
    b.create_regression("loss", w, target)?;
    let module = b.build()?;

    let training = TrainingConfig::default()
        .with_learning_rate(0.5)
        .with_l2_decay(1.0);
    let config = InterpreterConfig::default().with_training(training);
    let mut interp = Interpreter::new(module, config)?;
    interp.load(target, Tensor::from_vec(vec![0.0f32, 3.0], (1, 2))?)?;
    interp.train_step()?;
    // g = l2·w + (w - target) = [1 + 1, 1 - 2] = [2, -1]
    assert_eq!(interp.read(w)?, vec![0.0, 1.5]);
    Ok(())
}

#[test]
fn test_kernel_error_stops_sweep() -> Result<()> {
    let mut b = ModuleBuilder::new();
    let x = b.create_input("x", ElemKind::Float, (1, 1, 1, 1));
    let pool = b.create_pool("pool", PoolKind::Max, x, 2, 1, 3)?;
    let after = b.create_relu("after", pool)?;
    let module = b.build()?;

    let mut interp = Interpreter::new(module, InterpreterConfig::default())?;
    let err = interp.infer().unwrap_err();
    assert!(matches!(err, Error::EmptyPoolingWindow { x: -3, y: -3 }));
    // The relu's AllocActivation comes after the failing pool.
    assert!(interp.weight(after).is_err());
    Ok(())
}

#[test]
fn test_lrn_and_concat_in_module() -> Result<()> {
    let mut b = ModuleBuilder::new();
    let x = b.create_input("x", ElemKind::Float, (1, 2, 2, 3));
    let lrn = b.create_local_response_normalization("lrn", x, 1, 1e-4, 0.75, 2.0)?;
    let t = b.create_tanh("t", x)?;
    let cat = b.create_concat("cat", &[lrn, t], 3)?;
    let flat = b.create_reshape("flat", cat, (1, 24))?;
    let module = b.build()?;

    let mut interp = Interpreter::new(module, InterpreterConfig::default())?;
    interp.load(x, Tensor::full(0.5, (1, 2, 2, 3)))?;
    interp.infer()?;
    assert_eq!(interp.weight(cat)?.dims(), &[1, 2, 2, 6]);
    let out = interp.read(flat)?;
    assert_relative_eq!(out[3], (0.5f32).tanh(), epsilon = 1e-6);
    Ok(())
}
