// init — Parameter initialization
//
// Weights are initialized once, when the interpreter binds them. The scheme
// travels with the IR value so every backend starting from the same seed sees
// the same starting parameters.
//
//   Zero                 — all elements 0
//   Broadcast(v)         — all elements v (biases default to 0.1)
//   Xavier { fan_in }    — U(-√(3/fan_in), √(3/fan_in))

use rand::Rng;

use crate::dtype::Float;
use crate::error::Result;
use crate::tensor::Tensor;

/// How a weight tensor is filled before the first run.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum WeightInit {
    #[default]
    Zero,
    Broadcast(Float),
    Xavier { fan_in: usize },
}

impl WeightInit {
    /// Fill `tensor` according to this scheme. Index tensors only accept `Zero`.
    pub fn apply<R: Rng + ?Sized>(&self, tensor: &mut Tensor, rng: &mut R) -> Result<()> {
        match *self {
            WeightInit::Zero => tensor.zero(),
            WeightInit::Broadcast(v) => tensor.handle_mut::<Float>()?.fill(v),
            WeightInit::Xavier { fan_in } => {
                let scale = xavier_scale(fan_in);
                let mut h = tensor.handle_mut::<Float>()?;
                for v in h.as_mut_slice() {
                    *v = rng.gen_range(-scale..=scale);
                }
            }
        }
        Ok(())
    }
}

/// Half-width of the Xavier uniform range.
pub fn xavier_scale(fan_in: usize) -> Float {
    (3.0 / fan_in.max(1) as Float).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dtype::ElemKind;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_xavier_range() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut t = Tensor::zeros(ElemKind::Float, (8, 9));
        WeightInit::Xavier { fan_in: 9 }.apply(&mut t, &mut rng).unwrap();
        let s = xavier_scale(9);
        let v = t.to_vec::<Float>().unwrap();
        assert!(v.iter().all(|x| x.abs() <= s));
        assert!(v.iter().any(|&x| x != 0.0));
    }

    #[test]
    fn test_xavier_is_seeded() {
        let mut a = Tensor::zeros(ElemKind::Float, 16);
        let mut b = Tensor::zeros(ElemKind::Float, 16);
        let init = WeightInit::Xavier { fan_in: 4 };
        init.apply(&mut a, &mut StdRng::seed_from_u64(1)).unwrap();
        init.apply(&mut b, &mut StdRng::seed_from_u64(1)).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_broadcast_rejects_index() {
        let mut t = Tensor::zeros(ElemKind::Index, 3);
        let mut rng = StdRng::seed_from_u64(0);
        assert!(WeightInit::Broadcast(0.1).apply(&mut t, &mut rng).is_err());
        assert!(WeightInit::Zero.apply(&mut t, &mut rng).is_ok());
    }
}
