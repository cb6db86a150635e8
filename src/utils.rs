use burn::prelude::*;

/// Copies the tensor values into a row-major `Vec<f32>`, whatever the float element type.
pub fn to_f32_vec<B: Backend, const D: usize>(t: Tensor<B, D>) -> Vec<f32> {
    t.into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .unwrap_or_default()
}

/// Reads a single-element tensor as `f32`.
pub fn scalar_f32<B: Backend>(t: Tensor<B, 1>) -> f32 {
    t.into_scalar().elem::<f32>()
}

pub fn contains_nan_or_inf<B: Backend, const D: usize>(t: &Tensor<B, D>) -> bool {
    to_f32_vec(t.clone()).iter().any(|v| !v.is_finite())
}

/// Row-major position of the first maximum value.
pub fn argmax_2d(values: &[f32], width: usize) -> (usize, usize) {
    let mut best = 0;
    for (i, v) in values.iter().enumerate() {
        if *v > values[best] {
            best = i;
        }
    }
    (best / width.max(1), best % width.max(1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray<f32>;

    #[test]
    fn argmax_2d_takes_first_maximum() {
        let values = [0.1, 0.9, 0.3, 0.9, 0.2, 0.0];
        assert_eq!(argmax_2d(&values, 3), (0, 1));
        assert_eq!(argmax_2d(&[0.0, 0.0, 0.0, 1.0], 2), (1, 1));
    }

    #[test]
    fn nan_and_inf_are_detected() {
        let device = Default::default();
        let finite = Tensor::<TestBackend, 1>::from_floats([0.0, 1.0], &device);
        assert!(!contains_nan_or_inf(&finite));
        let nan = Tensor::<TestBackend, 1>::from_floats([0.0, f32::NAN], &device);
        assert!(contains_nan_or_inf(&nan));
        let inf = Tensor::<TestBackend, 1>::from_floats([f32::INFINITY, 1.0], &device);
        assert!(contains_nan_or_inf(&inf));
    }
}
