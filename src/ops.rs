use burn::prelude::{Backend, ElementConversion, Int, Tensor};
use burn::tensor::Element;

pub fn l2<B: Backend, const D: usize>(tensor: Tensor<B, D>) -> Tensor<B, 1> {
    let tensor = tensor.flatten::<1>(0, D - 1);
    let squared = tensor.powi_scalar(2);
    let summed = squared.sum();
    let norm = summed.sqrt();
    norm
}

/// Returns `value` in the forward pass while routing the gradient to `input` unchanged.
///
/// `input - sg(input)` is exactly zero, so the result is bit-identical to `value`.
pub fn straight_through<B: Backend, const D: usize>(
    input: Tensor<B, D>,
    value: Tensor<B, D>,
) -> Tensor<B, D> {
    (input.clone() - input.detach()) + value.detach()
}

pub fn count_non_finite<B: Backend, const D: usize>(tensor: &Tensor<B, D>) -> usize {
    let count = tensor
        .clone()
        .is_finite()
        .bool_not()
        .int()
        .sum()
        .into_scalar()
        .elem::<i64>();

    count as usize
}

pub trait ScalarExt {
    fn scalar<E: Element>(&self) -> E;
}

impl<B: Backend> ScalarExt for Tensor<B, 1> {
    fn scalar<E: Element>(&self) -> E {
        assert_eq!(self.dims()[0], 1);
        self.clone().into_scalar().elem()
    }
}

impl<B: Backend> ScalarExt for Tensor<B, 1, Int> {
    fn scalar<E: Element>(&self) -> E {
        assert_eq!(self.dims()[0], 1);
        self.clone().into_scalar().elem()
    }
}

#[cfg(test)]
mod tests {
    use burn::backend::ndarray::NdArrayDevice;
    use burn::backend::{Autodiff, NdArray};
    use burn::tensor::{Tensor, TensorData};

    use super::*;

    type TestAutodiff = Autodiff<NdArray>;

    #[test]
    fn l2_of_known_vector() {
        let device = NdArrayDevice::Cpu;
        let tensor = Tensor::<NdArray, 2>::from_floats([[3.0, 0.0], [0.0, 4.0]], &device);

        assert_eq!(l2(tensor).scalar::<f32>(), 5.0);
    }

    #[test]
    fn straight_through_keeps_value_and_copies_gradient() {
        let device = NdArrayDevice::Cpu;
        let input =
            Tensor::<TestAutodiff, 1>::from_floats([0.3, -1.7, 2.2], &device).require_grad();
        let value = Tensor::<TestAutodiff, 1>::from_floats([1.0, 5.0, -3.25], &device);

        let output = straight_through(input.clone(), value.clone());
        output
            .to_data()
            .assert_eq(&value.to_data(), true);

        let grads = (output * Tensor::from_floats([1.0, 2.0, 3.0], &device))
            .sum()
            .backward();
        let grad = input.grad(&grads).unwrap();

        grad.to_data()
            .assert_eq(&TensorData::from([1.0f32, 2.0, 3.0]), false);
    }

    #[test]
    fn counts_nan_and_inf() {
        let device = NdArrayDevice::Cpu;
        let tensor = Tensor::<NdArray, 1>::from_floats(
            [1.0, f32::NAN, f32::INFINITY, f32::NEG_INFINITY, 0.0],
            &device,
        );

        assert_eq!(count_non_finite(&tensor), 3);
    }
}
