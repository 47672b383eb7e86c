//! Tensor API.
//!
//! Tensors are the inputs and outputs of neural networks. Here they carry either image data (for
//! the hand landmark network) or keypoint sequences (for the sign classifier).
//!
//! A Tensor is nothing more than an N-dimensional array of `f32`s in row-major order.

use std::fmt;

/// An N-dimensional array of `f32`s.
#[derive(Clone, PartialEq)]
pub struct Tensor {
    shape: Box<[usize]>,
    data: Box<[f32]>,
}

impl Tensor {
    /// Creates a tensor of the given shape, filled with zeroes.
    pub fn zeros(shape: &[usize]) -> Self {
        let len = shape.iter().product();
        Self {
            shape: shape.into(),
            data: vec![0.0; len].into_boxed_slice(),
        }
    }

    /// Creates a tensor from a shape and its row-major element data.
    ///
    /// # Panics
    ///
    /// Panics if the number of elements does not match the shape.
    pub fn from_shape_vec(shape: &[usize], data: Vec<f32>) -> Self {
        assert_eq!(
            data.len(),
            shape.iter().product::<usize>(),
            "tensor data does not match shape {:?}",
            shape,
        );
        Self {
            shape: shape.into(),
            data: data.into_boxed_slice(),
        }
    }

    /// Creates a tensor by invoking a closure with the indices of every element.
    pub fn from_array_shape_fn<const N: usize, F: FnMut([usize; N]) -> f32>(
        shape: [usize; N],
        mut f: F,
    ) -> Self {
        let len = shape.iter().product();
        let mut data = Vec::with_capacity(len);
        let mut index = [0; N];
        for _ in 0..len {
            data.push(f(index));
            for (i, size) in index.iter_mut().zip(shape).rev() {
                *i += 1;
                if *i < size {
                    break;
                }
                *i = 0;
            }
        }
        Self {
            shape: shape.into(),
            data: data.into_boxed_slice(),
        }
    }

    pub(super) fn from_tract(tract: &tract_onnx::prelude::Tensor) -> anyhow::Result<Self> {
        Ok(Self {
            shape: tract.shape().into(),
            data: tract.as_slice::<f32>()?.into(),
        })
    }

    pub(super) fn to_tract(&self) -> anyhow::Result<tract_onnx::prelude::Tensor> {
        Ok(tract_onnx::prelude::Tensor::from_shape(
            &self.shape,
            &self.data,
        )?)
    }

    /// Returns the shape of this tensor.
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Returns the number of dimensions of this tensor.
    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    /// Returns all elements in row-major order.
    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    /// Returns the only element of a tensor holding exactly one value.
    ///
    /// # Panics
    ///
    /// Panics if the tensor holds more or less than one element.
    pub fn as_singular(&self) -> f32 {
        assert_eq!(
            self.data.len(),
            1,
            "`as_singular` called on tensor with shape {:?}",
            self.shape,
        );
        self.data[0]
    }
}

impl fmt::Debug for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tensor")
            .field("shape", &self.shape)
            .field("len", &self.data.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_shape_fn() {
        let tensor = Tensor::from_array_shape_fn([2, 3], |[y, x]| (y * 10 + x) as f32);
        assert_eq!(tensor.shape(), &[2, 3]);
        assert_eq!(tensor.as_slice(), &[0.0, 1.0, 2.0, 10.0, 11.0, 12.0]);
    }

    #[test]
    fn empty() {
        let tensor = Tensor::from_array_shape_fn([0, 3], |_| unreachable!());
        assert_eq!(tensor.rank(), 2);
        assert!(tensor.as_slice().is_empty());
    }

    #[test]
    fn singular() {
        let tensor = Tensor::from_shape_vec(&[1, 1], vec![0.25]);
        assert_eq!(tensor.as_singular(), 0.25);
    }

    #[test]
    #[should_panic]
    fn shape_mismatch() {
        Tensor::from_shape_vec(&[2, 2], vec![0.0; 3]);
    }

    #[test]
    fn tract_roundtrip() {
        let tensor = Tensor::from_array_shape_fn([1, 2, 2], |[_, y, x]| (y + x) as f32);
        let back = Tensor::from_tract(&tensor.to_tract().unwrap()).unwrap();
        assert_eq!(tensor, back);
    }
}
