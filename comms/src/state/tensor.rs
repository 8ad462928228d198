use ndarray::{Array1, ArrayD, IxDyn};

use super::{Result, ShapeErr};

/// A dense n-dimensional array of `f32` values, the unit every model parameter is stored in.
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor(ArrayD<f32>);

impl Tensor {
    /// Creates a new `Tensor` from its shape and its elements in row-major order.
    ///
    /// # Arguments
    /// * `shape` - The size of every dimension.
    /// * `data` - The flat elements of the tensor.
    ///
    /// # Returns
    /// A new `Tensor` or a `ShapeErr` if `data` doesn't have as many elements as `shape` requires.
    pub fn new(shape: Vec<usize>, data: Vec<f32>) -> Result<Self> {
        let got = data.len();
        let expected = shape.iter().product();

        ArrayD::from_shape_vec(IxDyn(&shape), data)
            .map(Self)
            .map_err(|_| ShapeErr::DataLength { got, expected })
    }

    /// Creates a one dimensional `Tensor`.
    ///
    /// # Arguments
    /// * `data` - The elements of the tensor.
    pub fn from_vec(data: Vec<f32>) -> Self {
        Self(Array1::from(data).into_dyn())
    }

    /// Creates a `Tensor` filled with zeros.
    ///
    /// # Arguments
    /// * `shape` - The size of every dimension.
    pub fn zeros(shape: &[usize]) -> Self {
        Self(ArrayD::zeros(IxDyn(shape)))
    }

    /// Returns the size of every dimension of this tensor.
    pub fn shape(&self) -> &[usize] {
        self.0.shape()
    }

    /// Returns the total amount of elements in this tensor.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates the elements of this tensor in row-major order.
    pub fn iter(&self) -> impl Iterator<Item = &f32> {
        self.0.iter()
    }

    /// Copies the elements of this tensor in row-major order.
    pub fn to_vec(&self) -> Vec<f32> {
        self.0.iter().copied().collect()
    }

    /// Accumulates `alpha * other` into this tensor, element by element.
    ///
    /// # Arguments
    /// * `alpha` - The scale applied to `other`.
    /// * `other` - A tensor of the same shape.
    ///
    /// # Returns
    /// A `ShapeErr` if the shapes differ, in which case `self` is left untouched.
    pub fn scaled_add(&mut self, alpha: f32, other: &Tensor) -> Result<()> {
        if self.shape() != other.shape() {
            return Err(ShapeErr::Incompatible {
                got: other.shape().to_vec(),
                expected: self.shape().to_vec(),
            });
        }

        self.0.scaled_add(alpha, &other.0);
        Ok(())
    }

    /// Divides every element of this tensor by `divisor`.
    pub fn div_scalar(&mut self, divisor: f32) {
        self.0.mapv_inplace(|x| x / divisor);
    }

    /// Returns a view of the underlying array.
    pub fn as_array(&self) -> &ArrayD<f32> {
        &self.0
    }
}

impl From<ArrayD<f32>> for Tensor {
    fn from(value: ArrayD<f32>) -> Self {
        Self(value)
    }
}
