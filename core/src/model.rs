use anyhow::Result;
use ndarray::{Array1, Array2, Array3, ArrayView1, ArrayView3};
use safetensors::{Dtype, SafeTensors};

use crate::Error;

/// A convolutional classifier that can expose its last convolutional layer.
pub trait ActivationModel: Send + Sync {
	/// Run a forward pass on a normalized `(height, width, 3)` image.
	///
	/// # Errors
	///
	/// Returns an error if inference fails.
	fn forward(&self, input: ArrayView3<'_, f32>) -> Result<Activations>;
}

impl<T: ActivationModel + ?Sized> ActivationModel for Box<T> {
	fn forward(&self, input: ArrayView3<'_, f32>) -> Result<Activations> {
		(**self).forward(input)
	}
}

/// Outputs of a single forward pass.
#[derive(Debug, Clone)]
pub struct Activations {
	/// Classifier output, one value per class.
	pub scores: Array1<f32>,
	/// Last convolutional layer output, `(height, width, channels)`.
	pub features: Array3<f32>,
}

/// Kernel of the classifier's final dense layer, `(channels, classes)`.
#[derive(Debug, Clone)]
pub struct ClassifierHead {
	kernel: Array2<f32>,
}

impl ClassifierHead {
	#[must_use]
	pub const fn new(kernel: Array2<f32>) -> Self {
		Self { kernel }
	}

	/// Load the kernel from a safetensors file.
	///
	/// # Errors
	///
	/// Returns an error if the file cannot be parsed, or if the tensor is missing, not `F32` or not rank 2.
	pub fn from_safetensors(bytes: &[u8], tensor_name: &str) -> Result<Self, Error> {
		let tensors = SafeTensors::deserialize(bytes)?;
		let tensor = tensors.tensor(tensor_name)?;

		if tensor.dtype() != Dtype::F32 {
			return Err(Error::Weights(format!(
				"expected tensor {tensor_name} to be F32, found {:?}",
				tensor.dtype()
			)));
		}

		let &[channels, classes] = tensor.shape() else {
			return Err(Error::Weights(format!(
				"expected tensor {tensor_name} to have rank 2, found shape {:?}",
				tensor.shape()
			)));
		};

		let values: Vec<f32> = bytemuck::pod_collect_to_vec(tensor.data());
		tracing::debug!("Loaded classifier kernel {tensor_name} with {channels} channels and {classes} classes");

		Ok(Self::new(Array2::from_shape_vec((channels, classes), values)?))
	}

	#[must_use]
	pub fn channels(&self) -> usize {
		self.kernel.nrows()
	}

	#[must_use]
	pub fn classes(&self) -> usize {
		self.kernel.ncols()
	}

	/// Weights connecting every channel to `class`.
	///
	/// # Errors
	///
	/// Returns [`Error::ClassOutOfRange`] if the head has no such class.
	pub fn class_weights(&self, class: usize) -> Result<ArrayView1<'_, f32>, Error> {
		if class >= self.classes() {
			return Err(Error::ClassOutOfRange {
				class,
				classes: self.classes(),
			});
		}

		Ok(self.kernel.column(class))
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use ndarray::array;
	use safetensors::tensor::TensorView;

	fn serialize(name: &str, dtype: Dtype, shape: Vec<usize>, data: &[u8]) -> Vec<u8> {
		let view = TensorView::new(dtype, shape, data).unwrap();

		safetensors::serialize([(name, &view)], &None).unwrap()
	}

	#[test]
	fn loads_kernel_from_safetensors() {
		let values = [1.0_f32, 2.0, 3.0, 4.0, 5.0, 6.0];
		let bytes = serialize("kernel", Dtype::F32, vec![3, 2], bytemuck::cast_slice(&values));

		let head = ClassifierHead::from_safetensors(&bytes, "kernel").unwrap();

		assert_eq!(head.channels(), 3);
		assert_eq!(head.classes(), 2);
		assert_eq!(head.class_weights(1).unwrap(), array![2.0_f32, 4.0, 6.0]);
	}

	#[test]
	fn rejects_missing_tensor() {
		let values = [1.0_f32; 4];
		let bytes = serialize("kernel", Dtype::F32, vec![2, 2], bytemuck::cast_slice(&values));

		let err = ClassifierHead::from_safetensors(&bytes, "dense/kernel").unwrap_err();

		assert!(matches!(err, Error::Weights(_)));
	}

	#[test]
	fn rejects_wrong_rank_and_dtype() {
		let values = [1.0_f32; 4];
		let bytes = serialize("kernel", Dtype::F32, vec![4], bytemuck::cast_slice(&values));
		assert!(ClassifierHead::from_safetensors(&bytes, "kernel").is_err());

		let bytes = serialize("kernel", Dtype::U8, vec![2, 2], &[0, 1, 2, 3]);
		assert!(ClassifierHead::from_safetensors(&bytes, "kernel").is_err());
	}

	#[test]
	fn class_weights_checks_bounds() {
		let head = ClassifierHead::new(array![[1.0, 2.0], [3.0, 4.0]]);

		assert!(matches!(
			head.class_weights(2),
			Err(Error::ClassOutOfRange {
				class: 2,
				classes: 2
			})
		));
	}
}
