//! Neural Network inference.

pub mod tensor;

use tensor::Tensor;
use tract_onnx::prelude::{
    tvec, Datum, Framework, Graph, InferenceFact, InferenceModelExt, SimplePlan, TValue, TVec,
    TypedFact, TypedOp,
};

use std::{borrow::Cow, ops::Index, path::Path, sync::Arc};

type Model = SimplePlan<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;

/// Neural network loader.
pub struct Loader<'a> {
    model_data: Cow<'a, [u8]>,
    input_shapes: Vec<Vec<usize>>,
}

impl<'a> Loader<'a> {
    fn new(data: Cow<'a, [u8]>) -> Self {
        Self {
            model_data: data,
            input_shapes: Vec::new(),
        }
    }

    /// Pins the shape of the next network input.
    ///
    /// ONNX exports frequently leave the batch (or sequence) dimension symbolic. Calling this
    /// method once per input, in input order, fixes those dimensions so that the network can be
    /// optimized for the shape it will actually be run with.
    pub fn with_input_shape<S>(mut self, shape: S) -> Self
    where
        S: Into<Vec<usize>>,
    {
        self.input_shapes.push(shape.into());
        self
    }

    /// Loads and optimizes the network.
    ///
    /// Returns an error if the network data is malformed, if the network data is incomplete, if a
    /// pinned input shape is incompatible with the network, or if the network uses unimplemented
    /// operations.
    pub fn load(self) -> anyhow::Result<NeuralNetwork> {
        let mut model = tract_onnx::onnx().model_for_read(&mut &*self.model_data)?;
        for (index, shape) in self.input_shapes.iter().enumerate() {
            let shape = shape.iter().copied().collect::<TVec<usize>>();
            let fact = InferenceFact::dt_shape(f32::datum_type(), shape);
            model = model.with_input_fact(index, fact)?;
        }
        let graph = model.into_optimized()?;
        let plan = SimplePlan::new(graph)?;

        Ok(NeuralNetwork(Arc::new(plan)))
    }
}

/// A neural network that can be used for inference.
///
/// This is a cheaply [`Clone`]able handle to the underlying network structures.
#[derive(Clone)]
pub struct NeuralNetwork(Arc<Model>);

impl NeuralNetwork {
    /// Loads a pre-trained model from an ONNX file path.
    ///
    /// The path must have a `.onnx` extension.
    pub fn from_path<'a, P: AsRef<Path>>(path: P) -> anyhow::Result<Loader<'a>> {
        Self::from_path_impl(path.as_ref())
    }

    fn from_path_impl<'a>(path: &Path) -> anyhow::Result<Loader<'a>> {
        match path.extension() {
            Some(ext) if ext == "onnx" => {}
            _ => anyhow::bail!(
                "neural network file '{}' must have `.onnx` extension",
                path.display()
            ),
        }

        let model_data = std::fs::read(path)?;
        Ok(Loader::new(model_data.into()))
    }

    /// Loads a pre-trained model from an in-memory ONNX file.
    pub fn from_onnx(raw: &[u8]) -> anyhow::Result<Loader<'_>> {
        Ok(Loader::new(raw.into()))
    }

    /// Returns the number of input nodes of the network.
    pub fn num_inputs(&self) -> usize {
        self.0.model().inputs.len()
    }

    /// Returns the number of output nodes of the network.
    pub fn num_outputs(&self) -> usize {
        self.0.model().outputs.len()
    }

    /// Returns the concrete tensor shape of input `index`.
    pub fn input_shape(&self, index: usize) -> anyhow::Result<Vec<usize>> {
        let fact = self.0.model().input_fact(index)?;
        match fact.shape.as_concrete() {
            Some(shape) => Ok(shape.to_vec()),
            None => anyhow::bail!(
                "network input {index} has symbolic shape {:?}; pin it with `with_input_shape`",
                fact.shape
            ),
        }
    }

    /// Returns the concrete tensor shape of output `index`.
    pub fn output_shape(&self, index: usize) -> anyhow::Result<Vec<usize>> {
        let fact = self.0.model().output_fact(index)?;
        match fact.shape.as_concrete() {
            Some(shape) => Ok(shape.to_vec()),
            None => anyhow::bail!("network output {index} has symbolic shape {:?}", fact.shape),
        }
    }

    /// Runs the network on a set of [`Inputs`], returning the estimated [`Outputs`].
    #[doc(alias = "infer")]
    pub fn estimate(&self, inputs: &Inputs) -> anyhow::Result<Outputs> {
        let inputs = inputs
            .inner
            .iter()
            .map(|t| Ok(TValue::from_const(Arc::new(t.to_tract()?))))
            .collect::<anyhow::Result<TVec<_>>>()?;
        let outputs = self.0.run(inputs)?;
        let inner = outputs
            .iter()
            .map(|tract| Tensor::from_tract(tract))
            .collect::<anyhow::Result<_>>()?;

        Ok(Outputs { inner })
    }
}

/// The result of a neural network inference pass.
///
/// This is a list of tensors corresponding to the network's output nodes.
#[derive(Debug)]
pub struct Outputs {
    inner: TVec<Tensor>,
}

impl Outputs {
    /// Returns the number of tensors in this inference output.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Returns an iterator over the output tensors.
    pub fn iter(&self) -> impl Iterator<Item = &Tensor> {
        self.inner.iter()
    }
}

impl Index<usize> for Outputs {
    type Output = Tensor;

    fn index(&self, index: usize) -> &Tensor {
        &self.inner[index]
    }
}

/// List of input tensors for neural network inference.
#[derive(Debug)]
pub struct Inputs {
    inner: TVec<Tensor>,
}

impl Inputs {
    /// Returns the number of input tensors stored in `self`.
    pub fn len(&self) -> usize {
        self.inner.len()
    }
}

impl From<Tensor> for Inputs {
    fn from(t: Tensor) -> Self {
        Self { inner: tvec![t] }
    }
}

impl FromIterator<Tensor> for Inputs {
    fn from_iter<T: IntoIterator<Item = Tensor>>(iter: T) -> Self {
        Self {
            inner: iter.into_iter().collect(),
        }
    }
}
