//! Stacked LSTM regressor over fixed-length windows.
//!
//! Layout: one or more LSTM layers (every layer but the last feeds its full
//! output sequence to the next), optional dropout after each LSTM layer while
//! training, then linear dense layers ending in a single output unit.
//!
//! Input batches are `[batch, steps, features]`; outputs are `[batch, 1]`.
//! Training uses backpropagation through time, mean squared error, Adam and
//! global-norm gradient clipping.

use ndarray::{s, Array, Array1, Array2, Array3, ArrayView1, ArrayView2, Axis, Dimension, Zip};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

const ADAM_BETA1: f64 = 0.9;
const ADAM_BETA2: f64 = 0.999;
const ADAM_EPSILON: f64 = 1e-7;

#[derive(Debug, Error, PartialEq)]
pub enum ModelError {
    #[error("expected {expected} features per time step, got {actual}")]
    FeatureMismatch { expected: usize, actual: usize },
    #[error("input sequence has no time steps")]
    EmptySequence,
    #[error("{inputs} input sequences but {targets} targets")]
    SampleMismatch { inputs: usize, targets: usize },
    #[error("no training samples")]
    NoSamples,
    #[error("invalid model configuration: {0}")]
    InvalidConfig(String),
    #[error("inconsistent model weights: {0}")]
    InvalidShape(String),
}

/// Architecture and training hyperparameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LstmConfig {
    /// Features per time step
    pub input_size: usize,
    /// Hidden units of each stacked LSTM layer
    pub lstm_units: Vec<usize>,
    /// Hidden dense layers between the last LSTM layer and the output unit
    pub dense_units: Vec<usize>,
    /// Dropout probability applied to LSTM outputs during training
    pub dropout: f64,
    pub learning_rate: f64,
    pub batch_size: usize,
    pub epochs: usize,
    /// Maximum global L2 norm of a batch gradient
    pub gradient_clip: Option<f64>,
    pub seed: u64,
}

impl Default for LstmConfig {
    fn default() -> Self {
        Self {
            input_size: 1,
            lstm_units: vec![64, 64],
            dense_units: vec![32],
            dropout: 0.2,
            learning_rate: 0.001,
            batch_size: 32,
            epochs: 50,
            gradient_clip: Some(1.0),
            seed: 42,
        }
    }
}

impl LstmConfig {
    pub fn with_lstm_units(mut self, units: Vec<usize>) -> Self {
        self.lstm_units = units;
        self
    }

    pub fn with_dense_units(mut self, units: Vec<usize>) -> Self {
        self.dense_units = units;
        self
    }

    pub fn with_dropout(mut self, dropout: f64) -> Self {
        self.dropout = dropout;
        self
    }

    pub fn with_learning_rate(mut self, lr: f64) -> Self {
        self.learning_rate = lr;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_epochs(mut self, epochs: usize) -> Self {
        self.epochs = epochs;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn validate(&self) -> Result<(), ModelError> {
        if self.input_size == 0 {
            return Err(ModelError::InvalidConfig("input_size must be positive".into()));
        }
        if self.lstm_units.is_empty() || self.lstm_units.contains(&0) {
            return Err(ModelError::InvalidConfig(
                "at least one LSTM layer with positive units is required".into(),
            ));
        }
        if self.dense_units.contains(&0) {
            return Err(ModelError::InvalidConfig("dense layers need positive units".into()));
        }
        if !(0.0..1.0).contains(&self.dropout) {
            return Err(ModelError::InvalidConfig("dropout must be in [0, 1)".into()));
        }
        if self.learning_rate <= 0.0 || self.batch_size == 0 {
            return Err(ModelError::InvalidConfig(
                "learning_rate and batch_size must be positive".into(),
            ));
        }
        Ok(())
    }
}

fn sigmoid(v: f64) -> f64 {
    1.0 / (1.0 + (-v).exp())
}

fn glorot(rows: usize, cols: usize, rng: &mut StdRng) -> Array2<f64> {
    let limit = (6.0 / (rows + cols) as f64).sqrt();
    Array2::from_shape_fn((rows, cols), |_| rng.random_range(-limit..limit))
}

fn outer(a: &Array1<f64>, b: &Array1<f64>) -> Array2<f64> {
    Array2::from_shape_fn((a.len(), b.len()), |(i, j)| a[i] * b[j])
}

/// Intermediate values of one LSTM time step, kept for backpropagation.
#[derive(Debug, Clone)]
struct StepCache {
    x: Array1<f64>,
    h_prev: Array1<f64>,
    c_prev: Array1<f64>,
    i: Array1<f64>,
    f: Array1<f64>,
    g: Array1<f64>,
    o: Array1<f64>,
    c: Array1<f64>,
    tanh_c: Array1<f64>,
    h: Array1<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct LstmLayer {
    input_size: usize,
    hidden_size: usize,
    // Gates stacked as [input, forget, cell, output] along the first axis.
    w: Array2<f64>,
    u: Array2<f64>,
    b: Array1<f64>,
}

impl LstmLayer {
    fn new(input_size: usize, hidden_size: usize, rng: &mut StdRng) -> Self {
        let mut b = Array1::zeros(4 * hidden_size);
        b.slice_mut(s![hidden_size..2 * hidden_size]).fill(1.0);

        Self {
            input_size,
            hidden_size,
            w: glorot(4 * hidden_size, input_size, rng),
            u: glorot(4 * hidden_size, hidden_size, rng),
            b,
        }
    }

    fn step(&self, x: ArrayView1<f64>, h_prev: &Array1<f64>, c_prev: &Array1<f64>) -> StepCache {
        let hs = self.hidden_size;
        let z = self.w.dot(&x) + self.u.dot(h_prev) + &self.b;

        let i = z.slice(s![0..hs]).mapv(sigmoid);
        let f = z.slice(s![hs..2 * hs]).mapv(sigmoid);
        let g = z.slice(s![2 * hs..3 * hs]).mapv(f64::tanh);
        let o = z.slice(s![3 * hs..]).mapv(sigmoid);

        let c = &f * c_prev + &i * &g;
        let tanh_c = c.mapv(f64::tanh);
        let h = &o * &tanh_c;

        StepCache {
            x: x.to_owned(),
            h_prev: h_prev.clone(),
            c_prev: c_prev.clone(),
            i,
            f,
            g,
            o,
            c,
            tanh_c,
            h,
        }
    }

    /// Run the whole sequence from zero state; returns `[steps, hidden]` outputs.
    fn forward(&self, xs: ArrayView2<f64>) -> (Array2<f64>, Vec<StepCache>) {
        let steps = xs.nrows();
        let mut h = Array1::<f64>::zeros(self.hidden_size);
        let mut c = Array1::<f64>::zeros(self.hidden_size);
        let mut outputs = Array2::<f64>::zeros((steps, self.hidden_size));
        let mut caches = Vec::with_capacity(steps);

        for t in 0..steps {
            let cache = self.step(xs.row(t), &h, &c);
            outputs.row_mut(t).assign(&cache.h);
            h = cache.h.clone();
            c = cache.c.clone();
            caches.push(cache);
        }

        (outputs, caches)
    }

    /// Backpropagate `dh_seq` (gradient w.r.t. every output step) through time.
    /// Accumulates parameter gradients and returns the gradient w.r.t. the inputs.
    fn backward(&self, caches: &[StepCache], dh_seq: &Array2<f64>, grads: &mut LstmGrads) -> Array2<f64> {
        let hs = self.hidden_size;
        let mut dx_seq = Array2::<f64>::zeros((caches.len(), self.input_size));
        let mut dh_next = Array1::<f64>::zeros(hs);
        let mut dc_next = Array1::<f64>::zeros(hs);
        let mut da = Array1::<f64>::zeros(4 * hs);

        for (t, cache) in caches.iter().enumerate().rev() {
            let dh = &dh_seq.row(t) + &dh_next;
            let d_o = &dh * &cache.tanh_c;
            let dc = &dh * &cache.o * &cache.tanh_c.mapv(|v| 1.0 - v * v) + &dc_next;

            let di = &dc * &cache.g;
            let dg = &dc * &cache.i;
            let df = &dc * &cache.c_prev;
            dc_next = &dc * &cache.f;

            da.slice_mut(s![0..hs])
                .assign(&(&di * &cache.i.mapv(|v| v * (1.0 - v))));
            da.slice_mut(s![hs..2 * hs])
                .assign(&(&df * &cache.f.mapv(|v| v * (1.0 - v))));
            da.slice_mut(s![2 * hs..3 * hs])
                .assign(&(&dg * &cache.g.mapv(|v| 1.0 - v * v)));
            da.slice_mut(s![3 * hs..])
                .assign(&(&d_o * &cache.o.mapv(|v| v * (1.0 - v))));

            grads.w += &outer(&da, &cache.x);
            grads.u += &outer(&da, &cache.h_prev);
            grads.b += &da;

            dx_seq.row_mut(t).assign(&self.w.t().dot(&da));
            dh_next = self.u.t().dot(&da);
        }

        dx_seq
    }
}

/// Fully connected layer with linear activation.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct DenseLayer {
    weights: Array2<f64>,
    biases: Array1<f64>,
}

impl DenseLayer {
    fn new(input_size: usize, output_size: usize, rng: &mut StdRng) -> Self {
        Self {
            weights: glorot(output_size, input_size, rng),
            biases: Array1::zeros(output_size),
        }
    }

    fn forward(&self, x: &Array1<f64>) -> Array1<f64> {
        self.weights.dot(x) + &self.biases
    }
}

#[derive(Debug, Clone)]
struct LstmGrads {
    w: Array2<f64>,
    u: Array2<f64>,
    b: Array1<f64>,
}

#[derive(Debug, Clone)]
struct DenseGrads {
    weights: Array2<f64>,
    biases: Array1<f64>,
}

/// Gradient (or optimizer moment) buffers shaped like the model parameters.
#[derive(Debug, Clone)]
struct Gradients {
    lstm: Vec<LstmGrads>,
    dense: Vec<DenseGrads>,
}

impl Gradients {
    fn zeros_for(model: &LstmModel) -> Self {
        Self {
            lstm: model
                .layers
                .iter()
                .map(|l| LstmGrads {
                    w: Array2::zeros(l.w.raw_dim()),
                    u: Array2::zeros(l.u.raw_dim()),
                    b: Array1::zeros(l.b.raw_dim()),
                })
                .collect(),
            dense: model
                .dense
                .iter()
                .map(|d| DenseGrads {
                    weights: Array2::zeros(d.weights.raw_dim()),
                    biases: Array1::zeros(d.biases.raw_dim()),
                })
                .collect(),
        }
    }

    fn squared_norm(&self) -> f64 {
        let sq = |v: &f64| v * v;
        let lstm: f64 = self
            .lstm
            .iter()
            .map(|g| g.w.iter().map(sq).sum::<f64>() + g.u.iter().map(sq).sum::<f64>() + g.b.iter().map(sq).sum::<f64>())
            .sum();
        let dense: f64 = self
            .dense
            .iter()
            .map(|g| g.weights.iter().map(sq).sum::<f64>() + g.biases.iter().map(sq).sum::<f64>())
            .sum();
        lstm + dense
    }

    fn scale(&mut self, factor: f64) {
        for g in &mut self.lstm {
            g.w *= factor;
            g.u *= factor;
            g.b *= factor;
        }
        for g in &mut self.dense {
            g.weights *= factor;
            g.biases *= factor;
        }
    }

    fn clip_norm(&mut self, max_norm: f64) {
        let norm = self.squared_norm().sqrt();
        if norm > max_norm && norm > 0.0 {
            self.scale(max_norm / norm);
        }
    }
}

struct Adam {
    step: i32,
    m: Gradients,
    v: Gradients,
}

impl Adam {
    fn new(model: &LstmModel) -> Self {
        Self {
            step: 0,
            m: Gradients::zeros_for(model),
            v: Gradients::zeros_for(model),
        }
    }

    fn update<D: Dimension>(
        param: &mut Array<f64, D>,
        grad: &Array<f64, D>,
        m: &mut Array<f64, D>,
        v: &mut Array<f64, D>,
        lr_t: f64,
    ) {
        Zip::from(param)
            .and(grad)
            .and(m)
            .and(v)
            .for_each(|p, &g, mi, vi| {
                *mi = ADAM_BETA1 * *mi + (1.0 - ADAM_BETA1) * g;
                *vi = ADAM_BETA2 * *vi + (1.0 - ADAM_BETA2) * g * g;
                *p -= lr_t * *mi / ((*vi).sqrt() + ADAM_EPSILON);
            });
    }

    fn apply(&mut self, model: &mut LstmModel, grads: &Gradients, learning_rate: f64) {
        self.step += 1;
        let lr_t = learning_rate * (1.0 - ADAM_BETA2.powi(self.step)).sqrt()
            / (1.0 - ADAM_BETA1.powi(self.step));

        for (idx, layer) in model.layers.iter_mut().enumerate() {
            let (g, m, v) = (&grads.lstm[idx], &mut self.m.lstm[idx], &mut self.v.lstm[idx]);
            Self::update(&mut layer.w, &g.w, &mut m.w, &mut v.w, lr_t);
            Self::update(&mut layer.u, &g.u, &mut m.u, &mut v.u, lr_t);
            Self::update(&mut layer.b, &g.b, &mut m.b, &mut v.b, lr_t);
        }
        for (idx, layer) in model.dense.iter_mut().enumerate() {
            let (g, m, v) = (&grads.dense[idx], &mut self.m.dense[idx], &mut self.v.dense[idx]);
            Self::update(&mut layer.weights, &g.weights, &mut m.weights, &mut v.weights, lr_t);
            Self::update(&mut layer.biases, &g.biases, &mut m.biases, &mut v.biases, lr_t);
        }
    }
}

struct ForwardTrace {
    caches: Vec<Vec<StepCache>>,
    dense_inputs: Vec<Array1<f64>>,
    output: Array1<f64>,
}

/// Trained (or freshly initialised) network. Inference borrows it immutably,
/// so a loaded model can be shared across threads without locking.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LstmModel {
    config: LstmConfig,
    layers: Vec<LstmLayer>,
    dense: Vec<DenseLayer>,
}

impl LstmModel {
    pub fn new(config: LstmConfig) -> Result<Self, ModelError> {
        config.validate()?;
        let mut rng = StdRng::seed_from_u64(config.seed);

        let mut layers = Vec::with_capacity(config.lstm_units.len());
        let mut width = config.input_size;
        for &units in &config.lstm_units {
            layers.push(LstmLayer::new(width, units, &mut rng));
            width = units;
        }

        let mut dense = Vec::with_capacity(config.dense_units.len() + 1);
        for &units in &config.dense_units {
            dense.push(DenseLayer::new(width, units, &mut rng));
            width = units;
        }
        dense.push(DenseLayer::new(width, 1, &mut rng));

        Ok(Self { config, layers, dense })
    }

    pub fn config(&self) -> &LstmConfig {
        &self.config
    }

    pub fn input_size(&self) -> usize {
        self.config.input_size
    }

    pub fn parameter_count(&self) -> usize {
        let lstm: usize = self.layers.iter().map(|l| l.w.len() + l.u.len() + l.b.len()).sum();
        let dense: usize = self.dense.iter().map(|d| d.weights.len() + d.biases.len()).sum();
        lstm + dense
    }

    /// Verify that deserialized weights form a network `predict` can run:
    /// every matrix sized for its layer, layer widths chained, one output unit,
    /// and the stored config describing the same architecture.
    pub fn check_shapes(&self) -> Result<(), ModelError> {
        let shape_err = |msg: String| -> Result<(), ModelError> { Err(ModelError::InvalidShape(msg)) };

        self.config.validate()?;
        if self.layers.len() != self.config.lstm_units.len() {
            return shape_err(format!(
                "config lists {} LSTM layers, weights have {}",
                self.config.lstm_units.len(),
                self.layers.len()
            ));
        }
        if self.dense.len() != self.config.dense_units.len() + 1 {
            return shape_err(format!(
                "config lists {} dense layers plus output, weights have {}",
                self.config.dense_units.len(),
                self.dense.len()
            ));
        }

        let mut width = self.config.input_size;
        for (idx, (layer, &units)) in self.layers.iter().zip(&self.config.lstm_units).enumerate() {
            let h = layer.hidden_size;
            if h != units || layer.input_size != width {
                return shape_err(format!(
                    "LSTM layer {} is {}x{}, expected {}x{}",
                    idx, layer.input_size, h, width, units
                ));
            }
            if layer.w.dim() != (4 * h, width) || layer.u.dim() != (4 * h, h) || layer.b.len() != 4 * h {
                return shape_err(format!(
                    "LSTM layer {} has w {:?}, u {:?}, b {}",
                    idx,
                    layer.w.dim(),
                    layer.u.dim(),
                    layer.b.len()
                ));
            }
            width = h;
        }

        let outputs = self.config.dense_units.iter().copied().chain(std::iter::once(1));
        for (idx, (layer, units)) in self.dense.iter().zip(outputs).enumerate() {
            if layer.weights.dim() != (units, width) || layer.biases.len() != units {
                return shape_err(format!(
                    "dense layer {} has weights {:?} and {} biases, expected ({}, {})",
                    idx,
                    layer.weights.dim(),
                    layer.biases.len(),
                    units,
                    width
                ));
            }
            width = units;
        }

        Ok(())
    }

    fn check_batch(&self, batch: &Array3<f64>) -> Result<(), ModelError> {
        let features = batch.shape()[2];
        if features != self.config.input_size {
            return Err(ModelError::FeatureMismatch {
                expected: self.config.input_size,
                actual: features,
            });
        }
        if batch.shape()[1] == 0 {
            return Err(ModelError::EmptySequence);
        }
        Ok(())
    }

    fn forward_trace(&self, seq: ArrayView2<f64>, masks: &[Array2<f64>]) -> ForwardTrace {
        let mut caches = Vec::with_capacity(self.layers.len());
        let mut current = seq.to_owned();

        for (idx, layer) in self.layers.iter().enumerate() {
            let (mut outputs, layer_caches) = layer.forward(current.view());
            if let Some(mask) = masks.get(idx) {
                outputs *= mask;
            }
            caches.push(layer_caches);
            current = outputs;
        }

        let mut activation = current.row(current.nrows() - 1).to_owned();
        let mut dense_inputs = Vec::with_capacity(self.dense.len());
        for layer in &self.dense {
            let next = layer.forward(&activation);
            dense_inputs.push(activation);
            activation = next;
        }

        ForwardTrace {
            caches,
            dense_inputs,
            output: activation,
        }
    }

    fn backward_sample(
        &self,
        trace: &ForwardTrace,
        masks: &[Array2<f64>],
        d_output: Array1<f64>,
        grads: &mut Gradients,
    ) {
        let mut delta = d_output;
        for (idx, layer) in self.dense.iter().enumerate().rev() {
            let input = &trace.dense_inputs[idx];
            grads.dense[idx].weights += &outer(&delta, input);
            grads.dense[idx].biases += &delta;
            delta = layer.weights.t().dot(&delta);
        }

        // Only the final step of the top layer feeds the dense head.
        let top = self.layers.len() - 1;
        let steps = trace.caches[top].len();
        let mut dh_seq = Array2::<f64>::zeros((steps, self.layers[top].hidden_size));
        dh_seq.row_mut(steps - 1).assign(&delta);

        for idx in (0..self.layers.len()).rev() {
            if let Some(mask) = masks.get(idx) {
                dh_seq *= mask;
            }
            dh_seq = self.layers[idx].backward(&trace.caches[idx], &dh_seq, &mut grads.lstm[idx]);
        }
    }

    /// Forward + backward for one sample; returns its squared error.
    fn accumulate_sample(
        &self,
        seq: ArrayView2<f64>,
        target: f64,
        masks: &[Array2<f64>],
        batch_len: usize,
        grads: &mut Gradients,
    ) -> f64 {
        let trace = self.forward_trace(seq, masks);
        let error = trace.output[0] - target;
        let d_output = Array1::from_elem(1, 2.0 * error / batch_len as f64);
        self.backward_sample(&trace, masks, d_output, grads);
        error * error
    }

    fn dropout_masks(&self, steps: usize, rng: &mut StdRng) -> Vec<Array2<f64>> {
        if self.config.dropout == 0.0 {
            return Vec::new();
        }
        let keep = 1.0 - self.config.dropout;
        self.layers
            .iter()
            .map(|layer| {
                Array2::from_shape_fn((steps, layer.hidden_size), |_| {
                    if rng.random::<f64>() < keep {
                        1.0 / keep
                    } else {
                        0.0
                    }
                })
            })
            .collect()
    }

    /// Inference on a `[batch, steps, features]` tensor; returns `[batch, 1]`.
    pub fn predict(&self, batch: &Array3<f64>) -> Result<Array2<f64>, ModelError> {
        self.check_batch(batch)?;

        let mut outputs = Array2::zeros((batch.shape()[0], 1));
        for (b, seq) in batch.outer_iter().enumerate() {
            let trace = self.forward_trace(seq, &[]);
            outputs.row_mut(b).assign(&trace.output);
        }
        Ok(outputs)
    }

    /// Train on `inputs` `[n, steps, features]` against scalar `targets` `[n]`.
    /// Returns the mean squared error of each epoch.
    pub fn fit(&mut self, inputs: &Array3<f64>, targets: &Array1<f64>) -> Result<Vec<f64>, ModelError> {
        self.check_batch(inputs)?;
        let n = inputs.shape()[0];
        if n != targets.len() {
            return Err(ModelError::SampleMismatch {
                inputs: n,
                targets: targets.len(),
            });
        }
        if n == 0 {
            return Err(ModelError::NoSamples);
        }

        let config = self.config.clone();
        let steps = inputs.shape()[1];
        let mut rng = StdRng::seed_from_u64(config.seed.wrapping_add(1));
        let mut adam = Adam::new(self);
        let mut order: Vec<usize> = (0..n).collect();
        let mut history = Vec::with_capacity(config.epochs);

        info!(
            "Training LSTM ({} parameters) on {} sequences for {} epochs",
            self.parameter_count(),
            n,
            config.epochs
        );

        for epoch in 0..config.epochs {
            order.shuffle(&mut rng);
            let mut squared_error = 0.0;

            for batch in order.chunks(config.batch_size) {
                let mut grads = Gradients::zeros_for(self);
                for &idx in batch {
                    let masks = self.dropout_masks(steps, &mut rng);
                    squared_error += self.accumulate_sample(
                        inputs.index_axis(Axis(0), idx),
                        targets[idx],
                        &masks,
                        batch.len(),
                        &mut grads,
                    );
                }
                if let Some(clip) = config.gradient_clip {
                    grads.clip_norm(clip);
                }
                adam.apply(self, &grads, config.learning_rate);
            }

            let loss = squared_error / n as f64;
            history.push(loss);
            debug!("Epoch {}/{} - loss: {:.6}", epoch + 1, config.epochs, loss);
            if (epoch + 1) % 10 == 0 || epoch + 1 == config.epochs {
                info!("Epoch {}/{} - loss: {:.6}", epoch + 1, config.epochs, loss);
            }
        }

        Ok(history)
    }
}
