use ndarray::{Array1, Array3};

/// Number of past observations the model consumes per prediction.
pub const WINDOW_SIZE: usize = 60;

/// One supervised example: `window` consecutive values and the value right after them.
#[derive(Debug, Clone, PartialEq)]
pub struct SequencePair {
    pub input: Vec<f64>,
    pub target: f64,
}

/// Slide a `window`-sized frame one step at a time over `series`.
///
/// Produces `max(0, series.len() - window)` pairs; a series no longer than the
/// window yields nothing.
pub fn build_sequence_pairs(series: &[f64], window: usize) -> Vec<SequencePair> {
    series
        .windows(window + 1)
        .map(|frame| SequencePair {
            input: frame[..window].to_vec(),
            target: frame[window],
        })
        .collect()
}

/// The most recent `window` observations, oldest first.
pub fn latest_window(series: &[f64], window: usize) -> Option<&[f64]> {
    if series.len() < window {
        return None;
    }
    Some(&series[series.len() - window..])
}

/// Sequence pairs packed as model tensors: inputs `[n, window, 1]`, targets `[n]`.
#[derive(Debug, Clone)]
pub struct SequenceSet {
    pub inputs: Array3<f64>,
    pub targets: Array1<f64>,
}

impl SequenceSet {
    pub fn from_series(series: &[f64], window: usize) -> Self {
        Self::from_pairs(&build_sequence_pairs(series, window), window)
    }

    pub fn from_pairs(pairs: &[SequencePair], window: usize) -> Self {
        let mut inputs = Array3::zeros((pairs.len(), window, 1));
        let mut targets = Array1::zeros(pairs.len());

        for (i, pair) in pairs.iter().enumerate() {
            for (t, &value) in pair.input.iter().enumerate() {
                inputs[[i, t, 0]] = value;
            }
            targets[i] = pair.target;
        }

        Self { inputs, targets }
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}
