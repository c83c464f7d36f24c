//! Epoch-level training metrics with health checks.

/// Masked regression metrics for one pass over a dataset.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct KeypointMetrics {
    /// Mean masked MSE (the training objective).
    pub loss: f64,
    /// Mean masked MAE, in pixels.
    pub mae: f64,
    /// Number of samples the averages cover.
    pub samples: usize,
}

impl KeypointMetrics {
    /// Root of the masked MSE, in pixels.
    pub fn rmse(&self) -> f64 {
        self.loss.max(0.0).sqrt()
    }

    /// Check for common training pathologies.
    ///
    /// Returns human-readable warnings; empty if healthy.
    pub fn health_check(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if !self.loss.is_finite() {
            warnings.push(format!("Loss is not finite ({})", self.loss));
        }
        if !self.mae.is_finite() {
            warnings.push(format!("MAE is not finite ({})", self.mae));
        }
        if self.samples == 0 {
            warnings.push("No samples were evaluated".to_string());
        }
        // Coordinates live in a 96-pixel frame; a mean error past half the
        // image means the regressor is not tracking faces at all.
        if self.mae.is_finite() && self.mae > 48.0 {
            warnings.push(format!("MAE {:.1}px exceeds half the image width", self.mae));
        }

        warnings
    }
}

impl std::fmt::Display for KeypointMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "loss={:.4} mae={:.3} rmse={:.3} n={}",
            self.loss,
            self.mae,
            self.rmse(),
            self.samples
        )
    }
}

/// Sample-weighted running average over the batches of one epoch.
///
/// Batch losses are means over their samples, so weighting by batch size
/// makes the epoch value equal to the per-sample mean over the whole epoch.
#[derive(Debug, Default)]
pub struct EpochAccumulator {
    loss_sum: f64,
    mae_sum: f64,
    samples: usize,
}

impl EpochAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one batch's mean loss and MAE.
    pub fn update(&mut self, loss: f64, mae: f64, batch_size: usize) {
        self.loss_sum += loss * batch_size as f64;
        self.mae_sum += mae * batch_size as f64;
        self.samples += batch_size;
    }

    /// Averages so far, or `None` before the first batch.
    pub fn finish(&self) -> Option<KeypointMetrics> {
        if self.samples == 0 {
            return None;
        }
        let n = self.samples as f64;
        Some(KeypointMetrics {
            loss: self.loss_sum / n,
            mae: self.mae_sum / n,
            samples: self.samples,
        })
    }
}

/// One row of the training history.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct EpochRecord {
    pub epoch: usize,
    pub lr: f64,
    pub train: KeypointMetrics,
    pub val: Option<KeypointMetrics>,
}

/// Per-epoch history, written next to the checkpoints as JSON.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct MetricsHistory {
    pub epochs: Vec<EpochRecord>,
}

impl MetricsHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, record: EpochRecord) {
        self.epochs.push(record);
    }

    pub fn len(&self) -> usize {
        self.epochs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.epochs.is_empty()
    }

    /// Epoch with the lowest monitored loss (validation if present, else train).
    pub fn best(&self) -> Option<&EpochRecord> {
        self.epochs
            .iter()
            .filter(|r| monitored_loss(r).is_finite())
            .min_by(|a, b| monitored_loss(a).total_cmp(&monitored_loss(b)))
    }
}

/// Loss the schedulers watch: validation when available.
pub fn monitored_loss(record: &EpochRecord) -> f64 {
    record.val.as_ref().unwrap_or(&record.train).loss
}
