//! Validation-driven learning-rate reduction and early stopping.
//!
//! Both watch one scalar per epoch (validation loss when available) and only
//! count an epoch as an improvement when it beats the best value so far by
//! more than `min_delta`. Non-finite values never count as improvements.

fn improves(best: Option<f64>, loss: f64, min_delta: f64) -> bool {
    loss.is_finite() && best.map_or(true, |b| loss < b - min_delta)
}

/// Multiply the learning rate by `factor` after `patience` epochs without
/// improvement, never going below `min_lr`.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct PlateauScheduler {
    lr: f64,
    factor: f64,
    patience: usize,
    min_lr: f64,
    min_delta: f64,
    best: Option<f64>,
    wait: usize,
}

impl PlateauScheduler {
    pub fn new(lr: f64, factor: f64, patience: usize, min_lr: f64) -> Self {
        Self {
            lr,
            factor,
            patience,
            min_lr,
            min_delta: 1e-4,
            best: None,
            wait: 0,
        }
    }

    pub fn with_min_delta(mut self, min_delta: f64) -> Self {
        self.min_delta = min_delta;
        self
    }

    /// Current learning rate.
    pub fn lr(&self) -> f64 {
        self.lr
    }

    /// Record one epoch's monitored loss and return the learning rate for
    /// the next epoch. A `patience` of 0 disables reduction.
    pub fn step(&mut self, loss: f64) -> f64 {
        if self.patience == 0 {
            return self.lr;
        }
        if improves(self.best, loss, self.min_delta) {
            self.best = Some(loss);
            self.wait = 0;
            return self.lr;
        }

        self.wait += 1;
        if self.wait >= self.patience {
            let reduced = (self.lr * self.factor).max(self.min_lr);
            if reduced < self.lr {
                tracing::info!(
                    from = format!("{:.2e}", self.lr),
                    to = format!("{reduced:.2e}"),
                    "Validation loss plateaued, reducing learning rate"
                );
            }
            self.lr = reduced;
            self.wait = 0;
        }
        self.lr
    }
}

/// Outcome of one early-stopping update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopDecision {
    /// New best value; callers snapshot the model here.
    Improved,
    /// No improvement yet, keep training.
    Wait,
    /// Patience exhausted.
    Stop,
}

/// Stop training after `patience` epochs without improvement.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct EarlyStopping {
    patience: usize,
    min_delta: f64,
    best: Option<f64>,
    best_epoch: Option<usize>,
    wait: usize,
}

impl EarlyStopping {
    /// A `patience` of 0 never stops, but still tracks the best epoch.
    /// Any strict decrease counts as an improvement unless a `min_delta` is set.
    pub fn new(patience: usize) -> Self {
        Self {
            patience,
            min_delta: 0.0,
            best: None,
            best_epoch: None,
            wait: 0,
        }
    }

    pub fn with_min_delta(mut self, min_delta: f64) -> Self {
        self.min_delta = min_delta;
        self
    }

    /// Best monitored value seen so far.
    pub fn best(&self) -> Option<f64> {
        self.best
    }

    /// Epoch that produced [`Self::best`].
    pub fn best_epoch(&self) -> Option<usize> {
        self.best_epoch
    }

    pub fn update(&mut self, epoch: usize, loss: f64) -> StopDecision {
        if improves(self.best, loss, self.min_delta) {
            self.best = Some(loss);
            self.best_epoch = Some(epoch);
            self.wait = 0;
            return StopDecision::Improved;
        }
        self.wait += 1;
        if self.patience > 0 && self.wait >= self.patience {
            StopDecision::Stop
        } else {
            StopDecision::Wait
        }
    }
}
