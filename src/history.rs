/// Metrics recorded at the end of one epoch.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct EpochRecord {
    pub train_loss: f64,
    pub train_accuracy: f64,
    pub val_loss: f64,
    pub val_accuracy: f64,
}

impl EpochRecord {
    pub fn is_finite(&self) -> bool {
        [
            self.train_loss,
            self.train_accuracy,
            self.val_loss,
            self.val_accuracy,
        ]
        .iter()
        .all(|v| v.is_finite())
    }
}

/// Append-only per-epoch training history.
#[derive(Clone, Debug, Default)]
pub struct History {
    records: Vec<EpochRecord>,
}

impl History {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, record: EpochRecord) {
        self.records.push(record);
    }

    pub fn records(&self) -> &[EpochRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn last(&self) -> Option<&EpochRecord> {
        self.records.last()
    }

    pub fn train_loss(&self) -> Vec<f64> {
        self.series(|r| r.train_loss)
    }

    pub fn val_loss(&self) -> Vec<f64> {
        self.series(|r| r.val_loss)
    }

    pub fn train_accuracy(&self) -> Vec<f64> {
        self.series(|r| r.train_accuracy)
    }

    pub fn val_accuracy(&self) -> Vec<f64> {
        self.series(|r| r.val_accuracy)
    }

    fn series(&self, field: impl Fn(&EpochRecord) -> f64) -> Vec<f64> {
        self.records.iter().map(field).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(epoch: usize) -> EpochRecord {
        let e = epoch as f64;
        EpochRecord {
            train_loss: 2.0 - e * 0.25,
            train_accuracy: 0.5 + e * 0.125,
            val_loss: 2.5 - e * 0.25,
            val_accuracy: 0.25 + e * 0.125,
        }
    }

    #[test]
    fn series_follow_epoch_order() {
        let mut history = History::new();
        assert!(history.is_empty());
        for epoch in 0..3 {
            history.push(record(epoch));
        }

        assert_eq!(history.len(), 3);
        assert_eq!(history.train_accuracy(), vec![0.5, 0.625, 0.75]);
        assert_eq!(history.val_loss()[0], 2.5);
        assert_eq!(history.last(), Some(&record(2)));
    }

    #[test]
    fn non_finite_records_are_detected() {
        let mut bad = record(0);
        assert!(bad.is_finite());
        bad.val_loss = f64::NAN;
        assert!(!bad.is_finite());
    }
}
