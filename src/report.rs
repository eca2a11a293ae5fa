use textplots::{Chart, Plot, Shape};

use crate::history::History;
use crate::training::Metrics;

const CHART_WIDTH: u32 = 120;
const CHART_HEIGHT: u32 = 40;

/// Draws the loss and accuracy curves, train and validation, one chart each.
pub fn plot_history(history: &History) {
    if history.is_empty() {
        return;
    }

    plot_curves("Loss", &history.train_loss(), &history.val_loss());
    plot_curves("Accuracy", &history.train_accuracy(), &history.val_accuracy());
}

fn plot_curves(metric: &str, train: &[f64], valid: &[f64]) {
    let train = points(train);
    let valid = points(valid);
    let last_epoch = train.len().max(valid.len()).saturating_sub(1).max(1);

    println!("{} per epoch (first curve: train, second curve: validation)", metric);
    Chart::new(CHART_WIDTH, CHART_HEIGHT, 0.0, last_epoch as f32)
        .lineplot(&Shape::Lines(&train))
        .lineplot(&Shape::Lines(&valid))
        .display();
    println!("{}", legend(metric, &train, &valid));
}

/// `(epoch, value)` pairs with 0-based epochs.
fn points(values: &[f64]) -> Vec<(f32, f32)> {
    values
        .iter()
        .enumerate()
        .map(|(epoch, value)| (epoch as f32, *value as f32))
        .collect()
}

fn legend(metric: &str, train: &[(f32, f32)], valid: &[(f32, f32)]) -> String {
    let format = |points: &[(f32, f32)]| {
        points
            .iter()
            .map(|(_, value)| format!("{:.4}", value))
            .collect::<Vec<_>>()
            .join(", ")
    };

    format!(
        "train_{metric}: [{}]\nval_{metric}: [{}]",
        format(train),
        format(valid),
        metric = metric.to_lowercase()
    )
}

pub fn final_summary(metrics: &Metrics) -> String {
    format!(
        "Final Loss: {}\nFinal Accuracy: {}",
        metrics.loss, metrics.accuracy
    )
}
