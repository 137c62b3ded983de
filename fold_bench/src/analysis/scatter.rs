use std::path::Path;

use plotters::prelude::*;
use tracing::{info, warn};

use crate::error::{PipelineError, PipelineResult};

fn plot_err<E: std::fmt::Display>(e: E) -> PipelineError {
    PipelineError::Plot(e.to_string())
}

/// Measured versus predicted scatter with the identity line, written as SVG.
/// Returns `false` without writing when no pair is finite.
pub fn scatter_plot(output_path: &Path, measured: &[f64], predicted: &[f64], title: &str) -> PipelineResult<bool> {
    let points: Vec<(f64, f64)> = measured
        .iter()
        .zip(predicted)
        .map(|(&m, &p)| (m, p))
        .filter(|(m, p)| m.is_finite() && p.is_finite())
        .collect();
    if points.is_empty() {
        warn!("No finite points for {}, skipping {}", title, output_path.display());
        return Ok(false);
    }

    let lo = points.iter().fold(f64::INFINITY, |a, &(m, p)| a.min(m).min(p));
    let hi = points.iter().fold(f64::NEG_INFINITY, |a, &(m, p)| a.max(m).max(p));
    let pad = ((hi - lo) * 0.05).max(1e-3);
    let range = (lo - pad)..(hi + pad);

    let root = SVGBackend::new(output_path, (600, 600)).into_drawing_area();
    root.fill(&WHITE).map_err(plot_err)?;

    let mut chart = ChartBuilder::on(&root)
        .margin(20)
        .caption(title, ("sans-serif", 18))
        .x_label_area_size(40)
        .y_label_area_size(50)
        .build_cartesian_2d(range.clone(), range.clone())
        .map_err(plot_err)?;

    chart
        .configure_mesh()
        .disable_mesh()
        .x_desc("Measured")
        .y_desc("Predicted")
        .draw()
        .map_err(plot_err)?;

    chart
        .draw_series(std::iter::once(PathElement::new(
            vec![(range.start, range.start), (range.end, range.end)],
            BLACK.mix(0.4).stroke_width(1),
        )))
        .map_err(plot_err)?;

    chart
        .draw_series(points.iter().map(|&(m, p)| Circle::new((m, p), 2, BLUE.mix(0.5).filled())))
        .map_err(plot_err)?;

    root.present().map_err(plot_err)?;
    info!("Scatter plot saved to {}", output_path.display());
    Ok(true)
}
