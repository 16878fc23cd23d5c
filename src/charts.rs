use crate::app::Message;
use crate::timeseries::{AccelerationSeries, PointSliceExt};
use plotters::chart::ChartBuilder;
use plotters::series::LineSeries;
use plotters::style::{CYAN, GREEN, MAGENTA, RGBColor};
use plotters_iced::{Chart, DrawingBackend};

const CHART_POINTS: usize = 400;

/// Live x/y/z chart for one slot
pub struct AccChart<'a> {
    pub series: &'a AccelerationSeries,
    pub caption: String,
}

fn widen(range: Option<(f64, f64)>) -> (f64, f64) {
    match range {
        Some((min, max)) if max > min => (min, max),
        Some((min, _)) => (min - 0.5, min + 0.5),
        None => (0.0, 1.0),
    }
}

impl<'a> Chart<Message> for AccChart<'a> {
    type State = ();

    fn build_chart<DB: DrawingBackend>(&self, _state: &Self::State, mut builder: ChartBuilder<DB>) {
        let x_points = self.series.x.last_points(CHART_POINTS);
        let y_points = self.series.y.last_points(CHART_POINTS);
        let z_points = self.series.z.last_points(CHART_POINTS);

        let (min_time, max_time) = widen(x_points.min_max_time());

        let value_range = [x_points, y_points, z_points]
            .iter()
            .filter_map(|points| points.min_max_value())
            .reduce(|(lo, hi), (min, max)| (lo.min(min), hi.max(max)));
        let (total_min, total_max) = widen(value_range);

        let mut chart = match builder
            .margin(15)
            .caption(&self.caption, ("sans-serif", 18))
            .x_label_area_size(20)
            .y_label_area_size(40)
            .build_cartesian_2d(min_time..max_time, total_min..total_max)
        {
            Ok(chart) => chart,
            Err(e) => {
                log::warn!("Failed to build chart: {:?}", e);
                return;
            }
        };

        let _ = chart.plotting_area().fill(&RGBColor(245, 245, 240));
        let _ = chart
            .configure_mesh()
            .axis_style(RGBColor(60, 60, 60))
            .draw();

        for (points, color) in [(x_points, &GREEN), (y_points, &MAGENTA), (z_points, &CYAN)] {
            if let Err(e) = chart.draw_series(LineSeries::new(
                points.iter().map(|p| (p.time, p.value)),
                color,
            )) {
                log::warn!("Failed to draw series: {:?}", e);
            }
        }
    }
}
