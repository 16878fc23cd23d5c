use crate::parser::Acceleration;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    pub time: f64,
    pub value: f64,
}

/// Rolling series keeping roughly the last `capacity` points
pub struct TimeSeries {
    data: Vec<Point>,
    capacity: usize,
}

pub trait PointSliceExt {
    fn min_max_time(&self) -> Option<(f64, f64)>;
    fn min_max_value(&self) -> Option<(f64, f64)>;
}

// Implement the trait for a slice of `Point`
impl PointSliceExt for &[Point] {
    fn min_max_time(&self) -> Option<(f64, f64)> {
        self.iter().fold(None, |acc, point| match acc {
            None => Some((point.time, point.time)),
            Some((min, max)) => Some((min.min(point.time), max.max(point.time))),
        })
    }

    fn min_max_value(&self) -> Option<(f64, f64)> {
        self.iter().fold(None, |acc, point| match acc {
            None => Some((point.value, point.value)),
            Some((min, max)) => Some((min.min(point.value), max.max(point.value))),
        })
    }
}

impl TimeSeries {
    pub fn new(capacity: usize) -> Self {
        Self {
            data: Vec::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn add_point(&mut self, time: f64, value: f64) {
        self.data.push(Point { time, value });
        // Trim in batches so pushes stay amortised O(1)
        if self.data.len() >= self.capacity * 2 {
            let excess = self.data.len() - self.capacity;
            self.data.drain(..excess);
        }
    }

    pub fn last_points(&self, n: usize) -> &[Point] {
        &self.data[self.data.len().saturating_sub(n)..]
    }

    pub fn clear(&mut self) {
        self.data.clear();
    }
}

/// The three axes of one slot's live chart
pub struct AccelerationSeries {
    pub x: TimeSeries,
    pub y: TimeSeries,
    pub z: TimeSeries,
}

impl AccelerationSeries {
    pub fn new(capacity: usize) -> Self {
        Self {
            x: TimeSeries::new(capacity),
            y: TimeSeries::new(capacity),
            z: TimeSeries::new(capacity),
        }
    }

    pub fn push(&mut self, time: f64, sample: &Acceleration) {
        self.x.add_point(time, sample.x);
        self.y.add_point(time, sample.y);
        self.z.add_point(time, sample.z);
    }

    pub fn clear(&mut self) {
        self.x.clear();
        self.y.clear();
        self.z.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_last_points_and_trimming() {
        let mut series = TimeSeries::new(3);
        for i in 0..10 {
            series.add_point(i as f64, (i * 2) as f64);
        }
        let last = series.last_points(3);
        assert_eq!(last.len(), 3);
        assert_eq!(last[2], Point { time: 9.0, value: 18.0 });
        assert!(series.data.len() < 6);
    }

    #[test]
    fn test_min_max() {
        let mut series = TimeSeries::new(10);
        series.add_point(0.5, -2.0);
        series.add_point(1.5, 4.0);
        series.add_point(1.0, 1.0);
        let points = series.last_points(10);
        assert_eq!(points.min_max_time(), Some((0.5, 1.5)));
        assert_eq!(points.min_max_value(), Some((-2.0, 4.0)));

        let empty: &[Point] = &[];
        assert_eq!(empty.min_max_value(), None);
    }

    #[test]
    fn test_acceleration_series_push() {
        let mut series = AccelerationSeries::new(10);
        series.push(0.1, &Acceleration { x: 1.0, y: 2.0, z: 3.0 });
        assert_eq!(series.z.last_points(1)[0], Point { time: 0.1, value: 3.0 });
        series.clear();
        assert!(series.x.last_points(1).is_empty());
    }
}
