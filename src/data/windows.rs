//! Week / day / recent window extraction
//!
//! The raw signal is a `(time, nodes, features)` array sampled every five
//! minutes. For a label starting at `t`, each component looks back a whole
//! number of periods (one week, one day, one hour) and takes a segment of
//! `num_for_predict` steps from every period.

use ndarray::{s, Array3, Array4, ArrayView3};

use crate::error::{DagcnError, Result};
use crate::utils::DataConfig;

const HOURS_PER_DAY: usize = 24;
const DAYS_PER_WEEK: usize = 7;

/// Look back `num_of_periods` periods of `units` hours from `label_start`
///
/// Returns the `(start, end)` segments in chronological order, or `None` when
/// the history or the label runs past either end of the series.
pub fn search_data(
    sequence_length: usize,
    num_of_periods: usize,
    label_start: usize,
    num_for_predict: usize,
    units: usize,
    points_per_hour: usize,
) -> Option<Vec<(usize, usize)>> {
    if label_start + num_for_predict > sequence_length {
        return None;
    }

    let mut segments = Vec::with_capacity(num_of_periods);
    for i in 1..=num_of_periods {
        let offset = points_per_hour * units * i;
        let start = label_start.checked_sub(offset)?;
        segments.push((start, start + num_for_predict));
    }
    segments.reverse();
    Some(segments)
}

/// Segments of all three components for one label position
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleIndices {
    pub week: Vec<(usize, usize)>,
    pub day: Vec<(usize, usize)>,
    pub recent: Vec<(usize, usize)>,
    pub label_start: usize,
}

impl SampleIndices {
    /// Resolve the segments for `label_start`, if the full history exists
    pub fn locate(sequence_length: usize, label_start: usize, config: &DataConfig) -> Option<Self> {
        let search = |periods: usize, units: usize| {
            search_data(
                sequence_length,
                periods,
                label_start,
                config.num_for_predict,
                units,
                config.points_per_hour,
            )
        };

        Some(Self {
            week: search(config.num_of_weeks, DAYS_PER_WEEK * HOURS_PER_DAY)?,
            day: search(config.num_of_days, HOURS_PER_DAY)?,
            recent: search(config.num_of_hours, 1)?,
            label_start,
        })
    }
}

/// All windows cut from a signal, before splitting
#[derive(Debug)]
pub struct WindowSet {
    /// `(samples, features, nodes, weeks * num_for_predict)`
    pub week: Array4<f32>,
    /// `(samples, features, nodes, days * num_for_predict)`
    pub day: Array4<f32>,
    /// `(samples, features, nodes, hours * num_for_predict)`
    pub recent: Array4<f32>,
    /// `(samples, nodes, num_for_predict)`, feature 0 in raw units
    pub target: Array3<f32>,
}

impl WindowSet {
    pub fn len(&self) -> usize {
        self.target.dim().0
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Cut every complete sample out of a `(time, nodes, features)` signal
pub fn generate_windows(signal: ArrayView3<f32>, config: &DataConfig) -> Result<WindowSet> {
    let (seq_len, num_nodes, num_features) = signal.dim();
    if num_features == 0 {
        return Err(DagcnError::Dataset("signal has no feature channels".into()));
    }

    let samples: Vec<SampleIndices> = (0..seq_len)
        .filter_map(|t| SampleIndices::locate(seq_len, t, config))
        .collect();

    if samples.is_empty() {
        return Err(DagcnError::Dataset(format!(
            "signal with {} steps is too short for {} week(s) of history",
            seq_len, config.num_of_weeks
        )));
    }

    let n = samples.len();
    let horizon = config.num_for_predict;
    let mut week = Array4::zeros((n, num_features, num_nodes, config.num_of_weeks * horizon));
    let mut day = Array4::zeros((n, num_features, num_nodes, config.num_of_days * horizon));
    let mut recent = Array4::zeros((n, num_features, num_nodes, config.num_of_hours * horizon));
    let mut target = Array3::zeros((n, num_nodes, horizon));

    for (i, sample) in samples.iter().enumerate() {
        fill_component(&signal, &sample.week, &mut week, i);
        fill_component(&signal, &sample.day, &mut day, i);
        fill_component(&signal, &sample.recent, &mut recent, i);

        let label = signal.slice(s![sample.label_start..sample.label_start + horizon, .., 0]);
        target
            .slice_mut(s![i, .., ..])
            .assign(&label.t());
    }

    Ok(WindowSet {
        week,
        day,
        recent,
        target,
    })
}

fn fill_component(
    signal: &ArrayView3<f32>,
    segments: &[(usize, usize)],
    out: &mut Array4<f32>,
    sample: usize,
) {
    let mut pos = 0;
    for &(start, end) in segments {
        for t in start..end {
            // (nodes, features) -> (features, nodes)
            let step = signal.slice(s![t, .., ..]);
            out.slice_mut(s![sample, .., .., pos]).assign(&step.t());
            pos += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_config() -> DataConfig {
        DataConfig {
            num_of_weeks: 1,
            num_of_days: 1,
            num_of_hours: 2,
            points_per_hour: 1,
            num_for_predict: 1,
            ..Default::default()
        }
    }

    #[test]
    fn test_search_data_chronological() {
        // two one-hour periods of 12 points before t = 100
        let segs = search_data(200, 2, 100, 12, 1, 12).unwrap();
        assert_eq!(segs, vec![(76, 88), (88, 100)]);
    }

    #[test]
    fn test_search_data_out_of_range() {
        assert!(search_data(200, 1, 5, 12, 1, 12).is_none());
        assert!(search_data(100, 1, 95, 12, 1, 12).is_none());
    }

    #[test]
    fn test_locate_requires_week_history() {
        let config = small_config();
        // a week is 168 points with one point per hour
        assert!(SampleIndices::locate(400, 167, &config).is_none());
        let idx = SampleIndices::locate(400, 168, &config).unwrap();
        assert_eq!(idx.week, vec![(0, 1)]);
        assert_eq!(idx.day, vec![(144, 145)]);
        assert_eq!(idx.recent, vec![(166, 167), (167, 168)]);
    }

    #[test]
    fn test_generate_windows_layout() {
        let config = small_config();
        let seq_len = 172;
        let signal = Array3::from_shape_fn((seq_len, 3, 2), |(t, n, f)| {
            (t * 100 + n * 10 + f) as f32
        });
        let windows = generate_windows(signal.view(), &config).unwrap();

        // label starts 168..=171
        assert_eq!(windows.len(), 4);
        assert_eq!(windows.recent.dim(), (4, 2, 3, 2));
        assert_eq!(windows.target.dim(), (4, 3, 1));

        // sample 0, feature 1, node 2, recent steps 166 and 167
        assert_eq!(windows.recent[[0, 1, 2, 0]], 16621.0);
        assert_eq!(windows.recent[[0, 1, 2, 1]], 16721.0);
        assert_eq!(windows.week[[0, 0, 1, 0]], 10.0);
        // target is feature 0 of the label step
        assert_eq!(windows.target[[0, 2, 0]], 16820.0);
    }

    #[test]
    fn test_generate_windows_too_short() {
        let config = small_config();
        let signal = Array3::<f32>::zeros((50, 2, 1));
        assert!(matches!(
            generate_windows(signal.view(), &config),
            Err(DagcnError::Dataset(_))
        ));
    }
}
