use chrono::{DateTime, Duration, Timelike, Utc};

use crate::error::{Result, SchedulerError};

/// Planning resolution: 15-minute steps, 4-hour capacity blocks.
pub const TIMESTEP_MINUTES: i64 = 15;
pub const STEPS_PER_HOUR: usize = 4;
pub const STEPS_PER_BLOCK: usize = 16;
pub const BLOCKS_PER_DAY: usize = 6;
pub const DT_HOURS: f64 = 0.25;

/// The time axis of one solve: 15-minute timestamps, the 4-hour capacity
/// block each step belongs to, the day each step belongs to, and the inverse
/// maps used during constraint construction.
///
/// The inverse maps are precomputed once so constraint assembly never scans
/// the full horizon per block.
#[derive(Debug, Clone)]
pub struct TimeGrid {
    start: DateTime<Utc>,
    timestamps: Vec<DateTime<Utc>>,
    block_ids: Vec<usize>,
    day_ids: Vec<usize>,
    block_to_steps: Vec<Vec<usize>>,
    day_to_steps: Vec<Vec<usize>>,
}

impl TimeGrid {
    /// Build the axis for `horizon_hours` starting at `start`.
    ///
    /// The start must lie on a 15-minute boundary and the horizon must cover
    /// at least one complete 4-hour block, because capacity bids are per
    /// block.
    pub fn build(start: DateTime<Utc>, horizon_hours: u32) -> Result<Self> {
        if horizon_hours == 0 {
            return Err(SchedulerError::invalid_input("horizon_hours must be positive"));
        }
        if start.minute() % 15 != 0 || start.second() != 0 || start.nanosecond() != 0 {
            return Err(SchedulerError::invalid_input(format!(
                "start time {start} is not aligned to the 15-minute grid"
            )));
        }

        let num_steps = horizon_hours as usize * STEPS_PER_HOUR;
        let mut timestamps = Vec::with_capacity(num_steps);
        let mut raw_block_ids = Vec::with_capacity(num_steps);
        let mut day_ids = Vec::with_capacity(num_steps);

        let start_date = start.date_naive();
        for t in 0..num_steps {
            let ts = start + Duration::minutes(TIMESTEP_MINUTES * t as i64);
            let day_offset = (ts.date_naive() - start_date).num_days() as usize;
            let block_of_day = ts.hour() as usize / 4;
            raw_block_ids.push(day_offset * BLOCKS_PER_DAY + block_of_day);
            day_ids.push(day_offset);
            timestamps.push(ts);
        }

        // Normalize block ids to a dense 0..B range. Raw ids advance by one
        // per wall-clock block boundary, including across midnight.
        let first_block = raw_block_ids[0];
        let block_ids: Vec<usize> = raw_block_ids.iter().map(|b| b - first_block).collect();

        let num_blocks = block_ids.last().copied().unwrap_or(0) + 1;
        let num_days = day_ids.last().copied().unwrap_or(0) + 1;

        let mut block_to_steps: Vec<Vec<usize>> = vec![Vec::new(); num_blocks];
        let mut day_to_steps: Vec<Vec<usize>> = vec![Vec::new(); num_days];
        for t in 0..num_steps {
            block_to_steps[block_ids[t]].push(t);
            day_to_steps[day_ids[t]].push(t);
        }

        let grid = Self {
            start,
            timestamps,
            block_ids,
            day_ids,
            block_to_steps,
            day_to_steps,
        };

        if !grid.block_to_steps.iter().any(|steps| steps.len() == STEPS_PER_BLOCK) {
            return Err(SchedulerError::invalid_input(format!(
                "horizon of {horizon_hours}h contains no complete 4-hour block; \
                 capacity markets require at least one"
            )));
        }

        let irregular = grid
            .block_to_steps
            .iter()
            .filter(|steps| steps.len() != STEPS_PER_BLOCK)
            .count();
        if irregular > 0 {
            tracing::warn!(
                irregular,
                expected = STEPS_PER_BLOCK,
                "horizon contains partial capacity blocks"
            );
        }

        Ok(grid)
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    pub fn num_steps(&self) -> usize {
        self.timestamps.len()
    }

    pub fn num_blocks(&self) -> usize {
        self.block_to_steps.len()
    }

    pub fn num_days(&self) -> usize {
        self.day_to_steps.len()
    }

    pub fn timestamps(&self) -> &[DateTime<Utc>] {
        &self.timestamps
    }

    pub fn timestamp(&self, t: usize) -> DateTime<Utc> {
        self.timestamps[t]
    }

    /// The capacity block covering step `t`.
    pub fn block_of(&self, t: usize) -> usize {
        self.block_ids[t]
    }

    pub fn day_of(&self, t: usize) -> usize {
        self.day_ids[t]
    }

    pub fn steps_in_block(&self, b: usize) -> &[usize] {
        &self.block_to_steps[b]
    }

    pub fn steps_in_day(&self, d: usize) -> &[usize] {
        &self.day_to_steps[d]
    }

    /// Whether block `b` covers its full 16 steps inside the horizon.
    pub fn is_complete_block(&self, b: usize) -> bool {
        self.block_to_steps[b].len() == STEPS_PER_BLOCK
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;

    fn midnight() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_day_horizon_shape() {
        let grid = TimeGrid::build(midnight(), 24).unwrap();
        assert_eq!(grid.num_steps(), 96);
        assert_eq!(grid.num_blocks(), 6);
        assert_eq!(grid.num_days(), 1);
        assert!(grid.is_complete_block(5));
        assert_eq!(grid.block_of(0), 0);
        assert_eq!(grid.block_of(95), 5);
        assert_eq!(grid.steps_in_block(2), (32..48).collect::<Vec<_>>().as_slice());
    }

    #[test]
    fn test_blocks_cross_midnight() {
        let start = Utc.with_ymd_and_hms(2024, 12, 31, 20, 0, 0).unwrap();
        let grid = TimeGrid::build(start, 8).unwrap();
        // 20:00-24:00 on day 0, 00:00-04:00 on day 1 of the next year.
        assert_eq!(grid.num_blocks(), 2);
        assert_eq!(grid.block_of(15), 0);
        assert_eq!(grid.block_of(16), 1);
        assert_eq!(grid.day_of(16), 1);
    }

    #[test]
    fn test_partial_trailing_block() {
        let grid = TimeGrid::build(midnight(), 6).unwrap();
        assert_eq!(grid.num_blocks(), 2);
        assert!(grid.is_complete_block(0));
        assert!(!grid.is_complete_block(1));
        assert_eq!(grid.steps_in_block(1).len(), 8);
    }

    #[test]
    fn test_short_horizon_rejected() {
        // One hour holds no complete capacity block.
        assert!(TimeGrid::build(midnight(), 1).is_err());
        assert!(TimeGrid::build(midnight(), 0).is_err());
    }

    #[test]
    fn test_unaligned_start_rejected() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 7, 0).unwrap();
        assert!(TimeGrid::build(start, 24).is_err());
    }

    proptest! {
        #[test]
        // Horizons of at least 8h contain a complete block at any start hour.
        fn prop_maps_are_consistent(horizon in 8u32..=72, start_hour in 0u32..24) {
            let start = Utc.with_ymd_and_hms(2024, 3, 10, start_hour, 0, 0).unwrap();
            let grid = TimeGrid::build(start, horizon).unwrap();

            // Block ids are non-decreasing and dense.
            for t in 1..grid.num_steps() {
                let step = grid.block_of(t) as i64 - grid.block_of(t - 1) as i64;
                prop_assert!(step == 0 || step == 1);
            }
            prop_assert_eq!(grid.block_of(0), 0);

            // Inverse maps partition the steps.
            let mut seen = vec![false; grid.num_steps()];
            for b in 0..grid.num_blocks() {
                prop_assert!(grid.steps_in_block(b).len() <= STEPS_PER_BLOCK);
                for &t in grid.steps_in_block(b) {
                    prop_assert_eq!(grid.block_of(t), b);
                    prop_assert!(!seen[t]);
                    seen[t] = true;
                }
            }
            prop_assert!(seen.iter().all(|&s| s));
        }
    }
}
