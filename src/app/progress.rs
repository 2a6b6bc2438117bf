// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use thiserror::Error;

/// Fixed prefix the compute binary prints before each progress line.
pub const PROGRESS_PREFIX: &str = "Processing batch ";

const TILE_SEPARATOR: &str = ", tile ";

/// One parsed progress line. All counters are 1-based as printed by the
/// binary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressEvent {
    pub batch_index: u32,
    pub batch_count: u32,
    pub tile_index: u32,
    pub tile_count: u32,
}

impl ProgressEvent {
    /// Linear position of this event as `(done, total)` tiles.
    pub fn linear(&self) -> (u64, u64) {
        let done = u64::from(self.batch_index.saturating_sub(1)) * u64::from(self.tile_count)
            + u64::from(self.tile_index.saturating_sub(1));
        let total = u64::from(self.batch_count) * u64::from(self.tile_count);
        (done, total)
    }

    pub fn status_label(&self) -> String {
        format!(
            "Segmenting batch {}/{}, tile {}/{}",
            self.batch_index, self.batch_count, self.tile_index, self.tile_count
        )
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProgressParseError {
    #[error("progress line is missing the '{0}' separator")]
    MissingSeparator(&'static str),
    #[error("invalid counter '{0}' in progress line")]
    InvalidCounter(String),
}

fn parse_counter(raw: &str) -> Result<u32, ProgressParseError> {
    raw.parse::<u32>()
        .map_err(|_| ProgressParseError::InvalidCounter(raw.to_string()))
}

fn parse_pair(raw: &str) -> Result<(u32, u32), ProgressParseError> {
    let (index, count) = raw
        .split_once('/')
        .ok_or(ProgressParseError::MissingSeparator("/"))?;
    Ok((parse_counter(index)?, parse_counter(count)?))
}

/// Maps one stdout line to a progress event. Lines without the fixed prefix
/// are not progress lines and yield `Ok(None)`; lines with the prefix but a
/// malformed body are an error the caller is expected to log and ignore.
pub fn parse_progress_line(line: &str) -> Result<Option<ProgressEvent>, ProgressParseError> {
    let Some(body) = line.strip_prefix(PROGRESS_PREFIX) else {
        return Ok(None);
    };
    let (batch_part, tile_part) = body
        .split_once(TILE_SEPARATOR)
        .ok_or(ProgressParseError::MissingSeparator(TILE_SEPARATOR))?;
    let (batch_index, batch_count) = parse_pair(batch_part)?;
    let (tile_index, tile_count) = parse_pair(tile_part)?;
    Ok(Some(ProgressEvent {
        batch_index,
        batch_count,
        tile_index,
        tile_count,
    }))
}

/// Sub-interval of the overall 0-100 scale allocated to the current phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressRange {
    pub min: u32,
    pub max: u32,
}

impl ProgressRange {
    pub fn new(min: u32, max: u32) -> Self {
        Self {
            min: min.min(100),
            max: max.min(100).max(min.min(100)),
        }
    }
}

/// Overall job progress on the 0-100 scale. Values never go backward: phase
/// transitions only move the range forward and event-driven updates are
/// clamped to the running maximum.
#[derive(Debug, Clone)]
pub struct JobProgress {
    range: ProgressRange,
    overall: u32,
}

impl JobProgress {
    pub fn new() -> Self {
        Self {
            range: ProgressRange::new(0, 100),
            overall: 0,
        }
    }

    pub fn overall(&self) -> u32 {
        self.overall
    }

    pub fn set_range(&mut self, min: u32, max: u32) {
        self.range = ProgressRange::new(min, max);
    }

    /// Pins overall progress to a phase boundary value.
    pub fn set_overall(&mut self, value: u32) -> u32 {
        self.overall = self.overall.max(value.min(100));
        self.overall
    }

    /// Folds a parsed event into the current phase's range.
    pub fn apply_event(&mut self, event: &ProgressEvent) -> u32 {
        let (done, total) = event.linear();
        if total == 0 {
            return self.overall;
        }
        let span = f64::from(self.range.max - self.range.min);
        let value = f64::from(self.range.min) + (done as f64 / total as f64) * span;
        self.set_overall(value as u32)
    }
}

impl Default for JobProgress {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_well_formed_line() {
        let event = parse_progress_line("Processing batch 2/5, tile 3/4")
            .unwrap()
            .unwrap();
        assert_eq!(
            event,
            ProgressEvent {
                batch_index: 2,
                batch_count: 5,
                tile_index: 3,
                tile_count: 4,
            }
        );
        assert_eq!(event.linear(), (6, 20));
        assert_eq!(event.status_label(), "Segmenting batch 2/5, tile 3/4");
    }

    #[test]
    fn lines_without_prefix_are_not_events() {
        assert_eq!(parse_progress_line("").unwrap(), None);
        assert_eq!(parse_progress_line("I0923 net.cpp loading layers").unwrap(), None);
        assert_eq!(parse_progress_line("processing batch 1/2, tile 1/2").unwrap(), None);
        // Prefix match is exact, including the trailing space.
        assert_eq!(parse_progress_line("Processing batch").unwrap(), None);
    }

    #[test]
    fn malformed_bodies_are_errors() {
        let err = parse_progress_line("Processing batch 2of5, tile 3/4").unwrap_err();
        assert_eq!(err, ProgressParseError::MissingSeparator(TILE_SEPARATOR));

        let err = parse_progress_line("Processing batch 2/5 tile 3/4").unwrap_err();
        assert_eq!(err, ProgressParseError::MissingSeparator(TILE_SEPARATOR));

        let err = parse_progress_line("Processing batch x/5, tile 3/4").unwrap_err();
        assert_eq!(err, ProgressParseError::InvalidCounter("x".to_string()));

        let err = parse_progress_line("Processing batch 2/5, tile 3/four").unwrap_err();
        assert_eq!(err, ProgressParseError::InvalidCounter("four".to_string()));
    }

    #[test]
    fn first_and_last_tiles_map_to_range_ends() {
        let first = parse_progress_line("Processing batch 1/5, tile 1/4")
            .unwrap()
            .unwrap();
        assert_eq!(first.linear(), (0, 20));

        let last = parse_progress_line("Processing batch 5/5, tile 4/4")
            .unwrap()
            .unwrap();
        assert_eq!(last.linear(), (19, 20));
    }

    #[test]
    fn job_progress_maps_events_into_the_phase_range() {
        let mut progress = JobProgress::new();
        progress.set_range(11, 90);
        let event = ProgressEvent {
            batch_index: 1,
            batch_count: 2,
            tile_index: 1,
            tile_count: 2,
        };
        assert_eq!(progress.apply_event(&event), 11);
        let event = ProgressEvent {
            batch_index: 2,
            batch_count: 2,
            tile_index: 2,
            tile_count: 2,
        };
        // 11 + 3/4 * 79
        assert_eq!(progress.apply_event(&event), 70);
    }

    #[test]
    fn job_progress_is_monotonic() {
        let mut progress = JobProgress::new();
        progress.set_range(11, 90);
        let later = ProgressEvent {
            batch_index: 2,
            batch_count: 2,
            tile_index: 1,
            tile_count: 2,
        };
        let earlier = ProgressEvent {
            batch_index: 1,
            batch_count: 2,
            tile_index: 1,
            tile_count: 2,
        };
        let high = progress.apply_event(&later);
        assert_eq!(progress.apply_event(&earlier), high);
        assert_eq!(progress.overall(), high);
    }

    #[test]
    fn phase_boundaries_never_move_backward() {
        let mut progress = JobProgress::new();
        assert_eq!(progress.set_overall(10), 10);
        assert_eq!(progress.set_overall(2), 10);
        assert_eq!(progress.set_overall(200), 100);
    }

    #[test]
    fn zero_tile_counts_leave_progress_unchanged() {
        let mut progress = JobProgress::new();
        progress.set_range(3, 100);
        let event = ProgressEvent {
            batch_index: 1,
            batch_count: 0,
            tile_index: 1,
            tile_count: 0,
        };
        assert_eq!(progress.apply_event(&event), 0);
    }
}
