//! Unit-based progress over a percentage band

use tracing::debug;

/// Analysis owns 0–50%
pub const ANALYSIS_START: u8 = 0;
/// Generation and export own 50–100%
pub const GENERATION_START: u8 = 50;
pub const DONE: u8 = 100;

/// Progress units each sequence contributes to the generation band
pub const UNITS_PER_SEQUENCE: usize = 2;

/// Maps completed units onto `start..=end`
#[derive(Debug, Clone)]
pub struct UnitProgress {
    start: u8,
    end: u8,
    total: usize,
    done: usize,
}

impl UnitProgress {
    pub fn new(start: u8, end: u8, total: usize) -> Self {
        debug!(start, end, total, "UnitProgress::new: called");
        Self {
            start,
            end: end.max(start),
            total,
            done: 0,
        }
    }

    /// Analysis band, one unit per moment
    pub fn analysis(moment_count: usize) -> Self {
        Self::new(ANALYSIS_START, GENERATION_START, moment_count)
    }

    /// Generation band, two units per sequence
    pub fn generation(sequence_count: usize) -> Self {
        Self::new(GENERATION_START, DONE, sequence_count * UNITS_PER_SEQUENCE)
    }

    /// Mark one unit done and return the new percentage
    pub fn advance(&mut self) -> u8 {
        self.done = (self.done + 1).min(self.total);
        self.percent()
    }

    pub fn percent(&self) -> u8 {
        if self.total == 0 {
            return self.start;
        }
        let span = (self.end - self.start) as usize;
        self.start + (span * self.done / self.total) as u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generation_band() {
        let mut progress = UnitProgress::generation(3);
        assert_eq!(progress.percent(), 50);
        let steps: Vec<u8> = (0..6).map(|_| progress.advance()).collect();
        assert_eq!(steps, vec![58, 66, 75, 83, 91, 100]);
        assert_eq!(progress.advance(), 100);
    }

    #[test]
    fn test_analysis_band_is_monotonic() {
        let mut progress = UnitProgress::analysis(7);
        let mut last = progress.percent();
        for _ in 0..10 {
            let next = progress.advance();
            assert!(next >= last);
            assert!(next <= GENERATION_START);
            last = next;
        }
        assert_eq!(last, GENERATION_START);
    }

    #[test]
    fn test_empty_band() {
        assert_eq!(UnitProgress::generation(0).percent(), 50);
    }
}
