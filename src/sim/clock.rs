use chrono::{Duration, NaiveDateTime};

use super::types::SimConfig;

/// A simulation clock that walks the market slots of a run.
///
/// # Examples
///
/// ```
/// use area_market_sim::sim::clock::SlotClock;
/// use area_market_sim::sim::types::SimConfig;
///
/// let start = chrono::NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
/// let mut clock = SlotClock::new(&SimConfig::new(start, 360, 1, 0));
/// let mut hours = Vec::new();
///
/// clock.run(|_, slot| hours.push(slot.format("%H").to_string()));
/// assert_eq!(hours, vec!["00", "06", "12", "18"]);
/// ```
#[derive(Debug, Clone)]
pub struct SlotClock {
    current: usize,
    total: usize,
    start: NaiveDateTime,
    slot_length: Duration,
}

impl SlotClock {
    /// Creates a clock covering every slot of `config`.
    pub fn new(config: &SimConfig) -> Self {
        Self {
            current: 0,
            total: config.total_slots(),
            start: config.start(),
            slot_length: config.slot_length(),
        }
    }

    /// Advances the clock by one slot.
    ///
    /// # Returns
    ///
    /// * `Some((index, slot_start))` - The slot before advancing
    /// * `None` - If every slot has been handed out
    pub fn tick(&mut self) -> Option<(usize, NaiveDateTime)> {
        if self.current < self.total {
            let index = self.current;
            self.current += 1;
            Some((index, self.start + self.slot_length * index as i32))
        } else {
            None
        }
    }

    /// Slots not yet handed out.
    pub fn remaining(&self) -> usize {
        self.total - self.current
    }

    /// Runs a function for each remaining slot.
    pub fn run(&mut self, mut f: impl FnMut(usize, NaiveDateTime)) {
        while let Some((index, slot)) = self.tick() {
            f(index, slot);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn config(slot_minutes: u32, days: u32) -> SimConfig {
        SimConfig::new(NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(), slot_minutes, days, 0)
    }

    #[test]
    fn test_tick() {
        let mut clock = SlotClock::new(&config(720, 1));
        let start = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        assert_eq!(clock.tick(), Some((0, start.and_hms_opt(0, 0, 0).unwrap())));
        assert_eq!(clock.tick(), Some((1, start.and_hms_opt(12, 0, 0).unwrap())));
        assert_eq!(clock.tick(), None);
    }

    #[test]
    fn test_run_crosses_days() {
        let mut clock = SlotClock::new(&config(60, 2));
        let mut last = None;
        let mut count = 0;
        clock.run(|_, slot| {
            count += 1;
            last = Some(slot);
        });
        assert_eq!(count, 48);
        assert_eq!(
            last,
            NaiveDate::from_ymd_opt(2024, 3, 2).unwrap().and_hms_opt(23, 0, 0)
        );
        assert_eq!(clock.remaining(), 0);
    }
}
