/// Fetch window planning: last known position + "now" -> provider-legal windows
use chrono::{Duration, NaiveDate};

use crate::types::{FetchWindow, SyncCursor};

/// Slices the unsynchronized range of an instrument into inclusive calendar
/// windows the provider will accept.
#[derive(Debug, Clone, Copy)]
pub struct WindowPlanner {
    epoch_floor: NaiveDate,
    max_window_span_days: i64,
}

impl WindowPlanner {
    pub fn new(epoch_floor: NaiveDate, max_window_span_days: i64) -> Self {
        WindowPlanner {
            epoch_floor,
            max_window_span_days: max_window_span_days.max(1),
        }
    }

    /// Plan the windows still missing as of `now`, earliest first.
    ///
    /// A complete cursor resumes the day after its last point; a provisional
    /// cursor re-fetches the last point, since it may still change. No cursor
    /// starts at the epoch floor. An empty plan means the instrument is
    /// already up to date.
    pub fn plan(&self, cursor: Option<SyncCursor>, now: NaiveDate) -> Vec<FetchWindow> {
        let start = match cursor {
            None => self.epoch_floor,
            Some(c) if c.complete => c.last_point + Duration::days(1),
            Some(c) => c.last_point,
        };

        if start > now {
            return Vec::new();
        }

        let mut windows = Vec::new();
        let mut window_start = start;
        while window_start <= now {
            let window_end =
                (window_start + Duration::days(self.max_window_span_days - 1)).min(now);
            windows.push(FetchWindow {
                start: window_start,
                end: window_end,
            });
            window_start = window_end + Duration::days(1);
        }

        windows
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn cursor(last: NaiveDate, complete: bool) -> Option<SyncCursor> {
        Some(SyncCursor {
            last_point: last,
            complete,
        })
    }

    #[test]
    fn test_splits_range_into_span_sized_windows() {
        let planner = WindowPlanner::new(d(2000, 1, 1), 5);
        let last = d(2024, 3, 10);

        let windows = planner.plan(cursor(last, true), d(2024, 3, 20));

        assert_eq!(
            windows,
            vec![
                FetchWindow {
                    start: d(2024, 3, 11),
                    end: d(2024, 3, 15)
                },
                FetchWindow {
                    start: d(2024, 3, 16),
                    end: d(2024, 3, 20)
                },
            ]
        );
    }

    #[test]
    fn test_provisional_last_point_is_refetched() {
        let planner = WindowPlanner::new(d(2000, 1, 1), 30);
        let last = d(2024, 3, 10);

        let windows = planner.plan(cursor(last, false), d(2024, 3, 10));

        assert_eq!(windows.len(), 1);
        assert_eq!(windows[0].start, last);
        assert_eq!(windows[0].end, last);
    }

    #[test]
    fn test_up_to_date_yields_empty_plan() {
        let planner = WindowPlanner::new(d(2000, 1, 1), 30);
        let now = d(2024, 3, 10);

        let windows = planner.plan(cursor(now, true), now);

        assert!(windows.is_empty());
    }

    #[test]
    fn test_no_cursor_starts_at_epoch_floor() {
        let planner = WindowPlanner::new(d(2000, 1, 3), 3650);

        let windows = planner.plan(None, d(2004, 12, 31));

        assert_eq!(windows[0].start, d(2000, 1, 3));
        assert_eq!(windows.last().unwrap().end, d(2004, 12, 31));
    }

    #[test]
    fn test_short_range_yields_single_window() {
        let planner = WindowPlanner::new(d(2000, 1, 1), 365);

        let windows = planner.plan(cursor(d(2024, 3, 10), true), d(2024, 3, 12));

        assert_eq!(
            windows,
            vec![FetchWindow {
                start: d(2024, 3, 11),
                end: d(2024, 3, 12)
            }]
        );
    }

    #[test]
    fn test_plan_is_deterministic_ordered_and_contiguous() {
        let planner = WindowPlanner::new(d(2000, 1, 1), 90);
        let now = d(2024, 6, 30);

        let first = planner.plan(None, now);
        let second = planner.plan(None, now);
        assert_eq!(first, second);

        for pair in first.windows(2) {
            assert!(pair[0].end < pair[1].start);
            assert_eq!(pair[0].end + Duration::days(1), pair[1].start);
        }
        for window in &first {
            assert!(window.days() <= 90);
        }
    }
}
