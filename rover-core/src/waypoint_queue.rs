//! C4 — Waypoint Queue (§4.4). Ordered targets with a cursor and optional
//! cyclic ("loop") mode.

use rover_types::Waypoint;

#[derive(Debug, Default)]
pub struct WaypointQueue {
    waypoints: Vec<Waypoint>,
    cursor: usize,
    loop_mode: bool,
    loop_count: u64,
}

impl WaypointQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, wp: Waypoint) {
        self.waypoints.push(wp);
    }

    pub fn peek(&self) -> Option<&Waypoint> {
        self.waypoints.get(self.cursor)
    }

    /// Advance the cursor. Returns whether a new target exists afterward.
    pub fn advance(&mut self) -> bool {
        if self.waypoints.is_empty() {
            return false;
        }
        self.cursor += 1;
        if self.cursor >= self.waypoints.len() {
            if self.loop_mode {
                self.cursor = 0;
                self.loop_count += 1;
                true
            } else {
                false
            }
        } else {
            true
        }
    }

    pub fn clear(&mut self) {
        self.waypoints.clear();
        self.cursor = 0;
        self.loop_count = 0;
    }

    /// Toggling loop mode mid-loop preserves the current cursor.
    pub fn set_loop(&mut self, loop_mode: bool) {
        self.loop_mode = loop_mode;
    }

    pub fn loop_mode(&self) -> bool {
        self.loop_mode
    }

    pub fn loop_count(&self) -> u64 {
        self.loop_count
    }

    /// Targets left until exhaustion. In loop mode this never hits zero
    /// permanently — it reports the count remaining within the current
    /// cycle, from the cursor to the end.
    pub fn remaining(&self) -> usize {
        self.waypoints.len().saturating_sub(self.cursor)
    }

    pub fn is_empty(&self) -> bool {
        self.waypoints.is_empty()
    }

    pub fn len(&self) -> usize {
        self.waypoints.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wp(n: f64) -> Waypoint {
        Waypoint::new(n, n)
    }

    #[test]
    fn advance_through_non_loop_path_reports_exhaustion() {
        let mut q = WaypointQueue::new();
        q.add(wp(1.0));
        q.add(wp(2.0));
        assert_eq!(q.peek().unwrap().lat, 1.0);
        assert!(q.advance());
        assert_eq!(q.peek().unwrap().lat, 2.0);
        assert!(!q.advance());
        assert!(q.peek().is_none());
    }

    #[test]
    fn loop_mode_wraps_and_counts() {
        let mut q = WaypointQueue::new();
        q.set_loop(true);
        for i in 0..4 {
            q.add(wp(i as f64));
        }
        for _ in 0..3 {
            assert!(q.advance());
        }
        // cursor now at last (index 3); one more advance wraps to 0.
        assert!(q.advance());
        assert_eq!(q.peek().unwrap().lat, 0.0);
        assert_eq!(q.loop_count(), 1);

        for _ in 0..4 {
            q.advance();
        }
        assert_eq!(q.loop_count(), 2);
    }

    #[test]
    fn disabling_loop_mid_loop_preserves_cursor() {
        let mut q = WaypointQueue::new();
        q.set_loop(true);
        for i in 0..3 {
            q.add(wp(i as f64));
        }
        q.advance();
        assert_eq!(q.peek().unwrap().lat, 1.0);
        q.set_loop(false);
        assert_eq!(q.peek().unwrap().lat, 1.0);
    }

    #[test]
    fn clear_resets_everything() {
        let mut q = WaypointQueue::new();
        q.set_loop(true);
        q.add(wp(1.0));
        q.advance();
        q.advance();
        q.clear();
        assert!(q.is_empty());
        assert_eq!(q.loop_count(), 0);
        assert!(q.peek().is_none());
    }

    #[test]
    fn remaining_counts_from_cursor_to_end() {
        let mut q = WaypointQueue::new();
        for i in 0..3 {
            q.add(wp(i as f64));
        }
        assert_eq!(q.remaining(), 3);
        q.advance();
        assert_eq!(q.remaining(), 2);
    }
}
