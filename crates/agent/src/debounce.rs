//! Timer-gated coalescing of streamed text.
//!
//! Fragments are accumulated; a snapshot of the whole accumulated text is
//! released at most once per interval. The caller owns the clock: it passes
//! `now` in and sleeps until [`Debouncer::deadline`] itself, so the
//! coalescer has no timers of its own.

use std::time::Duration;

use tokio::time::Instant;

#[derive(Debug)]
pub struct Debouncer {
    interval: Duration,
    text: String,
    /// Start of the current suppression window.
    window: Option<Instant>,
    pending: bool,
    emitted: usize,
}

impl Debouncer {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            text: String::new(),
            window: None,
            pending: false,
            emitted: 0,
        }
    }

    /// Accumulate a fragment. Returns a snapshot if one is due now.
    pub fn push(&mut self, fragment: &str, now: Instant) -> Option<String> {
        if fragment.is_empty() {
            return None;
        }
        self.text.push_str(fragment);
        self.pending = true;
        if self.window.is_none() {
            self.window = Some(now);
        }
        self.poll(now)
    }

    /// Release the pending snapshot if the window has elapsed.
    pub fn poll(&mut self, now: Instant) -> Option<String> {
        let deadline = self.deadline()?;
        if now < deadline {
            return None;
        }
        self.window = Some(now);
        self.release()
    }

    /// When the pending snapshot becomes due. `None` if nothing is pending.
    pub fn deadline(&self) -> Option<Instant> {
        if !self.pending {
            return None;
        }
        self.window.map(|start| start + self.interval)
    }

    /// Release whatever is pending regardless of the window.
    pub fn flush(&mut self) -> Option<String> {
        self.release()
    }

    fn release(&mut self) -> Option<String> {
        if !self.pending {
            return None;
        }
        self.pending = false;
        self.emitted += 1;
        Some(self.text.clone())
    }

    /// Everything accumulated so far.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Snapshots released so far.
    pub fn emitted(&self) -> usize {
        self.emitted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TICK: Duration = Duration::from_millis(10);

    #[test]
    fn burst_within_interval_coalesces() {
        let t0 = Instant::now();
        let mut d = Debouncer::new(TICK);
        for (i, frag) in ["The ", "quick ", "brown ", "fox"].iter().enumerate() {
            let at = t0 + Duration::from_millis(i as u64);
            assert_eq!(d.push(frag, at), None);
        }
        assert_eq!(d.deadline(), Some(t0 + TICK));
        assert_eq!(d.flush().as_deref(), Some("The quick brown fox"));
        assert_eq!(d.emitted(), 1);
        assert_eq!(d.flush(), None);
    }

    #[test]
    fn snapshot_released_when_window_elapses() {
        let t0 = Instant::now();
        let mut d = Debouncer::new(TICK);
        assert_eq!(d.push("Hel", t0), None);
        assert_eq!(d.poll(t0 + Duration::from_millis(9)), None);
        assert_eq!(d.poll(t0 + TICK).as_deref(), Some("Hel"));
        assert_eq!(d.deadline(), None);

        // New window starts at the release
        assert_eq!(d.push("lo", t0 + Duration::from_millis(15)), None);
        assert_eq!(d.deadline(), Some(t0 + TICK + TICK));
        assert_eq!(d.push("!", t0 + Duration::from_millis(20)).as_deref(), Some("Hello!"));
    }

    #[test]
    fn slow_fragments_each_emit() {
        let t0 = Instant::now();
        let mut d = Debouncer::new(TICK);
        assert_eq!(d.push("a", t0), None);
        assert_eq!(d.poll(t0 + TICK).as_deref(), Some("a"));
        assert_eq!(d.push("b", t0 + TICK * 3).as_deref(), Some("ab"));
        assert_eq!(d.push("c", t0 + TICK * 5).as_deref(), Some("abc"));
        assert_eq!(d.emitted(), 3);
        assert_eq!(d.flush(), None);
    }

    #[test]
    fn empty_fragments_are_ignored() {
        let mut d = Debouncer::new(TICK);
        assert_eq!(d.push("", Instant::now()), None);
        assert_eq!(d.deadline(), None);
        assert_eq!(d.flush(), None);
        assert_eq!(d.text(), "");
    }
}
