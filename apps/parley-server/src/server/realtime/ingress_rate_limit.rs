use std::{
    collections::VecDeque,
    time::{Duration, Instant},
};

/// Sliding-window counter over one connection's inbound events.
pub(crate) struct IngressWindow {
    accepted: VecDeque<Instant>,
    limit: usize,
    window: Duration,
}

impl IngressWindow {
    pub(crate) fn new(limit: u32, window: Duration) -> Self {
        let limit = usize::try_from(limit).unwrap_or(usize::MAX);
        Self {
            accepted: VecDeque::with_capacity(limit.min(64)),
            limit,
            window,
        }
    }

    pub(crate) fn allow(&mut self) -> bool {
        self.allow_at(Instant::now())
    }

    fn allow_at(&mut self, now: Instant) -> bool {
        while self
            .accepted
            .front()
            .is_some_and(|oldest| now.saturating_duration_since(*oldest) > self.window)
        {
            self.accepted.pop_front();
        }

        if self.accepted.len() >= self.limit {
            return false;
        }

        self.accepted.push_back(now);
        true
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use super::IngressWindow;

    #[test]
    fn allows_until_limit_inside_window() {
        let mut window = IngressWindow::new(2, Duration::from_millis(250));
        let now = Instant::now();

        assert!(window.allow_at(now));
        assert!(window.allow_at(now + Duration::from_millis(10)));
        assert!(!window.allow_at(now + Duration::from_millis(20)));
    }

    #[test]
    fn evicts_expired_entries_before_checking_limit() {
        let mut window = IngressWindow::new(1, Duration::from_millis(100));
        let now = Instant::now();

        assert!(window.allow_at(now));
        assert!(!window.allow_at(now + Duration::from_millis(50)));
        assert!(window.allow_at(now + Duration::from_millis(150)));
        assert_eq!(window.accepted.len(), 1);
    }

    #[test]
    fn rejected_events_do_not_extend_the_window() {
        let mut window = IngressWindow::new(1, Duration::from_millis(100));
        let now = Instant::now();

        assert!(window.allow_at(now));
        for offset in [20, 40, 60, 80] {
            assert!(!window.allow_at(now + Duration::from_millis(offset)));
        }
        assert!(window.allow_at(now + Duration::from_millis(101)));
    }
}
