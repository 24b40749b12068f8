use std::time::{Duration, Instant};

/// How long after the last keystroke the typing flag is dropped.
pub const TYPING_IDLE: Duration = Duration::from_millis(1000);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypingSignal {
    Start,
    Stop,
}

impl TypingSignal {
    pub fn is_typing(self) -> bool {
        self == TypingSignal::Start
    }
}

/// Local typing state. Each method returns the status write to perform, if any;
/// a status equal to the last one written is never repeated.
#[derive(Debug, Default, Clone)]
pub struct TypingTracker {
    typing: bool,
    deadline: Option<Instant>,
    muted: bool,
}

impl TypingTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_typing(&self) -> bool {
        self.typing
    }

    /// When `poll` should next be called.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// While muted, input is programmatic (e.g. restoring a failed draft)
    /// and never counts as typing.
    pub fn set_muted(&mut self, muted: bool) {
        self.muted = muted;
    }

    pub fn on_input(&mut self, value: &str, now: Instant) -> Option<TypingSignal> {
        if self.muted {
            return None;
        }
        self.deadline = Some(now + TYPING_IDLE);
        if !self.typing && !value.is_empty() {
            self.typing = true;
            return Some(TypingSignal::Start);
        }
        None
    }

    pub fn poll(&mut self, now: Instant) -> Option<TypingSignal> {
        match self.deadline {
            Some(deadline) if now >= deadline => {
                self.deadline = None;
                self.stop()
            }
            _ => None,
        }
    }

    /// Sending stops typing at once.
    pub fn on_send(&mut self) -> Option<TypingSignal> {
        self.deadline = None;
        self.stop()
    }

    fn stop(&mut self) -> Option<TypingSignal> {
        if self.typing {
            self.typing = false;
            Some(TypingSignal::Stop)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_once_then_stop_after_idle() {
        let t0 = Instant::now();
        let mut t = TypingTracker::new();
        assert_eq!(t.on_input("h", t0), Some(TypingSignal::Start));
        assert_eq!(t.on_input("he", t0 + Duration::from_millis(400)), None);
        assert_eq!(t.poll(t0 + Duration::from_millis(1000)), None);
        assert_eq!(t.deadline(), Some(t0 + Duration::from_millis(1400)));
        assert_eq!(t.poll(t0 + Duration::from_millis(1400)), Some(TypingSignal::Stop));
        assert_eq!(t.poll(t0 + Duration::from_millis(5000)), None);
        assert!(!t.is_typing());
    }

    #[test]
    fn empty_input_never_starts() {
        let t0 = Instant::now();
        let mut t = TypingTracker::new();
        assert_eq!(t.on_input("", t0), None);
        assert_eq!(t.poll(t0 + TYPING_IDLE), None);
    }

    #[test]
    fn clearing_the_box_stops_after_idle() {
        let t0 = Instant::now();
        let mut t = TypingTracker::new();
        t.on_input("a", t0);
        assert_eq!(t.on_input("", t0 + Duration::from_millis(100)), None);
        assert_eq!(t.poll(t0 + Duration::from_millis(1100)), Some(TypingSignal::Stop));
    }

    #[test]
    fn send_stops_immediately() {
        let t0 = Instant::now();
        let mut t = TypingTracker::new();
        t.on_input("hello", t0);
        assert_eq!(t.on_send(), Some(TypingSignal::Stop));
        assert_eq!(t.deadline(), None);
        assert_eq!(t.on_send(), None);
        assert!(TypingSignal::Start.is_typing());
    }

    #[test]
    fn restored_draft_is_not_typing() {
        let t0 = Instant::now();
        let mut t = TypingTracker::new();
        t.on_input("hello", t0);
        t.on_send();
        t.set_muted(true);
        assert_eq!(t.on_input("hello", t0 + Duration::from_millis(200)), None);
        t.set_muted(false);
        assert_eq!(t.deadline(), None);
        assert!(!t.is_typing());
        assert_eq!(t.on_input("hello!", t0 + Duration::from_millis(900)), Some(TypingSignal::Start));
    }
}
