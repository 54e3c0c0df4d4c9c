use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusKind {
    Info,
    Success,
    Error,
}

/// A one-line message that disappears after a while.
///
/// `expires` is `None` for messages that stay until replaced, such as
/// "Updating context..." while the request is in flight.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusBanner {
    pub text: String,
    pub kind: StatusKind,
    pub expires: Option<Instant>,
}

impl StatusBanner {
    pub fn sticky(text: impl Into<String>, kind: StatusKind) -> Self {
        Self {
            text: text.into(),
            kind,
            expires: None,
        }
    }

    pub fn fading(text: impl Into<String>, kind: StatusKind, after: Duration) -> Self {
        Self {
            text: text.into(),
            kind,
            expires: Some(Instant::now() + after),
        }
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        self.expires.is_some_and(|at| now >= at)
    }
}

/// Clear `slot` if its banner has expired. Returns whether it changed.
pub fn clear_expired(slot: &mut Option<StatusBanner>, now: Instant) -> bool {
    if slot.as_ref().is_some_and(|b| b.is_expired(now)) {
        *slot = None;
        return true;
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sticky_never_expires() {
        let banner = StatusBanner::sticky("Updating context...", StatusKind::Info);
        assert!(!banner.is_expired(Instant::now() + Duration::from_secs(3600)));
    }

    #[test]
    fn test_clear_expired() {
        let mut slot = Some(StatusBanner::fading(
            "done",
            StatusKind::Success,
            Duration::from_secs(60),
        ));
        let now = Instant::now();
        assert!(!clear_expired(&mut slot, now));
        assert!(clear_expired(&mut slot, now + Duration::from_secs(120)));
        assert!(slot.is_none());
    }
}
