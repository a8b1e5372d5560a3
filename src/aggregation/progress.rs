//! Progress log for the stream provider's advisory messages.

use crate::models::ProgressUpdate;

/// Ordered log of distinct consecutive progress messages.
#[derive(Debug, Clone, Default)]
pub struct ProgressLog {
    entries: Vec<ProgressUpdate>,
}

impl ProgressLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an update. Returns `false` when it repeats the last message.
    pub fn record(&mut self, update: ProgressUpdate) -> bool {
        let message = update.message.trim();
        if message.is_empty() {
            return false;
        }
        if self.current() == Some(message) {
            return false;
        }
        self.entries.push(ProgressUpdate {
            message: message.to_string(),
            ..update
        });
        true
    }

    /// The most recent activity, for a "working on..." indicator.
    pub fn current(&self) -> Option<&str> {
        self.entries.last().map(|u| u.message.as_str())
    }

    #[cfg(test)]
    pub fn messages(&self) -> Vec<&str> {
        self.entries.iter().map(|u| u.message.as_str()).collect()
    }

    pub fn entries(&self) -> &[ProgressUpdate] {
        &self.entries
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_consecutive_duplicates_are_dropped() {
        let mut log = ProgressLog::new();
        for message in ["x", "x", "y", "y", "y", "z"] {
            log.record(ProgressUpdate::new(message));
        }
        assert_eq!(log.messages(), vec!["x", "y", "z"]);
        assert_eq!(log.current(), Some("z"));
    }

    #[test]
    fn test_non_consecutive_repeats_are_kept() {
        let mut log = ProgressLog::new();
        assert!(log.record(ProgressUpdate::new("searching sources")));
        assert!(log.record(ProgressUpdate::new("ranking")));
        assert!(log.record(ProgressUpdate::new("searching sources")));
        assert!(!log.record(ProgressUpdate::new("searching sources ")));
        assert!(!log.record(ProgressUpdate::new("")));
        assert_eq!(log.entries().len(), 3);

        log.clear();
        assert_eq!(log.current(), None);
    }
}
