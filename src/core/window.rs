use serde::{Deserialize, Serialize};

/// Timestamps of recent attempts or incidents, oldest first.
///
/// Persisted as a bare JSON array. Entries at or before `now - window`
/// are stale and dropped by [`AttemptLog::prune`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AttemptLog(Vec<u64>);

impl AttemptLog {
    pub fn from_timestamps(timestamps: Vec<u64>) -> Self {
        Self(timestamps)
    }

    pub fn decode(payload: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(payload)
    }

    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Append an entry at `now`
    pub fn record(&mut self, now: u64) {
        self.0.push(now);
    }

    /// Drop entries at or before `now - window`
    pub fn prune(&mut self, now: u64, window: u64) {
        // A window reaching back before the epoch keeps everything
        if let Some(cutoff) = now.checked_sub(window) {
            self.0.retain(|&timestamp| timestamp > cutoff);
        }
    }

    pub fn pruned(mut self, now: u64, window: u64) -> Self {
        self.prune(now, window);
        self
    }

    /// Number of entries, counting stale ones that were not pruned yet
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn oldest(&self) -> Option<u64> {
        self.0.iter().copied().min()
    }

    pub fn timestamps(&self) -> &[u64] {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prune_excludes_window_boundary() {
        let mut log = AttemptLog::from_timestamps(vec![100, 140, 160]);
        log.prune(200, 60);
        assert_eq!(log.timestamps(), &[160]);
    }

    #[test]
    fn prune_near_epoch_keeps_everything() {
        let log = AttemptLog::from_timestamps(vec![0, 10]).pruned(30, 60);
        assert_eq!(log.len(), 2);
    }

    #[test]
    fn persisted_form_is_a_plain_array() {
        let mut log = AttemptLog::default();
        log.record(5);
        log.record(7);
        assert_eq!(log.encode().unwrap(), "[5,7]");
        assert_eq!(AttemptLog::decode("[5,7]").unwrap(), log);
        assert_eq!(log.oldest(), Some(5));
        assert!(AttemptLog::decode("{\"not\":\"a log\"}").is_err());
    }
}
