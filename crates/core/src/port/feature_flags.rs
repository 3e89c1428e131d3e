// Feature Flag Port

/// Feature-flag service supplying integer knobs at runtime
///
/// `key` scopes the flag (the queue name for consumer knobs).
pub trait FeatureFlags: Send + Sync {
    fn get_int(&self, feature: &str, key: &str, default: i64) -> i64;
}
