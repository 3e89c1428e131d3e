// Async Switch Port

/// Process-wide gate for background work
///
/// Consumers check it before every poll and stay idle while it is off.
pub trait AsyncSwitch: Send + Sync {
    fn is_enabled(&self, key: &str) -> bool;
}

/// Never pauses anything
#[derive(Debug, Default, Clone, Copy)]
pub struct AlwaysEnabled;

impl AsyncSwitch for AlwaysEnabled {
    fn is_enabled(&self, _key: &str) -> bool {
        true
    }
}
