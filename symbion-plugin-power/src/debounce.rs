use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Instant of the last ON/OFF command issued per entity.
///
/// A PC takes a while to boot or go to sleep, so ping results right after a
/// command would flip the switch back in Home Assistant. Liveness reports are
/// dropped while the entity is inside its pause window.
#[derive(Debug, Clone, Default)]
pub struct DebounceTracker {
    marks: Arc<Mutex<HashMap<String, Instant>>>,
}

impl DebounceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark_command_issued(&self, entity_id: &str) {
        self.marks.lock().insert(entity_id.to_string(), Instant::now());
    }

    pub fn should_suppress(&self, entity_id: &str, pause: Duration) -> bool {
        self.marks
            .lock()
            .get(entity_id)
            .is_some_and(|mark| mark.elapsed() < pause)
    }
}
