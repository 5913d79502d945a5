use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use uuid::Uuid;

/// Server-side identity of one connected peer.
///
/// Created by the server transport when it accepts a socket. Clones share the
/// access flag; equality and hashing use the id only.
#[derive(Debug, Clone)]
pub struct ClientContext {
    id: Uuid,
    access_granted: Arc<AtomicBool>,
}

impl ClientContext {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            access_granted: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Opaque authorization marker. Never checked by the runtime itself.
    pub fn is_access_granted(&self) -> bool {
        self.access_granted.load(Ordering::Acquire)
    }

    pub fn set_access_granted(&self, granted: bool) {
        self.access_granted.store(granted, Ordering::Release);
    }
}

impl Default for ClientContext {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for ClientContext {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ClientContext {}

impl Hash for ClientContext {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Display for ClientContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id)
    }
}
