use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::info;

/// Device network reachability, sampled at the moment an action is submitted.
pub trait Connectivity: Send + Sync {
    fn is_online(&self) -> bool;
}

/// Online flag flipped by whatever observes the network (the API in the server binary).
#[derive(Debug, Clone)]
pub struct NetworkMonitor {
    online: Arc<AtomicBool>,
}

impl NetworkMonitor {
    pub fn new(online: bool) -> Self {
        Self {
            online: Arc::new(AtomicBool::new(online)),
        }
    }

    pub fn set_online(&self, online: bool) {
        let previous = self.online.swap(online, Ordering::SeqCst);
        if previous != online {
            info!(online, "Connectivity changed");
        }
    }
}

impl Default for NetworkMonitor {
    fn default() -> Self {
        Self::new(true)
    }
}

impl Connectivity for NetworkMonitor {
    fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }
}
