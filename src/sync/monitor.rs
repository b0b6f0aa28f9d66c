//! Connectivity monitor.
//!
//! Turns a raw, possibly repetitive online/offline signal into exactly one
//! transition event per actual state change.

use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::watch;

/// Observed connectivity state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Connectivity {
    Online,
    Offline,
}

impl Connectivity {
    #[must_use]
    pub const fn from_online(online: bool) -> Self {
        if online {
            Self::Online
        } else {
            Self::Offline
        }
    }

    #[must_use]
    pub const fn is_online(self) -> bool {
        matches!(self, Self::Online)
    }
}

impl std::fmt::Display for Connectivity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Online => write!(f, "online"),
            Self::Offline => write!(f, "offline"),
        }
    }
}

type TransitionHandler = Box<dyn Fn(Connectivity) + Send + Sync>;

/// Edge-triggered connectivity state.
pub struct ConnectivityMonitor {
    state: watch::Sender<Connectivity>,
    handlers: RwLock<Vec<TransitionHandler>>,
}

impl ConnectivityMonitor {
    #[must_use]
    pub fn new(initial: Connectivity) -> Self {
        let (state, _) = watch::channel(initial);
        Self {
            state,
            handlers: RwLock::new(Vec::new()),
        }
    }

    /// Last observed state. Never blocks on the network.
    #[must_use]
    pub fn current(&self) -> Connectivity {
        *self.state.borrow()
    }

    #[must_use]
    pub fn is_online(&self) -> bool {
        self.current().is_online()
    }

    /// Register a handler called with the new state on every edge.
    ///
    /// Handlers run in registration order, on the thread that reported the
    /// signal. A handler must not register further handlers.
    pub fn on_transition<F>(&self, handler: F)
    where
        F: Fn(Connectivity) + Send + Sync + 'static,
    {
        self.handlers.write().push(Box::new(handler));
    }

    /// Async view of the state, for consumers that wait on edges.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Connectivity> {
        self.state.subscribe()
    }

    /// Feed a raw connectivity signal.
    ///
    /// Returns `true` if the state changed. Repeating the current state is a
    /// no-op and raises no event.
    pub fn observe(&self, online: bool) -> bool {
        let next = Connectivity::from_online(online);
        let changed = self.state.send_if_modified(|state| {
            if *state == next {
                false
            } else {
                *state = next;
                true
            }
        });

        if changed {
            match next {
                Connectivity::Online => tracing::info!("connection restored"),
                Connectivity::Offline => tracing::warn!(
                    "connection lost, changes will sync when the connection resumes"
                ),
            }
            for handler in self.handlers.read().iter() {
                handler(next);
            }
        }
        changed
    }

    pub fn set_online(&self) -> bool {
        self.observe(true)
    }

    pub fn set_offline(&self) -> bool {
        self.observe(false)
    }
}

impl Default for ConnectivityMonitor {
    fn default() -> Self {
        Self::new(Connectivity::Online)
    }
}
