use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use futures::future::{self, BoxFuture, FutureExt, Shared};
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::error::TenantError;
use super::transport::{redact_address, ConnectionEvent, EventSink, StoreHandle, StoreTransport};
use crate::database::directory::Directory;

type Attempt = Shared<BoxFuture<'static, Result<StoreHandle, TenantError>>>;

/// Registry slot for one principal
enum Slot {
    /// A connection attempt is in flight; every caller awaits the same one
    Connecting { generation: u64, attempt: Attempt },
    Ready(Entry),
}

struct Entry {
    generation: u64,
    handle: StoreHandle,
    address: String,
    watcher: JoinHandle<()>,
}

/// Resolves a principal to a live handle on its private store, opening,
/// caching and evicting one connection per principal.
///
/// At most one connection and at most one in-flight connection attempt exist
/// per principal. The registry lock is never held across an await point, so
/// no task observes a half-updated entry.
#[derive(Clone)]
pub struct TenantConnectionManager {
    inner: Arc<Inner>,
}

struct Inner {
    directory: Arc<dyn Directory>,
    transport: Arc<dyn StoreTransport>,
    connect_timeout: Duration,
    registry: RwLock<HashMap<String, Slot>>,
    next_generation: AtomicU64,
    closed: AtomicBool,
}

impl TenantConnectionManager {
    pub fn new(
        directory: Arc<dyn Directory>,
        transport: Arc<dyn StoreTransport>,
        connect_timeout: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                directory,
                transport,
                connect_timeout,
                registry: RwLock::new(HashMap::new()),
                next_generation: AtomicU64::new(1),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Handle on `principal_id`'s store, reusing the cached one while it is ready.
    pub async fn resolve(&self, principal_id: &str) -> Result<StoreHandle, TenantError> {
        if principal_id.trim().is_empty() {
            return Err(TenantError::InvalidPrincipal);
        }

        // Fast path: no I/O when a ready handle is cached
        {
            let registry = self.inner.registry.read().await;
            match registry.get(principal_id) {
                Some(Slot::Ready(entry)) if entry.handle.is_ready() => return Ok(entry.handle.clone()),
                Some(Slot::Connecting { attempt, .. }) => {
                    let attempt = attempt.clone();
                    drop(registry);
                    return attempt.await;
                }
                _ => {}
            }
        }

        let attempt = {
            let mut registry = self.inner.registry.write().await;
            if self.inner.closed.load(Ordering::Acquire) {
                return Err(TenantError::unavailable(principal_id, "connection manager is shut down"));
            }

            // Another task may have won the race for the write lock
            match registry.get(principal_id) {
                Some(Slot::Ready(entry)) if entry.handle.is_ready() => return Ok(entry.handle.clone()),
                Some(Slot::Connecting { attempt, .. }) => attempt.clone(),
                _ => {
                    let stale = match registry.remove(principal_id) {
                        Some(Slot::Ready(entry)) => {
                            entry.watcher.abort();
                            Some(entry)
                        }
                        _ => None,
                    };
                    let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed);
                    let attempt = Inner::spawn_attempt(&self.inner, principal_id.to_string(), generation, stale);
                    registry.insert(
                        principal_id.to_string(),
                        Slot::Connecting {
                            generation,
                            attempt: attempt.clone(),
                        },
                    );
                    attempt
                }
            }
        };

        attempt.await
    }

    /// Close every cached connection concurrently and empty the registry.
    /// Never fails; individual close failures are logged. Attempts still in
    /// flight are awaited, and each closes its own connection on finishing.
    pub async fn close_all(&self) {
        let drained: Vec<(String, Slot)> = {
            let mut registry = self.inner.registry.write().await;
            self.inner.closed.store(true, Ordering::Release);
            registry.drain().collect()
        };

        let mut closes = Vec::new();
        let mut attempts = Vec::new();
        for (principal, slot) in drained {
            match slot {
                Slot::Ready(entry) => {
                    entry.watcher.abort();
                    closes.push(async move {
                        let result = entry.handle.close().await;
                        (principal, entry.address, result)
                    });
                }
                Slot::Connecting { attempt, .. } => attempts.push(attempt),
            }
        }

        let (results, abandoned) = future::join(future::join_all(closes), future::join_all(attempts)).await;

        let mut failed = 0usize;
        for (principal, address, result) in &results {
            match result {
                Ok(()) => debug!("Closed tenant connection for {} ({})", principal, redact_address(address)),
                Err(e) => {
                    warn!("Failed to close tenant connection for {}: {}", principal, e);
                    failed += 1;
                }
            }
        }

        info!(
            "Closed {} tenant connections ({} failed, {} attempts abandoned)",
            results.len(),
            failed,
            abandoned.len()
        );
    }

    /// Drop the cached connection for `principal_id`, closing it best-effort.
    /// Returns whether a ready connection was cached. An attempt still in
    /// flight is left to finish so it stays the only one for the principal.
    pub async fn evict(&self, principal_id: &str) -> bool {
        let removed = {
            let mut registry = self.inner.registry.write().await;
            let ready = matches!(registry.get(principal_id), Some(Slot::Ready(_)));
            if ready {
                registry.remove(principal_id)
            } else {
                None
            }
        };
        match removed {
            Some(Slot::Ready(entry)) => {
                entry.watcher.abort();
                self.inner.close_quietly(principal_id, &entry.handle).await;
                true
            }
            _ => false,
        }
    }

    /// Whether a ready connection is cached for `principal_id`
    pub async fn is_cached(&self, principal_id: &str) -> bool {
        matches!(self.inner.registry.read().await.get(principal_id), Some(Slot::Ready(_)))
    }

    /// Number of registry entries, in-flight attempts included
    pub async fn len(&self) -> usize {
        self.inner.registry.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl Inner {
    /// Start a connection attempt on its own task, so cancelled callers
    /// never strand the registry slot.
    fn spawn_attempt(inner: &Arc<Inner>, principal: String, generation: u64, stale: Option<Entry>) -> Attempt {
        let this = Arc::clone(inner);
        let task_principal = principal.clone();
        let task = tokio::spawn(async move { this.establish(task_principal, generation, stale).await });

        async move {
            match task.await {
                Ok(result) => result,
                Err(e) => Err(TenantError::unavailable(&principal, format!("connection task failed: {}", e))),
            }
        }
        .boxed()
        .shared()
    }

    async fn establish(
        self: Arc<Self>,
        principal: String,
        generation: u64,
        stale: Option<Entry>,
    ) -> Result<StoreHandle, TenantError> {
        let connected = self.connect(&principal, stale).await;

        let mut registry = self.registry.write().await;
        let owns_slot = matches!(
            registry.get(&principal),
            Some(Slot::Connecting { generation: g, .. }) if *g == generation
        );

        match connected {
            Ok((handle, address, events)) => {
                if self.closed.load(Ordering::Acquire) || !owns_slot {
                    if owns_slot {
                        registry.remove(&principal);
                    }
                    drop(registry);
                    self.close_quietly(&principal, &handle).await;
                    let reason = if self.closed.load(Ordering::Acquire) {
                        "connection manager is shut down"
                    } else {
                        "connection attempt was evicted"
                    };
                    return Err(TenantError::unavailable(&principal, reason));
                }

                let watcher = Self::spawn_watcher(Arc::downgrade(&self), principal.clone(), generation, events);
                info!("Tenant connection ready for {} ({})", principal, redact_address(&address));
                registry.insert(
                    principal,
                    Slot::Ready(Entry {
                        generation,
                        handle: handle.clone(),
                        address,
                        watcher,
                    }),
                );
                Ok(handle)
            }
            Err(e) => {
                if owns_slot {
                    registry.remove(&principal);
                }
                warn!("Tenant connection failed for {}: {}", principal, e);
                Err(e)
            }
        }
    }

    /// Look up the store address, retire the stale handle, then open.
    async fn connect(
        &self,
        principal: &str,
        stale: Option<Entry>,
    ) -> Result<(StoreHandle, String, mpsc::UnboundedReceiver<ConnectionEvent>), TenantError> {
        let lookup = self.lookup_address(principal).await;

        if let Some(stale) = stale {
            debug!("Replacing stale tenant connection for {}", principal);
            self.close_quietly(principal, &stale.handle).await;
        }
        let address = lookup?;

        let (events, receiver) = EventSink::channel();
        let opened = tokio::time::timeout(
            self.connect_timeout,
            self.transport.open(&address, self.connect_timeout, events),
        )
        .await;

        match opened {
            Ok(Ok(handle)) => Ok((handle, address, receiver)),
            Ok(Err(e)) => Err(TenantError::unavailable(principal, e.to_string())),
            Err(_) => Err(TenantError::unavailable(
                principal,
                format!("connect timed out after {:?}", self.connect_timeout),
            )),
        }
    }

    async fn lookup_address(&self, principal: &str) -> Result<String, TenantError> {
        let record = self
            .directory
            .find_by_id(principal)
            .await
            .map_err(|e| TenantError::DirectoryLookupFailed(e.to_string()))?
            .ok_or_else(|| TenantError::PrincipalNotFound(principal.to_string()))?;

        record
            .store_address()
            .map(str::to_string)
            .ok_or_else(|| TenantError::TenantConfigMissing(principal.to_string()))
    }

    fn spawn_watcher(
        inner: Weak<Inner>,
        principal: String,
        generation: u64,
        mut events: mpsc::UnboundedReceiver<ConnectionEvent>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            if let Some(event) = events.recv().await {
                if let Some(inner) = inner.upgrade() {
                    inner.on_event(&principal, generation, event).await;
                }
            }
        })
    }

    /// Evict the connection that raised `event`, unless it was already replaced.
    async fn on_event(&self, principal: &str, generation: u64, event: ConnectionEvent) {
        let evicted = {
            let mut registry = self.registry.write().await;
            let current = matches!(
                registry.get(principal),
                Some(Slot::Ready(entry)) if entry.generation == generation
            );
            match current.then(|| registry.remove(principal)).flatten() {
                Some(Slot::Ready(entry)) => Some(entry),
                _ => None,
            }
        };

        let Some(entry) = evicted else {
            debug!("Ignoring {:?} from replaced connection of {}", event, principal);
            return;
        };

        match event {
            ConnectionEvent::Error(reason) => {
                warn!("Tenant connection error for {}: {}; evicting", principal, reason);
                self.close_quietly(principal, &entry.handle).await;
            }
            ConnectionEvent::Disconnected => {
                info!(
                    "Tenant store {} disconnected for {}; evicting",
                    redact_address(&entry.address),
                    principal
                );
            }
        }
    }

    async fn close_quietly(&self, principal: &str, handle: &StoreHandle) {
        if let Err(e) = handle.close().await {
            warn!("Failed to close tenant connection for {}: {}", principal, e);
        }
    }
}
