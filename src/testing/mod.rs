//! Test doubles for the tenant connection manager: a directory and a
//! transport whose behavior tests can steer, plus a polling helper.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use crate::database::directory::{Directory, DirectoryError, NewUser, UserRecord};
use crate::database::inventory::InventoryRepository;
use crate::database::memory::MemoryInventory;
use crate::tenant::transport::{EventSink, StoreHandle, StoreTransport, TenantConnection, TransportError};

/// Compare two handles by the connection they point at
pub fn same_handle(a: &StoreHandle, b: &StoreHandle) -> bool {
    Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const ()
}

/// Poll `check` until it holds, giving up after one second.
pub async fn wait_until<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..100 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

/// Directory keyed by arbitrary principal ids, counting lookups
#[derive(Default)]
pub struct FakeDirectory {
    addresses: Mutex<HashMap<String, Option<String>>>,
    lookups: AtomicUsize,
    unreachable: AtomicBool,
}

impl FakeDirectory {
    pub fn with_tenant(principal: &str, address: &str) -> Arc<Self> {
        let directory = Arc::new(Self::default());
        directory.add(principal, Some(address));
        directory
    }

    pub fn add(&self, principal: &str, address: Option<&str>) {
        self.addresses
            .lock()
            .unwrap()
            .insert(principal.to_string(), address.map(str::to_string));
    }

    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    pub fn lookup_count(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Directory for FakeDirectory {
    async fn find_by_id(&self, principal_id: &str) -> Result<Option<UserRecord>, DirectoryError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(DirectoryError::Unavailable("connection refused".to_string()));
        }
        let addresses = self.addresses.lock().unwrap();
        Ok(addresses.get(principal_id).map(|address| UserRecord {
            id: Uuid::new_v4(),
            name: principal_id.to_string(),
            email: format!("{}@example.com", principal_id),
            password_hash: String::new(),
            store_uri: address.clone(),
            created_at: Utc::now(),
        }))
    }

    async fn find_by_email(&self, _email: &str) -> Result<Option<UserRecord>, DirectoryError> {
        Ok(None)
    }

    async fn insert(&self, user: NewUser) -> Result<UserRecord, DirectoryError> {
        Err(DirectoryError::Conflict(user.email))
    }

    async fn ping(&self) -> Result<(), DirectoryError> {
        Ok(())
    }

    async fn close(&self) {}
}

/// Transport recording every connection it opens
#[derive(Default)]
pub struct FakeTransport {
    opens: AtomicUsize,
    open_delay: Mutex<Duration>,
    refused: Mutex<HashSet<String>>,
    fail_closes: AtomicBool,
    connections: Mutex<Vec<Arc<FakeConnection>>>,
}

impl FakeTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_open_delay(&self, delay: Duration) {
        *self.open_delay.lock().unwrap() = delay;
    }

    pub fn refuse(&self, address: &str) {
        self.refused.lock().unwrap().insert(address.to_string());
    }

    /// Make connections opened from now on fail to close
    pub fn fail_closes(&self, fail: bool) {
        self.fail_closes.store(fail, Ordering::SeqCst);
    }

    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    /// The `index`-th connection opened, in open order
    pub fn connection(&self, index: usize) -> Arc<FakeConnection> {
        self.connections.lock().unwrap()[index].clone()
    }
}

#[async_trait]
impl StoreTransport for FakeTransport {
    async fn open(
        &self,
        address: &str,
        _timeout: Duration,
        events: EventSink,
    ) -> Result<StoreHandle, TransportError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        let delay = *self.open_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.refused.lock().unwrap().contains(address) {
            return Err(TransportError::Refused(address.to_string()));
        }

        let connection = Arc::new(FakeConnection {
            events,
            ready: AtomicBool::new(true),
            closes: AtomicUsize::new(0),
            fail_close: AtomicBool::new(self.fail_closes.load(Ordering::SeqCst)),
            inventory: MemoryInventory::new(),
        });
        self.connections.lock().unwrap().push(connection.clone());
        Ok(connection as StoreHandle)
    }
}

pub struct FakeConnection {
    events: EventSink,
    ready: AtomicBool,
    closes: AtomicUsize,
    fail_close: AtomicBool,
    inventory: MemoryInventory,
}

impl FakeConnection {
    pub fn emit_error(&self, reason: &str) {
        self.events.error(reason);
    }

    pub fn emit_disconnect(&self) {
        self.events.disconnected();
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    pub fn set_fail_close(&self, fail: bool) {
        self.fail_close.store(fail, Ordering::SeqCst);
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TenantConnection for FakeConnection {
    fn inventory(&self) -> &dyn InventoryRepository {
        &self.inventory
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        self.ready.store(false, Ordering::SeqCst);
        if self.fail_close.load(Ordering::SeqCst) {
            return Err(TransportError::Close("socket already gone".to_string()));
        }
        Ok(())
    }
}
