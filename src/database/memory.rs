//! Process-local directory and tenant stores.
//!
//! Used by the test suite and by `STORAGE_BACKEND=memory` for local runs.
//! A store address such as `memory://alice` names one in-process database;
//! reopening the same address sees the same data, the way reconnecting to
//! a real server would.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::database::directory::{normalize_email, Directory, DirectoryError, NewUser, UserRecord};
use crate::database::inventory::{
    validate_reduce_amount, InventoryItem, InventoryRepository, ItemUpdate, NewItem, RepositoryError,
};
use crate::tenant::transport::{EventSink, StoreHandle, StoreTransport, TenantConnection, TransportError};

pub const MEMORY_SCHEME: &str = "memory";

#[derive(Default)]
pub struct MemoryDirectory {
    users: RwLock<HashMap<Uuid, UserRecord>>,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Directory for MemoryDirectory {
    async fn find_by_id(&self, principal_id: &str) -> Result<Option<UserRecord>, DirectoryError> {
        let Ok(id) = Uuid::parse_str(principal_id) else {
            return Ok(None);
        };
        Ok(self.users.read().await.get(&id).cloned())
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<UserRecord>, DirectoryError> {
        let email = normalize_email(email);
        let users = self.users.read().await;
        Ok(users.values().find(|u| u.email == email).cloned())
    }

    async fn insert(&self, user: NewUser) -> Result<UserRecord, DirectoryError> {
        let email = normalize_email(&user.email);
        let mut users = self.users.write().await;
        if users.values().any(|u| u.email == email) {
            return Err(DirectoryError::Conflict(email));
        }

        let record = UserRecord {
            id: Uuid::new_v4(),
            name: user.name.trim().to_string(),
            email,
            password_hash: user.password_hash,
            store_uri: user.store_uri,
            created_at: Utc::now(),
        };
        users.insert(record.id, record.clone());
        Ok(record)
    }

    async fn ping(&self) -> Result<(), DirectoryError> {
        Ok(())
    }

    async fn close(&self) {}
}

/// In-memory inventory collection
#[derive(Default)]
pub struct MemoryInventory {
    items: RwLock<HashMap<Uuid, InventoryItem>>,
}

impl MemoryInventory {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl InventoryRepository for MemoryInventory {
    async fn insert_one(&self, owner: &str, item: NewItem) -> Result<InventoryItem, RepositoryError> {
        item.validate()?;
        let item = item.into_item(owner);
        self.items.write().await.insert(item.id, item.clone());
        Ok(item)
    }

    async fn find_by_owner(&self, owner: &str) -> Result<Vec<InventoryItem>, RepositoryError> {
        let items = self.items.read().await;
        let mut owned: Vec<InventoryItem> = items.values().filter(|i| i.owner_id == owner).cloned().collect();
        owned.sort_by(|a, b| {
            a.expiry_date
                .cmp(&b.expiry_date)
                .then_with(|| a.created_at.cmp(&b.created_at))
        });
        Ok(owned)
    }

    async fn find_one(&self, id: Uuid, owner: &str) -> Result<Option<InventoryItem>, RepositoryError> {
        let items = self.items.read().await;
        Ok(items.get(&id).filter(|i| i.owner_id == owner).cloned())
    }

    async fn update_one(
        &self,
        id: Uuid,
        owner: &str,
        update: ItemUpdate,
    ) -> Result<Option<InventoryItem>, RepositoryError> {
        update.validate()?;
        let mut items = self.items.write().await;
        match items.get_mut(&id).filter(|i| i.owner_id == owner) {
            Some(item) => {
                update.apply(item);
                Ok(Some(item.clone()))
            }
            None => Ok(None),
        }
    }

    async fn delete_one(&self, id: Uuid, owner: &str) -> Result<Option<InventoryItem>, RepositoryError> {
        let mut items = self.items.write().await;
        if items.get(&id).map(|i| i.owner_id == owner).unwrap_or(false) {
            return Ok(items.remove(&id));
        }
        Ok(None)
    }

    async fn reduce_quantity(&self, id: Uuid, owner: &str, amount: i64) -> Result<InventoryItem, RepositoryError> {
        validate_reduce_amount(amount)?;
        let mut items = self.items.write().await;
        let item = items
            .get_mut(&id)
            .filter(|i| i.owner_id == owner)
            .ok_or(RepositoryError::NotFound)?;

        if amount > item.quantity {
            return Err(RepositoryError::InsufficientQuantity {
                available: item.quantity,
                requested: amount,
            });
        }
        item.quantity -= amount;
        Ok(item.clone())
    }
}

/// Hands out connections to process-local databases keyed by address
#[derive(Default)]
pub struct MemoryTransport {
    databases: Mutex<HashMap<String, Arc<MemoryInventory>>>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StoreTransport for MemoryTransport {
    async fn open(
        &self,
        address: &str,
        _timeout: Duration,
        events: EventSink,
    ) -> Result<StoreHandle, TransportError> {
        let url = url::Url::parse(address).map_err(|e| TransportError::InvalidAddress(e.to_string()))?;
        if url.scheme() != MEMORY_SCHEME {
            return Err(TransportError::InvalidAddress(format!(
                "unsupported scheme '{}', expected '{}'",
                url.scheme(),
                MEMORY_SCHEME
            )));
        }

        let inventory = {
            let mut databases = self
                .databases
                .lock()
                .map_err(|_| TransportError::Refused("memory transport poisoned".to_string()))?;
            databases.entry(address.to_string()).or_default().clone()
        };

        Ok(Arc::new(MemoryConnection {
            inventory: ClosableInventory {
                inner: inventory,
                closed: AtomicBool::new(false),
                events,
            },
        }))
    }
}

pub struct MemoryConnection {
    inventory: ClosableInventory,
}

#[async_trait]
impl TenantConnection for MemoryConnection {
    fn inventory(&self) -> &dyn InventoryRepository {
        &self.inventory
    }

    fn is_ready(&self) -> bool {
        !self.inventory.closed.load(Ordering::Acquire)
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.inventory.closed.store(true, Ordering::Release);
        Ok(())
    }
}

/// Shared database seen through one connection; refuses work once closed.
struct ClosableInventory {
    inner: Arc<MemoryInventory>,
    closed: AtomicBool,
    events: EventSink,
}

impl ClosableInventory {
    fn check_open(&self) -> Result<(), RepositoryError> {
        if self.closed.load(Ordering::Acquire) {
            self.events.disconnected();
            return Err(RepositoryError::Unavailable("connection closed".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl InventoryRepository for ClosableInventory {
    async fn insert_one(&self, owner: &str, item: NewItem) -> Result<InventoryItem, RepositoryError> {
        self.check_open()?;
        self.inner.insert_one(owner, item).await
    }

    async fn find_by_owner(&self, owner: &str) -> Result<Vec<InventoryItem>, RepositoryError> {
        self.check_open()?;
        self.inner.find_by_owner(owner).await
    }

    async fn find_one(&self, id: Uuid, owner: &str) -> Result<Option<InventoryItem>, RepositoryError> {
        self.check_open()?;
        self.inner.find_one(id, owner).await
    }

    async fn update_one(
        &self,
        id: Uuid,
        owner: &str,
        update: ItemUpdate,
    ) -> Result<Option<InventoryItem>, RepositoryError> {
        self.check_open()?;
        self.inner.update_one(id, owner, update).await
    }

    async fn delete_one(&self, id: Uuid, owner: &str) -> Result<Option<InventoryItem>, RepositoryError> {
        self.check_open()?;
        self.inner.delete_one(id, owner).await
    }

    async fn reduce_quantity(&self, id: Uuid, owner: &str, amount: i64) -> Result<InventoryItem, RepositoryError> {
        self.check_open()?;
        self.inner.reduce_quantity(id, owner, amount).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::inventory::parse_expiry_date;

    fn new_item(name: &str, quantity: i64, expiry: &str) -> NewItem {
        NewItem {
            name: name.to_string(),
            quantity,
            price: 2.5,
            description: None,
            expiry_date: parse_expiry_date(expiry).unwrap(),
        }
    }

    #[tokio::test]
    async fn reduce_beyond_stock_leaves_quantity_unchanged() {
        let repo = MemoryInventory::new();
        let item = repo.insert_one("alice", new_item("Widget", 5, "2025-01-01")).await.unwrap();

        let err = repo.reduce_quantity(item.id, "alice", 6).await.unwrap_err();
        assert_eq!(err, RepositoryError::InsufficientQuantity { available: 5, requested: 6 });
        assert_eq!(repo.find_one(item.id, "alice").await.unwrap().unwrap().quantity, 5);

        let reduced = repo.reduce_quantity(item.id, "alice", 5).await.unwrap();
        assert_eq!(reduced.quantity, 0);
        assert_eq!(repo.find_one(item.id, "alice").await.unwrap().unwrap().quantity, 0);
    }

    #[tokio::test]
    async fn items_are_scoped_to_their_owner() {
        let repo = MemoryInventory::new();
        let item = repo.insert_one("alice", new_item("Widget", 5, "2025-01-01")).await.unwrap();

        assert!(repo.find_by_owner("bob").await.unwrap().is_empty());
        assert!(repo.find_one(item.id, "bob").await.unwrap().is_none());
        assert!(repo.update_one(item.id, "bob", ItemUpdate::default()).await.unwrap().is_none());
        assert!(repo.delete_one(item.id, "bob").await.unwrap().is_none());
        assert_eq!(repo.reduce_quantity(item.id, "bob", 1).await.unwrap_err(), RepositoryError::NotFound);

        assert_eq!(repo.find_by_owner("alice").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn lists_by_expiry_ascending() {
        let repo = MemoryInventory::new();
        repo.insert_one("alice", new_item("Later", 1, "2026-06-01")).await.unwrap();
        repo.insert_one("alice", new_item("Sooner", 1, "2025-02-01")).await.unwrap();

        let names: Vec<String> = repo.find_by_owner("alice").await.unwrap().into_iter().map(|i| i.name).collect();
        assert_eq!(names, vec!["Sooner", "Later"]);
    }

    #[tokio::test]
    async fn directory_rejects_duplicate_emails() {
        let directory = MemoryDirectory::new();
        let user = NewUser {
            name: "Alice".to_string(),
            email: "alice@example.com".to_string(),
            password_hash: "hash".to_string(),
            store_uri: Some("memory://alice".to_string()),
        };
        let record = directory.insert(user.clone()).await.unwrap();
        assert!(directory.find_by_id(&record.principal_id()).await.unwrap().is_some());
        assert!(directory.find_by_email("ALICE@example.com").await.unwrap().is_some());
        assert!(directory.find_by_id("not-a-uuid").await.unwrap().is_none());

        let err = directory.insert(user).await.unwrap_err();
        assert!(matches!(err, DirectoryError::Conflict(_)));
    }

    #[tokio::test]
    async fn reopening_an_address_sees_the_same_data() {
        let transport = MemoryTransport::new();
        let (sink, _rx) = EventSink::channel();
        let first = transport.open("memory://alice", Duration::from_secs(1), sink.clone()).await.unwrap();
        first.inventory().insert_one("alice", new_item("Widget", 5, "2025-01-01")).await.unwrap();
        first.close().await.unwrap();
        assert!(!first.is_ready());
        assert!(matches!(
            first.inventory().find_by_owner("alice").await,
            Err(RepositoryError::Unavailable(_))
        ));

        let second = transport.open("memory://alice", Duration::from_secs(1), sink).await.unwrap();
        assert_eq!(second.inventory().find_by_owner("alice").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn refuses_foreign_schemes() {
        let transport = MemoryTransport::new();
        let (sink, _rx) = EventSink::channel();
        let err = transport
            .open("postgres://localhost/alice", Duration::from_secs(1), sink)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, TransportError::InvalidAddress(_)));
    }
}
