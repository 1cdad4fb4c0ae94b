//! Persistence of tracked orders for restart reconciliation

use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::domain::Order;
use crate::error::Result;

#[async_trait]
pub trait OrderStore: Send + Sync {
    async fn save(&self, order: &Order) -> Result<()>;

    async fn get(&self, client_order_id: &str) -> Result<Option<Order>>;

    /// Orders not yet in a terminal state
    async fn load_open(&self) -> Result<Vec<Order>>;
}

#[derive(Default)]
pub struct InMemoryOrderStore {
    orders: DashMap<String, Order>,
}

impl InMemoryOrderStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl OrderStore for InMemoryOrderStore {
    async fn save(&self, order: &Order) -> Result<()> {
        self.orders
            .insert(order.client_order_id.clone(), order.clone());
        Ok(())
    }

    async fn get(&self, client_order_id: &str) -> Result<Option<Order>> {
        Ok(self.orders.get(client_order_id).map(|o| o.clone()))
    }

    async fn load_open(&self) -> Result<Vec<Order>> {
        let mut open: Vec<Order> = self
            .orders
            .iter()
            .filter(|o| !o.is_terminal())
            .map(|o| o.clone())
            .collect();
        open.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(open)
    }
}

/// Whole order book in one JSON file, rewritten atomically on every save
pub struct JsonFileOrderStore {
    path: PathBuf,
    orders: Mutex<BTreeMap<String, Order>>,
}

impl JsonFileOrderStore {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let orders = match tokio::fs::read(&path).await {
            Ok(bytes) if !bytes.is_empty() => serde_json::from_slice(&bytes)?,
            Ok(_) => BTreeMap::new(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };
        info!(
            path = %path.display(),
            orders = orders.len(),
            "Order journal loaded"
        );
        Ok(Self {
            path,
            orders: Mutex::new(orders),
        })
    }

    async fn flush(&self, orders: &BTreeMap<String, Order>) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, serde_json::to_vec_pretty(orders)?).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl OrderStore for JsonFileOrderStore {
    async fn save(&self, order: &Order) -> Result<()> {
        let mut orders = self.orders.lock().await;
        orders.insert(order.client_order_id.clone(), order.clone());
        self.flush(&orders).await?;
        debug!(client_order_id = %order.client_order_id, status = %order.status, "Order persisted");
        Ok(())
    }

    async fn get(&self, client_order_id: &str) -> Result<Option<Order>> {
        Ok(self.orders.lock().await.get(client_order_id).cloned())
    }

    async fn load_open(&self) -> Result<Vec<Order>> {
        let orders = self.orders.lock().await;
        let mut open: Vec<Order> = orders.values().filter(|o| !o.is_terminal()).cloned().collect();
        open.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(open)
    }
}
