//! Store contracts for networks and devices, plus in-memory reference
//! implementations.
//!
//! The core treats persistence as an external transactional store with
//! upsert-by-identity semantics: device identity is the deterministic
//! (network, IPv4) ID, so repeated sightings converge on one record.
//! The in-memory stores back the daemon and the test suite; durable
//! backends implement the same traits.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;

use netwarden_core::{Device, DeviceId, Network, NetworkId, StoreError};

/// CRUD store of scan target networks.
#[async_trait]
pub trait NetworkRegistry: Send + Sync {
    async fn find_by_id(&self, id: NetworkId) -> Result<Option<Network>, StoreError>;
    async fn find_all(&self) -> Result<Vec<Network>, StoreError>;
    async fn create(&self, network: Network) -> Result<Network, StoreError>;
    /// Replace an existing network; `NotFound` if the id is absent.
    async fn update(&self, network: Network) -> Result<Network, StoreError>;
    async fn delete(&self, id: NetworkId) -> Result<(), StoreError>;
}

/// Upsert-by-identity store of discovered devices.
#[async_trait]
pub trait DeviceStore: Send + Sync {
    /// Insert or replace the record with this device's identity,
    /// returning the stored record.
    async fn upsert(&self, device: Device) -> Result<Device, StoreError>;
    async fn find_by_address(
        &self,
        network_id: NetworkId,
        ip: Ipv4Addr,
    ) -> Result<Option<Device>, StoreError>;
    /// All devices of one network, ordered by address.
    async fn find_by_network(&self, network_id: NetworkId) -> Result<Vec<Device>, StoreError>;
    async fn find_all(&self) -> Result<Vec<Device>, StoreError>;
    async fn delete(&self, id: DeviceId) -> Result<(), StoreError>;
    /// Remove all devices of a network, returning how many were removed.
    async fn delete_by_network(&self, network_id: NetworkId) -> Result<u32, StoreError>;
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|e| e.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|e| e.into_inner())
}

/// In-memory network registry.
#[derive(Debug, Default)]
pub struct MemoryNetworkRegistry {
    networks: RwLock<HashMap<NetworkId, Network>>,
}

impl MemoryNetworkRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl NetworkRegistry for MemoryNetworkRegistry {
    async fn find_by_id(&self, id: NetworkId) -> Result<Option<Network>, StoreError> {
        Ok(read(&self.networks).get(&id).cloned())
    }

    async fn find_all(&self) -> Result<Vec<Network>, StoreError> {
        let mut networks: Vec<Network> = read(&self.networks).values().cloned().collect();
        networks.sort_by(|a, b| a.cidr.cmp(&b.cidr));
        Ok(networks)
    }

    async fn create(&self, network: Network) -> Result<Network, StoreError> {
        write(&self.networks).insert(network.id, network.clone());
        Ok(network)
    }

    async fn update(&self, network: Network) -> Result<Network, StoreError> {
        let mut networks = write(&self.networks);
        if !networks.contains_key(&network.id) {
            return Err(StoreError::NotFound(network.id.to_string()));
        }
        networks.insert(network.id, network.clone());
        Ok(network)
    }

    async fn delete(&self, id: NetworkId) -> Result<(), StoreError> {
        write(&self.networks)
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }
}

/// In-memory device store.
#[derive(Debug, Default)]
pub struct MemoryDeviceStore {
    devices: RwLock<HashMap<DeviceId, Device>>,
}

impl MemoryDeviceStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DeviceStore for MemoryDeviceStore {
    async fn upsert(&self, device: Device) -> Result<Device, StoreError> {
        write(&self.devices).insert(device.id, device.clone());
        Ok(device)
    }

    async fn find_by_address(
        &self,
        network_id: NetworkId,
        ip: Ipv4Addr,
    ) -> Result<Option<Device>, StoreError> {
        let id = DeviceId::for_address(network_id, ip);
        Ok(read(&self.devices).get(&id).cloned())
    }

    async fn find_by_network(&self, network_id: NetworkId) -> Result<Vec<Device>, StoreError> {
        let mut devices: Vec<Device> = read(&self.devices)
            .values()
            .filter(|d| d.network_id == network_id)
            .cloned()
            .collect();
        devices.sort_by_key(|d| d.ipv4);
        Ok(devices)
    }

    async fn find_all(&self) -> Result<Vec<Device>, StoreError> {
        let mut devices: Vec<Device> = read(&self.devices).values().cloned().collect();
        devices.sort_by_key(|d| (d.network_id.0, d.ipv4));
        Ok(devices)
    }

    async fn delete(&self, id: DeviceId) -> Result<(), StoreError> {
        write(&self.devices)
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    async fn delete_by_network(&self, network_id: NetworkId) -> Result<u32, StoreError> {
        let mut devices = write(&self.devices);
        let before = devices.len();
        devices.retain(|_, d| d.network_id != network_id);
        Ok((before - devices.len()) as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[tokio::test]
    async fn upsert_converges_on_one_record_per_address() {
        let store = MemoryDeviceStore::new();
        let network = NetworkId::new();
        let ip: Ipv4Addr = "192.168.1.20".parse().unwrap();

        let first = Device::first_sighting(network, ip, Utc::now());
        store.upsert(first).await.unwrap();

        let mut second = Device::first_sighting(network, ip, Utc::now());
        second.hostname = Some("printer.lan".to_string());
        store.upsert(second).await.unwrap();

        let devices = store.find_by_network(network).await.unwrap();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].hostname.as_deref(), Some("printer.lan"));
    }

    #[tokio::test]
    async fn find_by_network_is_ordered_by_address() {
        let store = MemoryDeviceStore::new();
        let network = NetworkId::new();
        let now = Utc::now();

        for ip in ["10.0.0.30", "10.0.0.2", "10.0.0.17"] {
            store
                .upsert(Device::first_sighting(network, ip.parse().unwrap(), now))
                .await
                .unwrap();
        }

        let devices = store.find_by_network(network).await.unwrap();
        let ips: Vec<String> = devices.iter().map(|d| d.ipv4.to_string()).collect();
        assert_eq!(ips, vec!["10.0.0.2", "10.0.0.17", "10.0.0.30"]);
    }

    #[tokio::test]
    async fn delete_by_network_removes_only_that_network() {
        let store = MemoryDeviceStore::new();
        let a = NetworkId::new();
        let b = NetworkId::new();
        let now = Utc::now();

        store
            .upsert(Device::first_sighting(a, "10.0.0.1".parse().unwrap(), now))
            .await
            .unwrap();
        store
            .upsert(Device::first_sighting(a, "10.0.0.2".parse().unwrap(), now))
            .await
            .unwrap();
        store
            .upsert(Device::first_sighting(b, "10.1.0.1".parse().unwrap(), now))
            .await
            .unwrap();

        let removed = store.delete_by_network(a).await.unwrap();
        assert_eq!(removed, 2);
        assert_eq!(store.find_by_network(b).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn registry_update_requires_existing_network() {
        let registry = MemoryNetworkRegistry::new();
        let network = Network::new("192.168.1.0/24", "lan", "").unwrap();

        assert!(matches!(
            registry.update(network.clone()).await,
            Err(StoreError::NotFound(_))
        ));

        registry.create(network.clone()).await.unwrap();
        let mut renamed = network;
        renamed.name = "home lan".to_string();
        let updated = registry.update(renamed).await.unwrap();
        assert_eq!(updated.name, "home lan");
    }
}
