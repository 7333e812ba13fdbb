//! Managed-interface (ethernet-class) configuration operations.

use crate::core::types::InterfaceConfiguration;
use crate::error::NetError;

use super::{Caller, ConnectivityManager, Permission};

impl ConnectivityManager {
    /// Stored configuration for a managed interface.
    pub fn get_iface_config(
        &self,
        caller: &Caller,
        iface: &str,
    ) -> Result<InterfaceConfiguration, NetError> {
        caller.require(Permission::GetNetworkInfo)?;
        self.iface_configs
            .get(iface)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| NetError::unknown_iface(iface))
    }

    /// Stores a configuration for a managed interface after validating its
    /// address fields. Applying the configuration to the device is the
    /// platform layer's job.
    pub fn set_iface_config(
        &self,
        caller: &Caller,
        iface: &str,
        config: InterfaceConfiguration,
    ) -> Result<(), NetError> {
        caller.require(Permission::ConnectivityInternal)?;
        config.validate()?;
        tracing::info!("interface {iface:?} configured: {:?} mode", config.mode);
        self.iface_configs.insert(iface.to_string(), config);
        Ok(())
    }

    /// Whether any registered network currently runs over `iface`.
    pub fn is_iface_active(&self, caller: &Caller, iface: &str) -> Result<bool, NetError> {
        caller.require(Permission::GetNetworkInfo)?;
        Ok(self
            .registry
            .snapshot()
            .records()
            .any(|record| record.properties.interface_name == iface))
    }

    /// Interface names of all registered networks, sorted and deduplicated.
    pub fn get_all_active_ifaces(&self, caller: &Caller) -> Result<Vec<String>, NetError> {
        caller.require(Permission::GetNetworkInfo)?;
        let mut ifaces: Vec<String> = self
            .registry
            .snapshot()
            .records()
            .map(|record| record.properties.interface_name.clone())
            .filter(|name| !name.is_empty())
            .collect();
        ifaces.sort();
        ifaces.dedup();
        Ok(ifaces)
    }
}
