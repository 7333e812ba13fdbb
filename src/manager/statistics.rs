//! Traffic counter queries and attribution.

use crate::core::traffic::{IfaceTrafficSnapshot, UidTrafficSnapshot};
use crate::error::NetError;

use super::{Caller, ConnectivityManager, Permission};

impl ConnectivityManager {
    /// Attributes a traffic delta observed by the platform layer. Fails with
    /// `NotFound` for an interface no network ever used.
    pub fn report_traffic(
        &self,
        caller: &Caller,
        iface: &str,
        uid: Option<u32>,
        rx_bytes: u64,
        tx_bytes: u64,
    ) -> Result<(), NetError> {
        caller.require(Permission::ConnectivityInternal)?;
        // Counter increments go through the same exclusive section as
        // registry writes, keeping the single-writer ordering.
        let _guard = self.write_section.lock().unwrap();
        self.traffic.record(iface, uid, rx_bytes, tx_bytes)
    }

    pub fn get_iface_rx_bytes(&self, caller: &Caller, iface: &str) -> Result<u64, NetError> {
        caller.require(Permission::GetNetworkInfo)?;
        self.traffic.iface_rx_bytes(iface)
    }

    pub fn get_iface_tx_bytes(&self, caller: &Caller, iface: &str) -> Result<u64, NetError> {
        caller.require(Permission::GetNetworkInfo)?;
        self.traffic.iface_tx_bytes(iface)
    }

    /// Bytes received by one application identity (0 for an unseen uid).
    pub fn get_uid_rx_bytes(&self, caller: &Caller, uid: u32) -> Result<u64, NetError> {
        caller.require(Permission::GetNetworkInfo)?;
        Ok(self.traffic.uid_rx_bytes(uid))
    }

    pub fn get_uid_tx_bytes(&self, caller: &Caller, uid: u32) -> Result<u64, NetError> {
        caller.require(Permission::GetNetworkInfo)?;
        Ok(self.traffic.uid_tx_bytes(uid))
    }

    pub fn get_all_rx_bytes(&self, caller: &Caller) -> Result<u64, NetError> {
        caller.require(Permission::GetNetworkInfo)?;
        Ok(self.traffic.all_rx_bytes())
    }

    pub fn get_all_tx_bytes(&self, caller: &Caller) -> Result<u64, NetError> {
        caller.require(Permission::GetNetworkInfo)?;
        Ok(self.traffic.all_tx_bytes())
    }

    /// Rollup over cellular-bearer interfaces.
    pub fn get_cellular_rx_bytes(&self, caller: &Caller) -> Result<u64, NetError> {
        caller.require(Permission::GetNetworkInfo)?;
        Ok(self.traffic.cellular_rx_bytes())
    }

    pub fn get_cellular_tx_bytes(&self, caller: &Caller) -> Result<u64, NetError> {
        caller.require(Permission::GetNetworkInfo)?;
        Ok(self.traffic.cellular_tx_bytes())
    }

    /// Diagnostic snapshot of all interface counters.
    pub fn snapshot_iface_traffic(
        &self,
        caller: &Caller,
    ) -> Result<Vec<IfaceTrafficSnapshot>, NetError> {
        caller.require(Permission::GetNetworkInfo)?;
        Ok(self.traffic.snapshot_ifaces())
    }

    /// Diagnostic snapshot of all application counters.
    pub fn snapshot_uid_traffic(
        &self,
        caller: &Caller,
    ) -> Result<Vec<UidTrafficSnapshot>, NetError> {
        caller.require(Permission::GetNetworkInfo)?;
        Ok(self.traffic.snapshot_uids())
    }
}
