//! Privileged pass-through commands.
//!
//! These are policy-gated platform actions, not participants in the
//! connectivity state machine: the manager records the requested state and
//! logs it; acting on radios is the platform layer's responsibility.

use std::sync::atomic::Ordering;

use crate::core::types::NetHandle;
use crate::error::NetError;

use super::{Caller, ConnectivityManager, Permission};

impl ConnectivityManager {
    pub fn enable_airplane_mode(&self, caller: &Caller) -> Result<(), NetError> {
        caller.require(Permission::ConnectivityInternal)?;
        self.airplane_mode.store(true, Ordering::Relaxed);
        tracing::info!("airplane mode enabled by pid {}", caller.pid());
        Ok(())
    }

    pub fn disable_airplane_mode(&self, caller: &Caller) -> Result<(), NetError> {
        caller.require(Permission::ConnectivityInternal)?;
        self.airplane_mode.store(false, Ordering::Relaxed);
        tracing::info!("airplane mode disabled by pid {}", caller.pid());
        Ok(())
    }

    pub fn is_airplane_mode_enabled(&self, caller: &Caller) -> Result<bool, NetError> {
        caller.require(Permission::GetNetworkInfo)?;
        Ok(self.airplane_mode.load(Ordering::Relaxed))
    }

    pub fn enable_distributed_cellular_data(&self, caller: &Caller) -> Result<(), NetError> {
        caller.require(Permission::SetNetworkInfo)?;
        self.distributed_cellular.store(true, Ordering::Relaxed);
        tracing::info!("distributed cellular data enabled by pid {}", caller.pid());
        Ok(())
    }

    pub fn disable_distributed_cellular_data(&self, caller: &Caller) -> Result<(), NetError> {
        caller.require(Permission::SetNetworkInfo)?;
        self.distributed_cellular.store(false, Ordering::Relaxed);
        tracing::info!("distributed cellular data disabled by pid {}", caller.pid());
        Ok(())
    }

    pub fn is_distributed_cellular_data_enabled(
        &self,
        caller: &Caller,
    ) -> Result<bool, NetError> {
        caller.require(Permission::GetNetworkInfo)?;
        Ok(self.distributed_cellular.load(Ordering::Relaxed))
    }

    /// Pins the default slot to an explicit network, or restores automatic
    /// selection with `None`.
    pub fn set_default_override(
        &self,
        caller: &Caller,
        handle: Option<NetHandle>,
    ) -> Result<(), NetError> {
        caller.require(Permission::ConnectivityInternal)?;
        let _guard = self.write_section.lock().unwrap();
        self.registry.set_default_override(handle)?;
        tracing::info!("default network override set to {handle:?}");
        Ok(())
    }
}
