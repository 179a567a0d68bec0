//! Process-wide slot → device map.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;

use crate::device::Device;
use crate::error::{DmResult, DmStatus};

/// Maps a numeric slot to its `Device`. Populated once at startup from the
/// parsed device description(s) and never structurally mutated afterward —
/// the `DashMap` buys lock-free concurrent reads, not runtime slot
/// add/remove (mirrors `dm-server`'s single bootstrap pass).
#[derive(Default)]
pub struct DeviceRegistry {
    devices: DashMap<u32, Arc<Device>>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, slot: u32, device: Arc<Device>) {
        self.devices.insert(slot, device);
    }

    /// `GetValue`/`SetValue`/etc. all start here. `NOT_FOUND` if no device
    /// occupies `slot`.
    pub fn get(&self, slot: u32) -> DmResult<Arc<Device>> {
        self.devices
            .get(&slot)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| DmStatus::not_found(format!("No device in slot {slot}")))
    }

    /// `GetPopulatedSlots` — every slot currently occupied, in ascending order.
    pub fn populated_slots(&self) -> Vec<u32> {
        let mut slots: Vec<u32> = self.devices.iter().map(|e| *e.key()).collect();
        slots.sort_unstable();
        slots
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn as_map(&self) -> HashMap<u32, Arc<Device>> {
        self.devices
            .iter()
            .map(|e| (*e.key(), e.value().clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DeviceBuilder;
    use crate::scope::Scope;

    #[test]
    fn get_missing_slot_is_not_found() {
        let registry = DeviceRegistry::new();
        let err = registry.get(7).unwrap_err();
        assert_eq!(err.code, crate::error::StatusCode::NotFound);
    }

    #[test]
    fn populated_slots_are_sorted() {
        let registry = DeviceRegistry::new();
        registry.insert(3, Arc::new(DeviceBuilder::new(3, Scope::Operate).build()));
        registry.insert(1, Arc::new(DeviceBuilder::new(1, Scope::Operate).build()));
        assert_eq!(registry.populated_slots(), vec![1, 3]);
    }
}
