//! Fixed-capacity device slot table

use crate::constants::MAX_DEVICES;
use crate::device::{DeviceStatus, StreamHandle};
use crate::error::DeviceError;
use crate::server::{Control, Direction, SlotTag, StreamState};

/// One virtual device
pub struct DeviceSlot {
    /// Slot is reserved for a device (creating or active)
    pub occupied: bool,
    /// Stream reached readiness; only active slots are visible to callers
    pub active: bool,
    /// Changes on every reservation
    pub generation: u64,
    pub direction: Direction,
    pub name: String,
    pub description: String,
    pub volume: f32,
    pub muted: bool,
    pub state: StreamState,
    pub last_error: Option<String>,
    /// Volume confirmations received
    pub volume_seq: u64,
    /// Mute confirmations received
    pub mute_seq: u64,
    pub(crate) stream: Option<StreamHandle>,
}

impl Default for DeviceSlot {
    fn default() -> Self {
        Self {
            occupied: false,
            active: false,
            generation: 0,
            direction: Direction::Sink,
            name: String::new(),
            description: String::new(),
            volume: 1.0,
            muted: false,
            state: StreamState::Unconnected,
            last_error: None,
            volume_seq: 0,
            mute_seq: 0,
            stream: None,
        }
    }
}

impl DeviceSlot {
    pub fn tag(&self, index: usize) -> SlotTag {
        SlotTag {
            index,
            generation: self.generation,
        }
    }

    /// Cached control value, mute encoded as 0.0/1.0
    pub fn control_value(&self, control: Control) -> f32 {
        match control {
            Control::Volume => self.volume,
            Control::Mute => {
                if self.muted {
                    1.0
                } else {
                    0.0
                }
            }
        }
    }

    pub fn control_seq(&self, control: Control) -> u64 {
        match control {
            Control::Volume => self.volume_seq,
            Control::Mute => self.mute_seq,
        }
    }

    /// Store a control value, clamping volume into [0, 1]
    pub fn store_control(&mut self, control: Control, value: f32) {
        match control {
            Control::Volume => self.volume = value.clamp(0.0, 1.0),
            Control::Mute => self.muted = value >= 0.5,
        }
    }

    pub fn status(&self) -> DeviceStatus {
        DeviceStatus {
            name: self.name.clone(),
            description: self.description.clone(),
            volume: self.volume,
            mute: self.muted,
            direction: self.direction,
            state: self.state,
        }
    }
}

/// Registry mapping device name to slot
pub struct SlotTable {
    slots: [DeviceSlot; MAX_DEVICES],
    next_generation: u64,
}

impl Default for SlotTable {
    fn default() -> Self {
        Self::new()
    }
}

impl SlotTable {
    pub fn new() -> Self {
        Self {
            slots: std::array::from_fn(|_| DeviceSlot::default()),
            next_generation: 0,
        }
    }

    /// Index of the occupied slot holding `name`
    pub fn find_by_name(&self, name: &str) -> Option<usize> {
        self.slots
            .iter()
            .position(|slot| slot.occupied && slot.name == name)
    }

    /// Like [`SlotTable::find_by_name`] but only for devices that finished creation
    pub fn find_active(&self, name: &str) -> Option<usize> {
        self.find_by_name(name)
            .filter(|&index| self.slots[index].active)
    }

    /// First free index
    pub fn allocate(&self) -> Result<usize, DeviceError> {
        self.slots
            .iter()
            .position(|slot| !slot.occupied)
            .ok_or(DeviceError::CapacityExceeded(MAX_DEVICES))
    }

    /// Allocate a slot and claim it for a new device.
    ///
    /// Callers check [`SlotTable::find_by_name`] first; names stay unique.
    pub fn reserve(
        &mut self,
        name: &str,
        description: &str,
        direction: Direction,
    ) -> Result<SlotTag, DeviceError> {
        debug_assert!(self.find_by_name(name).is_none());
        let index = self.allocate()?;
        self.next_generation += 1;
        let slot = &mut self.slots[index];
        *slot = DeviceSlot {
            occupied: true,
            generation: self.next_generation,
            direction,
            name: name.to_string(),
            description: description.to_string(),
            ..Default::default()
        };
        Ok(slot.tag(index))
    }

    /// Reset a slot to defaults, handing back its stream for the caller to drop
    pub fn release(&mut self, index: usize) -> Option<StreamHandle> {
        let slot = self.slots.get_mut(index)?;
        let stream = slot.stream.take();
        *slot = DeviceSlot::default();
        stream
    }

    pub fn get(&self, index: usize) -> Option<&DeviceSlot> {
        self.slots.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut DeviceSlot> {
        self.slots.get_mut(index)
    }

    /// The slot a notification belongs to, if its occupant is still the same
    pub fn slot_for(&self, tag: SlotTag) -> Option<&DeviceSlot> {
        self.slots
            .get(tag.index)
            .filter(|slot| slot.occupied && slot.generation == tag.generation)
    }

    pub fn slot_for_mut(&mut self, tag: SlotTag) -> Option<&mut DeviceSlot> {
        self.slots
            .get_mut(tag.index)
            .filter(|slot| slot.occupied && slot.generation == tag.generation)
    }

    pub fn occupied_count(&self) -> usize {
        self.slots.iter().filter(|slot| slot.occupied).count()
    }

    /// Indices of occupied slots
    pub fn occupied(&self) -> Vec<usize> {
        (0..MAX_DEVICES)
            .filter(|&index| self.slots[index].occupied)
            .collect()
    }

    /// Active slots in index order
    pub fn active(&self) -> impl Iterator<Item = (usize, &DeviceSlot)> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.active)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reserve_and_find() {
        let mut table = SlotTable::new();
        let tag = table.reserve("beacn_link_out", "Link Out", Direction::Sink).unwrap();
        assert_eq!(tag.index, 0);
        assert_eq!(table.find_by_name("beacn_link_out"), Some(0));
        assert_eq!(table.find_by_name("beacn_link_2_out"), None);

        let slot = table.get(0).unwrap();
        assert!(slot.occupied);
        assert!(!slot.active);
        assert_eq!(slot.volume, 1.0);
        assert!(!slot.muted);
        assert_eq!(slot.description, "Link Out");
    }

    #[test]
    fn test_find_active_skips_creating() {
        let mut table = SlotTable::new();
        table.reserve("dev", "Dev", Direction::Source).unwrap();
        assert_eq!(table.find_active("dev"), None);
        table.get_mut(0).unwrap().active = true;
        assert_eq!(table.find_active("dev"), Some(0));
    }

    #[test]
    fn test_capacity_exceeded() {
        let mut table = SlotTable::new();
        for i in 0..MAX_DEVICES {
            table.reserve(&format!("dev{i}"), "", Direction::Sink).unwrap();
        }
        assert_eq!(table.occupied_count(), MAX_DEVICES);
        assert!(matches!(
            table.reserve("one_more", "", Direction::Sink),
            Err(DeviceError::CapacityExceeded(5))
        ));
    }

    #[test]
    fn test_release_reuses_index_with_new_generation() {
        let mut table = SlotTable::new();
        let first = table.reserve("a", "", Direction::Sink).unwrap();
        table.reserve("b", "", Direction::Sink).unwrap();

        assert!(table.release(first.index).is_none());
        assert_eq!(table.find_by_name("a"), None);
        assert_eq!(table.occupied(), vec![1]);

        let reused = table.reserve("c", "", Direction::Sink).unwrap();
        assert_eq!(reused.index, first.index);
        assert_ne!(reused.generation, first.generation);

        // stale tag no longer resolves
        assert!(table.slot_for(first).is_none());
        assert!(table.slot_for(reused).is_some());
    }

    #[test]
    fn test_control_encoding() {
        let mut slot = DeviceSlot::default();
        slot.store_control(Control::Volume, 1.7);
        assert_eq!(slot.volume, 1.0);
        slot.store_control(Control::Volume, -0.2);
        assert_eq!(slot.volume, 0.0);

        slot.store_control(Control::Mute, 1.0);
        assert!(slot.muted);
        assert_eq!(slot.control_value(Control::Mute), 1.0);
        slot.store_control(Control::Mute, 0.0);
        assert_eq!(slot.control_value(Control::Mute), 0.0);
    }
}
