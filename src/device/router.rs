use super::{DeviceError, ModuleSlot, Result};

/// Maps a module-slot counter onto a live (device, module) pair.
///
/// Slots go round-robin: `modules_per_device` consecutive slots share a
/// device, then the next device takes over. A dead candidate hands its
/// slot to the next live device (circularly) with the same module index.
/// The result depends only on the counter and the live set.
#[derive(Debug, Clone, Copy)]
pub struct CharacterRouter {
    modules_per_device: usize,
}

impl CharacterRouter {
    pub fn new(modules_per_device: usize) -> Self {
        Self { modules_per_device }
    }

    pub fn resolve(&self, slot_index: usize, live: &[bool]) -> Result<ModuleSlot> {
        resolve(slot_index, self.modules_per_device, live)
    }
}

/// See [`CharacterRouter`]. `live[d]` is device `d`'s liveness.
pub fn resolve(slot_index: usize, modules_per_device: usize, live: &[bool]) -> Result<ModuleSlot> {
    if modules_per_device == 0 {
        return Err(DeviceError::InvalidConfiguration(
            "modules per device must be at least 1".to_string(),
        ));
    }

    let device_count = live.len();
    if !live.iter().any(|&l| l) {
        return Err(DeviceError::NoLiveDevice);
    }

    let candidate = (slot_index / modules_per_device) % device_count;
    let module = slot_index % modules_per_device;

    (0..device_count)
        .map(|step| (candidate + step) % device_count)
        .find(|&device| live[device])
        .map(|device| ModuleSlot { device, module })
        .ok_or(DeviceError::NoLiveDevice)
}
