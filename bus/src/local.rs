//! In-process property bus
//!
//! Keeps the latest copy of every defined property, broadcasts each change to
//! subscribers and records a history that tests and embedding hosts can
//! inspect.

use crate::bus::{BusEvent, ImageFrame, PropertyBus};
use crate::property::Property;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::broadcast;

/// Default event buffer size
pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 1024;

type PropertyKey = (String, String);

#[derive(Default)]
struct LocalBusState {
    devices: Vec<String>,
    properties: BTreeMap<PropertyKey, Property>,
    global_locks: HashSet<String>,
    master_locks: HashMap<String, Arc<tokio::sync::Mutex<()>>>,
    history: Vec<BusEvent>,
}

/// A `PropertyBus` living in the same process as its drivers
pub struct LocalBus {
    state: Mutex<LocalBusState>,
    sender: broadcast::Sender<BusEvent>,
    events_published: AtomicU64,
}

impl Default for LocalBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER_SIZE)
    }
}

impl LocalBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            state: Mutex::new(LocalBusState::default()),
            sender,
            events_published: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, LocalBusState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn publish(&self, state: &mut LocalBusState, event: BusEvent) {
        self.events_published.fetch_add(1, Ordering::Relaxed);
        state.history.push(event.clone());
        // No subscribers is fine
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BusEvent> {
        self.sender.subscribe()
    }

    pub fn events_published(&self) -> u64 {
        self.events_published.load(Ordering::Relaxed)
    }

    /// Snapshot of every event published so far
    pub fn history(&self) -> Vec<BusEvent> {
        self.lock().history.clone()
    }

    pub fn clear_history(&self) {
        self.lock().history.clear();
    }

    /// Attached device names, in attach order
    pub fn devices(&self) -> Vec<String> {
        self.lock().devices.clone()
    }

    /// Latest published copy of a property
    pub fn property(&self, device: &str, name: &str) -> Option<Property> {
        self.lock()
            .properties
            .get(&(device.to_string(), name.to_string()))
            .cloned()
    }

    pub fn is_defined(&self, device: &str, name: &str) -> bool {
        self.property(device, name).is_some()
    }

    /// Every published version of a property, definitions and updates
    pub fn updates_of(&self, device: &str, name: &str) -> Vec<Property> {
        self.lock()
            .history
            .iter()
            .filter_map(|event| match event {
                BusEvent::Defined(p) | BusEvent::Updated { property: p, .. }
                    if p.device == device && p.name == name =>
                {
                    Some(p.clone())
                }
                _ => None,
            })
            .collect()
    }

    /// Message attached to the latest update of a property, if any
    pub fn last_message(&self, device: &str, name: &str) -> Option<String> {
        self.lock().history.iter().rev().find_map(|event| match event {
            BusEvent::Updated { property, message } if property.device == device && property.name == name => {
                Some(message.clone())
            }
            _ => None,
        })?
    }

    /// Number of frames delivered to `device`
    pub fn image_count(&self, device: &str) -> usize {
        self.lock()
            .history
            .iter()
            .filter(|event| matches!(event, BusEvent::ImageDelivered { device: d, .. } if d == device))
            .count()
    }

    pub fn is_globally_locked(&self, identity: &str) -> bool {
        self.lock().global_locks.contains(identity)
    }
}

impl PropertyBus for LocalBus {
    fn attach_device(&self, device: &str) {
        let mut state = self.lock();
        if !state.devices.iter().any(|d| d == device) {
            state.devices.push(device.to_string());
        }
        tracing::debug!("Device '{}' attached", device);
        self.publish(&mut state, BusEvent::DeviceAttached(device.to_string()));
    }

    fn detach_device(&self, device: &str) {
        let mut state = self.lock();
        state.devices.retain(|d| d != device);
        state.properties.retain(|(d, _), _| d != device);
        state.master_locks.remove(device);
        tracing::debug!("Device '{}' detached", device);
        self.publish(&mut state, BusEvent::DeviceDetached(device.to_string()));
    }

    fn make_name_unique(&self, name: &str) -> String {
        let state = self.lock();
        if !state.devices.iter().any(|d| d == name) {
            return name.to_string();
        }
        (2..)
            .map(|n| format!("{} #{}", name, n))
            .find(|candidate| !state.devices.iter().any(|d| d == candidate))
            .unwrap_or_else(|| name.to_string())
    }

    fn define(&self, property: &Property) {
        if property.hidden {
            return;
        }
        let mut state = self.lock();
        state.properties.insert(
            (property.device.clone(), property.name.clone()),
            property.clone(),
        );
        self.publish(&mut state, BusEvent::Defined(property.clone()));
    }

    fn update(&self, property: &Property, message: Option<&str>) {
        if property.hidden {
            return;
        }
        let mut state = self.lock();
        let key = (property.device.clone(), property.name.clone());
        if !state.properties.contains_key(&key) {
            tracing::warn!(
                "Update of undefined property '{}' on '{}' ignored",
                property.name,
                property.device
            );
            return;
        }
        state.properties.insert(key, property.clone());
        self.publish(
            &mut state,
            BusEvent::Updated {
                property: property.clone(),
                message: message.map(str::to_string),
            },
        );
    }

    fn delete(&self, property: &Property, message: Option<&str>) {
        let mut state = self.lock();
        let key = (property.device.clone(), property.name.clone());
        if state.properties.remove(&key).is_none() {
            return;
        }
        self.publish(
            &mut state,
            BusEvent::Deleted {
                device: property.device.clone(),
                name: property.name.clone(),
                message: message.map(str::to_string),
            },
        );
    }

    fn master_lock(&self, master: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.lock()
            .master_locks
            .entry(master.to_string())
            .or_default()
            .clone()
    }

    fn try_global_lock(&self, identity: &str) -> bool {
        self.lock().global_locks.insert(identity.to_string())
    }

    fn global_unlock(&self, identity: &str) {
        self.lock().global_locks.remove(identity);
    }

    fn process_image(&self, device: &str, frame: &ImageFrame<'_>, streaming: bool) {
        let mut state = self.lock();
        self.publish(
            &mut state,
            BusEvent::ImageDelivered {
                device: device.to_string(),
                width: frame.width,
                height: frame.height,
                bits_per_pixel: frame.bits_per_pixel,
                sequence: frame.sequence,
                bytes: frame.data.len(),
                bayer_pattern: frame.bayer_pattern.map(str::to_string),
                streaming,
            },
        );
    }

    fn finalize_video_stream(&self, device: &str) {
        let mut state = self.lock();
        self.publish(&mut state, BusEvent::StreamFinalized(device.to_string()));
    }

    fn failure_cleanup(&self, device: &str) {
        let mut state = self.lock();
        self.publish(&mut state, BusEvent::FailureCleanup(device.to_string()));
    }
}
