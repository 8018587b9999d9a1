//! Property object model

use crate::error::{BusError, BusResult};
use serde::{Deserialize, Serialize};

/// Property state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PropertyState {
    #[default]
    Idle,
    Ok,
    Busy,
    Alert,
}

/// Property permission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Permission {
    ReadOnly,
    WriteOnly,
    ReadWrite,
}

/// Property types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PropertyKind {
    Text,
    Number,
    Switch,
    Light,
    Blob,
}

/// Switch vector rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SwitchRule {
    OneOfMany,
    AtMostOne,
    AnyOfMany,
}

/// Value held by a single property item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ItemValue {
    Text(String),
    Number {
        value: f64,
        target: f64,
        min: f64,
        max: f64,
        step: f64,
    },
    Switch(bool),
    Light(PropertyState),
    Blob,
}

/// One element of a property vector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub name: String,
    pub label: String,
    pub value: ItemValue,
}

/// A named vector of items owned by a device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Property {
    pub device: String,
    pub name: String,
    pub group: String,
    pub label: String,
    pub kind: PropertyKind,
    pub state: PropertyState,
    pub perm: Permission,
    pub rule: SwitchRule,
    /// Hidden properties are kept by the driver but never defined on the bus
    pub hidden: bool,
    pub items: Vec<Item>,
}

impl Property {
    fn new(device: &str, name: &str, group: &str, label: &str, kind: PropertyKind, perm: Permission) -> Self {
        Self {
            device: device.to_string(),
            name: name.to_string(),
            group: group.to_string(),
            label: label.to_string(),
            kind,
            state: PropertyState::Idle,
            perm,
            rule: SwitchRule::AnyOfMany,
            hidden: false,
            items: Vec::new(),
        }
    }

    pub fn text(device: &str, name: &str, group: &str, label: &str, perm: Permission) -> Self {
        Self::new(device, name, group, label, PropertyKind::Text, perm)
    }

    pub fn number(device: &str, name: &str, group: &str, label: &str, perm: Permission) -> Self {
        Self::new(device, name, group, label, PropertyKind::Number, perm)
    }

    pub fn switch(device: &str, name: &str, group: &str, label: &str, perm: Permission, rule: SwitchRule) -> Self {
        let mut property = Self::new(device, name, group, label, PropertyKind::Switch, perm);
        property.rule = rule;
        property
    }

    pub fn light(device: &str, name: &str, group: &str, label: &str) -> Self {
        Self::new(device, name, group, label, PropertyKind::Light, Permission::ReadOnly)
    }

    /// A request carrying only the items a client wants to change
    pub fn request(device: &str, name: &str, kind: PropertyKind) -> Self {
        Self::new(device, name, "", "", kind, Permission::WriteOnly)
    }

    pub fn with_text(mut self, name: &str, label: &str, value: &str) -> Self {
        self.push(name, label, ItemValue::Text(value.to_string()));
        self
    }

    pub fn with_number(mut self, name: &str, label: &str, min: f64, max: f64, step: f64, value: f64) -> Self {
        self.push(
            name,
            label,
            ItemValue::Number { value, target: value, min, max, step },
        );
        self
    }

    pub fn with_switch(mut self, name: &str, label: &str, on: bool) -> Self {
        self.push(name, label, ItemValue::Switch(on));
        self
    }

    pub fn with_light(mut self, name: &str, label: &str, state: PropertyState) -> Self {
        self.push(name, label, ItemValue::Light(state));
        self
    }

    pub fn with_state(mut self, state: PropertyState) -> Self {
        self.state = state;
        self
    }

    pub fn hidden(mut self, hidden: bool) -> Self {
        self.hidden = hidden;
        self
    }

    fn push(&mut self, name: &str, label: &str, value: ItemValue) {
        self.items.push(Item {
            name: name.to_string(),
            label: label.to_string(),
            value,
        });
    }

    /// True if `other` addresses this property (same device and name)
    pub fn matches(&self, other: &Property) -> bool {
        self.device == other.device && self.name == other.name
    }

    pub fn is_writable(&self) -> bool {
        self.perm != Permission::ReadOnly
    }

    pub fn item(&self, name: &str) -> Option<&Item> {
        self.items.iter().find(|i| i.name == name)
    }

    pub fn item_mut(&mut self, name: &str) -> Option<&mut Item> {
        self.items.iter_mut().find(|i| i.name == name)
    }

    fn unknown(&self, item: &str) -> BusError {
        BusError::UnknownItem {
            property: self.name.clone(),
            item: item.to_string(),
        }
    }

    fn mismatch(&self, item: &str, expected: &'static str) -> BusError {
        BusError::TypeMismatch {
            property: self.name.clone(),
            item: item.to_string(),
            expected,
        }
    }

    pub fn number_value(&self, name: &str) -> Option<f64> {
        match self.item(name)?.value {
            ItemValue::Number { value, .. } => Some(value),
            _ => None,
        }
    }

    pub fn number_target(&self, name: &str) -> Option<f64> {
        match self.item(name)?.value {
            ItemValue::Number { target, .. } => Some(target),
            _ => None,
        }
    }

    /// Sets the current value, leaving the target untouched
    pub fn set_number(&mut self, name: &str, new_value: f64) -> BusResult<()> {
        let err = self.mismatch(name, "number");
        let unknown = self.unknown(name);
        match self.item_mut(name) {
            Some(Item { value: ItemValue::Number { value, .. }, .. }) => {
                *value = new_value;
                Ok(())
            }
            Some(_) => Err(err),
            None => Err(unknown),
        }
    }

    /// Sets both value and target
    pub fn set_number_both(&mut self, name: &str, new_value: f64) -> BusResult<()> {
        let err = self.mismatch(name, "number");
        let unknown = self.unknown(name);
        match self.item_mut(name) {
            Some(Item { value: ItemValue::Number { value, target, .. }, .. }) => {
                *value = new_value;
                *target = new_value;
                Ok(())
            }
            Some(_) => Err(err),
            None => Err(unknown),
        }
    }

    /// Sets the target, leaving the current value untouched
    pub fn set_number_target(&mut self, name: &str, new_target: f64) -> BusResult<()> {
        let err = self.mismatch(name, "number");
        let unknown = self.unknown(name);
        match self.item_mut(name) {
            Some(Item { value: ItemValue::Number { target, .. }, .. }) => {
                *target = new_target;
                Ok(())
            }
            Some(_) => Err(err),
            None => Err(unknown),
        }
    }

    pub fn set_number_range(&mut self, name: &str, new_min: f64, new_max: f64) -> BusResult<()> {
        let err = self.mismatch(name, "number");
        let unknown = self.unknown(name);
        match self.item_mut(name) {
            Some(Item { value: ItemValue::Number { min, max, .. }, .. }) => {
                *min = new_min;
                *max = new_max;
                Ok(())
            }
            Some(_) => Err(err),
            None => Err(unknown),
        }
    }

    pub fn number_range(&self, name: &str) -> Option<(f64, f64)> {
        match self.item(name)?.value {
            ItemValue::Number { min, max, .. } => Some((min, max)),
            _ => None,
        }
    }

    pub fn switch_value(&self, name: &str) -> Option<bool> {
        match self.item(name)?.value {
            ItemValue::Switch(on) => Some(on),
            _ => None,
        }
    }

    /// Turns a switch on or off. Under `OneOfMany` and `AtMostOne`, turning
    /// one item on turns every other item off.
    pub fn set_switch(&mut self, name: &str, on: bool) -> BusResult<()> {
        match self.item(name) {
            Some(Item { value: ItemValue::Switch(_), .. }) => {}
            Some(_) => return Err(self.mismatch(name, "switch")),
            None => return Err(self.unknown(name)),
        }
        let exclusive = on && self.rule != SwitchRule::AnyOfMany;
        for item in &mut self.items {
            if let ItemValue::Switch(value) = &mut item.value {
                if item.name == name {
                    *value = on;
                } else if exclusive {
                    *value = false;
                }
            }
        }
        Ok(())
    }

    /// First item that is switched on
    pub fn selected(&self) -> Option<&Item> {
        self.items
            .iter()
            .find(|i| matches!(i.value, ItemValue::Switch(true)))
    }

    pub fn selected_index(&self) -> Option<usize> {
        self.items
            .iter()
            .position(|i| matches!(i.value, ItemValue::Switch(true)))
    }

    pub fn text_value(&self, name: &str) -> Option<&str> {
        match &self.item(name)?.value {
            ItemValue::Text(text) => Some(text.as_str()),
            _ => None,
        }
    }

    pub fn set_text(&mut self, name: &str, text: &str) -> BusResult<()> {
        let err = self.mismatch(name, "text");
        let unknown = self.unknown(name);
        match self.item_mut(name) {
            Some(Item { value: ItemValue::Text(value), .. }) => {
                *value = text.to_string();
                Ok(())
            }
            Some(_) => Err(err),
            None => Err(unknown),
        }
    }

    /// Copies the item values of a client request into this property.
    ///
    /// Items are matched by name; unknown items in `source` are ignored.
    /// Numbers are clamped into the item's range and land in both value
    /// and target. Switches honour this property's rule.
    pub fn copy_values(&mut self, source: &Property) {
        for incoming in &source.items {
            match &incoming.value {
                ItemValue::Switch(on) => {
                    let _ = self.set_switch(&incoming.name, *on);
                }
                ItemValue::Number { value: new_value, .. } => {
                    if let Some(Item { value: ItemValue::Number { value, target, min, max, .. }, .. }) =
                        self.item_mut(&incoming.name)
                    {
                        let clamped = if *min < *max { new_value.clamp(*min, *max) } else { *new_value };
                        *value = clamped;
                        *target = clamped;
                    }
                }
                ItemValue::Text(text) => {
                    let _ = self.set_text(&incoming.name, text);
                }
                ItemValue::Light(_) | ItemValue::Blob => {}
            }
        }
    }

    /// Names of the items present in a request, in order
    pub fn item_names(&self) -> impl Iterator<Item = &str> {
        self.items.iter().map(|i| i.name.as_str())
    }
}
