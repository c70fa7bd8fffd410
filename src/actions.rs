// src/actions.rs - Gesture to action bindings
use std::collections::HashMap;

use crate::effector::{DeviceCommand, Effector};
use crate::error::{EffectorFailure, RegistryError};
use crate::gesture::Gesture;

/// Gesture bindings used by the remote. `FlashlightOff` has no gesture.
pub const STANDARD_BINDINGS: [(Gesture, DeviceCommand); 4] = [
    (Gesture::Fist, DeviceCommand::ZoomIn),
    (Gesture::Palm, DeviceCommand::ZoomOut),
    (Gesture::Screenshot, DeviceCommand::TakeScreenshot),
    (Gesture::Flash, DeviceCommand::FlashlightOn),
];

pub struct Action {
    label: String,
    effector: Box<dyn Effector>,
}

impl Action {
    pub fn new(label: impl Into<String>, effector: Box<dyn Effector>) -> Self {
        Self {
            label: label.into(),
            effector,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn invoke(&self) -> Result<(), EffectorFailure> {
        self.effector.invoke()
    }
}

impl std::fmt::Debug for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Action").field("label", &self.label).finish()
    }
}

/// Immutable once built; the dispatcher only reads it.
#[derive(Debug, Default)]
pub struct ActionRegistry {
    actions: HashMap<Gesture, Action>,
}

#[derive(Debug, Default)]
pub struct ActionRegistryBuilder {
    actions: HashMap<Gesture, Action>,
}

impl ActionRegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `gesture`, replacing any earlier binding for it.
    pub fn register(mut self, gesture: Gesture, action: Action) -> Result<Self, RegistryError> {
        if gesture.is_none() {
            return Err(RegistryError::NotActionable(gesture));
        }
        self.actions.insert(gesture, action);
        Ok(self)
    }

    pub fn build(self) -> ActionRegistry {
        ActionRegistry {
            actions: self.actions,
        }
    }
}

impl ActionRegistry {
    pub fn builder() -> ActionRegistryBuilder {
        ActionRegistryBuilder::new()
    }

    /// Registers every standard binding, asking `make` for each command's effector.
    pub fn standard<F>(mut make: F) -> Result<Self, RegistryError>
    where
        F: FnMut(DeviceCommand) -> Box<dyn Effector>,
    {
        STANDARD_BINDINGS
            .iter()
            .try_fold(Self::builder(), |builder, (gesture, command)| {
                builder.register(*gesture, Action::new(command.label(), make(*command)))
            })
            .map(ActionRegistryBuilder::build)
    }

    pub fn resolve(&self, gesture: Gesture) -> Result<&Action, RegistryError> {
        self.actions
            .get(&gesture)
            .ok_or(RegistryError::UnregisteredGesture(gesture))
    }

    /// Actionable gestures with no binding.
    pub fn unbound(&self) -> Vec<Gesture> {
        Gesture::ACTIONABLE
            .iter()
            .filter(|g| !self.actions.contains_key(g))
            .copied()
            .collect()
    }
}
