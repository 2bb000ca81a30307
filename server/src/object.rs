//! Game objects and their components
//!
//! A [`GameObject`] is an id plus at most one component per component type.
//! Components are immutable values behind `Arc`; mutating one means
//! replacing it with [`GameObject::set`], so a snapshot handed out earlier
//! never changes under its holder.
//!
//! Components that clients see are models: they carry a protocol id and a
//! wire shape (declare them with `wire_struct!` and `model!`). A component
//! slot may also hold a provider, which computes the model separately for
//! every recipient channel at the moment the object is serialized.

use crate::channel::SpaceChannel;
use crate::error::ModelError;
use crate::utils::{read, short_type_name, write};
use shared::{ProtocolId, TypeDescriptor, Value, WireStruct};
use std::any::{Any, TypeId};
use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, RwLock};

pub type ObjectId = i64;

/// Erases an `Arc<T>` into `Arc<dyn Any>` so it can be downcast back
pub trait AsAnyArc: Any + Send + Sync {
    fn as_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

impl<T: Any + Send + Sync> AsAnyArc for T {
    fn as_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

pub trait Component: AsAnyArc + fmt::Debug {
    /// Wire form of the component, for models
    fn model(&self) -> Option<ModelValue> {
        None
    }
}

/// A component visible on the wire
pub trait Model: Component + WireStruct {
    const MODEL_ID: ProtocolId;
}

/// A model evaluated for serialization
#[derive(Debug, Clone, PartialEq)]
pub struct ModelValue {
    pub id: ProtocolId,
    pub descriptor: TypeDescriptor,
    pub value: Value,
}

/// Declares a `wire_struct!` type as a model with the given protocol id
#[macro_export]
macro_rules! model {
    ($ty:ty = $id:expr) => {
        impl $crate::object::Model for $ty {
            const MODEL_ID: $crate::shared::ProtocolId = $id;
        }

        impl $crate::object::Component for $ty {
            fn model(&self) -> ::std::option::Option<$crate::object::ModelValue> {
                Some($crate::object::ModelValue {
                    id: <$ty as $crate::object::Model>::MODEL_ID,
                    descriptor: <$ty as $crate::shared::WireType>::descriptor(),
                    value: $crate::shared::WireType::to_value(self),
                })
            }
        }
    };
}

type ProviderFn<T> = dyn Fn(&GameObject, &SpaceChannel) -> T + Send + Sync;

/// Computes a component per recipient channel
pub struct Provided<T> {
    provide: Arc<ProviderFn<T>>,
}

impl<T: Component> Provided<T> {
    pub fn new(provide: impl Fn(&GameObject, &SpaceChannel) -> T + Send + Sync + 'static) -> Self {
        Self {
            provide: Arc::new(provide),
        }
    }

    pub fn get(&self, object: &GameObject, channel: &SpaceChannel) -> T {
        (self.provide)(object, channel)
    }
}

impl<T> Clone for Provided<T> {
    fn clone(&self) -> Self {
        Self {
            provide: Arc::clone(&self.provide),
        }
    }
}

impl<T> fmt::Debug for Provided<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Provided<{}>", short_type_name::<T>())
    }
}

trait ErasedProvider: AsAnyArc {
    fn model_for(&self, object: &GameObject, channel: &SpaceChannel) -> Option<ModelValue>;
}

impl<T: Component> ErasedProvider for Provided<T> {
    fn model_for(&self, object: &GameObject, channel: &SpaceChannel) -> Option<ModelValue> {
        self.get(object, channel).model()
    }
}

#[derive(Clone)]
enum ComponentSlot {
    Static(Arc<dyn Component>),
    Provided(Arc<dyn ErasedProvider>),
}

struct SlotEntry {
    kind: TypeId,
    name: &'static str,
    slot: ComponentSlot,
}

pub struct GameObject {
    id: ObjectId,
    template_id: ProtocolId,
    template_name: &'static str,
    // insertion order is serialization order
    components: RwLock<Vec<SlotEntry>>,
}

impl GameObject {
    pub fn new(id: ObjectId, template_id: ProtocolId, template_name: &'static str) -> Self {
        Self {
            id,
            template_id,
            template_name,
            components: RwLock::new(Vec::new()),
        }
    }

    pub fn id(&self) -> ObjectId {
        self.id
    }

    pub fn template_id(&self) -> ProtocolId {
        self.template_id
    }

    pub fn template_name(&self) -> &'static str {
        self.template_name
    }

    pub fn add<T: Component>(&self, component: T) -> Result<(), ModelError> {
        self.add_arc(Arc::new(component))
    }

    pub fn add_arc<T: Component>(&self, component: Arc<T>) -> Result<(), ModelError> {
        self.insert::<T>(ComponentSlot::Static(component))
    }

    pub fn add_provider<T: Component>(&self, provider: Provided<T>) -> Result<(), ModelError> {
        self.insert::<T>(ComponentSlot::Provided(Arc::new(provider)))
    }

    fn insert<T: Component>(&self, slot: ComponentSlot) -> Result<(), ModelError> {
        let mut components = write(&self.components);
        if components.iter().any(|entry| entry.kind == TypeId::of::<T>()) {
            return Err(ModelError::DuplicateComponent {
                object: self.id,
                component: short_type_name::<T>(),
            });
        }
        components.push(SlotEntry {
            kind: TypeId::of::<T>(),
            name: short_type_name::<T>(),
            slot,
        });
        Ok(())
    }

    /// Replaces the component of type `T`, or adds it when absent
    pub fn set<T: Component>(&self, component: T) -> Arc<T> {
        let component = Arc::new(component);
        let slot = ComponentSlot::Static(Arc::clone(&component) as Arc<dyn Component>);
        let mut components = write(&self.components);
        match components
            .iter_mut()
            .find(|entry| entry.kind == TypeId::of::<T>())
        {
            Some(entry) => entry.slot = slot,
            None => components.push(SlotEntry {
                kind: TypeId::of::<T>(),
                name: short_type_name::<T>(),
                slot,
            }),
        }
        component
    }

    fn slot<T: Component>(&self) -> Option<ComponentSlot> {
        read(&self.components)
            .iter()
            .find(|entry| entry.kind == TypeId::of::<T>())
            .map(|entry| entry.slot.clone())
    }

    /// Current value of a stored component; `None` for absent or provided kinds
    pub fn get<T: Component>(&self) -> Option<Arc<T>> {
        match self.slot::<T>()? {
            ComponentSlot::Static(component) => component.as_any_arc().downcast::<T>().ok(),
            ComponentSlot::Provided(_) => None,
        }
    }

    pub fn provided<T: Component>(&self) -> Option<Provided<T>> {
        match self.slot::<T>()? {
            ComponentSlot::Provided(provider) => provider
                .as_any_arc()
                .downcast::<Provided<T>>()
                .ok()
                .map(|provider| (*provider).clone()),
            ComponentSlot::Static(_) => None,
        }
    }

    pub fn has<T: Component>(&self) -> bool {
        self.slot::<T>().is_some()
    }

    pub fn component_names(&self) -> Vec<&'static str> {
        read(&self.components)
            .iter()
            .map(|entry| entry.name)
            .collect()
    }

    /// Models as one recipient sees them; providers run here
    pub fn models_for(&self, channel: &SpaceChannel) -> Vec<ModelValue> {
        // providers may read this object, so evaluate outside the lock
        let slots: Vec<ComponentSlot> = read(&self.components)
            .iter()
            .map(|entry| entry.slot.clone())
            .collect();

        slots
            .into_iter()
            .filter_map(|slot| match slot {
                ComponentSlot::Static(component) => component.model(),
                ComponentSlot::Provided(provider) => provider.model_for(self, channel),
            })
            .collect()
    }
}

impl fmt::Debug for GameObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GameObject")
            .field("id", &self.id)
            .field("template", &self.template_name)
            .field("components", &self.component_names())
            .finish()
    }
}

/// Server-wide object id allocator; clients never allocate ids
#[derive(Debug)]
pub struct ObjectIds {
    next: AtomicI64,
}

impl ObjectIds {
    pub fn new() -> Self {
        Self::starting_at(1)
    }

    pub fn starting_at(first: ObjectId) -> Self {
        Self {
            next: AtomicI64::new(first),
        }
    }

    pub fn next(&self) -> ObjectId {
        self.next.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for ObjectIds {
    fn default() -> Self {
        Self::new()
    }
}
