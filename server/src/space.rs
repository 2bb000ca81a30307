//! Spaces: isolated object registries with the channels viewing them

use crate::channel::{ChannelId, ChannelSet, SpaceChannel};
use crate::error::ModelError;
use crate::object::{GameObject, ObjectId};
use crate::utils::{read, write};
use log::debug;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

pub type SpaceId = i64;

pub struct Space {
    id: SpaceId,
    root: Arc<GameObject>,
    // insertion order is join order
    objects: RwLock<Vec<Arc<GameObject>>>,
    channels: RwLock<Vec<Arc<SpaceChannel>>>,
}

impl Space {
    /// Creates a space whose first object is `root`
    pub fn new(id: SpaceId, root: Arc<GameObject>) -> Self {
        Self {
            id,
            objects: RwLock::new(vec![Arc::clone(&root)]),
            root,
            channels: RwLock::new(Vec::new()),
        }
    }

    pub fn id(&self) -> SpaceId {
        self.id
    }

    /// Target of space-level events such as channels joining
    pub fn root(&self) -> Arc<GameObject> {
        Arc::clone(&self.root)
    }

    pub fn add(&self, object: Arc<GameObject>) -> Result<(), ModelError> {
        let mut objects = write(&self.objects);
        if objects.iter().any(|existing| existing.id() == object.id()) {
            return Err(ModelError::DuplicateObject(object.id()));
        }
        objects.push(object);
        Ok(())
    }

    pub fn remove(&self, id: ObjectId) -> Option<Arc<GameObject>> {
        let mut objects = write(&self.objects);
        let index = objects.iter().position(|object| object.id() == id)?;
        Some(objects.remove(index))
    }

    pub fn object(&self, id: ObjectId) -> Option<Arc<GameObject>> {
        read(&self.objects)
            .iter()
            .find(|object| object.id() == id)
            .cloned()
    }

    /// Snapshot of every object in insertion order
    pub fn objects(&self) -> Vec<Arc<GameObject>> {
        read(&self.objects).clone()
    }

    pub fn len(&self) -> usize {
        read(&self.objects).len()
    }

    pub fn is_empty(&self) -> bool {
        read(&self.objects).is_empty()
    }

    pub fn attach_channel(&self, channel: Arc<SpaceChannel>) {
        debug!("Channel {} attached to space {}", channel.id(), self.id);
        write(&self.channels).push(channel);
    }

    pub fn detach_channel(&self, id: ChannelId) -> Option<Arc<SpaceChannel>> {
        let mut channels = write(&self.channels);
        let index = channels.iter().position(|channel| channel.id() == id)?;
        Some(channels.remove(index))
    }

    pub fn channel(&self, id: ChannelId) -> Option<Arc<SpaceChannel>> {
        read(&self.channels)
            .iter()
            .find(|channel| channel.id() == id)
            .cloned()
    }

    /// Snapshot of the open channels viewing this space
    pub fn channels(&self) -> Vec<Arc<SpaceChannel>> {
        read(&self.channels)
            .iter()
            .filter(|channel| channel.is_open())
            .cloned()
            .collect()
    }

    /// Open channels that have `object` loaded
    pub fn loaded_channels(&self, object: ObjectId) -> ChannelSet {
        ChannelSet::new(
            self.channels()
                .into_iter()
                .filter(|channel| channel.is_loaded(object))
                .collect(),
        )
    }

    pub fn all_channels(&self) -> ChannelSet {
        ChannelSet::new(self.channels())
    }
}

impl std::fmt::Debug for Space {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Space")
            .field("id", &self.id)
            .field("objects", &self.len())
            .field("channels", &read(&self.channels).len())
            .finish()
    }
}

/// Every space of the server
#[derive(Debug, Default)]
pub struct Spaces {
    spaces: RwLock<HashMap<SpaceId, Arc<Space>>>,
}

impl Spaces {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a space, replacing any space with the same id
    pub fn insert(&self, space: Space) -> Arc<Space> {
        let space = Arc::new(space);
        write(&self.spaces).insert(space.id(), Arc::clone(&space));
        space
    }

    pub fn get(&self, id: SpaceId) -> Option<Arc<Space>> {
        read(&self.spaces).get(&id).cloned()
    }

    pub fn contains(&self, id: SpaceId) -> bool {
        read(&self.spaces).contains_key(&id)
    }

    pub fn ids(&self) -> Vec<SpaceId> {
        let mut ids: Vec<SpaceId> = read(&self.spaces).keys().copied().collect();
        ids.sort_unstable();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn object(id: ObjectId) -> Arc<GameObject> {
        Arc::new(GameObject::new(id, 0, "Test"))
    }

    #[test]
    fn test_insertion_order_and_root() {
        let space = Space::new(3, object(100));
        space.add(object(9)).unwrap();
        space.add(object(2)).unwrap();
        let ids: Vec<ObjectId> = space.objects().iter().map(|object| object.id()).collect();
        assert_eq!(ids, vec![100, 9, 2]);
        assert_eq!(space.root().id(), 100);
    }

    #[test]
    fn test_duplicate_object_rejected() {
        let space = Space::new(1, object(0));
        space.add(object(5)).unwrap();
        assert_eq!(space.add(object(5)), Err(ModelError::DuplicateObject(5)));
        assert!(space.remove(5).is_some());
        assert!(space.object(5).is_none());
        assert!(space.remove(5).is_none());
    }

    #[test]
    fn test_closed_channels_are_hidden() {
        let space = Space::new(1, object(0));
        let (first, _rx1) = SpaceChannel::detached(1, 1);
        let (second, _rx2) = SpaceChannel::detached(2, 1);
        space.attach_channel(Arc::clone(&first));
        space.attach_channel(second);
        first.close();
        assert_eq!(space.all_channels().ids(), vec![2]);
        assert!(space.detach_channel(1).is_some());
        assert!(space.channel(1).is_none());
    }

    #[test]
    fn test_spaces_registry() {
        let spaces = Spaces::new();
        spaces.insert(Space::new(2, object(0)));
        spaces.insert(Space::new(1, object(0)));
        assert_eq!(spaces.ids(), vec![1, 2]);
        assert!(spaces.contains(2));
        assert!(spaces.get(3).is_none());
    }
}
