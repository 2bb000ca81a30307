//! Nodes: the query shapes handlers declare
//!
//! A handler names the objects it needs as parameters. Every parameter is
//! resolved from the firing object, its space and the channel the event came
//! from, each time the handler is considered. A parameter that cannot be
//! resolved makes the handler skip the event.
//!
//! | parameter          | resolves to |
//! |--------------------|-------------|
//! | `N: Node`          | the firing object, adapted to `N` |
//! | `Option<P>`        | `None` instead of skipping |
//! | `AllowUnloaded<P>` | `P` without loaded-set checks |
//! | `JoinBy<K, N>`     | objects sharing the firing object's `K` key |
//! | `JoinAll<N>`       | every object of the space adapting to `N` |
//! | `PerChannel<N>`    | the firing object once per channel that sees it |
//! | `ChannelUser<N>`   | the user object bound to the originating channel |
//!
//! Tuples combine parameters. Join results keep space insertion order.

use crate::channel::SpaceChannel;
use crate::error::ModelError;
use crate::object::{Component, GameObject};
use crate::space::Space;
use crate::utils::short_type_name;
use std::marker::PhantomData;
use std::sync::Arc;

/// Everything a parameter may look at while resolving
#[derive(Clone, Copy)]
pub struct ResolveContext<'a> {
    pub object: &'a Arc<GameObject>,
    pub space: &'a Space,
    pub channel: Option<&'a Arc<SpaceChannel>>,
    pub allow_unloaded: bool,
}

impl<'a> ResolveContext<'a> {
    pub fn new(
        object: &'a Arc<GameObject>,
        space: &'a Space,
        channel: Option<&'a Arc<SpaceChannel>>,
    ) -> Self {
        Self {
            object,
            space,
            channel,
            allow_unloaded: false,
        }
    }

    pub fn unloaded(self) -> Self {
        Self {
            allow_unloaded: true,
            ..self
        }
    }

    /// Whether the originating channel may see `object`
    pub fn visible(&self, object: &GameObject) -> bool {
        if self.allow_unloaded {
            return true;
        }
        match self.channel {
            Some(channel) => channel.is_loaded(object.id()),
            None => true,
        }
    }

    pub fn check_visible(&self, object: &GameObject) -> Result<(), ModelError> {
        match self.channel {
            Some(channel) if !self.visible(object) => Err(ModelError::NotLoaded {
                object: object.id(),
                channel: channel.id(),
            }),
            _ => Ok(()),
        }
    }
}

/// A typed view of one object
pub trait Node: Sized + Send + 'static {
    const NAME: &'static str;

    fn adapt(object: &Arc<GameObject>) -> Result<Self, ModelError>;
}

/// A handler parameter
pub trait NodeParam: Sized + Send + 'static {
    fn resolve(cx: &ResolveContext<'_>) -> Result<Self, ModelError>;
}

/// Declares a node struct
///
/// Every node carries the matched object in its `object` field. With
/// `match SomeTemplate` the object must also adapt to that template.
///
/// ```ignore
/// node! {
///     pub struct ChatNode match ChatTemplate {
///         pub chat: Arc<Chat>,
///     }
/// }
/// ```
#[macro_export]
macro_rules! node {
    (@constraint $name:ident, $object:ident) => {};
    (@constraint $name:ident, $object:ident, $template:ty) => {
        if <$template as $crate::template::Template>::adapt($object).is_err() {
            return Err($crate::error::ModelError::TemplateMismatch {
                object: $object.id(),
                template: <$template as $crate::template::Template>::NAME,
            });
        }
    };
    (
        $(#[$meta:meta])*
        $vis:vis struct $name:ident $(match $template:ty)? {
            $(
                $(#[$field_meta:meta])*
                $field_vis:vis $field:ident : $ty:ty
            ),* $(,)?
        }
    ) => {
        $(#[$meta])*
        $vis struct $name {
            pub object: ::std::sync::Arc<$crate::object::GameObject>,
            $(
                $(#[$field_meta])*
                $field_vis $field: $ty,
            )*
        }

        impl $crate::node::Node for $name {
            const NAME: &'static str = stringify!($name);

            fn adapt(
                object: &::std::sync::Arc<$crate::object::GameObject>,
            ) -> ::std::result::Result<Self, $crate::error::ModelError> {
                $crate::node!(@constraint $name, object $(, $template)?);
                Ok(Self {
                    object: ::std::sync::Arc::clone(object),
                    $(
                        $field: <$ty as $crate::template::Member>::adapt(
                            object,
                            stringify!($name),
                            stringify!($field),
                        )?,
                    )*
                })
            }
        }

        impl $crate::node::NodeParam for $name {
            fn resolve(
                cx: &$crate::node::ResolveContext<'_>,
            ) -> ::std::result::Result<Self, $crate::error::ModelError> {
                cx.check_visible(cx.object)?;
                <Self as $crate::node::Node>::adapt(cx.object)
            }
        }
    };
}

/// The firing object itself, unchecked
impl NodeParam for Arc<GameObject> {
    fn resolve(cx: &ResolveContext<'_>) -> Result<Self, ModelError> {
        Ok(Arc::clone(cx.object))
    }
}

impl<P: NodeParam> NodeParam for Option<P> {
    fn resolve(cx: &ResolveContext<'_>) -> Result<Self, ModelError> {
        Ok(P::resolve(cx).ok())
    }
}

#[derive(Debug)]
pub struct AllowUnloaded<P>(pub P);

impl<P: NodeParam> NodeParam for AllowUnloaded<P> {
    fn resolve(cx: &ResolveContext<'_>) -> Result<Self, ModelError> {
        P::resolve(&cx.unloaded()).map(AllowUnloaded)
    }
}

/// A component whose value groups objects, such as the battle a tank is in
pub trait GroupComponent: Component {
    fn group_key(&self) -> i64;
}

fn join<N: Node>(
    cx: &ResolveContext<'_>,
    candidate: impl Fn(&GameObject) -> bool,
) -> Result<Vec<N>, ModelError> {
    let nodes: Vec<N> = cx
        .space
        .objects()
        .into_iter()
        .filter(|object| candidate(object) && cx.visible(object))
        .filter_map(|object| N::adapt(&object).ok())
        .collect();
    if nodes.is_empty() {
        return Err(ModelError::NoJoinCandidates { node: N::NAME });
    }
    Ok(nodes)
}

/// Every object whose `K` component has the firing object's key
///
/// The firing object is included when it matches.
pub struct JoinBy<K, N> {
    pub nodes: Vec<N>,
    key: PhantomData<fn() -> K>,
}

impl<K, N> JoinBy<K, N> {
    pub fn iter(&self) -> std::slice::Iter<'_, N> {
        self.nodes.iter()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

impl<K: GroupComponent, N: Node> NodeParam for JoinBy<K, N> {
    fn resolve(cx: &ResolveContext<'_>) -> Result<Self, ModelError> {
        let key = cx
            .object
            .get::<K>()
            .ok_or(ModelError::MissingMember {
                owner: "JoinBy",
                member: "key",
                component: short_type_name::<K>(),
            })?
            .group_key();
        let nodes = join::<N>(cx, |object| {
            object
                .get::<K>()
                .map_or(false, |group| group.group_key() == key)
        })?;
        Ok(Self {
            nodes,
            key: PhantomData,
        })
    }
}

/// Every object of the space adapting to `N`
pub struct JoinAll<N> {
    pub nodes: Vec<N>,
}

impl<N> JoinAll<N> {
    pub fn iter(&self) -> std::slice::Iter<'_, N> {
        self.nodes.iter()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

impl<N: Node> NodeParam for JoinAll<N> {
    fn resolve(cx: &ResolveContext<'_>) -> Result<Self, ModelError> {
        Ok(Self {
            nodes: join::<N>(cx, |_| true)?,
        })
    }
}

/// The firing object paired with every channel of the space that has it
/// loaded (every channel under `AllowUnloaded`)
pub struct PerChannel<N> {
    pub entries: Vec<(N, Arc<SpaceChannel>)>,
}

impl<N> PerChannel<N> {
    pub fn iter(&self) -> std::slice::Iter<'_, (N, Arc<SpaceChannel>)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<N: Node> NodeParam for PerChannel<N> {
    fn resolve(cx: &ResolveContext<'_>) -> Result<Self, ModelError> {
        let entries = cx
            .space
            .channels()
            .into_iter()
            .filter(|channel| cx.allow_unloaded || channel.is_loaded(cx.object.id()))
            .map(|channel| N::adapt(cx.object).map(|node| (node, channel)))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { entries })
    }
}

/// The user object bound to the channel the event came from
pub struct ChannelUser<N>(pub N);

impl<N: Node> NodeParam for ChannelUser<N> {
    fn resolve(cx: &ResolveContext<'_>) -> Result<Self, ModelError> {
        let user = cx
            .channel
            .and_then(|channel| channel.user())
            .and_then(|id| cx.space.object(id))
            .ok_or(ModelError::NoChannelUser)?;
        N::adapt(&user).map(ChannelUser)
    }
}

macro_rules! tuple_param {
    ($($param:ident),+) => {
        impl<$($param: NodeParam),+> NodeParam for ($($param,)+) {
            fn resolve(cx: &ResolveContext<'_>) -> Result<Self, ModelError> {
                Ok(($($param::resolve(cx)?,)+))
            }
        }
    };
}

tuple_param!(A);
tuple_param!(A, B);
tuple_param!(A, B, C);
tuple_param!(A, B, C, D);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node;
    use crate::protocol::ProtocolBuilder;
    use crate::template;
    use crate::template::Template;

    #[derive(Debug, Clone, PartialEq)]
    struct Hull(u8);
    impl Component for Hull {}

    #[derive(Debug)]
    struct Team(i64);
    impl Component for Team {}
    impl GroupComponent for Team {
        fn group_key(&self) -> i64 {
            self.0
        }
    }

    #[derive(Debug)]
    struct Flag;
    impl Component for Flag {}

    template! {
        struct FlagTemplate(950) {
            flag: Arc<Flag>,
        }
    }

    node! {
        struct HullNode {
            hull: Arc<Hull>,
        }
    }

    node! {
        struct FlagNode match FlagTemplate {
            team: Option<Arc<Team>>,
        }
    }

    fn space_with(objects: &[(i64, Option<i64>, bool)]) -> Space {
        let space = Space::new(1, Arc::new(GameObject::new(0, 0, "Root")));
        for (id, team, flag) in objects {
            let object = GameObject::new(*id, 0, "Test");
            object.add(Hull(*id as u8)).unwrap();
            if let Some(team) = team {
                object.add(Team(*team)).unwrap();
            }
            if *flag {
                object.add(Flag).unwrap();
            }
            space.add(Arc::new(object)).unwrap();
        }
        space
    }

    #[test]
    fn test_plain_node_adapts() {
        let space = space_with(&[(1, None, false)]);
        let object = space.object(1).unwrap();
        let node = HullNode::resolve(&ResolveContext::new(&object, &space, None)).unwrap();
        assert_eq!(*node.hull, Hull(1));
        assert_eq!(node.object.id(), 1);
    }

    #[test]
    fn test_optional_node_tolerates_absence() {
        let space = space_with(&[(1, None, false)]);
        let root = space.root();
        let cx = ResolveContext::new(&root, &space, None);
        assert!(HullNode::resolve(&cx).is_err());
        assert!(Option::<HullNode>::resolve(&cx).unwrap().is_none());
    }

    #[test]
    fn test_match_constraint() {
        let space = space_with(&[(1, Some(3), false), (2, Some(3), true)]);
        let plain = space.object(1).unwrap();
        let flagged = space.object(2).unwrap();
        assert_eq!(
            FlagNode::adapt(&plain).err(),
            Some(ModelError::TemplateMismatch {
                object: 1,
                template: "FlagTemplate"
            })
        );
        let node = FlagNode::adapt(&flagged).unwrap();
        assert_eq!(node.team.unwrap().0, 3);
        assert!(<FlagTemplate as Template>::adapt(&flagged).is_ok());
    }

    #[test]
    fn test_join_by_group_key_in_insertion_order() {
        let space = space_with(&[
            (4, Some(1), false),
            (2, Some(2), false),
            (3, Some(1), false),
            (1, None, false),
        ]);
        let object = space.object(4).unwrap();
        let joined =
            JoinBy::<Team, HullNode>::resolve(&ResolveContext::new(&object, &space, None)).unwrap();
        let ids: Vec<i64> = joined.iter().map(|node| node.object.id()).collect();
        assert_eq!(ids, vec![4, 3]);
    }

    #[test]
    fn test_join_respects_loaded_set() {
        let space = space_with(&[(1, Some(1), false), (2, Some(1), false)]);
        let (channel, _rx) = SpaceChannel::detached(5, 1);
        let object = space.object(1).unwrap();
        let cx = ResolveContext::new(&object, &space, Some(&channel));

        assert_eq!(
            JoinAll::<HullNode>::resolve(&cx).err(),
            Some(ModelError::NoJoinCandidates { node: "HullNode" })
        );
        assert!(Option::<JoinAll<HullNode>>::resolve(&cx).unwrap().is_none());

        let unloaded = AllowUnloaded::<JoinAll<HullNode>>::resolve(&cx).unwrap();
        assert_eq!(unloaded.0.len(), 2);
    }

    #[test]
    fn test_plain_node_requires_loaded_object() {
        let space = space_with(&[(1, None, false)]);
        let (channel, _rx) = SpaceChannel::detached(5, 1);
        let object = space.object(1).unwrap();
        let cx = ResolveContext::new(&object, &space, Some(&channel));
        assert_eq!(
            HullNode::resolve(&cx).err(),
            Some(ModelError::NotLoaded {
                object: 1,
                channel: 5
            })
        );
        assert!(AllowUnloaded::<HullNode>::resolve(&cx).is_ok());
    }

    #[tokio::test]
    async fn test_per_channel_pairs_loaded_channels() {
        let space = space_with(&[(1, None, false)]);
        let protocol = ProtocolBuilder::new().build().unwrap();
        let (seeing, mut rx) = SpaceChannel::detached(1, 1);
        let (blind, _rx2) = SpaceChannel::detached(2, 1);
        space.attach_channel(Arc::clone(&seeing));
        space.attach_channel(Arc::clone(&blind));

        let object = space.object(1).unwrap();
        let sharing = {
            let (seeing, object) = (Arc::clone(&seeing), Arc::clone(&object));
            tokio::spawn(async move { seeing.share(&protocol, &[object]).await })
        };
        let load = rx.recv().await.unwrap();
        if let shared::SpaceFrame::LoadDependencies { callback_id, .. } =
            shared::SpaceFrame::decode(load).unwrap()
        {
            seeing.acknowledge(callback_id);
        }
        sharing.await.unwrap().unwrap();

        let cx = ResolveContext::new(&object, &space, None);
        let per_channel = PerChannel::<HullNode>::resolve(&cx).unwrap();
        let ids: Vec<u64> = per_channel.iter().map(|(_, channel)| channel.id()).collect();
        assert_eq!(ids, vec![1]);

        let all = PerChannel::<HullNode>::resolve(&cx.unloaded()).unwrap();
        assert_eq!(all.len(), 2);
    }

    #[test]
    fn test_channel_user() {
        let space = space_with(&[(7, None, false)]);
        let (channel, _rx) = SpaceChannel::detached(1, 1);
        let root = space.root();
        let cx = ResolveContext::new(&root, &space, Some(&channel));
        assert_eq!(
            ChannelUser::<HullNode>::resolve(&cx).err(),
            Some(ModelError::NoChannelUser)
        );

        channel.bind_user(7);
        let user = ChannelUser::<HullNode>::resolve(&cx).unwrap();
        assert_eq!(user.0.object.id(), 7);
    }

    #[test]
    fn test_tuple_resolves_all() {
        let space = space_with(&[(1, Some(1), false)]);
        let object = space.object(1).unwrap();
        let cx = ResolveContext::new(&object, &space, None);
        let (node, all) = <(HullNode, JoinAll<HullNode>)>::resolve(&cx).unwrap();
        assert_eq!(node.object.id(), 1);
        assert_eq!(all.len(), 1);
    }
}
