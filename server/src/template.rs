//! Templates: named sets of members that objects are built from and viewed
//! through
//!
//! Templates are structural. Any object carrying the required members adapts
//! to a template, whichever template instantiated it. Members are required
//! components (`Arc<T>`), providers (`Provided<T>`), nested templates, or
//! `Option` of any of these.
//!
//! ```ignore
//! template! {
//!     pub struct TankTemplate(1300) {
//!         pub health: Arc<Health>,
//!         pub group: Arc<BattleGroup>,
//!         pub user: Option<UserTemplate>,
//!     }
//! }
//! ```

use crate::error::ModelError;
use crate::object::{Component, GameObject, ObjectId, Provided};
use crate::utils::short_type_name;
use shared::ProtocolId;
use std::sync::Arc;

/// One member of a template or node
pub trait Member: Sized {
    /// Adds the member to an object under construction
    fn populate(self, object: &GameObject) -> Result<(), ModelError>;

    /// Reads the member from an existing object
    fn adapt(
        object: &Arc<GameObject>,
        owner: &'static str,
        member: &'static str,
    ) -> Result<Self, ModelError>;
}

impl<T: Component> Member for Arc<T> {
    fn populate(self, object: &GameObject) -> Result<(), ModelError> {
        object.add_arc(self)
    }

    fn adapt(
        object: &Arc<GameObject>,
        owner: &'static str,
        member: &'static str,
    ) -> Result<Self, ModelError> {
        object.get::<T>().ok_or(ModelError::MissingMember {
            owner,
            member,
            component: short_type_name::<T>(),
        })
    }
}

impl<T: Component> Member for Provided<T> {
    fn populate(self, object: &GameObject) -> Result<(), ModelError> {
        object.add_provider(self)
    }

    fn adapt(
        object: &Arc<GameObject>,
        owner: &'static str,
        member: &'static str,
    ) -> Result<Self, ModelError> {
        object.provided::<T>().ok_or(ModelError::MissingMember {
            owner,
            member,
            component: short_type_name::<T>(),
        })
    }
}

impl<M: Member> Member for Option<M> {
    fn populate(self, object: &GameObject) -> Result<(), ModelError> {
        match self {
            Some(member) => member.populate(object),
            None => Ok(()),
        }
    }

    fn adapt(
        object: &Arc<GameObject>,
        owner: &'static str,
        member: &'static str,
    ) -> Result<Self, ModelError> {
        Ok(M::adapt(object, owner, member).ok())
    }
}

pub trait Template: Sized + Send + Sync + 'static {
    const TEMPLATE_ID: ProtocolId;
    const NAME: &'static str;

    fn populate(self, object: &GameObject) -> Result<(), ModelError>;

    fn adapt(object: &Arc<GameObject>) -> Result<Self, ModelError>;

    /// Builds a new object carrying every member of the template
    fn instantiate(self, id: ObjectId) -> Result<Arc<GameObject>, ModelError> {
        let object = GameObject::new(id, Self::TEMPLATE_ID, Self::NAME);
        self.populate(&object)?;
        Ok(Arc::new(object))
    }
}

/// Declares a template struct with its protocol id
///
/// Override a template by embedding it as a member: its `populate` runs
/// first and the remaining members are added after it.
#[macro_export]
macro_rules! template {
    (
        $(#[$meta:meta])*
        $vis:vis struct $name:ident ($id:expr) {
            $(
                $(#[$field_meta:meta])*
                $field_vis:vis $field:ident : $ty:ty
            ),* $(,)?
        }
    ) => {
        $(#[$meta])*
        $vis struct $name {
            $(
                $(#[$field_meta])*
                $field_vis $field: $ty,
            )*
        }

        impl $crate::template::Template for $name {
            const TEMPLATE_ID: $crate::shared::ProtocolId = $id;
            const NAME: &'static str = stringify!($name);

            #[allow(unused_variables)]
            fn populate(
                self,
                object: &$crate::object::GameObject,
            ) -> ::std::result::Result<(), $crate::error::ModelError> {
                $( <$ty as $crate::template::Member>::populate(self.$field, object)?; )*
                Ok(())
            }

            #[allow(unused_variables)]
            fn adapt(
                object: &::std::sync::Arc<$crate::object::GameObject>,
            ) -> ::std::result::Result<Self, $crate::error::ModelError> {
                Ok(Self {
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

        impl $crate::template::Member for $name {
            fn populate(
                self,
                object: &$crate::object::GameObject,
            ) -> ::std::result::Result<(), $crate::error::ModelError> {
                <Self as $crate::template::Template>::populate(self, object)
            }

            fn adapt(
                object: &::std::sync::Arc<$crate::object::GameObject>,
                _owner: &'static str,
                _member: &'static str,
            ) -> ::std::result::Result<Self, $crate::error::ModelError> {
                <Self as $crate::template::Template>::adapt(object)
            }
        }
    };
}
