use std::any::{Any, TypeId};
use std::fmt;

/// A value that can travel through the dispatch tree.
///
/// Every event type carries a static [`EventType`] descriptor naming its
/// place in the event hierarchy. The [`event!`](crate::event!) macro generates
/// the impl from a one-line declaration.
pub trait Event: Any + Send + Sync {
    fn event_type() -> &'static EventType
    where
        Self: Sized;

    /// View of this event as its parent type, when the hierarchy declares
    /// one (`extends Parent => |event| &event.base` in [`event!`]).
    ///
    /// Rust has no struct inheritance, so this projection is what lets a
    /// filter, predicate, or listener declared on a super type observe
    /// events of a subtype.
    fn as_super(&self) -> Option<&dyn Event> {
        None
    }
}

impl dyn Event {
    /// Whether the erased event is an `E`.
    #[inline]
    pub fn is<E: Event>(&self) -> bool {
        let any: &dyn Any = self;
        any.is::<E>()
    }

    /// Borrows the erased event back as exactly an `E`.
    #[inline]
    pub fn downcast_ref<E: Event>(&self) -> Option<&E> {
        let any: &dyn Any = self;
        any.downcast_ref::<E>()
    }

    /// Borrows the event as an `E`, walking super views when the concrete
    /// type is a descendant of `E`.
    pub fn view<E: Event>(&self) -> Option<&E> {
        let mut current = self;
        loop {
            if let Some(event) = current.downcast_ref::<E>() {
                return Some(event);
            }
            current = current.as_super()?;
        }
    }
}

/// Static descriptor of one event class: its name, identity, its parent in
/// the hierarchy, and whether it opts into recursive (super-type) dispatch.
///
/// Descriptors are created once per type and handed around as `&'static`
/// references; identity is the underlying `TypeId`.
pub struct EventType {
    name: &'static str,
    id: TypeId,
    parent: Option<&'static EventType>,
    recursive: bool,
}

impl EventType {
    pub fn new<E: Any>(
        name: &'static str,
        parent: Option<&'static EventType>,
        recursive: bool,
    ) -> Self {
        Self {
            name,
            id: TypeId::of::<E>(),
            parent,
            recursive,
        }
    }

    #[inline]
    pub fn name(&self) -> &'static str {
        self.name
    }

    #[inline]
    pub fn id(&self) -> TypeId {
        self.id
    }

    #[inline]
    pub fn parent(&self) -> Option<&'static EventType> {
        self.parent
    }

    /// Whether this type participates in recursive dispatch: events of its
    /// subtypes also reach listeners keyed by this type, as long as every
    /// link of the chain is recursive.
    #[inline]
    pub fn is_recursive(&self) -> bool {
        self.recursive
    }

    /// Whether `other` is this type or one of its descendants.
    pub fn admits(&self, other: &'static EventType) -> bool {
        let mut current = Some(other);
        while let Some(ty) = current {
            if ty.id == self.id {
                return true;
            }
            current = ty.parent;
        }
        false
    }

    /// The types under which an event keyed by `self` is delivered: `self`
    /// first, then each ancestor reachable through an unbroken chain of
    /// recursive types.
    pub fn targets(&'static self) -> TargetTypes {
        TargetTypes { next: Some(self) }
    }
}

impl fmt::Debug for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventType")
            .field("name", &self.name)
            .field("recursive", &self.recursive)
            .finish_non_exhaustive()
    }
}

/// Iterator over the listener-entry keys relevant to one dispatched type.
pub struct TargetTypes {
    next: Option<&'static EventType>,
}

impl Iterator for TargetTypes {
    type Item = &'static EventType;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next.take()?;
        if current.recursive {
            self.next = current.parent.filter(|parent| parent.recursive);
        }
        Some(current)
    }
}

/// Declares the [`Event`] impl for a type.
///
/// An `extends` clause may carry a projection lending the event as its
/// parent type; declare one whenever listeners, filters, or predicates keyed
/// by the parent type should observe events of this type.
///
/// ```ignore
/// event!(EntityEvent => "EntityEvent");
/// event!(PlayerEvent => "PlayerEvent", extends EntityEvent, recursive);
/// event!(JoinEvent => "JoinEvent", extends PlayerEvent => |event| &event.base, recursive);
/// ```
#[macro_export]
macro_rules! event {
    ($ty:ty => $name:literal) => {
        $crate::event!(@impl $ty, $name, None, false);
    };
    ($ty:ty => $name:literal, recursive) => {
        $crate::event!(@impl $ty, $name, None, true);
    };
    ($ty:ty => $name:literal, extends $parent:ty) => {
        $crate::event!(@impl $ty, $name, Some(<$parent as $crate::Event>::event_type()), false);
    };
    ($ty:ty => $name:literal, extends $parent:ty, recursive) => {
        $crate::event!(@impl $ty, $name, Some(<$parent as $crate::Event>::event_type()), true);
    };
    ($ty:ty => $name:literal, extends $parent:ty => $project:expr) => {
        $crate::event!(@impl_view $ty, $name, $parent, $project, false);
    };
    ($ty:ty => $name:literal, extends $parent:ty => $project:expr, recursive) => {
        $crate::event!(@impl_view $ty, $name, $parent, $project, true);
    };
    (@impl $ty:ty, $name:literal, $parent:expr, $recursive:expr) => {
        impl $crate::Event for $ty {
            fn event_type() -> &'static $crate::EventType {
                static TYPE: ::std::sync::OnceLock<$crate::EventType> =
                    ::std::sync::OnceLock::new();
                TYPE.get_or_init(|| $crate::EventType::new::<$ty>($name, $parent, $recursive))
            }
        }
    };
    (@impl_view $ty:ty, $name:literal, $parent:ty, $project:expr, $recursive:expr) => {
        impl $crate::Event for $ty {
            fn event_type() -> &'static $crate::EventType {
                static TYPE: ::std::sync::OnceLock<$crate::EventType> =
                    ::std::sync::OnceLock::new();
                TYPE.get_or_init(|| {
                    $crate::EventType::new::<$ty>(
                        $name,
                        Some(<$parent as $crate::Event>::event_type()),
                        $recursive,
                    )
                })
            }

            fn as_super(&self) -> ::std::option::Option<&dyn $crate::Event> {
                let project: fn(&$ty) -> &$parent = $project;
                let view: &$parent = project(self);
                Some(view)
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Base;
    struct Middle;
    struct Leaf;
    struct Detached;

    event!(Base => "Base");
    event!(Middle => "Middle", extends Base, recursive);
    event!(Leaf => "Leaf", extends Middle, recursive);
    event!(Detached => "Detached", recursive);

    #[test]
    fn admits_walks_the_parent_chain() {
        assert!(Base::event_type().admits(Base::event_type()));
        assert!(Base::event_type().admits(Leaf::event_type()));
        assert!(Middle::event_type().admits(Leaf::event_type()));
        assert!(!Leaf::event_type().admits(Base::event_type()));
        assert!(!Base::event_type().admits(Detached::event_type()));
    }

    #[test]
    fn targets_stop_at_the_first_non_recursive_ancestor() {
        let walked: Vec<&str> = Leaf::event_type().targets().map(EventType::name).collect();
        // Base is not recursive, so the walk ends at Middle.
        assert_eq!(walked, ["Leaf", "Middle"]);
    }

    #[test]
    fn non_recursive_types_target_only_themselves() {
        let walked: Vec<&str> = Base::event_type().targets().map(EventType::name).collect();
        assert_eq!(walked, ["Base"]);
    }

    #[test]
    fn erased_events_downcast() {
        let leaf = Leaf;
        let erased: &dyn Event = &leaf;
        assert!(erased.is::<Leaf>());
        assert!(erased.downcast_ref::<Leaf>().is_some());
        assert!(erased.downcast_ref::<Base>().is_none());
    }

    struct Root {
        id: u32,
    }
    struct Branch {
        root: Root,
    }
    struct Twig {
        branch: Branch,
    }

    event!(Root => "Root", recursive);
    event!(Branch => "Branch", extends Root => |branch: &Branch| &branch.root, recursive);
    event!(Twig => "Twig", extends Branch => |twig: &Twig| &twig.branch, recursive);

    #[test]
    fn view_walks_the_chain_of_super_views() {
        let twig = Twig {
            branch: Branch {
                root: Root { id: 9 },
            },
        };
        let erased: &dyn Event = &twig;
        assert!(erased.view::<Twig>().is_some());
        assert!(erased.view::<Branch>().is_some());
        assert_eq!(erased.view::<Root>().map(|root| root.id), Some(9));
        assert!(erased.view::<Detached>().is_none());
    }

    #[test]
    fn view_stops_where_no_super_view_is_declared() {
        // Leaf extends Middle without a projection, so only the exact type
        // is reachable.
        let erased: &dyn Event = &Leaf;
        assert!(erased.view::<Leaf>().is_some());
        assert!(erased.view::<Middle>().is_none());
    }
}
