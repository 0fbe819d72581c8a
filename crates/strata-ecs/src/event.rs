//! Structural events emitted by the [`World`](crate::world::World).
//!
//! Events fire synchronously, after the mutation that caused them has
//! completed. Consumers either subscribe a callback ([`EventBus::on`],
//! [`EventBus::once`], [`EventBus::on_any`]) or open an [`EventStream`] that
//! buffers events until drained.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;
use std::rc::{Rc, Weak};

use crate::entity::Entity;
use crate::world::WorldState;

// ---------------------------------------------------------------------------
// WorldEvent
// ---------------------------------------------------------------------------

/// A structural change in a world.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorldEvent {
    /// An entity was allocated.
    EntityCreated { entity: Entity },
    /// An entity was destroyed and its id freed.
    EntityDestroyed { entity: Entity },
    /// A destroyed entity had an actor bound to it.
    ActorDestroyed { entity: Entity },
    /// A component was attached.
    ComponentAdded { entity: Entity, component: String },
    /// A component was detached.
    ComponentRemoved { entity: Entity, component: String },
    /// The world moved between lifecycle states.
    StateChanged { from: WorldState, to: WorldState },
}

impl WorldEvent {
    /// The discriminant used for subscriptions.
    pub fn kind(&self) -> EventKind {
        match self {
            WorldEvent::EntityCreated { .. } => EventKind::EntityCreated,
            WorldEvent::EntityDestroyed { .. } => EventKind::EntityDestroyed,
            WorldEvent::ActorDestroyed { .. } => EventKind::ActorDestroyed,
            WorldEvent::ComponentAdded { .. } => EventKind::ComponentAdded,
            WorldEvent::ComponentRemoved { .. } => EventKind::ComponentRemoved,
            WorldEvent::StateChanged { .. } => EventKind::StateChanged,
        }
    }

    /// The entity the event concerns, if any.
    pub fn entity(&self) -> Option<Entity> {
        match self {
            WorldEvent::EntityCreated { entity }
            | WorldEvent::EntityDestroyed { entity }
            | WorldEvent::ActorDestroyed { entity }
            | WorldEvent::ComponentAdded { entity, .. }
            | WorldEvent::ComponentRemoved { entity, .. } => Some(*entity),
            WorldEvent::StateChanged { .. } => None,
        }
    }
}

/// Event discriminant, used to filter subscriptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    EntityCreated,
    EntityDestroyed,
    ActorDestroyed,
    ComponentAdded,
    ComponentRemoved,
    StateChanged,
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Handle returned by a subscription, used to [`off`](EventBus::off) it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Listener = Box<dyn FnMut(&WorldEvent)>;

struct Subscription {
    id: SubscriptionId,
    /// `None` listens to every kind.
    kind: Option<EventKind>,
    once: bool,
    listener: Listener,
}

/// Synchronous fan-out of [`WorldEvent`]s.
#[derive(Default)]
pub struct EventBus {
    subscriptions: Vec<Subscription>,
    streams: Vec<Weak<RefCell<VecDeque<WorldEvent>>>>,
    next_id: u64,
    emitted: u64,
}

impl EventBus {
    /// Create a bus with no subscribers.
    pub fn new() -> Self {
        Self::default()
    }

    fn subscribe(
        &mut self,
        kind: Option<EventKind>,
        once: bool,
        listener: Listener,
    ) -> SubscriptionId {
        let id = SubscriptionId(self.next_id);
        self.next_id += 1;
        self.subscriptions.push(Subscription {
            id,
            kind,
            once,
            listener,
        });
        id
    }

    /// Call `listener` for every event of `kind`.
    pub fn on(
        &mut self,
        kind: EventKind,
        listener: impl FnMut(&WorldEvent) + 'static,
    ) -> SubscriptionId {
        self.subscribe(Some(kind), false, Box::new(listener))
    }

    /// Call `listener` for every event.
    pub fn on_any(&mut self, listener: impl FnMut(&WorldEvent) + 'static) -> SubscriptionId {
        self.subscribe(None, false, Box::new(listener))
    }

    /// Call `listener` for the next event of `kind` only.
    pub fn once(
        &mut self,
        kind: EventKind,
        listener: impl FnMut(&WorldEvent) + 'static,
    ) -> SubscriptionId {
        self.subscribe(Some(kind), true, Box::new(listener))
    }

    /// Remove a subscription. Returns `false` if it was already gone.
    pub fn off(&mut self, id: SubscriptionId) -> bool {
        let before = self.subscriptions.len();
        self.subscriptions.retain(|s| s.id != id);
        self.subscriptions.len() != before
    }

    /// Open a buffered stream receiving every subsequent event.
    pub fn stream(&mut self) -> EventStream {
        let buffer = Rc::new(RefCell::new(VecDeque::new()));
        self.streams.push(Rc::downgrade(&buffer));
        EventStream { buffer }
    }

    /// Deliver `event` to matching subscribers, in subscription order, then
    /// to open streams.
    pub fn emit(&mut self, event: WorldEvent) {
        self.emitted += 1;
        let kind = event.kind();
        self.subscriptions.retain_mut(|sub| {
            if sub.kind.is_some_and(|k| k != kind) {
                return true;
            }
            (sub.listener)(&event);
            !sub.once
        });
        self.streams.retain(|weak| match weak.upgrade() {
            Some(buffer) => {
                buffer.borrow_mut().push_back(event.clone());
                true
            }
            None => false,
        });
    }

    /// Number of live callback subscriptions.
    pub fn listener_count(&self) -> usize {
        self.subscriptions.len()
    }

    /// Total events emitted.
    pub fn emitted(&self) -> u64 {
        self.emitted
    }

    /// Drop all subscriptions and detach all streams.
    pub fn clear(&mut self) {
        self.subscriptions.clear();
        self.streams.clear();
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("listeners", &self.subscriptions.len())
            .field("streams", &self.streams.len())
            .field("emitted", &self.emitted)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// EventStream
// ---------------------------------------------------------------------------

/// A buffered subscription to every event. Dropping the stream detaches it.
#[derive(Debug)]
pub struct EventStream {
    buffer: Rc<RefCell<VecDeque<WorldEvent>>>,
}

impl EventStream {
    /// Take every buffered event, oldest first.
    pub fn drain(&self) -> Vec<WorldEvent> {
        self.buffer.borrow_mut().drain(..).collect()
    }

    /// Take the oldest buffered event.
    pub fn next_event(&self) -> Option<WorldEvent> {
        self.buffer.borrow_mut().pop_front()
    }

    /// Number of buffered events.
    pub fn len(&self) -> usize {
        self.buffer.borrow().len()
    }

    /// Whether the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.buffer.borrow().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn added(n: u32) -> WorldEvent {
        WorldEvent::ComponentAdded {
            entity: Entity::from_raw(n),
            component: "Position".into(),
        }
    }

    #[test]
    fn on_filters_by_kind() {
        let mut bus = EventBus::new();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        bus.on(EventKind::ComponentAdded, move |e| sink.borrow_mut().push(e.clone()));

        bus.emit(WorldEvent::EntityCreated {
            entity: Entity::from_raw(0),
        });
        bus.emit(added(0));
        assert_eq!(*seen.borrow(), vec![added(0)]);
    }

    #[test]
    fn once_fires_a_single_time() {
        let mut bus = EventBus::new();
        let count = Rc::new(RefCell::new(0));
        let c = Rc::clone(&count);
        bus.once(EventKind::ComponentAdded, move |_| *c.borrow_mut() += 1);
        bus.emit(added(0));
        bus.emit(added(1));
        assert_eq!(*count.borrow(), 1);
        assert_eq!(bus.listener_count(), 0);
    }

    #[test]
    fn off_unsubscribes() {
        let mut bus = EventBus::new();
        let count = Rc::new(RefCell::new(0));
        let c = Rc::clone(&count);
        let id = bus.on_any(move |_| *c.borrow_mut() += 1);
        bus.emit(added(0));
        assert!(bus.off(id));
        assert!(!bus.off(id));
        bus.emit(added(1));
        assert_eq!(*count.borrow(), 1);
    }

    #[test]
    fn stream_buffers_until_drained_and_detaches_on_drop() {
        let mut bus = EventBus::new();
        let stream = bus.stream();
        bus.emit(added(0));
        bus.emit(added(1));
        assert_eq!(stream.len(), 2);
        assert_eq!(stream.next_event(), Some(added(0)));
        assert_eq!(stream.drain(), vec![added(1)]);
        assert!(stream.is_empty());

        drop(stream);
        bus.emit(added(2));
        assert_eq!(bus.emitted(), 3);
    }
}
