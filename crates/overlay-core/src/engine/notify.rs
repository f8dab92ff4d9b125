use crate::core::models::item::Item;
use slotmap::{SlotMap, new_key_type};
use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

new_key_type! {
    pub struct SubscriberId;
}

pub type ChangeCallback = Rc<dyn Fn(&[Item])>;

type Subscribers = RefCell<SlotMap<SubscriberId, ChangeCallback>>;

/// Publishes registry snapshots to any number of subscribers.
#[derive(Clone, Default)]
pub struct ChangeBus {
    subscribers: Rc<Subscribers>,
}

impl fmt::Debug for ChangeBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChangeBus")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

impl ChangeBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, callback: impl Fn(&[Item]) + 'static) -> Subscription {
        let id = self.subscribers.borrow_mut().insert(Rc::new(callback));
        Subscription {
            id,
            subscribers: Rc::downgrade(&self.subscribers),
        }
    }

    /// Calls every subscriber with `items`. Subscribers may subscribe or
    /// unsubscribe from inside their callback.
    pub fn publish(&self, items: &[Item]) {
        let callbacks: Vec<ChangeCallback> = self.subscribers.borrow().values().cloned().collect();
        for callback in callbacks {
            callback(items);
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.borrow().len()
    }
}

/// Keeps a subscription alive; dropping it unsubscribes.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    id: SubscriberId,
    subscribers: Weak<Subscribers>,
}

impl Subscription {
    pub fn unsubscribe(self) {}
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Subscription").field(&self.id).finish()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(subscribers) = self.subscribers.upgrade() {
            subscribers.borrow_mut().remove(self.id);
        }
    }
}
