use std::{
    cell::{Cell, RefCell},
    rc::Rc,
};

use tracing::{trace, warn};

use crate::error::UsageError;

/// An event type with a fixed vocabulary of names.
///
/// Every payload variant maps to exactly one entry of [`Event::NAMES`].
pub trait Event {
    /// Names a dispatcher for this event type recognizes.
    const NAMES: &'static [&'static str];

    /// Name of this particular event.
    fn name(&self) -> &'static str;
}

/// Handle identifying one subscription within one dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionRef(u64);

type Callback<E> = Rc<RefCell<Box<dyn FnMut(&E)>>>;

struct Subscription<E> {
    sub_ref: SubscriptionRef,
    event: &'static str,
    once: bool,
    fired: Rc<Cell<bool>>,
    callback: Callback<E>,
}

/// Synchronous, single-threaded publish/subscribe restricted to `E::NAMES`.
///
/// `send` delivers to the callbacks live at the moment of the call, in
/// subscription order. A callback may `send` again on the same dispatcher;
/// the nested delivery completes before the outer one continues.
pub struct Dispatcher<E: Event> {
    subscriptions: RefCell<Vec<Subscription<E>>>,
    next_ref: Cell<u64>,
}

impl<E: Event> Default for Dispatcher<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Event> Dispatcher<E> {
    pub fn new() -> Self {
        Self {
            subscriptions: RefCell::new(Vec::new()),
            next_ref: Cell::new(1),
        }
    }

    /// Subscribe `callback` to `event`.
    pub fn on(
        &self,
        event: &str,
        callback: impl FnMut(&E) + 'static,
    ) -> Result<SubscriptionRef, UsageError> {
        self.subscribe(event, false, Box::new(callback))
    }

    /// Subscribe `callback` to the next delivery of `event` only.
    pub fn once(
        &self,
        event: &str,
        callback: impl FnMut(&E) + 'static,
    ) -> Result<SubscriptionRef, UsageError> {
        self.subscribe(event, true, Box::new(callback))
    }

    /// Remove exactly one subscription, leaving siblings on `event` intact.
    pub fn off(&self, event: &str, sub_ref: SubscriptionRef) -> Result<(), UsageError> {
        let event = recognized::<E>(event)?;
        self.subscriptions
            .borrow_mut()
            .retain(|sub| !(sub.event == event && sub.sub_ref == sub_ref));
        Ok(())
    }

    /// Remove every subscription for `event`.
    pub fn off_event(&self, event: &str) -> Result<(), UsageError> {
        let event = recognized::<E>(event)?;
        self.subscriptions
            .borrow_mut()
            .retain(|sub| sub.event != event);
        Ok(())
    }

    /// Remove every subscription.
    pub fn clear(&self) {
        self.subscriptions.borrow_mut().clear();
    }

    /// Number of live subscriptions for `event`.
    pub fn subscription_count(&self, event: &str) -> usize {
        self.subscriptions
            .borrow()
            .iter()
            .filter(|sub| sub.event == event)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.subscriptions.borrow().is_empty()
    }

    /// Deliver `payload` to every callback subscribed to its name.
    pub fn send(&self, payload: &E) -> Result<(), UsageError> {
        let event = recognized::<E>(payload.name())?;

        let batch: Vec<_> = self
            .subscriptions
            .borrow()
            .iter()
            .filter(|sub| sub.event == event)
            .map(|sub| {
                (
                    sub.sub_ref,
                    sub.once,
                    sub.fired.clone(),
                    sub.callback.clone(),
                )
            })
            .collect();

        trace!(event, subscribers = batch.len(), "dispatching event");

        for (sub_ref, once, fired, callback) in batch {
            if once {
                if fired.replace(true) {
                    continue;
                }
                self.off(event, sub_ref)?;
            }

            match callback.try_borrow_mut() {
                Ok(mut callback) => (callback)(payload),
                Err(_) => warn!(event, "skipping re-entrant delivery to a busy callback"),
            }
        }

        Ok(())
    }

    fn subscribe(
        &self,
        event: &str,
        once: bool,
        callback: Box<dyn FnMut(&E)>,
    ) -> Result<SubscriptionRef, UsageError> {
        let event = recognized::<E>(event)?;
        let sub_ref = SubscriptionRef(self.next_ref.get());
        self.next_ref.set(self.next_ref.get() + 1);

        self.subscriptions.borrow_mut().push(Subscription {
            sub_ref,
            event,
            once,
            fired: Rc::new(Cell::new(false)),
            callback: Rc::new(RefCell::new(callback)),
        });
        Ok(sub_ref)
    }
}

fn recognized<E: Event>(event: &str) -> Result<&'static str, UsageError> {
    E::NAMES
        .iter()
        .copied()
        .find(|name| *name == event)
        .ok_or_else(|| UsageError::unknown_event(event))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    enum Ping {
        Ping(u32),
        Pong(u32),
        Stray,
    }

    impl Event for Ping {
        const NAMES: &'static [&'static str] = &["ping", "pong"];

        fn name(&self) -> &'static str {
            match self {
                Self::Ping(_) => "ping",
                Self::Pong(_) => "pong",
                Self::Stray => "stray",
            }
        }
    }

    fn recorder() -> (Rc<RefCell<Vec<String>>>, impl Fn(&str) -> Box<dyn FnMut(&Ping)>) {
        let log = Rc::new(RefCell::new(Vec::new()));
        let log_for_make = log.clone();
        let make = move |label: &str| {
            let log = log_for_make.clone();
            let label = label.to_owned();
            Box::new(move |event: &Ping| log.borrow_mut().push(format!("{label}:{event:?}")))
                as Box<dyn FnMut(&Ping)>
        };
        (log, make)
    }

    #[test]
    fn delivers_in_registration_order_to_matching_event_only() {
        let dispatcher = Dispatcher::<Ping>::new();
        let (log, make) = recorder();
        dispatcher.on("ping", make("a")).expect("subscribe a");
        dispatcher.on("pong", make("b")).expect("subscribe b");
        dispatcher.on("ping", make("c")).expect("subscribe c");

        dispatcher.send(&Ping::Ping(1)).expect("send ping");

        assert_eq!(*log.borrow(), vec!["a:Ping(1)", "c:Ping(1)"]);
    }

    #[test]
    fn once_fires_on_first_send_only() {
        let dispatcher = Dispatcher::<Ping>::new();
        let (log, make) = recorder();
        dispatcher.once("ping", make("once")).expect("subscribe");

        for n in 0..5 {
            dispatcher.send(&Ping::Ping(n)).expect("send");
        }

        assert_eq!(*log.borrow(), vec!["once:Ping(0)"]);
        assert_eq!(dispatcher.subscription_count("ping"), 0);
    }

    #[test]
    fn targeted_off_leaves_siblings() {
        let dispatcher = Dispatcher::<Ping>::new();
        let (log, make) = recorder();
        let a = dispatcher.on("ping", make("a")).expect("subscribe a");
        dispatcher.on("ping", make("b")).expect("subscribe b");

        dispatcher.off("ping", a).expect("off a");
        dispatcher.send(&Ping::Ping(7)).expect("send");

        assert_eq!(*log.borrow(), vec!["b:Ping(7)"]);
    }

    #[test]
    fn off_event_and_clear_remove_subscriptions() {
        let dispatcher = Dispatcher::<Ping>::new();
        let (log, make) = recorder();
        dispatcher.on("ping", make("a")).expect("subscribe a");
        dispatcher.on("pong", make("b")).expect("subscribe b");

        dispatcher.off_event("ping").expect("off ping");
        dispatcher.send(&Ping::Ping(1)).expect("send ping");
        dispatcher.send(&Ping::Pong(1)).expect("send pong");
        assert_eq!(*log.borrow(), vec!["b:Pong(1)"]);

        dispatcher.clear();
        assert!(dispatcher.is_empty());
    }

    #[test]
    fn rejects_unknown_event_names() {
        let dispatcher = Dispatcher::<Ping>::new();
        let err = dispatcher
            .on("pang", |_| {})
            .expect_err("unknown event must fail");
        assert_eq!(err.code, "unknown_event");
        assert!(dispatcher.once("pang", |_| {}).is_err());
        assert!(dispatcher.off_event("pang").is_err());
        assert!(dispatcher.send(&Ping::Stray).is_err());
    }

    #[test]
    fn subscriptions_added_during_delivery_wait_for_next_send() {
        let dispatcher = Rc::new(Dispatcher::<Ping>::new());
        let hits = Rc::new(Cell::new(0));

        let inner_dispatcher = Rc::downgrade(&dispatcher);
        let inner_hits = hits.clone();
        dispatcher
            .once("ping", move |_| {
                if let Some(dispatcher) = inner_dispatcher.upgrade() {
                    let hits = inner_hits.clone();
                    dispatcher
                        .on("ping", move |_| hits.set(hits.get() + 1))
                        .expect("subscribe during delivery");
                }
            })
            .expect("subscribe");

        dispatcher.send(&Ping::Ping(1)).expect("first send");
        assert_eq!(hits.get(), 0);
        dispatcher.send(&Ping::Ping(2)).expect("second send");
        assert_eq!(hits.get(), 1);
    }

    #[test]
    fn removal_during_delivery_does_not_change_current_batch() {
        let dispatcher = Rc::new(Dispatcher::<Ping>::new());
        let (log, make) = recorder();
        let victim = Rc::new(Cell::new(None));

        let weak = Rc::downgrade(&dispatcher);
        let victim_ref = victim.clone();
        dispatcher
            .on("ping", move |_| {
                if let (Some(dispatcher), Some(sub_ref)) = (weak.upgrade(), victim_ref.get()) {
                    dispatcher.off("ping", sub_ref).expect("off during delivery");
                }
            })
            .expect("subscribe remover");
        victim.set(Some(dispatcher.on("ping", make("victim")).expect("subscribe victim")));

        dispatcher.send(&Ping::Ping(1)).expect("first send");
        dispatcher.send(&Ping::Ping(2)).expect("second send");

        assert_eq!(*log.borrow(), vec!["victim:Ping(1)"]);
    }

    #[test]
    fn nested_send_completes_before_outer_continues() {
        let dispatcher = Rc::new(Dispatcher::<Ping>::new());
        let (log, make) = recorder();

        let weak = Rc::downgrade(&dispatcher);
        dispatcher
            .on("ping", move |_| {
                if let Some(dispatcher) = weak.upgrade() {
                    dispatcher.send(&Ping::Pong(9)).expect("nested send");
                }
            })
            .expect("subscribe relay");
        dispatcher.on("pong", make("pong")).expect("subscribe pong");
        dispatcher.on("ping", make("ping")).expect("subscribe ping");

        dispatcher.send(&Ping::Ping(1)).expect("send");

        assert_eq!(*log.borrow(), vec!["pong:Pong(9)", "ping:Ping(1)"]);
    }
}
