//! A minimal observable primitive.
//!
//! [`Observable`] is cold: every [`subscribe`](Observable::subscribe) runs
//! the factory's subscriber function with a fresh producer handle. `error`
//! and `complete` are terminal: no `next` is delivered after either.
//! Unsubscribing is idempotent. The producer's teardown runs exactly once,
//! when the subscription closes for any reason.

use std::cell::Cell;
use std::cell::RefCell;
use std::error::Error as StdError;
use std::fmt;
use std::rc::Rc;

use futures::channel::mpsc;

/// Errors delivered on an observable's error channel. `Rc` so a single
/// failure can fan out to several observers.
pub type SharedError = Rc<dyn StdError>;

/// Teardown logic run when a subscription closes.
pub type Teardown = Box<dyn FnOnce()>;

/// Consumer callbacks for a subscription. All callbacks are optional.
pub struct Observer<T> {
    pub next: Option<Box<dyn FnMut(T)>>,
    pub error: Option<Box<dyn FnMut(SharedError)>>,
    pub complete: Option<Box<dyn FnOnce()>>,
}

impl<T> Default for Observer<T> {
    fn default() -> Self {
        Observer {
            next: None,
            error: None,
            complete: None,
        }
    }
}

impl<T> fmt::Debug for Observer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observer")
            .field("next", &self.next.is_some())
            .field("error", &self.error.is_some())
            .field("complete", &self.complete.is_some())
            .finish()
    }
}

impl<T> Observer<T> {
    pub fn with_next(mut self, next: impl FnMut(T) + 'static) -> Self {
        self.next = Some(Box::new(next));
        self
    }

    pub fn with_error(mut self, error: impl FnMut(SharedError) + 'static) -> Self {
        self.error = Some(Box::new(error));
        self
    }

    pub fn with_complete(mut self, complete: impl FnOnce() + 'static) -> Self {
        self.complete = Some(Box::new(complete));
        self
    }
}

struct SubscriptionState<T> {
    observer: RefCell<Option<Observer<T>>>,
    teardown: RefCell<Option<Teardown>>,
    closed: Cell<bool>,
}

impl<T> SubscriptionState<T> {
    fn close(&self) {
        self.closed.set(true);
        self.observer.borrow_mut().take();
        if let Some(teardown) = self.teardown.borrow_mut().take() {
            teardown();
        }
    }
}

/// The producer side of a subscription: what the subscriber function uses
/// to push values at the consumer.
pub struct SubscriptionObserver<T> {
    state: Rc<SubscriptionState<T>>,
}

impl<T> Clone for SubscriptionObserver<T> {
    fn clone(&self) -> Self {
        SubscriptionObserver {
            state: self.state.clone(),
        }
    }
}

impl<T> fmt::Debug for SubscriptionObserver<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionObserver")
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl<T> SubscriptionObserver<T> {
    /// Whether the subscription has terminated or been unsubscribed.
    pub fn is_closed(&self) -> bool {
        self.state.closed.get()
    }

    /// Deliver a value. Dropped silently once the subscription is closed.
    ///
    /// Delivery is not re-entrant per subscription: a `next` pushed from
    /// inside this subscription's own `next` callback is dropped.
    pub fn next(&self, value: T) {
        if self.is_closed() {
            return;
        }
        let taken = self.state.observer.borrow_mut().take();
        match taken {
            Some(mut observer) => {
                if let Some(next) = observer.next.as_mut() {
                    next(value);
                }
                if !self.is_closed() {
                    *self.state.observer.borrow_mut() = Some(observer);
                }
            }
            None => failfast_debug!("dropped a re-entrant emission"),
        }
    }

    /// Deliver an error and close the subscription.
    pub fn error(&self, error: SharedError) {
        if self.is_closed() {
            return;
        }
        let taken = self.state.observer.borrow_mut().take();
        if let Some(mut observer) = taken {
            if let Some(callback) = observer.error.as_mut() {
                callback(error);
            }
        }
        self.state.close();
    }

    /// Signal completion and close the subscription.
    pub fn complete(&self) {
        if self.is_closed() {
            return;
        }
        let taken = self.state.observer.borrow_mut().take();
        if let Some(observer) = taken {
            if let Some(callback) = observer.complete {
                callback();
            }
        }
        self.state.close();
    }
}

/// Handle on an active subscription.
pub struct Subscription {
    cancel: Rc<SubscriptionCancel>,
}

struct SubscriptionCancel {
    done: Cell<bool>,
    cancel: RefCell<Option<Box<dyn FnOnce()>>>,
}

impl Subscription {
    pub(crate) fn new(cancel: impl FnOnce() + 'static) -> Self {
        Subscription {
            cancel: Rc::new(SubscriptionCancel {
                done: Cell::new(false),
                cancel: RefCell::new(Some(Box::new(cancel))),
            }),
        }
    }

    /// Stop the subscription. Idempotent.
    pub fn unsubscribe(&self) {
        if self.cancel.done.get() {
            return;
        }
        self.cancel.done.set(true);
        if let Some(cancel) = self.cancel.cancel.borrow_mut().take() {
            cancel();
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("done", &self.cancel.done.get())
            .finish()
    }
}

/// A cold observable of `T`.
pub struct Observable<T> {
    subscriber: Rc<dyn Fn(SubscriptionObserver<T>) -> Teardown>,
}

impl<T> Clone for Observable<T> {
    fn clone(&self) -> Self {
        Observable {
            subscriber: self.subscriber.clone(),
        }
    }
}

impl<T> fmt::Debug for Observable<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observable").finish_non_exhaustive()
    }
}

impl<T: 'static> Observable<T> {
    /// Create an observable from a subscriber function. The function runs
    /// once per subscription and returns the teardown for that
    /// subscription.
    pub fn new(subscriber: impl Fn(SubscriptionObserver<T>) -> Teardown + 'static) -> Self {
        Observable {
            subscriber: Rc::new(subscriber),
        }
    }

    /// Start the observable with the given callbacks.
    pub fn subscribe(&self, observer: Observer<T>) -> Subscription {
        let state = Rc::new(SubscriptionState {
            observer: RefCell::new(Some(observer)),
            teardown: RefCell::new(None),
            closed: Cell::new(false),
        });

        let teardown = (self.subscriber)(SubscriptionObserver {
            state: state.clone(),
        });

        // The producer may have terminated synchronously; its teardown must
        // still run, and must run now.
        if state.closed.get() {
            teardown();
        } else {
            *state.teardown.borrow_mut() = Some(teardown);
        }

        Subscription::new(move || state.close())
    }

    /// Adapt this observable into a [`futures::Stream`] at the host
    /// boundary.
    ///
    /// Items arrive as `Ok`; an error arrives as a final `Err` item. The
    /// stream ends after either terminal event. Dropping the stream does not
    /// stop the producer; unsubscribe through the returned handle.
    pub fn into_stream(
        &self,
    ) -> (
        Subscription,
        mpsc::UnboundedReceiver<Result<T, SharedError>>,
    ) {
        let (sender, receiver) = mpsc::unbounded();
        let next_sender = sender.clone();
        let error_sender = sender.clone();
        let complete_sender = sender;

        let subscription = self.subscribe(
            Observer::default()
                .with_next(move |value| {
                    let _ = next_sender.unbounded_send(Ok(value));
                })
                .with_error(move |error| {
                    let _ = error_sender.unbounded_send(Err(error));
                    error_sender.close_channel();
                })
                .with_complete(move || complete_sender.close_channel()),
        );
        (subscription, receiver)
    }
}
