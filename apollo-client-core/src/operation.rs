//! Observable GraphQL operations.
//!
//! [`ObservableOperation`] is hot: it is simultaneously an observable of
//! [`OperationState`] and a subscriber to the graph store. It owns at most
//! one executor subscription and at most one store watch at a time, and
//! multiplexes both into a single state stream for its own observers.

use std::cell::Cell;
use std::cell::RefCell;
use std::rc::Rc;

use derivative::Derivative;
use serde::Serialize;
use typed_builder::TypedBuilder;

use crate::error::OperationError;
use crate::graphql;
use crate::json_ext::Object;
use crate::observable::Observer;
use crate::observable::SharedError;
use crate::observable::Subscription;
use crate::scheduler::Scheduler;
use crate::spec::Fragments;
use crate::spec::Operation;
use crate::spec::OperationKind;
use crate::spec::Selection;
use crate::store::EntityId;
use crate::store::GraphStore;
use crate::store::Projection;
use crate::store::ReadRequest;
use crate::store::ReadResponse;
use crate::store::WatchRequest;
use crate::store::WriteRequest;

/// The reactive state of an observed operation.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationState {
    /// An execution is running and its first result has not arrived yet.
    pub loading: bool,

    /// An execution is running.
    pub executing: bool,

    /// The variables in force: those of the most recent execution, or the
    /// initial variables.
    pub variables: Object,

    /// The current data came straight from the executor's most recent
    /// emission.
    pub canonical: bool,

    /// The current data shows previously read values because the snapshot
    /// cannot satisfy the selection along a consistent identity chain.
    pub stale: bool,

    /// The errors of the most recent execution result.
    pub errors: Vec<graphql::Error>,

    /// The currently readable data, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Projection>,
}

impl OperationState {
    fn initial(variables: Object) -> Self {
        OperationState {
            loading: false,
            executing: false,
            variables,
            canonical: false,
            stale: false,
            errors: Vec::new(),
            data: None,
        }
    }
}

/// A partial state transition. Unset fields keep their current value.
#[derive(Debug, Default)]
struct StatePatch {
    loading: Option<bool>,
    executing: Option<bool>,
    variables: Option<Object>,
    canonical: Option<bool>,
    stale: Option<bool>,
    errors: Option<Vec<graphql::Error>>,
    data: Option<Option<Projection>>,
}

impl StatePatch {
    fn apply(self, state: &mut OperationState) -> bool {
        let mut changed = false;
        macro_rules! merge {
            ($field:ident) => {
                if let Some(value) = self.$field {
                    if state.$field != value {
                        state.$field = value;
                        changed = true;
                    }
                }
            };
        }
        merge!(loading);
        merge!(executing);
        merge!(variables);
        merge!(canonical);
        merge!(stale);
        merge!(errors);
        merge!(data);
        changed
    }
}

/// Construction parameters for [`ObservableOperation`].
#[derive(Clone, Derivative, TypedBuilder)]
#[derivative(Debug)]
#[builder(field_defaults(setter(into)))]
pub struct OperationOptions {
    /// The shared graph store.
    pub graph: GraphStore,

    /// The transport used to run the operation.
    #[derivative(Debug = "ignore")]
    pub executor: Rc<dyn graphql::Executor>,

    /// The turn queue used for deferred observer delivery.
    #[builder(default)]
    pub scheduler: Scheduler,

    /// The operation to observe.
    pub operation: Rc<Operation>,

    /// Fragment definitions referenced by the operation.
    #[builder(default)]
    pub fragments: Rc<Fragments>,

    /// The variables in force before the first execution.
    #[builder(default)]
    pub initial_variables: Object,
}

struct ObserverEntry {
    id: u64,
    observer: RefCell<Observer<OperationState>>,
    delivered: Cell<u64>,
    active: Cell<bool>,
}

struct Execution {
    id: u64,
    subscription: Option<Subscription>,
}

struct Inner {
    graph: GraphStore,
    executor: Rc<dyn graphql::Executor>,
    scheduler: Scheduler,
    operation: Rc<Operation>,
    fragments: Rc<Fragments>,
    selection_set: Rc<Vec<Selection>>,
    root_id: EntityId,
    state: RefCell<OperationState>,
    version: Cell<u64>,
    observers: RefCell<Vec<Rc<ObserverEntry>>>,
    next_observer_id: Cell<u64>,
    execution: RefCell<Option<Execution>>,
    next_execution_id: Cell<u64>,
    watch: RefCell<Option<Subscription>>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(watch) = self.watch.borrow_mut().take() {
            watch.unsubscribe();
        }
        let execution = self.execution.borrow_mut().take();
        if let Some(Execution {
            subscription: Some(subscription),
            ..
        }) = execution
        {
            subscription.unsubscribe();
        }
    }
}

/// A hot, observable GraphQL operation.
///
/// Clones share the same operation. The operation lives until the last
/// clone is dropped; dropping it stops the executor subscription and the
/// store watch.
#[derive(Clone)]
pub struct ObservableOperation {
    inner: Rc<Inner>,
}

impl std::fmt::Debug for ObservableOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObservableOperation")
            .field("root_id", &self.inner.root_id.as_str())
            .field("observers", &self.inner.observers.borrow().len())
            .field("executing", &self.inner.execution.borrow().is_some())
            .finish()
    }
}

impl ObservableOperation {
    /// Observe `options.operation` over `options.graph`.
    ///
    /// The store watch starts immediately, so out-of-band writes to the
    /// graph are visible before any execution.
    pub fn new(options: OperationOptions) -> Result<Self, OperationError> {
        if options.operation.kind == OperationKind::Mutation {
            return Err(OperationError::MutationNotObservable);
        }
        let root_id = EntityId::from(options.operation.kind.as_str());
        let selection_set = Rc::new(options.operation.selection_set.clone());

        let operation = ObservableOperation {
            inner: Rc::new(Inner {
                graph: options.graph,
                executor: options.executor,
                scheduler: options.scheduler,
                operation: options.operation,
                fragments: options.fragments,
                selection_set,
                root_id,
                state: RefCell::new(OperationState::initial(options.initial_variables)),
                version: Cell::new(1),
                observers: RefCell::new(Vec::new()),
                next_observer_id: Cell::new(0),
                execution: RefCell::new(None),
                next_execution_id: Cell::new(0),
                watch: RefCell::new(None),
            }),
        };
        operation.start_watch();
        Ok(operation)
    }

    /// The current state.
    pub fn state(&self) -> OperationState {
        self.inner.state.borrow().clone()
    }

    /// Register an observer. The current state is delivered asynchronously
    /// as a priming emission; later transitions follow, collapsed so each
    /// observer only sees the newest state per turn.
    pub fn subscribe(&self, observer: Observer<OperationState>) -> Subscription {
        let id = self.inner.next_observer_id.get();
        self.inner.next_observer_id.set(id + 1);
        let entry = Rc::new(ObserverEntry {
            id,
            observer: RefCell::new(observer),
            delivered: Cell::new(0),
            active: Cell::new(true),
        });
        self.inner.observers.borrow_mut().push(entry.clone());
        Inner::schedule_delivery(&self.inner, entry.clone(), self.inner.version.get());

        let weak = Rc::downgrade(&self.inner);
        Subscription::new(move || {
            entry.active.set(false);
            if let Some(inner) = weak.upgrade() {
                inner.observers.borrow_mut().retain(|e| e.id != id);
            }
        })
    }

    /// Run the operation through the executor.
    ///
    /// `variables` defaults to the current state's variables. Fails while
    /// another execution is in flight.
    pub fn execute(&self, variables: Option<Object>) -> Result<(), OperationError> {
        if self.inner.execution.borrow().is_some() {
            return Err(OperationError::ExecutionInFlight);
        }
        let variables =
            variables.unwrap_or_else(|| self.inner.state.borrow().variables.clone());
        self.run_executor(variables);
        Ok(())
    }

    /// Serve the operation from the graph when possible, falling back to
    /// [`execute`](ObservableOperation::execute) on a partial read. Fails
    /// while another execution is in flight.
    pub fn maybe_execute(&self, variables: Option<Object>) -> Result<(), OperationError> {
        if self.inner.execution.borrow().is_some() {
            return Err(OperationError::ExecutionInFlight);
        }
        let variables =
            variables.unwrap_or_else(|| self.inner.state.borrow().variables.clone());
        let previous = self.inner.state.borrow().data.clone();
        let read = self.inner.graph.read(
            ReadRequest::builder()
                .id(self.inner.root_id.clone())
                .selection_set(self.inner.selection_set.clone())
                .variables(variables.clone())
                .fragments(self.inner.fragments.clone())
                .previous(previous)
                .build(),
        );
        match read {
            Ok(response) => {
                self.stop_watch();
                Inner::update_state(
                    &self.inner,
                    StatePatch {
                        variables: Some(variables),
                        canonical: Some(false),
                        stale: Some(response.stale),
                        data: Some(Some(response.data)),
                        ..Default::default()
                    },
                );
                self.start_watch();
                Ok(())
            }
            Err(error) if error.is_partial_read() => self.execute(Some(variables)),
            Err(error) => Err(error.into()),
        }
    }

    /// Cancel the current execution, if any. The executor teardown is
    /// expected to cancel in-flight work. No graph write happens; a watch
    /// paused by an errored result stays paused.
    pub fn stop_executing(&self) {
        let execution = self.inner.execution.borrow_mut().take();
        if let Some(Execution {
            subscription: Some(subscription),
            ..
        }) = execution
        {
            subscription.unsubscribe();
        }
        Inner::update_state(
            &self.inner,
            StatePatch {
                loading: Some(false),
                executing: Some(false),
                ..Default::default()
            },
        );
    }

    fn run_executor(&self, variables: Object) {
        let execution_id = self.inner.next_execution_id.get();
        self.inner.next_execution_id.set(execution_id + 1);
        *self.inner.execution.borrow_mut() = Some(Execution {
            id: execution_id,
            subscription: None,
        });
        tracing::trace!(
            execution = execution_id,
            operation = self.inner.root_id.as_str(),
            "starting execution"
        );
        Inner::update_state(
            &self.inner,
            StatePatch {
                loading: Some(true),
                executing: Some(true),
                ..Default::default()
            },
        );

        let request = graphql::Request::builder()
            .operation(self.inner.operation.clone())
            .fragments(self.inner.fragments.clone())
            .variables(variables.clone())
            .build();

        let on_next = {
            let weak = Rc::downgrade(&self.inner);
            let variables = variables.clone();
            move |result: graphql::Response| {
                if let Some(inner) = weak.upgrade() {
                    ObservableOperation { inner }.on_executor_result(result, &variables);
                }
            }
        };
        let on_error = {
            let weak = Rc::downgrade(&self.inner);
            move |error: SharedError| {
                if let Some(inner) = weak.upgrade() {
                    Inner::deliver_error(&inner, error);
                }
            }
        };
        let on_complete = {
            let weak = Rc::downgrade(&self.inner);
            move || {
                if let Some(inner) = weak.upgrade() {
                    ObservableOperation { inner }.on_executor_complete(execution_id);
                }
            }
        };

        let subscription = self.inner.executor.execute(request).subscribe(
            Observer::default()
                .with_next(on_next)
                .with_error(on_error)
                .with_complete(on_complete),
        );

        let mut slot = self.inner.execution.borrow_mut();
        match slot.as_mut() {
            Some(execution) if execution.id == execution_id => {
                execution.subscription = Some(subscription);
            }
            // The executor terminated synchronously; the subscription is
            // already closed.
            _ => drop(subscription),
        }
    }

    fn on_executor_result(&self, result: graphql::Response, variables: &Object) {
        self.stop_watch();
        if result.errors.is_empty() {
            let written = self.inner.graph.write(
                WriteRequest::builder()
                    .id(self.inner.root_id.clone())
                    .selection_set(self.inner.selection_set.clone())
                    .variables(variables.clone())
                    .fragments(self.inner.fragments.clone())
                    .data(result.data)
                    .build(),
            );
            match written {
                Ok(written) => {
                    Inner::update_state(
                        &self.inner,
                        StatePatch {
                            loading: Some(false),
                            variables: Some(variables.clone()),
                            canonical: Some(true),
                            stale: Some(false),
                            errors: Some(Vec::new()),
                            data: Some(Some(written.data)),
                            ..Default::default()
                        },
                    );
                    self.start_watch();
                }
                Err(error) => {
                    failfast_error!("could not write executor result: {}", error);
                    Inner::deliver_error(&self.inner, Rc::new(OperationError::from(error)));
                }
            }
        } else {
            // Data carrying errors is quarantined: it is surfaced but not
            // written, and the watch stays down until a clean result.
            Inner::update_state(
                &self.inner,
                StatePatch {
                    loading: Some(false),
                    variables: Some(variables.clone()),
                    canonical: Some(true),
                    stale: Some(false),
                    errors: Some(result.errors),
                    data: Some(Some(Projection::from_raw(result.data))),
                    ..Default::default()
                },
            );
        }
    }

    fn on_executor_complete(&self, execution_id: u64) {
        {
            let mut slot = self.inner.execution.borrow_mut();
            if slot.as_ref().is_some_and(|execution| execution.id == execution_id) {
                *slot = None;
            } else {
                failfast_debug!(
                    "received a completion for a superseded execution ({})",
                    execution_id
                );
            }
        }
        Inner::update_state(
            &self.inner,
            StatePatch {
                loading: Some(false),
                executing: Some(false),
                ..Default::default()
            },
        );
    }

    fn start_watch(&self) {
        assert!(
            self.inner.watch.borrow().is_none(),
            "a graph watch is already active; stop it before starting another",
        );
        let (variables, initial_data) = {
            let state = self.inner.state.borrow();
            (state.variables.clone(), state.data.clone())
        };

        let on_next = {
            let weak = Rc::downgrade(&self.inner);
            let expected_variables = variables.clone();
            move |response: ReadResponse| {
                let Some(inner) = weak.upgrade() else { return };
                if inner.state.borrow().variables != expected_variables {
                    panic!(
                        "the graph watch observed a variables change; \
                        variables changes must stop the watch first",
                    );
                }
                Inner::update_state(
                    &inner,
                    StatePatch {
                        canonical: Some(false),
                        stale: Some(response.stale),
                        data: Some(Some(response.data)),
                        ..Default::default()
                    },
                );
            }
        };
        let on_error = {
            let weak = Rc::downgrade(&self.inner);
            move |error: SharedError| {
                if let Some(inner) = weak.upgrade() {
                    Inner::deliver_error(&inner, error);
                }
            }
        };

        let subscription = self
            .inner
            .graph
            .watch(
                WatchRequest::builder()
                    .id(self.inner.root_id.clone())
                    .selection_set(self.inner.selection_set.clone())
                    .variables(variables)
                    .fragments(self.inner.fragments.clone())
                    .initial_data(initial_data)
                    .build(),
            )
            .subscribe(Observer::default().with_next(on_next).with_error(on_error));
        *self.inner.watch.borrow_mut() = Some(subscription);
    }

    fn stop_watch(&self) {
        let watch = self.inner.watch.borrow_mut().take();
        if let Some(watch) = watch {
            watch.unsubscribe();
        }
    }
}

impl Inner {
    /// The single merge point for state transitions. A patch that changes
    /// nothing schedules nothing; otherwise each observer gets a deferred,
    /// version-stamped delivery that is dropped when a newer state
    /// supersedes it before the turn runs.
    fn update_state(inner: &Rc<Inner>, patch: StatePatch) {
        let changed = patch.apply(&mut inner.state.borrow_mut());
        if !changed {
            return;
        }
        let version = inner.version.get() + 1;
        inner.version.set(version);
        tracing::trace!(version, "operation state transition");
        let observers = inner.observers.borrow().clone();
        for entry in observers {
            Self::schedule_delivery(inner, entry, version);
        }
    }

    fn schedule_delivery(inner: &Rc<Inner>, entry: Rc<ObserverEntry>, version: u64) {
        let weak = Rc::downgrade(inner);
        inner.scheduler.defer(move || {
            let Some(inner) = weak.upgrade() else { return };
            if !entry.active.get() {
                return;
            }
            // Superseded: the newer state's own delivery covers this
            // observer.
            if inner.version.get() != version || entry.delivered.get() >= version {
                return;
            }
            entry.delivered.set(version);
            let state = inner.state.borrow().clone();
            let mut observer = entry.observer.borrow_mut();
            if let Some(next) = observer.next.as_mut() {
                next(state);
            }
        });
    }

    fn deliver_error(inner: &Rc<Inner>, error: SharedError) {
        let observers = inner.observers.borrow().clone();
        for entry in observers {
            let error = error.clone();
            inner.scheduler.defer(move || {
                if !entry.active.get() {
                    return;
                }
                let mut observer = entry.observer.borrow_mut();
                if let Some(callback) = observer.error.as_mut() {
                    callback(error);
                }
            });
        }
    }
}
