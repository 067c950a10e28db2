//! The normalized graph store.
//!
//! A content-addressed, field-level store of GraphQL entities with three
//! operations: [`write`](GraphStore::write), [`read`](GraphStore::read) and
//! [`watch`](GraphStore::watch). Writes are synchronous atomic transactions
//! producing a new snapshot and a journal of dirtied slots; watchers whose
//! read-plan intersects the journal re-read and emit before the write call
//! returns.

mod entity;
mod journal;
mod read;
mod write;

use std::cell::Cell;
use std::cell::RefCell;
use std::rc::Rc;

pub use entity::EntityId;
pub use read::Projection;
use typed_builder::TypedBuilder;

use crate::error::StoreError;
use crate::json_ext::Object;
use crate::json_ext::Path;
use crate::json_ext::Value;
use crate::observable::Observable;
use crate::observable::SubscriptionObserver;
use crate::spec::Fragments;
use crate::spec::Selection;
use entity::Snapshot;
use journal::ChangeJournal;
use journal::ReadPlan;
use read::read_with_plan;
use write::WriteTransaction;

/// The host identity hook: maps an object about to be written to a stable
/// entity id. `None` falls back to the path-derived id.
pub type DataIdFn = dyn Fn(&Object) -> Option<String>;

/// Parameters of [`GraphStore::write`].
#[derive(Clone, Debug, TypedBuilder)]
#[builder(field_defaults(setter(into)))]
pub struct WriteRequest {
    /// Root entity for the write.
    #[builder(default = EntityId::from("query"))]
    pub id: EntityId,

    /// The selection set describing the shape of `data`.
    pub selection_set: Rc<Vec<Selection>>,

    /// The variables in force for storage keys.
    #[builder(default)]
    pub variables: Object,

    /// Fragment definitions referenced by the selection set.
    #[builder(default)]
    pub fragments: Rc<Fragments>,

    /// The response data to normalize, keyed by response alias.
    pub data: Value,
}

/// Parameters of [`GraphStore::read`].
#[derive(Clone, Debug, TypedBuilder)]
#[builder(field_defaults(setter(into)))]
pub struct ReadRequest {
    /// Root entity to read from.
    pub id: EntityId,

    /// The selection set to satisfy.
    pub selection_set: Rc<Vec<Selection>>,

    /// The variables in force for storage keys.
    #[builder(default)]
    pub variables: Object,

    /// Fragment definitions referenced by the selection set.
    #[builder(default)]
    pub fragments: Rc<Fragments>,

    /// The projection from the caller's last read, used to detect identity
    /// divergence.
    #[builder(default)]
    pub previous: Option<Projection>,
}

/// Parameters of [`GraphStore::watch`].
#[derive(Clone, Debug, TypedBuilder)]
#[builder(field_defaults(setter(into)))]
pub struct WatchRequest {
    /// Root entity to watch.
    pub id: EntityId,

    /// The selection set to satisfy.
    pub selection_set: Rc<Vec<Selection>>,

    /// The variables in force for storage keys.
    #[builder(default)]
    pub variables: Object,

    /// Fragment definitions referenced by the selection set.
    #[builder(default)]
    pub fragments: Rc<Fragments>,

    /// When the first emission would equal this projection and not be
    /// stale, the emission is suppressed.
    #[builder(default)]
    pub initial_data: Option<Projection>,
}

/// What [`GraphStore::write`] returns.
#[derive(Clone, Debug)]
pub struct WriteResponse {
    /// The write-back projection: the written data reshaped to the
    /// selection, equal to what a read of the same selection now yields.
    pub data: Projection,
}

/// What [`GraphStore::read`] returns and [`GraphStore::watch`] emits.
#[derive(Clone, Debug, PartialEq)]
pub struct ReadResponse {
    /// The readable data for the selection.
    pub data: Projection,

    /// Whether the identity chain diverged somewhere and previously read
    /// values are being shown.
    pub stale: bool,
}

struct Watcher {
    id: u64,
    entity: EntityId,
    selection_set: Rc<Vec<Selection>>,
    variables: Object,
    fragments: Rc<Fragments>,
    plan: RefCell<ReadPlan>,
    previous: RefCell<Option<Projection>>,
    observer: SubscriptionObserver<ReadResponse>,
}

struct StoreInner {
    snapshot: RefCell<Snapshot>,
    watchers: RefCell<Vec<Rc<Watcher>>>,
    next_watcher_id: Cell<u64>,
    data_id: Option<Rc<DataIdFn>>,
}

/// The normalized graph store. Clones share the same graph.
#[derive(Clone)]
pub struct GraphStore {
    inner: Rc<StoreInner>,
}

impl Default for GraphStore {
    fn default() -> Self {
        GraphStore::new()
    }
}

impl std::fmt::Debug for GraphStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphStore")
            .field("entities", &self.inner.snapshot.borrow().len())
            .field("watchers", &self.inner.watchers.borrow().len())
            .finish()
    }
}

impl GraphStore {
    pub fn new() -> Self {
        GraphStore {
            inner: Rc::new(StoreInner {
                snapshot: RefCell::new(Snapshot::default()),
                watchers: RefCell::new(Vec::new()),
                next_watcher_id: Cell::new(0),
                data_id: None,
            }),
        }
    }

    /// A store consulting `data_id` for entity identity on every write.
    pub fn with_data_id(data_id: impl Fn(&Object) -> Option<String> + 'static) -> Self {
        GraphStore {
            inner: Rc::new(StoreInner {
                snapshot: RefCell::new(Snapshot::default()),
                watchers: RefCell::new(Vec::new()),
                next_watcher_id: Cell::new(0),
                data_id: Some(Rc::new(data_id)),
            }),
        }
    }

    /// Normalize `request.data` into the graph as one atomic transaction.
    ///
    /// Watchers intersecting the dirtied slots are notified synchronously,
    /// against the post-write snapshot, before this returns.
    pub fn write(&self, request: WriteRequest) -> Result<WriteResponse, StoreError> {
        let previous_snapshot = self.inner.snapshot.borrow().clone();
        let mut transaction = WriteTransaction::new(
            &previous_snapshot,
            &request.variables,
            &request.fragments,
            self.inner.data_id.as_deref(),
        );
        transaction.write_entity(
            &request.id,
            &request.selection_set,
            &request.data,
            &Path::empty(),
        )?;
        let (snapshot, journal) = transaction.commit();
        *self.inner.snapshot.borrow_mut() = snapshot.clone();
        tracing::trace!(
            entity = request.id.as_str(),
            dirtied = journal.slots(),
            entities = snapshot.len(),
            "committed write transaction"
        );

        let (read_back, _) = read_with_plan(
            &snapshot,
            &request.id,
            &request.selection_set,
            &request.variables,
            &request.fragments,
            None,
        );
        let data = read_back
            .expect("a committed write satisfies its own selection; qed")
            .data;

        self.dispatch(&snapshot, &journal);
        Ok(WriteResponse { data })
    }

    /// Read a selection from the current snapshot.
    pub fn read(&self, request: ReadRequest) -> Result<ReadResponse, StoreError> {
        let snapshot = self.inner.snapshot.borrow().clone();
        let (result, _) = read_with_plan(
            &snapshot,
            &request.id,
            &request.selection_set,
            &request.variables,
            &request.fragments,
            request.previous.as_ref(),
        );
        result
    }

    /// Watch a selection over the graph.
    ///
    /// Emits synchronously on subscribe with the current read result, then
    /// after every write whose journal intersects the slots the watcher
    /// last consumed. A partial read suppresses the emission instead of
    /// erroring; the data becomes observable again once a write completes
    /// it.
    pub fn watch(&self, request: WatchRequest) -> Observable<ReadResponse> {
        let store = self.clone();
        Observable::new(move |observer| {
            let id = store.inner.next_watcher_id.get();
            store.inner.next_watcher_id.set(id + 1);

            let watcher = Rc::new(Watcher {
                id,
                entity: request.id.clone(),
                selection_set: request.selection_set.clone(),
                variables: request.variables.clone(),
                fragments: request.fragments.clone(),
                plan: RefCell::new(ReadPlan::default()),
                previous: RefCell::new(request.initial_data.clone()),
                observer,
            });

            let snapshot = store.inner.snapshot.borrow().clone();
            let (result, plan) = read_with_plan(
                &snapshot,
                &watcher.entity,
                &watcher.selection_set,
                &watcher.variables,
                &watcher.fragments,
                request.initial_data.as_ref(),
            );
            *watcher.plan.borrow_mut() = plan;
            match result {
                Ok(response) => {
                    let suppress =
                        !response.stale && request.initial_data.as_ref() == Some(&response.data);
                    *watcher.previous.borrow_mut() = Some(response.data.clone());
                    if !suppress {
                        watcher.observer.next(response);
                    }
                }
                Err(error) if error.is_partial_read() => {
                    tracing::trace!(
                        entity = watcher.entity.as_str(),
                        %error,
                        "watch not yet readable"
                    );
                }
                Err(error) => {
                    watcher.observer.error(Rc::new(error));
                    return Box::new(|| {});
                }
            }

            store.inner.watchers.borrow_mut().push(watcher.clone());
            // Weak, so an abandoned watch cannot keep the store alive
            // through its own registration.
            let weak = Rc::downgrade(&store.inner);
            Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    inner.watchers.borrow_mut().retain(|w| w.id != id);
                }
            })
        })
    }

    fn dispatch(&self, snapshot: &Snapshot, journal: &ChangeJournal) {
        if journal.is_empty() {
            return;
        }
        // Iterate over a copy: an emission may re-enter the store and
        // register or remove watchers, or write again. This dispatch keeps
        // reading the snapshot it captured.
        let watchers: Vec<Rc<Watcher>> = self.inner.watchers.borrow().clone();
        for watcher in watchers {
            if watcher.observer.is_closed() {
                continue;
            }
            if !watcher.plan.borrow().intersects(journal) {
                continue;
            }
            let previous = watcher.previous.borrow().clone();
            let (result, plan) = read_with_plan(
                snapshot,
                &watcher.entity,
                &watcher.selection_set,
                &watcher.variables,
                &watcher.fragments,
                previous.as_ref(),
            );
            *watcher.plan.borrow_mut() = plan;
            match result {
                Ok(response) => {
                    *watcher.previous.borrow_mut() = Some(response.data.clone());
                    watcher.observer.next(response);
                }
                Err(error) if error.is_partial_read() => {
                    tracing::trace!(
                        entity = watcher.entity.as_str(),
                        %error,
                        "watch emission suppressed by partial read"
                    );
                }
                Err(error) => watcher.observer.error(Rc::new(error)),
            }
        }
    }
}
