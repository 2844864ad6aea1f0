use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{debug, instrument, warn};

use taskdeck_core::backend::{Filter, TaskTable};
use taskdeck_core::errors::BackendError;
use taskdeck_core::ids::{TaskId, UserId};
use taskdeck_core::tasks::{NewTask, Task, TaskPatch, TaskStatus};

/// What a task operation did to the local list.
#[derive(Clone, Debug, PartialEq)]
pub enum SyncOutcome {
    /// The backend call succeeded and its result was applied.
    Applied,
    /// The update matched no row. Local state is unchanged.
    NotFound,
    /// A newer response was applied first; this one was discarded.
    Superseded,
    /// The backend call failed. Local state is unchanged.
    Failed(BackendError),
}

impl SyncOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied)
    }
}

#[derive(Clone, Copy, Debug)]
struct Touch {
    /// Ticket of the patch or delete that was confirmed.
    ticket: u64,
    /// Last ticket issued when the confirmation was applied.
    applied: u64,
    deleted: bool,
}

/// Ordering bookkeeping. Every operation takes a ticket when it starts.
///
/// Loads are ordered against loads only. Patches and deletes of one task are
/// ordered against each other, and a load never overrides a patch or delete
/// confirmed after that load was issued. A confirmed delete always removes
/// the task, since ids are never reused.
#[derive(Default)]
struct Tickets {
    next: u64,
    /// Ticket of the last applied full load (or clear).
    load_applied: u64,
    /// Tickets of operations still waiting on the backend.
    in_flight: BTreeSet<u64>,
    /// Confirmed patches and deletes that an in-flight call may still race.
    touched: HashMap<TaskId, Touch>,
}

impl Tickets {
    fn issue(&mut self) -> u64 {
        self.next += 1;
        self.in_flight.insert(self.next);
        self.next
    }

    fn settle(&mut self, ticket: u64) {
        self.in_flight.remove(&ticket);
        let oldest = self.in_flight.first().copied().unwrap_or(u64::MAX);
        self.touched.retain(|_, t| t.applied >= oldest);
    }

    fn touch(&self, id: TaskId) -> Option<Touch> {
        self.touched.get(&id).copied()
    }

    fn record(&mut self, id: TaskId, ticket: u64, deleted: bool) {
        let applied = self.next;
        self.touched.insert(id, Touch { ticket, applied, deleted });
    }
}

/// Takes a ticket and settles it when dropped, so failed or cancelled calls
/// leave no trace in the bookkeeping.
struct InFlight<'a> {
    tickets: &'a Mutex<Tickets>,
    ticket: u64,
}

impl<'a> InFlight<'a> {
    fn start(tickets: &'a Mutex<Tickets>) -> Self {
        let ticket = tickets.lock().issue();
        Self { tickets, ticket }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.tickets.lock().settle(self.ticket);
    }
}

/// Local mirror of the signed-in user's tasks.
///
/// Operations never return errors: each reports a [`SyncOutcome`] and logs
/// failures. The list changes only after a backend call completes, and a
/// response that arrives after a newer one for the same data is dropped.
pub struct TaskStore {
    table: Arc<dyn TaskTable>,
    state: watch::Sender<Vec<Task>>,
    tickets: Mutex<Tickets>,
}

impl TaskStore {
    pub fn new(table: Arc<dyn TaskTable>) -> Self {
        let (state, _) = watch::channel(Vec::new());
        Self {
            table,
            state,
            tickets: Mutex::new(Tickets::default()),
        }
    }

    /// Snapshot of the local list, in backend order.
    pub fn tasks(&self) -> Vec<Task> {
        self.state.borrow().clone()
    }

    pub fn get(&self, id: TaskId) -> Option<Task> {
        self.state.borrow().iter().find(|t| t.id == id).cloned()
    }

    pub fn subscribe(&self) -> watch::Receiver<Vec<Task>> {
        self.state.subscribe()
    }

    /// Empty the list. Loads already in flight are discarded.
    pub fn clear(&self) {
        let mut tickets = self.tickets.lock();
        let ticket = tickets.next + 1;
        tickets.next = ticket;
        tickets.load_applied = ticket;
        self.state.send_replace(Vec::new());
    }

    /// Replace the local list with every row owned by `user_id`.
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub async fn load_all_for_user(&self, user_id: &UserId) -> SyncOutcome {
        let call = InFlight::start(&self.tickets);
        match self.table.select(&Filter::user_id(user_id)).await {
            Ok(rows) => self.apply_load(call.ticket, rows),
            Err(e) => {
                warn!(error = %e, error_kind = e.error_kind(), "failed to load tasks");
                SyncOutcome::Failed(e)
            }
        }
    }

    fn apply_load(&self, ticket: u64, rows: Vec<Task>) -> SyncOutcome {
        let mut tickets = self.tickets.lock();
        if ticket <= tickets.load_applied {
            debug!(ticket, "discarding stale task list");
            return SyncOutcome::Superseded;
        }

        let local = self.state.borrow().clone();
        let merged: Vec<Task> = rows
            .into_iter()
            .filter_map(|row| match tickets.touch(row.id) {
                Some(touch) if touch.deleted => None,
                // Confirmed after this load was issued; the row may predate it.
                Some(touch) if touch.applied >= ticket => {
                    let id = row.id;
                    Some(local.iter().find(|t| t.id == id).cloned().unwrap_or(row))
                }
                _ => Some(row),
            })
            .collect();

        debug!(count = merged.len(), "task list replaced");
        tickets.load_applied = ticket;
        self.state.send_replace(merged);
        SyncOutcome::Applied
    }

    /// Insert a task, then reload the owner's whole list rather than
    /// appending the inserted row.
    #[instrument(skip(self, task), fields(user_id = %task.user_id))]
    pub async fn create(&self, task: NewTask) -> SyncOutcome {
        if let Err(e) = self.table.insert(std::slice::from_ref(&task)).await {
            warn!(error = %e, error_kind = e.error_kind(), "failed to create task");
            return SyncOutcome::Failed(e);
        }
        self.load_all_for_user(&task.user_id).await
    }

    /// Partially update one task and merge the returned row into the local
    /// entry. Zero matched rows leaves the list alone.
    #[instrument(skip(self, patch), fields(task_id = %task_id))]
    pub async fn update(&self, task_id: TaskId, patch: &TaskPatch) -> SyncOutcome {
        let call = InFlight::start(&self.tickets);
        let rows = match self.table.update(patch, &Filter::id(task_id)).await {
            Ok(rows) => rows,
            Err(e) => {
                warn!(error = %e, error_kind = e.error_kind(), "failed to update task");
                return SyncOutcome::Failed(e);
            }
        };
        let Some(row) = rows.into_iter().next() else {
            debug!("update matched no rows");
            return SyncOutcome::NotFound;
        };

        let mut tickets = self.tickets.lock();
        if let Some(touch) = tickets.touch(task_id) {
            if touch.deleted || touch.ticket > call.ticket {
                debug!(ticket = call.ticket, "discarding stale task update");
                return SyncOutcome::Superseded;
            }
        }
        tickets.record(task_id, call.ticket, false);
        self.state.send_if_modified(|tasks| {
            match tasks.iter_mut().find(|t| t.id == task_id) {
                Some(local) => {
                    local.merge(row);
                    true
                }
                None => false,
            }
        });
        SyncOutcome::Applied
    }

    pub async fn mark_complete(&self, task_id: TaskId) -> SyncOutcome {
        self.update(task_id, &TaskPatch::status(TaskStatus::Complete)).await
    }

    pub async fn mark_incomplete(&self, task_id: TaskId) -> SyncOutcome {
        self.update(task_id, &TaskPatch::status(TaskStatus::Incomplete)).await
    }

    /// Delete one task. Deleting a task that is already gone succeeds.
    #[instrument(skip(self), fields(task_id = %task_id))]
    pub async fn delete(&self, task_id: TaskId) -> SyncOutcome {
        let call = InFlight::start(&self.tickets);
        if let Err(e) = self.table.delete(&Filter::id(task_id)).await {
            warn!(error = %e, error_kind = e.error_kind(), "failed to delete task");
            return SyncOutcome::Failed(e);
        }

        let mut tickets = self.tickets.lock();
        let ticket = tickets.touch(task_id).map_or(call.ticket, |t| t.ticket.max(call.ticket));
        tickets.record(task_id, ticket, true);
        self.state.send_if_modified(|tasks| {
            let before = tasks.len();
            tasks.retain(|t| t.id != task_id);
            tasks.len() != before
        });
        SyncOutcome::Applied
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::NaiveDate;
    use taskdeck_remote::{MockBackend, MockOp};

    /// Table whose reads always return the same snapshot while writes take
    /// `write_delay` to be confirmed, as when the server answers a select
    /// before applying an earlier write.
    struct SnapshotTable {
        snapshot: Vec<Task>,
        read_delay: Duration,
        write_delay: Duration,
    }

    #[async_trait]
    impl TaskTable for SnapshotTable {
        async fn select(&self, _filter: &Filter) -> Result<Vec<Task>, BackendError> {
            tokio::time::sleep(self.read_delay).await;
            Ok(self.snapshot.clone())
        }

        async fn insert(&self, _rows: &[NewTask]) -> Result<Vec<Task>, BackendError> {
            Ok(Vec::new())
        }

        async fn update(&self, patch: &TaskPatch, filter: &Filter) -> Result<Vec<Task>, BackendError> {
            tokio::time::sleep(self.write_delay).await;
            Ok(self
                .snapshot
                .iter()
                .filter(|t| filter.matches(t))
                .cloned()
                .map(|mut t| {
                    if let Some(name) = &patch.name {
                        t.name = name.clone();
                    }
                    if let Some(status) = patch.status {
                        t.status = status;
                    }
                    t
                })
                .collect())
        }

        async fn delete(&self, _filter: &Filter) -> Result<(), BackendError> {
            tokio::time::sleep(self.write_delay).await;
            Ok(())
        }
    }

    fn snapshot_store(read_delay: Duration) -> TaskStore {
        let row = Task {
            id: TaskId::new(1),
            name: "A".into(),
            status: TaskStatus::Incomplete,
            user_id: ana(),
            due_date: None,
            extra: Default::default(),
        };
        TaskStore::new(Arc::new(SnapshotTable {
            snapshot: vec![row],
            read_delay,
            write_delay: Duration::from_secs(5),
        }))
    }

    fn ana() -> UserId {
        UserId::from_raw("u1")
    }

    fn jan1() -> Option<NaiveDate> {
        NaiveDate::from_ymd_opt(2024, 1, 1)
    }

    fn setup() -> (Arc<MockBackend>, TaskStore) {
        let backend = Arc::new(MockBackend::new());
        let store = TaskStore::new(backend.clone());
        (backend, store)
    }

    fn names(store: &TaskStore) -> Vec<String> {
        store.tasks().into_iter().map(|t| t.name).collect()
    }

    async fn wait_for_call(backend: &MockBackend, op: MockOp, count: usize) {
        while backend.calls(op) < count {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn load_replaces_whole_list() {
        let (backend, store) = setup();
        backend.seed_task(&ana(), "A", TaskStatus::Incomplete, jan1());
        backend.seed_task(&UserId::from_raw("u2"), "other", TaskStatus::Incomplete, None);

        assert_eq!(store.load_all_for_user(&ana()).await, SyncOutcome::Applied);
        assert_eq!(names(&store), vec!["A"]);

        backend.seed_task(&ana(), "B", TaskStatus::Complete, None);
        store.load_all_for_user(&ana()).await;
        assert_eq!(names(&store), vec!["A", "B"]);
    }

    #[tokio::test]
    async fn load_failure_keeps_list() {
        let (backend, store) = setup();
        backend.seed_task(&ana(), "A", TaskStatus::Incomplete, None);
        store.load_all_for_user(&ana()).await;

        backend.fail_next(MockOp::Select, BackendError::Network("offline".into()));
        let outcome = store.load_all_for_user(&ana()).await;
        assert_eq!(outcome, SyncOutcome::Failed(BackendError::Network("offline".into())));
        assert_eq!(names(&store), vec!["A"]);
    }

    #[tokio::test]
    async fn create_reloads_instead_of_appending() {
        let (backend, store) = setup();
        backend.seed_task(&ana(), "A", TaskStatus::Incomplete, None);

        // Local list is empty; a naive append would leave only "B".
        let outcome = store.create(NewTask::new("B", ana(), jan1())).await;
        assert_eq!(outcome, SyncOutcome::Applied);
        assert_eq!(names(&store), vec!["A", "B"]);

        let b = store.get(TaskId::new(2)).unwrap();
        assert_eq!(b.due_date, jan1());
        assert_eq!(b.status, TaskStatus::Incomplete);
        assert_eq!(backend.calls(MockOp::Select), 1);
    }

    #[tokio::test]
    async fn created_tasks_converge_with_backend() {
        let (backend, store) = setup();
        for name in ["one", "two", "three"] {
            store.create(NewTask::new(name, ana(), None)).await;
        }
        let backend_rows: Vec<Task> = backend
            .rows()
            .into_iter()
            .filter(|t| t.user_id == ana())
            .collect();
        assert_eq!(store.tasks(), backend_rows);
    }

    #[tokio::test]
    async fn create_failure_skips_reload() {
        let (backend, store) = setup();
        backend.fail_next(MockOp::Insert, BackendError::Unauthorized("jwt expired".into()));

        let outcome = store.create(NewTask::new("B", ana(), None)).await;
        assert!(matches!(outcome, SyncOutcome::Failed(BackendError::Unauthorized(_))));
        assert_eq!(backend.calls(MockOp::Select), 0);
        assert!(store.tasks().is_empty());
    }

    #[tokio::test]
    async fn mark_complete_merges_returned_row() {
        let (backend, store) = setup();
        let a = backend.seed_task(&ana(), "A", TaskStatus::Incomplete, None);
        store.load_all_for_user(&ana()).await;

        assert_eq!(store.mark_complete(a.id).await, SyncOutcome::Applied);
        let tasks = store.tasks();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].id, a.id);
        assert_eq!(tasks[0].name, "A");
        assert_eq!(tasks[0].status, TaskStatus::Complete);
        assert!(tasks[0].extra.contains_key("created_at"));

        assert_eq!(store.mark_incomplete(a.id).await, SyncOutcome::Applied);
        assert!(!store.get(a.id).unwrap().is_complete());
    }

    #[tokio::test]
    async fn update_with_no_match_changes_nothing() {
        let (backend, store) = setup();
        backend.seed_task(&ana(), "A", TaskStatus::Incomplete, None);
        store.load_all_for_user(&ana()).await;
        let before = store.tasks();

        let outcome = store
            .update(TaskId::new(99), &TaskPatch::default().with_name("ghost"))
            .await;
        assert_eq!(outcome, SyncOutcome::NotFound);
        assert_eq!(store.tasks(), before);
    }

    #[tokio::test]
    async fn update_failure_changes_nothing() {
        let (backend, store) = setup();
        let a = backend.seed_task(&ana(), "A", TaskStatus::Incomplete, None);
        store.load_all_for_user(&ana()).await;

        backend.fail_next(MockOp::Update, BackendError::ServerError { status: 503, body: "down".into() });
        let outcome = store.mark_complete(a.id).await;
        assert!(matches!(outcome, SyncOutcome::Failed(BackendError::ServerError { .. })));
        assert_eq!(store.get(a.id).unwrap().status, TaskStatus::Incomplete);
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let (backend, store) = setup();
        let a = backend.seed_task(&ana(), "A", TaskStatus::Incomplete, None);
        backend.seed_task(&ana(), "B", TaskStatus::Incomplete, None);
        store.load_all_for_user(&ana()).await;

        assert_eq!(store.delete(a.id).await, SyncOutcome::Applied);
        assert_eq!(store.delete(a.id).await, SyncOutcome::Applied);
        assert_eq!(names(&store), vec!["B"]);
        assert_eq!(backend.rows().len(), 1);
    }

    #[tokio::test]
    async fn delete_failure_keeps_task() {
        let (backend, store) = setup();
        let a = backend.seed_task(&ana(), "A", TaskStatus::Incomplete, None);
        store.load_all_for_user(&ana()).await;

        backend.fail_next(MockOp::Delete, BackendError::Network("offline".into()));
        assert!(matches!(store.delete(a.id).await, SyncOutcome::Failed(_)));
        assert!(store.get(a.id).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn slow_load_does_not_overwrite_newer_load() {
        let (backend, store) = setup();
        backend.seed_task(&ana(), "A", TaskStatus::Incomplete, None);
        backend.delay_next(MockOp::Select, Duration::from_secs(5));

        let user = ana();

        let (slow, fast) = tokio::join!(store.load_all_for_user(&user), async {
            wait_for_call(&backend, MockOp::Select, 1).await;
            backend.seed_task(&user, "B", TaskStatus::Incomplete, None);
            store.load_all_for_user(&user).await
        });
        assert_eq!(fast, SyncOutcome::Applied);
        assert_eq!(slow, SyncOutcome::Superseded);
        assert_eq!(names(&store), vec!["A", "B"]);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_update_does_not_overwrite_newer_update() {
        let (backend, store) = setup();
        let a = backend.seed_task(&ana(), "A", TaskStatus::Incomplete, None);
        store.load_all_for_user(&ana()).await;
        backend.delay_next(MockOp::Update, Duration::from_secs(5));

        let first = TaskPatch::default().with_name("first");
        let second = TaskPatch::default().with_name("second");

        let (slow, fast) = tokio::join!(store.update(a.id, &first), async {
            wait_for_call(&backend, MockOp::Update, 1).await;
            store.update(a.id, &second).await
        });
        assert_eq!(fast, SyncOutcome::Applied);
        assert_eq!(slow, SyncOutcome::Superseded);
        assert_eq!(store.get(a.id).unwrap().name, "second");
    }

    #[tokio::test(start_paused = true)]
    async fn slow_load_does_not_resurrect_deleted_task() {
        let (backend, store) = setup();
        backend.seed_task(&ana(), "A", TaskStatus::Incomplete, None);
        let b = backend.seed_task(&ana(), "B", TaskStatus::Incomplete, None);
        store.load_all_for_user(&ana()).await;
        backend.delay_next(MockOp::Select, Duration::from_secs(5));

        let user = ana();

        let (load, delete) = tokio::join!(store.load_all_for_user(&user), async {
            wait_for_call(&backend, MockOp::Select, 2).await;
            store.delete(b.id).await
        });
        assert_eq!(delete, SyncOutcome::Applied);
        assert_eq!(load, SyncOutcome::Applied);
        assert_eq!(names(&store), vec!["A"]);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_load_keeps_newer_local_patch() {
        let (backend, store) = setup();
        let a = backend.seed_task(&ana(), "A", TaskStatus::Incomplete, None);
        store.load_all_for_user(&ana()).await;
        backend.delay_next(MockOp::Select, Duration::from_secs(5));

        let user = ana();

        let (load, patch) = tokio::join!(store.load_all_for_user(&user), async {
            wait_for_call(&backend, MockOp::Select, 2).await;
            store.mark_complete(a.id).await
        });
        assert_eq!(patch, SyncOutcome::Applied);
        assert_eq!(load, SyncOutcome::Applied);
        assert!(store.get(a.id).unwrap().is_complete());
    }

    #[tokio::test(start_paused = true)]
    async fn confirmed_delete_wins_over_earlier_snapshot() {
        let store = snapshot_store(Duration::ZERO);
        let user = ana();

        let (delete, load) = tokio::join!(store.delete(TaskId::new(1)), store.load_all_for_user(&user));
        assert_eq!(load, SyncOutcome::Applied);
        assert_eq!(delete, SyncOutcome::Applied);
        assert!(store.get(TaskId::new(1)).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn snapshot_arriving_after_delete_does_not_resurrect() {
        let store = snapshot_store(Duration::from_secs(6));
        let user = ana();

        let (delete, load) = tokio::join!(store.delete(TaskId::new(1)), store.load_all_for_user(&user));
        assert_eq!(delete, SyncOutcome::Applied);
        assert_eq!(load, SyncOutcome::Applied);
        assert!(store.tasks().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn confirmed_update_wins_over_earlier_snapshot() {
        let store = snapshot_store(Duration::ZERO);
        let user = ana();
        store.load_all_for_user(&user).await;

        let (update, load) = tokio::join!(
            store.mark_complete(TaskId::new(1)),
            store.load_all_for_user(&user)
        );
        assert_eq!(load, SyncOutcome::Applied);
        assert_eq!(update, SyncOutcome::Applied);
        assert!(store.get(TaskId::new(1)).unwrap().is_complete());
    }

    #[tokio::test(start_paused = true)]
    async fn settled_calls_leave_no_bookkeeping() {
        let (backend, store) = setup();
        let a = backend.seed_task(&ana(), "A", TaskStatus::Incomplete, None);
        let b = backend.seed_task(&ana(), "B", TaskStatus::Incomplete, None);
        store.load_all_for_user(&ana()).await;
        backend.delay_next(MockOp::Update, Duration::from_secs(5));

        let user = ana();
        let (update, delete, load) = tokio::join!(
            store.mark_complete(a.id),
            store.delete(b.id),
            store.load_all_for_user(&user)
        );
        assert_eq!(update, SyncOutcome::Applied);
        assert_eq!(delete, SyncOutcome::Applied);
        assert_eq!(load, SyncOutcome::Applied);
        assert_eq!(names(&store), vec!["A"]);
        assert!(store.get(a.id).unwrap().is_complete());

        let tickets = store.tickets.lock();
        assert!(tickets.in_flight.is_empty());
        assert!(tickets.touched.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn clear_discards_in_flight_load() {
        let (backend, store) = setup();
        backend.seed_task(&ana(), "A", TaskStatus::Incomplete, None);
        backend.delay_next(MockOp::Select, Duration::from_secs(5));

        let user = ana();

        let (load, ()) = tokio::join!(store.load_all_for_user(&user), async {
            wait_for_call(&backend, MockOp::Select, 1).await;
            store.clear();
        });
        assert_eq!(load, SyncOutcome::Superseded);
        assert!(store.tasks().is_empty());
    }

    #[tokio::test]
    async fn subscribers_see_new_lists() {
        let (backend, store) = setup();
        backend.seed_task(&ana(), "A", TaskStatus::Incomplete, None);
        let mut rx = store.subscribe();

        store.load_all_for_user(&ana()).await;
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow_and_update().len(), 1);

        store.clear();
        rx.changed().await.unwrap();
        assert!(rx.borrow_and_update().is_empty());
    }
}
