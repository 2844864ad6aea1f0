use std::collections::{BTreeMap, HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use parking_lot::Mutex;
use secrecy::ExposeSecret;

use taskdeck_core::backend::{AuthApi, Filter, TaskTable};
use taskdeck_core::errors::BackendError;
use taskdeck_core::identity::Identity;
use taskdeck_core::ids::{TaskId, UserId};
use taskdeck_core::security::Credentials;
use taskdeck_core::tasks::{NewTask, Task, TaskPatch, TaskStatus};

/// Backend call kinds, for scripting failures and delays.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub enum MockOp {
    GetUser,
    SignIn,
    SignUp,
    SignOut,
    Select,
    Insert,
    Update,
    Delete,
}

struct Account {
    password: String,
    identity: Identity,
}

#[derive(Default)]
struct MockState {
    /// Keyed by email.
    accounts: HashMap<String, Account>,
    session: Option<Identity>,
    rows: BTreeMap<TaskId, Task>,
    next_id: i64,
    failures: HashMap<MockOp, VecDeque<BackendError>>,
    delays: HashMap<MockOp, VecDeque<Duration>>,
    calls: HashMap<MockOp, usize>,
}

impl MockState {
    /// Record a call and pop whatever was scripted for it.
    fn begin(&mut self, op: MockOp) -> (Option<BackendError>, Option<Duration>) {
        *self.calls.entry(op).or_default() += 1;
        let failure = self.failures.get_mut(&op).and_then(VecDeque::pop_front);
        let delay = self.delays.get_mut(&op).and_then(VecDeque::pop_front);
        (failure, delay)
    }

    fn assign_id(&mut self) -> TaskId {
        self.next_id += 1;
        TaskId::new(self.next_id)
    }

    fn store_row(&mut self, row: &NewTask) -> Task {
        let id = self.assign_id();
        let mut extra = serde_json::Map::new();
        extra.insert(
            "created_at".into(),
            serde_json::Value::String(Utc::now().to_rfc3339()),
        );
        let task = Task {
            id,
            name: row.name.clone(),
            status: row.status,
            user_id: row.user_id.clone(),
            due_date: row.due_date,
            extra,
        };
        self.rows.insert(id, task.clone());
        task
    }
}

/// In-memory stand-in for the hosted backend.
///
/// Mutations take effect when the call is made; a scripted delay only holds
/// back the response. This lets tests reorder responses the way a slow
/// network would.
#[derive(Default)]
pub struct MockBackend {
    state: Mutex<MockState>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an account that can sign in with `password`.
    pub fn add_account(&self, id: &str, email: &str, password: &str) -> Identity {
        let identity = Identity::new(UserId::from_raw(id), email);
        self.state.lock().accounts.insert(
            email.to_string(),
            Account {
                password: password.to_string(),
                identity: identity.clone(),
            },
        );
        identity
    }

    /// Start a backend session for an existing identity without a sign-in call.
    pub fn sign_in_as(&self, identity: &Identity) {
        self.state.lock().session = Some(identity.clone());
    }

    /// End the backend session server-side, as if the token expired.
    pub fn expire_session(&self) {
        self.state.lock().session = None;
    }

    pub fn seed_task(
        &self,
        user_id: &UserId,
        name: &str,
        status: TaskStatus,
        due_date: Option<NaiveDate>,
    ) -> Task {
        let mut row = NewTask::new(name, user_id.clone(), due_date);
        row.status = status;
        self.state.lock().store_row(&row)
    }

    /// Snapshot of the table, ordered by id.
    pub fn rows(&self) -> Vec<Task> {
        self.state.lock().rows.values().cloned().collect()
    }

    /// Fail the next call of `op` with `error`. Queued per operation.
    pub fn fail_next(&self, op: MockOp, error: BackendError) {
        self.state
            .lock()
            .failures
            .entry(op)
            .or_default()
            .push_back(error);
    }

    /// Hold back the response of the next call of `op` by `delay`.
    pub fn delay_next(&self, op: MockOp, delay: Duration) {
        self.state
            .lock()
            .delays
            .entry(op)
            .or_default()
            .push_back(delay);
    }

    pub fn calls(&self, op: MockOp) -> usize {
        self.state.lock().calls.get(&op).copied().unwrap_or(0)
    }

    async fn respond<T>(
        &self,
        op: MockOp,
        apply: impl FnOnce(&mut MockState) -> Result<T, BackendError>,
    ) -> Result<T, BackendError> {
        let (result, delay) = {
            let mut state = self.state.lock();
            let (failure, delay) = state.begin(op);
            let result = match failure {
                Some(e) => Err(e),
                None => apply(&mut *state),
            };
            (result, delay)
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        result
    }
}

#[async_trait]
impl AuthApi for MockBackend {
    async fn get_user(&self) -> Result<Option<Identity>, BackendError> {
        self.respond(MockOp::GetUser, |s| Ok(s.session.clone())).await
    }

    async fn sign_in_with_password(&self, credentials: &Credentials) -> Result<Identity, BackendError> {
        self.respond(MockOp::SignIn, |s| {
            let identity = s
                .accounts
                .get(&credentials.email)
                .filter(|a| a.password == credentials.password.expose_secret())
                .map(|a| a.identity.clone())
                .ok_or_else(|| BackendError::InvalidCredentials("Invalid login credentials".into()))?;
            s.session = Some(identity.clone());
            Ok(identity)
        })
        .await
    }

    async fn sign_up(&self, credentials: &Credentials) -> Result<Identity, BackendError> {
        self.respond(MockOp::SignUp, |s| {
            if s.accounts.contains_key(&credentials.email) {
                return Err(BackendError::InvalidRequest("User already registered".into()));
            }
            let id = format!("user-{}", s.accounts.len() + 1);
            let identity = Identity::new(UserId::from_raw(id), credentials.email.clone());
            s.accounts.insert(
                credentials.email.clone(),
                Account {
                    password: credentials.password.expose_secret().to_string(),
                    identity: identity.clone(),
                },
            );
            s.session = Some(identity.clone());
            Ok(identity)
        })
        .await
    }

    async fn sign_out(&self) -> Result<(), BackendError> {
        self.respond(MockOp::SignOut, |s| {
            s.session = None;
            Ok(())
        })
        .await
    }
}

#[async_trait]
impl TaskTable for MockBackend {
    async fn select(&self, filter: &Filter) -> Result<Vec<Task>, BackendError> {
        self.respond(MockOp::Select, |s| {
            Ok(s.rows.values().filter(|t| filter.matches(t)).cloned().collect())
        })
        .await
    }

    async fn insert(&self, rows: &[NewTask]) -> Result<Vec<Task>, BackendError> {
        self.respond(MockOp::Insert, |s| Ok(rows.iter().map(|r| s.store_row(r)).collect()))
            .await
    }

    async fn update(&self, patch: &TaskPatch, filter: &Filter) -> Result<Vec<Task>, BackendError> {
        self.respond(MockOp::Update, |s| {
            let mut changed = Vec::new();
            for task in s.rows.values_mut().filter(|t| filter.matches(t)) {
                if let Some(name) = &patch.name {
                    task.name = name.clone();
                }
                if let Some(status) = patch.status {
                    task.status = status;
                }
                if let Some(due_date) = patch.due_date {
                    task.due_date = Some(due_date);
                }
                changed.push(task.clone());
            }
            Ok(changed)
        })
        .await
    }

    async fn delete(&self, filter: &Filter) -> Result<(), BackendError> {
        self.respond(MockOp::Delete, |s| {
            s.rows.retain(|_, t| !filter.matches(t));
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn due() -> Option<NaiveDate> {
        NaiveDate::from_ymd_opt(2024, 1, 1)
    }

    #[tokio::test]
    async fn sign_in_checks_password() {
        let mock = MockBackend::new();
        mock.add_account("u1", "ana@example.com", "right");

        let err = mock
            .sign_in_with_password(&Credentials::new("ana@example.com", "wrong"))
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::InvalidCredentials(_)));
        assert_eq!(mock.get_user().await.unwrap(), None);

        let user = mock
            .sign_in_with_password(&Credentials::new("ana@example.com", "right"))
            .await
            .unwrap();
        assert_eq!(mock.get_user().await.unwrap(), Some(user));
        assert_eq!(mock.calls(MockOp::SignIn), 2);
    }

    #[tokio::test]
    async fn duplicate_sign_up_is_rejected() {
        let mock = MockBackend::new();
        let creds = Credentials::new("bo@example.com", "pw");
        let user = mock.sign_up(&creds).await.unwrap();
        assert_eq!(user.email.as_deref(), Some("bo@example.com"));

        let err = mock.sign_up(&creds).await.unwrap_err();
        assert_eq!(err, BackendError::InvalidRequest("User already registered".into()));
    }

    #[tokio::test]
    async fn table_operations_respect_filters() {
        let mock = MockBackend::new();
        let ana = UserId::from_raw("u1");
        let bo = UserId::from_raw("u2");
        mock.seed_task(&ana, "A", TaskStatus::Incomplete, due());
        mock.seed_task(&bo, "B", TaskStatus::Complete, None);

        let mine = mock.select(&Filter::user_id(&ana)).await.unwrap();
        assert_eq!(mine.len(), 1);
        assert_eq!(mine[0].name, "A");

        let inserted = mock
            .insert(&[NewTask::new("C", ana.clone(), due())])
            .await
            .unwrap();
        assert_eq!(inserted[0].id, TaskId::new(3));
        assert!(inserted[0].extra.contains_key("created_at"));

        let updated = mock
            .update(&TaskPatch::status(TaskStatus::Complete), &Filter::id(TaskId::new(1)))
            .await
            .unwrap();
        assert_eq!(updated[0].status, TaskStatus::Complete);
        let missing = mock
            .update(&TaskPatch::status(TaskStatus::Complete), &Filter::id(TaskId::new(99)))
            .await
            .unwrap();
        assert!(missing.is_empty());

        mock.delete(&Filter::id(TaskId::new(2))).await.unwrap();
        let ids: Vec<_> = mock.rows().iter().map(|t| t.id.get()).collect();
        assert_eq!(ids, vec![1, 3]);
    }

    #[tokio::test]
    async fn scripted_failure_applies_once() {
        let mock = MockBackend::new();
        mock.fail_next(MockOp::Select, BackendError::Network("reset".into()));

        let filter = Filter::user_id(&UserId::from_raw("u1"));
        assert!(matches!(mock.select(&filter).await, Err(BackendError::Network(_))));
        assert!(mock.select(&filter).await.unwrap().is_empty());
        assert_eq!(mock.calls(MockOp::Select), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn delay_holds_back_response_not_mutation() {
        let mock = std::sync::Arc::new(MockBackend::new());
        let user = UserId::from_raw("u1");
        mock.delay_next(MockOp::Insert, Duration::from_secs(5));

        let started = tokio::time::Instant::now();
        let pending = {
            let mock = mock.clone();
            tokio::spawn(async move { mock.insert(&[NewTask::new("slow", user, None)]).await })
        };
        while mock.rows().is_empty() {
            tokio::task::yield_now().await;
        }
        assert!(started.elapsed() < Duration::from_secs(5));

        let rows = pending.await.unwrap().unwrap();
        assert_eq!(rows[0].name, "slow");
        assert!(started.elapsed() >= Duration::from_secs(5));
    }

    #[tokio::test]
    async fn expire_session_signs_out_server_side() {
        let mock = MockBackend::new();
        let user = mock.add_account("u1", "ana@example.com", "pw");
        mock.sign_in_as(&user);
        assert!(mock.get_user().await.unwrap().is_some());
        mock.expire_session();
        assert!(mock.get_user().await.unwrap().is_none());
    }
}
