//! Scrape jobs: authenticate, fetch, normalize, publish.
//!
//! Every job runs on its own task so a caller that stops listening never
//! interrupts it. The job's portal session is closed on every exit path
//! once login has succeeded.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::RwLock;
use uuid::Uuid;
use zeroize::Zeroizing;

use crate::{
    driver::portal::PortalDriver,
    error::{AppError, Result},
    models::{
        date::DateRange,
        job::{FailureKind, JobFailure, JobSnapshot, JobState, ProgressUpdate},
        session::{Credentials, Session},
        transaction::NormalizedTransaction,
    },
    services::{
        normalizer::normalize_all,
        progress::{ProgressChannel, ProgressEvent, ProgressSubscription},
        sessions::SessionManager,
        store::TransactionStore,
    },
};

/// Supplies a replacement password after the portal rejected an interactive login.
#[async_trait]
pub trait CredentialPrompt: Send + Sync {
    /// `attempt` counts the rejected logins so far. `None` gives up.
    async fn retry(&self, user_id: &str, attempt: u32) -> Option<Zeroizing<String>>;
}

/// What to scrape and with which credentials.
#[derive(Debug)]
pub struct ScrapeRequest {
    pub credentials: Credentials,
    pub range: DateRange,
}

#[derive(Debug)]
struct JobRecord {
    state: JobState,
    last_progress: Option<ProgressUpdate>,
    error: Option<JobFailure>,
    transactions: Option<Arc<Vec<NormalizedTransaction>>>,
    finished_at: Option<DateTime<Utc>>,
}

/// One authenticate-fetch-normalize run.
pub struct ScrapeJob {
    pub id: Uuid,
    pub user_id: String,
    pub range: DateRange,
    pub created_at: DateTime<Utc>,
    record: Mutex<JobRecord>,
    progress: ProgressChannel,
}

impl ScrapeJob {
    fn new(user_id: &str, range: DateRange, progress_capacity: usize) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            range,
            created_at: Utc::now(),
            record: Mutex::new(JobRecord {
                state: JobState::Pending,
                last_progress: None,
                error: None,
                transactions: None,
                finished_at: None,
            }),
            progress: ProgressChannel::new(progress_capacity),
        }
    }

    fn record(&self) -> std::sync::MutexGuard<'_, JobRecord> {
        self.record.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[cfg(test)]
    pub fn state(&self) -> JobState {
        self.record().state
    }

    /// Moves to `next` if the state machine allows it; illegal moves are logged and ignored.
    fn transition(&self, next: JobState) -> bool {
        let mut record = self.record();

        if !record.state.can_transition_to(next) {
            tracing::error!(
                "❌ Job {}: illegal transition {:?} -> {:?} ignored",
                self.id,
                record.state,
                next
            );
            return false;
        }

        tracing::debug!("Job {}: {:?} -> {:?}", self.id, record.state, next);
        record.state = next;
        true
    }

    /// Records and publishes a driver progress report. Percentages never go backwards.
    fn report(&self, update: ProgressUpdate) {
        let update = {
            let mut record = self.record();
            let floor = record.last_progress.as_ref().map_or(0, |p| p.percent);
            let update = ProgressUpdate::new(update.percent.max(floor), update.message);
            record.last_progress = Some(update.clone());
            update
        };

        self.progress.publish(ProgressEvent::Progress {
            percent: update.percent,
            message: update.message,
        });
    }

    fn finish(&self, transactions: Arc<Vec<NormalizedTransaction>>) {
        {
            let mut record = self.record();
            if !record.state.can_transition_to(JobState::Done) {
                tracing::error!("❌ Job {}: cannot finish from {:?}", self.id, record.state);
                return;
            }
            record.state = JobState::Done;
            record.transactions = Some(transactions.clone());
            record.finished_at = Some(Utc::now());
        }

        tracing::info!(
            "✅ Job {} done: {} transactions for {}",
            self.id,
            transactions.len(),
            self.user_id
        );
        self.progress.publish(ProgressEvent::Done { transactions });
    }

    /// Ends the job as `Failed`. A job always terminates, so a failure from a
    /// state that cannot normally fail is forced through and logged.
    fn fail(&self, failure: JobFailure) {
        {
            let mut record = self.record();
            if record.state.is_terminal() {
                return;
            }
            if !record.state.can_transition_to(JobState::Failed) {
                tracing::error!("❌ Job {}: forcing Failed from {:?}", self.id, record.state);
            }
            record.state = JobState::Failed;
            record.error = Some(failure.clone());
            record.finished_at = Some(Utc::now());
        }

        tracing::warn!("⚠️ Job {} failed for {}: {}", self.id, self.user_id, failure.message);
        self.progress.publish(ProgressEvent::Error {
            message: failure.message,
        });
    }

    pub fn subscribe(&self) -> ProgressSubscription {
        self.progress.subscribe()
    }

    /// The result once the job is terminal.
    pub fn outcome(&self) -> Option<Result<Arc<Vec<NormalizedTransaction>>>> {
        let record = self.record();
        match record.state {
            JobState::Done => Some(
                record
                    .transactions
                    .clone()
                    .ok_or_else(|| AppError::Internal(format!("job {} done without result", self.id))),
            ),
            JobState::Failed => Some(Err(record
                .error
                .clone()
                .map(AppError::from)
                .unwrap_or_else(|| AppError::Internal(format!("job {} failed without error", self.id))))),
            _ => None,
        }
    }

    /// Drains `subscription` until the terminal event and returns the outcome.
    pub async fn wait(&self, mut subscription: ProgressSubscription) -> Result<Arc<Vec<NormalizedTransaction>>> {
        while let Some(event) = subscription.next().await {
            if event.is_terminal() {
                break;
            }
        }

        self.outcome()
            .unwrap_or_else(|| Err(AppError::Internal(format!("job {} never finished", self.id))))
    }

    pub fn snapshot(&self) -> JobSnapshot {
        let record = self.record();
        JobSnapshot {
            job_id: self.id,
            user_id: self.user_id.clone(),
            date_range: self.range,
            state: record.state,
            last_progress: record.last_progress.clone(),
            error: record.error.clone(),
            transaction_count: record.transactions.as_ref().map(|t| t.len()),
            created_at: self.created_at,
            finished_at: record.finished_at,
        }
    }

    fn finished_before(&self, cutoff: DateTime<Utc>) -> bool {
        self.record().finished_at.is_some_and(|at| at < cutoff)
    }
}

fn driver_failure(message: impl Into<String>) -> JobFailure {
    JobFailure {
        kind: FailureKind::DriverFailure,
        message: message.into(),
    }
}

/// Runs scrape jobs and keeps them queryable for a while after they end.
#[derive(Clone)]
pub struct ScrapeOrchestrator {
    sessions: SessionManager,
    driver: Arc<dyn PortalDriver>,
    store: TransactionStore,
    jobs: Arc<RwLock<HashMap<Uuid, Arc<ScrapeJob>>>>,
    progress_capacity: usize,
    retention: Duration,
}

impl ScrapeOrchestrator {
    pub fn new(
        sessions: SessionManager,
        driver: Arc<dyn PortalDriver>,
        store: TransactionStore,
        progress_capacity: usize,
        retention: Duration,
    ) -> Self {
        Self {
            sessions,
            driver,
            store,
            jobs: Arc::new(RwLock::new(HashMap::new())),
            progress_capacity,
            retention,
        }
    }

    /// Registers and starts a job.
    ///
    /// The returned subscription was attached before the job started, so it
    /// sees every event.
    pub async fn submit(
        &self,
        request: ScrapeRequest,
        prompt: Option<Arc<dyn CredentialPrompt>>,
    ) -> (Arc<ScrapeJob>, ProgressSubscription) {
        let job = Arc::new(ScrapeJob::new(
            &request.credentials.user_id,
            request.range,
            self.progress_capacity,
        ));
        let subscription = job.subscribe();

        self.jobs.write().await.insert(job.id, job.clone());
        tracing::info!("🚀 Job {} submitted for {}", job.id, job.user_id);

        let this = self.clone();
        let task_job = job.clone();
        tokio::spawn(async move {
            let run = AssertUnwindSafe(this.execute(task_job.clone(), request.credentials, prompt));
            if run.catch_unwind().await.is_err() {
                task_job.fail(driver_failure("scrape task panicked"));
            }
        });

        (job, subscription)
    }

    /// Runs a job and waits for its result.
    pub async fn run(
        &self,
        request: ScrapeRequest,
        prompt: Option<Arc<dyn CredentialPrompt>>,
    ) -> Result<Arc<Vec<NormalizedTransaction>>> {
        let (job, subscription) = self.submit(request, prompt).await;
        job.wait(subscription).await
    }

    pub async fn job(&self, job_id: Uuid) -> Option<Arc<ScrapeJob>> {
        self.jobs.read().await.get(&job_id).cloned()
    }

    /// Drops terminal jobs that finished longer ago than the retention window.
    pub async fn prune(&self) -> usize {
        let cutoff = chrono::Duration::from_std(self.retention)
            .ok()
            .and_then(|retention| Utc::now().checked_sub_signed(retention));
        // A window reaching past the earliest representable time never expires anything.
        let Some(cutoff) = cutoff else {
            return 0;
        };

        let mut jobs = self.jobs.write().await;
        let before = jobs.len();
        jobs.retain(|_, job| !job.finished_before(cutoff));
        before - jobs.len()
    }

    async fn execute(
        &self,
        job: Arc<ScrapeJob>,
        credentials: Credentials,
        prompt: Option<Arc<dyn CredentialPrompt>>,
    ) {
        let session = match self.authenticate(&job, credentials, prompt.as_deref()).await {
            Ok(session) => session,
            Err(failure) => {
                job.fail(failure);
                return;
            }
        };

        let outcome = AssertUnwindSafe(self.fetch(&job, &session)).catch_unwind().await;

        self.sessions.close_session(&session).await;

        match outcome {
            Ok(Ok(transactions)) => {
                self.store.replace(&job.user_id, transactions.clone()).await;
                job.finish(transactions);
            }
            Ok(Err(failure)) => job.fail(failure),
            Err(_) => job.fail(driver_failure("portal fetch panicked")),
        }
    }

    /// Logs in, consulting `prompt` after each rejected interactive attempt.
    ///
    /// Takes the credentials by value so they are wiped as soon as this returns.
    async fn authenticate(
        &self,
        job: &ScrapeJob,
        mut credentials: Credentials,
        prompt: Option<&dyn CredentialPrompt>,
    ) -> std::result::Result<Session, JobFailure> {
        let mut attempt = 0;

        loop {
            job.transition(JobState::Authenticating);
            attempt += 1;

            match self.sessions.authenticate(&credentials).await {
                Ok(session) => return Ok(session),
                Err(AppError::InvalidCredentials) => {
                    let retry = match prompt {
                        Some(prompt) if credentials.interactive => {
                            tracing::info!("🔁 Job {}: asking for new credentials (attempt {})", job.id, attempt);
                            prompt.retry(&job.user_id, attempt).await
                        }
                        _ => None,
                    };

                    match retry {
                        Some(password) => credentials.password = password,
                        None => {
                            return Err(JobFailure {
                                kind: FailureKind::InvalidCredentials,
                                message: AppError::InvalidCredentials.to_string(),
                            });
                        }
                    }
                }
                Err(e) => return Err(driver_failure(e.to_string())),
            }
        }
    }

    async fn fetch(
        &self,
        job: &Arc<ScrapeJob>,
        session: &Session,
    ) -> std::result::Result<Arc<Vec<NormalizedTransaction>>, JobFailure> {
        let lease = self
            .sessions
            .lease(&session.user_id)
            .await
            .map_err(|e| driver_failure(e.to_string()))?;

        if lease.session().session_id != session.session_id {
            return Err(driver_failure("portal session was replaced before fetching"));
        }

        job.transition(JobState::Fetching);

        let handle = lease.handle().map_err(|e| driver_failure(e.to_string()))?;
        let on_progress = |update: ProgressUpdate| job.report(update);
        let raw = self
            .driver
            .transactions(handle, &job.range, &on_progress)
            .await
            .map_err(|e| driver_failure(e.to_string()))?;
        drop(lease);

        job.transition(JobState::Normalizing);
        let normalized = normalize_all(&raw);
        tracing::debug!("Job {}: normalized {} records", job.id, normalized.len());

        Ok(Arc::new(normalized))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::fixture::{FixtureDriver, samples::alice_driver};
    use crate::models::date::CalendarDate;
    use futures::StreamExt;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Harness {
        driver: Arc<FixtureDriver>,
        sessions: SessionManager,
        store: TransactionStore,
        orchestrator: ScrapeOrchestrator,
    }

    fn harness(retention: Duration) -> Harness {
        let driver = Arc::new(alice_driver());
        let sessions = SessionManager::new(driver.clone(), Duration::from_secs(5));
        let store = TransactionStore::new();
        let orchestrator = ScrapeOrchestrator::new(
            sessions.clone(),
            driver.clone(),
            store.clone(),
            64,
            retention,
        );
        Harness {
            driver,
            sessions,
            store,
            orchestrator,
        }
    }

    fn january() -> DateRange {
        DateRange {
            start: CalendarDate::from_ymd(2024, 1, 1),
            end: CalendarDate::from_ymd(2024, 1, 31),
        }
    }

    fn request(password: &str, interactive: bool) -> ScrapeRequest {
        ScrapeRequest {
            credentials: Credentials::new("alice", password, interactive),
            range: january(),
        }
    }

    struct ScriptedPrompt {
        passwords: Mutex<Vec<&'static str>>,
        calls: AtomicUsize,
    }

    impl ScriptedPrompt {
        fn new(passwords: Vec<&'static str>) -> Arc<Self> {
            Arc::new(Self {
                passwords: Mutex::new(passwords),
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl CredentialPrompt for ScriptedPrompt {
        async fn retry(&self, _user_id: &str, _attempt: u32) -> Option<Zeroizing<String>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut passwords = self.passwords.lock().unwrap();
            if passwords.is_empty() {
                None
            } else {
                Some(Zeroizing::new(passwords.remove(0).to_string()))
            }
        }
    }

    #[tokio::test]
    async fn happy_path_streams_progress_then_done() {
        let h = harness(Duration::from_secs(60));
        let (job, subscription) = h.orchestrator.submit(request("correct-pw", false), None).await;

        let events: Vec<_> = subscription.into_stream().collect().await;

        let percents: Vec<u8> = events
            .iter()
            .filter_map(|e| match e {
                ProgressEvent::Progress { percent, .. } => Some(*percent),
                _ => None,
            })
            .collect();
        assert!(!percents.is_empty());
        assert!(percents.windows(2).all(|w| w[0] <= w[1]));

        match events.last() {
            Some(ProgressEvent::Done { transactions }) => assert_eq!(transactions.len(), 3),
            other => panic!("expected done, got {:?}", other),
        }

        let snapshot = job.snapshot();
        assert_eq!(snapshot.state, JobState::Done);
        assert_eq!(snapshot.transaction_count, Some(3));
        assert_eq!(snapshot.last_progress.map(|p| p.percent), Some(100));
        assert_eq!(h.store.get("alice").await.map(|t| t.len()), Some(3));
        assert_eq!(h.sessions.active_count().await, 0);
        assert_eq!(h.driver.stats().live_handles, 0);
    }

    #[tokio::test]
    async fn fetch_failure_fails_the_job_and_releases_the_session() {
        let h = harness(Duration::from_secs(60));
        h.driver.set_fail_transactions(true);

        let err = h.orchestrator.run(request("correct-pw", false), None).await.unwrap_err();

        assert!(matches!(err, AppError::Driver(_)));
        assert_eq!(h.driver.stats().live_handles, 0);
        assert_eq!(h.sessions.active_count().await, 0);
        assert!(h.store.get("alice").await.is_none());
    }

    #[tokio::test]
    async fn rejected_service_login_is_not_retried() {
        let h = harness(Duration::from_secs(60));
        let prompt = ScriptedPrompt::new(vec!["correct-pw"]);

        let (job, subscription) = h
            .orchestrator
            .submit(request("wrong-pw", false), Some(prompt.clone()))
            .await;
        let err = job.wait(subscription).await.unwrap_err();

        assert_eq!(err, AppError::InvalidCredentials);
        assert_eq!(prompt.calls.load(Ordering::SeqCst), 0);
        assert_eq!(h.driver.stats().logins, 1);
        assert_eq!(
            job.snapshot().error.map(|e| e.kind),
            Some(FailureKind::InvalidCredentials)
        );
    }

    #[tokio::test]
    async fn interactive_login_retries_with_prompted_password() {
        let h = harness(Duration::from_secs(60));
        let prompt = ScriptedPrompt::new(vec!["still-wrong", "correct-pw"]);

        let transactions = h
            .orchestrator
            .run(request("wrong-pw", true), Some(prompt.clone()))
            .await
            .unwrap();

        assert_eq!(transactions.len(), 3);
        assert_eq!(prompt.calls.load(Ordering::SeqCst), 2);
        assert_eq!(h.driver.stats().logins, 3);
    }

    #[tokio::test]
    async fn interactive_login_gives_up_when_prompt_declines() {
        let h = harness(Duration::from_secs(60));
        let prompt = ScriptedPrompt::new(vec![]);

        let err = h
            .orchestrator
            .run(request("wrong-pw", true), Some(prompt.clone()))
            .await
            .unwrap_err();

        assert_eq!(err, AppError::InvalidCredentials);
        assert_eq!(prompt.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn late_subscriber_gets_only_the_terminal_event() {
        let h = harness(Duration::from_secs(60));
        let (job, subscription) = h.orchestrator.submit(request("correct-pw", false), None).await;
        job.wait(subscription).await.unwrap();

        let events: Vec<_> = job.subscribe().into_stream().collect().await;
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], ProgressEvent::Done { .. }));
    }

    #[tokio::test]
    async fn prune_drops_only_expired_terminal_jobs() {
        let h = harness(Duration::ZERO);
        let (job, subscription) = h.orchestrator.submit(request("correct-pw", false), None).await;
        job.wait(subscription).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;

        assert_eq!(h.orchestrator.prune().await, 1);
        assert!(h.orchestrator.job(job.id).await.is_none());

        let kept = harness(Duration::from_secs(3600));
        let (job, subscription) = kept.orchestrator.submit(request("correct-pw", false), None).await;
        job.wait(subscription).await.unwrap();
        assert_eq!(kept.orchestrator.prune().await, 0);
        assert!(kept.orchestrator.job(job.id).await.is_some());
    }

    #[tokio::test]
    async fn prune_with_an_enormous_retention_keeps_everything() {
        let h = harness(Duration::from_secs(10_000_000_000_000));
        let (job, subscription) = h.orchestrator.submit(request("correct-pw", false), None).await;
        job.wait(subscription).await.unwrap();

        assert_eq!(h.orchestrator.prune().await, 0);
        assert!(h.orchestrator.job(job.id).await.is_some());
    }

    #[test]
    fn illegal_transitions_are_ignored() {
        let job = ScrapeJob::new("alice", DateRange::unbounded(), 4);
        assert!(!job.transition(JobState::Done));
        assert_eq!(job.state(), JobState::Pending);
        assert!(job.transition(JobState::Authenticating));
    }
}
