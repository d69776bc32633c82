//! View control: entry resolution, the student step machine and status polling.
//!
//! Students and teachers never talk to each other directly. A waiting student
//! re-reads their own status from the partition's `SessionStore` on a fixed
//! interval (`StatusPoller`) and moves on once a teacher has approved.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::domain::{FeedbackSession, Student, StudentStatus, Task};
use crate::error::{LaraError, Result};
use crate::feedback::FeedbackGenerator;
use crate::session::SessionStore;
use crate::task_codes;

/// The submit action stays disabled below this many characters.
pub const MIN_SUBMISSION_CHARS: usize = 10;

const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// URL query parameters read on load.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryQuery {
    #[serde(default)]
    pub task_code: Option<String>,
    #[serde(default)]
    pub student_id: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "view", rename_all = "snake_case")]
pub enum Entry {
    /// Student flow opened from a shareable code. `task` is the resolved task,
    /// or the current one when the code is unknown.
    StudentByCode {
        #[serde(rename = "taskCode")]
        task_code: String,
        task: Option<Task>,
    },
    /// Prior student session restored from `studentId`.
    RestoreStudent {
        #[serde(rename = "studentId")]
        student_id: String,
        step: StudentStep,
    },
    /// Top-level choice. `strip_student_id` asks the client to drop an unknown id from the URL.
    Landing {
        #[serde(rename = "stripStudentId")]
        strip_student_id: bool,
    },
}

/// Task code wins over student id; an unknown student id falls back to landing.
#[instrument(level = "info", skip(store, query), fields(has_code = query.task_code.is_some(), has_student = query.student_id.is_some()))]
pub async fn resolve_entry(query: &EntryQuery, store: &SessionStore) -> Result<Entry> {
    if let Some(code) = query.task_code.as_deref().filter(|c| !c.trim().is_empty()) {
        let task_code = task_codes::normalize(code);
        let task = match store.find_task_by_code(&task_code).await? {
            Some(t) => Some(t),
            None => store.current_task().await,
        };
        return Ok(Entry::StudentByCode { task_code, task });
    }

    if let Some(student_id) = query.student_id.as_deref().filter(|s| !s.trim().is_empty()) {
        return Ok(match store.get_student_status(student_id).await {
            Some(status) => Entry::RestoreStudent {
                student_id: student_id.to_string(),
                step: StudentStep::for_status(status),
            },
            None => {
                debug!(target: "lara_backend", %student_id, "Unknown student id in URL; returning to landing");
                Entry::Landing { strip_student_id: true }
            }
        });
    }

    Ok(Entry::Landing { strip_student_id: false })
}

/// `{base}?taskCode=CODE&studentId=ID`, either parameter alone, or nothing.
pub fn share_link(base_url: &str, task_code: Option<&str>, student_id: Option<&str>) -> Option<String> {
    let base = base_url.trim_end_matches('/');
    match (task_code, student_id) {
        (Some(code), Some(id)) => Some(format!("{base}?taskCode={code}&studentId={id}")),
        (Some(code), None) => Some(format!("{base}?taskCode={code}")),
        (None, Some(id)) => Some(format!("{base}?studentId={id}")),
        (None, None) => None,
    }
}

/// Student-facing screens.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StudentStep {
    Name,
    Work,
    /// In flight only; never restored.
    Analyzing,
    Waiting,
    FeedbackReady,
    Revising,
}

impl StudentStep {
    pub fn for_status(status: StudentStatus) -> Self {
        match status {
            StudentStatus::Active => Self::Work,
            StudentStatus::Submitted => Self::Waiting,
            StudentStatus::FeedbackReady => Self::FeedbackReady,
            StudentStatus::Revising | StudentStatus::Completed => Self::Revising,
        }
    }
}

/// One student's session: identity, draft and current screen.
pub struct StudentFlow {
    store: SessionStore,
    task: Task,
    step: StudentStep,
    student: Option<Student>,
    draft: String,
    selected_step: Option<String>,
}

impl StudentFlow {
    pub fn new(store: SessionStore, task: Task) -> Self {
        Self {
            store,
            task,
            step: StudentStep::Name,
            student: None,
            draft: String::new(),
            selected_step: None,
        }
    }

    /// Re-enter an existing session. A reload during `Analyzing` lands back on `Work`.
    pub async fn restore(store: SessionStore, task: Task, student_id: &str) -> Result<Self> {
        let student = store
            .student(student_id)
            .await
            .ok_or_else(|| LaraError::StudentNotFound(student_id.to_string()))?;
        let draft = store
            .submission(student_id)
            .await
            .map(|s| s.content)
            .unwrap_or_default();
        Ok(Self {
            step: StudentStep::for_status(student.status),
            student: Some(student),
            draft,
            selected_step: None,
            store,
            task,
        })
    }

    pub fn step(&self) -> StudentStep {
        self.step
    }

    pub fn student_id(&self) -> Option<&str> {
        self.student.as_ref().map(|s| s.id.as_str())
    }

    pub fn draft(&self) -> &str {
        &self.draft
    }

    pub fn task(&self) -> &Task {
        &self.task
    }

    pub fn selected_step(&self) -> Option<&str> {
        self.selected_step.as_deref()
    }

    pub fn set_draft(&mut self, content: impl Into<String>) {
        self.draft = content.into();
    }

    /// Submit stays disabled until the draft is long enough and not blank.
    pub fn can_submit(&self) -> bool {
        self.step == StudentStep::Work
            && !self.draft.trim().is_empty()
            && self.draft.chars().count() >= MIN_SUBMISSION_CHARS
    }

    #[instrument(level = "info", skip(self, name), fields(name_len = name.len()))]
    pub async fn join(&mut self, name: &str) -> Result<Student> {
        if self.step != StudentStep::Name {
            return Err(LaraError::invalid_input("step", "already joined"));
        }
        let name = name.trim();
        if name.is_empty() {
            return Err(LaraError::invalid_input("name", "name is required"));
        }
        let student = self.store.add_student(name).await?;
        self.student = Some(student.clone());
        self.step = StudentStep::Work;
        Ok(student)
    }

    /// Generate feedback for the draft and record the submission.
    /// On failure the flow returns to `Work` with the draft untouched.
    #[instrument(level = "info", skip(self, generator), fields(draft_len = self.draft.len()))]
    pub async fn submit<G: FeedbackGenerator>(&mut self, generator: &G) -> Result<()> {
        let student_id = match &self.student {
            Some(s) => s.id.clone(),
            None => return Err(LaraError::invalid_input("studentId", "join before submitting")),
        };
        if self.step != StudentStep::Work {
            return Err(LaraError::invalid_input(
                "step",
                format!("cannot submit from the {:?} step", self.step),
            ));
        }
        if !self.can_submit() {
            return Err(LaraError::invalid_input(
                "content",
                format!("write at least {MIN_SUBMISSION_CHARS} characters"),
            ));
        }

        self.step = StudentStep::Analyzing;
        let generated = generator
            .generate(&self.task.prompt, &self.task.success_criteria, &self.draft)
            .await;
        let feedback = match generated {
            Ok(fb) => fb,
            Err(e) => {
                warn!(target: "feedback", %student_id, error = %e, "Generation failed; back to draft");
                self.step = StudentStep::Work;
                return Err(e);
            }
        };

        if let Err(e) = self
            .store
            .submit_work(&student_id, &self.task.id, &self.draft, feedback)
            .await
        {
            self.step = StudentStep::Work;
            return Err(e);
        }
        self.step = StudentStep::Waiting;
        info!(target: "lara_backend", %student_id, "Submission waiting for approval");
        Ok(())
    }

    /// Apply a polled status. Only moves forward out of `Waiting`.
    pub fn observe(&mut self, status: Option<StudentStatus>) -> StudentStep {
        match (self.step, status) {
            (StudentStep::Waiting, Some(StudentStatus::FeedbackReady)) => {
                self.step = StudentStep::FeedbackReady
            }
            (StudentStep::Waiting | StudentStep::FeedbackReady, Some(StudentStatus::Revising)) => {
                self.step = StudentStep::Revising
            }
            _ => {}
        }
        self.step
    }

    /// Approved feedback; `None` until the teacher approves.
    pub async fn approved_feedback(&self) -> Option<FeedbackSession> {
        if !matches!(self.step, StudentStep::FeedbackReady | StudentStep::Revising) {
            return None;
        }
        let id = self.student_id()?;
        self.store.submission(id).await.and_then(|s| s.feedback)
    }

    /// Single choice; a later pick replaces an earlier one.
    pub async fn select_next_step(&mut self, next_step_id: &str) -> Result<()> {
        let feedback = self
            .approved_feedback()
            .await
            .ok_or_else(|| LaraError::invalid_input("step", "feedback is not available yet"))?;
        if feedback.next_step(next_step_id).is_none() {
            return Err(LaraError::invalid_input(
                "nextStepId",
                format!("unknown next step '{next_step_id}'"),
            ));
        }
        self.selected_step = Some(next_step_id.to_string());
        Ok(())
    }

    /// Continue is only possible once a next step has been picked.
    pub async fn continue_with_selection(&mut self) -> Result<String> {
        let Some(choice) = self.selected_step.clone() else {
            return Err(LaraError::invalid_input("nextStepId", "choose a next step first"));
        };
        let id = self
            .student_id()
            .ok_or_else(|| LaraError::invalid_input("studentId", "join first"))?
            .to_string();
        self.store.begin_revision(&id).await?;
        self.step = StudentStep::Revising;
        Ok(choice)
    }
}

/// Repeating status lookup for one student. Dropping it stops the timer.
pub struct StatusPoller {
    rx: watch::Receiver<Option<StudentStatus>>,
    ticks: Arc<AtomicU64>,
    handle: JoinHandle<()>,
}

impl StatusPoller {
    /// A zero `every` is raised to 1 ms.
    pub fn spawn(store: SessionStore, student_id: String, every: Duration) -> Self {
        let every = every.max(MIN_POLL_INTERVAL);
        let (tx, rx) = watch::channel(None);
        let ticks = Arc::new(AtomicU64::new(0));
        let counter = ticks.clone();
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            loop {
                interval.tick().await;
                counter.fetch_add(1, Ordering::SeqCst);
                let status = store.get_student_status(&student_id).await;
                tx.send_if_modified(|current| {
                    if *current != status {
                        *current = status;
                        true
                    } else {
                        false
                    }
                });
            }
        });
        Self { rx, ticks, handle }
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<StudentStatus>> {
        self.rx.clone()
    }

    pub fn latest(&self) -> Option<StudentStatus> {
        *self.rx.borrow()
    }

    /// Number of lookups performed so far.
    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::SeqCst)
    }

    pub fn stop(&self) {
        self.handle.abort();
    }

    pub fn is_stopped(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for StatusPoller {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{NewTask, Partition, DEFAULT_TASK_ID};
    use crate::storage::{BlobStore, MemoryBlobStore};
    use crate::test_support::{sample_feedback, StubGenerator};

    fn store() -> SessionStore {
        let blobs: Arc<dyn BlobStore> = Arc::new(MemoryBlobStore::new());
        SessionStore::open(Partition::Demo, blobs).unwrap()
    }

    async fn flow(store: &SessionStore) -> StudentFlow {
        let task = store.current_task().await.unwrap();
        StudentFlow::new(store.clone(), task)
    }

    #[tokio::test]
    async fn task_code_takes_precedence() {
        let s = store();
        let task = s
            .create_task(NewTask {
                title: "Forest".into(),
                prompt: "Write about a forest".into(),
                ..NewTask::default()
            })
            .await
            .unwrap();
        let code = task.task_code.clone().unwrap();
        let q = EntryQuery {
            task_code: Some(code.to_lowercase()),
            student_id: Some("whatever".into()),
        };
        match resolve_entry(&q, &s).await.unwrap() {
            Entry::StudentByCode { task_code, task: found } => {
                assert_eq!(task_code, code);
                assert_eq!(found.unwrap().id, task.id);
            }
            other => panic!("unexpected entry {other:?}"),
        }
    }

    #[tokio::test]
    async fn unknown_code_falls_back_to_current_task() {
        let s = store();
        let q = EntryQuery { task_code: Some("ZZZ999".into()), student_id: None };
        match resolve_entry(&q, &s).await.unwrap() {
            Entry::StudentByCode { task, .. } => assert_eq!(task.unwrap().id, DEFAULT_TASK_ID),
            other => panic!("unexpected entry {other:?}"),
        }
    }

    #[tokio::test]
    async fn student_id_restores_or_strips() {
        let s = store();
        let st = s.add_student("Ava").await.unwrap();

        let known = EntryQuery { task_code: None, student_id: Some(st.id.clone()) };
        assert_eq!(
            resolve_entry(&known, &s).await.unwrap(),
            Entry::RestoreStudent { student_id: st.id.clone(), step: StudentStep::Work }
        );

        let unknown = EntryQuery { task_code: None, student_id: Some("gone".into()) };
        assert_eq!(
            resolve_entry(&unknown, &s).await.unwrap(),
            Entry::Landing { strip_student_id: true }
        );
        assert_eq!(
            resolve_entry(&EntryQuery::default(), &s).await.unwrap(),
            Entry::Landing { strip_student_id: false }
        );
    }

    #[test]
    fn share_links() {
        assert_eq!(
            share_link("https://lara.app/", Some("ABC123"), Some("s1")).as_deref(),
            Some("https://lara.app?taskCode=ABC123&studentId=s1")
        );
        assert_eq!(
            share_link("https://lara.app", None, Some("s1")).as_deref(),
            Some("https://lara.app?studentId=s1")
        );
        assert_eq!(
            share_link("https://lara.app", Some("ABC123"), None).as_deref(),
            Some("https://lara.app?taskCode=ABC123")
        );
        assert_eq!(share_link("https://lara.app", None, None), None);
    }

    #[test]
    fn restored_steps_never_analyzing() {
        assert_eq!(StudentStep::for_status(StudentStatus::Active), StudentStep::Work);
        assert_eq!(StudentStep::for_status(StudentStatus::Submitted), StudentStep::Waiting);
        assert_eq!(
            StudentStep::for_status(StudentStatus::FeedbackReady),
            StudentStep::FeedbackReady
        );
    }

    #[tokio::test]
    async fn full_student_journey() {
        let s = store();
        let gen = StubGenerator::ok();
        let mut f = flow(&s).await;
        assert_eq!(f.step(), StudentStep::Name);
        assert!(f.join("   ").await.is_err());

        let ava = f.join("Ava").await.unwrap();
        assert_eq!(ava.status, StudentStatus::Active);
        assert_eq!(f.step(), StudentStep::Work);

        f.set_draft("short");
        assert!(!f.can_submit());
        assert!(f.submit(&gen).await.is_err());
        assert_eq!(gen.calls(), 0);

        f.set_draft("The forest was dark.");
        f.submit(&gen).await.unwrap();
        assert_eq!(f.step(), StudentStep::Waiting);
        assert_eq!(s.get_student_status(&ava.id).await, Some(StudentStatus::Submitted));
        assert!(f.approved_feedback().await.is_none());

        // Not approved yet: nothing changes.
        assert_eq!(f.observe(Some(StudentStatus::Submitted)), StudentStep::Waiting);

        s.approve_feedback(&ava.id).await.unwrap();
        let status = s.get_student_status(&ava.id).await;
        assert_eq!(f.observe(status), StudentStep::FeedbackReady);
        assert_eq!(f.approved_feedback().await, Some(sample_feedback()));

        assert!(f.continue_with_selection().await.is_err());
        assert!(f.select_next_step("next-9").await.is_err());
        f.select_next_step("next-0").await.unwrap();
        f.select_next_step("next-1").await.unwrap();
        assert_eq!(f.selected_step(), Some("next-1"));

        assert_eq!(f.continue_with_selection().await.unwrap(), "next-1");
        assert_eq!(f.step(), StudentStep::Revising);
        assert_eq!(s.get_student_status(&ava.id).await, Some(StudentStatus::Revising));
    }

    #[tokio::test]
    async fn generation_failure_returns_to_draft() {
        let s = store();
        let gen = StubGenerator::failing();
        let mut f = flow(&s).await;
        let st = f.join("Ben").await.unwrap();
        f.set_draft("My long enough draft.");

        let err = f.submit(&gen).await.unwrap_err();
        assert!(matches!(err, LaraError::Generation(_)));
        assert_eq!(f.step(), StudentStep::Work);
        assert_eq!(f.draft(), "My long enough draft.");
        assert_eq!(s.get_student_status(&st.id).await, Some(StudentStatus::Active));
        assert!(s.submission(&st.id).await.is_none());

        // Retry succeeds with the preserved draft.
        f.submit(&StubGenerator::ok()).await.unwrap();
        assert_eq!(f.step(), StudentStep::Waiting);
    }

    #[tokio::test]
    async fn restore_picks_up_waiting_student() {
        let s = store();
        let st = s.add_student("Cy").await.unwrap();
        s.submit_work(&st.id, DEFAULT_TASK_ID, "Saved draft text", sample_feedback())
            .await
            .unwrap();
        let task = s.current_task().await.unwrap();
        let f = StudentFlow::restore(s.clone(), task.clone(), &st.id).await.unwrap();
        assert_eq!(f.step(), StudentStep::Waiting);
        assert_eq!(f.draft(), "Saved draft text");
        assert!(StudentFlow::restore(s, task, "nope").await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn poller_reports_approval_and_stops_on_drop() {
        let s = store();
        let st = s.add_student("Ava").await.unwrap();
        s.submit_work(&st.id, DEFAULT_TASK_ID, "The forest was dark.", sample_feedback())
            .await
            .unwrap();

        let poller = StatusPoller::spawn(s.clone(), st.id.clone(), Duration::from_millis(1000));
        let mut rx = poller.subscribe();

        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow(), Some(StudentStatus::Submitted));

        s.approve_feedback(&st.id).await.unwrap();
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow(), Some(StudentStatus::FeedbackReady));
        assert_eq!(poller.latest(), Some(StudentStatus::FeedbackReady));

        let ticks = poller.ticks.clone();
        drop(poller);
        tokio::task::yield_now().await;
        let after_drop = ticks.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), after_drop);
        // Sender side is gone once the task is aborted.
        assert!(rx.changed().await.is_err());
    }

    #[tokio::test]
    async fn submitting_twice_reports_the_step() {
        let s = store();
        let gen = StubGenerator::ok();
        let mut f = flow(&s).await;
        f.join("Fay").await.unwrap();
        f.set_draft("A long enough first draft.");
        f.submit(&gen).await.unwrap();

        let err = f.submit(&gen).await.unwrap_err();
        match err {
            LaraError::InvalidInput { field, reason } => {
                assert_eq!(field, "step");
                assert!(reason.contains("Waiting"), "{reason}");
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert_eq!(gen.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_interval_polls_without_panicking() {
        let s = store();
        let st = s.add_student("Gus").await.unwrap();
        let poller = StatusPoller::spawn(s, st.id, Duration::ZERO);
        let mut rx = poller.subscribe();
        rx.changed().await.unwrap();
        assert_eq!(poller.latest(), Some(StudentStatus::Active));
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(!poller.is_stopped());
    }

    #[tokio::test(start_paused = true)]
    async fn stop_cancels_polling() {
        let s = store();
        let poller = StatusPoller::spawn(s, "nobody".into(), Duration::from_millis(500));
        tokio::time::sleep(Duration::from_millis(1600)).await;
        let before = poller.ticks();
        assert!(before >= 3);

        poller.stop();
        tokio::task::yield_now().await;
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(poller.ticks(), before);
        assert!(poller.is_stopped());
        assert_eq!(poller.latest(), None);
    }
}
