use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::{Mutex, MutexGuard};

use rater_core::annotation::{Annotation, AnnotationPatch, NewAnnotation, SubmitReceipt};
use rater_core::errors::ServiceError;
use rater_core::essay::{BlindAssignment, Essay, EssaySummary};
use rater_core::ids::{AnnotationId, BlindId, EssayId, UserId};
use rater_core::security::{LoginResponse, User};
use rater_core::services::{AnnotationStore, AuthService, EssayStore};

/// One recorded call against [`MockBackend`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MockCall {
    Login(String),
    CurrentUser,
    ListEssays,
    GetEssay(EssayId),
    GetAnnotation(EssayId),
    Create(EssayId),
    Update(AnnotationId),
    ListBlindIds,
    SubmitAll,
}

#[derive(Default)]
struct MockState {
    accounts: Vec<(User, String)>,
    current: Option<User>,
    essays: BTreeMap<EssayId, Essay>,
    assignments: HashMap<UserId, Vec<BlindAssignment>>,
    annotations: HashMap<(UserId, EssayId), Annotation>,
    next_annotation_id: i64,
    failures: VecDeque<ServiceError>,
    calls: Vec<MockCall>,
}

/// In-memory backend with the same rules as the REST service: one
/// annotation per rater and essay, saving marks it submitted, and every
/// data call needs a signed-in rater.
#[derive(Default)]
pub struct MockBackend {
    state: Mutex<MockState>,
    call_count: AtomicUsize,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_account(self, user: User, password: &str) -> Self {
        self.state.lock().accounts.push((user, password.to_string()));
        self
    }

    pub fn with_essay(self, essay: Essay) -> Self {
        self.state.lock().essays.insert(essay.id, essay);
        self
    }

    /// Append `essay_id` to `user`'s blind sequence.
    pub fn assign(self, user: UserId, essay_id: EssayId, blind_id: &str) -> Self {
        {
            let mut state = self.state.lock();
            let list = state.assignments.entry(user).or_default();
            let display_order = list.len() as u32 + 1;
            list.push(BlindAssignment {
                blind_id: BlindId::from_raw(blind_id),
                essay_id,
                display_order,
            });
        }
        self
    }

    /// Store an annotation as if it had been saved earlier.
    pub fn with_annotation(self, user: UserId, annotation: Annotation) -> Self {
        {
            let mut state = self.state.lock();
            state.next_annotation_id = state.next_annotation_id.max(annotation.id.get());
            state.annotations.insert((user, annotation.essay_id), annotation);
        }
        self
    }

    /// Skip login and act as `user`.
    pub fn signed_in_as(self, user: User) -> Self {
        self.state.lock().current = Some(user);
        self
    }

    /// Forget the signed-in rater; later calls fail with an auth error.
    pub fn expire_session(&self) {
        self.state.lock().current = None;
    }

    /// Make the next call (of any kind) fail with `error`.
    pub fn fail_next(&self, error: ServiceError) {
        self.state.lock().failures.push_back(error);
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::Relaxed)
    }

    pub fn calls(&self) -> Vec<MockCall> {
        self.state.lock().calls.clone()
    }

    pub fn stored(&self, user: UserId, essay_id: EssayId) -> Option<Annotation> {
        self.state.lock().annotations.get(&(user, essay_id)).cloned()
    }

    fn begin(&self, call: MockCall) -> Result<MutexGuard<'_, MockState>, ServiceError> {
        self.call_count.fetch_add(1, Ordering::Relaxed);
        let mut state = self.state.lock();
        state.calls.push(call);
        if let Some(err) = state.failures.pop_front() {
            return Err(err);
        }
        Ok(state)
    }

    fn begin_authed(&self, call: MockCall) -> Result<(MutexGuard<'_, MockState>, UserId), ServiceError> {
        let state = self.begin(call)?;
        let user = state
            .current
            .as_ref()
            .map(|u| u.id)
            .ok_or_else(|| ServiceError::Auth("Could not validate credentials".into()))?;
        Ok((state, user))
    }
}

impl MockState {
    fn assignment(&self, user: UserId, essay_id: EssayId) -> Option<&BlindAssignment> {
        self.assignments
            .get(&user)
            .and_then(|list| list.iter().find(|a| a.essay_id == essay_id))
    }

    fn allocate_id(&mut self) -> AnnotationId {
        self.next_annotation_id += 1;
        AnnotationId::new(self.next_annotation_id)
    }
}

#[async_trait]
impl AuthService for MockBackend {
    async fn login(&self, username: &str, password: &str) -> Result<LoginResponse, ServiceError> {
        let mut state = self.begin(MockCall::Login(username.to_string()))?;
        let user = state
            .accounts
            .iter()
            .find(|(u, p)| u.username == username && p == password)
            .map(|(u, _)| u.clone())
            .ok_or_else(|| ServiceError::Auth("Incorrect username or password".into()))?;
        state.current = Some(user.clone());
        Ok(LoginResponse {
            access_token: format!("mock-token-{}", user.id),
            token_type: "bearer".into(),
            user,
        })
    }

    async fn current_user(&self) -> Result<User, ServiceError> {
        let state = self.begin(MockCall::CurrentUser)?;
        state
            .current
            .clone()
            .ok_or_else(|| ServiceError::Auth("Could not validate credentials".into()))
    }
}

#[async_trait]
impl EssayStore for MockBackend {
    async fn list(&self) -> Result<Vec<EssaySummary>, ServiceError> {
        let (state, user) = self.begin_authed(MockCall::ListEssays)?;
        let Some(list) = state.assignments.get(&user) else {
            return Ok(Vec::new());
        };
        let mut ordered = list.clone();
        ordered.sort_by_key(|a| a.display_order);
        Ok(ordered
            .iter()
            .filter_map(|a| {
                let essay = state.essays.get(&a.essay_id)?;
                let is_annotated = state
                    .annotations
                    .get(&(user, a.essay_id))
                    .is_some_and(|ann| ann.is_submitted);
                Some(EssaySummary {
                    id: essay.id,
                    title: format!("Item #{}", a.display_order),
                    question: essay.question.clone(),
                    is_annotated,
                    blind_id: Some(a.blind_id.clone()),
                    paper_summary: essay.paper_summary.clone(),
                })
            })
            .collect())
    }

    async fn get(&self, id: EssayId) -> Result<Essay, ServiceError> {
        let (state, user) = self.begin_authed(MockCall::GetEssay(id))?;
        let mut essay = state
            .essays
            .get(&id)
            .cloned()
            .ok_or_else(|| ServiceError::NotFound("Essay not found".into()))?;
        match state.assignment(user, id) {
            Some(a) => {
                essay.title = format!("Item #{}", a.display_order);
                essay.blind_id = Some(a.blind_id.clone());
            }
            None => {
                essay.title = "Item".into();
                essay.blind_id = None;
            }
        }
        essay.is_annotated = state
            .annotations
            .get(&(user, id))
            .is_some_and(|ann| ann.is_submitted);
        Ok(essay)
    }
}

#[async_trait]
impl AnnotationStore for MockBackend {
    async fn get(&self, essay_id: EssayId) -> Result<Option<Annotation>, ServiceError> {
        let (state, user) = self.begin_authed(MockCall::GetAnnotation(essay_id))?;
        Ok(state.annotations.get(&(user, essay_id)).cloned())
    }

    async fn create(&self, new: &NewAnnotation) -> Result<Annotation, ServiceError> {
        let (mut state, user) = self.begin_authed(MockCall::Create(new.essay_id))?;
        if state.annotations.contains_key(&(user, new.essay_id)) {
            return Err(ServiceError::Validation(
                "Annotation already exists. Use PATCH to update.".into(),
            ));
        }
        if !state.essays.contains_key(&new.essay_id) {
            return Err(ServiceError::NotFound("Essay not found".into()));
        }
        let annotation = Annotation {
            id: state.allocate_id(),
            essay_id: new.essay_id,
            content: new.content.clone(),
            organization: new.organization.clone(),
            language: new.language.clone(),
            ai_feedback_score: new.ai_feedback_score,
            is_submitted: true,
        };
        state
            .annotations
            .insert((user, new.essay_id), annotation.clone());
        Ok(annotation)
    }

    async fn update(
        &self,
        id: AnnotationId,
        patch: &AnnotationPatch,
    ) -> Result<Annotation, ServiceError> {
        let (mut state, user) = self.begin_authed(MockCall::Update(id))?;
        let annotation = state
            .annotations
            .iter_mut()
            .find(|((owner, _), a)| *owner == user && a.id == id)
            .map(|(_, a)| a)
            .ok_or_else(|| ServiceError::NotFound("Annotation not found".into()))?;

        if let Some(content) = &patch.content {
            annotation.content = content.clone();
        }
        if let Some(organization) = &patch.organization {
            annotation.organization = organization.clone();
        }
        if let Some(language) = &patch.language {
            annotation.language = language.clone();
        }
        if let Some(score) = patch.ai_feedback_score {
            annotation.ai_feedback_score = Some(score);
        }
        annotation.is_submitted = true;
        Ok(annotation.clone())
    }

    async fn list_blind_ids(&self) -> Result<Vec<BlindAssignment>, ServiceError> {
        let (state, user) = self.begin_authed(MockCall::ListBlindIds)?;
        let mut list = state.assignments.get(&user).cloned().unwrap_or_default();
        list.sort_by_key(|a| a.display_order);
        Ok(list)
    }

    async fn submit_all(&self) -> Result<SubmitReceipt, ServiceError> {
        let (mut state, user) = self.begin_authed(MockCall::SubmitAll)?;
        let mut submitted_count = 0;
        for ((owner, _), annotation) in state.annotations.iter_mut() {
            if *owner == user && !annotation.is_submitted {
                annotation.is_submitted = true;
                submitted_count += 1;
            }
        }
        Ok(SubmitReceipt { submitted_count })
    }
}

/// Essay with the given sentences, joined into `content`.
pub fn essay(id: i64, sentences: &[&str]) -> Essay {
    Essay {
        id: EssayId::new(id),
        title: format!("Essay {id}"),
        content: sentences.join(" "),
        question: "Summarize the paper's contribution.".into(),
        sentences: Some(sentences.iter().map(|s| s.to_string()).collect()),
        evidence: None,
        summary: None,
        paper_summary: None,
        blind_id: None,
        is_annotated: false,
    }
}

/// Rater account used by the mock fixtures.
pub fn rater(id: i64, username: &str) -> User {
    User {
        id: UserId::new(id),
        username: username.to_string(),
        full_name: username.to_string(),
    }
}
