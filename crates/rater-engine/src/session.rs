use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use rater_core::annotation::{Annotation, Completeness};
use rater_core::essay::{Essay, Evidence};
use rater_core::ids::{AnnotationId, EssayId};
use rater_core::rubric::{Rubric, RubricTrait, Score};
use rater_core::services::{AnnotationStore, EssayStore};

use crate::board::TraitBoard;
use crate::error::EngineError;
use crate::sequence::{EssaySequence, SequenceEntry};

/// Per-trait line of a [`SessionStatus`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TraitStatus {
    pub rubric_trait: RubricTrait,
    pub score: Option<Score>,
    pub selected: usize,
    pub required: usize,
    pub completeness: Completeness,
    /// Stored indices that no longer address a sentence.
    pub out_of_range: Vec<usize>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionStatus {
    pub active: RubricTrait,
    pub traits: Vec<TraitStatus>,
}

impl SessionStatus {
    pub fn is_complete(&self) -> bool {
        self.traits.iter().all(|t| t.completeness.is_complete())
    }

    pub fn incomplete(&self) -> impl Iterator<Item = &TraitStatus> {
        self.traits.iter().filter(|t| !t.completeness.is_complete())
    }

    pub fn get(&self, t: RubricTrait) -> Option<&TraitStatus> {
        self.traits.iter().find(|s| s.rubric_trait == t)
    }
}

/// Where the rater goes after a successful save.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NextStep {
    /// Another essay still needs rating; ask before opening it.
    Offer(SequenceEntry),
    Dashboard,
}

#[derive(Clone, Debug)]
pub struct SaveOutcome {
    pub annotation: Annotation,
    pub next: NextStep,
}

/// Editing state for one essay: which trait is active, every trait's
/// score and evidence, and whether the annotation already exists.
pub struct AnnotationSession {
    essay: Essay,
    sentences: Vec<String>,
    rubric: Rubric,
    active: RubricTrait,
    board: TraitBoard,
    annotation_id: Option<AnnotationId>,
    store: Arc<dyn AnnotationStore>,
}

impl AnnotationSession {
    pub fn new(
        essay: Essay,
        existing: Option<Annotation>,
        rubric: Rubric,
        store: Arc<dyn AnnotationStore>,
    ) -> Self {
        let sentences = essay.sentences().into_owned();
        let (board, annotation_id) = match &existing {
            Some(a) => (TraitBoard::from_annotation(a), Some(a.id)),
            None => (TraitBoard::default(), None),
        };

        for t in rubric.iter() {
            let stale = board.record(t).out_of_range(sentences.len());
            if !stale.is_empty() {
                warn!(
                    essay_id = %essay.id,
                    trait_name = %t,
                    ?stale,
                    total = sentences.len(),
                    "stored selection points past the end of the essay; dropped on next save"
                );
            }
        }

        Self {
            active: rubric.first(),
            essay,
            sentences,
            rubric,
            board,
            annotation_id,
            store,
        }
    }

    /// Fetch the essay and any earlier annotation of it.
    #[instrument(skip_all, fields(essay_id = %essay_id))]
    pub async fn open(
        essay_id: EssayId,
        essays: &dyn EssayStore,
        store: Arc<dyn AnnotationStore>,
        rubric: Rubric,
    ) -> Result<Self, EngineError> {
        let essay = essays.get(essay_id).await?;
        let existing = store.get(essay_id).await?;
        debug!(resumed = existing.is_some(), "session opened");
        Ok(Self::new(essay, existing, rubric, store))
    }

    pub fn essay(&self) -> &Essay {
        &self.essay
    }

    pub fn sentences(&self) -> &[String] {
        &self.sentences
    }

    pub fn total_sentences(&self) -> usize {
        self.sentences.len()
    }

    pub fn rubric(&self) -> &Rubric {
        &self.rubric
    }

    pub fn active(&self) -> RubricTrait {
        self.active
    }

    pub fn board(&self) -> &TraitBoard {
        &self.board
    }

    pub fn annotation_id(&self) -> Option<AnnotationId> {
        self.annotation_id
    }

    /// Evidence passages, or none when the stored list is unreadable.
    pub fn evidence(&self) -> Vec<Evidence> {
        self.essay.evidence().unwrap_or_else(|e| {
            warn!(essay_id = %self.essay.id, error = %e, "malformed evidence list");
            Vec::new()
        })
    }

    fn ensure_in_rubric(&self, t: RubricTrait) -> Result<(), EngineError> {
        if self.rubric.contains(t) {
            Ok(())
        } else {
            Err(EngineError::TraitNotInRubric(t))
        }
    }

    pub fn activate(&mut self, t: RubricTrait) -> Result<(), EngineError> {
        self.ensure_in_rubric(t)?;
        self.active = t;
        debug!(trait_name = %t, "trait activated");
        Ok(())
    }

    pub fn set_score(&mut self, t: RubricTrait, score: Score) -> Result<(), EngineError> {
        self.ensure_in_rubric(t)?;
        self.board.set_score(t, score);
        debug!(trait_name = %t, score = score.get(), "score set");
        Ok(())
    }

    pub fn clear_score(&mut self, t: RubricTrait) -> Result<(), EngineError> {
        self.ensure_in_rubric(t)?;
        self.board.clear_score(t);
        Ok(())
    }

    /// Flip `index` in the active trait's selection. Returns whether it is
    /// now selected. Rejections leave the session unchanged.
    pub fn toggle_sentence(&mut self, index: usize) -> Result<bool, EngineError> {
        let t = self.active;
        if !t.selects_sentences() {
            return Err(EngineError::SelectionNotAllowed(t));
        }
        if self.board.score(t).is_none() {
            return Err(EngineError::ScoreRequired(t));
        }
        let total = self.sentences.len();
        if index >= total {
            return Err(EngineError::SentenceOutOfRange { index, total });
        }
        Ok(self.board.record_mut(t).toggle(index))
    }

    /// Step to the next trait. `false` when already on the last one.
    pub fn advance(&mut self) -> bool {
        match self.rubric.next(self.active) {
            Some(t) => {
                self.active = t;
                true
            }
            None => false,
        }
    }

    pub fn retreat(&mut self) -> bool {
        match self.rubric.prev(self.active) {
            Some(t) => {
                self.active = t;
                true
            }
            None => false,
        }
    }

    pub fn status(&self) -> SessionStatus {
        let total = self.sentences.len();
        let traits = self
            .rubric
            .iter()
            .map(|t| {
                let record = self.board.record(t);
                let sentence_trait = t.selects_sentences();
                TraitStatus {
                    rubric_trait: t,
                    score: record.score,
                    selected: if sentence_trait { record.selected_within(total) } else { 0 },
                    required: if sentence_trait { record.required(total) } else { 0 },
                    completeness: record.completeness(t, total),
                    out_of_range: record.out_of_range(total),
                }
            })
            .collect();
        SessionStatus {
            active: self.active,
            traits,
        }
    }

    /// Persist the annotation: create on first save, full update by id
    /// afterwards. On failure nothing in the session changes.
    #[instrument(
        skip(self, sequence),
        fields(
            essay_id = %self.essay.id,
            blind_id = self.essay.blind_id.as_ref().map(|b| b.as_str()),
        )
    )]
    pub async fn save(&mut self, sequence: &mut EssaySequence) -> Result<SaveOutcome, EngineError> {
        let status = self.status();
        if !status.is_complete() {
            let pending: Vec<&'static str> =
                status.incomplete().map(|t| t.rubric_trait.as_str()).collect();
            warn!(?pending, "saving incomplete annotation");
        }

        let total = self.total_sentences();
        let annotation = match self.annotation_id {
            None => self.store.create(&self.board.to_new(self.essay.id, total)).await?,
            Some(id) => self.store.update(id, &self.board.to_patch(total)).await?,
        };
        self.annotation_id = Some(annotation.id);
        self.essay.is_annotated = true;
        info!(annotation_id = %annotation.id, "annotation saved");

        sequence.mark_annotated(self.essay.id);
        let next = match sequence.next_unannotated(self.essay.id) {
            Some(entry) => NextStep::Offer(entry.clone()),
            None => NextStep::Dashboard,
        };
        Ok(SaveOutcome { annotation, next })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rater_client::mock::{essay, rater, MockBackend, MockCall};
    use rater_core::annotation::TraitAnnotation;
    use rater_core::errors::ServiceError;
    use rater_core::ids::UserId;

    fn score(v: i64) -> Score {
        Score::new(v).unwrap()
    }

    const TEN: [&str; 10] = [
        "S0.", "S1.", "S2.", "S3.", "S4.", "S5.", "S6.", "S7.", "S8.", "S9.",
    ];

    fn fixture() -> MockBackend {
        MockBackend::new()
            .with_essay(essay(1, &TEN))
            .with_essay(essay(2, &["Only one."]))
            .with_essay(essay(3, &["First.", "Second."]))
            .assign(UserId::new(7), EssayId::new(1), "b-1")
            .assign(UserId::new(7), EssayId::new(2), "b-2")
            .assign(UserId::new(7), EssayId::new(3), "b-3")
            .signed_in_as(rater(7, "annotator7"))
    }

    fn backend() -> Arc<MockBackend> {
        Arc::new(fixture())
    }

    async fn open(mock: &Arc<MockBackend>, id: i64) -> AnnotationSession {
        AnnotationSession::open(EssayId::new(id), &**mock, mock.clone(), Rubric::standard())
            .await
            .unwrap()
    }

    async fn sequence(mock: &Arc<MockBackend>) -> EssaySequence {
        EssaySequence::load(&**mock, &**mock).await.unwrap()
    }

    fn offline(rubric: Rubric) -> AnnotationSession {
        AnnotationSession::new(essay(1, &TEN), None, rubric, Arc::new(MockBackend::new()))
    }

    #[test]
    fn starts_on_first_trait() {
        let session = offline(Rubric::standard());
        assert_eq!(session.active(), RubricTrait::Content);
        assert!(session.annotation_id().is_none());
        let legacy = offline(Rubric::legacy());
        assert_eq!(legacy.active(), RubricTrait::Language);
    }

    #[test]
    fn ten_sentences_score_two() {
        let mut session = offline(Rubric::standard());
        session.set_score(RubricTrait::Content, score(2)).unwrap();
        let status = session.status();
        let content = status.get(RubricTrait::Content).unwrap();
        assert_eq!(content.required, 6);

        for i in 0..6 {
            assert!(session.toggle_sentence(i).unwrap());
        }
        assert!(session.status().get(RubricTrait::Content).unwrap().completeness.is_complete());

        session.toggle_sentence(6).unwrap();
        assert_eq!(
            session.status().get(RubricTrait::Content).unwrap().completeness,
            Completeness::OverSelected { selected: 7, required: 6 }
        );
    }

    #[test]
    fn ten_sentences_score_one() {
        let mut session = offline(Rubric::standard());
        session.set_score(RubricTrait::Organization, score(1)).unwrap();
        session.activate(RubricTrait::Organization).unwrap();
        assert_eq!(session.status().get(RubricTrait::Organization).unwrap().required, 8);

        for i in 0..9 {
            session.toggle_sentence(i).unwrap();
        }
        assert_eq!(
            session.status().get(RubricTrait::Organization).unwrap().completeness,
            Completeness::OverSelected { selected: 9, required: 8 }
        );
    }

    #[test]
    fn toggle_without_score_is_rejected() {
        let mut session = offline(Rubric::standard());
        let before = session.board().clone();
        let err = session.toggle_sentence(0).unwrap_err();
        assert!(matches!(err, EngineError::ScoreRequired(RubricTrait::Content)));
        assert_eq!(session.board(), &before);
    }

    #[test]
    fn toggle_twice_restores_selection() {
        let mut session = offline(Rubric::standard());
        session.set_score(RubricTrait::Content, score(3)).unwrap();
        session.toggle_sentence(1).unwrap();
        let before = session.board().clone();
        assert!(session.toggle_sentence(4).unwrap());
        assert!(!session.toggle_sentence(4).unwrap());
        assert_eq!(session.board(), &before);
    }

    #[test]
    fn toggle_guards() {
        let mut session = offline(Rubric::standard());
        session.set_score(RubricTrait::Content, score(1)).unwrap();
        assert!(matches!(
            session.toggle_sentence(10),
            Err(EngineError::SentenceOutOfRange { index: 10, total: 10 })
        ));

        session.activate(RubricTrait::AiFeedback).unwrap();
        session.set_score(RubricTrait::AiFeedback, score(4)).unwrap();
        assert!(matches!(
            session.toggle_sentence(0),
            Err(EngineError::SelectionNotAllowed(RubricTrait::AiFeedback))
        ));
    }

    #[test]
    fn score_change_leaves_selection() {
        let mut session = offline(Rubric::standard());
        session.set_score(RubricTrait::Content, score(4)).unwrap();
        session.toggle_sentence(0).unwrap();
        session.toggle_sentence(1).unwrap();
        let selection = session.board().record(RubricTrait::Content).selected_sentences.clone();

        session.set_score(RubricTrait::Content, score(1)).unwrap();
        assert_eq!(session.board().record(RubricTrait::Content).selected_sentences, selection);
        assert_eq!(
            session.status().get(RubricTrait::Content).unwrap().completeness,
            Completeness::Pending { selected: 2, required: 8 }
        );
    }

    #[test]
    fn score_any_trait_while_another_is_active() {
        let mut session = offline(Rubric::standard());
        session.set_score(RubricTrait::Language, score(5)).unwrap();
        assert_eq!(session.active(), RubricTrait::Content);
        assert!(session.status().get(RubricTrait::Language).unwrap().completeness.is_complete());
    }

    #[test]
    fn navigation_stops_at_the_ends() {
        let mut session = offline(Rubric::standard());
        assert!(!session.retreat());
        assert!(session.advance());
        assert!(session.advance());
        assert!(session.advance());
        assert_eq!(session.active(), RubricTrait::AiFeedback);
        assert!(!session.advance());
        assert_eq!(session.active(), RubricTrait::AiFeedback);
        assert!(session.retreat());
        assert_eq!(session.active(), RubricTrait::Language);
    }

    #[test]
    fn legacy_rubric_rejects_ai_feedback() {
        let mut session = offline(Rubric::legacy());
        assert!(matches!(
            session.activate(RubricTrait::AiFeedback),
            Err(EngineError::TraitNotInRubric(RubricTrait::AiFeedback))
        ));
        assert_eq!(session.status().traits.len(), 3);
    }

    #[test]
    fn stale_selection_is_reported() {
        let stored = Annotation {
            id: AnnotationId::new(4),
            essay_id: EssayId::new(2),
            content: TraitAnnotation {
                score: Some(score(5)),
                selected_sentences: [0, 6].into_iter().collect(),
            },
            organization: TraitAnnotation::default(),
            language: TraitAnnotation::default(),
            ai_feedback_score: None,
            is_submitted: true,
        };
        let session = AnnotationSession::new(
            essay(2, &["Only one."]),
            Some(stored),
            Rubric::standard(),
            Arc::new(MockBackend::new()),
        );
        let content = session.status().get(RubricTrait::Content).cloned().unwrap();
        assert_eq!(content.out_of_range, vec![6]);
        assert_eq!(content.selected, 1);
        assert_eq!(session.annotation_id(), Some(AnnotationId::new(4)));
    }

    #[tokio::test]
    async fn save_persists_only_in_range_sentences() {
        let stored = Annotation {
            id: AnnotationId::new(4),
            essay_id: EssayId::new(2),
            content: TraitAnnotation {
                score: Some(score(5)),
                selected_sentences: [0, 6].into_iter().collect(),
            },
            organization: TraitAnnotation::default(),
            language: TraitAnnotation::default(),
            ai_feedback_score: None,
            is_submitted: true,
        };
        let mock = Arc::new(fixture().with_annotation(UserId::new(7), stored));
        let mut seq = sequence(&mock).await;
        let mut session = open(&mock, 2).await;

        session.save(&mut seq).await.unwrap();

        let persisted = mock.stored(UserId::new(7), EssayId::new(2)).unwrap();
        assert_eq!(persisted.content.selected_sentences.into_iter().collect::<Vec<_>>(), vec![0]);
        assert!(mock.calls().contains(&MockCall::Update(AnnotationId::new(4))));
    }

    #[test]
    fn malformed_evidence_reads_as_empty() {
        let mut e = essay(1, &TEN);
        e.evidence = Some("[{not json".into());
        let session = AnnotationSession::new(e, None, Rubric::standard(), Arc::new(MockBackend::new()));
        assert!(session.evidence().is_empty());
    }

    #[tokio::test]
    async fn first_save_creates_then_updates_same_id() {
        let mock = backend();
        let mut seq = sequence(&mock).await;
        let mut session = open(&mock, 1).await;
        session.set_score(RubricTrait::Content, score(5)).unwrap();

        let first = session.save(&mut seq).await.unwrap();
        assert_eq!(session.annotation_id(), Some(first.annotation.id));

        session.set_score(RubricTrait::Organization, score(5)).unwrap();
        let second = session.save(&mut seq).await.unwrap();
        assert_eq!(second.annotation.id, first.annotation.id);

        let calls = mock.calls();
        assert!(calls.contains(&MockCall::Create(EssayId::new(1))));
        assert_eq!(calls.last(), Some(&MockCall::Update(first.annotation.id)));
        let stored = mock.stored(UserId::new(7), EssayId::new(1)).unwrap();
        assert_eq!(stored.organization.score, Some(score(5)));
    }

    #[tokio::test]
    async fn reopening_an_annotated_essay_updates() {
        let mock = backend();
        let mut seq = sequence(&mock).await;
        let mut session = open(&mock, 3).await;
        session.set_score(RubricTrait::Language, score(4)).unwrap();
        let created = session.save(&mut seq).await.unwrap().annotation;

        let mut reopened = open(&mock, 3).await;
        assert_eq!(reopened.annotation_id(), Some(created.id));
        assert_eq!(reopened.board().score(RubricTrait::Language), Some(score(4)));
        reopened.save(&mut seq).await.unwrap();
        assert_eq!(mock.calls().last(), Some(&MockCall::Update(created.id)));
    }

    #[tokio::test]
    async fn save_offers_next_then_dashboard() {
        let mock = backend();
        let mut seq = sequence(&mock).await;

        let mut first = open(&mock, 1).await;
        let outcome = first.save(&mut seq).await.unwrap();
        match outcome.next {
            NextStep::Offer(entry) => assert_eq!(entry.essay_id, EssayId::new(2)),
            other => panic!("expected offer, got {other:?}"),
        }

        let mut third = open(&mock, 3).await;
        let outcome = third.save(&mut seq).await.unwrap();
        match outcome.next {
            NextStep::Offer(entry) => assert_eq!(entry.essay_id, EssayId::new(2)),
            other => panic!("expected wrap-around offer, got {other:?}"),
        }

        let mut second = open(&mock, 2).await;
        let outcome = second.save(&mut seq).await.unwrap();
        assert_eq!(outcome.next, NextStep::Dashboard);
    }

    #[tokio::test]
    async fn failed_save_keeps_state() {
        let mock = backend();
        let mut seq = sequence(&mock).await;
        let mut session = open(&mock, 1).await;
        session.set_score(RubricTrait::Content, score(4)).unwrap();
        session.toggle_sentence(3).unwrap();
        let board = session.board().clone();

        mock.fail_next(ServiceError::Network("connection refused".into()));
        let err = session.save(&mut seq).await.unwrap_err();
        assert!(matches!(err, EngineError::Service(ServiceError::Network(_))));
        assert_eq!(session.board(), &board);
        assert!(session.annotation_id().is_none());
        assert!(!seq.entry(EssayId::new(1)).unwrap().annotated);

        // retry goes through as a create
        session.save(&mut seq).await.unwrap();
        assert!(mock.stored(UserId::new(7), EssayId::new(1)).is_some());
    }

    #[tokio::test]
    async fn expired_session_routes_to_login() {
        let mock = backend();
        let mut seq = sequence(&mock).await;
        let mut session = open(&mock, 1).await;
        mock.expire_session();
        let err = session.save(&mut seq).await.unwrap_err();
        assert_eq!(err.recovery(), rater_core::errors::Recovery::Login);
    }

    #[tokio::test]
    async fn missing_essay_is_not_found() {
        let mock = backend();
        let err = AnnotationSession::open(EssayId::new(99), &*mock, mock.clone(), Rubric::standard())
            .await
            .err()
            .unwrap();
        assert_eq!(err.recovery(), rater_core::errors::Recovery::Dashboard);
    }
}
