use std::collections::BTreeMap;

use rater_core::annotation::{Annotation, AnnotationPatch, Completeness, NewAnnotation, TraitAnnotation};
use rater_core::ids::EssayId;
use rater_core::rubric::{RubricTrait, Score};

/// Every trait's record for one essay, keyed by trait.
///
/// The AI-feedback entry only ever carries a score.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TraitBoard {
    records: BTreeMap<RubricTrait, TraitAnnotation>,
}

impl Default for TraitBoard {
    fn default() -> Self {
        Self {
            records: RubricTrait::ALL
                .iter()
                .map(|t| (*t, TraitAnnotation::default()))
                .collect(),
        }
    }
}

impl TraitBoard {
    pub fn from_annotation(annotation: &Annotation) -> Self {
        let mut board = Self::default();
        for t in RubricTrait::ALL {
            if let Some(record) = annotation.trait_record(t) {
                board.records.insert(t, record.clone());
            }
        }
        board.record_mut(RubricTrait::AiFeedback).score = annotation.ai_feedback_score;
        board
    }

    pub fn record(&self, t: RubricTrait) -> &TraitAnnotation {
        // seeded with every trait in Default
        &self.records[&t]
    }

    pub(crate) fn record_mut(&mut self, t: RubricTrait) -> &mut TraitAnnotation {
        self.records.entry(t).or_default()
    }

    pub fn score(&self, t: RubricTrait) -> Option<Score> {
        self.record(t).score
    }

    pub fn set_score(&mut self, t: RubricTrait, score: Score) {
        self.record_mut(t).score = Some(score);
    }

    pub fn clear_score(&mut self, t: RubricTrait) {
        self.record_mut(t).score = None;
    }

    pub fn completeness(&self, t: RubricTrait, total_sentences: usize) -> Completeness {
        self.record(t).completeness(t, total_sentences)
    }

    fn sentence_record(&self, t: RubricTrait, total_sentences: usize) -> TraitAnnotation {
        self.record(t).within(total_sentences)
    }

    /// Create payload. Selections past `total_sentences` are left out.
    pub fn to_new(&self, essay_id: EssayId, total_sentences: usize) -> NewAnnotation {
        NewAnnotation {
            essay_id,
            content: self.sentence_record(RubricTrait::Content, total_sentences),
            organization: self.sentence_record(RubricTrait::Organization, total_sentences),
            language: self.sentence_record(RubricTrait::Language, total_sentences),
            ai_feedback_score: self.score(RubricTrait::AiFeedback),
        }
    }

    /// Full replacement patch for an existing annotation, clamped like
    /// [`to_new`](Self::to_new).
    pub fn to_patch(&self, total_sentences: usize) -> AnnotationPatch {
        AnnotationPatch {
            content: Some(self.sentence_record(RubricTrait::Content, total_sentences)),
            organization: Some(self.sentence_record(RubricTrait::Organization, total_sentences)),
            language: Some(self.sentence_record(RubricTrait::Language, total_sentences)),
            ai_feedback_score: self.score(RubricTrait::AiFeedback),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rater_core::ids::AnnotationId;

    fn score(v: i64) -> Score {
        Score::new(v).unwrap()
    }

    #[test]
    fn starts_empty_for_every_trait() {
        let board = TraitBoard::default();
        for t in RubricTrait::ALL {
            assert_eq!(board.record(t), &TraitAnnotation::default());
        }
    }

    #[test]
    fn loads_stored_annotation() {
        let annotation = Annotation {
            id: AnnotationId::new(3),
            essay_id: EssayId::new(8),
            content: TraitAnnotation {
                score: Some(score(2)),
                selected_sentences: [0, 4].into_iter().collect(),
            },
            organization: TraitAnnotation::default(),
            language: TraitAnnotation::scored(score(5)),
            ai_feedback_score: Some(score(4)),
            is_submitted: true,
        };
        let board = TraitBoard::from_annotation(&annotation);
        assert!(board.record(RubricTrait::Content).is_selected(4));
        assert_eq!(board.score(RubricTrait::Language), Some(score(5)));
        assert_eq!(board.score(RubricTrait::AiFeedback), Some(score(4)));
        assert_eq!(board.score(RubricTrait::Organization), None);
    }

    #[test]
    fn payloads_carry_every_trait() {
        let mut board = TraitBoard::default();
        board.set_score(RubricTrait::Organization, score(3));
        board.record_mut(RubricTrait::Organization).toggle(1);
        board.set_score(RubricTrait::AiFeedback, score(1));

        let new = board.to_new(EssayId::new(5), 4);
        assert_eq!(new.organization.selected_sentences.len(), 1);
        assert_eq!(new.ai_feedback_score, Some(score(1)));

        let patch = board.to_patch(4);
        assert_eq!(patch.content, Some(TraitAnnotation::default()));
        assert_eq!(patch.organization, Some(new.organization));
    }

    #[test]
    fn payloads_drop_indices_past_the_essay() {
        let mut board = TraitBoard::default();
        board.set_score(RubricTrait::Language, score(2));
        for i in [0, 2, 7] {
            board.record_mut(RubricTrait::Language).toggle(i);
        }

        let new = board.to_new(EssayId::new(5), 3);
        assert_eq!(new.language.selected_sentences.into_iter().collect::<Vec<_>>(), vec![0, 2]);
        assert_eq!(new.language.score, Some(score(2)));

        let patch = board.to_patch(3);
        assert_eq!(
            patch.language.map(|r| r.selected_sentences.into_iter().collect::<Vec<_>>()),
            Some(vec![0, 2])
        );
        // the board itself still remembers the stale index
        assert!(board.record(RubricTrait::Language).is_selected(7));
    }

    #[test]
    fn clear_score_keeps_selection() {
        let mut board = TraitBoard::default();
        board.set_score(RubricTrait::Content, score(1));
        board.record_mut(RubricTrait::Content).toggle(2);
        board.clear_score(RubricTrait::Content);
        assert_eq!(board.completeness(RubricTrait::Content, 5), Completeness::Unscored);
        assert!(board.record(RubricTrait::Content).is_selected(2));
    }
}
