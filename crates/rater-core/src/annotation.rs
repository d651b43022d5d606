use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::ids::{AnnotationId, EssayId};
use crate::rubric::{required_count, RubricTrait, Score};

/// Score plus sentence evidence for one trait of one essay.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraitAnnotation {
    #[serde(default)]
    pub score: Option<Score>,
    /// 0-based sentence indices, kept ascending.
    #[serde(default)]
    pub selected_sentences: BTreeSet<usize>,
}

/// How far a trait is from being finished.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Completeness {
    Unscored,
    Pending { selected: usize, required: usize },
    OverSelected { selected: usize, required: usize },
    Complete,
}

impl Completeness {
    pub fn is_complete(self) -> bool {
        matches!(self, Self::Complete)
    }
}

impl TraitAnnotation {
    pub fn scored(score: Score) -> Self {
        Self {
            score: Some(score),
            selected_sentences: BTreeSet::new(),
        }
    }

    /// Flip membership of `index`. Returns whether it is now selected.
    pub fn toggle(&mut self, index: usize) -> bool {
        if self.selected_sentences.remove(&index) {
            false
        } else {
            self.selected_sentences.insert(index);
            true
        }
    }

    pub fn is_selected(&self, index: usize) -> bool {
        self.selected_sentences.contains(&index)
    }

    /// Selected indices that actually address a sentence of this essay.
    pub fn selected_within(&self, total_sentences: usize) -> usize {
        self.selected_sentences.range(..total_sentences).count()
    }

    /// Selected indices past the end of the essay, e.g. left over from an
    /// earlier split of the same text.
    pub fn out_of_range(&self, total_sentences: usize) -> Vec<usize> {
        self.selected_sentences.range(total_sentences..).copied().collect()
    }

    /// Copy of this record with only the indices that address a sentence.
    pub fn within(&self, total_sentences: usize) -> Self {
        Self {
            score: self.score,
            selected_sentences: self.selected_sentences.range(..total_sentences).copied().collect(),
        }
    }

    pub fn required(&self, total_sentences: usize) -> usize {
        required_count(total_sentences, self.score)
    }

    pub fn completeness(&self, t: RubricTrait, total_sentences: usize) -> Completeness {
        if self.score.is_none() {
            return Completeness::Unscored;
        }
        if !t.selects_sentences() {
            return Completeness::Complete;
        }
        let selected = self.selected_within(total_sentences);
        let required = self.required(total_sentences);
        match selected.cmp(&required) {
            std::cmp::Ordering::Equal => Completeness::Complete,
            std::cmp::Ordering::Less => Completeness::Pending { selected, required },
            std::cmp::Ordering::Greater => Completeness::OverSelected { selected, required },
        }
    }
}

/// The stored aggregate: one per (annotator, essay).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Annotation {
    pub id: AnnotationId,
    pub essay_id: EssayId,
    #[serde(default)]
    pub content: TraitAnnotation,
    #[serde(default)]
    pub organization: TraitAnnotation,
    #[serde(default)]
    pub language: TraitAnnotation,
    #[serde(default)]
    pub ai_feedback_score: Option<Score>,
    #[serde(default)]
    pub is_submitted: bool,
}

impl Annotation {
    /// Sentence-bearing trait record. `AiFeedback` has no record.
    pub fn trait_record(&self, t: RubricTrait) -> Option<&TraitAnnotation> {
        match t {
            RubricTrait::Content => Some(&self.content),
            RubricTrait::Organization => Some(&self.organization),
            RubricTrait::Language => Some(&self.language),
            RubricTrait::AiFeedback => None,
        }
    }
}

/// Create payload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewAnnotation {
    pub essay_id: EssayId,
    pub content: TraitAnnotation,
    pub organization: TraitAnnotation,
    pub language: TraitAnnotation,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ai_feedback_score: Option<Score>,
}

/// Update payload. Absent fields are left as stored.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnnotationPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<TraitAnnotation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub organization: Option<TraitAnnotation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<TraitAnnotation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ai_feedback_score: Option<Score>,
}

impl From<NewAnnotation> for AnnotationPatch {
    fn from(new: NewAnnotation) -> Self {
        Self {
            content: Some(new.content),
            organization: Some(new.organization),
            language: Some(new.language),
            ai_feedback_score: new.ai_feedback_score,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitReceipt {
    #[serde(default)]
    pub submitted_count: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn score(v: i64) -> Score {
        Score::new(v).unwrap()
    }

    #[test]
    fn toggle_on_off_on() {
        let mut t = TraitAnnotation::scored(score(3));
        assert!(t.toggle(4));
        assert!(!t.toggle(4));
        assert!(t.selected_sentences.is_empty());
        assert!(t.toggle(4));
        assert!(t.is_selected(4));
    }

    #[test]
    fn selection_serializes_ascending() {
        let mut t = TraitAnnotation::scored(score(2));
        for i in [7, 1, 4] {
            t.toggle(i);
        }
        let json = serde_json::to_value(&t).unwrap();
        assert_eq!(json, serde_json::json!({"score": 2, "selected_sentences": [1, 4, 7]}));
    }

    #[test]
    fn deserializes_backend_shape() {
        let t: TraitAnnotation =
            serde_json::from_str(r#"{"score": null, "selected_sentences": []}"#).unwrap();
        assert_eq!(t, TraitAnnotation::default());
        let t: TraitAnnotation = serde_json::from_str(r#"{"score": 4}"#).unwrap();
        assert_eq!(t.score, Some(score(4)));
    }

    #[test]
    fn completeness_states() {
        let total = 10;
        let mut t = TraitAnnotation::default();
        assert_eq!(t.completeness(RubricTrait::Content, total), Completeness::Unscored);

        t.score = Some(score(4));
        assert_eq!(
            t.completeness(RubricTrait::Content, total),
            Completeness::Pending { selected: 0, required: 2 }
        );
        t.toggle(0);
        t.toggle(1);
        assert_eq!(t.completeness(RubricTrait::Content, total), Completeness::Complete);
        t.toggle(2);
        assert_eq!(
            t.completeness(RubricTrait::Content, total),
            Completeness::OverSelected { selected: 3, required: 2 }
        );
    }

    #[test]
    fn score_change_keeps_selection() {
        let mut t = TraitAnnotation::scored(score(4));
        t.toggle(0);
        t.toggle(1);
        let before = t.selected_sentences.clone();
        t.score = Some(score(5));
        assert_eq!(t.selected_sentences, before);
        assert_eq!(
            t.completeness(RubricTrait::Language, 10),
            Completeness::OverSelected { selected: 2, required: 0 }
        );
    }

    #[test]
    fn ai_feedback_needs_only_a_score() {
        let t = TraitAnnotation::scored(score(1));
        assert_eq!(t.completeness(RubricTrait::AiFeedback, 10), Completeness::Complete);
    }

    #[test]
    fn stale_indices_do_not_count() {
        let mut t = TraitAnnotation::scored(score(5));
        t.toggle(12);
        assert_eq!(t.selected_within(10), 0);
        assert_eq!(t.out_of_range(10), vec![12]);
        assert_eq!(t.completeness(RubricTrait::Content, 10), Completeness::Complete);
    }

    #[test]
    fn patch_from_new_carries_everything() {
        let new = NewAnnotation {
            essay_id: EssayId::new(3),
            content: TraitAnnotation::scored(score(2)),
            organization: TraitAnnotation::default(),
            language: TraitAnnotation::default(),
            ai_feedback_score: Some(score(5)),
        };
        let patch = AnnotationPatch::from(new.clone());
        assert_eq!(patch.content, Some(new.content));
        assert_eq!(patch.ai_feedback_score, Some(score(5)));
    }

    #[test]
    fn empty_patch_serializes_to_empty_object() {
        let json = serde_json::to_string(&AnnotationPatch::default()).unwrap();
        assert_eq!(json, "{}");
    }

    #[test]
    fn annotation_defaults_missing_fields() {
        let a: Annotation = serde_json::from_str(
            r#"{"id": 1, "essay_id": 9, "content": {"score": 3, "selected_sentences": [0]}}"#,
        )
        .unwrap();
        assert_eq!(a.essay_id, EssayId::new(9));
        assert!(a.trait_record(RubricTrait::AiFeedback).is_none());
        assert_eq!(a.trait_record(RubricTrait::Content).unwrap().score, Some(score(3)));
        assert!(!a.is_submitted);
    }
}
