use std::collections::HashSet;

use tracing::instrument;

use rater_core::errors::ServiceError;
use rater_core::essay::{BlindAssignment, EssaySummary};
use rater_core::ids::{BlindId, EssayId};
use rater_core::services::{AnnotationStore, EssayStore};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SequenceEntry {
    pub blind_id: BlindId,
    pub essay_id: EssayId,
    pub display_order: u32,
    pub annotated: bool,
}

/// The rater's blind essay order, with done/not-done per essay.
#[derive(Clone, Debug, Default)]
pub struct EssaySequence {
    entries: Vec<SequenceEntry>,
}

impl EssaySequence {
    pub fn from_parts(assignments: Vec<BlindAssignment>, summaries: &[EssaySummary]) -> Self {
        let annotated: HashSet<EssayId> = summaries
            .iter()
            .filter(|s| s.is_annotated)
            .map(|s| s.id)
            .collect();
        let mut entries: Vec<SequenceEntry> = assignments
            .into_iter()
            .map(|a| SequenceEntry {
                annotated: annotated.contains(&a.essay_id),
                blind_id: a.blind_id,
                essay_id: a.essay_id,
                display_order: a.display_order,
            })
            .collect();
        entries.sort_by_key(|e| e.display_order);
        Self { entries }
    }

    #[instrument(skip_all)]
    pub async fn load(
        annotations: &dyn AnnotationStore,
        essays: &dyn EssayStore,
    ) -> Result<Self, ServiceError> {
        let assignments = annotations.list_blind_ids().await?;
        let summaries = essays.list().await?;
        Ok(Self::from_parts(assignments, &summaries))
    }

    pub fn entries(&self) -> &[SequenceEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn resolve(&self, blind_id: &BlindId) -> Result<EssayId, ServiceError> {
        self.entries
            .iter()
            .find(|e| &e.blind_id == blind_id)
            .map(|e| e.essay_id)
            .ok_or_else(|| ServiceError::NotFound(format!("no essay assigned as {blind_id}")))
    }

    pub fn position(&self, essay_id: EssayId) -> Option<usize> {
        self.entries.iter().position(|e| e.essay_id == essay_id)
    }

    pub fn entry(&self, essay_id: EssayId) -> Option<&SequenceEntry> {
        self.entries.iter().find(|e| e.essay_id == essay_id)
    }

    /// First un-annotated essay after `current`, wrapping to the start.
    /// `current` itself is never offered.
    pub fn next_unannotated(&self, current: EssayId) -> Option<&SequenceEntry> {
        let start = self.position(current).map_or(0, |p| p + 1);
        self.entries[start..]
            .iter()
            .chain(self.entries[..start].iter())
            .find(|e| !e.annotated && e.essay_id != current)
    }

    pub fn mark_annotated(&mut self, essay_id: EssayId) {
        if let Some(e) = self.entries.iter_mut().find(|e| e.essay_id == essay_id) {
            e.annotated = true;
        }
    }

    /// Blind title shown instead of the essay's real identity.
    pub fn display_title(&self, essay_id: EssayId) -> Option<String> {
        self.entry(essay_id).map(|e| format!("Item #{}", e.display_order))
    }
}
