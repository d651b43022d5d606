use std::borrow::Cow;

use serde::{Deserialize, Serialize};

use crate::ids::{BlindId, EssayId};
use crate::sentences::split_sentences;

/// A passage of the source paper the essay is expected to draw on.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Evidence {
    #[serde(default)]
    pub section: String,
    pub original_sentence: String,
}

/// Full essay as served for annotation. Read-only to the client.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Essay {
    pub id: EssayId,
    pub title: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub question: String,
    #[serde(default)]
    pub sentences: Option<Vec<String>>,
    /// JSON-encoded list of [`Evidence`].
    #[serde(default)]
    pub evidence: Option<String>,
    /// AI summary / feedback blob shown next to the essay.
    #[serde(default)]
    pub summary: Option<serde_json::Value>,
    #[serde(default)]
    pub paper_summary: Option<String>,
    #[serde(default)]
    pub blind_id: Option<BlindId>,
    #[serde(default)]
    pub is_annotated: bool,
}

impl Essay {
    /// Sentences as served, or split locally when the backend sent none.
    pub fn sentences(&self) -> Cow<'_, [String]> {
        match &self.sentences {
            Some(list) => Cow::Borrowed(list.as_slice()),
            None => Cow::Owned(split_sentences(&self.content)),
        }
    }

    pub fn total_sentences(&self) -> usize {
        match &self.sentences {
            Some(list) => list.len(),
            None => split_sentences(&self.content).len(),
        }
    }

    /// Decode the evidence list. `Ok(vec![])` when there is none.
    pub fn evidence(&self) -> Result<Vec<Evidence>, serde_json::Error> {
        match self.evidence.as_deref().map(str::trim) {
            None | Some("") => Ok(Vec::new()),
            Some(raw) => serde_json::from_str(raw),
        }
    }
}

/// One row of the essay list.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EssaySummary {
    pub id: EssayId,
    pub title: String,
    #[serde(default)]
    pub question: String,
    #[serde(default)]
    pub is_annotated: bool,
    #[serde(default)]
    pub blind_id: Option<BlindId>,
    #[serde(default)]
    pub paper_summary: Option<String>,
}

/// Position of an essay in the rater's blind sequence.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlindAssignment {
    pub blind_id: BlindId,
    pub essay_id: EssayId,
    pub display_order: u32,
}
