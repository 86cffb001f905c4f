//! Deterministic expansion of validated records into conversation examples.

use serde::{Deserialize, Serialize};

use super::mode::ConversationLayout;
use super::validator::{RawRecord, RecordError};
use crate::prompts::templates::{ANSWER_ONLY_SUFFIX, REASONING_SUFFIX};

/// Token marking where the subject item sits in a human turn.
pub const ITEM_TOKEN: &str = "<image>";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    Human,
    Gpt,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub from: Speaker,
    pub value: String,
}

impl ConversationTurn {
    pub fn human(value: impl Into<String>) -> Self {
        Self {
            from: Speaker::Human,
            value: value.into(),
        }
    }

    pub fn gpt(value: impl Into<String>) -> Self {
        Self {
            from: Speaker::Gpt,
            value: value.into(),
        }
    }
}

/// One training example as stored in shard manifests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormattedExample {
    pub id: usize,
    #[serde(
        rename = "image_1",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub subject_reference: Option<String>,
    pub conversations: Vec<ConversationTurn>,
    #[serde(default)]
    pub icl_indices: Vec<usize>,
    #[serde(default)]
    pub keyword: String,
}

/// Per-prompt data shared by every example built from one reply.
#[derive(Debug, Clone, Copy)]
pub struct ExampleContext<'a> {
    pub subject_reference: Option<&'a str>,
    pub icl_indices: &'a [usize],
    pub keyword: &'a str,
    pub dataset_description: &'a str,
}

fn field<'r>(record: &'r RawRecord, key: &str) -> Result<&'r str, RecordError> {
    record.get(key).ok_or_else(|| RecordError::MissingKey {
        index: 0,
        key: key.to_string(),
    })
}

/// Expand one record into one or two examples sharing `id`.
pub fn format_record(
    layout: ConversationLayout,
    record: &RawRecord,
    id: usize,
    ctx: &ExampleContext<'_>,
) -> Result<Vec<FormattedExample>, RecordError> {
    let example = |subject: Option<&str>, human: String, gpt: String| FormattedExample {
        id,
        subject_reference: subject.map(str::to_string),
        conversations: vec![ConversationTurn::human(human), ConversationTurn::gpt(gpt)],
        icl_indices: ctx.icl_indices.to_vec(),
        keyword: ctx.keyword.to_string(),
    };
    let choices = record
        .choices()
        .map(|c| format!(" {} ", c))
        .unwrap_or_default();

    let examples = match layout {
        ConversationLayout::ReasoningPair => {
            let (q, r, a) = (field(record, "Q")?, field(record, "R")?, field(record, "A")?);
            vec![
                example(
                    ctx.subject_reference,
                    format!("{} {}{}\n{}", ITEM_TOKEN, q, choices, REASONING_SUFFIX),
                    format!("{}\n{}", r, a),
                ),
                example(
                    ctx.subject_reference,
                    format!("{} {}{}\n{}", ITEM_TOKEN, q, choices, ANSWER_ONLY_SUFFIX),
                    a.to_string(),
                ),
            ]
        }
        ConversationLayout::QuestionAnswer => {
            let (q, a) = (field(record, "Q")?, field(record, "A")?);
            vec![example(
                ctx.subject_reference,
                format!("{} {}{}", ITEM_TOKEN, q, choices),
                a.to_string(),
            )]
        }
        ConversationLayout::HypotheticalPair => {
            let (i, q, r, a) = (
                field(record, "I")?,
                field(record, "Q")?,
                field(record, "R")?,
                field(record, "A")?,
            );
            vec![
                example(
                    None,
                    format!("{}\n{}{}\n{}", i, q, choices, REASONING_SUFFIX),
                    format!("{}\n{}", r, a),
                ),
                example(
                    ctx.subject_reference,
                    format!("{}\n{}{}\n{}", i, q, choices, ANSWER_ONLY_SUFFIX),
                    a.to_string(),
                ),
            ]
        }
        ConversationLayout::Description { generic } => {
            let instruction = if generic {
                "Describe the image.".to_string()
            } else {
                format!("Describe the image as an expert in {}", ctx.dataset_description)
            };
            vec![example(
                ctx.subject_reference,
                format!("{} {}", ITEM_TOKEN, instruction),
                field(record, "A")?.to_string(),
            )]
        }
    };

    Ok(examples)
}
