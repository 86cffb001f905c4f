//! Generation modes and their static behavior profiles.
//!
//! Each [`GenerationMode`] resolves to one [`ModeProfile`] carrying its
//! prompt templates, the keys a parsed record must contain, and the shape of
//! the conversation the record expands into.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::GenerationError;
use crate::prompts::templates;

/// Kind of synthetic data produced from each subject item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GenerationMode {
    #[serde(rename = "vqa")]
    Vqa,
    #[serde(rename = "vqa_nr", alias = "vqa_no_reasoning")]
    VqaNoReasoning,
    #[serde(rename = "tqa", alias = "text_qa")]
    TextQa,
    #[serde(rename = "descript", alias = "describe")]
    Describe,
    #[serde(rename = "generic", alias = "describe_generic")]
    DescribeGeneric,
    #[serde(rename = "vqa_task_desc", alias = "vqa_with_task_desc")]
    VqaWithTaskDesc,
    #[serde(rename = "descript_task_desc", alias = "describe_with_task_desc")]
    DescribeWithTaskDesc,
}

/// How one validated record becomes conversation examples.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversationLayout {
    /// Reasoning-trained turn plus answer-only turn, both about the subject item.
    ReasoningPair,
    /// One question → answer turn about the subject item.
    QuestionAnswer,
    /// Like `ReasoningPair`, but the human turn opens with the record's
    /// description of a hypothetical item; only the answer-only turn
    /// references the subject item.
    HypotheticalPair,
    /// One fixed describe instruction → answer turn.
    Description { generic: bool },
}

/// Static per-mode behavior.
#[derive(Debug, Clone, Copy)]
pub struct ModeProfile {
    pub system_template: &'static str,
    pub generation_template: &'static str,
    pub repair_system_prompt: &'static str,
    pub required_keys: &'static [&'static str],
    pub layout: ConversationLayout,
    /// Whether the subject item is sent to the model with the prompt.
    pub sends_subject: bool,
}

const VQA_PROFILE: ModeProfile = ModeProfile {
    system_template: templates::VQA_SYSTEM,
    generation_template: templates::VQA_GENERATION,
    repair_system_prompt: templates::QA_REPAIR_SYSTEM,
    required_keys: &["Q", "R", "A"],
    layout: ConversationLayout::ReasoningPair,
    sends_subject: true,
};

const VQA_NO_REASONING_PROFILE: ModeProfile = ModeProfile {
    system_template: templates::VQA_NO_REASONING_SYSTEM,
    generation_template: templates::VQA_NO_REASONING_GENERATION,
    repair_system_prompt: templates::QA_NO_REASONING_REPAIR_SYSTEM,
    required_keys: &["Q", "A"],
    layout: ConversationLayout::QuestionAnswer,
    sends_subject: true,
};

const TEXT_QA_PROFILE: ModeProfile = ModeProfile {
    system_template: templates::TEXT_QA_SYSTEM,
    generation_template: templates::TEXT_QA_GENERATION,
    repair_system_prompt: templates::TEXT_QA_REPAIR_SYSTEM,
    required_keys: &["I", "Q", "R", "A"],
    layout: ConversationLayout::HypotheticalPair,
    sends_subject: false,
};

const DESCRIBE_PROFILE: ModeProfile = ModeProfile {
    system_template: templates::DESCRIBE_SYSTEM,
    generation_template: templates::DESCRIBE_GENERATION,
    repair_system_prompt: templates::DESCRIBE_REPAIR_SYSTEM,
    required_keys: &["A"],
    layout: ConversationLayout::Description { generic: false },
    sends_subject: true,
};

const DESCRIBE_GENERIC_PROFILE: ModeProfile = ModeProfile {
    system_template: templates::DESCRIBE_GENERIC_SYSTEM,
    generation_template: templates::DESCRIBE_GENERATION,
    repair_system_prompt: templates::DESCRIBE_REPAIR_SYSTEM,
    required_keys: &["A"],
    layout: ConversationLayout::Description { generic: true },
    sends_subject: true,
};

const VQA_TASK_DESC_PROFILE: ModeProfile = ModeProfile {
    system_template: templates::VQA_TASK_DESC_SYSTEM,
    generation_template: templates::VQA_GENERATION,
    repair_system_prompt: templates::QA_REPAIR_SYSTEM,
    required_keys: &["A"],
    layout: ConversationLayout::Description { generic: false },
    sends_subject: true,
};

const DESCRIBE_TASK_DESC_PROFILE: ModeProfile = ModeProfile {
    system_template: templates::DESCRIBE_TASK_DESC_SYSTEM,
    generation_template: templates::DESCRIBE_GENERATION,
    repair_system_prompt: templates::DESCRIBE_REPAIR_SYSTEM,
    required_keys: &["A"],
    layout: ConversationLayout::Description { generic: false },
    sends_subject: true,
};

impl GenerationMode {
    pub const ALL: [GenerationMode; 7] = [
        GenerationMode::Vqa,
        GenerationMode::VqaNoReasoning,
        GenerationMode::TextQa,
        GenerationMode::Describe,
        GenerationMode::DescribeGeneric,
        GenerationMode::VqaWithTaskDesc,
        GenerationMode::DescribeWithTaskDesc,
    ];

    pub fn profile(self) -> &'static ModeProfile {
        match self {
            GenerationMode::Vqa => &VQA_PROFILE,
            GenerationMode::VqaNoReasoning => &VQA_NO_REASONING_PROFILE,
            GenerationMode::TextQa => &TEXT_QA_PROFILE,
            GenerationMode::Describe => &DESCRIBE_PROFILE,
            GenerationMode::DescribeGeneric => &DESCRIBE_GENERIC_PROFILE,
            GenerationMode::VqaWithTaskDesc => &VQA_TASK_DESC_PROFILE,
            GenerationMode::DescribeWithTaskDesc => &DESCRIBE_TASK_DESC_PROFILE,
        }
    }

    pub fn required_keys(self) -> &'static [&'static str] {
        self.profile().required_keys
    }

    /// Canonical name used in prompt files.
    pub fn as_str(self) -> &'static str {
        match self {
            GenerationMode::Vqa => "vqa",
            GenerationMode::VqaNoReasoning => "vqa_nr",
            GenerationMode::TextQa => "tqa",
            GenerationMode::Describe => "descript",
            GenerationMode::DescribeGeneric => "generic",
            GenerationMode::VqaWithTaskDesc => "vqa_task_desc",
            GenerationMode::DescribeWithTaskDesc => "descript_task_desc",
        }
    }

    /// Rendered system prompt for the generation endpoint.
    pub fn system_prompt(self, dataset_description: &str) -> String {
        templates::render(self.profile().system_template, dataset_description, 0)
    }

    /// Rendered generation instruction asking for `records_per_subject` records.
    pub fn generation_instruction(self, records_per_subject: usize) -> String {
        templates::render(self.profile().generation_template, "", records_per_subject)
    }
}

impl fmt::Display for GenerationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GenerationMode {
    type Err = GenerationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace('-', "_");
        match normalized.as_str() {
            "vqa" => Ok(GenerationMode::Vqa),
            "vqa_nr" | "vqa_no_reasoning" => Ok(GenerationMode::VqaNoReasoning),
            "tqa" | "text_qa" => Ok(GenerationMode::TextQa),
            "descript" | "describe" => Ok(GenerationMode::Describe),
            "generic" | "describe_generic" => Ok(GenerationMode::DescribeGeneric),
            "vqa_task_desc" | "vqa_with_task_desc" => Ok(GenerationMode::VqaWithTaskDesc),
            "descript_task_desc" | "describe_with_task_desc" => {
                Ok(GenerationMode::DescribeWithTaskDesc)
            }
            _ => Err(GenerationError::InvalidMode(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_required_keys() {
        assert_eq!(GenerationMode::Vqa.required_keys(), &["Q", "R", "A"]);
        assert_eq!(GenerationMode::VqaNoReasoning.required_keys(), &["Q", "A"]);
        assert_eq!(GenerationMode::TextQa.required_keys(), &["I", "Q", "R", "A"]);
        for mode in [
            GenerationMode::Describe,
            GenerationMode::DescribeGeneric,
            GenerationMode::VqaWithTaskDesc,
            GenerationMode::DescribeWithTaskDesc,
        ] {
            assert_eq!(mode.required_keys(), &["A"], "{}", mode);
        }
    }

    #[test]
    fn test_name_round_trip() {
        for mode in GenerationMode::ALL {
            assert_eq!(mode.as_str().parse::<GenerationMode>().unwrap(), mode);
            let json = serde_json::to_string(&mode).unwrap();
            assert_eq!(json, format!("\"{}\"", mode.as_str()));
        }
        assert_eq!(
            "Describe-Generic".parse::<GenerationMode>().unwrap(),
            GenerationMode::DescribeGeneric
        );
        let aliased: GenerationMode = serde_json::from_str("\"text_qa\"").unwrap();
        assert_eq!(aliased, GenerationMode::TextQa);
        assert!(matches!(
            "poetry".parse::<GenerationMode>(),
            Err(GenerationError::InvalidMode(_))
        ));
    }

    #[test]
    fn test_text_qa_withholds_subject() {
        assert!(!GenerationMode::TextQa.profile().sends_subject);
        assert!(GenerationMode::Vqa.profile().sends_subject);
    }

    #[test]
    fn test_rendered_prompts() {
        let system = GenerationMode::Describe.system_prompt("radiology");
        assert!(system.contains("expert in radiology"));
        let instruction = GenerationMode::VqaNoReasoning.generation_instruction(4);
        assert!(instruction.starts_with("Generate exactly 4"));
    }
}
