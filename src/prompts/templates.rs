//! Prompt templates for record generation and format repair.
//!
//! System templates carry a `<DATASET_DESC>` placeholder filled with the
//! prompt set's dataset description; generation templates carry a `<NUM>`
//! placeholder filled with the records-per-subject target.

/// Placeholder for the dataset description in system templates.
pub const DATASET_DESC_PLACEHOLDER: &str = "<DATASET_DESC>";
/// Placeholder for the record count in generation templates.
pub const NUM_PLACEHOLDER: &str = "<NUM>";

/// Suffix of the reasoning-trained human turn.
pub const REASONING_SUFFIX: &str =
    "Return a detailed step-by-step reasoning first and then return the answer.";
/// Suffix of the answer-only human turn.
pub const ANSWER_ONLY_SUFFIX: &str = "Provide a concise answer.";

pub const VQA_SYSTEM: &str = r#"You are an expert in <DATASET_DESC>. Generate high-quality question-answer pairs about a new image, in the style of the example image-question-answer tuples you are given.

For every pair:
1. Study the examples to learn the structure, focus and style of their questions.
2. Look at the new image and find the details relevant to this skill.
3. Ask a clear, specific question about the new image. Include the options in the question when it is multiple-choice.
4. Give a step-by-step reasoning that leads to the answer, pointing at the image evidence.
5. Give a concise answer consistent with the reasoning.

Return a JSON list of objects with the keys "Q" (question), "R" (reasoning) and "A" (answer):
[
  {"Q": "Generated question 1", "R": "Step-by-step reasoning 1", "A": "Generated answer 1"},
  {"Q": "Generated question 2", "R": "Step-by-step reasoning 2", "A": "Generated answer 2"}
]
"#;

pub const VQA_GENERATION: &str = r#"Generate exactly <NUM> question-answer pairs for the last image. Follow the style of the example questions and put each multiple-choice option on its own line, prefixed with its letter. Cover different aspects of the image. Use the JSON keys "Q", "R" and "A" exactly as shown."#;

pub const VQA_NO_REASONING_SYSTEM: &str = r#"You are an expert in <DATASET_DESC>. Given example image-question-answer tuples, generate *diverse* high-quality question-answer pairs about a new image in the same style.

Return a JSON list of objects with the keys "Q" (question) and "A" (answer):
[
  {"Q": "Generated question 1", "A": "Generated answer 1"},
  {"Q": "Generated question 2", "A": "Generated answer 2"}
]
"#;

pub const VQA_NO_REASONING_GENERATION: &str = r#"Generate exactly <NUM> *diverse* question-answer pairs for the last image. Follow the style of the example questions and cover different aspects of the image. Use the JSON keys "Q" and "A" exactly as shown."#;

pub const TEXT_QA_SYSTEM: &str = r#"You are an expert in <DATASET_DESC>. Generate high-quality multiple-choice question-answer pairs in the style of the examples, each about a hypothetical image that you describe yourself.

Return a JSON list of objects with the keys "I" (a detailed description of the hypothetical image), "Q" (question with options), "R" (step-by-step reasoning) and "A" (answer):
[
  {"I": "Image description 1", "Q": "Generated question 1", "R": "Step-by-step reasoning 1", "A": "Generated answer 1"}
]
"#;

pub const TEXT_QA_GENERATION: &str = r#"Generate exactly <NUM> multiple-choice question-answer pairs, each based on a hypothetical image that you describe in the "I" field. The description must contain every detail needed to answer the question. Use the JSON keys "I", "Q", "R" and "A" exactly as shown."#;

pub const VQA_TASK_DESC_SYSTEM: &str = r#"You are an expert in <DATASET_DESC>. Generate high-quality question-answer pairs about a new image that exercise this skill.

Return a JSON list of objects with the keys "Q" (question), "R" (reasoning) and "A" (answer):
[
  {"Q": "Generated question 1", "R": "Step-by-step reasoning 1", "A": "Generated answer 1"}
]
"#;

pub const DESCRIBE_SYSTEM: &str = r#"You are an expert in <DATASET_DESC>. Given example images with their question-answer pairs, write expert descriptions of a new image that use this skill.

Return a JSON list of objects, each with a single key "A" holding one description:
[
  {"A": "Generated description 1"},
  {"A": "Generated description 2"}
]
"#;

pub const DESCRIBE_GENERIC_SYSTEM: &str = r#"Write high-quality, detailed descriptions of the last image you are given.

Return a JSON list of objects, each with a single key "A" holding one description:
[
  {"A": "Generated description 1"},
  {"A": "Generated description 2"}
]
"#;

pub const DESCRIBE_TASK_DESC_SYSTEM: &str = r#"You are an expert in <DATASET_DESC>. Write detailed descriptions of a new image that use this skill.

Return a JSON list of objects, each with a single key "A" holding one description:
[
  {"A": "Generated description 1"}
]
"#;

pub const DESCRIBE_GENERATION: &str = r#"Generate exactly <NUM> highly detailed descriptions of the last image in the JSON format above. Every description must be unique and span several sentences."#;

macro_rules! repair_preamble {
    () => {
        r#"You are a formatting agent. You receive a string that was meant to be a JSON array and rewrite it so that it is valid JSON with the structure below. Fix missing or extra commas, colons and brackets, broken quotation marks and unescaped special characters. Keep the original content; do not invent new records. Every value must be a string. Return ONLY the JSON."#
    };
}

pub const QA_REPAIR_SYSTEM: &str = concat!(
    repair_preamble!(),
    "\n\n",
    r#"[
  {"Q": "Question 1", "R": "Reasoning 1", "A": "Answer 1"},
  {"Q": "Question 2", "R": "Reasoning 2", "A": "Answer 2"}
]"#
);

pub const QA_NO_REASONING_REPAIR_SYSTEM: &str = concat!(
    repair_preamble!(),
    "\n\n",
    r#"[
  {"Q": "Question 1", "A": "Answer 1"},
  {"Q": "Question 2", "A": "Answer 2"}
]"#
);

pub const TEXT_QA_REPAIR_SYSTEM: &str = concat!(
    repair_preamble!(),
    "\n\n",
    r#"[
  {"I": "Image description 1", "Q": "Question 1", "R": "Reasoning 1", "A": "Answer 1"}
]"#
);

pub const DESCRIBE_REPAIR_SYSTEM: &str = concat!(
    repair_preamble!(),
    "\n\n",
    r#"[
  {"A": "Description 1"},
  {"A": "Description 2"}
]"#
);

/// Instruction sent ahead of the malformed text in a repair call.
pub const REPAIR_INSTRUCTION: &str =
    "Fix the string above so that it becomes valid JSON in the required format.";

/// Fill the placeholders of a system/generation template pair.
pub fn render(template: &str, dataset_description: &str, records_per_subject: usize) -> String {
    template
        .replace(DATASET_DESC_PLACEHOLDER, dataset_description)
        .replace(NUM_PLACEHOLDER, &records_per_subject.to_string())
}
