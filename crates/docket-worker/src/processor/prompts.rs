//! Model instructions and response schemas.

use docket_models::{AnalysisOptions, Document};
use serde_json::{json, Value};

pub const ANALYSIS_INSTRUCTIONS: &str = "You are a litigation support analyst reviewing \
discovery evidence. Read the document and report what matters for the case: a neutral \
summary, the kind of document it is, the facts, people and dates it establishes, how \
relevant it is to the matter on a 0-10 scale with a short rationale, and any sign that \
it may be privileged. Do not speculate beyond the text.";

pub const TRANSCRIPTION_INSTRUCTIONS: &str = "Transcribe this recording verbatim. \
Start a new line at each change of speaker and label speakers consistently \
(Speaker 1, Speaker 2, ...). Mark unclear passages as [inaudible]. \
Return only the transcript.";

/// JSON schema the analysis response must follow.
pub fn analysis_schema() -> Value {
    json!({
        "type": "OBJECT",
        "properties": {
            "summary": { "type": "STRING" },
            "document_type": { "type": "STRING" },
            "relevance_score": { "type": "INTEGER", "minimum": 0, "maximum": 10 },
            "relevance_rationale": { "type": "STRING" },
            "key_facts": { "type": "ARRAY", "items": { "type": "STRING" } },
            "people": {
                "type": "ARRAY",
                "items": {
                    "type": "OBJECT",
                    "properties": {
                        "name": { "type": "STRING" },
                        "role": { "type": "STRING" }
                    },
                    "required": ["name"]
                }
            },
            "key_dates": {
                "type": "ARRAY",
                "items": {
                    "type": "OBJECT",
                    "properties": {
                        "date": { "type": "STRING" },
                        "event": { "type": "STRING" }
                    },
                    "required": ["date", "event"]
                }
            },
            "privilege_flags": { "type": "ARRAY", "items": { "type": "STRING" } },
            "hot_document": { "type": "BOOLEAN" }
        },
        "required": ["summary", "document_type", "relevance_score", "key_facts"]
    })
}

/// User prompt for an analysis of `text`.
pub(crate) fn analysis_prompt(document: &Document, text: &str, options: &AnalysisOptions) -> String {
    let mut prompt = format!("Document: {}\n", document.filename);

    if let Some(perspective) = &options.perspective {
        prompt.push_str(&format!("Review perspective: {}\n", perspective));
    }
    if let Some(party) = &options.party {
        prompt.push_str(&format!("Reviewing on behalf of: {}\n", party));
    }
    if let Some(instructions) = &options.instructions {
        prompt.push_str(&format!("Reviewer instructions: {}\n", instructions));
    }

    prompt.push_str("\n---\n");
    prompt.push_str(text);
    prompt
}
