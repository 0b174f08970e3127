//! Response formatter — turns raw generator output into a structured
//! "Diagnosis" + "First Aid Steps" message.
//!
//! Raw completions arrive with bracketed artifacts, duplicated section
//! labels, repeated fragments and inconsistent casing. The formatter is an
//! explicit pipeline of named transform steps:
//!
//!   strip_artifacts → split_sections → classify_emergency → dedupe_steps → render
//!
//! Each step is pure and unit-tested on its own; the whole pipeline is
//! deterministic and idempotent on already-clean input.

use std::sync::OnceLock;

use regex::Regex;

pub const NO_DIAGNOSIS_FALLBACK: &str =
    "No specific diagnosis provided. Please consult a medical professional.";

pub const EMERGENCY_STEP: &str = "Seek medical evaluation immediately.";

/// Phrases that mark a line as first-aid language. Lines carrying these are
/// excluded from the diagnosis section.
const FIRST_AID_KEYWORDS: &[&str] = &[
    "rest",
    "hydration",
    "fluids",
    "paracetamol",
    "ibuprofen",
    "monitor",
    "seek medical",
    "compress",
    "lay flat",
    "nasal drops",
    "ors",
    "warm salt water",
];

/// Phrasings that all collapse into the single canonical emergency step.
const EMERGENCY_PHRASES: &[&str] = &[
    "seek emergency care",
    "seek urgent care",
    "urgent care",
    "seek emergency medical care",
    "seek medical evaluation",
    "call 911",
];

fn bracket_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\[[^\]]*\]").expect("bracket regex is valid"))
}

/// Run the full cleaning pipeline.
pub fn format_response(raw: &str) -> String {
    let lines = strip_artifacts(raw);
    let (diagnosis_lines, first_aid_lines) = split_sections(&lines);
    let steps = dedupe_steps(classify_emergency(first_aid_lines));

    let diagnosis = if diagnosis_lines.is_empty() {
        NO_DIAGNOSIS_FALLBACK.to_string()
    } else {
        diagnosis_lines.join(" ")
    };

    render(&diagnosis, &steps)
}

/// Step 1: drop `[...]` artifacts and a literal "Answer:" prefix, then split
/// into trimmed non-empty lines.
pub(crate) fn strip_artifacts(raw: &str) -> Vec<String> {
    let without_brackets = bracket_regex().replace_all(raw, "");
    let text = without_brackets.trim();
    let text = text.strip_prefix("Answer:").unwrap_or(text);

    text.lines()
        .map(|l| l.trim())
        .filter(|l| !l.is_empty())
        .map(|l| l.to_string())
        .collect()
}

fn contains_first_aid_keyword(line: &str) -> bool {
    let lower = line.to_lowercase();
    FIRST_AID_KEYWORDS.iter().any(|k| lower.contains(k))
}

/// Step 2: walk lines with a current-section tag. Returns
/// `(diagnosis_lines, first_aid_lines)`.
///
/// Untagged leading lines count toward the diagnosis; any diagnosis-side
/// line carrying first-aid language is dropped so treatment advice cannot
/// leak into the diagnosis text.
pub(crate) fn split_sections(lines: &[String]) -> (Vec<String>, Vec<String>) {
    #[derive(PartialEq)]
    enum Section {
        Preamble,
        Diagnosis,
        FirstAid,
    }

    let mut section = Section::Preamble;
    let mut diagnosis = Vec::new();
    let mut first_aid = Vec::new();

    for line in lines {
        if let Some(rest) = tagged_rest(line, "diagnosis:") {
            section = Section::Diagnosis;
            if !rest.is_empty() && !contains_first_aid_keyword(&rest) {
                diagnosis.push(rest);
            }
            continue;
        }
        // "First Aid:" in raw output, "First Aid Steps:" in our own rendering
        if let Some(rest) =
            tagged_rest(line, "first aid steps:").or_else(|| tagged_rest(line, "first aid:"))
        {
            section = Section::FirstAid;
            if !rest.is_empty() {
                first_aid.push(rest);
            }
            continue;
        }

        match section {
            Section::Preamble | Section::Diagnosis => {
                if !contains_first_aid_keyword(line) {
                    diagnosis.push(line.clone());
                }
            }
            Section::FirstAid => {
                let step = line.trim_start_matches("- ").trim();
                if !step.is_empty() {
                    first_aid.push(step.to_string());
                }
            }
        }
    }

    (diagnosis, first_aid)
}

fn tagged_rest(line: &str, tag: &str) -> Option<String> {
    let head = line.get(..tag.len())?;
    if head.eq_ignore_ascii_case(tag) {
        Some(line[tag.len()..].trim().to_string())
    } else {
        None
    }
}

/// Step 3: replace every emergency-phrased step with the canonical line.
/// Deduplication afterwards guarantees it appears at most once, in the
/// position of its first occurrence.
pub(crate) fn classify_emergency(steps: Vec<String>) -> Vec<String> {
    steps
        .into_iter()
        .map(|step| {
            let lower = step.to_lowercase();
            if EMERGENCY_PHRASES.iter().any(|p| lower.contains(p)) {
                EMERGENCY_STEP.to_string()
            } else {
                step
            }
        })
        .collect()
}

/// Step 4: case-insensitive dedup (trailing periods ignored) preserving
/// first-seen order and first-seen spelling.
pub(crate) fn dedupe_steps(steps: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();
    for step in steps {
        let key = step.trim_end_matches('.').to_lowercase();
        if seen.insert(key) {
            out.push(step);
        }
    }
    out
}

/// Step 5: assemble the final message.
pub(crate) fn render(diagnosis: &str, steps: &[String]) -> String {
    let mut out = format!("Diagnosis:\n{}", diagnosis);
    if !steps.is_empty() {
        out.push_str("\n\nFirst Aid Steps:");
        for step in steps {
            out.push_str("\n- ");
            out.push_str(step);
        }
    }
    out
}
