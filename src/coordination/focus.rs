use crate::config::{DEFAULT_REQUEST_CONTEXT_MAX_CHARS, MIN_REQUEST_CONTEXT_MAX_CHARS};
use crate::coordination::task::{Step, Task};

const TRUNCATION_MARKER: &str = "...";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FocusLimits {
    pub request_context_max_chars: usize,
}

impl Default for FocusLimits {
    fn default() -> Self {
        Self {
            request_context_max_chars: DEFAULT_REQUEST_CONTEXT_MAX_CHARS,
        }
    }
}

impl FocusLimits {
    pub fn new(request_context_max_chars: usize) -> Self {
        Self {
            request_context_max_chars: request_context_max_chars.max(MIN_REQUEST_CONTEXT_MAX_CHARS),
        }
    }
}

/// Builds the input handed to a capability for `step`.
///
/// The step description comes first, then one delimited block per referenced
/// prior result, then the (possibly truncated) original request. The output is
/// a pure function of its arguments.
pub fn focus(step: &Step, task: &Task, limits: FocusLimits) -> String {
    let mut sections = vec![step.description.trim().to_string()];

    for &position in &step.summarizes {
        let Some(result) = task.history.get(position) else {
            continue;
        };
        let label = position + 1;
        sections.push(format!(
            "--- prior result {label}: {} ({}) ---\n{}\n--- end prior result {label} ---",
            result.step.kind,
            result.status,
            result.summary.trim()
        ));
    }

    let request = truncate_at_word(task.request.trim(), limits.request_context_max_chars);
    if !request.is_empty() {
        sections.push(format!(
            "--- original request (context) ---\n{request}\n--- end original request ---"
        ));
    }

    sections.join("\n\n")
}

/// Cuts `text` to at most `max_chars` characters, marker included, backing off
/// to the last whitespace so no word is split.
pub fn truncate_at_word(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let marker_len = TRUNCATION_MARKER.chars().count();
    if max_chars <= marker_len {
        return TRUNCATION_MARKER.chars().take(max_chars).collect();
    }
    let budget = max_chars - marker_len;
    let end = text
        .char_indices()
        .nth(budget)
        .map(|(index, _)| index)
        .unwrap_or(text.len());
    let head = &text[..end];
    let next_is_break = text[end..].chars().next().is_some_and(char::is_whitespace);
    let cut = if next_is_break {
        head
    } else {
        match head.rfind(char::is_whitespace) {
            Some(index) if index > 0 => &head[..index],
            _ => head,
        }
    };
    format!("{}{TRUNCATION_MARKER}", cut.trim_end())
}
