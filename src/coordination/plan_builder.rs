use crate::coordination::task::{summarize_kinds, CapabilityKind, Plan, Step};

const DIAGNOSIS_KEYWORDS: &[&str] = &[
    "diagnose",
    "diagnosed",
    "diagnosing",
    "diagnosis",
    "diagnostic",
    "diagnostics",
    "analyse",
    "analyze",
    "analyzing",
    "analysis",
    "investigate",
    "investigating",
    "investigation",
    "troubleshoot",
    "troubleshooting",
    "inspect",
    "inspecting",
    "inspection",
    "check",
    "checking",
    "verify",
    "verifying",
    "verification",
    "examine",
    "examining",
    "debug",
    "debugging",
    "triage",
    "triaging",
    "identify",
    "identifying",
    "why",
];

const AUTOMATION_KEYWORDS: &[&str] = &[
    "automate",
    "automating",
    "automation",
    "script",
    "scripts",
    "scripting",
    "fix",
    "fixing",
    "remediate",
    "remediating",
    "remediation",
    "resolve",
    "resolving",
    "restart",
    "restarting",
    "reboot",
    "rebooting",
    "patch",
    "patching",
    "deploy",
    "deploying",
    "redeploy",
    "execute",
    "executing",
    "execution",
    "run",
    "rerun",
    "command",
    "commands",
    "playbook",
    "install",
    "installing",
    "restrict",
    "configure",
    "configuring",
    "reconfigure",
    "apply",
    "applying",
    "mitigate",
    "mitigating",
    "mitigation",
    "rollback",
    "rotate",
    "rotating",
    "clean",
    "cleanup",
    "scale",
    "scaling",
];

const WRITING_KEYWORDS: &[&str] = &[
    "email",
    "emails",
    "e-mail",
    "summary",
    "summaries",
    "summarize",
    "summarise",
    "summarizing",
    "report",
    "reporting",
    "document",
    "documenting",
    "documentation",
    "notify",
    "notifying",
    "notification",
    "communicate",
    "communication",
    "letter",
    "announce",
    "announcement",
    "message",
    "explain",
    "explanation",
    "writeup",
    "write-up",
    "postmortem",
    "post-mortem",
    "briefing",
];

/// Verbs that only say "produce something"; the object decides the kind.
const PRODUCER_VERBS: &[&str] = &[
    "write", "draft", "compose", "create", "generate", "prepare", "produce", "make",
];

/// Producer verbs that fall back to writing when no object keyword follows.
const WRITING_PRODUCERS: &[&str] = &["write", "draft", "compose"];

const LEADING_CONNECTORS: &[&str] = &[
    "and",
    "then",
    "also",
    "finally",
    "please",
    "next",
    "afterwards",
    "afterward",
    "lastly",
];

const SPLIT_CONNECTORS: &[&str] = &["and", "then"];

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlanError {
    #[error("no capability matches the request")]
    NoCapability,
}

/// Turns a free-form operator request into a fixed-order plan.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlanBuilder;

impl PlanBuilder {
    pub fn new() -> Self {
        Self
    }

    pub fn build(&self, request: &str) -> Result<Plan, PlanError> {
        let mut grouped: Vec<(CapabilityKind, Vec<String>)> = Vec::new();
        let mut last_kind: Option<CapabilityKind> = None;

        for clause in split_clauses(request) {
            match classify_clause(&clause) {
                Some(kind) => {
                    push_clause(&mut grouped, kind, clause);
                    last_kind = Some(kind);
                }
                None => {
                    // Clauses without an action keyword continue the previous one.
                    if let Some(kind) = last_kind {
                        if let Some(last) = grouped
                            .iter_mut()
                            .find(|(candidate, _)| *candidate == kind)
                            .and_then(|(_, clauses)| clauses.last_mut())
                        {
                            last.push_str(", ");
                            last.push_str(&clause);
                        }
                    }
                }
            }
        }

        if grouped.is_empty() {
            return Err(PlanError::NoCapability);
        }

        let mut steps = Vec::new();
        for kind in CapabilityKind::ALL {
            let Some((_, clauses)) = grouped.iter().find(|(candidate, _)| *candidate == kind)
            else {
                continue;
            };
            let description = clauses.join("; ");
            let step = if kind == CapabilityKind::Writing {
                Step::new(kind, description).summarizing(0..steps.len())
            } else {
                Step::new(kind, description)
            };
            steps.push(step);
        }

        let summary = summarize_kinds(&steps);
        Ok(Plan::new(steps, summary))
    }
}

fn push_clause(
    grouped: &mut Vec<(CapabilityKind, Vec<String>)>,
    kind: CapabilityKind,
    clause: String,
) {
    match grouped.iter_mut().find(|(candidate, _)| *candidate == kind) {
        Some((_, clauses)) => clauses.push(clause),
        None => grouped.push((kind, vec![clause])),
    }
}

fn split_clauses(request: &str) -> Vec<String> {
    let mut clauses = Vec::new();
    for segment in split_on_punctuation(request) {
        for clause in split_on_connectors(&segment) {
            let cleaned = clean_clause(&clause);
            if !cleaned.is_empty() {
                clauses.push(cleaned);
            }
        }
    }
    clauses
}

/// Splits on `;`, `,`, line breaks and sentence-ending punctuation. A period only
/// ends a sentence when followed by whitespace or the end of input, so versions
/// and addresses like `10.0.0.1` stay intact.
fn split_on_punctuation(request: &str) -> Vec<String> {
    let mut segments = Vec::new();
    let mut current = String::new();
    let mut chars = request.chars().peekable();
    while let Some(ch) = chars.next() {
        let boundary = match ch {
            ';' | ',' | '\n' | '\r' => true,
            '.' | '!' | '?' => chars.peek().map_or(true, |next| next.is_whitespace()),
            _ => false,
        };
        if boundary {
            segments.push(std::mem::take(&mut current));
        } else {
            current.push(ch);
        }
    }
    segments.push(current);
    segments
}

fn split_on_connectors(segment: &str) -> Vec<String> {
    let words: Vec<&str> = segment.split_whitespace().collect();
    let mut clauses = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    for (index, word) in words.iter().enumerate() {
        let normalized = normalize_word(word);
        let splits_here = SPLIT_CONNECTORS.contains(&normalized.as_str())
            && !current.is_empty()
            && words
                .get(index + 1)
                .is_some_and(|next| starts_action(next, words.get(index + 2).copied()));
        if splits_here {
            clauses.push(current.join(" "));
            current.clear();
            continue;
        }
        current.push(word);
    }
    if !current.is_empty() {
        clauses.push(current.join(" "));
    }
    clauses
}

fn starts_action(word: &str, following: Option<&str>) -> bool {
    let token = normalize_word(word);
    if PRODUCER_VERBS.contains(&token.as_str()) {
        return true;
    }
    let next = following.map(normalize_word);
    token_kind(&token, next.as_deref()).is_some()
}

fn clean_clause(clause: &str) -> String {
    let mut words: Vec<&str> = clause.split_whitespace().collect();
    while words
        .first()
        .is_some_and(|word| LEADING_CONNECTORS.contains(&normalize_word(word).as_str()))
    {
        words.remove(0);
    }
    while words
        .last()
        .is_some_and(|word| SPLIT_CONNECTORS.contains(&normalize_word(word).as_str()))
    {
        words.pop();
    }
    words
        .join(" ")
        .trim_end_matches(|c: char| matches!(c, '.' | ',' | ';' | ':' | '!' | '?'))
        .trim()
        .to_string()
}

fn normalize_word(word: &str) -> String {
    word.to_ascii_lowercase()
        .replace('\'', "")
        .trim_matches(|c: char| !c.is_ascii_alphanumeric() && c != '_' && c != '-')
        .to_string()
}

fn tokenize(input: &str) -> Vec<String> {
    input
        .to_ascii_lowercase()
        .replace('\'', "")
        .split(|c: char| !c.is_ascii_alphanumeric() && c != '_' && c != '-')
        .filter(|token| !token.is_empty())
        .map(str::to_string)
        .collect()
}

fn token_kind(token: &str, next: Option<&str>) -> Option<CapabilityKind> {
    if token == "root" && next.is_some_and(|next| next == "cause" || next == "causes") {
        return Some(CapabilityKind::Diagnosis);
    }
    if DIAGNOSIS_KEYWORDS.contains(&token) {
        Some(CapabilityKind::Diagnosis)
    } else if AUTOMATION_KEYWORDS.contains(&token) {
        Some(CapabilityKind::Automation)
    } else if WRITING_KEYWORDS.contains(&token) {
        Some(CapabilityKind::Writing)
    } else {
        None
    }
}

/// Kind of the first action keyword in the clause. A producer verb such as
/// "write" or "generate" defers to the first kind-specific keyword after it.
pub fn classify_clause(clause: &str) -> Option<CapabilityKind> {
    let tokens = tokenize(clause);
    let mut pending_producer: Option<&str> = None;
    for (index, token) in tokens.iter().enumerate() {
        if pending_producer.is_none() && PRODUCER_VERBS.contains(&token.as_str()) {
            pending_producer = Some(token.as_str());
            continue;
        }
        let next = tokens.get(index + 1).map(String::as_str);
        if let Some(kind) = token_kind(token, next) {
            return Some(kind);
        }
    }
    match pending_producer {
        Some(verb) if WRITING_PRODUCERS.contains(&verb) => Some(CapabilityKind::Writing),
        _ => None,
    }
}
