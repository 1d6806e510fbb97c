#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CliVerb {
    Submit,
    Status,
    Approve,
    Reject,
    Resume,
    Help,
    Unknown,
}

pub fn parse_cli_verb(input: &str) -> CliVerb {
    match input {
        "submit" => CliVerb::Submit,
        "status" => CliVerb::Status,
        "approve" => CliVerb::Approve,
        "reject" => CliVerb::Reject,
        "resume" => CliVerb::Resume,
        "help" | "--help" | "-h" => CliVerb::Help,
        _ => CliVerb::Unknown,
    }
}

pub fn cli_help_lines() -> Vec<String> {
    vec![
        "Commands:".to_string(),
        "  submit [--require-approval] <request...>  Plan a request and run or park it"
            .to_string(),
        "  status <task_id>                          Print the stored task snapshot".to_string(),
        "  approve <task_id>                         Approve a parked task and run its plan"
            .to_string(),
        "  reject <task_id>                          Reject a parked task".to_string(),
        "  resume <task_id>                          Continue an interrupted task".to_string(),
        "  help                                      Show this help".to_string(),
    ]
}

pub(crate) fn help_text() -> String {
    cli_help_lines().join("\n")
}
