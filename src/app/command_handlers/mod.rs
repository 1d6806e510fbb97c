use crate::app::cli::{help_text, parse_cli_verb, CliVerb};
use crate::app::command_support::load_settings;
use crate::config::Settings;

pub mod tasks;

pub fn run_cli(args: Vec<String>) -> Result<String, String> {
    if args.is_empty() || parse_cli_verb(args[0].as_str()) == CliVerb::Help {
        return Ok(help_text());
    }
    let settings = load_settings()?;
    run_cli_with_settings(args, &settings)
}

pub fn run_cli_with_settings(args: Vec<String>, settings: &Settings) -> Result<String, String> {
    if args.is_empty() {
        return Ok(help_text());
    }

    match parse_cli_verb(args[0].as_str()) {
        CliVerb::Submit => tasks::cmd_submit(settings, &args[1..]),
        CliVerb::Status => tasks::cmd_status(settings, &args[1..]),
        CliVerb::Approve => tasks::cmd_approve(settings, &args[1..]),
        CliVerb::Reject => tasks::cmd_reject(settings, &args[1..]),
        CliVerb::Resume => tasks::cmd_resume(settings, &args[1..]),
        CliVerb::Help => Ok(help_text()),
        CliVerb::Unknown => Err(format!("unknown command `{}`", args[0])),
    }
}
