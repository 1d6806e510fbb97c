use crate::app::command_support::{build_coordinator, now_secs};
use crate::config::Settings;
use crate::coordination::Task;

const REQUIRE_APPROVAL_FLAG: &str = "--require-approval";

pub fn cmd_submit(settings: &Settings, args: &[String]) -> Result<String, String> {
    let mut require_approval = false;
    let mut words = Vec::new();
    for arg in args {
        if arg == REQUIRE_APPROVAL_FLAG {
            require_approval = true;
        } else {
            words.push(arg.as_str());
        }
    }
    let request = words.join(" ");
    if request.trim().is_empty() {
        return Err(format!("usage: submit [{REQUIRE_APPROVAL_FLAG}] <request...>"));
    }

    let coordinator = build_coordinator(settings)?;
    let task = coordinator
        .submit(&request, require_approval, now_secs())
        .map_err(|e| e.to_string())?;
    render_task(&task)
}

pub fn cmd_status(settings: &Settings, args: &[String]) -> Result<String, String> {
    let task_id = single_task_id("status", args)?;
    let coordinator = build_coordinator(settings)?;
    let task = coordinator.status(task_id).map_err(|e| e.to_string())?;
    render_task(&task)
}

pub fn cmd_approve(settings: &Settings, args: &[String]) -> Result<String, String> {
    let task_id = single_task_id("approve", args)?;
    let coordinator = build_coordinator(settings)?;
    let task = coordinator
        .approve(task_id, now_secs())
        .map_err(|e| e.to_string())?;
    render_task(&task)
}

pub fn cmd_reject(settings: &Settings, args: &[String]) -> Result<String, String> {
    let task_id = single_task_id("reject", args)?;
    let coordinator = build_coordinator(settings)?;
    let task = coordinator
        .reject(task_id, now_secs())
        .map_err(|e| e.to_string())?;
    render_task(&task)
}

pub fn cmd_resume(settings: &Settings, args: &[String]) -> Result<String, String> {
    let task_id = single_task_id("resume", args)?;
    let coordinator = build_coordinator(settings)?;
    let task = coordinator
        .resume(task_id, now_secs())
        .map_err(|e| e.to_string())?;
    render_task(&task)
}

fn single_task_id<'a>(verb: &str, args: &'a [String]) -> Result<&'a str, String> {
    if args.len() != 1 {
        return Err(format!("usage: {verb} <task_id>"));
    }
    Ok(args[0].as_str())
}

fn render_task(task: &Task) -> Result<String, String> {
    serde_json::to_string_pretty(task).map_err(|e| format!("failed to encode task: {e}"))
}
