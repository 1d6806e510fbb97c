use opspilot::coordination::{CapabilityKind, PlanBuilder, PlanError};

#[test]
fn plan_builder_maps_each_clause_to_one_step_in_fixed_order() {
    let plan = PlanBuilder::new()
        .build(
            "Diagnose why the checkout service is returning 502 errors, write a script to restart the failing pods, and email the on-call team a summary.",
        )
        .expect("plan");

    let kinds = plan.steps().iter().map(|s| s.kind).collect::<Vec<_>>();
    assert_eq!(
        kinds,
        vec![
            CapabilityKind::Diagnosis,
            CapabilityKind::Automation,
            CapabilityKind::Writing
        ]
    );
    assert_eq!(
        plan.steps()[0].description,
        "Diagnose why the checkout service is returning 502 errors"
    );
    assert_eq!(
        plan.steps()[1].description,
        "write a script to restart the failing pods"
    );
    assert_eq!(
        plan.steps()[2].description,
        "email the on-call team a summary"
    );
    assert_eq!(plan.steps()[2].summarizes, vec![0, 1]);
    assert_eq!(plan.cursor(), 0);
    assert_eq!(plan.summary(), "diagnosis -> automation -> writing");
}

#[test]
fn plan_builder_orders_steps_by_kind_not_by_mention() {
    let plan = PlanBuilder::new()
        .build("Email the team a summary then check the disk usage on db-01")
        .expect("plan");

    assert_eq!(plan.len(), 2);
    assert_eq!(plan.steps()[0].kind, CapabilityKind::Diagnosis);
    assert_eq!(plan.steps()[0].description, "check the disk usage on db-01");
    assert_eq!(plan.steps()[1].kind, CapabilityKind::Writing);
    assert_eq!(plan.steps()[1].description, "Email the team a summary");
    assert_eq!(plan.steps()[1].summarizes, vec![0]);
}

#[test]
fn plan_builder_groups_clauses_of_the_same_kind_into_one_step() {
    let plan = PlanBuilder::new()
        .build("Check nginx logs; verify the TLS certificate; restart nginx")
        .expect("plan");

    assert_eq!(plan.len(), 2);
    assert_eq!(
        plan.steps()[0].description,
        "Check nginx logs; verify the TLS certificate"
    );
    assert_eq!(plan.steps()[1].kind, CapabilityKind::Automation);
    assert_eq!(plan.steps()[1].description, "restart nginx");
}

#[test]
fn plan_builder_keeps_context_clauses_with_the_preceding_action() {
    let plan = PlanBuilder::new()
        .build("Investigate the memory leak in api-gateway, it started yesterday afternoon")
        .expect("plan");

    assert_eq!(plan.len(), 1);
    assert_eq!(
        plan.steps()[0].description,
        "Investigate the memory leak in api-gateway, it started yesterday afternoon"
    );
}

#[test]
fn plan_builder_rejects_requests_without_any_capability() {
    let builder = PlanBuilder::new();
    assert_eq!(builder.build("hello there"), Err(PlanError::NoCapability));
    assert_eq!(builder.build("   "), Err(PlanError::NoCapability));
}

#[test]
fn plan_builder_keeps_executive_summaries_as_writing() {
    let plan = PlanBuilder::new()
        .build("diagnose disk usage on db01; draft an executive summary email")
        .expect("plan");
    let kinds = plan.steps().iter().map(|s| s.kind).collect::<Vec<_>>();
    assert_eq!(
        kinds,
        vec![CapabilityKind::Diagnosis, CapabilityKind::Writing]
    );
    assert_eq!(
        plan.steps()[1].description,
        "draft an executive summary email"
    );

    let plan = PlanBuilder::new()
        .build("restart the service; send an executive summary to management")
        .expect("plan");
    let kinds = plan.steps().iter().map(|s| s.kind).collect::<Vec<_>>();
    assert_eq!(
        kinds,
        vec![CapabilityKind::Automation, CapabilityKind::Writing]
    );
    assert_eq!(plan.steps()[0].description, "restart the service");
    assert_eq!(plan.steps()[1].summarizes, vec![0]);
}
