//! Convergence driver.
//!
//! Runs one reconciliation through
//! `Start -> CheckExistence -> {NoOp, Create, Update, Delete} -> Verify -> Done`.
//! Every device call goes through the [`Transport`]; nothing is retried here.

use tracing::{debug, info};

use crate::error::Result;
use crate::plan::{resolve, Action, ReconciliationPlan};
use crate::reconciler::Reconciler;
use crate::report::Report;
use crate::transport::Transport;

enum State {
    Start,
    CheckExistence,
    Apply(ReconciliationPlan),
    Verify(ReconciliationPlan),
    Done(Report),
}

/// Drive `spec` to its target state and report whether anything changed.
pub async fn converge<R: Reconciler>(
    reconciler: &R,
    transport: &dyn Transport,
    spec: &R::Spec,
) -> Result<Report> {
    let kind = reconciler.kind();
    let mut state = State::Start;

    loop {
        state = match state {
            State::Start => {
                reconciler.preflight(transport, spec).await?;
                State::CheckExistence
            }
            State::CheckExistence => {
                let observed = reconciler.observe(transport, spec).await?;
                let desired = reconciler.desired(spec);
                let mut plan = resolve(reconciler.target(spec), &desired, observed);
                plan.operations = reconciler.operations(spec, &plan)?;
                info!(
                    kind,
                    exists = plan.exists,
                    action = %plan.action,
                    operations = plan.operations.len(),
                    "Planned reconciliation"
                );
                State::Apply(plan)
            }
            State::Apply(plan) => {
                for op in &plan.operations {
                    info!(kind, verb = %op.verb, path = %op.path, "Applying");
                    let response = op.execute(transport).await?;
                    debug!(kind, code = response.code, "Write answered");
                    reconciler.check_response(spec, op, response)?;
                }
                match plan.action {
                    Action::NoOp => State::Done(reconciler.report(spec, &plan, None)),
                    Action::Create | Action::Update | Action::Delete => State::Verify(plan),
                }
            }
            State::Verify(plan) => {
                let poll = reconciler.verify(transport, spec, &plan).await?;
                State::Done(reconciler.report(spec, &plan, poll.as_ref()))
            }
            State::Done(report) => {
                info!(kind, changed = report.changed, "Reconciliation finished");
                return Ok(report);
            }
        };
    }
}
