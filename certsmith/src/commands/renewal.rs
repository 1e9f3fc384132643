use super::{Context, cancel_on_ctrl_c};
use crate::output;
use crate::scheduler::{RenewalScheduler, SweepSummary};

pub fn run_sweep(json: bool) -> Result<(), Box<dyn std::error::Error>> {
    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(sweep_async(json))
}

pub fn run_scheduler() -> Result<(), Box<dyn std::error::Error>> {
    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(scheduler_async())
}

async fn sweep_async(json: bool) -> Result<(), Box<dyn std::error::Error>> {
    let ctx = Context::load()?;
    let scheduler = RenewalScheduler::new(ctx.manager.clone(), &ctx.settings.renewal);

    let summary = scheduler.sweep(&cancel_on_ctrl_c()).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        print_summary(&summary);
    }

    if summary.failed > 0 {
        return Err(format!("{} of {} renewals failed", summary.failed, summary.attempted).into());
    }
    Ok(())
}

async fn scheduler_async() -> Result<(), Box<dyn std::error::Error>> {
    let ctx = Context::load()?;
    let scheduler = RenewalScheduler::new(ctx.manager.clone(), &ctx.settings.renewal);

    output::step(&format!(
        "Renewal scheduler running every {}h (Ctrl-C to stop)",
        ctx.settings.renewal.interval_hours
    ));
    scheduler.run(cancel_on_ctrl_c()).await;
    output::muted("Renewal scheduler stopped");
    Ok(())
}

fn print_summary(summary: &SweepSummary) {
    if summary.attempted == 0 {
        output::muted("No certificates due for renewal");
        return;
    }

    let message = format!(
        "Renewed {} of {} certificates",
        summary.succeeded, summary.attempted
    );
    if summary.failed == 0 {
        output::success(&message);
    } else {
        output::warning(&message);
    }
}
