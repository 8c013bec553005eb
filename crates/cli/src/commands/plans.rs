use super::utils::{print_info, CliError, CliResult};
use prettytable::{row, Table};
use sublimit_core::{config::AppConfig, plan::Plan};

/// Every configured plan, active or not, followed by the trial.
pub fn plans_table(config: &AppConfig) -> CliResult<Table> {
    let mut table = Table::new();
    table.add_row(row!["Source", "Plan", "Price", "Req/min", "Req/day", "Active"]);

    for source in &config.sources.static_sources {
        for definition in &source.plans {
            let plan = Plan::try_from(definition)
                .map_err(|e| CliError::Config(format!("{}: {e}", source.name)))?;
            table.add_row(plan_row(&source.name, &plan));
        }
    }

    let trial = config.trial_plan().map_err(|e| CliError::Config(format!("trial: {e}")))?;
    if let Some(trial) = trial {
        table.add_row(plan_row("(trial)", &trial));
    }

    Ok(table)
}

fn plan_row(source: &str, plan: &Plan) -> prettytable::Row {
    let active = if plan.is_active() { "yes" } else { "no" };
    row![
        source,
        plan.name().unwrap_or("-"),
        plan.price(),
        plan.requests_per_minute(),
        plan.requests_per_day(),
        active
    ]
}

pub fn handle_plans_command(config: &AppConfig) -> CliResult<()> {
    let table = plans_table(config)?;
    if table.len() == 1 {
        print_info("No plans configured");
        return Ok(());
    }
    table.printstd();
    Ok(())
}
