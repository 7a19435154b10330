//! Action plan commands

use anyhow::Result;
use serde_json::json;
use tabled::Tabled;
use uuid::Uuid;

use crate::client::{Action, ActionPlan, ActionPlanDetail, ApiClient, APPLIER_TOPIC};
use crate::output::{
    color_status, format_time, print_json, print_success, print_table, print_warning, short_uuid,
    OutputFormat,
};

/// Row for action plans table
#[derive(Tabled)]
struct PlanRow {
    #[tabled(rename = "UUID")]
    uuid: String,
    #[tabled(rename = "Audit")]
    audit: String,
    #[tabled(rename = "Strategy")]
    strategy: String,
    #[tabled(rename = "State")]
    state: String,
    #[tabled(rename = "Created")]
    created_at: String,
}

/// Row for actions table
#[derive(Tabled)]
struct ActionRow {
    #[tabled(rename = "UUID")]
    uuid: String,
    #[tabled(rename = "Type")]
    action_type: String,
    #[tabled(rename = "Resource")]
    resource_id: String,
    #[tabled(rename = "After")]
    parents: String,
    #[tabled(rename = "State")]
    state: String,
}

pub async fn list_plans(
    client: &ApiClient,
    audit: Option<Uuid>,
    state: Option<String>,
    format: OutputFormat,
) -> Result<()> {
    let params = json!({
        "audit_uuid": audit,
        "state": state.map(|s| s.to_uppercase()),
    });
    let plans: Vec<ActionPlan> = client.call(APPLIER_TOPIC, "list_action_plans", params).await?;

    let rows: Vec<PlanRow> = plans
        .iter()
        .map(|p| PlanRow {
            uuid: short_uuid(&p.uuid),
            audit: short_uuid(&p.audit_uuid),
            strategy: p.strategy.clone(),
            state: color_status(&p.state),
            created_at: format_time(&p.created_at),
        })
        .collect();
    print_table(&rows, &plans, format);
    Ok(())
}

pub async fn show_plan(client: &ApiClient, uuid: Uuid, format: OutputFormat) -> Result<()> {
    let detail: ActionPlanDetail = client
        .call(APPLIER_TOPIC, "get_action_plan", json!({ "action_plan_uuid": uuid }))
        .await?;
    let actions: Vec<Action> = client
        .call(APPLIER_TOPIC, "list_actions", json!({ "action_plan_uuid": uuid }))
        .await?;

    match format {
        OutputFormat::Json => print_json(&json!({
            "action_plan": detail.action_plan,
            "efficacy_indicators": detail.efficacy_indicators,
            "actions": actions,
        })),
        OutputFormat::Table => {
            let plan = &detail.action_plan;
            println!("UUID:     {}", plan.uuid);
            println!("Audit:    {}", plan.audit_uuid);
            println!("Strategy: {}", plan.strategy);
            println!("State:    {}", color_status(&plan.state));
            if let Some(message) = &plan.status_message {
                println!("Message:  {}", message);
            }

            if !detail.efficacy_indicators.is_empty() || !plan.global_efficacy.is_empty() {
                println!("\nEfficacy:");
                for indicator in &detail.efficacy_indicators {
                    println!("  {:<32} {:>12.2} {}", indicator.name, indicator.value, indicator.unit);
                }
                for global in &plan.global_efficacy {
                    println!("  {:<32} {:>12.2} {} (global)", global.name, global.value, global.unit);
                }
            }

            println!();
            if actions.is_empty() {
                print_warning("Plan has no actions");
                return Ok(());
            }
            let rows: Vec<ActionRow> = actions
                .iter()
                .map(|a| ActionRow {
                    uuid: short_uuid(&a.uuid),
                    action_type: a.action_type.clone(),
                    resource_id: a.resource_id.clone(),
                    parents: a
                        .parents
                        .iter()
                        .map(short_uuid)
                        .collect::<Vec<_>>()
                        .join(","),
                    state: color_status(&a.state),
                })
                .collect();
            print_table(&rows, &actions, format);
        }
    }
    Ok(())
}

pub async fn launch_plan(client: &ApiClient, uuid: Uuid, format: OutputFormat) -> Result<()> {
    let plan: ActionPlan = client
        .call(APPLIER_TOPIC, "launch_action_plan", json!({ "action_plan_uuid": uuid }))
        .await?;

    match format {
        OutputFormat::Json => print_json(&plan),
        OutputFormat::Table => print_success(&format!("Action plan {} is {}", plan.uuid, plan.state)),
    }
    Ok(())
}

pub async fn cancel_plan(client: &ApiClient, uuid: Uuid, format: OutputFormat) -> Result<()> {
    let plan: ActionPlan = client
        .call(APPLIER_TOPIC, "cancel_action_plan", json!({ "action_plan_uuid": uuid }))
        .await?;

    match format {
        OutputFormat::Json => print_json(&plan),
        OutputFormat::Table => print_success(&format!("Action plan {} is {}", plan.uuid, plan.state)),
    }
    Ok(())
}
