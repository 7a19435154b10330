//! Audit commands

use anyhow::{Context, Result};
use serde_json::{json, Map, Value};
use tabled::Tabled;
use uuid::Uuid;

use crate::client::{ApiClient, Audit, CreateAuditRequest, DECISION_ENGINE_TOPIC};
use crate::output::{
    color_status, format_optional_time, format_time, print_info, print_json, print_success,
    print_table, short_uuid, OutputFormat,
};

/// Row for audits table
#[derive(Tabled)]
struct AuditRow {
    #[tabled(rename = "UUID")]
    uuid: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Type")]
    audit_type: String,
    #[tabled(rename = "Goal")]
    goal: String,
    #[tabled(rename = "Strategy")]
    strategy: String,
    #[tabled(rename = "State")]
    state: String,
    #[tabled(rename = "Next run")]
    next_run_time: String,
}

impl From<&Audit> for AuditRow {
    fn from(a: &Audit) -> Self {
        Self {
            uuid: short_uuid(&a.uuid),
            name: a.name.clone(),
            audit_type: a.audit_type.clone(),
            goal: a.goal.clone(),
            strategy: a.strategy.clone().unwrap_or_else(|| "auto".to_string()),
            state: color_status(&a.state),
            next_run_time: format_optional_time(a.next_run_time.as_ref()),
        }
    }
}

/// Parse `name=value` pairs; values that are not JSON are taken as strings
pub fn parse_parameters(pairs: &[String]) -> Result<Map<String, Value>> {
    let mut parameters = Map::new();
    for pair in pairs {
        let (name, raw) = pair
            .split_once('=')
            .with_context(|| format!("Parameter '{}' is not of the form name=value", pair))?;
        let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
        parameters.insert(name.trim().to_string(), value);
    }
    Ok(parameters)
}

/// Options of `audit create`
pub struct CreateOptions {
    pub goal: Option<String>,
    pub name: Option<String>,
    pub strategy: Option<String>,
    pub interval: Option<u64>,
    pub parameters: Vec<String>,
    pub scope: Option<String>,
    pub auto_trigger: bool,
    pub template: Option<Uuid>,
}

impl CreateOptions {
    pub fn into_request(self) -> Result<CreateAuditRequest> {
        if self.goal.is_none() && self.template.is_none() {
            anyhow::bail!("Either a goal or --template is required");
        }
        let scope = match &self.scope {
            Some(raw) => Some(serde_json::from_str(raw).context("Scope must be a JSON document")?),
            None => None,
        };
        Ok(CreateAuditRequest {
            name: self.name,
            audit_type: self.interval.map(|_| "CONTINUOUS".to_string()),
            goal: self.goal.unwrap_or_default(),
            strategy: self.strategy,
            scope,
            parameters: parse_parameters(&self.parameters)?,
            interval: self.interval,
            auto_trigger: self.auto_trigger,
            audit_template: self.template,
        })
    }
}

fn print_audit(audit: &Audit, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(audit),
        OutputFormat::Table => {
            println!("UUID:        {}", audit.uuid);
            println!("Name:        {}", audit.name);
            println!("Type:        {}", audit.audit_type);
            println!("State:       {}", color_status(&audit.state));
            println!("Goal:        {}", audit.goal);
            println!(
                "Strategy:    {}",
                audit.strategy.as_deref().unwrap_or("auto")
            );
            if let Some(interval) = audit.interval {
                println!("Interval:    {}s", interval);
            }
            println!("Next run:    {}", format_optional_time(audit.next_run_time.as_ref()));
            println!("Auto launch: {}", audit.auto_trigger);
            if !audit.parameters.is_empty() {
                println!("Parameters:  {}", Value::Object(audit.parameters.clone()));
            }
            println!("Created:     {}", format_time(&audit.created_at));
            if let Some(message) = &audit.status_message {
                println!("Message:     {}", message);
            }
        }
    }
}

pub async fn create_audit(client: &ApiClient, options: CreateOptions, format: OutputFormat) -> Result<()> {
    let request = options.into_request()?;
    let audit: Audit = client
        .call(DECISION_ENGINE_TOPIC, "create_audit", serde_json::to_value(&request)?)
        .await?;

    if format == OutputFormat::Table {
        print_success(&format!("Audit {} created", audit.uuid));
    }
    print_audit(&audit, format);
    Ok(())
}

pub async fn trigger_audit(client: &ApiClient, uuid: Uuid, format: OutputFormat) -> Result<()> {
    let audit: Audit = client
        .call(DECISION_ENGINE_TOPIC, "trigger_audit", json!({ "audit_uuid": uuid }))
        .await?;

    match format {
        OutputFormat::Json => print_json(&audit),
        OutputFormat::Table => {
            print_success(&format!("Audit {} triggered", audit.uuid));
            print_info("Follow progress with `optctl audit show` and `optctl plan list`");
        }
    }
    Ok(())
}

pub async fn cancel_audit(client: &ApiClient, uuid: Uuid, format: OutputFormat) -> Result<()> {
    let audit: Audit = client
        .call(DECISION_ENGINE_TOPIC, "cancel_audit", json!({ "audit_uuid": uuid }))
        .await?;

    match format {
        OutputFormat::Json => print_json(&audit),
        OutputFormat::Table => print_success(&format!("Audit {} cancelled", audit.uuid)),
    }
    Ok(())
}

pub async fn show_audit(client: &ApiClient, uuid: Uuid, format: OutputFormat) -> Result<()> {
    let audit: Audit = client
        .call(DECISION_ENGINE_TOPIC, "get_audit", json!({ "audit_uuid": uuid }))
        .await?;
    print_audit(&audit, format);
    Ok(())
}

pub async fn list_audits(
    client: &ApiClient,
    state: Option<String>,
    goal: Option<String>,
    format: OutputFormat,
) -> Result<()> {
    let params = json!({
        "state": state.map(|s| s.to_uppercase()),
        "goal": goal,
    });
    let audits: Vec<Audit> = client.call(DECISION_ENGINE_TOPIC, "list_audits", params).await?;

    let rows: Vec<AuditRow> = audits.iter().map(AuditRow::from).collect();
    print_table(&rows, &audits, format);
    if format == OutputFormat::Table && !rows.is_empty() {
        println!("\nTotal: {} audits", rows.len());
    }
    Ok(())
}
