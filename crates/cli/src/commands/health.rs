//! Service health command

use anyhow::Result;
use serde_json::json;
use tabled::Tabled;

use crate::client::{ApiClient, HealthResponse, ReadinessResponse};
use crate::output::{color_status, format_time, print_json, print_table, print_warning, OutputFormat};

#[derive(Tabled)]
struct ComponentRow {
    #[tabled(rename = "Component")]
    name: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Updated")]
    updated: String,
    #[tabled(rename = "Message")]
    message: String,
}

pub async fn show_health(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let health: HealthResponse = client.get("healthz").await?;
    let readiness: ReadinessResponse = client.get("readyz").await?;

    if format == OutputFormat::Json {
        print_json(&json!({ "health": health, "readiness": readiness }));
        return Ok(());
    }

    println!("Endpoint: {}", client.base_url());
    println!("Status:   {}", color_status(&health.status));
    println!("Ready:    {}", readiness.ready);
    if let Some(reason) = &readiness.reason {
        print_warning(reason);
    }
    println!();

    let rows: Vec<ComponentRow> = health
        .components
        .iter()
        .map(|(name, component)| ComponentRow {
            name: name.clone(),
            status: color_status(&component.status),
            updated: format_time(&component.updated_at),
            message: component.message.clone().unwrap_or_default(),
        })
        .collect();
    print_table(&rows, &health.components, format);
    Ok(())
}
