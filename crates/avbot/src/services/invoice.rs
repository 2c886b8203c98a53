//! Invoice lookups and creation through a JSON-RPC billing gateway.

use crate::error::CommandError;
use crate::format::pad_to_width;
use crate::service::{AccessPolicy, Command, CommandRequest, CommandResult, Reply, Service, ServiceMeta};
use async_trait::async_trait;
use matrix_client::ChatClient;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::info;

pub const SERVICE_TYPE: &str = "invoice";

const USAGE: &str = "Missing parameters. Have a look with !invoice help";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvoiceConfig {
    /// Users allowed to run any invoice command.
    #[serde(default)]
    pub allowed_users: Vec<String>,
    #[serde(default = "default_gateway_url")]
    pub gateway_url: String,
}

impl Default for InvoiceConfig {
    fn default() -> Self {
        Self {
            allowed_users: Vec::new(),
            gateway_url: default_gateway_url(),
        }
    }
}

fn default_gateway_url() -> String {
    "http://localhost:8888/jsonrpc.php".into()
}

#[derive(Debug, Deserialize)]
struct GatewayResponse<T> {
    data: T,
}

#[derive(Debug, Deserialize)]
struct InvoiceRow {
    #[serde(default)]
    invoice_number: String,
    #[serde(default)]
    invoice_date: String,
    #[serde(default)]
    status_paid: String,
    #[serde(default)]
    invoice_amount: String,
    #[serde(default)]
    company_name: String,
    #[serde(default)]
    contact_name: String,
}

pub struct InvoiceService {
    meta: ServiceMeta,
    config: InvoiceConfig,
    http: reqwest::Client,
}

impl InvoiceService {
    pub fn new(meta: ServiceMeta, http: reqwest::Client) -> Self {
        Self {
            meta,
            config: InvoiceConfig::default(),
            http,
        }
    }

    async fn call<T: serde::de::DeserializeOwned>(
        &self,
        body: serde_json::Value,
    ) -> Result<GatewayResponse<T>, CommandError> {
        let response = self
            .http
            .post(&self.config.gateway_url)
            .json(&body)
            .send()
            .await?
            .error_for_status()?;
        Ok(response.json().await?)
    }

    async fn get(&self, req: CommandRequest) -> CommandResult {
        let Some(customer) = req.args.first() else {
            return Ok(Some(Reply::notice(USAGE)));
        };
        info!(service_id = %self.meta.service_id, customer = %customer, "Fetching invoices");

        let response: GatewayResponse<Vec<InvoiceRow>> = self
            .call(json!({ "func": "getInvoicesOfClient", "customer": customer }))
            .await?;

        Ok(Some(Reply::markdown(render_invoices(customer, &response.data))))
    }

    async fn create(&self, req: CommandRequest) -> CommandResult {
        if req.args.len() < 5 {
            return Ok(Some(Reply::notice(USAGE)));
        }
        let customer = &req.args[0];
        let description = req.args[4..].join(" ");
        info!(service_id = %self.meta.service_id, customer = %customer, "Creating invoice");

        let response: GatewayResponse<serde_json::Value> = self
            .call(json!({
                "func": "createInvoice",
                "customer": customer,
                "unitprice": req.args[1],
                "quantity": req.args[2],
                "period": req.args[3],
                "description": description,
            }))
            .await?;

        let data = match &response.data {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        Ok(Some(Reply::markdown(format!(
            "##### Create Invoice: {} {} \n",
            customer, data
        ))))
    }

    fn acl(&self) -> CommandResult {
        Ok(Some(Reply::notice(format!(
            "Allowed Users: {}",
            self.config.allowed_users.join(", ")
        ))))
    }
}

fn help_text() -> String {
    let mut message = String::from("##### Help \n```\n");
    message.push_str("create\n======\n");
    message.push_str(" \t customer : customer name\n");
    message.push_str(" \t unitprice : unitprice in format NNN.NN\n");
    message.push_str(" \t quantity : the quantity of the unit\n");
    message.push_str(" \t period : [once|month] how often the invoice should recur\n");
    message.push_str(" \t description : A very short description of the invoice\n\n");
    message.push_str("get\n======\n \t customer : customer name\n\n");
    message.push_str("acl\n======\n \t Give a list of all allowed users\n\n");
    message.push_str("```\n");
    message
}

fn render_invoices(customer: &str, rows: &[InvoiceRow]) -> String {
    let Some(first) = rows.first() else {
        return format!("No invoices for {}", customer);
    };

    let nr_width = rows
        .iter()
        .map(|r| r.invoice_number.chars().count())
        .max()
        .unwrap_or(0)
        .max(2);
    let date_width = rows
        .iter()
        .map(|r| r.invoice_date.chars().count())
        .max()
        .unwrap_or(0)
        .max(4);

    let header = format!(
        "{}  {}  Paid  Amount",
        pad_to_width("Nr", nr_width),
        pad_to_width("Date", date_width)
    );

    let mut message = format!(
        "##### Invoice: {} {} \n```\n{}\n{}\n",
        first.company_name,
        first.contact_name,
        header,
        "=".repeat(header.chars().count())
    );
    for row in rows {
        message.push_str(&format!(
            "{}  {}  {}  {}\n",
            pad_to_width(&row.invoice_number, nr_width),
            pad_to_width(&row.invoice_date, date_width),
            pad_to_width(&row.status_paid, 4),
            row.invoice_amount
        ));
    }
    message.push_str("```");
    message
}

#[async_trait]
impl Service for InvoiceService {
    fn meta(&self) -> &ServiceMeta {
        &self.meta
    }

    fn load_config(&mut self, config: serde_json::Value) -> Result<(), serde_json::Error> {
        self.config = serde_json::from_value(config)?;
        Ok(())
    }

    fn config(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::to_value(&self.config)
    }

    fn access(&self) -> AccessPolicy {
        AccessPolicy {
            rooms: None,
            users: Some(self.config.allowed_users.clone()),
        }
    }

    fn commands(self: Arc<Self>, _client: Arc<dyn ChatClient>) -> Vec<Command> {
        let get = self.clone();
        let create = self.clone();
        let acl = self;
        vec![
            Command::new(&["invoice", "help"], |_req: CommandRequest| async move {
                Ok(Some(Reply::markdown(help_text())))
            }),
            Command::new(&["invoice", "get"], move |req: CommandRequest| {
                let this = get.clone();
                async move { this.get(req).await }
            }),
            Command::new(&["invoice", "acl"], move |_req: CommandRequest| {
                let result = acl.acl();
                async move { result }
            }),
            Command::new(&["invoice", "create"], move |req: CommandRequest| {
                let this = create.clone();
                async move { this.create(req).await }
            }),
        ]
    }
}
