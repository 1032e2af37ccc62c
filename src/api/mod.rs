//! API client for the business management backend

pub mod client;
pub mod envelope;
pub mod error;
pub mod transport;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::Method;
use serde_json::Value;

use crate::config::FileTokenStore;
use client::{ApiClient, RequestDescriptor};

/// How long a command waits for its error reports before exiting
pub const REPORT_FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

/// Build a client from the config file, persisting tokens back to it.
pub fn connect() -> Result<ApiClient> {
    let (config, store) = FileTokenStore::open()?;
    ApiClient::from_config(&config, Arc::new(store))
}

/// Send one request and print the unwrapped payload as JSON.
pub async fn call(method: Method, path: &str, data: Option<&str>) -> Result<()> {
    let client = connect()?;

    let body: Option<Value> = data
        .map(serde_json::from_str)
        .transpose()
        .context("--data is not valid JSON")?;

    let result = match body {
        _ if method == Method::GET => client.get(path).await,
        _ if method == Method::DELETE => client.delete(path).await,
        Some(body) if method == Method::POST => client.post(path, body).await,
        Some(body) if method == Method::PUT => client.put(path, body).await,
        body => {
            let mut descriptor = RequestDescriptor::new(method, path);
            if let Some(body) = body {
                descriptor = descriptor.json(body);
            }
            client.request(descriptor).await
        }
    };
    client.flush(REPORT_FLUSH_TIMEOUT).await;

    let payload = result?;
    println!("{}", serde_json::to_string_pretty(&payload)?);
    Ok(())
}
