//! Cloudflare adapter for the `DnsProvisioner` port.
//!
//! Records are A records named `{seed}.{base_domain}`. Creation is an upsert
//! so a redelivered task or a resume after IP churn converges on one record.

use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::json;

use crate::application::ports::{Deletion, DnsProvisioner};
use crate::domain::config::DnsConfig;
use crate::domain::naming::domain_for;
use crate::infra::http;
use crate::infra::secrets::ProviderSecrets;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub struct CloudflareDns {
    client: reqwest::Client,
    config: DnsConfig,
    token: Option<String>,
}

/// Cloudflare's response envelope.
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    success: bool,
    #[serde(default)]
    errors: Vec<ApiMessage>,
    result: Option<T>,
}

#[derive(Debug, Deserialize)]
struct ApiMessage {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct DnsRecord {
    id: String,
}

fn unwrap_envelope<T>(envelope: Envelope<T>, what: &str) -> Result<T> {
    if !envelope.success {
        let detail = envelope
            .errors
            .iter()
            .map(|e| format!("{} ({})", e.message, e.code))
            .collect::<Vec<_>>()
            .join("; ");
        anyhow::bail!("{what}: {detail}");
    }
    envelope
        .result
        .with_context(|| format!("{what}: response carried no result"))
}

fn record_body(name: &str, ip: &str, ttl: u32) -> serde_json::Value {
    json!({
        "type": "A",
        "name": name,
        "content": ip,
        "ttl": ttl,
        "proxied": false,
    })
}

impl CloudflareDns {
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: DnsConfig, token: Option<String>) -> Result<Self> {
        Ok(Self {
            client: http::client(REQUEST_TIMEOUT)?,
            config,
            token,
        })
    }

    /// Fails with `MissingSecret` when `DEVMACHINE_DNS_TOKEN` is unset.
    fn token(&self) -> Result<&str> {
        Ok(ProviderSecrets::require(&self.token, "DEVMACHINE_DNS_TOKEN")?)
    }

    fn records_url(&self) -> String {
        format!(
            "{}/zones/{}/dns_records",
            self.config.api_base.trim_end_matches('/'),
            self.config.zone_id
        )
    }

    async fn send<T: DeserializeOwned>(&self, request: reqwest::RequestBuilder, what: &str) -> Result<T> {
        let response = request.bearer_auth(self.token()?).send().await?;
        let envelope: Envelope<T> = http::json(response, what).await?;
        unwrap_envelope(envelope, what)
    }

    async fn find(&self, name: &str) -> Result<Option<DnsRecord>> {
        let request = self
            .client
            .get(self.records_url())
            .query(&[("type", "A"), ("name", name)]);
        let records: Vec<DnsRecord> = self.send(request, "looking up DNS record").await?;
        Ok(records.into_iter().next())
    }
}

impl DnsProvisioner for CloudflareDns {
    async fn create_record(&self, seed: &str, ip: &str) -> Result<String> {
        let name = domain_for(seed, &self.config.base_domain);
        let body = record_body(&name, ip, self.config.ttl);

        let request = match self.find(&name).await? {
            Some(existing) => self
                .client
                .put(format!("{}/{}", self.records_url(), existing.id))
                .json(&body),
            None => self.client.post(self.records_url()).json(&body),
        };
        let _: DnsRecord = self.send(request, "writing DNS record").await?;

        tracing::info!(domain = %name, ip, "DNS record written");
        Ok(name)
    }

    async fn delete_record(&self, seed: &str) -> Result<Deletion> {
        let name = domain_for(seed, &self.config.base_domain);
        let Some(record) = self.find(&name).await? else {
            return Ok(Deletion::NotFound);
        };
        let request = self
            .client
            .delete(format!("{}/{}", self.records_url(), record.id));
        let _: DnsRecord = self.send(request, "deleting DNS record").await?;
        Ok(Deletion::Deleted)
    }
}
