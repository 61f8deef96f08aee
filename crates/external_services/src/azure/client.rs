//! Resource Manager REST client.

use super::types::{
    ArmPage, FailoverGroupResource, FailoverGroupSummary, GenericResource, SqlServerSummary,
    SQL_SERVER_TYPE,
};
use super::SqlInventory;
use crate::error::{Error, Result};
use async_trait::async_trait;
use normalizer::{FailoverGroupRef, FailoverTopology, TopologyProvider};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use tracing::{debug, info};

/// Public cloud management endpoint.
pub const DEFAULT_MANAGEMENT_URL: &str = "https://management.azure.com";

const SQL_API_VERSION: &str = "2021-11-01";
const RESOURCES_API_VERSION: &str = "2021-04-01";

/// Resource Manager client.
///
/// The bearer token is used as given; acquiring and refreshing it is left to
/// the deployment.
#[derive(Debug, Clone)]
pub struct ArmClient {
    http: reqwest::Client,
    base_url: String,
    access_token: Option<String>,
}

impl Default for ArmClient {
    fn default() -> Self {
        Self::new(DEFAULT_MANAGEMENT_URL)
    }
}

impl ArmClient {
    /// Create a client against `base_url`.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            access_token: None,
        }
    }

    /// Attach a bearer token to every request.
    pub fn with_access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = Some(token.into());
        self
    }

    fn server_url(&self, subscription_id: &str, resource_group: &str, server: &str) -> String {
        format!(
            "{}/subscriptions/{}/resourceGroups/{}/providers/Microsoft.Sql/servers/{}",
            self.base_url, subscription_id, resource_group, server
        )
    }

    fn failover_group_url(&self, group: &FailoverGroupRef) -> String {
        format!(
            "{}/failoverGroups/{}?api-version={}",
            self.server_url(&group.subscription_id, &group.resource_group, &group.server),
            group.failover_group,
            SQL_API_VERSION
        )
    }

    fn failover_groups_url(&self, subscription_id: &str, resource_group: &str, server: &str) -> String {
        format!(
            "{}/failoverGroups?api-version={}",
            self.server_url(subscription_id, resource_group, server),
            SQL_API_VERSION
        )
    }

    fn resources_url(&self, subscription_id: &str, resource_group: &str) -> String {
        format!(
            "{}/subscriptions/{}/resourceGroups/{}/resources?api-version={}",
            self.base_url, subscription_id, resource_group, RESOURCES_API_VERSION
        )
    }

    /// GET `url` as JSON. A 404 is `Ok(None)`.
    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<Option<T>> {
        debug!("GET {}", url);

        let mut request = self.http.get(url);
        if let Some(token) = &self.access_token {
            request = request.bearer_auth(token);
        }
        let response = request.send().await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(Error::Api(format!(
                "API returned status {}: {}",
                response.status(),
                response.text().await.unwrap_or_default()
            )));
        }

        let body = response.text().await?;
        Ok(Some(serde_json::from_str(&body)?))
    }

    /// Collect every page of a list operation.
    async fn get_all_pages<T: DeserializeOwned>(&self, url: String) -> Result<Vec<T>> {
        let mut items = Vec::new();
        let mut next = Some(url);

        while let Some(url) = next {
            let page: ArmPage<T> = self
                .get_json(&url)
                .await?
                .ok_or_else(|| Error::InvalidResponse(format!("list endpoint not found: {}", url)))?;
            items.extend(page.value);
            next = page.next_link;
        }

        Ok(items)
    }

    /// Fetch a single failover group.
    pub async fn fetch_failover_group(&self, group: &FailoverGroupRef) -> Result<Option<FailoverGroupResource>> {
        self.get_json(&self.failover_group_url(group)).await
    }

    /// All failover groups of a server.
    pub async fn list_failover_groups(
        &self,
        subscription_id: &str,
        resource_group: &str,
        server: &str,
    ) -> Result<Vec<FailoverGroupResource>> {
        self.get_all_pages(self.failover_groups_url(subscription_id, resource_group, server))
            .await
    }

    /// All resources in a resource group.
    pub async fn list_resources(
        &self,
        subscription_id: &str,
        resource_group: &str,
    ) -> Result<Vec<GenericResource>> {
        self.get_all_pages(self.resources_url(subscription_id, resource_group))
            .await
    }
}

#[async_trait]
impl TopologyProvider for ArmClient {
    async fn get_failover_group(&self, group: &FailoverGroupRef) -> anyhow::Result<Option<FailoverTopology>> {
        Ok(self
            .fetch_failover_group(group)
            .await?
            .map(FailoverGroupResource::into_topology))
    }
}

#[async_trait]
impl SqlInventory for ArmClient {
    async fn list_sql_servers(
        &self,
        subscription_id: &str,
        resource_group: &str,
    ) -> Result<Vec<SqlServerSummary>> {
        let servers: Vec<GenericResource> = self
            .list_resources(subscription_id, resource_group)
            .await?
            .into_iter()
            .filter(|r| r.resource_type.eq_ignore_ascii_case(SQL_SERVER_TYPE))
            .collect();

        let mut summaries = Vec::with_capacity(servers.len());
        for server in servers {
            let groups: Vec<FailoverGroupSummary> = self
                .list_failover_groups(subscription_id, resource_group, &server.name)
                .await?
                .into_iter()
                .map(FailoverGroupResource::into_summary)
                .collect();

            summaries.push(SqlServerSummary {
                name: server.name,
                resource_type: server.resource_type,
                location: server.location,
                id: server.id,
                fail_over_groups: groups,
            });
        }

        info!(
            "Listed {} SQL servers in {}/{}",
            summaries.len(),
            subscription_id,
            resource_group
        );
        Ok(summaries)
    }
}
