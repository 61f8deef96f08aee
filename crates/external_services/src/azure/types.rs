//! Resource Manager wire types.

use normalizer::{FailoverTopology, PartnerServer};
use serde::{Deserialize, Serialize};

/// Resource type of a logical SQL server.
pub const SQL_SERVER_TYPE: &str = "Microsoft.Sql/servers";

/// One page of a list response.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArmPage<T> {
    #[serde(default = "Vec::new")]
    pub value: Vec<T>,
    #[serde(default)]
    pub next_link: Option<String>,
}

/// Entry of a resource-group resource listing.
#[derive(Debug, Clone, Deserialize)]
pub struct GenericResource {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub resource_type: String,
    #[serde(default)]
    pub location: Option<String>,
}

/// A failover group as returned by the SQL resource provider.
#[derive(Debug, Clone, Deserialize)]
pub struct FailoverGroupResource {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub properties: FailoverGroupProperties,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailoverGroupProperties {
    #[serde(default)]
    pub replication_role: Option<String>,
    #[serde(default)]
    pub replication_state: Option<String>,
    #[serde(default)]
    pub partner_servers: Vec<PartnerServerInfo>,
}

/// Partner server reference inside a failover group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartnerServerInfo {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replication_role: Option<String>,
}

impl FailoverGroupResource {
    /// Topology as seen by the normalizer.
    pub fn into_topology(self) -> FailoverTopology {
        FailoverTopology {
            group_id: self.id,
            replication_role: self.properties.replication_role.unwrap_or_default(),
            partner_servers: self
                .properties
                .partner_servers
                .into_iter()
                .map(|p| PartnerServer {
                    id: p.id,
                    replication_role: p.replication_role.unwrap_or_default(),
                })
                .collect(),
        }
    }

    /// Role of the owning server, derived from the first partner.
    ///
    /// A primary partner makes this server the secondary and vice versa.
    /// Without partners the reported role is used, defaulting to primary.
    pub fn server_role(&self) -> String {
        match self
            .properties
            .partner_servers
            .first()
            .and_then(|p| p.replication_role.as_deref())
        {
            Some(partner) if partner.eq_ignore_ascii_case("primary") => "Secondary".to_string(),
            Some(_) => "Primary".to_string(),
            None => self
                .properties
                .replication_role
                .clone()
                .unwrap_or_else(|| "Primary".to_string()),
        }
    }

    pub fn into_summary(self) -> FailoverGroupSummary {
        FailoverGroupSummary {
            replication_role: self.server_role(),
            name: self.name,
            id: self.id,
            partner_servers: self.properties.partner_servers,
        }
    }
}

/// Failover group entry of the inventory response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailoverGroupSummary {
    pub name: String,
    pub id: String,
    pub replication_role: String,
    pub partner_servers: Vec<PartnerServerInfo>,
}

/// SQL server entry of the inventory response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SqlServerSummary {
    pub name: String,
    #[serde(rename = "type")]
    pub resource_type: String,
    pub location: Option<String>,
    pub id: String,
    #[serde(rename = "failOverGroups")]
    pub fail_over_groups: Vec<FailoverGroupSummary>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn group_json(partner_role: &str) -> serde_json::Value {
        serde_json::json!({
            "id": "/subscriptions/s/resourceGroups/rg/providers/Microsoft.Sql/servers/srv1/failoverGroups/fg1",
            "name": "fg1",
            "location": "East US",
            "properties": {
                "replicationRole": "Primary",
                "replicationState": "CATCH_UP",
                "partnerServers": [{
                    "id": "/subscriptions/s/resourceGroups/rg2/providers/Microsoft.Sql/servers/srv2",
                    "location": "West US",
                    "replicationRole": partner_role
                }],
                "databases": []
            }
        })
    }

    #[test]
    fn test_failover_group_into_topology() {
        let group: FailoverGroupResource = serde_json::from_value(group_json("Secondary")).unwrap();
        let topology = group.into_topology();

        assert!(topology.group_id.ends_with("/failoverGroups/fg1"));
        assert_eq!(topology.replication_role, "Primary");
        assert_eq!(topology.partner_servers.len(), 1);
        assert_eq!(topology.partner_servers[0].replication_role, "Secondary");
    }

    #[test]
    fn test_server_role_is_opposite_of_partner() {
        let group: FailoverGroupResource = serde_json::from_value(group_json("PRIMARY")).unwrap();
        assert_eq!(group.server_role(), "Secondary");

        let group: FailoverGroupResource = serde_json::from_value(group_json("Secondary")).unwrap();
        assert_eq!(group.server_role(), "Primary");
    }

    #[test]
    fn test_server_role_without_partners() {
        let group: FailoverGroupResource = serde_json::from_value(serde_json::json!({
            "id": "fg", "name": "fg", "properties": { "replicationRole": "Secondary" }
        }))
        .unwrap();
        assert_eq!(group.server_role(), "Secondary");

        let bare: FailoverGroupResource =
            serde_json::from_value(serde_json::json!({ "id": "fg", "name": "fg" })).unwrap();
        assert_eq!(bare.server_role(), "Primary");
    }

    #[test]
    fn test_summary_wire_names() {
        let group: FailoverGroupResource = serde_json::from_value(group_json("Secondary")).unwrap();
        let server = SqlServerSummary {
            name: "srv1".to_string(),
            resource_type: SQL_SERVER_TYPE.to_string(),
            location: Some("eastus".to_string()),
            id: "/subscriptions/s/resourceGroups/rg/providers/Microsoft.Sql/servers/srv1".to_string(),
            fail_over_groups: vec![group.into_summary()],
        };

        let value = serde_json::to_value(&server).unwrap();
        assert_eq!(value["type"], SQL_SERVER_TYPE);
        assert_eq!(value["failOverGroups"][0]["replicationRole"], "Primary");
        assert_eq!(value["failOverGroups"][0]["partnerServers"][0]["location"], "West US");
    }
}
