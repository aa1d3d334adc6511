//! Organization IAM policy updates
//!
//! Read-modify-write of an organization's policy through the Resource Manager
//! v3 API. The etag read with the policy is sent back on write; a concurrent
//! edit surfaces as a conflict and the whole cycle is retried.

use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::{info, warn};

use crate::auth::{http_client, AdcTokenProvider};
use crate::error::CloudError;
use crate::Result;

const RESOURCE_MANAGER_API: &str = "https://cloudresourcemanager.googleapis.com/v3";
const MAX_POLICY_ATTEMPTS: usize = 3;

/// Roles FAST bootstrap expects the organization admins group to hold.
pub const REQUIRED_ORG_ROLES: &[&str] = &[
    "roles/billing.admin",
    "roles/logging.admin",
    "roles/iam.organizationRoleAdmin",
    "roles/resourcemanager.organizationAdmin",
    "roles/resourcemanager.projectCreator",
    "roles/resourcemanager.tagAdmin",
    "roles/orgpolicy.policyAdmin",
    "roles/owner",
];

/// A Google Cloud organization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Organization {
    #[serde(deserialize_with = "deserialize_org_id")]
    pub id: u64,
    pub domain: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customer_id: Option<String>,
}

impl Organization {
    pub fn resource_name(&self) -> String {
        format!("organizations/{}", self.id)
    }

    /// IAM principal for a group in this organization's domain.
    pub fn group_principal(&self, group: &str) -> String {
        format!("group:{}@{}", group, self.domain)
    }
}

/// Accepts `123`, `"123"` and `"organizations/123"`.
fn deserialize_org_id<'de, D>(deserializer: D) -> std::result::Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OrgId {
        Number(u64),
        Text(String),
    }

    match OrgId::deserialize(deserializer)? {
        OrgId::Number(id) => Ok(id),
        OrgId::Text(text) => text
            .trim()
            .trim_start_matches("organizations/")
            .parse()
            .map_err(|_| serde::de::Error::custom(format!("invalid organization id: {text:?}"))),
    }
}

/// IAM role binding. Unknown fields (e.g. `condition`) are carried through.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Binding {
    pub role: String,
    #[serde(default)]
    pub members: Vec<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// IAM policy document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Policy {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<i32>,
    #[serde(default)]
    pub bindings: Vec<Binding>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Add `member` to every role in `roles`.
///
/// Existing bindings gain the member; missing roles get a new binding
/// appended. Members are not deduplicated locally, the API treats repeated
/// members as a single grant.
pub fn grant_roles(policy: &mut Policy, member: &str, roles: &[&str]) {
    for role in roles {
        match policy.bindings.iter_mut().find(|b| b.role == *role) {
            Some(binding) => binding.members.push(member.to_string()),
            None => policy.bindings.push(Binding {
                role: role.to_string(),
                members: vec![member.to_string()],
                extra: Map::new(),
            }),
        }
    }
}

/// Resource Manager client for organization policies.
pub struct IamClient {
    http: reqwest::Client,
    tokens: Arc<AdcTokenProvider>,
}

impl IamClient {
    pub fn new(tokens: Arc<AdcTokenProvider>) -> Result<Self> {
        Ok(Self {
            http: http_client()?,
            tokens,
        })
    }

    async fn call(&self, resource: &str, method: &str, body: Value) -> Result<Value> {
        let token = self.tokens.access_token().await?;
        let url = format!("{}/{}:{}", RESOURCE_MANAGER_API, resource, method);
        let response = self
            .http
            .post(url)
            .bearer_auth(token)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(CloudError::Http {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }
        Ok(response.json().await?)
    }
}

/// Read and write access to organization IAM policies.
#[async_trait]
pub trait PolicyStore: Send + Sync {
    /// Fetch the organization's current IAM policy, etag included.
    async fn get_policy(&self, org: &Organization) -> Result<Policy>;

    /// Replace the organization's IAM policy. A stale etag is a conflict.
    async fn set_policy(&self, org: &Organization, policy: &Policy) -> Result<()>;
}

#[async_trait]
impl PolicyStore for IamClient {
    async fn get_policy(&self, org: &Organization) -> Result<Policy> {
        let value = self
            .call(
                &org.resource_name(),
                "getIamPolicy",
                json!({ "options": { "requestedPolicyVersion": 3 } }),
            )
            .await?;
        Ok(serde_json::from_value(value)?)
    }

    async fn set_policy(&self, org: &Organization, policy: &Policy) -> Result<()> {
        let body = json!({ "policy": policy });
        self.call(&org.resource_name(), "setIamPolicy", body).await?;
        Ok(())
    }
}

/// Grant `roles` to `group:<group>@<org.domain>` on the organization.
///
/// Each attempt re-reads the policy so the write carries a fresh etag.
/// Conflicting writes are retried up to three attempts in total.
pub async fn set_required_org_iam_roles(
    store: &dyn PolicyStore,
    org: &Organization,
    group: &str,
    roles: &[&str],
) -> Result<()> {
    let member = org.group_principal(group);
    let resource = org.resource_name();

    for attempt in 1..=MAX_POLICY_ATTEMPTS {
        let mut policy = store
            .get_policy(org)
            .await
            .map_err(|e| CloudError::PolicyRead {
                resource: resource.clone(),
                reason: e.to_string(),
            })?;
        grant_roles(&mut policy, &member, roles);

        match store.set_policy(org, &policy).await {
            Ok(()) => {
                info!(
                    organization = %resource,
                    member = %member,
                    roles = roles.len(),
                    "Organization IAM policy updated"
                );
                return Ok(());
            }
            Err(e) if e.is_conflict() && attempt < MAX_POLICY_ATTEMPTS => {
                warn!(attempt, error = %e, "IAM policy changed concurrently, retrying");
            }
            Err(e) => {
                return Err(CloudError::PolicyWrite {
                    resource,
                    reason: e.to_string(),
                });
            }
        }
    }

    Err(CloudError::PolicyWrite {
        resource,
        reason: format!("etag conflict after {} attempts", MAX_POLICY_ATTEMPTS),
    })
}
