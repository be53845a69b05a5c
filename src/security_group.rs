//! Security group convergence

use std::collections::HashSet;

use crate::cloud::{IpPermission, SecurityGroupApi};
use crate::models::Network;
use crate::retry::{retry_transient, RetryPolicy};
use crate::Result;

/// Security group name for a business key
pub fn name_for(business_key: &str) -> String {
    format!("network-{}", business_key)
}

/// Rules applied by one [`synchronize`] call
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncOutcome {
    pub authorized: Vec<IpPermission>,
    pub revoked: Vec<IpPermission>,
}

impl SyncOutcome {
    pub fn is_noop(&self) -> bool {
        self.authorized.is_empty() && self.revoked.is_empty()
    }
}

/// Converge the ingress rules of `group_name` to exactly `network`.
///
/// Creates the group if needed, then issues at most one authorize call for
/// missing rules and one revoke call for extra ones.
pub async fn synchronize<C>(client: &C, group_name: &str, network: &Network, retry: &RetryPolicy) -> Result<SyncOutcome>
where
    C: SecurityGroupApi + ?Sized,
{
    let description = format!("Provisionr security group {}", group_name);
    match retry_transient("create_security_group", retry, || {
        client.create_security_group(group_name, &description)
    })
    .await
    {
        Ok(()) => tracing::info!(group = %group_name, "Created security group"),
        Err(e) if e.is_already_exists() => {
            tracing::debug!(group = %group_name, "Security group exists, converging rules")
        }
        Err(e) => return Err(e.into()),
    }

    let expected: HashSet<IpPermission> = network.ingress.iter().map(IpPermission::from).collect();
    let existing = retry_transient("describe_security_group", retry, || {
        client.describe_security_group(group_name)
    })
    .await?;

    let mut to_authorize: Vec<IpPermission> = expected.difference(&existing).cloned().collect();
    let mut to_revoke: Vec<IpPermission> = existing.difference(&expected).cloned().collect();
    to_authorize.sort();
    to_revoke.sort();

    if !to_authorize.is_empty() {
        tracing::info!(group = %group_name, count = to_authorize.len(), "Authorizing ingress rules");
        retry_transient("authorize_ingress", retry, || {
            client.authorize_ingress(group_name, to_authorize.clone())
        })
        .await?;
    }

    if !to_revoke.is_empty() {
        tracing::info!(group = %group_name, count = to_revoke.len(), "Revoking ingress rules");
        retry_transient("revoke_ingress", retry, || {
            client.revoke_ingress(group_name, to_revoke.clone())
        })
        .await?;
    }

    Ok(SyncOutcome {
        authorized: to_authorize,
        revoked: to_revoke,
    })
}

/// Delete the group; a missing group counts as deleted
pub async fn delete<C>(client: &C, group_name: &str, retry: &RetryPolicy) -> Result<()>
where
    C: SecurityGroupApi + ?Sized,
{
    match retry_transient("delete_security_group", retry, || client.delete_security_group(group_name)).await {
        Ok(()) => {
            tracing::info!(group = %group_name, "Deleted security group");
            Ok(())
        }
        Err(e) if e.is_not_found() => Ok(()),
        Err(e) => Err(e.into()),
    }
}
