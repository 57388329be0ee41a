//! Narrow capability interface over a provider's bucket/container API.

use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::ListDeniedPolicy;
use super::error::ProviderError;

/// Result of a create request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateOutcome {
    /// The container was created by this call.
    Created,
    /// The container already existed; not an error.
    AlreadyExists,
}

/// Bucket or container management on a provider.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ContainerClient: Send + Sync {
    /// List the names of all containers visible to the credentials.
    async fn list_containers(&self) -> Result<Vec<String>, ProviderError>;

    /// Create a container. An existing container yields
    /// [`CreateOutcome::AlreadyExists`].
    async fn create_container(&self, name: &str) -> Result<CreateOutcome, ProviderError>;
}

/// Create `name` unless the provider already lists it.
///
/// List and create are separate calls, so two callers may both try to
/// create; the loser sees [`CreateOutcome::AlreadyExists`]. When listing is
/// refused under `policy`, the create is attempted directly.
pub async fn ensure_container_with(
    client: &dyn ContainerClient,
    policy: &ListDeniedPolicy,
    name: &str,
) -> Result<CreateOutcome, ProviderError> {
    match client.list_containers().await {
        Ok(existing) if existing.iter().any(|c| c == name) => {
            debug!(container = %name, "Container exists");
            return Ok(CreateOutcome::AlreadyExists);
        }
        Ok(_) => {}
        Err(e) if policy.matches(&e) => {
            debug!(container = %name, error = %e, "Cannot list containers, creating directly");
        }
        Err(e) => return Err(e),
    }

    let outcome = client.create_container(name).await?;
    match outcome {
        CreateOutcome::Created => info!(container = %name, "Created container"),
        CreateOutcome::AlreadyExists => {
            debug!(container = %name, "Container created concurrently");
        }
    }
    Ok(outcome)
}

/// Check that the provider is reachable with the configured credentials.
///
/// A list refusal matching `policy` still proves connectivity and counts as
/// success.
pub async fn test_connection_with(
    client: &dyn ContainerClient,
    policy: &ListDeniedPolicy,
) -> Result<bool, ProviderError> {
    match client.list_containers().await {
        Ok(containers) => {
            debug!(count = containers.len(), "Listed containers");
            Ok(true)
        }
        Err(e) if policy.matches(&e) => {
            warn!(error = %e, "Credentials cannot list containers, treating connection as healthy");
            Ok(true)
        }
        Err(e) => Err(e),
    }
}
