//! Tenant directory lookups used for cluster attribution.

use crate::config::DirectoryConfig;
use crate::error::{BillingError, Result};
use crate::utils::run_with_timeout;
use async_trait::async_trait;
use std::time::Duration;
use tonic::metadata::MetadataValue;
use tonic::transport::{Channel, Endpoint};
use tracing::debug;

pub mod proto {
    tonic::include_proto!("tenant_directory.v1");
}

use proto::tenant_directory_service_client::TenantDirectoryServiceClient;
use proto::GetTenantRequest;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TenantDirectory: Send + Sync {
    /// The tenant's configured primary cluster, `None` when it has none.
    async fn primary_cluster(&self, tenant_id: &str) -> Result<Option<String>>;
}

/// gRPC client for the tenant directory service.
#[derive(Clone)]
pub struct GrpcTenantDirectory {
    client: TenantDirectoryServiceClient<Channel>,
    service_token: String,
    timeout: Duration,
}

impl GrpcTenantDirectory {
    /// Build a lazily-connected client; the first lookup opens the channel.
    pub fn connect_lazy(config: &DirectoryConfig) -> Result<Self> {
        let endpoint = Endpoint::from_shared(config.grpc_url.clone())
            .map_err(|e| BillingError::Config(format!("invalid TENANT_DIRECTORY_GRPC_URL: {}", e)))?
            .connect_timeout(config.timeout())
            .timeout(config.timeout())
            .tcp_nodelay(true);

        Ok(Self {
            client: TenantDirectoryServiceClient::new(endpoint.connect_lazy()),
            service_token: config.service_token.clone(),
            timeout: config.timeout(),
        })
    }
}

#[async_trait]
impl TenantDirectory for GrpcTenantDirectory {
    async fn primary_cluster(&self, tenant_id: &str) -> Result<Option<String>> {
        let mut request = tonic::Request::new(GetTenantRequest {
            tenant_id: tenant_id.to_string(),
        });
        if !self.service_token.is_empty() {
            let value = MetadataValue::try_from(format!("Bearer {}", self.service_token))
                .map_err(|e| BillingError::Config(format!("invalid SERVICE_TOKEN: {}", e)))?;
            request.metadata_mut().insert("authorization", value);
        }

        let mut client = self.client.clone();
        let response = run_with_timeout(self.timeout, async {
            Ok(client.get_tenant(request).await?.into_inner())
        })
        .await?;

        if !response.error.is_empty() {
            return Err(BillingError::Directory(response.error));
        }

        let primary = response
            .tenant
            .map(|t| t.primary_cluster_id)
            .filter(|id| !id.trim().is_empty());
        debug!(tenant_id = %tenant_id, primary_cluster_id = ?primary, "Resolved tenant primary cluster");
        Ok(primary)
    }
}
