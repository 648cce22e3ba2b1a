use super::{Resource, ResourceError};
use crate::events::LogWriter;
use crate::runtime::{ContainerSpec, RuntimeClient};
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Hands out [Resource]s keyed by type string, owning the bookkeeping
/// and teardown of their backing containers.
///
/// Each configured type maps to the image whose bundle provides the
/// type's scripts. Live containers are tracked so that release is
/// idempotent and nothing leaks when a build ends abnormally.
pub struct Tracker {
    runtime: Arc<dyn RuntimeClient>,
    types: BTreeMap<String, String>,
    live: DashMap<String, ()>,
}

impl Tracker {
    /// `types` maps resource type name to the rootfs image carrying its
    /// scripts.
    pub fn new(runtime: Arc<dyn RuntimeClient>, types: BTreeMap<String, String>) -> Self {
        Self {
            runtime,
            types,
            live: DashMap::new(),
        }
    }

    /// Spin up a throwaway container for `resource_type`. Blocks for as
    /// long as container creation takes; the returned resource carries
    /// `abort` into its script runs.
    #[tracing::instrument(name = "Tracker::init", skip(self, logs, abort))]
    pub async fn init(
        &self,
        resource_type: &str,
        logs: LogWriter,
        abort: CancellationToken,
    ) -> Result<Resource, ResourceError> {
        let image = self
            .types
            .get(resource_type)
            .ok_or_else(|| ResourceError::UnknownResourceType(resource_type.to_string()))?;

        let spec = ContainerSpec {
            handle: uuid::Uuid::new_v4().to_string(),
            rootfs: image.clone(),
            privileged: true,
        };

        let container = self.runtime.create(spec).await?;
        self.live.insert(container.handle().to_string(), ());

        debug!(handle = container.handle(), "resource container created");

        Ok(Resource::new(container, logs, abort))
    }

    /// Stop and forget the resource's container, and flush its log
    /// stream. Releasing a container that is already gone is a no-op.
    #[tracing::instrument(name = "Tracker::release", skip(self, resource))]
    pub async fn release(&self, resource: Resource) {
        let (container, logs) = resource.into_parts();

        logs.lock().await.close().await;

        if self.live.remove(container.handle()).is_none() {
            return;
        }

        debug!(handle = container.handle(), "releasing resource container");

        if let Err(err) = container.stop(false).await {
            debug!(handle = container.handle(), "failed to stop resource container: {err}");
        }

        if let Err(err) = self.runtime.destroy(container.handle()).await {
            debug!(handle = container.handle(), "failed to destroy resource container: {err}");
        }
    }
}
