//! Resource operations.

use switchboard_protocol::methods;
use switchboard_protocol::types::{
    ReadResourceRequest, ReadResourceResult, Resource, ResourceContents, ResourceTemplate,
};
use tracing::debug;

use crate::error::Result;

impl super::super::core::Client {
    /// Every concrete resource across all servers, under exposed URIs.
    ///
    /// # Errors
    ///
    /// [`Error::Connection`](crate::Error::Connection) outside a client scope.
    pub async fn list_resources(&self) -> Result<Vec<Resource>> {
        let namespace = self.require_namespace()?;
        Ok(namespace
            .resources()
            .iter()
            .map(|e| e.item.clone())
            .collect())
    }

    /// Every resource template across all servers, under exposed URIs.
    ///
    /// # Errors
    ///
    /// [`Error::Connection`](crate::Error::Connection) outside a client scope.
    pub async fn list_resource_templates(&self) -> Result<Vec<ResourceTemplate>> {
        let namespace = self.require_namespace()?;
        Ok(namespace
            .resource_templates()
            .iter()
            .map(|e| e.item.clone())
            .collect())
    }

    /// One server's resources exactly as it lists them.
    ///
    /// # Errors
    ///
    /// Unknown or disconnected server, or a failed listing.
    pub async fn list_resources_raw(&self, server: &str) -> Result<Vec<Resource>> {
        self.live_session(server)?.list_resources().await
    }

    /// One server's resource templates exactly as it lists them.
    ///
    /// # Errors
    ///
    /// Unknown or disconnected server, or a failed listing.
    pub async fn list_resource_templates_raw(&self, server: &str) -> Result<Vec<ResourceTemplate>> {
        self.live_session(server)?.list_resource_templates().await
    }

    /// Read a resource by exposed URI.
    ///
    /// Returned contents carry exposed URIs as well, so they can be fed back
    /// into this method.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`](crate::Error::NotFound) for a URI that names no
    /// server, [`Error::Timeout`](crate::Error::Timeout) past the client's
    /// default deadline, or a server or connection failure.
    pub async fn read_resource(&self, uri: &str) -> Result<Vec<ResourceContents>> {
        let namespace = self.namespace();
        let route = self.inner.aggregator.route_uri(namespace.as_deref(), uri)?;
        let session = self.live_session(&route.server)?;

        debug!(server = %route.server, uri = %route.raw, "reading resource");
        let request = ReadResourceRequest { uri: route.raw };
        let value = session
            .request(
                methods::RESOURCES_READ,
                Some(serde_json::to_value(&request)?),
                self.inner.config.default_timeout,
                None,
            )
            .await?;
        let result: ReadResourceResult = serde_json::from_value(value)?;

        let aggregator = &self.inner.aggregator;
        Ok(result
            .contents
            .into_iter()
            .map(|mut contents| {
                let exposed = aggregator.expose_uri(&route.server, contents.uri());
                contents.set_uri(exposed);
                contents
            })
            .collect())
    }
}
