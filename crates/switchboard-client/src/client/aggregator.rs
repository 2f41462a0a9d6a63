//! Merging many servers' namespaces under one client.
//!
//! With one configured server, or with [`Prefixing::Never`], names and URIs
//! pass through unchanged. With two or more servers under
//! [`Prefixing::Auto`]:
//!
//! | Kind     | Raw                 | Exposed                              |
//! |----------|---------------------|--------------------------------------|
//! | tool     | `get_forecast`      | `weather_get_forecast`               |
//! | prompt   | `summarize`         | `assistant_summarize`                |
//! | resource | `weather://icons/x` | `weather://weather/icons/x`          |
//!
//! Exposed names must be unique per kind; a duplicate is rejected with
//! [`Error::NamespaceCollision`] when the namespace is built.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;

use switchboard_protocol::types::{Prompt, Resource, ResourceTemplate, Tool};
use tracing::debug;

use crate::config::{Prefixing, ServerEntry};
use crate::error::{Error, Result};
use crate::schema::ArgumentSchema;

/// Everything one server listed at connect time.
#[derive(Debug, Default)]
pub(crate) struct ServerListing {
    pub(crate) server: String,
    pub(crate) tools: Vec<Tool>,
    pub(crate) resources: Vec<Resource>,
    pub(crate) resource_templates: Vec<ResourceTemplate>,
    pub(crate) prompts: Vec<Prompt>,
}

/// Prefixing and routing rules for a fixed set of servers.
#[derive(Debug, Clone)]
pub struct Aggregator {
    /// Sorted longest first so prefix splits pick the most specific server.
    servers: Vec<String>,
    prefixing: Prefixing,
}

impl Aggregator {
    /// Rules for the given servers.
    pub fn new(entries: &[ServerEntry], prefixing: Prefixing) -> Self {
        let mut servers: Vec<String> = entries.iter().map(|e| e.name.clone()).collect();
        servers.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
        Self { servers, prefixing }
    }

    /// Whether exposed names carry a server prefix.
    pub fn is_multi(&self) -> bool {
        self.prefixing == Prefixing::Auto && self.servers.len() >= 2
    }

    /// Configured server names.
    pub fn servers(&self) -> impl Iterator<Item = &str> {
        self.servers.iter().map(String::as_str)
    }

    /// Exposed form of a tool or prompt name.
    pub fn expose_name(&self, server: &str, raw: &str) -> String {
        if self.is_multi() {
            format!("{server}_{raw}")
        } else {
            raw.to_string()
        }
    }

    /// Exposed form of a resource URI. URIs without a scheme are left as is.
    pub fn expose_uri(&self, server: &str, raw: &str) -> String {
        if !self.is_multi() {
            return raw.to_string();
        }
        match raw.split_once("://") {
            Some((scheme, rest)) => format!("{scheme}://{server}/{rest}"),
            None => raw.to_string(),
        }
    }

    /// Split `{server}_{raw}` into its parts.
    pub fn split_name<'a>(&self, exposed: &'a str) -> Option<(&str, &'a str)> {
        if !self.is_multi() {
            return None;
        }
        self.servers.iter().find_map(|server| {
            exposed
                .strip_prefix(server.as_str())
                .and_then(|rest| rest.strip_prefix('_'))
                .filter(|raw| !raw.is_empty())
                .map(|raw| (server.as_str(), raw))
        })
    }

    /// Split `{scheme}://{server}/{path}` into the server and the raw URI.
    pub fn split_uri(&self, exposed: &str) -> Option<(&str, String)> {
        if !self.is_multi() {
            return None;
        }
        let (scheme, rest) = exposed.split_once("://")?;
        let (host, path) = rest.split_once('/').unwrap_or((rest, ""));
        self.servers
            .iter()
            .find(|server| server.as_str() == host)
            .map(|server| (server.as_str(), format!("{scheme}://{path}")))
    }

    /// Merge per-server listings into one namespace.
    ///
    /// # Errors
    ///
    /// [`Error::NamespaceCollision`] when two entries of the same kind would
    /// share an exposed name.
    pub(crate) fn build(&self, listings: Vec<ServerListing>) -> Result<Namespace> {
        let mut namespace = Namespace::default();
        for listing in listings {
            let server = listing.server;
            for tool in listing.tools {
                let exposed = self.expose_name(&server, &tool.name);
                let schema = Arc::new(ArgumentSchema::from_json_schema(&tool.input_schema));
                let item = Tool {
                    name: exposed.clone(),
                    ..tool.clone()
                };
                namespace.tools.insert(NamespaceEntry {
                    raw_name: tool.name,
                    exposed_name: exposed,
                    server: server.clone(),
                    item,
                    schema,
                })?;
            }
            for resource in listing.resources {
                let exposed = self.expose_uri(&server, &resource.uri);
                let item = Resource {
                    uri: exposed.clone(),
                    ..resource.clone()
                };
                namespace.resources.insert(NamespaceEntry {
                    raw_name: resource.uri,
                    exposed_name: exposed,
                    server: server.clone(),
                    item,
                    schema: Arc::new(ArgumentSchema::permissive()),
                })?;
            }
            for template in listing.resource_templates {
                let exposed = self.expose_uri(&server, &template.uri_template);
                let item = ResourceTemplate {
                    uri_template: exposed.clone(),
                    ..template.clone()
                };
                namespace.resource_templates.insert(NamespaceEntry {
                    raw_name: template.uri_template,
                    exposed_name: exposed,
                    server: server.clone(),
                    item,
                    schema: Arc::new(ArgumentSchema::permissive()),
                })?;
            }
            for prompt in listing.prompts {
                let exposed = self.expose_name(&server, &prompt.name);
                let schema = Arc::new(ArgumentSchema::from_prompt_arguments(&prompt.arguments));
                let item = Prompt {
                    name: exposed.clone(),
                    ..prompt.clone()
                };
                namespace.prompts.insert(NamespaceEntry {
                    raw_name: prompt.name,
                    exposed_name: exposed,
                    server: server.clone(),
                    item,
                    schema,
                })?;
            }
        }
        debug!(
            tools = namespace.tools.len(),
            resources = namespace.resources.len(),
            resource_templates = namespace.resource_templates.len(),
            prompts = namespace.prompts.len(),
            prefixed = self.is_multi(),
            "namespace built"
        );
        Ok(namespace)
    }

    /// Resolve a tool name to its server and raw name.
    pub(crate) fn route_tool(&self, namespace: Option<&Namespace>, name: &str) -> Result<Route> {
        self.route_by_name(namespace.map(|ns| &ns.tools), name, "tool")
    }

    /// Resolve a prompt name to its server and raw name.
    pub(crate) fn route_prompt(&self, namespace: Option<&Namespace>, name: &str) -> Result<Route> {
        self.route_by_name(namespace.map(|ns| &ns.prompts), name, "prompt")
    }

    /// Resolve a resource URI to its server and raw URI.
    ///
    /// Concrete resources are found by exact lookup. URIs produced from a
    /// template are routed by their server segment.
    pub(crate) fn route_uri(&self, namespace: Option<&Namespace>, uri: &str) -> Result<Route> {
        if let Some(entry) = namespace.and_then(|ns| ns.resources.get(uri)) {
            return Ok(Route::from_entry(entry));
        }
        if let Some(server) = self.single_server() {
            return Ok(Route::passthrough(server, uri));
        }
        self.split_uri(uri)
            .map(|(server, raw)| Route::passthrough(server, &raw))
            .ok_or_else(|| Error::NotFound {
                kind: "resource",
                name: uri.to_string(),
            })
    }

    fn route_by_name<T>(
        &self,
        entries: Option<&Entries<T>>,
        name: &str,
        kind: &'static str,
    ) -> Result<Route> {
        if let Some(entry) = entries.and_then(|e| e.get(name)) {
            return Ok(Route::from_entry(entry));
        }
        if let Some(server) = self.single_server() {
            return Ok(Route::passthrough(server, name));
        }
        self.split_name(name)
            .map(|(server, raw)| Route::passthrough(server, raw))
            .ok_or_else(|| Error::NotFound {
                kind,
                name: name.to_string(),
            })
    }

    fn single_server(&self) -> Option<&str> {
        match self.servers.as_slice() {
            [only] => Some(only),
            _ => None,
        }
    }
}

/// Where a call goes.
#[derive(Debug, Clone)]
pub(crate) struct Route {
    pub(crate) server: String,
    pub(crate) raw: String,
    /// `None` for names absent from the namespace; those are not validated.
    pub(crate) schema: Option<Arc<ArgumentSchema>>,
}

impl Route {
    fn from_entry<T>(entry: &NamespaceEntry<T>) -> Self {
        Self {
            server: entry.server.clone(),
            raw: entry.raw_name.clone(),
            schema: Some(Arc::clone(&entry.schema)),
        }
    }

    fn passthrough(server: &str, raw: &str) -> Self {
        Self {
            server: server.to_string(),
            raw: raw.to_string(),
            schema: None,
        }
    }
}

/// One aggregated tool, resource, template or prompt.
#[derive(Debug, Clone)]
pub struct NamespaceEntry<T> {
    /// Name (or URI) on the owning server
    pub raw_name: String,
    /// Name (or URI) callers use
    pub exposed_name: String,
    /// Owning server
    pub server: String,
    /// Descriptor as exposed to callers
    pub item: T,
    /// Argument schema; permissive for resources
    pub schema: Arc<ArgumentSchema>,
}

/// Insertion-ordered entries with lookup by exposed name.
#[derive(Debug, Clone)]
struct Entries<T> {
    items: Vec<NamespaceEntry<T>>,
    index: HashMap<String, usize>,
}

impl<T> Default for Entries<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            index: HashMap::new(),
        }
    }
}

impl<T> Entries<T> {
    fn insert(&mut self, entry: NamespaceEntry<T>) -> Result<()> {
        match self.index.entry(entry.exposed_name.clone()) {
            Entry::Occupied(existing) => Err(Error::NamespaceCollision {
                name: entry.exposed_name,
                first: self.items[*existing.get()].server.clone(),
                second: entry.server,
            }),
            Entry::Vacant(slot) => {
                slot.insert(self.items.len());
                self.items.push(entry);
                Ok(())
            }
        }
    }

    fn get(&self, exposed: &str) -> Option<&NamespaceEntry<T>> {
        self.index.get(exposed).map(|&i| &self.items[i])
    }

    fn len(&self) -> usize {
        self.items.len()
    }
}

/// The merged namespace of every connected server.
#[derive(Debug, Clone, Default)]
pub struct Namespace {
    tools: Entries<Tool>,
    resources: Entries<Resource>,
    resource_templates: Entries<ResourceTemplate>,
    prompts: Entries<Prompt>,
}

impl Namespace {
    /// All tools, grouped by server in entry order (name order for an
    /// `mcpServers` document).
    pub fn tools(&self) -> &[NamespaceEntry<Tool>] {
        &self.tools.items
    }

    /// Look up a tool by exposed name.
    pub fn tool(&self, exposed: &str) -> Option<&NamespaceEntry<Tool>> {
        self.tools.get(exposed)
    }

    /// All concrete resources.
    pub fn resources(&self) -> &[NamespaceEntry<Resource>] {
        &self.resources.items
    }

    /// All resource templates.
    pub fn resource_templates(&self) -> &[NamespaceEntry<ResourceTemplate>] {
        &self.resource_templates.items
    }

    /// All prompts.
    pub fn prompts(&self) -> &[NamespaceEntry<Prompt>] {
        &self.prompts.items
    }

    /// Look up a prompt by exposed name.
    pub fn prompt(&self, exposed: &str) -> Option<&NamespaceEntry<Prompt>> {
        self.prompts.get(exposed)
    }
}
