use crate::errors::{Result, ToolError};
use crate::model::{split_dotted_name, ToolMetadata};
use crate::remote::RemoteAdapter;
use crate::tool::Tool;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

pub const DEFAULT_NAMESPACE: &str = "";

/// Key a tool is stored under: `(namespace, bare_name)`.
type ToolKey = (String, String);

fn key_for(namespace: Option<&str>, name: &str) -> ToolKey {
    (namespace.unwrap_or(DEFAULT_NAMESPACE).to_string(), name.to_string())
}

/// A factory used to instantiate a deferred tool's concrete implementation
/// on first use.
pub type ToolFactory = Arc<dyn Fn() -> Result<Arc<dyn Tool>> + Send + Sync>;

enum Entry {
    Loaded(Arc<dyn Tool>),
    /// Not yet instantiated. `factory` builds a local tool; if absent, the
    /// tool is resolved via the namespace's registered `RemoteAdapter`
    /// instead (remote proxy construction).
    Deferred {
        metadata: ToolMetadata,
        factory: Option<ToolFactory>,
    },
}

/// Canonical store of tools and their metadata, scoped by namespace.
/// Supports deferred loading: a tool can be registered with only enough
/// metadata for discovery, and instantiated lazily on first use.
pub struct Registry {
    entries: RwLock<HashMap<ToolKey, Entry>>,
    metadata: RwLock<HashMap<ToolKey, ToolMetadata>>,
    remote_adapters: RwLock<HashMap<String, Arc<RemoteAdapter>>>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            metadata: RwLock::new(HashMap::new()),
            remote_adapters: RwLock::new(HashMap::new()),
        }
    }

    /// Register an already-instantiated tool. If `name` contains a dot and
    /// `namespace` is `None`, the dot splits into namespace + bare name;
    /// otherwise an explicit `namespace` wins. Re-registering a name
    /// replaces the prior entry atomically.
    pub async fn register(
        &self,
        tool: Arc<dyn Tool>,
        name: Option<&str>,
        namespace: Option<&str>,
    ) -> Result<()> {
        let raw_name = name.unwrap_or_else(|| tool.name());
        let (resolved_ns, resolved_name) = if namespace.is_none() {
            match split_dotted_name(raw_name) {
                (Some(ns), rest) => (Some(ns.to_string()), rest.to_string()),
                (None, rest) => (tool.namespace().map(str::to_string), rest.to_string()),
            }
        } else {
            (namespace.map(str::to_string), raw_name.to_string())
        };

        if resolved_name.is_empty() {
            return Err(ToolError::RegistrationFailed(
                "tool name must not be empty".into(),
            ));
        }

        let key = key_for(resolved_ns.as_deref(), &resolved_name);
        let meta = crate::tool::describe(tool.as_ref(), format!("registered tool '{resolved_name}'"));

        let mut entries = self.entries.write().await;
        if entries.contains_key(&key) {
            debug!(tool = %resolved_name, namespace = ?resolved_ns, "replacing existing registration");
        }
        entries.insert(key.clone(), Entry::Loaded(tool));
        drop(entries);
        self.metadata.write().await.insert(key, meta);
        Ok(())
    }

    /// Register a deferred tool: metadata only, instantiated on first use
    /// via `factory`. `factory: None` means the tool resolves through the
    /// namespace's `RemoteAdapter` at load time.
    pub async fn register_deferred(
        &self,
        mut metadata: ToolMetadata,
        namespace: Option<&str>,
        factory: Option<ToolFactory>,
    ) -> Result<()> {
        if factory.is_none() && namespace.is_none() {
            return Err(ToolError::Configuration(
                "deferred tool factory parameters are incomplete: no factory and no namespace to resolve a remote adapter".into(),
            ));
        }
        metadata.defer_loading = true;
        metadata.namespace = namespace.map(str::to_string).or(metadata.namespace.clone());
        let key = key_for(namespace, &metadata.name);
        self.entries.write().await.insert(
            key.clone(),
            Entry::Deferred {
                metadata: metadata.clone(),
                factory,
            },
        );
        self.metadata.write().await.insert(key, metadata);
        Ok(())
    }

    pub async fn register_remote_adapter(&self, namespace: impl Into<String>, adapter: Arc<RemoteAdapter>) {
        self.remote_adapters.write().await.insert(namespace.into(), adapter);
    }

    /// Every registered `RemoteAdapter`, for lifecycle calls (`initialise`/
    /// `close`) that the Processor drives on `open`/`close`.
    pub async fn remote_adapters(&self) -> Vec<Arc<RemoteAdapter>> {
        self.remote_adapters.read().await.values().cloned().collect()
    }

    /// Resolve and return a tool, loading it lazily if deferred.
    pub async fn get_tool(&self, name: &str, namespace: Option<&str>) -> Result<Arc<dyn Tool>> {
        let (ns, bare) = if namespace.is_none() {
            split_dotted_name(name)
        } else {
            (namespace, name)
        };
        let key = key_for(ns, bare);

        {
            let entries = self.entries.read().await;
            if let Some(Entry::Loaded(tool)) = entries.get(&key) {
                return Ok(tool.clone());
            }
        }

        self.load_deferred_tool(bare, ns).await
    }

    /// Instantiate a deferred tool via its recorded factory, or via the
    /// namespace's `RemoteAdapter` for remote tools, and cache the result.
    pub async fn load_deferred_tool(&self, name: &str, namespace: Option<&str>) -> Result<Arc<dyn Tool>> {
        let key = key_for(namespace, name);
        let factory = {
            let entries = self.entries.read().await;
            match entries.get(&key) {
                Some(Entry::Loaded(tool)) => return Ok(tool.clone()),
                Some(Entry::Deferred { factory, .. }) => factory.clone(),
                None => return Err(ToolError::NotFound(format!("{key:?}"))),
            }
        };

        let tool: Arc<dyn Tool> = match factory {
            Some(f) => f()?,
            None => {
                let ns = namespace.ok_or_else(|| {
                    ToolError::Configuration(format!("tool '{name}' has no namespace to resolve a remote adapter"))
                })?;
                let adapter = self
                    .remote_adapters
                    .read()
                    .await
                    .get(ns)
                    .cloned()
                    .ok_or_else(|| {
                        ToolError::Configuration(format!(
                            "no remote adapter registered for namespace '{ns}'"
                        ))
                    })?;
                Arc::new(crate::remote::RemoteProxyTool::new(adapter, name.to_string(), ns.to_string()))
            }
        };

        self.entries.write().await.insert(key, Entry::Loaded(tool.clone()));
        Ok(tool)
    }

    /// Enumerate metadata for all registered tools, optionally scoped to a
    /// namespace.
    pub async fn list_tools(&self, namespace: Option<&str>) -> Vec<ToolMetadata> {
        let metadata = self.metadata.read().await;
        let mut out: Vec<ToolMetadata> = metadata
            .iter()
            .filter(|((ns, _), _)| namespace.is_none() || ns.as_str() == namespace.unwrap_or(DEFAULT_NAMESPACE))
            .map(|(_, meta)| meta.clone())
            .collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        out
    }

    pub async fn get_tool_count(&self) -> usize {
        self.metadata.read().await.len()
    }

    /// Keyword-and-substring ranked search over name + `search_keywords` +
    /// description, so deferred tools can be found without loading them.
    pub async fn search_deferred_tools(
        &self,
        query: &str,
        tags: Option<&[String]>,
        limit: usize,
    ) -> Vec<ToolMetadata> {
        let query_lower = query.to_lowercase();
        let terms: Vec<&str> = query_lower.split_whitespace().collect();
        let metadata = self.metadata.read().await;

        let mut scored: Vec<(i64, ToolMetadata)> = metadata
            .values()
            .filter(|m| {
                tags.is_none_or(|tags| tags.iter().all(|t| m.tags.contains(t)))
            })
            .filter_map(|m| score(m, &terms).map(|score| (score, m.clone())))
            .collect();

        scored.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.name.cmp(&b.1.name)));
        scored.into_iter().take(limit).map(|(_, m)| m).collect()
    }
}

fn score(meta: &ToolMetadata, terms: &[&str]) -> Option<i64> {
    if terms.is_empty() {
        return Some(0);
    }
    let haystacks = [
        (meta.name.to_lowercase(), 3),
        (meta.search_keywords.join(" ").to_lowercase(), 2),
        (meta.description.to_lowercase(), 1),
    ];
    let mut total = 0i64;
    let mut any_match = false;
    for term in terms {
        for (haystack, weight) in &haystacks {
            if haystack.contains(term) {
                total += weight;
                any_match = true;
            }
        }
    }
    any_match.then_some(total)
}

#[cfg(test)]
mod tests;
