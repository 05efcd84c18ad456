use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use campus_common::Result;
use campus_config::ToolsConfig;
use campus_db::SharedCampusStore;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures::FutureExt;
use futures::future::{BoxFuture, Shared, join_all};
use serde::Serialize;
use tracing::{debug, info, warn};

use super::legacy::{AliasTool, ClientActionTool, legacy_alias};
use super::{
    AnyQueryTool, OrganizationOverviewTool, ReadDataRecordTool, RenderComponentTool,
    RunWorkflowTool, Tool, ToolCategory,
};
use crate::providers::ToolDefinition;

/// Builds a tool implementation on first use.
pub type ToolFactory = Arc<dyn Fn() -> BoxFuture<'static, Result<Arc<dyn Tool>>> + Send + Sync>;

type SharedLoad = Shared<BoxFuture<'static, Option<Arc<ToolDescriptor>>>>;

/// Stable index into the registration table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ToolHandle(usize);

impl ToolHandle {
    pub fn index(&self) -> usize {
        self.0
    }
}

struct Registration {
    name: String,
    category: ToolCategory,
    weight: i32,
    factory: ToolFactory,
}

/// Resolved, executable tool. Shared read-only once cached.
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub parameter_schema: serde_json::Value,
    pub weight: i32,
    pub category: ToolCategory,
    /// Registration backing this descriptor; `None` for pure legacy stubs.
    pub handle: Option<ToolHandle>,
    pub legacy: bool,
    implementation: Arc<dyn Tool>,
}

impl ToolDescriptor {
    fn new(implementation: Arc<dyn Tool>, handle: Option<ToolHandle>, weight: i32, legacy: bool) -> Self {
        Self {
            name: implementation.name().to_string(),
            description: implementation.description().to_string(),
            parameter_schema: implementation.input_schema(),
            category: implementation.category(),
            weight,
            handle,
            legacy,
            implementation,
        }
    }

    pub fn implementation(&self) -> &Arc<dyn Tool> {
        &self.implementation
    }

    pub fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name.clone(),
            description: self.description.clone(),
            input_schema: self.parameter_schema.clone(),
        }
    }
}

impl std::fmt::Debug for ToolDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolDescriptor")
            .field("name", &self.name)
            .field("category", &self.category)
            .field("weight", &self.weight)
            .field("legacy", &self.legacy)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RegistryStats {
    pub size: usize,
    pub tools: Vec<String>,
    pub registered: usize,
    pub resolution_attempts: usize,
}

/// Static capability table plus a lazily filled descriptor cache.
pub struct ToolRegistry {
    registrations: Vec<Registration>,
    index: HashMap<String, usize>,
    cache: DashMap<String, Arc<ToolDescriptor>>,
    in_flight: DashMap<String, SharedLoad>,
    resolution_attempts: Arc<AtomicUsize>,
    default_tools: Vec<String>,
    fallback_tools: Vec<String>,
}

impl ToolRegistry {
    pub fn new(default_tools: Vec<String>, fallback_tools: Vec<String>) -> Self {
        Self {
            registrations: Vec::new(),
            index: HashMap::new(),
            cache: DashMap::new(),
            in_flight: DashMap::new(),
            resolution_attempts: Arc::new(AtomicUsize::new(0)),
            default_tools,
            fallback_tools,
        }
    }

    /// Registry populated with every built-in tool.
    pub fn with_builtin_tools(store: SharedCampusStore, config: &ToolsConfig) -> Self {
        let mut registry = Self::new(config.default_tools.clone(), config.fallback_tools.clone());
        registry.register_tool(Arc::new(RenderComponentTool));
        registry.register_tool(Arc::new(AnyQueryTool::new(Arc::clone(&store))));
        registry.register_tool(Arc::new(ReadDataRecordTool::new(Arc::clone(&store))));
        registry.register_tool(Arc::new(OrganizationOverviewTool::new(store)));
        registry.register_tool(Arc::new(RunWorkflowTool));
        registry
    }

    /// Register a lazily constructed tool. Re-registering a name replaces
    /// the entry in the table but never a descriptor already cached.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        category: ToolCategory,
        weight: i32,
        factory: ToolFactory,
    ) -> ToolHandle {
        let name = name.into();
        let registration = Registration {
            name: name.clone(),
            category,
            weight,
            factory,
        };
        let idx = match self.index.get(&name) {
            Some(&idx) => {
                self.registrations[idx] = registration;
                idx
            }
            None => {
                self.registrations.push(registration);
                self.registrations.len() - 1
            }
        };
        self.index.insert(name.clone(), idx);
        info!("registered tool: {name}");
        ToolHandle(idx)
    }

    /// Register an already constructed tool.
    pub fn register_tool(&mut self, tool: Arc<dyn Tool>) -> ToolHandle {
        let name = tool.name();
        let category = tool.category();
        let weight = tool.weight();
        let factory: ToolFactory = Arc::new(move || {
            let tool = Arc::clone(&tool);
            async move { Ok::<Arc<dyn Tool>, campus_common::Error>(tool) }.boxed()
        });
        self.register(name, category, weight, factory)
    }

    pub fn default_tools(&self) -> &[String] {
        &self.default_tools
    }

    pub fn fallback_tools(&self) -> &[String] {
        &self.fallback_tools
    }

    /// Registered or legacy-compatible.
    pub fn is_known(&self, name: &str) -> bool {
        self.index.contains_key(name) || legacy_alias(name).is_some()
    }

    pub fn category_of(&self, name: &str) -> Option<ToolCategory> {
        match self.index.get(name) {
            Some(&idx) => Some(self.registrations[idx].category),
            None => legacy_alias(name).map(|alias| alias.category),
        }
    }

    /// Weight used for scoring before the tool is loaded.
    pub fn static_weight(&self, name: &str) -> i32 {
        self.index
            .get(name)
            .map(|&idx| self.registrations[idx].weight)
            .unwrap_or(0)
    }

    /// Registered tool names in a permission group, in registration order.
    pub fn names_in_group(&self, group: &str) -> Vec<String> {
        self.registrations
            .iter()
            .filter(|r| r.category.group() == group)
            .map(|r| r.name.clone())
            .collect()
    }

    /// Resolve every name concurrently. Unresolvable names come back as
    /// `None` in their original position.
    pub async fn load(&self, names: &[String]) -> Vec<Option<Arc<ToolDescriptor>>> {
        join_all(names.iter().map(|name| self.load_one(name))).await
    }

    /// [`Self::load`] with the holes dropped.
    pub async fn load_available(&self, names: &[String]) -> Vec<Arc<ToolDescriptor>> {
        self.load(names).await.into_iter().flatten().collect()
    }

    pub async fn load_one(&self, name: &str) -> Option<Arc<ToolDescriptor>> {
        if let Some(hit) = self.cache.get(name) {
            return Some(Arc::clone(hit.value()));
        }

        let load = match self.in_flight.entry(name.to_string()) {
            Entry::Occupied(existing) => {
                debug!(tool = name, "joining in-flight tool load");
                existing.get().clone()
            }
            Entry::Vacant(slot) => {
                // A load may have finished between the cache probe and the claim.
                if let Some(hit) = self.cache.get(name) {
                    return Some(Arc::clone(hit.value()));
                }
                let load = self.resolution(name).shared();
                slot.insert(load.clone());
                load
            }
        };

        let resolved = load.clone().await;
        let resolved = resolved.map(|descriptor| {
            Arc::clone(
                self.cache
                    .entry(name.to_string())
                    .or_insert_with(|| descriptor)
                    .value(),
            )
        });
        self.in_flight
            .remove_if(name, |_, current| current.ptr_eq(&load));
        resolved
    }

    fn resolution(&self, name: &str) -> BoxFuture<'static, Option<Arc<ToolDescriptor>>> {
        let attempts = Arc::clone(&self.resolution_attempts);
        let primary = self.index.get(name).map(|&idx| {
            let registration = &self.registrations[idx];
            (ToolHandle(idx), registration.weight, Arc::clone(&registration.factory))
        });
        let legacy = legacy_alias(name).map(|alias| {
            let target = alias
                .replacement
                .and_then(|replacement| self.index.get(replacement))
                .map(|&idx| (ToolHandle(idx), Arc::clone(&self.registrations[idx].factory)));
            (alias, target)
        });
        let name = name.to_string();

        async move {
            attempts.fetch_add(1, Ordering::SeqCst);

            if let Some((handle, weight, factory)) = primary {
                match factory().await {
                    Ok(tool) => {
                        return Some(Arc::new(ToolDescriptor::new(tool, Some(handle), weight, false)));
                    }
                    Err(e) => warn!(tool = %name, "tool construction failed: {e}"),
                }
            }

            let Some((alias, target)) = legacy else {
                warn!(tool = %name, "unknown tool requested");
                return None;
            };

            let (implementation, handle): (Arc<dyn Tool>, Option<ToolHandle>) = match target {
                Some((handle, factory)) => match factory().await {
                    Ok(inner) => (Arc::new(AliasTool::new(alias, inner)), Some(handle)),
                    Err(e) => {
                        warn!(tool = %name, "legacy replacement failed to load: {e}");
                        (Arc::new(ClientActionTool::new(alias)), None)
                    }
                },
                None => (Arc::new(ClientActionTool::new(alias)), None),
            };
            info!(tool = %name, "resolved through legacy compatibility path");
            Some(Arc::new(ToolDescriptor::new(implementation, handle, 0, true)))
        }
        .boxed()
    }

    pub fn clear_cache(&self) {
        let cleared = self.cache.len();
        self.cache.clear();
        info!(cleared, "tool descriptor cache cleared");
    }

    pub fn resolution_attempts(&self) -> usize {
        self.resolution_attempts.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> RegistryStats {
        let mut tools: Vec<String> = self.cache.iter().map(|e| e.key().clone()).collect();
        tools.sort();
        RegistryStats {
            size: tools.len(),
            tools,
            registered: self.registrations.len(),
            resolution_attempts: self.resolution_attempts(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::{ToolContext, ToolOutput};
    use async_trait::async_trait;
    use campus_common::Error;
    use std::time::Duration;

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &'static str {
            "echo"
        }

        fn description(&self) -> &'static str {
            "echo input"
        }

        fn input_schema(&self) -> serde_json::Value {
            serde_json::json!({"type": "object"})
        }

        fn category(&self) -> ToolCategory {
            ToolCategory::UiDisplay
        }

        async fn execute(
            &self,
            _context: &ToolContext,
            input: serde_json::Value,
        ) -> Result<ToolOutput> {
            Ok(ToolOutput::success("echo", input))
        }
    }

    fn slow_factory(delay: Duration) -> ToolFactory {
        Arc::new(move || {
            async move {
                tokio::time::sleep(delay).await;
                Ok::<Arc<dyn Tool>, Error>(Arc::new(EchoTool))
            }
            .boxed()
        })
    }

    fn registry() -> ToolRegistry {
        ToolRegistry::new(vec!["echo".to_string()], vec!["echo".to_string()])
    }

    #[tokio::test]
    async fn load_caches_descriptor() {
        let mut r = registry();
        r.register_tool(Arc::new(EchoTool));
        let first = r.load_one("echo").await.unwrap();
        let second = r.load_one("echo").await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(r.resolution_attempts(), 1);
        assert_eq!(r.stats().tools, vec!["echo".to_string()]);
    }

    #[tokio::test]
    async fn concurrent_loads_share_one_resolution() {
        let mut r = registry();
        r.register("echo", ToolCategory::UiDisplay, 0, slow_factory(Duration::from_millis(50)));
        let names = vec!["echo".to_string()];
        let (a, b) = tokio::join!(r.load(&names), r.load(&names));
        assert!(a[0].is_some() && b[0].is_some());
        assert_eq!(r.resolution_attempts(), 1);
    }

    #[tokio::test]
    async fn unknown_names_leave_holes() {
        let mut r = registry();
        r.register_tool(Arc::new(EchoTool));
        let loaded = r
            .load(&["echo".to_string(), "nope".to_string()])
            .await;
        assert!(loaded[0].is_some());
        assert!(loaded[1].is_none());
        assert_eq!(r.load_available(&["nope".to_string()]).await.len(), 0);
    }

    #[tokio::test]
    async fn failed_factory_falls_through() {
        let mut r = registry();
        let failing: ToolFactory =
            Arc::new(|| async { Err::<Arc<dyn Tool>, _>(Error::Tool("boom".to_string())) }.boxed());
        r.register("echo", ToolCategory::UiDisplay, 0, failing);
        assert!(r.load_one("echo").await.is_none());
        assert!(r.stats().tools.is_empty());
    }

    #[tokio::test]
    async fn legacy_name_without_replacement_resolves_to_stub() {
        let r = registry();
        let descriptor = r.load_one("navigate_page").await.unwrap();
        assert!(descriptor.legacy);
        assert!(descriptor.handle.is_none());
        assert_eq!(descriptor.category, ToolCategory::PageOperation);
        assert!(r.is_known("navigate_page"));
    }

    #[tokio::test]
    async fn clear_cache_forces_new_resolution() {
        let mut r = registry();
        r.register_tool(Arc::new(EchoTool));
        r.load_one("echo").await;
        r.clear_cache();
        assert_eq!(r.stats().size, 0);
        r.load_one("echo").await;
        assert_eq!(r.resolution_attempts(), 2);
    }

    #[test]
    fn group_membership_uses_registration_category() {
        let mut r = registry();
        r.register_tool(Arc::new(EchoTool));
        assert_eq!(r.names_in_group("ui_display"), vec!["echo".to_string()]);
        assert!(r.names_in_group("data_query").is_empty());
        assert_eq!(r.category_of("query_data"), Some(ToolCategory::DataQuery));
    }
}
