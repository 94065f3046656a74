//! Provider registry and tool discovery.
//!
//! The [`Registry`] owns every provider the bridge has started, keyed by
//! provider name, together with the tools each one declared. Discovery starts
//! all configured providers concurrently; a provider that fails to start or
//! to complete its handshake is recorded as failed and contributes no tools,
//! without affecting the others.

use std::collections::HashSet;
use std::sync::{Arc, PoisonError, RwLock, Weak};

use futures::future::join_all;
use indexmap::IndexMap;

use crate::bridge::handshake::handshake;
use crate::bridge::process::{ManagedProcess, ProcessState};
use crate::bridge::proxy::{materialize, ToolProxy};
use crate::bridge::router::Router;
use crate::config::{BridgeSettings, ProviderConfig};

/// A registered provider and its tools.
#[derive(Debug)]
struct ProviderEntry {
    process: Arc<ManagedProcess>,
    tools: Vec<ToolProxy>,
}

/// Result of [`Registry::load_all`].
#[derive(Debug, Clone)]
pub enum LoadedTools {
    /// All tools in provider order.
    Flat(Vec<ToolProxy>),
    /// Tools keyed by provider name, including providers with no tools.
    Grouped(IndexMap<String, Vec<ToolProxy>>),
}

impl LoadedTools {
    /// Total number of tools.
    #[must_use]
    pub fn tool_count(&self) -> usize {
        match self {
            Self::Flat(tools) => tools.len(),
            Self::Grouped(groups) => groups.values().map(Vec::len).sum(),
        }
    }

    /// Flattens into a single list in provider order.
    #[must_use]
    pub fn into_flat(self) -> Vec<ToolProxy> {
        match self {
            Self::Flat(tools) => tools,
            Self::Grouped(groups) => groups.into_values().flatten().collect(),
        }
    }
}

/// All providers known to the bridge.
#[derive(Debug)]
pub struct Registry {
    settings: BridgeSettings,
    providers: RwLock<IndexMap<String, ProviderEntry>>,
    this: Weak<Registry>,
}

impl Registry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new(settings: BridgeSettings) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            settings,
            providers: RwLock::new(IndexMap::new()),
            this: this.clone(),
        })
    }

    /// Returns the runtime settings.
    #[must_use]
    pub const fn settings(&self) -> &BridgeSettings {
        &self.settings
    }

    /// Returns a router bound to this registry.
    #[must_use]
    pub fn router(&self) -> Router {
        Router::new(self.this.clone())
    }

    /// Starts every provider in `configs` concurrently and collects the tools.
    ///
    /// Providers appear in the result in configuration order. With `group`
    /// set, the result has one entry per provider, possibly with no tools.
    /// A name repeated within `configs` is started once, from its first entry.
    pub async fn load_all(&self, configs: Vec<ProviderConfig>, group: bool) -> LoadedTools {
        let mut seen = HashSet::new();
        let configs: Vec<ProviderConfig> = configs
            .into_iter()
            .filter(|config| {
                let first = seen.insert(config.name.clone());
                if !first {
                    tracing::warn!(provider = %config.name, "Duplicate provider name, skipping");
                }
                first
            })
            .collect();

        let provider_count = configs.len();
        let loads = configs.into_iter().map(|config| async move {
            let name = config.name.clone();
            (name, self.load_provider(config).await)
        });
        let results = join_all(loads).await;

        let tool_count: usize = results.iter().map(|(_, tools)| tools.len()).sum();
        tracing::info!("Loaded {tool_count} tools from {provider_count} providers");

        if group {
            LoadedTools::Grouped(results.into_iter().collect())
        } else {
            LoadedTools::Flat(results.into_iter().flat_map(|(_, tools)| tools).collect())
        }
    }

    /// Starts one provider, performs the handshake and registers it.
    ///
    /// Failures are logged and recorded; the provider then has no tools. A
    /// name that is already registered is not started again and yields no
    /// tools.
    pub async fn load_provider(&self, config: ProviderConfig) -> Vec<ToolProxy> {
        if self.contains(&config.name) {
            tracing::warn!(provider = %config.name, "Provider already registered, skipping");
            return Vec::new();
        }

        tracing::debug!(provider = %config.name, command = %config.command, "Starting provider");
        match ManagedProcess::spawn(config.clone()) {
            Ok(process) => self.attach(process).await,
            Err(e) => {
                tracing::error!(provider = %config.name, error = %e, "Failed to start provider");
                let process = ManagedProcess::failed(config, &e);
                self.insert(Arc::new(process), Vec::new()).await;
                Vec::new()
            }
        }
    }

    /// Handshakes with an already started provider and registers it.
    ///
    /// This is the entry point for providers built with
    /// [`ManagedProcess::from_streams`].
    pub async fn attach(&self, process: ManagedProcess) -> Vec<ToolProxy> {
        let process = Arc::new(process);
        let tools = match handshake(&process, &self.settings).await {
            Ok(descriptors) => {
                let router = self.router();
                descriptors
                    .into_iter()
                    .map(|d| materialize(d, process.name(), &router))
                    .collect()
            }
            Err(e) => {
                tracing::error!(provider = %process.name(), error = %e, "Provider handshake failed");
                process.terminate().await;
                Vec::new()
            }
        };

        if self.insert(Arc::clone(&process), tools.clone()).await {
            tools
        } else {
            Vec::new()
        }
    }

    /// Adds an entry; returns `false` (and stops `process`) if the name is taken.
    async fn insert(&self, process: Arc<ManagedProcess>, tools: Vec<ToolProxy>) -> bool {
        let inserted = {
            let mut providers = self.write();
            let name = process.name().to_string();
            if providers.contains_key(&name) {
                false
            } else {
                providers.insert(
                    name,
                    ProviderEntry {
                        process: Arc::clone(&process),
                        tools,
                    },
                );
                true
            }
        };

        if !inserted {
            tracing::warn!(provider = %process.name(), "Provider already registered, stopping duplicate");
            process.terminate().await;
        }
        inserted
    }

    /// Returns the process registered under `name`.
    #[must_use]
    pub fn process(&self, name: &str) -> Option<Arc<ManagedProcess>> {
        self.read().get(name).map(|entry| Arc::clone(&entry.process))
    }

    /// Returns `true` if a provider named `name` is registered.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.read().contains_key(name)
    }

    /// Returns every tool in provider order.
    #[must_use]
    pub fn tools(&self) -> Vec<ToolProxy> {
        self.read()
            .values()
            .flat_map(|entry| entry.tools.iter().cloned())
            .collect()
    }

    /// Returns the tools of each provider, including providers with none.
    #[must_use]
    pub fn grouped(&self) -> IndexMap<String, Vec<ToolProxy>> {
        self.read()
            .iter()
            .map(|(name, entry)| (name.clone(), entry.tools.clone()))
            .collect()
    }

    /// Returns the registered provider names in registration order.
    #[must_use]
    pub fn provider_names(&self) -> Vec<String> {
        self.read().keys().cloned().collect()
    }

    /// Returns the state of the provider named `name`.
    #[must_use]
    pub fn status(&self, name: &str) -> Option<ProcessState> {
        self.process(name).map(|p| p.state())
    }

    /// Returns why the provider named `name` failed, if it did.
    #[must_use]
    pub fn failure(&self, name: &str) -> Option<String> {
        self.process(name).and_then(|p| p.failure())
    }

    /// Number of registered providers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.read().len()
    }

    /// Returns `true` if no provider is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Terminates every provider. Safe to call more than once.
    ///
    /// Entries stay registered so their final state can still be inspected.
    pub async fn shutdown(&self) {
        let processes: Vec<Arc<ManagedProcess>> = self
            .read()
            .values()
            .map(|entry| Arc::clone(&entry.process))
            .collect();
        tracing::debug!(count = processes.len(), "Terminating providers");
        join_all(processes.iter().map(|p| p.terminate())).await;
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, IndexMap<String, ProviderEntry>> {
        self.providers.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, IndexMap<String, ProviderEntry>> {
        self.providers.write().unwrap_or_else(PoisonError::into_inner)
    }
}
