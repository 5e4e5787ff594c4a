//! Versioned registries for workflows and activities.
//!
//! A registry maps names (case-insensitive) to factories. Lookups construct a
//! handler through the factory using a [`ServiceProvider`]; any construction
//! failure, including a panic, is logged and reported as "not found".
//! Workflows may be registered at several semver versions and resolved by a
//! [`VersionPolicy`]; activities always live at version 1.0.0.

use super::{ActivityHandler, FnActivity, FnWorkflow, WorkflowHandler, panic_message};
use crate::context::OrchestrationContext;
use crate::error::WorkflowError;
use crate::identity::TaskIdentifier;
use crate::runtime::activity::ActivityContext;
use crate::serializer;
use parking_lot::Mutex;
use semver::Version;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::any::{Any, TypeId};
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use thiserror::Error;

/// Default version for activities and unversioned workflow registrations
const DEFAULT_VERSION: Version = Version::new(1, 0, 0);

/// Why a factory could not produce a handler.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("construction failed: {0}")]
pub struct ConstructionError(pub String);

/// Collaborator that hands dependencies to handler factories.
pub trait ServiceProvider: Send + Sync {
    fn get_service(&self, type_id: TypeId) -> Option<Arc<dyn Any + Send + Sync>>;
}

impl dyn ServiceProvider + '_ {
    pub fn get<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.get_service(TypeId::of::<T>())
            .and_then(|service| service.downcast::<T>().ok())
    }

    /// Like [`get`](Self::get), failing with a [`ConstructionError`] when missing.
    pub fn require<T: Any + Send + Sync>(&self) -> Result<Arc<T>, ConstructionError> {
        self.get::<T>()
            .ok_or_else(|| ConstructionError(format!("missing service {}", std::any::type_name::<T>())))
    }
}

/// Type-keyed service map.
#[derive(Clone, Default)]
pub struct Services {
    map: HashMap<TypeId, Arc<dyn Any + Send + Sync>>,
}

impl Services {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with<T: Any + Send + Sync>(mut self, service: T) -> Self {
        self.map.insert(TypeId::of::<T>(), Arc::new(service));
        self
    }

    pub fn insert<T: Any + Send + Sync>(&mut self, service: Arc<T>) {
        self.map.insert(TypeId::of::<T>(), service);
    }
}

impl ServiceProvider for Services {
    fn get_service(&self, type_id: TypeId) -> Option<Arc<dyn Any + Send + Sync>> {
        self.map.get(&type_id).cloned()
    }
}

impl std::fmt::Debug for Services {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Services").field("count", &self.map.len()).finish()
    }
}

/// Handler types constructible from a [`ServiceProvider`].
pub trait FromServices: Sized {
    fn from_services(services: &dyn ServiceProvider) -> Result<Self, ConstructionError>;
}

/// Builds a handler on every lookup.
pub type Factory<H> = dyn Fn(&dyn ServiceProvider) -> Result<Arc<H>, ConstructionError> + Send + Sync;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum VersionPolicy {
    Latest,
    Exact(Version),
}

fn fold(name: &str) -> String {
    name.to_lowercase()
}

/// Parse a semver version. Plain numeric versions ("2", "2.1") are padded
/// with zero components, so "2" means 2.0.0.
pub fn parse_version(raw: &str) -> Result<Version, semver::Error> {
    let raw = raw.trim();
    let parts: Vec<&str> = raw.split('.').collect();
    let numeric = parts.len() < 3 && parts.iter().all(|p| !p.is_empty() && p.bytes().all(|b| b.is_ascii_digit()));
    if numeric {
        let mut padded = parts.join(".");
        for _ in parts.len()..3 {
            padded.push_str(".0");
        }
        return Version::parse(&padded);
    }
    Version::parse(raw)
}

fn shared<H: ?Sized + Send + Sync + 'static>(handler: Arc<H>) -> Arc<Factory<H>> {
    Arc::new(move |_: &dyn ServiceProvider| Ok(handler.clone()))
}

pub struct Registry<H: ?Sized> {
    inner: Arc<HashMap<String, BTreeMap<Version, Arc<Factory<H>>>>>,
    policy: Arc<Mutex<HashMap<String, VersionPolicy>>>,
}

// Manual Clone impl since H: ?Sized doesn't auto-derive Clone
impl<H: ?Sized> Clone for Registry<H> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            policy: Arc::clone(&self.policy),
        }
    }
}

impl<H: ?Sized> Default for Registry<H> {
    fn default() -> Self {
        Self {
            inner: Arc::new(HashMap::new()),
            policy: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

pub struct RegistryBuilder<H: ?Sized> {
    map: HashMap<String, BTreeMap<Version, Arc<Factory<H>>>>,
    policy: HashMap<String, VersionPolicy>,
    errors: Vec<String>,
}

pub type WorkflowRegistry = Registry<dyn WorkflowHandler>;
pub type ActivityRegistry = Registry<dyn ActivityHandler>;
pub type WorkflowRegistryBuilder = RegistryBuilder<dyn WorkflowHandler>;
pub type ActivityRegistryBuilder = RegistryBuilder<dyn ActivityHandler>;

impl<H: ?Sized> Registry<H> {
    pub fn builder() -> RegistryBuilder<H> {
        RegistryBuilder {
            map: HashMap::new(),
            policy: HashMap::new(),
            errors: Vec::new(),
        }
    }

    pub fn builder_from(reg: &Registry<H>) -> RegistryBuilder<H> {
        RegistryBuilder {
            map: reg.inner.as_ref().clone(),
            policy: reg.policy.lock().clone(),
            errors: Vec::new(),
        }
    }

    /// Pick the factory for `identifier`: its explicit version when present,
    /// otherwise whatever the name's policy selects.
    pub fn resolve(&self, identifier: &TaskIdentifier) -> Option<(Version, Arc<Factory<H>>)> {
        let name = fold(&identifier.name);
        let versions = self.inner.get(&name);

        let requested = match identifier.version.as_deref().map(str::trim).filter(|v| !v.is_empty()) {
            Some(raw) => match parse_version(raw) {
                Ok(v) => VersionPolicy::Exact(v),
                Err(err) => {
                    tracing::warn!(
                        target: "replayflow::runtime::registry",
                        name = %identifier.name,
                        version = raw,
                        error = %err,
                        "requested version is not valid semver"
                    );
                    self.log_registry_miss(&name, None);
                    return None;
                }
            },
            None => self.policy.lock().get(&name).cloned().unwrap_or(VersionPolicy::Latest),
        };

        let result = match &requested {
            VersionPolicy::Latest => versions
                .and_then(|m| m.iter().next_back())
                .map(|(v, f)| (v.clone(), f.clone())),
            VersionPolicy::Exact(v) => versions
                .and_then(|m| m.get(v))
                .map(|f| (v.clone(), Arc::clone(f))),
        };

        if result.is_none() {
            self.log_registry_miss(&name, Some(&requested));
        }
        result
    }

    /// Construct a handler, or `None` when unregistered or construction fails.
    pub fn try_create(&self, identifier: &TaskIdentifier, services: &dyn ServiceProvider) -> Option<Arc<H>> {
        let (version, factory) = self.resolve(identifier)?;
        match catch_unwind(AssertUnwindSafe(|| (factory.as_ref())(services))) {
            Ok(Ok(handler)) => Some(handler),
            Ok(Err(err)) => {
                tracing::warn!(
                    target: "replayflow::runtime::registry",
                    name = %identifier.name,
                    %version,
                    error = %err,
                    "handler construction failed; treating as not found"
                );
                None
            }
            Err(payload) => {
                tracing::warn!(
                    target: "replayflow::runtime::registry",
                    name = %identifier.name,
                    %version,
                    panic = %panic_message(payload.as_ref()),
                    "handler factory panicked; treating as not found"
                );
                None
            }
        }
    }

    pub fn set_version_policy(&self, name: &str, policy: VersionPolicy) {
        self.policy.lock().insert(fold(name), policy);
    }

    pub fn list_names(&self) -> Vec<String> {
        self.inner.keys().cloned().collect()
    }

    pub fn list_versions(&self, name: &str) -> Vec<Version> {
        self.inner
            .get(&fold(name))
            .map(|m| m.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn has(&self, name: &str) -> bool {
        self.inner.contains_key(&fold(name))
    }

    pub fn count(&self) -> usize {
        self.inner.len()
    }

    fn log_registry_miss(&self, name: &str, requested_policy: Option<&VersionPolicy>) {
        tracing::debug!(
            target: "replayflow::runtime::registry",
            requested_name = %name,
            requested_policy = ?requested_policy,
            available_versions = ?self.list_versions(name),
            registered_names = ?self.list_names(),
            "registry lookup miss"
        );
    }
}

impl<H: ?Sized + Send + Sync + 'static> RegistryBuilder<H> {
    pub fn build(self) -> Registry<H> {
        Registry {
            inner: Arc::new(self.map),
            policy: Arc::new(Mutex::new(self.policy)),
        }
    }

    /// Build the registry, failing if any registration was rejected.
    ///
    /// # Errors
    ///
    /// Returns every collected registration error joined by "; ".
    pub fn build_result(self) -> Result<Registry<H>, String> {
        if self.errors.is_empty() {
            Ok(self.build())
        } else {
            Err(self.errors.join("; "))
        }
    }

    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    /// Register a factory at version 1.0.0.
    pub fn register_factory<F>(self, name: impl Into<String>, factory: F) -> Self
    where
        F: Fn(&dyn ServiceProvider) -> Result<Arc<H>, ConstructionError> + Send + Sync + 'static,
    {
        self.insert(name.into(), DEFAULT_VERSION, Arc::new(factory))
    }

    pub fn register_handler(self, name: impl Into<String>, handler: Arc<H>) -> Self {
        self.insert(name.into(), DEFAULT_VERSION, shared(handler))
    }

    pub fn merge_registry(mut self, other: Registry<H>) -> Self {
        for (name, versions) in other.inner.iter() {
            let entry = self.map.entry(name.clone()).or_default();
            for (version, factory) in versions {
                if entry.contains_key(version) {
                    self.errors.push(format!("duplicate registration in merge: {name}@{version}"));
                } else {
                    entry.insert(version.clone(), factory.clone());
                }
            }
        }
        self
    }

    fn insert(mut self, name: String, version: Version, factory: Arc<Factory<H>>) -> Self {
        if name.trim().is_empty() {
            self.errors.push("registration with an empty name".to_string());
            return self;
        }
        let key = fold(&name);
        let entry = self.map.entry(key).or_default();
        if entry.contains_key(&version) {
            self.errors.push(format!("duplicate registration: {name}@{version}"));
            return self;
        }
        entry.insert(version, factory);
        self
    }

    fn insert_versioned(mut self, name: String, version: &str, factory: Arc<Factory<H>>) -> Self {
        let version = match parse_version(version) {
            Ok(v) => v,
            Err(err) => {
                self.errors.push(format!("invalid version for {name}: {version} ({err})"));
                return self;
            }
        };
        if let Some(latest) = self.map.get(&fold(&name)).and_then(|m| m.keys().next_back()) {
            if &version < latest {
                let message = format!("non-monotonic version for {name}: {version} is older than {latest}");
                self.errors.push(message);
                return self;
            }
        }
        self.insert(name, version, factory)
    }
}

impl WorkflowRegistryBuilder {
    pub fn register<F, Fut>(self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(OrchestrationContext, String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<String, WorkflowError>> + Send + 'static,
    {
        let handler: Arc<dyn WorkflowHandler> = Arc::new(FnWorkflow(f));
        self.register_handler(name, handler)
    }

    /// Register a body taking and returning serde types; payloads go through
    /// the context's serializer.
    pub fn register_typed<In, Out, F, Fut>(self, name: impl Into<String>, f: F) -> Self
    where
        In: DeserializeOwned + Send + 'static,
        Out: Serialize + Send + 'static,
        F: Fn(OrchestrationContext, In) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Out, WorkflowError>> + Send + 'static,
    {
        self.register(name, typed_workflow(f))
    }

    pub fn register_versioned<F, Fut>(self, name: impl Into<String>, version: impl AsRef<str>, f: F) -> Self
    where
        F: Fn(OrchestrationContext, String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<String, WorkflowError>> + Send + 'static,
    {
        let handler: Arc<dyn WorkflowHandler> = Arc::new(FnWorkflow(f));
        self.insert_versioned(name.into(), version.as_ref(), shared(handler))
    }

    pub fn register_versioned_typed<In, Out, F, Fut>(
        self,
        name: impl Into<String>,
        version: impl AsRef<str>,
        f: F,
    ) -> Self
    where
        In: DeserializeOwned + Send + 'static,
        Out: Serialize + Send + 'static,
        F: Fn(OrchestrationContext, In) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Out, WorkflowError>> + Send + 'static,
    {
        self.register_versioned(name, version, typed_workflow(f))
    }

    /// Register a handler type built from services on every lookup.
    pub fn register_type<T>(self, name: impl Into<String>) -> Self
    where
        T: WorkflowHandler + FromServices + 'static,
    {
        self.register_factory(name, |services: &dyn ServiceProvider| {
            let handler: Arc<dyn WorkflowHandler> = Arc::new(T::from_services(services)?);
            Ok(handler)
        })
    }

    pub fn set_policy(mut self, name: impl Into<String>, policy: VersionPolicy) -> Self {
        self.policy.insert(fold(&name.into()), policy);
        self
    }

    pub fn merge(self, other: WorkflowRegistry) -> Self {
        self.merge_registry(other)
    }
}

fn typed_workflow<In, Out, F, Fut>(
    f: F,
) -> impl Fn(OrchestrationContext, String) -> futures::future::BoxFuture<'static, Result<String, WorkflowError>>
+ Send
+ Sync
+ 'static
where
    In: DeserializeOwned + Send + 'static,
    Out: Serialize + Send + 'static,
    F: Fn(OrchestrationContext, In) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Out, WorkflowError>> + Send + 'static,
{
    let f = Arc::new(f);
    move |ctx: OrchestrationContext, input: String| {
        let f = f.clone();
        Box::pin(async move {
            let serializer = ctx.serializer();
            let input: In = serializer::decode(serializer.as_ref(), Some(&input))?;
            let out = f(ctx, input).await?;
            serializer::encode(serializer.as_ref(), &out)
        })
    }
}

impl ActivityRegistryBuilder {
    pub fn register<F, Fut>(self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(ActivityContext, String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<String, WorkflowError>> + Send + 'static,
    {
        let handler: Arc<dyn ActivityHandler> = Arc::new(FnActivity(f));
        self.register_handler(name, handler)
    }

    pub fn register_typed<In, Out, F, Fut>(self, name: impl Into<String>, f: F) -> Self
    where
        In: DeserializeOwned + Send + 'static,
        Out: Serialize + Send + 'static,
        F: Fn(ActivityContext, In) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Out, WorkflowError>> + Send + 'static,
    {
        let f = Arc::new(f);
        self.register(name, move |ctx: ActivityContext, input: String| {
            let f = f.clone();
            async move {
                let serializer = ctx.serializer();
                let input: In = ctx.decode(&input)?;
                let out = f(ctx, input).await?;
                serializer::encode(serializer.as_ref(), &out)
            }
        })
    }

    pub fn register_type<T>(self, name: impl Into<String>) -> Self
    where
        T: ActivityHandler + FromServices + 'static,
    {
        self.register_factory(name, |services: &dyn ServiceProvider| {
            let handler: Arc<dyn ActivityHandler> = Arc::new(T::from_services(services)?);
            Ok(handler)
        })
    }

    pub fn merge(self, other: ActivityRegistry) -> Self {
        self.merge_registry(other)
    }
}

/// Workflow and activity registries consulted by the worker.
#[derive(Clone, Default)]
pub struct TaskRegistry {
    pub workflows: WorkflowRegistry,
    pub activities: ActivityRegistry,
}

impl TaskRegistry {
    pub fn new(workflows: WorkflowRegistry, activities: ActivityRegistry) -> Self {
        Self { workflows, activities }
    }

    pub fn try_create_workflow(
        &self,
        identifier: &TaskIdentifier,
        services: &dyn ServiceProvider,
    ) -> Option<Arc<dyn WorkflowHandler>> {
        self.workflows.try_create(identifier, services)
    }

    pub fn try_create_activity(
        &self,
        identifier: &TaskIdentifier,
        services: &dyn ServiceProvider,
    ) -> Option<Arc<dyn ActivityHandler>> {
        self.activities.try_create(identifier, services)
    }
}
