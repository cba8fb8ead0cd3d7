//! One-shot backend bootstrap and the readiness signal.
//!
//! [`BackendInit`] runs the startup sequence exactly once per process:
//! dependency check, store handle acquisition, anonymous sign-in. On success
//! it publishes a [`BackendContext`] into a single-resolution slot. Every
//! [`Readiness`] handed out before or after that point observes it, either by
//! awaiting [`Readiness::ready`] or by querying [`Readiness::is_ready`]
//! synchronously.
//!
//! # Example
//!
//! ```rust,ignore
//! let init = BackendInit::new(BackendConfig::from_env());
//! let readiness = init.readiness();
//!
//! tokio::spawn(async move {
//!     if let Err(e) = init.initialize(&backend).await {
//!         // Already logged; the process stays unready.
//!     }
//! });
//!
//! let context = readiness.ready().await;
//! ```

use std::env;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::{debug, error, info};

use crate::error::{Result, RoomSyncError};
use crate::store::KeyValueStore;

/// Environment variable read by [`BackendConfig::from_env`].
pub const DATABASE_URL_ENV: &str = "ROOM_SYNC_DATABASE_URL";

/// Identity assigned by the backend's anonymous sign-in.
pub type UserId = String;

// ── Dependency status ───────────────────────────────────────────────

/// Outcome of the platform dependency check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DependencyStatus {
    /// All dependencies are present and usable.
    Available,
    /// A required service is disabled on this device.
    UnavailableDisabled,
    /// A required service is installed but invalid.
    UnavailableInvalid,
    /// A required service is missing.
    UnavailableMissing,
    /// The app lacks permission to use a required service.
    UnavailablePermission,
    /// A required service is being updated.
    UnavailableUpdating,
    /// A required service must be updated before use.
    UnavailableUpdateRequired,
    /// Any other failure.
    UnavailableOther,
}

impl DependencyStatus {
    /// Returns `true` only for [`DependencyStatus::Available`].
    pub fn is_available(self) -> bool {
        self == Self::Available
    }

    /// Returns a human-readable description of this status.
    pub fn description(self) -> &'static str {
        match self {
            Self::Available => "available",
            Self::UnavailableDisabled => "a required service is disabled",
            Self::UnavailableInvalid => "a required service is invalid",
            Self::UnavailableMissing => "a required service is missing",
            Self::UnavailablePermission => "missing permission for a required service",
            Self::UnavailableUpdating => "a required service is updating",
            Self::UnavailableUpdateRequired => "a required service needs an update",
            Self::UnavailableOther => "unavailable for an unknown reason",
        }
    }
}

impl fmt::Display for DependencyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description())
    }
}

// ── Backend trait ───────────────────────────────────────────────────

/// The services a backend offers during bootstrap.
#[async_trait]
pub trait Backend: Send + Sync + 'static {
    /// Verify (and where possible repair) the platform dependencies.
    async fn check_dependencies(&self) -> DependencyStatus;

    /// Obtain a handle to the key-value store.
    ///
    /// `endpoint` is the database URL to connect to, or `None` to use the
    /// backend's default instance.
    ///
    /// # Errors
    ///
    /// Returns [`RoomSyncError::StoreUnavailable`] if no handle can be created.
    async fn open_store(&self, endpoint: Option<&str>) -> Result<Arc<dyn KeyValueStore>>;

    /// Acquire an anonymous identity, returning its user id.
    ///
    /// # Errors
    ///
    /// Returns [`RoomSyncError::AuthFailure`] if sign-in is rejected or cancelled.
    async fn sign_in_anonymously(&self) -> Result<UserId>;
}

// ── Configuration ───────────────────────────────────────────────────

/// Configuration for [`BackendInit`].
///
/// # Example
///
/// ```
/// use room_sync::backend::BackendConfig;
///
/// let config = BackendConfig::new().with_database_url("https://example-rtdb.local/");
/// assert_eq!(config.database_url.as_deref(), Some("https://example-rtdb.local/"));
///
/// // An empty URL falls back to the backend's default instance.
/// assert!(BackendConfig::new().with_database_url("").database_url.is_none());
/// ```
#[derive(Debug, Clone, Default)]
pub struct BackendConfig {
    /// Database URL overriding the backend's default instance.
    pub database_url: Option<String>,
}

impl BackendConfig {
    /// A configuration that uses the backend's default instance.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a configuration from the [`DATABASE_URL_ENV`] environment variable.
    pub fn from_env() -> Self {
        Self::from_env_value(env::var(DATABASE_URL_ENV).ok())
    }

    fn from_env_value(value: Option<String>) -> Self {
        match value {
            Some(url) => Self::new().with_database_url(url),
            None => Self::new(),
        }
    }

    /// Connect to `url` instead of the default instance. Empty strings are ignored.
    #[must_use]
    pub fn with_database_url(mut self, url: impl Into<String>) -> Self {
        let url = url.into();
        self.database_url = if url.is_empty() { None } else { Some(url) };
        self
    }
}

// ── Context ─────────────────────────────────────────────────────────

/// Handles published once the backend is ready.
pub struct BackendContext {
    store: Arc<dyn KeyValueStore>,
    user_id: UserId,
    endpoint: Option<String>,
}

impl BackendContext {
    /// The root store handle.
    pub fn store(&self) -> &Arc<dyn KeyValueStore> {
        &self.store
    }

    /// The anonymous user id of this process.
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// The database URL in use, `None` for the default instance.
    pub fn endpoint(&self) -> Option<&str> {
        self.endpoint.as_deref()
    }
}

impl fmt::Debug for BackendContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendContext")
            .field("user_id", &self.user_id)
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}

// ── Readiness ───────────────────────────────────────────────────────

/// Read side of the one-shot readiness signal.
///
/// Cheap to clone. Late subscribers see an already-resolved state without
/// re-registering.
#[derive(Debug, Clone)]
pub struct Readiness {
    rx: watch::Receiver<Option<Arc<BackendContext>>>,
}

impl Readiness {
    /// Returns `true` once the backend is ready.
    pub fn is_ready(&self) -> bool {
        self.rx.borrow().is_some()
    }

    /// The published context, if ready.
    pub fn context(&self) -> Option<Arc<BackendContext>> {
        self.rx.borrow().clone()
    }

    /// Wait until the backend is ready.
    ///
    /// Resolves immediately when already ready. Resolves `None` only if the
    /// [`BackendInit`] was dropped without ever becoming ready.
    pub async fn ready(&self) -> Option<Arc<BackendContext>> {
        let mut rx = self.rx.clone();
        let context = match rx.wait_for(Option::is_some).await {
            Ok(slot) => slot.clone(),
            Err(_) => None,
        };
        context
    }
}

// ── Initializer ─────────────────────────────────────────────────────

/// Runs the backend startup sequence once and owns the readiness slot.
pub struct BackendInit {
    config: BackendConfig,
    slot: watch::Sender<Option<Arc<BackendContext>>>,
    attempted: AtomicBool,
}

impl BackendInit {
    /// Create an initializer. Nothing happens until [`initialize`](Self::initialize).
    pub fn new(config: BackendConfig) -> Self {
        let (slot, _rx) = watch::channel(None);
        Self {
            config,
            slot,
            attempted: AtomicBool::new(false),
        }
    }

    /// A new readiness receiver. Valid before and after initialization.
    pub fn readiness(&self) -> Readiness {
        Readiness {
            rx: self.slot.subscribe(),
        }
    }

    /// Returns `true` once the backend is ready.
    pub fn is_ready(&self) -> bool {
        self.slot.borrow().is_some()
    }

    /// Run the startup sequence.
    ///
    /// Only the first call does any work. On failure the backend stays unready
    /// for the lifetime of this initializer; there is no automatic retry.
    ///
    /// # Errors
    ///
    /// - [`RoomSyncError::AlreadyInitialized`] on any call after the first.
    /// - [`RoomSyncError::DependencyUnavailable`] if the dependency check fails.
    /// - [`RoomSyncError::StoreUnavailable`] if no store handle can be opened.
    /// - [`RoomSyncError::AuthFailure`] if anonymous sign-in fails.
    pub async fn initialize<B>(&self, backend: &B) -> Result<Arc<BackendContext>>
    where
        B: Backend + ?Sized,
    {
        if self.attempted.swap(true, Ordering::AcqRel) {
            debug!("backend initialization already attempted");
            return Err(RoomSyncError::AlreadyInitialized);
        }

        let status = backend.check_dependencies().await;
        if !status.is_available() {
            error!("backend is not available: {status}");
            return Err(RoomSyncError::DependencyUnavailable(status));
        }

        let endpoint = self.config.database_url.clone();
        let store = backend
            .open_store(endpoint.as_deref())
            .await
            .inspect_err(|e| error!("failed to open store: {e}"))?;

        let user_id = backend
            .sign_in_anonymously()
            .await
            .inspect_err(|e| error!("anonymous sign-in failed: {e}"))?;

        info!(user_id = %user_id, "backend ready");

        let context = Arc::new(BackendContext {
            store,
            user_id,
            endpoint,
        });
        let published = Arc::clone(&context);
        self.slot.send_if_modified(move |slot| {
            if slot.is_some() {
                return false;
            }
            *slot = Some(published);
            true
        });

        Ok(context)
    }
}

impl fmt::Debug for BackendInit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendInit")
            .field("config", &self.config)
            .field("attempted", &self.attempted.load(Ordering::Acquire))
            .field("ready", &self.is_ready())
            .finish()
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;
    use crate::store::Subscription;
    use serde_json::Value;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex as StdMutex;
    use tokio_test::{assert_pending, assert_ready};

    struct NullStore;

    #[async_trait]
    impl KeyValueStore for NullStore {
        async fn read(&self, _path: &str) -> Result<Option<Value>> {
            Ok(None)
        }

        async fn write(&self, _path: &str, _value: Value) -> Result<()> {
            Ok(())
        }

        async fn subscribe(&self, path: &str) -> Result<Subscription> {
            Ok(Subscription::channel(path).1)
        }
    }

    /// Backend with scripted outcomes that counts each call.
    struct StubBackend {
        status: DependencyStatus,
        auth_ok: bool,
        calls: AtomicUsize,
        endpoints: StdMutex<Vec<Option<String>>>,
    }

    impl StubBackend {
        fn new(status: DependencyStatus, auth_ok: bool) -> Self {
            Self {
                status,
                auth_ok,
                calls: AtomicUsize::new(0),
                endpoints: StdMutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl Backend for StubBackend {
        async fn check_dependencies(&self) -> DependencyStatus {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.status
        }

        async fn open_store(&self, endpoint: Option<&str>) -> Result<Arc<dyn KeyValueStore>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.endpoints
                .lock()
                .unwrap()
                .push(endpoint.map(str::to_owned));
            Ok(Arc::new(NullStore))
        }

        async fn sign_in_anonymously(&self) -> Result<UserId> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.auth_ok {
                Ok("anon-uid".into())
            } else {
                Err(RoomSyncError::AuthFailure("rejected".into()))
            }
        }
    }

    #[tokio::test]
    async fn successful_initialize_publishes_context() {
        let init = BackendInit::new(BackendConfig::new());
        let early = init.readiness();
        assert!(!early.is_ready());

        let backend = StubBackend::new(DependencyStatus::Available, true);
        let context = init.initialize(&backend).await.unwrap();
        assert_eq!(context.user_id(), "anon-uid");
        assert!(context.endpoint().is_none());

        assert!(init.is_ready());
        assert!(early.is_ready());
        assert_eq!(early.context().unwrap().user_id(), "anon-uid");

        // A subscriber created after readiness resolves straight away.
        let late = init.readiness();
        assert_eq!(late.ready().await.unwrap().user_id(), "anon-uid");
    }

    #[test]
    fn env_value_overrides_default_instance() {
        let config = BackendConfig::from_env_value(Some("memory://from-env".into()));
        assert_eq!(config.database_url.as_deref(), Some("memory://from-env"));

        assert!(BackendConfig::from_env_value(None).database_url.is_none());
        assert!(BackendConfig::from_env_value(Some(String::new()))
            .database_url
            .is_none());
    }

    #[tokio::test]
    async fn configured_url_is_passed_to_open_store() {
        let init = BackendInit::new(BackendConfig::new().with_database_url("https://db.test/"));
        let backend = StubBackend::new(DependencyStatus::Available, true);
        let context = init.initialize(&backend).await.unwrap();

        assert_eq!(context.endpoint(), Some("https://db.test/"));
        assert_eq!(
            *backend.endpoints.lock().unwrap(),
            vec![Some("https://db.test/".to_string())]
        );
    }

    #[test]
    fn waiting_subscriber_wakes_on_initialize() {
        let init = BackendInit::new(BackendConfig::new());
        let readiness = init.readiness();
        let mut waiter = tokio_test::task::spawn(async move { readiness.ready().await });
        assert_pending!(waiter.poll());

        let backend = StubBackend::new(DependencyStatus::Available, true);
        tokio_test::block_on(init.initialize(&backend)).unwrap();

        assert!(waiter.is_woken());
        let context = assert_ready!(waiter.poll());
        assert_eq!(context.unwrap().user_id(), "anon-uid");
    }

    #[tokio::test]
    async fn unavailable_dependencies_are_terminal() {
        let init = BackendInit::new(BackendConfig::new());
        let backend = StubBackend::new(DependencyStatus::UnavailableMissing, true);

        let err = init.initialize(&backend).await.unwrap_err();
        assert!(matches!(
            err,
            RoomSyncError::DependencyUnavailable(DependencyStatus::UnavailableMissing)
        ));
        assert!(!init.is_ready());
        // Only the dependency check ran.
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);

        let again = init.initialize(&backend).await.unwrap_err();
        assert!(matches!(again, RoomSyncError::AlreadyInitialized));
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn auth_failure_leaves_backend_unready() {
        let init = BackendInit::new(BackendConfig::new());
        let readiness = init.readiness();
        let backend = StubBackend::new(DependencyStatus::Available, false);

        let err = init.initialize(&backend).await.unwrap_err();
        assert!(matches!(err, RoomSyncError::AuthFailure(_)));
        assert!(!readiness.is_ready());
        assert!(readiness.context().is_none());
    }

    #[tokio::test]
    async fn second_initialize_after_success_is_rejected() {
        let init = BackendInit::new(BackendConfig::new());
        let backend = StubBackend::new(DependencyStatus::Available, true);
        let first = init.initialize(&backend).await.unwrap();

        let err = init.initialize(&backend).await.unwrap_err();
        assert!(matches!(err, RoomSyncError::AlreadyInitialized));
        assert!(Arc::ptr_eq(&first, &init.readiness().context().unwrap()));
    }

    #[tokio::test]
    async fn ready_resolves_none_when_initializer_dropped_unready() {
        let init = BackendInit::new(BackendConfig::new());
        let readiness = init.readiness();
        drop(init);
        assert!(readiness.ready().await.is_none());
    }

    #[test]
    fn empty_database_url_means_default_instance() {
        let config = BackendConfig::new().with_database_url("https://a/");
        assert_eq!(config.database_url.as_deref(), Some("https://a/"));
        let config = config.with_database_url(String::new());
        assert!(config.database_url.is_none());
    }

    #[test]
    fn dependency_status_display() {
        assert_eq!(DependencyStatus::Available.to_string(), "available");
        assert!(DependencyStatus::Available.is_available());
        assert!(!DependencyStatus::UnavailableOther.is_available());
        assert_eq!(
            RoomSyncError::DependencyUnavailable(DependencyStatus::UnavailableDisabled).to_string(),
            "backend dependencies unavailable: a required service is disabled"
        );
    }
}
