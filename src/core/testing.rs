//! Test doubles and a wired-up service harness

use async_trait::async_trait;
use axum::Router;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::Mutex;

use crate::app::{AppState, router};
use crate::core::auth::service::{
    AuthBackends, AuthService, AuthSettings, CONFIRM_PATH, RESET_PATH, RequestContext,
};
use crate::core::auth::password::{BcryptHasher, HashError, PasswordHasher};
use crate::core::clock::ManualClock;
use crate::core::db::MemoryStore;
use crate::core::db::models::User;
use crate::core::files::{FileStore, FileStoreError, public_url, unique_file_name};
use crate::core::mail::{EmailError, EmailSender, OutgoingEmail};
use crate::core::users::commands::RegisterUser;
use crate::core::users::service::UserService;

pub const TEST_SECRET: &str = "test-secret-key";
pub const TEST_PASSWORD: &str = "password123";
pub const TEST_BASE_URL: &str = "http://testserver";

/// Role ids seeded by [`MemoryStore::seeded`]
pub const USER_ROLE_ID: i64 = 1;
pub const ADMIN_ROLE_ID: i64 = 2;

// ============================================================================
// Email
// ============================================================================

/// Records every accepted email; can be switched to fail
#[derive(Default)]
pub struct RecordingEmailSender {
    sent: Mutex<Vec<OutgoingEmail>>,
    failing: AtomicBool,
}

impl RecordingEmailSender {
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub async fn sent(&self) -> Vec<OutgoingEmail> {
        self.sent.lock().await.clone()
    }

    /// Most recent link in a sent email whose URL contains `path`
    pub async fn last_link(&self, path: &str) -> Option<String> {
        self.sent
            .lock()
            .await
            .iter()
            .rev()
            .flat_map(|email| links(&email.html_body))
            .find(|link| link.contains(path))
    }

    pub async fn last_confirmation_url(&self) -> Option<String> {
        self.last_link(CONFIRM_PATH).await
    }

    pub async fn last_reset_token(&self) -> Option<String> {
        let url = self.last_link(RESET_PATH).await?;
        url.split_once("?token=").map(|(_, token)| token.to_string())
    }
}

fn links(html: &str) -> Vec<String> {
    html.split("href=\"")
        .skip(1)
        .filter_map(|rest| rest.split_once('"').map(|(link, _)| link.to_string()))
        .collect()
}

#[async_trait]
impl EmailSender for RecordingEmailSender {
    async fn send(&self, email: &OutgoingEmail) -> Result<(), EmailError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(EmailError::Client("relay unavailable".into()));
        }
        self.sent.lock().await.push(email.clone());
        Ok(())
    }
}

// ============================================================================
// Passwords
// ============================================================================

/// Cheap bcrypt that counts how often a password is checked
pub struct CountingHasher {
    inner: BcryptHasher,
    verifications: AtomicUsize,
}

impl CountingHasher {
    pub fn verifications(&self) -> usize {
        self.verifications.load(Ordering::SeqCst)
    }
}

impl Default for CountingHasher {
    fn default() -> Self {
        Self {
            inner: BcryptHasher::new(4),
            verifications: AtomicUsize::new(0),
        }
    }
}

impl PasswordHasher for CountingHasher {
    fn hash(&self, plaintext: &str) -> Result<String, HashError> {
        self.inner.hash(plaintext)
    }

    fn verify(&self, plaintext: &str, hash: &str) -> Result<bool, HashError> {
        self.verifications.fetch_add(1, Ordering::SeqCst);
        self.inner.verify(plaintext, hash)
    }
}

// ============================================================================
// Files
// ============================================================================

/// File store keeping uploads in memory
#[derive(Default)]
pub struct MemoryFileStore {
    files: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl MemoryFileStore {
    pub async fn paths(&self) -> Vec<String> {
        self.files.lock().await.keys().cloned().collect()
    }
}

#[async_trait]
impl FileStore for MemoryFileStore {
    async fn save(
        &self,
        bytes: &[u8],
        directory: &str,
        extension: &str,
    ) -> Result<String, FileStoreError> {
        let path = format!("{}/{}", directory, unique_file_name(extension));
        self.files.lock().await.insert(path.clone(), bytes.to_vec());
        Ok(path)
    }

    async fn delete(&self, path: &str) -> Result<bool, FileStoreError> {
        Ok(self.files.lock().await.remove(path).is_some())
    }

    fn url_for(&self, path: &str) -> String {
        public_url(TEST_BASE_URL, path)
    }
}

// ============================================================================
// Harness
// ============================================================================

/// Services wired to in-memory backends and a manual clock
pub struct Harness {
    pub store: MemoryStore,
    pub clock: Arc<ManualClock>,
    pub mailer: Arc<RecordingEmailSender>,
    pub files: Arc<MemoryFileStore>,
    pub hasher: Arc<CountingHasher>,
    pub auth: AuthService,
    pub users: UserService,
    pub ctx: RequestContext,
    state: AppState,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_settings(AuthSettings::new(TEST_SECRET))
    }

    pub fn with_settings(settings: AuthSettings) -> Self {
        let store = MemoryStore::seeded();
        let clock = Arc::new(ManualClock::default());
        let mailer = Arc::new(RecordingEmailSender::default());
        let files = Arc::new(MemoryFileStore::default());
        let hasher = Arc::new(CountingHasher::default());
        let ctx = RequestContext::new(TEST_BASE_URL);

        let backends = AuthBackends {
            store: Arc::new(store.clone()),
            templates: Arc::new(store.clone()),
            hasher: hasher.clone(),
            mailer: mailer.clone(),
            files: files.clone(),
            clock: clock.clone(),
        };
        let state = AppState::new(
            backends,
            &settings,
            ctx.clone(),
            std::env::temp_dir().join("gatekeep-test-uploads"),
            None,
        );

        Self {
            store,
            clock,
            mailer,
            files,
            hasher,
            auth: state.auth_service.clone(),
            users: state.user_service.clone(),
            ctx,
            state,
        }
    }

    pub fn router(&self) -> Router {
        router(self.state.clone())
    }

    /// A registration that passes every field check
    pub fn command(username: &str, email: &str) -> RegisterUser {
        RegisterUser {
            username: username.into(),
            password: TEST_PASSWORD.into(),
            password_confirmation: TEST_PASSWORD.into(),
            name: "Alice".into(),
            surname: "Liddell".into(),
            email: email.into(),
            country_id: 1,
            role_ids: vec![],
            photo: None,
        }
    }

    pub async fn register(&self, username: &str, email: &str) -> User {
        self.auth
            .register(Self::command(username, email), &self.ctx)
            .await
            .unwrap()
    }

    pub async fn confirm(&self, user: &User) {
        let token = self.auth.confirmation_codec().encrypt(user.id).unwrap();
        assert!(self.auth.confirm(&token).await.unwrap());
    }

    pub async fn register_active(&self, username: &str, email: &str) -> User {
        let user = self.register(username, email).await;
        self.confirm(&user).await;
        user
    }

    pub async fn token_for(&self, username: &str) -> String {
        self.auth
            .login(username, TEST_PASSWORD)
            .await
            .unwrap()
            .access_token
    }

    /// Register, confirm and log in an account holding the admin role
    pub async fn admin_token(&self) -> String {
        let mut command = Self::command("admin_user", "admin@example.com");
        command.role_ids = vec![ADMIN_ROLE_ID];
        let admin = self.auth.register(command, &self.ctx).await.unwrap();
        self.confirm(&admin).await;
        self.token_for("admin_user").await
    }
}
