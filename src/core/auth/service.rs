//! Authentication service
//!
//! Registration, confirmation, login, password reset and bearer-token identity
//! resolution. Coordinates the credential store, password hasher, action-token
//! codecs, JWT service, email delivery and photo storage.

use chrono::Duration;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::OnceCell;

use crate::core::auth::action_token::{
    ActionTokenCodec, CONFIRMATION_SALT, PASSWORD_RESET_SALT, TokenError,
};
use crate::core::auth::jwt::{JwtConfig, JwtError, JwtService};
use crate::core::auth::password::{HashError, PasswordHasher};
use crate::core::clock::Clock;
use crate::core::db::models::{
    EmailTemplate, NewUser, RoleId, UniqueUserField, User, UserWithRoles,
};
use crate::core::db::store::{CredentialStore, CredentialTx, EmailTemplateStore, StoreError};
use crate::core::files::{FileStore, FileStoreError};
use crate::core::mail::{
    ACCOUNT_CONFIRMATION, EmailError, EmailSender, OutgoingEmail, PASSWORD_RESET, TemplateError,
    render,
};
use crate::core::users::commands::RegisterUser;
use crate::core::users::fields::ValidationIssue;
use crate::core::users::photos::PhotoStorage;
use crate::core::users::validator::{Claim, UserValidator, ensure_roles_exist};

/// Role given to accounts registered without explicit roles
pub const DEFAULT_ROLE: &str = "user";
/// Path of the confirmation endpoint embedded in confirmation emails
pub const CONFIRM_PATH: &str = "/v1/auth/confirm";
/// Path of the password reset page embedded in reset emails
pub const RESET_PATH: &str = "/reset-password";

/// Hashed once with the configured hasher and checked against when the username is
/// unknown, so a miss costs the same as a wrong password
const UNKNOWN_USER_PASSWORD: &str = "gatekeep.unknown-user";

/// Authentication service error types
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Validation failed")]
    Validation(Vec<ValidationIssue>),

    #[error("An account with this {0} already exists")]
    DuplicateAccount(UniqueUserField),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Token expired")]
    ExpiredToken,

    #[error("Invalid or expired token")]
    InvalidToken,

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("Timed out waiting for {0}")]
    Timeout(&'static str),

    #[error("Store error: {0}")]
    Store(StoreError),

    #[error(transparent)]
    Hash(#[from] HashError),

    #[error(transparent)]
    Template(#[from] TemplateError),

    #[error(transparent)]
    Email(#[from] EmailError),

    #[error(transparent)]
    File(#[from] FileStoreError),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl From<StoreError> for AuthError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Duplicate { field } => AuthError::DuplicateAccount(field),
            other => AuthError::Store(other),
        }
    }
}

impl From<JwtError> for AuthError {
    fn from(err: JwtError) -> Self {
        match err {
            JwtError::Expired => AuthError::ExpiredToken,
            JwtError::Rejected => AuthError::Unauthorized,
            JwtError::Sign(_) => AuthError::InternalError(err.to_string()),
        }
    }
}

impl From<TokenError> for AuthError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::InvalidKey => AuthError::InternalError(err.to_string()),
            TokenError::Malformed | TokenError::BadSignature | TokenError::Expired => {
                AuthError::InvalidToken
            }
        }
    }
}

/// Run an external call with a deadline; elapsed deadlines become [`AuthError::Timeout`]
pub async fn bounded<T, E>(
    limit: std::time::Duration,
    what: &'static str,
    call: impl Future<Output = Result<T, E>>,
) -> Result<T, AuthError>
where
    AuthError: From<E>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result.map_err(AuthError::from),
        Err(_) => {
            tracing::warn!(operation = what, "External call timed out");
            Err(AuthError::Timeout(what))
        }
    }
}

/// Per-request values needed to build absolute links
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    base_url: String,
}

impl RequestContext {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Absolute URL for `path` with a `token` query parameter
    pub fn token_url(&self, path: &str, token: &str) -> String {
        format!("{}{}?token={}", self.base_url, path, token)
    }
}

/// Collaborators shared by the auth and user services
#[derive(Clone)]
pub struct AuthBackends {
    pub store: Arc<dyn CredentialStore>,
    pub templates: Arc<dyn EmailTemplateStore>,
    pub hasher: Arc<dyn PasswordHasher>,
    pub mailer: Arc<dyn EmailSender>,
    pub files: Arc<dyn FileStore>,
    pub clock: Arc<dyn Clock>,
}

/// Tunables for the auth service
#[derive(Clone)]
pub struct AuthSettings {
    pub secret_key: String,
    pub activation_timeout: Duration,
    pub reset_token_max_age: Duration,
    pub access_token_expire_days: i64,
    pub external_call_timeout: std::time::Duration,
}

impl AuthSettings {
    pub fn new(secret_key: impl Into<String>) -> Self {
        Self {
            secret_key: secret_key.into(),
            activation_timeout: Duration::seconds(86_400),
            reset_token_max_age: Duration::seconds(3_600),
            access_token_expire_days: 30,
            external_call_timeout: std::time::Duration::from_secs(10),
        }
    }
}

/// Bearer token returned by login
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct AccessToken {
    pub access_token: String,
    pub token_type: String,
    /// Expiration (Unix timestamp)
    pub expires_at: i64,
}

/// A committed account and the follow-up work it leaves behind
struct CreatedAccount {
    user: User,
    email: Option<OutgoingEmail>,
    orphaned_photos: Vec<String>,
}

/// Authentication service
#[derive(Clone)]
pub struct AuthService {
    store: Arc<dyn CredentialStore>,
    templates: Arc<dyn EmailTemplateStore>,
    hasher: Arc<dyn PasswordHasher>,
    mailer: Arc<dyn EmailSender>,
    clock: Arc<dyn Clock>,
    photos: PhotoStorage,
    validator: UserValidator,
    jwt: JwtService,
    confirmation_codec: ActionTokenCodec,
    reset_codec: ActionTokenCodec,
    unknown_user_hash: Arc<OnceCell<String>>,
    external_timeout: std::time::Duration,
}

impl AuthService {
    /// Create a new authentication service
    pub fn new(backends: AuthBackends, settings: &AuthSettings) -> Self {
        let jwt = JwtService::new(
            JwtConfig::new(settings.secret_key.clone())
                .lifetime_days(settings.access_token_expire_days),
        );
        let confirmation_codec = ActionTokenCodec::new(
            &settings.secret_key,
            CONFIRMATION_SALT,
            backends.clock.clone(),
        )
        .with_max_age(settings.activation_timeout);
        let reset_codec = ActionTokenCodec::new(
            &settings.secret_key,
            PASSWORD_RESET_SALT,
            backends.clock.clone(),
        )
        .with_max_age(settings.reset_token_max_age);

        Self {
            validator: UserValidator::new(
                backends.store.clone(),
                backends.clock.clone(),
                settings.activation_timeout,
            ),
            photos: PhotoStorage::new(backends.files, settings.external_call_timeout),
            store: backends.store,
            templates: backends.templates,
            hasher: backends.hasher,
            mailer: backends.mailer,
            clock: backends.clock,
            jwt,
            confirmation_codec,
            reset_codec,
            unknown_user_hash: Arc::new(OnceCell::new()),
            external_timeout: settings.external_call_timeout,
        }
    }

    pub fn validator(&self) -> &UserValidator {
        &self.validator
    }

    pub fn confirmation_codec(&self) -> &ActionTokenCodec {
        &self.confirmation_codec
    }

    /// Reset token for `user`, valid until the password changes or it ages out
    pub fn password_reset_token(&self, user: &User) -> Result<String, AuthError> {
        Ok(self
            .reset_codec
            .encrypt_bound(user.id, user.password_hash.as_bytes())?)
    }

    // ========================================================================
    // Registration and confirmation
    // ========================================================================

    /// Register a new, inactive account and send its confirmation email.
    ///
    /// The photo is stored first and deleted again if anything after it fails. The
    /// duplicate re-check, insert and role assignment commit together. The
    /// confirmation email is rendered and delivered after commit and never fails the
    /// registration; a missing template means no email.
    pub async fn register(
        &self,
        command: RegisterUser,
        ctx: &RequestContext,
    ) -> Result<User, AuthError> {
        self.create_user(command, Some(ctx)).await
    }

    /// Create an account that is active from the start; no confirmation email
    pub async fn create_active_user(&self, command: RegisterUser) -> Result<User, AuthError> {
        self.create_user(command, None).await
    }

    /// Accounts created with a `confirm_via` context start inactive and are sent a
    /// confirmation link; without one they start active.
    async fn create_user(
        &self,
        command: RegisterUser,
        confirm_via: Option<&RequestContext>,
    ) -> Result<User, AuthError> {
        let photo_path = match &command.photo {
            Some(photo) => Some(self.photos.save(photo).await?),
            None => None,
        };

        match self
            .create_account(&command, photo_path.clone(), confirm_via)
            .await
        {
            Ok(created) => {
                let user = created.user;
                tracing::info!(
                    user_id = user.id,
                    username = %user.username,
                    active = user.active,
                    "User created"
                );
                for path in &created.orphaned_photos {
                    self.photos.discard(path).await;
                }
                if let Some(email) = created.email {
                    self.deliver_best_effort(&email, "account confirmation")
                        .await;
                }
                Ok(user)
            }
            Err(err) => {
                if let Some(path) = &photo_path {
                    self.photos.discard(path).await;
                }
                tracing::warn!(username = %command.username, error = %err, "Registration failed");
                Err(err)
            }
        }
    }

    async fn create_account(
        &self,
        command: &RegisterUser,
        photo_path: Option<String>,
        confirm_via: Option<&RequestContext>,
    ) -> Result<CreatedAccount, AuthError> {
        let password_hash = self.hash_password(&command.password).await?;
        let template = match confirm_via {
            Some(_) => self.templates.get_by_name(ACCOUNT_CONFIRMATION).await?,
            None => None,
        };

        let mut tx = self.store.begin().await?;
        let result = self
            .create_in_tx(
                tx.as_mut(),
                command,
                password_hash,
                photo_path,
                confirm_via.is_none(),
            )
            .await;

        let (user, orphaned_photos) = match result {
            Ok(created) => {
                tx.commit().await?;
                created
            }
            Err(err) => {
                if let Err(rollback_err) = tx.rollback().await {
                    tracing::error!(error = %rollback_err, "Registration rollback failed");
                }
                return Err(err);
            }
        };

        let email = match (template, confirm_via) {
            (Some(template), Some(ctx)) => match self.confirmation_email(&template, &user, ctx) {
                Ok(email) => Some(email),
                Err(err) => {
                    tracing::error!(
                        user_id = user.id,
                        error = %err,
                        "Cannot build confirmation email"
                    );
                    None
                }
            },
            (None, Some(_)) => {
                tracing::debug!("Confirmation template missing; no email will be sent");
                None
            }
            (_, None) => None,
        };

        Ok(CreatedAccount {
            user,
            email,
            orphaned_photos,
        })
    }

    async fn create_in_tx(
        &self,
        tx: &mut dyn CredentialTx,
        command: &RegisterUser,
        password_hash: String,
        photo_path: Option<String>,
        active: bool,
    ) -> Result<(User, Vec<String>), AuthError> {
        let mut orphaned_photos = Vec::new();
        for field in [UniqueUserField::Username, UniqueUserField::Email] {
            let value = match field {
                UniqueUserField::Username => &command.username,
                UniqueUserField::Email => &command.email,
            };
            match self.validator.claim_value(tx, field, value, true).await? {
                Claim::Taken => return Err(AuthError::DuplicateAccount(field)),
                Claim::Free { orphaned_photos: photos } => orphaned_photos.extend(photos),
            }
        }

        let user = tx
            .insert_user(NewUser {
                username: command.username.clone(),
                password_hash,
                name: command.name.clone(),
                surname: command.surname.clone(),
                email: command.email.clone(),
                country_id: command.country_id,
                photo_path,
                active,
                created_at: self.clock.now(),
            })
            .await?;

        let role_ids = self.resolve_roles(tx, &command.role_ids).await?;
        tx.replace_user_roles(user.id, &role_ids).await?;

        Ok((user, orphaned_photos))
    }

    fn confirmation_email(
        &self,
        template: &EmailTemplate,
        user: &User,
        ctx: &RequestContext,
    ) -> Result<OutgoingEmail, AuthError> {
        let token = self.confirmation_codec.encrypt(user.id)?;
        let url = ctx.token_url(CONFIRM_PATH, &token);
        let rendered = render(
            template,
            &[
                ("name", user.name.as_str()),
                ("surname", user.surname.as_str()),
                ("confirmation_url", url.as_str()),
            ],
        )?;

        Ok(OutgoingEmail::new(&user.email, rendered))
    }

    async fn resolve_roles(
        &self,
        tx: &mut dyn CredentialTx,
        requested: &[RoleId],
    ) -> Result<Vec<RoleId>, AuthError> {
        if !requested.is_empty() {
            return ensure_roles_exist(tx, requested).await;
        }

        let role = tx.find_role_by_name(DEFAULT_ROLE).await?.ok_or_else(|| {
            AuthError::InternalError(format!("default role '{DEFAULT_ROLE}' is missing"))
        })?;
        Ok(vec![role.id])
    }

    /// Activate the account a confirmation token points at.
    ///
    /// `Ok(false)` when the account does not exist or was already active.
    pub async fn confirm(&self, token: &str) -> Result<bool, AuthError> {
        let user_id = self.confirmation_codec.decrypt(token)?;
        let activated = self.store.activate_user(user_id, self.clock.now()).await?;

        if activated {
            tracing::info!(user_id, "Account confirmed");
        } else {
            tracing::info!(user_id, "Confirmation ignored: unknown or already active account");
        }

        Ok(activated)
    }

    // ========================================================================
    // Credentials
    // ========================================================================

    /// Resolve credentials to an active user.
    ///
    /// Unknown username, wrong password and inactive account all yield `Ok(None)`,
    /// and each of them runs one password verification.
    pub async fn authenticate_user(
        &self,
        username: &str,
        password: &str,
    ) -> Result<Option<UserWithRoles>, AuthError> {
        let Some(candidate) = self.store.find_user_with_roles_by_username(username).await? else {
            if let Ok(hash) = self.unknown_user_hash().await {
                let _ = self.verify_password(password, hash).await;
            }
            return Ok(None);
        };

        match self
            .verify_password(password, &candidate.user.password_hash)
            .await
        {
            Ok(true) => {}
            Ok(false) => return Ok(None),
            Err(AuthError::Hash(e)) => {
                tracing::warn!(user_id = candidate.user.id, error = %e, "Unusable password hash");
                return Ok(None);
            }
            Err(e) => return Err(e),
        }

        if !candidate.user.active {
            return Ok(None);
        }

        Ok(Some(candidate))
    }

    /// Authenticate and issue an access token
    pub async fn login(&self, username: &str, password: &str) -> Result<AccessToken, AuthError> {
        let user = self
            .authenticate_user(username, password)
            .await?
            .ok_or(AuthError::Unauthorized)?;

        let signed = self.jwt.issue(&user, self.clock.now())?;
        tracing::info!(user_id = user.user.id, "User logged in");

        Ok(AccessToken {
            access_token: signed.token,
            token_type: "bearer".to_string(),
            expires_at: signed.expires_at,
        })
    }

    async fn hash_password(&self, password: &str) -> Result<String, AuthError> {
        let hasher = self.hasher.clone();
        let password = password.to_string();
        tokio::task::spawn_blocking(move || hasher.hash(&password))
            .await
            .map_err(|e| AuthError::InternalError(e.to_string()))?
            .map_err(AuthError::from)
    }

    async fn unknown_user_hash(&self) -> Result<&str, AuthError> {
        self.unknown_user_hash
            .get_or_try_init(|| self.hash_password(UNKNOWN_USER_PASSWORD))
            .await
            .map(String::as_str)
    }

    async fn verify_password(&self, password: &str, hash: &str) -> Result<bool, AuthError> {
        let hasher = self.hasher.clone();
        let password = password.to_string();
        let hash = hash.to_string();
        tokio::task::spawn_blocking(move || hasher.verify(&password, &hash))
            .await
            .map_err(|e| AuthError::InternalError(e.to_string()))?
            .map_err(AuthError::from)
    }

    // ========================================================================
    // Password reset
    // ========================================================================

    /// Email a password reset link.
    ///
    /// `Ok(false)` when no live account has this email or the reset template is
    /// missing; delivery failures are errors.
    pub async fn send_password_reset_email(
        &self,
        email: &str,
        ctx: &RequestContext,
    ) -> Result<bool, AuthError> {
        let Some(user) = self.store.find_user_by_email(email).await? else {
            tracing::info!("Password reset requested for unknown email");
            return Ok(false);
        };

        let Some(template) = self.templates.get_by_name(PASSWORD_RESET).await? else {
            tracing::warn!(template = PASSWORD_RESET, "Email template missing");
            return Ok(false);
        };

        let token = self.password_reset_token(&user)?;
        let url = ctx.token_url(RESET_PATH, &token);
        let rendered = render(
            &template,
            &[
                ("name", user.name.as_str()),
                ("surname", user.surname.as_str()),
                ("password_reset_url", url.as_str()),
            ],
        )?;

        let message = OutgoingEmail::new(&user.email, rendered);
        bounded(self.external_timeout, "email", self.mailer.send(&message)).await?;

        tracing::info!(user_id = user.id, "Password reset email sent");
        Ok(true)
    }

    /// Load the user a reset token names and check the token against their current
    /// password hash, so a consumed token stops verifying.
    async fn reset_token_user(&self, token: &str) -> Result<Option<User>, AuthError> {
        let user_id = self.reset_codec.peek(token)?;
        let Some(user) = self.store.find_user(user_id).await? else {
            return Ok(None);
        };
        self.reset_codec
            .decrypt_bound(token, user.password_hash.as_bytes())?;
        Ok(Some(user))
    }

    /// Resolve a password reset token to its user
    pub async fn get_user_from_token(&self, token: &str) -> Result<Option<User>, AuthError> {
        self.reset_token_user(token).await
    }

    /// Set a new password from a reset token; `Ok(false)` when the user is gone.
    ///
    /// The token is spent once the new hash is stored.
    pub async fn reset_password(&self, token: &str, password: &str) -> Result<bool, AuthError> {
        let Some(user) = self.reset_token_user(token).await? else {
            return Ok(false);
        };
        let user_id = user.id;
        let password_hash = self.hash_password(password).await?;

        let updated = self
            .store
            .set_password_hash(user_id, &password_hash, self.clock.now())
            .await?;

        if updated {
            tracing::info!(user_id, "Password reset");
        }
        Ok(updated)
    }

    // ========================================================================
    // Access tokens
    // ========================================================================

    pub fn create_access_token(&self, user: &UserWithRoles) -> Result<String, AuthError> {
        Ok(self.jwt.issue(user, self.clock.now())?.token)
    }

    /// Resolve a bearer token to the current user.
    ///
    /// Expired tokens yield [`AuthError::ExpiredToken`]; every other failure is
    /// [`AuthError::Unauthorized`].
    pub async fn get_current_user(&self, token: &str) -> Result<UserWithRoles, AuthError> {
        let claims = self.jwt.verify(token, self.clock.now())?;
        let user_id = claims.user_id()?;

        self.store
            .find_user_with_roles(user_id)
            .await?
            .ok_or(AuthError::Unauthorized)
    }

    async fn deliver_best_effort(&self, email: &OutgoingEmail, purpose: &'static str) {
        match bounded(self.external_timeout, "email", self.mailer.send(email)).await {
            Ok(()) => tracing::info!(purpose, "Email sent"),
            Err(e) => tracing::error!(purpose, error = %e, "Failed to send email"),
        }
    }
}
