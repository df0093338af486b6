//! Interceptors every node registers at startup

use std::sync::Arc;
use std::time::Duration;

use crate::interceptor::InterceptorRegistry;
use crate::mailer::Mailer;

pub mod local;
pub mod login;
pub mod remote;
pub mod token;
pub mod verification;

pub use local::LocalInterceptorHook;
pub use login::LoginInterceptor;
pub use remote::RemoteInterceptorHook;
pub use token::{TokenInterceptor, check_access_permission, sign_claims, verify_user_token};
pub use verification::VerificationMailInterceptor;

pub const TOKEN_SEQ: i32 = 0;
pub const LOCAL_SEQ: i32 = 10;
pub const REMOTE_SEQ: i32 = 20;

/// Statement whose result carries the signup verification code
pub const SIGNUP_STATEMENT: usize = 5;
/// Statement whose result carries the password reset code
pub const FORGET_PASSWORD_STATEMENT: usize = 3;

/// Settings shared by the auth related hooks
#[derive(Debug, Clone)]
pub struct AuthSettings {
    /// HS256 key for user tokens
    pub secret: String,
    pub require_user_token: bool,
    pub token_expire_hours: i64,
    /// Zero disables the timeout
    pub webhook_timeout: Duration,
    pub webhook_max_response_bytes: usize,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            secret: String::new(),
            require_user_token: true,
            token_expire_hours: 72,
            webhook_timeout: Duration::from_secs(30),
            webhook_max_response_bytes: remote::DEFAULT_MAX_RESPONSE_BYTES,
        }
    }
}

/// Registers the token, local and remote hooks globally, and the login,
/// signup and forget_password hooks on their queries
pub fn register_builtin(
    registry: &mut InterceptorRegistry,
    settings: &AuthSettings,
    mailer: Arc<dyn Mailer>,
) -> anyhow::Result<()> {
    registry.register_global(
        TOKEN_SEQ,
        Arc::new(TokenInterceptor::new(settings.secret.clone(), settings.require_user_token)),
    );
    registry.register_global(LOCAL_SEQ, Arc::new(LocalInterceptorHook::new()));
    registry.register_global(
        REMOTE_SEQ,
        Arc::new(
            RemoteInterceptorHook::new(settings.webhook_timeout)?
                .with_max_response_bytes(settings.webhook_max_response_bytes),
        ),
    );

    registry.register(
        "login",
        0,
        Arc::new(LoginInterceptor::new(settings.secret.clone(), settings.token_expire_hours)),
    );
    registry.register(
        "signup",
        0,
        Arc::new(VerificationMailInterceptor::new(
            SIGNUP_STATEMENT,
            "User Verification",
            mailer.clone(),
        )),
    );
    registry.register(
        "forget_password",
        0,
        Arc::new(VerificationMailInterceptor::new(
            FORGET_PASSWORD_STATEMENT,
            "Password Reset",
            mailer,
        )),
    );
    Ok(())
}
