//! Demo login gate: an exact comparison against configured credentials.
//!
//! This only keeps casual visitors out of the dashboard; it is not
//! authentication.

use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginOutcome {
    Accepted,
    Rejected,
    /// No credentials are configured, so every attempt is refused.
    NotConfigured,
}

#[derive(Clone)]
struct DemoCredentials {
    username: String,
    password: String,
}

#[derive(Clone)]
pub struct LoginGate {
    credentials: Option<DemoCredentials>,
}

impl LoginGate {
    pub fn new(username: Option<String>, password: Option<String>) -> Self {
        let credentials = match (username, password) {
            (Some(username), Some(password)) => Some(DemoCredentials { username, password }),
            _ => None,
        };
        Self { credentials }
    }

    pub fn is_configured(&self) -> bool {
        self.credentials.is_some()
    }

    pub fn check(&self, username: &str, password: &str) -> LoginOutcome {
        let Some(credentials) = &self.credentials else {
            warn!("login: no demo credentials configured");
            return LoginOutcome::NotConfigured;
        };
        if credentials.username == username && credentials.password == password {
            info!(username, "login: accepted");
            LoginOutcome::Accepted
        } else {
            info!(username, "login: invalid credentials");
            LoginOutcome::Rejected
        }
    }
}

impl std::fmt::Debug for LoginGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoginGate")
            .field("configured", &self.is_configured())
            .finish()
    }
}
