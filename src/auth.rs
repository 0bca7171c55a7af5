//! Token authentication and failed-attempt throttling per origin.

use crate::error::AppError;
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

/// Authenticated caller.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Login {
    pub id: i64,
    pub admin: bool,
    /// Login without own credentials (shared/public access).
    pub no_auth: bool,
    pub language_code: String,
}

/// Resolves a bearer token to a login.
pub trait Authenticator: Send + Sync {
    fn authenticate(&self, token: &str) -> Result<Login, AppError>;
}

/// Static token table, e.g. from `API_TOKENS="t1=1:admin,t2=7:de_de,t3=9:no_auth"`.
#[derive(Clone, Debug, Default)]
pub struct TokenTable {
    tokens: HashMap<String, Login>,
}

impl TokenTable {
    /// Parse `token=login_id[:admin][:no_auth][:language]` entries separated by commas.
    pub fn parse(list: &str, default_language: &str) -> Result<Self, String> {
        let mut tokens = HashMap::new();
        for entry in list.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let (token, rest) = entry
                .split_once('=')
                .ok_or_else(|| format!("token entry '{}' has no '='", entry))?;
            let mut parts = rest.split(':');
            let id = parts
                .next()
                .unwrap_or_default()
                .parse::<i64>()
                .map_err(|_| format!("token entry '{}': login id must be an integer", entry))?;
            let mut login = Login {
                id,
                admin: false,
                no_auth: false,
                language_code: default_language.to_string(),
            };
            for part in parts {
                match part {
                    "admin" => login.admin = true,
                    "no_auth" => login.no_auth = true,
                    "" => {}
                    language => login.language_code = language.to_string(),
                }
            }
            tokens.insert(token.trim().to_string(), login);
        }
        Ok(TokenTable { tokens })
    }

    pub fn insert(&mut self, token: impl Into<String>, login: Login) {
        self.tokens.insert(token.into(), login);
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

impl Authenticator for TokenTable {
    fn authenticate(&self, token: &str) -> Result<Login, AppError> {
        self.tokens.get(token).cloned().ok_or(AppError::Unauthorized)
    }
}

#[derive(Debug)]
struct Attempts {
    count: u32,
    first: Instant,
}

/// Blocks an origin after `max_attempts` failed authentications within `window`.
#[derive(Debug)]
pub struct Bruteforce {
    attempts: RwLock<HashMap<String, Attempts>>,
    max_attempts: u32,
    window: Duration,
}

impl Bruteforce {
    pub fn new(max_attempts: u32, window: Duration) -> Self {
        Bruteforce {
            attempts: RwLock::new(HashMap::new()),
            max_attempts,
            window,
        }
    }

    /// `Blocked` while the origin has used up its attempts in the current window.
    pub fn check(&self, origin: &str) -> Result<(), AppError> {
        let attempts = self.attempts.read().unwrap_or_else(|p| p.into_inner());
        match attempts.get(origin) {
            Some(a) if a.first.elapsed() < self.window && a.count >= self.max_attempts => Err(AppError::Blocked),
            _ => Ok(()),
        }
    }

    pub fn bad_attempt(&self, origin: &str) {
        let mut attempts = self.attempts.write().unwrap_or_else(|p| p.into_inner());
        let entry = attempts.entry(origin.to_string()).or_insert(Attempts {
            count: 0,
            first: Instant::now(),
        });
        if entry.first.elapsed() >= self.window {
            entry.count = 0;
            entry.first = Instant::now();
        }
        entry.count += 1;
        if entry.count == self.max_attempts {
            tracing::warn!(origin = %origin, attempts = entry.count, "origin blocked after failed authentication");
        }
    }

    /// Forget origins whose window has passed.
    pub fn cleanup_expired(&self) {
        let window = self.window;
        self.attempts
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .retain(|_, a| a.first.elapsed() < window);
    }
}
