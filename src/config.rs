use crate::auth::{Role, TokenGrant};
use crate::domain::{LedgerAccount, PostingRole};
use crate::engine::matcher::{MatchSettings, MAX_CANDIDATES_CAP};
use crate::engine::posting::AccountMap;
use crate::normalize::HeaderRules;
use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub database_path: String,
    pub api_tokens: Vec<TokenGrant>,
    pub posting_accounts: AccountMap,
    pub header_rules_path: Option<String>,
    pub matching: MatchSettings,
    pub request_timeout_ms: u64,
    pub posting_lease_secs: i64,
    pub auto_post_on_match: bool,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnv(String),
    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

fn parse_or<T: FromStr>(
    env_map: &HashMap<String, String>,
    name: &str,
    default: &str,
    expected: &str,
) -> Result<T, ConfigError> {
    env_map
        .get(name)
        .map(|s| s.trim())
        .unwrap_or(default)
        .parse::<T>()
        .map_err(|_| ConfigError::InvalidValue(name.to_string(), expected.to_string()))
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_env_map(std::env::vars().collect())
    }

    pub fn from_env_map(env_map: HashMap<String, String>) -> Result<Self, ConfigError> {
        let port = parse_or::<u16>(&env_map, "PORT", "8080", "must be a valid u16")?;

        let database_path = env_map
            .get("DATABASE_PATH")
            .cloned()
            .ok_or_else(|| ConfigError::MissingEnv("DATABASE_PATH".to_string()))?;

        let api_tokens = match env_map.get("API_TOKENS") {
            Some(raw) => parse_api_tokens(raw)?,
            None => Vec::new(),
        };

        let posting_accounts = match env_map.get("POSTING_ACCOUNTS") {
            Some(raw) => parse_posting_accounts(raw)?,
            None => AccountMap::default(),
        };

        let header_rules_path = env_map
            .get("HEADER_RULES_PATH")
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());

        let bank_window_days = parse_or::<i64>(
            &env_map,
            "BANK_MATCH_WINDOW_DAYS",
            "5",
            "must be a non-negative number of days",
        )?;
        let payout_window_days = parse_or::<i64>(
            &env_map,
            "PAYOUT_MATCH_WINDOW_DAYS",
            "3",
            "must be a non-negative number of days",
        )?;
        if bank_window_days < 0 {
            return Err(ConfigError::InvalidValue(
                "BANK_MATCH_WINDOW_DAYS".to_string(),
                "must be a non-negative number of days".to_string(),
            ));
        }
        if payout_window_days < 0 {
            return Err(ConfigError::InvalidValue(
                "PAYOUT_MATCH_WINDOW_DAYS".to_string(),
                "must be a non-negative number of days".to_string(),
            ));
        }

        let max_candidates = parse_or::<usize>(
            &env_map,
            "MAX_MATCH_CANDIDATES",
            "25",
            "must be a whole number",
        )?;
        if max_candidates == 0 || max_candidates > MAX_CANDIDATES_CAP {
            return Err(ConfigError::InvalidValue(
                "MAX_MATCH_CANDIDATES".to_string(),
                format!("must be between 1 and {}", MAX_CANDIDATES_CAP),
            ));
        }

        let request_timeout_ms = parse_or::<u64>(
            &env_map,
            "REQUEST_TIMEOUT_MS",
            "30000",
            "must be a valid u64",
        )?;
        let posting_lease_secs = parse_or::<i64>(
            &env_map,
            "POSTING_LEASE_SECS",
            "300",
            "must be a valid i64",
        )?;
        if posting_lease_secs <= 0 {
            return Err(ConfigError::InvalidValue(
                "POSTING_LEASE_SECS".to_string(),
                "must be positive".to_string(),
            ));
        }

        let auto_post_on_match = parse_or::<bool>(
            &env_map,
            "AUTO_POST_ON_MATCH",
            "false",
            "must be true or false",
        )?;

        Ok(Config {
            port,
            database_path,
            api_tokens,
            posting_accounts,
            header_rules_path,
            matching: MatchSettings {
                bank_window_days,
                payout_window_days,
                max_candidates,
            },
            request_timeout_ms,
            posting_lease_secs,
            auto_post_on_match,
        })
    }

    /// Header rules from `HEADER_RULES_PATH`, or the built-in table.
    pub fn header_rules(&self) -> Result<HeaderRules, ConfigError> {
        match &self.header_rules_path {
            Some(path) => HeaderRules::load(Path::new(path)).map_err(|e| {
                ConfigError::InvalidValue("HEADER_RULES_PATH".to_string(), e.to_string())
            }),
            None => Ok(HeaderRules::builtin()),
        }
    }
}

/// `token:actor_id:reader|writer`, comma separated.
fn parse_api_tokens(raw: &str) -> Result<Vec<TokenGrant>, ConfigError> {
    let invalid = |reason: String| ConfigError::InvalidValue("API_TOKENS".to_string(), reason);

    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|entry| {
            let parts: Vec<&str> = entry.split(':').map(str::trim).collect();
            let [token, actor_id, role] = parts.as_slice() else {
                return Err(invalid(format!(
                    "expected token:actor_id:role, got {} parts",
                    parts.len()
                )));
            };
            if token.is_empty() || actor_id.is_empty() {
                return Err(invalid("token and actor id must not be empty".to_string()));
            }
            let role = Role::from_str(role).map_err(invalid)?;
            Ok(TokenGrant {
                token: token.to_string(),
                actor_id: actor_id.to_string(),
                role,
            })
        })
        .collect()
}

/// `role=account_id:Account Name`, comma separated.
fn parse_posting_accounts(raw: &str) -> Result<AccountMap, ConfigError> {
    let invalid =
        |reason: String| ConfigError::InvalidValue("POSTING_ACCOUNTS".to_string(), reason);

    let mut accounts = AccountMap::default();
    for entry in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let (role, account) = entry
            .split_once('=')
            .ok_or_else(|| invalid(format!("expected role=account_id:name in {}", entry)))?;
        let role = PostingRole::from_str(role).map_err(invalid)?;
        let (id, name) = account
            .split_once(':')
            .map(|(id, name)| (id.trim(), name.trim()))
            .unwrap_or((account.trim(), ""));
        let account_id = id
            .parse::<i64>()
            .map_err(|_| invalid(format!("account id for {} must be an integer", role)))?;
        let account_name = if name.is_empty() {
            format!("Account {}", account_id)
        } else {
            name.to_string()
        };
        accounts.insert(
            role,
            LedgerAccount {
                account_id,
                account_name,
            },
        );
    }
    Ok(accounts)
}
