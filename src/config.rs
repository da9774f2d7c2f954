use anyhow::{anyhow, bail, Context};
use tracing::info;

use crate::{database::models::UserId, utils::retry::DEFAULT_MAX_RETRIES, AppError};

/// Where tournaments, balances and the transaction log are kept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatabaseBackend {
    Postgres { url: String },
    /// Nothing survives a restart. Meant for local testing.
    Memory,
}

/// The admin account created at startup if it does not exist yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdminSeed {
    pub user_id: UserId,
    pub name: String,
    /// Credited through the ledger when the account is first created.
    pub balance: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub backend: DatabaseBackend,
    pub max_conflict_retries: u32,
    pub admin: Option<AdminSeed>,
}

impl Config {
    /// Reads the configuration from the environment.
    pub fn from_env() -> Result<Self, AppError> {
        // Load the .env file only in the development environment (bypassed with the --release flag)
        #[cfg(debug_assertions)]
        dotenv::dotenv().ok();

        let config = Self::from_lookup(|key| std::env::var(key).ok())?;
        info!("Successfully loaded configuration");
        Ok(config)
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let backend = match lookup("DATABASE_BACKEND").as_deref() {
            None | Some("postgres") => DatabaseBackend::Postgres {
                url: lookup("DATABASE_URL").ok_or(anyhow!(
                    "Expected DATABASE_URL as an environment variable"
                ))?,
            },
            Some("memory") => DatabaseBackend::Memory,
            Some(other) => bail!(
                "Unknown DATABASE_BACKEND {}, expected postgres or memory",
                other
            ),
        };

        let max_conflict_retries = match lookup("MAX_CONFLICT_RETRIES") {
            Some(value) => value
                .parse()
                .with_context(|| format!("Invalid MAX_CONFLICT_RETRIES: {}", value))?,
            None => DEFAULT_MAX_RETRIES,
        };

        let admin = match lookup("ADMIN_USER_ID") {
            Some(user_id) => {
                let balance = match lookup("ADMIN_BALANCE") {
                    Some(value) => value
                        .parse()
                        .with_context(|| format!("Invalid ADMIN_BALANCE: {}", value))?,
                    None => 0,
                };
                if balance < 0 {
                    bail!("ADMIN_BALANCE must not be negative, got {}", balance);
                }
                Some(AdminSeed {
                    user_id: UserId::new(user_id),
                    name: lookup("ADMIN_NAME").unwrap_or_else(|| "admin".to_string()),
                    balance,
                })
            }
            None => None,
        };

        Ok(Self {
            backend,
            max_conflict_retries,
            admin,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup<'a>(vars: &'a [(&'a str, &'a str)]) -> impl Fn(&str) -> Option<String> + 'a {
        let vars: HashMap<&str, &str> = vars.iter().copied().collect();
        move |key: &str| vars.get(key).map(|v| v.to_string())
    }

    #[test]
    fn defaults_to_postgres() {
        let config = Config::from_lookup(lookup(&[("DATABASE_URL", "postgres://db")])).unwrap();

        assert_eq!(
            config.backend,
            DatabaseBackend::Postgres {
                url: "postgres://db".to_string()
            }
        );
        assert_eq!(config.max_conflict_retries, DEFAULT_MAX_RETRIES);
        assert!(config.admin.is_none());
    }

    #[test]
    fn postgres_requires_a_url() {
        assert!(Config::from_lookup(lookup(&[])).is_err());
        assert!(Config::from_lookup(lookup(&[("DATABASE_BACKEND", "postgres")])).is_err());
    }

    #[test]
    fn memory_backend_needs_no_url() {
        let config = Config::from_lookup(lookup(&[
            ("DATABASE_BACKEND", "memory"),
            ("MAX_CONFLICT_RETRIES", "7"),
        ]))
        .unwrap();

        assert_eq!(config.backend, DatabaseBackend::Memory);
        assert_eq!(config.max_conflict_retries, 7);
    }

    #[test]
    fn reads_the_admin_seed() {
        let config = Config::from_lookup(lookup(&[
            ("DATABASE_BACKEND", "memory"),
            ("ADMIN_USER_ID", "root"),
            ("ADMIN_BALANCE", "5000"),
        ]))
        .unwrap();

        assert_eq!(
            config.admin,
            Some(AdminSeed {
                user_id: UserId::from("root"),
                name: "admin".to_string(),
                balance: 5000,
            })
        );
    }

    #[test]
    fn rejects_malformed_values() {
        for vars in [
            [
                ("DATABASE_BACKEND", "sqlite"),
                ("DATABASE_URL", "x"),
                ("ADMIN_NAME", "x"),
            ],
            [
                ("DATABASE_BACKEND", "memory"),
                ("MAX_CONFLICT_RETRIES", "-1"),
                ("ADMIN_NAME", "x"),
            ],
            [
                ("DATABASE_BACKEND", "memory"),
                ("ADMIN_USER_ID", "root"),
                ("ADMIN_BALANCE", "lots"),
            ],
        ] {
            assert!(Config::from_lookup(lookup(&vars)).is_err());
        }
        assert!(Config::from_lookup(lookup(&[
            ("DATABASE_BACKEND", "memory"),
            ("ADMIN_USER_ID", "root"),
            ("ADMIN_BALANCE", "-10"),
        ]))
        .is_err());
    }
}
