//! Versioned schema migrations.
//!
//! Each backend lists its migrations in version order and keeps the applied
//! version in a `schema_version` table. Opening a store runs
//! [`Migrator::migrate_to_latest`].

use crate::prelude::*;
use anyhow::{Context, bail};
use async_trait::async_trait;

/// One schema step, moving the database to `target_version`.
#[async_trait]
pub trait Migration: Send + Sync {
    fn target_version(&self) -> u32;

    fn description(&self) -> &str;

    async fn apply(&self) -> Result<()>;
}

#[async_trait]
pub trait Migrator: Send + Sync {
    /// Version recorded by the last completed migration, 0 on a fresh database.
    async fn stored_version(&self) -> Result<u32>;

    async fn record_version(&self, version: u32) -> Result<()>;

    /// Every migration this backend knows, ascending by target version.
    fn migrations(&self) -> Vec<Box<dyn Migration>>;

    /// Apply every migration above the stored version.
    ///
    /// The version is recorded after each step, so a failure leaves the
    /// schema at the last step that completed.
    ///
    /// # Errors
    ///
    /// Fails when a step fails or when the database was migrated by a newer
    /// build than this one.
    async fn migrate_to_latest(&self) -> Result<()> {
        let stored = self.stored_version().await?;
        let migrations = self.migrations();
        let Some(latest) = migrations.iter().map(|m| m.target_version()).max() else {
            tracing::debug!("backend defines no migrations");
            return Ok(());
        };

        if stored > latest {
            bail!("database schema is at version {stored} but this build only knows up to {latest}");
        }
        if stored == latest {
            tracing::debug!(version = stored, "schema current");
            return Ok(());
        }

        tracing::info!(from = stored, to = latest, "upgrading schema");
        for migration in migrations
            .into_iter()
            .filter(|m| m.target_version() > stored)
        {
            let version = migration.target_version();
            tracing::info!(version, step = migration.description(), "applying migration");
            migration
                .apply()
                .await
                .with_context(|| format!("schema migration to version {version} failed"))?;
            self.record_version(version)
                .await
                .with_context(|| format!("could not record schema version {version}"))?;
        }
        Ok(())
    }
}

pub mod sqlite;
#[cfg(feature = "postgres")]
pub mod postgres;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct MockMigration {
        version: u32,
        fail: bool,
        log: Arc<Mutex<Vec<u32>>>,
    }

    #[async_trait]
    impl Migration for MockMigration {
        fn target_version(&self) -> u32 {
            self.version
        }

        fn description(&self) -> &str {
            "mock"
        }

        async fn apply(&self) -> Result<()> {
            if self.fail {
                bail!("step failed");
            }
            self.log.lock().unwrap().push(self.version);
            Ok(())
        }
    }

    struct MockMigrator {
        current_version: AtomicU32,
        versions: Vec<u32>,
        failing: Option<u32>,
        log: Arc<Mutex<Vec<u32>>>,
    }

    impl MockMigrator {
        fn new(initial: u32, versions: &[u32]) -> Self {
            Self {
                current_version: AtomicU32::new(initial),
                versions: versions.to_vec(),
                failing: None,
                log: Arc::new(Mutex::new(Vec::new())),
            }
        }

        fn applied(&self) -> Vec<u32> {
            self.log.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Migrator for MockMigrator {
        async fn stored_version(&self) -> Result<u32> {
            Ok(self.current_version.load(Ordering::SeqCst))
        }

        async fn record_version(&self, version: u32) -> Result<()> {
            self.current_version.store(version, Ordering::SeqCst);
            Ok(())
        }

        fn migrations(&self) -> Vec<Box<dyn Migration>> {
            self.versions
                .iter()
                .map(|&version| {
                    Box::new(MockMigration {
                        version,
                        fail: self.failing == Some(version),
                        log: self.log.clone(),
                    }) as Box<dyn Migration>
                })
                .collect()
        }
    }

    #[tokio::test]
    async fn no_migrations_is_a_no_op() {
        let migrator = MockMigrator::new(0, &[]);
        migrator.migrate_to_latest().await.unwrap();
        assert_eq!(migrator.stored_version().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn applies_only_pending_migrations_in_order() {
        let migrator = MockMigrator::new(1, &[1, 2, 3]);
        migrator.migrate_to_latest().await.unwrap();
        assert_eq!(migrator.applied(), vec![2, 3]);
        assert_eq!(migrator.stored_version().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn up_to_date_applies_nothing() {
        let migrator = MockMigrator::new(3, &[1, 2, 3]);
        migrator.migrate_to_latest().await.unwrap();
        assert!(migrator.applied().is_empty());
    }

    #[tokio::test]
    async fn version_too_high_is_rejected() {
        let migrator = MockMigrator::new(10, &[1, 2]);
        let err = migrator.migrate_to_latest().await.unwrap_err();
        assert!(err.to_string().contains("version 10"));
        assert!(err.to_string().contains("up to 2"));
    }

    #[tokio::test]
    async fn failure_stops_at_last_completed_version() {
        let mut migrator = MockMigrator::new(0, &[1, 2, 3]);
        migrator.failing = Some(2);
        let err = migrator.migrate_to_latest().await.unwrap_err();
        assert!(err.to_string().contains("version 2"));
        assert_eq!(migrator.stored_version().await.unwrap(), 1);
        assert_eq!(migrator.applied(), vec![1]);
    }
}
