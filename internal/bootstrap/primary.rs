use super::{sql, Bootstrapper, Phase, PrimaryOutcome};
use crate::cluster::topology::{BootstrapContext, ClusterTopology, SeedTarget};
use crate::error::{BootstrapError, Result};
use crate::meta::db::{can_connect, connect, Connector, Session};
use crate::meta::progress::{DatabaseStatus, ProgressStore};
use crate::util::config::EngineVersion;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeedState {
    Fresh,
    Partial,
    Bootstrapped,
}

impl SeedState {
    pub fn classify(seed_reachable: bool, admin_reachable: bool) -> Option<Self> {
        match (seed_reachable, admin_reachable) {
            (true, false) => Some(Self::Fresh),
            (true, true) => Some(Self::Partial),
            (false, true) => Some(Self::Bootstrapped),
            (false, false) => None,
        }
    }
}

impl<C: Connector, S: ProgressStore> Bootstrapper<C, S> {
    pub(super) async fn ensure_primary(&self, topology: &ClusterTopology) -> Result<PrimaryOutcome> {
        let ctx = &topology.primary;
        let database = ctx.database.as_str();
        let mut progress = self.store.load().await;
        if progress.primary_initialized {
            // Older status files only tracked additional databases.
            if progress.status(database).is_none() {
                progress.advance(database, DatabaseStatus::Subscribed);
                self.store.save(&progress).await?;
            }
            info!(database, "database node already initialized, skipping initialization");
            return Ok(PrimaryOutcome::AlreadyInitialized);
        }

        let outcome = match self.probe_seed(ctx).await? {
            SeedState::Fresh | SeedState::Partial => {
                let version = topology.require_engine_version()?;
                let seed = ctx.seed.as_ref().ok_or_else(|| {
                    BootstrapError::Config("seed database credentials are not configured".into())
                })?;
                info!(database, "initializing database node");
                self.retry_phase("unable to provision primary database", |_| {
                    self.provision_primary(ctx, seed, version, &topology.bootstrap_password)
                })
                .await?;
                self.retry_phase("unable to remove seed database", |_| {
                    self.teardown_seed(ctx, seed)
                })
                .await?;
                PrimaryOutcome::Provisioned
            }
            SeedState::Bootstrapped => {
                info!(database, "seed database already removed, resuming primary initialization");
                PrimaryOutcome::Resumed
            }
        };
        self.record(database, DatabaseStatus::Created).await?;

        if self.next_phase(ctx).await == Phase::InitNode {
            self.run_phase(ctx, Phase::InitNode).await?;
        }
        // Subscriptions on the primary are always rebuilt before the flag is set.
        self.subscribe_and_record(ctx).await?;

        let mut progress = self.store.load().await;
        if progress.mark_primary_initialized() {
            self.store.save(&progress).await?;
        }
        info!(database, "primary database initialized");
        Ok(outcome)
    }

    pub async fn probe_seed(&self, ctx: &BootstrapContext) -> Result<SeedState> {
        self.timings
            .retry
            .retry_if(
                "local engine not reachable",
                |_| async move {
                    let seed_reachable = match &ctx.seed {
                        Some(seed) => can_connect(&self.connector, &seed.dsn).await,
                        None => false,
                    };
                    let admin_reachable = can_connect(&self.connector, &ctx.admin_dsn).await;
                    SeedState::classify(seed_reachable, admin_reachable).ok_or_else(|| {
                        BootstrapError::NotReady(format!(
                            "neither seed database nor {} is reachable",
                            ctx.admin_dsn.target()
                        ))
                    })
                },
                BootstrapError::is_transient,
            )
            .await
    }

    async fn provision_primary(
        &self,
        ctx: &BootstrapContext,
        seed: &SeedTarget,
        version: EngineVersion,
        bootstrap_password: &str,
    ) -> Result<()> {
        let database = ctx.database.as_str();
        let mut session = connect(&self.connector, &seed.dsn, &self.timings.retry).await?;
        session
            .execute_batch(&sql::primary_role_statements(version, &ctx.users))
            .await
            .map_err(|err| BootstrapError::database("create roles and users", err))?;

        let exists = session
            .database_exists(database)
            .await
            .map_err(|err| BootstrapError::database(format!("look up database {database}"), err))?;
        if !exists {
            session
                .execute(&sql::create_database(database, &ctx.owner))
                .await
                .map_err(|err| BootstrapError::database(format!("create database {database}"), err))?;
        }

        let mut statements = sql::database_grants(database, &ctx.owner);
        statements.push(sql::elevate_bootstrap_user(bootstrap_password));
        session
            .execute_batch(&statements)
            .await
            .map_err(|err| BootstrapError::database(format!("grant access to {database}"), err))
    }

    async fn teardown_seed(&self, ctx: &BootstrapContext, seed: &SeedTarget) -> Result<()> {
        let mut session = connect(&self.connector, &ctx.internal_dsn, &self.timings.retry).await?;
        for statement in sql::seed_teardown(&seed.dbname, &seed.username) {
            session
                .execute(&statement)
                .await
                .map_err(|err| BootstrapError::database("remove seed database", err))?;
        }
        info!(seed = %seed.dbname, "seed database removed");
        Ok(())
    }
}
