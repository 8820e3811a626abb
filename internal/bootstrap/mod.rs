mod phases;
mod primary;
mod rendezvous;
pub mod sql;

pub use primary::SeedState;
pub use rendezvous::RendezvousOutcome;

use crate::cluster::spec::DeploymentMode;
use crate::cluster::topology::{BootstrapContext, ClusterTopology};
use crate::error::{BootstrapError, Result};
use crate::meta::db::Connector;
use crate::meta::progress::{DatabaseStatus, ProgressStore};
use crate::util::config::Timings;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Create,
    InitNode,
    Subscribe,
    Done,
}

impl Phase {
    pub fn after(status: Option<DatabaseStatus>) -> Self {
        match status {
            None => Self::Create,
            Some(DatabaseStatus::Created) => Self::InitNode,
            Some(DatabaseStatus::Inited) => Self::Subscribe,
            Some(DatabaseStatus::Subscribed) => Self::Done,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::InitNode => "init-node",
            Self::Subscribe => "subscribe",
            Self::Done => "done",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrimaryOutcome {
    AlreadyInitialized,
    Provisioned,
    Resumed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BootstrapReport {
    Offline,
    Completed {
        primary: PrimaryOutcome,
        databases: Vec<(String, Option<DatabaseStatus>)>,
    },
}

pub struct Bootstrapper<C, S> {
    connector: C,
    store: S,
    timings: Timings,
}

impl<C: Connector, S: ProgressStore> Bootstrapper<C, S> {
    pub fn new(connector: C, store: S, timings: Timings) -> Self {
        Self {
            connector,
            store,
            timings,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub async fn run(&self, topology: &ClusterTopology) -> Result<BootstrapReport> {
        if topology.mode == DeploymentMode::Offline {
            info!("mode offline configured, postgres will not start");
            return Ok(BootstrapReport::Offline);
        }
        pause(self.timings.startup_delay).await;

        let primary = self.ensure_primary(topology).await?;
        for phase in [Phase::Create, Phase::InitNode, Phase::Subscribe] {
            for ctx in topology.contexts() {
                self.ensure(ctx, phase).await?;
            }
        }

        let progress = self.store.load().await;
        let databases = topology
            .contexts()
            .map(|ctx| (ctx.database.clone(), progress.status(&ctx.database)))
            .collect();
        info!(node = %topology.primary.self_node.name, "cluster node initialized");
        Ok(BootstrapReport::Completed { primary, databases })
    }

    pub async fn next_phase(&self, ctx: &BootstrapContext) -> Phase {
        Phase::after(self.store.load().await.status(&ctx.database))
    }

    async fn ensure(&self, ctx: &BootstrapContext, phase: Phase) -> Result<()> {
        let status = self.store.load().await.status(&ctx.database);
        if phase == Phase::InitNode && status.is_none() {
            return Err(BootstrapError::MissingProgress(ctx.database.clone()));
        }
        if Phase::after(status) != phase {
            debug!(
                database = %ctx.database,
                phase = phase.as_str(),
                status = status.map(DatabaseStatus::as_str).unwrap_or("absent"),
                "phase already done, skipping"
            );
            return Ok(());
        }
        self.run_phase(ctx, phase).await
    }

    pub async fn run_phase(&self, ctx: &BootstrapContext, phase: Phase) -> Result<()> {
        let database = ctx.database.as_str();
        match phase {
            Phase::Create => {
                info!(database, "creating database");
                self.retry_phase(&format!("unable to create database {database}"), |_| {
                    self.create_database(ctx)
                })
                .await?;
                self.record(database, DatabaseStatus::Created).await?;
                info!(database, "database created");
            }
            Phase::InitNode => {
                info!(database, "database created, initializing spock node");
                self.retry_phase(
                    &format!("unable to initialize spock node for {database}"),
                    |_| self.init_node(ctx),
                )
                .await?;
                self.record(database, DatabaseStatus::Inited).await?;
                pause(self.timings.settle_delay).await;
                info!(database, "spock node initialized");
            }
            Phase::Subscribe => {
                info!(database, "database not subscribed to peers, subscribing");
                self.subscribe_and_record(ctx).await?;
            }
            Phase::Done => {}
        }
        Ok(())
    }

    async fn subscribe_and_record(&self, ctx: &BootstrapContext) -> Result<RendezvousOutcome> {
        let database = ctx.database.as_str();
        let outcome = self
            .retry_phase(
                &format!("unable to subscribe {database} to peers"),
                |_| self.subscribe_to_peers(ctx, true),
            )
            .await?;
        match outcome {
            RendezvousOutcome::Subscribed { peers } => {
                self.record(database, DatabaseStatus::Subscribed).await?;
                info!(database, peers, "database subscribed to peers");
            }
            RendezvousOutcome::NotApplicable => {
                info!(database, "no need to subscribe to peers, skipping");
            }
        }
        Ok(outcome)
    }

    async fn record(&self, database: &str, status: DatabaseStatus) -> Result<()> {
        let mut progress = self.store.load().await;
        if progress.advance(database, status) {
            self.store.save(&progress).await?;
            debug!(database, status = status.as_str(), "progress recorded");
        }
        Ok(())
    }

    async fn retry_phase<T, F, Fut>(&self, label: &str, op: F) -> Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.timings
            .retry
            .retry_if(label, op, BootstrapError::is_transient)
            .await
    }
}

async fn pause(delay: Duration) {
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
}
