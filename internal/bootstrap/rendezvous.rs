use super::{pause, sql, Bootstrapper};
use crate::cluster::topology::{BootstrapContext, NodeDescriptor};
use crate::error::{BootstrapError, Result};
use crate::meta::db::{connect, is_connection_lost, Connector, Session};
use crate::meta::progress::ProgressStore;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RendezvousOutcome {
    Subscribed { peers: usize },
    NotApplicable,
}

impl<C: Connector, S: ProgressStore> Bootstrapper<C, S> {
    pub(super) async fn subscribe_to_peers(
        &self,
        ctx: &BootstrapContext,
        resubscribe: bool,
    ) -> Result<RendezvousOutcome> {
        let database = ctx.database.as_str();
        if ctx.peer_count() == 0 {
            info!(database, "no peers found, skipping peer spock subscriptions");
            return Ok(RendezvousOutcome::NotApplicable);
        }
        let mut session = connect(&self.connector, &ctx.admin_dsn, &self.timings.retry).await?;
        let mut peers = 0;
        for peer in ctx.peers() {
            info!(database, peer = %peer.name, "waiting for peer");
            self.wait_for_peer(ctx, peer).await?;
            self.subscribe_peer(&mut session, ctx, peer, resubscribe).await?;
            info!(database, peer = %peer.name, "subscribed to peer");
            peers += 1;
        }
        Ok(RendezvousOutcome::Subscribed { peers })
    }

    async fn wait_for_peer(&self, ctx: &BootstrapContext, peer: &NodeDescriptor) -> Result<()> {
        let dsn = ctx.peer_dsn(peer);
        let dsn = &dsn;
        self.timings
            .retry
            .retry(
                &format!("peer {} spock.node not configured", peer.name),
                |_| async move {
                    let mut session = self
                        .connector
                        .open(dsn)
                        .await
                        .map_err(|err| BootstrapError::database(format!("connect to peer {}", peer.name), err))?;
                    let nodes = session
                        .fetch_count(sql::COUNT_NODES)
                        .await
                        .map_err(|err| BootstrapError::database(format!("count spock nodes on {}", peer.name), err))?;
                    if nodes > 0 {
                        Ok(())
                    } else {
                        Err(BootstrapError::NotReady(format!(
                            "peer {} has no spock node yet",
                            peer.name
                        )))
                    }
                },
            )
            .await
    }

    // Drop and create share one transaction; each call gets its own savepoint.
    async fn subscribe_peer(
        &self,
        session: &mut C::Session,
        ctx: &BootstrapContext,
        peer: &NodeDescriptor,
        resubscribe: bool,
    ) -> Result<()> {
        let name = ctx.subscription_name(peer);
        session
            .begin()
            .await
            .map_err(|err| BootstrapError::database("begin subscription transaction", err))?;
        if resubscribe {
            self.execute_until_ok(session, &sql::drop_subscription(&name), "unable to drop subscription")
                .await?;
        }
        pause(self.timings.subscribe_pause).await;
        self.execute_until_ok(
            session,
            &sql::create_subscription(&name, &ctx.peer_dsn(peer)),
            "waiting for subscription to work",
        )
        .await?;
        session
            .commit()
            .await
            .map_err(|err| BootstrapError::database(format!("commit subscription {name}"), err))
    }

    async fn execute_until_ok(
        &self,
        session: &mut C::Session,
        statement: &str,
        label: &str,
    ) -> Result<()> {
        let mut attempt = 0u32;
        loop {
            attempt = attempt.saturating_add(1);
            let err = match session.execute_in_savepoint(statement).await {
                Ok(()) => return Ok(()),
                Err(err) => err,
            };
            // A dead session fails every retry; the caller reconnects.
            if is_connection_lost(&err) {
                return Err(BootstrapError::database(label, err));
            }
            if !self.timings.retry.pause_after(label, attempt, &err).await {
                if let Err(rollback_err) = session.rollback().await {
                    tracing::debug!(error = %rollback_err, "rollback after failed subscription failed");
                }
                return Err(BootstrapError::database(label, err));
            }
        }
    }
}
