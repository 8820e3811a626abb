use crate::cluster::topology::Dsn;
use crate::error::{BootstrapError, Result};
use crate::util::retry::RetryPolicy;
use async_trait::async_trait;
use sqlx::postgres::PgConnection;
use sqlx::ConnectOptions;
use std::time::Duration;

/// One open connection to an engine endpoint.
///
/// Statements outside [`Session::begin`]/[`Session::commit`] autocommit.
#[async_trait]
pub trait Session: Send {
    async fn execute(&mut self, sql: &str) -> Result<(), sqlx::Error>;

    async fn fetch_count(&mut self, sql: &str) -> Result<i64, sqlx::Error>;

    async fn database_exists(&mut self, name: &str) -> Result<bool, sqlx::Error>;

    async fn begin(&mut self) -> Result<(), sqlx::Error> {
        self.execute("BEGIN").await
    }

    async fn commit(&mut self) -> Result<(), sqlx::Error> {
        self.execute("COMMIT").await
    }

    async fn rollback(&mut self) -> Result<(), sqlx::Error> {
        self.execute("ROLLBACK").await
    }

    /// Runs every statement inside one transaction; nothing is kept if any fails.
    async fn execute_batch(&mut self, statements: &[String]) -> Result<(), sqlx::Error> {
        self.begin().await?;
        for statement in statements {
            if let Err(err) = self.execute(statement).await {
                if let Err(rollback_err) = self.rollback().await {
                    tracing::debug!(error = %rollback_err, "rollback after failed batch failed");
                }
                return Err(err);
            }
        }
        self.commit().await
    }

    /// Runs one statement inside an open transaction without poisoning it:
    /// a failure rolls back to a savepoint so the caller can try again.
    async fn execute_in_savepoint(&mut self, sql: &str) -> Result<(), sqlx::Error> {
        self.execute("SAVEPOINT pgedge_attempt").await?;
        match self.execute(sql).await {
            Ok(()) => self.execute("RELEASE SAVEPOINT pgedge_attempt").await,
            Err(err) => {
                if let Err(rollback_err) = self
                    .execute("ROLLBACK TO SAVEPOINT pgedge_attempt")
                    .await
                {
                    tracing::debug!(error = %rollback_err, "rollback to savepoint failed");
                }
                Err(err)
            }
        }
    }
}

#[async_trait]
pub trait Connector: Send + Sync {
    type Session: Session;

    async fn open(&self, dsn: &Dsn) -> Result<Self::Session, sqlx::Error>;
}

#[derive(Debug, Clone)]
pub struct PgConnector {
    connect_timeout: Duration,
}

impl PgConnector {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

#[async_trait]
impl Connector for PgConnector {
    type Session = PgSession;

    async fn open(&self, dsn: &Dsn) -> Result<PgSession, sqlx::Error> {
        let options = dsn.connect_options().disable_statement_logging();
        let conn = tokio::time::timeout(self.connect_timeout, options.connect())
            .await
            .map_err(|_| {
                sqlx::Error::Io(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    format!("connect to {} timed out", dsn.target()),
                ))
            })??;
        let mut session = PgSession { conn };
        // Keep passwords in CREATE/ALTER USER out of the server log.
        if let Err(err) = session.execute("SET log_statement = 'none'").await {
            tracing::debug!(endpoint = %dsn.target(), error = %err, "unable to disable statement logging");
        }
        Ok(session)
    }
}

pub struct PgSession {
    conn: PgConnection,
}

#[async_trait]
impl Session for PgSession {
    async fn execute(&mut self, sql: &str) -> Result<(), sqlx::Error> {
        sqlx::Executor::execute(&mut self.conn, sqlx::raw_sql(sql)).await?;
        Ok(())
    }

    async fn fetch_count(&mut self, sql: &str) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar::<_, i64>(sql)
            .fetch_one(&mut self.conn)
            .await
    }

    async fn database_exists(&mut self, name: &str) -> Result<bool, sqlx::Error> {
        sqlx::query_scalar::<_, bool>("SELECT EXISTS(SELECT 1 FROM pg_database WHERE datname = $1)")
            .bind(name)
            .fetch_one(&mut self.conn)
            .await
    }
}

pub fn is_connection_lost(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::PoolClosed
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::WorkerCrashed
    )
}

pub async fn connect<C: Connector>(
    connector: &C,
    dsn: &Dsn,
    policy: &RetryPolicy,
) -> Result<C::Session> {
    let target = dsn.target();
    policy
        .retry(
            &format!("unable to connect to {target}"),
            |_| connector.open(dsn),
        )
        .await
        .map_err(|err| BootstrapError::database(format!("connect to {target}"), err))
}

pub async fn can_connect<C: Connector>(connector: &C, dsn: &Dsn) -> bool {
    match connector.open(dsn).await {
        Ok(_) => true,
        Err(err) => {
            tracing::debug!(endpoint = %dsn.target(), error = %err, "probe failed");
            false
        }
    }
}
