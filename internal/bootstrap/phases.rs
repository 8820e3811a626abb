use super::{sql, Bootstrapper};
use crate::cluster::topology::BootstrapContext;
use crate::error::{BootstrapError, Result};
use crate::meta::db::{connect, Connector, Session};
use crate::meta::progress::ProgressStore;
use tracing::info;

impl<C: Connector, S: ProgressStore> Bootstrapper<C, S> {
    pub(super) async fn create_database(&self, ctx: &BootstrapContext) -> Result<()> {
        let database = ctx.database.as_str();
        let mut session = connect(&self.connector, &ctx.internal_dsn, &self.timings.retry).await?;
        let exists = session
            .database_exists(database)
            .await
            .map_err(|err| BootstrapError::database(format!("look up database {database}"), err))?;
        if exists {
            info!(database, "database already exists");
        } else {
            session
                .execute(&sql::create_database(database, &ctx.owner))
                .await
                .map_err(|err| BootstrapError::database(format!("create database {database}"), err))?;
        }
        session
            .execute_batch(&sql::database_grants(database, &ctx.owner))
            .await
            .map_err(|err| BootstrapError::database(format!("grant access to {database}"), err))
    }

    pub(super) async fn init_node(&self, ctx: &BootstrapContext) -> Result<()> {
        let database = ctx.database.as_str();
        let mut statements = sql::create_extensions();
        statements.extend(sql::pooler_grants(&ctx.users));
        statements.extend(sql::all_user_grants(&ctx.users, database, sql::GRANT_SCHEMAS));
        statements.push(sql::register_node(&ctx.self_node.name, &ctx.replication_dsn));

        let mut replication =
            connect(&self.connector, &ctx.replication_dsn, &self.timings.retry).await?;
        replication
            .execute_batch(&statements)
            .await
            .map_err(|err| BootstrapError::database(format!("register spock node on {database}"), err))?;

        let mut admin = connect(&self.connector, &ctx.admin_dsn, &self.timings.retry).await?;
        for statement in sql::all_user_grants(&ctx.users, database, &["public"]) {
            admin
                .execute(&statement)
                .await
                .map_err(|err| BootstrapError::database(format!("grant public schema on {database}"), err))?;
        }

        replication
            .execute_batch(&sql::all_user_grants(&ctx.users, database, sql::GRANT_SCHEMAS))
            .await
            .map_err(|err| BootstrapError::database(format!("grant schemas on {database}"), err))
    }
}
