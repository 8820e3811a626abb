use crate::cluster::spec::{ClusterSpec, DeploymentMode, NodeSpec, RoleClass, Service, UserSpec};
use crate::error::{BootstrapError, Result};
use crate::util::config::{Config, EngineVersion};
use sqlx::postgres::PgConnectOptions;
use std::fmt;

pub const BOOTSTRAP_USER: &str = "pgedge";
pub const LOCAL_HOST: &str = "localhost";
pub const DEFAULT_PORT: u16 = 5432;

/// Connection parameters for one engine endpoint.
///
/// `Display` renders libpq key/value text, which is what Spock stores for
/// node and subscription DSNs. `Debug` never prints the password.
#[derive(Clone, PartialEq, Eq)]
pub struct Dsn {
    pub host: String,
    pub dbname: String,
    pub user: String,
    pub port: u16,
    pub password: Option<String>,
}

impl Dsn {
    pub fn new(host: &str, dbname: &str, user: &str, port: u16) -> Self {
        Self {
            host: host.to_string(),
            dbname: dbname.to_string(),
            user: user.to_string(),
            port,
            password: None,
        }
    }

    pub fn with_password(mut self, password: Option<&str>) -> Self {
        self.password = password
            .filter(|value| !value.is_empty())
            .map(str::to_string);
        self
    }

    pub fn connect_options(&self) -> PgConnectOptions {
        let options = PgConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .username(&self.user)
            .database(&self.dbname)
            .application_name("pgedge-init");
        match &self.password {
            Some(password) => options.password(password),
            None => options,
        }
    }

    pub fn target(&self) -> String {
        format!("{}@{}:{}/{}", self.user, self.host, self.port, self.dbname)
    }
}

impl fmt::Display for Dsn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "host={} dbname={} user={} port={}",
            self.host, self.dbname, self.user, self.port
        )?;
        if let Some(password) = &self.password {
            write!(f, " password={password}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for Dsn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dsn")
            .field("host", &self.host)
            .field("dbname", &self.dbname)
            .field("user", &self.user)
            .field("port", &self.port)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeDescriptor {
    pub id: String,
    pub name: String,
    pub region: Option<String>,
    pub host: String,
}

impl NodeDescriptor {
    fn from_spec(node: &NodeSpec) -> Result<Self> {
        let host = node.host().ok_or_else(|| {
            BootstrapError::Config(format!("node {} ({}) has no hostname", node.id, node.name))
        })?;
        Ok(Self {
            id: node.id.clone(),
            name: node.name.clone(),
            region: node.region.clone(),
            host: host.to_string(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeedTarget {
    pub dsn: Dsn,
    pub dbname: String,
    pub username: String,
}

#[derive(Debug, Clone)]
pub struct BootstrapContext {
    pub database: String,
    pub owner: String,
    pub self_node: NodeDescriptor,
    pub nodes: Vec<NodeDescriptor>,
    pub users: Vec<UserSpec>,
    pub port: u16,
    pub replication_dsn: Dsn,
    pub admin_dsn: Dsn,
    pub internal_dsn: Dsn,
    pub seed: Option<SeedTarget>,
}

impl BootstrapContext {
    pub fn peers(&self) -> impl Iterator<Item = &NodeDescriptor> {
        self.nodes.iter().filter(|node| node.id != self.self_node.id)
    }

    pub fn peer_count(&self) -> usize {
        self.peers().count()
    }

    /// Provider DSN for a peer. Peers authenticate the bootstrap user through
    /// host-based trust, so no password is stored in the subscription.
    pub fn peer_dsn(&self, peer: &NodeDescriptor) -> Dsn {
        Dsn::new(&peer.host, &self.database, BOOTSTRAP_USER, self.port)
    }

    pub fn subscription_name(&self, peer: &NodeDescriptor) -> String {
        subscription_name(&self.database, &self.self_node.name, &peer.name)
    }
}

pub fn subscription_name(database: &str, self_name: &str, peer_name: &str) -> String {
    format!("sub_{database}_{self_name}_{peer_name}")
}

#[derive(Debug, Clone)]
pub struct ClusterTopology {
    pub mode: DeploymentMode,
    pub engine_version: Option<EngineVersion>,
    pub bootstrap_password: String,
    pub primary: BootstrapContext,
    pub additional: Vec<BootstrapContext>,
}

impl ClusterTopology {
    pub fn resolve(spec: &ClusterSpec, config: &Config) -> Result<Self> {
        let primary_name = required_name(spec)?;
        if spec.nodes.is_empty() {
            return Err(BootstrapError::Config("nodes not found in spec".into()));
        }
        if spec.users.is_empty() {
            return Err(BootstrapError::Config("users not found in spec".into()));
        }
        let self_node = NodeDescriptor::from_spec(&resolve_self_node(spec, config)?)?;
        let nodes = spec
            .nodes
            .iter()
            .map(NodeDescriptor::from_spec)
            .collect::<Result<Vec<_>>>()?;
        let (users, bootstrap_password) = split_bootstrap_user(&spec.users, config)?;
        let (admin_username, admin_password) = admin_credentials(&users)?;
        let port = spec.port.unwrap_or(DEFAULT_PORT);

        let base = ContextBase {
            self_node,
            nodes,
            users,
            port,
            primary: primary_name.to_string(),
            admin_username: admin_username.clone(),
            admin_password,
            bootstrap_password: bootstrap_password.clone(),
        };
        let primary = base.context(primary_name, &admin_username, seed_target(config, port));
        let additional = additional_databases(spec, primary_name)
            .into_iter()
            .map(|(name, owner)| base.context(name, owner.unwrap_or(&admin_username), None))
            .collect();

        Ok(Self {
            mode: spec.mode,
            engine_version: config.engine_version,
            bootstrap_password,
            primary,
            additional,
        })
    }

    pub fn require_engine_version(&self) -> Result<EngineVersion> {
        self.engine_version.ok_or_else(|| {
            BootstrapError::Config("PGV is required to bootstrap the primary database".into())
        })
    }

    pub fn contexts(&self) -> impl Iterator<Item = &BootstrapContext> {
        std::iter::once(&self.primary).chain(self.additional.iter())
    }
}

struct ContextBase {
    self_node: NodeDescriptor,
    nodes: Vec<NodeDescriptor>,
    users: Vec<UserSpec>,
    port: u16,
    primary: String,
    admin_username: String,
    admin_password: String,
    bootstrap_password: String,
}

impl ContextBase {
    fn context(&self, database: &str, owner: &str, seed: Option<SeedTarget>) -> BootstrapContext {
        let password = Some(self.bootstrap_password.as_str());
        BootstrapContext {
            database: database.to_string(),
            owner: owner.to_string(),
            self_node: self.self_node.clone(),
            nodes: self.nodes.clone(),
            users: self.users.clone(),
            port: self.port,
            replication_dsn: Dsn::new(&self.self_node.host, database, BOOTSTRAP_USER, self.port)
                .with_password(password),
            admin_dsn: Dsn::new(LOCAL_HOST, database, &self.admin_username, self.port)
                .with_password(Some(self.admin_password.as_str())),
            internal_dsn: Dsn::new(LOCAL_HOST, &self.primary, BOOTSTRAP_USER, self.port)
                .with_password(password),
            seed,
        }
    }
}

fn required_name(spec: &ClusterSpec) -> Result<&str> {
    spec.name
        .as_deref()
        .filter(|name| !name.trim().is_empty())
        .ok_or_else(|| BootstrapError::Config("default database name not found in spec".into()))
}

fn resolve_self_node(spec: &ClusterSpec, config: &Config) -> Result<NodeSpec> {
    if let Some(node) = &spec.self_node {
        return Ok(node.clone());
    }
    spec.nodes
        .iter()
        .find(|node| node.id == config.node_id)
        .cloned()
        .ok_or_else(|| BootstrapError::SelfNodeNotFound {
            node_id: config.node_id.clone(),
            node_name: config.node_name.clone(),
        })
}

fn split_bootstrap_user(users: &[UserSpec], config: &Config) -> Result<(Vec<UserSpec>, String)> {
    let mut postgres_users: Vec<UserSpec> = Vec::new();
    for user in users.iter().filter(|user| user.service == Service::Postgres) {
        match postgres_users
            .iter_mut()
            .find(|existing| existing.username == user.username)
        {
            Some(existing) => *existing = user.clone(),
            None => postgres_users.push(user.clone()),
        }
    }
    let bootstrap = postgres_users
        .iter()
        .position(|user| user.username == BOOTSTRAP_USER)
        .map(|idx| postgres_users.remove(idx));
    let password = bootstrap
        .map(|user| user.password)
        .or_else(|| config.seed.password.clone())
        .filter(|password| !password.is_empty())
        .ok_or_else(|| {
            BootstrapError::Config(format!(
                "{BOOTSTRAP_USER} user configuration not found in spec"
            ))
        })?;
    Ok((postgres_users, password))
}

fn admin_credentials(users: &[UserSpec]) -> Result<(String, String)> {
    let mut admins = users
        .iter()
        .filter(|user| user.role_class == RoleClass::Admin);
    let admin = admins
        .next()
        .filter(|user| !user.username.is_empty() && !user.password.is_empty())
        .ok_or_else(|| BootstrapError::Config("admin user configuration not found in spec".into()))?;
    if let Some(extra) = admins.next() {
        return Err(BootstrapError::Config(format!(
            "multiple admin users configured ({} and {})",
            admin.username, extra.username
        )));
    }
    Ok((admin.username.clone(), admin.password.clone()))
}

fn seed_target(config: &Config, port: u16) -> Option<SeedTarget> {
    let dbname = config.seed.dbname.as_deref()?;
    let username = config.seed.username.as_deref()?;
    Some(SeedTarget {
        dsn: Dsn::new(LOCAL_HOST, dbname, username, port)
            .with_password(config.seed.password.as_deref()),
        dbname: dbname.to_string(),
        username: username.to_string(),
    })
}

fn additional_databases<'a>(
    spec: &'a ClusterSpec,
    primary: &str,
) -> Vec<(&'a str, Option<&'a str>)> {
    let mut seen: Vec<&str> = vec![primary];
    let mut out = Vec::new();
    for db in &spec.databases {
        let name = db.name.trim();
        if name.is_empty() || seen.contains(&name) {
            tracing::debug!(database = %db.name, "skipping duplicate database entry");
            continue;
        }
        seen.push(name);
        out.push((name, db.owner.as_deref().filter(|owner| !owner.is_empty())));
    }
    out
}
