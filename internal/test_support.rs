use crate::cluster::spec::parse_spec;
use crate::cluster::topology::{ClusterTopology, Dsn};
use crate::meta::db::{Connector, Session};
use crate::util::config::{Config, EngineVersion, SeedCredentials, Timings};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

// Three nodes, a bootstrap user, an admin, an application user, a read-only
// user and one additional database.
pub const THREE_NODE_SPEC: &str = r#"{
    "name": "main",
    "nodes": [
        {"id": "1", "name": "n1", "region": "us-east-1", "hostname": "h1"},
        {"id": "2", "name": "n2", "region": "us-west-2", "hostname": "h2"},
        {"id": "3", "name": "n3", "region": "eu-west-1", "hostname": "h3"}
    ],
    "users": [
        {"username": "pgedge", "password": "edgepw", "service": "postgres", "type": "internal_admin"},
        {"username": "admin1", "password": "adminpw", "service": "postgres", "type": "admin"},
        {"username": "app", "password": "apppw", "service": "postgres", "type": "application"},
        {"username": "reader", "password": "readpw", "service": "postgres", "type": "application_read_only"}
    ],
    "databases": [{"name": "analytics", "owner": "admin1"}]
}"#;

pub const SINGLE_NODE_SPEC: &str = r#"{
    "name": "main",
    "nodes": [{"id": "1", "name": "n1", "region": "us-east-1", "hostname": "h1"}],
    "users": [
        {"username": "pgedge", "password": "edgepw", "service": "postgres", "type": "internal_admin"},
        {"username": "admin1", "password": "adminpw", "service": "postgres", "type": "admin"}
    ]
}"#;

pub fn test_config(node_id: &str) -> Config {
    Config {
        spec_path: PathBuf::from("cluster.json"),
        status_path: PathBuf::from("init-status.json"),
        force_init: false,
        node_name: format!("n{node_id}"),
        node_id: node_id.to_string(),
        engine_version: Some(EngineVersion::Pg16),
        seed: SeedCredentials {
            dbname: Some("init".into()),
            username: Some("init".into()),
            password: Some("initpw".into()),
        },
        timings: Timings::immediate(),
    }
}

pub fn topology(raw_spec: &str, node_id: &str) -> ClusterTopology {
    let spec = parse_spec(Path::new("cluster.json"), raw_spec).expect("parse spec");
    ClusterTopology::resolve(&spec, &test_config(node_id)).expect("resolve topology")
}

#[derive(Default)]
struct FakeState {
    refusals: HashMap<String, u32>,
    attempts: HashMap<String, u32>,
    failures: Vec<(String, u32)>,
    breaks: Vec<(String, u32)>,
    statements: Vec<(String, String)>,
    committed: Vec<(String, String)>,
    reads: Vec<(String, String)>,
    node_counts: HashMap<String, Vec<i64>>,
    databases: HashSet<String>,
}

// In-memory engines: records statements per endpoint and applies transactions.
#[derive(Clone, Default)]
pub struct FakeCluster {
    state: Arc<Mutex<FakeState>>,
}

impl FakeCluster {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().expect("fake cluster lock")
    }

    pub fn refuse_connections(&self, dsn: &Dsn, times: u32) {
        self.lock().refusals.insert(dsn.target(), times);
    }

    pub fn take_down(&self, dsn: &Dsn) {
        self.refuse_connections(dsn, u32::MAX);
    }

    pub fn bring_up(&self, dsn: &Dsn) {
        self.lock().refusals.remove(&dsn.target());
    }

    // The next `times` statements containing `pattern` fail.
    pub fn fail_statement(&self, pattern: &str, times: u32) {
        self.lock().failures.push((pattern.to_string(), times));
    }

    // The next `times` statements containing `pattern` drop the session;
    // everything issued on it afterwards fails too.
    pub fn break_connection_on(&self, pattern: &str, times: u32) {
        self.lock().breaks.push((pattern.to_string(), times));
    }

    // Successive answers to the Spock node count on `host`; the last one repeats.
    pub fn script_node_counts(&self, host: &str, counts: &[i64]) {
        self.lock()
            .node_counts
            .insert(host.to_string(), counts.to_vec());
    }

    pub fn add_database(&self, name: &str) {
        self.lock().databases.insert(name.to_string());
    }

    pub fn connect_attempts(&self, dsn: &Dsn) -> u32 {
        self.lock()
            .attempts
            .get(&dsn.target())
            .copied()
            .unwrap_or(0)
    }

    pub fn total_connect_attempts(&self) -> u32 {
        self.lock().attempts.values().sum()
    }

    // Every statement issued against `dsn`, including failed ones.
    pub fn statements_for(&self, dsn: &Dsn) -> Vec<String> {
        let target = dsn.target();
        self.lock()
            .statements
            .iter()
            .filter(|(key, _)| *key == target)
            .map(|(_, sql)| sql.clone())
            .collect()
    }

    // Statements that took effect, across all endpoints.
    pub fn writes(&self) -> Vec<String> {
        self.lock()
            .committed
            .iter()
            .map(|(_, sql)| sql.clone())
            .collect()
    }

    pub fn writes_for(&self, dsn: &Dsn) -> Vec<String> {
        let target = dsn.target();
        self.lock()
            .committed
            .iter()
            .filter(|(key, _)| *key == target)
            .map(|(_, sql)| sql.clone())
            .collect()
    }

    pub fn writes_containing(&self, pattern: &str) -> Vec<String> {
        self.writes()
            .into_iter()
            .filter(|sql| sql.contains(pattern))
            .collect()
    }

    pub fn reads_for(&self, dsn: &Dsn) -> Vec<String> {
        let target = dsn.target();
        self.lock()
            .reads
            .iter()
            .filter(|(key, _)| *key == target)
            .map(|(_, sql)| sql.clone())
            .collect()
    }

    // Replays committed subscription calls. Returns the live subscription
    // names and how many creates hit an already-existing name.
    pub fn subscriptions(&self) -> (Vec<String>, usize) {
        let mut live: Vec<String> = Vec::new();
        let mut duplicates = 0;
        for sql in self.writes() {
            let Some(name) = subscription_name_in(&sql) else {
                continue;
            };
            if sql.contains("spock.sub_drop") {
                live.retain(|existing| *existing != name);
            } else if sql.contains("spock.sub_create") {
                if live.contains(&name) {
                    duplicates += 1;
                } else {
                    live.push(name);
                }
            }
        }
        (live, duplicates)
    }

    fn scripted_failure(state: &mut FakeState, sql: &str) -> Option<sqlx::Error> {
        let rule = state
            .failures
            .iter_mut()
            .find(|(pattern, remaining)| *remaining > 0 && sql.contains(pattern.as_str()))?;
        rule.1 -= 1;
        Some(sqlx::Error::Protocol(format!("scripted failure: {}", rule.0)))
    }
}

fn scripted_break(state: &mut FakeState, sql: &str) -> bool {
    let Some(rule) = state
        .breaks
        .iter_mut()
        .find(|(pattern, remaining)| *remaining > 0 && sql.contains(pattern.as_str()))
    else {
        return false;
    };
    rule.1 -= 1;
    true
}

fn connection_closed() -> sqlx::Error {
    sqlx::Error::Io(std::io::Error::new(
        std::io::ErrorKind::BrokenPipe,
        "connection closed",
    ))
}

fn subscription_name_in(sql: &str) -> Option<String> {
    let start = sql.find("subscription_name := '")? + "subscription_name := '".len();
    let len = sql[start..].find('\'')?;
    Some(sql[start..start + len].to_string())
}

#[async_trait]
impl Connector for FakeCluster {
    type Session = FakeSession;

    async fn open(&self, dsn: &Dsn) -> Result<FakeSession, sqlx::Error> {
        let target = dsn.target();
        let mut state = self.lock();
        *state.attempts.entry(target.clone()).or_insert(0) += 1;
        if let Some(remaining) = state.refusals.get_mut(&target) {
            if *remaining > 0 {
                if *remaining != u32::MAX {
                    *remaining -= 1;
                }
                return Err(sqlx::Error::Protocol(format!(
                    "connection to {target} refused"
                )));
            }
        }
        Ok(FakeSession {
            cluster: self.clone(),
            target,
            host: dsn.host.clone(),
            in_transaction: false,
            pending: Vec::new(),
            savepoint: 0,
            broken: false,
        })
    }
}

pub struct FakeSession {
    cluster: FakeCluster,
    target: String,
    host: String,
    in_transaction: bool,
    pending: Vec<String>,
    savepoint: usize,
    broken: bool,
}

#[async_trait]
impl Session for FakeSession {
    async fn execute(&mut self, sql: &str) -> Result<(), sqlx::Error> {
        let mut state = self.cluster.lock();
        state.statements.push((self.target.clone(), sql.to_string()));
        if self.broken || scripted_break(&mut state, sql) {
            self.broken = true;
            self.pending.clear();
            return Err(connection_closed());
        }
        if let Some(err) = FakeCluster::scripted_failure(&mut state, sql) {
            return Err(err);
        }
        if sql == "BEGIN" {
            self.in_transaction = true;
            self.pending.clear();
        } else if sql == "COMMIT" {
            for statement in self.pending.drain(..) {
                state.committed.push((self.target.clone(), statement));
            }
            self.in_transaction = false;
        } else if sql.starts_with("ROLLBACK TO SAVEPOINT") {
            self.pending.truncate(self.savepoint);
        } else if sql == "ROLLBACK" {
            self.pending.clear();
            self.in_transaction = false;
        } else if sql.starts_with("SAVEPOINT") {
            self.savepoint = self.pending.len();
        } else if sql.starts_with("RELEASE SAVEPOINT") {
        } else if self.in_transaction {
            self.pending.push(sql.to_string());
        } else {
            if let Some(name) = sql
                .strip_prefix("CREATE DATABASE ")
                .and_then(|rest| rest.split_whitespace().next())
            {
                state.databases.insert(name.to_string());
            }
            state.committed.push((self.target.clone(), sql.to_string()));
        }
        Ok(())
    }

    async fn fetch_count(&mut self, sql: &str) -> Result<i64, sqlx::Error> {
        let mut state = self.cluster.lock();
        state.reads.push((self.target.clone(), sql.to_string()));
        if self.broken {
            return Err(connection_closed());
        }
        if let Some(err) = FakeCluster::scripted_failure(&mut state, sql) {
            return Err(err);
        }
        if !sql.contains("spock.node") {
            return Ok(0);
        }
        let Some(counts) = state.node_counts.get_mut(&self.host) else {
            return Ok(1);
        };
        if counts.len() > 1 {
            return Ok(counts.remove(0));
        }
        Ok(counts.first().copied().unwrap_or(1))
    }

    async fn database_exists(&mut self, name: &str) -> Result<bool, sqlx::Error> {
        let mut state = self.cluster.lock();
        state
            .reads
            .push((self.target.clone(), format!("database_exists({name})")));
        Ok(state.databases.contains(name))
    }
}
