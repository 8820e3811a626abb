use crate::error::{BootstrapError, Result};
use serde::{Deserialize, Deserializer, Serialize};
use std::io::ErrorKind;
use std::path::Path;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClusterSpec {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub options: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub nodes: Vec<NodeSpec>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub users: Vec<UserSpec>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub mode: DeploymentMode,
    #[serde(default, rename = "self")]
    pub self_node: Option<NodeSpec>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub databases: Vec<DatabaseSpec>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeSpec {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub hostname: Option<String>,
    #[serde(default)]
    pub internal_hostname: Option<String>,
}

impl NodeSpec {
    pub fn host(&self) -> Option<&str> {
        self.hostname
            .as_deref()
            .or(self.internal_hostname.as_deref())
            .filter(|host| !host.trim().is_empty())
    }
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSpec {
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub superuser: Option<bool>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub service: Service,
    #[serde(rename = "type", default, deserialize_with = "null_as_default")]
    pub role_class: RoleClass,
}

impl std::fmt::Debug for UserSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserSpec")
            .field("username", &self.username)
            .field("superuser", &self.superuser)
            .field("service", &self.service)
            .field("role_class", &self.role_class)
            .finish_non_exhaustive()
    }
}

impl UserSpec {
    pub fn is_superuser(&self) -> bool {
        self.superuser.unwrap_or(false)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Service {
    #[default]
    Postgres,
    Pgcat,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoleClass {
    Application,
    ApplicationReadOnly,
    Admin,
    InternalAdmin,
    InternalReadOnly,
    PoolerAuth,
    #[default]
    #[serde(other)]
    Other,
}

impl RoleClass {
    pub fn is_read_only(self) -> bool {
        matches!(
            self,
            Self::ApplicationReadOnly | Self::InternalReadOnly | Self::PoolerAuth
        )
    }

    pub fn is_administrative(self) -> bool {
        matches!(self, Self::Admin | Self::InternalAdmin)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseSpec {
    pub name: String,
    #[serde(default)]
    pub owner: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentMode {
    #[default]
    Online,
    Offline,
}

// Anything but the string "offline" runs the bootstrap.
impl<'de> Deserialize<'de> for DeploymentMode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let mode = serde_json::Value::deserialize(deserializer)?;
        Ok(match mode.as_str() {
            Some("offline") => Self::Offline,
            _ => Self::Online,
        })
    }
}

fn null_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

pub async fn read_spec(path: &Path) -> Result<ClusterSpec> {
    let raw = match tokio::fs::read_to_string(path).await {
        Ok(raw) => raw,
        Err(err) if err.kind() == ErrorKind::NotFound => {
            return Err(BootstrapError::SpecNotFound(path.to_path_buf()))
        }
        Err(err) => {
            return Err(BootstrapError::SpecInvalid {
                path: path.to_path_buf(),
                reason: err.to_string(),
            })
        }
    };
    parse_spec(path, &raw)
}

pub fn parse_spec(path: &Path, raw: &str) -> Result<ClusterSpec> {
    serde_json::from_str(raw).map_err(|err| BootstrapError::SpecInvalid {
        path: path.to_path_buf(),
        reason: err.to_string(),
    })
}
