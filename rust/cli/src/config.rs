use anyhow::Result;
use iris_testcontainers::iris::{DEFAULT_IMAGE, DEFAULT_NAMESPACE, DEFAULT_PASSWORD, DEFAULT_TAG, DEFAULT_USERNAME};
use iris_testcontainers::Iris;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

fn default_image() -> String {
    format!("{}:{}", DEFAULT_IMAGE, DEFAULT_TAG)
}

fn default_namespace() -> String {
    DEFAULT_NAMESPACE.to_string()
}

fn default_username() -> String {
    DEFAULT_USERNAME.to_string()
}

fn default_password() -> String {
    DEFAULT_PASSWORD.to_string()
}

fn default_startup_timeout() -> u64 {
    120
}

/// Container settings, read from YAML and overridden by command line flags.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerConfig {
    #[serde(default = "default_image")]
    pub image: String,
    #[serde(default = "default_namespace")]
    pub namespace: String,
    #[serde(default = "default_username")]
    pub username: String,
    #[serde(default = "default_password")]
    pub password: String,
    #[serde(default)]
    pub license_key: Option<PathBuf>,
    #[serde(default = "default_startup_timeout")]
    pub startup_timeout_seconds: u64,
    #[serde(default)]
    pub url_params: BTreeMap<String, String>,
}

impl Default for ContainerConfig {
    fn default() -> Self {
        Self {
            image: default_image(),
            namespace: default_namespace(),
            username: default_username(),
            password: default_password(),
            license_key: None,
            startup_timeout_seconds: default_startup_timeout(),
            url_params: BTreeMap::new(),
        }
    }
}

impl ContainerConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let s = std::fs::read_to_string(path)?;
        let config: ContainerConfig = serde_yaml::from_str(&s)?;
        Ok(config)
    }

    pub fn to_image(&self) -> Result<Iris> {
        let mut iris = Iris::new(&self.image)?
            .with_database_name(&self.namespace)
            .with_username(&self.username)
            .with_password(&self.password)?;
        if let Some(path) = &self.license_key {
            iris = iris.with_license_key(path);
        }
        for (k, v) in &self.url_params {
            iris = iris.with_url_param(k, v);
        }
        Ok(iris)
    }
}
