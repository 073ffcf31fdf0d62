use std::collections::BTreeMap;

use crate::error::{IrisError, Result};
use crate::image_name::ImageName;
use crate::iris::{Iris, DEFAULT_IMAGE, NAME};

const PREFIX: &str = "jdbc:tc:";

/// A parsed `jdbc:tc:<type>[:<tag>]://<host>/<database>[?k=v&...]` url.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerUrl {
    pub database_type: String,
    pub image_tag: Option<String>,
    pub database_name: Option<String>,
    pub query_params: BTreeMap<String, String>,
}

impl ContainerUrl {
    pub fn parse(url: &str) -> Result<Self> {
        let invalid = |reason: &str| IrisError::InvalidContainerUrl {
            url: url.to_string(),
            reason: reason.to_string(),
        };

        let rest = url
            .strip_prefix(PREFIX)
            .ok_or_else(|| invalid("expected a `jdbc:tc:` prefix"))?;
        let (kind, rest) = rest
            .split_once("://")
            .ok_or_else(|| invalid("missing `://`"))?;

        let (database_type, image_tag) = match kind.split_once(':') {
            Some((ty, tag)) if !tag.is_empty() => (ty, Some(tag.to_string())),
            Some(_) => return Err(invalid("empty image tag")),
            None => (kind, None),
        };
        if database_type.is_empty() {
            return Err(invalid("missing database type"));
        }

        let (location, query) = match rest.split_once('?') {
            Some((location, query)) => (location, Some(query)),
            None => (rest, None),
        };
        let database_name = location
            .split_once('/')
            .map(|(_, path)| path.trim_end_matches('/'))
            .filter(|path| !path.is_empty())
            .map(str::to_string);

        let mut query_params = BTreeMap::new();
        for pair in query.into_iter().flat_map(|q| q.split('&')).filter(|p| !p.is_empty()) {
            let (k, v) = pair.split_once('=').unwrap_or((pair, ""));
            query_params.insert(k.to_string(), v.to_string());
        }

        Ok(Self {
            database_type: database_type.to_string(),
            image_tag,
            database_name,
            query_params,
        })
    }
}

/// Creates [`Iris`] images for the `iris` database type.
#[derive(Debug, Clone, Copy, Default)]
pub struct IrisProvider;

impl IrisProvider {
    pub fn supports(&self, database_type: &str) -> bool {
        database_type == NAME
    }

    /// An empty tag falls back to `latest`.
    pub fn new_instance(&self, tag: Option<&str>) -> Result<Iris> {
        match tag.map(str::trim).filter(|tag| !tag.is_empty()) {
            Some(tag) => Iris::from_image_name(ImageName::parse(DEFAULT_IMAGE)?.with_tag(tag)),
            None => Ok(Iris::default()),
        }
    }

    /// Builds an image from a `jdbc:tc:iris` url. `user` and `password` query
    /// parameters become credentials, `TC_*` parameters are dropped and the
    /// rest are passed through to the connection url.
    pub fn from_url(&self, url: &str) -> Result<Iris> {
        let parsed = ContainerUrl::parse(url)?;
        if !self.supports(&parsed.database_type) {
            return Err(IrisError::UnsupportedDatabaseType(parsed.database_type));
        }

        let mut iris = self.new_instance(parsed.image_tag.as_deref())?;
        if let Some(name) = parsed.database_name {
            iris = iris.with_database_name(name);
        }
        for (key, value) in parsed.query_params {
            match key.as_str() {
                "user" => iris = iris.with_username(value),
                "password" => iris = iris.with_password(value)?,
                k if k.starts_with("TC_") => {
                    tracing::debug!(param = k, "ignoring container url parameter");
                }
                _ => iris = iris.with_url_param(key, value),
            }
        }
        Ok(iris)
    }
}
