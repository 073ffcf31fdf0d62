use anyhow::Result;
use async_trait::async_trait;
use iris_testcontainers::{ConnectionDetails, Iris, IrisContainerExt};
use std::sync::Arc;
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, ImageExt};
use tokio::sync::Mutex;
use tokio::time::Duration;

use crate::client::{IrisClient, Row};

/// Lifecycle of a test database plus the client connected to it.
#[async_trait]
pub trait DatabaseAdapter: Send + Sync {
    /// Start a container and connect to it.
    async fn setup(&self) -> Result<ConnectionDetails>;

    /// Stop the container started by `setup`, if any.
    async fn teardown(&self) -> Result<()>;

    /// Connect to an already running instance.
    async fn connect(&self, details: &ConnectionDetails) -> Result<()>;

    async fn query(&self, sql: &str) -> Result<Vec<Row>>;

    async fn ping(&self) -> Result<Duration>;
}

pub struct IrisAdapter {
    image: Iris,
    startup_timeout: Duration,
    client: Arc<Mutex<Option<IrisClient>>>,
    container: Arc<Mutex<Option<ContainerAsync<Iris>>>>,
}

impl IrisAdapter {
    pub fn new(image: Iris) -> Self {
        Self {
            image,
            startup_timeout: Duration::from_secs(120),
            client: Arc::new(Mutex::new(None)),
            container: Arc::new(Mutex::new(None)),
        }
    }

    pub fn with_startup_timeout(mut self, timeout: Duration) -> Self {
        self.startup_timeout = timeout;
        self
    }

    async fn get_client(&self) -> Result<IrisClient> {
        let guard = self.client.lock().await;
        guard
            .clone()
            .ok_or_else(|| anyhow::anyhow!("IRIS client not connected"))
    }
}

impl Default for IrisAdapter {
    fn default() -> Self {
        Self::new(Iris::default())
    }
}

#[async_trait]
impl DatabaseAdapter for IrisAdapter {
    async fn setup(&self) -> Result<ConnectionDetails> {
        let container = self
            .image
            .clone()
            .with_startup_timeout(self.startup_timeout)
            .start()
            .await?;
        let details = container.connection_details().await?;
        tracing::info!(jdbc_url = %details.jdbc_url, "IRIS container started");

        let mut container_guard = self.container.lock().await;
        *container_guard = Some(container);
        drop(container_guard);

        self.connect(&details).await?;

        // The log line shows up before the web server accepts requests.
        for _ in 0..60 {
            if self.ping().await.is_ok() {
                return Ok(details);
            }
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
        anyhow::bail!("IRIS container did not accept queries within 60s")
    }

    async fn teardown(&self) -> Result<()> {
        {
            let mut guard = self.client.lock().await;
            *guard = None;
        }
        let container = {
            let mut guard = self.container.lock().await;
            guard.take()
        };
        match container {
            Some(container) => {
                let id = container.id().to_string();
                container.stop().await?;
                container.rm().await?;
                tracing::info!(%id, "IRIS container removed");
            }
            None => tracing::debug!("no IRIS container to stop"),
        }
        Ok(())
    }

    async fn connect(&self, details: &ConnectionDetails) -> Result<()> {
        let client = IrisClient::connect(details)?;
        let mut guard = self.client.lock().await;
        *guard = Some(client);
        Ok(())
    }

    async fn query(&self, sql: &str) -> Result<Vec<Row>> {
        self.get_client().await?.query(sql).await
    }

    async fn ping(&self) -> Result<Duration> {
        self.get_client().await?.ping().await
    }
}
