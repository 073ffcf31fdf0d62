//! InterSystems IRIS image for `testcontainers`.
//!
//! ```no_run
//! use iris_testcontainers::{Iris, IrisContainerExt};
//! use testcontainers::runners::AsyncRunner;
//!
//! # async fn run() -> anyhow::Result<()> {
//! let container = Iris::new("intersystemsdc/iris-community:latest-em-zpm")?
//!     .with_database_name("TEST")
//!     .with_password("secret")?
//!     .start()
//!     .await?;
//! println!("{}", container.jdbc_url().await?);
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod image_name;
pub mod iris;
pub mod jdbc_url;
pub mod provider;

pub use error::{IrisError, Result};
pub use image_name::ImageName;
pub use iris::{
    ConnectionDetails, ImageFamily, Iris, IrisContainerExt, IRIS_PORT, IRIS_WEB_PORT,
    SUPPORTED_IMAGES,
};
pub use provider::{ContainerUrl, IrisProvider};
