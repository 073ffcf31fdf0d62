mod config;

use anyhow::Result;
use clap::{Parser, Subcommand};
use config::ContainerConfig;
use iris_adapter::IrisClient;
use iris_testcontainers::{ConnectionDetails, ImageFamily, ImageName, IrisContainerExt, IrisProvider, SUPPORTED_IMAGES};
use serde_json::json;
use std::path::PathBuf;
use std::time::Duration;
use testcontainers::runners::AsyncRunner;
use testcontainers::ImageExt;
use tokio::runtime::Runtime;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "iris-tc", version, about = "Throwaway InterSystems IRIS containers for testing")]
struct Cli {
    #[arg(long, default_value = "info")]
    log: String,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start a container, print its connection details and wait for Ctrl-C
    Start {
        /// YAML file with container settings; flags take precedence
        #[arg(long)]
        config: Option<PathBuf>,
        /// Container url, e.g. jdbc:tc:iris:latest-em-zpm://localhost/TEST
        #[arg(long, conflicts_with = "config")]
        url: Option<String>,
        #[arg(long)]
        image: Option<String>,
        #[arg(long)]
        namespace: Option<String>,
        #[arg(long)]
        username: Option<String>,
        #[arg(long)]
        password: Option<String>,
        /// Host path of an iris.key license file
        #[arg(long)]
        license_key: Option<PathBuf>,
        #[arg(long)]
        startup_timeout: Option<u64>,
        /// Extra connection url parameters (repeatable key=value)
        #[arg(long, num_args=0.., value_parser = parse_url_param)]
        url_param: Vec<(String, String)>,
        /// Print connection details as JSON
        #[arg(long)]
        json: bool,
    },
    /// Run a SQL statement against a running instance
    Query {
        #[arg(long)]
        jdbc_url: String,
        /// Base url of the web server, e.g. http://localhost:52773
        #[arg(long)]
        web_url: String,
        #[arg(long, default_value = "test")]
        username: String,
        #[arg(long, default_value = "test")]
        password: String,
        sql: String,
    },
    /// List the supported images
    ListImages,
}

/// `key=value` for repeatable `--url-param` flags; the value may contain `=`.
fn parse_url_param(s: &str) -> std::result::Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, _)) if key.trim().is_empty() => Err(format!("missing key in `{}`", s)),
        Some((key, value)) => Ok((key.trim().to_string(), value.to_string())),
        None => Err(format!("expected KEY=VALUE, got `{}`", s)),
    }
}

fn family_label(family: ImageFamily) -> &'static str {
    match family {
        ImageFamily::Community => "community",
        ImageFamily::VanillaCommunity => "vanilla-community",
        ImageFamily::Enterprise => "enterprise",
    }
}

fn print_details(details: &ConnectionDetails, as_json: bool) -> Result<()> {
    if as_json {
        let out = json!({
            "jdbc_url": details.jdbc_url,
            "web_url": details.web_url,
            "username": details.username,
            "password": details.password,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        println!("JDBC url: {}", details.jdbc_url);
        println!("Web url:  {}", details.web_url);
        println!("Username: {}", details.username);
        println!("Password: {}", details.password);
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&cli.log))
        .init();

    match cli.command {
        Commands::ListImages => {
            for image in SUPPORTED_IMAGES {
                let name = ImageName::parse(image)?;
                println!("{:<70} {}", image, family_label(ImageFamily::of(&name)));
            }
            Ok(())
        }
        Commands::Query { jdbc_url, web_url, username, password, sql } => {
            let details = ConnectionDetails { jdbc_url, web_url, username, password };
            let client = IrisClient::connect(&details)?;
            let rt = Runtime::new()?;
            let rows = rt.block_on(client.query(&sql))?;
            for row in rows {
                println!("{}", serde_json::to_string(&row)?);
            }
            Ok(())
        }
        Commands::Start {
            config,
            url,
            image,
            namespace,
            username,
            password,
            license_key,
            startup_timeout,
            url_param,
            json,
        } => {
            let mut settings = match config {
                Some(path) => ContainerConfig::load(&path)?,
                None => ContainerConfig::default(),
            };
            if let Some(url) = url {
                let iris = IrisProvider.from_url(&url)?;
                settings.image = iris.image_name().to_string();
                settings.namespace = iris.database_name().to_string();
                settings.username = iris.username().to_string();
                settings.password = iris.password().to_string();
                settings.url_params.extend(iris.url_params().clone());
            }
            if let Some(v) = image {
                settings.image = v;
            }
            if let Some(v) = namespace {
                settings.namespace = v;
            }
            if let Some(v) = username {
                settings.username = v;
            }
            if let Some(v) = password {
                settings.password = v;
            }
            if let Some(v) = license_key {
                settings.license_key = Some(v);
            }
            if let Some(v) = startup_timeout {
                settings.startup_timeout_seconds = v;
            }
            settings.url_params.extend(url_param);

            let iris = settings.to_image()?;
            let timeout = Duration::from_secs(settings.startup_timeout_seconds);

            let rt = Runtime::new()?;
            rt.block_on(async move {
                println!("Starting {}...", settings.image);
                let started = std::time::Instant::now();
                let container = iris.with_startup_timeout(timeout).start().await?;
                tracing::info!(
                    elapsed_s = started.elapsed().as_secs_f64(),
                    id = container.id(),
                    "container is ready"
                );

                let details = container.connection_details().await?;
                print_details(&details, json)?;

                println!("Press Ctrl-C to stop the container");
                tokio::signal::ctrl_c().await?;
                container.stop().await?;
                Ok::<(), anyhow::Error>(())
            })
        }
    }
}
