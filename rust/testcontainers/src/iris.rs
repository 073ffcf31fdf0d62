use std::borrow::Cow;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use testcontainers::core::{
    AccessMode, CmdWaitFor, ContainerPort, ContainerState, ExecCommand, Mount, WaitFor,
};
use testcontainers::{ContainerAsync, Image, TestcontainersError};

use crate::error::{IrisError, Result};
use crate::image_name::ImageName;
use crate::jdbc_url;

/// Database type name used in `jdbc:tc:iris://` urls.
pub const NAME: &str = "iris";

pub const DEFAULT_IMAGE: &str = "intersystemsdc/iris-community";
pub const DEFAULT_TAG: &str = "latest";

/// SuperServer port, used for SQL connections.
pub const IRIS_PORT: ContainerPort = ContainerPort::Tcp(1972);

/// Web server port (management portal and REST APIs).
pub const IRIS_WEB_PORT: ContainerPort = ContainerPort::Tcp(52773);

pub const DEFAULT_NAMESPACE: &str = "USER";
pub const DEFAULT_USERNAME: &str = "test";
pub const DEFAULT_PASSWORD: &str = "test";

/// Where the license key is mounted inside the container.
pub const LICENSE_KEY_PATH: &str = "/usr/irissys/mgr/iris.key";

pub const DRIVER_CLASS_NAME: &str = "com.intersystems.jdbc.IRISDriver";
pub const TEST_QUERY: &str = "SELECT 1";

pub const SUPPORTED_IMAGES: &[&str] = &[
    // InterSystems Developer Community images with ZPM
    "intersystemsdc/iris-community",
    "intersystemsdc/iris-ml-community",
    "intersystemsdc/irishealth-community",
    "intersystemsdc/irishealth-ml-community",
    // Vanilla Community Edition
    "containers.intersystems.com/intersystems/iris-community",
    "containers.intersystems.com/intersystemsdc/iris-ml-community",
    "containers.intersystems.com/intersystemsdc/irishealth-community",
    "containers.intersystems.com/intersystemsdc/irishealth-ml-community",
    // Vanilla Enterprise Edition
    "containers.intersystems.com/intersystems/iris",
    "containers.intersystems.com/intersystemsdc/iris-ml",
    "containers.intersystems.com/intersystemsdc/irishealth",
    "containers.intersystems.com/intersystemsdc/irishealth-ml",
];

const CMD: [&str; 2] = ["--ISCAgent", "false"];

/// Which flavour of IRIS image is running, decided once from the image name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFamily {
    /// `intersystemsdc/*` images from Docker Hub. They create the namespace
    /// and user themselves from the environment.
    Community,
    /// Community edition from the InterSystems registry.
    VanillaCommunity,
    /// Enterprise edition from the InterSystems registry, needs a license key.
    Enterprise,
}

impl ImageFamily {
    pub fn of(image: &ImageName) -> Self {
        if image.registry().is_none() && image.repository().starts_with("intersystemsdc/") {
            ImageFamily::Community
        } else if image.repository().contains("-community") {
            ImageFamily::VanillaCommunity
        } else {
            ImageFamily::Enterprise
        }
    }

    pub fn needs_provisioning(&self) -> bool {
        !matches!(self, ImageFamily::Community)
    }
}

/// Log line that marks the instance as ready. Every `intersystemsdc/*`
/// repository logs `executed command` once its startup script ran, whichever
/// registry it is pulled from.
pub fn ready_message(image: &ImageName) -> &'static str {
    if image.repository().starts_with("intersystemsdc") {
        "executed command"
    } else {
        "Enabling logons"
    }
}

#[derive(Debug, Clone)]
struct LicenseKey {
    path: PathBuf,
    mount: Mount,
}

#[derive(Debug, Clone)]
pub struct Iris {
    image: ImageName,
    name: String,
    family: ImageFamily,
    namespace: String,
    username: String,
    password: String,
    license_key: Option<LicenseKey>,
    url_params: BTreeMap<String, String>,
}

impl Default for Iris {
    fn default() -> Self {
        let image = ImageName::parse(DEFAULT_IMAGE)
            .map(|name| name.with_tag(DEFAULT_TAG))
            .expect("default image name is valid");
        Self::configured(image)
    }
}

impl Iris {
    /// Parses `image` and checks it against [`SUPPORTED_IMAGES`].
    pub fn new(image: &str) -> Result<Self> {
        Self::from_image_name(ImageName::parse(image)?)
    }

    pub fn from_image_name(image: ImageName) -> Result<Self> {
        if !image.is_compatible_with(SUPPORTED_IMAGES) {
            return Err(IrisError::IncompatibleImage {
                image: image.to_string(),
                expected: SUPPORTED_IMAGES.join(", "),
            });
        }
        if image.digest().is_some() {
            tracing::warn!(image = %image, "image digests are ignored, the tag is used to pull");
        }
        Ok(Self::configured(image))
    }

    fn configured(image: ImageName) -> Self {
        let family = ImageFamily::of(&image);
        tracing::debug!(image = %image, ?family, "configured IRIS image");
        Self {
            name: image.unversioned(),
            image,
            family,
            namespace: DEFAULT_NAMESPACE.to_string(),
            username: DEFAULT_USERNAME.to_string(),
            password: DEFAULT_PASSWORD.to_string(),
            license_key: None,
            url_params: BTreeMap::new(),
        }
    }

    pub fn with_database_name(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = username.into();
        self
    }

    pub fn with_password(self, password: impl Into<String>) -> Result<Self> {
        let password = password.into();
        self.with_password_opt(Some(password.as_str()))
    }

    /// Same as [`Iris::with_password`], rejecting `None` as well as `""`.
    pub fn with_password_opt(mut self, password: Option<&str>) -> Result<Self> {
        match password {
            Some(password) if !password.is_empty() => {
                self.password = password.to_string();
                Ok(self)
            }
            _ => Err(IrisError::EmptyPassword),
        }
    }

    /// The file is only looked up when the container is configured; a missing
    /// file is skipped. Relative paths are resolved against the current
    /// directory, Docker only accepts absolute bind sources.
    pub fn with_license_key(mut self, path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        let path = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
        let mount = Mount::bind_mount(path.to_string_lossy().into_owned(), LICENSE_KEY_PATH)
            .with_access_mode(AccessMode::ReadOnly);
        self.license_key = Some(LicenseKey { path, mount });
        self
    }

    pub fn with_url_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.url_params.insert(key.into(), value.into());
        self
    }

    pub fn database_name(&self) -> &str {
        &self.namespace
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn password(&self) -> &str {
        &self.password
    }

    pub fn license_key(&self) -> Option<&Path> {
        self.license_key.as_ref().map(|key| key.path.as_path())
    }

    pub fn family(&self) -> ImageFamily {
        self.family
    }

    pub fn image_name(&self) -> &ImageName {
        &self.image
    }

    pub fn url_params(&self) -> &BTreeMap<String, String> {
        &self.url_params
    }

    pub fn driver_class_name(&self) -> &'static str {
        DRIVER_CLASS_NAME
    }

    pub fn test_query(&self) -> &'static str {
        TEST_QUERY
    }

    pub fn ready_message(&self) -> &'static str {
        ready_message(&self.image)
    }

    pub fn connection_url(&self, host: &str, port: u16) -> String {
        jdbc_url::jdbc_url(host, port, &self.namespace, &self.url_params)
    }

    /// Commands run through `iris session` once the instance is up.
    pub fn provisioning_commands(&self) -> Vec<Vec<String>> {
        if !self.family.needs_provisioning() {
            return Vec::new();
        }
        let mut commands = Vec::with_capacity(2);
        if !self.namespace.eq_ignore_ascii_case(DEFAULT_NAMESPACE) {
            commands.push(session_command(format!(
                "##class(%SQL.Statement).%ExecDirect(,\"CREATE DATABASE {}\")",
                self.namespace
            )));
        }
        commands.push(session_command(format!(
            "##class(Security.Users).Create(\"{}\",\"{}\",\"{}\",,\"{}\")",
            self.username, "%All", self.password, self.namespace
        )));
        commands
    }

    /// [`Iris::provisioning_commands`] as run after start. Each one has to
    /// exit with 0, otherwise starting the container fails.
    pub fn provisioning_exec_commands(&self) -> Vec<ExecCommand> {
        self.provisioning_commands()
            .into_iter()
            .map(|cmd| ExecCommand::new(cmd).with_cmd_ready_condition(CmdWaitFor::exit_code(0)))
            .collect()
    }
}

fn session_command(code: String) -> Vec<String> {
    ["iris", "session", "iris", "-U", "%SYS"]
        .into_iter()
        .map(String::from)
        .chain(std::iter::once(code))
        .collect()
}

impl Image for Iris {
    fn name(&self) -> &str {
        &self.name
    }

    fn tag(&self) -> &str {
        self.image.tag().unwrap_or(DEFAULT_TAG)
    }

    fn ready_conditions(&self) -> Vec<WaitFor> {
        vec![WaitFor::message_on_stdout(self.ready_message())]
    }

    fn env_vars(
        &self,
    ) -> impl IntoIterator<Item = (impl Into<Cow<'_, str>>, impl Into<Cow<'_, str>>)> {
        [
            ("IRIS_NAMESPACE", self.namespace.as_str()),
            ("IRIS_USERNAME", self.username.as_str()),
            ("IRIS_PASSWORD", self.password.as_str()),
        ]
    }

    fn mounts(&self) -> impl IntoIterator<Item = &Mount> {
        self.license_key
            .iter()
            .filter(|key| {
                let exists = key.path.exists();
                if !exists {
                    tracing::warn!(path = %key.path.display(), "license key not found, skipping mount");
                }
                exists
            })
            .map(|key| &key.mount)
    }

    fn cmd(&self) -> impl IntoIterator<Item = impl Into<Cow<'_, str>>> {
        CMD
    }

    fn expose_ports(&self) -> &[ContainerPort] {
        &[IRIS_PORT, IRIS_WEB_PORT]
    }

    fn exec_after_start(
        &self,
        _cs: ContainerState,
    ) -> std::result::Result<Vec<ExecCommand>, TestcontainersError> {
        let commands = self.provisioning_exec_commands();
        if !commands.is_empty() {
            tracing::info!(
                namespace = %self.namespace,
                username = %self.username,
                count = commands.len(),
                "provisioning IRIS namespace and user"
            );
        }
        Ok(commands)
    }
}

/// Everything a client needs to reach a running IRIS container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionDetails {
    pub jdbc_url: String,
    pub web_url: String,
    pub username: String,
    pub password: String,
}

/// Runtime lookups on a started IRIS container. Host and ports are read on
/// every call since they may change across restarts.
#[allow(async_fn_in_trait)]
pub trait IrisContainerExt {
    async fn jdbc_url(&self) -> std::result::Result<String, TestcontainersError>;

    async fn web_url(&self) -> std::result::Result<String, TestcontainersError>;

    async fn connection_details(&self) -> std::result::Result<ConnectionDetails, TestcontainersError>;
}

impl IrisContainerExt for ContainerAsync<Iris> {
    async fn jdbc_url(&self) -> std::result::Result<String, TestcontainersError> {
        let host = self.get_host().await?.to_string();
        let port = self.get_host_port_ipv4(IRIS_PORT).await?;
        Ok(self.image().connection_url(&host, port))
    }

    async fn web_url(&self) -> std::result::Result<String, TestcontainersError> {
        let host = self.get_host().await?;
        let port = self.get_host_port_ipv4(IRIS_WEB_PORT).await?;
        Ok(format!("http://{}:{}", host, port))
    }

    async fn connection_details(&self) -> std::result::Result<ConnectionDetails, TestcontainersError> {
        let image = self.image();
        Ok(ConnectionDetails {
            jdbc_url: self.jdbc_url().await?,
            web_url: self.web_url().await?,
            username: image.username().to_string(),
            password: image.password().to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VANILLA: &str = "containers.intersystems.com/intersystems/iris-community:latest-em";
    const ENTERPRISE: &str = "containers.intersystems.com/intersystems/iris:latest-em";

    #[test]
    fn accepts_every_supported_image() {
        for image in SUPPORTED_IMAGES {
            let iris = Iris::new(&format!("{}:latest", image)).unwrap();
            assert_eq!(iris.name(), *image);
            assert_eq!(iris.tag(), "latest");
        }
    }

    #[test]
    fn rejects_unknown_repositories() {
        for image in ["postgres:16", "intersystems/iris-community", "intersystemsdc/iris"] {
            let err = Iris::new(image).unwrap_err();
            assert!(matches!(err, IrisError::IncompatibleImage { .. }), "{image}: {err}");
        }
    }

    #[test]
    fn default_image() {
        let iris = Iris::default();
        assert_eq!(iris.name(), DEFAULT_IMAGE);
        assert_eq!(iris.tag(), DEFAULT_TAG);
        assert_eq!(iris.family(), ImageFamily::Community);
        assert_eq!(iris.database_name(), "USER");
        assert_eq!(iris.username(), "test");
        assert_eq!(iris.password(), "test");
    }

    #[test]
    fn missing_tag_falls_back_to_latest() {
        let iris = Iris::new("intersystemsdc/irishealth-community").unwrap();
        assert_eq!(iris.tag(), "latest");
    }

    #[test]
    fn families_pick_their_ready_message() {
        let community = Iris::new("intersystemsdc/iris-community:latest-em-zpm").unwrap();
        assert_eq!(community.family(), ImageFamily::Community);
        assert_eq!(community.ready_message(), "executed command");

        let vanilla = Iris::new(VANILLA).unwrap();
        assert_eq!(vanilla.family(), ImageFamily::VanillaCommunity);
        assert_eq!(vanilla.ready_message(), "Enabling logons");

        let enterprise = Iris::new(ENTERPRISE).unwrap();
        assert_eq!(enterprise.family(), ImageFamily::Enterprise);
        assert_eq!(enterprise.ready_message(), "Enabling logons");
        assert_eq!(enterprise.ready_conditions().len(), 1);
    }

    #[test]
    fn registry_intersystemsdc_images_wait_for_startup_script() {
        let ml = Iris::new("containers.intersystems.com/intersystemsdc/iris-ml-community:latest")
            .unwrap()
            .with_database_name("TEST");
        assert_eq!(ml.family(), ImageFamily::VanillaCommunity);
        assert_eq!(ml.ready_message(), "executed command");
        assert_eq!(ml.provisioning_commands().len(), 2);

        let health = Iris::new("containers.intersystems.com/intersystemsdc/irishealth:latest").unwrap();
        assert_eq!(health.family(), ImageFamily::Enterprise);
        assert_eq!(health.ready_message(), "executed command");
        assert_eq!(health.provisioning_commands().len(), 1);
    }

    #[test]
    fn exposes_sql_and_web_ports() {
        assert_eq!(Iris::default().expose_ports(), &[IRIS_PORT, IRIS_WEB_PORT]);
    }

    #[test]
    fn starts_without_isc_agent() {
        let cmd: Vec<String> = Iris::default()
            .cmd()
            .into_iter()
            .map(|part| Into::<Cow<'_, str>>::into(part).into_owned())
            .collect();
        assert_eq!(cmd, vec!["--ISCAgent", "false"]);
    }

    #[test]
    fn empty_password_is_rejected() {
        assert_eq!(Iris::default().with_password("").unwrap_err(), IrisError::EmptyPassword);
        assert_eq!(Iris::default().with_password_opt(None).unwrap_err(), IrisError::EmptyPassword);
        assert_eq!(Iris::default().with_password("x").unwrap().password(), "x");
    }

    #[test]
    fn env_vars_carry_credentials() {
        let iris = Iris::default()
            .with_database_name("TEST")
            .with_username("admin")
            .with_password("secret")
            .unwrap();
        let env: Vec<(String, String)> = iris
            .env_vars()
            .into_iter()
            .map(|(k, v)| {
                (
                    Into::<Cow<'_, str>>::into(k).into_owned(),
                    Into::<Cow<'_, str>>::into(v).into_owned(),
                )
            })
            .collect();
        assert_eq!(
            env,
            vec![
                ("IRIS_NAMESPACE".to_string(), "TEST".to_string()),
                ("IRIS_USERNAME".to_string(), "admin".to_string()),
                ("IRIS_PASSWORD".to_string(), "secret".to_string()),
            ]
        );
    }

    #[test]
    fn license_key_is_mounted_only_when_present() {
        let missing = Iris::default().with_license_key("/definitely/not/here/iris.key");
        assert_eq!(missing.license_key(), Some(Path::new("/definitely/not/here/iris.key")));
        assert_eq!(missing.mounts().into_iter().count(), 0);

        let file = tempfile::NamedTempFile::new().unwrap();
        let present = Iris::default().with_license_key(file.path());
        let mounts: Vec<&Mount> = present.mounts().into_iter().collect();
        assert_eq!(mounts.len(), 1);
        assert_eq!(mounts[0].target(), Some(LICENSE_KEY_PATH));
        assert!(matches!(mounts[0].access_mode(), AccessMode::ReadOnly));
    }

    #[test]
    fn relative_license_key_is_made_absolute() {
        let cwd = std::env::current_dir().unwrap();
        let iris = Iris::default().with_license_key("iris.key");
        assert_eq!(iris.license_key(), Some(cwd.join("iris.key").as_path()));

        let file = tempfile::Builder::new()
            .suffix(".key")
            .tempfile_in(&cwd)
            .unwrap();
        let relative = file.path().file_name().unwrap();
        let iris = Iris::default().with_license_key(relative);
        let mounts: Vec<&Mount> = iris.mounts().into_iter().collect();
        assert_eq!(mounts.len(), 1);
        let source = mounts[0].source().unwrap();
        assert!(Path::new(source).is_absolute(), "{source}");
        assert_eq!(Path::new(source), cwd.join(relative));
    }

    #[test]
    fn connection_url_uses_namespace_and_params() {
        assert_eq!(
            Iris::default().connection_url("localhost", 51972),
            "jdbc:IRIS://localhost:51972/USER"
        );
        let iris = Iris::default()
            .with_database_name("TEST")
            .with_url_param("sslEnabled", "false");
        assert_eq!(iris.database_name(), "TEST");
        assert_eq!(
            iris.connection_url("localhost", 51972),
            "jdbc:IRIS://localhost:51972/TEST?sslEnabled=false"
        );
    }

    #[test]
    fn community_needs_no_provisioning() {
        let iris = Iris::default().with_database_name("TEST");
        assert!(iris.provisioning_commands().is_empty());
    }

    #[test]
    fn vanilla_creates_namespace_then_user() {
        let iris = Iris::new(VANILLA)
            .unwrap()
            .with_database_name("TEST")
            .with_username("test")
            .with_password("pw")
            .unwrap();
        let commands = iris.provisioning_commands();
        assert_eq!(commands.len(), 2);
        assert_eq!(
            commands[0],
            vec![
                "iris",
                "session",
                "iris",
                "-U",
                "%SYS",
                "##class(%SQL.Statement).%ExecDirect(,\"CREATE DATABASE TEST\")",
            ]
        );
        assert_eq!(
            commands[1][5],
            "##class(Security.Users).Create(\"test\",\"%All\",\"pw\",,\"TEST\")"
        );
    }

    #[test]
    fn provisioning_waits_for_successful_exit() {
        let iris = Iris::new(VANILLA).unwrap().with_database_name("TEST");
        let commands = iris.provisioning_exec_commands();
        assert_eq!(commands.len(), 2);
        let first = format!("{:?}", commands[0]);
        assert!(first.contains("CREATE DATABASE TEST"), "{first}");
        assert!(first.contains("ExitCode { code: 0 }"), "{first}");
        let second = format!("{:?}", commands[1]);
        assert!(second.contains("Security.Users"), "{second}");
        assert!(second.contains("ExitCode { code: 0 }"), "{second}");

        assert!(Iris::default().provisioning_exec_commands().is_empty());
    }

    #[test]
    fn user_namespace_is_not_created() {
        for namespace in ["USER", "user", "User"] {
            let iris = Iris::new(ENTERPRISE).unwrap().with_database_name(namespace);
            let commands = iris.provisioning_commands();
            assert_eq!(commands.len(), 1, "{namespace}");
            assert!(commands[0][5].starts_with("##class(Security.Users).Create("));
        }
    }
}
