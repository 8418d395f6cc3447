use layer_core::{Artifact, LayerError, SizeMethod};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Name of the project-level config file.
pub const PROJECT_FILE: &str = "layer.toml";

// ============================================================================
// Config (layer.toml or ~/.config/layer/config.toml)
// ============================================================================

/// Configuration for the build, size check and publish stages
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub artifact: ArtifactConfig,

    #[serde(default)]
    pub size: SizeConfig,

    #[serde(default)]
    pub build: BuildConfig,

    #[serde(default)]
    pub publish: PublishConfig,

    #[serde(default)]
    pub timeouts: TimeoutConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactConfig {
    /// Local directory the artifact is written to
    #[serde(default = "default_artifact_dir")]
    pub dir: PathBuf,

    /// File name of the artifact; the extension selects the archive format
    #[serde(default = "default_artifact_name")]
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SizeConfig {
    /// Decompressed size must be strictly below this many bytes
    #[serde(default = "default_ceiling")]
    pub ceiling_bytes: u64,

    #[serde(default)]
    pub method: SizeMethod,

    /// Parent for scratch extraction directories (system temp dir if unset)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scratch_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildConfig {
    /// Toolchain image the dependencies are installed in
    #[serde(default = "default_image")]
    pub image: String,

    /// Build context copied into the image
    #[serde(default = "default_working_dir")]
    pub working_dir: PathBuf,

    /// Dependency specifiers passed to the install command
    #[serde(default)]
    pub dependencies: Vec<String>,

    /// Runs at image build time with `$LAYER_DEPENDENCIES` set
    #[serde(default = "default_install_command")]
    pub install_command: String,

    /// Runs in the container and must write `/out/$LAYER_ARTIFACT`
    #[serde(default = "default_package_command")]
    pub package_command: String,

    /// Docker CLI binary
    #[serde(default = "default_docker")]
    pub docker: String,

    /// Remove the disposable image after the build
    #[serde(default = "default_true")]
    pub remove_image: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    #[default]
    S3,
    /// Local directory, one sub-directory per bucket
    File,
    /// Process memory, for tests and dry runs
    Memory,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PublishConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bucket: Option<String>,

    /// Key prefix; empty publishes at the bucket root
    #[serde(default)]
    pub prefix: String,

    #[serde(default)]
    pub backend: StorageBackend,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,

    /// Custom endpoint for S3-compatible stores
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,

    /// Root directory for the `file` backend
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root: Option<PathBuf>,

    /// Explicit credentials; ambient credentials apply when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_key_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_access_key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutConfig {
    #[serde(default = "default_build_secs")]
    pub build_secs: u64,

    #[serde(default = "default_size_check_secs")]
    pub size_check_secs: u64,

    #[serde(default = "default_upload_secs")]
    pub upload_secs: u64,
}

impl Default for ArtifactConfig {
    fn default() -> Self {
        Self {
            dir: default_artifact_dir(),
            name: default_artifact_name(),
        }
    }
}

impl Default for SizeConfig {
    fn default() -> Self {
        Self {
            ceiling_bytes: default_ceiling(),
            method: SizeMethod::default(),
            scratch_dir: None,
        }
    }
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            image: default_image(),
            working_dir: default_working_dir(),
            dependencies: Vec::new(),
            install_command: default_install_command(),
            package_command: default_package_command(),
            docker: default_docker(),
            remove_image: true,
        }
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            build_secs: default_build_secs(),
            size_check_secs: default_size_check_secs(),
            upload_secs: default_upload_secs(),
        }
    }
}

fn default_artifact_dir() -> PathBuf {
    PathBuf::from("dist")
}

fn default_artifact_name() -> String {
    "layer.zip".to_string()
}

/// 250 MiB, the runtime's limit for unzipped layers.
fn default_ceiling() -> u64 {
    262_144_000
}

fn default_image() -> String {
    "public.ecr.aws/sam/build-python3.12".to_string()
}

fn default_working_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_install_command() -> String {
    "pip install --no-cache-dir -t /opt/layer/python $LAYER_DEPENDENCIES".to_string()
}

fn default_package_command() -> String {
    "cd /opt/layer && zip -qr /out/$LAYER_ARTIFACT .".to_string()
}

fn default_docker() -> String {
    "docker".to_string()
}

fn default_true() -> bool {
    true
}

fn default_build_secs() -> u64 {
    1800
}

fn default_size_check_secs() -> u64 {
    300
}

fn default_upload_secs() -> u64 {
    600
}

impl TimeoutConfig {
    pub fn build(&self) -> Duration {
        Duration::from_secs(self.build_secs)
    }

    pub fn size_check(&self) -> Duration {
        Duration::from_secs(self.size_check_secs)
    }

    pub fn upload(&self) -> Duration {
        Duration::from_secs(self.upload_secs)
    }
}

impl Config {
    /// Load config from `explicit`, else the nearest `layer.toml`, else the
    /// global config file, else defaults. Returns the file it came from.
    pub fn load(explicit: Option<&Path>) -> anyhow::Result<(Self, Option<PathBuf>)> {
        let candidate = match explicit {
            Some(path) => {
                if !path.exists() {
                    anyhow::bail!("config file not found: {}", path.display());
                }
                Some(path.to_path_buf())
            }
            None => {
                let current = std::env::current_dir()?;
                Self::find_project_file_from(&current).or_else(|| {
                    let global = Self::config_path();
                    global.exists().then_some(global)
                })
            }
        };

        match candidate {
            Some(path) => {
                let config = Self::load_file(&path)?;
                Ok((config, Some(path)))
            }
            None => Ok((Config::default(), None)),
        }
    }

    /// Parse a config file; relative paths resolve against its directory.
    pub fn load_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&content)
            .map_err(|e| anyhow::anyhow!("invalid config {}: {}", path.display(), e))?;
        if let Some(base) = path.parent() {
            config.resolve_relative_to(base);
        }
        Ok(config)
    }

    /// Write the config as pretty TOML
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get global config file path
    pub fn config_path() -> PathBuf {
        if let Some(dirs) = directories::ProjectDirs::from("com", "layer", "layer") {
            dirs.config_dir().join("config.toml")
        } else {
            PathBuf::from("~/.layer/config.toml")
        }
    }

    /// Find layer.toml by walking up from given directory
    pub fn find_project_file_from(start: &Path) -> Option<PathBuf> {
        let mut current = start.to_path_buf();

        loop {
            let candidate = current.join(PROJECT_FILE);
            if candidate.is_file() {
                return Some(candidate);
            }

            if !current.pop() {
                return None;
            }
        }
    }

    fn resolve_relative_to(&mut self, base: &Path) {
        let resolve = |p: &mut PathBuf| {
            if p.is_relative() && !base.as_os_str().is_empty() {
                *p = base.join(&*p);
            }
        };

        resolve(&mut self.artifact.dir);
        resolve(&mut self.build.working_dir);
        if let Some(scratch) = self.size.scratch_dir.as_mut() {
            resolve(scratch);
        }
        if let Some(root) = self.publish.root.as_mut() {
            resolve(root);
        }
    }

    /// The artifact this configuration describes
    pub fn artifact(&self) -> Artifact {
        Artifact::at(&self.artifact.dir, &self.artifact.name)
    }

    /// Reject values no stage can work with
    pub fn validate(&self) -> layer_core::Result<()> {
        if self.size.ceiling_bytes == 0 {
            return Err(LayerError::Config(
                "size.ceiling_bytes must be greater than zero".to_string(),
            ));
        }

        let name = self.artifact.name.trim();
        if name.is_empty() || name.contains('/') || name.contains('\\') {
            return Err(LayerError::Config(format!(
                "artifact.name must be a plain file name, got '{}'",
                self.artifact.name
            )));
        }

        let timeouts = [
            ("timeouts.build_secs", self.timeouts.build_secs),
            ("timeouts.size_check_secs", self.timeouts.size_check_secs),
            ("timeouts.upload_secs", self.timeouts.upload_secs),
        ];
        if let Some((key, _)) = timeouts.iter().find(|(_, secs)| *secs == 0) {
            return Err(LayerError::Config(format!("{} must be greater than zero", key)));
        }

        if self.publish.backend == StorageBackend::File && self.publish.root.is_none() {
            return Err(LayerError::Config(
                "publish.root is required for the file backend".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.size.ceiling_bytes, 250 * layer_core::MIB);
        assert_eq!(config.size.method, SizeMethod::Extract);
        assert_eq!(config.artifact.name, "layer.zip");
        assert_eq!(config.publish.backend, StorageBackend::S3);
        assert!(config.publish.bucket.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_serialization() {
        let config = Config::default();
        let toml_str = toml::to_string(&config).unwrap();
        let parsed: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.size.ceiling_bytes, config.size.ceiling_bytes);
        assert_eq!(parsed.build.image, config.build.image);
    }

    #[test]
    fn test_partial_config_parse() {
        let toml_str = r#"
[artifact]
name = "deps.tar.gz"

[size]
ceiling_bytes = 1048576
method = "declared"

[build]
dependencies = ["requests==2.32.3", "boto3"]

[publish]
bucket = "my-bucket"
prefix = "layers"
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.artifact.name, "deps.tar.gz");
        assert_eq!(config.artifact.dir, PathBuf::from("dist"));
        assert_eq!(config.size.ceiling_bytes, 1_048_576);
        assert_eq!(config.size.method, SizeMethod::Declared);
        assert_eq!(config.build.dependencies.len(), 2);
        assert_eq!(config.publish.bucket.as_deref(), Some("my-bucket"));
        assert_eq!(config.timeouts.upload_secs, 600);
    }

    #[test]
    fn test_validate_rejects_zero_values() {
        let mut config = Config::default();
        config.size.ceiling_bytes = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.timeouts.upload_secs = 0;
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("timeouts.upload_secs"));

        let mut config = Config::default();
        config.artifact.name = "nested/layer.zip".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_file_backend_requires_root() {
        let mut config = Config::default();
        config.publish.backend = StorageBackend::File;
        assert!(config.validate().is_err());
        config.publish.root = Some(PathBuf::from("/tmp/store"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_find_project_file_walks_up() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a/b/c");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(dir.path().join(PROJECT_FILE), "").unwrap();

        let found = Config::find_project_file_from(&nested).unwrap();
        assert_eq!(found, dir.path().join(PROJECT_FILE));
    }

    #[test]
    fn test_load_file_resolves_relative_paths() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(PROJECT_FILE);
        std::fs::write(&path, "[artifact]\ndir = \"out\"\n").unwrap();

        let config = Config::load_file(&path).unwrap();
        assert_eq!(config.artifact.dir, dir.path().join("out"));
        assert_eq!(config.build.working_dir, dir.path().join("."));
        assert_eq!(config.artifact().path, dir.path().join("out/layer.zip"));
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(PROJECT_FILE);
        let mut config = Config::default();
        config.publish.bucket = Some("my-bucket".to_string());
        config.save(&path).unwrap();

        let loaded = Config::load_file(&path).unwrap();
        assert_eq!(loaded.publish.bucket.as_deref(), Some("my-bucket"));
    }
}
