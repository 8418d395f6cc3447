//! Docker-backed build environment
//!
//! One build uses a disposable image (dependencies installed at image
//! build time) and a disposable container that runs the packaging command
//! and leaves the archive under `/out`.

use async_trait::async_trait;
use layer_core::{LayerError, Result};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Output;
use tokio::process::Command;
use tracing::{debug, info};

use crate::environment::{BuildEnvironment, BuildSpec, EnvironmentHandle};

/// Directory inside the container the archive is written to.
pub const OUTPUT_DIR: &str = "/out";

/// Lines of stderr kept in error messages.
const STDERR_TAIL: usize = 20;

pub struct DockerEnvironment {
    binary: String,
    remove_image: bool,
}

impl DockerEnvironment {
    pub fn new(binary: impl Into<String>, remove_image: bool) -> Self {
        Self {
            binary: binary.into(),
            remove_image,
        }
    }

    /// Resolve the docker CLI on PATH
    pub fn locate(&self) -> Result<PathBuf> {
        which::which(&self.binary).map_err(|e| {
            LayerError::BuildFailure(format!("docker CLI '{}' not found: {}", self.binary, e))
        })
    }

    async fn docker(&self, args: Vec<OsString>) -> Result<Output> {
        debug!("{} {:?}", self.binary, args);
        Command::new(&self.binary)
            .args(&args)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| LayerError::BuildFailure(format!("Failed to run {}: {}", self.binary, e)))
    }

    fn docker_blocking(&self, args: &[&str]) -> Result<Output> {
        std::process::Command::new(&self.binary)
            .args(args)
            .output()
            .map_err(|e| LayerError::BuildFailure(format!("Failed to run {}: {}", self.binary, e)))
    }

    fn teardown_commands(&self, handle: &EnvironmentHandle) -> Vec<Vec<String>> {
        let mut commands = vec![vec![
            "rm".to_string(),
            "-f".to_string(),
            handle.container.clone(),
        ]];
        if self.remove_image {
            commands.push(vec![
                "rmi".to_string(),
                "-f".to_string(),
                handle.image.clone(),
            ]);
        }
        commands
    }
}

/// Dockerfile for the disposable image.
pub fn render_dockerfile(spec: &BuildSpec) -> String {
    // serde_json string escaping is valid for Dockerfile exec-form JSON
    let package = serde_json::to_string(&spec.package_command)
        .unwrap_or_else(|_| "\"true\"".to_string());

    format!(
        "FROM {image}\n\
         WORKDIR /build\n\
         COPY . /build\n\
         ARG LAYER_DEPENDENCIES\n\
         RUN {install}\n\
         RUN mkdir -p {out}\n\
         CMD [\"/bin/sh\", \"-c\", {package}]\n",
        image = spec.image,
        install = spec.install_command,
        out = OUTPUT_DIR,
        package = package,
    )
}

fn check(step: &str, output: &Output) -> Result<()> {
    if output.status.success() {
        return Ok(());
    }
    Err(LayerError::BuildFailure(format!(
        "{} exited with {}: {}",
        step,
        output.status,
        stderr_tail(&output.stderr)
    )))
}

fn stderr_tail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let lines: Vec<&str> = text.lines().collect();
    let start = lines.len().saturating_sub(STDERR_TAIL);
    lines[start..].join("\n")
}

/// Removal of something that was never created is not a failure.
fn is_missing_resource(stderr: &[u8]) -> bool {
    let text = String::from_utf8_lossy(stderr).to_lowercase();
    text.contains("no such container") || text.contains("no such image")
}

fn check_teardown(step: &str, output: &Output) -> Result<()> {
    if output.status.success() || is_missing_resource(&output.stderr) {
        Ok(())
    } else {
        check(step, output)
    }
}

#[async_trait]
impl BuildEnvironment for DockerEnvironment {
    fn name(&self) -> &'static str {
        "docker"
    }

    async fn provision(&self, handle: &EnvironmentHandle, spec: &BuildSpec) -> Result<()> {
        self.locate()?;

        let staging = tempfile::tempdir()
            .map_err(|e| LayerError::io("creating Dockerfile staging directory", e))?;
        let dockerfile = staging.path().join("Dockerfile");
        tokio::fs::write(&dockerfile, render_dockerfile(spec))
            .await
            .map_err(|e| LayerError::io("writing Dockerfile", e))?;

        info!(
            "Building image {} from {} ({} dependencies)",
            handle.image,
            spec.image,
            spec.dependencies.len()
        );
        let output = self
            .docker(vec![
                "build".into(),
                "--tag".into(),
                handle.image.clone().into(),
                "--file".into(),
                dockerfile.into_os_string(),
                "--build-arg".into(),
                format!("LAYER_DEPENDENCIES={}", spec.dependency_arg()).into(),
                spec.working_dir.clone().into_os_string(),
            ])
            .await?;
        check("docker build", &output)?;

        let output = self
            .docker(vec![
                "create".into(),
                "--name".into(),
                handle.container.clone().into(),
                "--env".into(),
                format!("LAYER_ARTIFACT={}", spec.artifact_name).into(),
                handle.image.clone().into(),
            ])
            .await?;
        check("docker create", &output)
    }

    async fn execute(
        &self,
        handle: &EnvironmentHandle,
        spec: &BuildSpec,
        output_path: &Path,
    ) -> Result<()> {
        info!("Packaging in container {}", handle.container);
        let output = self
            .docker(vec![
                "start".into(),
                "--attach".into(),
                handle.container.clone().into(),
            ])
            .await?;
        for line in String::from_utf8_lossy(&output.stdout).lines() {
            debug!("[{}] {}", handle.container, line);
        }
        check("packaging command", &output)?;

        let source = format!("{}:{}/{}", handle.container, OUTPUT_DIR, spec.artifact_name);
        let output = self
            .docker(vec![
                "cp".into(),
                source.into(),
                output_path.as_os_str().to_os_string(),
            ])
            .await?;
        check("docker cp", &output)
    }

    async fn teardown(&self, handle: &EnvironmentHandle) -> Result<()> {
        let mut failures = Vec::new();
        for args in self.teardown_commands(handle) {
            let step = format!("docker {}", args[0]);
            let args = args.into_iter().map(OsString::from).collect();
            match self.docker(args).await {
                Ok(output) => {
                    if let Err(e) = check_teardown(&step, &output) {
                        failures.push(e.to_string());
                    }
                }
                Err(e) => failures.push(e.to_string()),
            }
        }

        if failures.is_empty() {
            debug!("Removed environment {}", handle.container);
            Ok(())
        } else {
            Err(LayerError::BuildFailure(format!(
                "teardown of {} incomplete: {}",
                handle.container,
                failures.join("; ")
            )))
        }
    }

    fn teardown_blocking(&self, handle: &EnvironmentHandle) -> Result<()> {
        let mut failures = Vec::new();
        for args in self.teardown_commands(handle) {
            let step = format!("docker {}", args[0]);
            let args: Vec<&str> = args.iter().map(String::as_str).collect();
            match self.docker_blocking(&args) {
                Ok(output) => {
                    if let Err(e) = check_teardown(&step, &output) {
                        failures.push(e.to_string());
                    }
                }
                Err(e) => failures.push(e.to_string()),
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(LayerError::BuildFailure(format!(
                "teardown of {} incomplete: {}",
                handle.container,
                failures.join("; ")
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> BuildSpec {
        BuildSpec {
            image: "public.ecr.aws/sam/build-python3.12".to_string(),
            working_dir: PathBuf::from("."),
            dependencies: vec!["requests".to_string()],
            install_command: "pip install -t /opt/layer/python $LAYER_DEPENDENCIES".to_string(),
            package_command: "cd /opt/layer && zip -qr /out/$LAYER_ARTIFACT .".to_string(),
            artifact_dir: PathBuf::from("dist"),
            artifact_name: "layer.zip".to_string(),
        }
    }

    #[test]
    fn test_render_dockerfile() {
        let dockerfile = render_dockerfile(&spec());
        assert!(dockerfile.starts_with("FROM public.ecr.aws/sam/build-python3.12\n"));
        assert!(dockerfile.contains("ARG LAYER_DEPENDENCIES\n"));
        assert!(dockerfile.contains("RUN pip install -t /opt/layer/python $LAYER_DEPENDENCIES\n"));
        assert!(dockerfile.contains(
            "CMD [\"/bin/sh\", \"-c\", \"cd /opt/layer && zip -qr /out/$LAYER_ARTIFACT .\"]"
        ));
    }

    #[test]
    fn test_render_dockerfile_escapes_quotes() {
        let mut spec = spec();
        spec.package_command = "echo \"hi\"".to_string();
        let dockerfile = render_dockerfile(&spec);
        assert!(dockerfile.contains(r#""echo \"hi\"""#));
    }

    #[test]
    fn test_missing_resources_are_tolerated() {
        assert!(is_missing_resource(b"Error: No such container: layer-build-abc"));
        assert!(is_missing_resource(b"Error response from daemon: No such image: x"));
        assert!(!is_missing_resource(b"permission denied"));
    }

    #[test]
    fn test_stderr_tail_keeps_last_lines() {
        let stderr: String = (0..50).map(|i| format!("line {}\n", i)).collect();
        let tail = stderr_tail(stderr.as_bytes());
        assert!(tail.starts_with("line 30"));
        assert!(tail.ends_with("line 49"));
    }

    #[test]
    fn test_teardown_commands_respect_remove_image() {
        let handle = EnvironmentHandle::generate();
        assert_eq!(
            DockerEnvironment::new("docker", true)
                .teardown_commands(&handle)
                .len(),
            2
        );
        assert_eq!(
            DockerEnvironment::new("docker", false)
                .teardown_commands(&handle)
                .len(),
            1
        );
    }

    #[test]
    fn test_locate_missing_binary_is_build_failure() {
        let env = DockerEnvironment::new("layer-test-no-such-docker-binary", true);
        assert!(matches!(env.locate(), Err(LayerError::BuildFailure(_))));
    }
}
