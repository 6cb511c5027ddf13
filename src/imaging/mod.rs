//! Machine image creation through an external imaging tool.
//!
//! Builds the `packer build` invocation for one machine type, optionally
//! preceded by an `ansible-galaxy` role refresh, and runs each as a
//! subprocess. Built images carry `Name` and `Created` tags, which is what
//! the latest-image input source selects on.

use crate::backend::ImageCatalog;
use crate::core::config::GlobalConfig;
use crate::core::error::{BackendError, ImageError};
use crate::core::image::{select_with, SelectionPolicy};
use crate::stacks::MachineType;
use indexmap::IndexMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Command;
use thiserror::Error;
use tracing::{debug, info};

/// Imaging failures.
#[derive(Error, Debug)]
pub enum ImagingError {
    #[error("configuration key '{0}' is required to build an image")]
    MissingConfig(String),

    #[error("base image lookup failed: {0}")]
    BaseImage(#[from] ImageError),

    #[error("image catalog unavailable: {0}")]
    Catalog(#[from] BackendError),

    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} exited with status {code}")]
    Failed { program: String, code: i32 },
}

/// A subprocess invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCommand {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub cwd: Option<PathBuf>,
}

impl ToolCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
            cwd: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    /// Run to completion with inherited stdio. Non-zero exit is an error.
    pub fn run(&self) -> Result<(), ImagingError> {
        debug!(command = %self, "running");
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        cmd.envs(self.env.iter().map(|(k, v)| (k, v)));
        if let Some(dir) = &self.cwd {
            cmd.current_dir(dir);
        }
        let status = cmd.status().map_err(|source| ImagingError::Spawn {
            program: self.program.clone(),
            source,
        })?;
        if status.success() {
            Ok(())
        } else {
            Err(ImagingError::Failed {
                program: self.program.clone(),
                // Killed by signal has no exit code
                code: status.code().unwrap_or(-1),
            })
        }
    }
}

impl fmt::Display for ToolCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (k, v) in &self.env {
            write!(f, "{}={} ", k, v)?;
        }
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        if let Some(dir) = &self.cwd {
            write!(f, "  (in {})", dir.display())?;
        }
        Ok(())
    }
}

/// Parameters of one image build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageBuild {
    pub machine_type: MachineType,
    pub region: String,
    pub stack_type: String,
    pub base_image: String,
    pub template: PathBuf,
    pub aws_profile: String,
}

impl ImageBuild {
    /// Gather build parameters from the configuration; the base image comes
    /// from `BaseImage` or a unique catalog match for the region.
    pub fn from_config<C: ImageCatalog + ?Sized>(
        machine_type: MachineType,
        config: &GlobalConfig,
        catalog: &C,
        template: &Path,
        aws_profile: &str,
    ) -> Result<Self, ImagingError> {
        let region = required(config, "Region")?;
        let stack_type = required(config, "StackType")?;
        let base_image = match config.get_str("BaseImage") {
            Some(id) => id.to_string(),
            None => base_image(&region, catalog)?,
        };
        Ok(Self {
            machine_type,
            region,
            stack_type,
            base_image,
            template: template.to_path_buf(),
            aws_profile: aws_profile.to_string(),
        })
    }

    /// `packer build -var ... -only <machine-type> <template>`
    pub fn packer_command(&self) -> ToolCommand {
        ToolCommand::new("packer")
            .arg("build")
            .arg("-var")
            .arg(format!("aws_region={}", self.region))
            .arg("-var")
            .arg(format!("aws_ubuntu_ami={}", self.base_image))
            .arg("-var")
            .arg(format!("stack_type={}", self.stack_type))
            .arg("-only")
            .arg(self.machine_type.as_str())
            .arg(self.template.display().to_string())
            .env("AWS_PROFILE", &self.aws_profile)
    }
}

/// Refresh provisioning roles before a build.
pub fn roles_command(ansible_dir: &Path) -> ToolCommand {
    ToolCommand::new("ansible-galaxy")
        .arg("install")
        .arg("-f")
        .arg("-r")
        .arg("roles.txt")
        .arg("-p")
        .arg(ansible_dir.join("roles").display().to_string())
        .current_dir(ansible_dir)
}

/// The commands an image build runs, in order.
pub fn commands(build: &ImageBuild, update_roles: Option<&Path>) -> Vec<ToolCommand> {
    let mut cmds = Vec::new();
    if let Some(dir) = update_roles {
        cmds.push(roles_command(dir));
    }
    cmds.push(build.packer_command());
    cmds
}

/// Run every command of the build, stopping at the first failure.
pub fn create_image(build: &ImageBuild, update_roles: Option<&Path>) -> Result<(), ImagingError> {
    info!(
        machine_type = %build.machine_type,
        region = %build.region,
        base_image = %build.base_image,
        "creating machine image"
    );
    for cmd in commands(build, update_roles) {
        cmd.run()?;
    }
    Ok(())
}

/// The single base image published for a region.
pub fn base_image<C: ImageCatalog + ?Sized>(region: &str, catalog: &C) -> Result<String, ImagingError> {
    let filter: IndexMap<String, String> = [
        ("Region", region),
        ("Arch", "amd64"),
        ("Storage", "ebs-ssd"),
        ("Virtualization", "hvm"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect();
    let images = catalog.list_images()?;
    let image = select_with(&filter, &images, SelectionPolicy::Unique)?;
    Ok(image.id.clone())
}

fn required(config: &GlobalConfig, key: &str) -> Result<String, ImagingError> {
    config
        .get(key)
        .map(crate::core::types::value_to_string)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ImagingError::MissingConfig(key.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use crate::core::types::MachineImage;

    fn ubuntu(id: &str, region: &str) -> MachineImage {
        MachineImage {
            id: id.to_string(),
            tags: [
                ("Region", region),
                ("Arch", "amd64"),
                ("Storage", "ebs-ssd"),
                ("Virtualization", "hvm"),
            ]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
        }
    }

    fn config(extra: &[(&str, &str)]) -> GlobalConfig {
        let mut pairs = vec![("Region", "us-east-1"), ("StackType", "accumulo")];
        pairs.extend_from_slice(extra);
        GlobalConfig::from_pairs(pairs)
    }

    #[test]
    fn test_imaging_packer_command() {
        let build = ImageBuild::from_config(
            MachineType::MesosLeader,
            &config(&[("BaseImage", "ami-base")]),
            &MemoryBackend::new(),
            Path::new("packer/template.js"),
            "ops",
        )
        .unwrap();
        let cmd = build.packer_command();
        assert_eq!(cmd.program, "packer");
        assert_eq!(
            cmd.args,
            vec![
                "build",
                "-var",
                "aws_region=us-east-1",
                "-var",
                "aws_ubuntu_ami=ami-base",
                "-var",
                "stack_type=accumulo",
                "-only",
                "mesos-leader",
                "packer/template.js"
            ]
        );
        assert_eq!(cmd.env, vec![("AWS_PROFILE".to_string(), "ops".to_string())]);
    }

    #[test]
    fn test_imaging_base_image_from_catalog() {
        let catalog = MemoryBackend::new().with_images(vec![
            ubuntu("ami-east", "us-east-1"),
            ubuntu("ami-west", "us-west-2"),
        ]);
        assert_eq!(base_image("us-east-1", &catalog).unwrap(), "ami-east");
    }

    #[test]
    fn test_imaging_base_image_must_be_unique() {
        let catalog = MemoryBackend::new().with_images(vec![
            ubuntu("ami-a", "us-east-1"),
            ubuntu("ami-b", "us-east-1"),
        ]);
        let err = base_image("us-east-1", &catalog).unwrap_err();
        assert!(matches!(err, ImagingError::BaseImage(ImageError::Ambiguous { count: 2, .. })));
        let err = base_image("eu-west-1", &catalog).unwrap_err();
        assert!(matches!(err, ImagingError::BaseImage(ImageError::NotFound { .. })));
    }

    #[test]
    fn test_imaging_missing_region() {
        let err = ImageBuild::from_config(
            MachineType::MesosFollower,
            &GlobalConfig::from_pairs([("StackType", "accumulo")]),
            &MemoryBackend::new(),
            Path::new("t.js"),
            "default",
        )
        .unwrap_err();
        assert!(matches!(err, ImagingError::MissingConfig(ref k) if k == "Region"));
    }

    #[test]
    fn test_imaging_roles_first() {
        let build = ImageBuild::from_config(
            MachineType::MesosFollower,
            &config(&[("BaseImage", "ami-base")]),
            &MemoryBackend::new(),
            Path::new("t.js"),
            "default",
        )
        .unwrap();
        let cmds = commands(&build, Some(Path::new("/srv/ansible")));
        assert_eq!(cmds.len(), 2);
        assert_eq!(cmds[0].program, "ansible-galaxy");
        assert_eq!(cmds[0].args.last().unwrap(), "/srv/ansible/roles");
        assert_eq!(cmds[0].cwd.as_deref(), Some(Path::new("/srv/ansible")));
        assert_eq!(cmds[1].program, "packer");
        assert_eq!(commands(&build, None).len(), 1);
    }

    #[test]
    fn test_imaging_display() {
        let cmd = ToolCommand::new("packer").arg("build").env("AWS_PROFILE", "ops");
        assert_eq!(cmd.to_string(), "AWS_PROFILE=ops packer build");
    }

    #[test]
    fn test_imaging_run_exit_status() {
        assert!(ToolCommand::new("true").run().is_ok());
        let err = ToolCommand::new("false").run().unwrap_err();
        assert!(matches!(err, ImagingError::Failed { code: 1, .. }));
        let err = ToolCommand::new("strata-no-such-tool").run().unwrap_err();
        assert!(matches!(err, ImagingError::Spawn { .. }));
    }
}
