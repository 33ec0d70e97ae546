//! Host configuration
//!
//! Loaded from an optional TOML file, then `VIGIL__...` environment
//! variables (e.g. `VIGIL__DRIVER__REQUEST_TIMEOUT_MS=5000`).

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::driver::{DriverOptions, Launcher, SubprocessCommand};
use crate::error::ConfigError;
use crate::settings::WorkerSettings;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub driver: DriverConfig,
    #[serde(default)]
    pub cameras: Vec<CameraConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverConfig {
    pub request_timeout_ms: u64,
    pub max_restarts: u32,
    pub restart_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub worker: WorkerMode,
}

impl Default for DriverConfig {
    fn default() -> Self {
        let options = DriverOptions::default();
        Self {
            request_timeout_ms: options.request_timeout.as_millis() as u64,
            max_restarts: options.max_restarts,
            restart_backoff_ms: options.initial_backoff.as_millis() as u64,
            max_backoff_ms: options.max_backoff.as_millis() as u64,
            worker: WorkerMode::default(),
        }
    }
}

impl DriverConfig {
    pub fn options(&self) -> DriverOptions {
        DriverOptions {
            request_timeout: Duration::from_millis(self.request_timeout_ms),
            max_restarts: self.max_restarts,
            initial_backoff: Duration::from_millis(self.restart_backoff_ms),
            max_backoff: Duration::from_millis(self.max_backoff_ms),
        }
    }

    pub fn launcher(&self) -> std::io::Result<Launcher> {
        Ok(match &self.worker {
            WorkerMode::InProcess => Launcher::default(),
            WorkerMode::Subprocess { program: Some(program) } => {
                Launcher::Subprocess(SubprocessCommand::new(program))
            }
            WorkerMode::Subprocess { program: None } => {
                Launcher::Subprocess(SubprocessCommand::sibling()?)
            }
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum WorkerMode {
    #[default]
    InProcess,
    Subprocess {
        #[serde(default)]
        program: Option<PathBuf>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CameraConfig {
    pub source: SourceConfig,
    pub worker: WorkerSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    pub dir: PathBuf,
    #[serde(default = "default_fps")]
    pub fps: u32,
}

fn default_fps() -> u32 {
    10
}

impl Config {
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let defaults = DriverConfig::default();
        let mut builder = config::Config::builder()
            .set_default("driver.request_timeout_ms", defaults.request_timeout_ms as i64)?
            .set_default("driver.max_restarts", defaults.max_restarts as i64)?
            .set_default("driver.restart_backoff_ms", defaults.restart_backoff_ms as i64)?
            .set_default("driver.max_backoff_ms", defaults.max_backoff_ms as i64)?
            .set_default("driver.worker.mode", "in_process")?;

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }

        let config: Self = builder
            .add_source(config::Environment::with_prefix("VIGIL").separator("__"))
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();
        for (i, camera) in self.cameras.iter().enumerate() {
            let id = &camera.worker.camera.id;
            if id.is_empty() {
                return Err(ConfigError::EmptyCameraId(i));
            }
            if !seen.insert(id.as_str()) {
                return Err(ConfigError::DuplicateCamera(id.clone()));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::TransformKind;

    fn write(contents: &str) -> tempfile::NamedTempFile {
        let file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        std::fs::write(file.path(), contents).unwrap();
        file
    }

    #[test]
    fn no_file_yields_defaults() {
        let config = Config::load(None).unwrap();

        assert!(config.cameras.is_empty());
        assert_eq!(config.driver.options().request_timeout, Duration::from_secs(60));
        assert_eq!(config.driver.worker, WorkerMode::InProcess);
    }

    #[test]
    fn cameras_and_worker_groups_load_from_toml() {
        let file = write(
            r#"
            [driver]
            request_timeout_ms = 1500

            [driver.worker]
            mode = "subprocess"
            program = "/opt/vigil/frame-worker"

            [[cameras]]
            source = { dir = "/srv/frames/porch", fps = 15 }

            [cameras.worker.camera]
            id = "porch"

            [cameras.worker.text]
            position = "top_right"

            [cameras.worker.motion]
            pixel_threshold = 30

            [cameras.worker.device]
            analysis_width = 320

            [cameras.worker.recording]
            pre_trigger_frames = 5
            sinks = [{ kind = "directory", path = "/srv/recordings/porch" }]
            "#,
        );

        let config = Config::load(Some(file.path())).unwrap();

        assert_eq!(config.driver.request_timeout_ms, 1500);
        assert_eq!(config.driver.max_restarts, 5);
        assert_eq!(
            config.driver.worker,
            WorkerMode::Subprocess {
                program: Some(PathBuf::from("/opt/vigil/frame-worker"))
            }
        );

        let camera = &config.cameras[0];
        assert_eq!(camera.source.fps, 15);
        assert_eq!(camera.worker.camera.id, "porch");
        assert_eq!(camera.worker.recording.pre_trigger_frames, 5);
        assert_eq!(TransformKind::select(&camera.worker), TransformKind::Full);
    }

    #[test]
    fn duplicate_camera_ids_are_rejected() {
        let file = write(
            r#"
            [[cameras]]
            source = { dir = "/a" }
            worker = { camera = { id = "door" } }

            [[cameras]]
            source = { dir = "/b" }
            worker = { camera = { id = "door" } }
            "#,
        );

        assert!(matches!(
            Config::load(Some(file.path())),
            Err(ConfigError::DuplicateCamera(id)) if id == "door"
        ));
    }
}
