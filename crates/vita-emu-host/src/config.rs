use log::warn;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use vita_emu_core::audio::{AudioSpec, SampleFormat};
use vita_emu_core::kernel::{KernelConfig, MAX_CORE_COUNT};
use vita_emu_core::renderer::{Backend, DEFAULT_MAX_PENDING};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum RendererBackend {
    #[default]
    Opengl,
    Vulkan,
}

impl From<RendererBackend> for Backend {
    fn from(backend: RendererBackend) -> Self {
        match backend {
            RendererBackend::Opengl => Backend::OpenGl,
            RendererBackend::Vulkan => Backend::Vulkan,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum AudioFormat {
    #[default]
    S16,
    F32,
}

impl From<AudioFormat> for SampleFormat {
    fn from(format: AudioFormat) -> Self {
        match format {
            AudioFormat::S16 => SampleFormat::S16,
            AudioFormat::F32 => SampleFormat::F32,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct KernelSection {
    pub max_core_count: usize,
}

impl Default for KernelSection {
    fn default() -> Self {
        Self {
            max_core_count: MAX_CORE_COUNT,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RendererSection {
    pub backend: RendererBackend,
    pub max_pending: usize,
}

impl Default for RendererSection {
    fn default() -> Self {
        Self {
            backend: RendererBackend::default(),
            max_pending: DEFAULT_MAX_PENDING,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AudioSection {
    pub enabled: bool,
    pub sample_rate: u32,
    pub channels: u16,
    pub samples: u16,
    pub format: AudioFormat,
}

impl Default for AudioSection {
    fn default() -> Self {
        let spec = AudioSpec::default();
        Self {
            enabled: true,
            sample_rate: spec.sample_rate,
            channels: spec.channels,
            samples: spec.samples,
            format: AudioFormat::default(),
        }
    }
}

impl AudioSection {
    /// Spec requested from the host device.
    pub fn desired_spec(&self) -> AudioSpec {
        AudioSpec {
            sample_rate: self.sample_rate,
            format: self.format.into(),
            channels: self.channels,
            samples: self.samples,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(default)]
pub struct HostConfig {
    pub kernel: KernelSection,
    pub renderer: RendererSection,
    pub audio: AudioSection,
}

impl HostConfig {
    pub fn kernel_config(&self) -> KernelConfig {
        KernelConfig {
            max_core_count: self.kernel.max_core_count,
        }
    }
}

pub fn default_host_config_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        if let Some(appdata) = std::env::var_os("APPDATA") {
            return PathBuf::from(appdata).join("vitaemu").join("host.toml");
        }
    }

    if let Some(xdg) = std::env::var_os("XDG_CONFIG_HOME") {
        return PathBuf::from(xdg).join("vitaemu").join("host.toml");
    }

    if let Some(home) = std::env::var_os("HOME") {
        return PathBuf::from(home)
            .join(".config")
            .join("vitaemu")
            .join("host.toml");
    }

    PathBuf::from("host.toml")
}

pub fn load_from_file(path: &Path) -> HostConfig {
    let text = match std::fs::read_to_string(path) {
        Ok(s) => s,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return HostConfig::default(),
        Err(e) => {
            warn!(
                "Failed to read host config {}: {e}; using defaults",
                path.display()
            );
            return HostConfig::default();
        }
    };

    match toml::from_str::<HostConfig>(&text) {
        Ok(cfg) => cfg,
        Err(e) => {
            warn!(
                "Failed to parse host config {}: {e}; using defaults",
                path.display()
            );
            HostConfig::default()
        }
    }
}

pub fn save_to_file(path: &Path, cfg: &HostConfig) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let text = toml::to_string_pretty(cfg).map_err(std::io::Error::other)?;
    std::fs::write(path, text)
}
