//! Central configuration for tekton components
//!
//! `TektonConfig` is the single accessor for every recognized environment
//! variable. Binaries load it once in `main` and pass it (or sub-configs)
//! down explicitly; no other module reads the process environment.
//!
//! Precedence: built-in defaults < `tekton.toml` under `TEKTON_ROOT` <
//! environment variables.

pub mod env;

use crate::{Result, ToolingError};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Heartbeat and health classification settings
#[derive(Debug, Clone, Copy)]
pub struct HeartbeatConfig {
    /// Interval at which components send heartbeats, in milliseconds
    pub interval_ms: u64,
    /// Degraded threshold as a multiple of the interval
    pub t1_mult: u32,
    /// Failed threshold as a multiple of the interval
    pub t2_mult: u32,
    /// Consecutive healthy heartbeats required to leave degraded
    pub recovery_heartbeats: u32,
}

impl HeartbeatConfig {
    /// Elapsed time below which a component is healthy
    pub fn t1(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.interval_ms * self.t1_mult as u64)
    }

    /// Elapsed time at or beyond which a component is failed
    pub fn t2(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.interval_ms * self.t2_mult as u64)
    }
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval_ms: 10_000,
            t1_mult: 3,
            t2_mult: 6,
            recovery_heartbeats: 3,
        }
    }
}

/// Context/memory core settings
#[derive(Debug, Clone, Copy)]
pub struct MemoryConfig {
    /// Token budget for a single memory injection
    pub max_injection_tokens: usize,
    /// Fraction of the hard limit at which sunset is triggered
    pub sunset_threshold: f64,
    /// Fraction of the hard limit at which turns are rejected
    pub hard_limit_threshold: f64,
    /// Decay sweep interval in seconds
    pub sweep_interval_sec: u64,
    /// Maximum catalog entries per CI
    pub max_memories_per_ci: usize,
    /// Priority at or above which items survive expiry sweeps
    pub permanent_priority: u8,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            max_injection_tokens: 2000,
            sunset_threshold: 0.80,
            hard_limit_threshold: 0.95,
            sweep_interval_sec: 86_400,
            max_memories_per_ci: 500,
            permanent_priority: 8,
        }
    }
}

/// Workflow orchestrator settings
#[derive(Debug, Clone, Copy)]
pub struct WorkflowConfig {
    /// Worker pool size per execution
    pub max_concurrent_tasks: usize,
    /// Interval between automatic checkpoints, in seconds
    pub checkpoint_interval_sec: u64,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: 4,
            checkpoint_interval_sec: 300,
        }
    }
}

/// Message shell and connection pool settings
#[derive(Debug, Clone, Copy)]
pub struct ShellConfig {
    /// Per-target timeout for team-chat broadcasts, in milliseconds
    pub team_chat_timeout_ms: u64,
    /// Concurrent in-flight requests allowed per target endpoint
    pub pool_max_per_target: usize,
    /// Requests queued per target before rejecting with overloaded
    pub pool_queue_depth: usize,
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            team_chat_timeout_ms: 2000,
            pool_max_per_target: 5,
            pool_queue_depth: 100,
        }
    }
}

/// Optional file overrides loaded from `${TEKTON_ROOT}/tekton.toml`
#[derive(Debug, Default, Deserialize)]
struct FileOverrides {
    registry_port: Option<u16>,
    heartbeat_ms: Option<u64>,
    heartbeat_t1_mult: Option<u32>,
    heartbeat_t2_mult: Option<u32>,
    recovery_heartbeats: Option<u32>,
    max_injection_tokens: Option<usize>,
    sunset_threshold: Option<f64>,
    hard_limit_threshold: Option<f64>,
    memory_sweep_interval_sec: Option<u64>,
    max_memories_per_ci: Option<usize>,
    memory_permanent_priority: Option<u8>,
    max_concurrent_tasks: Option<usize>,
    checkpoint_interval_sec: Option<u64>,
    team_chat_timeout_ms: Option<u64>,
    pool_max_per_target: Option<usize>,
    pool_queue_depth: Option<usize>,
}

/// Top-level tekton configuration
#[derive(Debug, Clone)]
pub struct TektonConfig {
    /// Filesystem root for config and state (`TEKTON_ROOT`)
    pub root: PathBuf,
    /// Port the service registry binds (`TEKTON_REGISTRY_PORT`)
    pub registry_port: u16,
    /// Optional log directory (`TEKTON_LOG_DIR`)
    pub log_dir: Option<PathBuf>,
    /// Heartbeat and health classification settings
    pub heartbeat: HeartbeatConfig,
    /// Context/memory core settings
    pub memory: MemoryConfig,
    /// Workflow orchestrator settings
    pub workflow: WorkflowConfig,
    /// Message shell settings
    pub shell: ShellConfig,
}

impl TektonConfig {
    /// Load configuration from the environment and the optional
    /// `tekton.toml` under the root
    ///
    /// `TEKTON_ROOT` defaults to `.tekton` under the current directory.
    pub fn from_env() -> Result<Self> {
        let root = match env::get_env("TEKTON_ROOT")? {
            Some(dir) => PathBuf::from(dir),
            None => std::env::current_dir()
                .map_err(|e| ToolingError::Config(format!("Cannot determine working directory: {}", e)))?
                .join(".tekton"),
        };

        let file = Self::load_file_overrides(&root)?;

        let heartbeat = HeartbeatConfig {
            interval_ms: env::get_env_parse_or(
                "TEKTON_COMPONENT_HEARTBEAT_MS",
                file.heartbeat_ms.unwrap_or(10_000),
            )?,
            t1_mult: env::get_env_parse_or(
                "TEKTON_HEARTBEAT_T1_MULT",
                file.heartbeat_t1_mult.unwrap_or(3),
            )?,
            t2_mult: env::get_env_parse_or(
                "TEKTON_HEARTBEAT_T2_MULT",
                file.heartbeat_t2_mult.unwrap_or(6),
            )?,
            recovery_heartbeats: env::get_env_parse_or(
                "TEKTON_DEGRADED_RECOVERY_HEARTBEATS",
                file.recovery_heartbeats.unwrap_or(3),
            )?,
        };

        if heartbeat.t1_mult >= heartbeat.t2_mult {
            return Err(ToolingError::Config(format!(
                "Heartbeat T1 multiplier ({}) must be below T2 multiplier ({})",
                heartbeat.t1_mult, heartbeat.t2_mult
            )));
        }

        let memory = MemoryConfig {
            max_injection_tokens: env::get_env_parse_or(
                "TEKTON_MAX_INJECTION_TOKENS",
                file.max_injection_tokens.unwrap_or(2000),
            )?,
            sunset_threshold: env::get_env_parse_or(
                "TEKTON_CONTEXT_SUNSET_THRESHOLD",
                file.sunset_threshold.unwrap_or(0.80),
            )?,
            hard_limit_threshold: env::get_env_parse_or(
                "TEKTON_HARD_LIMIT_THRESHOLD",
                file.hard_limit_threshold.unwrap_or(0.95),
            )?,
            sweep_interval_sec: env::get_env_parse_or(
                "TEKTON_MEMORY_SWEEP_INTERVAL_SEC",
                file.memory_sweep_interval_sec.unwrap_or(86_400),
            )?,
            max_memories_per_ci: env::get_env_parse_or(
                "TEKTON_MAX_MEMORIES_PER_CI",
                file.max_memories_per_ci.unwrap_or(500),
            )?,
            permanent_priority: env::get_env_parse_or(
                "TEKTON_MEMORY_PERMANENT_PRIORITY",
                file.memory_permanent_priority.unwrap_or(8),
            )?,
        };

        if memory.sunset_threshold >= memory.hard_limit_threshold {
            return Err(ToolingError::Config(format!(
                "Sunset threshold ({}) must be below hard limit threshold ({})",
                memory.sunset_threshold, memory.hard_limit_threshold
            )));
        }

        let workflow = WorkflowConfig {
            max_concurrent_tasks: env::get_env_parse_or(
                "TEKTON_MAX_CONCURRENT_TASKS",
                file.max_concurrent_tasks.unwrap_or(4),
            )?,
            checkpoint_interval_sec: env::get_env_parse_or(
                "TEKTON_CHECKPOINT_INTERVAL_SEC",
                file.checkpoint_interval_sec.unwrap_or(300),
            )?,
        };

        let shell = ShellConfig {
            team_chat_timeout_ms: env::get_env_parse_or(
                "TEKTON_TEAM_CHAT_TIMEOUT_MS",
                file.team_chat_timeout_ms.unwrap_or(2000),
            )?,
            pool_max_per_target: env::get_env_parse_or(
                "TEKTON_POOL_MAX_PER_TARGET",
                file.pool_max_per_target.unwrap_or(5),
            )?,
            pool_queue_depth: env::get_env_parse_or(
                "TEKTON_POOL_QUEUE_DEPTH",
                file.pool_queue_depth.unwrap_or(100),
            )?,
        };

        Ok(Self {
            registry_port: env::get_env_parse_or(
                "TEKTON_REGISTRY_PORT",
                file.registry_port.unwrap_or(8100),
            )?,
            log_dir: env::get_env("TEKTON_LOG_DIR")?.map(PathBuf::from),
            root,
            heartbeat,
            memory,
            workflow,
            shell,
        })
    }

    fn load_file_overrides(root: &Path) -> Result<FileOverrides> {
        let path = root.join("tekton.toml");
        if !path.exists() {
            return Ok(FileOverrides::default());
        }
        let raw = std::fs::read_to_string(&path)?;
        toml::from_str(&raw)
            .map_err(|e| ToolingError::Config(format!("Invalid {}: {}", path.display(), e)))
    }

    /// Directory holding all persisted state
    pub fn state_dir(&self) -> PathBuf {
        self.root.join("state")
    }

    /// Port for a named component, via the `<COMPONENT>_PORT` convention
    pub fn component_port(&self, component_id: &str) -> Result<Option<u16>> {
        env::get_env_parse(&env::component_port_key(component_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_heartbeat_thresholds() {
        let hb = HeartbeatConfig::default();
        assert_eq!(hb.t1(), std::time::Duration::from_secs(30));
        assert_eq!(hb.t2(), std::time::Duration::from_secs(60));
    }

    #[test]
    fn test_defaults() {
        let memory = MemoryConfig::default();
        assert_eq!(memory.max_injection_tokens, 2000);
        assert!((memory.sunset_threshold - 0.80).abs() < f64::EPSILON);

        let workflow = WorkflowConfig::default();
        assert_eq!(workflow.max_concurrent_tasks, 4);
        assert_eq!(workflow.checkpoint_interval_sec, 300);

        let shell = ShellConfig::default();
        assert_eq!(shell.team_chat_timeout_ms, 2000);
        assert_eq!(shell.pool_max_per_target, 5);
    }

    #[test]
    fn test_file_overrides_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let overrides = TektonConfig::load_file_overrides(dir.path()).unwrap();
        assert!(overrides.registry_port.is_none());
    }

    #[test]
    fn test_file_overrides_parsed() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("tekton.toml"),
            "registry_port = 9001\nmax_concurrent_tasks = 8\n",
        )
        .unwrap();

        let overrides = TektonConfig::load_file_overrides(dir.path()).unwrap();
        assert_eq!(overrides.registry_port, Some(9001));
        assert_eq!(overrides.max_concurrent_tasks, Some(8));
    }
}
