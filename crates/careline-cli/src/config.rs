use anyhow::Context;
use careline_core::AgentKind;
use careline_orchestrator::MonitoringConfig;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Deserialize, Default)]
pub struct CarelineConfig {
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub ports: PortsConfig,
    #[serde(default)]
    pub monitoring: MonitoringSection,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct NetworkConfig {
    /// Scheme and host peers are reached at; ports come from `[ports]`.
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Address agents bind to.
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            host: default_host(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PortsConfig {
    #[serde(default = "default_orchestrator_port")]
    pub orchestrator: u16,
    #[serde(default = "default_directory_port")]
    pub directory: u16,
    #[serde(default = "default_availability_port")]
    pub availability: u16,
    #[serde(default = "default_cost_port")]
    pub cost: u16,
    #[serde(default = "default_records_port")]
    pub records: u16,
    #[serde(default = "default_summarizer_port")]
    pub summarizer: u16,
    #[serde(rename = "loop", default = "default_loop_port")]
    pub loop_agent: u16,
}

impl Default for PortsConfig {
    fn default() -> Self {
        Self {
            orchestrator: default_orchestrator_port(),
            directory: default_directory_port(),
            availability: default_availability_port(),
            cost: default_cost_port(),
            records: default_records_port(),
            summarizer: default_summarizer_port(),
            loop_agent: default_loop_port(),
        }
    }
}

impl PortsConfig {
    pub fn port(&self, kind: AgentKind) -> u16 {
        match kind {
            AgentKind::Orchestrator => self.orchestrator,
            AgentKind::Directory => self.directory,
            AgentKind::Availability => self.availability,
            AgentKind::Cost => self.cost,
            AgentKind::Records => self.records,
            AgentKind::Summarizer => self.summarizer,
            AgentKind::Loop => self.loop_agent,
        }
    }

    fn port_mut(&mut self, kind: AgentKind) -> &mut u16 {
        match kind {
            AgentKind::Orchestrator => &mut self.orchestrator,
            AgentKind::Directory => &mut self.directory,
            AgentKind::Availability => &mut self.availability,
            AgentKind::Cost => &mut self.cost,
            AgentKind::Records => &mut self.records,
            AgentKind::Summarizer => &mut self.summarizer,
            AgentKind::Loop => &mut self.loop_agent,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MonitoringSection {
    #[serde(default = "default_tick_secs")]
    pub tick_secs: u64,
    #[serde(default = "default_check_interval_minutes")]
    pub check_interval_minutes: u64,
}

impl Default for MonitoringSection {
    fn default() -> Self {
        Self {
            tick_secs: default_tick_secs(),
            check_interval_minutes: default_check_interval_minutes(),
        }
    }
}

fn default_base_url() -> String {
    "http://localhost".to_string()
}
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_request_timeout_secs() -> u64 {
    30
}
fn default_orchestrator_port() -> u16 {
    8000
}
fn default_directory_port() -> u16 {
    8001
}
fn default_availability_port() -> u16 {
    8002
}
fn default_cost_port() -> u16 {
    8003
}
fn default_records_port() -> u16 {
    8004
}
fn default_summarizer_port() -> u16 {
    8005
}
fn default_loop_port() -> u16 {
    8006
}
fn default_tick_secs() -> u64 {
    60
}
fn default_check_interval_minutes() -> u64 {
    30
}

impl CarelineConfig {
    /// Read `path`, falling back to defaults when it does not exist.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file '{}'", path.display()))?;
        toml::from_str(&raw)
            .with_context(|| format!("Failed to parse config file '{}'", path.display()))
    }

    /// Apply `A2A_BASE_URL` and `<AGENT>_PORT` overrides from `lookup`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<()> {
        if let Some(base_url) = lookup("A2A_BASE_URL") {
            self.network.base_url = base_url;
        }
        for kind in AgentKind::ALL {
            let var = format!("{}_PORT", kind.as_str().to_ascii_uppercase());
            if let Some(raw) = lookup(&var) {
                let port = raw
                    .parse()
                    .with_context(|| format!("{var} is not a valid port: {raw}"))?;
                *self.ports.port_mut(kind) = port;
            }
        }
        Ok(())
    }

    pub fn agent_url(&self, kind: AgentKind) -> String {
        careline_gateway::agent_url(&self.network.base_url, self.ports.port(kind))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.network.request_timeout_secs)
    }

    pub fn monitoring(&self) -> MonitoringConfig {
        MonitoringConfig {
            tick: Duration::from_secs(self.monitoring.tick_secs),
            check_interval: Duration::from_secs(self.monitoring.check_interval_minutes * 60),
        }
    }
}
