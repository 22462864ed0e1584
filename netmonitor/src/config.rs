use std::net::IpAddr;
use std::path::Path;
use std::time::Duration;
use serde::Deserialize;
use anyhow::{bail, Context, Result};
use shared::protocol::{REPORT_TOP_HOSTS, REPORT_TOP_SERVICES};
use shared::types::AddressFamily;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub report: ReportConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MonitorConfig {
    /// Interface name or index; all interfaces when unset
    #[serde(default)]
    pub interface: Option<String>,
    /// Family watched when no filters are given
    #[serde(default)]
    pub family: AddressFamily,
    /// Source addresses or hostnames to watch
    #[serde(default)]
    pub filters: Vec<String>,
    #[serde(default = "default_resolve_hosts")]
    pub resolve_hosts: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReportConfig {
    #[serde(default = "default_top_services")]
    pub top_services: usize,
    #[serde(default = "default_top_hosts")]
    pub top_hosts: usize,
    /// Log running totals this often; off when unset
    #[serde(default)]
    pub status_interval_secs: Option<u64>,
}

/// Command-line values that take precedence over the file.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub interface: Option<String>,
    pub ipv6: bool,
    pub no_resolve: bool,
    pub hosts: Vec<String>,
}

fn default_resolve_hosts() -> bool {
    true
}

fn default_top_services() -> usize {
    REPORT_TOP_SERVICES
}

fn default_top_hosts() -> usize {
    REPORT_TOP_HOSTS
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interface: None,
            family: AddressFamily::default(),
            filters: Vec::new(),
            resolve_hosts: default_resolve_hosts(),
        }
    }
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            top_services: default_top_services(),
            top_hosts: default_top_hosts(),
            status_interval_secs: None,
        }
    }
}

impl ReportConfig {
    pub fn status_interval(&self) -> Option<Duration> {
        self.status_interval_secs.map(Duration::from_secs)
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    pub fn apply(&mut self, overrides: CliOverrides) {
        if overrides.interface.is_some() {
            self.monitor.interface = overrides.interface;
        }
        if overrides.ipv6 {
            self.monitor.family = AddressFamily::Ipv6;
        }
        if overrides.no_resolve {
            self.monitor.resolve_hosts = false;
        }
        if !overrides.hosts.is_empty() {
            self.monitor.filters = overrides.hosts;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.report.status_interval_secs == Some(0) {
            bail!("report.status_interval_secs must be greater than zero");
        }
        if matches!(self.monitor.interface.as_deref(), Some("")) {
            bail!("monitor.interface must not be empty");
        }
        Ok(())
    }
}

/// Turn a filter entry into an address: literals are taken as-is, names are
/// looked up and the first address of the preferred family wins.
pub async fn resolve_filter(host: &str, prefer: AddressFamily) -> Result<IpAddr> {
    if let Ok(addr) = host.parse::<IpAddr>() {
        return Ok(addr);
    }

    let addrs: Vec<IpAddr> = tokio::net::lookup_host((host, 0))
        .await
        .with_context(|| format!("Failed to resolve filter host {}", host))?
        .map(|sa| sa.ip())
        .collect();

    addrs
        .iter()
        .find(|addr| AddressFamily::of(addr) == prefer)
        .or_else(|| addrs.first())
        .copied()
        .with_context(|| format!("No addresses found for {}", host))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn test_defaults_from_empty_file() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.monitor.family, AddressFamily::Ipv4);
        assert!(config.monitor.resolve_hosts);
        assert!(config.monitor.filters.is_empty());
        assert_eq!(config.report.top_services, 15);
        assert_eq!(config.report.top_hosts, 15);
        assert!(config.report.status_interval().is_none());
    }

    #[test]
    fn test_full_file() {
        let config: Config = toml::from_str(
            r#"
            [monitor]
            interface = "eth0"
            family = "ipv6"
            filters = ["10.0.0.7", "nas.local"]
            resolve_hosts = false

            [report]
            top_services = 5
            status_interval_secs = 30
            "#,
        )
        .unwrap();
        assert_eq!(config.monitor.interface.as_deref(), Some("eth0"));
        assert_eq!(config.monitor.family, AddressFamily::Ipv6);
        assert_eq!(config.monitor.filters.len(), 2);
        assert!(!config.monitor.resolve_hosts);
        assert_eq!(config.report.top_services, 5);
        assert_eq!(config.report.top_hosts, 15);
        assert_eq!(config.report.status_interval(), Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_bad_family_is_rejected() {
        let parsed: Result<Config, _> = toml::from_str("[monitor]\nfamily = \"ipx\"\n");
        assert!(parsed.is_err());
    }

    #[test]
    fn test_cli_overrides_file() {
        let mut config: Config = toml::from_str("[monitor]\ninterface = \"eth0\"\nfilters = [\"a\"]\n").unwrap();
        config.apply(CliOverrides {
            interface: Some("2".to_string()),
            ipv6: true,
            no_resolve: true,
            hosts: vec!["10.0.0.7".to_string()],
        });
        assert_eq!(config.monitor.interface.as_deref(), Some("2"));
        assert_eq!(config.monitor.family, AddressFamily::Ipv6);
        assert!(!config.monitor.resolve_hosts);
        assert_eq!(config.monitor.filters, vec!["10.0.0.7".to_string()]);

        let mut config: Config = toml::from_str("[monitor]\ninterface = \"eth0\"\n").unwrap();
        config.apply(CliOverrides::default());
        assert_eq!(config.monitor.interface.as_deref(), Some("eth0"));
    }

    #[test]
    fn test_validate() {
        let mut config = Config::default();
        assert!(config.validate().is_ok());
        config.report.status_interval_secs = Some(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let err = Config::load("/nonexistent/netmonitor.toml").unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }

    #[tokio::test]
    async fn test_resolve_filter_literals() {
        let addr = resolve_filter("10.0.0.7", AddressFamily::Ipv6).await.unwrap();
        assert_eq!(addr, IpAddr::V4(Ipv4Addr::new(10, 0, 0, 7)));
        let addr = resolve_filter("fe80::1", AddressFamily::Ipv4).await.unwrap();
        assert!(addr.is_ipv6());
    }
}
