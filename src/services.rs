use crate::{
    error::BlastResult,
    query::{PackageQuery, ServiceQuery},
    utils::dedup_preserving_order,
};
use lazy_static::lazy_static;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceStatus {
    Running,
    Stopped,
    NotFound,
    Unknown,
}

impl std::fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            ServiceStatus::Running => "running",
            ServiceStatus::Stopped => "stopped",
            ServiceStatus::NotFound => "not_found",
            ServiceStatus::Unknown => "unknown",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceInfo {
    pub name: String,
    pub package: String,
    pub status: ServiceStatus,
    pub is_critical: bool,
}

impl ServiceInfo {
    pub fn is_running(&self) -> bool {
        self.status == ServiceStatus::Running
    }

    pub fn is_critical_and_running(&self) -> bool {
        self.is_critical && self.is_running()
    }
}

const SERVICE_TABLE: &[(&str, &[&str])] = &[
    // web servers
    ("nginx", &["nginx"]),
    ("nginx-core", &["nginx"]),
    ("nginx-full", &["nginx"]),
    ("nginx-light", &["nginx"]),
    ("apache2", &["apache2"]),
    ("lighttpd", &["lighttpd"]),
    ("caddy", &["caddy"]),
    ("haproxy", &["haproxy"]),
    ("php-fpm", &["php-fpm"]),
    // databases
    ("mysql-server", &["mysql"]),
    ("mysql-server-8.0", &["mysql"]),
    ("mariadb-server", &["mariadb", "mysql"]),
    ("postgresql", &["postgresql"]),
    ("redis-server", &["redis-server", "redis"]),
    ("mongodb-org-server", &["mongod"]),
    ("memcached", &["memcached"]),
    // remote access
    ("openssh-server", &["ssh", "sshd"]),
    // containers
    ("docker.io", &["docker", "containerd"]),
    ("docker-ce", &["docker"]),
    ("containerd", &["containerd"]),
    ("containerd.io", &["containerd"]),
    ("podman", &["podman"]),
    // networking
    ("network-manager", &["NetworkManager"]),
    ("systemd-resolved", &["systemd-resolved"]),
    ("ifupdown", &["networking"]),
    ("isc-dhcp-server", &["isc-dhcp-server"]),
    ("bind9", &["named", "bind9"]),
    ("dnsmasq", &["dnsmasq"]),
    ("ufw", &["ufw"]),
    ("firewalld", &["firewalld"]),
    // system plumbing
    ("systemd", &["systemd-journald", "systemd-logind"]),
    ("cron", &["cron"]),
    ("rsyslog", &["rsyslog"]),
    ("dbus", &["dbus"]),
    ("cups", &["cups"]),
    ("bluez", &["bluetooth"]),
    ("postfix", &["postfix"]),
    ("fail2ban", &["fail2ban"]),
    ("avahi-daemon", &["avahi-daemon"]),
];

const CRITICAL_SERVICE_NAMES: &[&str] = &[
    // remote access
    "ssh",
    "sshd",
    // init system
    "systemd",
    "systemd-journald",
    "systemd-logind",
    "dbus",
    // network management
    "NetworkManager",
    "systemd-networkd",
    "systemd-resolved",
    "networking",
    // container runtimes
    "docker",
    "containerd",
    // relational and key-value databases
    "mysql",
    "mariadb",
    "postgresql",
    "redis",
    "redis-server",
    "mongod",
    // web servers
    "nginx",
    "apache2",
    "httpd",
];

const UNIT_DIRS: &[&str] = &[
    "/lib/systemd/system/",
    "/usr/lib/systemd/system/",
    "/etc/systemd/system/",
];

lazy_static! {
    static ref PACKAGE_SERVICE_MAP: HashMap<&'static str, &'static [&'static str]> =
        SERVICE_TABLE.iter().copied().collect();
    static ref CRITICAL_SERVICES: HashSet<&'static str> =
        CRITICAL_SERVICE_NAMES.iter().copied().collect();
}

pub fn static_services_for(package: &str) -> Option<&'static [&'static str]> {
    PACKAGE_SERVICE_MAP.get(package).copied()
}

pub fn is_critical_service(name: &str) -> bool {
    CRITICAL_SERVICES.contains(unit_name(name))
}

fn unit_name(name: &str) -> &str {
    name.strip_suffix(".service").unwrap_or(name)
}

/// Service names for unit files in a package's file list. Template units
/// (`getty@.service`) need an instance name and are skipped.
pub(crate) fn service_names_from_files(files: &[String]) -> Vec<String> {
    dedup_preserving_order(files.iter().filter_map(|path| {
        if !UNIT_DIRS.iter().any(|dir| path.starts_with(dir)) {
            return None;
        }
        let file_name = path.rsplit('/').next()?;
        let name = file_name.strip_suffix(".service")?;
        if name.is_empty() || name.ends_with('@') {
            return None;
        }
        Some(name.to_string())
    }))
}

pub struct ServiceImpactMapper {
    query: Arc<dyn PackageQuery>,
    services: Arc<dyn ServiceQuery>,
}

impl ServiceImpactMapper {
    pub fn new(query: Arc<dyn PackageQuery>, services: Arc<dyn ServiceQuery>) -> Self {
        Self { query, services }
    }

    pub async fn candidate_services(&self, package: &str) -> BlastResult<Vec<String>> {
        if let Some(names) = static_services_for(package) {
            return Ok(dedup_preserving_order(
                names.iter().map(|name| unit_name(name).to_string()),
            ));
        }
        let files = self.query.owned_files(package).await?;
        let names = service_names_from_files(&files);
        debug!("Discovered {} service unit(s) for {}", names.len(), package);
        Ok(names)
    }

    /// A failed status query becomes `Unknown`; units missing on this machine are left out.
    pub async fn services_for(&self, package: &str) -> BlastResult<Vec<ServiceInfo>> {
        let mut services = Vec::new();
        for name in self.candidate_services(package).await? {
            let status = match self.services.service_status(&name).await {
                Ok(status) => status,
                Err(e) => {
                    warn!("Could not query status of service {}: {}", name, e);
                    ServiceStatus::Unknown
                }
            };
            if status == ServiceStatus::NotFound {
                debug!("Service {} is not present, skipping", name);
                continue;
            }
            services.push(ServiceInfo {
                is_critical: is_critical_service(&name),
                name,
                package: package.to_string(),
                status,
            });
        }
        Ok(services)
    }

    /// Services across several packages, deduplicated by name with the first
    /// owner kept. Packages whose units could not be listed are returned
    /// alongside instead of failing the whole lookup.
    pub async fn services_for_all(&self, packages: &[String]) -> (Vec<ServiceInfo>, Vec<String>) {
        let mut services: Vec<ServiceInfo> = Vec::new();
        let mut unlisted = Vec::new();
        for package in packages {
            match self.services_for(package).await {
                Ok(found) => {
                    for service in found {
                        if !services.iter().any(|s| s.name == service.name) {
                            services.push(service);
                        }
                    }
                }
                Err(e) => {
                    warn!("Could not list services of {}: {}", package, e);
                    unlisted.push(package.clone());
                }
            }
        }
        (services, unlisted)
    }
}
