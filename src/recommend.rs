use crate::{analyzer::ImpactResult, severity::Severity};
use lazy_static::lazy_static;
use std::collections::HashMap;

const ALTERNATIVES_TABLE: &[(&str, &[&str])] = &[
    ("nginx", &["apache2", "caddy", "lighttpd"]),
    ("apache2", &["nginx", "caddy", "lighttpd"]),
    ("lighttpd", &["nginx", "caddy"]),
    ("mysql-server", &["mariadb-server", "postgresql"]),
    ("mariadb-server", &["mysql-server", "postgresql"]),
    ("postgresql", &["mariadb-server", "mysql-server"]),
    ("redis-server", &["memcached", "valkey-server"]),
    ("docker.io", &["podman"]),
    ("docker-ce", &["podman"]),
    ("openssh-server", &["dropbear"]),
    ("postfix", &["exim4", "msmtp-mta"]),
    ("exim4", &["postfix", "msmtp-mta"]),
    ("network-manager", &["ifupdown", "netplan.io"]),
    ("ufw", &["firewalld", "nftables"]),
    ("firewalld", &["ufw", "nftables"]),
    ("cron", &["cronie", "systemd-cron"]),
    ("rsyslog", &["syslog-ng"]),
    ("vim", &["neovim", "nano"]),
    ("emacs", &["vim", "neovim"]),
    ("firefox", &["chromium", "firefox-esr"]),
    ("chromium", &["firefox", "firefox-esr"]),
    ("gedit", &["mousepad", "kate"]),
    ("vlc", &["mpv", "totem"]),
];

lazy_static! {
    static ref ALTERNATIVES: HashMap<&'static str, &'static [&'static str]> =
        ALTERNATIVES_TABLE.iter().copied().collect();
}

/// Packages that can stand in for `package`, if any are known.
pub fn alternatives_for(package: &str) -> Option<&'static [&'static str]> {
    ALTERNATIVES.get(package).copied()
}

/// Returns `(recommendations, warnings)` for a result.
pub fn recommend(result: &ImpactResult) -> (Vec<String>, Vec<String>) {
    let mut recommendations = Vec::new();
    let mut warnings = Vec::new();
    let package = result.target_package.as_str();

    if result.essential {
        warnings.push(format!(
            "{} is an Essential package; removing it can leave the system unusable",
            package
        ));
    }
    if result.severity == Severity::Critical {
        recommendations.push(format!(
            "CRITICAL: do not remove {} unless you are certain the system can run without it",
            package
        ));
    }

    if result.severity == Severity::High {
        recommendations.push(format!(
            "HIGH IMPACT: {} installed package(s) depend on {}; review them before removing",
            result.dependent_count(),
            package
        ));
    }

    let running: Vec<&str> = result
        .affected_services
        .iter()
        .filter(|service| service.is_running())
        .map(|service| service.name.as_str())
        .collect();
    if !running.is_empty() {
        recommendations.push(format!(
            "Stop affected services before removal: systemctl stop {}",
            running.join(" ")
        ));
    }

    let critical: Vec<&str> = result
        .affected_services
        .iter()
        .filter(|service| service.is_critical_and_running())
        .map(|service| service.name.as_str())
        .collect();
    if !critical.is_empty() {
        recommendations.push(format!(
            "Critical services would go down: {}. Arrange a replacement or a maintenance window first",
            critical.join(", ")
        ));
    }

    let cascade_running: Vec<String> = result
        .cascade_services
        .iter()
        .filter(|service| service.is_running())
        .map(|service| format!("{} ({})", service.name, service.package))
        .collect();
    if !cascade_running.is_empty() {
        warnings.push(format!(
            "Packages removed along with {} run services that would stop: {}",
            package,
            cascade_running.join(", ")
        ));
    }

    if !result.orphaned_packages.is_empty() {
        recommendations.push(format!(
            "Run 'apt-get autoremove' afterwards to clean up {} orphaned package(s): {}",
            result.orphaned_packages.len(),
            result.orphaned_packages.join(", ")
        ));
        if result.orphans_approximate {
            warnings.push(
                "Orphaned packages were estimated from a separate autoremove simulation \
                 and may differ after the actual removal"
                    .to_string(),
            );
        }
    }

    if !result.installed {
        recommendations.push(format!("{} is not installed; nothing to remove", package));
    } else if result.safe_to_remove {
        recommendations.push(format!(
            "{} can be safely removed: apt-get remove {}",
            package, package
        ));
    }

    if let Some(alternatives) = alternatives_for(package) {
        recommendations.push(format!(
            "Alternatives to {}: {}",
            package,
            alternatives.join(", ")
        ));
    }

    (recommendations, warnings)
}
