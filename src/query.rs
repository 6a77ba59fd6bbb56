use crate::{
    command::{render_command, CommandOutput, CommandRunner, SystemCommandRunner},
    error::{BlastError, BlastResult},
    services::ServiceStatus,
    utils::{dedup_preserving_order, strip_arch},
};
use async_trait::async_trait;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Duration;

const REQUIRED_TOOLS: &[&str] = &["dpkg-query", "apt-get", "apt-cache", "apt-mark"];

/// Lines apt-get prints in simulation mode for each package it would remove.
const SIMULATED_REMOVAL_PREFIXES: &[&str] = &["Remv ", "Purg "];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum PackageStatus {
    Installed { version: String, essential: bool },
    /// Known to the package index but not installed.
    NotInstalled,
    Unknown,
}

/// One row of the dependency listing.
///
/// Each relation is a list of alternative groups: `a | b, c` becomes
/// `[["a", "b"], ["c"]]`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PackageRecord {
    pub name: String,
    pub provides: Vec<String>,
    pub pre_depends: Vec<Vec<String>>,
    pub depends: Vec<Vec<String>>,
}

#[async_trait]
pub trait PackageQuery: Send + Sync {
    async fn installed_packages(&self) -> BlastResult<BTreeSet<String>>;

    async fn essential_packages(&self) -> BlastResult<BTreeSet<String>>;

    async fn manual_packages(&self) -> BlastResult<BTreeSet<String>>;

    async fn dependency_records(&self) -> BlastResult<Vec<PackageRecord>>;

    async fn package_status(&self, package: &str) -> BlastResult<PackageStatus>;

    async fn simulate_remove(&self, package: &str, purge: bool) -> BlastResult<Vec<String>>;

    async fn simulate_autoremove(&self) -> BlastResult<Vec<String>>;

    async fn owned_files(&self, package: &str) -> BlastResult<Vec<String>>;

    async fn config_files(&self, package: &str) -> BlastResult<Vec<String>>;

    /// Installed size in bytes, `None` when dpkg has no figure for the package.
    async fn installed_size(&self, package: &str) -> BlastResult<Option<u64>>;
}

#[async_trait]
pub trait ServiceQuery: Send + Sync {
    async fn service_status(&self, service: &str) -> BlastResult<ServiceStatus>;
}

pub struct AptQuery<R: CommandRunner = SystemCommandRunner> {
    runner: R,
}

impl AptQuery<SystemCommandRunner> {
    pub fn system(timeout: Duration) -> BlastResult<Self> {
        for tool in REQUIRED_TOOLS {
            if which::which(tool).is_err() {
                return Err(BlastError::query(
                    *tool,
                    "not found in PATH; a Debian-family system is required",
                ));
            }
        }
        if which::which("systemctl").is_err() {
            warn!("systemctl not found; service status will be reported as unknown");
        }
        Ok(Self::with_runner(SystemCommandRunner::new(timeout)))
    }
}

impl<R: CommandRunner> AptQuery<R> {
    pub fn with_runner(runner: R) -> Self {
        Self { runner }
    }

    async fn checked(&self, program: &str, args: &[&str]) -> BlastResult<String> {
        let output = self.runner.run(program, args).await?;
        if !output.success {
            return Err(BlastError::query(
                render_command(program, args),
                failure_reason(&output),
            ));
        }
        Ok(output.stdout)
    }
}

#[async_trait]
impl<R: CommandRunner> PackageQuery for AptQuery<R> {
    async fn installed_packages(&self) -> BlastResult<BTreeSet<String>> {
        let out = self
            .checked("dpkg-query", &["-W", "-f=${Package}\t${db:Status-Status}\n"])
            .await?;
        Ok(parse_installed_listing(&out))
    }

    async fn essential_packages(&self) -> BlastResult<BTreeSet<String>> {
        let out = self
            .checked("dpkg-query", &["-W", "-f=${Package} ${Essential}\n"])
            .await?;
        Ok(parse_essential_listing(&out))
    }

    async fn manual_packages(&self) -> BlastResult<BTreeSet<String>> {
        let out = self.checked("apt-mark", &["showmanual"]).await?;
        Ok(parse_name_list(&out).into_iter().collect())
    }

    async fn dependency_records(&self) -> BlastResult<Vec<PackageRecord>> {
        let out = self
            .checked(
                "dpkg-query",
                &["-W", "-f=${Package}\t${Provides}\t${Pre-Depends}\t${Depends}\n"],
            )
            .await?;
        Ok(parse_dependency_records(&out))
    }

    async fn package_status(&self, package: &str) -> BlastResult<PackageStatus> {
        let args = ["-W", "-f=${db:Status-Status}\t${Version}\t${Essential}\n", package];
        let output = self.runner.run("dpkg-query", &args).await?;
        if output.success {
            if let Some(status) = parse_installed_status(&output.stdout) {
                return Ok(status);
            }
        } else if !is_no_match(&output) {
            return Err(BlastError::query(
                render_command("dpkg-query", &args),
                failure_reason(&output),
            ));
        }

        // Not installed as far as dpkg is concerned; ask the index whether it exists.
        let output = self.runner.run("apt-cache", &["show", package]).await?;
        if output.success && !output.stdout.trim().is_empty() {
            Ok(PackageStatus::NotInstalled)
        } else if is_no_match(&output) || output.success {
            Ok(PackageStatus::Unknown)
        } else {
            Err(BlastError::query(
                render_command("apt-cache", &["show", package]),
                failure_reason(&output),
            ))
        }
    }

    async fn simulate_remove(&self, package: &str, purge: bool) -> BlastResult<Vec<String>> {
        let action = if purge { "purge" } else { "remove" };
        let out = self.checked("apt-get", &["-s", action, package]).await?;
        Ok(parse_simulation(&out))
    }

    async fn simulate_autoremove(&self) -> BlastResult<Vec<String>> {
        let out = self.checked("apt-get", &["-s", "autoremove"]).await?;
        Ok(parse_simulation(&out))
    }

    async fn owned_files(&self, package: &str) -> BlastResult<Vec<String>> {
        let out = self.checked("dpkg-query", &["-L", package]).await?;
        Ok(out
            .lines()
            .map(str::trim)
            .filter(|line| line.starts_with('/'))
            .map(str::to_string)
            .collect())
    }

    async fn config_files(&self, package: &str) -> BlastResult<Vec<String>> {
        let out = self
            .checked("dpkg-query", &["-W", "-f=${Conffiles}\n", package])
            .await?;
        Ok(parse_conffiles(&out))
    }

    async fn installed_size(&self, package: &str) -> BlastResult<Option<u64>> {
        let out = self
            .checked("dpkg-query", &["-W", "-f=${Installed-Size}", package])
            .await?;
        Ok(parse_installed_size(&out))
    }
}

#[async_trait]
impl<R: CommandRunner> ServiceQuery for AptQuery<R> {
    async fn service_status(&self, service: &str) -> BlastResult<ServiceStatus> {
        let active = self.runner.run("systemctl", &["is-active", service]).await?;
        if let Some(status) = parse_is_active(&active) {
            return Ok(status);
        }
        // is-active says "inactive" for units that do not exist at all.
        let unit = self.runner.run("systemctl", &["cat", service]).await?;
        debug!("systemctl cat {} succeeded: {}", service, unit.success);
        Ok(if unit.success {
            ServiceStatus::Stopped
        } else {
            ServiceStatus::NotFound
        })
    }
}

fn failure_reason(output: &CommandOutput) -> String {
    let stderr = output.stderr.trim();
    if stderr.is_empty() {
        "command exited with a non-zero status".to_string()
    } else {
        stderr.lines().last().unwrap_or(stderr).to_string()
    }
}

fn is_no_match(output: &CommandOutput) -> bool {
    let stderr = output.stderr.to_lowercase();
    stderr.contains("no packages found") || stderr.contains("unable to locate")
}

pub(crate) fn parse_installed_listing(output: &str) -> BTreeSet<String> {
    output
        .lines()
        .filter_map(|line| {
            let (name, status) = line.split_once('\t')?;
            (status.trim() == "installed").then(|| strip_arch(name.trim()).to_string())
        })
        .filter(|name| !name.is_empty())
        .collect()
}

pub(crate) fn parse_essential_listing(output: &str) -> BTreeSet<String> {
    output
        .lines()
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            let name = parts.next()?;
            (parts.next() == Some("yes")).then(|| strip_arch(name).to_string())
        })
        .collect()
}

pub(crate) fn parse_name_list(output: &str) -> Vec<String> {
    dedup_preserving_order(
        output
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(|line| strip_arch(line).to_string()),
    )
}

pub(crate) fn parse_relation_field(field: &str) -> Vec<Vec<String>> {
    field
        .split(',')
        .filter_map(|group| {
            let alternatives: Vec<String> = group
                .split('|')
                .filter_map(relation_name)
                .collect();
            (!alternatives.is_empty()).then_some(alternatives)
        })
        .collect()
}

pub(crate) fn parse_provides(field: &str) -> Vec<String> {
    field.split(',').filter_map(relation_name).collect()
}

/// `libc6:any (>= 2.34)` -> `libc6`
fn relation_name(raw: &str) -> Option<String> {
    let name = raw
        .trim()
        .split(|c: char| c.is_whitespace() || c == '(')
        .next()?;
    let name = strip_arch(name);
    (!name.is_empty()).then(|| name.to_string())
}

pub(crate) fn parse_dependency_records(output: &str) -> Vec<PackageRecord> {
    output
        .lines()
        .filter_map(|line| {
            let mut fields = line.splitn(4, '\t');
            let name = fields.next()?.trim();
            if name.is_empty() {
                return None;
            }
            Some(PackageRecord {
                name: strip_arch(name).to_string(),
                provides: parse_provides(fields.next().unwrap_or("")),
                pre_depends: parse_relation_field(fields.next().unwrap_or("")),
                depends: parse_relation_field(fields.next().unwrap_or("")),
            })
        })
        .collect()
}

fn parse_installed_status(output: &str) -> Option<PackageStatus> {
    let line = output.lines().find(|line| !line.trim().is_empty())?;
    let mut fields = line.split('\t');
    if fields.next()?.trim() != "installed" {
        return None;
    }
    Some(PackageStatus::Installed {
        version: fields.next().unwrap_or("").trim().to_string(),
        essential: fields.next().is_some_and(|flag| flag.trim() == "yes"),
    })
}

pub(crate) fn parse_simulation(output: &str) -> Vec<String> {
    dedup_preserving_order(output.lines().filter_map(|line| {
        let rest = SIMULATED_REMOVAL_PREFIXES
            .iter()
            .find_map(|prefix| line.strip_prefix(prefix))?;
        rest.split_whitespace()
            .next()
            .map(|name| strip_arch(name).to_string())
    }))
}

pub(crate) fn parse_conffiles(output: &str) -> Vec<String> {
    output
        .lines()
        .filter_map(|line| line.split_whitespace().next())
        .filter(|path| path.starts_with('/'))
        .map(str::to_string)
        .collect()
}

/// dpkg reports Installed-Size in KiB.
pub(crate) fn parse_installed_size(output: &str) -> Option<u64> {
    output
        .trim()
        .parse::<u64>()
        .ok()
        .map(|kib| kib.saturating_mul(1024))
}

fn parse_is_active(output: &CommandOutput) -> Option<ServiceStatus> {
    match output.stdout.trim() {
        "active" | "reloading" | "activating" => Some(ServiceStatus::Running),
        _ if output.success => Some(ServiceStatus::Running),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedRunner;

    #[test]
    fn test_parse_installed_listing() {
        let out = "nginx\tinstalled\napache2\tinstalled\nold-pkg\tconfig-files\nlibc6\tinstalled\n";
        let installed = parse_installed_listing(out);
        assert!(installed.contains("nginx"));
        assert!(installed.contains("apache2"));
        assert!(installed.contains("libc6"));
        assert!(!installed.contains("old-pkg"));
    }

    #[test]
    fn test_parse_essential_listing() {
        let essential = parse_essential_listing("base-files yes\nlibc6 no\nbash yes\nnginx \n");
        assert!(essential.contains("base-files"));
        assert!(essential.contains("bash"));
        assert!(!essential.contains("libc6"));
        assert!(!essential.contains("nginx"));
    }

    #[test]
    fn test_parse_name_list() {
        assert_eq!(parse_name_list("nginx\nvim\n\ngit\nvim\n"), vec!["nginx", "vim", "git"]);
    }

    #[test]
    fn test_parse_relation_field_strips_versions_and_arch() {
        let groups = parse_relation_field(
            "libc6 (>= 2.34), libpcre3, debconf (>= 0.5) | debconf-2.0, perl:any",
        );
        assert_eq!(
            groups,
            vec![
                vec!["libc6".to_string()],
                vec!["libpcre3".to_string()],
                vec!["debconf".to_string(), "debconf-2.0".to_string()],
                vec!["perl".to_string()],
            ]
        );
        assert!(parse_relation_field("").is_empty());
        assert!(parse_relation_field("  ").is_empty());
    }

    #[test]
    fn test_parse_dependency_records() {
        let out = "nginx\t\t\tnginx-core (<< 1.18.0-6ubuntu14.4.1~), nginx-core (>= 1.18.0-6ubuntu14.4)\n\
                   nginx-core\thttpd, nginx\tdpkg (>= 1.15)\tlibc6 (>= 2.34), libssl3\n\
                   lonely\t\t\t\n";
        let records = parse_dependency_records(out);
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].name, "nginx");
        assert_eq!(records[0].depends.len(), 2);
        assert_eq!(records[1].provides, vec!["httpd", "nginx"]);
        assert_eq!(records[1].pre_depends, vec![vec!["dpkg".to_string()]]);
        assert_eq!(records[1].depends.len(), 2);
        assert!(records[2].depends.is_empty());
    }

    #[test]
    fn test_parse_simulation_uses_stable_prefixes() {
        let out = "NOTE: This is only a simulation!\n\
                   Reading package lists...\n\
                   The following packages will be REMOVED:\n  nginx nginx-core\n\
                   Remv nginx [1.18.0-6ubuntu14.4]\n\
                   Remv nginx-core [1.18.0-6ubuntu14.4]\n\
                   Purg libnginx-mod-http-geoip2:amd64 [1.18.0]\n\
                   Remv nginx [1.18.0-6ubuntu14.4]\n";
        assert_eq!(
            parse_simulation(out),
            vec!["nginx", "nginx-core", "libnginx-mod-http-geoip2"]
        );
        assert!(parse_simulation("0 upgraded, 0 newly installed, 0 to remove\n").is_empty());
    }

    #[test]
    fn test_parse_conffiles() {
        let out = " /etc/nginx/nginx.conf 7f8b3c1d\n /etc/nginx/mime.types a1b2 obsolete\n\n";
        assert_eq!(parse_conffiles(out), vec!["/etc/nginx/nginx.conf", "/etc/nginx/mime.types"]);
    }

    #[test]
    fn test_parse_installed_size() {
        assert_eq!(parse_installed_size("1536"), Some(1536 * 1024));
        assert_eq!(parse_installed_size(""), None);
    }

    #[tokio::test]
    async fn test_package_status_installed() {
        let runner = ScriptedRunner::new()
            .on("dpkg-query -W", CommandOutput::ok("installed\t1.18.0-6ubuntu14.4\tno\n"));
        let query = AptQuery::with_runner(runner);
        assert_eq!(
            query.package_status("nginx").await.unwrap(),
            PackageStatus::Installed { version: "1.18.0-6ubuntu14.4".into(), essential: false }
        );
    }

    #[tokio::test]
    async fn test_package_status_reports_essential_flag() {
        let runner = ScriptedRunner::new()
            .on("dpkg-query -W", CommandOutput::ok("installed\t2.36-9\tyes\n"));
        let query = AptQuery::with_runner(runner);
        assert_eq!(
            query.package_status("libc6").await.unwrap(),
            PackageStatus::Installed { version: "2.36-9".into(), essential: true }
        );
    }

    #[tokio::test]
    async fn test_package_status_known_but_not_installed() {
        let runner = ScriptedRunner::new()
            .on(
                "dpkg-query -W",
                CommandOutput::failed("dpkg-query: no packages found matching caddy"),
            )
            .on("apt-cache show", CommandOutput::ok("Package: caddy\nVersion: 2.6.2\n"));
        let query = AptQuery::with_runner(runner);
        assert_eq!(query.package_status("caddy").await.unwrap(), PackageStatus::NotInstalled);
    }

    #[tokio::test]
    async fn test_package_status_config_files_only_is_not_installed() {
        let runner = ScriptedRunner::new()
            .on("dpkg-query -W", CommandOutput::ok("config-files\t1.0\n"))
            .on("apt-cache show", CommandOutput::ok("Package: old\n"));
        let query = AptQuery::with_runner(runner);
        assert_eq!(query.package_status("old").await.unwrap(), PackageStatus::NotInstalled);
    }

    #[tokio::test]
    async fn test_package_status_unknown() {
        let runner = ScriptedRunner::new()
            .on(
                "dpkg-query -W",
                CommandOutput::failed("dpkg-query: no packages found matching ghost"),
            )
            .on(
                "apt-cache show",
                CommandOutput::failed("N: Unable to locate package ghost\nE: No packages found"),
            );
        let query = AptQuery::with_runner(runner);
        assert_eq!(query.package_status("ghost").await.unwrap(), PackageStatus::Unknown);
    }

    #[tokio::test]
    async fn test_package_status_database_failure_is_error() {
        let runner = ScriptedRunner::new().on(
            "dpkg-query -W",
            CommandOutput::failed("dpkg-query: error: parsing file '/var/lib/dpkg/status'"),
        );
        let query = AptQuery::with_runner(runner);
        let err = query.package_status("nginx").await.unwrap_err();
        assert!(err.is_query_failure());
    }

    #[tokio::test]
    async fn test_installed_listing_failure_propagates() {
        let runner = ScriptedRunner::new()
            .on("dpkg-query -W", CommandOutput::failed("dpkg-query: error: database locked"));
        let query = AptQuery::with_runner(runner);
        assert!(query.installed_packages().await.unwrap_err().is_query_failure());
    }

    #[tokio::test]
    async fn test_simulate_remove_and_purge_commands() {
        let runner = ScriptedRunner::new()
            .on("apt-get -s remove nginx", CommandOutput::ok("Remv nginx [1.0]\nRemv nginx-full [1.0]\n"))
            .on("apt-get -s purge nginx", CommandOutput::ok("Purg nginx [1.0]\n"));
        let query = AptQuery::with_runner(runner);
        assert_eq!(query.simulate_remove("nginx", false).await.unwrap(), vec!["nginx", "nginx-full"]);
        assert_eq!(query.simulate_remove("nginx", true).await.unwrap(), vec!["nginx"]);
    }

    #[tokio::test]
    async fn test_owned_files_keeps_paths_only() {
        let runner = ScriptedRunner::new().on(
            "dpkg-query -L",
            CommandOutput::ok("/.\n/lib/systemd/system/nginx.service\n/usr/sbin/nginx\ndiverted by foo\n"),
        );
        let query = AptQuery::with_runner(runner);
        let files = query.owned_files("nginx").await.unwrap();
        assert_eq!(files, vec!["/.", "/lib/systemd/system/nginx.service", "/usr/sbin/nginx"]);
    }

    #[tokio::test]
    async fn test_service_status_skips_cat_when_active() {
        let runner = ScriptedRunner::new().on("systemctl is-active", CommandOutput::ok("active\n"));
        let query = AptQuery::with_runner(runner);
        query.service_status("ssh").await.unwrap();
        assert_eq!(query.runner.calls(), vec!["systemctl is-active ssh"]);
    }

    #[tokio::test]
    async fn test_service_status_running() {
        let runner = ScriptedRunner::new().on("systemctl is-active", CommandOutput::ok("active\n"));
        let query = AptQuery::with_runner(runner);
        assert_eq!(query.service_status("nginx").await.unwrap(), ServiceStatus::Running);
    }

    #[tokio::test]
    async fn test_service_status_stopped() {
        let runner = ScriptedRunner::new()
            .on(
                "systemctl is-active",
                CommandOutput { success: false, stdout: "inactive\n".into(), stderr: String::new() },
            )
            .on("systemctl cat", CommandOutput::ok("[Unit]\nDescription=nginx\n"));
        let query = AptQuery::with_runner(runner);
        assert_eq!(query.service_status("nginx").await.unwrap(), ServiceStatus::Stopped);
    }

    #[tokio::test]
    async fn test_service_status_not_found() {
        let runner = ScriptedRunner::new()
            .on(
                "systemctl is-active",
                CommandOutput { success: false, stdout: "inactive\n".into(), stderr: String::new() },
            )
            .on("systemctl cat", CommandOutput::failed("No files found for nonexistent.service."));
        let query = AptQuery::with_runner(runner);
        assert_eq!(query.service_status("nonexistent").await.unwrap(), ServiceStatus::NotFound);
    }
}
