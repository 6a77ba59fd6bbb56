use crate::{
    command::{render_command, CommandOutput, CommandRunner},
    error::{BlastError, BlastResult},
    query::{parse_relation_field, PackageQuery, PackageRecord, PackageStatus, ServiceQuery},
    services::ServiceStatus,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};

/// A dependency record; each entry of `depends` is one relation such as
/// `"nginx | apache2"`.
pub(crate) fn record(name: &str, depends: &[&str]) -> PackageRecord {
    PackageRecord {
        name: name.to_string(),
        provides: Vec::new(),
        pre_depends: Vec::new(),
        depends: depends
            .iter()
            .flat_map(|relation| parse_relation_field(relation))
            .collect(),
    }
}

fn failure(what: &str) -> BlastError {
    BlastError::query(what, "simulated failure")
}

#[derive(Default)]
pub(crate) struct FakePackageQuery {
    installed: BTreeSet<String>,
    essential: BTreeSet<String>,
    manual: BTreeSet<String>,
    known: BTreeSet<String>,
    records: Vec<PackageRecord>,
    removals: HashMap<String, Vec<String>>,
    autoremove: Vec<String>,
    files: HashMap<String, Vec<String>>,
    conffiles: HashMap<String, Vec<String>>,
    sizes: HashMap<String, u64>,
    fail_listings: bool,
    fail_status: bool,
    fail_simulation: bool,
    fail_autoremove: bool,
    fail_files: bool,
    fail_conffiles: bool,
    fail_sizes: bool,
    listing_calls: AtomicUsize,
}

impl FakePackageQuery {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_package(mut self, name: &str, depends: &[&str]) -> Self {
        self.installed.insert(name.to_string());
        self.records.push(record(name, depends));
        self
    }

    pub(crate) fn with_provides(mut self, name: &str, provides: &[&str]) -> Self {
        if let Some(existing) = self.records.iter_mut().find(|r| r.name == name) {
            existing.provides = provides.iter().map(|p| p.to_string()).collect();
        }
        self
    }

    pub(crate) fn with_essential(mut self, name: &str) -> Self {
        self.essential.insert(name.to_string());
        self
    }

    pub(crate) fn with_manual(mut self, name: &str) -> Self {
        self.manual.insert(name.to_string());
        self
    }

    /// Known to the package index but not installed.
    pub(crate) fn with_known(mut self, name: &str) -> Self {
        self.known.insert(name.to_string());
        self
    }

    pub(crate) fn with_removal(mut self, name: &str, removed: &[&str]) -> Self {
        self.removals.insert(
            name.to_string(),
            removed.iter().map(|p| p.to_string()).collect(),
        );
        self
    }

    pub(crate) fn with_autoremove(mut self, removed: &[&str]) -> Self {
        self.autoremove = removed.iter().map(|p| p.to_string()).collect();
        self
    }

    pub(crate) fn with_files(mut self, name: &str, files: &[&str]) -> Self {
        self.files
            .insert(name.to_string(), files.iter().map(|f| f.to_string()).collect());
        self
    }

    pub(crate) fn with_conffiles(mut self, name: &str, files: &[&str]) -> Self {
        self.conffiles
            .insert(name.to_string(), files.iter().map(|f| f.to_string()).collect());
        self
    }

    pub(crate) fn with_size(mut self, name: &str, bytes: u64) -> Self {
        self.sizes.insert(name.to_string(), bytes);
        self
    }

    pub(crate) fn failing_listings(mut self) -> Self {
        self.fail_listings = true;
        self
    }

    pub(crate) fn failing_status(mut self) -> Self {
        self.fail_status = true;
        self
    }

    pub(crate) fn failing_simulation(mut self) -> Self {
        self.fail_simulation = true;
        self
    }

    pub(crate) fn failing_autoremove(mut self) -> Self {
        self.fail_autoremove = true;
        self
    }

    pub(crate) fn failing_files(mut self) -> Self {
        self.fail_files = true;
        self
    }

    pub(crate) fn failing_conffiles(mut self) -> Self {
        self.fail_conffiles = true;
        self
    }

    pub(crate) fn failing_sizes(mut self) -> Self {
        self.fail_sizes = true;
        self
    }

    pub(crate) fn listing_calls(&self) -> usize {
        self.listing_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PackageQuery for FakePackageQuery {
    async fn installed_packages(&self) -> BlastResult<BTreeSet<String>> {
        if self.fail_listings {
            return Err(failure("dpkg-query -W"));
        }
        Ok(self.installed.clone())
    }

    async fn essential_packages(&self) -> BlastResult<BTreeSet<String>> {
        if self.fail_listings {
            return Err(failure("dpkg-query -W"));
        }
        Ok(self.essential.clone())
    }

    async fn manual_packages(&self) -> BlastResult<BTreeSet<String>> {
        if self.fail_listings {
            return Err(failure("apt-mark showmanual"));
        }
        Ok(self.manual.clone())
    }

    async fn dependency_records(&self) -> BlastResult<Vec<PackageRecord>> {
        self.listing_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_listings {
            return Err(failure("dpkg-query -W"));
        }
        Ok(self.records.clone())
    }

    async fn package_status(&self, package: &str) -> BlastResult<PackageStatus> {
        if self.fail_status {
            return Err(failure("dpkg-query -W"));
        }
        Ok(if self.installed.contains(package) {
            PackageStatus::Installed {
                version: "1.0-1".to_string(),
                essential: self.essential.contains(package),
            }
        } else if self.known.contains(package) {
            PackageStatus::NotInstalled
        } else {
            PackageStatus::Unknown
        })
    }

    async fn simulate_remove(&self, package: &str, _purge: bool) -> BlastResult<Vec<String>> {
        if self.fail_simulation {
            return Err(failure("apt-get -s remove"));
        }
        Ok(self.removals.get(package).cloned().unwrap_or_else(|| {
            if self.installed.contains(package) {
                vec![package.to_string()]
            } else {
                Vec::new()
            }
        }))
    }

    async fn simulate_autoremove(&self) -> BlastResult<Vec<String>> {
        if self.fail_autoremove {
            return Err(failure("apt-get -s autoremove"));
        }
        Ok(self.autoremove.clone())
    }

    async fn owned_files(&self, package: &str) -> BlastResult<Vec<String>> {
        if self.fail_files {
            return Err(failure("dpkg-query -L"));
        }
        Ok(self.files.get(package).cloned().unwrap_or_default())
    }

    async fn config_files(&self, package: &str) -> BlastResult<Vec<String>> {
        if self.fail_conffiles {
            return Err(failure("dpkg-query -W -f=${Conffiles}"));
        }
        Ok(self.conffiles.get(package).cloned().unwrap_or_default())
    }

    async fn installed_size(&self, package: &str) -> BlastResult<Option<u64>> {
        if self.fail_sizes {
            return Err(failure("dpkg-query -W"));
        }
        Ok(self.sizes.get(package).copied())
    }
}

/// Unconfigured services report `NotFound`.
#[derive(Default)]
pub(crate) struct FakeServiceQuery {
    statuses: HashMap<String, ServiceStatus>,
    failing: HashSet<String>,
}

impl FakeServiceQuery {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_status(mut self, name: &str, status: ServiceStatus) -> Self {
        self.statuses.insert(name.to_string(), status);
        self
    }

    pub(crate) fn failing_for(mut self, name: &str) -> Self {
        self.failing.insert(name.to_string());
        self
    }
}

#[async_trait]
impl ServiceQuery for FakeServiceQuery {
    async fn service_status(&self, service: &str) -> BlastResult<ServiceStatus> {
        if self.failing.contains(service) {
            return Err(BlastError::Timeout(format!("systemctl is-active {}", service)));
        }
        Ok(self
            .statuses
            .get(service)
            .copied()
            .unwrap_or(ServiceStatus::NotFound))
    }
}

/// Answers commands from a script keyed by rendered-command prefix; the first
/// matching entry wins and anything unscripted fails.
#[derive(Default)]
pub(crate) struct ScriptedRunner {
    script: Vec<(String, CommandOutput)>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedRunner {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn on(mut self, prefix: &str, output: CommandOutput) -> Self {
        self.script.push((prefix.to_string(), output));
        self
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn run(&self, program: &str, args: &[&str]) -> BlastResult<CommandOutput> {
        let rendered = render_command(program, args);
        self.calls.lock().push(rendered.clone());
        self.script
            .iter()
            .find(|(prefix, _)| rendered.starts_with(prefix.as_str()))
            .map(|(_, output)| output.clone())
            .ok_or_else(|| BlastError::query(rendered, "no scripted response"))
    }
}
