use crate::{
    cache::GraphCache,
    config::Config,
    error::{BlastError, BlastResult},
    graph_builder::DependencyGraphBuilder,
    plan::{RemovalPlan, RemovalPlanGenerator},
    query::{AptQuery, PackageQuery, PackageStatus, ServiceQuery},
    recommend::recommend,
    services::{ServiceImpactMapper, ServiceInfo, ServiceStatus},
    severity::{self, Severity, SeverityInputs},
    utils::{strip_arch, validate_package_name},
};
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;

/// A part of the analysis that can fail without aborting it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisStep {
    DependencyGraph,
    RemovalSimulation,
    AutoremoveSimulation,
    ServiceStatus,
}

impl std::fmt::Display for AnalysisStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            AnalysisStep::DependencyGraph => "dependency_graph",
            AnalysisStep::RemovalSimulation => "removal_simulation",
            AnalysisStep::AutoremoveSimulation => "autoremove_simulation",
            AnalysisStep::ServiceStatus => "service_status",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImpactResult {
    pub target_package: String,
    pub version: Option<String>,
    pub installed: bool,
    pub essential: bool,
    pub direct_dependents: Vec<String>,
    pub transitive_dependents: Vec<String>,
    pub affected_services: Vec<ServiceInfo>,
    /// Services of packages removed along with the target. Reported only;
    /// severity is decided by the target's own services.
    pub cascade_services: Vec<ServiceInfo>,
    pub orphaned_packages: Vec<String>,
    /// Set when orphans come from an autoremove simulation run separately
    /// from the removal simulation; the two do not compose exactly.
    pub orphans_approximate: bool,
    pub cascade_packages: Vec<String>,
    pub severity: Severity,
    pub severity_rule: String,
    pub total_affected: usize,
    pub cascade_depth: usize,
    pub recommendations: Vec<String>,
    pub warnings: Vec<String>,
    pub safe_to_remove: bool,
    pub degraded_steps: Vec<AnalysisStep>,
    pub analyzed_at: DateTime<Utc>,
    pub duration_ms: u64,
}

impl ImpactResult {
    /// An installed package with no findings yet. Not safe to remove until
    /// an analysis says so.
    pub fn new(target_package: &str) -> Self {
        Self {
            target_package: target_package.to_string(),
            version: None,
            installed: true,
            essential: false,
            direct_dependents: Vec::new(),
            transitive_dependents: Vec::new(),
            affected_services: Vec::new(),
            cascade_services: Vec::new(),
            orphaned_packages: Vec::new(),
            orphans_approximate: false,
            cascade_packages: Vec::new(),
            severity: Severity::Safe,
            severity_rule: String::new(),
            total_affected: 0,
            cascade_depth: 0,
            recommendations: Vec::new(),
            warnings: Vec::new(),
            safe_to_remove: false,
            degraded_steps: Vec::new(),
            analyzed_at: Utc::now(),
            duration_ms: 0,
        }
    }

    /// With no dependency graph the simulated cascade is the best lower bound.
    pub fn dependent_count(&self) -> usize {
        let known = self
            .transitive_dependents
            .len()
            .max(self.direct_dependents.len());
        if self.dependents_unknown() {
            known.max(self.cascade_packages.len())
        } else {
            known
        }
    }

    pub fn dependents_unknown(&self) -> bool {
        self.degraded_steps.contains(&AnalysisStep::DependencyGraph)
    }

    pub fn has_critical_running_service(&self) -> bool {
        self.affected_services
            .iter()
            .any(ServiceInfo::is_critical_and_running)
    }

    pub fn is_degraded(&self) -> bool {
        !self.degraded_steps.is_empty()
    }

    fn degrade(&mut self, step: AnalysisStep, warning: String) {
        warn!("{}", warning);
        if !self.degraded_steps.contains(&step) {
            self.degraded_steps.push(step);
        }
        self.warnings.push(warning);
    }
}

pub struct ImpactAnalyzer {
    query: Arc<dyn PackageQuery>,
    graph: DependencyGraphBuilder,
    services: ServiceImpactMapper,
    planner: RemovalPlanGenerator,
}

impl ImpactAnalyzer {
    /// Analyzer backed by the real package manager and systemd.
    pub fn new(config: &Config) -> BlastResult<Self> {
        let apt = Arc::new(AptQuery::system(config.command_timeout())?);
        Ok(Self::with_backends(apt.clone(), apt, config))
    }

    pub fn with_backends(
        query: Arc<dyn PackageQuery>,
        services: Arc<dyn ServiceQuery>,
        config: &Config,
    ) -> Self {
        Self {
            graph: DependencyGraphBuilder::new(query.clone(), GraphCache::from_config(config)),
            services: ServiceImpactMapper::new(query.clone(), services),
            planner: RemovalPlanGenerator::new(query.clone(), config.use_sudo),
            query,
        }
    }

    pub fn graph_builder(&self) -> &DependencyGraphBuilder {
        &self.graph
    }

    pub async fn analyze(&self, package: &str) -> BlastResult<ImpactResult> {
        let started = Instant::now();
        validate_package_name(package)?;
        let package = strip_arch(package);
        info!("Analyzing removal impact of {}", package);

        let mut result = ImpactResult::new(package);

        let mut graph = match self.graph.build().await {
            Ok(graph) => Some(graph),
            Err(e @ BlastError::LockTimeout(_)) => return Err(e),
            Err(e) => {
                result.degrade(
                    AnalysisStep::DependencyGraph,
                    format!("Dependency graph unavailable, dependents are unknown: {}", e),
                );
                None
            }
        };

        let in_graph = graph.as_ref().is_some_and(|g| g.is_installed(package));
        let status = match self.query.package_status(package).await {
            Ok(status) => Some(status),
            Err(e) if in_graph => {
                warn!("Status of {} unavailable, trusting the graph: {}", package, e);
                None
            }
            Err(e) => return Err(e),
        };
        result.installed = match status {
            None => true,
            Some(PackageStatus::Installed { version, essential }) => {
                if !in_graph && graph.is_some() {
                    // Installed after the snapshot was taken.
                    debug!("{} {} missing from graph, rebuilding", package, version);
                    match self.graph.rebuild().await {
                        Ok(fresh) => graph = Some(fresh),
                        Err(e @ BlastError::LockTimeout(_)) => return Err(e),
                        Err(e) => result.degrade(
                            AnalysisStep::DependencyGraph,
                            format!("Dependency graph rebuild failed: {}", e),
                        ),
                    }
                }
                result.version = Some(version);
                result.essential = essential;
                true
            }
            Some(PackageStatus::NotInstalled) => false,
            Some(PackageStatus::Unknown) => {
                return Err(BlastError::PackageNotFound(package.to_string()))
            }
        };

        if let Some(graph) = graph.as_ref() {
            result.essential |= graph.is_essential(package);
            result.direct_dependents = graph.reverse_deps(package).into_iter().collect();
            let (transitive, depth) = graph.transitive_reverse_deps(package);
            result.transitive_dependents = transitive;
            result.cascade_depth = depth;
        }

        if result.installed {
            self.simulate(&mut result).await;
            self.map_services(&mut result).await;
            self.map_cascade_services(&mut result).await;
        } else {
            result
                .warnings
                .push(format!("{} is not currently installed", package));
        }

        self.classify(&mut result);
        let (recommendations, warnings) = recommend(&result);
        result.recommendations = recommendations;
        result.warnings.extend(warnings);
        result.duration_ms = started.elapsed().as_millis() as u64;

        info!(
            "{}: severity {} ({}), {} affected, safe to remove: {}",
            package, result.severity, result.severity_rule, result.total_affected, result.safe_to_remove
        );
        Ok(result)
    }

    pub async fn removal_plan(&self, result: &ImpactResult, purge: bool) -> RemovalPlan {
        let graph = match self.graph.build().await {
            Ok(graph) => Some(graph),
            Err(e) => {
                warn!("Removal order falls back to analysis order: {}", e);
                None
            }
        };
        self.planner.generate(result, graph.as_deref(), purge).await
    }

    pub async fn plan(&self, package: &str, purge: bool) -> BlastResult<RemovalPlan> {
        let result = self.analyze(package).await?;
        Ok(self.removal_plan(&result, purge).await)
    }

    async fn simulate(&self, result: &mut ImpactResult) {
        let package = result.target_package.clone();

        match self.query.simulate_remove(&package, false).await {
            Ok(removed) => {
                result.cascade_packages = removed.into_iter().filter(|p| *p != package).collect();
            }
            Err(e) => result.degrade(
                AnalysisStep::RemovalSimulation,
                format!("Removal simulation failed, cascade is unknown: {}", e),
            ),
        }

        match self.query.simulate_autoremove().await {
            Ok(candidates) => {
                let cascade: BTreeSet<&String> = result.cascade_packages.iter().collect();
                let orphans: Vec<String> = candidates
                    .into_iter()
                    .filter(|p| *p != package && !cascade.contains(p))
                    .collect();
                result.orphaned_packages = orphans;
                result.orphans_approximate = true;
            }
            Err(e) => result.degrade(
                AnalysisStep::AutoremoveSimulation,
                format!("Autoremove simulation failed, orphans are unknown: {}", e),
            ),
        }
    }

    async fn map_services(&self, result: &mut ImpactResult) {
        match self.services.services_for(&result.target_package).await {
            Ok(services) => {
                for service in services
                    .iter()
                    .filter(|s| s.is_critical && s.status == ServiceStatus::Unknown)
                {
                    result.degrade(
                        AnalysisStep::ServiceStatus,
                        format!("Status of critical service {} is unknown", service.name),
                    );
                }
                result.affected_services = services;
            }
            Err(e) => result.degrade(
                AnalysisStep::ServiceStatus,
                format!("Could not determine affected services: {}", e),
            ),
        }
    }

    async fn map_cascade_services(&self, result: &mut ImpactResult) {
        if result.cascade_packages.is_empty() {
            return;
        }
        let (services, unlisted) = self.services.services_for_all(&result.cascade_packages).await;
        if !unlisted.is_empty() {
            result.degrade(
                AnalysisStep::ServiceStatus,
                format!("Could not determine services of {}", unlisted.join(", ")),
            );
        }
        let target: BTreeSet<&str> = result
            .affected_services
            .iter()
            .map(|s| s.name.as_str())
            .collect();
        result.cascade_services = services
            .into_iter()
            .filter(|s| !target.contains(s.name.as_str()))
            .collect();
    }

    fn classify(&self, result: &mut ImpactResult) {
        let critical_service_running = result.has_critical_running_service();
        let rule = severity::classify(&SeverityInputs {
            essential: result.essential,
            transitive_count: result.dependent_count(),
            critical_service_running,
            dependents_unknown: result.dependents_unknown(),
        });
        result.severity = rule.verdict;
        result.severity_rule = rule.name.to_string();
        result.safe_to_remove = severity::is_safe_to_remove(rule.verdict, critical_service_running)
            && !result.is_degraded();

        let affected: BTreeSet<&String> = result
            .direct_dependents
            .iter()
            .chain(&result.transitive_dependents)
            .chain(&result.cascade_packages)
            .collect();
        result.total_affected = affected.len();
    }
}
