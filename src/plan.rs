use crate::{
    analyzer::{AnalysisStep, ImpactResult},
    dependency::DependencyGraph,
    query::PackageQuery,
    severity::Severity,
    utils::{dedup_preserving_order, format_size},
};
use chrono::{DateTime, Utc};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Flags that make apt proceed without asking. A plan never contains any of
/// them; confirmation belongs to whoever executes it.
pub const AUTO_CONFIRM_FLAGS: &[&str] = &["-y", "--yes", "--assume-yes", "--force-yes", "-qq"];

const ASSUME_YES_OPTION: &str = "APT::Get::Assume-Yes";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemovalPlan {
    pub target_package: String,
    pub purge: bool,
    pub packages_to_remove: Vec<String>,
    pub autoremove_candidates: Vec<String>,
    pub config_files_affected: Vec<String>,
    pub commands: Vec<String>,
    pub estimated_freed_space: String,
    pub severity: Severity,
    pub safe_to_remove: bool,
    /// Analysis steps that failed; the package lists may be incomplete.
    pub degraded_steps: Vec<AnalysisStep>,
    pub warnings: Vec<String>,
    pub generated_at: DateTime<Utc>,
}

impl RemovalPlan {
    pub fn is_degraded(&self) -> bool {
        !self.degraded_steps.is_empty()
    }

    pub fn has_auto_confirm(&self) -> bool {
        self.commands
            .iter()
            .flat_map(|command| command.split_whitespace())
            .any(is_auto_confirm_token)
    }
}

fn is_auto_confirm_token(token: &str) -> bool {
    if AUTO_CONFIRM_FLAGS.contains(&token) || token.contains(ASSUME_YES_OPTION) {
        return true;
    }
    // clustered short options such as -qy
    token.starts_with('-') && !token.starts_with("--") && token[1..].contains('y')
}

pub struct RemovalPlanGenerator {
    query: Arc<dyn PackageQuery>,
    use_sudo: bool,
}

impl RemovalPlanGenerator {
    pub fn new(query: Arc<dyn PackageQuery>, use_sudo: bool) -> Self {
        Self { query, use_sudo }
    }

    pub fn commands(&self, package: &str, purge: bool) -> Vec<String> {
        let prefix = if self.use_sudo { "sudo " } else { "" };
        let action = if purge { "purge" } else { "remove" };
        vec![
            format!("{}apt-get {} {}", prefix, action, package),
            format!(
                "{}apt-get autoremove{}",
                prefix,
                if purge { " --purge" } else { "" }
            ),
        ]
    }

    /// Builds a plan from a finished analysis. Cascade and orphan sets are
    /// taken from `result` as-is; nothing is simulated again.
    pub async fn generate(
        &self,
        result: &ImpactResult,
        graph: Option<&DependencyGraph>,
        purge: bool,
    ) -> RemovalPlan {
        let package = result.target_package.as_str();

        let packages_to_remove = if result.installed {
            let mut packages = vec![package.to_string()];
            packages.extend(result.cascade_packages.iter().cloned());
            let packages = dedup_preserving_order(packages);
            match graph {
                Some(graph) => graph.removal_order(&packages),
                None => packages,
            }
        } else {
            warn!("{} is not installed; the plan removes nothing", package);
            Vec::new()
        };

        let mut warnings = result.warnings.clone();

        let config_files_affected = if purge && result.installed {
            match self.query.config_files(package).await {
                Ok(files) => files,
                Err(e) => {
                    let warning = format!("Configuration files of {} are unknown: {}", package, e);
                    warn!("{}", warning);
                    warnings.push(warning);
                    Vec::new()
                }
            }
        } else {
            Vec::new()
        };

        let estimated_freed_space = self
            .estimate_freed_space(
                packages_to_remove
                    .iter()
                    .chain(result.orphaned_packages.iter()),
            )
            .await;

        RemovalPlan {
            target_package: package.to_string(),
            purge,
            commands: self.commands(package, purge),
            packages_to_remove,
            autoremove_candidates: result.orphaned_packages.clone(),
            config_files_affected,
            estimated_freed_space,
            severity: result.severity,
            safe_to_remove: result.safe_to_remove,
            degraded_steps: result.degraded_steps.clone(),
            warnings,
            generated_at: Utc::now(),
        }
    }

    async fn estimate_freed_space<'a>(&self, packages: impl Iterator<Item = &'a String>) -> String {
        let mut total: u64 = 0;
        for package in packages {
            match self.query.installed_size(package).await {
                Ok(size) => total = total.saturating_add(size.unwrap_or(0)),
                Err(e) => {
                    debug!("Size of {} unavailable: {}", package, e);
                    return "unknown".to_string();
                }
            }
        }
        format_size(total)
    }
}
