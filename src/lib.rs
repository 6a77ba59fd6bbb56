pub mod analyzer;
pub mod audit;
pub mod cache;
pub mod command;
pub mod config;
pub mod dependency;
pub mod error;
pub mod graph_builder;
pub mod plan;
pub mod query;
pub mod recommend;
pub mod services;
pub mod severity;
pub mod utils;

#[cfg(test)]
pub(crate) mod testing;

pub use analyzer::{AnalysisStep, ImpactAnalyzer, ImpactResult};
pub use audit::{AuditOperation, AuditRecord};
pub use cache::{CacheLock, GraphCache, GraphSnapshot};
pub use command::{CommandOutput, CommandRunner, SystemCommandRunner};
pub use config::Config;
pub use dependency::{DependencyEdge, DependencyGraph, EdgeKind, PackageNode};
pub use error::{BlastError, BlastResult};
pub use graph_builder::DependencyGraphBuilder;
pub use plan::{RemovalPlan, RemovalPlanGenerator};
pub use query::{AptQuery, PackageQuery, PackageRecord, PackageStatus, ServiceQuery};
pub use recommend::{alternatives_for, recommend};
pub use services::{ServiceImpactMapper, ServiceInfo, ServiceStatus};
pub use severity::{Severity, SeverityInputs, SeverityRule};

pub const BLASTRADIUS_VERSION: &str = env!("CARGO_PKG_VERSION");

use lazy_static::lazy_static;
use std::path::PathBuf;

lazy_static! {
    pub static ref BLASTRADIUS_HOME: PathBuf = {
        if let Ok(home) = std::env::var("BLASTRADIUS_HOME") {
            PathBuf::from(home)
        } else if let Some(home) = dirs::home_dir() {
            home.join(".blastradius")
        } else {
            PathBuf::from("/tmp/.blastradius")
        }
    };
    pub static ref BLASTRADIUS_CONFIG: PathBuf = {
        if let Ok(config_home) = std::env::var("XDG_CONFIG_HOME") {
            PathBuf::from(config_home).join("blastradius")
        } else {
            BLASTRADIUS_HOME.join("config")
        }
    };
    pub static ref BLASTRADIUS_CACHE: PathBuf = {
        if let Ok(cache_home) = std::env::var("XDG_CACHE_HOME") {
            PathBuf::from(cache_home).join("blastradius")
        } else {
            BLASTRADIUS_HOME.join("cache")
        }
    };
}
