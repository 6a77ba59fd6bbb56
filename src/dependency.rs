use crate::{cache::GraphSnapshot, query::PackageRecord};
use chrono::{DateTime, Utc};
use petgraph::algo::tarjan_scc;
use petgraph::graphmap::DiGraphMap;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageNode {
    pub name: String,
    /// `false` for external nodes: dependency targets that are not installed
    /// (virtual names nobody provides, unsatisfied alternatives).
    pub installed: bool,
    pub essential: bool,
    pub manually_installed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DependencyEdge {
    pub from: String,
    pub to: String,
    #[serde(default)]
    pub kind: EdgeKind,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EdgeKind {
    #[default]
    Depends,
    PreDepends,
}

#[derive(Debug, Clone)]
pub struct DependencyGraph {
    nodes: BTreeMap<String, PackageNode>,
    edges: Vec<DependencyEdge>,
    forward: BTreeMap<String, BTreeSet<String>>,
    reverse: BTreeMap<String, BTreeSet<String>>,
    built_at: DateTime<Utc>,
}

impl DependencyGraph {
    pub fn from_records(
        installed: &BTreeSet<String>,
        essential: &BTreeSet<String>,
        manual: &BTreeSet<String>,
        records: &[PackageRecord],
    ) -> Self {
        let installed_records: Vec<&PackageRecord> = records
            .iter()
            .filter(|record| installed.contains(&record.name))
            .collect();

        // virtual name -> installed providers
        let mut providers: HashMap<&str, Vec<&str>> = HashMap::new();
        for record in &installed_records {
            for virtual_name in &record.provides {
                providers
                    .entry(virtual_name.as_str())
                    .or_default()
                    .push(record.name.as_str());
            }
        }

        let mut edges = BTreeSet::new();
        for record in &installed_records {
            let relations = record
                .pre_depends
                .iter()
                .map(|group| (group, EdgeKind::PreDepends))
                .chain(record.depends.iter().map(|group| (group, EdgeKind::Depends)));
            for (group, kind) in relations {
                let Some(target) = resolve_alternatives(group, installed, &providers) else {
                    continue;
                };
                if target != record.name {
                    edges.insert(DependencyEdge {
                        from: record.name.clone(),
                        to: target,
                        kind,
                    });
                }
            }
        }

        Self::from_parts(installed, essential, manual, edges.into_iter().collect(), Utc::now())
    }

    pub fn from_snapshot(snapshot: &GraphSnapshot) -> Self {
        let installed: BTreeSet<String> = snapshot.installed.iter().cloned().collect();
        let essential: BTreeSet<String> = snapshot.essential.iter().cloned().collect();
        let manual: BTreeSet<String> = snapshot.manual.iter().cloned().collect();
        Self::from_parts(
            &installed,
            &essential,
            &manual,
            snapshot.edges.clone(),
            snapshot.built_at,
        )
    }

    fn from_parts(
        installed: &BTreeSet<String>,
        essential: &BTreeSet<String>,
        manual: &BTreeSet<String>,
        edges: Vec<DependencyEdge>,
        built_at: DateTime<Utc>,
    ) -> Self {
        let mut nodes: BTreeMap<String, PackageNode> = installed
            .iter()
            .map(|name| {
                (
                    name.clone(),
                    PackageNode {
                        name: name.clone(),
                        installed: true,
                        essential: essential.contains(name),
                        manually_installed: manual.contains(name),
                    },
                )
            })
            .collect();

        let mut forward: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        let mut reverse: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for edge in &edges {
            for endpoint in [&edge.from, &edge.to] {
                nodes.entry(endpoint.clone()).or_insert_with(|| PackageNode {
                    name: endpoint.clone(),
                    installed: false,
                    essential: false,
                    manually_installed: false,
                });
            }
            forward
                .entry(edge.from.clone())
                .or_default()
                .insert(edge.to.clone());
            reverse
                .entry(edge.to.clone())
                .or_default()
                .insert(edge.from.clone());
        }

        Self {
            nodes,
            edges,
            forward,
            reverse,
            built_at,
        }
    }

    pub fn to_snapshot(&self) -> GraphSnapshot {
        let installed_nodes = || self.nodes.values().filter(|node| node.installed);
        GraphSnapshot::new(
            self.built_at,
            installed_nodes().map(|node| node.name.clone()).collect(),
            installed_nodes()
                .filter(|node| node.essential)
                .map(|node| node.name.clone())
                .collect(),
            installed_nodes()
                .filter(|node| node.manually_installed)
                .map(|node| node.name.clone())
                .collect(),
            self.edges.clone(),
        )
    }

    pub fn built_at(&self) -> DateTime<Utc> {
        self.built_at
    }

    pub fn node(&self, package: &str) -> Option<&PackageNode> {
        self.nodes.get(package)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &PackageNode> {
        self.nodes.values()
    }

    pub fn edges(&self) -> &[DependencyEdge] {
        &self.edges
    }

    pub fn installed_count(&self) -> usize {
        self.nodes.values().filter(|node| node.installed).count()
    }

    pub fn is_installed(&self, package: &str) -> bool {
        self.node(package).is_some_and(|node| node.installed)
    }

    pub fn is_essential(&self, package: &str) -> bool {
        self.node(package).is_some_and(|node| node.essential)
    }

    pub fn is_manually_installed(&self, package: &str) -> bool {
        self.node(package).is_some_and(|node| node.manually_installed)
    }

    pub fn forward_deps(&self, package: &str) -> BTreeSet<String> {
        self.forward.get(package).cloned().unwrap_or_default()
    }

    pub fn reverse_deps(&self, package: &str) -> BTreeSet<String> {
        self.reverse.get(package).cloned().unwrap_or_default()
    }

    /// Breadth-first closure over reverse edges plus the deepest level reached.
    pub fn transitive_reverse_deps(&self, package: &str) -> (Vec<String>, usize) {
        let mut visited: HashSet<&str> = HashSet::from([package]);
        let mut queue: VecDeque<(&str, usize)> = VecDeque::from([(package, 0)]);
        let mut found = Vec::new();
        let mut max_depth = 0;

        while let Some((current, depth)) = queue.pop_front() {
            let Some(dependents) = self.reverse.get(current) else {
                continue;
            };
            for dependent in dependents {
                if visited.insert(dependent.as_str()) {
                    found.push(dependent.clone());
                    max_depth = max_depth.max(depth + 1);
                    queue.push_back((dependent.as_str(), depth + 1));
                }
            }
        }

        (found, max_depth)
    }

    pub fn find_cycles(&self) -> Vec<Vec<String>> {
        let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();
        for name in self.nodes.keys() {
            graph.add_node(name.as_str());
        }
        for edge in &self.edges {
            graph.add_edge(edge.from.as_str(), edge.to.as_str(), ());
        }
        tarjan_scc(&graph)
            .into_iter()
            .filter(|scc| scc.len() > 1)
            .map(|scc| {
                let mut cycle: Vec<String> = scc.into_iter().map(str::to_string).collect();
                cycle.sort();
                cycle
            })
            .collect()
    }

    /// Orders `packages` so that every package comes before the packages it
    /// depends on. Members of a dependency cycle stay adjacent; ties are
    /// alphabetical.
    pub fn removal_order(&self, packages: &[String]) -> Vec<String> {
        let wanted: BTreeSet<&str> = packages.iter().map(String::as_str).collect();
        let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();
        for name in &wanted {
            graph.add_node(*name);
        }
        for edge in &self.edges {
            if wanted.contains(edge.from.as_str()) && wanted.contains(edge.to.as_str()) {
                graph.add_edge(edge.from.as_str(), edge.to.as_str(), ());
            }
        }

        let mut components = tarjan_scc(&graph);
        for scc in &mut components {
            scc.sort_unstable();
        }
        let component_of: HashMap<&str, usize> = components
            .iter()
            .enumerate()
            .flat_map(|(idx, scc)| scc.iter().map(move |name| (*name, idx)))
            .collect();

        // Kahn over the condensation; an edge points from dependent to dependency.
        let mut successors: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); components.len()];
        let mut in_degree = vec![0usize; components.len()];
        for (from, to, _) in graph.all_edges() {
            let (a, b) = (component_of[&from], component_of[&to]);
            if a != b && successors[a].insert(b) {
                in_degree[b] += 1;
            }
        }

        let mut ready: BTreeSet<(&str, usize)> = in_degree
            .iter()
            .enumerate()
            .filter(|(_, degree)| **degree == 0)
            .map(|(idx, _)| (components[idx][0], idx))
            .collect();
        let mut ordered = Vec::with_capacity(wanted.len());
        while let Some((_, idx)) = ready.pop_first() {
            ordered.extend(components[idx].iter().map(|name| name.to_string()));
            for &next in &successors[idx] {
                in_degree[next] -= 1;
                if in_degree[next] == 0 {
                    ready.insert((components[next][0], next));
                }
            }
        }
        ordered
    }
}

// installed alternative, then installed provider, then the first name as an external node
fn resolve_alternatives(
    group: &[String],
    installed: &BTreeSet<String>,
    providers: &HashMap<&str, Vec<&str>>,
) -> Option<String> {
    group
        .iter()
        .find(|name| installed.contains(name.as_str()))
        .cloned()
        .or_else(|| {
            group.iter().find_map(|name| {
                providers
                    .get(name.as_str())
                    .and_then(|found| found.first())
                    .map(|provider| provider.to_string())
            })
        })
        .or_else(|| group.first().cloned())
}
