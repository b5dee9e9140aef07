//! Module dependency resolution
//!
//! Turns an unordered set of descriptors into a load order in which every
//! module follows all of its dependencies. Resolution is pure: it never
//! touches the registry or starts anything.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use tracing::debug;

use crate::module::error::{KernelError, Result};
use crate::module::registry::records::ModuleDescriptor;

/// Dependency resolution result
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyResolution {
    /// Modules in load order (dependencies first)
    pub load_order: Vec<String>,
    /// Module dependencies map
    pub dependencies: BTreeMap<String, Vec<String>>,
}

impl DependencyResolution {
    /// Group the load order into waves
    ///
    /// Every module's dependencies lie in earlier waves, so the members of a
    /// wave can be started concurrently. Each wave keeps load order.
    pub fn waves(&self) -> Vec<Vec<String>> {
        let mut level: BTreeMap<&str, usize> = BTreeMap::new();
        let mut waves: Vec<Vec<String>> = Vec::new();

        for name in &self.load_order {
            let wave = self
                .dependencies
                .get(name)
                .into_iter()
                .flatten()
                .filter_map(|dep| level.get(dep.as_str()))
                .map(|l| l + 1)
                .max()
                .unwrap_or(0);
            level.insert(name, wave);
            if waves.len() <= wave {
                waves.resize_with(wave + 1, Vec::new);
            }
            waves[wave].push(name.clone());
        }
        waves
    }

    /// The given modules plus everything they transitively depend on
    pub fn required_by<'a, I>(&self, roots: I) -> BTreeSet<String>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut required = BTreeSet::new();
        let mut stack: Vec<&str> = roots.into_iter().collect();
        while let Some(name) = stack.pop() {
            if !required.insert(name.to_string()) {
                continue;
            }
            if let Some(deps) = self.dependencies.get(name) {
                stack.extend(deps.iter().map(String::as_str));
            }
        }
        required
    }
}

/// Dependency resolver
pub struct ModuleDependencies;

impl ModuleDependencies {
    /// Resolve module dependencies and determine load order
    ///
    /// Ties between simultaneously eligible modules break by ascending name,
    /// so the same input always yields the same order.
    pub fn resolve(descriptors: &[ModuleDescriptor]) -> Result<DependencyResolution> {
        let mut dependencies: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for descriptor in descriptors {
            let mut deps: Vec<String> = Vec::with_capacity(descriptor.dependencies.len());
            for dep in &descriptor.dependencies {
                if !deps.contains(dep) {
                    deps.push(dep.clone());
                }
            }
            dependencies.insert(descriptor.name.clone(), deps);
        }

        // Missing dependencies first, in name order
        for (module, deps) in &dependencies {
            if let Some(missing) = deps.iter().find(|d| !dependencies.contains_key(*d)) {
                return Err(KernelError::UnresolvedDependency {
                    module: module.clone(),
                    dependency: missing.clone(),
                });
            }
        }

        let load_order = Self::topological_sort(&dependencies)?;
        debug!("Dependency resolution complete: {:?}", load_order);

        Ok(DependencyResolution {
            load_order,
            dependencies,
        })
    }

    /// Kahn's algorithm with a name-ordered ready set
    fn topological_sort(dependencies: &BTreeMap<String, Vec<String>>) -> Result<Vec<String>> {
        let mut in_degree: BTreeMap<&str, usize> = BTreeMap::new();
        let mut dependents: BTreeMap<&str, Vec<&str>> = BTreeMap::new();

        for (module, deps) in dependencies {
            in_degree.insert(module, deps.len());
            for dep in deps {
                dependents.entry(dep.as_str()).or_default().push(module);
            }
        }

        let mut ready: BTreeSet<&str> = in_degree
            .iter()
            .filter(|(_, degree)| **degree == 0)
            .map(|(module, _)| *module)
            .collect();

        let mut order = Vec::with_capacity(dependencies.len());
        while let Some(module) = ready.pop_first() {
            order.push(module.to_string());
            for dependent in dependents.get(module).into_iter().flatten() {
                if let Some(degree) = in_degree.get_mut(dependent) {
                    *degree -= 1;
                    if *degree == 0 {
                        ready.insert(*dependent);
                    }
                }
            }
        }

        if order.len() != dependencies.len() {
            let emitted: BTreeSet<&str> = order.iter().map(String::as_str).collect();
            let leftover: BTreeSet<&str> = dependencies
                .keys()
                .map(String::as_str)
                .filter(|m| !emitted.contains(m))
                .collect();
            return Err(KernelError::CyclicDependency {
                members: Self::cycle_members(dependencies, leftover),
            });
        }

        Ok(order)
    }

    /// Modules that lie on a dependency cycle
    ///
    /// Tarjan's strongly connected components over the modules Kahn could
    /// not emit. A component is a cycle when it has more than one member or
    /// its only member depends on itself; everything else is merely stuck
    /// behind one.
    fn cycle_members<'a>(
        dependencies: &'a BTreeMap<String, Vec<String>>,
        leftover: BTreeSet<&'a str>,
    ) -> Vec<String> {
        let mut tarjan = Tarjan {
            dependencies,
            leftover,
            index: HashMap::new(),
            low: HashMap::new(),
            stack: Vec::new(),
            on_stack: HashSet::new(),
            next_index: 0,
            members: BTreeSet::new(),
        };
        let roots: Vec<&str> = tarjan.leftover.iter().copied().collect();
        for root in roots {
            if !tarjan.index.contains_key(root) {
                tarjan.visit(root);
            }
        }
        tarjan.members.into_iter().map(str::to_string).collect()
    }
}

struct Tarjan<'a> {
    dependencies: &'a BTreeMap<String, Vec<String>>,
    leftover: BTreeSet<&'a str>,
    index: HashMap<&'a str, usize>,
    low: HashMap<&'a str, usize>,
    stack: Vec<&'a str>,
    on_stack: HashSet<&'a str>,
    next_index: usize,
    members: BTreeSet<&'a str>,
}

impl<'a> Tarjan<'a> {
    fn visit(&mut self, node: &'a str) {
        self.index.insert(node, self.next_index);
        self.low.insert(node, self.next_index);
        self.next_index += 1;
        self.stack.push(node);
        self.on_stack.insert(node);

        let dependencies = self.dependencies;
        let deps = dependencies.get(node).map(Vec::as_slice).unwrap_or_default();
        for dep in deps.iter().map(String::as_str) {
            if !self.leftover.contains(dep) {
                continue;
            }
            if !self.index.contains_key(dep) {
                self.visit(dep);
                let low = self.low[node].min(self.low[dep]);
                self.low.insert(node, low);
            } else if self.on_stack.contains(dep) {
                let low = self.low[node].min(self.index[dep]);
                self.low.insert(node, low);
            }
        }

        if self.low[node] != self.index[node] {
            return;
        }
        let mut component = Vec::new();
        while let Some(member) = self.stack.pop() {
            self.on_stack.remove(member);
            component.push(member);
            if member == node {
                break;
            }
        }
        if component.len() > 1 || deps.iter().any(|d| d == node) {
            self.members.extend(component);
        }
    }
}
