//! [`Resolver`] – dependency-ordered install plans.
//!
//! Resolution is a depth-first walk over `dependencies.modules`.  For each
//! module the newest registry version satisfying the active constraint is
//! selected and its dependencies are resolved before it is appended to the
//! plan, so [`InstallPlan::order`] always lists dependencies first.
//!
//! A module already in the plan is never re-selected: a later constraint it
//! satisfies is a no-op and one it violates is a version conflict.  This
//! check runs before cycle detection.  Cycles are detected with a per-name
//! mark that is set while the module's subtree is being walked.

use std::collections::HashMap;

use tracing::debug;

use crate::error::ModuleError;
use crate::registry::{ModuleRecord, Registry};
use crate::version::{VersionConstraint, parse_module_dependency};

/// Ordered install sequence plus the record chosen for each module.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InstallPlan {
    /// Module names, dependencies before dependents.
    pub order: Vec<String>,
    pub modules: HashMap<String, ModuleRecord>,
}

impl InstallPlan {
    /// Selected records in install order.
    pub fn records(&self) -> impl Iterator<Item = &ModuleRecord> {
        self.order.iter().filter_map(|name| self.modules.get(name))
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    InProgress,
    Done,
}

/// Resolves install plans against a borrowed [`Registry`].
#[derive(Debug, Clone, Copy)]
pub struct Resolver<'a> {
    registry: &'a Registry,
}

impl<'a> Resolver<'a> {
    pub fn new(registry: &'a Registry) -> Self {
        Self { registry }
    }

    /// Resolve `targets` (each `name` or `name@constraint`) into a plan.
    /// Empty targets are skipped.
    ///
    /// ```
    /// use aistack_module::{ModuleRecord, Registry, Resolver};
    ///
    /// let mut registry = Registry::new();
    /// for (name, deps) in [("a", "[b]"), ("b", "[]")] {
    ///     let yaml = format!(
    ///         "name: {name}\ncategory: tool\nversion: '1.0.0'\ndescription: d\n\
    ///          runtime: {{ modes: [native] }}\ndependencies: {{ modules: {deps} }}\n"
    ///     );
    ///     registry.add(ModuleRecord::from_yaml(&yaml, None).unwrap()).unwrap();
    /// }
    /// let plan = Resolver::new(&registry).resolve_install_plan(&["a@>=1.0.0"]).unwrap();
    /// assert_eq!(plan.order, ["b", "a"]);
    /// ```
    pub fn resolve_install_plan<S: AsRef<str>>(
        &self,
        targets: &[S],
    ) -> Result<InstallPlan, ModuleError> {
        let mut plan = InstallPlan::default();
        let mut marks: HashMap<String, Mark> = HashMap::new();

        for target in targets {
            let target = target.as_ref();
            if target.trim().is_empty() {
                continue;
            }
            let (name, constraint) = parse_module_dependency(target)?;
            self.resolve_module(&name, constraint.as_ref(), &mut marks, &mut plan)?;
        }

        debug!(targets = targets.len(), planned = plan.len(), order = ?plan.order, "install plan resolved");
        Ok(plan)
    }

    fn resolve_module(
        &self,
        name: &str,
        constraint: Option<&VersionConstraint>,
        marks: &mut HashMap<String, Mark>,
        plan: &mut InstallPlan,
    ) -> Result<(), ModuleError> {
        if let Some(existing) = plan.modules.get(name) {
            if let Some(c) = constraint
                && !c.matches(&existing.version)
            {
                return Err(ModuleError::VersionConflict {
                    name: name.to_string(),
                    selected: existing.version.to_string(),
                    constraint: c.to_string(),
                });
            }
            return Ok(());
        }
        if marks.get(name) == Some(&Mark::InProgress) {
            return Err(ModuleError::CircularDependency(name.to_string()));
        }
        marks.insert(name.to_string(), Mark::InProgress);

        let record = self.select_record(name, constraint)?;
        for dep in &record.manifest.dependencies.modules {
            let (dep_name, dep_constraint) = parse_module_dependency(dep)?;
            self.resolve_module(&dep_name, dep_constraint.as_ref(), marks, plan)?;
        }

        plan.order.push(name.to_string());
        plan.modules.insert(name.to_string(), record.clone());
        marks.insert(name.to_string(), Mark::Done);
        Ok(())
    }

    fn select_record(
        &self,
        name: &str,
        constraint: Option<&VersionConstraint>,
    ) -> Result<&'a ModuleRecord, ModuleError> {
        let records = self.registry.get(name);
        if records.is_empty() {
            return Err(ModuleError::NotFound(name.to_string()));
        }
        records
            .iter()
            .find(|r| constraint.is_none_or(|c| c.matches(&r.version)))
            .ok_or_else(|| ModuleError::NoSatisfyingVersion {
                name: name.to_string(),
                constraint: constraint.map(ToString::to_string).unwrap_or_default(),
            })
    }
}
