use std::collections::{HashMap, HashSet, VecDeque};

use thiserror::Error;
use tracing::{debug, error, warn};

use crate::curriculum::types::{Difficulty, Module, ModuleId};
use crate::db::{CurriculumStore, StoreError};

const DEFAULT_ALTERNATIVE_BRANCHES: usize = 3;
const DEFAULT_ALTERNATIVE_DEPTH: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IntegrityViolation {
    #[error("circular dependency detected involving module {module_id}")]
    Cycle { module_id: ModuleId },
    #[error("module {module_id} has missing prerequisite {prerequisite_id}")]
    MissingPrerequisite {
        module_id: ModuleId,
        prerequisite_id: ModuleId,
    },
}

/// Read-time projection of a learning path: modules as nodes, "requires"
/// edges as prerequisites. Modules live in an arena ordered by
/// `(order_index, id)`; `index` maps ids into it.
#[derive(Debug, Clone)]
pub struct PathGraph {
    learning_path_id: String,
    modules: Vec<Module>,
    index: HashMap<ModuleId, usize>,
    prerequisites: HashMap<ModuleId, Vec<ModuleId>>,
    dependents: HashMap<ModuleId, Vec<ModuleId>>,
}

impl PathGraph {
    pub fn new(learning_path_id: impl Into<String>, mut modules: Vec<Module>) -> Self {
        modules.sort_by(|a, b| a.order_index.cmp(&b.order_index).then_with(|| a.id.cmp(&b.id)));

        let mut index = HashMap::with_capacity(modules.len());
        let mut prerequisites: HashMap<ModuleId, Vec<ModuleId>> = HashMap::with_capacity(modules.len());
        let mut dependents: HashMap<ModuleId, Vec<ModuleId>> = HashMap::new();

        let mut deduped = Vec::with_capacity(modules.len());
        for module in modules {
            if index.contains_key(&module.id) {
                warn!(module_id = %module.id, "duplicate module id in learning path, keeping first");
                continue;
            }
            index.insert(module.id.clone(), deduped.len());
            deduped.push(module);
        }

        for module in &deduped {
            let mut seen = HashSet::new();
            let prereqs: Vec<ModuleId> = module
                .prerequisites
                .iter()
                .filter(|p| seen.insert(p.as_str()))
                .cloned()
                .collect();
            for prereq in &prereqs {
                dependents.entry(prereq.clone()).or_default().push(module.id.clone());
            }
            prerequisites.insert(module.id.clone(), prereqs);
        }

        let learning_path_id = learning_path_id.into();
        debug!(learning_path_id = %learning_path_id, modules = deduped.len(), "built prerequisite graph");

        Self {
            learning_path_id,
            modules: deduped,
            index,
            prerequisites,
            dependents,
        }
    }

    /// Fresh projection of the path's module rows; never cached.
    pub async fn load(store: &dyn CurriculumStore, learning_path_id: &str) -> Result<Self, StoreError> {
        let modules = store.load_modules(learning_path_id).await?;
        Ok(Self::new(learning_path_id, modules))
    }

    pub fn learning_path_id(&self) -> &str {
        &self.learning_path_id
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// Modules in `(order_index, id)` order.
    pub fn modules(&self) -> &[Module] {
        &self.modules
    }

    pub fn module(&self, id: &str) -> Option<&Module> {
        self.index.get(id).map(|&i| &self.modules[i])
    }

    pub(crate) fn position(&self, id: &str) -> Option<usize> {
        self.index.get(id).copied()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    pub fn prerequisites_of(&self, id: &str) -> &[ModuleId] {
        self.prerequisites.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn dependents_of(&self, id: &str) -> &[ModuleId] {
        self.dependents.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Modules not yet completed whose every prerequisite is completed.
    pub fn available_modules(&self, completed: &HashSet<ModuleId>) -> Vec<&Module> {
        self.modules
            .iter()
            .filter(|m| !completed.contains(&m.id))
            .filter(|m| self.prerequisites_of(&m.id).iter().all(|p| completed.contains(p)))
            .collect()
    }

    pub fn next_recommended(&self, completed: &HashSet<ModuleId>, count: usize) -> Vec<&Module> {
        let mut available = self.available_modules(completed);
        available.truncate(count);
        available
    }

    /// Every transitive prerequisite of `id`, each at most once, foundation first.
    pub fn prerequisite_review_chain(&self, id: &str) -> Vec<&Module> {
        let mut visited: HashSet<&str> = HashSet::new();
        let mut chain = Vec::new();
        let mut queue: VecDeque<&str> = self.prerequisites_of(id).iter().map(String::as_str).collect();

        while let Some(prereq_id) = queue.pop_front() {
            if visited.contains(prereq_id) {
                continue;
            }
            let Some(module) = self.module(prereq_id) else {
                continue;
            };
            visited.insert(prereq_id);
            chain.push(module);

            for sub in self.prerequisites_of(prereq_id) {
                if !visited.contains(sub.as_str()) {
                    queue.push_back(sub);
                }
            }
        }

        chain.sort_by(|a, b| a.order_index.cmp(&b.order_index).then_with(|| a.id.cmp(&b.id)));
        chain
    }

    pub fn path_difficulty_score(&self) -> f64 {
        if self.modules.is_empty() {
            return 0.0;
        }
        let total: f64 = self.modules.iter().map(|m| m.difficulty.base_score()).sum();
        round2(total / self.modules.len() as f64)
    }

    pub fn validate_integrity(&self) -> bool {
        match self.integrity_report() {
            Ok(()) => true,
            Err(violation @ IntegrityViolation::Cycle { .. }) => {
                error!(learning_path_id = %self.learning_path_id, %violation, "learning path failed integrity check");
                false
            }
            Err(violation) => {
                warn!(learning_path_id = %self.learning_path_id, %violation, "learning path failed integrity check");
                false
            }
        }
    }

    /// Cycle check (iterative DFS over dependents with an on-stack marker),
    /// then orphan prerequisite check.
    pub fn integrity_report(&self) -> Result<(), IntegrityViolation> {
        if let Some(module_id) = self.find_cycle() {
            return Err(IntegrityViolation::Cycle { module_id });
        }

        for module in &self.modules {
            for prereq in self.prerequisites_of(&module.id) {
                if !self.contains(prereq) {
                    return Err(IntegrityViolation::MissingPrerequisite {
                        module_id: module.id.clone(),
                        prerequisite_id: prereq.clone(),
                    });
                }
            }
        }

        Ok(())
    }

    fn find_cycle(&self) -> Option<ModuleId> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Unvisited,
            OnStack,
            Done,
        }

        let mut marks = vec![Mark::Unvisited; self.modules.len()];

        for root in 0..self.modules.len() {
            if marks[root] != Mark::Unvisited {
                continue;
            }
            marks[root] = Mark::OnStack;
            let mut stack: Vec<(usize, usize)> = vec![(root, 0)];

            while let Some(top) = stack.last_mut() {
                let (node, next_child) = *top;
                let children = self.dependents_of(&self.modules[node].id);
                if next_child < children.len() {
                    top.1 += 1;
                    let child_id = &children[next_child];
                    let Some(&child) = self.index.get(child_id) else {
                        continue;
                    };
                    match marks[child] {
                        Mark::Unvisited => {
                            marks[child] = Mark::OnStack;
                            stack.push((child, 0));
                        }
                        Mark::OnStack => return Some(self.modules[child].id.clone()),
                        Mark::Done => {}
                    }
                } else {
                    marks[node] = Mark::Done;
                    stack.pop();
                }
            }
        }

        None
    }

    /// Same-type modules no harder than `max_difficulty`, easiest first.
    pub fn easier_alternatives(&self, id: &str, max_difficulty: Difficulty) -> Vec<&Module> {
        let Some(target) = self.module(id) else {
            return Vec::new();
        };

        let mut alternatives: Vec<&Module> = self
            .modules
            .iter()
            .filter(|m| m.id != target.id)
            .filter(|m| m.module_type == target.module_type && m.difficulty.rank() <= max_difficulty.rank())
            .collect();
        alternatives.sort_by_key(|m| m.difficulty.rank());
        alternatives
    }

    pub fn alternative_sequences(&self, from_id: &str, completed: &HashSet<ModuleId>) -> Vec<Vec<ModuleId>> {
        self.alternative_sequences_with(
            from_id,
            completed,
            DEFAULT_ALTERNATIVE_BRANCHES,
            DEFAULT_ALTERNATIVE_DEPTH,
        )
    }

    /// Greedy walks starting from each available module other than `from_id`;
    /// every walk then extends `depth` times with the first available module.
    pub fn alternative_sequences_with(
        &self,
        from_id: &str,
        completed: &HashSet<ModuleId>,
        branches: usize,
        depth: usize,
    ) -> Vec<Vec<ModuleId>> {
        let mut sequences = Vec::new();

        for start in self.available_modules(completed) {
            if sequences.len() >= branches {
                break;
            }
            if start.id == from_id {
                continue;
            }

            let mut walk_completed = completed.clone();
            walk_completed.insert(start.id.clone());
            let mut sequence = vec![start.id.clone()];

            for _ in 0..depth {
                let Some(next) = self.available_modules(&walk_completed).into_iter().next() else {
                    break;
                };
                sequence.push(next.id.clone());
                walk_completed.insert(next.id.clone());
            }

            sequences.push(sequence);
        }

        sequences
    }
}

pub(crate) fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
