use std::collections::HashSet;

use crate::error::GraphError;
use crate::stage::{StageDefinition, StageId};

/// Validated stage DAG with a fixed execution order.
///
/// The order is topological. Among stages that are ready at the same time the
/// one declared first runs first, so a declaration already in dependency
/// order executes exactly as declared.
#[derive(Debug, Clone)]
pub struct StageGraph {
    stages: Vec<StageDefinition>,
}

impl StageGraph {
    pub fn new(stages: Vec<StageDefinition>) -> Result<Self, GraphError> {
        let mut seen = HashSet::new();
        for stage in &stages {
            if !seen.insert(stage.id) {
                return Err(GraphError::DuplicateStage(stage.id));
            }
        }
        for stage in &stages {
            if let Some(dependency) = stage.depends_on.iter().find(|d| !seen.contains(*d)) {
                return Err(GraphError::UnknownDependency {
                    stage: stage.id,
                    dependency: *dependency,
                });
            }
        }

        let mut pending = stages;
        let mut ordered: Vec<StageDefinition> = Vec::with_capacity(pending.len());
        let mut done: HashSet<StageId> = HashSet::new();
        while !pending.is_empty() {
            let ready = pending
                .iter()
                .position(|stage| stage.depends_on.iter().all(|d| done.contains(d)));
            match ready {
                Some(index) => {
                    let stage = pending.remove(index);
                    done.insert(stage.id);
                    ordered.push(stage);
                }
                None => return Err(GraphError::Cycle(pending[0].id)),
            }
        }

        Ok(Self { stages: ordered })
    }

    pub fn stages(&self) -> &[StageDefinition] {
        &self.stages
    }

    pub fn order(&self) -> Vec<StageId> {
        self.stages.iter().map(|stage| stage.id).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prompts;

    fn standard() -> Vec<StageDefinition> {
        prompts::standard_stages().unwrap()
    }

    #[test]
    fn standard_stages_run_in_declared_order() {
        let graph = StageGraph::new(standard()).unwrap();
        assert_eq!(graph.order(), vec![StageId::Monitor, StageId::Profile, StageId::Defend]);
    }

    #[test]
    fn out_of_order_declaration_is_sorted() {
        let mut stages = standard();
        stages.reverse();
        let graph = StageGraph::new(stages).unwrap();
        assert_eq!(graph.order(), vec![StageId::Monitor, StageId::Profile, StageId::Defend]);
    }

    #[test]
    fn duplicate_stage_is_rejected() {
        let mut stages = standard();
        stages.push(stages[0].clone());
        assert_eq!(
            StageGraph::new(stages).unwrap_err(),
            GraphError::DuplicateStage(StageId::Monitor)
        );
    }

    #[test]
    fn unknown_dependency_is_rejected() {
        let stages: Vec<_> = standard()
            .into_iter()
            .filter(|stage| stage.id != StageId::Monitor)
            .collect();
        assert_eq!(
            StageGraph::new(stages).unwrap_err(),
            GraphError::UnknownDependency {
                stage: StageId::Profile,
                dependency: StageId::Monitor,
            }
        );
    }

    #[test]
    fn cycle_is_rejected() {
        let mut stages = standard();
        stages[0].depends_on.push(StageId::Defend);
        assert!(matches!(StageGraph::new(stages), Err(GraphError::Cycle(_))));
    }
}
