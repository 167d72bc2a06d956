//! Conflict-based stage splitting.
//!
//! Dependency levels say which systems *may* run together. Systems in the
//! same level can still touch the same component data, so each level is
//! further split into stages whose members have no read/write conflicts.
//! Stages execute sequentially.

use engine_component::AccessDescriptor;

/// A group of systems that can run in parallel (no conflicts).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stage {
    /// Indices into the slice passed to [`compute_stages`].
    pub system_indices: Vec<usize>,
}

/// Splits a set of systems into conflict-free stages.
///
/// The algorithm is a greedy graph colouring:
/// 1. For each system, check if it conflicts with any system already placed
///    in the current stage.
/// 2. If no conflict, add it to the current stage.
/// 3. If conflict, try the next stage, or create a new one.
///
/// This produces a valid (though not necessarily optimal) stage assignment
/// that guarantees no two conflicting systems share a stage. Input order is
/// preserved within each stage.
#[must_use]
pub fn compute_stages(systems: &[&AccessDescriptor]) -> Vec<Stage> {
    let mut stages: Vec<Stage> = Vec::new();

    for (sys_idx, access) in systems.iter().enumerate() {
        let slot = stages.iter_mut().find(|stage| {
            !stage
                .system_indices
                .iter()
                .any(|&existing| access.conflicts_with(systems[existing]))
        });

        match slot {
            Some(stage) => stage.system_indices.push(sys_idx),
            None => stages.push(Stage {
                system_indices: vec![sys_idx],
            }),
        }
    }

    stages
}

#[cfg(test)]
mod tests {
    use engine_component::Component;

    use super::*;

    #[derive(Debug, Default)]
    struct Transform;
    impl Component for Transform {}

    #[derive(Debug, Default)]
    struct Velocity;
    impl Component for Velocity {}

    #[derive(Debug, Default)]
    struct AiState;
    impl Component for AiState {}

    fn physics() -> AccessDescriptor {
        AccessDescriptor::new().read::<Transform>().write::<Velocity>()
    }

    fn ai() -> AccessDescriptor {
        AccessDescriptor::new().read::<Transform>().write::<AiState>()
    }

    fn movement() -> AccessDescriptor {
        AccessDescriptor::new().read::<Velocity>().write::<Transform>()
    }

    #[test]
    fn test_no_systems_no_stages() {
        assert!(compute_stages(&[]).is_empty());
    }

    #[test]
    fn test_single_system_one_stage() {
        let p = physics();
        let stages = compute_stages(&[&p]);
        assert_eq!(stages, vec![Stage { system_indices: vec![0] }]);
    }

    #[test]
    fn test_non_conflicting_systems_same_stage() {
        let (p, a) = (physics(), ai());
        let stages = compute_stages(&[&p, &a]);
        assert_eq!(stages.len(), 1, "non-conflicting systems should share a stage");
        assert_eq!(stages[0].system_indices.len(), 2);
    }

    #[test]
    fn test_conflicting_systems_different_stages() {
        let (p, m) = (physics(), movement());
        let stages = compute_stages(&[&p, &m]);
        assert_eq!(stages.len(), 2, "conflicting systems must be in separate stages");
    }

    #[test]
    fn test_three_systems_two_stages() {
        //   Physics : reads Transform, writes Velocity
        //   AI      : reads Transform, writes AiState
        //   Movement: reads Velocity, writes Transform
        // Expected: [Physics, AI], [Movement]
        let (p, a, m) = (physics(), ai(), movement());
        let stages = compute_stages(&[&p, &a, &m]);
        assert_eq!(stages.len(), 2);
        assert_eq!(stages[0].system_indices, vec![0, 1]);
        assert_eq!(stages[1].system_indices, vec![2]);
    }
}
