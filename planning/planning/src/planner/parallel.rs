use crate::conditions::EvalCtx;
use crate::domain::Domain;
use crate::facts::FactOptional;
use crate::ontology::SetOfTypes;
use crate::operators::{Action, ActionInvocationWithGoal};
use crate::planner::{plan_for_every_goal_with_config, PlannerConfig};
use crate::problem::Problem;
use crate::time::Timestamp;
use std::ops::ControlFlow;

/// A plan whose steps may hold several invocations each: invocations of one
/// step are independent and can run in any order, or simultaneously.
#[derive(Clone, Debug, Default)]
pub struct ParallelPlan {
    pub steps: Vec<Vec<ActionInvocationWithGoal>>,
}

impl ParallelPlan {
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

/// Per-invocation caches of the ground literals the compatibility checks
/// need: the effect literals (at-start, main and potential) and the literals
/// of the precondition and over-all condition.
struct ActionDataForParallelisation {
    invocation: ActionInvocationWithGoal,
    effects: Vec<FactOptional>,
    condition_literals: Vec<FactOptional>,
}

impl ActionDataForParallelisation {
    fn new(action: &Action, invocation: ActionInvocationWithGoal) -> ActionDataForParallelisation {
        let bindings = invocation.action_invocation.bindings();
        let mut effects = Vec::new();
        for wsm in [
            &action.effect.world_state_modification_at_start,
            &action.effect.world_state_modification,
            &action.effect.potential_world_state_modification,
        ]
        .into_iter()
        .flatten()
        {
            let _ = wsm.substitute(&bindings).for_each_modified_fact(&mut |opt| {
                effects.push(opt.clone());
                ControlFlow::Continue(())
            });
        }
        let mut condition_literals = Vec::new();
        for condition in [&action.precondition, &action.over_all_condition].into_iter().flatten() {
            let _ = condition.substitute(&bindings).for_each_opt_fact(&mut |opt| {
                condition_literals.push(opt.clone());
                ControlFlow::Continue(())
            });
        }
        ActionDataForParallelisation {
            invocation,
            effects,
            condition_literals,
        }
    }

    /// Two invocations can share a step when neither's effects touch what
    /// the other requires, and their effects cannot contradict each other.
    /// Touching a required literal covers both contradiction and dependence:
    /// either way the in-step order would become observable.
    fn can_run_in_parallel(&self, other: &ActionDataForParallelisation, types: &SetOfTypes) -> bool {
        let touches = |effects: &[FactOptional], required: &[FactOptional]| {
            effects
                .iter()
                .any(|e| required.iter().any(|r| e.pattern.can_unify(&r.pattern, types)))
        };
        if touches(&self.effects, &other.condition_literals) || touches(&other.effects, &self.condition_literals) {
            return false;
        }
        !self
            .effects
            .iter()
            .any(|e| other.effects.iter().any(|o| e.contradicts(o, types)))
    }

    fn can_join(&self, step: &[ActionDataForParallelisation], types: &SetOfTypes) -> bool {
        step.iter().all(|member| self.can_run_in_parallel(member, types))
    }
}

/// Plans for every goal, then greedily merges successive actions into
/// parallel steps. Applying each step's members in any order yields the same
/// world as the serial plan.
pub fn parallel_plan_for_every_goals(
    problem: &Problem,
    domain: &Domain,
    now: Option<Timestamp>,
) -> ParallelPlan {
    let serial = plan_for_every_goal_with_config(problem, domain, now, PlannerConfig::default());
    parallelize(serial, domain)
}

/// The invocations that can start right now: the first step of the parallel
/// plan.
pub fn actions_to_do_in_parallel_now(
    problem: &Problem,
    domain: &Domain,
    now: Option<Timestamp>,
) -> Vec<ActionInvocationWithGoal> {
    parallel_plan_for_every_goals(problem, domain, now)
        .steps
        .into_iter()
        .next()
        .unwrap_or_default()
}

fn parallelize(serial: Vec<ActionInvocationWithGoal>, domain: &Domain) -> ParallelPlan {
    let types = &domain.ontology().types;
    let mut steps: Vec<Vec<ActionDataForParallelisation>> = Vec::new();
    for invocation in serial {
        let Some(action) = domain.action(&invocation.action_invocation.action_id) else {
            continue;
        };
        let data = ActionDataForParallelisation::new(action, invocation);
        match steps.last_mut() {
            Some(step) if data.can_join(step, types) => step.push(data),
            _ => steps.push(vec![data]),
        }
    }
    ParallelPlan {
        steps: steps
            .into_iter()
            .map(|step| step.into_iter().map(|d| d.invocation).collect())
            .collect(),
    }
}

/// Checks pairwise independence of a set of invocations, for embedders that
/// assembled a step by other means.
pub fn all_independent(invocations: &[ActionInvocationWithGoal], domain: &Domain) -> bool {
    let types = &domain.ontology().types;
    let data: Vec<ActionDataForParallelisation> = invocations
        .iter()
        .filter_map(|inv| {
            domain
                .action(&inv.action_invocation.action_id)
                .map(|a| ActionDataForParallelisation::new(a, inv.clone()))
        })
        .collect();
    if data.len() != invocations.len() {
        return false;
    }
    data.iter().enumerate().all(|(i, a)| {
        data.iter()
            .skip(i + 1)
            .all(|b| a.can_run_in_parallel(b, types))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::goals::Goal;
    use crate::ontology::{Ontology, SetOfEntities, SetOfPredicates, SetOfTypes};
    use crate::operators::action_from_str;
    use std::collections::BTreeMap;

    fn independent_domain() -> (Domain, Problem) {
        let types = SetOfTypes::new();
        let predicates = SetOfPredicates::from_str("fact_a\nfact_b\nfact_c", &types).unwrap();
        let ontology = Ontology {
            types,
            predicates,
            constants: SetOfEntities::new(),
        };
        let entities = SetOfEntities::new();
        let mut actions = BTreeMap::new();
        actions.insert(
            "a1".to_string(),
            action_from_str("", "fact_a", Vec::new(), &ontology, &entities).unwrap(),
        );
        actions.insert(
            "a2".to_string(),
            action_from_str("", "fact_b", Vec::new(), &ontology, &entities).unwrap(),
        );
        actions.insert(
            "a3".to_string(),
            action_from_str("fact_a & fact_b", "fact_c", Vec::new(), &ontology, &entities).unwrap(),
        );
        let domain = Domain::new(actions, ontology);
        let problem = Problem::new(&domain);
        (domain, problem)
    }

    #[test]
    fn independent_actions_share_a_step() {
        let (domain, mut problem) = independent_domain();
        let goal = Goal::from_str("fact_c", domain.ontology(), &problem.entities).unwrap();
        problem.set_goals_at(vec![goal], 10, &domain, None);
        let plan = parallel_plan_for_every_goals(&problem, &domain, None);
        assert_eq!(plan.steps.len(), 2);
        let step0: Vec<&str> = plan.steps[0]
            .iter()
            .map(|s| s.action_invocation.action_id.as_str())
            .collect();
        assert_eq!(step0, vec!["a1", "a2"]);
        let step1: Vec<&str> = plan.steps[1]
            .iter()
            .map(|s| s.action_invocation.action_id.as_str())
            .collect();
        assert_eq!(step1, vec!["a3"]);
    }

    #[test]
    fn first_step_is_what_can_start_now() {
        let (domain, mut problem) = independent_domain();
        let goal = Goal::from_str("fact_c", domain.ontology(), &problem.entities).unwrap();
        problem.set_goals_at(vec![goal], 10, &domain, None);
        let now_actions = actions_to_do_in_parallel_now(&problem, &domain, None);
        let ids: Vec<&str> = now_actions
            .iter()
            .map(|s| s.action_invocation.action_id.as_str())
            .collect();
        assert_eq!(ids, vec!["a1", "a2"]);
    }
}
