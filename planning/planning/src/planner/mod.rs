pub mod parallel;

use crate::conditions::{Condition, EvalCtx};
use crate::domain::Domain;
use crate::effects::WsModification;
use crate::facts::{Bindings, FactOptional};
use crate::goal_stack::LookForAnActionOutputInfos;
use crate::goals::Goal;
use crate::ontology::Entity;
use crate::operators::{Action, ActionId, ActionInvocation, ActionInvocationWithGoal};
use crate::problem::{Historical, Problem};
use crate::time::Timestamp;
use crate::world_state::WorldState;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, trace};

/// Bounds of one planning call.
#[derive(Copy, Clone, Debug)]
pub struct PlannerConfig {
    /// How deep the enabling-action recursion may go.
    pub max_depth: usize,
    /// How many steps `plan_for_every_goal` may emit.
    pub max_plan_length: usize,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        PlannerConfig {
            max_depth: 10,
            max_plan_length: 100,
        }
    }
}

/// Picks the next action to do: the one making progress toward the first
/// unsatisfied goal of the highest priority tier. Non-persistent goals that
/// no action can serve are dropped along the way.
pub fn look_for_an_action_to_do(
    problem: &mut Problem,
    domain: &Domain,
    now: Option<Timestamp>,
    output: Option<&mut LookForAnActionOutputInfos>,
) -> Option<ActionInvocationWithGoal> {
    look_for_an_action_to_do_with_config(problem, domain, now, output, PlannerConfig::default())
}

pub fn look_for_an_action_to_do_with_config(
    problem: &mut Problem,
    domain: &Domain,
    now: Option<Timestamp>,
    mut output: Option<&mut LookForAnActionOutputInfos>,
    config: PlannerConfig,
) -> Option<ActionInvocationWithGoal> {
    let Problem {
        world_state,
        goal_stack,
        entities,
        historical,
        ..
    } = problem;
    let ctx = EvalCtx::new(domain.ontology(), entities);
    let mut result: Option<ActionInvocationWithGoal> = None;
    goal_stack.iterate_and_remove_non_persistent(
        |goal, priority| {
            goal.refresh_cache_if_needed(domain);
            match search_for_goal(goal, world_state, &ctx, historical, domain, config) {
                Some((action_id, parameters)) => {
                    goal.notify_activity();
                    let invocation = ActionInvocation::new(action_id, parameters);
                    debug!(action = %invocation, goal = %goal, "found action to do");
                    result = Some(ActionInvocationWithGoal::new(
                        invocation,
                        Some(goal.clone()),
                        Some(priority),
                    ));
                    true
                }
                None => {
                    trace!(goal = %goal, "no action for goal");
                    false
                }
            }
        },
        world_state,
        &ctx,
        now,
        output.as_deref_mut(),
    );
    result
}

/// Searches an action making progress toward `goal`, possibly through a
/// chain of enabling actions; returns the invocation to do now.
fn search_for_goal(
    goal: &Goal,
    world: &WorldState,
    ctx: &EvalCtx,
    historical: &Historical,
    domain: &Domain,
    config: PlannerConfig,
) -> Option<(ActionId, BTreeMap<String, Entity>)> {
    let literals = goal.objective_literals();
    let candidates = rank_candidates(goal.actions_that_can_satisfy(), world, ctx, historical, domain);
    let allowed = goal.action_predecessors();
    let mut in_flight: BTreeSet<ActionId> = BTreeSet::new();
    for action_id in candidates {
        let Some(action) = domain.action(&action_id) else { continue };
        in_flight.insert(action_id.clone());
        let found = try_action(
            &action_id,
            action,
            &literals,
            Some(goal.objective()),
            allowed,
            world,
            ctx,
            historical,
            domain,
            0,
            &mut in_flight,
            config,
        );
        in_flight.remove(&action_id);
        if found.is_some() {
            return found;
        }
    }
    None
}

/// Attempts one action against a set of wanted literals. When its
/// precondition fails, recurses to find an enabling action instead.
#[allow(clippy::too_many_arguments)]
fn try_action(
    action_id: &str,
    action: &Action,
    wanted: &[FactOptional],
    whole_objective: Option<&Condition>,
    allowed: &BTreeSet<ActionId>,
    world: &WorldState,
    ctx: &EvalCtx,
    historical: &Historical,
    domain: &Domain,
    depth: usize,
    in_flight: &mut BTreeSet<ActionId>,
    config: PlannerConfig,
) -> Option<(ActionId, BTreeMap<String, Entity>)> {
    let mut pre_bindings = Bindings::new();
    let precondition_ok = precondition_holds(action, world, ctx, &mut pre_bindings);

    if precondition_ok {
        for assignment in complete_assignments(action, &pre_bindings, ctx) {
            let bindings = assignment_bindings(&assignment);
            if !precondition_holds(action, world, ctx, &mut bindings.clone()) {
                continue;
            }
            let Some(simulated) = simulate_action(action, &bindings, world, ctx, domain) else {
                continue;
            };
            let objective_met = whole_objective.map(|c| simulated.holds(c, ctx)).unwrap_or(false);
            if objective_met || makes_progress(wanted, world, &simulated, ctx) {
                return Some((action_id.to_string(), assignment));
            }
        }
        None
    } else if depth < config.max_depth {
        // the action could serve the goal but cannot run yet: look for an
        // action enabling its missing precondition literals
        let missing: Vec<FactOptional> = action
            .precondition_literals()
            .into_iter()
            .filter(|opt| !world.is_opt_fact_satisfied(opt, ctx))
            .collect();
        if missing.is_empty() {
            return None;
        }
        for enabler_id in rank_candidates(allowed, world, ctx, historical, domain) {
            let enabler_id = &enabler_id;
            if in_flight.contains(enabler_id) {
                continue;
            }
            let Some(enabler) = domain.action(enabler_id) else { continue };
            let can_help = enabler.effect_literals().iter().any(|effect| {
                missing
                    .iter()
                    .any(|m| m.negated == effect.negated && m.pattern.can_unify(&effect.pattern, &domain.ontology().types))
            });
            if !can_help {
                continue;
            }
            in_flight.insert(enabler_id.clone());
            let found = try_action(
                enabler_id,
                enabler,
                &missing,
                None,
                allowed,
                world,
                ctx,
                historical,
                domain,
                depth + 1,
                in_flight,
                config,
            );
            in_flight.remove(enabler_id);
            if found.is_some() {
                return found;
            }
        }
        None
    } else {
        None
    }
}

fn precondition_holds(action: &Action, world: &WorldState, ctx: &EvalCtx, bindings: &mut Bindings) -> bool {
    if let Some(pre) = &action.precondition {
        if !pre.eval(world.facts(), ctx, bindings) {
            return false;
        }
    }
    if let Some(over_all) = &action.over_all_condition {
        if !over_all.eval(world.facts(), ctx, bindings) {
            return false;
        }
    }
    true
}

/// All ways of giving each parameter a single value, honoring candidate sets
/// the precondition evaluation produced.
fn complete_assignments(action: &Action, bindings: &Bindings, ctx: &EvalCtx) -> Vec<BTreeMap<String, Entity>> {
    let mut assignments: Vec<BTreeMap<String, Entity>> = vec![BTreeMap::new()];
    for param in &action.parameters {
        let candidates: Vec<Entity> = match bindings.get(&param.name) {
            Some(values) => values.iter().cloned().collect(),
            None => ctx.instances_of_type(param.tpe),
        };
        if candidates.is_empty() {
            return Vec::new();
        }
        let mut next = Vec::with_capacity(assignments.len() * candidates.len());
        for assignment in &assignments {
            for value in &candidates {
                let mut extended = assignment.clone();
                extended.insert(param.name.clone(), value.clone());
                next.push(extended);
            }
        }
        assignments = next;
    }
    assignments
}

fn assignment_bindings(assignment: &BTreeMap<String, Entity>) -> Bindings {
    assignment
        .iter()
        .map(|(name, value)| (name.clone(), BTreeSet::from([value.clone()])))
        .collect()
}

/// Applies the action's whole declared effect (at-start, main and potential)
/// on a copy of the world, events included.
fn simulate_action(
    action: &Action,
    bindings: &Bindings,
    world: &WorldState,
    ctx: &EvalCtx,
    domain: &Domain,
) -> Option<WorldState> {
    let combined = WsModification::merge(
        action.effect.world_state_modification_at_start.clone(),
        WsModification::merge(
            action.effect.world_state_modification.clone(),
            action.effect.potential_world_state_modification.clone(),
        ),
    );
    let mut simulated = world.clone();
    simulated.modify(combined.as_ref(), domain.events(), ctx, bindings).ok()?;
    Some(simulated)
}

/// At least one wanted literal becomes true and none of the already-true
/// ones is lost.
fn makes_progress(wanted: &[FactOptional], before: &WorldState, after: &WorldState, ctx: &EvalCtx) -> bool {
    let mut newly_satisfied = false;
    for literal in wanted {
        let was = before.is_opt_fact_satisfied(literal, ctx);
        let is = after.is_opt_fact_satisfied(literal, ctx);
        if was && !is {
            return false;
        }
        if !was && is {
            newly_satisfied = true;
        }
    }
    newly_satisfied
}

/// Deterministic candidate order: the asap flag first, then a holding
/// prefer-in-context condition, then the least-executed, then the id.
fn rank_candidates(
    candidates: &BTreeSet<ActionId>,
    world: &WorldState,
    ctx: &EvalCtx,
    historical: &Historical,
    domain: &Domain,
) -> Vec<ActionId> {
    let mut ranked: Vec<(bool, bool, u32, ActionId)> = candidates
        .iter()
        .filter_map(|id| {
            let action = domain.action(id)?;
            let asap = action.should_be_done_asap_without_history_check;
            let preferred = action
                .prefer_in_context
                .as_ref()
                .map(|c| world.holds(c, ctx))
                .unwrap_or(false);
            let executions = if asap { 0 } else { historical.count(id) };
            Some((asap, preferred, executions, id.clone()))
        })
        .collect();
    ranked.sort_by(|a, b| {
        b.0.cmp(&a.0)
            .then(b.1.cmp(&a.1))
            .then(a.2.cmp(&b.2))
            .then(a.3.cmp(&b.3))
    });
    ranked.into_iter().map(|(_, _, _, id)| id).collect()
}

/// Plans the actions serving the most important reachable goal. With
/// `try_to_do_more`, keeps planning until that goal is satisfied; otherwise
/// returns at most one action.
pub fn plan_for_more_important_goal_possible(
    problem: &Problem,
    domain: &Domain,
    try_to_do_more: bool,
    now: Option<Timestamp>,
) -> Vec<ActionInvocationWithGoal> {
    let mut working = problem.clone();
    let mut plan: Vec<ActionInvocationWithGoal> = Vec::new();
    let config = PlannerConfig::default();
    while plan.len() < config.max_plan_length {
        let Some(step) = look_for_an_action_to_do_with_config(&mut working, domain, now, None, config) else {
            break;
        };
        let same_goal = match (plan.first(), &step.from_goal) {
            (None, _) => true,
            (Some(first), Some(goal)) => first.from_goal.as_ref() == Some(goal),
            (Some(_), None) => false,
        };
        if !same_goal {
            break;
        }
        if working.notify_action_done(&step, domain, now, None).is_err() {
            break;
        }
        plan.push(step);
        if !try_to_do_more {
            break;
        }
    }
    plan
}

/// Plans until every reachable goal is satisfied or abandoned, simulating
/// each step on a working copy of the problem.
pub fn plan_for_every_goal(
    problem: &Problem,
    domain: &Domain,
    now: Option<Timestamp>,
) -> Vec<ActionInvocationWithGoal> {
    plan_for_every_goal_with_config(problem, domain, now, PlannerConfig::default())
}

pub fn plan_for_every_goal_with_config(
    problem: &Problem,
    domain: &Domain,
    now: Option<Timestamp>,
    config: PlannerConfig,
) -> Vec<ActionInvocationWithGoal> {
    let mut working = problem.clone();
    let mut plan: Vec<ActionInvocationWithGoal> = Vec::new();
    while plan.len() < config.max_plan_length {
        let Some(step) = look_for_an_action_to_do_with_config(&mut working, domain, now, None, config) else {
            break;
        };
        if working.notify_action_done(&step, domain, now, None).is_err() {
            break;
        }
        plan.push(step);
    }
    plan
}

/// Re-checks that a previously computed plan is still valid: every step's
/// precondition holds at its turn.
pub fn evaluate_plan(
    plan: &[ActionInvocationWithGoal],
    problem: &Problem,
    domain: &Domain,
    now: Option<Timestamp>,
) -> bool {
    let mut working = problem.clone();
    for step in plan {
        let Some(action) = domain.action(&step.action_invocation.action_id) else {
            return false;
        };
        let ctx = EvalCtx::new(domain.ontology(), &working.entities);
        let mut bindings = step.action_invocation.bindings();
        let ok = action
            .precondition
            .as_ref()
            .map(|c| c.eval(working.world_state.facts(), &ctx, &mut bindings))
            .unwrap_or(true);
        if !ok {
            return false;
        }
        if working.notify_action_done(step, domain, now, None).is_err() {
            return false;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ontology::{Ontology, SetOfEntities, SetOfPredicates, SetOfTypes};
    use crate::operators::action_from_str;

    fn simple_domain() -> (Domain, Problem) {
        let types = SetOfTypes::new();
        let predicates =
            SetOfPredicates::from_str("user_is_greeted\nproposed_our_help_to_user", &types).unwrap();
        let ontology = Ontology {
            types,
            predicates,
            constants: SetOfEntities::new(),
        };
        let entities = SetOfEntities::new();
        let mut actions = BTreeMap::new();
        actions.insert(
            "say_hi".to_string(),
            action_from_str("", "user_is_greeted", Vec::new(), &ontology, &entities).unwrap(),
        );
        actions.insert(
            "ask_how_i_can_help".to_string(),
            action_from_str(
                "user_is_greeted",
                "proposed_our_help_to_user",
                Vec::new(),
                &ontology,
                &entities,
            )
            .unwrap(),
        );
        let domain = Domain::new(actions, ontology);
        let problem = Problem::new(&domain);
        (domain, problem)
    }

    #[test]
    fn greets_before_offering_help() {
        let (domain, mut problem) = simple_domain();
        let goal = Goal::from_str("proposed_our_help_to_user", domain.ontology(), &problem.entities).unwrap();
        problem.set_goals_at(vec![goal], 10, &domain, None);
        let plan = plan_for_every_goal(&problem, &domain, None);
        let ids: Vec<&str> = plan.iter().map(|s| s.action_invocation.action_id.as_str()).collect();
        assert_eq!(ids, vec!["say_hi", "ask_how_i_can_help"]);
        assert!(evaluate_plan(&plan, &problem, &domain, None));
    }

    #[test]
    fn more_important_goal_is_served_first_and_alone() {
        let (domain, mut problem) = simple_domain();
        let help = Goal::from_str("proposed_our_help_to_user", domain.ontology(), &problem.entities).unwrap();
        let greet = Goal::from_str("user_is_greeted", domain.ontology(), &problem.entities).unwrap();
        problem.set_goals_at(vec![help], 5, &domain, None);
        problem.add_goals(BTreeMap::from([(20, vec![greet])]), &domain, None);

        let plan = plan_for_more_important_goal_possible(&problem, &domain, true, None);
        let ids: Vec<&str> = plan.iter().map(|s| s.action_invocation.action_id.as_str()).collect();
        // only the top tier goal is served
        assert_eq!(ids, vec!["say_hi"]);
        assert_eq!(plan[0].from_goal_priority, Some(20));

        let single = plan_for_more_important_goal_possible(&problem, &domain, false, None);
        assert_eq!(single.len(), 1);
    }

    #[test]
    fn no_goal_no_plan() {
        let (domain, mut problem) = simple_domain();
        assert!(plan_for_every_goal(&problem, &domain, None).is_empty());
        let mut output = LookForAnActionOutputInfos::new();
        assert!(look_for_an_action_to_do(&mut problem, &domain, None, Some(&mut output)).is_none());
    }
}
