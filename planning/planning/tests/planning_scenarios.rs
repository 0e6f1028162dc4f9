use std::collections::BTreeMap;
use stratum_planning::parsing::load_domain_and_problem;
use stratum_planning::planner::parallel::parallel_plan_for_every_goals;
use stratum_planning::planner::{evaluate_plan, look_for_an_action_to_do, plan_for_every_goal};
use stratum_planning::{
    Domain, Fact, Goal, LookForAnActionOutputInfos, Ontology, PlannerStepType, Problem, SetOfEntities,
    SetOfPredicates, SetOfTypes,
};
use stratum_utils::input::Input;

fn action_ids(plan: &[stratum_planning::ActionInvocationWithGoal]) -> Vec<String> {
    plan.iter()
        .map(|s| s.action_invocation.action_id.clone())
        .collect()
}

/// Builds a domain the way embedders do: from condition and effect strings.
fn domain_from_strs(predicates: &str, actions: &[(&str, &str, &str)]) -> Domain {
    let types = SetOfTypes::new();
    let predicates = SetOfPredicates::from_str(predicates, &types).unwrap();
    let ontology = Ontology {
        types,
        predicates,
        constants: SetOfEntities::new(),
    };
    let entities = SetOfEntities::new();
    let mut map = BTreeMap::new();
    for (id, precondition, effect) in actions {
        let action =
            stratum_planning::operators::action_from_str(precondition, effect, Vec::new(), &ontology, &entities)
                .unwrap();
        map.insert(id.to_string(), action);
    }
    Domain::new(map, ontology)
}

#[test]
fn greet_only() {
    let domain = domain_from_strs("user_is_greeted", &[("say_hi", "", "user_is_greeted")]);
    let mut problem = Problem::new(&domain);
    let goal = Goal::from_str("user_is_greeted", domain.ontology(), &problem.entities).unwrap();
    problem.set_goals_at(vec![goal], 10, &domain, None);

    let plan = plan_for_every_goal(&problem, &domain, None);
    assert_eq!(action_ids(&plan), vec!["say_hi"]);

    // after notifying, nothing more to do
    problem.notify_action_done(&plan[0], &domain, None, None).unwrap();
    assert!(plan_for_every_goal(&problem, &domain, None).is_empty());
    let mut output = LookForAnActionOutputInfos::new();
    assert!(look_for_an_action_to_do(&mut problem, &domain, None, Some(&mut output)).is_none());
    assert_eq!(output.step_type(), PlannerStepType::FinishedOnSuccess);
}

#[test]
fn greet_then_offer_help() {
    let domain = domain_from_strs(
        "user_is_greeted\nproposed_our_help_to_user",
        &[
            ("say_hi", "", "user_is_greeted"),
            ("ask_how_i_can_help", "user_is_greeted", "proposed_our_help_to_user"),
        ],
    );
    let mut problem = Problem::new(&domain);
    let goal = Goal::from_str("proposed_our_help_to_user", domain.ontology(), &problem.entities).unwrap();
    problem.set_goals_at(vec![goal], 10, &domain, None);

    let plan = plan_for_every_goal(&problem, &domain, None);
    assert_eq!(action_ids(&plan), vec!["say_hi", "ask_how_i_can_help"]);
    assert!(evaluate_plan(&plan, &problem, &domain, None));
}

#[test]
fn independent_actions_run_in_parallel() {
    let domain = domain_from_strs(
        "fact_a\nfact_b\nfact_c",
        &[
            ("a1", "", "fact_a"),
            ("a2", "", "fact_b"),
            ("a3", "fact_a & fact_b", "fact_c"),
        ],
    );
    let mut problem = Problem::new(&domain);
    let goal = Goal::from_str("fact_c", domain.ontology(), &problem.entities).unwrap();
    problem.set_goals_at(vec![goal], 10, &domain, None);

    let plan = parallel_plan_for_every_goals(&problem, &domain, None);
    assert_eq!(plan.steps.len(), 2);
    assert_eq!(
        action_ids(&plan.steps[0]),
        vec!["a1".to_string(), "a2".to_string()]
    );
    assert_eq!(action_ids(&plan.steps[1]), vec!["a3".to_string()]);
}

static ROBOT_DOMAIN: &str = "(define (domain robot_domain)
    (:requirements :strips :typing :negative-preconditions :equality :existential-preconditions :universal-preconditions :conditional-effects :fluents :numeric-fluents)
    (:types entity location - object
            robot object_item - entity)
    (:constants self - robot)
    (:predicates
        (at ?e - entity) - location
        (touched ?o - object_item)
    )
    (:action pick
        :parameters (?o - object_item)
        :precondition (exists (?l - location) (and (= (at self) ?l) (= (at ?o) ?l)))
        :effect (touched ?o)
    )
    (:action enter
        :parameters (?l - location)
        :effect (and
            (forall (?x - location) (when (= (at self) ?x) (not (= (at self) ?x))))
            (= (at self) ?l))
    )
)";

#[test]
fn exists_binds_the_shared_location() {
    let (domain, problem) = load_domain_and_problem(
        Input::from_string(ROBOT_DOMAIN),
        Input::from_string(
            "(define (problem fetch) (:domain robot_domain)
                (:objects pen - object_item kitchen bedroom - location)
                (:init (= (at self) kitchen) (= (at pen) kitchen))
                (:goal (and (touched pen))))",
        ),
    )
    .unwrap();

    let plan = plan_for_every_goal(&problem, &domain, None);
    assert_eq!(action_ids(&plan), vec!["pick"]);
    assert_eq!(
        plan[0].action_invocation.parameters["?o"].value,
        "pen".to_string()
    );
}

#[test]
fn universal_when_effect_clears_previous_location() {
    let (domain, mut problem) = load_domain_and_problem(
        Input::from_string(ROBOT_DOMAIN),
        Input::from_string(
            "(define (problem move) (:domain robot_domain)
                (:objects kitchen bedroom - location)
                (:init (= (at self) kitchen))
                (:goal (and (= (at self) bedroom))))",
        ),
    )
    .unwrap();

    let plan = plan_for_every_goal(&problem, &domain, None);
    assert_eq!(action_ids(&plan), vec!["enter"]);
    problem.notify_action_done(&plan[0], &domain, None, None).unwrap();

    let in_bedroom = Fact::from_str("at(self)=bedroom", domain.ontology(), &problem.entities).unwrap();
    let in_kitchen = Fact::from_str("at(self)=kitchen", domain.ontology(), &problem.entities).unwrap();
    assert!(problem.world_state.has_fact(&in_bedroom));
    assert!(!problem.world_state.has_fact(&in_kitchen));
}

#[test]
fn persistent_goal_is_reinstated() {
    let domain = domain_from_strs(
        "fact_b\nspoiler",
        &[
            ("restore_b", "", "fact_b"),
            ("spoil", "", "spoiler & not(fact_b)"),
        ],
    );
    let mut problem = Problem::new(&domain);
    let goal = Goal::from_str("persist(fact_b)", domain.ontology(), &problem.entities).unwrap();
    problem.set_goals_at(vec![goal], 10, &domain, None);

    // satisfy the goal once
    let plan = plan_for_every_goal(&problem, &domain, None);
    assert_eq!(action_ids(&plan), vec!["restore_b"]);
    problem.notify_action_done(&plan[0], &domain, None, None).unwrap();
    assert!(plan_for_every_goal(&problem, &domain, None).is_empty());

    // an action undoes it: the persistent goal demands it back
    let spoil = stratum_planning::ActionInvocationWithGoal::new(
        stratum_planning::ActionInvocation::new("spoil", BTreeMap::new()),
        None,
        None,
    );
    problem.notify_action_done(&spoil, &domain, None, None).unwrap();
    let plan = plan_for_every_goal(&problem, &domain, None);
    assert_eq!(action_ids(&plan), vec!["restore_b"]);
}

#[test]
fn one_step_towards_goal_is_retired_by_any_attributable_action() {
    let domain = domain_from_strs("fact_a\nfar_away", &[("step", "", "fact_a")]);
    let mut problem = Problem::new(&domain);
    // fact_a is only a step towards far_away: the objective stays false
    let goal = Goal::from_str("oneStepTowards(far_away)", domain.ontology(), &problem.entities).unwrap();
    problem.set_goals_at(vec![goal.clone()], 10, &domain, None);

    let step = stratum_planning::ActionInvocationWithGoal::new(
        stratum_planning::ActionInvocation::new("step", BTreeMap::new()),
        Some(goal),
        Some(10),
    );
    problem.notify_action_done(&step, &domain, None, None).unwrap();
    // the objective is still false, yet the goal is gone
    assert!(problem.goal_stack.is_empty());
}

#[test]
fn ordered_goals_are_served_most_important_first() {
    let (domain, problem) = load_domain_and_problem(
        Input::from_string(ROBOT_DOMAIN),
        Input::from_string(
            "(define (problem fetch_both) (:domain robot_domain)
                (:objects pen cup - object_item kitchen - location)
                (:init (= (at self) kitchen) (= (at pen) kitchen) (= (at cup) kitchen))
                (:goal (and ;; __ORDERED
                    (touched cup)
                    (touched pen)
                )))",
        ),
    )
    .unwrap();

    let plan = plan_for_every_goal(&problem, &domain, None);
    assert_eq!(action_ids(&plan), vec!["pick", "pick"]);
    assert_eq!(plan[0].action_invocation.parameters["?o"].value, "cup");
    assert_eq!(plan[1].action_invocation.parameters["?o"].value, "pen");
    assert!(plan[0].from_goal_priority.unwrap() > plan[1].from_goal_priority.unwrap());
}

#[test]
fn axiom_maintains_its_derived_fact() {
    let (domain, mut problem) = load_domain_and_problem(
        Input::from_string(
            "(define (domain lights)
                (:requirements :strips :derived-predicates)
                (:predicates (switch_on) (light_on))
                (:action flip_on :parameters () :effect (switch_on))
                (:axiom
                    :vars ()
                    :context (switch_on)
                    :implies (light_on))
            )",
        ),
        Input::from_string(
            "(define (problem glow) (:domain lights)
                (:init )
                (:goal (and (light_on))))",
        ),
    )
    .unwrap();

    let light_on = Fact::from_str("light_on", domain.ontology(), &problem.entities).unwrap();
    let switch_on = Fact::from_str("switch_on", domain.ontology(), &problem.entities).unwrap();

    problem.add_fact(switch_on.clone(), &domain, None).unwrap();
    assert!(problem.world_state.has_fact(&light_on));

    problem.remove_fact(switch_on, &domain, None).unwrap();
    assert!(!problem.world_state.has_fact(&light_on));
}

#[test]
fn succession_cache_prints_enabling_chains() {
    let domain = domain_from_strs(
        "fact_a\nfact_b",
        &[("first", "", "fact_a"), ("second", "fact_a", "fact_b")],
    );
    let printed = domain.print_succession_cache();
    assert!(printed.contains("action: first"), "{printed}");
    assert!(printed.contains("fact: fact_a"), "{printed}");
    assert!(printed.contains("action: second"), "{printed}");
}
