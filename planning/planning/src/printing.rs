use crate::conditions::{Condition, Expr};
use crate::domain::Domain;
use crate::effects::WsModification;
use crate::facts::{Fact, FactOptional, FactPattern, Term};
use crate::goals::Goal;
use crate::ontology::{Parameter, SetOfTypes, NUMBER_TYPE};
use crate::operators::{Action, ActionInvocationWithGoal};
use crate::parsing::pddl::PddlFeature;
use crate::planner::parallel::ParallelPlan;
use crate::problem::Problem;
use std::fmt::Write as _;

/// Renders a domain back to PDDL text. Parsing the output yields an
/// equivalent domain.
pub fn domain_to_pddl(domain: &Domain) -> String {
    let ontology = domain.ontology();
    let types = &ontology.types;
    let mut out = String::new();
    let _ = writeln!(out, "(define (domain {})", domain.name());

    let features: Vec<String> = PddlFeature::ALL.iter().map(|f| f.to_string()).collect();
    let _ = writeln!(out, "    (:requirements {})", features.join(" "));

    if !types.is_empty() {
        // roots go last: an untyped name before a `- parent` group would be
        // swallowed into that group when read back
        let mut decls = Vec::new();
        let mut roots = Vec::new();
        for t in types.declared() {
            match types.parent(t) {
                Some(p) => decls.push(format!("{} - {}", types.name(t), types.name(p))),
                None => roots.push(types.name(t).to_string()),
            }
        }
        decls.extend(roots);
        let _ = writeln!(out, "    (:types {})", decls.join(" "));
    }

    if !ontology.constants.is_empty() {
        let decls: Vec<String> = ontology
            .constants
            .iter()
            .map(|e| format!("{} - {}", e.value, types.name(e.tpe)))
            .collect();
        let _ = writeln!(out, "    (:constants {})", decls.join(" "));
    }

    let mut predicates = Vec::new();
    let mut functions = Vec::new();
    for (_, p) in ontology.predicates.iter() {
        let mut decl = format!("({}", p.name);
        for param in &p.parameters {
            let _ = write!(decl, " {} - {}", param.name, types.name(param.tpe));
        }
        decl.push(')');
        match p.fluent {
            None => predicates.push(decl),
            Some(t) if types.name(t) == NUMBER_TYPE => functions.push(decl),
            Some(t) => functions.push(format!("{decl} - {}", types.name(t))),
        }
    }
    if !predicates.is_empty() {
        let _ = writeln!(out, "    (:predicates\n        {}\n    )", predicates.join("\n        "));
    }
    if !functions.is_empty() {
        let _ = writeln!(out, "    (:functions\n        {}\n    )", functions.join("\n        "));
    }

    if !domain.timeless().is_empty() {
        let facts: Vec<String> = domain.timeless().iter().map(fact_to_pddl).collect();
        let _ = writeln!(out, "    (:timeless {})", facts.join(" "));
    }

    for axiom in domain.axioms() {
        let _ = writeln!(
            out,
            "    (:axiom\n        :vars ({})\n        :context {}\n        :implies {}\n    )",
            parameters_to_pddl(&axiom.vars, types),
            condition_to_pddl(&axiom.context, types),
            pattern_to_pddl(&axiom.implies),
        );
    }

    for (id, action) in domain.actions() {
        out.push_str(&action_to_pddl(id, action, types));
    }

    out.push_str(")\n");
    out
}

fn action_to_pddl(id: &str, action: &Action, types: &SetOfTypes) -> String {
    let mut out = String::new();
    let durative = action.duration.is_some() || action.over_all_condition.is_some();
    if durative {
        let _ = writeln!(out, "    (:durative-action {id}");
        let _ = writeln!(out, "        :parameters ({})", parameters_to_pddl(&action.parameters, types));
        if let Some(duration) = &action.duration {
            let _ = writeln!(out, "        :duration (= ?duration {})", expr_to_pddl(duration));
        }
        let mut conditions = Vec::new();
        if let Some(pre) = &action.precondition {
            conditions.push(format!("(at start {})", condition_to_pddl(pre, types)));
        }
        if let Some(over_all) = &action.over_all_condition {
            conditions.push(format!("(over all {})", condition_to_pddl(over_all, types)));
        }
        if !conditions.is_empty() {
            let _ = writeln!(out, "        :condition (and {})", conditions.join(" "));
        }
        let mut effects = Vec::new();
        if let Some(at_start) = &action.effect.world_state_modification_at_start {
            effects.push(format!("(at start {})", wsm_to_pddl(at_start, types)));
        }
        if let Some(main) = &action.effect.world_state_modification {
            effects.push(format!("(at end {})", wsm_to_pddl(main, types)));
        }
        if !effects.is_empty() {
            let _ = writeln!(out, "        :effect (and {})", effects.join(" "));
        }
        out.push_str("    )\n");
    } else {
        let _ = writeln!(out, "    (:action {id}");
        let _ = writeln!(out, "        :parameters ({})", parameters_to_pddl(&action.parameters, types));
        if let Some(pre) = &action.precondition {
            let _ = writeln!(out, "        :precondition {}", condition_to_pddl(pre, types));
        }
        if let Some(main) = &action.effect.world_state_modification {
            let _ = writeln!(out, "        :effect {}", wsm_to_pddl(main, types));
        }
        out.push_str("    )\n");
    }
    out
}

/// Renders a problem back to PDDL text, goal markers included.
pub fn problem_to_pddl(problem: &Problem, domain: &Domain) -> String {
    let types = &domain.ontology().types;
    let mut out = String::new();
    let _ = writeln!(out, "(define (problem {})", problem.name);
    let _ = writeln!(out, "    (:domain {})", domain.name());

    if !problem.entities.is_empty() {
        let decls: Vec<String> = problem
            .entities
            .iter()
            .map(|e| format!("{} - {}", e.value, types.name(e.tpe)))
            .collect();
        let _ = writeln!(out, "    (:objects {})", decls.join(" "));
    }

    let init: Vec<String> = problem
        .world_state
        .facts()
        .iter()
        .filter(|f| !domain.timeless().contains(f))
        .map(fact_to_pddl)
        .collect();
    let _ = writeln!(out, "    (:init {})", init.join(" "));

    let tiers = problem.goal_stack.goals();
    let ordered = tiers.len() > 1;
    let mut goal_lines = Vec::new();
    for tier in tiers.values().rev() {
        for goal in tier {
            goal_lines.push(goal_to_pddl(goal, types));
        }
    }
    if ordered {
        let _ = writeln!(out, "    (:goal (and ;; __ORDERED\n        {}\n    ))", goal_lines.join("\n        "));
    } else {
        let _ = writeln!(out, "    (:goal (and {}))", goal_lines.join(" "));
    }
    out.push_str(")\n");
    out
}

fn goal_to_pddl(goal: &Goal, types: &SetOfTypes) -> String {
    let mut res = condition_to_pddl(goal.objective(), types);
    if let Some(condition) = goal.condition() {
        res = format!("(imply {} {})", opt_fact_to_pddl(condition), res);
    }
    if goal.is_one_step_towards() {
        res.push_str(" ;; __ONE_STEP_TOWARDS");
    }
    if goal.is_persistent() {
        res.push_str(" ;; __PERSIST");
    }
    res
}

/// Renders a serial plan, one numbered line per action.
pub fn plan_to_pddl(plan: &[ActionInvocationWithGoal], domain: &Domain, problem: &Problem) -> String {
    let mut out = String::new();
    for (index, step) in plan.iter().enumerate() {
        let _ = writeln!(out, "{:02}: {}", index, invocation_to_pddl(step, domain, problem));
    }
    out
}

/// Renders a parallel plan: invocations of one step share the leading number.
pub fn parallel_plan_to_pddl(plan: &ParallelPlan, domain: &Domain, problem: &Problem) -> String {
    let mut out = String::new();
    for (index, step) in plan.steps.iter().enumerate() {
        for invocation in step {
            let _ = writeln!(out, "{:02}: {}", index, invocation_to_pddl(invocation, domain, problem));
        }
    }
    out
}

fn invocation_to_pddl(step: &ActionInvocationWithGoal, domain: &Domain, problem: &Problem) -> String {
    let invocation = &step.action_invocation;
    let mut rendered = format!("({}", invocation.action_id);
    let duration = match domain.action(&invocation.action_id) {
        Some(action) => {
            for param in &action.parameters {
                match invocation.parameters.get(&param.name) {
                    Some(value) => {
                        let _ = write!(rendered, " {value}");
                    }
                    None => {
                        let _ = write!(rendered, " {}", param.name);
                    }
                }
            }
            action
                .duration
                .as_ref()
                .and_then(|d| d.eval(problem.world_state.facts(), &invocation.bindings()))
                .and_then(|v| v.as_number())
                .map(|n| n.to_string())
                .unwrap_or_else(|| "1".to_string())
        }
        None => "1".to_string(),
    };
    let _ = write!(rendered, ") [{duration}]");
    rendered
}

pub fn condition_to_pddl(condition: &Condition, types: &SetOfTypes) -> String {
    match condition {
        Condition::Fact(opt) => opt_fact_to_pddl(opt),
        Condition::And(cs) => nary_to_pddl("and", cs, types),
        Condition::Or(cs) => nary_to_pddl("or", cs, types),
        Condition::Not(c) => format!("(not {})", condition_to_pddl(c, types)),
        Condition::Imply(a, b) => format!(
            "(imply {} {})",
            condition_to_pddl(a, types),
            condition_to_pddl(b, types)
        ),
        Condition::Exists(p, c) => format!(
            "(exists ({}) {})",
            parameter_to_pddl(p, types),
            condition_to_pddl(c, types)
        ),
        Condition::Forall(p, c) => format!(
            "(forall ({}) {})",
            parameter_to_pddl(p, types),
            condition_to_pddl(c, types)
        ),
        Condition::Compare(op, a, b) => format!("({} {} {})", op.symbol(), expr_to_pddl(a), expr_to_pddl(b)),
    }
}

fn nary_to_pddl(op: &str, cs: &[Condition], types: &SetOfTypes) -> String {
    let parts: Vec<String> = cs.iter().map(|c| condition_to_pddl(c, types)).collect();
    format!("({op} {})", parts.join(" "))
}

pub fn wsm_to_pddl(wsm: &WsModification, types: &SetOfTypes) -> String {
    match wsm {
        WsModification::Fact(opt) => opt_fact_to_pddl(opt),
        WsModification::Assign(t, e) => format!("(assign {} {})", access_to_pddl(t), expr_to_pddl(e)),
        WsModification::Increase(t, e) => format!("(increase {} {})", access_to_pddl(t), expr_to_pddl(e)),
        WsModification::Decrease(t, e) => format!("(decrease {} {})", access_to_pddl(t), expr_to_pddl(e)),
        WsModification::Multiply(t, e) => format!("(scale-up {} {})", access_to_pddl(t), expr_to_pddl(e)),
        WsModification::When(c, e) => format!("(when {} {})", condition_to_pddl(c, types), wsm_to_pddl(e, types)),
        WsModification::Forall(p, e) => {
            format!("(forall ({}) {})", parameter_to_pddl(p, types), wsm_to_pddl(e, types))
        }
        WsModification::And(parts) => {
            let parts: Vec<String> = parts.iter().map(|p| wsm_to_pddl(p, types)).collect();
            format!("(and {})", parts.join(" "))
        }
    }
}

pub fn expr_to_pddl(expr: &Expr) -> String {
    match expr {
        Expr::Number(n) => n.clone(),
        Expr::Value(e) => e.value.clone(),
        Expr::Param(p) => p.name.clone(),
        Expr::Fluent(pattern) => access_to_pddl(pattern),
        Expr::Undefined => "undefined".to_string(),
        Expr::Plus(a, b) => format!("(+ {} {})", expr_to_pddl(a), expr_to_pddl(b)),
        Expr::Minus(a, b) => format!("(- {} {})", expr_to_pddl(a), expr_to_pddl(b)),
        Expr::Mul(a, b) => format!("(* {} {})", expr_to_pddl(a), expr_to_pddl(b)),
    }
}

fn opt_fact_to_pddl(opt: &FactOptional) -> String {
    if opt.negated {
        format!("(not {})", pattern_to_pddl(&opt.pattern))
    } else {
        pattern_to_pddl(&opt.pattern)
    }
}

fn pattern_to_pddl(pattern: &FactPattern) -> String {
    let access = access_to_pddl(pattern);
    match &pattern.fluent {
        None | Some(Term::Any) => access,
        // `!=` asserts the equation exists with another value, which
        // `(not (= ...))` would not preserve for absent equations
        Some(value) if pattern.negated_fluent => format!("(!= {access} {value})"),
        Some(value) => format!("(= {access} {value})"),
    }
}

/// The `(pred args)` part of a fact, without the value.
fn access_to_pddl(pattern: &FactPattern) -> String {
    let mut res = format!("({}", pattern.predicate_name());
    for arg in &pattern.args {
        let _ = write!(res, " {arg}");
    }
    res.push(')');
    res
}

fn fact_to_pddl(fact: &Fact) -> String {
    let mut access = format!("({}", fact.predicate_name());
    for arg in &fact.args {
        let _ = write!(access, " {arg}");
    }
    access.push(')');
    match &fact.fluent {
        None => access,
        Some(v) => format!("(= {access} {v})"),
    }
}

fn parameter_to_pddl(p: &Parameter, types: &SetOfTypes) -> String {
    format!("{} - {}", p.name, types.name(p.tpe))
}

fn parameters_to_pddl(params: &[Parameter], types: &SetOfTypes) -> String {
    let decls: Vec<String> = params.iter().map(|p| parameter_to_pddl(p, types)).collect();
    decls.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parsing::load_domain_and_problem;
    use stratum_utils::input::Input;

    static DOMAIN: &str = "(define (domain porter)
        (:requirements :strips :typing :negative-preconditions :fluents :numeric-fluents :conditional-effects :universal-preconditions)
        (:types robot location - object)
        (:constants home - location)
        (:predicates (busy ?r - robot))
        (:functions (at ?r - robot) - location
                    (battery ?r - robot))
        (:action go_home
            :parameters (?r - robot)
            :precondition (not (busy ?r))
            :effect (and (= (at ?r) home) (decrease (battery ?r) 1))
        )
    )";

    static PROBLEM: &str = "(define (problem deliver) (:domain porter)
        (:objects r1 - robot depot - location)
        (:init (= (at r1) depot) (= (battery r1) 3))
        (:goal (and (= (at r1) home)))
    )";

    #[test]
    fn domain_round_trips_through_emission() {
        let (domain, _) =
            load_domain_and_problem(Input::from_string(DOMAIN), Input::from_string(PROBLEM)).unwrap();
        let emitted = domain_to_pddl(&domain);
        let reparsed = crate::parsing::parse_domain(Input::from_string(emitted.clone()))
            .unwrap_or_else(|e| panic!("emitted domain does not parse: {e}\n{emitted}"));
        assert_eq!(reparsed.name(), domain.name());
        assert_eq!(reparsed.actions().len(), domain.actions().len());
        assert_eq!(
            reparsed.ontology().predicates.len(),
            domain.ontology().predicates.len()
        );
    }

    #[test]
    fn problem_round_trips_through_emission() {
        let (domain, problem) =
            load_domain_and_problem(Input::from_string(DOMAIN), Input::from_string(PROBLEM)).unwrap();
        let emitted = problem_to_pddl(&problem, &domain);
        let reparsed = crate::parsing::parse_problem(Input::from_string(emitted.clone()), &domain)
            .unwrap_or_else(|e| panic!("emitted problem does not parse: {e}\n{emitted}"));
        assert_eq!(reparsed.entities.len(), problem.entities.len());
        assert_eq!(
            reparsed.world_state.facts().len(),
            problem.world_state.facts().len()
        );
        assert_eq!(reparsed.goal_stack.goals().len(), problem.goal_stack.goals().len());
    }

    #[test]
    fn plan_lines_carry_step_numbers_and_durations() {
        let (domain, problem) =
            load_domain_and_problem(Input::from_string(DOMAIN), Input::from_string(PROBLEM)).unwrap();
        let plan = crate::planner::plan_for_every_goal(&problem, &domain, None);
        let rendered = plan_to_pddl(&plan, &domain, &problem);
        assert_eq!(rendered, "00: (go_home r1) [1]\n");
    }
}
