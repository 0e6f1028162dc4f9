pub mod pddl;
pub mod sexpr;

use crate::conditions::{CmpOp, Condition, Expr};
use crate::domain::Domain;
use crate::effects::WsModification;
use crate::errors::ParseError;
use crate::facts::{Fact, FactOptional, FactPattern, Term};
use crate::goal_stack::DEFAULT_PRIORITY;
use crate::goals::Goal;
use crate::ontology::{
    Entity, Number, Ontology, Parameter, Predicate, SetOfEntities, SetOfPredicates, SetOfTypes, TypeId,
};
use crate::operators::{Action, ActionId, Axiom, ProblemModification};
use crate::problem::Problem;
use pddl::{PddlAction, PddlDomain, PddlDurativeAction, PddlProblem, TypedSymbol};
use sexpr::{SAtom, SExpr};
use std::collections::BTreeMap;
use stratum_utils::input::{ErrLoc, Input};

/// Fallback type of untyped symbols, as in plain STRIPS domains.
const OBJECT_TYPE: &str = "object";

/// Loads a typed domain from PDDL text.
pub fn parse_domain(input: Input) -> Result<Domain, ParseError> {
    let parsed = pddl::parse_pddl_domain(input)?;
    build_domain(&parsed).map_err(ParseError::from)
}

/// Loads a problem from PDDL text, resolved against its domain.
pub fn parse_problem(input: Input, domain: &Domain) -> Result<Problem, ParseError> {
    let parsed = pddl::parse_pddl_problem(input)?;
    build_problem(&parsed, domain).map_err(ParseError::from)
}

fn build_domain(parsed: &PddlDomain) -> Result<Domain, ErrLoc> {
    let mut types = SetOfTypes::new();
    for t in &parsed.types {
        let parent = t.tpe.as_ref().map(|p| p.as_str());
        types
            .add(t.symbol.as_str(), parent)
            .map_err(|e| t.symbol.invalid(e.to_string()))?;
    }
    if !parsed.types.iter().any(|t| t.symbol.as_str() == OBJECT_TYPE) {
        // implicit top type for untyped declarations
        types.add(OBJECT_TYPE, None).expect("fresh type");
    }

    let mut predicates = SetOfPredicates::new();
    for p in &parsed.predicates {
        let parameters = read_declared_parameters(&p.args, &types)?;
        let fluent = match &p.value_type {
            None => None,
            Some(t) => Some(
                types
                    .get(t.as_str())
                    .ok_or_else(|| t.invalid(format!("unknown type `{t}`")))?,
            ),
        };
        predicates
            .add(Predicate::new(p.name.as_str(), parameters, fluent))
            .map_err(|e| p.name.invalid(e.to_string()))?;
    }
    for f in &parsed.functions {
        let parameters = read_declared_parameters(&f.args, &types)?;
        let value_type = match &f.value_type {
            None => types.number(),
            Some(t) => types
                .get(t.as_str())
                .ok_or_else(|| t.invalid(format!("unknown type `{t}`")))?,
        };
        predicates
            .add(Predicate::new(f.name.as_str(), parameters, Some(value_type)))
            .map_err(|e| f.name.invalid(e.to_string()))?;
    }

    let mut constants = SetOfEntities::new();
    for c in &parsed.constants {
        let tpe = lookup_declared_type(&c.tpe, &types)?;
        constants
            .add(Entity::new(c.symbol.as_str(), tpe))
            .map_err(|e| c.symbol.invalid(e.to_string()))?;
    }

    let ontology = Ontology {
        types,
        predicates,
        constants,
    };
    let no_entities = SetOfEntities::new();
    let env = ReadEnv {
        ontology: &ontology,
        entities: &no_entities,
    };

    let mut timeless = std::collections::BTreeSet::new();
    for fact_expr in &parsed.timeless {
        timeless.insert(read_ground_fact(fact_expr, &env)?);
    }

    let mut actions: BTreeMap<ActionId, Action> = BTreeMap::new();
    for a in &parsed.actions {
        let action = read_action(a, &env)?;
        if actions.insert(a.name.canonical_string(), action).is_some() {
            return Err(a.name.invalid(format!("duplicate action id `{}`", a.name)));
        }
    }
    for a in &parsed.durative_actions {
        let action = read_durative_action(a, &env)?;
        if actions.insert(a.name.canonical_string(), action).is_some() {
            return Err(a.name.invalid(format!("duplicate action id `{}`", a.name)));
        }
    }

    let mut axioms = Vec::new();
    for axiom in &parsed.axioms {
        let vars = read_declared_parameters(&axiom.vars, &env.ontology.types)?;
        let context = read_condition(&axiom.context, &env, &vars)?;
        let implies = read_fact_expr(&axiom.implies, &env, &vars)?;
        axioms.push(Axiom::new(vars, context, implies));
    }

    Ok(Domain::new(actions, ontology)
        .with_axioms(axioms)
        .with_timeless(timeless)
        .with_name(parsed.name.canonical_string()))
}

fn build_problem(parsed: &PddlProblem, domain: &Domain) -> Result<Problem, ErrLoc> {
    if !domain.name().is_empty() && parsed.domain_name.as_str() != domain.name() {
        return Err(parsed.domain_name.invalid(format!(
            "problem is for domain `{}` but `{}` was loaded",
            parsed.domain_name,
            domain.name()
        )));
    }
    let mut problem = Problem::new(domain);
    problem.name = parsed.problem_name.canonical_string();
    for o in &parsed.objects {
        let tpe = lookup_declared_type(&o.tpe, &domain.ontology().types)?;
        problem
            .entities
            .add(Entity::new(o.symbol.as_str(), tpe))
            .map_err(|e| o.symbol.invalid(e.to_string()))?;
    }

    let env = ReadEnv {
        ontology: domain.ontology(),
        entities: &problem.entities,
    };
    let mut init_items = Vec::with_capacity(parsed.init.len());
    for fact_expr in &parsed.init {
        init_items.push(read_effect(fact_expr, &env, &[])?);
    }
    let ctx = crate::conditions::EvalCtx::new(domain.ontology(), &problem.entities);
    problem
        .world_state
        .modify(
            Some(&WsModification::And(init_items)),
            domain.events(),
            &ctx,
            &crate::facts::Bindings::new(),
        )
        .map_err(|e| ErrLoc::new(format!("invalid initial state: {e}")))?;

    let goals = read_goals(&parsed.goal, &env)?;
    problem.goal_stack.set_goals(goals, &problem.world_state, &ctx, None);
    Ok(problem)
}

/// Reads the goal expressions of a problem into priority tiers, honoring the
/// `__ORDERED`, `__PERSIST` and `__ONE_STEP_TOWARDS` markers.
fn read_goals(goal_exprs: &[SExpr], env: &ReadEnv) -> Result<BTreeMap<i32, Vec<Goal>>, ErrLoc> {
    let mut items: Vec<&SExpr> = Vec::new();
    match goal_exprs {
        [single] if single.as_application("and").is_some() => {
            items.extend(single.as_application("and").expect("checked above"));
        }
        _ => items.extend(goal_exprs.iter()),
    }

    let mut ordered = false;
    let mut goals: Vec<Goal> = Vec::new();
    for item in items {
        if sexpr::is_any_marker(item) {
            let marker = item.as_atom().expect("markers are atoms");
            match marker.as_str() {
                "__ordered" => ordered = true,
                "__persist" => mark_last(&mut goals, marker, |g| g.persistent())?,
                "__one_step_towards" => mark_last(&mut goals, marker, |g| g.one_step_towards())?,
                other => return Err(marker.invalid(format!("unknown goal marker `{other}`"))),
            }
            continue;
        }
        let (item, condition) = split_imply_goal(item, env)?;
        let mut goal = Goal::new(read_condition(item, env, &[])?);
        if let Some(condition) = condition {
            goal = goal.with_condition(condition);
        }
        goals.push(goal);
    }

    let mut tiers: BTreeMap<i32, Vec<Goal>> = BTreeMap::new();
    if ordered {
        // left-to-right, most important first
        let count = goals.len() as i32;
        for (index, goal) in goals.into_iter().enumerate() {
            tiers.insert(DEFAULT_PRIORITY + count - 1 - index as i32, vec![goal]);
        }
    } else if !goals.is_empty() {
        tiers.insert(DEFAULT_PRIORITY, goals);
    }
    Ok(tiers)
}

/// `(imply (premise) (objective))` at goal level becomes an imply-goal:
/// active only while the premise fact holds.
fn split_imply_goal<'a>(expr: &'a SExpr, env: &ReadEnv) -> Result<(&'a SExpr, Option<FactOptional>), ErrLoc> {
    let Some([premise, objective]) = expr.as_application("imply") else {
        return Ok((expr, None));
    };
    let condition = match premise.as_application("not") {
        Some([inner]) => FactOptional::negative(read_fact_expr(inner, env, &[])?),
        _ => FactOptional::positive(read_fact_expr(premise, env, &[])?),
    };
    Ok((objective, Some(condition)))
}

fn mark_last(goals: &mut [Goal], marker: &SAtom, f: impl FnOnce(Goal) -> Goal) -> Result<(), ErrLoc> {
    match goals.last_mut() {
        None => Err(marker.invalid("marker without a preceding goal")),
        Some(last) => {
            *last = f(last.clone());
            Ok(())
        }
    }
}

struct ReadEnv<'a> {
    ontology: &'a Ontology,
    entities: &'a SetOfEntities,
}

fn read_declared_parameters(args: &[TypedSymbol], types: &SetOfTypes) -> Result<Vec<Parameter>, ErrLoc> {
    args.iter()
        .map(|a| {
            let tpe = lookup_declared_type(&a.tpe, types)?;
            Ok(Parameter::new(a.symbol.as_str(), tpe))
        })
        .collect()
}

fn lookup_declared_type(tpe: &Option<stratum_utils::input::Sym>, types: &SetOfTypes) -> Result<TypeId, ErrLoc> {
    match tpe {
        Some(t) => types
            .get(t.as_str())
            .ok_or_else(|| t.invalid(format!("unknown type `{t}`"))),
        None => types
            .get(OBJECT_TYPE)
            .ok_or_else(|| ErrLoc::new("untyped symbol but no `object` type is declared")),
    }
}

fn read_action(parsed: &PddlAction, env: &ReadEnv) -> Result<Action, ErrLoc> {
    let parameters = read_declared_parameters(&parsed.args, &env.ontology.types)?;
    let precondition = read_conjunction_opt(&parsed.precondition, env, &parameters)?;
    let mut effect = ProblemModification::default();
    for e in &parsed.effect {
        effect.world_state_modification = WsModification::merge(
            effect.world_state_modification.take(),
            Some(read_effect(e, env, &parameters)?),
        );
    }
    Ok(Action {
        parameters,
        precondition,
        over_all_condition: None,
        effect,
        duration: None,
        prefer_in_context: None,
        should_be_done_asap_without_history_check: false,
    })
}

fn read_durative_action(parsed: &PddlDurativeAction, env: &ReadEnv) -> Result<Action, ErrLoc> {
    let parameters = read_declared_parameters(&parsed.args, &env.ontology.types)?;

    let duration = match &parsed.duration {
        None => None,
        Some(expr) => {
            // `(= ?duration N)`
            let mut iter = expr
                .as_list_iter()
                .ok_or_else(|| expr.invalid("Expected a duration constraint"))?;
            iter.pop_known_atom("=")?;
            iter.pop_known_atom("?duration")?;
            let value = iter.pop()?;
            Some(read_expr(value, env, &parameters)?)
        }
    };

    let mut at_start_conditions: Vec<Condition> = Vec::new();
    let mut over_all_conditions: Vec<Condition> = Vec::new();
    for condition in &parsed.conditions {
        for (timing, inner) in read_timed_items(condition)? {
            let read = read_condition(inner, env, &parameters)?;
            match timing {
                Timing::AtStart => at_start_conditions.push(read),
                // at-end conditions must hold when the action completes:
                // checked together with the over-all ones
                Timing::OverAll | Timing::AtEnd => over_all_conditions.push(read),
            }
        }
    }

    let mut effect = ProblemModification::default();
    for e in &parsed.effects {
        for (timing, inner) in read_timed_items(e)? {
            let read = read_effect(inner, env, &parameters)?;
            match timing {
                Timing::AtStart => {
                    effect.world_state_modification_at_start =
                        WsModification::merge(effect.world_state_modification_at_start.take(), Some(read));
                }
                Timing::AtEnd | Timing::OverAll => {
                    effect.world_state_modification =
                        WsModification::merge(effect.world_state_modification.take(), Some(read));
                }
            }
        }
    }

    Ok(Action {
        parameters,
        precondition: merge_conditions(at_start_conditions),
        over_all_condition: merge_conditions(over_all_conditions),
        effect,
        duration,
        prefer_in_context: None,
        should_be_done_asap_without_history_check: false,
    })
}

#[derive(Copy, Clone)]
enum Timing {
    AtStart,
    OverAll,
    AtEnd,
}

/// Splits `(and (at start ...) (over all ...) ...)` into timed items.
fn read_timed_items(expr: &SExpr) -> Result<Vec<(Timing, &SExpr)>, ErrLoc> {
    let items: Vec<&SExpr> = match expr.as_application("and") {
        Some(conjuncts) => conjuncts.iter().collect(),
        None => vec![expr],
    };
    let mut res = Vec::with_capacity(items.len());
    for item in items {
        if let Some([timing_tail @ SExpr::Atom(_), inner]) = item.as_application("at") {
            let timing = timing_tail.as_atom().expect("matched above");
            let timing = match timing.as_str() {
                "start" => Timing::AtStart,
                "end" => Timing::AtEnd,
                other => return Err(timing.invalid(format!("unknown timing `{other}`"))),
            };
            res.push((timing, inner));
        } else if let Some([all @ SExpr::Atom(_), inner]) = item.as_application("over") {
            let all = all.as_atom().expect("matched above");
            if all.as_str() != "all" {
                return Err(all.invalid("Expected `over all`"));
            }
            res.push((Timing::OverAll, inner));
        } else {
            res.push((Timing::AtStart, item));
        }
    }
    Ok(res)
}

fn merge_conditions(conditions: Vec<Condition>) -> Option<Condition> {
    match conditions.len() {
        0 => None,
        1 => conditions.into_iter().next(),
        _ => Some(Condition::And(conditions)),
    }
}

fn read_conjunction_opt(exprs: &[SExpr], env: &ReadEnv, params: &[Parameter]) -> Result<Option<Condition>, ErrLoc> {
    let mut conditions = Vec::with_capacity(exprs.len());
    for e in exprs {
        conditions.push(read_condition(e, env, params)?);
    }
    Ok(merge_conditions(conditions))
}

fn read_condition(expr: &SExpr, env: &ReadEnv, params: &[Parameter]) -> Result<Condition, ErrLoc> {
    let list = expr
        .as_list()
        .ok_or_else(|| expr.invalid("Expected a condition"))?;
    if list.is_empty() {
        return Ok(Condition::And(Vec::new()));
    }
    let head = list[0]
        .as_atom()
        .ok_or_else(|| list[0].invalid("Expected an operator or predicate name"))?;
    let args = &mut list.iter();
    let _ = args.pop();
    match head.as_str() {
        "and" => Ok(Condition::And(
            args.map(|a| read_condition(a, env, params)).collect::<Result<_, _>>()?,
        )),
        "or" => Ok(Condition::Or(
            args.map(|a| read_condition(a, env, params)).collect::<Result<_, _>>()?,
        )),
        "not" => {
            let inner = args.pop()?;
            ensure_end(args)?;
            // a negated atomic literal stays atomic
            match read_condition(inner, env, params)? {
                Condition::Fact(opt) if !opt.negated => Ok(Condition::Fact(FactOptional::negative(opt.pattern))),
                other => Ok(Condition::Not(Box::new(other))),
            }
        }
        "imply" => {
            let premise = read_condition(args.pop()?, env, params)?;
            let conclusion = read_condition(args.pop()?, env, params)?;
            ensure_end(args)?;
            Ok(Condition::Imply(Box::new(premise), Box::new(conclusion)))
        }
        "exists" | "forall" => {
            let is_exists = head.as_str() == "exists";
            let vars = args.pop_list()?;
            let vars = pddl::consume_typed_symbols(&mut vars.iter())?;
            let vars = read_declared_parameters(&vars, &env.ontology.types)?;
            let mut scoped = params.to_vec();
            scoped.extend(vars.iter().cloned());
            let body = args.pop()?;
            ensure_end(args)?;
            let mut condition = read_condition(body, env, &scoped)?;
            for var in vars.into_iter().rev() {
                condition = if is_exists {
                    Condition::Exists(var, Box::new(condition))
                } else {
                    Condition::Forall(var, Box::new(condition))
                };
            }
            Ok(condition)
        }
        "=" | "<" | "<=" | ">" | ">=" | "!=" => {
            let op = match head.as_str() {
                "=" => CmpOp::Eq,
                "!=" => CmpOp::Ne,
                "<" => CmpOp::Lt,
                "<=" => CmpOp::Le,
                ">" => CmpOp::Gt,
                _ => CmpOp::Ge,
            };
            let left = args.pop()?;
            let right = args.pop()?;
            ensure_end(args)?;
            read_comparison(op, left, right, env, params)
        }
        _ => Ok(Condition::fact(read_fact_expr(expr, env, params)?)),
    }
}

/// `(= (f args) v)` is a fluent equation when the value is a plain symbol and
/// a numeric comparison otherwise.
fn read_comparison(
    op: CmpOp,
    left: &SExpr,
    right: &SExpr,
    env: &ReadEnv,
    params: &[Parameter],
) -> Result<Condition, ErrLoc> {
    if matches!(op, CmpOp::Eq | CmpOp::Ne) {
        if let (SExpr::List(_), SExpr::Atom(value)) = (left, right) {
            if value.as_str() == "undefined" {
                let pattern = read_fact_expr(left, env, params)?;
                return Ok(Condition::Compare(op, Expr::Fluent(pattern), Expr::Undefined));
            }
            let mut pattern = read_fact_expr(left, env, params)?;
            if pattern.fluent.is_some() {
                let predicate = env.ontology.predicates.predicate(pattern.predicate).clone();
                let fluent_tpe = predicate.fluent.expect("checked above");
                pattern.fluent = Some(read_term(value, fluent_tpe, env, params)?);
                pattern.negated_fluent = op == CmpOp::Ne;
                return Ok(Condition::fact(pattern));
            }
        }
    }
    Ok(Condition::Compare(
        op,
        read_expr(left, env, params)?,
        read_expr(right, env, params)?,
    ))
}

fn read_effect(expr: &SExpr, env: &ReadEnv, params: &[Parameter]) -> Result<WsModification, ErrLoc> {
    let list = expr.as_list().ok_or_else(|| expr.invalid("Expected an effect"))?;
    if list.is_empty() {
        return Ok(WsModification::And(Vec::new()));
    }
    let head = list[0]
        .as_atom()
        .ok_or_else(|| list[0].invalid("Expected an operator or predicate name"))?;
    let args = &mut list.iter();
    let _ = args.pop();
    match head.as_str() {
        "and" => Ok(WsModification::And(
            args.map(|a| read_effect(a, env, params)).collect::<Result<_, _>>()?,
        )),
        "not" => {
            let inner = args.pop()?;
            ensure_end(args)?;
            Ok(WsModification::Fact(FactOptional::negative(read_literal_pattern(
                inner, env, params,
            )?)))
        }
        "when" => {
            let condition = read_condition(args.pop()?, env, params)?;
            let effect = read_effect(args.pop()?, env, params)?;
            ensure_end(args)?;
            Ok(WsModification::When(condition, Box::new(effect)))
        }
        "forall" => {
            let vars = args.pop_list()?;
            let vars = pddl::consume_typed_symbols(&mut vars.iter())?;
            let vars = read_declared_parameters(&vars, &env.ontology.types)?;
            let mut scoped = params.to_vec();
            scoped.extend(vars.iter().cloned());
            let body = args.pop()?;
            ensure_end(args)?;
            let mut effect = read_effect(body, env, &scoped)?;
            for var in vars.into_iter().rev() {
                effect = WsModification::Forall(var, Box::new(effect));
            }
            Ok(effect)
        }
        "assign" | "=" | "increase" | "decrease" | "scale-up" => {
            let target_expr = args.pop()?;
            let value = args.pop()?;
            ensure_end(args)?;
            let target = read_fact_expr(target_expr, env, params)?;
            if target.fluent.is_none() {
                return Err(target_expr.invalid(format!(
                    "predicate `{}` is boolean and takes no value",
                    target.predicate_name()
                )));
            }
            let value = match value {
                SExpr::Atom(a) if a.as_str() == "undefined" => Expr::Undefined,
                other => read_expr(other, env, params)?,
            };
            Ok(match head.as_str() {
                "increase" => WsModification::Increase(target, value),
                "decrease" => WsModification::Decrease(target, value),
                "scale-up" => WsModification::Multiply(target, value),
                _ => WsModification::Assign(target, value),
            })
        }
        _ => {
            let pattern = read_fact_expr(expr, env, params)?;
            if pattern.fluent.is_some() {
                return Err(expr.invalid("a fluent needs a value: use `(= (pred args) value)`"));
            }
            Ok(WsModification::Fact(FactOptional::positive(pattern)))
        }
    }
}

fn read_expr(expr: &SExpr, env: &ReadEnv, params: &[Parameter]) -> Result<Expr, ErrLoc> {
    match expr {
        SExpr::Atom(atom) => {
            let text = atom.as_str();
            if text == "undefined" {
                return Ok(Expr::Undefined);
            }
            if let Ok(n) = text.parse::<Number>() {
                return Ok(Expr::Number(n.to_string()));
            }
            if let Some(p) = params.iter().find(|p| p.name == text) {
                return Ok(Expr::Param(p.clone()));
            }
            if let Some(e) = env.entities.get(text).or_else(|| env.ontology.constants.get(text)) {
                return Ok(Expr::Value(e.clone()));
            }
            Err(atom.invalid(format!("unknown symbol `{text}`")))
        }
        SExpr::List(list) => {
            if list.is_empty() {
                return Err(list.invalid("Expected an expression"));
            }
            let head = list[0]
                .as_atom()
                .ok_or_else(|| list[0].invalid("Expected an operator or fluent name"))?;
            match head.as_str() {
                "+" | "-" | "*" => {
                    let args = &mut list.iter();
                    let _ = args.pop();
                    let left = read_expr(args.pop()?, env, params)?;
                    let right = read_expr(args.pop()?, env, params)?;
                    ensure_end(args)?;
                    Ok(match head.as_str() {
                        "+" => Expr::Plus(Box::new(left), Box::new(right)),
                        "-" => Expr::Minus(Box::new(left), Box::new(right)),
                        _ => Expr::Mul(Box::new(left), Box::new(right)),
                    })
                }
                _ => {
                    let pattern = read_fact_expr(expr, env, params)?;
                    if pattern.fluent.is_none() {
                        return Err(expr.invalid(format!(
                            "predicate `{}` is boolean and has no value to read",
                            pattern.predicate_name()
                        )));
                    }
                    Ok(Expr::Fluent(pattern))
                }
            }
        }
    }
}

/// Reads a literal that is either `(pred args)` or the fluent equation
/// `(= (pred args) value)`, as negated effects may target both.
fn read_literal_pattern(expr: &SExpr, env: &ReadEnv, params: &[Parameter]) -> Result<FactPattern, ErrLoc> {
    if let Some([target, value]) = expr.as_application("=") {
        let mut pattern = read_fact_expr(target, env, params)?;
        if pattern.fluent.is_none() {
            return Err(target.invalid(format!(
                "predicate `{}` is boolean and takes no value",
                pattern.predicate_name()
            )));
        }
        let value = value
            .as_atom()
            .ok_or_else(|| value.invalid("Expected a fluent value"))?;
        let predicate = env.ontology.predicates.predicate(pattern.predicate).clone();
        let fluent_tpe = predicate.fluent.expect("checked above");
        pattern.fluent = Some(read_term(value, fluent_tpe, env, params)?);
        return Ok(pattern);
    }
    read_fact_expr(expr, env, params)
}

/// Reads an atomic `(pred arg...)` expression into a fact pattern, checking
/// predicate existence, arity and argument types.
fn read_fact_expr(expr: &SExpr, env: &ReadEnv, params: &[Parameter]) -> Result<FactPattern, ErrLoc> {
    let list = expr.as_list().ok_or_else(|| expr.invalid("Expected a fact"))?;
    let mut iter = list.iter();
    let name = iter.pop_atom()?;
    let predicate_id = env
        .ontology
        .predicates
        .get(name.as_str())
        .ok_or_else(|| name.invalid(format!("unknown predicate `{name}`")))?;
    let predicate = env.ontology.predicates.predicate(predicate_id).clone();
    if iter.len() != predicate.arity() {
        return Err(expr.invalid(format!(
            "predicate `{name}` expects {} argument(s), got {}",
            predicate.arity(),
            iter.len()
        )));
    }
    let mut args = Vec::with_capacity(predicate.arity());
    for declared in &predicate.parameters {
        let atom = iter.pop_atom()?;
        args.push(read_term(atom, declared.tpe, env, params)?);
    }
    let fluent = predicate.fluent.map(|_| Term::Any);
    Ok(FactPattern::new(predicate_id, name.as_str(), args, fluent))
}

fn read_ground_fact(expr: &SExpr, env: &ReadEnv) -> Result<Fact, ErrLoc> {
    let pattern = read_fact_expr(expr, env, &[])?;
    pattern
        .ground(&crate::facts::Bindings::new())
        .map_err(|e| expr.invalid(e.to_string()))
}

fn read_term(atom: &SAtom, expected: TypeId, env: &ReadEnv, params: &[Parameter]) -> Result<Term, ErrLoc> {
    let text = atom.as_str();
    if text == crate::ontology::ANY_VALUE {
        return Ok(Term::Any);
    }
    if let Some(p) = params.iter().find(|p| p.name == text) {
        if !env.ontology.types.is_a(p.tpe, expected) && !env.ontology.types.is_a(expected, p.tpe) {
            return Err(atom.invalid(format!(
                "parameter `{text}` has type `{}` but `{}` was expected",
                env.ontology.types.name(p.tpe),
                env.ontology.types.name(expected)
            )));
        }
        return Ok(Term::Var(p.clone()));
    }
    if text.starts_with('?') {
        return Err(atom.invalid(format!("unknown parameter `{text}`")));
    }
    if let Some(e) = env.entities.get(text).or_else(|| env.ontology.constants.get(text)) {
        if !env.ontology.types.is_a(e.tpe, expected) {
            return Err(atom.invalid(format!(
                "`{text}` has type `{}` but `{}` was expected",
                env.ontology.types.name(e.tpe),
                env.ontology.types.name(expected)
            )));
        }
        return Ok(Term::Const(e.clone()));
    }
    if let Ok(n) = text.parse::<Number>() {
        if expected == env.ontology.types.number() {
            return Ok(Term::Const(Entity::number(n, &env.ontology.types)));
        }
    }
    Err(atom.invalid(format!("unknown constant `{text}`")))
}

fn ensure_end(iter: &mut sexpr::ListIter) -> Result<(), ErrLoc> {
    match iter.next() {
        None => Ok(()),
        Some(extra) => Err(extra.invalid("Expected end of list")),
    }
}

/// Loads a domain and problem pair, resolving goal tiers and the initial
/// world, as the CLI does.
pub fn load_domain_and_problem(
    domain_text: Input,
    problem_text: Input,
) -> Result<(Domain, Problem), ParseError> {
    let domain = parse_domain(domain_text)?;
    let problem = parse_problem(problem_text, &domain)?;
    Ok((domain, problem))
}

#[cfg(test)]
mod tests {
    use super::*;

    static DOMAIN: &str = "(define (domain robot_domain)
        (:requirements :strips :typing :negative-preconditions :existential-preconditions :conditional-effects :universal-preconditions :fluents :numeric-fluents)
        (:types entity location - object
                robot object_item - entity)
        (:constants self - robot)
        (:predicates
            (at ?e - entity) - location
            (touched ?o - object_item)
            (battery ?r - robot) - number
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

    static PROBLEM: &str = "(define (problem fetch) (:domain robot_domain)
        (:objects pen - object_item
                  kitchen bedroom - location)
        (:init (= (at self) kitchen)
               (= (at pen) kitchen)
               (= (battery self) 4))
        (:goal (and (touched pen)))
    )";

    #[test]
    fn loads_domain_and_problem() {
        let (domain, problem) =
            load_domain_and_problem(Input::from_string(DOMAIN), Input::from_string(PROBLEM)).unwrap();
        assert_eq!(domain.name(), "robot_domain");
        assert_eq!(domain.actions().len(), 2);
        assert_eq!(problem.name, "fetch");
        let at_pen = Fact::from_str("at(pen)=kitchen", domain.ontology(), &problem.entities).unwrap();
        assert!(problem.world_state.has_fact(&at_pen));
        assert_eq!(problem.goal_stack.goals().len(), 1);
    }

    #[test]
    fn ordered_goals_get_descending_priorities() {
        let (domain, problem) = load_domain_and_problem(
            Input::from_string(DOMAIN),
            Input::from_string(
                "(define (problem fetch) (:domain robot_domain)
                    (:objects pen cup - object_item)
                    (:init )
                    (:goal (and ;; __ORDERED
                        (touched pen)
                        (touched cup)
                    ))
                )",
            ),
        )
        .unwrap();
        let _ = domain;
        let tiers = problem.goal_stack.goals();
        assert_eq!(tiers.len(), 2);
        let priorities: Vec<i32> = tiers.keys().copied().collect();
        assert_eq!(priorities, vec![DEFAULT_PRIORITY, DEFAULT_PRIORITY + 1]);
        // highest priority tier holds the leftmost goal
        assert_eq!(tiers[&(DEFAULT_PRIORITY + 1)][0].to_string(), "touched(pen)");
    }

    #[test]
    fn persist_marker_applies_to_preceding_goal() {
        let (_, problem) = load_domain_and_problem(
            Input::from_string(DOMAIN),
            Input::from_string(
                "(define (problem fetch) (:domain robot_domain)
                    (:objects pen - object_item)
                    (:init )
                    (:goal (and (touched pen) ;; __PERSIST
                    ))
                )",
            ),
        )
        .unwrap();
        let (goal, _) = problem.goal_stack.top_goal().unwrap();
        assert!(goal.is_persistent());
    }

    #[test]
    fn unknown_predicate_is_a_located_error() {
        let err = load_domain_and_problem(
            Input::from_string(DOMAIN),
            Input::from_string(
                "(define (problem fetch) (:domain robot_domain)
                    (:objects )
                    (:init (ghost_fact))
                    (:goal (and )))",
            ),
        )
        .unwrap_err();
        assert!(err.message.contains("unknown predicate"));
        assert!(err.line > 0);
        assert_eq!(err.fragment, "ghost_fact");
    }
}
