use crate::conditions::{expr_from_str, Condition, EvalCtx, Expr, Value};
use crate::errors::{ParseError, RuntimeError};
use crate::facts::mapping::{AddOutcome, FactsMapping};
use crate::facts::{Bindings, Fact, FactOptional, FactPattern, Term};
use crate::ontology::{Entity, Ontology, Parameter, SetOfEntities};
use std::collections::BTreeSet;
use std::fmt::{Debug, Display, Formatter};
use std::ops::ControlFlow;

/// Net record of one world mutation: what was added, removed and pinged.
#[derive(Clone, Debug, Default)]
pub struct WhatChanged {
    pub added: BTreeSet<Fact>,
    pub removed: BTreeSet<Fact>,
    /// Punctual facts are notified but never stored.
    pub punctual: BTreeSet<Fact>,
    /// Goals stacked by the events that fired during the mutation.
    pub goals_to_add: std::collections::BTreeMap<i32, Vec<crate::goals::Goal>>,
}

impl WhatChanged {
    pub fn something_changed(&self) -> bool {
        !self.added.is_empty() || !self.removed.is_empty() || !self.punctual.is_empty()
    }

    pub fn has_fact_modifications(&self) -> bool {
        !self.added.is_empty() || !self.removed.is_empty()
    }

    fn note_added(&mut self, fact: Fact) {
        self.removed.remove(&fact);
        self.added.insert(fact);
    }

    fn note_removed(&mut self, fact: Fact) {
        self.added.remove(&fact);
        self.removed.insert(fact);
    }

    /// Signatures touched by this delta, used to shortlist events.
    pub fn touched_predicates(&self) -> BTreeSet<crate::ontology::PredicateId> {
        self.added
            .iter()
            .chain(self.removed.iter())
            .chain(self.punctual.iter())
            .map(|f| f.predicate)
            .collect()
    }
}

/// An effect: a recipe transforming the facts container.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum WsModification {
    /// Adds the fact, or removes it when negated.
    Fact(FactOptional),
    /// Sets a fluent equation; assigning `undefined` retracts it.
    Assign(FactPattern, Expr),
    Increase(FactPattern, Expr),
    Decrease(FactPattern, Expr),
    Multiply(FactPattern, Expr),
    When(Condition, Box<WsModification>),
    Forall(Parameter, Box<WsModification>),
    And(Vec<WsModification>),
}

impl WsModification {
    /// Chains two optional modifications.
    pub fn merge(a: Option<WsModification>, b: Option<WsModification>) -> Option<WsModification> {
        match (a, b) {
            (None, x) | (x, None) => x,
            (Some(WsModification::And(mut xs)), Some(y)) => {
                xs.push(y);
                Some(WsModification::And(xs))
            }
            (Some(x), Some(y)) => Some(WsModification::And(vec![x, y])),
        }
    }

    /// Applies the modification, accumulating the net delta. Errors leave
    /// `facts` in a partially-applied state: callers that need atomicity
    /// apply on a scratch copy first, as `WorldState::modify` does.
    pub fn apply(
        &self,
        facts: &mut FactsMapping,
        ctx: &EvalCtx,
        bindings: &Bindings,
        changed: &mut WhatChanged,
    ) -> Result<(), RuntimeError> {
        match self {
            WsModification::Fact(opt) if !opt.negated => {
                let fact = opt.pattern.ground(bindings)?;
                if fact.fluent.as_ref().is_some_and(|v| v.is_any_value()) {
                    return Err(RuntimeError::UnboundParameter {
                        name: crate::ontology::ANY_VALUE.to_string(),
                        context: opt.pattern.to_string(),
                    });
                }
                if fact.is_punctual() {
                    changed.punctual.insert(fact);
                    return Ok(());
                }
                self.check_fluent_type(&fact, ctx)?;
                match facts.add(fact.clone()) {
                    AddOutcome::Added => changed.note_added(fact),
                    AddOutcome::Replaced(old) => {
                        changed.note_removed(old);
                        changed.note_added(fact);
                    }
                    AddOutcome::Unchanged => {}
                }
                Ok(())
            }
            WsModification::Fact(opt) => {
                let fact = opt.pattern.ground(bindings)?;
                if let Some(removed) = facts.remove(&fact) {
                    changed.note_removed(removed);
                }
                Ok(())
            }
            WsModification::Assign(target, expr) => {
                let value = expr.eval(facts, bindings);
                self.write_fluent(target, value, facts, ctx, bindings, changed)
            }
            WsModification::Increase(target, expr) => {
                self.arith(target, expr, facts, ctx, bindings, changed, crate::ontology::Number::add)
            }
            WsModification::Decrease(target, expr) => {
                self.arith(target, expr, facts, ctx, bindings, changed, crate::ontology::Number::sub)
            }
            WsModification::Multiply(target, expr) => {
                self.arith(target, expr, facts, ctx, bindings, changed, crate::ontology::Number::mul)
            }
            WsModification::When(condition, inner) => {
                let mut scratch = bindings.clone();
                if condition.eval(facts, ctx, &mut scratch) {
                    inner.apply(facts, ctx, &scratch, changed)?;
                }
                Ok(())
            }
            WsModification::Forall(param, inner) => {
                for e in ctx.instances_of_type(param.tpe) {
                    let mut scoped = bindings.clone();
                    scoped.insert(param.name.clone(), BTreeSet::from([e]));
                    inner.apply(facts, ctx, &scoped, changed)?;
                }
                Ok(())
            }
            WsModification::And(parts) => {
                for p in parts {
                    p.apply(facts, ctx, bindings, changed)?;
                }
                Ok(())
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn arith(
        &self,
        target: &FactPattern,
        expr: &Expr,
        facts: &mut FactsMapping,
        ctx: &EvalCtx,
        bindings: &Bindings,
        changed: &mut WhatChanged,
        op: impl Fn(crate::ontology::Number, crate::ontology::Number) -> crate::ontology::Number,
    ) -> Result<(), RuntimeError> {
        let current = Expr::Fluent(target.clone()).eval(facts, bindings);
        let Some(current) = current.and_then(|v| v.as_number()) else {
            // no equation yet: arithmetic on undefined stays undefined
            return Ok(());
        };
        match expr.eval(facts, bindings).and_then(|v| v.as_number()) {
            None => self.write_fluent(target, None, facts, ctx, bindings, changed),
            Some(delta) => {
                let value = Some(Value::Num(op(current, delta)));
                self.write_fluent(target, value, facts, ctx, bindings, changed)
            }
        }
    }

    fn write_fluent(
        &self,
        target: &FactPattern,
        value: Option<Value>,
        facts: &mut FactsMapping,
        ctx: &EvalCtx,
        bindings: &Bindings,
        changed: &mut WhatChanged,
    ) -> Result<(), RuntimeError> {
        let mut wildcard = target.clone();
        wildcard.fluent = Some(Term::Any);
        let slot = wildcard.ground(bindings)?;
        match value {
            None => {
                if let Some(removed) = facts.remove(&slot) {
                    changed.note_removed(removed);
                }
                Ok(())
            }
            Some(v) => {
                let entity = self.value_as_entity(&slot, v, ctx)?;
                let name = slot.predicate_name().to_string();
                let fact = Fact::new(slot.predicate, name, slot.args, Some(entity));
                self.check_fluent_type(&fact, ctx)?;
                match facts.add(fact.clone()) {
                    AddOutcome::Added => changed.note_added(fact),
                    AddOutcome::Replaced(old) => {
                        changed.note_removed(old);
                        changed.note_added(fact);
                    }
                    AddOutcome::Unchanged => {}
                }
                Ok(())
            }
        }
    }

    fn value_as_entity(&self, slot: &Fact, value: Value, ctx: &EvalCtx) -> Result<Entity, RuntimeError> {
        match value {
            Value::Num(n) => Ok(Entity::number(n, &ctx.ontology.types)),
            Value::Str(s) => {
                if let Some(e) = ctx.entities.get(&s).or_else(|| ctx.ontology.constants.get(&s)) {
                    Ok(e.clone())
                } else if let Ok(n) = s.parse::<crate::ontology::Number>() {
                    Ok(Entity::number(n, &ctx.ontology.types))
                } else {
                    Err(RuntimeError::WrongFluentType {
                        fact: slot.to_string(),
                        expected: fluent_type_name(slot, ctx).to_string(),
                        got: s,
                    })
                }
            }
        }
    }

    fn check_fluent_type(&self, fact: &Fact, ctx: &EvalCtx) -> Result<(), RuntimeError> {
        let predicate = ctx.ontology.predicates.predicate(fact.predicate);
        if let (Some(expected), Some(value)) = (predicate.fluent, &fact.fluent) {
            if !ctx.ontology.types.is_a(value.tpe, expected) {
                return Err(RuntimeError::WrongFluentType {
                    fact: fact.to_string(),
                    expected: ctx.ontology.types.name(expected).to_string(),
                    got: value.value.clone(),
                });
            }
        }
        Ok(())
    }

    /// Visits every literal this effect may add or remove. Fluent writes are
    /// visited with an unconstrained value slot.
    pub fn for_each_modified_fact(&self, f: &mut impl FnMut(&FactOptional) -> ControlFlow<()>) -> ControlFlow<()> {
        match self {
            WsModification::Fact(opt) => f(opt),
            WsModification::Assign(target, expr) => {
                let mut pattern = target.clone();
                pattern.fluent = Some(match expr {
                    Expr::Value(e) => Term::Const(e.clone()),
                    _ => Term::Any,
                });
                let opt = if matches!(expr, Expr::Undefined) {
                    FactOptional::negative(pattern)
                } else {
                    FactOptional::positive(pattern)
                };
                f(&opt)
            }
            WsModification::Increase(target, _)
            | WsModification::Decrease(target, _)
            | WsModification::Multiply(target, _) => {
                let mut pattern = target.clone();
                pattern.fluent = Some(Term::Any);
                f(&FactOptional::positive(pattern))
            }
            WsModification::When(_, inner) | WsModification::Forall(_, inner) => inner.for_each_modified_fact(f),
            WsModification::And(parts) => {
                for p in parts {
                    p.for_each_modified_fact(f)?;
                }
                ControlFlow::Continue(())
            }
        }
    }

    /// Collects the literals this effect may add or remove.
    pub fn modified_facts(&self) -> BTreeSet<FactOptional> {
        let mut res = BTreeSet::new();
        let _ = self.for_each_modified_fact(&mut |opt| {
            res.insert(opt.clone());
            ControlFlow::Continue(())
        });
        res
    }

    pub fn substitute(&self, bindings: &Bindings) -> WsModification {
        match self {
            WsModification::Fact(opt) => WsModification::Fact(opt.substitute(bindings)),
            WsModification::Assign(t, e) => WsModification::Assign(t.substitute(bindings), e.substitute(bindings)),
            WsModification::Increase(t, e) => WsModification::Increase(t.substitute(bindings), e.substitute(bindings)),
            WsModification::Decrease(t, e) => WsModification::Decrease(t.substitute(bindings), e.substitute(bindings)),
            WsModification::Multiply(t, e) => WsModification::Multiply(t.substitute(bindings), e.substitute(bindings)),
            WsModification::When(c, inner) => {
                WsModification::When(c.substitute(bindings), Box::new(inner.substitute(bindings)))
            }
            WsModification::Forall(p, inner) => WsModification::Forall(p.clone(), Box::new(inner.substitute(bindings))),
            WsModification::And(parts) => WsModification::And(parts.iter().map(|p| p.substitute(bindings)).collect()),
        }
    }

    /// Parses the textual effect language: `&`-separated items among facts,
    /// `not(fact)`, `assign(access, expr)`, `increase`/`decrease`/`multiply`,
    /// `when(cond, effect)` and `forall(?x - t, effect)`.
    pub fn from_str(
        s: &str,
        ontology: &Ontology,
        entities: &SetOfEntities,
        parameters: &[Parameter],
    ) -> Result<WsModification, ParseError> {
        let parts = split_top_level(s, '&');
        if parts.len() > 1 {
            let mut items = Vec::with_capacity(parts.len());
            for p in parts {
                items.push(WsModification::from_str(p, ontology, entities, parameters)?);
            }
            return Ok(WsModification::And(items));
        }
        let s = s.trim();
        if let Some(inner) = call_body(s, "not") {
            let pattern = FactPattern::from_str(inner, ontology, entities, parameters)?;
            return Ok(WsModification::Fact(FactOptional::negative(pattern)));
        }
        for (name, build) in [
            ("assign", WsModification::Assign as fn(FactPattern, Expr) -> WsModification),
            ("set", WsModification::Assign as fn(FactPattern, Expr) -> WsModification),
            ("increase", WsModification::Increase as fn(FactPattern, Expr) -> WsModification),
            ("decrease", WsModification::Decrease as fn(FactPattern, Expr) -> WsModification),
            ("multiply", WsModification::Multiply as fn(FactPattern, Expr) -> WsModification),
        ] {
            if let Some(inner) = call_body(s, name) {
                let (target, value) = split_two(inner, s)?;
                let target = FactPattern::from_str(target, ontology, entities, parameters)?;
                let value = expr_from_str(value, ontology, entities, parameters)?;
                return Ok(build(target, value));
            }
        }
        if let Some(inner) = call_body(s, "when") {
            let (cond, effect) = split_two(inner, s)?;
            return Ok(WsModification::When(
                Condition::from_str(cond, ontology, entities, parameters)?,
                Box::new(WsModification::from_str(effect, ontology, entities, parameters)?),
            ));
        }
        if let Some(inner) = call_body(s, "forall") {
            let (decl, effect) = split_two(inner, s)?;
            let param = Parameter::from_str(decl.trim(), &ontology.types)?;
            let mut scoped = parameters.to_vec();
            scoped.push(param.clone());
            return Ok(WsModification::Forall(
                param,
                Box::new(WsModification::from_str(effect, ontology, entities, &scoped)?),
            ));
        }
        if let Some(idx) = s.find('=').filter(|&i| !s[..i].ends_with(['<', '>', '!'])) {
            let value = s[idx + 1..].trim();
            if value == "undefined" {
                let target = FactPattern::from_str(&s[..idx], ontology, entities, parameters)?;
                return Ok(WsModification::Assign(target, Expr::Undefined));
            }
        }
        let pattern = FactPattern::from_str(s, ontology, entities, parameters)?;
        Ok(WsModification::Fact(FactOptional::positive(pattern)))
    }
}

fn split_top_level(s: &str, sep: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut start = 0usize;
    for (i, c) in s.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            c if c == sep && depth == 0 => {
                parts.push(&s[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&s[start..]);
    parts
}

fn call_body<'a>(s: &'a str, name: &str) -> Option<&'a str> {
    let rest = s.strip_prefix(name)?.trim_start();
    let inner = rest.strip_prefix('(')?.strip_suffix(')')?;
    let mut depth = 0i32;
    for c in inner.chars() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth < 0 {
                    return None;
                }
            }
            _ => {}
        }
    }
    (depth == 0).then_some(inner)
}

fn split_two<'a>(inner: &'a str, whole: &str) -> Result<(&'a str, &'a str), ParseError> {
    let parts = split_top_level(inner, ',');
    if parts.len() < 2 {
        return Err(ParseError::new("expected two comma-separated arguments", whole));
    }
    let first = parts[0];
    Ok((first, &inner[first.len() + 1..]))
}

impl Display for WsModification {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            WsModification::Fact(opt) if opt.negated => write!(f, "not({})", opt.pattern),
            WsModification::Fact(opt) => write!(f, "{}", opt.pattern),
            WsModification::Assign(t, e) => write!(f, "assign({t}, {e})"),
            WsModification::Increase(t, e) => write!(f, "increase({t}, {e})"),
            WsModification::Decrease(t, e) => write!(f, "decrease({t}, {e})"),
            WsModification::Multiply(t, e) => write!(f, "multiply({t}, {e})"),
            WsModification::When(c, inner) => write!(f, "when({c}, {inner})"),
            WsModification::Forall(p, inner) => write!(f, "forall({p}, {inner})"),
            WsModification::And(parts) => {
                let mut first = true;
                for p in parts {
                    if !first {
                        write!(f, " & ")?;
                    }
                    first = false;
                    write!(f, "{p}")?;
                }
                Ok(())
            }
        }
    }
}

impl Debug for WsModification {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self}")
    }
}

fn fluent_type_name<'a>(fact: &Fact, ctx: &EvalCtx<'a>) -> &'a str {
    let predicate = ctx.ontology.predicates.predicate(fact.predicate);
    match predicate.fluent {
        Some(t) => ctx.ontology.types.name(t),
        None => "bool",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ontology::{SetOfPredicates, SetOfTypes};

    fn setup() -> (Ontology, SetOfEntities) {
        let types = SetOfTypes::from_pddl("robot location").unwrap();
        let predicates = SetOfPredicates::from_str(
            "at(?r - robot) - location\n\
             battery(?r - robot) - number\n\
             charged(?r - robot)\n\
             fact_a",
            &types,
        )
        .unwrap();
        let ontology = Ontology {
            types,
            predicates,
            constants: SetOfEntities::new(),
        };
        let entities =
            SetOfEntities::from_pddl("r1 - robot\nkitchen bedroom - location", &ontology.types).unwrap();
        (ontology, entities)
    }

    fn apply(wsm: &str, initial: &[&str], ontology: &Ontology, entities: &SetOfEntities) -> (FactsMapping, WhatChanged) {
        let mut facts = FactsMapping::new();
        for f in initial {
            facts.add(Fact::from_str(f, ontology, entities).unwrap());
        }
        let wsm = WsModification::from_str(wsm, ontology, entities, &[]).unwrap();
        let ctx = EvalCtx::new(ontology, entities);
        let mut changed = WhatChanged::default();
        wsm.apply(&mut facts, &ctx, &Bindings::new(), &mut changed).unwrap();
        (facts, changed)
    }

    #[test]
    fn add_and_remove() {
        let (ontology, entities) = setup();
        let (facts, changed) = apply("fact_a & not(charged(r1))", &["charged(r1)"], &ontology, &entities);
        assert!(facts.has(&Fact::from_str("fact_a", &ontology, &entities).unwrap()));
        assert!(!facts.has(&Fact::from_str("charged(r1)", &ontology, &entities).unwrap()));
        assert_eq!(changed.added.len(), 1);
        assert_eq!(changed.removed.len(), 1);
    }

    #[test]
    fn assign_undefined_retracts() {
        let (ontology, entities) = setup();
        let (facts, changed) = apply("at(r1)=undefined", &["at(r1)=kitchen"], &ontology, &entities);
        assert!(facts.is_empty());
        assert_eq!(changed.removed.len(), 1);
    }

    #[test]
    fn increase_adds_to_current_value() {
        let (ontology, entities) = setup();
        let (facts, _) = apply("increase(battery(r1), 2+1)", &["battery(r1)=4"], &ontology, &entities);
        assert!(facts.has(&Fact::from_str("battery(r1)=7", &ontology, &entities).unwrap()));
        // arithmetic on an absent equation leaves it absent
        let (facts, changed) = apply("increase(battery(r1), 2)", &[], &ontology, &entities);
        assert!(facts.is_empty());
        assert!(!changed.something_changed());
    }

    #[test]
    fn conditional_effect_fires_only_when_met() {
        let (ontology, entities) = setup();
        let (facts, _) = apply("when(charged(r1), fact_a)", &[], &ontology, &entities);
        assert!(facts.is_empty());
        let (facts, _) = apply("when(charged(r1), fact_a)", &["charged(r1)"], &ontology, &entities);
        assert!(facts.has(&Fact::from_str("fact_a", &ontology, &entities).unwrap()));
    }

    #[test]
    fn forall_when_clears_previous_location() {
        let (ontology, entities) = setup();
        let (facts, changed) = apply(
            "forall(?l - location, when(at(r1)=?l, not(at(r1)=?l))) & at(r1)=bedroom",
            &["at(r1)=kitchen"],
            &ontology,
            &entities,
        );
        assert!(facts.has(&Fact::from_str("at(r1)=bedroom", &ontology, &entities).unwrap()));
        assert!(!facts.has(&Fact::from_str("at(r1)=kitchen", &ontology, &entities).unwrap()));
        assert_eq!(changed.added.len(), 1);
        assert_eq!(changed.removed.len(), 1);
    }

    #[test]
    fn add_delete_and_assign_are_idempotent() {
        let (ontology, entities) = setup();
        let wsm = "fact_a & not(charged(r1)) & assign(at(r1), bedroom)";
        let (once, _) = apply(wsm, &["charged(r1)"], &ontology, &entities);
        let wsm = WsModification::from_str(wsm, &ontology, &entities, &[]).unwrap();
        let ctx = EvalCtx::new(&ontology, &entities);
        let mut twice = once.clone();
        let mut changed = WhatChanged::default();
        wsm.apply(&mut twice, &ctx, &Bindings::new(), &mut changed).unwrap();
        assert_eq!(once.facts(), twice.facts());
        assert!(!changed.something_changed());
    }

    #[test]
    fn punctual_facts_are_notified_but_not_stored() {
        let types = SetOfTypes::new();
        let predicates = SetOfPredicates::from_str("~punctual~ping\nfact_a", &types).unwrap();
        let ontology = Ontology {
            types,
            predicates,
            constants: SetOfEntities::new(),
        };
        let entities = SetOfEntities::new();
        let (facts, changed) = apply("~punctual~ping & fact_a", &[], &ontology, &entities);
        assert_eq!(facts.len(), 1);
        assert_eq!(changed.punctual.len(), 1);
        assert_eq!(changed.added.len(), 1);
    }

    #[test]
    fn wrong_typed_assignment_is_rejected() {
        let (ontology, entities) = setup();
        let mut facts = FactsMapping::new();
        facts.add(Fact::from_str("battery(r1)=5", &ontology, &entities).unwrap());
        // a number flowing into a location-valued fluent is a runtime error
        let wsm = WsModification::from_str("assign(at(r1), battery(r1))", &ontology, &entities, &[]).unwrap();
        let ctx = EvalCtx::new(&ontology, &entities);
        let mut changed = WhatChanged::default();
        let err = wsm.apply(&mut facts, &ctx, &Bindings::new(), &mut changed).unwrap_err();
        assert!(matches!(err, RuntimeError::WrongFluentType { .. }));
    }
}
