pub mod mapping;

use crate::errors::{ParseError, RuntimeError};
use crate::ontology::{Entity, Ontology, Parameter, PredicateId, SetOfEntities, ANY_VALUE};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{Debug, Display, Formatter};
use stratum_utils::disp_iter;

/// Prefix marking a predicate as punctual: a punctual fact is notified to
/// observers when produced but never stored in the world state.
pub const PUNCTUAL_PREFIX: &str = "~punctual~";

/// Candidate values accumulated for each parameter while evaluating a
/// condition. A parameter bound to several values means any of them works so
/// far; later conjuncts narrow the set.
pub type Bindings = BTreeMap<String, BTreeSet<Entity>>;

/// The single value bound to a parameter, when it has been narrowed to one.
pub fn bound_value<'a>(bindings: &'a Bindings, name: &str) -> Option<&'a Entity> {
    match bindings.get(name) {
        Some(values) if values.len() == 1 => values.iter().next(),
        _ => None,
    }
}

/// Merges an extension produced by a sub-condition into `bindings`,
/// intersecting candidate sets for parameters present in both.
pub fn merge_bindings(bindings: &mut Bindings, extension: Bindings) -> bool {
    for (name, values) in extension {
        match bindings.get_mut(&name) {
            None => {
                bindings.insert(name, values);
            }
            Some(existing) => {
                let narrowed: BTreeSet<Entity> = existing.intersection(&values).cloned().collect();
                if narrowed.is_empty() {
                    return false;
                }
                *existing = narrowed;
            }
        }
    }
    true
}

/// One slot of a lifted fact: a concrete entity, a parameter placeholder or
/// the `*` wildcard.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Term {
    Const(Entity),
    Var(Parameter),
    Any,
}

impl Term {
    pub fn as_const(&self) -> Option<&Entity> {
        match self {
            Term::Const(e) => Some(e),
            _ => None,
        }
    }

    pub fn is_placeholder(&self) -> bool {
        !matches!(self, Term::Const(_))
    }

    /// Resolves the slot to an entity under `bindings`, if possible.
    pub fn resolve<'a>(&'a self, bindings: &'a Bindings) -> Option<&'a Entity> {
        match self {
            Term::Const(e) => Some(e),
            Term::Var(p) => bound_value(bindings, &p.name),
            Term::Any => None,
        }
    }
}

impl Display for Term {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Term::Const(e) => write!(f, "{e}"),
            Term::Var(p) => write!(f, "{}", p.name),
            Term::Any => write!(f, "{ANY_VALUE}"),
        }
    }
}

impl Debug for Term {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self}")
    }
}

/// A ground fact: either membership of a boolean predicate, or the equation
/// `predicate(args) = value` for a fluent predicate.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Fact {
    pub predicate: PredicateId,
    name: String,
    pub args: Vec<Entity>,
    pub fluent: Option<Entity>,
}

impl Fact {
    pub fn new(predicate: PredicateId, name: impl Into<String>, args: Vec<Entity>, fluent: Option<Entity>) -> Fact {
        Fact {
            predicate,
            name: name.into(),
            args,
            fluent,
        }
    }

    pub fn predicate_name(&self) -> &str {
        &self.name
    }

    pub fn is_punctual(&self) -> bool {
        self.name.starts_with(PUNCTUAL_PREFIX)
    }

    /// The argument tuple as strings, used as the functional-slot key.
    pub fn arg_values(&self) -> Vec<String> {
        self.args.iter().map(|a| a.value.clone()).collect()
    }

    /// Parses `pred(a, b)` or `pred(a, b)=v` against the ontology and the
    /// problem entities.
    pub fn from_str(s: &str, ontology: &Ontology, entities: &SetOfEntities) -> Result<Fact, ParseError> {
        let pattern = FactPattern::from_str(s, ontology, entities, &[])?;
        if pattern.negated_fluent {
            return Err(ParseError::new("a ground fact cannot carry `!=`", s));
        }
        pattern
            .ground(&Bindings::new())
            .map_err(|e| ParseError::new(e.to_string(), s))
    }
}

impl Display for Fact {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)?;
        if !self.args.is_empty() {
            write!(f, "(")?;
            disp_iter(f, &self.args, ", ")?;
            write!(f, ")")?;
        }
        if let Some(v) = &self.fluent {
            write!(f, "={v}")?;
        }
        Ok(())
    }
}

impl Debug for Fact {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self}")
    }
}

/// A possibly-lifted fact, as it appears in conditions and effects.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FactPattern {
    pub predicate: PredicateId,
    name: String,
    pub args: Vec<Term>,
    /// `None` for boolean predicates; fluent predicates always carry a slot,
    /// `Term::Any` when the pattern does not constrain the value.
    pub fluent: Option<Term>,
    /// `pred(args) != v` instead of `pred(args) = v`.
    pub negated_fluent: bool,
}

impl FactPattern {
    pub fn new(predicate: PredicateId, name: impl Into<String>, args: Vec<Term>, fluent: Option<Term>) -> FactPattern {
        FactPattern {
            predicate,
            name: name.into(),
            args,
            fluent,
            negated_fluent: false,
        }
    }

    pub fn predicate_name(&self) -> &str {
        &self.name
    }

    pub fn is_punctual(&self) -> bool {
        self.name.starts_with(PUNCTUAL_PREFIX)
    }

    pub fn is_ground(&self) -> bool {
        self.args.iter().all(|t| !t.is_placeholder())
            && self.fluent.as_ref().map_or(true, |t| !t.is_placeholder())
            && !self.negated_fluent
    }

    /// Parameters appearing in this pattern.
    pub fn parameters(&self) -> impl Iterator<Item = &Parameter> {
        self.args
            .iter()
            .chain(self.fluent.iter())
            .filter_map(|t| match t {
                Term::Var(p) => Some(p),
                _ => None,
            })
    }

    /// Grounds the pattern under `bindings`. Fails on a parameter without a
    /// single bound value; a wildcard fluent slot grounds to the wildcard
    /// entity, which only callers doing lookups may accept.
    pub fn ground(&self, bindings: &Bindings) -> Result<Fact, RuntimeError> {
        let mut args = Vec::with_capacity(self.args.len());
        for term in &self.args {
            args.push(self.ground_term(term, bindings)?);
        }
        let fluent = match &self.fluent {
            None => None,
            Some(Term::Any) => {
                // keep the wildcard: lookups treat it as "any value"
                Some(Entity::new(ANY_VALUE, self.fluent_type_placeholder()))
            }
            Some(term) => Some(self.ground_term(term, bindings)?),
        };
        Ok(Fact::new(self.predicate, self.name.clone(), args, fluent))
    }

    fn ground_term(&self, term: &Term, bindings: &Bindings) -> Result<Entity, RuntimeError> {
        match term {
            Term::Const(e) => Ok(e.clone()),
            Term::Any => Err(RuntimeError::UnboundParameter {
                name: ANY_VALUE.to_string(),
                context: self.to_string(),
            }),
            Term::Var(p) => bound_value(bindings, &p.name)
                .cloned()
                .ok_or_else(|| RuntimeError::UnboundParameter {
                    name: p.name.clone(),
                    context: self.to_string(),
                }),
        }
    }

    fn fluent_type_placeholder(&self) -> crate::ontology::TypeId {
        // the wildcard entity's type is never inspected; reuse any slot type
        match self.fluent.as_ref() {
            Some(Term::Var(p)) => p.tpe,
            _ => match self.args.first() {
                Some(Term::Var(p)) => p.tpe,
                Some(Term::Const(e)) => e.tpe,
                _ => crate::ontology::SetOfTypes::new().number(),
            },
        }
    }

    /// Checks the pattern against a ground fact under existing bindings and
    /// returns the binding extension on success. The fluent slot is matched
    /// honoring `negated_fluent`.
    pub fn matches(&self, fact: &Fact, bindings: &Bindings) -> Option<Bindings> {
        if self.predicate != fact.predicate || self.args.len() != fact.args.len() {
            return None;
        }
        let mut extension = Bindings::new();
        for (term, value) in self.args.iter().zip(fact.args.iter()) {
            if !Self::match_slot(term, value, bindings, &mut extension) {
                return None;
            }
        }
        match (&self.fluent, &fact.fluent) {
            (None, None) => {}
            (Some(Term::Any), Some(_)) => {}
            (Some(term), Some(value)) => {
                if self.negated_fluent {
                    // `pred(args) != v`: the stored equation must differ
                    match term.resolve(bindings) {
                        Some(expected) => {
                            if expected == value {
                                return None;
                            }
                        }
                        None => return None,
                    }
                } else if !Self::match_slot(term, value, bindings, &mut extension) {
                    return None;
                }
            }
            _ => return None,
        }
        Some(extension)
    }

    fn match_slot(term: &Term, value: &Entity, bindings: &Bindings, extension: &mut Bindings) -> bool {
        match term {
            Term::Any => true,
            Term::Const(e) => e.is_any_value() || e == value,
            Term::Var(p) => {
                if let Some(candidates) = bindings.get(&p.name) {
                    if !candidates.contains(value) {
                        return false;
                    }
                }
                extension
                    .entry(p.name.clone())
                    .or_default()
                    .insert(value.clone());
                true
            }
        }
    }

    /// Replaces every parameter that has a single bound value by that value.
    pub fn substitute(&self, bindings: &Bindings) -> FactPattern {
        let subst = |t: &Term| match t {
            Term::Var(p) => match bound_value(bindings, &p.name) {
                Some(e) => Term::Const(e.clone()),
                None => t.clone(),
            },
            _ => t.clone(),
        };
        FactPattern {
            predicate: self.predicate,
            name: self.name.clone(),
            args: self.args.iter().map(subst).collect(),
            fluent: self.fluent.as_ref().map(subst),
            negated_fluent: self.negated_fluent,
        }
    }

    /// Can this lifted literal and `other` denote the same ground fact? Used
    /// when wiring successions: slots unify when constants agree or when a
    /// placeholder's type overlaps the other slot's type.
    pub fn can_unify(&self, other: &FactPattern, types: &crate::ontology::SetOfTypes) -> bool {
        if self.predicate != other.predicate || self.args.len() != other.args.len() {
            return false;
        }
        let slot_unifies = |a: &Term, b: &Term| match (a, b) {
            (Term::Const(x), Term::Const(y)) => x.is_any_value() || y.is_any_value() || x == y,
            (Term::Var(p), Term::Const(e)) | (Term::Const(e), Term::Var(p)) => {
                e.tpe == p.tpe || types.is_a(e.tpe, p.tpe) || types.is_a(p.tpe, e.tpe)
            }
            (Term::Var(p), Term::Var(q)) => types.is_a(p.tpe, q.tpe) || types.is_a(q.tpe, p.tpe),
            (Term::Any, _) | (_, Term::Any) => true,
        };
        if !self.args.iter().zip(other.args.iter()).all(|(a, b)| slot_unifies(a, b)) {
            return false;
        }
        match (&self.fluent, &other.fluent) {
            (None, None) => true,
            (Some(a), Some(b)) => slot_unifies(a, b),
            _ => false,
        }
    }

    /// Parses `pred(?a, b)`, `pred(a)=v`, `pred(a)!=v` against the ontology,
    /// the problem entities and the declared parameters.
    pub fn from_str(
        s: &str,
        ontology: &Ontology,
        entities: &SetOfEntities,
        parameters: &[Parameter],
    ) -> Result<FactPattern, ParseError> {
        let s = s.trim();
        let (body, fluent_text, negated_fluent) = match s.find("!=") {
            Some(i) => (&s[..i], Some(s[i + 2..].trim()), true),
            None => match s.rfind('=') {
                Some(i) if !s[..i].ends_with(['<', '>', '!']) => (&s[..i], Some(s[i + 1..].trim()), false),
                _ => (s, None, false),
            },
        };
        let body = body.trim();
        let (name, arg_texts): (&str, Vec<&str>) = match body.split_once('(') {
            None => (body, Vec::new()),
            Some((name, rest)) => {
                let inner = rest
                    .strip_suffix(')')
                    .ok_or_else(|| ParseError::new("unclosed argument list", s))?;
                let args = if inner.trim().is_empty() {
                    Vec::new()
                } else {
                    inner.split(',').map(str::trim).collect()
                };
                (name.trim(), args)
            }
        };
        let predicate_id = ontology
            .predicates
            .get(name)
            .ok_or_else(|| ParseError::new(format!("unknown predicate `{name}`"), s))?;
        let predicate = ontology.predicates.predicate(predicate_id).clone();
        if arg_texts.len() != predicate.arity() {
            return Err(ParseError::new(
                format!(
                    "predicate `{name}` expects {} argument(s), got {}",
                    predicate.arity(),
                    arg_texts.len()
                ),
                s,
            ));
        }

        let resolve = |text: &str, expected: crate::ontology::TypeId| -> Result<Term, ParseError> {
            if text == ANY_VALUE {
                return Ok(Term::Any);
            }
            if let Some(p) = parameters.iter().find(|p| p.name == text) {
                return Ok(Term::Var(p.clone()));
            }
            if text.starts_with('?') {
                return Err(ParseError::new(format!("unknown parameter `{text}`"), s));
            }
            if let Some(e) = entities.get(text).or_else(|| ontology.constants.get(text)) {
                if !ontology.types.is_a(e.tpe, expected) {
                    return Err(ParseError::new(
                        format!(
                            "`{text}` has type `{}` but `{}` was expected",
                            ontology.types.name(e.tpe),
                            ontology.types.name(expected)
                        ),
                        s,
                    ));
                }
                return Ok(Term::Const(e.clone()));
            }
            if let Ok(n) = text.parse::<crate::ontology::Number>() {
                if expected == ontology.types.number() {
                    return Ok(Term::Const(Entity::number(n, &ontology.types)));
                }
            }
            Err(ParseError::new(format!("unknown constant `{text}`"), s))
        };

        let mut args = Vec::with_capacity(arg_texts.len());
        for (text, param) in arg_texts.iter().zip(predicate.parameters.iter()) {
            args.push(resolve(text, param.tpe)?);
        }

        let fluent = match (predicate.fluent, fluent_text) {
            (None, None) => None,
            (None, Some(_)) => {
                return Err(ParseError::new(
                    format!("predicate `{name}` is boolean and takes no value"),
                    s,
                ))
            }
            (Some(_), None) => Some(Term::Any),
            (Some(tpe), Some(text)) => {
                if text == "undefined" {
                    return Err(ParseError::new(
                        "`undefined` only appears in conditions and assignments",
                        s,
                    ));
                }
                Some(resolve(text, tpe)?)
            }
        };

        Ok(FactPattern {
            predicate: predicate_id,
            name: name.to_string(),
            args,
            fluent,
            negated_fluent,
        })
    }
}

impl Display for FactPattern {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)?;
        if !self.args.is_empty() {
            write!(f, "(")?;
            disp_iter(f, &self.args, ", ")?;
            write!(f, ")")?;
        }
        match &self.fluent {
            Some(Term::Any) => {}
            Some(v) if self.negated_fluent => write!(f, "!={v}")?,
            Some(v) => write!(f, "={v}")?,
            None => {}
        }
        Ok(())
    }
}

impl Debug for FactPattern {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self}")
    }
}

impl From<&Fact> for FactPattern {
    fn from(fact: &Fact) -> Self {
        FactPattern {
            predicate: fact.predicate,
            name: fact.name.clone(),
            args: fact.args.iter().map(|e| Term::Const(e.clone())).collect(),
            fluent: fact.fluent.as_ref().map(|e| Term::Const(e.clone())),
            negated_fluent: false,
        }
    }
}

/// An atomic condition or effect literal: a fact pattern, possibly negated.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FactOptional {
    pub negated: bool,
    pub pattern: FactPattern,
}

impl FactOptional {
    pub fn positive(pattern: FactPattern) -> FactOptional {
        FactOptional {
            negated: false,
            pattern,
        }
    }

    pub fn negative(pattern: FactPattern) -> FactOptional {
        FactOptional {
            negated: true,
            pattern,
        }
    }

    /// Two optional facts cancel out when one asserts what the other denies.
    pub fn contradicts(&self, other: &FactOptional, types: &crate::ontology::SetOfTypes) -> bool {
        if !self.pattern.can_unify(&other.pattern, types) {
            return false;
        }
        if self.negated != other.negated {
            return true;
        }
        // two assignments of the same fluent slot to different values clash
        if let (Some(a), Some(b)) = (&self.pattern.fluent, &other.pattern.fluent) {
            if let (Term::Const(x), Term::Const(y)) = (a, b) {
                return !x.is_any_value() && !y.is_any_value() && x != y && !self.negated;
            }
        }
        false
    }

    pub fn substitute(&self, bindings: &Bindings) -> FactOptional {
        FactOptional {
            negated: self.negated,
            pattern: self.pattern.substitute(bindings),
        }
    }
}

impl Display for FactOptional {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if self.negated {
            write!(f, "!{}", self.pattern)
        } else {
            write!(f, "{}", self.pattern)
        }
    }
}

impl Debug for FactOptional {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ontology::{SetOfPredicates, SetOfTypes};

    fn ontology() -> Ontology {
        let types = SetOfTypes::from_pddl("robot location").unwrap();
        let predicates = SetOfPredicates::from_str(
            "at(?r - robot) - location\n\
             charged(?r - robot)\n\
             battery(?r - robot) - number",
            &types,
        )
        .unwrap();
        let constants = crate::ontology::SetOfEntities::from_pddl("base - location", &types).unwrap();
        Ontology {
            types,
            predicates,
            constants,
        }
    }

    fn entities(ontology: &Ontology) -> SetOfEntities {
        SetOfEntities::from_pddl("r1 - robot\nkitchen - location", &ontology.types).unwrap()
    }

    #[test]
    fn parses_fluent_fact() {
        let ontology = ontology();
        let entities = entities(&ontology);
        let fact = Fact::from_str("at(r1)=kitchen", &ontology, &entities).unwrap();
        assert_eq!(fact.to_string(), "at(r1)=kitchen");
        assert_eq!(fact.args.len(), 1);
    }

    #[test]
    fn rejects_bad_arity_and_unknown_symbols() {
        let ontology = ontology();
        let entities = entities(&ontology);
        assert!(Fact::from_str("at(r1, r1)=kitchen", &ontology, &entities).is_err());
        assert!(Fact::from_str("nope(r1)", &ontology, &entities).is_err());
        assert!(Fact::from_str("charged(ghost)", &ontology, &entities).is_err());
    }

    #[test]
    fn rejects_type_mismatch() {
        let ontology = ontology();
        let entities = entities(&ontology);
        // kitchen is a location, not a robot
        assert!(Fact::from_str("charged(kitchen)", &ontology, &entities).is_err());
    }

    #[test]
    fn pattern_matches_and_extends_bindings() {
        let ontology = ontology();
        let entities = entities(&ontology);
        let params = vec![Parameter::new("?r", ontology.types.get("robot").unwrap())];
        let pattern = FactPattern::from_str("at(?r)=kitchen", &ontology, &entities, &params).unwrap();
        let fact = Fact::from_str("at(r1)=kitchen", &ontology, &entities).unwrap();
        let ext = pattern.matches(&fact, &Bindings::new()).unwrap();
        assert!(ext["?r"].contains(entities.get("r1").unwrap()));

        let other = Fact::from_str("at(r1)=base", &ontology, &entities).unwrap();
        assert!(pattern.matches(&other, &Bindings::new()).is_none());
    }

    #[test]
    fn negated_fluent_matches_other_values() {
        let ontology = ontology();
        let entities = entities(&ontology);
        let pattern = FactPattern::from_str("at(r1)!=base", &ontology, &entities, &[]).unwrap();
        let at_kitchen = Fact::from_str("at(r1)=kitchen", &ontology, &entities).unwrap();
        let at_base = Fact::from_str("at(r1)=base", &ontology, &entities).unwrap();
        assert!(pattern.matches(&at_kitchen, &Bindings::new()).is_some());
        assert!(pattern.matches(&at_base, &Bindings::new()).is_none());
    }

    #[test]
    fn lifted_literals_unify_by_type() {
        let ontology = ontology();
        let entities = entities(&ontology);
        let params = vec![Parameter::new("?r", ontology.types.get("robot").unwrap())];
        let lifted = FactPattern::from_str("charged(?r)", &ontology, &entities, &params).unwrap();
        let ground = FactPattern::from_str("charged(r1)", &ontology, &entities, &[]).unwrap();
        assert!(lifted.can_unify(&ground, &ontology.types));
    }
}
