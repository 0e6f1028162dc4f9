use crate::errors::{DomainError, ParseError};
use crate::ontology::entities::Parameter;
use crate::ontology::types::{SetOfTypes, TypeId};
use std::collections::HashMap;
use std::fmt::{Debug, Formatter};
use stratum_utils::disp_iter;

/// Compact identifier of a predicate inside its `SetOfPredicates` arena.
/// The id doubles as the fact signature: predicate names are unique.
#[derive(Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash)]
pub struct PredicateId(u32);

impl PredicateId {
    pub fn raw(self) -> u32 {
        self.0
    }
}

impl From<PredicateId> for usize {
    fn from(p: PredicateId) -> Self {
        p.0 as usize
    }
}

impl Debug for PredicateId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "p{}", self.0)
    }
}

/// A predicate declaration. A predicate without a fluent type is boolean; a
/// predicate with one maps each argument tuple to at most one value of that
/// type.
#[derive(Clone)]
pub struct Predicate {
    pub name: String,
    pub parameters: Vec<Parameter>,
    pub fluent: Option<TypeId>,
}

impl Predicate {
    pub fn new(name: impl Into<String>, parameters: Vec<Parameter>, fluent: Option<TypeId>) -> Predicate {
        Predicate {
            name: name.into(),
            parameters,
            fluent,
        }
    }

    pub fn arity(&self) -> usize {
        self.parameters.len()
    }

    pub fn is_fluent(&self) -> bool {
        self.fluent.is_some()
    }
}

impl Debug for Predicate {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}(", self.name)?;
        disp_iter(f, &self.parameters, ", ")?;
        write!(f, ")")
    }
}

/// Arena of all the predicates of a domain, with name lookup.
#[derive(Debug, Clone, Default)]
pub struct SetOfPredicates {
    predicates: Vec<Predicate>,
    by_name: HashMap<String, PredicateId>,
}

impl SetOfPredicates {
    pub fn new() -> SetOfPredicates {
        Default::default()
    }

    pub fn add(&mut self, predicate: Predicate) -> Result<PredicateId, DomainError> {
        if self.by_name.contains_key(&predicate.name) {
            return Err(DomainError::DuplicatePredicate(predicate.name));
        }
        let id = PredicateId(self.predicates.len() as u32);
        self.by_name.insert(predicate.name.clone(), id);
        self.predicates.push(predicate);
        Ok(id)
    }

    pub fn get(&self, name: &str) -> Option<PredicateId> {
        self.by_name.get(name).copied()
    }

    pub fn predicate(&self, id: PredicateId) -> &Predicate {
        &self.predicates[usize::from(id)]
    }

    pub fn name(&self, id: PredicateId) -> &str {
        &self.predicates[usize::from(id)].name
    }

    pub fn iter(&self) -> impl Iterator<Item = (PredicateId, &Predicate)> {
        self.predicates
            .iter()
            .enumerate()
            .map(|(i, p)| (PredicateId(i as u32), p))
    }

    pub fn len(&self) -> usize {
        self.predicates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.predicates.is_empty()
    }

    /// Reads declarations of the form `name(?a - t1, ?b - t2)` or
    /// `name(?a - t1) - fluent_type`, one per line. A bare `name` declares a
    /// zero-ary boolean predicate.
    pub fn from_str(text: &str, types: &SetOfTypes) -> Result<SetOfPredicates, ParseError> {
        let mut predicates = SetOfPredicates::new();
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let (decl, fluent) = match line.rfind(')') {
                Some(close) => {
                    let rest = line[close + 1..].trim();
                    let fluent = match rest.strip_prefix('-') {
                        Some(tpe_name) => {
                            let tpe_name = tpe_name.trim();
                            Some(types.get(tpe_name).ok_or_else(|| {
                                ParseError::new(format!("unknown fluent type `{tpe_name}`"), line)
                            })?)
                        }
                        None if rest.is_empty() => None,
                        None => return Err(ParseError::new("unexpected trailing text", line)),
                    };
                    (&line[..=close], fluent)
                }
                None => (line, None),
            };
            let (name, parameters) = match decl.split_once('(') {
                None => (decl, Vec::new()),
                Some((name, args)) => {
                    let args = args
                        .strip_suffix(')')
                        .ok_or_else(|| ParseError::new("unclosed parameter list", line))?;
                    let mut parameters = Vec::new();
                    for arg in args.split(',').filter(|a| !a.trim().is_empty()) {
                        parameters.push(Parameter::from_str(arg.trim(), types)?);
                    }
                    (name, parameters)
                }
            };
            predicates
                .add(Predicate::new(name.trim(), parameters, fluent))
                .map_err(|e| ParseError::new(e.to_string(), line))?;
        }
        Ok(predicates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_boolean_and_fluent_declarations() {
        let types = SetOfTypes::from_pddl("robot location").unwrap();
        let predicates = SetOfPredicates::from_str(
            "at(?r - robot) - location\n\
             charged(?r - robot)\n\
             fact_a",
            &types,
        )
        .unwrap();
        let at = predicates.get("at").unwrap();
        assert!(predicates.predicate(at).is_fluent());
        assert_eq!(predicates.predicate(at).arity(), 1);
        let fact_a = predicates.get("fact_a").unwrap();
        assert!(!predicates.predicate(fact_a).is_fluent());
        assert_eq!(predicates.predicate(fact_a).arity(), 0);
    }

    #[test]
    fn duplicate_predicate_is_rejected() {
        let types = SetOfTypes::new();
        assert!(SetOfPredicates::from_str("a\na", &types).is_err());
    }
}
