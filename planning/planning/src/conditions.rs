use crate::errors::ParseError;
use crate::facts::mapping::FactsMapping;
use crate::facts::{bound_value, merge_bindings, Bindings, FactOptional, FactPattern, Term};
use crate::ontology::{Entity, Number, Ontology, Parameter, SetOfEntities};
use itertools::Itertools;
use std::collections::BTreeSet;
use std::fmt::{Debug, Display, Formatter};
use std::ops::ControlFlow;

/// Everything a condition needs besides the facts themselves: the vocabulary
/// and the entities quantifiers range over (problem objects; domain constants
/// are reached through the ontology).
#[derive(Copy, Clone)]
pub struct EvalCtx<'a> {
    pub ontology: &'a Ontology,
    pub entities: &'a SetOfEntities,
}

impl<'a> EvalCtx<'a> {
    pub fn new(ontology: &'a Ontology, entities: &'a SetOfEntities) -> EvalCtx<'a> {
        EvalCtx { ontology, entities }
    }

    /// Problem objects and domain constants of the given type (or a subtype).
    pub fn instances_of_type(&self, tpe: crate::ontology::TypeId) -> Vec<Entity> {
        self.entities
            .instances_of_type(tpe, &self.ontology.types)
            .into_iter()
            .chain(self.ontology.constants.instances_of_type(tpe, &self.ontology.types))
            .cloned()
            .sorted()
            .dedup()
            .collect()
    }
}

/// A value-producing expression: the right-hand sides of comparisons and
/// numeric effects.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Expr {
    Number(String),
    Value(Entity),
    Param(Parameter),
    /// Value of a fluent access `pred(args)`.
    Fluent(FactPattern),
    Undefined,
    Plus(Box<Expr>, Box<Expr>),
    Minus(Box<Expr>, Box<Expr>),
    Mul(Box<Expr>, Box<Expr>),
}

/// Result of evaluating an expression; `None` at the call sites stands for
/// `undefined`.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Num(Number),
    Str(String),
}

impl Value {
    pub fn as_number(&self) -> Option<Number> {
        match self {
            Value::Num(n) => Some(*n),
            Value::Str(s) => s.parse().ok(),
        }
    }

    pub fn render(&self) -> String {
        match self {
            Value::Num(n) => n.to_string(),
            Value::Str(s) => s.clone(),
        }
    }
}

impl Expr {
    pub fn eval(&self, facts: &FactsMapping, bindings: &Bindings) -> Option<Value> {
        match self {
            Expr::Number(text) => text.parse::<Number>().ok().map(Value::Num),
            Expr::Value(e) => Some(Value::Str(e.value.clone())),
            Expr::Param(p) => bound_value(bindings, &p.name).map(|e| Value::Str(e.value.clone())),
            Expr::Undefined => None,
            Expr::Fluent(pattern) => {
                let matches = facts.find(pattern, bindings);
                matches
                    .first()
                    .and_then(|f| f.fluent.as_ref())
                    .map(|v| Value::Str(v.value.clone()))
            }
            Expr::Plus(a, b) => numeric(a, b, facts, bindings, Number::add),
            Expr::Minus(a, b) => numeric(a, b, facts, bindings, Number::sub),
            Expr::Mul(a, b) => numeric(a, b, facts, bindings, Number::mul),
        }
    }

    pub fn substitute(&self, bindings: &Bindings) -> Expr {
        match self {
            Expr::Param(p) => match bound_value(bindings, &p.name) {
                Some(e) => Expr::Value(e.clone()),
                None => self.clone(),
            },
            Expr::Fluent(pattern) => Expr::Fluent(pattern.substitute(bindings)),
            Expr::Plus(a, b) => Expr::Plus(Box::new(a.substitute(bindings)), Box::new(b.substitute(bindings))),
            Expr::Minus(a, b) => Expr::Minus(Box::new(a.substitute(bindings)), Box::new(b.substitute(bindings))),
            Expr::Mul(a, b) => Expr::Mul(Box::new(a.substitute(bindings)), Box::new(b.substitute(bindings))),
            _ => self.clone(),
        }
    }

    fn for_each_fluent_access(&self, f: &mut impl FnMut(&FactPattern)) {
        match self {
            Expr::Fluent(pattern) => f(pattern),
            Expr::Plus(a, b) | Expr::Minus(a, b) | Expr::Mul(a, b) => {
                a.for_each_fluent_access(f);
                b.for_each_fluent_access(f);
            }
            _ => {}
        }
    }
}

fn numeric(
    a: &Expr,
    b: &Expr,
    facts: &FactsMapping,
    bindings: &Bindings,
    op: impl Fn(Number, Number) -> Number,
) -> Option<Value> {
    let left = a.eval(facts, bindings)?.as_number()?;
    let right = b.eval(facts, bindings)?.as_number()?;
    Some(Value::Num(op(left, right)))
}

impl Display for Expr {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Expr::Number(n) => write!(f, "{n}"),
            Expr::Value(e) => write!(f, "{e}"),
            Expr::Param(p) => write!(f, "{}", p.name),
            Expr::Fluent(pattern) => write!(f, "{pattern}"),
            Expr::Undefined => write!(f, "undefined"),
            Expr::Plus(a, b) => write!(f, "{a}+{b}"),
            Expr::Minus(a, b) => write!(f, "{a}-{b}"),
            Expr::Mul(a, b) => write!(f, "{a}*{b}"),
        }
    }
}

impl Debug for Expr {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self}")
    }
}

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CmpOp {
    pub fn symbol(self) -> &'static str {
        match self {
            CmpOp::Eq => "=",
            CmpOp::Ne => "!=",
            CmpOp::Lt => "<",
            CmpOp::Le => "<=",
            CmpOp::Gt => ">",
            CmpOp::Ge => ">=",
        }
    }
}

/// A boolean formula over the world state.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Condition {
    /// Atomic literal, possibly negated.
    Fact(FactOptional),
    And(Vec<Condition>),
    Or(Vec<Condition>),
    Not(Box<Condition>),
    Imply(Box<Condition>, Box<Condition>),
    Exists(Parameter, Box<Condition>),
    Forall(Parameter, Box<Condition>),
    Compare(CmpOp, Expr, Expr),
}

impl Condition {
    pub fn fact(pattern: FactPattern) -> Condition {
        Condition::Fact(FactOptional::positive(pattern))
    }

    pub fn not_fact(pattern: FactPattern) -> Condition {
        Condition::Fact(FactOptional::negative(pattern))
    }

    /// Evaluates the condition, narrowing `bindings` with the parameter
    /// values that make it true. On failure `bindings` is left untouched.
    pub fn eval(&self, facts: &FactsMapping, ctx: &EvalCtx, bindings: &mut Bindings) -> bool {
        let mut scratch = bindings.clone();
        if self.eval_inner(facts, ctx, &mut scratch) {
            *bindings = scratch;
            true
        } else {
            false
        }
    }

    /// Convenience check without binding propagation.
    pub fn holds(&self, facts: &FactsMapping, ctx: &EvalCtx) -> bool {
        let mut bindings = Bindings::new();
        self.eval_inner(facts, ctx, &mut bindings)
    }

    fn eval_inner(&self, facts: &FactsMapping, ctx: &EvalCtx, bindings: &mut Bindings) -> bool {
        match self {
            Condition::Fact(opt) if !opt.negated => {
                let found = facts.find(&opt.pattern, bindings);
                if found.is_empty() {
                    return false;
                }
                let mut extension = Bindings::new();
                for fact in found {
                    if let Some(ext) = opt.pattern.matches(fact, bindings) {
                        for (name, values) in ext {
                            extension.entry(name).or_default().extend(values);
                        }
                    }
                }
                // a parameter only accepts values of its declared type
                for p in opt.pattern.parameters() {
                    if let Some(values) = extension.get_mut(&p.name) {
                        values.retain(|e| ctx.ontology.types.is_a(e.tpe, p.tpe));
                        if values.is_empty() {
                            return false;
                        }
                    }
                }
                merge_bindings(bindings, extension)
            }
            Condition::Fact(opt) => self.eval_negated_fact(opt, facts, ctx, bindings),
            Condition::And(conjuncts) => conjuncts.iter().all(|c| c.eval_inner(facts, ctx, bindings)),
            Condition::Or(disjuncts) => {
                for d in disjuncts {
                    let mut scratch = bindings.clone();
                    if d.eval_inner(facts, ctx, &mut scratch) {
                        *bindings = scratch;
                        return true;
                    }
                }
                false
            }
            Condition::Not(inner) => {
                let mut scratch = bindings.clone();
                !inner.eval_inner(facts, ctx, &mut scratch)
            }
            Condition::Imply(cond, then) => {
                let mut scratch = bindings.clone();
                if cond.eval_inner(facts, ctx, &mut scratch) {
                    let mut scratch = bindings.clone();
                    then.eval_inner(facts, ctx, &mut scratch)
                } else {
                    true
                }
            }
            Condition::Exists(param, inner) => {
                for e in ctx.instances_of_type(param.tpe) {
                    let mut scratch = bindings.clone();
                    scratch.insert(param.name.clone(), BTreeSet::from([e]));
                    if inner.eval_inner(facts, ctx, &mut scratch) {
                        // commit what the witness taught us about outer parameters
                        scratch.remove(&param.name);
                        *bindings = scratch;
                        return true;
                    }
                }
                false
            }
            Condition::Forall(param, inner) => ctx.instances_of_type(param.tpe).into_iter().all(|e| {
                let mut scratch = bindings.clone();
                scratch.insert(param.name.clone(), BTreeSet::from([e]));
                inner.eval_inner(facts, ctx, &mut scratch)
            }),
            Condition::Compare(op, left, right) => {
                let l = left.eval(facts, bindings);
                let r = right.eval(facts, bindings);
                match op {
                    CmpOp::Eq => values_equal(&l, &r),
                    CmpOp::Ne => !values_equal(&l, &r),
                    _ => match (l.and_then(|v| v.as_number()), r.and_then(|v| v.as_number())) {
                        (Some(a), Some(b)) => match op {
                            CmpOp::Lt => a < b,
                            CmpOp::Le => a <= b,
                            CmpOp::Gt => a > b,
                            CmpOp::Ge => a >= b,
                            _ => unreachable!(),
                        },
                        _ => false,
                    },
                }
            }
        }
    }

    /// A negated literal filters unbound parameters down to the values for
    /// which the fact does not hold, instead of failing outright.
    fn eval_negated_fact(&self, opt: &FactOptional, facts: &FactsMapping, ctx: &EvalCtx, bindings: &mut Bindings) -> bool {
        let unbound: Vec<&Parameter> = opt
            .pattern
            .parameters()
            .filter(|p| bound_value(bindings, &p.name).is_none())
            .collect();
        if unbound.is_empty() {
            return facts.find(&opt.pattern, bindings).is_empty();
        }
        let mut extension = Bindings::new();
        for param in unbound {
            let candidates: Vec<Entity> = match bindings.get(&param.name) {
                Some(values) => values.iter().cloned().collect(),
                None => ctx.instances_of_type(param.tpe),
            };
            let mut kept = BTreeSet::new();
            for value in candidates {
                let mut scratch = bindings.clone();
                scratch.insert(param.name.clone(), BTreeSet::from([value.clone()]));
                if facts.find(&opt.pattern, &scratch).is_empty() {
                    kept.insert(value);
                }
            }
            if kept.is_empty() {
                return false;
            }
            extension.insert(param.name.clone(), kept);
        }
        merge_bindings(bindings, extension)
    }

    /// Replaces bound parameters by their values throughout the formula.
    pub fn substitute(&self, bindings: &Bindings) -> Condition {
        match self {
            Condition::Fact(opt) => Condition::Fact(opt.substitute(bindings)),
            Condition::And(cs) => Condition::And(cs.iter().map(|c| c.substitute(bindings)).collect()),
            Condition::Or(cs) => Condition::Or(cs.iter().map(|c| c.substitute(bindings)).collect()),
            Condition::Not(c) => Condition::Not(Box::new(c.substitute(bindings))),
            Condition::Imply(a, b) => {
                Condition::Imply(Box::new(a.substitute(bindings)), Box::new(b.substitute(bindings)))
            }
            Condition::Exists(p, c) => Condition::Exists(p.clone(), Box::new(c.substitute(bindings))),
            Condition::Forall(p, c) => Condition::Forall(p.clone(), Box::new(c.substitute(bindings))),
            Condition::Compare(op, a, b) => Condition::Compare(*op, a.substitute(bindings), b.substitute(bindings)),
        }
    }

    /// Visits every atomic literal of the formula. Fluent accesses inside
    /// comparisons are visited as positive any-value literals.
    pub fn for_each_opt_fact(&self, f: &mut impl FnMut(&FactOptional) -> ControlFlow<()>) -> ControlFlow<()> {
        match self {
            Condition::Fact(opt) => f(opt),
            Condition::And(cs) | Condition::Or(cs) => {
                for c in cs {
                    c.for_each_opt_fact(f)?;
                }
                ControlFlow::Continue(())
            }
            Condition::Not(c) => c.for_each_opt_fact(f),
            Condition::Imply(a, b) => {
                a.for_each_opt_fact(f)?;
                b.for_each_opt_fact(f)
            }
            Condition::Exists(_, c) | Condition::Forall(_, c) => c.for_each_opt_fact(f),
            Condition::Compare(_, l, r) => {
                let mut flow = ControlFlow::Continue(());
                for e in [l, r] {
                    e.for_each_fluent_access(&mut |pattern| {
                        if flow.is_continue() {
                            flow = f(&FactOptional::positive(pattern.clone()));
                        }
                    });
                }
                flow
            }
        }
    }

    /// Is this literal required by the formula on every path that makes it
    /// true? Used to rule out an operator feeding its own precondition.
    pub fn requires_opt_fact(&self, opt: &FactOptional) -> bool {
        match self {
            Condition::Fact(own) => own.negated == opt.negated && own.pattern == opt.pattern,
            Condition::And(cs) => cs.iter().any(|c| c.requires_opt_fact(opt)),
            Condition::Or(cs) => !cs.is_empty() && cs.iter().all(|c| c.requires_opt_fact(opt)),
            Condition::Exists(_, c) | Condition::Forall(_, c) => c.requires_opt_fact(opt),
            _ => false,
        }
    }

    /// The atomic literal, when the whole condition is one.
    pub fn as_single_fact(&self) -> Option<&FactOptional> {
        match self {
            Condition::Fact(opt) => Some(opt),
            Condition::And(cs) if cs.len() == 1 => cs[0].as_single_fact(),
            _ => None,
        }
    }

    /// Parses the textual condition language: `&`, `|`, `not(...)`,
    /// `imply(a, b)`, `exists(?x - t, ...)`, `forall(?x - t, ...)`,
    /// comparisons and fact literals.
    pub fn from_str(
        s: &str,
        ontology: &Ontology,
        entities: &SetOfEntities,
        parameters: &[Parameter],
    ) -> Result<Condition, ParseError> {
        parse::condition(s, ontology, entities, parameters)
    }
}

fn values_equal(l: &Option<Value>, r: &Option<Value>) -> bool {
    match (l, r) {
        (None, None) => true,
        (Some(a), Some(b)) => match (a.as_number(), b.as_number()) {
            (Some(x), Some(y)) => x == y,
            _ => a.render() == b.render(),
        },
        _ => false,
    }
}

impl Display for Condition {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Condition::Fact(opt) => write!(f, "{opt}"),
            Condition::And(cs) => write_joined(f, cs, " & "),
            Condition::Or(cs) => write_joined(f, cs, " | "),
            Condition::Not(c) => write!(f, "not({c})"),
            Condition::Imply(a, b) => write!(f, "imply({a}, {b})"),
            Condition::Exists(p, c) => write!(f, "exists({p}, {c})"),
            Condition::Forall(p, c) => write!(f, "forall({p}, {c})"),
            Condition::Compare(op, a, b) => write!(f, "{a}{}{b}", op.symbol()),
        }
    }
}

fn write_joined(f: &mut Formatter<'_>, cs: &[Condition], sep: &str) -> std::fmt::Result {
    let mut first = true;
    for c in cs {
        if !first {
            write!(f, "{sep}")?;
        }
        first = false;
        write!(f, "{c}")?;
    }
    Ok(())
}

impl Debug for Condition {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self}")
    }
}

mod parse {
    use super::*;

    pub(super) fn condition(
        s: &str,
        ontology: &Ontology,
        entities: &SetOfEntities,
        parameters: &[Parameter],
    ) -> Result<Condition, ParseError> {
        let parts = split_top_level(s, '|');
        if parts.len() > 1 {
            let mut disjuncts = Vec::with_capacity(parts.len());
            for p in parts {
                disjuncts.push(conjunction(p, ontology, entities, parameters)?);
            }
            return Ok(Condition::Or(disjuncts));
        }
        conjunction(s, ontology, entities, parameters)
    }

    fn conjunction(
        s: &str,
        ontology: &Ontology,
        entities: &SetOfEntities,
        parameters: &[Parameter],
    ) -> Result<Condition, ParseError> {
        let parts = split_top_level(s, '&');
        if parts.len() > 1 {
            let mut conjuncts = Vec::with_capacity(parts.len());
            for p in parts {
                conjuncts.push(unit(p, ontology, entities, parameters)?);
            }
            return Ok(Condition::And(conjuncts));
        }
        unit(s, ontology, entities, parameters)
    }

    fn unit(
        s: &str,
        ontology: &Ontology,
        entities: &SetOfEntities,
        parameters: &[Parameter],
    ) -> Result<Condition, ParseError> {
        let s = s.trim();
        if let Some(inner) = call_body(s, "not") {
            // negation of an atomic literal stays atomic
            let inner_cond = condition(inner, ontology, entities, parameters)?;
            return Ok(match inner_cond {
                Condition::Fact(opt) if !opt.negated => Condition::Fact(FactOptional::negative(opt.pattern)),
                other => Condition::Not(Box::new(other)),
            });
        }
        if let Some(inner) = call_body(s, "imply") {
            let (a, b) = split_two_args(inner, s)?;
            return Ok(Condition::Imply(
                Box::new(condition(a, ontology, entities, parameters)?),
                Box::new(condition(b, ontology, entities, parameters)?),
            ));
        }
        for (name, is_exists) in [("exists", true), ("forall", false)] {
            if let Some(inner) = call_body(s, name) {
                let (decl, body) = split_two_args(inner, s)?;
                let param = Parameter::from_str(decl.trim(), &ontology.types)?;
                let mut scoped = parameters.to_vec();
                scoped.push(param.clone());
                let inner_cond = condition(body, ontology, entities, &scoped)?;
                return Ok(if is_exists {
                    Condition::Exists(param, Box::new(inner_cond))
                } else {
                    Condition::Forall(param, Box::new(inner_cond))
                });
            }
        }
        if let Some((op, left, right)) = find_comparison(s) {
            let right = right.trim();
            let is_plain_value = right != "undefined"
                && (right.parse::<Number>().is_ok() || !right.contains(['+', '-', '*', '(']));
            if matches!(op, CmpOp::Eq | CmpOp::Ne) && is_plain_value {
                // `pred(args)=v` / `pred(args)!=v` are fact literals
                return Ok(Condition::fact(FactPattern::from_str(s, ontology, entities, parameters)?));
            }
            return Ok(Condition::Compare(
                op,
                operand(left, ontology, entities, parameters)?,
                operand(right, ontology, entities, parameters)?,
            ));
        }
        Ok(Condition::fact(FactPattern::from_str(s, ontology, entities, parameters)?))
    }

    pub(super) fn operand(
        s: &str,
        ontology: &Ontology,
        entities: &SetOfEntities,
        parameters: &[Parameter],
    ) -> Result<Expr, ParseError> {
        let s = s.trim();
        if s == "undefined" {
            return Ok(Expr::Undefined);
        }
        if let Ok(n) = s.parse::<Number>() {
            return Ok(Expr::Number(n.to_string()));
        }
        for (symbol, build) in [
            ('+', Expr::Plus as fn(Box<Expr>, Box<Expr>) -> Expr),
            ('-', Expr::Minus as fn(Box<Expr>, Box<Expr>) -> Expr),
            ('*', Expr::Mul as fn(Box<Expr>, Box<Expr>) -> Expr),
        ] {
            let parts = split_top_level(s, symbol);
            if parts.len() > 1 {
                let mut iter = parts.into_iter();
                let mut expr = operand(iter.next().unwrap(), ontology, entities, parameters)?;
                for p in iter {
                    expr = build(Box::new(expr), Box::new(operand(p, ontology, entities, parameters)?));
                }
                return Ok(expr);
            }
        }
        if let Some(p) = parameters.iter().find(|p| p.name == s) {
            return Ok(Expr::Param(p.clone()));
        }
        if s.contains('(') || ontology.predicates.get(s).is_some() {
            return Ok(Expr::Fluent(FactPattern::from_str(s, ontology, entities, parameters)?));
        }
        if let Some(e) = entities.get(s).or_else(|| ontology.constants.get(s)) {
            return Ok(Expr::Value(e.clone()));
        }
        Err(ParseError::new(format!("cannot read expression `{s}`"), s))
    }

    /// Splits on `sep` occurrences that are not nested inside parentheses.
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

    /// `name(body)` → `body`.
    fn call_body<'a>(s: &'a str, name: &str) -> Option<&'a str> {
        let rest = s.strip_prefix(name)?.trim_start();
        let inner = rest.strip_prefix('(')?.strip_suffix(')')?;
        // make sure the closing paren is the matching one
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

    fn split_two_args<'a>(inner: &'a str, whole: &str) -> Result<(&'a str, &'a str), ParseError> {
        let parts = split_top_level(inner, ',');
        if parts.len() < 2 {
            return Err(ParseError::new("expected two comma-separated arguments", whole));
        }
        let first = parts[0];
        let rest_start = first.len() + 1;
        Ok((first, &inner[rest_start..]))
    }

    /// Finds the top-level comparison operator of `s`, if any.
    fn find_comparison(s: &str) -> Option<(CmpOp, &str, &str)> {
        let bytes = s.as_bytes();
        let mut depth = 0usize;
        for i in 0..bytes.len() {
            match bytes[i] {
                b'(' => depth += 1,
                b')' => depth = depth.saturating_sub(1),
                _ if depth > 0 => {}
                b'!' if i + 1 < bytes.len() && bytes[i + 1] == b'=' => {
                    return Some((CmpOp::Ne, &s[..i], &s[i + 2..]));
                }
                b'<' | b'>' => {
                    let (op, width) = if i + 1 < bytes.len() && bytes[i + 1] == b'=' {
                        (if bytes[i] == b'<' { CmpOp::Le } else { CmpOp::Ge }, 2)
                    } else {
                        (if bytes[i] == b'<' { CmpOp::Lt } else { CmpOp::Gt }, 1)
                    };
                    return Some((op, &s[..i], &s[i + width..]));
                }
                b'=' => return Some((CmpOp::Eq, &s[..i], &s[i + 1..])),
                _ => {}
            }
        }
        None
    }
}

/// Parses an expression of the textual condition language.
pub fn expr_from_str(
    s: &str,
    ontology: &Ontology,
    entities: &SetOfEntities,
    parameters: &[Parameter],
) -> Result<Expr, ParseError> {
    parse::operand(s, ontology, entities, parameters)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::facts::Fact;
    use crate::ontology::{SetOfPredicates, SetOfTypes};

    fn setup() -> (Ontology, SetOfEntities) {
        let types = SetOfTypes::from_pddl("robot location object").unwrap();
        let predicates = SetOfPredicates::from_str(
            "at(?r - robot) - location\n\
             at_object(?o - object) - location\n\
             touched(?o - object)\n\
             battery(?r - robot) - number\n\
             fact_a\n\
             fact_b",
            &types,
        )
        .unwrap();
        let ontology = Ontology {
            types,
            predicates,
            constants: SetOfEntities::new(),
        };
        let entities = SetOfEntities::from_pddl(
            "r1 - robot\nkitchen bedroom - location\npen cup - object",
            &ontology.types,
        )
        .unwrap();
        (ontology, entities)
    }

    fn world(ontology: &Ontology, entities: &SetOfEntities, facts: &[&str]) -> FactsMapping {
        let mut mapping = FactsMapping::new();
        for f in facts {
            mapping.add(Fact::from_str(f, ontology, entities).unwrap());
        }
        mapping
    }

    #[test]
    fn conjunction_narrows_bindings_across_literals() {
        let (ontology, entities) = setup();
        let facts = world(
            &ontology,
            &entities,
            &["at(r1)=kitchen", "at_object(pen)=kitchen", "at_object(cup)=bedroom"],
        );
        let ctx = EvalCtx::new(&ontology, &entities);
        let params = vec![
            Parameter::new("?o", ontology.types.get("object").unwrap()),
            Parameter::new("?l", ontology.types.get("location").unwrap()),
        ];
        let cond = Condition::from_str("at(r1)=?l & at_object(?o)=?l", &ontology, &entities, &params).unwrap();
        let mut bindings = Bindings::new();
        assert!(cond.eval(&facts, &ctx, &mut bindings));
        assert_eq!(bound_value(&bindings, "?o").unwrap().value, "pen");
        assert_eq!(bound_value(&bindings, "?l").unwrap().value, "kitchen");
    }

    #[test]
    fn exists_finds_a_witness() {
        let (ontology, entities) = setup();
        let facts = world(&ontology, &entities, &["at(r1)=kitchen", "at_object(pen)=kitchen"]);
        let ctx = EvalCtx::new(&ontology, &entities);
        let cond = Condition::from_str(
            "exists(?l - location, at(r1)=?l & at_object(pen)=?l)",
            &ontology,
            &entities,
            &[],
        )
        .unwrap();
        assert!(cond.holds(&facts, &ctx));
    }

    #[test]
    fn forall_requires_every_instance() {
        let (ontology, entities) = setup();
        let facts = world(&ontology, &entities, &["touched(pen)"]);
        let ctx = EvalCtx::new(&ontology, &entities);
        let cond = Condition::from_str("forall(?o - object, touched(?o))", &ontology, &entities, &[]).unwrap();
        assert!(!cond.holds(&facts, &ctx));
        let facts = world(&ontology, &entities, &["touched(pen)", "touched(cup)"]);
        assert!(cond.holds(&facts, &ctx));
    }

    #[test]
    fn negated_literal_filters_parameter_values() {
        let (ontology, entities) = setup();
        let facts = world(&ontology, &entities, &["touched(pen)"]);
        let ctx = EvalCtx::new(&ontology, &entities);
        let params = vec![Parameter::new("?o", ontology.types.get("object").unwrap())];
        let cond = Condition::from_str("not(touched(?o))", &ontology, &entities, &params).unwrap();
        let mut bindings = Bindings::new();
        assert!(cond.eval(&facts, &ctx, &mut bindings));
        assert_eq!(bound_value(&bindings, "?o").unwrap().value, "cup");
    }

    #[test]
    fn undefined_comparisons() {
        let (ontology, entities) = setup();
        let facts = world(&ontology, &entities, &[]);
        let ctx = EvalCtx::new(&ontology, &entities);
        let eq_undef = Condition::from_str("battery(r1)=undefined", &ontology, &entities, &[]).unwrap();
        assert!(eq_undef.holds(&facts, &ctx));
        let lt = Condition::from_str("battery(r1)<3", &ontology, &entities, &[]).unwrap();
        assert!(!lt.holds(&facts, &ctx));

        let facts = world(&ontology, &entities, &["battery(r1)=2"]);
        assert!(!eq_undef.holds(&facts, &ctx));
        assert!(lt.holds(&facts, &ctx));
    }

    #[test]
    fn arithmetic_comparison() {
        let (ontology, entities) = setup();
        let facts = world(&ontology, &entities, &["battery(r1)=4"]);
        let ctx = EvalCtx::new(&ontology, &entities);
        let cond = Condition::from_str("battery(r1)>=2+1", &ontology, &entities, &[]).unwrap();
        assert!(cond.holds(&facts, &ctx));
        let cond = Condition::from_str("battery(r1)>2*2", &ontology, &entities, &[]).unwrap();
        assert!(!cond.holds(&facts, &ctx));
    }

    #[test]
    fn imply_only_binds_when_premise_holds() {
        let (ontology, entities) = setup();
        let ctx = EvalCtx::new(&ontology, &entities);
        let cond = Condition::from_str("imply(fact_a, fact_b)", &ontology, &entities, &[]).unwrap();
        let empty = world(&ontology, &entities, &[]);
        assert!(cond.holds(&empty, &ctx));
        let premise_only = world(&ontology, &entities, &["fact_a"]);
        assert!(!cond.holds(&premise_only, &ctx));
        let both = world(&ontology, &entities, &["fact_a", "fact_b"]);
        assert!(cond.holds(&both, &ctx));
    }
}
