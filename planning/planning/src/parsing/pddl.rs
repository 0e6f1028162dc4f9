use crate::parsing::sexpr::{parse, ListIter, SExpr};
use regex::Regex;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use stratum_utils::disp_iter;
use stratum_utils::input::{Ctx, ErrLoc, Input, Sym};

/// Requirement flags of the supported PDDL subset.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum PddlFeature {
    Strips,
    Typing,
    NegativePreconditions,
    DisjunctivePreconditions,
    Equality,
    ExistentialPreconditions,
    UniversalPreconditions,
    QuantifiedPreconditions,
    ConditionalEffects,
    Fluents,
    NumericFluents,
    DurativeActions,
    DerivedPredicates,
    Constants,
    Timeless,
}

impl PddlFeature {
    pub const ALL: [PddlFeature; 15] = [
        PddlFeature::Strips,
        PddlFeature::Typing,
        PddlFeature::NegativePreconditions,
        PddlFeature::DisjunctivePreconditions,
        PddlFeature::Equality,
        PddlFeature::ExistentialPreconditions,
        PddlFeature::UniversalPreconditions,
        PddlFeature::QuantifiedPreconditions,
        PddlFeature::ConditionalEffects,
        PddlFeature::Fluents,
        PddlFeature::NumericFluents,
        PddlFeature::DurativeActions,
        PddlFeature::DerivedPredicates,
        PddlFeature::Constants,
        PddlFeature::Timeless,
    ];
}

impl FromStr for PddlFeature {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            ":strips" => Ok(PddlFeature::Strips),
            ":typing" => Ok(PddlFeature::Typing),
            ":negative-preconditions" => Ok(PddlFeature::NegativePreconditions),
            ":disjunctive-preconditions" => Ok(PddlFeature::DisjunctivePreconditions),
            ":equality" => Ok(PddlFeature::Equality),
            ":existential-preconditions" => Ok(PddlFeature::ExistentialPreconditions),
            ":universal-preconditions" => Ok(PddlFeature::UniversalPreconditions),
            ":quantified-preconditions" => Ok(PddlFeature::QuantifiedPreconditions),
            ":conditional-effects" => Ok(PddlFeature::ConditionalEffects),
            ":fluents" => Ok(PddlFeature::Fluents),
            ":numeric-fluents" => Ok(PddlFeature::NumericFluents),
            ":durative-actions" => Ok(PddlFeature::DurativeActions),
            ":derived-predicates" => Ok(PddlFeature::DerivedPredicates),
            ":constants" => Ok(PddlFeature::Constants),
            ":timeless" => Ok(PddlFeature::Timeless),
            _ => Err(format!("Unknown feature `{s}`")),
        }
    }
}

impl Display for PddlFeature {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let formatted = match self {
            PddlFeature::Strips => ":strips",
            PddlFeature::Typing => ":typing",
            PddlFeature::NegativePreconditions => ":negative-preconditions",
            PddlFeature::DisjunctivePreconditions => ":disjunctive-preconditions",
            PddlFeature::Equality => ":equality",
            PddlFeature::ExistentialPreconditions => ":existential-preconditions",
            PddlFeature::UniversalPreconditions => ":universal-preconditions",
            PddlFeature::QuantifiedPreconditions => ":quantified-preconditions",
            PddlFeature::ConditionalEffects => ":conditional-effects",
            PddlFeature::Fluents => ":fluents",
            PddlFeature::NumericFluents => ":numeric-fluents",
            PddlFeature::DurativeActions => ":durative-actions",
            PddlFeature::DerivedPredicates => ":derived-predicates",
            PddlFeature::Constants => ":constants",
            PddlFeature::Timeless => ":timeless",
        };
        write!(f, "{formatted}")
    }
}

#[derive(Debug, Clone)]
pub struct TypedSymbol {
    pub symbol: Sym,
    pub tpe: Option<Sym>,
}

impl TypedSymbol {
    pub fn new(symbol: impl Into<Sym>, tpe: impl Into<Sym>) -> TypedSymbol {
        TypedSymbol {
            symbol: symbol.into(),
            tpe: Some(tpe.into()),
        }
    }
}

impl Display for TypedSymbol {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match &self.tpe {
            Some(tpe) => write!(f, "{} - {}", self.symbol, tpe),
            None => write!(f, "{}", self.symbol),
        }
    }
}

/// A `:predicates` or `:functions` declaration. A `- type` trailer after the
/// closing parenthesis declares the value type, making the predicate a
/// fluent; `:functions` entries without one default to number.
#[derive(Debug, Clone)]
pub struct PddlPredicate {
    pub name: Sym,
    pub args: Vec<TypedSymbol>,
    pub value_type: Option<Sym>,
}

impl Display for PddlPredicate {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}(", self.name)?;
        disp_iter(f, self.args.as_slice(), ", ")?;
        write!(f, ")")?;
        if let Some(t) = &self.value_type {
            write!(f, " - {t}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct PddlAction {
    pub name: Sym,
    pub args: Vec<TypedSymbol>,
    pub precondition: Vec<SExpr>,
    pub effect: Vec<SExpr>,
}

#[derive(Debug, Clone)]
pub struct PddlDurativeAction {
    pub name: Sym,
    pub args: Vec<TypedSymbol>,
    pub duration: Option<SExpr>,
    pub conditions: Vec<SExpr>,
    pub effects: Vec<SExpr>,
}

#[derive(Debug, Clone)]
pub struct PddlAxiom {
    pub vars: Vec<TypedSymbol>,
    pub context: SExpr,
    pub implies: SExpr,
}

#[derive(Debug, Clone)]
pub struct PddlDomain {
    pub name: Sym,
    pub features: Vec<PddlFeature>,
    pub types: Vec<TypedSymbol>,
    pub constants: Vec<TypedSymbol>,
    pub predicates: Vec<PddlPredicate>,
    pub functions: Vec<PddlPredicate>,
    pub timeless: Vec<SExpr>,
    pub actions: Vec<PddlAction>,
    pub durative_actions: Vec<PddlDurativeAction>,
    pub axioms: Vec<PddlAxiom>,
}

#[derive(Debug, Clone)]
pub struct PddlProblem {
    pub problem_name: Sym,
    pub domain_name: Sym,
    pub objects: Vec<TypedSymbol>,
    pub init: Vec<SExpr>,
    pub goal: Vec<SExpr>,
}

pub fn parse_pddl_domain(input: Input) -> Result<PddlDomain, ErrLoc> {
    let expr = parse(input)?;
    read_domain(expr)
}

pub fn parse_pddl_problem(input: Input) -> Result<PddlProblem, ErrLoc> {
    let expr = parse(input)?;
    read_problem(expr)
}

/// Attempts to find the corresponding domain file for the given PDDL problem.
/// This method will look for `domain.pddl`, `X-domain.pddl` or `X.dom.pddl`
/// in the problem's folder and its parent.
pub fn find_domain_of(problem_file: &Path) -> Result<PathBuf, String> {
    let mut candidate_domain_files = Vec::with_capacity(3);
    candidate_domain_files.push(match problem_file.extension() {
        Some(ext) => Path::new("domain").with_extension(ext),
        None => Path::new("domain.pddl").to_path_buf(),
    });

    let problem_filename = problem_file
        .file_name()
        .and_then(|f| f.to_str())
        .ok_or_else(|| "Invalid problem file name".to_string())?;

    // XXXXX.pb.pddl -> XXXXX.dom.pddl
    let re = Regex::new("([^\\.]+)(\\.[^\\.]+)?\\.pb\\.pddl").expect("valid regex");
    for m in re.captures_iter(problem_filename) {
        candidate_domain_files.push(format!("{}.dom.pddl", &m[1]).into());
    }
    // XXXXX.pddl -> XXXXX-domain.pddl
    let re = Regex::new("([^\\.]+)\\.pddl").expect("valid regex");
    for m in re.captures_iter(problem_filename) {
        candidate_domain_files.push(format!("{}-domain.pddl", &m[1]).into());
    }

    let mut candidate_directories = Vec::with_capacity(2);
    if let Some(curr) = problem_file.parent() {
        candidate_directories.push(curr);
        if let Some(parent) = curr.parent() {
            candidate_directories.push(parent);
        }
    }

    for f in &candidate_domain_files {
        for &dir in &candidate_directories {
            let candidate = dir.join(f);
            if candidate.exists() {
                return Ok(candidate);
            }
        }
    }
    Err(format!(
        "Could not find a domain file in the same or parent directory as the problem file. Candidates: {candidate_domain_files:?}"
    ))
}

/// Consume a typed list of symbols:
///  - `(a - loc b - loc c - loc)`: symbols a, b and c of type loc
///  - `(a b c - loc)`: symbols a, b and c of type loc
///  - `(a b c)`: symbols a, b and c without a declared type
pub fn consume_typed_symbols(input: &mut ListIter) -> Result<Vec<TypedSymbol>, ErrLoc> {
    let mut args = Vec::with_capacity(input.len() / 3);
    let mut untyped: Vec<Sym> = Vec::with_capacity(args.len());
    while !input.is_empty() {
        let next = input.pop_atom()?;
        if next.as_str() == "-" {
            let tpe = input.pop_atom()?;
            untyped
                .drain(..)
                .map(|name| TypedSymbol::new(name, tpe))
                .for_each(|a| args.push(a));
        } else {
            untyped.push(next.into());
        }
    }
    // no type given for the tail
    untyped
        .drain(..)
        .map(|name| TypedSymbol { symbol: name, tpe: None })
        .for_each(|a| args.push(a));
    Ok(args)
}

/// Reads a `:predicates` or `:functions` block: `(name ?a - t ...)` entries,
/// each optionally followed by `- value_type`.
fn read_predicate_declarations(block: ListIter, whole: &SExpr) -> Result<Vec<PddlPredicate>, ErrLoc> {
    let mut declarations: Vec<PddlPredicate> = Vec::new();
    let mut expect_value_type = false;
    for item in block {
        if expect_value_type {
            let tpe = item.as_atom().ok_or_else(|| item.invalid("Expected a value type"))?;
            declarations.last_mut().expect("set before the `-`").value_type = Some(tpe.clone());
            expect_value_type = false;
            continue;
        }
        if item.is_atom("-") {
            if declarations.is_empty() {
                return Err(item.invalid("Value type without a preceding declaration"));
            }
            expect_value_type = true;
            continue;
        }
        let mut decl = item.as_list_iter().ok_or_else(|| item.invalid("Expected a list"))?;
        let name = decl.pop_atom()?.clone();
        let args = consume_typed_symbols(&mut decl)?;
        declarations.push(PddlPredicate {
            name,
            args,
            value_type: None,
        });
    }
    if expect_value_type {
        return Err(whole.invalid("Missing value type after `-`"));
    }
    Ok(declarations)
}

/// Returns a localized error on `expr` if the given feature is not present in
/// the requirements.
fn check_feature_presence(feature: PddlFeature, features: &[PddlFeature], expr: &SExpr) -> Result<(), ErrLoc> {
    if features.contains(&feature) {
        Ok(())
    } else {
        Err(expr.invalid(format!("Requires the {feature} feature in the requirements")))
    }
}

fn read_domain(dom: SExpr) -> Result<PddlDomain, ErrLoc> {
    let dom = &mut dom.as_list_iter().ok_or_else(|| dom.invalid("Expected a list"))?;
    dom.pop_known_atom("define")?;

    // name of the domain, of the form `(domain XXX)`
    let mut domain_name_decl = dom.pop_list()?.iter();
    domain_name_decl.pop_known_atom("domain")?;
    let name = domain_name_decl.pop_atom().ctx("missing name of domain")?.clone();

    let mut res = PddlDomain {
        name,
        features: vec![],
        types: vec![],
        constants: vec![],
        predicates: vec![],
        functions: vec![],
        timeless: vec![],
        actions: vec![],
        durative_actions: vec![],
        axioms: vec![],
    };

    for current in dom {
        // a block associates a key (e.g. `:predicates`) to a sequence of values
        let mut block = current
            .as_list_iter()
            .ok_or_else(|| current.invalid("Expected a block list"))?;

        match block.pop_atom()?.as_str() {
            ":requirements" => {
                for feature in block {
                    let feature = feature
                        .as_atom()
                        .ok_or_else(|| feature.invalid("Expected a feature name but got a list"))?;
                    let f = PddlFeature::from_str(feature.as_str()).map_err(|e| feature.invalid(e))?;
                    res.features.push(f);
                }
            }
            ":types" => {
                if !res.types.is_empty() {
                    return Err(current.invalid("More than one `:types` section"));
                }
                check_feature_presence(PddlFeature::Typing, &res.features, current)?;
                res.types = consume_typed_symbols(&mut block)?;
            }
            ":constants" => {
                if !res.constants.is_empty() {
                    return Err(current.invalid("More than one `:constants` section"));
                }
                res.constants = consume_typed_symbols(&mut block)?;
            }
            ":predicates" => {
                let declarations = read_predicate_declarations(block, current)?;
                res.predicates.extend(declarations);
            }
            ":functions" => {
                let declarations = read_predicate_declarations(block, current)?;
                res.functions.extend(declarations);
            }
            ":timeless" => {
                check_feature_presence(PddlFeature::Timeless, &res.features, current)?;
                for fact in block {
                    res.timeless.push(fact.clone());
                }
            }
            ":action" => {
                let name = block.pop_atom()?.clone();
                let mut args = Vec::new();
                let mut precondition = Vec::new();
                let mut effect = Vec::new();
                while !block.is_empty() {
                    let key_expr = block.pop_atom()?;
                    let key = key_expr.canonical_string();
                    let key_err = key_expr.invalid(format!("unsupported key in action: {key}"));
                    let value = block.pop().ctx(format!("No value associated to key `{key}`"))?;
                    match key.as_str() {
                        ":parameters" => {
                            let mut value = value
                                .as_list_iter()
                                .ok_or_else(|| value.invalid("Expected a parameter list"))?;
                            for a in consume_typed_symbols(&mut value)? {
                                args.push(a);
                            }
                        }
                        ":precondition" => precondition.push(value.clone()),
                        ":effect" => effect.push(value.clone()),
                        _ => return Err(key_err),
                    }
                }
                res.actions.push(PddlAction {
                    name,
                    args,
                    precondition,
                    effect,
                });
            }
            ":durative-action" => {
                check_feature_presence(PddlFeature::DurativeActions, &res.features, current)?;
                let name = block.pop_atom()?.clone();
                let mut args = Vec::new();
                let mut duration = None;
                let mut conditions = Vec::new();
                let mut effects = Vec::new();
                while !block.is_empty() {
                    let key_expr = block.pop_atom()?;
                    let key = key_expr.canonical_string();
                    let key_err = key_expr.invalid(format!("unsupported key in durative action: {key}"));
                    let value = block.pop().ctx(format!("No value associated to key `{key}`"))?;
                    match key.as_str() {
                        ":parameters" => {
                            let mut value = value
                                .as_list_iter()
                                .ok_or_else(|| value.invalid("Expected a parameter list"))?;
                            for a in consume_typed_symbols(&mut value)? {
                                args.push(a);
                            }
                        }
                        ":duration" => duration = Some(value.clone()),
                        ":condition" => conditions.push(value.clone()),
                        ":effect" => effects.push(value.clone()),
                        _ => return Err(key_err),
                    }
                }
                res.durative_actions.push(PddlDurativeAction {
                    name,
                    args,
                    duration,
                    conditions,
                    effects,
                });
            }
            ":axiom" => {
                check_feature_presence(PddlFeature::DerivedPredicates, &res.features, current)?;
                let mut vars = Vec::new();
                let mut context = None;
                let mut implies = None;
                while !block.is_empty() {
                    let key_expr = block.pop_atom()?;
                    let key = key_expr.canonical_string();
                    let key_err = key_expr.invalid(format!("unsupported key in axiom: {key}"));
                    let value = block.pop().ctx(format!("No value associated to key `{key}`"))?;
                    match key.as_str() {
                        ":vars" => {
                            let mut value = value
                                .as_list_iter()
                                .ok_or_else(|| value.invalid("Expected a variable list"))?;
                            for a in consume_typed_symbols(&mut value)? {
                                vars.push(a);
                            }
                        }
                        ":context" => context = Some(value.clone()),
                        ":implies" => implies = Some(value.clone()),
                        _ => return Err(key_err),
                    }
                }
                let context = context.ok_or_else(|| current.invalid("Axiom without a `:context`"))?;
                let implies = implies.ok_or_else(|| current.invalid("Axiom without an `:implies`"))?;
                res.axioms.push(PddlAxiom { vars, context, implies });
            }
            _ => return Err(current.invalid("unsupported block")),
        }
    }
    Ok(res)
}

fn read_problem(problem: SExpr) -> Result<PddlProblem, ErrLoc> {
    let mut problem = problem
        .as_list_iter()
        .ok_or_else(|| problem.invalid("Expected a list"))?;
    problem.pop_known_atom("define")?;

    let mut problem_name_decl = problem
        .pop_list()
        .ctx("Expected problem name definition of the form `(problem XXXXXX)`")?
        .iter();
    problem_name_decl.pop_known_atom("problem")?;
    let problem_name = problem_name_decl.pop_atom()?.clone();

    let mut domain_name_decl = problem.pop_list()?.iter();
    domain_name_decl.pop_known_atom(":domain")?;
    let domain_name = domain_name_decl.pop_atom()?.clone();

    let mut res = PddlProblem {
        problem_name,
        domain_name,
        objects: vec![],
        init: vec![],
        goal: vec![],
    };

    for current in problem {
        let mut block = current
            .as_list_iter()
            .ok_or_else(|| current.invalid("Expected a block list"))?;
        match block.pop_atom()?.as_str() {
            ":objects" => {
                for o in consume_typed_symbols(&mut block)? {
                    res.objects.push(o);
                }
            }
            ":init" => {
                for fact in block {
                    res.init.push(fact.clone());
                }
            }
            ":goal" => {
                for goal in block {
                    res.goal.push(goal.clone());
                }
            }
            _ => return Err(current.invalid("unsupported block")),
        }
    }
    Ok(res)
}

#[cfg(test)]
mod tests {
    use super::*;

    static DOMAIN: &str = "(define (domain greeter)
        (:requirements :strips :typing :negative-preconditions :fluents :timeless)
        (:types user)
        (:constants me - user)
        (:predicates
            (user_is_greeted ?u - user)
            (can_speak)
        )
        (:functions (greeting_count ?u - user))
        (:timeless (can_speak))
        (:action say_hi
            :parameters (?u - user)
            :precondition (can_speak)
            :effect (user_is_greeted ?u)
        )
    )";

    #[test]
    fn reads_domain_surface() {
        let dom = parse_pddl_domain(Input::from_string(DOMAIN)).unwrap();
        assert_eq!(dom.name.as_str(), "greeter");
        assert_eq!(dom.types.len(), 1);
        assert_eq!(dom.constants.len(), 1);
        assert_eq!(dom.predicates.len(), 2);
        assert_eq!(dom.functions.len(), 1);
        assert_eq!(dom.timeless.len(), 1);
        assert_eq!(dom.actions.len(), 1);
        let action = &dom.actions[0];
        assert_eq!(action.name.as_str(), "say_hi");
        assert_eq!(action.args.len(), 1);
        assert_eq!(action.precondition.len(), 1);
    }

    #[test]
    fn rejects_unknown_requirement_with_location() {
        let err = parse_pddl_domain(Input::from_string(
            "(define (domain d) (:requirements :does-not-exist))",
        ))
        .unwrap_err();
        assert!(err.message.contains("Unknown feature"));
        assert!(err.loc.is_some());
    }

    #[test]
    fn durative_actions_require_the_feature() {
        let err = parse_pddl_domain(Input::from_string(
            "(define (domain d) (:durative-action go :parameters ()))",
        ))
        .unwrap_err();
        assert!(err.message.contains(":durative-actions"));
    }

    #[test]
    fn reads_problem_surface() {
        let pb = parse_pddl_problem(Input::from_string(
            "(define (problem greet) (:domain greeter)
                (:objects alice - user)
                (:init (= (greeting_count alice) 0))
                (:goal (and (user_is_greeted alice))))",
        ))
        .unwrap();
        assert_eq!(pb.problem_name.as_str(), "greet");
        assert_eq!(pb.domain_name.as_str(), "greeter");
        assert_eq!(pb.objects.len(), 1);
        assert_eq!(pb.init.len(), 1);
        assert_eq!(pb.goal.len(), 1);
    }
}
