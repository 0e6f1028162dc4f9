//! Planning and world-state engine for agents pursuing prioritized goals.
//!
//! A [`Domain`] holds the typed actions and events an agent knows about; a
//! [`Problem`] holds the current world state, the goal stack and the problem
//! objects. The planner picks, one step at a time, the action serving the
//! most important reachable goal, and clients notify the problem as actions
//! start and finish or as external facts change.

pub mod callbacks;
pub mod conditions;
pub mod domain;
pub mod effects;
pub mod errors;
pub mod facts;
pub mod goal_stack;
pub mod goals;
pub mod ontology;
pub mod operators;
pub mod parsing;
pub mod planner;
pub mod printing;
pub mod problem;
pub mod time;
pub mod world_state;

pub use callbacks::{CallbackId, FactsChangedTracker, GoalsRemovedTracker, SetOfCallbacks};
pub use conditions::{CmpOp, Condition, EvalCtx, Expr};
pub use domain::{Domain, OperatorId, OperatorSuccessions};
pub use effects::{WhatChanged, WsModification};
pub use errors::{DomainError, ParseError, RuntimeError};
pub use facts::mapping::FactsMapping;
pub use facts::{Bindings, Fact, FactOptional, FactPattern, Term};
pub use goal_stack::{GoalStack, LookForAnActionOutputInfos, PlannerStepType, DEFAULT_PRIORITY};
pub use goals::Goal;
pub use ontology::{Entity, Number, Ontology, Parameter, Predicate, PredicateId, SetOfEntities, SetOfPredicates, SetOfTypes, TypeId};
pub use operators::{
    Action, ActionId, ActionInvocation, ActionInvocationWithGoal, Axiom, Event, EventId, EventSetId, ProblemModification,
    SetOfEvents,
};
pub use parsing::{load_domain_and_problem, parse_domain, parse_problem};
pub use planner::parallel::{actions_to_do_in_parallel_now, parallel_plan_for_every_goals, ParallelPlan};
pub use planner::{
    evaluate_plan, look_for_an_action_to_do, plan_for_every_goal, plan_for_more_important_goal_possible, PlannerConfig,
};
pub use printing::{domain_to_pddl, parallel_plan_to_pddl, plan_to_pddl, problem_to_pddl};
pub use problem::{Historical, Problem};
pub use time::{Clock, SystemClock, TestClock, Timestamp};
pub use world_state::WorldState;
