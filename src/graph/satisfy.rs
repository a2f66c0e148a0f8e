//! # Satisfiability evaluation.
//!
//! Whether an instance's dependencies currently allow it to come up is a
//! three-valued question: [`Satisfiability::Satisfied`] (go),
//! [`Satisfiability::Unsatisfied`] (wait), or
//! [`Satisfiability::Unsatisfiable`] (will not happen without intervention).
//!
//! Group evaluation is a match over the four quantifier kinds; instance
//! evaluation is a match over lifecycle state, with special rules for
//! optional and exclusion contexts.

use crate::repository::GroupKind;

use super::vertex::{Graph, VertexId, VertexKind, VertexState};

/// Outcome of evaluating a dependency.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Satisfiability {
    /// The dependency currently allows its consumer to run.
    Satisfied,
    /// Not satisfied now, but it could become so.
    Unsatisfied,
    /// Cannot become satisfied without administrative action.
    Unsatisfiable,
}

use Satisfiability::{Satisfied, Unsatisfiable, Unsatisfied};

/// True for states that count as "running".
pub fn is_running(state: VertexState) -> bool {
    matches!(state, VertexState::Online | VertexState::Degraded)
}

/// Worst-of accumulator: `Unsatisfiable` is sticky, `Unsatisfied` overrides
/// `Satisfied`.
fn fold_worst(acc: Satisfiability, next: Satisfiability) -> Satisfiability {
    if next == Satisfied {
        acc
    } else if acc == Unsatisfiable {
        Unsatisfiable
    } else {
        next
    }
}

/// Evaluates one dependency edge target.
pub fn vertex_satisfies(g: &Graph, id: VertexId, recurse: bool) -> Satisfiability {
    match g.vertex(id).kind() {
        VertexKind::Instance => instance_satisfies(g, id, recurse),
        _ => deps_satisfied(g, id, recurse),
    }
}

/// Evaluates an instance in an ordinary (require-*) context.
fn instance_satisfies(g: &Graph, id: VertexId, recurse: bool) -> Satisfiability {
    let v = g.vertex(id);

    // Not set up by now means not a valid instance; administrative
    // intervention is needed to correct that.
    if !v.is_setup() || !v.is_enabled() {
        return Unsatisfiable;
    }

    match v.state() {
        VertexState::Uninitialised => Unsatisfied,
        VertexState::Disabled => Unsatisfiable,
        VertexState::Offline => {
            if !recurse {
                Unsatisfied
            } else if deps_satisfied(g, id, recurse) == Unsatisfiable {
                Unsatisfiable
            } else {
                Unsatisfied
            }
        }
        VertexState::Maintenance => Unsatisfiable,
        VertexState::Online | VertexState::Degraded => Satisfied,
    }
}

/// Evaluates an instance in an optional-all context: an instance that
/// cannot run is acceptable by absence.
fn instance_satisfies_optional(g: &Graph, id: VertexId, recurse: bool) -> Satisfiability {
    let v = g.vertex(id);

    if !v.is_setup() {
        return Satisfied;
    }

    match v.state() {
        VertexState::Uninitialised => Unsatisfied,
        VertexState::Offline => {
            if !recurse {
                Unsatisfied
            } else if deps_satisfied(g, id, recurse) == Unsatisfiable {
                Satisfied
            } else {
                Unsatisfied
            }
        }
        VertexState::Disabled
        | VertexState::Maintenance
        | VertexState::Online
        | VertexState::Degraded => Satisfied,
    }
}

/// Evaluates an instance in an exclude-all context: satisfied when the
/// instance is not running and not enabled toward running.
fn instance_satisfies_exclusion(g: &Graph, id: VertexId) -> Satisfiability {
    let v = g.vertex(id);

    if !v.is_setup() {
        return Satisfied;
    }

    match v.state() {
        // May still be awaiting disabling.
        VertexState::Uninitialised | VertexState::Offline => Unsatisfied,
        VertexState::Maintenance | VertexState::Disabled => Satisfied,
        VertexState::Online | VertexState::Degraded => {
            if v.is_enabled() {
                Unsatisfiable
            } else {
                Unsatisfied
            }
        }
    }
}

/// Evaluates a vertex's dependency list under its quantifier.
///
/// Service and instance vertices quantify their dependencies as
/// `RequireAll`; group vertices use their declared kind.
pub fn deps_satisfied(g: &Graph, id: VertexId, recurse: bool) -> Satisfiability {
    let v = g.vertex(id);
    let quant = v.kind().group_kind().unwrap_or(GroupKind::RequireAll);

    match quant {
        GroupKind::RequireAll => v
            .dependencies()
            .iter()
            .map(|e| vertex_satisfies(g, e.to, recurse))
            .fold(Satisfied, fold_worst),

        GroupKind::RequireAny => {
            if v.dependencies().is_empty() {
                return Satisfied;
            }
            let mut sat = Unsatisfiable;
            for e in v.dependencies() {
                match vertex_satisfies(g, e.to, recurse) {
                    Satisfied => return Satisfied,
                    Unsatisfied => sat = Unsatisfied,
                    Unsatisfiable => {}
                }
            }
            sat
        }

        GroupKind::OptionalAll => {
            let mut sat = Satisfied;
            for e in v.dependencies() {
                let target = g.vertex(e.to);
                match target.kind() {
                    VertexKind::Instance => {
                        sat = fold_worst(sat, instance_satisfies_optional(g, e.to, recurse));
                    }
                    VertexKind::Service => {
                        for inner in target.dependencies() {
                            if g.vertex(inner.to).kind().is_instance() {
                                sat = fold_worst(
                                    sat,
                                    instance_satisfies_optional(g, inner.to, recurse),
                                );
                            }
                        }
                    }
                    VertexKind::Group { .. } => {
                        tracing::warn!(
                            path = %target.path(),
                            "group as optional-all target is not evaluable"
                        );
                    }
                }
            }
            sat
        }

        GroupKind::ExcludeAll => {
            let mut sat = Satisfied;
            for e in v.dependencies() {
                let target = g.vertex(e.to);
                match target.kind() {
                    VertexKind::Instance => {
                        sat = fold_worst(sat, instance_satisfies_exclusion(g, e.to));
                    }
                    VertexKind::Service => {
                        for inner in target.dependencies() {
                            if g.vertex(inner.to).kind().is_instance() {
                                sat = fold_worst(sat, instance_satisfies_exclusion(g, inner.to));
                            }
                        }
                    }
                    VertexKind::Group { .. } => {
                        tracing::warn!(
                            path = %target.path(),
                            "group as exclude-all target is not evaluable"
                        );
                    }
                }
            }
            sat
        }
    }
}

/// True when the instance is enabled, not headed down, and its dependency
/// groups are fully satisfied recursively.
pub fn can_come_up(g: &Graph, id: VertexId) -> bool {
    let v = g.vertex(id);
    v.is_enabled()
        && !v.to_offline()
        && !v.to_disable()
        && deps_satisfied(g, id, true) == Satisfied
}

/// True when every transitive dependent instance that was marked for
/// shutdown has finished running. The root of the walk is exempt from the
/// "must not be running" requirement.
pub fn can_go_down(g: &Graph, id: VertexId, root: bool) -> bool {
    let v = g.vertex(id);
    for e in v.dependents() {
        let dep = g.vertex(e.to);
        // Dependents the disable pass chose not to mark do not hold us up.
        if dep.kind().is_instance() && !dep.to_offline() {
            continue;
        }
        if !can_go_down(g, e.to, false) {
            return false;
        }
    }
    if v.kind().is_instance() && is_running(v.state()) && !root {
        return false;
    }
    true
}
