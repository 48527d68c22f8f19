//! Proving that a new constraint already follows from existing ones.
//!
//! All reasoning uses constraint semantics: a clause holds for a row unless it
//! evaluates to false, so a null result never refutes anything. A prover may
//! answer `false` whenever it cannot establish the implication; callers then
//! fall back to scanning the table.

use crate::catalog::types::{AttrNumber, Value, compare_values};
use crate::expr::eval::compile;
use crate::expr::{BinaryOp, BoundExpr};
use std::cmp::Ordering;

/// Decides whether `goal` holds for every row on which all `premises` hold.
pub trait ImplicationProver: Send + Sync {
    fn implies(&self, premises: &[BoundExpr], goal: &BoundExpr) -> bool;

    fn name(&self) -> &'static str;
}

/// Never proves anything; every new constraint is validated by a scan.
#[derive(Debug, Default, Clone, Copy)]
pub struct NeverProver;

impl ImplicationProver for NeverProver {
    fn implies(&self, _premises: &[BoundExpr], _goal: &BoundExpr) -> bool {
        false
    }

    fn name(&self) -> &'static str {
        "never"
    }
}

/// Structural prover over conjunctions, disjunctions, null tests and
/// single-column comparisons against constants.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConservativeProver;

impl ImplicationProver for ConservativeProver {
    fn implies(&self, premises: &[BoundExpr], goal: &BoundExpr) -> bool {
        let mut facts = Vec::new();
        for premise in premises {
            flatten_and(premise, &mut facts);
        }
        prove(&facts, goal)
    }

    fn name(&self) -> &'static str {
        "conservative"
    }
}

fn flatten_and<'a>(expr: &'a BoundExpr, out: &mut Vec<&'a BoundExpr>) {
    match expr {
        BoundExpr::And(items) => items.iter().for_each(|item| flatten_and(item, out)),
        other => out.push(other),
    }
}

fn prove(facts: &[&BoundExpr], goal: &BoundExpr) -> bool {
    match goal {
        BoundExpr::And(items) => items.iter().all(|item| prove(facts, item)),
        BoundExpr::Or(items) => {
            items.iter().any(|item| prove(facts, item))
                || facts.iter().any(|fact| *fact == goal)
        }
        BoundExpr::Const {
            value: Value::Boolean(true),
            ..
        } => true,
        BoundExpr::NullTest { is_null: false, .. } => facts.iter().any(|fact| *fact == goal),
        _ => facts.iter().any(|fact| *fact == goal || clause_implies(fact, goal)),
    }
}

/// Normalized `column op constant` clause.
#[derive(Debug, Clone)]
struct Restriction {
    attnum: AttrNumber,
    op: BinaryOp,
    value: Value,
}

#[derive(Debug, Clone)]
enum Atom {
    Compare(Restriction),
    InList(AttrNumber, Vec<Value>),
}

fn strip_relabel(expr: &BoundExpr) -> Option<AttrNumber> {
    match expr {
        BoundExpr::Var { attnum, .. } => Some(*attnum),
        BoundExpr::Coerce { arg, path, .. } if path.is_relabel() => strip_relabel(arg),
        _ => None,
    }
}

fn fold_constant(expr: &BoundExpr) -> Option<Value> {
    if !expr.is_row_independent() || expr.volatility() != crate::expr::Volatility::Immutable {
        return None;
    }
    let value = compile(expr).ok()?.eval(&[]).ok()?;
    (!value.is_null()).then_some(value)
}

fn atom(expr: &BoundExpr) -> Option<Atom> {
    match expr {
        BoundExpr::Binary {
            op, left, right, ..
        } if op.is_comparison() => {
            if let (Some(attnum), Some(value)) = (strip_relabel(left), fold_constant(right)) {
                return Some(Atom::Compare(Restriction {
                    attnum,
                    op: *op,
                    value,
                }));
            }
            if let (Some(value), Some(attnum)) = (fold_constant(left), strip_relabel(right)) {
                return Some(Atom::Compare(Restriction {
                    attnum,
                    op: op.commute(),
                    value,
                }));
            }
            None
        }
        BoundExpr::InList { arg, list } => {
            let attnum = strip_relabel(arg)?;
            let values = list.iter().map(fold_constant).collect::<Option<Vec<_>>>()?;
            Some(Atom::InList(attnum, values))
        }
        _ => None,
    }
}

fn clause_implies(fact: &BoundExpr, goal: &BoundExpr) -> bool {
    let (Some(premise), Some(target)) = (atom(fact), atom(goal)) else {
        return false;
    };
    match (premise, target) {
        (Atom::Compare(p), Atom::Compare(g)) => p.attnum == g.attnum && restriction_implies(&p, &g),
        (Atom::Compare(p), Atom::InList(attnum, list)) => {
            p.attnum == attnum
                && p.op == BinaryOp::Eq
                && list
                    .iter()
                    .any(|v| compare_values(&p.value, v) == Some(Ordering::Equal))
        }
        (Atom::InList(attnum, premise_list), Atom::InList(goal_attnum, goal_list)) => {
            attnum == goal_attnum
                && premise_list.iter().all(|p| {
                    goal_list
                        .iter()
                        .any(|g| compare_values(p, g) == Some(Ordering::Equal))
                })
        }
        (Atom::InList(attnum, premise_list), Atom::Compare(g)) => {
            // Every admitted value must satisfy the goal on its own.
            attnum == g.attnum
                && !premise_list.is_empty()
                && premise_list.iter().all(|p| {
                    restriction_implies(
                        &Restriction {
                            attnum,
                            op: BinaryOp::Eq,
                            value: p.clone(),
                        },
                        &g,
                    )
                })
        }
    }
}

/// Whether every value `x` with `x p.op p.value` also satisfies `x g.op g.value`.
fn restriction_implies(p: &Restriction, g: &Restriction) -> bool {
    use BinaryOp::*;
    let Some(cmp) = compare_values(&p.value, &g.value) else {
        return false;
    };
    let (lt, eq, gt) = (
        cmp == Ordering::Less,
        cmp == Ordering::Equal,
        cmp == Ordering::Greater,
    );
    match (g.op, p.op) {
        (Lt, Lt) => lt || eq,
        (Lt, Le) | (Lt, Eq) => lt,
        (Le, Lt) | (Le, Le) | (Le, Eq) => lt || eq,
        (Gt, Gt) => gt || eq,
        (Gt, Ge) | (Gt, Eq) => gt,
        (Ge, Gt) | (Ge, Ge) | (Ge, Eq) => gt || eq,
        (Eq, Eq) => eq,
        (Ne, Eq) => !eq,
        (Ne, Ne) => eq,
        (Ne, Lt) => lt || eq,
        (Ne, Le) => lt,
        (Ne, Gt) => gt || eq,
        (Ne, Ge) => gt,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::types::{ColumnType, TypeName};
    use crate::expr::eval::compile;
    use proptest::prelude::*;

    fn var(attnum: AttrNumber) -> BoundExpr {
        BoundExpr::var(attnum, TypeName::new(ColumnType::Integer))
    }

    fn int(v: i64) -> BoundExpr {
        BoundExpr::constant(Value::Integer(v), TypeName::new(ColumnType::Integer))
    }

    fn cmp(attnum: AttrNumber, op: BinaryOp, v: i64) -> BoundExpr {
        BoundExpr::compare(op, var(attnum), int(v))
    }

    #[test]
    fn tighter_ranges_imply_looser_ones() {
        let prover = ConservativeProver;
        let premises = vec![cmp(1, BinaryOp::Gt, 10)];
        assert!(prover.implies(&premises, &cmp(1, BinaryOp::Gt, 5)));
        assert!(prover.implies(&premises, &cmp(1, BinaryOp::Ge, 11)));
        assert!(!prover.implies(&premises, &cmp(1, BinaryOp::Gt, 20)));
        assert!(!prover.implies(&premises, &cmp(2, BinaryOp::Gt, 5)));
    }

    #[test]
    fn null_tests_need_an_identical_premise() {
        let prover = ConservativeProver;
        let not_null = BoundExpr::not_null(var(1));
        assert!(!prover.implies(&[cmp(1, BinaryOp::Gt, 0)], &not_null));
        let goal = BoundExpr::And(vec![not_null.clone(), cmp(1, BinaryOp::Gt, 0)]);
        assert!(prover.implies(&[not_null, cmp(1, BinaryOp::Gt, 3)], &goal));
    }

    #[test]
    fn never_prover_always_scans() {
        assert!(!NeverProver.implies(&[cmp(1, BinaryOp::Gt, 3)], &cmp(1, BinaryOp::Gt, 3)));
    }

    fn arb_op() -> impl Strategy<Value = BinaryOp> {
        prop_oneof![
            Just(BinaryOp::Eq),
            Just(BinaryOp::Ne),
            Just(BinaryOp::Lt),
            Just(BinaryOp::Le),
            Just(BinaryOp::Gt),
            Just(BinaryOp::Ge),
        ]
    }

    fn arb_clause() -> impl Strategy<Value = BoundExpr> {
        (1i16..=2, arb_op(), -5i64..5).prop_map(|(a, op, v)| cmp(a, op, v))
    }

    proptest! {
        #[test]
        fn proofs_are_sound(
            premises in prop::collection::vec(arb_clause(), 1..3),
            goal in arb_clause(),
            rows in prop::collection::vec((prop::option::of(-7i64..7), prop::option::of(-7i64..7)), 1..24),
        ) {
            if ConservativeProver.implies(&premises, &goal) {
                let goal_eval = compile(&goal).expect("goal");
                let premise_evals: Vec<_> = premises.iter().map(|p| compile(p).expect("premise")).collect();
                for (a, b) in rows {
                    let row = vec![
                        a.map(Value::Integer).unwrap_or(Value::Null),
                        b.map(Value::Integer).unwrap_or(Value::Null),
                    ];
                    let admitted = premise_evals.iter().all(|p| p.check(&row).expect("check"));
                    if admitted {
                        prop_assert!(goal_eval.check(&row).expect("check"));
                    }
                }
            }
        }
    }
}
