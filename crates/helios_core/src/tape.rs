//! Reverse-mode autodiff tape over dense 1-D arrays.
//!
//! [`Traced`] is the lazy/tape-linked array variant: values are computed
//! eagerly at record time, but every operation also appends a node to the
//! owning [`Tape`] so that [`Tape::backward`] can later propagate the
//! adjoint of a scalar loss back to the leaves. The op set is exactly the
//! algebra the finite-volume kernels need, plus a tridiagonal-solve node
//! whose adjoint solves the transposed system, which is what keeps the
//! whole implicit update differentiable without unrolling the solver.

use std::ops::Range;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::array::Algebra;
use crate::solver::tridiag::thomas;

#[derive(Debug, Clone, Copy)]
enum UnaryKind {
    Neg,
    Abs,
    Sqrt,
    Exp,
    Ln,
}

#[derive(Debug, Clone, Copy)]
enum BinaryKind {
    Add,
    Sub,
    Mul,
    Div,
}

#[derive(Debug)]
enum Op {
    Leaf,
    Unary {
        parent: usize,
        kind: UnaryKind,
    },
    Binary {
        lhs: usize,
        rhs: usize,
        kind: BinaryKind,
    },
    Scale {
        parent: usize,
        factor: f64,
    },
    Shift {
        parent: usize,
    },
    ClampMin {
        parent: usize,
        floor: f64,
    },
    ClampMax {
        parent: usize,
        cap: f64,
    },
    Powf {
        parent: usize,
        exponent: f64,
    },
    Slice {
        parent: usize,
        start: usize,
    },
    Concat {
        parents: Vec<usize>,
    },
    Sum {
        parent: usize,
    },
    Mean {
        parent: usize,
    },
    /// `array[i] * scalar[0]` broadcast.
    Broadcast {
        array: usize,
        scalar: usize,
    },
    Select {
        mask: Vec<bool>,
        on_true: usize,
        on_false: usize,
    },
    TridiagSolve {
        sub: usize,
        diag: usize,
        sup: usize,
        rhs: usize,
    },
}

#[derive(Debug)]
struct Node {
    op: Op,
    values: Vec<f64>,
}

/// Recording context for one differentiable forward pass.
///
/// The tape is process-wide sequential by design: one forward pass owns
/// one tape, and handles must not be mixed across tapes. The mutex only
/// makes handles sendable; nothing contends on it.
#[derive(Debug, Clone, Default)]
pub struct Tape {
    nodes: Arc<Mutex<Vec<Node>>>,
}

impl Tape {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Node>> {
        self.nodes.lock().expect("tape lock poisoned")
    }

    /// Number of recorded nodes.
    pub fn node_count(&self) -> usize {
        self.lock().len()
    }

    /// Records an input leaf. Gradients are reported with respect to
    /// leaves through [`Gradients::wrt`].
    pub fn leaf(&self, values: &[f64]) -> Traced {
        self.push(Op::Leaf, values.to_vec())
    }

    fn push(&self, op: Op, values: Vec<f64>) -> Traced {
        let mut nodes = self.lock();
        nodes.push(Node { op, values });
        Traced {
            tape: self.clone(),
            id: nodes.len() - 1,
        }
    }

    fn same_tape(&self, other: &Tape) -> bool {
        Arc::ptr_eq(&self.nodes, &other.nodes)
    }

    /// Reverse-mode sweep from a scalar (length-1) loss node.
    pub fn backward(&self, loss: &Traced) -> Gradients {
        assert!(
            self.same_tape(&loss.tape),
            "loss was recorded on a different tape"
        );
        let nodes = self.lock();
        assert_eq!(
            nodes[loss.id].values.len(),
            1,
            "backward expects a scalar loss node"
        );

        let mut grads: Vec<Vec<f64>> = nodes.iter().map(|n| vec![0.0; n.values.len()]).collect();
        grads[loss.id][0] = 1.0;

        // Node ids are topologically ordered by construction, so a single
        // reverse sweep visits every node after all of its consumers.
        for id in (0..=loss.id).rev() {
            let g = std::mem::take(&mut grads[id]);
            if g.iter().all(|v| *v == 0.0) {
                grads[id] = g;
                continue;
            }
            let node = &nodes[id];
            match &node.op {
                Op::Leaf => {}
                Op::Unary { parent, kind } => {
                    let pv = &nodes[*parent].values;
                    let out = &node.values;
                    let gp = &mut grads[*parent];
                    match kind {
                        UnaryKind::Neg => {
                            for i in 0..g.len() {
                                gp[i] -= g[i];
                            }
                        }
                        UnaryKind::Abs => {
                            for i in 0..g.len() {
                                gp[i] += if pv[i] >= 0.0 { g[i] } else { -g[i] };
                            }
                        }
                        UnaryKind::Sqrt => {
                            for i in 0..g.len() {
                                gp[i] += g[i] / (2.0 * out[i]);
                            }
                        }
                        UnaryKind::Exp => {
                            for i in 0..g.len() {
                                gp[i] += g[i] * out[i];
                            }
                        }
                        UnaryKind::Ln => {
                            for i in 0..g.len() {
                                gp[i] += g[i] / pv[i];
                            }
                        }
                    }
                }
                Op::Binary { lhs, rhs, kind } => {
                    match kind {
                        BinaryKind::Add => {
                            for i in 0..g.len() {
                                grads[*lhs][i] += g[i];
                            }
                            for i in 0..g.len() {
                                grads[*rhs][i] += g[i];
                            }
                        }
                        BinaryKind::Sub => {
                            for i in 0..g.len() {
                                grads[*lhs][i] += g[i];
                            }
                            for i in 0..g.len() {
                                grads[*rhs][i] -= g[i];
                            }
                        }
                        BinaryKind::Mul => {
                            let (lv, rv) = (&nodes[*lhs].values, &nodes[*rhs].values);
                            // Split the accumulation so `x * x` aliases safely.
                            let dl: Vec<f64> = (0..g.len()).map(|i| g[i] * rv[i]).collect();
                            let dr: Vec<f64> = (0..g.len()).map(|i| g[i] * lv[i]).collect();
                            for i in 0..g.len() {
                                grads[*lhs][i] += dl[i];
                            }
                            for i in 0..g.len() {
                                grads[*rhs][i] += dr[i];
                            }
                        }
                        BinaryKind::Div => {
                            let (lv, rv) = (&nodes[*lhs].values, &nodes[*rhs].values);
                            let dl: Vec<f64> = (0..g.len()).map(|i| g[i] / rv[i]).collect();
                            let dr: Vec<f64> = (0..g.len())
                                .map(|i| -g[i] * lv[i] / (rv[i] * rv[i]))
                                .collect();
                            for i in 0..g.len() {
                                grads[*lhs][i] += dl[i];
                            }
                            for i in 0..g.len() {
                                grads[*rhs][i] += dr[i];
                            }
                        }
                    }
                }
                Op::Scale { parent, factor } => {
                    let gp = &mut grads[*parent];
                    for i in 0..g.len() {
                        gp[i] += g[i] * factor;
                    }
                }
                Op::Shift { parent } => {
                    let gp = &mut grads[*parent];
                    for i in 0..g.len() {
                        gp[i] += g[i];
                    }
                }
                Op::ClampMin { parent, floor } => {
                    let pv = &nodes[*parent].values;
                    let passes: Vec<bool> = pv.iter().map(|v| *v > *floor).collect();
                    let gp = &mut grads[*parent];
                    for i in 0..g.len() {
                        if passes[i] {
                            gp[i] += g[i];
                        }
                    }
                }
                Op::ClampMax { parent, cap } => {
                    let pv = &nodes[*parent].values;
                    let passes: Vec<bool> = pv.iter().map(|v| *v < *cap).collect();
                    let gp = &mut grads[*parent];
                    for i in 0..g.len() {
                        if passes[i] {
                            gp[i] += g[i];
                        }
                    }
                }
                Op::Powf { parent, exponent } => {
                    let pv = &nodes[*parent].values;
                    let dp: Vec<f64> = (0..g.len())
                        .map(|i| g[i] * exponent * pv[i].powf(exponent - 1.0))
                        .collect();
                    let gp = &mut grads[*parent];
                    for i in 0..g.len() {
                        gp[i] += dp[i];
                    }
                }
                Op::Slice { parent, start } => {
                    let gp = &mut grads[*parent];
                    for i in 0..g.len() {
                        gp[start + i] += g[i];
                    }
                }
                Op::Concat { parents } => {
                    let mut offset = 0;
                    for parent in parents {
                        let len = nodes[*parent].values.len();
                        let gp = &mut grads[*parent];
                        for i in 0..len {
                            gp[i] += g[offset + i];
                        }
                        offset += len;
                    }
                }
                Op::Sum { parent } => {
                    let gp = &mut grads[*parent];
                    for value in gp.iter_mut() {
                        *value += g[0];
                    }
                }
                Op::Mean { parent } => {
                    let len = nodes[*parent].values.len().max(1) as f64;
                    let gp = &mut grads[*parent];
                    for value in gp.iter_mut() {
                        *value += g[0] / len;
                    }
                }
                Op::Broadcast { array, scalar } => {
                    let (av, sv) = (&nodes[*array].values, &nodes[*scalar].values);
                    let da: Vec<f64> = (0..g.len()).map(|i| g[i] * sv[0]).collect();
                    let ds: f64 = (0..g.len()).map(|i| g[i] * av[i]).sum();
                    for i in 0..g.len() {
                        grads[*array][i] += da[i];
                    }
                    grads[*scalar][0] += ds;
                }
                Op::Select {
                    mask,
                    on_true,
                    on_false,
                } => {
                    for i in 0..g.len() {
                        if mask[i] {
                            grads[*on_true][i] += g[i];
                        } else {
                            grads[*on_false][i] += g[i];
                        }
                    }
                }
                Op::TridiagSolve {
                    sub,
                    diag,
                    sup,
                    rhs,
                } => {
                    // For A x = b, with x-bar the incoming adjoint:
                    //   lambda = A^T \ x-bar, b-bar += lambda,
                    //   A-bar[r][c] = -lambda[r] * x[c] on the three bands.
                    let x = &node.values;
                    let n = x.len();
                    let sub_v = nodes[*sub].values.clone();
                    let diag_v = nodes[*diag].values.clone();
                    let sup_v = nodes[*sup].values.clone();
                    let lambda = thomas(&sup_v, &diag_v, &sub_v, &g);
                    for i in 0..n {
                        grads[*rhs][i] += lambda[i];
                    }
                    for i in 0..n {
                        grads[*diag][i] -= lambda[i] * x[i];
                    }
                    for j in 0..n - 1 {
                        grads[*sub][j] -= lambda[j + 1] * x[j];
                    }
                    for j in 0..n - 1 {
                        grads[*sup][j] -= lambda[j] * x[j + 1];
                    }
                }
            }
            grads[id] = g;
        }

        Gradients { grads }
    }
}

/// Result of a reverse sweep; indexable by any node recorded before the
/// loss, though only leaves are usually queried.
pub struct Gradients {
    grads: Vec<Vec<f64>>,
}

impl Gradients {
    pub fn wrt(&self, handle: &Traced) -> Vec<f64> {
        self.grads[handle.id].clone()
    }
}

/// Tape-linked array handle. See module docs.
#[derive(Debug, Clone)]
pub struct Traced {
    tape: Tape,
    id: usize,
}

impl Traced {
    pub fn tape(&self) -> &Tape {
        &self.tape
    }

    fn values_ref<R>(&self, f: impl FnOnce(&[f64]) -> R) -> R {
        let nodes = self.tape.lock();
        f(&nodes[self.id].values)
    }

    fn unary(&self, kind: UnaryKind) -> Traced {
        let values = self.values_ref(|v| {
            v.iter()
                .map(|x| match kind {
                    UnaryKind::Neg => -x,
                    UnaryKind::Abs => x.abs(),
                    UnaryKind::Sqrt => x.sqrt(),
                    UnaryKind::Exp => x.exp(),
                    UnaryKind::Ln => x.ln(),
                })
                .collect()
        });
        self.tape.push(
            Op::Unary {
                parent: self.id,
                kind,
            },
            values,
        )
    }

    fn binary(&self, rhs: &Traced, kind: BinaryKind) -> Traced {
        assert!(
            self.tape.same_tape(&rhs.tape),
            "binary op on handles from different tapes"
        );
        let values = {
            let nodes = self.tape.lock();
            let (lv, rv) = (&nodes[self.id].values, &nodes[rhs.id].values);
            assert_eq!(lv.len(), rv.len(), "element-wise op on different lengths");
            lv.iter()
                .zip(rv.iter())
                .map(|(a, b)| match kind {
                    BinaryKind::Add => a + b,
                    BinaryKind::Sub => a - b,
                    BinaryKind::Mul => a * b,
                    BinaryKind::Div => a / b,
                })
                .collect()
        };
        self.tape.push(
            Op::Binary {
                lhs: self.id,
                rhs: rhs.id,
                kind,
            },
            values,
        )
    }
}

impl Algebra for Traced {
    fn len(&self) -> usize {
        self.values_ref(|v| v.len())
    }

    fn get(&self, index: usize) -> f64 {
        self.values_ref(|v| v[index])
    }

    fn to_values(&self) -> Vec<f64> {
        self.values_ref(|v| v.to_vec())
    }

    fn lift(&self, values: &[f64]) -> Self {
        self.tape.leaf(values)
    }

    fn add(&self, rhs: &Self) -> Self {
        self.binary(rhs, BinaryKind::Add)
    }

    fn sub(&self, rhs: &Self) -> Self {
        self.binary(rhs, BinaryKind::Sub)
    }

    fn mul(&self, rhs: &Self) -> Self {
        self.binary(rhs, BinaryKind::Mul)
    }

    fn div(&self, rhs: &Self) -> Self {
        self.binary(rhs, BinaryKind::Div)
    }

    fn neg(&self) -> Self {
        self.unary(UnaryKind::Neg)
    }

    fn scale(&self, factor: f64) -> Self {
        let values = self.values_ref(|v| v.iter().map(|x| x * factor).collect());
        self.tape.push(
            Op::Scale {
                parent: self.id,
                factor,
            },
            values,
        )
    }

    fn shift(&self, offset: f64) -> Self {
        let values = self.values_ref(|v| v.iter().map(|x| x + offset).collect());
        self.tape.push(Op::Shift { parent: self.id }, values)
    }

    fn clamp_min(&self, floor: f64) -> Self {
        let values = self.values_ref(|v| v.iter().map(|x| x.max(floor)).collect());
        self.tape.push(
            Op::ClampMin {
                parent: self.id,
                floor,
            },
            values,
        )
    }

    fn clamp_max(&self, cap: f64) -> Self {
        let values = self.values_ref(|v| v.iter().map(|x| x.min(cap)).collect());
        self.tape.push(
            Op::ClampMax {
                parent: self.id,
                cap,
            },
            values,
        )
    }

    fn abs(&self) -> Self {
        self.unary(UnaryKind::Abs)
    }

    fn sqrt(&self) -> Self {
        self.unary(UnaryKind::Sqrt)
    }

    fn exp(&self) -> Self {
        self.unary(UnaryKind::Exp)
    }

    fn ln(&self) -> Self {
        self.unary(UnaryKind::Ln)
    }

    fn powf(&self, exponent: f64) -> Self {
        let values = self.values_ref(|v| v.iter().map(|x| x.powf(exponent)).collect());
        self.tape.push(
            Op::Powf {
                parent: self.id,
                exponent,
            },
            values,
        )
    }

    fn slice(&self, range: Range<usize>) -> Self {
        let start = range.start;
        let values = self.values_ref(|v| v[range].to_vec());
        self.tape.push(
            Op::Slice {
                parent: self.id,
                start,
            },
            values,
        )
    }

    fn concat(parts: &[&Self]) -> Self {
        assert!(!parts.is_empty(), "concat of zero arrays");
        let tape = parts[0].tape.clone();
        let mut values = Vec::new();
        let mut parents = Vec::with_capacity(parts.len());
        for part in parts {
            assert!(tape.same_tape(&part.tape), "concat across tapes");
            part.values_ref(|v| values.extend_from_slice(v));
            parents.push(part.id);
        }
        tape.push(Op::Concat { parents }, values)
    }

    fn sum(&self) -> Self {
        let total = self.values_ref(|v| v.iter().sum::<f64>());
        self.tape.push(Op::Sum { parent: self.id }, vec![total])
    }

    fn mean(&self) -> Self {
        let (total, len) = self.values_ref(|v| (v.iter().sum::<f64>(), v.len().max(1)));
        self.tape
            .push(Op::Mean { parent: self.id }, vec![total / len as f64])
    }

    fn mul_scalar_node(&self, scalar: &Self) -> Self {
        assert!(self.tape.same_tape(&scalar.tape), "broadcast across tapes");
        assert_eq!(scalar.len(), 1, "broadcast factor must have length 1");
        let s = scalar.get(0);
        let values = self.values_ref(|v| v.iter().map(|x| x * s).collect());
        self.tape.push(
            Op::Broadcast {
                array: self.id,
                scalar: scalar.id,
            },
            values,
        )
    }

    fn select(mask: &[bool], on_true: &Self, on_false: &Self) -> Self {
        assert!(on_true.tape.same_tape(&on_false.tape), "select across tapes");
        let values = {
            let nodes = on_true.tape.lock();
            let (tv, fv) = (&nodes[on_true.id].values, &nodes[on_false.id].values);
            assert_eq!(mask.len(), tv.len());
            assert_eq!(mask.len(), fv.len());
            mask.iter()
                .enumerate()
                .map(|(i, m)| if *m { tv[i] } else { fv[i] })
                .collect()
        };
        on_true.tape.push(
            Op::Select {
                mask: mask.to_vec(),
                on_true: on_true.id,
                on_false: on_false.id,
            },
            values,
        )
    }

    fn solve_tridiagonal(sub: &Self, diag: &Self, sup: &Self, rhs: &Self) -> Self {
        assert!(sub.tape.same_tape(&diag.tape));
        assert!(sub.tape.same_tape(&sup.tape));
        assert!(sub.tape.same_tape(&rhs.tape));
        let values = {
            let nodes = sub.tape.lock();
            thomas(
                &nodes[sub.id].values,
                &nodes[diag.id].values,
                &nodes[sup.id].values,
                &nodes[rhs.id].values,
            )
        };
        sub.tape.push(
            Op::TridiagSolve {
                sub: sub.id,
                diag: diag.id,
                sup: sup.id,
                rhs: rhs.id,
            },
            values,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::{Tape, Traced};
    use crate::array::Algebra;

    fn assert_grad_close(name: &str, actual: f64, expected: f64) {
        let tol = 1e-6 * expected.abs().max(1.0);
        assert!(
            (actual - expected).abs() < tol,
            "{name} gradient mismatch: {actual} expected {expected}"
        );
    }

    /// Central finite difference of `f` (as a scalar loss over leaf
    /// values) with respect to `inputs[index]`.
    fn numeric_gradient(
        f: impl Fn(&Traced) -> Traced,
        inputs: &[f64],
        index: usize,
    ) -> f64 {
        let h = 1e-6;
        let eval = |shifted: &[f64]| {
            let tape = Tape::new();
            let leaf = tape.leaf(shifted);
            f(&leaf).scalar()
        };
        let mut plus = inputs.to_vec();
        plus[index] += h;
        let mut minus = inputs.to_vec();
        minus[index] -= h;
        (eval(&plus) - eval(&minus)) / (2.0 * h)
    }

    fn check_gradients(name: &str, f: impl Fn(&Traced) -> Traced, inputs: &[f64]) {
        let tape = Tape::new();
        let leaf = tape.leaf(inputs);
        let loss = f(&leaf);
        let grads = tape.backward(&loss).wrt(&leaf);
        for index in 0..inputs.len() {
            let expected = numeric_gradient(&f, inputs, index);
            assert_grad_close(name, grads[index], expected);
        }
    }

    #[test]
    fn unary_op_gradients_match_finite_differences() {
        let x = [0.7, 1.3, 2.4];
        check_gradients("sqrt", |a| a.sqrt().sum(), &x);
        check_gradients("exp", |a| a.exp().sum(), &x);
        check_gradients("ln", |a| a.ln().sum(), &x);
        check_gradients("neg", |a| a.neg().sum(), &x);
        check_gradients("abs", |a| a.shift(-1.0).abs().sum(), &x);
        check_gradients("powf", |a| a.powf(2.5).sum(), &x);
    }

    #[test]
    fn binary_op_gradients_match_finite_differences() {
        let x = [0.5, 1.5, 3.0];
        check_gradients("mul_self", |a| a.mul(a).sum(), &x);
        check_gradients("div", |a| a.div(&a.shift(1.0)).sum(), &x);
        check_gradients("composite", |a| {
            a.mul(a).add(&a.sqrt()).sub(&a.scale(0.3)).mean()
        }, &x);
    }

    #[test]
    fn clamp_gradients_gate_by_activation() {
        let tape = Tape::new();
        let leaf = tape.leaf(&[0.5, 2.0]);
        let loss = leaf.clamp_min(1.0).sum();
        let grads = tape.backward(&loss).wrt(&leaf);
        assert_eq!(grads, vec![0.0, 1.0]);

        let tape = Tape::new();
        let leaf = tape.leaf(&[0.5, 2.0]);
        let loss = leaf.clamp_max(1.0).sum();
        let grads = tape.backward(&loss).wrt(&leaf);
        assert_eq!(grads, vec![1.0, 0.0]);
    }

    #[test]
    fn slice_concat_select_gradients() {
        let x = [1.0, 2.0, 3.0, 4.0];
        check_gradients("slice", |a| a.slice(1..3).sum(), &x);
        check_gradients("concat", |a| {
            let head = a.slice(0..2);
            let tail = a.slice(2..4).scale(2.0);
            Traced::concat(&[&head, &tail]).sum()
        }, &x);
        check_gradients("select", |a| {
            let doubled = a.scale(2.0);
            Traced::select(&[true, false, true, false], a, &doubled).sum()
        }, &x);
    }

    #[test]
    fn broadcast_gradient_flows_to_both_factors() {
        let x = [1.0, 2.0, 3.0, 10.0];
        check_gradients("broadcast", |a| {
            let arr = a.slice(0..3);
            let s = a.slice(3..4);
            arr.mul_scalar_node(&s).sum()
        }, &x);
    }

    #[test]
    fn tridiagonal_solve_adjoint_matches_finite_differences() {
        // Pack [sub(2) | diag(3) | sup(2) | rhs(3)] into one leaf so the
        // finite-difference harness perturbs every band entry.
        let x = [-0.4, -0.6, 2.0, 2.5, 3.0, -0.5, -0.3, 1.0, 2.0, 3.0];
        check_gradients("tridiag", |a| {
            let sub = a.slice(0..2);
            let diag = a.slice(2..5);
            let sup = a.slice(5..7);
            let rhs = a.slice(7..10);
            let solution = Traced::solve_tridiagonal(&sub, &diag, &sup, &rhs);
            solution.mul(&solution).sum()
        }, &x);
    }

    #[test]
    fn gradient_through_multiple_implicit_steps() {
        // Two chained solves emulate two implicit timesteps; the adjoint
        // has to flow through both tridiagonal nodes.
        let x = [2.0, 3.0, 4.0];
        check_gradients("two_steps", |a| {
            let sub = a.lift(&[-0.5, -0.5]);
            let sup = a.lift(&[-0.5, -0.5]);
            let diag = a.shift(1.0);
            let mid = Traced::solve_tridiagonal(&sub, &diag, &sup, a);
            let out = Traced::solve_tridiagonal(&sub, &diag, &sup, &mid);
            out.mean()
        }, &x);
    }

    #[test]
    fn lifted_constants_do_not_block_backward() {
        let tape = Tape::new();
        let leaf = tape.leaf(&[1.0, 2.0]);
        let constant = leaf.lift(&[10.0, 20.0]);
        let loss = leaf.mul(&constant).sum();
        let grads = tape.backward(&loss).wrt(&leaf);
        assert_eq!(grads, vec![10.0, 20.0]);
    }
}
