//! Formula evaluation
//!
//! Sequential resolution of `name ← expression` bindings against a mutable
//! environment. Each expression sees the seed environment plus every
//! previously-resolved name; the result is realized to exactly `n` values
//! per name (length-1 broadcast, `k | n` tiling, else `LengthMismatch`).

use std::collections::HashMap;

use rand::rngs::StdRng;

use super::dist::Dist;
use super::expr::{DistSpec, Expr, Op};
use crate::error::{Result, SimError};

/// One `name ← expression` pair.
#[derive(Debug, Clone)]
pub struct Binding {
    pub name: String,
    pub expr: Expr,
}

impl Binding {
    pub fn new(name: impl Into<String>, expr: impl Into<Expr>) -> Binding {
        Binding {
            name: name.into(),
            expr: expr.into(),
        }
    }
}

/// Name → value-vector environment with stable insertion order.
///
/// Re-inserting a name replaces its value but keeps its original position,
/// so downstream column order is independent of shadowing.
#[derive(Debug, Clone, Default)]
pub struct Env {
    names: Vec<String>,
    values: HashMap<String, Vec<f64>>,
}

impl Env {
    pub fn new() -> Env {
        Env::default()
    }

    pub fn from_pairs<I, S>(pairs: I) -> Env
    where
        I: IntoIterator<Item = (S, Vec<f64>)>,
        S: Into<String>,
    {
        let mut env = Env::new();
        for (name, values) in pairs {
            env.insert(name.into(), values);
        }
        env
    }

    pub fn insert(&mut self, name: impl Into<String>, values: Vec<f64>) {
        let name = name.into();
        if !self.values.contains_key(&name) {
            self.names.push(name.clone());
        }
        self.values.insert(name, values);
    }

    pub fn get(&self, name: &str) -> Option<&Vec<f64>> {
        self.values.get(name)
    }

    /// First element of a name's vector, for trial/condition rows where
    /// every entry has length 1.
    pub fn scalar(&self, name: &str) -> Option<f64> {
        self.values.get(name).and_then(|v| v.first().copied())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Vec<f64>)> {
        self.names
            .iter()
            .map(move |n| (n.as_str(), &self.values[n]))
    }

    /// Environment holding row `i` of every entry (each value length 1).
    /// Entries shorter than `i + 1` recycle.
    pub fn row(&self, i: usize) -> Env {
        let mut out = Env::new();
        for (name, values) in self.iter() {
            out.insert(name, vec![values[i % values.len()]]);
        }
        out
    }
}

/// What an expression evaluates to before realization.
pub enum Value {
    Deterministic(Vec<f64>),
    Stochastic(Dist),
}

impl Value {
    /// Exactly `n` values: a distribution draws `n` samples, a
    /// deterministic value recycles under the tiling rule.
    pub fn realize(self, name: &str, n: usize, rng: &mut StdRng) -> Result<Vec<f64>> {
        match self {
            Value::Stochastic(dist) => dist.generate(n, rng),
            Value::Deterministic(v) => recycle(name, v, n),
        }
    }
}

/// Tile `v` to length `n` when `len(v)` divides `n`; else `LengthMismatch`.
fn recycle(name: &str, v: Vec<f64>, n: usize) -> Result<Vec<f64>> {
    let k = v.len();
    if k == n {
        return Ok(v);
    }
    if k == 0 || n % k != 0 {
        return Err(SimError::LengthMismatch {
            name: name.to_string(),
            got: k,
            need: n,
        });
    }
    let mut out = Vec::with_capacity(n);
    for _ in 0..n / k {
        out.extend_from_slice(&v);
    }
    Ok(out)
}

/// Resolve an ordered binding list against `seed`, drawing `n` values per
/// name. Later bindings observe earlier ones; names may shadow the seed.
pub fn evaluate_bindings(
    bindings: &[Binding],
    seed: &Env,
    n: usize,
    rng: &mut StdRng,
) -> Result<Env> {
    let mut env = seed.clone();
    for binding in bindings {
        let value = eval_expr(&binding.expr, &env, n, rng).map_err(|e| rename(e, &binding.name))?;
        let realized = value.realize(&binding.name, n, rng)?;
        env.insert(binding.name.clone(), realized);
    }
    Ok(env)
}

/// Attach the binding name to a length error raised inside the expression.
fn rename(err: SimError, name: &str) -> SimError {
    match err {
        SimError::LengthMismatch { got, need, .. } => SimError::LengthMismatch {
            name: name.to_string(),
            got,
            need,
        },
        other => other,
    }
}

/// Top-level evaluation: a bare `Draw` stays stochastic so the caller can
/// draw exactly `n` samples; everything else resolves to a vector. A `Draw`
/// nested inside an operation is realized to `n` samples in place, so
/// `normal(mu, s) + delta` composes elementwise.
fn eval_expr(expr: &Expr, env: &Env, n: usize, rng: &mut StdRng) -> Result<Value> {
    match expr {
        Expr::Draw(spec) => Ok(Value::Stochastic(build_dist(spec, env, n, rng)?)),
        _ => Ok(Value::Deterministic(eval_vec(expr, env, n, rng)?)),
    }
}

/// Evaluate to a plain vector, realizing any nested draws to `n` samples.
fn eval_vec(expr: &Expr, env: &Env, n: usize, rng: &mut StdRng) -> Result<Vec<f64>> {
    match expr {
        Expr::Const(v) => Ok(v.clone()),
        Expr::Ref(name) => env.get(name).cloned().ok_or_else(|| {
            SimError::ConfigInvalid(format!("formula references unresolved name '{name}'"))
        }),
        Expr::Draw(spec) => build_dist(spec, env, n, rng)?.generate(n, rng),
        Expr::App(op, args) => {
            let args: Vec<Vec<f64>> = args
                .iter()
                .map(|a| eval_vec(a, env, n, rng))
                .collect::<Result<_>>()?;
            apply_op(*op, &args)
        }
        Expr::Func(f, args) => {
            let args: Vec<Vec<f64>> = args
                .iter()
                .map(|a| eval_vec(a, env, n, rng))
                .collect::<Result<_>>()?;
            Ok(f(&args))
        }
    }
}

fn build_dist(spec: &DistSpec, env: &Env, n: usize, rng: &mut StdRng) -> Result<Dist> {
    let mut ev = |e: &Expr| eval_vec(e, env, n, rng);
    Ok(match spec {
        DistSpec::Uniform(lo, hi) => Dist::Uniform { low: ev(lo)?, high: ev(hi)? },
        DistSpec::Normal(m, s) => Dist::Normal { mean: ev(m)?, sd: ev(s)? },
        DistSpec::LogNormal(m, s) => Dist::LogNormal { mu: ev(m)?, sigma: ev(s)? },
        DistSpec::Binomial(sz, p) => Dist::Binomial { size: ev(sz)?, prob: ev(p)? },
        DistSpec::Beta(a, b) => Dist::Beta { alpha: ev(a)?, beta: ev(b)? },
        DistSpec::Gamma(k, t) => Dist::Gamma { shape: ev(k)?, scale: ev(t)? },
        DistSpec::Exponential(r) => Dist::Exponential { rate: ev(r)? },
        DistSpec::Poisson(l) => Dist::Poisson { lambda: ev(l)? },
        DistSpec::TruncNormal(m, s, lo, hi) => Dist::TruncNormal {
            mean: ev(m)?,
            sd: ev(s)?,
            low: ev(lo)?,
            high: ev(hi)?,
        },
    })
}

fn apply_op(op: Op, args: &[Vec<f64>]) -> Result<Vec<f64>> {
    match op {
        Op::Neg | Op::Exp | Op::Ln | Op::Sqrt | Op::Abs => {
            let a = unary_arg(op, args)?;
            Ok(a.iter()
                .map(|&x| match op {
                    Op::Neg => -x,
                    Op::Exp => x.exp(),
                    Op::Ln => x.ln(),
                    Op::Sqrt => x.sqrt(),
                    Op::Abs => x.abs(),
                    _ => unreachable!(),
                })
                .collect())
        }
        Op::Add | Op::Sub | Op::Mul | Op::Div | Op::Pow | Op::Min | Op::Max => {
            let [a, b] = binary_args(op, args)?;
            elementwise(op, a, b)
        }
    }
}

fn unary_arg<'a>(op: Op, args: &'a [Vec<f64>]) -> Result<&'a Vec<f64>> {
    match args {
        [a] => Ok(a),
        _ => Err(SimError::ConfigInvalid(format!(
            "'{}' takes one argument, got {}",
            op.symbol(),
            args.len()
        ))),
    }
}

fn binary_args<'a>(op: Op, args: &'a [Vec<f64>]) -> Result<[&'a Vec<f64>; 2]> {
    match args {
        [a, b] => Ok([a, b]),
        _ => Err(SimError::ConfigInvalid(format!(
            "'{}' takes two arguments, got {}",
            op.symbol(),
            args.len()
        ))),
    }
}

/// Elementwise combination with recycling: the output has the longer
/// length, and each input's length must divide it.
fn elementwise(op: Op, a: &[f64], b: &[f64]) -> Result<Vec<f64>> {
    let n = a.len().max(b.len());
    for k in [a.len(), b.len()] {
        if k == 0 || n % k != 0 {
            return Err(SimError::LengthMismatch {
                name: op.symbol().to_string(),
                got: k,
                need: n,
            });
        }
    }
    Ok((0..n)
        .map(|i| {
            let (x, y) = (a[i % a.len()], b[i % b.len()]);
            match op {
                Op::Add => x + y,
                Op::Sub => x - y,
                Op::Mul => x * y,
                Op::Div => x / y,
                Op::Pow => x.powf(y),
                Op::Min => x.min(y),
                Op::Max => x.max(y),
                _ => unreachable!(),
            }
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formula::expr::normal;
    use rand::SeedableRng;

    fn rng() -> StdRng {
        StdRng::seed_from_u64(42)
    }

    #[test]
    fn scalar_broadcasts_and_references_resolve() {
        let bindings = vec![
            Binding::new("x", 2.0),
            Binding::new("y", Expr::var("x") + 1.0),
        ];
        let env = evaluate_bindings(&bindings, &Env::new(), 3, &mut rng()).unwrap();
        assert_eq!(env.get("x").unwrap(), &vec![2.0, 2.0, 2.0]);
        assert_eq!(env.get("y").unwrap(), &vec![3.0, 3.0, 3.0]);
    }

    #[test]
    fn divisor_lengths_tile() {
        let bindings = vec![
            Binding::new("x", vec![1.0, 2.0]),
            Binding::new("y", Expr::var("x") * 10.0),
        ];
        let env = evaluate_bindings(&bindings, &Env::new(), 4, &mut rng()).unwrap();
        assert_eq!(env.get("x").unwrap(), &vec![1.0, 2.0, 1.0, 2.0]);
        assert_eq!(env.get("y").unwrap(), &vec![10.0, 20.0, 10.0, 20.0]);
    }

    #[test]
    fn non_divisor_length_fails_with_name() {
        let bindings = vec![Binding::new("x", vec![1.0, 2.0, 3.0])];
        let err = evaluate_bindings(&bindings, &Env::new(), 2, &mut rng()).unwrap_err();
        match err {
            SimError::LengthMismatch { name, got, need } => {
                assert_eq!(name, "x");
                assert_eq!((got, need), (3, 2));
            }
            other => panic!("expected LengthMismatch, got {other:?}"),
        }
    }

    #[test]
    fn draws_produce_exactly_n_samples() {
        let bindings = vec![Binding::new("v", normal(0.0, 1.0))];
        let env = evaluate_bindings(&bindings, &Env::new(), 8, &mut rng()).unwrap();
        assert_eq!(env.get("v").unwrap().len(), 8);
    }

    #[test]
    fn nested_draw_composes_with_arithmetic() {
        let bindings = vec![Binding::new("v", normal(10.0, 0.001) + 5.0)];
        let env = evaluate_bindings(&bindings, &Env::new(), 4, &mut rng()).unwrap();
        for &x in env.get("v").unwrap() {
            assert!((x - 15.0).abs() < 0.1);
        }
    }

    #[test]
    fn bindings_shadow_the_seed() {
        let seed = Env::from_pairs([("x", vec![1.0])]);
        let bindings = vec![Binding::new("x", 9.0)];
        let env = evaluate_bindings(&bindings, &seed, 2, &mut rng()).unwrap();
        assert_eq!(env.get("x").unwrap(), &vec![9.0, 9.0]);
        // Shadowing keeps the original column position.
        assert_eq!(env.names(), &["x".to_string()]);
    }

    #[test]
    fn empty_binding_list_returns_seed() {
        let seed = Env::from_pairs([("a", vec![1.0])]);
        let env = evaluate_bindings(&[], &seed, 5, &mut rng()).unwrap();
        assert_eq!(env.get("a").unwrap(), &vec![1.0]);
    }

    #[test]
    fn distribution_parameters_reference_earlier_names() {
        let bindings = vec![
            Binding::new("mu", 100.0),
            Binding::new("v", normal(Expr::var("mu"), 1e-9)),
        ];
        let env = evaluate_bindings(&bindings, &Env::new(), 3, &mut rng()).unwrap();
        for &x in env.get("v").unwrap() {
            assert!((x - 100.0).abs() < 1e-3);
        }
    }
}
