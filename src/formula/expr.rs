//! Formula expressions
//!
//! A small closed AST instead of the free-form expressions a dynamic
//! language would allow. Names resolve at evaluation time against the
//! current environment; `Func` is the escape hatch for arbitrary
//! user-supplied vector operations.
//!
//! Operator overloading (`+ - * /`, unary `-`) composes expressions the
//! way a formula reads: `var("V") * 2.0 + normal(0.0, 0.1)`.

use std::fmt;
use std::sync::Arc;

/// User-supplied vector operation over already-evaluated arguments.
pub type UserFn = Arc<dyn Fn(&[Vec<f64>]) -> Vec<f64> + Send + Sync>;

/// Elementwise operations available inside formulas.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Add,
    Sub,
    Mul,
    Div,
    Neg,
    Pow,
    Exp,
    Ln,
    Sqrt,
    Abs,
    Min,
    Max,
}

impl Op {
    pub(crate) fn symbol(self) -> &'static str {
        match self {
            Op::Add => "+",
            Op::Sub => "-",
            Op::Mul => "*",
            Op::Div => "/",
            Op::Neg => "neg",
            Op::Pow => "pow",
            Op::Exp => "exp",
            Op::Ln => "ln",
            Op::Sqrt => "sqrt",
            Op::Abs => "abs",
            Op::Min => "min",
            Op::Max => "max",
        }
    }
}

/// A formula's right-hand side.
#[derive(Clone)]
pub enum Expr {
    /// Literal scalar or vector.
    Const(Vec<f64>),
    /// Reference to a previously-resolved name.
    Ref(String),
    /// Elementwise application with recycling.
    App(Op, Vec<Expr>),
    /// Distribution constructor; draws `n` samples when realized.
    Draw(DistSpec),
    /// User function over evaluated arguments.
    Func(UserFn, Vec<Expr>),
}

/// Distribution constructors whose parameters are themselves expressions.
#[derive(Clone)]
pub enum DistSpec {
    Uniform(Box<Expr>, Box<Expr>),
    Normal(Box<Expr>, Box<Expr>),
    LogNormal(Box<Expr>, Box<Expr>),
    Binomial(Box<Expr>, Box<Expr>),
    Beta(Box<Expr>, Box<Expr>),
    Gamma(Box<Expr>, Box<Expr>),
    Exponential(Box<Expr>),
    Poisson(Box<Expr>),
    TruncNormal(Box<Expr>, Box<Expr>, Box<Expr>, Box<Expr>),
}

impl Expr {
    pub fn val(x: f64) -> Expr {
        Expr::Const(vec![x])
    }

    pub fn vec(xs: Vec<f64>) -> Expr {
        Expr::Const(xs)
    }

    pub fn var(name: impl Into<String>) -> Expr {
        Expr::Ref(name.into())
    }

    pub fn func(f: UserFn, args: Vec<Expr>) -> Expr {
        Expr::Func(f, args)
    }

    pub fn pow(self, rhs: impl Into<Expr>) -> Expr {
        Expr::App(Op::Pow, vec![self, rhs.into()])
    }

    pub fn exp(self) -> Expr {
        Expr::App(Op::Exp, vec![self])
    }

    pub fn ln(self) -> Expr {
        Expr::App(Op::Ln, vec![self])
    }

    pub fn sqrt(self) -> Expr {
        Expr::App(Op::Sqrt, vec![self])
    }

    pub fn abs(self) -> Expr {
        Expr::App(Op::Abs, vec![self])
    }

    pub fn min(self, rhs: impl Into<Expr>) -> Expr {
        Expr::App(Op::Min, vec![self, rhs.into()])
    }

    pub fn max(self, rhs: impl Into<Expr>) -> Expr {
        Expr::App(Op::Max, vec![self, rhs.into()])
    }
}

// Distribution sugar, named after the R-style constructors users expect.

pub fn uniform(low: impl Into<Expr>, high: impl Into<Expr>) -> Expr {
    Expr::Draw(DistSpec::Uniform(Box::new(low.into()), Box::new(high.into())))
}

pub fn normal(mean: impl Into<Expr>, sd: impl Into<Expr>) -> Expr {
    Expr::Draw(DistSpec::Normal(Box::new(mean.into()), Box::new(sd.into())))
}

pub fn lognormal(mu: impl Into<Expr>, sigma: impl Into<Expr>) -> Expr {
    Expr::Draw(DistSpec::LogNormal(Box::new(mu.into()), Box::new(sigma.into())))
}

pub fn binomial(size: impl Into<Expr>, prob: impl Into<Expr>) -> Expr {
    Expr::Draw(DistSpec::Binomial(Box::new(size.into()), Box::new(prob.into())))
}

pub fn beta(alpha: impl Into<Expr>, b: impl Into<Expr>) -> Expr {
    Expr::Draw(DistSpec::Beta(Box::new(alpha.into()), Box::new(b.into())))
}

pub fn gamma(shape: impl Into<Expr>, scale: impl Into<Expr>) -> Expr {
    Expr::Draw(DistSpec::Gamma(Box::new(shape.into()), Box::new(scale.into())))
}

pub fn exponential(rate: impl Into<Expr>) -> Expr {
    Expr::Draw(DistSpec::Exponential(Box::new(rate.into())))
}

pub fn poisson(lambda: impl Into<Expr>) -> Expr {
    Expr::Draw(DistSpec::Poisson(Box::new(lambda.into())))
}

pub fn trunc_normal(
    mean: impl Into<Expr>,
    sd: impl Into<Expr>,
    low: impl Into<Expr>,
    high: impl Into<Expr>,
) -> Expr {
    Expr::Draw(DistSpec::TruncNormal(
        Box::new(mean.into()),
        Box::new(sd.into()),
        Box::new(low.into()),
        Box::new(high.into()),
    ))
}

impl From<f64> for Expr {
    fn from(x: f64) -> Expr {
        Expr::val(x)
    }
}

impl From<Vec<f64>> for Expr {
    fn from(xs: Vec<f64>) -> Expr {
        Expr::vec(xs)
    }
}

impl From<&str> for Expr {
    fn from(name: &str) -> Expr {
        Expr::var(name)
    }
}

macro_rules! binary_op {
    ($trait:ident, $method:ident, $op:expr) => {
        impl<R: Into<Expr>> std::ops::$trait<R> for Expr {
            type Output = Expr;
            fn $method(self, rhs: R) -> Expr {
                Expr::App($op, vec![self, rhs.into()])
            }
        }
    };
}

binary_op!(Add, add, Op::Add);
binary_op!(Sub, sub, Op::Sub);
binary_op!(Mul, mul, Op::Mul);
binary_op!(Div, div, Op::Div);

impl std::ops::Neg for Expr {
    type Output = Expr;
    fn neg(self) -> Expr {
        Expr::App(Op::Neg, vec![self])
    }
}

impl fmt::Debug for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Const(v) if v.len() == 1 => write!(f, "{}", v[0]),
            Expr::Const(v) => write!(f, "{v:?}"),
            Expr::Ref(name) => write!(f, "{name}"),
            Expr::App(op, args) => {
                write!(f, "({}", op.symbol())?;
                for a in args {
                    write!(f, " {a:?}")?;
                }
                write!(f, ")")
            }
            Expr::Draw(spec) => write!(f, "{spec:?}"),
            Expr::Func(_, args) => write!(f, "(user-fn {args:?})"),
        }
    }
}

impl fmt::Debug for DistSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DistSpec::Uniform(a, b) => write!(f, "(uniform {a:?} {b:?})"),
            DistSpec::Normal(a, b) => write!(f, "(normal {a:?} {b:?})"),
            DistSpec::LogNormal(a, b) => write!(f, "(lognormal {a:?} {b:?})"),
            DistSpec::Binomial(a, b) => write!(f, "(binomial {a:?} {b:?})"),
            DistSpec::Beta(a, b) => write!(f, "(beta {a:?} {b:?})"),
            DistSpec::Gamma(a, b) => write!(f, "(gamma {a:?} {b:?})"),
            DistSpec::Exponential(a) => write!(f, "(exponential {a:?})"),
            DistSpec::Poisson(a) => write!(f, "(poisson {a:?})"),
            DistSpec::TruncNormal(a, b, c, d) => {
                write!(f, "(truncnormal {a:?} {b:?} {c:?} {d:?})")
            }
        }
    }
}
