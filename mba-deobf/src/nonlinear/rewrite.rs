//! The tree stages of the normal form pipeline: preprocessing,
//! normalization of boolean operations, distribution and flattening.
//!
//! Every stage takes ownership of a tree and returns a new one. All
//! rewrites are identities modulo `2^64`, so they are also identities
//! modulo `2^w` for every width.

use crate::expr::{Expr, Opcode, Operand, Width};

use super::NonlinearError;

/// Upper bound on the rewrites of the normalization and distribution stages.
pub const MAX_REWRITES: usize = 4096;

/// Upper bound on the size of a tree between stages.
pub const MAX_NODES: usize = 4096;

/// A working copy of an expression at a single width. Everything that is
/// not one of these operations at that width is an opaque [`Node::Leaf`].
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Node {
    Const(u64),
    Leaf(Operand),
    Neg(Box<Node>),
    Not(Box<Node>),
    Add(Box<Node>, Box<Node>),
    Sub(Box<Node>, Box<Node>),
    Mul(Box<Node>, Box<Node>),
    And(Box<Node>, Box<Node>),
    Or(Box<Node>, Box<Node>),
    Xor(Box<Node>, Box<Node>),
}

fn b(n: Node) -> Box<Node> {
    Box::new(n)
}

impl Node {
    pub fn from_expr(e: &Expr) -> Self {
        Self::from_operand(&Operand::from(e.clone()), e.width)
    }

    pub fn from_operand(o: &Operand, w: Width) -> Self {
        let e = match o {
            Operand::Const { value, width } if *width == w => return Node::Const(*value),
            Operand::Nested(e) if e.width == w => e,
            _ => return Node::Leaf(o.clone()),
        };

        let same = |o: &Operand| o.width() == w;
        let l = || Self::from_operand(&e.l, w);
        match (e.op, &e.r) {
            (Opcode::Mov, None) if same(&e.l) => l(),
            (Opcode::Neg, None) if same(&e.l) => Node::Neg(b(l())),
            (Opcode::BNot, None) if same(&e.l) => Node::Not(b(l())),
            (op, Some(r)) if same(&e.l) && same(r) => {
                let r = b(Self::from_operand(r, w));
                match op {
                    Opcode::Add => Node::Add(b(l()), r),
                    Opcode::Sub => Node::Sub(b(l()), r),
                    Opcode::Mul => Node::Mul(b(l()), r),
                    Opcode::And => Node::And(b(l()), r),
                    Opcode::Or => Node::Or(b(l()), r),
                    Opcode::Xor => Node::Xor(b(l()), r),
                    _ => Node::Leaf(o.clone()),
                }
            },
            _ => Node::Leaf(o.clone()),
        }
    }

    pub fn to_operand(&self, w: Width) -> Operand {
        match self {
            Node::Const(c) => Operand::constant(*c, w),
            Node::Leaf(o) => o.clone(),
            Node::Neg(a) => -a.to_operand(w),
            Node::Not(a) => !a.to_operand(w),
            Node::Add(l, r) => l.to_operand(w) + r.to_operand(w),
            Node::Sub(l, r) => l.to_operand(w) - r.to_operand(w),
            Node::Mul(l, r) => l.to_operand(w) * r.to_operand(w),
            Node::And(l, r) => l.to_operand(w) & r.to_operand(w),
            Node::Or(l, r) => l.to_operand(w) | r.to_operand(w),
            Node::Xor(l, r) => l.to_operand(w) ^ r.to_operand(w),
        }
    }

    /// Number of nodes in the tree.
    pub fn size(&self) -> usize {
        match self {
            Node::Const(_) | Node::Leaf(_) => 1,
            Node::Neg(a) | Node::Not(a) => 1 + a.size(),
            Node::Add(l, r) | Node::Sub(l, r) | Node::Mul(l, r)
            | Node::And(l, r) | Node::Or(l, r) | Node::Xor(l, r) => 1 + l.size() + r.size(),
        }
    }

    /// Collects the distinct leaves in the order they first appear.
    pub fn leaves(&self, out: &mut Vec<Operand>) {
        match self {
            Node::Const(_) => {},
            Node::Leaf(o) => {
                if !out.contains(o) {
                    out.push(o.clone());
                }
            },
            Node::Neg(a) | Node::Not(a) => a.leaves(out),
            Node::Add(l, r) | Node::Sub(l, r) | Node::Mul(l, r)
            | Node::And(l, r) | Node::Or(l, r) | Node::Xor(l, r) => {
                l.leaves(out);
                r.leaves(out);
            },
        }
    }

    fn is_add_sub(&self) -> bool {
        matches!(self, Node::Add(..) | Node::Sub(..))
    }

    /// Rebuilds the node with `f` applied to every direct child.
    fn try_map_children<F>(self, f: &mut F) -> Result<Node, NonlinearError>
    where
        F: FnMut(Node) -> Result<Node, NonlinearError>,
    {
        Ok(match self {
            Node::Const(_) | Node::Leaf(_) => self,
            Node::Neg(a) => Node::Neg(b(f(*a)?)),
            Node::Not(a) => Node::Not(b(f(*a)?)),
            Node::Add(l, r) => Node::Add(b(f(*l)?), b(f(*r)?)),
            Node::Sub(l, r) => Node::Sub(b(f(*l)?), b(f(*r)?)),
            Node::Mul(l, r) => Node::Mul(b(f(*l)?), b(f(*r)?)),
            Node::And(l, r) => Node::And(b(f(*l)?), b(f(*r)?)),
            Node::Or(l, r) => Node::Or(b(f(*l)?), b(f(*r)?)),
            Node::Xor(l, r) => Node::Xor(b(f(*l)?), b(f(*r)?)),
        })
    }
}

/// Rewrites `x - 1` directly below an `and` into `~(-x)`.
pub fn preprocess(n: Node) -> Node {
    fn minus_one(n: Node) -> Node {
        match n {
            Node::Sub(x, one) if *one == Node::Const(1) => Node::Not(b(Node::Neg(x))),
            n => n,
        }
    }

    match n {
        Node::And(l, r) => Node::And(b(minus_one(preprocess(*l))), b(minus_one(preprocess(*r)))),
        Node::Const(_) | Node::Leaf(_) => n,
        Node::Neg(a) => Node::Neg(b(preprocess(*a))),
        Node::Not(a) => Node::Not(b(preprocess(*a))),
        Node::Add(l, r) => Node::Add(b(preprocess(*l)), b(preprocess(*r))),
        Node::Sub(l, r) => Node::Sub(b(preprocess(*l)), b(preprocess(*r))),
        Node::Mul(l, r) => Node::Mul(b(preprocess(*l)), b(preprocess(*r))),
        Node::Or(l, r) => Node::Or(b(preprocess(*l)), b(preprocess(*r))),
        Node::Xor(l, r) => Node::Xor(b(preprocess(*l)), b(preprocess(*r))),
    }
}

fn and(x: &Node, y: &Node) -> Box<Node> {
    b(Node::And(b(x.clone()), b(y.clone())))
}

fn one() -> Box<Node> {
    b(Node::Const(1))
}

fn two() -> Box<Node> {
    b(Node::Const(2))
}

/// Applies the first matching rule at the root. The order of the rules
/// matters. The flag tells whether a rule was applied.
fn apply_rule(n: Node) -> (Node, bool) {
    use Node::*;

    let n = match n {
        And(l, r) => match (*l, *r) {
            // 1. ~x & y = y - (x & y)
            (Not(x), y) => Sub(b(y.clone()), and(&x, &y)),

            // 2. x & ~y: swap, then rule 1.
            (x, Not(y)) => Sub(b(x.clone()), and(&y, &x)),

            (x, y) => return (And(b(x), b(y)), false),
        },

        Or(l, r) => match (*l, *r) {
            // 3. ~x | y = -x + (x & y) - 1
            (Not(x), y) => Sub(b(Add(b(Neg(x.clone())), and(&x, &y))), one()),

            // 4. x | ~y: swap, then rule 3.
            (x, Not(y)) => Sub(b(Add(b(Neg(y.clone())), and(&y, &x))), one()),

            // 9. x | y = x + y - (x & y)
            (x, y) => Sub(b(Add(b(x.clone()), b(y.clone()))), and(&x, &y)),
        },

        Not(inner) => match *inner {
            // 5. ~(x | y) = -x - y + (x & y) - 1
            Or(x, y) => Sub(b(Add(b(Sub(b(Neg(x.clone())), y.clone())), and(&x, &y))), one()),

            // 6. ~(x ^ y) = -x - y + 2 * (x & y) - 1
            Xor(x, y) => Sub(
                b(Add(b(Sub(b(Neg(x.clone())), y.clone())), b(Mul(two(), and(&x, &y))))),
                one(),
            ),

            // 7. ~(x & y) = -(x & y) - 1
            And(x, y) => Sub(b(Neg(b(And(x, y)))), one()),

            // 10. ~x = -x - 1
            x => Sub(b(Neg(b(x))), one()),
        },

        // 8. x ^ y = x + y - 2 * (x & y)
        Xor(x, y) => Sub(b(Add(x.clone(), y.clone())), b(Mul(two(), and(&x, &y)))),

        n => return (n, false),
    };

    (n, true)
}

/// Rewrites all `| ^ ~` into arithmetic and `&`, top down.
pub fn normalize(n: Node, rewrites: &mut usize) -> Result<Node, NonlinearError> {
    let (n, applied) = apply_rule(n);
    if applied {
        *rewrites += 1;
        if *rewrites > MAX_REWRITES {
            return Err(NonlinearError::TooLarge);
        }
    }

    n.try_map_children(&mut |c| normalize(c, rewrites))
}

/// Negates `n`, pushing the negation into sums.
fn neg(n: Node) -> Node {
    match n {
        Node::Add(p, q) => Node::Add(b(neg(*p)), b(neg(*q))),
        Node::Sub(p, q) => Node::Add(b(neg(*p)), q),
        Node::Neg(p) => *p,
        Node::Const(c) => Node::Const(c.wrapping_neg()),
        n => Node::Neg(b(n)),
    }
}

fn mul(l: Node, r: Node, rewrites: &mut usize) -> Result<Node, NonlinearError> {
    *rewrites += 1;
    if *rewrites > MAX_REWRITES {
        return Err(NonlinearError::TooLarge);
    }

    Ok(match (l, r) {
        (Node::Add(p, q), c) => Node::Add(b(mul(*p, c.clone(), rewrites)?), b(mul(*q, c, rewrites)?)),
        (Node::Sub(p, q), c) => Node::Sub(b(mul(*p, c.clone(), rewrites)?), b(mul(*q, c, rewrites)?)),
        (c, Node::Add(p, q)) => Node::Add(b(mul(c.clone(), *p, rewrites)?), b(mul(c, *q, rewrites)?)),
        (c, Node::Sub(p, q)) => Node::Sub(b(mul(c.clone(), *p, rewrites)?), b(mul(c, *q, rewrites)?)),
        (Node::Neg(p), c) => neg(mul(*p, c, rewrites)?),
        (c, Node::Neg(p)) => neg(mul(c, *p, rewrites)?),
        (Node::Const(x), Node::Const(y)) => Node::Const(x.wrapping_mul(y)),
        (l, r) => Node::Mul(b(l), b(r)),
    })
}

/// Applies `(a ± b) * c = a * c ± b * c` until no product contains a sum.
/// Operands of `&` are left alone.
pub fn distribute(n: Node, rewrites: &mut usize) -> Result<Node, NonlinearError> {
    match n {
        Node::Mul(l, r) => {
            let l = distribute(*l, rewrites)?;
            let r = distribute(*r, rewrites)?;
            mul(l, r, rewrites)
        },
        Node::Neg(a) => Ok(neg(distribute(*a, rewrites)?)),
        Node::And(..) | Node::Const(_) | Node::Leaf(_) => Ok(n),
        n => n.try_map_children(&mut |c| distribute(c, rewrites)),
    }
}

/// Rotates `a ± (b ± c)` into `(a ± b) ± c` so that the sum becomes a
/// chain that leans to the left.
pub fn flatten(n: Node) -> Node {
    let mut n = n;
    loop {
        n = match n {
            Node::Add(a, r) => match *r {
                Node::Add(x, c) => Node::Add(b(Node::Add(a, x)), c),
                Node::Sub(x, c) => Node::Sub(b(Node::Add(a, x)), c),
                r => return Node::Add(b(flatten(*a)), b(r)),
            },
            Node::Sub(a, r) => match *r {
                Node::Add(x, c) => Node::Sub(b(Node::Sub(a, x)), c),
                Node::Sub(x, c) => Node::Add(b(Node::Sub(a, x)), c),
                r => return Node::Sub(b(flatten(*a)), b(r)),
            },
            n => return n,
        };
    }
}

/// Is `n` a chain `((t_1 ± t_2) ± t_3) ...` whose right operands are not sums?
pub fn is_flat(n: &Node) -> bool {
    match n {
        Node::Add(l, r) | Node::Sub(l, r) => !r.is_add_sub() && is_flat(l),
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(s: &str) -> Node {
        Node::Leaf(Operand::reg(s, Width::B8))
    }

    fn node(s: &str) -> Node {
        Node::from_expr(&Expr::from_string(s, Width::B8).unwrap())
    }

    #[test]
    fn minus_one_below_and() {
        let n = preprocess(node("(x - 1) & y"));
        let expected = Node::And(b(Node::Not(b(Node::Neg(b(leaf("x")))))), b(leaf("y")));
        assert_eq!(n, expected);

        let n = normalize(n, &mut 0).unwrap();
        let expected = Node::Sub(
            b(leaf("y")),
            b(Node::And(b(Node::Neg(b(leaf("x")))), b(leaf("y")))),
        );
        assert_eq!(n, expected);
    }

    #[test]
    fn no_boolean_operations_but_and_remain() {
        fn has_bool(n: &Node) -> bool {
            match n {
                Node::Not(_) | Node::Or(..) | Node::Xor(..) => true,
                Node::Const(_) | Node::Leaf(_) => false,
                Node::Neg(a) => has_bool(a),
                Node::Add(l, r) | Node::Sub(l, r) | Node::Mul(l, r) | Node::And(l, r) => {
                    has_bool(l) || has_bool(r)
                },
            }
        }

        for s in ["~(x | y) ^ (x & ~y)", "~x | (y ^ ~z)", "~~x", "~(x ^ y) * (x | ~y)"] {
            let n = normalize(preprocess(node(s)), &mut 0).unwrap();
            assert!(!has_bool(&n), "{s}");
        }
    }

    #[test]
    fn distribution_and_flattening() {
        let n = distribute(node("(x + y) * (z - 2) - -(x * 3)"), &mut 0).unwrap();
        let n = flatten(n);
        assert!(is_flat(&n));

        let n = flatten(node("a - (b - (c + d))"));
        assert!(is_flat(&n));
        assert_eq!(n.to_operand(Width::B8).to_string(), "a - b + c + d");
    }

    #[test]
    fn opaque_leaves() {
        let x = Operand::reg("x", Width::B4);
        let e = (x.clone().resize(Width::B8, false) + Operand::reg("y", Width::B8)).into_expr();
        let n = Node::from_expr(&e);
        assert_eq!(n, Node::Add(b(Node::Leaf(x.resize(Width::B8, false))), b(leaf("y"))));
    }

    #[test]
    fn budget_is_enforced() {
        let s = (0..14).map(|i| format!("(a{i} + b{i})")).collect::<Vec<_>>().join(" * ");
        assert_eq!(distribute(node(&s), &mut 0), Err(NonlinearError::TooLarge));
    }
}
