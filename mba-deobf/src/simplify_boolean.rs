//! Minimization of bitwise functions with egg.
//!
//! This is the fallback for bitwise functions that are not in the
//! [`BitwiseTable`](crate::bitwise_table::BitwiseTable), i.e. functions of
//! four to six variables. The truth table is turned into its DNF or CNF,
//! whichever has fewer clauses, and shrunk by equality saturation. The
//! result is only as small as saturation within the limits manages.

use egg::*;

use crate::bitwise_expr::BExpr;

/// Limits of the equality saturation.
///
/// A run that stops before saturation is restarted from the cheapest
/// expression found so far, up to `retry_limit` times. Runs stop early once
/// `retry_same_cost` restarts in a row did not lower the cost.
/// The runner limits are documented on [`egg::Runner`].
#[derive(Clone, Debug)]
pub struct SimplificationConfig {
    /// Default 10.
    pub retry_limit: usize,

    /// Default 3.
    pub retry_same_cost: usize,

    /// Default 10 000.
    pub node_limit: usize,

    /// Default 30.
    pub iter_limit: usize,

    /// Default 1s.
    pub time_limit: std::time::Duration,
}

impl Default for SimplificationConfig {
    fn default() -> Self {
        Self {
            retry_limit: 10,
            retry_same_cost: 3,
            node_limit: 10_000,
            iter_limit: 30,
            time_limit: std::time::Duration::from_millis(1000),
        }
    }
}

define_language! {
    /// Language for boolean expressions.
    enum BooleanLanguage {
        "0" = Zero,
        "1" = One,
        "not" = Not(Id),
        "and" = And([Id; 2]),
        "or" = Or([Id; 2]),
        "xor" = Xor([Id; 2]),
        Symbol(Symbol),
    }
}

type EggExpr = RecExpr<BooleanLanguage>;

fn root(e: &EggExpr) -> Id {
    Id::from(e.as_ref().len() - 1)
}

/// Structural equality of the two expressions below their roots.
fn same_tree(l: &EggExpr, r: &EggExpr) -> bool {
    fn go(l: &EggExpr, lid: Id, r: &EggExpr, rid: Id) -> bool {
        use BooleanLanguage::*;
        match (&l[lid], &r[rid]) {
            (Zero, Zero) | (One, One) => true,
            (Not(a), Not(b)) => go(l, *a, r, *b),
            (And([la, lb]), And([ra, rb]))
            | (Or([la, lb]), Or([ra, rb]))
            | (Xor([la, lb]), Xor([ra, rb])) => go(l, *la, r, *ra) && go(l, *lb, r, *rb),
            (Symbol(a), Symbol(b)) => a == b,
            _ => false,
        }
    }

    go(l, root(l), r, root(r))
}

lazy_static::lazy_static! {
    static ref RULES: Vec<Rewrite<BooleanLanguage, ()>> = make_rules();
}

/// A bitwise function of `nvars` variables, given by its truth table.
/// Row `i` of the table is the value where variable `j` is bit `j` of `i`.
pub fn simplify_from_truth_table<Table>(nvars: usize, table: Table, cfg: &SimplificationConfig) -> BExpr
where
    Table: Iterator<Item = bool>,
{
    let rows: Vec<bool> = table.collect();
    let ones = rows.iter().filter(|v| **v).count();

    // The CNF has a clause per zero row, the DNF one per one row.
    let dnf = ones < rows.len() - ones;
    let clauses: Vec<usize> = rows.iter()
        .enumerate()
        .filter(|(_, v)| **v == dnf)
        .map(|(i, _)| i)
        .collect();

    if nvars == 0 || clauses.is_empty() {
        return if rows.first().copied().unwrap_or(false) { BExpr::Ones } else { BExpr::zero() };
    }

    let vars: Vec<Symbol> = (0..nvars).map(|i| Symbol::from(format!("v{i}"))).collect();
    let e = normal_form(&vars, &clauses, dnf);
    egg_to_bexpr(&saturate(&e, cfg), &vars)
}

/// The DNF over the minterms or the CNF over the maxterms of `rows`.
fn normal_form(vars: &[Symbol], rows: &[usize], dnf: bool) -> EggExpr {
    // Variable `j` is node `2j`, its negation node `2j + 1`.
    let mut nodes = Vec::with_capacity(vars.len() * 2);
    for v in vars {
        nodes.push(BooleanLanguage::Symbol(*v));
        nodes.push(BooleanLanguage::Not(Id::from(nodes.len() - 1)));
    }

    let (inner, outer): (fn([Id; 2]) -> BooleanLanguage, fn([Id; 2]) -> BooleanLanguage) = if dnf {
        (BooleanLanguage::And, BooleanLanguage::Or)
    } else {
        (BooleanLanguage::Or, BooleanLanguage::And)
    };

    let mut fold = |ids: &mut dyn Iterator<Item = usize>, op: fn([Id; 2]) -> BooleanLanguage| {
        let first = ids.next().unwrap_or(0);
        ids.fold(first, |acc, id| {
            nodes.push(op([Id::from(acc), Id::from(id)]));
            nodes.len() - 1
        })
    };

    let clauses: Vec<usize> = rows.iter()
        .map(|&row| {
            // A minterm has the literal that is true in the row,
            // a maxterm the one that is false.
            let mut lits = (0..vars.len()).map(|j| {
                let bit = (row >> j) & 1;
                2 * j + if dnf { 1 - bit } else { bit }
            });
            fold(&mut lits, inner)
        })
        .collect();
    let top = fold(&mut clauses.into_iter(), outer);

    // With one variable and the clause `v0`, `not v0` has to go.
    nodes.truncate(top + 1);
    RecExpr::from(nodes)
}

/// Runs equality saturation and returns the smallest expression found.
fn saturate(e: &EggExpr, cfg: &SimplificationConfig) -> EggExpr {
    let mut best = e.clone();
    let mut best_cost = usize::MAX;
    let mut same_cost = 0;

    for round in 1.. {
        let runner = Runner::default()
            .with_iter_limit(cfg.iter_limit)
            .with_node_limit(cfg.node_limit)
            .with_time_limit(cfg.time_limit)
            .with_expr(&best)
            .run(&*RULES);

        let saturated = matches!(runner.stop_reason, Some(StopReason::Saturated));
        let (cost, found) = Extractor::new(&runner.egraph, AstSize).find_best(runner.roots[0]);
        debug_assert!(cost <= best_cost);

        if cost == best_cost {
            if same_tree(&best, &found) {
                return found;
            }
            same_cost += 1;
        } else {
            same_cost = 0;
        }

        if saturated || same_cost >= cfg.retry_same_cost || round >= cfg.retry_limit {
            log::trace!("boolean minimization stopped after {round} rounds at cost {cost}");
            return found;
        }
        best = found;
        best_cost = cost;
    }
    best
}

fn egg_to_bexpr(e: &EggExpr, vars: &[Symbol]) -> BExpr {
    fn go(e: &EggExpr, idx: Id, vars: &[Symbol]) -> BExpr {
        match &e[idx] {
            BooleanLanguage::Zero => BExpr::zero(),
            BooleanLanguage::One => BExpr::Ones,
            BooleanLanguage::Not(i) => BExpr::not(go(e, *i, vars)),
            BooleanLanguage::And([i, j]) => BExpr::and(go(e, *i, vars), go(e, *j, vars)),
            BooleanLanguage::Or([i, j]) => BExpr::or(go(e, *i, vars), go(e, *j, vars)),
            BooleanLanguage::Xor([i, j]) => BExpr::xor(go(e, *i, vars), go(e, *j, vars)),
            BooleanLanguage::Symbol(s) => {
                // Every symbol in the egraph came from `vars`.
                let i = vars.iter().position(|v| v == s).unwrap_or(0);
                BExpr::Var(i as u8)
            },
        }
    }

    go(e, root(e), vars)
}

/// Boolean algebra identities. Several are redundant.
fn make_rules() -> Vec<Rewrite<BooleanLanguage, ()>> {
    let mut rules = vec![
        rewrite!("and-0"; "(and ?x 0)" => "0"),
        rewrite!("or-1"; "(or ?x 1)" => "1"),
        rewrite!("xor-self"; "(xor ?x ?x)" => "0"),

        // Complementation
        rewrite!("and-not"; "(and ?x (not ?x))" => "0"),
        rewrite!("or-not"; "(or ?x (not ?x))" => "1"),
        rewrite!("xor-not"; "(xor ?x (not ?x))" => "1"),

        // Absorption.
        rewrite!("and-absorb"; "(and ?x (or ?x ?y))" => "?x"),
        rewrite!("or-absorb"; "(or ?x (and ?x ?y))" => "?x"),
    ];

    rules.extend(vec![
        // Associativity
        rewrite!("and-assoc"; "(and ?x (and ?y ?z))" <=> "(and (and ?x ?y) ?z)"),
        rewrite!("or-assoc"; "(or ?x (or ?y ?z))" <=> "(or (or ?x ?y) ?z)"),
        rewrite!("xor-assoc"; "(xor ?x (xor ?y ?z))" <=> "(xor (xor ?x ?y) ?z)"),

        // Commutativity
        rewrite!("and-comm"; "(and ?x ?y)" <=> "(and ?y ?x)"),
        rewrite!("or-comm"; "(or ?x ?y)" <=> "(or ?y ?x)"),
        rewrite!("xor-comm"; "(xor ?x ?y)" <=> "(xor ?y ?x)"),

        rewrite!("and-1"; "(and ?x 1)" <=> "?x"),
        rewrite!("and-idemp"; "(and ?x ?x)" <=> "?x"),

        rewrite!("or-0"; "(or ?x 0)" <=> "?x"),
        rewrite!("or-idemp"; "(or ?x ?x)" <=> "?x"),

        rewrite!("xor-0"; "(xor ?x 0)" <=> "?x"),
        rewrite!("xor-1"; "(xor ?x 1)" <=> "(not ?x)"),

        // Distributivity
        rewrite!("and-or"; "(and ?x (or ?y ?z))" <=> "(or (and ?x ?y) (and ?x ?z))"),
        rewrite!("or-and"; "(or ?x (and ?y ?z))" <=> "(and (or ?x ?y) (or ?x ?z))"),
        rewrite!("and-xor"; "(and ?x (xor ?y ?z))" <=> "(xor (and ?x ?y) (and ?x ?z))"),

        // Double negation
        rewrite!("not-not"; "(not (not ?x))" <=> "?x"),

        // De Morgan's laws
        rewrite!("not-and"; "(not (and ?x ?y))" <=> "(or (not ?x) (not ?y))"),
        rewrite!("not-or"; "(not (or ?x ?y))" <=> "(and (not ?x) (not ?y))"),
        rewrite!("not-xor"; "(not (xor ?x ?y))" <=> "(xor (not ?x) ?y)"),

        rewrite!("and-xor-1"; "(and ?x (xor ?x ?y))" <=> "(and ?x (not ?y))"),
        rewrite!("or-xor-1"; "(or ?x (xor ?x ?y))" <=> "(or ?x ?y)"),
        rewrite!("xor-and-1"; "(xor ?x (and ?x ?y))" <=> "(and ?x (not ?y))"),
        rewrite!("xor-or-1"; "(xor ?x (or ?x ?y))" <=> "(and (not ?x) ?y)"),
    ].concat());

    rules
}
