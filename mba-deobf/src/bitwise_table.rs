//! A table of the cheapest bitwise expression for every boolean function of
//! one to three variables.
//!
//! The table is built once by enumerating expressions over `& | ^ ~` in order
//! of increasing cost. Templates live in an arena and refer to their children
//! by [`TemplateId`]; structure is shared between templates, while
//! instantiation always produces a fresh owned tree.

use crate::bitwise_expr::BExpr;
use crate::expr::{Operand, Width};

/// Largest number of variables in the table.
pub const MAX_TABLE_VARS: usize = 3;

/// Index of a template in the [`BitwiseTable`] arena.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct TemplateId(u32);

/// A node of a template. Variables are placeholders by index.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum TemplateNode {
    Zero,
    Ones,
    Var(u8),
    Not(TemplateId),
    And(TemplateId, TemplateId),
    Or(TemplateId, TemplateId),
    Xor(TemplateId, TemplateId),
}

#[derive(Clone, Copy, Debug)]
struct Entry {
    id: TemplateId,
    cost: usize,
}

/// The lookup table, indexed by `(number of variables, truth table)`.
#[derive(Debug)]
pub struct BitwiseTable {
    nodes: Vec<TemplateNode>,

    /// `entries[n - 1][t]` is the cheapest template with `n` variables
    /// and the truth table `t`.
    entries: Vec<Vec<Option<Entry>>>,
}

impl Default for BitwiseTable {
    fn default() -> Self {
        Self::new()
    }
}

impl BitwiseTable {
    /// Builds the table. This takes a moment, so it should be done once
    /// and the table passed to whoever needs it.
    pub fn new() -> Self {
        let mut table = Self { nodes: Vec::new(), entries: Vec::new() };
        for n in 1..=MAX_TABLE_VARS {
            let entries = table.enumerate(n);
            table.entries.push(entries);
        }
        log::debug!("built the bitwise table with {} template nodes", table.nodes.len());
        table
    }

    fn push(&mut self, node: TemplateNode) -> TemplateId {
        self.nodes.push(node);
        TemplateId(self.nodes.len() as u32 - 1)
    }

    /// Enumerates expressions of `n` variables by cost until every
    /// boolean function has been found.
    fn enumerate(&mut self, n: usize) -> Vec<Option<Entry>> {
        let rows = 1usize << n;
        let size = 1usize << rows;
        let mask = (1u64 << rows) - 1;

        let mut entries: Vec<Option<Entry>> = vec![None; size];
        // by_cost[c] lists the truth tables whose cheapest expression costs c.
        let mut by_cost: Vec<Vec<u64>> = vec![Vec::new()];

        let mut leaves = vec![(0, TemplateNode::Zero), (mask, TemplateNode::Ones)];
        for j in 0..n {
            let t = (0..rows).filter(|i| (i >> j) & 1 == 1).fold(0u64, |acc, i| acc | 1 << i);
            leaves.push((t, TemplateNode::Var(j as u8)));
        }
        for (t, node) in leaves {
            let id = self.push(node);
            entries[t as usize] = Some(Entry { id, cost: 0 });
            by_cost[0].push(t);
        }

        let mut cost = 0;
        while entries.iter().any(Option::is_none) {
            cost += 1;
            let mut level = Vec::new();

            // Negations of the previous level.
            for &t in &by_cost[cost - 1] {
                let nt = !t & mask;
                if entries[nt as usize].is_none() {
                    let Some(e) = entries[t as usize] else { continue };
                    let id = self.push(TemplateNode::Not(e.id));
                    entries[nt as usize] = Some(Entry { id, cost });
                    level.push(nt);
                }
            }

            // Binary operations whose operand costs add up to `cost - 1`.
            for lc in 0..cost {
                let rc = cost - 1 - lc;
                if rc < lc {
                    break;
                }

                for &l in &by_cost[lc] {
                    for &r in &by_cost[rc] {
                        let (Some(le), Some(re)) = (entries[l as usize], entries[r as usize]) else {
                            continue;
                        };

                        let ops = [
                            (l & r, TemplateNode::And(le.id, re.id)),
                            (l | r, TemplateNode::Or(le.id, re.id)),
                            (l ^ r, TemplateNode::Xor(le.id, re.id)),
                        ];
                        for (t, node) in ops {
                            if entries[t as usize].is_none() {
                                let id = self.push(node);
                                entries[t as usize] = Some(Entry { id, cost });
                                level.push(t);
                            }
                        }
                    }
                }
            }

            by_cost.push(level);
        }

        entries
    }

    /// The cheapest template for the function of `nvars` variables with the
    /// given truth table. Only functions that are zero on the all-zero input
    /// are looked up, everything else returns `None`.
    pub fn lookup(&self, nvars: usize, truth_table: u64) -> Option<TemplateId> {
        if truth_table & 1 != 0 || nvars == 0 || nvars > MAX_TABLE_VARS {
            return None;
        }
        self.entries[nvars - 1]
            .get(truth_table as usize)
            .copied()
            .flatten()
            .map(|e| e.id)
    }

    /// The number of operations in the template returned by [`Self::lookup`].
    pub fn cost(&self, nvars: usize, truth_table: u64) -> Option<usize> {
        self.entries.get(nvars.checked_sub(1)?)?
            .get(truth_table as usize)
            .copied()
            .flatten()
            .map(|e| e.cost)
    }

    pub fn node(&self, id: TemplateId) -> TemplateNode {
        self.nodes[id.0 as usize]
    }

    /// Number of operations in the template.
    pub fn complexity(&self, id: TemplateId) -> usize {
        match self.node(id) {
            TemplateNode::Zero | TemplateNode::Ones | TemplateNode::Var(_) => 0,
            TemplateNode::Not(i) => 1 + self.complexity(i),
            TemplateNode::And(l, r) | TemplateNode::Or(l, r) | TemplateNode::Xor(l, r) => {
                1 + self.complexity(l) + self.complexity(r)
            },
        }
    }

    /// Builds a fresh expression from the template, where placeholder `i`
    /// is `vars[i]` resized to `width`.
    /// Returns `None` if the template uses more variables than given.
    pub fn instantiate(&self, id: TemplateId, vars: &[Operand], width: Width) -> Option<Operand> {
        Some(match self.node(id) {
            TemplateNode::Zero => Operand::zero(width),
            TemplateNode::Ones => Operand::ones(width),
            TemplateNode::Var(i) => vars.get(i as usize)?.clone().resize(width, false),
            TemplateNode::Not(i) => !self.instantiate(i, vars, width)?,
            TemplateNode::And(l, r) => {
                self.instantiate(l, vars, width)? & self.instantiate(r, vars, width)?
            },
            TemplateNode::Or(l, r) => {
                self.instantiate(l, vars, width)? | self.instantiate(r, vars, width)?
            },
            TemplateNode::Xor(l, r) => {
                self.instantiate(l, vars, width)? ^ self.instantiate(r, vars, width)?
            },
        })
    }

    /// The template as a [`BExpr`].
    pub fn to_bexpr(&self, id: TemplateId) -> BExpr {
        match self.node(id) {
            TemplateNode::Zero => BExpr::zero(),
            TemplateNode::Ones => BExpr::Ones,
            TemplateNode::Var(i) => BExpr::Var(i),
            TemplateNode::Not(i) => BExpr::not(self.to_bexpr(i)),
            TemplateNode::And(l, r) => BExpr::and(self.to_bexpr(l), self.to_bexpr(r)),
            TemplateNode::Or(l, r) => BExpr::or(self.to_bexpr(l), self.to_bexpr(r)),
            TemplateNode::Xor(l, r) => BExpr::xor(self.to_bexpr(l), self.to_bexpr(r)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::LazyLock;

    static TABLE: LazyLock<BitwiseTable> = LazyLock::new(BitwiseTable::new);

    #[test]
    fn every_function_is_present_and_correct() {
        for n in 1..=MAX_TABLE_VARS {
            let rows = 1 << n;
            for t in (0..1u64 << rows).filter(|t| t & 1 == 0) {
                let id = TABLE.lookup(n, t).unwrap();
                let e = TABLE.to_bexpr(id);
                assert_eq!(e.truth_table(n), t, "{e}");
                assert_eq!(TABLE.cost(n, t), Some(TABLE.complexity(id)));
                if t != 0 {
                    assert_eq!(TABLE.complexity(id), e.complexity());
                }
            }
        }
    }

    #[test]
    fn templates_are_minimal() {
        let cost = |s: &str, n| {
            let e = BExpr::from_string(s.to_owned()).unwrap();
            TABLE.cost(n, e.truth_table(n)).unwrap()
        };
        assert_eq!(cost("a", 2), 0);
        assert_eq!(cost("a ^ b", 2), 1);
        assert_eq!(cost("a & ~b", 2), 2);
        assert_eq!(cost("a | b | c", 3), 2);
        assert_eq!(cost("a & b ^ c", 3), 2);
    }

    #[test]
    fn lookup_rejects_non_zero_preserving_functions() {
        assert!(TABLE.lookup(2, 0b0001).is_none());
        assert!(TABLE.lookup(4, 0b0010).is_none());
        assert!(TABLE.lookup(0, 0).is_none());
        assert!(TABLE.lookup(1, 0).is_some());
    }

    #[test]
    fn instantiation() {
        let a = BExpr::from_string("a & ~b".to_owned()).unwrap();
        let id = TABLE.lookup(2, a.truth_table(2)).unwrap();
        let x = Operand::reg("x", Width::B4);
        let y = Operand::reg("y", Width::B4);
        let o = TABLE.instantiate(id, &[x, y], Width::B4).unwrap();
        assert_eq!(o.complexity(), 2);
        assert_eq!(o.width(), Width::B4);
        assert!(TABLE.instantiate(id, &[], Width::B4).is_none());
    }
}
