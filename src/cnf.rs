//! Tseitin conversion of [`BoolExpr`] trees into integer CNF, plus the
//! `SatChecker` facade the analyzers talk to.
//!
//! The facade follows incremental-solver conventions: pushed clauses are
//! permanent, pushed assumptions only hold for the next satisfiability
//! check and are consumed by it.

use std::collections::HashMap;

use thiserror::Error;

use crate::expr::{self, BoolExpr, ExprRef, ParseError};
use crate::sat::{Solver, SolverLimit};

#[derive(Debug, Error)]
pub enum SatCheckerError {
    #[error("formula parse error: {0}")]
    Parse(#[from] ParseError),
    #[error("sat back-end gave up: {0}")]
    Limit(#[from] SolverLimit),
}

/// How constants `0`/`1` enter the CNF.
///
/// `Reduce` folds them away during conversion. `Free` turns them into
/// unconstrained variables, which is what partial-assumption computations
/// want.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConstPolicy {
    #[default]
    Reduce,
    Free,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lit {
    True,
    False,
    Var(i32),
}

impl Lit {
    fn negate(self) -> Lit {
        match self {
            Lit::True => Lit::False,
            Lit::False => Lit::True,
            Lit::Var(v) => Lit::Var(-v),
        }
    }
}

/// Converts expressions to CNF over an integer variable space with a
/// persistent name-to-variable table.
pub struct CnfBuilder {
    const_policy: ConstPolicy,
    vars: HashMap<String, i32>,
    /// Structural memo for gate outputs; the printed form doubles as the
    /// opacity key for comparison subterms.
    gates: HashMap<String, i32>,
    num_vars: i32,
    clauses: Vec<Vec<i32>>,
    forced_unsat: bool,
}

impl CnfBuilder {
    pub fn new(const_policy: ConstPolicy) -> Self {
        Self {
            const_policy,
            vars: HashMap::new(),
            gates: HashMap::new(),
            num_vars: 0,
            clauses: Vec::new(),
            forced_unsat: false,
        }
    }

    fn fresh_var(&mut self) -> i32 {
        self.num_vars += 1;
        self.num_vars
    }

    pub fn var_for(&mut self, name: &str) -> i32 {
        if let Some(&v) = self.vars.get(name) {
            return v;
        }
        let v = self.fresh_var();
        self.vars.insert(name.to_string(), v);
        v
    }

    pub fn lookup_var(&self, name: &str) -> Option<i32> {
        self.vars.get(name).copied()
    }

    /// Assert the expression as a top-level conjunct.
    pub fn push_clause(&mut self, e: &ExprRef) {
        match self.lit_for(e) {
            Lit::True => {}
            Lit::False => self.forced_unsat = true,
            Lit::Var(v) => self.clauses.push(vec![v]),
        }
    }

    /// Add raw clauses from a precompiled CNF, translating its variable
    /// space through the given `name -> foreign id` symbol table.
    pub fn attach_clauses<'a>(
        &mut self,
        clauses: &[Vec<i32>],
        symbols: impl IntoIterator<Item = (&'a str, i32)>,
    ) {
        let mut translation: HashMap<i32, i32> = HashMap::new();
        for (name, foreign) in symbols {
            let local = self.var_for(name);
            translation.insert(foreign, local);
        }
        for clause in clauses {
            let translated = clause
                .iter()
                .map(|&lit| {
                    let var = lit.unsigned_abs() as i32;
                    let local = *translation
                        .entry(var)
                        .or_insert_with(|| {
                            self.num_vars += 1;
                            self.num_vars
                        });
                    if lit > 0 { local } else { -local }
                })
                .collect();
            self.clauses.push(translated);
        }
    }

    fn gate_var(&mut self, key: String) -> (i32, bool) {
        if let Some(&v) = self.gates.get(&key) {
            return (v, false);
        }
        let v = self.fresh_var();
        self.gates.insert(key, v);
        (v, true)
    }

    fn lit_for(&mut self, e: &BoolExpr) -> Lit {
        match e {
            BoolExpr::Const(b) => match self.const_policy {
                ConstPolicy::Reduce => {
                    if *b {
                        Lit::True
                    } else {
                        Lit::False
                    }
                }
                ConstPolicy::Free => {
                    let (v, _) = self.gate_var(e.to_string());
                    Lit::Var(v)
                }
            },
            BoolExpr::Symbol(name) => Lit::Var(self.var_for(name)),
            BoolExpr::Not(inner) => self.lit_for(inner).negate(),
            BoolExpr::And(a, b) => {
                let la = self.lit_for(a);
                let lb = self.lit_for(b);
                self.and_gate(e, la, lb)
            }
            BoolExpr::Or(a, b) => {
                let la = self.lit_for(a);
                let lb = self.lit_for(b);
                self.or_gate(e, la, lb)
            }
            BoolExpr::Implies(a, b) => {
                let la = self.lit_for(a).negate();
                let lb = self.lit_for(b);
                self.or_gate(e, la, lb)
            }
            BoolExpr::Iff(a, b) => {
                let la = self.lit_for(a);
                let lb = self.lit_for(b);
                self.iff_gate(e, la, lb)
            }
            // Comparisons are opaque tokens: one free variable per
            // structurally distinct comparison.
            BoolExpr::Cmp(..) => {
                let (v, _) = self.gate_var(e.to_string());
                Lit::Var(v)
            }
        }
    }

    fn and_gate(&mut self, e: &BoolExpr, a: Lit, b: Lit) -> Lit {
        match (a, b) {
            (Lit::False, _) | (_, Lit::False) => Lit::False,
            (Lit::True, other) | (other, Lit::True) => other,
            (Lit::Var(a), Lit::Var(b)) => {
                let (v, new) = self.gate_var(e.to_string());
                if new {
                    self.clauses.push(vec![-v, a]);
                    self.clauses.push(vec![-v, b]);
                    self.clauses.push(vec![v, -a, -b]);
                }
                Lit::Var(v)
            }
        }
    }

    fn or_gate(&mut self, e: &BoolExpr, a: Lit, b: Lit) -> Lit {
        match (a, b) {
            (Lit::True, _) | (_, Lit::True) => Lit::True,
            (Lit::False, other) | (other, Lit::False) => other,
            (Lit::Var(a), Lit::Var(b)) => {
                let (v, new) = self.gate_var(e.to_string());
                if new {
                    self.clauses.push(vec![v, -a]);
                    self.clauses.push(vec![v, -b]);
                    self.clauses.push(vec![-v, a, b]);
                }
                Lit::Var(v)
            }
        }
    }

    fn iff_gate(&mut self, e: &BoolExpr, a: Lit, b: Lit) -> Lit {
        match (a, b) {
            (Lit::True, other) | (other, Lit::True) => other,
            (Lit::False, other) | (other, Lit::False) => other.negate(),
            (Lit::Var(a), Lit::Var(b)) => {
                let (v, new) = self.gate_var(e.to_string());
                if new {
                    self.clauses.push(vec![-v, -a, b]);
                    self.clauses.push(vec![-v, a, -b]);
                    self.clauses.push(vec![v, a, b]);
                    self.clauses.push(vec![v, -a, -b]);
                }
                Lit::Var(v)
            }
        }
    }
}

/// The solver-facing facade used by the defect analyzer and the tests.
pub struct SatChecker {
    builder: CnfBuilder,
    assumptions: Vec<(String, bool)>,
    last_model: Option<Vec<bool>>,
}

impl SatChecker {
    pub fn new() -> Self {
        Self::with_policy(ConstPolicy::Reduce)
    }

    pub fn with_policy(policy: ConstPolicy) -> Self {
        Self {
            builder: CnfBuilder::new(policy),
            assumptions: Vec::new(),
            last_model: None,
        }
    }

    /// Parse a formula string and assert it.
    pub fn from_formula(formula: &str) -> Result<Self, SatCheckerError> {
        let mut checker = Self::new();
        checker.push_formula(formula)?;
        Ok(checker)
    }

    pub fn push_clause(&mut self, e: &ExprRef) {
        self.builder.push_clause(e);
    }

    pub fn push_formula(&mut self, formula: &str) -> Result<(), SatCheckerError> {
        let e = expr::parse_string(formula)?;
        self.builder.push_clause(&e);
        Ok(())
    }

    /// Assume a named variable for the next satisfiability check only.
    pub fn push_assumption(&mut self, name: &str, polarity: bool) {
        self.assumptions.push((name.to_string(), polarity));
    }

    /// Splice the clauses of a precompiled model CNF into this checker.
    pub fn attach_clauses<'a>(
        &mut self,
        clauses: &[Vec<i32>],
        symbols: impl IntoIterator<Item = (&'a str, i32)>,
    ) {
        self.builder.attach_clauses(clauses, symbols);
    }

    /// Run the solver over everything pushed so far plus the pending
    /// assumptions. Assumptions are consumed, whatever the outcome.
    pub fn check_satisfiable(&mut self) -> Result<bool, SatCheckerError> {
        let assumptions = std::mem::take(&mut self.assumptions);
        if self.builder.forced_unsat {
            self.last_model = None;
            return Ok(false);
        }
        let lits: Vec<i32> = assumptions
            .iter()
            .map(|(name, polarity)| {
                let v = self.builder.var_for(name);
                if *polarity { v } else { -v }
            })
            .collect();
        let solver = Solver::new(self.builder.num_vars as usize, self.builder.clauses.clone());
        match solver.solve(&lits)? {
            Some(model) => {
                self.last_model = Some(model);
                Ok(true)
            }
            None => {
                self.last_model = None;
                Ok(false)
            }
        }
    }

    /// Value of a named variable in the model of the last satisfiable check.
    pub fn model(&self, name: &str) -> Option<bool> {
        let var = self.builder.lookup_var(name)?;
        self.last_model
            .as_ref()
            .and_then(|m| m.get(var as usize).copied())
    }
}

impl Default for SatChecker {
    fn default() -> Self {
        Self::new()
    }
}
