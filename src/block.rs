//! The conditional-block tree of one source file and its propositional
//! encoding.
//!
//! Blocks live in an arena owned by the [`CppFile`]; `parent` and
//! `prev_sibling` are index handles, so sibling chains need no back-owning
//! references. Every block gets a stable name (`B0`, `B1`, ...); `B00` is
//! reserved for the synthetic top block representing the file itself.

use std::cell::RefCell;
use std::collections::BTreeSet;

use indexmap::IndexMap;
use regex::Regex;

pub type BlockId = usize;

/// Name of the file-level root block; unconditionally true.
pub const ROOT_NAME: &str = "B00";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    /// `#if` / `#ifdef`, opens a sibling chain.
    If,
    /// `#ifndef`; also opens a chain, the expression reads negated.
    Ifndef,
    Elif,
    Else,
}

#[derive(Debug)]
pub struct ConditionalBlock {
    pub name: String,
    pub kind: BlockKind,
    /// Normalized condition: `defined` stripped, `#ifndef` negated, defines
    /// rewritten to their mangled names. Empty for `#else` and the root.
    pub expression: String,
    pub parent: Option<BlockId>,
    pub prev_sibling: Option<BlockId>,
    pub line_start: u32,
    pub line_end: u32,
    pub col_start: u32,
    pub col_end: u32,
    pub children: Vec<BlockId>,
    /// Synthetic `#else` inserted by the decision-coverage transform.
    pub dummy: bool,
}

impl ConditionalBlock {
    pub fn is_if_block(&self) -> bool {
        matches!(self.kind, BlockKind::If | BlockKind::Ifndef)
    }

    pub fn is_else_block(&self) -> bool {
        self.kind == BlockKind::Else
    }
}

/// Symbolic effect of one `#define` / `#undef` history of an identifier.
///
/// Every (re)definition mangles the current symbol by appending a `.`;
/// expressions seen later use the mangled name, and two clauses per
/// definition tie the old and new names to the defining block.
#[derive(Debug)]
pub struct CppDefine {
    pub defined_symbol: String,
    pub actual_symbol: String,
    pub defined_in: Vec<BlockId>,
    /// Names of the blocks where the occurrence was an `#undef`.
    pub is_undef: BTreeSet<String>,
    pub define_expressions: Vec<String>,
    replace_regex: Regex,
}

impl CppDefine {
    fn new(id: &str) -> Self {
        let symbol_space = r"([()><&|! -]|^|$)";
        let pattern = format!("{0}({1}){0}", symbol_space, regex::escape(id));
        Self {
            defined_symbol: id.to_string(),
            actual_symbol: id.to_string(),
            defined_in: Vec::new(),
            is_undef: BTreeSet::new(),
            define_expressions: Vec::new(),
            replace_regex: Regex::new(&pattern).expect("define regex compiles"),
        }
    }

    fn new_define(&mut self, block: BlockId, block_name: &str, define: bool) {
        let new_symbol = format!("{}.", self.actual_symbol);

        self.defined_in.push(block);
        if !define {
            self.is_undef.insert(block_name.to_string());
        }

        // block selected -> the new flag is set (or cleared for #undef)
        let right_side = if define {
            new_symbol.clone()
        } else {
            format!("!{}", new_symbol)
        };
        self.define_expressions
            .push(format!("({} -> {})", block_name, right_side));
        // block not selected -> old and new name agree
        self.define_expressions.push(format!(
            "(!{} -> ({} <-> {}))",
            block_name, self.actual_symbol, new_symbol
        ));

        self.actual_symbol = new_symbol;
    }

    /// Replace word-bounded uses of the original identifier with the current
    /// mangled name.
    pub fn replace_defined_symbol(&self, expression: &mut String) {
        if !expression.contains(&self.defined_symbol) {
            return;
        }
        loop {
            let Some(caps) = self.replace_regex.captures(expression) else {
                return;
            };
            let range = caps.get(2).expect("symbol group").range();
            expression.replace_range(range, &self.actual_symbol);
        }
    }

    pub fn contains_defined_symbol(&self, expression: &str) -> bool {
        expression.contains(&self.defined_symbol) && self.replace_regex.is_match(expression)
    }
}

/// A parsed source file: the block arena, document order, and the define
/// table.
pub struct CppFile {
    filename: String,
    blocks: Vec<ConditionalBlock>,
    /// Non-root blocks in document order (flattened DFS).
    order: Vec<BlockId>,
    defines: IndexMap<String, CppDefine>,
    /// Bridge `B00` to the per-file variable; enabled once models are
    /// loaded.
    file_var_enabled: bool,
    next_name: usize,
    cached_constraints: RefCell<Option<String>>,
}

impl CppFile {
    pub fn new(filename: &str) -> Self {
        let filename = filename.strip_prefix("./").unwrap_or(filename);
        let root = ConditionalBlock {
            name: ROOT_NAME.to_string(),
            kind: BlockKind::If,
            expression: String::new(),
            parent: None,
            prev_sibling: None,
            line_start: 0,
            line_end: 0,
            col_start: 0,
            col_end: 0,
            children: Vec::new(),
            dummy: false,
        };
        Self {
            filename: filename.to_string(),
            blocks: vec![root],
            order: Vec::new(),
            defines: IndexMap::new(),
            file_var_enabled: false,
            next_name: 0,
            cached_constraints: RefCell::new(None),
        }
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn root(&self) -> BlockId {
        0
    }

    pub fn block(&self, id: BlockId) -> &ConditionalBlock {
        &self.blocks[id]
    }

    pub fn block_mut(&mut self, id: BlockId) -> &mut ConditionalBlock {
        &mut self.blocks[id]
    }

    /// Non-root blocks in document order.
    pub fn blocks(&self) -> impl Iterator<Item = BlockId> + '_ {
        self.order.iter().copied()
    }

    pub fn block_count(&self) -> usize {
        self.order.len()
    }

    pub fn defines(&self) -> &IndexMap<String, CppDefine> {
        &self.defines
    }

    pub fn set_file_var_enabled(&mut self, enabled: bool) {
        self.file_var_enabled = enabled;
        self.invalidate();
    }

    /// Predicate rejecting internal CPP artifacts: any token whose leading
    /// segment (up to the first `.`) names a defined symbol never refers to
    /// a Kconfig feature.
    pub fn item_checker(&self) -> impl Fn(&str) -> bool + '_ {
        move |item: &str| {
            let prefix = item.split('.').next().unwrap_or(item);
            !self.defines.contains_key(prefix)
        }
    }

    /// Append a block; the caller supplies tree position, the file assigns
    /// the name and normalizes the expression against current defines.
    pub fn add_block(
        &mut self,
        kind: BlockKind,
        parent: BlockId,
        prev_sibling: Option<BlockId>,
        raw_expression: &str,
        line_start: u32,
        col_start: u32,
    ) -> BlockId {
        let expression = self.normalize_expression(kind, raw_expression);
        let id = self.blocks.len();
        let name = format!("B{}", self.next_name);
        self.next_name += 1;
        self.blocks.push(ConditionalBlock {
            name,
            kind,
            expression,
            parent: Some(parent),
            prev_sibling,
            line_start,
            line_end: line_start,
            col_start,
            col_end: 0,
            children: Vec::new(),
            dummy: false,
        });
        self.blocks[parent].children.push(id);
        self.order.push(id);
        self.invalidate();
        id
    }

    fn normalize_expression(&self, kind: BlockKind, raw: &str) -> String {
        if kind == BlockKind::Else {
            return String::new();
        }
        let mut exp = raw.trim().to_string();
        if kind == BlockKind::Ifndef {
            exp = format!("! {}", exp);
        }
        while let Some(pos) = exp.find("defined") {
            exp.replace_range(pos..pos + 7, "");
        }
        for define in self.defines.values() {
            define.replace_defined_symbol(&mut exp);
        }
        exp
    }

    pub fn close_block(&mut self, id: BlockId, line_end: u32, col_end: u32) {
        let block = &mut self.blocks[id];
        block.line_end = line_end;
        block.col_end = col_end;
    }

    /// Record a `#define`/`#undef` of `identifier` inside `block`.
    pub fn add_define(&mut self, identifier: &str, define: bool, block: BlockId) {
        let block_name = self.blocks[block].name.clone();
        let entry = self
            .defines
            .entry(identifier.to_string())
            .or_insert_with(|| CppDefine::new(identifier));
        entry.new_define(block, &block_name, define);
        self.invalidate();
    }

    /// Smallest block strictly enclosing the given line.
    pub fn block_at_line(&self, line: u32) -> Option<BlockId> {
        let mut found: Option<BlockId> = None;
        let mut found_length = u32::MAX;
        for &id in &self.order {
            let block = &self.blocks[id];
            if block.line_end < block.line_start {
                continue;
            }
            let length = block.line_end - block.line_start;
            if block.line_start < line && line < block.line_end && length < found_length {
                found = Some(id);
                found_length = length;
            }
        }
        found
    }

    // -- constraint emission ------------------------------------------------

    /// The `( name <-> parent && expression && !(siblings) )` clause of one
    /// block.
    fn local_clause(&self, id: BlockId) -> String {
        let block = &self.blocks[id];
        let mut inner: Vec<String> = Vec::new();

        if let Some(parent) = block.parent {
            if parent != self.root() {
                inner.push(self.blocks[parent].name.clone());
            }
        }
        if !block.expression.is_empty() {
            inner.push(block.expression.clone());
        }

        let mut predecessors: Vec<String> = Vec::new();
        let mut walk = id;
        while !self.blocks[walk].is_if_block() {
            let prev = self.blocks[walk]
                .prev_sibling
                .expect("non-opening block has a predecessor");
            predecessors.push(self.blocks[prev].name.clone());
            walk = prev;
        }
        if !predecessors.is_empty() {
            inner.push(format!("( ! ({}) )", predecessors.join(" || ")));
        }

        format!("( {} <-> {} )", block.name, inner.join(" && "))
    }

    /// The full code-constraints formula: every block's local clause in
    /// document order, every define's clauses, the root assertion, and the
    /// file-variable bridge once a model is loaded. Memoized until the tree
    /// mutates.
    pub fn code_constraints(&self) -> String {
        if let Some(cached) = self.cached_constraints.borrow().as_ref() {
            return cached.clone();
        }

        let mut clauses: Vec<String> = Vec::new();
        for &id in &self.order {
            clauses.push(self.local_clause(id));
        }
        for define in self.defines.values() {
            clauses.extend(define.define_expressions.iter().cloned());
        }
        clauses.push(ROOT_NAME.to_string());
        if self.file_var_enabled {
            clauses.push(format!(
                "( {} <-> FILE_{} )",
                ROOT_NAME,
                normalize_filename(&self.filename)
            ));
        }

        let formula = clauses.join("\n&& ");
        *self.cached_constraints.borrow_mut() = Some(formula.clone());
        formula
    }

    /// Drop memoized formulas; must be called by anything mutating the tree.
    pub fn invalidate(&self) {
        self.cached_constraints.borrow_mut().take();
    }

    // -- decision coverage --------------------------------------------------

    /// Complete every `#if`/`#elif` chain with a synthetic `#else` block, so
    /// that a configuration exists in which no branch of the chain is
    /// selected only where the source allows it.
    pub fn decision_coverage(&mut self) {
        self.complete_chains(self.root());
        self.invalidate();
    }

    fn complete_chains(&mut self, parent: BlockId) {
        let mut i = 0;
        while i < self.blocks[parent].children.len() {
            let current = self.blocks[parent].children[i];
            if i > 0 {
                let prev = self.blocks[parent].children[i - 1];
                if self.blocks[current].is_if_block() && !self.blocks[prev].is_else_block() {
                    let dummy = self.new_dummy_else(parent, prev);
                    self.blocks[parent].children.insert(i, dummy);
                    let pos = self
                        .order
                        .iter()
                        .position(|&b| b == current)
                        .expect("block is in document order");
                    self.order.insert(pos, dummy);
                    i += 1;
                }
            }
            self.complete_chains(current);
            i += 1;
        }

        if let Some(&last) = self.blocks[parent].children.last() {
            if !self.blocks[last].is_else_block() {
                let dummy = self.new_dummy_else(parent, last);
                self.blocks[parent].children.push(dummy);
                let pos = self.subtree_end(last);
                self.order.insert(pos, dummy);
            }
        }
    }

    fn new_dummy_else(&mut self, parent: BlockId, prev: BlockId) -> BlockId {
        let line = self.blocks[prev].line_end;
        let id = self.blocks.len();
        let name = format!("B{}", self.next_name);
        self.next_name += 1;
        self.blocks.push(ConditionalBlock {
            name,
            kind: BlockKind::Else,
            expression: String::new(),
            parent: Some(parent),
            prev_sibling: Some(prev),
            line_start: line,
            line_end: line,
            col_start: 0,
            col_end: 0,
            children: Vec::new(),
            dummy: true,
        });
        id
    }

    /// Position in `order` just past `block` and all of its descendants.
    fn subtree_end(&self, block: BlockId) -> usize {
        let mut end = self
            .order
            .iter()
            .position(|&b| b == block)
            .expect("block is in document order")
            + 1;
        let mut last = block;
        loop {
            let Some(&tail) = self.blocks[last].children.last() else {
                break;
            };
            last = tail;
        }
        if last != block {
            end = self
                .order
                .iter()
                .position(|&b| b == last)
                .expect("descendant is in document order")
                + 1;
        }
        end
    }
}

/// Path separators and version punctuation collapse to `_` in the per-file
/// variable.
pub fn normalize_filename(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '/' | '-' | '+' | ':' => '_',
            other => other,
        })
        .collect()
}
