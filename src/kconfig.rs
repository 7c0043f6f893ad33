//! Builds the propositional feature model out of a parsed RSF dump.
//!
//! Boolean and tristate items become variables; a tristate `X` is split into
//! the pair `CONFIG_X` / `CONFIG_X_MODULE` which can never both hold. Choice
//! groups carry an exclusivity clause over their alternatives. Dependency
//! expressions are rewritten from bare Kconfig names into `CONFIG_`-prefixed
//! symbols, expanding `=y`/`=m`/`=n` comparisons on the way.

use std::collections::VecDeque;
use std::io::{self, Write};
use std::sync::OnceLock;

use indexmap::IndexMap;

use crate::rsf::RsfDocument;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemKind {
    Invalid,
    Boolean,
    Tristate,
    Choice,
}

#[derive(Debug, Clone)]
pub struct Item {
    pub name: String,
    pub kind: ItemKind,
    /// Only meaningful for choice groups.
    pub required: bool,
    tristate: bool,
    /// Presence-condition conjuncts, most recently added first.
    pub dependencies: VecDeque<String>,
    /// Alternative names of a choice group, in appearance order.
    pub choice_alternatives: Vec<String>,
}

impl Item {
    fn new(name: String, kind: ItemKind) -> Self {
        let tristate = kind == ItemKind::Tristate;
        Self {
            name,
            kind,
            required: false,
            tristate,
            dependencies: VecDeque::new(),
            choice_alternatives: Vec::new(),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.kind != ItemKind::Invalid
    }

    pub fn is_tristate(&self) -> bool {
        self.tristate
    }

    pub fn is_choice(&self) -> bool {
        self.kind == ItemKind::Choice
    }

    /// The exclusivity clause over this choice's alternatives: exactly one
    /// alternative is on, or (for tristate choices) none, provided modules
    /// are enabled when the choice is required.
    pub fn dump_choice_alternative(&self) -> String {
        if !self.is_choice() || self.choice_alternatives.is_empty() {
            return String::new();
        }

        let mut or_clause: Vec<String> = Vec::new();
        for on in 0..self.choice_alternatives.len() {
            let and_clause: Vec<String> = self
                .choice_alternatives
                .iter()
                .enumerate()
                .map(|(i, name)| {
                    if i == on {
                        name.clone()
                    } else {
                        format!("!{}", name)
                    }
                })
                .collect();
            or_clause.push(format!("({})", and_clause.join(" && ")));
        }

        if self.is_tristate() {
            let mut last_clause: Vec<String> = Vec::new();
            // an optional choice may be all-off even without modules
            if self.required {
                last_clause.push("CONFIG_MODULES".to_string());
            }
            for name in &self.choice_alternatives {
                last_clause.push(format!("!{}", name));
            }
            or_clause.push(format!("({})", last_clause.join(" && ")));
        }

        format!("({})", or_clause.join(" || "))
    }
}

/// The item database plus the set of unconditionally enabled features.
#[derive(Debug, Default)]
pub struct KconfigDb {
    items: IndexMap<String, Item>,
    always_on: Vec<String>,
}

impl KconfigDb {
    /// Populate the database from the raw relations.
    pub fn from_rsf(doc: &RsfDocument) -> Self {
        let mut db = KconfigDb::default();
        db.seed_items(doc);
        db.seed_choices(doc);
        db.seed_choice_alternatives(doc);
        db.apply_dependencies(doc);
        db.apply_defaults(doc);
        db
    }

    pub fn lookup(&self, name: &str) -> Option<&Item> {
        self.items.get(name)
    }

    /// Like [`lookup`](Self::lookup), but absent keys read as an invalid
    /// sentinel item.
    pub fn get_item(&self, name: &str) -> &Item {
        static INVALID: OnceLock<Item> = OnceLock::new();
        self.items
            .get(name)
            .unwrap_or_else(|| INVALID.get_or_init(|| Item::new(String::new(), ItemKind::Invalid)))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.items.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Item> {
        self.items.values()
    }

    /// Names that are forced on by an unconditional visible default.
    pub fn always_on(&self) -> &[String] {
        &self.always_on
    }

    // -- build passes -------------------------------------------------------

    fn seed_items(&mut self, doc: &RsfDocument) {
        for row in doc.relation("Item").iter() {
            let kind = row.values.first().map(String::as_str).unwrap_or("");
            if kind != "boolean" && kind != "tristate" {
                continue;
            }
            let item_name = format!("CONFIG_{}", row.key);

            if kind == "tristate" {
                let module_name = format!("CONFIG_{}_MODULE", row.key);
                let mut item = Item::new(item_name.clone(), ItemKind::Tristate);
                item.dependencies.push_front(format!("!{}", module_name));

                let mut module = Item::new(module_name.clone(), ItemKind::Boolean);
                // every _MODULE depends on the magic MODULES flag
                module.dependencies.push_front("CONFIG_MODULES".to_string());
                module.dependencies.push_front(format!("!{}", item_name));

                self.items.insert(item_name, item);
                self.items.insert(module_name, module);
            } else {
                self.items
                    .insert(item_name.clone(), Item::new(item_name, ItemKind::Boolean));
            }
        }
    }

    fn seed_choices(&mut self, doc: &RsfDocument) {
        for row in doc.relation("Choice").iter() {
            let required = row.values.first().map(String::as_str) == Some("required");
            let tristate = row.values.get(1).map(String::as_str) == Some("tristate");
            let name = format!("CONFIG_{}", row.key);
            let mut choice = Item::new(name.clone(), ItemKind::Choice);
            choice.required = required;
            choice.tristate = tristate;
            self.items.insert(name, choice);
        }
    }

    fn seed_choice_alternatives(&mut self, doc: &RsfDocument) {
        for row in doc.relation("ChoiceItem").iter() {
            let choice_name = format!(
                "CONFIG_{}",
                row.values.first().map(String::as_str).unwrap_or("")
            );
            let member_name = format!("CONFIG_{}", row.key);

            self.items
                .entry(member_name.clone())
                .or_insert_with(|| Item::new(member_name.clone(), ItemKind::Boolean));

            let choice = self
                .items
                .get_mut(&choice_name)
                .unwrap_or_else(|| panic!("choice item {} references unknown {}", row.key, choice_name));
            choice.choice_alternatives.push(member_name);
        }
    }

    fn apply_dependencies(&mut self, doc: &RsfDocument) {
        for row in doc.relation("Depends").iter() {
            let name = format!("CONFIG_{}", row.key);
            let Some(item) = self.items.get(&name) else {
                // dependencies of string/int/hex items never enter the model
                log::debug!("skipping dependency of non-propositional item {}", row.key);
                continue;
            };
            let tristate_item = item.is_tristate() && !item.is_choice();

            let expression = row.values.join(" ");
            let rewritten = format!("({})", self.rewrite_expression_prefix(&expression));

            if let Some(item) = self.items.get_mut(&name) {
                item.dependencies.push_front(rewritten.clone());
            }
            if tristate_item {
                let module_name = format!("CONFIG_{}_MODULE", row.key);
                let module = self
                    .items
                    .get_mut(&module_name)
                    .unwrap_or_else(|| panic!("tristate {} lacks its module companion", name));
                module.dependencies.push_front(rewritten);
            }
        }
    }

    fn apply_defaults(&mut self, doc: &RsfDocument) {
        for row in doc.relation("Default").iter() {
            let name = format!("CONFIG_{}", row.key);
            let Some(item) = self.items.get(&name) else {
                continue;
            };
            if item.is_tristate() || item.is_choice() {
                continue;
            }
            // a prompt makes the default overridable, nothing to assert then
            let prompts = doc
                .relation("HasPrompts")
                .values_for(&row.key)
                .and_then(|v| v.first().cloned())
                .unwrap_or_default();
            if !prompts.is_empty() && prompts != "0" {
                continue;
            }

            let expr = row.values.first().map(String::as_str).unwrap_or("");
            let visible = row.values.get(1).map(String::as_str).unwrap_or("");

            if expr == "y" && visible == "y" {
                self.always_on.push(name);
            } else if expr == "y" || visible == "y" {
                let condition = if expr == "y" { visible } else { expr };
                let rewritten = format!("({})", self.rewrite_expression_prefix(condition));
                if let Some(item) = self.items.get_mut(&name) {
                    item.dependencies.push_front(rewritten);
                }
            }
        }
    }

    // -- expression rewriting -----------------------------------------------

    /// Rewrite a raw Kconfig expression over bare item names into one over
    /// `CONFIG_` symbols, expanding tristate comparisons per the value being
    /// compared against. Already-prefixed tokens are left alone, which makes
    /// the rewrite idempotent.
    pub fn rewrite_expression_prefix(&self, expression: &str) -> String {
        let mut exp = expression.to_string();

        'outer: loop {
            let mut pos = 0usize;
            while pos < exp.len() {
                let Some((start, end)) = next_token(&exp, pos) else {
                    break;
                };
                pos = end;
                let token = &exp[start..end];

                if token.starts_with("CONFIG_") || is_value_token(token) {
                    continue;
                }
                // right-hand side of a comparison the left token consumed
                if start > 0 && exp.as_bytes()[start - 1] == b'=' {
                    continue;
                }

                if let Some((replacement, consumed)) = self.rewrite_token(&exp, start, end) {
                    exp.replace_range(start..start + consumed, &replacement);
                    continue 'outer;
                }
            }
            break;
        }
        exp
    }

    /// Decide the replacement for an eligible token; returns the new text
    /// and how many bytes of the original it consumes.
    fn rewrite_token(&self, exp: &str, start: usize, end: usize) -> Option<(String, usize)> {
        let token = &exp[start..end];
        let item = self.get_item(&format!("CONFIG_{}", token));
        let tristate = item.is_valid() && item.is_tristate() && !item.is_choice();

        let after = &exp[end..];
        let token_len = end - start;

        for (suffix, template) in [
            ("!=n", "(CONFIG_%1_MODULE || CONFIG_%1)"),
            ("!=y", "!CONFIG_%1"),
            ("!=m", "!CONFIG_%1_MODULE"),
            ("=n", "(!CONFIG_%1_MODULE && !CONFIG_%1)"),
            ("=y", "CONFIG_%1"),
            ("=m", "CONFIG_%1_MODULE"),
        ] {
            if has_suffix_value(after, suffix) {
                return Some((template.replace("%1", token), token_len + suffix.len()));
            }
        }

        // symbol-to-symbol comparison: X=Y or X!=Y
        for (op, template) in [
            (
                "=",
                "((CONFIG_%1 && CONFIG_%2) || \
                 (CONFIG_%1_MODULE && CONFIG_%2_MODULE) || \
                 (!CONFIG_%1 && !CONFIG_%2 && !CONFIG_%1_MODULE && !CONFIG_%2_MODULE))",
            ),
            (
                "!=",
                "((CONFIG_%1 && !CONFIG_%2) || \
                 (CONFIG_%1_MODULE && !CONFIG_%2_MODULE) || \
                 (!CONFIG_%1 && CONFIG_%2 && !CONFIG_%1_MODULE && CONFIG_%2_MODULE))",
            ),
        ] {
            if let Some(rest) = after.strip_prefix(op) {
                if let Some((rhs_start, rhs_end)) = next_token(rest, 0) {
                    let rhs = &rest[rhs_start..rhs_end];
                    if rhs_start == 0 && !is_value_token(rhs) {
                        let consumed = token_len + op.len() + rhs.len();
                        let replacement = template.replace("%1", token).replace("%2", rhs);
                        return Some((replacement, consumed));
                    }
                }
            }
        }

        if tristate {
            // a bare tristate name means "y or m"
            return Some((
                format!("(CONFIG_{0}_MODULE || CONFIG_{0})", token),
                token_len,
            ));
        }
        Some((format!("CONFIG_{}", token), token_len))
    }

    // -- emission -----------------------------------------------------------

    /// Write the model in its textual form, one item per line, sorted by
    /// name.
    pub fn dump(&self, out: &mut impl Write) -> io::Result<()> {
        writeln!(out, "I: Items-Count: {}", self.items.len())?;
        writeln!(out, "I: Format: <variable> [presence condition]")?;

        if !self.always_on.is_empty() {
            let quoted: Vec<String> = self
                .always_on
                .iter()
                .map(|name| format!("\"{}\"", name))
                .collect();
            writeln!(out, "ALWAYS_ON {}", quoted.join(" "))?;
        }

        let mut names: Vec<&String> = self.items.keys().collect();
        names.sort();

        for name in names {
            let item = &self.items[name.as_str()];
            write!(out, "{}", item.name)?;
            let deps: Vec<&String> = item.dependencies.iter().collect();
            if !deps.is_empty() {
                write!(
                    out,
                    " \"{}",
                    deps.iter().map(|s| s.as_str()).collect::<Vec<_>>().join(" && ")
                )?;
                if item.is_choice() {
                    let ca = item.dump_choice_alternative();
                    if !ca.is_empty() {
                        write!(out, " && {}", ca)?;
                    }
                }
                write!(out, "\"")?;
            } else if item.is_choice() && !item.choice_alternatives.is_empty() {
                write!(out, " \"{}\"", item.dump_choice_alternative())?;
            }
            writeln!(out)?;
        }
        Ok(())
    }
}

/// Delimiters of the rewriting token scan.
fn is_delimiter(b: u8) -> bool {
    matches!(b, b'(' | b')' | b' ' | b'!' | b'=' | b'<' | b'>' | b'&' | b'|')
}

/// Next maximal delimiter-free run at or after `from`.
fn next_token(exp: &str, from: usize) -> Option<(usize, usize)> {
    let bytes = exp.as_bytes();
    let mut start = from;
    while start < bytes.len() && is_delimiter(bytes[start]) {
        start += 1;
    }
    if start >= bytes.len() {
        return None;
    }
    let mut end = start;
    while end < bytes.len() && !is_delimiter(bytes[end]) {
        end += 1;
    }
    Some((start, end))
}

/// Tristate value literals and numbers never name an item.
fn is_value_token(token: &str) -> bool {
    matches!(token, "y" | "m" | "n") || token.bytes().all(|b| b.is_ascii_digit())
}

/// True when `after` starts with the given comparison-to-value suffix,
/// followed by a delimiter or the end of the string.
fn has_suffix_value(after: &str, suffix: &str) -> bool {
    match after.strip_prefix(suffix) {
        Some(rest) => rest.is_empty() || is_delimiter(rest.as_bytes()[0]),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn db_from(rsf: &str) -> KconfigDb {
        KconfigDb::from_rsf(&RsfDocument::parse_str(rsf))
    }

    #[test]
    fn tristate_items_get_module_companions() {
        let db = db_from("Item FOO tristate\n");
        let foo = db.lookup("CONFIG_FOO").expect("item");
        let module = db.lookup("CONFIG_FOO_MODULE").expect("module companion");

        assert_eq!(foo.kind, ItemKind::Tristate);
        assert_eq!(module.kind, ItemKind::Boolean);
        assert_eq!(foo.dependencies, ["!CONFIG_FOO_MODULE"]);
        assert_eq!(module.dependencies, ["!CONFIG_FOO", "CONFIG_MODULES"]);
    }

    #[test]
    fn absent_lookups_read_as_an_invalid_sentinel() {
        let db = db_from("Item FOO boolean\n");
        let ghost = db.get_item("CONFIG_GHOST");
        assert!(!ghost.is_valid());
        assert_eq!(ghost.kind, ItemKind::Invalid);
        assert!(db.get_item("CONFIG_FOO").is_valid());
    }

    #[test]
    fn non_propositional_items_are_skipped() {
        let db = db_from("Item A integer\nItem B hex\nItem C string\nItem D boolean\n");
        assert_eq!(db.len(), 1);
        assert!(db.contains("CONFIG_D"));
    }

    #[test]
    fn dependencies_are_prepended() {
        let db = db_from("Item FOO boolean\nDepends FOO \"A\"\nDepends FOO \"B\"\n");
        let foo = db.lookup("CONFIG_FOO").unwrap();
        assert_eq!(foo.dependencies, ["(CONFIG_B)", "(CONFIG_A)"]);
    }

    #[test]
    fn tristate_dependencies_reach_the_module_item() {
        let db = db_from("Item FOO tristate\nDepends FOO \"BAR\"\n");
        let foo = db.lookup("CONFIG_FOO").unwrap();
        let module = db.lookup("CONFIG_FOO_MODULE").unwrap();
        assert_eq!(foo.dependencies.front().unwrap(), "(CONFIG_BAR)");
        assert_eq!(module.dependencies.front().unwrap(), "(CONFIG_BAR)");
    }

    #[test]
    fn rewrite_expands_tristate_value_comparisons() {
        let db = db_from("Item FOO tristate\n");
        assert_eq!(db.rewrite_expression_prefix("FOO=m"), "CONFIG_FOO_MODULE");
        assert_eq!(db.rewrite_expression_prefix("FOO=y"), "CONFIG_FOO");
        assert_eq!(
            db.rewrite_expression_prefix("FOO=n"),
            "(!CONFIG_FOO_MODULE && !CONFIG_FOO)"
        );
        assert_eq!(
            db.rewrite_expression_prefix("FOO!=n"),
            "(CONFIG_FOO_MODULE || CONFIG_FOO)"
        );
        assert_eq!(db.rewrite_expression_prefix("FOO!=y"), "!CONFIG_FOO");
        assert_eq!(db.rewrite_expression_prefix("FOO!=m"), "!CONFIG_FOO_MODULE");
    }

    #[test]
    fn bare_tristate_means_y_or_m() {
        let db = db_from("Item FOO tristate\nItem BAR boolean\n");
        assert_eq!(
            db.rewrite_expression_prefix("FOO && BAR"),
            "(CONFIG_FOO_MODULE || CONFIG_FOO) && CONFIG_BAR"
        );
    }

    #[test]
    fn symbol_equality_expands_nine_ways() {
        let db = db_from("Item A tristate\nItem B tristate\n");
        assert_eq!(
            db.rewrite_expression_prefix("A=B"),
            "((CONFIG_A && CONFIG_B) || (CONFIG_A_MODULE && CONFIG_B_MODULE) || \
             (!CONFIG_A && !CONFIG_B && !CONFIG_A_MODULE && !CONFIG_B_MODULE))"
        );
    }

    #[test]
    fn symbol_inequality_expands_too() {
        let db = db_from("Item A tristate\nItem B tristate\n");
        assert_eq!(
            db.rewrite_expression_prefix("A!=B"),
            "((CONFIG_A && !CONFIG_B) || (CONFIG_A_MODULE && !CONFIG_B_MODULE) || \
             (!CONFIG_A && CONFIG_B && !CONFIG_A_MODULE && CONFIG_B_MODULE))"
        );
    }

    #[test]
    fn rewrite_is_a_no_op_on_rewritten_strings() {
        let db = db_from("Item FOO tristate\nItem BAR boolean\n");
        let once = db.rewrite_expression_prefix("!FOO || (BAR && FOO=y)");
        let twice = db.rewrite_expression_prefix(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn value_literals_are_not_items() {
        let db = db_from("Item FOO boolean\n");
        assert_eq!(db.rewrite_expression_prefix("FOO && y"), "CONFIG_FOO && y");
        assert_eq!(db.rewrite_expression_prefix("FOO=2"), "CONFIG_FOO=2");
    }

    #[test]
    fn choice_exclusivity_boolean() {
        let db = db_from(
            "Choice CH required boolean\n\
             ChoiceItem A CH\n\
             ChoiceItem B CH\n\
             ChoiceItem C CH\n",
        );
        let choice = db.lookup("CONFIG_CH").unwrap();
        assert_eq!(
            choice.dump_choice_alternative(),
            "((CONFIG_A && !CONFIG_B && !CONFIG_C) || \
             (!CONFIG_A && CONFIG_B && !CONFIG_C) || \
             (!CONFIG_A && !CONFIG_B && CONFIG_C))"
        );
    }

    #[test]
    fn tristate_choice_allows_all_off_with_modules() {
        let db = db_from(
            "Choice CH required tristate\n\
             ChoiceItem A CH\n\
             ChoiceItem B CH\n",
        );
        let choice = db.lookup("CONFIG_CH").unwrap();
        assert_eq!(
            choice.dump_choice_alternative(),
            "((CONFIG_A && !CONFIG_B) || (!CONFIG_A && CONFIG_B) || \
             (CONFIG_MODULES && !CONFIG_A && !CONFIG_B))"
        );
    }

    #[test]
    fn optional_tristate_choice_drops_the_modules_guard() {
        let db = db_from(
            "Choice CH optional tristate\n\
             ChoiceItem A CH\n",
        );
        let choice = db.lookup("CONFIG_CH").unwrap();
        assert_eq!(
            choice.dump_choice_alternative(),
            "((CONFIG_A) || (!CONFIG_A))"
        );
    }

    #[test]
    fn unconditional_default_promotes_to_always_on() {
        let db = db_from("Item X boolean\nDefault X \"y\" \"y\"\nHasPrompts X 0\n");
        assert_eq!(db.always_on(), ["CONFIG_X"]);
    }

    #[test]
    fn prompted_defaults_are_ignored() {
        let db = db_from("Item X boolean\nDefault X \"y\" \"y\"\nHasPrompts X 2\n");
        assert!(db.always_on().is_empty());
    }

    #[test]
    fn half_conditional_default_becomes_a_dependency() {
        let db = db_from("Item X boolean\nItem G boolean\nDefault X \"y\" \"G\"\nHasPrompts X 0\n");
        assert!(db.always_on().is_empty());
        let x = db.lookup("CONFIG_X").unwrap();
        assert_eq!(x.dependencies, ["(CONFIG_G)"]);
    }

    #[test]
    fn dump_lists_counts_always_on_and_conditions() {
        let db = db_from(
            "Item X boolean\n\
             Item T tristate\n\
             Default X \"y\" \"y\"\n\
             HasPrompts X 0\n",
        );
        let mut out = Vec::new();
        db.dump(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();

        let mut lines = text.lines();
        assert_eq!(lines.next(), Some("I: Items-Count: 3"));
        assert_eq!(lines.next(), Some("I: Format: <variable> [presence condition]"));
        assert_eq!(lines.next(), Some("ALWAYS_ON \"CONFIG_X\""));
        assert_eq!(lines.next(), Some("CONFIG_T \"!CONFIG_T_MODULE\""));
        assert_eq!(
            lines.next(),
            Some("CONFIG_T_MODULE \"!CONFIG_T && CONFIG_MODULES\"")
        );
        assert_eq!(lines.next(), Some("CONFIG_X"));
    }
}
