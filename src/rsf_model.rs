//! RSF-backed configuration model: wraps the item database and answers
//! queries by rewriting at query time.
//!
//! `intersect` contributes the transitive presence-condition slice: every
//! reachable item's dependencies become an implication, so only the part of
//! the model a formula actually touches reaches the solver.

use std::collections::{BTreeSet, VecDeque};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use regex::Regex;

use crate::expr;
use crate::kconfig::{Item, ItemKind, KconfigDb};
use crate::model::{
    classify_symbols, model_marker, ConfigurationModel, ModelError, SymbolChecker, SymbolType,
    DEFAULT_SPACE_REGEX,
};
use crate::rsf::RsfDocument;

pub struct RsfModel {
    name: String,
    db: KconfigDb,
    space_regex: Regex,
    type_regex: Regex,
    whitelist: Vec<String>,
    blacklist: Vec<String>,
    incomplete: bool,
}

impl RsfModel {
    pub fn new(name: impl Into<String>, db: KconfigDb) -> Self {
        let incomplete = db.is_empty();
        Self {
            name: name.into(),
            db,
            space_regex: Regex::new(DEFAULT_SPACE_REGEX).expect("default space regex compiles"),
            type_regex: Regex::new(r"^(CONFIG_)?([0-9A-Za-z_]+?)(_MODULE)?$")
                .expect("type regex compiles"),
            whitelist: Vec::new(),
            blacklist: Vec::new(),
            incomplete,
        }
    }

    /// Load an RSF dump and build its model; the architecture name is the
    /// file stem.
    pub fn from_file(path: &Path) -> Result<Self, ModelError> {
        let name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("unknown")
            .to_string();
        let reader = BufReader::new(File::open(path)?);
        let doc = RsfDocument::parse(reader)?;
        let db = KconfigDb::from_rsf(&doc);
        log::info!("loaded rsf model for {} ({} items)", name, db.len());
        Ok(Self::new(name, db))
    }

    pub fn db(&self) -> &KconfigDb {
        &self.db
    }

    /// Presence condition of one item: dependencies, plus the exclusivity
    /// clause for choices.
    fn presence_condition(item: &Item) -> String {
        let mut condition = item
            .dependencies
            .iter()
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(" && ");
        if item.is_choice() {
            let ca = item.dump_choice_alternative();
            if !ca.is_empty() {
                if condition.is_empty() {
                    condition = ca;
                } else {
                    condition = format!("{} && {}", condition, ca);
                }
            }
        }
        condition
    }

    /// Implications of every model item transitively reachable from the
    /// start symbols.
    fn slice_formula(&self, start: &BTreeSet<String>, parts: &mut Vec<String>) {
        let mut work: VecDeque<String> = start
            .iter()
            .filter(|s| self.db.contains(s))
            .cloned()
            .collect();
        let mut sliced: BTreeSet<String> = BTreeSet::new();

        while let Some(name) = work.pop_front() {
            if !sliced.insert(name.clone()) {
                continue;
            }
            let Some(item) = self.db.lookup(&name) else {
                continue;
            };

            let condition = Self::presence_condition(item);
            if !condition.is_empty() {
                parts.push(format!("({} -> ({}))", name, condition));
            }

            for dep in &item.dependencies {
                for symbol in expr::symbols_of_string(dep).unwrap_or_default() {
                    if self.db.contains(&symbol) {
                        work.push_back(symbol);
                    }
                }
            }
            for alternative in &item.choice_alternatives {
                if self.db.contains(alternative) {
                    work.push_back(alternative.clone());
                }
            }
        }
    }
}

impl ConfigurationModel for RsfModel {
    fn name(&self) -> &str {
        &self.name
    }

    fn contains_symbol(&self, symbol: &str) -> bool {
        symbol.starts_with("FILE_") || self.db.contains(symbol)
    }

    fn in_configuration_space(&self, symbol: &str) -> bool {
        self.space_regex.is_match(symbol)
    }

    fn is_complete(&self) -> bool {
        !self.incomplete
    }

    fn get_type(&self, feature: &str) -> SymbolType {
        let Some(caps) = self.type_regex.captures(feature) else {
            return SymbolType::Missing;
        };
        let item = format!("CONFIG_{}", &caps[2]);
        match self.db.lookup(&item).map(|i| i.kind) {
            Some(ItemKind::Tristate) => SymbolType::Tristate,
            Some(ItemKind::Boolean) | Some(ItemKind::Choice) => SymbolType::Boolean,
            _ => SymbolType::Missing,
        }
    }

    fn intersect(
        &self,
        symbols: &BTreeSet<String>,
        checker: Option<SymbolChecker<'_>>,
        missing: &mut BTreeSet<String>,
        formula: &mut String,
    ) -> usize {
        let mut parts = Vec::new();
        let valid_items = classify_symbols(self, symbols, checker, missing, &mut parts);
        self.slice_formula(symbols, &mut parts);

        // always-on promotions hold unconditionally
        for name in self.db.always_on() {
            if symbols.contains(name) {
                parts.push(name.clone());
            }
        }

        parts.push(model_marker(&self.name));
        *formula = parts.join("\n&& ");
        log::debug!(
            "out of {} items {} are missing according to {}",
            symbols.len(),
            missing.len(),
            self.name
        );
        valid_items
    }

    fn whitelist(&self) -> &[String] {
        &self.whitelist
    }

    fn blacklist(&self) -> &[String] {
        &self.blacklist
    }

    fn add_to_whitelist(&mut self, feature: String) {
        self.whitelist.push(feature);
    }

    fn add_to_blacklist(&mut self, feature: String) {
        self.blacklist.push(feature);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model_from(rsf: &str) -> RsfModel {
        RsfModel::new("test", KconfigDb::from_rsf(&RsfDocument::parse_str(rsf)))
    }

    fn intersect(
        model: &RsfModel,
        symbols: &[&str],
    ) -> (BTreeSet<String>, String, usize) {
        let set: BTreeSet<String> = symbols.iter().map(|s| s.to_string()).collect();
        let mut missing = BTreeSet::new();
        let mut formula = String::new();
        let valid = model.intersect(&set, None, &mut missing, &mut formula);
        (missing, formula, valid)
    }

    #[test]
    fn file_symbols_are_always_contained() {
        let model = model_from("Item FOO boolean\n");
        assert!(model.contains_symbol("FILE_kernel_sched_c"));
        assert!(model.contains_symbol("CONFIG_FOO"));
        assert!(!model.contains_symbol("CONFIG_BAR"));
    }

    #[test]
    fn missing_set_takes_space_symbols_absent_from_the_model() {
        let model = model_from("Item FOO boolean\n");
        let (missing, formula, valid) =
            intersect(&model, &["CONFIG_FOO", "CONFIG_ABSENT", "B0", "y"]);
        assert_eq!(valid, 1);
        assert_eq!(missing.iter().collect::<Vec<_>>(), ["CONFIG_ABSENT"]);
        assert!(formula.ends_with("._.test._."));
    }

    #[test]
    fn missing_set_never_overlaps_contains_symbol() {
        let model = model_from("Item FOO boolean\nItem BAR tristate\n");
        let (missing, _, _) = intersect(
            &model,
            &["CONFIG_FOO", "CONFIG_BAR", "CONFIG_BAR_MODULE", "CONFIG_NOPE"],
        );
        for symbol in &missing {
            assert!(!model.contains_symbol(symbol));
        }
    }

    #[test]
    fn checker_filters_missing_candidates() {
        let model = model_from("Item FOO boolean\n");
        let set: BTreeSet<String> =
            ["CONFIG_DEFINED.", "CONFIG_OTHER"].iter().map(|s| s.to_string()).collect();
        let mut missing = BTreeSet::new();
        let mut formula = String::new();
        let checker: &dyn Fn(&str) -> bool = &|s: &str| !s.starts_with("CONFIG_DEFINED");
        model.intersect(&set, Some(checker), &mut missing, &mut formula);
        assert_eq!(missing.iter().collect::<Vec<_>>(), ["CONFIG_OTHER"]);
    }

    #[test]
    fn slice_pulls_in_transitive_dependencies() {
        let model = model_from(
            "Item A boolean\nItem B boolean\nItem C boolean\n\
             Depends A \"B\"\nDepends B \"C\"\n",
        );
        let (_, formula, _) = intersect(&model, &["CONFIG_A"]);
        assert!(formula.contains("(CONFIG_A -> ((CONFIG_B)))"));
        assert!(formula.contains("(CONFIG_B -> ((CONFIG_C)))"));
    }

    #[test]
    fn tristate_slice_excludes_both_on() {
        let model = model_from("Item FOO tristate\n");
        let (_, formula, _) = intersect(&model, &["CONFIG_FOO", "CONFIG_FOO_MODULE"]);
        assert!(formula.contains("(CONFIG_FOO -> (!CONFIG_FOO_MODULE))"));
        assert!(formula.contains("(CONFIG_FOO_MODULE -> (!CONFIG_FOO && CONFIG_MODULES))"));
    }

    #[test]
    fn type_reflection_normalizes_names() {
        let model = model_from("Item FOO tristate\nItem BAR boolean\n");
        assert_eq!(model.get_type("CONFIG_FOO"), SymbolType::Tristate);
        assert_eq!(model.get_type("CONFIG_FOO_MODULE"), SymbolType::Tristate);
        assert_eq!(model.get_type("FOO"), SymbolType::Tristate);
        assert!(model.is_boolean("BAR"));
        assert!(!model.is_tristate("BAR"));
        assert_eq!(model.get_type("NOPE"), SymbolType::Missing);
    }

    #[test]
    fn whitelisted_symbols_enter_the_formula() {
        let mut model = model_from("Item FOO boolean\n");
        model.add_to_whitelist("CONFIG_FOO".to_string());
        let (_, formula, _) = intersect(&model, &["CONFIG_FOO"]);
        assert!(formula.starts_with("CONFIG_FOO\n&& "));
    }
}
