//! The uniform query surface over both model encodings.
//!
//! A configuration model answers which symbols it knows, which belong to the
//! configuration space at all, and contributes its constraints to a query
//! formula through [`ConfigurationModel::intersect`].

use std::collections::BTreeSet;

use indexmap::IndexMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("failed to read model: {0}")]
    Io(#[from] std::io::Error),
    #[error("bad model file {path}: {reason}")]
    Format { path: String, reason: String },
    #[error("model '{0}' does not exist (neither directory nor file)")]
    Missing(String),
    #[error("could not find any models in {0}")]
    NoModels(String),
}

pub const WHITELIST_KEY: &str = "ALWAYS_ON";
pub const BLACKLIST_KEY: &str = "ALWAYS_OFF";
pub const SPACE_REGEX_KEY: &str = "CONFIGURATION_SPACE_REGEX";
pub const INCOMPLETE_KEY: &str = "CONFIGURATION_SPACE_INCOMPLETE";

/// Default identifier shape of Kconfig symbols.
pub const DEFAULT_SPACE_REGEX: &str = "^CONFIG_[^ ]+$";

/// Symbols with this prefix are free variables and never counted missing.
pub const FREE_VARIABLE_PREFIX: &str = "__FREE__";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolType {
    Missing,
    Boolean,
    Tristate,
}

/// A precompiled (Tseitin) model: raw clauses plus its symbol table.
#[derive(Debug, Default)]
pub struct PrecompiledCnf {
    pub clauses: Vec<Vec<i32>>,
    pub symbols: IndexMap<String, i32>,
    pub num_vars: usize,
}

/// Predicate deciding whether a symbol may enter the missing set; the block
/// tree supplies one that rejects internal CPP artifacts.
pub type SymbolChecker<'a> = &'a dyn Fn(&str) -> bool;

pub trait ConfigurationModel: Send + Sync {
    /// The architecture this model was loaded for.
    fn name(&self) -> &str;

    /// Whether the model knows the symbol. `FILE_` variables are always
    /// accepted.
    fn contains_symbol(&self, symbol: &str) -> bool;

    /// Whether the identifier even belongs to the configuration space.
    fn in_configuration_space(&self, symbol: &str) -> bool;

    /// Whether every space symbol is mentioned, so that absence implies a
    /// referential defect.
    fn is_complete(&self) -> bool;

    /// Type reflection; the name may come with or without the `CONFIG_`
    /// prefix or `_MODULE` suffix.
    fn get_type(&self, feature: &str) -> SymbolType;

    fn is_boolean(&self, feature: &str) -> bool {
        self.get_type(feature) == SymbolType::Boolean
    }

    fn is_tristate(&self, feature: &str) -> bool {
        self.get_type(feature) == SymbolType::Tristate
    }

    /// Split the symbols of a query into in-model and missing, and collect
    /// the model's constraint contribution into `formula`. Returns the
    /// number of symbols the model knows.
    fn intersect(
        &self,
        symbols: &BTreeSet<String>,
        checker: Option<SymbolChecker<'_>>,
        missing: &mut BTreeSet<String>,
        formula: &mut String,
    ) -> usize;

    /// Features forced on (`ALWAYS_ON` meta list).
    fn whitelist(&self) -> &[String];

    /// Features forced off (`ALWAYS_OFF` meta list).
    fn blacklist(&self) -> &[String];

    fn add_to_whitelist(&mut self, feature: String);

    fn add_to_blacklist(&mut self, feature: String);

    /// The precompiled clause set, for encodings that carry one.
    fn precompiled_cnf(&self) -> Option<&PrecompiledCnf> {
        None
    }
}

/// Grounding term for symbols absent from the model: none of them may be
/// enabled.
pub fn missing_items_constraints(missing: &BTreeSet<String>) -> String {
    if missing.is_empty() {
        return String::new();
    }
    let joined = missing
        .iter()
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join(" || ");
    format!("( ! ( {} ) )", joined)
}

/// Marker literal recording which model contributed to a formula.
pub fn model_marker(name: &str) -> String {
    format!("._.{}._.", name)
}

/// The shared in-model / missing classification of `intersect`.
///
/// Appends `ALWAYS_ON`/`ALWAYS_OFF` literals for known symbols to `parts`,
/// fills `missing`, and returns the count of known symbols.
pub(crate) fn classify_symbols(
    model: &dyn ConfigurationModel,
    symbols: &BTreeSet<String>,
    checker: Option<SymbolChecker<'_>>,
    missing: &mut BTreeSet<String>,
    parts: &mut Vec<String>,
) -> usize {
    let mut valid_items = 0;
    for symbol in symbols {
        if model.contains_symbol(symbol) {
            valid_items += 1;
            if model.whitelist().iter().any(|f| f == symbol) {
                parts.push(symbol.clone());
            }
            if model.blacklist().iter().any(|f| f == symbol) {
                parts.push(format!("!{}", symbol));
            }
        } else {
            // outside the configuration space nothing can be "missing"
            if !model.in_configuration_space(symbol) {
                continue;
            }
            if let Some(check) = checker {
                if !check(symbol) {
                    continue;
                }
            }
            if symbol.len() > 1 && !symbol.starts_with(FREE_VARIABLE_PREFIX) {
                missing.insert(symbol.clone());
            }
        }
    }
    valid_items
}
