//! CNF-backed configuration model: a Tseitin-precompiled clause set with a
//! symbol table, loaded from a DIMACS file with a `c sym` / `c meta_value`
//! prologue.

use std::collections::BTreeSet;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use indexmap::IndexMap;
use regex::Regex;

use crate::model::{
    classify_symbols, model_marker, ConfigurationModel, ModelError, PrecompiledCnf, SymbolChecker,
    SymbolType, BLACKLIST_KEY, DEFAULT_SPACE_REGEX, INCOMPLETE_KEY, SPACE_REGEX_KEY, WHITELIST_KEY,
};

pub struct CnfModel {
    name: String,
    cnf: PrecompiledCnf,
    meta: IndexMap<String, Vec<String>>,
    space_regex: Regex,
    type_regex: Regex,
}

impl CnfModel {
    pub fn from_file(path: &Path) -> Result<Self, ModelError> {
        let name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("unknown")
            .to_string();
        let reader = BufReader::new(File::open(path)?);
        Self::parse(name, reader, &path.display().to_string())
    }

    fn parse(name: String, reader: impl BufRead, origin: &str) -> Result<Self, ModelError> {
        let mut cnf = PrecompiledCnf::default();
        let mut meta: IndexMap<String, Vec<String>> = IndexMap::new();

        for line in reader.lines() {
            let line = line?;
            let fields: Vec<&str> = line.split_whitespace().collect();
            match fields.as_slice() {
                [] => {}
                ["c", "sym", symbol, var] => {
                    let var: i32 = var.parse().map_err(|_| ModelError::Format {
                        path: origin.to_string(),
                        reason: format!("bad symbol table row: {}", line),
                    })?;
                    cnf.symbols.insert(symbol.to_string(), var);
                }
                ["c", "meta_value", key, values @ ..] => {
                    meta.entry(key.to_string())
                        .or_default()
                        .extend(values.iter().map(|v| v.to_string()));
                }
                ["c", ..] => {}
                ["p", "cnf", vars, _clauses] => {
                    cnf.num_vars = vars.parse().map_err(|_| ModelError::Format {
                        path: origin.to_string(),
                        reason: format!("bad problem line: {}", line),
                    })?;
                }
                _ => {
                    let mut clause = Vec::new();
                    for field in &fields {
                        let lit: i32 = field.parse().map_err(|_| ModelError::Format {
                            path: origin.to_string(),
                            reason: format!("bad clause line: {}", line),
                        })?;
                        if lit == 0 {
                            break;
                        }
                        clause.push(lit);
                    }
                    if !clause.is_empty() {
                        cnf.clauses.push(clause);
                    }
                }
            }
        }

        // an empty model cannot possibly be complete
        if cnf.num_vars == 0 && cnf.symbols.is_empty() {
            meta.entry(INCOMPLETE_KEY.to_string())
                .or_default()
                .push("1".to_string());
        }

        let space_regex = match meta.get(SPACE_REGEX_KEY).and_then(|v| v.first()) {
            Some(pattern) => {
                log::info!("set configuration space regex to '{}'", pattern);
                Regex::new(pattern).map_err(|e| ModelError::Format {
                    path: origin.to_string(),
                    reason: format!("bad {}: {}", SPACE_REGEX_KEY, e),
                })?
            }
            None => Regex::new(DEFAULT_SPACE_REGEX).expect("default space regex compiles"),
        };

        log::info!(
            "loaded cnf model for {} ({} symbols, {} clauses)",
            name,
            cnf.symbols.len(),
            cnf.clauses.len()
        );
        Ok(Self {
            name,
            cnf,
            meta,
            space_regex,
            type_regex: Regex::new(r"^(CONFIG_)?([0-9A-Za-z_]+?)(_MODULE)?$")
                .expect("type regex compiles"),
        })
    }

    pub fn meta_value(&self, key: &str) -> Option<&[String]> {
        self.meta.get(key).map(Vec::as_slice)
    }
}

impl ConfigurationModel for CnfModel {
    fn name(&self) -> &str {
        &self.name
    }

    fn contains_symbol(&self, symbol: &str) -> bool {
        symbol.starts_with("FILE_") || self.cnf.symbols.contains_key(symbol)
    }

    fn in_configuration_space(&self, symbol: &str) -> bool {
        self.space_regex.is_match(symbol)
    }

    fn is_complete(&self) -> bool {
        // reversed flag so that legacy models without the key read complete
        !self.meta.contains_key(INCOMPLETE_KEY)
    }

    fn get_type(&self, feature: &str) -> SymbolType {
        let Some(caps) = self.type_regex.captures(feature) else {
            return SymbolType::Missing;
        };
        let item = format!("CONFIG_{}", &caps[2]);
        if self.cnf.symbols.contains_key(&format!("{}_MODULE", item)) {
            SymbolType::Tristate
        } else if self.cnf.symbols.contains_key(&item) {
            SymbolType::Boolean
        } else {
            SymbolType::Missing
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
        self.meta_value(WHITELIST_KEY).unwrap_or(&[])
    }

    fn blacklist(&self) -> &[String] {
        self.meta_value(BLACKLIST_KEY).unwrap_or(&[])
    }

    fn add_to_whitelist(&mut self, feature: String) {
        self.meta
            .entry(WHITELIST_KEY.to_string())
            .or_default()
            .push(feature);
    }

    fn add_to_blacklist(&mut self, feature: String) {
        self.meta
            .entry(BLACKLIST_KEY.to_string())
            .or_default()
            .push(feature);
    }

    fn precompiled_cnf(&self) -> Option<&PrecompiledCnf> {
        Some(&self.cnf)
    }
}
