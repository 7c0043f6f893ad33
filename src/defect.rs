//! Dead/undead classification of conditional blocks.
//!
//! A block is dead when its presence condition is unsatisfiable, undead when
//! its parent can be selected but the block cannot be deselected. Both
//! pipelines tighten the formula in three steps: code constraints alone,
//! plus the model's constraints, plus grounding of symbols missing from the
//! model. The first unsatisfiable step names the defect class.

use std::collections::BTreeSet;
use std::io::Write;

use crate::block::{BlockId, CppFile};
use crate::cnf::{SatChecker, SatCheckerError};
use crate::container::ModelRegistry;
use crate::expr;
use crate::model::{missing_items_constraints, ConfigurationModel};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefectKind {
    /// Dead from the CPP structure alone.
    Implementation,
    /// Dead once the model constraints are added.
    Configuration,
    /// Dead once symbols absent from the model are grounded to false.
    Referential,
}

impl DefectKind {
    pub fn as_str(self) -> &'static str {
        match self {
            DefectKind::Implementation => "code",
            DefectKind::Configuration => "kconfig",
            DefectKind::Referential => "missing",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefectVariant {
    Dead,
    Undead,
}

impl DefectVariant {
    pub fn suffix(self) -> &'static str {
        match self {
            DefectVariant::Dead => "dead",
            DefectVariant::Undead => "undead",
        }
    }
}

#[derive(Debug)]
pub struct BlockDefect {
    pub block: BlockId,
    pub block_name: String,
    pub kind: DefectKind,
    pub variant: DefectVariant,
    /// Architecture of the model that detected the defect, if any.
    pub arch: Option<String>,
    pub is_global: bool,
    /// Whether the block's formula mentions any configuration-space symbol.
    pub in_configuration_space: bool,
    pub formula: String,
    /// Architectures whose model does not exhibit the defect.
    pub ok_archs: Vec<String>,
}

impl BlockDefect {
    pub fn needs_crosscheck(&self) -> bool {
        self.kind != DefectKind::Implementation && !self.is_global
    }

    pub fn report_filename(&self, file: &CppFile) -> String {
        let scope = if self.is_global {
            "globally"
        } else {
            self.arch.as_deref().unwrap_or("globally")
        };
        format!(
            "{}.{}.{}.{}.{}",
            file.filename(),
            self.block_name,
            self.kind.as_str(),
            scope,
            self.variant.suffix()
        )
    }

    /// Write the report file; failures are logged and swallowed so the rest
    /// of the analysis continues.
    pub fn write_report(&self, file: &CppFile, only_in_model: bool) -> bool {
        if only_in_model && !self.in_configuration_space {
            return false;
        }
        let filename = self.report_filename(file);
        let mut out = match std::fs::File::create(&filename) {
            Ok(out) => out,
            Err(e) => {
                log::error!("failed to open {} for writing: {}", filename, e);
                return false;
            }
        };
        log::info!("creating {}", filename);

        let block = file.block(self.block);
        let header = format!(
            "#{}:{}:{}:{}:{}:{}:{}:",
            self.block_name,
            file.filename(),
            block.line_start,
            block.col_start,
            file.filename(),
            block.line_end,
            block.col_end
        );
        let result = writeln!(out, "{}", header)
            .and_then(|_| write!(out, "{}", pretty_print(&self.formula)));
        if let Err(e) = result {
            log::error!("failed to write {}: {}", filename, e);
            return false;
        }
        true
    }
}

/// Re-print a formula through the expression parser; raw text if it does
/// not parse.
fn pretty_print(formula: &str) -> String {
    match expr::parse_string(formula) {
        Ok(e) => format!("{}\n", e),
        Err(_) => format!("{}\n", formula),
    }
}

/// The composed precondition of a block: its code constraints plus, with a
/// model, the model's constraint slice and the missing-symbol grounding.
pub fn block_precondition(
    file: &CppFile,
    block: BlockId,
    model: Option<&dyn ConfigurationModel>,
) -> String {
    let mut parts = vec![file.block(block).name.clone(), file.code_constraints()];

    if let Some(model) = model {
        let joined = parts.join("\n&& ");
        let symbols = expr::symbols_of_string(&joined).unwrap_or_default();
        let checker = file.item_checker();
        let mut missing = BTreeSet::new();
        let mut kconfig_formula = String::new();
        model.intersect(&symbols, Some(&checker), &mut missing, &mut kconfig_formula);
        parts.push(kconfig_formula);
        if model.is_complete() {
            let grounded = missing_items_constraints(&missing);
            if !grounded.is_empty() {
                parts.push(grounded);
            }
        }
    }
    parts.join("\n&& ")
}

/// Runs the dead and undead pipelines against an explicit model registry.
pub struct DefectAnalyzer<'a> {
    registry: &'a ModelRegistry,
}

impl<'a> DefectAnalyzer<'a> {
    pub fn new(registry: &'a ModelRegistry) -> Self {
        Self { registry }
    }

    /// Classify one block: dead analysis first, undead second, then a
    /// crosscheck over every loaded model for non-code defects.
    pub fn analyze_block(
        &self,
        file: &CppFile,
        block: BlockId,
    ) -> Result<Option<BlockDefect>, SatCheckerError> {
        let primary = self.registry.lookup_main();
        let primary_ref = primary.as_deref();

        let defect = match self.check_variant(file, block, primary_ref, DefectVariant::Dead)? {
            Some(defect) => defect,
            None => {
                match self.check_variant(file, block, primary_ref, DefectVariant::Undead)? {
                    Some(defect) => defect,
                    None => return Ok(None),
                }
            }
        };

        if primary_ref.is_none() || !defect.needs_crosscheck() {
            return Ok(Some(defect));
        }
        self.crosscheck(file, block, defect)
    }

    /// A defect that survives every model is global; the first architecture
    /// that does not reproduce it goes to the OK-list. The primary model's
    /// classification is kept either way.
    fn crosscheck(
        &self,
        file: &CppFile,
        block: BlockId,
        mut defect: BlockDefect,
    ) -> Result<Option<BlockDefect>, SatCheckerError> {
        for arch in self.registry.archs() {
            let model = self.registry.lookup(&arch).expect("listed arch is loaded");
            let verdict = self.check_variant(file, block, Some(model.as_ref()), defect.variant)?;
            if verdict.is_none() {
                defect.ok_archs.push(arch);
                return Ok(Some(defect));
            }
        }
        defect.is_global = true;
        Ok(Some(defect))
    }

    fn check_variant(
        &self,
        file: &CppFile,
        block: BlockId,
        model: Option<&dyn ConfigurationModel>,
        variant: DefectVariant,
    ) -> Result<Option<BlockDefect>, SatCheckerError> {
        let target = file.block(block);
        let seed = match variant {
            DefectVariant::Dead => target.name.clone(),
            DefectVariant::Undead => {
                // no parent -> impossible to be undead
                let Some(parent) = target.parent else {
                    return Ok(None);
                };
                format!("( {} && ! {} )", file.block(parent).name, target.name)
            }
        };

        let formula = format!("{}\n&& {}", seed, file.code_constraints());
        let symbols = expr::symbols_of_string(&formula)?;

        // blocks not touching the configuration space are never reported as
        // configuration defects
        let in_configuration_space = match model {
            Some(model) => symbols.iter().any(|s| model.in_configuration_space(s)),
            None => true,
        };

        let defect = |kind, is_global, formula: String| BlockDefect {
            block,
            block_name: target.name.clone(),
            kind,
            variant,
            arch: model.map(|m| m.name().to_string()),
            is_global,
            in_configuration_space,
            formula,
            ok_archs: Vec::new(),
        };

        let mut code_checker = SatChecker::from_formula(&formula)?;
        if !code_checker.check_satisfiable()? {
            return Ok(Some(defect(DefectKind::Implementation, true, formula)));
        }

        let Some(model) = model else {
            return Ok(None);
        };

        let checker = file.item_checker();
        let mut missing = BTreeSet::new();
        let mut kconfig_formula = String::new();
        model.intersect(&symbols, Some(&checker), &mut missing, &mut kconfig_formula);

        let with_model = format!("{}\n&& {}", formula, kconfig_formula);
        let mut model_checker = self.checker_with_model(&with_model, model)?;
        if !model_checker.check_satisfiable()? {
            return Ok(Some(defect(DefectKind::Configuration, false, with_model)));
        }

        // an incomplete model cannot ground absent symbols
        if !model.is_complete() {
            return Ok(None);
        }
        let grounded = missing_items_constraints(&missing);
        if grounded.is_empty() {
            return Ok(None);
        }
        let with_missing = format!("{}\n&& {}", with_model, grounded);
        let mut missing_checker = self.checker_with_model(&with_missing, model)?;
        if !missing_checker.check_satisfiable()? {
            return Ok(Some(defect(DefectKind::Referential, false, with_missing)));
        }
        Ok(None)
    }

    fn checker_with_model(
        &self,
        formula: &str,
        model: &dyn ConfigurationModel,
    ) -> Result<SatChecker, SatCheckerError> {
        let mut checker = SatChecker::from_formula(formula)?;
        if let Some(cnf) = model.precompiled_cnf() {
            checker.attach_clauses(
                &cnf.clauses,
                cnf.symbols.iter().map(|(name, var)| (name.as_str(), *var)),
            );
        }
        Ok(checker)
    }
}
