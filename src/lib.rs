//! Dead and undead `#if` block analysis against Kconfig configuration
//! models.
//!
//! The pipeline: an RSF dump of the Kconfig database becomes a
//! [`kconfig::KconfigDb`] and, wrapped as a [`rsf_model::RsfModel`] (or
//! loaded precompiled as a [`cnf_model::CnfModel`]), lands in a
//! [`container::ModelRegistry`]. A source file is scanned by [`cpp::scan`]
//! into a [`block::CppFile`], whose conditional blocks the
//! [`defect::DefectAnalyzer`] classifies by handing propositional formulas
//! to the SAT facade in [`cnf`].

pub mod block;
pub mod cnf;
pub mod cnf_model;
pub mod container;
pub mod cpp;
pub mod defect;
pub mod expr;
pub mod kconfig;
pub mod model;
pub mod rsf;
pub mod rsf_model;
pub mod sat;

pub use block::{BlockId, BlockKind, ConditionalBlock, CppDefine, CppFile};
pub use cnf::{ConstPolicy, SatChecker, SatCheckerError};
pub use container::ModelRegistry;
pub use defect::{BlockDefect, DefectAnalyzer, DefectKind, DefectVariant};
pub use kconfig::KconfigDb;
pub use model::{ConfigurationModel, ModelError};
