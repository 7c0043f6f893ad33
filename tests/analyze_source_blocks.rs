use std::collections::BTreeSet;
use std::sync::Arc;

use deadblock::block::ROOT_NAME;
use deadblock::cnf::SatChecker;
use deadblock::container::ModelRegistry;
use deadblock::cpp;
use deadblock::defect::{DefectAnalyzer, DefectKind, DefectVariant};
use deadblock::kconfig::KconfigDb;
use deadblock::rsf::RsfDocument;
use deadblock::rsf_model::RsfModel;

fn registry_with(rsf: &str, arch: &str) -> ModelRegistry {
    let registry = ModelRegistry::new();
    let db = KconfigDb::from_rsf(&RsfDocument::parse_str(rsf));
    registry.register(arch, Arc::new(RsfModel::new(arch, db)));
    registry.set_main_model(arch);
    registry
}

#[test]
fn contradictory_if_is_implementation_dead() {
    let file = cpp::scan("simple.c", "#if A && !A\nint x;\n#endif\n");
    let block = file.blocks().next().unwrap();

    let formula = format!("{}\n&& {}", file.block(block).name, file.code_constraints());
    let mut checker = SatChecker::from_formula(&formula).unwrap();
    assert!(!checker.check_satisfiable().unwrap());

    let registry = ModelRegistry::new();
    let defect = DefectAnalyzer::new(&registry)
        .analyze_block(&file, block)
        .unwrap()
        .expect("dead block");
    assert_eq!(defect.kind, DefectKind::Implementation);
    assert_eq!(defect.variant, DefectVariant::Dead);
    assert!(defect.is_global);
}

#[test]
fn define_rewriting_emits_the_mangled_chain() {
    let source = "\
#ifdef FOO
#define BAR
#ifdef BAR
int x;
#else
int y;
#endif
#endif
";
    let file = cpp::scan("defines.c", source);
    let formula = file.code_constraints();

    assert!(formula.contains("( B0 <-> FOO )"));
    assert!(formula.contains("( B1 <-> B0 && BAR. )"));
    assert!(formula.contains("( B2 <-> B0 && ( ! (B1) ) )"));
    assert!(formula.contains("(B0 -> BAR.)"));
    assert!(formula.contains("(!B0 -> (BAR <-> BAR.))"));
    assert!(formula.ends_with(ROOT_NAME));

    // outside B0 the define has no effect, so `#ifdef BAR` opens iff B0
    // is selected
    let registry = ModelRegistry::new();
    let analyzer = DefectAnalyzer::new(&registry);
    for block in file.blocks() {
        assert!(analyzer.analyze_block(&file, block).unwrap().is_none());
    }
}

#[test]
fn blocks_are_reachable_exactly_under_their_conditions() {
    let source = "\
#ifdef A
#ifdef B
int x;
#endif
#endif
";
    let file = cpp::scan("nested.c", source);
    let inner = file.blocks().nth(1).unwrap();
    let inner_name = file.block(inner).name.clone();

    // reachable when both conditions hold
    let mut checker = SatChecker::from_formula(&file.code_constraints()).unwrap();
    checker.push_assumption("A", true);
    checker.push_assumption("B", true);
    checker.push_assumption(&inner_name, true);
    assert!(checker.check_satisfiable().unwrap());

    // unreachable once the outer condition fails
    checker.push_assumption("A", false);
    checker.push_assumption(&inner_name, true);
    assert!(!checker.check_satisfiable().unwrap());
}

#[test]
fn undead_else_of_a_tautology() {
    let source = "\
#if A || !A
int x;
#else
int y;
#endif
";
    let file = cpp::scan("tauto.c", source);
    let registry = ModelRegistry::new();
    let analyzer = DefectAnalyzer::new(&registry);

    let blocks: Vec<_> = file.blocks().collect();
    // the #if arm is undead: its parent (the file) is always there and the
    // condition always holds
    let defect = analyzer
        .analyze_block(&file, blocks[0])
        .unwrap()
        .expect("undead block");
    assert_eq!(defect.variant, DefectVariant::Undead);

    // the #else arm is plain dead
    let defect = analyzer
        .analyze_block(&file, blocks[1])
        .unwrap()
        .expect("dead block");
    assert_eq!(defect.variant, DefectVariant::Dead);
    assert_eq!(defect.kind, DefectKind::Implementation);
}

#[test]
fn kconfig_model_kills_contradictory_tristate_use() {
    let source = "#if defined(CONFIG_FOO) && defined(CONFIG_FOO_MODULE)\nint x;\n#endif\n";
    let file = cpp::scan("tristate.c", source);
    let registry = registry_with("Item FOO tristate\n", "x86");

    let block = file.blocks().next().unwrap();
    let defect = DefectAnalyzer::new(&registry)
        .analyze_block(&file, block)
        .unwrap()
        .expect("configuration-dead block");
    assert_eq!(defect.kind, DefectKind::Configuration);
    assert!(defect.formula.contains("._.x86._."));
}

#[test]
fn missing_symbol_grounding_detects_referential_defects() {
    let file = cpp::scan("missing.c", "#ifdef CONFIG_REMOVED_FEATURE\nint x;\n#endif\n");
    let registry = registry_with("Item PRESENT boolean\n", "x86");

    let block = file.blocks().next().unwrap();
    let defect = DefectAnalyzer::new(&registry)
        .analyze_block(&file, block)
        .unwrap()
        .expect("referentially dead block");
    assert_eq!(defect.kind, DefectKind::Referential);
    assert!(defect.formula.contains("( ! ( CONFIG_REMOVED_FEATURE ) )"));
}

#[test]
fn crosscheck_clears_arch_specific_defects() {
    let file = cpp::scan("arch.c", "#ifdef CONFIG_ARM_ONLY\nint x;\n#endif\n");
    let registry = registry_with("Item X86_THING boolean\n", "x86");
    let arm_db = KconfigDb::from_rsf(&RsfDocument::parse_str("Item ARM_ONLY boolean\n"));
    registry.register("arm", Arc::new(RsfModel::new("arm", arm_db)));

    let block = file.blocks().next().unwrap();
    let defect = DefectAnalyzer::new(&registry)
        .analyze_block(&file, block)
        .unwrap()
        .expect("defect on the primary arch");
    assert!(!defect.is_global);
    assert_eq!(defect.ok_archs, ["arm"]);
    assert_eq!(defect.report_filename(&file), "arch.c.B0.missing.x86.dead");
}

#[test]
fn report_files_follow_the_naming_contract() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("report.c");
    let filename = path.to_str().unwrap().to_string();

    let file = cpp::scan(&filename, "#if 0\nint x;\n#endif\n");
    let registry = ModelRegistry::new();
    let block = file.blocks().next().unwrap();
    let defect = DefectAnalyzer::new(&registry)
        .analyze_block(&file, block)
        .unwrap()
        .expect("`#if 0` is dead");

    assert!(defect.write_report(&file, false));
    let report_path = format!("{}.B0.code.globally.dead", filename);
    let contents = std::fs::read_to_string(&report_path).unwrap();
    assert!(contents.starts_with(&format!("#B0:{}:1:0:", filename)));
    assert!(contents.contains("B00"));
}

#[test]
fn decision_coverage_invalidates_memoized_constraints() {
    let source = "\
#ifdef A
int x;
#endif
";
    let mut file = cpp::scan("coverage.c", source);
    let before = file.code_constraints();
    assert!(!before.contains("B1"));

    file.decision_coverage();
    let after = file.code_constraints();
    assert_ne!(before, after);
    assert!(after.contains("( B1 <-> ( ! (B0) ) )"));

    // the synthetic else completes the chain: selecting neither branch is
    // now impossible
    let mut checker = SatChecker::from_formula(&after).unwrap();
    checker.push_assumption("B0", false);
    checker.push_assumption("B1", false);
    assert!(!checker.check_satisfiable().unwrap());
}

#[test]
fn file_variable_ties_the_root_to_the_model() {
    let mut file = cpp::scan("drivers/net-core.c", "#ifdef CONFIG_NET\nint x;\n#endif\n");
    file.set_file_var_enabled(true);
    let formula = file.code_constraints();
    assert!(formula.contains("( B00 <-> FILE_drivers_net_core.c )"));

    // B00 is asserted, so the file variable is forced on
    let mut checker = SatChecker::from_formula(&formula).unwrap();
    checker.push_assumption("FILE_drivers_net_core.c", false);
    assert!(!checker.check_satisfiable().unwrap());
}

#[test]
fn item_checker_keeps_defined_artifacts_out_of_the_missing_set() {
    let source = "\
#define CONFIG_LOCAL_HACK
#ifdef CONFIG_LOCAL_HACK
int x;
#endif
";
    let file = cpp::scan("hack.c", source);
    let registry = registry_with("Item OTHER boolean\n", "x86");
    let model = registry.lookup_main().unwrap();

    let formula = file.code_constraints();
    let symbols: BTreeSet<String> = deadblock::expr::symbols_of_string(&formula).unwrap();
    let checker = file.item_checker();
    let mut missing = BTreeSet::new();
    let mut intersected = String::new();
    model.intersect(&symbols, Some(&checker), &mut missing, &mut intersected);

    // CONFIG_LOCAL_HACK. is a CPP artifact, not a missing Kconfig feature
    assert!(missing.is_empty());
}
