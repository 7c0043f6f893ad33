use std::path::Path;
use std::process::ExitCode;

use deadblock::container::ModelRegistry;
use deadblock::cpp;
use deadblock::defect::DefectAnalyzer;

fn usage() {
    eprintln!("usage: deadblock [-m model-file-or-dir] [-M arch] [-d] [-s] <file>...");
    eprintln!("  -m  load configuration models (.model = rsf, .cnf = precompiled)");
    eprintln!("  -M  primary architecture for first-pass classification");
    eprintln!("  -d  complete #if chains with synthetic #else blocks first");
    eprintln!("  -s  only report blocks touching the configuration space");
}

fn main() -> ExitCode {
    env_logger::init();

    let mut model_path: Option<String> = None;
    let mut primary: Option<String> = None;
    let mut coverage = false;
    let mut only_in_model = false;
    let mut files: Vec<String> = Vec::new();

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-m" => model_path = args.next(),
            "-M" => primary = args.next(),
            "-d" => coverage = true,
            "-s" => only_in_model = true,
            "-h" | "--help" => {
                usage();
                return ExitCode::SUCCESS;
            }
            _ => files.push(arg),
        }
    }
    if files.is_empty() {
        usage();
        return ExitCode::FAILURE;
    }

    let registry = ModelRegistry::new();
    let mut have_models = false;
    if let Some(path) = model_path {
        match registry.load_models(Path::new(&path)) {
            Ok(model) => {
                have_models = true;
                let main_arch = primary.unwrap_or_else(|| model.name().to_string());
                registry.set_main_model(&main_arch);
            }
            Err(e) => {
                log::error!("{}", e);
                return ExitCode::FAILURE;
            }
        }
    }

    let analyzer = DefectAnalyzer::new(&registry);
    let mut processed_units = 0usize;
    let mut processed_blocks = 0usize;
    let mut failed_blocks = 0usize;
    let mut defects = 0usize;

    for filename in &files {
        let source = match std::fs::read_to_string(filename) {
            Ok(source) => source,
            Err(e) => {
                log::error!("failed to read {}: {}", filename, e);
                continue;
            }
        };

        let mut file = cpp::scan(filename, &source);
        if have_models {
            file.set_file_var_enabled(true);
        }
        if coverage {
            file.decision_coverage();
        }
        processed_units += 1;

        let blocks: Vec<_> = file.blocks().collect();
        for block in blocks {
            match analyzer.analyze_block(&file, block) {
                Ok(Some(defect)) => {
                    defects += 1;
                    defect.write_report(&file, only_in_model);
                    processed_blocks += 1;
                }
                Ok(None) => processed_blocks += 1,
                Err(e) => {
                    failed_blocks += 1;
                    log::warn!(
                        "couldn't process {} of {}: {}",
                        file.block(block).name,
                        filename,
                        e
                    );
                }
            }
        }
    }

    log::info!(
        "processed {} units, {} blocks ({} failed), {} defects",
        processed_units,
        processed_blocks,
        failed_blocks,
        defects
    );
    ExitCode::SUCCESS
}
