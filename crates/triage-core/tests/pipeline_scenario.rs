//! End-to-end pipeline scenarios against a real temp source tree.

use std::path::Path;
use triage_core::pipeline::Pipeline;
use triage_core::PipelineConfig;
use triage_fix::{ApplyOptions, FixApplier};
use triage_graph::{GraphConfig, ImportGraph};
use triage_report::StatusCode;
use triage_test_utils::{
    failing_result, marketplace_fixture, passing_result, singleton_failure, write_file,
};

#[test]
fn singleton_failure_is_traced_scored_and_fixed() {
    let dir = marketplace_fixture();
    let config = PipelineConfig::load(dir.path()).unwrap();
    let pipeline = Pipeline::new(config);

    let results = vec![
        passing_result("home page renders"),
        singleton_failure("deals page renders"),
    ];
    let report = pipeline.run(&results, false).unwrap();

    // Pattern match: browser_compat with an import trace requested.
    let analysis = &report.analyses[0];
    assert_eq!(analysis.pattern.category.as_str(), "browser_compat");
    assert!(analysis.pattern.confidence >= 0.3);

    // Trace found the module-scope constructor; compat corroborated it:
    // base + 0.20 (chain) + 0.15 (critical compat).
    let chain = analysis.import_chain.as_ref().unwrap();
    assert!(chain.found);
    assert_eq!(
        chain.root_cause_file.as_deref(),
        Some(Path::new("src/services/deal-service.ts"))
    );
    assert!((analysis.confidence - (analysis.pattern.confidence + 0.20 + 0.15)).abs() < 1e-9);

    // The lazy-initialization template produced a fix with one manual step.
    assert_eq!(report.fixes.len(), 1);
    let fix = &report.fixes[0];
    assert_eq!(fix.template_id, "lazy-singleton");
    assert_eq!(fix.manual_steps, vec!["update callers to invoke the getter"]);
    assert!(fix.modified_content.contains("export function dealService(): DealService {"));

    // Applying the fix converts the line to a guarded getter on disk.
    let applier = FixApplier::new(dir.path());
    let outcome = applier.apply(fix, &ApplyOptions::default());
    assert!(outcome.success);
    let on_disk = std::fs::read_to_string(dir.path().join("src/services/deal-service.ts")).unwrap();
    assert!(on_disk.contains("if (!dealService_instance) {"));
    assert!(!on_disk.contains("export const dealService = new DealService(db);"));
}

#[test]
fn transactional_batch_rolls_back_cleanly() {
    let dir = marketplace_fixture();
    write_file(
        dir.path(),
        "src/services/listing-service.ts",
        "export const listingService = new ListingService();\n",
    );
    let config = PipelineConfig::load(dir.path()).unwrap();
    let pipeline = Pipeline::new(config);

    let results = vec![
        singleton_failure("deals page renders"),
        failing_result(
            "listings page renders",
            "AppDataSource.getRepository is not a function",
            "at render (src/services/listing-service.ts:1:1)",
        ),
    ];
    let report = pipeline.run(&results, false).unwrap();
    assert_eq!(report.fixes.len(), 2);

    // Invalidate the second target after generation.
    let second = dir.path().join(&report.fixes[1].file);
    let pre_image = std::fs::read_to_string(&second).unwrap();
    std::fs::write(&second, format!("// drifted\n{pre_image}")).unwrap();

    let applier = FixApplier::new(dir.path());
    let outcome = applier.apply_transaction(&report.fixes, &ApplyOptions::default());
    assert!(!outcome.success);

    // First target restored to its pre-fix content.
    let first = std::fs::read_to_string(dir.path().join(&report.fixes[0].file)).unwrap();
    assert!(first.contains("export const dealService = new DealService(db);"));
}

#[test]
fn status_improves_once_failures_clear() {
    let dir = marketplace_fixture();
    let config = PipelineConfig::load(dir.path()).unwrap();
    let pipeline = Pipeline::new(config);

    let failing = vec![singleton_failure("deals page renders")];
    let first = pipeline.run(&failing, false).unwrap();
    assert_eq!(first.snapshot.status, StatusCode::Fixable);

    let passing = vec![passing_result("deals page renders")];
    let second = pipeline.run(&passing, false).unwrap();
    assert_eq!(second.snapshot.status, StatusCode::Pass);
    assert_eq!(second.diff.fixed_tests, vec!["deals page renders"]);
    assert_eq!(
        second.diff.status_transition,
        Some((StatusCode::Fixable, StatusCode::Pass))
    );
}

#[test]
fn session_reports_only_news_across_runs() {
    let dir = marketplace_fixture();
    let mut config = PipelineConfig::load(dir.path()).unwrap();
    config.session_id = Some(String::from("ci-main"));
    let pipeline = Pipeline::new(config);

    let first = pipeline
        .run(&[singleton_failure("deals page renders")], false)
        .unwrap();
    let novelty = first.novelty.unwrap();
    assert!(!novelty.unchanged);
    assert_eq!(novelty.new_patterns, vec!["datasource-not-initialized"]);

    // Identical run: fully suppressed.
    let second = pipeline
        .run(&[singleton_failure("deals page renders")], false)
        .unwrap();
    assert!(second.novelty.unwrap().unchanged);

    // A new failure alongside the known one: only the new facts surface.
    let third = pipeline
        .run(
            &[
                singleton_failure("deals page renders"),
                failing_result("deal detail opens", "operation timed out", ""),
            ],
            false,
        )
        .unwrap();
    let novelty = third.novelty.unwrap();
    assert!(!novelty.unchanged);
    assert!(novelty.new_root_causes.iter().all(|rc| rc.contains("time")));
    assert!(novelty.already_known >= 1);
}

#[test]
fn cyclic_helper_modules_do_not_hang_the_graph() {
    let dir = marketplace_fixture();
    let graph = ImportGraph::build(&GraphConfig::new(dir.path())).unwrap();

    // format.ts <-> parse.ts is a cycle; both queries terminate.
    let dependents = graph.dependents(Path::new("src/lib/parse.ts"), 10);
    assert!(dependents.contains(&"src/lib/format.ts".into()));
    assert!(dependents.contains(&"src/services/deal-service.ts".into()));

    let affected = graph.affected_tests(&["src/services/db.ts".into()]);
    assert_eq!(affected, vec![std::path::PathBuf::from("tests/deals.spec.ts")]);
}
