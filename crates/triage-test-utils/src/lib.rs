//! Testing utilities for the triage workspace
//!
//! Shared fixtures: temp source trees and canned harness results.

#![allow(missing_docs)]

use std::path::{Path, PathBuf};
use tempfile::TempDir;
use triage_failure::{TestError, TestResult, TestStatus};

/// Write a file under a root, creating parent directories.
pub fn write_file(root: &Path, rel: &str, content: &str) {
    let path = root.join(rel);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, content).unwrap();
}

/// A small marketplace-shaped tree: a page importing a service that
/// constructs a singleton at module scope, plus an import cycle between
/// two helper modules.
pub fn marketplace_fixture() -> TempDir {
    let dir = TempDir::new().unwrap();
    let root = dir.path();
    write_file(
        root,
        "src/pages/deals.tsx",
        "import { dealService } from '@/services/deal-service';\n\
         export default function Deals() {}\n",
    );
    write_file(
        root,
        "src/services/deal-service.ts",
        "import { db } from './db';\n\
         import { format } from '../lib/format';\n\
         export const dealService = new DealService(db);\n",
    );
    write_file(root, "src/services/db.ts", "export const db = {};\n");
    write_file(
        root,
        "src/lib/format.ts",
        "import { parse } from './parse';\nexport const format = (x) => parse(x);\n",
    );
    write_file(
        root,
        "src/lib/parse.ts",
        "import { format } from './format';\nexport const parse = (x) => x;\n",
    );
    write_file(
        root,
        "tests/deals.spec.ts",
        "import Deals from '../src/pages/deals';\n",
    );
    dir
}

pub fn passing_result(name: &str) -> TestResult {
    TestResult {
        name: name.to_string(),
        file: PathBuf::from("tests/deals.spec.ts"),
        status: TestStatus::Passed,
        error: None,
        duration_ms: 25,
    }
}

pub fn failing_result(name: &str, message: &str, stack: &str) -> TestResult {
    TestResult {
        name: name.to_string(),
        file: PathBuf::from("tests/deals.spec.ts"),
        status: TestStatus::Failed,
        error: Some(TestError::with_stack_text(message, stack)),
        duration_ms: 1800,
    }
}

/// The canonical module-scope-singleton failure.
pub fn singleton_failure(name: &str) -> TestResult {
    failing_result(
        name,
        "AppDataSource.getRepository is not a function",
        "at render (src/pages/deals.tsx:1:1)\n\
         at run (node_modules/vitest/dist/run.js:10:2)",
    )
}
