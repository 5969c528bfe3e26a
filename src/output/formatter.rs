use std::path::{Path, PathBuf};

use crate::output::report;
use crate::pipeline::outcome::RunReport;

/// Replayable test invocations of exploitable candidates.
pub const EXPLOITABLES_FILE: &str = "exploitables.sql";
/// Drops for everything left on the target.
pub const DROP_FILE: &str = "drop_functions.sql";
/// Per-candidate failures and collisions.
pub const ERRORS_FILE: &str = "errors.txt";
/// Phase and verdict log.
pub const TEST_LOG_FILE: &str = "test_log.txt";
/// Markdown summary.
pub const REPORT_FILE: &str = "report.md";
/// Machine-readable summary.
pub const REPORT_JSON_FILE: &str = "report.json";

/// Check that `output_dir` exists and is a directory.
pub fn validate_output_dir(output_dir: &Path) -> Result<(), String> {
    if !output_dir.exists() {
        return Err(format!(
            "Output directory {} does not exist",
            output_dir.display()
        ));
    }
    if !output_dir.is_dir() {
        return Err(format!(
            "Output path {} is not a directory",
            output_dir.display()
        ));
    }
    Ok(())
}

/// Write every artifact of `run` into `output_dir`, returning the paths
/// written.
pub fn write_output(output_dir: &Path, run: &RunReport) -> Result<Vec<PathBuf>, String> {
    validate_output_dir(output_dir)?;

    let json = serde_json::to_string_pretty(run)
        .map_err(|e| format!("Failed to serialize run report: {e}"))?;
    let artifacts = [
        (EXPLOITABLES_FILE, run.exploitables_sql()),
        (DROP_FILE, run.drop_script()),
        (ERRORS_FILE, run.errors_text()),
        (TEST_LOG_FILE, run.test_log_text()),
        (REPORT_FILE, report::build_report(run)),
        (REPORT_JSON_FILE, json),
    ];

    let mut written = Vec::with_capacity(artifacts.len());
    for (name, content) in artifacts {
        let path = output_dir.join(name);
        std::fs::write(&path, content)
            .map_err(|e| format!("Failed to write {}: {e}", path.display()))?;
        written.push(path);
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::candidate::key::CandidateKey;
    use crate::deploy::ledger::InstallKind;
    use crate::resolution::variants::Signature;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn unique_path(prefix: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock should be monotonic")
            .as_nanos();
        std::env::temp_dir().join(format!("{prefix}_{nanos}"))
    }

    #[test]
    fn write_output_requires_an_existing_directory() {
        let missing = unique_path("pgshadow_formatter_missing");
        let err = write_output(&missing, &RunReport::new("proxy"))
            .expect_err("missing directory should be rejected");
        assert!(err.contains("does not exist"), "got {err}");

        let file = unique_path("pgshadow_formatter_file");
        std::fs::write(&file, "not a directory").expect("should create marker file");
        let err = write_output(&file, &RunReport::new("proxy"))
            .expect_err("a file is not an output directory");
        assert!(err.contains("is not a directory"), "got {err}");
    }

    #[test]
    fn write_output_writes_all_artifacts_on_success() {
        let dir = unique_path("pgshadow_formatter_ok");
        std::fs::create_dir_all(&dir).expect("should create temp directory");

        let key = CandidateKey::new("public", "lower", Signature::new(["varchar"]));
        let mut run = RunReport::new("proxy");
        run.ledger.record(
            &key,
            InstallKind::Exploit,
            r#"DROP FUNCTION IF EXISTS public."lower"(character varying)"#,
        );
        run.deployed.push(key);
        run.test_log.push("1 candidate functions".to_string());

        let written = write_output(&dir, &run).expect("write_output should succeed");
        assert_eq!(written.len(), 6);

        let drops = std::fs::read_to_string(dir.join(DROP_FILE)).expect("drop file should exist");
        let exploitables = std::fs::read_to_string(dir.join(EXPLOITABLES_FILE))
            .expect("exploitables file should exist");
        let log = std::fs::read_to_string(dir.join(TEST_LOG_FILE)).expect("log should exist");
        let json: serde_json::Value = serde_json::from_str(
            &std::fs::read_to_string(dir.join(REPORT_JSON_FILE)).expect("json should exist"),
        )
        .expect("report.json should be valid JSON");

        assert_eq!(
            drops,
            "DROP FUNCTION IF EXISTS public.\"lower\"(character varying);\n"
        );
        assert_eq!(exploitables, "");
        assert_eq!(log, "1 candidate functions\n");
        assert_eq!(json["deployed"][0]["name"], "lower");
        assert_eq!(json["outcome"], "Completed");
    }
}
