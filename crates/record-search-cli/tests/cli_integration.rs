use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::time::{SystemTime, UNIX_EPOCH};

use rusqlite::Connection;
use serde_json::Value;

const CATALOG_YAML: &str = r"
tables:
  band:
    display: band_name
    ordering: [band_name]
    columns:
      band_name: text
      beschreibung: text
      jahr: integer
    relations:
      bandalias: { kind: one_to_many, target: bandalias, remote_column: band_id }
  bandalias:
    columns:
      alias: text
record_types:
  band:
    table: band
    search:
      search_fields: [band_name, bandalias.alias, beschreibung]
      primary_search_fields: [band_name]
      suffixes:
        bandalias.alias: Band-Alias
        beschreibung: Beschreibung
";

const SEED_SQL: &str = r"
CREATE TABLE band (id INTEGER PRIMARY KEY, band_name TEXT NOT NULL, beschreibung TEXT, jahr INTEGER);
CREATE TABLE bandalias (id INTEGER PRIMARY KEY, band_id INTEGER NOT NULL REFERENCES band(id), alias TEXT);
INSERT INTO band (id, band_name, beschreibung, jahr) VALUES
  (1, 'Guns ''N Roses', NULL, 1985),
  (2, 'AC/DC', '', 1973),
  (3, 'Acid House Kings', NULL, 1991),
  (4, 'More Roses', 'Tribute to Guns ''N Roses', 1985);
INSERT INTO bandalias (band_id, alias) VALUES (1, 'Guns and Roses'), (1, 'GNR'), (2, 'ACDC');
";

struct Fixture {
    dir: PathBuf,
}

impl Fixture {
    fn new(prefix: &str) -> Self {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_else(|err| panic!("clock should be >= UNIX_EPOCH: {err}"))
            .as_nanos();
        let dir = std::env::temp_dir().join(format!("{prefix}-{now}"));
        fs::create_dir_all(&dir)
            .unwrap_or_else(|err| panic!("failed to create temp dir {}: {err}", dir.display()));

        fs::write(dir.join("catalog.yaml"), CATALOG_YAML)
            .unwrap_or_else(|err| panic!("failed to write catalog: {err}"));
        let conn = Connection::open(dir.join("records.sqlite3"))
            .unwrap_or_else(|err| panic!("failed to create database: {err}"));
        conn.execute_batch(SEED_SQL).unwrap_or_else(|err| panic!("failed to seed database: {err}"));
        Self { dir }
    }

    fn db(&self) -> PathBuf {
        self.dir.join("records.sqlite3")
    }

    fn catalog(&self) -> PathBuf {
        self.dir.join("catalog.yaml")
    }

    fn args(&self, args: &[&str]) -> Vec<String> {
        let mut full = vec![
            "--db".to_string(),
            path_str(&self.db()).to_string(),
            "--catalog".to_string(),
            path_str(&self.catalog()).to_string(),
        ];
        full.extend(args.iter().map(ToString::to_string));
        full
    }

    fn run(&self, args: &[&str]) -> Output {
        run_recsearch(self.args(args))
    }

    fn run_json(&self, args: &[&str]) -> Value {
        let output = self.run(args);
        if !output.status.success() {
            let stdout = String::from_utf8_lossy(&output.stdout);
            let stderr = String::from_utf8_lossy(&output.stderr);
            panic!(
                "recsearch command failed (status={}):\nstdout:\n{}\nstderr:\n{}",
                output.status, stdout, stderr
            );
        }

        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        serde_json::from_str(&stdout)
            .unwrap_or_else(|err| panic!("stdout is not valid JSON: {err}\nstdout:\n{stdout}"))
    }
}

impl Drop for Fixture {
    fn drop(&mut self) {
        let _ = fs::remove_dir_all(&self.dir);
    }
}

fn run_recsearch<I, S>(args: I) -> Output
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    Command::new(env!("CARGO_BIN_EXE_recsearch"))
        .args(args)
        .env_remove("RECSEARCH_LOG")
        .output()
        .unwrap_or_else(|err| panic!("failed to execute recsearch binary: {err}"))
}

fn path_str(path: &Path) -> &str {
    path.to_str().unwrap_or_else(|| panic!("path should be valid UTF-8: {}", path.display()))
}

fn results(payload: &Value) -> &Vec<Value> {
    payload
        .get("results")
        .and_then(Value::as_array)
        .unwrap_or_else(|| panic!("missing results in payload: {payload}"))
}

fn result_ids(payload: &Value) -> Vec<i64> {
    results(payload)
        .iter()
        .map(|item| {
            item.get("record_id")
                .and_then(Value::as_i64)
                .unwrap_or_else(|| panic!("missing record_id in result: {item}"))
        })
        .collect()
}

fn result_labels(payload: &Value) -> Vec<&str> {
    results(payload)
        .iter()
        .map(|item| {
            item.get("label")
                .and_then(Value::as_str)
                .unwrap_or_else(|| panic!("missing label in result: {item}"))
        })
        .collect()
}

#[test]
fn search_splits_strong_and_weak_hits() {
    let fixture = Fixture::new("recsearch-search");
    let payload = fixture.run_json(&["search", "--type", "band", "--query", "guns"]);

    assert_eq!(payload["contract_version"], "cli.v1");
    assert_eq!(payload["strategy"], "primary_fields");
    assert_eq!(payload["exact_match"], false);
    assert_eq!(result_ids(&payload), vec![1, 0, 4]);
    assert_eq!(
        result_labels(&payload),
        vec!["Guns 'N Roses", "------- weak hits for \"guns\" -------", "More Roses (Beschreibung)"]
    );
    assert_eq!(results(&payload)[1]["is_separator"], true);
}

#[test]
fn search_reports_exact_matches_on_primary_fields() {
    let fixture = Fixture::new("recsearch-exact");
    let payload = fixture.run_json(&["search", "--type", "band", "--query", "GUNS 'n roses"]);

    assert_eq!(payload["exact_match"], true);
    assert_eq!(result_ids(&payload)[0], 1);
}

#[test]
fn search_flags_override_the_catalog() {
    let fixture = Fixture::new("recsearch-flags");

    let alias = fixture.run_json(&["search", "--type", "band", "--query", "gnr", "--no-suffix"]);
    assert_eq!(result_labels(&alias), vec!["Guns 'N Roses"]);

    let cached = fixture.run_json(&[
        "search",
        "--type",
        "band",
        "--query",
        "Roses More",
        "--in-memory",
        "--name-field",
        "band_name",
    ]);
    assert_eq!(cached["strategy"], "values_dict");
    assert_eq!(result_ids(&cached), vec![4]);

    let ordered = fixture.run_json(&[
        "search", "--type", "band", "--query", "roses", "--strategy", "base", "--ordered",
    ]);
    assert_eq!(ordered["strategy"], "base");
    assert_eq!(result_ids(&ordered), vec![1, 4]);
}

#[test]
fn empty_query_lists_every_record() {
    let fixture = Fixture::new("recsearch-empty");
    let payload = fixture.run_json(&["search", "--type", "band"]);

    assert_eq!(result_ids(&payload), vec![2, 3, 1, 4]);
    assert_eq!(payload["exact_match"], false);
}

#[test]
fn duplicates_groups_records_sharing_values() {
    let fixture = Fixture::new("recsearch-duplicates");
    let payload = fixture.run_json(&[
        "duplicates", "--type", "band", "--field", "jahr", "--display", "band_name",
    ]);

    assert_eq!(payload["group_count"], 1);
    let group = &payload["groups"][0];
    assert_eq!(group["members"], serde_json::json!([1, 4]));
    assert_eq!(group["shared_values"]["jahr"], serde_json::json!([1985]));
    assert_eq!(group["display_values"]["4"]["band_name"], serde_json::json!(["More Roses"]));
}

#[test]
fn fields_describes_the_search_configuration() {
    let fixture = Fixture::new("recsearch-fields");
    let payload = fixture.run_json(&["fields", "--type", "band"]);

    assert_eq!(payload["table"], "band");
    assert_eq!(payload["strategy"], "primary_fields");
    let fields = payload["fields"]
        .as_array()
        .unwrap_or_else(|| panic!("missing fields in payload: {payload}"));
    assert_eq!(fields.len(), 3);
    assert_eq!(fields[0]["field"], "band_name");
    assert_eq!(fields[0]["role"], "primary");
    assert_eq!(fields[1]["field"], "bandalias.alias");
    assert_eq!(fields[1]["info"]["to_many"], true);
    assert_eq!(payload["suffixes"]["beschreibung"], "Beschreibung");
}

#[test]
fn errors_exit_non_zero_with_context() {
    let fixture = Fixture::new("recsearch-errors");

    let unknown_type = fixture.run(&["search", "--type", "platte", "--query", "x"]);
    assert!(!unknown_type.status.success());
    assert!(String::from_utf8_lossy(&unknown_type.stderr).contains("platte"));

    let bad_path = fixture.run(&["duplicates", "--type", "band", "--field", "jahr..x"]);
    assert!(!bad_path.status.success());
    assert!(String::from_utf8_lossy(&bad_path.stderr).contains("jahr..x"));

    let unknown_field = fixture.run(&["duplicates", "--type", "band", "--field", "nope"]);
    assert!(!unknown_field.status.success());
    assert!(String::from_utf8_lossy(&unknown_field.stderr).contains("nope"));

    fs::write(fixture.catalog(), CATALOG_YAML.replace("jahr: integer", "gruendung: date"))
        .unwrap_or_else(|err| panic!("failed to rewrite catalog: {err}"));
    let stale_schema = fixture.run(&["fields", "--type", "band"]);
    assert!(!stale_schema.status.success());
    assert!(String::from_utf8_lossy(&stale_schema.stderr).contains("band.gruendung"));
}

#[test]
fn logs_go_to_stderr_and_keep_stdout_json() {
    let fixture = Fixture::new("recsearch-logging");
    let output = Command::new(env!("CARGO_BIN_EXE_recsearch"))
        .args(fixture.args(&["search", "--type", "band", "--query", "guns"]))
        .env("RECSEARCH_LOG", "info")
        .output()
        .unwrap_or_else(|err| panic!("failed to execute recsearch binary: {err}"));
    assert!(output.status.success());

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("primary_fields search"), "missing search log:\n{stderr}");
    let stdout = String::from_utf8_lossy(&output.stdout);
    let payload: Value = serde_json::from_str(stdout.trim())
        .unwrap_or_else(|err| panic!("stdout is not valid JSON: {err}\nstdout:\n{stdout}"));
    assert_eq!(payload["contract_version"], "cli.v1");

    let quiet = fixture.run(&["search", "--type", "band", "--query", "guns"]);
    assert!(!String::from_utf8_lossy(&quiet.stderr).contains("primary_fields search"));
}
