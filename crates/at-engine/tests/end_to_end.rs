//! End-to-end searches against small shell-script generators and solutions.
#![cfg(unix)]

use at_engine::logging::init_test_logging;
use at_engine::{
    load_tasks, parse_task_table, write_report, EvaluatorConfig, FileSink, Generator,
    GeneratorConfig, SearchConfig, SearchDriver,
};
use at_optimizer::{build_sampler, SamplerConfig, TaskState};
use at_types::{AtError, ParamValue, ParameterKind, ProcessError, ProtocolError, SearchError};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Asks for `n` unless it was passed as `-Pn`, then prints it.
const INT_GENERATOR: &str = r#"#!/bin/sh
n=""
while [ $# -gt 0 ]; do
  case "$1" in
    -Pn) n="$2"; shift 2 ;;
    *) shift ;;
  esac
done
if [ -z "$n" ]; then
  echo "TU_PARAM_REQ n (type int min 0 max 10)"
  read n
fi
echo "$n"
"#;

/// Echoes its input as the answer and as the objective.
const ECHO_SOLUTION: &str = r#"#!/bin/sh
read n
echo "$n"
echo "$n" >&2
"#;

fn script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, body).unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    path
}

fn driver(generator: &Path, solution: &Path, n_iterations: usize) -> SearchDriver {
    SearchDriver::new(
        GeneratorConfig::new(generator),
        EvaluatorConfig::new(solution),
        SearchConfig::default().with_iterations(n_iterations),
    )
}

fn seeded(seed: u64) -> Box<dyn at_optimizer::Sampler> {
    build_sampler(&SamplerConfig::default().with_seed(Some(seed))).unwrap()
}

#[tokio::test]
async fn search_hits_integer_target() {
    init_test_logging();
    let dir = TempDir::new().unwrap();
    let generator = script(dir.path(), "gen", INT_GENERATOR);
    let solution = script(dir.path(), "sol", ECHO_SOLUTION);
    let out = dir.path().join("out");

    let tasks = parse_task_table("# G0\ncase1 5.0\n").unwrap();
    let mut sampler = seeded(7);
    let mut sink = FileSink::new(&out);

    let statuses = driver(&generator, &solution, 80)
        .run(&tasks, sampler.as_mut(), &mut sink)
        .await
        .unwrap();

    let status = &statuses[0];
    assert_eq!(status.state, TaskState::Completed);
    assert_eq!(status.trials_completed, 80);
    let best = status.best.as_ref().unwrap();
    assert_eq!(best.loss, 0.0);
    assert_eq!(best.artifact, "5\n");
    assert_eq!(best.feed.get("n"), Some(&ParamValue::Int(5)));

    let history = &sampler.context().history;
    assert_eq!(history.len(), 80);
    assert!(history.records().iter().all(|r| best.loss <= r.loss));

    assert_eq!(fs::read_to_string(out.join("case1.in")).unwrap(), "5\n");
    assert_eq!(fs::read_to_string(out.join("case1.ok")).unwrap(), "5\n");
}

#[tokio::test]
async fn registry_and_history_carry_across_tasks() {
    init_test_logging();
    let dir = TempDir::new().unwrap();
    let generator = script(dir.path(), "gen", INT_GENERATOR);
    let solution = script(dir.path(), "sol", ECHO_SOLUTION);
    let out = dir.path().join("out");

    let tasks = parse_task_table("#  G0\nlow 1.0\nhigh 9.0\n").unwrap();
    let mut sampler = seeded(11);
    let mut sink = FileSink::new(&out).with_patterns("{name}.txt", "{name}.a");

    let statuses = driver(&generator, &solution, 40)
        .run(&tasks, sampler.as_mut(), &mut sink)
        .await
        .unwrap();

    assert_eq!(statuses.len(), 2);
    let context = sampler.context();
    assert_eq!(context.history.len(), 80);
    assert_eq!(context.registry.len(), 1);
    assert_eq!(
        context.registry.get("n").map(|p| &p.kind),
        Some(&ParameterKind::Integer { min: 0, max: 10 })
    );

    // Each task's best only competes with that task's own trials.
    let second_best = statuses[1].best.as_ref().unwrap();
    assert!(second_best.trial_number >= 40);
    assert!(context.history.records()[40..].iter().all(|r| second_best.loss <= r.loss));

    assert!(out.join("low.txt").exists());
    assert!(out.join("high.a").exists());
}

#[tokio::test]
async fn pinned_columns_bypass_requests() {
    init_test_logging();
    let dir = TempDir::new().unwrap();
    let generator = script(dir.path(), "gen", INT_GENERATOR);
    let solution = script(dir.path(), "sol", ECHO_SOLUTION);
    let table = dir.path().join("tests.txt");
    fs::write(&table, "#   G0   n\na   3.0  3\nb   4.0  7\n").unwrap();

    let tasks = load_tasks(&table).unwrap();
    let mut sampler = seeded(3);
    let mut sink = FileSink::new(dir.path().join("out"));

    let statuses = driver(&generator, &solution, 2)
        .run(&tasks, sampler.as_mut(), &mut sink)
        .await
        .unwrap();

    let a = statuses[0].best.as_ref().unwrap();
    assert_eq!(a.artifact, "3\n");
    assert_eq!(a.loss, 0.0);
    let b = statuses[1].best.as_ref().unwrap();
    assert_eq!(b.artifact, "7\n");
    assert_eq!(b.loss, 3.0);

    // The generator never had to ask for `n`.
    assert!(sampler.context().registry.is_empty());
}

#[tokio::test]
async fn objective_length_mismatch_aborts_run() {
    init_test_logging();
    let dir = TempDir::new().unwrap();
    let generator = script(dir.path(), "gen", INT_GENERATOR);
    let solution = script(
        dir.path(),
        "sol",
        "#!/bin/sh\nread n\necho \"$n\"\necho \"$n $n\" >&2\n",
    );
    let out = dir.path().join("out");

    let tasks = parse_task_table("# G0\nfirst 5\nsecond 6\n").unwrap();
    let mut sampler = seeded(5);
    let mut sink = FileSink::new(&out);

    let err = driver(&generator, &solution, 5)
        .run(&tasks, sampler.as_mut(), &mut sink)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        AtError::Search(SearchError::ContractMismatch { expected: 1, actual: 2 })
    ));
    assert!(!out.join("first.in").exists());
    assert!(!out.join("second.in").exists());
}

#[tokio::test]
async fn generator_exit_code_is_reported() {
    init_test_logging();
    let dir = TempDir::new().unwrap();
    let generator = script(dir.path(), "gen", "#!/bin/sh\necho 1\nexit 3\n");
    let solution = script(dir.path(), "sol", ECHO_SOLUTION);

    let tasks = parse_task_table("# G0\ncase1 1\n").unwrap();
    let err = driver(&generator, &solution, 3)
        .search_task(&tasks[0], seeded(1).as_mut())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        AtError::Process(ProcessError::GeneratorFailure { code: Some(3) })
    ));
}

#[tokio::test]
async fn malformed_payload_is_protocol_error() {
    init_test_logging();
    let dir = TempDir::new().unwrap();
    let pid_file = dir.path().join("gen.pid");
    let generator = script(
        dir.path(),
        "gen",
        &format!(
            "#!/bin/sh\necho $$ > '{}'\n{}\nread n\necho \"$n\"\n",
            pid_file.display(),
            "echo \"TU_PARAM_REQ n (type int min 10 max 1)\""
        ),
    );
    let solution = script(dir.path(), "sol", ECHO_SOLUTION);

    let tasks = parse_task_table("# G0\ncase1 1\n").unwrap();
    let err = driver(&generator, &solution, 3)
        .search_task(&tasks[0], seeded(1).as_mut())
        .await
        .unwrap_err();

    assert!(matches!(err, AtError::Protocol(ProtocolError::MalformedSpec { .. })));

    // The generator was blocked on `read`; it must have been killed and reaped.
    let pid = fs::read_to_string(&pid_file).unwrap();
    let alive = std::process::Command::new("/bin/sh")
        .arg("-c")
        .arg(format!("kill -0 {}", pid.trim()))
        .status()
        .unwrap();
    assert!(!alive.success(), "generator {} is still running", pid.trim());
}

#[tokio::test]
async fn generator_that_stops_reading_reports_exit_code() {
    init_test_logging();
    let dir = TempDir::new().unwrap();
    let generator = script(
        dir.path(),
        "gen",
        "#!/bin/sh\necho \"TU_PARAM_REQ n (type int min 0 max 10)\"\nexec 0<&-\nexit 4\n",
    );

    let mut rng = StdRng::seed_from_u64(1);
    let err = Generator::new(GeneratorConfig::new(&generator))
        .discover(&mut rng)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        AtError::Process(ProcessError::GeneratorFailure { code: Some(4) })
    ));
    assert!(err.is_trial_local());
}

#[tokio::test]
async fn failing_solution_is_solution_failure() {
    init_test_logging();
    let dir = TempDir::new().unwrap();
    let generator = script(dir.path(), "gen", INT_GENERATOR);
    let solution = script(
        dir.path(),
        "sol",
        "#!/bin/sh\nread n\necho \"$n\"\necho \"$n\" >&2\nexit 2\n",
    );

    let tasks = parse_task_table("# G0\ncase1 1\n").unwrap();
    let mut sampler = seeded(1);
    let err = driver(&generator, &solution, 3)
        .search_task(&tasks[0], sampler.as_mut())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        AtError::Process(ProcessError::SolutionFailure { .. })
    ));
    assert!(sampler.context().history.is_empty());
}

#[tokio::test]
async fn solution_may_ignore_its_input() {
    init_test_logging();
    let dir = TempDir::new().unwrap();
    let generator = script(dir.path(), "gen", INT_GENERATOR);
    let solution = script(dir.path(), "sol", "#!/bin/sh\nexec 0<&-\necho 1\necho 1 >&2\n");

    let tasks = parse_task_table("# G0\ncase1 1\n").unwrap();
    let status = driver(&generator, &solution, 3)
        .search_task(&tasks[0], seeded(1).as_mut())
        .await
        .unwrap();

    let best = status.best.unwrap();
    assert_eq!(best.loss, 0.0);
    assert_eq!(best.answer, "1\n");
    assert_eq!(status.trials_completed, 3);
}

#[tokio::test]
async fn uniform_sampling_hits_integer_target() {
    init_test_logging();
    let dir = TempDir::new().unwrap();
    let generator = script(dir.path(), "gen", INT_GENERATOR);
    let solution = script(dir.path(), "sol", ECHO_SOLUTION);
    let out = dir.path().join("out");

    let tasks = parse_task_table("# G0\ncase1 5.0\n").unwrap();
    let mut sampler = build_sampler(&SamplerConfig::new("random").with_seed(Some(13))).unwrap();
    let mut sink = FileSink::new(&out);

    let statuses = driver(&generator, &solution, 150)
        .run(&tasks, sampler.as_mut(), &mut sink)
        .await
        .unwrap();

    let best = statuses[0].best.as_ref().unwrap();
    assert_eq!(sampler.name(), "random");
    assert_eq!(best.loss, 0.0);
    assert_eq!(best.artifact, "5\n");
    assert_eq!(sampler.context().history.len(), 150);
    assert_eq!(fs::read_to_string(out.join("case1.in")).unwrap(), "5\n");
}

#[tokio::test]
async fn slow_solution_times_out() {
    init_test_logging();
    let dir = TempDir::new().unwrap();
    let generator = script(dir.path(), "gen", INT_GENERATOR);
    let solution = script(dir.path(), "sol", "#!/bin/sh\nexec sleep 5\n");

    let driver = SearchDriver::new(
        GeneratorConfig::new(&generator),
        EvaluatorConfig::new(&solution).with_timeout_ms(200),
        SearchConfig::default().with_iterations(3),
    );
    let tasks = parse_task_table("# G0\ncase1 1\n").unwrap();
    let mut sampler = seeded(1);

    let err = driver.search_task(&tasks[0], sampler.as_mut()).await.unwrap_err();
    assert!(matches!(
        err,
        AtError::Process(ProcessError::SolutionTimeout { timeout_ms: 200 })
    ));
    assert!(sampler.context().history.is_empty());
}

#[tokio::test]
async fn legacy_json_payloads_are_answered() {
    init_test_logging();
    let dir = TempDir::new().unwrap();
    let generator = script(
        dir.path(),
        "gen",
        r#"#!/bin/sh
echo 'TU_PARAM_REQ x {"type": "FLOAT", "min": 0.0, "max": 2.0}'
read x
echo 'TU_PARAM_REQ mode {"type": "CHOICE", "choices": ["a", "b"]}'
read mode
echo "$x $mode"
"#,
    );
    let solution = script(
        dir.path(),
        "sol",
        "#!/bin/sh\nread x mode\necho \"$mode\"\necho \"$x\" >&2\n",
    );

    let tasks = parse_task_table("# G0\ncase1 1.0\n").unwrap();
    let mut sampler = seeded(9);
    let status = driver(&generator, &solution, 30)
        .search_task(&tasks[0], sampler.as_mut())
        .await
        .unwrap();

    let best = status.best.unwrap();
    let x = best.feed.get("x").and_then(ParamValue::as_f64).unwrap();
    assert!((0.0..=2.0).contains(&x));
    assert!(matches!(best.feed.get("mode"), Some(ParamValue::Text(m)) if m == "a" || m == "b"));
    assert!(best.answer == "a\n" || best.answer == "b\n");
    assert_eq!(sampler.context().registry.len(), 2);
}

#[tokio::test]
async fn discovery_reports_declared_parameters() {
    init_test_logging();
    let dir = TempDir::new().unwrap();
    let generator = script(dir.path(), "gen", INT_GENERATOR);

    let mut rng = StdRng::seed_from_u64(42);
    let (registry, feed) = Generator::new(GeneratorConfig::new(&generator))
        .discover(&mut rng)
        .await
        .unwrap();

    assert_eq!(registry.names().collect::<Vec<_>>(), vec!["n"]);
    let n = feed.get("n").and_then(ParamValue::as_i64).unwrap();
    assert!((0..=10).contains(&n));
}

#[tokio::test]
async fn report_summarizes_each_task() {
    init_test_logging();
    let dir = TempDir::new().unwrap();
    let generator = script(dir.path(), "gen", INT_GENERATOR);
    let solution = script(dir.path(), "sol", ECHO_SOLUTION);

    let tasks = parse_task_table("# G0\nonly 2.0\n").unwrap();
    let mut sampler = seeded(2);
    let mut sink = FileSink::new(dir.path().join("out"));
    let statuses = driver(&generator, &solution, 5)
        .run(&tasks, sampler.as_mut(), &mut sink)
        .await
        .unwrap();

    let report = dir.path().join("report.json");
    write_report(&report, &statuses).unwrap();

    let json: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&report).unwrap()).unwrap();
    let entry = &json.as_array().unwrap()[0];
    assert_eq!(entry["task_id"], "only");
    assert_eq!(entry["trials"], 5);
}
