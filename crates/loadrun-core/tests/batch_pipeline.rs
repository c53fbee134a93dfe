//! End-to-end batch pipeline against the mock engine.

use loadrun_core::testing::{MockEngine, MockRun};
use loadrun_core::{
    BatchRunner, Config, Discovered, Executor, HOOK_MARKER, Selection, discover,
};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

const PLAIN: &str = "import http from 'k6/http';\nexport default function () { http.get(__ENV.BASE_URL); }\n";
const HOOKED: &str = "export default function () {}\nexport function handleSummary(data) { return {}; }\n";

fn config(root: &Path) -> Config {
    Config {
        base_url: "http://target:9000".to_string(),
        test_folder: Some(root.join("scripts")),
        scripts_dir: root.join("scripts"),
        reports_dir: root.join("reports"),
        output_dir: root.join("output"),
        project_name: "shop".to_string(),
        test_environment: "ci".to_string(),
        ..Config::default()
    }
}

fn hidden_files(dir: &Path) -> usize {
    fs::read_dir(dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().starts_with('.'))
        .count()
}

#[tokio::test]
async fn test_folder_batch_end_to_end() {
    let tmp = TempDir::new().unwrap();
    let scripts = tmp.path().join("scripts");
    fs::create_dir_all(&scripts).unwrap();
    fs::write(scripts.join("browse.js"), PLAIN).unwrap();
    fs::write(scripts.join("checkout.js"), HOOKED).unwrap();
    fs::write(scripts.join("notes.txt"), "ignored").unwrap();

    let config = config(tmp.path());
    let Discovered::Units(units) = discover(&Selection::from_config(&config)).unwrap() else {
        panic!("expected units");
    };
    assert_eq!(units.len(), 2);

    let engine = MockEngine::new(vec![MockRun::fail(99), MockRun::pass()]);
    let executor = Executor::new(
        Arc::new(engine.clone()),
        config.reports_dir.clone(),
        config.output_dir.clone(),
    );
    let result = BatchRunner::new(executor, config.clone())
        .run(units)
        .await
        .unwrap();

    assert_eq!(result.total(), 2);
    assert_eq!(result.passed(), 1);
    assert_eq!(result.failed(), 1);
    assert_eq!(result.exit_code(), 1);

    let executions = engine.executions();
    assert_eq!(executions.len(), 2);

    // The plain script was augmented with exactly one hook.
    let browse = &executions[0];
    assert_eq!(browse.script_content.matches(HOOK_MARKER).count(), 1);
    assert!(browse.script_content.contains(PLAIN));
    assert_eq!(browse.invocation.base_url, "http://target:9000");
    assert!(
        browse
            .invocation
            .tags
            .contains(&("environment".to_string(), "ci".to_string()))
    );

    // A script with its own hook runs unchanged.
    assert_eq!(executions[1].script_content, HOOKED);

    // Artifacts were written where the outcomes say.
    for outcome in result.outcomes() {
        assert!(outcome.artifacts.json_path.starts_with(&config.output_dir));
        assert!(outcome.artifacts_present.json);
    }
    assert!(result.outcomes()[0].artifacts_present.html);

    // Originals untouched, temporaries gone.
    assert_eq!(fs::read_to_string(scripts.join("browse.js")).unwrap(), PLAIN);
    assert_eq!(hidden_files(&scripts), 0);
}
