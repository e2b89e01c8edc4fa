use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tempfile::TempDir;

fn chatmem_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("chatmem");
    path
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let exports_dir = root.join("exports");
    fs::create_dir_all(&exports_dir).unwrap();
    fs::write(
        exports_dir.join("result.json"),
        r#"[
  {"id": 100, "name": "Hiking Club", "type": "private_group", "messages": [
    {"id": 1, "type": "message", "date": "2024-03-01T09:00:00", "date_unixtime": "1709283600",
     "from": "Alice", "from_id": "user1", "text": "Who is coming to the ridge trail on Saturday?"},
    {"id": 2, "type": "message", "date": "2024-03-01T09:05:00", "date_unixtime": "1709283900",
     "from": "Bob", "from_id": "user2", "text": ["I am, ", {"type": "bold", "text": "bringing snacks"}]},
    {"id": 3, "type": "service", "date": "2024-03-01T09:06:00", "actor": "Carol", "action": "join_group_by_link"},
    {"id": 4, "type": "message", "date": "2024-03-02T18:00:00", "date_unixtime": "1709402400",
     "from": "Carol", "from_id": "user3", "text": "Photos from the summit are up"}
  ]},
  {"id": 200, "name": "Mum", "type": "personal_chat", "messages": [
    {"id": 1, "type": "message", "date": "2024-03-03T12:00:00", "date_unixtime": "1709467200",
     "from": "Mum", "from_id": "user9", "text": "Call me when you land"}
  ]}
]"#,
    )
    .unwrap();

    let config_content = format!(
        r#"[db]
path = "{root}/data/chatmem.sqlite"

[index]
path = "{root}/data/index.sqlite"

[chunking]
max_tokens = 1500

[embedding]
provider = "disabled"

[scheduler]
interval_mins = 0
"#,
        root = root.display()
    );

    let config_path = config_dir.join("chatmem.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_chatmem(config: &Path, args: &[&str]) -> Output {
    Command::new(chatmem_binary())
        .arg("--config")
        .arg(config)
        .args(["--progress", "off"])
        .args(args)
        .output()
        .expect("failed to run chatmem")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).to_string()
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).to_string()
}

#[test]
fn test_init_is_idempotent() {
    let (tmp, config) = setup_test_env();

    let first = run_chatmem(&config, &["init"]);
    assert!(first.status.success(), "init failed: {}", stderr(&first));
    assert!(stdout(&first).contains("initialized"));
    assert!(tmp.path().join("data/chatmem.sqlite").exists());

    let second = run_chatmem(&config, &["init"]);
    assert!(second.status.success(), "second init failed: {}", stderr(&second));
}

#[test]
fn test_import_chunk_and_stats() {
    let (tmp, config) = setup_test_env();
    let export = tmp.path().join("exports/result.json");
    let export = export.to_str().unwrap();

    run_chatmem(&config, &["init"]);

    let import = run_chatmem(&config, &["import", export]);
    assert!(import.status.success(), "import failed: {}", stderr(&import));
    let out = stdout(&import);
    assert!(out.contains("Imported 4 messages from 2 conversations"), "{}", out);

    let again = run_chatmem(&config, &["import", export]);
    assert!(stdout(&again).contains("Imported 0 messages"), "{}", stdout(&again));

    let chunk = run_chatmem(&config, &["chunk"]);
    assert!(chunk.status.success(), "chunk failed: {}", stderr(&chunk));
    assert!(stdout(&chunk).contains("Chunked 2 conversations"), "{}", stdout(&chunk));

    let rechunk = run_chatmem(&config, &["chunk"]);
    assert!(stdout(&rechunk).contains("Chunked 0 conversations"), "{}", stdout(&rechunk));

    let stats = run_chatmem(&config, &["stats"]);
    assert!(stats.status.success(), "stats failed: {}", stderr(&stats));
    let out = stdout(&stats);
    assert!(out.contains("Conversations:   2"), "{}", out);
    assert!(out.contains("Messages:        4"), "{}", out);
    assert!(out.contains("Unchunked:       0"), "{}", out);
    assert!(out.contains("Hiking Club"), "{}", out);
}

#[test]
fn test_run_records_pipeline_in_log() {
    let (tmp, config) = setup_test_env();
    let export = tmp.path().join("exports");

    run_chatmem(&config, &["init"]);

    let run = run_chatmem(&config, &["run", export.to_str().unwrap()]);
    assert!(run.status.success(), "run failed: {}", stderr(&run));
    let report: serde_json::Value = serde_json::from_slice(&run.stdout).unwrap();
    assert_eq!(report["import"]["messages_added"], 4);
    assert!(report["sync"].is_null());

    let log = run_chatmem(&config, &["log"]);
    assert!(log.status.success(), "log failed: {}", stderr(&log));
    let out = stdout(&log);
    assert!(out.contains("pipeline"), "{}", out);
    assert!(out.contains("success"), "{}", out);
}

#[test]
fn test_exclude_unknown_conversation_fails() {
    let (_tmp, config) = setup_test_env();
    run_chatmem(&config, &["init"]);

    let output = run_chatmem(&config, &["exclude", "nope"]);
    assert!(!output.status.success());
    assert!(stderr(&output).contains("Unknown conversation"));
}

#[test]
fn test_embedding_commands_require_provider() {
    let (_tmp, config) = setup_test_env();
    run_chatmem(&config, &["init"]);

    let search = run_chatmem(&config, &["search", "summit photos"]);
    assert!(!search.status.success());
    assert!(stderr(&search).contains("Search requires embeddings"));

    let sync = run_chatmem(&config, &["embed", "sync"]);
    assert!(!sync.status.success());

    let watch = run_chatmem(&config, &["watch", "."]);
    assert!(!watch.status.success());
    assert!(stderr(&watch).contains("Auto-sync is disabled"));
}

#[test]
fn test_missing_config_fails() {
    let output = Command::new(chatmem_binary())
        .args(["--config", "/nonexistent/chatmem.toml", "stats"])
        .output()
        .expect("failed to run chatmem");
    assert!(!output.status.success());
}
