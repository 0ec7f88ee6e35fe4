use serde_json::json;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tempfile::tempdir;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn flowscribe_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_flowscribe"))
}

/// A command isolated from the developer's environment: no API key, no
/// config or .env files outside `home`.
fn isolated_command(home: &Path, args: &[&str]) -> Command {
    let mut cmd = Command::new(flowscribe_binary());
    cmd.args(args)
        .current_dir(home)
        .env("HOME", home)
        .env("XDG_CONFIG_HOME", home.join(".config"))
        .env("NO_COLOR", "1")
        .env_remove("OPENAI_API_KEY")
        .env_remove("OPENAI_API_BASE")
        .env_remove("RUST_LOG");
    cmd
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).to_string()
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).to_string()
}

fn write_flow(dir: &Path) -> PathBuf {
    let flow = json!({
        "name": "Add Item to Cart",
        "uploadId": "cli-1",
        "steps": [
            {
                "id": "s1", "type": "CHAPTER", "title": "Start",
                "clickContext": { "text": "Search", "elementType": "button" },
                "pageContext": { "title": "Target", "url": "https://www.target.com" }
            },
            {
                "id": "s2", "type": "IMAGE",
                "clickContext": { "text": "Add to cart", "elementType": "button" }
            }
        ]
    });
    let path = dir.join("flow.json");
    std::fs::write(&path, serde_json::to_string_pretty(&flow).unwrap()).unwrap();
    path
}

mod argument_tests {
    use super::*;

    #[test]
    fn test_help_lists_flags() {
        let dir = tempdir().unwrap();
        let output = isolated_command(dir.path(), &["--help"]).output().unwrap();
        let out = stdout(&output);

        assert!(output.status.success());
        for flag in [
            "--skip-image",
            "--output-dir",
            "--cache-dir",
            "--no-cache",
            "--clear-cache",
            "--fail-fast",
            "--concurrency",
        ] {
            assert!(out.contains(flag), "help should mention {}", flag);
        }
    }

    #[test]
    fn test_version() {
        let dir = tempdir().unwrap();
        let output = isolated_command(dir.path(), &["--version"]).output().unwrap();

        assert!(output.status.success());
        assert!(stdout(&output).contains("flowscribe"));
    }

    #[test]
    fn test_flow_file_is_required() {
        let dir = tempdir().unwrap();
        let output = isolated_command(dir.path(), &[]).output().unwrap();
        assert!(!output.status.success());
    }

    #[test]
    fn test_invalid_concurrency_value() {
        let dir = tempdir().unwrap();
        let output = isolated_command(dir.path(), &["flow.json", "--concurrency", "many"])
            .output()
            .unwrap();
        assert!(!output.status.success());
    }
}

mod failure_tests {
    use super::*;

    #[test]
    fn test_missing_flow_file() {
        let dir = tempdir().unwrap();
        let output = isolated_command(dir.path(), &["does-not-exist.json"])
            .output()
            .unwrap();

        assert_eq!(output.status.code(), Some(1));
        assert!(stderr(&output).contains("E1001"));
    }

    #[test]
    fn test_malformed_flow_file() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("bad.json"), "{ \"name\": ").unwrap();

        let output = isolated_command(dir.path(), &["bad.json"]).output().unwrap();

        assert_eq!(output.status.code(), Some(1));
        assert!(stderr(&output).contains("E1002"));
    }

    #[test]
    fn test_missing_api_key() {
        let dir = tempdir().unwrap();
        write_flow(dir.path());

        let output = isolated_command(dir.path(), &["flow.json", "--skip-image"])
            .output()
            .unwrap();

        assert_eq!(output.status.code(), Some(1));
        let err = stderr(&output);
        assert!(err.contains("E2001"));
        assert!(err.contains("OPENAI_API_KEY"));
    }

    #[test]
    fn test_zero_concurrency_is_rejected() {
        let dir = tempdir().unwrap();
        write_flow(dir.path());

        let output = isolated_command(dir.path(), &["flow.json", "--concurrency", "0"])
            .output()
            .unwrap();

        assert_eq!(output.status.code(), Some(1));
        assert!(stderr(&output).contains("E2002"));
    }
}

mod end_to_end_tests {
    use super::*;

    async fn run_cli(home: PathBuf, api_base: String, args: Vec<String>) -> Output {
        tokio::task::spawn_blocking(move || {
            let args: Vec<&str> = args.iter().map(String::as_str).collect();
            isolated_command(&home, &args)
                .env("OPENAI_API_KEY", "sk-test")
                .env("OPENAI_API_BASE", api_base)
                .output()
                .unwrap()
        })
        .await
        .unwrap()
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_report_written_and_second_run_cached() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{ "message": { "role": "assistant", "content": "Clicked on search bar" } }]
            })))
            // two steps plus one summary, and nothing on the second run
            .expect(3)
            .mount(&server)
            .await;

        let dir = tempdir().unwrap();
        write_flow(dir.path());
        let args: Vec<String> = ["flow.json", "--skip-image", "--output-dir", "out", "--cache-dir", "cache"]
            .iter()
            .map(|s| s.to_string())
            .collect();

        let first = run_cli(dir.path().to_path_buf(), server.uri(), args.clone()).await;
        assert!(first.status.success(), "stderr: {}", stderr(&first));
        assert!(stdout(&first).contains("Analysis complete"));

        let second = run_cli(dir.path().to_path_buf(), server.uri(), args).await;
        assert!(second.status.success(), "stderr: {}", stderr(&second));

        let reports: Vec<_> = std::fs::read_dir(dir.path().join("out"))
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().to_string())
            .filter(|n| n.ends_with(".md"))
            .collect();
        assert!(!reports.is_empty());
        assert!(reports
            .iter()
            .all(|n| n.starts_with("Flow_Analysis_Add_Item_to_Cart_cli-1_")));

        let md = std::fs::read_to_string(dir.path().join("out").join(&reports[0])).unwrap();
        assert!(md.contains("### 1. Clicked on search bar"));
        assert!(md.contains("**Upload ID:** cli-1"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_fail_fast_exits_nonzero() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({
                "error": { "message": "Incorrect API key provided" }
            })))
            .mount(&server)
            .await;

        let dir = tempdir().unwrap();
        write_flow(dir.path());
        let args = vec!["flow.json".to_string(), "--skip-image".to_string(), "--fail-fast".to_string()];

        let output = run_cli(dir.path().to_path_buf(), server.uri(), args).await;

        assert_eq!(output.status.code(), Some(1));
        assert!(stderr(&output).contains("E4001"));
        assert!(!dir.path().join("output").exists());
    }
}
