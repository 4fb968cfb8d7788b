//! Integration tests for the process execution layer.

use gantry_runner::{
    CommandConfig, CommandRunner, Invocation, MockResponse, MockRunner, OutputMode, RunConfig,
};

/// Test mock runner captures the full command configuration.
#[test]
fn test_mock_runner_captures_config() {
    let runner = MockRunner::new().add_response(MockResponse::success("deployed"));

    let config = CommandConfig::argv(["make", "deploy", "STAGE=prod"])
        .env("CI", "1")
        .workdir("/tmp");

    let result = runner.run(&config, &RunConfig::captured()).unwrap();
    assert!(result.success());
    assert_eq!(result.stdout, "deployed");

    let call = runner.last_call().unwrap();
    assert_eq!(
        call.config.invocation,
        Invocation::Argv(vec![
            "make".to_string(),
            "deploy".to_string(),
            "STAGE=prod".to_string(),
        ])
    );
    assert_eq!(call.config.env.get("CI"), Some(&"1".to_string()));
    assert_eq!(call.config.workdir, Some(std::path::PathBuf::from("/tmp")));
    assert_eq!(call.run_config.output, OutputMode::Capture);
}

#[cfg(unix)]
mod local {
    use gantry_runner::{CommandConfig, CommandRunner, LocalRunner, RunConfig};

    #[test]
    fn test_shell_sees_environment_layers() {
        let runner = LocalRunner::new();
        let config = CommandConfig::shell("/bin/sh", "echo \"$GANTRY_A-$GANTRY_B\"")
            .env("GANTRY_A", "one")
            .env("GANTRY_B", "two");

        let result = runner.run(&config, &RunConfig::captured()).unwrap();
        assert!(result.success());
        assert_eq!(result.stdout.trim(), "one-two");
    }

    #[test]
    fn test_workdir_is_applied() {
        let dir = tempfile::tempdir().unwrap();
        let runner = LocalRunner::new();
        let config = CommandConfig::argv(["pwd"]).workdir(dir.path());

        let result = runner.run(&config, &RunConfig::captured()).unwrap();
        let expected = dir.path().canonicalize().unwrap();
        let actual = std::path::PathBuf::from(result.stdout.trim())
            .canonicalize()
            .unwrap();
        assert_eq!(actual, expected);
    }

    #[test]
    fn test_non_zero_exit_is_a_result_not_an_error() {
        let runner = LocalRunner::new();
        let result = runner
            .run(
                &CommandConfig::shell("/bin/sh", "echo nope >&2; exit 42"),
                &RunConfig::captured(),
            )
            .unwrap();

        assert_eq!(result.exit_code, 42);
        assert_eq!(result.stderr.trim(), "nope");
    }
}
