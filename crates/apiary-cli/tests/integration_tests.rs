//! Integration tests for CLI commands

use std::process::Command;

/// Helper to run apiary command
fn apiary(args: &[&str]) -> std::process::Output {
    Command::new(env!("CARGO_BIN_EXE_apiary"))
        .args(args)
        .env_remove("APIARY_CONFIG")
        .env_remove("RUST_LOG")
        .env("NO_GRAPHICS", "1")
        .output()
        .expect("Failed to execute apiary")
}

/// Get the fixtures path
fn fixtures_path() -> &'static str {
    concat!(env!("CARGO_MANIFEST_DIR"), "/../../fixtures")
}

fn fixture(name: &str) -> String {
    format!("{}/{}", fixtures_path(), name)
}

fn combined(output: &std::process::Output) -> String {
    format!(
        "{}{}",
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    )
}

mod plan_command {
    use super::*;

    #[test]
    fn test_plan_orders_dependencies_first() {
        let output = apiary(&["plan", "-a", "webapp", "-b", &fixture("stack")]);

        assert!(output.status.success(), "{}", combined(&output));
        let stdout = String::from_utf8_lossy(&output.stdout);
        let database = stdout.find("database@1.0.0").expect("database listed");
        let webapp = stdout.find("webapp@2.1.0").expect("webapp listed");
        assert!(database < webapp);
        assert!(stdout.contains("4 descriptors"));
        assert!(stdout.contains("statefulset [await]"));
        assert!(!stdout.contains("no alveolus selected"));
    }

    #[test]
    fn test_plan_json_output() {
        let output = apiary(&[
            "plan",
            "-a",
            "webapp",
            "-b",
            &fixture("stack"),
            "--set",
            "replicas=5",
            "--json",
        ]);

        assert!(output.status.success(), "{}", combined(&output));
        let stdout = String::from_utf8_lossy(&output.stdout);
        let json: serde_json::Value =
            serde_json::from_str(&stdout).expect("Output should be valid JSON");

        let entries = json["entries"].as_array().unwrap();
        let names: Vec<String> = entries
            .iter()
            .map(|e| format!("{}/{}", e["alveolus"].as_str().unwrap(), e["descriptor"].as_str().unwrap()))
            .collect();
        assert_eq!(
            names,
            vec![
                "database@1.0.0/configmap",
                "database@1.0.0/statefulset",
                "webapp@2.1.0/deployment",
                "webapp@2.1.0/service",
            ]
        );
        assert_eq!(entries[0]["placeholders"]["db.name"], "orders");
        assert_eq!(entries[2]["placeholders"]["replicas"], "5");
        assert_eq!(entries[0]["root"], "webapp@2.1.0");
        assert_eq!(entries[2]["patches"], 1);
        assert_eq!(entries[3]["patches"], 0);
        assert!(json["warnings"].as_array().unwrap().is_empty());
    }

    #[test]
    fn test_plan_exclude() {
        let output = apiary(&[
            "plan",
            "-a",
            "webapp",
            "-b",
            &fixture("stack"),
            "--exclude",
            "statefulset,service",
            "--json",
        ]);

        assert!(output.status.success(), "{}", combined(&output));
        let json: serde_json::Value =
            serde_json::from_slice(&output.stdout).expect("Output should be valid JSON");
        let descriptors: Vec<&str> = json["entries"]
            .as_array()
            .unwrap()
            .iter()
            .map(|e| e["descriptor"].as_str().unwrap())
            .collect();
        assert_eq!(descriptors, vec!["configmap", "deployment"]);
    }

    #[test]
    fn test_plan_auto_mode_warns() {
        let output = apiary(&["plan", "-b", &fixture("stack")]);

        assert!(output.status.success(), "{}", combined(&output));
        let stdout = String::from_utf8_lossy(&output.stdout);
        assert!(stdout.contains("no alveolus selected"));
        // database is emitted once, as its own root
        assert_eq!(stdout.matches("database@1.0.0").count(), 1);
        assert!(stdout.contains("4 descriptors"));
    }

    #[test]
    fn test_plan_cycle_fails() {
        let output = apiary(&["plan", "-a", "ping", "-b", &fixture("cycle")]);

        assert_eq!(output.status.code(), Some(4));
        assert!(combined(&output).contains("ping@1 -> pong@1 -> ping@1"));
    }

    #[test]
    fn test_plan_unknown_alveolus() {
        let output = apiary(&["plan", "-a", "nope", "-b", &fixture("stack")]);

        assert_eq!(output.status.code(), Some(4));
        assert!(combined(&output).contains("Alveolus not found: nope"));
    }

    #[test]
    fn test_plan_unknown_version() {
        let output = apiary(&["plan", "-a", "webapp", "--version", "9.9.9", "-b", &fixture("stack")]);

        assert_eq!(output.status.code(), Some(4));
    }

    #[test]
    fn test_plan_missing_bundle_dir() {
        let output = apiary(&["plan", "-b", &fixture("does-not-exist")]);

        assert_eq!(output.status.code(), Some(1));
    }
}

mod list_command {
    use super::*;

    #[test]
    fn test_list_bundles() {
        let output = apiary(&["list", "-b", &fixture("stack")]);

        assert!(output.status.success(), "{}", combined(&output));
        let stdout = String::from_utf8_lossy(&output.stdout);
        assert!(stdout.contains("NAME"));
        assert!(stdout.contains("database"));
        assert!(stdout.contains("1.0.0"));
        assert!(stdout.contains("webapp"));
        assert!(stdout.contains("2.1.0"));
    }

    #[test]
    fn test_list_empty_directory() {
        let dir = tempfile::tempdir().unwrap();
        let output = apiary(&["list", "-b", dir.path().to_str().unwrap()]);

        assert!(output.status.success(), "{}", combined(&output));
        assert!(String::from_utf8_lossy(&output.stdout).contains("No alveolus found"));
    }
}

mod apply_command {
    use super::*;

    #[test]
    fn test_apply_unresolved_placeholder() {
        let output = apiary(&[
            "apply",
            "-a",
            "broken",
            "-b",
            &fixture("broken"),
            "-c",
            &fixture("offline.yaml"),
        ]);

        assert_eq!(output.status.code(), Some(3), "{}", combined(&output));
        assert!(String::from_utf8_lossy(&output.stdout).contains("apiary.fixture.undefined.endpoint"));
    }

    #[test]
    fn test_apply_placeholder_from_set() {
        // rendering succeeds, the unreachable API then fails the entry
        let output = apiary(&[
            "apply",
            "-a",
            "broken",
            "-b",
            &fixture("broken"),
            "-c",
            &fixture("offline.yaml"),
            "--set",
            "apiary.fixture.undefined.endpoint=http://db",
        ]);

        assert_eq!(output.status.code(), Some(6), "{}", combined(&output));
        assert!(String::from_utf8_lossy(&output.stdout).contains("FAILED"));
    }

    #[test]
    fn test_apply_missing_config_file() {
        let output = apiary(&[
            "apply",
            "-a",
            "broken",
            "-b",
            &fixture("broken"),
            "-c",
            &fixture("missing.yaml"),
        ]);

        assert_eq!(output.status.code(), Some(1));
        assert!(combined(&output).contains("missing.yaml"));
    }
}

mod usage {
    use super::*;

    #[test]
    fn test_invalid_set_value() {
        let output = apiary(&["plan", "-a", "webapp", "-b", &fixture("stack"), "--set", "novalue"]);

        assert_eq!(output.status.code(), Some(64));
    }

    #[test]
    fn test_unknown_subcommand() {
        let output = apiary(&["frobnicate"]);

        assert_eq!(output.status.code(), Some(64));
    }

    #[test]
    fn test_help_succeeds() {
        let output = apiary(&["--help"]);

        assert!(output.status.success());
        let stdout = String::from_utf8_lossy(&output.stdout);
        assert!(stdout.contains("apply"));
        assert!(stdout.contains("operator"));
    }
}
