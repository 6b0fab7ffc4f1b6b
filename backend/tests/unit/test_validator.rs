//! TemplateValidator with a fake sandbox

use std::sync::Arc;
use std::time::Duration;

use infraflow::models::server::{ServerProfile, ServerStatus};
use infraflow::models::validation::ValidationRequest;
use infraflow::monitor::{format_ram, ResourceMonitor};
use infraflow::storage::registry::ServerRegistry;
use infraflow::validate::sandbox::SandboxOutcome;
use infraflow::validate::TemplateValidator;

use crate::support::{cipher, exited, leftover_entries, validator_settings, FakeSandbox, FakeShell};

struct Fixture {
    workspaces: tempfile::TempDir,
    sandbox: Arc<FakeSandbox>,
    servers: Arc<ServerRegistry>,
    validator: TemplateValidator,
}

fn fixture(outcomes: Vec<SandboxOutcome>) -> Fixture {
    let workspaces = tempfile::tempdir().unwrap();
    let sandbox = Arc::new(FakeSandbox::with_outcomes(outcomes));
    let servers = Arc::new(ServerRegistry::in_memory("server"));
    let monitor = Arc::new(ResourceMonitor::new(
        servers.clone(),
        Arc::new(FakeShell::new(0)),
        cipher(),
        Duration::from_secs(5),
    ));
    let validator = TemplateValidator::new(
        sandbox.clone(),
        monitor,
        validator_settings(workspaces.path()),
    );
    Fixture {
        workspaces,
        sandbox,
        servers,
        validator,
    }
}

#[tokio::test]
async fn test_unknown_kind_needs_no_validation() {
    let f = fixture(Vec::new());
    let result = f
        .validator
        .validate("helm", &[ValidationRequest::new("values.yaml", "a: 1")])
        .await;
    assert!(result.valid());
    assert_eq!(result.output(), "OK (no validation required)");
    assert!(f.sandbox.jobs().is_empty());
}

#[tokio::test]
async fn test_bash_failure_carries_tool_output() {
    let f = fixture(vec![exited(1, "SC2086: Double quote to prevent globbing")]);
    let result = f
        .validator
        .validate("bash", &[ValidationRequest::new("run.sh", "echo $1\r\n")])
        .await;

    assert!(!result.valid());
    assert!(result.errors()[0].contains("SC2086"));
    let jobs = f.sandbox.jobs();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].args, vec!["script.sh"]);
    assert_eq!(leftover_entries(f.workspaces.path()), 0);
}

#[tokio::test]
async fn test_timeout_is_a_failure() {
    let f = fixture(vec![SandboxOutcome::TimedOut]);
    let result = f
        .validator
        .validate("bash", &[ValidationRequest::new("run.sh", "sleep 100")])
        .await;
    assert!(!result.valid());
    assert!(result.errors()[0].contains("timed out"));
}

#[tokio::test]
async fn test_malformed_yaml_skips_sandbox() {
    let f = fixture(Vec::new());
    let result = f
        .validator
        .validate("ansible", &[ValidationRequest::new("site.yml", "- hosts: [all\n")])
        .await;
    assert!(!result.valid());
    assert_eq!(result.output(), "Ansible YAML error");
    assert!(f.sandbox.jobs().is_empty());
}

#[tokio::test]
async fn test_ansible_runs_syntax_check_then_lint() {
    let f = fixture(vec![exited(0, ""), exited(2, "risky-file-permissions")]);
    let result = f
        .validator
        .validate(
            "ansible",
            &[ValidationRequest::new("site.yml", "- hosts: all\n  tasks: []\n")],
        )
        .await;

    assert!(!result.valid());
    assert_eq!(result.output(), "Ansible-lint error");
    let jobs = f.sandbox.jobs();
    assert_eq!(jobs.len(), 2);
    assert!(jobs[0].args.contains(&"--syntax-check".to_string()));
    assert!(jobs[1].args.contains(&".config/ansible-lint.yml".to_string()));
}

#[tokio::test]
async fn test_terraform_conflicts_are_warnings() {
    let f = fixture(Vec::new());
    let files = [
        ValidationRequest::new("a.tf", "variable \"cpu\" {\n  default = 2\n}\n"),
        ValidationRequest::new("b.tf", "variable \"cpu\" {\n  default = 4\n}\n"),
    ];
    let result = f.validator.validate("terraform", &files).await;

    assert!(result.valid());
    assert_eq!(result.warnings().len(), 1);
    assert!(result.warnings()[0].contains("cpu"));
    // fmt per file, then init and validate
    assert_eq!(f.sandbox.jobs().len(), 4);
    assert_eq!(leftover_entries(f.workspaces.path()), 0);
}

#[tokio::test]
async fn test_terraform_syntax_error_names_file() {
    let f = fixture(vec![exited(0, ""), exited(3, "b.tf\n")]);
    let files = [
        ValidationRequest::new("a.tf", "variable \"x\" {}\n"),
        ValidationRequest::new("b.tf", "variable \"y\" {\n"),
    ];
    let result = f.validator.validate("terraform", &files).await;

    assert!(!result.valid());
    assert_eq!(result.output(), "Terraform syntax error in file: b.tf");
    assert_eq!(f.sandbox.jobs().len(), 2);
}

#[tokio::test]
async fn test_terraform_capacity_check() {
    let f = fixture(Vec::new());
    let mut server = ServerProfile::new("prod", "10.0.0.5", 22, "ops", "");
    server.status = ServerStatus::Successful;
    server.ram = format_ram(1024, 4096);
    server.cpu = "10%".to_string();
    f.servers.upsert(server).await.unwrap();

    let other = ValidationRequest::new("a.tf", "variable \"ram\" {\n  default = 512\n}\n");
    let fits = ValidationRequest::new("b.tf", "variable \"ram_extra\" {\n  default = 1024\n}\n")
        .with_server("prod");
    let result = f.validator.validate("terraform", &[other.clone(), fits]).await;
    assert!(result.valid(), "{}", result.output());

    let too_big = ValidationRequest::new("b.tf", "variable \"ram_extra\" {\n  default = 3000\n}\n")
        .with_server("prod");
    let result = f.validator.validate("terraform", &[other, too_big]).await;
    assert!(!result.valid());
    for number in ["3000", "2560", "4096", "1024", "512"] {
        assert!(result.output().contains(number), "{}", result.output());
    }
}

#[tokio::test]
async fn test_terraform_semantic_failures() {
    let files = [
        ValidationRequest::new("a.tf", "variable \"ram\" {\n  default = 512\n}\n"),
        ValidationRequest::new("b.tf", "resource \"null_resource\" \"x\" {\n  bogus = 1\n}\n"),
    ];

    // fmt a.tf, fmt b.tf, init, then a failing validate
    let f = fixture(vec![
        exited(0, ""),
        exited(0, ""),
        exited(0, ""),
        exited(1, "Error: Unsupported argument \"bogus\""),
    ]);
    let result = f.validator.validate("terraform", &files).await;
    assert!(!result.valid());
    assert_eq!(result.output(), "Terraform validate failed");
    assert!(result.errors()[0].contains("Unsupported argument"));
    assert_eq!(f.sandbox.jobs().len(), 4);
    assert_eq!(f.sandbox.jobs()[3].args, vec!["validate", "-no-color"]);
    assert_eq!(leftover_entries(f.workspaces.path()), 0);

    let f = fixture(vec![exited(0, ""), exited(0, ""), SandboxOutcome::TimedOut]);
    let result = f.validator.validate("terraform", &files).await;
    assert!(!result.valid());
    assert_eq!(result.output(), "Terraform init failed");
    assert_eq!(f.sandbox.jobs().len(), 3);
}
