//! End-to-end reconciliation against the in-memory control plane

use one_client::{GatewayCall, MockOneClient, MockOperation, OneError};
use platform_controller::{Action, Controller, ControllerError, EngineConfig, FailurePolicy, Outcome};
use platform_def::{DefinitionError, MachineId, MachineSpec, PowerState};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

const LAB: &str = r#"{
    "format_version": 4,
    "platform_name": "lab",
    "defaults": {"cpu_percent": 0.1, "mem_mb": 256, "networks": ["cloud"]},
    "hosts": {"a": {}, "b": {}, "c": {}}
}"#;

fn write_definition(dir: &tempfile::TempDir, name: &str, contents: &str) -> PathBuf {
    let path = dir.path().join(name);
    let mut file = std::fs::File::create(&path).expect("create definition file");
    file.write_all(contents.as_bytes()).expect("write definition file");
    path
}

fn machine(name: &str, state: PowerState) -> MachineSpec {
    let mut spec = MachineSpec::new(name);
    spec.cpu_share = Some(0.1);
    spec.memory_mb = Some(256);
    spec.networks = vec!["cloud".to_string()];
    spec.power_state = Some(state);
    spec
}

/// Control plane holding lab-b, lab-c, lab-d and a machine of another platform
fn seeded_mock() -> (MockOneClient, MachineId, MachineId, MachineId, MachineId) {
    let mock = MockOneClient::new();
    let b = mock.add_machine(machine("lab-b", PowerState::Active));
    let c = mock.add_machine(machine("lab-c", PowerState::Poweroff));
    let d = mock.add_machine(machine("lab-d", PowerState::Active));
    let other = mock.add_machine(machine("prod-web", PowerState::Active));
    (mock, b, c, d, other)
}

fn controller(mock: &MockOneClient) -> Controller {
    Controller::new(Box::new(mock.clone()), EngineConfig::default(), CancellationToken::new())
}

/// Report sink shared between a controller and the test
#[derive(Clone, Default)]
struct SharedOutput(Arc<Mutex<Vec<u8>>>);

impl SharedOutput {
    fn contents(&self) -> String {
        String::from_utf8(self.0.lock().unwrap().clone()).expect("reports are UTF-8")
    }
}

impl Write for SharedOutput {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[tokio::test]
async fn test_status_reports_every_name() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = write_definition(&dir, "lab.json", LAB);
    let (mock, b, c, d, _) = seeded_mock();

    let report = controller(&mock).process_document(Action::Status, &path).await.unwrap();
    assert_eq!(
        report.to_string(),
        format!(
            "lab-a: missing\nlab-b: present ID {}\nlab-c: present ID {}\nlab-d: unreferenced ID {}\n",
            b, c, d
        )
    );
    assert!(mock.mutations().is_empty());
}

#[tokio::test]
async fn test_create_missing_creates_only_the_missing_machine() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = write_definition(&dir, "lab.json", LAB);
    let (mock, ..) = seeded_mock();

    let report = controller(&mock).process_document(Action::CreateMissing, &path).await.unwrap();
    assert_eq!(mock.mutations(), vec![GatewayCall::Create { name: "lab-a".to_string() }]);
    let Some(Outcome::Created { id }) = report.outcome("lab-a") else {
        panic!("lab-a was not created: {:?}", report.entries);
    };
    let created = mock.machine(*id).expect("created machine is stored");
    assert_eq!(created.memory_mb, Some(256));
    assert_eq!(created.networks, vec!["cloud".to_string()]);
}

#[tokio::test]
async fn test_delete_unreferenced_destroys_only_the_unreferenced_machine() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = write_definition(&dir, "lab.json", LAB);
    let (mock, _, _, d, other) = seeded_mock();

    let report = controller(&mock).process_document(Action::DeleteUnreferenced, &path).await.unwrap();
    assert_eq!(mock.mutations(), vec![GatewayCall::Destroy { id: d }]);
    assert_eq!(report.outcome("lab-d"), Some(&Outcome::Destroyed { id: d }));
    assert!(mock.machine(other).is_some(), "machines of other platforms are never touched");
}

#[tokio::test]
async fn test_delete_all_destroys_present_machines_in_name_order() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = write_definition(&dir, "lab.json", LAB);
    let (mock, b, c, d, _) = seeded_mock();

    controller(&mock).process_document(Action::DeleteAll, &path).await.unwrap();
    assert_eq!(
        mock.mutations(),
        vec![GatewayCall::Destroy { id: b }, GatewayCall::Destroy { id: c }]
    );
    assert!(mock.machine(d).is_some());
}

#[tokio::test]
async fn test_synchronize_resizes_only_resizable_machines() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = write_definition(
        &dir,
        "lab.json",
        r#"{
            "format_version": 4,
            "platform_name": "lab",
            "defaults": {"cpu_percent": 0.1, "mem_mb": 512, "networks": ["cloud"]},
            "hosts": {"b": {}, "c": {}}
        }"#,
    );
    let (mock, b, c, ..) = seeded_mock();

    let report = controller(&mock).process_document(Action::Synchronize, &path).await.unwrap();

    // lab-b is active, lab-c is powered off
    let resized: Vec<MachineId> = mock
        .mutations()
        .into_iter()
        .filter_map(|call| match call {
            GatewayCall::Resize { id, .. } => Some(id),
            _ => None,
        })
        .collect();
    assert_eq!(resized, vec![c]);
    assert_eq!(mock.machine(c).unwrap().memory_mb, Some(512));
    assert_eq!(mock.machine(b).unwrap().memory_mb, Some(256));

    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].name, "lab-b");
    assert!(matches!(report.outcome("lab-c"), Some(Outcome::Changed { .. })));
}

#[tokio::test]
async fn test_synchronize_reports_network_changes_without_applying_them() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = write_definition(
        &dir,
        "lab.json",
        r#"{
            "format_version": 4,
            "platform_name": "lab",
            "defaults": {"cpu_percent": 0.1, "mem_mb": 256, "networks": ["cloud", "storage"]},
            "hosts": {"c": {}}
        }"#,
    );
    let (mock, ..) = seeded_mock();

    let report = controller(&mock).process_document(Action::Synchronize, &path).await.unwrap();
    assert!(mock.mutations().is_empty());
    assert_eq!(report.warnings.len(), 1);
    assert!(report.warnings[0].contains("networks"));
}

#[tokio::test]
async fn test_empty_platform_name_fails_before_any_gateway_call() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = write_definition(
        &dir,
        "nameless.json",
        r#"{"format_version": 4, "platform_name": "", "hosts": {"a": {}}}"#,
    );
    let (mock, ..) = seeded_mock();

    let result = controller(&mock).run(Action::DeleteUnreferenced, &[path]).await;
    assert!(matches!(
        result,
        Err(ControllerError::Definition(DefinitionError::Validation(_)))
    ));
    assert!(mock.calls().is_empty());
}

#[tokio::test]
async fn test_unavailable_gateway_is_fatal() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = write_definition(&dir, "lab.json", LAB);
    let (mock, ..) = seeded_mock();
    mock.set_unavailable(true);

    let result = controller(&mock).run(Action::Status, &[path]).await;
    match result {
        Err(e @ ControllerError::Gateway(OneError::Unavailable(_))) => assert!(e.is_fatal()),
        other => panic!("expected an unavailable gateway, got {:?}", other),
    }
    assert_eq!(mock.calls(), vec![GatewayCall::Verify]);
}

#[tokio::test]
async fn test_parse_only_never_contacts_the_gateway() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = write_definition(&dir, "lab.json", LAB);
    let mock = MockOneClient::new();

    let reports = controller(&mock).run(Action::ParseOnly, &[path]).await.unwrap();
    assert!(mock.calls().is_empty());
    assert_eq!(reports[0].entries.len(), 3);
    assert!(reports[0].to_string().starts_with("name: lab-a\n"));
}

#[tokio::test]
async fn test_gateway_is_verified_once_per_run() {
    let dir = tempfile::tempdir().expect("tempdir");
    let first = write_definition(&dir, "lab.json", LAB);
    let second = write_definition(
        &dir,
        "prod.yaml",
        "format_version: 4\nplatform_name: prod\nhosts:\n  web: {cpu_percent: 0.5, mem_mb: 512}\n",
    );
    let (mock, ..) = seeded_mock();

    let reports = controller(&mock).run(Action::Status, &[first, second]).await.unwrap();
    assert_eq!(reports.len(), 2);
    assert_eq!(reports[1].platform_name, "prod");
    let verifications = mock.calls().into_iter().filter(|call| *call == GatewayCall::Verify).count();
    assert_eq!(verifications, 1);
}

#[tokio::test]
async fn test_failed_machine_does_not_block_the_others() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = write_definition(&dir, "lab.json", LAB);
    let mock = MockOneClient::new();
    mock.fail_on(MockOperation::Create, "lab-a");

    let report = controller(&mock).process_document(Action::CreateMissing, &path).await.unwrap();
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].name, "lab-a");
    assert_eq!(report.failures[0].operation, "create");
    assert!(matches!(report.outcome("lab-b"), Some(Outcome::Created { .. })));
    assert!(matches!(report.outcome("lab-c"), Some(Outcome::Created { .. })));
    assert!(!report.aborted);
}

#[tokio::test]
async fn test_abort_policy_stops_the_batch() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = write_definition(&dir, "lab.json", LAB);
    let mock = MockOneClient::new();
    mock.fail_on(MockOperation::Create, "lab-a");
    let config = EngineConfig {
        failure_policy: FailurePolicy::Abort,
        ..EngineConfig::default()
    };
    let controller = Controller::new(Box::new(mock.clone()), config, CancellationToken::new());

    let report = controller.process_document(Action::CreateMissing, &path).await.unwrap();
    assert!(report.aborted);
    assert_eq!(mock.mutations(), vec![GatewayCall::Create { name: "lab-a".to_string() }]);
}

#[tokio::test]
async fn test_unconfirmed_creation_is_fatal() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = write_definition(&dir, "lab.json", LAB);
    let mock = MockOneClient::new();
    mock.set_unconfirmed_creation("lab-a");

    let result = controller(&mock).process_document(Action::CreateMissing, &path).await;
    assert!(matches!(
        result,
        Err(ControllerError::Gateway(OneError::CreationConfirmation { .. }))
    ));
    // the batch stops at the first machine
    assert_eq!(mock.mutations().len(), 1);
}

#[tokio::test]
async fn test_fatal_error_still_prints_completed_outcomes() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = write_definition(&dir, "lab.json", LAB);
    let mock = MockOneClient::new();
    mock.set_unconfirmed_creation("lab-b");
    let output = SharedOutput::default();
    let controller = controller(&mock).with_output(Box::new(output.clone()));

    let result = controller.run(Action::CreateMissing, &[path]).await;
    match result {
        Err(ControllerError::Gateway(OneError::CreationConfirmation { name, .. })) => assert_eq!(name, "lab-b"),
        other => panic!("expected an unconfirmed creation, got {:?}", other),
    }
    // lab-c is never attempted, lab-a stays visible
    assert_eq!(mock.mutations().len(), 2);
    assert_eq!(output.contents(), "lab-a: created ID 100\n");
}

#[tokio::test]
async fn test_aborted_batch_is_printed_with_its_failure() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = write_definition(&dir, "lab.json", LAB);
    let mock = MockOneClient::new();
    mock.fail_on(MockOperation::Create, "lab-b");
    let config = EngineConfig {
        failure_policy: FailurePolicy::Abort,
        ..EngineConfig::default()
    };
    let output = SharedOutput::default();
    let controller =
        Controller::new(Box::new(mock.clone()), config, CancellationToken::new()).with_output(Box::new(output.clone()));

    controller.run(Action::CreateMissing, &[path]).await.unwrap();
    let printed = output.contents();
    assert!(printed.starts_with("lab-a: created ID 100\nERROR lab-b: create failed:"), "{}", printed);
    assert!(printed.ends_with("WARNING platform lab: remaining machines were skipped after a failure\n"));
}

#[tokio::test]
async fn test_cancelled_run_starts_no_operation() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = write_definition(&dir, "lab.json", LAB);
    let mock = MockOneClient::new();
    let cancel = CancellationToken::new();
    cancel.cancel();
    let controller = Controller::new(Box::new(mock.clone()), EngineConfig::default(), cancel);

    let result = controller.run(Action::CreateMissing, &[path]).await;
    assert!(matches!(result, Err(ControllerError::Cancelled)));
    assert!(mock.mutations().is_empty());
}

#[tokio::test]
async fn test_group_and_permissions_follow_creation() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = write_definition(
        &dir,
        "lab.json",
        r#"{
            "format_version": 4,
            "platform_name": "lab",
            "hosts": {"a": {"cpu_percent": 0.1, "mem_mb": 128, "group": "ops", "permissions": "640"}}
        }"#,
    );
    let mock = MockOneClient::new();

    let report = controller(&mock).process_document(Action::CreateMissing, &path).await.unwrap();
    let Some(Outcome::Created { id }) = report.outcome("lab-a") else {
        panic!("lab-a was not created");
    };
    assert_eq!(
        mock.mutations(),
        vec![
            GatewayCall::Create { name: "lab-a".to_string() },
            GatewayCall::SetGroup { id: *id, group: "ops".to_string() },
            GatewayCall::SetPermissions { id: *id, permissions: "640".parse().unwrap() },
        ]
    );
}
