//! Lifecycle tests for the stack backends against recording mocks.

use std::sync::Arc;

use gantry_iac::mock::{
    CloudFormationCall, DeploymentCall, MockAws, MockCloudFormation, MockDeployments,
    ScriptedConsole,
};
use gantry_iac::stacks::{CHANGE_SET_FOOTER, CHANGE_SET_HEADER};
use gantry_iac::{
    IacError, Providers, RemoteError, Stack, StackBackend, StackDocument, StackKind, WaitCondition,
    WaitPolicy,
};
use gantry_runner::{LocalRunner, MockRunner};

struct Harness {
    cfn: MockCloudFormation,
    dm: MockDeployments,
    console: ScriptedConsole,
    providers: Providers,
}

fn harness(cfn: MockCloudFormation, dm: MockDeployments, answers: &[&str]) -> Harness {
    let console = ScriptedConsole::new(answers.iter().copied());
    let providers = Providers::new(
        Arc::new(cfn.clone()),
        Arc::new(dm.clone()),
        Arc::new(MockAws::new()),
        Arc::new(MockRunner::new()),
    )
    .with_console(Arc::new(console.clone()))
    .with_wait_policy(WaitPolicy::immediate(3));

    Harness {
        cfn,
        dm,
        console,
        providers,
    }
}

fn document(yaml: &str) -> StackDocument {
    serde_yaml::from_str(yaml).unwrap()
}

const APP: &str = "\
StackName: app
BuildId: '42'
Tags:
  team: core
  owner: ops
TemplateBody:
  Resources:
    Bucket:
      Type: AWS::S3::Bucket
";

#[test]
fn test_factory_defaults_to_cloudformation() {
    let h = harness(MockCloudFormation::new(), MockDeployments::new(), &[]);
    let stack = Stack::from_document(document(APP), &h.providers).unwrap();
    assert_eq!(stack.kind(), StackKind::CloudFormation);
    assert!(stack.default_review());
}

#[test]
fn test_factory_rejects_unknown_type() {
    let h = harness(MockCloudFormation::new(), MockDeployments::new(), &[]);
    let err = Stack::from_document(document("StackType: pulumi\nBuildId: '1'\n"), &h.providers)
        .err()
        .unwrap();
    assert_eq!(err.to_string(), "Stack type not supported: pulumi");
}

#[test]
fn test_tags_are_one_per_key_plus_build_id() {
    let h = harness(MockCloudFormation::new(), MockDeployments::new(), &[]);
    let stack = Stack::from_document(document(APP), &h.providers).unwrap();
    stack.create(false).unwrap();

    let params = match &h.cfn.calls()[1] {
        CloudFormationCall::CreateStack(params) => params.clone(),
        other => panic!("unexpected call {:?}", other),
    };
    let tags = params["Tags"].as_array().unwrap();
    assert_eq!(tags.len(), 3);
    assert_eq!(tags[2], serde_json::json!({"Key": "build_id", "Value": "42"}));
    assert!(!params.contains_key("BuildId"));
}

#[test]
fn test_render_is_read_only_and_reloads() {
    let h = harness(MockCloudFormation::new(), MockDeployments::new(), &[]);
    let stack = Stack::from_document(document(APP), &h.providers).unwrap();

    let rendered = stack.render().unwrap();
    assert!(h.cfn.mutating_calls().is_empty());

    let reloaded: serde_yaml::Value = serde_yaml::from_str(&rendered).unwrap();
    assert_eq!(reloaded["StackName"], serde_yaml::Value::from("app"));
    assert_eq!(
        reloaded["TemplateBody"]["Resources"]["Bucket"]["Type"],
        serde_yaml::Value::from("AWS::S3::Bucket")
    );
    assert_eq!(reloaded["Tags"].as_sequence().unwrap().len(), 3);
    assert_eq!(serde_yaml::to_string(&reloaded).unwrap(), rendered);
}

#[test]
fn test_upsert_creates_missing_stack() {
    let h = harness(MockCloudFormation::new(), MockDeployments::new(), &[]);
    let stack = Stack::from_document(document(APP), &h.providers).unwrap();

    stack.upsert(false, false).unwrap();

    assert_eq!(h.cfn.count("UpdateStack"), 1);
    assert_eq!(h.cfn.count("CreateStack"), 1);
    assert!(h.cfn.has_stack("app"));
}

#[test]
fn test_upsert_with_review_creates_missing_stack() {
    let h = harness(MockCloudFormation::new(), MockDeployments::new(), &[]);
    let stack = Stack::from_document(document(APP), &h.providers).unwrap();

    stack.upsert(true, true).unwrap();

    assert_eq!(h.cfn.count("CreateChangeSet"), 1);
    assert_eq!(h.cfn.count("CreateStack"), 1);
    assert_eq!(h.console.prompts(), 0);
}

#[test]
fn test_upsert_propagates_other_errors() {
    let cfn = MockCloudFormation::new()
        .with_stack("app", &[])
        .fail_on("UpdateStack", "AccessDenied", "insufficient permissions");
    let h = harness(cfn, MockDeployments::new(), &[]);
    let stack = Stack::from_document(document(APP), &h.providers).unwrap();

    let err = stack.upsert(false, false).unwrap_err();
    match &err {
        IacError::Remote(RemoteError::Api { code, message, .. }) => {
            assert_eq!(code, "AccessDenied");
            assert_eq!(message, "insufficient permissions");
        }
        other => panic!("unexpected error {:?}", other),
    }
    assert_eq!(h.cfn.count("CreateStack"), 0);
}

#[test]
fn test_change_set_execute_then_wait() {
    let cfn = MockCloudFormation::new().with_stack("app", &[]);
    let h = harness(cfn, MockDeployments::new(), &["yes", "e"]);
    let stack = Stack::from_document(document(APP), &h.providers).unwrap();

    stack.update(true, true).unwrap();

    assert_eq!(
        h.cfn.operations(),
        vec![
            "ValidateTemplate",
            "CreateChangeSet",
            "Wait",
            "DescribeChangeSet",
            "ExecuteChangeSet",
            "Wait",
        ]
    );
    match &h.cfn.calls()[1] {
        CloudFormationCall::CreateChangeSet(params) => {
            assert_eq!(params["ChangeSetName"], "app-42");
            assert_eq!(params["ChangeSetType"], "UPDATE");
        }
        other => panic!("unexpected call {:?}", other),
    }
    assert!(matches!(
        h.cfn.calls()[5],
        CloudFormationCall::Wait {
            condition: WaitCondition::StackUpdateComplete,
            ..
        }
    ));

    let shown = h.console.shown();
    assert_eq!(shown[0], CHANGE_SET_HEADER);
    assert_eq!(shown[2], CHANGE_SET_FOOTER);
    assert_eq!(shown[3], "Valid answers: e, d, k");
    assert_eq!(shown[4], "Executing changeset app-42...");
    assert_eq!(h.console.prompts(), 2);
}

#[test]
fn test_change_set_discard() {
    let cfn = MockCloudFormation::new().with_stack("app", &[]);
    let h = harness(cfn, MockDeployments::new(), &["d"]);
    let stack = Stack::from_document(document(APP), &h.providers).unwrap();

    stack.update(true, true).unwrap();

    assert_eq!(h.cfn.count("DeleteChangeSet"), 1);
    assert_eq!(h.cfn.count("ExecuteChangeSet"), 0);
    // no update wait after a discarded change set
    assert_eq!(h.cfn.count("Wait"), 1);
    assert_eq!(
        h.console.shown().last().unwrap(),
        "Deleting changeset app-42. No changes made to stack app"
    );
}

#[test]
fn test_change_set_closed_input() {
    let cfn = MockCloudFormation::new().with_stack("app", &[]);
    let h = harness(cfn, MockDeployments::new(), &[]);
    let stack = Stack::from_document(document(APP), &h.providers).unwrap();

    let err = stack.update(false, true).unwrap_err();
    assert!(matches!(err, IacError::ReviewAborted { ref change_set } if change_set == "app-42"));
    assert_eq!(h.cfn.count("ExecuteChangeSet"), 0);
    assert_eq!(h.cfn.count("DeleteChangeSet"), 0);
}

#[test]
fn test_delete_waits_for_deletion() {
    let cfn = MockCloudFormation::new().with_stack("app", &[]);
    let h = harness(cfn, MockDeployments::new(), &[]);
    let stack = Stack::from_document(document(APP), &h.providers).unwrap();

    stack.delete(true).unwrap();
    assert_eq!(
        h.cfn.calls(),
        vec![
            CloudFormationCall::DeleteStack {
                stack_name: "app".to_string()
            },
            CloudFormationCall::Wait {
                condition: WaitCondition::StackDeleteComplete,
                stack_name: "app".to_string(),
                change_set: None,
            },
        ]
    );
}

#[test]
fn test_list_shows_outputs() {
    let cfn = MockCloudFormation::new().with_stack("app", &[("BucketName", "app-bucket")]);
    let h = harness(cfn, MockDeployments::new(), &[]);
    let stack = Stack::from_document(document(APP), &h.providers).unwrap();

    let listing: serde_yaml::Value = serde_yaml::from_str(&stack.list().unwrap()).unwrap();
    assert_eq!(
        listing["Outputs"]["BucketName"],
        serde_yaml::Value::from("app-bucket")
    );
    assert!(h.cfn.mutating_calls().is_empty());
}

const SHELL: &str = "\
StackType: shell
BuildId: '42'
Actions:
  Create:
    Commands: echo $GANTRY_STACK_TEST_X
  Update:
    Commands: exit 3
";

#[test]
fn test_shell_stack_runs_commands() {
    std::env::set_var("GANTRY_STACK_TEST_X", "hi");
    let h = harness(MockCloudFormation::new(), MockDeployments::new(), &[]);
    let providers = Providers {
        runner: Arc::new(LocalRunner::new()),
        ..h.providers
    };

    let stack = Stack::from_document(document(SHELL), &providers).unwrap();
    assert_eq!(stack.kind(), StackKind::Shell);
    let rendered: serde_yaml::Value = serde_yaml::from_str(&stack.render().unwrap()).unwrap();
    assert_eq!(
        rendered["Actions"]["Create"]["Commands"],
        serde_yaml::Value::from("echo hi")
    );

    stack.create(false).unwrap();
    match stack.update(false, false).unwrap_err() {
        IacError::CommandFailed { code, .. } => assert_eq!(code, 3),
        other => panic!("unexpected error {:?}", other),
    }
}

const DEPLOYMENT: &str = "\
type: gcp
BuildId: '7'
project: p1
name: web
labels:
  env: dev
resources:
  - name: vm
    type: compute.v1.instance
";

#[test]
fn test_deployment_upsert_inserts_and_waits() {
    let h = harness(MockCloudFormation::new(), MockDeployments::new(), &[]);
    let stack = Stack::from_document(document(DEPLOYMENT), &h.providers).unwrap();
    assert_eq!(stack.kind(), StackKind::Deployment);
    assert!(!stack.default_review());

    stack.upsert(true, true).unwrap();

    let calls = h.dm.calls();
    assert!(matches!(calls[0], DeploymentCall::Get { .. }));
    match &calls[1] {
        DeploymentCall::Insert { project, body } => {
            assert_eq!(project, "p1");
            assert_eq!(body["labels"][1]["value"], "7");
        }
        other => panic!("unexpected call {:?}", other),
    }
    assert_eq!(h.dm.get_count(), 2);
}

#[test]
fn test_deployment_wait_times_out() {
    let h = harness(
        MockCloudFormation::new(),
        MockDeployments::new().never_finish(),
        &[],
    );
    let stack = Stack::from_document(document(DEPLOYMENT), &h.providers).unwrap();

    let err = stack.create(true).unwrap_err();
    assert!(matches!(
        err,
        IacError::Remote(RemoteError::WaitTimeout { .. })
    ));
    assert_eq!(h.dm.get_count(), 3);
}

#[test]
fn test_deployment_delete_of_missing_deployment() {
    let h = harness(MockCloudFormation::new(), MockDeployments::new(), &[]);
    let stack = Stack::from_document(document(DEPLOYMENT), &h.providers).unwrap();

    let err = stack.delete(false).unwrap_err();
    assert_eq!(err.to_string(), "Deployment doesn't exist: web");
    assert!(h.dm.mutating_calls().is_empty());
}

#[test]
fn test_deployment_delete_waits_until_gone() {
    let dm = MockDeployments::new().with_outputs("p1", "web", &[]);
    let h = harness(MockCloudFormation::new(), dm, &[]);
    let stack = Stack::from_document(document(DEPLOYMENT), &h.providers).unwrap();

    stack.delete(true).unwrap();
    assert_eq!(h.dm.mutating_calls().len(), 1);
    assert!(stack.list().unwrap().contains("is not deployed"));
}
