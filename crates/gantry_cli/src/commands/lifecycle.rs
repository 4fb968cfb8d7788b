//! Lifecycle actions: create, delete, update, upsert and validate.

use anyhow::{bail, Result};
use tracing::info;

use gantry_iac::{Stack, StackBackend};

use super::Action;

/// Run a mutating or validating `action` on `stack`.
///
/// `review` overrides the backend's review default when set.
pub fn run(action: Action, stack: &Stack, wait: bool, review: Option<bool>) -> Result<()> {
    let review = review.unwrap_or_else(|| stack.default_review());
    info!("Running {} on a {} stack", action, stack.kind());

    match action {
        Action::Create => stack.create(wait)?,
        Action::Delete => stack.delete(wait)?,
        Action::Update => stack.update(wait, review)?,
        Action::Upsert => stack.upsert(wait, review)?,
        Action::Validate => stack.validate()?,
        Action::Render | Action::List => bail!("Action not available: {}", action),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use gantry_iac::mock::{MockAws, MockCloudFormation, MockDeployments, ScriptedConsole};
    use gantry_iac::{Providers, WaitPolicy};
    use gantry_runner::MockRunner;

    fn stack(cfn: &MockCloudFormation, console: &ScriptedConsole) -> Stack {
        let providers = Providers::new(
            Arc::new(cfn.clone()),
            Arc::new(MockDeployments::new()),
            Arc::new(MockAws::new()),
            Arc::new(MockRunner::new()),
        )
        .with_console(Arc::new(console.clone()))
        .with_wait_policy(WaitPolicy::immediate(1));

        let document = serde_yaml::from_str(
            "StackName: app\nBuildId: '5'\nTemplateBody: {Resources: {}}\n",
        )
        .unwrap();
        Stack::from_document(document, &providers).unwrap()
    }

    #[test]
    fn test_update_reviews_by_default() {
        let cfn = MockCloudFormation::new().with_stack("app", &[]);
        let console = ScriptedConsole::new(["k"]);

        run(Action::Update, &stack(&cfn, &console), false, None).unwrap();
        assert_eq!(cfn.count("CreateChangeSet"), 1);
        assert_eq!(cfn.count("UpdateStack"), 0);
        assert_eq!(console.prompts(), 1);
    }

    #[test]
    fn test_no_review_updates_directly() {
        let cfn = MockCloudFormation::new().with_stack("app", &[]);
        let console = ScriptedConsole::new(Vec::<String>::new());

        run(Action::Update, &stack(&cfn, &console), false, Some(false)).unwrap();
        assert_eq!(cfn.count("UpdateStack"), 1);
        assert_eq!(console.prompts(), 0);
    }

    #[test]
    fn test_validate_only_validates() {
        let cfn = MockCloudFormation::new();
        let console = ScriptedConsole::default();

        run(Action::Validate, &stack(&cfn, &console), true, None).unwrap();
        assert_eq!(cfn.operations(), vec!["ValidateTemplate"]);
    }
}
