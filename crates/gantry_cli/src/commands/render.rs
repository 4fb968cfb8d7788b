//! Read-only actions: render and list.

use std::io::Write;

use anyhow::Result;

use gantry_iac::{Stack, StackBackend, StackDocument};

/// Print the loaded document, then what the backend would send.
pub fn render(document: &StackDocument, stack: &Stack, out: &mut dyn Write) -> Result<()> {
    writeln!(out, "===> Stack Attributes:")?;
    writeln!(out, "{}", serde_yaml::to_string(document)?)?;
    writeln!(out, "===> Final Template:")?;
    writeln!(out, "{}", stack.render()?)?;
    Ok(())
}

pub fn list(stack: &Stack, out: &mut dyn Write) -> Result<()> {
    write!(out, "{}", stack.list()?)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use gantry_iac::mock::{MockAws, MockCloudFormation, MockDeployments};
    use gantry_iac::Providers;
    use gantry_runner::MockRunner;

    #[test]
    fn test_render_prints_both_sections() {
        let cfn = MockCloudFormation::new();
        let providers = Providers::new(
            Arc::new(cfn.clone()),
            Arc::new(MockDeployments::new()),
            Arc::new(MockAws::new()),
            Arc::new(MockRunner::new()),
        );
        let document: StackDocument = serde_yaml::from_str(
            "StackName: app\nBuildId: '5'\nTemplateBody: {Resources: {Q: {Type: 'AWS::SQS::Queue'}}}\n",
        )
        .unwrap();
        let stack = Stack::from_document(document.clone(), &providers).unwrap();

        let mut out = Vec::new();
        render(&document, &stack, &mut out).unwrap();
        let out = String::from_utf8(out).unwrap();

        let attributes = out.find("===> Stack Attributes:").unwrap();
        let template = out.find("===> Final Template:").unwrap();
        assert!(attributes < template);
        assert!(out[attributes..template].contains("BuildId: '5'"));
        assert!(out[template..].contains("AWS::SQS::Queue"));
        assert!(cfn.calls().is_empty());
    }
}
