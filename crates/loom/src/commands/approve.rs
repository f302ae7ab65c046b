//! Interactive confirmation for tool calls.

use async_trait::async_trait;
use console::{Style, Term, style};
use loom_chat::{ToolApprover, ToolCallRequest};
use loom_mcp::ToolDescriptor;

/// Asks on the terminal before running a tool that is not auto-approved.
///
/// Prompts are serialized so concurrent calls do not interleave.
#[derive(Default)]
pub struct ConsoleApprover {
    prompt_lock: tokio::sync::Mutex<()>,
}

#[async_trait]
impl ToolApprover for ConsoleApprover {
    async fn approve(&self, request: &ToolCallRequest, tool: &ToolDescriptor) -> bool {
        let _guard = self.prompt_lock.lock().await;

        let dim = Style::new().dim();
        let question = format!(
            "{} {} {} {}\n  {}\n{} ",
            style("?").yellow().bold(),
            "Run tool",
            style(&tool.name).cyan(),
            dim.apply_to(format!("on {}", tool.server)),
            dim.apply_to(request.arguments.to_string()),
            "Allow? [y/N]",
        );

        let answer = tokio::task::spawn_blocking(move || {
            let term = Term::stderr();
            term.write_str(&question).ok()?;
            term.read_line().ok()
        })
        .await
        .ok()
        .flatten();

        is_yes(answer.as_deref())
    }
}

fn is_yes(answer: Option<&str>) -> bool {
    matches!(
        answer.map(|a| a.trim().to_ascii_lowercase()).as_deref(),
        Some("y" | "yes")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_explicit_yes_approves() {
        assert!(is_yes(Some("y")));
        assert!(is_yes(Some(" YES ")));
        assert!(!is_yes(Some("")));
        assert!(!is_yes(Some("no")));
        assert!(!is_yes(None));
    }
}
