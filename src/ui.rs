use colored::{ColoredString, Colorize};
use reconcile::{Action, EventStatus, ResourceStatus, StackStatus};

/// Print an info message
pub fn info(msg: &str) {
    println!("{} {}", "ℹ".blue(), msg);
}

/// Print a success message
pub fn success(msg: &str) {
    println!("{} {}", "✓".green(), msg);
}

/// Print a warning message
pub fn warn(msg: &str) {
    println!("{} {}", "⚠".yellow(), msg);
}

/// Print an error message
pub fn error(msg: &str) {
    eprintln!("{} {}", "✗".red(), msg);
}

/// Print a dim/muted message
pub fn dim(msg: &str) {
    println!("  {}", msg.dimmed());
}

/// Print a header/title
pub fn header(title: &str) {
    println!();
    println!("{}", title.bold());
    println!("{}", "─".repeat(title.chars().count()).dimmed());
}

/// Print a section header
pub fn section(title: &str) {
    println!();
    println!("{}", title.cyan().bold());
}

/// Print a key-value pair
pub fn kv(key: &str, value: &str) {
    println!("  {}: {}", key.dimmed(), value);
}

// ============================================================================
// Stack Rendering
// ============================================================================

/// Plan marker for an action, as shown in front of each resource
pub fn action_marker(action: Action) -> &'static str {
    match action {
        Action::Create => "+",
        Action::NoChange => "=",
        Action::Update => "~",
        Action::Replace(_) => "±",
        Action::Delete => "-",
        Action::Retain => "◦",
    }
}

/// Colored plan marker
pub fn action_symbol(action: Action) -> ColoredString {
    let marker = action_marker(action);
    match action {
        Action::Create => marker.green().bold(),
        Action::NoChange => marker.dimmed(),
        Action::Update => marker.yellow().bold(),
        Action::Replace(_) => marker.magenta().bold(),
        Action::Delete => marker.red().bold(),
        Action::Retain => marker.cyan(),
    }
}

/// Colored resource status
pub fn resource_status(status: ResourceStatus) -> ColoredString {
    paint(&status.to_string(), EventStatus::Resource(status))
}

/// Colored stack status
pub fn stack_status(status: StackStatus) -> ColoredString {
    paint(&status.to_string(), EventStatus::Stack(status))
}

/// Colored event status, left-aligned to `width`
pub fn event_status(status: EventStatus, width: usize) -> ColoredString {
    paint(&format!("{:<width$}", status.to_string()), status)
}

fn paint(text: &str, status: EventStatus) -> ColoredString {
    match status {
        EventStatus::Resource(ResourceStatus::Complete | ResourceStatus::Deleted) => text.green(),
        EventStatus::Resource(ResourceStatus::Failed) => text.red().bold(),
        EventStatus::Resource(ResourceStatus::InProgress | ResourceStatus::Pending) => {
            text.yellow()
        }
        EventStatus::Resource(ResourceStatus::RolledBack) => text.magenta(),
        EventStatus::Resource(ResourceStatus::Retained) => text.cyan(),
        EventStatus::Stack(StackStatus::Complete) => text.green().bold(),
        EventStatus::Stack(StackStatus::Failed) => text.red().bold(),
        EventStatus::Stack(StackStatus::RollingBack | StackStatus::RolledBack) => {
            text.magenta().bold()
        }
        EventStatus::Stack(StackStatus::InProgress | StackStatus::Pending) => text.yellow(),
    }
}

/// Line diff between two renderings of a value
///
/// Unchanged lines are dropped; removed lines are prefixed `- `, added
/// lines `+ `.
pub fn diff_lines(before: &str, after: &str) -> Vec<String> {
    let diff = similar::TextDiff::from_lines(before, after);
    diff.iter_all_changes()
        .filter_map(|change| {
            let line = change.value().trim_end_matches('\n');
            match change.tag() {
                similar::ChangeTag::Delete => Some(format!("- {line}")),
                similar::ChangeTag::Insert => Some(format!("+ {line}")),
                similar::ChangeTag::Equal => None,
            }
        })
        .collect()
}

/// Print a [`diff_lines`] result, indented and colored
pub fn print_diff(lines: &[String], indent: usize) {
    let pad = " ".repeat(indent);
    for line in lines {
        if line.starts_with('-') {
            println!("{pad}{}", line.red());
        } else {
            println!("{pad}{}", line.green());
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use reconcile::ReplaceStrategy;

    #[test]
    fn test_action_markers() {
        assert_eq!(action_marker(Action::Create), "+");
        assert_eq!(action_marker(Action::Update), "~");
        assert_eq!(
            action_marker(Action::Replace(ReplaceStrategy::DestroyBeforeCreate)),
            "±"
        );
        assert_eq!(action_marker(Action::Delete), "-");
    }

    #[test]
    fn test_diff_lines_keeps_only_changes() {
        let before = "{\n  \"CidrBlock\": \"10.0.0.0/16\",\n  \"Tags\": []\n}\n";
        let after = "{\n  \"CidrBlock\": \"10.1.0.0/16\",\n  \"Tags\": []\n}\n";
        assert_eq!(
            diff_lines(before, after),
            vec![
                "-   \"CidrBlock\": \"10.0.0.0/16\",".to_string(),
                "+   \"CidrBlock\": \"10.1.0.0/16\",".to_string(),
            ]
        );
    }

    #[test]
    fn test_diff_lines_identical() {
        assert!(diff_lines("a\nb\n", "a\nb\n").is_empty());
    }

    #[test]
    fn test_status_text_survives_coloring() {
        assert!(
            resource_status(ResourceStatus::Failed)
                .to_string()
                .contains("FAILED")
        );
        assert!(
            stack_status(StackStatus::RolledBack)
                .to_string()
                .contains("ROLLED_BACK")
        );
    }
}
