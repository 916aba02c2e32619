use anyhow::Result;
use inquire::{Confirm, Select, Text};

use capgraph_core::{Approval, Capability, CapabilityDraft, EnablerDraft, Priority};

const NO_PARENT_OPTION: &str = "(none)";

fn prompt_optional(label: &str) -> Result<Option<String>> {
    let value = Text::new(label).prompt()?;
    Ok(Some(value.trim().to_string()).filter(|v| !v.is_empty()))
}

fn prompt_priority() -> Result<String> {
    let options = vec![Priority::High, Priority::Medium, Priority::Low];
    let priority = Select::new("Priority:", options)
        .with_starting_cursor(1)
        .prompt()?;
    Ok(priority.to_string())
}

fn prompt_approval() -> Result<String> {
    let options = vec![Approval::NotApproved, Approval::Pending, Approval::Approved];
    Ok(Select::new("Approval:", options).prompt()?.to_string())
}

/// Prompts the user for a new capability
pub fn prompt_new_capability() -> Result<CapabilityDraft> {
    let name = Text::new("Name:").prompt()?;

    // Use the Editor type for multiline input
    let description = inquire::Editor::new("Purpose:").prompt()?;

    Ok(CapabilityDraft {
        name,
        description: Some(description.trim().to_string()).filter(|d| !d.is_empty()),
        status: None,
        approval: Some(prompt_approval()?),
        priority: Some(prompt_priority()?),
        owner: prompt_optional("Owner:")?,
        system: prompt_optional("System:")?,
        component: prompt_optional("Component:")?,
    })
}

/// Prompts the user for a new enabler and its parent capability
pub fn prompt_new_enabler(capabilities: &[Capability]) -> Result<(EnablerDraft, Option<String>)> {
    let name = Text::new("Name:").prompt()?;
    let description = prompt_optional("Description:")?;

    let mut options = vec![NO_PARENT_OPTION.to_string()];
    options.extend(
        capabilities
            .iter()
            .map(|c| format!("{} {}", c.id, c.name)),
    );
    let selection = Select::new("Capability:", options).prompt()?;
    let parent = if selection == NO_PARENT_OPTION {
        None
    } else {
        // Extract the id from the selection (before the space)
        selection.split(' ').next().map(str::to_string)
    };

    let draft = EnablerDraft {
        name,
        description,
        status: None,
        approval: Some(prompt_approval()?),
        priority: Some(prompt_priority()?),
        owner: prompt_optional("Owner:")?,
    };
    Ok((draft, parent))
}

/// Asks before deleting `id`
pub fn confirm_delete(id: &str, name: &str) -> Result<bool> {
    let prompt = format!("Delete {} ({})?", id, name);
    Ok(Confirm::new(&prompt).with_default(false).prompt()?)
}
