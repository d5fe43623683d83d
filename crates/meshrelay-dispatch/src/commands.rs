//! Builtin chat commands and their pure-intent effects (§4.7).
//!
//! Parsing a command never touches shared state directly — it returns a
//! [`CommandResponse`] whose `effects` the dispatcher applies afterwards.
//! This keeps `/help`/`/status`/`/model`/`/reset` trivially testable without
//! a `Store` or `ChannelManager` in scope.

use meshrelay_core::{Config, Group, GroupFolder, Jid};

#[derive(Debug, Clone, PartialEq)]
pub enum CommandEffect {
    KillContainer(Jid),
    ClearSession(GroupFolder),
    SwitchModel { jid: Jid, model_id: String, runtime_id: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct CommandResponse {
    pub text: String,
    pub parse_mode: Option<String>,
    pub effects: Vec<CommandEffect>,
}

impl CommandResponse {
    fn text_only(text: impl Into<String>) -> Self {
        Self { text: text.into(), parse_mode: None, effects: Vec::new() }
    }
}

#[derive(Debug, Clone)]
pub struct ModelCatalogEntry {
    pub runtime_id: String,
    pub model_id: String,
}

/// One row per configured runtime, sorted by runtime id for stable numeric
/// indexing in `/model`'s argument resolution.
pub fn build_catalog(config: &Config) -> Vec<ModelCatalogEntry> {
    let mut entries: Vec<ModelCatalogEntry> = config
        .runtimes
        .iter()
        .map(|(runtime_id, rc)| ModelCatalogEntry {
            runtime_id: runtime_id.clone(),
            model_id: rc.default_model.clone(),
        })
        .collect();
    entries.sort_by(|a, b| a.runtime_id.cmp(&b.runtime_id));
    entries
}

/// `/model`'s argument resolution order (§4.7): exact id match; numeric
/// index into the catalog; substring match on id or runtime name; finally a
/// `runtime:model` prefix with the raw id accepted verbatim.
pub fn resolve_model(arg: &str, catalog: &[ModelCatalogEntry]) -> Option<(String, String)> {
    if let Some(e) = catalog.iter().find(|e| e.model_id == arg) {
        return Some((e.model_id.clone(), e.runtime_id.clone()));
    }

    if let Ok(idx) = arg.parse::<usize>() {
        if idx >= 1 && idx <= catalog.len() {
            let e = &catalog[idx - 1];
            return Some((e.model_id.clone(), e.runtime_id.clone()));
        }
    }

    let needle = arg.to_lowercase();
    if let Some(e) = catalog
        .iter()
        .find(|e| e.model_id.to_lowercase().contains(&needle) || e.runtime_id.to_lowercase().contains(&needle))
    {
        return Some((e.model_id.clone(), e.runtime_id.clone()));
    }

    if let Some((prefix, rest)) = arg.split_once(':') {
        if !prefix.is_empty() && !rest.is_empty() {
            return Some((rest.to_string(), prefix.to_string()));
        }
    }

    None
}

/// Parses and evaluates one of `/help`, `/status`, `/model`, `/reset`|`/new`.
/// `None` if `text` is not a recognized command.
pub fn handle_command(
    text: &str,
    group: &Group,
    reported_model: Option<&str>,
    catalog: &[ModelCatalogEntry],
) -> Option<CommandResponse> {
    let trimmed = text.trim();
    let mut parts = trimmed.splitn(2, char::is_whitespace);
    let command = parts.next()?;
    let rest = parts.next().unwrap_or("").trim();

    match command {
        "/help" => Some(CommandResponse::text_only(
            "Available commands:\n\
             /help - show this message\n\
             /status - show current session status\n\
             /model <id|index|name> - switch the active model\n\
             /reset (or /new) - clear the session and start fresh",
        )),
        "/status" => Some(status_response(group, reported_model)),
        "/model" => Some(model_response(rest, group, catalog)),
        "/reset" | "/new" => Some(reset_response(group)),
        _ => None,
    }
}

fn status_response(group: &Group, reported_model: Option<&str>) -> CommandResponse {
    let model = reported_model.unwrap_or("(none reported yet)");
    let trigger = if group.requires_trigger {
        format!("required ({})", group.trigger)
    } else {
        "not required".to_string()
    };
    CommandResponse::text_only(format!(
        "Group: {}\nFolder: {}\nModel: {model}\nTrigger: {trigger}",
        group.display_name, group.folder,
    ))
}

fn model_response(arg: &str, group: &Group, catalog: &[ModelCatalogEntry]) -> CommandResponse {
    if arg.is_empty() {
        let listing: Vec<String> = catalog
            .iter()
            .enumerate()
            .map(|(i, e)| format!("{}. {} ({})", i + 1, e.model_id, e.runtime_id))
            .collect();
        return CommandResponse::text_only(format!(
            "Usage: /model <id|index|name>\nAvailable models:\n{}",
            listing.join("\n")
        ));
    }

    match resolve_model(arg, catalog) {
        Some((model_id, runtime_id)) => CommandResponse {
            text: format!("Switched model to {model_id} ({runtime_id})."),
            parse_mode: None,
            effects: vec![CommandEffect::SwitchModel { jid: group.jid.clone(), model_id, runtime_id }],
        },
        None => CommandResponse::text_only(format!("No model matches {arg:?}.")),
    }
}

fn reset_response(group: &Group) -> CommandResponse {
    CommandResponse {
        text: "Session reset. A fresh sandbox will start on your next message.".to_string(),
        parse_mode: None,
        effects: vec![
            CommandEffect::KillContainer(group.jid.clone()),
            CommandEffect::ClearSession(group.folder.clone()),
        ],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn group() -> Group {
        Group::new_main(Jid::from("tg:1"), "Main", GroupFolder::new("main").unwrap())
    }

    fn catalog() -> Vec<ModelCatalogEntry> {
        vec![
            ModelCatalogEntry { runtime_id: "claude".to_string(), model_id: "claude-opus".to_string() },
            ModelCatalogEntry { runtime_id: "gemini".to_string(), model_id: "gemini-pro".to_string() },
        ]
    }

    #[test]
    fn help_returns_static_text_with_no_effects() {
        let resp = handle_command("/help", &group(), None, &catalog()).unwrap();
        assert!(resp.text.contains("/status"));
        assert!(resp.effects.is_empty());
    }

    #[test]
    fn reset_returns_kill_and_clear_effects() {
        let resp = handle_command("/reset", &group(), None, &catalog()).unwrap();
        assert_eq!(
            resp.effects,
            vec![
                CommandEffect::KillContainer(Jid::from("tg:1")),
                CommandEffect::ClearSession(GroupFolder::new("main").unwrap()),
            ]
        );
    }

    #[test]
    fn new_is_an_alias_for_reset() {
        let resp = handle_command("/new", &group(), None, &catalog()).unwrap();
        assert_eq!(resp.effects.len(), 2);
    }

    #[test]
    fn model_exact_id_match() {
        assert_eq!(
            resolve_model("claude-opus", &catalog()),
            Some(("claude-opus".to_string(), "claude".to_string()))
        );
    }

    #[test]
    fn model_numeric_index_is_one_based() {
        assert_eq!(resolve_model("2", &catalog()), Some(("gemini-pro".to_string(), "gemini".to_string())));
    }

    #[test]
    fn model_substring_match_on_runtime_name() {
        assert_eq!(resolve_model("gemi", &catalog()), Some(("gemini-pro".to_string(), "gemini".to_string())));
    }

    #[test]
    fn model_prefix_inferred_runtime_accepts_raw_id() {
        assert_eq!(
            resolve_model("codex:gpt-5-codex", &catalog()),
            Some(("gpt-5-codex".to_string(), "codex".to_string()))
        );
    }

    #[test]
    fn model_no_match_returns_none() {
        assert_eq!(resolve_model("nonexistent-xyz", &catalog()), None);
    }

    #[test]
    fn unrecognized_command_returns_none() {
        assert!(handle_command("hello there", &group(), None, &catalog()).is_none());
    }
}
