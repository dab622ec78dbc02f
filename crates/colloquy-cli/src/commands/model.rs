//! /models listing

use colloquy_ai::{ModelInfo, ModelRef};

/// List one provider's models, marking the one in use
pub fn format_models(provider_id: &str, models: &[ModelInfo], current: Option<&ModelRef>) -> String {
    if models.is_empty() {
        return format!("{}: no models available", provider_id);
    }

    let mut output = format!("{}:\n", provider_id);
    for model in models {
        let in_use = current
            .is_some_and(|c| c.provider_id == model.provider_id && c.model_id == model.id);
        let marker = if in_use { " *" } else { "" };
        match &model.owned_by {
            Some(owner) => output.push_str(&format!("  {}{}  ({})\n", model.id, marker, owner)),
            None => output.push_str(&format!("  {}{}\n", model.id, marker)),
        }
    }
    output.push_str(&format!("Switch with: /model {} <id>", provider_id));
    output
}
