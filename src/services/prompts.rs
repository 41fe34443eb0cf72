//! Prompt templates for each agent role (spec §4.4: the Agent Runner
//! "locates the prompt template for the named agent role").
//!
//! Templates are compiled in from `prompts/` at the workspace root
//! rather than read from disk at runtime, so a sprint directory never
//! needs to ship its own copy. Placeholders use `{{name}}` and are
//! substituted with [`render`].

pub fn template_for(role: &str) -> Option<&'static str> {
    match role {
        "research" => Some(include_str!("../../prompts/research.md")),
        "planning" => Some(include_str!("../../prompts/planning.md")),
        "developer" => Some(include_str!("../../prompts/developer.md")),
        "testing" => Some(include_str!("../../prompts/testing.md")),
        "review" => Some(include_str!("../../prompts/review.md")),
        "pr-create" => Some(include_str!("../../prompts/pr_create.md")),
        _ => None,
    }
}

/// Substitute every `{{key}}` placeholder with its value. Unmatched
/// placeholders are left as-is rather than erroring, since a missing
/// optional field (e.g. no prior review verdict yet) is common.
pub fn render(template: &str, vars: &[(&str, &str)]) -> String {
    let mut out = template.to_string();
    for (key, value) in vars {
        out = out.replace(&format!("{{{{{key}}}}}"), value);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_role_has_a_template() {
        for role in ["research", "planning", "developer", "testing", "review", "pr-create"] {
            assert!(template_for(role).is_some(), "missing template for {role}");
        }
    }

    #[test]
    fn render_substitutes_known_placeholders() {
        let out = render("hello {{name}}, task {{id}}", &[("name", "world"), ("id", "7")]);
        assert_eq!(out, "hello world, task 7");
    }

    #[test]
    fn render_leaves_unmatched_placeholders_intact() {
        let out = render("{{known}} and {{unknown}}", &[("known", "x")]);
        assert_eq!(out, "x and {{unknown}}");
    }
}
