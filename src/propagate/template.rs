//! Sidecar config rendering.
//!
//! The opencode config is regenerated from its template on every start. The
//! template is plain text with a literal placeholder, not a template language.

use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;

use super::{io_err, write_atomic, PropagateResult};
use crate::config::SidecarSettings;
use crate::credential::Token;
use crate::permissions::{self, ServiceUser};

/// Replace every occurrence of `placeholder` with the token.
pub fn render_template(template: &str, placeholder: &str, token: &Token) -> String {
    if placeholder.is_empty() {
        return template.to_string();
    }
    template.replace(placeholder, token.as_str())
}

/// Render the sidecar template to its destination and hand it to `owner`.
///
/// Always overwrites the destination. Returns the written path.
pub fn render_sidecar_config(
    settings: &SidecarSettings,
    token: &Token,
    owner: Option<&ServiceUser>,
) -> PropagateResult<PathBuf> {
    let template = std::fs::read_to_string(&settings.template_path)
        .map_err(|e| io_err(&settings.template_path, e))?;

    let occurrences = template.matches(settings.placeholder.as_str()).count();
    if occurrences == 0 {
        tracing::warn!(
            template = %settings.template_path.display(),
            placeholder = %settings.placeholder,
            "Sidecar template has no token placeholder"
        );
    }

    let rendered = render_template(&template, &settings.placeholder, token);

    let mode = std::fs::metadata(&settings.output_path)
        .map(|m| m.permissions().mode() & 0o7777)
        .unwrap_or(0o644);
    write_atomic(&settings.output_path, rendered.as_bytes(), mode)?;

    if let Some(owner) = owner {
        permissions::set_owner(&settings.output_path, owner)?;
        if let Some(parent) = settings.output_path.parent() {
            permissions::set_owner(parent, owner)?;
        }
    }

    tracing::info!(
        path = %settings.output_path.display(),
        occurrences,
        "Rendered sidecar config"
    );
    Ok(settings.output_path.clone())
}
