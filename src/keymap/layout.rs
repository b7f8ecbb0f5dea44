//! Keyboard layout settings from `/etc/default/keyboard`
//!
//! Only the four XKB fields are consumed. Missing fields fall back to the
//! Debian defaults (pc105 / us) rather than failing.

use tracing::debug;

/// The XKB model/layout/variant/options quadruple
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayoutSettings {
    pub model: String,
    pub layout: String,
    pub variant: String,
    pub options: String,
}

impl Default for LayoutSettings {
    fn default() -> Self {
        Self {
            model: "pc105".to_string(),
            layout: "us".to_string(),
            variant: String::new(),
            options: String::new(),
        }
    }
}

impl LayoutSettings {
    pub fn parse(contents: &str) -> Self {
        let mut settings = Self::default();

        for line in contents.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let value = unquote(value.trim());
            match key.trim() {
                "XKBMODEL" if !value.is_empty() => settings.model = value.to_string(),
                "XKBLAYOUT" if !value.is_empty() => settings.layout = value.to_string(),
                "XKBVARIANT" => settings.variant = value.to_string(),
                "XKBOPTIONS" => settings.options = value.to_string(),
                other => debug!(key = other, "Ignoring keyboard configuration key"),
            }
        }

        settings
    }

    /// Flags for the layout compiler, empty values omitted
    pub fn compiler_args(&self) -> Vec<String> {
        [
            ("-model", &self.model),
            ("-layout", &self.layout),
            ("-variant", &self.variant),
            ("-option", &self.options),
        ]
        .into_iter()
        .filter(|(_, value)| !value.is_empty())
        .flat_map(|(flag, value)| [flag.to_string(), value.clone()])
        .collect()
    }
}

fn unquote(value: &str) -> &str {
    for quote in ['"', '\''] {
        if let Some(inner) = value
            .strip_prefix(quote)
            .and_then(|v| v.strip_suffix(quote))
        {
            return inner;
        }
    }
    value
}
