//! Message catalog and localization.
//!
//! Translation is a plain function, [`translate`], handed to the composer
//! through [`crate::notify::ComposeContext`]. Templates use `{name}`
//! placeholders; countable phrases live under `<key>.one` / `<key>.other`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// A supported message language.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    En,
    De,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown language '{raw}': expected one of en, de")]
pub struct UnknownLanguage {
    pub raw: String,
}

impl Language {
    pub const ALL: [Self; 2] = [Self::En, Self::De];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::En => "en",
            Self::De => "de",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Language {
    type Err = UnknownLanguage;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "en" => Ok(Self::En),
            "de" => Ok(Self::De),
            _ => Err(UnknownLanguage { raw: s.to_string() }),
        }
    }
}

/// A message rendered once per language.
pub type LocalizedText = BTreeMap<Language, String>;

/// Signature of a translation function.
pub type Translate = fn(Language, &str, &[(&str, &str)]) -> String;

/// Pick the `.one` or `.other` variant of a countable key.
#[must_use]
pub fn plural_key(base: &str, count: usize) -> String {
    if count == 1 {
        format!("{base}.one")
    } else {
        format!("{base}.other")
    }
}

/// Render `key` in `lang`, substituting `{name}` placeholders from `params`.
///
/// Unknown keys fall back to English, then to the key itself. The template
/// is scanned once, so substituted values are never expanded again.
#[must_use]
pub fn translate(lang: Language, key: &str, params: &[(&str, &str)]) -> String {
    let text = template(lang, key)
        .or_else(|| template(Language::En, key))
        .unwrap_or(key);
    substitute(text, params)
}

/// Replace each `{name}` token in `text` with its value from `params`.
/// Tokens without a matching param are kept verbatim.
fn substitute(text: &str, params: &[(&str, &str)]) -> String {
    let mut rendered = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(open) = rest.find('{') {
        rendered.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let value = after.find('}').and_then(|close| {
            let name = &after[..close];
            params
                .iter()
                .find(|(param, _)| *param == name)
                .map(|(_, value)| (*value, close))
        });
        match value {
            Some((value, close)) => {
                rendered.push_str(value);
                rest = &after[close + 1..];
            }
            None => {
                rendered.push('{');
                rest = after;
            }
        }
    }
    rendered.push_str(rest);
    rendered
}

fn template(lang: Language, key: &str) -> Option<&'static str> {
    let text = match (lang, key) {
        // -- ascents --
        (Language::En, "ascent.body") => "{user} {verb} {route} {grade} {stars}",
        (Language::De, "ascent.body") => "{user} hat {route} {grade} {stars} {verb}",
        (Language::En, "ascent.verb.flash") => "flashed",
        (Language::De, "ascent.verb.flash") => "geflasht",
        (Language::En, "ascent.verb.send") => "sent",
        (Language::De, "ascent.verb.send") => "durchstiegen",
        (Language::En, "ascent.verb.repeat") => "repeated",
        (Language::De, "ascent.verb.repeat") => "wiederholt",
        (Language::En, "ascent.verb.attempt") => "attempted",
        (Language::De, "ascent.verb.attempt") => "versucht",
        (Language::En, "ascent.unnamed_route") => "an unnamed route",
        (Language::De, "ascent.unnamed_route") => "eine unbenannte Route",
        (Language::En, "ascent.more.one") => "and climbed {count} more route",
        (Language::En, "ascent.more.other") => "and climbed {count} more routes",
        (Language::De, "ascent.more.one") => "und {count} weitere Route geklettert",
        (Language::De, "ascent.more.other") => "und {count} weitere Routen geklettert",

        // -- moderation --
        (Language::En, "moderate.body") => "{user} updated {target}",
        (Language::De, "moderate.body") => "{user} hat {target} aktualisiert",

        // -- users --
        (Language::En, "user.role_created") => "{user} gave {other} the role {role}",
        (Language::De, "user.role_created") => "{user} hat {other} die Rolle {role} gegeben",
        (Language::En, "user.role_updated") => "{user} changed the role of {other} to {role}",
        (Language::De, "user.role_updated") => "{user} hat die Rolle von {other} auf {role} geändert",
        (Language::En, "user.role_deleted") => "{user} removed the role of {other}",
        (Language::De, "user.role_deleted") => "{user} hat die Rolle von {other} entfernt",
        (Language::En, "user.invitation_created") => "{user} invited {email}",
        (Language::De, "user.invitation_created") => "{user} hat {email} eingeladen",
        (Language::En, "user.invitation_accepted") => "{email} accepted the invitation of {user}",
        (Language::De, "user.invitation_accepted") => "{email} hat die Einladung von {user} angenommen",
        (Language::En, "user.invitation_deleted") => "{user} withdrew the invitation for {email}",
        (Language::De, "user.invitation_deleted") => "{user} hat die Einladung für {email} zurückgezogen",

        // -- shared suffix --
        (Language::En, "updates.more.one") => "and {count} more update",
        (Language::En, "updates.more.other") => "and {count} more updates",
        (Language::De, "updates.more.one") => "und {count} weitere Änderung",
        (Language::De, "updates.more.other") => "und {count} weitere Änderungen",

        _ => return None,
    };
    Some(text)
}

/// Collapse runs of whitespace left behind by empty placeholders.
#[must_use]
pub fn squash_spaces(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
