//! Request fingerprints used as response cache keys.

use std::fmt;

use crate::types::normalize_language;

/// Field separator; cannot appear in normalized prompt text because all
/// whitespace and control characters are collapsed or rejected there.
const SEP: char = '\u{1f}';

/// Normalized identity of a generation request.
///
/// Two prompts that differ only in case, surrounding whitespace, or runs of
/// inner whitespace share a fingerprint. Anything that changes the outbound
/// call (language, provider, model, token budget, temperature) produces a
/// different one.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn new(
        prompt: &str,
        language: Option<&str>,
        provider: &str,
        model: Option<&str>,
        max_tokens: u32,
        temperature: f32,
    ) -> Self {
        let prompt = normalize_prompt(prompt);
        let language = language.and_then(normalize_language).unwrap_or_default();
        // Temperature is keyed on its bit pattern so 0.7 and 0.70000001
        // stay distinct while -0.0 and 0.0 are unified.
        let temperature = if temperature == 0.0 { 0.0f32 } else { temperature };
        Self(format!(
            "{provider}{SEP}{model}{SEP}{max_tokens}{SEP}{temp:08x}{SEP}{language}{SEP}{prompt}",
            model = model.unwrap_or(""),
            temp = temperature.to_bits(),
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub(crate) fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.replace(SEP, "|"))
    }
}

/// Trim, case-fold, and collapse whitespace runs to a single space.
///
/// Control characters are dropped so they cannot forge a field separator.
pub fn normalize_prompt(prompt: &str) -> String {
    let mut out = String::with_capacity(prompt.len());
    for word in prompt.split_whitespace() {
        if !out.is_empty() {
            out.push(' ');
        }
        out.extend(word.chars().filter(|c| !c.is_control()).flat_map(char::to_lowercase));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fp(prompt: &str) -> Fingerprint {
        Fingerprint::new(prompt, None, "local", Some("llama"), 500, 0.7)
    }

    #[test]
    fn trivial_presentation_differences_collide() {
        assert_eq!(fp("Tomato, chicken, rice"), fp("  tomato,   CHICKEN,\trice\n"));
    }

    #[test]
    fn different_prompts_differ() {
        assert_ne!(fp("tomato soup"), fp("tomato salad"));
    }

    #[test]
    fn provider_is_part_of_key() {
        let a = Fingerprint::new("soup", None, "local", Some("m"), 500, 0.7);
        let b = Fingerprint::new("soup", None, "openrouter", Some("m"), 500, 0.7);
        assert_ne!(a, b);
    }

    #[test]
    fn generation_parameters_are_part_of_key() {
        let base = Fingerprint::new("soup", None, "local", Some("m"), 500, 0.7);
        assert_ne!(base, Fingerprint::new("soup", None, "local", Some("n"), 500, 0.7));
        assert_ne!(base, Fingerprint::new("soup", None, "local", Some("m"), 501, 0.7));
        assert_ne!(base, Fingerprint::new("soup", None, "local", Some("m"), 500, 0.8));
    }

    #[test]
    fn language_is_part_of_key() {
        let en = Fingerprint::new("soup", Some("en"), "local", None, 500, 0.7);
        let es = Fingerprint::new("soup", Some("es"), "local", None, 500, 0.7);
        let unset = Fingerprint::new("soup", None, "local", None, 500, 0.7);
        assert_ne!(en, es);
        assert_ne!(en, unset);
        assert_eq!(es, Fingerprint::new("soup", Some(" ES"), "local", None, 500, 0.7));
        assert_eq!(unset, Fingerprint::new("soup", Some(""), "local", None, 500, 0.7));
    }

    #[test]
    fn separator_cannot_be_forged() {
        let forged = Fingerprint::new("x\u{1f}y", None, "local", None, 1, 0.0);
        let plain = Fingerprint::new("xy", None, "local", None, 1, 0.0);
        assert_eq!(forged, plain);
    }

    #[test]
    fn normalize_collapses_whitespace() {
        assert_eq!(normalize_prompt("  A \n\n B\tC  "), "a b c");
        assert_eq!(normalize_prompt(""), "");
    }
}
