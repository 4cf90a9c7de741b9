//! Status text preparation

/// CSS at-rules that networks would otherwise turn into mentions
const CSS_AT_RULES: [&str; 11] = [
    "charset",
    "import",
    "namespace",
    "media",
    "supports",
    "page",
    "font-face",
    "keyframes",
    "counter-style",
    "property",
    "layer",
];

const ZERO_WIDTH_SPACE: char = '\u{200B}';

/// Insert a zero width space after the `@` of CSS at-rules
pub fn defuse_at_rules(text: &str) -> String {
    CSS_AT_RULES.iter().fold(text.to_string(), |text, rule| {
        text.replace(
            &format!("@{rule}"),
            &format!("@{ZERO_WIDTH_SPACE}{rule}"),
        )
    })
}

/// Replace every `@` so no mention reaches anyone (test instances)
pub fn defuse_mentions(text: &str) -> String {
    text.replace('@', "%")
}

/// Build the status text for an item
///
/// Mentions are defused when `instance_url` contains one of the
/// `defuse_mentions_on` hosts.
pub fn prepare_status(text: &str, instance_url: Option<&str>, defuse_mentions_on: &[String]) -> String {
    let guarded = instance_url.is_some_and(|url| {
        defuse_mentions_on
            .iter()
            .any(|host| !host.is_empty() && url.contains(host.as_str()))
    });

    if guarded {
        defuse_mentions(text)
    } else {
        defuse_at_rules(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defuse_at_rules() {
        let text = "Use @media and @font-face, ask @nhoizey";
        let out = defuse_at_rules(text);
        assert_eq!(
            out,
            "Use @\u{200B}media and @\u{200B}font-face, ask @nhoizey"
        );
    }

    #[test]
    fn test_defuse_at_rules_every_occurrence() {
        let out = defuse_at_rules("@layer a; @layer b;");
        assert_eq!(out.matches('\u{200B}').count(), 2);
    }

    #[test]
    fn test_prepare_status_on_test_instance() {
        let hosts = vec!["mastodon.test.example".to_string()];
        let out = prepare_status(
            "Hello @friend@example.com",
            Some("https://mastodon.test.example"),
            &hosts,
        );
        assert_eq!(out, "Hello %friend%example.com");
    }

    #[test]
    fn test_prepare_status_on_regular_instance() {
        let hosts = vec!["mastodon.test.example".to_string()];
        let out = prepare_status("Hello @friend", Some("https://mamot.fr"), &hosts);
        assert_eq!(out, "Hello @friend");

        let out = prepare_status("Hello @friend", None, &hosts);
        assert_eq!(out, "Hello @friend");
    }

    #[test]
    fn test_empty_guard_host_is_ignored() {
        let out = prepare_status("@media", Some("https://mamot.fr"), &[String::new()]);
        assert_eq!(out, "@\u{200B}media");
    }
}
