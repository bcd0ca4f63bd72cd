//! Admin-editable message templates. Placeholders are `{name}`;
//! validation runs when an admin saves a template so a typo cannot
//! break sends later. HTML is limited to the subset Telegram accepts.

use crate::error::{ShopError, ShopResult};

/// Tags Telegram renders. Everything else makes the send fail with a
/// parse error, so it is rejected at save time.
const ALLOWED_TAGS: [&str; 8] = ["b", "i", "u", "s", "a", "code", "pre", "blockquote"];

/// Substitutes `{name}` placeholders. Unknown placeholders are left
/// in place rather than dropped, which makes a bad template visible in
/// the delivered message instead of silently eating text.
pub fn render(template: &str, vars: &[(&str, String)]) -> String {
    let mut out = template.to_string();
    for (name, value) in vars {
        out = out.replace(&format!("{{{name}}}"), value);
    }
    out
}

/// Checks a template against the placeholder names its slot supports.
pub fn validate(template: &str, allowed: &[&str]) -> ShopResult<()> {
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        let tail = &rest[open + 1..];
        let Some(close) = tail.find('}') else {
            return Err(ShopError::Validation("unclosed placeholder brace".into()));
        };
        let name = &tail[..close];
        if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(ShopError::Validation(format!("bad placeholder {{{name}}}")));
        }
        if !allowed.contains(&name) {
            return Err(ShopError::Validation(format!(
                "unknown placeholder {{{name}}}, allowed: {}",
                allowed.join(", ")
            )));
        }
        rest = &tail[close + 1..];
    }
    if rest.contains('}') {
        return Err(ShopError::Validation("stray closing brace".into()));
    }
    validate_html(template)
}

/// Rejects tags outside the Telegram subset. `<br>` passes because the
/// send path normalizes it to a newline first.
pub fn validate_html(text: &str) -> ShopResult<()> {
    let mut rest = text;
    while let Some(open) = rest.find('<') {
        let tail = &rest[open + 1..];
        let Some(close) = tail.find('>') else {
            return Err(ShopError::Validation("unclosed tag".into()));
        };
        let inner = tail[..close].trim_start_matches('/');
        let name: String = inner
            .chars()
            .take_while(|c| c.is_ascii_alphanumeric())
            .collect();
        let name = name.to_ascii_lowercase();
        if name != "br" && !ALLOWED_TAGS.contains(&name.as_str()) {
            return Err(ShopError::Validation(format!(
                "tag <{name}> is not in the Telegram subset"
            )));
        }
        rest = &tail[close + 1..];
    }
    Ok(())
}

/// `<br>` variants become newlines; Telegram has no line-break tag.
pub fn normalize_br(text: &str) -> String {
    let mut out = text.to_string();
    for br in ["<br/>", "<br />", "<br>", "<BR>"] {
        out = out.replace(br, "\n");
    }
    out
}

/// Plain-text rendering used when the HTML send is refused: drop every
/// tag, keep the text.
pub fn strip_tags(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_tag = false;
    for c in text.chars() {
        match c {
            '<' => in_tag = true,
            '>' if in_tag => in_tag = false,
            c if !in_tag => out.push(c),
            _ => {}
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_known_placeholders() {
        let out = render(
            "Key {email} works until {expiry}",
            &[("email", "u1-key1@nl1.bot".into()), ("expiry", "2026-09-01".into())],
        );
        assert_eq!(out, "Key u1-key1@nl1.bot works until 2026-09-01");
    }

    #[test]
    fn unknown_placeholder_survives_render() {
        let out = render("Hello {nmae}", &[("name", "Ann".into())]);
        assert_eq!(out, "Hello {nmae}");
    }

    #[test]
    fn validation_rejects_typos_and_broken_braces() {
        assert!(validate("Hello {name}", &["name"]).is_ok());
        assert!(validate("Hello {nmae}", &["name"]).is_err());
        assert!(validate("Hello {name", &["name"]).is_err());
        assert!(validate("Hello name}", &["name"]).is_err());
        assert!(validate("{}", &["name"]).is_err());
    }

    #[test]
    fn html_subset_is_enforced() {
        assert!(validate_html("<b>bold</b> and <code>x</code>").is_ok());
        assert!(validate_html("line<br>break").is_ok());
        assert!(validate_html("<script>alert(1)</script>").is_err());
        assert!(validate_html("<div>nope</div>").is_err());
        assert!(validate_html("broken <b").is_err());
    }

    #[test]
    fn br_becomes_newline_and_tags_strip() {
        assert_eq!(normalize_br("a<br>b<br/>c"), "a\nb\nc");
        assert_eq!(strip_tags("<b>Key</b>: <code>k1</code>"), "Key: k1");
    }
}
