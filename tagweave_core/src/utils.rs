use once_cell::sync::Lazy;
use regex::Regex;

static SEPARATOR_RUNS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[\s\-_.]+").unwrap());

static DISALLOWED: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^\p{L}\p{N}_()']").unwrap());

static QUALIFIER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?P<body>.+?)_?\((?P<qualifier>[^()]*)\)$").unwrap()
});

/// Normalises a name or tag into the lowercase, underscore-separated form
/// image indices use for tags.
///
/// `"  Anya  Forger "` becomes `"anya_forger"`, `"Spy x Family"` becomes
/// `"spy_x_family"`.
pub fn normalize_tag(raw: &str) -> String {
    let decoded = clean_html_entities(raw.trim());
    let lowered = decoded.to_lowercase();
    let separated = SEPARATOR_RUNS.replace_all(&lowered, "_");
    let cleaned = DISALLOWED.replace_all(&separated, "");
    // Removing characters can leave doubled or dangling separators behind.
    let collapsed = SEPARATOR_RUNS.replace_all(&cleaned, "_");
    collapsed.trim_matches('_').to_string()
}

/// Splits a tag into its body and trailing `(qualifier)`, if any.
///
/// `"anya_(spy_x_family)"` yields `("anya", Some("spy_x_family"))`.
pub fn split_qualifier(tag: &str) -> (&str, Option<&str>) {
    match QUALIFIER.captures(tag) {
        Some(caps) => {
            let body = caps.name("body").map(|m| m.as_str()).unwrap_or(tag);
            let qualifier = caps.name("qualifier").map(|m| m.as_str());
            (body.trim_end_matches('_'), qualifier)
        }
        None => (tag, None),
    }
}

/// Splits the space-separated tag strings most indices return.
pub fn split_tag_string(tags: &str) -> Vec<String> {
    tags.split_whitespace()
        .map(clean_html_entities)
        .filter(|t| !t.is_empty())
        .collect()
}

/// Converts `"anya_forger"` into `"Anya Forger"` for indices that use
/// display-cased tags.
pub fn title_case_tag(tag: &str) -> String {
    tag.split(['_', ' '])
        .filter(|w| !w.is_empty())
        .map(|word| {
            let mut out = String::with_capacity(word.len());
            let mut capitalize = true;
            for ch in word.chars() {
                if capitalize && ch.is_alphanumeric() {
                    out.extend(ch.to_uppercase());
                    capitalize = false;
                } else {
                    out.push(ch);
                }
            }
            out
        })
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn clean_html_entities(text: &str) -> String {
    let mut cleaned = text.to_string();
    // Gelbooru-family APIs sometimes double-encode.
    for _ in 0..2 {
        let decoded = html_escape::decode_html_entities(&cleaned).into_owned();
        if decoded == cleaned {
            break;
        }
        cleaned = decoded;
    }
    cleaned
}

/// Resolves protocol-relative and path-only URLs against `base`.
pub fn absolutize_url(base: &url::Url, raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    base.join(trimmed).ok().map(|u| u.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_tag() {
        assert_eq!(normalize_tag("  Anya  Forger "), "anya_forger");
        assert_eq!(normalize_tag("Spy x Family"), "spy_x_family");
        assert_eq!(normalize_tag("Anya (Spy x Family)"), "anya_(spy_x_family)");
        assert_eq!(normalize_tag("hatsune-miku"), "hatsune_miku");
        assert_eq!(normalize_tag("Miku!!"), "miku");
        assert_eq!(normalize_tag("jeanne_d'arc"), "jeanne_d'arc");
        assert_eq!(normalize_tag("Jeanne d&#039;Arc"), "jeanne_d'arc");
        assert_eq!(normalize_tag("___"), "");
    }

    #[test]
    fn test_split_qualifier() {
        assert_eq!(
            split_qualifier("anya_(spy_x_family)"),
            ("anya", Some("spy_x_family"))
        );
        assert_eq!(split_qualifier("anya_forger"), ("anya_forger", None));
        assert_eq!(split_qualifier("(qualifier_only)"), ("(qualifier_only)", None));
    }

    #[test]
    fn test_title_case_tag() {
        assert_eq!(title_case_tag("anya_forger"), "Anya Forger");
        assert_eq!(title_case_tag("anya_(spy_x_family)"), "Anya (Spy X Family)");
        assert_eq!(title_case_tag("anya"), "Anya");
    }

    #[test]
    fn test_split_tag_string() {
        assert_eq!(
            split_tag_string(" 1girl  anya_(spy_x_family) smile "),
            vec!["1girl", "anya_(spy_x_family)", "smile"]
        );
    }

    #[test]
    fn test_absolutize_url() {
        let base = url::Url::parse("https://safebooru.org/index.php").unwrap();
        assert_eq!(
            absolutize_url(&base, "//safebooru.org/images/1/a.jpg").as_deref(),
            Some("https://safebooru.org/images/1/a.jpg")
        );
        assert_eq!(
            absolutize_url(&base, "/images/2/b.png").as_deref(),
            Some("https://safebooru.org/images/2/b.png")
        );
        assert_eq!(absolutize_url(&base, "  "), None);
    }
}
