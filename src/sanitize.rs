use ammonia::Builder;
use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::sync::OnceLock;

static SCHEME_RE: OnceLock<Regex> = OnceLock::new();
static EVENT_HANDLER_RE: OnceLock<Regex> = OnceLock::new();

/// Tags a message body may keep. Everything else is stripped, and no
/// attributes survive on these either.
const MESSAGE_TAGS: &[&str] = &["b", "i", "u", "em", "strong", "br", "p"];

pub const ROOM_NAME_MAX_CHARS: usize = 100;

fn scheme_re() -> &'static Regex {
    SCHEME_RE.get_or_init(|| Regex::new(r"(?i)(?:javascript|data|vbscript)\s*:").expect("scheme regex"))
}

fn event_handler_re() -> &'static Regex {
    EVENT_HANDLER_RE.get_or_init(|| Regex::new(r"(?i)\bon\w+\s*=").expect("handler regex"))
}

/// Repeatedly apply `re` until the text stops changing. A single pass can
/// reassemble the pattern from its own leftovers ("javajavascript:script:").
fn strip_to_fixed_point(re: &Regex, input: &str) -> String {
    let mut out = input.to_string();
    loop {
        let next = re.replace_all(&out, "").into_owned();
        if next == out {
            return out;
        }
        out = next;
    }
}

/// Scrub a plain-text field: entity-escape, drop every tag, drop dangerous
/// URI schemes, trim. Output is a fixed point under re-application.
pub fn sanitize_text(input: &str) -> String {
    let cleaned = Builder::default()
        .tags(HashSet::new())
        .clean(input)
        .to_string();
    let cleaned = strip_to_fixed_point(scheme_re(), &cleaned);
    cleaned.trim().to_string()
}

/// Scrub a message body, keeping basic formatting tags but no attributes,
/// no event handlers and no dangerous schemes.
pub fn sanitize_message_body(input: &str) -> String {
    let cleaned = Builder::default()
        .tags(MESSAGE_TAGS.iter().copied().collect())
        .generic_attributes(HashSet::new())
        .tag_attributes(HashMap::new())
        .clean(input)
        .to_string();
    let cleaned = strip_to_fixed_point(scheme_re(), &cleaned);
    let cleaned = strip_to_fixed_point(event_handler_re(), &cleaned);
    cleaned.trim().to_string()
}

/// Room names are plain text clamped to [`ROOM_NAME_MAX_CHARS`].
pub fn sanitize_room_name(input: &str) -> String {
    let cleaned = sanitize_text(input);
    if cleaned.chars().count() <= ROOM_NAME_MAX_CHARS {
        cleaned
    } else {
        cleaned.chars().take(ROOM_NAME_MAX_CHARS).collect::<String>().trim_end().to_string()
    }
}
