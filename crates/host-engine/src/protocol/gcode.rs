use std::sync::OnceLock;

use regex::Regex;

fn comment_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\([^()]*\)|;.*|[/*].*\n").expect("valid regex"))
}

/// Strips inline comments (parenthetical, `;`, and `/`/`*` block markers)
/// and surrounding whitespace from a raw G-code line.
pub fn strip_comment(line: &str) -> String {
    comment_re().replace_all(line, "").trim().to_string()
}

/// XOR-reduces the bytes of `prefix` into a single checksum byte.
pub fn checksum(prefix: &str) -> u8 {
    prefix.bytes().fold(0u8, |acc, b| acc ^ b)
}

/// Frames `cmd` as `N<line_number> <cmd>*<checksum>`.
pub fn frame(line_number: u64, cmd: &str) -> String {
    let prefix = format!("N{line_number} {cmd}");
    let cs = checksum(&prefix);
    format!("{prefix}*{cs}")
}

/// Parses a `resend`/`rs` line into the target line number, by stripping
/// the substrings `N:`, `N`, and `:` before looking for the first integer
/// token.
pub fn parse_resend_line_number(line: &str) -> Option<u64> {
    let cleaned = line.replace("N:", "").replace('N', "").replace(':', "");
    cleaned.split_whitespace().find_map(|tok| tok.parse::<u64>().ok())
}

/// True if `line` looks like a request to resend a previously sent line.
pub fn is_resend_request(line: &str) -> bool {
    let lower = line.to_ascii_lowercase();
    lower.starts_with("resend") || lower.starts_with("rs")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checksum_matches_scenario_s1() {
        // S1: cmd "G1 X10", n = 42.
        let framed = frame(42, "G1 X10");
        let prefix = "N42 G1 X10";
        let expected: u8 = prefix.bytes().fold(0, |acc, b| acc ^ b);
        assert_eq!(framed, format!("N42 G1 X10*{expected}"));
    }

    #[test]
    fn strip_comment_handles_parens_and_semicolon() {
        assert_eq!(strip_comment("G1 X10 (move right) ; go"), "G1 X10");
        assert_eq!(strip_comment("   ; just a comment"), "");
        assert_eq!(strip_comment("G28"), "G28");
    }

    #[test]
    fn parse_resend_handles_common_shapes() {
        assert_eq!(parse_resend_line_number("rs N0\n"), Some(0));
        assert_eq!(parse_resend_line_number("Resend: 17"), Some(17));
        assert_eq!(parse_resend_line_number("resend N:42"), Some(42));
    }

    #[test]
    fn is_resend_request_is_case_insensitive() {
        assert!(is_resend_request("Resend: 3"));
        assert!(is_resend_request("rs 3"));
        assert!(!is_resend_request("ok T:200"));
    }
}
