//! Pattern matching utilities for prompt detection.

use once_cell::sync::Lazy;
use regex::bytes::Regex;

/// Default shell prompt: any `user@host...$ ` style prompt.
pub const DEFAULT_PROMPT: &str = r"[\[]?.*@.*[$#]\s?";

/// Active or standby controller login prompt.
pub const CONTROLLER_PROMPT: &str = r".*controller-[01][:| ].*\$ ?";

/// Root shell prompt.
pub const ROOT_PROMPT: &str = r".*root@.*# ?";

/// Password challenges from sudo, su, scp and ssh.
pub const PASSWORD_PROMPT: &str = r"(?i)(?:assword:|assword for .*:)\s?";

/// ssh/scp unknown host key confirmation.
pub const HOST_KEY_CONFIRM_PROMPT: &str = r"\(yes/no(?:/\[fingerprint\])?\)\?\s?";

/// Compiled [`PASSWORD_PROMPT`], anchored to the end of the stream.
pub static PASSWORD_PATTERN: Lazy<Regex> = Lazy::new(|| {
    compile_prompt_pattern(PASSWORD_PROMPT).expect("constant pattern compiles")
});

/// A line holding nothing but a (possibly signed) integer.
static EXIT_CODE_LINE: Lazy<regex::Regex> = Lazy::new(|| {
    regex::Regex::new(r"^\s*([-+]?\d+)\s*$").expect("constant pattern compiles")
});

/// Compile a prompt pattern string into a regex.
///
/// Anchors to end of string if no anchor is given, so the pattern only
/// matches a prompt that is the last thing the shell printed.
pub fn compile_prompt_pattern(pattern: &str) -> Result<Regex, regex::Error> {
    let pattern = if pattern.ends_with('$') && !pattern.ends_with("\\$") {
        pattern.to_string()
    } else {
        format!("(?:{})\\s*$", pattern)
    };

    Regex::new(&pattern)
}

/// Extract the exit code from the output of `echo $?`.
///
/// Takes the last integer-only line, so stray blank lines and echo
/// artifacts around it are ignored.
pub fn parse_exit_code<'a>(lines: impl DoubleEndedIterator<Item = &'a str>) -> Option<i32> {
    lines
        .rev()
        .filter_map(|line| EXIT_CODE_LINE.captures(line))
        .find_map(|caps| caps.get(1).and_then(|m| m.as_str().parse().ok()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compile_prompt_pattern() {
        let pattern = compile_prompt_pattern(r"controller-0:~\$").unwrap();
        assert!(pattern.is_match(b"controller-0:~$ "));
        assert!(pattern.is_match(b"some output\ncontroller-0:~$"));
        assert!(!pattern.is_match(b"controller-0:~$ ls\noutput"));

        let pattern = compile_prompt_pattern(r"router#$").unwrap();
        assert!(pattern.is_match(b"router#"));
    }

    #[test]
    fn test_escaped_dollar_is_not_an_anchor() {
        let pattern = compile_prompt_pattern(r"~\$").unwrap();
        assert!(pattern.is_match(b"sysadmin@controller-0:~$ "));
    }

    #[test]
    fn test_controller_prompt() {
        let pattern = compile_prompt_pattern(CONTROLLER_PROMPT).unwrap();
        assert!(pattern.is_match(b"sysadmin@controller-0:~$ "));
        assert!(pattern.is_match(b"[sysadmin@controller-1 ~(keystone_admin)]$ "));
        assert!(!pattern.is_match(b"sysadmin@compute-0:~$ "));
    }

    #[test]
    fn test_password_prompt() {
        assert!(PASSWORD_PATTERN.is_match(b"Password: "));
        assert!(PASSWORD_PATTERN.is_match(b"[sudo] password for sysadmin: "));
        assert!(!PASSWORD_PATTERN.is_match(b"Password: accepted\nsysadmin@host:~$ "));
    }

    #[test]
    fn test_root_prompt() {
        let pattern = compile_prompt_pattern(ROOT_PROMPT).unwrap();
        assert!(pattern.is_match(b"root@controller-0:~# "));
        assert!(!pattern.is_match(b"sysadmin@controller-0:~$ "));
    }

    #[test]
    fn test_parse_exit_code() {
        let lines = ["echo $?", "0", ""];
        assert_eq!(parse_exit_code(lines.iter().copied()), Some(0));

        let lines = ["echo $?", "127"];
        assert_eq!(parse_exit_code(lines.iter().copied()), Some(127));

        let lines = ["echo $?", "no number here"];
        assert_eq!(parse_exit_code(lines.iter().copied()), None);
    }
}
