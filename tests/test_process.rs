//! Unit tests for background-process plumbing that needs no remote host.

use agentssh::process::{parse_exit_code, parse_pid};

// ---------------------------------------------------------------------------
// PID line parsing
// ---------------------------------------------------------------------------

#[test]
fn test_parse_pid_accepts_bare_integers() {
    assert_eq!(parse_pid("12345"), Some(12345));
    assert_eq!(parse_pid("12345\n"), Some(12345));
    assert_eq!(parse_pid("  999  "), Some(999));
}

#[test]
fn test_parse_pid_rejects_non_integers() {
    assert_eq!(parse_pid(""), None);
    assert_eq!(parse_pid("\n"), None);
    assert_eq!(parse_pid("not-a-pid"), None);
    assert_eq!(parse_pid("bash: syntax error near unexpected token"), None);
    assert_eq!(parse_pid("123 456"), None);
}

// ---------------------------------------------------------------------------
// Exit-code spool parsing
// ---------------------------------------------------------------------------

#[test]
fn test_parse_exit_code_accepts_numeric_content() {
    assert_eq!(parse_exit_code("0\n"), Some(0));
    assert_eq!(parse_exit_code("1"), Some(1));
    assert_eq!(parse_exit_code("143\n"), Some(143));
}

#[test]
fn test_parse_exit_code_unset_for_empty_or_garbage() {
    // An empty spool means the command has not written its status yet.
    assert_eq!(parse_exit_code(""), None);
    assert_eq!(parse_exit_code("\n"), None);
    assert_eq!(parse_exit_code("pending"), None);
}
