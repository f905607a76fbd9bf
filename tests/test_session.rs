//! Unit tests for command wrapping and the background launch wrapper.

use agentssh::session::{
    background_command, has_complex_quoting, is_simple_command, prepare_command, shell_quote,
};

// ---------------------------------------------------------------------------
// Simple-command detection
// ---------------------------------------------------------------------------

#[test]
fn test_plain_commands_are_simple() {
    assert!(is_simple_command("ls -la"));
    assert!(is_simple_command("uptime"));
    assert!(is_simple_command("tail -n 50 app.log"));
}

#[test]
fn test_shell_metacharacters_are_not_simple() {
    assert!(!is_simple_command("ls | wc -l"));
    assert!(!is_simple_command("echo hi > out.txt"));
    assert!(!is_simple_command("cat < in.txt"));
    assert!(!is_simple_command("make && make install"));
    assert!(!is_simple_command("true || false"));
    assert!(!is_simple_command("cd /tmp; ls"));
    assert!(!is_simple_command("echo $HOME"));
    assert!(!is_simple_command("echo `date`"));
    assert!(!is_simple_command("echo $(date)"));
    assert!(!is_simple_command("echo ${USER}"));
}

#[test]
fn test_mixed_quoting_is_not_simple() {
    assert!(!is_simple_command(r#"echo \"escaped\""#));
    assert!(!is_simple_command(r"echo \'escaped\'"));
}

// ---------------------------------------------------------------------------
// Complex-quoting detection
// ---------------------------------------------------------------------------

#[test]
fn test_escaped_quotes_are_complex() {
    assert!(has_complex_quoting(r"echo \'x\'"));
    assert!(has_complex_quoting(r#"echo \"x\""#));
    assert!(has_complex_quoting(r"echo a\\b"));
}

#[test]
fn test_ordinary_commands_are_not_complex() {
    assert!(!has_complex_quoting("ls | wc -l"));
    assert!(!has_complex_quoting("echo 'single quoted'"));
}

// ---------------------------------------------------------------------------
// Shell quoting
// ---------------------------------------------------------------------------

#[test]
fn test_shell_quote_passes_safe_strings_through() {
    assert_eq!(shell_quote("abc"), "abc");
    assert_eq!(shell_quote("/var/log/app.log"), "/var/log/app.log");
    assert_eq!(shell_quote("a-b_c.d"), "a-b_c.d");
}

#[test]
fn test_shell_quote_wraps_unsafe_strings() {
    assert_eq!(shell_quote("a b"), "'a b'");
    assert_eq!(shell_quote("ls | wc"), "'ls | wc'");
    assert_eq!(shell_quote(""), "''");
}

#[test]
fn test_shell_quote_escapes_single_quotes() {
    assert_eq!(shell_quote("it's"), r"'it'\''s'");
}

// ---------------------------------------------------------------------------
// Command preparation
// ---------------------------------------------------------------------------

#[test]
fn test_prepare_simple_command_is_untouched() {
    assert_eq!(prepare_command("ls -la"), "ls -la");
}

#[test]
fn test_prepare_wraps_shell_features_in_bash() {
    assert_eq!(prepare_command("ls | wc -l"), "bash -c 'ls | wc -l'");
}

#[test]
fn test_prepare_uses_heredoc_for_complex_quoting() {
    let prepared = prepare_command(r"echo \'tricky\'");
    assert!(prepared.starts_with("bash << 'EOF_CMD'\n"), "{prepared}");
    assert!(prepared.contains(r"echo \'tricky\'"));
    assert!(prepared.ends_with("\nEOF_CMD"), "{prepared}");
}

#[test]
fn test_heredoc_delimiter_grows_past_collisions() {
    let prepared = prepare_command("echo EOF_CMD \\'quoted\\'");
    assert!(prepared.starts_with("bash << 'EOF_EOF_CMD'\n"), "{prepared}");
    assert!(prepared.ends_with("\nEOF_EOF_CMD"), "{prepared}");
}

// ---------------------------------------------------------------------------
// Background launch wrapper
// ---------------------------------------------------------------------------

#[test]
fn test_background_command_shape() {
    let wrapper = background_command("sleep 60", "/tmp/x.out", "/tmp/x.err");

    assert!(wrapper.starts_with("nohup bash -c "), "{wrapper}");
    assert!(wrapper.contains("> /tmp/x.out 2> /tmp/x.err &"), "{wrapper}");
    assert!(wrapper.ends_with("echo $!"), "{wrapper}");
}

#[test]
fn test_background_command_records_exit_status() {
    let wrapper = background_command("sleep 60", "/tmp/x.out", "/tmp/x.err");
    assert!(wrapper.contains("echo $? > /tmp/x.out.exit"), "{wrapper}");
}

#[test]
fn test_background_command_survives_single_quotes() {
    let wrapper = background_command("echo 'hi there'", "/tmp/x.out", "/tmp/x.err");
    // The inner script is single-quote escaped, so the embedded quotes must
    // appear in their escaped form.
    assert!(wrapper.contains(r"'\''"), "{wrapper}");
    assert!(wrapper.contains("hi there"), "{wrapper}");
}
