//! Shell quoting and shell-line invocation.

/// Default shell used for `run` lines.
pub fn default_shell() -> Vec<String> {
    #[cfg(windows)]
    {
        vec!["cmd".to_string(), "/C".to_string()]
    }

    #[cfg(not(windows))]
    {
        vec!["sh".to_string(), "-c".to_string()]
    }
}

/// Split a shell line into program and arguments for the given shell prefix
/// (e.g. `["bash", "-eo", "pipefail", "-c"]`).
pub fn shell_invocation(shell: &[String], line: &str) -> (String, Vec<String>) {
    match shell.split_first() {
        Some((program, rest)) => {
            let mut args = rest.to_vec();
            args.push(line.to_string());
            (program.clone(), args)
        }
        None => {
            let mut fallback = default_shell();
            let program = fallback.remove(0);
            fallback.push(line.to_string());
            (program, fallback)
        }
    }
}

/// Escape a value for use inside single quotes.
/// Replaces `'` with `'\''` (end quote, escaped quote, start quote).
pub fn escape_single_quote_content(value: &str) -> String {
    value.replace('\'', "'\\''")
}

/// Quote a single argument for display as a shell word.
/// - Empty strings become `''`
/// - Strings with shell metacharacters are wrapped in single quotes
/// - Embedded single quotes are escaped
pub fn quote_arg(arg: &str) -> String {
    if arg.is_empty() {
        return "''".to_string();
    }

    const SHELL_META: &[char] = &[
        ' ', '\t', '\n', '\'', '"', '\\', '$', '`', '!', '*', '?', '[', ']', '(', ')', '{', '}',
        '<', '>', '|', '&', ';', '#', '~',
    ];

    if !arg.contains(SHELL_META) {
        return arg.to_string();
    }

    format!("'{}'", escape_single_quote_content(arg))
}

/// Quote and join an argv.
pub fn quote_args(args: &[String]) -> String {
    args.iter()
        .map(|a| quote_arg(a))
        .collect::<Vec<_>>()
        .join(" ")
}
