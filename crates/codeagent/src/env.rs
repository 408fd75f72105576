//! Child environment construction.

use std::collections::BTreeMap;

/// Names always carried into a minimal child environment.
const ALLOWED_NAMES: &[&str] = &[
    "PATH",
    "HOME",
    "USER",
    "SHELL",
    "TERM",
    "LANG",
    "LC_ALL",
    "LC_CTYPE",
    "OPENAI_API_KEY",
    "ANTHROPIC_API_KEY",
    "GEMINI_API_KEY",
    "GOOGLE_API_KEY",
    "AZURE_OPENAI_API_KEY",
    "HTTP_PROXY",
    "HTTPS_PROXY",
    "NO_PROXY",
    "http_proxy",
    "https_proxy",
    "no_proxy",
    "NODE_PATH",
    "PYTHONPATH",
    "GEM_PATH",
    "GOPATH",
    "DISPLAY",
    "COLORTERM",
    "TERM_PROGRAM",
    "SSH_AUTH_SOCK",
    "GPG_AGENT_INFO",
];

/// Prefixes whose every variable is carried into a minimal environment.
const ALLOWED_PREFIXES: &[&str] = &[
    "CODEX_",
    "CODEAGENT_",
    "OPENAI_",
    "ANTHROPIC_",
    "GEMINI_",
    "GOOGLE_",
];

/// Builds the reduced environment for a `minimal_env` spawn: the allow-list
/// names plus every variable matching an allowed prefix, snapshotted from
/// the parent environment.
pub fn minimal_child_env() -> BTreeMap<String, String> {
    std::env::vars()
        .filter(|(name, _)| {
            ALLOWED_NAMES.contains(&name.as_str())
                || ALLOWED_PREFIXES.iter().any(|p| name.starts_with(p))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_allowlisted_and_prefixed_names() {
        std::env::set_var("CODEAGENT_TEST_MARKER", "1");
        std::env::set_var("DEFINITELY_NOT_ALLOWED_VAR", "1");
        let env = minimal_child_env();
        assert!(env.contains_key("CODEAGENT_TEST_MARKER"));
        assert!(!env.contains_key("DEFINITELY_NOT_ALLOWED_VAR"));
        // PATH exists in any sane test environment and is allow-listed.
        assert!(env.contains_key("PATH"));
        std::env::remove_var("CODEAGENT_TEST_MARKER");
        std::env::remove_var("DEFINITELY_NOT_ALLOWED_VAR");
    }
}
