use std::sync::OnceLock;

use regex::Regex;

/// Alphabet for project-name suffixes: lowercase alphanumerics only, so the
/// result stays a valid hostname label.
const SUFFIX_ALPHABET: [char; 36] = [
    '0', '1', '2', '3', '4', '5', '6', '7', '8', '9', 'a', 'b', 'c', 'd', 'e', 'f', 'g', 'h', 'i',
    'j', 'k', 'l', 'm', 'n', 'o', 'p', 'q', 'r', 's', 't', 'u', 'v', 'w', 'x', 'y', 'z',
];

/// Program names the generation pipeline is expected to run. Anything else in
/// a command position is treated as model prose and dropped from history.
const KNOWN_PROGRAMS: &[&str] = &[
    "bun", "bunx", "npm", "npx", "pnpm", "yarn", "node", "deno", "tsc", "vite", "wrangler", "git",
    "rm", "mv", "cp", "mkdir", "touch", "ls", "cat", "echo", "sh", "bash",
];

pub fn short_suffix() -> String {
    nanoid::nanoid!(6, &SUFFIX_ALPHABET)
}

/// Derive a sandbox/project name from a free-form title: lowercased,
/// non-alphanumerics collapsed to `-`, truncated to 20 chars, then suffixed
/// with a fresh short id so repeated builds of the same query never collide.
pub fn derive_project_name(title: &str) -> String {
    let mut slug = String::new();
    let mut last_dash = true;
    for ch in title.to_lowercase().chars() {
        if ch.is_ascii_alphanumeric() {
            slug.push(ch);
            last_dash = false;
        } else if !last_dash {
            slug.push('-');
            last_dash = true;
        }
        if slug.len() >= 20 {
            break;
        }
    }
    let slug = slug.trim_matches('-');
    let slug = if slug.is_empty() { "app" } else { slug };
    format!("{slug}-{}", short_suffix())
}

fn project_name_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new("^[a-z0-9-_]{3,50}$").expect("valid regex"))
}

pub fn is_valid_project_name(name: &str) -> bool {
    project_name_regex().is_match(name)
}

/// Whether a string plausibly is a shell command worth keeping in the command
/// history: single line, no stray `undefined` interpolations, and a first
/// token that is either a known program or a path.
pub fn looks_like_command(entry: &str) -> bool {
    let entry = entry.trim();
    if entry.is_empty() || entry.contains(" undefined") || entry.contains('\n') {
        return false;
    }
    let Some(first) = entry.split_whitespace().next() else {
        return false;
    };
    KNOWN_PROGRAMS.contains(&first) || first.contains('/') || first.starts_with('.')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derive_project_name_slugifies_and_suffixes() {
        let name = derive_project_name("Build a Todo List!");
        assert!(name.starts_with("build-a-todo-list-"));
        let suffix = name.rsplit('-').next().unwrap();
        assert_eq!(suffix.len(), 6);
        assert!(is_valid_project_name(&name));
    }

    #[test]
    fn derive_project_name_truncates_long_titles() {
        let name = derive_project_name(
            "an extremely long project title that should definitely get truncated",
        );
        // 20 chars of slug + '-' + 6 char suffix.
        assert!(name.len() <= 27);
    }

    #[test]
    fn derive_project_name_handles_symbol_only_input() {
        let name = derive_project_name("!!!");
        assert!(name.starts_with("app-"));
    }

    #[test]
    fn project_name_validation() {
        assert!(is_valid_project_name("my-app_01"));
        assert!(!is_valid_project_name("ab"));
        assert!(!is_valid_project_name("Has-Caps"));
        assert!(!is_valid_project_name("spaces here"));
    }

    #[test]
    fn looks_like_command_accepts_real_commands() {
        assert!(looks_like_command("bun install zod"));
        assert!(looks_like_command("rm -rf src/old"));
        assert!(looks_like_command("./scripts/setup.sh --force"));
    }

    #[test]
    fn looks_like_command_rejects_prose_and_undefined() {
        assert!(!looks_like_command(""));
        assert!(!looks_like_command("   "));
        assert!(!looks_like_command("bun install undefined"));
        assert!(!looks_like_command("Please run the following command"));
        assert!(!looks_like_command("bun install zod\nrm -rf /"));
    }
}
