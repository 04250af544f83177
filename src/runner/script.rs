//! Shell script encoding for build steps.
//!
//! Build commands run as one `/bin/sh -e -c` invocation so the first
//! failing command aborts the step. Each command is echoed before it runs,
//! giving the log the familiar traced transcript.

use shell_words::quote;

use crate::payload::Netrc;

/// Encodes build commands into an entrypoint/command pair.
///
/// When credentials are supplied, the script first writes them to
/// `$HOME/.netrc` so git and friends can reach private remotes.
#[must_use]
pub fn encode(commands: &[String], netrc: &[Netrc]) -> (Vec<String>, Vec<String>) {
    let mut script = String::new();

    for entry in netrc {
        if entry.machine.is_empty() || entry.login.is_empty() {
            continue;
        }
        let line = format!(
            "machine {} login {} password {}",
            entry.machine, entry.login, entry.password
        );
        script.push_str(&format!("echo {} >> $HOME/.netrc\n", quote(&line)));
        script.push_str("chmod 0600 $HOME/.netrc\n");
    }

    for command in commands {
        let trace = format!("+ {command}");
        script.push_str(&format!("echo {}\n", quote(&trace)));
        script.push_str(command);
        script.push('\n');
    }

    (
        vec!["/bin/sh".to_string(), "-e".to_string(), "-c".to_string()],
        vec![script],
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_encode_traces_each_command() {
        let (entrypoint, command) = encode(&["go build".to_string()], &[]);
        assert_eq!(entrypoint, vec!["/bin/sh", "-e", "-c"]);
        assert_eq!(command.len(), 1);
        assert_eq!(command[0], "echo '+ go build'\ngo build\n");
    }

    #[test]
    fn test_encode_netrc_prologue() {
        let netrc = vec![Netrc {
            machine: "github.com".to_string(),
            login: "octocat".to_string(),
            password: "s3cret".to_string(),
        }];
        let (_, command) = encode(&["make".to_string()], &netrc);
        assert!(command[0].starts_with(
            "echo 'machine github.com login octocat password s3cret' >> $HOME/.netrc\n"
        ));
        assert!(command[0].contains("chmod 0600 $HOME/.netrc\n"));
    }

    #[test]
    fn test_encode_skips_incomplete_netrc() {
        let netrc = vec![Netrc::default()];
        let (_, command) = encode(&[], &netrc);
        assert_eq!(command[0], "");
    }
}
