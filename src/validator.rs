use std::path::{Path, PathBuf};

use thiserror::Error;

/// Why a command was turned away before anything was spawned.
///
/// These are domain-level rejections: the RPC itself completes normally with
/// a single explanatory chunk, they are never surfaced as transport errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandRejected {
    #[error("Error: Malformed command line")]
    Malformed,

    #[error("Error: Empty command")]
    Empty,

    #[error("Error: Command not allowed")]
    Disallowed,
}

/// A command that passed the allow-list check, ready to execute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedCommand {
    /// The full command line with the binary rewritten to its absolute path,
    /// re-joined so that argument boundaries survive a second shell split.
    pub command_line: String,
    /// Base name of the resolved binary, used for per-binary metrics.
    pub binary: String,
}

/// Tokenizes an inbound command line and checks its binary against the
/// allow-list.
///
/// Tokenization follows shell word-splitting semantics (quotes and escapes
/// honored). The validator never re-interprets arguments beyond splitting:
/// the first token is resolved against the configured path prefix and the
/// tokens are re-joined with quoting that preserves the original boundaries.
#[derive(Debug, Clone)]
pub struct CommandValidator {
    allowed_binaries: Vec<String>,
    binary_path_prefix: PathBuf,
}

impl CommandValidator {
    pub fn new(allowed_binaries: Vec<String>, binary_path_prefix: PathBuf) -> Self {
        Self {
            allowed_binaries,
            binary_path_prefix,
        }
    }

    pub fn validate(&self, command: &str) -> Result<ValidatedCommand, CommandRejected> {
        let mut tokens = shlex::split(command).ok_or(CommandRejected::Malformed)?;

        let first = tokens.first().ok_or(CommandRejected::Empty)?;
        let binary = Path::new(first)
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or(CommandRejected::Disallowed)?
            .to_string();

        if !self.allowed_binaries.iter().any(|b| *b == binary) {
            return Err(CommandRejected::Disallowed);
        }

        tokens[0] = self
            .binary_path_prefix
            .join(&binary)
            .to_string_lossy()
            .into_owned();

        let command_line = shlex::try_join(tokens.iter().map(String::as_str))
            .map_err(|_| CommandRejected::Malformed)?;

        Ok(ValidatedCommand {
            command_line,
            binary,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validator() -> CommandValidator {
        CommandValidator::new(
            crate::config::DEFAULT_ALLOWED_BINARIES
                .iter()
                .map(|b| b.to_string())
                .collect(),
            PathBuf::from("/usr/lib/jellyfin-ffmpeg/"),
        )
    }

    #[test]
    fn allowed_binary_gets_prefix() {
        let validated = validator().validate("ffprobe -version").unwrap();
        assert_eq!(validated.binary, "ffprobe");
        assert_eq!(
            validated.command_line,
            "/usr/lib/jellyfin-ffmpeg/ffprobe -version"
        );
    }

    #[test]
    fn disallowed_binary_is_rejected() {
        let result = validator().validate("rm -rf /");
        assert_eq!(result, Err(CommandRejected::Disallowed));
        assert_eq!(
            CommandRejected::Disallowed.to_string(),
            "Error: Command not allowed"
        );
    }

    #[test]
    fn empty_command_is_rejected() {
        assert_eq!(validator().validate(""), Err(CommandRejected::Empty));
        assert_eq!(validator().validate("   "), Err(CommandRejected::Empty));
    }

    #[test]
    fn unbalanced_quoting_is_rejected() {
        assert_eq!(
            validator().validate("ffmpeg -i 'broken.mkv"),
            Err(CommandRejected::Malformed)
        );
    }

    #[test]
    fn absolute_path_is_resolved_by_base_name() {
        let validated = validator()
            .validate("/opt/somewhere/ffmpeg -i in.mkv out.mp4")
            .unwrap();
        assert_eq!(validated.binary, "ffmpeg");
        assert!(validated
            .command_line
            .starts_with("/usr/lib/jellyfin-ffmpeg/ffmpeg"));
    }

    #[test]
    fn quoted_arguments_keep_their_boundaries() {
        let validated = validator()
            .validate("ffmpeg -i 'my input.mkv' -metadata title='a b c' out.mp4")
            .unwrap();

        let retokenized = shlex::split(&validated.command_line).unwrap();
        assert_eq!(
            retokenized,
            vec![
                "/usr/lib/jellyfin-ffmpeg/ffmpeg",
                "-i",
                "my input.mkv",
                "-metadata",
                "title=a b c",
                "out.mp4",
            ]
        );
    }

    #[test]
    fn validation_is_idempotent_on_its_own_output() {
        let v = validator();
        let first = v.validate("ffprobe -i 'my input.mkv'").unwrap();
        let second = v.validate(&first.command_line).unwrap();

        assert_eq!(first.binary, second.binary);
        assert_eq!(first.command_line, second.command_line);
        assert_eq!(
            shlex::split(&first.command_line),
            shlex::split(&second.command_line)
        );
    }
}
