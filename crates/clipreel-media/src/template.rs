//! Structured command construction.
//!
//! Commands are an ordered argument vector. Configurable commands (the
//! downloader) are lists of [`ArgTemplate`]s whose `{name}` placeholders are
//! substituted per argument, so values never need shell quoting unless the
//! command is explicitly run through a shell.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use tokio::process::Command;

use crate::error::{MediaError, MediaResult};

/// Placeholder values for template rendering.
#[derive(Debug, Clone, Default)]
pub struct TemplateVars {
    values: BTreeMap<String, String>,
}

impl TemplateVars {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a placeholder value.
    pub fn set(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }
}

/// A single command argument containing `{name}` placeholders.
///
/// `{{` and `}}` render as literal braces.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArgTemplate(String);

impl ArgTemplate {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Substitute every placeholder. Unknown or unterminated placeholders
    /// are an error rather than being passed through.
    pub fn render(&self, vars: &TemplateVars) -> MediaResult<String> {
        let mut out = String::with_capacity(self.0.len());
        let mut chars = self.0.chars().peekable();

        while let Some(c) = chars.next() {
            match c {
                '{' if chars.peek() == Some(&'{') => {
                    chars.next();
                    out.push('{');
                }
                '}' if chars.peek() == Some(&'}') => {
                    chars.next();
                    out.push('}');
                }
                '{' => {
                    let mut key = String::new();
                    loop {
                        match chars.next() {
                            Some('}') => break,
                            Some(k) => key.push(k),
                            None => {
                                return Err(MediaError::InvalidTemplate(format!(
                                    "unterminated placeholder in '{}'",
                                    self.0
                                )))
                            }
                        }
                    }
                    let value = vars.get(&key).ok_or_else(|| {
                        MediaError::InvalidTemplate(format!(
                            "unknown placeholder {{{}}} in '{}'",
                            key, self.0
                        ))
                    })?;
                    out.push_str(value);
                }
                other => out.push(other),
            }
        }

        Ok(out)
    }
}

impl From<&str> for ArgTemplate {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}

/// Render a list of argument templates.
pub fn render_args(templates: &[ArgTemplate], vars: &TemplateVars) -> MediaResult<Vec<String>> {
    templates.iter().map(|t| t.render(vars)).collect()
}

/// A fully built external command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    program: String,
    args: Vec<String>,
    shell: bool,
    label: String,
}

impl CommandSpec {
    /// Create a command for `program` with no arguments.
    pub fn new(program: impl Into<String>) -> Self {
        let program = program.into();
        let label = program_label(&program);
        Self {
            program,
            args: Vec::new(),
            shell: false,
            label,
        }
    }

    /// Build from a program and rendered argument templates.
    pub fn from_templates(
        program: impl Into<String>,
        templates: &[ArgTemplate],
        vars: &TemplateVars,
    ) -> MediaResult<Self> {
        Ok(Self::new(program).args(render_args(templates, vars)?))
    }

    /// Append one argument.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append several arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Run through the platform shell instead of executing directly.
    pub fn with_shell(mut self, shell: bool) -> Self {
        self.shell = shell;
        self
    }

    /// Short name used in logs and process registry entries.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn arguments(&self) -> &[String] {
        &self.args
    }

    pub fn uses_shell(&self) -> bool {
        self.shell
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// The command as one quoted line, as the shell would receive it.
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .map(quote_arg)
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Build the tokio command. Stdio is configured by the runner.
    pub fn to_command(&self) -> Command {
        if self.shell {
            shell_command(&self.command_line())
        } else {
            let mut cmd = Command::new(&self.program);
            cmd.args(&self.args);
            cmd
        }
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.command_line())
    }
}

fn program_label(program: &str) -> String {
    std::path::Path::new(program)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| program.to_string())
}

#[cfg(not(windows))]
fn shell_command(line: &str) -> Command {
    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg(line);
    cmd
}

#[cfg(windows)]
fn shell_command(line: &str) -> Command {
    let mut cmd = Command::new("cmd");
    cmd.arg("/C").arg(line);
    cmd
}

fn is_plain(arg: &str) -> bool {
    !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./:=+,@%".contains(c))
}

/// POSIX single-quote escaping.
#[cfg(not(windows))]
pub fn quote_arg(arg: &str) -> String {
    if is_plain(arg) {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', r"'\''"))
    }
}

/// cmd.exe double-quote escaping.
#[cfg(windows)]
pub fn quote_arg(arg: &str) -> String {
    if is_plain(arg) {
        arg.to_string()
    } else {
        format!("\"{}\"", arg.replace('"', "\"\""))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_substitutes_whole_argument() {
        let vars = TemplateVars::new()
            .set("dest", "/cache/a b/clip.mp4")
            .set("url", "https://clips.example.com/x?y=1");
        assert_eq!(ArgTemplate::new("{dest}").render(&vars).unwrap(), "/cache/a b/clip.mp4");
        assert_eq!(
            ArgTemplate::new("--out={dest}").render(&vars).unwrap(),
            "--out=/cache/a b/clip.mp4"
        );
    }

    #[test]
    fn test_render_rejects_unknown_placeholder() {
        let err = ArgTemplate::new("{nope}").render(&TemplateVars::new()).unwrap_err();
        assert!(matches!(err, MediaError::InvalidTemplate(_)));

        let err = ArgTemplate::new("{dest").render(&TemplateVars::new()).unwrap_err();
        assert!(matches!(err, MediaError::InvalidTemplate(_)));
    }

    #[test]
    fn test_render_escaped_braces() {
        let vars = TemplateVars::new().set("n", "3");
        assert_eq!(ArgTemplate::new("{{x}}={n}").render(&vars).unwrap(), "{x}=3");
    }

    #[test]
    fn test_from_templates() {
        let templates: Vec<ArgTemplate> = ["-o", "{dest}", "{url}"].into_iter().map(ArgTemplate::from).collect();
        let vars = TemplateVars::new().set("dest", "out.mp4").set("url", "u");
        let spec = CommandSpec::from_templates("/usr/bin/yt-dlp", &templates, &vars).unwrap();
        assert_eq!(spec.arguments(), ["-o", "out.mp4", "u"]);
        assert_eq!(spec.label(), "yt-dlp");
    }

    #[cfg(unix)]
    #[test]
    fn test_command_line_quotes_only_when_needed() {
        let spec = CommandSpec::new("ffmpeg")
            .args(["-i", "my clip.mp4", "-vf", "drawtext=text='it'"]);
        assert_eq!(
            spec.command_line(),
            r#"ffmpeg -i 'my clip.mp4' -vf 'drawtext=text='\''it'\'''"#
        );
    }
}
