//! Execution descriptors and argument templates.
//!
//! Templates substitute `{workdir}`, `{output_dir}`, `{structure}`, `{hotspots}` and
//! `{input.<name>}`. Literal braces are written `{{` and `}}`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

pub const BUILTIN_PLACEHOLDERS: [&str; 4] = ["workdir", "output_dir", "structure", "hotspots"];

/// Working directory of the tool inside a container.
pub const CONTAINER_WORKDIR: &str = "/work";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateError {
    #[error("unclosed placeholder in '{template}'")]
    Unclosed { template: String },
    #[error("unmatched '}}' in '{template}'")]
    Unmatched { template: String },
    #[error("unknown placeholder '{{{name}}}' in '{template}'")]
    UnknownPlaceholder { template: String, name: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Piece<'a> {
    Text(&'a str),
    Brace(char),
    Placeholder(&'a str),
}

fn tokenize(template: &str) -> Result<Vec<Piece<'_>>, TemplateError> {
    let mut pieces = Vec::new();
    let mut rest = template;
    while !rest.is_empty() {
        let Some(idx) = rest.find(['{', '}']) else {
            pieces.push(Piece::Text(rest));
            break;
        };
        if idx > 0 {
            pieces.push(Piece::Text(&rest[..idx]));
        }
        rest = &rest[idx..];
        if let Some(tail) = rest.strip_prefix("{{") {
            pieces.push(Piece::Brace('{'));
            rest = tail;
        } else if let Some(tail) = rest.strip_prefix("}}") {
            pieces.push(Piece::Brace('}'));
            rest = tail;
        } else if rest.starts_with('}') {
            return Err(TemplateError::Unmatched {
                template: template.to_string(),
            });
        } else {
            let close = rest.find('}').ok_or_else(|| TemplateError::Unclosed {
                template: template.to_string(),
            })?;
            pieces.push(Piece::Placeholder(rest[1..close].trim()));
            rest = &rest[close + 1..];
        }
    }
    Ok(pieces)
}

/// Placeholder names used by `template`, in order of appearance.
pub fn placeholders(template: &str) -> Result<Vec<String>, TemplateError> {
    Ok(tokenize(template)?
        .into_iter()
        .filter_map(|piece| match piece {
            Piece::Placeholder(name) => Some(name.to_string()),
            _ => None,
        })
        .collect())
}

/// Rejects placeholders that are neither built in nor `input.<name>` for a declared input.
pub fn validate_template(template: &str, inputs: &[&str]) -> Result<(), TemplateError> {
    for name in placeholders(template)? {
        let known = BUILTIN_PLACEHOLDERS.contains(&name.as_str())
            || name
                .strip_prefix("input.")
                .is_some_and(|input| inputs.contains(&input));
        if !known {
            return Err(TemplateError::UnknownPlaceholder {
                template: template.to_string(),
                name,
            });
        }
    }
    Ok(())
}

/// Values substituted into argument templates.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TemplateVars {
    values: BTreeMap<String, String>,
}

impl TemplateVars {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(name, value);
        self
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.values.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    pub fn render(&self, template: &str) -> Result<String, TemplateError> {
        let mut out = String::with_capacity(template.len());
        for piece in tokenize(template)? {
            match piece {
                Piece::Text(text) => out.push_str(text),
                Piece::Brace(c) => out.push(c),
                Piece::Placeholder(name) => {
                    let value = self
                        .get(name)
                        .ok_or_else(|| TemplateError::UnknownPlaceholder {
                            template: template.to_string(),
                            name: name.to_string(),
                        })?;
                    out.push_str(value);
                }
            }
        }
        Ok(out)
    }
}

/// Extra bind mount for container runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mount {
    pub host: PathBuf,
    pub container: String,
    #[serde(default)]
    pub read_only: bool,
}

/// What gets executed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Program {
    Executable {
        path: PathBuf,
    },
    Container {
        runtime: String,
        image: String,
        #[serde(default)]
        gpus: bool,
        #[serde(default)]
        mounts: Vec<Mount>,
    },
}

impl Program {
    pub fn is_container(&self) -> bool {
        matches!(self, Self::Container { .. })
    }
}

/// Fully rendered process invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    pub env: BTreeMap<String, String>,
    /// Argument vector run after the process is killed, such as removing its container.
    pub teardown: Option<Vec<String>>,
}

impl fmt::Display for CommandLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", quote_arg(&self.program))?;
        for arg in &self.args {
            write!(f, " {}", quote_arg(arg))?;
        }
        Ok(())
    }
}

fn quote_arg(arg: &str) -> String {
    if !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./:=,@+%".contains(c))
    {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', r"'\''"))
    }
}

/// One external tool run: program, arguments, limits, and declared outputs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionDescriptor {
    /// Identifier of the owning job; names containers together with `tool` and the attempt.
    pub run_id: String,
    pub tool: String,
    pub program: Program,
    /// Argument templates.
    pub args: Vec<String>,
    pub workdir: PathBuf,
    pub timeout: Duration,
    pub max_attempts: u32,
    /// Paths relative to `workdir`; a `*` in the last component matches any run of characters.
    pub outputs: Vec<String>,
    pub env: BTreeMap<String, String>,
}

impl ExecutionDescriptor {
    /// Renders the argument templates for `vars`.
    pub fn render_args(&self, vars: &TemplateVars) -> Result<Vec<String>, TemplateError> {
        self.args.iter().map(|arg| vars.render(arg)).collect()
    }

    /// Name given to the container of `attempt`: `epiforge-<run_id>-<tool>-<attempt>`.
    ///
    /// Characters the container runtimes reject are replaced with `-`.
    pub fn container_name(&self, attempt: u32) -> String {
        let raw = format!("epiforge-{}-{}-{attempt}", self.run_id, self.tool);
        raw.chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-') {
                    c
                } else {
                    '-'
                }
            })
            .collect()
    }

    /// Renders the command line of `attempt` for `vars`.
    ///
    /// # Errors
    ///
    /// Returns a [`TemplateError`] when an argument references an unknown placeholder.
    pub fn command(&self, vars: &TemplateVars, attempt: u32) -> Result<CommandLine, TemplateError> {
        Ok(self.command_with(self.render_args(vars)?, attempt))
    }

    /// Builds the command line of `attempt` from already rendered arguments.
    ///
    /// Container runs become `<runtime> run --rm --name <name> [--gpus all] -v <workdir>:/work
    /// [-v mounts] -w /work <image> <args>` and tear down with `<runtime> rm -f <name>`.
    pub fn command_with(&self, rendered: Vec<String>, attempt: u32) -> CommandLine {
        match &self.program {
            Program::Executable { path } => CommandLine {
                program: path.to_string_lossy().into_owned(),
                args: rendered,
                cwd: self.workdir.clone(),
                env: self.env.clone(),
                teardown: None,
            },
            Program::Container {
                runtime,
                image,
                gpus,
                mounts,
            } => {
                let name = self.container_name(attempt);
                let mut args = vec![
                    "run".to_string(),
                    "--rm".to_string(),
                    "--name".to_string(),
                    name.clone(),
                ];
                if *gpus {
                    args.extend(["--gpus".to_string(), "all".to_string()]);
                }
                args.push("-v".to_string());
                args.push(format!("{}:{CONTAINER_WORKDIR}", self.workdir.display()));
                for mount in mounts {
                    args.push("-v".to_string());
                    let suffix = if mount.read_only { ":ro" } else { "" };
                    args.push(format!(
                        "{}:{}{suffix}",
                        mount.host.display(),
                        mount.container
                    ));
                }
                for (key, value) in &self.env {
                    args.push("-e".to_string());
                    args.push(format!("{key}={value}"));
                }
                args.extend([
                    "-w".to_string(),
                    CONTAINER_WORKDIR.to_string(),
                    image.clone(),
                ]);
                args.extend(rendered);
                CommandLine {
                    program: runtime.clone(),
                    args,
                    cwd: self.workdir.clone(),
                    env: BTreeMap::new(),
                    teardown: Some(vec![runtime.clone(), "rm".to_string(), "-f".to_string(), name]),
                }
            }
        }
    }
}
