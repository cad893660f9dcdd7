//! Job submissions and per-tool configuration.
//!
//! A [`JobRequest`] is what a user submits. [`JobRequest::validate`] checks it once against the
//! [`Settings`] and produces a [`ValidatedJob`]; the orchestrator only accepts the validated
//! form.

use crate::config::Settings;
use crate::export::roles::normalize_role;
use crate::hotspot::{HotspotScope, HotspotSpec};
use crate::numbering::CdrScheme;
use crate::supervisor::descriptor::{Program, TemplateError, validate_template};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Component, Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Input name under which a standardized scaffold is offered to tools.
pub const SCAFFOLD_INPUT: &str = "scaffold";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JobRequest {
    pub target: PathBuf,
    /// Optional antibody framework standardized next to the target.
    #[serde(default)]
    pub scaffold: Option<PathBuf>,
    /// Scaffold author chain whose CDRs are annotated. Defaults to its first amino-acid chain.
    #[serde(default)]
    pub scaffold_chain: Option<String>,
    /// Falls back to the configured numbering scheme.
    #[serde(default)]
    pub numbering_scheme: Option<CdrScheme>,
    #[serde(default)]
    pub hotspots: Vec<HotspotSpec>,
    /// Falls back to the configured default.
    #[serde(default)]
    pub hotspot_scope: Option<HotspotScope>,
    /// Role hints such as `{"A": "T"}` or `{"heavy": "B"}`.
    #[serde(default)]
    pub chain_roles: BTreeMap<String, String>,
    /// Abort the job when a hotspot is not found. Malformed hotspots always abort it.
    #[serde(default)]
    pub strict_hotspots: bool,
    #[serde(default)]
    pub tools: Vec<ToolConfig>,
}

impl JobRequest {
    /// Parses a submission, as TOML when the path ends in `.toml` and as JSON otherwise.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let is_toml = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
        let parsed = if is_toml {
            toml::from_str(&content).map_err(|e| e.to_string())
        } else {
            serde_json::from_str(&content).map_err(|e| e.to_string())
        };
        parsed.map_err(|details| ConfigError::Parse {
            path: path.to_path_buf(),
            details,
        })
    }

    /// Checks the whole submission once.
    ///
    /// # Errors
    ///
    /// Rejects missing structure files, unknown role hints, duplicate or unsafe tool names,
    /// zero limits, unsafe output paths, and argument templates with unknown placeholders.
    pub fn validate(self, settings: &Settings) -> Result<ValidatedJob, ConfigError> {
        require_file("target", &self.target)?;
        if let Some(scaffold) = &self.scaffold {
            require_file(SCAFFOLD_INPUT, scaffold)?;
        }

        for (key, value) in &self.chain_roles {
            if normalize_role(key).is_none() && normalize_role(value).is_none() {
                return Err(ConfigError::InvalidRoleHint {
                    chain: key.clone(),
                    role: value.clone(),
                });
            }
        }

        let mut names = BTreeSet::new();
        let mut tools = Vec::with_capacity(self.tools.len());
        for config in &self.tools {
            let plan = config.plan(settings, self.scaffold.is_some())?;
            if !names.insert(plan.name.clone()) {
                return Err(ConfigError::DuplicateTool(plan.name));
            }
            tools.push(plan);
        }

        if self.scaffold_chain.is_some() && self.scaffold.is_none() {
            return Err(ConfigError::ScaffoldChainWithoutScaffold);
        }

        Ok(ValidatedJob {
            hotspot_scope: self.hotspot_scope.unwrap_or(settings.hotspot_scope),
            numbering_scheme: self.numbering_scheme.unwrap_or(settings.numbering_scheme),
            request: self,
            tools,
        })
    }
}

fn require_file(what: &str, path: &Path) -> Result<(), ConfigError> {
    if path.is_file() {
        Ok(())
    } else {
        Err(ConfigError::MissingInput {
            what: what.to_string(),
            path: path.to_path_buf(),
        })
    }
}

/// One enabled downstream tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "tool", rename_all = "snake_case")]
pub enum ToolConfig {
    /// RFantibody diffusion run on the HLT-formatted target.
    Rfantibody {
        #[serde(default)]
        name: Option<String>,
        #[serde(default = "default_rfantibody_image")]
        image: String,
        #[serde(default = "default_num_designs")]
        num_designs: u32,
        #[serde(default)]
        timeout_secs: Option<u64>,
        #[serde(default)]
        max_attempts: Option<u32>,
    },
    /// BoltzGen design run driven by the binding YAML.
    Boltzgen {
        #[serde(default)]
        name: Option<String>,
        #[serde(default = "default_boltzgen_image")]
        image: String,
        #[serde(default = "default_num_designs")]
        num_designs: u32,
        #[serde(default)]
        timeout_secs: Option<u64>,
        #[serde(default)]
        max_attempts: Option<u32>,
    },
    /// Any other program with explicit argument templates.
    Custom {
        name: String,
        program: Program,
        #[serde(default)]
        args: Vec<String>,
        /// Which generated artifact `{hotspots}` refers to.
        #[serde(default)]
        hotspots_format: HotspotsFormat,
        /// Extra files copied into the tool's `inputs/`, addressable as `{input.<name>}`.
        #[serde(default)]
        inputs: BTreeMap<String, PathBuf>,
        #[serde(default)]
        outputs: Vec<String>,
        #[serde(default)]
        env: BTreeMap<String, String>,
        #[serde(default)]
        timeout_secs: Option<u64>,
        #[serde(default)]
        max_attempts: Option<u32>,
    },
}

fn default_rfantibody_image() -> String {
    "rfantibody".to_string()
}

fn default_boltzgen_image() -> String {
    "boltzgen".to_string()
}

fn default_num_designs() -> u32 {
    20
}

/// Generated artifact handed to a tool as `{hotspots}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HotspotsFormat {
    Rfantibody,
    Boltzgen,
    #[default]
    Report,
}

/// Structure handed to a tool as `{structure}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StructureInput {
    /// Canonical mmCIF copy of the target.
    Canonical,
    /// Role-rechained PDB with hotspot remarks.
    Hlt,
}

/// Fully checked execution plan for one tool; turned into a descriptor once the job
/// directory exists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolPlan {
    pub name: String,
    pub program: Program,
    pub args: Vec<String>,
    pub structure: StructureInput,
    pub hotspots: HotspotsFormat,
    pub inputs: BTreeMap<String, PathBuf>,
    pub outputs: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub timeout: Duration,
    pub max_attempts: u32,
}

impl ToolConfig {
    fn plan(&self, settings: &Settings, has_scaffold: bool) -> Result<ToolPlan, ConfigError> {
        let container = |image: &str| Program::Container {
            runtime: settings.container_runtime.clone(),
            image: image.to_string(),
            gpus: settings.gpus,
            mounts: Vec::new(),
        };

        let plan = match self {
            Self::Rfantibody {
                name,
                image,
                num_designs,
                timeout_secs,
                max_attempts,
            } => {
                let mut args: Vec<String> = [
                    "python",
                    "scripts/rfdiffusion_inference.py",
                    "--target_pdb",
                    "{structure}",
                    "--hotspot_file",
                    "{hotspots}",
                    "--num_designs",
                ]
                .map(String::from)
                .to_vec();
                args.push(num_designs.to_string());
                args.extend(["--outdir".to_string(), "{output_dir}".to_string()]);
                if has_scaffold {
                    args.extend([
                        "--antibody.framework_pdb".to_string(),
                        format!("{{input.{SCAFFOLD_INPUT}}}"),
                    ]);
                }
                ToolPlan {
                    name: name.clone().unwrap_or_else(|| "rfantibody".to_string()),
                    program: container(image),
                    args,
                    structure: StructureInput::Hlt,
                    hotspots: HotspotsFormat::Rfantibody,
                    inputs: BTreeMap::new(),
                    outputs: vec!["outputs/*.pdb".to_string()],
                    env: BTreeMap::new(),
                    timeout: limit_timeout(*timeout_secs, settings)?,
                    max_attempts: limit_attempts(*max_attempts, settings)?,
                }
            }
            Self::Boltzgen {
                name,
                image,
                num_designs,
                timeout_secs,
                max_attempts,
            } => ToolPlan {
                name: name.clone().unwrap_or_else(|| "boltzgen".to_string()),
                program: container(image),
                args: vec![
                    "boltzgen".to_string(),
                    "run".to_string(),
                    "{hotspots}".to_string(),
                    "--structure".to_string(),
                    "{structure}".to_string(),
                    "--num_designs".to_string(),
                    num_designs.to_string(),
                    "--output".to_string(),
                    "{output_dir}".to_string(),
                ],
                structure: StructureInput::Canonical,
                hotspots: HotspotsFormat::Boltzgen,
                inputs: BTreeMap::new(),
                outputs: vec!["outputs/*".to_string()],
                env: BTreeMap::new(),
                timeout: limit_timeout(*timeout_secs, settings)?,
                max_attempts: limit_attempts(*max_attempts, settings)?,
            },
            Self::Custom {
                name,
                program,
                args,
                hotspots_format,
                inputs,
                outputs,
                env,
                timeout_secs,
                max_attempts,
            } => {
                for (input, path) in inputs {
                    if input == SCAFFOLD_INPUT {
                        return Err(ConfigError::ReservedInput(input.clone()));
                    }
                    require_file(&format!("input.{input}"), path)?;
                }
                ToolPlan {
                    name: name.clone(),
                    program: program.clone(),
                    args: args.clone(),
                    structure: StructureInput::Canonical,
                    hotspots: *hotspots_format,
                    inputs: inputs.clone(),
                    outputs: outputs.clone(),
                    env: env.clone(),
                    timeout: limit_timeout(*timeout_secs, settings)?,
                    max_attempts: limit_attempts(*max_attempts, settings)?,
                }
            }
        };

        plan.check(has_scaffold)?;
        Ok(plan)
    }
}

impl ToolPlan {
    fn check(&self, has_scaffold: bool) -> Result<(), ConfigError> {
        let valid_name = !self.name.is_empty()
            && self
                .name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid_name {
            return Err(ConfigError::InvalidToolName(self.name.clone()));
        }

        let mut declared: Vec<&str> = self.inputs.keys().map(String::as_str).collect();
        if has_scaffold {
            declared.push(SCAFFOLD_INPUT);
        }
        for arg in &self.args {
            validate_template(arg, &declared).map_err(|source| ConfigError::Template {
                tool: self.name.clone(),
                source,
            })?;
        }

        for output in &self.outputs {
            let path = Path::new(output);
            let escapes = path.is_absolute()
                || path
                    .components()
                    .any(|c| matches!(c, Component::ParentDir | Component::Prefix(_)));
            if output.is_empty() || escapes {
                return Err(ConfigError::InvalidOutput {
                    tool: self.name.clone(),
                    output: output.clone(),
                });
            }
        }
        Ok(())
    }
}

fn limit_timeout(value: Option<u64>, settings: &Settings) -> Result<Duration, ConfigError> {
    match value.unwrap_or(settings.default_timeout_secs) {
        0 => Err(ConfigError::ZeroLimit("timeout_secs")),
        secs => Ok(Duration::from_secs(secs)),
    }
}

fn limit_attempts(value: Option<u32>, settings: &Settings) -> Result<u32, ConfigError> {
    match value.unwrap_or(settings.default_max_attempts) {
        0 => Err(ConfigError::ZeroLimit("max_attempts")),
        attempts => Ok(attempts),
    }
}

/// A submission that passed [`JobRequest::validate`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidatedJob {
    request: JobRequest,
    hotspot_scope: HotspotScope,
    numbering_scheme: CdrScheme,
    tools: Vec<ToolPlan>,
}

impl ValidatedJob {
    pub fn request(&self) -> &JobRequest {
        &self.request
    }

    pub fn hotspot_scope(&self) -> HotspotScope {
        self.hotspot_scope
    }

    pub fn numbering_scheme(&self) -> CdrScheme {
        self.numbering_scheme
    }

    pub fn tools(&self) -> &[ToolPlan] {
        &self.tools
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read job '{}': {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid job '{}': {details}", path.display())]
    Parse { path: PathBuf, details: String },
    #[error("{what} file '{}' does not exist", path.display())]
    MissingInput { what: String, path: PathBuf },
    #[error("chain role hint '{chain}: {role}' names no known role")]
    InvalidRoleHint { chain: String, role: String },
    #[error("tool name '{0}' must be non-empty ASCII letters, digits, '-' or '_'")]
    InvalidToolName(String),
    #[error("tool '{0}' is configured more than once")]
    DuplicateTool(String),
    #[error("scaffold_chain is set but no scaffold was given")]
    ScaffoldChainWithoutScaffold,
    #[error("input name '{0}' is reserved")]
    ReservedInput(String),
    #[error("{0} must be greater than zero")]
    ZeroLimit(&'static str),
    #[error("tool '{tool}' has an invalid argument template: {source}")]
    Template {
        tool: String,
        #[source]
        source: TemplateError,
    },
    #[error("tool '{tool}' declares output '{output}' outside its working directory")]
    InvalidOutput { tool: String, output: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn request(dir: &TempDir, tools: Vec<ToolConfig>) -> JobRequest {
        let target = dir.path().join("target.pdb");
        std::fs::write(&target, "ATOM\n").unwrap();
        JobRequest {
            target,
            scaffold: None,
            scaffold_chain: None,
            numbering_scheme: None,
            hotspots: vec!["A:10".into()],
            hotspot_scope: None,
            chain_roles: BTreeMap::new(),
            strict_hotspots: false,
            tools,
        }
    }

    fn custom(name: &str, args: &[&str], outputs: &[&str]) -> ToolConfig {
        ToolConfig::Custom {
            name: name.to_string(),
            program: Program::Executable {
                path: PathBuf::from("/usr/bin/design"),
            },
            args: args.iter().map(|s| s.to_string()).collect(),
            hotspots_format: HotspotsFormat::Report,
            inputs: BTreeMap::new(),
            outputs: outputs.iter().map(|s| s.to_string()).collect(),
            env: BTreeMap::new(),
            timeout_secs: None,
            max_attempts: None,
        }
    }

    #[test]
    fn validate_applies_settings_defaults() {
        let dir = TempDir::new().unwrap();
        let settings = Settings {
            container_runtime: "podman".into(),
            default_timeout_secs: 90,
            ..Settings::default()
        };
        let job = request(
            &dir,
            vec![ToolConfig::Rfantibody {
                name: None,
                image: default_rfantibody_image(),
                num_designs: 5,
                timeout_secs: None,
                max_attempts: Some(3),
            }],
        )
        .validate(&settings)
        .unwrap();

        assert_eq!(job.hotspot_scope(), HotspotScope::Protein);
        let plan = &job.tools()[0];
        assert_eq!(plan.name, "rfantibody");
        assert_eq!(plan.timeout, Duration::from_secs(90));
        assert_eq!(plan.max_attempts, 3);
        assert_eq!(plan.structure, StructureInput::Hlt);
        assert!(matches!(&plan.program, Program::Container { runtime, .. } if runtime == "podman"));
        assert!(plan.args.contains(&"5".to_string()));
        assert_eq!(job.numbering_scheme(), CdrScheme::Chothia);
    }

    #[test]
    fn validate_checks_scaffold_numbering_options() {
        let dir = TempDir::new().unwrap();
        let mut job = request(&dir, Vec::new());
        job.scaffold_chain = Some("H".into());
        assert!(matches!(
            job.clone().validate(&Settings::default()),
            Err(ConfigError::ScaffoldChainWithoutScaffold)
        ));

        let scaffold = dir.path().join("scaffold.pdb");
        std::fs::write(&scaffold, "ATOM\n").unwrap();
        job.scaffold = Some(scaffold);
        job.numbering_scheme = Some(CdrScheme::Kabat);
        let validated = job.validate(&Settings::default()).unwrap();
        assert_eq!(validated.numbering_scheme(), CdrScheme::Kabat);
        assert_eq!(validated.request().scaffold_chain.as_deref(), Some("H"));
    }

    #[test]
    fn validate_rejects_missing_target() {
        let dir = TempDir::new().unwrap();
        let mut job = request(&dir, Vec::new());
        job.target = dir.path().join("absent.cif");
        assert!(matches!(
            job.validate(&Settings::default()),
            Err(ConfigError::MissingInput { .. })
        ));
    }

    #[test]
    fn validate_rejects_unknown_placeholders() {
        let dir = TempDir::new().unwrap();
        let job = request(&dir, vec![custom("mpnn", &["{structure}", "{input.scaffold}"], &[])]);
        assert!(matches!(
            job.validate(&Settings::default()),
            Err(ConfigError::Template { tool, .. }) if tool == "mpnn"
        ));
    }

    #[test]
    fn validate_rejects_duplicate_tool_names() {
        let dir = TempDir::new().unwrap();
        let job = request(&dir, vec![custom("a", &[], &[]), custom("a", &[], &[])]);
        assert!(matches!(
            job.validate(&Settings::default()),
            Err(ConfigError::DuplicateTool(name)) if name == "a"
        ));
    }

    #[test]
    fn validate_rejects_outputs_outside_the_workdir() {
        let dir = TempDir::new().unwrap();
        for output in ["../escape.pdb", "/tmp/out.pdb"] {
            let job = request(&dir, vec![custom("a", &[], &[output])]);
            assert!(matches!(
                job.validate(&Settings::default()),
                Err(ConfigError::InvalidOutput { .. })
            ));
        }
    }

    #[test]
    fn validate_rejects_zero_limits_and_bad_role_hints() {
        let dir = TempDir::new().unwrap();
        let mut zero = custom("a", &[], &[]);
        if let ToolConfig::Custom { max_attempts, .. } = &mut zero {
            *max_attempts = Some(0);
        }
        assert!(matches!(
            request(&dir, vec![zero]).validate(&Settings::default()),
            Err(ConfigError::ZeroLimit("max_attempts"))
        ));

        let mut hinted = request(&dir, Vec::new());
        hinted.chain_roles.insert("A".into(), "antigen".into());
        assert!(matches!(
            hinted.validate(&Settings::default()),
            Err(ConfigError::InvalidRoleHint { .. })
        ));
    }

    #[test]
    fn job_request_parses_tagged_tools_from_toml() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("job.toml");
        std::fs::write(
            &path,
            r#"
target = "target.cif"
hotspots = ["A:305", { chain = "B", resi = 52, ins = "A" }]
strict_hotspots = true

[chain_roles]
A = "target"

[[tools]]
tool = "boltzgen"
num_designs = 4

[[tools]]
tool = "custom"
name = "echo"
args = ["{structure}"]
program = { kind = "executable", path = "/bin/echo" }
"#,
        )
        .unwrap();

        let job = JobRequest::from_file(&path).unwrap();
        assert_eq!(job.hotspots.len(), 2);
        assert_eq!(
            job.hotspots[1],
            HotspotSpec::Structured {
                chain: "B".into(),
                residue_number: 52,
                insertion_code: Some("A".into())
            }
        );
        assert!(matches!(
            job.tools[0],
            ToolConfig::Boltzgen { num_designs: 4, .. }
        ));
        assert!(matches!(&job.tools[1], ToolConfig::Custom { name, .. } if name == "echo"));
    }

    #[test]
    fn job_request_rejects_unknown_tool_kinds() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("job.json");
        std::fs::write(&path, r#"{"target": "t.pdb", "tools": [{"tool": "alphafold"}]}"#).unwrap();
        assert!(matches!(
            JobRequest::from_file(&path),
            Err(ConfigError::Parse { .. })
        ));
    }
}
