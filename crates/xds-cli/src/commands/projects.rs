//! Project management command implementation.
//!
//! Provides subcommands for:
//! - Adding a project (path-map or cloud-sync)
//! - Getting and listing projects
//! - Removing a project
//! - Forcing a source synchronization

use std::io::Write;

use tracing::{debug, info};
use xds_proto::{ProjectConfig, ProjectType};

use crate::cli::ProjectCommands;
use crate::config::{EffectiveConfig, ENV_PROJECT_ID};
use crate::context::XdsContext;
use crate::error::CliError;
use crate::output::{ActionResult, OutputFormat, ProjectList};
use crate::transport::{self, RequestChannel};

use super::require_id;

/// Validated `projects` invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProjectCommand {
    /// Create a project; the server id is filled in at execution.
    Add(ProjectConfig),
    /// Show one project.
    Get(String),
    /// List all projects.
    List {
        /// One block per project.
        verbose: bool,
    },
    /// Delete a project.
    Remove(String),
    /// Force a synchronization.
    Sync(String),
}

impl ProjectCommand {
    /// Resolves ids and decodes the project type.
    ///
    /// # Errors
    ///
    /// Returns [`CliError::Validation`] for a missing id or an unknown type.
    pub fn from_args(command: &ProjectCommands, cfg: &EffectiveConfig) -> Result<Self, CliError> {
        Ok(match command {
            ProjectCommands::Add(args) => {
                let project_type: ProjectType = args.project_type.parse()?;
                Self::Add(ProjectConfig {
                    label: args.label.clone(),
                    client_path: args.path.clone(),
                    server_path: args.server_path.clone(),
                    project_type,
                    ..ProjectConfig::default()
                })
            }
            ProjectCommands::Get(ids) => Self::Get(require_id(ids, cfg, ENV_PROJECT_ID)?),
            ProjectCommands::List { verbose } => Self::List { verbose: *verbose },
            ProjectCommands::Remove(ids) => Self::Remove(require_id(ids, cfg, ENV_PROJECT_ID)?),
            ProjectCommands::Sync(ids) => Self::Sync(require_id(ids, cfg, ENV_PROJECT_ID)?),
        })
    }

    /// Execute the project subcommand.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or output cannot be written.
    pub async fn execute<C: RequestChannel, W: Write>(
        &self,
        ctx: &XdsContext<C>,
        writer: &mut W,
        format: &OutputFormat,
    ) -> Result<(), CliError> {
        match self {
            Self::Add(project) => {
                let mut project = project.clone();
                project.server_id = ctx.server_id().await;
                info!(label = %project.label, "POST /projects");
                let created: ProjectConfig =
                    transport::post(ctx.channel(), "/projects", &project).await?;
                let msg = ActionResult::new(
                    format!(
                        "New project '{}' (id {}) successfully created.",
                        created.label, created.id
                    ),
                    Some(created.id),
                );
                format.write(writer, &msg)?;
            }
            Self::Get(id) => {
                let project: ProjectConfig =
                    transport::get(ctx.channel(), &format!("/projects/{id}")).await?;
                let list = ProjectList {
                    projects: vec![project],
                    verbose: true,
                };
                format.write(writer, &list)?;
            }
            Self::List { verbose } => {
                let projects: Vec<ProjectConfig> = transport::get(ctx.channel(), "/projects").await?;
                debug!(count = projects.len(), "projects listed");
                let list = ProjectList {
                    projects,
                    verbose: *verbose,
                };
                format.write(writer, &list)?;
            }
            Self::Remove(id) => {
                let removed: ProjectConfig =
                    transport::delete(ctx.channel(), &format!("/projects/{id}")).await?;
                let msg = ActionResult::new(
                    format!("Project ID {} successfully deleted.", removed.id),
                    Some(removed.id),
                );
                format.write(writer, &msg)?;
            }
            Self::Sync(id) => {
                let _: serde_json::Value =
                    transport::post(ctx.channel(), &format!("/projects/sync/{id}"), &"").await?;
                let msg = ActionResult::new("Sync successfully requested.", Some(id.clone()));
                format.write(writer, &msg)?;
            }
        }
        Ok(())
    }
}
