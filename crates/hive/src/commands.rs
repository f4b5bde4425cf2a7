use anyhow::{Context, Result, anyhow, bail};
use hive_app::{ProjectManager, ProjectQuery, ProjectStore};
use hive_core::{Project, ProjectDraft, ProjectRef, Subject, User};

use crate::Command;

/// Run an admin command as the system principal against a warmed-up manager.
pub fn run<S: ProjectStore>(command: Command, manager: &ProjectManager<S>) -> Result<()> {
    let actor = User::system();
    match command {
        Command::Check => {
            println!("{} projects, cache and repositories consistent", manager.ids().len());
        }
        Command::Ls { pattern, json } => {
            let query = ProjectQuery {
                path_pattern: pattern,
                sorts: Vec::new(),
            };
            let projects = manager.query(Subject::User(&actor), &query, 0, usize::MAX)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&projects)?);
            } else if projects.is_empty() {
                println!("No projects found");
            } else {
                for project in projects {
                    println!("{:>6}  {}", project.id, project.path);
                }
            }
        }
        Command::Create { path, description } => {
            let mut draft = draft_for(manager, &path, &actor)?;
            draft.description = description;
            let project = manager.create(&actor, draft)?;
            println!("created project: {} (#{})", project.path, project.id);
        }
        Command::Clone { url, path } => {
            let draft = draft_for(manager, &path, &actor)?;
            let project = manager
                .clone_from(&actor, draft, &url)
                .with_context(|| format!("failed to clone {url}"))?;
            println!("cloned {url} into {} (#{})", project.path, project.id);
        }
        Command::Fork { source, path } => {
            let source = resolve(manager, &source)?;
            let draft = draft_for(manager, &path, &actor)?;
            let project = manager.fork(&actor, source.id, draft)?;
            println!("forked {} into {} (#{})", source.path, project.path, project.id);
        }
        Command::Mv {
            path,
            parent,
            root,
            name,
        } => {
            let mut project = resolve(manager, &path)?;
            if let Some(parent) = parent {
                project.parent = Some(resolve(manager, &parent)?.id);
            } else if root {
                project.parent = None;
            }
            if let Some(name) = name {
                project.name = name;
            }
            let project = manager.save(project)?;
            println!("moved {path} to {}", project.path);
        }
        Command::Rm { paths } => {
            let ids = paths
                .iter()
                .map(|path| resolve(manager, path).map(|project| project.id))
                .collect::<Result<Vec<_>>>()?;
            manager.delete_many(&ids)?;
            println!("deleted {} project(s)", ids.len());
        }
        Command::RmBranch { path, branch } => {
            let project = resolve(manager, &path)?;
            let old = manager.delete_branch(project.id, &branch)?;
            println!("deleted branch {branch} of {} (was {old})", project.path);
        }
        Command::RmTag { path, tag } => {
            let project = resolve(manager, &path)?;
            let old = manager.delete_tag(project.id, &tag)?;
            println!("deleted tag {tag} of {} (was {old})", project.path);
        }
        Command::Serve => bail!("serve is handled by the entry point"),
    }
    Ok(())
}

fn resolve<S: ProjectStore>(manager: &ProjectManager<S>, path: &str) -> Result<Project> {
    manager
        .find_by_path(path.trim_matches('/'))?
        .ok_or_else(|| anyhow!("project '{path}' not found"))
}

fn draft_for<S: ProjectStore>(manager: &ProjectManager<S>, path: &str, actor: &User) -> Result<ProjectDraft> {
    match manager.initialize(path, Subject::User(actor))? {
        ProjectRef::Existing(_) => bail!("project '{path}' already exists"),
        ProjectRef::New(draft) => Ok(*draft),
    }
}
