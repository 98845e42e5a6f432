use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use std::fs;
use std::path::{Component, Path, PathBuf};

use crate::config::Config;
use crate::store::Store;

#[derive(Args)]
pub struct ProjectArgs {
    #[command(subcommand)]
    pub command: ProjectCommands,
}

#[derive(Subcommand)]
pub enum ProjectCommands {
    /// List stored projects
    List {
        /// Only projects owned by this user
        #[arg(short, long)]
        user: Option<String>,
    },

    /// Show a project's phase, variants, and files
    Show {
        /// Project ID
        id: String,
    },

    /// Delete a project and everything attached to it
    Delete {
        /// Project ID
        id: String,
    },

    /// Write a project's generated files to disk
    Export {
        /// Project ID
        id: String,

        /// Output directory (default: <export_dir>/<project-name>)
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
}

pub fn run(args: ProjectArgs, config: &Config) -> Result<()> {
    let store = Store::open(&config.database_path())?;

    match args.command {
        ProjectCommands::List { user } => list_projects(&store, user.as_deref()),
        ProjectCommands::Show { id } => show_project(&store, &id),
        ProjectCommands::Delete { id } => {
            store.delete_project(&id)?;
            println!("Deleted project {}", id);
            Ok(())
        }
        ProjectCommands::Export { id, out } => export_project(&store, config, &id, out),
    }
}

fn list_projects(store: &Store, user: Option<&str>) -> Result<()> {
    let projects = store.list_projects(user)?;
    if projects.is_empty() {
        println!("No projects yet. Start one with `design-ide chat`.");
        return Ok(());
    }

    println!("{:<38} {:<10} {:<17} Name", "ID", "Phase", "Updated");
    for project in projects {
        println!(
            "{:<38} {:<10} {:<17} {}",
            project.id,
            project.phase.as_str(),
            project.updated_at.format("%Y-%m-%d %H:%M"),
            project.name
        );
    }
    Ok(())
}

fn show_project(store: &Store, id: &str) -> Result<()> {
    let project = store.get_project(id)?;
    let variants = store.get_variants(id)?;
    let feedback = store.get_feedback(id)?;
    let messages = store.get_messages(id)?;
    let files = store.get_generated_files(id)?;

    println!("{} ({})", project.name, project.id);
    println!(
        "  Phase:    {} - {}",
        project.phase.label(),
        project.phase.description()
    );
    if let Some(description) = &project.description {
        println!("  About:    {}", description);
    }
    println!("  Created:  {}", project.created_at.format("%Y-%m-%d %H:%M"));
    println!("  Messages: {}", messages.len());

    if !variants.is_empty() {
        println!("\nVariants:");
        for variant in &variants {
            let marker = if variant.is_approved { "*" } else { " " };
            println!(
                " {} {} {} ({})",
                marker,
                variant.variant_id,
                variant.name,
                variant.focus_area.as_str()
            );
        }
    }

    if !feedback.is_empty() {
        println!("\nPending feedback: {} comment(s)", feedback.len());
    }

    if !files.is_empty() {
        println!("\nGenerated files:");
        for file in &files {
            println!("  {:<10} {}", file.file_type.as_str(), file.path);
        }
    }

    Ok(())
}

fn export_project(store: &Store, config: &Config, id: &str, out: Option<PathBuf>) -> Result<()> {
    let project = store.get_project(id)?;
    let files = store.get_generated_files(id)?;
    if files.is_empty() {
        anyhow::bail!(
            "Project {} has no generated files yet (phase: {})",
            id,
            project.phase.label()
        );
    }

    let out = out.unwrap_or_else(|| config.paths.export_dir.join(generate_slug(&project.name)));
    let written = write_files(
        &out,
        files.iter().map(|f| (f.path.as_str(), f.content.as_str())),
    )?;

    println!("Exported {} file(s) to {}", written, out.display());
    Ok(())
}

/// Write `(path, content)` pairs under `root`, creating parent directories.
pub(crate) fn write_files<'a>(
    root: &Path,
    files: impl IntoIterator<Item = (&'a str, &'a str)>,
) -> Result<usize> {
    let mut written = 0;
    for (path, content) in files {
        let relative = relative_path(path)
            .with_context(|| format!("Refusing to write outside the export directory: {}", path))?;
        let target = root.join(relative);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&target, content)
            .with_context(|| format!("Failed to write {}", target.display()))?;
        written += 1;
    }
    Ok(written)
}

/// Strip leading slashes; reject paths that climb out of the root.
fn relative_path(path: &str) -> Option<PathBuf> {
    let path = Path::new(path.trim_start_matches('/'));
    let mut relative = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => relative.push(part),
            Component::CurDir => {}
            _ => return None,
        }
    }
    if relative.as_os_str().is_empty() {
        None
    } else {
        Some(relative)
    }
}

/// Directory-safe slug from a project name.
pub(crate) fn generate_slug(name: &str) -> String {
    let slug = name
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect::<String>()
        .split('-')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("-");

    if slug.is_empty() {
        "project".to_string()
    } else {
        slug
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relative_path() {
        assert_eq!(
            relative_path("/src/App.tsx"),
            Some(PathBuf::from("src/App.tsx"))
        );
        assert_eq!(
            relative_path("./api/users.ts"),
            Some(PathBuf::from("api/users.ts"))
        );
        assert_eq!(relative_path("../etc/passwd"), None);
        assert_eq!(relative_path("src/../../x"), None);
        assert_eq!(relative_path("/"), None);
    }

    #[test]
    fn test_generate_slug() {
        assert_eq!(generate_slug("Task Board"), "task-board");
        assert_eq!(generate_slug("  Café -- App!! "), "caf-app");
        assert_eq!(generate_slug("???"), "project");
    }

    #[test]
    fn test_write_files() {
        let dir = tempfile::tempdir().unwrap();
        let written = write_files(
            dir.path(),
            [
                ("/App.tsx", "export default function App() {}"),
                ("src/api/tasks.ts", "export {}"),
            ],
        )
        .unwrap();

        assert_eq!(written, 2);
        assert!(dir.path().join("App.tsx").exists());
        assert_eq!(
            fs::read_to_string(dir.path().join("src/api/tasks.ts")).unwrap(),
            "export {}"
        );
    }

    #[test]
    fn test_write_files_rejects_escape() {
        let dir = tempfile::tempdir().unwrap();
        let result = write_files(dir.path().join("out").as_path(), [("../evil.ts", "x")]);
        assert!(result.is_err());
        assert!(!dir.path().join("evil.ts").exists());
    }

    #[test]
    fn test_export_writes_generated_files() {
        let store = Store::open_in_memory().unwrap();
        let project = store
            .create_project(&crate::store::NewProject::named("Task Board"))
            .unwrap();
        store
            .create_generated_file(
                &project.id,
                &crate::store::NewGeneratedFile {
                    path: "src/components/Board.tsx".to_string(),
                    content: "export default function Board() {}".to_string(),
                    file_type: crate::store::FileType::Component,
                },
            )
            .unwrap();

        let dir = tempfile::tempdir().unwrap();
        let config = Config::default();
        export_project(&store, &config, &project.id, Some(dir.path().to_path_buf())).unwrap();

        assert!(dir.path().join("src/components/Board.tsx").exists());
    }

    #[test]
    fn test_export_without_files_fails() {
        let store = Store::open_in_memory().unwrap();
        let project = store
            .create_project(&crate::store::NewProject::named("Empty"))
            .unwrap();
        let dir = tempfile::tempdir().unwrap();
        let config = Config::default();
        let result = export_project(&store, &config, &project.id, Some(dir.path().to_path_buf()));
        assert!(result.is_err());
    }
}
